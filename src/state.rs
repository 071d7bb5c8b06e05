use std::fmt;

/// Lifecycle of a promise.
///
/// `Pending` moves to exactly one of `Fulfilled`, `Rejected` or `Canceled`.
/// `Canceled` may move once more, to `RejectedOnCancel`, when the cancellation
/// asked for an error to be raised.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PromiseState {
    Pending = 0,
    Fulfilled = 1,
    Rejected = 2,
    RejectedOnCancel = 3,
    Canceled = 4,
}

impl PromiseState {
    pub(crate) const fn from_u8(raw: u8) -> Self {
        match raw {
            1 => PromiseState::Fulfilled,
            2 => PromiseState::Rejected,
            3 => PromiseState::RejectedOnCancel,
            4 => PromiseState::Canceled,
            _ => PromiseState::Pending,
        }
    }

    pub fn is_rejected(self) -> bool {
        matches!(self, PromiseState::Rejected | PromiseState::RejectedOnCancel)
    }
}

impl fmt::Display for PromiseState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PromiseState::Pending => "Pending",
            PromiseState::Fulfilled => "Fulfilled",
            PromiseState::Rejected => "Rejected",
            PromiseState::RejectedOnCancel => "RejectedOnCancel",
            PromiseState::Canceled => "Canceled",
        };
        f.write_str(name)
    }
}

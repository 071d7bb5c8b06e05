#[cfg(test)]
mod tests {
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::mpsc::{channel, Receiver};
    use std::sync::Arc;
    use std::thread;
    use std::time::{Duration, Instant};
    use threaded_promise::{
        all_with, race_with, Error, Promise, PromiseOptions, PromiseState, UiThread,
    };

    fn init_tracing() {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    }

    /// Options whose uncaught reports land in the returned receiver.
    fn reporting_options() -> (PromiseOptions, Receiver<String>) {
        init_tracing();
        let (tx, rx) = channel();
        let tx = Mutex::new(tx);
        let options = PromiseOptions::builder()
            .debug(true)
            .uncaught_handler(move |error| {
                let _ = tx.lock().send(error.to_string());
            })
            .build();
        (options, rx)
    }

    fn sleeping<V>(options: &PromiseOptions, millis: u64, value: V) -> Promise<V>
    where
        V: Clone + Send + 'static,
    {
        Promise::spawn_with(options.clone(), move || {
            thread::sleep(Duration::from_millis(millis));
            Ok(value)
        })
    }

    #[test]
    fn test_await_value_resolved_from_thread() {
        let (options, _) = reporting_options();
        let promise = Promise::<i32>::pending_with(options);
        let promise_clone = promise.clone();

        thread::spawn(move || {
            thread::sleep(Duration::from_millis(100));
            promise_clone.resolve(42);
        });

        let result = promise.await_value().unwrap();
        assert_eq!(result, 42);
    }

    #[test]
    fn test_then_identity() {
        let (options, _) = reporting_options();
        for value in [0, 1, -7, i64::MAX] {
            let promise = Promise::pending_with(options.clone());
            promise.resolve(value);
            assert_eq!(promise.then(Ok).await_value().unwrap(), value);
        }
    }

    #[test]
    fn test_then_fork_and_join() {
        // p1 -> p2 -> p4, p1 -> p3
        let (options, _) = reporting_options();
        let (tx, rx) = channel();
        let p1 = Promise::with_options(options, |promise| {
            promise.resolve("Abc".to_owned());
            Ok(())
        });
        let first = tx.clone();
        let p2 = p1.then(move |_| {
            first.send("p2").unwrap();
            Ok("Cba".to_owned())
        });
        let second = tx.clone();
        p1.then(move |_| {
            second.send("p3").unwrap();
            Ok(())
        });
        let result = p2
            .then(move |value| {
                tx.send("p4").unwrap();
                Ok(value)
            })
            .await_value()
            .unwrap();
        assert_eq!(result, "Cba");
        let mut seen: Vec<_> = rx.try_iter().collect();
        seen.sort_unstable();
        assert_eq!(seen, vec!["p2", "p3", "p4"]);
    }

    #[test]
    fn test_catch_error_from_body_skips_then() {
        let (options, reports) = reporting_options();
        let ran = Arc::new(AtomicUsize::new(0));
        let counter = ran.clone();
        let (tx, rx) = channel();
        Promise::<String>::with_options(options, |_| Err("Test".into()))
            .then(move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
            .catch(move |error| {
                tx.send(error.to_string()).unwrap();
                Ok(())
            });
        assert_eq!(rx.recv_timeout(Duration::from_secs(2)).unwrap(), "Test");
        assert_eq!(ran.load(Ordering::SeqCst), 0);
        assert!(reports.recv_timeout(Duration::from_millis(200)).is_err());
    }

    #[test]
    fn test_two_catches_see_the_same_error() {
        let (options, reports) = reporting_options();
        let (tx, rx) = channel();
        let again = tx.clone();
        let root = Promise::<i32>::pending_with(options);
        root.then(|v| Ok(v))
            .catch(move |error| {
                tx.send(error.to_string()).unwrap();
                Ok(())
            })
            .catch(move |error| {
                again.send(error.to_string()).unwrap();
                Ok(())
            });
        root.reject(Error::msg("Test"));
        assert_eq!(rx.recv().unwrap(), "Test");
        assert_eq!(rx.recv().unwrap(), "Test");
        assert!(reports.recv_timeout(Duration::from_millis(200)).is_err());
    }

    #[test]
    fn test_uncaught_error_from_last_catch_is_reported_once() {
        let (options, reports) = reporting_options();
        Promise::<i32>::with_options(options, |_| Err("Test1".into()))
            .then(|v| Ok(v))
            .catch(|_| Err("Test1".into()))
            .catch(|_| Err("Test1".into()))
            .catch(|_| Err("Test1".into()))
            .then(|v| Ok(v))
            .catch(|_| Err("Test2".into()));
        assert_eq!(reports.recv_timeout(Duration::from_secs(2)).unwrap(), "Test2");
        assert!(reports.recv_timeout(Duration::from_millis(200)).is_err());
    }

    #[test]
    fn test_uncaught_error_deep_in_then_chain() {
        let (options, reports) = reporting_options();
        let root = Promise::pending_with(options);
        root.then(|_| Ok(123))
            .then(|_: i32| -> Result<bool, Error> { Err("Test1".into()) })
            .then(|_| Ok(false));
        root.resolve("Abc");
        assert_eq!(reports.recv_timeout(Duration::from_secs(2)).unwrap(), "Test1");
        assert!(reports.recv_timeout(Duration::from_millis(200)).is_err());
    }

    #[test]
    fn test_catch_fork_counts_once() {
        // one rejected parent, one catch child and one then child
        let (options, reports) = reporting_options();
        let count = Arc::new(AtomicUsize::new(0));
        let promise = Promise::<i32>::with_options(options, |promise| {
            thread::sleep(Duration::from_millis(10));
            promise.reject(Error::msg("Test"));
            Ok(())
        });
        let caught = count.clone();
        promise.catch(move |_| {
            caught.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
        let fulfilled = count.clone();
        promise.then(move |_| {
            fulfilled.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
        thread::sleep(Duration::from_millis(200));
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert!(reports.try_recv().is_err());
    }

    #[test]
    fn test_failing_branch_of_fulfilled_parent_is_reported() {
        let (options, reports) = reporting_options();
        let promise = Promise::with_options(options, |promise| {
            thread::sleep(Duration::from_millis(10));
            promise.resolve(1);
            Ok(())
        });
        promise.then(|_| -> Result<(), Error> { Err("Test".into()) });
        promise.then(|_| Ok(()));
        assert_eq!(reports.recv_timeout(Duration::from_secs(2)).unwrap(), "Test");
    }

    #[test]
    fn test_chain_after_slow_body() {
        let (options, _) = reporting_options();
        let inner_options = options.clone();
        let result = sleeping(&options, 100, "Abc")
            .chain(move |_| Ok(Promise::spawn_with(inner_options, || Ok(123))))
            .await_value()
            .unwrap();
        assert_eq!(result, 123);
    }

    #[test]
    fn test_threads_used_by_continuations() {
        let ui = UiThread::spawn("promise-ui").unwrap();
        let ui_id = ui.thread_id();
        let options = PromiseOptions::builder()
            .ui_executor(Arc::new(ui))
            .uncaught_handler(|_| {})
            .build();
        let main = thread::current().id();
        let body_thread = Arc::new(Mutex::new(None));
        let recorded = body_thread.clone();
        let (tx, rx) = channel();
        let then_tx = tx.clone();
        let promise = Promise::with_options(options, move |promise| {
            thread::sleep(Duration::from_millis(100));
            *recorded.lock() = Some(thread::current().id());
            promise.resolve(());
            Ok(())
        });
        promise
            .then(move |_| {
                then_tx.send(("then", thread::current().id())).unwrap();
                Ok(())
            })
            .then_on_ui(move |_| {
                tx.send(("ui", thread::current().id())).unwrap();
                Ok(())
            })
            .await_value()
            .unwrap();
        let body = body_thread.lock().expect("body never ran");
        assert_ne!(body, main);
        assert_eq!(rx.recv().unwrap(), ("then", body));
        assert_eq!(rx.recv().unwrap(), ("ui", ui_id));
    }

    #[test]
    fn test_all_keeps_input_order_not_completion_order() {
        let (options, _) = reporting_options();
        let slow = sleeping(&options, 200, "A");
        let fast = sleeping(&options, 100, "B");
        let values = all_with(options, vec![slow, fast]).await_value().unwrap();
        assert_eq!(values, vec!["A", "B"]);
    }

    #[test]
    fn test_all_rejects_with_failing_input() {
        let (options, reports) = reporting_options();
        let failing = Promise::<&str>::spawn_with(options.clone(), || {
            thread::sleep(Duration::from_millis(200));
            Err("Test".into())
        });
        let fine = sleeping(&options, 100, "Efg");
        let (tx, rx) = channel();
        all_with(options, vec![failing, fine])
            .then(|_| -> Result<(), Error> { panic!("all must not fulfill") })
            .catch(move |error| {
                tx.send(error.to_string()).unwrap();
                Ok(())
            });
        assert_eq!(rx.recv_timeout(Duration::from_secs(2)).unwrap(), "Test");
        assert!(reports.recv_timeout(Duration::from_millis(200)).is_err());
    }

    #[test]
    fn test_race_discards_later_failure() {
        let (options, reports) = reporting_options();
        let failing = Promise::<&str>::spawn_with(options.clone(), || {
            thread::sleep(Duration::from_millis(200));
            Err("Test".into())
        });
        let fast = sleeping(&options, 100, "Efg");
        let winner = race_with(options, vec![failing.clone(), fast]);
        assert_eq!(winner.await_value().unwrap(), "Efg");
        assert_eq!(
            failing.await_promise(true, None).unwrap_err().to_string(),
            "Test"
        );
        assert!(reports.recv_timeout(Duration::from_millis(200)).is_err());
    }

    #[test]
    fn test_cancel_without_error_stays_silent() {
        let (options, reports) = reporting_options();
        let hits = Arc::new(AtomicUsize::new(0));
        let promise = sleeping(&options, 100_000, "abc");
        let then_hits = hits.clone();
        let catch_hits = hits.clone();
        promise
            .then(move |_| {
                then_hits.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
            .catch(move |_| {
                catch_hits.fetch_add(1, Ordering::SeqCst);
                Ok(())
            });
        let canceler = promise.clone();
        thread::spawn(move || canceler.cancel(false))
            .join()
            .expect("The cancel thread has panicked");
        assert_eq!(promise.state(), PromiseState::Canceled);
        thread::sleep(Duration::from_millis(100));
        assert_eq!(hits.load(Ordering::SeqCst), 0);
        assert!(reports.try_recv().is_err());
    }

    #[test]
    fn test_cancel_root_with_error_reaches_catch() {
        let (options, _) = reporting_options();
        let (tx, rx) = channel();
        let promise = sleeping(&options, 100_000, "abc");
        promise.then(|_| Ok(())).catch(move |error| {
            tx.send(error).unwrap();
            Ok(())
        });
        let canceler = promise.clone();
        thread::spawn(move || canceler.cancel(true));
        assert!(rx.recv_timeout(Duration::from_secs(2)).unwrap().is_canceled());
        assert_eq!(promise.state(), PromiseState::RejectedOnCancel);
    }

    #[test]
    fn test_cancel_child_with_error_reaches_catch() {
        let (options, reports) = reporting_options();
        let (tx, rx) = channel();
        let root = sleeping(&options, 100_000, "abc");
        let leaf = root.then(|_| Ok(())).catch(move |error| {
            tx.send(error).unwrap();
            Ok(())
        });
        let canceler = leaf.clone();
        thread::spawn(move || canceler.cancel(true));
        assert!(rx.recv_timeout(Duration::from_secs(2)).unwrap().is_canceled());
        assert!(root.is_canceled());
        assert!(reports.recv_timeout(Duration::from_millis(200)).is_err());
    }

    #[test]
    fn test_timeout_cancels_slow_body() {
        let (options, _) = reporting_options();
        let (tx, rx) = channel();
        let started = Instant::now();
        sleeping(&options, 10_000, "abc")
            .timeout(Duration::from_millis(100), true)
            .then(|_| -> Result<(), Error> { panic!("timed out promise must not fulfill") })
            .catch(move |error| {
                tx.send(error).unwrap();
                Ok(())
            });
        let error = rx.recv_timeout(Duration::from_secs(2)).unwrap();
        let elapsed = started.elapsed();
        assert!(error.is_canceled());
        assert!(elapsed >= Duration::from_millis(100));
        assert!(elapsed < Duration::from_millis(400), "took {elapsed:?}");
    }

    #[test]
    fn test_stacked_timeouts_fire_independently() {
        let (options, _) = reporting_options();
        let (tx, rx) = channel();
        let promise = sleeping(&options, 10_000, "abc")
            .timeout(Duration::from_millis(300), false)
            .timeout(Duration::from_millis(50), true);
        promise.catch(move |error| {
            tx.send(error).unwrap();
            Ok(())
        });
        assert!(rx.recv_timeout(Duration::from_secs(2)).unwrap().is_canceled());
        assert_eq!(promise.state(), PromiseState::RejectedOnCancel);
        thread::sleep(Duration::from_millis(400));
        assert_eq!(promise.state(), PromiseState::RejectedOnCancel);
    }

    #[test]
    fn test_timeout_on_child_cancels_upwards() {
        let (options, _) = reporting_options();
        let (tx, rx) = channel();
        let root = sleeping(&options, 100_000, "abc");
        root.then(|_| Ok(()))
            .catch(move |error| {
                tx.send(error).unwrap();
                Ok(())
            })
            .timeout(Duration::from_millis(100), true);
        assert!(rx.recv_timeout(Duration::from_secs(2)).unwrap().is_canceled());
        assert_eq!(root.state(), PromiseState::RejectedOnCancel);
    }

    #[test]
    fn test_timeout_after_settlement_is_ignored() {
        let (options, _) = reporting_options();
        let promise = Promise::with_options(options.clone(), |promise| {
            promise.resolve("abc");
            Ok(())
        });
        let followed = promise
            .then(Ok)
            .catch(|_| panic!("must not be caught"))
            .timeout(Duration::from_millis(50), true);
        assert_eq!(followed.await_value().unwrap(), "abc");
        thread::sleep(Duration::from_millis(100));
        assert_eq!(followed.state(), PromiseState::Fulfilled);

        let failing = Promise::<i32>::with_options(options, |_| Err("Test".into()));
        let (tx, rx) = channel();
        failing
            .then(|v| Ok(v))
            .catch(move |error| {
                tx.send(error.to_string()).unwrap();
                Ok(())
            })
            .timeout(Duration::from_millis(50), true);
        assert_eq!(rx.recv_timeout(Duration::from_secs(2)).unwrap(), "Test");
    }

    #[test]
    fn test_timeout_reaches_chained_promise() {
        let (options, _) = reporting_options();
        let (tx, rx) = channel();
        let inner_options = options.clone();
        let root = Promise::pending_with(options);
        let inner_slot = Arc::new(Mutex::new(None));
        let captured = inner_slot.clone();
        root.chain(move |_: &str| {
            let inner = Promise::spawn_with(inner_options, || {
                thread::sleep(Duration::from_millis(100_000));
                Ok("efg")
            });
            *captured.lock() = Some(inner.clone());
            Ok(inner)
        })
        .then(|_| -> Result<(), Error> { panic!("chained promise must not fulfill") })
        .timeout(Duration::from_millis(100), true)
        .catch(move |error| {
            tx.send(error).unwrap();
            Ok(())
        });
        root.resolve("abc");
        assert!(rx.recv_timeout(Duration::from_secs(2)).unwrap().is_canceled());
        let inner = inner_slot.lock().clone().expect("chain never ran");
        assert_eq!(inner.state(), PromiseState::RejectedOnCancel);
    }

    #[test]
    fn test_timeout_with_chain_that_finishes_in_time() {
        let (options, _) = reporting_options();
        let inner_options = options.clone();
        let root = Promise::pending_with(options);
        let result = root
            .chain(move |_: &str| {
                Ok(Promise::spawn_with(inner_options, || {
                    thread::sleep(Duration::from_millis(100));
                    Ok("efg")
                }))
            })
            .then(Ok)
            .timeout(Duration::from_millis(1_000), true)
            .catch(|_| panic!("must not time out"));
        root.resolve("abc");
        assert_eq!(result.await_value().unwrap(), "efg");
    }

    #[test]
    fn test_then_after_catch_sees_value() {
        let (options, _) = reporting_options();
        let root = Promise::pending_with(options);
        let result = root.catch(|_| panic!("nothing to catch")).then(Ok);
        root.resolve("abc");
        assert_eq!(result.await_value().unwrap(), "abc");
    }

    #[test]
    fn test_done_after_then_and_catch() {
        let (options, _) = reporting_options();
        let (tx, rx) = channel();
        let then_tx = tx.clone();
        let root = Promise::with_options(options.clone(), |promise| {
            promise.resolve(1);
            Ok(())
        });
        root.then(move |v| {
            then_tx.send("then").unwrap();
            Ok(v)
        })
        .catch(|_| panic!("nothing to catch"))
        .done(move |outcome| {
            assert_eq!(outcome.unwrap(), 1);
            tx.send("done").unwrap();
        });
        assert_eq!(rx.recv_timeout(Duration::from_secs(1)).unwrap(), "then");
        assert_eq!(rx.recv_timeout(Duration::from_secs(1)).unwrap(), "done");

        let (tx, rx) = channel();
        let catch_tx = tx.clone();
        Promise::<i32>::with_options(options, |promise| {
            promise.reject(Error::msg("Test"));
            Ok(())
        })
        .catch(move |_| {
            catch_tx.send("catch").unwrap();
            Ok(())
        })
        .done(move |outcome| {
            assert!(outcome.is_err());
            tx.send("done").unwrap();
        });
        assert_eq!(rx.recv_timeout(Duration::from_secs(1)).unwrap(), "catch");
        assert_eq!(rx.recv_timeout(Duration::from_secs(1)).unwrap(), "done");
    }
}

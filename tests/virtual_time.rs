//! Virtual time and task scheduling, run through the runner.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use futures::channel::oneshot;
use parking_lot::Mutex;
use testkit_prepared::prelude::*;

fn run(name: &str, config: Config, body: TestBody) -> std::result::Result<(), testkit_prepared::runner::TestFailure> {
    Runner::default().run_test(name, &config, &body)
}

#[test]
fn test_advance_until_idle_runs_nested_tasks() {
    let order = Arc::new(Mutex::new(Vec::new()));
    let body = {
        let order = Arc::clone(&order);
        TestBody::new(move |env| {
            let order = Arc::clone(&order);
            async move {
                let outer = env.clone();
                let log = Arc::clone(&order);
                env.launch(async move {
                    outer.time().delay(Duration::from_millis(1000)).await;
                    log.lock().push(outer.time().now_millis());
                    let inner = outer.clone();
                    let log = Arc::clone(&log);
                    outer.launch(async move {
                        inner.time().delay(Duration::from_millis(3000)).await;
                        log.lock().push(inner.time().now_millis());
                    });
                });
                let other = env.clone();
                let log = Arc::clone(&order);
                env.launch(async move {
                    other.time().delay(Duration::from_millis(2000)).await;
                    log.lock().push(other.time().now_millis());
                });

                env.time().advance_until_idle();
                assert_eq!(env.time().now_millis(), 4000);
                Ok::<_, Error>(())
            }
        })
    };

    run("nested", Config::empty(), body).unwrap();
    assert_eq!(*order.lock(), [1000, 2000, 4000]);
}

#[test]
fn test_run_waits_for_launched_tasks() {
    let finished_at = Arc::new(Mutex::new(None));
    let body = {
        let finished_at = Arc::clone(&finished_at);
        TestBody::new(move |env| {
            let finished_at = Arc::clone(&finished_at);
            async move {
                let time = env.time().clone();
                env.launch(async move {
                    time.delay(Duration::from_secs(30)).await;
                    *finished_at.lock() = Some(time.now());
                });
                Ok::<_, Error>(())
            }
        })
    };

    run("launched", Config::empty(), body).unwrap();
    assert_eq!(*finished_at.lock(), Some(Duration::from_secs(30)));
}

#[test]
fn test_join_handle_returns_the_output() {
    let body = TestBody::new(|env| async move {
        let time = env.time().clone();
        let handle = env.launch(async move {
            time.delay(Duration::from_millis(5)).await;
            21 * 2
        });
        assert_eq!(handle.await?, 42);
        assert_eq!(env.time().now_millis(), 5);
        Ok::<_, Error>(())
    });

    run("join", Config::empty(), body).unwrap();
}

#[test]
fn test_background_tasks_are_cancelled_at_the_end() {
    let ticks = Arc::new(Mutex::new(0_u32));
    let body = {
        let ticks = Arc::clone(&ticks);
        TestBody::new(move |env| {
            let ticks = Arc::clone(&ticks);
            async move {
                let time = env.time().clone();
                let handle = env.launch_in_background(async move {
                    loop {
                        time.delay(Duration::from_secs(1)).await;
                        *ticks.lock() += 1;
                    }
                });
                env.time().delay(Duration::from_millis(3500)).await;
                assert!(!handle.is_finished());
                Ok::<_, Error>(())
            }
        })
    };

    run("background", Config::empty(), body).unwrap();
    assert_eq!(*ticks.lock(), 3);
}

#[test]
fn test_idle_timeout_with_only_background_progress() {
    let body = TestBody::new(|env| async move {
        let time = env.time().clone();
        env.launch_in_background(async move {
            loop {
                time.delay(Duration::from_millis(100)).await;
            }
        });
        futures::future::pending::<()>().await;
        Ok::<_, Error>(())
    });

    let config = Config::of(IdleTimeout(Duration::from_secs(2)));
    let failure = run("stuck", config, body).unwrap_err();
    assert!(matches!(failure.cause, Error::Timeout(timeout) if timeout == Duration::from_secs(2)));
}

#[test]
fn test_idle_timeout_when_nothing_is_scheduled() {
    let body = TestBody::new(|_env| async {
        futures::future::pending::<()>().await;
        Ok::<_, Error>(())
    });

    let config = Config::of(IdleTimeout(Duration::from_millis(50)));
    let failure = run("stalled", config, body).unwrap_err();
    assert!(matches!(failure.cause, Error::Timeout(_)));
}

#[test]
fn test_long_delays_are_not_idle() {
    let body = TestBody::new(|env| async move {
        for _ in 0..10 {
            env.time().delay(Duration::from_secs(60)).await;
        }
        assert_eq!(env.time().now(), Duration::from_secs(600));
        Ok::<_, Error>(())
    });

    let config = Config::of(IdleTimeout(Duration::from_secs(1)));
    run("slow but busy", config, body).unwrap();
}

#[test]
fn test_a_real_thread_can_wake_the_test() {
    let body = TestBody::new(|_env| async {
        let (sender, receiver) = oneshot::channel();
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(10));
            let _ = sender.send("from another thread");
        });
        let message = receiver.await.map_err(|_| Error::Cancelled)?;
        assert_eq!(message, "from another thread");
        Ok::<_, Error>(())
    });

    run("external wake", Config::empty(), body).unwrap();
}

#[test]
fn test_panicking_task_fails_the_test() {
    let body = TestBody::new(|env| async move {
        env.launch_named("worker", async { panic!("worker exploded") });
        env.time().delay(Duration::from_secs(1)).await;
        Ok::<_, Error>(())
    });

    let failure = run("panics", Config::empty(), body).unwrap_err();
    match failure.cause {
        Error::Panicked { task, message } => {
            assert_eq!(task, "worker");
            assert_eq!(message, "worker exploded");
        }
        other => panic!("unexpected failure: {other:?}"),
    }
}

#[test]
fn test_failed_body_cancels_foreground_tasks() {
    let completed = Arc::new(AtomicBool::new(false));
    let body = {
        let completed = Arc::clone(&completed);
        TestBody::new(move |env| {
            let completed = Arc::clone(&completed);
            async move {
                let time = env.time().clone();
                env.launch(async move {
                    time.delay(Duration::from_secs(5)).await;
                    completed.store(true, Ordering::SeqCst);
                });
                Err::<(), _>(Error::assertion("stop"))
            }
        })
    };

    let failure = run("cancel", Config::empty(), body).unwrap_err();
    assert!(matches!(failure.cause, Error::Assertion(_)));
    assert!(!completed.load(Ordering::SeqCst));
}

#[test]
fn test_timeout_and_wall_clock() {
    let body = TestBody::new(|env| async move {
        let time = env.time();
        let elapsed = time
            .timeout(Duration::from_secs(1), time.delay(Duration::from_secs(10)))
            .await;
        assert!(matches!(elapsed, Err(Error::Elapsed(_))));

        let mark = time.source().mark_now();
        time.set(std::time::UNIX_EPOCH + Duration::from_secs(86_400)).await?;
        assert_eq!(mark.elapsed(), Duration::from_secs(86_399));
        assert!(check_err(time.set(std::time::UNIX_EPOCH).await).is_ok());
        Ok::<_, Error>(())
    });

    run("wall clock", Config::empty(), body).unwrap();
}

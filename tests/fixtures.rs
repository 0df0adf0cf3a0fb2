//! Prepared values, shared values and finalizers, run through the runner.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;

use parking_lot::Mutex;
use testkit_prepared::prelude::*;
use testkit_prepared::runner::TestFailure;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("IllegalState: {0}")]
struct IllegalState(String);

fn run(runner: &Runner, name: &str, body: TestBody) -> std::result::Result<(), TestFailure> {
    runner.run_test(name, &Config::empty(), &body)
}

#[test]
fn test_prepared_is_memoized_within_a_run() {
    let computations = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&computations);
    let value = Prepared::new("value", move |env: TestEnvironment| {
        counter.fetch_add(1, Ordering::SeqCst);
        async move { Ok::<_, Error>(env.random().next_u64()) }
    });

    let runner = Runner::default();
    let body = TestBody::new(move |env| {
        let value = value.clone();
        async move {
            let first = env.prepared(&value).await?;
            let second = env.prepared(&value).await?;
            assert_eq!(first, second);
            Ok::<_, Error>(())
        }
    });

    run(&runner, "memoized", body.clone()).unwrap();
    assert_eq!(computations.load(Ordering::SeqCst), 1);

    run(&runner, "memoized again", body).unwrap();
    assert_eq!(computations.load(Ordering::SeqCst), 2);
}

#[test]
fn test_prepared_is_isolated_across_runs() {
    let value = prepared(|env: TestEnvironment| async move { Ok::<_, Error>(env.name().to_string()) })
        .named("test name");

    let seen = Arc::new(Mutex::new(Vec::new()));
    let body = {
        let seen = Arc::clone(&seen);
        TestBody::new(move |env| {
            let value = value.clone();
            let seen = Arc::clone(&seen);
            async move {
                let name = env.prepared(&value).await?;
                seen.lock().push(name);
                Ok::<_, Error>(())
            }
        })
    };

    let runner = Runner::default();
    run(&runner, "first", body.clone()).unwrap();
    run(&runner, "second", body).unwrap();
    assert_eq!(*seen.lock(), ["first", "second"]);
}

#[test]
fn test_prepared_failure_is_replayed() {
    let computations = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&computations);
    let broken = Prepared::new("broken", move |_env: TestEnvironment| {
        counter.fetch_add(1, Ordering::SeqCst);
        async { Err::<u32, _>(IllegalState("foo".into())) }
    });

    let body = TestBody::new(move |env| {
        let broken = broken.clone();
        async move {
            let first = check_err(env.prepared(&broken).await)?;
            let second = check_err(env.prepared(&broken).await)?;

            let (Some(first), Some(second)) = (first.as_fixture_failure(), second.as_fixture_failure())
            else {
                return Err(Error::assertion("expected fixture failures"));
            };
            assert!(Arc::ptr_eq(first, second));
            assert!(first.to_string().contains("broken"));
            assert_eq!(
                check_fails_with::<IllegalState, ()>(Err(Error::Fixture(Arc::clone(first))))?,
                IllegalState("foo".into())
            );
            Ok::<_, Error>(())
        }
    });

    run(&Runner::default(), "replay", body).unwrap();
    assert_eq!(computations.load(Ordering::SeqCst), 1);
}

#[test]
fn test_prepared_resolved_by_racing_tasks_computes_once() {
    let computations = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&computations);
    let slow = Prepared::new("slow", move |env: TestEnvironment| {
        counter.fetch_add(1, Ordering::SeqCst);
        async move {
            env.time().delay(Duration::from_secs(1)).await;
            Ok::<_, Error>(env.random().next_u64())
        }
    });

    let body = TestBody::new(move |env| {
        let slow = slow.clone();
        async move {
            let handles: Vec<_> = (0..2)
                .map(|_| {
                    let task_env = env.clone();
                    let slow = slow.clone();
                    env.launch(async move { task_env.prepared(&slow).await })
                })
                .collect();
            let mut values = Vec::new();
            for handle in handles {
                values.push(handle.await??);
            }
            assert_eq!(values[0], values[1]);
            assert_eq!(env.time().now(), Duration::from_secs(1));
            Ok::<_, Error>(())
        }
    });

    run(&Runner::default(), "racing", body).unwrap();
    assert_eq!(computations.load(Ordering::SeqCst), 1);
}

#[test]
fn test_prepared_values_compose() {
    let base = random_i32_in(0..100).named("base");
    let doubled = base.map("doubled", |value| value * 2);
    let body = TestBody::new(move |env| {
        let base = base.clone();
        let doubled = doubled.clone();
        async move {
            let value = env.prepared(&base).await?;
            assert_eq!(env.prepared(&doubled).await?, value * 2);
            Ok::<_, Error>(())
        }
    });

    run(&Runner::default(), "compose", body).unwrap();
}

#[test]
fn test_shared_is_computed_once_per_registry() {
    let computations = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&computations);
    let config = shared(move || {
        let n = counter.fetch_add(1, Ordering::SeqCst);
        async move { Ok::<_, Error>(format!("config #{n}")) }
    })
    .named("config");

    let body = TestBody::new(move |env| {
        let config = config.clone();
        async move {
            assert_eq!(env.shared(&config).await?, "config #0");
            Ok::<_, Error>(())
        }
    });

    let runner = Runner::new(RunnerConfig::new().registry(SharedRegistry::new()));
    run(&runner, "a", body.clone()).unwrap();
    run(&runner, "b", body.clone()).unwrap();
    assert_eq!(computations.load(Ordering::SeqCst), 1);

    // A fresh registry computes the value again, so it sees the next counter.
    let fresh = Runner::new(RunnerConfig::new().registry(SharedRegistry::new()));
    let failure = run(&fresh, "c", body).unwrap_err();
    assert!(failure.to_string().contains("config #1"));
    assert_eq!(computations.load(Ordering::SeqCst), 2);
}

#[test]
fn test_shared_single_flight_across_threads() {
    const RUNS: usize = 6;

    let computations = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&computations);
    let slow = shared(move || {
        counter.fetch_add(1, Ordering::SeqCst);
        async {
            thread::sleep(Duration::from_millis(20));
            Err::<u8, _>(IllegalState("unavailable".into()))
        }
    })
    .named("slow");

    let runner = Runner::new(RunnerConfig::new().registry(SharedRegistry::new()));
    let barrier = Arc::new(Barrier::new(RUNS));
    let failures: Vec<_> = (0..RUNS)
        .map(|i| {
            let runner = runner.clone();
            let barrier = Arc::clone(&barrier);
            let slow = slow.clone();
            thread::spawn(move || {
                let body = TestBody::new(move |env| {
                    let slow = slow.clone();
                    async move {
                        env.shared(&slow).await?;
                        Ok::<_, Error>(())
                    }
                });
                barrier.wait();
                run(&runner, &format!("run {i}"), body).unwrap_err()
            })
        })
        .collect::<Vec<_>>()
        .into_iter()
        .map(|handle| handle.join().unwrap())
        .collect();

    assert_eq!(computations.load(Ordering::SeqCst), 1);
    let first = failures[0].cause.as_fixture_failure().unwrap();
    for failure in &failures {
        let replayed = failure.cause.as_fixture_failure().unwrap();
        assert!(Arc::ptr_eq(first, replayed));
    }
}

#[test]
fn test_finalizers_run_in_reverse_order() {
    let order = Arc::new(Mutex::new(Vec::new()));
    let body = {
        let order = Arc::clone(&order);
        TestBody::new(move |env| {
            for name in ["A", "B", "C"] {
                let order = Arc::clone(&order);
                env.clean_up(name, move || async move {
                    order.lock().push(name);
                    Ok::<_, Error>(())
                });
            }
            async { Ok::<_, Error>(()) }
        })
    };

    run(&Runner::default(), "order", body).unwrap();
    assert_eq!(*order.lock(), ["C", "B", "A"]);
}

#[test]
fn test_finalizers_are_gated_on_the_outcome() {
    let ran = Arc::new(Mutex::new(Vec::new()));
    let body = |fail: bool| {
        let ran = Arc::clone(&ran);
        TestBody::new(move |env| {
            let on_success = Arc::clone(&ran);
            env.clean_up_when("success only", true, false, move || async move {
                on_success.lock().push("success only");
                Ok::<_, Error>(())
            });
            let on_failure = Arc::clone(&ran);
            env.clean_up_when("failure only", false, true, move || async move {
                on_failure.lock().push("failure only");
                Ok::<_, Error>(())
            });
            async move {
                if fail {
                    Err(Error::assertion("failing on purpose"))
                } else {
                    Ok(())
                }
            }
        })
    };

    let runner = Runner::default();
    run(&runner, "passes", body(false)).unwrap();
    assert_eq!(*ran.lock(), ["success only"]);

    ran.lock().clear();
    let failure = run(&runner, "fails", body(true)).unwrap_err();
    assert!(matches!(failure.cause, Error::Assertion(_)));
    assert_eq!(*ran.lock(), ["failure only"]);
}

#[test]
fn test_finalizer_failure_fails_a_passing_test() {
    let body = TestBody::new(|env| {
        env.clean_up("release", || async { Err::<(), _>(IllegalState("still locked".into())) });
        async { Ok::<_, Error>(()) }
    });

    let failure = run(&Runner::default(), "teardown", body).unwrap_err();
    match &failure.cause {
        Error::Finalizer { name, cause } => {
            assert_eq!(name, "release");
            assert!(cause.to_string().contains("still locked"));
        }
        other => panic!("unexpected failure: {other:?}"),
    }
}

#[test]
fn test_body_failure_wins_over_finalizer_failure() {
    let body = TestBody::new(|env| {
        env.clean_up("release", || async { Err::<(), _>(IllegalState("teardown".into())) });
        async { Err::<(), _>(IllegalState("body".into())) }
    });

    let failure = run(&Runner::default(), "both fail", body).unwrap_err();
    assert_eq!(
        check_fails_with::<IllegalState, ()>(Err(failure.cause)).unwrap(),
        IllegalState("body".into())
    );
}

#[test]
fn test_prepared_value_registers_its_own_cleanup() {
    let events = Arc::new(Mutex::new(Vec::new()));
    let connection = {
        let events = Arc::clone(&events);
        Prepared::new("connection", move |env: TestEnvironment| {
            let events = Arc::clone(&events);
            async move {
                events.lock().push("open".to_string());
                let time = env.time().clone();
                let closing = Arc::clone(&events);
                env.clean_up("close connection", move || async move {
                    time.delay(Duration::from_secs(1)).await;
                    closing.lock().push(format!("closed at {}ms", time.now_millis()));
                    Ok::<_, Error>(())
                });
                Ok::<_, Error>(7)
            }
        })
    };

    let body = TestBody::new(move |env| {
        let connection = connection.clone();
        async move {
            assert_eq!(env.prepared(&connection).await?, 7);
            env.time().delay(Duration::from_secs(2)).await;
            Ok::<_, Error>(())
        }
    });

    run(&Runner::default(), "cleanup with time", body).unwrap();
    assert_eq!(*events.lock(), ["open", "closed at 3000ms"]);
}

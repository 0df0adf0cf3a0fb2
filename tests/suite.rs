//! Running suite trees with focus, ignore and tag filters.

use std::sync::Arc;

use parking_lot::Mutex;
use testkit_prepared::prelude::*;
use testkit_prepared::runner::CaseOutcome;
use testkit_prepared::suite::{SkipReason, SuiteNode};

fn recording(log: &Arc<Mutex<Vec<String>>>) -> TestBody {
    let log = Arc::clone(log);
    TestBody::new(move |env| {
        log.lock().push(env.name().to_string());
        async { Ok::<_, Error>(()) }
    })
}

fn shop(log: &Arc<Mutex<Vec<String>>>) -> SuiteNode {
    SuiteTree::build("shop", Config::of(Tag::new("unit")), |suite| {
        suite.test("empty cart", Config::empty(), recording(log));
        suite.suite("checkout", Config::of(Tag::new("slow")), &mut |suite| {
            suite.test("pays", Config::empty(), recording(log));
            suite.test(
                "refunds",
                Config::empty(),
                TestBody::new(|_env| async { Err::<(), _>(Error::assertion("refund rejected")) }),
            );
        });
        suite.test("legacy", Config::of(Ignored), recording(log));
        suite.test("windows only", only_if(|| false), recording(log));
    })
}

#[test]
fn test_run_suite_reports_every_case() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let report = Runner::default().run_suite(&shop(&log));

    assert_eq!(report.passed(), 2);
    assert_eq!(report.failed(), 1);
    assert_eq!(report.skipped(), 2);
    assert!(!report.is_success());
    assert_eq!(*log.lock(), ["shop • empty cart", "shop • checkout • pays"]);

    match report.outcome("shop • checkout • refunds") {
        Some(CaseOutcome::Failed(failure)) => {
            assert_eq!(failure.test, "shop • checkout • refunds");
            assert!(failure.to_string().contains("refund rejected"));
        }
        other => panic!("unexpected outcome: {other:?}"),
    }
    assert!(matches!(
        report.outcome("shop • legacy"),
        Some(CaseOutcome::Skipped(SkipReason::Ignored))
    ));
}

#[test]
fn test_tag_filters_select_cases() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let runner = Runner::new(RunnerConfig::new().exclude_tag("slow"));
    let report = runner.run_suite(&shop(&log));

    assert_eq!(report.passed(), 1);
    assert_eq!(report.failed(), 0);
    assert!(matches!(
        report.outcome("shop • checkout • pays"),
        Some(CaseOutcome::Skipped(SkipReason::FilteredByTag))
    ));
    assert_eq!(*log.lock(), ["shop • empty cart"]);
}

#[test]
fn test_focused_cases_run_alone() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let tree = SuiteTree::build("root", Config::empty(), |suite| {
        suite.test("a", Config::empty(), recording(&log));
        suite.suite("f:group", Config::empty(), &mut |suite| {
            suite.test("b", Config::empty(), recording(&log));
            suite.test("!c", Config::empty(), recording(&log));
        });
    });

    let report = Runner::default().run_suite(&tree);
    assert_eq!(*log.lock(), ["f:root • f:group • b"]);
    assert!(matches!(
        report.outcome("root • a"),
        Some(CaseOutcome::Skipped(SkipReason::NotFocused))
    ));
    assert!(report.is_success());
}

#[test]
fn test_suite_config_reaches_the_test() {
    let tree = SuiteTree::build("seeded", Config::of(RandomSeed(5)), |suite| {
        suite.test(
            "uses the suite seed",
            Config::of(Tag::new("leaf")),
            TestBody::new(|env| async move {
                assert_eq!(env.random().seed().map(|info| info.seed), Some(5));
                assert_eq!(env.config().get_all::<Tag>().len(), 1);
                Ok::<_, Error>(())
            }),
        );
    });

    let report = Runner::default().run_suite(&tree);
    assert_eq!(report.passed(), 1);
}

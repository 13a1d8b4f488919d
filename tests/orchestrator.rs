//! Suite orchestration: per-scenario isolation, fail-fast steps, sibling
//! independence, skips, and exit codes.

mod support;

use browser_harness::{
    Command, Predicate, ResponseSpec, Status, Suite, Target, utc_midnight_ms,
};
use serde_json::json;
use support::{PAGE_URL, TODO_URL, page_html, todo_transport, wire_playground};

fn playground_suite(name: &str) -> Suite {
    support::init_tracing();
    let mut suite = Suite::new(name);
    suite.before_each(|session| {
        session.set_transport(todo_transport);
        session.freeze_clock(utc_midnight_ms(2019, 11, 9));
        Ok(())
    });
    suite.page(PAGE_URL, page_html(), wire_playground);
    suite
}

#[test]
fn passing_scenarios_report_a_clean_run() {
    let mut suite = playground_suite("smoke");
    suite.scenario("heading is visible", |session| {
        session.expect(
            &Target::containing("h1", "Interaction Playground"),
            &Predicate::Visible,
        )
    });
    suite.scenario("date is pinned", |session| {
        session.expect(
            &Target::new("#date-display"),
            &Predicate::TextEquals("Current date: 2019-11-09".into()),
        )
    });

    let report = suite.run();
    assert_eq!(report.passed(), 2);
    assert_eq!(report.failed(), 0);
    assert_eq!(report.exit_code(), 0);
    assert_eq!(report.summary(), "2 passed, 0 failed, 0 skipped");

    let json = report.to_json().expect("report serializes");
    assert!(json.contains("\"Passed\""), "{json}");
}

#[test]
fn scenarios_are_isolated_from_each_other() {
    let mut suite = playground_suite("isolation");
    suite.scenario("mutates the page", |session| {
        session.perform(Command::Click(Target::new("#subscribe-button")))?;
        session.expect(&Target::new("#subscribe-message"), &Predicate::Visible)
    });
    suite.scenario("sees a pristine page", |session| {
        session.expect(&Target::new("#subscribe-message"), &Predicate::NotVisible)
    });
    suite.scenario("intercepts do not leak either", |session| {
        session.intercept(
            "GET",
            TODO_URL,
            ResponseSpec::Stub {
                status: 200,
                body: json!({"id": 1, "title": "leaky?", "completed": false, "userId": 1}),
            },
            Some("leak"),
        )
    });
    suite.scenario("fresh interceptor has no rules or log", |session| {
        assert!(session.interceptor().requests().is_empty());
        // Re-registering the alias works because nothing leaked over.
        session.intercept("GET", TODO_URL, ResponseSpec::Passthrough, Some("leak"))
    });

    let report = suite.run();
    assert_eq!(report.passed(), 4, "{:?}", report.results);
}

#[test]
fn failure_names_the_step_and_spares_the_siblings() {
    let mut suite = playground_suite("fail-fast");
    suite.scenario("clicks a missing control", |session| {
        session.set_poll_options(browser_harness::PollOptions::new(100, 50));
        session.perform(Command::Click(Target::new("#missing-button")))?;
        session.perform(Command::Click(Target::new("#subscribe-button")))
    });
    suite.scenario("still runs", |session| {
        session.expect(
            &Target::containing("h1", "Interaction Playground"),
            &Predicate::Visible,
        )
    });

    let report = suite.run();
    assert_eq!(report.failed(), 1);
    assert_eq!(report.passed(), 1);
    assert_eq!(report.exit_code(), 1);

    let failed = report
        .results
        .iter()
        .find(|result| matches!(result.status, Status::Failed(_)))
        .expect("one failure");
    match &failed.status {
        Status::Failed(message) => {
            assert!(message.contains("#missing-button"), "{message}");
            assert!(message.contains("click"), "{message}");
        }
        _ => unreachable!(),
    }
}

#[test]
fn assertion_timeout_carries_the_last_observed_state() {
    let mut suite = playground_suite("diagnostics");
    suite.scenario("expects the wrong text", |session| {
        session.set_poll_options(browser_harness::PollOptions::new(100, 50));
        session.expect(
            &Target::new("#date-display"),
            &Predicate::TextEquals("Current date: 2024-01-01".into()),
        )
    });

    let report = suite.run();
    match &report.results[0].status {
        Status::Failed(message) => {
            assert!(message.contains("2019-11-09"), "{message}");
            assert!(message.contains("2024-01-01"), "{message}");
        }
        other => panic!("expected failure, got {other:?}"),
    }
}

#[test]
fn skipped_scenarios_never_run_and_do_not_fail_the_suite() {
    let mut suite = playground_suite("skips");
    suite.skip("flaky upstream behavior");
    suite.scenario("runs normally", |_session| Ok(()));

    let report = suite.run();
    assert_eq!(report.skipped(), 1);
    assert_eq!(report.passed(), 1);
    assert_eq!(report.exit_code(), 0);
    assert_eq!(report.results[0].status, Status::Skipped);
}

#[test]
fn setup_failure_counts_against_the_scenario() {
    support::init_tracing();
    let mut suite = Suite::new("broken setup");
    suite.before_each(|session| session.navigate("https://unregistered.test/"));
    suite.scenario("never reaches its body", |_session| {
        panic!("body must not run when setup fails")
    });

    let report = suite.run();
    assert_eq!(report.failed(), 1);
    match &report.results[0].status {
        Status::Failed(message) => {
            assert!(message.contains("unregistered.test"), "{message}");
        }
        other => panic!("expected failure, got {other:?}"),
    }
}

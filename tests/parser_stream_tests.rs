//! Integration tests for the streaming event parser.

use std::io::Cursor;
use std::time::Duration;

use vigil::{ParserConfig, StreamParser, TestRun, TestStatus};

fn parse(lines: &[&str]) -> TestRun {
    let mut parser = StreamParser::new(ParserConfig::default());
    for line in lines {
        parser.feed_line_lossy(line);
    }
    parser.finish()
}

/// The documented pass/fail/subtest scenario: one top-level test with one
/// failed subtest grafted under it.
#[test]
fn test_subtest_scenario() {
    let run = parse(&[
        r#"{"t":"2024-01-20T10:00:00Z","action":"run","package":"ex/pkg","test":"TestA"}"#,
        r#"{"t":"2024-01-20T10:00:00.1Z","action":"pass","package":"ex/pkg","test":"TestA","elapsed":0.1}"#,
        r#"{"t":"2024-01-20T10:00:00.2Z","action":"run","package":"ex/pkg","test":"TestA/sub"}"#,
        r#"{"t":"2024-01-20T10:00:00.3Z","action":"fail","package":"ex/pkg","test":"TestA/sub","elapsed":0.1}"#,
    ]);

    let suite = run.find_suite("ex/pkg").expect("suite exists");
    assert_eq!(suite.num_total, 2);
    assert_eq!(suite.num_passed, 1);
    assert_eq!(suite.num_failed, 1);
    assert_eq!(suite.tests.len(), 1);

    let parent = &suite.tests[0];
    assert_eq!(parent.name, "TestA");
    assert_eq!(parent.status, TestStatus::Passed);
    assert_eq!(parent.subtests.len(), 1);
    assert_eq!(parent.subtests[0].name, "TestA/sub");
    assert_eq!(parent.subtests[0].status, TestStatus::Failed);
}

/// Counters hold at suite and run level across several packages.
#[test]
fn test_multi_package_counters() {
    let run = parse(&[
        r#"{"t":"2024-01-20T10:00:00Z","action":"start","package":"ex/a"}"#,
        r#"{"t":"2024-01-20T10:00:00Z","action":"run","package":"ex/a","test":"TestOne"}"#,
        r#"{"t":"2024-01-20T10:00:00.1Z","action":"pass","package":"ex/a","test":"TestOne","elapsed":0.1}"#,
        r#"{"t":"2024-01-20T10:00:00.2Z","action":"run","package":"ex/b","test":"TestTwo"}"#,
        r#"{"t":"2024-01-20T10:00:00.3Z","action":"skip","package":"ex/b","test":"TestTwo","elapsed":0}"#,
        r#"{"t":"2024-01-20T10:00:00.4Z","action":"run","package":"ex/b","test":"TestThree"}"#,
        r#"{"t":"2024-01-20T10:00:00.5Z","action":"fail","package":"ex/b","test":"TestThree","elapsed":0.2}"#,
        r#"{"t":"2024-01-20T10:00:00.6Z","action":"pass","package":"ex/a","elapsed":0.6}"#,
        r#"{"t":"2024-01-20T10:00:00.7Z","action":"fail","package":"ex/b","elapsed":0.7}"#,
    ]);

    assert_eq!(run.suites.len(), 2);
    for suite in &run.suites {
        assert_eq!(
            suite.num_total,
            suite.num_passed + suite.num_failed + suite.num_skipped,
            "suite {} counters inconsistent",
            suite.package_name
        );
    }
    assert_eq!(run.num_total(), 3);
    assert_eq!(
        run.num_total(),
        run.num_passed() + run.num_failed() + run.num_skipped()
    );
    assert!(run.has_failures());
    assert!(run.start_time.is_some());
    assert!(run.end_time.is_some());
}

/// An assertion failure line yields location, expectation, and kind.
#[test]
fn test_error_detail_extraction() {
    let run = parse(&[
        r#"{"t":"2024-01-20T10:00:00Z","action":"run","package":"ex/pkg","test":"TestMath"}"#,
        r#"{"t":"2024-01-20T10:00:00.1Z","action":"output","package":"ex/pkg","test":"TestMath","output":"    foo_test.go:42:12: Expected 5, got 3\n"}"#,
        r#"{"t":"2024-01-20T10:00:00.2Z","action":"fail","package":"ex/pkg","test":"TestMath","elapsed":0.1}"#,
    ]);

    let test = run
        .find_suite("ex/pkg")
        .and_then(|s| s.find_test("TestMath"))
        .expect("test exists");
    let error = test.error.as_ref().expect("error attached");
    assert!(error.message.contains("Expected 5, got 3"));

    let location = error.location.as_ref().expect("location extracted");
    assert_eq!(location.file, "foo_test.go");
    assert_eq!(location.line, 42);
    assert_eq!(location.column, Some(12));
    assert_eq!(error.expected.as_deref(), Some("5"));
    assert_eq!(error.actual.as_deref(), Some("3"));
}

/// Build failure markers set the suite flag and accumulate the message.
#[test]
fn test_build_failure_detection() {
    let run = parse(&[
        r##"{"t":"2024-01-20T10:00:00Z","action":"output","package":"ex/broken","output":"# ex/broken\n"}"##,
        r#"{"t":"2024-01-20T10:00:00.1Z","action":"output","package":"ex/broken","output":"broken.go:7:2: undefined: Frobnicate\n"}"#,
        r#"{"t":"2024-01-20T10:00:00.2Z","action":"fail","package":"ex/broken","elapsed":0.2}"#,
    ]);

    let suite = run.find_suite("ex/broken").unwrap();
    assert!(suite.build_failed);
    assert!(suite.build_error.contains("# ex/broken"));
    assert!(suite.build_error.contains("undefined: Frobnicate"));
}

/// Malformed lines interleaved with good ones decode to the same test set
/// as the clean stream, with the skip counter advanced.
#[test]
fn test_malformed_lines_equivalence() {
    let clean = vec![
        r#"{"t":"2024-01-20T10:00:00Z","action":"run","package":"p","test":"TestA"}"#,
        r#"{"t":"2024-01-20T10:00:00.1Z","action":"pass","package":"p","test":"TestA","elapsed":0.1}"#,
    ];
    let mut dirty = vec!["{{{", "", "null"];
    dirty.splice(1..1, clean.iter().copied());

    let clean_run = parse(&clean);
    let dirty_run = parse(&dirty);

    let clean_suite = clean_run.find_suite("p").unwrap();
    let dirty_suite = dirty_run.find_suite("p").unwrap();
    assert_eq!(clean_suite.num_total, dirty_suite.num_total);
    assert_eq!(clean_suite.tests.len(), dirty_suite.tests.len());
    // "null" decodes to nothing useful and "{{{" is invalid; the empty
    // line is ignored without counting.
    assert_eq!(dirty_run.parse_errors, 2);
}

/// Whole-run serialization round-trips structurally.
#[test]
fn test_run_round_trip() {
    let run = parse(&[
        r#"{"t":"2024-01-20T10:00:00Z","action":"run","package":"ex/pkg","test":"TestA"}"#,
        r#"{"t":"2024-01-20T10:00:00.05Z","action":"output","package":"ex/pkg","test":"TestA","output":"    panic: boom\n"}"#,
        r#"{"t":"2024-01-20T10:00:00.1Z","action":"fail","package":"ex/pkg","test":"TestA","elapsed":0.1}"#,
        r#"{"t":"2024-01-20T10:00:00.2Z","action":"fail","package":"ex/pkg","elapsed":0.2}"#,
    ]);

    let json = serde_json::to_string(&run).unwrap();
    let back: TestRun = serde_json::from_str(&json).unwrap();
    assert_eq!(run, back);

    let test = back.find_suite("ex/pkg").unwrap().find_test("TestA").unwrap();
    assert_eq!(test.duration, Duration::from_millis(100));
    assert!(test.error.is_some());
}

/// Strict parsing fails on the first malformed line.
#[test]
fn test_strict_mode_rejects() {
    let stream = "{\"t\":\"2024-01-20T10:00:00Z\",\"action\":\"run\",\"package\":\"p\",\"test\":\"T\"}\nnot-json\n";
    let parser = StreamParser::new(ParserConfig::default());
    assert!(parser.parse(Cursor::new(stream)).is_err());
}

/// Streaming callback fires exactly once per completed suite, in stream
/// order.
#[test]
fn test_suite_completion_order() {
    let stream = [
        r#"{"t":"2024-01-20T10:00:00Z","action":"run","package":"ex/a","test":"T1"}"#,
        r#"{"t":"2024-01-20T10:00:00.1Z","action":"pass","package":"ex/a","test":"T1","elapsed":0.1}"#,
        r#"{"t":"2024-01-20T10:00:00.2Z","action":"pass","package":"ex/a","elapsed":0.2}"#,
        r#"{"t":"2024-01-20T10:00:00.3Z","action":"run","package":"ex/b","test":"T2"}"#,
        r#"{"t":"2024-01-20T10:00:00.4Z","action":"pass","package":"ex/b","test":"T2","elapsed":0.1}"#,
        r#"{"t":"2024-01-20T10:00:00.5Z","action":"pass","package":"ex/b","elapsed":0.3}"#,
    ]
    .join("\n");

    let mut parser = StreamParser::new(ParserConfig::default());
    let mut order = Vec::new();
    parser
        .parse_streaming(Cursor::new(stream), |suite| {
            order.push(suite.package_name.clone())
        })
        .unwrap();
    assert_eq!(order, vec!["ex/a".to_string(), "ex/b".to_string()]);
}

// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

#[test]
fn render_mentions_playground_and_program() {
    let body = render("/tmp/play", "make -j4 all");
    assert!(body.starts_with("#!/usr/bin/env bash\n"));
    assert!(body.contains("/tmp/play/monitor.log"));
    assert!(body.contains("make -j4 all"));
    assert!(body.contains("success"));
    assert!(body.contains("failure"));
}

#[test]
fn parse_full_successful_log() {
    let log = "start 100\nbefore main\nafter main\nsuccess 160\n";
    let records = parse_log(log);
    assert_eq!(
        records,
        vec![
            MonitorRecord::Start { at: 100 },
            MonitorRecord::Before {
                label: "main".into()
            },
            MonitorRecord::After {
                label: "main".into()
            },
            MonitorRecord::Success { at: 160 },
        ]
    );
    assert_eq!(outcome(&records), LogOutcome::Succeeded);
}

#[test]
fn parse_failure_log() {
    let log = "start 100\nbefore main\nafter main\nfailure 160 main 2\n";
    let records = parse_log(log);
    assert_eq!(
        outcome(&records),
        LogOutcome::Failed {
            label: "main".into(),
            exit: 2
        }
    );
}

#[yare::parameterized(
    empty          = { "" },
    start_only     = { "start 100\n" },
    mid_run        = { "start 100\nbefore main\n" },
)]
fn incomplete_logs_are_inconclusive(log: &str) {
    assert_eq!(outcome(&parse_log(log)), LogOutcome::Inconclusive);
}

#[test]
fn malformed_lines_are_skipped() {
    let log = "start 100\ngarbage here\nfailure nonsense\nsuccess 200\n";
    let records = parse_log(log);
    assert_eq!(
        records,
        vec![
            MonitorRecord::Start { at: 100 },
            MonitorRecord::Success { at: 200 },
        ]
    );
}

#[test]
fn last_record_wins() {
    // A retried wrapper can append after an earlier failure.
    let log = "start 1\nfailure 2 main 1\nstart 3\nsuccess 4\n";
    assert_eq!(outcome(&parse_log(log)), LogOutcome::Succeeded);
}

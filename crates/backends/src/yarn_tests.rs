// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

#[test]
fn application_id_is_found_in_client_chatter() {
    let out = "\
24/06/01 12:00:01 INFO impl.YarnClientImpl: Submitted application application_1717240000000_0042
24/06/01 12:00:02 INFO distributedshell.Client: Application has started
";
    assert_eq!(
        parse_application_id(out).as_deref(),
        Some("application_1717240000000_0042")
    );
}

#[yare::parameterized(
    empty   = { "" },
    noise   = { "INFO Client: waiting for application" },
    partial = { "application_ is not an id" },
)]
fn no_application_id_in_garbage(out: &str) {
    assert_eq!(parse_application_id(out), None);
}

#[test]
fn application_id_survives_punctuation() {
    let out = "tracking url: http://rm/proxy/application_12_3/ (application_12_3)";
    assert_eq!(parse_application_id(out).as_deref(), Some("application_12_3"));
}

#[test]
fn report_fields_are_extracted() {
    let report = "\
Application Report :
\tApplication-Id : application_12_3
\tState : FINISHED
\tFinal-State : SUCCEEDED
";
    assert_eq!(report_field(report, "State"), Some("FINISHED"));
    assert_eq!(report_field(report, "Final-State"), Some("SUCCEEDED"));
    assert_eq!(report_field(report, "Progress"), None);
}

#[test]
fn create_requires_jar() {
    let backend = YarnBackend::new();
    let err = backend
        .create(serde_json::json!({ "command": "true" }))
        .unwrap_err();
    assert!(matches!(err, BackendError::Fatal(_)));

    let rp = backend
        .create(serde_json::json!({
            "command": "true",
            "distributed_shell_jar": "/opt/hadoop/ds.jar",
        }))
        .unwrap();
    assert_eq!(rp.payload["distributed_shell_jar"], "/opt/hadoop/ds.jar");
}

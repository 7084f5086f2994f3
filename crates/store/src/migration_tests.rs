// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use serde_json::json;

struct AddField;

impl Migration for AddField {
    fn source_version(&self) -> u32 {
        1
    }
    fn target_version(&self) -> u32 {
        2
    }
    fn migrate(&self, payload: &mut Value) -> Result<(), MigrationError> {
        if let Some(obj) = payload.as_object_mut() {
            obj.insert("added".into(), json!(true));
        }
        Ok(())
    }
}

struct RenameField;

impl Migration for RenameField {
    fn source_version(&self) -> u32 {
        2
    }
    fn target_version(&self) -> u32 {
        3
    }
    fn migrate(&self, payload: &mut Value) -> Result<(), MigrationError> {
        let obj = payload.as_object_mut().ok_or(MigrationError::Failed {
            from: 2,
            to: 3,
            reason: "payload is not an object".into(),
        })?;
        if let Some(value) = obj.remove("added") {
            obj.insert("renamed".into(), value);
        }
        Ok(())
    }
}

#[test]
fn same_version_is_a_no_op() {
    let registry = MigrationRegistry::new();
    let (payload, changed) = registry.migrate_to(json!({"a": 1}), 1, 1).unwrap();
    assert_eq!(payload, json!({"a": 1}));
    assert!(!changed);
}

#[test]
fn chain_applies_in_order() {
    let registry = MigrationRegistry::with(vec![Box::new(AddField), Box::new(RenameField)]);
    let (payload, changed) = registry.migrate_to(json!({}), 1, 3).unwrap();
    assert!(changed);
    assert_eq!(payload, json!({"renamed": true}));
}

#[test]
fn missing_step_is_no_path() {
    let registry = MigrationRegistry::with(vec![Box::new(RenameField)]);
    let err = registry.migrate_to(json!({}), 1, 3).unwrap_err();
    assert!(matches!(err, MigrationError::NoPath(1, 3)));
}

#[test]
fn newer_than_supported_is_too_new() {
    let registry = MigrationRegistry::new();
    let err = registry.migrate_to(json!({}), 5, 3).unwrap_err();
    assert!(matches!(err, MigrationError::TooNew(5, 3)));
}

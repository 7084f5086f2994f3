// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

fn volume(path: &str) -> Condition {
    Condition::VolumeExists { path: path.into() }
}

#[test]
fn constants_are_constant() {
    assert!(Condition::True.is_constant());
    assert!(Condition::False.is_constant());
    assert!(Condition::Not {
        of: Box::new(Condition::True)
    }
    .is_constant());
}

#[test]
fn host_predicates_are_not_constant() {
    assert!(!volume("/tmp/x").is_constant());
    assert!(!Condition::CommandReturns {
        command: "true".into(),
        exit: 0
    }
    .is_constant());
    assert!(!Condition::And {
        of: vec![Condition::True, volume("/tmp/x")]
    }
    .is_constant());
}

#[test]
fn display_is_readable() {
    let cond = Condition::And {
        of: vec![
            volume("/data/out"),
            Condition::Not {
                of: Box::new(Condition::False),
            },
        ],
    };
    assert_eq!(cond.to_string(), "(volume-exists /data/out and not false)");
}

#[test]
fn condition_round_trips_through_json() {
    let cond = Condition::Or {
        of: vec![
            volume("/a"),
            Condition::CommandReturns {
                command: "test -d /b".into(),
                exit: 0,
            },
        ],
    };
    let json = serde_json::to_string(&cond).unwrap();
    let back: Condition = serde_json::from_str(&json).unwrap();
    assert_eq!(cond, back);
}

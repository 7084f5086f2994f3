// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Localhost capability implementation over `tokio::process` and
//! `tokio::fs`.

use crate::{HostError, RunOutput};
use std::path::Path;
use tokio::process::Command;

fn to_output(output: std::process::Output) -> RunOutput {
    RunOutput {
        exit: output.status.code().unwrap_or(-1),
        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
    }
}

pub(crate) async fn run_command(command: &str) -> Result<RunOutput, HostError> {
    let output = Command::new("sh")
        .arg("-c")
        .arg(command)
        .output()
        .await
        .map_err(|e| HostError::Unreachable {
            message: format!("failed to spawn shell: {}", e),
        })?;
    Ok(to_output(output))
}

pub(crate) async fn execute(argv: &[String]) -> Result<RunOutput, HostError> {
    let Some((program, args)) = argv.split_first() else {
        return Err(HostError::Invalid {
            message: "empty argv".to_string(),
        });
    };
    let output = Command::new(program)
        .args(args)
        .output()
        .await
        .map_err(|e| HostError::Unreachable {
            message: format!("failed to spawn {}: {}", program, e),
        })?;
    Ok(to_output(output))
}

pub(crate) async fn ensure_directory(path: &str) -> Result<(), HostError> {
    tokio::fs::create_dir_all(path)
        .await
        .map_err(|e| HostError::Filesystem {
            path: path.to_string(),
            message: e.to_string(),
        })
}

pub(crate) async fn put_file(path: &str, content: &[u8]) -> Result<(), HostError> {
    // Write-then-rename in the destination directory so the replace is
    // atomic on the same filesystem.
    let tmp = format!("{}.tmp-{}", path, uuid::Uuid::new_v4().simple());
    tokio::fs::write(&tmp, content)
        .await
        .map_err(|e| HostError::Filesystem {
            path: path.to_string(),
            message: e.to_string(),
        })?;
    if let Err(e) = tokio::fs::rename(&tmp, path).await {
        let _ = tokio::fs::remove_file(&tmp).await;
        return Err(HostError::Filesystem {
            path: path.to_string(),
            message: e.to_string(),
        });
    }
    Ok(())
}

pub(crate) async fn get_file(path: &str) -> Result<Vec<u8>, HostError> {
    match tokio::fs::read(Path::new(path)).await {
        Ok(bytes) => Ok(bytes),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(HostError::MissingFile {
            path: path.to_string(),
        }),
        Err(e) => Err(HostError::Filesystem {
            path: path.to_string(),
            message: e.to_string(),
        }),
    }
}

// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! SSH capability implementation.
//!
//! Commands are shipped through the `ssh` client; exit 255 is the
//! client's own transport-failure code and maps to `Unreachable`.
//! A configured login node becomes a `-J` (ProxyJump) hop, which
//! covers the "ssh via cluster login node" case.

use crate::{shell_quote, HostError, RunOutput};
use gantry_core::SshSpec;
use std::process::Stdio;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

/// ssh reserves exit 255 for its own failures.
const SSH_TRANSPORT_EXIT: i32 = 255;

fn base_args(spec: &SshSpec) -> Vec<String> {
    let mut args = vec!["-o".to_string(), "BatchMode=yes".to_string()];
    if let Some(port) = spec.port {
        args.push("-p".to_string());
        args.push(port.to_string());
    }
    if let Some(ref jump) = spec.login_node {
        args.push("-J".to_string());
        args.push(jump.clone());
    }
    args.extend(spec.options.iter().cloned());
    args.push(spec.destination());
    args
}

async fn run_ssh(
    spec: &SshSpec,
    remote_command: &str,
    stdin: Option<&[u8]>,
) -> Result<std::process::Output, HostError> {
    let mut args = base_args(spec);
    args.push(remote_command.to_string());

    let mut command = Command::new("ssh");
    command.args(&args);
    command.stdout(Stdio::piped()).stderr(Stdio::piped());
    command.stdin(if stdin.is_some() {
        Stdio::piped()
    } else {
        Stdio::null()
    });

    let mut child = command.spawn().map_err(|e| HostError::Unreachable {
        message: format!("failed to spawn ssh: {}", e),
    })?;

    if let Some(bytes) = stdin {
        if let Some(mut handle) = child.stdin.take() {
            handle
                .write_all(bytes)
                .await
                .map_err(|e| HostError::Unreachable {
                    message: format!("ssh stdin write failed: {}", e),
                })?;
            drop(handle);
        }
    }

    let output = child
        .wait_with_output()
        .await
        .map_err(|e| HostError::Unreachable {
            message: format!("ssh wait failed: {}", e),
        })?;

    if output.status.code() == Some(SSH_TRANSPORT_EXIT) {
        return Err(HostError::Unreachable {
            message: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }

    Ok(output)
}

pub(crate) async fn run_command(spec: &SshSpec, command: &str) -> Result<RunOutput, HostError> {
    let output = run_ssh(spec, command, None).await?;
    Ok(RunOutput {
        exit: output.status.code().unwrap_or(-1),
        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
    })
}

pub(crate) async fn execute(spec: &SshSpec, argv: &[String]) -> Result<RunOutput, HostError> {
    if argv.is_empty() {
        return Err(HostError::Invalid {
            message: "empty argv".to_string(),
        });
    }
    let quoted = argv
        .iter()
        .map(|a| shell_quote(a))
        .collect::<Vec<_>>()
        .join(" ");
    run_command(spec, &quoted).await
}

pub(crate) async fn ensure_directory(spec: &SshSpec, path: &str) -> Result<(), HostError> {
    let output = run_ssh(spec, &format!("mkdir -p {}", shell_quote(path)), None).await?;
    if !output.status.success() {
        return Err(HostError::Filesystem {
            path: path.to_string(),
            message: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }
    Ok(())
}

pub(crate) async fn put_file(spec: &SshSpec, path: &str, content: &[u8]) -> Result<(), HostError> {
    // Stream to a temp file and rename, so partial transfers never
    // replace the destination.
    let quoted = shell_quote(path);
    let remote = format!("cat > {q}.tmp && mv {q}.tmp {q}", q = quoted);
    let output = run_ssh(spec, &remote, Some(content)).await?;
    if !output.status.success() {
        return Err(HostError::Filesystem {
            path: path.to_string(),
            message: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }
    Ok(())
}

pub(crate) async fn get_file(spec: &SshSpec, path: &str) -> Result<Vec<u8>, HostError> {
    let output = run_ssh(spec, &format!("cat {}", shell_quote(path)), None).await?;
    if !output.status.success() {
        return Err(HostError::MissingFile {
            path: path.to_string(),
        });
    }
    Ok(output.stdout)
}

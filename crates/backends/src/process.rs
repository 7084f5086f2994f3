// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Generic process backend: daemonize the monitored script on the host
//! and poll its process group.

use crate::script::{self, LogOutcome, LOG_FILE, SCRIPT_FILE, STDERR_FILE, STDOUT_FILE};
use crate::{Backend, BackendError, QueryError, StartOutcome, Update};
use async_trait::async_trait;
use gantry_core::RunParameters;
use gantry_host::{shell_quote, Host};
use serde::{Deserialize, Serialize};

const RP_VERSION: u32 = 1;
const DEFAULT_PLAYGROUND_ROOT: &str = "/tmp";

/// User-facing configuration accepted by `create`.
#[derive(Debug, Deserialize)]
struct ProcessConfig {
    command: String,
    #[serde(default)]
    playground_root: Option<String>,
}

/// Backend-private run parameters.
#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "phase", rename_all = "snake_case")]
enum ProcessRp {
    Created {
        command: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        playground_root: Option<String>,
    },
    Running {
        command: String,
        playground: String,
        pid: i32,
    },
}

impl ProcessRp {
    fn decode(rp: &RunParameters) -> Result<Self, BackendError> {
        if rp.version != RP_VERSION {
            return Err(BackendError::Fatal(format!(
                "process run-parameters version {} unsupported",
                rp.version
            )));
        }
        serde_json::from_value(rp.payload.clone())
            .map_err(|e| BackendError::Fatal(format!("corrupt process run-parameters: {}", e)))
    }

    fn encode(&self) -> RunParameters {
        // Serialization of these enums cannot fail.
        let payload = serde_json::to_value(self).unwrap_or(serde_json::Value::Null);
        RunParameters::new(RP_VERSION, payload)
    }
}

/// Runs jobs as daemonized local (or ssh-reachable) processes.
#[derive(Debug, Default)]
pub struct ProcessBackend;

impl ProcessBackend {
    pub fn new() -> Self {
        Self
    }

    fn running_parts(rp: &RunParameters) -> Result<(String, i32), BackendError> {
        match ProcessRp::decode(rp)? {
            ProcessRp::Running {
                playground, pid, ..
            } => Ok((playground, pid)),
            ProcessRp::Created { .. } => Err(BackendError::Fatal(
                "process job was never started".to_string(),
            )),
        }
    }
}

#[async_trait]
impl Backend for ProcessBackend {
    fn name(&self) -> &'static str {
        "process"
    }

    fn create(&self, config: serde_json::Value) -> Result<RunParameters, BackendError> {
        let config: ProcessConfig = serde_json::from_value(config)
            .map_err(|e| BackendError::Fatal(format!("invalid process config: {}", e)))?;
        Ok(ProcessRp::Created {
            command: config.command,
            playground_root: config.playground_root,
        }
        .encode())
    }

    async fn start(&self, rp: &RunParameters, host: &Host) -> StartOutcome {
        let (command, root) = match ProcessRp::decode(rp) {
            Ok(ProcessRp::Created {
                command,
                playground_root,
            }) => (
                command,
                playground_root.unwrap_or_else(|| DEFAULT_PLAYGROUND_ROOT.to_string()),
            ),
            // Restarted after a crash mid-submission: resubmit fresh.
            Ok(ProcessRp::Running { command, .. }) => {
                (command, DEFAULT_PLAYGROUND_ROOT.to_string())
            }
            Err(e) => return StartOutcome::Fatal(e.to_string()),
        };

        let playground = format!("{}/gantry-run-{}", root, uuid::Uuid::new_v4().simple());
        if let Err(e) = host.ensure_directory(&playground).await {
            return if e.is_recoverable() {
                StartOutcome::Recoverable(e.to_string())
            } else {
                StartOutcome::Fatal(e.to_string())
            };
        }

        let script_path = format!("{}/{}", playground, SCRIPT_FILE);
        let body = script::render(&playground, &command);
        if let Err(e) = host.put_file(&script_path, body.as_bytes()).await {
            return if e.is_recoverable() {
                StartOutcome::Recoverable(e.to_string())
            } else {
                StartOutcome::Fatal(e.to_string())
            };
        }

        let submit = format!(
            "nohup setsid bash {script} > {out} 2> {err} < /dev/null & echo $!",
            script = shell_quote(&script_path),
            out = shell_quote(&format!("{}/{}", playground, STDOUT_FILE)),
            err = shell_quote(&format!("{}/{}", playground, STDERR_FILE)),
        );
        let output = match host.run_command(&submit).await {
            Ok(output) => output,
            Err(e) => {
                return if e.is_recoverable() {
                    StartOutcome::Recoverable(e.to_string())
                } else {
                    StartOutcome::Fatal(e.to_string())
                }
            }
        };
        if !output.success() {
            return StartOutcome::Recoverable(format!(
                "submission shell exited {}: {}",
                output.exit,
                output.stderr.trim()
            ));
        }
        let pid: i32 = match output.stdout.trim().parse() {
            Ok(pid) => pid,
            // Exit 0 but no pid on stdout: the host shell is lying to us.
            Err(_) => {
                return StartOutcome::Fatal(format!(
                    "submission printed no pid: {:?}",
                    output.stdout.trim()
                ))
            }
        };

        tracing::info!(pid, playground = %playground, "process job started");
        StartOutcome::Started(
            ProcessRp::Running {
                command,
                playground,
                pid,
            }
            .encode(),
        )
    }

    async fn update(&self, rp: &RunParameters, host: &Host) -> Result<Update, BackendError> {
        let (playground, pid) = Self::running_parts(rp)?;
        let log_path = format!("{}/{}", playground, LOG_FILE);

        let read_outcome = |host: &Host, path: String| {
            let host = host.clone();
            async move {
                match host.get_file(&path).await {
                    Ok(bytes) => {
                        script::outcome(&script::parse_log(&String::from_utf8_lossy(&bytes)))
                    }
                    Err(_) => LogOutcome::Inconclusive,
                }
            }
        };

        match read_outcome(host, log_path.clone()).await {
            LogOutcome::Succeeded => return Ok(Update::Succeeded(rp.clone())),
            LogOutcome::Failed { label, exit } => {
                return Ok(Update::Failed(
                    rp.clone(),
                    format!("{} exited {}", label, exit),
                ))
            }
            LogOutcome::Inconclusive => {}
        }

        let probe = host
            .run_command(&format!("kill -0 {} 2> /dev/null", pid))
            .await?;
        if probe.success() {
            return Ok(Update::StillRunning(rp.clone()));
        }

        // Process is gone; re-read the log once in case it finished
        // between the first read and the probe.
        match read_outcome(host, log_path).await {
            LogOutcome::Succeeded => Ok(Update::Succeeded(rp.clone())),
            LogOutcome::Failed { label, exit } => Ok(Update::Failed(
                rp.clone(),
                format!("{} exited {}", label, exit),
            )),
            LogOutcome::Inconclusive => Ok(Update::Failed(
                rp.clone(),
                format!("process {} exited without a monitor record", pid),
            )),
        }
    }

    async fn kill(&self, rp: &RunParameters, host: &Host) -> Result<(), BackendError> {
        let (_, pid) = Self::running_parts(rp)?;
        // Kill the whole setsid group; fall back to the leader. A
        // missing process means the job already ended, which is fine.
        let cmd = format!("kill -TERM -{pid} 2> /dev/null || kill -TERM {pid} 2> /dev/null || true");
        host.run_command(&cmd).await?;
        Ok(())
    }

    async fn query(
        &self,
        rp: &RunParameters,
        host: &Host,
        item: &str,
    ) -> Result<Vec<u8>, QueryError> {
        let (playground, pid) = Self::running_parts(rp)
            .map_err(|e| QueryError::Failed(e.to_string()))?;
        match item {
            "stdout" => Ok(host.get_file(&format!("{}/{}", playground, STDOUT_FILE)).await?),
            "stderr" => Ok(host.get_file(&format!("{}/{}", playground, STDERR_FILE)).await?),
            "log" => Ok(host.get_file(&format!("{}/{}", playground, LOG_FILE)).await?),
            "script" => Ok(host.get_file(&format!("{}/{}", playground, SCRIPT_FILE)).await?),
            "ps" => {
                let output = host.run_command(&format!("ps -f -p {}", pid)).await
                    .map_err(|e| QueryError::Failed(e.to_string()))?;
                Ok(output.stdout.into_bytes())
            }
            other => Err(QueryError::UnknownItem {
                item: other.to_string(),
            }),
        }
    }

    fn additional_queries(&self, _rp: &RunParameters) -> Vec<(String, String)> {
        vec![("ps".to_string(), "process table entry for the job".to_string())]
    }
}

#[cfg(test)]
#[path = "process_tests.rs"]
mod tests;

// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! LSF backend: `bsub` submission, `bjobs` polling, `bkill`
//! cancellation.

use crate::script::{self, LogOutcome, LOG_FILE, SCRIPT_FILE, STDERR_FILE, STDOUT_FILE};
use crate::{Backend, BackendError, QueryError, StartOutcome, Update};
use async_trait::async_trait;
use gantry_core::RunParameters;
use gantry_host::{shell_quote, Host};
use serde::{Deserialize, Serialize};

const RP_VERSION: u32 = 1;
const DEFAULT_PLAYGROUND_ROOT: &str = "/tmp";

#[derive(Debug, Deserialize)]
struct LsfConfig {
    command: String,
    #[serde(default)]
    queue: Option<String>,
    #[serde(default)]
    playground_root: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "phase", rename_all = "snake_case")]
enum LsfRp {
    Created {
        command: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        queue: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        playground_root: Option<String>,
    },
    Running {
        command: String,
        playground: String,
        job_id: String,
        script: String,
    },
}

impl LsfRp {
    fn decode(rp: &RunParameters) -> Result<Self, BackendError> {
        if rp.version != RP_VERSION {
            return Err(BackendError::Fatal(format!(
                "lsf run-parameters version {} unsupported",
                rp.version
            )));
        }
        serde_json::from_value(rp.payload.clone())
            .map_err(|e| BackendError::Fatal(format!("corrupt lsf run-parameters: {}", e)))
    }

    fn encode(&self) -> RunParameters {
        let payload = serde_json::to_value(self).unwrap_or(serde_json::Value::Null);
        RunParameters::new(RP_VERSION, payload)
    }
}

/// Extract the job id from `bsub` output:
/// `Job <1234> is submitted to queue <normal>.`
pub(crate) fn parse_bsub(output: &str) -> Option<String> {
    let start = output.find('<')? + 1;
    let end = output[start..].find('>')? + start;
    let id = &output[start..end];
    if id.is_empty() || !id.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    Some(id.to_string())
}

/// Map a `bjobs -noheader -o stat` status word.
///
/// Returns `None` for words we do not recognize.
pub(crate) fn parse_bjobs_stat(word: &str) -> Option<bool> {
    // true = still on the cluster, false = left it
    match word.trim() {
        "PEND" | "RUN" | "PSUSP" | "USUSP" | "SSUSP" | "PROV" | "WAIT" => Some(true),
        "DONE" | "EXIT" => Some(false),
        _ => None,
    }
}

/// Runs jobs through an LSF scheduler reachable on the host.
#[derive(Debug, Default)]
pub struct LsfBackend;

impl LsfBackend {
    pub fn new() -> Self {
        Self
    }

    fn running_parts(rp: &RunParameters) -> Result<(String, String), BackendError> {
        match LsfRp::decode(rp)? {
            LsfRp::Running {
                playground, job_id, ..
            } => Ok((playground, job_id)),
            LsfRp::Created { .. } => {
                Err(BackendError::Fatal("lsf job was never submitted".to_string()))
            }
        }
    }

    async fn log_outcome(host: &Host, playground: &str) -> LogOutcome {
        match host.get_file(&format!("{}/{}", playground, LOG_FILE)).await {
            Ok(bytes) => script::outcome(&script::parse_log(&String::from_utf8_lossy(&bytes))),
            Err(_) => LogOutcome::Inconclusive,
        }
    }
}

#[async_trait]
impl Backend for LsfBackend {
    fn name(&self) -> &'static str {
        "lsf"
    }

    fn create(&self, config: serde_json::Value) -> Result<RunParameters, BackendError> {
        let config: LsfConfig = serde_json::from_value(config)
            .map_err(|e| BackendError::Fatal(format!("invalid lsf config: {}", e)))?;
        Ok(LsfRp::Created {
            command: config.command,
            queue: config.queue,
            playground_root: config.playground_root,
        }
        .encode())
    }

    async fn start(&self, rp: &RunParameters, host: &Host) -> StartOutcome {
        let (command, queue, root) = match LsfRp::decode(rp) {
            Ok(LsfRp::Created {
                command,
                queue,
                playground_root,
            }) => (
                command,
                queue,
                playground_root.unwrap_or_else(|| DEFAULT_PLAYGROUND_ROOT.to_string()),
            ),
            Ok(LsfRp::Running { command, .. }) => {
                (command, None, DEFAULT_PLAYGROUND_ROOT.to_string())
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

        let mut submit = format!(
            "bsub -o {out} -e {err}",
            out = shell_quote(&format!("{}/{}", playground, STDOUT_FILE)),
            err = shell_quote(&format!("{}/{}", playground, STDERR_FILE)),
        );
        if let Some(ref queue) = queue {
            submit.push_str(&format!(" -q {}", shell_quote(queue)));
        }
        submit.push_str(&format!(" < {}", shell_quote(&script_path)));

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
                "bsub exited {}: {}",
                output.exit,
                output.stderr.trim()
            ));
        }
        let Some(job_id) = parse_bsub(&output.stdout) else {
            return StartOutcome::Fatal(format!(
                "bsub succeeded but printed no job id: {:?}",
                output.stdout.trim()
            ));
        };

        tracing::info!(job_id = %job_id, playground = %playground, "lsf job submitted");
        StartOutcome::Started(
            LsfRp::Running {
                command,
                playground,
                job_id,
                script: body,
            }
            .encode(),
        )
    }

    async fn update(&self, rp: &RunParameters, host: &Host) -> Result<Update, BackendError> {
        let (playground, job_id) = Self::running_parts(rp)?;

        match Self::log_outcome(host, &playground).await {
            LogOutcome::Succeeded => return Ok(Update::Succeeded(rp.clone())),
            LogOutcome::Failed { label, exit } => {
                return Ok(Update::Failed(
                    rp.clone(),
                    format!("{} exited {}", label, exit),
                ))
            }
            LogOutcome::Inconclusive => {}
        }

        let output = host
            .run_command(&format!(
                "bjobs -noheader -o stat {}",
                shell_quote(&job_id)
            ))
            .await?;
        let on_cluster = if output.success() {
            let word = output.stdout.trim();
            if word.is_empty() {
                // bjobs prints "is not found" on stderr with exit 0 once
                // the job has aged out.
                false
            } else {
                match parse_bjobs_stat(word) {
                    Some(state) => state,
                    None => {
                        return Err(BackendError::Fatal(format!(
                            "bjobs printed unknown status {:?}",
                            word
                        )))
                    }
                }
            }
        } else if output.stderr.contains("not found") {
            false
        } else {
            return Err(BackendError::Recoverable(format!(
                "bjobs exited {}: {}",
                output.exit,
                output.stderr.trim()
            )));
        };

        if on_cluster {
            return Ok(Update::StillRunning(rp.clone()));
        }

        match Self::log_outcome(host, &playground).await {
            LogOutcome::Succeeded => Ok(Update::Succeeded(rp.clone())),
            LogOutcome::Failed { label, exit } => Ok(Update::Failed(
                rp.clone(),
                format!("{} exited {}", label, exit),
            )),
            LogOutcome::Inconclusive => Ok(Update::Failed(
                rp.clone(),
                format!("job {} left the cluster without a monitor record", job_id),
            )),
        }
    }

    async fn kill(&self, rp: &RunParameters, host: &Host) -> Result<(), BackendError> {
        let (_, job_id) = Self::running_parts(rp)?;
        let output = host
            .run_command(&format!("bkill {}", shell_quote(&job_id)))
            .await?;
        if !output.success()
            && !output.stderr.contains("not found")
            && !output.stderr.contains("already finished")
        {
            return Err(BackendError::Recoverable(format!(
                "bkill exited {}: {}",
                output.exit,
                output.stderr.trim()
            )));
        }
        Ok(())
    }

    async fn query(
        &self,
        rp: &RunParameters,
        host: &Host,
        item: &str,
    ) -> Result<Vec<u8>, QueryError> {
        let decoded = LsfRp::decode(rp).map_err(|e| QueryError::Failed(e.to_string()))?;
        let (playground, job_id, script) = match decoded {
            LsfRp::Running {
                playground,
                job_id,
                script,
                ..
            } => (playground, job_id, script),
            LsfRp::Created { .. } => {
                return Err(QueryError::Failed("lsf job was never submitted".into()))
            }
        };
        match item {
            "stdout" => Ok(host.get_file(&format!("{}/{}", playground, STDOUT_FILE)).await?),
            "stderr" => Ok(host.get_file(&format!("{}/{}", playground, STDERR_FILE)).await?),
            "log" => Ok(host.get_file(&format!("{}/{}", playground, LOG_FILE)).await?),
            "script" => Ok(script.into_bytes()),
            "bjobs" => {
                let output = host
                    .run_command(&format!("bjobs -l {}", shell_quote(&job_id)))
                    .await
                    .map_err(|e| QueryError::Failed(e.to_string()))?;
                Ok(output.stdout.into_bytes())
            }
            other => Err(QueryError::UnknownItem {
                item: other.to_string(),
            }),
        }
    }

    fn additional_queries(&self, _rp: &RunParameters) -> Vec<(String, String)> {
        vec![("bjobs".to_string(), "full bjobs -l record".to_string())]
    }
}

#[cfg(test)]
#[path = "lsf_tests.rs"]
mod tests;

// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! PBS/Torque backend: `qsub` submission, `qstat -f1` polling, `qdel`
//! cancellation.

use crate::script::{self, LogOutcome, LOG_FILE, SCRIPT_FILE, STDERR_FILE, STDOUT_FILE};
use crate::{Backend, BackendError, QueryError, StartOutcome, Update};
use async_trait::async_trait;
use gantry_core::RunParameters;
use gantry_host::{shell_quote, Host};
use serde::{Deserialize, Serialize};

const RP_VERSION: u32 = 1;
const DEFAULT_PLAYGROUND_ROOT: &str = "/tmp";

/// Scheduler-side view of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SchedulerStatus {
    Running,
    Completed,
    Unknown,
}

#[derive(Debug, Deserialize)]
struct PbsConfig {
    command: String,
    #[serde(default)]
    queue: Option<String>,
    /// Raw `-l` resource requests (e.g. `nodes=1:ppn=4`).
    #[serde(default)]
    resources: Vec<String>,
    #[serde(default)]
    playground_root: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "phase", rename_all = "snake_case")]
enum PbsRp {
    Created {
        command: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        queue: Option<String>,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        resources: Vec<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        playground_root: Option<String>,
    },
    Running {
        command: String,
        playground: String,
        job_id: String,
        /// The wrapper as submitted, kept for diagnostics.
        script: String,
    },
}

impl PbsRp {
    fn decode(rp: &RunParameters) -> Result<Self, BackendError> {
        if rp.version != RP_VERSION {
            return Err(BackendError::Fatal(format!(
                "pbs run-parameters version {} unsupported",
                rp.version
            )));
        }
        serde_json::from_value(rp.payload.clone())
            .map_err(|e| BackendError::Fatal(format!("corrupt pbs run-parameters: {}", e)))
    }

    fn encode(&self) -> RunParameters {
        let payload = serde_json::to_value(self).unwrap_or(serde_json::Value::Null);
        RunParameters::new(RP_VERSION, payload)
    }
}

/// Parse `qstat -f1` output into a job state.
///
/// Returns `Err` on output without a `job_state` line; callers decide
/// whether that is fatal (exit 0) or a queue departure.
pub(crate) fn parse_qstat(output: &str) -> Result<SchedulerStatus, String> {
    for line in output.lines() {
        let line = line.trim();
        if let Some(value) = line.strip_prefix("job_state = ") {
            return Ok(match value.trim() {
                "Q" | "R" | "H" | "W" | "T" | "E" => SchedulerStatus::Running,
                "C" => SchedulerStatus::Completed,
                _ => SchedulerStatus::Unknown,
            });
        }
    }
    Err("no job_state line in qstat output".to_string())
}

/// Runs jobs through a PBS/Torque scheduler reachable on the host.
#[derive(Debug, Default)]
pub struct PbsBackend;

impl PbsBackend {
    pub fn new() -> Self {
        Self
    }

    fn running_parts(rp: &RunParameters) -> Result<(String, String), BackendError> {
        match PbsRp::decode(rp)? {
            PbsRp::Running {
                playground, job_id, ..
            } => Ok((playground, job_id)),
            PbsRp::Created { .. } => {
                Err(BackendError::Fatal("pbs job was never submitted".to_string()))
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
impl Backend for PbsBackend {
    fn name(&self) -> &'static str {
        "pbs"
    }

    fn create(&self, config: serde_json::Value) -> Result<RunParameters, BackendError> {
        let config: PbsConfig = serde_json::from_value(config)
            .map_err(|e| BackendError::Fatal(format!("invalid pbs config: {}", e)))?;
        Ok(PbsRp::Created {
            command: config.command,
            queue: config.queue,
            resources: config.resources,
            playground_root: config.playground_root,
        }
        .encode())
    }

    async fn start(&self, rp: &RunParameters, host: &Host) -> StartOutcome {
        let (command, queue, resources, root) = match PbsRp::decode(rp) {
            Ok(PbsRp::Created {
                command,
                queue,
                resources,
                playground_root,
            }) => (
                command,
                queue,
                resources,
                playground_root.unwrap_or_else(|| DEFAULT_PLAYGROUND_ROOT.to_string()),
            ),
            Ok(PbsRp::Running { command, .. }) => {
                (command, None, Vec::new(), DEFAULT_PLAYGROUND_ROOT.to_string())
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
            "qsub -o {out} -e {err}",
            out = shell_quote(&format!("{}/{}", playground, STDOUT_FILE)),
            err = shell_quote(&format!("{}/{}", playground, STDERR_FILE)),
        );
        if let Some(ref queue) = queue {
            submit.push_str(&format!(" -q {}", shell_quote(queue)));
        }
        for resource in &resources {
            submit.push_str(&format!(" -l {}", shell_quote(resource)));
        }
        submit.push_str(&format!(" {}", shell_quote(&script_path)));

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
            // The scheduler said no; that can clear up (queue full,
            // server restarting).
            return StartOutcome::Recoverable(format!(
                "qsub exited {}: {}",
                output.exit,
                output.stderr.trim()
            ));
        }
        let job_id = output.stdout.trim().to_string();
        if job_id.is_empty() || job_id.contains(char::is_whitespace) {
            return StartOutcome::Fatal(format!(
                "qsub succeeded but printed no job id: {:?}",
                output.stdout
            ));
        }

        tracing::info!(job_id = %job_id, playground = %playground, "pbs job submitted");
        StartOutcome::Started(
            PbsRp::Running {
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
            .run_command(&format!("qstat -f1 {}", shell_quote(&job_id)))
            .await?;
        let status = if output.success() {
            match parse_qstat(&output.stdout) {
                Ok(status) => status,
                // Exit 0 with unusable output: the scheduler is broken,
                // not merely busy.
                Err(e) => return Err(BackendError::Fatal(format!("qstat: {}", e))),
            }
        } else if output.stderr.contains("Unknown Job Id")
            || output.stderr.contains("Job has finished")
        {
            SchedulerStatus::Completed
        } else {
            return Err(BackendError::Recoverable(format!(
                "qstat exited {}: {}",
                output.exit,
                output.stderr.trim()
            )));
        };

        match status {
            SchedulerStatus::Running => Ok(Update::StillRunning(rp.clone())),
            SchedulerStatus::Unknown => Ok(Update::StillRunning(rp.clone())),
            SchedulerStatus::Completed => {
                // Re-read the log once; completion may have raced the
                // first read.
                match Self::log_outcome(host, &playground).await {
                    LogOutcome::Succeeded => Ok(Update::Succeeded(rp.clone())),
                    LogOutcome::Failed { label, exit } => Ok(Update::Failed(
                        rp.clone(),
                        format!("{} exited {}", label, exit),
                    )),
                    LogOutcome::Inconclusive => Ok(Update::Failed(
                        rp.clone(),
                        format!("job {} left the queue without a monitor record", job_id),
                    )),
                }
            }
        }
    }

    async fn kill(&self, rp: &RunParameters, host: &Host) -> Result<(), BackendError> {
        let (_, job_id) = Self::running_parts(rp)?;
        let output = host
            .run_command(&format!("qdel {}", shell_quote(&job_id)))
            .await?;
        // An already-finished job is a successful cancel.
        if !output.success() && !output.stderr.contains("Unknown Job Id") {
            return Err(BackendError::Recoverable(format!(
                "qdel exited {}: {}",
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
        let decoded = PbsRp::decode(rp).map_err(|e| QueryError::Failed(e.to_string()))?;
        let (playground, job_id, script) = match decoded {
            PbsRp::Running {
                playground,
                job_id,
                script,
                ..
            } => (playground, job_id, script),
            PbsRp::Created { .. } => {
                return Err(QueryError::Failed("pbs job was never submitted".into()))
            }
        };
        match item {
            "stdout" => Ok(host.get_file(&format!("{}/{}", playground, STDOUT_FILE)).await?),
            "stderr" => Ok(host.get_file(&format!("{}/{}", playground, STDERR_FILE)).await?),
            "log" => Ok(host.get_file(&format!("{}/{}", playground, LOG_FILE)).await?),
            "script" => Ok(script.into_bytes()),
            "qstat" => {
                let output = host
                    .run_command(&format!("qstat -f1 {}", shell_quote(&job_id)))
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
        vec![("qstat".to_string(), "full qstat -f1 record".to_string())]
    }
}

#[cfg(test)]
#[path = "pbs_tests.rs"]
mod tests;

// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! YARN batch backend.
//!
//! The distributed-shell client blocks until the application finishes,
//! so submission daemonizes the client (like the process backend) and
//! the application id is harvested from the client's stdout once YARN
//! has assigned it. Polling prefers the monitor log, then the
//! application report, then the client process.

use crate::script::{self, LogOutcome, LOG_FILE, SCRIPT_FILE, STDERR_FILE, STDOUT_FILE};
use crate::{Backend, BackendError, QueryError, StartOutcome, Update};
use async_trait::async_trait;
use gantry_core::RunParameters;
use gantry_host::{shell_quote, Host};
use serde::{Deserialize, Serialize};

const RP_VERSION: u32 = 1;
const DEFAULT_PLAYGROUND_ROOT: &str = "/tmp";

#[derive(Debug, Deserialize)]
struct YarnConfig {
    command: String,
    /// Path to the hadoop distributed-shell jar on the host.
    distributed_shell_jar: String,
    #[serde(default)]
    application_name: Option<String>,
    #[serde(default)]
    playground_root: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "phase", rename_all = "snake_case")]
enum YarnRp {
    Created {
        command: String,
        distributed_shell_jar: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        application_name: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        playground_root: Option<String>,
    },
    Running {
        command: String,
        /// Kept so a restarted target can resubmit.
        distributed_shell_jar: String,
        playground: String,
        client_pid: i32,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        application_id: Option<String>,
    },
}

impl YarnRp {
    fn decode(rp: &RunParameters) -> Result<Self, BackendError> {
        if rp.version != RP_VERSION {
            return Err(BackendError::Fatal(format!(
                "yarn run-parameters version {} unsupported",
                rp.version
            )));
        }
        serde_json::from_value(rp.payload.clone())
            .map_err(|e| BackendError::Fatal(format!("corrupt yarn run-parameters: {}", e)))
    }

    fn encode(&self) -> RunParameters {
        let payload = serde_json::to_value(self).unwrap_or(serde_json::Value::Null);
        RunParameters::new(RP_VERSION, payload)
    }
}

/// Find `application_<cluster>_<seq>` in the client's output.
pub(crate) fn parse_application_id(output: &str) -> Option<String> {
    for word in output.split_whitespace() {
        let word = word.trim_matches(|c: char| !c.is_ascii_alphanumeric() && c != '_');
        if word.starts_with("application_")
            && word.len() > "application_".len()
            && word["application_".len()..]
                .bytes()
                .all(|b| b.is_ascii_digit() || b == b'_')
        {
            return Some(word.to_string());
        }
    }
    None
}

/// Extract a field like `State : RUNNING` from an application report.
pub(crate) fn report_field<'a>(report: &'a str, field: &str) -> Option<&'a str> {
    for line in report.lines() {
        let line = line.trim();
        if let Some((key, value)) = line.split_once(':') {
            if key.trim().eq_ignore_ascii_case(field) {
                return Some(value.trim());
            }
        }
    }
    None
}

/// Runs jobs as YARN distributed-shell applications.
#[derive(Debug, Default)]
pub struct YarnBackend;

impl YarnBackend {
    pub fn new() -> Self {
        Self
    }

    async fn log_outcome(host: &Host, playground: &str) -> LogOutcome {
        match host.get_file(&format!("{}/{}", playground, LOG_FILE)).await {
            Ok(bytes) => script::outcome(&script::parse_log(&String::from_utf8_lossy(&bytes))),
            Err(_) => LogOutcome::Inconclusive,
        }
    }

    /// Read the client's stdout looking for a newly assigned
    /// application id.
    async fn discover_application_id(host: &Host, playground: &str) -> Option<String> {
        let stdout = host
            .get_file(&format!("{}/client-stdout", playground))
            .await
            .ok()?;
        parse_application_id(&String::from_utf8_lossy(&stdout))
    }
}

#[async_trait]
impl Backend for YarnBackend {
    fn name(&self) -> &'static str {
        "yarn"
    }

    fn create(&self, config: serde_json::Value) -> Result<RunParameters, BackendError> {
        let config: YarnConfig = serde_json::from_value(config)
            .map_err(|e| BackendError::Fatal(format!("invalid yarn config: {}", e)))?;
        Ok(YarnRp::Created {
            command: config.command,
            distributed_shell_jar: config.distributed_shell_jar,
            application_name: config.application_name,
            playground_root: config.playground_root,
        }
        .encode())
    }

    async fn start(&self, rp: &RunParameters, host: &Host) -> StartOutcome {
        let (command, jar, appname, root) = match YarnRp::decode(rp) {
            Ok(YarnRp::Created {
                command,
                distributed_shell_jar,
                application_name,
                playground_root,
            }) => (
                command,
                distributed_shell_jar,
                application_name,
                playground_root.unwrap_or_else(|| DEFAULT_PLAYGROUND_ROOT.to_string()),
            ),
            // Restarted after a crash mid-submission: resubmit fresh.
            Ok(YarnRp::Running {
                command,
                distributed_shell_jar,
                ..
            }) => (
                command,
                distributed_shell_jar,
                None,
                DEFAULT_PLAYGROUND_ROOT.to_string(),
            ),
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

        let name = appname.unwrap_or_else(|| "gantry".to_string());
        let client = format!(
            "yarn jar {jar} -appname {name} -shell_command {cmd}",
            jar = shell_quote(&jar),
            name = shell_quote(&name),
            cmd = shell_quote(&format!("bash {}", script_path)),
        );
        let submit = format!(
            "nohup setsid {client} > {out} 2> {err} < /dev/null & echo $!",
            client = client,
            out = shell_quote(&format!("{}/client-stdout", playground)),
            err = shell_quote(&format!("{}/client-stderr", playground)),
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
                "client submission exited {}: {}",
                output.exit,
                output.stderr.trim()
            ));
        }
        let client_pid: i32 = match output.stdout.trim().parse() {
            Ok(pid) => pid,
            Err(_) => {
                return StartOutcome::Fatal(format!(
                    "submission printed no pid: {:?}",
                    output.stdout.trim()
                ))
            }
        };

        tracing::info!(client_pid, playground = %playground, "yarn client started");
        StartOutcome::Started(
            YarnRp::Running {
                command,
                distributed_shell_jar: jar,
                playground,
                client_pid,
                application_id: None,
            }
            .encode(),
        )
    }

    async fn update(&self, rp: &RunParameters, host: &Host) -> Result<Update, BackendError> {
        let (command, jar, playground, client_pid, mut application_id) = match YarnRp::decode(rp)? {
            YarnRp::Running {
                command,
                distributed_shell_jar,
                playground,
                client_pid,
                application_id,
            } => (
                command,
                distributed_shell_jar,
                playground,
                client_pid,
                application_id,
            ),
            YarnRp::Created { .. } => {
                return Err(BackendError::Fatal("yarn job was never submitted".to_string()))
            }
        };

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

        // Harvest the application id once the resource manager assigns
        // one; persist it in the refreshed run parameters.
        if application_id.is_none() {
            application_id = Self::discover_application_id(host, &playground).await;
        }
        let refreshed = YarnRp::Running {
            command,
            distributed_shell_jar: jar,
            playground: playground.clone(),
            client_pid,
            application_id: application_id.clone(),
        }
        .encode();

        if let Some(ref app_id) = application_id {
            let output = host
                .run_command(&format!(
                    "yarn application -status {}",
                    shell_quote(app_id)
                ))
                .await?;
            if output.success() {
                let state = report_field(&output.stdout, "State").unwrap_or("");
                if state.eq_ignore_ascii_case("FINISHED")
                    || state.eq_ignore_ascii_case("FAILED")
                    || state.eq_ignore_ascii_case("KILLED")
                {
                    return match Self::log_outcome(host, &playground).await {
                        LogOutcome::Succeeded => Ok(Update::Succeeded(refreshed)),
                        LogOutcome::Failed { label, exit } => Ok(Update::Failed(
                            refreshed,
                            format!("{} exited {}", label, exit),
                        )),
                        LogOutcome::Inconclusive => {
                            let final_state =
                                report_field(&output.stdout, "Final-State").unwrap_or("UNDEFINED");
                            if final_state.eq_ignore_ascii_case("SUCCEEDED") {
                                Ok(Update::Succeeded(refreshed))
                            } else {
                                Ok(Update::Failed(
                                    refreshed,
                                    format!("application {} ended {}", app_id, final_state),
                                ))
                            }
                        }
                    };
                }
                return Ok(Update::StillRunning(refreshed));
            }
            // Fall through to the client probe when the report fails.
        }

        let probe = host
            .run_command(&format!("kill -0 {} 2> /dev/null", client_pid))
            .await?;
        if probe.success() {
            return Ok(Update::StillRunning(refreshed));
        }

        match Self::log_outcome(host, &playground).await {
            LogOutcome::Succeeded => Ok(Update::Succeeded(refreshed)),
            LogOutcome::Failed { label, exit } => Ok(Update::Failed(
                refreshed,
                format!("{} exited {}", label, exit),
            )),
            LogOutcome::Inconclusive => Ok(Update::Failed(
                refreshed,
                "yarn client exited without a monitor record".to_string(),
            )),
        }
    }

    async fn kill(&self, rp: &RunParameters, host: &Host) -> Result<(), BackendError> {
        let (client_pid, application_id) = match YarnRp::decode(rp)? {
            YarnRp::Running {
                client_pid,
                application_id,
                ..
            } => (client_pid, application_id),
            YarnRp::Created { .. } => return Ok(()),
        };
        if let Some(app_id) = application_id {
            // Best effort: the application may already be gone.
            let _ = host
                .run_command(&format!("yarn application -kill {}", shell_quote(&app_id)))
                .await?;
        }
        host.run_command(&format!(
            "kill -TERM -{pid} 2> /dev/null || kill -TERM {pid} 2> /dev/null || true",
            pid = client_pid
        ))
        .await?;
        Ok(())
    }

    async fn query(
        &self,
        rp: &RunParameters,
        host: &Host,
        item: &str,
    ) -> Result<Vec<u8>, QueryError> {
        let (playground, application_id) = match YarnRp::decode(rp)
            .map_err(|e| QueryError::Failed(e.to_string()))?
        {
            YarnRp::Running {
                playground,
                application_id,
                ..
            } => (playground, application_id),
            YarnRp::Created { .. } => {
                return Err(QueryError::Failed("yarn job was never submitted".into()))
            }
        };
        match item {
            "stdout" => Ok(host.get_file(&format!("{}/{}", playground, STDOUT_FILE)).await?),
            "stderr" => Ok(host.get_file(&format!("{}/{}", playground, STDERR_FILE)).await?),
            "log" => Ok(host.get_file(&format!("{}/{}", playground, LOG_FILE)).await?),
            "script" => Ok(host.get_file(&format!("{}/{}", playground, SCRIPT_FILE)).await?),
            "client-stdout" => Ok(host.get_file(&format!("{}/client-stdout", playground)).await?),
            "status" => {
                let Some(app_id) = application_id else {
                    return Err(QueryError::Failed("no application id yet".into()));
                };
                let output = host
                    .run_command(&format!(
                        "yarn application -status {}",
                        shell_quote(&app_id)
                    ))
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
        vec![
            ("status".to_string(), "yarn application report".to_string()),
            (
                "client-stdout".to_string(),
                "distributed-shell client output".to_string(),
            ),
        ]
    }
}

#[cfg(test)]
#[path = "yarn_tests.rs"]
mod tests;

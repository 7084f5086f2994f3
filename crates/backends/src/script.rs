// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The monitored script: a shell wrapper that records structured
//! progress entries to a log file in the playground.
//!
//! Entries, one per line:
//! `start <ts>`, `before <label>`, `after <label>`, `success <ts>`,
//! `failure <ts> <label> <exit>`. The last entry decides the outcome;
//! an incomplete log means the run is still in flight (or was cut
//! short).

use gantry_host::shell_quote;

/// File names inside a playground directory.
pub const SCRIPT_FILE: &str = "script.sh";
pub const LOG_FILE: &str = "monitor.log";
pub const STDOUT_FILE: &str = "stdout";
pub const STDERR_FILE: &str = "stderr";

/// One parsed entry of the monitor log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MonitorRecord {
    Start { at: u64 },
    Before { label: String },
    After { label: String },
    Success { at: u64 },
    Failure { at: u64, label: String, exit: i32 },
}

/// Outcome decided by the last log record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogOutcome {
    Succeeded,
    Failed { label: String, exit: i32 },
    /// No terminal record yet.
    Inconclusive,
}

/// Render the monitored wrapper around `program`.
///
/// The playground must exist before the script runs; the script only
/// appends to files inside it.
pub fn render(playground: &str, program: &str) -> String {
    let log = format!("{}/{}", playground, LOG_FILE);
    format!(
        "#!/usr/bin/env bash\n\
         log={log}\n\
         echo \"start $(date +%s)\" >> \"$log\"\n\
         echo \"before main\" >> \"$log\"\n\
         (\n\
         {program}\n\
         )\n\
         code=$?\n\
         echo \"after main\" >> \"$log\"\n\
         if [ $code -eq 0 ]; then\n\
         \techo \"success $(date +%s)\" >> \"$log\"\n\
         else\n\
         \techo \"failure $(date +%s) main $code\" >> \"$log\"\n\
         fi\n\
         exit $code\n",
        log = shell_quote(&log),
        program = program,
    )
}

/// Parse the monitor log, skipping lines that do not parse.
pub fn parse_log(text: &str) -> Vec<MonitorRecord> {
    text.lines().filter_map(parse_line).collect()
}

fn parse_line(line: &str) -> Option<MonitorRecord> {
    let mut words = line.split_whitespace();
    match words.next()? {
        "start" => Some(MonitorRecord::Start {
            at: words.next()?.parse().ok()?,
        }),
        "before" => Some(MonitorRecord::Before {
            label: words.next()?.to_string(),
        }),
        "after" => Some(MonitorRecord::After {
            label: words.next()?.to_string(),
        }),
        "success" => Some(MonitorRecord::Success {
            at: words.next()?.parse().ok()?,
        }),
        "failure" => {
            let at = words.next()?.parse().ok()?;
            let label = words.next()?.to_string();
            let exit = words.next()?.parse().ok()?;
            Some(MonitorRecord::Failure { at, label, exit })
        }
        _ => None,
    }
}

/// Decide the run outcome from the parsed records.
pub fn outcome(records: &[MonitorRecord]) -> LogOutcome {
    match records.last() {
        Some(MonitorRecord::Success { .. }) => LogOutcome::Succeeded,
        Some(MonitorRecord::Failure { label, exit, .. }) => LogOutcome::Failed {
            label: label.clone(),
            exit: *exit,
        },
        _ => LogOutcome::Inconclusive,
    }
}

#[cfg(test)]
#[path = "script_tests.rs"]
mod tests;

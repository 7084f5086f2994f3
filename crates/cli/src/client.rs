// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Socket client for talking to gantryd.

use crate::exit_error::ExitError;
use gantry_daemon::protocol::{Envelope, Request, Response};
use gantry_daemon::wire;
use std::path::PathBuf;
use tokio::net::UnixStream;

/// One-request-per-connection client, mirroring the daemon's listener.
pub struct DaemonClient {
    socket_path: PathBuf,
    token: Option<String>,
}

impl DaemonClient {
    pub fn new(socket_path: PathBuf, token: Option<String>) -> Self {
        Self { socket_path, token }
    }

    pub async fn request(&self, request: Request) -> Result<Response, ExitError> {
        let stream = UnixStream::connect(&self.socket_path).await.map_err(|e| {
            ExitError::UserTodo(format!(
                "cannot reach gantryd at {} ({}); is it running?",
                self.socket_path.display(),
                e
            ))
        })?;
        let (mut reader, mut writer) = stream.into_split();

        let envelope = Envelope {
            token: self.token.clone(),
            request,
        };
        wire::write_with_timeout(&mut writer, &envelope, wire::DEFAULT_TIMEOUT)
            .await
            .map_err(|e| ExitError::Engine(e.to_string()))?;

        let response: Response = wire::read_with_timeout(&mut reader, wire::DEFAULT_TIMEOUT)
            .await
            .map_err(|e| ExitError::Engine(e.to_string()))?;

        match response {
            Response::Error { message } => Err(ExitError::UserTodo(message)),
            other => Ok(other),
        }
    }
}

// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Thin client over the daemon's Unix socket (§4.10).

use std::path::PathBuf;
use std::time::Duration;

use bku_core::paths;
use bku_wire::{Request, Response};
use tokio::net::UnixStream;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(2);
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("daemon is not running (no response on {0})")]
    NotRunning(PathBuf),
    #[error(transparent)]
    Protocol(#[from] bku_wire::ProtocolError),
    #[error("daemon returned an unexpected response")]
    UnexpectedResponse,
    #[error("daemon reported failure: {0}")]
    DaemonError(String),
}

impl ClientError {
    pub fn is_not_running(&self) -> bool {
        matches!(self, ClientError::NotRunning(_))
    }
}

/// A connected client for one request. Connections are not pooled: each
/// command opens a fresh socket, matching the daemon's one-task-per-
/// connection model.
pub struct DaemonClient {
    stream: UnixStream,
    socket_path: PathBuf,
}

impl DaemonClient {
    pub async fn connect() -> Result<Self, ClientError> {
        let data_dir = paths::data_dir();
        let socket_path = paths::socket_path(&data_dir);
        let stream = tokio::time::timeout(CONNECT_TIMEOUT, UnixStream::connect(&socket_path))
            .await
            .map_err(|_| ClientError::NotRunning(socket_path.clone()))?
            .map_err(|_| ClientError::NotRunning(socket_path.clone()))?;
        Ok(Self { stream, socket_path })
    }

    /// Send one request and read the matching response. Consumes `self`
    /// since the protocol is strictly one request per connection.
    pub async fn send(mut self, request: &Request) -> Result<Response, ClientError> {
        let (mut reader, mut writer) = self.stream.split();
        let payload = bku_wire::encode(request)?;
        bku_wire::write_message(&mut writer, &payload)
            .await
            .map_err(|_| ClientError::NotRunning(self.socket_path.clone()))?;
        let response = tokio::time::timeout(REQUEST_TIMEOUT, bku_wire::read_message(&mut reader))
            .await
            .map_err(|_| ClientError::NotRunning(self.socket_path.clone()))??;
        Ok(bku_wire::decode(&response)?)
    }

    /// Upgrade into the fan-out subscription stream (§4.6), calling `on_message`
    /// for each event until the daemon closes the connection.
    pub async fn subscribe(mut self, mut on_message: impl FnMut(bku_wire::FanoutMessage)) -> Result<(), ClientError> {
        let (mut reader, mut writer) = self.stream.split();
        let payload = bku_wire::encode(&Request::Subscribe)?;
        bku_wire::write_message(&mut writer, &payload).await?;
        loop {
            match bku_wire::read_message(&mut reader).await {
                Ok(bytes) => on_message(bku_wire::decode(&bytes)?),
                Err(bku_wire::ProtocolError::ConnectionClosed) => return Ok(()),
                Err(err) => return Err(err.into()),
            }
        }
    }
}

/// Unwrap a [`Response`] whose `ok` flag reports daemon-side failure into
/// a [`ClientError`], otherwise hand back its `data` payload.
pub fn unwrap_response(response: Response) -> Result<Option<bku_wire::ResponseData>, ClientError> {
    if response.ok {
        Ok(response.data)
    } else {
        Err(ClientError::DaemonError(response.message))
    }
}

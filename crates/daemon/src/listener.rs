// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! IPC listener (§4.10): accepts connections on the daemon's Unix domain
//! socket and dispatches each to the supervisor, error log, or fan-out
//! hub. One task per connection; `Subscribe` upgrades the connection into
//! a one-way stream of fan-out messages until the client disconnects.

use std::sync::Arc;
use std::time::{Duration, Instant};

use bku_core::{ErrorEvent, JobStatus, Severity};
use bku_engine::{Supervisor, SupervisorError};
use bku_wire::{
    encode, read_request, write_message, write_response, HealthSummary, ProtocolError, Request, Response,
    ResponseData,
};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::UnixListener;
use tracing::{debug, error, warn};

use crate::error_log::ErrorLog;
use crate::fanout::FanoutHub;

/// Per-request deadline for reading and writing frames (§4.10).
const IPC_TIMEOUT: Duration = Duration::from_secs(5);

/// Shared state every connection handler dispatches against.
pub struct ListenCtx {
    pub supervisor: Arc<Supervisor>,
    pub error_log: Arc<ErrorLog>,
    pub fanout: Arc<FanoutHub>,
    pub start_time: Instant,
}

/// Accepts connections on `unix` and spawns a handler task per connection.
pub struct Listener {
    unix: UnixListener,
    ctx: Arc<ListenCtx>,
}

impl Listener {
    pub fn new(unix: UnixListener, ctx: Arc<ListenCtx>) -> Self {
        Self { unix, ctx }
    }

    pub async fn run(self) {
        loop {
            match self.unix.accept().await {
                Ok((stream, _)) => {
                    let ctx = Arc::clone(&self.ctx);
                    tokio::spawn(async move {
                        let (reader, writer) = stream.into_split();
                        if let Err(err) = handle_connection(reader, writer, &ctx).await {
                            log_connection_error(err);
                        }
                    });
                }
                Err(err) => error!(%err, "accept error"),
            }
        }
    }
}

fn log_connection_error(err: ProtocolError) {
    match err {
        ProtocolError::ConnectionClosed => debug!("client disconnected"),
        ProtocolError::Timeout => warn!("connection timed out waiting for a request"),
        other => error!(error = %other, "connection error"),
    }
}

async fn handle_connection<R, W>(mut reader: R, mut writer: W, ctx: &ListenCtx) -> Result<(), ProtocolError>
where
    R: AsyncRead + AsyncReadExt + Unpin + Send + 'static,
    W: AsyncWrite + AsyncWriteExt + Unpin + Send + 'static,
{
    let request = read_request(&mut reader, IPC_TIMEOUT).await?;

    if matches!(request, Request::Subscribe) {
        return handle_subscribe(reader, writer, ctx).await;
    }

    debug!(?request, "received request");
    let response = dispatch(request, ctx).await;
    write_response(&mut writer, &response, IPC_TIMEOUT).await
}

/// Upgrades the connection into a one-way push of fan-out messages. Ends
/// when the client disconnects; a subscriber is otherwise never detached
/// from the daemon side.
async fn handle_subscribe<R, W>(mut reader: R, mut writer: W, ctx: &ListenCtx) -> Result<(), ProtocolError>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut rx = ctx.fanout.subscribe();
    loop {
        tokio::select! {
            message = rx.recv() => {
                match message {
                    Some(message) => {
                        let payload = encode(&message)?;
                        write_message(&mut writer, &payload).await?;
                    }
                    None => return Ok(()),
                }
            }
            _ = detect_client_disconnect(&mut reader) => return Ok(()),
        }
    }
}

/// A subscribed client never sends another request; any read completing
/// (including EOF) means it's gone.
async fn detect_client_disconnect<R: AsyncRead + Unpin>(reader: &mut R) {
    let mut buf = [0u8; 1];
    let _ = tokio::io::AsyncReadExt::read(reader, &mut buf).await;
}

async fn dispatch(request: Request, ctx: &ListenCtx) -> Response {
    match request {
        Request::CreateJob { name, source, dest, job_type, settings } => {
            match ctx.supervisor.create_job(name, source, dest, job_type, settings) {
                Ok(job) => Response::ok_with("job created", ResponseData::Job { job: Box::new(job) }),
                Err(err) => supervisor_error_response(ctx, err, "create_job"),
            }
        }
        Request::StartJob { job_id } => match ctx.supervisor.start_job(&job_id).await {
            Ok(job) => Response::ok_with("job started", ResponseData::Job { job: Box::new(job) }),
            Err(err) => supervisor_error_response(ctx, err, "start_job"),
        },
        Request::StopJob { job_id } => match ctx.supervisor.stop_job(&job_id).await {
            Ok(job) => Response::ok_with("job stopped", ResponseData::Job { job: Box::new(job) }),
            Err(err) => supervisor_error_response(ctx, err, "stop_job"),
        },
        Request::DeleteJob { job_id } => match ctx.supervisor.delete_job(&job_id) {
            Ok(()) => Response::ok("job deleted"),
            Err(err) => supervisor_error_response(ctx, err, "delete_job"),
        },
        Request::GetJobStatus { job_id } => match ctx.supervisor.get_job_status(&job_id) {
            Ok(job) => Response::ok_with("ok", ResponseData::Job { job: Box::new(job) }),
            Err(err) => supervisor_error_response(ctx, err, "get_job_status"),
        },
        Request::ListJobs => Response::ok_with("ok", ResponseData::Jobs { jobs: ctx.supervisor.list_jobs() }),
        Request::Health => Response::ok_with("ok", ResponseData::Health(health_summary(ctx))),
        Request::Subscribe => unreachable!("Subscribe is intercepted in handle_connection"),
    }
}

fn supervisor_error_response(ctx: &ListenCtx, err: SupervisorError, operation: &str) -> Response {
    warn!(error = %err, operation, "request failed");
    let severity = match &err {
        SupervisorError::NotFound(_) | SupervisorError::Validation(_) => Severity::Low,
        SupervisorError::CannotStart(_) | SupervisorError::NotRunning(_) | SupervisorError::LiveEngine(_) => {
            Severity::Medium
        }
        SupervisorError::Preflight(_) | SupervisorError::Adapter(_) | SupervisorError::Storage(_) => Severity::High,
    };
    let event = ErrorEvent::from_error(&err, "SupervisorError", severity, "ipc_listener", ctx.supervisor.epoch_ms());
    ctx.error_log.log_error(event);
    Response::error(err.to_string())
}

fn health_summary(ctx: &ListenCtx) -> HealthSummary {
    let jobs = ctx.supervisor.list_jobs();
    let stats = ctx.error_log.stats(ctx.supervisor.epoch_ms());
    HealthSummary {
        uptime_secs: ctx.start_time.elapsed().as_secs(),
        live_engines: ctx.supervisor.live_engine_count(),
        jobs_running: jobs.iter().filter(|j| j.status == JobStatus::Running).count(),
        unresolved_errors: stats.unresolved,
        errors_last_24h: stats.recent_24h,
        critical_errors: stats.critical,
    }
}

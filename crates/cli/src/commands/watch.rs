// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! `oj watch` — live fan-out subscription (§4.6/§4.10).

use anyhow::{anyhow, Result};
use bku_wire::FanoutMessage;

use crate::client::DaemonClient;
use crate::output::OutputFormat;

pub async fn watch(format: OutputFormat) -> Result<()> {
    let client = DaemonClient::connect().await.map_err(|err| anyhow!("{err}"))?;
    client
        .subscribe(|message| print_message(format, &message))
        .await
        .map_err(|err| anyhow!("{err}"))
}

fn print_message(format: OutputFormat, message: &FanoutMessage) {
    if format == OutputFormat::Json {
        if let Ok(json) = serde_json::to_string(message) {
            println!("{json}");
        }
        return;
    }

    match message {
        FanoutMessage::JobUpdate(payload) => {
            println!("{}  {:>3}%  {} bytes/s", payload.job_id, payload.percent, payload.speed_bytes);
        }
        FanoutMessage::JobFinalUpdate(payload) => {
            println!("{}  finished: {}", payload.job_id, payload.status);
        }
        FanoutMessage::Notification { level, message, details } => {
            print!("[{level}] {message}");
            if let Some(details) = details {
                print!(" ({details})");
            }
            println!();
        }
    }
}

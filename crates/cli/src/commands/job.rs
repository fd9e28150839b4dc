// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! `oj job` — create/start/stop/delete/list/status (§4.10).

use anyhow::{anyhow, Result};
use bku_core::{Job, JobId, JobSettings, JobType};
use bku_wire::{Request, ResponseData};
use clap::{Args, Subcommand};

use crate::client::{unwrap_response, DaemonClient};
use crate::output::{format_or_json, handle_list, OutputFormat};

#[derive(Args)]
pub struct JobArgs {
    #[command(subcommand)]
    pub command: JobCommand,
}

#[derive(Subcommand)]
pub enum JobCommand {
    /// Define a new backup job (does not start it)
    Create {
        name: String,
        source: String,
        dest: String,
        /// Transfer mechanism to use
        #[arg(long, value_enum, default_value = "local-copy")]
        job_type: CliJobType,
        /// KB/s bandwidth limit; 0 = unlimited
        #[arg(long, default_value = "0")]
        bandwidth_limit: u64,
        /// Delete source files after a successful transfer
        #[arg(long)]
        delete_source_after: bool,
        /// Required alongside --delete-source-after: explicit opt-in (§4.9)
        #[arg(long)]
        confirm_deletion: bool,
    },
    /// Start a pending, paused, or failed job
    Start { job_id: String },
    /// Stop a running job
    Stop { job_id: String },
    /// Delete a job definition (must not have a live engine)
    Delete { job_id: String },
    /// Show one job's current status
    Status { job_id: String },
    /// List all jobs
    List,
}

#[derive(Clone, Copy, Debug, clap::ValueEnum)]
pub enum CliJobType {
    LocalCopy,
    CloudCopy,
}

impl From<CliJobType> for JobType {
    fn from(value: CliJobType) -> Self {
        match value {
            CliJobType::LocalCopy => JobType::LocalCopy,
            CliJobType::CloudCopy => JobType::CloudCopy,
        }
    }
}

pub async fn job(args: JobArgs, format: OutputFormat) -> Result<()> {
    match args.command {
        JobCommand::Create { name, source, dest, job_type, bandwidth_limit, delete_source_after, confirm_deletion } => {
            create(name, source, dest, job_type, bandwidth_limit, delete_source_after, confirm_deletion, format).await
        }
        JobCommand::Start { job_id } => start(job_id, format).await,
        JobCommand::Stop { job_id } => stop(job_id, format).await,
        JobCommand::Delete { job_id } => delete(job_id, format).await,
        JobCommand::Status { job_id } => status(job_id, format).await,
        JobCommand::List => list(format).await,
    }
}

#[allow(clippy::too_many_arguments)]
async fn create(
    name: String,
    source: String,
    dest: String,
    job_type: CliJobType,
    bandwidth_limit: u64,
    delete_source_after: bool,
    confirm_deletion: bool,
    format: OutputFormat,
) -> Result<()> {
    if delete_source_after && !confirm_deletion {
        return Err(anyhow!("--delete-source-after requires --confirm-deletion (§4.9 safety gate)"));
    }

    let settings = JobSettings { bandwidth_limit, delete_source_after, deletion_confirmed: confirm_deletion, ..Default::default() };
    let request = Request::CreateJob { name, source, dest, job_type: job_type.into(), settings };
    let job = expect_job(send(request).await?)?;
    format_or_json(format, &job, || println!("created job {} ({})", job.id, job.name))
}

async fn start(job_id: String, format: OutputFormat) -> Result<()> {
    let job = expect_job(send(Request::StartJob { job_id: parse_id(&job_id)? }).await?)?;
    format_or_json(format, &job, || println!("started job {} ({})", job.id, job.name))
}

async fn stop(job_id: String, format: OutputFormat) -> Result<()> {
    let job = expect_job(send(Request::StopJob { job_id: parse_id(&job_id)? }).await?)?;
    format_or_json(format, &job, || println!("stopped job {} ({})", job.id, job.name))
}

async fn delete(job_id: String, format: OutputFormat) -> Result<()> {
    send(Request::DeleteJob { job_id: parse_id(&job_id)? }).await?;
    format_or_json(format, &serde_json::json!({ "deleted": job_id }), || println!("deleted job {job_id}"))
}

async fn status(job_id: String, format: OutputFormat) -> Result<()> {
    let job = expect_job(send(Request::GetJobStatus { job_id: parse_id(&job_id)? }).await?)?;
    format_or_json(format, &job, || print_job_line(&job))
}

async fn list(format: OutputFormat) -> Result<()> {
    let data = send(Request::ListJobs).await?;
    let jobs = match data {
        Some(ResponseData::Jobs { jobs }) => jobs,
        _ => return Err(anyhow!("daemon returned an unexpected response to list_jobs")),
    };
    handle_list(format, &jobs, "No jobs defined.", |jobs| {
        for job in jobs {
            print_job_line(job);
        }
    })
}

fn print_job_line(job: &Job) {
    println!(
        "{}  {:<10}  {:<8}  {:>3}%  {} -> {}",
        job.id, job.name, job.status, job.progress.percent, job.source, job.dest
    );
}

fn parse_id(raw: &str) -> Result<JobId> {
    Ok(JobId::from_string(raw))
}

async fn send(request: Request) -> Result<Option<ResponseData>> {
    let client = DaemonClient::connect().await.map_err(|err| anyhow!("{err}"))?;
    let response = client.send(&request).await.map_err(|err| anyhow!("{err}"))?;
    Ok(unwrap_response(response).map_err(|err| anyhow!("{err}"))?)
}

fn expect_job(data: Option<ResponseData>) -> Result<Box<Job>> {
    match data {
        Some(ResponseData::Job { job }) => Ok(job),
        _ => Err(anyhow!("daemon returned an unexpected response")),
    }
}

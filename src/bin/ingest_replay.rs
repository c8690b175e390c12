use anyhow::{Context, Result};
use clap::Parser;
use log::{info, warn};
use securesms_ingest::types::{DecryptedEnvelope, FailureMetadata, MessageId, MessageState, ServiceAddress};
use securesms_ingest::{InMemoryBackend, IngestConfig, MessageProcessor, RecordingJobQueue};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::fs;

/// One line of the replay input.
#[derive(Debug, Deserialize)]
struct ProcessRequest {
    state: MessageState,
    #[serde(default)]
    envelope: Option<DecryptedEnvelope>,
    #[serde(default)]
    failure: Option<FailureMetadata>,
    /// Sent timestamp; defaults to the envelope's.
    #[serde(default)]
    timestamp: Option<u64>,
    #[serde(default)]
    placeholder_id: Option<MessageId>,
}

#[derive(Debug, Serialize)]
struct ReplayLine<'a> {
    line: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    result: Option<&'a securesms_ingest::Disposition>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

#[derive(Parser)]
#[command(name = "ingest-replay")]
#[command(about = "Replay decrypted messages through the ingestion pipeline")]
struct Args {
    /// JSON-lines file, one process request per line
    input: PathBuf,

    /// Service id of the local account
    #[arg(long)]
    self_uuid: String,

    /// Phone number of the local account
    #[arg(long)]
    self_e164: Option<String>,

    /// Pipeline configuration as JSON
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Print results as JSON lines
    #[arg(long)]
    json: bool,
}

#[tokio::main]
async fn main() -> Result<(), anyhow::Error> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => {
            let raw = fs::read_to_string(path)
                .await
                .with_context(|| format!("reading config {}", path.display()))?;
            IngestConfig::from_json_str(&raw).context("parsing config")?
        }
        None => IngestConfig::default(),
    };

    let self_address = match &args.self_e164 {
        Some(e164) => ServiceAddress::new(args.self_uuid.as_str(), e164.as_str()),
        None => ServiceAddress::from_uuid(args.self_uuid.as_str()),
    };
    let backend = Arc::new(InMemoryBackend::with_self(self_address));
    let jobs = Arc::new(RecordingJobQueue::new());
    let processor = MessageProcessor::builder()
        .with_backend(backend.clone())
        .with_job_queue(jobs.clone())
        .with_config(config)
        .build()?;

    let input = fs::read_to_string(&args.input)
        .await
        .with_context(|| format!("reading {}", args.input.display()))?;

    let mut replayed = 0;
    for (index, line) in input.lines().enumerate() {
        let line_no = index + 1;
        if line.trim().is_empty() {
            continue;
        }
        let request: ProcessRequest =
            serde_json::from_str(line).with_context(|| format!("parsing line {line_no}"))?;
        let timestamp = request
            .timestamp
            .or_else(|| request.envelope.as_ref().map(|envelope| envelope.timestamp))
            .unwrap_or_else(now_millis);

        let outcome = processor
            .process(
                request.state,
                request.envelope,
                request.failure,
                timestamp,
                request.placeholder_id,
            )
            .await;
        replayed += 1;

        match &outcome {
            Ok(disposition) if args.json => println!(
                "{}",
                serde_json::to_string(&ReplayLine {
                    line: line_no,
                    result: Some(disposition),
                    error: None,
                })?
            ),
            Ok(disposition) => println!("{line_no}: {disposition:?}"),
            Err(e) if args.json => println!(
                "{}",
                serde_json::to_string(&ReplayLine {
                    line: line_no,
                    result: None,
                    error: Some(e.to_string()),
                })?
            ),
            Err(e) => {
                warn!("Line {line_no} failed: {e}");
                println!("{line_no}: error: {e}");
            }
        }
    }

    let jobs = jobs.take();
    info!(
        "Replayed {replayed} message(s), {} stored, {} job(s) enqueued",
        backend.messages().await.len(),
        jobs.len()
    );
    for job in &jobs {
        if args.json {
            println!("{}", serde_json::to_string(job)?);
        } else {
            println!("job: {job:?}");
        }
    }
    Ok(())
}

fn now_millis() -> u64 {
    u64::try_from(chrono::Utc::now().timestamp_millis()).unwrap_or_default()
}

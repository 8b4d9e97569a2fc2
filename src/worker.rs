//! Job-queue adapter: one JSON job per input line, one JSON result per output
//! line, in the serverless `{id, input: {operation, params}}` shape.

use std::time::Instant;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{info, warn};

use crate::{
    dispatcher::{Dispatcher, Job, params_or_empty},
    envelope::Envelope,
    error::ServiceError,
};

#[derive(Debug, Clone, Deserialize)]
pub struct QueueJob {
    #[serde(default)]
    pub id: Option<String>,
    pub input: QueueInput,
}

#[derive(Debug, Clone, Deserialize)]
pub struct QueueInput {
    pub operation: String,
    #[serde(default, deserialize_with = "params_or_empty")]
    pub params: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueResult {
    pub id: Option<String>,
    pub output: Envelope,
}

impl QueueJob {
    pub fn into_job(self) -> Job {
        let mut job = Job::new(self.input.operation, self.input.params);
        if let Some(id) = self.id {
            job.id = id;
        }
        job
    }
}

/// Process one raw queue message.
pub async fn handle_line(dispatcher: &Dispatcher, line: &str) -> QueueResult {
    let started = Instant::now();
    match serde_json::from_str::<QueueJob>(line) {
        Ok(queued) => {
            let id = queued.id.clone();
            let output = dispatcher.dispatch_job(queued.into_job()).await;
            QueueResult { id, output }
        }
        Err(err) => {
            let err = ServiceError::BadRequest(format!("malformed job: {err}"));
            let id = salvage_id(line);
            warn!(error = %err, job_id = ?id, "rejecting queue message");
            QueueResult {
                id,
                output: Envelope::failure(&err, started.elapsed().as_millis() as u64),
            }
        }
    }
}

/// The `id` of a message that failed to parse as a job, if it has one.
fn salvage_id(line: &str) -> Option<String> {
    let raw: Value = serde_json::from_str(line).ok()?;
    match raw.get("id")? {
        Value::String(id) => Some(id.clone()),
        Value::Number(id) => Some(id.to_string()),
        _ => None,
    }
}

/// Drain `reader` until EOF, answering each non-blank line on `writer`.
pub async fn run<R, W>(dispatcher: &Dispatcher, reader: R, mut writer: W) -> Result<usize, ServiceError>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut lines = reader.lines();
    let mut processed = 0usize;

    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        let result = handle_line(dispatcher, &line).await;
        let mut encoded = serde_json::to_vec(&result)
            .map_err(|e| ServiceError::BadRequest(format!("unencodable result: {e}")))?;
        encoded.push(b'\n');
        writer.write_all(&encoded).await?;
        writer.flush().await?;
        processed += 1;
    }

    info!(processed, "job queue drained");
    Ok(processed)
}

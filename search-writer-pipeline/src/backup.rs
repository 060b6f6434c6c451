//! Backup and restore of whole indices.
//!
//! A backup is a gzip-compressed file with one raw search hit per line
//! (`_id`, `_type`, `_routing`, `_version`, `_source`). Restoring indexes
//! every hit again with its id, type and routing; versions are not enforced.
//!
//! File and gzip work runs on the blocking pool and talks to the async side
//! through a bounded channel.

use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;
use std::sync::Arc;

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, info, instrument, warn};

use search_writer_repository::{queries, SearchApiClient};
use search_writer_shared::{Operation, SearchHit, StatusSummary};

use crate::bulk::{BulkWriteBuffer, BulkWriterConfig};
use crate::errors::PipelineError;
use crate::scroll::{ScrollConfig, ScrollCursor};
use crate::status::LoggingStatusHandler;

const PROGRESS_EVERY: u64 = 10_000;
const CHANNEL_CAPACITY: usize = 1024;

/// Write every document of `index` to `path`. Returns the number of hits written.
#[instrument(skip(client, scroll, path), fields(path = %path.display()))]
pub async fn backup(
    client: &SearchApiClient,
    index: &str,
    path: &Path,
    scroll: &ScrollConfig,
) -> Result<u64, PipelineError> {
    let mut cursor = ScrollCursor::open(client.clone(), index, queries::match_all(), scroll).await?;

    let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
    let target = path.to_path_buf();
    let sink = tokio::task::spawn_blocking(move || write_backup(&target, rx));

    let sent = send_hits(&mut cursor, &tx).await;
    drop(tx);
    if let Err(e) = cursor.close().await {
        warn!(error = %e, "Failed to clear backup scroll");
    }

    let written = sink.await??;
    sent?;

    info!(index = %index, written = written, "Backup complete");
    Ok(written)
}

async fn send_hits(cursor: &mut ScrollCursor, tx: &mpsc::Sender<Value>) -> Result<u64, PipelineError> {
    let expected = cursor.total();
    let mut sent = 0u64;
    while let Some(hit) = cursor.next_raw().await? {
        if tx.send(hit).await.is_err() {
            break;
        }
        sent += 1;
        if sent % PROGRESS_EVERY == 0 {
            debug!(sent = sent, expected = expected, "Backup progress");
        }
    }
    Ok(sent)
}

fn write_backup(path: &Path, mut rx: mpsc::Receiver<Value>) -> Result<u64, PipelineError> {
    let file = File::create(path)?;
    let mut out = GzEncoder::new(BufWriter::new(file), Compression::default());

    let mut written = 0u64;
    while let Some(hit) = rx.blocking_recv() {
        serde_json::to_writer(&mut out, &hit)?;
        out.write_all(b"\n")?;
        written += 1;
    }

    out.finish()?.flush()?;
    Ok(written)
}

/// Index every hit stored in the backup at `path` into `index`.
#[instrument(skip(client, config, path), fields(path = %path.display()))]
pub async fn restore(
    client: &SearchApiClient,
    index: &str,
    path: &Path,
    config: BulkWriterConfig,
) -> Result<StatusSummary, PipelineError> {
    let handler = Arc::new(LoggingStatusHandler::new(format!("restore {}", index)));
    let writer = BulkWriteBuffer::new(client.clone(), index, handler, config)?;

    let (tx, mut rx) = mpsc::channel(CHANNEL_CAPACITY);
    let source = path.to_path_buf();
    let reader = tokio::task::spawn_blocking(move || read_backup(&source, tx));

    let scheduled = schedule_restore(&mut rx, &writer).await;
    drop(rx);
    let summary = writer.close().await?;

    reader.await??;
    let scheduled = scheduled?;

    info!(index = %index, scheduled = scheduled, ok = summary.ok, errors = summary.errors, "Restore complete");
    Ok(summary)
}

async fn schedule_restore(
    rx: &mut mpsc::Receiver<SearchHit>,
    writer: &BulkWriteBuffer,
) -> Result<u64, PipelineError> {
    let mut scheduled = 0u64;
    while let Some(hit) = rx.recv().await {
        let mut op = Operation::index(Some(hit.id), hit.source);
        op.doc_type = hit.doc_type;
        op.routing = hit.routing;
        writer.enqueue(op).await?;
        scheduled += 1;
    }
    Ok(scheduled)
}

/// Parse the backup line by line. Stops early once the receiver is gone.
fn read_backup(path: &Path, tx: mpsc::Sender<SearchHit>) -> Result<u64, PipelineError> {
    let reader = BufReader::new(GzDecoder::new(File::open(path)?));

    let mut read = 0u64;
    for (n, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let hit: SearchHit = serde_json::from_str(&line).map_err(|e| {
            PipelineError::validation(format!("backup line {} is not a search hit: {}", n + 1, e))
        })?;
        if tx.blocking_send(hit).is_err() {
            break;
        }
        read += 1;
    }
    Ok(read)
}

//! `contractfill replay`: apply a recorded block stream.
//!
//! The file holds one [`StreamMessage`] per line; blank lines and lines
//! starting with `#` are skipped. Blocks already committed by the reader are
//! skipped, so an interrupted replay can simply be restarted.

use std::path::Path;

use anyhow::{Context, Result};
use futures::stream;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;
use tracing::warn;

use contractfill_core::{Filler, FillerError, Notification, StreamMessage, StreamSource};

pub async fn run(mut filler: Filler, printer: Option<JoinHandle<()>>, blocks: &Path) -> Result<()> {
    let text = tokio::fs::read_to_string(blocks)
        .await
        .with_context(|| format!("read block file '{}'", blocks.display()))?;

    let messages = parse_lines(&text);
    let mut source = StreamSource::new(stream::iter(messages));
    let summary = filler.run(&mut source).await.context("replay blocks")?;
    filler.shutdown();
    // Dropping the filler closes the relay, which ends the printer.
    drop(filler);
    if let Some(printer) = printer {
        if let Err(e) = printer.await {
            warn!(error = %e, "notification printer failed");
        }
    }

    println!(
        "replayed {} block(s), skipped {}, {} fork(s), last block {}",
        summary.blocks,
        summary.skipped,
        summary.forks,
        summary
            .last_block
            .map_or_else(|| "-".to_string(), |b| b.to_string())
    );
    Ok(())
}

fn parse_lines(text: &str) -> Vec<Result<StreamMessage, FillerError>> {
    text.lines()
        .enumerate()
        .filter(|(_, line)| {
            let line = line.trim();
            !line.is_empty() && !line.starts_with('#')
        })
        .map(|(index, line)| {
            serde_json::from_str(line).map_err(|e| {
                FillerError::Other(format!("block file line {}: {e}", index + 1))
            })
        })
        .collect()
}

/// Print every notification as one JSON line until the relay closes.
pub async fn print_notifications(mut rx: broadcast::Receiver<Notification>) {
    loop {
        match rx.recv().await {
            Ok(notification) => match serde_json::to_string(&notification) {
                Ok(line) => println!("{line}"),
                Err(e) => warn!(error = %e, "unprintable notification"),
            },
            Err(RecvError::Lagged(missed)) => warn!(missed, "notification printer lagged"),
            Err(RecvError::Closed) => break,
        }
    }
}

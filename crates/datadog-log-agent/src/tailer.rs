// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, AsyncSeekExt, BufReader, SeekFrom};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::buffer::LogBuffer;
use crate::processor::LineProcessor;
use crate::registry::TailRegistry;

/// Tails one file. Each instance runs as its own task and exclusively owns
/// its file handle; the only state it shares is the registry entry that maps
/// its path to a cancellation token.
///
/// Opening seeks to end-of-file: content present before startup is never
/// re-read. A size drop below the tracked offset is treated as
/// truncation: the handle is reopened and reading restarts at byte 0.
/// Rotate-by-rename is not distinguished from truncation; a fresh file
/// appearing under the same name is simply re-read from the start.
pub struct Tailer {
    path: PathBuf,
    registry: Arc<TailRegistry>,
    processor: Arc<LineProcessor>,
    buffer: LogBuffer,
    poll_interval: Duration,
    cancel: CancellationToken,
    offset: u64,
    last_modified: Option<SystemTime>,
    /// Unterminated trailing line carried across read passes.
    partial: String,
}

impl Tailer {
    pub fn new(
        path: PathBuf,
        registry: Arc<TailRegistry>,
        processor: Arc<LineProcessor>,
        buffer: LogBuffer,
        poll_interval: Duration,
        cancel: CancellationToken,
    ) -> Self {
        Tailer {
            path,
            registry,
            processor,
            buffer,
            poll_interval,
            cancel,
            offset: 0,
            last_modified: None,
            partial: String::new(),
        }
    }

    pub async fn run(mut self) {
        let mut reader = match self.open(SeekFrom::End(0)).await {
            Ok(reader) => reader,
            Err(err) => {
                if err.kind() == io::ErrorKind::NotFound {
                    debug!("File {} gone before tailing started", self.path.display());
                } else {
                    error!("Failed to open {}: {err}", self.path.display());
                }
                self.registry.remove(&self.path).await;
                return;
            }
        };
        debug!(
            "Tailing {} from offset {}",
            self.path.display(),
            self.offset
        );

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    debug!("Tailer for {} cancelled", self.path.display());
                    return;
                }
                _ = tokio::time::sleep(self.poll_interval) => {}
            }

            let metadata = match tokio::fs::metadata(&self.path).await {
                Ok(metadata) => metadata,
                Err(err) if err.kind() == io::ErrorKind::NotFound => {
                    debug!("File {} disappeared, closing tailer", self.path.display());
                    self.registry.remove(&self.path).await;
                    return;
                }
                Err(err) => {
                    // Transient stat failure: keep the tailer alive.
                    debug!("Failed to stat {}: {err}", self.path.display());
                    continue;
                }
            };

            let size = metadata.len();
            if size < self.offset {
                warn!(
                    "File {} truncated ({} < {}), resetting to start",
                    self.path.display(),
                    size,
                    self.offset
                );
                reader = match self.open(SeekFrom::Start(0)).await {
                    Ok(reader) => reader,
                    Err(err) => {
                        if err.kind() == io::ErrorKind::NotFound {
                            self.registry.remove(&self.path).await;
                            return;
                        }
                        error!("Failed to reopen {}: {err}", self.path.display());
                        continue;
                    }
                };
                self.partial.clear();
            }

            let modified = metadata.modified().ok();
            let advanced = match (modified, self.last_modified) {
                (Some(current), Some(previous)) => current > previous,
                (Some(_), None) => true,
                _ => false,
            };

            if size > self.offset || advanced {
                if let Err(err) = self.read_pass(&mut reader).await {
                    error!("Read error on {}: {err}", self.path.display());
                    continue;
                }
                self.last_modified = modified;
            }
        }
    }

    async fn open(&mut self, position: SeekFrom) -> io::Result<BufReader<File>> {
        let mut file = File::open(&self.path).await?;
        self.offset = file.seek(position).await?;
        Ok(BufReader::new(file))
    }

    /// Reads complete newline-terminated lines and hands them to the
    /// processor. An unterminated trailing line stays buffered for the next
    /// pass. The offset tracks the stream position and never moves backwards
    /// outside the truncation reset.
    async fn read_pass(&mut self, reader: &mut BufReader<File>) -> io::Result<()> {
        loop {
            let mut line = String::new();
            let read = reader.read_line(&mut line).await?;
            if read == 0 {
                return Ok(());
            }
            self.offset += read as u64;

            if line.ends_with('\n') {
                let complete = if self.partial.is_empty() {
                    line
                } else {
                    self.partial.push_str(&line);
                    std::mem::take(&mut self.partial)
                };
                if let Some(entry) = self.processor.process(&self.path, &complete) {
                    self.buffer.push(entry);
                }
            } else {
                self.partial.push_str(&line);
            }
        }
    }
}

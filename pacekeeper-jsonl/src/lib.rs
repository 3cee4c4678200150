//! JSONL sink for `pacekeeper` limiter events. Writes one event per line.
//!
//! Each line is the object produced by [`event_to_json`], e.g.
//! `{"kind":"circuit_opened","failures":5}`. The file is opened in append mode per event, so
//! external log rotation is safe.

use pacekeeper::telemetry::{event_to_json, LimiterEvent, TelemetrySink};
use std::io;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::task::{Context, Poll};

/// Appends limiter events to a file as JSON lines.
#[derive(Clone, Debug)]
pub struct JsonlSink {
    path: PathBuf,
}

impl JsonlSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Destination file.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl tower_service::Service<LimiterEvent> for JsonlSink {
    type Response = ();
    type Error = io::Error;
    type Future = Pin<Box<dyn std::future::Future<Output = Result<(), Self::Error>> + Send>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, event: LimiterEvent) -> Self::Future {
        let path = self.path.clone();
        let line = event_to_json(&event).to_string() + "\n";
        Box::pin(async move {
            use tokio::io::AsyncWriteExt;
            let result = async {
                let mut file =
                    tokio::fs::OpenOptions::new().create(true).append(true).open(&path).await?;
                file.write_all(line.as_bytes()).await?;
                file.flush().await
            }
            .await;
            if let Err(e) = &result {
                tracing::warn!(
                    target: "pacekeeper::jsonl",
                    path = %path.display(),
                    error = %e,
                    "failed to append limiter event"
                );
            }
            result
        })
    }
}

impl TelemetrySink for JsonlSink {
    type SinkError = io::Error;
}

//! Continuous change feed reader.
//!
//! [`ChangeFeed::start`] opens `_changes?feed=continuous` at the
//! database's current update sequence, so no historical backlog is
//! replayed, and spawns a task that hands every non-empty line to a
//! callback in receipt order. Empty lines are the server's heartbeats
//! and are dropped.
//!
//! [`ChangeFeed::stop`] cancels the reader and waits for it; once it
//! returns the callback is never invoked again, even for lines that were
//! already buffered.

use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::error::StoreError;
use crate::store::DocumentStore;

/// A running (or finished) change feed reader.
#[derive(Debug)]
pub struct ChangeFeed {
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl ChangeFeed {
    /// Connect to the store's continuous feed and start forwarding lines.
    ///
    /// Fails if the database info or the feed request fails; no reader
    /// is spawned in that case.
    pub async fn start<S, F>(store: &S, on_line: F) -> Result<Self, StoreError>
    where
        S: DocumentStore + ?Sized,
        F: FnMut(String) + Send + 'static,
    {
        let info = store.info().await?;
        let lines = store.open_changes(&info.update_seq).await?;

        tracing::info!(
            db = %info.db_name,
            since = %info.update_seq,
            "Change feed connected",
        );

        Ok(Self::from_reader(lines, on_line))
    }

    /// Forward lines from an already-open feed body.
    pub fn from_reader<R, F>(reader: R, on_line: F) -> Self
    where
        R: AsyncBufRead + Unpin + Send + 'static,
        F: FnMut(String) + Send + 'static,
    {
        let cancel = CancellationToken::new();
        let task = tokio::spawn(read_lines(reader, on_line, cancel.clone()));
        Self {
            cancel,
            task: Some(task),
        }
    }

    /// Whether the reader task is still consuming the feed.
    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_finished())
    }

    /// Close the feed. No callback runs after this returns.
    pub async fn stop(&mut self) {
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                tracing::error!(error = %e, "Change feed reader panicked");
            }
        }
    }
}

impl Drop for ChangeFeed {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Reader loop: runs until cancellation, end of stream, or a read error.
async fn read_lines<R, F>(reader: R, mut on_line: F, cancel: CancellationToken)
where
    R: AsyncBufRead + Unpin,
    F: FnMut(String),
{
    let mut lines = reader.lines();

    loop {
        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            next = lines.next_line() => next,
        };

        match next {
            Ok(Some(line)) => {
                let line = line.trim();
                if line.is_empty() {
                    tracing::trace!("Change feed heartbeat");
                    continue;
                }
                if cancel.is_cancelled() {
                    break;
                }
                on_line(line.to_string());
            }
            Ok(None) => {
                tracing::info!("Change feed closed by server");
                break;
            }
            Err(e) => {
                tracing::error!(error = %e, "Change feed read error");
                break;
            }
        }
    }
}

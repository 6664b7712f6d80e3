//! Bounded-concurrency batch executor for tool calls.
//!
//! The scheduler takes pending call records, runs each through the registry
//! under a shared semaphore and per-call timeout, and returns the finished
//! records in the order they were submitted. One slow or failing call never
//! affects its batch mates; an unknown tool or a panicking task becomes a
//! failed record rather than an error.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, warn};

use crate::error::ToolError;
use crate::session::ToolCallRecord;
use crate::tools::ToolRegistry;

/// Fans tool-call batches out over a capped number of concurrent tasks.
pub struct ToolScheduler {
    registry: Arc<ToolRegistry>,
    concurrency: usize,
    timeout: Duration,
}

impl ToolScheduler {
    /// Create a scheduler with the given concurrency cap and default
    /// per-call timeout.
    pub fn new(registry: Arc<ToolRegistry>, concurrency: usize, timeout_ms: u64) -> Self {
        Self {
            registry,
            concurrency: concurrency.max(1),
            timeout: Duration::from_millis(timeout_ms),
        }
    }

    /// The registry this scheduler dispatches into.
    pub fn registry(&self) -> &Arc<ToolRegistry> {
        &self.registry
    }

    /// Run a batch of pending records with the default timeout.
    pub async fn run_batch(&self, records: Vec<ToolCallRecord>) -> Vec<ToolCallRecord> {
        self.run_batch_with_timeout(records, self.timeout).await
    }

    /// Run a batch of pending records, finishing each one.
    ///
    /// Results come back in submission order and keep the submitted record
    /// ids, so callers can correlate them with a previously persisted
    /// pending snapshot.
    pub async fn run_batch_with_timeout(
        &self,
        records: Vec<ToolCallRecord>,
        timeout: Duration,
    ) -> Vec<ToolCallRecord> {
        if records.is_empty() {
            return Vec::new();
        }

        debug!(
            batch = records.len(),
            concurrency = self.concurrency,
            timeout_ms = timeout.as_millis(),
            "Dispatching tool batch"
        );

        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let mut set = JoinSet::new();

        for (index, record) in records.iter().enumerate() {
            let record = record.clone();
            let registry = Arc::clone(&self.registry);
            let semaphore = Arc::clone(&semaphore);

            set.spawn(async move {
                let _permit = match semaphore.acquire_owned().await {
                    Ok(permit) => permit,
                    Err(_) => {
                        return (index, record.failed("scheduler semaphore closed", 0));
                    }
                };

                let Some(tool) = registry.get(&record.tool_name) else {
                    let message = ToolError::UnknownTool {
                        name: record.tool_name.clone(),
                    }
                    .to_string();
                    warn!(tool = %record.tool_name, "Skipping unknown tool");
                    return (index, record.failed(message, 0));
                };

                let started = Instant::now();
                let result = tokio::time::timeout(timeout, tool.run(&record.args)).await;
                let elapsed_ms = started.elapsed().as_millis() as i64;

                let finished = match result {
                    Err(_) => {
                        warn!(
                            tool = %record.tool_name,
                            timeout_ms = timeout.as_millis(),
                            "Tool call timed out"
                        );
                        record.timed_out(elapsed_ms)
                    }
                    Ok(Err(e)) => {
                        warn!(tool = %record.tool_name, error = %e, "Tool call failed");
                        record.failed(e.to_string(), elapsed_ms)
                    }
                    Ok(Ok(outcome)) if outcome.success => record.succeeded(outcome.data, elapsed_ms),
                    Ok(Ok(outcome)) => {
                        let message = outcome
                            .error
                            .unwrap_or_else(|| "tool reported failure".to_string());
                        warn!(tool = %record.tool_name, error = %message, "Tool reported failure");
                        record.failed(message, elapsed_ms)
                    }
                };

                (index, finished)
            });
        }

        let mut finished: Vec<Option<ToolCallRecord>> = records.iter().map(|_| None).collect();
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok((index, record)) => finished[index] = Some(record),
                Err(e) => warn!(error = %e, "Tool task aborted"),
            }
        }

        finished
            .into_iter()
            .zip(records)
            .map(|(slot, original)| {
                slot.unwrap_or_else(|| original.failed("tool task aborted", 0))
            })
            .collect()
    }
}

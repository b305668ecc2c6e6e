use anyhow::Result;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::{JoinError, JoinHandle};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use super::channel::bounded;
use super::collector::{Collector, CollectorStats, TickProcessor};
use super::writer::{BatchWriter, RetryPolicy, WriterStats};
use crate::config::PipelineConfig;
use crate::metrics::PipelineMetrics;
use crate::model::tick::Tick;
use crate::sink::BatchSink;
use crate::source::TickSource;

/// Terminal state of one pipeline task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskOutcome<T> {
    Stopped(T),
    Failed(String),
    Panicked(String),
}

impl<T> TaskOutcome<T> {
    fn from_join(res: Result<Result<T>, JoinError>) -> Self {
        match res {
            Ok(Ok(stats)) => Self::Stopped(stats),
            Ok(Err(e)) => Self::Failed(format!("{:#}", e)),
            Err(e) if e.is_panic() => Self::Panicked(e.to_string()),
            Err(e) => Self::Failed(e.to_string()),
        }
    }

    pub fn is_failure(&self) -> bool {
        !matches!(self, Self::Stopped(_))
    }

    pub fn stats(&self) -> Option<&T> {
        match self {
            Self::Stopped(stats) => Some(stats),
            _ => None,
        }
    }

    fn reason(&self) -> Option<&str> {
        match self {
            Self::Stopped(_) => None,
            Self::Failed(msg) | Self::Panicked(msg) => Some(msg),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopCause {
    /// The configured run duration elapsed.
    Elapsed,
    /// The supervisor's token was cancelled from outside (e.g. Ctrl+C).
    Cancelled,
    /// A task finished before the deadline.
    TaskExited,
}

#[derive(Debug, Clone)]
pub struct RunReport {
    pub elapsed: Duration,
    pub cause: StopCause,
    pub collector: TaskOutcome<CollectorStats>,
    pub writer: TaskOutcome<WriterStats>,
}

impl RunReport {
    pub fn is_clean(&self) -> bool {
        !self.collector.is_failure() && !self.writer.is_failure()
    }

    /// First failed task and its reason; the collector is checked first.
    pub fn failure(&self) -> Option<(&'static str, &str)> {
        if let Some(reason) = self.collector.reason() {
            return Some(("collector", reason));
        }
        self.writer.reason().map(|reason| ("writer", reason))
    }
}

impl fmt::Display for RunReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ran for {} seconds then stopped", self.elapsed.as_secs())?;
        match self.failure() {
            Some((task, reason)) => write!(f, " ({} failed: {})", task, reason),
            None => Ok(()),
        }
    }
}

/// Owns the collector/writer lifecycle for one stream.
pub struct Supervisor {
    pipeline: PipelineConfig,
    retry: RetryPolicy,
    metrics: Arc<PipelineMetrics>,
    cancel: CancellationToken,
}

impl Supervisor {
    pub fn new(pipeline: PipelineConfig, metrics: Arc<PipelineMetrics>) -> Self {
        Self {
            pipeline,
            retry: RetryPolicy::none(),
            metrics,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Token that stops the current run early when cancelled.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Run collector and writer for `pipeline.run_seconds`, or until one of
    /// them exits or the supervisor token fires. Both tasks are always awaited;
    /// their errors are reported, never re-raised.
    pub async fn run<S, K>(&self, source: S, sink: K) -> RunReport
    where
        S: TickSource + 'static,
        K: BatchSink + 'static,
    {
        let started = Instant::now();
        let run_cancel = self.cancel.child_token();
        let (tx, rx) = bounded::<Tick>(self.pipeline.channel_capacity);

        let processor = TickProcessor::new(
            self.pipeline.max_price_jump,
            self.pipeline.qty_window_seconds,
        );
        let collector = Collector::new(source, tx, processor, Arc::clone(&self.metrics));
        let writer = BatchWriter::new(
            sink,
            rx,
            self.pipeline.batch_size,
            Arc::clone(&self.metrics),
        )
        .with_flush_on_cancel(self.pipeline.flush_on_cancel)
        .with_retry(self.retry);

        tracing::info!(
            run_seconds = self.pipeline.run_seconds,
            channel_capacity = self.pipeline.channel_capacity,
            batch_size = self.pipeline.batch_size,
            "Pipeline started"
        );

        let mut collector_task: JoinHandle<Result<CollectorStats>> =
            tokio::spawn(collector.run(run_cancel.clone()));
        let mut writer_task: JoinHandle<Result<WriterStats>> =
            tokio::spawn(writer.run(run_cancel.clone()));

        let mut collector_res = None;
        let mut writer_res = None;
        let cause = tokio::select! {
            _ = tokio::time::sleep(self.pipeline.run_duration()) => StopCause::Elapsed,
            _ = self.cancel.cancelled() => StopCause::Cancelled,
            res = &mut collector_task => {
                collector_res = Some(res);
                StopCause::TaskExited
            }
            res = &mut writer_task => {
                writer_res = Some(res);
                StopCause::TaskExited
            }
        };

        run_cancel.cancel();
        let collector_res = match collector_res {
            Some(res) => res,
            None => collector_task.await,
        };
        let writer_res = match writer_res {
            Some(res) => res,
            None => writer_task.await,
        };

        let report = RunReport {
            elapsed: started.elapsed(),
            cause,
            collector: TaskOutcome::from_join(collector_res),
            writer: TaskOutcome::from_join(writer_res),
        };
        match report.failure() {
            Some((task, reason)) => {
                tracing::error!(task, reason, ?cause, "Pipeline stopped with failure");
            }
            None => {
                tracing::info!(
                    elapsed_s = report.elapsed.as_secs(),
                    ?cause,
                    "Pipeline stopped"
                );
            }
        }
        report
    }
}

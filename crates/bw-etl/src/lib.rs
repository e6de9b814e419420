//! # BW ETL - Concurrent Multi-Stage Pipelines
//!
//! This crate chains stages into a pipeline where every stage runs at the
//! same time, each on its own blocking worker, connected to its neighbours by
//! bounded queues. The last stage is a sink, typically a
//! [`BulkWriter`](bw_io::BulkWriter).
//!
//! ## Stages
//!
//! - **start_with**: emits the items of an iterator or a stream
//! - **aggregate**: folds the whole upstream sequence into one value
//! - **pivot**: expands each item into zero or more items
//! - **project**: maps each item to one item
//! - **transform_in_place**: mutates each item
//! - **write_to**: hands everything left to a [`PipelineSink`]
//!
//! Each stage method takes a closure; the `_with` variants take an
//! implementation of [`Aggregator`], [`Pivot`], [`Projector`] or
//! [`Transformer`].
//!
//! ## Failure handling
//!
//! A failing stage closes its output queue, so the stages after it drain
//! what they already have and finish normally. Stages before it stop quietly.
//! Every failure, panics included, ends up in the [`PipelineError`] returned
//! by [`EtlPipeline::execute_async`].
//!
//! ## Example Usage
//!
//! ```rust
//! use bw_etl::{CollectingSink, EtlPipeline};
//!
//! # #[tokio::main(flavor = "multi_thread")]
//! # async fn main() -> anyhow::Result<()> {
//! let sink = CollectingSink::new();
//! EtlPipeline::start_with(1..=10)
//!     .project(|n: i32| Ok(n * n))
//!     .aggregate(|squares| Ok(squares.sum::<i32>()))
//!     .write_to(sink.clone())
//!     .execute_async()
//!     .await?;
//! assert_eq!(sink.take(), vec![385]);
//! # Ok(())
//! # }
//! ```

mod pipeline;
mod sink;
mod stage;
mod transforms;

pub use pipeline::{EtlPipeline, PipelineStep};
pub use sink::{CollectingSink, PipelineSink};
pub use stage::Consuming;
pub use transforms::{Aggregator, Pivot, Projector, Transformer};

use bw_core::BulkWriterError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Pipeline settings, loadable from YAML
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineOptions {
    /// Bound of each queue between two stages. Zero is treated as one.
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
    /// Emit the per-step start and completion events
    #[serde(default = "default_log_steps")]
    pub log_steps: bool,
}

fn default_channel_capacity() -> usize {
    8
}

fn default_log_steps() -> bool {
    true
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            channel_capacity: default_channel_capacity(),
            log_steps: default_log_steps(),
        }
    }
}

impl PipelineOptions {
    pub fn from_yaml_str(yaml: &str) -> anyhow::Result<Self> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    fn capacity(&self) -> usize {
        self.channel_capacity.max(1)
    }
}

/// One stage that did not finish cleanly
#[derive(Debug)]
pub struct StageFailure {
    /// 1-based position in the pipeline
    pub step: usize,
    /// `start`, `aggregate`, `pivot`, `project`, `transform` or `sink`
    pub stage: &'static str,
    pub error: anyhow::Error,
}

impl StageFailure {
    pub fn is_cancelled(&self) -> bool {
        matches!(
            self.error.downcast_ref::<BulkWriterError>(),
            Some(BulkWriterError::Cancelled)
        )
    }
}

impl fmt::Display for StageFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "step {} ({}): {:#}", self.step, self.stage, self.error)
    }
}

/// Every stage failure of one pipeline run, ordered by step
#[derive(Debug, thiserror::Error)]
#[error("{} pipeline step(s) failed: {}", .failures.len(), describe(.failures))]
pub struct PipelineError {
    failures: Vec<StageFailure>,
}

fn describe(failures: &[StageFailure]) -> String {
    failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

impl PipelineError {
    pub(crate) fn new(failures: Vec<StageFailure>) -> Self {
        Self { failures }
    }

    pub fn failures(&self) -> &[StageFailure] {
        &self.failures
    }

    pub fn into_failures(self) -> Vec<StageFailure> {
        self.failures
    }

    /// True when every failure is a cancellation
    pub fn is_cancelled(&self) -> bool {
        self.failures.iter().all(StageFailure::is_cancelled)
    }
}

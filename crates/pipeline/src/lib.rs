//! Multi-step transformation pipelines.
//!
//! A [`Pipeline`] runs named stages one at a time, feeding each stage's
//! output into the next, with an optional final reflection stage. Stages
//! delegate the actual transformation to a [`StepExecutor`]. The
//! [`PipelineCatalog`] knows the standard stage layout of every job kind.

pub mod catalog;
pub mod executor;
pub mod pipeline;
pub mod remote;

pub use catalog::{ExecutorFactory, PipelineCatalog, PipelineFactory};
pub use executor::{step_fn, StepContext, StepExecutor, StepFailure};
pub use pipeline::{
    NoopObserver, Pipeline, PipelineError, PipelineErrorKind, PipelineObserver, PipelineOutput,
};
pub use remote::{RemoteExecutorFactory, RemoteStepError, RemoteStepExecutor};

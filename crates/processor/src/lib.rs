pub mod deriver;
pub mod initiator;
pub mod pipeline;
pub mod publish;
pub mod task;

pub use deriver::{CompletionTimeDeriver, CompletionTimeProcessing};
pub use pipeline::{CompletionPipeline, PipelineConfig, RetryPolicy, WorkItem};

pub mod error;
pub mod progress;
pub mod request;
pub mod runner;

pub use error::PipelineError;
pub use progress::{NoopProgress, ProgressEvent, ProgressReporter};
pub use request::{ExtractionReport, ExtractionRequest};
pub use runner::IngestionPipeline;

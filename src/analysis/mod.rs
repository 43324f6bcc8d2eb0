pub mod adapters;
pub mod error;
pub mod pipeline;
pub mod ports;
pub mod prompts;
pub mod stage;
pub mod types;
pub mod validation;

pub use error::{AnalysisError, AnalysisErrorKind};
pub use pipeline::{AnalysisPorts, Orchestrator};
pub use stage::{FailurePolicy, StageDescriptor, StageName, StagePlan};
pub use types::{AnalysisRecord, AnalysisResponse, Framework, PipelineConfig};
pub use validation::RawAnalysisRequest;

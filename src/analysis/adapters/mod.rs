pub mod embedding;
pub mod evaluator;
pub mod output;
pub mod reasoning;
pub mod retriever;
pub mod safety;

pub use embedding::InferenceEmbedder;
pub use evaluator::InferenceEvaluator;
pub use reasoning::InferenceReasoner;
pub use retriever::{IndexSettings, OpenSearchRetriever};
pub use safety::InferenceSafetyFilter;

pub mod client;
pub mod credentials;
pub mod error;
pub mod http_common;
pub mod reliability;
pub mod types;

pub use client::InferenceClient;
pub use error::{InferenceError, InferenceErrorKind};

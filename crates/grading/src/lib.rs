//! Essay grading core: request validation, prompt rendering, reply
//! validation and result aggregation. No I/O happens here.

pub mod request;
pub mod prompt;
pub mod result;
pub mod reply;
pub mod aggregate;

pub use aggregate::*;
pub use prompt::{build_grading_prompt, prompt_fingerprint};
pub use reply::*;
pub use request::*;
pub use result::*;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum GradingError {
    #[error("model did not return valid JSON: {0}")]
    InvalidJson(String),
    #[error("model reply is not a JSON object")]
    NotAnObject,
}

pub type Result<T> = std::result::Result<T, GradingError>;

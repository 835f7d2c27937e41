mod environment;
/// HTTP error envelope and request extraction errors
pub mod error;

pub use environment::Environment;
pub use error::{AppError, FormExtractionError};

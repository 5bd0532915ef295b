//! Context window management.
//!
//! Long conversations are kept under the model's context limit by replacing
//! the whole history with a model-written summary.
//!
//! # Overview
//!
//! 1. Count tokens of the curated history through the provider
//! 2. Compare against the model's known context limit
//! 3. At or above the threshold, ask the model for a summary
//! 4. Replace history with the summary request and the summary
//!
//! # Configuration
//!
//! Use [`CompressionConfig`] to customize compression:
//! - `threshold`: fraction of the context limit that triggers compression
//! - `summary_prompt`: the request sent to obtain the summary
//! - `token_limit`: override for models missing from the built-in table

mod compressor;
mod config;
mod estimator;

pub use compressor::{ChatCompressionInfo, ChatCompressor};
pub use config::{CompressionConfig, DEFAULT_COMPRESSION_THRESHOLD, DEFAULT_SUMMARY_PROMPT};
pub use estimator::TokenEstimator;

//! Invocation pipeline.
//!
//! [`Executor::invoke`] takes a signature, host-side arguments and an
//! optional result name, and walks the [`InvocationState`] machine:
//!
//! 1. image arguments are converted to matrices over their ROI,
//! 2. the cataloged callable runs (panics are caught),
//! 3. a non-void result is published under the result name, matrices
//!    becoming new host images,
//! 4. converted arguments are written back into their images at the ROI
//!    offset.
//!
//! All open images stay locked for the whole invocation.

mod executor;
mod state;

pub use executor::{Argument, Executor, InvocationOutcome};
pub use state::InvocationState;

use crate::error::ConversionError;
use crate::value::Value;

/// Parse user-entered text for each parameter type, as a parameter form
/// would before invoking.
///
/// Fails if the counts differ or any text does not parse.
pub fn parse_arguments(params: &[String], texts: &[&str]) -> Result<Vec<Value>, ConversionError> {
    if params.len() != texts.len() {
        return Err(ConversionError::DataLength {
            expected: params.len(),
            actual: texts.len(),
        });
    }
    params
        .iter()
        .zip(texts)
        .map(|(param, text)| Value::parse(text, param))
        .collect()
}

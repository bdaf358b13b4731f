pub mod actions;
pub mod health;
pub mod ingest;
pub mod queries;

use crate::error::{FeedbackError, Result};
use crate::model::validate_step_number;

/// Step numbers arrive as path segments; parse them into the same
/// structured validation error the JSON bodies produce.
pub(crate) fn parse_step_number(raw: &str) -> Result<u32> {
    let n: i64 = raw
        .parse()
        .map_err(|_| FeedbackError::Validation(format!("step_number {:?} is not an integer", raw)))?;
    validate_step_number(n)
}

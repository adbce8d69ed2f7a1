//! # Domain Models
//!
//! Validated inputs for an analysis run.
//!
//! | Type | Description |
//! |------|-------------|
//! | [`Symbol`] | Validated, uppercase ticker |
//! | [`AnalysisRequest`] | Symbol plus optional free-form question and locale |

mod request;
mod symbol;

pub use request::AnalysisRequest;
pub use symbol::Symbol;

//! Caller-facing composition requests and their validation.

/// Request schema (background, layers, targets).
pub mod model;
/// Consistency checks producing a [`validate::NormalizedRequest`].
pub mod validate;

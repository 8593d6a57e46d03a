//! Typed stage sequences and the builder that produces them.

/// Pure fold from a normalized request to a [`stage::StagePlan`].
pub mod builder;
/// Stage variants, logical buffer references and plan fingerprints.
pub mod stage;

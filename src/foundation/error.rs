use std::fmt;

/// Result alias used throughout the engine.
pub type StratumResult<T> = Result<T, StratumError>;

/// Top-level error taxonomy.
///
/// Validation and pipeline-init errors are raised synchronously at submission, before any device
/// memory is touched. Resource, stage-execution and encoding errors abort a running job and are
/// surfaced through its terminal status.
#[derive(thiserror::Error, Debug)]
pub enum StratumError {
    /// Request is inconsistent (resolution, frame rate, duration, z-order).
    #[error("validation error: {0}")]
    Validation(#[from] ValidationError),

    /// Device buffer allocation failed (out of device memory, context lost).
    #[error("resource error: {stage}: {reason} ({bytes} bytes requested)")]
    Resource {
        /// Stage (or admission step) that requested the memory.
        stage: String,
        /// Size of the failed request in bytes.
        bytes: u64,
        /// Device-reported reason.
        reason: String,
    },

    /// The stage sequence cannot be realized by the device backend.
    #[error("pipeline init error: {0}")]
    PipelineInit(String),

    /// A device operation failed mid-tick.
    #[error("stage execution error at frame {frame} ({stage}): {reason}")]
    StageExecution {
        /// Output frame index being produced.
        frame: u64,
        /// Stage that failed.
        stage: String,
        /// Failure description.
        reason: String,
    },

    /// The encode sink rejected a frame.
    #[error("encoding error: {0}")]
    Encoding(String),

    /// Request (de)serialization failed.
    #[error("serialization error: {0}")]
    Serde(String),

    /// I/O and other plumbing failures.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Fieldless classification of [`StratumError`], for caller-side retry policies.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// See [`StratumError::Validation`].
    Validation,
    /// See [`StratumError::Resource`].
    Resource,
    /// See [`StratumError::PipelineInit`].
    PipelineInit,
    /// See [`StratumError::StageExecution`].
    StageExecution,
    /// See [`StratumError::Encoding`].
    Encoding,
    /// See [`StratumError::Serde`].
    Serde,
    /// See [`StratumError::Other`].
    Other,
}

impl StratumError {
    pub fn resource(stage: impl Into<String>, bytes: u64, reason: impl Into<String>) -> Self {
        Self::Resource {
            stage: stage.into(),
            bytes,
            reason: reason.into(),
        }
    }

    pub fn pipeline_init(msg: impl Into<String>) -> Self {
        Self::PipelineInit(msg.into())
    }

    pub fn stage_execution(
        frame: u64,
        stage: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self::StageExecution {
            frame,
            stage: stage.into(),
            reason: reason.into(),
        }
    }

    pub fn encoding(msg: impl Into<String>) -> Self {
        Self::Encoding(msg.into())
    }

    pub fn serde(msg: impl Into<String>) -> Self {
        Self::Serde(msg.into())
    }

    /// Classify this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation(_) => ErrorKind::Validation,
            Self::Resource { .. } => ErrorKind::Resource,
            Self::PipelineInit(_) => ErrorKind::PipelineInit,
            Self::StageExecution { .. } => ErrorKind::StageExecution,
            Self::Encoding(_) => ErrorKind::Encoding,
            Self::Serde(_) => ErrorKind::Serde,
            Self::Other(_) => ErrorKind::Other,
        }
    }

    /// Borrow the validation detail when this is a validation failure.
    pub fn as_validation(&self) -> Option<&ValidationError> {
        match self {
            Self::Validation(v) => Some(v),
            _ => None,
        }
    }
}

/// Which part of a request a validation failure refers to.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SourceRole {
    /// The request as a whole (targets, layer set).
    Request,
    /// The background source.
    Background,
    /// A layer, by declaration index and source name.
    Layer {
        /// Index into `CompositionRequest::layers`.
        index: usize,
        /// Name of the layer's media source.
        name: String,
    },
}

impl fmt::Display for SourceRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Request => f.write_str("request"),
            Self::Background => f.write_str("background"),
            Self::Layer { index, name } => write!(f, "layer #{index} '{name}'"),
        }
    }
}

/// The attribute that failed validation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum MismatchAttribute {
    Resolution,
    FrameRate,
    Duration,
    ZOrder,
    /// Target values themselves are unusable (zero size, zero duration, bad opacity).
    Target,
}

impl fmt::Display for MismatchAttribute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Resolution => "resolution",
            Self::FrameRate => "frame rate",
            Self::Duration => "duration",
            Self::ZOrder => "z-order",
            Self::Target => "target",
        })
    }
}

/// Structured validation failure: the offending source and the mismatched attribute.
#[derive(thiserror::Error, Clone, Debug, PartialEq, Eq)]
#[error("{role}: {attribute}: {detail}")]
pub struct ValidationError {
    /// Offending source.
    pub role: SourceRole,
    /// Attribute that did not match.
    pub attribute: MismatchAttribute,
    /// Human-readable expected/actual description.
    pub detail: String,
}

impl ValidationError {
    pub fn new(role: SourceRole, attribute: MismatchAttribute, detail: impl Into<String>) -> Self {
        Self {
            role,
            attribute,
            detail: detail.into(),
        }
    }
}

#[cfg(test)]
#[path = "../../tests/unit/foundation/error.rs"]
mod tests;

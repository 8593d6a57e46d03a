//! Output side: codec selection and the sinks that consume composited frames.

/// Output codec identifiers and their ffmpeg parameter sets.
pub mod codec;
/// `ffmpeg`-backed MP4 sink.
pub mod ffmpeg;
/// Sink trait and in-memory sinks.
pub mod sink;

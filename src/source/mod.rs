//! Media descriptors and the adapters that turn them into uniform RGBA8 frames.

/// Frame source trait and built-in adapters.
pub mod adapter;
/// `ffprobe` metadata and the `ffmpeg` video decoder.
pub mod ffmpeg;
/// Resize policies applied while normalizing to the target resolution.
pub mod fit;
/// Caller-facing media descriptors.
pub mod media;

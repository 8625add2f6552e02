//! Sink side of the pipeline: frame pooling, the threaded sink and its sample writers.

#[cfg(feature = "media-ffmpeg")]
pub mod ffmpeg;
pub mod pool;
pub mod threaded;
pub mod writer;

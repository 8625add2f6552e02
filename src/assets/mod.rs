//! Concrete [`Asset`](crate::media::asset::Asset) implementations.

#[cfg(feature = "media-ffmpeg")]
pub mod ffmpeg;
pub mod synthetic;

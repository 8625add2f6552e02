//! Collaborator contracts between the orchestrator and the decode/encode machinery.
//!
//! The orchestrator never demuxes, decodes, encodes or muxes by itself. It drives an [`Asset`]'s
//! [`MediaSource`] and a [`MediaSink`] through these traits, one [`TrackOutput`] /
//! [`TrackInput`] pair per media kind.

/// Assets and their tracks.
pub mod asset;
/// Source/sink traits and their status enums.
pub mod pipeline;
/// Decoded frames, PCM buffers and timed samples.
pub mod sample;

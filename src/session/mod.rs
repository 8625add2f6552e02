//! Export sessions: orchestration of one asset-to-file transcode.

/// Session lifecycle, configuration and the per-run orchestrator.
pub mod export;
/// The per-track sample pump.
pub mod pump;
/// Serial work queues backing runs and callbacks.
pub mod queue;

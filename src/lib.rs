//! # avsync
//!
//! An audio/video synchronization engine and its test harness. The crate
//! drives playback against two independent clocks -- a high-precision
//! periodic video timer and an audio device's buffer-completion callbacks --
//! and reconciles drift between them so a video renderer is pumped exactly
//! once per intended frame, in order, at the correct cadence.
//!
//! The audio backend itself, platform file decoding, and the video renderer
//! are external collaborators: this crate only specifies the interfaces it
//! needs from them ([`pipeline::backend::PlaybackBackend`]) and drives them.

pub mod config;
pub mod constants;
pub mod error;
pub mod event;
pub mod format;
pub mod harness;
pub mod pipeline;
pub mod scheduler;

pub use config::HarnessConfig;
pub use error::PipelineError;
pub use event::Event;
pub use format::{AudioChunk, AudioFormat};
pub use harness::{Harness, HarnessSummary, VideoParameters};

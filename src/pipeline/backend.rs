//! The seam between the pipeline and an actual playback device.
//!
//! Grounded on the original `Audiblizer`'s direct OpenAL calls (`alGenBuffers`,
//! `alBufferData`, `alSourceQueueBuffers`, `alGetSourcei(AL_BUFFERS_PROCESSED)`,
//! `alSourceUnqueueBuffers`, `alGetSourcei(AL_SOURCE_STATE)`, `alSourcePlay`)
//! and on the teacher's own seam around `rodio::Sink` in its worker
//! `ThreadContext`: a trait boundary lets tests swap in an in-memory double
//! instead of opening a real output device.

use crate::error::PipelineError;
use crate::format::AudioChunk;

/// Opaque handle a [`PlaybackBackend`] hands back for a queued buffer.
/// Mirrors an OpenAL buffer name (`ALuint`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BufferId(pub u64);

/// Minimal device surface the pipeline needs from a real playback backend.
///
/// Implementations own the actual device/source/buffer lifecycle; the
/// pipeline only tracks bookkeeping (duration, ordering, completion).
pub trait PlaybackBackend: Send {
    /// Open the device and create a source. Called once.
    fn initialize(&mut self) -> Result<(), PipelineError>;

    /// Upload a chunk's PCM data into a new buffer and queue it on the
    /// source. Returns the backend's id for the new buffer.
    fn queue(&mut self, chunk: &AudioChunk) -> Result<BufferId, PipelineError>;

    /// Drain buffers the device has finished playing, oldest first.
    fn poll_processed(&mut self) -> Result<Vec<BufferId>, PipelineError>;

    /// Query whether the source is currently in the `Playing` state.
    /// Mirrors `alGetSourcei(AL_SOURCE_STATE)`.
    fn is_playing(&mut self) -> Result<bool, PipelineError>;

    /// Transition the source to `Playing`. Mirrors `alSourcePlay`. Called
    /// by the pipeline only when [`PlaybackBackend::is_playing`] just
    /// reported `false`.
    fn play(&mut self) -> Result<(), PipelineError>;

    /// Stop playback and unqueue/delete all buffers still resident on the
    /// source, returning the ids that were still outstanding.
    fn stop(&mut self) -> Result<Vec<BufferId>, PipelineError>;
}

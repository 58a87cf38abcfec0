//! PCM audio format and chunk descriptors.

/// Closed set of PCM formats the pipeline accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AudioFormat {
    None,
    Mono8,
    Mono16,
    Stereo8,
    Stereo16,
}

impl AudioFormat {
    /// Byte length of one multi-channel frame (1/2/2/4 for the four real
    /// formats, 0 for `None`).
    pub fn frame_byte_length(self) -> u32 {
        match self {
            Self::None => 0,
            Self::Mono8 => 1,
            Self::Mono16 => 2,
            Self::Stereo8 => 2,
            Self::Stereo16 => 4,
        }
    }

    /// Scalar sample count per frame (1/1/2/2 for the four real formats).
    pub fn frame_datum_length(self) -> u32 {
        match self {
            Self::None => 0,
            Self::Mono8 => 1,
            Self::Mono16 => 1,
            Self::Stereo8 => 2,
            Self::Stereo16 => 2,
        }
    }
}

/// Immutable descriptor for one PCM chunk handed to the pipeline.
///
/// `data` is caller-owned memory whose ownership transfers to the pipeline
/// on a successful [`crate::pipeline::Pipeline::queue_audio`] insert, and
/// from there to the completion listener (or the pipeline itself) on
/// completion.
#[derive(Debug, Clone)]
pub struct AudioChunk {
    pub format: AudioFormat,
    pub sample_rate: u32,
    pub data: std::sync::Arc<[u8]>,
}

impl AudioChunk {
    /// Validate the submission invariants: format != None, sample rate > 0,
    /// byte length > 0 and divisible by the format's frame byte length.
    pub fn validate(&self) -> Result<(), String> {
        if self.format == AudioFormat::None {
            return Err("format must not be None".to_string());
        }
        if self.sample_rate == 0 {
            return Err("sample rate must be > 0".to_string());
        }
        if self.data.is_empty() {
            return Err("byte length must be > 0".to_string());
        }
        let frame_len = self.format.frame_byte_length();
        if self.data.len() as u32 % frame_len != 0 {
            return Err(format!(
                "byte length {} is not a multiple of frame byte length {}",
                self.data.len(),
                frame_len
            ));
        }
        Ok(())
    }

    /// Duration in seconds: `byte_length / (frame_byte_length * sample_rate)`.
    pub fn duration_seconds(&self) -> f64 {
        let frame_len = self.format.frame_byte_length() as f64;
        if frame_len == 0.0 || self.sample_rate == 0 {
            return 0.0;
        }
        self.data.len() as f64 / (frame_len * self.sample_rate as f64)
    }

    /// Duration in truncated milliseconds, matching the original's
    /// integer-division accounting for the pipeline's running total.
    pub fn duration_millis(&self) -> u64 {
        let frame_len = self.format.frame_byte_length() as u64;
        if frame_len == 0 || self.sample_rate == 0 {
            return 0;
        }
        (self.data.len() as u64 * 1000) / (frame_len * self.sample_rate as u64)
    }
}

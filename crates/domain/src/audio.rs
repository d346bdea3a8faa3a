//! PCM utterance buffers and the WAV decode path used by the
//! reliable-channel audio fallback.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Audio container/encoding formats on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AudioFormat {
    Pcm,
    Mp3,
    Ogg,
    Wav,
}

impl AudioFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            AudioFormat::Pcm => "pcm",
            AudioFormat::Mp3 => "mp3",
            AudioFormat::Ogg => "ogg",
            AudioFormat::Wav => "wav",
        }
    }
}

impl std::fmt::Display for AudioFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One buffered user utterance: mono 16-bit PCM at a declared sample rate.
#[derive(Debug, Clone, PartialEq)]
pub struct UtteranceAudio {
    pub sample_rate: u32,
    pub samples: Vec<i16>,
}

impl UtteranceAudio {
    pub fn new(sample_rate: u32, samples: Vec<i16>) -> Self {
        Self {
            sample_rate,
            samples,
        }
    }

    pub fn duration_ms(&self) -> u64 {
        if self.sample_rate == 0 {
            return 0;
        }
        self.samples.len() as u64 * 1_000 / self.sample_rate as u64
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Decode a WAV payload into a mono utterance buffer.
    ///
    /// Accepts 16-bit integer PCM; multi-channel input keeps channel 0.
    pub fn from_wav_bytes(bytes: &[u8]) -> Result<Self> {
        let mut reader = hound::WavReader::new(std::io::Cursor::new(bytes))
            .map_err(|e| Error::InvalidAudioFormat(format!("not a WAV payload: {e}")))?;
        let spec = reader.spec();
        if spec.sample_format != hound::SampleFormat::Int || spec.bits_per_sample != 16 {
            return Err(Error::InvalidAudioFormat(format!(
                "expected 16-bit integer PCM, got {}-bit {:?}",
                spec.bits_per_sample, spec.sample_format
            )));
        }

        let channels = spec.channels.max(1) as usize;
        let mut samples = Vec::with_capacity(reader.len() as usize / channels);
        for (i, sample) in reader.samples::<i16>().enumerate() {
            let sample =
                sample.map_err(|e| Error::InvalidAudioFormat(format!("corrupt WAV data: {e}")))?;
            if i % channels == 0 {
                samples.push(sample);
            }
        }

        Ok(Self {
            sample_rate: spec.sample_rate,
            samples,
        })
    }

    /// Raw little-endian PCM bytes, as carried on the media channel.
    pub fn pcm_le_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.samples.len() * 2);
        for s in &self.samples {
            out.extend_from_slice(&s.to_le_bytes());
        }
        out
    }
}

/// Synthesized speech returned by a TTS provider.
#[derive(Debug, Clone)]
pub struct SpeechAudio {
    pub format: AudioFormat,
    pub sample_rate: u32,
    pub data: Vec<u8>,
}

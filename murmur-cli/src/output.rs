//! WAV sink for the streamed audio.

use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use hound::{SampleFormat, WavSpec, WavWriter};
use murmur_core::AudioChunk;

/// Writes 16-bit mono PCM. The file is created lazily on the first
/// non-empty chunk so that a session with no audio leaves nothing behind.
/// Every chunk must share the first chunk's sample rate.
pub struct WavSink {
    path: PathBuf,
    writer: Option<WavWriter<BufWriter<File>>>,
    sample_rate: u32,
    samples: u64,
}

impl WavSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            writer: None,
            sample_rate: 0,
            samples: 0,
        }
    }

    pub fn write(&mut self, chunk: &AudioChunk) -> Result<()> {
        if chunk.is_empty() {
            return Ok(());
        }
        if self.writer.is_none() {
            let spec = WavSpec {
                channels: 1,
                sample_rate: chunk.sample_rate,
                bits_per_sample: 16,
                sample_format: SampleFormat::Int,
            };
            let writer = WavWriter::create(&self.path, spec)
                .with_context(|| format!("creating {}", self.path.display()))?;
            self.writer = Some(writer);
            self.sample_rate = chunk.sample_rate;
        } else if chunk.sample_rate != self.sample_rate {
            bail!(
                "sample rate changed mid-stream ({} Hz -> {} Hz)",
                self.sample_rate,
                chunk.sample_rate
            );
        }

        if let Some(writer) = self.writer.as_mut() {
            for &s in &chunk.samples {
                writer.write_sample(to_i16(s))?;
            }
            self.samples += chunk.samples.len() as u64;
        }
        Ok(())
    }

    pub fn duration_secs(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.samples as f64 / f64::from(self.sample_rate)
    }

    /// Finalize the header. Returns the path if anything was written.
    pub fn finish(self) -> Result<Option<PathBuf>> {
        match self.writer {
            Some(writer) => {
                writer
                    .finalize()
                    .with_context(|| format!("finalizing {}", self.path.display()))?;
                Ok(Some(self.path))
            }
            None => Ok(None),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn to_i16(sample: f32) -> i16 {
    (sample.clamp(-1.0, 1.0) * f32::from(i16::MAX)).round() as i16
}

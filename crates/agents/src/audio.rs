//! PCM audio frames and sample-rate conversion for the session pipeline.

use bytes::Bytes;
use rubato::{FastFixedIn, PolynomialDegree, Resampler};

/// Sample rate of the room-side audio bridge.
pub const ROOM_SAMPLE_RATE: u32 = 48000;

/// A chunk of little-endian 16-bit PCM audio.
#[derive(Clone, Debug, PartialEq)]
pub struct AudioFrame {
    pub data: Bytes,
    pub sample_rate: u32,
    pub channels: u16,
}

impl AudioFrame {
    pub fn new(data: Bytes, sample_rate: u32, channels: u16) -> Self {
        Self {
            data,
            sample_rate,
            channels,
        }
    }

    pub fn from_samples(samples: &[i16], sample_rate: u32, channels: u16) -> Self {
        let mut data = Vec::with_capacity(samples.len() * 2);
        for sample in samples {
            data.extend_from_slice(&sample.to_le_bytes());
        }
        Self {
            data: data.into(),
            sample_rate,
            channels,
        }
    }

    pub fn samples(&self) -> Vec<i16> {
        self.data
            .chunks_exact(2)
            .map(|chunk| i16::from_le_bytes([chunk[0], chunk[1]]))
            .collect()
    }

    pub fn duration_ms(&self) -> u64 {
        let samples_per_channel = self.data.len() as u64 / 2 / self.channels.max(1) as u64;
        samples_per_channel * 1000 / self.sample_rate.max(1) as u64
    }
}

/// Converts a slice of f32 samples to a vector of i16 samples.
pub fn convert_f32_to_i16(pcm32: &[f32]) -> Vec<i16> {
    pcm32
        .iter()
        .map(|&sample| (sample * i16::MAX as f32).clamp(i16::MIN as f32, i16::MAX as f32) as i16)
        .collect()
}

/// Converts a slice of i16 samples to a vector of f32 samples.
pub fn convert_i16_to_f32(pcm16: &[i16]) -> Vec<f32> {
    pcm16
        .iter()
        .map(|&sample| sample as f32 / 32768.0)
        .collect()
}

/// Mono PCM rate converter with internal chunking.
///
/// The underlying resampler works on fixed-size input blocks, so samples
/// are buffered until a full block is available. Tail samples shorter
/// than one block stay pending until [`PcmResampler::flush`].
pub struct PcmResampler {
    inner: FastFixedIn<f32>,
    pending: Vec<f32>,
    chunk_size: usize,
    in_rate: u32,
    out_rate: u32,
}

impl PcmResampler {
    pub fn new(in_rate: u32, out_rate: u32) -> anyhow::Result<Self> {
        let chunk_size = 1024;
        let inner = FastFixedIn::<f32>::new(
            out_rate as f64 / in_rate as f64,
            1.0,
            PolynomialDegree::Cubic,
            chunk_size,
            1,
        )?;
        Ok(Self {
            inner,
            pending: Vec::new(),
            chunk_size,
            in_rate,
            out_rate,
        })
    }

    pub fn in_rate(&self) -> u32 {
        self.in_rate
    }

    pub fn out_rate(&self) -> u32 {
        self.out_rate
    }

    /// Feeds samples in; returns whatever full blocks produced.
    pub fn process(&mut self, samples: &[i16]) -> Vec<i16> {
        if self.in_rate == self.out_rate {
            return samples.to_vec();
        }
        self.pending.extend(convert_i16_to_f32(samples));
        let mut resampled = Vec::new();
        while self.pending.len() >= self.chunk_size {
            let block: Vec<f32> = self.pending.drain(..self.chunk_size).collect();
            if let Ok(out) = self.inner.process(&[block], None) {
                resampled.extend_from_slice(&out[0]);
            }
        }
        convert_f32_to_i16(&resampled)
    }

    /// Drains pending samples by zero-padding to one block.
    pub fn flush(&mut self) -> Vec<i16> {
        if self.pending.is_empty() || self.in_rate == self.out_rate {
            self.pending.clear();
            return Vec::new();
        }
        self.pending.resize(self.chunk_size, 0.0);
        let block: Vec<f32> = self.pending.drain(..).collect();
        match self.inner.process(&[block], None) {
            Ok(out) => convert_f32_to_i16(&out[0]),
            Err(_) => Vec::new(),
        }
    }
}

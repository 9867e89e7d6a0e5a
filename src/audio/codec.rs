//! PCM16 wire codec
//!
//! The speech service speaks little-endian PCM16 wrapped in base64: capture
//! frames go out quantized from f32, reply chunks come back the other way.

use crate::error::{VoiceError, VoiceResult};
use base64::Engine;

/// Quantize float samples in [-1, 1] to signed 16-bit PCM.
///
/// Symmetric scaling: negative samples scale by 32768, positive by 32767
/// (rounded), saturated at the i16 range. Out-of-range input is clamped
/// first.
pub fn quantize(samples: &[f32]) -> Vec<i16> {
    samples
        .iter()
        .map(|&s| {
            let s = s.clamp(-1.0, 1.0);
            let scaled = if s < 0.0 {
                s * 32768.0
            } else {
                (s * 32767.0).round()
            };
            scaled as i16
        })
        .collect()
}

/// Expand PCM16 samples back to f32 in [-1, 1).
pub fn dequantize(samples: &[i16]) -> Vec<f32> {
    samples.iter().map(|&s| s as f32 / 32768.0).collect()
}

/// Encode a captured block as transport-ready base64 PCM16.
///
/// Zero-length blocks are an encoding error; the caller drops them, they
/// are never delivered.
pub fn encode_frame(samples: &[f32]) -> VoiceResult<String> {
    if samples.is_empty() {
        return Err(VoiceError::Encoding("empty capture frame".to_string()));
    }

    let pcm_bytes: Vec<u8> = quantize(samples)
        .iter()
        .flat_map(|s| s.to_le_bytes())
        .collect();

    Ok(base64::engine::general_purpose::STANDARD.encode(pcm_bytes))
}

/// Decode a base64 PCM16 chunk into float samples.
///
/// Invalid base64 and odd byte counts are decode errors; the caller drops
/// the chunk and continues.
pub fn decode_chunk(data: &str) -> VoiceResult<Vec<f32>> {
    let bytes = base64::engine::general_purpose::STANDARD.decode(data)?;

    if bytes.len() % 2 != 0 {
        return Err(VoiceError::Decode(format!(
            "PCM16 payload has odd byte count: {}",
            bytes.len()
        )));
    }

    let samples: Vec<i16> = bytes
        .chunks_exact(2)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
        .collect();

    Ok(dequantize(&samples))
}

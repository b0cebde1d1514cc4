//! Audio codec layer
//!
//! Pure byte-buffer transforms between the telephony leg (G.711 μ-law at
//! 8 kHz) and the linear PCM the upstream services consume. Everything here
//! is stateless and infallible.

/// μ-law companding bias.
const BIAS: i32 = 0x84;
/// Largest linear magnitude representable before clipping.
const CLIP: i32 = 32_635;

fn encode_sample(pcm: i16) -> u8 {
    let mut sample = i32::from(pcm);
    let sign: u8 = if sample < 0 {
        sample = -sample;
        0x80
    } else {
        0
    };
    if sample > CLIP {
        sample = CLIP;
    }
    sample += BIAS;

    // Segment number: position of the highest set bit among bits 7..14.
    let mut exponent: u8 = 7;
    let mut mask = 0x4000;
    while exponent > 0 && (sample & mask) == 0 {
        mask >>= 1;
        exponent -= 1;
    }
    let mantissa = ((sample >> (exponent + 3)) & 0x0F) as u8;

    !(sign | (exponent << 4) | mantissa)
}

fn decode_sample(byte: u8) -> i16 {
    let byte = !byte;
    let sign = byte & 0x80;
    let exponent = (byte >> 4) & 0x07;
    let mantissa = i32::from(byte & 0x0F);

    let magnitude = (((mantissa << 3) + BIAS) << exponent) - BIAS;
    if sign != 0 {
        (-magnitude) as i16
    } else {
        magnitude as i16
    }
}

/// Decode a μ-law buffer to signed 16-bit little-endian PCM.
pub fn mulaw_decode(buf: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(buf.len() * 2);
    for &byte in buf {
        out.extend_from_slice(&decode_sample(byte).to_le_bytes());
    }
    out
}

/// Encode little-endian PCM16 to μ-law, one byte per sample.
///
/// A trailing odd byte is ignored.
pub fn mulaw_encode(pcm: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(pcm.len() / 2);
    for chunk in pcm.chunks_exact(2) {
        let sample = i16::from_le_bytes([chunk[0], chunk[1]]);
        out.push(encode_sample(sample));
    }
    out
}

/// Upsample 8 kHz PCM16LE to 16 kHz by sample duplication (zero-order hold).
///
/// Chosen for minimum latency; every even output sample equals the input
/// sample, every odd one repeats its predecessor.
pub fn upsample_8k_to_16k(pcm: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(pcm.len() * 2);
    for chunk in pcm.chunks_exact(2) {
        out.extend_from_slice(chunk);
        out.extend_from_slice(chunk);
    }
    out
}

/// Wrap raw PCM16LE samples in a canonical 44-byte RIFF/WAVE header.
pub fn wrap_wav(pcm: &[u8], sample_rate: u32, channels: u16, bits_per_sample: u16) -> Vec<u8> {
    let byte_rate = sample_rate * u32::from(channels) * u32::from(bits_per_sample) / 8;
    let block_align = channels * bits_per_sample / 8;
    let data_size = pcm.len() as u32;

    let mut out = Vec::with_capacity(44 + pcm.len());
    out.extend_from_slice(b"RIFF");
    out.extend_from_slice(&(36 + data_size).to_le_bytes());
    out.extend_from_slice(b"WAVE");
    out.extend_from_slice(b"fmt ");
    out.extend_from_slice(&16u32.to_le_bytes());
    out.extend_from_slice(&1u16.to_le_bytes()); // PCM format code
    out.extend_from_slice(&channels.to_le_bytes());
    out.extend_from_slice(&sample_rate.to_le_bytes());
    out.extend_from_slice(&byte_rate.to_le_bytes());
    out.extend_from_slice(&block_align.to_le_bytes());
    out.extend_from_slice(&bits_per_sample.to_le_bytes());
    out.extend_from_slice(b"data");
    out.extend_from_slice(&data_size.to_le_bytes());
    out.extend_from_slice(pcm);
    out
}

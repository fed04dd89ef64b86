//! G.711 μ-law companding
//!
//! The media stream transport carries 8-bit μ-law samples. Encoding must be
//! bit-exact with the far end, so this follows the ITU-T reference: sign bit,
//! 3-bit segment, 4-bit mantissa, bias of 0x84 and clipping at 32635, with
//! the resulting code word inverted.

/// Bias added to the magnitude before segment search
const BIAS: i32 = 0x84;

/// Largest magnitude representable before the bias is applied
const CLIP: i32 = 32_635;

/// Decoded value of every possible code word
const DECODE_TABLE: [i16; 256] = build_decode_table();

/// Encode one 16-bit linear sample to a μ-law code word
#[must_use]
pub fn encode(sample: i16) -> u8 {
    let mut magnitude = i32::from(sample);
    let sign: i32 = if magnitude < 0 {
        magnitude = -magnitude;
        0x80
    } else {
        0x00
    };

    magnitude = magnitude.min(CLIP) + BIAS;

    let mut exponent: i32 = 7;
    let mut mask: i32 = 0x4000;
    while exponent > 0 && magnitude & mask == 0 {
        exponent -= 1;
        mask >>= 1;
    }

    let mantissa = (magnitude >> (exponent + 3)) & 0x0F;

    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let code = !(sign | (exponent << 4) | mantissa) as u8;
    code
}

/// Decode one μ-law code word to a 16-bit linear sample
#[must_use]
pub const fn decode(code: u8) -> i16 {
    DECODE_TABLE[code as usize]
}

/// Encode a slice of linear samples
#[must_use]
pub fn encode_samples(samples: &[i16]) -> Vec<u8> {
    samples.iter().map(|&s| encode(s)).collect()
}

/// Decode a slice of μ-law code words
#[must_use]
pub fn decode_samples(codes: &[u8]) -> Vec<i16> {
    codes.iter().map(|&c| decode(c)).collect()
}

/// Width of the quantization interval a code word represents
///
/// Round-tripping a sample never moves it further than this from its
/// original value.
#[must_use]
pub const fn quantization_step(code: u8) -> i32 {
    let exponent = ((!code) >> 4) & 0x07;
    1 << (exponent + 3)
}

#[allow(clippy::cast_possible_truncation)]
const fn decode_reference(code: u8) -> i16 {
    let inverted = !code;
    let exponent = (inverted >> 4) & 0x07;
    let mantissa = (inverted & 0x0F) as i32;

    let magnitude = (((mantissa << 3) + BIAS) << exponent) - BIAS;

    if inverted & 0x80 == 0 {
        magnitude as i16
    } else {
        -magnitude as i16
    }
}

const fn build_decode_table() -> [i16; 256] {
    let mut table = [0i16; 256];
    let mut code = 0usize;
    while code < 256 {
        #[allow(clippy::cast_possible_truncation)]
        let byte = code as u8;
        table[code] = decode_reference(byte);
        code += 1;
    }
    table
}

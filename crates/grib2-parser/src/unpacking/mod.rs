//! GRIB2 data unpacking.
//!
//! Simple packing (template 5.0) is decoded here. Other packings are handed
//! to the `grib` crate by [`crate::Grib2Message::unpack_data`].

use crate::Grib2Error;

/// Unpack simple packed GRIB2 data.
///
/// `value = (R + X * 2^E) * 10^-D`. Points cleared in the bitmap, or all
/// points when no packed bits remain, come back as NaN.
pub fn unpack_simple(
    packed_data: &[u8],
    num_points: usize,
    bits_per_value: u8,
    reference_value: f32,
    binary_scale_factor: i16,
    decimal_scale_factor: i16,
    bitmap: Option<&[u8]>,
) -> Result<Vec<f32>, Grib2Error> {
    let present = |i: usize| match bitmap {
        Some(bm) => bm
            .get(i / 8)
            .map(|byte| (byte >> (7 - (i % 8))) & 1 == 1)
            .unwrap_or(false),
        None => true,
    };

    let decimal_scale = 10f64.powi(-(decimal_scale_factor as i32));
    if bits_per_value == 0 {
        let constant = (reference_value as f64 * decimal_scale) as f32;
        return Ok((0..num_points)
            .map(|i| if present(i) { constant } else { f32::NAN })
            .collect());
    }
    if bits_per_value > 32 {
        return Err(Grib2Error::Unpacking(format!(
            "invalid bits per value: {}",
            bits_per_value
        )));
    }

    let binary_scale = 2f64.powi(binary_scale_factor as i32);
    let reference = reference_value as f64;
    let bits = bits_per_value as usize;

    let mut values = Vec::with_capacity(num_points);
    let mut bit_position = 0;
    for i in 0..num_points {
        // Only present points are packed
        if !present(i) {
            values.push(f32::NAN);
            continue;
        }
        let packed = extract_bits(packed_data, bit_position, bits)?;
        bit_position += bits;
        values.push(((reference + packed as f64 * binary_scale) * decimal_scale) as f32);
    }

    Ok(values)
}

/// Extract `num_bits` bits starting at `start_bit`, MSB first.
fn extract_bits(data: &[u8], start_bit: usize, num_bits: usize) -> Result<u32, Grib2Error> {
    let end_bit = start_bit + num_bits;
    if end_bit.div_ceil(8) > data.len() {
        return Err(Grib2Error::Unpacking(format!(
            "packed data ends at byte {}, need bit {}",
            data.len(),
            end_bit
        )));
    }

    let mut result = 0u32;
    for absolute_bit in start_bit..end_bit {
        let bit = (data[absolute_bit / 8] >> (7 - (absolute_bit % 8))) & 1;
        result = (result << 1) | bit as u32;
    }
    Ok(result)
}

// SLAC
// Copyright (c) 2025 The Project SLAC Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The `coder` module implements the residual entropy coder: an adaptive recursive
//! Rice/Golomb code whose parameters evolve by exponential moving average, with a Gamma
//! escape for outliers.

use slac_core::errors::Result;
use slac_core::io::{BitReader, BitWriter};
use slac_core::util::bits::{
    log2_ceil, log2_ceil_u64, round_up_pow2, signed_to_unsigned, unsigned_to_signed,
};

/// Number of recursion levels of the Rice coder.
pub const NUM_RECURSIVE_RICE_PARAMETERS: usize = 3;

/// Unary quotients at or above this value switch to the Gamma escape.
const QUOTPART_THRESHOLD: u32 = 16;

/// When the cross-channel average of the first-order initial parameters is at or below this
/// value, residuals are coded with a fixed Golomb code instead of the adaptive Rice code.
const LOW_THRESHOLD_PARAMETER: u64 = 6;

/// Fractional bits of the Q24.8 parameter state.
const FRACTION_BITS: u32 = 8;

/// 0.5 in the Q24.8 parameter state.
const FIXED_HALF: u64 = 1 << (FRACTION_BITS - 1);

/// A Rice parameter level: the running magnitude estimate in Q24.8.
type RiceParameter = u64;

#[inline(always)]
fn to_fixed(value: u32) -> RiceParameter {
    u64::from(value) << FRACTION_BITS
}

#[inline(always)]
fn from_fixed(param: RiceParameter) -> u32 {
    ((param + FIXED_HALF) >> FRACTION_BITS) as u32
}

/// Gets a parameter level as an integer, guaranteed at least 1.
#[inline(always)]
fn parameter_get(params: &[RiceParameter], level: usize) -> u32 {
    from_fixed(params[level]).max(1)
}

/// Derives the Rice divisor of a level: half the magnitude estimate, rounded up to a power
/// of two.
#[inline(always)]
fn rice_parameter(params: &[RiceParameter], level: usize) -> u32 {
    round_up_pow2(from_fixed(params[level] >> 1).max(1))
}

/// Evolves a parameter level towards `value` by exponential moving average.
#[inline(always)]
fn parameter_update(params: &mut [RiceParameter], level: usize, value: u32) {
    params[level] = (119 * params[level] + 9 * to_fixed(value) + (1 << 6)) >> 7;
}

/// Writes the unary quotient: `quot` zero bits terminated by a one bit.
fn put_quot_part(writer: &mut BitWriter<'_>, quot: u32) -> Result<()> {
    for _ in 0..quot {
        writer.put_bit(false)?;
    }
    writer.put_bit(true)
}

/// Writes the Rice remainder of `value` for the power-of-two parameter `m`.
fn put_rest_part(writer: &mut BitWriter<'_>, value: u32, m: u32) -> Result<()> {
    debug_assert!(m != 0);
    debug_assert!(m.is_power_of_two());

    // For m == 1 the remainder is always zero and encodes in zero bits.
    if m != 1 {
        writer.put_bits(u64::from(value & (m - 1)), log2_ceil(m))?;
    }
    Ok(())
}

/// Reads the Rice remainder for the power-of-two parameter `m`.
fn get_rest_part(reader: &mut BitReader<'_>, m: u32) -> Result<u32> {
    debug_assert!(m != 0);
    debug_assert!(m.is_power_of_two());

    if m == 1 {
        return Ok(0);
    }

    Ok(reader.get_bits(log2_ceil(m))? as u32)
}

/// Writes `value` as a Golomb code with parameter `m`. Power-of-two parameters degenerate to
/// a plain Rice code; otherwise the length-balanced remainder split is used.
fn golomb_put_code(writer: &mut BitWriter<'_>, m: u32, value: u32) -> Result<()> {
    debug_assert!(m != 0);

    let quot = value / m;
    let rest = value % m;

    put_quot_part(writer, quot)?;

    if m.is_power_of_two() {
        if m > 1 {
            writer.put_bits(u64::from(rest), log2_ceil(m))?;
        }
        return Ok(());
    }

    let b = log2_ceil(m);
    let two_b = 1u32 << b;
    if rest < two_b - m {
        writer.put_bits(u64::from(rest), b - 1)?;
    }
    else {
        writer.put_bits(u64::from(rest + two_b - m), b)?;
    }

    Ok(())
}

/// Reads a Golomb code with parameter `m`.
fn golomb_get_code(reader: &mut BitReader<'_>, m: u32) -> Result<u32> {
    debug_assert!(m != 0);

    let quot = reader.get_zero_run_length()?;

    if m.is_power_of_two() {
        let rest = if m > 1 { reader.get_bits(log2_ceil(m))? as u32 } else { 0 };
        return Ok(quot * m + rest);
    }

    let b = log2_ceil(m);
    let two_b = 1u32 << b;

    let rest = reader.get_bits(b - 1)? as u32;
    if rest < two_b - m {
        Ok(quot * m + rest)
    }
    else {
        let rest = (rest << 1) + u32::from(reader.get_bit()?);
        Ok(quot * m + rest - (two_b - m))
    }
}

/// Writes `value` as an Elias Gamma code. Zero encodes as the single bit 1.
fn gamma_put_code(writer: &mut BitWriter<'_>, value: u32) -> Result<()> {
    if value == 0 {
        return writer.put_bit(true);
    }

    let n_digits = log2_ceil_u64(u64::from(value) + 2);
    writer.put_bits(0, n_digits - 1)?;
    writer.put_bits(u64::from(value) + 1, n_digits)
}

/// Reads an Elias Gamma code.
fn gamma_get_code(reader: &mut BitReader<'_>) -> Result<u32> {
    let n_digits = reader.get_zero_run_length()? + 1;

    if n_digits == 1 {
        return Ok(0);
    }

    let bits = reader.get_bits(n_digits - 1)?;
    Ok(((1u64 << (n_digits - 1)) + bits - 1) as u32)
}

/// Writes `value` with the recursive Rice code, updating every touched parameter level.
fn recursive_rice_put_code(
    writer: &mut BitWriter<'_>,
    params: &mut [RiceParameter],
    num_params: usize,
    value: u32,
) -> Result<()> {
    debug_assert!(num_params != 0);

    let mut reduced = value;

    // Descend the levels, subtracting each level's divisor, until the reduced value fits.
    for level in 0..num_params - 1 {
        let param = rice_parameter(params, level);

        if reduced < param {
            // The level index doubles as the unary quotient.
            put_quot_part(writer, level as u32)?;
            put_rest_part(writer, reduced, param)?;
            parameter_update(params, level, reduced);
            return Ok(());
        }

        parameter_update(params, level, reduced);
        reduced -= param;
    }

    // Bottom level: a plain Rice code whose quotient continues the level count. Very large
    // quotients escape to Gamma to bound the unary run.
    let level = num_params - 1;
    let tail_param = rice_parameter(params, level);
    let tail_quot = level as u32 + reduced / tail_param;

    if tail_quot < QUOTPART_THRESHOLD {
        put_quot_part(writer, tail_quot)?;
    }
    else {
        put_quot_part(writer, QUOTPART_THRESHOLD)?;
        gamma_put_code(writer, tail_quot - QUOTPART_THRESHOLD)?;
    }
    put_rest_part(writer, reduced, tail_param)?;
    parameter_update(params, level, reduced);

    Ok(())
}

/// Reads a recursive Rice code, updating every touched parameter level.
fn recursive_rice_get_code(
    reader: &mut BitReader<'_>,
    params: &mut [RiceParameter],
    num_params: usize,
) -> Result<u32> {
    debug_assert!(num_params != 0);

    let mut quot = reader.get_zero_run_length()?;

    // Sum the divisors of every level the quotient skipped over.
    let mut value = 0u32;
    let mut level = 0usize;
    while (level as u32) < quot && level < num_params - 1 {
        value += rice_parameter(params, level);
        level += 1;
    }

    if (quot as usize) < num_params - 1 {
        value += get_rest_part(reader, rice_parameter(params, level))?;
    }
    else {
        let tail_param = rice_parameter(params, level);
        if quot == QUOTPART_THRESHOLD {
            quot += gamma_get_code(reader)?;
        }
        value += tail_param * (quot - (num_params as u32 - 1)) + get_rest_part(reader, tail_param)?;
    }

    // The updates can only run once the full value is known; each level sees the value
    // reduced by the divisors above it, exactly as on the encode side.
    let mut reduced = value;
    let mut level = 0usize;
    while level as u32 <= quot && level < num_params {
        let param = rice_parameter(params, level);
        parameter_update(params, level, reduced);
        reduced = reduced.wrapping_sub(param);
        level += 1;
    }

    Ok(value)
}

/// `ResidualCoder` owns the per-channel, per-level Rice parameter state and codes
/// channel-interleaved residual arrays.
pub struct ResidualCoder {
    max_num_channels: usize,
    max_num_parameters: usize,
    params: Vec<Vec<RiceParameter>>,
    init_params: Vec<Vec<RiceParameter>>,
}

impl ResidualCoder {
    /// Instantiate a coder for up to `max_num_channels` channels and `max_num_parameters`
    /// recursion levels.
    pub fn new(max_num_channels: usize, max_num_parameters: usize) -> Self {
        ResidualCoder {
            max_num_channels,
            max_num_parameters,
            params: vec![vec![0; max_num_parameters]; max_num_channels],
            init_params: vec![vec![0; max_num_parameters]; max_num_channels],
        }
    }

    /// Derives the initial parameter of each channel from the mean folded residual
    /// magnitude, seeding every recursion level with it.
    pub fn calculate_initial_parameters(
        &mut self,
        num_parameters: usize,
        data: &[Vec<i32>],
        num_channels: usize,
        num_samples: usize,
    ) {
        debug_assert!(num_parameters <= self.max_num_parameters);
        debug_assert!(num_channels <= self.max_num_channels);
        debug_assert!(num_samples > 0);

        for ch in 0..num_channels {
            let sum: u64 =
                data[ch][..num_samples].iter().map(|&s| u64::from(signed_to_unsigned(s))).sum();
            let init = ((sum / num_samples as u64) as u32).max(1);

            for level in 0..num_parameters {
                self.params[ch][level] = to_fixed(init);
                self.init_params[ch][level] = to_fixed(init);
            }
        }
    }

    /// Writes the first-order initial parameter of `channel` in `bit_width` bits.
    pub fn put_initial_parameter(
        &self,
        writer: &mut BitWriter<'_>,
        bit_width: u32,
        channel: usize,
    ) -> Result<()> {
        let first_order = parameter_get(&self.init_params[channel], 0);
        debug_assert!(u64::from(first_order) < (1u64 << bit_width));
        writer.put_bits(u64::from(first_order), bit_width)
    }

    /// Reads the initial parameter of `channel` and seeds every recursion level with it.
    pub fn get_initial_parameter(
        &mut self,
        reader: &mut BitReader<'_>,
        num_parameters: usize,
        bit_width: u32,
        channel: usize,
    ) -> Result<()> {
        debug_assert!(num_parameters <= self.max_num_parameters);

        let first_order = reader.get_bits(bit_width)? as u32;

        for level in 0..num_parameters {
            self.params[channel][level] = to_fixed(first_order);
            self.init_params[channel][level] = to_fixed(first_order);
        }

        Ok(())
    }

    /// Writes `num_samples` residuals of every channel, interleaved sample by sample.
    ///
    /// When the cross-channel average of the initial parameters is small, each residual is
    /// coded with a fixed Golomb code; otherwise the adaptive recursive Rice code is used.
    /// The selection is derivable from the serialised initial parameters, so the decoder
    /// follows without side information.
    pub fn put_data_array(
        &mut self,
        writer: &mut BitWriter<'_>,
        num_parameters: usize,
        data: &[Vec<i32>],
        num_channels: usize,
        num_samples: usize,
    ) -> Result<()> {
        debug_assert!(num_parameters != 0 && num_parameters <= self.max_num_parameters);
        debug_assert!(num_samples != 0);
        debug_assert!(num_channels != 0);

        let param_ch_avg = self.average_first_order_parameter(num_channels);

        if param_ch_avg > LOW_THRESHOLD_PARAMETER {
            for smpl in 0..num_samples {
                for ch in 0..num_channels {
                    recursive_rice_put_code(
                        writer,
                        &mut self.params[ch],
                        num_parameters,
                        signed_to_unsigned(data[ch][smpl]),
                    )?;
                }
            }
        }
        else {
            for smpl in 0..num_samples {
                for ch in 0..num_channels {
                    golomb_put_code(
                        writer,
                        parameter_get(&self.init_params[ch], 0),
                        signed_to_unsigned(data[ch][smpl]),
                    )?;
                }
            }
        }

        Ok(())
    }

    /// Reads `num_samples` residuals of every channel, mirroring
    /// [`ResidualCoder::put_data_array`].
    pub fn get_data_array(
        &mut self,
        reader: &mut BitReader<'_>,
        num_parameters: usize,
        data: &mut [Vec<i32>],
        num_channels: usize,
        num_samples: usize,
    ) -> Result<()> {
        debug_assert!(num_parameters != 0);
        debug_assert!(num_samples != 0);

        let param_ch_avg = self.average_first_order_parameter(num_channels);

        if param_ch_avg > LOW_THRESHOLD_PARAMETER {
            for smpl in 0..num_samples {
                for ch in 0..num_channels {
                    let folded =
                        recursive_rice_get_code(reader, &mut self.params[ch], num_parameters)?;
                    data[ch][smpl] = unsigned_to_signed(folded);
                }
            }
        }
        else {
            for smpl in 0..num_samples {
                for ch in 0..num_channels {
                    let folded =
                        golomb_get_code(reader, parameter_get(&self.init_params[ch], 0))?;
                    data[ch][smpl] = unsigned_to_signed(folded);
                }
            }
        }

        Ok(())
    }

    fn average_first_order_parameter(&self, num_channels: usize) -> u64 {
        let sum: u64 =
            (0..num_channels).map(|ch| u64::from(parameter_get(&self.init_params[ch], 0))).sum();
        sum / num_channels as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn round_trip(data: &[Vec<i32>], num_samples: usize) {
        let num_channels = data.len();
        let mut buf = vec![0u8; num_channels * num_samples * 8 + 64];

        let mut encoder = ResidualCoder::new(num_channels, NUM_RECURSIVE_RICE_PARAMETERS);
        encoder.calculate_initial_parameters(
            NUM_RECURSIVE_RICE_PARAMETERS,
            data,
            num_channels,
            num_samples,
        );

        let size;
        {
            let mut writer = BitWriter::new(&mut buf);
            for ch in 0..num_channels {
                encoder.put_initial_parameter(&mut writer, 24, ch).unwrap();
            }
            encoder
                .put_data_array(
                    &mut writer,
                    NUM_RECURSIVE_RICE_PARAMETERS,
                    data,
                    num_channels,
                    num_samples,
                )
                .unwrap();
            writer.flush().unwrap();
            size = writer.tell();
        }

        let mut decoder = ResidualCoder::new(num_channels, NUM_RECURSIVE_RICE_PARAMETERS);
        let mut decoded = vec![vec![0i32; num_samples]; num_channels];

        let mut reader = BitReader::new(&buf[..size]);
        for ch in 0..num_channels {
            decoder
                .get_initial_parameter(&mut reader, NUM_RECURSIVE_RICE_PARAMETERS, 24, ch)
                .unwrap();
        }
        decoder
            .get_data_array(
                &mut reader,
                NUM_RECURSIVE_RICE_PARAMETERS,
                &mut decoded,
                num_channels,
                num_samples,
            )
            .unwrap();

        assert_eq!(data, &decoded[..]);
    }

    #[test]
    fn verify_gamma_round_trip() {
        let mut buf = [0u8; 512];
        let values = [0u32, 1, 2, 3, 5, 100, 1000, 65534, 1 << 20];

        let size;
        {
            let mut writer = BitWriter::new(&mut buf);
            for &v in &values {
                gamma_put_code(&mut writer, v).unwrap();
            }
            writer.flush().unwrap();
            size = writer.tell();
        }

        let mut reader = BitReader::new(&buf[..size]);
        for &v in &values {
            assert_eq!(gamma_get_code(&mut reader).unwrap(), v);
        }
    }

    #[test]
    fn verify_golomb_round_trip() {
        // Both power-of-two (Rice) and general parameters.
        for m in [1u32, 2, 3, 5, 7, 8, 16, 21, 100] {
            let mut buf = [0u8; 32768];
            let values: Vec<u32> = (0..256).map(|i| (i * 7) % 500).collect();

            let size;
            {
                let mut writer = BitWriter::new(&mut buf);
                for &v in &values {
                    golomb_put_code(&mut writer, m, v).unwrap();
                }
                writer.flush().unwrap();
                size = writer.tell();
            }

            let mut reader = BitReader::new(&buf[..size]);
            for &v in &values {
                assert_eq!(golomb_get_code(&mut reader, m).unwrap(), v, "m {}", m);
            }
        }
    }

    #[test]
    fn verify_adaptive_rice_round_trip() {
        // Laplacian-like residual magnitudes with slowly varying scale, two channels.
        let num_samples = 4096;
        let data: Vec<Vec<i32>> = (0..2)
            .map(|ch| {
                (0..num_samples)
                    .map(|i| {
                        let x = (i + ch * 7) as f64;
                        let scale = 60.0 + 50.0 * (0.001 * x).sin();
                        (scale * (0.37 * x).sin() * (0.051 * x).cos()) as i32
                    })
                    .collect()
            })
            .collect();

        round_trip(&data, num_samples);
    }

    #[test]
    fn verify_gamma_escape_round_trip() {
        // A quiet signal with enormous spikes forces the tail Gamma escape.
        let num_samples = 512;
        let data: Vec<Vec<i32>> = vec![(0..num_samples)
            .map(|i| if i % 97 == 0 { 1 << 22 } else { (i as i32 % 11) - 5 })
            .collect()];

        round_trip(&data, num_samples);
    }

    #[test]
    fn verify_low_parameter_path_round_trip() {
        // Tiny magnitudes select the fixed Golomb fast path.
        let num_samples = 2048;
        let data: Vec<Vec<i32>> =
            vec![(0..num_samples).map(|i| (i as i32 % 3) - 1).collect(); 2];

        round_trip(&data, num_samples);
    }
}

// SLAC
// Copyright (c) 2025 The Project SLAC Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use slac_core::errors::{capacity_error, Result};
use slac_core::util::bits::signed_log2_ceil;

/// Coefficient update weight: 2^-9 in 32-bit signed fixed point.
const DELTA_WEIGHT_SHIFT: u32 = 9;

/// Rounding constant for the Q10 prediction sum.
const HALF_Q10: i32 = 1 << 9;

/// Coefficient update table, indexed by `signed_log2_ceil(residual) + 32` and then by the
/// stored sign (+1) of the buffered operand.
///
/// The update depends only on log2(|residual| + 1), the residual sign, and the operand sign,
/// so every combination is cached. The entries must match bit-exactly between encoder and
/// decoder; building them from the closed form at compile time guarantees that.
static DELTA_TABLE: [[i32; 3]; 64] = build_delta_table();

const fn build_delta_table() -> [[i32; 3]; 64] {
    let mut table = [[0i32; 3]; 64];
    let mut index = 0;

    while index < 64 {
        let (sign_res, log2_res) = if index < 32 {
            (-1i32, 32 - index as i32)
        }
        else if index == 32 {
            (0, 0)
        }
        else {
            (1, index as i32 - 32)
        };

        let delta = (log2_res << DELTA_WEIGHT_SHIFT) >> 5;
        table[index] = [-sign_res * delta, 0, sign_res * delta];

        index += 1;
    }

    table
}

/// `LmsFilter` is a sign-sign LMS adaptive predictor with an FIR branch over the input
/// history and an IIR branch over the prediction history.
///
/// The coefficient count must be a power of two of at least 4. Signal and sign histories are
/// stored twice so the tap loops never branch on wrap-around. The first `num_coef` samples
/// of every block pass through unchanged while the histories fill.
pub struct LmsFilter {
    max_num_coef: usize,
    fir_coef: Vec<i32>,
    iir_coef: Vec<i32>,
    fir_buf: Vec<i32>,
    iir_buf: Vec<i32>,
    fir_sign: Vec<i32>,
    iir_sign: Vec<i32>,
    pos: usize,
    num_input_samples: usize,
}

impl LmsFilter {
    /// Instantiate a filter for up to `max_num_coef` coefficients per branch.
    pub fn new(max_num_coef: usize) -> Self {
        LmsFilter {
            max_num_coef,
            fir_coef: vec![0; max_num_coef],
            iir_coef: vec![0; max_num_coef],
            fir_buf: vec![0; 2 * max_num_coef],
            iir_buf: vec![0; 2 * max_num_coef],
            fir_sign: vec![0; 2 * max_num_coef],
            iir_sign: vec![0; 2 * max_num_coef],
            pos: 0,
            num_input_samples: 0,
        }
    }

    /// Zeroes the coefficients and histories. Must be called at every block boundary.
    pub fn reset(&mut self) {
        self.fir_coef.fill(0);
        self.iir_coef.fill(0);
        self.fir_buf.fill(0);
        self.iir_buf.fill(0);
        self.fir_sign.fill(0);
        self.iir_sign.fill(0);
        self.pos = 0;
        self.num_input_samples = 0;
    }

    /// Produces the prediction residual of `data`.
    pub fn predict(&mut self, num_coef: usize, data: &[i32], residual: &mut [i32]) -> Result<()> {
        self.process(num_coef, data, residual, true)
    }

    /// Reconstructs the signal from its prediction residual.
    pub fn synthesize(
        &mut self,
        num_coef: usize,
        residual: &[i32],
        output: &mut [i32],
    ) -> Result<()> {
        self.process(num_coef, residual, output, false)
    }

    fn process(
        &mut self,
        num_coef: usize,
        input: &[i32],
        output: &mut [i32],
        is_predict: bool,
    ) -> Result<()> {
        if num_coef > self.max_num_coef {
            return capacity_error("lms coefficient count exceeds filter capacity");
        }

        // The circular position mask requires a power-of-two count; fewer than 4 taps are
        // below the useful minimum.
        debug_assert!(num_coef >= 4);
        debug_assert!(num_coef.is_power_of_two());

        // Copy everything up front; prediction then only subtracts and synthesis only adds.
        output.copy_from_slice(input);

        let pos_mask = num_coef - 1;
        let mut pos = self.pos;
        let mut start = 0;

        // Fill the histories before adaptation begins.
        if self.num_input_samples < num_coef {
            let num_buffering = (num_coef - self.num_input_samples).min(input.len());
            let offset = num_coef.saturating_sub(input.len() + self.num_input_samples);

            for smpl in 0..num_buffering {
                let value = input[num_buffering - smpl - 1];
                let sign = value.signum() + 1;

                self.fir_sign[offset + smpl] = sign;
                self.fir_sign[offset + smpl + num_coef] = sign;
                self.iir_sign[offset + smpl] = sign;
                self.iir_sign[offset + smpl + num_coef] = sign;

                self.fir_buf[offset + smpl] = value;
                self.fir_buf[offset + smpl + num_coef] = value;
                self.iir_buf[offset + smpl] = value;
                self.iir_buf[offset + smpl + num_coef] = value;
            }

            pos += num_buffering;
            start = num_buffering;
        }

        for smpl in start..input.len() {
            // Both branches accumulate into a single Q10 sum with 32-bit wrap-around
            // semantics, identical on the predict and synthesize sides.
            let mut predict = HALF_Q10;
            for i in 0..num_coef {
                predict = predict
                    .wrapping_add(self.fir_coef[i].wrapping_mul(self.fir_buf[pos + i]));
                predict = predict
                    .wrapping_add(self.iir_coef[i].wrapping_mul(self.iir_buf[pos + i]));
            }
            let predict = predict >> 10;

            // The update row is selected by the residual; on the synthesis side the residual
            // is the input value before the prediction is folded back in.
            let delta_row;
            if is_predict {
                output[smpl] = output[smpl].wrapping_sub(predict);
                delta_row = &DELTA_TABLE[(signed_log2_ceil(output[smpl]) + 32) as usize];
            }
            else {
                delta_row = &DELTA_TABLE[(signed_log2_ceil(output[smpl]) + 32) as usize];
                output[smpl] = output[smpl].wrapping_add(predict);
            }

            for i in 0..num_coef {
                self.fir_coef[i] = self.fir_coef[i]
                    .wrapping_add(delta_row[self.fir_sign[pos + i] as usize]);
                self.iir_coef[i] = self.iir_coef[i]
                    .wrapping_add(delta_row[self.iir_sign[pos + i] as usize]);
            }

            pos = pos.wrapping_sub(1) & pos_mask;

            // Newest operands land below the read window, mirrored into the doubled half.
            let in_value = if is_predict { input[smpl] } else { output[smpl] };
            self.fir_buf[pos] = in_value;
            self.fir_buf[pos + num_coef] = in_value;
            self.iir_buf[pos] = predict;
            self.iir_buf[pos + num_coef] = predict;

            let iir_sign = predict.signum() + 1;
            self.iir_sign[pos] = iir_sign;
            self.iir_sign[pos + num_coef] = iir_sign;
            let fir_sign = in_value.signum() + 1;
            self.fir_sign[pos] = fir_sign;
            self.fir_sign[pos + num_coef] = fir_sign;
        }

        self.pos = pos;
        self.num_input_samples += input.len();

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verify_delta_table_closed_form() {
        for (index, row) in DELTA_TABLE.iter().enumerate() {
            let signed_log2 = index as i32 - 32;
            let sign = signed_log2.signum();
            let magnitude = signed_log2.abs();
            let delta = (magnitude << DELTA_WEIGHT_SHIFT) >> 5;

            assert_eq!(row[0], -sign * delta);
            assert_eq!(row[1], 0);
            assert_eq!(row[2], sign * delta);
        }

        // Spot values: |residual| of 1 maps one step from the centre.
        assert_eq!(DELTA_TABLE[32], [0, 0, 0]);
        assert_eq!(DELTA_TABLE[33], [-16, 0, 16]);
        assert_eq!(DELTA_TABLE[31], [16, 0, -16]);
    }

    #[test]
    fn verify_predict_synthesize_inverse() {
        // A waveform busy enough to drive adaptation in both branches.
        let data: Vec<i32> = (0..4096)
            .map(|i| {
                let x = i as f64;
                (8000.0 * (0.02 * x).sin() + 2500.0 * (0.31 * x).cos()) as i32
            })
            .collect();

        for num_coef in [4usize, 8, 16, 32] {
            let mut residual = vec![0i32; data.len()];
            let mut output = vec![0i32; data.len()];

            let mut filter = LmsFilter::new(32);
            filter.reset();
            filter.predict(num_coef, &data, &mut residual).unwrap();

            filter.reset();
            filter.synthesize(num_coef, &residual, &mut output).unwrap();

            assert_eq!(data, output, "num_coef {}", num_coef);

            // The warm-up region passes through unchanged.
            assert_eq!(&residual[..num_coef], &data[..num_coef]);
        }
    }

    #[test]
    fn verify_short_input_passthrough() {
        let data = [5, -3, 8];
        let mut residual = [0i32; 3];

        let mut filter = LmsFilter::new(8);
        filter.reset();
        filter.predict(8, &data, &mut residual).unwrap();

        assert_eq!(data, residual);
    }
}

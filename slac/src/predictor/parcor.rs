// SLAC
// Copyright (c) 2025 The Project SLAC Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use slac_core::errors::{capacity_error, Result};

/// Rounding constant for the Q1.15 lattice multiply, 0.5 in Q15.
const HALF_Q15: i32 = 1 << 14;

/// Entropy-rate constant of the Laplace distribution, `log2(sqrt(2 e^2))`.
const BETA_LAPLACE: f64 = 1.9426950408889634;

/// `ParcorAnalyzer` derives PARCOR (reflection) coefficients from windowed samples using
/// Levinson-Durbin recursion over the sample autocorrelation.
///
/// All internal vectors are double precision: with single precision the sample
/// autocorrelation error grows with the block length until the recursion emits NaN.
pub struct ParcorAnalyzer {
    max_order: usize,
    a_vec: Vec<f64>,
    e_vec: Vec<f64>,
    u_vec: Vec<f64>,
    v_vec: Vec<f64>,
    auto_corr: Vec<f64>,
}

impl ParcorAnalyzer {
    /// Instantiate an analyser for orders up to `max_order`.
    pub fn new(max_order: usize) -> Self {
        ParcorAnalyzer {
            max_order,
            // a_0 and a_k+1 are carried, hence max_order + 2.
            a_vec: vec![0.0; max_order + 2],
            e_vec: vec![0.0; max_order + 2],
            u_vec: vec![0.0; max_order + 2],
            v_vec: vec![0.0; max_order + 2],
            auto_corr: vec![0.0; max_order + 1],
        }
    }

    /// Computes PARCOR coefficients of the given `order` for `data`.
    ///
    /// `parcor` receives `order + 1` coefficients; the 0th is always zero. Quasi-silent and
    /// under-determined (`data.len() < order`) inputs yield all-zero coefficients.
    pub fn calculate_parcor(
        &mut self,
        data: &[f64],
        order: usize,
        parcor: &mut [f64],
    ) -> Result<()> {
        if order > self.max_order {
            return capacity_error("parcor order exceeds analyser capacity");
        }

        debug_assert!(parcor.len() >= order + 1);

        autocorrelation(data, &mut self.auto_corr[..order + 1]);

        // With fewer samples than the order the system is under-determined and the
        // coefficients routinely diverge. Treat such input as silence.
        if data.len() < order {
            parcor[..order + 1].fill(0.0);
            return Ok(());
        }

        self.levinson_durbin(order, parcor);
        Ok(())
    }

    fn levinson_durbin(&mut self, order: usize, parcor: &mut [f64]) {
        let auto_corr = &self.auto_corr;

        // A near-zero signal power predicts the silent system.
        if auto_corr[0].abs() < f64::from(f32::EPSILON) {
            parcor[..order + 1].fill(0.0);
            return;
        }

        if order == 0 {
            parcor[0] = 0.0;
            return;
        }

        let a_vec = &mut self.a_vec;
        let e_vec = &mut self.e_vec;
        let u_vec = &mut self.u_vec;
        let v_vec = &mut self.v_vec;

        for i in 0..order + 2 {
            a_vec[i] = 0.0;
            u_vec[i] = 0.0;
            v_vec[i] = 0.0;
        }

        // First recursion step.
        a_vec[0] = 1.0;
        e_vec[0] = auto_corr[0];
        a_vec[1] = -auto_corr[1] / auto_corr[0];
        parcor[0] = 0.0;
        parcor[1] = auto_corr[1] / e_vec[0];
        e_vec[1] = auto_corr[0] + auto_corr[1] * a_vec[1];
        u_vec[0] = 1.0;
        u_vec[1] = 0.0;
        v_vec[0] = 0.0;
        v_vec[1] = 1.0;

        for delay in 1..order {
            let mut gamma = 0.0;
            for i in 0..delay + 1 {
                gamma += a_vec[i] * auto_corr[delay + 1 - i];
            }
            gamma /= -e_vec[delay];
            e_vec[delay + 1] = (1.0 - gamma * gamma) * e_vec[delay];
            // The error variance (a power) is non-negative at every step.
            debug_assert!(e_vec[delay] >= 0.0);

            for i in 0..delay {
                u_vec[i + 1] = a_vec[i + 1];
                v_vec[delay - i] = a_vec[i + 1];
            }
            u_vec[0] = 1.0;
            u_vec[delay + 1] = 0.0;
            v_vec[0] = 0.0;
            v_vec[delay + 1] = 1.0;

            for i in 0..delay + 2 {
                a_vec[i] = u_vec[i] + gamma * v_vec[i];
            }

            // The PARCOR coefficient is the reflection coefficient with its sign flipped.
            parcor[delay + 1] = -gamma;
            // |gamma| < 1 is the stability condition of the recursion.
            debug_assert!(gamma.abs() < 1.0);
        }
    }
}

/// Computes the sample autocorrelation of `data` for `auto_corr.len()` lags.
///
/// Lags beyond 0 use a blocked formulation that shares each multiplicand between a pair of
/// shifted products, roughly halving the multiply count relative to the naive double loop.
fn autocorrelation(data: &[f64], auto_corr: &mut [f64]) {
    let num_samples = data.len();

    auto_corr.fill(0.0);

    // More lags than samples leaves the tail at zero.
    let order = auto_corr.len().min(num_samples);
    if order == 0 {
        return;
    }

    auto_corr[0] = data.iter().map(|&x| x * x).sum();

    for lag in 1..order {
        let lag2 = lag << 1;

        // Number of full runs whose multiplicands overlap.
        let runs = if 3 * lag < num_samples { 1 + (num_samples - 3 * lag) / lag2 } else { 0 };
        let runs_end = runs * lag2;

        let mut sum = 0.0;

        // Overlapped region: data[l + lag + i] multiplies both its left and right neighbours
        // at distance `lag`. Generally lag < runs, so the loops nest in this order.
        for i in 0..lag {
            let mut l = 0;
            while l < runs_end {
                sum += data[l + lag + i] * (data[l + i] + data[l + lag2 + i]);
                l += lag2;
            }
        }

        // Plain product sum over the remainder.
        for i in 0..num_samples - runs_end - lag {
            sum += data[runs_end + lag + i] * data[runs_end + i];
        }

        auto_corr[lag] = sum;
    }
}

/// Estimates the code length, in bytes per sample, a predictor with the given PARCOR
/// coefficients would achieve on `data`.
///
/// The estimate is the Laplace-distribution entropy of the prediction residual:
/// `beta + (log2(mean residual power)) / 2`, where the residual power is the input power
/// scaled by `prod(1 - k_i^2)`. Quasi-silence estimates 0; otherwise at least 1/8 byte per
/// sample is reported.
pub fn estimate_code_length(
    data: &[f64],
    bits_per_sample: u32,
    parcor: &[f64],
    order: usize,
) -> f64 {
    let mut mean_power: f64 = data.iter().map(|&x| x * x).sum();

    // Rescale the normalised samples to integer PCM amplitude so the entropy comes out in
    // integer bits.
    mean_power *= 2.0f64.powi(2 * (bits_per_sample as i32 - 1));

    if mean_power.abs() <= f64::from(f32::MIN_POSITIVE) {
        return 0.0;
    }

    let log2_mean_power = mean_power.log2() - (data.len() as f64).log2();

    // The 0th coefficient is fixed at zero, so start at order 1.
    let mut log2_variance_ratio = 0.0;
    for k in parcor[1..order + 1].iter() {
        log2_variance_ratio += (1.0 - k * k).log2();
    }

    let length = (BETA_LAPLACE + 0.5 * (log2_mean_power + log2_variance_ratio)) / 8.0;

    // A non-positive estimate means the input power is extremely low; expect the coder to
    // reach one bit per sample.
    if length <= 0.0 {
        1.0 / 8.0
    }
    else {
        length
    }
}

/// `ParcorFilter` is the int32 lattice filter shared by prediction and synthesis.
///
/// The two directions apply the same multiply-accumulate recurrences with `+2^14 >> 15`
/// rounding and 32x32->32 wrapping multiplies, making them exact mutual inverses for any
/// coefficient vector.
pub struct ParcorFilter {
    max_order: usize,
    forward: Vec<i32>,
    backward: Vec<i32>,
}

impl ParcorFilter {
    /// Instantiate a lattice filter for orders up to `max_order`.
    pub fn new(max_order: usize) -> Self {
        ParcorFilter {
            max_order,
            forward: vec![0; max_order + 1],
            backward: vec![0; max_order + 1],
        }
    }

    /// Zeroes the lattice registers. Must be called at every block boundary.
    pub fn reset(&mut self) {
        self.forward.fill(0);
        self.backward.fill(0);
    }

    /// Runs the lattice in the prediction direction, producing `residual` from `data`.
    ///
    /// `coef` holds `order + 1` quantised Q1.15 coefficients with `coef[0] == 0`.
    pub fn predict(
        &mut self,
        data: &[i32],
        coef: &[i32],
        order: usize,
        residual: &mut [i32],
    ) -> Result<()> {
        if order > self.max_order {
            return capacity_error("parcor order exceeds filter capacity");
        }

        let forward = &mut self.forward;
        let backward = &mut self.backward;

        for (smpl, &input) in data.iter().enumerate() {
            forward[0] = input;

            for ord in 1..=order {
                let mul = coef[ord].wrapping_mul(backward[ord - 1]).wrapping_add(HALF_Q15) >> 15;
                forward[ord] = forward[ord - 1].wrapping_sub(mul);
            }

            for ord in (1..=order).rev() {
                let mul = coef[ord].wrapping_mul(forward[ord - 1]).wrapping_add(HALF_Q15) >> 15;
                backward[ord] = backward[ord - 1].wrapping_sub(mul);
            }

            backward[0] = input;

            residual[smpl] = forward[order];
        }

        Ok(())
    }

    /// Runs the lattice in the synthesis direction, reconstructing `output` from `residual`.
    pub fn synthesize(
        &mut self,
        residual: &[i32],
        coef: &[i32],
        order: usize,
        output: &mut [i32],
    ) -> Result<()> {
        if order > self.max_order {
            return capacity_error("parcor order exceeds filter capacity");
        }

        let backward = &mut self.backward;

        for (smpl, &input) in residual.iter().enumerate() {
            let mut forward = input;

            for ord in (1..=order).rev() {
                forward = forward
                    .wrapping_add(coef[ord].wrapping_mul(backward[ord - 1]).wrapping_add(HALF_Q15) >> 15);
                backward[ord] = backward[ord - 1]
                    .wrapping_sub(coef[ord].wrapping_mul(forward).wrapping_add(HALF_Q15) >> 15);
            }

            output[smpl] = forward;
            backward[0] = forward;
        }

        Ok(())
    }
}

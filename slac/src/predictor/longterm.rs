// SLAC
// Copyright (c) 2025 The Project SLAC Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use num_complex::Complex64;

use slac_core::dsp::fft::Fft;
use slac_core::dsp::solver::LinearSystemSolver;
use slac_core::errors::{capacity_error, invalid_argument_error, Result};

/// Fraction of the maximum autocorrelation peak a pitch candidate must reach to be selected.
/// At 1.0 only the strict maximum qualifies; the aim is correlation removal rather than
/// perceptual pitch tracking.
const PITCH_PEAK_RATIO_THRESHOLD: f64 = 1.0;

/// Rounding constant for the Q1.31 prediction, 0.5 in Q31.
const HALF_Q31: i64 = 1 << 30;

/// `LongTermAnalyzer` detects the pitch period of a residual signal and derives the tap
/// coefficients of a pitch-lagged FIR predictor.
///
/// The autocorrelation is obtained through the FFT (Wiener-Khinchin): transform, replace
/// every bin by its squared magnitude, transform back. Any constant scale left by the
/// transform pair cancels in every consumer of the autocorrelation.
pub struct LongTermAnalyzer {
    fft: Fft,
    work: Vec<Complex64>,
    auto_corr: Vec<f64>,
    max_pitch_period: usize,
    max_num_candidates: usize,
    candidates: Vec<usize>,
    solver: LinearSystemSolver,
    r_mat: Vec<f64>,
    rhs: Vec<f64>,
    max_num_taps: usize,
}

impl LongTermAnalyzer {
    /// Instantiate an analyser.
    ///
    /// `fft_size` must be a power of two; at most `fft_size / 2` samples may be analysed per
    /// call so circular wrap-around stays out of the examined lags.
    pub fn new(
        fft_size: usize,
        max_pitch_period: usize,
        max_num_candidates: usize,
        max_num_taps: usize,
    ) -> Self {
        assert!(fft_size.is_power_of_two());

        LongTermAnalyzer {
            fft: Fft::new(fft_size),
            work: vec![Complex64::new(0.0, 0.0); fft_size],
            auto_corr: vec![0.0; fft_size],
            max_pitch_period,
            max_num_candidates,
            candidates: vec![0; max_num_candidates],
            solver: LinearSystemSolver::new(max_num_taps),
            r_mat: vec![0.0; max_num_taps * max_num_taps],
            rhs: vec![0.0; max_num_taps],
            max_num_taps,
        }
    }

    /// Analyses `data` and derives `num_taps` long-term coefficients.
    ///
    /// Returns `Ok(Some(pitch_period))` with `coef[..num_taps]` filled on success, and
    /// `Ok(None)` when no usable pitch exists (silence, no autocorrelation peak, or a pitch
    /// too short for the tap count). `num_taps` must be odd.
    pub fn calculate_coef(
        &mut self,
        data: &[i32],
        num_taps: usize,
        coef: &mut [f64],
    ) -> Result<Option<u32>> {
        // An even tap count has no centre tap to anchor on the pitch lag.
        if num_taps % 2 == 0 {
            return invalid_argument_error("long-term tap count must be odd");
        }

        if num_taps > self.max_num_taps {
            return capacity_error("long-term tap count exceeds analyser capacity");
        }

        // Keep the analysed span inside half of the transform so the circular tail of the
        // correlation cannot reach the examined lags.
        if 2 * data.len() > self.fft.size() {
            return invalid_argument_error("too many samples for the analyser transform size");
        }

        self.compute_autocorrelation(data);

        // Silent frame.
        if self.auto_corr[0].abs() <= f64::from(f32::MIN_POSITIVE) {
            coef[..num_taps].fill(0.0);
            return Ok(None);
        }

        let num_candidates = self.collect_pitch_candidates();
        if num_candidates == 0 {
            return Ok(None);
        }

        let max_peak = self.candidates[..num_candidates]
            .iter()
            .fold(0.0f64, |acc, &c| acc.max(self.auto_corr[c]));

        // The pitch is the earliest candidate reaching the qualifying fraction of the
        // maximum peak.
        let mut pitch_period = 0;
        for &candidate in &self.candidates[..num_candidates] {
            if self.auto_corr[candidate] >= PITCH_PEAK_RATIO_THRESHOLD * max_peak {
                pitch_period = candidate;
                break;
            }
        }

        // A period shorter than half the filter span would make the filter reference
        // samples at or beyond the present.
        if pitch_period < num_taps / 2 + 1 {
            return Ok(None);
        }

        if !self.solve_coef(pitch_period, num_taps) {
            return Ok(None);
        }

        coef[..num_taps].copy_from_slice(&self.rhs[..num_taps]);
        Ok(Some(pitch_period as u32))
    }

    fn compute_autocorrelation(&mut self, data: &[i32]) {
        let fft_size = self.fft.size();

        for (i, bin) in self.work.iter_mut().enumerate() {
            let re = if i < data.len() { f64::from(data[i]) * 2.0f64.powi(-31) } else { 0.0 };
            *bin = Complex64::new(re, 0.0);
        }

        self.fft.forward(&mut self.work);

        // Power spectrum; the imaginary parts are exactly zero afterwards.
        for bin in self.work.iter_mut() {
            *bin = Complex64::new(bin.norm_sqr(), 0.0);
        }

        self.fft.inverse(&mut self.work);

        for i in 0..fft_size {
            self.auto_corr[i] = self.work[i].re;
        }
    }

    /// Scans the autocorrelation for local peaks bracketed by a negative-to-positive and a
    /// positive-to-negative zero crossing, collecting up to `max_num_candidates` of them.
    fn collect_pitch_candidates(&mut self) -> usize {
        let auto_corr = &self.auto_corr;
        let mut num_candidates = 0;

        let mut i = 1;
        while i < self.max_pitch_period && num_candidates < self.max_num_candidates {
            // Negative-to-positive crossing opens the peak region.
            let mut start = i;
            while start < self.max_pitch_period {
                if auto_corr[start - 1] < 0.0 && auto_corr[start] > 0.0 {
                    break;
                }
                start += 1;
            }

            // Positive-to-negative crossing closes it.
            let mut end = start + 1;
            while end < self.max_pitch_period {
                if auto_corr[end] > 0.0 && auto_corr[end + 1] < 0.0 {
                    break;
                }
                end += 1;
            }

            // The highest local maximum inside the region is the candidate.
            let mut local_peak_index = 0;
            let mut local_peak = 0.0;
            for j in start..=end {
                if auto_corr[j] > auto_corr[j - 1] && auto_corr[j] > auto_corr[j + 1] {
                    if auto_corr[j] > local_peak {
                        local_peak_index = j;
                        local_peak = auto_corr[j];
                    }
                }
            }

            if local_peak_index != 0 {
                self.candidates[num_candidates] = local_peak_index;
                num_candidates += 1;
            }

            i = end + 1;
        }

        num_candidates
    }

    /// Solves the `num_taps` x `num_taps` normal equations for the tap coefficients. Returns
    /// false when the system is singular or the solution is unstable beyond repair.
    fn solve_coef(&mut self, pitch_period: usize, num_taps: usize) -> bool {
        // Symmetric matrix of autocorrelation gaps: element (j, k) holds the value at lag
        // |j - k|.
        for j in 0..num_taps {
            for k in 0..num_taps {
                self.r_mat[j * num_taps + k] = self.auto_corr[j.abs_diff(k)];
            }
        }

        // Right-hand side: the autocorrelation around the pitch lag, centred on it.
        for j in 0..num_taps {
            self.rhs[j] = self.auto_corr[j + pitch_period - num_taps / 2];
        }

        // Two refinement passes sharpen the solution enough for the stability test below to
        // be meaningful.
        if self
            .solver
            .solve(&self.r_mat[..num_taps * num_taps], &mut self.rhs[..num_taps], num_taps, 2)
            .is_err()
        {
            return false;
        }

        // Filter stability requires the absolute coefficient sum below one. If violated,
        // fall back to a single centre tap, which behaves like the tap count 1 case.
        let coef_sum: f64 = self.rhs[..num_taps].iter().map(|c| c.abs()).sum();
        if coef_sum >= 1.0 {
            self.rhs[..num_taps].fill(0.0);
            self.rhs[num_taps / 2] = self.auto_corr[pitch_period] / self.auto_corr[0];
        }

        true
    }
}

/// `LongTermFilter` is the pitch-lagged FIR predictor/synthesiser.
///
/// The delay line holds the last `pitch_period + num_taps / 2` samples and is stored twice
/// so the tap loop never branches on wrap-around. The first `max_delay` samples of every
/// block pass through unchanged while the line fills.
pub struct LongTermFilter {
    buf: Vec<i32>,
    pos: usize,
    num_input_samples: usize,
}

impl LongTermFilter {
    /// Instantiate a filter for up to `max_num_taps` taps and a pitch period of up to
    /// `max_pitch_period` samples.
    pub fn new(max_num_taps: usize, max_pitch_period: usize) -> Self {
        LongTermFilter {
            buf: vec![0; 2 * (max_num_taps + max_pitch_period)],
            pos: 0,
            num_input_samples: 0,
        }
    }

    /// Clears the delay line. Must be called at every block boundary.
    pub fn reset(&mut self) {
        self.buf.fill(0);
        self.pos = 0;
        self.num_input_samples = 0;
    }

    /// Produces the prediction residual of `data`.
    pub fn predict(
        &mut self,
        data: &[i32],
        pitch_period: u32,
        coef: &[i32],
        num_taps: usize,
        residual: &mut [i32],
    ) -> Result<()> {
        self.process(data, pitch_period, coef, num_taps, residual, true)
    }

    /// Reconstructs the signal from its prediction residual.
    pub fn synthesize(
        &mut self,
        residual: &[i32],
        pitch_period: u32,
        coef: &[i32],
        num_taps: usize,
        output: &mut [i32],
    ) -> Result<()> {
        self.process(residual, pitch_period, coef, num_taps, output, false)
    }

    fn process(
        &mut self,
        input: &[i32],
        pitch_period: u32,
        coef: &[i32],
        num_taps: usize,
        output: &mut [i32],
        is_predict: bool,
    ) -> Result<()> {
        // Pitch period zero marks "no prediction": the signal passes through untouched.
        if pitch_period == 0 {
            output.copy_from_slice(input);
            return Ok(());
        }

        // Copy everything up front; prediction then only subtracts and synthesis only adds.
        output.copy_from_slice(input);

        let max_delay = pitch_period as usize + (num_taps >> 1);
        let mut pos = self.pos;
        let mut start = 0;

        // Fill the delay line before prediction begins; the affected output samples stay as
        // copied above.
        if self.num_input_samples < max_delay {
            let num_buffering = (max_delay - self.num_input_samples).min(input.len());
            let offset = (max_delay).saturating_sub(input.len() + self.num_input_samples);

            for smpl in 0..num_buffering {
                let value = input[num_buffering - smpl - 1];
                self.buf[offset + smpl] = value;
                self.buf[offset + smpl + max_delay] = value;
            }

            pos += num_buffering;
            start = num_buffering;
        }

        for smpl in start..input.len() {
            let mut predict = HALF_Q31;
            for (j, &c) in coef[..num_taps].iter().enumerate() {
                predict += i64::from(c) * i64::from(self.buf[pos + max_delay - 1 - j]);
            }
            let predict = (predict >> 31) as i32;

            if is_predict {
                output[smpl] = output[smpl].wrapping_sub(predict);
            }
            else {
                output[smpl] = output[smpl].wrapping_add(predict);
            }

            // Newest sample goes below the read window, mirrored into the doubled half.
            pos = if pos == 0 { max_delay - 1 } else { pos - 1 };
            let value = if is_predict { input[smpl] } else { output[smpl] };
            self.buf[pos] = value;
            self.buf[pos + max_delay] = value;
        }

        self.pos = pos;
        self.num_input_samples += input.len();

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pitched_signal(len: usize, period: usize) -> Vec<i32> {
        // A decaying pulse train with strong periodicity at `period`.
        let mut signal = vec![0i32; len];
        for (i, s) in signal.iter_mut().enumerate() {
            let phase = i % period;
            let pulse = if phase < 8 { 1 << (20 - phase) } else { 0 };
            let tone =
                (6000.0 * (2.0 * std::f64::consts::PI * i as f64 / period as f64).sin()) as i32;
            *s = pulse + tone;
        }
        signal
    }

    #[test]
    fn verify_analyzer_on_silence() {
        let mut analyzer = LongTermAnalyzer::new(8192, 1024, 1024, 5);
        let mut coef = [1.0f64; 5];

        let pitch = analyzer.calculate_coef(&vec![0i32; 4096], 5, &mut coef).unwrap();
        assert_eq!(pitch, None);
        assert!(coef[..5].iter().all(|&c| c == 0.0));
    }

    #[test]
    fn verify_analyzer_finds_pitch() {
        let signal = pitched_signal(4096, 200);

        let mut analyzer = LongTermAnalyzer::new(8192, 1024, 1024, 5);
        let mut coef = [0.0f64; 5];

        let pitch = analyzer.calculate_coef(&signal, 5, &mut coef).unwrap();
        let pitch = pitch.expect("pitch should be detected");

        // The detected period must sit on the fundamental or one of its harmonics.
        let rem = pitch % 200;
        assert!(rem <= 2 || rem >= 198, "pitch {}", pitch);
        // Coefficients must satisfy the stability bound enforced by the analyser.
        assert!(coef.iter().map(|c| c.abs()).sum::<f64>() < 1.0 + 1e-9);
    }

    #[test]
    fn verify_even_tap_count_is_rejected() {
        let mut analyzer = LongTermAnalyzer::new(4096, 1024, 1024, 5);
        let mut coef = [0.0f64; 5];

        assert!(analyzer.calculate_coef(&[0i32; 16], 4, &mut coef).is_err());
    }

    #[test]
    fn verify_predict_synthesize_inverse() {
        let signal = pitched_signal(4096, 150);

        // Q1.31 coefficients with a dominant centre tap.
        let coef = [0x0400_0000, 0x1000_0000, 0x2800_0000, 0x1000_0000, 0x0400_0000];
        let pitch_period = 150u32;
        let num_taps = 5;

        let mut residual = vec![0i32; signal.len()];
        let mut output = vec![0i32; signal.len()];

        let mut filter = LongTermFilter::new(num_taps, 1024);
        filter.reset();
        filter.predict(&signal, pitch_period, &coef, num_taps, &mut residual).unwrap();

        filter.reset();
        filter.synthesize(&residual, pitch_period, &coef, num_taps, &mut output).unwrap();

        assert_eq!(signal, output);

        // The warm-up region passes through unchanged.
        let max_delay = pitch_period as usize + num_taps / 2;
        assert_eq!(&residual[..max_delay], &signal[..max_delay]);
    }

    #[test]
    fn verify_pitch_zero_is_passthrough() {
        let signal = pitched_signal(512, 64);
        let coef = [0i32; 5];
        let mut residual = vec![0i32; signal.len()];

        let mut filter = LongTermFilter::new(5, 1024);
        filter.reset();
        filter.predict(&signal, 0, &coef, 5, &mut residual).unwrap();

        assert_eq!(signal, residual);
    }
}

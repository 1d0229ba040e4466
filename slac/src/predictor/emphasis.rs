// SLAC
// Copyright (c) 2025 The Project SLAC Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/// `EmphasisFilter` is a one-tap pre-/de-emphasis filter with the coefficient
/// `(2^s - 1) / 2^s` for the shift `s` passed to each call.
///
/// The previous sample is carried in the filter; it must be reset at every block boundary so
/// encoder and decoder stay aligned.
#[derive(Default)]
pub struct EmphasisFilter {
    prev: i32,
}

impl EmphasisFilter {
    /// Instantiate a new `EmphasisFilter`.
    pub fn new() -> Self {
        EmphasisFilter { prev: 0 }
    }

    /// Clears the stored previous sample.
    pub fn reset(&mut self) {
        self.prev = 0;
    }

    /// Applies pre-emphasis in place: `y[n] = x[n] - (x[n-1] * (2^s - 1)) >> s`.
    pub fn pre_emphasis(&mut self, data: &mut [i32], coef_shift: u32) {
        let coef_numer = (1i32 << coef_shift) - 1;

        let mut prev = self.prev;
        for sample in data.iter_mut() {
            let current = *sample;
            *sample = current.wrapping_sub(prev.wrapping_mul(coef_numer) >> coef_shift);
            prev = current;
        }

        self.prev = prev;
    }

    /// Applies de-emphasis in place, the exact inverse of [`EmphasisFilter::pre_emphasis`].
    pub fn de_emphasis(&mut self, data: &mut [i32], coef_shift: u32) {
        if data.is_empty() {
            return;
        }

        let coef_numer = (1i32 << coef_shift) - 1;

        // The first sample recurses on the previous sample carried in the filter.
        data[0] = data[0].wrapping_add(self.prev.wrapping_mul(coef_numer) >> coef_shift);

        for smpl in 1..data.len() {
            data[smpl] =
                data[smpl].wrapping_add(data[smpl - 1].wrapping_mul(coef_numer) >> coef_shift);
        }

        self.prev = data[data.len() - 1];
    }
}

/// Applies pre-emphasis to double-precision data in place, for the analysis path. Always
/// starts from a zero previous sample.
pub fn pre_emphasis_f64(data: &mut [f64], coef_shift: u32) {
    let coef = (2.0f64.powi(coef_shift as i32) - 1.0) * 2.0f64.powi(-(coef_shift as i32));

    let mut prev = 0.0;
    for sample in data.iter_mut() {
        let current = *sample;
        *sample -= prev * coef;
        prev = current;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verify_pre_de_emphasis_inverse() {
        let reference: Vec<i32> =
            (0..2048).map(|i| (12000.0 * (0.013 * i as f64).sin()) as i32).collect();

        let mut data = reference.clone();

        let mut filter = EmphasisFilter::new();
        filter.pre_emphasis(&mut data, 5);
        assert_ne!(data, reference);

        filter.reset();
        filter.de_emphasis(&mut data, 5);
        assert_eq!(data, reference);
    }

    #[test]
    fn verify_state_carries_across_calls() {
        let reference: Vec<i32> = (0..512).map(|i| (i * 37) % 1000 - 500).collect();

        // Filtering in two chunks must equal filtering in one pass.
        let mut whole = reference.clone();
        let mut filter = EmphasisFilter::new();
        filter.pre_emphasis(&mut whole, 5);

        let mut split = reference.clone();
        let mut filter = EmphasisFilter::new();
        let (head, tail) = split.split_at_mut(200);
        filter.pre_emphasis(head, 5);
        filter.pre_emphasis(tail, 5);

        assert_eq!(whole, split);
    }

    #[test]
    fn verify_f64_path_matches_shape() {
        let mut data = vec![1.0f64; 16];
        pre_emphasis_f64(&mut data, 5);

        // First sample is untouched; later samples lose the emphasised previous value.
        assert_eq!(data[0], 1.0);
        for &x in &data[1..] {
            assert!((x - (1.0 - 31.0 / 32.0)).abs() < 1e-12);
        }
    }
}

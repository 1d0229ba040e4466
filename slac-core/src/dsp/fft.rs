// SLAC
// Copyright (c) 2025 The Project SLAC Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The `fft` module implements the Fast Fourier Transform (FFT).
//!
//! The FFT is implemented using the radix-2 Cooley-Tukey algorithm over double-precision
//! complex bins. Twiddle factors and the bit-reversal permutation are computed once per
//! instance so repeated transforms of the same size do no setup work.

use std::f64::consts::PI;

use num_complex::Complex64;

/// The complex Fast Fourier Transform (FFT).
pub struct Fft {
    perm: Box<[u32]>,
    twiddle: Box<[Complex64]>,
}

impl Fft {
    /// Instantiate a new `Fft` of size `n`. The size must be a power of two of at least 2.
    pub fn new(n: usize) -> Self {
        assert!(n.is_power_of_two());
        assert!(n >= 2);
        assert!(n <= u32::MAX as usize);

        // Calculate the bit-reversal permutation table.
        let shift = (n as u32).leading_zeros() + 1;
        let perm = (0..n as u32).map(|i| i.reverse_bits() >> shift).collect();

        // Forward-transform twiddle factors, e^(-2*pi*i*k/n) for k in 0..n/2.
        let theta = -2.0 * PI / n as f64;

        let twiddle = (0..n / 2)
            .map(|k| {
                let angle = theta * k as f64;
                Complex64::new(angle.cos(), angle.sin())
            })
            .collect();

        Fft { perm, twiddle }
    }

    /// Gets the size of the FFT.
    pub fn size(&self) -> usize {
        self.perm.len()
    }

    /// Performs the forward transform in-place.
    pub fn forward(&self, buf: &mut [Complex64]) {
        self.transform(buf, false);
    }

    /// Performs the inverse transform in-place, including the 1/n normalisation.
    pub fn inverse(&self, buf: &mut [Complex64]) {
        self.transform(buf, true);

        let scale = 1.0 / self.size() as f64;
        for bin in buf.iter_mut() {
            *bin *= scale;
        }
    }

    fn transform(&self, buf: &mut [Complex64], inverse: bool) {
        let n = self.size();
        assert_eq!(buf.len(), n);

        // Decimation-in-time reordering.
        for (i, &p) in self.perm.iter().enumerate() {
            let p = p as usize;
            if p > i {
                buf.swap(i, p);
            }
        }

        // Radix-2 butterflies.
        let mut len = 2;
        while len <= n {
            let half = len >> 1;
            let step = n / len;

            for base in (0..n).step_by(len) {
                for k in 0..half {
                    let mut w = self.twiddle[k * step];
                    if inverse {
                        w = w.conj();
                    }

                    let t = buf[base + k + half] * w;
                    let u = buf[base + k];
                    buf[base + k] = u + t;
                    buf[base + k + half] = u - t;
                }
            }

            len <<= 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_signal(n: usize) -> Vec<Complex64> {
        // A deterministic, spectrally busy real signal.
        (0..n)
            .map(|i| {
                let x = i as f64;
                Complex64::new((0.3 * x).sin() + 0.5 * (0.11 * x + 0.7).cos(), 0.0)
            })
            .collect()
    }

    #[test]
    fn verify_impulse_and_dc() {
        let fft = Fft::new(8);

        // An impulse transforms to a flat spectrum.
        let mut buf = vec![Complex64::new(0.0, 0.0); 8];
        buf[0] = Complex64::new(1.0, 0.0);
        fft.forward(&mut buf);
        for bin in &buf {
            assert!((bin.re - 1.0).abs() < 1e-12 && bin.im.abs() < 1e-12);
        }

        // A constant transforms to a single DC bin.
        let mut buf = vec![Complex64::new(1.0, 0.0); 8];
        fft.forward(&mut buf);
        assert!((buf[0].re - 8.0).abs() < 1e-12);
        for bin in &buf[1..] {
            assert!(bin.norm() < 1e-12);
        }
    }

    #[test]
    fn verify_round_trip() {
        for &n in &[2usize, 16, 256, 4096] {
            let fft = Fft::new(n);
            let reference = test_signal(n);

            let mut buf = reference.clone();
            fft.forward(&mut buf);
            fft.inverse(&mut buf);

            for (a, b) in buf.iter().zip(&reference) {
                assert!((a - b).norm() < 1e-9);
            }
        }
    }

    #[test]
    fn verify_parseval_identity() {
        for &n in &[64usize, 1024, 8192] {
            let fft = Fft::new(n);
            let signal = test_signal(n);

            let time_energy: f64 = signal.iter().map(|x| x.norm_sqr()).sum();

            let mut buf = signal;
            fft.forward(&mut buf);
            let freq_energy: f64 = buf.iter().map(|x| x.norm_sqr()).sum::<f64>() / n as f64;

            assert!((time_energy - freq_energy).abs() < 1e-9, "size {}", n);
        }
    }
}

// SLAC
// Copyright (c) 2025 The Project SLAC Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::f64::consts::PI;

/// The analysis window applied before linear-predictive analysis.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowFunction {
    /// No shaping at all.
    Rectangular,
    Sine,
    Hann,
    Blackman,
    Vorbis,
}

impl WindowFunction {
    /// Fills `window` with the window's weights.
    pub fn fill(&self, window: &mut [f64]) {
        let len = window.len();

        if len < 2 || *self == WindowFunction::Rectangular {
            window.fill(1.0);
            return;
        }

        for (i, w) in window.iter_mut().enumerate() {
            let x = i as f64 / (len - 1) as f64;

            *w = match *self {
                WindowFunction::Rectangular => 1.0,
                WindowFunction::Sine => (PI * x).sin(),
                WindowFunction::Hann => 0.5 - 0.5 * (2.0 * PI * x).cos(),
                WindowFunction::Blackman => {
                    0.42 - 0.5 * (2.0 * PI * x).cos() + 0.08 * (4.0 * PI * x).cos()
                }
                WindowFunction::Vorbis => {
                    let s = (PI * x).sin();
                    (0.5 * PI * s * s).sin()
                }
            };
        }
    }
}

/// Multiplies `data` by a previously filled window, element-wise.
pub fn apply_window(window: &[f64], data: &mut [f64]) {
    for (d, &w) in data.iter_mut().zip(window) {
        *d *= w;
    }
}

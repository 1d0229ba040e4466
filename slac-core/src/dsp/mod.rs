// SLAC
// Copyright (c) 2025 The Project SLAC Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The `dsp` module provides the signal-processing kernels used by the codec: a complex FFT,
//! analysis window functions, and a dense linear-system solver.

pub mod fft;
pub mod solver;
pub mod window;

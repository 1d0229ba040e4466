// SLAC
// Copyright (c) 2025 The Project SLAC Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The `predictor` module implements the prediction cascade: the emphasis filter, the PARCOR
//! lattice, the long-term (pitch) predictor, and the LMS adaptive filter.
//!
//! Every filter exists in a prediction form (producing residuals on the encode side) and a
//! synthesis form (reconstructing samples on the decode side). The two forms are bit-exact
//! inverses of each other given identical coefficients and state, which is what makes the
//! codec lossless. All filter state is reset at block boundaries on both sides.

pub mod emphasis;
pub mod lms;
pub mod longterm;
pub mod parcor;

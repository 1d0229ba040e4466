// SLAC
// Copyright (c) 2025 The Project SLAC Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! SLAC is a lossless audio codec for integer PCM at up to 32-bit depth and 8 channels.
//!
//! The compressed stream is a fixed 43-byte header followed by self-synchronising,
//! CRC-protected blocks. Inside a block the encoder runs a cascade of predictors
//! (pre-emphasis, a PARCOR lattice, a long-term pitch predictor, and a sign-sign LMS
//! adaptive filter) and codes the residual with an adaptive recursive Rice coder. The
//! decoder mirrors every stage bit-exactly, so decoding an encoded waveform reproduces it
//! sample for sample.
//!
//! Both handles work on memory buffers only; container parsing and file I/O belong to the
//! caller.

mod channel;
mod coder;
mod decoder;
mod encoder;
pub mod format;
mod header;
mod partition;
mod predictor;

pub use decoder::{Decoder, DecoderConfig};
pub use encoder::{Encoder, EncoderConfig};
pub use header::{read_header, write_header};

pub use slac_core::errors::{Result, SlacError};

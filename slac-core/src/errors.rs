// SLAC
// Copyright (c) 2025 The Project SLAC Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The `errors` module defines the common error type.

use std::error;
use std::fmt;
use std::result;

/// `SlacError` provides an enumeration of all possible errors reported by SLAC.
///
/// Every variant maps to a distinct, stable numeric code via [`SlacError::code`] so that
/// embedders bridging to other languages can report errors without string matching.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlacError {
    /// An argument violated the documented contract of the call.
    InvalidArgument(&'static str),
    /// The request exceeds the capacity the handle was created with.
    ExceedHandleCapacity(&'static str),
    /// The output buffer is too small for the data to be written.
    InsufficientBufferSize,
    /// The input buffer ended before the expected amount of data was consumed.
    InsufficientDataSize,
    /// The stream header is structurally invalid.
    InvalidHeaderFormat(&'static str),
    /// A CRC check failed; the data is corrupt.
    DataCorruption,
    /// The block synchronisation code was not found where expected.
    SyncCodeNotFound,
    /// The channel processing method cannot be applied to this channel count.
    InvalidChannelProcessMethod,
    /// Predictor coefficient calculation failed.
    CoefficientCalculationFailed,
    /// Residual prediction failed.
    PredictionFailed,
    /// Signal synthesis failed.
    SynthesisFailed,
    /// An unknown window function was requested.
    InvalidWindowFunction,
    /// A required parameter was not set on the handle before use.
    ParameterNotSet,
}

impl SlacError {
    /// Returns the stable numeric code of the error. Code 0 is reserved for success.
    pub fn code(&self) -> u32 {
        match *self {
            SlacError::InvalidArgument(_) => 1,
            SlacError::ExceedHandleCapacity(_) => 2,
            SlacError::InsufficientBufferSize => 3,
            SlacError::InsufficientDataSize => 4,
            SlacError::InvalidHeaderFormat(_) => 5,
            SlacError::DataCorruption => 6,
            SlacError::SyncCodeNotFound => 7,
            SlacError::InvalidChannelProcessMethod => 8,
            SlacError::CoefficientCalculationFailed => 9,
            SlacError::PredictionFailed => 10,
            SlacError::SynthesisFailed => 11,
            SlacError::InvalidWindowFunction => 12,
            SlacError::ParameterNotSet => 13,
        }
    }
}

impl fmt::Display for SlacError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            SlacError::InvalidArgument(msg) => {
                write!(f, "invalid argument: {}", msg)
            }
            SlacError::ExceedHandleCapacity(msg) => {
                write!(f, "exceeds handle capacity: {}", msg)
            }
            SlacError::InsufficientBufferSize => {
                write!(f, "insufficient output buffer size")
            }
            SlacError::InsufficientDataSize => {
                write!(f, "insufficient input data size")
            }
            SlacError::InvalidHeaderFormat(msg) => {
                write!(f, "invalid header format: {}", msg)
            }
            SlacError::DataCorruption => {
                write!(f, "data corruption detected")
            }
            SlacError::SyncCodeNotFound => {
                write!(f, "failed to find block sync code")
            }
            SlacError::InvalidChannelProcessMethod => {
                write!(f, "channel process method is invalid for this channel count")
            }
            SlacError::CoefficientCalculationFailed => {
                write!(f, "failed to calculate predictor coefficients")
            }
            SlacError::PredictionFailed => {
                write!(f, "failed to predict")
            }
            SlacError::SynthesisFailed => {
                write!(f, "failed to synthesize")
            }
            SlacError::InvalidWindowFunction => {
                write!(f, "invalid window function type")
            }
            SlacError::ParameterNotSet => {
                write!(f, "required parameter was not set")
            }
        }
    }
}

impl error::Error for SlacError {}

pub type Result<T> = result::Result<T, SlacError>;

/// Convenience function to create an invalid argument error.
pub fn invalid_argument_error<T>(msg: &'static str) -> Result<T> {
    Err(SlacError::InvalidArgument(msg))
}

/// Convenience function to create a capacity error.
pub fn capacity_error<T>(msg: &'static str) -> Result<T> {
    Err(SlacError::ExceedHandleCapacity(msg))
}

/// Convenience function to create an invalid header error.
pub fn header_error<T>(msg: &'static str) -> Result<T> {
    Err(SlacError::InvalidHeaderFormat(msg))
}

/// Convenience function to create a corruption error.
pub fn corruption_error<T>() -> Result<T> {
    Err(SlacError::DataCorruption)
}

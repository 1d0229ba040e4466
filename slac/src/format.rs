// SLAC
// Copyright (c) 2025 The Project SLAC Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The `format` module defines the stream-level structures and constants of the SLAC
//! bitstream format.

pub use slac_core::dsp::window::WindowFunction;

/// The stream signature: `S`, `L`, `*`, 0x01.
pub const STREAM_SIGNATURE: [u8; 4] = [b'S', b'L', b'*', 0x01];

/// The stream format version.
pub const FORMAT_VERSION: u32 = 1;

/// Size of the stream header in bytes.
pub const HEADER_SIZE: usize = 43;

/// Minimum size of a block header in bytes.
pub const BLOCK_HEADER_SIZE: usize = 10;

/// Byte offset where the header CRC-16 coverage begins (signature, first-block offset, and
/// the CRC field itself are excluded).
pub const HEADER_CRC16_CALC_START_OFFSET: usize = 4 + 4 + 2;

/// Byte offset within a block where the CRC-16 coverage begins (sync code, next-block
/// offset, and the CRC field itself are excluded).
pub const BLOCK_CRC16_CALC_START_OFFSET: usize = 2 + 4 + 2;

/// The 16-bit code starting every block.
pub const BLOCK_SYNC_CODE: u16 = 0xffff;

/// Maximum number of channels.
pub const MAX_CHANNELS: usize = 8;

/// Minimum number of samples per block.
pub const MIN_BLOCK_NUM_SAMPLES: u32 = 2048;

/// Granularity of the block-partition search in samples.
pub const SEARCH_BLOCK_NUM_SAMPLES_DELTA: u32 = 512;

/// Maximum long-term pitch period in samples.
pub const LONGTERM_MAX_PERIOD: u32 = 1024;

/// Bit width of the serialised pitch period.
pub const LONGTERM_PERIOD_NUM_BITS: u32 = 10;

/// Minimum pitch period for which long-term prediction is used.
pub const LONGTERM_MIN_PITCH_THRESHOLD: u32 = 3;

/// Coefficient shift of the pre-/de-emphasis filters.
pub const PRE_EMPHASIS_COEFFICIENT_SHIFT: u32 = 5;

/// PARCOR coefficients below this order are quantised to 16 bits, the rest to 8 bits.
pub const PARCOR_COEF_LOW_ORDER_THRESHOLD: usize = 4;

/// Sentinel for a sample count not yet known.
pub const NUM_SAMPLES_INVALID: u32 = 0xffff_ffff;

/// Sentinel for a block count not yet known.
pub const NUM_BLOCKS_INVALID: u32 = 0xffff_ffff;

/// Sentinel for a maximum block size not yet known.
pub const MAX_BLOCK_SIZE_INVALID: u32 = 0xffff_ffff;

/// Returns the bit width used to quantise the PARCOR coefficient at `order`.
#[inline(always)]
pub fn parcor_quantize_bit_width(order: usize) -> u32 {
    if order < PARCOR_COEF_LOW_ORDER_THRESHOLD {
        16
    }
    else {
        8
    }
}

/// Returns a buffer size sufficient to hold any encoded or decoded block of the given
/// dimensions.
pub fn sufficient_block_size(num_channels: u32, num_samples: u32, bit_per_sample: u32) -> u32 {
    2 * num_channels * num_samples * (bit_per_sample / 8)
}

/// How a multi-channel block is decorrelated before prediction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelProcessMethod {
    /// Channels are coded independently.
    None = 0,
    /// Two-channel mid/side transform: `mid = (L + R) >> 1`, `side = L - R`.
    StereoMs = 1,
}

impl TryFrom<u8> for ChannelProcessMethod {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, u8> {
        match value {
            0 => Ok(ChannelProcessMethod::None),
            1 => Ok(ChannelProcessMethod::StereoMs),
            _ => Err(value),
        }
    }
}

/// The payload type of a block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockDataType {
    /// Predictor residuals, entropy coded.
    Compressed = 0,
    /// Verbatim samples; emitted when the compression estimate is not worthwhile.
    Raw = 1,
    /// No payload; every sample in the block is zero.
    Silent = 2,
}

impl TryFrom<u8> for BlockDataType {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, u8> {
        match value {
            0 => Ok(BlockDataType::Compressed),
            1 => Ok(BlockDataType::Raw),
            2 => Ok(BlockDataType::Silent),
            _ => Err(value),
        }
    }
}

/// The sample format of the PCM waveform being coded.
///
/// Samples handed to the encoder (and produced by the decoder) are 32-bit signed integers
/// with the payload left-aligned: a `bit_per_sample`-bit waveform occupies the top bits of
/// each word. `offset_lshift` counts additional trailing zero bits inside the payload; the
/// encoder strips them and the decoder restores them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaveFormat {
    pub num_channels: u32,
    pub bit_per_sample: u32,
    pub sampling_rate: u32,
    pub offset_lshift: u32,
}

/// Tunable parameters of the encoder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EncodeParameter {
    /// Order of the PARCOR predictor.
    pub parcor_order: u32,
    /// Tap count of the long-term predictor; must be odd.
    pub longterm_order: u32,
    /// Coefficient count per LMS branch; must be a power of two of at least 4.
    pub lms_order_per_filter: u32,
    pub ch_process_method: ChannelProcessMethod,
    /// Analysis window applied before PARCOR analysis.
    pub window_function: WindowFunction,
    /// Upper bound on samples per block; at least [`MIN_BLOCK_NUM_SAMPLES`].
    pub max_num_block_samples: u32,
}

impl EncodeParameter {
    /// The preset used when no explicit choice is made.
    pub const DEFAULT_PRESET: usize = 2;

    /// The number of available presets.
    pub const NUM_PRESETS: usize = 5;

    /// Returns the encode parameters of compression preset `no` (0 = fastest, 4 = densest),
    /// or `None` for an unknown preset number.
    pub fn preset(no: usize) -> Option<EncodeParameter> {
        let (parcor, longterm, lms, ch_method, window, max_block) = match no {
            0 => (8, 1, 4, ChannelProcessMethod::None, WindowFunction::Rectangular, 4096),
            1 => (8, 1, 8, ChannelProcessMethod::StereoMs, WindowFunction::Sine, 12288),
            2 => (16, 1, 8, ChannelProcessMethod::StereoMs, WindowFunction::Sine, 12288),
            3 => (32, 3, 8, ChannelProcessMethod::StereoMs, WindowFunction::Sine, 12288),
            4 => (32, 3, 8, ChannelProcessMethod::StereoMs, WindowFunction::Sine, 16384),
            _ => return None,
        };

        Some(EncodeParameter {
            parcor_order: parcor,
            longterm_order: longterm,
            lms_order_per_filter: lms,
            ch_process_method: ch_method,
            window_function: window,
            max_num_block_samples: max_block,
        })
    }

    /// Returns these parameters adjusted for a waveform with `num_channels` channels: the
    /// mid/side transform is degraded to independent coding for anything but stereo.
    pub fn adjusted_for_channels(mut self, num_channels: u32) -> EncodeParameter {
        if num_channels != 2 {
            self.ch_process_method = ChannelProcessMethod::None;
        }
        self
    }
}

/// Everything recorded in the 43-byte stream header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeaderInfo {
    pub wave_format: WaveFormat,
    pub encode_param: EncodeParameter,
    pub num_samples: u32,
    pub num_blocks: u32,
    /// Largest encoded block in bytes.
    pub max_block_size: u32,
    /// Peak coded bit rate over all blocks.
    pub max_bit_per_second: u32,
}

impl Default for HeaderInfo {
    fn default() -> Self {
        HeaderInfo {
            wave_format: WaveFormat {
                num_channels: 0,
                bit_per_sample: 0,
                sampling_rate: 0,
                offset_lshift: 0,
            },
            encode_param: EncodeParameter {
                parcor_order: 0,
                longterm_order: 0,
                lms_order_per_filter: 0,
                ch_process_method: ChannelProcessMethod::None,
                // The analysis window is an encoder-side choice and is not recorded in the
                // stream.
                window_function: WindowFunction::Rectangular,
                max_num_block_samples: 0,
            },
            num_samples: NUM_SAMPLES_INVALID,
            num_blocks: NUM_BLOCKS_INVALID,
            max_block_size: MAX_BLOCK_SIZE_INVALID,
            max_bit_per_second: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verify_parcor_quantize_bit_width() {
        assert_eq!(parcor_quantize_bit_width(1), 16);
        assert_eq!(parcor_quantize_bit_width(3), 16);
        assert_eq!(parcor_quantize_bit_width(4), 8);
        assert_eq!(parcor_quantize_bit_width(32), 8);
    }

    #[test]
    fn verify_presets() {
        for no in 0..EncodeParameter::NUM_PRESETS {
            let preset = EncodeParameter::preset(no).unwrap();
            assert!(preset.longterm_order % 2 == 1);
            assert!(preset.lms_order_per_filter.is_power_of_two());
            assert!(preset.lms_order_per_filter >= 4);
            assert!(preset.max_num_block_samples >= MIN_BLOCK_NUM_SAMPLES);
        }

        assert!(EncodeParameter::preset(EncodeParameter::NUM_PRESETS).is_none());

        // Mono input cannot use the stereo transform.
        let mono = EncodeParameter::preset(2).unwrap().adjusted_for_channels(1);
        assert_eq!(mono.ch_process_method, ChannelProcessMethod::None);
        let stereo = EncodeParameter::preset(2).unwrap().adjusted_for_channels(2);
        assert_eq!(stereo.ch_process_method, ChannelProcessMethod::StereoMs);
    }
}

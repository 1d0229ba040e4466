// SLAC
// Copyright (c) 2025 The Project SLAC Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use bitflags::bitflags;
use log::debug;

use slac_core::checksum::crc16_ibm;
use slac_core::errors::{capacity_error, invalid_argument_error, Result, SlacError};
use slac_core::io::BitReader;
use slac_core::util::bits::unsigned_to_signed;

use crate::channel::ms_to_lr_i32;
use crate::coder::{ResidualCoder, NUM_RECURSIVE_RICE_PARAMETERS};
use crate::format::*;
use crate::header::read_header;
use crate::predictor::emphasis::EmphasisFilter;
use crate::predictor::lms::LmsFilter;
use crate::predictor::longterm::LongTermFilter;
use crate::predictor::parcor::ParcorFilter;

bitflags! {
    /// Which of the parameters required for decoding have been applied to the handle.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    struct StatusFlags: u32 {
        const WAVE_FORMAT_SET = 1 << 0;
        const ENCODE_PARAMETER_SET = 1 << 1;
    }
}

/// Capacity limits a [`Decoder`] is built with, plus the CRC policy. All synthesis state is
/// allocated up-front from these; per-block processing never allocates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecoderConfig {
    pub max_num_channels: u32,
    pub max_num_block_samples: u32,
    pub max_parcor_order: u32,
    pub max_longterm_order: u32,
    pub max_lms_order_per_filter: u32,
    /// Verify the CRC-16 of every block (and of the header). Disabling trades integrity
    /// checking for a little speed.
    pub enable_crc_check: bool,
}

impl Default for DecoderConfig {
    fn default() -> Self {
        DecoderConfig {
            max_num_channels: MAX_CHANNELS as u32,
            max_num_block_samples: 16384,
            max_parcor_order: 48,
            max_longterm_order: 5,
            max_lms_order_per_filter: 40,
            enable_crc_check: true,
        }
    }
}

/// The SLAC decoder.
///
/// Mirrors the encoder's synthesis state exactly; all of it is reset at every block
/// boundary, so blocks decode independently given correct positioning.
pub struct Decoder {
    config: DecoderConfig,
    wave_format: WaveFormat,
    encode_param: EncodeParameter,
    status: StatusFlags,

    coder: ResidualCoder,

    parcor_filters: Vec<ParcorFilter>,
    longterm_filters: Vec<LongTermFilter>,
    lms_filters: Vec<LmsFilter>,
    emphasis_filters: Vec<EmphasisFilter>,

    parcor_coef: Vec<Vec<i32>>,
    longterm_coef: Vec<Vec<i32>>,
    pitch_period: Vec<u32>,

    block_data_type: BlockDataType,
    residual: Vec<Vec<i32>>,
    output: Vec<Vec<i32>>,
}

impl Decoder {
    /// Instantiate a decoder with the given capacity limits.
    pub fn new(config: &DecoderConfig) -> Result<Decoder> {
        if config.max_num_channels == 0 || config.max_num_channels > MAX_CHANNELS as u32 {
            return invalid_argument_error("unsupported channel capacity");
        }
        if config.max_num_block_samples < MIN_BLOCK_NUM_SAMPLES
            || config.max_num_block_samples > u32::from(u16::MAX)
        {
            return invalid_argument_error("unsupported block sample capacity");
        }
        if config.max_parcor_order == 0 {
            return invalid_argument_error("parcor order capacity must be at least 1");
        }

        let num_channels = config.max_num_channels as usize;
        let num_block_samples = config.max_num_block_samples as usize;
        let parcor_len = config.max_parcor_order as usize + 1;
        let longterm_len = (config.max_longterm_order as usize).max(1);

        Ok(Decoder {
            config: *config,
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
                window_function: WindowFunction::Rectangular,
                max_num_block_samples: 0,
            },
            status: StatusFlags::empty(),
            coder: ResidualCoder::new(num_channels, NUM_RECURSIVE_RICE_PARAMETERS),
            parcor_filters: (0..num_channels)
                .map(|_| ParcorFilter::new(config.max_parcor_order as usize))
                .collect(),
            longterm_filters: (0..num_channels)
                .map(|_| LongTermFilter::new(longterm_len, LONGTERM_MAX_PERIOD as usize))
                .collect(),
            lms_filters: (0..num_channels)
                .map(|_| LmsFilter::new(config.max_lms_order_per_filter as usize))
                .collect(),
            emphasis_filters: (0..num_channels).map(|_| EmphasisFilter::new()).collect(),
            parcor_coef: vec![vec![0; parcor_len]; num_channels],
            longterm_coef: vec![vec![0; longterm_len]; num_channels],
            pitch_period: vec![0; num_channels],
            block_data_type: BlockDataType::Silent,
            residual: vec![vec![0; num_block_samples]; num_channels],
            output: vec![vec![0; num_block_samples]; num_channels],
        })
    }

    /// Applies a wave format to the handle, typically taken from a parsed header.
    pub fn set_wave_format(&mut self, wave_format: &WaveFormat) -> Result<()> {
        if wave_format.num_channels == 0
            || wave_format.num_channels > self.config.max_num_channels
        {
            return capacity_error("channel count exceeds decoder capacity");
        }
        if wave_format.bit_per_sample > 32 {
            return capacity_error("bit depth exceeds 32 bits");
        }
        if wave_format.bit_per_sample <= wave_format.offset_lshift {
            return invalid_argument_error("offset shift consumes the whole sample");
        }

        self.wave_format = *wave_format;
        self.status |= StatusFlags::WAVE_FORMAT_SET;
        Ok(())
    }

    /// Applies encode parameters to the handle, typically taken from a parsed header.
    pub fn set_encode_parameter(&mut self, encode_param: &EncodeParameter) -> Result<()> {
        if encode_param.parcor_order == 0
            || encode_param.parcor_order > self.config.max_parcor_order
        {
            return capacity_error("parcor order exceeds decoder capacity");
        }
        if encode_param.longterm_order > self.config.max_longterm_order {
            return capacity_error("long-term order exceeds decoder capacity");
        }
        if encode_param.lms_order_per_filter > self.config.max_lms_order_per_filter {
            return capacity_error("lms order exceeds decoder capacity");
        }
        if encode_param.lms_order_per_filter < 4
            || !encode_param.lms_order_per_filter.is_power_of_two()
        {
            return invalid_argument_error("lms order must be a power of two of at least 4");
        }
        if encode_param.max_num_block_samples > self.config.max_num_block_samples
            || encode_param.max_num_block_samples < MIN_BLOCK_NUM_SAMPLES
        {
            return capacity_error("block sample bound exceeds decoder capacity");
        }

        self.encode_param = *encode_param;
        self.status |= StatusFlags::ENCODE_PARAMETER_SET;
        Ok(())
    }

    fn require_params(&self) -> Result<(WaveFormat, EncodeParameter)> {
        if !self.status.contains(StatusFlags::WAVE_FORMAT_SET | StatusFlags::ENCODE_PARAMETER_SET)
        {
            return Err(SlacError::ParameterNotSet);
        }
        Ok((self.wave_format, self.encode_param))
    }

    /// Decodes a whole stream: header plus every block.
    ///
    /// The wave format and encode parameters are taken from the header and applied to the
    /// handle. `buffer` must hold one channel vector of at least `num_samples` samples each.
    /// Returns the number of samples decoded per channel.
    pub fn decode(&mut self, data: &[u8], buffer: &mut [Vec<i32>]) -> Result<u32> {
        let mut header = HeaderInfo::default();
        read_header(data, &mut header)?;

        self.set_wave_format(&header.wave_format)?;
        self.set_encode_parameter(&header.encode_param)?;

        let num_channels = header.wave_format.num_channels as usize;
        if buffer.len() < num_channels {
            return invalid_argument_error("channel count of the buffer mismatches the stream");
        }
        if buffer[..num_channels].iter().any(|ch| ch.len() < header.num_samples as usize) {
            return Err(SlacError::InsufficientBufferSize);
        }

        let mut decode_offset_byte = HEADER_SIZE;
        let mut decode_offset_sample = 0u32;

        while decode_offset_sample < header.num_samples {
            if decode_offset_byte > data.len() {
                return Err(SlacError::InsufficientDataSize);
            }

            let mut block_buffer: Vec<&mut [i32]> = buffer[..num_channels]
                .iter_mut()
                .map(|ch| &mut ch[decode_offset_sample as usize..])
                .collect();

            let (block_size, block_num_samples) =
                self.decode_block(&data[decode_offset_byte..], &mut block_buffer)?;

            decode_offset_byte += block_size;
            decode_offset_sample += block_num_samples;
        }

        debug!(
            "decoded {} samples x {} ch from {} bytes",
            decode_offset_sample, num_channels, decode_offset_byte
        );

        Ok(decode_offset_sample)
    }

    /// Decodes one block from the front of `data` into `buffer`.
    ///
    /// Returns the consumed block size in bytes and the number of samples produced per
    /// channel.
    pub fn decode_block(
        &mut self,
        data: &[u8],
        buffer: &mut [&mut [i32]],
    ) -> Result<(usize, u32)> {
        let (wave_format, encode_param) = self.require_params()?;

        let num_channels = wave_format.num_channels as usize;
        if buffer.len() < num_channels {
            return invalid_argument_error("channel count of the buffer mismatches the stream");
        }
        if encode_param.ch_process_method == ChannelProcessMethod::StereoMs
            && wave_format.num_channels != 2
        {
            return Err(SlacError::InvalidChannelProcessMethod);
        }

        let mut reader = BitReader::new(data);

        let (block_size, block_num_samples) =
            self.decode_block_header(&mut reader, data, &wave_format, &encode_param)?;

        if block_size > data.len() {
            return Err(SlacError::InsufficientDataSize);
        }
        if block_num_samples > self.config.max_num_block_samples {
            return capacity_error("block sample count exceeds decoder capacity");
        }
        if buffer[..num_channels].iter().any(|ch| ch.len() < block_num_samples as usize) {
            return Err(SlacError::InsufficientBufferSize);
        }

        // Every synthesis module starts each block from zero state.
        self.reset_synthesizers(num_channels);

        self.decode_wave_data(
            &mut reader,
            buffer,
            &wave_format,
            &encode_param,
            block_num_samples as usize,
        )?;

        Ok((block_size, block_num_samples))
    }

    /// Parses the block header: framing fields and the per-channel coefficient sections.
    fn decode_block_header(
        &mut self,
        reader: &mut BitReader<'_>,
        data: &[u8],
        wave_format: &WaveFormat,
        encode_param: &EncodeParameter,
    ) -> Result<(usize, u32)> {
        if data.len() < BLOCK_HEADER_SIZE {
            return Err(SlacError::InsufficientDataSize);
        }

        let sync = reader.get_bits(16)?;
        if sync != u64::from(BLOCK_SYNC_CODE) {
            return Err(SlacError::SyncCodeNotFound);
        }

        // The offset field counts from its own end to the end of the block.
        let next_block_offset = reader.get_bits(32)? as usize;
        let block_size = next_block_offset + 2 + 4;

        let stored_crc = reader.get_bits(16)? as u16;

        // The CRC can only be verified once the whole block is present.
        if self.config.enable_crc_check && data.len() >= block_size {
            if block_size < BLOCK_CRC16_CALC_START_OFFSET {
                return Err(SlacError::DataCorruption);
            }
            let computed_crc = crc16_ibm(&data[BLOCK_CRC16_CALC_START_OFFSET..block_size]);
            if computed_crc != stored_crc {
                return Err(SlacError::DataCorruption);
            }
        }

        let block_num_samples = reader.get_bits(16)? as u32;
        if block_num_samples == 0 {
            return Err(SlacError::DataCorruption);
        }

        self.block_data_type = BlockDataType::try_from(reader.get_bits(2)? as u8)
            .map_err(|_| SlacError::InvalidHeaderFormat("unknown block data type"))?;

        debug!(
            "block header: size={} samples={} type={:?}",
            block_size, block_num_samples, self.block_data_type
        );

        if self.block_data_type == BlockDataType::Compressed {
            let parcor_order = encode_param.parcor_order as usize;
            let longterm_order = encode_param.longterm_order as usize;

            for ch in 0..wave_format.num_channels as usize {
                let rshift = reader.get_bits(4)? as u32;

                // The 0th coefficient is fixed at zero.
                self.parcor_coef[ch][0] = 0;
                for ord in 1..=parcor_order {
                    let qbits = parcor_quantize_bit_width(ord);
                    let code = unsigned_to_signed(reader.get_bits(qbits)? as u32);
                    // Widen to the 16-bit base, then undo the encoder's overflow guard.
                    self.parcor_coef[ch][ord] = (code << (16 - qbits)) >> rshift;
                }

                if reader.get_bit()? {
                    let pitch_period = reader.get_bits(LONGTERM_PERIOD_NUM_BITS)? as u32;
                    // A period shorter than half the filter span would make the synthesis
                    // filter reference samples at or beyond the present; no valid stream
                    // contains one.
                    if pitch_period < LONGTERM_MIN_PITCH_THRESHOLD
                        || (pitch_period as usize) < longterm_order / 2 + 1
                    {
                        return Err(SlacError::DataCorruption);
                    }
                    self.pitch_period[ch] = pitch_period;
                    for ord in 0..longterm_order {
                        let code = unsigned_to_signed(reader.get_bits(16)? as u32);
                        self.longterm_coef[ch][ord] = code << 16;
                    }
                }
                else {
                    // Long-term prediction unused for this channel.
                    self.pitch_period[ch] = 0;
                }

                self.coder.get_initial_parameter(
                    reader,
                    NUM_RECURSIVE_RICE_PARAMETERS,
                    wave_format.bit_per_sample,
                    ch,
                )?;
            }
        }

        // The payload is byte-aligned.
        reader.flush();

        Ok((block_size, block_num_samples))
    }

    /// Decodes the block payload and runs the synthesis cascade into `buffer`.
    fn decode_wave_data(
        &mut self,
        reader: &mut BitReader<'_>,
        buffer: &mut [&mut [i32]],
        wave_format: &WaveFormat,
        encode_param: &EncodeParameter,
        num_samples: usize,
    ) -> Result<()> {
        let num_channels = wave_format.num_channels as usize;

        match self.block_data_type {
            BlockDataType::Silent => {
                for chan in self.output[..num_channels].iter_mut() {
                    chan[..num_samples].fill(0);
                }
            }
            BlockDataType::Raw => {
                let mut input_bits = [0u32; MAX_CHANNELS];
                for (ch, bits) in input_bits[..num_channels].iter_mut().enumerate() {
                    *bits = wave_format.bit_per_sample - wave_format.offset_lshift;
                    // Under mid/side the second channel carries L - R, one extra bit.
                    if ch == 1 && encode_param.ch_process_method == ChannelProcessMethod::StereoMs
                    {
                        *bits += 1;
                    }
                }

                for smpl in 0..num_samples {
                    for ch in 0..num_channels {
                        let folded = reader.get_bits(input_bits[ch])? as u32;
                        self.output[ch][smpl] = unsigned_to_signed(folded);
                    }
                }
            }
            BlockDataType::Compressed => {
                self.coder.get_data_array(
                    reader,
                    NUM_RECURSIVE_RICE_PARAMETERS,
                    &mut self.residual,
                    num_channels,
                    num_samples,
                )?;

                for ch in 0..num_channels {
                    self.synthesize_channel(encode_param, ch, num_samples)?;
                }
            }
        }

        // Undo the channel decorrelation.
        if encode_param.ch_process_method == ChannelProcessMethod::StereoMs {
            let (mid, side) = self.output.split_at_mut(1);
            ms_to_lr_i32(&mut mid[0][..num_samples], &mut side[0][..num_samples]);
        }

        // Re-align the payload to the top of the 32-bit word.
        let total_shift = 32 - wave_format.bit_per_sample + wave_format.offset_lshift;
        for ch in 0..num_channels {
            for smpl in 0..num_samples {
                buffer[ch][smpl] = self.output[ch][smpl].wrapping_shl(total_shift);
            }
        }

        Ok(())
    }

    /// Runs the inverse prediction cascade of one channel: LMS, long-term, PARCOR lattice,
    /// then de-emphasis, leaving the samples in `self.output[ch]`.
    fn synthesize_channel(
        &mut self,
        encode_param: &EncodeParameter,
        ch: usize,
        num_samples: usize,
    ) -> Result<()> {
        let parcor_order = encode_param.parcor_order as usize;
        let longterm_order = encode_param.longterm_order as usize;
        let lms_order = encode_param.lms_order_per_filter as usize;

        self.lms_filters[ch]
            .synthesize(
                lms_order,
                &self.residual[ch][..num_samples],
                &mut self.output[ch][..num_samples],
            )
            .map_err(|_| SlacError::SynthesisFailed)?;
        self.residual[ch][..num_samples].copy_from_slice(&self.output[ch][..num_samples]);

        if self.pitch_period[ch] != 0 {
            self.longterm_filters[ch]
                .synthesize(
                    &self.residual[ch][..num_samples],
                    self.pitch_period[ch],
                    &self.longterm_coef[ch],
                    longterm_order,
                    &mut self.output[ch][..num_samples],
                )
                .map_err(|_| SlacError::SynthesisFailed)?;
            self.residual[ch][..num_samples].copy_from_slice(&self.output[ch][..num_samples]);
        }

        self.parcor_filters[ch]
            .synthesize(
                &self.residual[ch][..num_samples],
                &self.parcor_coef[ch],
                parcor_order,
                &mut self.output[ch][..num_samples],
            )
            .map_err(|_| SlacError::SynthesisFailed)?;

        self.emphasis_filters[ch]
            .de_emphasis(&mut self.output[ch][..num_samples], PRE_EMPHASIS_COEFFICIENT_SHIFT);

        Ok(())
    }

    fn reset_synthesizers(&mut self, num_channels: usize) {
        for ch in 0..num_channels {
            self.emphasis_filters[ch].reset();
            self.parcor_filters[ch].reset();
            self.longterm_filters[ch].reset();
            self.lms_filters[ch].reset();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verify_parameter_discipline() {
        let mut decoder = Decoder::new(&DecoderConfig::default()).unwrap();

        let mut chan = vec![0i32; 2048];
        let mut buffer = [chan.as_mut_slice()];
        assert_eq!(
            decoder.decode_block(&[0u8; 64], &mut buffer),
            Err(SlacError::ParameterNotSet)
        );
    }

    #[test]
    fn verify_sync_code_detection() {
        let mut decoder = Decoder::new(&DecoderConfig::default()).unwrap();

        decoder
            .set_wave_format(&WaveFormat {
                num_channels: 1,
                bit_per_sample: 16,
                sampling_rate: 44100,
                offset_lshift: 0,
            })
            .unwrap();
        decoder
            .set_encode_parameter(
                &EncodeParameter::preset(0).unwrap().adjusted_for_channels(1),
            )
            .unwrap();

        let mut chan = vec![0i32; 2048];
        let mut buffer = [chan.as_mut_slice()];

        // Not a sync code.
        let data = [0x00u8; 64];
        assert_eq!(
            decoder.decode_block(&data, &mut buffer),
            Err(SlacError::SyncCodeNotFound)
        );
    }

    #[test]
    fn verify_capacity_checks() {
        let mut decoder = Decoder::new(&DecoderConfig::default()).unwrap();

        // More channels than the handle supports.
        assert!(decoder
            .set_wave_format(&WaveFormat {
                num_channels: 9,
                bit_per_sample: 16,
                sampling_rate: 44100,
                offset_lshift: 0,
            })
            .is_err());

        // Encode parameters beyond capacity.
        let mut param = EncodeParameter::preset(0).unwrap();
        param.parcor_order = 64;
        assert!(decoder.set_encode_parameter(&param).is_err());
    }
}

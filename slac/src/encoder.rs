// SLAC
// Copyright (c) 2025 The Project SLAC Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use log::debug;

use slac_core::checksum::crc16_ibm;
use slac_core::errors::{capacity_error, invalid_argument_error, Result, SlacError};
use slac_core::io::{BitWriter, SeekFrom};
use slac_core::util::bits::{
    data_bit_width, round_up_pow2, rshift_for_i32_product, signed_to_unsigned,
};

use crate::channel::{lr_to_ms_f64, lr_to_ms_i32};
use crate::coder::{ResidualCoder, NUM_RECURSIVE_RICE_PARAMETERS};
use crate::format::*;
use crate::header::write_header;
use crate::partition::BlockPartitionEstimator;
use crate::predictor::emphasis::{pre_emphasis_f64, EmphasisFilter};
use crate::predictor::lms::LmsFilter;
use crate::predictor::longterm::{LongTermAnalyzer, LongTermFilter};
use crate::predictor::parcor::{estimate_code_length, ParcorAnalyzer, ParcorFilter};

/// Estimated compression ratio (coded bits over raw bits) at or above which prediction is
/// abandoned and the block is emitted as raw samples.
const ESTIMATE_CODELENGTH_THRESHOLD: f64 = 0.95;

/// Capacity limits an [`Encoder`] is built with. All scratch state is allocated up-front
/// from these; per-block processing never allocates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EncoderConfig {
    pub max_num_channels: u32,
    pub max_num_block_samples: u32,
    pub max_parcor_order: u32,
    pub max_longterm_order: u32,
    pub max_lms_order_per_filter: u32,
}

impl Default for EncoderConfig {
    fn default() -> Self {
        EncoderConfig {
            max_num_channels: MAX_CHANNELS as u32,
            max_num_block_samples: 16384,
            max_parcor_order: 48,
            max_longterm_order: 5,
            max_lms_order_per_filter: 40,
        }
    }
}

/// The SLAC encoder.
///
/// A handle owns every analysis and synthesis buffer it will ever need, sized by its
/// [`EncoderConfig`]. Set a wave format and encode parameters, then either drive
/// [`Encoder::encode`] over a whole waveform or emit blocks manually with
/// [`Encoder::encode_block`].
pub struct Encoder {
    config: EncoderConfig,
    wave_format: Option<WaveFormat>,
    encode_param: Option<EncodeParameter>,

    coder: ResidualCoder,
    parcor_analyzer: ParcorAnalyzer,
    longterm_analyzer: LongTermAnalyzer,
    estimator: BlockPartitionEstimator,

    parcor_filters: Vec<ParcorFilter>,
    longterm_filters: Vec<LongTermFilter>,
    lms_filters: Vec<LmsFilter>,
    emphasis_filters: Vec<EmphasisFilter>,

    input_f64: Vec<Vec<f64>>,
    input_i32: Vec<Vec<i32>>,
    residual: Vec<Vec<i32>>,
    tmp_residual: Vec<Vec<i32>>,

    parcor_coef_f64: Vec<Vec<f64>>,
    parcor_coef_i32: Vec<Vec<i32>>,
    parcor_coef_code: Vec<Vec<i32>>,
    parcor_rshift: Vec<u32>,

    longterm_coef_f64: Vec<Vec<f64>>,
    longterm_coef_i32: Vec<Vec<i32>>,
    pitch_period: Vec<u32>,

    window: Vec<f64>,
    partition_samples: Vec<u32>,
}

impl Encoder {
    /// Instantiate an encoder with the given capacity limits.
    pub fn new(config: &EncoderConfig) -> Result<Encoder> {
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
        let longterm_len = config.max_longterm_order as usize;

        // The long-term analyser needs twice the block span so circular correlation
        // artefacts stay clear of the examined lags.
        let fft_size = round_up_pow2(2 * config.max_num_block_samples) as usize;

        let max_partitions = BlockPartitionEstimator::max_num_partitions(
            config.max_num_block_samples,
            SEARCH_BLOCK_NUM_SAMPLES_DELTA,
        );

        Ok(Encoder {
            config: *config,
            wave_format: None,
            encode_param: None,
            coder: ResidualCoder::new(num_channels, NUM_RECURSIVE_RICE_PARAMETERS),
            parcor_analyzer: ParcorAnalyzer::new(config.max_parcor_order as usize),
            longterm_analyzer: LongTermAnalyzer::new(
                fft_size,
                LONGTERM_MAX_PERIOD as usize,
                LONGTERM_MAX_PERIOD as usize,
                longterm_len.max(1),
            ),
            estimator: BlockPartitionEstimator::new(
                config.max_num_block_samples,
                SEARCH_BLOCK_NUM_SAMPLES_DELTA,
                config.max_parcor_order as usize,
            ),
            parcor_filters: (0..num_channels)
                .map(|_| ParcorFilter::new(config.max_parcor_order as usize))
                .collect(),
            longterm_filters: (0..num_channels)
                .map(|_| LongTermFilter::new(longterm_len.max(1), LONGTERM_MAX_PERIOD as usize))
                .collect(),
            lms_filters: (0..num_channels)
                .map(|_| LmsFilter::new(config.max_lms_order_per_filter as usize))
                .collect(),
            emphasis_filters: (0..num_channels).map(|_| EmphasisFilter::new()).collect(),
            input_f64: vec![vec![0.0; num_block_samples]; num_channels],
            input_i32: vec![vec![0; num_block_samples]; num_channels],
            residual: vec![vec![0; num_block_samples]; num_channels],
            tmp_residual: vec![vec![0; num_block_samples]; num_channels],
            parcor_coef_f64: vec![vec![0.0; parcor_len]; num_channels],
            parcor_coef_i32: vec![vec![0; parcor_len]; num_channels],
            parcor_coef_code: vec![vec![0; parcor_len]; num_channels],
            parcor_rshift: vec![0; num_channels],
            longterm_coef_f64: vec![vec![0.0; longterm_len.max(1)]; num_channels],
            longterm_coef_i32: vec![vec![0; longterm_len.max(1)]; num_channels],
            pitch_period: vec![0; num_channels],
            window: vec![0.0; num_block_samples],
            partition_samples: vec![0; max_partitions],
        })
    }

    /// Sets the wave format of the samples to encode.
    pub fn set_wave_format(&mut self, wave_format: &WaveFormat) -> Result<()> {
        if wave_format.num_channels == 0
            || wave_format.num_channels > self.config.max_num_channels
        {
            return capacity_error("channel count exceeds encoder capacity");
        }
        if wave_format.bit_per_sample > 32 {
            return capacity_error("bit depth exceeds 32 bits");
        }
        if wave_format.bit_per_sample <= wave_format.offset_lshift {
            return invalid_argument_error("offset shift consumes the whole sample");
        }

        self.wave_format = Some(*wave_format);
        Ok(())
    }

    /// Sets the encode parameters.
    pub fn set_encode_parameter(&mut self, encode_param: &EncodeParameter) -> Result<()> {
        if encode_param.parcor_order == 0 || encode_param.parcor_order > self.config.max_parcor_order
        {
            return capacity_error("parcor order exceeds encoder capacity");
        }
        if encode_param.longterm_order > self.config.max_longterm_order {
            return capacity_error("long-term order exceeds encoder capacity");
        }
        if encode_param.longterm_order % 2 == 0 {
            return invalid_argument_error("long-term order must be odd");
        }
        if encode_param.lms_order_per_filter > self.config.max_lms_order_per_filter {
            return capacity_error("lms order exceeds encoder capacity");
        }
        if encode_param.lms_order_per_filter < 4
            || !encode_param.lms_order_per_filter.is_power_of_two()
        {
            return invalid_argument_error("lms order must be a power of two of at least 4");
        }
        if encode_param.max_num_block_samples > self.config.max_num_block_samples
            || encode_param.max_num_block_samples < MIN_BLOCK_NUM_SAMPLES
        {
            return capacity_error("block sample bound exceeds encoder capacity");
        }

        self.encode_param = Some(*encode_param);
        Ok(())
    }

    fn require_params(&self) -> Result<(WaveFormat, EncodeParameter)> {
        match (self.wave_format, self.encode_param) {
            (Some(wf), Some(ep)) => Ok((wf, ep)),
            _ => Err(SlacError::ParameterNotSet),
        }
    }

    /// Encodes the whole waveform into `data`: a finalised header followed by every block.
    ///
    /// `input` holds one fully left-aligned `i32` sample slice per channel, all of equal
    /// length. Returns the number of bytes written.
    pub fn encode(&mut self, input: &[Vec<i32>], data: &mut [u8]) -> Result<usize> {
        let (wave_format, encode_param) = self.require_params()?;

        let num_channels = wave_format.num_channels as usize;
        if input.len() != num_channels {
            return invalid_argument_error("channel count of the input mismatches the format");
        }

        let num_samples = input[0].len() as u32;
        debug_assert!(input.iter().all(|ch| ch.len() == num_samples as usize));

        let mut header = HeaderInfo {
            wave_format,
            encode_param,
            num_samples,
            num_blocks: NUM_BLOCKS_INVALID,
            max_block_size: MAX_BLOCK_SIZE_INVALID,
            max_bit_per_second: 0,
        };

        // Provisional header; the block statistics are patched in at the end.
        write_header(&header, data)?;

        // The trailing zero bits shared by every sample carry no information; strip them
        // for the whole stream.
        let offset_lshift = self.calculate_left_shift_offset(input, wave_format.bit_per_sample);
        header.wave_format.offset_lshift = offset_lshift;
        self.wave_format = Some(header.wave_format);
        let wave_format = header.wave_format;

        let mut cur_output_size = HEADER_SIZE;
        let mut encode_offset = 0u32;
        let mut num_blocks = 0u32;
        let mut max_block_size = 0u32;
        let mut max_bit_per_second = 0u32;

        while encode_offset < num_samples {
            if cur_output_size >= data.len() {
                return Err(SlacError::InsufficientBufferSize);
            }

            let num_remain = num_samples - encode_offset;
            let window = encode_param.max_num_block_samples.min(num_remain);

            let num_partitions = self.search_block_partitions(
                input,
                encode_offset,
                window,
                MIN_BLOCK_NUM_SAMPLES.min(num_remain),
                SEARCH_BLOCK_NUM_SAMPLES_DELTA,
                window,
            )?;

            for part in 0..num_partitions {
                let num_encode_samples = self.partition_samples[part];

                let mut block_input: [&[i32]; MAX_CHANNELS] = [&[]; MAX_CHANNELS];
                for (ch, chan) in input.iter().enumerate() {
                    block_input[ch] = &chan[encode_offset as usize
                        ..(encode_offset + num_encode_samples) as usize];
                }

                let block_size = self.encode_block(
                    &block_input[..num_channels],
                    &mut data[cur_output_size..],
                )?;

                cur_output_size += block_size;
                encode_offset += num_encode_samples;
                num_blocks += 1;

                max_block_size = max_block_size.max(block_size as u32);

                let block_bit_per_second = (8 * block_size as u64
                    * u64::from(wave_format.sampling_rate))
                    / u64::from(num_encode_samples);
                max_bit_per_second = max_bit_per_second.max(block_bit_per_second as u32);
            }
        }

        // Final header with the block statistics filled in.
        header.num_blocks = num_blocks;
        header.max_block_size = max_block_size;
        header.max_bit_per_second = max_bit_per_second;
        write_header(&header, data)?;

        debug!(
            "encoded {} samples x {} ch into {} blocks, {} bytes",
            num_samples, num_channels, num_blocks, cur_output_size
        );

        Ok(cur_output_size)
    }

    /// Encodes one block of samples into `data`, returning the encoded size in bytes.
    ///
    /// Every channel slice must have the same length, at most the handle's block capacity.
    pub fn encode_block(&mut self, input: &[&[i32]], data: &mut [u8]) -> Result<usize> {
        let (wave_format, encode_param) = self.require_params()?;

        let num_channels = wave_format.num_channels as usize;
        if input.len() != num_channels {
            return invalid_argument_error("channel count of the input mismatches the format");
        }

        let num_samples = input[0].len();
        if num_samples > self.config.max_num_block_samples as usize {
            return capacity_error("block sample count exceeds encoder capacity");
        }
        debug_assert!(input.iter().all(|ch| ch.len() == num_samples));

        if data.len() <= BLOCK_HEADER_SIZE {
            return Err(SlacError::InsufficientBufferSize);
        }

        encode_param.window_function.fill(&mut self.window[..num_samples]);

        // Float copy for analysis, right-shifted integer copy for the bit-exact path.
        let total_shift = 32 - wave_format.bit_per_sample + wave_format.offset_lshift;
        for (ch, chan) in input.iter().enumerate() {
            for (smpl, &sample) in chan.iter().enumerate() {
                self.input_f64[ch][smpl] = f64::from(sample) * 2.0f64.powi(-31);
                self.input_i32[ch][smpl] = sample >> total_shift;
            }
        }

        self.apply_channel_processing(&wave_format, &encode_param, num_samples)?;

        // An all-zero block needs a header and nothing else.
        let mut block_data_type = BlockDataType::Silent;
        'silence: for ch in 0..num_channels {
            for smpl in 0..num_samples {
                if self.input_i32[ch][smpl] != 0 {
                    block_data_type = BlockDataType::Compressed;
                    break 'silence;
                }
            }
        }

        if block_data_type == BlockDataType::Compressed {
            for ch in 0..num_channels {
                if !self.compute_channel_residual(
                    &wave_format,
                    &encode_param,
                    ch,
                    num_samples,
                )? {
                    // Prediction is not expected to pay off; fall back to raw samples.
                    block_data_type = BlockDataType::Raw;
                    break;
                }
            }
        }

        if block_data_type == BlockDataType::Compressed {
            self.coder.calculate_initial_parameters(
                NUM_RECURSIVE_RICE_PARAMETERS,
                &self.residual,
                num_channels,
                num_samples,
            );
        }

        debug!("block: type={:?} samples={}", block_data_type, num_samples);

        let output_size;
        {
            let mut writer = BitWriter::new(data);

            writer.put_bits(u64::from(BLOCK_SYNC_CODE), 16)?;
            // Next-block offset and CRC-16 are patched in below.
            writer.put_bits(0, 32)?;
            writer.put_bits(0, 16)?;
            writer.put_bits(num_samples as u64, 16)?;
            writer.put_bits(block_data_type as u64, 2)?;

            if block_data_type == BlockDataType::Compressed {
                for ch in 0..num_channels {
                    self.put_channel_coefficients(
                        &mut writer,
                        &wave_format,
                        &encode_param,
                        ch,
                    )?;
                }
            }

            // The per-channel coefficients end the block header; the payload is
            // byte-aligned.
            writer.flush()?;

            match block_data_type {
                BlockDataType::Raw => {
                    self.put_raw_samples(&mut writer, &wave_format, &encode_param, num_samples)?;
                }
                BlockDataType::Compressed => {
                    self.coder.put_data_array(
                        &mut writer,
                        NUM_RECURSIVE_RICE_PARAMETERS,
                        &self.residual,
                        num_channels,
                        num_samples,
                    )?;
                }
                BlockDataType::Silent => (),
            }

            writer.flush()?;
            output_size = writer.tell();
        }

        // Patch the block size and payload CRC into the header.
        let crc = crc16_ibm(&data[BLOCK_CRC16_CALC_START_OFFSET..output_size]);
        let mut writer = BitWriter::new(data);
        writer.seek(SeekFrom::Start(2))?;
        writer.put_bits((output_size - 2 - 4) as u64, 32)?;
        writer.put_bits(u64::from(crc), 16)?;

        Ok(output_size)
    }

    /// Runs the prediction cascade of one channel, leaving the residual in
    /// `self.residual[ch]`. Returns false when the code-length estimate says raw samples
    /// would be at least as compact.
    fn compute_channel_residual(
        &mut self,
        wave_format: &WaveFormat,
        encode_param: &EncodeParameter,
        ch: usize,
        num_samples: usize,
    ) -> Result<bool> {
        let parcor_order = encode_param.parcor_order as usize;
        let longterm_order = encode_param.longterm_order as usize;
        let lms_order = encode_param.lms_order_per_filter as usize;

        // Analysis path: window, emphasise, then fit the lattice. Windowing first is
        // marginally better than emphasising first.
        slac_core::dsp::window::apply_window(
            &self.window[..num_samples],
            &mut self.input_f64[ch][..num_samples],
        );
        pre_emphasis_f64(&mut self.input_f64[ch][..num_samples], PRE_EMPHASIS_COEFFICIENT_SHIFT);

        self.parcor_analyzer
            .calculate_parcor(
                &self.input_f64[ch][..num_samples],
                parcor_order,
                &mut self.parcor_coef_f64[ch],
            )
            .map_err(|_| SlacError::CoefficientCalculationFailed)?;

        let length_per_sample = estimate_code_length(
            &self.input_f64[ch][..num_samples],
            wave_format.bit_per_sample,
            &self.parcor_coef_f64[ch],
            parcor_order,
        );
        let estimated_ratio = (8.0 * length_per_sample) / f64::from(wave_format.bit_per_sample);

        if estimated_ratio >= ESTIMATE_CODELENGTH_THRESHOLD {
            debug!("ch{}: estimated ratio {:.3}, falling back to raw", ch, estimated_ratio);
            return Ok(false);
        }

        // Coefficient quantisation. The right shift keeps the coefficient-times-signal
        // product inside 32 bits for this channel's data width.
        let bit_width = data_bit_width(&self.input_i32[ch][..num_samples]);
        let rshift = rshift_for_i32_product(bit_width);
        self.parcor_rshift[ch] = rshift;

        debug_assert_eq!(self.parcor_coef_f64[ch][0], 0.0);
        self.parcor_coef_code[ch][0] = 0;
        self.parcor_coef_i32[ch][0] = 0;
        for ord in 1..=parcor_order {
            let qbits = parcor_quantize_bit_width(ord);

            // Rounding at the positive boundary can land one above the signed range; clip.
            let scaled = (self.parcor_coef_f64[ch][ord] * 2.0f64.powi(qbits as i32 - 1)).round();
            let code = (scaled as i64)
                .clamp(-(1i64 << (qbits - 1)), (1i64 << (qbits - 1)) - 1) as i32;
            self.parcor_coef_code[ch][ord] = code;

            // Widen to the 16-bit base, then apply the overflow-guard shift.
            self.parcor_coef_i32[ch][ord] = (code << (16 - qbits)) >> rshift;
        }

        // Stage 1: pre-emphasis on the integer path.
        self.residual[ch][..num_samples].copy_from_slice(&self.input_i32[ch][..num_samples]);
        self.emphasis_filters[ch].reset();
        self.emphasis_filters[ch]
            .pre_emphasis(&mut self.residual[ch][..num_samples], PRE_EMPHASIS_COEFFICIENT_SHIFT);

        // Stage 2: PARCOR lattice prediction.
        self.parcor_filters[ch].reset();
        self.parcor_filters[ch]
            .predict(
                &self.residual[ch][..num_samples],
                &self.parcor_coef_i32[ch],
                parcor_order,
                &mut self.tmp_residual[ch][..num_samples],
            )
            .map_err(|_| SlacError::PredictionFailed)?;
        self.residual[ch][..num_samples].copy_from_slice(&self.tmp_residual[ch][..num_samples]);

        // Stage 3: long-term prediction over the lattice residual, when a usable pitch
        // exists. A failed analysis is not fatal; the block just skips this stage.
        let pitch = self
            .longterm_analyzer
            .calculate_coef(
                &self.residual[ch][..num_samples],
                longterm_order,
                &mut self.longterm_coef_f64[ch],
            )
            .map_err(|_| SlacError::CoefficientCalculationFailed)?;

        self.pitch_period[ch] = match pitch {
            Some(period) if period < LONGTERM_MAX_PERIOD => period,
            _ => 0,
        };

        if self.pitch_period[ch] >= LONGTERM_MIN_PITCH_THRESHOLD {
            // Quantise to 16-bit codes, computed at Q1.31 precision in the filter.
            for ord in 0..longterm_order {
                let scaled = (self.longterm_coef_f64[ch][ord] * 2.0f64.powi(15)).round();
                let code =
                    (scaled as i64).clamp(i64::from(i16::MIN), i64::from(i16::MAX)) as i32;
                self.longterm_coef_i32[ch][ord] = code << 16;
            }

            self.longterm_filters[ch].reset();
            self.longterm_filters[ch]
                .predict(
                    &self.residual[ch][..num_samples],
                    self.pitch_period[ch],
                    &self.longterm_coef_i32[ch],
                    longterm_order,
                    &mut self.tmp_residual[ch][..num_samples],
                )
                .map_err(|_| SlacError::PredictionFailed)?;
            self.residual[ch][..num_samples]
                .copy_from_slice(&self.tmp_residual[ch][..num_samples]);
        }

        // Stage 4: LMS adaptive prediction.
        self.lms_filters[ch].reset();
        self.lms_filters[ch]
            .predict(
                lms_order,
                &self.residual[ch][..num_samples],
                &mut self.tmp_residual[ch][..num_samples],
            )
            .map_err(|_| SlacError::PredictionFailed)?;
        self.residual[ch][..num_samples].copy_from_slice(&self.tmp_residual[ch][..num_samples]);

        Ok(true)
    }

    /// Writes the per-channel coefficient section of the block header.
    fn put_channel_coefficients(
        &self,
        writer: &mut BitWriter<'_>,
        wave_format: &WaveFormat,
        encode_param: &EncodeParameter,
        ch: usize,
    ) -> Result<()> {
        let parcor_order = encode_param.parcor_order as usize;
        let longterm_order = encode_param.longterm_order as usize;

        debug_assert!(self.parcor_rshift[ch] < (1 << 4));
        writer.put_bits(u64::from(self.parcor_rshift[ch]), 4)?;

        // The 0th coefficient is fixed at zero and not serialised.
        for ord in 1..=parcor_order {
            writer.put_bits(
                u64::from(signed_to_unsigned(self.parcor_coef_code[ch][ord])),
                parcor_quantize_bit_width(ord),
            )?;
        }

        if self.pitch_period[ch] >= LONGTERM_MIN_PITCH_THRESHOLD {
            writer.put_bit(true)?;
            writer.put_bits(u64::from(self.pitch_period[ch]), LONGTERM_PERIOD_NUM_BITS)?;
            for ord in 0..longterm_order {
                writer.put_bits(
                    u64::from(signed_to_unsigned(self.longterm_coef_i32[ch][ord] >> 16)),
                    16,
                )?;
            }
        }
        else {
            // No long-term prediction for this channel.
            writer.put_bit(false)?;
        }

        self.coder.put_initial_parameter(writer, wave_format.bit_per_sample, ch)
    }

    /// Writes the channel-interleaved raw payload of a `Raw` block.
    fn put_raw_samples(
        &self,
        writer: &mut BitWriter<'_>,
        wave_format: &WaveFormat,
        encode_param: &EncodeParameter,
        num_samples: usize,
    ) -> Result<()> {
        let num_channels = wave_format.num_channels as usize;

        let mut output_bits = [0u32; MAX_CHANNELS];
        for (ch, bits) in output_bits[..num_channels].iter_mut().enumerate() {
            *bits = wave_format.bit_per_sample - wave_format.offset_lshift;
            // Under mid/side the second channel carries L - R, which spans one extra bit.
            if ch == 1 && encode_param.ch_process_method == ChannelProcessMethod::StereoMs {
                *bits += 1;
            }
        }

        for smpl in 0..num_samples {
            for ch in 0..num_channels {
                writer.put_bits(
                    u64::from(signed_to_unsigned(self.input_i32[ch][smpl])),
                    output_bits[ch],
                )?;
            }
        }

        Ok(())
    }

    /// Applies the configured channel decorrelation to the working buffers.
    fn apply_channel_processing(
        &mut self,
        wave_format: &WaveFormat,
        encode_param: &EncodeParameter,
        num_samples: usize,
    ) -> Result<()> {
        match encode_param.ch_process_method {
            ChannelProcessMethod::StereoMs => {
                if wave_format.num_channels != 2 {
                    return Err(SlacError::InvalidChannelProcessMethod);
                }

                let (left, right) = self.input_f64.split_at_mut(1);
                lr_to_ms_f64(&mut left[0][..num_samples], &mut right[0][..num_samples]);

                let (left, right) = self.input_i32.split_at_mut(1);
                lr_to_ms_i32(&mut left[0][..num_samples], &mut right[0][..num_samples]);
            }
            ChannelProcessMethod::None => (),
        }

        Ok(())
    }

    /// Finds the optimal block partition of the next `num_samples` samples starting at
    /// `offset`, writing the block lengths into `self.partition_samples`.
    fn search_block_partitions(
        &mut self,
        input: &[Vec<i32>],
        offset: u32,
        num_samples: u32,
        min_num_block_samples: u32,
        delta: u32,
        max_num_block_samples: u32,
    ) -> Result<usize> {
        let (wave_format, encode_param) = self.require_params()?;
        let num_channels = wave_format.num_channels as usize;

        if max_num_block_samples < min_num_block_samples {
            return invalid_argument_error("partition bounds are inverted");
        }

        for (ch, chan) in input.iter().enumerate() {
            for smpl in 0..num_samples as usize {
                let sample = chan[offset as usize + smpl];
                self.input_f64[ch][smpl] = f64::from(sample) * 2.0f64.powi(-31);
                self.input_i32[ch][smpl] = sample >> (32 - wave_format.bit_per_sample);
            }
        }

        self.apply_channel_processing(&wave_format, &encode_param, num_samples as usize)?;

        // A silent run of at least the minimum block length becomes one silent block; the
        // partition search is skipped entirely.
        let mut silent_run = num_samples;
        'detect: for smpl in 0..num_samples as usize {
            for ch in 0..num_channels {
                if self.input_i32[ch][smpl] != 0 {
                    silent_run = smpl as u32;
                    break 'detect;
                }
            }
        }

        if silent_run >= min_num_block_samples {
            self.partition_samples[0] = silent_run;
            return Ok(1);
        }

        self.estimator.search(
            &mut self.parcor_analyzer,
            &self.input_f64,
            num_channels,
            num_samples,
            min_num_block_samples,
            delta,
            max_num_block_samples,
            wave_format.bit_per_sample,
            encode_param.parcor_order as usize,
            &mut self.partition_samples,
        )
    }

    /// Counts the trailing zero bits present in every sample of the whole input.
    fn calculate_left_shift_offset(&self, input: &[Vec<i32>], bit_per_sample: u32) -> u32 {
        let mut mask = 0u32;
        for chan in input.iter() {
            for &sample in chan.iter() {
                mask |= sample as u32;
            }
        }

        // All-zero input has no measurable offset.
        if mask == 0 {
            return 0;
        }

        let trailing = mask.trailing_zeros();

        // The low `32 - bit_per_sample` zeros come from left alignment, not from the
        // waveform.
        if trailing >= 32 - bit_per_sample {
            bit_per_sample - (32 - trailing)
        }
        else {
            0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encoder_with_defaults(num_channels: u32, bit_per_sample: u32) -> Encoder {
        let mut encoder = Encoder::new(&EncoderConfig::default()).unwrap();
        encoder
            .set_wave_format(&WaveFormat {
                num_channels,
                bit_per_sample,
                sampling_rate: 44100,
                offset_lshift: 0,
            })
            .unwrap();
        encoder
            .set_encode_parameter(
                &EncodeParameter::preset(EncodeParameter::DEFAULT_PRESET)
                    .unwrap()
                    .adjusted_for_channels(num_channels),
            )
            .unwrap();
        encoder
    }

    #[test]
    fn verify_parameter_validation() {
        let mut encoder = Encoder::new(&EncoderConfig::default()).unwrap();

        // Nothing set yet.
        let mut buf = vec![0u8; 1024];
        assert_eq!(
            encoder.encode_block(&[&[0i32; 2048]], &mut buf),
            Err(SlacError::ParameterNotSet)
        );

        // Channel count beyond capacity.
        assert!(encoder
            .set_wave_format(&WaveFormat {
                num_channels: 9,
                bit_per_sample: 16,
                sampling_rate: 48000,
                offset_lshift: 0,
            })
            .is_err());

        // Even long-term order.
        let mut param = EncodeParameter::preset(0).unwrap();
        param.longterm_order = 2;
        assert!(encoder.set_encode_parameter(&param).is_err());

        // Non-power-of-two LMS order.
        let mut param = EncodeParameter::preset(0).unwrap();
        param.lms_order_per_filter = 6;
        assert!(encoder.set_encode_parameter(&param).is_err());
    }

    #[test]
    fn verify_left_shift_offset_analysis() {
        let encoder = encoder_with_defaults(1, 16);

        // 16-bit samples left-aligned in 32 bits: no extra offset.
        let input = vec![vec![1 << 16, -(1 << 16), 3 << 16]];
        assert_eq!(encoder.calculate_left_shift_offset(&input, 16), 0);

        // Samples only using the top byte: 8 recoverable zero bits.
        let input = vec![vec![1 << 24, 5 << 24]];
        assert_eq!(encoder.calculate_left_shift_offset(&input, 16), 8);

        // All-zero input.
        let input = vec![vec![0; 16]];
        assert_eq!(encoder.calculate_left_shift_offset(&input, 16), 0);
    }

    #[test]
    fn verify_silent_block_layout() {
        let mut encoder = encoder_with_defaults(1, 16);

        let mut buf = vec![0u8; 4096];
        let size = encoder.encode_block(&[&[0i32; 4096]], &mut buf).unwrap();

        // Sync code, then the back-patched size.
        assert_eq!(buf[0], 0xff);
        assert_eq!(buf[1], 0xff);
        let offset = u32::from_be_bytes([buf[2], buf[3], buf[4], buf[5]]);
        assert_eq!(offset as usize, size - 6);

        // Silent blocks are header-only: 82 header bits round up to 11 bytes.
        assert_eq!(size, 11);

        // The block data type field holds Silent (2) in the top bits of the byte after the
        // sample count.
        assert_eq!(buf[10] >> 6, BlockDataType::Silent as u8);
    }
}

// SLAC
// Copyright (c) 2025 The Project SLAC Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! End-to-end encode/decode tests: every waveform must survive the full pipeline
//! bit-exactly, across channel counts, bit depths, channel processing modes, and analysis
//! windows.

use std::f64::consts::PI;

use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};

use slac::format::{
    sufficient_block_size, ChannelProcessMethod, EncodeParameter, HeaderInfo, WaveFormat,
    WindowFunction, BlockDataType, HEADER_SIZE,
};
use slac::{read_header, Decoder, DecoderConfig, Encoder, EncoderConfig};

/// Positions `value` as a left-aligned `bit_per_sample`-bit sample in a 32-bit word.
fn left_align(value: i32, bit_per_sample: u32) -> i32 {
    value.wrapping_shl(32 - bit_per_sample)
}

/// Encodes `input`, decodes the result, asserts bit-exactness, and returns the stream.
fn round_trip(input: &[Vec<i32>], bit_per_sample: u32, param: &EncodeParameter) -> Vec<u8> {
    let num_channels = input.len() as u32;
    let num_samples = input[0].len() as u32;

    let mut encoder = Encoder::new(&EncoderConfig::default()).unwrap();
    encoder
        .set_wave_format(&WaveFormat {
            num_channels,
            bit_per_sample,
            sampling_rate: 44100,
            offset_lshift: 0,
        })
        .unwrap();
    encoder.set_encode_parameter(param).unwrap();

    let mut data = vec![
        0u8;
        HEADER_SIZE
            + sufficient_block_size(num_channels, num_samples, bit_per_sample) as usize
            + 4096
    ];
    let size = encoder.encode(input, &mut data).unwrap();
    assert!(size <= data.len());
    data.truncate(size);

    // The stream leads with the signature.
    assert_eq!(&data[..4], &[0x53, 0x4c, 0x2a, 0x01]);

    let mut decoder = Decoder::new(&DecoderConfig::default()).unwrap();
    let mut output = vec![vec![0i32; num_samples as usize]; num_channels as usize];
    let decoded_samples = decoder.decode(&data, &mut output).unwrap();

    assert_eq!(decoded_samples, num_samples);
    assert_eq!(&output[..], input, "waveform must survive the codec bit-exactly");

    // The finalised header agrees with the stream.
    let mut header = HeaderInfo::default();
    read_header(&data, &mut header).unwrap();
    assert_eq!(header.num_samples, num_samples);
    assert!(header.num_blocks >= 1);
    assert!((header.max_block_size as usize) < data.len());

    data
}

fn stereo_ms_param(window: WindowFunction) -> EncodeParameter {
    let mut param = EncodeParameter::preset(EncodeParameter::DEFAULT_PRESET).unwrap();
    param.window_function = window;
    param
}

#[test]
fn verify_silence_round_trip() {
    let input = vec![vec![0i32; 8192]];
    let param =
        EncodeParameter::preset(EncodeParameter::DEFAULT_PRESET).unwrap().adjusted_for_channels(1);

    let data = round_trip(&input, 16, &param);

    // The first (and only) block is a header-only silent block: its offset field counts the
    // 5 bytes after the sync code, offset, and CRC fields.
    let block = &data[HEADER_SIZE..];
    assert_eq!(&block[..2], &[0xff, 0xff]);
    let offset = u32::from_be_bytes([block[2], block[3], block[4], block[5]]);
    assert_eq!(offset, 5);
    assert_eq!(block[10] >> 6, BlockDataType::Silent as u8);
}

#[test]
fn verify_constant_round_trip() {
    // A positive constant on both channels: under mid/side the side channel is all zero.
    let value = left_align((1 << 23) - 1, 24);
    let input = vec![vec![value; 8192]; 2];

    round_trip(&input, 24, &stereo_ms_param(WindowFunction::Sine));
}

#[test]
fn verify_sine_round_trip() {
    let num_samples = 8192;
    let input: Vec<Vec<i32>> = (0..2)
        .map(|ch| {
            (0..num_samples)
                .map(|n| {
                    let phase = 2.0 * PI * 440.0 * n as f64 / 44100.0;
                    let amplitude = if ch == 0 { 28000.0 } else { 19000.0 };
                    left_align((amplitude * phase.sin()) as i32, 16)
                })
                .collect()
        })
        .collect();

    round_trip(&input, 16, &stereo_ms_param(WindowFunction::Sine));
}

#[test]
fn verify_white_noise_round_trip() {
    // Incompressible input: the encoder is expected to fall back to raw blocks, which must
    // still round-trip exactly.
    let mut rng = SmallRng::seed_from_u64(0);

    let input: Vec<Vec<i32>> = (0..8)
        .map(|_| (0..4096).map(|_| left_align(rng.gen_range(-32768..32768), 16)).collect())
        .collect();

    let mut param = EncodeParameter::preset(EncodeParameter::DEFAULT_PRESET)
        .unwrap()
        .adjusted_for_channels(8);
    param.window_function = WindowFunction::Hann;

    round_trip(&input, 16, &param);
}

#[test]
fn verify_nyquist_alternation_round_trip() {
    let input =
        vec![(0..8192).map(|n| left_align(if n % 2 == 0 { 1 } else { -1 }, 16)).collect()];

    let mut param =
        EncodeParameter::preset(EncodeParameter::DEFAULT_PRESET).unwrap().adjusted_for_channels(1);
    param.window_function = WindowFunction::Blackman;

    round_trip(&input, 16, &param);
}

#[test]
fn verify_chirp_round_trip() {
    let num_samples = 8192usize;
    let input: Vec<Vec<i32>> = (0..2)
        .map(|ch| {
            (0..num_samples)
                .map(|n| {
                    let phase = 2.0 * PI * n as f64 / (num_samples - n) as f64;
                    let amplitude = ((1 << 22) as f64) * if ch == 0 { 1.0 } else { 0.7 };
                    left_align((amplitude * phase.sin()) as i32, 24)
                })
                .collect()
        })
        .collect();

    round_trip(&input, 24, &stereo_ms_param(WindowFunction::Vorbis));
}

#[test]
fn verify_8bit_round_trip() {
    let input: Vec<Vec<i32>> = vec![(0..8192)
        .map(|n| left_align((100.0 * (2.0 * PI * n as f64 / 64.0).sin()) as i32, 8))
        .collect()];

    let param =
        EncodeParameter::preset(EncodeParameter::DEFAULT_PRESET).unwrap().adjusted_for_channels(1);

    round_trip(&input, 8, &param);
}

#[test]
fn verify_offset_lshift_recovery() {
    // 16-bit samples that only ever use their top byte: the encoder detects the 8 dead
    // bits, strips them, and the decoder restores them.
    let input: Vec<Vec<i32>> = vec![(0..8192)
        .map(|n| left_align(((60.0 * (0.05 * n as f64).sin()) as i32) << 8, 16))
        .collect()];

    let data = round_trip(
        &input,
        16,
        &EncodeParameter::preset(EncodeParameter::DEFAULT_PRESET)
            .unwrap()
            .adjusted_for_channels(1),
    );

    let mut header = HeaderInfo::default();
    read_header(&data, &mut header).unwrap();
    assert_eq!(header.wave_format.offset_lshift, 8);
}

#[test]
fn verify_mixed_content_round_trip() {
    // Silence, a tone, and a noisy burst in one stream exercises silent, compressed, and
    // raw blocks together with the partition search.
    let mut rng = SmallRng::seed_from_u64(7);
    let mut chan = vec![0i32; 4096];
    chan.extend((0..8192).map(|n| {
        left_align((20000.0 * (2.0 * PI * 220.0 * n as f64 / 44100.0).sin()) as i32, 16)
    }));
    chan.extend((0..4096).map(|_| left_align(rng.gen_range(-32768..32768), 16)));

    let input = vec![chan];
    let param =
        EncodeParameter::preset(EncodeParameter::DEFAULT_PRESET).unwrap().adjusted_for_channels(1);

    round_trip(&input, 16, &param);
}

#[test]
fn verify_every_preset_round_trips() {
    let num_samples = 8192;
    let input: Vec<Vec<i32>> = (0..2)
        .map(|ch| {
            (0..num_samples)
                .map(|n| {
                    let x = n as f64;
                    let v = 9000.0 * (0.063 * x).sin() + 4000.0 * (0.011 * x + ch as f64).cos();
                    left_align(v as i32, 16)
                })
                .collect()
        })
        .collect();

    for no in 0..EncodeParameter::NUM_PRESETS {
        let param = EncodeParameter::preset(no).unwrap();
        round_trip(&input, 16, &param);
    }
}

#[test]
fn verify_deterministic_reencode() {
    // Re-encoding the decoded output reproduces the original stream byte for byte.
    let num_samples = 8192;
    let input: Vec<Vec<i32>> = (0..2)
        .map(|ch| {
            (0..num_samples)
                .map(|n| {
                    let phase = 2.0 * PI * 440.0 * n as f64 / 44100.0;
                    left_align(((23000.0 - 1000.0 * ch as f64) * phase.sin()) as i32, 16)
                })
                .collect()
        })
        .collect();

    let param = stereo_ms_param(WindowFunction::Sine);

    let first = round_trip(&input, 16, &param);

    let mut decoder = Decoder::new(&DecoderConfig::default()).unwrap();
    let mut decoded = vec![vec![0i32; num_samples]; 2];
    decoder.decode(&first, &mut decoded).unwrap();

    let second = round_trip(&decoded, 16, &param);

    assert_eq!(first, second);
}

#[test]
fn verify_corrupt_block_is_detected() {
    let input: Vec<Vec<i32>> = vec![(0..8192)
        .map(|n| left_align((15000.0 * (2.0 * PI * n as f64 / 100.0).sin()) as i32, 16))
        .collect()];

    let param =
        EncodeParameter::preset(EncodeParameter::DEFAULT_PRESET).unwrap().adjusted_for_channels(1);
    let mut data = round_trip(&input, 16, &param);

    // Flip a bit inside the first block's payload.
    let len = data.len();
    data[HEADER_SIZE + 20.min(len - HEADER_SIZE - 1)] ^= 0x10;

    let mut decoder = Decoder::new(&DecoderConfig::default()).unwrap();
    let mut output = vec![vec![0i32; 8192]];
    assert_eq!(decoder.decode(&data, &mut output), Err(slac::SlacError::DataCorruption));
}

#[test]
fn verify_channel_process_requires_stereo() {
    let mut encoder = Encoder::new(&EncoderConfig::default()).unwrap();
    encoder
        .set_wave_format(&WaveFormat {
            num_channels: 1,
            bit_per_sample: 16,
            sampling_rate: 44100,
            offset_lshift: 0,
        })
        .unwrap();

    // Mid/side on mono is rejected at encode time.
    let mut param = EncodeParameter::preset(EncodeParameter::DEFAULT_PRESET).unwrap();
    param.ch_process_method = ChannelProcessMethod::StereoMs;
    encoder.set_encode_parameter(&param).unwrap();

    let input = vec![vec![0i32; 4096]];
    let mut data = vec![0u8; 1 << 16];
    assert_eq!(
        encoder.encode(&input, &mut data),
        Err(slac::SlacError::InvalidChannelProcessMethod)
    );
}

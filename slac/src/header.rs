// SLAC
// Copyright (c) 2025 The Project SLAC Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use log::warn;

use slac_core::checksum::crc16_ibm;
use slac_core::errors::{header_error, Result, SlacError};
use slac_core::io::{write_be_u16_at, ByteReader, ByteWriter};

use crate::format::*;

/// Serialises `header` into the first [`HEADER_SIZE`] bytes of `buf`, including the CRC-16
/// over the format fields.
pub fn write_header(header: &HeaderInfo, buf: &mut [u8]) -> Result<()> {
    if buf.len() < HEADER_SIZE {
        return Err(SlacError::InsufficientBufferSize);
    }

    let mut writer = ByteWriter::new(buf);

    // Signature.
    writer.write_u8(STREAM_SIGNATURE[0])?;
    writer.write_u8(STREAM_SIGNATURE[1])?;
    writer.write_u8(STREAM_SIGNATURE[2])?;
    writer.write_u8(STREAM_SIGNATURE[3])?;
    // Offset from the end of this field to the first block.
    writer.write_be_u32((HEADER_SIZE - 8) as u32)?;
    // CRC-16 over the fields below; patched in after serialisation.
    writer.write_be_u16(0)?;
    writer.write_be_u32(FORMAT_VERSION)?;
    writer.write_u8(header.wave_format.num_channels as u8)?;
    writer.write_be_u32(header.num_samples)?;
    writer.write_be_u32(header.wave_format.sampling_rate)?;
    writer.write_u8(header.wave_format.bit_per_sample as u8)?;
    writer.write_u8(header.wave_format.offset_lshift as u8)?;
    writer.write_u8(header.encode_param.parcor_order as u8)?;
    writer.write_u8(header.encode_param.longterm_order as u8)?;
    writer.write_u8(header.encode_param.lms_order_per_filter as u8)?;
    writer.write_u8(header.encode_param.ch_process_method as u8)?;
    writer.write_be_u32(header.num_blocks)?;
    writer.write_be_u16(header.encode_param.max_num_block_samples as u16)?;
    writer.write_be_u32(header.max_block_size)?;
    writer.write_be_u32(header.max_bit_per_second)?;

    debug_assert_eq!(writer.pos(), HEADER_SIZE);

    let crc = crc16_ibm(&buf[HEADER_CRC16_CALC_START_OFFSET..HEADER_SIZE]);
    write_be_u16_at(buf, HEADER_CRC16_CALC_START_OFFSET - 2, crc);

    Ok(())
}

/// Parses a stream header from `data` into `header`.
///
/// A CRC mismatch returns [`SlacError::DataCorruption`] but still fills `header` with the
/// parsed fields, so a caller may choose to proceed at its own risk. A bad signature or an
/// unknown format version is unconditionally fatal.
pub fn read_header(data: &[u8], header: &mut HeaderInfo) -> Result<()> {
    if data.len() < HEADER_SIZE {
        return Err(SlacError::InsufficientDataSize);
    }

    let mut reader = ByteReader::new(data);
    let mut result = Ok(());

    let signature = [
        reader.read_u8()?,
        reader.read_u8()?,
        reader.read_u8()?,
        reader.read_u8()?,
    ];
    if signature != STREAM_SIGNATURE {
        return header_error("bad stream signature");
    }

    // Offset to the first block; implied by the fixed header size.
    let _first_block_offset = reader.read_be_u32()?;

    let stored_crc = reader.read_be_u16()?;
    let computed_crc = crc16_ibm(&data[HEADER_CRC16_CALC_START_OFFSET..HEADER_SIZE]);
    if stored_crc != computed_crc {
        // Keep parsing: the caller gets the fields and decides whether to trust them.
        warn!(
            "header crc mismatch: stored={:#06x} computed={:#06x}",
            stored_crc, computed_crc
        );
        result = Err(SlacError::DataCorruption);
    }

    let version = reader.read_be_u32()?;
    if version != FORMAT_VERSION {
        return header_error("unsupported format version");
    }

    let mut parsed = HeaderInfo::default();

    parsed.wave_format.num_channels = u32::from(reader.read_u8()?);
    parsed.num_samples = reader.read_be_u32()?;
    parsed.wave_format.sampling_rate = reader.read_be_u32()?;
    parsed.wave_format.bit_per_sample = u32::from(reader.read_u8()?);
    parsed.wave_format.offset_lshift = u32::from(reader.read_u8()?);
    parsed.encode_param.parcor_order = u32::from(reader.read_u8()?);
    parsed.encode_param.longterm_order = u32::from(reader.read_u8()?);
    parsed.encode_param.lms_order_per_filter = u32::from(reader.read_u8()?);
    parsed.encode_param.ch_process_method = ChannelProcessMethod::try_from(reader.read_u8()?)
        .map_err(|_| SlacError::InvalidHeaderFormat("unknown channel process method"))?;
    parsed.num_blocks = reader.read_be_u32()?;
    parsed.encode_param.max_num_block_samples = u32::from(reader.read_be_u16()?);
    parsed.max_block_size = reader.read_be_u32()?;
    parsed.max_bit_per_second = reader.read_be_u32()?;

    debug_assert_eq!(reader.pos(), HEADER_SIZE);

    *header = parsed;
    result
}

// SLAC
// Copyright (c) 2025 The Project SLAC Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The `util` module provides a repository of commonly used utility functions sorted into
//! distinct categories.

pub mod bits {
    //! Utilities for bit manipulation and the integer arithmetic conventions shared by the
    //! encoder and decoder.

    /// Folds a signed 32-bit integer onto the unsigned integers.
    ///
    /// Input  =>  0 -1  1 -2  2 -3  3
    /// Output =>  0  1  2  3  4  5  6
    #[inline(always)]
    pub fn signed_to_unsigned(value: i32) -> u32 {
        // (value << 1) maps value to 2*value, and (value >> 31) is 0 for non-negative values
        // and -1 (all ones) for negative values. XORing the two yields 2*value for
        // non-negative inputs and -2*value - 1 for negative inputs.
        (value.wrapping_shl(1) ^ value.wrapping_shr(31)) as u32
    }

    /// The inverse of [`signed_to_unsigned`].
    #[inline(always)]
    pub fn unsigned_to_signed(value: u32) -> i32 {
        ((value >> 1) as i32) ^ -((value & 1) as i32)
    }

    /// Computes `ceil(log2(value))`. `value` must be greater than 0.
    #[inline(always)]
    pub fn log2_ceil(value: u32) -> u32 {
        debug_assert!(value > 0);
        if value <= 1 {
            0
        }
        else {
            u32::BITS - (value - 1).leading_zeros()
        }
    }

    /// Computes `ceil(log2(value))` for 64-bit operands. `value` must be greater than 0.
    #[inline(always)]
    pub fn log2_ceil_u64(value: u64) -> u32 {
        debug_assert!(value > 0);
        if value <= 1 {
            0
        }
        else {
            u64::BITS - (value - 1).leading_zeros()
        }
    }

    /// Rounds `value` up to the next power of two. `value` must be greater than 0.
    #[inline(always)]
    pub fn round_up_pow2(value: u32) -> u32 {
        debug_assert!(value > 0);
        value.next_power_of_two()
    }

    /// Computes `sign(value) * ceil(log2(|value| + 1))`.
    #[inline(always)]
    pub fn signed_log2_ceil(value: i32) -> i32 {
        let magnitude = log2_ceil_u64(u64::from(value.unsigned_abs()) + 1) as i32;
        value.signum() * magnitude
    }

    /// Returns the number of bits required to represent every sample in `data` as a signed
    /// two's complement integer. All-zero data requires 1 bit.
    pub fn data_bit_width(data: &[i32]) -> u32 {
        let max_abs = data.iter().fold(0u32, |acc, &s| acc.max(s.unsigned_abs()));

        if max_abs == 0 {
            1
        }
        else {
            // One magnitude range plus the sign bit.
            log2_ceil_u64(u64::from(max_abs) + 1) + 1
        }
    }

    /// Computes the coefficient right-shift that keeps a `bit_width`-bit signal times a Q1.15
    /// coefficient inside 32-bit products.
    #[inline(always)]
    pub fn rshift_for_i32_product(bit_width: u32) -> u32 {
        if bit_width > 16 {
            bit_width - 16
        }
        else {
            0
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[test]
        fn verify_signed_unsigned_fold() {
            assert_eq!(signed_to_unsigned(0), 0);
            assert_eq!(signed_to_unsigned(-1), 1);
            assert_eq!(signed_to_unsigned(1), 2);
            assert_eq!(signed_to_unsigned(-2), 3);
            assert_eq!(signed_to_unsigned(2), 4);
            assert_eq!(signed_to_unsigned(i32::MAX), 0xffff_fffe);
            assert_eq!(signed_to_unsigned(i32::MIN), 0xffff_ffff);

            assert_eq!(unsigned_to_signed(0), 0);
            assert_eq!(unsigned_to_signed(1), -1);
            assert_eq!(unsigned_to_signed(2), 1);
            assert_eq!(unsigned_to_signed(u32::MAX), i32::MIN);

            // The fold is an involution over the full 16-bit range and sampled 32-bit values.
            for s in i16::MIN..=i16::MAX {
                let s = i32::from(s);
                assert_eq!(unsigned_to_signed(signed_to_unsigned(s)), s);
            }
            for u in (0..=u32::MAX).step_by(0x10001) {
                assert_eq!(signed_to_unsigned(unsigned_to_signed(u)), u);
            }
        }

        #[test]
        fn verify_log2_ceil() {
            assert_eq!(log2_ceil(1), 0);
            assert_eq!(log2_ceil(2), 1);
            assert_eq!(log2_ceil(3), 2);
            assert_eq!(log2_ceil(4), 2);
            assert_eq!(log2_ceil(5), 3);
            assert_eq!(log2_ceil(0x8000_0000), 31);
            assert_eq!(log2_ceil(u32::MAX), 32);
            assert_eq!(log2_ceil_u64(u64::from(u32::MAX) + 2), 33);
        }

        #[test]
        fn verify_signed_log2_ceil() {
            assert_eq!(signed_log2_ceil(0), 0);
            assert_eq!(signed_log2_ceil(1), 1);
            assert_eq!(signed_log2_ceil(-1), -1);
            assert_eq!(signed_log2_ceil(3), 2);
            assert_eq!(signed_log2_ceil(-4), -3);
            assert_eq!(signed_log2_ceil(i32::MAX), 31);
            assert_eq!(signed_log2_ceil(i32::MIN), -32);
        }

        #[test]
        fn verify_data_bit_width() {
            assert_eq!(data_bit_width(&[0, 0, 0]), 1);
            assert_eq!(data_bit_width(&[0, 1, 0]), 2);
            assert_eq!(data_bit_width(&[-1]), 2);
            assert_eq!(data_bit_width(&[127]), 8);
            assert_eq!(data_bit_width(&[-128]), 8);
            assert_eq!(data_bit_width(&[-129]), 9);
            assert_eq!(data_bit_width(&[32767, -32768]), 16);
        }

        #[test]
        fn verify_rshift_for_i32_product() {
            assert_eq!(rshift_for_i32_product(8), 0);
            assert_eq!(rshift_for_i32_product(16), 0);
            assert_eq!(rshift_for_i32_product(17), 1);
            assert_eq!(rshift_for_i32_product(25), 9);
        }
    }
}

// SLAC
// Copyright (c) 2025 The Project SLAC Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The `channel` module implements the lossless stereo mid/side transform.

/// Transforms left/right into mid/side in place, for the double-precision analysis path.
pub fn lr_to_ms_f64(left: &mut [f64], right: &mut [f64]) {
    for (l, r) in left.iter_mut().zip(right.iter_mut()) {
        let mid = (*l + *r) / 2.0;
        let side = *l - *r;
        *l = mid;
        *r = side;
    }
}

/// Transforms left/right into mid/side in place.
///
/// The mid channel uses an arithmetic right shift, not division: `/ 2` would round towards
/// zero and the transform would stop being invertible.
pub fn lr_to_ms_i32(left: &mut [i32], right: &mut [i32]) {
    for (l, r) in left.iter_mut().zip(right.iter_mut()) {
        let mid = l.wrapping_add(*r) >> 1;
        let side = l.wrapping_sub(*r);

        debug_assert_eq!(*l, ((mid.wrapping_shl(1) | (side & 1)).wrapping_add(side)) >> 1);
        debug_assert_eq!(*r, ((mid.wrapping_shl(1) | (side & 1)).wrapping_sub(side)) >> 1);

        *l = mid;
        *r = side;
    }
}

/// The exact inverse of [`lr_to_ms_i32`]: the dropped low bit of the sum is recovered from
/// the parity of the side channel.
pub fn ms_to_lr_i32(mid: &mut [i32], side: &mut [i32]) {
    for (m, s) in mid.iter_mut().zip(side.iter_mut()) {
        let sum = m.wrapping_shl(1) | (*s & 1);
        *m = sum.wrapping_add(*s) >> 1;
        *s = sum.wrapping_sub(*s) >> 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verify_ms_round_trip() {
        let left_ref: Vec<i32> = (-512..512).map(|i| i * 37).collect();
        let right_ref: Vec<i32> = (-512..512).map(|i| i * -13 + 5).collect();

        let mut left = left_ref.clone();
        let mut right = right_ref.clone();

        lr_to_ms_i32(&mut left, &mut right);
        ms_to_lr_i32(&mut left, &mut right);

        assert_eq!(left, left_ref);
        assert_eq!(right, right_ref);
    }

    #[test]
    fn verify_ms_odd_sums() {
        // Odd sums exercise the recovered low bit.
        let mut left = vec![1, -1, 3, i32::MIN / 2];
        let mut right = vec![0, 2, -4, i32::MAX / 2];
        let left_ref = left.clone();
        let right_ref = right.clone();

        lr_to_ms_i32(&mut left, &mut right);
        ms_to_lr_i32(&mut left, &mut right);

        assert_eq!(left, left_ref);
        assert_eq!(right, right_ref);
    }

    #[test]
    fn verify_identical_channels_have_zero_side() {
        let mut left = vec![100, -200, 300];
        let mut right = left.clone();

        lr_to_ms_i32(&mut left, &mut right);

        assert_eq!(left, [100, -200, 300]);
        assert_eq!(right, [0, 0, 0]);
    }
}

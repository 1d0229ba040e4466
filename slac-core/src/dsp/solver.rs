// SLAC
// Copyright (c) 2025 The Project SLAC Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use crate::errors::{Result, SlacError};

/// A dense linear-system solver for `A x = b` using LU decomposition (Crout's algorithm)
/// with implicitly scaled partial pivoting and optional iterative refinement.
///
/// All working storage is owned by the solver and sized at construction; solving never
/// allocates.
pub struct LinearSystemSolver {
    max_dim: usize,
    /// LU-decomposed coefficient matrix, row-major with stride equal to the solve dimension.
    lu: Vec<f64>,
    /// Per-row scale factors (reciprocal of the row's largest magnitude).
    row_scale: Vec<f64>,
    /// Row-interchange record from pivoting.
    pivot: Vec<usize>,
    x: Vec<f64>,
    err: Vec<f64>,
}

impl LinearSystemSolver {
    /// Instantiate a solver able to handle systems of up to `max_dim` unknowns.
    pub fn new(max_dim: usize) -> Self {
        LinearSystemSolver {
            max_dim,
            lu: vec![0.0; max_dim * max_dim],
            row_scale: vec![0.0; max_dim],
            pivot: vec![0; max_dim],
            x: vec![0.0; max_dim],
            err: vec![0.0; max_dim],
        }
    }

    /// Solves `A x = b` for x, overwriting `b` with the solution.
    ///
    /// `a` is the row-major `dim` by `dim` coefficient matrix. `refinements` extra passes of
    /// iterative refinement are run against the original system to sharpen the solution.
    /// Returns an error if the matrix is singular within the reach of partial pivoting.
    pub fn solve(&mut self, a: &[f64], b: &mut [f64], dim: usize, refinements: u32) -> Result<()> {
        assert!(dim <= self.max_dim);
        assert_eq!(a.len(), dim * dim);
        assert_eq!(b.len(), dim);

        // Decompose a copy so the original system stays available for refinement.
        self.lu[..dim * dim].copy_from_slice(a);
        lu_decompose(&mut self.lu[..dim * dim], dim, &mut self.pivot, &mut self.row_scale)?;

        self.x[..dim].copy_from_slice(b);
        lu_substitute(&self.lu[..dim * dim], dim, &self.pivot, &mut self.x[..dim]);

        for _ in 0..refinements {
            // Residual of the current solution, computed against the original system.
            for row in 0..dim {
                let mut error = -b[row];
                for col in 0..dim {
                    error += a[row * dim + col] * self.x[col];
                }
                self.err[row] = error;
            }

            // Solve for the correction and apply it.
            lu_substitute(&self.lu[..dim * dim], dim, &self.pivot, &mut self.err[..dim]);

            for row in 0..dim {
                self.x[row] -= self.err[row];
            }
        }

        b.copy_from_slice(&self.x[..dim]);
        Ok(())
    }
}

/// In-place Crout LU decomposition with implicitly scaled partial pivoting.
fn lu_decompose(
    a: &mut [f64],
    dim: usize,
    pivot: &mut [usize],
    row_scale: &mut [f64],
) -> Result<()> {
    // Implicit scaling: measure each row by its largest element.
    for row in 0..dim {
        let mut max = 0.0f64;
        for col in 0..dim {
            max = max.max(a[row * dim + col].abs());
        }
        if max <= f64::from(f32::EPSILON) {
            return Err(SlacError::CoefficientCalculationFailed);
        }
        row_scale[row] = 1.0 / max;
    }

    for col in 0..dim {
        // Upper-triangular elements of this column.
        for row in 0..col {
            let mut sum = a[row * dim + col];
            for k in 0..row {
                sum -= a[row * dim + k] * a[k * dim + col];
            }
            a[row * dim + col] = sum;
        }

        // Lower-triangular elements, tracking the scaled pivot candidate.
        let mut max = 0.0f64;
        let mut max_row = col;
        for row in col..dim {
            let mut sum = a[row * dim + col];
            for k in 0..col {
                sum -= a[row * dim + k] * a[k * dim + col];
            }
            a[row * dim + col] = sum;

            if row_scale[row] * sum.abs() >= max {
                max = row_scale[row] * sum.abs();
                max_row = row;
            }
        }

        // Interchange rows to put the pivot on the diagonal.
        if col != max_row {
            for k in 0..dim {
                a.swap(max_row * dim + k, col * dim + k);
            }
            row_scale[max_row] = row_scale[col];
        }
        pivot[col] = max_row;

        if a[col * dim + col].abs() <= f64::from(f32::EPSILON) {
            return Err(SlacError::CoefficientCalculationFailed);
        }

        if col != dim - 1 {
            let denom = 1.0 / a[col * dim + col];
            for row in col + 1..dim {
                a[row * dim + col] *= denom;
            }
        }
    }

    Ok(())
}

/// Forward and back substitution through an LU-decomposed matrix, solving in-place into `b`.
fn lu_substitute(a: &[f64], dim: usize, pivot: &[usize], b: &mut [f64]) {
    // Forward substitution, undoing the pivot interchanges as rows are visited. Leading zero
    // rows of b are skipped until the first non-zero element appears.
    let mut first_nonzero: Option<usize> = None;
    for row in 0..dim {
        let p = pivot[row];
        let mut sum = b[p];
        b[p] = b[row];

        if let Some(start) = first_nonzero {
            for col in start..row {
                sum -= a[row * dim + col] * b[col];
            }
        }
        else if sum != 0.0 {
            first_nonzero = Some(row);
        }

        b[row] = sum;
    }

    // Back substitution.
    for row in (0..dim).rev() {
        let mut sum = b[row];
        for col in row + 1..dim {
            sum -= a[row * dim + col] * b[col];
        }
        b[row] = sum / a[row * dim + row];
    }
}

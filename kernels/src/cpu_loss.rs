//! Elementwise loss reductions and gradients over local blocks.
//!
//! Reductions accumulate in `f64` regardless of `T` and return the raw local sum; callers
//! normalize by the global element count and combine partitions with an all-reduce.

use crate::{check_len, KernelElem, Result};
use rayon::prelude::*;

#[inline]
fn to_f64<T: KernelElem>(x: T) -> f64 {
    x.to_f64().unwrap_or(f64::NAN)
}

/// Sum of `|truth - prediction|` over the block.
pub fn cpu_abs_error_sum<T: KernelElem>(predictions: &[T], ground_truth: &[T]) -> Result<f64> {
    check_len(predictions.len(), &[ground_truth.len()])?;
    Ok(predictions
        .par_iter()
        .zip(ground_truth.par_iter())
        .map(|(&pred, &truth)| (to_f64(truth) - to_f64(pred)).abs())
        .sum())
}

/// Sum of `(truth - prediction)^2` over the block.
pub fn cpu_squared_error_sum<T: KernelElem>(
    predictions: &[T],
    ground_truth: &[T],
) -> Result<f64> {
    check_len(predictions.len(), &[ground_truth.len()])?;
    Ok(predictions
        .par_iter()
        .zip(ground_truth.par_iter())
        .map(|(&pred, &truth)| {
            let error = to_f64(truth) - to_f64(pred);
            error * error
        })
        .sum())
}

/// Sum of `-truth * ln(prediction)` over the block.
///
/// Entries with zero truth contribute nothing, so a zero prediction there does not yield NaN.
pub fn cpu_cross_entropy_sum<T: KernelElem>(
    predictions: &[T],
    ground_truth: &[T],
) -> Result<f64> {
    check_len(predictions.len(), &[ground_truth.len()])?;
    Ok(predictions
        .par_iter()
        .zip(ground_truth.par_iter())
        .filter(|(_, truth)| !truth.is_zero())
        .map(|(&pred, &truth)| -to_f64(truth) * to_f64(pred).ln())
        .sum())
}

/// Writes `scale * sign(prediction - truth)` into `gradient`. Ties produce exactly zero.
pub fn cpu_sign_gradient<T: KernelElem>(
    predictions: &[T],
    ground_truth: &[T],
    scale: T,
    gradient: &mut [T],
) -> Result<()> {
    check_len(predictions.len(), &[ground_truth.len(), gradient.len()])?;
    gradient
        .par_iter_mut()
        .zip(predictions.par_iter().zip(ground_truth.par_iter()))
        .for_each(|(g, (&pred, &truth))| {
            *g = if pred > truth {
                scale
            } else if pred < truth {
                -scale
            } else {
                T::zero()
            };
        });
    Ok(())
}

/// Writes `scale * (prediction - truth)` into `gradient`.
pub fn cpu_squared_error_gradient<T: KernelElem>(
    predictions: &[T],
    ground_truth: &[T],
    scale: T,
    gradient: &mut [T],
) -> Result<()> {
    check_len(predictions.len(), &[ground_truth.len(), gradient.len()])?;
    gradient
        .par_iter_mut()
        .zip(predictions.par_iter().zip(ground_truth.par_iter()))
        .for_each(|(g, (&pred, &truth))| *g = scale * (pred - truth));
    Ok(())
}

/// Writes `-truth / prediction` into `gradient`, zero where truth is zero.
pub fn cpu_cross_entropy_gradient<T: KernelElem>(
    predictions: &[T],
    ground_truth: &[T],
    gradient: &mut [T],
) -> Result<()> {
    check_len(predictions.len(), &[ground_truth.len(), gradient.len()])?;
    gradient
        .par_iter_mut()
        .zip(predictions.par_iter().zip(ground_truth.par_iter()))
        .for_each(|(g, (&pred, &truth))| {
            *g = if truth.is_zero() {
                T::zero()
            } else {
                -truth / pred
            };
        });
    Ok(())
}

/// Writes `prediction - truth` into `gradient`.
///
/// This is the cross entropy gradient with respect to the input of a preceding softmax, and is
/// only meaningful when truth is categorical. Neither condition is checked here.
pub fn cpu_softmax_shortcut_gradient<T: KernelElem>(
    predictions: &[T],
    ground_truth: &[T],
    gradient: &mut [T],
) -> Result<()> {
    check_len(predictions.len(), &[ground_truth.len(), gradient.len()])?;
    gradient
        .par_iter_mut()
        .zip(predictions.par_iter().zip(ground_truth.par_iter()))
        .for_each(|(g, (&pred, &truth))| *g = pred - truth);
    Ok(())
}

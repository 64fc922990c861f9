use crate::{check_len, KernelElem, KernelError, Result};
use rayon::prelude::*;

/// Parameters of a cross-channel local response normalization.
///
/// `scale_factor(i) = k + alpha / window_width * sum(x_j ^ 2)` over the channels `j` in the
/// window centered at `i`, and `y(i) = x(i) * scale_factor(i) ^ -beta`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LrnParams<T> {
    pub window_width: usize,
    pub alpha: T,
    pub beta: T,
    pub k: T,
}

/// Constants derived once per kernel call.
#[derive(Debug, Clone, Copy)]
struct Coefficients<T> {
    alpha_over_width: T,
    /// `-2 * alpha * beta / window_width`
    coupling: T,
}

impl<T: KernelElem> LrnParams<T> {
    fn coefficients(&self) -> Result<Coefficients<T>> {
        if self.window_width == 0 {
            return Err(KernelError::InvalidParameter(
                "window width must be positive".into(),
            ));
        }
        let width = T::from_usize(self.window_width).ok_or_else(|| {
            KernelError::InvalidParameter(format!(
                "window width {} is not representable",
                self.window_width
            ))
        })?;
        let two = T::one() + T::one();
        Ok(Coefficients {
            alpha_over_width: self.alpha / width,
            coupling: -two * self.alpha * self.beta / width,
        })
    }
}

/// Column-major block split into channel groups of `num_per_channel` rows each.
#[derive(Debug, Clone, Copy)]
struct ChannelLayout {
    height: usize,
    num_channels: usize,
    num_per_channel: usize,
}

impl ChannelLayout {
    fn new(len: usize, height: usize, num_channels: usize) -> Result<Self> {
        if height == 0 || num_channels == 0 || height % num_channels != 0 {
            return Err(KernelError::InvalidPartition {
                rows: height,
                channels: num_channels,
            });
        }
        if len % height != 0 {
            return Err(KernelError::ShapeMismatch {
                expected: vec![height],
                got: vec![len],
            });
        }
        Ok(Self {
            height,
            num_channels,
            num_per_channel: height / num_channels,
        })
    }

    #[inline]
    fn index(&self, pos: usize, channel: usize) -> usize {
        pos + self.num_per_channel * channel
    }
}

/// Normalization window `[start, end]` around the current channel.
///
/// Bounds may fall outside `0..num_channels`; only the clamped range is ever read.
#[derive(Debug, Clone, Copy)]
struct Window {
    start: isize,
    end: isize,
    num_channels: isize,
}

impl Window {
    fn new(window_width: usize, num_channels: usize) -> Self {
        // A half width of `num_channels` already covers every channel from every position.
        let half = (window_width / 2).min(num_channels) as isize;
        Self {
            start: -half,
            end: half,
            num_channels: num_channels as isize,
        }
    }

    fn channels(&self) -> std::ops::RangeInclusive<usize> {
        let lo = self.start.max(0) as usize;
        let hi = self.end.min(self.num_channels - 1).max(0) as usize;
        lo..=hi
    }

    /// Sum of `entry(c)^2` over the clamped window.
    fn sum_of_squares<T: KernelElem>(&self, entry: impl Fn(usize) -> T) -> T {
        self.channels().fold(T::zero(), |acc, c| {
            let x = entry(c);
            acc + x * x
        })
    }

    /// Moves the window one channel forward, keeping `sum` equal to the windowed sum of squares.
    fn slide<T: KernelElem>(&mut self, sum: &mut T, entry: impl Fn(usize) -> T) {
        if self.start >= 0 {
            let x = entry(self.start as usize);
            *sum -= x * x;
        }
        self.start += 1;
        self.end += 1;
        if self.end < self.num_channels {
            let x = entry(self.end as usize);
            *sum += x * x;
        }
    }
}

/// Local response normalization forward pass on CPU.
///
/// # Arguments
///
/// * `input` - Column-major block, `height` rows per sample column.
/// * `output` - Same shape as `input`; fully overwritten.
/// * `height` - Rows per column (`num_channels * num_per_channel`).
/// * `num_channels` - Number of channel groups; must divide `height`.
///
/// Sample columns run in parallel. Within a (position, sample) pair the window sum is
/// maintained incrementally across channels.
pub fn cpu_lrn_forward<T: KernelElem>(
    input: &[T],
    output: &mut [T],
    height: usize,
    num_channels: usize,
    params: &LrnParams<T>,
) -> Result<()> {
    let layout = ChannelLayout::new(input.len(), height, num_channels)?;
    check_len(input.len(), &[output.len()])?;
    let coeffs = params.coefficients()?;

    output
        .par_chunks_mut(layout.height)
        .zip(input.par_chunks(layout.height))
        .for_each(|(out_col, in_col)| {
            for pos in 0..layout.num_per_channel {
                let entry = |c: usize| in_col[layout.index(pos, c)];
                let mut window = Window::new(params.window_width, layout.num_channels);
                let mut window_sum = window.sum_of_squares(entry);

                for channel in 0..layout.num_channels {
                    let index = layout.index(pos, channel);
                    let scale_factor = params.k + coeffs.alpha_over_width * window_sum;
                    out_col[index] = in_col[index] * scale_factor.powf(-params.beta);
                    window.slide(&mut window_sum, entry);
                }
            }
        });

    Ok(())
}

/// Local response normalization backward pass on CPU.
///
/// ```text
/// error_signal(i) = prev_error_signal(i) / scale_factor(i) ^ beta
///     - 2 * alpha * beta / window_width * prev_activations(i)
///       * sum( prev_error_signal(j) * activations(j) / scale_factor(j) )
/// ```
///
/// The sum runs over every channel `j` whose window contains `i`. Each channel scatters its
/// contribution into all channels of its window, so `error_signal` is zeroed first and then
/// accumulated. One thread owns a whole sample column, which keeps the accumulation race free.
pub fn cpu_lrn_backward<T: KernelElem>(
    prev_activations: &[T],
    activations: &[T],
    prev_error_signal: &[T],
    error_signal: &mut [T],
    height: usize,
    num_channels: usize,
    params: &LrnParams<T>,
) -> Result<()> {
    let layout = ChannelLayout::new(prev_activations.len(), height, num_channels)?;
    check_len(
        prev_activations.len(),
        &[
            activations.len(),
            prev_error_signal.len(),
            error_signal.len(),
        ],
    )?;
    let coeffs = params.coefficients()?;

    error_signal
        .par_chunks_mut(layout.height)
        .zip(prev_activations.par_chunks(layout.height))
        .zip(activations.par_chunks(layout.height))
        .zip(prev_error_signal.par_chunks(layout.height))
        .for_each(|(((err_col, x_col), y_col), dy_col)| {
            err_col.fill(T::zero());

            for pos in 0..layout.num_per_channel {
                let entry = |c: usize| x_col[layout.index(pos, c)];
                let mut window = Window::new(params.window_width, layout.num_channels);
                let mut window_sum = window.sum_of_squares(entry);

                for channel in 0..layout.num_channels {
                    let index = layout.index(pos, channel);
                    let activation = y_col[index];
                    let prev_error = dy_col[index];
                    let scale_factor = params.k + coeffs.alpha_over_width * window_sum;

                    err_col[index] += prev_error * scale_factor.powf(-params.beta);

                    let coupling = coeffs.coupling * prev_error * activation / scale_factor;
                    for c in window.channels() {
                        let i = layout.index(pos, c);
                        err_col[i] += coupling * x_col[i];
                    }

                    window.slide(&mut window_sum, entry);
                }
            }
        });

    Ok(())
}

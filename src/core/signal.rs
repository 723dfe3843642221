//! 1-D signal and statistics helpers used by the photon classifiers
//!
//! Histogramming, Gaussian smoothing (reflect boundary, kernel truncated at
//! 4 sigma), peak detection with prominence and width measurements, linear
//! interpolation and small-sample statistics.

use ndarray::Array1;
use num_traits::Float;

/// Smallest positive value used in place of zero for model parameters
pub const EPSILON: f64 = 1e-31;

const SQRT_2PI: f64 = 2.506_628_274_631_000_7;

/// Normal probability density
#[inline]
pub fn gaussian_pdf(x: f64, mu: f64, sigma: f64) -> f64 {
    let z = (x - mu) / sigma;
    (-0.5 * z * z).exp() / (sigma * SQRT_2PI)
}

/// Scaled normal density `mag * N(x; mu, sigma)`
#[inline]
pub fn gauss(x: f64, mag: f64, mu: f64, sigma: f64) -> f64 {
    mag * gaussian_pdf(x, mu, sigma)
}

/// Count values into `bins` equal bins over `[min, max)`
pub fn histogram1d<I>(values: I, min: f64, max: f64, bins: usize) -> Array1<f64>
where
    I: IntoIterator<Item = f64>,
{
    let mut hist = Array1::<f64>::zeros(bins);
    if bins == 0 || max <= min {
        return hist;
    }
    let scale = bins as f64 / (max - min);
    for v in values {
        if v >= min && v < max {
            let bin = (((v - min) * scale) as usize).min(bins - 1);
            hist[bin] += 1.0;
        }
    }
    hist
}

/// Index into a half-sample symmetric extension (`d c b a | a b c d | d c b a`)
fn reflect_index(i: isize, n: usize) -> usize {
    let period = 2 * n as isize;
    let m = i.rem_euclid(period);
    if m < n as isize {
        m as usize
    } else {
        (period - 1 - m) as usize
    }
}

/// Gaussian smoothing with reflected boundaries
pub fn gaussian_filter1d(input: &[f64], sigma: f64) -> Vec<f64> {
    let n = input.len();
    if n == 0 || sigma <= 0.0 || !sigma.is_finite() {
        return input.to_vec();
    }

    let radius = (4.0 * sigma + 0.5) as isize;
    let kernel: Vec<f64> = (-radius..=radius)
        .map(|k| (-0.5 * (k as f64 / sigma).powi(2)).exp())
        .collect();
    let norm: f64 = kernel.iter().sum();

    (0..n as isize)
        .map(|i| {
            kernel
                .iter()
                .enumerate()
                .map(|(j, w)| w * input[reflect_index(i + j as isize - radius, n)])
                .sum::<f64>()
                / norm
        })
        .collect()
}

/// Linear interpolation on ascending `xp`, clamped to the end values
pub fn interp(x: f64, xp: &[f64], fp: &[f64]) -> f64 {
    let n = xp.len().min(fp.len());
    if n == 0 {
        return f64::NAN;
    }
    if x <= xp[0] {
        return fp[0];
    }
    if x >= xp[n - 1] {
        return fp[n - 1];
    }
    let hi = xp[..n].partition_point(|v| *v <= x).min(n - 1);
    let lo = hi - 1;
    let span = xp[hi] - xp[lo];
    if span <= 0.0 {
        return fp[lo];
    }
    fp[lo] + (fp[hi] - fp[lo]) * (x - xp[lo]) / span
}

/// A detected local maximum and its prominence walk
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Peak {
    pub index: usize,
    pub prominence: f64,
    pub left_base: usize,
    pub right_base: usize,
}

/// Width of a peak measured at a fraction of its prominence
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PeakWidth {
    pub width: f64,
    pub width_height: f64,
    pub left_ips: f64,
    pub right_ips: f64,
}

/// Local maxima, plateaus reduced to their midpoint
fn local_maxima(x: &[f64]) -> Vec<usize> {
    let mut peaks = Vec::new();
    if x.len() < 3 {
        return peaks;
    }
    let i_max = x.len() - 1;
    let mut i = 1;
    while i < i_max {
        if x[i - 1] < x[i] {
            let mut ahead = i + 1;
            while ahead < i_max && x[ahead] == x[i] {
                ahead += 1;
            }
            if x[ahead] < x[i] {
                peaks.push((i + ahead - 1) / 2);
                i = ahead;
            }
        }
        i += 1;
    }
    peaks
}

/// Drop lower peaks closer than `distance` samples to a higher one
fn select_by_distance(x: &[f64], peaks: &[usize], distance: f64) -> Vec<usize> {
    let distance = distance.ceil().max(1.0) as usize;
    let mut keep = vec![true; peaks.len()];
    let mut priority: Vec<usize> = (0..peaks.len()).collect();
    priority.sort_by(|a, b| x[peaks[*a]].total_cmp(&x[peaks[*b]]));

    for &j in priority.iter().rev() {
        if !keep[j] {
            continue;
        }
        let mut k = j;
        while k > 0 && peaks[j] - peaks[k - 1] < distance {
            keep[k - 1] = false;
            k -= 1;
        }
        let mut k = j + 1;
        while k < peaks.len() && peaks[k] - peaks[j] < distance {
            keep[k] = false;
            k += 1;
        }
    }
    peaks
        .iter()
        .zip(keep)
        .filter_map(|(p, k)| k.then_some(*p))
        .collect()
}

/// Prominence of the peak at `peak` and the bases found by walking outward
pub fn peak_prominence(x: &[f64], peak: usize) -> Peak {
    let height = x[peak];

    let mut left_min = height;
    let mut left_base = peak;
    let mut i = peak as isize;
    while i >= 0 && x[i as usize] <= height {
        if x[i as usize] < left_min {
            left_min = x[i as usize];
            left_base = i as usize;
        }
        i -= 1;
    }

    let mut right_min = height;
    let mut right_base = peak;
    let mut i = peak;
    while i < x.len() && x[i] <= height {
        if x[i] < right_min {
            right_min = x[i];
            right_base = i;
        }
        i += 1;
    }

    Peak {
        index: peak,
        prominence: height - left_min.max(right_min),
        left_base,
        right_base,
    }
}

/// Peaks with a minimum separation and minimum prominence
pub fn find_peaks(x: &[f64], distance: f64, min_prominence: f64) -> Vec<Peak> {
    let maxima = local_maxima(x);
    let spaced = select_by_distance(x, &maxima, distance);
    spaced
        .into_iter()
        .map(|p| peak_prominence(x, p))
        .filter(|p| p.prominence >= min_prominence)
        .collect()
}

/// Peak width at `rel_height` of the prominence, with interpolated crossings
pub fn peak_width(x: &[f64], peak: &Peak, rel_height: f64) -> PeakWidth {
    let height = x[peak.index] - peak.prominence * rel_height;

    let mut i = peak.index;
    while peak.left_base < i && height < x[i] {
        i -= 1;
    }
    let mut left_ips = i as f64;
    if x[i] < height && i + 1 < x.len() {
        left_ips += (height - x[i]) / (x[i + 1] - x[i]);
    }

    let mut i = peak.index;
    while i < peak.right_base && height < x[i] {
        i += 1;
    }
    let mut right_ips = i as f64;
    if x[i] < height && i > 0 {
        right_ips -= (height - x[i]) / (x[i - 1] - x[i]);
    }

    PeakWidth {
        width: right_ips - left_ips,
        width_height: height,
        left_ips,
        right_ips,
    }
}

/// Straight-line least squares with per-residual weights; returns (slope, intercept)
pub fn weighted_linear_fit(x: &[f64], y: &[f64], w: &[f64]) -> Option<(f64, f64)> {
    let (mut sw, mut sx, mut sy, mut sxx, mut sxy) = (0.0, 0.0, 0.0, 0.0, 0.0);
    for ((xi, yi), wi) in x.iter().zip(y).zip(w) {
        let ww = wi * wi;
        sw += ww;
        sx += ww * xi;
        sy += ww * yi;
        sxx += ww * xi * xi;
        sxy += ww * xi * yi;
    }
    let det = sw * sxx - sx * sx;
    if sw <= 0.0 || det.abs() < 1e-12 * sw * sw.max(1.0) {
        return None;
    }
    let slope = (sw * sxy - sx * sy) / det;
    let intercept = (sy - slope * sx) / sw;
    (slope.is_finite() && intercept.is_finite()).then_some((slope, intercept))
}

/// Trapezoid integral over unit spacing
pub fn trapz(y: &[f64]) -> f64 {
    y.windows(2).map(|w| 0.5 * (w[0] + w[1])).sum()
}

pub fn mean<T: Float>(values: &[T]) -> Option<T> {
    if values.is_empty() {
        return None;
    }
    let sum = values.iter().fold(T::zero(), |acc, v| acc + *v);
    T::from(values.len()).map(|n| sum / n)
}

/// Sample standard deviation (n - 1 denominator)
pub fn sample_std<T: Float>(values: &[T]) -> Option<T> {
    if values.len() < 2 {
        return None;
    }
    let m = mean(values)?;
    let ss = values.iter().fold(T::zero(), |acc, v| acc + (*v - m) * (*v - m));
    T::from(values.len() - 1).map(|d| (ss / d).sqrt())
}

/// Median ignoring NaN values
pub fn median<T: Float>(values: &[T]) -> Option<T> {
    let mut sorted: Vec<T> = values.iter().copied().filter(|v| !v.is_nan()).collect();
    if sorted.is_empty() {
        return None;
    }
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 1 {
        Some(sorted[mid])
    } else {
        let two = T::one() + T::one();
        Some((sorted[mid - 1] + sorted[mid]) / two)
    }
}

/// Percentile with linear interpolation between closest ranks
pub fn percentile(values: &[f64], q: f64) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    let pos = (q / 100.0).clamp(0.0, 1.0) * (sorted.len() - 1) as f64;
    let lo = pos.floor() as usize;
    let hi = pos.ceil() as usize;
    Some(sorted[lo] + (sorted[hi] - sorted[lo]) * (pos - lo as f64))
}

/// `mean + 3 * std` of a sample, with an undefined spread treated as zero
pub fn mean_plus_three_sigma(values: &[f64]) -> f64 {
    let m = mean(values).unwrap_or(0.0);
    let s = sample_std(values).filter(|s| s.is_finite()).unwrap_or(0.0);
    m + 3.0 * s
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_gaussian_filter_preserves_mass() {
        let mut x = vec![0.0; 41];
        x[20] = 10.0;
        let y = gaussian_filter1d(&x, 2.0);
        assert_relative_eq!(y.iter().sum::<f64>(), 10.0, epsilon = 1e-9);
        assert!(y[20] > y[19] && y[19] > y[18]);
        assert_relative_eq!(y[18], y[22], epsilon = 1e-12);
    }

    #[test]
    fn test_gaussian_filter_reflects_edges() {
        let x = vec![3.0; 5];
        let y = gaussian_filter1d(&x, 1.5);
        for v in y {
            assert_relative_eq!(v, 3.0, epsilon = 1e-12);
        }
    }

    #[test]
    fn test_histogram_excludes_upper_edge() {
        let h = histogram1d(vec![0.0, 0.5, 0.99, 1.0, -0.1], 0.0, 1.0, 2);
        assert_eq!(h.to_vec(), vec![1.0, 2.0]);
    }

    #[test]
    fn test_find_peaks_and_prominence() {
        let x = [0.0, 1.0, 0.0, 3.0, 1.0, 2.0, 0.0];
        let peaks = find_peaks(&x, 1.0, 0.01);
        let idx: Vec<usize> = peaks.iter().map(|p| p.index).collect();
        assert_eq!(idx, vec![1, 3, 5]);
        assert_relative_eq!(peaks[1].prominence, 3.0);
        assert_relative_eq!(peaks[2].prominence, 1.0);
        assert_eq!(peaks[2].left_base, 4);
    }

    #[test]
    fn test_find_peaks_plateau_and_distance() {
        let x = [0.0, 2.0, 2.0, 2.0, 0.0, 1.0, 0.0];
        let peaks = find_peaks(&x, 1.0, 0.01);
        assert_eq!(peaks[0].index, 2);
        let spaced = find_peaks(&x, 4.0, 0.01);
        assert_eq!(spaced.len(), 1);
    }

    #[test]
    fn test_peak_width_half_max() {
        let x = [0.0, 0.0, 2.0, 4.0, 2.0, 0.0, 0.0];
        let peak = peak_prominence(&x, 3);
        let w = peak_width(&x, &peak, 0.5);
        assert_relative_eq!(w.left_ips, 2.0);
        assert_relative_eq!(w.right_ips, 4.0);
        assert_relative_eq!(w.width, 2.0);
        let full = peak_width(&x, &peak, 1.0);
        assert_relative_eq!(full.width, 4.0);
    }

    #[test]
    fn test_interp_clamps() {
        let xp = [0.0, 1.0, 2.0];
        let fp = [0.0, 10.0, 20.0];
        assert_relative_eq!(interp(0.5, &xp, &fp), 5.0);
        assert_relative_eq!(interp(-3.0, &xp, &fp), 0.0);
        assert_relative_eq!(interp(7.0, &xp, &fp), 20.0);
    }

    #[test]
    fn test_weighted_linear_fit_exact_line() {
        let x = [0.0, 1.0, 2.0, 3.0];
        let y: Vec<f64> = x.iter().map(|v| 2.0 - 0.5 * v).collect();
        let (m, b) = weighted_linear_fit(&x, &y, &[1.0, 2.0, 0.5, 1.0]).unwrap();
        assert_relative_eq!(m, -0.5, epsilon = 1e-10);
        assert_relative_eq!(b, 2.0, epsilon = 1e-10);
        assert!(weighted_linear_fit(&[1.0, 1.0], &[0.0, 1.0], &[1.0, 1.0]).is_none());
    }

    #[test]
    fn test_statistics() {
        let v = [1.0, 2.0, 3.0, 4.0];
        assert_relative_eq!(mean(&v).unwrap(), 2.5);
        assert_relative_eq!(median(&v).unwrap(), 2.5);
        assert_relative_eq!(sample_std(&v).unwrap(), 1.290_994_448_735_805_6, epsilon = 1e-12);
        assert_relative_eq!(percentile(&v, 50.0).unwrap(), 2.5);
        assert_relative_eq!(percentile(&v, 85.0).unwrap(), 3.55, epsilon = 1e-12);
        assert!(sample_std(&[1.0]).is_none());
        assert_relative_eq!(mean_plus_three_sigma(&[5.0]), 5.0);
        assert_relative_eq!(mean_plus_three_sigma(&[]), 0.0);
    }
}

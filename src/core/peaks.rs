//! Peak characterization of a pseudowaveform histogram

use super::signal::{find_peaks, peak_width, Peak};

/// Minimum prominence for a histogram peak to be considered
pub const MIN_PEAK_PROMINENCE: f64 = 0.01;

/// Minimum peak separation in metres
pub const MIN_PEAK_SEPARATION_M: f64 = 0.249;

/// FWHM to standard deviation
const FWHM_PER_SIGMA: f64 = 2.35;

/// Peak value of the unit normal density
const NORMAL_PEAK: f64 = 0.3989;

/// Measurements of one histogram peak
#[derive(Debug, Clone, PartialEq)]
pub struct PeakInfo {
    pub i: usize,
    pub z_inv: f64,
    pub height: f64,
    pub prominence: f64,
    pub left_base: usize,
    pub right_base: usize,
    pub fwhm: f64,                // bins
    pub left_ips_hm: f64,
    pub right_ips_hm: f64,
    pub width_full: f64,          // bins, at full prominence
    pub sigma_est_i: f64,         // bins
    pub sigma_est_left_i: f64,
    pub sigma_est_right_i: f64,
    pub sigma_est: f64,           // metres
    pub sigma_est_left: f64,
    pub sigma_est_right: f64,
    pub mag_scaling: f64,
    pub area: f64,
    pub n_photons: usize,
}

impl PeakInfo {
    /// Symmetry check used for bathymetry candidates
    pub fn is_symmetric(&self) -> bool {
        self.sigma_est_left_i < 3.0 * self.sigma_est_right_i
    }
}

/// Detect and measure peaks of `hist` over bin centres `z_inv`.
///
/// The histogram is zero-padded by one bin on each side so that peaks at the
/// array edges are still local maxima. Photon counts use the raw inverted
/// elevations in `photons_z_inv`.
pub fn get_peak_info(hist: &[f64], z_inv: &[f64], photons_z_inv: &[f64]) -> Vec<PeakInfo> {
    let n = hist.len();
    if n < 2 || z_inv.len() != n {
        return Vec::new();
    }
    let bin = z_inv[1] - z_inv[0];

    let mut padded = Vec::with_capacity(n + 2);
    padded.push(0.0);
    padded.extend_from_slice(hist);
    padded.push(0.0);

    let distance = (MIN_PEAK_SEPARATION_M / bin).max(1.0);
    let peaks: Vec<Peak> = find_peaks(&padded, distance, MIN_PEAK_PROMINENCE);

    peaks
        .iter()
        .filter(|p| p.index >= 1 && p.index <= n)
        .map(|p| {
            let half = peak_width(&padded, p, 0.5);
            let full = peak_width(&padded, p, 1.0);

            let i = p.index - 1;
            let height = hist[i];
            let sigma_est_i = half.width / FWHM_PER_SIGMA;
            // one-sided estimates from the half-maximum crossings
            let sigma_est_left_i = 2.0 * (p.index as f64 - half.left_ips) / FWHM_PER_SIGMA;
            let sigma_est_right_i = 2.0 * (half.right_ips - p.index as f64) / FWHM_PER_SIGMA;

            let sigma_est = sigma_est_i * bin;
            let sigma_est_left = sigma_est_left_i * bin;
            let sigma_est_right = sigma_est_right_i * bin;
            let loc = z_inv[i];

            let n_photons = photons_z_inv
                .iter()
                .filter(|z| **z > loc - sigma_est_left && **z < loc + sigma_est_right)
                .count();

            PeakInfo {
                i,
                z_inv: loc,
                height,
                prominence: p.prominence,
                left_base: p.left_base.saturating_sub(1).min(n - 1),
                right_base: p.right_base.saturating_sub(1).min(n - 1),
                fwhm: half.width,
                left_ips_hm: half.left_ips - 1.0,
                right_ips_hm: half.right_ips - 1.0,
                width_full: full.width,
                sigma_est_i,
                sigma_est_left_i,
                sigma_est_right_i,
                sigma_est,
                sigma_est_left,
                sigma_est_right,
                mag_scaling: height * (2.0 * std::f64::consts::PI).sqrt() * sigma_est,
                area: p.prominence * sigma_est / NORMAL_PEAK,
                n_photons,
            }
        })
        .collect()
}

/// Sort by prominence, highest first
pub fn sort_by_prominence(peaks: &mut [PeakInfo]) {
    peaks.sort_by(|a, b| b.prominence.total_cmp(&a.prominence));
}

/// Sort by area then by depth, largest and deepest first
pub fn sort_by_area(peaks: &mut [PeakInfo]) {
    peaks.sort_by(|a, b| b.area.total_cmp(&a.area).then(b.z_inv.total_cmp(&a.z_inv)));
}

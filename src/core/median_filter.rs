//! Rolling-median bathymetry classifier
//!
//! Works on `(lat_ph, ortho_h, class_ph)` only. Photons well below the sea
//! surface are screened by a rolling median buffer, then by a combined
//! rolling median / standard deviation test, grouped into latitude segments
//! and finally thinned by a rolling smoothing window.

use super::classifier::{ClassifierOutput, PhotonClassifier};
use super::signal::{median, sample_std};
use crate::types::{
    BathyError, BathyResult, BeamInfo, ClassifierKind, PhotonFrame, BATHYMETRY, SEA_SURFACE,
    UNCLASSIFIED,
};
use serde::{Deserialize, Serialize};

/// Version recorded in the output metadata
pub const MEDIANFILTER_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Photons closer than this below the median surface are never bathymetry
const SURFACE_EXCLUSION_M: f64 = 1.5;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MedianFilterParams {
    /// Buffer, median/std and smoothing window sizes
    pub window_sizes: [usize; 3],
    pub kdiff: f64,
    pub kstd: f64,
    pub high_low_buffer: f64,
    pub min_photons: usize,
    /// Latitude segment length in degrees
    pub segment_length: f64,
    /// Height multiplier, unset means 1.0
    pub compress_heights: Option<f64>,
    /// Latitude multiplier, unset means 1.0
    pub compress_lats: Option<f64>,
}

impl Default for MedianFilterParams {
    fn default() -> Self {
        Self {
            window_sizes: [51, 30, 7],
            kdiff: 0.6,
            kstd: 1.2,
            high_low_buffer: 4.0,    // metres
            min_photons: 14,
            segment_length: 0.001,   // ~100 m at the equator
            compress_heights: None,
            compress_lats: None,
        }
    }
}

impl MedianFilterParams {
    pub fn validate(&self) -> BathyResult<()> {
        if self.window_sizes.iter().any(|w| *w == 0) {
            return Err(BathyError::InvalidParameter(format!(
                "medianfilter window sizes must be positive, got {:?}",
                self.window_sizes
            )));
        }
        if self.window_sizes[2] % 2 == 0 {
            return Err(BathyError::InvalidParameter(format!(
                "medianfilter smoothing window must be odd, got {}",
                self.window_sizes[2]
            )));
        }
        if !(self.segment_length > 0.0) {
            return Err(BathyError::InvalidParameter(format!(
                "medianfilter segment_length must be positive, got {}",
                self.segment_length
            )));
        }
        Ok(())
    }
}

/// Rolling-median classifier
pub struct MedianFilter {
    params: MedianFilterParams,
}

impl MedianFilter {
    pub fn new() -> Self {
        Self {
            params: MedianFilterParams::default(),
        }
    }

    pub fn with_params(params: MedianFilterParams) -> Self {
        Self { params }
    }

    /// Label photons 41 (input sea surface), 40 (bathymetry) or 0
    pub fn classify_photons(&self, lat_ph: &[f64], ortho_h: &[f64], class_ph: &[i8]) -> Vec<i8> {
        let n = ortho_h.len();
        let mut labels: Vec<i8> = class_ph
            .iter()
            .map(|c| if *c == SEA_SURFACE { SEA_SURFACE } else { UNCLASSIFIED })
            .collect();

        let surface: Vec<f64> = (0..n)
            .filter(|i| class_ph[*i] == SEA_SURFACE)
            .map(|i| ortho_h[i])
            .collect();
        let ceiling = median(&surface).map(|m| m - SURFACE_EXCLUSION_M);

        let candidates: Vec<usize> = (0..n)
            .filter(|i| class_ph[*i] != SEA_SURFACE && ortho_h[*i].is_finite() && lat_ph[*i].is_finite())
            .filter(|i| ceiling.map_or(true, |c| ortho_h[*i] <= c))
            .collect();

        let h_scale = self.params.compress_heights.unwrap_or(1.0);
        let lat_scale = self.params.compress_lats.unwrap_or(1.0);
        let [buffer_window, std_window, smooth_window] = self.params.window_sizes;

        let heights: Vec<f64> = candidates.iter().map(|i| ortho_h[*i] * h_scale).collect();
        let keep = rolling_median_buffer(&heights, buffer_window, self.params.high_low_buffer);
        let survivors: Vec<usize> = (0..candidates.len()).filter(|k| keep[*k]).collect();

        let heights: Vec<f64> = survivors.iter().map(|k| heights[*k]).collect();
        let keep = rolling_median_std(&heights, std_window, self.params.kdiff, self.params.kstd);
        let filtered: Vec<usize> = survivors
            .iter()
            .zip(keep)
            .filter(|(_, k)| *k)
            .map(|(s, _)| candidates[*s])
            .collect();
        log::debug!(
            "medianfilter: {} candidates, {} after buffer, {} after median/std",
            candidates.len(),
            survivors.len(),
            filtered.len()
        );

        let runs = segment_runs(
            &filtered,
            |i| lat_ph[i] * lat_scale,
            self.params.segment_length,
            self.params.min_photons,
        );
        let half = smooth_window / 2;
        let mut n_bathy = 0;
        for run in runs.iter().filter(|r| r.len() >= smooth_window) {
            for &i in &run[half..run.len() - half] {
                labels[i] = BATHYMETRY;
                n_bathy += 1;
            }
        }

        if n_bathy == 0 {
            log::debug!("medianfilter: no bathymetry photons found");
        }
        labels
    }
}

impl Default for MedianFilter {
    fn default() -> Self {
        Self::new()
    }
}

impl PhotonClassifier for MedianFilter {
    fn kind(&self) -> ClassifierKind {
        ClassifierKind::MedianFilter
    }

    fn classify(&self, _beam: &BeamInfo, frame: PhotonFrame) -> BathyResult<ClassifierOutput> {
        self.params.validate()?;
        Ok(ClassifierOutput::labels(self.classify_photons(
            &frame.lat_ph,
            &frame.ortho_h,
            &frame.class_ph,
        )))
    }
}

/// Drop any value farther than `buffer` from the median of a window it
/// belongs to; short inputs are kept whole
fn rolling_median_buffer(heights: &[f64], window: usize, buffer: f64) -> Vec<bool> {
    let n = heights.len();
    let mut keep = vec![true; n];
    if n < window {
        return keep;
    }
    for start in 0..=n - window {
        let values = &heights[start..start + window];
        let Some(m) = median(values) else { continue };
        for (k, h) in values.iter().enumerate() {
            if (h - m).abs() > buffer {
                keep[start + k] = false;
            }
        }
    }
    keep
}

/// Keep values that sit within `kdiff` of some window median and belong to
/// some window with standard deviation below `kstd`
fn rolling_median_std(heights: &[f64], window: usize, kdiff: f64, kstd: f64) -> Vec<bool> {
    let n = heights.len();
    let mut near = vec![false; n];
    let mut calm = vec![false; n];
    if n < window {
        return near;
    }
    for start in 0..=n - window {
        let values = &heights[start..start + window];
        if let Some(m) = median(values) {
            for (k, h) in values.iter().enumerate() {
                if (m - h).abs() < kdiff {
                    near[start + k] = true;
                }
            }
        }
        if sample_std(values).map_or(false, |s| s < kstd) {
            calm[start..start + window].iter_mut().for_each(|c| *c = true);
        }
    }
    near.iter().zip(&calm).map(|(a, b)| *a && *b).collect()
}

/// Sort photons by latitude, bin them into segments, keep segments with
/// more than `min_photons` and merge runs of adjacent kept segments
fn segment_runs<F>(photons: &[usize], lat: F, segment_length: f64, min_photons: usize) -> Vec<Vec<usize>>
where
    F: Fn(usize) -> f64,
{
    let mut sorted = photons.to_vec();
    sorted.sort_by(|a, b| lat(*a).total_cmp(&lat(*b)));

    let mut segments: Vec<(i64, Vec<usize>)> = Vec::new();
    for i in sorted {
        let id = (lat(i) / segment_length).floor() as i64;
        match segments.last_mut() {
            Some((last, members)) if *last == id => members.push(i),
            _ => segments.push((id, vec![i])),
        }
    }

    let mut runs: Vec<Vec<usize>> = Vec::new();
    let mut previous: Option<i64> = None;
    for (id, members) in segments.into_iter().filter(|(_, m)| m.len() > min_photons) {
        match (previous, runs.last_mut()) {
            (Some(p), Some(run)) if id == p + 1 => run.extend(members),
            _ => runs.push(members),
        }
        previous = Some(id);
    }
    runs
}

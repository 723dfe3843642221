//! Run-level bathymetry statistics

use super::signal::{mean, sample_std};
use crate::types::{PhotonFrame, BATHYMETRY, SEA_SURFACE};
use serde::Serialize;
use std::collections::BTreeSet;

/// Along-track length of one ATL03 segment in metres
pub const SEGMENT_LENGTH_M: f64 = 20.0;

/// Statistics embedded in the output metadata; undefined values are `null`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BathyStats {
    pub total_photons: usize,
    pub sea_surface_photons: usize,
    pub subaqueous_photons: usize,
    pub bathy_photons: usize,
    pub bathy_strong_photons: usize,
    pub bathy_linear_coverage: f64,
    pub bathy_mean_depth: Option<f64>,
    pub bathy_min_depth: Option<f64>,
    pub bathy_max_depth: Option<f64>,
    pub bathy_std_depth: Option<f64>,
    pub subaqueous_mean_uncertainty: Option<f64>,
    pub subaqueous_min_uncertainty: Option<f64>,
    pub subaqueous_max_uncertainty: Option<f64>,
    pub subaqueous_std_uncertainty: Option<f64>,
}

/// Mean, min, max and sample standard deviation
fn summary(values: &[f64]) -> (Option<f64>, Option<f64>, Option<f64>, Option<f64>) {
    let min = values.iter().cloned().reduce(f64::min);
    let max = values.iter().cloned().reduce(f64::max);
    (mean(values), min, max, sample_std(values))
}

impl BathyStats {
    /// Statistics of a corrected frame given its final labels
    pub fn compute(frame: &PhotonFrame, labels: &[i8], subaqueous_photons: usize) -> Self {
        let bathy: Vec<usize> = (0..frame.len()).filter(|i| labels[*i] == BATHYMETRY).collect();
        let depth: Vec<f64> = bathy
            .iter()
            .map(|i| frame.surface_h[*i] - frame.ortho_h[*i])
            .collect();
        let uncertainty: Vec<f64> = bathy.iter().map(|i| frame.subaqueous_sigma_tvu[*i]).collect();
        let segments: BTreeSet<i32> = bathy.iter().map(|i| frame.index_seg[*i]).collect();

        let (bathy_mean_depth, bathy_min_depth, bathy_max_depth, bathy_std_depth) = summary(&depth);
        let (
            subaqueous_mean_uncertainty,
            subaqueous_min_uncertainty,
            subaqueous_max_uncertainty,
            subaqueous_std_uncertainty,
        ) = summary(&uncertainty);

        Self {
            total_photons: frame.len(),
            sea_surface_photons: labels.iter().filter(|l| **l == SEA_SURFACE).count(),
            subaqueous_photons,
            bathy_photons: bathy.len(),
            bathy_strong_photons: bathy
                .iter()
                .filter(|i| matches!(frame.spot[**i], 1 | 3 | 5))
                .count(),
            bathy_linear_coverage: SEGMENT_LENGTH_M * segments.len() as f64,
            bathy_mean_depth,
            bathy_min_depth,
            bathy_max_depth,
            bathy_std_depth,
            subaqueous_mean_uncertainty,
            subaqueous_min_uncertainty,
            subaqueous_max_uncertainty,
            subaqueous_std_uncertainty,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_stats_over_bathy_photons() {
        let mut frame = PhotonFrame::blank(5, 1);
        frame.spot = vec![1, 1, 2, 2, 2];
        frame.index_seg = vec![10, 10, 11, 12, 12];
        frame.ortho_h = vec![-2.0, -4.0, -3.0, 0.0, -6.0];
        frame.subaqueous_sigma_tvu = vec![0.2, 0.4, 0.3, 0.0, 0.5];
        let labels = vec![40, 40, 40, 41, 0];

        let stats = BathyStats::compute(&frame, &labels, 4);
        assert_eq!(stats.total_photons, 5);
        assert_eq!(stats.sea_surface_photons, 1);
        assert_eq!(stats.subaqueous_photons, 4);
        assert_eq!(stats.bathy_photons, 3);
        assert_eq!(stats.bathy_strong_photons, 2);
        assert_eq!(stats.bathy_linear_coverage, 40.0);
        assert_relative_eq!(stats.bathy_mean_depth.unwrap(), 3.0);
        assert_eq!(stats.bathy_min_depth, Some(2.0));
        assert_eq!(stats.bathy_max_depth, Some(4.0));
        assert_relative_eq!(stats.bathy_std_depth.unwrap(), 1.0);
        assert_relative_eq!(stats.subaqueous_mean_uncertainty.unwrap(), 0.3, epsilon = 1e-12);
    }

    #[test]
    fn test_empty_bathy_serializes_null() {
        let frame = PhotonFrame::blank(2, 1);
        let stats = BathyStats::compute(&frame, &[41, 0], 0);
        assert_eq!(stats.bathy_linear_coverage, 0.0);
        let json = serde_json::to_value(&stats).unwrap();
        assert!(json["bathy_mean_depth"].is_null());
        assert!(json["subaqueous_std_uncertainty"].is_null());
        assert_eq!(json["total_photons"], 2);
    }
}

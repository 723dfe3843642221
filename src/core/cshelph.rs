//! C-SHELPh bathymetry classifier
//!
//! Photons are binned by latitude and height. Within each latitude bin the
//! modal height bin of the photons below the local median surface is taken
//! as the seafloor when its count clears a percentile threshold computed
//! over all latitude bins.

use super::classifier::{ClassifierOutput, PhotonClassifier};
use super::signal::{mean, median, percentile};
use crate::types::{
    BathyError, BathyResult, BeamInfo, ClassifierKind, PhotonFrame, BATHYMETRY, SEA_SURFACE,
    UNCLASSIFIED,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Version recorded in the output metadata
pub const CSHELPH_VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CShelphParams {
    /// Height bin size in metres
    pub h_res: f64,
    /// Latitude bin size in degrees
    pub lat_res: f64,
    /// Percentile of modal bin counts used as the threshold
    pub thresh: f64,
    pub min_buffer: f64,
    pub max_buffer: f64,
    pub min_photons_per_bin: f64,
    /// Accepted for older run descriptors; has no effect
    pub surface_buffer: f64,
}

impl Default for CShelphParams {
    fn default() -> Self {
        Self {
            h_res: 0.5,
            lat_res: 0.001,
            thresh: 25.0,
            min_buffer: -80.0,       // metres
            max_buffer: 5.0,         // metres
            min_photons_per_bin: 5.0,
            surface_buffer: -0.5,    // metres
        }
    }
}

impl CShelphParams {
    pub fn validate(&self) -> BathyResult<()> {
        if !(self.h_res > 0.0 && self.lat_res > 0.0) {
            return Err(BathyError::InvalidParameter(format!(
                "cshelph resolutions must be positive, got h_res {} lat_res {}",
                self.h_res, self.lat_res
            )));
        }
        if !(0.0..=100.0).contains(&self.thresh) {
            return Err(BathyError::InvalidParameter(format!(
                "cshelph thresh must be a percentile, got {}",
                self.thresh
            )));
        }
        if !(self.min_buffer < self.max_buffer) {
            return Err(BathyError::InvalidParameter(format!(
                "cshelph min_buffer {} must be below max_buffer {}",
                self.min_buffer, self.max_buffer
            )));
        }
        Ok(())
    }
}

/// Equal-width bins over `[min, max]`, right-closed with the first bin
/// also holding `min`
#[derive(Debug, Clone, Copy)]
struct EqualBins {
    min: f64,
    width: f64,
    count: usize,
}

impl EqualBins {
    fn new(min: f64, max: f64, resolution: f64) -> Self {
        let count = (((max - min).abs() / resolution).round() as usize).max(1);
        Self {
            min,
            width: (max - min) / count as f64,
            count,
        }
    }

    fn index(&self, v: f64) -> usize {
        if self.width <= 0.0 {
            return 0;
        }
        let k = ((v - self.min) / self.width).ceil() as isize - 1;
        k.clamp(0, self.count as isize - 1) as usize
    }
}

/// C-SHELPh classifier
pub struct CShelph {
    params: CShelphParams,
}

impl CShelph {
    pub fn new() -> Self {
        Self {
            params: CShelphParams::default(),
        }
    }

    pub fn with_params(params: CShelphParams) -> Self {
        Self { params }
    }

    /// Label photons 41 (input sea surface), 40 (bathymetry) or 0
    pub fn classify_photons(&self, lat_ph: &[f64], ortho_h: &[f64], class_ph: &[i8]) -> Vec<i8> {
        let p = &self.params;
        let surface_only: Vec<i8> = class_ph
            .iter()
            .map(|c| if *c == SEA_SURFACE { SEA_SURFACE } else { UNCLASSIFIED })
            .collect();

        let inside: Vec<usize> = (0..ortho_h.len())
            .filter(|i| ortho_h[*i] > p.min_buffer && ortho_h[*i] < p.max_buffer && lat_ph[*i].is_finite())
            .collect();
        if inside.is_empty() {
            return surface_only;
        }

        let (lat_min, lat_max) = min_max(inside.iter().map(|i| lat_ph[*i]));
        let (h_min, h_max) = min_max(inside.iter().map(|i| ortho_h[*i]));
        let lat_bins = EqualBins::new(lat_min, lat_max, p.lat_res);
        let h_bins = EqualBins::new(h_min, h_max, p.h_res);

        // photons and median surface per latitude bin
        let mut by_lat: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
        for &i in &inside {
            by_lat.entry(lat_bins.index(lat_ph[i])).or_default().push(i);
        }
        let mut surface_of: BTreeMap<usize, f64> = BTreeMap::new();
        for (bin, members) in &by_lat {
            let heights: Vec<f64> = members.iter().map(|i| ortho_h[*i]).collect();
            if let Some(m) = median(&heights) {
                surface_of.insert(*bin, m);
            }
        }

        // modal height bin of the photons below each local surface
        let mut modes: Vec<(f64, Vec<usize>)> = Vec::new();
        for (bin, members) in &by_lat {
            let Some(surface) = surface_of.get(bin).copied() else { continue };
            let mut counts: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
            for &i in members.iter().filter(|i| ortho_h[**i] < surface - 2.0 * p.h_res) {
                counts.entry(h_bins.index(ortho_h[i])).or_default().push(i);
            }
            let mut best: Option<Vec<usize>> = None;
            for photons in counts.into_values() {
                if best.as_ref().map_or(true, |b| photons.len() > b.len()) {
                    best = Some(photons);
                }
            }
            if let Some(photons) = best {
                modes.push((surface, photons));
            }
        }

        let counts: Vec<f64> = modes.iter().map(|(_, m)| m.len() as f64).collect();
        let (Some(p85), Some(user)) = (percentile(&counts, 85.0), percentile(&counts, p.thresh)) else {
            log::debug!("cshelph: no photons below the local surface");
            return surface_only;
        };
        if p85 == user {
            log::debug!("cshelph: flat modal counts, likely no bathymetry");
        }
        let threshold = if user <= p.min_photons_per_bin {
            p.min_photons_per_bin
        } else {
            user
        };

        let mut bathy = Vec::new();
        let mut surfaces = Vec::new();
        for (surface, photons) in modes.iter().filter(|(_, m)| m.len() as f64 >= threshold) {
            bathy.extend_from_slice(photons);
            surfaces.extend(std::iter::repeat(*surface).take(photons.len()));
        }
        let Some(water_surface) = mean(&surfaces) else {
            log::debug!("cshelph: no latitude bin cleared threshold {:.1}", threshold);
            return surface_only;
        };

        let mut labels = vec![UNCLASSIFIED; ortho_h.len()];
        for i in bathy {
            labels[i] = BATHYMETRY;
        }
        let ceiling = water_surface - 2.5 * p.h_res;
        for (i, label) in labels.iter_mut().enumerate() {
            if ortho_h[i] > ceiling {
                *label = UNCLASSIFIED;
            }
            if class_ph[i] == SEA_SURFACE {
                *label = SEA_SURFACE;
            }
        }
        labels
    }
}

impl Default for CShelph {
    fn default() -> Self {
        Self::new()
    }
}

impl PhotonClassifier for CShelph {
    fn kind(&self) -> ClassifierKind {
        ClassifierKind::CShelph
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

fn min_max(values: impl Iterator<Item = f64>) -> (f64, f64) {
    values.fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| (lo.min(v), hi.max(v)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scene() -> (Vec<f64>, Vec<f64>, Vec<i8>) {
        let mut lat = Vec::new();
        let mut h = Vec::new();
        let mut class = Vec::new();
        for i in 0..1000 {
            let at = i as f64 * 1e-5;
            for _ in 0..2 {
                lat.push(at);
                h.push(0.0);
                class.push(SEA_SURFACE);
            }

            lat.push(at);
            h.push(-7.8 + 0.01 * (i % 10) as f64);
            class.push(UNCLASSIFIED);

            if i % 100 == 50 {
                lat.push(at);
                h.push(-20.0);
                class.push(UNCLASSIFIED);
            }
        }
        (lat, h, class)
    }

    #[test]
    fn test_flat_seafloor_is_bathymetry() {
        let (lat, h, class) = scene();
        // every latitude bin clears the lowest modal count
        let params = CShelphParams {
            thresh: 0.0,
            ..CShelphParams::default()
        };
        let labels = CShelph::with_params(params).classify_photons(&lat, &h, &class);

        for i in 0..h.len() {
            if class[i] == SEA_SURFACE {
                assert_eq!(labels[i], SEA_SURFACE);
            } else if h[i] < -19.0 {
                assert_eq!(labels[i], UNCLASSIFIED);
            } else {
                assert_eq!(labels[i], BATHYMETRY, "photon {} at {}", i, h[i]);
            }
        }
    }

    #[test]
    fn test_default_threshold_keeps_most_seafloor() {
        let (lat, h, class) = scene();
        let labels = CShelph::new().classify_photons(&lat, &h, &class);
        let floor: Vec<usize> = (0..h.len()).filter(|i| h[*i] < -7.0 && h[*i] > -8.0).collect();
        let bathy = floor.iter().filter(|i| labels[**i] == BATHYMETRY).count();
        assert!(bathy * 10 >= floor.len() * 6, "{} of {}", bathy, floor.len());
    }

    #[test]
    fn test_no_candidates_keeps_surface_only() {
        let lat: Vec<f64> = (0..100).map(|i| i as f64 * 1e-5).collect();
        let h = vec![0.0; 100];
        let class: Vec<i8> = (0..100).map(|i| if i % 2 == 0 { SEA_SURFACE } else { 1 }).collect();
        let labels = CShelph::new().classify_photons(&lat, &h, &class);
        for i in 0..100 {
            let expected = if i % 2 == 0 { SEA_SURFACE } else { UNCLASSIFIED };
            assert_eq!(labels[i], expected);
        }
    }

    #[test]
    fn test_out_of_buffer_photons_ignored() {
        let lat = vec![0.0, 0.0005, 0.001];
        let h = vec![-100.0, 10.0, -90.0];
        let class = vec![UNCLASSIFIED; 3];
        let labels = CShelph::new().classify_photons(&lat, &h, &class);
        assert!(labels.iter().all(|l| *l == UNCLASSIFIED));
    }

    #[test]
    fn test_equal_bins_are_right_closed() {
        let bins = EqualBins::new(0.0, 2.0, 0.5);
        assert_eq!(bins.count, 4);
        assert_eq!(bins.index(0.0), 0);
        assert_eq!(bins.index(0.5), 0);
        assert_eq!(bins.index(0.51), 1);
        assert_eq!(bins.index(2.0), 3);

        let single = EqualBins::new(1.0, 1.0, 0.5);
        assert_eq!(single.index(1.0), 0);
    }

    #[test]
    fn test_params_validation() {
        assert!(CShelphParams::default().validate().is_ok());
        let p = CShelphParams {
            thresh: 120.0,
            ..CShelphParams::default()
        };
        assert!(p.validate().is_err());
        let unknown: Result<CShelphParams, _> = serde_json::from_str(r#"{"h_res": 0.5, "extra": true}"#);
        assert!(unknown.is_err());
    }
}

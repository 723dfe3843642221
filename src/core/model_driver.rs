//! OpenOceans model driver
//!
//! Bins a beam along track, builds one pseudowaveform per sliding window
//! and averages the per-photon votes of every window (and every jittered
//! model pass) that included the photon.

use super::classifier::{ClassifierOutput, PhotonClassifier};
use super::waveform::{Waveform, WaveformClass, WaveformConfig, WaveformParams};
use crate::types::{BathyError, BathyResult, BeamInfo, BeamStrength, ClassifierKind, PhotonFrame};
use ndarray::{Array1, Array2, Axis};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

/// OpenOceans parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct OpenOceansParams {
    /// Along-track bin width in metres
    pub res_along_track: f64,
    /// Vertical histogram resolution in metres
    pub res_z: f64,
    /// Window width in along-track bins (odd)
    pub window_size: usize,
    /// Histogram height range `[min, max]` in metres
    pub range_z: [f64; 2],
    /// Number of model passes; more than one jitters `res_z`
    pub n_models: usize,
    pub res_z_jitter: [f64; 2],
    pub seed: u64,
    /// Photons per independently modeled chunk, 0 for no chunking
    pub chunk_size: usize,
    pub verbose: bool,
}

impl Default for OpenOceansParams {
    fn default() -> Self {
        Self {
            res_along_track: 10.0,      // metres
            res_z: 0.2,                 // metres
            window_size: 11,            // 3x overlap does not filter daytime noise
            range_z: [-50.0, 30.0],     // keep room above the surface for noise estimation
            n_models: 1,
            res_z_jitter: [0.1, 0.3],
            seed: 33,
            chunk_size: 65536,
            verbose: false,
        }
    }
}

impl OpenOceansParams {
    pub fn validate(&self) -> BathyResult<()> {
        if !(self.res_along_track > 0.0) {
            return Err(BathyError::InvalidParameter(format!(
                "openoceans res_along_track must be positive, got {}",
                self.res_along_track
            )));
        }
        if !(self.res_z > 0.0) {
            return Err(BathyError::InvalidParameter(format!(
                "openoceans res_z must be positive, got {}",
                self.res_z
            )));
        }
        if self.window_size == 0 || self.window_size % 2 == 0 {
            return Err(BathyError::InvalidParameter(format!(
                "openoceans window_size must be odd, got {}",
                self.window_size
            )));
        }
        if !(self.range_z[0] < self.range_z[1]) {
            return Err(BathyError::InvalidParameter(format!(
                "openoceans range_z must be increasing, got {:?}",
                self.range_z
            )));
        }
        if self.n_models == 0 {
            return Err(BathyError::InvalidParameter(
                "openoceans n_models must be at least 1".to_string(),
            ));
        }
        let [lo, hi] = self.res_z_jitter;
        if !(lo > 0.0 && lo <= hi) {
            return Err(BathyError::InvalidParameter(format!(
                "openoceans res_z_jitter must satisfy 0 < min <= max, got {:?}",
                self.res_z_jitter
            )));
        }
        Ok(())
    }
}

/// One row of the per-window parameter table
#[derive(Debug, Clone, Serialize)]
pub struct WindowRecord {
    pub model: usize,
    pub chunk: usize,
    pub window_centre: usize,
    pub at_range: (f64, f64),
    pub at_median: f64,
    pub n_photons: usize,
    pub res_z: f64,
    pub quality_flag: i8,
    pub turb_score: f64,
    #[serde(flatten)]
    pub params: WaveformParams,
}

/// Model envelope over along-track bins (rows) and `z_inv` bins (columns)
#[derive(Debug, Clone)]
pub struct ModelHistogram {
    pub model: usize,
    pub chunk: usize,
    pub bin_edges_at: Vec<f64>,
    pub z_inv: Array1<f64>,
    pub data: Array2<f64>,
}

/// Averaged OpenOceans result for one beam
#[derive(Debug, Clone)]
pub struct OpenOceansResult {
    pub classification: Vec<WaveformClass>,
    /// Vote fractions per photon, columns indexed by `WaveformClass::index`
    pub class_scores: Array2<f64>,
    pub weight_surface: Vec<f64>,
    pub weight_bathymetry: Vec<f64>,
    pub subsurface_score: Vec<f64>,
    pub windows: Vec<WindowRecord>,
    pub model_histograms: Vec<ModelHistogram>,
}

impl OpenOceansResult {
    /// Labels in the shared class taxonomy
    pub fn photon_labels(&self) -> Vec<i8> {
        self.classification.iter().map(|c| c.photon_class()).collect()
    }
}

/// Running per-photon vote counters
struct VoteAccumulator {
    counts: Vec<[u32; 4]>,
    weight_surface: Vec<f64>,
    weight_bathymetry: Vec<f64>,
    subsurface: Vec<f64>,
    seen: Vec<u32>,
}

impl VoteAccumulator {
    fn new(n: usize) -> Self {
        Self {
            counts: vec![[0; 4]; n],
            weight_surface: vec![0.0; n],
            weight_bathymetry: vec![0.0; n],
            subsurface: vec![0.0; n],
            seen: vec![0; n],
        }
    }

    fn add(&mut self, photons: &[usize], waveform: &Waveform) {
        for (k, &p) in photons.iter().enumerate() {
            self.counts[p][waveform.classification[k].index()] += 1;
            self.weight_surface[p] += waveform.weight_surface[k];
            self.weight_bathymetry[p] += waveform.weight_bathymetry[k];
            if waveform.subsurface_flag[k] {
                self.subsurface[p] += 1.0;
            }
            self.seen[p] += 1;
        }
    }

    fn finish(
        self,
        windows: Vec<WindowRecord>,
        model_histograms: Vec<ModelHistogram>,
    ) -> OpenOceansResult {
        let n = self.seen.len();
        let mut classification = Vec::with_capacity(n);
        let mut class_scores = Array2::<f64>::zeros((n, 4));
        let mut weight_surface = vec![0.0; n];
        let mut weight_bathymetry = vec![0.0; n];
        let mut subsurface_score = vec![0.0; n];

        for p in 0..n {
            let seen = self.seen[p];
            if seen == 0 {
                classification.push(WaveformClass::Background);
                continue;
            }
            let total = seen as f64;
            let mut best: Option<(WaveformClass, f64)> = None;
            for class in WaveformClass::TIE_ORDER {
                let score = self.counts[p][class.index()] as f64 / total;
                class_scores[[p, class.index()]] = score;
                if best.map_or(true, |(_, s)| score > s) {
                    best = Some((class, score));
                }
            }
            classification.push(best.map_or(WaveformClass::Background, |(c, _)| c));
            weight_surface[p] = self.weight_surface[p] / total;
            weight_bathymetry[p] = self.weight_bathymetry[p] / total;
            subsurface_score[p] = self.subsurface[p] / total;
        }

        OpenOceansResult {
            classification,
            class_scores,
            weight_surface,
            weight_bathymetry,
            subsurface_score,
            windows,
            model_histograms,
        }
    }
}

/// OpenOceans model driver for one beam
pub struct OpenOceans {
    params: OpenOceansParams,
}

impl OpenOceans {
    pub fn new() -> Self {
        Self {
            params: OpenOceansParams::default(),
        }
    }

    pub fn with_params(params: OpenOceansParams) -> Self {
        Self { params }
    }

    pub fn params(&self) -> &OpenOceansParams {
        &self.params
    }

    /// Classify every photon of `frame`
    pub fn process(&self, frame: &PhotonFrame, strength: BeamStrength) -> BathyResult<OpenOceansResult> {
        self.params.validate()?;
        let n = frame.len();

        // photons without a finite position or height never enter a window
        let mut order: Vec<usize> = (0..n)
            .filter(|i| frame.x_ph[*i].is_finite() && frame.ortho_h[*i].is_finite())
            .collect();
        order.sort_by(|a, b| frame.x_ph[*a].total_cmp(&frame.x_ph[*b]));
        if order.len() < n {
            log::debug!("{} photons without finite x_ph/ortho_h left unmodeled", n - order.len());
        }

        let chunks: Vec<&[usize]> = if self.params.chunk_size == 0 || order.is_empty() {
            vec![order.as_slice()]
        } else {
            order.chunks(self.params.chunk_size).collect()
        };

        let mut rng = StdRng::seed_from_u64(self.params.seed);
        let mut votes = VoteAccumulator::new(n);
        let mut windows = Vec::new();
        let mut model_histograms = Vec::new();

        for model in 0..self.params.n_models {
            let res_z = if self.params.n_models == 1 {
                self.params.res_z
            } else {
                let [lo, hi] = self.params.res_z_jitter;
                rng.gen_range(lo..=hi)
            };
            let config = WaveformConfig {
                range_z: self.params.range_z,
                res_z,
            };
            if self.params.verbose {
                log::info!("OpenOceans pass {} with res_z {:.3}", model + 1, res_z);
            }

            for (chunk, photons) in chunks.iter().enumerate() {
                if photons.is_empty() {
                    continue;
                }
                let histogram = self.process_chunk(
                    frame,
                    photons,
                    &config,
                    strength,
                    (model, chunk),
                    &mut votes,
                    &mut windows,
                );
                model_histograms.push(histogram);
            }
        }

        log::debug!(
            "OpenOceans built {} waveforms over {} photons",
            windows.len(),
            n
        );
        Ok(votes.finish(windows, model_histograms))
    }

    #[allow(clippy::too_many_arguments)]
    fn process_chunk(
        &self,
        frame: &PhotonFrame,
        photons: &[usize],
        config: &WaveformConfig,
        strength: BeamStrength,
        (model, chunk): (usize, usize),
        votes: &mut VoteAccumulator,
        windows: &mut Vec<WindowRecord>,
    ) -> ModelHistogram {
        let res = self.params.res_along_track;
        let half = self.params.window_size / 2;
        let x_min = frame.x_ph[photons[0]];

        // photons are sorted by x_ph, so each bin is a contiguous run
        let bin_of = |p: usize| ((frame.x_ph[p] - x_min) / res).floor() as usize;
        let n_bins = bin_of(photons[photons.len() - 1]) + 1;
        let mut bin_start = vec![0usize; n_bins + 1];
        for &p in photons {
            bin_start[bin_of(p) + 1] += 1;
        }
        for b in 0..n_bins {
            bin_start[b + 1] += bin_start[b];
        }

        let z_bins = (((config.range_z[1] - config.range_z[0]) / config.res_z).ceil() as usize).max(2);
        let bin_z = (config.range_z[1] - config.range_z[0]) / z_bins as f64;
        let z_inv = Array1::from_iter((0..z_bins).map(|k| -config.range_z[1] + (k as f64 + 0.5) * bin_z));
        let mut data = Array2::<f64>::from_elem((n_bins, z_bins), f64::NAN);

        let mut heights = Vec::new();
        for centre in 0..n_bins {
            let lo = centre.saturating_sub(half);
            let hi = (centre + half).min(n_bins - 1);
            let members = &photons[bin_start[lo]..bin_start[hi + 1]];
            if members.is_empty() {
                continue;
            }

            heights.clear();
            heights.extend(members.iter().map(|p| frame.ortho_h[*p]));
            let waveform = Waveform::new(&heights, config, strength);
            votes.add(members, &waveform);

            let output = waveform.model.output();
            if output.len() == z_bins {
                data.row_mut(centre).assign(&output);
            }

            let mut along: Vec<f64> = members.iter().map(|p| frame.x_ph[*p]).collect();
            along.sort_by(f64::total_cmp);
            let at_median = super::signal::median(&along).unwrap_or(f64::NAN);

            windows.push(WindowRecord {
                model,
                chunk,
                window_centre: centre,
                at_range: (x_min + lo as f64 * res, x_min + (hi + 1) as f64 * res),
                at_median,
                n_photons: members.len(),
                res_z: config.res_z,
                quality_flag: waveform.quality_flag.code(),
                turb_score: super::signal::trapz(waveform.model.column.as_slice().unwrap_or(&[])),
                params: waveform.params,
            });
        }

        fill_rows(&mut data);
        ModelHistogram {
            model,
            chunk,
            bin_edges_at: (0..=n_bins).map(|b| x_min + b as f64 * res).collect(),
            z_inv,
            data,
        }
    }
}

impl Default for OpenOceans {
    fn default() -> Self {
        Self::new()
    }
}

impl PhotonClassifier for OpenOceans {
    fn kind(&self) -> ClassifierKind {
        ClassifierKind::OpenOceans
    }

    fn classify(&self, beam: &BeamInfo, frame: PhotonFrame) -> BathyResult<ClassifierOutput> {
        let result = self.process(&frame, beam.strength)?;
        log::debug!(
            "openoceans {}: {} windows modeled",
            beam.beam,
            result.windows.len()
        );
        Ok(ClassifierOutput::labels(result.photon_labels()))
    }
}

/// Linearly interpolate unmodeled rows between modeled ones and fill the
/// edges from the nearest modeled row
fn fill_rows(data: &mut Array2<f64>) {
    let modeled: Vec<usize> = data
        .axis_iter(Axis(0))
        .enumerate()
        .filter(|(_, row)| row.iter().all(|v| v.is_finite()))
        .map(|(r, _)| r)
        .collect();
    let (Some(&first), Some(&last)) = (modeled.first(), modeled.last()) else {
        data.fill(0.0);
        return;
    };

    for r in 0..first {
        let source = data.row(first).to_owned();
        data.row_mut(r).assign(&source);
    }
    for r in last + 1..data.nrows() {
        let source = data.row(last).to_owned();
        data.row_mut(r).assign(&source);
    }
    for pair in modeled.windows(2) {
        let (a, b) = (pair[0], pair[1]);
        if b - a < 2 {
            continue;
        }
        let top = data.row(a).to_owned();
        let bottom = data.row(b).to_owned();
        for r in a + 1..b {
            let t = (r - a) as f64 / (b - a) as f64;
            let row = &top * (1.0 - t) + &bottom * t;
            data.row_mut(r).assign(&row);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    /// Flat sea surface at 0 m with a seafloor at `-depth` over `length` metres
    fn flat_track(length: f64, depth: Option<f64>) -> PhotonFrame {
        let n_steps = (length / 0.5) as usize;
        let mut x = Vec::new();
        let mut h = Vec::new();
        for s in 0..n_steps {
            let at = s as f64 * 0.5;
            for k in 0..8 {
                x.push(at);
                h.push(-0.14 + 0.04 * k as f64);
            }
            if let Some(d) = depth {
                for k in 0..4 {
                    x.push(at + 0.25);
                    h.push(-d - 0.15 + 0.1 * k as f64);
                }
            }
        }
        let mut frame = PhotonFrame::blank(x.len(), 1);
        frame.x_ph = x;
        frame.ortho_h = h;
        frame
    }

    #[test]
    fn test_params_validation() {
        assert!(OpenOceansParams::default().validate().is_ok());

        let mut p = OpenOceansParams::default();
        p.window_size = 10;
        assert!(matches!(p.validate(), Err(BathyError::InvalidParameter(_))));

        let mut p = OpenOceansParams::default();
        p.range_z = [30.0, -50.0];
        assert!(p.validate().is_err());

        let mut p = OpenOceansParams::default();
        p.res_z = 0.0;
        assert!(p.validate().is_err());
    }

    #[test]
    fn test_params_reject_unknown_keys() {
        let parsed: Result<OpenOceansParams, _> = serde_json::from_str(r#"{"res_z": 0.25, "bogus": 1}"#);
        assert!(parsed.is_err());
        let parsed: OpenOceansParams = serde_json::from_str(r#"{"res_z": 0.25}"#).unwrap();
        assert_relative_eq!(parsed.res_z, 0.25);
        assert_eq!(parsed.window_size, 11);
    }

    #[test]
    fn test_surface_track_is_all_surface() {
        let frame = flat_track(200.0, None);
        let result = OpenOceans::new().process(&frame, BeamStrength::Strong).unwrap();

        assert_eq!(result.classification.len(), frame.len());
        assert!(result
            .photon_labels()
            .iter()
            .all(|l| *l == crate::types::SEA_SURFACE));
        // every window of 11 bins over 20 bins
        assert_eq!(result.windows.len(), 20);
        assert_eq!(result.model_histograms.len(), 1);
        assert_eq!(result.model_histograms[0].data.nrows(), 20);
        for p in 0..frame.len() {
            let row_sum: f64 = result.class_scores.row(p).sum();
            assert_relative_eq!(row_sum, 1.0, epsilon = 1e-12);
        }
    }

    #[test]
    fn test_bathy_track_labels_seafloor() {
        let frame = flat_track(300.0, Some(6.0));
        let result = OpenOceans::new().process(&frame, BeamStrength::Strong).unwrap();
        let labels = result.photon_labels();

        let deep: Vec<usize> = (0..frame.len()).filter(|i| frame.ortho_h[*i] < -5.0).collect();
        let bathy = deep
            .iter()
            .filter(|i| labels[**i] == crate::types::BATHYMETRY)
            .count();
        assert!(bathy * 10 >= deep.len() * 8, "{} of {} seafloor photons", bathy, deep.len());
        assert!((0..frame.len())
            .filter(|i| frame.ortho_h[*i] > -0.5)
            .all(|i| labels[i] != crate::types::BATHYMETRY));
    }

    #[test]
    fn test_jittered_models_are_reproducible() {
        let frame = flat_track(100.0, Some(4.0));
        let params = OpenOceansParams {
            n_models: 3,
            ..OpenOceansParams::default()
        };
        let a = OpenOceans::with_params(params.clone()).process(&frame, BeamStrength::Weak).unwrap();
        let b = OpenOceans::with_params(params).process(&frame, BeamStrength::Weak).unwrap();
        assert_eq!(a.classification, b.classification);
        assert_eq!(a.model_histograms.len(), 3);
        let res: Vec<f64> = a.model_histograms.iter().map(|m| m.z_inv[1] - m.z_inv[0]).collect();
        assert!(res.iter().all(|r| *r > 0.099 && *r <= 0.3 + 1e-9));
    }

    #[test]
    fn test_empty_frame() {
        let frame = PhotonFrame::blank(0, 2);
        let result = OpenOceans::new().process(&frame, BeamStrength::Weak).unwrap();
        assert!(result.classification.is_empty());
        assert!(result.windows.is_empty());
    }

    #[test]
    fn test_fill_rows_interpolates_and_edge_fills() {
        let mut data = Array2::from_elem((5, 2), f64::NAN);
        data.row_mut(1).assign(&Array1::from(vec![1.0, 2.0]));
        data.row_mut(3).assign(&Array1::from(vec![3.0, 6.0]));
        fill_rows(&mut data);
        assert_relative_eq!(data[[0, 0]], 1.0);
        assert_relative_eq!(data[[2, 0]], 2.0);
        assert_relative_eq!(data[[2, 1]], 4.0);
        assert_relative_eq!(data[[4, 1]], 6.0);
    }
}

//! OpenOceans pseudowaveform model for one along-track window
//!
//! The photons of a window are histogrammed in inverted elevation
//! (`z_inv = -ortho_h`, so depth increases with index), smoothed, and
//! explained by four components:
//!
//! * a sea surface Gaussian mixture (one or two modes),
//! * an exponentially decaying water column return below the surface,
//! * a single Gaussian seafloor (bathymetry) return,
//! * a uniform background rate.
//!
//! Each photon is labeled by the component that dominates at its elevation,
//! after which a set of quality gates may veto the result.

use super::curve_fit::{fit_gaussian, Bounds};
use super::gmm::GaussianMixture;
use super::peaks::{get_peak_info, sort_by_area, sort_by_prominence, PeakInfo};
use super::signal::{
    gauss, gaussian_filter1d, gaussian_pdf, histogram1d, interp, mean, mean_plus_three_sigma,
    weighted_linear_fit, EPSILON,
};
use crate::types::BeamStrength;
use ndarray::Array1;
use serde::Serialize;

/// Gaussian smoothing applied to histograms and the surface model, metres
pub const SURFACE_SMOOTHING_M: f64 = 0.1;

const MODEL_GRID_STEP_M: f64 = 0.01;
const INTERSECTION_STEP_M: f64 = 1e-3;
const BACKGROUND_BAND_M: f64 = 5.0;
const ELBOW_RUN_M: f64 = 10.0;
const TURBIDITY_DEPTH_M: f64 = 10.0;
const DECAY_WEIGHT_DEPTH_M: f64 = 15.0;
const MAX_COLUMN_TOP_DEPTH_M: f64 = 10.0;
const SURFACE_MODE_SEPARATION_M: f64 = 5.0;
const NEIGHBOR_PEAK_RANGE_M: f64 = 10.0;

const TWO_PEAK_HEIGHT_RATIO: f64 = 0.2;
const TWO_PEAK_MIN_PHOTONS: usize = 10;
const NOISE_PEAK_RATIO: f64 = 0.6;
const BATHY_SWAP_AREA_RATIO: f64 = 0.8;
const BATHY_SWAP_DEPTH_M: f64 = 10.0;
const MIN_BATHY_FRACTION: f64 = 0.1;
const MIN_BATHY_HEIGHT: f64 = 0.3;

const MIN_SURFACE_PHOTONS: usize = 3;
const MIN_BATHY_PHOTONS: usize = 5;
const SHALLOW_BATHY_DEPTH_M: f64 = 1.0;
const SHALLOW_MIN_PHOTONS_STRONG: usize = 20;
const SHALLOW_MIN_PHOTONS_WEAK: usize = 10;

/// Turbidity intensity used when no decay could be fitted
const TURBIDITY_FLOOR: f64 = 1e-4;
/// Turbidity intensity used when the decay fit was rejected
const TURBIDITY_REJECTED: f64 = 1e-3;

/// Per-photon class assigned by the waveform model
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum WaveformClass {
    Surface,
    Column,
    Bathymetry,
    Background,
}

impl WaveformClass {
    /// Preference order when scores are equal
    pub const TIE_ORDER: [WaveformClass; 4] = [
        WaveformClass::Background,
        WaveformClass::Surface,
        WaveformClass::Column,
        WaveformClass::Bathymetry,
    ];

    pub fn index(self) -> usize {
        match self {
            WaveformClass::Surface => 0,
            WaveformClass::Column => 1,
            WaveformClass::Bathymetry => 2,
            WaveformClass::Background => 3,
        }
    }

    /// Map onto the shared class taxonomy
    pub fn photon_class(self) -> i8 {
        match self {
            WaveformClass::Surface => crate::types::SEA_SURFACE,
            WaveformClass::Bathymetry => crate::types::BATHYMETRY,
            WaveformClass::Column | WaveformClass::Background => crate::types::UNCLASSIFIED,
        }
    }
}

/// Outcome of the waveform gates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum QualityFlag {
    InsufficientData,
    NoPeaks,
    NoiseLike,
    WeakSignal,
    NoSurfacePhotons,
    SurfaceOnly,
    IsolatedBathy,
    MultipleBathy,
    BathyRemoved,
    ShallowBathyRemoved,
}

impl QualityFlag {
    pub fn code(self) -> i8 {
        match self {
            QualityFlag::InsufficientData => -1,
            QualityFlag::NoPeaks => -2,
            QualityFlag::NoiseLike => -3,
            QualityFlag::WeakSignal => -4,
            QualityFlag::NoSurfacePhotons => -11,
            QualityFlag::SurfaceOnly => 1,
            QualityFlag::IsolatedBathy => 2,
            QualityFlag::MultipleBathy => 3,
            QualityFlag::BathyRemoved => 4,
            QualityFlag::ShallowBathyRemoved => 5,
        }
    }

    /// True when a surface model was built for the window
    pub fn is_modeled(self) -> bool {
        self.code() > 0
    }
}

/// Histogram sampling for one waveform
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WaveformConfig {
    pub range_z: [f64; 2],
    pub res_z: f64,
}

/// Parametric pseudowaveform model, locations in inverted elevation
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct WaveformParams {
    pub surf_scaling: f64,
    pub surf_loc_1: f64,
    pub surf_std_1: f64,
    pub surf_weight_1: f64,
    pub surf_loc_2: f64,
    pub surf_std_2: f64,
    pub surf_weight_2: f64,
    pub decay_top_z: f64,
    pub decay_param: f64,
    pub turb_intens: f64,
    pub column_top: f64,
    pub background: f64,
    pub bathy_mag: f64,
    pub bathy_loc: f64,
    pub bathy_std: f64,
}

impl WaveformParams {
    /// Parameter block returned when no model could be built
    pub fn empty() -> Self {
        Self {
            surf_scaling: EPSILON,
            surf_loc_1: 2.0 * EPSILON,
            surf_std_1: EPSILON,
            surf_weight_1: 1.0,
            surf_loc_2: EPSILON,
            surf_std_2: EPSILON,
            surf_weight_2: EPSILON,
            decay_top_z: EPSILON,
            decay_param: -EPSILON,
            turb_intens: EPSILON,
            column_top: EPSILON,
            background: 2.0 * EPSILON,
            bathy_mag: EPSILON,
            bathy_loc: EPSILON,
            bathy_std: EPSILON,
        }
    }

    pub fn clear_bathy(&mut self) {
        self.bathy_mag = EPSILON;
        self.bathy_loc = EPSILON;
        self.bathy_std = EPSILON;
    }

    pub fn has_bathy_component(&self) -> bool {
        self.bathy_std > 1e-8
    }

    /// Location and spread of the shallowest surface mode
    fn top_surface_mode(&self) -> (f64, f64) {
        if self.surf_weight_2 > 1e-6 && self.surf_loc_2 < self.surf_loc_1 {
            (self.surf_loc_2, self.surf_std_2)
        } else {
            (self.surf_loc_1, self.surf_std_1)
        }
    }

    /// Smoothed surface modes at `z_inv`, zero above 3 sigma of the top mode
    pub fn surface_parts(&self, z_inv: f64) -> (f64, f64) {
        let (top_loc, top_std) = self.top_surface_mode();
        if z_inv < top_loc - 3.0 * top_std {
            return (0.0, 0.0);
        }
        let smooth = |std: f64| (std * std + SURFACE_SMOOTHING_M * SURFACE_SMOOTHING_M).sqrt();
        (
            self.surf_scaling * self.surf_weight_1 * gaussian_pdf(z_inv, self.surf_loc_1, smooth(self.surf_std_1)),
            self.surf_scaling * self.surf_weight_2 * gaussian_pdf(z_inv, self.surf_loc_2, smooth(self.surf_std_2)),
        )
    }

    pub fn column(&self, z_inv: f64) -> f64 {
        let top = -self.decay_top_z;
        if z_inv >= top {
            self.turb_intens * (self.decay_param * (z_inv - top)).exp()
        } else {
            0.0
        }
    }

    pub fn bathymetry(&self, z_inv: f64) -> f64 {
        if !self.has_bathy_component()
            || z_inv < -self.column_top
            || (z_inv - self.bathy_loc).abs() > 2.0 * self.bathy_std
        {
            return 0.0;
        }
        gauss(z_inv, self.bathy_mag, self.bathy_loc, self.bathy_std)
    }

    /// Component values at `z_inv`, indexed by [`WaveformClass::index`]
    pub fn components(&self, z_inv: f64) -> [f64; 4] {
        let (s1, s2) = self.surface_parts(z_inv);
        [s1 + s2, self.column(z_inv), self.bathymetry(z_inv), self.background]
    }
}

/// Model components evaluated on a regular `z_inv` axis
#[derive(Debug, Clone)]
pub struct ModelGrid {
    pub z_inv: Array1<f64>,
    pub surface: Array1<f64>,
    pub surface_1: Array1<f64>,
    pub surface_2: Array1<f64>,
    pub column: Array1<f64>,
    pub bathymetry: Array1<f64>,
    pub background: Array1<f64>,
}

impl ModelGrid {
    pub fn evaluate(params: &WaveformParams, z_inv: Array1<f64>) -> Self {
        let parts: Vec<(f64, f64)> = z_inv.iter().map(|z| params.surface_parts(*z)).collect();
        Self {
            surface_1: parts.iter().map(|p| p.0).collect(),
            surface_2: parts.iter().map(|p| p.1).collect(),
            surface: parts.iter().map(|p| p.0 + p.1).collect(),
            column: z_inv.mapv(|z| params.column(z)),
            bathymetry: z_inv.mapv(|z| params.bathymetry(z)),
            background: Array1::from_elem(z_inv.len(), params.background),
            z_inv,
        }
    }

    /// Envelope of all components
    pub fn output(&self) -> Array1<f64> {
        let mut out = self.surface.clone();
        for other in [&self.column, &self.bathymetry, &self.background] {
            out.zip_mut_with(other, |a, b| *a = a.max(*b));
        }
        out
    }

    /// Resample onto another axis by linear interpolation
    pub fn resample(&self, z_inv: &Array1<f64>) -> Self {
        let xp = self.z_inv.to_vec();
        let at = |values: &Array1<f64>| {
            let fp = values.to_vec();
            z_inv.mapv(|z| interp(z, &xp, &fp))
        };
        Self {
            z_inv: z_inv.clone(),
            surface: at(&self.surface),
            surface_1: at(&self.surface_1),
            surface_2: at(&self.surface_2),
            column: at(&self.column),
            bathymetry: at(&self.bathymetry),
            background: at(&self.background),
        }
    }
}

/// Record of the five bathymetry acceptance tests
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BathyTests {
    pub area_ratio: f64,
    pub prominence_ratio: f64,
    pub peak_height: f64,
    pub min_height: f64,
    pub n_photons: usize,
    pub min_n_photons: f64,
    pub ok_area: bool,
    pub ok_prominence: bool,
    pub ok_height: bool,
    pub ok_magnitude: bool,
    pub ok_photons: bool,
    pub passed: bool,
}

/// Result of model parameter estimation
#[derive(Debug, Clone)]
struct Estimate {
    params: WaveformParams,
    quality: QualityFlag,
    bathy_peak: Option<PeakInfo>,
    subsurface_peaks: Vec<PeakInfo>,
}

impl Estimate {
    fn rejected(quality: QualityFlag) -> Self {
        Self {
            params: WaveformParams::empty(),
            quality,
            bathy_peak: None,
            subsurface_peaks: Vec::new(),
        }
    }
}

/// A fitted pseudowaveform and the labels it assigns
#[derive(Debug, Clone)]
pub struct Waveform {
    pub z_inv: Array1<f64>,
    pub hist: Array1<f64>,
    pub peaks: Vec<PeakInfo>,
    pub params: WaveformParams,
    pub quality_flag: QualityFlag,
    pub bathy_tests: Option<BathyTests>,
    /// Model at histogram resolution
    pub model: ModelGrid,
    pub classification: Vec<WaveformClass>,
    pub weight_surface: Vec<f64>,
    pub weight_bathymetry: Vec<f64>,
    pub subsurface_flag: Vec<bool>,
}

impl Waveform {
    /// Build the waveform for the photons of one window
    pub fn new(ortho_h: &[f64], config: &WaveformConfig, strength: BeamStrength) -> Self {
        let [z_min, z_max] = config.range_z;
        let bins = (((z_max - z_min) / config.res_z).ceil() as usize).max(2);
        let bin = (z_max - z_min) / bins as f64;

        let photon_z_inv: Vec<f64> = ortho_h.iter().map(|h| -h).collect();
        let counts = histogram1d(photon_z_inv.iter().copied(), -z_max, -z_min, bins);
        let hist = Array1::from(gaussian_filter1d(&counts.to_vec(), SURFACE_SMOOTHING_M / bin));
        let z_inv = Array1::from_iter((0..bins).map(|k| -z_max + (k as f64 + 0.5) * bin));

        let hist_v = hist.to_vec();
        let z_inv_v = z_inv.to_vec();
        let peaks = get_peak_info(&hist_v, &z_inv_v, &photon_z_inv);
        let estimate = estimate_model_params(&hist_v, &z_inv_v, &photon_z_inv, peaks.clone(), bin);

        let mut params = estimate.params;
        let mut quality = estimate.quality;

        let steps = ((z_inv_v[bins - 1] - z_inv_v[0]).abs() / MODEL_GRID_STEP_M) as usize;
        let grid_axis = Array1::linspace(z_inv_v[0], z_inv_v[bins - 1], steps.max(2));
        let mut grid = ModelGrid::evaluate(&params, grid_axis.clone());

        let mut has_bathy = false;
        let mut bathy_tests = None;
        if quality.is_modeled() {
            if let Some(bathy_peak) = &estimate.bathy_peak {
                let tests = bathy_quality_check(&grid, &params, bathy_peak, &estimate.subsurface_peaks);
                has_bathy = tests.passed;
                if !has_bathy {
                    log::trace!("Bathy peak at z_inv {:.2} rejected: {:?}", bathy_peak.z_inv, tests);
                    params.clear_bathy();
                    grid = ModelGrid::evaluate(&params, grid_axis.clone());
                }
                bathy_tests = Some(tests);
            }
        }

        let mut classification: Vec<WaveformClass> = if quality.is_modeled() {
            photon_z_inv
                .iter()
                .map(|z| label_photon(&params, *z, has_bathy))
                .collect()
        } else {
            vec![WaveformClass::Background; photon_z_inv.len()]
        };

        if quality.is_modeled() {
            let depth = params.bathy_loc + params.column_top;
            if let Some(flag) = apply_label_gates(&mut classification, has_bathy, depth, strength) {
                quality = flag;
                if flag == QualityFlag::NoSurfacePhotons {
                    params = WaveformParams::empty();
                } else {
                    params.clear_bathy();
                }
                has_bathy = false;
                grid = ModelGrid::evaluate(&params, grid_axis);
            }
        }

        let modeled = quality.is_modeled();
        let surface_max = grid
            .surface_1
            .iter()
            .chain(grid.surface_2.iter())
            .fold(0.0f64, |a, b| a.max(*b));
        let surface_present = grid
            .surface
            .iter()
            .zip(grid.background.iter())
            .any(|(s, b)| s - b > 0.0);

        let weight_surface = photon_z_inv
            .iter()
            .map(|z| {
                if !modeled || !surface_present || surface_max <= 0.0 {
                    return 0.0;
                }
                let (s1, s2) = params.surface_parts(*z);
                let conf = ((s1 + s2) / surface_max).clamp(0.0, 1.0);
                if conf < 1e-5 {
                    0.0
                } else {
                    conf
                }
            })
            .collect();

        let weight_bathymetry = photon_z_inv
            .iter()
            .map(|z| {
                if !has_bathy || (z - params.bathy_loc).abs() > 3.0 * params.bathy_std {
                    return 0.0;
                }
                let d = (z - params.bathy_loc) / params.bathy_std;
                (-0.5 * d * d).exp()
            })
            .collect();

        let subsurface_flag = ortho_h
            .iter()
            .map(|h| modeled && *h < params.column_top)
            .collect();

        let model = grid.resample(&z_inv);

        Self {
            z_inv,
            hist,
            peaks,
            params,
            quality_flag: quality,
            bathy_tests,
            model,
            classification,
            weight_surface,
            weight_bathymetry,
            subsurface_flag,
        }
    }

    pub fn has_bathy(&self) -> bool {
        self.params.has_bathy_component()
    }
}

/// Label one photon by its dominant component
///
/// Photons below the column top are never surface.
fn label_photon(params: &WaveformParams, z_inv: f64, has_bathy: bool) -> WaveformClass {
    let values = params.components(z_inv);
    let below_column_top = z_inv > -params.column_top;
    let mut best = WaveformClass::Background;
    let mut best_value = 0.0;
    for class in WaveformClass::TIE_ORDER {
        if class == WaveformClass::Surface && below_column_top {
            continue;
        }
        let value = values[class.index()];
        if value > best_value {
            best = class;
            best_value = value;
        }
    }
    if has_bathy && best == WaveformClass::Column && z_inv > params.bathy_loc {
        WaveformClass::Background
    } else {
        best
    }
}

/// Vetoes applied after labeling; returns the overriding quality flag
pub fn apply_label_gates(
    labels: &mut [WaveformClass],
    has_bathy: bool,
    depth: f64,
    strength: BeamStrength,
) -> Option<QualityFlag> {
    let count = |labels: &[WaveformClass], class| labels.iter().filter(|l| **l == class).count();
    let n_surface = count(labels, WaveformClass::Surface);
    let n_bathy = count(labels, WaveformClass::Bathymetry);
    let n_column = count(labels, WaveformClass::Column);

    if n_surface < MIN_SURFACE_PHOTONS {
        labels.iter_mut().for_each(|l| *l = WaveformClass::Background);
        return Some(QualityFlag::NoSurfacePhotons);
    }

    if n_bathy < MIN_BATHY_PHOTONS {
        let replacement = if n_column > 0 {
            WaveformClass::Column
        } else {
            WaveformClass::Background
        };
        labels
            .iter_mut()
            .filter(|l| **l == WaveformClass::Bathymetry)
            .for_each(|l| *l = replacement);
        return Some(QualityFlag::BathyRemoved);
    }

    let required = match strength {
        BeamStrength::Strong => SHALLOW_MIN_PHOTONS_STRONG,
        BeamStrength::Weak => SHALLOW_MIN_PHOTONS_WEAK,
    };
    if has_bathy && depth < SHALLOW_BATHY_DEPTH_M && n_bathy < required {
        labels
            .iter_mut()
            .filter(|l| **l == WaveformClass::Bathymetry)
            .for_each(|l| *l = WaveformClass::Surface);
        return Some(QualityFlag::ShallowBathyRemoved);
    }

    None
}

/// Histogram checks run before any modeling; the first failing check wins
fn histogram_badness(hist: &[f64], peaks: &[PeakInfo], bin: f64) -> Option<QualityFlag> {
    let nonzero = hist.iter().filter(|v| **v != 0.0).count();
    if nonzero as f64 <= 0.5 / bin {
        return Some(QualityFlag::InsufficientData);
    }
    if peaks.is_empty() {
        return Some(QualityFlag::NoPeaks);
    }
    if peaks.len() > 2 {
        let top = peaks[0].height;
        if peaks[1].height / top > NOISE_PEAK_RATIO && peaks[2].height / top > NOISE_PEAK_RATIO {
            return Some(QualityFlag::NoiseLike);
        }
    }
    if peaks[0].prominence < 1.0 {
        return Some(QualityFlag::WeakSignal);
    }
    None
}

fn estimate_model_params(
    hist: &[f64],
    z_inv: &[f64],
    photon_z_inv: &[f64],
    mut peaks: Vec<PeakInfo>,
    bin: f64,
) -> Estimate {
    let n = hist.len();
    sort_by_prominence(&mut peaks);
    if let Some(flag) = histogram_badness(hist, &peaks, bin) {
        return Estimate::rejected(flag);
    }

    // two comparable peaks with real photon support: the shallower is the surface
    let mut surface_index = 0;
    if peaks.len() >= 2 {
        let (a, b) = (&peaks[0], &peaks[1]);
        if b.height / a.height > TWO_PEAK_HEIGHT_RATIO
            && a.n_photons > TWO_PEAK_MIN_PHOTONS
            && b.n_photons > TWO_PEAK_MIN_PHOTONS
            && b.z_inv < a.z_inv
        {
            surface_index = 1;
        }
    }
    let surface = peaks.remove(surface_index);
    sort_by_area(&mut peaks);

    // background from the band above the surface
    let left_edge = (surface.i as f64 - 3.0 * surface.sigma_est_left_i).floor() as isize;
    let background = if left_edge <= 0 {
        EPSILON
    } else {
        let end = left_edge as usize;
        let start = (left_edge as f64 - BACKGROUND_BAND_M / bin).floor().max(0.0) as usize;
        mean(&hist[start..end]).unwrap_or(0.0) + EPSILON
    };

    let top_i = (0..=surface.i)
        .rev()
        .find(|k| hist[*k] <= 2.0 * background)
        .unwrap_or_else(|| left_edge.max(0) as usize);

    // elbow below the surface peak marks the transition to the water column
    let slope_thresh = -surface.height / (ELBOW_RUN_M / bin);
    let signs: Vec<f64> = hist[surface.i..]
        .windows(2)
        .map(|w| {
            let d = w[1] - w[0] - slope_thresh;
            if d > 0.0 {
                1.0
            } else if d < 0.0 {
                -1.0
            } else {
                0.0
            }
        })
        .collect();
    let Some(change) = signs
        .windows(2)
        .position(|s| s[0] < 0.0 && s[1] != s[0])
        .map(|k| k + 1)
    else {
        return Estimate::rejected(QualityFlag::WeakSignal);
    };
    let transition = (surface.i + change).min(n - 1);
    let right_edge = (transition + 1).min(n - 1);

    let mut params = WaveformParams::empty();
    params.background = background;
    params.column_top = -z_inv[right_edge];
    params.decay_top_z = -surface.z_inv;

    // surface mixture
    let std_single = surface.sigma_est.max(EPSILON);
    let hist_max = hist.iter().fold(0.0f64, |a, b| a.max(*b));
    let single_scaling = hist_max / gaussian_pdf(surface.z_inv, surface.z_inv, std_single);
    params.surf_scaling = single_scaling;
    params.surf_loc_1 = surface.z_inv;
    params.surf_std_1 = std_single;
    params.surf_weight_1 = 1.0;
    params.surf_loc_2 = surface.z_inv;
    params.surf_std_2 = EPSILON;
    params.surf_weight_2 = EPSILON;

    let (lo, hi) = (z_inv[top_i], z_inv[right_edge]);
    let surface_photons: Vec<f64> = photon_z_inv
        .iter()
        .copied()
        .filter(|z| *z > lo && *z < hi)
        .collect();
    let init = GaussianMixture {
        weights: [0.9, 0.1],
        means: [surface.z_inv, surface.z_inv + 1.5 * std_single],
        stds: [std_single, std_single],
    };
    if let Some(gm) = GaussianMixture::fit(&surface_photons, init) {
        if (gm.means[0] - gm.means[1]).abs() <= SURFACE_MODE_SEPARATION_M {
            let density: f64 = z_inv.iter().map(|z| gm.pdf(*z)).sum();
            if density > 0.0 {
                let u = gm.upper_component();
                let l = 1 - u;
                params.surf_scaling = surface_photons.len() as f64 / density;
                params.surf_loc_1 = gm.means[u];
                params.surf_std_1 = gm.stds[u].max(EPSILON);
                params.surf_weight_1 = gm.weights[u];
                params.surf_loc_2 = gm.means[l];
                params.surf_std_2 = gm.stds[l].max(EPSILON);
                params.surf_weight_2 = gm.weights[l].max(EPSILON);
            }
        }
    }

    // bathymetry candidates
    let subsurface: Vec<PeakInfo> = peaks.iter().filter(|p| p.i > surface.i).cloned().collect();
    let mut candidates: Vec<PeakInfo> = subsurface.iter().filter(|p| p.is_symmetric()).cloned().collect();
    if candidates.len() >= 2 {
        let (a, b) = (&candidates[0], &candidates[1]);
        if a.area > 0.0
            && b.area / a.area > BATHY_SWAP_AREA_RATIO
            && b.z_inv - a.z_inv > BATHY_SWAP_DEPTH_M
        {
            candidates.swap(0, 1);
        }
    }
    let bathy_peak = candidates.first().cloned();

    let quality = match &bathy_peak {
        None => QualityFlag::SurfaceOnly,
        Some(b) => {
            let far = candidates[1..].iter().any(|p| (p.z_inv - b.z_inv).abs() > 1.0);
            if far {
                QualityFlag::MultipleBathy
            } else {
                QualityFlag::IsolatedBathy
            }
        }
    };

    // exponential water column decay
    let max_turb_i = ((surface.i as f64 + TURBIDITY_DEPTH_M / bin + 1.0) as usize).min(n);
    let excluded = bathy_peak.as_ref().map(|b| {
        let start = (b.i as f64 - (2.0 * b.sigma_est_left_i).floor() - 1.0).max(0.0) as usize;
        let end = ((b.i as f64 + (2.0 * b.sigma_est_right_i).ceil() + 1.0) as usize).min(n);
        start..end
    });
    let (depths, heights): (Vec<f64>, Vec<f64>) = (transition..max_turb_i)
        .filter(|k| excluded.as_ref().map_or(true, |r| !r.contains(k)))
        .filter(|k| hist[*k] > 0.0 && hist[*k] >= 2.0 * background)
        .map(|k| (z_inv[k] - surface.z_inv, hist[k]))
        .unzip();

    params.decay_param = -EPSILON;
    params.turb_intens = TURBIDITY_FLOOR;
    if depths.len() >= 3 {
        params.turb_intens = TURBIDITY_REJECTED;
        let weights: Vec<f64> = depths
            .iter()
            .zip(&heights)
            .map(|(d, h)| h.sqrt() * (1.0 - d / DECAY_WEIGHT_DEPTH_M).max(0.0))
            .collect();
        let log_h: Vec<f64> = heights.iter().map(|h| h.ln()).collect();
        if let Some((k, b)) = weighted_linear_fit(&depths, &log_h, &weights) {
            let i0 = b.exp();
            let rejected = k >= -EPSILON || k < -1000.0 || i0 > 5.0 * surface.height || i0 < 0.0;
            if !rejected {
                let last_signal = hist.iter().rposition(|v| *v > 0.0).map_or(surface.z_inv, |k| z_inv[k]);
                if let Some(top) = column_intersection(&params, surface.z_inv, last_signal, i0, k) {
                    params.column_top = -top;
                    params.decay_param = k;
                    params.turb_intens = i0;
                }
            }
        }
    }

    if let Some(b) = &bathy_peak {
        // keep the column top between the surface and the seafloor
        if -params.column_top >= b.z_inv {
            params.column_top = -0.5 * (surface.z_inv + b.z_inv);
        }

        params.bathy_mag = b.mag_scaling.max(EPSILON);
        params.bathy_loc = b.z_inv;
        params.bathy_std = b.sigma_est.max(EPSILON);

        let start = (b.i as f64 - (3.0 * b.sigma_est_left_i).ceil()).max(0.0) as usize;
        let end = ((b.i as f64 + (3.0 * b.sigma_est_right_i).ceil() + 1.0) as usize).min(n);
        let (x, y): (Vec<f64>, Vec<f64>) = (start..end)
            .filter(|k| z_inv[*k] >= -params.column_top)
            .map(|k| (z_inv[k], hist[k]))
            .unzip();
        let bounds = Bounds {
            lower: [EPSILON, -params.column_top, EPSILON],
            upper: [3.0 * params.bathy_mag, z_inv[n - 1], 3.0],
        };
        match fit_gaussian(&x, &y, [params.bathy_mag, params.bathy_loc, params.bathy_std], bounds) {
            Some([mag, loc, std]) => {
                params.bathy_mag = mag;
                params.bathy_loc = loc;
                params.bathy_std = std;
            }
            None => log::trace!("Bathy refit failed, keeping peak estimates"),
        }
    }

    let subsurface_peaks = match &bathy_peak {
        Some(b) => subsurface.into_iter().filter(|p| p.i != b.i).collect(),
        None => subsurface,
    };

    Estimate {
        params,
        quality,
        bathy_peak,
        subsurface_peaks,
    }
}

/// First crossing of the smoothed surface and the decay curve within
/// `MAX_COLUMN_TOP_DEPTH_M` of the surface, in `z_inv`
fn column_intersection(
    params: &WaveformParams,
    surface_z_inv: f64,
    last_signal: f64,
    i0: f64,
    k: f64,
) -> Option<f64> {
    let span = (last_signal - surface_z_inv).min(MAX_COLUMN_TOP_DEPTH_M);
    if span <= 0.0 {
        return None;
    }
    let steps = (span / INTERSECTION_STEP_M) as usize;
    let diff = |depth: f64| {
        let (s1, s2) = params.surface_parts(surface_z_inv + depth);
        s1 + s2 - i0 * (k * depth).exp()
    };
    let mut previous = diff(0.0).signum();
    for step in 1..=steps {
        let depth = step as f64 * INTERSECTION_STEP_M;
        let sign = diff(depth).signum();
        if sign != previous {
            return Some(surface_z_inv + depth);
        }
        previous = sign;
    }
    None
}

/// Decide whether the modeled bathymetry peak is real
fn bathy_quality_check(
    grid: &ModelGrid,
    params: &WaveformParams,
    bathy_peak: &PeakInfo,
    subsurface_peaks: &[PeakInfo],
) -> BathyTests {
    let column_background: Vec<f64> = grid
        .column
        .iter()
        .zip(grid.background.iter())
        .map(|(c, b)| c.max(*b))
        .collect();
    let remainder: Vec<f64> = grid
        .bathymetry
        .iter()
        .zip(&column_background)
        .map(|(b, cb)| (b - cb).max(0.0))
        .collect();

    let bathy_total: f64 = grid.bathymetry.sum();
    let area_ratio = if bathy_total > 0.0 {
        remainder.iter().sum::<f64>() / bathy_total
    } else {
        0.0
    };

    let peak_height = grid.bathymetry.iter().fold(0.0f64, |a, b| a.max(*b));

    let prominence_ratio = match (
        remainder.iter().position(|r| *r != 0.0),
        remainder.iter().rposition(|r| *r != 0.0),
    ) {
        (Some(top), Some(bottom)) => {
            let floor = column_background[top].max(column_background[bottom]);
            (peak_height - floor) / floor
        }
        _ => 0.0,
    };

    let neighbors: Vec<&PeakInfo> = {
        let near: Vec<&PeakInfo> = subsurface_peaks
            .iter()
            .filter(|p| (p.z_inv - params.bathy_loc).abs() < NEIGHBOR_PEAK_RANGE_M)
            .collect();
        if near.is_empty() {
            subsurface_peaks.iter().collect()
        } else {
            near
        }
    };

    let prominences: Vec<f64> = neighbors.iter().map(|p| p.prominence).collect();
    let column_at_loc = interp(
        params.bathy_loc,
        grid.z_inv.as_slice().unwrap_or(&[]),
        grid.column.as_slice().unwrap_or(&[]),
    );
    let column_at_loc = if column_at_loc.is_finite() { column_at_loc } else { 0.0 };
    let min_height = column_at_loc.max(params.background) + mean_plus_three_sigma(&prominences);

    let mut counts: Vec<f64> = neighbors.iter().map(|p| p.n_photons as f64).collect();
    counts.sort_by(|a, b| b.total_cmp(a));
    counts.truncate(5);
    let min_n_photons = mean_plus_three_sigma(&counts);

    let ok_area = area_ratio >= MIN_BATHY_FRACTION;
    let ok_prominence = prominence_ratio >= MIN_BATHY_FRACTION;
    let ok_height = peak_height > min_height;
    let ok_magnitude = peak_height >= MIN_BATHY_HEIGHT;
    let ok_photons = bathy_peak.n_photons as f64 > min_n_photons;

    BathyTests {
        area_ratio,
        prominence_ratio,
        peak_height,
        min_height,
        n_photons: bathy_peak.n_photons,
        min_n_photons,
        ok_area,
        ok_prominence,
        ok_height,
        ok_magnitude,
        ok_photons,
        passed: ok_area && ok_prominence && ok_height && ok_magnitude && ok_photons,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> WaveformConfig {
        WaveformConfig {
            range_z: [-50.0, 30.0],
            res_z: 0.2,
        }
    }

    /// `n` evenly spaced heights over `[lo, hi]`
    fn spread(lo: f64, hi: f64, n: usize) -> Vec<f64> {
        (0..n).map(|i| lo + (hi - lo) * (i as f64 + 0.5) / n as f64).collect()
    }

    #[test]
    fn test_empty_window_is_insufficient() {
        let wf = Waveform::new(&[], &config(), BeamStrength::Strong);
        assert_eq!(wf.quality_flag, QualityFlag::InsufficientData);
        assert_eq!(wf.params, WaveformParams::empty());
        assert!(wf.classification.is_empty());
    }

    #[test]
    fn test_pure_surface_labels_surface() {
        let heights = spread(-0.2, 0.2, 1000);
        let wf = Waveform::new(&heights, &config(), BeamStrength::Strong);

        assert!(wf.quality_flag.is_modeled(), "flag {:?}", wf.quality_flag);
        assert!(!wf.has_bathy());
        assert!(wf
            .classification
            .iter()
            .all(|c| *c == WaveformClass::Surface));
        assert!(wf.weight_bathymetry.iter().all(|w| *w == 0.0));
        assert!(wf.weight_surface.iter().any(|w| *w > 0.5));
        // surface lies within the modeled mixture
        assert!(wf.params.surf_loc_1.abs() < 0.3);
    }

    #[test]
    fn test_uniform_noise_is_rejected() {
        let heights: Vec<f64> = (0..500).map(|i| -50.0 + 0.05 + 0.16 * i as f64).collect();
        let wf = Waveform::new(&heights, &config(), BeamStrength::Strong);

        assert_eq!(wf.quality_flag, QualityFlag::NoiseLike);
        assert!(wf
            .classification
            .iter()
            .all(|c| *c == WaveformClass::Background));
        assert!(wf.subsurface_flag.iter().all(|f| !f));
        assert!(wf.weight_surface.iter().all(|w| *w == 0.0));

        // the placeholder model must not claim photons at the sea surface
        let near_zero: Vec<usize> = (0..heights.len()).filter(|i| heights[*i].abs() < 0.15).collect();
        assert!(!near_zero.is_empty());
        for i in near_zero {
            assert_eq!(wf.classification[i], WaveformClass::Background, "photon at {}", heights[i]);
        }
    }

    #[test]
    fn test_deep_bathy_peak_is_accepted() {
        let mut heights = spread(-0.15, 0.15, 400);
        let bathy = spread(-18.3, -17.7, 200);
        let weak = spread(-4.1, -3.9, 20);
        heights.extend(&bathy);
        heights.extend(&weak);

        let wf = Waveform::new(&heights, &config(), BeamStrength::Strong);
        assert!(wf.has_bathy(), "flag {:?} tests {:?}", wf.quality_flag, wf.bathy_tests);
        assert!((wf.params.bathy_loc - 18.0).abs() < 0.3);
        assert!(wf.bathy_tests.as_ref().map_or(false, |t| t.passed));

        let labels = &wf.classification;
        let deep_bathy = (400..600).filter(|i| labels[*i] == WaveformClass::Bathymetry).count();
        assert!(deep_bathy >= 150, "only {} deep photons labeled bathy", deep_bathy);
        assert!((600..620).all(|i| labels[i] != WaveformClass::Bathymetry));
        let surface = (0..400).filter(|i| labels[*i] == WaveformClass::Surface).count();
        assert!(surface >= 350, "only {} surface photons", surface);

        // column top lies between surface and seafloor
        let top = -wf.params.column_top;
        assert!(top > wf.params.surf_loc_1 && top < wf.params.bathy_loc);
    }

    #[test]
    fn test_gate_no_surface_photons() {
        let mut labels = vec![WaveformClass::Surface, WaveformClass::Column, WaveformClass::Bathymetry];
        let flag = apply_label_gates(&mut labels, true, 5.0, BeamStrength::Strong);
        assert_eq!(flag, Some(QualityFlag::NoSurfacePhotons));
        assert!(labels.iter().all(|l| *l == WaveformClass::Background));
    }

    #[test]
    fn test_gate_too_few_bathy_photons() {
        let mut labels = vec![WaveformClass::Surface; 10];
        labels.extend(vec![WaveformClass::Bathymetry; 4]);
        let flag = apply_label_gates(&mut labels, true, 5.0, BeamStrength::Strong);
        assert_eq!(flag, Some(QualityFlag::BathyRemoved));
        assert_eq!(labels[12], WaveformClass::Background);

        let mut labels = vec![WaveformClass::Surface; 10];
        labels.push(WaveformClass::Column);
        labels.extend(vec![WaveformClass::Bathymetry; 4]);
        apply_label_gates(&mut labels, true, 5.0, BeamStrength::Strong);
        assert_eq!(labels[14], WaveformClass::Column);
    }

    #[test]
    fn test_gate_shallow_bathy_becomes_surface() {
        // 12 bathy photons half a metre down: too few for a strong beam
        let mut labels = vec![WaveformClass::Surface; 30];
        labels.extend(vec![WaveformClass::Bathymetry; 12]);
        let flag = apply_label_gates(&mut labels, true, 0.5, BeamStrength::Strong);
        assert_eq!(flag, Some(QualityFlag::ShallowBathyRemoved));
        assert!(labels.iter().all(|l| *l == WaveformClass::Surface));

        // weak beams need 10
        let mut labels = vec![WaveformClass::Surface; 30];
        labels.extend(vec![WaveformClass::Bathymetry; 8]);
        let flag = apply_label_gates(&mut labels, true, 0.5, BeamStrength::Weak);
        assert_eq!(flag, Some(QualityFlag::ShallowBathyRemoved));

        let mut labels = vec![WaveformClass::Surface; 30];
        labels.extend(vec![WaveformClass::Bathymetry; 12]);
        assert_eq!(apply_label_gates(&mut labels, true, 0.5, BeamStrength::Weak), None);
        assert_eq!(apply_label_gates(&mut labels, true, 3.0, BeamStrength::Strong), None);
    }

    #[test]
    fn test_labeling_tie_order_and_zero_model() {
        let params = WaveformParams::empty();
        // background dominates the empty model
        assert_eq!(label_photon(&params, 3.0, false), WaveformClass::Background);

        let mut params = WaveformParams::empty();
        params.background = 0.0;
        params.turb_intens = 0.0;
        assert_eq!(label_photon(&params, 100.0, false), WaveformClass::Background);
    }

    fn layered_params() -> WaveformParams {
        let mut params = WaveformParams::empty();
        params.surf_scaling = 10.0;
        params.surf_loc_1 = 0.0;
        params.surf_std_1 = 0.2;
        params.decay_top_z = 0.0;
        params.decay_param = -0.1;
        params.turb_intens = 5.0;
        params.column_top = -1.0;
        params.background = 0.5;
        params.bathy_mag = 50.0;
        params.bathy_loc = 10.0;
        params.bathy_std = 0.3;
        params
    }

    #[test]
    fn test_each_component_labels_its_own_class() {
        let params = layered_params();
        let cases = [
            (0.0, WaveformClass::Surface),
            (3.0, WaveformClass::Column),
            (10.0, WaveformClass::Bathymetry),
            (-5.0, WaveformClass::Background),
        ];
        for (z_inv, expected) in cases {
            let values = params.components(z_inv);
            let winner = (0..4).fold(0, |best, k| if values[k] > values[best] { k } else { best });
            assert_eq!(winner, expected.index(), "z_inv {}: {:?}", z_inv, values);
            assert_eq!(label_photon(&params, z_inv, true), expected, "z_inv {}", z_inv);
        }
        assert_eq!(WaveformClass::Surface.photon_class(), crate::types::SEA_SURFACE);
        assert_eq!(WaveformClass::Bathymetry.photon_class(), crate::types::BATHYMETRY);
    }

    #[test]
    fn test_no_surface_below_column_top() {
        let mut params = layered_params();
        params.turb_intens = 0.01;
        params.column_top = -0.1;
        // the surface term still dominates here, but the photon is below the column top
        let (s1, s2) = params.surface_parts(0.2);
        assert!(s1 + s2 > params.column(0.2) && s1 + s2 > params.background);
        assert_eq!(label_photon(&params, 0.2, false), WaveformClass::Background);
        assert_eq!(label_photon(&params, 0.05, false), WaveformClass::Surface);
    }

    #[test]
    fn test_surface_photons_stay_above_column_top() {
        let mut heights = spread(-0.15, 0.15, 400);
        heights.extend(spread(-18.3, -17.7, 200));
        heights.extend(spread(-4.1, -3.9, 20));
        let wf = Waveform::new(&heights, &config(), BeamStrength::Strong);
        assert!(wf.quality_flag.is_modeled(), "flag {:?}", wf.quality_flag);
        for (h, class) in heights.iter().zip(&wf.classification) {
            if *class == WaveformClass::Surface {
                assert!(*h >= wf.params.column_top, "surface photon at {} below {}", h, wf.params.column_top);
            }
        }
    }

    #[test]
    fn test_column_below_bathy_becomes_background() {
        let mut params = WaveformParams::empty();
        params.decay_top_z = 0.0;
        params.decay_param = -0.01;
        params.turb_intens = 5.0;
        params.column_top = -0.5;
        params.bathy_mag = 1.0;
        params.bathy_loc = 10.0;
        params.bathy_std = 0.2;
        assert_eq!(label_photon(&params, 5.0, true), WaveformClass::Column);
        assert_eq!(label_photon(&params, 14.0, true), WaveformClass::Background);
        assert_eq!(label_photon(&params, 14.0, false), WaveformClass::Column);
    }
}

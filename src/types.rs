use arrow::array::ArrayRef;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::str::FromStr;

/// Photon class taxonomy shared by every classifier label column
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(i8)]
pub enum PhotonClass {
    Unclassified = 0,
    Other = 1,
    Bathymetry = 40,
    SeaSurface = 41,
}

impl PhotonClass {
    pub const fn code(self) -> i8 {
        self as i8
    }

    pub fn from_code(code: i8) -> Option<Self> {
        match code {
            0 => Some(PhotonClass::Unclassified),
            1 => Some(PhotonClass::Other),
            40 => Some(PhotonClass::Bathymetry),
            41 => Some(PhotonClass::SeaSurface),
            _ => None,
        }
    }
}

/// Class codes as stored in label columns
pub const UNCLASSIFIED: i8 = PhotonClass::Unclassified.code();
pub const BATHYMETRY: i8 = PhotonClass::Bathymetry.code();
pub const SEA_SURFACE: i8 = PhotonClass::SeaSurface.code();

/// ICESat-2 ground track identifiers
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Beam {
    Gt1l,
    Gt1r,
    Gt2l,
    Gt2r,
    Gt3l,
    Gt3r,
}

impl Beam {
    /// All beams in output order
    pub const ALL: [Beam; 6] = [Beam::Gt1l, Beam::Gt1r, Beam::Gt2l, Beam::Gt2r, Beam::Gt3l, Beam::Gt3r];

    pub fn name(self) -> &'static str {
        match self {
            Beam::Gt1l => "gt1l",
            Beam::Gt1r => "gt1r",
            Beam::Gt2l => "gt2l",
            Beam::Gt2r => "gt2r",
            Beam::Gt3l => "gt3l",
            Beam::Gt3r => "gt3r",
        }
    }
}

impl std::fmt::Display for Beam {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl FromStr for Beam {
    type Err = BathyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Beam::ALL
            .iter()
            .copied()
            .find(|beam| beam.name().eq_ignore_ascii_case(s))
            .ok_or_else(|| BathyError::InvalidInput(format!("Unknown beam: {}", s)))
    }
}

/// Transmit energy of a beam
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BeamStrength {
    Strong,
    Weak,
}

impl BeamStrength {
    /// Spots 1, 3 and 5 are strong; 2, 4 and 6 weak
    pub fn from_spot(spot: u8) -> Self {
        if spot % 2 == 1 {
            BeamStrength::Strong
        } else {
            BeamStrength::Weak
        }
    }
}

/// Per-beam metadata blob stored as `meta` in the input Parquet file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BeamMeta {
    pub spot: u8,
    pub beam_strength: BeamStrength,
    pub beam: Beam,
}

/// Every classifier that can contribute a label column
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClassifierKind {
    Qtrees,
    Coastnet,
    OpenOceansPP,
    MedianFilter,
    CShelph,
    BathyPathFinder,
    PointNet,
    OpenOceans,
    Ensemble,
}

impl ClassifierKind {
    /// Column order of the packed `predictions` array
    pub const PREDICTION_ORDER: [ClassifierKind; 9] = [
        ClassifierKind::Qtrees,
        ClassifierKind::Coastnet,
        ClassifierKind::OpenOceansPP,
        ClassifierKind::MedianFilter,
        ClassifierKind::CShelph,
        ClassifierKind::BathyPathFinder,
        ClassifierKind::PointNet,
        ClassifierKind::OpenOceans,
        ClassifierKind::Ensemble,
    ];

    pub fn name(self) -> &'static str {
        match self {
            ClassifierKind::Qtrees => "qtrees",
            ClassifierKind::Coastnet => "coastnet",
            ClassifierKind::OpenOceansPP => "openoceanspp",
            ClassifierKind::MedianFilter => "medianfilter",
            ClassifierKind::CShelph => "cshelph",
            ClassifierKind::BathyPathFinder => "bathypathfinder",
            ClassifierKind::PointNet => "pointnet",
            ClassifierKind::OpenOceans => "openoceans",
            ClassifierKind::Ensemble => "ensemble",
        }
    }

    /// Bit of `processing_flags` raised where this classifier reports bathymetry
    pub fn flag_bit(self) -> Option<u32> {
        match self {
            ClassifierKind::Qtrees => Some(24),
            ClassifierKind::Coastnet => Some(25),
            ClassifierKind::OpenOceansPP => Some(26),
            ClassifierKind::MedianFilter => Some(27),
            ClassifierKind::CShelph => Some(28),
            ClassifierKind::BathyPathFinder => Some(29),
            ClassifierKind::PointNet => Some(30),
            ClassifierKind::OpenOceans | ClassifierKind::Ensemble => None,
        }
    }
}

impl std::fmt::Display for ClassifierKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl FromStr for ClassifierKind {
    type Err = BathyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ClassifierKind::PREDICTION_ORDER
            .iter()
            .copied()
            .find(|kind| kind.name() == s)
            .ok_or_else(|| BathyError::InvalidInput(format!("Unknown classifier: {}", s)))
    }
}

/// Identity of the beam a frame belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BeamInfo {
    pub beam: Beam,
    pub spot: u8,
    pub strength: BeamStrength,
}

impl From<&BeamMeta> for BeamInfo {
    fn from(meta: &BeamMeta) -> Self {
        Self {
            beam: meta.beam,
            spot: meta.spot,
            strength: meta.beam_strength,
        }
    }
}

/// Columnar photon table for one beam (or a whole granule after merge)
#[derive(Debug, Clone, Default)]
pub struct PhotonFrame {
    pub index_ph: Vec<i64>,
    pub index_seg: Vec<i32>,
    pub time_ns: Vec<i64>,                 // GPS time, nanoseconds
    pub lat_ph: Vec<f64>,
    pub lon_ph: Vec<f64>,
    pub x_atc: Vec<f64>,
    pub y_atc: Vec<f64>,
    pub x_ph: Vec<f64>,                    // dataset-wide along-track distance
    pub ellipse_h: Vec<f64>,
    pub ortho_h: Vec<f64>,
    pub surface_h: Vec<f64>,
    pub refracted_dz: Vec<f64>,
    pub refracted_lat: Vec<f64>,
    pub refracted_lon: Vec<f64>,
    pub subaqueous_sigma_thu: Vec<f64>,
    pub subaqueous_sigma_tvu: Vec<f64>,
    pub sigma_thu: Vec<f64>,
    pub sigma_tvu: Vec<f64>,
    pub max_signal_conf: Vec<i8>,
    pub processing_flags: Vec<u32>,
    pub class_ph: Vec<i8>,
    pub spot: Vec<u8>,
    /// Label columns keyed by the classifier that produced them
    pub labels: BTreeMap<ClassifierKind, Vec<i8>>,
    /// Ensemble bathymetry probability
    pub confidence: Option<Vec<f64>>,
    /// Input columns carried through to the output unchanged
    pub passthrough: Vec<(String, ArrayRef)>,
    /// Set once the subaqueous refraction correction has been applied
    pub subaqueous_corrected: bool,
}

impl PhotonFrame {
    /// Zero-filled frame of `n` photons with sequential `index_ph`
    pub fn blank(n: usize, spot: u8) -> Self {
        Self {
            index_ph: (0..n as i64).collect(),
            index_seg: vec![0; n],
            time_ns: vec![0; n],
            lat_ph: vec![0.0; n],
            lon_ph: vec![0.0; n],
            x_atc: vec![0.0; n],
            y_atc: vec![0.0; n],
            x_ph: vec![0.0; n],
            ellipse_h: vec![0.0; n],
            ortho_h: vec![0.0; n],
            surface_h: vec![0.0; n],
            refracted_dz: vec![0.0; n],
            refracted_lat: vec![0.0; n],
            refracted_lon: vec![0.0; n],
            subaqueous_sigma_thu: vec![0.0; n],
            subaqueous_sigma_tvu: vec![0.0; n],
            sigma_thu: vec![0.0; n],
            sigma_tvu: vec![0.0; n],
            max_signal_conf: vec![0; n],
            processing_flags: vec![0; n],
            class_ph: vec![UNCLASSIFIED; n],
            spot: vec![spot; n],
            labels: BTreeMap::new(),
            confidence: None,
            passthrough: Vec::new(),
            subaqueous_corrected: false,
        }
    }

    pub fn len(&self) -> usize {
        self.index_ph.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index_ph.is_empty()
    }

    pub fn label(&self, kind: ClassifierKind) -> Option<&[i8]> {
        self.labels.get(&kind).map(|v| v.as_slice())
    }

    /// Attach a label column, checking its length and class codes
    pub fn set_label(&mut self, kind: ClassifierKind, column: Vec<i8>) -> BathyResult<()> {
        if column.len() != self.len() {
            return Err(BathyError::Processing(format!(
                "{} produced {} labels for {} photons",
                kind,
                column.len(),
                self.len()
            )));
        }
        if let Some(bad) = column.iter().find(|c| PhotonClass::from_code(**c).is_none()) {
            return Err(BathyError::Processing(format!(
                "{} produced invalid class code {}",
                kind, bad
            )));
        }
        self.labels.insert(kind, column);
        Ok(())
    }

    /// Verify every column has the photon count of `index_ph`
    pub fn check_lengths(&self) -> BathyResult<()> {
        let n = self.len();
        let lengths = [
            ("index_seg", self.index_seg.len()),
            ("time_ns", self.time_ns.len()),
            ("lat_ph", self.lat_ph.len()),
            ("lon_ph", self.lon_ph.len()),
            ("x_atc", self.x_atc.len()),
            ("y_atc", self.y_atc.len()),
            ("x_ph", self.x_ph.len()),
            ("ellipse_h", self.ellipse_h.len()),
            ("ortho_h", self.ortho_h.len()),
            ("surface_h", self.surface_h.len()),
            ("refracted_dZ", self.refracted_dz.len()),
            ("refracted_lat", self.refracted_lat.len()),
            ("refracted_lon", self.refracted_lon.len()),
            ("subaqueous_sigma_thu", self.subaqueous_sigma_thu.len()),
            ("subaqueous_sigma_tvu", self.subaqueous_sigma_tvu.len()),
            ("sigma_thu", self.sigma_thu.len()),
            ("sigma_tvu", self.sigma_tvu.len()),
            ("max_signal_conf", self.max_signal_conf.len()),
            ("processing_flags", self.processing_flags.len()),
            ("class_ph", self.class_ph.len()),
            ("spot", self.spot.len()),
        ];
        for (name, len) in lengths {
            if len != n {
                return Err(BathyError::Processing(format!(
                    "Column {} has {} rows, expected {}",
                    name, len, n
                )));
            }
        }
        for (name, array) in &self.passthrough {
            if array.len() != n {
                return Err(BathyError::Processing(format!(
                    "Column {} has {} rows, expected {}",
                    name,
                    array.len(),
                    n
                )));
            }
        }
        Ok(())
    }

    /// Stack frames vertically in the given order
    pub fn concat(frames: Vec<PhotonFrame>) -> BathyResult<PhotonFrame> {
        let total: usize = frames.iter().map(|f| f.len()).sum();
        let mut merged = PhotonFrame::blank(0, 0);
        if frames.is_empty() {
            return Ok(merged);
        }

        let label_kinds: Vec<ClassifierKind> = frames
            .iter()
            .flat_map(|f| f.labels.keys().copied())
            .collect::<std::collections::BTreeSet<_>>()
            .into_iter()
            .collect();
        let any_confidence = frames.iter().any(|f| f.confidence.is_some());
        let passthrough_names: Vec<String> = frames[0]
            .passthrough
            .iter()
            .map(|(name, _)| name.clone())
            .filter(|name| {
                let everywhere = frames
                    .iter()
                    .all(|f| f.passthrough.iter().any(|(other, _)| other == name));
                if !everywhere {
                    log::warn!("Dropping column {} missing from some beams", name);
                }
                everywhere
            })
            .collect();

        for kind in &label_kinds {
            merged.labels.insert(*kind, Vec::with_capacity(total));
        }
        if any_confidence {
            merged.confidence = Some(Vec::with_capacity(total));
        }
        merged.subaqueous_corrected = frames.iter().any(|f| f.subaqueous_corrected);

        let mut passthrough_parts: Vec<Vec<ArrayRef>> = vec![Vec::new(); passthrough_names.len()];

        for frame in frames {
            let n = frame.len();
            merged.index_ph.extend(frame.index_ph);
            merged.index_seg.extend(frame.index_seg);
            merged.time_ns.extend(frame.time_ns);
            merged.lat_ph.extend(frame.lat_ph);
            merged.lon_ph.extend(frame.lon_ph);
            merged.x_atc.extend(frame.x_atc);
            merged.y_atc.extend(frame.y_atc);
            merged.x_ph.extend(frame.x_ph);
            merged.ellipse_h.extend(frame.ellipse_h);
            merged.ortho_h.extend(frame.ortho_h);
            merged.surface_h.extend(frame.surface_h);
            merged.refracted_dz.extend(frame.refracted_dz);
            merged.refracted_lat.extend(frame.refracted_lat);
            merged.refracted_lon.extend(frame.refracted_lon);
            merged.subaqueous_sigma_thu.extend(frame.subaqueous_sigma_thu);
            merged.subaqueous_sigma_tvu.extend(frame.subaqueous_sigma_tvu);
            merged.sigma_thu.extend(frame.sigma_thu);
            merged.sigma_tvu.extend(frame.sigma_tvu);
            merged.max_signal_conf.extend(frame.max_signal_conf);
            merged.processing_flags.extend(frame.processing_flags);
            merged.class_ph.extend(frame.class_ph);
            merged.spot.extend(frame.spot);

            for kind in &label_kinds {
                let target = merged.labels.entry(*kind).or_default();
                match frame.labels.get(kind) {
                    Some(column) => target.extend_from_slice(column),
                    None => {
                        log::warn!("Label column {} missing for a beam, filling with 0", kind);
                        target.extend(std::iter::repeat(UNCLASSIFIED).take(n));
                    }
                }
            }
            if let Some(target) = merged.confidence.as_mut() {
                match &frame.confidence {
                    Some(conf) => target.extend_from_slice(conf),
                    None => target.extend(std::iter::repeat(0.0).take(n)),
                }
            }
            for (slot, name) in passthrough_parts.iter_mut().zip(&passthrough_names) {
                if let Some((_, array)) = frame.passthrough.iter().find(|(other, _)| other == name) {
                    slot.push(array.clone());
                }
            }
        }

        for (name, parts) in passthrough_names.into_iter().zip(passthrough_parts) {
            let refs: Vec<&dyn arrow::array::Array> = parts.iter().map(|a| a.as_ref()).collect();
            match arrow::compute::concat(&refs) {
                Ok(array) => merged.passthrough.push((name, array)),
                Err(e) => log::warn!("Dropping column {}: {}", name, e),
            }
        }

        merged.check_lengths()?;
        Ok(merged)
    }
}

/// Error types for bathymetry processing
#[derive(Debug, thiserror::Error)]
pub enum BathyError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Arrow error: {0}")]
    Arrow(#[from] arrow::error::ArrowError),

    #[error("Parquet error: {0}")]
    Parquet(#[from] parquet::errors::ParquetError),

    #[cfg(feature = "hdf5")]
    #[error("HDF5 error: {0}")]
    Hdf5(#[from] hdf5::Error),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Missing column '{column}' in {file}")]
    MissingColumn { column: String, file: String },

    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("Unsupported output format: {0}")]
    UnsupportedFormat(String),

    #[error("Classifier {classifier} failed on {beam}: {message}")]
    Classifier {
        classifier: ClassifierKind,
        beam: Beam,
        message: String,
    },

    #[error("Processing error: {0}")]
    Processing(String),

    #[error("Thread pool error: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),
}

/// Result type for bathymetry operations
pub type BathyResult<T> = Result<T, BathyError>;

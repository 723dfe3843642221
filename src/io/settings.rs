//! Run descriptor
//!
//! The JSON document naming the per-beam inputs, the output file and the
//! parameter block of every classifier.

use crate::core::cshelph::CShelphParams;
use crate::core::ensemble::EnsembleParams;
use crate::core::external::{BathyPathFinderParams, PointNetParams};
use crate::core::median_filter::MedianFilterParams;
use crate::core::model_driver::OpenOceansParams;
use crate::types::{BathyError, BathyResult, Beam, ClassifierKind};
use serde::Deserialize;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Output container
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Parquet,
    Hdf5,
}

impl FromStr for OutputFormat {
    type Err = BathyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "parquet" => Ok(OutputFormat::Parquet),
            "hdf5" | "h5" => Ok(OutputFormat::Hdf5),
            other => Err(BathyError::UnsupportedFormat(other.to_string())),
        }
    }
}

#[derive(Deserialize)]
struct RawSettings {
    filename: PathBuf,
    #[serde(default)]
    format: Option<String>,
    #[serde(default)]
    granule: Option<PathBuf>,
    #[serde(default)]
    classifiers: Option<Vec<ClassifierKind>>,
    #[serde(default)]
    cshelph: CShelphParams,
    #[serde(default)]
    medianfilter: MedianFilterParams,
    #[serde(default)]
    bathypathfinder: BathyPathFinderParams,
    #[serde(default)]
    pointnet: PointNetParams,
    #[serde(default)]
    openoceans: OpenOceansParams,
    #[serde(default)]
    ensemble: EnsembleParams,
    #[serde(default)]
    profile: Map<String, Value>,
    #[serde(default)]
    latch: Option<f64>,
    #[serde(flatten)]
    rest: BTreeMap<String, Value>,
}

/// Parsed run descriptor; immutable once loaded
#[derive(Debug, Clone)]
pub struct RunSettings {
    pub filename: PathBuf,
    pub format: OutputFormat,
    pub granule: Option<PathBuf>,
    /// Input Parquet file per beam, only for beams with data
    pub beams: BTreeMap<Beam, PathBuf>,
    /// Overrides the classifier list of the request metadata
    pub classifiers: Option<Vec<ClassifierKind>>,
    pub cshelph: CShelphParams,
    pub medianfilter: MedianFilterParams,
    pub bathypathfinder: BathyPathFinderParams,
    pub pointnet: PointNetParams,
    pub openoceans: OpenOceansParams,
    pub ensemble: EnsembleParams,
    pub profile: Map<String, Value>,
    pub latch: Option<f64>,
}

impl RunSettings {
    pub fn load<P: AsRef<Path>>(path: P) -> BathyResult<Self> {
        let path = path.as_ref();
        log::info!("Reading run settings from: {}", path.display());
        let text = std::fs::read_to_string(path)?;
        Self::from_json(&text)
    }

    pub fn from_json(text: &str) -> BathyResult<Self> {
        let raw: RawSettings = serde_json::from_str(text)
            .map_err(|e| BathyError::InvalidInput(format!("Bad run settings: {}", e)))?;

        let format = raw
            .format
            .as_deref()
            .unwrap_or("parquet")
            .parse::<OutputFormat>()?;
        if format == OutputFormat::Hdf5 {
            if !cfg!(feature = "hdf5") {
                return Err(BathyError::UnsupportedFormat(
                    "hdf5 output requires the `hdf5` feature".to_string(),
                ));
            }
            if raw.granule.is_none() {
                return Err(BathyError::InvalidInput(
                    "hdf5 output requires a granule info file".to_string(),
                ));
            }
        }

        let mut beams = BTreeMap::new();
        for (key, value) in raw.rest {
            match key.parse::<Beam>() {
                Ok(beam) => {
                    let path = value.as_str().ok_or_else(|| {
                        BathyError::InvalidInput(format!("Beam {} must name a file", key))
                    })?;
                    beams.insert(beam, PathBuf::from(path));
                }
                Err(_) => log::debug!("Ignoring run setting: {}", key),
            }
        }
        if beams.is_empty() {
            log::warn!("Run settings name no beam inputs");
        }

        let settings = Self {
            filename: raw.filename,
            format,
            granule: raw.granule,
            beams,
            classifiers: raw.classifiers,
            cshelph: raw.cshelph,
            medianfilter: raw.medianfilter,
            bathypathfinder: raw.bathypathfinder,
            pointnet: raw.pointnet,
            openoceans: raw.openoceans,
            ensemble: raw.ensemble,
            profile: raw.profile,
            latch: raw.latch,
        };
        settings.validate()?;
        Ok(settings)
    }

    /// Reject parameter values no classifier can run with
    pub fn validate(&self) -> BathyResult<()> {
        self.cshelph.validate()?;
        self.medianfilter.validate()?;
        self.openoceans.validate()?;
        Ok(())
    }

    /// Classifiers to run: the descriptor's list, else the request's
    /// `classifiers`, else every stage
    pub fn enabled_classifiers(&self, sliderule: Option<&Value>) -> Vec<ClassifierKind> {
        if let Some(list) = &self.classifiers {
            return list.clone();
        }
        let requested = sliderule
            .and_then(|blob| blob.get("classifiers"))
            .and_then(Value::as_array)
            .map(|names| {
                names
                    .iter()
                    .filter_map(Value::as_str)
                    .filter_map(|name| match name.parse::<ClassifierKind>() {
                        Ok(kind) => Some(kind),
                        Err(_) => {
                            log::warn!("Ignoring unknown classifier in request: {}", name);
                            None
                        }
                    })
                    .collect::<Vec<_>>()
            });
        requested.unwrap_or_else(|| ClassifierKind::PREDICTION_ORDER.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_descriptor_with_beams_and_blocks() {
        let json = r#"{
            "filename": "/tmp/out.parquet",
            "format": "parquet",
            "gt1l": "/tmp/gt1l.parquet",
            "gt3r": "/tmp/gt3r.parquet",
            "medianfilter": {"kdiff": 0.75, "kstd": 1.75},
            "openoceans": {"res_along_track": 20.0},
            "pointnet": {"maxElev": 8.0},
            "profile": {"atl03_duration": 3.2},
            "latch": 1700000000.5,
            "bounding_polygon": {"lat": [], "lon": []}
        }"#;
        let settings = RunSettings::from_json(json).unwrap();
        assert_eq!(settings.format, OutputFormat::Parquet);
        assert_eq!(settings.beams.len(), 2);
        assert_eq!(settings.beams[&Beam::Gt3r], PathBuf::from("/tmp/gt3r.parquet"));
        assert_eq!(settings.medianfilter.kdiff, 0.75);
        assert_eq!(settings.medianfilter.min_photons, 14);
        assert_eq!(settings.openoceans.res_along_track, 20.0);
        assert_eq!(settings.pointnet.max_elev, 8.0);
        assert_eq!(settings.latch, Some(1700000000.5));
        assert!(settings.profile.contains_key("atl03_duration"));
        assert!(settings.ensemble.ensemble_model_filename.is_none());
    }

    #[test]
    fn test_unknown_block_keys_rejected() {
        let json = r#"{"filename": "out.parquet", "cshelph": {"h_res": 0.5, "bogus_key": 1}}"#;
        assert!(matches!(
            RunSettings::from_json(json),
            Err(BathyError::InvalidInput(_))
        ));
    }

    #[test]
    fn test_cshelph_surface_buffer_is_accepted() {
        let json = r#"{"filename": "out.parquet", "format": "parquet", "cshelph": {"surface_buffer": -1.5}}"#;
        let settings = RunSettings::from_json(json).unwrap();
        assert_eq!(settings.cshelph.surface_buffer, -1.5);
        assert_eq!(settings.cshelph.h_res, 0.5);
        assert_eq!(CShelphParams::default().surface_buffer, -0.5);
    }

    #[test]
    fn test_unsupported_format() {
        let json = r#"{"filename": "out.csv", "format": "csv"}"#;
        assert!(matches!(
            RunSettings::from_json(json),
            Err(BathyError::UnsupportedFormat(_))
        ));
    }

    #[cfg(not(feature = "hdf5"))]
    #[test]
    fn test_hdf5_without_feature_fails_early() {
        let json = r#"{"filename": "out.h5", "format": "h5", "granule": "g.json"}"#;
        assert!(matches!(
            RunSettings::from_json(json),
            Err(BathyError::UnsupportedFormat(_))
        ));
    }

    #[test]
    fn test_invalid_parameter_values() {
        let json = r#"{"filename": "out.parquet", "openoceans": {"window_size": 4}}"#;
        assert!(matches!(
            RunSettings::from_json(json),
            Err(BathyError::InvalidParameter(_))
        ));
    }

    #[test]
    fn test_enabled_classifiers_precedence() {
        let sliderule = serde_json::json!({"classifiers": ["cshelph", "openoceans", "bogus"]});
        let settings = RunSettings::from_json(r#"{"filename": "out.parquet"}"#).unwrap();
        assert_eq!(
            settings.enabled_classifiers(Some(&sliderule)),
            vec![ClassifierKind::CShelph, ClassifierKind::OpenOceans]
        );
        assert_eq!(settings.enabled_classifiers(None).len(), 9);

        let settings =
            RunSettings::from_json(r#"{"filename": "out.parquet", "classifiers": ["medianfilter"]}"#)
                .unwrap();
        assert_eq!(
            settings.enabled_classifiers(Some(&sliderule)),
            vec![ClassifierKind::MedianFilter]
        );
    }
}

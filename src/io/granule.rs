//! Granule-level information for the HDF5 product

use crate::types::{BathyError, BathyResult};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Granule description produced alongside the ATL03 subset
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GranuleInfo {
    pub atlas_sdp_gps_epoch: f64,
    pub data_start_utc: String,
    pub data_end_utc: String,
    pub start_delta_time: f64,
    pub end_delta_time: f64,
    pub start_gpssow: f64,
    pub end_gpssow: f64,
    pub start_gpsweek: i32,
    pub end_gpsweek: i32,
    pub start_geoseg: i32,
    pub end_geoseg: i32,
    pub granule_start_utc: String,
    pub granule_end_utc: String,
    pub version: String,
    pub orbit_number: i32,
    pub crossing_time: f64,
    pub lan: f64,
    pub sc_orient: i8,
    pub sc_orient_time: f64,
}

impl GranuleInfo {
    pub fn load<P: AsRef<Path>>(path: P) -> BathyResult<Self> {
        let path = path.as_ref();
        log::debug!("Reading granule info from: {}", path.display());
        let text = std::fs::read_to_string(path)?;
        serde_json::from_str(&text).map_err(|e| {
            BathyError::InvalidInput(format!("Bad granule info {}: {}", path.display(), e))
        })
    }
}

/// Request parameters copied from the first beam's `sliderule` metadata
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RequestParameters {
    #[serde(default)]
    pub cycle: i32,
    #[serde(default)]
    pub rgt: i32,
    #[serde(default)]
    pub region: i32,
    #[serde(default)]
    pub resource: String,
    #[serde(default)]
    pub sliderule_version: String,
    #[serde(default)]
    pub build_information: String,
    #[serde(default)]
    pub environment_version: String,
}

impl RequestParameters {
    /// Pull the fields the product needs from the free-form request blob
    pub fn from_sliderule(blob: &serde_json::Value) -> Self {
        serde_json::from_value(blob.clone()).unwrap_or_else(|e| {
            log::warn!("Incomplete sliderule request parameters: {}", e);
            Self::default()
        })
    }
}

/// Release number of the product layout
pub const RELEASE: &str = "1";

/// Scalar written to `ancillary_data/` or `orbit_info/`
#[derive(Debug, Clone, PartialEq)]
pub enum ProductValue {
    Float(f64),
    Int32(i32),
    Int16(i16),
    Int8(i8),
    Text(String),
}

impl GranuleInfo {
    /// Value of an `ancillary_data/` dataset
    pub fn ancillary_value(&self, rqst: &RequestParameters, name: &str) -> Option<ProductValue> {
        use ProductValue::*;
        let value = match name {
            "atlas_sdp_gps_epoch" => Float(self.atlas_sdp_gps_epoch),
            "data_end_utc" => Text(self.data_end_utc.clone()),
            "data_start_utc" => Text(self.data_start_utc.clone()),
            "end_cycle" | "start_cycle" => Int32(rqst.cycle),
            "end_delta_time" => Float(self.end_delta_time),
            "end_geoseg" => Int32(self.end_geoseg),
            "end_gpssow" => Float(self.end_gpssow),
            "end_gpsweek" => Int32(self.end_gpsweek),
            "end_orbit" | "start_orbit" => Int32(self.orbit_number),
            "end_region" | "start_region" => Int32(rqst.region),
            "end_rgt" | "start_rgt" => Int32(rqst.rgt),
            "granule_end_utc" => Text(self.granule_end_utc.clone()),
            "granule_start_utc" => Text(self.granule_start_utc.clone()),
            "release" => Text(RELEASE.to_string()),
            "resource" => Text(rqst.resource.clone()),
            "sliderule_version" => Text(rqst.sliderule_version.clone()),
            "sliderule_commit" => Text(rqst.build_information.clone()),
            "sliderule_environment" => Text(rqst.environment_version.clone()),
            "start_delta_time" => Float(self.start_delta_time),
            "start_geoseg" => Int32(self.start_geoseg),
            "start_gpssow" => Float(self.start_gpssow),
            "start_gpsweek" => Int32(self.start_gpsweek),
            "version" => Text(self.version.clone()),
            _ => return None,
        };
        Some(value)
    }

    /// Value of an `orbit_info/` dataset
    pub fn orbit_value(&self, rqst: &RequestParameters, name: &str) -> Option<ProductValue> {
        use ProductValue::*;
        let value = match name {
            "crossing_time" => Float(self.crossing_time),
            "cycle_number" => Int8(rqst.cycle as i8),
            "lan" => Float(self.lan),
            "orbit_number" => Int16(self.orbit_number as i16),
            "rgt" => Int16(rqst.rgt as i16),
            "sc_orient" => Int8(self.sc_orient),
            "sc_orient_time" => Float(self.sc_orient_time),
            _ => return None,
        };
        Some(value)
    }
}

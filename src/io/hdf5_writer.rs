//! ATL24 HDF5 writer
//!
//! Root groups `metadata/`, `ancillary_data/` and `orbit_info/`, then one
//! group per beam holding the per-photon datasets. Every dataset carries
//! the attributes from [`atl24_attributes`](super::atl24_attributes).

use super::atl24_attributes::{lookup, Attributes, Group, ANCILLARY_DATASETS, ORBIT_DATASETS};
use super::granule::{GranuleInfo, ProductValue, RequestParameters};
use crate::types::{BathyError, BathyResult, BeamInfo, ClassifierKind, PhotonFrame, BATHYMETRY};
use hdf5::types::VarLenUnicode;
use hdf5::H5Type;
use ndarray::{arr0, Array1};
use std::collections::BTreeMap;
use std::path::Path;

/// GPS seconds at the ATLAS standard data product epoch
pub const ATLAS_SDP_EPOCH_GPS_S: f64 = 1_198_800_018.0;

/// Bathymetry below this confidence raises `low_confidence_flag`
pub const LOW_CONFIDENCE: f64 = 0.6;

const COMPRESSION_LEVEL: u8 = 4;

fn unicode(text: &str) -> BathyResult<VarLenUnicode> {
    text.parse::<VarLenUnicode>()
        .map_err(|e| BathyError::Processing(format!("Cannot store string as HDF5: {}", e)))
}

fn write_attributes(dataset: &hdf5::Dataset, attrs: &Attributes) -> BathyResult<()> {
    let mut text = vec![
        ("contentType", attrs.content_type),
        ("description", attrs.description),
        ("long_name", attrs.long_name),
        ("source", attrs.source),
        ("units", attrs.units),
    ];
    if let Some(coordinates) = attrs.coordinates {
        text.push(("coordinates", coordinates));
    }
    if let Some(standard_name) = attrs.standard_name {
        text.push(("standard_name", standard_name));
    }
    if let Some(flag_meanings) = attrs.flag_meanings {
        text.push(("flag_meanings", flag_meanings));
    }
    for (key, value) in text {
        dataset
            .new_attr_builder()
            .with_data(&arr0(unicode(value)?))
            .create(key)?;
    }
    if let Some(values) = attrs.flag_values {
        dataset
            .new_attr_builder()
            .with_data(values)
            .create("flag_values")?;
    }
    Ok(())
}

fn attributes_for(group: Group, name: &str) -> BathyResult<Attributes> {
    lookup(group, name).ok_or_else(|| {
        BathyError::Processing(format!("No ATL24 attributes for dataset {}", name))
    })
}

fn write_scalar<T: H5Type>(group: &hdf5::Group, kind: Group, name: &str, value: T) -> BathyResult<()> {
    let dataset = group.new_dataset_builder().with_data(&arr0(value)).create(name)?;
    write_attributes(&dataset, &attributes_for(kind, name)?)
}

fn write_value(group: &hdf5::Group, kind: Group, name: &str, value: ProductValue) -> BathyResult<()> {
    match value {
        ProductValue::Float(v) => write_scalar(group, kind, name, v),
        ProductValue::Int32(v) => write_scalar(group, kind, name, v),
        ProductValue::Int16(v) => write_scalar(group, kind, name, v),
        ProductValue::Int8(v) => write_scalar(group, kind, name, v),
        ProductValue::Text(v) => write_scalar(group, kind, name, unicode(&v)?),
    }
}

fn write_column<T: H5Type>(group: &hdf5::Group, name: &str, values: Vec<T>) -> BathyResult<()> {
    let data = Array1::from(values);
    let dataset = group
        .new_dataset_builder()
        .deflate(COMPRESSION_LEVEL)
        .with_data(&data)
        .create(name)?;
    write_attributes(&dataset, &attributes_for(Group::Beam, name)?)
}

/// Write the photons of one beam, selected by spot
fn write_beam(file: &hdf5::File, frame: &PhotonFrame, info: &BeamInfo) -> BathyResult<()> {
    let rows: Vec<usize> = (0..frame.len()).filter(|i| frame.spot[*i] == info.spot).collect();
    log::debug!("Writing {} photons for {}", rows.len(), info.beam);
    let group = file.create_group(info.beam.name())?;

    let pick_f64 = |column: &[f64]| rows.iter().map(|i| column[*i]).collect::<Vec<f64>>();
    let pick_f32 = |column: &[f64]| rows.iter().map(|i| column[*i] as f32).collect::<Vec<f32>>();

    write_column(&group, "index_ph", rows.iter().map(|i| frame.index_ph[*i] as i32).collect::<Vec<i32>>())?;
    write_column(&group, "index_seg", rows.iter().map(|i| frame.index_seg[*i]).collect::<Vec<i32>>())?;
    write_column(
        &group,
        "delta_time",
        rows.iter()
            .map(|i| frame.time_ns[*i] as f64 / 1e9 - ATLAS_SDP_EPOCH_GPS_S)
            .collect::<Vec<f64>>(),
    )?;
    write_column(&group, "lat_ph", pick_f64(&frame.lat_ph))?;
    write_column(&group, "lon_ph", pick_f64(&frame.lon_ph))?;
    write_column(&group, "x_atc", pick_f32(&frame.x_atc))?;
    write_column(&group, "y_atc", pick_f32(&frame.y_atc))?;
    write_column(&group, "ellipse_h", pick_f32(&frame.ellipse_h))?;
    write_column(&group, "ortho_h", pick_f32(&frame.ortho_h))?;
    write_column(&group, "surface_h", pick_f32(&frame.surface_h))?;
    write_column(
        &group,
        "depth",
        rows.iter()
            .map(|i| (frame.surface_h[*i] - frame.ortho_h[*i]) as f32)
            .collect::<Vec<f32>>(),
    )?;
    write_column(&group, "sigma_thu", pick_f32(&frame.sigma_thu))?;
    write_column(&group, "sigma_tvu", pick_f32(&frame.sigma_tvu))?;
    write_column(
        &group,
        "flags",
        rows.iter().map(|i| frame.processing_flags[*i] as i32).collect::<Vec<i32>>(),
    )?;

    match frame.label(ClassifierKind::Ensemble) {
        Some(ensemble) => {
            write_column(&group, "class_ph", rows.iter().map(|i| ensemble[*i] as i16).collect::<Vec<i16>>())?;
            if let Some(confidence) = &frame.confidence {
                write_column(&group, "confidence", pick_f32(confidence))?;
                write_column(
                    &group,
                    "low_confidence_flag",
                    rows.iter()
                        .map(|i| (ensemble[*i] == BATHYMETRY && confidence[*i] < LOW_CONFIDENCE) as i8)
                        .collect::<Vec<i8>>(),
                )?;
            }
        }
        None => {
            write_column(&group, "class_ph", rows.iter().map(|i| frame.class_ph[*i] as i16).collect::<Vec<i16>>())?;
            for (kind, labels) in &frame.labels {
                write_column(&group, kind.name(), rows.iter().map(|i| labels[*i] as i16).collect::<Vec<i16>>())?;
            }
        }
    }
    Ok(())
}

/// Write the merged, corrected frame as an ATL24 granule
pub fn write_atl24<P: AsRef<Path>>(
    path: P,
    frame: &PhotonFrame,
    beams: &[BeamInfo],
    granule: &GranuleInfo,
    rqst: &RequestParameters,
    metadata: &BTreeMap<String, String>,
) -> BathyResult<()> {
    let path = path.as_ref();
    log::info!("Writing HDF5 file: {}", path.display());
    let file = hdf5::File::create(path)?;

    let metadata_group = file.create_group("metadata")?;
    for name in ["sliderule", "profile", "stats"] {
        let text = metadata.get(name).map(String::as_str).unwrap_or("{}");
        write_scalar(&metadata_group, Group::Metadata, name, unicode(text)?)?;
    }

    let ancillary = file.create_group("ancillary_data")?;
    for name in ANCILLARY_DATASETS {
        if let Some(value) = granule.ancillary_value(rqst, name) {
            write_value(&ancillary, Group::Ancillary, name, value)?;
        }
    }

    let orbit = file.create_group("orbit_info")?;
    for name in ORBIT_DATASETS {
        if let Some(value) = granule.orbit_value(rqst, name) {
            write_value(&orbit, Group::Orbit, name, value)?;
        }
    }

    for info in beams {
        write_beam(&file, frame, info)?;
    }
    file.close()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Beam, BeamStrength};

    fn granule() -> GranuleInfo {
        serde_json::from_value(serde_json::json!({
            "atlas_sdp_gps_epoch": 1198800018.0,
            "data_start_utc": "2019-11-14T00:00:00Z",
            "data_end_utc": "2019-11-14T00:05:00Z",
            "start_delta_time": 1.0, "end_delta_time": 2.0,
            "start_gpssow": 3.0, "end_gpssow": 4.0,
            "start_gpsweek": 2079, "end_gpsweek": 2079,
            "start_geoseg": 1, "end_geoseg": 2,
            "granule_start_utc": "2019-11-14T00:00:00Z",
            "granule_end_utc": "2019-11-14T00:05:00Z",
            "version": "006", "orbit_number": 5012,
            "crossing_time": 5.0, "lan": 6.0, "sc_orient": 1, "sc_orient_time": 7.0
        }))
        .unwrap()
    }

    #[test]
    fn test_write_atl24_layout() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("atl24.h5");

        let mut frame = PhotonFrame::blank(4, 1);
        frame.spot = vec![1, 1, 2, 2];
        frame.time_ns = vec![1_198_800_019_000_000_000; 4];
        frame.surface_h = vec![0.0; 4];
        frame.ortho_h = vec![0.0, -3.0, 0.0, -2.0];
        frame
            .set_label(ClassifierKind::Ensemble, vec![41, 40, 41, 40])
            .unwrap();
        frame.confidence = Some(vec![0.9, 0.5, 0.9, 0.8]);
        let beams = [
            BeamInfo { beam: Beam::Gt1l, spot: 1, strength: BeamStrength::Strong },
            BeamInfo { beam: Beam::Gt1r, spot: 2, strength: BeamStrength::Weak },
        ];

        write_atl24(&path, &frame, &beams, &granule(), &RequestParameters::default(), &BTreeMap::new())
            .unwrap();

        let file = hdf5::File::open(&path).unwrap();
        let depth: Vec<f32> = file.dataset("gt1l/depth").unwrap().read_raw().unwrap();
        assert_eq!(depth, vec![0.0, 3.0]);
        let low: Vec<i8> = file.dataset("gt1l/low_confidence_flag").unwrap().read_raw().unwrap();
        assert_eq!(low, vec![0, 1]);
        let delta: Vec<f64> = file.dataset("gt1r/delta_time").unwrap().read_raw().unwrap();
        assert!((delta[0] - 1.0).abs() < 1e-6);
        let release: VarLenUnicode = file.dataset("ancillary_data/release").unwrap().read_scalar().unwrap();
        assert_eq!(release.as_str(), "1");
        let units: VarLenUnicode = file
            .dataset("gt1l/ortho_h")
            .unwrap()
            .attr("units")
            .unwrap()
            .read_scalar()
            .unwrap();
        assert_eq!(units.as_str(), "meters");
    }
}

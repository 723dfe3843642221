//! Per-beam photon Parquet reader
//!
//! Each beam arrives as its own Parquet file with `meta` and `sliderule`
//! JSON blobs in the file metadata. The packed `predictions` list column is
//! exploded into one label column per pre-run classifier; columns this
//! crate does not interpret are kept as pass-through Arrow arrays.

use crate::types::{
    BathyError, BathyResult, BeamInfo, BeamMeta, Beam, ClassifierKind, PhotonFrame, UNCLASSIFIED,
};
use arrow::array::{Array, ArrayRef, AsArray};
use arrow::compute::{cast, concat_batches};
use arrow::datatypes::{
    ArrowPrimitiveType, DataType, Float64Type, Int32Type, Int64Type, Int8Type, UInt32Type,
};
use arrow::record_batch::RecordBatch;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use std::collections::BTreeMap;
use std::fs::File;
use std::path::Path;

/// Column holding the labels of the classifiers run before this pipeline
pub const PREDICTIONS_COLUMN: &str = "predictions";

/// Columns read into typed frame fields
const FRAME_COLUMNS: [&str; 22] = [
    "index_ph",
    "index_seg",
    "time_ns",
    "lat_ph",
    "lon_ph",
    "x_atc",
    "y_atc",
    "x_ph",
    "ellipse_h",
    "ortho_h",
    "surface_h",
    "refracted_dZ",
    "refracted_lat",
    "refracted_lon",
    "subaqueous_sigma_thu",
    "subaqueous_sigma_tvu",
    "sigma_thu",
    "sigma_tvu",
    "max_signal_conf",
    "processing_flags",
    "class_ph",
    "spot",
];

/// One beam as read from disk
#[derive(Debug, Clone)]
pub struct BeamInput {
    pub info: BeamInfo,
    pub frame: PhotonFrame,
    /// Request parameters recorded by the producer
    pub sliderule: Option<serde_json::Value>,
}

/// Whole Parquet file as one batch plus its key/value metadata
pub fn read_table<P: AsRef<Path>>(path: P) -> BathyResult<(RecordBatch, BTreeMap<String, String>)> {
    let file = File::open(path.as_ref())?;
    let builder = ParquetRecordBatchReaderBuilder::try_new(file)?;
    let metadata: BTreeMap<String, String> = builder
        .metadata()
        .file_metadata()
        .key_value_metadata()
        .map(|pairs| {
            pairs
                .iter()
                .filter_map(|kv| kv.value.clone().map(|v| (kv.key.clone(), v)))
                .collect()
        })
        .unwrap_or_default();
    let schema = builder.schema().clone();
    let batches = builder.build()?.collect::<Result<Vec<_>, _>>()?;
    let batch = concat_batches(&schema, &batches)?;
    Ok((batch, metadata))
}

fn column<'a>(batch: &'a RecordBatch, name: &str, file: &str) -> BathyResult<&'a ArrayRef> {
    batch
        .column_by_name(name)
        .ok_or_else(|| BathyError::MissingColumn {
            column: name.to_string(),
            file: file.to_string(),
        })
}

/// Integer column cast to `T`; nulls and out-of-range values are errors
fn primitive<T: ArrowPrimitiveType>(
    batch: &RecordBatch,
    name: &str,
    file: &str,
) -> BathyResult<Vec<T::Native>> {
    let array = cast(column(batch, name, file)?, &T::DATA_TYPE)?;
    if array.null_count() > 0 {
        return Err(BathyError::InvalidInput(format!(
            "Column {} in {} has {} null or out-of-range values",
            name,
            file,
            array.null_count()
        )));
    }
    Ok(array.as_primitive::<T>().values().to_vec())
}

/// Float column with nulls read as NaN
fn float(batch: &RecordBatch, name: &str, file: &str) -> BathyResult<Vec<f64>> {
    let array = cast(column(batch, name, file)?, &DataType::Float64)?;
    Ok(array
        .as_primitive::<Float64Type>()
        .iter()
        .map(|v| v.unwrap_or(f64::NAN))
        .collect())
}

/// Split a list column into one label column per entry of `PREDICTION_ORDER`
fn explode_predictions(array: &ArrayRef, n: usize) -> BathyResult<Vec<Vec<i8>>> {
    let (values, offsets): (ArrayRef, Vec<usize>) = match array.data_type() {
        DataType::List(_) => {
            let list = array.as_list::<i32>();
            let offsets = list.value_offsets().iter().map(|o| *o as usize).collect();
            (list.values().clone(), offsets)
        }
        DataType::LargeList(_) => {
            let list = array.as_list::<i64>();
            let offsets = list.value_offsets().iter().map(|o| *o as usize).collect();
            (list.values().clone(), offsets)
        }
        DataType::FixedSizeList(_, size) => {
            let list = array.as_fixed_size_list();
            let size = *size as usize;
            (list.values().clone(), (0..=n).map(|row| row * size).collect())
        }
        other => {
            return Err(BathyError::InvalidInput(format!(
                "{} column has type {}, expected a list",
                PREDICTIONS_COLUMN, other
            )))
        }
    };
    let values = cast(&values, &DataType::Int8)?;
    let values = values.as_primitive::<Int8Type>();

    let mut columns = vec![vec![UNCLASSIFIED; n]; ClassifierKind::PREDICTION_ORDER.len()];
    for row in 0..n {
        let entries = offsets[row]..offsets[row + 1];
        for (column, idx) in columns.iter_mut().zip(entries) {
            column[row] = values.value(idx);
        }
    }
    Ok(columns)
}

/// Read one beam file into a frame
pub fn read_beam<P: AsRef<Path>>(path: P, beam: Beam) -> BathyResult<BeamInput> {
    let path = path.as_ref();
    let file = path.display().to_string();
    log::info!("Reading {} photons from: {}", beam, file);

    let (batch, metadata) = read_table(path)?;

    let meta: BeamMeta = metadata
        .get("meta")
        .ok_or_else(|| BathyError::InvalidInput(format!("{} has no meta metadata", file)))
        .and_then(|text| {
            serde_json::from_str(text)
                .map_err(|e| BathyError::InvalidInput(format!("Bad meta in {}: {}", file, e)))
        })?;
    if meta.beam != beam {
        log::warn!("{} is listed as {} but its metadata says {}", file, beam, meta.beam);
    }
    let sliderule = match metadata.get("sliderule") {
        Some(text) => Some(serde_json::from_str(text).map_err(|e| {
            BathyError::InvalidInput(format!("Bad sliderule metadata in {}: {}", file, e))
        })?),
        None => None,
    };

    let n = batch.num_rows();
    let mut frame = PhotonFrame {
        index_ph: primitive::<Int64Type>(&batch, "index_ph", &file)?,
        index_seg: primitive::<Int32Type>(&batch, "index_seg", &file)?,
        time_ns: primitive::<Int64Type>(&batch, "time_ns", &file)?,
        lat_ph: float(&batch, "lat_ph", &file)?,
        lon_ph: float(&batch, "lon_ph", &file)?,
        x_atc: float(&batch, "x_atc", &file)?,
        y_atc: float(&batch, "y_atc", &file)?,
        x_ph: float(&batch, "x_ph", &file)?,
        ellipse_h: float(&batch, "ellipse_h", &file)?,
        ortho_h: float(&batch, "ortho_h", &file)?,
        surface_h: float(&batch, "surface_h", &file)?,
        refracted_dz: float(&batch, "refracted_dZ", &file)?,
        refracted_lat: float(&batch, "refracted_lat", &file)?,
        refracted_lon: float(&batch, "refracted_lon", &file)?,
        subaqueous_sigma_thu: float(&batch, "subaqueous_sigma_thu", &file)?,
        subaqueous_sigma_tvu: float(&batch, "subaqueous_sigma_tvu", &file)?,
        sigma_thu: float(&batch, "sigma_thu", &file)?,
        sigma_tvu: float(&batch, "sigma_tvu", &file)?,
        max_signal_conf: primitive::<Int8Type>(&batch, "max_signal_conf", &file)?,
        processing_flags: primitive::<UInt32Type>(&batch, "processing_flags", &file)?,
        class_ph: primitive::<Int8Type>(&batch, "class_ph", &file)?,
        spot: vec![meta.spot; n],
        ..PhotonFrame::default()
    };

    let labelled = |kind: ClassifierKind, column: Vec<i8>, frame: &mut PhotonFrame| {
        frame
            .set_label(kind, column)
            .map_err(|e| BathyError::InvalidInput(format!("{}: {}", file, e)))
    };

    if let Some(predictions) = batch.column_by_name(PREDICTIONS_COLUMN) {
        let columns = explode_predictions(predictions, n)?;
        for (kind, column) in ClassifierKind::PREDICTION_ORDER.iter().zip(columns) {
            labelled(*kind, column, &mut frame)?;
        }
    }

    for field in batch.schema().fields() {
        let name = field.name();
        if FRAME_COLUMNS.contains(&name.as_str()) || name == PREDICTIONS_COLUMN {
            continue;
        }
        if let Ok(kind) = name.parse::<ClassifierKind>() {
            let column = primitive::<Int8Type>(&batch, name, &file)?;
            labelled(kind, column, &mut frame)?;
            continue;
        }
        if let Some(array) = batch.column_by_name(name) {
            log::debug!("Passing through column {} of {}", name, file);
            frame.passthrough.push((name.clone(), array.clone()));
        }
    }

    frame.check_lengths()?;
    log::debug!("{}: {} photons on spot {}", beam, n, meta.spot);
    Ok(BeamInput {
        info: BeamInfo::from(&meta),
        frame,
        sliderule,
    })
}

/// Read the int8-castable label column `name` from a classifier output file
pub fn read_label_column<P: AsRef<Path>>(path: P, name: &str) -> BathyResult<Vec<i8>> {
    let path = path.as_ref();
    let (batch, _) = read_table(path)?;
    primitive::<Int8Type>(&batch, name, &path.display().to_string())
}

//! Photon Parquet writer
//!
//! Writes a frame as one row group set with caller-supplied key/value file
//! metadata. The Arrow schema is not embedded so the metadata map carries
//! only the caller's keys.

use crate::types::{BathyResult, ClassifierKind, PhotonFrame};
use arrow::array::{
    Array, ArrayRef, Float64Array, Int32Array, Int64Array, Int8Array, TimestampNanosecondArray,
    UInt32Array, UInt8Array,
};
use arrow::datatypes::{Field, Schema};
use arrow::record_batch::RecordBatch;
use parquet::arrow::arrow_writer::ArrowWriterOptions;
use parquet::arrow::ArrowWriter;
use parquet::basic::Compression;
use parquet::file::properties::WriterProperties;
use parquet::format::KeyValue;
use std::collections::BTreeMap;
use std::fs::File;
use std::path::Path;
use std::sync::Arc;

/// Column name of the ensemble bathymetry probability
pub const CONFIDENCE_COLUMN: &str = "confidence";

#[derive(Default)]
struct Columns {
    fields: Vec<Field>,
    arrays: Vec<ArrayRef>,
}

impl Columns {
    fn push(&mut self, name: &str, array: ArrayRef) {
        self.fields.push(Field::new(
            name,
            array.data_type().clone(),
            array.null_count() > 0,
        ));
        self.arrays.push(array);
    }

    fn has(&self, name: &str) -> bool {
        self.fields.iter().any(|f| f.name() == name)
    }
}

fn f64s(values: &[f64]) -> ArrayRef {
    Arc::new(Float64Array::from(values.to_vec()))
}

/// Frame as a single record batch: photon columns, pass-through columns,
/// label columns in prediction order, then the confidence if present
pub fn frame_to_batch(frame: &PhotonFrame) -> BathyResult<RecordBatch> {
    frame.check_lengths()?;
    let mut columns = Columns::default();

    columns.push("time_ns", Arc::new(TimestampNanosecondArray::from(frame.time_ns.clone())));
    columns.push("index_ph", Arc::new(Int64Array::from(frame.index_ph.clone())));
    columns.push("index_seg", Arc::new(Int32Array::from(frame.index_seg.clone())));
    columns.push("lat_ph", f64s(&frame.lat_ph));
    columns.push("lon_ph", f64s(&frame.lon_ph));
    columns.push("x_atc", f64s(&frame.x_atc));
    columns.push("y_atc", f64s(&frame.y_atc));
    columns.push("x_ph", f64s(&frame.x_ph));
    columns.push("ellipse_h", f64s(&frame.ellipse_h));
    columns.push("ortho_h", f64s(&frame.ortho_h));
    columns.push("surface_h", f64s(&frame.surface_h));
    columns.push("refracted_dZ", f64s(&frame.refracted_dz));
    columns.push("refracted_lat", f64s(&frame.refracted_lat));
    columns.push("refracted_lon", f64s(&frame.refracted_lon));
    columns.push("subaqueous_sigma_thu", f64s(&frame.subaqueous_sigma_thu));
    columns.push("subaqueous_sigma_tvu", f64s(&frame.subaqueous_sigma_tvu));
    columns.push("sigma_thu", f64s(&frame.sigma_thu));
    columns.push("sigma_tvu", f64s(&frame.sigma_tvu));
    columns.push("max_signal_conf", Arc::new(Int8Array::from(frame.max_signal_conf.clone())));
    columns.push("processing_flags", Arc::new(UInt32Array::from(frame.processing_flags.clone())));
    columns.push("class_ph", Arc::new(Int8Array::from(frame.class_ph.clone())));
    columns.push("spot", Arc::new(UInt8Array::from(frame.spot.clone())));

    for (name, array) in &frame.passthrough {
        let generated = name == CONFIDENCE_COLUMN || name.parse::<ClassifierKind>().is_ok();
        if generated || columns.has(name) {
            log::warn!("Dropping input column {} that the output regenerates", name);
            continue;
        }
        columns.push(name, array.clone());
    }

    for kind in ClassifierKind::PREDICTION_ORDER {
        if let Some(labels) = frame.label(kind) {
            columns.push(kind.name(), Arc::new(Int8Array::from(labels.to_vec())));
        }
    }
    if let Some(confidence) = &frame.confidence {
        columns.push(CONFIDENCE_COLUMN, f64s(confidence));
    }

    let schema = Arc::new(Schema::new(columns.fields));
    Ok(RecordBatch::try_new(schema, columns.arrays)?)
}

/// Write `frame` to `path` with `metadata` as the file key/value metadata
pub fn write_photon_parquet<P: AsRef<Path>>(
    path: P,
    frame: &PhotonFrame,
    metadata: &BTreeMap<String, String>,
) -> BathyResult<()> {
    let path = path.as_ref();
    let batch = frame_to_batch(frame)?;

    let key_values: Vec<KeyValue> = metadata
        .iter()
        .map(|(key, value)| KeyValue::new(key.clone(), value.clone()))
        .collect();
    let properties = WriterProperties::builder()
        .set_compression(Compression::SNAPPY)
        .set_key_value_metadata(Some(key_values))
        .build();
    let options = ArrowWriterOptions::new()
        .with_properties(properties)
        .with_skip_arrow_metadata(true);

    let file = File::create(path)?;
    let mut writer = ArrowWriter::try_new_with_options(file, batch.schema(), options)?;
    writer.write(&batch)?;
    writer.close()?;

    log::debug!(
        "Wrote {} photons ({} columns) to {}",
        batch.num_rows(),
        batch.num_columns(),
        path.display()
    );
    Ok(())
}

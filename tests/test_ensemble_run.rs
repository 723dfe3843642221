use arrow::array::AsArray;
use arrow::datatypes::{Float64Type, Int8Type, UInt32Type};
use oceaneyes::io::parquet_writer::write_photon_parquet;
use oceaneyes::io::photon_reader::read_table;
use oceaneyes::types::{BATHYMETRY, SEA_SURFACE, UNCLASSIFIED};
use oceaneyes::{BathyError, ClassifierKind, PhotonFrame, RunSettings};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Deterministic jitter in [-0.2, 0.2)
fn jitter(i: usize) -> f64 {
    ((i * 37) % 41) as f64 / 41.0 * 0.4 - 0.2
}

/// Surface photons near z=0 plus `bathy` photons of flat bathymetry at
/// z=-2 spread evenly along track
fn scene(surface: usize, bathy: usize) -> PhotonFrame {
    let n = surface + bathy;
    let mut frame = PhotonFrame::blank(n, 1);
    let stride = if bathy > 0 { n / bathy } else { usize::MAX };
    let mut placed = 0;
    for i in 0..n {
        let x = i as f64 * 0.5;
        frame.time_ns[i] = 1_262_000_000_000_000_000 + i as i64 * 1000;
        frame.x_atc[i] = x;
        frame.x_ph[i] = x;
        frame.lat_ph[i] = 30.0 + x * 9e-6;
        frame.lon_ph[i] = -80.0;
        frame.index_seg[i] = (x / 20.0) as i32;
        frame.sigma_tvu[i] = 0.05;
        frame.subaqueous_sigma_tvu[i] = 0.25;
        frame.refracted_lat[i] = frame.lat_ph[i];
        frame.refracted_lon[i] = frame.lon_ph[i];
        frame.max_signal_conf[i] = 4;

        let is_bathy = placed < bathy && i % stride == stride - 1;
        if is_bathy {
            placed += 1;
            frame.ortho_h[i] = -2.0 + jitter(i) * 0.25;
            frame.class_ph[i] = BATHYMETRY;
            frame.refracted_dz[i] = 0.1;
        } else {
            frame.ortho_h[i] = jitter(i);
            frame.class_ph[i] = SEA_SURFACE;
        }
        frame.ellipse_h[i] = frame.ortho_h[i] - 30.0;
    }
    frame
}

/// Drop the input labels so only the classifiers decide
fn unlabeled(mut frame: PhotonFrame) -> PhotonFrame {
    frame.class_ph.iter_mut().for_each(|c| *c = UNCLASSIFIED);
    frame
}

fn write_beam(dir: &Path, name: &str, spot: u8, frame: &PhotonFrame) -> PathBuf {
    let path = dir.join(format!("{}.parquet", name));
    let strength = if spot % 2 == 1 { "strong" } else { "weak" };
    let mut metadata = BTreeMap::new();
    metadata.insert(
        "meta".to_string(),
        format!(r#"{{"spot": {}, "beam_strength": "{}", "beam": "{}"}}"#, spot, strength, name),
    );
    metadata.insert(
        "sliderule".to_string(),
        r#"{"cycle": 5, "rgt": 737, "region": 3, "resource": "ATL03_test.h5", "classifiers": ["openoceans"]}"#
            .to_string(),
    );
    write_photon_parquet(&path, frame, &metadata).unwrap();
    path
}

fn settings(dir: &Path, beams: &[(&str, PathBuf)], classifiers: &[&str]) -> RunSettings {
    let mut json = serde_json::json!({
        "filename": dir.join("atl24.parquet"),
        "format": "parquet",
        "classifiers": classifiers,
        "profile": {"atl03_duration": 1.5},
        "latch": 1_700_000_000.0,
    });
    for (name, path) in beams {
        json[*name] = serde_json::json!(path);
    }
    RunSettings::from_json(&json.to_string()).unwrap()
}

fn ensemble_column(batch: &arrow::record_batch::RecordBatch) -> Vec<i8> {
    batch
        .column_by_name("ensemble")
        .unwrap()
        .as_primitive::<Int8Type>()
        .values()
        .to_vec()
}

#[test]
fn test_pure_surface_run() {
    init_logging();
    let dir = tempfile::tempdir().unwrap();
    let gt1l = write_beam(dir.path(), "gt1l", 1, &scene(1000, 0));
    let settings = settings(dir.path(), &[("gt1l", gt1l)], &["cshelph", "medianfilter", "ensemble"]);

    let report = oceaneyes::run(&settings).unwrap();
    assert_eq!(report.photons, 1000);
    assert_eq!(report.stats.bathy_photons, 0);
    assert_eq!(report.stats.subaqueous_photons, 0);
    assert!(report.stats.bathy_mean_depth.is_none());

    let (batch, metadata) = read_table(&report.output).unwrap();
    assert_eq!(batch.num_rows(), 1000);
    assert!(ensemble_column(&batch).iter().all(|c| *c == SEA_SURFACE));

    // no photon moved
    let ortho = batch.column_by_name("ortho_h").unwrap().as_primitive::<Float64Type>();
    let input = scene(1000, 0);
    for (i, h) in ortho.values().iter().enumerate() {
        assert_eq!(*h, input.ortho_h[i]);
    }

    let keys: Vec<&str> = metadata.keys().map(String::as_str).collect();
    assert_eq!(keys, vec!["cshelph", "medianfilter", "profile", "sliderule", "stats"]);
}

#[test]
fn test_flat_bathy_corrected_and_counted() {
    init_logging();
    let dir = tempfile::tempdir().unwrap();
    let input = scene(1000, 400);
    let gt1l = write_beam(dir.path(), "gt1l", 1, &input);
    let settings = settings(dir.path(), &[("gt1l", gt1l)], &["cshelph", "medianfilter", "ensemble"]);

    let report = oceaneyes::run(&settings).unwrap();
    assert_eq!(report.photons, 1400);
    assert_eq!(report.stats.bathy_photons, 400);
    assert_eq!(report.stats.bathy_strong_photons, 400);
    assert_eq!(report.stats.subaqueous_photons, 400);
    approx::assert_abs_diff_eq!(report.stats.bathy_mean_depth.unwrap(), 1.9, epsilon = 0.05);

    let segments: std::collections::BTreeSet<i32> = (0..input.len())
        .filter(|i| input.class_ph[*i] == BATHYMETRY)
        .map(|i| input.index_seg[i])
        .collect();
    assert_eq!(report.stats.bathy_linear_coverage, 20.0 * segments.len() as f64);

    let (batch, metadata) = read_table(&report.output).unwrap();
    let ortho = batch.column_by_name("ortho_h").unwrap().as_primitive::<Float64Type>();
    for i in 0..input.len() {
        let expected = if input.class_ph[i] == BATHYMETRY {
            input.ortho_h[i] + 0.1
        } else {
            input.ortho_h[i]
        };
        approx::assert_abs_diff_eq!(ortho.value(i), expected, epsilon = 1e-12);
    }

    let profile: serde_json::Value = serde_json::from_str(&metadata["profile"]).unwrap();
    assert_eq!(profile["atl03_duration"], 1.5);
    for key in ["cshelph", "medianfilter", "ensemble", "corrections_duration", "total_duration"] {
        assert!(profile[key].is_number(), "{}", key);
    }
    let sliderule: serde_json::Value = serde_json::from_str(&metadata["sliderule"]).unwrap();
    assert_eq!(sliderule["rgt"], 737);
    assert!(sliderule["ensemble"]["version"].is_string());
}

#[test]
fn test_openoceans_finds_flat_bathy() {
    init_logging();
    let dir = tempfile::tempdir().unwrap();
    let truth = scene(1000, 400);
    let gt1l = write_beam(dir.path(), "gt1l", 1, &unlabeled(truth.clone()));
    let settings = settings(dir.path(), &[("gt1l", gt1l)], &["openoceans", "ensemble"]);

    let report = oceaneyes::run(&settings).unwrap();
    assert_eq!(report.photons, 1400);

    let (batch, _) = read_table(&report.output).unwrap();
    let ensemble = ensemble_column(&batch);
    let (mut bathy_hits, mut surface_hits, mut false_bathy) = (0, 0, 0);
    for (i, label) in ensemble.iter().enumerate() {
        match (truth.class_ph[i], *label) {
            (BATHYMETRY, BATHYMETRY) => bathy_hits += 1,
            (SEA_SURFACE, SEA_SURFACE) => surface_hits += 1,
            (SEA_SURFACE, BATHYMETRY) => false_bathy += 1,
            _ => {}
        }
    }
    assert!(bathy_hits >= 380, "only {} of 400 bathy photons found", bathy_hits);
    assert!(surface_hits >= 950, "only {} of 1000 surface photons found", surface_hits);
    assert_eq!(false_bathy, 0);

    assert!((380..=400).contains(&report.stats.bathy_photons), "{}", report.stats.bathy_photons);
    approx::assert_abs_diff_eq!(report.stats.bathy_mean_depth.unwrap(), 1.9, epsilon = 0.05);

    let openoceans = batch.column_by_name("openoceans").unwrap().as_primitive::<Int8Type>();
    assert_eq!(openoceans.values().to_vec(), ensemble);
}

#[test]
fn test_openoceans_finds_nothing_in_noise() {
    init_logging();
    let dir = tempfile::tempdir().unwrap();
    let mut noise = unlabeled(scene(500, 0));
    for i in 0..noise.len() {
        // a permutation of evenly spaced heights over [-50, 30]
        let k = (i * 211) % 500;
        noise.ortho_h[i] = -50.0 + 80.0 * (k as f64 + 0.5) / 500.0;
        noise.ellipse_h[i] = noise.ortho_h[i] - 30.0;
    }
    let gt1l = write_beam(dir.path(), "gt1l", 1, &noise);
    let settings = settings(dir.path(), &[("gt1l", gt1l)], &["openoceans", "ensemble"]);

    let report = oceaneyes::run(&settings).unwrap();
    assert_eq!(report.photons, 500);
    assert_eq!(report.stats.bathy_photons, 0);
    assert_eq!(report.stats.subaqueous_photons, 0);

    let (batch, _) = read_table(&report.output).unwrap();
    assert!(ensemble_column(&batch).iter().all(|c| *c != BATHYMETRY));
}

#[test]
fn test_native_classifiers_keep_every_photon() {
    init_logging();
    let dir = tempfile::tempdir().unwrap();
    let gt1l = write_beam(dir.path(), "gt1l", 1, &scene(1000, 400));
    let gt2r = write_beam(dir.path(), "gt2r", 4, &scene(300, 0));
    let settings = settings(
        dir.path(),
        &[("gt2r", gt2r), ("gt1l", gt1l)],
        &["cshelph", "medianfilter", "openoceans", "ensemble"],
    );

    let report = oceaneyes::run(&settings).unwrap();
    assert_eq!(report.photons, 1300 + 400);
    assert_eq!(
        report.stages,
        vec![
            ClassifierKind::CShelph,
            ClassifierKind::MedianFilter,
            ClassifierKind::OpenOceans,
            ClassifierKind::Ensemble
        ]
    );

    let (batch, _) = read_table(&report.output).unwrap();
    assert_eq!(batch.num_rows(), 1700);
    assert!(ensemble_column(&batch)
        .iter()
        .all(|c| matches!(*c, UNCLASSIFIED | BATHYMETRY | SEA_SURFACE)));

    // beams are written in gt1l..gt3r order
    let spots = batch.column_by_name("spot").unwrap();
    let spots = spots.as_primitive::<arrow::datatypes::UInt8Type>();
    assert_eq!(spots.value(0), 1);
    assert_eq!(spots.value(1699), 4);
}

#[test]
fn test_processing_flags_follow_label_columns() {
    init_logging();
    let dir = tempfile::tempdir().unwrap();
    let mut input = scene(200, 0);
    let cshelph: Vec<i8> = (0..200).map(|i| if i % 2 == 0 { BATHYMETRY } else { 0 }).collect();
    input.set_label(ClassifierKind::CShelph, cshelph.clone()).unwrap();
    input.set_label(ClassifierKind::MedianFilter, vec![0; 200]).unwrap();
    let gt1l = write_beam(dir.path(), "gt1l", 1, &input);
    let settings = settings(dir.path(), &[("gt1l", gt1l)], &["ensemble"]);

    let report = oceaneyes::run(&settings).unwrap();
    let (batch, _) = read_table(&report.output).unwrap();
    let flags = batch
        .column_by_name("processing_flags")
        .unwrap()
        .as_primitive::<UInt32Type>();
    assert_eq!(flags.len(), 200);
    for (i, label) in cshelph.iter().enumerate() {
        let flag = flags.value(i);
        assert_eq!(flag & (1 << 28) != 0, *label == BATHYMETRY, "photon {}", i);
        assert_eq!(flag & (1 << 27), 0, "photon {}", i);
    }
}

#[test]
fn test_missing_external_predictions_abort_run() {
    init_logging();
    let dir = tempfile::tempdir().unwrap();
    let gt1l = write_beam(dir.path(), "gt1l", 1, &scene(50, 0));
    let settings = settings(dir.path(), &[("gt1l", gt1l)], &["pointnet", "ensemble"]);

    let result = oceaneyes::run(&settings);
    assert!(matches!(result, Err(BathyError::InvalidInput(_))));
    assert!(!settings.filename.exists());
}

#[cfg(unix)]
#[test]
fn test_failing_external_command_names_classifier() {
    init_logging();
    let dir = tempfile::tempdir().unwrap();
    let gt1l = write_beam(dir.path(), "gt1l", 1, &scene(50, 0));
    let mut settings = settings(dir.path(), &[("gt1l", gt1l)], &["bathypathfinder", "ensemble"]);
    settings.bathypathfinder.command = Some(vec!["false".to_string()]);

    match oceaneyes::run(&settings) {
        Err(BathyError::Classifier { classifier, beam, .. }) => {
            assert_eq!(classifier, ClassifierKind::BathyPathFinder);
            assert_eq!(beam, oceaneyes::Beam::Gt1l);
        }
        other => panic!("unexpected result: {:?}", other.map(|r| r.photons)),
    }
    assert!(!settings.filename.exists());
}

#[test]
fn test_missing_beam_metadata_is_input_error() {
    init_logging();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("gt1l.parquet");
    write_photon_parquet(&path, &scene(10, 0), &BTreeMap::new()).unwrap();
    let settings = settings(dir.path(), &[("gt1l", path)], &["ensemble"]);
    assert!(matches!(oceaneyes::run(&settings), Err(BathyError::InvalidInput(_))));
}

//! Ensemble runner
//!
//! Reads every beam, runs the enabled classifiers stage by stage over all
//! beams, merges the beams into one frame, applies the processing flags and
//! the subaqueous correction, computes granule statistics and writes the
//! output file.

use crate::core::classifier::{ClassifierOutput, PhotonClassifier};
use crate::core::corrections::{apply_subaqueous_correction, final_labels, set_processing_flags};
use crate::core::cshelph::{CShelph, CSHELPH_VERSION};
use crate::core::ensemble::{EnsembleClassifier, ENSEMBLE_VERSION};
use crate::core::external::ExternalClassifier;
use crate::core::median_filter::{MedianFilter, MEDIANFILTER_VERSION};
use crate::core::model_driver::OpenOceans;
use crate::core::profile::RunProfile;
use crate::core::statistics::BathyStats;
use crate::io::granule::GranuleInfo;
use crate::io::parquet_writer::write_photon_parquet;
use crate::io::photon_reader::{read_beam, BeamInput};
use crate::io::settings::{OutputFormat, RunSettings};
use crate::types::{BathyError, BathyResult, BeamInfo, ClassifierKind, PhotonFrame};
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Instant;

#[cfg(feature = "parallel")]
use rayon::prelude::*;

/// Order in which classifier stages run; the ensemble reads the others
pub const STAGE_ORDER: [ClassifierKind; 6] = [
    ClassifierKind::CShelph,
    ClassifierKind::MedianFilter,
    ClassifierKind::BathyPathFinder,
    ClassifierKind::PointNet,
    ClassifierKind::OpenOceans,
    ClassifierKind::Ensemble,
];

/// Summary of a finished run
#[derive(Debug, Clone)]
pub struct RunReport {
    pub output: PathBuf,
    pub photons: usize,
    pub stages: Vec<ClassifierKind>,
    pub stats: BathyStats,
    pub profile: Value,
}

/// Runs a fixed sequence of classifier stages over a set of beams
pub struct EnsembleRunner {
    classifiers: Vec<Box<dyn PhotonClassifier>>,
}

impl EnsembleRunner {
    /// Build the stages enabled by the settings, in `STAGE_ORDER`
    pub fn from_settings(settings: &RunSettings, sliderule: Option<&Value>) -> BathyResult<Self> {
        let enabled = settings.enabled_classifiers(sliderule);
        let mut classifiers: Vec<Box<dyn PhotonClassifier>> = Vec::new();

        for kind in STAGE_ORDER {
            if !enabled.contains(&kind) {
                log::debug!("Classifier {} is not enabled", kind);
                continue;
            }
            let classifier: Box<dyn PhotonClassifier> = match kind {
                ClassifierKind::CShelph => Box::new(CShelph::with_params(settings.cshelph.clone())),
                ClassifierKind::MedianFilter => {
                    Box::new(MedianFilter::with_params(settings.medianfilter.clone()))
                }
                ClassifierKind::BathyPathFinder => {
                    Box::new(ExternalClassifier::bathypathfinder(&settings.bathypathfinder)?)
                }
                ClassifierKind::PointNet => Box::new(ExternalClassifier::pointnet(&settings.pointnet)?),
                ClassifierKind::OpenOceans => Box::new(OpenOceans::with_params(settings.openoceans.clone())),
                ClassifierKind::Ensemble => Box::new(EnsembleClassifier::new(&settings.ensemble)?),
                _ => continue,
            };
            classifiers.push(classifier);
        }

        for kind in &enabled {
            if !STAGE_ORDER.contains(kind) {
                log::debug!("{} labels are taken from the input predictions", kind);
            }
        }
        Ok(Self::with_classifiers(classifiers))
    }

    /// Run exactly these classifiers, in the given order
    pub fn with_classifiers(classifiers: Vec<Box<dyn PhotonClassifier>>) -> Self {
        Self { classifiers }
    }

    pub fn stages(&self) -> Vec<ClassifierKind> {
        self.classifiers.iter().map(|c| c.kind()).collect()
    }

    /// Run every stage over every beam, attaching each label column
    pub fn classify_beams(&self, beams: &mut [BeamInput], profile: &mut RunProfile) -> BathyResult<()> {
        for classifier in &self.classifiers {
            let kind = classifier.kind();
            log::info!("Running {} on {} beams", kind, beams.len());
            let start = Instant::now();

            let outputs = run_stage(classifier.as_ref(), beams)?;
            for (input, output) in beams.iter_mut().zip(outputs) {
                attach(kind, input, output)?;
            }

            let elapsed = start.elapsed().as_secs_f64();
            log::info!("{} completed in {:.3} seconds", kind, elapsed);
            profile.record(kind.name(), elapsed);
        }
        Ok(())
    }
}

/// Failures that already name their cause are kept; anything else is
/// reported against the classifier and beam
fn stage_error(kind: ClassifierKind, beam: &BeamInfo, error: BathyError) -> BathyError {
    match error {
        e @ (BathyError::InvalidInput(_)
        | BathyError::MissingColumn { .. }
        | BathyError::Classifier { .. }) => e,
        other => BathyError::Classifier {
            classifier: kind,
            beam: beam.beam,
            message: other.to_string(),
        },
    }
}

fn classify_one(classifier: &dyn PhotonClassifier, input: &BeamInput) -> BathyResult<ClassifierOutput> {
    log::debug!("{}: classifying {} photons of {}", classifier.kind(), input.frame.len(), input.info.beam);
    classifier
        .classify(&input.info, input.frame.clone())
        .map_err(|e| stage_error(classifier.kind(), &input.info, e))
}

/// Classify all beams on a pool sized for this classifier
#[cfg(feature = "parallel")]
fn run_stage(classifier: &dyn PhotonClassifier, beams: &[BeamInput]) -> BathyResult<Vec<ClassifierOutput>> {
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(classifier.workers().max(1))
        .build()?;
    pool.install(|| {
        beams
            .par_iter()
            .map(|input| classify_one(classifier, input))
            .collect()
    })
}

#[cfg(not(feature = "parallel"))]
fn run_stage(classifier: &dyn PhotonClassifier, beams: &[BeamInput]) -> BathyResult<Vec<ClassifierOutput>> {
    beams.iter().map(|input| classify_one(classifier, input)).collect()
}

fn attach(kind: ClassifierKind, input: &mut BeamInput, output: ClassifierOutput) -> BathyResult<()> {
    let n = input.frame.len();
    let beam = input.info.beam;
    let wrong_length = |what: &str, len: usize| BathyError::Classifier {
        classifier: kind,
        beam,
        message: format!("returned {} {} for {} photons", len, what, n),
    };
    if output.labels.len() != n {
        return Err(wrong_length("labels", output.labels.len()));
    }
    if let Some(confidence) = output.confidence {
        if confidence.len() != n {
            return Err(wrong_length("confidences", confidence.len()));
        }
        input.frame.confidence = Some(confidence);
    }
    input
        .frame
        .set_label(kind, output.labels)
        .map_err(|e| BathyError::Classifier {
            classifier: kind,
            beam,
            message: e.to_string(),
        })
}

/// Key/value metadata stored with the output
fn output_metadata(
    sliderule: Option<&Value>,
    settings: &RunSettings,
    profile: &RunProfile,
    stats: &BathyStats,
) -> BathyResult<BTreeMap<String, String>> {
    let mut request = match sliderule {
        Some(Value::Object(map)) => map.clone(),
        Some(_) => {
            log::warn!("sliderule metadata is not an object, starting from an empty one");
            Map::new()
        }
        None => Map::new(),
    };
    let cshelph = json!({ "version": CSHELPH_VERSION });
    let medianfilter = json!({ "version": MEDIANFILTER_VERSION });
    request.insert("cshelph".to_string(), cshelph.clone());
    request.insert("medianfilter".to_string(), medianfilter.clone());
    request.insert(
        "ensemble".to_string(),
        json!({
            "version": ENSEMBLE_VERSION,
            "model": settings.ensemble.ensemble_model_filename,
        }),
    );

    let mut metadata = BTreeMap::new();
    metadata.insert("sliderule".to_string(), Value::Object(request).to_string());
    metadata.insert("profile".to_string(), profile.to_json().to_string());
    metadata.insert("stats".to_string(), serde_json::to_string(stats)?);
    metadata.insert("cshelph".to_string(), cshelph.to_string());
    metadata.insert("medianfilter".to_string(), medianfilter.to_string());
    Ok(metadata)
}

#[cfg(feature = "hdf5")]
fn write_hdf5(
    path: &Path,
    frame: &PhotonFrame,
    beams: &[BeamInfo],
    granule: Option<&GranuleInfo>,
    sliderule: Option<&Value>,
    metadata: &BTreeMap<String, String>,
) -> BathyResult<()> {
    use crate::io::granule::RequestParameters;
    use crate::io::hdf5_writer::write_atl24;

    let granule = granule.ok_or_else(|| {
        BathyError::InvalidInput("hdf5 output requires a granule info file".to_string())
    })?;
    let rqst = sliderule.map(RequestParameters::from_sliderule).unwrap_or_default();
    write_atl24(path, frame, beams, granule, &rqst, metadata)
}

#[cfg(not(feature = "hdf5"))]
fn write_hdf5(
    _path: &Path,
    _frame: &PhotonFrame,
    _beams: &[BeamInfo],
    _granule: Option<&GranuleInfo>,
    _sliderule: Option<&Value>,
    _metadata: &BTreeMap<String, String>,
) -> BathyResult<()> {
    Err(BathyError::UnsupportedFormat(
        "hdf5 output requires the `hdf5` feature".to_string(),
    ))
}

/// Execute the run described by `settings`; the output file is the result
pub fn run(settings: &RunSettings) -> BathyResult<RunReport> {
    log::info!("Starting ensemble run, output to {}", settings.filename.display());
    let mut profile = RunProfile::new(settings.profile.clone(), settings.latch);

    let granule = match (settings.format, &settings.granule) {
        (OutputFormat::Hdf5, Some(path)) => Some(GranuleInfo::load(path)?),
        _ => None,
    };

    let mut beams = Vec::with_capacity(settings.beams.len());
    for (beam, path) in &settings.beams {
        beams.push(read_beam(path, *beam)?);
    }
    let sliderule = beams.iter().find_map(|b| b.sliderule.clone());

    let runner = EnsembleRunner::from_settings(settings, sliderule.as_ref())?;
    runner.classify_beams(&mut beams, &mut profile)?;

    let infos: Vec<BeamInfo> = beams.iter().map(|b| b.info).collect();
    let mut frame = PhotonFrame::concat(beams.into_iter().map(|b| b.frame).collect())?;
    log::info!("Merged {} photons from {} beams", frame.len(), infos.len());

    set_processing_flags(&mut frame);
    let selected = profile.time("corrections_duration", || apply_subaqueous_correction(&mut frame))?;
    let subaqueous = selected.iter().filter(|s| **s).count();
    log::debug!("Applied subaqueous correction to {} photons", subaqueous);

    let labels = final_labels(&frame);
    let stats = BathyStats::compute(&frame, &labels, subaqueous);
    profile.finish();

    let metadata = output_metadata(sliderule.as_ref(), settings, &profile, &stats)?;
    match settings.format {
        OutputFormat::Parquet => write_photon_parquet(&settings.filename, &frame, &metadata)?,
        OutputFormat::Hdf5 => write_hdf5(
            &settings.filename,
            &frame,
            &infos,
            granule.as_ref(),
            sliderule.as_ref(),
            &metadata,
        )?,
    }
    log::info!("Wrote {} photons to {}", frame.len(), settings.filename.display());

    Ok(RunReport {
        output: settings.filename.clone(),
        photons: frame.len(),
        stages: runner.stages(),
        stats,
        profile: profile.to_json(),
    })
}

//! Classifiers that run outside the process
//!
//! `bathypathfinder` and `pointnet` are driven through a configured command:
//! the beam is written to a scratch Parquet file, the command labels it and
//! writes a Parquet file holding one int8 column named after the classifier.
//! Without a command the labels exploded from the input `predictions`
//! column are used as-is.

use super::classifier::{ClassifierOutput, PhotonClassifier, DEFAULT_WORKERS};
use crate::io::parquet_writer::write_photon_parquet;
use crate::io::photon_reader::read_label_column;
use crate::types::{
    BathyError, BathyResult, BeamInfo, ClassifierKind, PhotonFrame, BATHYMETRY, SEA_SURFACE,
    UNCLASSIFIED,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::process::Command;

/// BathyPathFinder parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BathyPathFinderParams {
    pub tau: f64,
    pub k: usize,
    pub n: usize,
    pub find_surface: bool,
    /// Program and leading arguments
    #[serde(skip_serializing)]
    pub command: Option<Vec<String>>,
}

impl Default for BathyPathFinderParams {
    fn default() -> Self {
        Self {
            tau: 0.5,
            k: 15,
            n: 99,
            find_surface: false,
            command: None,
        }
    }
}

/// PointNet++ parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PointNetParams {
    pub model_filename: String,
    #[serde(rename = "maxElev")]
    pub max_elev: f64,
    #[serde(rename = "minElev")]
    pub min_elev: f64,
    #[serde(rename = "minSignalConf")]
    pub min_signal_conf: i32,
    pub gpu: String,
    pub num_point: usize,
    pub batch_size: usize,
    pub num_votes: usize,
    pub threshold: f64,
    pub model_seed: u64,
    /// Fraction of sea surface photons removed before inference
    #[serde(rename = "seaSurfaceDecimation")]
    pub sea_surface_decimation: f64,
    #[serde(skip_serializing)]
    pub command: Option<Vec<String>>,
}

impl Default for PointNetParams {
    fn default() -> Self {
        Self {
            model_filename: "/data/pointnet2_model.pth".to_string(),
            max_elev: 10.0,
            min_elev: -50.0,
            min_signal_conf: 3,
            gpu: "0".to_string(),
            num_point: 8192,
            batch_size: 8,
            num_votes: 10,
            threshold: 0.5,
            model_seed: 24,
            sea_surface_decimation: 0.8,
            command: None,
        }
    }
}

/// A classifier whose labels come from another program or from the input
pub struct ExternalClassifier {
    kind: ClassifierKind,
    command: Option<Vec<String>>,
    parameters: serde_json::Value,
    workers: usize,
}

impl ExternalClassifier {
    pub fn bathypathfinder(params: &BathyPathFinderParams) -> BathyResult<Self> {
        Ok(Self {
            kind: ClassifierKind::BathyPathFinder,
            command: params.command.clone(),
            parameters: serde_json::to_value(params)?,
            workers: DEFAULT_WORKERS,
        })
    }

    /// PointNet holds a GPU, so beams run one at a time
    pub fn pointnet(params: &PointNetParams) -> BathyResult<Self> {
        Ok(Self {
            kind: ClassifierKind::PointNet,
            command: params.command.clone(),
            parameters: serde_json::to_value(params)?,
            workers: 1,
        })
    }

    /// Parameters handed to the command, without the command itself
    pub fn parameters(&self) -> &serde_json::Value {
        &self.parameters
    }

    fn run_command(
        &self,
        command: &[String],
        beam: &BeamInfo,
        frame: &PhotonFrame,
    ) -> BathyResult<Vec<i8>> {
        let Some((program, leading)) = command.split_first() else {
            return Err(BathyError::InvalidParameter(format!(
                "{} command is empty",
                self.kind
            )));
        };

        let scratch = tempfile::Builder::new()
            .prefix(&format!("oceaneyes-{}-", self.kind))
            .tempdir()?;
        let input = scratch.path().join("input.parquet");
        let output = scratch.path().join("output.parquet");
        let parameters = scratch.path().join("parameters.json");

        let mut metadata = BTreeMap::new();
        metadata.insert(
            "meta".to_string(),
            serde_json::json!({
                "spot": beam.spot,
                "beam_strength": beam.strength,
                "beam": beam.beam,
            })
            .to_string(),
        );
        write_photon_parquet(&input, frame, &metadata)?;
        std::fs::write(&parameters, serde_json::to_vec_pretty(&self.parameters)?)?;

        log::debug!("{} {}: running {}", self.kind, beam.beam, program);
        let result = Command::new(program)
            .args(leading)
            .arg("--spot")
            .arg(beam.spot.to_string())
            .arg("--input")
            .arg(&input)
            .arg("--output")
            .arg(&output)
            .arg("--parameters")
            .arg(&parameters)
            .output()
            .map_err(|e| self.failure(beam, format!("failed to start {}: {}", program, e)))?;

        if !result.status.success() {
            let stderr = String::from_utf8_lossy(&result.stderr);
            return Err(self.failure(
                beam,
                format!("{} exited with {}: {}", program, result.status, stderr.trim()),
            ));
        }

        self.read_labels(&output, beam, frame.len())
    }

    fn read_labels(&self, path: &Path, beam: &BeamInfo, expected: usize) -> BathyResult<Vec<i8>> {
        let labels = read_label_column(path, self.kind.name())
            .map_err(|e| self.failure(beam, format!("unreadable output: {}", e)))?;
        if labels.len() != expected {
            return Err(self.failure(
                beam,
                format!("returned {} labels for {} photons", labels.len(), expected),
            ));
        }
        if let Some(bad) = labels
            .iter()
            .find(|c| !matches!(**c, UNCLASSIFIED | BATHYMETRY | SEA_SURFACE))
        {
            return Err(self.failure(beam, format!("returned class code {}", bad)));
        }
        Ok(labels)
    }

    fn failure(&self, beam: &BeamInfo, message: String) -> BathyError {
        BathyError::Classifier {
            classifier: self.kind,
            beam: beam.beam,
            message,
        }
    }
}

impl PhotonClassifier for ExternalClassifier {
    fn kind(&self) -> ClassifierKind {
        self.kind
    }

    fn workers(&self) -> usize {
        self.workers
    }

    fn classify(&self, beam: &BeamInfo, frame: PhotonFrame) -> BathyResult<ClassifierOutput> {
        if let Some(command) = &self.command {
            return self
                .run_command(command, beam, &frame)
                .map(ClassifierOutput::labels);
        }
        match frame.label(self.kind) {
            Some(labels) => {
                log::debug!("{} {}: using precomputed predictions", self.kind, beam.beam);
                Ok(ClassifierOutput::labels(labels.to_vec()))
            }
            None => Err(BathyError::InvalidInput(format!(
                "{} has no command configured and no precomputed predictions for {}",
                self.kind, beam.beam
            ))),
        }
    }
}

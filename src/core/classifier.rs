//! Uniform contract for every photon classifier run by the ensemble

use crate::types::{BathyResult, BeamInfo, ClassifierKind, PhotonFrame};

/// Worker pool size used by most classifier stages
pub const DEFAULT_WORKERS: usize = 6;

/// Labels (and optional bathymetry confidence) for one beam
#[derive(Debug, Clone, PartialEq)]
pub struct ClassifierOutput {
    pub labels: Vec<i8>,
    pub confidence: Option<Vec<f64>>,
}

impl ClassifierOutput {
    pub fn labels(labels: Vec<i8>) -> Self {
        Self {
            labels,
            confidence: None,
        }
    }
}

/// A classifier maps one beam's photons to a label column of the same length
pub trait PhotonClassifier: Send + Sync {
    /// Name under which the label column is attached
    fn kind(&self) -> ClassifierKind;

    /// Number of beams classified concurrently
    fn workers(&self) -> usize {
        DEFAULT_WORKERS
    }

    /// Classify an owned copy of the beam frame
    fn classify(&self, beam: &BeamInfo, frame: PhotonFrame) -> BathyResult<ClassifierOutput>;
}

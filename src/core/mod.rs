//! Core classification and correction modules

pub mod signal;
pub mod peaks;
pub mod gmm;
pub mod curve_fit;
pub mod waveform;
pub mod model_driver;
pub mod classifier;
pub mod median_filter;
pub mod cshelph;
pub mod external;  // classifiers run as subprocesses
pub mod ensemble;
pub mod corrections;
pub mod statistics;
pub mod profile;
pub mod runner;

// Re-export main types
pub use classifier::{ClassifierOutput, PhotonClassifier};
pub use waveform::{Waveform, WaveformClass, WaveformParams, QualityFlag};
pub use model_driver::{OpenOceans, OpenOceansParams, OpenOceansResult};
pub use median_filter::{MedianFilter, MedianFilterParams};
pub use cshelph::{CShelph, CShelphParams};
pub use external::{ExternalClassifier, BathyPathFinderParams, PointNetParams};
pub use ensemble::{EnsembleClassifier, EnsembleParams, TreeEnsemble};
pub use statistics::BathyStats;
pub use profile::RunProfile;
pub use runner::{run, EnsembleRunner, RunReport};

//! OceanEyes: ICESat-2 bathymetric photon classification
//!
//! Runs an ensemble of photon classifiers over the beams of an ATL03 subset,
//! applies the subaqueous refraction correction to the ensemble's verdict and
//! writes the labeled photons as Parquet or as an ATL24 HDF5 granule.

pub mod types;
pub mod io;
pub mod core;

// Re-export main types and functions for easier access
pub use crate::types::{
    BathyError, BathyResult, Beam, BeamInfo, BeamStrength, ClassifierKind, PhotonClass,
    PhotonFrame,
};

pub use crate::io::RunSettings;
pub use crate::core::{run, EnsembleRunner, RunReport};

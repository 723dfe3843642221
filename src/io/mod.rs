//! I/O modules for photon tables, run settings and ATL24 products

pub mod settings;
pub mod photon_reader;
pub mod parquet_writer;
pub mod granule;
pub mod atl24_attributes;
#[cfg(feature = "hdf5")]
pub mod hdf5_writer;

pub use settings::{OutputFormat, RunSettings};
pub use photon_reader::{read_beam, BeamInput};
pub use parquet_writer::write_photon_parquet;
pub use granule::{GranuleInfo, RequestParameters};

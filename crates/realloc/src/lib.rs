//! `tractmap-realloc`: areal-weighted reallocation of census counts.
//!
//! Pure engine crate: receives pre-loaded tract and neighborhood layers,
//! returns reallocated tables with conservation checks. File IO and process
//! exit codes belong to the CLI.

pub mod config;
pub mod derive;
pub mod error;
pub mod export;
pub mod geometry;
pub mod index;
pub mod load;
pub mod merge;
pub mod model;
pub mod overlay;
pub mod pipeline;
pub mod reallocate;
pub mod units;
pub mod verify;

pub use config::PipelineConfig;
pub use error::ReallocError;
pub use merge::combine;
pub use model::{AttrValue, AttributeKind, Crs, Feature, FieldSpec, Layer, MergedTable, VintageTable};
pub use pipeline::{PipelineInput, PipelineResult, SourceInput};
pub use reallocate::{run, ReallocRequest};
pub use verify::{verify, ConservationCheck, Tolerance};

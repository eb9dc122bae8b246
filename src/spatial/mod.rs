//! Per-object spatialization: distance attenuation, focus windowing and
//! listener-relative rotation.

mod params;
mod processor;

pub use params::{AttenuationMode, AttenuationProps, FocusParams, SpatialParams};
pub use processor::SpatialProcessor;

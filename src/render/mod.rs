//! Mixing and rendering: the ambisonic accumulation bed, the head-locked
//! bed, and the pluggable field renderer that folds the mix to binaural
//! stereo.

mod bed;
mod field;

pub use bed::MixBed;
pub use field::{FieldRenderer, ReferenceFieldRenderer, SpeakerGridRenderer, encode_direction};

/// Order of the engine's internal ambisonic bed.
pub const BED_ORDER: usize = 2;
/// Channel count of the internal bed: (order + 1)^2.
pub const BED_CHANNELS: usize = (BED_ORDER + 1) * (BED_ORDER + 1);
/// Output channels of the final rendered mix.
pub const OUTPUT_CHANNELS: usize = 2;

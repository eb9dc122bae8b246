//! Channel layouts for spatial audio streams.
//!
//! Every queue and file object is configured with a [`ChannelLayout`] that
//! fixes how its interleaved samples are interpreted: how many channels a
//! frame carries, how many of them belong to the rotatable ambisonic field
//! and how many are head-locked. All enqueue/dequeue sample counts are
//! validated against the layout's channel count.

/// Spatial audio channel layout of a stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChannelLayout {
    /// 8 channels of hybrid ambisonics plus 2 channels of head-locked stereo.
    Hybrid8Stereo,
    /// 8 channels of hybrid ambisonics, no head-locked audio.
    Hybrid8,
    /// 6 channels of hybrid ambisonics plus 2 channels of head-locked stereo.
    Hybrid6Stereo,
    /// 6 channels of hybrid ambisonics.
    Hybrid6,
    /// 4 channels of hybrid ambisonics plus 2 channels of head-locked stereo.
    Hybrid4Stereo,
    /// 4 channels of hybrid ambisonics.
    Hybrid4,
    /// 4 channels of first-order ambisonics (ACN/SN3D).
    FirstOrder,
    /// 9 channels of second-order ambisonics (ACN/SN3D).
    SecondOrder,
    /// 9 channels of second-order ambisonics plus 2 channels of head-locked stereo.
    SecondOrderStereo,
    /// 2 channels of head-locked stereo, no ambisonic field.
    HeadLockedStereo,
    /// A single non-spatial channel.
    Mono,
    /// Plain stereo, rendered head-locked.
    Stereo,
}

impl ChannelLayout {
    /// Total number of interleaved channels in a frame of this layout.
    pub fn channel_count(self) -> usize {
        self.ambisonic_channels() + self.head_locked_channels()
    }

    /// Number of channels belonging to the rotatable ambisonic field.
    pub fn ambisonic_channels(self) -> usize {
        match self {
            Self::Hybrid8Stereo | Self::Hybrid8 => 8,
            Self::Hybrid6Stereo | Self::Hybrid6 => 6,
            Self::Hybrid4Stereo | Self::Hybrid4 | Self::FirstOrder => 4,
            Self::SecondOrder | Self::SecondOrderStereo => 9,
            Self::HeadLockedStereo | Self::Mono | Self::Stereo => 0,
        }
    }

    /// Number of head-locked channels, rendered without rotation.
    pub fn head_locked_channels(self) -> usize {
        match self {
            Self::Hybrid8Stereo
            | Self::Hybrid6Stereo
            | Self::Hybrid4Stereo
            | Self::SecondOrderStereo
            | Self::HeadLockedStereo
            | Self::Stereo => 2,
            Self::Mono => 1,
            _ => 0,
        }
    }

    /// True if the layout carries an ambisonic field.
    pub fn has_field(self) -> bool {
        self.ambisonic_channels() > 0
    }
}

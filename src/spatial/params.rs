//! Spatialization parameters attached to each playable object.

use crate::math::{Quat, Vec3};

/// Distance attenuation model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AttenuationMode {
    /// Logarithmic roll-off: 6 dB drop per doubling of distance at factor 1.
    #[default]
    Logarithmic,
    /// Linear roll-off from full gain at the minimum distance to silence at
    /// the maximum distance.
    Linear,
    /// No distance attenuation.
    Disabled,
}

/// Distance attenuation properties.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AttenuationProps {
    /// Distance after which attenuation kicks in.
    pub min_distance: f32,
    /// Distance at which attenuation stops.
    pub max_distance: f32,
    /// Roll-off curve factor; > 1 is steeper, < 1 shallower.
    pub factor: f32,
    /// Mute the object entirely at and beyond the maximum distance.
    pub max_distance_mute: bool,
}

impl Default for AttenuationProps {
    fn default() -> Self {
        Self {
            min_distance: 1.0,
            max_distance: 1000.0,
            factor: 1.0,
            max_distance_mute: false,
        }
    }
}

/// Focus effect: a directional window that leaves a region of the mix at
/// full level and attenuates everything outside it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FocusParams {
    pub enabled: bool,
    /// Follow the listener's gaze instead of the fixed orientation.
    pub follow_listener: bool,
    /// Level outside the focus area, in dB. Clamped to [-24, 0].
    pub off_focus_level_db: f32,
    /// Full width of the focus area, in degrees. Clamped to [40, 120].
    pub width_degrees: f32,
    /// Orientation of the focus axis when not following the listener, from
    /// the listener's perspective.
    pub orientation: Quat,
}

impl FocusParams {
    pub const MIN_OFF_FOCUS_DB: f32 = -24.0;
    pub const MAX_OFF_FOCUS_DB: f32 = 0.0;
    pub const MIN_WIDTH_DEGREES: f32 = 40.0;
    pub const MAX_WIDTH_DEGREES: f32 = 120.0;

    pub fn set_off_focus_level_db(&mut self, db: f32) {
        self.off_focus_level_db = db.clamp(Self::MIN_OFF_FOCUS_DB, Self::MAX_OFF_FOCUS_DB);
    }

    pub fn set_width_degrees(&mut self, degrees: f32) {
        self.width_degrees = degrees.clamp(Self::MIN_WIDTH_DEGREES, Self::MAX_WIDTH_DEGREES);
    }
}

impl Default for FocusParams {
    fn default() -> Self {
        Self {
            enabled: false,
            follow_listener: true,
            off_focus_level_db: Self::MIN_OFF_FOCUS_DB,
            width_degrees: 90.0,
            orientation: Quat::IDENTITY,
        }
    }
}

/// The full spatial parameter set of an object, read by the render tick.
#[derive(Debug, Clone, Copy)]
pub struct SpatialParams {
    pub position: Vec3,
    pub rotation: Quat,
    pub attenuation_mode: AttenuationMode,
    pub attenuation: AttenuationProps,
    pub focus: FocusParams,
    /// When false the object bypasses spatialization and renders
    /// head-locked.
    pub spatialize: bool,
}

impl SpatialParams {
    /// Defaults for soundfield objects: no distance attenuation, the field
    /// sits on the listener.
    pub fn soundfield() -> Self {
        Self {
            position: Vec3::ZERO,
            rotation: Quat::IDENTITY,
            attenuation_mode: AttenuationMode::Disabled,
            attenuation: AttenuationProps::default(),
            focus: FocusParams::default(),
            spatialize: true,
        }
    }

    /// Defaults for positional point sources.
    pub fn point_source() -> Self {
        Self {
            position: Vec3::ZERO,
            rotation: Quat::IDENTITY,
            attenuation_mode: AttenuationMode::Logarithmic,
            attenuation: AttenuationProps::default(),
            focus: FocusParams::default(),
            spatialize: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_focus_clamping() {
        let mut focus = FocusParams::default();
        focus.set_off_focus_level_db(-90.0);
        assert_eq!(focus.off_focus_level_db, -24.0);
        focus.set_off_focus_level_db(6.0);
        assert_eq!(focus.off_focus_level_db, 0.0);
        focus.set_width_degrees(10.0);
        assert_eq!(focus.width_degrees, 40.0);
        focus.set_width_degrees(360.0);
        assert_eq!(focus.width_degrees, 120.0);
    }

    #[test]
    fn test_attenuation_defaults() {
        let props = AttenuationProps::default();
        assert_eq!(props.min_distance, 1.0);
        assert_eq!(props.max_distance, 1000.0);
        assert_eq!(props.factor, 1.0);
        assert!(!props.max_distance_mute);
    }
}

//! Per-tick spatial gain computation.
//!
//! The processor takes a snapshot of the listener pose at the start of each
//! render tick and computes, per object, the composed gain (distance
//! attenuation and focus window) and the listener-relative rotation handed
//! to the field renderer.

use crate::math::{Quat, Vec3, db_to_linear};
use crate::spatial::params::{AttenuationMode, AttenuationProps, FocusParams, SpatialParams};

/// Listener pose snapshot used for one render tick.
#[derive(Debug, Clone, Copy)]
pub struct SpatialProcessor {
    listener_position: Vec3,
    listener_rotation: Quat,
}

impl SpatialProcessor {
    pub fn new(listener_position: Vec3, listener_rotation: Quat) -> Self {
        Self {
            listener_position,
            listener_rotation: listener_rotation.normalize(),
        }
    }

    pub fn listener_position(&self) -> Vec3 {
        self.listener_position
    }

    /// Distance attenuation gain for an object at `position`.
    pub fn attenuation_gain(
        &self,
        mode: AttenuationMode,
        props: &AttenuationProps,
        position: Vec3,
    ) -> f32 {
        let distance = (position - self.listener_position).length();
        distance_gain(mode, props, distance)
    }

    /// Focus window gain for an object at `position`. Objects inside the
    /// focus cone are untouched; outside it the gain rolls off along a
    /// cosine window down to the off-focus level.
    pub fn focus_gain(&self, focus: &FocusParams, position: Vec3) -> f32 {
        if !focus.enabled {
            return 1.0;
        }
        let to_object = position - self.listener_position;
        if to_object.length_squared() < 1e-9 {
            // The object sits on the listener; it has no direction to be
            // outside the focus area.
            return 1.0;
        }
        let axis = if focus.follow_listener {
            self.listener_rotation * (-Vec3::Z)
        } else {
            self.listener_rotation * (focus.orientation * (-Vec3::Z))
        };
        let angle = axis.angle_between(to_object);
        let half_width = focus.width_degrees.to_radians() * 0.5;
        let off_level = db_to_linear(focus.off_focus_level_db);
        if angle <= half_width {
            return 1.0;
        }
        // Cosine roll-off over one further half-width beyond the cone edge.
        let t = ((angle - half_width) / half_width).min(1.0);
        let window = 0.5 * (1.0 + (std::f32::consts::PI * t).cos());
        off_level + (1.0 - off_level) * window
    }

    /// Rotation of an object's soundfield relative to the listener: the
    /// object rotation composed with the inverse listener rotation. Fed to
    /// the field renderer's rotation transform.
    pub fn relative_rotation(&self, object_rotation: Quat) -> Quat {
        (self.listener_rotation.inverse() * object_rotation).normalize()
    }

    /// Direction from the listener to `position` in the listener's frame.
    /// Returns `None` for an object on the listener.
    pub fn relative_direction(&self, position: Vec3) -> Option<Vec3> {
        let world = position - self.listener_position;
        if world.length_squared() < 1e-9 {
            return None;
        }
        Some((self.listener_rotation.inverse() * world).normalize())
    }

    /// Composed spatial gain for an object: attenuation and focus.
    pub fn spatial_gain(&self, params: &SpatialParams) -> f32 {
        let attenuation =
            self.attenuation_gain(params.attenuation_mode, &params.attenuation, params.position);
        let focus = self.focus_gain(&params.focus, params.position);
        attenuation * focus
    }
}

/// Gain of the distance attenuation curve at `distance`.
pub fn distance_gain(mode: AttenuationMode, props: &AttenuationProps, distance: f32) -> f32 {
    if props.max_distance_mute && distance >= props.max_distance {
        return 0.0;
    }
    match mode {
        AttenuationMode::Disabled => 1.0,
        AttenuationMode::Logarithmic => {
            if distance <= props.min_distance {
                1.0
            } else {
                let gain = 1.0 / (1.0 + props.factor * (distance - props.min_distance));
                gain.clamp(0.0, 1.0)
            }
        }
        AttenuationMode::Linear => {
            if distance <= props.min_distance {
                1.0
            } else if distance >= props.max_distance {
                0.0
            } else {
                let span = props.max_distance - props.min_distance;
                if span <= 0.0 {
                    0.0
                } else {
                    1.0 - (distance - props.min_distance) / span
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn props(min: f32, max: f32, factor: f32, mute: bool) -> AttenuationProps {
        AttenuationProps {
            min_distance: min,
            max_distance: max,
            factor,
            max_distance_mute: mute,
        }
    }

    #[test]
    fn test_unity_gain_at_min_distance() {
        let p = props(2.0, 100.0, 1.0, false);
        assert_eq!(distance_gain(AttenuationMode::Logarithmic, &p, 2.0), 1.0);
        assert_eq!(distance_gain(AttenuationMode::Linear, &p, 2.0), 1.0);
        assert_eq!(distance_gain(AttenuationMode::Logarithmic, &p, 0.5), 1.0);
    }

    #[test]
    fn test_max_distance_mute() {
        let p = props(1.0, 50.0, 1.0, true);
        for mode in [
            AttenuationMode::Logarithmic,
            AttenuationMode::Linear,
            AttenuationMode::Disabled,
        ] {
            assert_eq!(distance_gain(mode, &p, 50.0), 0.0);
            assert_eq!(distance_gain(mode, &p, 120.0), 0.0);
        }
        // Without mute, logarithmic keeps a residual tail.
        let p = props(1.0, 50.0, 1.0, false);
        assert!(distance_gain(AttenuationMode::Logarithmic, &p, 120.0) > 0.0);
    }

    #[test]
    fn test_logarithmic_curve_shape() {
        let p = props(1.0, 1000.0, 1.0, false);
        // Factor 1: doubling the distance from the minimum halves the gain.
        let g2 = distance_gain(AttenuationMode::Logarithmic, &p, 2.0);
        assert!((g2 - 0.5).abs() < 1e-6);
        let g3 = distance_gain(AttenuationMode::Logarithmic, &p, 3.0);
        assert!(g3 < g2);
        // A steeper factor attenuates faster.
        let steep = props(1.0, 1000.0, 4.0, false);
        assert!(distance_gain(AttenuationMode::Logarithmic, &steep, 2.0) < g2);
    }

    #[test]
    fn test_linear_curve_shape() {
        let p = props(10.0, 20.0, 1.0, false);
        let mid = distance_gain(AttenuationMode::Linear, &p, 15.0);
        assert!((mid - 0.5).abs() < 1e-6);
        assert_eq!(distance_gain(AttenuationMode::Linear, &p, 20.0), 0.0);
        assert_eq!(distance_gain(AttenuationMode::Linear, &p, 25.0), 0.0);
    }

    #[test]
    fn test_focus_window() {
        let processor = SpatialProcessor::new(Vec3::ZERO, Quat::IDENTITY);
        let mut focus = FocusParams {
            enabled: true,
            follow_listener: true,
            ..FocusParams::default()
        };
        focus.set_width_degrees(90.0);
        focus.set_off_focus_level_db(-24.0);

        // Straight ahead (-Z) is inside the cone.
        assert_eq!(processor.focus_gain(&focus, Vec3::new(0.0, 0.0, -5.0)), 1.0);
        // 30 degrees off axis is still inside the 45-degree half-width.
        let inside = Vec3::new(-(30f32.to_radians().sin()), 0.0, -(30f32.to_radians().cos()));
        assert_eq!(processor.focus_gain(&focus, inside * 3.0), 1.0);
        // Straight behind is fully attenuated to the off-focus level.
        let behind = processor.focus_gain(&focus, Vec3::new(0.0, 0.0, 5.0));
        assert!((behind - db_to_linear(-24.0)).abs() < 1e-3);
        // Between the edge and the far roll-off, the gain is in between.
        let side = processor.focus_gain(&focus, Vec3::new(-5.0, 0.0, -1.0));
        assert!(side < 1.0 && side > behind);
        // Disabled focus leaves everything untouched.
        focus.enabled = false;
        assert_eq!(processor.focus_gain(&focus, Vec3::new(0.0, 0.0, 5.0)), 1.0);
    }

    #[test]
    fn test_relative_rotation_identity_listener() {
        let processor = SpatialProcessor::new(Vec3::ZERO, Quat::IDENTITY);
        let object = Quat::from_rotation_y(0.5);
        let relative = processor.relative_rotation(object);
        assert!((relative.dot(object).abs() - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_relative_rotation_cancels_listener_turn() {
        // If the listener and the object both turn by the same yaw, the
        // relative rotation is the identity.
        let yaw = Quat::from_rotation_y(1.2);
        let processor = SpatialProcessor::new(Vec3::ZERO, yaw);
        let relative = processor.relative_rotation(yaw);
        assert!((relative.dot(Quat::IDENTITY).abs() - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_relative_direction() {
        // Listener turned 90 degrees left; an object straight ahead in world
        // space (-Z) appears to the listener's right (+X).
        let yaw = Quat::from_rotation_y(std::f32::consts::FRAC_PI_2);
        let processor = SpatialProcessor::new(Vec3::ZERO, yaw);
        let dir = processor.relative_direction(Vec3::new(0.0, 0.0, -4.0)).unwrap();
        assert!((dir - Vec3::X).length() < 1e-4);
        assert!(processor.relative_direction(Vec3::ZERO).is_none());
    }

    #[test]
    fn test_focus_behind_with_fixed_orientation() {
        // Focus axis fixed behind the listener: an object behind gets full
        // gain, one in front is attenuated.
        let processor = SpatialProcessor::new(Vec3::ZERO, Quat::IDENTITY);
        let focus = FocusParams {
            enabled: true,
            follow_listener: false,
            orientation: Quat::from_rotation_y(std::f32::consts::PI),
            ..FocusParams::default()
        };
        assert_eq!(processor.focus_gain(&focus, Vec3::new(0.0, 0.0, 5.0)), 1.0);
        assert!(processor.focus_gain(&focus, Vec3::new(0.0, 0.0, -5.0)) < 1.0);
    }
}

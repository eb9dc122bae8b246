//! Math types for Orbisonic

pub use glam::{Mat3, Quat, Vec3};

/// Position and orientation of a listener or sound object.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Pose {
    pub position: Vec3,
    pub rotation: Quat,
}

impl Pose {
    pub fn new(position: Vec3, rotation: Quat) -> Self {
        Self { position, rotation }
    }

    pub fn identity() -> Self {
        Self {
            position: Vec3::ZERO,
            rotation: Quat::IDENTITY,
        }
    }

    pub fn from_position(position: Vec3) -> Self {
        Self {
            position,
            rotation: Quat::IDENTITY,
        }
    }

    pub fn forward(&self) -> Vec3 {
        self.rotation * (-Vec3::Z)
    }

    pub fn up(&self) -> Vec3 {
        self.rotation * Vec3::Y
    }

    pub fn right(&self) -> Vec3 {
        self.rotation * Vec3::X
    }
}

impl Default for Pose {
    fn default() -> Self {
        Self::identity()
    }
}

/// Build a rotation from forward/up direction vectors.
///
/// The engine uses a -Z forward, +Y up, +X right convention, so
/// `rotation_from_vectors(-Vec3::Z, Vec3::Y)` is the identity.
pub fn rotation_from_vectors(forward: Vec3, up: Vec3) -> Quat {
    let f = forward.normalize_or_zero();
    if f == Vec3::ZERO {
        return Quat::IDENTITY;
    }
    let mut r = f.cross(up.normalize_or_zero());
    if r.length_squared() < 1e-6 {
        // Forward is collinear with up, pick an arbitrary right axis.
        r = f.cross(Vec3::X);
        if r.length_squared() < 1e-6 {
            r = f.cross(Vec3::Y);
        }
    }
    let r = r.normalize();
    let u = r.cross(f);
    Quat::from_mat3(&Mat3::from_cols(r, u, -f)).normalize()
}

/// Linear gain for a decibel value. 0 dB is unity.
pub fn db_to_linear(db: f32) -> f32 {
    10.0_f32.powf(db / 20.0)
}

/// Decibel value for a linear gain. Zero and negative gains map to -inf.
pub fn linear_to_db(gain: f32) -> f32 {
    if gain > 0.0 {
        20.0 * gain.log10()
    } else {
        f32::NEG_INFINITY
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rotation_from_vectors_identity() {
        let q = rotation_from_vectors(-Vec3::Z, Vec3::Y);
        let f = q * (-Vec3::Z);
        assert!((f - (-Vec3::Z)).length() < 1e-5);
    }

    #[test]
    fn test_rotation_from_vectors_turned() {
        // Facing +X, the rotated forward must be +X.
        let q = rotation_from_vectors(Vec3::X, Vec3::Y);
        let f = q * (-Vec3::Z);
        assert!((f - Vec3::X).length() < 1e-4);
        let u = q * Vec3::Y;
        assert!((u - Vec3::Y).length() < 1e-4);
    }

    #[test]
    fn test_db_conversion_round_trip() {
        assert!((db_to_linear(0.0) - 1.0).abs() < 1e-6);
        assert!((db_to_linear(-6.0) - 0.5012).abs() < 1e-3);
        assert!((linear_to_db(db_to_linear(-12.0)) + 12.0).abs() < 1e-4);
        assert_eq!(linear_to_db(0.0), f32::NEG_INFINITY);
    }
}

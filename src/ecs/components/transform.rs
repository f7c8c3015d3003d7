//! Transform components for body entities.

use glam::{DAffine3, DQuat, DVec3};

/// Rigid transform relative to the parent body (or the world for root bodies).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Transform {
    pub position: DVec3,
    pub rotation: DQuat,
}

impl Transform {
    /// Create an identity transform.
    pub fn identity() -> Self {
        Self {
            position: DVec3::ZERO,
            rotation: DQuat::IDENTITY,
        }
    }

    /// Create a transform from a position.
    pub fn from_position(position: DVec3) -> Self {
        Self {
            position,
            rotation: DQuat::IDENTITY,
        }
    }

    /// Create a transform from a rotation and a translation.
    pub fn from_rotation_translation(rotation: DQuat, position: DVec3) -> Self {
        Self { position, rotation }
    }

    /// Create a transform from URDF-style roll/pitch/yaw angles and a translation.
    pub fn from_xyz_rpy(xyz: [f64; 3], rpy: [f64; 3]) -> Self {
        let rotation = DQuat::from_euler(glam::EulerRot::ZYX, rpy[2], rpy[1], rpy[0]);
        Self {
            position: DVec3::from_array(xyz),
            rotation,
        }
    }

    /// Convert to an affine transform (translation * rotation).
    pub fn to_affine(&self) -> DAffine3 {
        DAffine3::from_rotation_translation(self.rotation, self.position)
    }

    /// Decompose an affine transform into a Transform.
    ///
    /// Any scale present in `affine` is discarded.
    pub fn from_affine(affine: DAffine3) -> Self {
        let (_, rotation, position) = affine.to_scale_rotation_translation();
        Self { position, rotation }
    }

    /// Compose `self * other`.
    pub fn mul_transform(&self, other: &Transform) -> Transform {
        Transform {
            position: self.position + self.rotation * other.position,
            rotation: (self.rotation * other.rotation).normalize(),
        }
    }

    /// Inverse rigid transform.
    pub fn inverse(&self) -> Transform {
        let rotation = self.rotation.inverse();
        Transform {
            position: -(rotation * self.position),
            rotation,
        }
    }
}

impl Default for Transform {
    fn default() -> Self {
        Self::identity()
    }
}

/// World-space pose of a body frame. Updated every tick by `transform_system`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GlobalTransform(pub DAffine3);

impl GlobalTransform {
    /// World position of the frame origin.
    #[inline]
    pub fn translation(&self) -> DVec3 {
        self.0.translation
    }

    /// World orientation of the frame.
    #[inline]
    pub fn rotation(&self) -> DQuat {
        DQuat::from_mat3(&self.0.matrix3)
    }

    /// Transform a point from this frame into world coordinates.
    #[inline]
    pub fn transform_point(&self, point: DVec3) -> DVec3 {
        self.0.transform_point3(point)
    }

    /// Rotate a vector from this frame into world coordinates.
    #[inline]
    pub fn transform_vector(&self, vector: DVec3) -> DVec3 {
        self.0.transform_vector3(vector)
    }
}

impl Default for GlobalTransform {
    fn default() -> Self {
        Self(DAffine3::IDENTITY)
    }
}

/// Reference to a parent body entity.
pub struct Parent(pub hecs::Entity);

/// List of child body entities.
pub struct Children(pub Vec<hecs::Entity>);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity() {
        let t = Transform::identity();
        assert_eq!(t.position, DVec3::ZERO);
        assert_eq!(t.rotation, DQuat::IDENTITY);
        assert_eq!(t.to_affine(), DAffine3::IDENTITY);
    }

    #[test]
    fn test_affine_roundtrip() {
        let original = Transform {
            position: DVec3::new(1.0, 2.0, 3.0),
            rotation: DQuat::from_rotation_y(std::f64::consts::FRAC_PI_4),
        };

        let recovered = Transform::from_affine(original.to_affine());

        let eps = 1e-12;
        assert!((original.position - recovered.position).length() < eps);
        // Quaternion can be negated and still represent the same rotation
        let dot = original.rotation.dot(recovered.rotation).abs();
        assert!((dot - 1.0).abs() < eps);
    }

    #[test]
    fn test_compose_with_inverse_is_identity() {
        let t = Transform {
            position: DVec3::new(-0.3, 0.7, 1.1),
            rotation: DQuat::from_rotation_z(0.4) * DQuat::from_rotation_x(-1.2),
        };
        let identity = t.mul_transform(&t.inverse());

        assert!(identity.position.length() < 1e-12);
        assert!((identity.rotation.dot(DQuat::IDENTITY).abs() - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_rpy_matches_urdf_convention() {
        // URDF applies roll about X, then pitch about Y, then yaw about Z (fixed axes).
        let t = Transform::from_xyz_rpy([0.0; 3], [0.0, 0.0, std::f64::consts::FRAC_PI_2]);
        let rotated = t.rotation * DVec3::X;
        assert!((rotated - DVec3::Y).length() < 1e-12);
    }

    #[test]
    fn test_global_transform_default() {
        let gt = GlobalTransform::default();
        assert_eq!(gt.0, DAffine3::IDENTITY);
        assert_eq!(gt.translation(), DVec3::ZERO);
    }
}

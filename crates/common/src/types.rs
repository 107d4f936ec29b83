use glam::{Mat4, Quat, Vec3};
use serde::{Deserialize, Serialize};

/// Stable identifier for an entity in the scene.
///
/// The same integer is written into the object-id buffer, so `0` is never a
/// valid entity id (see [`ObjectId`]). Everything above [`EntityId::MAX`] is
/// reserved for gizmo handles and the gizmo sentinel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntityId(pub u32);

impl EntityId {
    /// First id handed out by a fresh world.
    pub const FIRST: Self = Self(1);
    /// Largest id an entity may carry.
    pub const MAX: Self = Self(0xFFFF_FEFF);

    /// Checked constructor that rejects the reserved object-id values.
    pub fn new(raw: u32) -> Result<Self, IdError> {
        if raw == ObjectId::NONE.0 || raw > Self::MAX.0 {
            return Err(IdError::Reserved(raw));
        }
        Ok(Self(raw))
    }

    /// The value this entity writes into the object-id channel.
    pub fn object_id(self) -> ObjectId {
        ObjectId(self.0)
    }
}

impl std::fmt::Display for EntityId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Errors from id construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum IdError {
    #[error("id {0:#x} is reserved in the object-id space")]
    Reserved(u32),
    #[error("entity id space exhausted")]
    Exhausted,
}

/// A value read from the object-id buffer.
///
/// `NONE` is background, `GIZMO` marks gizmo and grid pixels, everything else
/// is exactly one live entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ObjectId(pub u32);

impl ObjectId {
    pub const NONE: Self = Self(0);
    pub const GIZMO: Self = Self(u32::MAX);

    pub fn is_none(self) -> bool {
        self == Self::NONE
    }

    pub fn is_gizmo(self) -> bool {
        self == Self::GIZMO
    }

    /// The entity this value refers to, if it is neither background nor gizmo.
    pub fn entity(self) -> Option<EntityId> {
        EntityId::new(self.0).ok()
    }
}

impl From<EntityId> for ObjectId {
    fn from(id: EntityId) -> Self {
        id.object_id()
    }
}

/// Spatial transform: position, rotation, scale.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Transform {
    pub position: Vec3,
    pub rotation: Quat,
    pub scale: Vec3,
}

impl Default for Transform {
    fn default() -> Self {
        Self::IDENTITY
    }
}

impl Transform {
    pub const IDENTITY: Self = Self {
        position: Vec3::ZERO,
        rotation: Quat::IDENTITY,
        scale: Vec3::ONE,
    };

    pub fn from_position(position: Vec3) -> Self {
        Self {
            position,
            ..Self::IDENTITY
        }
    }

    pub fn to_matrix(&self) -> Mat4 {
        Mat4::from_scale_rotation_translation(self.scale, self.rotation, self.position)
    }

    pub fn from_matrix(m: Mat4) -> Self {
        let (scale, rotation, position) = m.to_scale_rotation_translation();
        Self {
            position,
            rotation,
            scale,
        }
    }

    /// Compose `self` (parent) with `child`, giving the child's transform in
    /// the parent's space.
    pub fn mul_transform(&self, child: &Transform) -> Transform {
        Transform {
            position: self.position + self.rotation * (self.scale * child.position),
            rotation: (self.rotation * child.rotation).normalize(),
            scale: self.scale * child.scale,
        }
    }

    /// Express the world-space transform `world` relative to `self`.
    ///
    /// Zero scale components on `self` are treated as one so the result stays
    /// finite.
    pub fn relative(&self, world: &Transform) -> Transform {
        let inv_rotation = self.rotation.inverse();
        let inv_scale = safe_recip(self.scale);
        Transform {
            position: inv_rotation * (world.position - self.position) * inv_scale,
            rotation: (inv_rotation * world.rotation).normalize(),
            scale: world.scale * inv_scale,
        }
    }

    /// Largest absolute scale component; used for bounding-sphere scaling.
    pub fn max_abs_scale(&self) -> f32 {
        self.scale.abs().max_element()
    }

    pub fn approx_eq(&self, other: &Transform, eps: f32) -> bool {
        self.position.abs_diff_eq(other.position, eps)
            && self.scale.abs_diff_eq(other.scale, eps)
            // q and -q are the same rotation
            && self.rotation.dot(other.rotation).abs() >= 1.0 - eps
    }

    pub fn is_finite(&self) -> bool {
        self.position.is_finite() && self.rotation.is_finite() && self.scale.is_finite()
    }
}

fn safe_recip(v: Vec3) -> Vec3 {
    let r = |x: f32| if x.abs() > f32::EPSILON { 1.0 / x } else { 1.0 };
    Vec3::new(r(v.x), r(v.y), r(v.z))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reserved_ids_rejected() {
        assert_eq!(EntityId::new(0), Err(IdError::Reserved(0)));
        assert_eq!(EntityId::new(u32::MAX), Err(IdError::Reserved(u32::MAX)));
        assert_eq!(EntityId::new(7), Ok(EntityId(7)));
    }

    #[test]
    fn top_of_id_space_is_reserved() {
        assert_eq!(EntityId::new(EntityId::MAX.0), Ok(EntityId::MAX));
        for raw in [0xFFFF_FF00, 0xFFFF_FF01, 0xFFFF_FF0D, u32::MAX - 1] {
            assert_eq!(EntityId::new(raw), Err(IdError::Reserved(raw)));
            assert_eq!(ObjectId(raw).entity(), None);
        }
    }

    #[test]
    fn object_id_classification() {
        assert!(ObjectId::NONE.entity().is_none());
        assert!(ObjectId::GIZMO.entity().is_none());
        assert_eq!(ObjectId(3).entity(), Some(EntityId(3)));
        assert_eq!(ObjectId::from(EntityId(9)), ObjectId(9));
    }

    #[test]
    fn transform_default_is_identity() {
        let t = Transform::default();
        assert_eq!(t.position, Vec3::ZERO);
        assert_eq!(t.rotation, Quat::IDENTITY);
        assert_eq!(t.scale, Vec3::ONE);
    }

    #[test]
    fn compose_then_relative_recovers_child() {
        let parent = Transform {
            position: Vec3::new(1.0, 2.0, 3.0),
            rotation: Quat::from_rotation_y(0.7),
            scale: Vec3::splat(2.0),
        };
        let child = Transform {
            position: Vec3::new(-1.0, 0.5, 4.0),
            rotation: Quat::from_rotation_x(0.3),
            scale: Vec3::new(1.0, 3.0, 0.5),
        };
        let world = parent.mul_transform(&child);
        let back = parent.relative(&world);
        assert!(back.approx_eq(&child, 1e-4));
    }

    #[test]
    fn matrix_matches_composition() {
        let parent = Transform {
            position: Vec3::new(0.0, 1.0, 0.0),
            rotation: Quat::from_rotation_z(1.1),
            scale: Vec3::splat(1.5),
        };
        let child = Transform::from_position(Vec3::X);
        let composed = parent.mul_transform(&child).to_matrix();
        let via_matrix = parent.to_matrix() * child.to_matrix();
        assert!(composed.abs_diff_eq(via_matrix, 1e-5));
    }

    #[test]
    fn relative_to_zero_scale_stays_finite() {
        let parent = Transform {
            scale: Vec3::new(0.0, 1.0, 1.0),
            ..Transform::default()
        };
        let rel = parent.relative(&Transform::from_position(Vec3::ONE));
        assert!(rel.is_finite());
    }

    #[test]
    fn max_abs_scale_uses_magnitude() {
        let t = Transform {
            scale: Vec3::new(1.0, -4.0, 2.0),
            ..Transform::default()
        };
        assert_eq!(t.max_abs_scale(), 4.0);
    }
}

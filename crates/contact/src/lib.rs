//! Sphere against plane overlap.
//!
//! Planes satisfy `normal · x + offset = 0` with a unit normal.

use glam::Vec3;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Sphere {
    pub center: Vec3,
    pub radius: f32,
}

impl Sphere {
    pub fn new(center: Vec3, radius: f32) -> Self {
        Self { center, radius }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Plane {
    normal: Vec3,
    offset: f32,
}

impl Plane {
    /// Plane `normal · x + offset = 0`, rescaled to a unit normal.
    /// `None` for a zero or non-finite normal.
    pub fn new(normal: Vec3, offset: f32) -> Option<Self> {
        let len = normal.length();
        let normal = normal.try_normalize()?;
        Some(Self {
            normal,
            offset: offset / len,
        })
    }

    pub fn from_point_normal(point: Vec3, normal: Vec3) -> Option<Self> {
        let normal = normal.try_normalize()?;
        Some(Self {
            normal,
            offset: -normal.dot(point),
        })
    }

    pub fn normal(&self) -> Vec3 {
        self.normal
    }

    pub fn offset(&self) -> f32 {
        self.offset
    }

    /// Signed distance of `point`, positive on the normal's side.
    pub fn distance(&self, point: Vec3) -> f32 {
        self.normal.dot(point) + self.offset
    }
}

/// Overlap report for one sphere/plane pair.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SphereContact {
    /// `radius - |distance|`: negative when separated, zero when touching,
    /// positive when penetrating.
    pub separation: f32,
    /// Point on the sphere surface closest to the plane.
    pub point: Vec3,
    /// Unit direction from the sphere center toward the plane.
    pub normal: Vec3,
}

impl SphereContact {
    pub fn is_touching(&self) -> bool {
        self.separation >= 0.0
    }
}

pub fn sphere_plane(sphere: &Sphere, plane: &Plane) -> SphereContact {
    let distance = plane.distance(sphere.center);
    // Center on the plane counts as the positive side.
    let normal = if distance >= 0.0 { -plane.normal } else { plane.normal };
    SphereContact {
        separation: sphere.radius - distance.abs(),
        point: sphere.center + normal * sphere.radius,
        normal,
    }
}

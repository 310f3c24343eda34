//! Pose math for spatial coordinates
//!
//! Minimal 3D math used by the localization layer: positions, unit
//! quaternions, and rigid poses. This is not a general-purpose linear
//! algebra library; it carries exactly the operations the localizers and
//! the coordinate transforms need.

/// 3D position or direction in meters.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Vec3 {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Vec3 {
    pub const ZERO: Vec3 = Vec3 {
        x: 0.0,
        y: 0.0,
        z: 0.0,
    };

    pub const fn new(x: f32, y: f32, z: f32) -> Self {
        Vec3 { x, y, z }
    }

    pub fn add(self, other: Vec3) -> Vec3 {
        Vec3::new(self.x + other.x, self.y + other.y, self.z + other.z)
    }

    pub fn sub(self, other: Vec3) -> Vec3 {
        Vec3::new(self.x - other.x, self.y - other.y, self.z - other.z)
    }

    pub fn scale(self, s: f32) -> Vec3 {
        Vec3::new(self.x * s, self.y * s, self.z * s)
    }

    pub fn dot(self, other: Vec3) -> f32 {
        self.x * other.x + self.y * other.y + self.z * other.z
    }

    pub fn cross(self, other: Vec3) -> Vec3 {
        Vec3::new(
            self.y * other.z - self.z * other.y,
            self.z * other.x - self.x * other.z,
            self.x * other.y - self.y * other.x,
        )
    }

    pub fn length(self) -> f32 {
        self.dot(self).sqrt()
    }

    pub fn distance(self, other: Vec3) -> f32 {
        self.sub(other).length()
    }

    /// Unit-length copy. Zero-length vectors stay zero rather than
    /// producing NaN.
    pub fn normalized(self) -> Vec3 {
        let len = self.length();
        if len <= f32::EPSILON {
            Vec3::ZERO
        } else {
            self.scale(1.0 / len)
        }
    }

    /// Projection of `self` onto `onto`.
    pub fn project_onto(self, onto: Vec3) -> Vec3 {
        let denom = onto.dot(onto);
        if denom <= f32::EPSILON {
            Vec3::ZERO
        } else {
            onto.scale(self.dot(onto) / denom)
        }
    }
}

/// Unit quaternion rotation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Quat {
    pub x: f32,
    pub y: f32,
    pub z: f32,
    pub w: f32,
}

impl Default for Quat {
    fn default() -> Self {
        Quat::IDENTITY
    }
}

impl Quat {
    pub const IDENTITY: Quat = Quat {
        x: 0.0,
        y: 0.0,
        z: 0.0,
        w: 1.0,
    };

    pub const fn new(x: f32, y: f32, z: f32, w: f32) -> Self {
        Quat { x, y, z, w }
    }

    /// Hamilton product: the rotation `other` followed by `self`.
    pub fn mul(self, other: Quat) -> Quat {
        Quat::new(
            self.w * other.x + self.x * other.w + self.y * other.z - self.z * other.y,
            self.w * other.y - self.x * other.z + self.y * other.w + self.z * other.x,
            self.w * other.z + self.x * other.y - self.y * other.x + self.z * other.w,
            self.w * other.w - self.x * other.x - self.y * other.y - self.z * other.z,
        )
    }

    /// Inverse rotation (assumes unit length).
    pub fn conjugate(self) -> Quat {
        Quat::new(-self.x, -self.y, -self.z, self.w)
    }

    pub fn normalized(self) -> Quat {
        let len = (self.x * self.x + self.y * self.y + self.z * self.z + self.w * self.w).sqrt();
        if len <= f32::EPSILON {
            Quat::IDENTITY
        } else {
            Quat::new(self.x / len, self.y / len, self.z / len, self.w / len)
        }
    }

    /// Rotate a vector by this quaternion.
    pub fn rotate_vec3(self, v: Vec3) -> Vec3 {
        let qv = Vec3::new(self.x, self.y, self.z);
        let t = qv.cross(v).scale(2.0);
        v.add(t.scale(self.w)).add(qv.cross(t))
    }

    /// Rotation about an axis (radians). The axis does not need to be
    /// normalized.
    pub fn from_axis_angle(axis: Vec3, angle: f32) -> Quat {
        let axis = axis.normalized();
        let half = angle * 0.5;
        let s = half.sin();
        Quat::new(axis.x * s, axis.y * s, axis.z * s, half.cos())
    }

    /// Rotation whose forward axis points along `forward` with `up` as the
    /// approximate up direction. Falls back to identity when `forward` is
    /// degenerate.
    pub fn look_rotation(forward: Vec3, up: Vec3) -> Quat {
        let f = forward.normalized();
        if f.length() <= f32::EPSILON {
            return Quat::IDENTITY;
        }

        let r = up.cross(f).normalized();
        let u = f.cross(r);

        // Basis [right, up, forward] to quaternion.
        let m00 = r.x;
        let m01 = u.x;
        let m02 = f.x;
        let m10 = r.y;
        let m11 = u.y;
        let m12 = f.y;
        let m20 = r.z;
        let m21 = u.z;
        let m22 = f.z;

        let trace = m00 + m11 + m22;
        let q = if trace > 0.0 {
            let s = (trace + 1.0).sqrt() * 2.0;
            Quat::new((m21 - m12) / s, (m02 - m20) / s, (m10 - m01) / s, s * 0.25)
        } else if m00 > m11 && m00 > m22 {
            let s = (1.0 + m00 - m11 - m22).sqrt() * 2.0;
            Quat::new(s * 0.25, (m01 + m10) / s, (m02 + m20) / s, (m21 - m12) / s)
        } else if m11 > m22 {
            let s = (1.0 + m11 - m00 - m22).sqrt() * 2.0;
            Quat::new((m01 + m10) / s, s * 0.25, (m12 + m21) / s, (m02 - m20) / s)
        } else {
            let s = (1.0 + m22 - m00 - m11).sqrt() * 2.0;
            Quat::new((m02 + m20) / s, (m12 + m21) / s, s * 0.25, (m10 - m01) / s)
        };
        q.normalized()
    }
}

/// Rigid transform: rotation then translation.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Pose {
    pub position: Vec3,
    pub rotation: Quat,
}

impl Pose {
    pub const IDENTITY: Pose = Pose {
        position: Vec3::ZERO,
        rotation: Quat::IDENTITY,
    };

    pub const fn new(position: Vec3, rotation: Quat) -> Self {
        Pose { position, rotation }
    }

    pub fn transform_point(&self, point: Vec3) -> Vec3 {
        self.rotation.rotate_vec3(point).add(self.position)
    }

    pub fn transform_rotation(&self, rotation: Quat) -> Quat {
        self.rotation.mul(rotation)
    }

    pub fn transform_pose(&self, pose: Pose) -> Pose {
        Pose::new(
            self.transform_point(pose.position),
            self.transform_rotation(pose.rotation),
        )
    }

    pub fn inverse(&self) -> Pose {
        let inv_rotation = self.rotation.conjugate();
        Pose::new(
            inv_rotation.rotate_vec3(self.position).scale(-1.0),
            inv_rotation,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx(a: Vec3, b: Vec3) -> bool {
        a.distance(b) < 1e-4
    }

    #[test]
    fn test_project_onto() {
        let v = Vec3::new(1.0, 1.0, 0.0);
        let onto = Vec3::new(2.0, 0.0, 0.0);
        assert!(approx(v.project_onto(onto), Vec3::new(1.0, 0.0, 0.0)));
    }

    #[test]
    fn test_quat_rotate_axis_angle() {
        // 90 degrees about +y sends +x to -z.
        let q = Quat::from_axis_angle(Vec3::new(0.0, 1.0, 0.0), std::f32::consts::FRAC_PI_2);
        let rotated = q.rotate_vec3(Vec3::new(1.0, 0.0, 0.0));
        assert!(approx(rotated, Vec3::new(0.0, 0.0, -1.0)));
    }

    #[test]
    fn test_look_rotation_forward() {
        let q = Quat::look_rotation(Vec3::new(0.0, 0.0, 1.0), Vec3::new(0.0, 1.0, 0.0));
        let forward = q.rotate_vec3(Vec3::new(0.0, 0.0, 1.0));
        assert!(approx(forward, Vec3::new(0.0, 0.0, 1.0)));
    }

    #[test]
    fn test_look_rotation_points_at_target() {
        let target = Vec3::new(1.0, 0.0, 1.0).normalized();
        let q = Quat::look_rotation(target, Vec3::new(0.0, 1.0, 0.0));
        let forward = q.rotate_vec3(Vec3::new(0.0, 0.0, 1.0));
        assert!(approx(forward, target));
    }

    #[test]
    fn test_pose_inverse_roundtrip() {
        let pose = Pose::new(
            Vec3::new(1.0, 2.0, 3.0),
            Quat::from_axis_angle(Vec3::new(0.0, 1.0, 0.0), 0.7),
        );
        let point = Vec3::new(-4.0, 5.0, 0.5);
        let roundtrip = pose.inverse().transform_point(pose.transform_point(point));
        assert!(approx(roundtrip, point));
    }
}

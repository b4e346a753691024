//! Pose data model.
//!
//! A [`Pose`] is one position + orientation sample streamed by a client.
//! Values are plain `f64`; nothing here enforces finiteness or quaternion
//! normalization, which is the job of [`crate::validator`].

use std::fmt;

/// Orientation of a pose.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Orientation {
    /// Unit quaternion, components ordered `[x, y, z, w]`.
    Quaternion([f64; 4]),
    /// Euler angles in radians, ordered `[roll, pitch, yaw]`.
    Euler([f64; 3]),
}

impl Orientation {
    /// Identity rotation as a quaternion.
    pub const IDENTITY: Self = Self::Quaternion([0.0, 0.0, 0.0, 1.0]);

    /// Component values in wire order.
    pub fn components(&self) -> &[f64] {
        match self {
            Self::Quaternion(q) => q,
            Self::Euler(e) => e,
        }
    }

    /// Field names matching [`Self::components`], used in error messages.
    pub fn component_names(&self) -> &'static [&'static str] {
        match self {
            Self::Quaternion(_) => &["orientation.x", "orientation.y", "orientation.z", "orientation.w"],
            Self::Euler(_) => &["orientation.roll", "orientation.pitch", "orientation.yaw"],
        }
    }

    /// Euclidean norm of the quaternion, `None` for Euler angles.
    pub fn quaternion_norm(&self) -> Option<f64> {
        match self {
            Self::Quaternion(q) => Some(q.iter().map(|c| c * c).sum::<f64>().sqrt()),
            Self::Euler(_) => None,
        }
    }
}

/// Spatial state of a tracked object at one instant.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Pose {
    /// Position `[x, y, z]`.
    pub position: [f64; 3],
    /// Orientation.
    pub orientation: Orientation,
}

/// Field names for [`Pose::position`].
pub const POSITION_FIELDS: [&str; 3] = ["position.x", "position.y", "position.z"];

impl Pose {
    /// Create a pose from a position and orientation.
    pub fn new(position: [f64; 3], orientation: Orientation) -> Self {
        Self { position, orientation }
    }

    /// Pose at the origin with identity rotation.
    pub fn origin() -> Self {
        Self::new([0.0; 3], Orientation::IDENTITY)
    }
}

impl fmt::Display for Pose {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [x, y, z] = self.position;
        write!(f, "pos=({x}, {y}, {z}) ")?;
        match self.orientation {
            Orientation::Quaternion([qx, qy, qz, qw]) => {
                write!(f, "quat=({qx}, {qy}, {qz}, {qw})")
            }
            Orientation::Euler([roll, pitch, yaw]) => {
                write!(f, "euler=({roll}, {pitch}, {yaw})")
            }
        }
    }
}

//! Domain checks for decoded poses.
//!
//! [`PoseValidator::validate`] is pure: it either returns the pose untouched
//! or a [`ValidationError`] naming the first offending field. Checks run in
//! a fixed order (finite position, finite orientation, position bounds,
//! quaternion norm), so the reported field is deterministic.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::constants::DEFAULT_QUATERNION_TOLERANCE;
use crate::pose::{Pose, POSITION_FIELDS};

/// A pose that decoded fine but is semantically invalid.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    /// NaN or infinite component.
    #[error("{field} is not finite ({value})")]
    NonFinite {
        /// Offending field.
        field: &'static str,
        /// Offending value.
        value: f64,
    },
    /// Position component outside the configured bounds.
    #[error("{field} = {value} is outside [{min}, {max}]")]
    OutOfRange {
        /// Offending field.
        field: &'static str,
        /// Offending value.
        value: f64,
        /// Inclusive lower bound.
        min: f64,
        /// Inclusive upper bound.
        max: f64,
    },
    /// Quaternion whose norm is too far from 1.
    #[error("orientation quaternion norm {norm} is outside 1 ± {tolerance}")]
    NotNormalized {
        /// Measured norm.
        norm: f64,
        /// Allowed deviation.
        tolerance: f64,
    },
}

impl ValidationError {
    /// Name of the field that failed validation.
    pub fn field(&self) -> &'static str {
        match self {
            Self::NonFinite { field, .. } | Self::OutOfRange { field, .. } => *field,
            Self::NotNormalized { .. } => "orientation",
        }
    }
}

/// Validation settings (the `validation` section of the config file).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidationConfig {
    /// Allowed deviation of a quaternion's norm from 1.
    pub quaternion_tolerance: f64,
    /// Inclusive per-axis lower bound for position. `None` = unbounded.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub position_min: Option<[f64; 3]>,
    /// Inclusive per-axis upper bound for position. `None` = unbounded.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub position_max: Option<[f64; 3]>,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            quaternion_tolerance: DEFAULT_QUATERNION_TOLERANCE,
            position_min: None,
            position_max: None,
        }
    }
}

impl ValidationConfig {
    /// Reject settings that would make every pose invalid (or none).
    pub fn check(&self) -> anyhow::Result<()> {
        if !self.quaternion_tolerance.is_finite() || self.quaternion_tolerance < 0.0 {
            anyhow::bail!(
                "quaternion_tolerance must be a non-negative number, got {}",
                self.quaternion_tolerance
            );
        }
        let min = self.position_min.unwrap_or([f64::NEG_INFINITY; 3]);
        let max = self.position_max.unwrap_or([f64::INFINITY; 3]);
        for (axis, field) in POSITION_FIELDS.iter().enumerate() {
            if min[axis].is_nan() || max[axis].is_nan() || min[axis] > max[axis] {
                anyhow::bail!(
                    "invalid bounds for {field}: min {} / max {}",
                    min[axis],
                    max[axis]
                );
            }
        }
        Ok(())
    }
}

/// Stateless pose checker shared by all sessions.
#[derive(Debug, Clone)]
pub struct PoseValidator {
    tolerance: f64,
    min: [f64; 3],
    max: [f64; 3],
}

impl Default for PoseValidator {
    fn default() -> Self {
        Self::new(&ValidationConfig::default())
    }
}

impl PoseValidator {
    /// Build a validator from config. Missing bounds are unbounded.
    pub fn new(config: &ValidationConfig) -> Self {
        Self {
            tolerance: config.quaternion_tolerance,
            min: config.position_min.unwrap_or([f64::NEG_INFINITY; 3]),
            max: config.position_max.unwrap_or([f64::INFINITY; 3]),
        }
    }

    /// Check a pose, returning it unchanged when valid.
    pub fn validate(&self, pose: Pose) -> Result<Pose, ValidationError> {
        for (&field, &value) in POSITION_FIELDS.iter().zip(&pose.position) {
            if !value.is_finite() {
                return Err(ValidationError::NonFinite { field, value });
            }
        }

        let orientation = &pose.orientation;
        for (&field, &value) in orientation.component_names().iter().zip(orientation.components()) {
            if !value.is_finite() {
                return Err(ValidationError::NonFinite { field, value });
            }
        }

        for (axis, &field) in POSITION_FIELDS.iter().enumerate() {
            let value = pose.position[axis];
            let (min, max) = (self.min[axis], self.max[axis]);
            if value < min || value > max {
                return Err(ValidationError::OutOfRange { field, value, min, max });
            }
        }

        if let Some(norm) = orientation.quaternion_norm() {
            if (norm - 1.0).abs() > self.tolerance {
                return Err(ValidationError::NotNormalized {
                    norm,
                    tolerance: self.tolerance,
                });
            }
        }

        Ok(pose)
    }
}

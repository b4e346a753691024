//! Wire codec for pose updates.
//!
//! One WebSocket message carries exactly one pose. Three encodings are
//! accepted:
//!
//! ```text
//! JSON text       {"pos":[x,y,z],"rot":[qx,qy,qz,qw]}    (rot may be [roll,pitch,yaw])
//! Delimited text  x,y,z,qx,qy,qz,qw                      (6 or 7 numbers; commas and/or whitespace)
//! Binary          [u8 kind][f64 LE ...]
//! ```
//!
//! Binary kinds:
//! - `0x01`: quaternion, 7 values (57 bytes)
//! - `0x02`: Euler angles, 6 values (49 bytes)
//!
//! `pos`/`rot` also accept the long names `position`/`orientation`; other
//! JSON keys are ignored. Text payloads starting with `{` are parsed as JSON.
//!
//! The codec only checks shape. Non-finite numbers decode fine and are
//! rejected later by [`crate::validator`].

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::pose::{Orientation, Pose};

/// Binary pose kind constants.
pub mod pose_kind {
    /// Position + quaternion (7 × f64).
    pub const QUATERNION: u8 = 0x01;
    /// Position + Euler angles (6 × f64).
    pub const EULER: u8 = 0x02;
}

/// Payload of one inbound WebSocket data message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RawFrame {
    /// UTF-8 text message.
    Text(String),
    /// Binary message.
    Binary(Vec<u8>),
}

/// Encoding used by [`encode`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum WireFormat {
    /// JSON object text message.
    Json,
    /// Comma-delimited numeric text message.
    Text,
    /// Binary message with a kind byte.
    Binary,
}

/// Why a payload could not be turned into a [`Pose`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    /// Payload was empty or whitespace only.
    #[error("empty payload")]
    Empty,
    /// JSON text that does not match the pose schema.
    #[error("invalid JSON pose: {0}")]
    Json(String),
    /// A field or the whole payload had the wrong number of values.
    #[error("{field} has {found} values, expected {expected}")]
    Arity {
        /// Field (or `pose` for delimited/binary payloads).
        field: &'static str,
        /// Accepted value counts.
        expected: &'static str,
        /// Count actually received.
        found: usize,
    },
    /// A delimited token that is not a number.
    #[error("token {index} is not a number: {token:?}")]
    NotNumeric {
        /// Zero-based token index.
        index: usize,
        /// Offending token.
        token: String,
    },
    /// Binary payload with an unrecognized kind byte.
    #[error("unknown binary pose kind 0x{0:02x}")]
    UnknownKind(u8),
    /// Binary payload whose length does not match its kind.
    #[error("binary pose kind 0x{kind:02x} must be {expected} bytes, got {found}")]
    BinaryLength {
        /// Kind byte.
        kind: u8,
        /// Required total length.
        expected: usize,
        /// Actual total length.
        found: usize,
    },
}

/// JSON schema of a pose message.
#[derive(Debug, Serialize, Deserialize)]
struct JsonPose {
    #[serde(alias = "position")]
    pos: Vec<f64>,
    #[serde(alias = "orientation")]
    rot: Vec<f64>,
}

/// Decode one raw frame into a pose.
pub fn decode(raw: &RawFrame) -> Result<Pose, DecodeError> {
    match raw {
        RawFrame::Text(text) => {
            let text = text.trim();
            if text.is_empty() {
                return Err(DecodeError::Empty);
            }
            if text.starts_with('{') {
                decode_json(text)
            } else {
                decode_delimited(text)
            }
        }
        RawFrame::Binary(data) => decode_binary(data),
    }
}

/// Encode a pose in the given wire format.
///
/// For every pose with finite values, `decode(&encode(p, f)) == Ok(p)`.
pub fn encode(pose: &Pose, format: WireFormat) -> RawFrame {
    match format {
        WireFormat::Json => {
            let json = JsonPose {
                pos: pose.position.to_vec(),
                rot: pose.orientation.components().to_vec(),
            };
            // Vec<f64> fields cannot fail to serialize.
            RawFrame::Text(serde_json::to_string(&json).unwrap_or_default())
        }
        WireFormat::Text => {
            let text = pose
                .position
                .iter()
                .chain(pose.orientation.components())
                .map(f64::to_string)
                .collect::<Vec<_>>()
                .join(",");
            RawFrame::Text(text)
        }
        WireFormat::Binary => {
            let (kind, values) = match pose.orientation {
                Orientation::Quaternion(_) => (pose_kind::QUATERNION, 7),
                Orientation::Euler(_) => (pose_kind::EULER, 6),
            };
            let mut buf = Vec::with_capacity(1 + values * 8);
            buf.push(kind);
            for value in pose.position.iter().chain(pose.orientation.components()) {
                buf.extend_from_slice(&value.to_le_bytes());
            }
            RawFrame::Binary(buf)
        }
    }
}

fn decode_json(text: &str) -> Result<Pose, DecodeError> {
    let parsed: JsonPose =
        serde_json::from_str(text).map_err(|e| DecodeError::Json(e.to_string()))?;

    let position: [f64; 3] = parsed.pos.as_slice().try_into().map_err(|_| DecodeError::Arity {
        field: "pos",
        expected: "3",
        found: parsed.pos.len(),
    })?;

    let orientation = orientation_from(&parsed.rot).ok_or(DecodeError::Arity {
        field: "rot",
        expected: "3 or 4",
        found: parsed.rot.len(),
    })?;

    Ok(Pose::new(position, orientation))
}

/// Comma-separated fields are positional, so an empty one is an error.
/// Comma-free payloads split on any run of whitespace.
fn decode_delimited(text: &str) -> Result<Pose, DecodeError> {
    let text = text.trim();
    let tokens: Vec<&str> = if text.contains(',') {
        text.split(',').map(str::trim).collect()
    } else {
        text.split_whitespace().collect()
    };

    let values = tokens
        .into_iter()
        .enumerate()
        .map(|(index, token)| {
            token.parse::<f64>().map_err(|_| DecodeError::NotNumeric {
                index,
                token: token.to_string(),
            })
        })
        .collect::<Result<Vec<_>, _>>()?;

    pose_from_values(&values)
}

fn decode_binary(data: &[u8]) -> Result<Pose, DecodeError> {
    let (&kind, body) = data.split_first().ok_or(DecodeError::Empty)?;
    let count = match kind {
        pose_kind::QUATERNION => 7,
        pose_kind::EULER => 6,
        other => return Err(DecodeError::UnknownKind(other)),
    };

    let expected = 1 + count * 8;
    if data.len() != expected {
        return Err(DecodeError::BinaryLength {
            kind,
            expected,
            found: data.len(),
        });
    }

    let values: Vec<f64> = body
        .chunks_exact(8)
        .map(|chunk| {
            let mut bytes = [0u8; 8];
            bytes.copy_from_slice(chunk);
            f64::from_le_bytes(bytes)
        })
        .collect();

    pose_from_values(&values)
}

/// Split a flat `[x, y, z, orientation...]` list into a pose.
fn pose_from_values(values: &[f64]) -> Result<Pose, DecodeError> {
    let arity = || DecodeError::Arity {
        field: "pose",
        expected: "6 or 7",
        found: values.len(),
    };

    if values.len() < 3 {
        return Err(arity());
    }
    let (pos, rot) = values.split_at(3);
    let orientation = orientation_from(rot).ok_or_else(arity)?;
    Ok(Pose::new([pos[0], pos[1], pos[2]], orientation))
}

fn orientation_from(values: &[f64]) -> Option<Orientation> {
    match *values {
        [x, y, z, w] => Some(Orientation::Quaternion([x, y, z, w])),
        [roll, pitch, yaw] => Some(Orientation::Euler([roll, pitch, yaw])),
        _ => None,
    }
}

// SPDX-License-Identifier: MIT OR Apache-2.0
//! Agent identity and physical position.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Physical placement of the workstation inside a managed room.
///
/// Coordinates are grid indices, not pixels; `(0, 0)` is a valid corner
/// position. Negative values are never valid and are rejected by
/// [`Position::validate`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Position {
    /// Name of the room the workstation lives in.
    pub room_name: String,
    /// Zero-based column index within the room grid.
    pub pos_x: i64,
    /// Zero-based row index within the room grid.
    pub pos_y: i64,
}

/// Validation failures for a [`Position`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PositionError {
    /// The room name is empty or whitespace-only.
    #[error("room name must not be empty")]
    EmptyRoomName,
    /// A coordinate is negative.
    #[error("position coordinates must be >= 0 (got {x}, {y})")]
    NegativeCoordinate {
        /// Offending x value.
        x: i64,
        /// Offending y value.
        y: i64,
    },
}

impl Position {
    /// Create a position, validating it eagerly.
    pub fn new(room_name: impl Into<String>, pos_x: i64, pos_y: i64) -> Result<Self, PositionError> {
        let pos = Self {
            room_name: room_name.into(),
            pos_x,
            pos_y,
        };
        pos.validate()?;
        Ok(pos)
    }

    /// Check the position invariants: non-empty room, non-negative grid
    /// coordinates.
    pub fn validate(&self) -> Result<(), PositionError> {
        if self.room_name.trim().is_empty() {
            return Err(PositionError::EmptyRoomName);
        }
        if self.pos_x < 0 || self.pos_y < 0 {
            return Err(PositionError::NegativeCoordinate {
                x: self.pos_x,
                y: self.pos_y,
            });
        }
        Ok(())
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@({},{})", self.room_name, self.pos_x, self.pos_y)
    }
}

/// Immutable identity of one enrolled agent.
///
/// Created by the configure flow and only replaced by a re-configure;
/// the running agent treats it as read-only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentIdentity {
    /// Opaque identifier assigned at first configure.
    pub agent_id: String,
    /// Where this workstation sits.
    pub position: Position,
}

impl AgentIdentity {
    /// Generate a fresh identity with a random id.
    pub fn generate(position: Position) -> Self {
        Self {
            agent_id: uuid::Uuid::new_v4().to_string(),
            position,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn origin_is_a_valid_position() {
        assert!(Position::new("Lab 3", 0, 0).is_ok());
    }

    #[test]
    fn negative_coordinates_rejected() {
        let err = Position::new("Lab 3", -1, 2).unwrap_err();
        assert!(matches!(err, PositionError::NegativeCoordinate { x: -1, y: 2 }));
        assert!(Position::new("Lab 3", 4, -7).is_err());
    }

    #[test]
    fn empty_room_rejected() {
        assert_eq!(
            Position::new("   ", 0, 0).unwrap_err(),
            PositionError::EmptyRoomName
        );
    }

    #[test]
    fn serde_field_names_match_wire() {
        let pos = Position::new("Lab 3", 1, 2).unwrap();
        let json = serde_json::to_value(&pos).unwrap();
        assert_eq!(json["room_name"], "Lab 3");
        assert_eq!(json["pos_x"], 1);
        assert_eq!(json["pos_y"], 2);
    }

    #[test]
    fn generated_identities_are_unique() {
        let pos = Position::new("Lab 3", 0, 0).unwrap();
        let a = AgentIdentity::generate(pos.clone());
        let b = AgentIdentity::generate(pos);
        assert_ne!(a.agent_id, b.agent_id);
    }

    #[test]
    fn display_is_compact() {
        let pos = Position::new("Lab 3", 1, 2).unwrap();
        assert_eq!(pos.to_string(), "Lab 3@(1,2)");
    }
}

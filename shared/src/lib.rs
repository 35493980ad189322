use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use uuid::Uuid;

pub const DEFAULT_HOST: &str = "127.0.0.1";
pub const DEFAULT_PORT: u16 = 8080;
pub const SPAWN_X: f32 = 48.0;
pub const SPAWN_Y: f32 = 48.0;

/// Screen-space coordinates of one entity. Range checks belong to the renderer.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq)]
pub struct Position {
    pub x: f32,
    pub y: f32,
}

impl Position {
    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    pub fn spawn() -> Self {
        Self::new(SPAWN_X, SPAWN_Y)
    }

    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite()
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.x, self.y)
    }
}

/// Per-session identifier naming one participant's entity.
///
/// Generated once per client process as a random (v4) UUID in its hyphenated
/// 8-4-4-4-12 form. It is not a credential; uniqueness is all that matters.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(transparent)]
pub struct EntityId(String);

impl EntityId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().hyphenated().to_string())
    }

    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Messages carried as JSON text frames between clients and the relay.
///
/// Every packet names the entity it concerns, so receivers never have to
/// infer authorship from the connection it arrived on.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Packet {
    /// Latest position of `id`. `seq` increases with every move its author sends.
    Move {
        id: EntityId,
        seq: u64,
        x: f32,
        y: f32,
    },
    /// Emitted by the relay once the connection that announced `id` has closed.
    Leave { id: EntityId },
}

impl Packet {
    pub fn moved(id: EntityId, seq: u64, position: Position) -> Self {
        Packet::Move {
            id,
            seq,
            x: position.x,
            y: position.y,
        }
    }

    pub fn id(&self) -> &EntityId {
        match self {
            Packet::Move { id, .. } | Packet::Leave { id } => id,
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq)]
#[error("malformed message: {0}")]
pub struct MalformedMessage(pub String);

/// Serializes a packet into one JSON text frame.
///
/// JSON has no representation for NaN or infinity, so a `move` with
/// non-finite coordinates is refused instead of going out as `null`.
pub fn encode(packet: &Packet) -> Result<String, serde_json::Error> {
    if let Packet::Move { x, y, .. } = packet {
        if !Position::new(*x, *y).is_finite() {
            return Err(serde::ser::Error::custom(format!(
                "non-finite coordinates ({}, {})",
                x, y
            )));
        }
    }
    serde_json::to_string(packet)
}

pub fn decode(text: &str) -> Result<Packet, MalformedMessage> {
    let packet: Packet =
        serde_json::from_str(text).map_err(|e| MalformedMessage(e.to_string()))?;

    if packet.id().as_str().is_empty() {
        return Err(MalformedMessage("empty entity id".to_string()));
    }

    if let Packet::Move { x, y, .. } = &packet {
        if !Position::new(*x, *y).is_finite() {
            return Err(MalformedMessage(format!(
                "non-finite coordinates ({}, {})",
                x, y
            )));
        }
    }

    Ok(packet)
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;
    use std::collections::HashSet;

    #[test]
    fn test_entity_id_shape() {
        let id = EntityId::generate();
        let text = id.as_str();

        assert_eq!(text.len(), 36);
        let groups: Vec<&str> = text.split('-').collect();
        let lengths: Vec<usize> = groups.iter().map(|g| g.len()).collect();
        assert_eq!(lengths, vec![8, 4, 4, 4, 12]);
        assert!(groups
            .iter()
            .all(|g| g.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase())));

        // Version nibble and RFC 4122 variant bits
        assert_eq!(&text[14..15], "4");
        assert!(matches!(&text[19..20], "8" | "9" | "a" | "b"));
    }

    #[test]
    fn test_entity_id_uniqueness() {
        let ids: HashSet<EntityId> = (0..10_000).map(|_| EntityId::generate()).collect();
        assert_eq!(ids.len(), 10_000);
    }

    #[test]
    fn test_position_finite() {
        assert!(Position::new(1.0, -2.0).is_finite());
        assert!(!Position::new(f32::NAN, 0.0).is_finite());
        assert!(!Position::new(0.0, f32::INFINITY).is_finite());
        assert_eq!(Position::spawn(), Position::new(SPAWN_X, SPAWN_Y));
    }

    #[test]
    fn test_encode_refuses_non_finite_move() {
        let packet = Packet::moved(EntityId::new("abc"), 1, Position::new(f32::NAN, 0.0));
        assert!(encode(&packet).is_err());

        let packet = Packet::moved(EntityId::new("abc"), 1, Position::new(0.0, f32::INFINITY));
        assert!(encode(&packet).is_err());
    }

    #[test]
    fn test_encode_move_has_type_tag() {
        let packet = Packet::moved(EntityId::new("abc"), 3, Position::new(15.0, 25.0));
        let text = encode(&packet).unwrap();
        let value: serde_json::Value = serde_json::from_str(&text).unwrap();

        assert_eq!(value["type"], "move");
        assert_eq!(value["id"], "abc");
        assert_eq!(value["seq"], 3);
        assert_eq!(value["x"], 15.0);
        assert_eq!(value["y"], 25.0);
    }

    #[test]
    fn test_decode_move() {
        let packet = decode(r#"{"type":"move","id":"peer-1","seq":9,"x":48,"y":12.5}"#).unwrap();

        match packet {
            Packet::Move { id, seq, x, y } => {
                assert_eq!(id, EntityId::new("peer-1"));
                assert_eq!(seq, 9);
                assert_approx_eq!(x, 48.0);
                assert_approx_eq!(y, 12.5);
            }
            _ => panic!("Wrong packet type after decoding"),
        }
    }

    #[test]
    fn test_decode_leave() {
        let packet = decode(r#"{"type":"leave","id":"peer-2"}"#).unwrap();
        assert_eq!(packet, Packet::Leave { id: EntityId::new("peer-2") });
    }

    #[test]
    fn test_decode_missing_field() {
        let result = decode(r#"{"type":"move","id":"peer-1","seq":1,"x":10}"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_decode_non_numeric_coordinate() {
        let result = decode(r#"{"type":"move","id":"peer-1","seq":1,"x":"10","y":2}"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_decode_non_finite_coordinate() {
        // Fits in an f64 but overflows f32
        let result = decode(r#"{"type":"move","id":"peer-1","seq":1,"x":1e39,"y":2}"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_decode_rejects_untagged_and_unknown() {
        assert!(decode(r#"{"x":1,"y":2}"#).is_err());
        assert!(decode(r#"{"type":"teleport","id":"a","x":1,"y":2}"#).is_err());
        assert!(decode("not json").is_err());
        assert!(decode("").is_err());
    }

    #[test]
    fn test_decode_rejects_empty_id() {
        let result = decode(r#"{"type":"leave","id":""}"#);
        assert_eq!(
            result,
            Err(MalformedMessage("empty entity id".to_string()))
        );
    }
}

//! Drag gesture handling for the locally owned entity, plus the line-based
//! command surface that stands in for a pointer device.

use crate::table::LocalEntity;
use log::debug;
use shared::{EntityId, Position};
use std::str::FromStr;
use std::time::{Duration, Instant};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DragState {
    Idle,
    Dragging,
}

/// The local entity moved and the new position must be transmitted
#[derive(Debug, Clone, PartialEq)]
pub struct PositionChanged {
    pub id: EntityId,
    pub position: Position,
}

/// Translates begin/move/end gestures into local writes and change events.
///
/// Moves are applied to the local entry immediately so the mover sees no
/// latency. With a `min_move_interval`, move samples that arrive too soon after
/// the previous event still update the entry but emit nothing; `end` always
/// emits so the resting position reaches peers.
pub struct DragInputSession {
    state: DragState,
    entity: LocalEntity,
    min_move_interval: Option<Duration>,
    last_emit: Option<Instant>,
}

impl DragInputSession {
    pub fn new(entity: LocalEntity, min_move_interval: Option<Duration>) -> Self {
        Self {
            state: DragState::Idle,
            entity,
            min_move_interval,
            last_emit: None,
        }
    }

    /// Current gesture state
    pub fn state(&self) -> DragState {
        self.state
    }

    /// The renderer tints the entity while this is true
    pub fn is_highlighted(&self) -> bool {
        self.state == DragState::Dragging
    }

    /// Pointer pressed on the entity. Returns false if already dragging.
    pub fn begin(&mut self) -> bool {
        if self.state == DragState::Dragging {
            return false;
        }
        self.state = DragState::Dragging;
        self.last_emit = None;
        true
    }

    /// Drag sample. Moves the local entry right away and returns the change
    /// to transmit, unless idle, throttled, or the sample is not finite.
    pub fn move_to(&mut self, position: Position) -> Option<PositionChanged> {
        if self.state != DragState::Dragging {
            return None;
        }
        if !position.is_finite() {
            debug!("Ignoring non-finite drag sample {}", position);
            return None;
        }

        self.entity.set(position);

        let now = Instant::now();
        if let (Some(interval), Some(last)) = (self.min_move_interval, self.last_emit) {
            if now.duration_since(last) < interval {
                return None;
            }
        }

        self.last_emit = Some(now);
        Some(self.changed())
    }

    /// Pointer released. Emits the final position once.
    pub fn end(&mut self) -> Option<PositionChanged> {
        if self.state != DragState::Dragging {
            return None;
        }
        self.state = DragState::Idle;
        self.last_emit = None;
        Some(self.changed())
    }

    fn changed(&self) -> PositionChanged {
        PositionChanged {
            id: self.entity.id().clone(),
            position: self.entity.position(),
        }
    }
}

/// One line of client input
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Begin,
    Move(Position),
    End,
    /// Begin, move and end in one step
    Drag(Position),
    Show,
    Id,
    Quit,
}

/// A line that is not a known command, or has bad arguments
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("{0}")]
pub struct ParseCommandError(String);

impl FromStr for Command {
    type Err = ParseCommandError;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let mut words = line.split_whitespace();
        let verb = words
            .next()
            .ok_or_else(|| ParseCommandError("empty command".to_string()))?;
        let args: Vec<&str> = words.collect();

        let command = match (verb.to_ascii_lowercase().as_str(), args.as_slice()) {
            ("begin", []) => Command::Begin,
            ("end", []) => Command::End,
            ("show", []) => Command::Show,
            ("id", []) => Command::Id,
            ("quit" | "exit", []) => Command::Quit,
            ("move", [x, y]) => Command::Move(parse_position(x, y)?),
            ("drag", [x, y]) => Command::Drag(parse_position(x, y)?),
            _ => return Err(ParseCommandError(format!("unknown command: {}", line.trim()))),
        };

        Ok(command)
    }
}

fn parse_position(x: &str, y: &str) -> Result<Position, ParseCommandError> {
    let parse = |s: &str| {
        s.parse::<f32>()
            .ok()
            .filter(|v| v.is_finite())
            .ok_or_else(|| ParseCommandError(format!("invalid coordinate: {}", s)))
    };
    Ok(Position::new(parse(x)?, parse(y)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::PositionTable;
    use assert_approx_eq::assert_approx_eq;

    fn session(interval: Option<Duration>) -> (std::sync::Arc<PositionTable>, DragInputSession) {
        let (table, local) = PositionTable::new(EntityId::new("me"), Position::spawn());
        (table, DragInputSession::new(local, interval))
    }

    #[test]
    fn test_begin_emits_nothing() {
        let (table, mut drag) = session(None);

        assert!(drag.begin());
        assert_eq!(drag.state(), DragState::Dragging);
        assert!(drag.is_highlighted());
        assert!(!drag.begin());
        assert_eq!(table.local_position(), Position::spawn());
    }

    #[test]
    fn test_move_while_idle_is_ignored() {
        let (table, mut drag) = session(None);

        assert_eq!(drag.move_to(Position::new(1.0, 1.0)), None);
        assert_eq!(drag.end(), None);
        assert_eq!(table.local_position(), Position::spawn());
    }

    #[test]
    fn test_gesture_round_trip() {
        let (table, mut drag) = session(None);
        let mut emitted = Vec::new();

        drag.begin();
        emitted.extend(drag.move_to(Position::new(10.0, 20.0)));
        emitted.extend(drag.move_to(Position::new(15.0, 25.0)));
        emitted.extend(drag.end());

        assert_eq!(emitted.len(), 3);
        assert!(emitted.iter().all(|e| e.id == EntityId::new("me")));
        let last = emitted.last().unwrap();
        assert_approx_eq!(last.position.x, 15.0);
        assert_approx_eq!(last.position.y, 25.0);

        assert_eq!(drag.state(), DragState::Idle);
        assert!(!drag.is_highlighted());
        assert_eq!(table.local_position(), Position::new(15.0, 25.0));
    }

    #[test]
    fn test_throttled_moves_still_end_with_final_position() {
        let (table, mut drag) = session(Some(Duration::from_secs(60)));
        let mut emitted = Vec::new();

        drag.begin();
        emitted.extend(drag.move_to(Position::new(10.0, 20.0)));
        emitted.extend(drag.move_to(Position::new(15.0, 25.0)));

        // Only the first move went out, but the entry tracks every sample
        assert_eq!(emitted.len(), 1);
        assert_eq!(table.local_position(), Position::new(15.0, 25.0));

        emitted.extend(drag.end());
        assert_eq!(
            emitted.last().map(|e| e.position),
            Some(Position::new(15.0, 25.0))
        );
    }

    #[test]
    fn test_non_finite_sample_ignored() {
        let (table, mut drag) = session(None);

        drag.begin();
        assert_eq!(drag.move_to(Position::new(f32::NAN, 1.0)), None);
        assert_eq!(table.local_position(), Position::spawn());
    }

    #[test]
    fn test_parse_commands() {
        assert_eq!("begin".parse(), Ok(Command::Begin));
        assert_eq!("  END ".parse(), Ok(Command::End));
        assert_eq!(
            "move 10 20.5".parse(),
            Ok(Command::Move(Position::new(10.0, 20.5)))
        );
        assert_eq!(
            "drag -3 4".parse(),
            Ok(Command::Drag(Position::new(-3.0, 4.0)))
        );
        assert_eq!("show".parse(), Ok(Command::Show));
        assert_eq!("id".parse(), Ok(Command::Id));
        assert_eq!("exit".parse(), Ok(Command::Quit));
    }

    #[test]
    fn test_parse_error_message() {
        let err = "jump high".parse::<Command>().unwrap_err();
        assert_eq!(err.to_string(), "unknown command: jump high");

        let err: Box<dyn std::error::Error> = Box::new("move x 1".parse::<Command>().unwrap_err());
        assert_eq!(err.to_string(), "invalid coordinate: x");
    }

    #[test]
    fn test_parse_rejects_bad_input() {
        assert!("".parse::<Command>().is_err());
        assert!("move 10".parse::<Command>().is_err());
        assert!("move a b".parse::<Command>().is_err());
        assert!("move inf 0".parse::<Command>().is_err());
        assert!("begin now".parse::<Command>().is_err());
        assert!("jump".parse::<Command>().is_err());
    }
}

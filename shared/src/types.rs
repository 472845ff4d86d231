//! Value types exchanged between the client prediction loop and the server authority

use glam::Vec3;
use serde::{Deserialize, Serialize};

/// Monotonic simulation step counter. 64 bits never wraps within a session.
pub type Tick = u64;

/// Opaque identity of one client session, assigned by the server
pub type ConnectionId = u32;

/// One sampled frame of player intent
///
/// Produced once per client tick and never mutated afterwards. Both the
/// local replay and the server step read it.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct ClientInput {
    pub tick: Tick,
    /// Strafe axis, -1 (left) to 1 (right)
    pub horizontal: f32,
    /// Forward axis, -1 (back) to 1 (forward)
    pub vertical: f32,
    /// Facing in radians around the up axis
    pub yaw: f32,
    pub jump: bool,
    pub crouch: bool,
}

impl ClientInput {
    /// An input with no movement and the given facing
    pub fn idle(tick: Tick, yaw: f32) -> Self {
        Self {
            tick,
            yaw,
            ..Default::default()
        }
    }

    /// True when the input carries no movement or actions
    pub fn is_idle(&self) -> bool {
        self.horizontal == 0.0 && self.vertical == 0.0 && !self.jump && !self.crouch
    }
}

/// Full authoritative pose of one character plus controller bookkeeping
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CharacterState {
    pub position: Vec3,
    pub velocity: Vec3,
    pub yaw: f32,
    pub grounded: bool,
    pub crouching: bool,
    /// A jump was started and the button has not yet been released
    pub jump_consumed: bool,
    /// Seconds since jump was last pressed, used for jump buffering
    pub time_since_jump_requested: f32,
    /// Seconds since the character last stood on ground, used for coyote time
    pub time_since_last_able_to_jump: f32,
}

impl CharacterState {
    pub fn at(position: Vec3) -> Self {
        Self {
            position,
            velocity: Vec3::ZERO,
            yaw: 0.0,
            grounded: true,
            crouching: false,
            jump_consumed: false,
            time_since_jump_requested: f32::INFINITY,
            time_since_last_able_to_jump: 0.0,
        }
    }

    /// Euclidean distance between the positions of two states
    pub fn distance(&self, other: &CharacterState) -> f32 {
        self.position.distance(other.position)
    }
}

impl Default for CharacterState {
    fn default() -> Self {
        Self::at(Vec3::ZERO)
    }
}

/// The server's answer to exactly one consumed input
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ServerResult {
    /// Tick of the input that produced this state
    pub tick: Tick,
    /// Inputs still queued for this connection after consumption
    pub buffer_depth: u8,
    pub state: CharacterState,
}

impl ServerResult {
    /// Builds a result, saturating the depth into the wire width
    pub fn new(tick: Tick, remaining: usize, state: CharacterState) -> Self {
        Self {
            tick,
            buffer_depth: u8::try_from(remaining).unwrap_or(u8::MAX),
            state,
        }
    }
}

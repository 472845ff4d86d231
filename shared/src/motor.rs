//! Character stepping functions shared by the server authority and the client replay
//!
//! Both sides must produce bit-identical states for identical inputs, so every
//! motor here is plain `f32` arithmetic with no hidden state and no randomness.

use crate::types::{CharacterState, ClientInput, ConnectionId};
use glam::Vec3;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

pub const GRAVITY: f32 = 30.0;
pub const MOVE_SPEED: f32 = 7.0;
pub const JUMP_SPEED: f32 = 10.0;
pub const CROUCH_SPEED_FACTOR: f32 = 0.5;
pub const AIR_ACCELERATION: f32 = 5.0;
pub const JUMP_PRE_GROUND_GRACE: f32 = 0.1;
pub const JUMP_POST_GROUND_GRACE: f32 = 0.1;
pub const FLOOR_Y: f32 = 0.0;
pub const WORLD_HALF_EXTENT: f32 = 50.0;
pub const CHARACTER_RADIUS: f32 = 0.5;
pub const TURN_SPEED: f32 = 3.0;
pub const SPAWN_SPACING: f32 = 2.0;

/// The external stepping function as seen by the reconciliation core
///
/// `advance` steps a single entity. `simulate_all` runs once per server
/// sub-step after every entity has been advanced, for effects that span
/// entities. Clients only ever call `advance`.
pub trait CharacterMotor: Send + Sync {
    fn name(&self) -> &'static str;

    /// Announced in the handshake so the client replays with the same motor
    fn kind(&self) -> MotorKind;

    /// Pose given to an entity when it registers with the authority
    fn spawn_state(&self, id: ConnectionId) -> CharacterState;

    fn advance(&self, state: &CharacterState, input: &ClientInput, dt: f32) -> CharacterState;

    fn simulate_all(&self, _states: &mut BTreeMap<ConnectionId, CharacterState>, _dt: f32) {}
}

/// Walking character on a flat floor with gravity, jumping and crouching
#[derive(Debug, Clone)]
pub struct KinematicMotor {
    pub move_speed: f32,
    pub jump_speed: f32,
    pub gravity: f32,
    pub crouch_speed_factor: f32,
    pub air_acceleration: f32,
    pub jump_pre_ground_grace: f32,
    pub jump_post_ground_grace: f32,
    pub radius: f32,
}

impl Default for KinematicMotor {
    fn default() -> Self {
        Self {
            move_speed: MOVE_SPEED,
            jump_speed: JUMP_SPEED,
            gravity: GRAVITY,
            crouch_speed_factor: CROUCH_SPEED_FACTOR,
            air_acceleration: AIR_ACCELERATION,
            jump_pre_ground_grace: JUMP_PRE_GROUND_GRACE,
            jump_post_ground_grace: JUMP_POST_GROUND_GRACE,
            radius: CHARACTER_RADIUS,
        }
    }
}

impl KinematicMotor {
    fn wish_direction(input: &ClientInput) -> Vec3 {
        let (sin, cos) = input.yaw.sin_cos();
        let forward = Vec3::new(sin, 0.0, cos);
        let right = Vec3::new(cos, 0.0, -sin);

        let wish = forward * input.vertical.clamp(-1.0, 1.0)
            + right * input.horizontal.clamp(-1.0, 1.0);

        if wish.length_squared() > 1.0 {
            wish.normalize()
        } else {
            wish
        }
    }

    fn update_jump(&self, next: &mut CharacterState, input: &ClientInput, dt: f32) {
        next.time_since_jump_requested += dt;
        if input.jump && !next.jump_consumed {
            next.time_since_jump_requested = 0.0;
        }
        if !input.jump {
            next.jump_consumed = false;
        }

        if next.grounded {
            next.time_since_last_able_to_jump = 0.0;
        } else {
            next.time_since_last_able_to_jump += dt;
        }

        let can_jump = !next.jump_consumed
            && next.time_since_jump_requested <= self.jump_pre_ground_grace
            && next.time_since_last_able_to_jump <= self.jump_post_ground_grace;

        if can_jump {
            next.velocity.y = self.jump_speed;
            next.grounded = false;
            next.jump_consumed = true;
            next.time_since_jump_requested = f32::INFINITY;
            next.time_since_last_able_to_jump = f32::INFINITY;
        }
    }
}

impl CharacterMotor for KinematicMotor {
    fn name(&self) -> &'static str {
        "kinematic"
    }

    fn kind(&self) -> MotorKind {
        MotorKind::Kinematic
    }

    /// Lays ids out on a grid inside the world, row by row
    fn spawn_state(&self, id: ConnectionId) -> CharacterState {
        let edge = WORLD_HALF_EXTENT - SPAWN_SPACING;
        let slots = (2.0 * edge / SPAWN_SPACING) as u64 + 1;
        let column = (id as u64) % slots;
        let row = (id as u64 / slots) % slots;

        let x = column as f32 * SPAWN_SPACING - edge;
        let z = row as f32 * SPAWN_SPACING - edge;
        CharacterState::at(Vec3::new(x, FLOOR_Y, z))
    }

    fn advance(&self, state: &CharacterState, input: &ClientInput, dt: f32) -> CharacterState {
        let mut next = *state;
        next.yaw = input.yaw;
        next.crouching = input.crouch && next.grounded;

        let speed = if next.crouching {
            self.move_speed * self.crouch_speed_factor
        } else {
            self.move_speed
        };
        let target = Self::wish_direction(input) * speed;

        if next.grounded {
            next.velocity.x = target.x;
            next.velocity.z = target.z;
        } else {
            let blend = (self.air_acceleration * dt).min(1.0);
            next.velocity.x += (target.x - next.velocity.x) * blend;
            next.velocity.z += (target.z - next.velocity.z) * blend;
        }

        self.update_jump(&mut next, input, dt);

        if !next.grounded {
            next.velocity.y -= self.gravity * dt;
        }

        next.position += next.velocity * dt;
        next.position.x = next.position.x.clamp(-WORLD_HALF_EXTENT, WORLD_HALF_EXTENT);
        next.position.z = next.position.z.clamp(-WORLD_HALF_EXTENT, WORLD_HALF_EXTENT);

        if next.position.y <= FLOOR_Y {
            next.position.y = FLOOR_Y;
            next.velocity.y = next.velocity.y.max(0.0);
            next.grounded = true;
        } else {
            next.grounded = false;
        }

        next
    }

    fn simulate_all(&self, states: &mut BTreeMap<ConnectionId, CharacterState>, _dt: f32) {
        let ids: Vec<ConnectionId> = states.keys().copied().collect();

        for i in 0..ids.len() {
            for j in (i + 1)..ids.len() {
                let (Some(a), Some(b)) = (states.get(&ids[i]).copied(), states.get(&ids[j]).copied())
                else {
                    continue;
                };

                if let Some((a, b)) = separate(a, b, self.radius) {
                    states.insert(ids[i], a);
                    states.insert(ids[j], b);
                }
            }
        }
    }
}

/// Pushes two overlapping characters apart on the horizontal plane
///
/// Returns `None` when the pair does not overlap.
fn separate(
    mut a: CharacterState,
    mut b: CharacterState,
    radius: f32,
) -> Option<(CharacterState, CharacterState)> {
    let delta = Vec3::new(b.position.x - a.position.x, 0.0, b.position.z - a.position.z);
    let distance = delta.length();
    let min_distance = radius * 2.0;

    if distance >= min_distance {
        return None;
    }

    let normal = if distance < 0.001 {
        Vec3::X
    } else {
        delta / distance
    };
    let push = normal * ((min_distance - distance) / 2.0);

    a.position -= push;
    b.position += push;

    // Cancel the part of each velocity that drives into the other character
    let approach_a = a.velocity.dot(normal);
    if approach_a > 0.0 {
        a.velocity -= normal * approach_a;
    }
    let approach_b = b.velocity.dot(normal);
    if approach_b < 0.0 {
        b.velocity -= normal * approach_b;
    }

    Some((a, b))
}

/// Tank-style mover: the forward axis moves along the facing, the strafe axis turns
#[derive(Debug, Clone)]
pub struct PlanarMotor {
    pub move_speed: f32,
    pub turn_speed: f32,
}

impl Default for PlanarMotor {
    fn default() -> Self {
        Self {
            move_speed: MOVE_SPEED,
            turn_speed: TURN_SPEED,
        }
    }
}

impl CharacterMotor for PlanarMotor {
    fn name(&self) -> &'static str {
        "planar"
    }

    fn kind(&self) -> MotorKind {
        MotorKind::Planar
    }

    fn spawn_state(&self, _id: ConnectionId) -> CharacterState {
        CharacterState::at(Vec3::ZERO)
    }

    fn advance(&self, state: &CharacterState, input: &ClientInput, dt: f32) -> CharacterState {
        let mut next = *state;
        next.yaw += input.horizontal.clamp(-1.0, 1.0) * self.turn_speed * dt;

        let (sin, cos) = next.yaw.sin_cos();
        let forward = Vec3::new(sin, 0.0, cos);
        next.velocity = forward * input.vertical.clamp(-1.0, 1.0) * self.move_speed;
        next.position += next.velocity * dt;
        next.grounded = true;

        next
    }
}

/// Which concrete character type both roles simulate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum MotorKind {
    #[default]
    Kinematic,
    Planar,
}

impl MotorKind {
    pub fn build(self) -> Box<dyn CharacterMotor> {
        match self {
            MotorKind::Kinematic => Box::new(KinematicMotor::default()),
            MotorKind::Planar => Box::new(PlanarMotor::default()),
        }
    }
}

impl fmt::Display for MotorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MotorKind::Kinematic => write!(f, "kinematic"),
            MotorKind::Planar => write!(f, "planar"),
        }
    }
}

impl FromStr for MotorKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "kinematic" => Ok(MotorKind::Kinematic),
            "planar" => Ok(MotorKind::Planar),
            other => Err(format!("unknown motor kind '{}'", other)),
        }
    }
}

//! Input generation for headless clients
//!
//! A client samples exactly one input per local tick. Where the intent comes
//! from is abstracted behind `InputSource` so the same session loop can be
//! driven by a fixed script in tests or a seeded random walk for load runs.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use shared::{ClientInput, Tick};
use std::f32::consts::TAU;
use std::fmt;
use std::str::FromStr;

/// Produces the player intent for one local tick
pub trait InputSource: Send {
    /// Returns the input for `tick`; the returned value carries that tick
    fn sample(&mut self, tick: Tick) -> ClientInput;
}

/// Replays a fixed list of intents in a loop
#[derive(Debug, Clone)]
pub struct ScriptedInput {
    steps: Vec<ClientInput>,
    cursor: usize,
}

impl ScriptedInput {
    /// An empty script samples idle inputs
    pub fn new(steps: Vec<ClientInput>) -> Self {
        Self { steps, cursor: 0 }
    }

    /// Walks forward, strafes, turns around and hops every few seconds at 60 Hz
    pub fn patrol() -> Self {
        let mut steps = Vec::new();
        let walk = ClientInput {
            vertical: 1.0,
            ..ClientInput::idle(0, 0.0)
        };

        steps.extend(std::iter::repeat(walk).take(90));
        steps.push(ClientInput { jump: true, ..walk });
        steps.extend(std::iter::repeat(walk).take(29));
        steps.extend(std::iter::repeat(ClientInput { horizontal: 1.0, ..walk }).take(60));
        steps.extend(
            std::iter::repeat(ClientInput {
                yaw: std::f32::consts::PI,
                crouch: true,
                ..walk
            })
            .take(120),
        );
        steps.extend(std::iter::repeat(ClientInput::idle(0, std::f32::consts::PI)).take(30));

        Self::new(steps)
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}

impl InputSource for ScriptedInput {
    fn sample(&mut self, tick: Tick) -> ClientInput {
        let Some(step) = self.steps.get(self.cursor) else {
            return ClientInput::idle(tick, 0.0);
        };

        self.cursor = (self.cursor + 1) % self.steps.len();
        ClientInput { tick, ..*step }
    }
}

/// Random intent held for a random number of ticks, reproducible from a seed
#[derive(Debug, Clone)]
pub struct RandomWalk {
    rng: StdRng,
    current: ClientInput,
    hold: u32,
    max_hold: u32,
}

impl RandomWalk {
    pub fn new(seed: u64) -> Self {
        Self::with_max_hold(seed, 45)
    }

    pub fn with_max_hold(seed: u64, max_hold: u32) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
            current: ClientInput::default(),
            hold: 0,
            max_hold: max_hold.max(1),
        }
    }

    fn reroll(&mut self) {
        let axis = |rng: &mut StdRng| match rng.gen_range(0..3) {
            0 => -1.0,
            1 => 0.0,
            _ => 1.0,
        };

        self.current = ClientInput {
            tick: 0,
            horizontal: axis(&mut self.rng),
            vertical: axis(&mut self.rng),
            yaw: self.rng.gen_range(0.0..TAU),
            jump: false,
            crouch: self.rng.gen_bool(0.15),
        };
        self.hold = self.rng.gen_range(1..=self.max_hold);
    }
}

impl InputSource for RandomWalk {
    fn sample(&mut self, tick: Tick) -> ClientInput {
        if self.hold == 0 {
            self.reroll();
        }
        self.hold -= 1;

        // Jump is an edge, pressed for one tick at a time
        let jump = self.rng.gen_bool(0.02);
        ClientInput {
            tick,
            jump,
            ..self.current
        }
    }
}

/// Input generator selectable from the command line
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum InputPattern {
    #[default]
    Patrol,
    Random,
    Idle,
}

impl InputPattern {
    pub fn build(self, seed: u64) -> Box<dyn InputSource> {
        match self {
            InputPattern::Patrol => Box::new(ScriptedInput::patrol()),
            InputPattern::Random => Box::new(RandomWalk::new(seed)),
            InputPattern::Idle => Box::new(ScriptedInput::new(Vec::new())),
        }
    }
}

impl fmt::Display for InputPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InputPattern::Patrol => write!(f, "patrol"),
            InputPattern::Random => write!(f, "random"),
            InputPattern::Idle => write!(f, "idle"),
        }
    }
}

impl FromStr for InputPattern {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "patrol" => Ok(InputPattern::Patrol),
            "random" => Ok(InputPattern::Random),
            "idle" => Ok(InputPattern::Idle),
            other => Err(format!("unknown input pattern '{}'", other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scripted_input_cycles_and_tags_tick() {
        let jump = ClientInput {
            jump: true,
            ..Default::default()
        };
        let walk = ClientInput {
            vertical: 1.0,
            ..Default::default()
        };
        let mut script = ScriptedInput::new(vec![jump, walk]);

        let sampled: Vec<ClientInput> = (10..14).map(|tick| script.sample(tick)).collect();
        assert_eq!(
            sampled.iter().map(|input| input.tick).collect::<Vec<_>>(),
            vec![10, 11, 12, 13]
        );
        assert!(sampled[0].jump && sampled[2].jump);
        assert_eq!(sampled[1].vertical, 1.0);
        assert_eq!(sampled[3].vertical, 1.0);
    }

    #[test]
    fn test_empty_script_is_idle() {
        let mut script = ScriptedInput::new(Vec::new());
        let input = script.sample(3);
        assert_eq!(input.tick, 3);
        assert!(input.is_idle());
    }

    #[test]
    fn test_patrol_contains_movement_and_jump() {
        let mut patrol = ScriptedInput::patrol();
        let len = patrol.len() as u64;
        let inputs: Vec<ClientInput> = (0..len).map(|tick| patrol.sample(tick)).collect();

        assert!(inputs.iter().any(|input| input.jump));
        assert!(inputs.iter().any(|input| input.crouch));
        assert!(inputs.iter().any(|input| input.is_idle()));
    }

    #[test]
    fn test_random_walk_is_reproducible() {
        let mut a = RandomWalk::new(7);
        let mut b = RandomWalk::new(7);

        for tick in 0..200 {
            assert_eq!(a.sample(tick), b.sample(tick));
        }
    }

    #[test]
    fn test_random_walk_axes_in_range() {
        let mut walk = RandomWalk::with_max_hold(1, 3);
        for tick in 0..500 {
            let input = walk.sample(tick);
            assert_eq!(input.tick, tick);
            assert!((-1.0..=1.0).contains(&input.horizontal));
            assert!((-1.0..=1.0).contains(&input.vertical));
            assert!((0.0..TAU).contains(&input.yaw));
        }
    }

    #[test]
    fn test_input_pattern_parsing() {
        assert_eq!("random".parse::<InputPattern>(), Ok(InputPattern::Random));
        assert_eq!("PATROL".parse::<InputPattern>(), Ok(InputPattern::Patrol));
        assert!("dance".parse::<InputPattern>().is_err());
        assert_eq!(InputPattern::Idle.to_string(), "idle");
    }
}

//! Authoritative simulation loop: per-connection input consumption and result generation
//!
//! The `AuthoritySystem` is the context object that owns every registered
//! entity's input buffer and authoritative state. It is driven by an external
//! scheduler through `fixed_update`, once per update-rate step, and never
//! blocks or waits on the transport.

use crate::input_buffer::InputBuffer;
use log::{debug, info};
use shared::{
    CharacterMotor, CharacterState, ClientInput, ConfigError, ConnectionId, FrameClock, MotorKind,
    ServerResult, SimulationConfig, Tick,
};
use std::collections::BTreeMap;

/// A result addressed to the connection that owns the simulated entity
pub type Outgoing = (ConnectionId, ServerResult);

pub struct AuthoritySystem {
    config: SimulationConfig,
    motor: Box<dyn CharacterMotor>,
    buffers: BTreeMap<ConnectionId, InputBuffer>,
    states: BTreeMap<ConnectionId, CharacterState>,
    clock: FrameClock,
    substeps_per_tick: u32,
    update_counter: u32,
}

impl AuthoritySystem {
    /// Builds the authority. The sub-step count is fixed here for the whole session.
    pub fn new(
        config: SimulationConfig,
        motor: Box<dyn CharacterMotor>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let substeps_per_tick = config.substeps_per_tick();
        info!(
            "Authority running {} motor at {}Hz tick / {}Hz update ({} sub-steps per tick)",
            motor.name(),
            config.tick_rate,
            config.update_rate,
            substeps_per_tick
        );

        Ok(Self {
            config,
            motor,
            buffers: BTreeMap::new(),
            states: BTreeMap::new(),
            clock: FrameClock::new(),
            substeps_per_tick,
            update_counter: 0,
        })
    }

    /// Creates an empty buffer and spawns the entity. Returns false if already registered.
    pub fn register(&mut self, id: ConnectionId) -> bool {
        if self.buffers.contains_key(&id) {
            return false;
        }

        let state = self.motor.spawn_state(id);
        self.buffers
            .insert(id, InputBuffer::with_cap(self.config.input_buffer_cap));
        self.states.insert(id, state);

        info!("Registered entity {} at {:?}", id, state.position);
        true
    }

    /// Drops the entity together with any inputs still queued for it
    ///
    /// Returns the number of discarded inputs, or `None` if the id was unknown.
    pub fn unregister(&mut self, id: ConnectionId) -> Option<usize> {
        let mut buffer = self.buffers.remove(&id)?;
        self.states.remove(&id);

        let discarded = buffer.clear();
        info!("Unregistered entity {} ({} inputs discarded)", id, discarded);
        Some(discarded)
    }

    /// Queues an input for a registered entity. Inputs for unknown ids are dropped.
    pub fn receive_input(&mut self, id: ConnectionId, input: ClientInput) -> bool {
        match self.buffers.get_mut(&id) {
            Some(buffer) => {
                buffer.enqueue(input);
                true
            }
            None => {
                debug!("Dropping input for tick {} from unregistered {}", input.tick, id);
                false
            }
        }
    }

    /// One update-rate step. Every `substeps_per_tick` calls a full tick runs.
    pub fn fixed_update(&mut self) -> Vec<Outgoing> {
        self.update_counter += 1;

        if self.update_counter < self.substeps_per_tick {
            return Vec::new();
        }

        self.update_counter = 0;
        self.run_tick()
    }

    /// Executes every sub-step belonging to one tick-rate period
    pub fn run_tick(&mut self) -> Vec<Outgoing> {
        let mut outgoing = Vec::new();
        for _ in 0..self.substeps_per_tick {
            outgoing.extend(self.substep());
        }
        outgoing
    }

    /// Consumes at most one input per entity, steps, and builds the results
    ///
    /// Entities with an empty buffer keep their previous state and get no result.
    pub fn substep(&mut self) -> Vec<Outgoing> {
        let dt = self.config.update_dt();
        self.clock.advance();

        let mut consumed: Vec<(ConnectionId, Tick)> = Vec::new();

        for (id, buffer) in self.buffers.iter_mut() {
            let Some(input) = buffer.consume_oldest() else {
                continue;
            };
            let Some(state) = self.states.get_mut(id) else {
                continue;
            };

            *state = self.motor.advance(state, &input, dt);
            consumed.push((*id, input.tick));
        }

        self.motor.simulate_all(&mut self.states, dt);

        let mut outgoing = Vec::with_capacity(consumed.len());
        for (id, tick) in consumed {
            let (Some(buffer), Some(state)) = (self.buffers.get(&id), self.states.get(&id)) else {
                continue;
            };
            outgoing.push((id, ServerResult::new(tick, buffer.depth(), *state)));
        }

        if !outgoing.is_empty() {
            debug!(
                "Sub-step {}: {} results, {} entities",
                self.clock.current(),
                outgoing.len(),
                self.states.len()
            );
        }

        outgoing
    }

    pub fn state(&self, id: ConnectionId) -> Option<&CharacterState> {
        self.states.get(&id)
    }

    pub fn buffer_depth(&self, id: ConnectionId) -> Option<usize> {
        self.buffers.get(&id).map(InputBuffer::depth)
    }

    pub fn dropped_inputs(&self, id: ConnectionId) -> Option<u64> {
        self.buffers.get(&id).map(InputBuffer::dropped)
    }

    pub fn is_registered(&self, id: ConnectionId) -> bool {
        self.buffers.contains_key(&id)
    }

    pub fn connection_count(&self) -> usize {
        self.buffers.len()
    }

    /// Number of sub-steps executed so far
    pub fn current_tick(&self) -> Tick {
        self.clock.current()
    }

    pub fn substeps_per_tick(&self) -> u32 {
        self.substeps_per_tick
    }

    pub fn config(&self) -> &SimulationConfig {
        &self.config
    }

    pub fn motor_kind(&self) -> MotorKind {
        self.motor.kind()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;
    use shared::{KinematicMotor, PlanarMotor, SubstepRounding};

    fn authority() -> AuthoritySystem {
        AuthoritySystem::new(SimulationConfig::default(), Box::new(KinematicMotor::default()))
            .unwrap()
    }

    fn forward(tick: u64) -> ClientInput {
        ClientInput {
            vertical: 1.0,
            ..ClientInput::idle(tick, 0.0)
        }
    }

    #[test]
    fn test_register_and_unregister() {
        let mut authority = authority();
        assert!(authority.register(1));
        assert!(!authority.register(1));
        assert_eq!(authority.connection_count(), 1);
        assert_eq!(authority.buffer_depth(1), Some(0));
        assert!(authority.state(1).is_some());

        assert_eq!(authority.unregister(1), Some(0));
        assert_eq!(authority.unregister(1), None);
        assert_eq!(authority.connection_count(), 0);
        assert!(authority.state(1).is_none());
    }

    #[test]
    fn test_input_for_unregistered_is_dropped() {
        let mut authority = authority();
        assert!(!authority.receive_input(7, forward(1)));
        assert!(authority.substep().is_empty());
    }

    #[test]
    fn test_substep_reports_tick_and_depth_after_consumption() {
        let mut authority = authority();
        authority.register(1);
        for tick in 10..14 {
            authority.receive_input(1, forward(tick));
        }

        let results = authority.substep();
        assert_eq!(results.len(), 1);
        let (id, result) = results[0];
        assert_eq!(id, 1);
        assert_eq!(result.tick, 10);
        assert_eq!(result.buffer_depth, 3);
        assert_eq!(authority.buffer_depth(1), Some(3));
        assert_eq!(result.state, *authority.state(1).unwrap());
    }

    #[test]
    fn test_starved_entity_is_skipped_and_unchanged() {
        let mut authority = authority();
        authority.register(1);
        authority.register(2);
        authority.receive_input(1, forward(1));

        let before = *authority.state(2).unwrap();
        let results = authority.substep();

        assert_eq!(results.len(), 1);
        assert_eq!(results[0].0, 1);
        assert_eq!(*authority.state(2).unwrap(), before);

        // Both drained now
        assert!(authority.substep().is_empty());
    }

    #[test]
    fn test_results_in_fifo_order() {
        let mut authority = authority();
        authority.register(1);
        for tick in [5, 6, 7] {
            authority.receive_input(1, forward(tick));
        }

        let ticks: Vec<u64> = (0..3)
            .flat_map(|_| authority.substep())
            .map(|(_, result)| result.tick)
            .collect();
        assert_eq!(ticks, vec![5, 6, 7]);
    }

    #[test]
    fn test_state_advances_with_motor() {
        let mut authority = authority();
        authority.register(1);
        let start = *authority.state(1).unwrap();
        authority.receive_input(1, forward(1));
        authority.substep();

        let dt = SimulationConfig::default().update_dt();
        let moved = authority.state(1).unwrap().position.z - start.position.z;
        assert_approx_eq!(moved, shared::motor::MOVE_SPEED * dt, 1e-5);
    }

    #[test]
    fn test_fixed_update_runs_tick_every_quotient_calls() {
        let mut authority = authority();
        assert_eq!(authority.substeps_per_tick(), 2);
        authority.register(1);
        for tick in 1..=4 {
            authority.receive_input(1, forward(tick));
        }

        assert!(authority.fixed_update().is_empty());
        assert_eq!(authority.current_tick(), 0);

        let results = authority.fixed_update();
        assert_eq!(results.len(), 2);
        assert_eq!(authority.current_tick(), 2);
        assert_eq!(results[0].1.buffer_depth, 3);
        assert_eq!(results[1].1.buffer_depth, 2);
    }

    #[test]
    fn test_run_tick_executes_quotient_substeps() {
        let config = SimulationConfig {
            tick_rate: 30,
            update_rate: 60,
            ..Default::default()
        };
        let mut authority =
            AuthoritySystem::new(config, Box::new(PlanarMotor::default())).unwrap();
        authority.run_tick();
        assert_eq!(authority.current_tick(), 2);
        authority.run_tick();
        assert_eq!(authority.current_tick(), 4);
    }

    #[test]
    fn test_substep_count_configurable_rounding() {
        let config = SimulationConfig {
            tick_rate: 40,
            update_rate: 100,
            substep_rounding: SubstepRounding::Nearest,
            ..Default::default()
        };
        let authority = AuthoritySystem::new(config, Box::new(PlanarMotor::default())).unwrap();
        assert_eq!(authority.substeps_per_tick(), 3);
    }

    #[test]
    fn test_new_rejects_invalid_config() {
        let config = SimulationConfig {
            tick_rate: 0,
            ..Default::default()
        };
        let result = AuthoritySystem::new(config, Box::new(PlanarMotor::default()));
        assert!(matches!(result, Err(ConfigError::ZeroRate(_))));

        let config = SimulationConfig {
            tick_rate: 60,
            update_rate: 30,
            ..Default::default()
        };
        assert!(AuthoritySystem::new(config, Box::new(PlanarMotor::default())).is_err());
    }

    #[test]
    fn test_motor_kind_reported() {
        let authority = AuthoritySystem::new(
            SimulationConfig::default(),
            Box::new(PlanarMotor::default()),
        )
        .unwrap();
        assert_eq!(authority.motor_kind(), MotorKind::Planar);
    }

    #[test]
    fn test_unregister_discards_pending_inputs() {
        let mut authority = authority();
        authority.register(1);
        authority.receive_input(1, forward(1));
        authority.receive_input(1, forward(2));

        assert_eq!(authority.unregister(1), Some(2));
        assert!(authority.substep().is_empty());
        assert!(!authority.receive_input(1, forward(3)));
    }

    #[test]
    fn test_buffer_cap_backstop() {
        let config = SimulationConfig {
            input_buffer_cap: Some(2),
            ..Default::default()
        };
        let mut authority =
            AuthoritySystem::new(config, Box::new(KinematicMotor::default())).unwrap();
        authority.register(1);
        for tick in 1..=5 {
            authority.receive_input(1, forward(tick));
        }

        assert_eq!(authority.buffer_depth(1), Some(2));
        assert_eq!(authority.dropped_inputs(1), Some(3));
        assert_eq!(authority.substep()[0].1.tick, 4);
    }

    #[test]
    fn test_collisions_applied_after_inputs() {
        let mut authority = authority();
        authority.register(1);
        authority.register(2);

        let a = *authority.state(1).unwrap();
        let b = *authority.state(2).unwrap();
        let gap = a.distance(&b);
        assert!(gap > shared::motor::CHARACTER_RADIUS * 2.0);

        // Walk 1 towards 2 until they would overlap
        let toward = ClientInput {
            horizontal: 1.0,
            ..ClientInput::idle(0, 0.0)
        };
        let mut tick = 0;
        for _ in 0..120 {
            tick += 1;
            authority.receive_input(1, ClientInput { tick, ..toward });
            authority.substep();
        }

        let distance = authority.state(1).unwrap().distance(authority.state(2).unwrap());
        assert!(distance >= shared::motor::CHARACTER_RADIUS * 2.0 - 1e-3);
    }
}

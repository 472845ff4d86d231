use crate::flow_control::{FlowRateController, FlowState};
use crate::input::InputSource;
use crate::prediction::PredictionEngine;
use log::info;
use shared::{
    CharacterMotor, CharacterState, ClientInput, FrameClock, ServerResult, SimulationConfig, Tick,
};
use std::time::Duration;

/// Cadence reported back to the driver after a result changed the flow state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CadenceChange {
    pub state: FlowState,
    pub previous_hz: u32,
    pub cadence_hz: u32,
}

/// One locally controlled character: sampling, prediction and flow control
///
/// The driver calls `step` once per local tick and `on_result` for every
/// result from the server, both from the same task.
pub struct LocalPlayer {
    clock: FrameClock,
    input: Box<dyn InputSource>,
    engine: PredictionEngine,
    flow: FlowRateController,
    prediction_enabled: bool,
    results_received: u64,
    last_correction: f32,
}

impl LocalPlayer {
    pub fn new(
        config: &SimulationConfig,
        motor: Box<dyn CharacterMotor>,
        input: Box<dyn InputSource>,
        spawn: CharacterState,
    ) -> Self {
        Self {
            clock: FrameClock::new(),
            input,
            engine: PredictionEngine::new(motor, spawn, config.update_dt()),
            flow: FlowRateController::new(config.flow, config.update_rate),
            prediction_enabled: true,
            results_received: 0,
            last_correction: 0.0,
        }
    }

    /// Advances the local tick and samples, predicts and returns the input to send
    pub fn step(&mut self) -> ClientInput {
        let tick = self.clock.advance();
        let input = ClientInput {
            tick,
            ..self.input.sample(tick)
        };

        if self.prediction_enabled {
            self.engine.record_input(input);
        }

        input
    }

    /// Reconciles against an authoritative result and updates flow control
    ///
    /// Returns the new cadence when the result moved the controller into a
    /// different state.
    pub fn on_result(&mut self, result: &ServerResult) -> Option<CadenceChange> {
        self.results_received += 1;
        self.last_correction = self.engine.apply_result(result);

        let previous = self.flow.state();
        let previous_hz = self.flow.cadence_hz();
        let state = self.flow.observe(u32::from(result.buffer_depth));

        (state != previous).then(|| CadenceChange {
            state,
            previous_hz,
            cadence_hz: self.flow.cadence_hz(),
        })
    }

    /// Without prediction the displayed state is the last authoritative one
    pub fn set_prediction_enabled(&mut self, enabled: bool) {
        if self.prediction_enabled == enabled {
            return;
        }

        self.prediction_enabled = enabled;
        info!("Client-side prediction: {}", enabled);

        if !enabled {
            self.engine.discard_unconfirmed();
        }
    }

    pub fn prediction_enabled(&self) -> bool {
        self.prediction_enabled
    }

    /// State to present for the local character
    pub fn display_state(&self) -> &CharacterState {
        self.engine.predicted_state()
    }

    pub fn confirmed_state(&self) -> &CharacterState {
        self.engine.confirmed_state()
    }

    pub fn current_tick(&self) -> Tick {
        self.clock.current()
    }

    pub fn tick_interval(&self) -> Duration {
        self.flow.tick_interval()
    }

    pub fn engine(&self) -> &PredictionEngine {
        &self.engine
    }

    pub fn flow(&self) -> &FlowRateController {
        &self.flow
    }

    pub fn results_received(&self) -> u64 {
        self.results_received
    }

    /// Distance the last result moved the displayed state
    pub fn last_correction(&self) -> f32 {
        self.last_correction
    }
}

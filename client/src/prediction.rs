//! Client-side prediction with reconcile-then-replay correction
//!
//! The engine keeps two states for the local character:
//! - The confirmed baseline, always the last authoritative result verbatim
//! - The predicted state, the baseline with every unacknowledged input replayed
//!
//! Unacknowledged inputs live in the `UnconfirmedInputLog` in strictly
//! increasing tick order. A result for tick T retires every entry up to and
//! including T; the rest are replayed through the same motor the server runs.

use log::{debug, warn};
use shared::{CharacterMotor, CharacterState, ClientInput, ServerResult, Tick};
use std::collections::VecDeque;

/// Corrections smaller than this are floating-point noise and not counted
pub const CORRECTION_THRESHOLD: f32 = 0.01;

/// Inputs sent to the server that no result has acknowledged yet
#[derive(Debug, Clone, Default)]
pub struct UnconfirmedInputLog {
    inputs: VecDeque<ClientInput>,
}

impl UnconfirmedInputLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends an input. Ticks must strictly increase; anything else is rejected.
    pub fn push(&mut self, input: ClientInput) -> bool {
        if let Some(last) = self.inputs.back() {
            if input.tick <= last.tick {
                warn!(
                    "Rejecting input for tick {}: log already holds tick {}",
                    input.tick, last.tick
                );
                return false;
            }
        }

        self.inputs.push_back(input);
        true
    }

    /// Removes every entry with tick <= `tick` and returns how many were removed
    pub fn purge_confirmed(&mut self, tick: Tick) -> usize {
        let mut purged = 0;
        while self.inputs.front().is_some_and(|input| input.tick <= tick) {
            self.inputs.pop_front();
            purged += 1;
        }
        purged
    }

    pub fn iter(&self) -> impl Iterator<Item = &ClientInput> {
        self.inputs.iter()
    }

    pub fn latest_tick(&self) -> Option<Tick> {
        self.inputs.back().map(|input| input.tick)
    }

    pub fn len(&self) -> usize {
        self.inputs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inputs.is_empty()
    }

    pub fn clear(&mut self) {
        self.inputs.clear();
    }
}

/// Replay engine for the locally controlled character
pub struct PredictionEngine {
    motor: Box<dyn CharacterMotor>,
    dt: f32,
    confirmed: CharacterState,
    confirmed_tick: Option<Tick>,
    log: UnconfirmedInputLog,
    predicted: CharacterState,
    corrections: u64,
}

impl PredictionEngine {
    /// `dt` must match the server's sub-step length so replay reproduces its results
    pub fn new(motor: Box<dyn CharacterMotor>, baseline: CharacterState, dt: f32) -> Self {
        Self {
            motor,
            dt,
            confirmed: baseline,
            confirmed_tick: None,
            log: UnconfirmedInputLog::new(),
            predicted: baseline,
            corrections: 0,
        }
    }

    /// Discards all history and starts predicting from `baseline`
    pub fn reset(&mut self, baseline: CharacterState) {
        self.confirmed = baseline;
        self.confirmed_tick = None;
        self.log.clear();
        self.predicted = baseline;
    }

    /// Drops every unconfirmed input so the prediction equals the baseline
    pub fn discard_unconfirmed(&mut self) -> usize {
        let discarded = self.log.len();
        self.log.clear();
        self.replay();
        discarded
    }

    /// Logs a freshly sampled input and refreshes the prediction
    ///
    /// Returns false when the tick does not extend the log; the prediction is
    /// left untouched in that case.
    pub fn record_input(&mut self, input: ClientInput) -> bool {
        if !self.log.push(input) {
            return false;
        }
        self.replay();
        true
    }

    /// Adopts an authoritative result and replays what is still unconfirmed
    ///
    /// Returns how far the predicted position moved because of the correction.
    pub fn apply_result(&mut self, result: &ServerResult) -> f32 {
        let previous = self.predicted;

        self.confirmed = result.state;
        self.confirmed_tick = Some(result.tick);
        let purged = self.log.purge_confirmed(result.tick);
        self.replay();

        let correction = previous.distance(&self.predicted);
        if correction > CORRECTION_THRESHOLD {
            self.corrections += 1;
            debug!(
                "Correction of {:.3} at tick {} ({} confirmed, {} replayed)",
                correction,
                result.tick,
                purged,
                self.log.len()
            );
        }

        correction
    }

    /// Rebuilds the predicted state from the baseline and the unconfirmed log
    pub fn replay(&mut self) {
        let mut state = self.confirmed;
        for input in self.log.iter() {
            state = self.motor.advance(&state, input, self.dt);
        }
        self.predicted = state;
    }

    pub fn predicted_state(&self) -> &CharacterState {
        &self.predicted
    }

    pub fn confirmed_state(&self) -> &CharacterState {
        &self.confirmed
    }

    pub fn confirmed_tick(&self) -> Option<Tick> {
        self.confirmed_tick
    }

    pub fn unconfirmed(&self) -> &UnconfirmedInputLog {
        &self.log
    }

    /// Number of results that moved the prediction noticeably
    pub fn corrections(&self) -> u64 {
        self.corrections
    }

    pub fn motor(&self) -> &dyn CharacterMotor {
        self.motor.as_ref()
    }
}

use crate::types::Tick;

/// Tick counter driving input sampling on the client and sub-steps on the server
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrameClock {
    tick: Tick,
}

impl FrameClock {
    pub fn new() -> Self {
        Self { tick: 0 }
    }

    pub fn starting_at(tick: Tick) -> Self {
        Self { tick }
    }

    pub fn current(&self) -> Tick {
        self.tick
    }

    /// Moves the clock forward one step and returns the new tick
    pub fn advance(&mut self) -> Tick {
        self.tick += 1;
        self.tick
    }
}

//! Per-connection FIFO of inputs waiting for the authority to consume them

use log::warn;
use shared::ClientInput;
use std::collections::VecDeque;

/// Ordered queue of not-yet-simulated client inputs
///
/// Inputs are consumed strictly in arrival order. Ordering and duplicate
/// suppression are the transport's job, so `enqueue` performs no checks
/// beyond the optional length cap.
#[derive(Debug, Default)]
pub struct InputBuffer {
    inputs: VecDeque<ClientInput>,
    max_depth: Option<usize>,
    dropped: u64,
}

impl InputBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a buffer that discards its oldest entries beyond `max_depth`
    pub fn with_cap(max_depth: Option<usize>) -> Self {
        Self {
            inputs: VecDeque::new(),
            max_depth,
            dropped: 0,
        }
    }

    pub fn enqueue(&mut self, input: ClientInput) {
        self.inputs.push_back(input);

        if let Some(max_depth) = self.max_depth {
            while self.inputs.len() > max_depth {
                if let Some(stale) = self.inputs.pop_front() {
                    self.dropped += 1;
                    warn!(
                        "Input buffer over cap {}, dropped input for tick {}",
                        max_depth, stale.tick
                    );
                }
            }
        }
    }

    /// Removes and returns the head, or `None` when the buffer is drained
    pub fn consume_oldest(&mut self) -> Option<ClientInput> {
        self.inputs.pop_front()
    }

    pub fn depth(&self) -> usize {
        self.inputs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inputs.is_empty()
    }

    /// Total inputs discarded by the cap since creation
    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    pub fn clear(&mut self) -> usize {
        let discarded = self.inputs.len();
        self.inputs.clear();
        discarded
    }
}

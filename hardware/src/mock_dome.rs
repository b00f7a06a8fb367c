//! In-memory dome command sink for tests.

use std::sync::{Arc, Mutex, MutexGuard};

use dome_proto::{DeliveryError, DomeCommandSink, MoveAzimuth};

#[derive(Debug, Default)]
struct MockDomeState {
    commands: Vec<MoveAzimuth>,
    attempts: usize,
    failure: Option<DeliveryError>,
}

/// Records every delivered command.
///
/// Clones share the same log, so a test can keep one clone for inspection
/// and hand another to the controller.
#[derive(Debug, Clone, Default)]
pub struct MockDome {
    state: Arc<Mutex<MockDomeState>>,
}

impl MockDome {
    pub fn new() -> Self {
        Self::default()
    }

    /// All successfully delivered commands, oldest first.
    pub fn commands(&self) -> Vec<MoveAzimuth> {
        self.lock().commands.clone()
    }

    /// Commanded azimuths, oldest first.
    pub fn azimuths(&self) -> Vec<f64> {
        self.lock().commands.iter().map(|c| c.azimuth).collect()
    }

    /// Most recent delivered command.
    pub fn last_command(&self) -> Option<MoveAzimuth> {
        self.lock().commands.last().copied()
    }

    pub fn command_count(&self) -> usize {
        self.lock().commands.len()
    }

    /// Delivery attempts, including failed ones.
    pub fn attempts(&self) -> usize {
        self.lock().attempts
    }

    /// Fail every following delivery with `error`.
    pub fn fail_with(&self, error: DeliveryError) {
        self.lock().failure = Some(error);
    }

    /// Accept deliveries again.
    pub fn succeed(&self) {
        self.lock().failure = None;
    }

    fn lock(&self) -> MutexGuard<'_, MockDomeState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl DomeCommandSink for MockDome {
    fn move_azimuth(&mut self, command: MoveAzimuth) -> Result<(), DeliveryError> {
        let mut state = self.lock();
        state.attempts += 1;
        if let Some(error) = &state.failure {
            return Err(error.clone());
        }
        state.commands.push(command);
        Ok(())
    }
}

//! Simulated dome azimuth axis.
//!
//! Accepts [`MoveAzimuth`] commands and reports [`DomeStatus`] back the way a
//! real dome controller would:
//!
//! - an `Unknown` commanded-state event at startup
//! - a `GoToPosition` commanded-state event for every accepted move
//! - position telemetry every `telemetry_interval`, slewing toward the commanded
//!   azimuth along the shortest path at `az_vel` degrees per second
//!
//! Motion limits are not enforced.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use dome_proto::{
    angle_diff, wrap_azimuth, AzimuthCommandedState, DeliveryError, DomeCommandSink,
    DomePosition, DomeStatus, MoveAzimuth, Timestamp,
};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

/// Fake dome tuning.
#[derive(Debug, Clone)]
pub struct FakeDomeConfig {
    /// Slew rate in degrees per second
    pub az_vel: f64,
    /// Interval between position telemetry samples
    pub telemetry_interval: Duration,
    /// Azimuth the dome starts at, in degrees
    pub initial_azimuth: f64,
    /// Depth of the command queue
    pub command_capacity: usize,
}

impl Default for FakeDomeConfig {
    fn default() -> Self {
        Self {
            az_vel: 3.0,
            telemetry_interval: Duration::from_millis(200),
            initial_azimuth: 0.0,
            command_capacity: 16,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct DomeAxis {
    curr_az: f64,
    cmd_az: Option<f64>,
}

impl DomeAxis {
    /// Advance the axis by at most `max_step` degrees toward the commanded azimuth.
    fn step(&mut self, max_step: f64) {
        if let Some(cmd_az) = self.cmd_az {
            let err = angle_diff(cmd_az, self.curr_az);
            let corr = err.clamp(-max_step, max_step);
            self.curr_az = wrap_azimuth(self.curr_az + corr);
        }
    }

    fn position(&self) -> DomePosition {
        DomePosition {
            azimuth_position: self.curr_az,
            azimuth_position_set: self.cmd_az.unwrap_or(self.curr_az),
            timestamp: Timestamp::now(),
        }
    }
}

/// Command link into a running [`FakeDome`].
///
/// Cheap to clone. Delivery never blocks: a full queue is reported as
/// [`DeliveryError::Full`].
#[derive(Debug, Clone)]
pub struct FakeDomeLink {
    tx: mpsc::Sender<MoveAzimuth>,
}

impl DomeCommandSink for FakeDomeLink {
    fn move_azimuth(&mut self, command: MoveAzimuth) -> Result<(), DeliveryError> {
        self.tx.try_send(command).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => DeliveryError::Full,
            mpsc::error::TrySendError::Closed(_) => DeliveryError::Closed,
        })
    }
}

/// Simulated dome running as a background tokio task.
///
/// The task is aborted on drop.
pub struct FakeDome {
    handle: JoinHandle<()>,
    axis: Arc<Mutex<DomeAxis>>,
}

impl FakeDome {
    /// Start the simulated dome.
    ///
    /// Status is published on `status_tx`; the returned link accepts commands.
    /// The task ends when every link is dropped or `status_tx` closes.
    pub fn spawn(config: FakeDomeConfig, status_tx: mpsc::Sender<DomeStatus>) -> (Self, FakeDomeLink) {
        let (tx, rx) = mpsc::channel(config.command_capacity.max(1));
        let axis = Arc::new(Mutex::new(DomeAxis {
            curr_az: wrap_azimuth(config.initial_azimuth),
            cmd_az: None,
        }));

        let handle = tokio::spawn(Self::run(config, axis.clone(), rx, status_tx));

        (Self { handle, axis }, FakeDomeLink { tx })
    }

    /// Last commanded azimuth, or `None` before the first move.
    pub fn commanded_azimuth(&self) -> Option<f64> {
        lock(&self.axis).cmd_az
    }

    /// Current simulated azimuth.
    pub fn current_azimuth(&self) -> f64 {
        lock(&self.axis).curr_az
    }

    /// True once the background task has stopped.
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    async fn run(
        config: FakeDomeConfig,
        axis: Arc<Mutex<DomeAxis>>,
        mut commands: mpsc::Receiver<MoveAzimuth>,
        status_tx: mpsc::Sender<DomeStatus>,
    ) {
        let max_step = (config.az_vel * config.telemetry_interval.as_secs_f64()).abs();
        let mut ticker = tokio::time::interval(config.telemetry_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        if status_tx
            .send(DomeStatus::CommandedState(AzimuthCommandedState::unknown()))
            .await
            .is_err()
        {
            return;
        }
        info!("Fake dome running at azimuth {:.3} deg", lock(&axis).curr_az);

        loop {
            let status = tokio::select! {
                command = commands.recv() => {
                    let Some(command) = command else {
                        debug!("All fake dome links dropped, stopping");
                        break;
                    };
                    lock(&axis).cmd_az = Some(command.azimuth);
                    debug!("Fake dome commanded to azimuth {:.3} deg", command.azimuth);
                    DomeStatus::CommandedState(AzimuthCommandedState::go_to_position(command.azimuth))
                }
                _ = ticker.tick() => {
                    let mut guard = lock(&axis);
                    guard.step(max_step);
                    DomeStatus::Position(guard.position())
                }
            };

            if status_tx.send(status).await.is_err() {
                debug!("Fake dome status receiver closed, stopping");
                break;
            }
        }
    }
}

impl Drop for FakeDome {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

fn lock(axis: &Mutex<DomeAxis>) -> MutexGuard<'_, DomeAxis> {
    axis.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use dome_proto::DomeCommandedState;

    #[test]
    fn test_axis_step_takes_shortest_path() {
        let mut axis = DomeAxis {
            curr_az: 359.0,
            cmd_az: Some(1.0),
        };
        axis.step(0.6);
        assert_relative_eq!(axis.curr_az, 359.6, epsilon = 1e-9);
        axis.step(0.6);
        assert_relative_eq!(axis.curr_az, 0.2, epsilon = 1e-9);
        axis.step(0.6);
        assert_relative_eq!(axis.curr_az, 0.8, epsilon = 1e-9);
        axis.step(0.6);
        assert_relative_eq!(axis.curr_az, 1.0, epsilon = 1e-9);
        axis.step(0.6);
        assert_relative_eq!(axis.curr_az, 1.0, epsilon = 1e-9);
    }

    #[test]
    fn test_axis_holds_without_command() {
        let mut axis = DomeAxis {
            curr_az: 42.0,
            cmd_az: None,
        };
        axis.step(10.0);
        assert_eq!(axis.curr_az, 42.0);
        assert_eq!(axis.position().azimuth_position_set, 42.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reports_unknown_then_go_to_position() {
        let (status_tx, mut status_rx) = mpsc::channel(64);
        let (dome, mut link) = FakeDome::spawn(FakeDomeConfig::default(), status_tx);

        let first = status_rx.recv().await.unwrap();
        assert!(matches!(
            first,
            DomeStatus::CommandedState(AzimuthCommandedState {
                commanded_state: DomeCommandedState::Unknown,
                ..
            })
        ));

        link.move_azimuth(MoveAzimuth::new(10.0)).unwrap();

        let commanded = loop {
            match status_rx.recv().await.unwrap() {
                DomeStatus::CommandedState(state) => break state,
                DomeStatus::Position(_) => continue,
            }
        };
        assert_eq!(commanded.commanded_state, DomeCommandedState::GoToPosition);
        assert_eq!(commanded.azimuth, Some(10.0));
        assert_eq!(dome.commanded_azimuth(), Some(10.0));
    }

    #[tokio::test(start_paused = true)]
    async fn test_slews_to_commanded_azimuth() {
        let (status_tx, mut status_rx) = mpsc::channel(64);
        let (dome, mut link) = FakeDome::spawn(FakeDomeConfig::default(), status_tx);
        link.move_azimuth(MoveAzimuth::new(3.0)).unwrap();

        // 3 deg at 3 deg/s with 0.2 s telemetry: settles within a handful of samples
        let mut arrived = false;
        for _ in 0..20 {
            if let DomeStatus::Position(pos) = status_rx.recv().await.unwrap() {
                if (pos.azimuth_position - 3.0).abs() < 1e-9 {
                    assert_eq!(pos.azimuth_position_set, 3.0);
                    arrived = true;
                    break;
                }
            }
        }
        assert!(arrived);
        assert_relative_eq!(dome.current_azimuth(), 3.0, epsilon = 1e-9);
    }

    #[tokio::test]
    async fn test_link_reports_closed_after_drop() {
        let (status_tx, _status_rx) = mpsc::channel(4);
        let (dome, mut link) = FakeDome::spawn(FakeDomeConfig::default(), status_tx);
        drop(dome);
        tokio::task::yield_now().await;

        // The aborted task drops its receiver
        let mut closed = false;
        for _ in 0..100 {
            if link.move_azimuth(MoveAzimuth::new(1.0)) == Err(DeliveryError::Closed) {
                closed = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        assert!(closed);
    }

    #[tokio::test]
    async fn test_full_queue_is_reported() {
        let config = FakeDomeConfig {
            command_capacity: 1,
            ..Default::default()
        };
        // Unread status channel of depth 1: the task blocks after its first event
        let (status_tx, _status_rx) = mpsc::channel(1);
        let (_dome, mut link) = FakeDome::spawn(config, status_tx);

        let mut saw_full = false;
        for i in 0..10 {
            if link.move_azimuth(MoveAzimuth::new(i as f64)) == Err(DeliveryError::Full) {
                saw_full = true;
                break;
            }
        }
        assert!(saw_full);
    }
}

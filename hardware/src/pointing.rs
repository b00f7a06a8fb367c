//! Simulated telescope pointing source.
//!
//! Produces a [`TelescopeTarget`] stream that drifts slowly (as when tracking a
//! field) and every `slew_every` updates jumps to a random position, as after
//! a new pointing command.

use std::time::Duration;

use dome_proto::{wrap_azimuth, TelescopeTarget};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// Lowest elevation a random slew will pick, in degrees
const MIN_SLEW_ELEVATION: f64 = 20.0;
/// Highest elevation a random slew will pick, in degrees
const MAX_SLEW_ELEVATION: f64 = 88.0;

/// Pointing simulation parameters.
#[derive(Debug, Clone)]
pub struct PointingConfig {
    /// Interval between published targets
    pub update_interval: Duration,
    /// Number of drift updates between random slews
    pub slew_every: u32,
    /// Azimuth and elevation drift per update, in degrees
    pub drift_per_update: f64,
    /// RNG seed; `None` seeds from the OS
    pub seed: Option<u64>,
}

impl Default for PointingConfig {
    fn default() -> Self {
        Self {
            update_interval: Duration::from_millis(500),
            slew_every: 20,
            drift_per_update: 0.001,
            seed: None,
        }
    }
}

/// Random-slew telescope target generator.
#[derive(Debug, Clone)]
pub struct SimulatedPointing {
    config: PointingConfig,
    rng: ChaCha8Rng,
    azimuth: f64,
    elevation: f64,
    updates_since_slew: u32,
}

impl SimulatedPointing {
    pub fn new(config: PointingConfig) -> Self {
        let seed = config.seed.unwrap_or_else(rand::random);
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let azimuth = rng.random_range(0.0..360.0);
        let elevation = rng.random_range(MIN_SLEW_ELEVATION..MAX_SLEW_ELEVATION);
        Self {
            config,
            rng,
            azimuth,
            elevation,
            updates_since_slew: 0,
        }
    }

    /// Produce the next target: a drift step, or a random slew when due.
    pub fn next_target(&mut self) -> TelescopeTarget {
        self.updates_since_slew += 1;
        if self.updates_since_slew >= self.config.slew_every.max(1) {
            self.updates_since_slew = 0;
            self.azimuth = self.rng.random_range(0.0..360.0);
            self.elevation = self
                .rng
                .random_range(MIN_SLEW_ELEVATION..MAX_SLEW_ELEVATION);
            debug!(
                "Simulated slew to az={:.3} el={:.3}",
                self.azimuth, self.elevation
            );
        } else {
            self.azimuth = wrap_azimuth(self.azimuth + self.config.drift_per_update);
            self.elevation = (self.elevation + self.config.drift_per_update).min(90.0);
        }
        TelescopeTarget::new(self.azimuth, self.elevation)
    }

    /// Publish targets on `tx` every `update_interval` until the receiver closes.
    pub fn spawn(mut self, tx: mpsc::Sender<TelescopeTarget>) -> JoinHandle<()> {
        tokio::spawn(async move {
            info!(
                "Simulated pointing started, update interval {:?}",
                self.config.update_interval
            );
            let mut ticker = tokio::time::interval(self.config.update_interval);
            loop {
                ticker.tick().await;
                if tx.send(self.next_target()).await.is_err() {
                    debug!("Target receiver closed, stopping simulated pointing");
                    break;
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn seeded(slew_every: u32) -> SimulatedPointing {
        SimulatedPointing::new(PointingConfig {
            slew_every,
            seed: Some(42),
            ..Default::default()
        })
    }

    #[test]
    fn test_seeded_runs_repeat() {
        let mut a = seeded(3);
        let mut b = seeded(3);
        for _ in 0..10 {
            let ta = a.next_target();
            let tb = b.next_target();
            assert!(ta.same_position(&tb));
        }
    }

    #[test]
    fn test_drift_between_slews() {
        let mut pointing = seeded(100);
        let first = pointing.next_target();
        let second = pointing.next_target();
        assert_relative_eq!(
            dome_proto::angle_diff(second.azimuth, first.azimuth),
            0.001,
            epsilon = 1e-9
        );
    }

    #[test]
    fn test_slews_stay_in_range() {
        let mut pointing = seeded(1);
        for _ in 0..200 {
            let target = pointing.next_target();
            assert!((0.0..360.0).contains(&target.azimuth));
            assert!((MIN_SLEW_ELEVATION..MAX_SLEW_ELEVATION).contains(&target.elevation));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_spawn_publishes_targets() {
        let (tx, mut rx) = mpsc::channel(8);
        let handle = seeded(5).spawn(tx);

        for _ in 0..3 {
            assert!(rx.recv().await.is_some());
        }
        drop(rx);
        handle.await.unwrap();
    }
}

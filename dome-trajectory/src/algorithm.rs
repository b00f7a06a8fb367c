//! Dome trajectory algorithms and the registry that maps configuration names
//! to them.
//!
//! An algorithm is a pure decision function: given the dome's current (or last
//! commanded) azimuth and a new telescope target, decide whether to move the dome
//! and where to. The control loop is agnostic to which algorithm is installed.

use std::collections::BTreeMap;
use std::fmt;

use dome_proto::{angle_diff, TelescopeTarget};
use serde::{Deserialize, Serialize};
use serde_yaml::{Mapping, Value};

use crate::error::ConfigurationError;

/// Outcome of one algorithm evaluation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MoveDecision {
    /// Leave the dome where it is
    NoMove,
    /// Command the dome to this azimuth, in degrees
    MoveTo(f64),
}

/// Trait for dome-following strategies.
///
/// # Contract
///
/// - `dome_azimuth` is `None` when the dome position has not been established
///   (startup, reconnect, or the dome reported an unknown commanded state).
///   Implementations must then return `MoveTo` so the position gets established.
/// - `decide` must be deterministic and side-effect free; the caller owns all
///   state and serializes calls.
/// - Calling `decide` again with the azimuth it just returned and the same target
///   must yield `NoMove`.
pub trait TrajectoryAlgorithm: Send + Sync + fmt::Debug {
    /// Registry name of this algorithm.
    fn name(&self) -> &str;

    /// Resolved parameters, including defaults, as they would appear in a
    /// configuration document.
    fn parameters(&self) -> Mapping;

    /// Decide whether and where to move the dome.
    fn decide(&self, dome_azimuth: Option<f64>, target: &TelescopeTarget) -> MoveDecision;
}

/// Builds an algorithm from its `algorithm_config` mapping.
///
/// Returns a human-readable message when the parameters are rejected.
pub type AlgorithmFactory = fn(&Mapping) -> Result<Box<dyn TrajectoryAlgorithm>, String>;

/// Maps configuration names to algorithm factories.
#[derive(Clone)]
pub struct AlgorithmRegistry {
    factories: BTreeMap<String, AlgorithmFactory>,
}

impl AlgorithmRegistry {
    /// Registry with no algorithms.
    pub fn empty() -> Self {
        Self {
            factories: BTreeMap::new(),
        }
    }

    /// Register (or replace) an algorithm under `name`.
    pub fn register(&mut self, name: impl Into<String>, factory: AlgorithmFactory) {
        self.factories.insert(name.into(), factory);
    }

    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<&str> {
        self.factories.keys().map(String::as_str).collect()
    }

    /// Instantiate the algorithm `name` with `parameters`.
    pub fn build(
        &self,
        name: &str,
        parameters: &Mapping,
    ) -> Result<Box<dyn TrajectoryAlgorithm>, ConfigurationError> {
        let factory =
            self.factories
                .get(name)
                .ok_or_else(|| ConfigurationError::UnknownAlgorithm {
                    name: name.to_string(),
                    known: self.names().join(", "),
                })?;

        factory(parameters).map_err(|message| ConfigurationError::InvalidParameter {
            algorithm: name.to_string(),
            message,
        })
    }
}

impl Default for AlgorithmRegistry {
    /// Registry with every built-in algorithm.
    fn default() -> Self {
        let mut registry = Self::empty();
        registry.register(SimpleAlgorithm::NAME, SimpleAlgorithm::from_parameters);
        registry
    }
}

impl fmt::Debug for AlgorithmRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AlgorithmRegistry")
            .field("algorithms", &self.names())
            .finish()
    }
}

/// Default maximum scaled azimuth error for the simple algorithm, in degrees.
pub const DEFAULT_MAX_DAZ: f64 = 5.0;

fn default_max_daz() -> f64 {
    DEFAULT_MAX_DAZ
}

/// Parameters of [`SimpleAlgorithm`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SimpleConfig {
    /// Maximum allowed difference between the dome commanded azimuth and the
    /// telescope target azimuth, scaled by cos(elevation), in degrees.
    #[serde(default = "default_max_daz")]
    pub max_daz: f64,
}

impl Default for SimpleConfig {
    fn default() -> Self {
        Self {
            max_daz: DEFAULT_MAX_DAZ,
        }
    }
}

/// Follow the target azimuth with an elevation-scaled hysteresis band.
///
/// The raw azimuth error is multiplied by cos(elevation) before being compared
/// with `max_daz`: near the zenith the aperture covers a wide range of azimuth,
/// so a given raw error matters less. When the scaled error exceeds `max_daz`
/// the dome is sent to the target's true azimuth, not a scaled one.
#[derive(Debug, Clone, PartialEq)]
pub struct SimpleAlgorithm {
    max_daz: f64,
}

impl SimpleAlgorithm {
    pub const NAME: &'static str = "simple";

    /// Create the algorithm; `max_daz` must be finite and strictly positive.
    pub fn new(config: SimpleConfig) -> Result<Self, String> {
        if !config.max_daz.is_finite() || config.max_daz <= 0.0 {
            return Err(format!("max_daz={} must be > 0", config.max_daz));
        }
        Ok(Self {
            max_daz: config.max_daz,
        })
    }

    /// [`AlgorithmFactory`] for the registry.
    pub fn from_parameters(parameters: &Mapping) -> Result<Box<dyn TrajectoryAlgorithm>, String> {
        let config: SimpleConfig = serde_yaml::from_value(Value::Mapping(parameters.clone()))
            .map_err(|e| e.to_string())?;
        Ok(Box::new(Self::new(config)?))
    }

    /// Maximum scaled azimuth error in degrees.
    pub fn max_daz(&self) -> f64 {
        self.max_daz
    }

    /// Azimuth error between target and dome, scaled by cos(elevation).
    pub fn scaled_error(dome_azimuth: f64, target: &TelescopeTarget) -> f64 {
        angle_diff(target.azimuth, dome_azimuth) * target.elevation.to_radians().cos()
    }
}

impl TrajectoryAlgorithm for SimpleAlgorithm {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn parameters(&self) -> Mapping {
        let mut mapping = Mapping::new();
        mapping.insert(Value::from("max_daz"), Value::from(self.max_daz));
        mapping
    }

    fn decide(&self, dome_azimuth: Option<f64>, target: &TelescopeTarget) -> MoveDecision {
        let Some(dome_azimuth) = dome_azimuth else {
            return MoveDecision::MoveTo(target.azimuth);
        };

        if Self::scaled_error(dome_azimuth, target).abs() > self.max_daz {
            MoveDecision::MoveTo(target.azimuth)
        } else {
            MoveDecision::NoMove
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use dome_proto::Timestamp;

    fn target(azimuth: f64, elevation: f64) -> TelescopeTarget {
        TelescopeTarget::with_timestamp(azimuth, elevation, Timestamp(0))
    }

    fn simple(max_daz: f64) -> SimpleAlgorithm {
        SimpleAlgorithm::new(SimpleConfig { max_daz }).unwrap()
    }

    #[test]
    fn test_unknown_dome_azimuth_always_moves() {
        let algo = simple(7.1);
        assert_eq!(
            algo.decide(None, &target(123.4, 89.0)),
            MoveDecision::MoveTo(123.4)
        );
        assert_eq!(
            algo.decide(None, &target(-0.001, 90.0)),
            MoveDecision::MoveTo(-0.001)
        );
    }

    #[test]
    fn test_repeat_decision_is_idempotent() {
        let algo = simple(7.1);
        let t = target(200.0, 30.0);
        let MoveDecision::MoveTo(az) = algo.decide(None, &t) else {
            panic!("cold start must move");
        };
        assert_eq!(algo.decide(Some(az), &t), MoveDecision::NoMove);
    }

    #[test]
    fn test_hysteresis_boundary_is_exclusive() {
        let algo = simple(7.1);
        assert_eq!(algo.decide(Some(0.0), &target(7.1, 0.0)), MoveDecision::NoMove);
        assert_eq!(algo.decide(Some(0.0), &target(-7.1, 0.0)), MoveDecision::NoMove);
        assert_eq!(
            algo.decide(Some(0.0), &target(7.1001, 0.0)),
            MoveDecision::MoveTo(7.1001)
        );
        assert_eq!(
            algo.decide(Some(0.0), &target(-7.1001, 0.0)),
            MoveDecision::MoveTo(-7.1001)
        );
    }

    #[test]
    fn test_zenith_suppresses_motion() {
        let algo = simple(0.5);
        for az in [1.0, 45.0, 179.0, 180.0, 270.0] {
            assert_eq!(algo.decide(Some(0.0), &target(az, 90.0)), MoveDecision::NoMove);
        }
    }

    #[test]
    fn test_elevation_scaling() {
        let algo = simple(7.1);
        let alt: f64 = 40.0;
        let min_daz_to_move = 7.1 / alt.to_radians().cos();

        assert_eq!(
            algo.decide(Some(0.0), &target(min_daz_to_move - 0.001, alt)),
            MoveDecision::NoMove
        );
        assert_eq!(
            algo.decide(Some(0.0), &target(min_daz_to_move + 0.001, alt)),
            MoveDecision::MoveTo(min_daz_to_move + 0.001)
        );
    }

    #[test]
    fn test_negative_elevation_is_accepted() {
        let algo = simple(5.0);
        // cos(-60) = 0.5: a 12 degree error scales to 6
        assert_eq!(
            algo.decide(Some(100.0), &target(112.0, -60.0)),
            MoveDecision::MoveTo(112.0)
        );
        assert_eq!(algo.decide(Some(100.0), &target(108.0, -60.0)), MoveDecision::NoMove);
    }

    #[test]
    fn test_wraparound_is_a_small_error() {
        let algo = simple(5.0);
        assert_eq!(algo.decide(Some(359.0), &target(1.0, 0.0)), MoveDecision::NoMove);
        assert_eq!(algo.decide(Some(1.0), &target(359.0, 0.0)), MoveDecision::NoMove);
        assert_eq!(
            algo.decide(Some(357.0), &target(3.0, 0.0)),
            MoveDecision::MoveTo(3.0)
        );
    }

    #[test]
    fn test_slew_then_jitter_scenario() {
        let algo = simple(7.1);
        assert_eq!(
            algo.decide(Some(0.0), &target(180.0, 40.0)),
            MoveDecision::MoveTo(180.0)
        );
        assert_relative_eq!(
            SimpleAlgorithm::scaled_error(180.0, &target(180.05, 40.0)),
            0.05 * 40f64.to_radians().cos(),
            epsilon = 1e-9
        );
        assert_eq!(
            algo.decide(Some(180.0), &target(180.05, 40.0)),
            MoveDecision::NoMove
        );
    }

    #[test]
    fn test_threshold_matches_scaled_error_grid() {
        let algo = simple(3.0);
        for dome in [0.0, 45.0, 190.0, 359.5] {
            for az in [0.5, 10.0, 100.0, 185.0, 350.0] {
                for el in [0.0, 30.0, 60.0, 85.0] {
                    let t = target(az, el);
                    let expected = if SimpleAlgorithm::scaled_error(dome, &t).abs() > 3.0 {
                        MoveDecision::MoveTo(az)
                    } else {
                        MoveDecision::NoMove
                    };
                    assert_eq!(algo.decide(Some(dome), &t), expected);
                }
            }
        }
    }

    #[test]
    fn test_rejects_non_positive_max_daz() {
        assert!(SimpleAlgorithm::new(SimpleConfig { max_daz: 0.0 }).is_err());
        assert!(SimpleAlgorithm::new(SimpleConfig { max_daz: -1.0 }).is_err());
        assert!(SimpleAlgorithm::new(SimpleConfig { max_daz: f64::NAN }).is_err());
        assert!(SimpleAlgorithm::new(SimpleConfig { max_daz: f64::INFINITY }).is_err());
    }

    #[test]
    fn test_from_parameters() {
        let params: Mapping = serde_yaml::from_str("max_daz: 7.1").unwrap();
        let algo = SimpleAlgorithm::from_parameters(&params).unwrap();
        assert_eq!(algo.name(), "simple");
        assert_eq!(algo.parameters(), params);

        // Integers are accepted and defaults fill in
        let params: Mapping = serde_yaml::from_str("max_daz: 7").unwrap();
        assert!(SimpleAlgorithm::from_parameters(&params).is_ok());
        let algo = SimpleAlgorithm::from_parameters(&Mapping::new()).unwrap();
        assert_eq!(algo.parameters().get("max_daz"), Some(&Value::from(DEFAULT_MAX_DAZ)));

        let params: Mapping = serde_yaml::from_str("max_dazz: 7.1").unwrap();
        assert!(SimpleAlgorithm::from_parameters(&params).is_err());
        let params: Mapping = serde_yaml::from_str("max_daz: wide").unwrap();
        assert!(SimpleAlgorithm::from_parameters(&params).is_err());
    }

    #[derive(Debug)]
    struct NeverMove;

    impl TrajectoryAlgorithm for NeverMove {
        fn name(&self) -> &str {
            "never"
        }

        fn parameters(&self) -> Mapping {
            Mapping::new()
        }

        fn decide(&self, dome_azimuth: Option<f64>, target: &TelescopeTarget) -> MoveDecision {
            match dome_azimuth {
                None => MoveDecision::MoveTo(target.azimuth),
                Some(_) => MoveDecision::NoMove,
            }
        }
    }

    fn never_factory(_: &Mapping) -> Result<Box<dyn TrajectoryAlgorithm>, String> {
        Ok(Box::new(NeverMove))
    }

    #[test]
    fn test_registry() {
        let mut registry = AlgorithmRegistry::default();
        assert!(registry.contains("simple"));
        assert!(!registry.contains("never"));

        registry.register("never", never_factory);
        assert_eq!(registry.names(), vec!["never", "simple"]);

        let algo = registry.build("never", &Mapping::new()).unwrap();
        assert_eq!(algo.decide(Some(0.0), &target(180.0, 0.0)), MoveDecision::NoMove);

        let err = registry.build("lead", &Mapping::new()).unwrap_err();
        assert!(matches!(err, ConfigurationError::UnknownAlgorithm { .. }));
        assert!(err.to_string().contains("never, simple"));

        let params: Mapping = serde_yaml::from_str("max_daz: -3").unwrap();
        let err = registry.build("simple", &params).unwrap_err();
        assert!(matches!(err, ConfigurationError::InvalidParameter { .. }));
    }
}

//! Simulation-wide solver parameters.

use super::PhysicsError;
use crate::math as m;

/// How a constraint corrects positional drift.
///
/// Selectable per joint and per contact.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde-types", derive(serde::Serialize, serde::Deserialize))]
pub enum PositionCorrection {
    /// Feed a fraction of the position error into the velocity constraint as a bias.
    /// Cheapest, but adds energy into the system.
    Baumgarte,
    /// Solve a separate velocity-like system after integrating positions
    /// and move bodies by the resulting velocity without changing their real velocity.
    PseudoVelocities,
    /// Nonlinear Gauss-Seidel reusing the effective mass computed at the start of the step.
    ModifiedNgs,
    /// Nonlinear Gauss-Seidel recomputing the effective mass every iteration.
    FullNgs,
}

impl Default for PositionCorrection {
    fn default() -> Self {
        PositionCorrection::FullNgs
    }
}

impl PositionCorrection {
    /// Whether this strategy corrects errors in the velocity pass.
    #[inline]
    pub fn uses_velocity_bias(&self) -> bool {
        matches!(self, PositionCorrection::Baumgarte)
    }

    /// Whether this strategy runs in the position pass.
    #[inline]
    pub fn is_ngs(&self) -> bool {
        matches!(
            self,
            PositionCorrection::ModifiedNgs | PositionCorrection::FullNgs
        )
    }
}

/// Parameters of the constraint solver shared by every island in a world.
#[derive(Clone, Copy, Debug)]
#[cfg_attr(feature = "serde-types", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde-types", serde(default))]
pub struct SolverConfig {
    /// Number of passes over all velocity constraints per step.
    pub velocity_iterations: usize,
    /// Maximum number of passes over all position constraints per step.
    pub position_iterations: usize,
    /// Velocity passes in a continuous collision sub-step.
    pub toi_velocity_iterations: usize,
    /// Maximum position passes in a continuous collision sub-step.
    pub toi_position_iterations: usize,
    /// Penetration and joint error below which positions count as solved.
    pub linear_slop: f64,
    /// Overlap that contact position correction leaves in place.
    /// Kept below `linear_slop` so resting contacts count as solved.
    pub allowed_penetration: f64,
    /// Allowed angular error below which angles count as solved.
    pub angular_slop: f64,
    /// Largest linear position correction applied to a single constraint in one pass.
    pub max_linear_correction: f64,
    /// Largest angular position correction applied to a single constraint in one pass.
    pub max_angular_correction: f64,
    /// Largest distance a body may travel in one step.
    pub max_translation: f64,
    /// Largest angle a body may rotate in one step.
    pub max_rotation: f64,
    /// Fraction of contact overlap resolved per position pass.
    pub baumgarte: f64,
    /// Fraction of overlap resolved per pass in continuous collision sub-steps.
    pub toi_baumgarte: f64,
    /// Approach speed under which contacts don't bounce.
    pub velocity_threshold: f64,
    /// Linear speed under which a body is considered at rest.
    pub linear_sleep_tolerance: f64,
    /// Angular speed under which a body is considered at rest.
    pub angular_sleep_tolerance: f64,
    /// Time an island must stay at rest before it falls asleep.
    pub time_to_sleep: f64,
    pub allow_sleep: bool,
    /// Apply the previous step's impulses at the start of the velocity solve.
    pub warm_starting: bool,
    /// Correction strategy given to contacts that don't choose their own.
    pub contact_correction: PositionCorrection,
}

impl Default for SolverConfig {
    fn default() -> Self {
        Self {
            velocity_iterations: 8,
            position_iterations: 3,
            toi_velocity_iterations: 8,
            toi_position_iterations: 20,
            linear_slop: 0.005,
            allowed_penetration: 0.0025,
            angular_slop: m::Angle::Deg(2.0).rad(),
            max_linear_correction: 0.2,
            max_angular_correction: m::Angle::Deg(8.0).rad(),
            max_translation: 2.0,
            max_rotation: 0.5 * std::f64::consts::PI,
            baumgarte: 0.2,
            toi_baumgarte: 0.75,
            velocity_threshold: 1.0,
            linear_sleep_tolerance: 0.01,
            angular_sleep_tolerance: m::Angle::Deg(2.0).rad(),
            time_to_sleep: 0.5,
            allow_sleep: true,
            warm_starting: true,
            contact_correction: PositionCorrection::FullNgs,
        }
    }
}

impl SolverConfig {
    /// Check that the parameters make sense together.
    pub fn validate(&self) -> Result<(), PhysicsError> {
        fn check(ok: bool, reason: &'static str) -> Result<(), PhysicsError> {
            if ok {
                Ok(())
            } else {
                Err(PhysicsError::InvalidConfig(reason))
            }
        }
        check(
            self.velocity_iterations > 0,
            "velocity_iterations must be at least 1",
        )?;
        check(self.linear_slop > 0.0, "linear_slop must be positive")?;
        check(
            (0.0..self.linear_slop).contains(&self.allowed_penetration),
            "allowed_penetration must be between 0 and linear_slop",
        )?;
        check(self.angular_slop > 0.0, "angular_slop must be positive")?;
        check(
            self.max_translation > 0.0 && self.max_rotation > 0.0,
            "max_translation and max_rotation must be positive",
        )?;
        check(
            self.max_linear_correction > 0.0 && self.max_angular_correction > 0.0,
            "maximum corrections must be positive",
        )?;
        check(
            (0.0..=1.0).contains(&self.baumgarte) && (0.0..=1.0).contains(&self.toi_baumgarte),
            "baumgarte factors must be between 0 and 1",
        )?;
        check(
            self.linear_sleep_tolerance >= 0.0
                && self.angular_sleep_tolerance >= 0.0
                && self.time_to_sleep >= 0.0,
            "sleep tolerances must not be negative",
        )?;
        Ok(())
    }
}

/// Timing information for a single step or sub-step.
#[derive(Clone, Copy, Debug)]
pub struct TimeStep {
    pub dt: f64,
    /// Inverse of `dt`, zero if `dt` is zero.
    pub inv_dt: f64,
    /// `dt` of this step divided by `dt` of the previous one,
    /// used to scale warm starting impulses when the timestep changes.
    pub dt_ratio: f64,
    pub velocity_iterations: usize,
    pub position_iterations: usize,
    pub warm_starting: bool,
}

impl TimeStep {
    pub fn new(dt: f64, prev_inv_dt: f64, config: &SolverConfig) -> Self {
        let inv_dt = if dt > 0.0 { 1.0 / dt } else { 0.0 };
        Self {
            dt,
            inv_dt,
            dt_ratio: prev_inv_dt * dt,
            velocity_iterations: config.velocity_iterations,
            position_iterations: config.position_iterations,
            warm_starting: config.warm_starting,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        assert!(SolverConfig::default().validate().is_ok());
    }

    #[test]
    fn invalid_configs_are_rejected() {
        let cfg = SolverConfig {
            velocity_iterations: 0,
            ..Default::default()
        };
        assert!(matches!(
            cfg.validate(),
            Err(PhysicsError::InvalidConfig(_))
        ));
        let cfg = SolverConfig {
            baumgarte: 1.5,
            ..Default::default()
        };
        assert!(cfg.validate().is_err());
        // correction must leave contacts inside the solved range
        let cfg = SolverConfig {
            allowed_penetration: 0.005,
            ..Default::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn timestep_ratio() {
        let cfg = SolverConfig::default();
        let step = TimeStep::new(1.0 / 30.0, 60.0, &cfg);
        assert!((step.dt_ratio - 2.0).abs() < 1e-12);
        assert!((step.inv_dt - 30.0).abs() < 1e-9);
        let zero = TimeStep::new(0.0, 60.0, &cfg);
        assert_eq!(zero.inv_dt, 0.0);
    }

    #[cfg(feature = "serde-types")]
    #[test]
    fn config_from_ron() {
        let cfg: SolverConfig =
            ron::from_str("(velocity_iterations: 12, contact_correction: Baumgarte)")
                .expect("Failed to parse config");
        assert_eq!(cfg.velocity_iterations, 12);
        assert_eq!(cfg.contact_correction, PositionCorrection::Baumgarte);
        // unspecified fields keep their defaults
        assert_eq!(cfg.position_iterations, 3);
    }
}

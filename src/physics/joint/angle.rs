use super::{
    push_limit_rows, solve_limit_position, Jacobian, JointBodies, JointError, JointLimit,
    JointParams, JointSolver, LimitImpulses, PseudoRows,
};
use crate::{
    math as m,
    physics::{Position, SolverData},
};

/// What an [`AngleJoint`] constrains the relative angle to.
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "serde-types", derive(serde::Serialize, serde::Deserialize))]
pub enum AngleTarget {
    /// Hold the relative angle at exactly this value.
    Fixed(f64),
    /// Keep the relative angle within a range.
    Range(JointLimit),
}

/// A joint constraining only the relative angle of two bodies.
#[derive(Clone, Copy, Debug)]
pub struct AngleJoint {
    pub target: AngleTarget,
    /// Largest accumulated impulse the joint can apply to hold a fixed target.
    pub max_impulse: f64,
    impulse: f64,
    limit_impulses: LimitImpulses,
    inv_k: f64,
    angle: f64,
    bias: f64,
}

impl AngleJoint {
    pub fn new(target: AngleTarget) -> Self {
        Self {
            target,
            max_impulse: f64::INFINITY,
            impulse: 0.0,
            limit_impulses: LimitImpulses::default(),
            inv_k: 0.0,
            angle: 0.0,
            bias: 0.0,
        }
    }

    pub fn with_max_impulse(mut self, max_impulse: f64) -> Self {
        self.max_impulse = max_impulse;
        self
    }

    #[inline]
    pub fn impulse(&self) -> f64 {
        self.impulse + self.limit_impulses.axial()
    }
}

fn relative_angle(p: &[Position; 2]) -> f64 {
    m::normalize_angle(p[1].a - p[0].a)
}

impl JointSolver for AngleJoint {
    fn prepare(
        &mut self,
        params: &JointParams,
        bodies: &JointBodies,
        data: &SolverData,
    ) -> JointError {
        let p = bodies.read_positions(data.positions);
        self.inv_k = bodies.inv_inertia[0] + bodies.inv_inertia[1];
        self.angle = relative_angle(&p);

        match self.target {
            AngleTarget::Fixed(target) => {
                let c = m::normalize_angle(self.angle - target);
                self.bias = if params.correction.uses_velocity_bias() {
                    -params.bias_factor * data.step.inv_dt * c
                } else {
                    0.0
                };
                JointError::angular(c.abs())
            }
            AngleTarget::Range(limit) => JointError::angular(limit.violation(self.angle)),
        }
    }

    fn warm_start(&mut self, bodies: &JointBodies, data: &mut SolverData) {
        let ratio = data.step.dt_ratio;
        self.impulse *= ratio;
        self.limit_impulses.scale(ratio);
        let mut v = bodies.read_velocities(data.velocities);
        bodies.apply_angular_impulse(&mut v, self.impulse + self.limit_impulses.axial());
        bodies.write_velocities(data.velocities, v);
    }

    fn reset_impulse(&mut self) {
        self.impulse = 0.0;
        self.limit_impulses.reset();
    }

    fn solve_velocity(
        &mut self,
        params: &JointParams,
        bodies: &JointBodies,
        data: &mut SolverData,
    ) {
        if self.inv_k == 0.0 {
            return;
        }
        let mut v = bodies.read_velocities(data.velocities);
        match self.target {
            AngleTarget::Fixed(_) => {
                let cdot = v[1].angular - v[0].angular;
                let mass = 1.0 / (self.inv_k + params.softness);
                let impulse =
                    mass * (self.bias - cdot - params.softness * self.impulse);
                let old_impulse = self.impulse;
                self.impulse = (old_impulse + impulse).clamp(-self.max_impulse, self.max_impulse);
                bodies.apply_angular_impulse(&mut v, self.impulse - old_impulse);
            }
            AngleTarget::Range(limit) => {
                self.limit_impulses.solve_velocity(
                    &limit,
                    self.angle,
                    &Jacobian::angular(),
                    1.0 / self.inv_k,
                    params,
                    data.step.inv_dt,
                    bodies,
                    &mut v,
                );
            }
        }
        bodies.write_velocities(data.velocities, v);
    }

    fn solve_position(
        &mut self,
        _: &JointParams,
        bodies: &JointBodies,
        data: &mut SolverData,
    ) -> JointError {
        if self.inv_k == 0.0 {
            return JointError::default();
        }
        let cfg = data.config;
        let mut p = bodies.read_positions(data.positions);
        let angle = relative_angle(&p);

        let error = match self.target {
            AngleTarget::Fixed(target) => {
                let error = m::normalize_angle(angle - target);
                let c = error.clamp(-cfg.max_angular_correction, cfg.max_angular_correction);
                bodies.apply_angular_correction(&mut p, -c / self.inv_k);
                error.abs()
            }
            AngleTarget::Range(limit) => solve_limit_position(
                &limit,
                angle,
                &Jacobian::angular(),
                self.inv_k,
                cfg.angular_slop,
                cfg.max_angular_correction,
                bodies,
                &mut p,
            ),
        };

        bodies.write_positions(data.positions, p);
        JointError::angular(error)
    }

    fn pseudo_rows(&mut self, bodies: &JointBodies, p: &[Position; 2], rows: &mut PseudoRows) {
        if bodies.angular_mass() == 0.0 {
            return;
        }
        let angle = relative_angle(p);
        match self.target {
            AngleTarget::Fixed(target) => {
                rows.push(Jacobian::angular(), m::normalize_angle(angle - target), false)
            }
            AngleTarget::Range(limit) => push_limit_rows(&limit, angle, Jacobian::angular(), rows),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::physics::{
        joint::JointBuilder, Body, BodySet, Joint, SolverConfig, TimeStep, Velocity,
    };

    fn setup(target: AngleTarget) -> (Vec<Position>, Vec<Velocity>, Joint) {
        let mut set = BodySet::new();
        let a = set.insert(Body::new_dynamic(1.0, 1.0));
        let b = set.insert(Body::new_dynamic(1.0, 1.0).with_position(m::Vec2::new(3.0, 0.0)));
        set.get_mut(b).unwrap().island_index = 1;
        let mut joint = JointBuilder::new(a).with_target(b).build_angle(target);
        assert!(joint.bind(&set));
        let positions = vec![
            Position::default(),
            Position {
                c: m::Vec2::new(3.0, 0.0),
                a: 0.3,
            },
        ];
        let velocities = vec![
            Velocity {
                linear: m::Vec2::zero(),
                angular: 1.0,
            },
            Velocity::default(),
        ];
        (positions, velocities, joint)
    }

    #[test]
    fn fixed_angle_syncs_rotation() {
        let (mut pos, mut vel, mut joint) = setup(AngleTarget::Fixed(0.3));
        let cfg = SolverConfig::default();
        let mut data = SolverData {
            step: TimeStep::new(1.0 / 60.0, 0.0, &cfg),
            config: &cfg,
            positions: &mut pos,
            velocities: &mut vel,
        };
        joint.init_velocity_constraints(&mut data);
        assert!(joint.last_error().angular < 1e-12);
        joint.solve_velocity_constraints(&mut data);
        assert!((data.velocities[0].angular - 0.5).abs() < 1e-12);
        assert!((data.velocities[1].angular - 0.5).abs() < 1e-12);
        // linear motion is unaffected
        assert_eq!(data.velocities[1].linear, m::Vec2::zero());
    }

    #[test]
    fn max_impulse_caps_holding_torque() {
        let (mut pos, mut vel, mut joint) = setup(AngleTarget::Fixed(0.3));
        if let crate::physics::JointKind::Angle(ang) = &mut joint.kind {
            ang.max_impulse = 0.1;
        }
        let cfg = SolverConfig::default();
        let mut data = SolverData {
            step: TimeStep::new(1.0 / 60.0, 0.0, &cfg),
            config: &cfg,
            positions: &mut pos,
            velocities: &mut vel,
        };
        joint.init_velocity_constraints(&mut data);
        joint.solve_velocity_constraints(&mut data);
        assert!((data.velocities[0].angular - 0.9).abs() < 1e-12);
    }

    #[test]
    fn range_position_correction() {
        let (mut pos, mut vel, mut joint) =
            setup(AngleTarget::Range(JointLimit::new(-0.1, 0.1)));
        let cfg = SolverConfig::default();
        let mut data = SolverData {
            step: TimeStep::new(1.0 / 60.0, 0.0, &cfg),
            config: &cfg,
            positions: &mut pos,
            velocities: &mut vel,
        };
        joint.init_velocity_constraints(&mut data);
        assert!((joint.last_error().angular - 0.2).abs() < 1e-12);
        for _ in 0..10 {
            if joint.solve_position_constraints(&mut data) {
                break;
            }
        }
        let angle = data.positions[1].a - data.positions[0].a;
        assert!(angle <= 0.1 + cfg.angular_slop + 1e-9);
    }
}

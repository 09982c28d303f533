use super::{
    push_limit_rows, solve_limit_position, Jacobian, JointBodies, JointError, JointLimit,
    JointMotor, JointParams, JointSolver, LimitImpulses, PseudoRows,
};
use crate::{
    math as m,
    physics::{Position, PositionCorrection, SolverData},
};

/// A joint pinning an anchor point on one body to an anchor point on another,
/// leaving only relative rotation free.
///
/// The rotation can be limited to a range and driven with a motor.
#[derive(Clone, Copy, Debug)]
pub struct RevoluteJoint {
    /// Anchor points relative to each body's center of mass.
    /// For joints attached to the world, the second anchor is in world space.
    pub local_anchors: [m::Vec2; 2],
    /// Relative angle of the bodies when the joint angle is zero.
    pub reference_angle: f64,
    pub limit: Option<JointLimit>,
    pub motor: Option<JointMotor>,
    impulse: m::Vec2,
    motor_impulse: f64,
    limit_impulses: LimitImpulses,
    // values computed at the start of the step
    r: [m::Vec2; 2],
    k: m::Mat2,
    axial_mass: f64,
    bias: m::Vec2,
    angle: f64,
}

impl RevoluteJoint {
    pub fn new(local_anchors: [m::Vec2; 2], reference_angle: f64) -> Self {
        Self {
            local_anchors,
            reference_angle,
            limit: None,
            motor: None,
            impulse: m::Vec2::zero(),
            motor_impulse: 0.0,
            limit_impulses: LimitImpulses::default(),
            r: [m::Vec2::zero(); 2],
            k: m::Mat2::new(m::Vec2::zero(), m::Vec2::zero()),
            axial_mass: 0.0,
            bias: m::Vec2::zero(),
            angle: 0.0,
        }
    }

    pub fn with_limit(mut self, limit: JointLimit) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn with_motor(mut self, motor: JointMotor) -> Self {
        self.motor = Some(motor);
        self
    }

    /// Accumulated impulse keeping the anchors together.
    #[inline]
    pub fn impulse(&self) -> m::Vec2 {
        self.impulse
    }

    #[inline]
    pub fn motor_impulse(&self) -> f64 {
        self.motor_impulse
    }

    fn joint_angle(&self, p: &[Position; 2]) -> f64 {
        m::normalize_angle(p[1].a - p[0].a - self.reference_angle)
    }

    fn anchors(&self, p: &[Position; 2]) -> [m::Vec2; 2] {
        [
            m::rotate(p[0].a, self.local_anchors[0]),
            m::rotate(p[1].a, self.local_anchors[1]),
        ]
    }
}

impl JointSolver for RevoluteJoint {
    fn prepare(
        &mut self,
        params: &JointParams,
        bodies: &JointBodies,
        data: &SolverData,
    ) -> JointError {
        let p = bodies.read_positions(data.positions);
        self.r = self.anchors(&p);
        self.k = bodies.point_matrix(&self.r);
        self.axial_mass = bodies.angular_mass();
        self.angle = self.joint_angle(&p);

        let c = p[1].c + self.r[1] - p[0].c - self.r[0];
        self.bias = if params.correction.uses_velocity_bias() {
            c * (-params.bias_factor * data.step.inv_dt)
        } else {
            m::Vec2::zero()
        };

        JointError {
            linear: c.mag(),
            angular: self.limit.map(|l| l.violation(self.angle)).unwrap_or(0.0),
        }
    }

    fn warm_start(&mut self, bodies: &JointBodies, data: &mut SolverData) {
        let ratio = data.step.dt_ratio;
        self.impulse *= ratio;
        self.motor_impulse *= ratio;
        self.limit_impulses.scale(ratio);

        let mut v = bodies.read_velocities(data.velocities);
        bodies.apply_point_impulse(&mut v, &self.r, self.impulse);
        bodies.apply_angular_impulse(&mut v, self.motor_impulse + self.limit_impulses.axial());
        bodies.write_velocities(data.velocities, v);
    }

    fn reset_impulse(&mut self) {
        self.impulse = m::Vec2::zero();
        self.motor_impulse = 0.0;
        self.limit_impulses.reset();
    }

    fn solve_velocity(
        &mut self,
        params: &JointParams,
        bodies: &JointBodies,
        data: &mut SolverData,
    ) {
        let mut v = bodies.read_velocities(data.velocities);
        let can_rotate = self.axial_mass > 0.0;

        if let (Some(motor), true) = (self.motor, can_rotate) {
            let cdot = v[1].angular - v[0].angular - motor.speed;
            let impulse = -self.axial_mass * cdot;
            let old_impulse = self.motor_impulse;
            let max_impulse = motor.max_force * data.step.dt;
            self.motor_impulse = (old_impulse + impulse).clamp(-max_impulse, max_impulse);
            bodies.apply_angular_impulse(&mut v, self.motor_impulse - old_impulse);
        }

        if let (Some(limit), true) = (self.limit, can_rotate) {
            self.limit_impulses.solve_velocity(
                &limit,
                self.angle,
                &Jacobian::angular(),
                self.axial_mass,
                params,
                data.step.inv_dt,
                bodies,
                &mut v,
            );
        }

        let cdot = v[1].point_velocity(self.r[1]) - v[0].point_velocity(self.r[0]);
        let mut soft_k = self.k;
        soft_k.cols[0].x += params.softness;
        soft_k.cols[1].y += params.softness;
        let impulse = m::inverse2(soft_k) * (self.bias - cdot - self.impulse * params.softness);
        self.impulse += impulse;
        bodies.apply_point_impulse(&mut v, &self.r, impulse);

        bodies.write_velocities(data.velocities, v);
    }

    fn solve_position(
        &mut self,
        params: &JointParams,
        bodies: &JointBodies,
        data: &mut SolverData,
    ) -> JointError {
        let mut p = bodies.read_positions(data.positions);
        let cfg = data.config;

        let mut angular_error = 0.0;
        if let (Some(limit), true) = (self.limit, self.axial_mass > 0.0) {
            let angle = self.joint_angle(&p);
            angular_error = solve_limit_position(
                &limit,
                angle,
                &Jacobian::angular(),
                1.0 / self.axial_mass,
                cfg.angular_slop,
                cfg.max_angular_correction,
                bodies,
                &mut p,
            );
        }

        let r = self.anchors(&p);
        let c = p[1].c + r[1] - p[0].c - r[0];
        let k = match params.correction {
            PositionCorrection::ModifiedNgs => self.k,
            _ => bodies.point_matrix(&r),
        };
        let impulse = -(m::inverse2(k) * c);
        bodies.apply_point_correction(&mut p, &r, impulse);

        bodies.write_positions(data.positions, p);
        JointError {
            linear: c.mag(),
            angular: angular_error,
        }
    }

    fn pseudo_rows(&mut self, bodies: &JointBodies, p: &[Position; 2], rows: &mut PseudoRows) {
        let r = self.anchors(p);
        rows.push_point(&r, p[1].c + r[1] - p[0].c - r[0]);
        if let (Some(limit), true) = (self.limit, bodies.angular_mass() > 0.0) {
            push_limit_rows(&limit, self.joint_angle(p), Jacobian::angular(), rows);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::physics::{
        joint::JointBuilder, Body, BodySet, JointKind, SolverConfig, TimeStep, Velocity,
    };

    /// A disc hinged to a static body at the origin, `offset` away from its center.
    fn setup(velocity_b: Velocity, offset: f64) -> (BodySet, crate::physics::Joint) {
        let mut set = BodySet::new();
        let a = set.insert(Body::new_static());
        let b = set.insert(
            Body::new_disc(0.5, 1.0)
                .with_position(m::Vec2::new(offset, 0.0))
                .with_velocity(velocity_b),
        );
        set.get_mut(a).unwrap().island_index = 0;
        set.get_mut(b).unwrap().island_index = 1;
        let mut joint = JointBuilder::new(a)
            .with_target(b)
            .with_target_origin(m::Vec2::new(-offset, 0.0))
            .build_revolute();
        assert!(joint.bind(&set));
        (set, joint)
    }

    fn state(set: &BodySet) -> (Vec<Position>, Vec<Velocity>) {
        let mut bodies: Vec<_> = set.iter().map(|(_, b)| b).collect();
        bodies.sort_by_key(|b| b.island_index);
        (
            bodies
                .iter()
                .map(|b| Position {
                    c: b.position,
                    a: b.angle,
                })
                .collect(),
            bodies.iter().map(|b| b.velocity).collect(),
        )
    }

    #[test]
    fn velocity_solve_removes_anchor_drift() {
        let (set, mut joint) = setup(
            Velocity {
                linear: m::Vec2::new(1.0, 1.0),
                angular: 0.0,
            },
            1.0,
        );
        let cfg = SolverConfig::default();
        let step = TimeStep::new(1.0 / 60.0, 0.0, &cfg);
        let (mut pos, mut vel) = state(&set);
        let mut data = SolverData {
            step,
            config: &cfg,
            positions: &mut pos,
            velocities: &mut vel,
        };
        assert!(joint.init_velocity_constraints(&mut data));
        joint.solve_velocity_constraints(&mut data);

        // anchor at the origin should have no velocity after one exact block solve
        let anchor_vel = data.velocities[1].point_velocity(m::Vec2::new(-1.0, 0.0));
        assert!(anchor_vel.mag() < 1e-9);
    }

    #[test]
    fn motor_drives_rotation() {
        let (set, mut joint) = setup(Velocity::default(), 0.0);
        if let JointKind::Revolute(rev) = &mut joint.kind {
            rev.motor = Some(JointMotor {
                speed: 2.0,
                max_force: 1000.0,
            });
        }
        let cfg = SolverConfig::default();
        let step = TimeStep::new(1.0 / 60.0, 0.0, &cfg);
        let (mut pos, mut vel) = state(&set);
        let mut data = SolverData {
            step,
            config: &cfg,
            positions: &mut pos,
            velocities: &mut vel,
        };
        joint.init_velocity_constraints(&mut data);
        for _ in 0..20 {
            joint.solve_velocity_constraints(&mut data);
        }
        assert!((data.velocities[1].angular - 2.0).abs() < 1e-3);
    }

    #[test]
    fn position_solve_closes_gap() {
        let (mut set, mut joint) = setup(Velocity::default(), 1.0);
        // pull the disc away from the anchor
        let b = set.iter().find(|(_, b)| b.island_index == 1).unwrap().0;
        set.get_mut(b).unwrap().position = m::Vec2::new(1.1, 0.05);

        let cfg = SolverConfig::default();
        let step = TimeStep::new(1.0 / 60.0, 0.0, &cfg);
        let (mut pos, mut vel) = state(&set);
        let mut data = SolverData {
            step,
            config: &cfg,
            positions: &mut pos,
            velocities: &mut vel,
        };
        joint.init_velocity_constraints(&mut data);
        let first_error = joint.last_error().linear;
        assert!(first_error > 0.1);
        let mut solved = false;
        for _ in 0..5 {
            if joint.solve_position_constraints(&mut data) {
                solved = true;
                break;
            }
        }
        assert!(solved);
        let r = m::rotate(data.positions[1].a, m::Vec2::new(-1.0, 0.0));
        assert!((data.positions[1].c + r).mag() < cfg.linear_slop);
    }

    #[test]
    fn limit_stops_rotation() {
        let (set, mut joint) = setup(
            Velocity {
                linear: m::Vec2::zero(),
                angular: 5.0,
            },
            0.0,
        );
        if let JointKind::Revolute(rev) = &mut joint.kind {
            rev.limit = Some(JointLimit::new(-0.1, 0.0));
        }
        let cfg = SolverConfig::default();
        let step = TimeStep::new(1.0 / 60.0, 0.0, &cfg);
        let (mut pos, mut vel) = state(&set);
        let mut data = SolverData {
            step,
            config: &cfg,
            positions: &mut pos,
            velocities: &mut vel,
        };
        joint.init_velocity_constraints(&mut data);
        for _ in 0..10 {
            joint.solve_velocity_constraints(&mut data);
        }
        // at the upper bound, so no rotation in the positive direction
        assert!(data.velocities[1].angular <= 1e-9);
    }
}

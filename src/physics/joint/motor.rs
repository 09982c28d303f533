use super::{JointBodies, JointError, JointParams, JointSolver, PseudoRows};
use crate::{
    math as m,
    physics::{Position, SolverData},
};

/// A joint driving the second body towards a target offset from the first
/// using bounded force and torque.
///
/// Works purely on velocities: it has its own correction factor
/// and ignores the joint's position correction strategy.
#[derive(Clone, Copy, Debug)]
pub struct MotorJoint {
    /// Target position of the second body in the first body's frame.
    pub linear_offset: m::Vec2,
    /// Target relative angle.
    pub angular_offset: f64,
    pub max_force: f64,
    pub max_torque: f64,
    /// Fraction of the offset error removed per step, between 0 and 1.
    pub correction_factor: f64,
    linear_impulse: m::Vec2,
    angular_impulse: f64,
    linear_mass: m::Mat2,
    angular_mass: f64,
    linear_error: m::Vec2,
    angular_error: f64,
}

impl MotorJoint {
    pub fn new(max_force: f64, max_torque: f64) -> Self {
        Self {
            linear_offset: m::Vec2::zero(),
            angular_offset: 0.0,
            max_force,
            max_torque,
            correction_factor: 0.3,
            linear_impulse: m::Vec2::zero(),
            angular_impulse: 0.0,
            linear_mass: m::Mat2::new(m::Vec2::zero(), m::Vec2::zero()),
            angular_mass: 0.0,
            linear_error: m::Vec2::zero(),
            angular_error: 0.0,
        }
    }

    pub fn with_offset(mut self, linear: m::Vec2, angular: f64) -> Self {
        self.linear_offset = linear;
        self.angular_offset = angular;
        self
    }

    #[inline]
    pub fn impulse(&self) -> (m::Vec2, f64) {
        (self.linear_impulse, self.angular_impulse)
    }
}

// bodies are driven at their centers of mass
const CENTERS: [m::Vec2; 2] = [m::Vec2 { x: 0.0, y: 0.0 }; 2];

impl JointSolver for MotorJoint {
    fn prepare(&mut self, _: &JointParams, bodies: &JointBodies, data: &SolverData) -> JointError {
        let p = bodies.read_positions(data.positions);
        let k = bodies.point_matrix(&CENTERS);
        self.linear_mass = if k.determinant() != 0.0 {
            m::inverse2(k)
        } else {
            m::Mat2::new(m::Vec2::zero(), m::Vec2::zero())
        };
        self.angular_mass = bodies.angular_mass();

        self.linear_error = p[1].c - p[0].c - m::rotate(p[0].a, self.linear_offset);
        self.angular_error = m::normalize_angle(p[1].a - p[0].a - self.angular_offset);

        JointError {
            linear: self.linear_error.mag(),
            angular: self.angular_error.abs(),
        }
    }

    fn warm_start(&mut self, bodies: &JointBodies, data: &mut SolverData) {
        let ratio = data.step.dt_ratio;
        self.linear_impulse *= ratio;
        self.angular_impulse *= ratio;
        let mut v = bodies.read_velocities(data.velocities);
        bodies.apply_point_impulse(&mut v, &CENTERS, self.linear_impulse);
        bodies.apply_angular_impulse(&mut v, self.angular_impulse);
        bodies.write_velocities(data.velocities, v);
    }

    fn reset_impulse(&mut self) {
        self.linear_impulse = m::Vec2::zero();
        self.angular_impulse = 0.0;
    }

    fn solve_velocity(&mut self, _: &JointParams, bodies: &JointBodies, data: &mut SolverData) {
        let mut v = bodies.read_velocities(data.velocities);
        let h = data.step.dt;
        let bias_rate = data.step.inv_dt * self.correction_factor;

        {
            let cdot = v[1].angular - v[0].angular + bias_rate * self.angular_error;
            let impulse = -self.angular_mass * cdot;
            let old_impulse = self.angular_impulse;
            let max_impulse = self.max_torque * h;
            self.angular_impulse = (old_impulse + impulse).clamp(-max_impulse, max_impulse);
            bodies.apply_angular_impulse(&mut v, self.angular_impulse - old_impulse);
        }

        {
            let cdot = v[1].linear - v[0].linear + self.linear_error * bias_rate;
            let impulse = -(self.linear_mass * cdot);
            let old_impulse = self.linear_impulse;
            self.linear_impulse += impulse;
            let max_impulse = self.max_force * h;
            if self.linear_impulse.mag_sq() > max_impulse * max_impulse {
                self.linear_impulse = self.linear_impulse.normalized() * max_impulse;
            }
            bodies.apply_point_impulse(&mut v, &CENTERS, self.linear_impulse - old_impulse);
        }

        bodies.write_velocities(data.velocities, v);
    }

    fn solve_position(&mut self, _: &JointParams, _: &JointBodies, _: &mut SolverData) -> JointError {
        JointError::default()
    }

    fn pseudo_rows(&mut self, _: &JointBodies, _: &[Position; 2], _: &mut PseudoRows) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::physics::{joint::JointBuilder, Body, BodySet, SolverConfig, TimeStep, Velocity};

    #[test]
    fn force_is_bounded() {
        let mut set = BodySet::new();
        let a = set.insert(Body::new_static());
        let b = set.insert(Body::new_dynamic(1.0, 1.0));
        set.get_mut(b).unwrap().island_index = 1;
        let mut joint = JointBuilder::new(a).with_target(b).build_motor(6.0, 0.0);
        assert!(joint.bind(&set));

        let cfg = SolverConfig::default();
        let mut pos = vec![
            Position::default(),
            Position {
                c: m::Vec2::new(10.0, 0.0),
                a: 0.0,
            },
        ];
        let mut vel = vec![Velocity::default(); 2];
        let mut data = SolverData {
            step: TimeStep::new(1.0 / 60.0, 0.0, &cfg),
            config: &cfg,
            positions: &mut pos,
            velocities: &mut vel,
        };
        assert!(joint.init_velocity_constraints(&mut data));
        for _ in 0..8 {
            joint.solve_velocity_constraints(&mut data);
        }
        // 6 newtons for 1/60 s on a unit mass
        assert!((data.velocities[1].linear.x + 0.1).abs() < 1e-12);
        assert_eq!(data.velocities[1].angular, 0.0);
        // velocity-only, never blocks convergence
        assert!(joint.solve_position_constraints(&mut data));
    }
}

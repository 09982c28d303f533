use super::{Jacobian, JointBodies, JointError, JointParams, JointSolver, PseudoRows};
use crate::{
    math as m,
    physics::{Position, SolverData},
};

/// A joint coupling the rotation of two bodies so that
/// `angle_a + ratio * angle_b` stays constant.
///
/// Body angles are wrapped by the solver, so the joint keeps track of
/// how far each body has turned in total since the joint was first solved.
#[derive(Clone, Copy, Debug)]
pub struct GearJoint {
    pub ratio: f64,
    constant: Option<f64>,
    unwrapped: [f64; 2],
    last_angles: [f64; 2],
    impulse: f64,
    jac: Jacobian,
    inv_k: f64,
    bias: f64,
}

impl GearJoint {
    pub fn new(ratio: f64) -> Self {
        Self {
            ratio,
            constant: None,
            unwrapped: [0.0; 2],
            last_angles: [0.0; 2],
            impulse: 0.0,
            jac: Jacobian::default(),
            inv_k: 0.0,
            bias: 0.0,
        }
    }

    #[inline]
    pub fn impulse(&self) -> f64 {
        self.impulse
    }

    /// Total angles of the bodies, continuing from the last tracked angles.
    fn total_angles(&self, p: &[Position; 2]) -> [f64; 2] {
        [0, 1].map(|i| self.unwrapped[i] + m::normalize_angle(p[i].a - self.last_angles[i]))
    }

    fn error(&self, p: &[Position; 2]) -> f64 {
        let [a, b] = self.total_angles(p);
        a + self.ratio * b - self.constant.unwrap_or(0.0)
    }
}

impl JointSolver for GearJoint {
    fn prepare(
        &mut self,
        params: &JointParams,
        bodies: &JointBodies,
        data: &SolverData,
    ) -> JointError {
        let p = bodies.read_positions(data.positions);
        match self.constant {
            None => {
                self.unwrapped = [p[0].a, p[1].a];
                self.constant = Some(p[0].a + self.ratio * p[1].a);
            }
            Some(_) => self.unwrapped = self.total_angles(&p),
        }
        self.last_angles = [p[0].a, p[1].a];

        self.jac = Jacobian {
            lin_a: m::Vec2::zero(),
            ang_a: 1.0,
            lin_b: m::Vec2::zero(),
            ang_b: self.ratio,
        };
        self.inv_k = self.jac.inv_effective_mass(bodies);

        let c = self.error(&p);
        self.bias = if params.correction.uses_velocity_bias() {
            -params.bias_factor * data.step.inv_dt * c
        } else {
            0.0
        };
        JointError::angular(c.abs())
    }

    fn warm_start(&mut self, bodies: &JointBodies, data: &mut SolverData) {
        self.impulse *= data.step.dt_ratio;
        let mut v = bodies.read_velocities(data.velocities);
        self.jac.apply(&mut v, bodies, self.impulse);
        bodies.write_velocities(data.velocities, v);
    }

    fn reset_impulse(&mut self) {
        self.impulse = 0.0;
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
        let mass = 1.0 / (self.inv_k + params.softness);
        let cdot = self.jac.dot(&v);
        let impulse = mass * (self.bias - cdot - params.softness * self.impulse);
        self.impulse += impulse;
        self.jac.apply(&mut v, bodies, impulse);
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
        let mut p = bodies.read_positions(data.positions);
        let c = self.error(&p);
        // the effective mass of an angular coupling doesn't depend on the configuration
        self.jac.apply_position(&mut p, bodies, -c / self.inv_k);
        bodies.write_positions(data.positions, p);
        JointError::angular(c.abs())
    }

    fn pseudo_rows(&mut self, bodies: &JointBodies, p: &[Position; 2], rows: &mut PseudoRows) {
        if self.jac.inv_effective_mass(bodies) > 0.0 {
            rows.push(self.jac, self.error(p), false);
        }
    }
}

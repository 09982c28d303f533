use super::{effective_mass, Jacobian, JointBodies, JointError, JointParams, JointSolver, PseudoRows};
use crate::{
    math as m,
    physics::{Position, PositionCorrection, SolverData},
};

/// Spring settings that make a distance joint elastic.
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "serde-types", derive(serde::Serialize, serde::Deserialize))]
pub struct Spring {
    /// Oscillation frequency in Hertz.
    pub frequency: f64,
    /// Zero is undamped, one is critically damped.
    pub damping_ratio: f64,
}

/// A joint keeping two anchor points at a fixed distance from each other,
/// or pulling them towards that distance like a spring.
#[derive(Clone, Copy, Debug)]
pub struct DistanceJoint {
    pub local_anchors: [m::Vec2; 2],
    pub length: f64,
    /// If set, the joint acts as a damped spring and does no position correction.
    pub spring: Option<Spring>,
    impulse: f64,
    jac: Jacobian,
    inv_k: f64,
    mass: f64,
    gamma: f64,
    bias: f64,
}

impl DistanceJoint {
    pub fn new(local_anchors: [m::Vec2; 2], length: f64) -> Self {
        Self {
            local_anchors,
            length: length.max(0.0),
            spring: None,
            impulse: 0.0,
            jac: Jacobian::default(),
            inv_k: 0.0,
            mass: 0.0,
            gamma: 0.0,
            bias: 0.0,
        }
    }

    pub fn with_spring(mut self, spring: Spring) -> Self {
        self.spring = Some(spring);
        self
    }

    #[inline]
    pub fn impulse(&self) -> f64 {
        self.impulse
    }

    /// Jacobian along the line between the anchors, and the current length of that line.
    fn geometry(&self, p: &[Position; 2], slop: f64) -> (Jacobian, f64) {
        let r = [
            m::rotate(p[0].a, self.local_anchors[0]),
            m::rotate(p[1].a, self.local_anchors[1]),
        ];
        let d = p[1].c + r[1] - p[0].c - r[0];
        let length = d.mag();
        let u = if length > slop {
            d / length
        } else {
            m::Vec2::zero()
        };
        (Jacobian::along(u, &r), length)
    }
}

impl JointSolver for DistanceJoint {
    fn prepare(
        &mut self,
        params: &JointParams,
        bodies: &JointBodies,
        data: &SolverData,
    ) -> JointError {
        let p = bodies.read_positions(data.positions);
        let (jac, length) = self.geometry(&p, data.config.linear_slop);
        self.jac = jac;
        self.inv_k = jac.inv_effective_mass(bodies);
        let c = length - self.length;

        match self.spring {
            Some(spring) if spring.frequency > 0.0 => {
                let h = data.step.dt;
                let mass = if self.inv_k > 0.0 { 1.0 / self.inv_k } else { 0.0 };
                let omega = 2.0 * std::f64::consts::PI * spring.frequency;
                let damping = 2.0 * mass * spring.damping_ratio * omega;
                let stiffness = mass * omega * omega;
                let gamma = h * (damping + h * stiffness);
                self.gamma = if gamma != 0.0 { 1.0 / gamma } else { 0.0 };
                self.bias = -c * h * stiffness * self.gamma;
                self.mass = effective_mass(self.inv_k + self.gamma);
            }
            _ => {
                self.gamma = params.softness;
                self.bias = if params.correction.uses_velocity_bias() {
                    -params.bias_factor * data.step.inv_dt * c
                } else {
                    0.0
                };
                self.mass = effective_mass(self.inv_k + self.gamma);
            }
        }

        JointError::linear(c.abs())
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

    fn solve_velocity(&mut self, _: &JointParams, bodies: &JointBodies, data: &mut SolverData) {
        let mut v = bodies.read_velocities(data.velocities);
        let cdot = self.jac.dot(&v);
        let impulse = self.mass * (self.bias - cdot - self.gamma * self.impulse);
        self.impulse += impulse;
        self.jac.apply(&mut v, bodies, impulse);
        bodies.write_velocities(data.velocities, v);
    }

    fn solve_position(
        &mut self,
        params: &JointParams,
        bodies: &JointBodies,
        data: &mut SolverData,
    ) -> JointError {
        if self.spring.is_some() {
            return JointError::default();
        }

        let cfg = data.config;
        let mut p = bodies.read_positions(data.positions);
        let (jac, length) = self.geometry(&p, cfg.linear_slop);
        let error = length - self.length;
        let c = error.clamp(-cfg.max_linear_correction, cfg.max_linear_correction);
        let inv_k = match params.correction {
            PositionCorrection::ModifiedNgs => self.inv_k,
            _ => jac.inv_effective_mass(bodies),
        };
        if inv_k > 0.0 {
            jac.apply_position(&mut p, bodies, -c / inv_k);
        }
        bodies.write_positions(data.positions, p);

        JointError::linear(error.abs())
    }

    fn pseudo_rows(&mut self, _: &JointBodies, p: &[Position; 2], rows: &mut PseudoRows) {
        if self.spring.is_some() {
            return;
        }
        let (jac, length) = self.geometry(p, 0.0);
        rows.push(jac, length - self.length, false);
    }
}

use super::{effective_mass, Jacobian, JointBodies, JointError, JointParams, JointSolver, PseudoRows};
use crate::{
    math as m,
    physics::{Position, PositionCorrection, SolverData},
};

/// A joint connecting two bodies with an idealized rope running over two fixed pulleys.
///
/// Keeps `length_a + ratio * length_b` constant,
/// where the lengths are measured from each ground anchor to the body's anchor.
#[derive(Clone, Copy, Debug)]
pub struct PulleyJoint {
    /// Fixed world points the rope runs over.
    pub ground_anchors: [m::Vec2; 2],
    pub local_anchors: [m::Vec2; 2],
    pub ratio: f64,
    constant: f64,
    impulse: f64,
    jac: Jacobian,
    inv_k: f64,
    bias: f64,
}

impl PulleyJoint {
    /// Create a pulley joint with the given rope lengths on each side at rest.
    pub fn new(
        ground_anchors: [m::Vec2; 2],
        local_anchors: [m::Vec2; 2],
        lengths: [f64; 2],
        ratio: f64,
    ) -> Self {
        assert!(ratio > f64::EPSILON, "Pulley ratio must be positive");
        Self {
            ground_anchors,
            local_anchors,
            ratio,
            constant: lengths[0] + ratio * lengths[1],
            impulse: 0.0,
            jac: Jacobian::default(),
            inv_k: 0.0,
            bias: 0.0,
        }
    }

    /// Total rope length weighted by the ratio.
    #[inline]
    pub fn constant(&self) -> f64 {
        self.constant
    }

    #[inline]
    pub fn impulse(&self) -> f64 {
        self.impulse
    }

    fn geometry(&self, p: &[Position; 2], slop: f64) -> (Jacobian, f64) {
        let r = [
            m::rotate(p[0].a, self.local_anchors[0]),
            m::rotate(p[1].a, self.local_anchors[1]),
        ];
        let mut dirs = [m::Vec2::zero(); 2];
        let mut lengths = [0.0; 2];
        for i in 0..2 {
            let d = p[i].c + r[i] - self.ground_anchors[i];
            lengths[i] = d.mag();
            if lengths[i] > 10.0 * slop {
                dirs[i] = d / lengths[i];
            }
        }
        let jac = Jacobian {
            lin_a: -dirs[0],
            ang_a: -m::cross(r[0], dirs[0]),
            lin_b: -dirs[1] * self.ratio,
            ang_b: -self.ratio * m::cross(r[1], dirs[1]),
        };
        (jac, self.constant - lengths[0] - self.ratio * lengths[1])
    }
}

impl JointSolver for PulleyJoint {
    fn prepare(
        &mut self,
        params: &JointParams,
        bodies: &JointBodies,
        data: &SolverData,
    ) -> JointError {
        let p = bodies.read_positions(data.positions);
        let (jac, c) = self.geometry(&p, data.config.linear_slop);
        self.jac = jac;
        self.inv_k = jac.inv_effective_mass(bodies);
        self.bias = if params.correction.uses_velocity_bias() {
            -params.bias_factor * data.step.inv_dt * c
        } else {
            0.0
        };
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

    fn solve_velocity(
        &mut self,
        params: &JointParams,
        bodies: &JointBodies,
        data: &mut SolverData,
    ) {
        let mut v = bodies.read_velocities(data.velocities);
        let mass = effective_mass(self.inv_k + params.softness);
        let cdot = self.jac.dot(&v);
        let impulse = mass * (self.bias - cdot - params.softness * self.impulse);
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
        let mut p = bodies.read_positions(data.positions);
        let (jac, c) = self.geometry(&p, data.config.linear_slop);
        let inv_k = match params.correction {
            PositionCorrection::ModifiedNgs => self.inv_k,
            _ => jac.inv_effective_mass(bodies),
        };
        jac.apply_position(&mut p, bodies, -c * effective_mass(inv_k));
        bodies.write_positions(data.positions, p);
        JointError::linear(c.abs())
    }

    fn pseudo_rows(&mut self, _: &JointBodies, p: &[Position; 2], rows: &mut PseudoRows) {
        let (jac, c) = self.geometry(p, 0.0);
        rows.push(jac, c, false);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::physics::{joint::JointBuilder, Body, BodySet, SolverConfig, TimeStep, Velocity};

    #[test]
    fn rope_length_is_kept() {
        let mut set = BodySet::new();
        let a = set.insert(Body::new_particle(1.0).with_position(m::Vec2::new(-1.0, 0.0)));
        let b = set.insert(Body::new_particle(1.0).with_position(m::Vec2::new(1.0, 0.0)));
        set.get_mut(b).unwrap().island_index = 1;
        let ground = [m::Vec2::new(-1.0, 2.0), m::Vec2::new(1.0, 2.0)];
        let mut joint = JointBuilder::new(a)
            .with_target(b)
            .build_pulley(ground, [2.0, 2.0], 1.0);
        assert!(joint.bind(&set));

        let cfg = SolverConfig::default();
        let mut pos = vec![
            Position {
                c: m::Vec2::new(-1.0, 0.0),
                a: 0.0,
            },
            Position {
                c: m::Vec2::new(1.0, 0.0),
                a: 0.0,
            },
        ];
        // both falling, which would lengthen both sides of the rope
        let mut vel = vec![
            Velocity {
                linear: m::Vec2::new(0.0, -2.0),
                angular: 0.0,
            },
            Velocity {
                linear: m::Vec2::new(0.0, -1.0),
                angular: 0.0,
            },
        ];
        let mut data = SolverData {
            step: TimeStep::new(1.0 / 60.0, 0.0, &cfg),
            config: &cfg,
            positions: &mut pos,
            velocities: &mut vel,
        };
        joint.init_velocity_constraints(&mut data);
        assert!(joint.last_error().linear < 1e-12);
        joint.solve_velocity_constraints(&mut data);
        // one side goes down as fast as the other goes up
        let sum = data.velocities[0].linear.y + data.velocities[1].linear.y;
        assert!(sum.abs() < 1e-12);
        assert!((data.velocities[0].linear.y + 0.5).abs() < 1e-12);

        data.positions[0].c.y = -0.5;
        let first = joint.solve_position_constraints(&mut data);
        assert!(!first);
        assert!(joint.solve_position_constraints(&mut data));
    }

    #[test]
    #[should_panic(expected = "ratio")]
    fn zero_ratio_is_rejected() {
        PulleyJoint::new([m::Vec2::zero(); 2], [m::Vec2::zero(); 2], [1.0, 1.0], 0.0);
    }

    #[test]
    fn body_at_its_ground_anchor_gets_no_impulse() {
        let mut set = BodySet::new();
        let a = set.insert(Body::new_particle(1.0).with_position(m::Vec2::new(-1.0, 2.0)));
        let b = set.insert(Body::new_particle(1.0).with_position(m::Vec2::new(1.0, 2.0)));
        set.get_mut(b).unwrap().island_index = 1;
        let ground = [m::Vec2::new(-1.0, 2.0), m::Vec2::new(1.0, 2.0)];
        let mut joint = JointBuilder::new(a)
            .with_target(b)
            .build_pulley(ground, [1.0, 1.0], 1.0);
        assert!(joint.bind(&set));

        let cfg = SolverConfig::default();
        let mut pos = vec![
            Position {
                c: ground[0],
                a: 0.0,
            },
            Position {
                c: ground[1],
                a: 0.0,
            },
        ];
        let mut vel = vec![
            Velocity {
                linear: m::Vec2::new(0.0, -1.0),
                angular: 0.0,
            };
            2
        ];
        let mut data = SolverData {
            step: TimeStep::new(1.0 / 60.0, 0.0, &cfg),
            config: &cfg,
            positions: &mut pos,
            velocities: &mut vel,
        };
        joint.init_velocity_constraints(&mut data);
        assert!((joint.last_error().linear - 2.0).abs() < 1e-12);
        joint.solve_velocity_constraints(&mut data);
        assert!(!joint.solve_position_constraints(&mut data));
        for i in 0..2 {
            assert_eq!(data.velocities[i].linear, m::Vec2::new(0.0, -1.0));
            assert_eq!(data.positions[i].c, ground[i]);
        }
    }
}

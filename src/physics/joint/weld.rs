use super::{Jacobian, JointBodies, JointError, JointParams, JointSolver, PseudoRows};
use crate::{
    math as m,
    physics::{Position, PositionCorrection, SolverData},
};

/// A joint gluing two bodies together,
/// removing all relative motion.
#[derive(Clone, Copy, Debug)]
pub struct WeldJoint {
    pub local_anchors: [m::Vec2; 2],
    pub reference_angle: f64,
    impulse: m::Vec3,
    r: [m::Vec2; 2],
    k: m::Mat3,
    bias: m::Vec3,
}

impl WeldJoint {
    pub fn new(local_anchors: [m::Vec2; 2], reference_angle: f64) -> Self {
        Self {
            local_anchors,
            reference_angle,
            impulse: m::Vec3::zero(),
            r: [m::Vec2::zero(); 2],
            k: m::Mat3::new(m::Vec3::zero(), m::Vec3::zero(), m::Vec3::zero()),
            bias: m::Vec3::zero(),
        }
    }

    /// Accumulated linear (`x`, `y`) and angular (`z`) impulse.
    #[inline]
    pub fn impulse(&self) -> m::Vec3 {
        self.impulse
    }

    fn anchors(&self, p: &[Position; 2]) -> [m::Vec2; 2] {
        [
            m::rotate(p[0].a, self.local_anchors[0]),
            m::rotate(p[1].a, self.local_anchors[1]),
        ]
    }

    fn errors(&self, p: &[Position; 2], r: &[m::Vec2; 2]) -> (m::Vec2, f64) {
        (
            p[1].c + r[1] - p[0].c - r[0],
            m::normalize_angle(p[1].a - p[0].a - self.reference_angle),
        )
    }
}

/// Effective inverse mass of the combined point and angle constraint.
fn weld_matrix(bodies: &JointBodies, r: &[m::Vec2; 2]) -> m::Mat3 {
    let [i_a, i_b] = bodies.inv_inertia;
    let [r_a, r_b] = *r;
    let k2 = bodies.point_matrix(r);
    let k13 = -r_a.y * i_a - r_b.y * i_b;
    let k23 = r_a.x * i_a + r_b.x * i_b;
    m::Mat3::new(
        m::Vec3::new(k2.cols[0].x, k2.cols[0].y, k13),
        m::Vec3::new(k2.cols[1].x, k2.cols[1].y, k23),
        m::Vec3::new(k13, k23, i_a + i_b),
    )
}

impl JointSolver for WeldJoint {
    fn prepare(
        &mut self,
        params: &JointParams,
        bodies: &JointBodies,
        data: &SolverData,
    ) -> JointError {
        let p = bodies.read_positions(data.positions);
        self.r = self.anchors(&p);
        self.k = weld_matrix(bodies, &self.r);

        let (c1, c2) = self.errors(&p, &self.r);
        self.bias = if params.correction.uses_velocity_bias() {
            m::Vec3::new(c1.x, c1.y, c2) * (-params.bias_factor * data.step.inv_dt)
        } else {
            m::Vec3::zero()
        };

        JointError {
            linear: c1.mag(),
            angular: c2.abs(),
        }
    }

    fn warm_start(&mut self, bodies: &JointBodies, data: &mut SolverData) {
        self.impulse *= data.step.dt_ratio;
        let mut v = bodies.read_velocities(data.velocities);
        bodies.apply_point_impulse(&mut v, &self.r, self.impulse.xy());
        bodies.apply_angular_impulse(&mut v, self.impulse.z);
        bodies.write_velocities(data.velocities, v);
    }

    fn reset_impulse(&mut self) {
        self.impulse = m::Vec3::zero();
    }

    fn solve_velocity(
        &mut self,
        params: &JointParams,
        bodies: &JointBodies,
        data: &mut SolverData,
    ) {
        let mut v = bodies.read_velocities(data.velocities);
        let cdot1 = v[1].point_velocity(self.r[1]) - v[0].point_velocity(self.r[0]);
        let cdot2 = v[1].angular - v[0].angular;

        let softness = params.softness;
        let mut soft_k = self.k;
        soft_k.cols[0].x += softness;
        soft_k.cols[1].y += softness;

        if self.k.cols[2].z == 0.0 {
            // neither body can rotate, only the point constraint remains
            let rhs = self.bias.xy() - cdot1 - self.impulse.xy() * softness;
            let impulse = m::inverse2(m::upper_left(&soft_k)) * rhs;
            self.impulse.x += impulse.x;
            self.impulse.y += impulse.y;
            bodies.apply_point_impulse(&mut v, &self.r, impulse);
        } else {
            soft_k.cols[2].z += softness;
            let cdot = m::Vec3::new(cdot1.x, cdot1.y, cdot2);
            let impulse = m::inverse3(soft_k) * (self.bias - cdot - self.impulse * softness);
            self.impulse += impulse;
            bodies.apply_point_impulse(&mut v, &self.r, impulse.xy());
            bodies.apply_angular_impulse(&mut v, impulse.z);
        }

        bodies.write_velocities(data.velocities, v);
    }

    fn solve_position(
        &mut self,
        params: &JointParams,
        bodies: &JointBodies,
        data: &mut SolverData,
    ) -> JointError {
        let mut p = bodies.read_positions(data.positions);
        let r = self.anchors(&p);
        let (c1, c2) = self.errors(&p, &r);
        let k = match params.correction {
            PositionCorrection::ModifiedNgs => self.k,
            _ => weld_matrix(bodies, &r),
        };

        if k.cols[2].z > 0.0 {
            let impulse = -(m::inverse3(k) * m::Vec3::new(c1.x, c1.y, c2));
            bodies.apply_point_correction(&mut p, &r, impulse.xy());
            bodies.apply_angular_correction(&mut p, impulse.z);
        } else {
            let impulse = -(m::inverse2(m::upper_left(&k)) * c1);
            bodies.apply_point_correction(&mut p, &r, impulse);
        }
        bodies.write_positions(data.positions, p);

        JointError {
            linear: c1.mag(),
            angular: if k.cols[2].z > 0.0 { c2.abs() } else { 0.0 },
        }
    }

    fn pseudo_rows(&mut self, bodies: &JointBodies, p: &[Position; 2], rows: &mut PseudoRows) {
        let r = self.anchors(p);
        let (c1, c2) = self.errors(p, &r);
        rows.push_point(&r, c1);
        if bodies.angular_mass() > 0.0 {
            rows.push(Jacobian::angular(), c2, false);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::physics::{
        joint::JointBuilder, Body, BodySet, Joint, SolverConfig, TimeStep, Velocity,
    };

    fn setup(body_b: Body) -> (BodySet, Joint) {
        let mut set = BodySet::new();
        let a = set.insert(Body::new_rect(1.0, 1.0, 1.0));
        let b = set.insert(body_b.with_position(m::Vec2::new(1.0, 0.0)));
        set.get_mut(b).unwrap().island_index = 1;
        let mut joint = JointBuilder::new(a)
            .with_target(b)
            .with_world_anchor(m::Vec2::new(0.5, 0.0), &set)
            .unwrap()
            .build_weld();
        assert!(joint.bind(&set));
        (set, joint)
    }

    fn positions(set: &BodySet) -> Vec<Position> {
        let mut bodies: Vec<_> = set.iter().map(|(_, b)| b).collect();
        bodies.sort_by_key(|b| b.island_index);
        bodies
            .iter()
            .map(|b| Position {
                c: b.position,
                a: b.angle,
            })
            .collect()
    }

    #[test]
    fn welded_bodies_move_as_one() {
        let (set, mut joint) = setup(Body::new_rect(1.0, 1.0, 1.0));
        let cfg = SolverConfig::default();
        let mut pos = positions(&set);
        let mut vel = vec![
            Velocity {
                linear: m::Vec2::new(0.0, 1.0),
                angular: 0.0,
            },
            Velocity::default(),
        ];
        let mut data = SolverData {
            step: TimeStep::new(1.0 / 60.0, 0.0, &cfg),
            config: &cfg,
            positions: &mut pos,
            velocities: &mut vel,
        };
        joint.init_velocity_constraints(&mut data);
        joint.solve_velocity_constraints(&mut data);

        let [va, vb] = [data.velocities[0], data.velocities[1]];
        assert!((va.angular - vb.angular).abs() < 1e-9);
        let anchor_a = va.point_velocity(m::Vec2::new(0.5, 0.0));
        let anchor_b = vb.point_velocity(m::Vec2::new(-0.5, 0.0));
        assert!((anchor_a - anchor_b).mag() < 1e-9);
        // total momentum is unchanged
        assert!(((va.linear + vb.linear) - m::Vec2::new(0.0, 1.0)).mag() < 1e-9);
    }

    #[test]
    fn particles_weld_without_rotation() {
        let mut set = BodySet::new();
        let a = set.insert(Body::new_particle(1.0));
        let b = set.insert(Body::new_particle(1.0).with_position(m::Vec2::new(1.0, 0.0)));
        set.get_mut(b).unwrap().island_index = 1;
        let mut joint = JointBuilder::new(a)
            .with_target(b)
            .with_target_origin(m::Vec2::new(-1.0, 0.0))
            .build_weld();
        assert!(joint.bind(&set));

        let cfg = SolverConfig::default();
        let mut pos = positions(&set);
        pos[1].c.y = 0.1;
        let mut vel = vec![Velocity::default(); 2];
        let mut data = SolverData {
            step: TimeStep::new(1.0 / 60.0, 0.0, &cfg),
            config: &cfg,
            positions: &mut pos,
            velocities: &mut vel,
        };
        joint.init_velocity_constraints(&mut data);
        joint.solve_velocity_constraints(&mut data);
        joint.solve_position_constraints(&mut data);
        assert!(data.positions[1].c.y - data.positions[0].c.y < 1e-9);
    }
}

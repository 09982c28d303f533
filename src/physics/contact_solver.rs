//! Sequential impulse solver for contact constraints.
//!
//! Each manifold point gets a non-penetration row along the contact normal
//! and a friction row along the tangent, solved one at a time in Gauss-Seidel fashion.

use super::{
    contact::{
        ContactImpulse, ContactKey, ContactSet, Manifold, ManifoldType, WorldManifold,
        MAX_MANIFOLD_POINTS,
    },
    BodySet, Position, PositionCorrection, SolverConfig, TimeStep, Velocity,
};
use crate::math as m;

use itertools::izip;

#[derive(Clone, Copy, Debug, Default)]
struct VelocityPoint {
    /// Anchors relative to the centers of the bodies.
    r: [m::Vec2; 2],
    normal_impulse: f64,
    tangent_impulse: f64,
    normal_mass: f64,
    tangent_mass: f64,
    velocity_bias: f64,
}

#[derive(Clone, Copy, Debug)]
struct VelocityConstraint {
    key: ContactKey,
    points: [VelocityPoint; MAX_MANIFOLD_POINTS],
    point_count: usize,
    normal: m::Vec2,
    indices: [usize; 2],
    inv_mass: [f64; 2],
    inv_inertia: [f64; 2],
    friction: f64,
    restitution: f64,
}

#[derive(Clone, Copy, Debug)]
struct PositionConstraint {
    manifold: Manifold,
    radii: [f64; 2],
    correction: PositionCorrection,
}

#[derive(Clone, Copy, Debug, Default)]
struct PseudoPoint {
    r: [m::Vec2; 2],
    normal: m::Vec2,
    mass: f64,
    bias: f64,
    impulse: f64,
}

#[derive(Clone, Copy, Debug)]
struct PseudoConstraint {
    /// Index into the velocity and position constraints.
    constraint: usize,
    points: [PseudoPoint; MAX_MANIFOLD_POINTS],
    point_count: usize,
}

/// Geometry of one manifold point evaluated at the current positions.
struct PositionPoint {
    normal: m::Vec2,
    point: m::Vec2,
    separation: f64,
}

impl PositionPoint {
    fn new(pc: &PositionConstraint, xf_a: &m::Pose, xf_b: &m::Pose, index: usize) -> Self {
        let manifold = &pc.manifold;
        let total_radius = pc.radii[0] + pc.radii[1];
        match manifold.kind {
            ManifoldType::Circles => {
                let point_a = xf_a.transform_vec(manifold.local_point);
                let point_b = xf_b.transform_vec(manifold.points()[0].local_point);
                let dist = point_b - point_a;
                let normal = if dist.mag_sq() > f64::EPSILON * f64::EPSILON {
                    dist.normalized()
                } else {
                    m::Vec2::unit_x()
                };
                PositionPoint {
                    normal,
                    point: (point_a + point_b) * 0.5,
                    separation: dist.dot(normal) - total_radius,
                }
            }
            ManifoldType::FaceA => {
                let normal = xf_a.rotation * manifold.local_normal;
                let plane_point = xf_a.transform_vec(manifold.local_point);
                let clip_point = xf_b.transform_vec(manifold.points()[index].local_point);
                PositionPoint {
                    normal,
                    point: clip_point,
                    separation: (clip_point - plane_point).dot(normal) - total_radius,
                }
            }
            ManifoldType::FaceB => {
                let normal = xf_b.rotation * manifold.local_normal;
                let plane_point = xf_b.transform_vec(manifold.local_point);
                let clip_point = xf_a.transform_vec(manifold.points()[index].local_point);
                PositionPoint {
                    // flipped to point from A to B
                    normal: -normal,
                    point: clip_point,
                    separation: (clip_point - plane_point).dot(normal) - total_radius,
                }
            }
        }
    }
}

#[inline]
fn pose(p: &Position) -> m::Pose {
    m::pose(p.c, p.a)
}

#[inline]
fn inv_normal_mass(vc: &VelocityConstraint, r: &[m::Vec2; 2], dir: m::Vec2) -> f64 {
    let rn_a = m::cross(r[0], dir);
    let rn_b = m::cross(r[1], dir);
    vc.inv_mass[0] + vc.inv_mass[1] + vc.inv_inertia[0] * rn_a * rn_a + vc.inv_inertia[1] * rn_b * rn_b
}

#[inline]
fn relative_velocity(v: &[Velocity; 2], r: &[m::Vec2; 2]) -> m::Vec2 {
    v[1].point_velocity(r[1]) - v[0].point_velocity(r[0])
}

#[inline]
fn apply_impulse(vc: &VelocityConstraint, v: &mut [Velocity; 2], r: &[m::Vec2; 2], p: m::Vec2) {
    v[0].linear -= p * vc.inv_mass[0];
    v[0].angular -= vc.inv_inertia[0] * m::cross(r[0], p);
    v[1].linear += p * vc.inv_mass[1];
    v[1].angular += vc.inv_inertia[1] * m::cross(r[1], p);
}

/// Solver for the contacts of one island.
///
/// Buffers are kept between islands and steps to avoid reallocating.
#[derive(Debug, Default)]
pub(crate) struct ContactSolver {
    velocity_constraints: Vec<VelocityConstraint>,
    position_constraints: Vec<PositionConstraint>,
    pseudo_constraints: Vec<PseudoConstraint>,
    step: Option<TimeStep>,
}

impl ContactSolver {
    /// Gather the contacts in `keys` into constraints.
    /// The bodies of every contact must have their island indices set.
    pub fn init(
        &mut self,
        step: TimeStep,
        config: &SolverConfig,
        keys: &[ContactKey],
        contacts: &ContactSet,
        bodies: &BodySet,
    ) {
        self.velocity_constraints.clear();
        self.position_constraints.clear();
        self.pseudo_constraints.clear();
        self.step = Some(step);

        for &key in keys {
            let contact = &contacts.contacts[key.0];
            let body_a = &bodies.bodies[contact.bodies[0].0];
            let body_b = &bodies.bodies[contact.bodies[1].0];
            let manifold = contact.manifold;

            let mut vc = VelocityConstraint {
                key,
                points: [VelocityPoint::default(); MAX_MANIFOLD_POINTS],
                point_count: manifold.point_count(),
                normal: m::Vec2::zero(),
                indices: [body_a.island_index, body_b.island_index],
                inv_mass: [body_a.inv_mass(), body_b.inv_mass()],
                inv_inertia: [body_a.inv_inertia(), body_b.inv_inertia()],
                friction: contact.friction,
                restitution: contact.restitution,
            };
            for (vp, mp) in vc.points.iter_mut().zip(manifold.points()) {
                if step.warm_starting {
                    vp.normal_impulse = step.dt_ratio * mp.normal_impulse;
                    vp.tangent_impulse = step.dt_ratio * mp.tangent_impulse;
                }
            }
            self.velocity_constraints.push(vc);
            self.position_constraints.push(PositionConstraint {
                manifold,
                radii: [contact.fixtures[0].radius, contact.fixtures[1].radius],
                correction: contact.correction.unwrap_or(config.contact_correction),
            });
        }
    }

    /// Compute lever arms, effective masses and velocity biases from the current state.
    pub fn init_velocity_constraints(
        &mut self,
        config: &SolverConfig,
        positions: &[Position],
        velocities: &[Velocity],
    ) {
        let inv_dt = self.step.map(|s| s.inv_dt).unwrap_or(0.0);
        for (vc, pc) in izip!(&mut self.velocity_constraints, &self.position_constraints) {
            let [ia, ib] = vc.indices;
            let (pa, pb) = (positions[ia], positions[ib]);
            let v = [velocities[ia], velocities[ib]];
            let wm = WorldManifold::new(
                &pc.manifold,
                &pose(&pa),
                pc.radii[0],
                &pose(&pb),
                pc.radii[1],
            );
            vc.normal = wm.normal;
            let tangent = m::right_normal(vc.normal);

            for j in 0..vc.point_count {
                let r = [wm.points[j] - pa.c, wm.points[j] - pb.c];
                let k_normal = inv_normal_mass(vc, &r, vc.normal);
                let k_tangent = inv_normal_mass(vc, &r, tangent);

                let vp = &mut vc.points[j];
                vp.r = r;
                vp.normal_mass = if k_normal > 0.0 { 1.0 / k_normal } else { 0.0 };
                vp.tangent_mass = if k_tangent > 0.0 { 1.0 / k_tangent } else { 0.0 };

                vp.velocity_bias = 0.0;
                let v_rel = vc.normal.dot(relative_velocity(&v, &r));
                if v_rel < -config.velocity_threshold {
                    vp.velocity_bias = -vc.restitution * v_rel;
                }
                if pc.correction.uses_velocity_bias() {
                    let penetration = (wm.separations[j] + config.allowed_penetration).min(0.0);
                    vp.velocity_bias = vp.velocity_bias.max(-config.baumgarte * inv_dt * penetration);
                }
            }
        }
    }

    pub fn warm_start(&mut self, velocities: &mut [Velocity]) {
        for vc in &self.velocity_constraints {
            let [ia, ib] = vc.indices;
            let mut v = [velocities[ia], velocities[ib]];
            let tangent = m::right_normal(vc.normal);
            for vp in &vc.points[..vc.point_count] {
                let p = vc.normal * vp.normal_impulse + tangent * vp.tangent_impulse;
                apply_impulse(vc, &mut v, &vp.r, p);
            }
            velocities[ia] = v[0];
            velocities[ib] = v[1];
        }
    }

    pub fn solve_velocity_constraints(&mut self, velocities: &mut [Velocity]) {
        for vc in &mut self.velocity_constraints {
            let [ia, ib] = vc.indices;
            let mut v = [velocities[ia], velocities[ib]];
            let normal = vc.normal;
            let tangent = m::right_normal(normal);

            for j in 0..vc.point_count {
                let vp = vc.points[j];

                let vn = relative_velocity(&v, &vp.r).dot(normal);
                let lambda = -vp.normal_mass * (vn - vp.velocity_bias);
                let new_impulse = (vp.normal_impulse + lambda).max(0.0);
                let lambda = new_impulse - vp.normal_impulse;
                vc.points[j].normal_impulse = new_impulse;
                apply_impulse(vc, &mut v, &vp.r, normal * lambda);

                // friction is bounded by the normal impulse just computed
                let vt = relative_velocity(&v, &vp.r).dot(tangent);
                let lambda = -vp.tangent_mass * vt;
                let max_friction = vc.friction * new_impulse;
                let new_impulse = (vp.tangent_impulse + lambda).clamp(-max_friction, max_friction);
                let lambda = new_impulse - vp.tangent_impulse;
                vc.points[j].tangent_impulse = new_impulse;
                apply_impulse(vc, &mut v, &vp.r, tangent * lambda);
            }

            velocities[ia] = v[0];
            velocities[ib] = v[1];
        }
    }

    /// Write the accumulated impulses back into the manifolds for warm starting the next step.
    pub fn store_impulses(&self, contacts: &mut ContactSet) {
        for vc in &self.velocity_constraints {
            let Some(contact) = contacts.get_mut(vc.key) else {
                continue;
            };
            for (mp, vp) in contact.manifold.points_mut().iter_mut().zip(&vc.points) {
                mp.normal_impulse = vp.normal_impulse;
                mp.tangent_impulse = vp.tangent_impulse;
            }
        }
    }

    /// Final impulses of the `i`th contact in the order they were given to `init`.
    pub fn impulse(&self, i: usize) -> ContactImpulse {
        let vc = &self.velocity_constraints[i];
        let mut ret = ContactImpulse {
            count: vc.point_count,
            ..Default::default()
        };
        for (j, vp) in vc.points[..vc.point_count].iter().enumerate() {
            ret.normal_impulses[j] = vp.normal_impulse;
            ret.tangent_impulses[j] = vp.tangent_impulse;
        }
        ret
    }

    //
    // pseudo-velocities
    //

    /// Set up the contacts using pseudo-velocity correction from the integrated positions.
    /// Returns true if there were any.
    pub fn init_pseudo_velocities(&mut self, config: &SolverConfig, positions: &[Position]) -> bool {
        self.pseudo_constraints.clear();
        let inv_dt = self.step.map(|s| s.inv_dt).unwrap_or(0.0);
        for (i, (vc, pc)) in izip!(&self.velocity_constraints, &self.position_constraints).enumerate() {
            if pc.correction != PositionCorrection::PseudoVelocities {
                continue;
            }
            let [ia, ib] = vc.indices;
            let (pa, pb) = (positions[ia], positions[ib]);
            let (xf_a, xf_b) = (pose(&pa), pose(&pb));
            let mut ps = PseudoConstraint {
                constraint: i,
                points: [PseudoPoint::default(); MAX_MANIFOLD_POINTS],
                point_count: vc.point_count,
            };
            for (j, pp) in ps.points[..vc.point_count].iter_mut().enumerate() {
                let geom = PositionPoint::new(pc, &xf_a, &xf_b, j);
                let r = [geom.point - pa.c, geom.point - pb.c];
                let k = inv_normal_mass(vc, &r, geom.normal);
                let c = (config.baumgarte * (geom.separation + config.allowed_penetration))
                    .clamp(-config.max_linear_correction, 0.0);
                *pp = PseudoPoint {
                    r,
                    normal: geom.normal,
                    mass: if k > 0.0 { 1.0 / k } else { 0.0 },
                    bias: -c * inv_dt,
                    impulse: 0.0,
                };
            }
            self.pseudo_constraints.push(ps);
        }
        !self.pseudo_constraints.is_empty()
    }

    pub fn solve_pseudo_velocities(&mut self, pseudo_velocities: &mut [Velocity]) {
        for ps in &mut self.pseudo_constraints {
            let vc = &self.velocity_constraints[ps.constraint];
            let [ia, ib] = vc.indices;
            let mut v = [pseudo_velocities[ia], pseudo_velocities[ib]];
            for pp in &mut ps.points[..ps.point_count] {
                let vn = relative_velocity(&v, &pp.r).dot(pp.normal);
                let lambda = pp.mass * (pp.bias - vn);
                let new_impulse = (pp.impulse + lambda).max(0.0);
                let lambda = new_impulse - pp.impulse;
                pp.impulse = new_impulse;
                apply_impulse(vc, &mut v, &pp.r, pp.normal * lambda);
            }
            pseudo_velocities[ia] = v[0];
            pseudo_velocities[ib] = v[1];
        }
    }

    //
    // position correction
    //

    /// One nonlinear Gauss-Seidel pass over the contacts that use it.
    /// Returns true if the remaining penetration is within tolerance.
    pub fn solve_position_constraints(&mut self, config: &SolverConfig, positions: &mut [Position]) -> bool {
        let mut min_separation = 0.0_f64;
        for (vc, pc) in izip!(&self.velocity_constraints, &self.position_constraints) {
            if !pc.correction.is_ngs() {
                continue;
            }
            let sep = Self::ngs_pass(vc, pc, config, config.baumgarte, [true; 2], positions);
            min_separation = min_separation.min(sep);
        }
        // converged once no contact overlaps by more than the slop
        min_separation >= -config.linear_slop
    }

    /// Position pass of a continuous collision sub-step,
    /// where only the bodies at island indices `toi_a` and `toi_b` move.
    pub fn solve_toi_position_constraints(
        &mut self,
        config: &SolverConfig,
        positions: &mut [Position],
        toi_a: usize,
        toi_b: usize,
    ) -> bool {
        let mut min_separation = 0.0_f64;
        for (vc, pc) in izip!(&self.velocity_constraints, &self.position_constraints) {
            let movable = vc.indices.map(|i| i == toi_a || i == toi_b);
            // impact resolution always uses the full method
            let full = PositionConstraint {
                correction: PositionCorrection::FullNgs,
                ..*pc
            };
            let sep = Self::ngs_pass(vc, &full, config, config.toi_baumgarte, movable, positions);
            min_separation = min_separation.min(sep);
        }
        min_separation >= -1.5 * config.linear_slop
    }

    /// Returns the smallest separation seen before correction.
    fn ngs_pass(
        vc: &VelocityConstraint,
        pc: &PositionConstraint,
        config: &SolverConfig,
        baumgarte: f64,
        movable: [bool; 2],
        positions: &mut [Position],
    ) -> f64 {
        let [ia, ib] = vc.indices;
        let mut p = [positions[ia], positions[ib]];
        let inv_mass = [0, 1].map(|i| if movable[i] { vc.inv_mass[i] } else { 0.0 });
        let inv_inertia = [0, 1].map(|i| if movable[i] { vc.inv_inertia[i] } else { 0.0 });
        let mut min_separation = 0.0_f64;

        for j in 0..vc.point_count {
            let geom = PositionPoint::new(pc, &pose(&p[0]), &pose(&p[1]), j);
            let r = [geom.point - p[0].c, geom.point - p[1].c];
            min_separation = min_separation.min(geom.separation);

            let c = (baumgarte * (geom.separation + config.allowed_penetration))
                .clamp(-config.max_linear_correction, 0.0);
            let mass = match pc.correction {
                PositionCorrection::ModifiedNgs => vc.points[j].normal_mass,
                _ => {
                    let rn_a = m::cross(r[0], geom.normal);
                    let rn_b = m::cross(r[1], geom.normal);
                    let k = inv_mass[0]
                        + inv_mass[1]
                        + inv_inertia[0] * rn_a * rn_a
                        + inv_inertia[1] * rn_b * rn_b;
                    if k > 0.0 {
                        1.0 / k
                    } else {
                        0.0
                    }
                }
            };
            let impulse = geom.normal * (-c * mass);

            p[0].c -= impulse * inv_mass[0];
            p[0].a -= inv_inertia[0] * m::cross(r[0], impulse);
            p[1].c += impulse * inv_mass[1];
            p[1].a += inv_inertia[1] * m::cross(r[1], impulse);
        }

        positions[ia] = p[0];
        positions[ib] = p[1];
        min_separation
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::physics::{
        contact::{Contact, ContactId, Fixture, ManifoldPoint, Material},
        Body,
    };
    use rand::{Rng, SeedableRng};

    /// A static ground at the origin and a unit box resting on it at the given height.
    fn box_on_ground(
        height: f64,
        friction: f64,
        correction: PositionCorrection,
    ) -> (BodySet, ContactSet, ContactKey, Vec<Position>) {
        let mut bodies = BodySet::new();
        let ground = bodies.insert(Body::new_static());
        let boxx = bodies.insert(Body::new_rect(1.0, 1.0, 1.0).with_position(m::Vec2::new(0.0, height)));
        bodies.get_mut(boxx).unwrap().island_index = 1;

        let points = [
            ManifoldPoint::new(m::Vec2::new(-0.5, -0.5), ContactId(0)),
            ManifoldPoint::new(m::Vec2::new(0.5, -0.5), ContactId(1)),
        ];
        let manifold = Manifold::face(ManifoldType::FaceA, m::Unit::unit_y(), m::Vec2::zero(), &points);
        let fixture = Fixture {
            material: Material {
                friction,
                restitution: 0.0,
            },
            ..Default::default()
        };
        let mut contacts = ContactSet::new();
        let key = contacts.insert(
            Contact::new(ground, fixture, boxx, fixture, manifold).with_correction(correction),
        );
        let positions = vec![
            Position::default(),
            Position {
                c: m::Vec2::new(0.0, height),
                a: 0.0,
            },
        ];
        (bodies, contacts, key, positions)
    }

    #[test]
    fn impulses_stay_in_friction_cone() {
        let mut rng = rand::rngs::StdRng::seed_from_u64(3);
        let config = SolverConfig::default();
        let step = TimeStep::new(1.0 / 60.0, 60.0, &config);
        for _ in 0..50 {
            let friction = rng.gen_range(0.0..1.0);
            let (bodies, contacts, key, positions) =
                box_on_ground(0.5, friction, PositionCorrection::FullNgs);
            let mut velocities = vec![
                Velocity::default(),
                Velocity {
                    linear: m::Vec2::new(rng.gen_range(-5.0..5.0), rng.gen_range(-5.0..1.0)),
                    angular: rng.gen_range(-3.0..3.0),
                },
            ];
            let mut solver = ContactSolver::default();
            solver.init(step, &config, &[key], &contacts, &bodies);
            solver.init_velocity_constraints(&config, &positions, &velocities);
            for _ in 0..config.velocity_iterations {
                solver.solve_velocity_constraints(&mut velocities);
                let impulse = solver.impulse(0);
                for j in 0..impulse.count {
                    assert!(impulse.normal_impulses[j] >= 0.0);
                    assert!(impulse.tangent_impulses[j].abs() <= friction * impulse.normal_impulses[j] + 1e-12);
                }
            }
        }
    }

    #[test]
    fn falling_box_is_stopped() {
        let config = SolverConfig::default();
        let step = TimeStep::new(1.0 / 60.0, 0.0, &config);
        let (bodies, mut contacts, key, positions) = box_on_ground(0.5, 0.5, PositionCorrection::FullNgs);
        let mut velocities = vec![
            Velocity::default(),
            Velocity {
                linear: m::Vec2::new(0.0, -2.0),
                angular: 0.0,
            },
        ];
        let mut solver = ContactSolver::default();
        solver.init(step, &config, &[key], &contacts, &bodies);
        solver.init_velocity_constraints(&config, &positions, &velocities);
        solver.warm_start(&mut velocities);
        for _ in 0..config.velocity_iterations {
            solver.solve_velocity_constraints(&mut velocities);
        }
        // no restitution below the threshold speed.
        // the two points are solved one after the other, so a little spin remains
        assert!(velocities[1].linear.y.abs() < 1e-3);
        assert!(velocities[1].angular.abs() < 5e-3);

        solver.store_impulses(&mut contacts);
        let stored = contacts.get(key).unwrap().impulse();
        // the box had 2 units of momentum, split between both points
        let total: f64 = stored.normal_impulses.iter().sum();
        assert!((total - 2.0).abs() < 1e-2);
    }

    #[test]
    fn restitution_bounces() {
        let config = SolverConfig::default();
        let step = TimeStep::new(1.0 / 60.0, 0.0, &config);
        let (bodies, mut contacts, key, positions) = box_on_ground(0.5, 0.0, PositionCorrection::FullNgs);
        contacts.get_mut(key).unwrap().restitution = 0.5;
        let mut velocities = vec![
            Velocity::default(),
            Velocity {
                linear: m::Vec2::new(0.0, -4.0),
                angular: 0.0,
            },
        ];
        let mut solver = ContactSolver::default();
        solver.init(step, &config, &[key], &contacts, &bodies);
        solver.init_velocity_constraints(&config, &positions, &velocities);
        for _ in 0..20 {
            solver.solve_velocity_constraints(&mut velocities);
        }
        assert!((velocities[1].linear.y - 2.0).abs() < 1e-6);
    }

    #[test]
    fn baumgarte_pushes_apart_in_velocity_pass() {
        let config = SolverConfig::default();
        let step = TimeStep::new(1.0 / 60.0, 0.0, &config);
        let (bodies, contacts, key, positions) = box_on_ground(0.4, 0.0, PositionCorrection::Baumgarte);
        let mut velocities = vec![Velocity::default(); 2];
        let mut solver = ContactSolver::default();
        solver.init(step, &config, &[key], &contacts, &bodies);
        solver.init_velocity_constraints(&config, &positions, &velocities);
        for _ in 0..20 {
            solver.solve_velocity_constraints(&mut velocities);
        }
        let expected = config.baumgarte * 60.0 * (0.1 - config.allowed_penetration);
        assert!((velocities[1].linear.y - expected).abs() < 1e-6);

        // and Baumgarte contacts are skipped by the position pass
        let mut positions = positions;
        assert!(solver.solve_position_constraints(&config, &mut positions));
        assert_eq!(positions[1].c.y, 0.4);
    }

    #[test]
    fn position_pass_resolves_penetration() {
        let config = SolverConfig::default();
        let step = TimeStep::new(1.0 / 60.0, 0.0, &config);
        for correction in [PositionCorrection::FullNgs, PositionCorrection::ModifiedNgs] {
            let (bodies, contacts, key, mut positions) = box_on_ground(0.4, 0.0, correction);
            let velocities = vec![Velocity::default(); 2];
            let mut solver = ContactSolver::default();
            solver.init(step, &config, &[key], &contacts, &bodies);
            solver.init_velocity_constraints(&config, &positions, &velocities);

            assert!(!solver.solve_position_constraints(&config, &mut positions));
            let mut solved = false;
            for _ in 0..50 {
                if solver.solve_position_constraints(&config, &mut positions) {
                    solved = true;
                    break;
                }
            }
            assert!(solved);
            assert!(positions[1].c.y > 0.5 - config.linear_slop - 1e-9);
            // static ground never moves
            assert_eq!(positions[0].c, m::Vec2::zero());
        }
    }

    #[test]
    fn pseudo_velocities_separate_without_touching_velocity() {
        let config = SolverConfig::default();
        let step = TimeStep::new(1.0 / 60.0, 0.0, &config);
        let (bodies, contacts, key, positions) =
            box_on_ground(0.4, 0.0, PositionCorrection::PseudoVelocities);
        let velocities = vec![Velocity::default(); 2];
        let mut solver = ContactSolver::default();
        solver.init(step, &config, &[key], &contacts, &bodies);
        solver.init_velocity_constraints(&config, &positions, &velocities);
        assert!(solver.init_pseudo_velocities(&config, &positions));

        let mut pseudo = vec![Velocity::default(); 2];
        for _ in 0..10 {
            solver.solve_pseudo_velocities(&mut pseudo);
        }
        let target = config.baumgarte * (0.1 - config.allowed_penetration) * 60.0;
        assert!((pseudo[1].linear.y - target).abs() < 1e-6);
        assert_eq!(pseudo[0].linear, m::Vec2::zero());
    }

    #[test]
    fn toi_pass_moves_only_toi_bodies() {
        let config = SolverConfig::default();
        let step = TimeStep::new(1.0 / 60.0, 0.0, &config);
        let (mut bodies, contacts, key, mut positions) =
            box_on_ground(0.45, 0.0, PositionCorrection::FullNgs);
        // make the ground movable but exclude it from the sub-step
        let ground = contacts.get(key).unwrap().bodies()[0];
        *bodies.get_mut(ground).unwrap() = Body::new_dynamic(1.0, 1.0);
        let velocities = vec![Velocity::default(); 2];
        let mut solver = ContactSolver::default();
        solver.init(step, &config, &[key], &contacts, &bodies);
        solver.init_velocity_constraints(&config, &positions, &velocities);
        for _ in 0..config.toi_position_iterations {
            if solver.solve_toi_position_constraints(&config, &mut positions, 1, 1) {
                break;
            }
        }
        assert_eq!(positions[0].c, m::Vec2::zero());
        assert!(positions[1].c.y >= 0.5 - 1.5 * config.linear_slop - 1e-9);
    }

    #[test]
    fn overlap_beyond_slop_is_not_converged() {
        let config = SolverConfig::default();
        let step = TimeStep::new(1.0 / 60.0, 0.0, &config);
        let depth = 2.0 * config.linear_slop;
        let (bodies, contacts, key, mut positions) =
            box_on_ground(0.5 - depth, 0.0, PositionCorrection::FullNgs);
        let velocities = vec![Velocity::default(); 2];
        let mut solver = ContactSolver::default();
        solver.init(step, &config, &[key], &contacts, &bodies);
        solver.init_velocity_constraints(&config, &positions, &velocities);
        assert!(!solver.solve_position_constraints(&config, &mut positions));

        // an overlap within the slop counts as resting contact
        let (bodies, contacts, key, mut positions) =
            box_on_ground(0.5 - 0.5 * config.linear_slop, 0.0, PositionCorrection::FullNgs);
        let mut solver = ContactSolver::default();
        solver.init(step, &config, &[key], &contacts, &bodies);
        solver.init_velocity_constraints(&config, &positions, &velocities);
        assert!(solver.solve_position_constraints(&config, &mut positions));
    }
}

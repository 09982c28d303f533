//! Solving one connected group of bodies and their constraints for a single step.

use super::{
    contact_solver::ContactSolver, forcefield::ForceField, BodyKey, BodySet, BodyType, ContactKey,
    ContactSet, JointKey, JointSet, Position, SolverConfig, SolverData, SolverListener, TimeStep,
    Velocity,
};
use crate::math as m;

use itertools::izip;

/// Outcome of solving an island.
#[derive(Clone, Copy, Debug, Default)]
pub(crate) struct IslandReport {
    pub position_solved: bool,
    pub slept: bool,
    pub broken_joints: usize,
}

/// Working memory for solving islands, reused from one island to the next.
#[derive(Debug, Default)]
pub(crate) struct Island {
    bodies: Vec<BodyKey>,
    contacts: Vec<ContactKey>,
    joints: Vec<JointKey>,
    // joints that survived initialization this step
    solving_joints: Vec<JointKey>,
    positions: Vec<Position>,
    velocities: Vec<Velocity>,
    pseudo_velocities: Vec<Velocity>,
    contact_solver: ContactSolver,
    body_capacity: usize,
    contact_capacity: usize,
    joint_capacity: usize,
}

impl Island {
    /// Clear the island and set the maximum number of each thing that can be added to it.
    pub fn reset(&mut self, body_capacity: usize, contact_capacity: usize, joint_capacity: usize) {
        self.body_capacity = body_capacity;
        self.contact_capacity = contact_capacity;
        self.joint_capacity = joint_capacity;

        self.bodies.clear();
        self.contacts.clear();
        self.joints.clear();
        self.solving_joints.clear();
        // Vec::reserve only grows, so buffers never shrink between islands
        self.bodies.reserve(body_capacity);
        self.positions.reserve(body_capacity);
        self.velocities.reserve(body_capacity);
        self.contacts.reserve(contact_capacity);
        self.joints.reserve(joint_capacity);
    }

    /// Add a body and record its index in the island on the body.
    pub fn add_body(&mut self, key: BodyKey, bodies: &mut BodySet) {
        assert!(
            self.bodies.len() < self.body_capacity,
            "Island body capacity exceeded"
        );
        bodies.bodies[key.0].island_index = self.bodies.len();
        self.bodies.push(key);
    }

    pub fn add_contact(&mut self, key: ContactKey) {
        assert!(
            self.contacts.len() < self.contact_capacity,
            "Island contact capacity exceeded"
        );
        self.contacts.push(key);
    }

    pub fn add_joint(&mut self, key: JointKey) {
        assert!(
            self.joints.len() < self.joint_capacity,
            "Island joint capacity exceeded"
        );
        self.joints.push(key);
    }

    #[inline]
    pub fn bodies(&self) -> &[BodyKey] {
        &self.bodies
    }

    /// Copy the current state of the island's bodies into the working buffers.
    fn copy_in(&mut self, bodies: &BodySet) {
        self.positions.clear();
        self.velocities.clear();
        for key in &self.bodies {
            let body = &bodies.bodies[key.0];
            self.positions.push(Position {
                c: body.position,
                a: body.angle,
            });
            self.velocities.push(body.velocity);
        }
    }

    /// Write the working buffers back into the bodies.
    fn copy_out(&self, bodies: &mut BodySet) {
        for (key, p, v) in izip!(&self.bodies, &self.positions, &self.velocities) {
            let body = &mut bodies.bodies[key.0];
            let angle = m::wrap_angle(p.a);
            // keep the sweep in the same turn as the wrapped angle
            body.sweep.a0 += angle - p.a;
            body.position = p.c;
            body.angle = angle;
            body.velocity = *v;
        }
    }

    /// Move bodies according to their velocities, limiting how far they can go in one step.
    fn integrate_positions(&mut self, h: f64, config: &SolverConfig) {
        for (p, v) in izip!(&mut self.positions, &mut self.velocities) {
            let translation = v.linear * h;
            if translation.mag_sq() > config.max_translation * config.max_translation {
                v.linear *= config.max_translation / translation.mag();
            }
            let rotation = h * v.angular;
            if rotation * rotation > config.max_rotation * config.max_rotation {
                v.angular *= config.max_rotation / rotation.abs();
            }
            p.c += v.linear * h;
            p.a += h * v.angular;
        }
    }

    #[allow(clippy::too_many_arguments)]
    pub fn solve(
        &mut self,
        step: &TimeStep,
        config: &SolverConfig,
        forcefield: &impl ForceField,
        bodies: &mut BodySet,
        contacts: &mut ContactSet,
        joints: &mut JointSet,
        listener: &mut impl SolverListener,
    ) -> IslandReport {
        let _span = tracy_span!("solve island", "solve");
        let h = step.dt;
        let mut report = IslandReport::default();

        self.copy_in(bodies);
        for (key, v) in izip!(&self.bodies, &mut self.velocities) {
            let body = &bodies.bodies[key.0];
            if body.body_type != BodyType::Dynamic {
                continue;
            }
            let gravity = forcefield.value_at(body.position) * body.gravity_scale;
            v.linear += (gravity + body.force * body.inv_mass()) * h;
            v.angular += h * body.inv_inertia() * body.torque;
            v.linear *= (1.0 - h * body.linear_damping).clamp(0.0, 1.0);
            v.angular *= (1.0 - h * body.angular_damping).clamp(0.0, 1.0);
        }

        let mut data = SolverData {
            step: *step,
            config,
            positions: &mut self.positions,
            velocities: &mut self.velocities,
        };

        {
            let _span = tracy_span!("init constraints", "solve");
            self.contact_solver
                .init(*step, config, &self.contacts, contacts, bodies);
            self.contact_solver
                .init_velocity_constraints(config, data.positions, data.velocities);
            if step.warm_starting {
                self.contact_solver.warm_start(data.velocities);
            }

            for &key in &self.joints {
                let joint = &mut joints.joints[key.0];
                if !joint.bind(bodies) {
                    continue;
                }
                if joint.init_velocity_constraints(&mut data) {
                    self.solving_joints.push(key);
                } else {
                    report.broken_joints += 1;
                    listener.joint_broke(key, joint);
                }
            }
        }

        {
            let _span = tracy_span!("velocity iterations", "solve");
            for _ in 0..step.velocity_iterations {
                for &key in &self.solving_joints {
                    joints.joints[key.0].solve_velocity_constraints(&mut data);
                }
                self.contact_solver
                    .solve_velocity_constraints(data.velocities);
            }
            self.contact_solver.store_impulses(contacts);
        }

        self.integrate_positions(h, config);

        let mut data = SolverData {
            step: *step,
            config,
            positions: &mut self.positions,
            velocities: &mut self.velocities,
        };

        {
            let _span = tracy_span!("position correction", "solve");

            let mut any_pseudo = self
                .contact_solver
                .init_pseudo_velocities(config, data.positions);
            for &key in &self.solving_joints {
                let joint = &mut joints.joints[key.0];
                if joint.uses_pseudo_velocities() {
                    joint.init_pseudo_velocities(&data);
                    any_pseudo = true;
                }
            }
            if any_pseudo {
                self.pseudo_velocities.clear();
                self.pseudo_velocities
                    .resize(data.positions.len(), Velocity::default());
                for _ in 0..step.velocity_iterations {
                    for &key in &self.solving_joints {
                        let joint = &mut joints.joints[key.0];
                        if joint.uses_pseudo_velocities() {
                            joint.solve_pseudo_velocities(&mut self.pseudo_velocities);
                        }
                    }
                    self.contact_solver
                        .solve_pseudo_velocities(&mut self.pseudo_velocities);
                }
                for (p, pv) in izip!(data.positions.iter_mut(), &self.pseudo_velocities) {
                    p.c += pv.linear * h;
                    p.a += h * pv.angular;
                }
            }

            for _ in 0..step.position_iterations {
                let contacts_ok = self
                    .contact_solver
                    .solve_position_constraints(config, data.positions);
                let mut joints_ok = true;
                for &key in &self.solving_joints {
                    joints_ok &= joints.joints[key.0].solve_position_constraints(&mut data);
                }
                if contacts_ok && joints_ok {
                    report.position_solved = true;
                    break;
                }
            }
        }

        self.copy_out(bodies);
        for key in &self.bodies {
            let body = &mut bodies.bodies[key.0];
            body.force = m::Vec2::zero();
            body.torque = 0.0;
        }

        for (i, &key) in self.contacts.iter().enumerate() {
            let impulse = self.contact_solver.impulse(i);
            let contact = &contacts.contacts[key.0];
            listener.after_collision(&contact.fixtures[0], &contact.fixtures[1], key, &impulse);
            listener.post_solve(key, contact, &impulse);
        }

        for &key in &self.solving_joints {
            let joint = &mut joints.joints[key.0];
            if joint.check_break_after_solve() {
                report.broken_joints += 1;
                listener.joint_broke(key, joint);
            }
        }

        if config.allow_sleep {
            report.slept = self.update_sleep(h, config, report.position_solved, bodies);
            if report.slept {
                log::trace!("Island of {} bodies fell asleep", self.bodies.len());
                listener.island_slept(&self.bodies);
            }
        }

        report
    }

    /// Advance sleep timers and put the island to sleep if it's been resting long enough.
    ///
    /// Any body moving faster than the tolerances resets the timers of the whole island.
    fn update_sleep(
        &self,
        h: f64,
        config: &SolverConfig,
        position_solved: bool,
        bodies: &mut BodySet,
    ) -> bool {
        let lin_tol_sq = config.linear_sleep_tolerance * config.linear_sleep_tolerance;
        let ang_tol_sq = config.angular_sleep_tolerance * config.angular_sleep_tolerance;

        let restless = self.bodies.iter().any(|key| {
            let body = &bodies.bodies[key.0];
            body.body_type != BodyType::Static
                && (!body.sleeping_allowed
                    || body.velocity.angular * body.velocity.angular > ang_tol_sq
                    || body.velocity.linear.mag_sq() > lin_tol_sq)
        });

        let mut min_sleep_time = f64::MAX;
        for key in &self.bodies {
            let body = &mut bodies.bodies[key.0];
            if body.body_type == BodyType::Static {
                continue;
            }
            if restless {
                body.sleep_time = 0.0;
            } else {
                body.sleep_time += h;
            }
            min_sleep_time = min_sleep_time.min(body.sleep_time);
        }

        if min_sleep_time >= config.time_to_sleep && position_solved {
            for key in &self.bodies {
                bodies.bodies[key.0].set_awake(false);
            }
            true
        } else {
            false
        }
    }

    /// Solve a continuous collision sub-step.
    ///
    /// The island must contain exactly the two bodies of the impact followed by its contact,
    /// with the bodies already moved to the time of impact.
    pub fn solve_toi(
        &mut self,
        sub_step: &TimeStep,
        config: &SolverConfig,
        bodies: &mut BodySet,
        contacts: &ContactSet,
        listener: &mut impl SolverListener,
    ) {
        let _span = tracy_span!("solve time of impact", "solve_toi");
        let (toi_a, toi_b) = (0, 1);

        self.copy_in(bodies);
        self.contact_solver
            .init(*sub_step, config, &self.contacts, contacts, bodies);

        for _ in 0..sub_step.position_iterations {
            if self.contact_solver.solve_toi_position_constraints(
                config,
                &mut self.positions,
                toi_a,
                toi_b,
            ) {
                break;
            }
        }

        // leap of faith: the corrected pose is the new safe starting point
        for &i in &[toi_a, toi_b] {
            let body = &mut bodies.bodies[self.bodies[i].0];
            body.sweep.c0 = self.positions[i].c;
            body.sweep.a0 = self.positions[i].a;
        }

        // no warm starting, the discrete step already applied those impulses
        self.contact_solver
            .init_velocity_constraints(config, &self.positions, &self.velocities);
        for _ in 0..sub_step.velocity_iterations {
            self.contact_solver
                .solve_velocity_constraints(&mut self.velocities);
        }
        // impulses are not stored either, they can be very large

        self.integrate_positions(sub_step.dt, config);
        self.copy_out(bodies);

        for (i, &key) in self.contacts.iter().enumerate() {
            let impulse = self.contact_solver.impulse(i);
            let contact = &contacts.contacts[key.0];
            listener.post_solve(key, contact, &impulse);
        }
    }
}

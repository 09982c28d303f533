use crate::math as m;

//

pub mod body;
pub use body::{Body, BodyKey, BodySet, BodyType, Mass, Sweep};

pub mod config;
pub use config::{PositionCorrection, SolverConfig, TimeStep};

pub mod contact;
pub use contact::{
    Contact, ContactId, ContactImpulse, ContactKey, ContactSet, Fixture, Manifold, ManifoldPoint,
    ManifoldType, Material, WorldManifold,
};

pub(crate) mod contact_solver;

pub mod event;
pub use event::{EventLog, SolverEvent, SolverListener};

pub mod forcefield;
pub use forcefield::ForceField;

pub(crate) mod island;
use island::Island;

pub mod joint;
pub use joint::{
    Joint, JointBuilder, JointError, JointKey, JointKind, JointLimit, JointMotor, JointParams,
    JointSet,
};


//

/// Velocity of an object.
///
// Equivalent to a Vec3 but with names for the translational and rotational part.
#[derive(Copy, Clone, Debug, Default, PartialEq)]
#[cfg_attr(feature = "serde-types", derive(serde::Serialize, serde::Deserialize))]
pub struct Velocity {
    /// Linear velocity in metres per second.
    pub linear: m::Vec2,
    /// Angular velocity in radians per second.
    pub angular: f64,
}

impl Velocity {
    /// Get the linear velocity of a point offset from the center of mass.
    #[inline]
    pub fn point_velocity(&self, offset: m::Vec2) -> m::Vec2 {
        self.linear + m::cross_sv(self.angular, offset)
    }
}

impl std::ops::Add for Velocity {
    type Output = Self;
    fn add(self, other: Self) -> Self {
        Self {
            linear: self.linear + other.linear,
            angular: self.angular + other.angular,
        }
    }
}
impl std::ops::AddAssign for Velocity {
    fn add_assign(&mut self, other: Self) {
        *self = *self + other;
    }
}
impl std::ops::Mul<f64> for Velocity {
    type Output = Velocity;

    fn mul(self, rhs: f64) -> Self::Output {
        Velocity {
            linear: self.linear * rhs,
            angular: self.angular * rhs,
        }
    }
}

/// Position of a body's center of mass and its angle, as stored in the solver's working buffers.
#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub struct Position {
    pub c: m::Vec2,
    pub a: f64,
}

/// Everything a constraint needs to read and write while being solved.
pub(crate) struct SolverData<'a> {
    pub step: TimeStep,
    pub config: &'a SolverConfig,
    pub positions: &'a mut [Position],
    pub velocities: &'a mut [Velocity],
}

/// Errors from misusing the [`Physics`] API.
#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq)]
pub enum PhysicsError {
    #[error("No body with key {0:?} exists")]
    BodyNotFound(BodyKey),
    #[error("No joint with key {0:?} exists")]
    JointNotFound(JointKey),
    #[error("No contact with key {0:?} exists")]
    ContactNotFound(ContactKey),
    #[error("Invalid solver configuration: {0}")]
    InvalidConfig(&'static str),
    #[error("Time of impact {0} is outside the remaining part of the step")]
    InvalidToi(f64),
}

/// Summary of what happened during a call to [`Physics::step`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StepReport {
    /// Number of islands solved.
    pub islands: usize,
    /// Number of islands still awake after the step.
    pub awake_islands: usize,
    /// Whether every island's position constraints converged within the iteration budget.
    pub position_solved: bool,
    /// Number of joints that broke during the step.
    pub broken_joints: usize,
}

impl Default for StepReport {
    fn default() -> Self {
        Self {
            islands: 0,
            awake_islands: 0,
            position_solved: true,
            broken_joints: 0,
        }
    }
}

/// A time of impact found by continuous collision detection between the bodies of a contact.
#[derive(Clone, Copy, Debug)]
pub struct ToiEvent {
    pub contact: ContactKey,
    /// Fraction of the last step at which the impact happens.
    pub alpha: f64,
    /// Contact manifold of the bodies at the time of impact.
    pub manifold: Manifold,
}

/// A connection from a body to another in the constraint graph.
#[derive(Clone, Copy, Debug)]
enum Edge {
    Contact(ContactKey, BodyKey),
    Joint(JointKey, Option<BodyKey>),
}

/// The physics world.
///
/// Owns all bodies, joints and contacts.
/// Contacts are created and kept up to date by external collision detection,
/// while the world takes care of grouping everything into islands and solving them.
pub struct Physics {
    pub config: SolverConfig,
    bodies: BodySet,
    joints: JointSet,
    contacts: ContactSet,
    island: Island,
    // constraint graph adjacency, indexed by body arena slot
    edges: Vec<Vec<Edge>>,
    stack: Vec<BodyKey>,
    seeds: Vec<BodyKey>,
    prev_inv_dt: f64,
    last_dt: f64,
}

impl Default for Physics {
    fn default() -> Self {
        Self::new()
    }
}

impl Physics {
    /// Create a physics world with the default solver configuration.
    pub fn new() -> Self {
        Physics {
            config: SolverConfig::default(),
            bodies: BodySet::new(),
            joints: JointSet::new(),
            contacts: ContactSet::new(),
            island: Island::default(),
            edges: Vec::new(),
            stack: Vec::new(),
            seeds: Vec::new(),
            prev_inv_dt: 0.0,
            last_dt: 0.0,
        }
    }

    /// Create a physics world with a custom solver configuration.
    pub fn with_config(config: SolverConfig) -> Result<Self, PhysicsError> {
        config.validate()?;
        Ok(Physics {
            config,
            ..Self::new()
        })
    }

    //
    // bodies
    //

    pub fn insert_body(&mut self, body: Body) -> BodyKey {
        self.bodies.insert(body)
    }

    #[inline]
    pub fn body(&self, key: BodyKey) -> Option<&Body> {
        self.bodies.get(key)
    }

    #[inline]
    pub fn body_mut(&mut self, key: BodyKey) -> Option<&mut Body> {
        self.bodies.get_mut(key)
    }

    /// Remove a body from the world.
    ///
    /// Joints and contacts attached to it are cleaned up at the start of the next step.
    pub fn remove_body(&mut self, key: BodyKey) -> Option<Body> {
        self.bodies.remove(key)
    }

    #[inline]
    pub fn bodies(&self) -> &BodySet {
        &self.bodies
    }

    #[inline]
    pub fn bodies_mut(&mut self) -> &mut BodySet {
        &mut self.bodies
    }

    //
    // joints
    //

    /// Add a joint to the world. Fails if a body the joint refers to doesn't exist.
    pub fn insert_joint(&mut self, joint: Joint) -> Result<JointKey, PhysicsError> {
        let (own, other) = joint.bodies();
        for key in std::iter::once(own).chain(other) {
            if !self.bodies.contains(key) {
                return Err(PhysicsError::BodyNotFound(key));
            }
        }
        self.wake(own);
        if let Some(other) = other {
            self.wake(other);
        }
        Ok(self.joints.insert(joint))
    }

    #[inline]
    pub fn joint(&self, key: JointKey) -> Option<&Joint> {
        self.joints.get(key)
    }

    #[inline]
    pub fn joint_mut(&mut self, key: JointKey) -> Option<&mut Joint> {
        self.joints.get_mut(key)
    }

    pub fn remove_joint(&mut self, key: JointKey) -> Result<Joint, PhysicsError> {
        let joint = self
            .joints
            .remove(key)
            .ok_or(PhysicsError::JointNotFound(key))?;
        // whatever was held up by the joint may need to move now
        let (own, other) = joint.bodies();
        self.wake(own);
        if let Some(other) = other {
            self.wake(other);
        }
        Ok(joint)
    }

    #[inline]
    pub fn joints(&self) -> &JointSet {
        &self.joints
    }

    //
    // contacts
    //

    /// Add a contact found by collision detection.
    /// Fails if either of its bodies doesn't exist.
    pub fn insert_contact(&mut self, contact: Contact) -> Result<ContactKey, PhysicsError> {
        for key in contact.bodies() {
            if !self.bodies.contains(key) {
                return Err(PhysicsError::BodyNotFound(key));
            }
        }
        if contact.is_touching() {
            contact.bodies().into_iter().for_each(|b| self.wake(b));
        }
        Ok(self.contacts.insert(contact))
    }

    #[inline]
    pub fn contact(&self, key: ContactKey) -> Option<&Contact> {
        self.contacts.get(key)
    }

    #[inline]
    pub fn contact_mut(&mut self, key: ContactKey) -> Option<&mut Contact> {
        self.contacts.get_mut(key)
    }

    /// Give a contact a freshly computed manifold,
    /// carrying over impulses of matching points for warm starting.
    ///
    /// Wakes up the bodies if they started or stopped touching.
    pub fn update_contact(&mut self, key: ContactKey, manifold: Manifold) -> Result<(), PhysicsError> {
        let contact = self
            .contacts
            .get_mut(key)
            .ok_or(PhysicsError::ContactNotFound(key))?;
        let was_touching = contact.is_touching();
        contact.update_manifold(manifold);
        if contact.is_touching() != was_touching {
            let bodies = contact.bodies();
            bodies.into_iter().for_each(|b| self.wake(b));
        }
        Ok(())
    }

    pub fn remove_contact(&mut self, key: ContactKey) -> Result<Contact, PhysicsError> {
        let contact = self
            .contacts
            .remove(key)
            .ok_or(PhysicsError::ContactNotFound(key))?;
        if contact.is_touching() {
            contact.bodies().into_iter().for_each(|b| self.wake(b));
        }
        Ok(contact)
    }

    #[inline]
    pub fn contacts(&self) -> &ContactSet {
        &self.contacts
    }

    /// Check whether collision detection should create contacts between two bodies.
    ///
    /// At least one of them has to be dynamic,
    /// and they must not be connected by a joint that disables collision.
    pub fn should_collide(&self, a: BodyKey, b: BodyKey) -> bool {
        let (Some(body_a), Some(body_b)) = (self.bodies.get(a), self.bodies.get(b)) else {
            return false;
        };
        if body_a.body_type != BodyType::Dynamic && body_b.body_type != BodyType::Dynamic {
            return false;
        }
        !self
            .joints
            .iter()
            .any(|(_, j)| !j.collide_connected && j.connects(a, b))
    }

    fn wake(&mut self, key: BodyKey) {
        if let Some(body) = self.bodies.get_mut(key) {
            body.set_awake(true);
        }
    }

    //
    // stepping
    //

    /// Advance the simulation by `dt` seconds.
    ///
    /// Gravity and other fields are given by `forcefield`,
    /// and everything worth reporting during the step is sent to `listener`.
    /// A step of zero length does nothing except clean up
    /// joints and contacts whose bodies have been removed.
    pub fn step(
        &mut self,
        dt: f64,
        forcefield: &impl ForceField,
        listener: &mut impl SolverListener,
    ) -> StepReport {
        let _span = tracy_span!("physics step", "step");

        self.dispose_invalid(listener);
        if dt <= 0.0 {
            return StepReport::default();
        }

        let step = TimeStep::new(dt, self.prev_inv_dt, &self.config);
        self.build_graph();
        let report = self.solve_islands(&step, forcefield, listener);

        self.prev_inv_dt = step.inv_dt;
        self.last_dt = dt;
        report
    }

    /// Remove joints and contacts referring to bodies that no longer exist.
    fn dispose_invalid(&mut self, listener: &mut impl SolverListener) {
        let bodies = &self.bodies;
        self.contacts
            .contacts
            .retain(|_, c| c.bodies.iter().all(|&b| bodies.contains(b)));

        let dead_joints: Vec<JointKey> = self
            .joints
            .iter()
            .filter(|(_, j)| !j.validate(bodies))
            .map(|(key, _)| key)
            .collect();
        for key in dead_joints {
            if let Some(joint) = self.joints.remove(key) {
                log::debug!("Removing joint {:?} attached to a removed body", key);
                listener.joint_removed(key, &joint);
            }
        }
    }

    /// Reset island bookkeeping and collect the edges between bodies.
    fn build_graph(&mut self) {
        let slot_count = self
            .bodies
            .bodies
            .iter()
            .map(|(idx, _)| idx.slot() as usize + 1)
            .max()
            .unwrap_or(0);
        if self.edges.len() < slot_count {
            self.edges.resize_with(slot_count, Vec::new);
        }
        for edges in &mut self.edges {
            edges.clear();
        }

        for (_, body) in self.bodies.iter_mut() {
            body.island_flag = false;
            // the pose at the start of the step anchors continuous collision
            body.sweep = Sweep {
                c0: body.position,
                a0: body.angle,
                alpha0: 0.0,
            };
        }

        for (idx, contact) in self.contacts.contacts.iter_mut() {
            contact.island_flag = false;
            contact.toi_count = 0;
            if !contact.is_solid() {
                continue;
            }
            let [a, b] = contact.bodies;
            self.edges[slot(a)].push(Edge::Contact(ContactKey(idx), b));
            self.edges[slot(b)].push(Edge::Contact(ContactKey(idx), a));
        }

        for (idx, joint) in self.joints.joints.iter_mut() {
            joint.island_flag = false;
            if !joint.is_active() {
                continue;
            }
            let (own, other) = joint.bodies;
            self.edges[slot(own)].push(Edge::Joint(JointKey(idx), other));
            if let Some(other) = other {
                self.edges[slot(other)].push(Edge::Joint(JointKey(idx), Some(own)));
            }
        }
    }

    /// Find the islands of awake bodies with a depth-first search and solve each one.
    fn solve_islands(
        &mut self,
        step: &TimeStep,
        forcefield: &impl ForceField,
        listener: &mut impl SolverListener,
    ) -> StepReport {
        let Physics {
            config,
            bodies,
            joints,
            contacts,
            island,
            edges,
            stack,
            seeds,
            ..
        } = self;
        let mut report = StepReport::default();

        seeds.clear();
        seeds.extend(bodies.iter().map(|(key, _)| key));

        for &seed in seeds.iter() {
            let body = &bodies.bodies[seed.0];
            if body.island_flag || !body.awake || body.body_type == BodyType::Static {
                continue;
            }

            island.reset(bodies.len(), contacts.len(), joints.len());
            stack.clear();
            stack.push(seed);
            bodies.bodies[seed.0].island_flag = true;

            while let Some(key) = stack.pop() {
                island.add_body(key, bodies);
                let body = &mut bodies.bodies[key.0];
                // static bodies anchor islands without connecting them
                if body.body_type == BodyType::Static {
                    continue;
                }
                // waking a body here keeps its sleep timer running
                body.awake = true;

                for edge in &edges[slot(key)] {
                    let other = match *edge {
                        Edge::Contact(ck, other) => {
                            let contact = &mut contacts.contacts[ck.0];
                            if contact.island_flag {
                                continue;
                            }
                            contact.island_flag = true;
                            island.add_contact(ck);
                            Some(other)
                        }
                        Edge::Joint(jk, other) => {
                            let joint = &mut joints.joints[jk.0];
                            if joint.island_flag {
                                continue;
                            }
                            joint.island_flag = true;
                            island.add_joint(jk);
                            other
                        }
                    };
                    let Some(other) = other else {
                        continue;
                    };
                    let other_body = &mut bodies.bodies[other.0];
                    if other_body.island_flag {
                        continue;
                    }
                    other_body.island_flag = true;
                    stack.push(other);
                }
            }

            let result = island.solve(step, config, forcefield, bodies, contacts, joints, listener);
            report.islands += 1;
            if !result.slept {
                report.awake_islands += 1;
            }
            report.position_solved &= result.position_solved;
            report.broken_joints += result.broken_joints;

            // static bodies can be part of more than one island
            for key in island.bodies() {
                let body = &mut bodies.bodies[key.0];
                if body.body_type == BodyType::Static {
                    body.island_flag = false;
                }
            }
        }

        if !report.position_solved {
            log::trace!("Position constraints did not converge in every island");
        }
        report
    }

    /// Resolve an impact found by continuous collision detection after a step.
    ///
    /// Rewinds the bodies of the contact to the time of impact,
    /// pushes them apart and integrates them over the rest of the step.
    /// Other bodies touching the pair are not involved.
    pub fn solve_toi(
        &mut self,
        event: ToiEvent,
        listener: &mut impl SolverListener,
    ) -> Result<(), PhysicsError> {
        if !(0.0..1.0).contains(&event.alpha) {
            return Err(PhysicsError::InvalidToi(event.alpha));
        }
        let contact = self
            .contacts
            .get(event.contact)
            .ok_or(PhysicsError::ContactNotFound(event.contact))?;
        let [a, b] = contact.bodies();
        for key in [a, b] {
            let body = self.bodies.get(key).ok_or(PhysicsError::BodyNotFound(key))?;
            if body.body_type != BodyType::Static && event.alpha < body.sweep.alpha0 {
                return Err(PhysicsError::InvalidToi(event.alpha));
            }
        }

        let contact = &mut self.contacts.contacts[event.contact.0];
        contact.update_manifold(event.manifold);
        contact.toi_count += 1;
        if !contact.is_solid() {
            return Ok(());
        }

        for key in [a, b] {
            let body = &mut self.bodies.bodies[key.0];
            if body.body_type != BodyType::Static {
                body.advance(event.alpha);
                body.set_awake(true);
            }
        }

        let dt = (1.0 - event.alpha) * self.last_dt;
        let sub_step = TimeStep {
            dt,
            inv_dt: if dt > 0.0 { 1.0 / dt } else { 0.0 },
            dt_ratio: 1.0,
            velocity_iterations: self.config.toi_velocity_iterations,
            position_iterations: self.config.toi_position_iterations,
            warm_starting: false,
        };

        self.island.reset(2, 1, 0);
        self.island.add_body(a, &mut self.bodies);
        self.island.add_body(b, &mut self.bodies);
        self.island.add_contact(event.contact);
        self.island.solve_toi(
            &sub_step,
            &self.config,
            &mut self.bodies,
            &self.contacts,
            listener,
        );
        Ok(())
    }
}

#[inline]
fn slot(key: BodyKey) -> usize {
    key.0.slot() as usize
}

//! Joints restrict the relative motion of two bodies,
//! or the motion of a single body relative to the world.
//!
//! Every joint type is a flat struct implementing the same small solver contract
//! (prepare, warm start, velocity solve, position solve),
//! dispatched through the [`JointKind`][self::JointKind] enum.

use super::{BodyKey, BodySet, PhysicsError, Position, PositionCorrection, SolverData, Velocity};
use crate::math as m;

use thunderdome as td;

mod angle;
pub use angle::{AngleJoint, AngleTarget};
mod distance;
pub use distance::{DistanceJoint, Spring};
mod gear;
pub use gear::GearJoint;
mod motor;
pub use motor::MotorJoint;
mod prismatic;
pub use prismatic::PrismaticJoint;
mod pulley;
pub use pulley::PulleyJoint;
mod revolute;
pub use revolute::RevoluteJoint;
mod weld;
pub use weld::WeldJoint;

/// Key type to look up a joint stored in the physics world.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct JointKey(pub(crate) td::Index);

impl JointKey {
    /// Get the underlying [`thunderdome::Index`][thunderdome::Index] of this key.
    #[inline]
    pub fn index(&self) -> td::Index {
        self.0
    }
}

/// Parameters shared by all joint types that control how the constraint is solved.
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "serde-types", derive(serde::Serialize, serde::Deserialize))]
pub struct JointParams {
    /// Constraint force mixing term added to the effective mass.
    /// Zero makes the joint rigid; larger values make it softer and more stable.
    pub softness: f64,
    /// Fraction of the position error corrected per step
    /// by the Baumgarte and pseudo-velocity strategies.
    pub bias_factor: f64,
    pub correction: PositionCorrection,
}

impl Default for JointParams {
    fn default() -> Self {
        Self {
            softness: 0.0,
            bias_factor: 0.2,
            correction: PositionCorrection::FullNgs,
        }
    }
}

/// Lower and upper bounds for the free coordinate of a joint.
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "serde-types", derive(serde::Serialize, serde::Deserialize))]
pub struct JointLimit {
    pub lower: f64,
    pub upper: f64,
}

impl JointLimit {
    pub fn new(lower: f64, upper: f64) -> Self {
        assert!(lower <= upper, "Joint limit lower bound above upper bound");
        Self { lower, upper }
    }

    /// How far `value` is outside of the limits.
    #[inline]
    pub fn violation(&self, value: f64) -> f64 {
        (self.lower - value).max(value - self.upper).max(0.0)
    }

    /// Error to correct in a position pass, or `None` if the value is within limits.
    fn position_correction(&self, value: f64, slop: f64, max_correction: f64) -> Option<f64> {
        if (self.upper - self.lower).abs() < 2.0 * slop {
            Some((value - self.lower).clamp(-max_correction, max_correction))
        } else if value <= self.lower {
            Some((value - self.lower + slop).clamp(-max_correction, 0.0))
        } else if value >= self.upper {
            Some((value - self.upper - slop).clamp(0.0, max_correction))
        } else {
            None
        }
    }
}

/// Motor settings for joints that can drive their free coordinate.
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "serde-types", derive(serde::Serialize, serde::Deserialize))]
pub struct JointMotor {
    /// Target speed of the free coordinate.
    pub speed: f64,
    /// Maximum force (or torque for angular motors) the motor can apply.
    pub max_force: f64,
}

/// Position error of a joint, split into linear and angular parts.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct JointError {
    pub linear: f64,
    pub angular: f64,
}

impl JointError {
    #[inline]
    pub fn linear(linear: f64) -> Self {
        Self {
            linear,
            angular: 0.0,
        }
    }

    #[inline]
    pub fn angular(angular: f64) -> Self {
        Self {
            linear: 0.0,
            angular,
        }
    }

    /// The larger of the two components, compared against breakpoints.
    #[inline]
    pub fn magnitude(&self) -> f64 {
        self.linear.max(self.angular)
    }
}

/// Type-specific data of a joint.
#[derive(Clone, Copy, Debug)]
pub enum JointKind {
    Revolute(RevoluteJoint),
    Distance(DistanceJoint),
    Weld(WeldJoint),
    Angle(AngleJoint),
    Prismatic(PrismaticJoint),
    Pulley(PulleyJoint),
    Gear(GearJoint),
    Motor(MotorJoint),
}

macro_rules! dispatch {
    ($kind:expr, $j:ident => $body:expr) => {
        match $kind {
            JointKind::Revolute($j) => $body,
            JointKind::Distance($j) => $body,
            JointKind::Weld($j) => $body,
            JointKind::Angle($j) => $body,
            JointKind::Prismatic($j) => $body,
            JointKind::Pulley($j) => $body,
            JointKind::Gear($j) => $body,
            JointKind::Motor($j) => $body,
        }
    };
}

/// The contract every joint type implements to take part in the island solve.
pub(crate) trait JointSolver {
    /// Compute anchors, effective masses and bias terms from the current positions.
    /// Returns the current position error.
    fn prepare(&mut self, params: &JointParams, bodies: &JointBodies, data: &SolverData)
        -> JointError;
    /// Apply last step's accumulated impulse, scaled by the timestep ratio.
    fn warm_start(&mut self, bodies: &JointBodies, data: &mut SolverData);
    fn reset_impulse(&mut self);
    fn solve_velocity(&mut self, params: &JointParams, bodies: &JointBodies, data: &mut SolverData);
    /// Correct positions directly. Only called for NGS strategies.
    fn solve_position(
        &mut self,
        params: &JointParams,
        bodies: &JointBodies,
        data: &mut SolverData,
    ) -> JointError;
    /// Constraint rows evaluated at the given positions for the pseudo-velocity pass.
    fn pseudo_rows(&mut self, bodies: &JointBodies, positions: &[Position; 2], rows: &mut PseudoRows);
}

/// A joint between two bodies, or between a body and the world.
#[derive(Clone, Copy, Debug)]
pub struct Joint {
    pub(crate) bodies: (BodyKey, Option<BodyKey>),
    /// Disabled joints are ignored by the solver.
    pub enabled: bool,
    pub(crate) broken: bool,
    /// Largest position error the joint tolerates before breaking. `None` means unbreakable.
    pub breakpoint: Option<f64>,
    /// Also compare the error left after the position pass against the breakpoint.
    /// The check at the start of the step always happens.
    pub break_after_solve: bool,
    /// Whether collision detection should produce contacts between the connected bodies.
    pub collide_connected: bool,
    pub params: JointParams,
    pub kind: JointKind,
    pub(crate) last_error: JointError,
    pub(crate) solver_bodies: JointBodies,
    pub(crate) pseudo: PseudoRows,
    pub(crate) island_flag: bool,
}

impl Joint {
    /// The connected bodies. The second one is `None` for joints anchored to the world.
    #[inline]
    pub fn bodies(&self) -> (BodyKey, Option<BodyKey>) {
        self.bodies
    }

    #[inline]
    pub fn is_broken(&self) -> bool {
        self.broken
    }

    /// Whether the solver will process this joint.
    #[inline]
    pub fn is_active(&self) -> bool {
        self.enabled && !self.broken
    }

    /// The position error computed most recently by the solver.
    #[inline]
    pub fn last_error(&self) -> JointError {
        self.last_error
    }

    /// Check that all bodies this joint refers to still exist.
    pub fn validate(&self, bodies: &BodySet) -> bool {
        bodies.contains(self.bodies.0) && self.bodies.1.map(|b| bodies.contains(b)).unwrap_or(true)
    }

    /// Check whether this joint connects the given two bodies (in either order).
    pub fn connects(&self, a: BodyKey, b: BodyKey) -> bool {
        let (own, other) = self.bodies;
        (own == a && other == Some(b)) || (own == b && other == Some(a))
    }

    #[inline]
    fn exceeds_breakpoint(&self) -> bool {
        match self.breakpoint {
            Some(bp) => self.last_error.magnitude() > bp,
            None => false,
        }
    }

    fn break_joint(&mut self) {
        self.enabled = false;
        self.broken = true;
        log::debug!(
            "Joint broke with error {:?} over breakpoint {:?}",
            self.last_error,
            self.breakpoint
        );
    }

    /// Look up island indices and mass properties of the connected bodies.
    /// Returns false if neither body can move, in which case there's nothing to solve.
    pub(crate) fn bind(&mut self, bodies: &BodySet) -> bool {
        self.solver_bodies = JointBodies::bind(self.bodies, bodies);
        !self.solver_bodies.is_immovable()
    }

    /// Start-of-step phase. Returns false if the joint broke.
    pub(crate) fn init_velocity_constraints(&mut self, data: &mut SolverData) -> bool {
        let params = self.params;
        let bodies = self.solver_bodies;
        self.last_error = dispatch!(&mut self.kind, j => j.prepare(&params, &bodies, data));
        if self.exceeds_breakpoint() {
            self.break_joint();
            return false;
        }
        if data.step.warm_starting {
            dispatch!(&mut self.kind, j => j.warm_start(&bodies, data));
        } else {
            dispatch!(&mut self.kind, j => j.reset_impulse());
        }
        true
    }

    pub(crate) fn solve_velocity_constraints(&mut self, data: &mut SolverData) {
        let params = self.params;
        let bodies = self.solver_bodies;
        dispatch!(&mut self.kind, j => j.solve_velocity(&params, &bodies, data));
    }

    /// Returns true if the joint's error is within tolerance.
    pub(crate) fn solve_position_constraints(&mut self, data: &mut SolverData) -> bool {
        if !self.params.correction.is_ngs() {
            return true;
        }
        let params = self.params;
        let bodies = self.solver_bodies;
        let error = dispatch!(&mut self.kind, j => j.solve_position(&params, &bodies, data));
        self.last_error = error;
        error.linear <= data.config.linear_slop && error.angular <= data.config.angular_slop
    }

    #[inline]
    pub(crate) fn uses_pseudo_velocities(&self) -> bool {
        self.params.correction == PositionCorrection::PseudoVelocities
    }

    pub(crate) fn init_pseudo_velocities(&mut self, data: &SolverData) {
        let bodies = self.solver_bodies;
        let positions = bodies.read_positions(data.positions);
        self.pseudo.clear();
        dispatch!(&mut self.kind, j => j.pseudo_rows(&bodies, &positions, &mut self.pseudo));
        self.pseudo
            .prepare(&bodies, self.params.bias_factor, data.step.inv_dt);
    }

    pub(crate) fn solve_pseudo_velocities(&mut self, pseudo_velocities: &mut [Velocity]) {
        let bodies = self.solver_bodies;
        let mut v = bodies.read_velocities(pseudo_velocities);
        self.pseudo.solve(&bodies, &mut v);
        bodies.write_velocities(pseudo_velocities, v);
    }

    /// Compare the error left after solving against the breakpoint.
    /// Returns true if the joint broke.
    pub(crate) fn check_break_after_solve(&mut self) -> bool {
        if self.break_after_solve && self.is_active() && self.exceeds_breakpoint() {
            self.break_joint();
            true
        } else {
            false
        }
    }
}

/// A builder that allows ergonomic construction of different joints.
#[derive(Clone, Copy, Debug)]
pub struct JointBuilder {
    owner: BodyKey,
    target: Option<BodyKey>,
    offsets: [m::Vec2; 2],
    reference_angle: f64,
    params: JointParams,
    breakpoint: Option<f64>,
    break_after_solve: bool,
    collide_connected: bool,
}

impl JointBuilder {
    /// Start building a joint.
    ///
    /// An owning body is required.
    /// If you don't connect the joint to another body with
    /// `with_target`, it will be connected to the world.
    pub fn new(owner: BodyKey) -> Self {
        Self {
            owner,
            target: None,
            offsets: [m::Vec2::zero(); 2],
            reference_angle: 0.0,
            params: JointParams::default(),
            breakpoint: None,
            break_after_solve: true,
            collide_connected: false,
        }
    }

    /// Attach the joint to another body.
    pub fn with_target(mut self, target: BodyKey) -> Self {
        self.target = Some(target);
        self
    }

    /// Set the anchor point of the joint on the owning body
    /// relative to the center of mass.
    pub fn with_origin(mut self, point: m::Vec2) -> Self {
        self.offsets[0] = point;
        self
    }

    /// Set the anchor point of the joint on the target body
    /// relative to the center of mass,
    /// or in the world if there is no target.
    pub fn with_target_origin(mut self, point: m::Vec2) -> Self {
        self.offsets[1] = point;
        self
    }

    /// Place both anchors at the same world point,
    /// and set the reference angle to the current relative angle of the bodies.
    pub fn with_world_anchor(
        mut self,
        point: m::Vec2,
        bodies: &BodySet,
    ) -> Result<Self, PhysicsError> {
        let owner = bodies
            .get(self.owner)
            .ok_or(PhysicsError::BodyNotFound(self.owner))?;
        self.offsets[0] = owner.local_point(point);
        match self.target {
            Some(target_key) => {
                let target = bodies
                    .get(target_key)
                    .ok_or(PhysicsError::BodyNotFound(target_key))?;
                self.offsets[1] = target.local_point(point);
                self.reference_angle = target.angle - owner.angle;
            }
            None => {
                self.offsets[1] = point;
                self.reference_angle = -owner.angle;
            }
        }
        Ok(self)
    }

    /// Set the relative angle of the bodies that the joint considers its rest state.
    pub fn with_reference_angle(mut self, angle: m::Angle) -> Self {
        self.reference_angle = angle.rad();
        self
    }

    /// Add softness (constraint force mixing) to the joint.
    pub fn with_softness(mut self, softness: f64) -> Self {
        self.params.softness = softness;
        self
    }

    /// Set the fraction of error corrected per step by bias-based correction strategies.
    pub fn with_bias_factor(mut self, bias_factor: f64) -> Self {
        self.params.bias_factor = bias_factor;
        self
    }

    /// Set the position correction strategy of the joint.
    pub fn with_correction(mut self, correction: PositionCorrection) -> Self {
        self.params.correction = correction;
        self
    }

    /// Make the joint break when its error exceeds the given value.
    pub fn with_breakpoint(mut self, breakpoint: f64) -> Self {
        self.breakpoint = Some(breakpoint);
        self
    }

    /// Only check the breakpoint at the start of each step,
    /// not against the error left after solving.
    pub fn without_break_after_solve(mut self) -> Self {
        self.break_after_solve = false;
        self
    }

    /// Let collision detection produce contacts between the connected bodies.
    pub fn with_collide_connected(mut self) -> Self {
        self.collide_connected = true;
        self
    }

    /// Build a revolute joint, pinning the two anchors together.
    pub fn build_revolute(self) -> Joint {
        self.build(JointKind::Revolute(RevoluteJoint::new(
            self.offsets,
            self.reference_angle,
        )))
    }

    /// Build a distance joint, keeping the anchors at a fixed distance.
    pub fn build_distance(self, length: f64) -> Joint {
        self.build(JointKind::Distance(DistanceJoint::new(self.offsets, length)))
    }

    /// Build a weld joint, gluing the bodies together.
    pub fn build_weld(self) -> Joint {
        self.build(JointKind::Weld(WeldJoint::new(
            self.offsets,
            self.reference_angle,
        )))
    }

    /// Build an angle joint, constraining the relative angle of the bodies.
    pub fn build_angle(self, target: AngleTarget) -> Joint {
        self.build(JointKind::Angle(AngleJoint::new(target)))
    }

    /// Build a prismatic joint sliding along an axis fixed in the owning body.
    pub fn build_prismatic(self, local_axis: m::Vec2) -> Joint {
        self.build(JointKind::Prismatic(PrismaticJoint::new(
            self.offsets,
            local_axis,
            self.reference_angle,
        )))
    }

    /// Build a pulley joint between two ground anchors.
    pub fn build_pulley(self, ground_anchors: [m::Vec2; 2], lengths: [f64; 2], ratio: f64) -> Joint {
        self.build(JointKind::Pulley(PulleyJoint::new(
            ground_anchors,
            self.offsets,
            lengths,
            ratio,
        )))
    }

    /// Build a gear joint coupling the rotation of the two bodies.
    pub fn build_gear(self, ratio: f64) -> Joint {
        self.build(JointKind::Gear(GearJoint::new(ratio)))
    }

    /// Build a motor joint driving the target body towards an offset from the owner.
    pub fn build_motor(self, max_force: f64, max_torque: f64) -> Joint {
        self.build(JointKind::Motor(MotorJoint::new(max_force, max_torque)))
    }

    pub fn build(self, kind: JointKind) -> Joint {
        Joint {
            bodies: (self.owner, self.target),
            enabled: true,
            broken: false,
            breakpoint: self.breakpoint,
            break_after_solve: self.break_after_solve,
            collide_connected: self.collide_connected,
            params: self.params,
            kind,
            last_error: JointError::default(),
            solver_bodies: JointBodies::default(),
            pseudo: PseudoRows::default(),
            island_flag: false,
        }
    }
}

/// Manager struct holding joints inside of a physics world.
#[derive(Clone, Debug, Default)]
pub struct JointSet {
    pub(crate) joints: td::Arena<Joint>,
}

impl JointSet {
    #[inline]
    pub(crate) fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub(crate) fn insert(&mut self, joint: Joint) -> JointKey {
        JointKey(self.joints.insert(joint))
    }

    /// Access a joint in the physics world, if it still exists.
    #[inline]
    pub fn get(&self, key: JointKey) -> Option<&Joint> {
        self.joints.get(key.0)
    }

    /// Mutably access a joint in the physics world, if it still exists.
    #[inline]
    pub fn get_mut(&mut self, key: JointKey) -> Option<&mut Joint> {
        self.joints.get_mut(key.0)
    }

    /// Remove a joint from the physics world, returning it if it still existed.
    ///
    /// Joints can also disappear on their own if the bodies they're attached to
    /// are destroyed, so it's not guaranteed the joint will exist
    /// even if it hasn't been explicitly removed before.
    #[inline]
    pub fn remove(&mut self, key: JointKey) -> Option<Joint> {
        self.joints.remove(key.0)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.joints.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.joints.is_empty()
    }

    pub fn iter(&self) -> impl '_ + Iterator<Item = (JointKey, &Joint)> {
        self.joints.iter().map(|(idx, j)| (JointKey(idx), j))
    }
}

//
// solver helpers shared by the joint types
//

/// Island indices and mass properties of the bodies connected by a joint.
/// A missing index stands for the world, which never moves.
#[derive(Clone, Copy, Debug, Default)]
pub(crate) struct JointBodies {
    pub index: [Option<usize>; 2],
    pub inv_mass: [f64; 2],
    pub inv_inertia: [f64; 2],
}

impl JointBodies {
    fn bind(keys: (BodyKey, Option<BodyKey>), bodies: &BodySet) -> Self {
        let mut ret = JointBodies::default();
        for (i, key) in [Some(keys.0), keys.1].into_iter().enumerate() {
            if let Some(body) = key.and_then(|k| bodies.get(k)) {
                ret.index[i] = Some(body.island_index);
                ret.inv_mass[i] = body.inv_mass();
                ret.inv_inertia[i] = body.inv_inertia();
            }
        }
        ret
    }

    #[inline]
    pub fn is_immovable(&self) -> bool {
        self.inv_mass.iter().chain(&self.inv_inertia).all(|&m| m == 0.0)
    }

    #[inline]
    pub fn read_positions(&self, positions: &[Position]) -> [Position; 2] {
        [0, 1].map(|i| self.index[i].map(|b| positions[b]).unwrap_or_default())
    }

    #[inline]
    pub fn write_positions(&self, positions: &mut [Position], p: [Position; 2]) {
        for (idx, p) in self.index.iter().zip(p) {
            if let Some(b) = idx {
                positions[*b] = p;
            }
        }
    }

    #[inline]
    pub fn read_velocities(&self, velocities: &[Velocity]) -> [Velocity; 2] {
        [0, 1].map(|i| self.index[i].map(|b| velocities[b]).unwrap_or_default())
    }

    #[inline]
    pub fn write_velocities(&self, velocities: &mut [Velocity], v: [Velocity; 2]) {
        for (idx, v) in self.index.iter().zip(v) {
            if let Some(b) = idx {
                velocities[*b] = v;
            }
        }
    }

    /// Inverse of the summed inverse inertias, zero if neither body can rotate.
    #[inline]
    pub fn angular_mass(&self) -> f64 {
        let k = self.inv_inertia[0] + self.inv_inertia[1];
        if k > 0.0 {
            1.0 / k
        } else {
            0.0
        }
    }

    /// Effective inverse mass matrix of a point-to-point constraint with the given lever arms.
    pub fn point_matrix(&self, r: &[m::Vec2; 2]) -> m::Mat2 {
        let [m_a, m_b] = self.inv_mass;
        let [i_a, i_b] = self.inv_inertia;
        let [r_a, r_b] = *r;
        let k12 = -r_a.y * r_a.x * i_a - r_b.y * r_b.x * i_b;
        m::Mat2::new(
            m::Vec2::new(m_a + m_b + r_a.y * r_a.y * i_a + r_b.y * r_b.y * i_b, k12),
            m::Vec2::new(k12, m_a + m_b + r_a.x * r_a.x * i_a + r_b.x * r_b.x * i_b),
        )
    }

    /// Apply an impulse `p` at the anchors, negative to the first body and positive to the second.
    #[inline]
    pub fn apply_point_impulse(&self, v: &mut [Velocity; 2], r: &[m::Vec2; 2], p: m::Vec2) {
        v[0].linear -= p * self.inv_mass[0];
        v[0].angular -= self.inv_inertia[0] * m::cross(r[0], p);
        v[1].linear += p * self.inv_mass[1];
        v[1].angular += self.inv_inertia[1] * m::cross(r[1], p);
    }

    /// Position-level equivalent of `apply_point_impulse`.
    #[inline]
    pub fn apply_point_correction(&self, pos: &mut [Position; 2], r: &[m::Vec2; 2], p: m::Vec2) {
        pos[0].c -= p * self.inv_mass[0];
        pos[0].a -= self.inv_inertia[0] * m::cross(r[0], p);
        pos[1].c += p * self.inv_mass[1];
        pos[1].a += self.inv_inertia[1] * m::cross(r[1], p);
    }

    #[inline]
    pub fn apply_angular_impulse(&self, v: &mut [Velocity; 2], impulse: f64) {
        v[0].angular -= self.inv_inertia[0] * impulse;
        v[1].angular += self.inv_inertia[1] * impulse;
    }

    #[inline]
    pub fn apply_angular_correction(&self, pos: &mut [Position; 2], impulse: f64) {
        pos[0].a -= self.inv_inertia[0] * impulse;
        pos[1].a += self.inv_inertia[1] * impulse;
    }
}

/// One row of a constraint Jacobian, split into the parts acting on each body.
///
/// The time derivative of the constraint function is `jacobian.dot(velocities)`.
#[derive(Clone, Copy, Debug, Default)]
pub(crate) struct Jacobian {
    pub lin_a: m::Vec2,
    pub ang_a: f64,
    pub lin_b: m::Vec2,
    pub ang_b: f64,
}

impl Jacobian {
    /// Jacobian of the relative velocity of two anchors along direction `u`.
    #[inline]
    pub fn along(u: m::Vec2, r: &[m::Vec2; 2]) -> Self {
        Self {
            lin_a: -u,
            ang_a: -m::cross(r[0], u),
            lin_b: u,
            ang_b: m::cross(r[1], u),
        }
    }

    /// Jacobian of the relative angle of the bodies.
    #[inline]
    pub fn angular() -> Self {
        Self {
            lin_a: m::Vec2::zero(),
            ang_a: -1.0,
            lin_b: m::Vec2::zero(),
            ang_b: 1.0,
        }
    }

    #[inline]
    pub fn dot(&self, v: &[Velocity; 2]) -> f64 {
        self.lin_a.dot(v[0].linear)
            + self.ang_a * v[0].angular
            + self.lin_b.dot(v[1].linear)
            + self.ang_b * v[1].angular
    }

    /// Diagonal element of `J * M^-1 * J^T`.
    #[inline]
    pub fn inv_effective_mass(&self, bodies: &JointBodies) -> f64 {
        bodies.inv_mass[0] * self.lin_a.mag_sq()
            + bodies.inv_inertia[0] * self.ang_a * self.ang_a
            + bodies.inv_mass[1] * self.lin_b.mag_sq()
            + bodies.inv_inertia[1] * self.ang_b * self.ang_b
    }

    #[inline]
    pub fn apply(&self, v: &mut [Velocity; 2], bodies: &JointBodies, impulse: f64) {
        v[0].linear += self.lin_a * (bodies.inv_mass[0] * impulse);
        v[0].angular += bodies.inv_inertia[0] * impulse * self.ang_a;
        v[1].linear += self.lin_b * (bodies.inv_mass[1] * impulse);
        v[1].angular += bodies.inv_inertia[1] * impulse * self.ang_b;
    }

    #[inline]
    pub fn apply_position(&self, pos: &mut [Position; 2], bodies: &JointBodies, impulse: f64) {
        pos[0].c += self.lin_a * (bodies.inv_mass[0] * impulse);
        pos[0].a += bodies.inv_inertia[0] * impulse * self.ang_a;
        pos[1].c += self.lin_b * (bodies.inv_mass[1] * impulse);
        pos[1].a += bodies.inv_inertia[1] * impulse * self.ang_b;
    }
}

impl std::ops::Neg for Jacobian {
    type Output = Jacobian;

    fn neg(self) -> Self::Output {
        Jacobian {
            lin_a: -self.lin_a,
            ang_a: -self.ang_a,
            lin_b: -self.lin_b,
            ang_b: -self.ang_b,
        }
    }
}

/// Inverse of an effective inverse mass.
///
/// Zero if the row has no effect on the bodies, e.g. when its direction is undefined
/// because the anchors coincide. A zero mass makes the row apply no impulse.
#[inline]
pub(crate) fn effective_mass(k: f64) -> f64 {
    if k > 0.0 {
        1.0 / k
    } else {
        0.0
    }
}

/// Accumulated impulses of the lower and upper bound rows of a [`JointLimit`].
#[derive(Clone, Copy, Debug, Default)]
pub(crate) struct LimitImpulses {
    pub lower: f64,
    pub upper: f64,
}

impl LimitImpulses {
    #[inline]
    pub fn scale(&mut self, ratio: f64) {
        self.lower *= ratio;
        self.upper *= ratio;
    }

    #[inline]
    pub fn reset(&mut self) {
        self.lower = 0.0;
        self.upper = 0.0;
    }

    /// Net impulse along the limited coordinate.
    #[inline]
    pub fn axial(&self) -> f64 {
        self.lower - self.upper
    }

    /// Solve both bound rows. `value` is the limited coordinate at the start of the step
    /// and `jac` the Jacobian of that coordinate.
    #[allow(clippy::too_many_arguments)]
    pub fn solve_velocity(
        &mut self,
        limit: &JointLimit,
        value: f64,
        jac: &Jacobian,
        mass: f64,
        params: &JointParams,
        inv_dt: f64,
        bodies: &JointBodies,
        v: &mut [Velocity; 2],
    ) {
        // positive distance to a bound is a speculative allowance,
        // negative is corrected here only with Baumgarte
        let bias = |c: f64| {
            if c > 0.0 {
                c * inv_dt
            } else if params.correction.uses_velocity_bias() {
                params.bias_factor * c * inv_dt
            } else {
                0.0
            }
        };

        // lower bound
        {
            let c = value - limit.lower;
            let cdot = jac.dot(v);
            let impulse = -mass * (cdot + bias(c));
            let new_impulse = (self.lower + impulse).max(0.0);
            let impulse = new_impulse - self.lower;
            self.lower = new_impulse;
            jac.apply(v, bodies, impulse);
        }
        // upper bound, with the jacobian flipped
        {
            let c = limit.upper - value;
            let cdot = -jac.dot(v);
            let impulse = -mass * (cdot + bias(c));
            let new_impulse = (self.upper + impulse).max(0.0);
            let impulse = new_impulse - self.upper;
            self.upper = new_impulse;
            jac.apply(v, bodies, -impulse);
        }
    }
}

/// Apply the correction for a limited coordinate in the position pass,
/// returning the corrected error.
pub(crate) fn solve_limit_position(
    limit: &JointLimit,
    value: f64,
    jac: &Jacobian,
    inv_k: f64,
    slop: f64,
    max_correction: f64,
    bodies: &JointBodies,
    pos: &mut [Position; 2],
) -> f64 {
    match limit.position_correction(value, slop, max_correction) {
        Some(c) if inv_k > 0.0 => {
            jac.apply_position(pos, bodies, -c / inv_k);
            c.abs()
        }
        _ => limit.violation(value),
    }
}

/// Push the rows of a violated limit into the pseudo-velocity rows.
pub(crate) fn push_limit_rows(limit: &JointLimit, value: f64, jac: Jacobian, rows: &mut PseudoRows) {
    if value < limit.lower {
        rows.push(jac, value - limit.lower, true);
    } else if value > limit.upper {
        rows.push(-jac, limit.upper - value, true);
    }
}

const MAX_PSEUDO_ROWS: usize = 3;

#[derive(Clone, Copy, Debug, Default)]
pub(crate) struct PseudoRow {
    jac: Jacobian,
    /// Constraint value; unilateral rows keep it non-negative.
    c: f64,
    unilateral: bool,
    mass: f64,
    bias: f64,
    impulse: f64,
}

/// Scalar rows of a joint solved in the pseudo-velocity pass.
///
/// Geometry is evaluated once after position integration,
/// and impulses always start from zero.
#[derive(Clone, Copy, Debug, Default)]
pub(crate) struct PseudoRows {
    rows: [PseudoRow; MAX_PSEUDO_ROWS],
    count: usize,
}

impl PseudoRows {
    #[inline]
    pub fn clear(&mut self) {
        self.count = 0;
    }

    pub fn push(&mut self, jac: Jacobian, c: f64, unilateral: bool) {
        assert!(self.count < MAX_PSEUDO_ROWS, "Too many pseudo-velocity rows");
        self.rows[self.count] = PseudoRow {
            jac,
            c,
            unilateral,
            ..Default::default()
        };
        self.count += 1;
    }

    /// Push the two rows of a point-to-point constraint with error `c`.
    pub fn push_point(&mut self, r: &[m::Vec2; 2], c: m::Vec2) {
        self.push(Jacobian::along(m::Vec2::unit_x(), r), c.x, false);
        self.push(Jacobian::along(m::Vec2::unit_y(), r), c.y, false);
    }

    fn prepare(&mut self, bodies: &JointBodies, bias_factor: f64, inv_dt: f64) {
        for row in &mut self.rows[..self.count] {
            let k = row.jac.inv_effective_mass(bodies);
            row.mass = effective_mass(k);
            row.bias = -bias_factor * inv_dt * row.c;
            row.impulse = 0.0;
        }
    }

    fn solve(&mut self, bodies: &JointBodies, v: &mut [Velocity; 2]) {
        for row in &mut self.rows[..self.count] {
            let mut impulse = row.mass * (row.bias - row.jac.dot(v));
            if row.unilateral {
                let new_impulse = (row.impulse + impulse).max(0.0);
                impulse = new_impulse - row.impulse;
                row.impulse = new_impulse;
            } else {
                row.impulse += impulse;
            }
            row.jac.apply(v, bodies, impulse);
        }
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.count
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::physics::Body;

    fn two_bodies() -> (BodySet, BodyKey, BodyKey) {
        let mut set = BodySet::new();
        let a = set.insert(Body::new_dynamic(1.0, 1.0));
        let b = set.insert(Body::new_dynamic(2.0, 0.5).with_position(m::Vec2::new(2.0, 0.0)));
        set.get_mut(a).unwrap().island_index = 0;
        set.get_mut(b).unwrap().island_index = 1;
        (set, a, b)
    }

    #[test]
    fn limit_correction() {
        let limit = JointLimit::new(-1.0, 1.0);
        assert_eq!(limit.position_correction(0.0, 0.01, 0.1), None);
        let low = limit.position_correction(-1.05, 0.01, 0.1).unwrap();
        assert!((low + 0.04).abs() < 1e-12);
        let high = limit.position_correction(3.0, 0.01, 0.1).unwrap();
        assert_eq!(high, 0.1);
        assert!((limit.violation(1.5) - 0.5).abs() < 1e-12);
        assert_eq!(limit.violation(0.5), 0.0);
    }

    #[test]
    fn jacobian_matches_point_velocity() {
        let r = [m::Vec2::new(0.3, -0.2), m::Vec2::new(-1.0, 0.5)];
        let v = [
            Velocity {
                linear: m::Vec2::new(1.0, 2.0),
                angular: 0.5,
            },
            Velocity {
                linear: m::Vec2::new(-1.0, 0.0),
                angular: -2.0,
            },
        ];
        let u = m::Vec2::new(0.6, 0.8);
        let rel = v[1].point_velocity(r[1]) - v[0].point_velocity(r[0]);
        assert!((Jacobian::along(u, &r).dot(&v) - rel.dot(u)).abs() < 1e-12);
    }

    #[test]
    fn point_impulse_conserves_momentum() {
        let (set, a, b) = two_bodies();
        let joint = JointBuilder::new(a).with_target(b).build_revolute();
        let bodies = JointBodies::bind(joint.bodies, &set);
        let mut v = [Velocity::default(); 2];
        bodies.apply_point_impulse(
            &mut v,
            &[m::Vec2::new(1.0, 0.0), m::Vec2::new(-1.0, 0.0)],
            m::Vec2::new(0.0, 3.0),
        );
        let momentum = v[0].linear * 1.0 + v[1].linear * 2.0;
        assert!(momentum.mag() < 1e-12);
    }

    #[test]
    fn world_anchored_bodies() {
        let (set, a, _) = two_bodies();
        let joint = JointBuilder::new(a).build_revolute();
        let bodies = JointBodies::bind(joint.bodies, &set);
        assert_eq!(bodies.index, [Some(0), None]);
        assert_eq!(bodies.inv_mass[1], 0.0);
        assert!(!bodies.is_immovable());

        let mut set = BodySet::new();
        let s = set.insert(Body::new_static());
        let joint = JointBuilder::new(s).build_revolute();
        assert!(JointBodies::bind(joint.bodies, &set).is_immovable());
    }

    #[test]
    fn world_anchor_builder() {
        let (set, a, b) = two_bodies();
        let joint = JointBuilder::new(a)
            .with_target(b)
            .with_world_anchor(m::Vec2::new(1.0, 0.0), &set)
            .unwrap()
            .build_revolute();
        match joint.kind {
            JointKind::Revolute(rev) => {
                assert!((rev.local_anchors[0] - m::Vec2::new(1.0, 0.0)).mag() < 1e-12);
                assert!((rev.local_anchors[1] - m::Vec2::new(-1.0, 0.0)).mag() < 1e-12);
            }
            _ => panic!("Wrong joint type"),
        }

        let mut other = BodySet::new();
        let missing = other.insert(Body::new_static());
        other.remove(missing);
        let err = JointBuilder::new(missing).with_world_anchor(m::Vec2::zero(), &other);
        assert!(matches!(err, Err(PhysicsError::BodyNotFound(_))));
    }

    #[test]
    fn limit_pseudo_rows() {
        let mut rows = PseudoRows::default();
        let limit = JointLimit::new(0.0, 1.0);
        push_limit_rows(&limit, 0.5, Jacobian::angular(), &mut rows);
        assert_eq!(rows.len(), 0);
        push_limit_rows(&limit, 1.5, Jacobian::angular(), &mut rows);
        assert_eq!(rows.len(), 1);
        assert!((rows.rows[0].c + 0.5).abs() < 1e-12);
        assert_eq!(rows.rows[0].jac.ang_b, -1.0);
    }
}

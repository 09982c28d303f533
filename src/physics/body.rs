use super::Velocity;
use crate::math as m;

use thunderdome as td;

/// Key type to look up a body stored in the physics world.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct BodyKey(pub(crate) td::Index);

impl BodyKey {
    /// Get the underlying [`thunderdome::Index`][thunderdome::Index] of this key.
    /// Useful for creating your own mappings from bodies to other things.
    #[inline]
    pub fn index(&self) -> td::Index {
        self.0
    }
}

/// The type of a body determines how it is treated in physics updates.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BodyType {
    /// Does not respond to forces and cannot move.
    Static,
    /// Moves with its velocity but does not respond to forces or impulses.
    Kinematic,
    /// The default type of body; responds to forces and impulses.
    Dynamic,
}

/// Mass or moment of inertia of a body, which can be infinite.
///
/// This stores both a mass value and its inverse, because calculating inverse mass
/// is expensive and needed a lot in physics calculations.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Mass {
    Finite { mass: f64, inverse: f64 },
    Infinite,
}

impl From<f64> for Mass {
    #[inline]
    fn from(mass: f64) -> Self {
        if mass > 0.0 {
            Mass::Finite {
                mass,
                inverse: 1.0 / mass,
            }
        } else {
            Mass::Infinite
        }
    }
}

impl Mass {
    /// Get the inverse of the mass, which is zero if the mass is infinite.
    #[inline]
    pub fn inv(&self) -> f64 {
        match self {
            Mass::Finite { inverse, .. } => *inverse,
            Mass::Infinite => 0.0,
        }
    }

    /// Get the mass if it's finite.
    #[inline]
    pub fn value(&self) -> Option<f64> {
        match self {
            Mass::Finite { mass, .. } => Some(*mass),
            Mass::Infinite => None,
        }
    }
}

/// Pose of a body at the start of the current step,
/// used to roll bodies back and forth in time during continuous collision handling.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Sweep {
    /// Center at time `alpha0`.
    pub c0: m::Vec2,
    /// Angle at time `alpha0`.
    pub a0: f64,
    /// Fraction of the current step that `c0` and `a0` correspond to.
    pub alpha0: f64,
}

impl Sweep {
    /// Interpolate the pose at fraction `beta` of the step
    /// given the pose at the end of the step.
    pub fn pose_at(&self, c: m::Vec2, a: f64, beta: f64) -> (m::Vec2, f64) {
        let t = (beta - self.alpha0) / (1.0 - self.alpha0);
        (self.c0 + (c - self.c0) * t, self.a0 + (a - self.a0) * t)
    }
}

/// A rigid body in the physics world.
///
/// The position of a body is the position of its center of mass.
#[derive(Clone, Copy, Debug)]
pub struct Body {
    pub body_type: BodyType,
    pub position: m::Vec2,
    pub angle: f64,
    pub velocity: Velocity,
    /// Force accumulated for the next step. Cleared after every step.
    pub force: m::Vec2,
    /// Torque accumulated for the next step. Cleared after every step.
    pub torque: f64,
    pub(crate) mass: Mass,
    pub(crate) moment_of_inertia: Mass,
    pub gravity_scale: f64,
    pub linear_damping: f64,
    pub angular_damping: f64,
    pub sleeping_allowed: bool,
    pub(crate) awake: bool,
    pub(crate) sleep_time: f64,
    pub(crate) sweep: Sweep,
    // set while building islands so that bodies are only visited once
    pub(crate) island_flag: bool,
    // index in the island's working buffers, valid only during a solve
    pub(crate) island_index: usize,
}

impl Body {
    fn new(body_type: BodyType, mass: Mass, moment_of_inertia: Mass) -> Self {
        Self {
            body_type,
            position: m::Vec2::zero(),
            angle: 0.0,
            velocity: Velocity::default(),
            force: m::Vec2::zero(),
            torque: 0.0,
            mass,
            moment_of_inertia,
            gravity_scale: 1.0,
            linear_damping: 0.0,
            angular_damping: 0.0,
            sleeping_allowed: true,
            awake: true,
            sleep_time: 0.0,
            sweep: Sweep {
                c0: m::Vec2::zero(),
                a0: 0.0,
                alpha0: 0.0,
            },
            island_flag: false,
            island_index: 0,
        }
    }

    /// Dynamic bodies respond to forces and impulses.
    /// A moment of inertia of zero or less makes the body unable to rotate.
    pub fn new_dynamic(mass: f64, moment_of_inertia: f64) -> Self {
        Self::new(
            BodyType::Dynamic,
            Mass::from(mass),
            Mass::from(moment_of_inertia),
        )
    }

    /// A dynamic body shaped like a solid disc, with moment of inertia computed from the radius.
    pub fn new_disc(radius: f64, density: f64) -> Self {
        let mass = std::f64::consts::PI * radius * radius * density;
        Self::new_dynamic(mass, 0.5 * mass * radius * radius)
    }

    /// A dynamic body shaped like a solid rectangle,
    /// with moment of inertia computed from the dimensions.
    pub fn new_rect(width: f64, height: f64, density: f64) -> Self {
        let mass = width * height * density;
        Self::new_dynamic(mass, mass * (width * width + height * height) / 12.0)
    }

    /// A dynamic body that cannot rotate.
    pub fn new_particle(mass: f64) -> Self {
        Self::new(BodyType::Dynamic, Mass::from(mass), Mass::Infinite)
    }

    /// Kinematic bodies move with their velocity but are not affected by forces.
    pub fn new_kinematic() -> Self {
        Self::new(BodyType::Kinematic, Mass::Infinite, Mass::Infinite)
    }

    /// Static bodies do not move at all.
    pub fn new_static() -> Self {
        Self::new(BodyType::Static, Mass::Infinite, Mass::Infinite)
    }

    /// Set the position of the body in a builder-like chain.
    pub fn with_position(mut self, position: m::Vec2) -> Self {
        self.position = position;
        self.sweep.c0 = position;
        self
    }

    /// Set the angle of the body in a builder-like chain.
    pub fn with_angle(mut self, angle: m::Angle) -> Self {
        self.angle = angle.rad();
        self.sweep.a0 = self.angle;
        self
    }

    /// Set the velocity of the body in a builder-like chain.
    /// Has no effect on static bodies.
    pub fn with_velocity(mut self, vel: Velocity) -> Self {
        if self.body_type != BodyType::Static {
            self.velocity = vel;
        }
        self
    }

    /// Set linear and angular damping coefficients in a builder-like chain.
    pub fn with_damping(mut self, linear: f64, angular: f64) -> Self {
        self.linear_damping = linear;
        self.angular_damping = angular;
        self
    }

    /// Set the multiplier for gravity in a builder-like chain.
    pub fn with_gravity_scale(mut self, scale: f64) -> Self {
        self.gravity_scale = scale;
        self
    }

    /// Forbid this body from ever falling asleep in a builder-like chain.
    pub fn without_sleeping(mut self) -> Self {
        self.sleeping_allowed = false;
        self
    }

    #[inline]
    pub fn mass(&self) -> Mass {
        self.mass
    }

    #[inline]
    pub fn moment_of_inertia(&self) -> Mass {
        self.moment_of_inertia
    }

    /// Inverse mass, which is zero for static and kinematic bodies.
    #[inline]
    pub fn inv_mass(&self) -> f64 {
        match self.body_type {
            BodyType::Dynamic => self.mass.inv(),
            _ => 0.0,
        }
    }

    /// Inverse moment of inertia, which is zero for static and kinematic bodies.
    #[inline]
    pub fn inv_inertia(&self) -> f64 {
        match self.body_type {
            BodyType::Dynamic => self.moment_of_inertia.inv(),
            _ => 0.0,
        }
    }

    #[inline]
    pub fn pose(&self) -> m::Pose {
        m::pose(self.position, self.angle)
    }

    /// Transform a point from body-local coordinates to world coordinates.
    #[inline]
    pub fn world_point(&self, local: m::Vec2) -> m::Vec2 {
        self.pose().transform_vec(local)
    }

    /// Transform a point from world coordinates to body-local coordinates.
    #[inline]
    pub fn local_point(&self, world: m::Vec2) -> m::Vec2 {
        self.pose().inversed().transform_vec(world)
    }

    /// Apply a force at the center of mass, to be integrated during the next step.
    pub fn apply_force(&mut self, force: m::Vec2) {
        if self.body_type == BodyType::Dynamic {
            self.force += force;
            self.set_awake(true);
        }
    }

    /// Apply a torque, to be integrated during the next step.
    pub fn apply_torque(&mut self, torque: f64) {
        if self.body_type == BodyType::Dynamic {
            self.torque += torque;
            self.set_awake(true);
        }
    }

    /// Apply an impulse at a world point, immediately changing the velocity.
    pub fn apply_impulse(&mut self, impulse: m::Vec2, point: m::Vec2) {
        if self.body_type == BodyType::Dynamic {
            self.velocity.linear += impulse * self.inv_mass();
            self.velocity.angular += self.inv_inertia() * m::cross(point - self.position, impulse);
            self.set_awake(true);
        }
    }

    #[inline]
    pub fn is_awake(&self) -> bool {
        self.awake
    }

    /// Wake the body up or put it to sleep.
    /// A sleeping body has its velocity and accumulated forces cleared.
    pub fn set_awake(&mut self, awake: bool) {
        if self.body_type == BodyType::Static {
            return;
        }
        if awake {
            if !self.awake {
                self.awake = true;
                self.sleep_time = 0.0;
            }
        } else {
            self.awake = false;
            self.sleep_time = 0.0;
            self.velocity = Velocity::default();
            self.force = m::Vec2::zero();
            self.torque = 0.0;
        }
    }

    /// Time this body has spent below the sleep velocity tolerances.
    #[inline]
    pub fn sleep_time(&self) -> f64 {
        self.sleep_time
    }

    #[inline]
    pub fn sweep(&self) -> &Sweep {
        &self.sweep
    }

    /// Move the start of the sweep forward to fraction `alpha` of the step.
    pub(crate) fn advance_sweep(&mut self, alpha: f64) {
        debug_assert!(self.sweep.alpha0 < 1.0);
        let (c0, a0) = self.sweep.pose_at(self.position, self.angle, alpha);
        self.sweep.c0 = c0;
        self.sweep.a0 = a0;
        self.sweep.alpha0 = alpha;
    }

    /// Roll the body back to fraction `alpha` of the step, making that pose the current one.
    pub(crate) fn advance(&mut self, alpha: f64) {
        self.advance_sweep(alpha);
        self.position = self.sweep.c0;
        self.angle = self.sweep.a0;
    }
}

/// Storage for the bodies in a physics world.
#[derive(Clone, Debug, Default)]
pub struct BodySet {
    pub(crate) bodies: td::Arena<Body>,
}

impl BodySet {
    #[inline]
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Insert a body, returning a key that can be used to access it later.
    #[inline]
    pub fn insert(&mut self, body: Body) -> BodyKey {
        BodyKey(self.bodies.insert(body))
    }

    /// Access a body, if it still exists.
    #[inline]
    pub fn get(&self, key: BodyKey) -> Option<&Body> {
        self.bodies.get(key.0)
    }

    /// Mutably access a body, if it still exists.
    #[inline]
    pub fn get_mut(&mut self, key: BodyKey) -> Option<&mut Body> {
        self.bodies.get_mut(key.0)
    }

    #[inline]
    pub fn contains(&self, key: BodyKey) -> bool {
        self.bodies.contains(key.0)
    }

    /// Remove a body, returning it if it still existed.
    ///
    /// Joints and contacts attached to the body are disposed of at the start of the next step.
    #[inline]
    pub fn remove(&mut self, key: BodyKey) -> Option<Body> {
        self.bodies.remove(key.0)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.bodies.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.bodies.is_empty()
    }

    pub fn iter(&self) -> impl '_ + Iterator<Item = (BodyKey, &Body)> {
        self.bodies.iter().map(|(idx, b)| (BodyKey(idx), b))
    }

    pub fn iter_mut(&mut self) -> impl '_ + Iterator<Item = (BodyKey, &mut Body)> {
        self.bodies.iter_mut().map(|(idx, b)| (BodyKey(idx), b))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn immovable_bodies_have_zero_inverse_mass() {
        for body in [Body::new_static(), Body::new_kinematic()] {
            assert_eq!(body.inv_mass(), 0.0);
            assert_eq!(body.inv_inertia(), 0.0);
        }
        let particle = Body::new_particle(2.0);
        assert_eq!(particle.inv_mass(), 0.5);
        assert_eq!(particle.inv_inertia(), 0.0);
        let disc = Body::new_disc(1.0, 1.0);
        assert!((disc.mass().value().unwrap() - std::f64::consts::PI).abs() < 1e-12);
    }

    #[test]
    fn impulses_only_move_dynamic_bodies() {
        let mut kinematic = Body::new_kinematic();
        kinematic.apply_impulse(m::Vec2::new(1.0, 0.0), m::Vec2::zero());
        assert_eq!(kinematic.velocity.linear, m::Vec2::zero());

        let mut dynamic = Body::new_dynamic(2.0, 1.0);
        dynamic.apply_impulse(m::Vec2::new(0.0, 1.0), m::Vec2::new(1.0, 0.0));
        assert!((dynamic.velocity.linear.y - 0.5).abs() < 1e-12);
        assert!((dynamic.velocity.angular - 1.0).abs() < 1e-12);
    }

    #[test]
    fn sleeping_clears_motion() {
        let mut body = Body::new_dynamic(1.0, 1.0).with_velocity(Velocity {
            linear: m::Vec2::new(1.0, 1.0),
            angular: 1.0,
        });
        body.apply_force(m::Vec2::new(3.0, 0.0));
        body.set_awake(false);
        assert!(!body.is_awake());
        assert_eq!(body.velocity.linear, m::Vec2::zero());
        assert_eq!(body.force, m::Vec2::zero());

        let mut stat = Body::new_static();
        stat.set_awake(false);
        assert!(stat.is_awake());
    }

    #[test]
    fn sweep_interpolation() {
        let mut body = Body::new_dynamic(1.0, 1.0);
        body.position = m::Vec2::new(2.0, 0.0);
        body.angle = 1.0;
        body.advance(0.5);
        assert!((body.position - m::Vec2::new(1.0, 0.0)).mag() < 1e-12);
        assert!((body.angle - 0.5).abs() < 1e-12);
        assert_eq!(body.sweep().alpha0, 0.5);
    }

    #[test]
    fn set_keys() {
        let mut set = BodySet::new();
        let a = set.insert(Body::new_static());
        let b = set.insert(Body::new_disc(1.0, 1.0));
        assert_eq!(set.len(), 2);
        assert!(set.remove(a).is_some());
        assert!(!set.contains(a));
        assert!(set.get(b).is_some());
        assert!(set.get_mut(a).is_none());
    }
}

//! Contacts between pairs of bodies, as produced by an external collision detection stage.
//!
//! Contact geometry is stored in body-local coordinates ([`Manifold`][self::Manifold])
//! so that the solver can re-evaluate it from current body poses during position correction.

use super::{BodyKey, PositionCorrection};
use crate::math as m;

use thunderdome as td;

/// Maximum number of points in a single contact manifold.
pub const MAX_MANIFOLD_POINTS: usize = 2;

/// Key type to look up a contact stored in the physics world.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ContactKey(pub(crate) td::Index);

impl ContactKey {
    /// Get the underlying [`thunderdome::Index`][thunderdome::Index] of this key.
    #[inline]
    pub fn index(&self) -> td::Index {
        self.0
    }
}

/// Identifies the pair of shape features (vertices, edges) that produced a contact point.
///
/// Points with the same id in consecutive frames are considered the same point,
/// which allows their impulses to be reused for warm starting.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct ContactId(pub u32);

/// Determines how to interpret the local points and normal of a [`Manifold`][self::Manifold].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ManifoldType {
    /// Two circles. `local_point` is the center of circle A,
    /// the single point's `local_point` is the center of circle B.
    Circles,
    /// A face of body A against points of body B.
    /// `local_normal` and `local_point` describe the face in A's coordinates,
    /// point positions are in B's coordinates.
    FaceA,
    /// A face of body B against points of body A, mirroring `FaceA`.
    FaceB,
}

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct ManifoldPoint {
    /// Position of the point in the local coordinates of the body
    /// not owning the reference face (see [`ManifoldType`][self::ManifoldType]).
    pub local_point: m::Vec2,
    /// Accumulated normal impulse, carried over between frames.
    pub normal_impulse: f64,
    /// Accumulated friction impulse, carried over between frames.
    pub tangent_impulse: f64,
    pub id: ContactId,
}

impl ManifoldPoint {
    /// A new point with no accumulated impulse.
    pub fn new(local_point: m::Vec2, id: ContactId) -> Self {
        Self {
            local_point,
            normal_impulse: 0.0,
            tangent_impulse: 0.0,
            id,
        }
    }
}

/// Contact geometry between two bodies in body-local form.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Manifold {
    pub kind: ManifoldType,
    pub local_normal: m::Vec2,
    pub local_point: m::Vec2,
    points: [ManifoldPoint; MAX_MANIFOLD_POINTS],
    point_count: usize,
}

impl Default for Manifold {
    fn default() -> Self {
        Self::empty()
    }
}

impl Manifold {
    /// A manifold with no points, meaning the bodies aren't touching.
    pub fn empty() -> Self {
        Self {
            kind: ManifoldType::Circles,
            local_normal: m::Vec2::zero(),
            local_point: m::Vec2::zero(),
            points: [ManifoldPoint::default(); MAX_MANIFOLD_POINTS],
            point_count: 0,
        }
    }

    /// A manifold between two circles.
    pub fn circles(center_a: m::Vec2, center_b: m::Vec2) -> Self {
        let mut ret = Self::empty();
        ret.local_point = center_a;
        ret.points[0] = ManifoldPoint::new(center_b, ContactId(0));
        ret.point_count = 1;
        ret
    }

    /// A manifold between a reference face and up to two points on the other body.
    ///
    /// Panics if more than [`MAX_MANIFOLD_POINTS`][self::MAX_MANIFOLD_POINTS] points are given
    /// or if `kind` is `Circles`.
    pub fn face(
        kind: ManifoldType,
        local_normal: m::Unit<m::Vec2>,
        local_point: m::Vec2,
        points: &[ManifoldPoint],
    ) -> Self {
        assert!(kind != ManifoldType::Circles, "Face manifold with circle type");
        assert!(
            points.len() <= MAX_MANIFOLD_POINTS,
            "Too many points in a manifold"
        );
        let mut ret = Self::empty();
        ret.kind = kind;
        ret.local_normal = *local_normal;
        ret.local_point = local_point;
        ret.points[..points.len()].copy_from_slice(points);
        ret.point_count = points.len();
        ret
    }

    #[inline]
    pub fn points(&self) -> &[ManifoldPoint] {
        &self.points[..self.point_count]
    }

    #[inline]
    pub fn points_mut(&mut self) -> &mut [ManifoldPoint] {
        &mut self.points[..self.point_count]
    }

    #[inline]
    pub fn point_count(&self) -> usize {
        self.point_count
    }
}

/// Contact geometry evaluated in world space for a specific pair of body poses.
#[derive(Clone, Copy, Debug)]
pub struct WorldManifold {
    /// Normal pointing from body A to body B.
    pub normal: m::Vec2,
    /// Points midway between the two surfaces.
    pub points: [m::Vec2; MAX_MANIFOLD_POINTS],
    /// Negative when the bodies overlap.
    pub separations: [f64; MAX_MANIFOLD_POINTS],
}

impl WorldManifold {
    pub fn new(
        manifold: &Manifold,
        xf_a: &m::Pose,
        radius_a: f64,
        xf_b: &m::Pose,
        radius_b: f64,
    ) -> Self {
        let mut ret = WorldManifold {
            normal: m::Vec2::zero(),
            points: [m::Vec2::zero(); MAX_MANIFOLD_POINTS],
            separations: [0.0; MAX_MANIFOLD_POINTS],
        };
        if manifold.point_count == 0 {
            return ret;
        }

        match manifold.kind {
            ManifoldType::Circles => {
                ret.normal = m::Vec2::unit_x();
                let point_a = xf_a.transform_vec(manifold.local_point);
                let point_b = xf_b.transform_vec(manifold.points[0].local_point);
                let dist = point_b - point_a;
                if dist.mag_sq() > f64::EPSILON * f64::EPSILON {
                    ret.normal = dist.normalized();
                }
                let c_a = point_a + ret.normal * radius_a;
                let c_b = point_b - ret.normal * radius_b;
                ret.points[0] = (c_a + c_b) * 0.5;
                ret.separations[0] = (c_b - c_a).dot(ret.normal);
            }
            ManifoldType::FaceA => {
                ret.normal = xf_a.rotation * manifold.local_normal;
                let plane_point = xf_a.transform_vec(manifold.local_point);
                for (i, mp) in manifold.points().iter().enumerate() {
                    let clip_point = xf_b.transform_vec(mp.local_point);
                    let c_a = clip_point
                        + ret.normal * (radius_a - (clip_point - plane_point).dot(ret.normal));
                    let c_b = clip_point - ret.normal * radius_b;
                    ret.points[i] = (c_a + c_b) * 0.5;
                    ret.separations[i] = (c_b - c_a).dot(ret.normal);
                }
            }
            ManifoldType::FaceB => {
                ret.normal = xf_b.rotation * manifold.local_normal;
                let plane_point = xf_b.transform_vec(manifold.local_point);
                for (i, mp) in manifold.points().iter().enumerate() {
                    let clip_point = xf_a.transform_vec(mp.local_point);
                    let c_b = clip_point
                        + ret.normal * (radius_b - (clip_point - plane_point).dot(ret.normal));
                    let c_a = clip_point - ret.normal * radius_a;
                    ret.points[i] = (c_a + c_b) * 0.5;
                    ret.separations[i] = (c_a - c_b).dot(ret.normal);
                }
                // ensure normal points from A to B
                ret.normal = -ret.normal;
            }
        }
        ret
    }
}

/// Determines how the surface of a collider responds to contacts.
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "serde-types", derive(serde::Serialize, serde::Deserialize))]
pub struct Material {
    pub friction: f64,
    pub restitution: f64,
}

impl Default for Material {
    fn default() -> Self {
        Material {
            friction: 0.2,
            restitution: 0.0,
        }
    }
}

impl Material {
    /// Friction coefficient between this material and another,
    /// computed as the geometric mean so that a frictionless surface stays frictionless.
    pub fn friction_with(&self, other: &Self) -> f64 {
        (self.friction * other.friction).sqrt()
    }

    /// Restitution coefficient between this material and another,
    /// computed as the maximum so that a bouncy object bounces off anything.
    pub fn restitution_with(&self, other: &Self) -> f64 {
        self.restitution.max(other.restitution)
    }
}

/// The part of a collider the contact solver needs to know about.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Fixture {
    /// Identifier of the collider in the collision system, passed back in callbacks.
    pub id: u64,
    /// Skin radius of the shape (the radius of a circle, the rounding of a polygon).
    pub radius: f64,
    pub material: Material,
}

/// Final impulses of a contact after a step, delivered to listeners.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct ContactImpulse {
    pub normal_impulses: [f64; MAX_MANIFOLD_POINTS],
    pub tangent_impulses: [f64; MAX_MANIFOLD_POINTS],
    pub count: usize,
}

/// A potential contact between two bodies.
///
/// Contacts are created and updated by collision detection,
/// which also keeps their manifolds up to date with [`Contact::update_manifold`].
#[derive(Clone, Copy, Debug)]
pub struct Contact {
    pub(crate) bodies: [BodyKey; 2],
    pub fixtures: [Fixture; 2],
    pub(crate) manifold: Manifold,
    pub friction: f64,
    pub restitution: f64,
    /// Disabled contacts are ignored by the solver.
    pub enabled: bool,
    /// Sensor contacts produce callbacks but no collision response.
    pub sensor: bool,
    /// Position correction strategy for this contact.
    /// If `None`, the world's [`SolverConfig::contact_correction`][super::SolverConfig] is used.
    pub correction: Option<PositionCorrection>,
    pub(crate) island_flag: bool,
    pub(crate) toi_count: u32,
}

impl Contact {
    pub fn new(
        body_a: BodyKey,
        fixture_a: Fixture,
        body_b: BodyKey,
        fixture_b: Fixture,
        manifold: Manifold,
    ) -> Self {
        Self {
            bodies: [body_a, body_b],
            fixtures: [fixture_a, fixture_b],
            manifold,
            friction: fixture_a.material.friction_with(&fixture_b.material),
            restitution: fixture_a.material.restitution_with(&fixture_b.material),
            enabled: true,
            sensor: false,
            correction: None,
            island_flag: false,
            toi_count: 0,
        }
    }

    /// Set the position correction strategy in a builder-like chain.
    pub fn with_correction(mut self, correction: PositionCorrection) -> Self {
        self.correction = Some(correction);
        self
    }

    #[inline]
    pub fn bodies(&self) -> [BodyKey; 2] {
        self.bodies
    }

    #[inline]
    pub fn manifold(&self) -> &Manifold {
        &self.manifold
    }

    /// Check whether the bodies have contact points.
    #[inline]
    pub fn is_touching(&self) -> bool {
        self.manifold.point_count > 0
    }

    /// Whether the solver should generate a response for this contact.
    #[inline]
    pub fn is_solid(&self) -> bool {
        self.enabled && !self.sensor && self.is_touching()
    }

    /// Replace the manifold with a freshly computed one.
    ///
    /// Points whose id matches a point of the old manifold keep that point's accumulated
    /// impulses for warm starting; all other points start from zero.
    pub fn update_manifold(&mut self, mut new_manifold: Manifold) {
        let old = self.manifold;
        for new_point in new_manifold.points_mut() {
            match old.points().iter().find(|p| p.id == new_point.id) {
                Some(old_point) => {
                    new_point.normal_impulse = old_point.normal_impulse;
                    new_point.tangent_impulse = old_point.tangent_impulse;
                }
                None => {
                    new_point.normal_impulse = 0.0;
                    new_point.tangent_impulse = 0.0;
                }
            }
        }
        self.manifold = new_manifold;
    }

    /// Get the contact geometry in world space given current body transforms.
    pub fn world_manifold(&self, xf_a: &m::Pose, xf_b: &m::Pose) -> WorldManifold {
        WorldManifold::new(
            &self.manifold,
            xf_a,
            self.fixtures[0].radius,
            xf_b,
            self.fixtures[1].radius,
        )
    }

    /// Current accumulated impulses of the manifold points.
    pub fn impulse(&self) -> ContactImpulse {
        let mut ret = ContactImpulse {
            count: self.manifold.point_count,
            ..Default::default()
        };
        for (i, p) in self.manifold.points().iter().enumerate() {
            ret.normal_impulses[i] = p.normal_impulse;
            ret.tangent_impulses[i] = p.tangent_impulse;
        }
        ret
    }
}

/// Storage for the contacts in a physics world.
#[derive(Clone, Debug, Default)]
pub struct ContactSet {
    pub(crate) contacts: td::Arena<Contact>,
}

impl ContactSet {
    #[inline]
    pub(crate) fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub(crate) fn insert(&mut self, contact: Contact) -> ContactKey {
        ContactKey(self.contacts.insert(contact))
    }

    /// Access a contact, if it still exists.
    #[inline]
    pub fn get(&self, key: ContactKey) -> Option<&Contact> {
        self.contacts.get(key.0)
    }

    /// Mutably access a contact, if it still exists.
    #[inline]
    pub fn get_mut(&mut self, key: ContactKey) -> Option<&mut Contact> {
        self.contacts.get_mut(key.0)
    }

    #[inline]
    pub fn remove(&mut self, key: ContactKey) -> Option<Contact> {
        self.contacts.remove(key.0)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.contacts.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.contacts.is_empty()
    }

    pub fn iter(&self) -> impl '_ + Iterator<Item = (ContactKey, &Contact)> {
        self.contacts.iter().map(|(idx, c)| (ContactKey(idx), c))
    }
}

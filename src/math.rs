//! Types, aliases and helper operations for doing math with `ultraviolet`.
use std::f64::consts::{PI, TAU};
pub use ultraviolet as uv;

/// A Pose has a rotation and a translation, no scaling.
///
/// Bodies store their angle as a plain scalar, and poses are built from it
/// whenever points need to move between body-local and world space.
pub type Pose = uv::DIsometry2;
pub type Vec2 = uv::DVec2;
pub type Vec3 = uv::DVec3;
pub type Rotor2 = uv::DRotor2;
pub type Mat2 = uv::DMat2;
pub type Mat3 = uv::DMat3;

/// An angle in either degrees or radians.
/// Default conversion from f64 is in degrees.
#[derive(Clone, Copy, Debug)]
#[cfg_attr(feature = "serde-types", derive(serde::Deserialize, serde::Serialize))]
pub enum Angle {
    Rad(f64),
    Deg(f64),
}
impl Angle {
    /// Get the angle as degrees.
    #[inline]
    pub fn deg(&self) -> f64 {
        match self {
            Angle::Rad(rad) => rad * 180.0 / PI,
            Angle::Deg(deg) => *deg,
        }
    }

    /// Get the angle as radians.
    #[inline]
    pub fn rad(&self) -> f64 {
        match self {
            Angle::Rad(rad) => *rad,
            Angle::Deg(deg) => deg * PI / 180.0,
        }
    }
}
impl Default for Angle {
    fn default() -> Self {
        Angle::Rad(0.0)
    }
}
impl From<Angle> for Rotor2 {
    #[inline]
    fn from(ang: Angle) -> Rotor2 {
        Rotor2::from_angle(ang.rad())
    }
}
impl From<Rotor2> for Angle {
    #[inline]
    fn from(rotor: Rotor2) -> Self {
        Angle::Rad(-rotor.bv.xy.atan2(rotor.s) * 2.0)
    }
}

/// A wrapper type to indicate a vector should always be normalized.
#[derive(Clone, Copy, Debug)]
pub struct Unit<T>(T);

impl Unit<Vec2> {
    pub fn new_normalize(v: Vec2) -> Self {
        Unit(v.normalized())
    }

    pub const fn new_unchecked(v: Vec2) -> Self {
        Unit(v)
    }

    pub fn unit_x() -> Self {
        Unit(Vec2::unit_x())
    }

    pub fn unit_y() -> Self {
        Unit(Vec2::unit_y())
    }
}

impl std::ops::Mul<Unit<Vec2>> for Rotor2 {
    type Output = Unit<Vec2>;

    fn mul(self, rhs: Unit<Vec2>) -> Self::Output {
        Unit(self * rhs.0)
    }
}

impl<T> std::ops::Deref for Unit<T> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl<T> std::ops::Neg for Unit<T>
where
    T: std::ops::Neg,
{
    type Output = Unit<<T as std::ops::Neg>::Output>;

    fn neg(self) -> Self::Output {
        Unit(-self.0)
    }
}

/// Create a [`Pose`][self::Pose] from a position and an angle in radians.
#[inline]
pub fn pose(position: Vec2, angle: f64) -> Pose {
    Pose::new(position, Rotor2::from_angle(angle))
}

/// Rotate a vector by an angle in radians.
#[inline]
pub fn rotate(angle: f64, v: Vec2) -> Vec2 {
    Rotor2::from_angle(angle) * v
}

// Vec2 utils

#[inline]
pub fn left_normal(v: Vec2) -> Vec2 {
    Vec2::new(-v.y, v.x)
}
#[inline]
pub fn right_normal(v: Vec2) -> Vec2 {
    Vec2::new(v.y, -v.x)
}

/// 2D cross product of two vectors, i.e. the `xy` component of their wedge product.
#[inline]
pub fn cross(a: Vec2, b: Vec2) -> f64 {
    a.wedge(b).xy
}

/// Cross product of a scalar (angular velocity) and a vector (lever arm).
#[inline]
pub fn cross_sv(s: f64, v: Vec2) -> Vec2 {
    left_normal(v) * s
}

// angle utils

/// Wrap an angle into the open range (-2π, 2π), keeping its sign.
#[inline]
pub fn wrap_angle(angle: f64) -> f64 {
    angle % TAU
}

/// Normalize an angle difference into the range [-π, π).
#[inline]
pub fn normalize_angle(angle: f64) -> f64 {
    (angle + PI).rem_euclid(TAU) - PI
}

// effective mass matrices

/// Invert a 2x2 effective mass matrix.
///
/// Panics if the matrix is singular, which means the constraint using it
/// was set up with degenerate geometry.
#[inline]
pub fn inverse2(k: Mat2) -> Mat2 {
    assert!(k.determinant() != 0.0, "Singular effective mass matrix");
    k.inversed()
}

/// Invert a 3x3 effective mass matrix. Panics if the matrix is singular.
#[inline]
pub fn inverse3(k: Mat3) -> Mat3 {
    assert!(k.determinant() != 0.0, "Singular effective mass matrix");
    k.inversed()
}

/// The upper-left 2x2 block of a 3x3 matrix.
#[inline]
pub fn upper_left(k: &Mat3) -> Mat2 {
    Mat2::new(k.cols[0].xy(), k.cols[1].xy())
}

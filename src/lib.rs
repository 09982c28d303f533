//! A deterministic 2D rigid body constraint solver
//! using sequential impulses with selectable position correction.

/// Open a profiling span that closes when the returned value is dropped.
/// Does nothing unless the `tracy` feature is enabled and a profiler client is running.
macro_rules! tracy_span {
    ($name:literal, $fn_name:literal) => {
        tracy_client::Client::running()
            .map(|client| client.span_alloc(Some($name), $fn_name, file!(), line!(), 0))
    };
}

pub mod math;
pub use math::{uv, Angle, Pose, Rotor2, Unit, Vec2};

pub mod physics;
pub use physics::{
    body::{Body, BodyKey, BodyType, Mass},
    contact::{Contact, ContactKey, Fixture, Manifold, ManifoldPoint, Material},
    event::{EventLog, SolverEvent, SolverListener},
    forcefield,
    joint::{Joint, JointBuilder, JointKey, JointKind},
    Physics, PhysicsError, PositionCorrection, SolverConfig, StepReport, ToiEvent, Velocity,
};

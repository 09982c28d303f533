//! Hooks through which the solver reports what happened during a step.

use super::{
    contact::{Contact, ContactImpulse, ContactKey, Fixture},
    joint::{Joint, JointError, JointKey},
    BodyKey,
};

/// Receiver of notifications from the solver.
///
/// Every method has an empty default implementation,
/// so implementors only need to override the ones they care about.
/// All of them are called synchronously in the middle of a step,
/// after the affected island has been copied back to the persistent bodies.
pub trait SolverListener {
    /// Called once per solid contact per step with the final accumulated impulses,
    /// for reacting to a specific pair of fixtures colliding.
    fn after_collision(
        &mut self,
        _fixture_a: &Fixture,
        _fixture_b: &Fixture,
        _contact: ContactKey,
        _impulse: &ContactImpulse,
    ) {
    }

    /// Called once per solid contact per step, after `after_collision`.
    fn post_solve(&mut self, _key: ContactKey, _contact: &Contact, _impulse: &ContactImpulse) {}

    /// Called when a joint's error exceeds its breakpoint and it gets disabled.
    fn joint_broke(&mut self, _key: JointKey, _joint: &Joint) {}

    /// Called when a joint is removed because one of its bodies no longer exists.
    fn joint_removed(&mut self, _key: JointKey, _joint: &Joint) {}

    /// Called when a whole island falls asleep.
    fn island_slept(&mut self, _bodies: &[BodyKey]) {}
}

/// The unit type ignores all events.
impl SolverListener for () {}

/// A solver notification stored as plain data.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum SolverEvent {
    AfterCollision {
        contact: ContactKey,
        fixtures: [u64; 2],
        impulse: ContactImpulse,
    },
    PostSolve {
        contact: ContactKey,
        impulse: ContactImpulse,
    },
    JointBroke {
        joint: JointKey,
        error: JointError,
    },
    JointRemoved {
        joint: JointKey,
    },
    IslandSlept {
        body_count: usize,
    },
}

/// A listener that records every event it receives in order.
#[derive(Clone, Debug, Default)]
pub struct EventLog {
    pub events: Vec<SolverEvent>,
}

impl EventLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take all recorded events out of the log.
    pub fn drain(&mut self) -> impl '_ + Iterator<Item = SolverEvent> {
        self.events.drain(..)
    }
}

impl SolverListener for EventLog {
    fn after_collision(
        &mut self,
        fixture_a: &Fixture,
        fixture_b: &Fixture,
        contact: ContactKey,
        impulse: &ContactImpulse,
    ) {
        self.events.push(SolverEvent::AfterCollision {
            contact,
            fixtures: [fixture_a.id, fixture_b.id],
            impulse: *impulse,
        });
    }

    fn post_solve(&mut self, key: ContactKey, _contact: &Contact, impulse: &ContactImpulse) {
        self.events.push(SolverEvent::PostSolve {
            contact: key,
            impulse: *impulse,
        });
    }

    fn joint_broke(&mut self, key: JointKey, joint: &Joint) {
        self.events.push(SolverEvent::JointBroke {
            joint: key,
            error: joint.last_error(),
        });
    }

    fn joint_removed(&mut self, key: JointKey, _joint: &Joint) {
        self.events.push(SolverEvent::JointRemoved { joint: key });
    }

    fn island_slept(&mut self, bodies: &[BodyKey]) {
        self.events.push(SolverEvent::IslandSlept {
            body_count: bodies.len(),
        });
    }
}

use super::{
    effective_mass, push_limit_rows, Jacobian, JointBodies, JointError, JointLimit, JointMotor,
    JointParams, JointSolver, LimitImpulses, PseudoRows,
};
use crate::{
    math as m,
    physics::{Position, PositionCorrection, SolverData, Velocity},
};

/// A joint letting the second body slide along an axis fixed in the first body,
/// with no relative rotation.
///
/// The translation can be limited and driven with a motor.
#[derive(Clone, Copy, Debug)]
pub struct PrismaticJoint {
    pub local_anchors: [m::Vec2; 2],
    local_axis: m::Unit<m::Vec2>,
    pub reference_angle: f64,
    pub limit: Option<JointLimit>,
    pub motor: Option<JointMotor>,
    /// Perpendicular (`x`) and angular (`y`) impulse.
    impulse: m::Vec2,
    motor_impulse: f64,
    limit_impulses: LimitImpulses,
    axes: Axes,
    k: m::Mat2,
    axial_mass: f64,
    bias: m::Vec2,
}

/// Jacobian rows of the slide axis and its perpendicular at some configuration.
#[derive(Clone, Copy, Debug, Default)]
struct Axes {
    axial: Jacobian,
    perp: Jacobian,
    translation: f64,
    /// Perpendicular and angular error.
    error: m::Vec2,
}

impl PrismaticJoint {
    pub fn new(local_anchors: [m::Vec2; 2], local_axis: m::Vec2, reference_angle: f64) -> Self {
        Self {
            local_anchors,
            local_axis: m::Unit::new_normalize(local_axis),
            reference_angle,
            limit: None,
            motor: None,
            impulse: m::Vec2::zero(),
            motor_impulse: 0.0,
            limit_impulses: LimitImpulses::default(),
            axes: Axes::default(),
            k: m::Mat2::new(m::Vec2::zero(), m::Vec2::zero()),
            axial_mass: 0.0,
            bias: m::Vec2::zero(),
        }
    }

    pub fn with_limit(mut self, limit: JointLimit) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn with_motor(mut self, motor: JointMotor) -> Self {
        self.motor = Some(motor);
        self
    }

    #[inline]
    pub fn local_axis(&self) -> m::Vec2 {
        *self.local_axis
    }

    fn axes(&self, p: &[Position; 2]) -> Axes {
        let q_a = m::Rotor2::from_angle(p[0].a);
        let r = [
            q_a * self.local_anchors[0],
            m::rotate(p[1].a, self.local_anchors[1]),
        ];
        let d = p[1].c + r[1] - p[0].c - r[0];
        let axis = *(q_a * self.local_axis);
        let perp = m::left_normal(axis);

        // the lever arm on the first body reaches to the second anchor
        let arm_a = d + r[0];
        let row = |u: m::Vec2| Jacobian {
            lin_a: -u,
            ang_a: -m::cross(arm_a, u),
            lin_b: u,
            ang_b: m::cross(r[1], u),
        };
        Axes {
            axial: row(axis),
            perp: row(perp),
            translation: axis.dot(d),
            error: m::Vec2::new(
                perp.dot(d),
                m::normalize_angle(p[1].a - p[0].a - self.reference_angle),
            ),
        }
    }

    /// Effective inverse mass of the perpendicular and angular rows.
    fn matrix(axes: &Axes, bodies: &JointBodies) -> m::Mat2 {
        let [i_a, i_b] = bodies.inv_inertia;
        let perp = &axes.perp;
        let k11 = perp.inv_effective_mass(bodies);
        let k12 = -i_a * perp.ang_a + i_b * perp.ang_b;
        let mut k22 = i_a + i_b;
        if k22 == 0.0 {
            // bodies with fixed rotation
            k22 = 1.0;
        }
        m::Mat2::new(m::Vec2::new(k11, k12), m::Vec2::new(k12, k22))
    }

    fn apply_impulse(&self, v: &mut [Velocity; 2], bodies: &JointBodies, impulse: m::Vec2) {
        self.axes.perp.apply(v, bodies, impulse.x);
        bodies.apply_angular_impulse(v, impulse.y);
    }
}

impl JointSolver for PrismaticJoint {
    fn prepare(
        &mut self,
        params: &JointParams,
        bodies: &JointBodies,
        data: &SolverData,
    ) -> JointError {
        let p = bodies.read_positions(data.positions);
        self.axes = self.axes(&p);
        self.k = Self::matrix(&self.axes, bodies);
        let axial_k = self.axes.axial.inv_effective_mass(bodies);
        self.axial_mass = effective_mass(axial_k);

        self.bias = if params.correction.uses_velocity_bias() {
            self.axes.error * (-params.bias_factor * data.step.inv_dt)
        } else {
            m::Vec2::zero()
        };

        let limit_error = self
            .limit
            .map(|l| l.violation(self.axes.translation))
            .unwrap_or(0.0);
        JointError {
            linear: self.axes.error.x.abs().max(limit_error),
            angular: self.axes.error.y.abs(),
        }
    }

    fn warm_start(&mut self, bodies: &JointBodies, data: &mut SolverData) {
        let ratio = data.step.dt_ratio;
        self.impulse *= ratio;
        self.motor_impulse *= ratio;
        self.limit_impulses.scale(ratio);

        let mut v = bodies.read_velocities(data.velocities);
        self.apply_impulse(&mut v, bodies, self.impulse);
        self.axes.axial.apply(
            &mut v,
            bodies,
            self.motor_impulse + self.limit_impulses.axial(),
        );
        bodies.write_velocities(data.velocities, v);
    }

    fn reset_impulse(&mut self) {
        self.impulse = m::Vec2::zero();
        self.motor_impulse = 0.0;
        self.limit_impulses.reset();
    }

    fn solve_velocity(
        &mut self,
        params: &JointParams,
        bodies: &JointBodies,
        data: &mut SolverData,
    ) {
        let mut v = bodies.read_velocities(data.velocities);
        let axial = self.axes.axial;

        if let Some(motor) = self.motor {
            let cdot = axial.dot(&v);
            let impulse = self.axial_mass * (motor.speed - cdot);
            let old_impulse = self.motor_impulse;
            let max_impulse = motor.max_force * data.step.dt;
            self.motor_impulse = (old_impulse + impulse).clamp(-max_impulse, max_impulse);
            axial.apply(&mut v, bodies, self.motor_impulse - old_impulse);
        }

        if let Some(limit) = self.limit {
            self.limit_impulses.solve_velocity(
                &limit,
                self.axes.translation,
                &axial,
                self.axial_mass,
                params,
                data.step.inv_dt,
                bodies,
                &mut v,
            );
        }

        let cdot = m::Vec2::new(self.axes.perp.dot(&v), v[1].angular - v[0].angular);
        let mut soft_k = self.k;
        soft_k.cols[0].x += params.softness;
        soft_k.cols[1].y += params.softness;
        let impulse = m::inverse2(soft_k) * (self.bias - cdot - self.impulse * params.softness);
        self.impulse += impulse;
        self.apply_impulse(&mut v, bodies, impulse);

        bodies.write_velocities(data.velocities, v);
    }

    fn solve_position(
        &mut self,
        params: &JointParams,
        bodies: &JointBodies,
        data: &mut SolverData,
    ) -> JointError {
        let cfg = data.config;
        let mut p = bodies.read_positions(data.positions);
        let axes = self.axes(&p);
        let (k, axial_k) = match params.correction {
            PositionCorrection::ModifiedNgs => (self.k, self.axes.axial.inv_effective_mass(bodies)),
            _ => (Self::matrix(&axes, bodies), axes.axial.inv_effective_mass(bodies)),
        };

        let mut linear_error = axes.error.x.abs();
        let angular_error = axes.error.y.abs();

        let mut limit_c = None;
        if let Some(limit) = self.limit {
            let t = axes.translation;
            let slop = cfg.linear_slop;
            if (limit.upper - limit.lower).abs() < 2.0 * slop {
                limit_c = Some(t - limit.lower);
                linear_error = linear_error.max((t - limit.lower).abs());
            } else if t <= limit.lower {
                limit_c = Some((t - limit.lower).min(0.0));
                linear_error = linear_error.max(limit.lower - t);
            } else if t >= limit.upper {
                limit_c = Some((t - limit.upper).max(0.0));
                linear_error = linear_error.max(t - limit.upper);
            }
        }

        match limit_c {
            Some(c2) if axial_k > 0.0 => {
                // solve the perpendicular, angular and axial rows together
                let [i_a, i_b] = bodies.inv_inertia;
                let (perp, axial) = (&axes.perp, &axes.axial);
                let k13 = bodies.inv_mass[0] * perp.lin_a.dot(axial.lin_a)
                    + bodies.inv_mass[1] * perp.lin_b.dot(axial.lin_b)
                    + i_a * perp.ang_a * axial.ang_a
                    + i_b * perp.ang_b * axial.ang_b;
                let k23 = -i_a * axial.ang_a + i_b * axial.ang_b;
                let k3 = m::Mat3::new(
                    m::Vec3::new(k.cols[0].x, k.cols[0].y, k13),
                    m::Vec3::new(k.cols[1].x, k.cols[1].y, k23),
                    m::Vec3::new(k13, k23, axial_k),
                );
                let impulse = -(m::inverse3(k3) * m::Vec3::new(axes.error.x, axes.error.y, c2));
                axes.perp.apply_position(&mut p, bodies, impulse.x);
                bodies.apply_angular_correction(&mut p, impulse.y);
                axes.axial.apply_position(&mut p, bodies, impulse.z);
            }
            _ => {
                let impulse = -(m::inverse2(k) * axes.error);
                axes.perp.apply_position(&mut p, bodies, impulse.x);
                bodies.apply_angular_correction(&mut p, impulse.y);
            }
        }

        bodies.write_positions(data.positions, p);
        JointError {
            linear: linear_error,
            angular: angular_error,
        }
    }

    fn pseudo_rows(&mut self, bodies: &JointBodies, p: &[Position; 2], rows: &mut PseudoRows) {
        let axes = self.axes(p);
        rows.push(axes.perp, axes.error.x, false);
        if bodies.angular_mass() > 0.0 {
            rows.push(Jacobian::angular(), axes.error.y, false);
        }
        if let Some(limit) = self.limit {
            push_limit_rows(&limit, axes.translation, axes.axial, rows);
        }
    }
}

use core::f32::consts::PI;
use libm::{acosf, atan2f, cosf, sinf, sqrtf};

use crate::{
    square, Actuators, Anomalies, Anomaly, Angle, Frame, JointAngles, Kinematics, Len, LenExt,
    Point, SeparationFix,
};

fn radians(degrees: f32) -> f32 {
    degrees * PI / 180.0
}

fn degrees(radians: f32) -> f32 {
    radians * 180.0 / PI
}

// acos, but a target that is out of reach pins the arm at full extension or full
// fold instead of producing NaN.
fn acos_clamped(x: f32) -> f32 {
    acosf(x.clamp(-1.0, 1.0))
}

pub struct ScaraConfigBuilder {
    length_theta: Len,
    length_psi: Len,
    length_theta_ext: Len,
    length_psi_ext: Len,
    offset: Point,
    theta_range: (Angle, Angle),
    psi_range: (Angle, Angle),
    min_separation: Angle,
}

impl Default for ScaraConfigBuilder {
    fn default() -> Self {
        Self {
            length_theta: 150.0.mm(),
            length_psi: 150.0.mm(),
            length_theta_ext: 150.0.mm(),
            length_psi_ext: 150.0.mm(),
            offset: Point::new(100.0, -56.0),
            theta_range: (Angle::degrees(-50.0), Angle::degrees(150.0)),
            psi_range: (Angle::degrees(-30.0), Angle::degrees(245.0)),
            min_separation: Angle::degrees(30.0),
        }
    }
}

impl ScaraConfigBuilder {
    pub fn build(&self) -> ScaraConfig {
        ScaraConfig {
            length_theta: self.length_theta,
            length_psi: self.length_psi,
            length_theta_ext: self.length_theta_ext,
            length_psi_ext: self.length_psi_ext,
            offset: self.offset,
            min_theta: self.theta_range.0,
            max_theta: self.theta_range.1,
            min_psi: self.psi_range.0,
            max_psi: self.psi_range.1,
            min_separation: self.min_separation,
        }
    }

    pub fn with_proximal_lengths(&mut self, theta: Len, psi: Len) -> &mut Self {
        self.length_theta = theta;
        self.length_psi = psi;
        self
    }

    pub fn with_distal_lengths(&mut self, theta_ext: Len, psi_ext: Len) -> &mut Self {
        self.length_theta_ext = theta_ext;
        self.length_psi_ext = psi_ext;
        self
    }

    pub fn with_offset(&mut self, offset: Point) -> &mut Self {
        self.offset = offset;
        self
    }

    pub fn with_theta_range(&mut self, min: Angle, max: Angle) -> &mut Self {
        self.theta_range = (min, max);
        self
    }

    pub fn with_psi_range(&mut self, min: Angle, max: Angle) -> &mut Self {
        self.psi_range = (min, max);
        self
    }

    pub fn with_min_separation(&mut self, angle: Angle) -> &mut Self {
        self.min_separation = angle;
        self
    }
}

/// The kinematic constants of a SCARA arm.
#[derive(Clone, Copy, Debug, serde::Serialize, serde::Deserialize)]
pub struct ScaraConfig {
    /// Proximal link driven by the theta motor.
    pub length_theta: Len,
    /// Proximal link driven by the psi motor.
    pub length_psi: Len,
    /// Distal link from the end of the theta link to the effector.
    pub length_theta_ext: Len,
    /// Distal link from the end of the psi link to the effector.
    pub length_psi_ext: Len,
    /// Where the shared pivot sits in bed coordinates.
    pub offset: Point,
    pub min_theta: Angle,
    pub max_theta: Angle,
    pub min_psi: Angle,
    pub max_psi: Angle,
    /// Psi must lead theta by at least this much, or the distal links fold
    /// through each other.
    pub min_separation: Angle,
}

impl Default for ScaraConfig {
    fn default() -> Self {
        ScaraConfigBuilder::default().build()
    }
}

impl ScaraConfig {
    /// Where the effector sits for the given joint angles.
    ///
    /// The two proximal links and the segment between their ends form one triangle;
    /// that segment and the two distal links form another. Solving both gives the
    /// angle at the end of the theta link, from which we get the distance and angle
    /// of the effector as seen from the pivot.
    pub fn joints_to_point(&self, joints: JointAngles) -> Point {
        let lt = self.length_theta.get();
        let lp = self.length_psi.get();
        let lte = self.length_theta_ext.get();
        let lpe = self.length_psi_ext.get();

        let s = sqrtf(square(lt) + square(lp) - 2.0 * lt * lp * cosf(radians(joints.psi - joints.theta)));
        let s2 = square(s);
        let c2 = acos_clamped((square(lpe) - s2 - square(lte)) / (-2.0 * s * lte));
        let b2 = acos_clamped((square(lp) - s2 - square(lt)) / (-2.0 * s * lt));
        let p1 = b2 + c2;
        let p = sqrtf(square(lt) + square(lte) - 2.0 * lt * lte * cosf(p1));
        let d = acos_clamped((square(lte) - square(lt) - square(p)) / (-2.0 * lt * p));

        let rho = radians(joints.theta) + d;
        Point::new(p * cosf(rho) + self.offset.x, p * sinf(rho) + self.offset.y)
    }

    /// Solves for the joint angles that put the effector at `p`, before any
    /// separation or range correction. Home offsets are subtracted.
    pub fn point_to_raw_joints(&self, p: Point, home_offset: [f32; 2]) -> JointAngles {
        let lt = self.length_theta.get();
        let lp = self.length_psi.get();
        let lte = self.length_theta_ext.get();
        let lpe = self.length_psi_ext.get();

        let x = p.x - self.offset.x;
        let y = p.y - self.offset.y;
        let rho = atan2f(y, x);
        let dist2 = square(x) + square(y);
        // Avoid dividing by zero when asked for the pivot itself.
        let dist = sqrtf(dist2).max(1e-6);

        let d = acos_clamped((square(lte) - square(lt) - dist2) / (-2.0 * lt * dist));
        let c1 = acos_clamped((square(lpe) - square(lp) - dist2) / (-2.0 * lp * dist));

        JointAngles {
            theta: degrees(rho - d) - home_offset[0],
            psi: degrees(rho + c1) - home_offset[1],
        }
    }

    /// Applies the separation and range policy to a raw solution.
    pub fn correct(&self, raw: JointAngles, anomalies: &mut Anomalies) -> JointAngles {
        let min_sep = self.min_separation.to_degrees();
        let (min_theta, max_theta) = (self.min_theta.to_degrees(), self.max_theta.to_degrees());
        let (min_psi, max_psi) = (self.min_psi.to_degrees(), self.max_psi.to_degrees());
        let JointAngles { mut theta, mut psi } = raw;

        if psi - theta < min_sep {
            let fix = if theta + min_sep < max_psi {
                psi = theta + min_sep;
                SeparationFix::RaisedPsi
            } else if psi - min_sep > min_theta {
                theta = psi - min_sep;
                SeparationFix::LoweredTheta
            } else {
                theta = max_theta;
                psi = theta + min_sep;
                SeparationFix::Pinned
            };
            anomalies.push(Anomaly::Separation {
                theta: raw.theta,
                psi: raw.psi,
                fix,
            });
        }

        if theta > max_theta || theta < min_theta {
            anomalies.push(Anomaly::ThetaOutOfBounds(theta));
            theta = theta.clamp(min_theta, max_theta);
        }
        if psi > max_psi || psi < min_psi {
            anomalies.push(Anomaly::PsiOutOfBounds(psi));
            psi = psi.clamp(min_psi, max_psi);
        }

        JointAngles { theta, psi }
    }
}

impl Kinematics for ScaraConfig {
    fn inverse(&self, cartesian: [f32; 3], frame: &Frame<'_>) -> Actuators {
        let mut anomalies = Anomalies::default();
        let raw = self.point_to_raw_joints(Point::new(cartesian[0], cartesian[1]), frame.home_offset);
        let joints = self.correct(raw, &mut anomalies);
        Actuators {
            coords: [joints.theta, joints.psi, frame.z(cartesian)],
            anomalies,
        }
    }

    fn forward(&self, joints: JointAngles) -> Point {
        self.joints_to_point(joints)
    }

    fn home_xy(&self) -> Point {
        // The home switches sit at theta 90 and psi 180.
        self.joints_to_point(JointAngles::new(90.0, 180.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    impl Arbitrary for ScaraConfig {
        type Parameters = ();
        type Strategy = BoxedStrategy<ScaraConfig>;

        fn arbitrary_with(_: ()) -> Self::Strategy {
            (140.0..160.0f32, 140.0..160.0f32, -100.0..100.0f32, -100.0..100.0f32)
                .prop_map(|(proximal, distal, ox, oy)| {
                    ScaraConfigBuilder::default()
                        .with_proximal_lengths(proximal.mm(), proximal.mm())
                        .with_distal_lengths(distal.mm(), distal.mm())
                        .with_offset(Point::new(ox, oy))
                        .build()
                })
                .boxed()
        }
    }

    fn solve(cfg: &ScaraConfig, x: f32, y: f32, home_offset: [f32; 2]) -> Actuators {
        cfg.inverse(
            [x, y, 0.0],
            &Frame {
                home_offset,
                bed: None,
            },
        )
    }

    #[test]
    fn home_position() {
        let cfg = ScaraConfig::default();
        let home = cfg.home_xy();
        assert!((home.x - -50.0).abs() < 1e-3);
        assert!((home.y - 94.0).abs() < 1e-3);
    }

    #[test]
    fn near_full_reach_widens_psi() {
        let cfg = ScaraConfig::default();
        // Straight out along the arm's y axis, almost at full extension.
        let out = solve(&cfg, 100.0, -56.0 + 299.0, [0.0, 0.0]);
        let [theta, psi, _] = out.coords;
        assert!((psi - theta - 30.0).abs() < 1e-3);
        assert!(matches!(
            out.anomalies.iter().next(),
            Some(Anomaly::Separation {
                fix: SeparationFix::RaisedPsi,
                ..
            })
        ));
    }

    #[test]
    fn theta_below_range_is_clamped() {
        let cfg = ScaraConfig::default();
        // Directly "below" the pivot, which needs theta around -150.
        let out = solve(&cfg, 100.0, -56.0 - 150.0, [0.0, 0.0]);
        assert_eq!(out.coords[0], -50.0);
        assert!(out
            .anomalies
            .iter()
            .any(|a| matches!(a, Anomaly::ThetaOutOfBounds(t) if *t < -149.0)));
    }

    #[test]
    fn impossible_separation_pins_both_angles() {
        let cfg = ScaraConfig::default();
        let p = 2.0 * 150.0 * libm::cosf(radians(45.0));
        let out = solve(&cfg, 100.0, -56.0 + p, [-175.0, 200.0]);
        assert_eq!(out.coords[0], 150.0);
        assert_eq!(out.coords[1], 180.0);
        assert!(matches!(
            out.anomalies.iter().next(),
            Some(Anomaly::Separation {
                fix: SeparationFix::Pinned,
                ..
            })
        ));
    }

    #[test]
    fn pivot_does_not_produce_nan() {
        let cfg = ScaraConfig::default();
        let out = solve(&cfg, 100.0, -56.0, [0.0, 0.0]);
        assert!(out.coords.iter().all(|c| c.is_finite()));
    }

    proptest! {
        // Check that the inverse transform undoes the forward transform.
        #[test]
        fn test_joint_round_trip(cfg in any::<ScaraConfig>(), theta in 0.0..90.0f32, sep in 40.0..100.0f32) {
            let joints = JointAngles::new(theta, theta + sep);
            let p = cfg.joints_to_point(joints);
            let out = solve(&cfg, p.x, p.y, [0.0, 0.0]);
            prop_assert!(out.anomalies.is_empty());
            prop_assert!((out.coords[0] - joints.theta).abs() < 1e-2);
            prop_assert!((out.coords[1] - joints.psi).abs() < 1e-2);
        }

        // Home offsets shift both solved angles and nothing else.
        #[test]
        fn test_home_offset_shifts(theta in 10.0..80.0f32, sep in 50.0..90.0f32, dt in -5.0..5.0f32, dp in -5.0..5.0f32) {
            let cfg = ScaraConfig::default();
            let p = cfg.joints_to_point(JointAngles::new(theta, theta + sep));
            let plain = cfg.point_to_raw_joints(p, [0.0, 0.0]);
            let shifted = cfg.point_to_raw_joints(p, [dt, dp]);
            prop_assert!((plain.theta - dt - shifted.theta).abs() < 1e-3);
            prop_assert!((plain.psi - dp - shifted.psi).abs() < 1e-3);
        }
    }
}

//! Geometry of the scarab: conversion between Cartesian bed coordinates and
//! the two arm angles, plus the bed-height correction grid.
//!
//! The arm has two proximal links that share a pivot at the origin of the
//! arm frame. We call their angles "theta" and "psi". Each proximal link
//! carries a distal link, and the two distal links meet at the effector.
//! All angles are in degrees, which is what the firmware speaks on the wire.
//!
//! This crate supports `no_std` and uses `libm` so it can run in embedded
//! contexts.

#![cfg_attr(not(feature = "std"), no_std)]

pub mod bed;
pub mod scara;

pub use bed::BedGrid;
pub use scara::{ScaraConfig, ScaraConfigBuilder};

pub type Angle = euclid::Angle<f32>;
pub type Point = euclid::Point2D<f32, Mm>;

pub struct Mm;

pub type Len = euclid::Length<f32, Mm>;

pub(crate) fn square<T: core::ops::Mul<T> + Copy>(x: T) -> <T as core::ops::Mul<T>>::Output {
    x * x
}

pub trait LenExt {
    fn mm(self) -> Len;
}

impl LenExt for f32 {
    fn mm(self) -> Len {
        Len::new(self)
    }
}

/// Joint angles of the arm, in degrees.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct JointAngles {
    pub theta: f32,
    pub psi: f32,
}

impl JointAngles {
    pub fn new(theta: f32, psi: f32) -> Self {
        Self { theta, psi }
    }
}

/// How the inverse transform widened two joint angles that came out too
/// close together.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SeparationFix {
    /// Psi was pushed up to `theta + min_separation`.
    RaisedPsi,
    /// Theta was pulled down to `psi - min_separation`.
    LoweredTheta,
    /// Neither worked, so both angles were pinned at the top of the theta range.
    Pinned,
}

/// Something the inverse transform had to correct. These are never fatal,
/// but the caller should report them.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Anomaly {
    /// The raw solution had theta and psi closer than the minimum separation.
    Separation { theta: f32, psi: f32, fix: SeparationFix },
    /// Theta was outside its range and got clamped. Holds the unclamped value.
    ThetaOutOfBounds(f32),
    /// Psi was outside its range and got clamped. Holds the unclamped value.
    PsiOutOfBounds(f32),
}

impl core::fmt::Display for Anomaly {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Anomaly::Separation { .. } => write!(f, "angle between psi and theta too small"),
            Anomaly::ThetaOutOfBounds(t) => write!(f, "theta out of bounds={t:.2}"),
            Anomaly::PsiOutOfBounds(p) => write!(f, "psi out of bounds={p:.2}"),
        }
    }
}

/// The anomalies reported by a single inverse transform. There are at most three:
/// one separation fix and one clamp per angle.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Anomalies {
    items: [Option<Anomaly>; 3],
}

impl Anomalies {
    pub fn push(&mut self, a: Anomaly) {
        if let Some(slot) = self.items.iter_mut().find(|s| s.is_none()) {
            *slot = Some(a);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.items.iter().all(Option::is_none)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Anomaly> + '_ {
        self.items.iter().flatten()
    }
}

/// Actuator-space coordinates: the two arm angles (or plain X/Y for a
/// Cartesian machine) and the corrected Z.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Actuators {
    pub coords: [f32; 3],
    pub anomalies: Anomalies,
}

/// What the inverse transform needs to know besides the kinematic constants.
#[derive(Clone, Copy, Default)]
pub struct Frame<'a> {
    /// Offsets subtracted from the two actuator coordinates after solving.
    pub home_offset: [f32; 2],
    /// Bed-height correction. `None` while a calibration session is running, so that
    /// captured calibration heights are not corrected by themselves.
    pub bed: Option<&'a BedGrid>,
}

impl<'a> Frame<'a> {
    fn z(&self, cartesian: [f32; 3]) -> f32 {
        match self.bed {
            Some(bed) => cartesian[2] + bed.height_correction(cartesian[0], cartesian[1]),
            None => cartesian[2],
        }
    }
}

/// A kinematic model, mapping Cartesian positions to actuator coordinates.
///
/// The segmenter only talks to this trait, so adding a machine geometry does not
/// touch the command dispatcher.
pub trait Kinematics {
    fn inverse(&self, cartesian: [f32; 3], frame: &Frame<'_>) -> Actuators;

    /// Maps the two planar actuator coordinates back to Cartesian XY.
    fn forward(&self, joints: JointAngles) -> Point;

    /// Cartesian XY of the head when the planar axes sit on their home switches.
    fn home_xy(&self) -> Point;
}

/// A plain Cartesian machine: X and Y pass through untouched.
#[derive(Debug, Clone, Copy, Default, serde::Serialize, serde::Deserialize)]
pub struct Cartesian {
    pub home_x: f32,
    pub home_y: f32,
}

impl Kinematics for Cartesian {
    fn inverse(&self, cartesian: [f32; 3], frame: &Frame<'_>) -> Actuators {
        Actuators {
            coords: [
                cartesian[0] - frame.home_offset[0],
                cartesian[1] - frame.home_offset[1],
                frame.z(cartesian),
            ],
            anomalies: Anomalies::default(),
        }
    }

    fn forward(&self, joints: JointAngles) -> Point {
        Point::new(joints.theta, joints.psi)
    }

    fn home_xy(&self) -> Point {
        Point::new(self.home_x, self.home_y)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn anomalies_hold_three() {
        let mut a = Anomalies::default();
        assert!(a.is_empty());
        a.push(Anomaly::ThetaOutOfBounds(200.0));
        a.push(Anomaly::PsiOutOfBounds(-40.0));
        a.push(Anomaly::PsiOutOfBounds(-41.0));
        a.push(Anomaly::PsiOutOfBounds(-42.0));
        assert_eq!(a.iter().count(), 3);
    }

    #[test]
    fn cartesian_passes_through() {
        let k = Cartesian::default();
        let out = k.inverse([10.0, 20.0, 0.5], &Frame::default());
        assert_eq!(out.coords, [10.0, 20.0, 0.5]);
        assert!(out.anomalies.is_empty());
    }
}

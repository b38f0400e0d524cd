//! Turntable camera poses and the fixed lighting rig.

use serde::{Deserialize, Serialize};
use std::f64::consts::TAU;

/// A camera on the turntable circle, looking at the origin.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CameraPose {
    /// Frame index.
    pub index: u32,
    /// Azimuth in radians, `2π·index/frames`.
    pub angle: f64,
    /// Distance from the vertical axis.
    pub distance: f32,
    /// Height above the ground plane.
    pub height: f32,
}

impl CameraPose {
    /// Returns `frames` evenly spaced poses in ascending angle order,
    /// covering `[0, 2π)`.
    #[must_use]
    pub fn turntable(frames: u32, distance: f32, height: f32) -> Vec<Self> {
        (0..frames)
            .map(|index| Self {
                index,
                angle: TAU * f64::from(index) / f64::from(frames),
                distance,
                height,
            })
            .collect()
    }

    /// Azimuth in degrees.
    #[must_use]
    pub fn degrees(&self) -> f64 {
        self.angle.to_degrees()
    }

    /// Camera position with +Y up; angle 0 sits on the +Z axis.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn eye(&self) -> [f32; 3] {
        let (sin, cos) = self.angle.sin_cos();
        [self.distance * sin as f32, self.height, self.distance * cos as f32]
    }
}

/// A directional light.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Light {
    /// Direction the light travels, world space.
    pub direction: [f32; 3],
    /// Relative intensity.
    pub intensity: f32,
}

/// Key, fill and rim lights. The rig is fixed in world space, so the
/// product turns under constant lighting.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LightingRig {
    /// Main light, front-left and above.
    pub key: Light,
    /// Softer light from the opposite side.
    pub fill: Light,
    /// Back light outlining the silhouette.
    pub rim: Light,
}

impl LightingRig {
    /// The standard three-point rig.
    #[must_use]
    pub fn three_point() -> Self {
        Self {
            key: Light {
                direction: [0.6, -0.7, -0.4],
                intensity: 1.0,
            },
            fill: Light {
                direction: [-0.7, -0.3, -0.6],
                intensity: 0.4,
            },
            rim: Light {
                direction: [0.0, -0.4, 0.9],
                intensity: 0.7,
            },
        }
    }
}

impl Default for LightingRig {
    fn default() -> Self {
        Self::three_point()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_angles_strictly_increase_within_full_turn() {
        for frames in [2, 3, 36, 360] {
            let poses = CameraPose::turntable(frames, 3.0, 1.2);
            assert_eq!(poses.len(), frames as usize);
            assert_eq!(poses[0].angle, 0.0);
            assert!(poses.windows(2).all(|w| w[0].angle < w[1].angle));
            assert!(poses.iter().all(|p| p.angle < TAU));
        }
    }

    #[test]
    fn test_two_frames_are_opposite() {
        let poses = CameraPose::turntable(2, 2.0, 0.5);
        assert!((poses[1].degrees() - 180.0).abs() < 1e-9);
        let eye = poses[1].eye();
        assert!((eye[2] + 2.0).abs() < 1e-5);
        assert!((eye[1] - 0.5).abs() < f32::EPSILON);
    }
}

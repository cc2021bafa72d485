use nalgebra::{Quaternion, UnitQuaternion, Vector3};
use rand::Rng;
use rand_distr::StandardNormal;

use crate::error::{Result, VoxelError};
use crate::tensor::{Center, Coords, Tensor};

/// Random rigid-body augmentation: a uniform rotation about the center,
/// then a translation of length at most `random_translation`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RandomTransform {
    pub random_translation: f32,
    pub random_rotation: bool,
}

impl Default for RandomTransform {
    fn default() -> Self {
        Self {
            random_translation: 0.0,
            random_rotation: false,
        }
    }
}

// Normalized 4D gaussian, uniform over unit quaternions and so over SO(3).
fn random_rotation<R: Rng + ?Sized>(rng: &mut R) -> UnitQuaternion<f32> {
    loop {
        let q = Quaternion::new(
            rng.sample::<f32, _>(StandardNormal),
            rng.sample::<f32, _>(StandardNormal),
            rng.sample::<f32, _>(StandardNormal),
            rng.sample::<f32, _>(StandardNormal),
        );
        if q.norm() > 1e-6 {
            return UnitQuaternion::from_quaternion(q);
        }
    }
}

// Uniform over the ball of radius `max_len`.
fn random_translation<R: Rng + ?Sized>(rng: &mut R, max_len: f32) -> Vector3<f32> {
    let direction = loop {
        let v = Vector3::new(
            rng.sample::<f32, _>(StandardNormal),
            rng.sample::<f32, _>(StandardNormal),
            rng.sample::<f32, _>(StandardNormal),
        );
        if let Some(unit) = v.try_normalize(1e-6) {
            break unit;
        }
    };
    let length = max_len * rng.gen::<f32>().cbrt();
    direction * length.min(max_len)
}

impl RandomTransform {
    pub fn new(random_translation: f32, random_rotation: bool) -> Result<Self> {
        if !random_translation.is_finite() || random_translation < 0.0 {
            return Err(VoxelError::value(format!(
                "random_translation must be >= 0, got {random_translation}"
            )));
        }
        Ok(Self {
            random_translation,
            random_rotation,
        })
    }

    pub fn forward(&self, coords: &Coords, center: &Center) -> Result<Coords> {
        self.forward_with_rng(&mut rand::thread_rng(), coords, center)
    }

    /// Returns transformed copies of `coords`; the input is not modified.
    pub fn forward_with_rng<R: Rng + ?Sized>(
        &self,
        rng: &mut R,
        coords: &Coords,
        center: &Center,
    ) -> Result<Coords> {
        if coords.device() != center.device() {
            return Err(VoxelError::device(coords.device(), center.device()));
        }
        let center = *center.data();

        let rotation = if self.random_rotation {
            random_rotation(rng)
        } else {
            UnitQuaternion::identity()
        };
        let translation = if self.random_translation > 0.0 {
            random_translation(rng, self.random_translation)
        } else {
            Vector3::zeros()
        };

        let points = coords
            .data()
            .iter()
            .map(|p| center + rotation * (*p - center) + translation)
            .collect();
        Ok(Tensor::new(points, coords.device()))
    }
}

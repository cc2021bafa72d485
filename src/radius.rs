use crate::error::{Result, VoxelError};
use crate::tensor::Tensor;

/// Radius input: one value for everything, or an array whose meaning
/// (per-atom or per-channel) follows the voxelizer's radius policy.
#[derive(Clone, Debug, PartialEq)]
pub enum Radii {
    Scalar(f32),
    Array(Tensor<Vec<f32>>),
}

impl From<f32> for Radii {
    fn from(radius: f32) -> Self {
        Radii::Scalar(radius)
    }
}

impl Radii {
    pub(crate) fn check_positive(&self) -> Result<()> {
        let bad = match self {
            Radii::Scalar(r) => !(r.is_finite() && *r > 0.0),
            Radii::Array(values) => values.data().iter().any(|r| !(r.is_finite() && *r > 0.0)),
        };
        if bad {
            return Err(VoxelError::value("radii must be finite and positive"));
        }
        Ok(())
    }
}

/// Effective radius for any (atom, channel) pair.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum RadiusPolicy<'a> {
    Uniform(f32),
    PerAtom(&'a [f32]),
    PerChannel(&'a [f32]),
}

impl<'a> RadiusPolicy<'a> {
    /// Resolves `radii` for `num_atoms` atoms and `num_channels` channels.
    /// Arrays must have length N, or C when `channel_wise` is set.
    pub fn resolve(
        radii: &'a Radii,
        channel_wise: bool,
        num_atoms: usize,
        num_channels: usize,
    ) -> Result<Self> {
        radii.check_positive()?;
        let values = match radii {
            Radii::Scalar(r) => return Ok(RadiusPolicy::Uniform(*r)),
            Radii::Array(values) => values.data().as_slice(),
        };

        if channel_wise {
            if values.len() != num_channels {
                return Err(VoxelError::shape(format!(
                    "channel-wise radii need {num_channels} values, got {}",
                    values.len()
                )));
            }
            Ok(RadiusPolicy::PerChannel(values))
        } else {
            if values.len() != num_atoms {
                return Err(VoxelError::shape(format!(
                    "atom-wise radii need {num_atoms} values, got {}",
                    values.len()
                )));
            }
            Ok(RadiusPolicy::PerAtom(values))
        }
    }

    #[inline]
    pub fn radius(&self, atom: usize, channel: usize) -> f32 {
        match self {
            RadiusPolicy::Uniform(r) => *r,
            RadiusPolicy::PerAtom(values) => values[atom],
            RadiusPolicy::PerChannel(values) => values[channel],
        }
    }
}

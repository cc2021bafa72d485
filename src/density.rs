use std::fmt;
use std::str::FromStr;

use crate::error::{Result, VoxelError};

// e^-2, density of the gaussian lobe at d = r
const GAUSSIAN_EDGE: f32 = 0.135_335_28;

/// Maps the distance between a cell center and an atom to a density value.
///
/// The gaussian variant follows the libmolgrid kernel, generalized to any
/// `atom_scale` s > 1:
///
/// ```text
/// d <  r        exp(-2 d^2 / r^2)
/// r <= d < s r  e^-2 * ((s r - d) / ((s - 1) r))^2
/// d >= s r      0
/// ```
///
/// Both pieces equal e^-2 at d = r, and for s = 1.5 the first derivatives
/// agree as well.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum Density {
    #[default]
    Gaussian,
    Binary,
}

impl Density {
    /// Distance beyond which the density is zero.
    #[inline]
    pub fn cutoff(self, radius: f32, atom_scale: f32) -> f32 {
        match self {
            Density::Gaussian => atom_scale * radius,
            Density::Binary => radius,
        }
    }

    #[inline]
    pub fn evaluate(self, distance: f32, radius: f32, atom_scale: f32) -> f32 {
        match self {
            Density::Binary => {
                if distance <= radius {
                    1.0
                } else {
                    0.0
                }
            }
            Density::Gaussian => {
                let outer = atom_scale * radius;
                if distance >= outer {
                    0.0
                } else if distance < radius {
                    let x = distance / radius;
                    (-2.0 * x * x).exp()
                } else {
                    let t = (outer - distance) / ((atom_scale - 1.0) * radius);
                    GAUSSIAN_EDGE * t * t
                }
            }
        }
    }

    /// Smallest `atom_scale` accepted for this density.
    pub(crate) fn check_atom_scale(self, atom_scale: f32) -> Result<()> {
        if !atom_scale.is_finite() || atom_scale < 1.0 {
            return Err(VoxelError::value(format!(
                "atom_scale must be >= 1, got {atom_scale}"
            )));
        }
        if self == Density::Gaussian && atom_scale <= 1.0 {
            return Err(VoxelError::value(
                "gaussian density needs atom_scale > 1 for its outer tail",
            ));
        }
        Ok(())
    }
}

impl fmt::Display for Density {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Density::Gaussian => write!(f, "gaussian"),
            Density::Binary => write!(f, "binary"),
        }
    }
}

impl FromStr for Density {
    type Err = VoxelError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "gaussian" => Ok(Density::Gaussian),
            "binary" => Ok(Density::Binary),
            other => Err(VoxelError::value(format!(
                "density must be 'gaussian' or 'binary', got '{other}'"
            ))),
        }
    }
}

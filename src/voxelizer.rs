use nalgebra::Point3;

use crate::density::Density;
use crate::error::{Result, VoxelError};
use crate::kernel::{self, KernelParams};
use crate::radius::{Radii, RadiusPolicy};
use crate::tensor::{self, Array, Center, Channels, Coords, Device, RawArray, Role, Tensor};
use crate::voxel::{GridGeometry, VoxelGrid};

const DEFAULT_BLOCKDIM: usize = 32;

#[derive(Clone, Debug, PartialEq)]
pub struct VoxelizerConfig {
    /// Edge length of one voxel, in coordinate units
    pub resolution: f32,
    /// Voxels per axis
    pub dimension: usize,
    /// Gaussian cutoff as a multiple of the radius
    pub atom_scale: f32,
    pub density: Density,
    /// Radius arrays are indexed by channel instead of by atom
    pub channel_wise_radii: bool,
    /// Largest block side, in cells
    pub blockdim: usize,
    pub device: Device,
}

impl Default for VoxelizerConfig {
    fn default() -> Self {
        Self {
            resolution: 0.5,
            dimension: 48,
            atom_scale: 1.5,
            density: Density::Gaussian,
            channel_wise_radii: false,
            blockdim: DEFAULT_BLOCKDIM,
            device: Device::Cpu,
        }
    }
}

impl VoxelizerConfig {
    pub fn new(resolution: f32, dimension: usize) -> Self {
        Self {
            resolution,
            dimension,
            blockdim: DEFAULT_BLOCKDIM.min(dimension.max(1)),
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<()> {
        if !self.resolution.is_finite() || self.resolution <= 0.0 {
            return Err(VoxelError::value(format!(
                "resolution must be positive, got {}",
                self.resolution
            )));
        }
        if self.dimension == 0 {
            return Err(VoxelError::value("dimension must be positive"));
        }
        if self.blockdim == 0 || self.blockdim > self.dimension {
            return Err(VoxelError::value(format!(
                "blockdim must be in [1, {}], got {}",
                self.dimension, self.blockdim
            )));
        }
        self.density.check_atom_scale(self.atom_scale)
    }
}

/// Turns atoms into a (C, D, D, D) density grid centered on a point.
#[derive(Clone, Debug, PartialEq)]
pub struct Voxelizer {
    config: VoxelizerConfig,
}

impl Voxelizer {
    pub fn new(config: VoxelizerConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &VoxelizerConfig {
        &self.config
    }

    pub fn resolution(&self) -> f32 {
        self.config.resolution
    }

    pub fn dimension(&self) -> usize {
        self.config.dimension
    }

    pub fn device(&self) -> Device {
        self.config.device
    }

    pub fn geometry(&self) -> GridGeometry {
        GridGeometry::new(self.config.resolution, self.config.dimension)
    }

    pub fn with_density(&self, density: Density) -> Result<Self> {
        Self::new(VoxelizerConfig {
            density,
            ..self.config.clone()
        })
    }

    pub fn with_channel_wise_radii(&self, channel_wise_radii: bool) -> Self {
        Self {
            config: VoxelizerConfig {
                channel_wise_radii,
                ..self.config.clone()
            },
        }
    }

    /// Moves the voxelizer to `device`; later inputs must live there too.
    pub fn to(self, device: Device) -> Self {
        Self {
            config: VoxelizerConfig {
                device,
                ..self.config
            },
        }
    }

    /// Zero grid with this voxelizer's geometry and device.
    pub fn get_empty_grid(&self, num_channels: usize) -> VoxelGrid {
        VoxelGrid::new(num_channels, self.config.dimension, self.config.device)
    }

    /// Converts raw numbers for `role` onto this voxelizer's device.
    pub fn asarray(&self, raw: impl Into<RawArray>, role: Role) -> Result<Array> {
        tensor::asarray(raw, role, self.config.device)
    }

    /// Voxelizes into a freshly allocated grid.
    pub fn forward(
        &self,
        coords: &Coords,
        center: &Center,
        channels: &Tensor<Channels>,
        radii: &Radii,
    ) -> Result<VoxelGrid> {
        let num_channels = channels.data().num_channels();
        let mut grid = self.get_empty_grid(num_channels);
        self.forward_into(coords, center, channels, radii, &mut grid)?;
        Ok(grid)
    }

    /// Adds densities into `out` and hands the same grid back. `out` is not
    /// cleared first; pass a zeroed grid to get the plain voxelization. On
    /// error `out` is left untouched.
    pub fn forward_into<'g>(
        &self,
        coords: &Coords,
        center: &Center,
        channels: &Tensor<Channels>,
        radii: &Radii,
        out: &'g mut VoxelGrid,
    ) -> Result<&'g mut VoxelGrid> {
        self.check_device(coords.device())?;
        self.check_device(center.device())?;
        self.check_device(channels.device())?;
        if let Radii::Array(values) = radii {
            self.check_device(values.device())?;
        }
        self.check_device(out.device())?;

        let points = coords.data();
        let channels = channels.data();
        let num_atoms = points.len();
        let num_channels = channels.num_channels();
        check_inputs(points, center.data(), channels)?;

        if out.channels != num_channels || out.dimension != self.config.dimension {
            let d = self.config.dimension;
            return Err(VoxelError::shape(format!(
                "output grid has shape {:?}, expected {:?}",
                out.shape(),
                [num_channels, d, d, d]
            )));
        }

        let radii = RadiusPolicy::resolve(
            radii,
            self.config.channel_wise_radii,
            num_atoms,
            num_channels,
        )?;

        let params = KernelParams {
            geometry: self.geometry(),
            density: self.config.density,
            atom_scale: self.config.atom_scale,
            blockdim: self.config.blockdim,
            device: self.config.device,
            radii,
        };
        kernel::accumulate(&params, points, center.data(), channels, out);
        Ok(out)
    }

    fn check_device(&self, found: Device) -> Result<()> {
        if found != self.config.device {
            return Err(VoxelError::device(self.config.device, found));
        }
        Ok(())
    }
}

fn check_inputs(points: &[Point3<f32>], center: &Point3<f32>, channels: &Channels) -> Result<()> {
    if channels.num_atoms() != points.len() {
        return Err(VoxelError::shape(format!(
            "{} coordinates but {} channel rows",
            points.len(),
            channels.num_atoms()
        )));
    }
    if !center.iter().all(|v| v.is_finite()) || !points.iter().all(|p| p.iter().all(|v| v.is_finite())) {
        return Err(VoxelError::value("coordinates must be finite"));
    }
    match channels {
        Channels::Types {
            indices,
            num_channels,
        } => {
            if let Some(bad) = indices.iter().find(|&&c| c >= *num_channels) {
                return Err(VoxelError::shape(format!(
                    "type index {bad} out of range for {num_channels} channels"
                )));
            }
        }
        Channels::Features(weights) => {
            if weights.iter().any(|w| !w.is_finite() || *w < 0.0) {
                return Err(VoxelError::value("feature weights must be finite and non-negative"));
            }
        }
    }
    Ok(())
}

use std::ops::Range;

use nalgebra::Point3;

use crate::error::{Result, VoxelError};
use crate::tensor::Device;

/// Dense (C, D, D, D) grid of densities, k fastest.
#[derive(Clone, Debug, PartialEq)]
pub struct VoxelGrid {
    pub channels: usize,
    pub dimension: usize,
    pub data: Vec<f32>,
    device: Device,
}

impl VoxelGrid {
    /// Zero-initialized grid
    pub fn new(channels: usize, dimension: usize, device: Device) -> Self {
        let size = channels * dimension * dimension * dimension;
        Self {
            channels,
            dimension,
            data: vec![0.0; size],
            device,
        }
    }

    pub fn device(&self) -> Device {
        self.device
    }

    pub fn to(self, device: Device) -> Self {
        Self { device, ..self }
    }

    pub fn shape(&self) -> [usize; 4] {
        let d = self.dimension;
        [self.channels, d, d, d]
    }

    // 1D index of (channel, i, j, k)
    #[inline]
    pub fn voxel_index(&self, c: usize, i: usize, j: usize, k: usize) -> usize {
        let d = self.dimension;
        ((c * d + i) * d + j) * d + k
    }

    #[inline]
    pub fn get(&self, c: usize, i: usize, j: usize, k: usize) -> f32 {
        self.data[self.voxel_index(c, i, j, k)]
    }

    pub fn channel_len(&self) -> usize {
        self.dimension * self.dimension * self.dimension
    }

    pub fn channel(&self, c: usize) -> &[f32] {
        let n = self.channel_len();
        &self.data[c * n..(c + 1) * n]
    }

    /// Splits the grid into consecutive channel groups, e.g. ligand and
    /// pocket layers.
    pub fn split_channels(&self, sizes: &[usize]) -> Result<Vec<&[f32]>> {
        let total: usize = sizes.iter().sum();
        if total != self.channels {
            return Err(VoxelError::shape(format!(
                "channel groups sum to {total}, grid has {} channels",
                self.channels
            )));
        }
        let n = self.channel_len();
        let mut groups = Vec::with_capacity(sizes.len());
        let mut rest = self.data.as_slice();
        for &size in sizes {
            let (head, tail) = rest.split_at(size * n);
            groups.push(head);
            rest = tail;
        }
        Ok(groups)
    }

    pub fn fill_zero(&mut self) {
        self.data.fill(0.0);
    }

    pub fn sum(&self) -> f32 {
        self.data.iter().sum()
    }

    pub fn occupied_voxels(&self) -> usize {
        self.data.iter().filter(|&&v| v > 0.0).count()
    }
}

/// Placement of a D^3 cubic grid around a center point.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct GridGeometry {
    pub resolution: f32,
    pub dimension: usize,
}

impl GridGeometry {
    pub fn new(resolution: f32, dimension: usize) -> Self {
        Self {
            resolution,
            dimension,
        }
    }

    /// Offset of cell `index` from the grid center along one axis.
    #[inline]
    pub fn cell_offset(&self, index: usize) -> f32 {
        let half = (self.dimension as f32 - 1.0) / 2.0;
        self.resolution * (index as f32 - half)
    }

    /// Cell-center offsets along one axis, shared by all three.
    pub fn axis_offsets(&self) -> Vec<f32> {
        (0..self.dimension).map(|i| self.cell_offset(i)).collect()
    }

    pub fn cell_center(&self, center: &Point3<f32>, index: [usize; 3]) -> Point3<f32> {
        Point3::new(
            center.x + self.cell_offset(index[0]),
            center.y + self.cell_offset(index[1]),
            center.z + self.cell_offset(index[2]),
        )
    }

    /// Cells whose centers may lie within `cutoff` of `local` (a position
    /// relative to the grid center), clipped to the grid. The box is
    /// widened to whole cells; the density function does the exact cut.
    pub fn index_bounds(&self, local: &Point3<f32>, cutoff: f32) -> Option<[Range<usize>; 3]> {
        let half = (self.dimension as f32 - 1.0) / 2.0;
        let last = self.dimension as i64 - 1;
        let mut bounds = [0..0, 0..0, 0..0];
        for axis in 0..3 {
            let p = local[axis];
            let lo = ((p - cutoff) / self.resolution + half).floor() as i64;
            let hi = ((p + cutoff) / self.resolution + half).ceil() as i64;
            if hi < 0 || lo > last {
                return None;
            }
            bounds[axis] = lo.max(0) as usize..(hi.min(last) + 1) as usize;
        }
        Some(bounds)
    }
}

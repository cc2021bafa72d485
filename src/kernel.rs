//! Blocked accumulation of atom densities into a grid.
//!
//! Every (atom, channel) pair with non-zero weight becomes a splat with a
//! clipped index box. Splats are binned into cubic blocks of side
//! `blockdim`; each block is filled into a private buffer from its bin and
//! then added into the grid. A cell belongs to exactly one block and its
//! bin lists splats in input order, so the summation order per cell does
//! not depend on `blockdim` or on how blocks are scheduled.

use std::ops::Range;

use log::{debug, trace};
use nalgebra::Point3;
use rayon::prelude::*;

use crate::density::Density;
use crate::radius::RadiusPolicy;
use crate::tensor::{Channels, Device};
use crate::voxel::{GridGeometry, VoxelGrid};

#[derive(Clone, Debug)]
pub(crate) struct Splat {
    pos: Point3<f32>,
    channel: usize,
    weight: f32,
    radius: f32,
    cutoff_sq: f32,
    bounds: [Range<usize>; 3],
}

pub(crate) struct KernelParams<'a> {
    pub geometry: GridGeometry,
    pub density: Density,
    pub atom_scale: f32,
    pub blockdim: usize,
    pub device: Device,
    pub radii: RadiusPolicy<'a>,
}

struct Block {
    ranges: [Range<usize>; 3],
    splats: Vec<u32>,
}

struct BlockBuffer {
    ranges: [Range<usize>; 3],
    data: Vec<f32>,
}

pub(crate) fn build_splats(
    params: &KernelParams<'_>,
    coords: &[Point3<f32>],
    center: &Point3<f32>,
    channels: &Channels,
) -> Vec<Splat> {
    let mut splats = Vec::new();
    let mut push = |atom: usize, channel: usize, weight: f32| {
        let local = Point3::from(coords[atom] - *center);
        let radius = params.radii.radius(atom, channel);
        let cutoff = params.density.cutoff(radius, params.atom_scale);
        if let Some(bounds) = params.geometry.index_bounds(&local, cutoff) {
            splats.push(Splat {
                pos: local,
                channel,
                weight,
                radius,
                cutoff_sq: cutoff * cutoff,
                bounds,
            });
        }
    };

    match channels {
        Channels::Types { indices, .. } => {
            for (atom, &channel) in indices.iter().enumerate() {
                push(atom, channel, 1.0);
            }
        }
        Channels::Features(weights) => {
            for atom in 0..weights.nrows() {
                for channel in 0..weights.ncols() {
                    let weight = weights[(atom, channel)];
                    if weight != 0.0 {
                        push(atom, channel, weight);
                    }
                }
            }
        }
    }
    splats
}

fn block_ranges(dimension: usize, blockdim: usize) -> Vec<Range<usize>> {
    (0..dimension)
        .step_by(blockdim)
        .map(|start| start..(start + blockdim).min(dimension))
        .collect()
}

// Bins splat ids into every block their index box touches.
fn bin_splats(splats: &[Splat], dimension: usize, blockdim: usize) -> Vec<Block> {
    let ranges = block_ranges(dimension, blockdim);
    let nb = ranges.len();
    let mut bins: Vec<Vec<u32>> = vec![Vec::new(); nb * nb * nb];

    for (id, splat) in splats.iter().enumerate() {
        let [bx, by, bz] = &splat.bounds;
        for i in bx.start / blockdim..=(bx.end - 1) / blockdim {
            for j in by.start / blockdim..=(by.end - 1) / blockdim {
                for k in bz.start / blockdim..=(bz.end - 1) / blockdim {
                    bins[(i * nb + j) * nb + k].push(id as u32);
                }
            }
        }
    }

    let mut blocks = Vec::new();
    for (b, splat_ids) in bins.into_iter().enumerate() {
        if splat_ids.is_empty() {
            continue;
        }
        let (i, j, k) = (b / (nb * nb), (b / nb) % nb, b % nb);
        blocks.push(Block {
            ranges: [ranges[i].clone(), ranges[j].clone(), ranges[k].clone()],
            splats: splat_ids,
        });
    }
    blocks
}

fn intersect(a: &Range<usize>, b: &Range<usize>) -> Range<usize> {
    a.start.max(b.start)..a.end.min(b.end)
}

fn fill_block(
    block: &Block,
    splats: &[Splat],
    offsets: &[f32],
    params: &KernelParams<'_>,
    num_channels: usize,
) -> BlockBuffer {
    let [ri, rj, rk] = &block.ranges;
    let (ni, nj, nk) = (ri.len(), rj.len(), rk.len());
    let mut data = vec![0.0f32; num_channels * ni * nj * nk];

    for &id in &block.splats {
        let splat = &splats[id as usize];
        let base = splat.channel * ni * nj * nk;
        for i in intersect(&splat.bounds[0], ri) {
            let dx = offsets[i] - splat.pos.x;
            let dx2 = dx * dx;
            for j in intersect(&splat.bounds[1], rj) {
                let dy = offsets[j] - splat.pos.y;
                let dxy2 = dx2 + dy * dy;
                if dxy2 > splat.cutoff_sq {
                    continue;
                }
                let row = base + ((i - ri.start) * nj + (j - rj.start)) * nk;
                for k in intersect(&splat.bounds[2], rk) {
                    let dz = offsets[k] - splat.pos.z;
                    let d2 = dxy2 + dz * dz;
                    if d2 > splat.cutoff_sq {
                        continue;
                    }
                    let value = params
                        .density
                        .evaluate(d2.sqrt(), splat.radius, params.atom_scale);
                    data[row + (k - rk.start)] += splat.weight * value;
                }
            }
        }
    }

    BlockBuffer {
        ranges: block.ranges.clone(),
        data,
    }
}

fn scatter(buffer: &BlockBuffer, grid: &mut VoxelGrid) {
    let [ri, rj, rk] = &buffer.ranges;
    let (ni, nj, nk) = (ri.len(), rj.len(), rk.len());
    for c in 0..grid.channels {
        for (li, i) in ri.clone().enumerate() {
            for (lj, j) in rj.clone().enumerate() {
                let src = ((c * ni + li) * nj + lj) * nk;
                let dst = grid.voxel_index(c, i, j, rk.start);
                let row = &buffer.data[src..src + nk];
                for (cell, v) in grid.data[dst..dst + nk].iter_mut().zip(row) {
                    *cell += *v;
                }
            }
        }
    }
}

/// Adds the density of every splat into `grid`. Inputs are validated.
pub(crate) fn accumulate(
    params: &KernelParams<'_>,
    coords: &[Point3<f32>],
    center: &Point3<f32>,
    channels: &Channels,
    grid: &mut VoxelGrid,
) {
    let splats = build_splats(params, coords, center, channels);
    let blocks = bin_splats(&splats, params.geometry.dimension, params.blockdim);
    let offsets = params.geometry.axis_offsets();
    let num_channels = grid.channels;

    debug!(
        "voxelizing {} atoms into {} channels: {} splats over {} blocks (blockdim {}, {})",
        coords.len(),
        num_channels,
        splats.len(),
        blocks.len(),
        params.blockdim,
        params.device
    );

    match params.device {
        Device::Cpu => {
            for block in &blocks {
                trace!("block {:?} with {} splats", block.ranges, block.splats.len());
                let buffer = fill_block(block, &splats, &offsets, params, num_channels);
                scatter(&buffer, grid);
            }
        }
        Device::CpuParallel => {
            // one wave per pool width bounds the live block buffers
            let wave = rayon::current_num_threads().max(1);
            for chunk in blocks.chunks(wave) {
                let buffers: Vec<BlockBuffer> = chunk
                    .par_iter()
                    .map(|block| fill_block(block, &splats, &offsets, params, num_channels))
                    .collect();
                for buffer in &buffers {
                    scatter(buffer, grid);
                }
            }
        }
    }
}

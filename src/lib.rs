pub mod density;
pub mod error;
pub mod file_io;
mod kernel;
pub mod radius;
pub mod tensor;
pub mod transform;
pub mod voxel;
pub mod voxelizer;

pub use density::Density;
pub use error::{Result, VoxelError};
pub use file_io::{read_mol2, read_mol2_file, VoxMol};
pub use radius::{Radii, RadiusPolicy};
pub use tensor::{asarray, Array, Center, Channels, Coords, Device, RawArray, Role, Tensor};
pub use transform::RandomTransform;
pub use voxel::{GridGeometry, VoxelGrid};
pub use voxelizer::{Voxelizer, VoxelizerConfig};

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::{DMatrix, Point3};
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn voxelizer(resolution: f32, dimension: usize, blockdim: usize, density: Density) -> Voxelizer {
        Voxelizer::new(VoxelizerConfig {
            resolution,
            dimension,
            blockdim,
            density,
            ..VoxelizerConfig::default()
        })
        .unwrap()
    }

    fn cpu<T>(data: T) -> Tensor<T> {
        Tensor::new(data, Device::Cpu)
    }

    fn random_atoms(rng: &mut StdRng, n: usize, spread: f32) -> Vec<Point3<f32>> {
        (0..n)
            .map(|_| {
                Point3::new(
                    rng.gen_range(-spread..spread),
                    rng.gen_range(-spread..spread),
                    rng.gen_range(-spread..spread),
                )
            })
            .collect()
    }

    fn random_features(rng: &mut StdRng, n: usize, c: usize) -> DMatrix<f32> {
        DMatrix::from_fn(n, c, |_, _| {
            if rng.gen_bool(0.4) {
                rng.gen_range(0.1..2.0)
            } else {
                0.0
            }
        })
    }

    // Squared distance from cell (i, j, k) to a position relative to the
    // grid center, summed in the same order as the kernel.
    fn cell_dist_sq(offsets: &[f32], local: &nalgebra::Vector3<f32>, idx: [usize; 3]) -> f32 {
        let dx = offsets[idx[0]] - local.x;
        let dy = offsets[idx[1]] - local.y;
        let dz = offsets[idx[2]] - local.z;
        (dx * dx + dy * dy) + dz * dz
    }

    // Every atom against every cell, no pruning or blocking.
    fn brute_force(
        voxelizer: &Voxelizer,
        coords: &[Point3<f32>],
        center: &Point3<f32>,
        weights: &DMatrix<f32>,
        radius: impl Fn(usize, usize) -> f32,
    ) -> VoxelGrid {
        let config = voxelizer.config();
        let offsets = voxelizer.geometry().axis_offsets();
        let d = config.dimension;
        let mut grid = voxelizer.get_empty_grid(weights.ncols());
        for c in 0..weights.ncols() {
            for i in 0..d {
                for j in 0..d {
                    for k in 0..d {
                        let mut value = 0.0;
                        for (a, p) in coords.iter().enumerate() {
                            let dist = cell_dist_sq(&offsets, &(*p - *center), [i, j, k]).sqrt();
                            value += weights[(a, c)]
                                * config.density.evaluate(dist, radius(a, c), config.atom_scale);
                        }
                        let idx = grid.voxel_index(c, i, j, k);
                        grid.data[idx] = value;
                    }
                }
            }
        }
        grid
    }

    fn max_abs_diff(a: &VoxelGrid, b: &VoxelGrid) -> f32 {
        assert_eq!(a.shape(), b.shape());
        a.data
            .iter()
            .zip(&b.data)
            .map(|(x, y)| (x - y).abs())
            .fold(0.0, f32::max)
    }

    #[test]
    fn two_atoms_binary() {
        let vox = voxelizer(1.0, 4, 4, Density::Binary);
        let center = Point3::new(2.0, -1.0, 3.0);
        let coords = vec![center, center + nalgebra::Vector3::new(1.5, 1.5, 1.5)];
        let channels = cpu(Channels::types(vec![0, 0], 1));

        let grid = vox
            .forward(&cpu(coords), &cpu(center), &channels, &Radii::Scalar(1.0))
            .unwrap();

        // first atom sits on the corner shared by the 8 middle cells
        for i in 1..3 {
            for j in 1..3 {
                for k in 1..3 {
                    assert_eq!(grid.get(0, i, j, k), 1.0);
                }
            }
        }
        // second atom sits on cell (3,3,3), face neighbours are exactly 1.0 away
        for idx in [[3, 3, 3], [2, 3, 3], [3, 2, 3], [3, 3, 2]] {
            assert_eq!(grid.get(0, idx[0], idx[1], idx[2]), 1.0);
        }
        assert_eq!(grid.occupied_voxels(), 12);
        assert_eq!(grid.sum(), 12.0);
    }

    #[test]
    fn in_place_matches_fresh_grid() {
        let mut rng = StdRng::seed_from_u64(1);
        let vox = voxelizer(0.5, 16, 8, Density::Gaussian);
        let coords = cpu(random_atoms(&mut rng, 40, 3.0));
        let center = cpu(Point3::new(0.2, -0.1, 0.0));
        let types: Vec<usize> = (0..40).map(|i| i % 4).collect();
        let channels = cpu(Channels::types(types, 4));
        let radii = Radii::Scalar(1.0);

        let reference = vox.forward(&coords, &center, &channels, &radii).unwrap();
        let mut grid = vox.get_empty_grid(4);
        let grid_ptr: *const VoxelGrid = &grid;
        let out = vox
            .forward_into(&coords, &center, &channels, &radii, &mut grid)
            .unwrap();
        assert!(std::ptr::eq(out as *const VoxelGrid, grid_ptr));
        assert!(max_abs_diff(&grid, &reference) < 1e-5);
        assert!(reference.sum() > 0.0);
    }

    #[test]
    fn forward_into_accumulates() {
        let vox = voxelizer(1.0, 6, 3, Density::Binary);
        let coords = cpu(vec![Point3::origin()]);
        let center = cpu(Point3::origin());
        let channels = cpu(Channels::types(vec![0], 1));
        let radii = Radii::Scalar(1.0);

        let mut grid = vox.get_empty_grid(1);
        vox.forward_into(&coords, &center, &channels, &radii, &mut grid).unwrap();
        let once = grid.sum();
        vox.forward_into(&coords, &center, &channels, &radii, &mut grid).unwrap();
        assert_eq!(grid.sum(), 2.0 * once);
    }

    #[test]
    fn matches_brute_force() {
        let mut rng = StdRng::seed_from_u64(2);
        let n = 25;
        let coords = random_atoms(&mut rng, n, 4.0);
        let center = Point3::new(0.3, 0.1, -0.2);
        let weights = random_features(&mut rng, n, 3);
        let atom_radii: Vec<f32> = (0..n).map(|_| rng.gen_range(0.6..1.8)).collect();

        for density in [Density::Gaussian, Density::Binary] {
            let vox = voxelizer(0.5, 18, 5, density);
            let grid = vox
                .forward(
                    &cpu(coords.clone()),
                    &cpu(center),
                    &cpu(Channels::Features(weights.clone())),
                    &Radii::Array(cpu(atom_radii.clone())),
                )
                .unwrap();
            let expected = brute_force(&vox, &coords, &center, &weights, |a, _| atom_radii[a]);
            assert!(max_abs_diff(&grid, &expected) < 1e-4, "{density}");
        }
    }

    #[test]
    fn block_size_invariance() {
        let mut rng = StdRng::seed_from_u64(3);
        let n = 30;
        let coords = cpu(random_atoms(&mut rng, n, 3.5));
        let center = cpu(Point3::origin());
        let channels = cpu(Channels::Features(random_features(&mut rng, n, 2)));
        let radii = Radii::Scalar(1.2);

        let d = 12;
        let grids: Vec<VoxelGrid> = [1, d / 2, d]
            .iter()
            .map(|&blockdim| {
                voxelizer(0.6, d, blockdim, Density::Gaussian)
                    .forward(&coords, &center, &channels, &radii)
                    .unwrap()
            })
            .collect();
        assert!(max_abs_diff(&grids[0], &grids[1]) < 1e-5);
        assert!(max_abs_diff(&grids[0], &grids[2]) < 1e-5);
    }

    #[test]
    fn parallel_device_matches_serial() {
        let mut rng = StdRng::seed_from_u64(4);
        let n = 50;
        let points = random_atoms(&mut rng, n, 4.0);
        let weights = random_features(&mut rng, n, 3);

        let serial = voxelizer(0.5, 20, 4, Density::Gaussian);
        let parallel = serial.clone().to(Device::CpuParallel);

        let a = serial
            .forward(
                &cpu(points.clone()),
                &cpu(Point3::origin()),
                &cpu(Channels::Features(weights.clone())),
                &Radii::Scalar(1.0),
            )
            .unwrap();
        let on = |t| Tensor::new(t, Device::CpuParallel);
        let b = parallel
            .forward(
                &on(points),
                &Tensor::new(Point3::origin(), Device::CpuParallel),
                &Tensor::new(Channels::Features(weights), Device::CpuParallel),
                &Radii::Scalar(1.0),
            )
            .unwrap();
        assert_eq!(b.device(), Device::CpuParallel);
        assert_eq!(a.data, b.data);
    }

    #[test]
    fn grids_are_non_negative() {
        let mut rng = StdRng::seed_from_u64(5);
        let n = 20;
        let coords = cpu(random_atoms(&mut rng, n, 3.0));
        let center = cpu(Point3::origin());
        let channels = cpu(Channels::Features(random_features(&mut rng, n, 2)));
        for density in [Density::Gaussian, Density::Binary] {
            let grid = voxelizer(0.5, 14, 7, density)
                .forward(&coords, &center, &channels, &Radii::Scalar(1.0))
                .unwrap();
            assert!(grid.data.iter().all(|&v| v >= 0.0));
        }
    }

    #[test]
    fn binary_occupancy_follows_radius() {
        let mut rng = StdRng::seed_from_u64(6);
        let n = 12;
        let points = random_atoms(&mut rng, n, 3.0);
        let center = Point3::new(0.1, 0.2, 0.3);
        let vox = voxelizer(0.5, 14, 4, Density::Binary);
        let radius = 0.9;
        let grid = vox
            .forward(
                &cpu(points.clone()),
                &cpu(center),
                &cpu(Channels::types(vec![0; n], 1)),
                &Radii::Scalar(radius),
            )
            .unwrap();

        let offsets = vox.geometry().axis_offsets();
        for i in 0..14 {
            for j in 0..14 {
                for k in 0..14 {
                    let near = points.iter().any(|p| {
                        let d2 = cell_dist_sq(&offsets, &(*p - center), [i, j, k]);
                        d2 <= radius * radius && d2.sqrt() <= radius
                    });
                    assert_eq!(grid.get(0, i, j, k) > 0.0, near, "cell {i},{j},{k}");
                }
            }
        }
    }

    #[test]
    fn gaussian_is_zero_beyond_cutoff() {
        let mut rng = StdRng::seed_from_u64(7);
        let n = 10;
        let points = random_atoms(&mut rng, n, 3.0);
        let types: Vec<usize> = (0..n).map(|i| i % 2).collect();
        let vox = voxelizer(0.5, 16, 8, Density::Gaussian);
        let radius = 0.8;
        let cutoff = vox.config().atom_scale * radius;
        let center = Point3::origin();
        let grid = vox
            .forward(
                &cpu(points.clone()),
                &cpu(center),
                &cpu(Channels::types(types.clone(), 2)),
                &Radii::Scalar(radius),
            )
            .unwrap();

        let geometry = vox.geometry();
        for c in 0..2 {
            for i in 0..16 {
                for j in 0..16 {
                    for k in 0..16 {
                        let cell = geometry.cell_center(&center, [i, j, k]);
                        let far = points
                            .iter()
                            .zip(&types)
                            .filter(|(_, &t)| t == c)
                            .all(|(p, _)| (cell - *p).norm() > cutoff + 1e-4);
                        if far {
                            assert_eq!(grid.get(c, i, j, k), 0.0);
                        }
                    }
                }
            }
        }
    }

    #[test]
    fn zero_weight_leaves_channel_alone() {
        let vox = voxelizer(0.5, 10, 5, Density::Gaussian);
        let coords = cpu(vec![Point3::new(0.3, 0.0, 0.0), Point3::new(-0.4, 0.2, 0.1)]);
        let center = cpu(Point3::origin());
        let radii = Radii::Scalar(1.0);

        // the second atom is absent from channel 1 whatever its channel 0 weight
        let a = DMatrix::from_row_slice(2, 2, &[1.0, 1.0, 0.5, 0.0]);
        let b = DMatrix::from_row_slice(2, 2, &[1.0, 1.0, 3.0, 0.0]);
        let only_first = DMatrix::from_row_slice(2, 2, &[1.0, 1.0, 0.0, 0.0]);

        let ga = vox.forward(&coords, &center, &cpu(Channels::Features(a)), &radii).unwrap();
        let gb = vox.forward(&coords, &center, &cpu(Channels::Features(b)), &radii).unwrap();
        let g1 = vox
            .forward(&coords, &center, &cpu(Channels::Features(only_first)), &radii)
            .unwrap();
        assert_eq!(ga.channel(1), gb.channel(1));
        assert_eq!(ga.channel(1), g1.channel(1));
        assert_ne!(ga.channel(0), gb.channel(0));
    }

    #[test]
    fn types_equal_one_hot_features() {
        let mut rng = StdRng::seed_from_u64(8);
        let n = 15;
        let coords = cpu(random_atoms(&mut rng, n, 3.0));
        let center = cpu(Point3::origin());
        let types: Vec<usize> = (0..n).map(|i| (i * 7) % 3).collect();
        let one_hot = DMatrix::from_fn(n, 3, |a, c| if types[a] == c { 1.0 } else { 0.0 });
        let vox = voxelizer(0.5, 12, 6, Density::Gaussian);

        let by_type = vox
            .forward(&coords, &center, &cpu(Channels::types(types, 3)), &Radii::Scalar(1.1))
            .unwrap();
        let by_feature = vox
            .forward(&coords, &center, &cpu(Channels::Features(one_hot)), &Radii::Scalar(1.1))
            .unwrap();
        assert_eq!(by_type.data, by_feature.data);
    }

    #[test]
    fn channel_wise_radii() {
        let coords = cpu(vec![Point3::origin(), Point3::origin()]);
        let center = cpu(Point3::origin());
        let channels = cpu(Channels::types(vec![0, 1], 2));
        let per_channel = Radii::Array(cpu(vec![2.0, 0.5]));
        let vox = voxelizer(0.5, 12, 6, Density::Binary);

        let err = vox.forward(&coords, &center, &channels, &Radii::Array(cpu(vec![2.0, 0.5, 1.0])));
        assert!(matches!(err, Err(VoxelError::Shape(_))));

        let channel_wise = vox.with_channel_wise_radii(true);
        let grid = channel_wise.forward(&coords, &center, &channels, &per_channel).unwrap();
        assert!(grid.channel(0).iter().filter(|&&v| v > 0.0).count() > 100);
        assert_eq!(grid.channel(1).iter().filter(|&&v| v > 0.0).count(), 8);

        let per_channel_for_three = Radii::Array(cpu(vec![2.0, 0.5]));
        let three = cpu(vec![Point3::origin(); 3]);
        let err = vox.forward(&three, &center, &cpu(Channels::types(vec![0, 1, 1], 2)), &per_channel_for_three);
        assert!(matches!(err, Err(VoxelError::Shape(_))));
    }

    #[test]
    fn validation_happens_before_accumulation() {
        let vox = voxelizer(1.0, 4, 2, Density::Gaussian);
        let coords = cpu(vec![Point3::origin(), Point3::new(0.5, 0.5, 0.5)]);
        let center = cpu(Point3::origin());
        let channels = cpu(Channels::types(vec![0, 1], 2));

        let mut grid = vox.get_empty_grid(2);
        grid.data.fill(1.0);
        let before = grid.clone();

        let bad_radii = Radii::Array(cpu(vec![1.0, 1.0, 1.0]));
        let err = vox.forward_into(&coords, &center, &channels, &bad_radii, &mut grid);
        assert!(matches!(err, Err(VoxelError::Shape(_))));

        let bad_types = cpu(Channels::types(vec![0, 2], 2));
        let err = vox.forward_into(&coords, &center, &bad_types, &Radii::Scalar(1.0), &mut grid);
        assert!(matches!(err, Err(VoxelError::Shape(_))));

        let short = cpu(Channels::types(vec![0], 2));
        let err = vox.forward_into(&coords, &center, &short, &Radii::Scalar(1.0), &mut grid);
        assert!(matches!(err, Err(VoxelError::Shape(_))));

        let err = vox.forward_into(&coords, &center, &channels, &Radii::Scalar(-1.0), &mut grid);
        assert!(matches!(err, Err(VoxelError::Value(_))));

        let remote = Tensor::new(Point3::origin(), Device::CpuParallel);
        let err = vox.forward_into(&coords, &remote, &channels, &Radii::Scalar(1.0), &mut grid);
        assert!(matches!(err, Err(VoxelError::Device { .. })));

        assert_eq!(grid, before);
    }

    #[test]
    fn output_shape_must_match() {
        let vox = voxelizer(1.0, 4, 4, Density::Gaussian);
        let coords = cpu(vec![Point3::origin()]);
        let center = cpu(Point3::origin());
        let channels = cpu(Channels::types(vec![0], 2));

        let mut wrong_channels = vox.get_empty_grid(3);
        let err = vox.forward_into(&coords, &center, &channels, &Radii::Scalar(1.0), &mut wrong_channels);
        assert!(matches!(err, Err(VoxelError::Shape(_))));

        let mut wrong_dim = VoxelGrid::new(2, 5, Device::Cpu);
        let err = vox.forward_into(&coords, &center, &channels, &Radii::Scalar(1.0), &mut wrong_dim);
        assert!(matches!(err, Err(VoxelError::Shape(_))));

        let mut elsewhere = vox.get_empty_grid(2).to(Device::CpuParallel);
        let err = vox.forward_into(&coords, &center, &channels, &Radii::Scalar(1.0), &mut elsewhere);
        assert!(matches!(err, Err(VoxelError::Device { .. })));
    }

    #[test]
    fn asarray_pipeline_with_split_groups() {
        let vox = Voxelizer::new(VoxelizerConfig::new(0.5, 16)).unwrap();
        let coords = vox
            .asarray(vec![[0.0, 0.0, 0.0], [1.2, 0.0, 0.0], [0.0, 1.5, 0.5]], Role::Coords)
            .unwrap()
            .into_coords()
            .unwrap();
        let center = vox.asarray([0.4, 0.5, 0.2], Role::Center).unwrap().into_center().unwrap();
        // ligand channels 0..2, pocket channels 2..4
        let channels = vox
            .asarray(vec![0i64, 1, 2], Role::Type)
            .unwrap()
            .into_channels()
            .unwrap()
            .map(|c| c.with_num_channels(4));
        let radii = vox.asarray(vec![1.0, 1.0, 2.0], Role::Radii).unwrap().into_radii().unwrap();

        let grid = vox.forward(&coords, &center, &channels, &radii).unwrap();
        let groups = grid.split_channels(&[2, 2]).unwrap();
        let (ligand, pocket) = (groups[0], groups[1]);
        let layer = grid.channel_len();
        assert!(ligand[..layer].iter().any(|&v| v > 0.0));
        assert!(ligand[layer..].iter().any(|&v| v > 0.0));
        assert!(pocket[..layer].iter().any(|&v| v > 0.0));
        assert!(pocket[layer..].iter().all(|&v| v == 0.0));
    }

    #[test]
    fn transform_then_voxelize() {
        let mut rng = StdRng::seed_from_u64(9);
        let vox = voxelizer(0.5, 32, 16, Density::Gaussian);
        let coords = cpu(vec![Point3::new(1.0, 0.0, 0.0), Point3::new(-1.0, 0.5, 0.0)]);
        let center = cpu(Point3::origin());
        let channels = cpu(Channels::types(vec![0, 0], 1));
        let radii = Radii::Scalar(1.0);

        let transform = RandomTransform::new(0.5, true).unwrap();
        let moved = transform.forward_with_rng(&mut rng, &coords, &center).unwrap();
        assert_eq!(coords.data()[0], Point3::new(1.0, 0.0, 0.0));

        let before = vox.forward(&coords, &center, &channels, &radii).unwrap();
        let after = vox.forward(&moved, &center, &channels, &radii).unwrap();
        assert!(after.sum() > 0.0);
        assert_ne!(before.data, after.data);
    }

    #[test]
    fn voxelize_mol2_file() {
        use std::path::Path;
        let file_path = Path::new(env!("CARGO_MANIFEST_DIR")).join("test_files/two.mol2");
        let l_mols = read_mol2_file(&file_path).expect("Failed to read MOL2 file");
        assert_eq!(l_mols.len(), 2);
        assert_eq!(l_mols[0].title, "ethanol");
        assert_eq!(l_mols[1].title, "methanethiol");

        let element_channels: Vec<String> = ["C", "N", "O", "S"].iter().map(|s| s.to_string()).collect();
        let vox = Voxelizer::new(VoxelizerConfig::new(0.5, 24)).unwrap();
        for mol in &l_mols {
            let coords = vox.asarray(mol.coords.clone(), Role::Coords).unwrap().into_coords().unwrap();
            let center = vox.asarray(mol.centroid(), Role::Center).unwrap().into_center().unwrap();
            let features = vox
                .asarray(mol.one_hot_features(&element_channels), Role::Feature)
                .unwrap()
                .into_channels()
                .unwrap();
            let grid = vox.forward(&coords, &center, &features, &Radii::Scalar(1.0)).unwrap();
            assert_eq!(grid.shape(), [4, 24, 24, 24]);
            assert!(grid.channel(1).iter().all(|&v| v == 0.0), "no nitrogen in {}", mol.title);
            assert!(grid.channel(0).iter().any(|&v| v > 0.0));
        }
    }
}

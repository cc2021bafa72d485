use molvoxel::{
    read_mol2_file, Density, Device, RandomTransform, Role, Voxelizer, VoxelizerConfig,
};

use anyhow::{bail, Context, Result};
use clap::Parser;
use env_logger::Builder;
use log::{info, LevelFilter};
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::io::Write;
use std::path::Path;
use std::time::Instant;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the MOL2 file (required)
    #[arg(short, long, required = true)]
    path: String,

    /// Voxel edge length in Angstroms
    #[arg(short, long, default_value_t = 0.5)]
    resolution: f32,

    /// Voxels per axis
    #[arg(short, long, default_value_t = 48)]
    dimension: usize,

    /// Gaussian cutoff as a multiple of the atom radius
    #[arg(long, default_value_t = 1.5)]
    atom_scale: f32,

    /// Density function: gaussian or binary
    #[arg(long, default_value = "gaussian")]
    density: String,

    /// Largest block side in voxels
    #[arg(short, long, default_value_t = 32)]
    blockdim: usize,

    /// Atom radius in Angstroms
    #[arg(long, default_value_t = 1.0)]
    radius: f32,

    /// Element channels, comma separated
    #[arg(short, long, value_delimiter = ',', default_value = "C,N,O,S")]
    channels: Vec<String>,

    /// Maximum random translation in Angstroms
    #[arg(long, default_value_t = 0.0)]
    random_translation: f32,

    /// Apply a random rotation about the molecule centroid
    #[arg(long)]
    random_rotation: bool,

    /// Seed for the random transform
    #[arg(long)]
    seed: Option<u64>,

    /// Device: cpu or cpu-parallel
    #[arg(long, default_value = "cpu")]
    device: String,

    /// Verbosity level. -v means level 1, -vvv means level 3
    #[arg(short, long, action = clap::ArgAction::Count, default_value_t = 0)]
    verbosity: u8,
}

fn init_logging(verbosity: u8) {
    let mut builder = Builder::new();

    match verbosity {
        0 => builder.filter_level(LevelFilter::Warn),
        1 => builder.filter_level(LevelFilter::Info),
        2 => builder.filter_level(LevelFilter::Debug),
        _ => builder.filter_level(LevelFilter::Trace),
    };

    builder.format(|buf, record| {
        let level_style = buf.default_level_style(record.level());
        let level = level_style.value(record.level());

        let file = record.file().unwrap_or("unknown");
        let line = record.line().unwrap_or(0);

        writeln!(
            buf,
            "[{} {}:{} {}] {}",
            level,
            file,
            line,
            record.target(),
            record.args()
        )
    });

    builder.init();
}

fn main() -> Result<()> {
    let start_time = Instant::now();

    let args = Args::parse();
    init_logging(args.verbosity);

    let density: Density = args.density.parse()?;
    let device: Device = args.device.parse()?;
    if args.channels.is_empty() {
        bail!("at least one channel is required");
    }

    let voxelizer = Voxelizer::new(VoxelizerConfig {
        resolution: args.resolution,
        dimension: args.dimension,
        atom_scale: args.atom_scale,
        density,
        channel_wise_radii: false,
        blockdim: args.blockdim.min(args.dimension),
        device,
    })?;
    let transform = RandomTransform::new(args.random_translation, args.random_rotation)?;
    let mut rng = match args.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };

    let path = Path::new(&args.path);
    let l_mols = read_mol2_file(path).with_context(|| format!("reading {}", args.path))?;

    println!("################################################");
    println!("MOL2 file path: {}", args.path);
    println!("Number of molecules read: {}", l_mols.len());
    println!(
        "Voxel Grid: {} channels x {}^3 at {} A ({})",
        args.channels.len(),
        args.dimension,
        args.resolution,
        density
    );
    println!("Channels: {}", args.channels.join(","));
    println!("################################################");

    for mol in &l_mols {
        let coords = voxelizer.asarray(mol.coords.clone(), Role::Coords)?.into_coords()?;
        let center = voxelizer.asarray(mol.centroid(), Role::Center)?.into_center()?;
        let features = voxelizer
            .asarray(mol.one_hot_features(&args.channels), Role::Feature)?
            .into_channels()?;

        let coords = transform.forward_with_rng(&mut rng, &coords, &center)?;
        let grid = voxelizer.forward(&coords, &center, &features, &args.radius.into())?;
        info!("{}: {} atoms voxelized", mol.title, mol.num_atoms());

        println!("\n{} ({} atoms)", mol.title, mol.num_atoms());
        for (c, name) in args.channels.iter().enumerate() {
            let layer = grid.channel(c);
            let occupied = layer.iter().filter(|&&v| v > 0.0).count();
            let total: f32 = layer.iter().sum();
            println!("  {:>4}: {:>7} occupied voxels, density sum {:.3}", name, occupied, total);
        }
    }

    println!("\nFinished in {:.3?}", start_time.elapsed());
    Ok(())
}

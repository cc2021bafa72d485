//! Device-tagged arrays and the conversion boundary from raw numbers.

use std::fmt;
use std::str::FromStr;

use nalgebra::{DMatrix, Point3};

use crate::error::{Result, VoxelError};
use crate::radius::Radii;

/// Execution target for the kernel.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum Device {
    /// Blocks evaluated one after another on the calling thread
    #[default]
    Cpu,
    /// Blocks evaluated on the rayon pool
    CpuParallel,
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Device::Cpu => write!(f, "cpu"),
            Device::CpuParallel => write!(f, "cpu-parallel"),
        }
    }
}

impl FromStr for Device {
    type Err = VoxelError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "cpu" => Ok(Device::Cpu),
            "cpu-parallel" | "parallel" => Ok(Device::CpuParallel),
            other => Err(VoxelError::value(format!("unknown device '{other}'"))),
        }
    }
}

/// A value resident on a device.
#[derive(Clone, Debug, PartialEq)]
pub struct Tensor<T> {
    data: T,
    device: Device,
}

impl<T> Tensor<T> {
    pub fn new(data: T, device: Device) -> Self {
        Self { data, device }
    }

    pub fn data(&self) -> &T {
        &self.data
    }

    pub fn device(&self) -> Device {
        self.device
    }

    pub fn into_inner(self) -> T {
        self.data
    }

    /// Moves the value to `device`.
    pub fn to(self, device: Device) -> Self {
        Self { device, ..self }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Tensor<U> {
        Tensor {
            data: f(self.data),
            device: self.device,
        }
    }
}

pub type Coords = Tensor<Vec<Point3<f32>>>;
pub type Center = Tensor<Point3<f32>>;

/// Per-atom channel assignment.
#[derive(Clone, Debug, PartialEq)]
pub enum Channels {
    /// One channel index per atom, weight 1
    Types {
        indices: Vec<usize>,
        num_channels: usize,
    },
    /// N x C non-negative weights
    Features(DMatrix<f32>),
}

impl Channels {
    pub fn types(indices: Vec<usize>, num_channels: usize) -> Self {
        Channels::Types {
            indices,
            num_channels,
        }
    }

    pub fn num_atoms(&self) -> usize {
        match self {
            Channels::Types { indices, .. } => indices.len(),
            Channels::Features(weights) => weights.nrows(),
        }
    }

    pub fn num_channels(&self) -> usize {
        match self {
            Channels::Types { num_channels, .. } => *num_channels,
            Channels::Features(weights) => weights.ncols(),
        }
    }

    /// Sets the configured channel count in type mode. Feature mode is
    /// unchanged since its width already fixes C.
    pub fn with_num_channels(self, num_channels: usize) -> Self {
        match self {
            Channels::Types { indices, .. } => Channels::Types {
                indices,
                num_channels,
            },
            features => features,
        }
    }
}

/// Raw numbers handed over by an atom source.
#[derive(Clone, Debug, PartialEq)]
pub enum RawArray {
    Scalar(f64),
    Vector(Vec<f64>),
    Matrix(Vec<Vec<f64>>),
    Integers(Vec<i64>),
}

impl From<f64> for RawArray {
    fn from(value: f64) -> Self {
        RawArray::Scalar(value)
    }
}

impl From<f32> for RawArray {
    fn from(value: f32) -> Self {
        RawArray::Scalar(value as f64)
    }
}

impl From<Vec<f64>> for RawArray {
    fn from(values: Vec<f64>) -> Self {
        RawArray::Vector(values)
    }
}

impl From<&[f64]> for RawArray {
    fn from(values: &[f64]) -> Self {
        RawArray::Vector(values.to_vec())
    }
}

impl From<[f64; 3]> for RawArray {
    fn from(values: [f64; 3]) -> Self {
        RawArray::Vector(values.to_vec())
    }
}

impl From<Vec<[f64; 3]>> for RawArray {
    fn from(rows: Vec<[f64; 3]>) -> Self {
        RawArray::Matrix(rows.into_iter().map(|r| r.to_vec()).collect())
    }
}

impl From<Vec<Vec<f64>>> for RawArray {
    fn from(rows: Vec<Vec<f64>>) -> Self {
        RawArray::Matrix(rows)
    }
}

impl From<Vec<i64>> for RawArray {
    fn from(values: Vec<i64>) -> Self {
        RawArray::Integers(values)
    }
}

impl From<Vec<usize>> for RawArray {
    fn from(values: Vec<usize>) -> Self {
        RawArray::Integers(values.into_iter().map(|v| v as i64).collect())
    }
}

/// What a raw array is meant to be.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Role {
    Coords,
    Center,
    Type,
    Feature,
    Radii,
}

impl FromStr for Role {
    type Err = VoxelError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "coords" => Ok(Role::Coords),
            "center" => Ok(Role::Center),
            "type" => Ok(Role::Type),
            "feature" => Ok(Role::Feature),
            "radii" => Ok(Role::Radii),
            other => Err(VoxelError::value(format!("unknown array role '{other}'"))),
        }
    }
}

/// A converted array, one variant per role.
#[derive(Clone, Debug, PartialEq)]
pub enum Array {
    Coords(Coords),
    Center(Center),
    Channels(Tensor<Channels>),
    Radii(Radii),
}

impl Array {
    fn kind(&self) -> &'static str {
        match self {
            Array::Coords(_) => "coords",
            Array::Center(_) => "center",
            Array::Channels(_) => "channels",
            Array::Radii(_) => "radii",
        }
    }

    pub fn into_coords(self) -> Result<Coords> {
        match self {
            Array::Coords(coords) => Ok(coords),
            other => Err(VoxelError::shape(format!("expected coords, got {}", other.kind()))),
        }
    }

    pub fn into_center(self) -> Result<Center> {
        match self {
            Array::Center(center) => Ok(center),
            other => Err(VoxelError::shape(format!("expected center, got {}", other.kind()))),
        }
    }

    pub fn into_channels(self) -> Result<Tensor<Channels>> {
        match self {
            Array::Channels(channels) => Ok(channels),
            other => Err(VoxelError::shape(format!("expected channels, got {}", other.kind()))),
        }
    }

    pub fn into_radii(self) -> Result<Radii> {
        match self {
            Array::Radii(radii) => Ok(radii),
            other => Err(VoxelError::shape(format!("expected radii, got {}", other.kind()))),
        }
    }
}

fn rank_name(raw: &RawArray) -> &'static str {
    match raw {
        RawArray::Scalar(_) => "scalar",
        RawArray::Vector(_) => "vector",
        RawArray::Matrix(_) => "matrix",
        RawArray::Integers(_) => "integer vector",
    }
}

fn check_finite(values: impl IntoIterator<Item = f64>, role: &str) -> Result<()> {
    if values.into_iter().all(f64::is_finite) {
        Ok(())
    } else {
        Err(VoxelError::value(format!("{role} must be finite")))
    }
}

/// Converts `raw` into the representation expected for `role`, placed on
/// `device`. The only role-specific shape validation before the kernel.
pub fn asarray(raw: impl Into<RawArray>, role: Role, device: Device) -> Result<Array> {
    let raw = raw.into();
    match role {
        Role::Coords => {
            let rows = match raw {
                RawArray::Matrix(rows) => rows,
                other => {
                    return Err(VoxelError::shape(format!(
                        "coords must be an (N, 3) matrix, got {}",
                        rank_name(&other)
                    )))
                }
            };
            let mut points = Vec::with_capacity(rows.len());
            for (i, row) in rows.iter().enumerate() {
                if row.len() != 3 {
                    return Err(VoxelError::shape(format!(
                        "coords row {i} has length {}, expected 3",
                        row.len()
                    )));
                }
                check_finite(row.iter().copied(), "coords")?;
                points.push(Point3::new(row[0] as f32, row[1] as f32, row[2] as f32));
            }
            Ok(Array::Coords(Tensor::new(points, device)))
        }
        Role::Center => {
            let values = match raw {
                RawArray::Vector(values) if values.len() == 3 => values,
                RawArray::Matrix(rows) if rows.len() == 1 && rows[0].len() == 3 => {
                    rows[0].clone()
                }
                other => {
                    return Err(VoxelError::shape(format!(
                        "center must be a vector of length 3, got {}",
                        rank_name(&other)
                    )))
                }
            };
            check_finite(values.iter().copied(), "center")?;
            let center = Point3::new(values[0] as f32, values[1] as f32, values[2] as f32);
            Ok(Array::Center(Tensor::new(center, device)))
        }
        Role::Type => {
            let values = match raw {
                RawArray::Integers(values) => values,
                RawArray::Vector(_) | RawArray::Scalar(_) => {
                    return Err(VoxelError::value("type indices must be integral"))
                }
                other => {
                    return Err(VoxelError::shape(format!(
                        "type must be an (N,) integer vector, got {}",
                        rank_name(&other)
                    )))
                }
            };
            let mut indices = Vec::with_capacity(values.len());
            for v in values {
                let index = usize::try_from(v)
                    .map_err(|_| VoxelError::value(format!("negative type index {v}")))?;
                indices.push(index);
            }
            let num_channels = indices.iter().max().map_or(0, |m| m + 1);
            let channels = Channels::types(indices, num_channels);
            Ok(Array::Channels(Tensor::new(channels, device)))
        }
        Role::Feature => {
            let rows = match raw {
                RawArray::Matrix(rows) => rows,
                other => {
                    return Err(VoxelError::shape(format!(
                        "feature must be an (N, C) matrix, got {}",
                        rank_name(&other)
                    )))
                }
            };
            let width = rows.first().map_or(0, Vec::len);
            let mut flat = Vec::with_capacity(rows.len() * width);
            for (i, row) in rows.iter().enumerate() {
                if row.len() != width {
                    return Err(VoxelError::shape(format!(
                        "feature row {i} has length {}, expected {width}",
                        row.len()
                    )));
                }
                check_finite(row.iter().copied(), "feature")?;
                if row.iter().any(|&w| w < 0.0) {
                    return Err(VoxelError::value(format!(
                        "feature row {i} has a negative weight"
                    )));
                }
                flat.extend(row.iter().map(|&w| w as f32));
            }
            let weights = DMatrix::from_row_slice(rows.len(), width, &flat);
            Ok(Array::Channels(Tensor::new(Channels::Features(weights), device)))
        }
        Role::Radii => {
            let radii = match raw {
                RawArray::Scalar(r) => Radii::Scalar(r as f32),
                RawArray::Vector(values) => {
                    check_finite(values.iter().copied(), "radii")?;
                    Radii::Array(Tensor::new(
                        values.into_iter().map(|r| r as f32).collect(),
                        device,
                    ))
                }
                RawArray::Integers(values) => Radii::Array(Tensor::new(
                    values.into_iter().map(|r| r as f32).collect(),
                    device,
                )),
                other => {
                    return Err(VoxelError::shape(format!(
                        "radii must be a scalar or a vector, got {}",
                        rank_name(&other)
                    )))
                }
            };
            radii.check_positive()?;
            Ok(Array::Radii(radii))
        }
    }
}

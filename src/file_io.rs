use std::fs::File;
use std::io::{self, BufRead, Result};
use std::path::Path;

use log::{debug, info};

/// Atoms of one MOL2 molecule.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct VoxMol {
    pub title: String,
    pub coords: Vec<[f64; 3]>,
    pub elements: Vec<String>,
}

impl VoxMol {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn num_atoms(&self) -> usize {
        self.coords.len()
    }

    pub fn centroid(&self) -> [f64; 3] {
        let n = self.coords.len().max(1) as f64;
        let mut sum = [0.0; 3];
        for c in &self.coords {
            for axis in 0..3 {
                sum[axis] += c[axis];
            }
        }
        [sum[0] / n, sum[1] / n, sum[2] / n]
    }

    /// One-hot feature rows over `channels` (element symbols). Atoms with an
    /// element outside the list get an all-zero row.
    pub fn one_hot_features(&self, channels: &[String]) -> Vec<Vec<f64>> {
        self.elements
            .iter()
            .map(|element| {
                channels
                    .iter()
                    .map(|c| if c.eq_ignore_ascii_case(element) { 1.0 } else { 0.0 })
                    .collect()
            })
            .collect()
    }
}

// "C.ar" -> "C", "Cl" -> "Cl"
fn element_of(sybyl_type: &str) -> String {
    sybyl_type
        .split('.')
        .next()
        .unwrap_or(sybyl_type)
        .to_string()
}

fn invalid(line_no: usize, msg: &str) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, format!("line {line_no}: {msg}"))
}

pub fn read_mol2_file(path: &Path) -> Result<Vec<VoxMol>> {
    info!("Reading MOL2 file from: {:?}", path);
    let file = File::open(path)?;
    read_mol2(io::BufReader::new(file))
}

pub fn read_mol2<R: BufRead>(reader: R) -> Result<Vec<VoxMol>> {
    let mut l_mols: Vec<VoxMol> = Vec::new();
    let mut mol: Option<VoxMol> = None;

    let mut expect_title = false;
    let mut in_atom_section = false;

    for (idx, line) in reader.lines().enumerate() {
        let line = line?;
        let line_no = idx + 1;
        let trimmed = line.trim();

        if trimmed.starts_with("@<TRIPOS>") {
            in_atom_section = trimmed == "@<TRIPOS>ATOM";
            if trimmed == "@<TRIPOS>MOLECULE" {
                if let Some(done) = mol.take() {
                    l_mols.push(done);
                }
                mol = Some(VoxMol::new());
                expect_title = true;
            }
            continue;
        }

        let Some(current) = mol.as_mut() else {
            continue;
        };

        if expect_title {
            current.title = trimmed.to_string();
            expect_title = false;
            continue;
        }

        if in_atom_section && !trimmed.is_empty() {
            // id name x y z type [subst_id subst_name charge]
            let parts: Vec<&str> = trimmed.split_whitespace().collect();
            if parts.len() < 6 {
                return Err(invalid(line_no, "atom record needs at least 6 fields"));
            }
            let mut xyz = [0.0; 3];
            for axis in 0..3 {
                xyz[axis] = parts[2 + axis]
                    .parse()
                    .map_err(|_| invalid(line_no, "bad coordinate"))?;
            }
            current.coords.push(xyz);
            current.elements.push(element_of(parts[5]));
        }
    }

    if let Some(done) = mol.take() {
        l_mols.push(done);
    }
    debug!("read {} molecules", l_mols.len());
    Ok(l_mols)
}

//! On-disk format for ensembles.
//!
//! One JSON document per ensemble:
//!
//! ```json
//! {
//!   "metadata": {
//!     "inertia": [Ia, Ib, Ic],
//!     "polarizability": [[..], [..], [..]],
//!     "temperature": 2.0,
//!     "reference_time": -1e-11,
//!     "field": { "shape": { "kind": "gaussian", ... }, "direction": [0, 0, 1] },
//!     "bodies": 2,
//!     "columns": ["r", "i", "j", "k", "omega_x", "omega_y", "omega_z", "time"]
//!   },
//!   "tables": [
//!     { "name": "body0", "rows": [[1, 0, 0, 0, 0, 0, 0, 0], ...] },
//!     { "name": "body1", "rows": [...] }
//!   ]
//! }
//! ```
//!
//! Floats are written in shortest round-trip form and parsed with correct
//! rounding, so a save/load cycle reproduces every value bit for bit.
//! Loading is all-or-nothing: any inconsistency fails the whole load.

use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use nalgebra::Matrix3;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::simulation::body::{BodyError, RigidBody};
use crate::simulation::ensemble::Ensemble;
use crate::simulation::field::{Field, FieldError};
use crate::simulation::states::{NVec3, State};

pub const COLUMNS: [&str; 8] = ["r", "i", "j", "k", "omega_x", "omega_y", "omega_z", "time"];

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Malformed ensemble file: {0}")]
    Format(#[from] serde_json::Error),

    #[error("Inconsistent ensemble file: {0}")]
    Corrupt(String),

    #[error("Invalid body properties in ensemble file: {0}")]
    Body(#[from] BodyError),

    #[error("Invalid field descriptor in ensemble file: {0}")]
    Field(#[from] FieldError),
}

#[derive(Debug, Serialize, Deserialize)]
struct Metadata {
    inertia: [f64; 3],
    polarizability: [[f64; 3]; 3], // row major
    temperature: f64,
    reference_time: f64,
    field: Option<Field>,
    bodies: usize,
    columns: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize)]
struct BodyTable {
    name: String,
    rows: Vec<[f64; 8]>,
}

#[derive(Debug, Serialize, Deserialize)]
struct EnsembleFile {
    metadata: Metadata,
    tables: Vec<BodyTable>,
}

fn table_name(index: usize) -> String {
    format!("body{index}")
}

pub fn save(ensemble: &Ensemble, path: &Path) -> Result<(), StorageError> {
    let io_err = |source| StorageError::Io {
        path: path.to_path_buf(),
        source,
    };

    let p = ensemble.polarizability();
    let i = ensemble.inertia();
    let file = EnsembleFile {
        metadata: Metadata {
            inertia: [i.x, i.y, i.z],
            polarizability: [
                [p[(0, 0)], p[(0, 1)], p[(0, 2)]],
                [p[(1, 0)], p[(1, 1)], p[(1, 2)]],
                [p[(2, 0)], p[(2, 1)], p[(2, 2)]],
            ],
            temperature: ensemble.temperature(),
            reference_time: ensemble.reference_time(),
            field: ensemble.field().cloned(),
            bodies: ensemble.len(),
            columns: COLUMNS.iter().map(|c| c.to_string()).collect(),
        },
        tables: ensemble
            .iter()
            .enumerate()
            .map(|(idx, body)| BodyTable {
                name: table_name(idx),
                rows: body.trajectory().iter().map(State::to_row).collect(),
            })
            .collect(),
    };

    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).map_err(io_err)?;
        }
    }
    let mut writer = BufWriter::new(File::create(path).map_err(io_err)?);
    serde_json::to_writer(&mut writer, &file)?;
    writer.flush().map_err(io_err)?;

    log::debug!("saved {} bodies to {}", ensemble.len(), path.display());
    Ok(())
}

pub fn load(path: &Path) -> Result<Ensemble, StorageError> {
    let reader = BufReader::new(File::open(path).map_err(|source| StorageError::Io {
        path: path.to_path_buf(),
        source,
    })?);
    let file: EnsembleFile = serde_json::from_reader(reader)?;
    let meta = file.metadata;

    if meta.columns != COLUMNS {
        return Err(StorageError::Corrupt(format!(
            "unexpected columns {:?}",
            meta.columns
        )));
    }
    if meta.bodies != file.tables.len() {
        return Err(StorageError::Corrupt(format!(
            "metadata announces {} bodies but the file holds {} tables",
            meta.bodies,
            file.tables.len()
        )));
    }
    if !meta.temperature.is_finite() || meta.temperature < 0.0 {
        return Err(BodyError::InvalidTemperature(meta.temperature).into());
    }
    if !meta.reference_time.is_finite() {
        return Err(StorageError::Corrupt(format!(
            "reference time {} is not finite",
            meta.reference_time
        )));
    }

    let inertia = NVec3::from(meta.inertia);
    let p = meta.polarizability;
    let polarizability = Matrix3::new(
        p[0][0], p[0][1], p[0][2],
        p[1][0], p[1][1], p[1][2],
        p[2][0], p[2][1], p[2][2],
    );
    let field = meta.field.map(Field::validated).transpose()?;

    let mut bodies = Vec::with_capacity(file.tables.len());
    for (idx, table) in file.tables.into_iter().enumerate() {
        if table.name != table_name(idx) {
            return Err(StorageError::Corrupt(format!(
                "table {idx} is named '{}', expected '{}'",
                table.name,
                table_name(idx)
            )));
        }
        if table.rows.is_empty() {
            return Err(StorageError::Corrupt(format!("table '{}' is empty", table.name)));
        }
        let trajectory: Vec<State> = table.rows.iter().map(State::from_row).collect();
        bodies.push(RigidBody::from_trajectory(inertia, polarizability, trajectory)?);
    }

    log::debug!("loaded {} bodies from {}", bodies.len(), path.display());
    Ok(Ensemble::from_parts(
        bodies,
        inertia,
        polarizability,
        meta.temperature,
        meta.reference_time,
        field,
    ))
}

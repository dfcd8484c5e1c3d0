//! Numeric array and record archiving
//!
//! Two kinds of files are written by the optimisation executables:
//!
//! - Plain numeric dumps of 2D arrays (decision variables, track-trajectory
//!   files): one row per line, values separated by a single space, lines
//!   starting with `#` ignored on reading. See [`save_array`] and
//!   [`load_array`].
//! - Record archives, a CSV file with a header in which each row is a
//!   serialized struct. To archive records create an [`Archiver`].

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

// External imports
use std::path::{Path, PathBuf};
use std::fs::{File, OpenOptions};
use csv::{ReaderBuilder, WriterBuilder};
pub use csv::Writer;
use ndarray::{Array2, ArrayView2};
use serde::Serialize;
use thiserror::Error;

// Internal imports
use crate::session::Session;

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// An object used to write CSV archive files.
#[derive(Default)]
pub struct Archiver {
    writer: Option<Writer<File>>
}

// ---------------------------------------------------------------------------
// ENUMERATIONS
// ---------------------------------------------------------------------------

/// Errors raised while reading or writing archives.
#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("The array file {0:?} does not exist")]
    NotFound(PathBuf),

    #[error("IO error on {0:?}: {1}")]
    Io(PathBuf, std::io::Error),

    #[error("CSV error on {0:?}: {1}")]
    Csv(PathBuf, csv::Error),

    #[error("Cannot parse value {value:?} on line {line} of {path:?}")]
    Parse {
        path: PathBuf,
        line: usize,
        value: String,
    },

    #[error("Line {line} of {path:?} has {found} values, expected {expected}")]
    RaggedRow {
        path: PathBuf,
        line: usize,
        found: usize,
        expected: usize,
    },

    #[error("The array file {0:?} contains no rows")]
    Empty(PathBuf),

    #[error("The archiver has not been initialised")]
    NotInitialised,
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl Archiver {
    /// Create a new archiver from a paricular path relative to the session's
    /// archive root.
    pub fn from_path<P: AsRef<Path>>(
        session: &Session, path: P
    ) -> Result<Self, ArchiveError> {
        let session_path = session.arch_root.join(path);

        if let Some(parent) = session_path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| ArchiveError::Io(session_path.clone(), e))?;
        }

        // Create the file if it does not exist, then open it in append mode
        File::create(&session_path)
            .map_err(|e| ArchiveError::Io(session_path.clone(), e))?;
        let file = OpenOptions::new()
            .append(true)
            .open(&session_path)
            .map_err(|e| ArchiveError::Io(session_path.clone(), e))?;

        let w = WriterBuilder::new()
            .has_headers(true)
            .from_writer(file);

        Ok(Self {
            writer: Some(w)
        })
    }

    /// Serialise a record into the archive.
    pub fn serialise<T: Serialize>(&mut self, record: T) -> Result<(), ArchiveError> {
        match self.writer {
            Some(ref mut w) => {
                w.serialize(record)
                    .map_err(|e| ArchiveError::Csv(PathBuf::new(), e))?;
                w.flush()
                    .map_err(|e| ArchiveError::Io(PathBuf::new(), e))?;
                Ok(())
            },
            None => Err(ArchiveError::NotInitialised)
        }
    }
}

// ---------------------------------------------------------------------------
// PUBLIC FUNCTIONS
// ---------------------------------------------------------------------------

/// Write a 2D array as a plain numeric dump.
///
/// Values are written with full round-trip precision.
pub fn save_array<P: AsRef<Path>>(path: P, array: ArrayView2<f64>) -> Result<(), ArchiveError> {
    let path = path.as_ref();

    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .map_err(|e| ArchiveError::Io(path.to_path_buf(), e))?;
        }
    }

    let mut writer = WriterBuilder::new()
        .delimiter(b' ')
        .has_headers(false)
        .from_path(path)
        .map_err(|e| ArchiveError::Csv(path.to_path_buf(), e))?;

    for row in array.rows() {
        let record: Vec<String> = row.iter().map(|v| format!("{:e}", v)).collect();
        writer
            .write_record(&record)
            .map_err(|e| ArchiveError::Csv(path.to_path_buf(), e))?;
    }

    writer
        .flush()
        .map_err(|e| ArchiveError::Io(path.to_path_buf(), e))
}

/// Read a plain numeric dump into a 2D array.
///
/// Repeated spaces are tolerated. Every row must have the same number of
/// values.
pub fn load_array<P: AsRef<Path>>(path: P) -> Result<Array2<f64>, ArchiveError> {
    let path = path.as_ref();

    if !path.exists() {
        return Err(ArchiveError::NotFound(path.to_path_buf()));
    }

    let mut reader = ReaderBuilder::new()
        .delimiter(b' ')
        .has_headers(false)
        .flexible(true)
        .comment(Some(b'#'))
        .from_path(path)
        .map_err(|e| ArchiveError::Csv(path.to_path_buf(), e))?;

    let mut values = Vec::new();
    let mut num_cols: Option<usize> = None;
    let mut num_rows = 0;

    for (line, result) in reader.records().enumerate() {
        let record = result.map_err(|e| ArchiveError::Csv(path.to_path_buf(), e))?;

        let mut row = Vec::new();
        for field in record.iter().map(str::trim).filter(|f| !f.is_empty()) {
            let v: f64 = field.parse().map_err(|_| ArchiveError::Parse {
                path: path.to_path_buf(),
                line: line + 1,
                value: field.to_string(),
            })?;
            row.push(v);
        }

        // Blank lines are skipped
        if row.is_empty() {
            continue;
        }

        match num_cols {
            Some(n) if n != row.len() => {
                return Err(ArchiveError::RaggedRow {
                    path: path.to_path_buf(),
                    line: line + 1,
                    found: row.len(),
                    expected: n,
                })
            }
            Some(_) => (),
            None => num_cols = Some(row.len()),
        }

        values.extend(row);
        num_rows += 1;
    }

    let num_cols = num_cols.ok_or_else(|| ArchiveError::Empty(path.to_path_buf()))?;

    // The shape is consistent by construction
    Array2::from_shape_vec((num_rows, num_cols), values)
        .map_err(|_| ArchiveError::Empty(path.to_path_buf()))
}

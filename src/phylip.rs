// phylip.rs

use crate::error::{DistanceError, Result};
use crate::transform::is_unknown;
use log::debug;
use ndarray::Array2;
use std::fmt::Display;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

/// Smallest positive distance written. Anything in `(0, SERIALIZATION_FLOOR)`
/// is raised to it so it survives six-decimal fixed-point output as nonzero.
pub const SERIALIZATION_FLOOR: f64 = 1e-6;

/// Unknown distances are written as this multiple of the largest finite distance.
pub const UNKNOWN_DISTANCE_FACTOR: f64 = 1.1;

/// Applies the unknown-distance substitution and the small-value floor.
#[inline]
pub fn resolve_distance(distance: f64, max_finite: f64) -> f64 {
    let value = if is_unknown(distance) {
        UNKNOWN_DISTANCE_FACTOR * max_finite
    } else {
        distance
    };
    // `+ 0.0` turns -0.0 into 0.0 so it is not printed with a sign.
    let value = value + 0.0;
    if value > 0.0 && value < SERIALIZATION_FLOOR {
        SERIALIZATION_FLOOR
    } else {
        value
    }
}

/// Writes a square distance matrix in the Phylip text format read by
/// distance-based tree builders: the dimension on the first line, then one
/// `<label> <v0> ... <vn-1>` line per row with six-decimal fixed-point values.
pub fn write_phylip<W: Write, L: Display>(
    writer: &mut W,
    matrix: &Array2<f64>,
    labels: &[L],
    max_finite: f64,
) -> Result<()> {
    let (n, cols) = matrix.dim();
    if n != cols {
        return Err(DistanceError::DimensionMismatch(format!(
            "Phylip matrices must be square, got {}x{}",
            n, cols
        )));
    }
    if labels.len() != n {
        return Err(DistanceError::DimensionMismatch(format!(
            "{} labels for a {}x{} matrix",
            labels.len(),
            n,
            n
        )));
    }

    writeln!(writer, "{}", n)?;
    for (label, row) in labels.iter().zip(matrix.rows()) {
        write!(writer, "{} ", label)?;
        for (j, &value) in row.iter().enumerate() {
            if j > 0 {
                write!(writer, " ")?;
            }
            write!(writer, "{:.6}", resolve_distance(value, max_finite))?;
        }
        writeln!(writer)?;
    }
    Ok(())
}

pub fn write_phylip_file<L: Display>(
    path: &Path,
    matrix: &Array2<f64>,
    labels: &[L],
    max_finite: f64,
) -> Result<()> {
    let mut writer = BufWriter::new(File::create(path)?);
    write_phylip(&mut writer, matrix, labels, max_finite)?;
    writer.flush()?;
    debug!("Wrote {}x{} distance matrix to {}", matrix.nrows(), matrix.ncols(), path.display());
    Ok(())
}

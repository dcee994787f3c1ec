// error.rs

use std::path::PathBuf;
use thiserror::Error;

/// Errors raised while building, transforming or writing distance matrices.
///
/// Numeric "no evidence" conditions are not errors; they are carried as
/// sentinel values and resolved before serialization. External tool failures
/// are not errors either; they are reported per unit by the command pipeline.
#[derive(Debug, Error)]
pub enum DistanceError {
    #[error("Malformed gene identifier '{input}': {reason}")]
    MalformedGeneId { input: String, reason: String },

    #[error("No score matrix available for species pair ({species_a}, {species_b})")]
    MissingScoreMatrix { species_a: usize, species_b: usize },

    #[error("Corrupt score matrix for species pair ({species_a}, {species_b}): {reason}")]
    CorruptScoreMatrix {
        species_a: usize,
        species_b: usize,
        reason: String,
    },

    #[error("Malformed orthogroups file {path} at line {line}: {reason}")]
    MalformedOrthogroups {
        path: PathBuf,
        line: usize,
        reason: String,
    },

    #[error("Malformed sequence id file {path} at line {line}: {reason}")]
    MalformedSequenceIds {
        path: PathBuf,
        line: usize,
        reason: String,
    },

    #[error("Dimension mismatch: {0}")]
    DimensionMismatch(String),

    #[error("Failed to allocate a {n}x{n} distance matrix for orthogroup {orthogroup}")]
    Allocation { orthogroup: usize, n: usize },

    #[error("A scatter worker panicked while processing species rows")]
    WorkerPanicked,

    #[error("The species work queue closed before all species were queued")]
    QueueClosed,

    #[error("Failed to build thread pool: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, DistanceError>;

// lib.rs

//! Orthogroup gene distance matrices and the species distance matrix derived
//! from them, written in Phylip format for an external distance tree builder.

pub mod error;
pub mod extremes;
pub mod orthogroups;
pub mod phylip;
pub mod pipeline;
pub mod scatter;
pub mod scores;
pub mod species;
pub mod transform;
pub mod workflow;

pub use error::{DistanceError, Result};
pub use orthogroups::{GeneId, Orthogroup, SpeciesSet};
pub use scores::{Blast6Scores, InMemoryScores, ScoreProvider};
pub use workflow::{run_analysis, AnalysisReport, OutputLayout, WorkflowOptions};

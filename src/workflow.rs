// workflow.rs

//! End-to-end distance analysis: scatter, finalize, write matrices, then hand
//! the written matrices to the external tree builder.

use crate::error::Result;
use crate::orthogroups::{Orthogroup, SpeciesSet};
use crate::phylip::write_phylip_file;
use crate::pipeline::{run_ordered, tree_command, PipelineOptions, PipelineSummary};
use crate::scatter::{build_all, BuilderOptions};
use crate::scores::ScoreProvider;
use crate::species::{aggregate_species_matrix, SpeciesDistances};
use crate::transform::{finalize_all, is_unknown};
use log::{info, warn};
use ndarray::Array2;
use rayon::prelude::*;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;

/// Fewest taxa for which a distance tree is built; smaller species sets get a star tree.
pub const MIN_TREE_TAXA: usize = 4;

/// Where matrices and trees are written.
#[derive(Clone, Debug)]
pub struct OutputLayout {
    root: PathBuf,
}

impl OutputLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn distances_dir(&self) -> PathBuf {
        self.root.join("Distances")
    }

    pub fn gene_trees_dir(&self) -> PathBuf {
        self.root.join("Gene_Trees")
    }

    pub fn orthogroup_matrix(&self, index: usize) -> PathBuf {
        self.distances_dir().join(format!("OG{:07}.phy", index))
    }

    pub fn gene_tree(&self, index: usize) -> PathBuf {
        self.gene_trees_dir().join(format!("OG{:07}_tree_id.txt", index))
    }

    pub fn species_matrix(&self) -> PathBuf {
        self.root.join("SpeciesMatrix.phy")
    }

    pub fn species_tree(&self) -> PathBuf {
        self.root.join("SpeciesTree_unrooted_ids.txt")
    }

    pub fn create_dirs(&self) -> Result<()> {
        fs::create_dir_all(self.distances_dir())?;
        fs::create_dir_all(self.gene_trees_dir())?;
        Ok(())
    }

    /// Creates only the root, for runs that write nothing per orthogroup.
    pub fn create_root(&self) -> Result<()> {
        fs::create_dir_all(&self.root)?;
        Ok(())
    }
}

#[derive(Clone, Debug)]
pub struct WorkflowOptions {
    pub builder: BuilderOptions,
    pub pipeline: PipelineOptions,
    pub tree_tool: String,
    /// Write the matrices and prepare the commands but do not run them.
    pub matrices_only: bool,
    /// Build only the species matrix and tree. No orthogroup matrices are
    /// written and no gene trees are scheduled.
    pub species_tree_only: bool,
}

impl Default for WorkflowOptions {
    fn default() -> Self {
        Self {
            builder: BuilderOptions::default(),
            pipeline: PipelineOptions::default(),
            tree_tool: "fastme".to_string(),
            matrices_only: false,
            species_tree_only: false,
        }
    }
}

#[derive(Debug)]
pub struct AnalysisReport {
    /// Written matrix per orthogroup, in input order. Empty for species-tree-only runs.
    pub orthogroup_matrices: Vec<PathBuf>,
    /// Gene trees scheduled, in input order.
    pub gene_trees: Vec<PathBuf>,
    /// Indices of orthogroups with no known distance between any two genes.
    /// Their matrices are written but no gene tree is built.
    pub skipped_orthogroups: Vec<usize>,
    /// `None` when the species tree is a star tree written directly.
    pub species_matrix: Option<PathBuf>,
    pub species_distances: Option<SpeciesDistances>,
    pub species_tree: PathBuf,
    /// Command units handed to the pipeline, species tree first when present.
    pub commands: Vec<Vec<String>>,
    /// `None` when only the matrices were requested.
    pub pipeline: Option<PipelineSummary>,
}

/// Unrooted star tree over every species, e.g. `(0,1,2);`.
pub fn star_tree(species: &SpeciesSet) -> String {
    let leaves: Vec<String> = species.iter().map(|s| s.to_string()).collect();
    format!("({});", leaves.join(","))
}

/// True when at least one pair of distinct genes has a known distance.
pub fn has_known_distance(matrix: &Array2<f64>) -> bool {
    matrix
        .indexed_iter()
        .any(|((i, j), d)| i != j && !is_unknown(*d))
}

pub fn run_analysis<P: ScoreProvider + ?Sized>(
    orthogroups: &[Orthogroup],
    species: &SpeciesSet,
    provider: &P,
    layout: &OutputLayout,
    options: &WorkflowOptions,
) -> Result<AnalysisReport> {
    let start = Instant::now();
    if options.species_tree_only {
        layout.create_root()?;
    } else {
        layout.create_dirs()?;
    }

    // --- 1. Gene distances ---
    let mut matrices = build_all(orthogroups, species, provider, &options.builder)?;
    let max_distances = finalize_all(&mut matrices)?;

    let mut orthogroup_matrices: Vec<PathBuf> = Vec::new();
    let mut gene_trees: Vec<PathBuf> = Vec::new();
    let mut skipped_orthogroups: Vec<usize> = Vec::new();
    let mut commands: Vec<Vec<String>> = Vec::new();
    if options.species_tree_only {
        info!("Species tree only, skipping orthogroup matrices and gene trees.");
    } else {
        orthogroup_matrices = orthogroups
            .par_iter()
            .zip(matrices.par_iter())
            .zip(max_distances.par_iter())
            .map(|((og, matrix), &max_finite)| {
                let path = layout.orthogroup_matrix(og.index());
                write_phylip_file(&path, matrix, &og.labels(), max_finite)?;
                Ok(path)
            })
            .collect::<Result<_>>()?;
        info!(
            "Wrote {} orthogroup distance matrices to {}",
            orthogroup_matrices.len(),
            layout.distances_dir().display()
        );

        for ((og, matrix), matrix_path) in orthogroups.iter().zip(&matrices).zip(&orthogroup_matrices) {
            if !has_known_distance(matrix) {
                warn!(
                    "No known distances in {}, skipping its gene tree.",
                    matrix_path.display()
                );
                skipped_orthogroups.push(og.index());
                continue;
            }
            let tree_path = layout.gene_tree(og.index());
            commands.push(vec![tree_command(&options.tree_tool, matrix_path, &tree_path, og.len())]);
            gene_trees.push(tree_path);
        }
    }

    // --- 2. Species distances ---
    let species_tree = layout.species_tree();
    let (species_matrix, species_distances) = if species.len() < MIN_TREE_TAXA {
        info!(
            "Only {} species, writing a star species tree to {}",
            species.len(),
            species_tree.display()
        );
        fs::write(&species_tree, format!("{}\n", star_tree(species)))?;
        (None, None)
    } else {
        let distances = aggregate_species_matrix(orthogroups, &matrices, species)?;
        let path = layout.species_matrix();
        write_phylip_file(&path, &distances.matrix, &distances.labels(), distances.max_finite)?;
        info!("Wrote species distance matrix to {}", path.display());
        commands.insert(
            0,
            vec![tree_command(&options.tree_tool, &path, &species_tree, species.len())],
        );
        (Some(path), Some(distances))
    };
    drop(matrices);

    // --- 3. Trees ---
    let pipeline = if options.matrices_only {
        info!("Skipping tree building, {} command units prepared.", commands.len());
        None
    } else {
        Some(run_ordered(&commands, &options.pipeline)?)
    };

    info!("Distance analysis finished in {:.2?}.", start.elapsed());
    Ok(AnalysisReport {
        orthogroup_matrices,
        gene_trees,
        skipped_orthogroups,
        species_matrix,
        species_distances,
        species_tree,
        commands,
        pipeline,
    })
}

// main.rs

// --- External Crate Imports ---
use anyhow::{anyhow, Error, Result};
use clap::Parser;
use dendro_distances::{
    orthogroups::{
        filter_min_genes, load_orthogroups, load_sequence_counts, merge_counts, restrict_to_species,
        sequence_counts,
    },
    pipeline::{check_tree_builder, PipelineOptions},
    scatter::BuilderOptions,
    Blast6Scores, OutputLayout, SpeciesSet, WorkflowOptions,
};
use indicatif::{ProgressBar, ProgressStyle};
use log::{debug, error, info, warn};
use std::{fs, time::Instant};

// --- Main Function ---
fn main() -> Result<(), Error> {
    let total_time_start = Instant::now();
    let cli_args = cli::CliArgs::parse();

    // Initialize logger
    let log_level = cli_args
        .log_level
        .parse::<log::LevelFilter>()
        .unwrap_or_else(|_| {
            eprintln!(
                "Warning: Invalid log level '{}' provided. Defaulting to Info.",
                cli_args.log_level
            );
            log::LevelFilter::Info
        });
    env_logger::Builder::new()
        .filter_level(log_level)
        .format_timestamp_micros()
        .init();

    info!("Starting dendro_distances with args: {:?}", cli_args);

    let num_threads = cli_args.threads.unwrap_or_else(num_cpus::get).max(1);
    info!("Using {} threads for parallel operations.", num_threads);
    rayon::ThreadPoolBuilder::new()
        .num_threads(num_threads)
        .build_global()?;

    // --- 1. Load Orthogroups & Species ---
    let all_orthogroups = load_orthogroups(&cli_args.orthogroups)?;
    if all_orthogroups.is_empty() {
        return Err(anyhow!(
            "No orthogroups found in {}",
            cli_args.orthogroups.display()
        ));
    }
    // Sized from every orthogroup, singletons included, before any filtering.
    let mut seq_counts = sequence_counts(&all_orthogroups);
    let sequence_ids = cli_args
        .sequence_ids
        .clone()
        .or_else(|| Some(cli_args.scores_dir.join("SequenceIDs.txt")).filter(|p| p.is_file()));
    if let Some(path) = &sequence_ids {
        info!("Reading sequence counts from {}", path.display());
        seq_counts = merge_counts(seq_counts, &load_sequence_counts(path)?);
    }

    let species = match &cli_args.species {
        Some(list) => SpeciesSet::new(list.iter().copied()),
        None => SpeciesSet::from_orthogroups(&all_orthogroups),
    };
    if species.len() < 2 {
        return Err(anyhow!(
            "At least two species are needed for distances, found {}.",
            species.len()
        ));
    }
    info!("Analysing {} species: {:?}", species.len(), species.as_slice());

    let orthogroups = filter_min_genes(
        restrict_to_species(all_orthogroups, &species),
        cli_args.min_genes,
    );
    if orthogroups.is_empty() {
        return Err(anyhow!(
            "No orthogroups with at least {} genes remain.",
            cli_args.min_genes
        ));
    }
    debug!(
        "Orthogroup sizes (first 5): {:?}",
        orthogroups.iter().take(5).map(|og| og.len()).collect::<Vec<_>>()
    );

    // --- 2. Check Tree Builder ---
    fs::create_dir_all(&cli_args.out)
        .map_err(|e| anyhow!("Failed to create output directory {}: {}", cli_args.out.display(), e))?;
    if !(cli_args.matrices_only || cli_args.skip_tool_check) {
        info!("Checking that '{}' can be run...", cli_args.tree_tool);
        if !check_tree_builder(&cli_args.tree_tool, &cli_args.out)? {
            return Err(anyhow!(
                "Cannot run '{}'. Check it is installed and on the PATH, or use --matrices-only.",
                cli_args.tree_tool
            ));
        }
    }

    // --- 3. Distances & Trees ---
    let style = ProgressStyle::default_bar()
        .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg} ({percent}%) ETA: {eta}")
        .map_err(|e| anyhow!("Failed to create progress bar style: {}", e))?
        .progress_chars("=> ");
    let pb_species = ProgressBar::new(species.len() as u64)
        .with_style(style.clone())
        .with_message("species");
    // Species tree unit plus one unit per orthogroup.
    let tree_units = if cli_args.species_tree_only { 1 } else { orthogroups.len() as u64 + 1 };
    let pb_trees = ProgressBar::new(tree_units)
        .with_style(style)
        .with_message("trees");

    let mut provider = Blast6Scores::new(&cli_args.scores_dir, seq_counts);
    if sequence_ids.is_none() {
        // Without a sequence listing, unclustered sequences are only known from the hits.
        provider.extend_counts_from_hits(&species)?;
    }
    let layout = OutputLayout::new(&cli_args.out);
    let options = WorkflowOptions {
        builder: BuilderOptions {
            workers: num_threads,
            include_within_species: cli_args.include_within_species,
            progress: Some(pb_species.clone()),
        },
        pipeline: PipelineOptions {
            max_parallel: num_threads,
            hide_stdout: true,
            progress: Some(pb_trees),
        },
        tree_tool: cli_args.tree_tool.clone(),
        matrices_only: cli_args.matrices_only,
        species_tree_only: cli_args.species_tree_only,
    };

    let report = dendro_distances::run_analysis(&orthogroups, &species, &provider, &layout, &options)?;
    pb_species.finish_and_clear();

    // --- 4. Write Summaries ---
    if let Some(distances) = &report.species_distances {
        output_writer::write_species_samples(&layout, distances)?;
    }
    match &report.pipeline {
        Some(summary) if summary.failures > 0 => {
            output_writer::write_failures(&layout, summary)?;
            error!(
                "{} of {} tree commands failed. See {}",
                summary.failures,
                report.commands.len(),
                output_writer::failures_path(&layout).display()
            );
        }
        Some(_) => info!("All {} tree commands completed.", report.commands.len()),
        None => {
            output_writer::write_commands(&layout, &report.commands)?;
            info!(
                "Tree commands written to {} without being run.",
                output_writer::commands_path(&layout).display()
            );
        }
    }
    if !report.skipped_orthogroups.is_empty() {
        warn!(
            "{} orthogroups had no known gene distances and got no gene tree.",
            report.skipped_orthogroups.len()
        );
    }
    if report.species_matrix.is_none() {
        warn!(
            "Fewer than 4 species: the species tree at {} is a star tree.",
            report.species_tree.display()
        );
    }

    info!(
        "dendro_distances finished in {:.2?}.",
        total_time_start.elapsed()
    );
    Ok(())
}

// --- Module Definitions ---

mod cli {
    use std::path::PathBuf;
    use clap::Parser; // For the derive macro to find Parser

    #[derive(Parser, Debug)]
    #[command(author, version, about = "Orthogroup and species distance matrices for distance tree building.", long_about = None, propagate_version = true)]
    pub(crate) struct CliArgs {
        /// Clusters file, one orthogroup of `<species>_<sequence>` ids per line.
        #[arg(short = 'g', long, required = true)]
        pub(crate) orthogroups: PathBuf,

        /// Directory holding `Blast{a}_{b}.txt` tabular hit files.
        #[arg(short = 'b', long = "scores-dir", required = true)]
        pub(crate) scores_dir: PathBuf,

        /// `<species>_<sequence>: name` listing of every sequence, clustered or not
        /// (default: `SequenceIDs.txt` in the scores directory, when present).
        #[arg(long)]
        pub(crate) sequence_ids: Option<PathBuf>,

        #[arg(short, long = "out", required = true)]
        pub(crate) out: PathBuf,

        /// Comma-separated species indices to analyse (default: every species present).
        #[arg(long, value_delimiter = ',')]
        pub(crate) species: Option<Vec<usize>>,

        #[arg(long, default_value_t = 4)]
        pub(crate) min_genes: usize,

        #[arg(short = 't', long)]
        pub(crate) threads: Option<usize>,

        #[arg(long, default_value = "fastme")]
        pub(crate) tree_tool: String,

        #[arg(long)]
        pub(crate) include_within_species: bool,

        /// Write distance matrices only; do not run the tree builder.
        #[arg(long)]
        pub(crate) matrices_only: bool,

        /// Build only the species matrix and species tree.
        #[arg(long)]
        pub(crate) species_tree_only: bool,

        #[arg(long)]
        pub(crate) skip_tool_check: bool,

        #[arg(long, default_value = "Info")]
        pub(crate) log_level: String,
    }
}

mod output_writer {
    use super::{anyhow, info, Result};
    use dendro_distances::{
        pipeline::{PipelineSummary, UnitOutcome},
        species::SpeciesDistances,
        OutputLayout,
    };
    use std::{
        fs::File,
        io::{BufWriter, Write},
        path::{Path, PathBuf},
    };

    fn create_output_file(path: &Path) -> Result<BufWriter<File>> {
        File::create(path)
            .map(BufWriter::new)
            .map_err(|e| anyhow!("Failed to create output file {}: {}", path.display(), e))
    }

    pub(crate) fn failures_path(layout: &OutputLayout) -> PathBuf {
        layout.root().join("FailedCommands.tsv")
    }

    pub(crate) fn commands_path(layout: &OutputLayout) -> PathBuf {
        layout.root().join("TreeCommands.txt")
    }

    pub(crate) fn write_species_samples(
        layout: &OutputLayout,
        distances: &SpeciesDistances,
    ) -> Result<()> {
        let path = layout.root().join("SpeciesPairSamples.tsv");
        let mut writer = create_output_file(&path)?;
        info!("Writing species pair sample counts to {}", path.display());

        writeln!(writer, "SpeciesA\tSpeciesB\tOrthogroups\tDistance")?;
        let ids = distances.species.as_slice();
        for (a, &sp_a) in ids.iter().enumerate() {
            for (b, &sp_b) in ids.iter().enumerate().skip(a + 1) {
                let d = distances.matrix[[a, b]];
                write!(writer, "{}\t{}\t{}\t", sp_a, sp_b, distances.sample_counts[[a, b]])?;
                if d.is_finite() {
                    writeln!(writer, "{:.6}", d)?;
                } else {
                    writeln!(writer, "NA")?;
                }
            }
        }
        writer.flush()?;
        Ok(())
    }

    pub(crate) fn write_failures(
        layout: &OutputLayout,
        summary: &PipelineSummary,
    ) -> Result<()> {
        let mut writer = create_output_file(&failures_path(layout))?;
        writeln!(writer, "Unit\tCommandIndex\tCommand\tMessage")?;
        for (unit, outcome) in summary.outcomes.iter().enumerate() {
            if let UnitOutcome::Failed {
                command_index,
                command,
                message,
            } = outcome
            {
                writeln!(
                    writer,
                    "{}\t{}\t{}\t{}",
                    unit,
                    command_index,
                    command,
                    message.replace(['\t', '\n'], " ")
                )?;
            }
        }
        writer.flush()?;
        Ok(())
    }

    pub(crate) fn write_commands(layout: &OutputLayout, commands: &[Vec<String>]) -> Result<()> {
        let mut writer = create_output_file(&commands_path(layout))?;
        for unit in commands {
            writeln!(writer, "{}", unit.join(" && "))?;
        }
        writer.flush()?;
        Ok(())
    }
}

// scatter.rs

//! Parallel construction of the raw (pre-transform) orthogroup distance matrices.
//!
//! Work is partitioned by *row species*: the unit of work for species `s` owns
//! every matrix row whose gene belongs to `s`, across all orthogroups. The rows
//! are split out of the preallocated matrices as disjoint mutable views before
//! any worker starts, so two workers can never alias the same cell and no
//! locking is needed while they write.

use crate::error::{DistanceError, Result};
use crate::extremes::RowExtremes;
use crate::orthogroups::{GeneId, Orthogroup, SpeciesSet};
use crate::scores::ScoreProvider;
use indicatif::ProgressBar;
use log::{debug, info};
use ndarray::{Array2, ArrayViewMut1, Axis};
use sprs::CsMat;
use std::collections::HashMap;
use std::thread;
use std::time::Instant;

#[derive(Clone, Debug)]
pub struct BuilderOptions {
    /// Number of scatter workers pulling species from the queue.
    pub workers: usize,
    /// Also score gene pairs from the same species using the (s, s) matrix.
    pub include_within_species: bool,
    pub progress: Option<ProgressBar>,
}

impl Default for BuilderOptions {
    fn default() -> Self {
        Self {
            workers: num_cpus::get(),
            include_within_species: false,
            progress: None,
        }
    }
}

/// One writable matrix row: gene `gene` at `position` within orthogroup `orthogroup`.
pub struct RowSlot<'a> {
    pub orthogroup: usize,
    pub position: usize,
    pub gene: GeneId,
    row: ArrayViewMut1<'a, f64>,
}

/// The exclusive write region of one row species.
pub struct SpeciesRows<'a> {
    pub species: usize,
    pub slots: Vec<RowSlot<'a>>,
}

/// Allocates one zeroed `n x n` matrix per orthogroup.
pub fn allocate_matrices(orthogroups: &[Orthogroup]) -> Result<Vec<Array2<f64>>> {
    orthogroups
        .iter()
        .enumerate()
        .map(|(og_pos, og)| {
            let n = og.len();
            let alloc_err = || DistanceError::Allocation { orthogroup: og.index(), n };
            let cells = n.checked_mul(n).ok_or_else(alloc_err)?;
            let mut data: Vec<f64> = Vec::new();
            data.try_reserve_exact(cells).map_err(|_| alloc_err())?;
            data.resize(cells, 0.0);
            Array2::from_shape_vec((n, n), data).map_err(|e| {
                DistanceError::DimensionMismatch(format!("orthogroup at position {}: {}", og_pos, e))
            })
        })
        .collect()
}

/// Splits every orthogroup matrix into rows and hands each row to the species
/// of its gene. Genes of species outside `species` get no owner; their rows
/// stay untouched.
pub fn partition_rows<'a>(
    orthogroups: &[Orthogroup],
    matrices: &'a mut [Array2<f64>],
    species: &SpeciesSet,
) -> Result<Vec<SpeciesRows<'a>>> {
    if orthogroups.len() != matrices.len() {
        return Err(DistanceError::DimensionMismatch(format!(
            "{} orthogroups but {} matrices",
            orthogroups.len(),
            matrices.len()
        )));
    }
    let mut regions: Vec<SpeciesRows<'a>> = species
        .iter()
        .map(|s| SpeciesRows { species: s, slots: Vec::new() })
        .collect();

    for (og_pos, (og, matrix)) in orthogroups.iter().zip(matrices.iter_mut()).enumerate() {
        if matrix.dim() != (og.len(), og.len()) {
            return Err(DistanceError::DimensionMismatch(format!(
                "orthogroup {} has {} genes but its matrix is {:?}",
                og.index(),
                og.len(),
                matrix.dim()
            )));
        }
        for (position, (row, gene)) in matrix.axis_iter_mut(Axis(0)).zip(og.genes()).enumerate() {
            if let Some(owner) = species.position(gene.species) {
                regions[owner].slots.push(RowSlot {
                    orthogroup: og_pos,
                    position,
                    gene: *gene,
                    row,
                });
            }
        }
    }
    Ok(regions)
}

/// Fetches the score matrices of row species `s` against every opponent and
/// the combined per-sequence row extremes.
fn fetch_opponents<P: ScoreProvider + ?Sized>(
    s: usize,
    species: &SpeciesSet,
    provider: &P,
    include_within_species: bool,
) -> Result<Option<(HashMap<usize, CsMat<f64>>, RowExtremes)>> {
    let mut opponents: HashMap<usize, CsMat<f64>> = HashMap::with_capacity(species.len());
    let mut extremes: Option<RowExtremes> = None;

    for t in species.iter() {
        if t == s && !include_within_species {
            continue;
        }
        let scores = provider.scores(s, t, false)?;
        let scores = if scores.is_csr() { scores } else { scores.to_csr() };
        let scanned = RowExtremes::scan(&scores);
        extremes = Some(match extremes.take() {
            None => scanned,
            Some(mut combined) => {
                if combined.len() != scanned.len() {
                    return Err(DistanceError::CorruptScoreMatrix {
                        species_a: s,
                        species_b: t,
                        reason: format!(
                            "{} rows, but other matrices for species {} have {}",
                            scanned.len(),
                            s,
                            combined.len()
                        ),
                    });
                }
                combined.combine(&scanned);
                combined
            }
        });
        opponents.insert(t, scores);
    }
    Ok(extremes.map(|e| (opponents, e)))
}

/// Fills the rows owned by one species.
///
/// For a row gene `g` (sequence `i` of species `s`) and every other gene `g'`
/// of an opposing species `t` at position `j`:
/// `M[pos(g)][j] = 0.5 * max(B_st[i, seq(g')], min_s[i]) / max_s[i]`.
/// Rows whose sequence never scored above zero are left unset.
pub fn scatter_species_rows<P: ScoreProvider + ?Sized>(
    region: &mut SpeciesRows<'_>,
    orthogroups: &[Orthogroup],
    species: &SpeciesSet,
    provider: &P,
    include_within_species: bool,
) -> Result<()> {
    let s = region.species;
    let Some((opponents, extremes)) = fetch_opponents(s, species, provider, include_within_species)? else {
        debug!("Species {} has no opposing species, nothing to scatter.", s);
        return Ok(());
    };

    for slot in region.slots.iter_mut() {
        let i_seq = slot.gene.sequence;
        if i_seq >= extremes.len() {
            return Err(DistanceError::CorruptScoreMatrix {
                species_a: s,
                species_b: s,
                reason: format!("gene {} is beyond the {} scored sequences", slot.gene, extremes.len()),
            });
        }
        if !extremes.has_data(i_seq) {
            continue;
        }
        let (row_min, row_max) = (extremes.mins[i_seq], extremes.maxes[i_seq]);

        for (j, other) in orthogroups[slot.orthogroup].genes().iter().enumerate() {
            if j == slot.position {
                continue;
            }
            let Some(scores) = opponents.get(&other.species) else {
                continue;
            };
            if other.sequence >= scores.cols() {
                return Err(DistanceError::CorruptScoreMatrix {
                    species_a: s,
                    species_b: other.species,
                    reason: format!("gene {} is beyond the {} scored sequences", other, scores.cols()),
                });
            }
            let raw = scores.get(i_seq, other.sequence).copied().unwrap_or(0.0);
            slot.row[j] = 0.5 * raw.max(row_min) / row_max;
        }
    }
    Ok(())
}

/// Queues every species region once. The sender is dropped on return, so
/// workers draining the receiver stop once the queue is empty.
fn queue_regions(regions: Vec<SpeciesRows<'_>>) -> Result<flume::Receiver<SpeciesRows<'_>>> {
    let (sender, receiver) = flume::unbounded();
    for region in regions {
        sender.send(region).map_err(|_| DistanceError::QueueClosed)?;
    }
    Ok(receiver)
}

/// Builds the partially filled matrix of every orthogroup.
///
/// Species are queued once each and drained by a bounded pool of scoped
/// worker threads. The call returns only after the queue is empty and every
/// worker has finished, so callers never observe a matrix mid-scatter.
pub fn build_all<P: ScoreProvider + ?Sized>(
    orthogroups: &[Orthogroup],
    species: &SpeciesSet,
    provider: &P,
    options: &BuilderOptions,
) -> Result<Vec<Array2<f64>>> {
    let start = Instant::now();
    let mut matrices = allocate_matrices(orthogroups)?;
    {
        let regions = partition_rows(orthogroups, &mut matrices, species)?;
        let n_workers = options.workers.max(1).min(regions.len().max(1));
        info!(
            "Scattering scores for {} species into {} orthogroup matrices using {} workers...",
            regions.len(),
            orthogroups.len(),
            n_workers
        );

        let receiver = queue_regions(regions)?;

        let include_within = options.include_within_species;
        let progress = options.progress.as_ref();
        thread::scope(|scope| {
            let handles: Vec<_> = (0..n_workers)
                .map(|_| {
                    let receiver = receiver.clone();
                    scope.spawn(move || -> Result<()> {
                        for mut region in receiver.iter() {
                            let species_start = Instant::now();
                            scatter_species_rows(&mut region, orthogroups, species, provider, include_within)?;
                            debug!(
                                "Species {}: {} rows scattered in {:.2?}",
                                region.species,
                                region.slots.len(),
                                species_start.elapsed()
                            );
                            if let Some(pb) = progress {
                                pb.inc(1);
                            }
                        }
                        Ok(())
                    })
                })
                .collect();

            let mut first_error: Option<DistanceError> = None;
            for handle in handles {
                let outcome = handle.join().unwrap_or(Err(DistanceError::WorkerPanicked));
                if let Err(e) = outcome {
                    first_error.get_or_insert(e);
                }
            }
            first_error.map_or(Ok(()), Err)
        })?;
    }
    info!("Scatter phase finished in {:.2?}.", start.elapsed());
    Ok(matrices)
}

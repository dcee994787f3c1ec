// species.rs

use crate::error::{DistanceError, Result};
use crate::orthogroups::{Orthogroup, SpeciesSet};
use crate::transform::{is_unknown, UNKNOWN_DISTANCE};
use log::{debug, info, warn};
use ndarray::Array2;
use rayon::prelude::*;
use statrs::statistics::{Data, Median};

/// Species-by-species distances aggregated over orthogroups.
#[derive(Clone, Debug)]
pub struct SpeciesDistances {
    pub species: SpeciesSet,
    /// Median of the per-orthogroup minimum distances; `UNKNOWN_DISTANCE`
    /// where no orthogroup contains both species.
    pub matrix: Array2<f64>,
    /// Number of orthogroups contributing to each pair.
    pub sample_counts: Array2<usize>,
    pub max_finite: f64,
}

impl SpeciesDistances {
    pub fn labels(&self) -> Vec<String> {
        self.species.iter().map(|s| s.to_string()).collect()
    }
}

/// Median with even-length interpolation, `None` for an empty sample.
pub fn median(samples: Vec<f64>) -> Option<f64> {
    if samples.is_empty() {
        return None;
    }
    Some(Data::new(samples).median())
}

/// Smallest known distance between a gene of one species and a gene of the
/// other within a single orthogroup.
fn closest_pair(matrix: &Array2<f64>, rows: &[usize], cols: &[usize]) -> Option<f64> {
    rows.iter()
        .flat_map(|&i| cols.iter().map(move |&j| matrix[[i, j]]))
        .filter(|d| !is_unknown(*d))
        .min_by(f64::total_cmp)
}

/// Per species pair (in `species.pairs()` order), the list of per-orthogroup
/// minimum distances. Orthogroups without both species contribute nothing.
pub fn species_pair_samples(
    orthogroups: &[Orthogroup],
    matrices: &[Array2<f64>],
    species: &SpeciesSet,
) -> Result<Vec<((usize, usize), Vec<f64>)>> {
    if orthogroups.len() != matrices.len() {
        return Err(DistanceError::DimensionMismatch(format!(
            "{} orthogroups but {} finalized matrices",
            orthogroups.len(),
            matrices.len()
        )));
    }
    let pairs = species.pairs();
    let n = species.len();

    let per_orthogroup: Vec<Vec<Option<f64>>> = orthogroups
        .par_iter()
        .zip(matrices.par_iter())
        .map(|(og, m)| {
            let positions: Vec<Vec<usize>> = species.iter().map(|s| og.positions_of(s)).collect();
            // Same (a, b) order as `species.pairs()`.
            (0..n)
                .flat_map(|a| (a + 1..n).map(move |b| (a, b)))
                .map(|(a, b)| closest_pair(m, &positions[a], &positions[b]))
                .collect()
        })
        .collect();

    let mut samples: Vec<Vec<f64>> = vec![Vec::new(); pairs.len()];
    for minima in per_orthogroup {
        for (sample, minimum) in samples.iter_mut().zip(minima) {
            if let Some(d) = minimum {
                sample.push(d);
            }
        }
    }
    Ok(pairs.into_iter().zip(samples).collect())
}

/// Aggregates finalized orthogroup matrices into one species distance matrix.
pub fn aggregate_species_matrix(
    orthogroups: &[Orthogroup],
    matrices: &[Array2<f64>],
    species: &SpeciesSet,
) -> Result<SpeciesDistances> {
    info!(
        "Aggregating species distances over {} orthogroups for {} species...",
        orthogroups.len(),
        species.len()
    );
    let n = species.len();
    let mut matrix = Array2::<f64>::zeros((n, n));
    let mut sample_counts = Array2::<usize>::zeros((n, n));
    let mut max_finite = 0.0_f64;

    for ((s, t), sample) in species_pair_samples(orthogroups, matrices, species)? {
        let (Some(a), Some(b)) = (species.position(s), species.position(t)) else {
            continue;
        };
        let count = sample.len();
        let distance = match median(sample) {
            Some(d) => {
                max_finite = max_finite.max(d);
                d
            }
            None => {
                warn!("Species {} and {} share no orthogroup with a known distance.", s, t);
                UNKNOWN_DISTANCE
            }
        };
        debug!("Species pair ({}, {}): median of {} samples = {}", s, t, count, distance);
        matrix[[a, b]] = distance;
        matrix[[b, a]] = distance;
        sample_counts[[a, b]] = count;
        sample_counts[[b, a]] = count;
    }

    Ok(SpeciesDistances {
        species: species.clone(),
        matrix,
        sample_counts,
        max_finite,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orthogroups::GeneId;
    use ndarray::array;

    fn og(index: usize, genes: &[(usize, usize)]) -> Orthogroup {
        Orthogroup::new(index, genes.iter().map(|&g| GeneId::from(g)).collect()).unwrap()
    }

    #[test]
    fn median_interpolates_even_samples() {
        let m = median(vec![0.9, 0.1, 0.5, 0.3]).unwrap();
        assert!((m - 0.4).abs() < 1e-12);
        assert_eq!(median(vec![0.2, 0.7, 0.1]), Some(0.2));
        assert_eq!(median(Vec::new()), None);
    }

    #[test]
    fn closest_pair_per_orthogroup_then_median() {
        let ogs = vec![
            og(0, &[(0, 0), (1, 0), (0, 1)]),
            og(1, &[(0, 2), (1, 1)]),
            og(2, &[(1, 2), (2, 0)]),
        ];
        let matrices = vec![
            array![[0.0, 0.8, 0.1], [0.8, 0.0, 0.3], [0.1, 0.3, 0.0]],
            array![[0.0, 0.5], [0.5, 0.0]],
            array![[0.0, 0.9], [0.9, 0.0]],
        ];
        let species = SpeciesSet::new([0, 1, 2]);

        let samples = species_pair_samples(&ogs, &matrices, &species).unwrap();
        assert_eq!(samples[0], ((0, 1), vec![0.3, 0.5]));
        assert_eq!(samples[1], ((0, 2), vec![]));
        assert_eq!(samples[2], ((1, 2), vec![0.9]));

        let agg = aggregate_species_matrix(&ogs, &matrices, &species).unwrap();
        assert!((agg.matrix[[0, 1]] - 0.4).abs() < 1e-12);
        assert_eq!(agg.matrix[[1, 0]], agg.matrix[[0, 1]]);
        assert_eq!(agg.matrix[[1, 2]], 0.9);
        assert!(is_unknown(agg.matrix[[0, 2]]));
        assert_eq!(agg.sample_counts[[0, 1]], 2);
        assert_eq!(agg.sample_counts[[2, 0]], 0);
        assert_eq!(agg.max_finite, 0.9);
        assert_eq!(agg.matrix[[2, 2]], 0.0);
        assert_eq!(agg.labels(), vec!["0", "1", "2"]);
    }

    #[test]
    fn unknown_gene_distances_do_not_count_as_samples() {
        let ogs = vec![og(0, &[(0, 0), (1, 0)]), og(1, &[(0, 1), (1, 1)])];
        let matrices = vec![
            array![[0.0, UNKNOWN_DISTANCE], [UNKNOWN_DISTANCE, 0.0]],
            array![[0.0, 0.25], [0.25, 0.0]],
        ];
        let species = SpeciesSet::new([0, 1]);
        let samples = species_pair_samples(&ogs, &matrices, &species).unwrap();
        assert_eq!(samples, vec![((0, 1), vec![0.25])]);
    }

    #[test]
    fn pairs_follow_species_set_order() {
        let ogs = vec![og(0, &[(1, 0), (2, 0), (0, 0), (2, 1)])];
        let matrices = vec![array![
            [0.0, 0.6, 0.2, 0.4],
            [0.6, 0.0, 0.7, 0.9],
            [0.2, 0.7, 0.0, 0.3],
            [0.4, 0.9, 0.3, 0.0],
        ]];
        let species = SpeciesSet::new([2, 0, 1]);
        let samples = species_pair_samples(&ogs, &matrices, &species).unwrap();
        assert_eq!(
            samples,
            vec![((2, 0), vec![0.3]), ((2, 1), vec![0.4]), ((0, 1), vec![0.2])]
        );
    }

    #[test]
    fn mismatched_inputs_are_rejected() {
        let ogs = vec![og(0, &[(0, 0), (1, 0)])];
        let species = SpeciesSet::new([0, 1]);
        assert!(aggregate_species_matrix(&ogs, &[], &species).is_err());
    }
}

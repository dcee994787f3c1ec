// scores.rs

use crate::error::{DistanceError, Result};
use crate::orthogroups::{grow_counts, merge_counts, GeneId, SpeciesSet};
use log::debug;
use sprs::{CsMat, TriMat};
use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

/// Source of raw pairwise similarity scores between the sequences of two species.
///
/// `scores(a, b, ..)` returns a sparse matrix of shape `(nSeqs(a), nSeqs(b))`
/// indexed by in-species sequence index. Scores are nonnegative and the matrix
/// for `(a, b)` is independent of the one for `(b, a)`. Repeated calls within
/// one run must return the same matrix.
pub trait ScoreProvider: Sync {
    fn scores(&self, species_a: usize, species_b: usize, exclude_self_hits: bool) -> Result<CsMat<f64>>;
}

fn drop_diagonal(matrix: &CsMat<f64>) -> CsMat<f64> {
    let mut tri = TriMat::new((matrix.rows(), matrix.cols()));
    for (&value, (row, col)) in matrix.iter() {
        if row != col {
            tri.add_triplet(row, col, value);
        }
    }
    tri.to_csr()
}

/// Score matrices held in memory, keyed by ordered species pair.
#[derive(Clone, Debug, Default)]
pub struct InMemoryScores {
    matrices: HashMap<(usize, usize), CsMat<f64>>,
}

impl InMemoryScores {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, species_a: usize, species_b: usize, matrix: CsMat<f64>) {
        self.matrices.insert((species_a, species_b), matrix);
    }

    pub fn len(&self) -> usize {
        self.matrices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.matrices.is_empty()
    }
}

impl ScoreProvider for InMemoryScores {
    fn scores(&self, species_a: usize, species_b: usize, exclude_self_hits: bool) -> Result<CsMat<f64>> {
        let matrix = self
            .matrices
            .get(&(species_a, species_b))
            .ok_or(DistanceError::MissingScoreMatrix { species_a, species_b })?;
        if exclude_self_hits && species_a == species_b {
            Ok(drop_diagonal(matrix))
        } else {
            Ok(matrix.clone())
        }
    }
}

/// Reads scores from BLAST tabular (outfmt 6) files named `Blast{a}_{b}.txt`.
///
/// Query and subject columns hold `<species>_<sequence>` ids and column 12
/// holds the bitscore. When a pair of sequences has several hits the best
/// bitscore is kept.
#[derive(Clone, Debug)]
pub struct Blast6Scores {
    dir: PathBuf,
    sequence_counts: Vec<usize>,
}

impl Blast6Scores {
    /// `sequence_counts[s]` is the number of sequences in species `s`.
    pub fn new(dir: impl Into<PathBuf>, sequence_counts: Vec<usize>) -> Self {
        Self {
            dir: dir.into(),
            sequence_counts,
        }
    }

    pub fn path_for(&self, species_a: usize, species_b: usize) -> PathBuf {
        self.dir.join(format!("Blast{}_{}.txt", species_a, species_b))
    }

    pub fn sequence_counts(&self) -> &[usize] {
        &self.sequence_counts
    }

    /// Widens the sequence counts to cover every query and hit named in the
    /// hit files between `species`, so sequences outside every orthogroup
    /// still fit the score matrices. Missing files are skipped here; fetching
    /// them fails later.
    pub fn extend_counts_from_hits(&mut self, species: &SpeciesSet) -> Result<()> {
        let mut seen: Vec<usize> = Vec::new();
        for a in species.iter() {
            for b in species.iter() {
                let path = self.path_for(a, b);
                if !path.is_file() {
                    continue;
                }
                let reader = BufReader::new(File::open(&path)?);
                for (line_idx, line_result) in reader.lines().enumerate() {
                    let line = line_result?;
                    if line.trim().is_empty() || line.starts_with('#') {
                        continue;
                    }
                    for id in line.split('\t').take(2) {
                        let gene: GeneId = id.parse().map_err(|e: DistanceError| DistanceError::CorruptScoreMatrix {
                            species_a: a,
                            species_b: b,
                            reason: format!("{} line {}: {}", path.display(), line_idx + 1, e),
                        })?;
                        grow_counts(&mut seen, gene);
                    }
                }
            }
        }
        let counts = std::mem::take(&mut self.sequence_counts);
        self.sequence_counts = merge_counts(counts, &seen);
        debug!("Sequence counts after scanning hits: {:?}", self.sequence_counts);
        Ok(())
    }

    fn count(&self, species: usize) -> usize {
        self.sequence_counts.get(species).copied().unwrap_or(0)
    }

    fn read_hits(
        &self,
        path: &Path,
        species_a: usize,
        species_b: usize,
        exclude_self_hits: bool,
    ) -> Result<HashMap<(usize, usize), f64>> {
        let corrupt = |line: usize, reason: String| DistanceError::CorruptScoreMatrix {
            species_a,
            species_b,
            reason: format!("{} line {}: {}", path.display(), line, reason),
        };
        let (n_rows, n_cols) = (self.count(species_a), self.count(species_b));
        let reader = BufReader::new(File::open(path)?);
        let mut best: HashMap<(usize, usize), f64> = HashMap::new();

        for (line_idx, line_result) in reader.lines().enumerate() {
            let line = line_result?;
            let line_num = line_idx + 1;
            if line.trim().is_empty() || line.starts_with('#') {
                continue;
            }
            let fields: Vec<&str> = line.split('\t').collect();
            if fields.len() < 12 {
                return Err(corrupt(line_num, format!("expected 12 tab-separated fields, found {}", fields.len())));
            }
            let query: GeneId = fields[0].parse().map_err(|e: DistanceError| corrupt(line_num, e.to_string()))?;
            let hit: GeneId = fields[1].parse().map_err(|e: DistanceError| corrupt(line_num, e.to_string()))?;
            if query.species != species_a || hit.species != species_b {
                return Err(corrupt(line_num, format!("hit {} -> {} does not belong to this species pair", query, hit)));
            }
            if query.sequence >= n_rows || hit.sequence >= n_cols {
                return Err(corrupt(
                    line_num,
                    format!("hit {} -> {} is outside the {}x{} score matrix", query, hit, n_rows, n_cols),
                ));
            }
            let bitscore: f64 = fields[11]
                .trim()
                .parse()
                .map_err(|e| corrupt(line_num, format!("bitscore '{}': {}", fields[11], e)))?;
            if !bitscore.is_finite() || bitscore < 0.0 {
                return Err(corrupt(line_num, format!("bitscore {} is not a nonnegative finite score", bitscore)));
            }
            if exclude_self_hits && query == hit {
                continue;
            }
            let entry = best.entry((query.sequence, hit.sequence)).or_insert(bitscore);
            if bitscore > *entry {
                *entry = bitscore;
            }
        }
        Ok(best)
    }
}

impl ScoreProvider for Blast6Scores {
    fn scores(&self, species_a: usize, species_b: usize, exclude_self_hits: bool) -> Result<CsMat<f64>> {
        let path = self.path_for(species_a, species_b);
        if !path.is_file() {
            return Err(DistanceError::MissingScoreMatrix { species_a, species_b });
        }
        let hits = self.read_hits(&path, species_a, species_b, exclude_self_hits)?;
        debug!("Read {} scored pairs from {}", hits.len(), path.display());

        let mut tri = TriMat::with_capacity((self.count(species_a), self.count(species_b)), hits.len());
        for ((row, col), score) in hits {
            tri.add_triplet(row, col, score);
        }
        Ok(tri.to_csr())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn blast_line(query: &str, hit: &str, bitscore: f64) -> String {
        format!("{}\t{}\t90.0\t100\t10\t0\t1\t100\t1\t100\t1e-30\t{}\n", query, hit, bitscore)
    }

    #[test]
    fn in_memory_missing_pair_is_an_error() {
        let scores = InMemoryScores::new();
        assert!(matches!(
            scores.scores(0, 1, false),
            Err(DistanceError::MissingScoreMatrix { species_a: 0, species_b: 1 })
        ));
    }

    #[test]
    fn in_memory_excludes_self_hits_only_within_species() {
        let mut tri = TriMat::new((2, 2));
        tri.add_triplet(0, 0, 50.0);
        tri.add_triplet(0, 1, 20.0);
        let matrix: CsMat<f64> = tri.to_csr();
        let mut scores = InMemoryScores::new();
        scores.insert(0, 0, matrix.clone());
        scores.insert(0, 1, matrix);

        let within = scores.scores(0, 0, true).unwrap();
        assert_eq!(within.get(0, 0), None);
        assert_eq!(within.get(0, 1), Some(&20.0));
        let between = scores.scores(0, 1, true).unwrap();
        assert_eq!(between.get(0, 0), Some(&50.0));
    }

    #[test]
    fn blast6_keeps_best_hit_per_pair() {
        let dir = tempfile::tempdir().unwrap();
        let body = [
            blast_line("0_0", "1_1", 40.0),
            blast_line("0_0", "1_1", 55.5),
            blast_line("0_1", "1_0", 12.0),
        ]
        .concat();
        fs::write(dir.path().join("Blast0_1.txt"), body).unwrap();

        let provider = Blast6Scores::new(dir.path(), vec![2, 2]);
        let m = provider.scores(0, 1, false).unwrap();
        assert_eq!((m.rows(), m.cols()), (2, 2));
        assert_eq!(m.get(0, 1), Some(&55.5));
        assert_eq!(m.get(1, 0), Some(&12.0));
        assert_eq!(m.get(0, 0), None);
    }

    #[test]
    fn blast6_drops_self_hits_when_asked() {
        let dir = tempfile::tempdir().unwrap();
        let body = [blast_line("0_0", "0_0", 99.0), blast_line("0_0", "0_1", 30.0)].concat();
        fs::write(dir.path().join("Blast0_0.txt"), body).unwrap();

        let provider = Blast6Scores::new(dir.path(), vec![2]);
        let m = provider.scores(0, 0, true).unwrap();
        assert_eq!(m.get(0, 0), None);
        assert_eq!(m.get(0, 1), Some(&30.0));
        let kept = provider.scores(0, 0, false).unwrap();
        assert_eq!(kept.get(0, 0), Some(&99.0));
    }

    #[test]
    fn hits_on_unclustered_sequences_widen_the_matrix() {
        let dir = tempfile::tempdir().unwrap();
        let body = [blast_line("0_0", "1_0", 40.0), blast_line("0_1", "1_0", 25.0)].concat();
        fs::write(dir.path().join("Blast0_1.txt"), body).unwrap();
        fs::write(dir.path().join("Blast1_0.txt"), blast_line("1_0", "0_0", 38.0)).unwrap();

        // Clustering only saw 0_0 and 1_0.
        let mut provider = Blast6Scores::new(dir.path(), vec![1, 1]);
        assert!(matches!(
            provider.scores(0, 1, false),
            Err(DistanceError::CorruptScoreMatrix { .. })
        ));

        provider.extend_counts_from_hits(&SpeciesSet::new([0, 1])).unwrap();
        assert_eq!(provider.sequence_counts(), &[2, 1]);
        let forward = provider.scores(0, 1, false).unwrap();
        assert_eq!((forward.rows(), forward.cols()), (2, 1));
        assert_eq!(forward.get(1, 0), Some(&25.0));
        let reverse = provider.scores(1, 0, false).unwrap();
        assert_eq!((reverse.rows(), reverse.cols()), (1, 2));
    }

    #[test]
    fn blast6_missing_and_corrupt_files() {
        let dir = tempfile::tempdir().unwrap();
        let provider = Blast6Scores::new(dir.path(), vec![1, 1]);
        assert!(matches!(
            provider.scores(1, 0, false),
            Err(DistanceError::MissingScoreMatrix { .. })
        ));

        fs::write(dir.path().join("Blast0_1.txt"), blast_line("0_0", "1_5", 10.0)).unwrap();
        assert!(matches!(
            provider.scores(0, 1, false),
            Err(DistanceError::CorruptScoreMatrix { .. })
        ));

        fs::write(dir.path().join("Blast1_0.txt"), "1_0\t0_0\tshort\n").unwrap();
        assert!(matches!(
            provider.scores(1, 0, false),
            Err(DistanceError::CorruptScoreMatrix { .. })
        ));
    }
}

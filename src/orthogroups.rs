// orthogroups.rs

use crate::error::{DistanceError, Result};
use log::{debug, info};
use std::collections::BTreeSet;
use std::fmt;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use std::str::FromStr;

/// A gene identified by its species index and its sequence index within that species.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct GeneId {
    pub species: usize,
    pub sequence: usize,
}

impl GeneId {
    pub fn new(species: usize, sequence: usize) -> Self {
        Self { species, sequence }
    }

    /// Builds a gene from separately supplied species and sequence fields.
    pub fn from_parts(species: &str, sequence: &str) -> Result<Self> {
        let malformed = |reason: String| DistanceError::MalformedGeneId {
            input: format!("({}, {})", species, sequence),
            reason,
        };
        let species = species
            .trim()
            .parse::<usize>()
            .map_err(|e| malformed(format!("species field: {}", e)))?;
        let sequence = sequence
            .trim()
            .parse::<usize>()
            .map_err(|e| malformed(format!("sequence field: {}", e)))?;
        Ok(Self { species, sequence })
    }
}

impl FromStr for GeneId {
    type Err = DistanceError;

    /// Parses the compact `"<species>_<sequence>"` form.
    fn from_str(s: &str) -> Result<Self> {
        let (species, sequence) = s.split_once('_').ok_or_else(|| DistanceError::MalformedGeneId {
            input: s.to_string(),
            reason: "expected '<species>_<sequence>'".to_string(),
        })?;
        if sequence.contains('_') {
            return Err(DistanceError::MalformedGeneId {
                input: s.to_string(),
                reason: "more than one '_' separator".to_string(),
            });
        }
        Self::from_parts(species, sequence).map_err(|e| match e {
            DistanceError::MalformedGeneId { reason, .. } => DistanceError::MalformedGeneId {
                input: s.to_string(),
                reason,
            },
            other => other,
        })
    }
}

impl From<(usize, usize)> for GeneId {
    fn from((species, sequence): (usize, usize)) -> Self {
        Self::new(species, sequence)
    }
}

impl fmt::Display for GeneId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}", self.species, self.sequence)
    }
}

/// An ordered, immutable group of putatively related genes.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Orthogroup {
    index: usize,
    genes: Vec<GeneId>,
}

impl Orthogroup {
    pub fn new(index: usize, genes: Vec<GeneId>) -> Result<Self> {
        if genes.is_empty() {
            return Err(DistanceError::DimensionMismatch(format!(
                "orthogroup {} has no genes",
                index
            )));
        }
        Ok(Self { index, genes })
    }

    /// Creation-order index of this orthogroup in the clustering result.
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn genes(&self) -> &[GeneId] {
        &self.genes
    }

    pub fn len(&self) -> usize {
        self.genes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.genes.is_empty()
    }

    pub fn labels(&self) -> Vec<String> {
        self.genes.iter().map(GeneId::to_string).collect()
    }

    /// Positions within this orthogroup of the genes belonging to `species`.
    pub fn positions_of(&self, species: usize) -> Vec<usize> {
        self.genes
            .iter()
            .enumerate()
            .filter(|(_, g)| g.species == species)
            .map(|(i, _)| i)
            .collect()
    }
}

/// The ordered species participating in one run.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SpeciesSet {
    species: Vec<usize>,
}

impl SpeciesSet {
    /// Keeps the first occurrence of each species, preserving order.
    pub fn new(species: impl IntoIterator<Item = usize>) -> Self {
        let mut seen = BTreeSet::new();
        let species = species.into_iter().filter(|s| seen.insert(*s)).collect();
        Self { species }
    }

    pub fn from_orthogroups(orthogroups: &[Orthogroup]) -> Self {
        let present: BTreeSet<usize> = orthogroups
            .iter()
            .flat_map(|og| og.genes().iter().map(|g| g.species))
            .collect();
        Self::new(present)
    }

    pub fn position(&self, species: usize) -> Option<usize> {
        self.species.iter().position(|&s| s == species)
    }

    pub fn contains(&self, species: usize) -> bool {
        self.position(species).is_some()
    }

    pub fn as_slice(&self) -> &[usize] {
        &self.species
    }

    pub fn iter(&self) -> impl Iterator<Item = usize> + '_ {
        self.species.iter().copied()
    }

    pub fn len(&self) -> usize {
        self.species.len()
    }

    pub fn is_empty(&self) -> bool {
        self.species.is_empty()
    }

    /// Every unordered species pair `(s, t)` with `s` listed before `t`.
    pub fn pairs(&self) -> Vec<(usize, usize)> {
        let mut pairs = Vec::with_capacity(self.len() * self.len().saturating_sub(1) / 2);
        for (i, &s) in self.species.iter().enumerate() {
            for &t in &self.species[i + 1..] {
                pairs.push((s, t));
            }
        }
        pairs
    }
}

/// Parses one line of a clusters file into gene ids.
/// Accepts an optional `"<name>:"` prefix and whitespace or comma separators.
fn parse_orthogroup_line(line: &str) -> Result<Vec<GeneId>> {
    let body = match line.split_once(':') {
        Some((_, rest)) => rest,
        None => line,
    };
    body.split(|c: char| c.is_whitespace() || c == ',')
        .filter(|tok| !tok.is_empty())
        .map(str::parse::<GeneId>)
        .collect()
}

/// Reads orthogroups from a clusters file, one orthogroup per line.
pub fn load_orthogroups(path: &Path) -> Result<Vec<Orthogroup>> {
    info!("Reading orthogroups from {}", path.display());
    let reader = BufReader::new(File::open(path)?);
    let mut orthogroups = Vec::new();
    for (line_num, line_result) in reader.lines().enumerate() {
        let line = line_result?;
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        let genes = parse_orthogroup_line(trimmed).map_err(|e| DistanceError::MalformedOrthogroups {
            path: path.to_path_buf(),
            line: line_num + 1,
            reason: e.to_string(),
        })?;
        if genes.is_empty() {
            debug!("Line {} of {} lists no genes, skipping.", line_num + 1, path.display());
            continue;
        }
        let index = orthogroups.len();
        orthogroups.push(Orthogroup::new(index, genes)?);
    }
    info!("Loaded {} orthogroups.", orthogroups.len());
    Ok(orthogroups)
}

/// Number of sequences per species implied by the genes seen, indexed by species.
pub fn sequence_counts(orthogroups: &[Orthogroup]) -> Vec<usize> {
    let mut counts: Vec<usize> = Vec::new();
    for gene in orthogroups.iter().flat_map(|og| og.genes()) {
        grow_counts(&mut counts, *gene);
    }
    counts
}

/// Reads per-species sequence counts from a sequence id listing, one
/// `<species>_<sequence>: <name>` line per sequence. Sequences that belong
/// to no orthogroup still count, so score matrices get their full shape.
pub fn load_sequence_counts(path: &Path) -> Result<Vec<usize>> {
    info!("Reading sequence ids from {}", path.display());
    let reader = BufReader::new(File::open(path)?);
    let mut counts: Vec<usize> = Vec::new();
    for (line_num, line_result) in reader.lines().enumerate() {
        let line = line_result?;
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        let id = trimmed.split_once(':').map_or(trimmed, |(id, _)| id).trim();
        let gene: GeneId = id.parse().map_err(|e: DistanceError| DistanceError::MalformedSequenceIds {
            path: path.to_path_buf(),
            line: line_num + 1,
            reason: e.to_string(),
        })?;
        grow_counts(&mut counts, gene);
    }
    debug!("Sequence counts per species: {:?}", counts);
    Ok(counts)
}

pub(crate) fn grow_counts(counts: &mut Vec<usize>, gene: GeneId) {
    if gene.species >= counts.len() {
        counts.resize(gene.species + 1, 0);
    }
    counts[gene.species] = counts[gene.species].max(gene.sequence + 1);
}

/// Elementwise maximum of two per-species count lists.
pub fn merge_counts(mut counts: Vec<usize>, other: &[usize]) -> Vec<usize> {
    if other.len() > counts.len() {
        counts.resize(other.len(), 0);
    }
    for (mine, &theirs) in counts.iter_mut().zip(other) {
        *mine = (*mine).max(theirs);
    }
    counts
}

/// Keeps orthogroups with at least `min_genes` genes. Indices are preserved.
pub fn filter_min_genes(orthogroups: Vec<Orthogroup>, min_genes: usize) -> Vec<Orthogroup> {
    let before = orthogroups.len();
    let kept: Vec<Orthogroup> = orthogroups
        .into_iter()
        .filter(|og| og.len() >= min_genes)
        .collect();
    info!(
        "{} / {} orthogroups have at least {} genes.",
        kept.len(),
        before,
        min_genes
    );
    kept
}

/// Drops genes of species outside `species`. Orthogroups left without genes
/// are removed; the rest keep their indices.
pub fn restrict_to_species(orthogroups: Vec<Orthogroup>, species: &SpeciesSet) -> Vec<Orthogroup> {
    orthogroups
        .into_iter()
        .filter_map(|mut og| {
            og.genes.retain(|g| species.contains(g.species));
            (!og.genes.is_empty()).then_some(og)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn parses_compact_gene_id() {
        let gene: GeneId = "3_17".parse().unwrap();
        assert_eq!(gene, GeneId::new(3, 17));
        assert_eq!(gene.to_string(), "3_17");
    }

    #[test]
    fn gene_from_numeric_pair_and_string_parts() {
        assert_eq!(GeneId::from((2, 5)), GeneId::new(2, 5));
        assert_eq!(GeneId::from_parts("2", " 5").unwrap(), GeneId::new(2, 5));
    }

    #[test]
    fn rejects_malformed_gene_ids() {
        for bad in ["", "3", "a_1", "1_b", "1_2_3", "-1_2"] {
            match bad.parse::<GeneId>() {
                Err(DistanceError::MalformedGeneId { input, .. }) => assert_eq!(input, bad),
                other => panic!("expected MalformedGeneId for {:?}, got {:?}", bad, other),
            }
        }
        assert!(GeneId::from_parts("x", "1").is_err());
    }

    #[test]
    fn orthogroup_positions_by_species() {
        let og = Orthogroup::new(
            0,
            vec![GeneId::new(0, 1), GeneId::new(1, 0), GeneId::new(0, 4)],
        )
        .unwrap();
        assert_eq!(og.positions_of(0), vec![0, 2]);
        assert_eq!(og.positions_of(1), vec![1]);
        assert!(og.positions_of(7).is_empty());
        assert_eq!(og.labels(), vec!["0_1", "1_0", "0_4"]);
        assert!(Orthogroup::new(1, Vec::new()).is_err());
    }

    #[test]
    fn species_set_dedups_and_pairs() {
        let set = SpeciesSet::new([2, 0, 2, 5]);
        assert_eq!(set.as_slice(), &[2, 0, 5]);
        assert_eq!(set.position(5), Some(2));
        assert_eq!(set.pairs(), vec![(2, 0), (2, 5), (0, 5)]);
    }

    #[test]
    fn restricting_species_keeps_indices() {
        let ogs = vec![
            Orthogroup::new(0, vec![GeneId::new(0, 0), GeneId::new(3, 0)]).unwrap(),
            Orthogroup::new(1, vec![GeneId::new(3, 1)]).unwrap(),
            Orthogroup::new(2, vec![GeneId::new(1, 0), GeneId::new(0, 2)]).unwrap(),
        ];
        let kept = restrict_to_species(ogs, &SpeciesSet::new([0, 1]));
        assert_eq!(kept.len(), 2);
        assert_eq!(kept[0].genes(), &[GeneId::new(0, 0)]);
        assert_eq!(kept[1].index(), 2);
        assert_eq!(kept[1].len(), 2);
    }

    #[test]
    fn loads_clusters_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "# clusters").unwrap();
        writeln!(file, "OG0000000: 0_0 1_0, 2_3").unwrap();
        writeln!(file).unwrap();
        writeln!(file, "0_1").unwrap();
        file.flush().unwrap();

        let ogs = load_orthogroups(file.path()).unwrap();
        assert_eq!(ogs.len(), 2);
        assert_eq!(ogs[0].index(), 0);
        assert_eq!(ogs[0].len(), 3);
        assert_eq!(ogs[1].genes(), &[GeneId::new(0, 1)]);
        assert_eq!(sequence_counts(&ogs), vec![2, 1, 4]);

        let big = filter_min_genes(ogs, 2);
        assert_eq!(big.len(), 1);
        assert_eq!(big[0].index(), 0);
    }

    #[test]
    fn sequence_ids_cover_unclustered_sequences() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "0_0: geneA").unwrap();
        writeln!(file, "0_1: geneB").unwrap();
        writeln!(file, "0_2: geneC").unwrap();
        writeln!(file, "1_0: geneD").unwrap();
        file.flush().unwrap();

        let counts = load_sequence_counts(file.path()).unwrap();
        assert_eq!(counts, vec![3, 1]);
        assert_eq!(merge_counts(counts, &[1, 4, 2]), vec![3, 4, 2]);
    }

    #[test]
    fn malformed_sequence_id_reports_line_number() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "0_0: ok").unwrap();
        writeln!(file, "zero: bad").unwrap();
        file.flush().unwrap();
        match load_sequence_counts(file.path()) {
            Err(DistanceError::MalformedSequenceIds { line, .. }) => assert_eq!(line, 2),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn malformed_clusters_line_reports_line_number() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "0_0 1_0").unwrap();
        writeln!(file, "0_1 oops").unwrap();
        file.flush().unwrap();
        match load_orthogroups(file.path()) {
            Err(DistanceError::MalformedOrthogroups { line, .. }) => assert_eq!(line, 2),
            other => panic!("unexpected {:?}", other),
        }
    }
}

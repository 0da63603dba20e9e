use config::Strand;
use serde::{Deserialize, Serialize};

use crate::record::{span_of, RefTranscript, Transcript};

/// One gene locus, either seeded from the reference annotation or created
/// for reads no annotated locus claimed.
///
/// A gene carries the reference transcripts of its annotated locus (empty
/// for novel genes) and the expressed transcripts reconstructed from reads.
/// Merged genes stay in the arena as tombstones pointing at their absorber,
/// so indices handed out earlier stay resolvable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Gene {
    pub id: String,
    pub name: Option<String>,
    pub chrom: String,
    pub strand: Strand,
    pub start: u64,
    pub end: u64,
    pub transcripts: Vec<Transcript>,
    pub ref_transcripts: Vec<RefTranscript>,
    pub is_reference: bool,
    pub merged_into: Option<usize>,
}

impl Gene {
    /// A locus created for an unassignable read; the span is the read span.
    pub fn new_novel(id: String, chrom: &str, strand: Strand, start: u64, end: u64) -> Self {
        Self {
            id,
            name: None,
            chrom: chrom.to_string(),
            strand,
            start,
            end,
            transcripts: Vec::new(),
            ref_transcripts: Vec::new(),
            is_reference: false,
            merged_into: None,
        }
    }

    /// A locus seeded from an annotation gene entry. The span starts empty
    /// and grows as reference transcripts arrive.
    pub fn from_reference(
        gene_id: String,
        gene_name: Option<String>,
        chrom: &str,
        strand: Strand,
    ) -> Self {
        Self {
            id: gene_id,
            name: gene_name,
            chrom: chrom.to_string(),
            strand,
            start: u64::MAX,
            end: 0,
            transcripts: Vec::new(),
            ref_transcripts: Vec::new(),
            is_reference: true,
            merged_into: None,
        }
    }

    pub fn span(&self) -> (u64, u64) {
        (self.start, self.end)
    }

    pub fn region(&self) -> String {
        format!("{}:{}-{}", self.chrom, self.start, self.end)
    }

    /// Grows the locus span to cover an interval.
    pub fn extend(&mut self, start: u64, end: u64) {
        self.start = self.start.min(start);
        self.end = self.end.max(end);
    }

    pub fn add_ref_transcript(&mut self, record: RefTranscript) {
        let (start, end) = span_of(&record.exons);
        self.extend(start, end);
        self.ref_transcripts.push(record);
    }

    /// Moves all expressed transcripts of `other` into this gene and grows
    /// the span. The caller tombstones `other` afterwards.
    pub fn absorb(&mut self, other: &mut Gene) {
        self.extend(other.start, other.end);
        self.transcripts.append(&mut other.transcripts);
        self.ref_transcripts.append(&mut other.ref_transcripts);
        self.is_reference |= other.is_reference;
    }

    pub fn is_merged(&self) -> bool {
        self.merged_into.is_some()
    }

    pub fn is_annotated(&self) -> bool {
        !self.ref_transcripts.is_empty()
    }

    pub fn is_chimeric(&self) -> bool {
        self.transcripts.iter().any(|tx| tx.is_chimeric)
    }

    pub fn is_expressed(&self) -> bool {
        !self.transcripts.is_empty()
    }

    pub fn n_transcripts(&self) -> usize {
        self.transcripts.len()
    }

    pub fn n_ref_transcripts(&self) -> usize {
        self.ref_transcripts.len()
    }

    /// The samples x transcripts read count matrix of this gene.
    pub fn coverage_matrix(&self, n_samples: usize) -> CoverageMatrix {
        CoverageMatrix::from_gene(self, n_samples)
    }

    /// Reads per sample summed over all expressed transcripts.
    pub fn gene_coverage(&self, n_samples: usize) -> Vec<u32> {
        self.coverage_matrix(n_samples).sample_totals()
    }

    pub fn total_coverage(&self) -> u32 {
        self.transcripts.iter().map(|tx| tx.total_coverage()).sum()
    }

    /// The union of all reference splice junctions of this locus.
    pub fn ref_junctions(&self) -> hashbrown::HashSet<(u64, u64)> {
        self.ref_transcripts
            .iter()
            .flat_map(|tx| tx.introns())
            .collect()
    }

    /// All internal reference exons, i.e. exons that are neither first nor
    /// last in their transcript.
    pub fn ref_internal_exons(&self) -> Vec<(u64, u64)> {
        self.ref_transcripts
            .iter()
            .flat_map(|tx| {
                let n = tx.exons.len();
                tx.exons
                    .iter()
                    .enumerate()
                    .filter(move |(i, _)| *i > 0 && *i + 1 < n)
                    .map(|(_, e)| *e)
            })
            .collect()
    }
}

/// samples x transcripts read count matrix of one gene.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoverageMatrix {
    pub rows: Vec<Vec<u32>>,
}

impl CoverageMatrix {
    pub fn from_gene(gene: &Gene, n_samples: usize) -> Self {
        let rows = (0..n_samples)
            .map(|sample| {
                gene.transcripts
                    .iter()
                    .map(|tx| tx.coverage.get(sample).copied().unwrap_or(0))
                    .collect()
            })
            .collect();

        Self { rows }
    }

    pub fn sample_totals(&self) -> Vec<u32> {
        self.rows.iter().map(|row| row.iter().sum()).collect()
    }

    pub fn transcript_totals(&self) -> Vec<u32> {
        if self.rows.is_empty() {
            return Vec::new();
        }

        let mut totals = vec![0u32; self.rows[0].len()];
        for row in &self.rows {
            for (i, count) in row.iter().enumerate() {
                totals[i] += count;
            }
        }

        totals
    }
}

use config::Strand;
use hashbrown::HashMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use std::collections::BTreeMap;

/// Errors raised while building or validating an exon chain.
#[derive(Debug, Error, PartialEq)]
pub enum ChainError {
    #[error("empty exon chain")]
    Empty,
    #[error("exon chain is not strictly increasing at block {0}")]
    NotIncreasing(usize),
    #[error("cannot parse record: {0}")]
    Parse(String),
}

/// Checks that a chain is non-empty, sorted and strictly increasing,
/// with half-open blocks of positive length.
pub fn validate_chain(exons: &[(u64, u64)]) -> Result<(), ChainError> {
    if exons.is_empty() {
        return Err(ChainError::Empty);
    }

    for (i, exon) in exons.iter().enumerate() {
        if exon.0 >= exon.1 {
            return Err(ChainError::NotIncreasing(i));
        }
        if i > 0 && exons[i - 1].1 > exon.0 {
            return Err(ChainError::NotIncreasing(i));
        }
    }

    Ok(())
}

/// The ordered list of gaps between consecutive exons.
#[inline(always)]
pub fn introns_of(exons: &[(u64, u64)]) -> Vec<(u64, u64)> {
    exons
        .windows(2)
        .map(|pair| (pair[0].1, pair[1].0))
        .collect()
}

#[inline(always)]
pub fn span_of(exons: &[(u64, u64)]) -> (u64, u64) {
    (exons[0].0, exons[exons.len() - 1].1)
}

/// Base pairs shared by two half-open intervals.
#[inline(always)]
pub fn span_overlap(a: (u64, u64), b: (u64, u64)) -> u64 {
    let lo = a.0.max(b.0);
    let hi = a.1.min(b.1);
    hi.saturating_sub(lo)
}

/// Whether two sorted exon chains share at least one exonic base.
#[inline(always)]
pub fn exonic_overlap(exons_a: &[(u64, u64)], exons_b: &[(u64, u64)]) -> bool {
    let mut i = 0;
    let mut j = 0;

    while i < exons_a.len() && j < exons_b.len() {
        let (start_a, end_a) = exons_a[i];
        let (start_b, end_b) = exons_b[j];

        if start_a < end_b && start_b < end_a {
            return true;
        }

        if end_a < end_b {
            i += 1;
        } else {
            j += 1;
        }
    }

    false
}

/// Overlap of two intervals as a fraction of the shorter one.
#[inline(always)]
pub fn fraction_overlap(a: (u64, u64), b: (u64, u64)) -> f32 {
    let shared = span_overlap(a, b);
    let shorter = (a.1 - a.0).min(b.1 - b.0);

    if shorter == 0 {
        return 0.0;
    }

    shared as f32 / shorter as f32
}

/// SAM-style per-read flags relevant to import filtering.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadFlags {
    pub secondary: bool,
    pub duplicate: bool,
    pub qc_fail: bool,
    pub supplementary: bool,
}

impl ReadFlags {
    pub fn from_sam(flag: u16) -> Self {
        Self {
            secondary: flag & 0x100 != 0,
            qc_fail: flag & 0x200 != 0,
            duplicate: flag & 0x400 != 0,
            supplementary: flag & 0x800 != 0,
        }
    }

    /// Secondary, duplicate and QC-failed parts are never imported.
    pub fn is_filtered(&self) -> bool {
        self.secondary || self.duplicate || self.qc_fail
    }
}

/// One decoded alignment part, as supplied by the external alignment source.
///
/// Blocks are aligned segments with their gaps still open; the normalizer
/// decides which gaps are introns.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlignedRead {
    pub read_name: String,
    pub chrom: String,
    pub strand: Strand,
    pub blocks: Vec<(u64, u64)>,
    pub mapq: u8,
    pub aligned_fraction: f32,
    pub flags: ReadFlags,
}

impl AlignedRead {
    /// Parses one decoded-alignment TSV line:
    /// `read \t chrom \t start \t strand \t flag \t mapq \t fraction \t sizes \t starts`
    /// with BED-style comma lists of block sizes and block starts relative
    /// to `start`.
    pub fn from_tsv(line: &str) -> Result<Self, ChainError> {
        if line.is_empty() {
            return Err(ChainError::Parse("empty line".to_string()));
        }

        let mut fields = line.split('\t');
        let (read_name, chrom, start, strand, flag, mapq, fraction, sizes, starts) = (
            fields
                .next()
                .ok_or_else(|| ChainError::Parse("cannot parse read name".to_string()))?,
            fields
                .next()
                .ok_or_else(|| ChainError::Parse("cannot parse chrom".to_string()))?,
            fields
                .next()
                .ok_or_else(|| ChainError::Parse("cannot parse start".to_string()))?,
            fields
                .next()
                .ok_or_else(|| ChainError::Parse("cannot parse strand".to_string()))?,
            fields
                .next()
                .ok_or_else(|| ChainError::Parse("cannot parse flag".to_string()))?,
            fields
                .next()
                .ok_or_else(|| ChainError::Parse("cannot parse mapq".to_string()))?,
            fields
                .next()
                .ok_or_else(|| ChainError::Parse("cannot parse aligned fraction".to_string()))?,
            fields
                .next()
                .ok_or_else(|| ChainError::Parse("cannot parse block sizes".to_string()))?,
            fields
                .next()
                .ok_or_else(|| ChainError::Parse("cannot parse block starts".to_string()))?,
        );

        let start = start
            .parse::<u64>()
            .map_err(|_| ChainError::Parse(format!("bad start: {}", start)))?;
        let strand = strand
            .parse::<Strand>()
            .map_err(ChainError::Parse)?;
        let flag = flag
            .parse::<u16>()
            .map_err(|_| ChainError::Parse(format!("bad flag: {}", flag)))?;
        let mapq = mapq
            .parse::<u8>()
            .map_err(|_| ChainError::Parse(format!("bad mapq: {}", mapq)))?;
        let aligned_fraction = fraction
            .parse::<f32>()
            .map_err(|_| ChainError::Parse(format!("bad aligned fraction: {}", fraction)))?;

        let blocks = parse_blocks(start, sizes, starts)?;

        Ok(Self {
            read_name: read_name.into(),
            chrom: chrom.into(),
            strand,
            blocks,
            mapq,
            aligned_fraction,
            flags: ReadFlags::from_sam(flag),
        })
    }
}

fn parse_blocks(offset: u64, sizes: &str, starts: &str) -> Result<Vec<(u64, u64)>, ChainError> {
    let group = |field: &str| -> Result<Vec<u64>, ChainError> {
        field
            .split(',')
            .filter(|num| !num.is_empty())
            .map(|num| {
                num.parse::<u64>()
                    .map_err(|_| ChainError::Parse(format!("bad block field: {}", num)))
            })
            .collect()
    };

    let ss = group(starts)?;
    let sz = group(sizes)?;

    if ss.len() != sz.len() {
        return Err(ChainError::Parse(
            "block start and size lists have different lengths".to_string(),
        ));
    }

    let mut blocks = ss
        .iter()
        .zip(&sz)
        .map(|(&s, &z)| (offset + s, offset + s + z))
        .collect::<Vec<_>>();
    blocks.sort_unstable();

    Ok(blocks)
}

/// One record of the external annotation reader.
///
/// The reader yields genes, their transcripts, and anything else it found in
/// the source; unknown categories are counted as skipped, transcripts whose
/// gene was never declared are counted as missing genes.
#[derive(Debug, Clone, PartialEq)]
pub enum AnnotationEntry {
    Gene {
        gene_id: String,
        gene_name: Option<String>,
        chrom: String,
        strand: Strand,
    },
    Transcript {
        gene_id: String,
        chrom: String,
        strand: Strand,
        record: RefTranscript,
    },
    Other {
        category: String,
    },
}

/// A reference transcript; immutable after annotation import.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RefTranscript {
    pub transcript_id: String,
    pub transcript_name: Option<String>,
    pub transcript_type: Option<String>,
    pub support_level: Option<String>,
    pub exons: Vec<(u64, u64)>,
    pub cds: Option<(u64, u64)>,
    pub attributes: HashMap<String, String>,
}

impl RefTranscript {
    pub fn new(transcript_id: &str, exons: Vec<(u64, u64)>) -> Result<Self, ChainError> {
        validate_chain(&exons)?;

        Ok(Self {
            transcript_id: transcript_id.to_string(),
            transcript_name: None,
            transcript_type: None,
            support_level: None,
            exons,
            cds: None,
            attributes: HashMap::new(),
        })
    }

    /// Parses a BED12 line into a reference transcript. The BED name field
    /// becomes the transcript id; a zero-length thick interval means no CDS.
    pub fn from_bed12(line: &str) -> Result<(String, Strand, Self), ChainError> {
        if line.is_empty() {
            return Err(ChainError::Parse("empty line".to_string()));
        }

        let mut fields = line.split('\t');
        let (chrom, tx_start, _tx_end, name, _score, strand, cds_start, cds_end, _rgb, _count, sizes, starts) = (
            fields
                .next()
                .ok_or_else(|| ChainError::Parse("cannot parse chrom".to_string()))?,
            fields
                .next()
                .ok_or_else(|| ChainError::Parse("cannot parse tx_start".to_string()))?,
            fields
                .next()
                .ok_or_else(|| ChainError::Parse("cannot parse tx_end".to_string()))?,
            fields
                .next()
                .ok_or_else(|| ChainError::Parse("cannot parse name".to_string()))?,
            fields
                .next()
                .ok_or_else(|| ChainError::Parse("cannot parse score".to_string()))?,
            fields
                .next()
                .ok_or_else(|| ChainError::Parse("cannot parse strand".to_string()))?,
            fields
                .next()
                .ok_or_else(|| ChainError::Parse("cannot parse cds_start".to_string()))?,
            fields
                .next()
                .ok_or_else(|| ChainError::Parse("cannot parse cds_end".to_string()))?,
            fields
                .next()
                .ok_or_else(|| ChainError::Parse("cannot parse rgb".to_string()))?,
            fields
                .next()
                .ok_or_else(|| ChainError::Parse("cannot parse block count".to_string()))?,
            fields
                .next()
                .ok_or_else(|| ChainError::Parse("cannot parse block sizes".to_string()))?,
            fields
                .next()
                .ok_or_else(|| ChainError::Parse("cannot parse block starts".to_string()))?,
        );

        let tx_start = tx_start
            .parse::<u64>()
            .map_err(|_| ChainError::Parse(format!("bad tx_start: {}", tx_start)))?;
        let strand = strand
            .parse::<Strand>()
            .map_err(ChainError::Parse)?;
        let cds_start = cds_start
            .parse::<u64>()
            .map_err(|_| ChainError::Parse(format!("bad cds_start: {}", cds_start)))?;
        let cds_end = cds_end
            .parse::<u64>()
            .map_err(|_| ChainError::Parse(format!("bad cds_end: {}", cds_end)))?;

        let exons = parse_blocks(tx_start, sizes, starts)?;
        let mut record = Self::new(name, exons)?;
        record.cds = if cds_start < cds_end {
            Some((cds_start, cds_end))
        } else {
            None
        };

        Ok((chrom.to_string(), strand, record))
    }

    pub fn introns(&self) -> Vec<(u64, u64)> {
        introns_of(&self.exons)
    }

    pub fn span(&self) -> (u64, u64) {
        span_of(&self.exons)
    }

    pub fn exon_count(&self) -> usize {
        self.exons.len()
    }

    pub fn length(&self) -> u64 {
        self.exons.iter().map(|e| e.1 - e.0).sum()
    }

    pub fn is_coding(&self) -> bool {
        self.cds.is_some()
    }
}

/// The closed set of primary novelty categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SpliceCategory {
    Fsm,
    Ism,
    Nic,
    Nnc,
    Novel,
}

impl SpliceCategory {
    pub const ALL: [SpliceCategory; 5] = [
        SpliceCategory::Fsm,
        SpliceCategory::Ism,
        SpliceCategory::Nic,
        SpliceCategory::Nnc,
        SpliceCategory::Novel,
    ];

    pub fn as_index(&self) -> usize {
        match self {
            SpliceCategory::Fsm => 0,
            SpliceCategory::Ism => 1,
            SpliceCategory::Nic => 2,
            SpliceCategory::Nnc => 3,
            SpliceCategory::Novel => 4,
        }
    }
}

impl std::fmt::Display for SpliceCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            SpliceCategory::Fsm => write!(f, "FSM"),
            SpliceCategory::Ism => write!(f, "ISM"),
            SpliceCategory::Nic => write!(f, "NIC"),
            SpliceCategory::Nnc => write!(f, "NNC"),
            SpliceCategory::Novel => write!(f, "NOVEL"),
        }
    }
}

/// Novelty annotation of one transcript: the primary category plus the
/// subclass labels with the reference transcript indices they matched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Annotation {
    pub category: SpliceCategory,
    pub subcategories: BTreeMap<String, Vec<usize>>,
}

impl Annotation {
    pub fn new(category: SpliceCategory) -> Self {
        Self {
            category,
            subcategories: BTreeMap::new(),
        }
    }

    pub fn with(mut self, label: &str, matches: Vec<usize>) -> Self {
        self.subcategories.insert(label.to_string(), matches);
        self
    }

    pub fn add(&mut self, label: &str, matches: Vec<usize>) {
        self.subcategories.insert(label.to_string(), matches);
    }

    pub fn has(&self, label: &str) -> bool {
        self.subcategories.contains_key(label)
    }

    pub fn labels(&self) -> Vec<&str> {
        self.subcategories.keys().map(|k| k.as_str()).collect()
    }
}

/// Per-sample raw position histogram of observed 5' or 3' ends.
pub type EndHistogram = BTreeMap<u64, u32>;

/// One reconstructed transcript model inside a gene.
///
/// Created by the clusterer from the first read of its intron chain and
/// mutated in place as further reads and samples contribute evidence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transcript {
    pub exons: Vec<(u64, u64)>,
    pub strand: Strand,
    /// reads per sample, indexed like the session's sample table
    pub coverage: Vec<u32>,
    pub tss: Vec<EndHistogram>,
    pub pas: Vec<EndHistogram>,
    pub tss_unified: Option<Vec<EndHistogram>>,
    pub pas_unified: Option<Vec<EndHistogram>>,
    pub annotation: Option<Annotation>,
    pub is_chimeric: bool,
    // derived QC attributes, filled by the external sequence provider
    pub downstream_a_content: Option<f32>,
    pub direct_repeat_len: Option<Vec<u32>>,
    pub noncanonical_splicing: Option<Vec<(usize, String)>>,
    pub orf: Option<(u64, u64)>,
}

impl Transcript {
    /// Seeds a transcript from its first observed chain.
    pub fn from_chain(
        exons: Vec<(u64, u64)>,
        strand: Strand,
        n_samples: usize,
        sample: usize,
    ) -> Result<Self, ChainError> {
        validate_chain(&exons)?;

        let mut tx = Self {
            exons,
            strand,
            coverage: vec![0; n_samples],
            tss: vec![EndHistogram::new(); n_samples],
            pas: vec![EndHistogram::new(); n_samples],
            tss_unified: None,
            pas_unified: None,
            annotation: None,
            is_chimeric: false,
            downstream_a_content: None,
            direct_repeat_len: None,
            noncanonical_splicing: None,
            orf: None,
        };
        tx.observe(sample, tx.chain_tss(), tx.chain_pas());

        Ok(tx)
    }

    /// 5' end of the current chain in direction of transcription.
    pub fn chain_tss(&self) -> u64 {
        match self.strand {
            Strand::Forward => self.exons[0].0,
            Strand::Reverse => self.exons[self.exons.len() - 1].1,
        }
    }

    /// 3' end of the current chain in direction of transcription.
    pub fn chain_pas(&self) -> u64 {
        match self.strand {
            Strand::Forward => self.exons[self.exons.len() - 1].1,
            Strand::Reverse => self.exons[0].0,
        }
    }

    /// Records one supporting read: bumps the sample's coverage and merges
    /// the observed boundary positions into the raw histograms.
    pub fn observe(&mut self, sample: usize, tss: u64, pas: u64) {
        self.ensure_samples(sample + 1);
        self.coverage[sample] += 1;
        *self.tss[sample].entry(tss).or_insert(0) += 1;
        *self.pas[sample].entry(pas).or_insert(0) += 1;
    }

    /// Grows the per-sample vectors when a new sample is registered.
    pub fn ensure_samples(&mut self, n_samples: usize) {
        if self.coverage.len() < n_samples {
            self.coverage.resize(n_samples, 0);
            self.tss.resize(n_samples, EndHistogram::new());
            self.pas.resize(n_samples, EndHistogram::new());
        }
    }

    pub fn introns(&self) -> Vec<(u64, u64)> {
        introns_of(&self.exons)
    }

    pub fn span(&self) -> (u64, u64) {
        span_of(&self.exons)
    }

    pub fn exon_count(&self) -> usize {
        self.exons.len()
    }

    pub fn length(&self) -> u64 {
        self.exons.iter().map(|e| e.1 - e.0).sum()
    }

    pub fn total_coverage(&self) -> u32 {
        self.coverage.iter().sum()
    }

    pub fn is_mono_exon(&self) -> bool {
        self.exons.len() == 1
    }

    /// Category string of the annotation, `NA` before classification.
    pub fn novelty(&self) -> String {
        self.annotation
            .as_ref()
            .map(|a| a.category.to_string())
            .unwrap_or_else(|| "NA".to_string())
    }

    pub fn subcategory(&self) -> String {
        self.annotation
            .as_ref()
            .map(|a| a.labels().join(","))
            .unwrap_or_default()
    }
}

/// The stable per-transcript field set external serializers depend on.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TranscriptExport {
    pub gene_id: String,
    pub transcript_index: usize,
    pub chrom: String,
    pub strand: Strand,
    pub exons: Vec<(u64, u64)>,
    pub coverage: Vec<u32>,
    pub category: String,
    pub subcategories: Vec<String>,
    pub downstream_a_content: Option<f32>,
    pub orf: Option<(u64, u64)>,
    pub is_chimeric: bool,
}

impl TranscriptExport {
    pub fn to_tsv_row(&self) -> String {
        format!(
            "{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}",
            self.gene_id,
            self.transcript_index,
            self.chrom,
            self.strand,
            self.exons
                .iter()
                .map(|e| format!("{}-{}", e.0, e.1))
                .collect::<Vec<_>>()
                .join(","),
            self.coverage
                .iter()
                .map(|c| c.to_string())
                .collect::<Vec<_>>()
                .join(","),
            self.category,
            self.subcategories.join(","),
            self.downstream_a_content
                .map(|a| format!("{:.3}", a))
                .unwrap_or_else(|| "NA".to_string()),
            if self.is_chimeric { "chimeric" } else { "." },
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_chain() {
        assert_eq!(validate_chain(&[]), Err(ChainError::Empty));
        assert_eq!(validate_chain(&[(10, 10)]), Err(ChainError::NotIncreasing(0)));
        assert_eq!(
            validate_chain(&[(10, 50), (40, 90)]),
            Err(ChainError::NotIncreasing(1))
        );
        assert!(validate_chain(&[(10, 50), (100, 200)]).is_ok());
    }

    #[test]
    fn test_introns_of() {
        let exons = [(10, 50), (100, 200), (300, 400)];
        assert_eq!(introns_of(&exons), vec![(50, 100), (200, 300)]);
        assert!(introns_of(&exons[..1]).is_empty());
    }

    #[test]
    fn test_exonic_overlap() {
        let a = [(10, 50), (100, 200)];
        let b = [(60, 90), (210, 300)];
        let c = [(40, 70)];

        assert!(!exonic_overlap(&a, &b));
        assert!(exonic_overlap(&a, &c));
    }

    #[test]
    fn test_fraction_overlap() {
        assert_eq!(fraction_overlap((0, 100), (50, 150)), 0.5);
        assert_eq!(fraction_overlap((0, 100), (200, 300)), 0.0);
        assert_eq!(fraction_overlap((0, 10), (0, 100)), 1.0);
    }

    #[test]
    fn test_read_flags() {
        let flags = ReadFlags::from_sam(0x100 | 0x800);
        assert!(flags.secondary);
        assert!(flags.supplementary);
        assert!(flags.is_filtered());

        assert!(!ReadFlags::from_sam(0x800).is_filtered());
    }

    #[test]
    fn test_aligned_read_from_tsv() {
        let line = "read1\tchr8\t1000\t+\t0\t60\t0.95\t50,60\t0,500";
        let read = AlignedRead::from_tsv(line).unwrap();

        assert_eq!(read.read_name, "read1");
        assert_eq!(read.chrom, "chr8");
        assert_eq!(read.blocks, vec![(1000, 1050), (1500, 1560)]);
        assert_eq!(read.mapq, 60);
        assert!(!read.flags.is_filtered());
    }

    #[test]
    fn test_ref_from_bed12() {
        let line = "chr1\t100\t900\tTX1.1\t0\t+\t150\t850\t0\t2\t100,100\t0,700";
        let (chrom, strand, tx) = RefTranscript::from_bed12(line).unwrap();

        assert_eq!(chrom, "chr1");
        assert_eq!(strand, Strand::Forward);
        assert_eq!(tx.exons, vec![(100, 200), (800, 900)]);
        assert_eq!(tx.cds, Some((150, 850)));
        assert_eq!(tx.introns(), vec![(200, 800)]);
    }

    #[test]
    fn test_transcript_observe() {
        let mut tx =
            Transcript::from_chain(vec![(100, 200), (300, 400)], Strand::Forward, 2, 0).unwrap();

        assert_eq!(tx.coverage, vec![1, 0]);
        assert_eq!(tx.tss[0].get(&100), Some(&1));
        assert_eq!(tx.pas[0].get(&400), Some(&1));

        tx.observe(1, 95, 410);
        assert_eq!(tx.coverage, vec![1, 1]);
        assert_eq!(tx.tss[1].get(&95), Some(&1));
        assert_eq!(tx.total_coverage(), 2);
    }

    #[test]
    fn test_transcript_ends_reverse() {
        let tx =
            Transcript::from_chain(vec![(100, 200), (300, 400)], Strand::Reverse, 1, 0).unwrap();

        assert_eq!(tx.chain_tss(), 400);
        assert_eq!(tx.chain_pas(), 100);
        assert_eq!(tx.tss[0].get(&400), Some(&1));
    }
}

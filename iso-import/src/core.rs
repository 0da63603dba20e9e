//! The import session.
//!
//! A [`Transcriptome`] owns the gene arena, the per-(chromosome, strand)
//! locus index, the sample table and the tag registry. Reference annotation
//! loads first, then samples are added one at a time; end unification runs
//! once after the last sample.

use config::{get_progress_bar, ImportParams, Strand};
use hashbrown::{HashMap, HashSet};
use iso_filter::FilterRegistry;
use iso_model::{span_of, AlignedRead, AnnotationEntry, Gene};
use rayon::prelude::*;
use serde::Serialize;

use std::collections::BTreeMap;

use crate::chain::{normalize_read, SkipReason};
use crate::chimeric::{resolve_parts, ChimericDrop, ChimericEvent, FusionPart};
use crate::cluster::{integrate_chain, unify_ends};
use crate::locus::{assign_locus, GeneIndex};

/// Per-sample import accounting. Reads in equals reads imported plus reads
/// counted under exactly one skip reason.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SampleSummary {
    pub reads_total: u64,
    pub skipped_low_fraction: u64,
    pub skipped_low_mapq: u64,
    pub skipped_flagged: u64,
    pub malformed: u64,
    pub chimeric_unaligned_part: u64,
    pub chimeric_below_min_coverage: u64,
    /// split reads rejoined into one chain; a subset of `imported`
    pub chimeric_chained: u64,
    pub imported: u64,
    pub imported_chimeric: u64,
    pub novel_genes: u64,
    pub gene_merges: u64,
}

impl SampleSummary {
    pub fn skipped(&self) -> u64 {
        self.skipped_low_fraction
            + self.skipped_low_mapq
            + self.skipped_flagged
            + self.malformed
            + self.chimeric_unaligned_part
            + self.chimeric_below_min_coverage
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Sample {
    pub name: String,
    pub summary: SampleSummary,
}

/// Accounting of one annotation import.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ReferenceSummary {
    pub genes: u64,
    pub transcripts: u64,
    /// transcripts whose gene was never declared; a locus is created for
    /// them on the fly
    pub missing_genes: u64,
    pub skipped_categories: BTreeMap<String, u64>,
}

pub struct Transcriptome {
    pub genes: Vec<Gene>,
    pub samples: Vec<Sample>,
    pub filters: FilterRegistry,
    pub params: ImportParams,
    index: GeneIndex,
    by_id: HashMap<String, usize>,
    chroms: HashSet<String>,
    next_novel: u64,
}

impl Transcriptome {
    pub fn new(params: ImportParams) -> Self {
        Self {
            genes: Vec::new(),
            samples: Vec::new(),
            filters: FilterRegistry::with_defaults(),
            params,
            index: GeneIndex::new(),
            by_id: HashMap::new(),
            chroms: HashSet::new(),
            next_novel: 0,
        }
    }

    pub fn n_samples(&self) -> usize {
        self.samples.len()
    }

    pub fn sample_names(&self) -> Vec<&str> {
        self.samples.iter().map(|s| s.name.as_str()).collect()
    }

    pub fn gene_by_id(&self, id: &str) -> Option<&Gene> {
        self.by_id.get(id).map(|&idx| &self.genes[idx])
    }

    /// Live (unmerged) genes.
    pub fn n_genes(&self) -> usize {
        self.genes.iter().filter(|g| !g.is_merged()).count()
    }

    pub fn n_transcripts(&self) -> usize {
        self.genes
            .iter()
            .filter(|g| !g.is_merged())
            .map(|g| g.n_transcripts())
            .sum()
    }

    /// Loads reference annotation. Call before the first sample so reads
    /// can land on annotated loci.
    pub fn add_reference(
        &mut self,
        entries: impl IntoIterator<Item = AnnotationEntry>,
    ) -> ReferenceSummary {
        let mut summary = ReferenceSummary::default();

        for entry in entries {
            match entry {
                AnnotationEntry::Gene {
                    gene_id,
                    gene_name,
                    chrom,
                    strand,
                } => {
                    self.chroms.insert(chrom.clone());
                    if !self.by_id.contains_key(&gene_id) {
                        let idx = self.genes.len();
                        self.genes
                            .push(Gene::from_reference(gene_id.clone(), gene_name, &chrom, strand));
                        self.by_id.insert(gene_id, idx);
                        summary.genes += 1;
                    }
                }
                AnnotationEntry::Transcript {
                    gene_id,
                    chrom,
                    strand,
                    record,
                } => {
                    self.chroms.insert(chrom.clone());
                    let idx = match self.by_id.get(&gene_id) {
                        Some(&idx) => idx,
                        None => {
                            log::warn!(
                                "transcript {} references undeclared gene {}",
                                record.transcript_id,
                                gene_id
                            );
                            summary.missing_genes += 1;
                            let idx = self.genes.len();
                            self.genes.push(Gene::from_reference(
                                gene_id.clone(),
                                None,
                                &chrom,
                                strand,
                            ));
                            self.by_id.insert(gene_id, idx);
                            idx
                        }
                    };
                    self.genes[idx].add_ref_transcript(record);
                    summary.transcripts += 1;
                }
                AnnotationEntry::Other { category } => {
                    *summary.skipped_categories.entry(category).or_insert(0) += 1;
                }
            }
        }

        self.rebuild_index();

        log::info!(
            "reference loaded: {} genes, {} transcripts, {} missing genes",
            summary.genes,
            summary.transcripts,
            summary.missing_genes
        );

        summary
    }

    fn rebuild_index(&mut self) {
        self.index.clear();
        for (idx, gene) in self.genes.iter().enumerate() {
            if gene.is_merged() || gene.start >= gene.end {
                continue;
            }
            self.index
                .entry((gene.chrom.clone(), gene.strand))
                .or_insert_with(Vec::new)
                .push(idx);
        }
        let genes = &self.genes;
        for bucket in self.index.values_mut() {
            bucket.sort_unstable_by_key(|&idx| genes[idx].start);
        }
    }

    /// Imports one sample's decoded alignments into the model.
    pub fn add_sample(&mut self, name: &str, reads: Vec<AlignedRead>) -> &SampleSummary {
        let sample = self.samples.len();
        self.samples.push(Sample {
            name: name.to_string(),
            summary: SampleSummary::default(),
        });
        let n_samples = self.samples.len();
        let mut summary = SampleSummary::default();

        // parts of one read stay together, whatever the input order
        let mut order: Vec<String> = Vec::new();
        let mut groups: HashMap<String, Vec<AlignedRead>> = HashMap::new();
        for read in reads {
            if !groups.contains_key(&read.read_name) {
                order.push(read.read_name.clone());
            }
            groups.entry(read.read_name.clone()).or_default().push(read);
        }
        summary.reads_total = order.len() as u64;

        let mut plain: Vec<(String, Strand, Vec<(u64, u64)>)> = Vec::new();
        let mut fusions: Vec<Vec<FusionPart>> = Vec::new();

        for name in &order {
            let parts = &groups[name];
            if parts.len() == 1 {
                match normalize_read(&parts[0], &self.params) {
                    Ok(chain) => {
                        self.chroms.insert(parts[0].chrom.clone());
                        plain.push((parts[0].chrom.clone(), parts[0].strand, chain));
                    }
                    Err(SkipReason::LowFraction) => summary.skipped_low_fraction += 1,
                    Err(SkipReason::LowMapq) => summary.skipped_low_mapq += 1,
                    Err(SkipReason::Flagged) => summary.skipped_flagged += 1,
                    Err(SkipReason::Malformed(e)) => {
                        log::warn!("read {}: malformed alignment skipped ({})", name, e);
                        summary.malformed += 1;
                    }
                }
            } else {
                match resolve_parts(parts, &self.chroms, &self.params) {
                    // a rejoined chain is a normal read from here on
                    Ok(ChimericEvent::Chained(chrom, strand, chain)) => {
                        summary.chimeric_chained += 1;
                        plain.push((chrom, strand, chain));
                    }
                    Ok(ChimericEvent::Fusion(pieces)) => fusions.push(pieces),
                    Err(ChimericDrop::UnalignedPart) => {
                        log::warn!("read {}: chimeric alignment with unaligned part", name);
                        summary.chimeric_unaligned_part += 1;
                    }
                    Err(ChimericDrop::Malformed) => {
                        log::warn!("read {}: malformed chimeric alignment skipped", name);
                        summary.malformed += 1;
                    }
                }
            }
        }

        // deterministic insertion independent of input order
        plain.sort();
        for (chrom, strand, chain) in plain {
            let span = span_of(&chain);
            let out = assign_locus(
                &mut self.genes,
                &mut self.index,
                &chrom,
                strand,
                span,
                &mut self.next_novel,
            );
            summary.novel_genes += out.created as u64;
            summary.gene_merges += out.merged as u64;
            integrate_chain(
                &mut self.genes[out.gene_idx],
                chain,
                sample,
                n_samples,
                &self.params,
                false,
            );
            summary.imported += 1;
        }

        // genuine chimeras only count with a recurrent junction signature
        let signature = |pieces: &[FusionPart]| -> Vec<(String, Strand, Vec<(u64, u64)>)> {
            pieces
                .iter()
                .map(|(c, s, chain)| (c.clone(), *s, iso_model::introns_of(chain)))
                .collect()
        };
        let mut seen: HashMap<Vec<(String, Strand, Vec<(u64, u64)>)>, u32> = HashMap::new();
        for pieces in &fusions {
            *seen.entry(signature(pieces)).or_insert(0) += 1;
        }
        fusions.sort();
        for pieces in fusions {
            if seen[&signature(&pieces)] < self.params.min_chimeric_coverage {
                log::info!(
                    "chimeric read dropped, junction signature below coverage {}",
                    self.params.min_chimeric_coverage
                );
                summary.chimeric_below_min_coverage += 1;
                continue;
            }

            for (chrom, strand, chain) in pieces {
                let span = span_of(&chain);
                let out = assign_locus(
                    &mut self.genes,
                    &mut self.index,
                    &chrom,
                    strand,
                    span,
                    &mut self.next_novel,
                );
                summary.novel_genes += out.created as u64;
                summary.gene_merges += out.merged as u64;
                integrate_chain(
                    &mut self.genes[out.gene_idx],
                    chain,
                    sample,
                    n_samples,
                    &self.params,
                    true,
                );
            }
            summary.imported += 1;
            summary.imported_chimeric += 1;
        }

        debug_assert_eq!(summary.reads_total, summary.imported + summary.skipped());
        log::info!(
            "sample {}: {} reads, {} imported ({} chimeric), {} skipped, {} novel genes, {} merges",
            name,
            summary.reads_total,
            summary.imported,
            summary.imported_chimeric,
            summary.skipped(),
            summary.novel_genes,
            summary.gene_merges
        );

        self.samples[sample].summary = summary;
        &self.samples[sample].summary
    }

    /// Unifies TSS/PAS positions of every transcript; run once after the
    /// last sample.
    pub fn unify_all_ends(&mut self) {
        let params = self.params.clone();
        let bar = get_progress_bar(self.genes.len() as u64, "Unifying transcript ends...");

        self.genes
            .par_iter_mut()
            .filter(|gene| !gene.is_merged() && gene.is_expressed())
            .for_each(|gene| {
                unify_ends(gene, &params);
                bar.inc(1);
            });

        bar.finish_and_clear();
        self.rebuild_index();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use iso_model::{ReadFlags, RefTranscript};

    fn read(name: &str, chrom: &str, strand: Strand, blocks: Vec<(u64, u64)>) -> AlignedRead {
        AlignedRead {
            read_name: name.into(),
            chrom: chrom.into(),
            strand,
            blocks,
            mapq: 60,
            aligned_fraction: 0.9,
            flags: ReadFlags::default(),
        }
    }

    fn reference() -> Vec<AnnotationEntry> {
        vec![
            AnnotationEntry::Gene {
                gene_id: "G1".into(),
                gene_name: Some("ABC1".into()),
                chrom: "chr1".into(),
                strand: Strand::Forward,
            },
            AnnotationEntry::Transcript {
                gene_id: "G1".into(),
                chrom: "chr1".into(),
                strand: Strand::Forward,
                record: RefTranscript::new("T1", vec![(1000, 1200), (2000, 2200), (3000, 3200)])
                    .expect("valid chain"),
            },
            AnnotationEntry::Other {
                category: "CDS".into(),
            },
        ]
    }

    #[test]
    fn test_reference_import() {
        let mut tome = Transcriptome::new(ImportParams::default());
        let summary = tome.add_reference(reference());

        assert_eq!(summary.genes, 1);
        assert_eq!(summary.transcripts, 1);
        assert_eq!(summary.skipped_categories.get("CDS"), Some(&1));
        assert_eq!(tome.gene_by_id("G1").map(|g| g.span()), Some((1000, 3200)));
    }

    #[test]
    fn test_reads_land_on_annotated_locus() {
        let mut tome = Transcriptome::new(ImportParams::default());
        tome.add_reference(reference());

        let reads = vec![
            read("r1", "chr1", Strand::Forward, vec![(1000, 1200), (2000, 2200), (3000, 3200)]),
            read("r2", "chr1", Strand::Forward, vec![(1050, 1200), (2000, 2200), (3000, 3100)]),
            read("r3", "chr9", Strand::Reverse, vec![(500, 900)]),
        ];
        let summary = tome.add_sample("s0", reads).clone();

        assert_eq!(summary.imported, 3);
        assert_eq!(summary.novel_genes, 1);

        let gene = tome.gene_by_id("G1").expect("exists");
        assert_eq!(gene.n_transcripts(), 1);
        assert_eq!(gene.transcripts[0].coverage, vec![2]);
    }

    #[test]
    fn test_read_accounting_is_conserved() {
        let mut tome = Transcriptome::new(ImportParams::default());

        let mut bad = read("r2", "chr1", Strand::Forward, vec![(100, 400)]);
        bad.aligned_fraction = 0.1;
        let mut dup = read("r3", "chr1", Strand::Forward, vec![(100, 400)]);
        dup.flags.duplicate = true;
        let reads = vec![
            read("r1", "chr1", Strand::Forward, vec![(100, 400)]),
            bad,
            dup,
        ];

        let summary = tome.add_sample("s0", reads);
        assert_eq!(summary.reads_total, 3);
        assert_eq!(summary.imported, 1);
        assert_eq!(summary.skipped(), 2);
    }

    #[test]
    fn test_chained_split_reads_import_as_normal() {
        let mut tome = Transcriptome::new(ImportParams::default());
        tome.add_sample(
            "seed",
            vec![read("r0", "chr8", Strand::Forward, vec![(100, 200)])],
        );

        let reads = vec![
            read("a", "chr8", Strand::Forward, vec![(1000, 1200)]),
            read("a", "chr8", Strand::Forward, vec![(5000, 5300)]),
        ];
        let summary = tome.add_sample("s1", reads).clone();

        // a single occurrence imports; no recurrence gate for rejoined chains
        assert_eq!(summary.chimeric_chained, 1);
        assert_eq!(summary.imported, 1);
        assert_eq!(summary.imported_chimeric, 0);

        let rejoined: Vec<_> = tome
            .genes
            .iter()
            .flat_map(|g| &g.transcripts)
            .filter(|tx| tx.exons == vec![(1000, 1200), (5000, 5300)])
            .collect();
        assert_eq!(rejoined.len(), 1);
        assert!(!rejoined[0].is_chimeric);
    }

    #[test]
    fn test_fusions_gated_on_recurrence() {
        let mut tome = Transcriptome::new(ImportParams::default());
        tome.add_sample(
            "seed",
            vec![
                read("r0", "chr8", Strand::Forward, vec![(100, 200)]),
                read("r1", "chr5", Strand::Forward, vec![(100, 200)]),
            ],
        );

        let fusion = |name: &str| {
            vec![
                read(name, "chr8", Strand::Forward, vec![(1000, 1200)]),
                read(name, "chr5", Strand::Forward, vec![(2000, 2300)]),
            ]
        };

        // one occurrence: below the recurrence floor
        let summary = tome.add_sample("s1", fusion("a")).clone();
        assert_eq!(summary.chimeric_below_min_coverage, 1);
        assert_eq!(summary.imported_chimeric, 0);

        // two occurrences of the same signature: retained on both loci
        let mut reads = fusion("b");
        reads.extend(fusion("c"));
        let summary = tome.add_sample("s2", reads).clone();
        assert_eq!(summary.imported_chimeric, 2);

        let chimeric: Vec<_> = tome
            .genes
            .iter()
            .flat_map(|g| &g.transcripts)
            .filter(|tx| tx.is_chimeric)
            .collect();
        assert_eq!(chimeric.len(), 2);
        assert!(chimeric.iter().all(|tx| tx.total_coverage() == 2));
    }

    #[test]
    fn test_order_independence() {
        let reads = vec![
            read("r1", "chr1", Strand::Forward, vec![(100, 200), (400, 500)]),
            read("r2", "chr1", Strand::Forward, vec![(90, 200), (400, 520)]),
            read("r3", "chr1", Strand::Forward, vec![(1000, 1500)]),
        ];
        let mut reversed = reads.clone();
        reversed.reverse();

        let mut a = Transcriptome::new(ImportParams::default());
        a.add_sample("s", reads);
        let mut b = Transcriptome::new(ImportParams::default());
        b.add_sample("s", reversed);

        let shape = |t: &Transcriptome| {
            let mut genes: Vec<_> = t
                .genes
                .iter()
                .map(|g| {
                    let mut txs: Vec<_> = g.transcripts.iter().map(|tx| tx.exons.clone()).collect();
                    txs.sort();
                    (g.chrom.clone(), g.span(), txs)
                })
                .collect();
            genes.sort();
            genes
        };
        assert_eq!(shape(&a), shape(&b));
    }
}

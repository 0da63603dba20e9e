//! Filtered, deterministic iteration over the model.
//!
//! Iteration order is fixed: chromosomes lexicographically, genes by start
//! within a chromosome, transcripts by their index within the gene.
//! Queries compile against the session's tag registry before any gene is
//! touched, so a bad expression fails fast instead of half-way through.

use iso_filter::{FilterContext, FilterError};
use iso_model::{Gene, Transcript, TranscriptExport};

use std::str::FromStr;

use crate::core::Transcriptome;

/// A genomic window, `chrom` alone or `chrom:start-end` (half-open).
#[derive(Debug, Clone, PartialEq)]
pub struct Region {
    pub chrom: String,
    pub start: Option<u64>,
    pub end: Option<u64>,
}

impl Region {
    pub fn contains(&self, chrom: &str, span: (u64, u64)) -> bool {
        if chrom != self.chrom {
            return false;
        }
        match (self.start, self.end) {
            (Some(start), Some(end)) => span.0 < end && start < span.1,
            _ => true,
        }
    }
}

impl FromStr for Region {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once(':') {
            None => Ok(Region {
                chrom: s.to_string(),
                start: None,
                end: None,
            }),
            Some((chrom, range)) => {
                let (start, end) = range
                    .split_once('-')
                    .ok_or_else(|| format!("expected chrom:start-end, got {}", s))?;
                let start = start
                    .replace(',', "")
                    .parse::<u64>()
                    .map_err(|_| format!("bad region start: {}", start))?;
                let end = end
                    .replace(',', "")
                    .parse::<u64>()
                    .map_err(|_| format!("bad region end: {}", end))?;
                if start >= end {
                    return Err(format!("empty region: {}", s));
                }

                Ok(Region {
                    chrom: chrom.to_string(),
                    start: Some(start),
                    end: Some(end),
                })
            }
        }
    }
}

impl Transcriptome {
    fn ordered_gene_indices(&self, region: Option<&Region>) -> Vec<usize> {
        let mut idxs: Vec<usize> = self
            .genes
            .iter()
            .enumerate()
            .filter(|(_, g)| !g.is_merged())
            .filter(|(_, g)| region.map_or(true, |r| r.contains(&g.chrom, g.span())))
            .map(|(idx, _)| idx)
            .collect();
        idxs.sort_by(|&a, &b| {
            let (ga, gb) = (&self.genes[a], &self.genes[b]);
            (&ga.chrom, ga.start, &ga.id).cmp(&(&gb.chrom, gb.start, &gb.id))
        });

        idxs
    }

    /// Genes in the window whose total coverage across samples reaches
    /// `min_coverage` and whose gene-context query matches, in genomic
    /// order. The query compiles before the first gene is touched; the
    /// walk itself is lazy, so the caller stops it by ceasing to consume.
    pub fn iter_genes<'a>(
        &'a self,
        region: Option<&Region>,
        query: Option<&str>,
        min_coverage: u32,
    ) -> Result<impl Iterator<Item = &'a Gene> + 'a, FilterError> {
        let compiled = query
            .map(|q| self.filters.compile(FilterContext::Gene, q))
            .transpose()?;

        Ok(self
            .ordered_gene_indices(region)
            .into_iter()
            .map(|idx| &self.genes[idx])
            .filter(move |gene| gene.total_coverage() >= min_coverage)
            .filter(move |gene| {
                compiled
                    .as_ref()
                    .map_or(true, |q| q.matches_gene(&self.filters, gene))
            }))
    }

    /// `(gene, transcript index, transcript)` triples in the window
    /// matching the transcript-context query, with at least `min_coverage`
    /// supporting reads. Lazy like [`Self::iter_genes`].
    pub fn iter_transcripts<'a>(
        &'a self,
        region: Option<&Region>,
        query: Option<&str>,
        min_coverage: u32,
    ) -> Result<impl Iterator<Item = (&'a Gene, usize, &'a Transcript)> + 'a, FilterError> {
        let compiled = query
            .map(|q| self.filters.compile(FilterContext::Transcript, q))
            .transpose()?;

        Ok(self
            .ordered_gene_indices(region)
            .into_iter()
            .flat_map(move |idx| {
                let gene = &self.genes[idx];
                gene.transcripts
                    .iter()
                    .enumerate()
                    .map(move |(tx_idx, tx)| (gene, tx_idx, tx))
            })
            .filter(move |(_, _, tx)| tx.total_coverage() >= min_coverage)
            .filter(move |(gene, tx_idx, _)| {
                compiled
                    .as_ref()
                    .map_or(true, |q| q.matches_transcript(&self.filters, gene, *tx_idx))
            }))
    }

    /// The stable export rows for the transcript table.
    pub fn export_transcripts<'a>(
        &'a self,
        region: Option<&Region>,
        query: Option<&str>,
        min_coverage: u32,
    ) -> Result<impl Iterator<Item = TranscriptExport> + 'a, FilterError> {
        let n_samples = self.n_samples();

        Ok(self
            .iter_transcripts(region, query, min_coverage)?
            .map(move |(gene, idx, tx)| {
                let mut coverage = tx.coverage.clone();
                coverage.resize(n_samples, 0);

                TranscriptExport {
                    gene_id: gene.id.clone(),
                    transcript_index: idx,
                    chrom: gene.chrom.clone(),
                    strand: tx.strand,
                    exons: tx.exons.clone(),
                    coverage,
                    category: tx.novelty(),
                    subcategories: tx
                        .annotation
                        .as_ref()
                        .map(|a| a.labels().iter().map(|l| l.to_string()).collect())
                        .unwrap_or_default(),
                    downstream_a_content: tx.downstream_a_content,
                    orf: tx.orf,
                    is_chimeric: tx.is_chimeric,
                }
            }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use config::{ImportParams, Strand};
    use iso_model::{AlignedRead, ReadFlags};

    fn read(name: &str, chrom: &str, blocks: Vec<(u64, u64)>) -> AlignedRead {
        AlignedRead {
            read_name: name.into(),
            chrom: chrom.into(),
            strand: Strand::Forward,
            blocks,
            mapq: 60,
            aligned_fraction: 0.9,
            flags: ReadFlags::default(),
        }
    }

    fn session() -> Transcriptome {
        let mut tome = Transcriptome::new(ImportParams::default());
        tome.add_sample(
            "s0",
            vec![
                read("r1", "chr2", vec![(100, 200), (400, 500)]),
                read("r2", "chr2", vec![(100, 200), (400, 500)]),
                read("r3", "chr1", vec![(5000, 5400)]),
                read("r4", "chr10", vec![(100, 300)]),
            ],
        );
        tome
    }

    #[test]
    fn test_region_parsing() {
        assert_eq!(
            "chr1:1,000-2000".parse::<Region>(),
            Ok(Region {
                chrom: "chr1".into(),
                start: Some(1000),
                end: Some(2000),
            })
        );
        assert!("chr1:2000-1000".parse::<Region>().is_err());
        assert!("chr1".parse::<Region>().unwrap().contains("chr1", (5, 6)));
    }

    #[test]
    fn test_iteration_order_is_lexicographic() {
        let tome = session();
        let chroms: Vec<_> = tome
            .iter_genes(None, None, 0)
            .expect("no query")
            .map(|g| g.chrom.clone())
            .collect();

        assert_eq!(chroms, vec!["chr1", "chr10", "chr2"]);
    }

    #[test]
    fn test_iteration_is_restartable() {
        let tome = session();

        // consuming part of one walk does not disturb the next
        let mut partial = tome.iter_genes(None, None, 0).expect("no query");
        assert!(partial.next().is_some());
        drop(partial);

        assert_eq!(tome.iter_genes(None, None, 0).expect("no query").count(), 3);
    }

    #[test]
    fn test_region_restricts_iteration() {
        let tome = session();
        let region: Region = "chr2:450-460".parse().expect("valid");
        let genes: Vec<_> = tome
            .iter_genes(Some(&region), None, 0)
            .expect("no query")
            .collect();

        assert_eq!(genes.len(), 1);
        assert_eq!(genes[0].chrom, "chr2");
    }

    #[test]
    fn test_min_coverage_gate() {
        let tome = session();

        assert_eq!(tome.iter_transcripts(None, None, 1).expect("ok").count(), 3);
        assert_eq!(tome.iter_transcripts(None, None, 2).expect("ok").count(), 1);
        assert_eq!(tome.iter_genes(None, None, 2).expect("ok").count(), 1);
    }

    #[test]
    fn test_query_filters_transcripts() {
        let tome = session();

        let spliced: Vec<_> = tome
            .iter_transcripts(None, Some("MULTIEXON"), 0)
            .expect("known tag")
            .collect();
        assert_eq!(spliced.len(), 1);
        let (gene, idx, tx) = spliced[0];
        assert!(std::ptr::eq(&gene.transcripts[idx], tx));

        // a bad expression fails at construction, before any gene is walked
        assert!(tome.iter_transcripts(None, Some("no_such_tag"), 0).is_err());
    }

    #[test]
    fn test_export_rows() {
        let tome = session();
        let rows: Vec<_> = tome.export_transcripts(None, None, 2).expect("ok").collect();

        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].coverage, vec![2]);
        assert_eq!(rows[0].category, "NA");
        assert!(rows[0].to_tsv_row().starts_with("NOVEL_"));
    }
}

//! Gene locus assignment.
//!
//! Every imported chain lands in exactly one gene of the session. The
//! assigner scans the per-(chromosome, strand) bucket for same-strand span
//! overlap; the locus sharing the most exonic span wins ties, annotated
//! loci are preferred over novel ones, and novel loci a chain bridges are
//! absorbed into the winner. A chain no locus claims opens a new novel
//! gene.

use config::Strand;
use hashbrown::HashMap;
use iso_model::{span_overlap, Gene};

pub type GeneIndex = HashMap<(String, Strand), Vec<usize>>;

/// Result of one assignment: the owning gene plus what it took to get
/// there.
#[derive(Debug, PartialEq)]
pub struct LocusOutcome {
    pub gene_idx: usize,
    pub created: bool,
    pub merged: usize,
}

pub fn assign_locus(
    genes: &mut Vec<Gene>,
    index: &mut GeneIndex,
    chrom: &str,
    strand: Strand,
    span: (u64, u64),
    next_novel: &mut u64,
) -> LocusOutcome {
    let bucket = index
        .entry((chrom.to_string(), strand))
        .or_insert_with(Vec::new);

    let mut hits: Vec<(usize, u64)> = bucket
        .iter()
        .map(|&idx| (idx, span_overlap(genes[idx].span(), span)))
        .filter(|&(_, shared)| shared > 0)
        .collect();

    if hits.is_empty() {
        let id = format!("NOVEL_{:06}", *next_novel);
        *next_novel += 1;
        let gene_idx = genes.len();
        genes.push(Gene::new_novel(id, chrom, strand, span.0, span.1));

        let pos = bucket.partition_point(|&idx| genes[idx].start <= span.0);
        bucket.insert(pos, gene_idx);

        return LocusOutcome {
            gene_idx,
            created: true,
            merged: 0,
        };
    }

    // annotated loci outrank novel ones, then most shared bases wins
    hits.sort_by_key(|&(idx, shared)| {
        (std::cmp::Reverse(genes[idx].is_reference), std::cmp::Reverse(shared), idx)
    });
    let keeper = hits[0].0;

    let mut merged = 0;
    for &(other, _) in &hits[1..] {
        // annotated loci stay apart; bridging them is a readthrough signal,
        // not a merge
        if genes[other].is_reference {
            continue;
        }

        log::info!(
            "read bridges loci {} and {}: merging the novel locus",
            genes[keeper].id,
            genes[other].id
        );
        merge_pair(genes, keeper, other);
        bucket.retain(|&idx| idx != other);
        merged += 1;
    }

    genes[keeper].extend(span.0, span.1);

    LocusOutcome {
        gene_idx: keeper,
        created: false,
        merged,
    }
}

/// Moves everything from `other` into `keeper` and tombstones `other`.
fn merge_pair(genes: &mut [Gene], keeper: usize, other: usize) {
    debug_assert_ne!(keeper, other);

    let (eaten, into) = if keeper < other {
        let (left, right) = genes.split_at_mut(other);
        (&mut right[0], &mut left[keeper])
    } else {
        let (left, right) = genes.split_at_mut(keeper);
        (&mut left[other], &mut right[0])
    };

    into.absorb(eaten);
    eaten.merged_into = Some(keeper);
}

/// Follows merge tombstones to the surviving gene.
pub fn resolve(genes: &[Gene], mut idx: usize) -> usize {
    while let Some(target) = genes[idx].merged_into {
        idx = target;
    }

    idx
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup() -> (Vec<Gene>, GeneIndex) {
        (Vec::new(), GeneIndex::new())
    }

    #[test]
    fn test_novel_gene_created() {
        let (mut genes, mut index) = setup();
        let mut novel = 0;

        let out = assign_locus(
            &mut genes,
            &mut index,
            "chr1",
            Strand::Forward,
            (100, 500),
            &mut novel,
        );

        assert!(out.created);
        assert_eq!(genes[out.gene_idx].id, "NOVEL_000000");
        assert_eq!(genes[out.gene_idx].span(), (100, 500));
    }

    #[test]
    fn test_largest_overlap_wins() {
        let (mut genes, mut index) = setup();
        genes.push(Gene::new_novel("A".into(), "chr1", Strand::Forward, 0, 150));
        genes.push(Gene::new_novel("B".into(), "chr1", Strand::Forward, 400, 900));
        let mut ga = Gene::from_reference("REF".into(), None, "chr1", Strand::Forward);
        ga.extend(100, 600);
        genes.push(ga);
        index.insert(("chr1".into(), Strand::Forward), vec![0, 2, 1]);

        let mut novel = 0;
        let out = assign_locus(
            &mut genes,
            &mut index,
            "chr1",
            Strand::Forward,
            (120, 620),
            &mut novel,
        );

        // the annotated locus wins and the bridged novel loci fold in
        assert_eq!(out.gene_idx, 2);
        assert_eq!(out.merged, 2);
        assert_eq!(genes[0].merged_into, Some(2));
        assert_eq!(genes[1].merged_into, Some(2));
        assert_eq!(genes[2].span(), (0, 900));
        assert_eq!(resolve(&genes, 0), 2);
    }

    #[test]
    fn test_opposite_strand_never_matches() {
        let (mut genes, mut index) = setup();
        genes.push(Gene::new_novel("A".into(), "chr1", Strand::Forward, 0, 500));
        index.insert(("chr1".into(), Strand::Forward), vec![0]);

        let mut novel = 0;
        let out = assign_locus(
            &mut genes,
            &mut index,
            "chr1",
            Strand::Reverse,
            (100, 400),
            &mut novel,
        );

        assert!(out.created);
        assert_ne!(out.gene_idx, 0);
    }

    #[test]
    fn test_annotated_loci_stay_apart() {
        let (mut genes, mut index) = setup();
        for (id, range) in [("R1", (0u64, 600u64)), ("R2", (400, 900))] {
            let mut g = Gene::from_reference(id.into(), None, "chr1", Strand::Forward);
            g.extend(range.0, range.1);
            genes.push(g);
        }
        index.insert(("chr1".into(), Strand::Forward), vec![0, 1]);

        let mut novel = 0;
        let out = assign_locus(
            &mut genes,
            &mut index,
            "chr1",
            Strand::Forward,
            (100, 800),
            &mut novel,
        );

        assert_eq!(out.merged, 0);
        assert!(genes.iter().all(|g| !g.is_merged()));
        // R1 shares 500bp, R2 shares 400bp
        assert_eq!(out.gene_idx, 0);
    }
}

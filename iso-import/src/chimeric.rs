//! Resolution of split alignments.
//!
//! A read with several alignment parts is not necessarily a fusion event:
//! long deletions or misassembled contigs split one transcript over
//! colinear parts. Parts on the same chromosome and strand in genomic
//! order are rejoined into a single chain and handled like any other
//! read. Everything else is a genuine chimera whose parts are kept
//! separate; the caller pools those per junction signature and retains
//! the recurrent ones.

use config::{ImportParams, Strand};
use hashbrown::HashSet;
use iso_model::{span_of, validate_chain, AlignedRead};
use thiserror::Error;

use crate::chain::merge_short_gaps;

/// One normalized part of a chimeric read.
pub type FusionPart = (String, Strand, Vec<(u64, u64)>);

/// What a split read turned out to be.
#[derive(Debug, Clone, PartialEq)]
pub enum ChimericEvent {
    /// Colinear parts rejoined into one chain; a normal read henceforth.
    Chained(String, Strand, Vec<(u64, u64)>),
    /// A genuine chimera, per-part chains in genomic order.
    Fusion(Vec<FusionPart>),
}

#[derive(Debug, Error, PartialEq)]
pub enum ChimericDrop {
    #[error("part aligned to an unknown sequence")]
    UnalignedPart,
    #[error("part with unusable alignment blocks")]
    Malformed,
}

/// Resolves the parts of a split read.
///
/// All parts must sit on a known chromosome and carry a valid block list.
/// Parts sharing chromosome and strand that follow each other along the
/// genome with at most `max_chimeric_part_overlap` bases of seam overlap
/// rejoin into one chain; overlapping seam bases are trimmed from the
/// downstream part. Any other combination is a fusion.
pub fn resolve_parts(
    parts: &[AlignedRead],
    known_chroms: &HashSet<String>,
    params: &ImportParams,
) -> Result<ChimericEvent, ChimericDrop> {
    debug_assert!(parts.len() > 1);

    if parts.iter().any(|p| !known_chroms.contains(&p.chrom)) {
        return Err(ChimericDrop::UnalignedPart);
    }
    if parts
        .iter()
        .any(|p| p.flags.is_filtered() || validate_chain(&p.blocks).is_err())
    {
        return Err(ChimericDrop::Malformed);
    }

    let mut pieces: Vec<FusionPart> = parts
        .iter()
        .map(|p| {
            (
                p.chrom.clone(),
                p.strand,
                merge_short_gaps(&p.blocks, params.min_intron_len),
            )
        })
        .collect();
    pieces.sort();

    let (chrom, strand) = (pieces[0].0.clone(), pieces[0].1);
    if pieces.iter().all(|(c, s, _)| *c == chrom && *s == strand) {
        if let Some(joined) = join_colinear(&pieces, params) {
            return Ok(ChimericEvent::Chained(chrom, strand, joined));
        }
    }

    Ok(ChimericEvent::Fusion(pieces))
}

/// Seam-joins same-chromosome parts already sorted by start, or gives up.
fn join_colinear(pieces: &[FusionPart], params: &ImportParams) -> Option<Vec<(u64, u64)>> {
    let mut joined = pieces[0].2.clone();
    for (_, _, chain) in &pieces[1..] {
        let prev_end = joined[joined.len() - 1].1;
        let (start, end) = span_of(chain);

        // monotonic along the genome, bounded seam overlap
        if end <= prev_end || start + params.max_chimeric_part_overlap < prev_end {
            return None;
        }

        for &(s, e) in chain {
            if e <= prev_end {
                continue;
            }
            let s = s.max(prev_end);
            match joined.last_mut() {
                Some(last) if s.saturating_sub(last.1) < params.min_intron_len => last.1 = e,
                _ => joined.push((s, e)),
            }
        }
    }

    validate_chain(&joined).ok().map(|_| joined)
}

#[cfg(test)]
mod tests {
    use super::*;
    use iso_model::ReadFlags;

    fn part(chrom: &str, strand: Strand, blocks: Vec<(u64, u64)>) -> AlignedRead {
        AlignedRead {
            read_name: "r1".into(),
            chrom: chrom.into(),
            strand,
            blocks,
            mapq: 60,
            aligned_fraction: 0.5,
            flags: ReadFlags {
                supplementary: true,
                ..ReadFlags::default()
            },
        }
    }

    fn chroms() -> HashSet<String> {
        ["chr5", "chr8"].iter().map(|c| c.to_string()).collect()
    }

    #[test]
    fn test_colinear_parts_rejoin() {
        let params = ImportParams::default();
        let parts = vec![
            part("chr8", Strand::Forward, vec![(1000, 1200), (2000, 2100)]),
            part("chr8", Strand::Forward, vec![(5000, 5300)]),
        ];

        assert_eq!(
            resolve_parts(&parts, &chroms(), &params),
            Ok(ChimericEvent::Chained(
                "chr8".into(),
                Strand::Forward,
                vec![(1000, 1200), (2000, 2100), (5000, 5300)],
            ))
        );
    }

    #[test]
    fn test_seam_overlap_is_trimmed() {
        let params = ImportParams::default();
        let parts = vec![
            part("chr8", Strand::Forward, vec![(1000, 1200)]),
            part("chr8", Strand::Forward, vec![(1190, 1500)]),
        ];

        assert_eq!(
            resolve_parts(&parts, &chroms(), &params),
            Ok(ChimericEvent::Chained(
                "chr8".into(),
                Strand::Forward,
                vec![(1000, 1500)],
            ))
        );
    }

    #[test]
    fn test_unknown_chrom_drops_read() {
        let params = ImportParams::default();
        let parts = vec![
            part("chr8", Strand::Forward, vec![(1000, 1200)]),
            part("chrUn_KI270752v1", Strand::Forward, vec![(100, 300)]),
        ];

        assert_eq!(
            resolve_parts(&parts, &chroms(), &params),
            Err(ChimericDrop::UnalignedPart)
        );
    }

    #[test]
    fn test_malformed_part_is_dropped() {
        let params = ImportParams::default();
        // sorted but overlapping blocks within one part
        let parts = vec![
            part("chr8", Strand::Forward, vec![(100, 300), (200, 400)]),
            part("chr8", Strand::Forward, vec![(5000, 5300)]),
        ];

        assert_eq!(
            resolve_parts(&parts, &chroms(), &params),
            Err(ChimericDrop::Malformed)
        );
    }

    #[test]
    fn test_cross_chrom_is_a_fusion() {
        let params = ImportParams::default();
        let parts = vec![
            part("chr8", Strand::Forward, vec![(1000, 1200)]),
            part("chr5", Strand::Forward, vec![(100, 300)]),
        ];

        assert_eq!(
            resolve_parts(&parts, &chroms(), &params),
            Ok(ChimericEvent::Fusion(vec![
                ("chr5".into(), Strand::Forward, vec![(100, 300)]),
                ("chr8".into(), Strand::Forward, vec![(1000, 1200)]),
            ]))
        );
    }

    #[test]
    fn test_excess_overlap_is_a_fusion() {
        let params = ImportParams::default();
        let parts = vec![
            part("chr8", Strand::Reverse, vec![(1000, 1500)]),
            part("chr8", Strand::Reverse, vec![(1100, 2000)]),
        ];

        assert!(matches!(
            resolve_parts(&parts, &chroms(), &params),
            Ok(ChimericEvent::Fusion(_))
        ));
    }
}

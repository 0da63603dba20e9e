//! Exon-chain normalization of single alignment parts.

use config::ImportParams;
use iso_model::{validate_chain, AlignedRead, ChainError};
use thiserror::Error;

/// Why a read was excluded from import. Every skipped read is counted
/// under exactly one of these in the sample summary.
#[derive(Debug, Error, PartialEq)]
pub enum SkipReason {
    #[error("aligned fraction below threshold")]
    LowFraction,
    #[error("mapping quality below threshold")]
    LowMapq,
    #[error("secondary, duplicate or QC-failed alignment")]
    Flagged,
    #[error("malformed alignment: {0}")]
    Malformed(ChainError),
}

/// Turns the alignment blocks of one read into an exon chain.
///
/// Gaps shorter than `min_intron_len` are treated as alignment noise and
/// closed; the surviving gaps are the introns. The returned chain is
/// sorted, strictly increasing and half-open.
pub fn normalize_read(
    read: &AlignedRead,
    params: &ImportParams,
) -> Result<Vec<(u64, u64)>, SkipReason> {
    if read.flags.is_filtered() {
        return Err(SkipReason::Flagged);
    }
    if read.aligned_fraction < params.min_aligned_fraction {
        return Err(SkipReason::LowFraction);
    }
    if read.mapq < params.min_mapq {
        return Err(SkipReason::LowMapq);
    }

    validate_chain(&read.blocks).map_err(SkipReason::Malformed)?;

    Ok(merge_short_gaps(&read.blocks, params.min_intron_len))
}

/// Closes gaps below `min_intron_len` between consecutive blocks.
pub fn merge_short_gaps(blocks: &[(u64, u64)], min_intron_len: u64) -> Vec<(u64, u64)> {
    let mut chain: Vec<(u64, u64)> = Vec::with_capacity(blocks.len());

    for &(start, end) in blocks {
        match chain.last_mut() {
            Some(prev) if start - prev.1 < min_intron_len => prev.1 = end,
            _ => chain.push((start, end)),
        }
    }

    chain
}

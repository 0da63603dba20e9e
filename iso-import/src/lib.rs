//! Import pipeline: turns decoded long-read alignments into the transcript
//! model.
//!
//! Reads flow through four stages. The normalizer ([`chain`]) turns raw
//! alignment blocks into exon chains and drops unusable reads. The chimeric
//! resolver ([`chimeric`]) reconciles split alignments into single chains
//! where possible and gates the rest on recurrence. The locus assigner
//! ([`locus`]) finds or creates the gene every chain belongs to, merging
//! loci a read bridges. The clusterer ([`cluster`]) collapses chains into
//! transcripts and later unifies their observed 5'/3' ends. The
//! [`core::Transcriptome`] session drives all of it and [`iter`] serves
//! filtered, deterministic iteration over the result.

pub mod chain;
pub mod chimeric;
pub mod cluster;
pub mod core;
pub mod iter;
pub mod locus;

pub use crate::core::{ReferenceSummary, Sample, SampleSummary, Transcriptome};
pub use crate::iter::Region;

//! Data model for the isorecon pipeline.
//!
//! This crate owns the in-memory transcript model: exon-chain primitives,
//! expressed transcripts with per-sample evidence, reference transcripts,
//! gene loci and the coverage matrix. It also carries the external input
//! contracts (decoded alignment records, annotation entries) and the text
//! parsers the entry adapter feeds them with. No I/O happens here beyond
//! line parsing.

pub mod gene;
pub mod record;
pub mod seq;

pub use gene::{CoverageMatrix, Gene};
pub use record::{
    exonic_overlap, fraction_overlap, introns_of, span_of, span_overlap, validate_chain,
    AlignedRead, Annotation, AnnotationEntry, ChainError, ReadFlags, RefTranscript,
    SpliceCategory, Transcript, TranscriptExport,
};
pub use seq::SequenceProvider;

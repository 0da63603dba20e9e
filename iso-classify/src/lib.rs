//! Novelty classification.
//!
//! Compares every reconstructed transcript against the reference
//! transcripts of its locus and assigns one primary category (FSM, ISM,
//! NIC, NNC, NOVEL) plus independent subclass labels. The decision ladder
//! is ordered and first match wins; subclasses never change the primary
//! category.

pub mod core;
pub mod utils;

pub use crate::core::{classify_transcriptome, ClassifySummary};

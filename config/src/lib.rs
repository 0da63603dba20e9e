use indicatif::{ProgressBar, ProgressStyle};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

// default thresholds
pub const MIN_ALIGNED_FRACTION: f32 = 0.75;
pub const MIN_MAPQ: u8 = 0;
pub const MIN_INTRON_LEN: u64 = 60;
pub const MONO_EXON_OVERLAP: f32 = 0.5;
pub const END_CLUSTER_WINDOW: u64 = 25;
pub const TSS_SITE_WINDOW: u64 = 50;
pub const MIN_CHIMERIC_COVERAGE: u32 = 2;
pub const MAX_CHIMERIC_PART_OVERLAP: u64 = 20;
pub const DOWNSTREAM_A_LEN: u64 = 30;
pub const INTERNAL_PRIMING_THRESHOLD: f32 = 0.5;

// file names
pub const TRANSCRIPT_TABLE: &str = "transcripts.tsv";
pub const GENE_TABLE: &str = "genes.tsv";

// os
#[cfg(not(windows))]
const TICK_SETTINGS: (&str, u64) = ("⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏ ", 80);
#[cfg(windows)]
const TICK_SETTINGS: (&str, u64) = (r"+-x| ", 200);

/// Genomic strand of a read, transcript or gene.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Strand {
    Forward,
    Reverse,
}

impl std::fmt::Display for Strand {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            Strand::Forward => write!(f, "+"),
            Strand::Reverse => write!(f, "-"),
        }
    }
}

impl FromStr for Strand {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "+" => Ok(Strand::Forward),
            "-" => Ok(Strand::Reverse),
            _ => Err(format!("strand is not + or -: {}", s)),
        }
    }
}

/// Tunable thresholds of the import pipeline.
///
/// The gap-merging, mono-exon overlap, end-clustering and chimeric-retention
/// knobs are domain-calibrated constants, so they travel as configuration
/// instead of being hard-coded at the call sites.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImportParams {
    /// minimum aligned fraction of the read length
    pub min_aligned_fraction: f32,
    /// minimum mapping quality
    pub min_mapq: u8,
    /// gaps shorter than this are indel noise, not introns
    pub min_intron_len: u64,
    /// fractional overlap for mono-exon transcript matching
    pub mono_exon_overlap: f32,
    /// maximum gap between raw TSS/PAS positions of one cluster
    pub end_cluster_window: u64,
    /// distance to an annotated site below which a TSS/PAS is not novel
    pub tss_site_window: u64,
    /// chimeric chains seen fewer times per sample are dropped
    pub min_chimeric_coverage: u32,
    /// maximum tolerated overlap between chained chimeric parts
    pub max_chimeric_part_overlap: u64,
}

impl Default for ImportParams {
    fn default() -> Self {
        Self {
            min_aligned_fraction: MIN_ALIGNED_FRACTION,
            min_mapq: MIN_MAPQ,
            min_intron_len: MIN_INTRON_LEN,
            mono_exon_overlap: MONO_EXON_OVERLAP,
            end_cluster_window: END_CLUSTER_WINDOW,
            tss_site_window: TSS_SITE_WINDOW,
            min_chimeric_coverage: MIN_CHIMERIC_COVERAGE,
            max_chimeric_part_overlap: MAX_CHIMERIC_PART_OVERLAP,
        }
    }
}

/// return a pre-configured progress bar
pub fn get_progress_bar(length: u64, msg: &str) -> ProgressBar {
    let progressbar_style = ProgressStyle::default_spinner()
        .tick_chars(TICK_SETTINGS.0)
        .template(" {spinner} {msg:<30} {wide_bar} ETA {eta_precise} ")
        .expect("no template error");

    let progress_bar = ProgressBar::new(length);

    progress_bar.set_style(progressbar_style);
    progress_bar.enable_steady_tick(Duration::from_millis(TICK_SETTINGS.1));
    progress_bar.set_message(msg.to_owned());

    progress_bar
}

/// write any collection to a file
pub fn write_collection(data: &Vec<String>, fname: &str) {
    log::info!("Records in {}: {:?}. Writing...", fname, data.len());
    let f = match File::create(fname) {
        Ok(f) => f,
        Err(e) => panic!("Error creating file: {}", e),
    };
    let mut writer = BufWriter::new(f);

    for line in data.iter() {
        writeln!(writer, "{}", line).unwrap_or_else(|e| {
            panic!("Error writing to file: {}", e);
        });
    }
}

/// error handling for CLI
#[derive(Debug, Error)]
pub enum CliError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

/// argument checker for the entry binary
pub trait ArgCheck {
    fn check(&self) -> Result<(), CliError> {
        self.validate_args()
    }

    fn validate_args(&self) -> Result<(), CliError> {
        if self.get_ref().is_empty() {
            log::warn!("No reference annotation provided. All loci will be novel...");
        }
        for db in self.get_ref() {
            validate(db)?;
        }

        if self.get_query().is_empty() {
            let err = "No sample files provided".to_string();
            return Err(CliError::InvalidInput(err));
        }
        for query in self.get_query() {
            validate(query)?;
        }

        Ok(())
    }

    fn get_ref(&self) -> &Vec<PathBuf>;
    fn get_query(&self) -> &Vec<PathBuf>;
}

/// argument validation
pub fn validate(arg: &PathBuf) -> Result<(), CliError> {
    if !arg.exists() {
        return Err(CliError::InvalidInput(format!("{:?} does not exist", arg)));
    }

    if !arg.is_file() {
        return Err(CliError::InvalidInput(format!("{:?} is not a file", arg)));
    }

    match std::fs::metadata(arg) {
        Ok(metadata) if metadata.len() == 0 => {
            Err(CliError::InvalidInput(format!("file {:?} is empty", arg)))
        }
        Ok(_) => Ok(()),
        Err(e) => Err(CliError::IoError(e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strand_roundtrip() {
        assert_eq!("+".parse::<Strand>().unwrap(), Strand::Forward);
        assert_eq!("-".parse::<Strand>().unwrap(), Strand::Reverse);
        assert_eq!(Strand::Forward.to_string(), "+");
        assert!("*".parse::<Strand>().is_err());
    }

    #[test]
    fn test_default_params() {
        let params = ImportParams::default();

        assert_eq!(params.min_intron_len, MIN_INTRON_LEN);
        assert_eq!(params.min_chimeric_coverage, MIN_CHIMERIC_COVERAGE);
        assert!(params.mono_exon_overlap > 0.0 && params.mono_exon_overlap <= 1.0);
    }
}

use clap::Parser;
use config::ArgCheck;

use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(name = "isorecon")]
#[command(about = "reconstruct and classify transcript models from long-read alignments")]
#[command(version = config::VERSION)]
pub struct Args {
    /// reference annotation in BED12; omit to call every locus novel
    #[arg(short = 'r', long = "ref", value_name = "BED12", num_args = 0..)]
    pub reference: Vec<PathBuf>,

    /// decoded alignment tables, one per sample
    #[arg(short = 'q', long = "query", value_name = "TSV", num_args = 1.., required = true)]
    pub query: Vec<PathBuf>,

    /// sample names; defaults to the query file stems
    #[arg(long = "names", value_name = "NAME", num_args = 0..)]
    pub names: Vec<String>,

    /// minimum supporting reads for an exported transcript
    #[arg(long = "min-coverage", default_value_t = 1)]
    pub min_coverage: u32,

    /// transcript-context query applied at export
    #[arg(short = 'f', long = "filter", value_name = "QUERY")]
    pub filter: Option<String>,

    /// extra transcript tags, registered before the filter compiles
    #[arg(long = "tag", value_name = "NAME=EXPRESSION")]
    pub tags: Vec<String>,

    /// restrict output to a window, chrom or chrom:start-end
    #[arg(long = "region", value_name = "REGION")]
    pub region: Option<String>,

    /// number of worker threads
    #[arg(short = 't', long = "threads", default_value_t = num_cpus::get())]
    pub threads: usize,

    /// output directory
    #[arg(short = 'o', long = "outdir", default_value = ".")]
    pub outdir: PathBuf,
}

impl ArgCheck for Args {
    fn get_ref(&self) -> &Vec<PathBuf> {
        &self.reference
    }

    fn get_query(&self) -> &Vec<PathBuf> {
        &self.query
    }
}

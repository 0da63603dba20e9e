//! isorecon: reconstruct transcript models from long-read alignments,
//! classify them against a reference annotation and export the filtered
//! tables.

use anyhow::{anyhow, Result};
use clap::Parser;
use config::{write_collection, ArgCheck, ImportParams, GENE_TABLE, TRANSCRIPT_TABLE};
use iso_filter::FilterContext;
use iso_import::{Region, Transcriptome};
use log::Level;
use simple_logger::init_with_level;

mod cli;
mod utils;

fn main() -> Result<()> {
    init_with_level(Level::Info)?;
    let args = cli::Args::parse();
    args.check()?;

    rayon::ThreadPoolBuilder::new()
        .num_threads(args.threads)
        .build_global()?;

    let mut tome = Transcriptome::new(ImportParams::default());

    let mut reference_summaries = Vec::new();
    for path in &args.reference {
        let entries = utils::read_reference(path)?;
        reference_summaries.push(tome.add_reference(entries));
    }

    for spec in &args.tags {
        let (name, expr) = utils::parse_tag(spec)?;
        tome.filters
            .add_filter(name, expr, FilterContext::Transcript)?;
    }

    for (idx, path) in args.query.iter().enumerate() {
        let name = args
            .names
            .get(idx)
            .cloned()
            .unwrap_or_else(|| utils::sample_name(path));
        let reads = utils::read_sample(path)?;
        tome.add_sample(&name, reads);
    }

    tome.unify_all_ends();
    let classified = iso_classify::classify_transcriptome(&mut tome.genes, &tome.params);

    let region = args
        .region
        .as_deref()
        .map(|r| r.parse::<Region>())
        .transpose()
        .map_err(|e| anyhow!(e))?;

    std::fs::create_dir_all(&args.outdir)?;
    write_transcript_table(&tome, region.as_ref(), &args)?;
    write_gene_table(&tome, region.as_ref(), &args)?;
    write_summary(&tome, &reference_summaries, &classified, &args)?;

    Ok(())
}

fn write_transcript_table(
    tome: &Transcriptome,
    region: Option<&Region>,
    args: &cli::Args,
) -> Result<()> {
    let rows = tome.export_transcripts(region, args.filter.as_deref(), args.min_coverage)?;

    let mut lines = vec![format!(
        "#gene_id\ttranscript\tchrom\tstrand\texons\tcoverage[{}]\tcategory\tsubcategories\tdownstream_a\tchimeric",
        tome.sample_names().join(",")
    )];
    lines.extend(rows.map(|row| row.to_tsv_row()));

    let out = args.outdir.join(TRANSCRIPT_TABLE);
    write_collection(&lines, &out.to_string_lossy());

    Ok(())
}

fn write_gene_table(tome: &Transcriptome, region: Option<&Region>, args: &cli::Args) -> Result<()> {
    let n_samples = tome.n_samples();

    let mut lines = vec![format!(
        "#id\tname\tregion\tstrand\tannotated\ttranscripts\tref_transcripts\tcoverage[{}]",
        tome.sample_names().join(",")
    )];
    for gene in tome.iter_genes(region, None, 0)? {
        lines.push(format!(
            "{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}",
            gene.id,
            gene.name.as_deref().unwrap_or("."),
            gene.region(),
            gene.strand,
            gene.is_annotated(),
            gene.n_transcripts(),
            gene.n_ref_transcripts(),
            gene.gene_coverage(n_samples)
                .iter()
                .map(|c| c.to_string())
                .collect::<Vec<_>>()
                .join(","),
        ));
    }

    let out = args.outdir.join(GENE_TABLE);
    write_collection(&lines, &out.to_string_lossy());

    Ok(())
}

fn write_summary(
    tome: &Transcriptome,
    reference: &[iso_import::ReferenceSummary],
    classified: &iso_classify::ClassifySummary,
    args: &cli::Args,
) -> Result<()> {
    let report = serde_json::json!({
        "reference": reference,
        "samples": tome.samples,
        "classification": classified,
        "genes": tome.n_genes(),
        "transcripts": tome.n_transcripts(),
    });

    let path = args.outdir.join("summary.json");
    std::fs::write(&path, serde_json::to_string_pretty(&report)?)?;
    log::info!("run summary written to {:?}", path);

    Ok(())
}

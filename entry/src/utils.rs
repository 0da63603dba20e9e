//! File adapters between on-disk tables and the model's input contracts.

use anyhow::{anyhow, Context, Result};
use hashbrown::HashSet;
use iso_model::{AlignedRead, AnnotationEntry, RefTranscript};

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

/// Gene id of a reference transcript: the name up to the last dot, the
/// usual versioned-accession convention.
fn gene_id_of(name: &str) -> String {
    name.rsplit_once('.')
        .map(|(gene, _)| gene.to_string())
        .unwrap_or_else(|| name.to_string())
}

/// Reads a BED12 annotation into the entry stream: one gene entry per new
/// gene id, then its transcripts.
pub fn read_reference(path: &Path) -> Result<Vec<AnnotationEntry>> {
    let file = File::open(path).with_context(|| format!("cannot open {:?}", path))?;
    let mut entries = Vec::new();
    let mut seen: HashSet<String> = HashSet::new();

    for (num, line) in BufReader::new(file).lines().enumerate() {
        let line = line?;
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let (chrom, strand, record) = RefTranscript::from_bed12(&line)
            .map_err(|e| anyhow!("{:?} line {}: {}", path, num + 1, e))?;
        let gene_id = gene_id_of(&record.transcript_id);

        if seen.insert(gene_id.clone()) {
            entries.push(AnnotationEntry::Gene {
                gene_id: gene_id.clone(),
                gene_name: None,
                chrom: chrom.clone(),
                strand,
            });
        }
        entries.push(AnnotationEntry::Transcript {
            gene_id,
            chrom,
            strand,
            record,
        });
    }

    Ok(entries)
}

/// Reads one sample's decoded alignment table.
pub fn read_sample(path: &Path) -> Result<Vec<AlignedRead>> {
    let file = File::open(path).with_context(|| format!("cannot open {:?}", path))?;
    let mut reads = Vec::new();

    for (num, line) in BufReader::new(file).lines().enumerate() {
        let line = line?;
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        reads.push(
            AlignedRead::from_tsv(&line)
                .map_err(|e| anyhow!("{:?} line {}: {}", path, num + 1, e))?,
        );
    }

    Ok(reads)
}

pub fn sample_name(path: &Path) -> String {
    path.file_stem()
        .map(|stem| stem.to_string_lossy().to_string())
        .unwrap_or_else(|| path.to_string_lossy().to_string())
}

/// Splits a `NAME=EXPRESSION` tag definition.
pub fn parse_tag(spec: &str) -> Result<(&str, &str)> {
    spec.split_once('=')
        .map(|(name, expr)| (name.trim(), expr.trim()))
        .filter(|(name, expr)| !name.is_empty() && !expr.is_empty())
        .ok_or_else(|| anyhow!("expected NAME=EXPRESSION, got '{}'", spec))
}

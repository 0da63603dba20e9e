//! The classification pipeline.
//!
//! Genes classify independently, so the arena is walked with a rayon
//! worker pool; neighbor loci needed for antisense and readthrough calls
//! are gathered in a read-only pre-pass.

use config::{get_progress_bar, ImportParams, Strand};
use dashmap::DashSet;
use hashbrown::{HashMap, HashSet};
use iso_model::{
    exonic_overlap, span_overlap, Annotation, Gene, SpliceCategory, Transcript,
};
use rayon::prelude::*;

use std::sync::atomic::Ordering;

use crate::utils::{contains_interval, near_any, subchain_offset, within_any, ParallelCounter};

pub use crate::utils::ClassifySummary;

/// Annotated loci around one gene, gathered before classification.
#[derive(Debug, Default, Clone)]
struct Neighborhood {
    /// annotated same-strand loci overlapping the gene span
    same_strand: Vec<(usize, (u64, u64))>,
    /// an annotated locus on the opposite strand overlaps the gene span
    antisense: bool,
}

/// Classifies every expressed transcript of every live gene. Returns the
/// per-category tally.
pub fn classify_transcriptome(genes: &mut [Gene], params: &ImportParams) -> ClassifySummary {
    let mut annotated: HashMap<(String, Strand), Vec<(usize, (u64, u64))>> = HashMap::new();
    for (idx, gene) in genes.iter().enumerate() {
        if gene.is_merged() || !gene.is_annotated() {
            continue;
        }
        annotated
            .entry((gene.chrom.clone(), gene.strand))
            .or_default()
            .push((idx, gene.span()));
    }
    for bucket in annotated.values_mut() {
        bucket.sort_unstable_by_key(|&(_, span)| span);
    }

    let hoods: Vec<Neighborhood> = genes
        .iter()
        .map(|gene| {
            if gene.is_merged() || !gene.is_expressed() {
                return Neighborhood::default();
            }
            let opposite = match gene.strand {
                Strand::Forward => Strand::Reverse,
                Strand::Reverse => Strand::Forward,
            };
            let span = gene.span();

            let same_strand = annotated
                .get(&(gene.chrom.clone(), gene.strand))
                .map(|bucket| {
                    bucket
                        .iter()
                        .filter(|&&(_, other)| span_overlap(other, span) > 0)
                        .copied()
                        .collect()
                })
                .unwrap_or_default();
            let antisense = annotated
                .get(&(gene.chrom.clone(), opposite))
                .map(|bucket| bucket.iter().any(|&(_, other)| span_overlap(other, span) > 0))
                .unwrap_or(false);

            Neighborhood {
                same_strand,
                antisense,
            }
        })
        .collect();

    let ids: Vec<String> = genes.iter().map(|gene| gene.id.clone()).collect();
    let fusions: DashSet<(String, String)> = DashSet::new();
    let counter = ParallelCounter::default();
    let bar = get_progress_bar(genes.len() as u64, "Classifying transcripts...");

    genes
        .par_iter_mut()
        .enumerate()
        .for_each(|(idx, gene)| {
            if !gene.is_merged() && gene.is_expressed() {
                classify_gene(gene, &hoods[idx], params, &counter, &ids, &fusions);
            }
            bar.inc(1);
        });

    bar.finish_and_clear();
    if !fusions.is_empty() {
        log::info!("{} readthrough locus pairs detected", fusions.len());
    }
    let summary = counter.snapshot();
    log::info!(
        "classified {} transcripts in {} genes: {} FSM, {} ISM, {} NIC, {} NNC, {} NOVEL",
        summary.transcripts(),
        summary.genes,
        summary.fsm,
        summary.ism,
        summary.nic,
        summary.nnc,
        summary.novel
    );

    summary
}

fn classify_gene(
    gene: &mut Gene,
    hood: &Neighborhood,
    params: &ImportParams,
    counter: &ParallelCounter,
    ids: &[String],
    fusions: &DashSet<(String, String)>,
) {
    counter.genes.fetch_add(1, Ordering::Relaxed);

    let annotations: Vec<Annotation> = gene
        .transcripts
        .iter()
        .map(|tx| classify_one(tx, gene, hood, params))
        .collect();

    for annotation in &annotations {
        if let Some(spanned) = annotation.subcategories.get("readthrough fusion") {
            for &other in spanned {
                if ids[other] != gene.id {
                    fusions.insert((gene.id.clone(), ids[other].clone()));
                }
            }
        }
    }

    for (tx, annotation) in gene.transcripts.iter_mut().zip(annotations) {
        counter.bump(annotation.category);
        tx.annotation = Some(annotation);
    }
}

/// The decision ladder for one transcript; first match wins.
fn classify_one(
    tx: &Transcript,
    gene: &Gene,
    hood: &Neighborhood,
    params: &ImportParams,
) -> Annotation {
    if !gene.is_annotated() {
        return classify_unannotated(tx, hood);
    }

    let mut annotation = if tx.is_mono_exon() {
        classify_mono_exon(tx, gene, params)
    } else {
        classify_spliced(tx, gene)
    };

    if annotation.category != SpliceCategory::Fsm {
        add_shared_labels(&mut annotation, tx, gene, hood, params);
    }

    annotation
}

/// Transcripts of a locus without any annotation are NOVEL by definition;
/// the labels say where the locus sits relative to annotated neighbors.
fn classify_unannotated(tx: &Transcript, hood: &Neighborhood) -> Annotation {
    let mut annotation = Annotation::new(SpliceCategory::Novel);

    if tx.is_mono_exon() {
        annotation.add("mono-exon", Vec::new());
    }
    if hood.antisense {
        annotation.add("antisense", Vec::new());
    } else {
        annotation.add("intergenic", Vec::new());
    }

    annotation
}

fn classify_spliced(tx: &Transcript, gene: &Gene) -> Annotation {
    let introns = tx.introns();
    let refs = &gene.ref_transcripts;

    let fsm: Vec<usize> = refs
        .iter()
        .enumerate()
        .filter(|(_, r)| r.exon_count() > 1 && r.introns() == introns)
        .map(|(i, _)| i)
        .collect();
    if !fsm.is_empty() {
        return Annotation::new(SpliceCategory::Fsm).with("FSM", fsm);
    }

    let mut ism = Vec::new();
    let mut missing_left = false;
    let mut missing_right = false;
    for (i, record) in refs.iter().enumerate() {
        let ref_introns = record.introns();
        if ref_introns.len() <= introns.len() {
            continue;
        }
        if let Some(offset) = subchain_offset(&introns, &ref_introns) {
            ism.push(i);
            missing_left |= offset > 0;
            missing_right |= offset + introns.len() < ref_introns.len();
        }
    }
    if !ism.is_empty() {
        let mut annotation = Annotation::new(SpliceCategory::Ism).with("ISM", ism);
        // genomic left is the 5' side only on the forward strand
        let (left, right) = match tx.strand {
            Strand::Forward => ("5' fragment", "3' fragment"),
            Strand::Reverse => ("3' fragment", "5' fragment"),
        };
        if missing_left {
            annotation.add(left, Vec::new());
        }
        if missing_right {
            annotation.add(right, Vec::new());
        }
        return annotation;
    }

    let junctions = gene.ref_junctions();
    let sites: HashSet<u64> = junctions.iter().flat_map(|&(d, a)| [d, a]).collect();

    if introns
        .iter()
        .all(|i| sites.contains(&i.0) && sites.contains(&i.1))
    {
        // known sites in a combination the annotation never shows
        let internal = gene.ref_internal_exons();
        let skipping = introns
            .iter()
            .any(|&intron| internal.iter().any(|&exon| contains_interval(intron, exon)));

        let mut annotation = Annotation::new(SpliceCategory::Nic);
        if skipping {
            annotation.add("exon skipping", Vec::new());
        } else {
            annotation.add("novel combination", Vec::new());
        }
        return annotation;
    }

    let has_exonic = refs.iter().any(|r| exonic_overlap(&r.exons, &tx.exons));
    let any_site_known = introns
        .iter()
        .any(|i| sites.contains(&i.0) || sites.contains(&i.1));

    if has_exonic || any_site_known {
        let mut annotation = Annotation::new(SpliceCategory::Nnc);
        let (left_label, right_label) = match tx.strand {
            Strand::Forward => ("novel 5' splice site", "novel 3' splice site"),
            Strand::Reverse => ("novel 3' splice site", "novel 5' splice site"),
        };
        for intron in &introns {
            if junctions.contains(intron) {
                continue;
            }
            if !sites.contains(&intron.0) {
                annotation.add(left_label, Vec::new());
            }
            if !sites.contains(&intron.1) {
                annotation.add(right_label, Vec::new());
            }
        }

        let ref_exons: Vec<(u64, u64)> = refs.iter().flat_map(|r| r.exons.clone()).collect();
        let novel_exon = tx
            .exons
            .iter()
            .enumerate()
            .filter(|(i, _)| *i > 0 && *i + 1 < tx.exons.len())
            .any(|(_, &exon)| !exonic_overlap(&[exon], &ref_exons));
        if novel_exon {
            annotation.add("novel exon", Vec::new());
        }

        return annotation;
    }

    Annotation::new(SpliceCategory::Novel).with("genic genomic", Vec::new())
}

fn classify_mono_exon(tx: &Transcript, gene: &Gene, params: &ImportParams) -> Annotation {
    let span = tx.span();
    let refs = &gene.ref_transcripts;

    // FSM demands reciprocal overlap with a mono-exon reference
    let fsm: Vec<usize> = refs
        .iter()
        .enumerate()
        .filter(|(_, r)| {
            if r.exon_count() != 1 {
                return false;
            }
            let other = r.span();
            let shared = span_overlap(span, other);
            shared as f32 >= (span.1 - span.0) as f32 * params.mono_exon_overlap
                && shared as f32 >= (other.1 - other.0) as f32 * params.mono_exon_overlap
        })
        .map(|(i, _)| i)
        .collect();
    if !fsm.is_empty() {
        return Annotation::new(SpliceCategory::Fsm).with("FSM", fsm);
    }

    let contained: Vec<usize> = refs
        .iter()
        .enumerate()
        .filter(|(_, r)| exonic_overlap(&r.exons, &tx.exons))
        .map(|(i, _)| i)
        .collect();
    if !contained.is_empty() {
        return Annotation::new(SpliceCategory::Ism)
            .with("ISM", contained)
            .with("mono-exon", Vec::new());
    }

    // inside the locus but only over intronic sequence
    Annotation::new(SpliceCategory::Novel).with("genic genomic", Vec::new())
}

/// Labels that apply independently of the primary category.
fn add_shared_labels(
    annotation: &mut Annotation,
    tx: &Transcript,
    gene: &Gene,
    hood: &Neighborhood,
    params: &ImportParams,
) {
    let retained: Vec<usize> = gene
        .ref_transcripts
        .iter()
        .enumerate()
        .filter(|(_, r)| {
            r.introns().iter().any(|&intron| {
                tx.exons.iter().any(|&exon| contains_interval(exon, intron))
            })
        })
        .map(|(i, _)| i)
        .collect();
    if !retained.is_empty() {
        annotation.add("intron retention", retained);
    }

    let ref_exons: Vec<(u64, u64)> = gene
        .ref_transcripts
        .iter()
        .flat_map(|r| r.exons.clone())
        .collect();

    let ref_tss: Vec<u64> = gene
        .ref_transcripts
        .iter()
        .map(|r| match tx.strand {
            Strand::Forward => r.span().0,
            Strand::Reverse => r.span().1,
        })
        .collect();
    let ref_pas: Vec<u64> = gene
        .ref_transcripts
        .iter()
        .map(|r| match tx.strand {
            Strand::Forward => r.span().1,
            Strand::Reverse => r.span().0,
        })
        .collect();

    let mut site_label = |pos: u64, sites: &[u64], exonic: &str, intronic: &str| {
        if near_any(pos, sites, params.tss_site_window) {
            return;
        }
        if within_any(pos, &ref_exons) {
            annotation.add(exonic, Vec::new());
        } else {
            annotation.add(intronic, Vec::new());
        }
    };
    site_label(
        tx.chain_tss(),
        &ref_tss,
        "novel exonic TSS",
        "novel intronic TSS",
    );
    site_label(
        tx.chain_pas(),
        &ref_pas,
        "novel exonic PAS",
        "novel intronic PAS",
    );

    let spanned: Vec<usize> = hood
        .same_strand
        .iter()
        .filter(|&&(_, span)| span_overlap(span, tx.span()) > 0)
        .map(|&(idx, _)| idx)
        .collect();
    if spanned.len() >= 2 {
        annotation.add("readthrough fusion", spanned);
    }
}

//! Transcript clustering and end unification.
//!
//! Chains collapse into transcripts by intron-chain identity; mono-exon
//! chains, having no junctions, collapse by fractional span overlap
//! instead. Raw 5'/3' end positions accumulate per sample and are unified
//! once after import: nearby positions cluster, every cluster collapses to
//! its modal position, and the strongest modes refine the outer exon
//! boundaries.

use config::ImportParams;
use iso_model::record::EndHistogram;
use iso_model::{fraction_overlap, span_of, Gene, Transcript};

use std::collections::BTreeMap;

/// Folds one normalized chain into a gene.
///
/// Returns `true` when the chain opened a new transcript, `false` when it
/// landed on an existing one. Chimeric chains only ever cluster with other
/// chimeric chains.
pub fn integrate_chain(
    gene: &mut Gene,
    chain: Vec<(u64, u64)>,
    sample: usize,
    n_samples: usize,
    params: &ImportParams,
    chimeric: bool,
) -> bool {
    let span = span_of(&chain);
    gene.extend(span.0, span.1);

    let strand = gene.strand;
    let probe = Transcript::from_chain(chain, strand, n_samples, sample)
        .expect("chain was validated at normalization");
    let (tss, pas) = (probe.chain_tss(), probe.chain_pas());
    let introns = probe.introns();

    let hit = gene.transcripts.iter_mut().find(|tx| {
        if tx.is_chimeric != chimeric {
            return false;
        }
        if probe.is_mono_exon() {
            tx.is_mono_exon() && fraction_overlap(tx.span(), span) >= params.mono_exon_overlap
        } else {
            !tx.is_mono_exon() && tx.introns() == introns
        }
    });

    match hit {
        Some(tx) => {
            // junctions agree, the outer boundaries grow to the evidence
            tx.exons[0].0 = tx.exons[0].0.min(span.0);
            let last = tx.exons.len() - 1;
            tx.exons[last].1 = tx.exons[last].1.max(span.1);
            tx.ensure_samples(n_samples);
            tx.observe(sample, tss, pas);

            false
        }
        None => {
            let mut tx = probe;
            tx.ensure_samples(n_samples);
            tx.is_chimeric = chimeric;
            gene.transcripts.push(tx);

            true
        }
    }
}

/// Clusters the pooled positions of per-sample histograms and collapses
/// each cluster onto its modal position.
///
/// Returns the unified per-sample histograms plus the modal position of
/// the strongest cluster.
pub fn unify_histograms(
    samples: &[EndHistogram],
    window: u64,
) -> (Vec<EndHistogram>, Option<u64>) {
    let mut pooled: BTreeMap<u64, u32> = BTreeMap::new();
    for histogram in samples {
        for (&pos, &count) in histogram {
            *pooled.entry(pos).or_insert(0) += count;
        }
    }
    if pooled.is_empty() {
        return (vec![EndHistogram::new(); samples.len()], None);
    }

    // positions sorted; a gap wider than the window starts a new cluster
    let mut mode_of: BTreeMap<u64, u64> = BTreeMap::new();
    let mut best: Option<(u32, u64)> = None;
    let mut cluster: Vec<(u64, u32)> = Vec::new();

    let mut flush = |cluster: &mut Vec<(u64, u32)>, mode_of: &mut BTreeMap<u64, u64>,
                     best: &mut Option<(u32, u64)>| {
        if cluster.is_empty() {
            return;
        }
        let mode = cluster
            .iter()
            .max_by_key(|&&(pos, count)| (count, std::cmp::Reverse(pos)))
            .map(|&(pos, _)| pos)
            .expect("cluster is non-empty");
        let total: u32 = cluster.iter().map(|&(_, c)| c).sum();

        for &(pos, _) in cluster.iter() {
            mode_of.insert(pos, mode);
        }
        if best.map_or(true, |(t, _)| total > t) {
            *best = Some((total, mode));
        }
        cluster.clear();
    };

    let mut prev: Option<u64> = None;
    for (&pos, &count) in &pooled {
        if let Some(p) = prev {
            if pos - p > window {
                flush(&mut cluster, &mut mode_of, &mut best);
            }
        }
        cluster.push((pos, count));
        prev = Some(pos);
    }
    flush(&mut cluster, &mut mode_of, &mut best);

    let unified = samples
        .iter()
        .map(|histogram| {
            let mut out = EndHistogram::new();
            for (&pos, &count) in histogram {
                let mode = mode_of[&pos];
                *out.entry(mode).or_insert(0) += count;
            }
            out
        })
        .collect();

    (unified, best.map(|(_, mode)| mode))
}

/// Unifies the observed ends of every transcript of a gene and refines the
/// outer exon boundaries to the strongest modes.
pub fn unify_ends(gene: &mut Gene, params: &ImportParams) {
    let strand = gene.strand;
    for tx in &mut gene.transcripts {
        let (tss_unified, tss_mode) = unify_histograms(&tx.tss, params.end_cluster_window);
        let (pas_unified, pas_mode) = unify_histograms(&tx.pas, params.end_cluster_window);

        let last = tx.exons.len() - 1;
        let (start_mode, end_mode) = match strand {
            config::Strand::Forward => (tss_mode, pas_mode),
            config::Strand::Reverse => (pas_mode, tss_mode),
        };

        // refinement never inverts an exon or crosses a junction
        if let Some(start) = start_mode {
            let limit = tx.exons[0].1;
            if start < limit {
                tx.exons[0].0 = start;
            }
        }
        if let Some(end) = end_mode {
            let limit = tx.exons[last].0;
            if end > limit {
                tx.exons[last].1 = end;
            }
        }

        tx.tss_unified = Some(tss_unified);
        tx.pas_unified = Some(pas_unified);
    }

    let span = gene
        .transcripts
        .iter()
        .map(|tx| tx.span())
        .fold(None::<(u64, u64)>, |acc, s| match acc {
            Some(a) => Some((a.0.min(s.0), a.1.max(s.1))),
            None => Some(s),
        });
    if let Some((start, end)) = span {
        gene.extend(start, end);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use config::Strand;

    fn gene() -> Gene {
        Gene::new_novel("G1".into(), "chr1", Strand::Forward, u64::MAX, 0)
    }

    #[test]
    fn test_intron_chain_identity() {
        let params = ImportParams::default();
        let mut g = gene();

        assert!(integrate_chain(
            &mut g,
            vec![(100, 200), (300, 400)],
            0,
            1,
            &params,
            false
        ));
        // same junctions, wider ends
        assert!(!integrate_chain(
            &mut g,
            vec![(90, 200), (300, 420)],
            0,
            1,
            &params,
            false
        ));
        // different junctions
        assert!(integrate_chain(
            &mut g,
            vec![(100, 250), (300, 400)],
            0,
            1,
            &params,
            false
        ));

        assert_eq!(g.n_transcripts(), 2);
        assert_eq!(g.transcripts[0].exons, vec![(90, 200), (300, 420)]);
        assert_eq!(g.transcripts[0].coverage, vec![2]);
        assert_eq!(g.span(), (90, 420));
    }

    #[test]
    fn test_mono_exon_fractional_match() {
        let params = ImportParams::default();
        let mut g = gene();

        assert!(integrate_chain(&mut g, vec![(100, 400)], 0, 1, &params, false));
        // 2/3 of the shorter chain overlaps, clusters together
        assert!(!integrate_chain(&mut g, vec![(200, 500)], 0, 1, &params, false));
        // disjoint, opens a new transcript
        assert!(integrate_chain(&mut g, vec![(900, 1200)], 0, 1, &params, false));
        // mono-exon never folds into a spliced transcript
        assert!(integrate_chain(
            &mut g,
            vec![(100, 200), (300, 400)],
            0,
            1,
            &params,
            false
        ));

        assert_eq!(g.n_transcripts(), 3);
    }

    #[test]
    fn test_chimeric_clusters_separately() {
        let params = ImportParams::default();
        let mut g = gene();

        integrate_chain(&mut g, vec![(100, 200), (300, 400)], 0, 1, &params, false);
        assert!(integrate_chain(
            &mut g,
            vec![(100, 200), (300, 400)],
            0,
            1,
            &params,
            true
        ));

        assert_eq!(g.n_transcripts(), 2);
        assert!(g.transcripts[1].is_chimeric);
    }

    #[test]
    fn test_unify_histograms() {
        let mut s0 = EndHistogram::new();
        s0.insert(100, 3);
        s0.insert(104, 1);
        s0.insert(300, 1);
        let mut s1 = EndHistogram::new();
        s1.insert(102, 2);

        let (unified, best) = unify_histograms(&[s0, s1], 25);

        // 100/102/104 cluster with mode 100, the far position stands alone
        assert_eq!(best, Some(100));
        assert_eq!(unified[0].get(&100), Some(&4));
        assert_eq!(unified[0].get(&300), Some(&1));
        assert_eq!(unified[1].get(&100), Some(&2));
    }

    #[test]
    fn test_unify_ends_refines_boundaries() {
        let params = ImportParams::default();
        let mut g = gene();

        integrate_chain(&mut g, vec![(100, 200), (300, 400)], 0, 1, &params, false);
        for _ in 0..3 {
            integrate_chain(&mut g, vec![(95, 200), (300, 410)], 0, 1, &params, false);
        }

        unify_ends(&mut g, &params);

        let tx = &g.transcripts[0];
        assert_eq!(tx.exons, vec![(95, 200), (300, 410)]);
        assert_eq!(tx.tss_unified.as_ref().map(|u| u[0][&95]), Some(4));
    }

    #[test]
    fn test_unify_ends_mono_exon_guard() {
        let params = ImportParams {
            end_cluster_window: 1000,
            ..ImportParams::default()
        };
        let mut g = gene();

        integrate_chain(&mut g, vec![(100, 400)], 0, 1, &params, false);
        unify_ends(&mut g, &params);

        let (start, end) = g.transcripts[0].span();
        assert!(start < end);
    }
}

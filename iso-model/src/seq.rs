//! Sequence-derived QC attributes.
//!
//! Genomic sequence is external to the model: callers hand in anything that
//! can fetch a window, and the methods below decorate transcripts with
//! downstream A content, noncanonical splice dinucleotides and direct repeat
//! lengths around junctions.

use config::Strand;

use crate::gene::Gene;

/// Anything that can serve genomic sequence windows. Coordinates are
/// half-open on the forward strand; `None` means the window is unknown
/// (missing contig, out of bounds) and the attribute stays unset.
pub trait SequenceProvider {
    fn fetch(&self, chrom: &str, start: u64, end: u64) -> Option<String>;
}

fn complement(base: u8) -> u8 {
    match base {
        b'A' => b'T',
        b'T' => b'A',
        b'G' => b'C',
        b'C' => b'G',
        b'a' => b't',
        b't' => b'a',
        b'g' => b'c',
        b'c' => b'g',
        other => other,
    }
}

pub fn reverse_complement(seq: &str) -> String {
    seq.bytes()
        .rev()
        .map(complement)
        .map(|b| b as char)
        .collect()
}

/// Longest run of `true` values, allowing up to `max_mm` `false` entries.
///
/// Returns one entry per tolerated mismatch count: `counts[m]` is the run
/// length when exactly `m` mismatches may be spent.
pub fn find_runlength(matches: impl Iterator<Item = bool>, max_mm: usize) -> Vec<u32> {
    let mut counts = vec![0u32; max_mm + 1];
    let mut idx = 0;

    for matched in matches {
        if matched {
            counts[idx] += 1;
        } else {
            if idx == max_mm {
                break;
            }
            counts[idx + 1] = counts[idx];
            idx += 1;
        }
    }
    for i in idx + 1..=max_mm {
        counts[i] = counts[i - 1];
    }

    counts
}

/// Length of the direct repeat shared by the two junction-flanking windows,
/// allowing the junction to wobble by up to `wobble` bases and spending at
/// most `max_mm` mismatches across both sides.
pub fn repeat_len(seq1: &str, seq2: &str, wobble: usize, max_mm: usize) -> u32 {
    let a = seq1.as_bytes();
    let b = seq2.as_bytes();
    if a.len() != b.len() || a.len() < 2 * wobble + 2 {
        return 0;
    }

    let delta = a.len() / 2 - wobble;
    let mut best = 0;

    for w in 0..=2 * wobble {
        let s1 = &a[w..a.len() - (2 * wobble - w)];
        let s2 = &b[wobble..b.len() - wobble];
        let align: Vec<bool> = s1.iter().zip(s2).map(|(x, y)| x == y).collect();

        let left = find_runlength(align[..delta].iter().rev().copied(), max_mm);
        let right = find_runlength(align[delta..].iter().copied(), max_mm);

        for mm in 0..=max_mm {
            best = best.max(left[mm] + right[max_mm - mm]);
        }
    }

    best
}

impl Gene {
    /// Fraction of adenosines in the genomic window downstream of each
    /// transcript's 3' end; high values flag internal priming artifacts.
    pub fn add_downstream_a_content(&mut self, provider: &impl SequenceProvider, length: u64) {
        let chrom = self.chrom.clone();
        for tx in &mut self.transcripts {
            let pas = tx.chain_pas();
            let (window, target) = match tx.strand {
                Strand::Forward => ((pas, pas + length), b'A'),
                Strand::Reverse => ((pas.saturating_sub(length), pas), b'T'),
            };

            if let Some(seq) = provider.fetch(&chrom, window.0, window.1) {
                if !seq.is_empty() {
                    let hits = seq
                        .bytes()
                        .filter(|b| b.to_ascii_uppercase() == target)
                        .count();
                    tx.downstream_a_content = Some(hits as f32 / seq.len() as f32);
                }
            }
        }
    }

    /// Flags introns whose splice dinucleotides deviate from GT..AG on the
    /// transcribed strand, stored as `(intron index, "XX-YY")`.
    pub fn add_noncanonical_splicing(&mut self, provider: &impl SequenceProvider) {
        let chrom = self.chrom.clone();
        for tx in &mut self.transcripts {
            let introns = tx.introns();
            if introns.is_empty() {
                continue;
            }

            let mut deviant = Vec::new();
            for (i, intron) in introns.iter().enumerate() {
                let donor_win = provider.fetch(&chrom, intron.0, intron.0 + 2);
                let acceptor_win = provider.fetch(&chrom, intron.1 - 2, intron.1);
                let (left, right) = match (donor_win, acceptor_win) {
                    (Some(l), Some(r)) => (l.to_ascii_uppercase(), r.to_ascii_uppercase()),
                    _ => continue,
                };

                // on the reverse strand the donor sits at the genomic right end
                let (donor, acceptor, idx) = match tx.strand {
                    Strand::Forward => (left, right, i),
                    Strand::Reverse => (
                        reverse_complement(&right),
                        reverse_complement(&left),
                        introns.len() - 1 - i,
                    ),
                };

                if donor != "GT" || acceptor != "AG" {
                    deviant.push((idx, format!("{}-{}", donor, acceptor)));
                }
            }
            deviant.sort_unstable_by_key(|(idx, _)| *idx);

            tx.noncanonical_splicing = Some(deviant);
        }
    }

    /// Direct repeat length around each splice junction, one value per
    /// intron. Long repeats point at reverse-transcriptase template
    /// switching rather than genuine splicing.
    pub fn add_direct_repeat_len(
        &mut self,
        provider: &impl SequenceProvider,
        delta: u64,
        wobble: usize,
        max_mm: usize,
    ) {
        let chrom = self.chrom.clone();
        let flank = delta + wobble as u64;

        for tx in &mut self.transcripts {
            let introns = tx.introns();
            if introns.is_empty() {
                continue;
            }

            let mut lens = Vec::with_capacity(introns.len());
            for intron in &introns {
                if intron.0 < flank {
                    lens.push(0);
                    continue;
                }

                let donor = provider.fetch(&chrom, intron.0 - flank, intron.0 + flank);
                let acceptor = provider.fetch(&chrom, intron.1 - flank, intron.1 + flank);
                match (donor, acceptor) {
                    (Some(d), Some(a)) => lens.push(repeat_len(
                        &d.to_ascii_uppercase(),
                        &a.to_ascii_uppercase(),
                        wobble,
                        max_mm,
                    )),
                    _ => lens.push(0),
                }
            }

            tx.direct_repeat_len = Some(lens);
        }
    }
}

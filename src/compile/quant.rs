//! Fusion expression quantification.
//!
//! For each reported fusion a synthetic reference is built from the two
//! partner transcripts separated by a neutral pad, and the read pairs
//! realigned to it are classified by where the two mates land relative to
//! the fusion exon boundaries. Counts normalize to RPKM over the partition
//! lengths.

use crate::error::Error;
use crate::model::{FragSide, Gene, GeneModel};

/// Pad separating the two partner transcripts in the synthetic reference.
pub const PAD: usize = 400;
const PAD_BASE: char = 'G';

/// Coordinate layout of one fusion's synthetic reference: gene A transcript,
/// pad, gene B transcript. The fusion exon belongs to both partitions of
/// its gene.
#[derive(Debug, Clone)]
pub struct PartitionMap {
    pub a_len: i64,
    pub b_len: i64,
    /// Offset in the A transcript where the 5' partition ends (end of the
    /// fusion exon).
    pub a_break: i64,
    /// Offset in the A transcript where the 3' partition begins (start of
    /// the fusion exon).
    pub a_inner: i64,
    pub b_break: i64,
    pub b_inner: i64,
}

/// Region of the synthetic reference an interval falls into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Region {
    A5p,
    A3p,
    /// Crosses the fusion exon boundary of gene A.
    AJunct,
    B5p,
    B3p,
    BJunct,
    Outside,
}

/// Classification of one aligned read pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PairClass {
    ConcordA5p,
    ConcordA3p,
    ConcordB5p,
    ConcordB3p,
    /// Mates on opposite sides of gene A's breakpoint.
    SpanA,
    /// A mate crossing gene A's breakpoint.
    JunctA,
    SpanB,
    JunctB,
    DiscordA5pB3p,
    DiscordA3pB5p,
    DiscordA5pB5p,
    DiscordA3pB3p,
    Unclassified,
}

impl PartitionMap {
    /// Layout for a fusion splitting gene A at `exon_a` and gene B at
    /// `exon_b`.
    pub fn new(
        model: &GeneModel,
        gene_a: &Gene,
        exon_a: u32,
        gene_b: &Gene,
        exon_b: u32,
    ) -> Result<PartitionMap, Error> {
        let a_len = model.transcribed_sequence(gene_a)?.len() as i64;
        let b_len = model.transcribed_sequence(gene_b)?.len() as i64;
        let a_5p = model.partial_transcript(gene_a, exon_a, FragSide::FiveP)?.len() as i64;
        let a_3p = model.partial_transcript(gene_a, exon_a, FragSide::ThreeP)?.len() as i64;
        let b_5p = model.partial_transcript(gene_b, exon_b, FragSide::FiveP)?.len() as i64;
        let b_3p = model.partial_transcript(gene_b, exon_b, FragSide::ThreeP)?.len() as i64;
        Ok(PartitionMap {
            a_len,
            b_len,
            a_break: a_5p,
            a_inner: a_len - a_3p,
            b_break: b_5p,
            b_inner: b_len - b_3p,
        })
    }

    pub fn b_start(&self) -> i64 {
        self.a_len + PAD as i64
    }

    pub fn total_len(&self) -> i64 {
        self.b_start() + self.b_len
    }

    /// Synthetic reference sequence for this fusion.
    pub fn reference(
        model: &GeneModel,
        gene_a: &Gene,
        gene_b: &Gene,
    ) -> Result<String, Error> {
        let mut seq = model.transcribed_sequence(gene_a)?;
        seq.extend(std::iter::repeat(PAD_BASE).take(PAD));
        seq.push_str(&model.transcribed_sequence(gene_b)?);
        Ok(seq)
    }

    /// Region of a single mate alignment `[pos, pos+len)`. The fusion exon
    /// belongs to both partitions of its gene, so only an alignment
    /// extending past the exon on both sides counts as junction-crossing.
    pub fn region(&self, pos: i64, len: i64) -> Region {
        let end = pos + len;
        if pos >= 0 && end <= self.a_len {
            if end <= self.a_break {
                return Region::A5p;
            }
            if pos >= self.a_inner {
                return Region::A3p;
            }
            return Region::AJunct;
        }
        let b_pos = pos - self.b_start();
        let b_end = end - self.b_start();
        if b_pos >= 0 && b_end <= self.b_len {
            if b_end <= self.b_break {
                return Region::B5p;
            }
            if b_pos >= self.b_inner {
                return Region::B3p;
            }
            return Region::BJunct;
        }
        Region::Outside
    }

    /// Classify a read pair by its two mate alignments.
    pub fn classify(&self, mate1: (i64, i64), mate2: (i64, i64)) -> PairClass {
        use Region::*;
        let r1 = self.region(mate1.0, mate1.1);
        let r2 = self.region(mate2.0, mate2.1);
        match (r1, r2) {
            (AJunct, _) | (_, AJunct) => PairClass::JunctA,
            (BJunct, _) | (_, BJunct) => PairClass::JunctB,
            (A5p, A5p) => PairClass::ConcordA5p,
            (A3p, A3p) => PairClass::ConcordA3p,
            (B5p, B5p) => PairClass::ConcordB5p,
            (B3p, B3p) => PairClass::ConcordB3p,
            (A5p, A3p) | (A3p, A5p) => PairClass::SpanA,
            (B5p, B3p) | (B3p, B5p) => PairClass::SpanB,
            (A5p, B3p) | (B3p, A5p) => PairClass::DiscordA5pB3p,
            (A3p, B5p) | (B5p, A3p) => PairClass::DiscordA3pB5p,
            (A5p, B5p) | (B5p, A5p) => PairClass::DiscordA5pB5p,
            (A3p, B3p) | (B3p, A3p) => PairClass::DiscordA3pB3p,
            _ => PairClass::Unclassified,
        }
    }
}

/// Tally of pair classifications for one fusion.
#[derive(Debug, Clone, Default)]
pub struct QuantCounts {
    pub concords_a_5p: u64,
    pub concords_a_3p: u64,
    pub concords_b_5p: u64,
    pub concords_b_3p: u64,
    pub aa_span: u64,
    pub aa_junct: u64,
    pub bb_span: u64,
    pub bb_junct: u64,
    pub discords_a5p_b3p: u64,
    pub discords_a3p_b5p: u64,
    pub discords_a5p_b5p: u64,
    pub discords_a3p_b3p: u64,
}

impl QuantCounts {
    pub fn add(&mut self, class: PairClass) {
        match class {
            PairClass::ConcordA5p => self.concords_a_5p += 1,
            PairClass::ConcordA3p => self.concords_a_3p += 1,
            PairClass::ConcordB5p => self.concords_b_5p += 1,
            PairClass::ConcordB3p => self.concords_b_3p += 1,
            PairClass::SpanA => self.aa_span += 1,
            PairClass::JunctA => self.aa_junct += 1,
            PairClass::SpanB => self.bb_span += 1,
            PairClass::JunctB => self.bb_junct += 1,
            PairClass::DiscordA5pB3p => self.discords_a5p_b3p += 1,
            PairClass::DiscordA3pB5p => self.discords_a3p_b5p += 1,
            PairClass::DiscordA5pB5p => self.discords_a5p_b5p += 1,
            PairClass::DiscordA3pB3p => self.discords_a3p_b3p += 1,
            PairClass::Unclassified => {}
        }
    }

    fn a_total(&self) -> u64 {
        self.concords_a_5p + self.concords_a_3p + self.aa_span + self.aa_junct
    }

    fn b_total(&self) -> u64 {
        self.concords_b_5p + self.concords_b_3p + self.bb_span + self.bb_junct
    }
}

/// Reads-per-kilobase-per-million normalization.
pub fn rpkm(count: u64, partition_len: i64, library_size: u64) -> f64 {
    if partition_len <= 0 || library_size == 0 {
        return 0.0;
    }
    (count as f64 / partition_len as f64) * (1.0e9 / library_size as f64)
}

/// RPKM summary derived from the counts and partition layout.
#[derive(Debug, Clone, Default)]
pub struct QuantSummary {
    pub counts: QuantCounts,
    pub rpkm_a: f64,
    pub rpkm_b: f64,
    pub rpkm_a_5p: f64,
    pub rpkm_a_3p: f64,
    pub rpkm_b_5p: f64,
    pub rpkm_b_3p: f64,
}

impl QuantSummary {
    pub fn from_counts(counts: QuantCounts, map: &PartitionMap, library_size: u64) -> Self {
        QuantSummary {
            rpkm_a: rpkm(counts.a_total(), map.a_len, library_size),
            rpkm_b: rpkm(counts.b_total(), map.b_len, library_size),
            rpkm_a_5p: rpkm(counts.concords_a_5p, map.a_break, library_size),
            rpkm_a_3p: rpkm(counts.concords_a_3p, map.a_len - map.a_inner, library_size),
            rpkm_b_5p: rpkm(counts.concords_b_5p, map.b_break, library_size),
            rpkm_b_3p: rpkm(counts.concords_b_3p, map.b_len - map.b_inner, library_size),
            counts,
        }
    }
}

// ---------------------------------------------------------------------------
// SAM plumbing for the realignment output
// ---------------------------------------------------------------------------

/// Minimal SAM fields needed for pair classification.
#[derive(Debug, Clone)]
pub struct SamAlignment {
    pub read_name: String,
    pub flag: u16,
    pub pos: i64,
    pub aligned_len: i64,
}

impl SamAlignment {
    pub fn parse(line: &str) -> Result<Option<SamAlignment>, Error> {
        if line.starts_with('@') || line.is_empty() {
            return Ok(None);
        }
        let sp: Vec<&str> = line.split('\t').collect();
        if sp.len() < 11 {
            return Err(Error::Record(format!(
                "sam record has {} columns",
                sp.len()
            )));
        }
        let flag: u16 = sp[1]
            .parse()
            .map_err(|_| Error::Record(format!("bad sam flag '{}'", sp[1])))?;
        if flag & 0x4 != 0 {
            return Ok(None);
        }
        let pos: i64 = sp[3]
            .parse()
            .map_err(|_| Error::Record(format!("bad sam position '{}'", sp[3])))?;
        Ok(Some(SamAlignment {
            read_name: sp[0].to_string(),
            flag,
            pos: pos - 1, // SAM is 1-based
            aligned_len: reference_span(sp[5]),
        }))
    }
}

/// Reference bases consumed by a cigar string (M/D/N/=/X operations).
fn reference_span(cigar: &str) -> i64 {
    let mut span = 0i64;
    let mut num = 0i64;
    for c in cigar.chars() {
        if let Some(d) = c.to_digit(10) {
            num = num * 10 + d as i64;
        } else {
            if matches!(c, 'M' | 'D' | 'N' | '=' | 'X') {
                span += num;
            }
            num = 0;
        }
    }
    span
}

/// Classify all pairs in a SAM body against the partition layout.
pub fn tally_sam<R: std::io::BufRead>(
    reader: R,
    map: &PartitionMap,
) -> Result<QuantCounts, Error> {
    let mut first_mates: std::collections::HashMap<String, SamAlignment> =
        std::collections::HashMap::new();
    let mut counts = QuantCounts::default();
    for line in reader.lines() {
        let line = line.map_err(|e| Error::Record(format!("error reading sam body: {e}")))?;
        let Some(aln) = SamAlignment::parse(&line)? else {
            continue;
        };
        match first_mates.remove(&aln.read_name) {
            Some(mate) => counts.add(map.classify(
                (mate.pos, mate.aligned_len),
                (aln.pos, aln.aligned_len),
            )),
            None => {
                first_mates.insert(aln.read_name.clone(), aln);
            }
        }
    }
    Ok(counts)
}

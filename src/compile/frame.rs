//! Fusion transcript assembly and reading-frame analysis.
//!
//! For every isoform pair spanning a junction, the transcribed sequence on
//! each side of the breakpoint is assembled along the isoform, the
//! breakpoint is located relative to the isoform's coding region, and the
//! pair is tested for a preserved reading frame.

use crate::error::Error;
use crate::model::{FragSide, GeneModel, Isoform, Strand};
use crate::seq::reverse_complement;

/// Where a breakpoint falls within an isoform, ranked from least to most
/// informative about the protein product.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum BreakPos {
    Unknown,
    Noncoding,
    Utr3,
    Utr5,
    Cds,
}

impl std::fmt::Display for BreakPos {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Unknown => "Unknown",
            Self::Noncoding => "ncRNA",
            Self::Utr3 => "UTR-3",
            Self::Utr5 => "UTR-5",
            Self::Cds => "CDS",
        };
        write!(f, "{s}")
    }
}

/// One side of a fusion transcript: the isoform sequence up to (5') or from
/// (3') the fusion exon boundary, plus its coding contribution.
#[derive(Debug, Clone)]
pub struct FusionFragment {
    pub isoform_id: String,
    pub sequence: String,
    pub coding: String,
    pub break_pos: BreakPos,
}

/// Assemble the fragment of `iso` on `side` of the fusion exon. Returns
/// `None` when the isoform does not contain the exon.
pub fn fragment(
    model: &GeneModel,
    iso: &Isoform,
    fusion_exon: u32,
    side: FragSide,
) -> Result<Option<FusionFragment>, Error> {
    if !iso.has_exon(fusion_exon) {
        return Ok(None);
    }
    let gene = model.gene(iso.gene_id)?;

    // concatenated exon sequence in ascending transcript coordinates, plus
    // the concat-space extent of the fusion exon
    let mut concat = String::new();
    let mut exon_start = 0usize;
    let mut exon_end = 0usize;
    for &eid in &iso.exon_ids {
        let ex = model.exon(eid)?;
        if eid == fusion_exon {
            exon_start = concat.len();
            exon_end = concat.len() + ex.sequence.len();
        }
        concat.push_str(&ex.sequence);
    }
    let total = concat.len();

    // mRNA orientation: minus-strand isoforms transcribe the reverse
    // complement, which maps concat offset p to mRNA offset total - p
    let mrna = match gene.strand {
        Strand::Forward => concat,
        Strand::Reverse => reverse_complement(&concat),
    };
    let break_offset = match (side, gene.strand) {
        (FragSide::FiveP, Strand::Forward) => exon_end,
        (FragSide::FiveP, Strand::Reverse) => total - exon_start,
        (FragSide::ThreeP, Strand::Forward) => exon_start,
        (FragSide::ThreeP, Strand::Reverse) => total - exon_end,
    };
    let sequence = match side {
        FragSide::FiveP => mrna[..break_offset].to_string(),
        FragSide::ThreeP => mrna[break_offset..].to_string(),
    };

    let (break_pos, coding) = classify(iso, &mrna, break_offset, side);
    Ok(Some(FusionFragment {
        isoform_id: iso.id.clone(),
        sequence,
        coding,
        break_pos,
    }))
}

/// Locate `break_offset` relative to the isoform CDS and extract the coding
/// bases this side contributes.
fn classify(iso: &Isoform, mrna: &str, break_offset: usize, side: FragSide) -> (BreakPos, String) {
    if iso.is_noncoding() {
        return (BreakPos::Noncoding, String::new());
    }
    let len = mrna.len();
    let cds_start = iso.cds_start_offset.max(0) as usize;
    let cds_end = len.saturating_sub(iso.cds_end_offset.max(0) as usize);
    if cds_start >= cds_end {
        return (BreakPos::Noncoding, String::new());
    }

    match side {
        FragSide::FiveP => {
            if break_offset <= cds_start {
                (BreakPos::Utr5, String::new())
            } else if break_offset < cds_end {
                (BreakPos::Cds, mrna[cds_start..break_offset].to_string())
            } else {
                (BreakPos::Utr3, mrna[cds_start..cds_end].to_string())
            }
        }
        FragSide::ThreeP => {
            if break_offset >= cds_end {
                (BreakPos::Utr3, String::new())
            } else if break_offset > cds_start {
                (BreakPos::Cds, mrna[break_offset..cds_end].to_string())
            } else {
                (BreakPos::Utr5, mrna[cds_start..cds_end].to_string())
            }
        }
    }
}

/// A candidate fusion mRNA: one isoform fragment per side.
#[derive(Debug, Clone)]
pub struct FusionTranscript {
    pub frag_5p: FusionFragment,
    pub frag_3p: FusionFragment,
}

impl FusionTranscript {
    pub fn sequence(&self) -> String {
        format!("{}{}", self.frag_5p.sequence, self.frag_3p.sequence)
    }

    /// Signature written to the report: `[iso5-iso3]:sequence`.
    pub fn signature(&self) -> String {
        format!(
            "[{}-{}]:{}",
            self.frag_5p.isoform_id,
            self.frag_3p.isoform_id,
            self.sequence()
        )
    }

    pub fn coding_sequence(&self) -> String {
        format!("{}{}", self.frag_5p.coding, self.frag_3p.coding)
    }

    /// Frame preservation: a break after the 5' stop or before the 3' start
    /// codon leaves the partner ORF intact; two CDS breaks must splice to a
    /// multiple of three.
    pub fn is_in_frame(&self) -> bool {
        if self.frag_5p.break_pos == BreakPos::Utr3 || self.frag_3p.break_pos == BreakPos::Utr5 {
            return true;
        }
        self.frag_5p.break_pos == BreakPos::Cds
            && self.frag_3p.break_pos == BreakPos::Cds
            && (self.frag_5p.coding.len() + self.frag_3p.coding.len()) % 3 == 0
    }

    /// Preference rank for deduplication of equal-length transcripts.
    fn rank(&self) -> u8 {
        self.frag_5p.break_pos as u8 + self.frag_3p.break_pos as u8
    }
}

/// All distinct fusion transcripts for a junction exon pair. Transcripts of
/// equal combined length are considered equivalent; the one with the more
/// informative breakpoint classes wins.
pub fn all_transcripts(
    model: &GeneModel,
    ex_5p: u32,
    ex_3p: u32,
) -> Result<Vec<FusionTranscript>, Error> {
    let gene_5p = model.gene_of_exon(ex_5p)?;
    let gene_3p = model.gene_of_exon(ex_3p)?;

    let mut by_len: std::collections::BTreeMap<usize, FusionTranscript> =
        std::collections::BTreeMap::new();
    for iso_5p in &gene_5p.isoforms {
        let Some(frag_5p) = fragment(model, iso_5p, ex_5p, FragSide::FiveP)? else {
            continue;
        };
        for iso_3p in &gene_3p.isoforms {
            let Some(frag_3p) = fragment(model, iso_3p, ex_3p, FragSide::ThreeP)? else {
                continue;
            };
            let t = FusionTranscript {
                frag_5p: frag_5p.clone(),
                frag_3p,
            };
            let len = t.sequence().len();
            match by_len.get(&len) {
                Some(existing) if existing.rank() >= t.rank() => {}
                _ => {
                    by_len.insert(len, t);
                }
            }
        }
    }
    Ok(by_len.into_values().collect())
}

/// Most informative breakpoint class across the transcripts of one side.
pub fn best_break_pos(transcripts: &[FusionTranscript], side: FragSide) -> BreakPos {
    transcripts
        .iter()
        .map(|t| match side {
            FragSide::FiveP => t.frag_5p.break_pos,
            FragSide::ThreeP => t.frag_3p.break_pos,
        })
        .max()
        .unwrap_or(BreakPos::Unknown)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ModelBuilder, Strand};

    /// Plus-strand coding gene: exons 11 (90bp) and 12 (60bp), CDS from
    /// offset 30 to 30 before the transcript end.
    fn coding_model() -> GeneModel {
        let mut b = ModelBuilder::new();
        b.add_gene(1, "GA", "chr1", Strand::Forward, 0, 10_000);
        b.add_gene(2, "GB", "chr2", Strand::Forward, 0, 10_000);
        b.add_exon(11, 1, 0, 90, 0, 90, &"A".repeat(90));
        b.add_exon(12, 1, 100, 160, 100, 160, &"C".repeat(60));
        b.add_exon(21, 2, 0, 90, 0, 90, &"G".repeat(90));
        b.add_exon(22, 2, 100, 160, 100, 160, &"T".repeat(60));
        b.add_isoform(1, "iso_a", &[11, 12], 30, 30);
        b.add_isoform(2, "iso_b", &[21, 22], 30, 30);
        b.finish().unwrap()
    }

    #[test]
    fn test_break_pos_ordering() {
        assert!(BreakPos::Cds > BreakPos::Utr5);
        assert!(BreakPos::Utr5 > BreakPos::Utr3);
        assert!(BreakPos::Utr3 > BreakPos::Noncoding);
        assert!(BreakPos::Noncoding > BreakPos::Unknown);
        assert_eq!(BreakPos::Noncoding.to_string(), "ncRNA");
        assert_eq!(BreakPos::Utr3.to_string(), "UTR-3");
    }

    #[test]
    fn test_five_prime_fragment_in_cds() {
        let model = coding_model();
        let iso = &model.gene(1).unwrap().isoforms[0];
        // break after exon 11: offset 90, inside CDS [30, 120)
        let frag = fragment(&model, iso, 11, FragSide::FiveP)
            .unwrap()
            .unwrap();
        assert_eq!(frag.sequence.len(), 90);
        assert_eq!(frag.break_pos, BreakPos::Cds);
        assert_eq!(frag.coding.len(), 60);
    }

    #[test]
    fn test_three_prime_fragment_in_cds() {
        let model = coding_model();
        let iso = &model.gene(2).unwrap().isoforms[0];
        // break before exon 22: offset 90, inside CDS [30, 120)
        let frag = fragment(&model, iso, 22, FragSide::ThreeP)
            .unwrap()
            .unwrap();
        assert_eq!(frag.sequence.len(), 60);
        assert_eq!(frag.break_pos, BreakPos::Cds);
        assert_eq!(frag.coding.len(), 30);
    }

    #[test]
    fn test_fragment_missing_exon_is_none() {
        let model = coding_model();
        let iso = &model.gene(1).unwrap().isoforms[0];
        assert!(fragment(&model, iso, 21, FragSide::FiveP).unwrap().is_none());
    }

    #[test]
    fn test_noncoding_isoform() {
        let mut b = ModelBuilder::new();
        b.add_gene(1, "G", "chr1", Strand::Forward, 0, 1000);
        b.add_exon(11, 1, 0, 90, 0, 90, &"A".repeat(90));
        b.add_isoform(1, "nc", &[11], -1, -1);
        let model = b.finish().unwrap();
        let iso = &model.gene(1).unwrap().isoforms[0];
        let frag = fragment(&model, iso, 11, FragSide::FiveP)
            .unwrap()
            .unwrap();
        assert_eq!(frag.break_pos, BreakPos::Noncoding);
        assert!(frag.coding.is_empty());
    }

    #[test]
    fn test_minus_strand_fragment() {
        let mut b = ModelBuilder::new();
        b.add_gene(1, "G", "chr1", Strand::Reverse, 0, 1000);
        b.add_exon(11, 1, 0, 4, 0, 4, "AAAA");
        b.add_exon(12, 1, 10, 14, 10, 14, "CCCC");
        b.add_isoform(1, "i1", &[11, 12], -1, -1);
        let model = b.finish().unwrap();
        let iso = &model.gene(1).unwrap().isoforms[0];

        // transcription runs 12 -> 11; the 5' fragment through exon 12 is
        // its reverse complement
        let frag = fragment(&model, iso, 12, FragSide::FiveP)
            .unwrap()
            .unwrap();
        assert_eq!(frag.sequence, "GGGG");
        let frag = fragment(&model, iso, 11, FragSide::ThreeP)
            .unwrap()
            .unwrap();
        assert_eq!(frag.sequence, "TTTT");
    }

    #[test]
    fn test_in_frame_when_cds_lengths_align() {
        let model = coding_model();
        let transcripts = all_transcripts(&model, 11, 22).unwrap();
        assert_eq!(transcripts.len(), 1);
        let t = &transcripts[0];
        // 60 + 30 coding bases = 90, divisible by three
        assert!(t.is_in_frame());
        assert_eq!(t.sequence().len(), 150);
        assert!(t.signature().starts_with("[iso_a-iso_b]:"));
    }

    #[test]
    fn test_out_of_frame() {
        let mut b = ModelBuilder::new();
        b.add_gene(1, "GA", "chr1", Strand::Forward, 0, 10_000);
        b.add_gene(2, "GB", "chr2", Strand::Forward, 0, 10_000);
        b.add_exon(11, 1, 0, 91, 0, 91, &"A".repeat(91));
        b.add_exon(12, 1, 100, 160, 100, 160, &"C".repeat(60));
        b.add_exon(21, 2, 0, 90, 0, 90, &"G".repeat(90));
        b.add_exon(22, 2, 100, 160, 100, 160, &"T".repeat(60));
        b.add_isoform(1, "ia", &[11, 12], 30, 30);
        b.add_isoform(2, "ib", &[21, 22], 30, 30);
        let model = b.finish().unwrap();

        let transcripts = all_transcripts(&model, 11, 22).unwrap();
        // 61 + 30 = 91 coding bases, not divisible by three
        assert!(!transcripts[0].is_in_frame());
    }

    #[test]
    fn test_utr3_break_is_in_frame() {
        let mut b = ModelBuilder::new();
        b.add_gene(1, "GA", "chr1", Strand::Forward, 0, 10_000);
        b.add_gene(2, "GB", "chr2", Strand::Forward, 0, 10_000);
        // CDS ends 60 before the transcript end: a break at offset 90 of a
        // 90bp transcript is in the 3' UTR
        b.add_exon(11, 1, 0, 90, 0, 90, &"A".repeat(90));
        b.add_exon(21, 2, 0, 90, 0, 90, &"G".repeat(90));
        b.add_isoform(1, "ia", &[11], 10, 60);
        b.add_isoform(2, "ib", &[21], 30, 30);
        let model = b.finish().unwrap();

        let transcripts = all_transcripts(&model, 11, 21).unwrap();
        assert_eq!(transcripts[0].frag_5p.break_pos, BreakPos::Utr3);
        assert!(transcripts[0].is_in_frame());
    }

    #[test]
    fn test_best_break_pos() {
        let model = coding_model();
        let transcripts = all_transcripts(&model, 11, 22).unwrap();
        assert_eq!(best_break_pos(&transcripts, FragSide::FiveP), BreakPos::Cds);
        assert_eq!(best_break_pos(&[], FragSide::FiveP), BreakPos::Unknown);
    }
}

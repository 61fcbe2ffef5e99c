//! Anchor reads: split reads spanning a candidate junction breakpoint.
//!
//! The junction aligner postprocessor emits one 16-column record per split
//! alignment. Records are parsed here, the breakpoint overhangs derived, and
//! each read classified as an anchor read (its mate lands in a partner gene)
//! and optionally as high-confidence evidence. PCR duplicate collapse also
//! lives here since it operates purely on the anchor reads of one junction.

use crate::error::Error;
use crate::junction::SpuriousFlag;
use crate::model::{Gene, GeneModel};
use crate::seq::mismatches_in_prefix;

/// Minimum breakpoint overhang for a split read to count as anchored.
pub const ANCHOR_LENGTH: i64 = 10;

/// Overhang at which a clean alignment is high-confidence on its own.
const STRONG_OVERHANG: i64 = 20;

/// Mismatch budget for the strong-overhang shortcut, as a fraction of the
/// aligned length.
const STRONG_MISMATCH_RATE: f64 = 0.02;

/// Prefix window for PCR duplicate comparison, bp.
const DUP_PREFIX: usize = 35;

// ---------------------------------------------------------------------------
// Wire records
// ---------------------------------------------------------------------------

/// One line of the junction-alignment table. Sixteen tab-separated columns:
/// junction name, cigar, strand, flag, position, aligned length, full
/// length, read name, sequence, edit distance, mismatches, clip before,
/// clip after, indel positions, mismatch positions, anchor-mismatch flag.
#[derive(Debug, Clone)]
pub struct AnchorRecord {
    pub junction_name: String,
    pub cigar: String,
    pub strand: char,
    pub flag: u16,
    pub position: i64,
    pub read_name: String,
    pub sequence: String,
    pub edit_distance: u32,
    pub mismatches: u32,
    pub clip_before: usize,
    pub clip_after: usize,
    pub indel_positions: Vec<i64>,
    pub mismatch_positions: Vec<i64>,
    pub anchor_mismatch: bool,
}

fn parse_positions(field: &str, line: &str) -> Result<Vec<i64>, Error> {
    if field.is_empty() || field == "-" {
        return Ok(Vec::new());
    }
    field
        .split(',')
        .filter(|t| !t.is_empty())
        .map(|t| {
            t.parse()
                .map_err(|_| Error::Record(format!("bad position list '{field}' in '{line}'")))
        })
        .collect()
}

impl AnchorRecord {
    pub fn parse(line: &str) -> Result<AnchorRecord, Error> {
        let sp: Vec<&str> = line.split('\t').collect();
        if sp.len() < 16 {
            return Err(Error::Record(format!(
                "junction alignment record has {} columns, expected 16",
                sp.len()
            )));
        }
        let num = |i: usize| -> Result<i64, Error> {
            sp[i]
                .parse()
                .map_err(|_| Error::Record(format!("bad number '{}' in '{line}'", sp[i])))
        };
        Ok(AnchorRecord {
            junction_name: sp[0].to_string(),
            cigar: sp[1].to_string(),
            strand: sp[2].chars().next().unwrap_or('+'),
            flag: num(3)? as u16,
            position: num(4)?,
            read_name: sp[7].to_string(),
            sequence: sp[8].to_string(),
            edit_distance: num(9)? as u32,
            mismatches: num(10)? as u32,
            clip_before: num(11)? as usize,
            clip_after: num(12)? as usize,
            indel_positions: parse_positions(sp[13], line)?,
            mismatch_positions: parse_positions(sp[14], line)?,
            anchor_mismatch: sp[15] == "1",
        })
    }

    /// Serialize back to the 16-column table row.
    pub fn to_line(&self) -> String {
        let list = |v: &[i64]| {
            if v.is_empty() {
                "-".to_string()
            } else {
                v.iter().map(|p| p.to_string()).collect::<Vec<_>>().join(",")
            }
        };
        let aligned_len = self.sequence.len() - self.clip_before - self.clip_after;
        format!(
            "{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}",
            self.junction_name,
            self.cigar,
            self.strand,
            self.flag,
            self.position,
            aligned_len,
            self.sequence.len(),
            self.read_name,
            self.sequence,
            self.edit_distance,
            self.mismatches,
            self.clip_before,
            self.clip_after,
            list(&self.indel_positions),
            list(&self.mismatch_positions),
            if self.anchor_mismatch { "1" } else { "0" },
        )
    }
}

// ---------------------------------------------------------------------------
// Anchor reads
// ---------------------------------------------------------------------------

/// An alignment of the other mate, used to decide whether a split read is
/// anchored by its pair.
#[derive(Debug, Clone)]
pub struct OtherRead {
    pub gene_id: u32,
    pub position: i64,
    pub mismatches: u32,
}

#[derive(Debug, Clone)]
pub struct AnchorRead {
    pub read_name: String,
    pub sequence: String,
    /// Sequence of the other mate; empty until the pool lookup attaches it.
    pub mate_sequence: String,
    pub position: i64,
    pub aligned_len: i64,
    /// Aligned bases on the 5' side of the breakpoint.
    pub overhang_5p: i64,
    /// Aligned bases on the 3' side of the breakpoint.
    pub overhang_3p: i64,
    pub mismatches: u32,
    pub edit_distance: u32,
    pub clip_before: usize,
    pub clip_after: usize,
    pub anchor_mismatch: bool,
    pub other_reads: Vec<OtherRead>,
    pub spurious: SpuriousFlag,
    pub high_confidence: bool,
}

impl AnchorRead {
    /// Derive a split read from its wire record and the junction breakpoint.
    /// A record whose alignment does not span the breakpoint violates the
    /// postprocessor contract and is fatal.
    pub fn from_record(rec: &AnchorRecord, breakpoint: usize) -> Result<AnchorRead, Error> {
        let seq_len = rec.sequence.len();
        if rec.clip_before + rec.clip_after > seq_len {
            return Err(Error::Record(format!(
                "clip lengths exceed read length for '{}'",
                rec.read_name
            )));
        }
        let aligned_len = (seq_len - rec.clip_before - rec.clip_after) as i64;
        let overhang_5p = breakpoint as i64 - rec.position;
        let overhang_3p = aligned_len - overhang_5p;
        if overhang_5p < 0 || overhang_3p < 0 {
            return Err(Error::Contract(format!(
                "anchor reads not properly loaded: '{}' does not span the \
                 breakpoint of junction '{}'",
                rec.read_name, rec.junction_name
            )));
        }
        Ok(AnchorRead {
            read_name: rec.read_name.clone(),
            sequence: rec.sequence.clone(),
            mate_sequence: String::new(),
            position: rec.position,
            aligned_len,
            overhang_5p,
            overhang_3p,
            mismatches: rec.mismatches,
            edit_distance: rec.edit_distance,
            clip_before: rec.clip_before,
            clip_after: rec.clip_after,
            anchor_mismatch: rec.anchor_mismatch,
            other_reads: Vec::new(),
            spurious: SpuriousFlag::default(),
            high_confidence: false,
        })
    }

    pub fn min_overhang(&self) -> i64 {
        self.overhang_5p.min(self.overhang_3p)
    }

    /// Split read sequence with the soft-clipped ends removed.
    pub fn aligned_sequence(&self) -> &str {
        &self.sequence[self.clip_before..self.sequence.len() - self.clip_after]
    }
}

/// Read name with a trailing mate designator (`/1`, `/2`, `.1`, `.2`) and
/// any comment after the first whitespace removed.
pub fn trimmed_read_name(name: &str) -> &str {
    let name = name.split_whitespace().next().unwrap_or(name);
    for suffix in ["/1", "/2", ".1", ".2"] {
        if let Some(stripped) = name.strip_suffix(suffix) {
            return stripped;
        }
    }
    name
}

/// Deduplication key for a read pair: the leading 36bp of both mates.
pub fn pair_prefix_key(seq1: &str, seq2: &str) -> String {
    const PREFIX: usize = 36;
    let head = |s: &str| s[..s.len().min(PREFIX)].to_ascii_uppercase();
    format!("{}:{}", head(seq1), head(seq2))
}

// ---------------------------------------------------------------------------
// Classification
// ---------------------------------------------------------------------------

fn maps_to(model: &GeneModel, gene_id: u32, partner: &Gene) -> bool {
    match model.gene(gene_id) {
        Ok(gene) => gene.id == partner.id || Gene::genes_overlap(gene, partner),
        Err(_) => false,
    }
}

/// A split read is an anchor read when its other mate aligns to one of the
/// partner genes or to a gene genomically overlapping a partner.
pub fn is_anchor_read(
    model: &GeneModel,
    ar: &AnchorRead,
    gene_5p: &Gene,
    gene_3p: &Gene,
) -> bool {
    ar.other_reads
        .iter()
        .any(|o| maps_to(model, o.gene_id, gene_5p) || maps_to(model, o.gene_id, gene_3p))
}

/// High-confidence classification.
///
/// Disqualified outright if spurious, not an anchor read, or the mate also
/// aligns to an unrelated third gene. Otherwise a long clean overhang
/// suffices; failing that, the mate must map to the partner opposite the
/// split read's dominant side.
pub fn is_high_confidence(
    model: &GeneModel,
    ar: &AnchorRead,
    gene_5p: &Gene,
    gene_3p: &Gene,
) -> bool {
    if ar.spurious.is_set() || !is_anchor_read(model, ar, gene_5p, gene_3p) {
        return false;
    }
    if ar
        .other_reads
        .iter()
        .any(|o| !maps_to(model, o.gene_id, gene_5p) && !maps_to(model, o.gene_id, gene_3p))
    {
        return false;
    }
    let budget = (STRONG_MISMATCH_RATE * ar.aligned_len as f64).round() as u32;
    if ar.min_overhang() >= STRONG_OVERHANG && ar.mismatches < budget {
        return true;
    }
    // short side needs the mate to confirm the opposite partner
    let opposite = if ar.overhang_5p > ar.overhang_3p {
        gene_3p
    } else {
        gene_5p
    };
    ar.other_reads
        .iter()
        .any(|o| maps_to(model, o.gene_id, opposite))
}

// ---------------------------------------------------------------------------
// PCR duplicates
// ---------------------------------------------------------------------------

fn is_duplicate(a: &AnchorRead, b: &AnchorRead) -> bool {
    mismatches_in_prefix(a.aligned_sequence(), b.aligned_sequence(), DUP_PREFIX) <= 1
        && mismatches_in_prefix(&a.mate_sequence, &b.mate_sequence, DUP_PREFIX) <= 1
}

/// Mark all but one member of each PCR duplicate group spurious. Reads with
/// longer alignments are preferred as the surviving representative.
pub fn mark_pcr_duplicates(anchor_reads: &mut [AnchorRead]) {
    let mut order: Vec<usize> = (0..anchor_reads.len()).collect();
    order.sort_by_key(|&i| std::cmp::Reverse(anchor_reads[i].aligned_len));

    for i in 0..order.len() {
        if anchor_reads[order[i]].spurious.is_set() {
            continue;
        }
        for j in (i + 1)..order.len() {
            if anchor_reads[order[j]].spurious.is_set() {
                continue;
            }
            if is_duplicate(&anchor_reads[order[i]], &anchor_reads[order[j]]) {
                anchor_reads[order[j]].spurious.mark();
            }
        }
    }
}

//! SAM postprocessing for the external aligner outputs.
//!
//! bowtie2 reports junction, transcriptome and scrambled-reference
//! alignments as SAM; this module reduces those lines to the records the
//! pipeline actually consumes: the 16-column junction-alignment table,
//! other-mate gene hits, and scrambled-exon hits.

use std::collections::HashMap;
use std::io::BufRead;

use crate::anchor::{AnchorRecord, OtherRead, ANCHOR_LENGTH};
use crate::error::Error;
use crate::filter::ScrambledHit;

/// Minimal SAM fields used by the postprocessors.
#[derive(Debug, Clone)]
pub struct SamRecord {
    pub read_name: String,
    pub flag: u16,
    pub reference: String,
    /// 0-based leftmost reference position.
    pub position: i64,
    pub cigar: String,
    pub sequence: String,
    /// NM tag; 0 when absent.
    pub edit_distance: u32,
    /// MD tag, when present.
    pub md: Option<String>,
}

impl SamRecord {
    /// Parse one SAM line; headers and unmapped records yield `None`.
    pub fn parse(line: &str) -> Result<Option<SamRecord>, Error> {
        if line.is_empty() || line.starts_with('@') {
            return Ok(None);
        }
        let sp: Vec<&str> = line.split('\t').collect();
        if sp.len() < 11 {
            return Err(Error::Record(format!(
                "sam record has {} columns, expected >= 11",
                sp.len()
            )));
        }
        let flag: u16 = sp[1]
            .parse()
            .map_err(|_| Error::Record(format!("bad sam flag '{}'", sp[1])))?;
        if flag & 0x4 != 0 {
            return Ok(None);
        }
        let position: i64 = sp[3]
            .parse()
            .map_err(|_| Error::Record(format!("bad sam position '{}'", sp[3])))?;

        let mut edit_distance = 0u32;
        let mut md = None;
        for tag in &sp[11..] {
            if let Some(v) = tag.strip_prefix("NM:i:") {
                edit_distance = v
                    .parse()
                    .map_err(|_| Error::Record(format!("bad NM tag '{tag}'")))?;
            } else if let Some(v) = tag.strip_prefix("MD:Z:") {
                md = Some(v.to_string());
            }
        }

        Ok(Some(SamRecord {
            read_name: sp[0].to_string(),
            flag,
            reference: sp[2].to_string(),
            position: position - 1,
            cigar: sp[5].to_string(),
            sequence: sp[9].to_string(),
            edit_distance,
            md,
        }))
    }

    pub fn strand(&self) -> char {
        if self.flag & 0x10 != 0 { '-' } else { '+' }
    }
}

// ---------------------------------------------------------------------------
// CIGAR / MD digestion
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct CigarDigest {
    clip_before: usize,
    clip_after: usize,
    /// Read bases inside the aligned region.
    aligned_read_len: i64,
    /// Bases inserted or deleted, counted toward the edit distance.
    indel_bases: u32,
    /// Alignment-relative reference offsets where indels occur.
    indel_offsets: Vec<i64>,
}

fn digest_cigar(cigar: &str) -> Result<CigarDigest, Error> {
    let mut d = CigarDigest::default();
    let mut num = 0i64;
    let mut ref_off = 0i64;
    let mut seen_aligned = false;
    for c in cigar.chars() {
        if let Some(v) = c.to_digit(10) {
            num = num * 10 + v as i64;
            continue;
        }
        match c {
            'S' | 'H' => {
                if seen_aligned {
                    d.clip_after += num as usize;
                } else {
                    d.clip_before += num as usize;
                }
            }
            'M' | '=' | 'X' => {
                seen_aligned = true;
                d.aligned_read_len += num;
                ref_off += num;
            }
            'I' => {
                seen_aligned = true;
                d.aligned_read_len += num;
                d.indel_bases += num as u32;
                d.indel_offsets.push(ref_off);
            }
            'D' | 'N' => {
                seen_aligned = true;
                d.indel_bases += num as u32;
                d.indel_offsets.push(ref_off);
                ref_off += num;
            }
            _ => {
                return Err(Error::Record(format!("unsupported cigar op '{c}' in '{cigar}'")));
            }
        }
        num = 0;
    }
    Ok(d)
}

/// Alignment-relative reference offsets of mismatched bases, from an MD tag.
fn md_mismatch_offsets(md: &str) -> Result<Vec<i64>, Error> {
    let mut offsets = Vec::new();
    let mut ref_off = 0i64;
    let mut chars = md.chars().peekable();
    while let Some(&c) = chars.peek() {
        if c.is_ascii_digit() {
            let mut num = 0i64;
            while let Some(&d) = chars.peek() {
                match d.to_digit(10) {
                    Some(v) => {
                        num = num * 10 + v as i64;
                        chars.next();
                    }
                    None => break,
                }
            }
            ref_off += num;
        } else if c == '^' {
            // deletion run; reference advances, no mismatch recorded
            chars.next();
            while chars.peek().is_some_and(|d| d.is_ascii_alphabetic()) {
                chars.next();
                ref_off += 1;
            }
        } else if c.is_ascii_alphabetic() {
            offsets.push(ref_off);
            ref_off += 1;
            chars.next();
        } else {
            return Err(Error::Record(format!("malformed MD tag '{md}'")));
        }
    }
    Ok(offsets)
}

// ---------------------------------------------------------------------------
// Junction alignments
// ---------------------------------------------------------------------------

/// Reduce one junction-alignment SAM line to a table record.
///
/// Returns `None` for headers, unmapped reads, alignments over the error
/// rate ceiling, and reads that do not overhang the breakpoint by the
/// anchor length on both sides.
pub fn junction_record(
    line: &str,
    breakpoints: &HashMap<String, i64>,
    max_error_rate: f64,
) -> Result<Option<AnchorRecord>, Error> {
    let Some(sam) = SamRecord::parse(line)? else {
        return Ok(None);
    };
    let breakpoint = *breakpoints.get(&sam.reference).ok_or_else(|| {
        Error::Record(format!(
            "alignment references unknown junction '{}'",
            sam.reference
        ))
    })?;

    let digest = digest_cigar(&sam.cigar)?;
    let aligned_len = digest.aligned_read_len;
    if aligned_len == 0 {
        return Ok(None);
    }
    if sam.edit_distance as f64 > max_error_rate * aligned_len as f64 {
        return Ok(None);
    }

    let overhang_5p = breakpoint - sam.position;
    let overhang_3p = aligned_len - overhang_5p;
    if overhang_5p < ANCHOR_LENGTH || overhang_3p < ANCHOR_LENGTH {
        return Ok(None);
    }

    let mismatch_offsets = match &sam.md {
        Some(md) => md_mismatch_offsets(md)?,
        None => Vec::new(),
    };
    let near_breakpoint = |off: i64| {
        let global = sam.position + off;
        global >= breakpoint - ANCHOR_LENGTH && global < breakpoint + ANCHOR_LENGTH
    };
    let anchor_mismatch = mismatch_offsets.iter().copied().any(near_breakpoint)
        || digest.indel_offsets.iter().copied().any(near_breakpoint);

    Ok(Some(AnchorRecord {
        junction_name: sam.reference.clone(),
        cigar: sam.cigar.clone(),
        strand: sam.strand(),
        flag: sam.flag,
        position: sam.position,
        read_name: sam.read_name.clone(),
        sequence: sam.sequence.clone(),
        edit_distance: sam.edit_distance,
        mismatches: sam.edit_distance.saturating_sub(digest.indel_bases),
        clip_before: digest.clip_before,
        clip_after: digest.clip_after,
        indel_positions: digest.indel_offsets,
        mismatch_positions: mismatch_offsets,
        anchor_mismatch,
    }))
}

// ---------------------------------------------------------------------------
// Other-mate and scrambled alignments
// ---------------------------------------------------------------------------

/// Group transcriptome alignments of the mate pool by read name, resolving
/// each hit's isoform to its gene. Alignments against unknown references
/// are skipped; the transcriptome index may be broader than the annotation.
pub fn mate_alignments<R: BufRead>(
    reader: R,
    iso_to_gene: &HashMap<String, u32>,
) -> Result<HashMap<String, Vec<OtherRead>>, Error> {
    let mut hits: HashMap<String, Vec<OtherRead>> = HashMap::new();
    for line in reader.lines() {
        let line = line.map_err(|e| Error::Record(format!("error reading sam: {e}")))?;
        let Some(sam) = SamRecord::parse(&line)? else {
            continue;
        };
        let Some(&gene_id) = iso_to_gene.get(&sam.reference) else {
            continue;
        };
        let digest = digest_cigar(&sam.cigar)?;
        hits.entry(sam.read_name).or_default().push(OtherRead {
            gene_id,
            position: sam.position,
            mismatches: sam.edit_distance.saturating_sub(digest.indel_bases),
        });
    }
    Ok(hits)
}

/// Reduce one scrambled-reference SAM line to a filter hit.
pub fn scrambled_hit(line: &str) -> Result<Option<ScrambledHit>, Error> {
    let Some(sam) = SamRecord::parse(line)? else {
        return Ok(None);
    };
    let digest = digest_cigar(&sam.cigar)?;
    Ok(Some(ScrambledHit {
        q_name: sam.read_name,
        t_gene: sam.reference,
        edit_distance: sam.edit_distance,
        clip_before: digest.clip_before as i64,
        clip_after: digest.clip_after as i64,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sam_line(qname: &str, rname: &str, pos_1based: i64, cigar: &str, seq: &str, tags: &str) -> String {
        format!("{qname}\t0\t{rname}\t{pos_1based}\t42\t{cigar}\t*\t0\t0\t{seq}\t*\t{tags}")
    }

    #[test]
    fn test_parse_skips_headers_and_unmapped() {
        assert!(SamRecord::parse("@SQ\tSN:x\tLN:100").unwrap().is_none());
        let unmapped = "r1\t4\t*\t0\t0\t*\t*\t0\t0\tACGT\t*";
        assert!(SamRecord::parse(unmapped).unwrap().is_none());
    }

    #[test]
    fn test_parse_extracts_tags() {
        let line = sam_line("r1", "junc", 10, "4S30M", &"A".repeat(34), "NM:i:2\tMD:Z:10A5C13");
        let sam = SamRecord::parse(&line).unwrap().unwrap();
        assert_eq!(sam.position, 9);
        assert_eq!(sam.edit_distance, 2);
        assert_eq!(sam.md.as_deref(), Some("10A5C13"));
        assert_eq!(sam.strand(), '+');
    }

    #[test]
    fn test_digest_cigar_clips_and_indels() {
        let d = digest_cigar("5S20M2I10M1D8M3S").unwrap();
        assert_eq!(d.clip_before, 5);
        assert_eq!(d.clip_after, 3);
        assert_eq!(d.aligned_read_len, 40);
        assert_eq!(d.indel_bases, 3);
        // insertion at ref offset 20, deletion at 30
        assert_eq!(d.indel_offsets, vec![20, 30]);
    }

    #[test]
    fn test_md_mismatch_offsets() {
        assert_eq!(md_mismatch_offsets("30").unwrap(), Vec::<i64>::new());
        assert_eq!(md_mismatch_offsets("10A19").unwrap(), vec![10]);
        assert_eq!(md_mismatch_offsets("5A0C10").unwrap(), vec![5, 6]);
        // deletions advance the reference without recording a mismatch
        assert_eq!(md_mismatch_offsets("8^AC4T0").unwrap(), vec![14]);
    }

    #[test]
    fn test_junction_record_spanning_read() {
        let mut breakpoints = HashMap::new();
        breakpoints.insert("1000000_11_21_F_1_80".to_string(), 80i64);
        // 0-based position 65, 30 aligned bases: overhangs 15/15
        let line = sam_line(
            "r1/1",
            "1000000_11_21_F_1_80",
            66,
            "5S30M",
            &"A".repeat(35),
            "NM:i:1\tMD:Z:10A19",
        );
        let rec = junction_record(&line, &breakpoints, 0.05)
            .unwrap()
            .unwrap();
        assert_eq!(rec.position, 65);
        assert_eq!(rec.clip_before, 5);
        assert_eq!(rec.mismatches, 1);
        // the mismatch sits at reference 75, within 10bp of the breakpoint
        assert!(rec.anchor_mismatch);
    }

    #[test]
    fn test_junction_record_rejects_short_overhang() {
        let mut breakpoints = HashMap::new();
        breakpoints.insert("j".to_string(), 80i64);
        // aligned 75..105: 5' overhang of 5 only
        let line = sam_line("r1", "j", 76, "30M", &"A".repeat(30), "NM:i:0\tMD:Z:30");
        assert!(junction_record(&line, &breakpoints, 0.05).unwrap().is_none());
    }

    #[test]
    fn test_junction_record_rejects_noisy_alignment() {
        let mut breakpoints = HashMap::new();
        breakpoints.insert("j".to_string(), 80i64);
        let line = sam_line(
            "r1",
            "j",
            66,
            "30M",
            &"A".repeat(30),
            "NM:i:4\tMD:Z:1A1C1G1T24",
        );
        assert!(junction_record(&line, &breakpoints, 0.05).unwrap().is_none());
    }

    #[test]
    fn test_junction_record_unknown_reference_is_error() {
        let breakpoints = HashMap::new();
        let line = sam_line("r1", "nope", 66, "30M", &"A".repeat(30), "NM:i:0");
        assert!(junction_record(&line, &breakpoints, 0.05).is_err());
    }

    #[test]
    fn test_mate_alignments_grouped_by_read() {
        let mut iso_to_gene = HashMap::new();
        iso_to_gene.insert("iso_a1".to_string(), 1u32);
        iso_to_gene.insert("iso_b1".to_string(), 2u32);

        let sam = [
            sam_line("r1/2", "iso_a1", 10, "30M", &"A".repeat(30), "NM:i:1\tMD:Z:5A24"),
            sam_line("r1/2", "iso_b1", 40, "30M", &"A".repeat(30), "NM:i:0\tMD:Z:30"),
            sam_line("r2/2", "unannotated", 5, "30M", &"A".repeat(30), "NM:i:0"),
        ]
        .join("\n");

        let hits = mate_alignments(sam.as_bytes(), &iso_to_gene).unwrap();
        assert_eq!(hits.len(), 1);
        let r1 = &hits["r1/2"];
        assert_eq!(r1.len(), 2);
        assert_eq!(r1[0].gene_id, 1);
        assert_eq!(r1[0].mismatches, 1);
        assert_eq!(r1[1].gene_id, 2);
    }

    #[test]
    fn test_scrambled_hit() {
        let line = sam_line(
            "1000000_11_21_F_1_80|r1",
            "GENE_A",
            6,
            "10S50M6S",
            &"A".repeat(66),
            "NM:i:2",
        );
        let hit = scrambled_hit(&line).unwrap().unwrap();
        assert_eq!(hit.q_name, "1000000_11_21_F_1_80|r1");
        assert_eq!(hit.t_gene, "GENE_A");
        assert_eq!(hit.edit_distance, 2);
        assert_eq!(hit.clip_before, 10);
        assert_eq!(hit.clip_after, 6);
    }
}

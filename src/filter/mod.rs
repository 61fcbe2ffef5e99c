//! Spurious-evidence filters.
//!
//! Six passes interrogate the surviving junction evidence against
//! increasingly specific alternative explanations: genomic origin,
//! transcriptomic origin, contig-level paralogs, read-through junction
//! probes, intra-gene exon scrambling and PCR duplication. Each pass is a
//! pure function over parsed alignment records; marking is one-way, so the
//! passes are idempotent and a rerun over the same records is a no-op.

pub mod psl;

use std::collections::HashMap;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use log::debug;

use crate::anchor::{mark_pcr_duplicates, ANCHOR_LENGTH};
use crate::error::Error;
use crate::junction::Junction;
use crate::model::{Gene, GeneModel};
use psl::PslRecord;

/// Whole-genome pass: identity above this means the split read is plain
/// genomic sequence.
const GENOME_IDENTITY: f64 = 0.95;

/// Transcriptome passes: the breakpoint must sit at least this deep inside
/// a contiguous alignment for the read to be explained away.
const STRADDLE_DEPTH: i64 = 10;

/// Junction probes contribute this many bases from each flank.
const PROBE_ARM: usize = 40;

/// Maximum query gap bridged when merging probe alignment blocks.
const PROBE_MERGE_GAP: i64 = 5;

// ---------------------------------------------------------------------------
// Query naming
// ---------------------------------------------------------------------------

/// Query name of one split read: junction name and read name joined.
pub fn split_query_name(junction: &str, read: &str) -> String {
    format!("{junction}|{read}")
}

fn parse_split_query(q_name: &str) -> Option<(&str, &str)> {
    q_name.split_once('|')
}

/// Index junction slice positions by name.
pub fn index_by_name(junctions: &[Junction]) -> HashMap<String, usize> {
    junctions
        .iter()
        .enumerate()
        .map(|(i, j)| (j.key.name(), i))
        .collect()
}

/// Write the surviving split-read sequences as aligner queries.
pub fn write_split_read_queries(junctions: &[Junction], path: &Path) -> Result<(), Error> {
    let file = File::create(path).map_err(|e| Error::io(e, path))?;
    let mut out = BufWriter::new(file);
    for j in junctions {
        if j.spurious.is_set() {
            continue;
        }
        let name = j.key.name();
        for ar in j.anchor_reads.iter().filter(|ar| !ar.spurious.is_set()) {
            writeln!(
                out,
                ">{}\n{}",
                split_query_name(&name, &ar.read_name),
                ar.aligned_sequence()
            )
            .map_err(|e| Error::io(e, path))?;
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Pass 1: whole genome
// ---------------------------------------------------------------------------

/// Drop split reads whose sequence aligns nearly end to end somewhere in
/// the genome.
pub fn genome_pass(junctions: &mut [Junction], records: &[PslRecord]) {
    let idx = index_by_name(junctions);
    let mut marked = 0usize;
    for rec in records {
        if rec.q_size == 0 {
            continue;
        }
        let identity = (rec.matches - rec.mis_matches) as f64 / rec.q_size as f64;
        if identity <= GENOME_IDENTITY {
            continue;
        }
        marked += mark_read(junctions, &idx, &rec.q_name, |_| true);
    }
    debug!("genome pass marked {marked} split reads");
}

// ---------------------------------------------------------------------------
// Pass 2: transcriptome
// ---------------------------------------------------------------------------

/// Drop split reads that align contiguously across their breakpoint to a
/// single annotated transcript.
pub fn exome_pass(junctions: &mut [Junction], records: &[PslRecord]) {
    let idx = index_by_name(junctions);
    let mut marked = 0usize;
    for rec in records {
        let Some((run_start, run_end)) = contiguous_run(rec) else {
            continue;
        };
        if run_end - run_start < rec.q_size {
            continue;
        }
        marked += mark_read(junctions, &idx, &rec.q_name, |ar| {
            ar.overhang_5p - run_start >= STRADDLE_DEPTH
                && run_end - ar.overhang_5p >= STRADDLE_DEPTH
        });
    }
    debug!("transcriptome pass marked {marked} split reads");
}

/// Query-space extent of the alignment run around the largest block.
/// Adjacent blocks merge unless the smaller block is both short and small
/// relative to the gap separating it from the run.
fn contiguous_run(rec: &PslRecord) -> Option<(i64, i64)> {
    let blocks = rec.plus_strand_blocks();
    if blocks.is_empty() {
        return None;
    }
    let m = rec.max_block();
    let mut start = blocks[m].0;
    let mut end = blocks[m].0 + blocks[m].1;

    for i in (0..m).rev() {
        let (qs, size) = blocks[i];
        let gap = start - (qs + size);
        if size < 8 && size < 2 * gap {
            break;
        }
        start = qs;
    }
    for &(qs, size) in blocks.iter().skip(m + 1) {
        let gap = qs - end;
        if size < 8 && size < 2 * gap {
            break;
        }
        end = qs + size;
    }
    Some((start, end))
}

// ---------------------------------------------------------------------------
// Pass 3: per-contig genome
// ---------------------------------------------------------------------------

/// Drop split reads with a near-complete or breakpoint-straddling alignment
/// to a contig locus that neither partner gene explains.
pub fn contig_pass(junctions: &mut [Junction], records: &[PslRecord], model: &GeneModel) {
    let idx = index_by_name(junctions);
    let mut marked = 0usize;
    for rec in records {
        if rec.mis_matches > 2 || rec.q_size == 0 {
            continue;
        }
        let near_complete = ((rec.q_size - rec.matches) as f64) < 0.15 * rec.q_size as f64;

        let Some((jname, _)) = parse_split_query(&rec.q_name) else {
            continue;
        };
        let Some(&j_idx) = idx.get(jname) else {
            continue;
        };
        let (gene_5p, gene_3p) = match partner_genes(model, &junctions[j_idx]) {
            Some(pair) => pair,
            None => continue,
        };

        let explained = rec
            .t_starts
            .iter()
            .zip(&rec.block_sizes)
            .all(|(&ts, &size)| {
                match model.gene_name_for_coordinates(&rec.t_name, ts + size / 2) {
                    Some(name) => name == gene_5p.name || name == gene_3p.name,
                    None => false,
                }
            });
        if explained {
            continue;
        }

        marked += mark_read(junctions, &idx, &rec.q_name, |ar| {
            near_complete
                || (ar.overhang_5p - rec.q_start > 20 && rec.q_end - ar.overhang_5p > 20)
        });
    }
    debug!("contig pass marked {marked} split reads");
}

// ---------------------------------------------------------------------------
// Pass 4: junction probes
// ---------------------------------------------------------------------------

/// Synthetic probe queries for one junction: each flank in full plus a
/// breakpoint-centered chimeric probe.
pub fn junction_probes(j: &Junction) -> Vec<(String, String)> {
    let name = j.key.name();
    let mut probes = vec![
        (format!("{name}_1"), j.seq_5p.to_string()),
        (format!("{name}_2"), j.seq_3p.to_string()),
    ];
    if j.seq_5p.len() >= 30 && j.seq_3p.len() >= 30 {
        let arm5 = &j.seq_5p[j.seq_5p.len().saturating_sub(PROBE_ARM)..];
        let arm3 = &j.seq_3p[..PROBE_ARM.min(j.seq_3p.len())];
        probes.push((format!("{name}_J"), format!("{arm5}{arm3}")));
    }
    probes
}

pub fn write_junction_probes(junctions: &[Junction], path: &Path) -> Result<(), Error> {
    let file = File::create(path).map_err(|e| Error::io(e, path))?;
    let mut out = BufWriter::new(file);
    for j in junctions.iter().filter(|j| !j.spurious.is_set()) {
        for (name, seq) in junction_probes(j) {
            writeln!(out, ">{name}\n{seq}").map_err(|e| Error::io(e, path))?;
        }
    }
    Ok(())
}

/// Drop whole junctions whose probes behave like genomic sequence: the
/// chimeric probe aligns contiguously to one locus or bridges two nearby
/// genes, or both flanks land in one and the same gene.
pub fn probe_pass(
    junctions: &mut [Junction],
    records: &[PslRecord],
    model: &GeneModel,
    read_thru_dist: i64,
) {
    let idx = index_by_name(junctions);
    // per junction, the gene each full flank aligned to
    let mut flank_genes: HashMap<usize, [Option<String>; 2]> = HashMap::new();
    let mut marked = 0usize;

    for rec in records {
        if rec.matches == 0 || rec.mis_matches as f64 / rec.matches as f64 >= 0.1 {
            continue;
        }
        let Some((jname, suffix)) = rec.q_name.rsplit_once('_') else {
            continue;
        };
        let Some(&j_idx) = idx.get(jname) else {
            continue;
        };

        match suffix {
            "J" => {
                let spans_nearby_genes = rec.mis_matches <= 2 && {
                    let first = block_gene(model, rec, 0);
                    let last = block_gene(model, rec, rec.block_sizes.len() - 1);
                    match (first, last) {
                        (Some(a), Some(b)) => {
                            let d = Gene::distance_between(a, b);
                            d >= 0 && d < read_thru_dist
                        }
                        _ => false,
                    }
                };
                let near_complete =
                    rec.q_size > 0 && rec.matches as f64 / rec.q_size as f64 > 0.9;
                if (spans_nearby_genes || near_complete)
                    && !junctions[j_idx].spurious.is_set()
                {
                    junctions[j_idx].spurious.mark();
                    marked += 1;
                }
            }
            side @ ("1" | "2") => {
                if rec.merged_block_count(PROBE_MERGE_GAP) > 2 {
                    continue;
                }
                let gene = model
                    .gene_name_for_coordinates(&rec.t_name, rec.max_block_target_midpoint())
                    .map(|g| g.to_string());
                let slot = if side == "1" { 0 } else { 1 };
                flank_genes.entry(j_idx).or_default()[slot] = gene;
            }
            _ => {}
        }
    }

    for (j_idx, genes) in flank_genes {
        if let [Some(a), Some(b)] = &genes {
            if a == b && !junctions[j_idx].spurious.is_set() {
                junctions[j_idx].spurious.mark();
                marked += 1;
            }
        }
    }
    debug!("probe pass marked {marked} junctions");
}

fn block_gene<'a>(model: &'a GeneModel, rec: &PslRecord, block: usize) -> Option<&'a Gene> {
    let mid = rec.t_starts.get(block)? + rec.block_sizes.get(block)? / 2;
    model
        .gene_name_for_coordinates(&rec.t_name, mid)
        .and_then(|name| model.gene_by_name(name))
}

// ---------------------------------------------------------------------------
// Pass 5: scrambled exons
// ---------------------------------------------------------------------------

/// One alignment of a split read against a partner gene's scrambled-exon
/// reference.
#[derive(Debug, Clone)]
pub struct ScrambledHit {
    /// Split query name, `junction|read`.
    pub q_name: String,
    /// Gene name of the scrambled reference the read hit.
    pub t_gene: String,
    pub edit_distance: u32,
    pub clip_before: i64,
    pub clip_after: i64,
}

/// Drop split reads whose breakpoint window is explained by intra-gene exon
/// scrambling of either partner.
pub fn scrambled_pass(junctions: &mut [Junction], hits: &[ScrambledHit], model: &GeneModel) {
    let idx = index_by_name(junctions);
    let mut marked = 0usize;
    for hit in hits {
        let Some((jname, _)) = parse_split_query(&hit.q_name) else {
            continue;
        };
        let Some(&j_idx) = idx.get(jname) else {
            continue;
        };
        let Some((gene_5p, gene_3p)) = partner_genes(model, &junctions[j_idx]) else {
            continue;
        };
        if hit.t_gene != gene_5p.name && hit.t_gene != gene_3p.name {
            continue;
        }
        marked += mark_read(junctions, &idx, &hit.q_name, |ar| {
            let len = ar.aligned_len;
            let window_start = (ar.overhang_5p - ANCHOR_LENGTH).max(0) + 1;
            let window_end = (ar.overhang_5p + ANCHOR_LENGTH).min(len) - 1;
            hit.edit_distance as f64 <= 0.05 * len as f64
                && hit.clip_before <= window_start
                && (len - hit.clip_after) >= window_end
        });
    }
    debug!("scrambled pass marked {marked} split reads");
}

// ---------------------------------------------------------------------------
// Pass 6: PCR duplicates
// ---------------------------------------------------------------------------

pub fn duplicate_pass(junctions: &mut [Junction]) {
    for j in junctions.iter_mut().filter(|j| !j.spurious.is_set()) {
        mark_pcr_duplicates(&mut j.anchor_reads);
    }
}

// ---------------------------------------------------------------------------
// Shared helpers
// ---------------------------------------------------------------------------

fn partner_genes<'a>(
    model: &'a GeneModel,
    junction: &Junction,
) -> Option<(&'a Gene, &'a Gene)> {
    let gene_5p = model.gene_of_exon(junction.key.ex_5p).ok()?;
    let gene_3p = model.gene_of_exon(junction.key.ex_3p).ok()?;
    Some((gene_5p, gene_3p))
}

/// Mark the split read named by `q_name` spurious when `rule` holds.
/// Returns the number of reads marked.
fn mark_read<F>(
    junctions: &mut [Junction],
    idx: &HashMap<String, usize>,
    q_name: &str,
    rule: F,
) -> usize
where
    F: Fn(&crate::anchor::AnchorRead) -> bool,
{
    let Some((jname, rname)) = parse_split_query(q_name) else {
        return 0;
    };
    let Some(&j_idx) = idx.get(jname) else {
        return 0;
    };
    let mut marked = 0;
    for ar in junctions[j_idx]
        .anchor_reads
        .iter_mut()
        .filter(|ar| ar.read_name == rname && !ar.spurious.is_set())
    {
        if rule(ar) {
            ar.spurious.mark();
            marked += 1;
        }
    }
    marked
}

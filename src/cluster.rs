//! Discordant read-pair aggregation.
//!
//! Consumes the flat discordant-pair table produced upstream, groups pairs
//! by gene pair, applies the per-pair and per-cluster rejection rules and
//! emits the admitted clusters with their exon evidence histograms. These
//! clusters seed junction construction.

use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, BufWriter, Write};
use std::path::Path;

use log::{debug, info, warn};

use crate::error::Error;
use crate::model::{Gene, GeneModel};

/// Two pair alignments corroborate each other when their per-side distance
/// is below this, in transcript bp.
const WITNESS_DISTANCE: i64 = 500;

/// Cluster ids start here so they are visually distinct from gene and exon
/// ids in every downstream artifact.
const FIRST_CLUSTER_ID: u32 = 1_000_000;

// ---------------------------------------------------------------------------
// Records
// ---------------------------------------------------------------------------

/// One line of the discordant-pair table. Twelve tab-separated columns:
/// geneA, startA, lenA, strandA, mismatchesA, geneB, startB, lenB, strandB,
/// mismatchesB, readName, uniqueFlag.
#[derive(Debug, Clone)]
pub struct PairRecord {
    pub gene_a: String,
    pub start_a: i64,
    pub len_a: i64,
    pub gene_b: String,
    pub start_b: i64,
    pub len_b: i64,
    pub read_name: String,
    pub is_unique: bool,
}

impl PairRecord {
    pub fn parse(line: &str) -> Result<PairRecord, Error> {
        let sp: Vec<&str> = line.split('\t').collect();
        if sp.len() < 12 {
            return Err(Error::Record(format!(
                "discordant pair record has {} columns, expected 12: '{line}'",
                sp.len()
            )));
        }
        let num = |i: usize| -> Result<i64, Error> {
            sp[i]
                .parse()
                .map_err(|_| Error::Record(format!("bad number '{}' in '{line}'", sp[i])))
        };
        Ok(PairRecord {
            gene_a: sp[0].to_string(),
            start_a: num(1)?,
            len_a: num(2)?,
            gene_b: sp[5].to_string(),
            start_b: num(6)?,
            len_b: num(7)?,
            read_name: sp[10].to_string(),
            is_unique: sp[11] == "1",
        })
    }
}

/// A single discordant pair retained inside a cluster.
#[derive(Debug, Clone)]
pub struct PairAlignment {
    pub start_a: i64,
    pub len_a: i64,
    pub start_b: i64,
    pub len_b: i64,
    pub read_name: String,
    pub is_unique: bool,
}

#[derive(Debug, Clone)]
pub struct DiscordantCluster {
    pub id: u32,
    pub gene_a: u32,
    pub gene_b: u32,
    pub pairs: Vec<PairAlignment>,
    /// Exon id -> number of pair alignments giving evidence for that exon.
    pub exon_counts: HashMap<u32, u32>,
}

impl DiscordantCluster {
    pub fn total_count(&self) -> usize {
        self.pairs.len()
    }

    pub fn unique_count(&self) -> usize {
        self.pairs.iter().filter(|p| p.is_unique).count()
    }

    /// Exon ids carrying evidence, ascending for stable output.
    pub fn evidence_exons(&self) -> Vec<u32> {
        let mut ids: Vec<u32> = self.exon_counts.keys().copied().collect();
        ids.sort_unstable();
        ids
    }
}

/// Monotonic cluster id source for one run.
#[derive(Debug)]
pub struct ClusterIdGen {
    next: u32,
}

impl ClusterIdGen {
    pub fn new() -> Self {
        ClusterIdGen {
            next: FIRST_CLUSTER_ID,
        }
    }

    pub fn next_id(&mut self) -> u32 {
        let id = self.next;
        self.next += 1;
        id
    }
}

impl Default for ClusterIdGen {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Aggregation
// ---------------------------------------------------------------------------

/// Group the discordant-pair table into admitted clusters.
///
/// `min_span` is the library-size-adjusted minimum pair count; `denylist`
/// entries are matched as substrings of gene names.
pub fn aggregate<R: BufRead>(
    reader: R,
    model: &GeneModel,
    min_span: u32,
    denylist: &[String],
) -> Result<Vec<DiscordantCluster>, Error> {
    let mut groups: HashMap<(u32, u32), Vec<PairAlignment>> = HashMap::new();
    let mut first_seen: Vec<(u32, u32)> = Vec::new();
    let mut dropped_pairs = 0usize;

    for line in reader.lines() {
        let line = line.map_err(|e| {
            Error::Record(format!("error reading discordant pair table: {e}"))
        })?;
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let rec = PairRecord::parse(&line)?;

        if denylist
            .iter()
            .any(|d| rec.gene_a.contains(d.as_str()) || rec.gene_b.contains(d.as_str()))
        {
            dropped_pairs += 1;
            continue;
        }

        let Some(gene_a) = model.gene_by_name(&rec.gene_a) else {
            warn!("discordant pair references unknown gene '{}'", rec.gene_a);
            dropped_pairs += 1;
            continue;
        };
        let Some(gene_b) = model.gene_by_name(&rec.gene_b) else {
            warn!("discordant pair references unknown gene '{}'", rec.gene_b);
            dropped_pairs += 1;
            continue;
        };

        if gene_a.id == gene_b.id {
            dropped_pairs += 1;
            continue;
        }
        if gene_a.id > gene_b.id {
            return Err(Error::Contract(format!(
                "discordant pair table is not in canonical gene order: \
                 {} (id {}) precedes {} (id {})",
                rec.gene_a, gene_a.id, rec.gene_b, gene_b.id
            )));
        }
        if gene_a.contig == "chrM" || gene_b.contig == "chrM" {
            dropped_pairs += 1;
            continue;
        }
        if gene_a.exon_ids.is_empty() || gene_b.exon_ids.is_empty() {
            warn!(
                "gene pair {}:{} skipped, partner without exon annotation",
                rec.gene_a, rec.gene_b
            );
            dropped_pairs += 1;
            continue;
        }
        if gene_a.region_contains_repeat(rec.start_a, rec.start_a + rec.len_a)
            && gene_b.region_contains_repeat(rec.start_b, rec.start_b + rec.len_b)
        {
            dropped_pairs += 1;
            continue;
        }
        // each side must touch at least one exon of its gene
        if model
            .find_exons_within(gene_a, rec.start_a, rec.start_a + rec.len_a, true)
            .is_empty()
            || model
                .find_exons_within(gene_b, rec.start_b, rec.start_b + rec.len_b, true)
                .is_empty()
        {
            dropped_pairs += 1;
            continue;
        }
        if model.homologous_hit(
            gene_a,
            gene_b,
            rec.start_a,
            rec.start_a + rec.len_a,
            rec.start_b,
            rec.start_b + rec.len_b,
        ) {
            dropped_pairs += 1;
            continue;
        }

        let key = (gene_a.id, gene_b.id);
        groups
            .entry(key)
            .or_insert_with(|| {
                first_seen.push(key);
                Vec::new()
            })
            .push(PairAlignment {
                start_a: rec.start_a,
                len_a: rec.len_a,
                start_b: rec.start_b,
                len_b: rec.len_b,
                read_name: rec.read_name,
                is_unique: rec.is_unique,
            });
    }
    debug!("dropped {dropped_pairs} discordant pairs in pre-filtering");

    // ids follow first appearance in the input, so the tie-break below
    // keeps input order among equally supported clusters
    let mut ids = ClusterIdGen::new();
    let mut clusters = Vec::new();
    for key in first_seen {
        let pairs = groups.remove(&key).unwrap_or_default();
        let gene_a = model.gene(key.0)?;
        let gene_b = model.gene(key.1)?;
        if let Some(cluster) = admit(model, gene_a, gene_b, pairs, min_span, &mut ids) {
            clusters.push(cluster);
        }
    }

    // most heavily supported clusters first
    clusters.sort_by(|a, b| {
        b.total_count()
            .cmp(&a.total_count())
            .then_with(|| a.id.cmp(&b.id))
    });
    info!("admitted {} discordant clusters", clusters.len());
    Ok(clusters)
}

/// Apply the admission rules to one gene-pair group.
fn admit(
    model: &GeneModel,
    gene_a: &Gene,
    gene_b: &Gene,
    pairs: Vec<PairAlignment>,
    min_span: u32,
    ids: &mut ClusterIdGen,
) -> Option<DiscordantCluster> {
    if (pairs.len() as u32) < min_span {
        return None;
    }
    if !has_witness_pair(model, gene_a, gene_b, &pairs) {
        return None;
    }
    if !pairs.iter().any(|p| {
        !model
            .find_exons_within(gene_a, p.start_a, p.start_a + p.len_a, false)
            .is_empty()
            && !model
                .find_exons_within(gene_b, p.start_b, p.start_b + p.len_b, false)
                .is_empty()
    }) {
        return None;
    }

    let mut exon_counts: HashMap<u32, u32> = HashMap::new();
    for p in &pairs {
        for exon in model.find_exons_within(gene_a, p.start_a, p.start_a + p.len_a, true) {
            *exon_counts.entry(exon).or_insert(0) += 1;
        }
        for exon in model.find_exons_within(gene_b, p.start_b, p.start_b + p.len_b, true) {
            *exon_counts.entry(exon).or_insert(0) += 1;
        }
    }
    let max_exon_count = exon_counts.values().copied().max().unwrap_or(0);
    if max_exon_count < min_span.saturating_sub(1) {
        return None;
    }

    Some(DiscordantCluster {
        id: ids.next_id(),
        gene_a: gene_a.id,
        gene_b: gene_b.id,
        pairs,
        exon_counts,
    })
}

/// True if two distinct pairs corroborate each other on both sides: their
/// per-side starts differ and lie within the witness distance, measured as
/// the smaller of exonic and raw transcript distance.
fn has_witness_pair(
    model: &GeneModel,
    gene_a: &Gene,
    gene_b: &Gene,
    pairs: &[PairAlignment],
) -> bool {
    for (i, p) in pairs.iter().enumerate() {
        for q in pairs.iter().skip(i + 1) {
            if p.start_a == q.start_a || p.start_b == q.start_b {
                continue;
            }
            let dist_a = model
                .exonic_distance(gene_a, p.start_a, q.start_a)
                .min((p.start_a - q.start_a).abs());
            let dist_b = model
                .exonic_distance(gene_b, p.start_b, q.start_b)
                .min((p.start_b - q.start_b).abs());
            if dist_a < WITNESS_DISTANCE && dist_b < WITNESS_DISTANCE {
                return true;
            }
        }
    }
    false
}

// ---------------------------------------------------------------------------
// Output
// ---------------------------------------------------------------------------

/// Write the admitted-cluster table, one row per cluster.
pub fn write_clusters(
    clusters: &[DiscordantCluster],
    model: &GeneModel,
    path: &Path,
) -> Result<(), Error> {
    let file = File::create(path).map_err(|e| Error::io(e, path))?;
    let mut out = BufWriter::new(file);
    for c in clusters {
        let gene_a = model.gene(c.gene_a)?;
        let gene_b = model.gene(c.gene_b)?;
        let exons = c.evidence_exons();
        let exons_csv = exons
            .iter()
            .map(|e| e.to_string())
            .collect::<Vec<_>>()
            .join(",");
        let counts_csv = exons
            .iter()
            .map(|e| c.exon_counts[e].to_string())
            .collect::<Vec<_>>()
            .join(",");
        writeln!(
            out,
            "{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}",
            c.id,
            gene_a.id,
            gene_a.name,
            gene_b.id,
            gene_b.name,
            c.total_count(),
            exons_csv,
            counts_csv,
            c.unique_count()
        )
        .map_err(|e| Error::io(e, path))?;
    }
    Ok(())
}

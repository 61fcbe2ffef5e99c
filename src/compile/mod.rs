//! Fusion compilation: deduplication, evidence gates, cross-junction read
//! collapse, ranking and report generation.

pub mod frame;
pub mod quant;

use std::cmp::Reverse;
use std::collections::HashMap;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use log::{debug, info};

use crate::anchor::{trimmed_read_name, ANCHOR_LENGTH};
use crate::cluster::DiscordantCluster;
use crate::error::Error;
use crate::junction::Junction;
use crate::model::{FragSide, Gene, GeneModel, Strand};
use crate::seq::dinucleotide_entropy;
use frame::{best_break_pos, BreakPos, FusionTranscript};
use quant::QuantSummary;

/// Entropy window on each side of the breakpoint, bp.
const ENTROPY_WINDOW: usize = 20;

/// Flanks below this dinucleotide entropy are unalignable repeats.
const ENTROPY_FLOOR: f64 = 2.0;

/// Below this, both flanks together need high-confidence support.
const ENTROPY_SOFT_FLOOR: f64 = 2.5;

#[derive(Debug, Clone)]
pub struct CompiledFusion {
    pub junction: Junction,
    pub cluster_id: u32,
    pub total_discord: usize,
    pub unique_discord: usize,
    pub total_ar: usize,
    pub high_conf_ar: usize,
    pub ar_10_15: usize,
    pub ar_15_20: usize,
    pub ar_20: usize,
    pub entropy_5p: f64,
    pub entropy_3p: f64,
    pub transcripts: Vec<FusionTranscript>,
    pub in_frame: bool,
    pub break_pos_5p: BreakPos,
    pub break_pos_3p: BreakPos,
    pub quant: Option<QuantSummary>,
}

impl CompiledFusion {
    /// Ordering key: best-supported fusions first, stable on exon ids.
    fn rank_key(&self) -> (Reverse<usize>, Reverse<usize>, Reverse<usize>, Reverse<usize>, u32, u32)
    {
        (
            Reverse(self.unique_discord),
            Reverse(self.total_discord),
            Reverse(self.high_conf_ar),
            Reverse(self.total_ar),
            self.junction.key.ex_5p,
            self.junction.key.ex_3p,
        )
    }

    fn refresh_counts(&mut self) {
        self.total_ar = self.junction.ar_count(false, ANCHOR_LENGTH);
        self.high_conf_ar = self.junction.ar_count(true, ANCHOR_LENGTH);
        self.ar_10_15 = self.total_ar - self.junction.ar_count(false, 15);
        self.ar_15_20 = self.junction.ar_count(false, 15) - self.junction.ar_count(false, 20);
        self.ar_20 = self.junction.ar_count(false, 20);
    }
}

/// Deduplicate, gate and rank the surviving junctions into reportable
/// fusions.
pub fn compile(
    junctions: Vec<Junction>,
    clusters: &[DiscordantCluster],
    model: &GeneModel,
) -> Result<Vec<CompiledFusion>, Error> {
    let by_id: HashMap<u32, &DiscordantCluster> = clusters.iter().map(|c| (c.id, c)).collect();

    // one junction per (cluster, breakpoint coordinates); alternative flank
    // and neighbor-exon variants collapse onto the best-supported one
    let mut best: HashMap<String, Junction> = HashMap::new();
    for j in junctions.into_iter().filter(|j| !j.spurious.is_set()) {
        let ex_5p = model.exon(j.key.ex_5p)?;
        let ex_3p = model.exon(j.key.ex_3p)?;
        let dedup = format!("{}_{}_{}", j.key.cluster_id, ex_5p.end, ex_3p.start);
        match best.get(&dedup) {
            Some(held)
                if (held.ar_count(true, ANCHOR_LENGTH), held.ar_count(false, ANCHOR_LENGTH))
                    >= (j.ar_count(true, ANCHOR_LENGTH), j.ar_count(false, ANCHOR_LENGTH)) => {}
            _ => {
                best.insert(dedup, j);
            }
        }
    }

    let mut fusions = Vec::new();
    let mut gated = 0usize;
    let mut keys: Vec<String> = best.keys().cloned().collect();
    keys.sort();
    for key in keys {
        let Some(junction) = best.remove(&key) else {
            continue;
        };
        let Some(cluster) = by_id.get(&junction.key.cluster_id) else {
            return Err(Error::Contract(format!(
                "junction '{}' references unknown cluster",
                junction.key.name()
            )));
        };
        match gate(junction, cluster, model)? {
            Some(f) => fusions.push(f),
            None => gated += 1,
        }
    }
    debug!("{gated} junctions removed by evidence gates");

    collapse_shared_reads(&mut fusions);
    for f in &mut fusions {
        f.refresh_counts();
    }
    fusions.retain(|f| f.total_ar > 0);

    fusions.sort_by_key(|f| f.rank_key());
    info!("compiled {} fusions", fusions.len());
    Ok(fusions)
}

/// Evidence gates for a deduplicated junction. Returns `None` when the
/// junction does not meet the reporting bar.
fn gate(
    junction: Junction,
    cluster: &DiscordantCluster,
    model: &GeneModel,
) -> Result<Option<CompiledFusion>, Error> {
    let total_ar = junction.ar_count(false, ANCHOR_LENGTH);
    if total_ar == 0 {
        return Ok(None);
    }
    let high_conf_ar = junction.ar_count(true, ANCHOR_LENGTH);
    if junction.all_anchor_reads_mismatched() && high_conf_ar == 0 {
        return Ok(None);
    }

    let seq_5p = &junction.seq_5p;
    let seq_3p = &junction.seq_3p;
    let entropy_5p =
        dinucleotide_entropy(&seq_5p[seq_5p.len().saturating_sub(ENTROPY_WINDOW)..]);
    let entropy_3p = dinucleotide_entropy(&seq_3p[..ENTROPY_WINDOW.min(seq_3p.len())]);
    if entropy_5p < ENTROPY_FLOOR || entropy_3p < ENTROPY_FLOOR {
        return Ok(None);
    }
    if entropy_5p < ENTROPY_SOFT_FLOOR && entropy_3p < ENTROPY_SOFT_FLOOR && high_conf_ar == 0 {
        return Ok(None);
    }

    let unique_discord = cluster.unique_count();
    if unique_discord == 0 && high_conf_ar == 0 {
        return Ok(None);
    }

    let transcripts = frame::all_transcripts(model, junction.key.ex_5p, junction.key.ex_3p)?;
    let in_frame = transcripts.iter().any(|t| t.is_in_frame());
    let break_pos_5p = best_break_pos(&transcripts, FragSide::FiveP);
    let break_pos_3p = best_break_pos(&transcripts, FragSide::ThreeP);

    let mut fusion = CompiledFusion {
        cluster_id: cluster.id,
        total_discord: cluster.total_count(),
        unique_discord,
        total_ar,
        high_conf_ar,
        ar_10_15: 0,
        ar_15_20: 0,
        ar_20: 0,
        entropy_5p,
        entropy_3p,
        transcripts,
        in_frame,
        break_pos_5p,
        break_pos_3p,
        quant: None,
        junction,
    };
    fusion.refresh_counts();
    Ok(Some(fusion))
}

/// A sequencing fragment supports at most one junction: when the same read
/// backs several fusions, it stays on the best-ranked one and is marked
/// spurious everywhere else.
fn collapse_shared_reads(fusions: &mut [CompiledFusion]) {
    let mut by_read: HashMap<String, Vec<usize>> = HashMap::new();
    for (i, f) in fusions.iter().enumerate() {
        for ar in f.junction.anchor_reads.iter().filter(|ar| !ar.spurious.is_set()) {
            by_read
                .entry(trimmed_read_name(&ar.read_name).to_string())
                .or_default()
                .push(i);
        }
    }

    for (read, mut indices) in by_read {
        indices.sort_unstable();
        indices.dedup();
        if indices.len() < 2 {
            continue;
        }
        let winner = indices
            .iter()
            .copied()
            .min_by_key(|&i| fusions[i].rank_key())
            .unwrap_or(indices[0]);
        for &i in indices.iter().filter(|&&i| i != winner) {
            for ar in fusions[i]
                .junction
                .anchor_reads
                .iter_mut()
                .filter(|ar| trimmed_read_name(&ar.read_name) == read)
            {
                ar.spurious.mark();
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Report
// ---------------------------------------------------------------------------

/// Genomic coordinate of the breakpoint on the 5' side: the transcriptional
/// end of the 5' exon.
fn breakpoint_5p(gene: &Gene, exon: &crate::model::Exon) -> i64 {
    match gene.strand {
        Strand::Forward => exon.genomic_end,
        Strand::Reverse => exon.genomic_start,
    }
}

/// And on the 3' side: the transcriptional start of the 3' exon.
fn breakpoint_3p(gene: &Gene, exon: &crate::model::Exon) -> i64 {
    match gene.strand {
        Strand::Forward => exon.genomic_start,
        Strand::Reverse => exon.genomic_end,
    }
}

const REPORT_HEADER: &str = "fusion\ttotal_discordant\tunique_discordant\ttotal_anchor_reads\t\
high_conf_anchor_reads\tgene_5p\tchr_5p\tstrand_5p\texon_5p\tbreakpoint_5p\t\
gene_3p\tchr_3p\tstrand_3p\texon_3p\tbreakpoint_3p\tbreak_pos_5p\tbreak_pos_3p\t\
in_frame\tar_10_15\tar_15_20\tar_20\tunique_starts_5p\tunique_starts_3p\t\
gene_distance\tentropy_5p\tentropy_3p\trpkm_5p_gene\trpkm_3p_gene\t\
rpkm_a_5p\trpkm_a_3p\trpkm_b_5p\trpkm_b_3p\tconcords_a_5p\tconcords_a_3p\t\
concords_b_5p\tconcords_b_3p\taa_span\taa_junct\tbb_span\tbb_junct\t\
discords_a5p_b3p\tdiscords_a3p_b5p\tdiscords_a5p_b5p\tdiscords_a3p_b3p\t\
coding_sequences\tfusion_transcripts";

pub fn write_report(
    fusions: &[CompiledFusion],
    model: &GeneModel,
    path: &Path,
) -> Result<(), Error> {
    let file = File::create(path).map_err(|e| Error::io(e, path))?;
    let mut out = BufWriter::new(file);
    writeln!(out, "{REPORT_HEADER}").map_err(|e| Error::io(e, path))?;
    for f in fusions {
        writeln!(out, "{}", report_row(f, model)?).map_err(|e| Error::io(e, path))?;
    }
    Ok(())
}

fn report_row(f: &CompiledFusion, model: &GeneModel) -> Result<String, Error> {
    let ex_5p = model.exon(f.junction.key.ex_5p)?;
    let ex_3p = model.exon(f.junction.key.ex_3p)?;
    let gene_5p = model.gene(ex_5p.gene_id)?;
    let gene_3p = model.gene(ex_3p.gene_id)?;

    let q = f.quant.clone().unwrap_or_default();
    let coding: Vec<String> = f
        .transcripts
        .iter()
        .map(|t| t.coding_sequence())
        .filter(|c| !c.is_empty())
        .collect();
    let signatures: Vec<String> = f.transcripts.iter().map(|t| t.signature()).collect();

    Ok(format!(
        "{g5}_{g3}\t{td}\t{ud}\t{ta}\t{ha}\t\
         {g5}\t{c5}\t{s5}\t{e5}\t{b5}\t{g3}\t{c3}\t{s3}\t{e3}\t{b3}\t\
         {bp5}\t{bp3}\t{frame}\t{a1}\t{a2}\t{a3}\t{u5}\t{u3}\t{dist}\t\
         {ent5:.2}\t{ent3:.2}\t\
         {ra:.3}\t{rb:.3}\t{ra5:.3}\t{ra3:.3}\t{rb5:.3}\t{rb3:.3}\t\
         {ca5}\t{ca3}\t{cb5}\t{cb3}\t{aas}\t{aaj}\t{bbs}\t{bbj}\t\
         {d53}\t{d35}\t{d55}\t{d33}\t{coding}\t{sigs}",
        g5 = gene_5p.name,
        g3 = gene_3p.name,
        td = f.total_discord,
        ud = f.unique_discord,
        ta = f.total_ar,
        ha = f.high_conf_ar,
        c5 = gene_5p.contig,
        s5 = gene_5p.strand,
        e5 = ex_5p.id,
        b5 = breakpoint_5p(gene_5p, ex_5p),
        c3 = gene_3p.contig,
        s3 = gene_3p.strand,
        e3 = ex_3p.id,
        b3 = breakpoint_3p(gene_3p, ex_3p),
        bp5 = f.break_pos_5p,
        bp3 = f.break_pos_3p,
        frame = if f.in_frame { 1 } else { 0 },
        a1 = f.ar_10_15,
        a2 = f.ar_15_20,
        a3 = f.ar_20,
        u5 = f.junction.unique_starts_5p(),
        u3 = f.junction.unique_starts_3p(),
        dist = Gene::distance_between(gene_5p, gene_3p),
        ent5 = f.entropy_5p,
        ent3 = f.entropy_3p,
        ra = q.rpkm_a,
        rb = q.rpkm_b,
        ra5 = q.rpkm_a_5p,
        ra3 = q.rpkm_a_3p,
        rb5 = q.rpkm_b_5p,
        rb3 = q.rpkm_b_3p,
        ca5 = q.counts.concords_a_5p,
        ca3 = q.counts.concords_a_3p,
        cb5 = q.counts.concords_b_5p,
        cb3 = q.counts.concords_b_3p,
        aas = q.counts.aa_span,
        aaj = q.counts.aa_junct,
        bbs = q.counts.bb_span,
        bbj = q.counts.bb_junct,
        d53 = q.counts.discords_a5p_b3p,
        d35 = q.counts.discords_a3p_b5p,
        d55 = q.counts.discords_a5p_b5p,
        d33 = q.counts.discords_a3p_b3p,
        coding = if coding.is_empty() { "-".to_string() } else { coding.join(",") },
        sigs = if signatures.is_empty() { "-".to_string() } else { format!("{},", signatures.join(",")) },
    ))
}

// ---------------------------------------------------------------------------
// Pileups
// ---------------------------------------------------------------------------

/// Human-readable stack of the anchor reads around one breakpoint.
pub fn render_pileup(f: &CompiledFusion, model: &GeneModel) -> Result<String, Error> {
    let ex_5p = model.exon(f.junction.key.ex_5p)?;
    let ex_3p = model.exon(f.junction.key.ex_3p)?;
    let gene_5p = model.gene(ex_5p.gene_id)?;
    let gene_3p = model.gene(ex_3p.gene_id)?;

    let mut out = String::new();
    out.push_str(&format!(
        "{:>80}--{:<80}\n",
        format!("{} (exon {})", gene_5p.name, ex_5p.id),
        format!("{} (exon {})", gene_3p.name, ex_3p.id)
    ));
    out.push_str(&format!(
        "{:>80}  {:<80}\n",
        f.junction.seq_5p, f.junction.seq_3p
    ));

    let mut ars: Vec<_> = f
        .junction
        .anchor_reads
        .iter()
        .filter(|ar| !ar.spurious.is_set())
        .collect();
    ars.sort_by_key(|ar| Reverse(ar.overhang_5p));
    for ar in ars {
        let seq = ar.aligned_sequence();
        let split = (ar.overhang_5p.max(0) as usize).min(seq.len());
        let mut mate_genes: Vec<String> = ar
            .other_reads
            .iter()
            .filter_map(|o| model.gene(o.gene_id).ok().map(|g| g.name.clone()))
            .collect();
        mate_genes.sort();
        mate_genes.dedup();
        out.push_str(&format!(
            "{:>80}  {:<80}  {} mm={} mate=[{}]\n",
            &seq[..split],
            &seq[split..],
            ar.read_name,
            ar.mismatches,
            mate_genes.join(",")
        ));
    }
    Ok(out)
}

pub fn write_pileups(
    fusions: &[CompiledFusion],
    model: &GeneModel,
    path: &Path,
) -> Result<(), Error> {
    let file = File::create(path).map_err(|e| Error::io(e, path))?;
    let mut out = BufWriter::new(file);
    for f in fusions {
        writeln!(out, "{}", render_pileup(f, model)?).map_err(|e| Error::io(e, path))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::anchor::testutil::anchor_read;
    use crate::anchor::OtherRead;
    use crate::cluster::{ClusterIdGen, PairAlignment};
    use crate::junction::{JunctionKey, Orientation};
    use crate::model::testutil::two_gene_model;

    /// 80bp flank covering all sixteen dinucleotides, entropy well above
    /// the soft floor.
    fn rich_flank() -> String {
        "AACAGATCCGCTGGTT".repeat(5)
    }

    fn cluster(unique: usize) -> DiscordantCluster {
        let mut ids = ClusterIdGen::new();
        let pairs: Vec<PairAlignment> = (0..3)
            .map(|i| PairAlignment {
                start_a: 10 + i,
                len_a: 50,
                start_b: 10 + i,
                len_b: 50,
                read_name: format!("d{i}"),
                is_unique: i < unique as i64,
            })
            .collect();
        DiscordantCluster {
            id: ids.next_id(),
            gene_a: 1,
            gene_b: 2,
            pairs,
            exon_counts: [(11u32, 3u32), (21, 3)].into_iter().collect(),
        }
    }

    fn junction(ex_5p: u32, ex_3p: u32, idx: u32) -> Junction {
        let flank = rich_flank();
        let key = JunctionKey {
            cluster_id: 1_000_000,
            ex_5p,
            ex_3p,
            orientation: Orientation::Forward,
            idx,
            breakpoint: flank.len(),
        };
        Junction::new(key, flank.as_str().into(), flank.as_str().into())
    }

    fn supported_junction(ex_5p: u32, ex_3p: u32, reads: &[&str]) -> Junction {
        let mut j = junction(ex_5p, ex_3p, 1);
        for name in reads {
            let mut ar = anchor_read(name, 30, 40);
            ar.high_confidence = true;
            ar.other_reads.push(OtherRead {
                gene_id: 2,
                position: 10,
                mismatches: 0,
            });
            j.anchor_reads.push(ar);
        }
        j
    }

    #[test]
    fn test_compile_reports_supported_fusion() {
        let model = two_gene_model();
        let clusters = vec![cluster(2)];
        let j = supported_junction(11, 21, &["r1", "r2", "r3"]);

        let fusions = compile(vec![j], &clusters, &model).unwrap();
        assert_eq!(fusions.len(), 1);
        let f = &fusions[0];
        assert_eq!(f.total_ar, 3);
        assert_eq!(f.high_conf_ar, 3);
        assert_eq!(f.unique_discord, 2);
        assert_eq!(f.ar_20, 3);
        assert_eq!(f.ar_10_15 + f.ar_15_20, 0);
    }

    #[test]
    fn test_compile_gates_no_anchor_reads() {
        let model = two_gene_model();
        let clusters = vec![cluster(2)];
        let j = junction(11, 21, 1);
        let fusions = compile(vec![j], &clusters, &model).unwrap();
        assert!(fusions.is_empty());
    }

    #[test]
    fn test_compile_gates_low_entropy_flank() {
        let model = two_gene_model();
        let clusters = vec![cluster(2)];
        let mut j = supported_junction(11, 21, &["r1"]);
        // homopolymer 3' flank
        j.seq_3p = "A".repeat(80).into();
        let fusions = compile(vec![j], &clusters, &model).unwrap();
        assert!(fusions.is_empty());
    }

    #[test]
    fn test_compile_gates_all_mismatched_without_high_conf() {
        let model = two_gene_model();
        let clusters = vec![cluster(2)];
        let mut j = junction(11, 21, 1);
        let mut ar = anchor_read("r1", 30, 40);
        ar.anchor_mismatch = true;
        j.anchor_reads.push(ar);
        let fusions = compile(vec![j], &clusters, &model).unwrap();
        assert!(fusions.is_empty());
    }

    #[test]
    fn test_compile_requires_unique_discord_or_high_conf() {
        let model = two_gene_model();
        let clusters = vec![cluster(0)];
        let mut j = junction(11, 21, 1);
        // anchored but not high-confidence
        j.anchor_reads.push(anchor_read("r1", 30, 40));
        let fusions = compile(vec![j], &clusters, &model).unwrap();
        assert!(fusions.is_empty());

        // high-confidence evidence rescues the zero-unique cluster
        let j = supported_junction(11, 21, &["r1"]);
        let fusions = compile(vec![j], &vec![cluster(0)], &model).unwrap();
        assert_eq!(fusions.len(), 1);
    }

    #[test]
    fn test_compile_dedups_flank_variants() {
        let model = two_gene_model();
        let clusters = vec![cluster(2)];
        // same exon pair, two flank variants; the better-supported wins
        let strong = supported_junction(11, 21, &["r1", "r2"]);
        let weak = {
            let mut j = junction(11, 21, 2);
            j.anchor_reads.push(anchor_read("r9", 30, 40));
            j
        };
        let fusions = compile(vec![weak, strong], &clusters, &model).unwrap();
        assert_eq!(fusions.len(), 1);
        assert_eq!(fusions[0].total_ar, 2);
        assert_eq!(fusions[0].junction.key.idx, 1);
    }

    #[test]
    fn test_collapse_shared_reads_keeps_best_junction() {
        let model = two_gene_model();
        let clusters = vec![cluster(2)];
        // two distinct exon pairs share read r1; the junction with more
        // support keeps it
        let strong = supported_junction(11, 21, &["r1", "r2", "r3"]);
        let weak = supported_junction(12, 21, &["r1"]);
        let fusions = compile(vec![strong, weak], &clusters, &model).unwrap();

        assert_eq!(fusions.len(), 1);
        assert_eq!(fusions[0].junction.key.ex_5p, 11);
        assert_eq!(fusions[0].total_ar, 3);
    }

    #[test]
    fn test_ranking_prefers_unique_discord() {
        let model = two_gene_model();
        let mut ids = ClusterIdGen::new();
        let mut c1 = cluster(0);
        c1.id = ids.next_id();
        for p in &mut c1.pairs {
            p.is_unique = false;
        }
        let mut c2 = cluster(2);
        c2.id = 1_000_001;

        let mut j1 = supported_junction(11, 21, &["a1", "a2"]);
        j1.key.cluster_id = c1.id;
        let mut j2 = supported_junction(12, 22, &["b1"]);
        j2.key.cluster_id = c2.id;

        let fusions = compile(vec![j1, j2], &[c1, c2], &model).unwrap();
        assert_eq!(fusions.len(), 2);
        // the cluster with unique discordant support ranks first
        assert_eq!(fusions[0].unique_discord, 2);
    }

    #[test]
    fn test_report_row_layout() {
        let model = two_gene_model();
        let clusters = vec![cluster(2)];
        let j = supported_junction(11, 21, &["r1"]);
        let fusions = compile(vec![j], &clusters, &model).unwrap();

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fusions.txt");
        write_report(&fusions, &model, &path).unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        let mut lines = text.lines();
        let header: Vec<&str> = lines.next().unwrap().split('\t').collect();
        let row: Vec<&str> = lines.next().unwrap().split('\t').collect();
        assert_eq!(header.len(), row.len());
        assert_eq!(row[0], "GENE_A_GENE_B");
        assert_eq!(row[5], "GENE_A");
        assert_eq!(row[6], "chr1");
        assert_eq!(row[7], "+");
        // 5' breakpoint of a plus-strand gene is the exon's genomic end
        assert_eq!(row[9], "10100");
        // different contigs have no defined distance
        assert_eq!(row[23], "-1");
    }

    #[test]
    fn test_pileup_alignment_columns() {
        let model = two_gene_model();
        let clusters = vec![cluster(2)];
        let j = supported_junction(11, 21, &["r1"]);
        let fusions = compile(vec![j], &clusters, &model).unwrap();

        let pileup = render_pileup(&fusions[0], &model).unwrap();
        let lines: Vec<&str> = pileup.lines().collect();
        assert!(lines[0].contains("GENE_A"));
        assert!(lines[0].contains("--"));
        // reference flanks and the read line align on the same break column
        assert_eq!(lines[1].find("  "), Some(80));
        assert!(lines[2].contains("r1"));
        assert!(lines[2].contains("mate=[GENE_B]"));
    }
}

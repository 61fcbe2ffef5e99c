//! Junction construction from admitted discordant clusters.
//!
//! For every cluster, the exons carrying discordant evidence are expanded
//! with their isoform neighbors, then paired across the two partner genes in
//! both orientations. Orientations that look like transcriptional
//! read-through are suppressed. Each surviving exon pair yields one junction
//! per distinct flank combination.

use std::collections::HashMap;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use log::info;

use crate::cluster::DiscordantCluster;
use crate::error::Error;
use crate::junction::{Junction, JunctionKey, Orientation};
use crate::model::{Gene, GeneModel, FLANK_LENGTH};

/// Exons this many isoform positions away from an evidenced exon also
/// become junction candidates.
const NEIGHBOR_COUNT: usize = 3;

/// Flanks shorter than this carry too little alignable sequence.
const MIN_FLANK: usize = 30;

/// Upper bound on junction references per aligner invocation.
pub const MAX_JUNCTIONS_PER_SPLIT: usize = 2_000_000;

/// Build all candidate junctions for the admitted clusters.
pub fn build_junctions(
    model: &GeneModel,
    clusters: &[DiscordantCluster],
    read_thru_dist: i64,
) -> Result<Vec<Junction>, Error> {
    let mut junctions = Vec::new();
    for cluster in clusters {
        let gene_a = model.gene(cluster.gene_a)?;
        let gene_b = model.gene(cluster.gene_b)?;
        let cands_a = candidate_exons(gene_a, cluster);
        let cands_b = candidate_exons(gene_b, cluster);

        if !Gene::is_read_thru(gene_a, gene_b, read_thru_dist) {
            build_oriented(
                model,
                cluster.id,
                Orientation::Forward,
                &cands_a,
                &cands_b,
                &mut junctions,
            )?;
        }
        if !Gene::is_read_thru(gene_b, gene_a, read_thru_dist) {
            build_oriented(
                model,
                cluster.id,
                Orientation::Reverse,
                &cands_b,
                &cands_a,
                &mut junctions,
            )?;
        }
    }
    info!(
        "built {} candidate junctions from {} clusters",
        junctions.len(),
        clusters.len()
    );
    Ok(junctions)
}

/// Evidenced exons of one partner plus their isoform neighbors, ascending.
fn candidate_exons(gene: &Gene, cluster: &DiscordantCluster) -> Vec<u32> {
    let mut cands = Vec::new();
    for iso in &gene.isoforms {
        for (pos, exon_id) in iso.exon_ids.iter().enumerate() {
            if !cluster.exon_counts.contains_key(exon_id) {
                continue;
            }
            let lo = pos.saturating_sub(NEIGHBOR_COUNT);
            let hi = (pos + NEIGHBOR_COUNT).min(iso.exon_ids.len() - 1);
            for &neighbor in &iso.exon_ids[lo..=hi] {
                if !cands.contains(&neighbor) {
                    cands.push(neighbor);
                }
            }
        }
    }
    cands.sort_unstable();
    cands
}

fn build_oriented(
    model: &GeneModel,
    cluster_id: u32,
    orientation: Orientation,
    exons_5p: &[u32],
    exons_3p: &[u32],
    out: &mut Vec<Junction>,
) -> Result<(), Error> {
    for &ex_5p in exons_5p {
        let flanks_5p = model.junction_flanks_5p(ex_5p, FLANK_LENGTH)?;
        for &ex_3p in exons_3p {
            let flanks_3p = model.junction_flanks_3p(ex_3p, FLANK_LENGTH)?;
            let mut idx = 1u32;
            for f5 in &flanks_5p {
                for f3 in &flanks_3p {
                    if f5.len() < MIN_FLANK || f3.len() < MIN_FLANK {
                        continue;
                    }
                    let key = JunctionKey {
                        cluster_id,
                        ex_5p,
                        ex_3p,
                        orientation,
                        idx,
                        breakpoint: f5.len(),
                    };
                    out.push(Junction::new(key, f5.as_str().into(), f3.as_str().into()));
                    idx += 1;
                }
            }
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Catalog files
// ---------------------------------------------------------------------------

/// Write the junction reference FASTA plus the flank side table mapping
/// `exonId_side_idx` to the flank sequence used.
pub fn write_catalog(
    junctions: &[Junction],
    fa_path: &Path,
    map_path: &Path,
) -> Result<(), Error> {
    let fa = File::create(fa_path).map_err(|e| Error::io(e, fa_path))?;
    let mut fa = BufWriter::new(fa);
    let map = File::create(map_path).map_err(|e| Error::io(e, map_path))?;
    let mut map = BufWriter::new(map);

    let mut seen: HashMap<String, ()> = HashMap::new();
    for j in junctions {
        writeln!(fa, ">{}\n{}", j.key.name(), j.sequence())
            .map_err(|e| Error::io(e, fa_path))?;

        let key_5p = format!("{}_5p_{}", j.key.ex_5p, j.key.idx);
        if seen.insert(key_5p.clone(), ()).is_none() {
            writeln!(map, ">{key_5p}\n{}", j.seq_5p).map_err(|e| Error::io(e, map_path))?;
        }
        let key_3p = format!("{}_3p_{}", j.key.ex_3p, j.key.idx);
        if seen.insert(key_3p.clone(), ()).is_none() {
            writeln!(map, ">{key_3p}\n{}", j.seq_3p).map_err(|e| Error::io(e, map_path))?;
        }
    }
    Ok(())
}

/// Partition the catalog into per-split FASTA files for parallel alignment.
/// Returns the split file paths, one per non-empty partition.
pub fn write_splits(
    junctions: &[Junction],
    dir: &Path,
    splits: usize,
) -> Result<Vec<PathBuf>, Error> {
    let splits = splits.max(1).min(junctions.len().max(1));
    let per_split = junctions
        .len()
        .div_ceil(splits)
        .clamp(1, MAX_JUNCTIONS_PER_SPLIT);
    let chunks: Vec<&[Junction]> = junctions.chunks(per_split).collect();

    let mut paths = Vec::new();
    for (i, chunk) in chunks.iter().enumerate() {
        let path = dir.join(format!("junctions_split_{i}.fa"));
        let file = File::create(&path).map_err(|e| Error::io(e, &path))?;
        let mut out = BufWriter::new(file);
        for j in *chunk {
            writeln!(out, ">{}\n{}", j.key.name(), j.sequence())
                .map_err(|e| Error::io(e, &path))?;
        }
        paths.push(path);
    }
    Ok(paths)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::{ClusterIdGen, PairAlignment};
    use crate::model::testutil::two_gene_model;
    use crate::model::{ModelBuilder, Strand};

    fn cluster_for(model: &GeneModel, exons: &[(u32, u32)]) -> DiscordantCluster {
        let mut ids = ClusterIdGen::new();
        DiscordantCluster {
            id: ids.next_id(),
            gene_a: 1,
            gene_b: 2,
            pairs: vec![PairAlignment {
                start_a: 10,
                len_a: 50,
                start_b: 10,
                len_b: 50,
                read_name: "r1".into(),
                is_unique: true,
            }],
            exon_counts: exons.iter().copied().collect(),
        }
    }

    #[test]
    fn test_neighbor_expansion() {
        let model = two_gene_model();
        let g = model.gene(1).unwrap();
        // only exon 12 evidenced; 11 and 13 are within three positions
        let c = cluster_for(&model, &[(12, 2)]);
        assert_eq!(candidate_exons(g, &c), vec![11, 12, 13]);
    }

    #[test]
    fn test_build_both_orientations() {
        let model = two_gene_model();
        let c = cluster_for(&model, &[(11, 2), (21, 2)]);
        let junctions = build_junctions(&model, &[c], 200_000).unwrap();

        assert!(!junctions.is_empty());
        let forward = junctions
            .iter()
            .filter(|j| j.key.orientation == Orientation::Forward)
            .count();
        let reverse = junctions.len() - forward;
        assert!(forward > 0 && reverse > 0);
        // forward junctions take the 5' exon from the first partner
        assert!(junctions
            .iter()
            .filter(|j| j.key.orientation == Orientation::Forward)
            .all(|j| j.key.ex_5p < 20 && j.key.ex_3p > 20));
        // every breakpoint equals the 5' flank length
        assert!(junctions
            .iter()
            .all(|j| j.key.breakpoint == j.seq_5p.len()));
        assert!(junctions.iter().all(|j| j.key.idx >= 1));
    }

    #[test]
    fn test_read_thru_suppresses_orientation() {
        // two close same-strand genes on one contig; only the upstream->
        // downstream orientation is read-through
        let mut b = ModelBuilder::new();
        b.add_gene(1, "L", "chr1", Strand::Forward, 1000, 2000);
        b.add_gene(2, "R", "chr1", Strand::Forward, 2100, 3000);
        b.add_exon(11, 1, 0, 100, 1000, 1100, &"A".repeat(100));
        b.add_exon(21, 2, 0, 100, 2100, 2200, &"C".repeat(100));
        b.add_isoform(1, "i1", &[11], -1, -1);
        b.add_isoform(2, "i2", &[21], -1, -1);
        let model = b.finish().unwrap();

        let c = cluster_for(&model, &[(11, 2), (21, 2)]);
        let junctions = build_junctions(&model, &[c], 200_000).unwrap();
        assert!(!junctions.is_empty());
        assert!(junctions
            .iter()
            .all(|j| j.key.orientation == Orientation::Reverse));
    }

    #[test]
    fn test_short_flank_skipped() {
        let mut b = ModelBuilder::new();
        b.add_gene(1, "GA", "chr1", Strand::Forward, 0, 1000);
        b.add_gene(2, "GB", "chr2", Strand::Forward, 0, 1000);
        // single 20bp exon: every flank is below the minimum
        b.add_exon(11, 1, 0, 20, 0, 20, &"A".repeat(20));
        b.add_exon(21, 2, 0, 100, 0, 100, &"C".repeat(100));
        b.add_isoform(1, "i1", &[11], -1, -1);
        b.add_isoform(2, "i2", &[21], -1, -1);
        let model = b.finish().unwrap();

        let c = cluster_for(&model, &[(11, 2), (21, 2)]);
        let junctions = build_junctions(&model, &[c], 200_000).unwrap();
        assert!(junctions.is_empty());
    }

    #[test]
    fn test_catalog_round_trips_names() {
        let model = two_gene_model();
        let c = cluster_for(&model, &[(11, 2), (21, 2)]);
        let junctions = build_junctions(&model, &[c], 200_000).unwrap();

        let dir = tempfile::tempdir().unwrap();
        let fa = dir.path().join("junctions.fa");
        let map = dir.path().join("junctions.map.fa");
        write_catalog(&junctions, &fa, &map).unwrap();

        let text = std::fs::read_to_string(&fa).unwrap();
        for line in text.lines().filter(|l| l.starts_with('>')) {
            assert!(JunctionKey::parse(&line[1..]).is_ok(), "bad name {line}");
        }
        let map_text = std::fs::read_to_string(&map).unwrap();
        assert!(map_text.contains("_5p_"));
        assert!(map_text.contains("_3p_"));
    }

    #[test]
    fn test_splits_cover_all_junctions() {
        let model = two_gene_model();
        let c = cluster_for(&model, &[(11, 2), (12, 1), (21, 2), (22, 1)]);
        let junctions = build_junctions(&model, &[c], 200_000).unwrap();

        let dir = tempfile::tempdir().unwrap();
        let paths = write_splits(&junctions, dir.path(), 3).unwrap();
        assert!(!paths.is_empty() && paths.len() <= 3);

        let mut names = 0;
        for p in &paths {
            names += std::fs::read_to_string(p)
                .unwrap()
                .lines()
                .filter(|l| l.starts_with('>'))
                .count();
        }
        assert_eq!(names, junctions.len());
    }
}

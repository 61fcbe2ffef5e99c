//! Read-only annotation graph: genes, isoforms, exons and the precomputed
//! cross-gene homology / repeat-region side tables.
//!
//! The model is loaded once at startup and never mutated afterwards. All
//! pipeline objects refer to genes and exons by integer id; the arena here
//! outlives every cluster, junction and anchor read.

pub mod loader;

use std::collections::HashMap;

use crate::error::Error;
use crate::seq::reverse_complement;

/// Flank contribution of each partner exon to a candidate junction, in bp.
pub const FLANK_LENGTH: usize = 80;

/// Mapping coordinates may sit this far outside an exon and still count as
/// exonic for the distance computation.
const EXONIC_PAD: i64 = 20;

/// Distance reported when one of the two coordinates is not exonic.
const NON_EXONIC_DISTANCE: i64 = 1_000_000;

// ---------------------------------------------------------------------------
// Strand
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strand {
    Forward,
    Reverse,
}

impl std::str::FromStr for Strand {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "+" => Ok(Self::Forward),
            "-" => Ok(Self::Reverse),
            _ => Err(format!("unknown strand '{s}'")),
        }
    }
}

impl std::fmt::Display for Strand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Forward => write!(f, "+"),
            Self::Reverse => write!(f, "-"),
        }
    }
}

// ---------------------------------------------------------------------------
// Records
// ---------------------------------------------------------------------------

/// A homologous block between two genes, from the precomputed cross-gene
/// homology search.
#[derive(Debug, Clone, Copy)]
pub struct HomologyBlock {
    pub start_a: i64,
    pub end_a: i64,
    pub start_b: i64,
    pub end_b: i64,
}

#[derive(Debug, Clone)]
pub struct Exon {
    pub id: u32,
    pub gene_id: u32,
    /// Transcript-space coordinates, `start <= end`.
    pub start: i64,
    pub end: i64,
    pub genomic_start: i64,
    pub genomic_end: i64,
    pub sequence: String,
}

impl Exon {
    pub fn len(&self) -> i64 {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }
}

#[derive(Debug, Clone)]
pub struct Isoform {
    pub id: String,
    pub gene_id: u32,
    /// Exon ids in transcript order.
    pub exon_ids: Vec<u32>,
    /// Distance from transcript start to CDS start; -1 for noncoding.
    pub cds_start_offset: i64,
    /// Distance from transcript end to CDS end; -1 for noncoding.
    pub cds_end_offset: i64,
}

impl Isoform {
    pub fn is_noncoding(&self) -> bool {
        self.cds_start_offset < 0 && self.cds_end_offset < 0
    }

    pub fn has_exon(&self, exon_id: u32) -> bool {
        self.exon_ids.contains(&exon_id)
    }
}

#[derive(Debug, Clone)]
pub struct Gene {
    pub id: u32,
    pub name: String,
    pub contig: String,
    pub strand: Strand,
    /// Transcript-space extent.
    pub tx_start: i64,
    pub tx_end: i64,
    pub genomic_start: i64,
    pub genomic_end: i64,
    pub isoforms: Vec<Isoform>,
    /// All exon ids of the gene, sorted by transcript start.
    pub exon_ids: Vec<u32>,
    pub repeat_regions: Vec<(i64, i64)>,
    /// Partner gene id -> homologous coordinate blocks.
    pub homology: HashMap<u32, Vec<HomologyBlock>>,
}

impl Gene {
    /// True iff `[start, end]` lies inside one of the gene's annotated
    /// repeat regions. All regions are consulted.
    pub fn region_contains_repeat(&self, start: i64, end: i64) -> bool {
        self.repeat_regions
            .iter()
            .any(|&(rs, re)| rs < start && re > end)
    }

    /// Genomic distance between two genes; -1 if on different contigs.
    pub fn distance_between(a: &Gene, b: &Gene) -> i64 {
        if a.contig != b.contig {
            return -1;
        }
        if a.strand == b.strand {
            (a.genomic_end - b.genomic_start)
                .abs()
                .min((a.genomic_start - b.genomic_end).abs())
        } else {
            (a.genomic_start - b.genomic_start)
                .abs()
                .min((a.genomic_end - b.genomic_end).abs())
        }
    }

    /// True iff the genomic extents of the two genes intersect.
    pub fn genes_overlap(a: &Gene, b: &Gene) -> bool {
        if a.contig != b.contig {
            return false;
        }
        a.genomic_start <= b.genomic_end && b.genomic_start <= a.genomic_end
    }

    /// A `left -> right` pair qualifies as transcriptional read-through if
    /// both genes share contig and strand, `left` is transcriptionally
    /// upstream, and they are within `dist` of each other.
    pub fn is_read_thru(left: &Gene, right: &Gene, dist: i64) -> bool {
        if left.contig != right.contig || left.strand != right.strand {
            return false;
        }
        let upstream = match left.strand {
            Strand::Forward => left.genomic_start < right.genomic_start,
            Strand::Reverse => left.genomic_start > right.genomic_start,
        };
        upstream && {
            let d = Gene::distance_between(left, right);
            d >= 0 && d < dist
        }
    }
}

// ---------------------------------------------------------------------------
// GeneModel
// ---------------------------------------------------------------------------

/// Which side of the fusion breakpoint a fragment contributes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FragSide {
    FiveP,
    ThreeP,
}

#[derive(Debug, Default)]
pub struct GeneModel {
    genes: HashMap<u32, Gene>,
    exons: HashMap<u32, Exon>,
    name_index: HashMap<String, u32>,
    /// Per contig, genes sorted by genomic start, for coordinate lookups.
    contig_index: HashMap<String, Vec<(i64, i64, u32)>>,
}

impl GeneModel {
    pub fn gene(&self, id: u32) -> Result<&Gene, Error> {
        self.genes
            .get(&id)
            .ok_or_else(|| Error::Annotation(format!("unknown gene id {id}")))
    }

    pub fn gene_by_name(&self, name: &str) -> Option<&Gene> {
        self.name_index.get(name).and_then(|id| self.genes.get(id))
    }

    pub fn exon(&self, id: u32) -> Result<&Exon, Error> {
        self.exons
            .get(&id)
            .ok_or_else(|| Error::Annotation(format!("unknown exon id {id}")))
    }

    /// Owning gene of an exon.
    pub fn gene_of_exon(&self, exon_id: u32) -> Result<&Gene, Error> {
        let exon = self.exon(exon_id)?;
        self.gene(exon.gene_id)
    }

    pub fn num_genes(&self) -> usize {
        self.genes.len()
    }

    pub fn genes(&self) -> impl Iterator<Item = &Gene> {
        self.genes.values()
    }

    /// Name of the gene covering `pos` on `contig`, if any.
    pub fn gene_name_for_coordinates(&self, contig: &str, pos: i64) -> Option<&str> {
        let entries = self.contig_index.get(contig)?;
        entries
            .iter()
            .find(|&&(start, end, _)| start <= pos && pos <= end)
            .and_then(|&(_, _, id)| self.genes.get(&id))
            .map(|g| g.name.as_str())
    }

    /// All exons of `gene` spanned by `[start, end]`, walked per isoform in
    /// transcript order. With `consider_intronic`, a span falling entirely
    /// between two consecutive exons claims the downstream exon. Occurrences
    /// are reported once per isoform, mirroring the evidence histogram's
    /// per-isoform weighting.
    pub fn find_exons_within(
        &self,
        gene: &Gene,
        start: i64,
        end: i64,
        consider_intronic: bool,
    ) -> Vec<u32> {
        let mut found = Vec::new();
        for iso in &gene.isoforms {
            let mut prev: Option<&Exon> = None;
            for &exon_id in &iso.exon_ids {
                let Some(ex) = self.exons.get(&exon_id) else {
                    continue;
                };
                let hits = (ex.start <= start && ex.end >= start)
                    || (ex.start <= end && ex.end >= end)
                    || (consider_intronic
                        && prev.is_some_and(|p| p.end <= start)
                        && ex.start >= end);
                if hits {
                    found.push(exon_id);
                }
                prev = Some(ex);
            }
        }
        found
    }

    /// Exonic distance between two coordinates of one gene, over all exons.
    /// Coordinates may sit up to 20bp outside an exon; if either coordinate
    /// is not exonic the sentinel distance 1,000,000 is returned.
    pub fn exonic_distance(&self, gene: &Gene, coord_a: i64, coord_b: i64) -> i64 {
        let (a, b) = if coord_a <= coord_b {
            (coord_a, coord_b)
        } else {
            (coord_b, coord_a)
        };

        let mut a_exonic = false;
        let mut b_exonic = false;
        let mut distance = 0;
        for &exon_id in &gene.exon_ids {
            let Some(ex) = self.exons.get(&exon_id) else {
                continue;
            };
            if a < ex.start && b > ex.end {
                distance += ex.len();
            } else if (ex.start - EXONIC_PAD) < a && (ex.end + EXONIC_PAD) > a {
                distance += (ex.end - a).abs();
                a_exonic = true;
            } else if (ex.start - EXONIC_PAD) < b && (ex.end + EXONIC_PAD) > b {
                distance += (b - ex.start).abs();
                b_exonic = true;
            }
        }
        if a_exonic && b_exonic {
            distance
        } else {
            NON_EXONIC_DISTANCE
        }
    }

    /// Cross-gene homology test: true if a precomputed homologous block
    /// between the two genes contains either side of the pair alignment.
    pub fn homologous_hit(
        &self,
        gene_a: &Gene,
        gene_b: &Gene,
        start_a: i64,
        end_a: i64,
        start_b: i64,
        end_b: i64,
    ) -> bool {
        let Some(blocks) = gene_a.homology.get(&gene_b.id) else {
            return false;
        };
        blocks.iter().any(|bl| {
            (bl.start_a < start_a && bl.end_a > end_a)
                || (bl.start_b < start_b && bl.end_b > end_b)
        })
    }

    // ── Junction flank construction ─────────────────────────────────────

    /// Sequences an exon can contribute as the 5' side of a junction: the
    /// last `min_len` bases of the transcript ending at the exon's 3'
    /// boundary. Short exons are extended by walking each isoform that
    /// contains the exon; alternatives are deduplicated by content.
    pub fn junction_flanks_5p(&self, exon_id: u32, min_len: usize) -> Result<Vec<String>, Error> {
        let exon = self.exon(exon_id)?;
        if exon.sequence.len() >= min_len {
            let seq = &exon.sequence[exon.sequence.len() - min_len..];
            return Ok(vec![seq.to_string()]);
        }

        let gene = self.gene(exon.gene_id)?;
        let mut unique = Vec::new();
        for iso in &gene.isoforms {
            if !iso.has_exon(exon_id) {
                continue;
            }
            let mut seq = String::new();
            for &eid in &iso.exon_ids {
                seq.push_str(&self.exon(eid)?.sequence);
                if eid == exon_id {
                    break;
                }
            }
            let start = seq.len().saturating_sub(min_len);
            let flank = seq[start..].to_string();
            if !unique.contains(&flank) {
                unique.push(flank);
            }
        }
        Ok(unique)
    }

    /// Symmetric 3' variant: the first `min_len` bases of the transcript
    /// starting at the exon's 5' boundary.
    pub fn junction_flanks_3p(&self, exon_id: u32, min_len: usize) -> Result<Vec<String>, Error> {
        let exon = self.exon(exon_id)?;
        if exon.sequence.len() >= min_len {
            return Ok(vec![exon.sequence[..min_len].to_string()]);
        }

        let gene = self.gene(exon.gene_id)?;
        let mut unique = Vec::new();
        for iso in &gene.isoforms {
            if !iso.has_exon(exon_id) {
                continue;
            }
            let mut seq = String::new();
            let mut found = false;
            for &eid in &iso.exon_ids {
                if eid == exon_id {
                    found = true;
                }
                if found {
                    seq.push_str(&self.exon(eid)?.sequence);
                    if seq.len() >= min_len {
                        break;
                    }
                }
            }
            if !found {
                continue;
            }
            seq.truncate(min_len.min(seq.len()));
            if !unique.contains(&seq) {
                unique.push(seq);
            }
        }
        Ok(unique)
    }

    // ── Transcript assembly ─────────────────────────────────────────────

    /// Full transcribed sequence of a gene over the union of its exons,
    /// reverse-complemented for minus-strand genes.
    pub fn transcribed_sequence(&self, gene: &Gene) -> Result<String, Error> {
        let mut positions = std::collections::BTreeMap::new();
        for &exon_id in &gene.exon_ids {
            let ex = self.exon(exon_id)?;
            for (offset, base) in ex.sequence.bytes().enumerate() {
                positions.insert(ex.start + offset as i64, base);
            }
        }
        let seq: String = positions.values().map(|&b| b as char).collect();
        Ok(match gene.strand {
            Strand::Forward => seq,
            Strand::Reverse => reverse_complement(&seq),
        })
    }

    /// Spliced transcript of one isoform, in transcription order.
    pub fn isoform_transcript(&self, iso: &Isoform) -> Result<String, Error> {
        let gene = self.gene(iso.gene_id)?;
        let mut seq = String::new();
        for &eid in &iso.exon_ids {
            seq.push_str(&self.exon(eid)?.sequence);
        }
        Ok(match gene.strand {
            Strand::Forward => seq,
            Strand::Reverse => reverse_complement(&seq),
        })
    }

    pub fn isoform_length(&self, iso: &Isoform) -> Result<i64, Error> {
        let mut len = 0;
        for &eid in &iso.exon_ids {
            len += self.exon(eid)?.len();
        }
        Ok(len)
    }

    /// Partial gene transcript ending (5') or beginning (3') with the target
    /// exon, in transcription order. The target exon is included on both
    /// sides of the split.
    pub fn partial_transcript(
        &self,
        gene: &Gene,
        target_exon: u32,
        side: FragSide,
    ) -> Result<String, Error> {
        let mut upstream = std::collections::BTreeMap::new();
        let mut downstream = std::collections::BTreeMap::new();
        let mut found = false;
        for &exon_id in &gene.exon_ids {
            let ex = self.exon(exon_id)?;
            for (offset, base) in ex.sequence.bytes().enumerate() {
                let pos = ex.start + offset as i64;
                if !found {
                    upstream.insert(pos, base);
                } else {
                    downstream.insert(pos, base);
                }
                if exon_id == target_exon {
                    upstream.insert(pos, base);
                    downstream.insert(pos, base);
                }
            }
            if exon_id == target_exon {
                found = true;
            }
        }

        let use_upstream = matches!(
            (side, gene.strand),
            (FragSide::FiveP, Strand::Forward) | (FragSide::ThreeP, Strand::Reverse)
        );
        let map = if use_upstream { upstream } else { downstream };
        let seq: String = map.values().map(|&b| b as char).collect();
        Ok(match gene.strand {
            Strand::Forward => seq,
            Strand::Reverse => reverse_complement(&seq),
        })
    }

    /// Synthetic reference of all intra-gene exon pairings, forward and
    /// back-spliced, used to flag circular-RNA / scrambled-exon artifacts.
    /// Each exon contributes at most 90bp per side.
    pub fn scrambled_exon_sequence(&self, gene: &Gene) -> Result<String, Error> {
        const SIDE: usize = 90;
        let mut normal = String::new();
        let mut scrambled = String::new();
        let mut seen = std::collections::HashSet::new();

        for iso in &gene.isoforms {
            for (j, &ex1_id) in iso.exon_ids.iter().enumerate() {
                let ex1 = self.exon(ex1_id)?;
                if seen.insert((ex1_id, ex1_id)) {
                    let seq = &ex1.sequence;
                    if seq.len() > SIDE {
                        normal.push_str(&seq[seq.len() - SIDE..]);
                        normal.push_str(&seq[..SIDE]);
                    } else {
                        normal.push_str(seq);
                        normal.push_str(seq);
                    }
                }
                for &ex2_id in iso.exon_ids.iter().skip(j + 1) {
                    if !seen.insert((ex1_id, ex2_id)) {
                        continue;
                    }
                    let ex2 = self.exon(ex2_id)?;
                    let (s1, s2) = match gene.strand {
                        Strand::Forward => (&ex1.sequence, &ex2.sequence),
                        Strand::Reverse => (&ex2.sequence, &ex1.sequence),
                    };
                    let head = |s: &str| {
                        if s.len() > SIDE {
                            s[..SIDE].to_string()
                        } else {
                            s.to_string()
                        }
                    };
                    let tail = |s: &str| {
                        if s.len() > SIDE {
                            s[s.len() - SIDE..].to_string()
                        } else {
                            s.to_string()
                        }
                    };
                    // canonical splice: end of s1 followed by start of s2
                    normal.push_str(&tail(s1));
                    normal.push_str(&head(s2));
                    // back-splice: end of s2 followed by start of s1
                    scrambled.push_str(&tail(s2));
                    scrambled.push_str(&head(s1));
                }
            }
        }
        normal.push_str(&scrambled);
        Ok(normal)
    }
}

// ---------------------------------------------------------------------------
// Builder
// ---------------------------------------------------------------------------

/// Assembles a `GeneModel` from individual records; used by the flat-file
/// loader and by test fixtures.
#[derive(Debug, Default)]
pub struct ModelBuilder {
    genes: HashMap<u32, Gene>,
    exons: HashMap<u32, Exon>,
}

impl ModelBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_gene(
        &mut self,
        id: u32,
        name: &str,
        contig: &str,
        strand: Strand,
        genomic_start: i64,
        genomic_end: i64,
    ) -> &mut Self {
        self.genes.insert(
            id,
            Gene {
                id,
                name: name.to_string(),
                contig: contig.to_string(),
                strand,
                tx_start: i64::MAX,
                tx_end: i64::MIN,
                genomic_start,
                genomic_end,
                isoforms: Vec::new(),
                exon_ids: Vec::new(),
                repeat_regions: Vec::new(),
                homology: HashMap::new(),
            },
        );
        self
    }

    pub fn add_exon(
        &mut self,
        id: u32,
        gene_id: u32,
        start: i64,
        end: i64,
        genomic_start: i64,
        genomic_end: i64,
        sequence: &str,
    ) -> &mut Self {
        self.exons.insert(
            id,
            Exon {
                id,
                gene_id,
                start,
                end,
                genomic_start,
                genomic_end,
                sequence: sequence.to_string(),
            },
        );
        self
    }

    pub fn add_isoform(
        &mut self,
        gene_id: u32,
        isoform_id: &str,
        exon_ids: &[u32],
        cds_start_offset: i64,
        cds_end_offset: i64,
    ) -> &mut Self {
        if let Some(gene) = self.genes.get_mut(&gene_id) {
            gene.isoforms.push(Isoform {
                id: isoform_id.to_string(),
                gene_id,
                exon_ids: exon_ids.to_vec(),
                cds_start_offset,
                cds_end_offset,
            });
        }
        self
    }

    pub fn add_repeat_region(&mut self, gene_id: u32, start: i64, end: i64) -> &mut Self {
        if let Some(gene) = self.genes.get_mut(&gene_id) {
            gene.repeat_regions.push((start, end));
        }
        self
    }

    pub fn add_homology(
        &mut self,
        gene_a: u32,
        gene_b: u32,
        block: HomologyBlock,
    ) -> &mut Self {
        if let Some(gene) = self.genes.get_mut(&gene_a) {
            gene.homology.entry(gene_b).or_default().push(block);
        }
        // symmetric entry with sides swapped
        if let Some(gene) = self.genes.get_mut(&gene_b) {
            gene.homology.entry(gene_a).or_default().push(HomologyBlock {
                start_a: block.start_b,
                end_a: block.end_b,
                start_b: block.start_a,
                end_b: block.end_a,
            });
        }
        self
    }

    /// Finalize: attach exon lists to genes sorted by transcript start,
    /// derive transcript extents and build the lookup indexes.
    pub fn finish(mut self) -> Result<GeneModel, Error> {
        let mut per_gene: HashMap<u32, Vec<u32>> = HashMap::new();
        for exon in self.exons.values() {
            if exon.start > exon.end {
                return Err(Error::Annotation(format!(
                    "exon {} has start > end",
                    exon.id
                )));
            }
            per_gene.entry(exon.gene_id).or_default().push(exon.id);
        }

        for (gene_id, mut exon_ids) in per_gene {
            exon_ids.sort_by_key(|id| (self.exons[id].start, self.exons[id].end, *id));
            let gene = self.genes.get_mut(&gene_id).ok_or_else(|| {
                Error::Annotation(format!("exon references unknown gene {gene_id}"))
            })?;
            gene.tx_start = self.exons[&exon_ids[0]].start;
            gene.tx_end = exon_ids
                .iter()
                .map(|id| self.exons[id].end)
                .max()
                .unwrap_or(gene.tx_start);
            gene.exon_ids = exon_ids;
        }

        let mut name_index = HashMap::new();
        let mut contig_index: HashMap<String, Vec<(i64, i64, u32)>> = HashMap::new();
        for gene in self.genes.values() {
            name_index.insert(gene.name.clone(), gene.id);
            contig_index.entry(gene.contig.clone()).or_default().push((
                gene.genomic_start,
                gene.genomic_end,
                gene.id,
            ));
        }
        for entries in contig_index.values_mut() {
            entries.sort();
        }

        Ok(GeneModel {
            genes: self.genes,
            exons: self.exons,
            name_index,
            contig_index,
        })
    }
}

#[cfg(test)]
pub mod testutil {
    use super::*;

    /// Two-gene fixture on different contigs: gene 1 (GENE_A, chr1, +) with
    /// exons 11/12/13 and gene 2 (GENE_B, chr2, +) with exons 21/22.
    pub fn two_gene_model() -> GeneModel {
        let e = |n: usize, c: char| c.to_string().repeat(n);
        let mut b = ModelBuilder::new();
        b.add_gene(1, "GENE_A", "chr1", Strand::Forward, 10_000, 20_000);
        b.add_gene(2, "GENE_B", "chr2", Strand::Forward, 500_000, 510_000);
        b.add_exon(11, 1, 0, 100, 10_000, 10_100, &e(100, 'A'));
        b.add_exon(12, 1, 200, 300, 10_200, 10_300, &e(100, 'C'));
        b.add_exon(13, 1, 400, 500, 10_400, 10_500, &e(100, 'G'));
        b.add_exon(21, 2, 0, 100, 500_000, 500_100, &e(100, 'T'));
        b.add_exon(22, 2, 200, 300, 500_200, 500_300, &e(100, 'A'));
        b.add_isoform(1, "iso_a1", &[11, 12, 13], 10, 10);
        b.add_isoform(2, "iso_b1", &[21, 22], 10, 10);
        b.finish().unwrap()
    }
}

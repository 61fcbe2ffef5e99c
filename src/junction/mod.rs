//! Candidate exon-exon junctions.
//!
//! A junction pairs a 5' flank from one partner gene with a 3' flank from
//! the other. Its identity is the `JunctionKey`, which round-trips through
//! the FASTA record names used by the external aligners, so every split
//! alignment can be traced back to its junction without side tables.

pub mod builder;

use std::sync::Arc;

use crate::anchor::{AnchorRead, ANCHOR_LENGTH};
use crate::error::Error;

/// Evidence survives the filters only by never being set; once marked
/// there is no way back.
#[derive(Debug, Clone, Default)]
pub struct SpuriousFlag(bool);

impl SpuriousFlag {
    pub fn mark(&mut self) {
        self.0 = true;
    }

    pub fn is_set(&self) -> bool {
        self.0
    }
}

/// Which partner supplies the 5' flank.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Orientation {
    /// First partner gene is 5', second is 3'.
    Forward,
    /// Second partner gene is 5', first is 3'.
    Reverse,
}

impl std::fmt::Display for Orientation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Forward => write!(f, "F"),
            Self::Reverse => write!(f, "R"),
        }
    }
}

impl std::str::FromStr for Orientation {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "F" => Ok(Self::Forward),
            "R" => Ok(Self::Reverse),
            _ => Err(format!("unknown orientation '{s}'")),
        }
    }
}

/// Identity of a junction, encoded into its FASTA record name as
/// `clusterId_ex5p_ex3p_orientation_idx_breakpoint`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct JunctionKey {
    pub cluster_id: u32,
    pub ex_5p: u32,
    pub ex_3p: u32,
    pub orientation: Orientation,
    /// Distinguishes alternative flank combinations of the same exon pair,
    /// starting at 1.
    pub idx: u32,
    /// Length of the 5' flank; split reads aligning across this offset span
    /// the junction.
    pub breakpoint: usize,
}

impl JunctionKey {
    pub fn name(&self) -> String {
        format!(
            "{}_{}_{}_{}_{}_{}",
            self.cluster_id, self.ex_5p, self.ex_3p, self.orientation, self.idx, self.breakpoint
        )
    }

    pub fn parse(name: &str) -> Result<JunctionKey, Error> {
        let sp: Vec<&str> = name.split('_').collect();
        if sp.len() != 6 {
            return Err(Error::Record(format!("bad junction name '{name}'")));
        }
        let num = |i: usize| -> Result<u32, Error> {
            sp[i]
                .parse()
                .map_err(|_| Error::Record(format!("bad junction name '{name}'")))
        };
        Ok(JunctionKey {
            cluster_id: num(0)?,
            ex_5p: num(1)?,
            ex_3p: num(2)?,
            orientation: sp[3]
                .parse()
                .map_err(|e: String| Error::Record(format!("{e} in '{name}'")))?,
            idx: num(4)?,
            breakpoint: num(5)? as usize,
        })
    }
}

#[derive(Debug, Clone)]
pub struct Junction {
    pub key: JunctionKey,
    pub seq_5p: Arc<str>,
    pub seq_3p: Arc<str>,
    pub spurious: SpuriousFlag,
    pub anchor_reads: Vec<AnchorRead>,
}

impl Junction {
    pub fn new(key: JunctionKey, seq_5p: Arc<str>, seq_3p: Arc<str>) -> Junction {
        debug_assert_eq!(key.breakpoint, seq_5p.len());
        Junction {
            key,
            seq_5p,
            seq_3p,
            spurious: SpuriousFlag::default(),
            anchor_reads: Vec::new(),
        }
    }

    /// Full junction reference sequence, 5' flank then 3' flank.
    pub fn sequence(&self) -> String {
        format!("{}{}", self.seq_5p, self.seq_3p)
    }

    /// Anchor reads that still count as evidence: not spurious and spanning
    /// the breakpoint by at least `min_anchor_len` on the shorter side.
    pub fn ar_count(&self, high_conf_only: bool, min_anchor_len: i64) -> usize {
        self.anchor_reads
            .iter()
            .filter(|ar| !ar.spurious.is_set())
            .filter(|ar| ar.min_overhang() >= min_anchor_len)
            .filter(|ar| !high_conf_only || ar.high_confidence)
            .count()
    }

    /// True if every surviving anchor read carries a mismatch within the
    /// anchor window around the breakpoint.
    pub fn all_anchor_reads_mismatched(&self) -> bool {
        let mut any = false;
        for ar in self.anchor_reads.iter().filter(|ar| !ar.spurious.is_set()) {
            if !ar.anchor_mismatch {
                return false;
            }
            any = true;
        }
        any
    }

    /// Number of distinct 5'-side overhang lengths among surviving anchor
    /// reads; a proxy for independent fragment starts.
    pub fn unique_starts_5p(&self) -> usize {
        let mut seen: Vec<i64> = self
            .anchor_reads
            .iter()
            .filter(|ar| !ar.spurious.is_set() && ar.min_overhang() >= ANCHOR_LENGTH)
            .map(|ar| ar.overhang_5p)
            .collect();
        seen.sort_unstable();
        seen.dedup();
        seen.len()
    }

    pub fn unique_starts_3p(&self) -> usize {
        let mut seen: Vec<i64> = self
            .anchor_reads
            .iter()
            .filter(|ar| !ar.spurious.is_set() && ar.min_overhang() >= ANCHOR_LENGTH)
            .map(|ar| ar.overhang_3p)
            .collect();
        seen.sort_unstable();
        seen.dedup();
        seen.len()
    }
}

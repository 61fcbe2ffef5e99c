//! PSL alignment records, the tab-separated output of blat.

use crate::error::Error;

/// One PSL row, 21 tab-separated columns. Only the fields the filters
/// consult are kept.
#[derive(Debug, Clone)]
pub struct PslRecord {
    pub matches: i64,
    pub mis_matches: i64,
    pub strand: char,
    pub q_name: String,
    pub q_size: i64,
    pub q_start: i64,
    pub q_end: i64,
    pub t_name: String,
    pub t_size: i64,
    pub t_start: i64,
    pub t_end: i64,
    pub block_sizes: Vec<i64>,
    pub q_starts: Vec<i64>,
    pub t_starts: Vec<i64>,
}

fn parse_list(field: &str, line: &str) -> Result<Vec<i64>, Error> {
    field
        .split(',')
        .filter(|t| !t.is_empty())
        .map(|t| {
            t.parse()
                .map_err(|_| Error::Record(format!("bad block list '{field}' in '{line}'")))
        })
        .collect()
}

impl PslRecord {
    pub fn parse(line: &str) -> Result<PslRecord, Error> {
        let sp: Vec<&str> = line.split('\t').collect();
        if sp.len() < 21 {
            return Err(Error::Record(format!(
                "psl record has {} columns, expected 21",
                sp.len()
            )));
        }
        let num = |i: usize| -> Result<i64, Error> {
            sp[i]
                .parse()
                .map_err(|_| Error::Record(format!("bad number '{}' in psl record", sp[i])))
        };
        let rec = PslRecord {
            matches: num(0)?,
            mis_matches: num(1)?,
            strand: sp[8].chars().next().unwrap_or('+'),
            q_name: sp[9].to_string(),
            q_size: num(10)?,
            q_start: num(11)?,
            q_end: num(12)?,
            t_name: sp[13].to_string(),
            t_size: num(14)?,
            t_start: num(15)?,
            t_end: num(16)?,
            block_sizes: parse_list(sp[18], line)?,
            q_starts: parse_list(sp[19], line)?,
            t_starts: parse_list(sp[20], line)?,
        };
        if rec.block_sizes.len() != rec.q_starts.len()
            || rec.block_sizes.len() != rec.t_starts.len()
        {
            return Err(Error::Record(format!(
                "psl record block lists disagree for query '{}'",
                rec.q_name
            )));
        }
        Ok(rec)
    }

    /// Query-space blocks `(q_start, size)` remapped to plus-strand
    /// coordinates and sorted; for minus-strand rows blat reports query
    /// starts in reverse-complement space.
    pub fn plus_strand_blocks(&self) -> Vec<(i64, i64)> {
        let mut blocks: Vec<(i64, i64)> = self
            .q_starts
            .iter()
            .zip(&self.block_sizes)
            .map(|(&qs, &size)| {
                if self.strand == '-' {
                    (self.q_size - qs - size, size)
                } else {
                    (qs, size)
                }
            })
            .collect();
        blocks.sort_unstable();
        blocks
    }

    /// Index of the largest block within `plus_strand_blocks()`.
    pub fn max_block(&self) -> usize {
        let blocks = self.plus_strand_blocks();
        blocks
            .iter()
            .enumerate()
            .max_by_key(|(_, &(_, size))| size)
            .map(|(i, _)| i)
            .unwrap_or(0)
    }

    /// Block count after merging neighbors separated by at most `max_gap`
    /// in query space.
    pub fn merged_block_count(&self, max_gap: i64) -> usize {
        let blocks = self.plus_strand_blocks();
        if blocks.is_empty() {
            return 0;
        }
        let mut count = 1;
        for w in blocks.windows(2) {
            let gap = w[1].0 - (w[0].0 + w[0].1);
            if gap > max_gap {
                count += 1;
            }
        }
        count
    }

    /// Target-space midpoint of the largest block.
    pub fn max_block_target_midpoint(&self) -> i64 {
        let idx = self
            .block_sizes
            .iter()
            .enumerate()
            .max_by_key(|(_, &size)| size)
            .map(|(i, _)| i)
            .unwrap_or(0);
        self.t_starts[idx] + self.block_sizes[idx] / 2
    }
}

/// Read a PSL file, skipping the optional 5-line header.
pub fn read_psl(path: &std::path::Path) -> Result<Vec<PslRecord>, Error> {
    let text = std::fs::read_to_string(path).map_err(|e| Error::io(e, path))?;
    let mut records = Vec::new();
    for line in text.lines() {
        if line.is_empty()
            || line.starts_with("psLayout")
            || line.starts_with("match")
            || line.starts_with(' ')
            || line.starts_with('-')
        {
            continue;
        }
        records.push(PslRecord::parse(line)?);
    }
    Ok(records)
}

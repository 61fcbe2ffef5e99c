/// Run statistics tracking and reporting
use log::info;

/// Tracks counts across the stages of a fusion-calling run
#[derive(Default, Debug)]
pub struct RunStats {
    /// Discordant read pairs read from the input table
    pub discordant_pairs: u64,
    /// Pairs rejected during aggregation (denylist, chrM, overlap, repeats)
    pub pairs_rejected: u64,
    /// Gene-pair clusters admitted past the span threshold
    pub clusters_admitted: u64,
    /// Putative junctions written to the catalog
    pub junctions_built: u64,
    /// Anchor reads loaded from the junction alignments
    pub anchor_reads: u64,
    /// Anchor reads marked spurious by the filter passes
    pub anchor_reads_spurious: u64,
    /// Fusions surviving compilation
    pub fusions_reported: u64,
}

impl RunStats {
    /// Create new statistics tracker
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the outcome of discordant-pair aggregation
    pub fn record_aggregation(&mut self, pairs: u64, rejected: u64, clusters: u64) {
        self.discordant_pairs = pairs;
        self.pairs_rejected = rejected;
        self.clusters_admitted = clusters;
    }

    /// Record anchor-read totals after the filter passes
    pub fn record_anchor_reads(&mut self, total: u64, spurious: u64) {
        self.anchor_reads = total;
        self.anchor_reads_spurious = spurious;
    }

    /// Print summary statistics to log
    pub fn print_summary(&self) {
        info!("=== Run Summary ===");
        info!("Discordant read pairs: {}", self.discordant_pairs);
        if self.discordant_pairs > 0 {
            info!(
                "Pairs rejected: {} ({:.2}%)",
                self.pairs_rejected,
                100.0 * self.pairs_rejected as f64 / self.discordant_pairs as f64
            );
        }
        info!("Clusters admitted: {}", self.clusters_admitted);
        info!("Junctions built: {}", self.junctions_built);
        info!("Anchor reads: {}", self.anchor_reads);
        if self.anchor_reads > 0 {
            info!(
                "Anchor reads filtered: {} ({:.2}%)",
                self.anchor_reads_spurious,
                100.0 * self.anchor_reads_spurious as f64 / self.anchor_reads as f64
            );
        }
        info!("Fusions reported: {}", self.fusions_reported);
    }

    /// Anchor reads surviving the filter passes
    pub fn anchor_reads_kept(&self) -> u64 {
        self.anchor_reads.saturating_sub(self.anchor_reads_spurious)
    }

    /// Percentage of discordant pairs rejected during aggregation
    pub fn rejected_percent(&self) -> f64 {
        if self.discordant_pairs == 0 {
            0.0
        } else {
            100.0 * self.pairs_rejected as f64 / self.discordant_pairs as f64
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stats_default() {
        let stats = RunStats::default();
        assert_eq!(stats.discordant_pairs, 0);
        assert_eq!(stats.clusters_admitted, 0);
        assert_eq!(stats.anchor_reads, 0);
        assert_eq!(stats.fusions_reported, 0);
    }

    #[test]
    fn test_record_aggregation() {
        let mut stats = RunStats::new();
        stats.record_aggregation(100, 25, 4);
        assert_eq!(stats.discordant_pairs, 100);
        assert_eq!(stats.pairs_rejected, 25);
        assert_eq!(stats.clusters_admitted, 4);
        assert!((stats.rejected_percent() - 25.0).abs() < 0.01);
    }

    #[test]
    fn test_record_anchor_reads() {
        let mut stats = RunStats::new();
        stats.record_anchor_reads(40, 15);
        assert_eq!(stats.anchor_reads_kept(), 25);
    }

    #[test]
    fn test_empty_stats_percentages() {
        let stats = RunStats::new();
        assert_eq!(stats.rejected_percent(), 0.0);
        assert_eq!(stats.anchor_reads_kept(), 0);
    }
}

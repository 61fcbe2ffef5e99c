//! Small nucleotide sequence helpers shared across the pipeline stages.

/// Complement of a single base; ambiguity codes map to `N`.
pub fn complement(base: u8) -> u8 {
    match base.to_ascii_uppercase() {
        b'A' => b'T',
        b'C' => b'G',
        b'G' => b'C',
        b'T' => b'A',
        _ => b'N',
    }
}

/// Reverse complement of a sequence.
pub fn reverse_complement(seq: &str) -> String {
    seq.bytes()
        .rev()
        .map(|b| complement(b) as char)
        .collect()
}

/// Number of mismatching positions over the first `len` bases of both
/// sequences. Positions past the end of the shorter sequence do not count.
pub fn mismatches_in_prefix(a: &str, b: &str, len: usize) -> usize {
    a.bytes()
        .zip(b.bytes())
        .take(len)
        .filter(|(x, y)| !x.eq_ignore_ascii_case(y))
        .count()
}

/// Shannon entropy (log2) of the dinucleotide composition of `seq`.
///
/// Every overlapping dinucleotide is counted, so a window over {A,C,G,T}
/// has at most 16 distinct symbols and the entropy lies in [0, 4] bits.
/// A homopolymer run contains a single dinucleotide and scores 0.
/// Case-insensitive.
pub fn dinucleotide_entropy(seq: &str) -> f64 {
    let bases: Vec<u8> = seq.bytes().map(|b| b.to_ascii_uppercase()).collect();
    if bases.len() < 2 {
        return 0.0;
    }

    let mut counts = std::collections::HashMap::new();
    for pair in bases.windows(2) {
        *counts.entry([pair[0], pair[1]]).or_insert(0u32) += 1;
    }

    let total = (bases.len() - 1) as f64;
    let mut entropy = 0.0;
    for &n in counts.values() {
        let p = n as f64 / total;
        entropy -= p * p.log2();
    }
    entropy
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reverse_complement() {
        assert_eq!(reverse_complement("ACGT"), "ACGT");
        assert_eq!(reverse_complement("AACC"), "GGTT");
        assert_eq!(reverse_complement("ATGN"), "NCAT");
        assert_eq!(reverse_complement(""), "");
    }

    #[test]
    fn test_mismatches_in_prefix() {
        assert_eq!(mismatches_in_prefix("ACGT", "ACGT", 4), 0);
        assert_eq!(mismatches_in_prefix("ACGT", "ACGA", 4), 1);
        assert_eq!(mismatches_in_prefix("ACGT", "ACGA", 3), 0);
        // lower case matches upper case
        assert_eq!(mismatches_in_prefix("acgt", "ACGT", 4), 0);
        // shorter sequence limits the comparison window
        assert_eq!(mismatches_in_prefix("AC", "TTTT", 4), 2);
    }

    #[test]
    fn test_entropy_homopolymer_is_zero() {
        assert_eq!(dinucleotide_entropy("AAAAAAAAAAAAAAAAAAAA"), 0.0);
        assert_eq!(dinucleotide_entropy("tttttttttt"), 0.0);
    }

    #[test]
    fn test_entropy_bounds() {
        let windows = [
            "ACGTACGTACGTACGTACGT",
            "AATTCCGGAATTCCGGAATT",
            "ACACACACACACACACACAC",
            "AGGCTTACCGTGAATCGCTA",
        ];
        for w in windows {
            let h = dinucleotide_entropy(w);
            assert!(h >= 0.0 && h <= 4.0, "entropy {} out of range for {}", h, w);
        }
    }

    #[test]
    fn test_entropy_case_invariant() {
        let upper = dinucleotide_entropy("ACGTACGTACGTACGTACGT");
        let lower = dinucleotide_entropy("acgtacgtacgtacgtacgt");
        assert!((upper - lower).abs() < 1e-12);
    }

    #[test]
    fn test_entropy_two_symbol_alternation() {
        // ACAC... has dinucleotides AC and CA in near-equal proportion
        let h = dinucleotide_entropy("ACACACACACACACACACAC");
        assert!((h - 1.0).abs() < 0.05);
    }

    #[test]
    fn test_entropy_short_input() {
        assert_eq!(dinucleotide_entropy(""), 0.0);
        assert_eq!(dinucleotide_entropy("A"), 0.0);
    }
}

use std::path::PathBuf;

use clap::Parser;

// ---------------------------------------------------------------------------
// Minimum-span model
// ---------------------------------------------------------------------------

/// Parameters of the library-size-dependent minimum-span threshold,
/// configured as a comma-separated triple `R,X,Y`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MinSpan {
    pub r: f64,
    pub x: f64,
    pub y: f64,
}

impl MinSpan {
    /// Minimum number of discordant pairs required to admit a cluster:
    /// `ceil(R + X * max(0, ln(libsize / Y)))`, or `R` when `Y == 0`.
    pub fn threshold(&self, libsize: u64) -> u32 {
        if self.y == 0.0 {
            return self.r.ceil() as u32;
        }
        let scaled = (libsize as f64 / self.y).ln().max(0.0);
        (self.r + self.x * scaled).ceil() as u32
    }
}

impl std::str::FromStr for MinSpan {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.split(',').collect();
        if parts.len() != 3 {
            return Err(format!("minSpanFunct must be 'R,X,Y', got '{s}'"));
        }
        let parse = |p: &str| {
            p.trim()
                .parse::<f64>()
                .map_err(|_| format!("bad minSpanFunct component '{p}'"))
        };
        Ok(MinSpan {
            r: parse(parts[0])?,
            x: parse(parts[1])?,
            y: parse(parts[2])?,
        })
    }
}

impl std::fmt::Display for MinSpan {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{},{},{}", self.r, self.x, self.y)
    }
}

// ---------------------------------------------------------------------------
// Parameters struct
// ---------------------------------------------------------------------------

/// fusor command-line parameters.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "fusor",
    about = "Gene fusion detection from paired-end RNA-seq",
    version
)]
pub struct Parameters {
    // ── Sample ──────────────────────────────────────────────────────────
    /// Sample name; prefixes all output files
    #[arg(long = "sampleName")]
    pub sample_name: String,

    /// Output directory; per-sample work area is <outputDir>/<sampleName>
    #[arg(long = "outputDir", default_value = "./")]
    pub output_dir: PathBuf,

    /// First-end FASTQ file(s), comma separated (.gz accepted)
    #[arg(long = "fastq1", value_delimiter = ',', num_args = 1..)]
    pub fastq_first_end: Vec<PathBuf>,

    /// Second-end FASTQ file(s), comma separated, same order as --fastq1
    #[arg(long = "fastq2", value_delimiter = ',', num_args = 1..)]
    pub fastq_second_end: Vec<PathBuf>,

    /// Discordant read-pair evidence file produced by the upstream aligner
    #[arg(long = "discordantReads")]
    pub discordant_reads: Option<PathBuf>,

    // ── Reference ───────────────────────────────────────────────────────
    /// Directory holding the annotation flat files (genes, isoforms,
    /// exons, homology blocks, repeat regions)
    #[arg(long = "referenceDir")]
    pub reference_dir: PathBuf,

    /// Bowtie2 genome index prefix
    #[arg(long = "genomeIndex")]
    pub genome_index: Option<PathBuf>,

    /// Bowtie2 all-isoform transcriptome index prefix
    #[arg(long = "isoformIndex")]
    pub isoform_index: Option<PathBuf>,

    /// 2bit genome file for homology search
    #[arg(long = "genome2bit")]
    pub genome_2bit: Option<PathBuf>,

    /// Directory of per-contig 2bit files for the contig-parallel passes
    #[arg(long = "contig2bitDir")]
    pub contig_2bit_dir: Option<PathBuf>,

    /// Reference-junction 2bit file for the exome passes
    #[arg(long = "junction2bit")]
    pub junction_2bit: Option<PathBuf>,

    // ── External tools ──────────────────────────────────────────────────
    /// Path to the bowtie2 executable
    #[arg(long = "bowtie2Path", default_value = "bowtie2")]
    pub bowtie2_path: PathBuf,

    /// Path to the bowtie2-build executable
    #[arg(long = "bowtie2BuildPath", default_value = "bowtie2-build")]
    pub bowtie2_build_path: PathBuf,

    /// Path to the blat executable
    #[arg(long = "blatPath", default_value = "blat")]
    pub blat_path: PathBuf,

    /// Path to the samtools executable
    #[arg(long = "samtoolsPath", default_value = "samtools")]
    pub samtools_path: PathBuf,

    // ── Compute ─────────────────────────────────────────────────────────
    /// Maximum cores for the run
    #[arg(long = "cores", default_value_t = 4)]
    pub max_cores: usize,

    /// Maximum memory for the run, in gigabytes
    #[arg(long = "mem", default_value_t = 16)]
    pub max_mem_gb: usize,

    // ── Run parameters ──────────────────────────────────────────────────
    /// Minimum-span function 'R,X,Y'; threshold is
    /// ceil(R + X*max(0, ln(libsize/Y))), or R when Y is 0
    #[arg(long = "minSpanFunct", default_value = "2,2,80000000")]
    pub min_span_funct: MinSpan,

    /// Genomic distance under which an adjacent same-strand gene pair is
    /// treated as transcriptional read-through
    #[arg(long = "readThruDist", default_value_t = 200_000)]
    pub read_thru_dist: i64,

    /// Maximum tolerated error rate for junction alignments
    #[arg(long = "maxJunctAlignErrorRate", default_value_t = 0.03)]
    pub max_junct_align_error_rate: f64,

    /// Total read count for the sample; derived by counting the FASTQ
    /// inputs when absent
    #[arg(long = "readCount")]
    pub read_count: Option<u64>,

    /// Gene name substrings excluded from clustering, comma separated
    #[arg(long = "geneDenylist", value_delimiter = ',', default_values_t = vec!["abParts".to_string()])]
    pub gene_denylist: Vec<String>,

    // ── Behaviour flags ─────────────────────────────────────────────────
    /// Keep per-split intermediate files instead of deleting them
    #[arg(long = "keepTemporary", default_value_t = false)]
    pub keep_temporary: bool,

    /// Continue past FASTQ quality-encoding anomalies instead of aborting
    #[arg(long = "ignoreFastqWarnings", default_value_t = false)]
    pub ignore_fastq_warnings: bool,
}

impl Parameters {
    /// Per-sample working directory.
    pub fn working_dir(&self) -> PathBuf {
        self.output_dir.join(&self.sample_name)
    }

    pub fn status_dir(&self) -> PathBuf {
        self.working_dir().join("status")
    }

    pub fn status_file(&self, stage: &str) -> PathBuf {
        self.status_dir().join(format!("{stage}.status"))
    }

    pub fn readcount_file(&self) -> PathBuf {
        self.working_dir().join("readcount")
    }

    /// Minimum-span threshold for the given library size.
    pub fn min_span_threshold(&self, libsize: u64) -> u32 {
        self.min_span_funct.threshold(libsize)
    }

    /// Validate parameter combinations that clap alone cannot enforce.
    pub fn validate(&self) -> Result<(), crate::error::Error> {
        use crate::error::Error;

        if self.sample_name.is_empty() {
            return Err(Error::Parameter("--sampleName must not be empty".into()));
        }
        if self.fastq_first_end.len() != self.fastq_second_end.len() {
            return Err(Error::Parameter(format!(
                "--fastq1 has {} file(s) but --fastq2 has {}",
                self.fastq_first_end.len(),
                self.fastq_second_end.len()
            )));
        }
        if self.max_cores == 0 {
            return Err(Error::Parameter("--cores must be >= 1".into()));
        }
        if self.max_mem_gb == 0 {
            return Err(Error::Parameter("--mem must be >= 1".into()));
        }
        if !(0.0..1.0).contains(&self.max_junct_align_error_rate) {
            return Err(Error::Parameter(
                "--maxJunctAlignErrorRate must be in [0, 1)".into(),
            ));
        }
        if self.read_thru_dist < 0 {
            return Err(Error::Parameter("--readThruDist must be >= 0".into()));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    /// Helper: parse a command line (without program name).
    fn parse(args: &[&str]) -> Parameters {
        let mut full = vec!["fusor"];
        full.extend_from_slice(args);
        Parameters::parse_from(full)
    }

    fn minimal() -> Vec<&'static str> {
        vec!["--sampleName", "s1", "--referenceDir", "/ref"]
    }

    #[test]
    fn defaults() {
        let p = parse(&minimal());
        assert_eq!(p.sample_name, "s1");
        assert_eq!(p.output_dir, PathBuf::from("./"));
        assert_eq!(p.max_cores, 4);
        assert_eq!(p.max_mem_gb, 16);
        assert_eq!(p.read_thru_dist, 200_000);
        assert!((p.max_junct_align_error_rate - 0.03).abs() < f64::EPSILON);
        assert_eq!(p.gene_denylist, vec!["abParts".to_string()]);
        assert_eq!(
            p.min_span_funct,
            MinSpan {
                r: 2.0,
                x: 2.0,
                y: 80_000_000.0
            }
        );
        assert!(!p.keep_temporary);
        assert!(!p.ignore_fastq_warnings);
        assert_eq!(p.working_dir(), PathBuf::from("./").join("s1"));
    }

    #[test]
    fn typical_command() {
        let mut args = minimal();
        args.extend_from_slice(&[
            "--outputDir",
            "/out",
            "--fastq1",
            "a_1.fq.gz,b_1.fq.gz",
            "--fastq2",
            "a_2.fq.gz,b_2.fq.gz",
            "--discordantReads",
            "/out/s1/discordant.txt",
            "--cores",
            "16",
            "--mem",
            "64",
            "--minSpanFunct",
            "3,1,40000000",
        ]);
        let p = parse(&args);
        assert_eq!(
            p.fastq_first_end,
            vec![PathBuf::from("a_1.fq.gz"), PathBuf::from("b_1.fq.gz")]
        );
        assert_eq!(p.fastq_second_end.len(), 2);
        assert_eq!(p.max_cores, 16);
        assert_eq!(p.max_mem_gb, 64);
        assert_eq!(
            p.min_span_funct,
            MinSpan {
                r: 3.0,
                x: 1.0,
                y: 40_000_000.0
            }
        );
        assert!(p.validate().is_ok());
    }

    #[test]
    fn min_span_threshold_values() {
        let ms = MinSpan {
            r: 2.0,
            x: 2.0,
            y: 80_000_000.0,
        };
        assert_eq!(ms.threshold(80_000_000), 2);
        // ceil(2 + 2*ln(2)) == 4
        assert_eq!(ms.threshold(160_000_000), 4);
        // smaller-than-Y libraries clamp the log term at zero
        assert_eq!(ms.threshold(1_000), 2);
    }

    #[test]
    fn min_span_zero_y_is_constant() {
        let ms = MinSpan {
            r: 5.0,
            x: 2.0,
            y: 0.0,
        };
        assert_eq!(ms.threshold(0), 5);
        assert_eq!(ms.threshold(1_000_000_000), 5);
    }

    #[test]
    fn min_span_parse_rejects_garbage() {
        assert!("1,2".parse::<MinSpan>().is_err());
        assert!("a,b,c".parse::<MinSpan>().is_err());
        assert!("2,2,80000000".parse::<MinSpan>().is_ok());
    }

    #[test]
    fn validate_fastq_list_lengths() {
        let mut args = minimal();
        args.extend_from_slice(&["--fastq1", "a_1.fq", "--fastq2", "a_2.fq,b_2.fq"]);
        let p = parse(&args);
        let err = p.validate().unwrap_err();
        assert!(err.to_string().contains("fastq"));
    }

    #[test]
    fn validate_cores() {
        let mut args = minimal();
        args.extend_from_slice(&["--cores", "0"]);
        let p = parse(&args);
        assert!(p.validate().is_err());
    }

    #[test]
    fn validate_error_rate_range() {
        let mut args = minimal();
        args.extend_from_slice(&["--maxJunctAlignErrorRate", "1.5"]);
        let p = parse(&args);
        assert!(p.validate().is_err());
    }

    #[test]
    fn status_file_paths() {
        let p = parse(&minimal());
        assert_eq!(
            p.status_file("clusters"),
            PathBuf::from("./").join("s1").join("status").join("clusters.status")
        );
    }
}

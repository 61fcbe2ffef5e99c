/// FASTQ reading with decompression support, library sizing, and quality
/// encoding detection
use crate::error::Error;
use flate2::read::GzDecoder;
use noodles::fastq;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use std::process::{Command, Stdio};

/// Reads sampled from the head of a library when sniffing the quality
/// encoding.
const QUALITY_SAMPLE: usize = 1000;

/// A read from a FASTQ file
#[derive(Debug, Clone)]
pub struct FastqRead {
    /// Read identifier
    pub name: String,
    /// Base sequence (uppercase ASCII)
    pub sequence: String,
    /// Quality scores (raw FASTQ quality bytes)
    pub quality: Vec<u8>,
}

/// A paired-end read from two FASTQ files
#[derive(Debug, Clone)]
pub struct PairedRead {
    /// Base read name (without /1 or /2 suffix)
    pub name: String,
    /// First mate in pair
    pub mate1: FastqRead,
    /// Second mate in pair
    pub mate2: FastqRead,
}

/// Quality score encoding inferred from a sample of quality strings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QualityOffset {
    /// Sanger / Illumina 1.8+ (offset 33)
    Phred33,
    /// Legacy Illumina 1.3-1.7 (offset 64)
    Phred64,
    /// Sample too small or quality range ambiguous
    Indeterminate,
}

/// FASTQ reader that handles decompression
pub struct FastqReader {
    inner: fastq::Reader<Box<dyn BufRead + Send>>,
}

impl FastqReader {
    /// Open a FASTQ file (plain or gzip compressed)
    ///
    /// # Arguments
    /// * `path` - Path to FASTQ file
    /// * `decompress_cmd` - Optional decompression command (e.g., "zcat" for .gz files)
    ///
    /// # Returns
    /// A FastqReader that iterates over reads
    pub fn open(path: &Path, decompress_cmd: Option<&str>) -> Result<Self, Error> {
        let reader: Box<dyn BufRead + Send> = if let Some(cmd) = decompress_cmd {
            // Use external decompression command
            Self::open_with_command(path, cmd)?
        } else {
            // Auto-detect compression by file extension
            let path_str = path.to_string_lossy();
            let is_gzipped = path_str.ends_with(".gz") || path_str.ends_with(".gzip");

            let file = File::open(path).map_err(|e| Error::io(e, path))?;

            if is_gzipped {
                Box::new(BufReader::new(GzDecoder::new(file)))
            } else {
                Box::new(BufReader::new(file))
            }
        };

        Ok(Self {
            inner: fastq::Reader::new(reader),
        })
    }

    /// Open FASTQ file using external decompression command
    fn open_with_command(path: &Path, cmd: &str) -> Result<Box<dyn BufRead + Send>, Error> {
        let mut child = Command::new(cmd)
            .arg(path)
            .stdout(Stdio::piped())
            .spawn()
            .map_err(|e| Error::io(e, path))?;

        let stdout = child.stdout.take().ok_or_else(|| {
            Error::from(std::io::Error::other(
                "failed to capture stdout from decompression command",
            ))
        })?;

        Ok(Box::new(BufReader::new(stdout)))
    }

    /// Get the next read
    pub fn next_read(&mut self) -> Result<Option<FastqRead>, Error> {
        match self.inner.records().next() {
            Some(Ok(record)) => {
                let name = std::str::from_utf8(record.name())
                    .map_err(|e| {
                        Error::from(std::io::Error::new(
                            std::io::ErrorKind::InvalidData,
                            format!("invalid UTF-8 in read name: {}", e),
                        ))
                    })?
                    .to_string();

                let sequence = record
                    .sequence()
                    .iter()
                    .map(|&b| b.to_ascii_uppercase() as char)
                    .collect();

                let quality = record.quality_scores().to_vec();

                Ok(Some(FastqRead {
                    name,
                    sequence,
                    quality,
                }))
            }
            Some(Err(e)) => Err(Error::from(e)),
            None => Ok(None),
        }
    }
}

/// Paired-end FASTQ reader that reads from two files synchronously
pub struct PairedFastqReader {
    reader1: FastqReader,
    reader2: FastqReader,
}

impl PairedFastqReader {
    /// Open two FASTQ files for paired-end reading
    pub fn open(path1: &Path, path2: &Path, decompress_cmd: Option<&str>) -> Result<Self, Error> {
        let reader1 = FastqReader::open(path1, decompress_cmd)?;
        let reader2 = FastqReader::open(path2, decompress_cmd)?;

        Ok(Self { reader1, reader2 })
    }

    /// Get next paired read with name validation
    ///
    /// # Returns
    /// - Ok(Some(PairedRead)) if both mates available and names match
    /// - Ok(None) if both files are exhausted
    /// - Err if only one file exhausted or names don't match
    pub fn next_paired(&mut self) -> Result<Option<PairedRead>, Error> {
        let read1_opt = self.reader1.next_read()?;
        let read2_opt = self.reader2.next_read()?;

        match (read1_opt, read2_opt) {
            (Some(read1), Some(read2)) => {
                let name1_base = strip_mate_suffix(&read1.name);
                let name2_base = strip_mate_suffix(&read2.name);

                if name1_base != name2_base {
                    return Err(Error::from(std::io::Error::new(
                        std::io::ErrorKind::InvalidData,
                        format!(
                            "Paired FASTQ read names do not match: '{}' vs '{}'",
                            read1.name, read2.name
                        ),
                    )));
                }

                Ok(Some(PairedRead {
                    name: name1_base,
                    mate1: read1,
                    mate2: read2,
                }))
            }
            (None, None) => Ok(None),
            (Some(_), None) => Err(Error::from(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "Paired FASTQ files have different lengths: mate1 file has more reads",
            ))),
            (None, Some(_)) => Err(Error::from(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "Paired FASTQ files have different lengths: mate2 file has more reads",
            ))),
        }
    }
}

/// Strip mate suffix from read name for pairing
///
/// Removes common paired-end suffixes:
/// - /1 or /2 (Illumina convention)
/// - .R1 or .R2 (alternative convention)
/// - _1 or _2 (another convention)
/// - space and everything after (e.g., "READ_NAME 1:N:0:0" -> "READ_NAME")
pub fn strip_mate_suffix(name: &str) -> String {
    let name = if let Some(pos) = name.find(' ') {
        &name[..pos]
    } else {
        name
    };

    if name.ends_with("/1") || name.ends_with("/2") {
        name[..name.len() - 2].to_string()
    } else if name.ends_with(".R1") || name.ends_with(".R2") {
        name[..name.len() - 3].to_string()
    } else if name.ends_with("_1") || name.ends_with("_2") {
        name[..name.len() - 2].to_string()
    } else {
        name.to_string()
    }
}

/// Count read pairs across two mate files, validating pairing as we go.
pub fn count_pairs(path1: &Path, path2: &Path) -> Result<u64, Error> {
    let mut reader = PairedFastqReader::open(path1, path2, None)?;
    let mut count = 0u64;
    while reader.next_paired()?.is_some() {
        count += 1;
    }
    Ok(count)
}

/// Count pairs across matched file lists, summing per-library counts.
/// The lists must have equal lengths; mate files pair by position.
pub fn library_size(first: &[impl AsRef<Path>], second: &[impl AsRef<Path>]) -> Result<u64, Error> {
    if first.len() != second.len() {
        return Err(Error::Parameter(format!(
            "mate file lists differ in length: {} vs {}",
            first.len(),
            second.len()
        )));
    }
    let mut total = 0u64;
    for (f1, f2) in first.iter().zip(second) {
        total += count_pairs(f1.as_ref(), f2.as_ref())?;
    }
    Ok(total)
}

/// Infer the quality encoding from a sample of quality strings.
///
/// Any byte below 59 can only occur with offset 33. A sample whose bytes all
/// sit at 64 or above is characteristic of offset 64, though high-quality
/// Phred+33 data can look the same, hence a warning rather than an error at
/// the call site.
pub fn quality_offset(samples: &[&[u8]]) -> QualityOffset {
    let mut min = u8::MAX;
    let mut seen = false;
    for qual in samples {
        for &b in *qual {
            seen = true;
            if b < min {
                min = b;
            }
        }
    }
    if !seen {
        QualityOffset::Indeterminate
    } else if min < 59 {
        QualityOffset::Phred33
    } else if min >= 64 {
        QualityOffset::Phred64
    } else {
        QualityOffset::Indeterminate
    }
}

/// Sniff the quality encoding from the head of a FASTQ file.
pub fn scan_quality_offset(path: &Path) -> Result<QualityOffset, Error> {
    let mut reader = FastqReader::open(path, None)?;
    let mut samples = Vec::with_capacity(QUALITY_SAMPLE);
    while samples.len() < QUALITY_SAMPLE {
        match reader.next_read()? {
            Some(read) => samples.push(read.quality),
            None => break,
        }
    }
    let refs: Vec<&[u8]> = samples.iter().map(|q| q.as_slice()).collect();
    Ok(quality_offset(&refs))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn write_fastq(records: &[(&str, &str, &str)]) -> NamedTempFile {
        let mut tmpfile = NamedTempFile::new().unwrap();
        for (name, seq, qual) in records {
            writeln!(tmpfile, "@{name}").unwrap();
            writeln!(tmpfile, "{seq}").unwrap();
            writeln!(tmpfile, "+").unwrap();
            writeln!(tmpfile, "{qual}").unwrap();
        }
        tmpfile.flush().unwrap();
        tmpfile
    }

    #[test]
    fn test_fastq_reader_plain() {
        let tmpfile = write_fastq(&[("read1", "acgtn", "IIIII"), ("read2", "TGCA", "HHHH")]);

        let mut reader = FastqReader::open(tmpfile.path(), None).unwrap();

        let read1 = reader.next_read().unwrap().unwrap();
        assert_eq!(read1.name, "read1");
        assert_eq!(read1.sequence, "ACGTN");
        assert_eq!(read1.quality.len(), 5);

        let read2 = reader.next_read().unwrap().unwrap();
        assert_eq!(read2.name, "read2");
        assert_eq!(read2.sequence, "TGCA");

        let read3 = reader.next_read().unwrap();
        assert!(read3.is_none());
    }

    #[test]
    fn test_fastq_reader_gzip() {
        use flate2::Compression;
        use flate2::write::GzEncoder;

        let tmpfile = tempfile::Builder::new()
            .suffix(".fastq.gz")
            .tempfile()
            .unwrap();
        let mut encoder = GzEncoder::new(tmpfile.as_file(), Compression::default());
        writeln!(encoder, "@read1").unwrap();
        writeln!(encoder, "ACGT").unwrap();
        writeln!(encoder, "+").unwrap();
        writeln!(encoder, "IIII").unwrap();
        encoder.finish().unwrap();

        let mut reader = FastqReader::open(tmpfile.path(), None).unwrap();

        let read1 = reader.next_read().unwrap().unwrap();
        assert_eq!(read1.name, "read1");
        assert_eq!(read1.sequence, "ACGT");
        assert_eq!(read1.quality.len(), 4);
    }

    #[test]
    fn test_strip_mate_suffix_slash() {
        assert_eq!(strip_mate_suffix("read123/1"), "read123");
        assert_eq!(strip_mate_suffix("read123/2"), "read123");
    }

    #[test]
    fn test_strip_mate_suffix_dot() {
        assert_eq!(strip_mate_suffix("read123.R1"), "read123");
        assert_eq!(strip_mate_suffix("read123.R2"), "read123");
    }

    #[test]
    fn test_strip_mate_suffix_underscore() {
        assert_eq!(strip_mate_suffix("read123_1"), "read123");
        assert_eq!(strip_mate_suffix("read123_2"), "read123");
    }

    #[test]
    fn test_strip_mate_suffix_with_space() {
        assert_eq!(strip_mate_suffix("read123 1:N:0:AGCT"), "read123");
        assert_eq!(strip_mate_suffix("read123/1 1:N:0:AGCT"), "read123");
    }

    #[test]
    fn test_strip_mate_suffix_no_suffix() {
        assert_eq!(strip_mate_suffix("read123"), "read123");
    }

    #[test]
    fn test_paired_reader_matching_names() {
        let tmpfile1 = write_fastq(&[("read1/1", "ACGT", "IIII"), ("read2/1", "TGCA", "HHHH")]);
        let tmpfile2 = write_fastq(&[("read1/2", "GGCC", "JJJJ"), ("read2/2", "AATT", "KKKK")]);

        let mut reader = PairedFastqReader::open(tmpfile1.path(), tmpfile2.path(), None).unwrap();

        let pair1 = reader.next_paired().unwrap().unwrap();
        assert_eq!(pair1.name, "read1");
        assert_eq!(pair1.mate1.name, "read1/1");
        assert_eq!(pair1.mate1.sequence, "ACGT");
        assert_eq!(pair1.mate2.name, "read1/2");
        assert_eq!(pair1.mate2.sequence, "GGCC");

        let pair2 = reader.next_paired().unwrap().unwrap();
        assert_eq!(pair2.name, "read2");

        let pair3 = reader.next_paired().unwrap();
        assert!(pair3.is_none());
    }

    #[test]
    fn test_paired_reader_name_mismatch() {
        let tmpfile1 = write_fastq(&[("read1/1", "ACGT", "IIII")]);
        let tmpfile2 = write_fastq(&[("read2/2", "GGCC", "JJJJ")]);

        let mut reader = PairedFastqReader::open(tmpfile1.path(), tmpfile2.path(), None).unwrap();

        let result = reader.next_paired();
        assert!(result.is_err());
        assert!(
            result
                .unwrap_err()
                .to_string()
                .contains("read names do not match")
        );
    }

    #[test]
    fn test_paired_reader_length_mismatch() {
        let tmpfile1 = write_fastq(&[("read1/1", "ACGT", "IIII"), ("read2/1", "TGCA", "HHHH")]);
        let tmpfile2 = write_fastq(&[("read1/2", "GGCC", "JJJJ")]);

        let mut reader = PairedFastqReader::open(tmpfile1.path(), tmpfile2.path(), None).unwrap();

        let _ = reader.next_paired().unwrap().unwrap();

        let result = reader.next_paired();
        assert!(result.is_err());
        assert!(
            result
                .unwrap_err()
                .to_string()
                .contains("different lengths")
        );
    }

    #[test]
    fn test_count_pairs() {
        let tmpfile1 = write_fastq(&[
            ("read1/1", "ACGT", "IIII"),
            ("read2/1", "TGCA", "HHHH"),
            ("read3/1", "AAAA", "IIII"),
        ]);
        let tmpfile2 = write_fastq(&[
            ("read1/2", "GGCC", "JJJJ"),
            ("read2/2", "AATT", "KKKK"),
            ("read3/2", "TTTT", "IIII"),
        ]);

        assert_eq!(count_pairs(tmpfile1.path(), tmpfile2.path()).unwrap(), 3);
    }

    #[test]
    fn test_library_size_sums_files() {
        let a1 = write_fastq(&[("r1/1", "ACGT", "IIII")]);
        let a2 = write_fastq(&[("r1/2", "ACGT", "IIII")]);
        let b1 = write_fastq(&[("s1/1", "ACGT", "IIII"), ("s2/1", "ACGT", "IIII")]);
        let b2 = write_fastq(&[("s1/2", "ACGT", "IIII"), ("s2/2", "ACGT", "IIII")]);

        let first = vec![a1.path().to_path_buf(), b1.path().to_path_buf()];
        let second = vec![a2.path().to_path_buf(), b2.path().to_path_buf()];
        assert_eq!(library_size(&first, &second).unwrap(), 3);
    }

    #[test]
    fn test_library_size_rejects_uneven_lists() {
        let a1 = write_fastq(&[("r1/1", "ACGT", "IIII")]);
        let first = vec![a1.path().to_path_buf()];
        let second: Vec<std::path::PathBuf> = vec![];
        assert!(library_size(&first, &second).is_err());
    }

    #[test]
    fn test_quality_offset_phred33() {
        // '#' is 35, well below the Phred+64 floor
        let q: &[u8] = b"##IIII";
        assert_eq!(quality_offset(&[q]), QualityOffset::Phred33);
    }

    #[test]
    fn test_quality_offset_phred64() {
        // 'h' (104) style legacy qualities never dip below 64
        let q: &[u8] = b"hhhhgg";
        assert_eq!(quality_offset(&[q]), QualityOffset::Phred64);
    }

    #[test]
    fn test_quality_offset_empty() {
        assert_eq!(quality_offset(&[]), QualityOffset::Indeterminate);
    }

    #[test]
    fn test_scan_quality_offset() {
        let tmpfile = write_fastq(&[("read1", "ACGT", "II#I")]);
        assert_eq!(
            scan_quality_offset(tmpfile.path()).unwrap(),
            QualityOffset::Phred33
        );
    }
}

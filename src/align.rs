//! External aligner plumbing.
//!
//! The pipeline shells out to bowtie2 for junction and scrambled-reference
//! alignment and to blat for the genomic filter passes. All invocations go
//! through the `ToolRunner` trait so the orchestration can be exercised in
//! tests without the binaries installed.

use std::fs::File;
use std::path::Path;
use std::process::{Command, Stdio};

use log::{debug, info};

use crate::error::Error;

pub trait ToolRunner: Sync {
    /// Run `tool` with `args`; redirect stdout to `stdout_to` when given.
    /// A non-zero exit status is an error.
    fn run(&self, tool: &str, args: &[String], stdout_to: Option<&Path>) -> Result<(), Error>;
}

/// Runs tools as child processes.
pub struct SystemRunner;

impl ToolRunner for SystemRunner {
    fn run(&self, tool: &str, args: &[String], stdout_to: Option<&Path>) -> Result<(), Error> {
        debug!("running {tool} {}", args.join(" "));
        let mut cmd = Command::new(tool);
        cmd.args(args).stderr(Stdio::piped());
        match stdout_to {
            Some(path) => {
                let file = File::create(path).map_err(|e| Error::io(e, path))?;
                cmd.stdout(Stdio::from(file));
            }
            None => {
                cmd.stdout(Stdio::null());
            }
        }
        let output = cmd
            .output()
            .map_err(|e| Error::tool(tool, format!("failed to start: {e}")))?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(Error::tool(
                tool,
                format!("exited with {}: {}", output.status, stderr.trim()),
            ));
        }
        Ok(())
    }
}

/// True when a FASTA/FASTQ query file holds no records; aligners are not
/// invoked on empty input, the corresponding output is created empty.
pub fn query_is_empty(path: &Path) -> Result<bool, Error> {
    let metadata = std::fs::metadata(path).map_err(|e| Error::io(e, path))?;
    Ok(metadata.len() == 0)
}

fn touch(path: &Path) -> Result<(), Error> {
    File::create(path).map_err(|e| Error::io(e, path))?;
    Ok(())
}

/// Tool paths resolved from the run parameters.
pub struct Aligners<'a> {
    pub runner: &'a dyn ToolRunner,
    pub bowtie2: String,
    pub bowtie2_build: String,
    pub blat: String,
    pub samtools: String,
}

impl<'a> Aligners<'a> {
    /// Build a bowtie2 index over `fasta` under `prefix`.
    pub fn bowtie2_build(&self, fasta: &Path, prefix: &Path, threads: usize) -> Result<(), Error> {
        info!("indexing {}", fasta.display());
        self.runner.run(
            &self.bowtie2_build,
            &[
                "--threads".into(),
                threads.to_string(),
                fasta.display().to_string(),
                prefix.display().to_string(),
            ],
            None,
        )
    }

    /// Sensitive-local bowtie2 alignment of FASTA queries, SAM to `out_sam`.
    pub fn bowtie2_local(
        &self,
        index: &Path,
        query_fa: &Path,
        out_sam: &Path,
        threads: usize,
    ) -> Result<(), Error> {
        if query_is_empty(query_fa)? {
            debug!("no queries in {}, skipping alignment", query_fa.display());
            return touch(out_sam);
        }
        self.runner.run(
            &self.bowtie2,
            &[
                "--sensitive-local".into(),
                "--no-unal".into(),
                "-p".into(),
                threads.to_string(),
                "-f".into(),
                "-x".into(),
                index.display().to_string(),
                "-U".into(),
                query_fa.display().to_string(),
                "-S".into(),
                out_sam.display().to_string(),
            ],
            None,
        )
    }

    /// blat `query_fa` against a 2bit database, PSL with no header.
    pub fn blat(&self, database: &Path, query_fa: &Path, out_psl: &Path) -> Result<(), Error> {
        if query_is_empty(query_fa)? {
            debug!("no queries in {}, skipping blat", query_fa.display());
            return touch(out_psl);
        }
        self.runner.run(
            &self.blat,
            &[
                "-noHead".into(),
                database.display().to_string(),
                query_fa.display().to_string(),
                out_psl.display().to_string(),
            ],
            None,
        )
    }

    /// samtools view of an alignment file into a text SAM body.
    pub fn sam_body(&self, alignment: &Path, out: &Path) -> Result<(), Error> {
        self.runner.run(
            &self.samtools,
            &["view".into(), alignment.display().to_string()],
            Some(out),
        )
    }
}

#[cfg(test)]
pub mod testutil {
    use super::*;
    use std::sync::Mutex;

    /// Records invocations and creates empty outputs, for orchestration
    /// tests.
    #[derive(Default)]
    pub struct MockRunner {
        pub calls: Mutex<Vec<(String, Vec<String>)>>,
    }

    impl ToolRunner for MockRunner {
        fn run(
            &self,
            tool: &str,
            args: &[String],
            stdout_to: Option<&Path>,
        ) -> Result<(), Error> {
            self.calls
                .lock()
                .unwrap()
                .push((tool.to_string(), args.to_vec()));
            if let Some(path) = stdout_to {
                File::create(path).map_err(|e| Error::io(e, path))?;
            }
            // bowtie2/blat write to the path named by -S or the last arg
            if let Some(pos) = args.iter().position(|a| a == "-S") {
                if let Some(out) = args.get(pos + 1) {
                    let _ = File::create(out);
                }
            }
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testutil::MockRunner;
    use super::*;

    #[test]
    fn test_empty_query_skips_invocation() {
        let dir = tempfile::tempdir().unwrap();
        let query = dir.path().join("empty.fa");
        std::fs::write(&query, "").unwrap();
        let out = dir.path().join("out.psl");

        let runner = MockRunner::default();
        let aligners = Aligners {
            runner: &runner,
            bowtie2: "bowtie2".into(),
            bowtie2_build: "bowtie2-build".into(),
            blat: "blat".into(),
            samtools: "samtools".into(),
        };
        aligners
            .blat(&dir.path().join("genome.2bit"), &query, &out)
            .unwrap();

        assert!(runner.calls.lock().unwrap().is_empty());
        assert!(out.exists());
    }

    #[test]
    fn test_bowtie2_invocation_shape() {
        let dir = tempfile::tempdir().unwrap();
        let query = dir.path().join("reads.fa");
        std::fs::write(&query, ">r1\nACGT\n").unwrap();
        let out = dir.path().join("out.sam");

        let runner = MockRunner::default();
        let aligners = Aligners {
            runner: &runner,
            bowtie2: "bowtie2".into(),
            bowtie2_build: "bowtie2-build".into(),
            blat: "blat".into(),
            samtools: "samtools".into(),
        };
        aligners
            .bowtie2_local(&dir.path().join("idx"), &query, &out, 4)
            .unwrap();

        let calls = runner.calls.lock().unwrap();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].0, "bowtie2");
        assert!(calls[0].1.contains(&"--sensitive-local".to_string()));
        assert!(calls[0].1.contains(&"4".to_string()));
    }
}

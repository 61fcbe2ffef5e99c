//! Gene-fusion candidate detection from paired-end RNA-seq.
//!
//! The pipeline runs five stages over one sample: discordant read pairs are
//! aggregated into gene-pair clusters, clusters expand into a candidate
//! exon-exon junction catalog, reads are realigned against the catalog to
//! recover breakpoint-spanning anchor reads, six filter passes eliminate
//! spurious evidence, and the survivors are compiled into a ranked fusion
//! report with quantification. External aligners (bowtie2, blat, samtools)
//! are invoked through the `align::ToolRunner` adapter; stages that call
//! them persist status markers so an interrupted run resumes without
//! repeating the alignment work.

pub mod align;
pub mod anchor;
pub mod cluster;
pub mod compile;
pub mod compute;
pub mod error;
pub mod filter;
pub mod io;
pub mod junction;
pub mod model;
pub mod params;
pub mod seq;
pub mod stats;
pub mod status;

use std::collections::{HashMap, HashSet};
use std::fs::{self, File};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use log::{info, warn};

use crate::align::{Aligners, SystemRunner, ToolRunner};
use crate::anchor::{
    is_anchor_read, is_high_confidence, pair_prefix_key, trimmed_read_name, AnchorRead,
    AnchorRecord,
};
use crate::compile::quant::{tally_sam, PartitionMap, QuantSummary};
use crate::compile::CompiledFusion;
use crate::compute::ComputeBudget;
use crate::error::Error;
use crate::filter::psl;
use crate::io::fastq::{PairedFastqReader, QualityOffset};
use crate::junction::Junction;
use crate::model::GeneModel;
use crate::params::Parameters;
use crate::stats::RunStats;
use crate::status::StageMarker;

/// Top-level entry point. Called from `main()` after CLI parsing.
pub fn run(params: &Parameters) -> anyhow::Result<()> {
    params.validate()?;

    info!("fusor v{}", env!("CARGO_PKG_VERSION"));
    info!("sample: {}", params.sample_name);
    info!("output: {}", params.working_dir().display());

    run_with_runner(params, &SystemRunner)?;
    Ok(())
}

/// Run the pipeline with an explicit tool runner, injectable for tests.
pub fn run_with_runner(params: &Parameters, runner: &dyn ToolRunner) -> Result<(), Error> {
    let work = params.working_dir();
    fs::create_dir_all(&work).map_err(|e| Error::io(e, &work))?;
    let status_dir = params.status_dir();
    fs::create_dir_all(&status_dir).map_err(|e| Error::io(e, &status_dir))?;

    let model = model::loader::load(&params.reference_dir)?;
    info!("annotation loaded: {} genes", model.num_genes());

    check_fastq_quality(params)?;
    let libsize = resolve_readcount(params)?;
    let min_span = params.min_span_threshold(libsize);
    info!("library size {libsize}, min-span threshold {min_span}");

    let p = Pipeline {
        params,
        model: &model,
        aligners: Aligners {
            runner,
            bowtie2: params.bowtie2_path.display().to_string(),
            bowtie2_build: params.bowtie2_build_path.display().to_string(),
            blat: params.blat_path.display().to_string(),
            samtools: params.samtools_path.display().to_string(),
        },
        work,
    };
    let mut stats = RunStats::new();

    // stage 1: discordant clusters
    let discordant = params
        .discordant_reads
        .as_ref()
        .ok_or_else(|| Error::Parameter("--discordantReads is required".into()))?;
    let text = fs::read_to_string(discordant).map_err(|e| Error::io(e, discordant))?;
    let input_pairs = text
        .lines()
        .filter(|l| !l.is_empty() && !l.starts_with('#'))
        .count() as u64;
    let clusters = cluster::aggregate(text.as_bytes(), &model, min_span, &params.gene_denylist)?;
    cluster::write_clusters(&clusters, &model, &p.work.join("discordants.genes"))?;
    let admitted_pairs: u64 = clusters.iter().map(|c| c.total_count() as u64).sum();
    stats.record_aggregation(
        input_pairs,
        input_pairs.saturating_sub(admitted_pairs),
        clusters.len() as u64,
    );
    if clusters.is_empty() {
        info!("no clusters admitted; writing empty report");
        p.write_outputs(&[])?;
        stats.print_summary();
        return Ok(());
    }

    // stage 2: junction candidates
    let mut junctions =
        junction::builder::build_junctions(&model, &clusters, params.read_thru_dist)?;
    stats.junctions_built = junctions.len() as u64;
    if junctions.is_empty() {
        info!("no candidate junctions; writing empty report");
        p.write_outputs(&[])?;
        stats.print_summary();
        return Ok(());
    }
    junction::builder::write_catalog(
        &junctions,
        &p.work.join("junctions.fa"),
        &p.work.join("junctions.map.fa"),
    )?;

    // stage 3: junction alignment and anchor reads
    let budget = ComputeBudget::plan(params.max_cores, params.max_mem_gb, 6, 2, 4);
    let splits = junction::builder::write_splits(&junctions, &p.work, budget.splits)?;
    let reads_fa = p.write_read_queries()?;
    let records = p.junction_alignment(&junctions, &splits, &budget, &reads_fa)?;

    let by_name = filter::index_by_name(&junctions);
    for rec in &records {
        let Some(&j) = by_name.get(&rec.junction_name) else {
            continue;
        };
        let breakpoint = junctions[j].key.breakpoint;
        junctions[j]
            .anchor_reads
            .push(AnchorRead::from_record(rec, breakpoint)?);
    }
    let total_ars: u64 = junctions.iter().map(|j| j.anchor_reads.len() as u64).sum();
    info!("{total_ars} breakpoint-spanning reads attached");

    p.attach_mates(&mut junctions)?;
    p.drop_unanchored(&mut junctions)?;

    // stage 4: spurious-evidence filters
    p.filter_stages(&mut junctions)?;
    p.refresh_confidence(&mut junctions)?;
    let spurious_ars = junctions
        .iter()
        .flat_map(|j| j.anchor_reads.iter())
        .filter(|ar| ar.spurious.is_set())
        .count() as u64;
    stats.record_anchor_reads(total_ars, spurious_ars);

    // stage 5: compile, quantify, report
    let mut fusions = compile::compile(junctions, &clusters, &model)?;
    p.quantify(&mut fusions, &reads_fa, libsize)?;
    stats.fusions_reported = fusions.len() as u64;
    p.write_outputs(&fusions)?;

    if !params.keep_temporary {
        p.cleanup()?;
    }
    stats.print_summary();
    Ok(())
}

// ---------------------------------------------------------------------------
// Run preliminaries
// ---------------------------------------------------------------------------

/// Warn (or abort) when the FASTQ quality encoding looks legacy Phred+64.
fn check_fastq_quality(params: &Parameters) -> Result<(), Error> {
    let Some(first) = params.fastq_first_end.first() else {
        return Ok(());
    };
    match io::fastq::scan_quality_offset(first)? {
        QualityOffset::Phred64 => {
            warn!(
                "{} looks Phred+64 encoded; downstream aligners assume Phred+33",
                first.display()
            );
            if params.ignore_fastq_warnings {
                Ok(())
            } else {
                Err(Error::Fastq(
                    "quality scores look Phred+64 encoded; rerun with \
                     --ignoreFastqWarnings to continue"
                        .into(),
                ))
            }
        }
        _ => Ok(()),
    }
}

/// Library size for the min-span threshold and RPKM denominators:
/// the explicit parameter, the persisted artifact, or a fresh count over
/// the FASTQ inputs, in that order.
fn resolve_readcount(params: &Parameters) -> Result<u64, Error> {
    let path = params.readcount_file();
    if let Some(count) = params.read_count {
        io::save_readcount(&path, count)?;
        return Ok(count);
    }
    if path.exists() {
        let count = io::load_readcount(&path)?;
        info!("using persisted read count {count}");
        return Ok(count);
    }
    if params.fastq_first_end.is_empty() {
        return Err(Error::Parameter(
            "--readCount is required when no FASTQ inputs are given".into(),
        ));
    }
    info!(
        "counting read pairs across {} FASTQ pair(s)",
        params.fastq_first_end.len()
    );
    let count = io::fastq::library_size(&params.fastq_first_end, &params.fastq_second_end)?;
    io::save_readcount(&path, count)?;
    Ok(count)
}

fn contig_databases(dir: &Path) -> Result<Vec<PathBuf>, Error> {
    let mut dbs = Vec::new();
    for entry in fs::read_dir(dir).map_err(|e| Error::io(e, dir))? {
        let entry = entry.map_err(|e| Error::io(e, dir))?;
        let path = entry.path();
        if path.extension().is_some_and(|e| e == "2bit") {
            dbs.push(path);
        }
    }
    dbs.sort();
    if dbs.is_empty() {
        return Err(Error::Parameter(format!(
            "no .2bit files under {}",
            dir.display()
        )));
    }
    Ok(dbs)
}

// ---------------------------------------------------------------------------
// Pipeline stages
// ---------------------------------------------------------------------------

struct Pipeline<'a> {
    params: &'a Parameters,
    model: &'a GeneModel,
    aligners: Aligners<'a>,
    work: PathBuf,
}

impl Pipeline<'_> {
    /// Write every input read as an aligner query, named `pairName/1|2`.
    fn write_read_queries(&self) -> Result<PathBuf, Error> {
        let path = self.work.join("reads.fa");
        let file = File::create(&path).map_err(|e| Error::io(e, &path))?;
        let mut out = BufWriter::new(file);
        if self.params.fastq_first_end.is_empty() {
            warn!("no FASTQ inputs; junction alignment will see no reads");
            return Ok(path);
        }
        for (f1, f2) in self
            .params
            .fastq_first_end
            .iter()
            .zip(&self.params.fastq_second_end)
        {
            let mut reader = PairedFastqReader::open(f1, f2, None)?;
            while let Some(pair) = reader.next_paired()? {
                writeln!(out, ">{}/1\n{}", pair.name, pair.mate1.sequence)
                    .and_then(|_| writeln!(out, ">{}/2\n{}", pair.name, pair.mate2.sequence))
                    .map_err(|e| Error::io(e, &path))?;
            }
        }
        Ok(path)
    }

    /// Align the read pool against the junction catalog splits and reduce
    /// the SAM output to the junction-alignment table. The table is the
    /// resume artifact: a completed stage marker skips the aligner and
    /// reparses the table.
    fn junction_alignment(
        &self,
        junctions: &[Junction],
        splits: &[PathBuf],
        budget: &ComputeBudget,
        reads_fa: &Path,
    ) -> Result<Vec<AnchorRecord>, Error> {
        let marker_path = self.params.status_file("junct_align");
        let table = self.work.join("junct_aligns.txt");

        let resumed = match StageMarker::load(&marker_path)? {
            Some(m) if m.complete => {
                if !table.exists() {
                    return Err(Error::Resume(format!(
                        "stage 'junct_align' is marked complete but {} is missing",
                        table.display()
                    )));
                }
                m.check_resume(splits.len(), "junct_align")?;
                true
            }
            _ => false,
        };

        if resumed {
            info!(
                "junction alignment already complete; reusing {}",
                table.display()
            );
        } else {
            let breakpoints: HashMap<String, i64> = junctions
                .iter()
                .map(|j| (j.key.name(), j.key.breakpoint as i64))
                .collect();
            let cores = budget.cores.clone();
            let sams = compute::run_indexed(splits.to_vec(), splits.len(), |i, split| {
                let threads = cores.get(i).copied().unwrap_or(1);
                let prefix = self.work.join(format!("junct_idx_{i}"));
                self.aligners.bowtie2_build(&split, &prefix, threads)?;
                let sam = self.work.join(format!("junct_sam_{i}.sam"));
                self.aligners.bowtie2_local(&prefix, reads_fa, &sam, threads)?;
                Ok(sam)
            })?;

            let file = File::create(&table).map_err(|e| Error::io(e, &table))?;
            let mut out = BufWriter::new(file);
            for sam in &sams {
                let reader = BufReader::new(File::open(sam).map_err(|e| Error::io(e, sam))?);
                for line in reader.lines() {
                    let line = line.map_err(|e| Error::io(e, sam))?;
                    if let Some(rec) = io::sam::junction_record(
                        &line,
                        &breakpoints,
                        self.params.max_junct_align_error_rate,
                    )? {
                        writeln!(out, "{}", rec.to_line()).map_err(|e| Error::io(e, &table))?;
                    }
                }
            }
            out.flush().map_err(|e| Error::io(e, &table))?;
            StageMarker::completed(splits.len()).save(&marker_path)?;
        }

        let reader = BufReader::new(File::open(&table).map_err(|e| Error::io(e, &table))?);
        let mut records = Vec::new();
        for line in reader.lines() {
            let line = line.map_err(|e| Error::io(e, &table))?;
            if line.is_empty() {
                continue;
            }
            records.push(AnchorRecord::parse(&line)?);
        }
        info!("{} junction alignment records", records.len());
        Ok(records)
    }

    /// Pull the other-mate sequences of every junction-aligned pair from
    /// the FASTQ inputs, align them to the isoform transcriptome, and
    /// attach the resulting gene hits to each anchor read.
    fn attach_mates(&self, junctions: &mut [Junction]) -> Result<(), Error> {
        let mut wanted: HashSet<String> = HashSet::new();
        for j in junctions.iter() {
            for ar in &j.anchor_reads {
                wanted.insert(trimmed_read_name(&ar.read_name).to_string());
            }
        }
        if wanted.is_empty() {
            return Ok(());
        }
        let Some(iso_index) = self.params.isoform_index.as_ref() else {
            warn!("no --isoformIndex; split reads cannot be anchored by their mates");
            return Ok(());
        };

        let mut pair_seqs: HashMap<String, (String, String)> = HashMap::new();
        let mut pool_keys: HashSet<String> = HashSet::new();
        let mates_fa = self.work.join("mates.fa");
        {
            let file = File::create(&mates_fa).map_err(|e| Error::io(e, &mates_fa))?;
            let mut out = BufWriter::new(file);
            for (f1, f2) in self
                .params
                .fastq_first_end
                .iter()
                .zip(&self.params.fastq_second_end)
            {
                let mut reader = PairedFastqReader::open(f1, f2, None)?;
                while let Some(pair) = reader.next_paired()? {
                    if !wanted.contains(&pair.name) {
                        continue;
                    }
                    // PCR pre-dedup: one representative pair per prefix key
                    // is aligned; the rest fall to the duplicate pass
                    if pool_keys
                        .insert(pair_prefix_key(&pair.mate1.sequence, &pair.mate2.sequence))
                    {
                        writeln!(out, ">{}/1\n{}", pair.name, pair.mate1.sequence)
                            .and_then(|_| {
                                writeln!(out, ">{}/2\n{}", pair.name, pair.mate2.sequence)
                            })
                            .map_err(|e| Error::io(e, &mates_fa))?;
                    }
                    pair_seqs.insert(pair.name, (pair.mate1.sequence, pair.mate2.sequence));
                }
            }
        }

        let sam = self.work.join("mates.sam");
        self.aligners
            .bowtie2_local(iso_index, &mates_fa, &sam, self.params.max_cores)?;

        let iso_to_gene: HashMap<String, u32> = self
            .model
            .genes()
            .flat_map(|g| g.isoforms.iter().map(move |iso| (iso.id.clone(), g.id)))
            .collect();
        let reader = BufReader::new(File::open(&sam).map_err(|e| Error::io(e, &sam))?);
        let hits = io::sam::mate_alignments(reader, &iso_to_gene)?;

        for j in junctions.iter_mut() {
            for ar in &mut j.anchor_reads {
                let base = trimmed_read_name(&ar.read_name);
                let Some((seq1, seq2)) = pair_seqs.get(base) else {
                    continue;
                };
                let mate_is_first =
                    ar.read_name.ends_with("/2") || ar.read_name.ends_with(".2");
                let (mate_seq, mate_name) = if mate_is_first {
                    (seq1, format!("{base}/1"))
                } else {
                    (seq2, format!("{base}/2"))
                };
                ar.mate_sequence = mate_seq.clone();
                if let Some(hs) = hits.get(&mate_name) {
                    ar.other_reads = hs.clone();
                }
            }
        }
        Ok(())
    }

    /// Split reads whose mate never lands in a partner gene are not anchor
    /// reads and carry no fusion evidence.
    fn drop_unanchored(&self, junctions: &mut [Junction]) -> Result<(), Error> {
        let mut dropped = 0usize;
        for j in junctions.iter_mut() {
            let gene_5p = self.model.gene_of_exon(j.key.ex_5p)?;
            let gene_3p = self.model.gene_of_exon(j.key.ex_3p)?;
            for ar in &mut j.anchor_reads {
                if !ar.spurious.is_set() && !is_anchor_read(self.model, ar, gene_5p, gene_3p) {
                    ar.spurious.mark();
                    dropped += 1;
                }
            }
        }
        info!("{dropped} split reads without a partner-gene mate dropped");
        Ok(())
    }

    fn filter_stages(&self, junctions: &mut [Junction]) -> Result<(), Error> {
        // 1. whole genome
        if let Some(db) = &self.params.genome_2bit {
            let queries = self.work.join("split_reads_genome.fa");
            filter::write_split_read_queries(junctions, &queries)?;
            let records =
                self.blat_stage("filter_genome", db, &queries, &self.work.join("genome.psl"))?;
            filter::genome_pass(junctions, &records);
        } else {
            warn!("no --genome2bit; skipping whole-genome filter");
        }

        // 2. exome, two rounds
        if let Some(db) = &self.params.junction_2bit {
            for round in 1..=2 {
                let queries = self.work.join(format!("split_reads_exome_{round}.fa"));
                filter::write_split_read_queries(junctions, &queries)?;
                let records = self.blat_stage(
                    &format!("filter_exome_{round}"),
                    db,
                    &queries,
                    &self.work.join(format!("exome_{round}.psl")),
                )?;
                filter::exome_pass(junctions, &records);
            }
        } else {
            warn!("no --junction2bit; skipping exome filter");
        }

        // 3. genome by contig, two rounds, parallel per contig
        if let Some(dir) = &self.params.contig_2bit_dir {
            let contigs = contig_databases(dir)?;
            let budget =
                ComputeBudget::plan(self.params.max_cores, self.params.max_mem_gb, 12, 1, 2);
            for round in 1..=2 {
                let queries = self.work.join(format!("split_reads_contig_{round}.fa"));
                filter::write_split_read_queries(junctions, &queries)?;

                let stage = format!("filter_contig_{round}");
                let marker_path = self.params.status_file(&stage);
                let psls: Vec<PathBuf> = (0..contigs.len())
                    .map(|i| self.work.join(format!("contig_{round}_{i}.psl")))
                    .collect();
                let resumed = match StageMarker::load(&marker_path)? {
                    Some(m) if m.complete => {
                        if let Some(missing) = psls.iter().find(|p| !p.exists()) {
                            return Err(Error::Resume(format!(
                                "stage '{stage}' is marked complete but {} is missing",
                                missing.display()
                            )));
                        }
                        m.check_resume(contigs.len(), &stage)?;
                        true
                    }
                    _ => false,
                };
                if !resumed {
                    let jobs: Vec<(PathBuf, PathBuf)> = contigs
                        .iter()
                        .cloned()
                        .zip(psls.iter().cloned())
                        .collect();
                    compute::run_indexed(jobs, budget.splits, |_i, (db, psl_path)| {
                        self.aligners.blat(&db, &queries, &psl_path)
                    })?;
                    StageMarker::completed(contigs.len()).save(&marker_path)?;
                }
                let mut records = Vec::new();
                for path in &psls {
                    records.extend(psl::read_psl(path)?);
                }
                filter::contig_pass(junctions, &records, self.model);
            }
        } else {
            warn!("no --contig2bitDir; skipping per-contig filter");
        }

        // 4. junction probes
        if let Some(db) = &self.params.genome_2bit {
            let probes = self.work.join("probes.fa");
            filter::write_junction_probes(junctions, &probes)?;
            let records =
                self.blat_stage("filter_probes", db, &probes, &self.work.join("probes.psl"))?;
            filter::probe_pass(junctions, &records, self.model, self.params.read_thru_dist);
        }

        // 5. scrambled exons
        self.scrambled_stage(junctions)?;

        // 6. PCR duplicates
        filter::duplicate_pass(junctions);

        // a junction whose every split read was eliminated is itself dead
        for j in junctions.iter_mut() {
            if !j.spurious.is_set()
                && !j.anchor_reads.is_empty()
                && j.anchor_reads.iter().all(|ar| ar.spurious.is_set())
            {
                j.spurious.mark();
            }
        }
        Ok(())
    }

    /// One blat invocation guarded by a stage marker; post-processing of
    /// the PSL output always reruns.
    fn blat_stage(
        &self,
        stage: &str,
        db: &Path,
        queries: &Path,
        psl_path: &Path,
    ) -> Result<Vec<psl::PslRecord>, Error> {
        let marker_path = self.params.status_file(stage);
        match StageMarker::load(&marker_path)? {
            Some(m) if m.complete => {
                if !psl_path.exists() {
                    return Err(Error::Resume(format!(
                        "stage '{stage}' is marked complete but {} is missing",
                        psl_path.display()
                    )));
                }
                m.check_resume(1, stage)?;
                info!("stage '{stage}' already complete; reusing {}", psl_path.display());
            }
            _ => {
                self.aligners.blat(db, queries, psl_path)?;
                StageMarker::completed(1).save(&marker_path)?;
            }
        }
        psl::read_psl(psl_path)
    }

    /// Build the scrambled-exon reference over the partner genes of the
    /// surviving junctions and align the split reads against it.
    fn scrambled_stage(&self, junctions: &mut [Junction]) -> Result<(), Error> {
        let mut gene_ids: Vec<u32> = junctions
            .iter()
            .filter(|j| !j.spurious.is_set())
            .flat_map(|j| [j.key.ex_5p, j.key.ex_3p])
            .filter_map(|e| self.model.gene_of_exon(e).ok().map(|g| g.id))
            .collect();
        gene_ids.sort_unstable();
        gene_ids.dedup();
        if gene_ids.is_empty() {
            return Ok(());
        }

        let fa = self.work.join("scrambled.fa");
        let mut wrote = 0usize;
        {
            let file = File::create(&fa).map_err(|e| Error::io(e, &fa))?;
            let mut out = BufWriter::new(file);
            for id in &gene_ids {
                let gene = self.model.gene(*id)?;
                let seq = self.model.scrambled_exon_sequence(gene)?;
                if seq.is_empty() {
                    continue;
                }
                writeln!(out, ">{}\n{}", gene.name, seq).map_err(|e| Error::io(e, &fa))?;
                wrote += 1;
            }
        }
        if wrote == 0 {
            return Ok(());
        }

        let queries = self.work.join("split_reads_scrambled.fa");
        filter::write_split_read_queries(junctions, &queries)?;

        let stage = "filter_scrambled";
        let marker_path = self.params.status_file(stage);
        let sam = self.work.join("scrambled.sam");
        match StageMarker::load(&marker_path)? {
            Some(m) if m.complete => {
                if !sam.exists() {
                    return Err(Error::Resume(format!(
                        "stage '{stage}' is marked complete but {} is missing",
                        sam.display()
                    )));
                }
                m.check_resume(1, stage)?;
            }
            _ => {
                let prefix = self.work.join("scrambled_idx");
                self.aligners
                    .bowtie2_build(&fa, &prefix, self.params.max_cores)?;
                self.aligners
                    .bowtie2_local(&prefix, &queries, &sam, self.params.max_cores)?;
                StageMarker::completed(1).save(&marker_path)?;
            }
        }

        let reader = BufReader::new(File::open(&sam).map_err(|e| Error::io(e, &sam))?);
        let mut hits = Vec::new();
        for line in reader.lines() {
            let line = line.map_err(|e| Error::io(e, &sam))?;
            if let Some(hit) = io::sam::scrambled_hit(&line)? {
                hits.push(hit);
            }
        }
        filter::scrambled_pass(junctions, &hits, self.model);
        Ok(())
    }

    /// Recompute every anchor read's confidence after the filters settle.
    fn refresh_confidence(&self, junctions: &mut [Junction]) -> Result<(), Error> {
        for j in junctions.iter_mut() {
            let gene_5p = self.model.gene_of_exon(j.key.ex_5p)?;
            let gene_3p = self.model.gene_of_exon(j.key.ex_3p)?;
            for ar in &mut j.anchor_reads {
                let hc = is_high_confidence(self.model, ar, gene_5p, gene_3p);
                ar.high_confidence = hc;
            }
        }
        Ok(())
    }

    /// Realign the read pool against each fusion's padded two-gene
    /// reference and tally pair classes.
    fn quantify(
        &self,
        fusions: &mut [CompiledFusion],
        reads_fa: &Path,
        libsize: u64,
    ) -> Result<(), Error> {
        if fusions.is_empty() {
            return Ok(());
        }
        let budget = ComputeBudget::plan(self.params.max_cores, self.params.max_mem_gb, 6, 2, 4);
        let threads = budget.cores.first().copied().unwrap_or(1);
        let jobs: Vec<(u32, u32)> = fusions
            .iter()
            .map(|f| (f.junction.key.ex_5p, f.junction.key.ex_3p))
            .collect();
        let summaries = compute::run_indexed(jobs, budget.splits, |i, (ex_5p, ex_3p)| {
            let gene_a = self.model.gene_of_exon(ex_5p)?;
            let gene_b = self.model.gene_of_exon(ex_3p)?;
            let map = PartitionMap::new(self.model, gene_a, ex_5p, gene_b, ex_3p)?;

            let ref_fa = self.work.join(format!("quant_ref_{i}.fa"));
            let sequence = PartitionMap::reference(self.model, gene_a, gene_b)?;
            fs::write(
                &ref_fa,
                format!(">{}_{}\n{}\n", gene_a.name, gene_b.name, sequence),
            )
            .map_err(|e| Error::io(e, &ref_fa))?;

            let prefix = self.work.join(format!("quant_idx_{i}"));
            self.aligners.bowtie2_build(&ref_fa, &prefix, threads)?;
            let sam = self.work.join(format!("quant_sam_{i}.sam"));
            self.aligners.bowtie2_local(&prefix, reads_fa, &sam, threads)?;

            let reader = BufReader::new(File::open(&sam).map_err(|e| Error::io(e, &sam))?);
            let counts = tally_sam(reader, &map)?;
            Ok(QuantSummary::from_counts(counts, &map, libsize))
        })?;
        for (f, q) in fusions.iter_mut().zip(summaries) {
            f.quant = Some(q);
        }
        Ok(())
    }

    fn write_outputs(&self, fusions: &[CompiledFusion]) -> Result<(), Error> {
        let report = self
            .work
            .join(format!("{}.fusions.txt", self.params.sample_name));
        compile::write_report(fusions, self.model, &report)?;
        let pileup = self
            .work
            .join(format!("{}.pileup.txt", self.params.sample_name));
        compile::write_pileups(fusions, self.model, &pileup)?;
        info!("report written to {}", report.display());
        Ok(())
    }

    /// Remove per-split and alignment intermediates, together with the
    /// filter-stage markers whose artifacts they are; a marker must never
    /// outlive its artifact. The cluster table, junction catalog,
    /// junction-alignment table and its marker, and the readcount stay for
    /// resumes and diagnostics.
    fn cleanup(&self) -> Result<(), Error> {
        const PREFIXES: &[&str] = &[
            "reads.fa",
            "mates",
            "junctions_split_",
            "junct_idx_",
            "junct_sam_",
            "quant_",
            "probes",
            "scrambled",
            "split_reads",
            "genome.psl",
            "exome_",
            "contig_",
        ];
        for entry in fs::read_dir(&self.work).map_err(|e| Error::io(e, &self.work))? {
            let entry = entry.map_err(|e| Error::io(e, &self.work))?;
            let path = entry.path();
            if !path.is_file() {
                continue;
            }
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            if PREFIXES.iter().any(|p| name.starts_with(p)) {
                let _ = fs::remove_file(&path);
            }
        }
        let status_dir = self.params.status_dir();
        if status_dir.is_dir() {
            for entry in fs::read_dir(&status_dir).map_err(|e| Error::io(e, &status_dir))? {
                let entry = entry.map_err(|e| Error::io(e, &status_dir))?;
                let path = entry.path();
                let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                    continue;
                };
                if name.starts_with("filter_") {
                    let _ = fs::remove_file(&path);
                }
            }
        }
        Ok(())
    }
}

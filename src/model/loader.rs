//! Flat-file loader for the reference annotation bundle.
//!
//! The reference directory carries five tab-separated tables, one record per
//! line, `#`-prefixed comment lines skipped:
//!
//!   genes.txt     geneId name contig strand genomicStart genomicEnd
//!   exons.txt     exonId geneId start end genomicStart genomicEnd sequence
//!   isoforms.txt  isoformId geneId cdsStartOffset cdsEndOffset exonIdCsv
//!   repeats.txt   geneId start end
//!   homology.txt  geneIdA geneIdB startA endA startB endB
//!
//! repeats.txt and homology.txt are optional; the rest are required.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use log::info;

use crate::error::Error;
use crate::model::{GeneModel, HomologyBlock, ModelBuilder};

pub fn load(reference_dir: &Path) -> Result<GeneModel, Error> {
    let mut builder = ModelBuilder::new();

    let genes = reference_dir.join("genes.txt");
    for_each_record(&genes, 6, |fields, line_no| {
        builder.add_gene(
            parse(fields[0], "geneId", &genes, line_no)?,
            fields[1],
            fields[2],
            fields[3]
                .parse()
                .map_err(|e: String| record_err(&genes, line_no, &e))?,
            parse(fields[4], "genomicStart", &genes, line_no)?,
            parse(fields[5], "genomicEnd", &genes, line_no)?,
        );
        Ok(())
    })?;

    let exons = reference_dir.join("exons.txt");
    for_each_record(&exons, 7, |fields, line_no| {
        builder.add_exon(
            parse(fields[0], "exonId", &exons, line_no)?,
            parse(fields[1], "geneId", &exons, line_no)?,
            parse(fields[2], "start", &exons, line_no)?,
            parse(fields[3], "end", &exons, line_no)?,
            parse(fields[4], "genomicStart", &exons, line_no)?,
            parse(fields[5], "genomicEnd", &exons, line_no)?,
            fields[6],
        );
        Ok(())
    })?;

    let isoforms = reference_dir.join("isoforms.txt");
    for_each_record(&isoforms, 5, |fields, line_no| {
        let mut exon_ids = Vec::new();
        for tok in fields[4].split(',').filter(|t| !t.is_empty()) {
            exon_ids.push(parse(tok, "exonId", &isoforms, line_no)?);
        }
        builder.add_isoform(
            parse(fields[1], "geneId", &isoforms, line_no)?,
            fields[0],
            &exon_ids,
            parse(fields[2], "cdsStartOffset", &isoforms, line_no)?,
            parse(fields[3], "cdsEndOffset", &isoforms, line_no)?,
        );
        Ok(())
    })?;

    let repeats = reference_dir.join("repeats.txt");
    if repeats.exists() {
        for_each_record(&repeats, 3, |fields, line_no| {
            builder.add_repeat_region(
                parse(fields[0], "geneId", &repeats, line_no)?,
                parse(fields[1], "start", &repeats, line_no)?,
                parse(fields[2], "end", &repeats, line_no)?,
            );
            Ok(())
        })?;
    }

    let homology = reference_dir.join("homology.txt");
    if homology.exists() {
        for_each_record(&homology, 6, |fields, line_no| {
            builder.add_homology(
                parse(fields[0], "geneIdA", &homology, line_no)?,
                parse(fields[1], "geneIdB", &homology, line_no)?,
                HomologyBlock {
                    start_a: parse(fields[2], "startA", &homology, line_no)?,
                    end_a: parse(fields[3], "endA", &homology, line_no)?,
                    start_b: parse(fields[4], "startB", &homology, line_no)?,
                    end_b: parse(fields[5], "endB", &homology, line_no)?,
                },
            );
            Ok(())
        })?;
    }

    let model = builder.finish()?;
    info!("loaded gene model: {} genes", model.num_genes());
    Ok(model)
}

fn for_each_record<F>(path: &Path, min_fields: usize, mut f: F) -> Result<(), Error>
where
    F: FnMut(&[&str], usize) -> Result<(), Error>,
{
    let file = File::open(path).map_err(|e| Error::io(e, path))?;
    for (idx, line) in BufReader::new(file).lines().enumerate() {
        let line = line.map_err(|e| Error::io(e, path))?;
        let line_no = idx + 1;
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let fields: Vec<&str> = line.split('\t').collect();
        if fields.len() < min_fields {
            return Err(record_err(
                path,
                line_no,
                &format!("expected {} fields, got {}", min_fields, fields.len()),
            ));
        }
        f(&fields, line_no)?;
    }
    Ok(())
}

fn parse<T: std::str::FromStr>(
    token: &str,
    what: &str,
    path: &Path,
    line_no: usize,
) -> Result<T, Error> {
    token
        .parse()
        .map_err(|_| record_err(path, line_no, &format!("bad {what} '{token}'")))
}

fn record_err(path: &Path, line_no: usize, msg: &str) -> Error {
    Error::Record(format!("{}:{line_no}: {msg}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::tempdir;

    fn write_reference(dir: &Path) {
        let mut genes = File::create(dir.join("genes.txt")).unwrap();
        writeln!(genes, "# geneId name contig strand gStart gEnd").unwrap();
        writeln!(genes, "1\tTMPRSS2\tchr21\t-\t41464300\t41531116").unwrap();
        writeln!(genes, "2\tERG\tchr21\t-\t38380027\t38661780").unwrap();

        let mut exons = File::create(dir.join("exons.txt")).unwrap();
        writeln!(
            exons,
            "11\t1\t0\t100\t41531016\t41531116\t{}",
            "A".repeat(100)
        )
        .unwrap();
        writeln!(
            exons,
            "21\t2\t0\t100\t38661680\t38661780\t{}",
            "C".repeat(100)
        )
        .unwrap();

        let mut isoforms = File::create(dir.join("isoforms.txt")).unwrap();
        writeln!(isoforms, "NM_005656\t1\t10\t20\t11").unwrap();
        writeln!(isoforms, "NM_004449\t2\t-1\t-1\t21").unwrap();

        let mut repeats = File::create(dir.join("repeats.txt")).unwrap();
        writeln!(repeats, "1\t5\t25").unwrap();

        let mut homology = File::create(dir.join("homology.txt")).unwrap();
        writeln!(homology, "1\t2\t0\t50\t10\t60").unwrap();
    }

    #[test]
    fn test_load_reference_bundle() {
        let dir = tempdir().unwrap();
        write_reference(dir.path());

        let model = load(dir.path()).unwrap();
        assert_eq!(model.num_genes(), 2);

        let tmprss2 = model.gene_by_name("TMPRSS2").unwrap();
        assert_eq!(tmprss2.id, 1);
        assert_eq!(tmprss2.contig, "chr21");
        assert_eq!(tmprss2.isoforms.len(), 1);
        assert_eq!(tmprss2.repeat_regions, vec![(5, 25)]);
        assert!(tmprss2.homology.contains_key(&2));

        let erg = model.gene_by_name("ERG").unwrap();
        assert!(erg.isoforms[0].is_noncoding());
        // symmetric homology entry
        assert!(erg.homology.contains_key(&1));
    }

    #[test]
    fn test_missing_required_table_is_io_error() {
        let dir = tempdir().unwrap();
        assert!(load(dir.path()).is_err());
    }

    #[test]
    fn test_malformed_line_is_record_error() {
        let dir = tempdir().unwrap();
        write_reference(dir.path());
        let mut genes = std::fs::OpenOptions::new()
            .append(true)
            .open(dir.path().join("genes.txt"))
            .unwrap();
        writeln!(genes, "not\tenough").unwrap();

        let err = load(dir.path()).unwrap_err();
        assert!(err.to_string().contains("genes.txt"));
    }
}

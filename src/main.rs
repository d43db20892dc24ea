// src/main.rs
use std::collections::BTreeMap;
use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Parser;
use log::{info, warn};
use serde::Serialize;

use ephyskit::acq::{BatchOutcome, BatchPipeline, JsonTraceSource, Modality, Progress};
use ephyskit::record::Record;
use ephyskit::settings::AnalysisSettings;

#[derive(Debug, Parser)]
#[command(name = "ephyskit", version, about = "Batch analysis of decoded electrophysiology sweeps")]
struct Cli {
    /// Settings JSON; defaults apply when omitted
    #[arg(long)]
    settings: Option<PathBuf>,
    /// JSON array of decoded traces
    #[arg(long)]
    traces: PathBuf,
    /// Directory for records.json and one CSV per table
    #[arg(long, default_value = "ephyskit-out")]
    out: PathBuf,
    /// Worker threads (defaults to one per core)
    #[arg(long)]
    threads: Option<usize>,
    /// Analyzer tag overriding the settings file
    #[arg(long)]
    analysis: Option<String>,
    /// Evoked currents recorded with the field potentials in --traces; runs both and joins them
    #[arg(long, conflicts_with = "analysis")]
    evoked_traces: Option<PathBuf>,
}

#[derive(Serialize)]
struct RecordsFile {
    analysis: String,
    records: BTreeMap<u32, Record>,
    errors: BTreeMap<u32, String>,
}

impl RecordsFile {
    fn new(analysis: impl Into<String>, outcome: &BatchOutcome) -> Self {
        Self {
            analysis: analysis.into(),
            records: outcome
                .records()
                .iter()
                .map(|(acq, r)| (*acq, r.to_record()))
                .collect(),
            errors: outcome
                .failures()
                .map(|(acq, err)| (acq, err.to_string()))
                .collect(),
        }
    }

    fn write(&self, path: &Path) -> Result<()> {
        let file = File::create(path).with_context(|| format!("creating {}", path.display()))?;
        serde_json::to_writer_pretty(BufWriter::new(file), self)
            .with_context(|| format!("writing {}", path.display()))
    }
}

fn open_traces(path: &Path) -> Result<JsonTraceSource> {
    JsonTraceSource::open(path).with_context(|| format!("loading traces from {}", path.display()))
}

fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    if let Some(threads) = cli.threads {
        rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .build_global()
            .context("could not size the worker pool")?;
    }

    let mut settings = match &cli.settings {
        Some(path) => AnalysisSettings::load(path)
            .with_context(|| format!("reading settings from {}", path.display()))?,
        None => AnalysisSettings::default(),
    };
    if let Some(tag) = &cli.analysis {
        settings.analysis = tag.parse().with_context(|| format!("--analysis {tag}"))?;
    }
    let progress: Progress<'_> = &|finished, total| {
        if finished == total || finished % 50 == 0 {
            info!("{finished}/{total} acquisitions analyzed");
        }
    };
    std::fs::create_dir_all(&cli.out)
        .with_context(|| format!("creating {}", cli.out.display()))?;

    let source = open_traces(&cli.traces)?;
    let (files, aggregate) = match &cli.evoked_traces {
        Some(evoked_path) => {
            let report = BatchPipeline::new(source, settings)
                .run_paired(open_traces(evoked_path)?, Some(progress))
                .context("paired analysis failed")?;
            let files = vec![
                ("records.json", RecordsFile::new(Modality::Lfp.name(), &report.field)),
                (
                    "evoked_records.json",
                    RecordsFile::new(Modality::Evoked.name(), &report.evoked),
                ),
            ];
            (files, report.aggregate)
        }
        None => {
            let analysis = settings.analysis.name();
            let report = BatchPipeline::new(source, settings)
                .run(Some(progress))
                .context("batch analysis failed")?;
            (vec![("records.json", RecordsFile::new(analysis, &report.outcome))], report.aggregate)
        }
    };

    let mut count = 0;
    for (name, records) in &files {
        for (acq, err) in &records.errors {
            warn!("{} acquisition {acq} skipped: {err}", records.analysis);
        }
        records.write(&cli.out.join(name))?;
        count += records.records.len();
    }

    let written = aggregate
        .write_csv(&cli.out)
        .context("writing aggregate tables")?;
    info!(
        "wrote {count} records and {} tables to {}",
        written.len(),
        cli.out.display()
    );
    Ok(())
}

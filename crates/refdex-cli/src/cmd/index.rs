//! `refdex index` - load a dump into the index

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Args;
use refdex_core::SharedProgress;
use refdex_crossref::{
    Compression, Format, IndexEngine, MemoryEngine, PipelineConfig, PipelineResult, load, run,
};

use super::admin::{create_index, delete_index};
use super::{EsArgs, load_settings};
use crate::config::Config;

#[derive(Args, Debug)]
pub struct IndexArgs {
    /// Dump file to index; `-` reads stdin
    #[arg(short, long, conflicts_with = "dir")]
    pub file: Option<PathBuf>,

    /// Directory of dump files (json, ndjson, gz, gzip; searched recursively)
    #[arg(short, long)]
    pub dir: Option<PathBuf>,

    /// Wire shape: json (enveloped items array) or ndjson (default: detect per file)
    #[arg(long)]
    pub format: Option<Format>,

    /// Compression: none or gzip (default: from file extension)
    #[arg(long)]
    pub compression: Option<Compression>,

    /// Target index (default: from config)
    #[arg(short, long)]
    pub index: Option<String>,

    /// Number of sources decoded in parallel
    #[arg(short, long)]
    pub workers: Option<usize>,

    /// Delete and recreate the index before loading
    #[arg(long)]
    pub remove_index: bool,

    /// Create the index first if it does not exist
    #[arg(long)]
    pub create_index: bool,

    /// JSON file with settings and mappings used when creating the index
    #[arg(long)]
    pub settings: Option<PathBuf>,

    /// Decode and transform everything but index nothing
    #[arg(long)]
    pub dry_run: bool,

    #[command(flatten)]
    pub es: EsArgs,
}

impl IndexArgs {
    fn pipeline_config(&self, config: &Config) -> PipelineConfig {
        let mut pipeline = config.pipeline_config();
        if let Some(index) = &self.index {
            pipeline.index = index.clone();
        }
        if let Some(workers) = self.workers {
            pipeline.workers = workers.max(1);
        }
        pipeline
    }
}

pub fn run_index(args: IndexArgs, config: &Config, progress: &SharedProgress) -> Result<ExitCode> {
    let result = index(args, config, progress)?;
    if result.interrupted {
        log::warn!("Shutdown requested, stopped early");
        return Ok(ExitCode::from(130));
    }
    if let Some(err) = &result.error {
        log::error!("Indexing failed: {}", err.headline);
        return Ok(ExitCode::from(1));
    }
    Ok(ExitCode::SUCCESS)
}

fn index(args: IndexArgs, config: &Config, progress: &SharedProgress) -> Result<PipelineResult> {
    let pipeline = args.pipeline_config(config);
    let sources = load(
        args.file.as_deref(),
        args.dir.as_deref(),
        args.format.unwrap_or_default(),
        args.compression.unwrap_or_default(),
        Box::new(std::io::stdin()),
    )
    .context("Invalid input")?;

    let engine: Arc<dyn IndexEngine> = if args.dry_run {
        log::info!("Dry run: documents are counted, not indexed");
        Arc::new(MemoryEngine::discarding())
    } else {
        args.es.connect(config)?
    };

    if args.remove_index || args.create_index {
        let settings = load_settings(args.settings.as_ref())?;
        if args.remove_index {
            delete_index(engine.as_ref(), &pipeline.index)?;
        }
        create_index(engine.as_ref(), &pipeline.index, &settings)?;
    }

    Ok(run(sources, &pipeline, engine, progress))
}

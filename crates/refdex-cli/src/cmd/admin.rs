//! `create-index` and `delete-index`

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;
use refdex_crossref::{IndexEngine, IndexSettings};
use refdex_crossref::engine::{CreateOutcome, DeleteOutcome};

use super::{EsArgs, load_settings};
use crate::config::Config;

#[derive(Args, Debug)]
pub struct CreateIndexArgs {
    /// Index name (default: from config)
    #[arg(short, long)]
    pub index: Option<String>,

    /// JSON file with settings and mappings (default: built-in)
    #[arg(long)]
    pub settings: Option<PathBuf>,

    #[command(flatten)]
    pub es: EsArgs,
}

#[derive(Args, Debug)]
pub struct DeleteIndexArgs {
    /// Index name (default: from config)
    #[arg(short, long)]
    pub index: Option<String>,

    #[command(flatten)]
    pub es: EsArgs,
}

pub fn create(args: CreateIndexArgs, config: &Config) -> Result<()> {
    let index = args.index.unwrap_or_else(|| config.pipeline.index.clone());
    let settings = load_settings(args.settings.as_ref())?;
    let engine = args.es.connect(config)?;
    create_index(engine.as_ref(), &index, &settings)
}

pub fn delete(args: DeleteIndexArgs, config: &Config) -> Result<()> {
    let index = args.index.unwrap_or_else(|| config.pipeline.index.clone());
    let engine = args.es.connect(config)?;
    delete_index(engine.as_ref(), &index)
}

pub fn create_index(
    engine: &dyn IndexEngine,
    index: &str,
    settings: &IndexSettings,
) -> Result<()> {
    match engine
        .create_index(index, settings)
        .with_context(|| format!("Failed to create index {index}"))?
    {
        CreateOutcome::Created => log::info!("Created index {index}"),
        CreateOutcome::AlreadyExists => log::info!("Index {index} already exists"),
    }
    Ok(())
}

pub fn delete_index(engine: &dyn IndexEngine, index: &str) -> Result<()> {
    match engine
        .delete_index(index)
        .with_context(|| format!("Failed to delete index {index}"))?
    {
        DeleteOutcome::Deleted => log::info!("Deleted index {index}"),
        DeleteOutcome::NotFound => log::info!("Index {index} does not exist"),
    }
    Ok(())
}

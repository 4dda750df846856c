//! Tracking and indexing commands.

use anyhow::{bail, Result};
use indexkit_core::batch::{self, BatchContext};

use crate::config::Config;
use crate::progress::{IndexProgressEvent, ProgressMode};
use crate::workspace::Workspace;

/// `indexkit track`: rebuild tracking from the datasources (or start
/// tracking one datasource), queueing every item for indexing.
pub async fn run_track(
    config: &Config,
    index_id: &str,
    datasource: Option<&str>,
    progress: ProgressMode,
) -> Result<()> {
    let workspace = Workspace::open(config).await?;
    let index = workspace.index(index_id)?;
    let reporter = progress.reporter();

    let datasources = match datasource {
        Some(ds) => vec![ds.to_string()],
        None => index.datasource_ids(),
    };
    for ds in &datasources {
        reporter.report(IndexProgressEvent::Tracking {
            index: index.id().to_string(),
            datasource: ds.clone(),
        });
    }
    // A full rebuild also drops rows of items that no longer exist.
    let ok = match datasource {
        Some(ds) => index.start_tracking(ds).await?,
        None => index.rebuild_tracker().await?,
    };
    if !ok {
        bail!("Tracking state of index '{}' could not be updated", index.id());
    }

    let status = index.status().await?;
    println!(
        "Tracking {} items of index '{}', {} pending.",
        status.total,
        index.id(),
        status.remaining
    );
    workspace.close().await;
    Ok(())
}

pub struct IndexOptions<'a> {
    pub batch_size: usize,
    /// `None` indexes everything pending.
    pub limit: Option<usize>,
    pub datasource: Option<&'a str>,
    pub progress: ProgressMode,
}

/// `indexkit index`: run a batch over pending items.
pub async fn run_index(config: &Config, index_id: &str, options: IndexOptions<'_>) -> Result<()> {
    let workspace = Workspace::open(config).await?;
    let index = workspace.index(index_id)?;
    let reporter = options.progress.reporter();

    let mut context = BatchContext::new(options.batch_size, options.limit);
    if let Some(ds) = options.datasource {
        context = context.for_datasource(ds);
    }

    let context = batch::run(index, context, |step| {
        reporter.report(IndexProgressEvent::from_batch(index.id(), step));
    })
    .await;

    println!("{}", context.summary());
    workspace.close().await;

    if let Some(error) = context.error {
        bail!("Indexing of '{}' aborted: {}", index_id, error);
    }
    Ok(())
}

/// `indexkit reindex`: queue everything again, keeping the indexed data.
pub async fn run_reindex(config: &Config, index_id: &str) -> Result<()> {
    let workspace = Workspace::open(config).await?;
    let index = workspace.index(index_id)?;
    index.reindex().await?;
    let status = index.status().await?;
    println!(
        "Queued {} items of index '{}' for reindexing.",
        status.remaining,
        index.id()
    );
    workspace.close().await;
    Ok(())
}

/// `indexkit clear`: delete indexed data and queue everything again.
pub async fn run_clear(config: &Config, index_id: &str) -> Result<()> {
    let workspace = Workspace::open(config).await?;
    let index = workspace.index(index_id)?;
    index.clear().await?;
    let status = index.status().await?;
    println!(
        "Cleared index '{}'; {} items queued.",
        index.id(),
        status.remaining
    );
    workspace.close().await;
    Ok(())
}

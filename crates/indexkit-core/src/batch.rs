//! Resumable batch indexing.
//!
//! A batch run is a sequence of [`process`] calls sharing one
//! [`BatchContext`]. The context holds all progress, so it can be stored
//! between calls (e.g. by a scheduler) and the run resumed later.

use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use crate::index::Index;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchContext {
    /// Items per step.
    pub batch_size: usize,
    /// Cap on items for the whole run, `None` for everything pending.
    pub limit: Option<usize>,
    #[serde(default)]
    pub datasource: Option<String>,
    /// Items this run will handle at most; set on the first step.
    #[serde(default)]
    pub max: Option<usize>,
    /// Items handled so far, successful or not.
    #[serde(default)]
    pub progress: usize,
    #[serde(default)]
    pub indexed: usize,
    #[serde(default)]
    pub not_indexed: usize,
    #[serde(default)]
    pub finished: bool,
    /// Set when a step failed and the run was given up.
    #[serde(default)]
    pub error: Option<String>,
}

impl BatchContext {
    pub fn new(batch_size: usize, limit: Option<usize>) -> Self {
        Self {
            batch_size: batch_size.max(1),
            limit,
            ..Self::default()
        }
    }

    pub fn for_datasource(mut self, datasource: impl Into<String>) -> Self {
        self.datasource = Some(datasource.into());
        self
    }

    /// End the run, counting items not reached as not indexed.
    fn give_up(&mut self) {
        let max = self.max.unwrap_or(self.progress);
        self.not_indexed += max.saturating_sub(self.progress);
        self.progress = self.progress.max(max);
        self.finished = true;
    }

    fn abort(&mut self, message: String) {
        self.give_up();
        self.error = Some(message);
    }

    /// Human readable outcome of a finished run.
    pub fn summary(&self) -> String {
        let mut parts = Vec::new();
        if self.indexed > 0 || self.not_indexed == 0 {
            parts.push(match self.indexed {
                1 => "Successfully indexed 1 item.".to_string(),
                n => format!("Successfully indexed {} items.", n),
            });
        }
        if self.not_indexed > 0 {
            parts.push(match self.not_indexed {
                1 => "1 item could not be indexed. Check the logs for details.".to_string(),
                n => format!("{} items could not be indexed. Check the logs for details.", n),
            });
        }
        parts.join(" ")
    }
}

/// Run one step: index at most `min(batch_size, max - progress)` pending
/// items. Any failure ends the run, and so does a step that indexed
/// nothing, since failed items stay first in the queue. Items not reached
/// count as not indexed.
pub async fn process(index: &Index, context: &mut BatchContext) {
    if context.finished {
        return;
    }
    let datasource = context.datasource.clone();

    let max = match context.max {
        Some(max) => max,
        None => match index.tracker().remaining_count(datasource.as_deref()).await {
            Ok(remaining) => {
                let max = context.limit.map_or(remaining, |limit| remaining.min(limit));
                context.max = Some(max);
                max
            }
            Err(e) => {
                error!(index = %index.id(), error = %e, "batch could not be started");
                context.abort(e.to_string());
                return;
            }
        },
    };

    let size = context.batch_size.min(max.saturating_sub(context.progress));
    if size == 0 {
        context.finished = true;
        return;
    }

    match index.index_items(Some(size), datasource.as_deref()).await {
        Ok(report) => {
            context.progress += report.attempted;
            context.indexed += report.indexed;
            context.not_indexed += report.attempted - report.indexed.min(report.attempted);
            if report.attempted > 0 && report.indexed == 0 {
                warn!(
                    index = %index.id(),
                    attempted = report.attempted,
                    "no item of the step could be indexed, stopping the batch"
                );
                context.give_up();
            } else if report.attempted == 0 || context.progress >= max {
                context.finished = true;
            }
            if context.finished {
                info!(
                    index = %index.id(),
                    indexed = context.indexed,
                    not_indexed = context.not_indexed,
                    "batch finished"
                );
            }
        }
        Err(e) => {
            error!(
                index = %index.id(),
                progress = context.progress,
                error = %e,
                "batch aborted"
            );
            context.abort(e.to_string());
        }
    }
}

/// Drive [`process`] until the run is finished, calling `on_step` after
/// every step.
pub async fn run(
    index: &Index,
    mut context: BatchContext,
    mut on_step: impl FnMut(&BatchContext),
) -> BatchContext {
    while !context.finished {
        process(index, &mut context).await;
        on_step(&context);
    }
    context
}

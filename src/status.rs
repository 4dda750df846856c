//! Tracking overview: how much of each index is indexed, and what is still
//! pending. Used by `indexkit status`.

use anyhow::Result;
use indexkit_core::Index;
use sqlx::SqlitePool;

use crate::config::Config;
use crate::progress::format_number;
use crate::workspace::Workspace;

struct DatasourceStats {
    datasource: String,
    total: usize,
    indexed: usize,
    remaining: usize,
    last_indexed: Option<i64>,
}

pub async fn run_status(config: &Config, index_id: Option<&str>) -> Result<()> {
    let workspace = Workspace::open(config).await?;
    let indexes: Vec<_> = match index_id {
        Some(id) => vec![workspace.index(id)?.clone()],
        None => workspace.indexes().cloned().collect(),
    };

    println!("indexkit status");
    println!("===============");
    println!();
    println!("  Database:    {}", config.db.path.display());

    if indexes.is_empty() {
        println!();
        println!("  No indexes configured.");
    }

    for index in &indexes {
        let status = index.status().await?;
        println!();
        println!(
            "  Index {}{}",
            index.id(),
            match (index.is_enabled(), index.is_read_only()) {
                (false, _) => "  (disabled)",
                (true, true) => "  (read-only)",
                (true, false) => "",
            }
        );
        println!("    Server:    {}", index.backend().id());
        println!("    Tracked:   {}", format_number(status.total as u64));
        println!(
            "    Indexed:   {} / {} ({}%)",
            format_number(status.indexed as u64),
            format_number(status.total as u64),
            if status.total > 0 {
                status.indexed * 100 / status.total
            } else {
                0
            }
        );
        println!("    Pending:   {}", format_number(status.remaining as u64));

        let stats = datasource_stats(workspace.pool(), index).await?;
        if !stats.is_empty() {
            println!();
            println!(
                "    {:<20} {:>8} {:>8} {:>8}   {}",
                "DATASOURCE", "TRACKED", "INDEXED", "PENDING", "LAST INDEXED"
            );
            println!("    {}", "-".repeat(66));
            for s in &stats {
                let last = match s.last_indexed {
                    Some(ts) => format_ts_relative(ts),
                    None => "never".to_string(),
                };
                println!(
                    "    {:<20} {:>8} {:>8} {:>8}   {}",
                    s.datasource, s.total, s.indexed, s.remaining, last
                );
            }
        }
    }

    println!();
    workspace.close().await;
    Ok(())
}

async fn datasource_stats(pool: &SqlitePool, index: &Index) -> Result<Vec<DatasourceStats>> {
    let mut stats = Vec::new();
    for datasource in index.datasource_ids() {
        let tracker = index.tracker();
        let last_indexed: Option<i64> = sqlx::query_scalar(
            "SELECT MAX(indexed_at) FROM indexed_items WHERE index_id = ? AND datasource = ?",
        )
        .bind(index.id())
        .bind(&datasource)
        .fetch_one(pool)
        .await?;
        stats.push(DatasourceStats {
            total: tracker.total_count(Some(&datasource)).await?,
            indexed: tracker.indexed_count(Some(&datasource)).await?,
            remaining: tracker.remaining_count(Some(&datasource)).await?,
            last_indexed,
            datasource,
        });
    }
    Ok(stats)
}

/// Format a Unix timestamp relative to now (e.g. "3 hours ago").
fn format_ts_relative(ts: i64) -> String {
    let now = chrono::Utc::now().timestamp();
    let delta = now - ts;

    if delta < 0 {
        return format_ts_iso(ts);
    }

    if delta < 60 {
        "just now".to_string()
    } else if delta < 3600 {
        let mins = delta / 60;
        format!("{} min{} ago", mins, if mins == 1 { "" } else { "s" })
    } else if delta < 86400 {
        let hours = delta / 3600;
        format!("{} hour{} ago", hours, if hours == 1 { "" } else { "s" })
    } else if delta < 86400 * 30 {
        let days = delta / 86400;
        format!("{} day{} ago", days, if days == 1 { "" } else { "s" })
    } else {
        format_ts_iso(ts)
    }
}

fn format_ts_iso(ts: i64) -> String {
    chrono::DateTime::from_timestamp(ts, 0)
        .map(|dt| dt.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| ts.to_string())
}

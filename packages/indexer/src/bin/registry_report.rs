use anyhow::{Context, Result};
use colored::Colorize;
use std::collections::BTreeMap;
use std::env;

use registry_indexer::db::{Database, StoreSettings};
use registry_indexer::models::{Record, RecordQuery};

const TOP_N: u32 = 10;

/// Parse a comma separated id list, ignoring blanks
fn parse_hidden_ids(raw: &str) -> Result<Vec<u64>> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| s.parse::<u64>().with_context(|| format!("HIDDEN_IDS entry '{}' is not a number", s)))
        .collect()
}

#[tokio::main]
async fn main() -> Result<()> {
    registry_indexer::utils::logger::init_logger(registry_indexer::utils::logger::REPORT_FILTER);

    // Load environment variables from .env file if present
    dotenv::dotenv().ok();

    let database_url = env::var("DATABASE_URL").unwrap_or_else(|_| "sqlite://data/registry.db".to_string());
    let hidden_ids = parse_hidden_ids(&env::var("HIDDEN_IDS").unwrap_or_default())?;

    let db = Database::new(&database_url)
        .await?
        .with_settings(StoreSettings {
            hidden_ids: hidden_ids.into_iter().collect(),
            ..StoreSettings::default()
        })
        .migrate()
        .await?;

    println!("{}", "=".repeat(80).bright_blue());
    println!("{}", "IDENTITY REGISTRY REPLICA".bold().bright_green());
    println!("{}", database_url.bright_cyan());
    println!("{}", "=".repeat(80).bright_blue());

    let total = db.count_records().await?;
    let public = db.get_all_records(true).await?;
    let watermark = db.get_watermark(0).await?;
    let confirmed = db.get_confirmed_block(0).await?;

    println!("  {}: {}", "Records".yellow().bold(), total.to_string().cyan().bold());
    println!("  {}: {}", "Public".yellow().bold(), public.len().to_string().cyan());
    println!("  {}: {}", "Hidden".yellow().bold(), db.hidden_ids().len().to_string().cyan());
    println!("  {}: {}", "Watermark".yellow().bold(), watermark.to_string().cyan());
    let lag = watermark.saturating_sub(confirmed);
    let confirmed_text = if lag == 0 {
        confirmed.to_string().green()
    } else {
        format!("{} ({} blocks behind)", confirmed, lag).red()
    };
    println!("  {}: {}", "Confirmed".yellow().bold(), confirmed_text);

    print_categories(&public);

    let top = db
        .query_records(&RecordQuery::default().sorted_by("score", "desc").page(1, TOP_N))
        .await?;
    println!("\n{}", format!("TOP {} BY SCORE", TOP_N).bold().bright_green());
    for (rank, record) in top.records.iter().enumerate() {
        println!(
            "  {:>2}. {} {} {}",
            rank + 1,
            format!("#{}", record.id).bright_black(),
            record.display_name.cyan(),
            format!("{:.1}", record.score).yellow()
        );
    }
    if top.records.is_empty() {
        println!("  {}", "No records yet".bright_yellow());
    }

    println!("{}", "=".repeat(80).bright_blue());
    db.close().await;
    Ok(())
}

fn print_categories(records: &[Record]) {
    let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
    for record in records {
        *counts.entry(record.category.as_str()).or_default() += 1;
    }

    println!("\n{}", "CATEGORIES".bold().bright_green());
    let widest = counts.values().copied().max().unwrap_or(1).max(1);
    for (category, count) in counts {
        let bar = "▇".repeat((count * 40).div_ceil(widest));
        println!("  {:<16} {} {}", category.yellow(), bar.bright_blue(), count);
    }
}

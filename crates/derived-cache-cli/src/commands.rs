use anyhow::{Context, Result};
use colored::Colorize;
use comfy_table::{Cell, Color, Table};
use derived_cache::{
    CacheManager, CacheStats, CanonicalKeyDeriver, EntryInfo, FileStore, KeyDeriver, SortBy,
};
use serde_json::Value;
use std::time::{Duration, SystemTime};

pub type JsonCache = CacheManager<Value>;

pub async fn put(cache: &JsonCache, key: &str, raw: &str, ttl_secs: Option<u64>) -> Result<()> {
    let value: Value =
        serde_json::from_str(raw).with_context(|| format!("value is not valid JSON: {}", raw))?;

    match ttl_secs {
        Some(secs) => cache.set_with_ttl(key, value, Duration::from_secs(secs)),
        None => cache.set(key, value),
    }
    cache.flush_persistence().await;

    println!("{} Stored '{}'", "✓".bright_green(), key.bright_cyan());
    Ok(())
}

pub async fn get(cache: &JsonCache, key: &str) -> Result<()> {
    match cache.get(key).await {
        Some(value) => println!("{}", serde_json::to_string_pretty(&value)?),
        None => println!("{} No live entry for '{}'", "✗".bright_red(), key),
    }
    Ok(())
}

pub async fn delete(cache: &JsonCache, key: &str) -> Result<()> {
    // A fresh process only knows persisted entries after loading them
    let known = cache.get(key).await.is_some();
    cache.delete(key).await;

    if known {
        println!("{} Deleted '{}'", "✓".bright_green(), key.bright_cyan());
    } else {
        println!("{} '{}' was not cached", "→".bright_blue(), key);
    }
    Ok(())
}

pub async fn clear(cache: &JsonCache) -> Result<()> {
    cache.clear().await;
    println!(
        "{} Cleared namespace '{}'",
        "✓".bright_green(),
        cache.config().namespace.bright_cyan()
    );
    Ok(())
}

/// Promote every persisted entry of the namespace into memory
pub async fn warm(cache: &JsonCache, store: &FileStore) -> Result<usize> {
    let prefix = format!("{}:", cache.config().namespace);
    let mut loaded = 0;
    for stored_key in store.keys().await? {
        if let Some(key) = stored_key.strip_prefix(&prefix) {
            if cache.get(key).await.is_some() {
                loaded += 1;
            }
        }
    }
    tracing::debug!("Warmed {} entries from {}", loaded, store.root().display());
    Ok(loaded)
}

pub async fn stats(cache: &JsonCache, store: &FileStore) -> Result<()> {
    let loaded = warm(cache, store).await?;
    println!(
        "{} Loaded {} persisted entries",
        "→".bright_blue(),
        loaded
    );
    print_stats(&cache.stats());
    Ok(())
}

pub async fn entries(cache: &JsonCache, store: &FileStore, sort_by: SortBy) -> Result<()> {
    warm(cache, store).await?;
    let entries = cache.entries(sort_by);
    if entries.is_empty() {
        println!("{}", "No entries".bright_black());
        return Ok(());
    }
    println!("{}", entries_table(&entries));
    Ok(())
}

pub fn derive_key(prefix: &str, raw: &str) -> Result<()> {
    let input: Value =
        serde_json::from_str(raw).with_context(|| format!("input is not valid JSON: {}", raw))?;
    let deriver = CanonicalKeyDeriver::new(prefix);

    println!(
        "{} {}",
        "Canonical:".bright_yellow(),
        CanonicalKeyDeriver::canonicalize(&input)?
    );
    println!("{} {}", "Key:".bright_yellow(), deriver.derive_key(&input)?);
    Ok(())
}

fn print_stats(stats: &CacheStats) {
    let mut table = Table::new();
    table.set_header(vec!["Metric", "Value"]);
    table.add_row(vec!["Hits".to_string(), stats.hits.to_string()]);
    table.add_row(vec!["Misses".to_string(), stats.misses.to_string()]);
    table.add_row(vec![
        "Hit rate".to_string(),
        format!("{:.1}%", stats.hit_rate() * 100.0),
    ]);
    table.add_row(vec!["Evictions".to_string(), stats.evictions.to_string()]);
    table.add_row(vec!["Expirations".to_string(), stats.expirations.to_string()]);
    table.add_row(vec![
        "Persistence hits".to_string(),
        stats.persistence_hits.to_string(),
    ]);
    table.add_row(vec![
        "Persistence errors".to_string(),
        stats.persistence_errors.to_string(),
    ]);
    table.add_row(vec!["Entries".to_string(), stats.entry_count.to_string()]);
    table.add_row(vec!["Size (bytes)".to_string(), stats.size_bytes.to_string()]);
    table.add_row(vec![
        "Avg access latency".to_string(),
        format!("{:?}", stats.average_access_latency),
    ]);
    println!("{}", table);
}

fn entries_table(entries: &[EntryInfo]) -> Table {
    let mut table = Table::new();
    table.set_header(vec![
        Cell::new("Key").fg(Color::Cyan),
        Cell::new("Size").fg(Color::Cyan),
        Cell::new("Accesses").fg(Color::Cyan),
        Cell::new("Age").fg(Color::Cyan),
        Cell::new("TTL left").fg(Color::Cyan),
    ]);

    let now = SystemTime::now();
    for entry in entries {
        let age = now.duration_since(entry.created_at).unwrap_or_default();
        let left = entry.ttl.saturating_sub(age);
        table.add_row(vec![
            Cell::new(&entry.key),
            Cell::new(entry.estimated_size),
            Cell::new(entry.access_count),
            Cell::new(format!("{}s", age.as_secs())),
            Cell::new(format!("{}s", left.as_secs())),
        ]);
    }
    table
}

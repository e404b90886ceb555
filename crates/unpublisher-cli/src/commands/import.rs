use std::path::Path;

use anyhow::{Context, Result};

use unpublisher_core::content::ContentItem;
use unpublisher_core::storage::{Database, SqliteContentRepository};
use unpublisher_core::AppConfig;

/// Upsert content items from a JSON array file into the local content store
pub async fn run(config: &AppConfig, file_path: &str) -> Result<()> {
    let path = Path::new(file_path);

    if !path.exists() {
        println!("File not found: {}", file_path);
        return Ok(());
    }

    let raw = std::fs::read_to_string(path)?;
    let items: Vec<ContentItem> =
        serde_json::from_str(&raw).with_context(|| format!("invalid content file {}", file_path))?;
    println!("Found {} items in {}\n", items.len(), file_path);

    if items.is_empty() {
        return Ok(());
    }

    let db = Database::new(config).await?;
    let repo = SqliteContentRepository::new(db);

    let mut imported = 0u32;
    let mut failed = 0u32;

    for item in &items {
        match repo.upsert(item).await {
            Ok(()) => imported += 1,
            Err(e) => {
                println!("  item {}: {}", item.id, e);
                failed += 1;
            }
        }
    }

    println!("Import complete:");
    println!("  Imported: {}", imported);
    println!("  Failed: {}", failed);

    Ok(())
}

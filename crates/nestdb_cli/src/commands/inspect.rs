//! Inspect command implementation.

use nestdb_core::{DocumentVariant, FileJournal, JournalBackend, JournaledStore};
use serde::Serialize;
use std::path::Path;

/// Journal inspection result.
#[derive(Debug, Serialize)]
pub struct InspectResult {
    /// Journal path.
    pub path: String,
    /// Journal size in bytes.
    pub journal_size: u64,
    /// Collections in ID order.
    pub collections: Vec<CollectionStats>,
}

/// Statistics for a single collection.
#[derive(Debug, Serialize)]
pub struct CollectionStats {
    /// Collection ID.
    pub id: u32,
    /// Collection name.
    pub name: String,
    /// Collection kind.
    pub kind: String,
    /// Number of plain documents.
    pub documents: usize,
    /// Number of edge documents.
    pub edges: usize,
    /// Total encoded size in bytes.
    pub data_size: usize,
}

/// Runs the inspect command.
pub fn run(path: &Path, format: &str) -> Result<(), Box<dyn std::error::Error>> {
    let result = inspect(path)?;

    match format {
        "json" => {
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
        _ => {
            print_text_output(&result);
        }
    }

    Ok(())
}

/// Replays the journal at `path` and collects per-collection statistics.
pub fn inspect(path: &Path) -> Result<InspectResult, Box<dyn std::error::Error>> {
    if !path.exists() {
        return Err(format!("No journal found at {}", path.display()).into());
    }

    let journal = FileJournal::open(path)?;
    let journal_size = journal.size()?;
    let store = JournaledStore::open(Box::new(journal))?;

    let mut collections = Vec::new();
    for handle in store.collections() {
        let entries = store.entries(handle.id())?;
        let edges = entries
            .iter()
            .filter(|(variant, _)| *variant == DocumentVariant::Edge)
            .count();
        collections.push(CollectionStats {
            id: handle.id().as_u32(),
            name: handle.name().to_string(),
            kind: handle.kind().to_string(),
            documents: entries.len() - edges,
            edges,
            data_size: entries.iter().map(|(_, doc)| doc.len()).sum(),
        });
    }

    Ok(InspectResult {
        path: path.display().to_string(),
        journal_size,
        collections,
    })
}

fn print_text_output(result: &InspectResult) {
    println!("NestDB Journal Inspection");
    println!("=========================");
    println!();
    println!("Path: {}", result.path);
    println!("Size: {}", format_size(result.journal_size));
    println!();
    println!("Collections:");
    if result.collections.is_empty() {
        println!("  (none)");
    }
    for col in &result.collections {
        println!(
            "  [{}] {} ({}): {} documents, {} edges, {}",
            col.id,
            col.name,
            col.kind,
            col.documents,
            col.edges,
            format_size(col.data_size as u64)
        );
    }
}

fn format_size(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} bytes", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    }
}

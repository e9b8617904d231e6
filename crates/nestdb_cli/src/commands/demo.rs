//! Demo command implementation.

use nestdb_core::{
    AccessType, Document, DocumentVariant, FileJournal, JournaledStore, TransactionContext,
    WorkUnit, WorkUnitState,
};
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;
use tracing::info;

/// Options for the demo run.
#[derive(Debug, Clone)]
pub struct DemoOptions {
    /// Collection to write to.
    pub collection: String,
    /// Roll back the outer unit.
    pub rollback_outer: bool,
    /// Roll back the nested unit.
    pub rollback_inner: bool,
}

/// Document written by each level of the demo.
#[derive(Debug, Serialize)]
struct DemoNote<'a> {
    level: u32,
    unit: String,
    message: &'a str,
}

/// Outcome of a demo run.
#[derive(Debug)]
pub struct DemoReport {
    /// Final state of the outer unit.
    pub outer: WorkUnitState,
    /// Final state of the nested unit.
    pub inner: WorkUnitState,
    /// Context depth after both units finished.
    pub depth: u32,
    /// Documents in the collection after the run.
    pub documents: usize,
}

/// Runs the demo against the journal at `path`.
pub fn run(path: &Path, options: &DemoOptions) -> Result<(), Box<dyn std::error::Error>> {
    let report = execute(path, options)?;

    println!("NestDB Demo");
    println!("===========");
    println!();
    println!("Journal:      {}", path.display());
    println!("Collection:   {}", options.collection);
    println!("Nested unit:  {}", report.inner);
    println!("Outer unit:   {}", report.outer);
    println!("Final depth:  {}", report.depth);
    println!("Documents:    {}", report.documents);

    Ok(())
}

/// Executes the demo and returns its outcome.
pub fn execute(path: &Path, options: &DemoOptions) -> Result<DemoReport, Box<dyn std::error::Error>> {
    let store = Arc::new(JournaledStore::open(Box::new(FileJournal::open(path)?))?);
    let ctx = TransactionContext::new(store.clone());
    info!(context = %ctx.id(), path = %path.display(), "demo transaction started");

    let mut outer = WorkUnit::new(&ctx, false);
    let docs = outer.add_collection(&options.collection, AccessType::Write)?;
    outer.begin()?;
    let note = DemoNote {
        level: outer.level(),
        unit: outer.id().to_string(),
        message: "written by the outer unit",
    };
    outer.save_document(&docs, Document::encode(&note)?, DocumentVariant::Document)?;

    let inner_state = {
        let mut inner = WorkUnit::new(&ctx, false);
        let nested = inner.add_collection(&options.collection, AccessType::Read)?;
        inner.add_collection(&options.collection, AccessType::Write)?;
        inner.begin()?;
        let note = DemoNote {
            level: inner.level(),
            unit: inner.id().to_string(),
            message: "written by the nested unit",
        };
        inner.save_document(&nested, Document::encode(&note)?, DocumentVariant::Document)?;

        if options.rollback_inner {
            inner.rollback()?;
        } else {
            inner.commit(false)?;
        }
        inner.state()
    };

    if options.rollback_outer {
        outer.rollback()?;
    } else {
        outer.commit(true)?;
    }

    let documents = store.entries(docs.id())?.len();
    Ok(DemoReport {
        outer: outer.state(),
        inner: inner_state,
        depth: ctx.current_depth(),
        documents,
    })
}

//! Bulk export and import of records.
//!
//! Export pages through a type in primary-key order and hands each chunk to
//! a callback. Import adds records chunk by chunk, one transaction per chunk;
//! records whose key already exists are counted, not overwritten.

use tracing::{debug, info};

use super::connection::Connection;
use super::facade::{begin_own, finish_own, DataProvider, Op};
use crate::error::{AddOutcome, Result};
use crate::mapper::{check_fields, Record};
use crate::statement::QuerySpec;

/// Counts of one import.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ImportReport {
    pub added: usize,
    /// Records skipped because their key was already present.
    pub existing: usize,
}

impl ImportReport {
    fn merge(&mut self, other: ImportReport) {
        self.added += other.added;
        self.existing += other.existing;
    }
}

impl DataProvider {
    /// Read every record of a type, `export_chunk_size` at a time. Returns
    /// the number of records exported.
    pub async fn export<F>(&self, type_key: &str, mut on_chunk: F) -> Result<usize>
    where
        F: FnMut(Vec<Record>) -> Result<()>,
    {
        let chunk = self.options().export_chunk_size.max(1) as u64;
        let mut skip = 0u64;
        let mut exported = 0usize;
        loop {
            let page = self
                .query(type_key, &QuerySpec::new().page(skip, chunk))
                .await?;
            let rows = page.records.len();
            if rows == 0 {
                break;
            }
            exported += rows;
            skip += rows as u64;
            debug!(type_key, rows, "exported chunk");
            on_chunk(page.records)?;
            if (rows as u64) < chunk {
                break;
            }
        }
        info!(type_key, records = exported, "export finished");
        Ok(exported)
    }

    /// Every record of a type.
    pub async fn export_all(&self, type_key: &str) -> Result<Vec<Record>> {
        let mut all = Vec::new();
        self.export(type_key, |chunk| {
            all.extend(chunk);
            Ok(())
        })
        .await?;
        Ok(all)
    }

    /// Add records in chunks. A failing chunk rolls back alone; chunks
    /// before it stay committed.
    pub async fn import(&self, mut records: Vec<Record>) -> Result<ImportReport> {
        let chunk_size = self.options().export_chunk_size.max(1);
        let mut report = ImportReport::default();
        for chunk in records.chunks_mut(chunk_size) {
            report.merge(self.import_chunk(chunk).await?);
        }
        info!(added = report.added, existing = report.existing, "import finished");
        Ok(report)
    }

    async fn import_chunk(&self, chunk: &mut [Record]) -> Result<ImportReport> {
        let Some(first) = chunk.first() else {
            return Ok(ImportReport::default());
        };
        let type_key = first.type_key.clone();
        let op = Op::new("Import", &type_key);

        // Resolve every type before touching the database.
        let mut prepared = Vec::with_capacity(chunk.len());
        for record in chunk.iter() {
            let model = self.model(&record.type_key)?;
            let set = self.schema_set(&model)?;
            check_fields(&set.shape, record)?;
            prepared.push((model, set));
        }

        let checkout = self.checkout(op).await?;
        let mut guard = checkout.shared().lock().await;
        let conn: &mut dyn Connection = guard.as_mut();

        let own = begin_own(conn, op).await?;
        let mut report = ImportReport::default();
        let mut result = Ok(());
        for (record, (model, set)) in chunk.iter_mut().zip(&prepared) {
            match self.add_on(conn, op, model, set, record).await {
                Ok(AddOutcome::Added { .. }) => report.added += 1,
                Ok(AddOutcome::AlreadyExists) => report.existing += 1,
                Err(e) => {
                    result = Err(e);
                    break;
                }
            }
        }
        let report = finish_own(conn, own, op, result.map(|()| report), |_| true).await?;
        debug!(
            type_key = %type_key,
            added = report.added,
            existing = report.existing,
            "imported chunk"
        );
        Ok(report)
    }
}

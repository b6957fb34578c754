//! Translation sweep for multi-language text.
//!
//! Pages through every record of a type and fills the blank languages of
//! each multi-language property from the primary language, using a
//! caller-supplied [`Translator`]. Subtable items are swept with their
//! parent. Records that gained a value are written back with Update.

use std::collections::BTreeSet;

use async_trait::async_trait;
use futures::future::{BoxFuture, FutureExt};
use tracing::{debug, info};

use super::facade::DataProvider;
use crate::error::{Result, UpdateOutcome};
use crate::mapper::{Field, Record};
use crate::schema::{ColumnRole, TableSchema};
use crate::statement::QuerySpec;

/// Machine translation of one text.
#[async_trait]
pub trait Translator: Send + Sync {
    async fn translate(&self, text: &str, from: &str, to: &str) -> Result<String>;
}

/// Counts of one sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TranslationReport {
    /// Records visited.
    pub records: usize,
    /// Records written back.
    pub updated: usize,
    /// Language values filled.
    pub values: usize,
}

impl DataProvider {
    /// Fill blank languages of every record of a type.
    pub async fn translate_all(
        &self,
        type_key: &str,
        translator: &dyn Translator,
    ) -> Result<TranslationReport> {
        let model = self.model(type_key)?;
        let set = self.schema_set(&model)?;
        let languages = &self.options().languages;
        let source = languages.primary().to_string();
        let targets: Vec<String> = languages
            .iter()
            .filter(|l| *l != source)
            .map(str::to_string)
            .collect();
        let mut report = TranslationReport::default();
        if targets.is_empty() {
            return Ok(report);
        }

        let chunk = self.options().export_chunk_size.max(1) as u64;
        let mut skip = 0u64;
        loop {
            let page = self
                .query(type_key, &QuerySpec::new().page(skip, chunk))
                .await?;
            let rows = page.records.len();
            for mut record in page.records {
                report.records += 1;
                let filled =
                    fill_record(&set.shape, &mut record, &source, &targets, translator).await?;
                if filled == 0 {
                    continue;
                }
                report.values += filled;
                match self.update(&record).await? {
                    UpdateOutcome::Updated => report.updated += 1,
                    outcome => debug!(type_key, ?outcome, "translated record not written"),
                }
            }
            skip += rows as u64;
            if (rows as u64) < chunk {
                break;
            }
        }
        info!(
            type_key,
            records = report.records,
            updated = report.updated,
            values = report.values,
            "translation sweep finished"
        );
        Ok(report)
    }
}

/// Property paths of a table's multi-language columns.
fn language_paths(table: &TableSchema) -> Vec<&[String]> {
    let paths: BTreeSet<&[String]> = table
        .columns
        .iter()
        .filter_map(|c| match &c.role {
            ColumnRole::Language { path, .. } => Some(path.as_slice()),
            _ => None,
        })
        .collect();
    paths.into_iter().collect()
}

fn is_blank(text: Option<&String>) -> bool {
    text.map_or(true, |t| t.trim().is_empty())
}

fn fill_record<'a>(
    table: &'a TableSchema,
    record: &'a mut Record,
    source: &'a str,
    targets: &'a [String],
    translator: &'a dyn Translator,
) -> BoxFuture<'a, Result<usize>> {
    async move {
        let mut filled = 0;
        for path in language_paths(table) {
            let Some(Field::Languages(map)) = record.field_at_mut(path) else {
                continue;
            };
            let Some(text) = map.get(source).filter(|t| !t.trim().is_empty()).cloned() else {
                continue;
            };
            for target in targets {
                if !is_blank(map.get(target)) {
                    continue;
                }
                let translated = translator.translate(&text, source, target).await?;
                if !translated.trim().is_empty() {
                    map.insert(target.clone(), translated);
                    filled += 1;
                }
            }
        }
        for sub in &table.subtables {
            if let Some(Field::Collection(items)) = record.fields.get_mut(&sub.property) {
                for item in items.iter_mut() {
                    filled += fill_record(&sub.table, item, source, targets, translator).await?;
                }
            }
        }
        Ok(filled)
    }
    .boxed()
}

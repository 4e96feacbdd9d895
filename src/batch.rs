/// Batch mapping with bounded fan-out, plus the aggregate summary and the
/// ad-serving projection of the results.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use crate::cascade::Mapper;
use crate::matching::Method;
use crate::record::{InputRecord, MappingResult, Outcome};

/// A row that was not mapped, with the best candidate that was considered.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UnmappedEntry {
    pub index: usize,
    pub source_code: Option<String>,
    pub source_label: String,
    pub best_target_id: Option<String>,
    pub best_label: Option<String>,
    pub best_score: f64,
    pub method: Method,
    pub notes: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BatchSummary {
    pub total: usize,
    pub mapped: usize,
    pub unmapped: usize,
    pub invalid: usize,
    pub errors: usize,
    /// Mapped or unmapped rows whose confidence is at or above `threshold`.
    /// Invalid and error rows are counted in neither bucket.
    pub above_threshold: usize,
    pub below_threshold: usize,
    pub threshold: f64,
    pub by_method: BTreeMap<String, usize>,
    pub unmapped_audit: Vec<UnmappedEntry>,
}

/// Target-format view of a batch for downstream ad serving.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Projection {
    pub cattax: u8,
    /// Unique category ids in first-seen order
    pub categories: Vec<String>,
    /// `categories` joined with ","
    pub category_string: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct BatchResponse {
    pub rows: Vec<MappingResult>,
    pub summary: BatchSummary,
    pub projection: Projection,
    pub generated_at: DateTime<Utc>,
}

pub fn summarize(rows: &[MappingResult], threshold: f64) -> BatchSummary {
    let mut summary = BatchSummary {
        total: rows.len(),
        mapped: 0,
        unmapped: 0,
        invalid: 0,
        errors: 0,
        above_threshold: 0,
        below_threshold: 0,
        threshold,
        by_method: BTreeMap::new(),
        unmapped_audit: Vec::new(),
    };

    for (index, row) in rows.iter().enumerate() {
        match row.status {
            Outcome::Mapped => summary.mapped += 1,
            Outcome::Unmapped => summary.unmapped += 1,
            Outcome::Invalid => summary.invalid += 1,
            Outcome::Error => summary.errors += 1,
        }
        if matches!(row.status, Outcome::Mapped | Outcome::Unmapped) {
            if row.confidence >= threshold {
                summary.above_threshold += 1;
            } else {
                summary.below_threshold += 1;
            }
        }
        *summary.by_method.entry(row.method.to_string()).or_insert(0) += 1;

        if row.status != Outcome::Mapped {
            let best = row.topics.first();
            summary.unmapped_audit.push(UnmappedEntry {
                index,
                source_code: row.source_code.clone(),
                source_label: row.source_label.clone(),
                best_target_id: best.map(|t| t.target_id.clone()),
                best_label: best.map(|t| t.target_label.clone()),
                best_score: row.confidence,
                method: row.method,
                notes: row.notes.clone(),
            });
        }
    }
    summary
}

pub fn project(rows: &[MappingResult], cattax: u8) -> Projection {
    let mut seen = HashSet::new();
    let categories: Vec<String> = rows
        .iter()
        .flat_map(|r| r.categories.iter())
        .filter(|c| seen.insert(c.as_str()))
        .cloned()
        .collect();
    Projection {
        cattax,
        category_string: categories.join(","),
        categories,
    }
}

fn failed_row(record: &InputRecord, note: String, cattax: u8) -> MappingResult {
    MappingResult {
        source_code: record.code.clone(),
        source_label: record.label.clone(),
        target_id: None,
        target_label: None,
        confidence: 0.0,
        method: Method::Error,
        notes: note,
        llm_reranked: false,
        scd_flag: false,
        status: Outcome::Error,
        topics: Vec::new(),
        categories: Vec::new(),
        category_path: None,
        cattax,
        vector: record.vector.clone(),
    }
}

impl Mapper {
    /// Map every record, at most `batch_concurrency` at a time.
    ///
    /// `rows[i]` always corresponds to `records[i]`. A worker that panics
    /// yields an `error` row for its record; the rest of the batch proceeds.
    pub async fn map_batch(&self, records: Vec<InputRecord>) -> BatchResponse {
        let cattax = self.config().category_taxonomy_flag.tag();
        let records = Arc::new(records);
        let semaphore = Arc::new(Semaphore::new(self.config().batch_concurrency));
        let mut set = JoinSet::new();

        for index in 0..records.len() {
            let mapper = self.clone();
            let records = Arc::clone(&records);
            let semaphore = Arc::clone(&semaphore);
            set.spawn(async move {
                let _permit = semaphore.acquire_owned().await.ok();
                (index, mapper.map_record(&records[index]).await)
            });
        }

        let mut slots: Vec<Option<MappingResult>> = vec![None; records.len()];
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok((index, row)) => slots[index] = Some(row),
                Err(e) => tracing::error!(error = %e, "Mapping worker failed"),
            }
        }

        let rows: Vec<MappingResult> = slots
            .into_iter()
            .enumerate()
            .map(|(index, slot)| {
                slot.unwrap_or_else(|| failed_row(&records[index], "mapping worker failed".to_string(), cattax))
            })
            .collect();

        let summary = summarize(&rows, self.config().confidence_min);
        let projection = project(&rows, cattax);
        tracing::info!(
            total = summary.total,
            mapped = summary.mapped,
            unmapped = summary.unmapped,
            invalid = summary.invalid,
            errors = summary.errors,
            "Batch mapped"
        );

        BatchResponse {
            rows,
            summary,
            projection,
            generated_at: Utc::now(),
        }
    }
}

//! Ingest service: loads cleaned CSV files into one table per resource.
//!
//! A file is parsed in full, its columns are typed from a sample of rows, and
//! the table is dropped, recreated and filled inside a single store
//! transaction. A table is therefore either complete or absent.

use std::path::Path;

use csv::{ReaderBuilder, StringRecord};
use tokio_util::sync::CancellationToken;

use crate::config::IngestConfig;
use crate::layout::{has_extension, list_files};
use crate::progress::{PipelineEvent, ProgressReporter, SilentReporter, Stage};
use crate::schema::{
    CellValue, Column, ColumnType, TableSchema, coerce, infer_column_types, looks_like_document,
    sanitize_column_names, sniff_delimiter, table_name_for,
};
use crate::stats::{StageOutcome, StageStats};
use crate::traits::{TableLoad, TableStore};
use crate::AppError;

/// Rows handed to the store per `insert_rows` call.
const INSERT_BATCH_ROWS: usize = 5_000;

/// Result of ingesting one file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IngestOutcome {
    /// The table was (re)created and loaded.
    Loaded { table: String, rows: u64 },
    /// The file was left alone.
    Skipped { reason: SkipReason },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// The file holds a JSON, XML or HTML document, not a table.
    NotTabular,
    /// The table already exists with the file's row count.
    AlreadyLoaded,
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotTabular => write!(f, "not tabular"),
            Self::AlreadyLoaded => write!(f, "already loaded"),
        }
    }
}

/// A CSV file parsed and typed, ready to be loaded.
#[derive(Debug, Clone)]
pub struct ParsedCsv {
    pub delimiter: u8,
    pub columns: Vec<Column>,
    pub records: Vec<StringRecord>,
}

impl ParsedCsv {
    fn decimal_comma(&self) -> bool {
        self.delimiter != b','
    }

    /// Coerces one record to the column types, padding short rows with NULL
    /// and dropping extra cells.
    pub fn typed_row(&self, record: &StringRecord) -> Vec<CellValue> {
        let decimal_comma = self.decimal_comma();
        self.columns
            .iter()
            .enumerate()
            .map(|(i, column)| match record.get(i) {
                Some(raw) => coerce(raw, column.column_type, decimal_comma),
                None => CellValue::Null,
            })
            .collect()
    }
}

/// Parses CSV text and infers its column types from the first `sample_rows`
/// records.
///
/// Returns `Ok(None)` if the content looks like a JSON, XML or HTML document.
///
/// # Errors
///
/// `AppError::EncodingError` if the content is not valid UTF-8,
/// `AppError::IngestError` if there is no header, `AppError::CsvError` on
/// malformed CSV.
pub fn parse_csv(bytes: &[u8], sample_rows: usize) -> Result<Option<ParsedCsv>, AppError> {
    let text = std::str::from_utf8(bytes).map_err(|e| {
        AppError::EncodingError(format!("invalid UTF-8 at byte {}", e.valid_up_to()))
    })?;
    let text = text.strip_prefix('\u{feff}').unwrap_or(text);

    let first_line = text.lines().next().unwrap_or_default();
    if first_line.trim().is_empty() {
        return Err(AppError::IngestError("missing header row".to_string()));
    }
    if looks_like_document(first_line) {
        return Ok(None);
    }

    let delimiter = sniff_delimiter(first_line);
    let mut reader = ReaderBuilder::new()
        .delimiter(delimiter)
        .quote(b'"')
        .flexible(true)
        .has_headers(true)
        .from_reader(text.as_bytes());

    let mut headers: Vec<String> = reader.headers()?.iter().map(|h| h.trim().to_string()).collect();
    // A trailing delimiter produces one empty extra column.
    if headers.len() > 1 && headers.last().is_some_and(|h| h.is_empty()) {
        headers.pop();
    }

    let records = reader.records().collect::<Result<Vec<_>, _>>()?;

    let names = sanitize_column_names(&headers);
    let types = infer_column_types(
        records.iter().take(sample_rows),
        names.len(),
        delimiter != b',',
    );
    let columns = names
        .into_iter()
        .zip(types)
        .map(|(name, column_type)| Column { name, column_type })
        .collect();

    Ok(Some(ParsedCsv {
        delimiter,
        columns,
        records,
    }))
}

/// Service that loads CSV files into a [`TableStore`].
pub struct IngestService<S: TableStore> {
    store: S,
    config: IngestConfig,
}

impl<S: TableStore> IngestService<S> {
    pub fn new(store: S, config: IngestConfig) -> Self {
        Self { store, config }
    }

    /// Loads one CSV file into the table derived from its file name.
    pub async fn ingest(&self, path: &Path) -> Result<IngestOutcome, AppError> {
        let bytes = tokio::fs::read(path).await?;
        let sample_rows = self.config.sample_rows;
        let parsed = tokio::task::spawn_blocking(move || parse_csv(&bytes, sample_rows))
            .await
            .map_err(|e| AppError::Generic(format!("CSV parser task failed: {}", e)))??;

        let Some(parsed) = parsed else {
            return Ok(IngestOutcome::Skipped {
                reason: SkipReason::NotTabular,
            });
        };

        let stem = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        let table = table_name_for(&stem);
        let expected_rows = parsed.records.len() as u64;

        if self.config.skip_loaded {
            let existing = self
                .store
                .row_count(&table)
                .await
                .map_err(|e| ingest_error(&table, e))?;
            if existing == Some(expected_rows) {
                return Ok(IngestOutcome::Skipped {
                    reason: SkipReason::AlreadyLoaded,
                });
            }
        }

        let schema = TableSchema {
            table: table.clone(),
            columns: parsed.columns.clone(),
        };
        tracing::debug!(
            table = table.as_str(),
            delimiter = %char::from(parsed.delimiter).escape_default(),
            columns = schema.columns.len(),
            text_columns = schema
                .columns
                .iter()
                .filter(|c| c.column_type == ColumnType::Text)
                .count(),
            "Schema inferred"
        );

        let mut load = self
            .store
            .begin(&schema)
            .await
            .map_err(|e| ingest_error(&table, e))?;

        let mut rows = 0;
        for chunk in parsed.records.chunks(INSERT_BATCH_ROWS) {
            let batch: Vec<Vec<CellValue>> = chunk.iter().map(|r| parsed.typed_row(r)).collect();
            rows += load
                .insert_rows(&batch)
                .await
                .map_err(|e| ingest_error(&table, e))?;
        }
        load.commit().await.map_err(|e| ingest_error(&table, e))?;

        Ok(IngestOutcome::Loaded { table, rows })
    }

    /// Loads every `*.csv` file under `dir`, one at a time.
    ///
    /// Loaded files count as succeeded; per-file errors are logged and
    /// counted, never fatal.
    pub async fn ingest_dir(&self, dir: &Path) -> Result<StageStats, AppError> {
        self.ingest_dir_with_progress(dir, &SilentReporter, CancellationToken::new())
            .await
    }

    pub async fn ingest_dir_with_progress<R: ProgressReporter>(
        &self,
        dir: &Path,
        reporter: &R,
        cancel_token: CancellationToken,
    ) -> Result<StageStats, AppError> {
        tokio::fs::metadata(dir).await?;
        let files = list_files(dir, |p| has_extension(p, &["csv"]));

        let mut stats = StageStats::new();
        for path in files {
            if cancel_token.is_cancelled() {
                reporter.report(PipelineEvent::Cancelled {
                    stage: Stage::Ingest,
                });
                break;
            }

            match self.ingest(&path).await {
                Ok(IngestOutcome::Loaded { table, rows }) => {
                    stats.record(StageOutcome::Succeeded);
                    reporter.report(PipelineEvent::TableLoaded {
                        path: &path,
                        table: &table,
                        rows,
                    });
                }
                Ok(IngestOutcome::Skipped { reason }) => {
                    tracing::debug!(path = %path.display(), %reason, "Skipped");
                    stats.record(StageOutcome::Skipped);
                }
                Err(e) => {
                    stats.record(StageOutcome::Failed);
                    reporter.report(PipelineEvent::FileFailed {
                        stage: Stage::Ingest,
                        path: &path,
                        error: &e.to_string(),
                    });
                }
            }
        }

        reporter.report(PipelineEvent::StageCompleted {
            stage: Stage::Ingest,
            stats: &stats,
        });
        Ok(stats)
    }
}

fn ingest_error(table: &str, e: AppError) -> AppError {
    match e {
        AppError::IngestError(_) => e,
        other => AppError::IngestError(format!("{}: {}", table, other)),
    }
}

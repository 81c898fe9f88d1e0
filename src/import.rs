// Import pipeline - stream a delimited upload through the transaction writer
//
// Lifecycle: validate media type -> open stream -> per-record create ->
// accumulate -> remove source file -> report.
//
// Records are read one at a time into a reused buffer, so memory does not
// grow with file size. Each row is committed before the next one is read,
// which means row N's balance check observes rows 1..N-1.

use csv::{ReaderBuilder, StringRecord, Trim};
use serde::Serialize;
use std::collections::{BTreeSet, HashMap};
use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};

use crate::categories;
use crate::db::{Category, Event, Transaction};
use crate::error::{LedgerError, Result};
use crate::ledger::Ledger;
use crate::writer::{self, NewTransaction};

// ============================================================================
// SOURCE FORMAT
// ============================================================================

/// Delimited-text flavours accepted for import.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceFormat {
    Csv,
    Tsv,
}

impl SourceFormat {
    /// Map a declared media type (parameters such as `charset` are ignored).
    pub fn from_media_type(media_type: &str) -> Result<Self> {
        let essence = media_type
            .split(';')
            .next()
            .unwrap_or_default()
            .trim()
            .to_ascii_lowercase();

        match essence.as_str() {
            "text/csv" | "application/csv" => Ok(SourceFormat::Csv),
            "text/tab-separated-values" => Ok(SourceFormat::Tsv),
            _ => Err(LedgerError::UnsupportedFormat(media_type.to_string())),
        }
    }

    pub fn delimiter(&self) -> u8 {
        match self {
            SourceFormat::Csv => b',',
            SourceFormat::Tsv => b'\t',
        }
    }
}

// ============================================================================
// OPTIONS & REPORT
// ============================================================================

#[derive(Debug, Clone, Default)]
pub struct ImportOptions {
    /// Resolve every distinct category in one batch before creating rows.
    /// Costs an extra streaming pass over the file.
    pub prefetch_categories: bool,
}

/// A row that passed the minimal-fields check but could not be recorded.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RejectedRow {
    pub line: u64,
    pub reason: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ImportReport {
    /// Created transactions, in source order.
    pub created: Vec<Transaction>,
    /// Rows dropped silently for missing title, type or value.
    pub skipped: usize,
    pub rejected: Vec<RejectedRow>,
}

impl ImportReport {
    pub fn into_transactions(self) -> Vec<Transaction> {
        self.created
    }

    fn reject(&mut self, line: u64, err: &dyn std::fmt::Display) {
        tracing::warn!(line, reason = %err, "import row rejected");
        self.rejected.push(RejectedRow {
            line,
            reason: err.to_string(),
        });
    }
}

// ============================================================================
// COLUMN MAPPING
// ============================================================================

/// Column indexes for the four import fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct ColumnMap {
    title: usize,
    kind: usize,
    value: usize,
    category: usize,
}

impl ColumnMap {
    /// Default order: title, type, value, category
    const POSITIONAL: ColumnMap = ColumnMap {
        title: 0,
        kind: 1,
        value: 2,
        category: 3,
    };

    /// Map by header name when the header names all four columns; otherwise
    /// fall back to positional order.
    fn from_headers(headers: &StringRecord) -> Self {
        let position = |name: &str| {
            headers
                .iter()
                .position(|h| h.trim().eq_ignore_ascii_case(name))
        };

        match (
            position("title"),
            position("type"),
            position("value"),
            position("category"),
        ) {
            (Some(title), Some(kind), Some(value), Some(category)) => ColumnMap {
                title,
                kind,
                value,
                category,
            },
            _ => ColumnMap::POSITIONAL,
        }
    }

    fn extract<'r>(&self, record: &'r StringRecord) -> RowFields<'r> {
        let field = |idx: usize| record.get(idx).unwrap_or_default().trim();

        RowFields {
            title: field(self.title),
            kind: field(self.kind),
            value: field(self.value),
            category: field(self.category),
        }
    }
}

struct RowFields<'r> {
    title: &'r str,
    kind: &'r str,
    value: &'r str,
    category: &'r str,
}

impl RowFields<'_> {
    fn has_required(&self) -> bool {
        !self.title.is_empty() && !self.kind.is_empty() && !self.value.is_empty()
    }
}

// ============================================================================
// SOURCE CLEANUP
// ============================================================================

/// Removes the import source when dropped, whatever happened in between.
/// Removal failure is logged, never surfaced.
struct SourceGuard {
    path: PathBuf,
}

impl SourceGuard {
    fn new(path: &Path) -> Self {
        SourceGuard {
            path: path.to_path_buf(),
        }
    }
}

impl Drop for SourceGuard {
    fn drop(&mut self) {
        match std::fs::remove_file(&self.path) {
            Ok(()) => tracing::debug!(path = %self.path.display(), "import source removed"),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => tracing::warn!(
                path = %self.path.display(),
                error = %e,
                "failed to remove import source"
            ),
        }
    }
}

// ============================================================================
// PIPELINE
// ============================================================================

fn open_reader(path: &Path, format: SourceFormat) -> Result<csv::Reader<File>> {
    let reader = ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .trim(Trim::All)
        .delimiter(format.delimiter())
        .from_path(path)?;

    Ok(reader)
}

fn record_line(record: &StringRecord) -> u64 {
    record.position().map(|p| p.line()).unwrap_or_default()
}

/// First pass for category prefetch: distinct category titles of importable rows.
fn collect_category_titles(path: &Path, format: SourceFormat) -> Result<BTreeSet<String>> {
    let mut reader = open_reader(path, format)?;
    let columns = ColumnMap::from_headers(reader.headers()?);
    let mut record = StringRecord::new();
    let mut titles = BTreeSet::new();

    loop {
        match reader.read_record(&mut record) {
            Ok(false) => break,
            Ok(true) => {}
            Err(err) if err.is_io_error() => return Err(err.into()),
            // Malformed records are reported by the main pass
            Err(_) => continue,
        }

        let fields = columns.extract(&record);
        if fields.has_required()
            && !fields.category.is_empty()
            && !titles.contains(fields.category)
        {
            titles.insert(fields.category.to_string());
        }
    }

    Ok(titles)
}

/// Import `path` into `ledger`.
///
/// A media type other than delimited text fails with `UnsupportedFormat`
/// before the file is touched. From that point on the file is owned by the
/// pipeline and is removed when the import ends, successfully or not.
///
/// Per-row policy: rows missing title, type or value are skipped silently;
/// any other row failure (bad value, unknown type, insufficient funds,
/// storage error) rejects only that row and the import continues. Only an
/// I/O failure of the stream itself aborts the import.
pub fn import_file(
    ledger: &Ledger,
    path: &Path,
    media_type: &str,
    options: &ImportOptions,
) -> Result<ImportReport> {
    let format = SourceFormat::from_media_type(media_type)?;
    let _source = SourceGuard::new(path);

    tracing::info!(path = %path.display(), ?format, "import started");

    let known: HashMap<String, Category> = if options.prefetch_categories {
        let titles = collect_category_titles(path, format)?;
        let titles: Vec<String> = titles.into_iter().collect();
        categories::index_by_title(ledger.resolve_categories(titles.as_slice())?)
    } else {
        HashMap::new()
    };

    let mut reader = open_reader(path, format)?;
    let columns = ColumnMap::from_headers(reader.headers()?);
    let mut record = StringRecord::new();
    let mut report = ImportReport::default();

    loop {
        match reader.read_record(&mut record) {
            Ok(false) => break,
            Ok(true) => {}
            Err(err) if err.is_io_error() => return Err(err.into()),
            Err(err) => {
                let line = err.position().map(|p| p.line()).unwrap_or_default();
                report.reject(line, &err);
                continue;
            }
        }

        let line = record_line(&record);
        let fields = columns.extract(&record);

        if !fields.has_required() {
            tracing::debug!(line, "import row skipped: missing title, type or value");
            report.skipped += 1;
            continue;
        }

        let created = NewTransaction::parse(fields.title, fields.kind, fields.value, fields.category)
            .and_then(|request| {
                ledger.write(|conn| writer::create_with_categories(conn, &request, &known))
            });

        match created {
            Ok(tx) => {
                tracing::debug!(line, id = %tx.id, "import row recorded");
                report.created.push(tx);
            }
            Err(err) => report.reject(line, &err),
        }
    }

    let source_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let event = Event::new(
        "import_completed",
        "import",
        &source_name,
        serde_json::json!({
            "created": report.created.len(),
            "skipped": report.skipped,
            "rejected": report.rejected.len(),
        }),
        "import_pipeline",
    );
    if let Err(e) = ledger.record_event(&event) {
        tracing::warn!(error = %e, "failed to record import event");
    }

    tracing::info!(
        path = %path.display(),
        created = report.created.len(),
        skipped = report.skipped,
        rejected = report.rejected.len(),
        "import finished"
    );

    Ok(report)
}

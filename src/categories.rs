// Category resolution - lookup-or-create by exact title
//
// Titles are trimmed and then matched case-sensitively. The storage layer
// enforces UNIQUE(title); a conflicting insert means another writer won the
// race, so the existing row is returned instead of failing.

use rusqlite::{Connection, ErrorCode};
use std::collections::{BTreeSet, HashMap};

use crate::db::{self, Category, Event};
use crate::error::{LedgerError, Result};

fn normalize_title(title: &str) -> Result<&str> {
    let title = title.trim();
    if title.is_empty() {
        return Err(LedgerError::InvalidInput(
            "category title must not be empty".to_string(),
        ));
    }
    Ok(title)
}

fn is_unique_violation(err: &LedgerError) -> bool {
    matches!(
        err,
        LedgerError::Storage(rusqlite::Error::SqliteFailure(e, _))
            if e.code == ErrorCode::ConstraintViolation
    )
}

/// Insert a category for an already-normalized title, collapsing onto the
/// stored row when the title already exists.
fn create_or_existing(conn: &Connection, title: &str) -> Result<Category> {
    let category = Category::new(title);

    match db::insert_category(conn, &category) {
        Ok(()) => {
            tracing::debug!(category = %category.title, id = %category.id, "category created");
            db::insert_event(
                conn,
                &Event::new(
                    "category_created",
                    "category",
                    &category.id,
                    serde_json::json!({ "title": category.title }),
                    "category_resolver",
                ),
            )?;
            Ok(category)
        }
        Err(err) if is_unique_violation(&err) => db::find_category_by_title(conn, title)?
            .ok_or(err),
        Err(err) => Err(err),
    }
}

/// Return the category titled `title`, creating it on first use.
pub fn resolve_one(conn: &Connection, title: &str) -> Result<Category> {
    let title = normalize_title(title)?;

    if let Some(existing) = db::find_category_by_title(conn, title)? {
        return Ok(existing);
    }

    create_or_existing(conn, title)
}

/// Resolve many titles at once.
///
/// Duplicates collapse (set semantics, blank titles ignored); existing titles
/// are fetched with a single find-by-set query and only the novel ones are
/// created. Returns created and pre-existing categories sorted by title.
pub fn resolve_batch<I, S>(conn: &Connection, titles: I) -> Result<Vec<Category>>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let wanted: BTreeSet<String> = titles
        .into_iter()
        .map(|t| t.as_ref().trim().to_string())
        .filter(|t| !t.is_empty())
        .collect();

    if wanted.is_empty() {
        return Ok(Vec::new());
    }

    let wanted: Vec<String> = wanted.into_iter().collect();
    let mut resolved = db::find_categories_by_titles(conn, wanted.as_slice())?;

    let existing: BTreeSet<&str> = resolved.iter().map(|c| c.title.as_str()).collect();
    let novel: Vec<&String> = wanted
        .iter()
        .filter(|t| !existing.contains(t.as_str()))
        .collect();

    tracing::debug!(
        existing = existing.len(),
        novel = novel.len(),
        "resolving category batch"
    );

    let mut created = Vec::with_capacity(novel.len());
    for title in novel {
        created.push(create_or_existing(conn, title)?);
    }

    resolved.extend(created);
    resolved.sort_by(|a, b| a.title.cmp(&b.title));

    Ok(resolved)
}

/// Title -> category lookup built from a resolved batch.
pub fn index_by_title(categories: Vec<Category>) -> HashMap<String, Category> {
    categories
        .into_iter()
        .map(|c| (c.title.clone(), c))
        .collect()
}

//! Paginated catalog search: substring predicates over codes and
//! descriptions, optional classification-level filter.

use anyhow::Result;
use serde::Serialize;
use tracing::debug;

use crate::model::types::{CLASSIFICATION_LEVELS, CatalogEntry};
use crate::storage::SqliteStorage;
use crate::storage::sqlite::CODE_COLUMNS;

/// How many of the deepest populated levels `search_from_end` scans.
const FROM_END_WINDOW: i64 = 3;

pub const DEFAULT_PAGE_SIZE: i64 = 50;

#[derive(Debug, Clone)]
pub struct SearchRequest {
    pub term: String,
    /// Restrict to entries whose classification reaches this level (1..11).
    pub level: Option<i64>,
    /// 1-indexed.
    pub page_number: i64,
    pub page_size: i64,
    /// Match the entry code and the deepest populated classification codes
    /// instead of the descriptions.
    pub search_from_end: bool,
}

impl Default for SearchRequest {
    fn default() -> Self {
        Self {
            term: String::new(),
            level: None,
            page_number: 1,
            page_size: DEFAULT_PAGE_SIZE,
            search_from_end: false,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct SearchPage {
    pub results: Vec<CatalogEntry>,
    pub total_count: i64,
    pub page_number: i64,
    pub total_pages: i64,
}

pub struct SearchEngine<'a> {
    storage: &'a SqliteStorage,
}

impl<'a> SearchEngine<'a> {
    pub fn new(storage: &'a SqliteStorage) -> Self {
        Self { storage }
    }

    /// Run a search and slice one page, ordered by entry code. Out-of-range
    /// pages return an empty list with the correct totals.
    pub fn search(&self, request: &SearchRequest) -> Result<SearchPage> {
        let (where_sql, params) = build_predicate(request);
        debug!(
            term = %request.term.trim(),
            level = request.level,
            page = request.page_number,
            from_end = request.search_from_end,
            "search_start"
        );

        let total_count = self.storage.count_where(&where_sql, &params)?;
        if request.page_size <= 0 {
            return Ok(SearchPage {
                results: Vec::new(),
                total_count,
                page_number: request.page_number,
                total_pages: 0,
            });
        }
        let total_pages = (total_count as u64).div_ceil(request.page_size as u64) as i64;

        let results = if request.page_number < 1 || request.page_number > total_pages {
            Vec::new()
        } else {
            let offset = (request.page_number - 1) * request.page_size;
            self.storage
                .entry_page(&where_sql, &params, request.page_size, offset)?
        };

        Ok(SearchPage {
            results,
            total_count,
            page_number: request.page_number,
            total_pages,
        })
    }
}

/// Build the WHERE clause and its bound parameters for a request.
/// A blank term skips the text predicate entirely.
fn build_predicate(request: &SearchRequest) -> (String, Vec<Box<dyn rusqlite::ToSql>>) {
    let mut clauses: Vec<String> = Vec::new();
    let mut params: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();

    let term = request.term.trim();
    if !term.is_empty() {
        let pattern = format!("%{}%", escape_like(term));
        if request.search_from_end {
            // Entry code, or the deepest populated levels: level k counts
            // only when depth - FROM_END_WINDOW < k <= depth.
            let mut alts = vec!["entry_code LIKE ? ESCAPE '\\'".to_string()];
            params.push(Box::new(pattern.clone()));
            for (i, col) in CODE_COLUMNS.iter().enumerate() {
                let k = (i + 1) as i64;
                alts.push(format!(
                    "(depth >= {k} AND depth - {k} < {FROM_END_WINDOW} \
                     AND {col} LIKE ? ESCAPE '\\')"
                ));
                params.push(Box::new(pattern.clone()));
            }
            clauses.push(format!("({})", alts.join(" OR ")));
        } else {
            clauses.push(
                "(entry_code LIKE ? ESCAPE '\\' OR description LIKE ? ESCAPE '\\' \
                 OR detail_description LIKE ? ESCAPE '\\')"
                    .to_string(),
            );
            for _ in 0..3 {
                params.push(Box::new(pattern.clone()));
            }
        }
    }

    // Prefix contiguity makes "level k populated" equivalent to depth >= k.
    if let Some(level) = request.level
        && (1..=CLASSIFICATION_LEVELS as i64).contains(&level)
    {
        clauses.push("depth >= ?".to_string());
        params.push(Box::new(level));
    }

    let where_sql = if clauses.is_empty() {
        String::new()
    } else {
        format!("WHERE {}", clauses.join(" AND "))
    };
    (where_sql, params)
}

/// Escape LIKE wildcards so the term matches as a literal substring.
fn escape_like(term: &str) -> String {
    let mut out = String::with_capacity(term.len());
    for ch in term.chars() {
        if matches!(ch, '%' | '_' | '\\') {
            out.push('\\');
        }
        out.push(ch);
    }
    out
}

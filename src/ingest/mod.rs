//! Streaming ingestion pipeline: one forward-only pass over the source XML,
//! batched transactional commits into the catalog store.

use std::fs::File;
use std::io::BufRead;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use quick_xml::Reader;
use quick_xml::events::{BytesStart, Event};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::model::types::{
    CLASSIFICATION_LEVELS, CatalogEntry, ClassificationPath, PathError, ResourceLine,
};
use crate::storage::SqliteStorage;

pub const DEFAULT_BATCH_SIZE: usize = 100;

/// A record opens on a `<voci>` start tag this deep or deeper (root element
/// is depth 1, the `<voci>` collection wrapper is depth 2). The boundary is
/// name plus minimum depth, not a fixed depth, because document shape varies.
const ENTRY_MIN_DEPTH: usize = 3;

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("source file not found: {0}")]
    SourceNotFound(PathBuf),
    #[error("failed to read source")]
    Io(#[from] std::io::Error),
    #[error("malformed XML stream: {0}")]
    Xml(#[from] quick_xml::Error),
    #[error("unexpected end of stream inside <{0}>")]
    TruncatedElement(String),
    #[error("failed to reset catalog store")]
    Clear(#[source] anyhow::Error),
    #[error("batch write failed after {committed} committed records")]
    BatchWrite {
        committed: usize,
        #[source]
        source: anyhow::Error,
    },
    #[error("ingestion cancelled after {committed} committed records")]
    Cancelled { committed: usize },
}

#[derive(Debug, Clone)]
pub struct IngestOptions {
    pub batch_size: usize,
    /// Live counters for UI/telemetry; updated as records complete.
    pub progress: Option<Arc<IngestProgress>>,
    /// Coarse cancellation point, checked between batch commits.
    pub cancel: Option<Arc<AtomicBool>>,
}

impl Default for IngestOptions {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            progress: None,
            cancel: None,
        }
    }
}

#[derive(Debug, Default)]
pub struct IngestProgress {
    pub processed: AtomicUsize,
    pub skipped: AtomicUsize,
}

/// Outcome of one ingestion run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestReport {
    pub records_loaded: usize,
    pub records_skipped: usize,
    /// Malformed resource sub-records dropped without failing their parent.
    pub resources_skipped: usize,
}

/// Ingest from a file path. The source must exist before any existing data
/// is touched.
pub fn ingest_file(
    storage: &mut SqliteStorage,
    source: &Path,
    options: &IngestOptions,
) -> Result<IngestReport, IngestError> {
    if !source.exists() {
        return Err(IngestError::SourceNotFound(source.to_path_buf()));
    }
    info!(source = %source.display(), "starting catalog ingestion");
    let reader = BufReader::new(File::open(source)?);
    ingest_reader(storage, reader, options)
}

/// Ingest from any buffered reader. Clears the store, then streams the
/// document, committing completed records in batched transactions.
pub fn ingest_reader<R: BufRead>(
    storage: &mut SqliteStorage,
    reader: R,
    options: &IngestOptions,
) -> Result<IngestReport, IngestError> {
    storage.clear_all().map_err(IngestError::Clear)?;

    let batch_size = options.batch_size.max(1);
    let mut xml = Reader::from_reader(reader);
    xml.config_mut().trim_text(true);

    let mut buf = Vec::new();
    let mut depth: usize = 0;
    let mut state = ParserState::Idle;
    let mut batch: Vec<CatalogEntry> = Vec::with_capacity(batch_size);
    let mut committed = 0usize;
    let mut skipped = 0usize;
    let mut resources_skipped = 0usize;

    loop {
        let event = xml.read_event_into(&mut buf)?;
        match event {
            Event::Start(tag) => {
                depth += 1;
                let name = tag.local_name().as_ref().to_vec();
                match name.as_slice() {
                    b"voci" if depth >= ENTRY_MIN_DEPTH => {
                        debug!(depth, "opening record");
                        state = ParserState::InEntry(Box::default());
                    }
                    b"dettaglio_voce" => {
                        if let ParserState::InEntry(builder) = &mut state {
                            builder.read_detail_attributes(&tag);
                        }
                    }
                    b"dettaglio_risorsa" => {
                        if let ParserState::InEntry(builder) = &mut state {
                            match parse_resource(&mut xml)? {
                                Some(line) => builder.resources.push(line),
                                None => {
                                    resources_skipped += 1;
                                    warn!(
                                        entry = %builder.entry_code,
                                        "skipping malformed resource line"
                                    );
                                }
                            }
                        } else {
                            let mut skip = Vec::new();
                            xml.read_to_end_into(tag.name(), &mut skip)?;
                        }
                        // The sub-parse consumed the element's own end tag.
                        depth -= 1;
                    }
                    _ => {
                        if let ParserState::InEntry(builder) = &mut state
                            && builder.wants(&name)
                        {
                            let text = read_scalar(&mut xml, &name)?;
                            builder.assign(&name, text);
                            depth -= 1;
                        }
                    }
                }
            }
            Event::Empty(tag) => {
                // Empty leaf elements carry no content and are skipped, but an
                // empty detail tag still carries the pricing attributes.
                if tag.local_name().as_ref() == b"dettaglio_voce"
                    && let ParserState::InEntry(builder) = &mut state
                {
                    builder.read_detail_attributes(&tag);
                }
            }
            Event::End(tag) => {
                let closes_entry = tag.local_name().as_ref() == b"voci"
                    && depth >= ENTRY_MIN_DEPTH
                    && matches!(state, ParserState::InEntry(_));
                depth = depth.saturating_sub(1);

                if closes_entry {
                    let ParserState::InEntry(builder) =
                        std::mem::replace(&mut state, ParserState::Idle)
                    else {
                        unreachable!("checked above");
                    };
                    match builder.finish() {
                        Ok(entry) => {
                            batch.push(entry);
                            if let Some(p) = &options.progress {
                                p.processed.fetch_add(1, Ordering::Relaxed);
                            }
                        }
                        Err(err) => {
                            skipped += 1;
                            if let Some(p) = &options.progress {
                                p.skipped.fetch_add(1, Ordering::Relaxed);
                            }
                            warn!(
                                position = committed + batch.len() + skipped,
                                error = %err,
                                "skipping malformed record"
                            );
                        }
                    }

                    if batch.len() >= batch_size {
                        commit_batch(storage, &mut batch, &mut committed, skipped)?;
                        if let Some(cancel) = &options.cancel
                            && cancel.load(Ordering::Relaxed)
                        {
                            return Err(IngestError::Cancelled { committed });
                        }
                    }
                }
            }
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }

    if matches!(state, ParserState::InEntry(_)) {
        // Stream ended mid-record; the partial record is discarded.
        skipped += 1;
        if let Some(p) = &options.progress {
            p.skipped.fetch_add(1, Ordering::Relaxed);
        }
        warn!("discarding record left open at end of stream");
    }

    // Residual partial batch goes out in one final transaction.
    commit_batch(storage, &mut batch, &mut committed, skipped)?;

    info!(
        loaded = committed,
        skipped,
        resources_skipped,
        "catalog ingestion complete"
    );
    Ok(IngestReport {
        records_loaded: committed,
        records_skipped: skipped,
        resources_skipped,
    })
}

enum ParserState {
    Idle,
    InEntry(Box<EntryBuilder>),
}

/// The record under construction, owned by the state machine instance.
#[derive(Default)]
struct EntryBuilder {
    entry_code: String,
    author: Option<String>,
    year: Option<String>,
    edition: Option<String>,
    unit_price: f64,
    unit_of_measure: String,
    price_without_surcharge: f64,
    labor_ratio: f64,
    resource_type: String,
    description: String,
    detail_description: String,
    codes: [Option<String>; CLASSIFICATION_LEVELS],
    descrs: [Option<String>; CLASSIFICATION_LEVELS],
    resources: Vec<ResourceLine>,
}

#[derive(Debug, Error)]
enum RecordError {
    #[error("missing entry code")]
    MissingCode,
    #[error(transparent)]
    Path(#[from] PathError),
}

impl EntryBuilder {
    fn read_detail_attributes(&mut self, tag: &BytesStart<'_>) {
        for attr in tag.attributes().flatten() {
            let value = attr
                .unescape_value()
                .map(|v| v.into_owned())
                .unwrap_or_default();
            match attr.key.local_name().as_ref() {
                b"codice_voce" => self.entry_code = value,
                b"prezzo_voce" => self.unit_price = parse_decimal(&value),
                b"unita_misura_voce" => self.unit_of_measure = value,
                b"importo_senza_sgui_voce" => {
                    self.price_without_surcharge = parse_decimal(&value);
                }
                b"rapporto_RU_voce" => self.labor_ratio = parse_decimal(&value),
                b"tipologia_risorsa" => self.resource_type = value,
                _ => {}
            }
        }
    }

    /// Whether `name` is a scalar leaf this builder consumes.
    fn wants(&self, name: &[u8]) -> bool {
        matches!(
            name,
            b"autore" | b"anno" | b"edizione" | b"declaratoria_voce"
                | b"declaratoria_voce_dettaglio"
        ) || level_tag(name).is_some()
    }

    fn assign(&mut self, name: &[u8], value: String) {
        match name {
            b"autore" => self.author = Some(value),
            b"anno" => self.year = Some(normalize_year(&value)),
            b"edizione" => self.edition = Some(value),
            b"declaratoria_voce" => self.description = value,
            b"declaratoria_voce_dettaglio" => self.detail_description = value,
            _ => {
                if let Some((level, is_descr)) = level_tag(name) {
                    let slot = if is_descr {
                        &mut self.descrs[level - 1]
                    } else {
                        &mut self.codes[level - 1]
                    };
                    *slot = Some(value);
                }
            }
        }
    }

    fn finish(self) -> Result<CatalogEntry, RecordError> {
        if self.entry_code.trim().is_empty() {
            return Err(RecordError::MissingCode);
        }
        let mut pairs: [(Option<String>, Option<String>); CLASSIFICATION_LEVELS] =
            Default::default();
        for (pair, (code, descr)) in pairs
            .iter_mut()
            .zip(self.codes.into_iter().zip(self.descrs))
        {
            *pair = (code, descr);
        }
        let path = ClassificationPath::from_pairs(pairs)?;
        Ok(CatalogEntry {
            entry_code: self.entry_code,
            author: self.author,
            year: self.year,
            edition: self.edition,
            unit_price: self.unit_price,
            unit_of_measure: self.unit_of_measure,
            price_without_surcharge: self.price_without_surcharge,
            labor_ratio: self.labor_ratio,
            resource_type: self.resource_type,
            description: self.description,
            detail_description: self.detail_description,
            path,
            resources: self.resources,
        })
    }
}

/// Map `cod_liv_N` / `descr_liv_N` to (level, is_description).
fn level_tag(name: &[u8]) -> Option<(usize, bool)> {
    let (rest, is_descr) = if let Some(rest) = name.strip_prefix(b"cod_liv_") {
        (rest, false)
    } else if let Some(rest) = name.strip_prefix(b"descr_liv_") {
        (rest, true)
    } else {
        return None;
    };
    let level: usize = std::str::from_utf8(rest).ok()?.parse().ok()?;
    (1..=CLASSIFICATION_LEVELS)
        .contains(&level)
        .then_some((level, is_descr))
}

/// Bounded sub-parse of one `<dettaglio_risorsa>` subtree. Consumes exactly
/// its own elements, including the closing tag, and returns `None` for a
/// malformed resource (no resource code).
fn parse_resource<R: BufRead>(
    xml: &mut Reader<R>,
) -> Result<Option<ResourceLine>, IngestError> {
    let mut line = ResourceLine::default();
    let mut buf = Vec::new();
    loop {
        match xml.read_event_into(&mut buf)? {
            Event::Start(tag) => {
                let name = tag.local_name().as_ref().to_vec();
                let text = read_scalar(xml, &name)?;
                match name.as_slice() {
                    b"codifica_risorsa" => line.code = text,
                    b"udm_risorsa" => line.unit_of_measure = text,
                    b"quantita_risorsa" => line.quantity = parse_decimal(&text),
                    b"prezzo_risorsa" => line.unit_price = parse_decimal(&text),
                    b"importo_risorsa" => line.amount = parse_decimal(&text),
                    b"tipologia_risorsa" => line.resource_type = text,
                    b"declaratoria_risorsa" => line.description = text,
                    _ => {}
                }
            }
            Event::End(tag) if tag.local_name().as_ref() == b"dettaglio_risorsa" => break,
            Event::Eof => {
                return Err(IngestError::TruncatedElement("dettaglio_risorsa".into()));
            }
            _ => {}
        }
        buf.clear();
    }
    if line.code.trim().is_empty() {
        return Ok(None);
    }
    Ok(Some(line))
}

/// Read the scalar content of the element whose start tag was just consumed,
/// through its matching end tag. Nested elements are skipped whole.
fn read_scalar<R: BufRead>(xml: &mut Reader<R>, end: &[u8]) -> Result<String, IngestError> {
    let mut out = String::new();
    let mut buf = Vec::new();
    loop {
        match xml.read_event_into(&mut buf)? {
            Event::Text(t) => out.push_str(&t.unescape().map_err(quick_xml::Error::from)?),
            Event::CData(t) => out.push_str(&String::from_utf8_lossy(&t.into_inner())),
            Event::Start(nested) => {
                let mut skip = Vec::new();
                xml.read_to_end_into(nested.name(), &mut skip)?;
            }
            Event::End(tag) if tag.local_name().as_ref() == end => break,
            Event::Eof => {
                return Err(IngestError::TruncatedElement(
                    String::from_utf8_lossy(end).into_owned(),
                ));
            }
            _ => {}
        }
        buf.clear();
    }
    Ok(out)
}

fn commit_batch(
    storage: &mut SqliteStorage,
    batch: &mut Vec<CatalogEntry>,
    committed: &mut usize,
    skipped: usize,
) -> Result<(), IngestError> {
    if batch.is_empty() {
        return Ok(());
    }
    storage
        .insert_entries(batch)
        .map_err(|source| IngestError::BatchWrite {
            committed: *committed,
            source,
        })?;
    *committed += batch.len();
    info!(
        batch = batch.len(),
        total = *committed,
        skipped,
        "committed entry batch"
    );
    // Persisted entities are dropped from memory here to bound usage.
    batch.clear();
    Ok(())
}

/// Locale-tolerant decimal parse: comma accepted as decimal separator,
/// anything unparseable defaults to zero.
pub(crate) fn parse_decimal(raw: &str) -> f64 {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return 0.0;
    }
    trimmed.replace(',', ".").parse().unwrap_or(0.0)
}

/// A four-digit year in the 2000s is stored as its last two digits.
fn normalize_year(value: &str) -> String {
    if value.len() == 4 && value.starts_with("20") {
        value[2..].to_string()
    } else {
        value.to_string()
    }
}

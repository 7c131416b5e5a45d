//! Per-partition on-disk full-text index over tokenized file names.
//!
//! Each partition owns one tantivy index in its `index_dir`. Documents carry
//! an untokenized `id` (the exact name, used for updates and deletes) and a
//! tokenized, stored `file_name` (used for queries and returned as hits).
//! Every mutation is committed and the reader reloaded before returning, so
//! a search issued afterwards sees it.

use std::fs;
use std::sync::Arc;

use parking_lot::Mutex;
use rayon::prelude::*;
use tantivy::collector::TopDocs;
use tantivy::query::{BooleanQuery, Occur, Query, QueryParser, RegexQuery};
use tantivy::schema::{Field, Schema, Value, STORED, STRING, TEXT};
use tantivy::{Index, IndexReader, IndexWriter, ReloadPolicy, TantivyDocument, Term};

use crate::error::{IndexError, Result, StoreError};
use crate::fanout::PartitionTask;
use crate::partition::PartitionId;
use crate::store::StorageLayout;

/// Hits returned per partition, best first.
pub const MAX_HITS: usize = 10;

const ID_FIELD: &str = "id";
const FILE_NAME_FIELD: &str = "file_name";

/// Indexing arena per writer. Names are tiny; this is tantivy's floor.
const WRITER_HEAP_BYTES: usize = 15_000_000;

/// How `index_doc` treats an existing document with the same id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexMode {
    /// Add unconditionally; only valid on a freshly wiped index.
    CreateFresh,
    /// Replace any document with the same id, otherwise add.
    CreateOrUpdate,
}

#[derive(Debug, Clone, Copy)]
struct Fields {
    id: Field,
    file_name: Field,
}

fn file_name_schema() -> (Schema, Fields) {
    let mut builder = Schema::builder();
    let id = builder.add_text_field(ID_FIELD, STRING | STORED);
    let file_name = builder.add_text_field(FILE_NAME_FIELD, TEXT | STORED);
    (builder.build(), Fields { id, file_name })
}

struct PartitionIndex {
    index: Index,
    writer: Mutex<IndexWriter>,
    reader: IndexReader,
}

impl std::fmt::Debug for PartitionIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PartitionIndex")
            .field("docs", &self.reader.searcher().num_docs())
            .finish()
    }
}

impl PartitionIndex {
    /// Wipes `dir` and creates an empty index in it.
    fn create_fresh(dir: &std::path::Path, schema: Schema) -> Result<Self> {
        if dir.exists() {
            fs::remove_dir_all(dir).map_err(|e| StoreError::storage(dir, e))?;
        }
        fs::create_dir_all(dir).map_err(|e| StoreError::storage(dir, e))?;

        let index = Index::create_in_dir(dir, schema)?;
        let writer = index.writer_with_num_threads(1, WRITER_HEAP_BYTES)?;
        let reader: IndexReader = index
            .reader_builder()
            .reload_policy(ReloadPolicy::Manual)
            .try_into()?;
        Ok(Self {
            index,
            writer: Mutex::new(writer),
            reader,
        })
    }

    fn commit(&self, writer: &mut IndexWriter) -> Result<()> {
        writer.commit()?;
        self.reader.reload()?;
        Ok(())
    }
}

#[derive(Debug)]
pub struct FullTextIndex {
    fields: Fields,
    partitions: Vec<PartitionIndex>,
}

impl FullTextIndex {
    /// Creates an empty index for every partition, discarding whatever was
    /// on disk. Call [`FullTextIndex::rebuild_all`] to fill it.
    pub fn create(layout: &StorageLayout) -> Result<Self> {
        let (schema, fields) = file_name_schema();
        let partitions = layout
            .ids()
            .collect::<Vec<_>>()
            .into_par_iter()
            .map(|partition| {
                PartitionIndex::create_fresh(&layout.index_location(partition), schema.clone())
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { fields, partitions })
    }

    fn partition(&self, partition: PartitionId) -> Result<&PartitionIndex> {
        self.partitions
            .get(partition.index())
            .ok_or_else(|| IndexError::UnknownPartition(partition).into())
    }

    fn document(&self, name: &str) -> TantivyDocument {
        let mut doc = TantivyDocument::default();
        doc.add_text(self.fields.id, name);
        doc.add_text(self.fields.file_name, name);
        doc
    }

    /// Queues one document for `name` on `writer` without committing.
    fn queue_doc(&self, writer: &mut IndexWriter, name: &str, mode: IndexMode) -> Result<()> {
        if mode == IndexMode::CreateOrUpdate {
            writer.delete_term(Term::from_field_text(self.fields.id, name));
        }
        writer.add_document(self.document(name))?;
        Ok(())
    }

    /// Runs `ops` on the partition's writer and commits. If either fails,
    /// everything queued since the last commit is rolled back so a later
    /// commit cannot publish it.
    fn write<F>(&self, part: &PartitionIndex, ops: F) -> Result<()>
    where
        F: FnOnce(&mut IndexWriter) -> Result<()>,
    {
        let mut writer = part.writer.lock();
        let outcome = ops(&mut writer).and_then(|()| part.commit(&mut writer));
        if outcome.is_err() {
            if let Err(error) = writer.rollback() {
                log::warn!("full-text rollback failed: {error}");
            }
        }
        outcome
    }

    pub fn index_doc(&self, partition: PartitionId, name: &str, mode: IndexMode) -> Result<()> {
        let part = self.partition(partition)?;
        self.write(part, |writer| self.queue_doc(writer, name, mode))
    }

    /// Deletes the document whose id is exactly `name` and makes the
    /// deletion visible before returning.
    pub fn remove_doc(&self, partition: PartitionId, name: &str) -> Result<()> {
        let part = self.partition(partition)?;
        self.write(part, |writer| {
            writer.delete_term(Term::from_field_text(self.fields.id, name));
            Ok(())
        })
    }

    /// Up to [`MAX_HITS`] names in `partition` matching `query`, by relevance.
    pub fn search_in_partition(&self, query: &str, partition: PartitionId) -> Result<Vec<String>> {
        let part = self.partition(partition)?;
        let query = self.parse_query(&part.index, query)?;
        let searcher = part.reader.searcher();
        let hits = searcher.search(&*query, &TopDocs::with_limit(MAX_HITS))?;

        let mut names = Vec::with_capacity(hits.len());
        for (_score, address) in hits {
            let doc: TantivyDocument = searcher.doc(address)?;
            if let Some(name) = doc.get_first(self.fields.file_name).and_then(|v| v.as_str()) {
                names.push(name.to_string());
            }
        }
        Ok(names)
    }

    /// Live documents in `partition`.
    pub fn doc_count(&self, partition: PartitionId) -> Result<u64> {
        Ok(self.partition(partition)?.reader.searcher().num_docs())
    }

    /// Empties every partition's index and re-adds one document per payload
    /// currently stored in that partition.
    pub fn rebuild_all(&self, layout: &StorageLayout) -> Result<u64> {
        let counts = self
            .partitions
            .par_iter()
            .enumerate()
            .map(|(index, part)| {
                let partition = PartitionId::new(index);
                let names = layout.list_files(partition)?;
                self.write(part, |writer| {
                    writer.delete_all_documents()?;
                    for name in &names {
                        self.queue_doc(writer, name, IndexMode::CreateFresh)?;
                    }
                    Ok(())
                })?;
                log::debug!("full-text index partition={partition} docs={}", names.len());
                Ok(names.len() as u64)
            })
            .collect::<Result<Vec<u64>>>()?;
        Ok(counts.into_iter().sum())
    }

    /// Parses `query` once so a query no partition can run is reported as a
    /// single error instead of one failure per partition.
    pub fn validate_query(&self, query: &str) -> Result<()> {
        match self.partitions.first() {
            Some(part) => self.parse_query(&part.index, query).map(|_| ()),
            None => Ok(()),
        }
    }

    /// Parses `raw` against `file_name`.
    ///
    /// Plain terms go through tantivy's query grammar. Terms holding `*` or
    /// `?` (leading wildcards included) become regex queries over the
    /// indexed tokens; this scans the term dictionary.
    fn parse_query(&self, index: &Index, raw: &str) -> Result<Box<dyn Query>> {
        let raw = raw.trim();
        let parser = QueryParser::for_index(index, vec![self.fields.file_name]);
        if raw.contains('"') || !raw.split_whitespace().any(is_wildcard_term) {
            return parse_plain(&parser, raw);
        }

        let mut clauses: Vec<(Occur, Box<dyn Query>)> = Vec::new();
        let mut plain = Vec::new();
        for term in raw.split_whitespace() {
            if is_wildcard_term(term) {
                let query: Box<dyn Query> = Box::new(RegexQuery::from_pattern(
                    &wildcard_to_regex(term),
                    self.fields.file_name,
                )?);
                clauses.push((Occur::Should, query));
            } else {
                plain.push(term);
            }
        }
        if !plain.is_empty() {
            clauses.push((Occur::Should, parse_plain(&parser, &plain.join(" "))?));
        }
        Ok(Box::new(BooleanQuery::new(clauses)))
    }
}

/// Parses `raw` with tantivy's grammar. Input the grammar rejects, such as
/// a file name holding `:`, is searched as a literal phrase
/// over its tokens.
fn parse_plain(parser: &QueryParser, raw: &str) -> Result<Box<dyn Query>> {
    match parser.parse_query(raw) {
        Ok(query) => Ok(query),
        Err(error) => {
            log::debug!("query {raw:?} not in query grammar ({error}); matching literally");
            Ok(parser.parse_query(&format!("\"{}\"", raw.replace('"', " ")))?)
        }
    }
}

fn is_wildcard_term(term: &str) -> bool {
    (term.contains('*') || term.contains('?')) && !term.contains(':')
}

/// Translates a glob-style term into a regex over lowercased tokens.
/// Characters the tokenizer never keeps (punctuation) are dropped.
fn wildcard_to_regex(term: &str) -> String {
    let mut pattern = String::with_capacity(term.len() * 2);
    for c in term.chars() {
        match c {
            '*' => pattern.push_str(".*"),
            '?' => pattern.push('.'),
            c if c.is_alphanumeric() => pattern.extend(c.to_lowercase()),
            _ => {}
        }
    }
    pattern
}

/// Full-text query against one partition.
#[derive(Debug)]
pub struct FullTextSearchTask {
    index: Arc<FullTextIndex>,
    query: String,
}

impl FullTextSearchTask {
    pub fn new(index: Arc<FullTextIndex>, query: impl Into<String>) -> Self {
        Self {
            index,
            query: query.into(),
        }
    }
}

impl PartitionTask for FullTextSearchTask {
    type Output = Vec<String>;

    fn name(&self) -> &'static str {
        "full-text-search"
    }

    fn process(&self, partition: PartitionId) -> Result<Vec<String>> {
        self.index.search_in_partition(&self.query, partition)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StoreConfig;
    use tempfile::TempDir;

    fn setup(partitions: usize) -> (TempDir, StorageLayout, FullTextIndex) {
        let temp = TempDir::new().unwrap();
        let root = temp.path().join("drive").to_string_lossy().to_string();
        let layout = StorageLayout::new(&StoreConfig {
            partitions,
            ..StoreConfig::with_root(root)
        });
        layout.create_directories().unwrap();
        let index = FullTextIndex::create(&layout).unwrap();
        (temp, layout, index)
    }

    #[test]
    fn wildcard_translation() {
        assert_eq!(wildcard_to_regex("*port"), ".*port");
        assert_eq!(wildcard_to_regex("Rep?rt*"), "rep.rt.*");
        assert_eq!(wildcard_to_regex("*.csv"), ".*csv");
        assert!(is_wildcard_term("*port"));
        assert!(!is_wildcard_term("report"));
        assert!(!is_wildcard_term("file_name:rep*"));
    }

    #[test]
    fn indexed_name_is_searchable_by_token_and_full_name() {
        let (_temp, _layout, index) = setup(1);
        let p = PartitionId::new(0);
        index.index_doc(p, "report_2024.csv", IndexMode::CreateOrUpdate).unwrap();
        index.index_doc(p, "notes.txt", IndexMode::CreateOrUpdate).unwrap();

        assert_eq!(index.search_in_partition("report", p).unwrap(), vec!["report_2024.csv"]);
        assert_eq!(
            index.search_in_partition("report_2024.csv", p).unwrap(),
            vec!["report_2024.csv"]
        );
        assert_eq!(index.search_in_partition("NOTES", p).unwrap(), vec!["notes.txt"]);
    }

    #[test]
    fn create_or_update_does_not_duplicate() {
        let (_temp, _layout, index) = setup(1);
        let p = PartitionId::new(0);
        for _ in 0..3 {
            index.index_doc(p, "same.bin", IndexMode::CreateOrUpdate).unwrap();
        }
        assert_eq!(index.doc_count(p).unwrap(), 1);
        assert_eq!(index.search_in_partition("same", p).unwrap(), vec!["same.bin"]);
    }

    #[test]
    fn remove_doc_uses_exact_id() {
        let (_temp, _layout, index) = setup(1);
        let p = PartitionId::new(0);
        index.index_doc(p, "a.txt", IndexMode::CreateOrUpdate).unwrap();
        index.index_doc(p, "a.txt.bak", IndexMode::CreateOrUpdate).unwrap();
        index.remove_doc(p, "a.txt").unwrap();
        assert_eq!(index.doc_count(p).unwrap(), 1);
        assert_eq!(index.search_in_partition("bak", p).unwrap(), vec!["a.txt.bak"]);
        // Removing something absent is not an error.
        index.remove_doc(p, "a.txt").unwrap();
    }

    #[test]
    fn leading_wildcard_matches_token_suffix() {
        let (_temp, _layout, index) = setup(1);
        let p = PartitionId::new(0);
        index.index_doc(p, "quarterly_report.pdf", IndexMode::CreateOrUpdate).unwrap();
        index.index_doc(p, "summary.pdf", IndexMode::CreateOrUpdate).unwrap();
        assert_eq!(
            index.search_in_partition("*port", p).unwrap(),
            vec!["quarterly_report.pdf"]
        );
        let mut both = index.search_in_partition("*mary quarterly", p).unwrap();
        both.sort();
        assert_eq!(both, vec!["quarterly_report.pdf", "summary.pdf"]);
    }

    #[test]
    fn hits_are_capped_per_partition() {
        let (_temp, _layout, index) = setup(1);
        let p = PartitionId::new(0);
        for i in 0..(MAX_HITS + 5) {
            index
                .index_doc(p, &format!("batch_{i}.log"), IndexMode::CreateOrUpdate)
                .unwrap();
        }
        assert_eq!(index.search_in_partition("batch", p).unwrap().len(), MAX_HITS);
    }

    #[test]
    fn query_syntax_in_names_is_matched_literally() {
        let (_temp, _layout, index) = setup(1);
        let p = PartitionId::new(0);
        index.index_doc(p, "a:b.txt", IndexMode::CreateOrUpdate).unwrap();
        index.index_doc(p, "other.txt", IndexMode::CreateOrUpdate).unwrap();

        assert_eq!(index.search_in_partition("a:b.txt", p).unwrap(), vec!["a:b.txt"]);
        index.validate_query("no_such_field:abc").unwrap();
        assert!(index.search_in_partition("no_such_field:abc", p).unwrap().is_empty());
    }

    #[test]
    fn failed_write_discards_queued_operations() {
        let (_temp, _layout, index) = setup(1);
        let p = PartitionId::new(0);
        index.index_doc(p, "kept.txt", IndexMode::CreateOrUpdate).unwrap();

        let part = index.partition(p).unwrap();
        let err = index
            .write(part, |writer| {
                index.queue_doc(writer, "ghost.txt", IndexMode::CreateOrUpdate)?;
                writer.delete_term(Term::from_field_text(index.fields.id, "kept.txt"));
                Err(IndexError::UnknownPartition(p).into())
            })
            .unwrap_err();
        assert!(matches!(err, StoreError::Index(_)));

        // The next commit must not publish what the failed write queued.
        index.index_doc(p, "next.txt", IndexMode::CreateOrUpdate).unwrap();
        assert!(index.search_in_partition("ghost", p).unwrap().is_empty());
        assert_eq!(index.search_in_partition("kept", p).unwrap(), vec!["kept.txt"]);
        assert_eq!(index.doc_count(p).unwrap(), 2);
    }

    #[test]
    fn create_fresh_adds_without_replacing() {
        let (_temp, _layout, index) = setup(1);
        let p = PartitionId::new(0);
        index.index_doc(p, "fresh.txt", IndexMode::CreateFresh).unwrap();
        assert_eq!(index.doc_count(p).unwrap(), 1);
        assert_eq!(index.search_in_partition("fresh", p).unwrap(), vec!["fresh.txt"]);

        // CreateFresh skips the id lookup, so a repeat duplicates; only the
        // rebuild path, which starts from an empty index, uses it.
        index.index_doc(p, "fresh.txt", IndexMode::CreateFresh).unwrap();
        assert_eq!(index.doc_count(p).unwrap(), 2);
        index.index_doc(p, "fresh.txt", IndexMode::CreateOrUpdate).unwrap();
        assert_eq!(index.doc_count(p).unwrap(), 1);
    }

    #[test]
    fn rebuild_all_mirrors_storage_directories() {
        let (_temp, layout, index) = setup(2);
        let p0 = PartitionId::new(0);
        let p1 = PartitionId::new(1);
        fs::write(layout.file_path(p0, "alpha.txt"), b"a").unwrap();
        fs::write(layout.file_path(p1, "beta.txt"), b"b").unwrap();
        fs::write(layout.file_path(p1, "gamma.txt"), b"c").unwrap();
        index.index_doc(p0, "stale.txt", IndexMode::CreateOrUpdate).unwrap();

        assert_eq!(index.rebuild_all(&layout).unwrap(), 3);
        assert_eq!(index.doc_count(p0).unwrap(), 1);
        assert_eq!(index.doc_count(p1).unwrap(), 2);
        assert!(index.search_in_partition("stale", p0).unwrap().is_empty());
        assert_eq!(index.search_in_partition("gamma", p1).unwrap(), vec!["gamma.txt"]);
    }
}

//! Tantivy full-text index over saved page bodies
//!
//! Bodies are stemmed (`en_stem`) so "dragons" finds "dragon"; titles use the
//! default tokenizer and get a boost so title hits rank above body-only hits.

use crate::models::FullTextHit;
use crate::sources::FullTextIndex;
use parking_lot::RwLock;
use std::path::Path;
use tantivy::collector::TopDocs;
use tantivy::directory::MmapDirectory;
use tantivy::query::QueryParser;
use tantivy::schema::*;
use tantivy::snippet::SnippetGenerator;
use tantivy::{Index, IndexReader, IndexWriter, ReloadPolicy, Term};
use thiserror::Error;

const TITLE_BOOST: f32 = 2.0;
const SNIPPET_MAX_CHARS: usize = 160;

/// Error type for indexer operations
#[derive(Error, Debug)]
pub enum IndexerError {
    #[error("Tantivy error: {0}")]
    Tantivy(#[from] tantivy::TantivyError),
    #[error("Directory error: {0}")]
    Directory(#[from] tantivy::directory::error::OpenDirectoryError),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type IndexerResult<T> = Result<T, IndexerError>;

/// Tantivy-based full-text index of offline pages
pub struct Indexer {
    index: Index,
    writer: RwLock<IndexWriter>,
    reader: RwLock<IndexReader>,
    id_field: Field,
    title_field: Field,
    body_field: Field,
}

impl Indexer {
    /// Create a new indexer at the given path
    pub fn new(path: &Path) -> IndexerResult<Self> {
        std::fs::create_dir_all(path)?;
        let dir = MmapDirectory::open(path)?;
        let schema = Self::build_schema();
        let index = Index::open_or_create(dir, schema.clone())?;

        let writer = index.writer(20_000_000)?;
        let reader = index.reader_builder().reload_policy(ReloadPolicy::Manual).try_into()?;

        Self::from_parts(index, writer, reader, &schema)
    }

    /// Create an in-memory indexer (for testing)
    pub fn new_in_memory() -> IndexerResult<Self> {
        let schema = Self::build_schema();
        let index = Index::create_in_ram(schema.clone());

        let writer = index.writer(15_000_000)?;
        let reader = index.reader_builder().reload_policy(ReloadPolicy::Manual).try_into()?;

        Self::from_parts(index, writer, reader, &schema)
    }

    fn from_parts(index: Index, writer: IndexWriter, reader: IndexReader, schema: &Schema) -> IndexerResult<Self> {
        Ok(Self {
            id_field: schema.get_field("page_id")?,
            title_field: schema.get_field("title")?,
            body_field: schema.get_field("body")?,
            index,
            writer: RwLock::new(writer),
            reader: RwLock::new(reader),
        })
    }

    fn build_schema() -> Schema {
        let mut builder = Schema::builder();
        builder.add_text_field("page_id", STRING | STORED);
        builder.add_text_field("title", TEXT | STORED);

        // Body is stored so snippets can be generated from it
        let body_indexing = TextFieldIndexing::default()
            .set_tokenizer("en_stem")
            .set_index_option(IndexRecordOption::WithFreqsAndPositions);
        let body_options = TextOptions::default()
            .set_indexing_options(body_indexing)
            .set_stored();
        builder.add_text_field("body", body_options);
        builder.build()
    }

    /// Add or update a page in the index
    pub fn add_document(&self, page_id: &str, title: &str, body: &str) -> IndexerResult<()> {
        let writer = self.writer.read();

        // Delete existing document with same ID (upsert semantics)
        writer.delete_term(Term::from_field_text(self.id_field, page_id));

        let mut doc = TantivyDocument::default();
        doc.add_text(self.id_field, page_id);
        doc.add_text(self.title_field, title);
        doc.add_text(self.body_field, body);
        writer.add_document(doc)?;

        Ok(())
    }

    pub fn delete_document(&self, page_id: &str) -> IndexerResult<()> {
        let writer = self.writer.read();
        writer.delete_term(Term::from_field_text(self.id_field, page_id));
        Ok(())
    }

    pub fn commit(&self) -> IndexerResult<()> {
        self.writer.write().commit()?;
        self.reader.write().reload()?;
        Ok(())
    }

    pub fn num_docs(&self) -> u64 {
        self.reader.read().searcher().num_docs()
    }
}

impl FullTextIndex for Indexer {
    fn search(&self, query: &str, limit: usize) -> IndexerResult<Vec<FullTextHit>> {
        if query.trim().is_empty() {
            return Ok(Vec::new());
        }

        let reader = self.reader.read();
        let searcher = reader.searcher();

        let mut parser = QueryParser::for_index(&self.index, vec![self.title_field, self.body_field]);
        parser.set_field_boost(self.title_field, TITLE_BOOST);
        // Lenient: user input like `whip"` or `AND` must not fail the search
        let (parsed, _errors) = parser.parse_query_lenient(query);

        let top_docs = searcher.search(parsed.as_ref(), &TopDocs::with_limit(limit.max(1)))?;
        if top_docs.is_empty() {
            return Ok(Vec::new());
        }

        let mut snippets = SnippetGenerator::create(&searcher, parsed.as_ref(), self.body_field)?;
        snippets.set_max_num_chars(SNIPPET_MAX_CHARS);

        let mut hits = Vec::with_capacity(top_docs.len());
        for (_score, doc_address) in top_docs {
            let doc: TantivyDocument = searcher.doc(doc_address)?;
            let id = doc
                .get_first(self.id_field)
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string();
            if id.is_empty() {
                continue;
            }
            let title = doc
                .get_first(self.title_field)
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string();
            let fragment = snippets.snippet_from_doc(&doc).fragment().trim().to_string();

            hits.push(FullTextHit {
                id,
                title,
                snippet: (!fragment.is_empty()).then_some(fragment),
            });
        }

        Ok(hits)
    }
}

use anyhow::{Context, Result};
use serde::Serialize;
use tantivy::collector::TopDocs;
use tantivy::schema::{
    Field, IndexRecordOption, STORED, STRING, Schema, SchemaBuilder, TextFieldIndexing,
    TextOptions, Value,
};
use tantivy::tokenizer::{LowerCaser, RemoveLongFilter, SimpleTokenizer, TextAnalyzer};
use tantivy::{Index, IndexReader, IndexWriter, ReloadPolicy, TantivyDocument};

mod query;

pub use query::{Clause, Presence, QueryError, parse_query};

/// Tokenizer registered on every text field: split on non-alphanumerics, lowercase.
pub const TOKENIZER: &str = "notedex_text";

const WRITER_HEAP_BYTES: usize = 50_000_000;
const MAX_TOKEN_LENGTH: usize = 40;

/// Per-field score multipliers. A match on the name outranks a match on location,
/// which outranks a match in prose.
pub mod boost {
    pub const FILENAME: f32 = 10.0;
    pub const FOLDER: f32 = 5.0;
    pub const FULL_PATH: f32 = 3.0;
    pub const CONTENT: f32 = 1.0;
}

/// One indexed file: metadata plus a snapshot of its text at build time.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Document {
    /// Source-relative path; unique within a document store.
    pub id: String,
    pub filename: String,
    pub content: String,
    /// Containing directory relative to the source root, empty at the root.
    pub folder: String,
    pub full_path: String,
}

impl Document {
    pub fn new(
        id: impl Into<String>,
        filename: impl Into<String>,
        folder: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        let filename = filename.into();
        let folder = folder.into();
        let full_path = if folder.is_empty() {
            filename.clone()
        } else {
            format!("{folder}/{filename}")
        };
        Self {
            id: id.into(),
            filename,
            content: content.into(),
            folder,
            full_path,
        }
    }
}

/// A document reference with its relevance score.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct RankedHit {
    #[serde(rename = "ref")]
    pub reference: String,
    pub score: f32,
}

impl RankedHit {
    pub fn new(reference: impl Into<String>, score: f32) -> Self {
        Self {
            reference: reference.into(),
            score,
        }
    }
}

/// The searchable fields of a [`Document`], in boost order.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SearchField {
    Filename,
    Folder,
    FullPath,
    Content,
}

impl SearchField {
    pub const ALL: [SearchField; 4] = [
        SearchField::Filename,
        SearchField::Folder,
        SearchField::FullPath,
        SearchField::Content,
    ];

    pub fn name(self) -> &'static str {
        match self {
            SearchField::Filename => "filename",
            SearchField::Folder => "folder",
            SearchField::FullPath => "fullPath",
            SearchField::Content => "content",
        }
    }

    pub fn boost(self) -> f32 {
        match self {
            SearchField::Filename => boost::FILENAME,
            SearchField::Folder => boost::FOLDER,
            SearchField::FullPath => boost::FULL_PATH,
            SearchField::Content => boost::CONTENT,
        }
    }

    /// Resolves a field name as written in a query clause (case-insensitive).
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|field| field.name().eq_ignore_ascii_case(name))
    }
}

#[derive(Clone, Copy, Debug)]
pub(crate) struct IndexFields {
    pub(crate) id: Field,
    pub(crate) filename: Field,
    pub(crate) folder: Field,
    pub(crate) full_path: Field,
    pub(crate) content: Field,
}

impl IndexFields {
    pub(crate) fn get(&self, field: SearchField) -> Field {
        match field {
            SearchField::Filename => self.filename,
            SearchField::Folder => self.folder,
            SearchField::FullPath => self.full_path,
            SearchField::Content => self.content,
        }
    }
}

/// Immutable in-memory full-text index over a set of documents.
#[derive(Clone)]
pub struct DocumentIndex {
    #[allow(dead_code)]
    index: Index,
    reader: IndexReader,
    fields: IndexFields,
    analyzer: TextAnalyzer,
}

impl DocumentIndex {
    /// Index every document in one commit. Documents are keyed by `id`.
    pub fn build(documents: &[Document]) -> Result<Self> {
        let (schema, fields) = build_schema();
        let index = Index::create_in_ram(schema);
        let analyzer = build_analyzer();
        index.tokenizers().register(TOKENIZER, analyzer.clone());

        let mut writer: IndexWriter = index
            .writer_with_num_threads(1, WRITER_HEAP_BYTES)
            .context("failed to create index writer")?;

        for document in documents {
            let mut doc = TantivyDocument::new();
            doc.add_text(fields.id, &document.id);
            doc.add_text(fields.filename, &document.filename);
            doc.add_text(fields.folder, &document.folder);
            doc.add_text(fields.full_path, &document.full_path);
            doc.add_text(fields.content, &document.content);
            writer
                .add_document(doc)
                .with_context(|| format!("failed to add document {}", document.id))?;
        }

        writer.commit().context("failed to commit index writer")?;

        let reader = index
            .reader_builder()
            .reload_policy(ReloadPolicy::Manual)
            .try_into()
            .context("failed to create index reader")?;
        reader.reload().context("failed to load committed segments")?;

        tracing::debug!(documents = documents.len(), "document index committed");

        Ok(Self {
            index,
            reader,
            fields,
            analyzer,
        })
    }

    pub fn num_docs(&self) -> u64 {
        self.reader.searcher().num_docs()
    }

    /// Run a query string and return every matching document, best first.
    pub fn search(&self, query: &str) -> Result<Vec<RankedHit>, QueryError> {
        let clauses = parse_query(query)?;
        let mut analyzer = self.analyzer.clone();
        let searcher = self.reader.searcher();
        let compiled = query::compile(&clauses, &self.fields, &mut analyzer, &searcher)?;

        let limit = usize::max(1, searcher.num_docs() as usize);
        let top_docs = searcher
            .search(compiled.as_ref(), &TopDocs::with_limit(limit))
            .map_err(|err| QueryError::Execution(err.to_string()))?;

        let mut hits = Vec::with_capacity(top_docs.len());
        for (score, address) in top_docs {
            let retrieved: TantivyDocument = searcher
                .doc(address)
                .map_err(|err| QueryError::Execution(err.to_string()))?;
            if let Some(id) = retrieved.get_first(self.fields.id).and_then(|v| v.as_str()) {
                hits.push(RankedHit::new(id, score));
            }
        }
        Ok(hits)
    }
}

fn build_schema() -> (Schema, IndexFields) {
    let mut builder = SchemaBuilder::default();
    let text = TextOptions::default().set_indexing_options(
        TextFieldIndexing::default()
            .set_tokenizer(TOKENIZER)
            .set_index_option(IndexRecordOption::WithFreqsAndPositions),
    );

    let id = builder.add_text_field("id", STRING | STORED);
    let filename = builder.add_text_field(SearchField::Filename.name(), text.clone());
    let folder = builder.add_text_field(SearchField::Folder.name(), text.clone());
    let full_path = builder.add_text_field(SearchField::FullPath.name(), text.clone());
    let content = builder.add_text_field(SearchField::Content.name(), text);

    let fields = IndexFields {
        id,
        filename,
        folder,
        full_path,
        content,
    };
    (builder.build(), fields)
}

fn build_analyzer() -> TextAnalyzer {
    TextAnalyzer::builder(SimpleTokenizer::default())
        .filter(RemoveLongFilter::limit(MAX_TOKEN_LENGTH))
        .filter(LowerCaser)
        .build()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Vec<Document> {
        vec![
            Document::new("a.md", "a.md", "", "hello"),
            Document::new("sub/b.md", "b.md", "sub", "world hello"),
            Document::new("notes/rust.md", "rust.md", "notes", "ownership and borrowing"),
        ]
    }

    #[test]
    fn full_path_joins_folder_and_filename() {
        assert_eq!(Document::new("x.md", "x.md", "", "").full_path, "x.md");
        assert_eq!(Document::new("a/b/x.md", "x.md", "a/b", "").full_path, "a/b/x.md");
    }

    #[test]
    fn finds_documents_by_content_term() {
        let index = DocumentIndex::build(&sample()).unwrap();
        assert_eq!(index.num_docs(), 3);

        let hits = index.search("hello").unwrap();
        let refs: Vec<&str> = hits.iter().map(|h| h.reference.as_str()).collect();
        assert_eq!(refs.len(), 2);
        assert!(refs.contains(&"a.md"));
        assert!(refs.contains(&"sub/b.md"));
    }

    #[test]
    fn prefix_wildcard_matches_partial_terms() {
        let index = DocumentIndex::build(&sample()).unwrap();
        let hits = index.search("borr*").unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].reference, "notes/rust.md");
    }

    #[test]
    fn filename_match_outranks_content_match() {
        let docs = vec![
            Document::new("needle.md", "needle.md", "", "unrelated words"),
            Document::new("other.md", "other.md", "", "a needle in prose"),
        ];
        let index = DocumentIndex::build(&docs).unwrap();

        for query in ["needle", "needle*"] {
            let hits = index.search(query).unwrap();
            assert_eq!(hits.len(), 2, "query {query}");
            assert_eq!(hits[0].reference, "needle.md", "query {query}");
            assert!(hits[0].score >= hits[1].score);
        }
    }

    #[test]
    fn punctuated_wildcard_terms_match_like_plain_text() {
        let docs = vec![
            Document::new("notes/ownership.md", "ownership.md", "notes", "borrowing rules"),
            Document::new("notes/async-await.md", "async-await.md", "notes", "futures"),
            Document::new("notes/other.md", "other.md", "notes", "ownership is covered here"),
        ];
        let index = DocumentIndex::build(&docs).unwrap();

        let hits = index.search("ownership.md*").unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].reference, "notes/ownership.md");
        assert!(hits[0].score > boost::FILENAME);

        let hits = index.search("async-await*").unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].reference, "notes/async-await.md");
    }

    #[test]
    fn wildcard_scores_follow_term_frequency() {
        let docs = vec![
            Document::new("few.md", "few.md", "", "tokio runtime notes"),
            Document::new("many.md", "many.md", "", "tokio tokio tokio tokio tokio"),
        ];
        let index = DocumentIndex::build(&docs).unwrap();

        let hits = index.search("tok*").unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].reference, "many.md");
        assert!(hits[0].score > hits[1].score);
    }

    #[test]
    fn folder_field_surfaces_documents_by_location() {
        let index = DocumentIndex::build(&sample()).unwrap();
        let hits = index.search("sub*").unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].reference, "sub/b.md");
    }

    #[test]
    fn field_scoped_and_prohibited_clauses() {
        let index = DocumentIndex::build(&sample()).unwrap();

        let hits = index.search("folder:notes").unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].reference, "notes/rust.md");

        let hits = index.search("hello -world").unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].reference, "a.md");

        let hits = index.search("-hello").unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].reference, "notes/rust.md");
    }

    #[test]
    fn fuzzy_clause_tolerates_typos() {
        let index = DocumentIndex::build(&sample()).unwrap();
        let hits = index.search("ownershp~1").unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].reference, "notes/rust.md");
    }

    #[test]
    fn malformed_queries_are_errors() {
        let index = DocumentIndex::build(&sample()).unwrap();
        assert!(matches!(
            index.search("title:hello"),
            Err(QueryError::UnknownField(_))
        ));
        assert!(matches!(
            index.search("hello^2*"),
            Err(QueryError::InvalidBoost { .. })
        ));
    }

    #[test]
    fn empty_store_builds_and_matches_nothing() {
        let index = DocumentIndex::build(&[]).unwrap();
        assert_eq!(index.num_docs(), 0);
        assert!(index.search("anything*").unwrap().is_empty());
    }
}

//! In-memory BM25 index over chunk text, keyed by positional chunk id.
//!
//! Rebuilt from the store (or from a watcher snapshot) rather than persisted:
//! at the target scale of a few thousand chunks a fresh build is cheap, and
//! the store stays the single durable artifact.

use tantivy::collector::TopDocs;
use tantivy::query::QueryParser;
use tantivy::schema::*;
use tantivy::{doc, Index, IndexReader, IndexWriter, ReloadPolicy, TantivyDocument};

use crate::error::{RagError, Result};
use crate::search::tokenize;

const WRITER_BUFFER_BYTES: usize = 50_000_000;

pub struct Bm25Index {
    index: Index,
    reader: IndexReader,
    writer: IndexWriter,
    id_field: Field,
    text_field: Field,
}

impl Bm25Index {
    pub fn new() -> Result<Self> {
        let mut schema_builder = Schema::builder();
        let id_field = schema_builder.add_u64_field("id", INDEXED | STORED);
        let text_field = schema_builder.add_text_field("text", TEXT);
        let schema = schema_builder.build();

        let index = Index::create_in_ram(schema);
        let writer = index
            .writer(WRITER_BUFFER_BYTES)
            .map_err(|e| RagError::Index(format!("bm25 writer: {e}")))?;
        let reader = index
            .reader_builder()
            .reload_policy(ReloadPolicy::Manual)
            .try_into()
            .map_err(|e: tantivy::TantivyError| RagError::Index(format!("bm25 reader: {e}")))?;

        Ok(Self {
            index,
            reader,
            writer,
            id_field,
            text_field,
        })
    }

    pub fn insert(&mut self, id: u32, text: &str) -> Result<()> {
        self.writer
            .add_document(doc!(
                self.id_field => id as u64,
                self.text_field => text,
            ))
            .map_err(|e| RagError::Index(format!("bm25 add chunk {id}: {e}")))?;
        Ok(())
    }

    /// Commit pending inserts and make them visible to searches.
    pub fn commit(&mut self) -> Result<()> {
        self.writer
            .commit()
            .map_err(|e| RagError::Index(format!("bm25 commit: {e}")))?;
        self.reader
            .reload()
            .map_err(|e| RagError::Index(format!("bm25 reload: {e}")))?;
        Ok(())
    }

    /// Top-`limit` positional ids with BM25 scores, best first. The query is
    /// reduced to its tokens before parsing so user input can never produce
    /// query-syntax errors.
    pub fn search(&self, query: &str, limit: usize) -> Result<Vec<(u32, f32)>> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let tokens = tokenize(query);
        if tokens.is_empty() {
            return Ok(Vec::new());
        }
        let sanitized = tokens.join(" ");

        let searcher = self.reader.searcher();
        let parser = QueryParser::for_index(&self.index, vec![self.text_field]);
        let parsed = parser
            .parse_query(&sanitized)
            .map_err(|e| RagError::Index(format!("bm25 query: {e}")))?;

        let top_docs = searcher
            .search(&parsed, &TopDocs::with_limit(limit))
            .map_err(|e| RagError::Index(format!("bm25 search: {e}")))?;

        let mut results = Vec::with_capacity(top_docs.len());
        for (score, addr) in top_docs {
            let retrieved: TantivyDocument = searcher
                .doc(addr)
                .map_err(|e| RagError::Index(format!("bm25 doc fetch: {e}")))?;
            let id = retrieved
                .get_first(self.id_field)
                .and_then(|v| v.as_u64())
                .ok_or_else(|| RagError::Index("missing id field in bm25 doc".to_string()))?;
            results.push((id as u32, score));
        }
        Ok(results)
    }

    pub fn len(&self) -> u64 {
        self.reader.searcher().num_docs()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn populated(texts: &[&str]) -> Bm25Index {
        let mut index = Bm25Index::new().unwrap();
        for (i, text) in texts.iter().enumerate() {
            index.insert(i as u32, text).unwrap();
        }
        index.commit().unwrap();
        index
    }

    #[test]
    fn empty_index_returns_nothing() {
        let index = populated(&[]);
        assert!(index.is_empty());
        assert!(index.search("anything", 10).unwrap().is_empty());
    }

    #[test]
    fn insert_and_search() {
        let index = populated(&[
            "the quick brown fox jumps over the lazy dog",
            "a fast red fox leaps above a sleepy canine",
            "rust programming language tutorial",
        ]);
        assert_eq!(index.len(), 3);

        let results = index.search("fox", 10).unwrap();
        assert_eq!(results.len(), 2);
        let ids: Vec<u32> = results.iter().map(|(id, _)| *id).collect();
        assert!(ids.contains(&0) && ids.contains(&1));

        let results = index.search("rust", 10).unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].0, 2);
    }

    #[test]
    fn punctuation_in_query_is_harmless() {
        let index = populated(&["write-through caching policy with 30s TTL"]);
        let results = index.search("\"caching: policy!\" AND (ttl", 10).unwrap();
        assert_eq!(results.len(), 1);
    }

    #[test]
    fn limit_caps_results() {
        let texts: Vec<String> = (0..20).map(|i| format!("common term doc{i}")).collect();
        let refs: Vec<&str> = texts.iter().map(String::as_str).collect();
        let index = populated(&refs);
        let results = index.search("common", 5).unwrap();
        assert_eq!(results.len(), 5);
    }

    #[test]
    fn scores_rank_heavier_matches_first() {
        let index = populated(&[
            "cache cache cache invalidation",
            "one mention of cache here",
            "nothing relevant at all",
        ]);
        let results = index.search("cache", 10).unwrap();
        assert_eq!(results[0].0, 0);
        assert!(results[0].1 > results[1].1);
    }
}

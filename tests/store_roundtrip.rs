//! Persistence properties across process boundaries: vector alignment,
//! corruption detection, and the full save/reload round trip through a
//! real service.

mod common;

use std::ops::ControlFlow;

use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

use common::{test_config, write_kb_file, HashEmbedder};
use mdrag::error::RagError;
use mdrag::store::Store;
use mdrag::types::SearchRequest;
use mdrag::Service;

fn request(query: &str) -> SearchRequest {
    SearchRequest {
        query: query.to_string(),
        top_k: 10,
        ..Default::default()
    }
}

#[tokio::test]
async fn vectors_align_with_chunks_on_disk() {
    let temp = TempDir::new().unwrap();
    write_kb_file(temp.path(), "a.md", "first note body\n\nsecond paragraph\n");
    write_kb_file(temp.path(), "b.md", "third body of text\n");
    let ctx = CancellationToken::new();

    {
        let embedder = HashEmbedder::new(24);
        let svc = Service::with_embedder(temp.path(), &test_config(), Some(embedder)).unwrap();
        svc.build_index(&ctx).await.unwrap();
    }

    let store = Store::open(&temp.path().join(".mdrag").join("state")).unwrap();
    let chunks = store.load_chunks().unwrap();
    let vectors = store.load_vectors().unwrap();
    assert_eq!(chunks.len(), 3);
    assert_eq!(vectors.len(), chunks.len());
    assert!(vectors.iter().all(|v| v.len() == 24));
    assert_eq!(store.stored_vector_dims().unwrap(), Some(24));
}

#[tokio::test]
async fn corrupted_vector_file_fails_search_as_corrupt() {
    let temp = TempDir::new().unwrap();
    write_kb_file(temp.path(), "a.md", "vector backed content\n");
    let ctx = CancellationToken::new();

    {
        let embedder = HashEmbedder::new(16);
        let svc = Service::with_embedder(temp.path(), &test_config(), Some(embedder)).unwrap();
        svc.build_index(&ctx).await.unwrap();
    }

    // Flip one payload byte; the CRC32-C trailer must catch it.
    let vectors_path = temp.path().join(".mdrag").join("state").join("vectors.bin");
    let mut data = std::fs::read(&vectors_path).unwrap();
    let mid = data.len() / 2;
    data[mid] ^= 0x01;
    std::fs::write(&vectors_path, &data).unwrap();

    let embedder = HashEmbedder::new(16);
    let svc = Service::with_embedder(temp.path(), &test_config(), Some(embedder)).unwrap();
    let err = svc.search(&ctx, request("vector backed")).await.unwrap_err();
    assert!(matches!(err, RagError::Corrupt(_)), "got: {err:?}");
}

#[tokio::test]
async fn missing_vector_file_degrades_to_keyword_search() {
    let temp = TempDir::new().unwrap();
    write_kb_file(temp.path(), "a.md", "survives without vectors\n");
    let ctx = CancellationToken::new();

    {
        let embedder = HashEmbedder::new(16);
        let svc = Service::with_embedder(temp.path(), &test_config(), Some(embedder)).unwrap();
        svc.build_index(&ctx).await.unwrap();
    }

    std::fs::remove_file(temp.path().join(".mdrag").join("state").join("vectors.bin")).unwrap();

    let embedder = HashEmbedder::new(16);
    let svc = Service::with_embedder(temp.path(), &test_config(), Some(embedder)).unwrap();
    let result = svc.search(&ctx, request("survives without vectors")).await.unwrap();
    assert_eq!(result.full.items.len(), 1);
    // Ranking is carried entirely by the lexical leg.
    assert_eq!(result.full.items[0].score_breakdown.bm25_norm, 1.0);
}

#[tokio::test]
async fn chunk_metadata_survives_round_trip() {
    let temp = TempDir::new().unwrap();
    write_kb_file(
        temp.path(),
        "notes/tagged.md",
        "---\ntitle: Tagged Note\ndate: 2025-04-01\nproject: Platform\ntags: [Infra, CACHE, infra]\nconfidentiality: Confidential\n---\n# Section\n\nbody text for the round trip\n",
    );
    let ctx = CancellationToken::new();

    {
        let svc = Service::with_embedder(temp.path(), &test_config(), None).unwrap();
        svc.build_index(&ctx).await.unwrap();
    }

    let store = Store::open(&temp.path().join(".mdrag").join("state")).unwrap();
    let mut loaded = None;
    store
        .for_each_chunk(|_, chunk| {
            loaded = Some(chunk);
            ControlFlow::Break(())
        })
        .unwrap();
    let chunk = loaded.unwrap();

    assert_eq!(chunk.source_path, "notes/tagged.md");
    assert_eq!(chunk.chunk_ordinal, 1);
    assert_eq!(chunk.title, "Tagged Note");
    assert_eq!(chunk.date, "2025-04-01");
    assert_eq!(chunk.project, "platform");
    assert_eq!(chunk.tags, vec!["infra", "cache"]);
    assert_eq!(chunk.confidentiality, "confidential");
    assert_eq!(chunk.doc_type, "note");
    assert_eq!(chunk.chunk_loc.heading_path, "Section");
    assert!(!chunk.paragraph_id.is_empty());
    assert!(!chunk.document_version.is_empty());
}

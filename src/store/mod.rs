//! Crash-consistent persistence for the hybrid index: chunks and metadata in
//! an embedded redb database (`index.db`), vectors in a flat binary file
//! (`vectors.bin`), plus a durable dirty flag.
//!
//! Every save commits through the database's durable transaction path (or an
//! fsync-then-rename for the vector file) before returning, so a crash can
//! never expose a half-written artifact. The dirty flag is the
//! crash-consistency witness: set whenever in-memory state runs ahead of
//! disk, cleared only by a successful full flush.

use std::collections::HashMap;
use std::io::Write;
use std::ops::ControlFlow;
use std::path::{Path, PathBuf};

use redb::{Database, ReadableDatabase, ReadableTable, TableDefinition};

use crate::error::{RagError, Result};
use crate::types::{IndexInfo, IndexedChunk};

const META: TableDefinition<&str, &[u8]> = TableDefinition::new("meta");
const CHUNKS: TableDefinition<&[u8], &[u8]> = TableDefinition::new("chunks");

const KEY_INFO: &str = "info";
const KEY_DIRTY: &str = "dirty";

// vectors.bin format v1:
//
//   [4B magic "PCVF"][2B version LE][2B reserved]
//   [4B count LE][4B dims LE]
//   [count * dims * 4B float32 LE]
//   [4B CRC32-C of everything above]
//
// Total overhead: 20 bytes (header 16 + trailer 4).
const VEC_MAGIC: [u8; 4] = *b"PCVF";
const VEC_VERSION: u16 = 1;
const VEC_HEADER_SIZE: usize = 16;
const VEC_TRAILER_SIZE: usize = 4;

/// Persistent chunk + metadata container with a versioned, checksum-protected
/// vector file.
pub struct Store {
    dir: PathBuf,
    db: Database,
}

impl Store {
    /// Open or create the store in `dir`.
    pub fn open(dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(dir)
            .map_err(|e| RagError::io(e, format!("create index dir {}", dir.display())))?;
        let db = Database::create(dir.join("index.db"))?;

        // Make sure both tables exist so readers never race table creation.
        let txn = db.begin_write()?;
        txn.open_table(META)?;
        txn.open_table(CHUNKS)?;
        txn.commit()?;

        Ok(Self {
            dir: dir.to_path_buf(),
            db,
        })
    }

    /// Atomically set or clear the dirty marker. Durable on return so the
    /// flag survives a crash.
    pub fn set_dirty(&self, dirty: bool) -> Result<()> {
        let txn = self.db.begin_write()?;
        {
            let mut meta = txn.open_table(META)?;
            if dirty {
                meta.insert(KEY_DIRTY, [1u8].as_slice())?;
            } else {
                meta.remove(KEY_DIRTY)?;
            }
        }
        txn.commit()?;
        Ok(())
    }

    /// Cheap read of the dirty marker; absent means clean.
    pub fn is_dirty(&self) -> bool {
        let read = || -> Result<bool> {
            let txn = self.db.begin_read()?;
            let meta = txn.open_table(META)?;
            Ok(meta.get(KEY_DIRTY)?.is_some())
        };
        read().unwrap_or(false)
    }

    /// Write index metadata and all chunks in a single durable transaction.
    /// The chunks table is dropped and recreated so no stale entries survive.
    pub fn save_index(&self, info: &IndexInfo, chunks: &[IndexedChunk]) -> Result<()> {
        let info_data =
            serde_json::to_vec(info).map_err(|e| RagError::json(e, "serialize index info"))?;

        let txn = self.db.begin_write()?;
        {
            let mut meta = txn.open_table(META)?;
            meta.insert(KEY_INFO, info_data.as_slice())?;
        }
        txn.delete_table(CHUNKS)?;
        {
            let mut table = txn.open_table(CHUNKS)?;
            for (i, chunk) in chunks.iter().enumerate() {
                let data = serde_json::to_vec(chunk)
                    .map_err(|e| RagError::json(e, format!("serialize chunk {i}")))?;
                let key = (i as u32).to_be_bytes();
                table.insert(key.as_slice(), data.as_slice())?;
            }
        }
        txn.commit()?;
        Ok(())
    }

    /// Read only the index metadata without loading chunks.
    pub fn load_index_info(&self) -> Result<IndexInfo> {
        let txn = self.db.begin_read()?;
        let meta = txn.open_table(META)?;
        let Some(guard) = meta.get(KEY_INFO)? else {
            return Err(RagError::NotBuilt);
        };
        serde_json::from_slice(guard.value()).map_err(|e| RagError::json(e, "parse index info"))
    }

    /// Read all chunks in positional order. Use only when the entire chunk
    /// set must be resident; prefer [`Store::for_each_chunk`] for streaming.
    pub fn load_chunks(&self) -> Result<Vec<IndexedChunk>> {
        let mut chunks = Vec::new();
        self.for_each_chunk(|_, chunk| {
            chunks.push(chunk);
            ControlFlow::Continue(())
        })?;
        Ok(chunks)
    }

    /// Stream chunks in positional order without materializing the full
    /// list. The callback can abort iteration with `ControlFlow::Break`.
    pub fn for_each_chunk(
        &self,
        mut f: impl FnMut(u32, IndexedChunk) -> ControlFlow<()>,
    ) -> Result<()> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(CHUNKS)?;
        for entry in table.iter()? {
            let (key, value) = entry?;
            let idx = u32::from_be_bytes(
                key.value()
                    .try_into()
                    .map_err(|_| RagError::Corrupt("chunk key is not 4 bytes".to_string()))?,
            );
            let chunk: IndexedChunk = serde_json::from_slice(value.value())
                .map_err(|e| RagError::json(e, format!("parse chunk {idx}")))?;
            if let ControlFlow::Break(()) = f(idx, chunk) {
                break;
            }
        }
        Ok(())
    }

    /// Batch random access by positional index in one read transaction.
    /// Missing indexes are silently absent from the result.
    pub fn load_chunks_by_indexes(&self, ids: &[u32]) -> Result<HashMap<u32, IndexedChunk>> {
        let mut result = HashMap::with_capacity(ids.len());
        let txn = self.db.begin_read()?;
        let table = txn.open_table(CHUNKS)?;
        for &id in ids {
            let key = id.to_be_bytes();
            if let Some(guard) = table.get(key.as_slice())? {
                let chunk: IndexedChunk = serde_json::from_slice(guard.value())
                    .map_err(|e| RagError::json(e, format!("parse chunk {id}")))?;
                result.insert(id, chunk);
            }
        }
        Ok(result)
    }

    /// Find a chunk by source path and ordinal. Linear scan with early
    /// termination; avoids keeping the chunk set in memory.
    pub fn load_chunk_by_source_and_ordinal(
        &self,
        source_path: &str,
        ordinal: u32,
    ) -> Result<IndexedChunk> {
        let norm = source_path.replace('\\', "/");
        let mut found = None;
        self.for_each_chunk(|_, chunk| {
            if chunk.source_path == norm && chunk.chunk_ordinal == ordinal {
                found = Some(chunk);
                ControlFlow::Break(())
            } else {
                ControlFlow::Continue(())
            }
        })?;
        found.ok_or(RagError::NotFound)
    }

    /// Write all embedding vectors as one flat binary file, atomically
    /// (temp file + fsync + rename). An empty vector set deletes the file.
    pub fn save_vectors(&self, vectors: &[Vec<f32>]) -> Result<()> {
        let path = self.vectors_path();
        if vectors.is_empty() {
            match std::fs::remove_file(&path) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(RagError::io(e, "remove vectors.bin")),
            }
            return Ok(());
        }

        let dims = vectors[0].len();
        for (i, v) in vectors.iter().enumerate() {
            if v.len() != dims {
                return Err(RagError::InvalidArgument(format!(
                    "vector {i} has {} dims, expected {dims}",
                    v.len()
                )));
            }
        }

        let payload_size = vectors.len() * dims * 4;
        let mut buf = Vec::with_capacity(VEC_HEADER_SIZE + payload_size + VEC_TRAILER_SIZE);
        buf.extend_from_slice(&VEC_MAGIC);
        buf.extend_from_slice(&VEC_VERSION.to_le_bytes());
        buf.extend_from_slice(&0u16.to_le_bytes()); // reserved
        buf.extend_from_slice(&(vectors.len() as u32).to_le_bytes());
        buf.extend_from_slice(&(dims as u32).to_le_bytes());
        for vec in vectors {
            for v in vec {
                buf.extend_from_slice(&v.to_le_bytes());
            }
        }
        let checksum = crc32c::crc32c(&buf);
        buf.extend_from_slice(&checksum.to_le_bytes());

        let tmp = path.with_extension("bin.tmp");
        let mut file = std::fs::File::create(&tmp)
            .map_err(|e| RagError::io(e, format!("create {}", tmp.display())))?;
        file.write_all(&buf)
            .map_err(|e| RagError::io(e, "write vectors.bin"))?;
        file.sync_all()
            .map_err(|e| RagError::io(e, "sync vectors.bin"))?;
        drop(file);
        std::fs::rename(&tmp, &path)
            .map_err(|e| RagError::io(e, format!("rename {} into place", tmp.display())))?;
        Ok(())
    }

    /// Read the binary vector file, validating magic, version, declared size
    /// and CRC32-C. Absent file means no embeddings were stored.
    pub fn load_vectors(&self) -> Result<Vec<Vec<f32>>> {
        let data = self.read_vector_file()?;
        let (count, dims) = validate_vector_file(&data)?;

        let mut vectors = Vec::with_capacity(count);
        let mut off = VEC_HEADER_SIZE;
        for _ in 0..count {
            let mut vec = Vec::with_capacity(dims);
            for _ in 0..dims {
                let raw: [u8; 4] = data[off..off + 4].try_into().expect("bounds checked");
                vec.push(f32::from_le_bytes(raw));
                off += 4;
            }
            vectors.push(vec);
        }
        Ok(vectors)
    }

    /// Stream vectors one at a time. The callback receives a freshly
    /// allocated vector it may retain. No-op when the file is absent.
    pub fn for_each_vector(&self, mut f: impl FnMut(u32, Vec<f32>) -> ControlFlow<()>) -> Result<()> {
        let data = match self.read_vector_file() {
            Ok(data) => data,
            Err(RagError::NotBuilt) => return Ok(()),
            Err(e) => return Err(e),
        };
        let (count, dims) = validate_vector_file(&data)?;

        let mut off = VEC_HEADER_SIZE;
        for i in 0..count {
            let mut vec = Vec::with_capacity(dims);
            for _ in 0..dims {
                let raw: [u8; 4] = data[off..off + 4].try_into().expect("bounds checked");
                vec.push(f32::from_le_bytes(raw));
                off += 4;
            }
            if let ControlFlow::Break(()) = f(i as u32, vec) {
                break;
            }
        }
        Ok(())
    }

    /// Dimensionality declared by the stored vector file, if present.
    pub fn stored_vector_dims(&self) -> Result<Option<u32>> {
        match self.read_vector_file() {
            Ok(data) => {
                let (_, dims) = validate_vector_file(&data)?;
                Ok(Some(dims as u32))
            }
            Err(RagError::NotBuilt) => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn read_vector_file(&self) -> Result<Vec<u8>> {
        match std::fs::read(self.vectors_path()) {
            Ok(data) => Ok(data),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(RagError::NotBuilt),
            Err(e) => Err(RagError::io(e, "read vectors.bin")),
        }
    }

    fn vectors_path(&self) -> PathBuf {
        self.dir.join("vectors.bin")
    }
}

/// Validate header, declared size and checksum; returns (count, dims).
fn validate_vector_file(data: &[u8]) -> Result<(usize, usize)> {
    if data.len() < VEC_HEADER_SIZE + VEC_TRAILER_SIZE {
        return Err(RagError::Corrupt(format!(
            "vectors.bin too short ({} bytes)",
            data.len()
        )));
    }
    if data[0..4] != VEC_MAGIC {
        return Err(RagError::Corrupt(format!(
            "bad magic: {:02x?}",
            &data[0..4]
        )));
    }
    let version = u16::from_le_bytes(data[4..6].try_into().expect("sized"));
    if version != VEC_VERSION {
        return Err(RagError::Corrupt(format!("unsupported version {version}")));
    }
    let count = u32::from_le_bytes(data[8..12].try_into().expect("sized")) as usize;
    let dims = u32::from_le_bytes(data[12..16].try_into().expect("sized")) as usize;
    let expected = VEC_HEADER_SIZE + count * dims * 4 + VEC_TRAILER_SIZE;
    if data.len() != expected {
        return Err(RagError::Corrupt(format!(
            "declared size {expected} bytes, file is {} bytes",
            data.len()
        )));
    }

    let payload_end = VEC_HEADER_SIZE + count * dims * 4;
    let stored = u32::from_le_bytes(
        data[payload_end..payload_end + 4]
            .try_into()
            .expect("sized"),
    );
    let computed = crc32c::crc32c(&data[..payload_end]);
    if stored != computed {
        return Err(RagError::Corrupt(format!(
            "checksum mismatch: stored {stored:08x}, computed {computed:08x}"
        )));
    }
    Ok((count, dims))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn chunk(path: &str, ordinal: u32, text: &str) -> IndexedChunk {
        IndexedChunk {
            source_path: path.to_string(),
            chunk_ordinal: ordinal,
            chunk_loc: Default::default(),
            document_version: "v1".to_string(),
            paragraph_id: format!("{path}#{ordinal}"),
            title: String::new(),
            date: String::new(),
            project: String::new(),
            tags: Vec::new(),
            confidentiality: "internal".to_string(),
            doc_type: "note".to_string(),
            text: text.to_string(),
            snippet: text.to_string(),
            flags: Vec::new(),
            risk_score: 0.0,
        }
    }

    fn info() -> IndexInfo {
        IndexInfo {
            index_version: "idx-1".to_string(),
            index_state: "healthy".to_string(),
            built_at: "2025-01-01T00:00:00Z".to_string(),
            total_documents: 1,
            total_chunks: 2,
            ..Default::default()
        }
    }

    #[test]
    fn open_creates_database_file() {
        let temp = TempDir::new().unwrap();
        let _store = Store::open(temp.path()).unwrap();
        assert!(temp.path().join("index.db").exists());
    }

    #[test]
    fn index_round_trip() {
        let temp = TempDir::new().unwrap();
        let store = Store::open(temp.path()).unwrap();
        let chunks = vec![chunk("a.md", 1, "alpha"), chunk("a.md", 2, "beta")];

        store.save_index(&info(), &chunks).unwrap();

        let loaded_info = store.load_index_info().unwrap();
        assert_eq!(loaded_info.index_version, "idx-1");
        assert_eq!(loaded_info.total_chunks, 2);

        let loaded = store.load_chunks().unwrap();
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded[0].text, "alpha");
        assert_eq!(loaded[1].text, "beta");
    }

    #[test]
    fn save_index_replaces_stale_chunks() {
        let temp = TempDir::new().unwrap();
        let store = Store::open(temp.path()).unwrap();

        let many: Vec<_> = (1..=5).map(|i| chunk("a.md", i, "x")).collect();
        store.save_index(&info(), &many).unwrap();
        store.save_index(&info(), &[chunk("b.md", 1, "y")]).unwrap();

        let loaded = store.load_chunks().unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].source_path, "b.md");
    }

    #[test]
    fn load_info_on_empty_store_is_not_built() {
        let temp = TempDir::new().unwrap();
        let store = Store::open(temp.path()).unwrap();
        assert!(matches!(store.load_index_info(), Err(RagError::NotBuilt)));
    }

    #[test]
    fn dirty_flag_survives_reopen() {
        let temp = TempDir::new().unwrap();
        {
            let store = Store::open(temp.path()).unwrap();
            assert!(!store.is_dirty());
            store.set_dirty(true).unwrap();
            assert!(store.is_dirty());
        }
        {
            let store = Store::open(temp.path()).unwrap();
            assert!(store.is_dirty());
            store.set_dirty(false).unwrap();
        }
        {
            let store = Store::open(temp.path()).unwrap();
            assert!(!store.is_dirty());
        }
    }

    #[test]
    fn vectors_round_trip() {
        let temp = TempDir::new().unwrap();
        let store = Store::open(temp.path()).unwrap();
        let vectors = vec![vec![1.0f32, 2.0, 3.0], vec![-0.5, 0.25, 4.5]];

        store.save_vectors(&vectors).unwrap();
        let loaded = store.load_vectors().unwrap();
        assert_eq!(loaded, vectors);
        assert_eq!(store.stored_vector_dims().unwrap(), Some(3));
    }

    #[test]
    fn empty_vectors_removes_file() {
        let temp = TempDir::new().unwrap();
        let store = Store::open(temp.path()).unwrap();
        store.save_vectors(&[vec![1.0, 2.0]]).unwrap();
        assert!(temp.path().join("vectors.bin").exists());

        store.save_vectors(&[]).unwrap();
        assert!(!temp.path().join("vectors.bin").exists());
        assert!(matches!(store.load_vectors(), Err(RagError::NotBuilt)));
    }

    #[test]
    fn corrupted_payload_fails_crc() {
        let temp = TempDir::new().unwrap();
        let store = Store::open(temp.path()).unwrap();
        store.save_vectors(&[vec![1.0, 2.0], vec![3.0, 4.0]]).unwrap();

        let path = temp.path().join("vectors.bin");
        let mut data = std::fs::read(&path).unwrap();
        data[20] ^= 0xff;
        std::fs::write(&path, &data).unwrap();

        assert!(matches!(store.load_vectors(), Err(RagError::Corrupt(_))));
    }

    #[test]
    fn bad_magic_is_corrupt() {
        let temp = TempDir::new().unwrap();
        let store = Store::open(temp.path()).unwrap();
        store.save_vectors(&[vec![1.0]]).unwrap();

        let path = temp.path().join("vectors.bin");
        let mut data = std::fs::read(&path).unwrap();
        data[0] = b'X';
        std::fs::write(&path, &data).unwrap();

        assert!(matches!(store.load_vectors(), Err(RagError::Corrupt(_))));
    }

    #[test]
    fn truncated_file_is_corrupt() {
        let temp = TempDir::new().unwrap();
        let store = Store::open(temp.path()).unwrap();
        store.save_vectors(&[vec![1.0, 2.0, 3.0]]).unwrap();

        let path = temp.path().join("vectors.bin");
        let data = std::fs::read(&path).unwrap();
        std::fs::write(&path, &data[..data.len() - 3]).unwrap();

        assert!(matches!(store.load_vectors(), Err(RagError::Corrupt(_))));
    }

    #[test]
    fn batch_access_by_index() {
        let temp = TempDir::new().unwrap();
        let store = Store::open(temp.path()).unwrap();
        let chunks: Vec<_> = (1..=4).map(|i| chunk("a.md", i, "t")).collect();
        store.save_index(&info(), &chunks).unwrap();

        let map = store.load_chunks_by_indexes(&[0, 2, 99]).unwrap();
        assert_eq!(map.len(), 2);
        assert_eq!(map.get(&0).unwrap().chunk_ordinal, 1);
        assert_eq!(map.get(&2).unwrap().chunk_ordinal, 3);
    }

    #[test]
    fn lookup_by_source_and_ordinal() {
        let temp = TempDir::new().unwrap();
        let store = Store::open(temp.path()).unwrap();
        store
            .save_index(
                &info(),
                &[chunk("a.md", 1, "one"), chunk("b.md", 1, "two")],
            )
            .unwrap();

        let found = store.load_chunk_by_source_and_ordinal("b.md", 1).unwrap();
        assert_eq!(found.text, "two");
        assert!(matches!(
            store.load_chunk_by_source_and_ordinal("c.md", 1),
            Err(RagError::NotFound)
        ));
    }

    #[test]
    fn for_each_chunk_streams_in_order_and_aborts() {
        let temp = TempDir::new().unwrap();
        let store = Store::open(temp.path()).unwrap();
        let chunks: Vec<_> = (1..=5).map(|i| chunk("a.md", i, "t")).collect();
        store.save_index(&info(), &chunks).unwrap();

        let mut seen = Vec::new();
        store
            .for_each_chunk(|idx, c| {
                seen.push((idx, c.chunk_ordinal));
                if idx == 2 {
                    ControlFlow::Break(())
                } else {
                    ControlFlow::Continue(())
                }
            })
            .unwrap();
        assert_eq!(seen, vec![(0, 1), (1, 2), (2, 3)]);
    }

    #[test]
    fn for_each_vector_matches_saved() {
        let temp = TempDir::new().unwrap();
        let store = Store::open(temp.path()).unwrap();
        let vectors = vec![vec![1.0f32, 0.0], vec![0.0, 1.0], vec![0.5, 0.5]];
        store.save_vectors(&vectors).unwrap();

        let mut streamed = Vec::new();
        store
            .for_each_vector(|_, v| {
                streamed.push(v);
                ControlFlow::Continue(())
            })
            .unwrap();
        assert_eq!(streamed, vectors);
    }

    #[test]
    fn store_round_trip_after_reopen() {
        let temp = TempDir::new().unwrap();
        let chunks = vec![chunk("a.md", 1, "alpha"), chunk("b.md", 1, "beta")];
        let vectors = vec![vec![0.1f32, 0.2], vec![0.3, 0.4]];
        {
            let store = Store::open(temp.path()).unwrap();
            store.save_index(&info(), &chunks).unwrap();
            store.save_vectors(&vectors).unwrap();
        }
        {
            let store = Store::open(temp.path()).unwrap();
            let loaded_chunks = store.load_chunks().unwrap();
            let loaded_vectors = store.load_vectors().unwrap();
            assert_eq!(loaded_chunks.len(), chunks.len());
            assert_eq!(loaded_chunks[1].text, "beta");
            assert_eq!(loaded_vectors, vectors);
        }
    }
}

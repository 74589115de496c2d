//! On-disk chunk storage.
//!
//! Layout: `<root>/tmp/<sessionId>/<chunkIndex>.part`.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

use chunkline_protocol::constants::{CHUNK_FILE_EXTENSION, STAGING_DIR};

use crate::TransferError;
use crate::session::SessionId;

/// Parses `"<index>.part"` into its index.
pub fn parse_chunk_file_name(name: &str) -> Option<u64> {
    let stem = name.strip_suffix(CHUNK_FILE_EXTENSION)?.strip_suffix('.')?;
    if stem.is_empty() || !stem.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    stem.parse().ok()
}

/// Sorts chunk file names by numeric index, dropping anything that is not
/// a chunk file. `"10.part"` sorts after `"2.part"`.
pub fn sort_chunk_files<S: AsRef<str>>(names: &[S]) -> Vec<String> {
    let mut indexed: Vec<(u64, String)> = names
        .iter()
        .filter_map(|n| parse_chunk_file_name(n.as_ref()).map(|i| (i, n.as_ref().to_string())))
        .collect();
    indexed.sort_by_key(|(i, _)| *i);
    indexed.into_iter().map(|(_, n)| n).collect()
}

/// Persists chunk payloads until the assembler consumes them.
#[derive(Debug, Clone)]
pub struct ChunkStore {
    root: PathBuf,
}

impl ChunkStore {
    /// Creates a store rooted at the upload directory.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Creates the upload root and its staging directory.
    pub async fn init(&self) -> Result<(), TransferError> {
        tokio::fs::create_dir_all(self.staging_dir()).await?;
        Ok(())
    }

    /// Upload root; artifacts are written directly inside it.
    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn staging_dir(&self) -> PathBuf {
        self.root.join(STAGING_DIR)
    }

    pub fn session_dir(&self, id: &SessionId) -> PathBuf {
        self.staging_dir().join(id.as_str())
    }

    pub fn chunk_path(&self, id: &SessionId, index: u64) -> PathBuf {
        self.session_dir(id)
            .join(format!("{index}.{CHUNK_FILE_EXTENSION}"))
    }

    /// Persists a chunk payload, replacing any earlier payload for the
    /// same index.
    ///
    /// The bytes go to a uniquely named sibling first and are renamed into
    /// place, so readers never observe a torn `.part` file and two
    /// concurrent writes of one index cannot interleave.
    pub async fn write_chunk(
        &self,
        id: &SessionId,
        index: u64,
        data: &[u8],
    ) -> Result<(), TransferError> {
        let dir = self.session_dir(id);
        tokio::fs::create_dir_all(&dir).await?;

        let final_path = self.chunk_path(id, index);
        let tmp_path = dir.join(format!("{index}.{}.tmp", uuid::Uuid::new_v4().simple()));

        let result = async {
            let mut file = tokio::fs::File::create(&tmp_path).await?;
            file.write_all(data).await?;
            file.sync_all().await?;
            drop(file);
            tokio::fs::rename(&tmp_path, &final_path).await
        }
        .await;

        if let Err(e) = result {
            let _ = tokio::fs::remove_file(&tmp_path).await;
            warn!(session_id = %id, chunk_index = index, error = %e, "chunk write failed");
            return Err(e.into());
        }

        debug!(session_id = %id, chunk_index = index, bytes = data.len(), "chunk stored");
        Ok(())
    }

    pub async fn read_chunk(&self, id: &SessionId, index: u64) -> Result<Vec<u8>, TransferError> {
        Ok(tokio::fs::read(self.chunk_path(id, index)).await?)
    }

    /// Opens a chunk for streaming.
    pub async fn open_chunk(
        &self,
        id: &SessionId,
        index: u64,
    ) -> Result<tokio::fs::File, TransferError> {
        Ok(tokio::fs::File::open(self.chunk_path(id, index)).await?)
    }

    /// Stored chunk indices, ascending numerically.
    ///
    /// A session with no directory yet has no chunks.
    pub async fn list_chunks(&self, id: &SessionId) -> Result<Vec<u64>, TransferError> {
        let mut dir = match tokio::fs::read_dir(self.session_dir(id)).await {
            Ok(dir) => dir,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut indices = Vec::new();
        while let Some(entry) = dir.next_entry().await? {
            if let Some(index) = entry.file_name().to_str().and_then(parse_chunk_file_name) {
                indices.push(index);
            }
        }
        indices.sort_unstable();
        Ok(indices)
    }

    pub async fn delete_chunk(&self, id: &SessionId, index: u64) -> Result<(), TransferError> {
        match tokio::fs::remove_file(self.chunk_path(id, index)).await {
            Err(e) if e.kind() != ErrorKind::NotFound => Err(e.into()),
            _ => Ok(()),
        }
    }

    /// Removes every stored chunk of a session. Missing data is not an error.
    pub async fn delete_session_chunks(&self, id: &SessionId) -> Result<(), TransferError> {
        match tokio::fs::remove_dir_all(self.session_dir(id)).await {
            Err(e) if e.kind() != ErrorKind::NotFound => Err(e.into()),
            _ => {
                debug!(session_id = %id, "session chunks deleted");
                Ok(())
            }
        }
    }

    /// Session ids that have a staging directory.
    ///
    /// Directory names that are not valid session ids are skipped.
    pub async fn staged_sessions(&self) -> Result<Vec<SessionId>, TransferError> {
        let mut dir = match tokio::fs::read_dir(self.staging_dir()).await {
            Ok(dir) => dir,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut ids = Vec::new();
        while let Some(entry) = dir.next_entry().await? {
            if !entry.file_type().await?.is_dir() {
                continue;
            }
            if let Some(id) = entry
                .file_name()
                .to_str()
                .and_then(|name| SessionId::parse(name).ok())
            {
                ids.push(id);
            }
        }
        Ok(ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn numeric_sort_of_chunk_files() {
        let sorted = sort_chunk_files(&["2.part", "10.part", "1.part"]);
        assert_eq!(sorted, vec!["1.part", "2.part", "10.part"]);
    }

    #[test]
    fn sort_skips_foreign_files() {
        let sorted = sort_chunk_files(&["3.part", "notes.txt", "1.part.tmp", "x.part", "0.part"]);
        assert_eq!(sorted, vec!["0.part", "3.part"]);
    }

    #[test]
    fn parse_chunk_file_names() {
        assert_eq!(parse_chunk_file_name("0.part"), Some(0));
        assert_eq!(parse_chunk_file_name("42.part"), Some(42));
        assert_eq!(parse_chunk_file_name(".part"), None);
        assert_eq!(parse_chunk_file_name("-1.part"), None);
        assert_eq!(parse_chunk_file_name("1part"), None);
        assert_eq!(parse_chunk_file_name("1.2.part"), None);
    }

    #[tokio::test]
    async fn write_then_read_chunk() {
        let dir = TempDir::new().unwrap();
        let store = ChunkStore::new(dir.path());
        let id = SessionId::generate();

        store.write_chunk(&id, 0, b"hello").await.unwrap();
        assert_eq!(store.read_chunk(&id, 0).await.unwrap(), b"hello");
        assert!(
            dir.path()
                .join("tmp")
                .join(id.as_str())
                .join("0.part")
                .exists()
        );
    }

    #[tokio::test]
    async fn rewrite_overwrites_payload() {
        let dir = TempDir::new().unwrap();
        let store = ChunkStore::new(dir.path());
        let id = SessionId::generate();

        store.write_chunk(&id, 3, b"first").await.unwrap();
        store.write_chunk(&id, 3, b"second!").await.unwrap();

        assert_eq!(store.read_chunk(&id, 3).await.unwrap(), b"second!");
        assert_eq!(store.list_chunks(&id).await.unwrap(), vec![3]);
    }

    #[tokio::test]
    async fn list_chunks_sorted_numerically() {
        let dir = TempDir::new().unwrap();
        let store = ChunkStore::new(dir.path());
        let id = SessionId::generate();

        for index in [10, 2, 1] {
            store.write_chunk(&id, index, b"x").await.unwrap();
        }
        // Leftovers that must be ignored.
        std::fs::write(store.session_dir(&id).join("stray.txt"), b"?").unwrap();

        assert_eq!(store.list_chunks(&id).await.unwrap(), vec![1, 2, 10]);
    }

    #[tokio::test]
    async fn list_chunks_of_unknown_session_is_empty() {
        let dir = TempDir::new().unwrap();
        let store = ChunkStore::new(dir.path());
        assert!(store.list_chunks(&SessionId::generate()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn delete_session_chunks_tolerates_missing_dir() {
        let dir = TempDir::new().unwrap();
        let store = ChunkStore::new(dir.path());
        let id = SessionId::generate();

        store.write_chunk(&id, 0, b"x").await.unwrap();
        store.delete_session_chunks(&id).await.unwrap();
        assert!(!store.session_dir(&id).exists());
        store.delete_session_chunks(&id).await.unwrap();
    }

    #[tokio::test]
    async fn delete_chunk_removes_one_index() {
        let dir = TempDir::new().unwrap();
        let store = ChunkStore::new(dir.path());
        let id = SessionId::generate();

        store.write_chunk(&id, 0, b"a").await.unwrap();
        store.write_chunk(&id, 1, b"b").await.unwrap();
        store.delete_chunk(&id, 0).await.unwrap();
        store.delete_chunk(&id, 0).await.unwrap();

        assert_eq!(store.list_chunks(&id).await.unwrap(), vec![1]);
    }

    #[tokio::test]
    async fn staged_sessions_lists_valid_dirs() {
        let dir = TempDir::new().unwrap();
        let store = ChunkStore::new(dir.path());
        store.init().await.unwrap();

        let id = SessionId::generate();
        store.write_chunk(&id, 0, b"x").await.unwrap();
        std::fs::create_dir_all(store.staging_dir().join("not-a-session")).unwrap();

        assert_eq!(store.staged_sessions().await.unwrap(), vec![id]);
    }
}

//! Staging store
//!
//! Durable intermediate representation between source and warehouse: a local
//! compressed parquet file plus a remote copy in the object store at a path
//! derived deterministically from the dataset kind. All four operations are
//! idempotent overwrites; the store keeps no history.

pub mod columnar;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use mdp_common::Result;
use tracing::{info, instrument};

use crate::catalog::DatasetKind;
use crate::dataset::RawDataset;
use crate::storage::{ObjectStore, PutResult};

pub struct StagingStore {
    data_dir: PathBuf,
    store: Arc<dyn ObjectStore>,
}

impl StagingStore {
    pub fn new(data_dir: impl Into<PathBuf>, store: Arc<dyn ObjectStore>) -> Self {
        Self {
            data_dir: data_dir.into(),
            store,
        }
    }

    /// Local path a staged artifact for `kind` lives at.
    pub fn local_path(&self, kind: DatasetKind) -> PathBuf {
        self.data_dir.join(kind.local_filename())
    }

    /// Serialize the dataset to a local compressed parquet file, overwriting
    /// any previous artifact for the kind.
    #[instrument(skip(self, dataset))]
    pub async fn write_local(&self, dataset: &RawDataset, kind: DatasetKind) -> Result<PathBuf> {
        let bytes = columnar::encode(dataset, kind)?;

        tokio::fs::create_dir_all(&self.data_dir).await?;
        let path = self.local_path(kind);
        tokio::fs::write(&path, &bytes).await?;

        info!(
            dataset = %kind,
            path = %path.display(),
            rows = dataset.num_rows(),
            bytes = bytes.len(),
            "Wrote staged artifact"
        );

        Ok(path)
    }

    /// Copy a local staged file to the object store at the kind's
    /// deterministic remote key.
    #[instrument(skip(self))]
    pub async fn upload(&self, local_path: &Path, kind: DatasetKind) -> Result<PutResult> {
        let data = tokio::fs::read(local_path).await?;
        let result = self.store.put(&kind.remote_key(), data).await?;

        info!(
            dataset = %kind,
            key = %result.key,
            size = result.size,
            checksum = %result.checksum,
            "Uploaded staged artifact"
        );

        Ok(result)
    }

    /// Download the remote staged artifact to the local data directory.
    ///
    /// Fails with `ArtifactNotFound` when no prior upload exists for the kind.
    #[instrument(skip(self))]
    pub async fn download(&self, kind: DatasetKind) -> Result<PathBuf> {
        let data = self.store.get(&kind.remote_key()).await?;

        tokio::fs::create_dir_all(&self.data_dir).await?;
        let path = self.local_path(kind);
        tokio::fs::write(&path, &data).await?;

        info!(
            dataset = %kind,
            path = %path.display(),
            bytes = data.len(),
            "Downloaded staged artifact"
        );

        Ok(path)
    }

    /// Deserialize a local staged parquet file.
    pub async fn read_local(&self, path: &Path) -> Result<RawDataset> {
        let bytes = tokio::fs::read(path).await?;
        columnar::decode(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::CellValue;
    use crate::storage::MemoryObjectStore;
    use mdp_common::EtlError;

    fn users_dataset() -> RawDataset {
        let mut ds = RawDataset::new(vec!["identifier".into(), "username".into()]);
        ds.push_row(vec![
            CellValue::Text("u1".into()),
            CellValue::Text("alice".into()),
        ])
        .unwrap();
        ds
    }

    fn staging(dir: &Path) -> StagingStore {
        StagingStore::new(dir, Arc::new(MemoryObjectStore::new()))
    }

    #[tokio::test]
    async fn local_write_read_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = staging(dir.path());

        let ds = users_dataset();
        let path = store.write_local(&ds, DatasetKind::Users).await.unwrap();
        let read = store.read_local(&path).await.unwrap();
        assert_eq!(read, ds);
    }

    #[tokio::test]
    async fn upload_then_download_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = staging(dir.path());

        let ds = users_dataset();
        let path = store.write_local(&ds, DatasetKind::Users).await.unwrap();
        let put = store.upload(&path, DatasetKind::Users).await.unwrap();
        assert_eq!(put.key, "data/users.parquet");

        // Remove the local copy; download must restore an equivalent file.
        tokio::fs::remove_file(&path).await.unwrap();
        let restored = store.download(DatasetKind::Users).await.unwrap();
        let read = store.read_local(&restored).await.unwrap();
        assert_eq!(read, ds);
    }

    #[tokio::test]
    async fn download_before_upload_is_artifact_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let store = staging(dir.path());

        let err = store.download(DatasetKind::Movies).await.unwrap_err();
        assert!(matches!(err, EtlError::ArtifactNotFound(_)));
    }

    #[tokio::test]
    async fn rewrite_overwrites_previous_artifact() {
        let dir = tempfile::tempdir().unwrap();
        let store = staging(dir.path());

        let first = users_dataset();
        store.write_local(&first, DatasetKind::Users).await.unwrap();

        let mut second = users_dataset();
        second
            .push_row(vec![
                CellValue::Text("u2".into()),
                CellValue::Text("bob".into()),
            ])
            .unwrap();
        let path = store.write_local(&second, DatasetKind::Users).await.unwrap();

        let read = store.read_local(&path).await.unwrap();
        assert_eq!(read.num_rows(), 2);
    }
}

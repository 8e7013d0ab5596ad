//! Driver storing objects on local disk.
//!
//! Payloads are sharded beneath `root/{shard}/{shard}/{object_id}` where the
//! two shards are the first two bytes of md5(object_id). Writes land in a
//! temporary file that is fsynced and then renamed into place.

use super::{
    DeleteObjectParam, DeleteObjectResult, DriverError, DriverResult, RetrieveObjectParam,
    RetrieveObjectResult, StorageDriver, UploadObjectParam, UploadObjectResult,
};
use async_trait::async_trait;
use chrono::Utc;
use futures::StreamExt;
use serde::Deserialize;
use std::{
    io::{self, ErrorKind},
    path::{Path, PathBuf},
};
use tokio::{
    fs::{self, File},
    io::AsyncWriteExt,
};
use tokio_util::io::ReaderStream;
use tracing::debug;
use uuid::Uuid;

const MAX_OBJECT_ID_LEN: usize = 256;

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct LocalConfig {
    pub root: PathBuf,
}

#[derive(Debug, Clone)]
pub struct LocalDriver {
    root: PathBuf,
}

impl LocalDriver {
    pub fn new(config: LocalConfig) -> Self {
        Self { root: config.root }
    }

    /// Object ids become file names, so anything that could escape the shard
    /// directory is refused.
    fn ensure_id_safe(object_id: &str) -> DriverResult<()> {
        if object_id.is_empty()
            || object_id.len() > MAX_OBJECT_ID_LEN
            || object_id.starts_with('.')
            || object_id
                .bytes()
                .any(|b| b.is_ascii_control() || b == b'/' || b == b'\\')
        {
            return Err(DriverError::InvalidObjectId(object_id.to_string()));
        }
        Ok(())
    }

    fn object_shards(object_id: &str) -> (String, String) {
        let digest = md5::compute(object_id);
        (format!("{:02x}", digest[0]), format!("{:02x}", digest[1]))
    }

    fn object_path(&self, object_id: &str) -> PathBuf {
        let (shard_a, shard_b) = Self::object_shards(object_id);
        let mut path = self.root.clone();
        path.push(shard_a);
        path.push(shard_b);
        path.push(object_id);
        path
    }

    /// Remove empty shard directories up to (not including) the root.
    async fn prune_empty_dirs(&self, start: &Path) {
        let mut current = start.to_path_buf();
        while current.starts_with(&self.root) && current != self.root {
            match fs::remove_dir(&current).await {
                Ok(_) => match current.parent() {
                    Some(parent) => current = parent.to_path_buf(),
                    None => break,
                },
                Err(err) if err.kind() == ErrorKind::NotFound => break,
                Err(err) if err.kind() == ErrorKind::DirectoryNotEmpty => break,
                Err(err) => {
                    debug!("failed to prune directory {}: {}", current.display(), err);
                    break;
                }
            }
        }
    }
}

#[async_trait]
impl StorageDriver for LocalDriver {
    async fn upload_object(&self, param: UploadObjectParam) -> DriverResult<UploadObjectResult> {
        let object_id = param
            .id
            .filter(|id| !id.is_empty())
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        Self::ensure_id_safe(&object_id)?;

        let file_path = self.object_path(&object_id);
        let parent = file_path
            .parent()
            .map(Path::to_path_buf)
            .ok_or_else(|| io::Error::other("object path missing parent"))?;
        fs::create_dir_all(&parent).await?;
        let tmp_path = parent.join(format!(".tmp-{}", Uuid::new_v4()));
        let mut file = File::create(&tmp_path).await?;

        let mut stream = param.data;
        let mut written: u64 = 0;
        while let Some(chunk) = stream.next().await {
            let res = match chunk {
                Ok(chunk) => {
                    written += chunk.len() as u64;
                    file.write_all(&chunk).await
                }
                Err(err) => Err(err),
            };
            if let Err(err) = res {
                let _ = fs::remove_file(&tmp_path).await;
                return Err(DriverError::Io(err));
            }
        }
        let synced = match file.flush().await {
            Ok(()) => file.sync_all().await,
            Err(err) => Err(err),
        };
        if let Err(err) = synced {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(DriverError::Io(err));
        }

        if let Err(err) = fs::rename(&tmp_path, &file_path).await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(DriverError::Io(err));
        }
        debug!("stored {} bytes at {}", written, file_path.display());

        Ok(UploadObjectResult {
            object_id,
            uploaded_at: Utc::now(),
        })
    }

    async fn retrieve_object(
        &self,
        param: RetrieveObjectParam,
    ) -> DriverResult<RetrieveObjectResult> {
        Self::ensure_id_safe(&param.object_id)?;
        let file_path = self.object_path(&param.object_id);
        let file = File::open(&file_path).await.map_err(|err| {
            if err.kind() == ErrorKind::NotFound {
                DriverError::NotFound(param.object_id.clone())
            } else {
                DriverError::Io(err)
            }
        })?;

        Ok(RetrieveObjectResult {
            data: Box::pin(ReaderStream::new(file)),
            retrieved_at: Utc::now(),
        })
    }

    async fn delete_object(&self, param: DeleteObjectParam) -> DriverResult<DeleteObjectResult> {
        Self::ensure_id_safe(&param.object_id)?;
        let file_path = self.object_path(&param.object_id);
        match fs::remove_file(&file_path).await {
            Ok(_) => debug!("removed object file {}", file_path.display()),
            Err(err) if err.kind() == ErrorKind::NotFound => {
                return Err(DriverError::NotFound(param.object_id));
            }
            Err(err) => return Err(DriverError::Io(err)),
        }

        if let Some(parent) = file_path.parent() {
            self.prune_empty_dirs(parent).await;
        }

        Ok(DeleteObjectResult {
            deleted_at: Utc::now(),
        })
    }
}

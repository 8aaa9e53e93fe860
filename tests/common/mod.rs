//! Shared helpers for integration tests.
//!
//! Provides an in-memory object store implementing the public gateway trait,
//! so the full engine stack runs without network access or credentials.

#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncSeekExt};

use s3_transfer::{
    Config, Error, GatewayError, ObjectInfo, ObjectStoreGateway, ObjectStream, PartRecord,
    Status, TaskId, TransferEngine,
};

/// In-memory S3 stand-in shared across engine instances in a test
pub struct InMemoryStore {
    objects: Mutex<HashMap<(String, String), Vec<u8>>>,
    sessions: Mutex<HashMap<String, Session>>,
    next_upload_id: AtomicU64,
    /// Total upload_part calls, for resume assertions
    pub upload_part_calls: AtomicU32,
}

struct Session {
    bucket: String,
    key: String,
    parts: BTreeMap<i32, (PartRecord, Vec<u8>)>,
}

impl InMemoryStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            objects: Mutex::new(HashMap::new()),
            sessions: Mutex::new(HashMap::new()),
            next_upload_id: AtomicU64::new(1),
            upload_part_calls: AtomicU32::new(0),
        })
    }

    pub fn put_object(&self, bucket: &str, key: &str, data: Vec<u8>) {
        self.objects
            .lock()
            .unwrap()
            .insert((bucket.to_string(), key.to_string()), data);
    }

    pub fn get_object(&self, bucket: &str, key: &str) -> Option<Vec<u8>> {
        self.objects
            .lock()
            .unwrap()
            .get(&(bucket.to_string(), key.to_string()))
            .cloned()
    }

    pub fn open_sessions(&self) -> usize {
        self.sessions.lock().unwrap().len()
    }

    /// Parts the store currently holds for the only open session
    pub fn stored_part_numbers(&self) -> Vec<i32> {
        let sessions = self.sessions.lock().unwrap();
        sessions
            .values()
            .next()
            .map(|s| s.parts.keys().copied().collect())
            .unwrap_or_default()
    }
}

#[async_trait]
impl ObjectStoreGateway for InMemoryStore {
    async fn start_or_resume_upload(
        &self,
        bucket: &str,
        key: &str,
        known_upload_id: Option<&str>,
    ) -> s3_transfer::Result<String> {
        let mut sessions = self.sessions.lock().unwrap();

        if let Some(id) = known_upload_id {
            if sessions.contains_key(id) {
                return Ok(id.to_string());
            }
        }
        for (id, session) in sessions.iter() {
            if session.bucket == bucket && session.key == key {
                return Ok(id.clone());
            }
        }

        let id = format!("upload-{}", self.next_upload_id.fetch_add(1, Ordering::SeqCst));
        sessions.insert(
            id.clone(),
            Session {
                bucket: bucket.to_string(),
                key: key.to_string(),
                parts: BTreeMap::new(),
            },
        );
        Ok(id)
    }

    async fn list_parts(
        &self,
        _bucket: &str,
        _key: &str,
        upload_id: &str,
    ) -> s3_transfer::Result<Vec<PartRecord>> {
        let sessions = self.sessions.lock().unwrap();
        let session = sessions
            .get(upload_id)
            .ok_or_else(|| Error::Gateway(GatewayError::NotFound(upload_id.to_string())))?;
        Ok(session.parts.values().map(|(r, _)| r.clone()).collect())
    }

    async fn upload_part(
        &self,
        _bucket: &str,
        _key: &str,
        upload_id: &str,
        part_number: i32,
        source: &Path,
        offset: u64,
        len: u64,
    ) -> s3_transfer::Result<PartRecord> {
        self.upload_part_calls.fetch_add(1, Ordering::SeqCst);

        let mut file = tokio::fs::File::open(source).await?;
        file.seek(std::io::SeekFrom::Start(offset)).await?;
        let mut data = vec![0u8; len as usize];
        file.read_exact(&mut data).await?;

        let record = PartRecord {
            part_number,
            etag: format!("etag-{part_number}-{len}"),
            size: len,
        };

        let mut sessions = self.sessions.lock().unwrap();
        let session = sessions
            .get_mut(upload_id)
            .ok_or_else(|| Error::Gateway(GatewayError::NotFound(upload_id.to_string())))?;
        session.parts.insert(part_number, (record.clone(), data));
        Ok(record)
    }

    async fn complete_upload(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        parts: &[PartRecord],
    ) -> s3_transfer::Result<Option<String>> {
        let mut sessions = self.sessions.lock().unwrap();
        {
            let session = sessions
                .get(upload_id)
                .ok_or_else(|| Error::Gateway(GatewayError::NotFound(upload_id.to_string())))?;
            for part in parts {
                match session.parts.get(&part.part_number) {
                    Some((stored, _)) if stored.etag == part.etag => {}
                    _ => {
                        return Err(Error::Gateway(GatewayError::IncompleteParts(format!(
                            "part {} not held by the store",
                            part.part_number
                        ))));
                    }
                }
            }
        }

        let session = sessions
            .remove(upload_id)
            .ok_or_else(|| Error::Gateway(GatewayError::Other("session vanished".into())))?;

        let mut data = Vec::new();
        for part in parts {
            if let Some((_, bytes)) = session.parts.get(&part.part_number) {
                data.extend_from_slice(bytes);
            }
        }
        self.objects
            .lock()
            .unwrap()
            .insert((bucket.to_string(), key.to_string()), data);

        Ok(Some("etag-complete".to_string()))
    }

    async fn abort_upload(&self, _bucket: &str, _key: &str, upload_id: &str) -> s3_transfer::Result<()> {
        self.sessions.lock().unwrap().remove(upload_id);
        Ok(())
    }

    async fn head_object(&self, bucket: &str, key: &str) -> s3_transfer::Result<ObjectInfo> {
        let objects = self.objects.lock().unwrap();
        let data = objects
            .get(&(bucket.to_string(), key.to_string()))
            .ok_or_else(|| Error::Gateway(GatewayError::NotFound(key.to_string())))?;
        Ok(ObjectInfo {
            content_length: data.len() as u64,
            etag: Some("etag-object".to_string()),
        })
    }

    async fn get_object_stream(
        &self,
        bucket: &str,
        key: &str,
        offset: u64,
    ) -> s3_transfer::Result<ObjectStream> {
        let objects = self.objects.lock().unwrap();
        let data = objects
            .get(&(bucket.to_string(), key.to_string()))
            .ok_or_else(|| Error::Gateway(GatewayError::NotFound(key.to_string())))?;

        let total = data.len() as u64;
        let tail = data[offset.min(total) as usize..].to_vec();
        Ok(ObjectStream {
            reader: Box::new(std::io::Cursor::new(tail)),
            total_size: Some(total),
        })
    }

    fn supports_range_resume(&self) -> bool {
        true
    }
}

/// Config pointing at a temp database with fast retries
pub fn test_config(dir: &Path) -> Config {
    let mut config = Config::default();
    config.persistence.database_path = dir.join("test.db");
    config.transfer.copy_buffer_size = 4096;
    config.retry.initial_delay = Duration::from_millis(10);
    config.retry.max_delay = Duration::from_millis(50);
    config.retry.jitter = false;
    config
}

/// Build an engine over a temp database and the given store
pub async fn create_engine(store: Arc<InMemoryStore>) -> (TransferEngine, tempfile::TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let engine = TransferEngine::new(test_config(dir.path()), store)
        .await
        .unwrap();
    (engine, dir)
}

/// Write `len` patterned bytes under `dir` and return the path
pub async fn write_source_file(dir: &Path, name: &str, len: usize) -> std::path::PathBuf {
    let path = dir.join(name);
    let data: Vec<u8> = (0..len).map(|i| (i % 251) as u8).collect();
    tokio::fs::write(&path, &data).await.unwrap();
    path
}

/// Poll a task until it reaches a terminal status or the timeout elapses
pub async fn wait_for_terminal(engine: &TransferEngine, id: TaskId) -> Status {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    loop {
        let task = engine.get_task(id).await.unwrap();
        if task.status.is_terminal() {
            return task.status;
        }
        if tokio::time::Instant::now() >= deadline {
            panic!("task {id} stuck in {:?}", task.status);
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

//! Shared helpers for engine tests.

use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncSeekExt};

use crate::config::Config;
use crate::error::{Error, GatewayError, Result};
use crate::gateway::{ObjectInfo, ObjectStoreGateway, ObjectStream, PartRecord};

use super::TransferEngine;

/// In-memory object store standing in for S3
///
/// Holds multipart sessions and completed objects in maps, with knobs to
/// inject transient failures and to disable ranged reads.
pub(crate) struct MockGateway {
    objects: Mutex<HashMap<(String, String), Vec<u8>>>,
    sessions: Mutex<HashMap<String, MockSession>>,
    next_upload_id: AtomicU64,
    /// Total upload_part invocations, for resume assertions
    pub(crate) upload_part_calls: AtomicU32,
    /// When non-zero, the next N upload_part calls fail with a transient error
    pub(crate) fail_next_upload_parts: AtomicU32,
    /// When non-zero, every upload_part sleeps this long before storing,
    /// to hold a task in the running state while a command races it
    pub(crate) part_delay_ms: AtomicU64,
    /// When set, upload_part stalls until its session is aborted and then
    /// fails with NotFound, mirroring a part in flight during an abort
    pub(crate) stall_parts_until_abort: AtomicBool,
    /// Offsets requested by get_object_stream, for resume assertions
    pub(crate) stream_offsets: Mutex<Vec<u64>>,
    range_resume: bool,
}

struct MockSession {
    bucket: String,
    key: String,
    parts: BTreeMap<i32, (PartRecord, Vec<u8>)>,
}

impl MockGateway {
    pub(crate) fn new() -> Self {
        Self {
            objects: Mutex::new(HashMap::new()),
            sessions: Mutex::new(HashMap::new()),
            next_upload_id: AtomicU64::new(1),
            upload_part_calls: AtomicU32::new(0),
            fail_next_upload_parts: AtomicU32::new(0),
            part_delay_ms: AtomicU64::new(0),
            stall_parts_until_abort: AtomicBool::new(false),
            stream_offsets: Mutex::new(Vec::new()),
            range_resume: true,
        }
    }

    /// A store that refuses ranged reads, forcing downloads to restart
    pub(crate) fn without_range_resume() -> Self {
        Self {
            range_resume: false,
            ..Self::new()
        }
    }

    /// Seed an object for download tests
    pub(crate) fn put_object(&self, bucket: &str, key: &str, data: Vec<u8>) {
        self.objects
            .lock()
            .unwrap()
            .insert((bucket.to_string(), key.to_string()), data);
    }

    /// Fetch a committed object, for upload assertions
    pub(crate) fn get_object(&self, bucket: &str, key: &str) -> Option<Vec<u8>> {
        self.objects
            .lock()
            .unwrap()
            .get(&(bucket.to_string(), key.to_string()))
            .cloned()
    }

    /// Number of open multipart sessions
    pub(crate) fn open_sessions(&self) -> usize {
        self.sessions.lock().unwrap().len()
    }
}

#[async_trait]
impl ObjectStoreGateway for MockGateway {
    async fn start_or_resume_upload(
        &self,
        bucket: &str,
        key: &str,
        known_upload_id: Option<&str>,
    ) -> Result<String> {
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
            MockSession {
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
    ) -> Result<Vec<PartRecord>> {
        let sessions = self.sessions.lock().unwrap();
        let session = sessions.get(upload_id).ok_or_else(|| {
            Error::Gateway(GatewayError::NotFound(format!(
                "no such upload: {upload_id}"
            )))
        })?;
        Ok(session
            .parts
            .values()
            .map(|(record, _)| record.clone())
            .collect())
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
    ) -> Result<PartRecord> {
        self.upload_part_calls.fetch_add(1, Ordering::SeqCst);

        let delay = self.part_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(std::time::Duration::from_millis(delay)).await;
        }

        if self.stall_parts_until_abort.load(Ordering::SeqCst) {
            loop {
                if !self.sessions.lock().unwrap().contains_key(upload_id) {
                    return Err(Error::Gateway(GatewayError::NotFound(format!(
                        "no such upload: {upload_id}"
                    ))));
                }
                tokio::time::sleep(std::time::Duration::from_millis(10)).await;
            }
        }

        let remaining = self.fail_next_upload_parts.load(Ordering::SeqCst);
        if remaining > 0 {
            self.fail_next_upload_parts
                .store(remaining - 1, Ordering::SeqCst);
            return Err(Error::Gateway(GatewayError::Transient(
                "injected failure".to_string(),
            )));
        }

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
        let session = sessions.get_mut(upload_id).ok_or_else(|| {
            Error::Gateway(GatewayError::NotFound(format!(
                "no such upload: {upload_id}"
            )))
        })?;
        session.parts.insert(part_number, (record.clone(), data));

        Ok(record)
    }

    async fn complete_upload(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        parts: &[PartRecord],
    ) -> Result<Option<String>> {
        let mut sessions = self.sessions.lock().unwrap();
        let session = sessions.get(upload_id).ok_or_else(|| {
            Error::Gateway(GatewayError::NotFound(format!(
                "no such upload: {upload_id}"
            )))
        })?;

        if parts.is_empty() {
            return Err(Error::Gateway(GatewayError::IncompleteParts(
                "completion listed no parts".to_string(),
            )));
        }

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

        let session = sessions
            .remove(upload_id)
            .ok_or_else(|| Error::Gateway(GatewayError::Other("session vanished".to_string())))?;

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

    async fn abort_upload(&self, _bucket: &str, _key: &str, upload_id: &str) -> Result<()> {
        // Unknown sessions abort successfully, matching store semantics
        self.sessions.lock().unwrap().remove(upload_id);
        Ok(())
    }

    async fn head_object(&self, bucket: &str, key: &str) -> Result<ObjectInfo> {
        let objects = self.objects.lock().unwrap();
        let data = objects
            .get(&(bucket.to_string(), key.to_string()))
            .ok_or_else(|| {
                Error::Gateway(GatewayError::NotFound(format!("no such key: {key}")))
            })?;
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
    ) -> Result<ObjectStream> {
        self.stream_offsets.lock().unwrap().push(offset);

        let objects = self.objects.lock().unwrap();
        let data = objects
            .get(&(bucket.to_string(), key.to_string()))
            .ok_or_else(|| {
                Error::Gateway(GatewayError::NotFound(format!("no such key: {key}")))
            })?;

        let total = data.len() as u64;
        let tail = data[offset.min(total) as usize..].to_vec();

        Ok(ObjectStream {
            reader: Box::new(std::io::Cursor::new(tail)),
            total_size: Some(total),
        })
    }

    fn supports_range_resume(&self) -> bool {
        self.range_resume
    }
}

/// Build an engine over a temp database and the given gateway
///
/// The temp dir must be kept alive for the duration of the test. The copy
/// buffer is shrunk so downloads cross several increment boundaries.
pub(crate) async fn create_test_engine(
    gateway: std::sync::Arc<MockGateway>,
) -> (TransferEngine, tempfile::TempDir) {
    let dir = tempfile::tempdir().unwrap();

    let config = test_config(dir.path());
    let engine = TransferEngine::new(config, gateway).await.unwrap();
    (engine, dir)
}

/// Config pointing at a temp database, with fast retries for injected failures
pub(crate) fn test_config(dir: &Path) -> Config {
    let mut config = Config::default();
    config.persistence.database_path = dir.join("test.db");
    config.transfer.copy_buffer_size = 1024;
    config.transfer.max_concurrent_transfers = 2;
    config.retry.initial_delay = std::time::Duration::from_millis(10);
    config.retry.max_delay = std::time::Duration::from_millis(50);
    config.retry.jitter = false;
    config
}

/// Write a file of `len` patterned bytes under `dir` and return its path
pub(crate) async fn write_source_file(
    dir: &Path,
    name: &str,
    len: usize,
) -> std::path::PathBuf {
    let path = dir.join(name);
    let data: Vec<u8> = (0..len).map(|i| (i % 251) as u8).collect();
    tokio::fs::write(&path, &data).await.unwrap();
    path
}

/// Poll a task until it reaches a terminal status or the timeout elapses
pub(crate) async fn wait_for_terminal(
    engine: &TransferEngine,
    id: crate::types::TaskId,
) -> crate::types::Status {
    wait_for_status(engine, id, |status| status.is_terminal()).await
}

/// Poll a task until `predicate` accepts its status or the timeout elapses
pub(crate) async fn wait_for_status(
    engine: &TransferEngine,
    id: crate::types::TaskId,
    predicate: impl Fn(crate::types::Status) -> bool,
) -> crate::types::Status {
    let deadline = tokio::time::Instant::now() + std::time::Duration::from_secs(10);
    loop {
        let task = engine.get_task(id).await.unwrap();
        if predicate(task.status) {
            return task.status;
        }
        if tokio::time::Instant::now() >= deadline {
            panic!("task {id} stuck in {:?}", task.status);
        }
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    }
}

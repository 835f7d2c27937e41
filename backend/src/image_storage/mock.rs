//! In-memory object store for tests

use std::{
    collections::HashMap,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::Duration,
};

use bytes::{Bytes, BytesMut};

use super::{BucketSettings, ObjectStore, ObjectWriter, StorageError, StorageResult};

/// A call received by [`InMemoryObjectStore`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreCall {
    /// `probe_bucket(bucket)`
    ProbeBucket(String),
    /// `create_bucket(bucket, settings)`
    CreateBucket(String, BucketSettings),
    /// `writer(bucket, key)`
    OpenWriter(String, String),
}

/// Failures and delays to inject into the next calls
#[derive(Debug, Clone, Default)]
pub struct FaultPlan {
    /// Returned by every probe, even for existing buckets
    pub probe_error: Option<StorageError>,
    /// Returned by every creation attempt
    pub create_error: Option<StorageError>,
    /// Returned by every chunk write
    pub write_error: Option<StorageError>,
    /// Returned by every close
    pub close_error: Option<StorageError>,
    /// Sleep before answering a probe
    pub probe_delay: Option<Duration>,
    /// Sleep before creating a bucket
    pub create_delay: Option<Duration>,
    /// Sleep before accepting each chunk
    pub write_delay: Option<Duration>,
    /// Sleep before committing the object
    pub close_delay: Option<Duration>,
}

#[derive(Debug, Default)]
struct State {
    buckets: HashMap<String, BucketSettings>,
    objects: HashMap<(String, String), Bytes>,
    calls: Vec<StoreCall>,
    faults: FaultPlan,
}

fn lock(state: &Mutex<State>) -> MutexGuard<'_, State> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

async fn pause(delay: Option<Duration>) {
    if let Some(delay) = delay {
        tokio::time::sleep(delay).await;
    }
}

/// Object store keeping buckets and objects in memory
#[derive(Debug, Clone, Default)]
pub struct InMemoryObjectStore {
    state: Arc<Mutex<State>>,
}

impl InMemoryObjectStore {
    /// Creates an empty store
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store that fails according to `faults`
    #[must_use]
    pub fn with_faults(faults: FaultPlan) -> Self {
        let store = Self::new();
        store.set_faults(faults);
        store
    }

    /// Replaces the injected faults
    pub fn set_faults(&self, faults: FaultPlan) {
        lock(&self.state).faults = faults;
    }

    /// Adds an existing bucket
    pub fn insert_bucket(&self, bucket: &str) {
        lock(&self.state)
            .buckets
            .insert(bucket.to_string(), BucketSettings::new(None));
    }

    /// Settings a bucket was created with, if it exists
    #[must_use]
    pub fn bucket(&self, bucket: &str) -> Option<BucketSettings> {
        lock(&self.state).buckets.get(bucket).cloned()
    }

    /// Stored contents of `bucket`/`key`
    #[must_use]
    pub fn object(&self, bucket: &str, key: &str) -> Option<Bytes> {
        lock(&self.state)
            .objects
            .get(&(bucket.to_string(), key.to_string()))
            .cloned()
    }

    /// Keys stored in `bucket`
    #[must_use]
    pub fn keys(&self, bucket: &str) -> Vec<String> {
        let mut keys: Vec<String> = lock(&self.state)
            .objects
            .keys()
            .filter(|(b, _)| b == bucket)
            .map(|(_, k)| k.clone())
            .collect();
        keys.sort();
        keys
    }

    /// Every call received so far, in order
    #[must_use]
    pub fn calls(&self) -> Vec<StoreCall> {
        lock(&self.state).calls.clone()
    }
}

#[async_trait::async_trait]
impl ObjectStore for InMemoryObjectStore {
    async fn probe_bucket(&self, bucket: &str) -> StorageResult<()> {
        let delay = {
            let mut state = lock(&self.state);
            state.calls.push(StoreCall::ProbeBucket(bucket.to_string()));
            state.faults.probe_delay
        };
        pause(delay).await;

        let state = lock(&self.state);
        if let Some(error) = &state.faults.probe_error {
            return Err(error.clone());
        }
        if state.buckets.contains_key(bucket) {
            Ok(())
        } else {
            Err(StorageError::BucketNotFound(bucket.to_string()))
        }
    }

    async fn create_bucket(&self, bucket: &str, settings: &BucketSettings) -> StorageResult<()> {
        let delay = {
            let mut state = lock(&self.state);
            state
                .calls
                .push(StoreCall::CreateBucket(bucket.to_string(), settings.clone()));
            state.faults.create_delay
        };
        pause(delay).await;

        let mut state = lock(&self.state);
        if let Some(error) = &state.faults.create_error {
            return Err(error.clone());
        }
        if state.buckets.contains_key(bucket) {
            return Err(StorageError::BucketAlreadyExists(bucket.to_string()));
        }
        state.buckets.insert(bucket.to_string(), settings.clone());
        Ok(())
    }

    fn writer(&self, bucket: &str, key: &str) -> Box<dyn ObjectWriter> {
        lock(&self.state)
            .calls
            .push(StoreCall::OpenWriter(bucket.to_string(), key.to_string()));

        Box::new(InMemoryObjectWriter {
            state: self.state.clone(),
            bucket: bucket.to_string(),
            key: key.to_string(),
            buffer: BytesMut::new(),
        })
    }
}

/// Sink that commits its buffer to the store on close
pub struct InMemoryObjectWriter {
    state: Arc<Mutex<State>>,
    bucket: String,
    key: String,
    buffer: BytesMut,
}

#[async_trait::async_trait]
impl ObjectWriter for InMemoryObjectWriter {
    async fn write(&mut self, chunk: Bytes) -> StorageResult<()> {
        let delay = lock(&self.state).faults.write_delay;
        pause(delay).await;

        if let Some(error) = &lock(&self.state).faults.write_error {
            return Err(error.clone());
        }
        self.buffer.extend_from_slice(&chunk);
        Ok(())
    }

    async fn close(&mut self) -> StorageResult<u64> {
        let delay = lock(&self.state).faults.close_delay;
        pause(delay).await;

        let mut state = lock(&self.state);
        if let Some(error) = &state.faults.close_error {
            return Err(error.clone());
        }
        if !state.buckets.contains_key(&self.bucket) {
            return Err(StorageError::BucketNotFound(self.bucket.clone()));
        }

        let data = self.buffer.split().freeze();
        let size = data.len() as u64;
        state
            .objects
            .insert((self.bucket.clone(), self.key.clone()), data);
        Ok(size)
    }
}

//! In-memory store for tests and throwaway deployments.

use std::{collections::BTreeMap, sync::Mutex};

use {
    async_trait::async_trait,
    futures::{StreamExt, stream::BoxStream},
};

use crate::{
    error::{Error, Result},
    store::{ChannelRecord, ChannelStore},
};

/// Channel store backed by a `BTreeMap`. Nothing survives the process.
#[derive(Default)]
pub struct InMemoryChannelStore {
    records: Mutex<BTreeMap<String, ChannelRecord>>,
}

impl InMemoryChannelStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ChannelStore for InMemoryChannelStore {
    async fn put(&self, record: &ChannelRecord) -> Result<()> {
        let mut records = self.records.lock().unwrap_or_else(|e| e.into_inner());
        records.insert(record.id.clone(), record.clone());
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<ChannelRecord> {
        let records = self.records.lock().unwrap_or_else(|e| e.into_inner());
        records
            .get(id)
            .cloned()
            .ok_or_else(|| Error::channel_not_found(id))
    }

    async fn delete(&self, id: &str) -> Result<()> {
        let mut records = self.records.lock().unwrap_or_else(|e| e.into_inner());
        records.remove(id);
        Ok(())
    }

    fn list(&self) -> BoxStream<'_, Result<String>> {
        // Snapshot so the stream never holds the lock across polls.
        let ids: Vec<String> = {
            let records = self.records.lock().unwrap_or_else(|e| e.into_inner());
            records.keys().cloned().collect()
        };
        futures::stream::iter(ids.into_iter().map(Ok)).boxed()
    }
}

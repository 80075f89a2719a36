use {
    async_trait::async_trait,
    futures::{StreamExt, TryStreamExt, stream::BoxStream},
    sqlx::SqlitePool,
};

use switchboard_channels::{ChannelRecord, ChannelState, ChannelStore, Error, Result};

/// Internal row type for sqlx mapping.
#[derive(sqlx::FromRow)]
struct ChannelRow {
    id: String,
    channel_type: String,
    config: String,
    status: String,
    metadata: String,
    state: String,
    created_at: i64,
    updated_at: i64,
}

impl TryFrom<ChannelRow> for ChannelRecord {
    type Error = Error;

    fn try_from(r: ChannelRow) -> Result<Self> {
        Ok(Self {
            id: r.id,
            channel_type: r.channel_type,
            config: serde_json::from_str(&r.config)?,
            status: serde_json::from_str(&r.status)?,
            metadata: serde_json::from_str(&r.metadata)?,
            state: r.state.parse::<ChannelState>()?,
            created_at: r.created_at,
            updated_at: r.updated_at,
        })
    }
}

/// SQLite-backed channel store.
pub struct SqliteChannelStore {
    pool: SqlitePool,
}

impl SqliteChannelStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ChannelStore for SqliteChannelStore {
    async fn put(&self, record: &ChannelRecord) -> Result<()> {
        let config = serde_json::to_string(&record.config)?;
        let status = serde_json::to_string(&record.status)?;
        let metadata = serde_json::to_string(&record.metadata)?;
        sqlx::query(
            r#"INSERT INTO channels (id, channel_type, config, status, metadata, state, created_at, updated_at)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?)
               ON CONFLICT(id) DO UPDATE SET
                 channel_type = excluded.channel_type,
                 config = excluded.config,
                 status = excluded.status,
                 metadata = excluded.metadata,
                 state = excluded.state,
                 updated_at = excluded.updated_at"#,
        )
        .bind(&record.id)
        .bind(&record.channel_type)
        .bind(&config)
        .bind(&status)
        .bind(&metadata)
        .bind(record.state.as_str())
        .bind(record.created_at)
        .bind(record.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| Error::storage("failed to write channel", e))?;
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<ChannelRecord> {
        let row = sqlx::query_as::<_, ChannelRow>("SELECT * FROM channels WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| Error::storage("failed to read channel", e))?;
        row.ok_or_else(|| Error::channel_not_found(id))?.try_into()
    }

    async fn delete(&self, id: &str) -> Result<()> {
        sqlx::query("DELETE FROM channels WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| Error::storage("failed to delete channel", e))?;
        Ok(())
    }

    fn list(&self) -> BoxStream<'_, Result<String>> {
        sqlx::query_scalar::<_, String>("SELECT id FROM channels ORDER BY id")
            .fetch(&self.pool)
            .map_err(|e| Error::storage("failed to list channels", e))
            .boxed()
    }

    async fn exists(&self, id: &str) -> Result<bool> {
        let found = sqlx::query_scalar::<_, i64>("SELECT 1 FROM channels WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| Error::storage("failed to read channel", e))?;
        Ok(found.is_some())
    }
}

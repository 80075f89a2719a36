//! HTTP gateway for switchboard channels.
//!
//! Exposes the channel lifecycle and message endpoints over axum, wraps every
//! response in the `{status, code, description, result}` envelope, and owns
//! the SQLite channel store.

pub mod channel_store;
pub mod envelope;
pub mod routes;
pub mod server;
pub mod state;
pub mod validation;

pub use {
    channel_store::SqliteChannelStore,
    server::{build_gateway_app, open_channel_store, serve, start_gateway},
    state::GatewayState,
};

/// Run database migrations for the gateway crate.
///
/// Creates the `channels` table. Call once at startup before using
/// [`SqliteChannelStore`].
pub async fn run_migrations(pool: &sqlx::SqlitePool) -> anyhow::Result<()> {
    sqlx::migrate!("./migrations")
        .set_ignore_missing(true)
        .run(pool)
        .await?;
    Ok(())
}

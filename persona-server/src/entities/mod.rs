//! Persistence layer.
//!
//! [`CharacterStore`] defines the interface for persisting character
//! definitions.  The default implementation is [`SqliteStore`].  To swap to
//! another database, implement the trait for your new type and change the
//! concrete type held by [`crate::services::characters::CharacterRepository`].
//!
//! All trait methods use `impl Future` in their signatures so no extra
//! `async-trait` boxing is required.
//!
//! # Migrations path
//!
//! `sqlx::migrate!("./migrations")` resolves the path at compile time relative
//! to `CARGO_MANIFEST_DIR`, so the directory is embedded into the binary.  The
//! runtime `sqlx::query` form is used so no `DATABASE_URL` is needed to build.

pub mod character;
pub mod dao;

pub use character::CharacterStore;
pub use dao::{Character, CharacterOrigin};

use std::str::FromStr;

use sqlx::SqlitePool;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};

#[derive(Clone, Debug)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open (or create) the SQLite database at `url` and run pending migrations.
    ///
    /// `url` should be a sqlx-compatible SQLite URL, e.g. `"sqlite://persona.db"`
    /// or `"sqlite::memory:"` for tests.
    pub async fn connect(url: &str) -> Result<Self, sqlx::Error> {
        let options = SqliteConnectOptions::from_str(url)?.create_if_missing(true);
        // Every pooled connection to `:memory:` would get its own empty
        // database, so in-memory stores are pinned to a single connection.
        let in_memory = url.contains(":memory:");
        let pool = SqlitePoolOptions::new()
            .max_connections(if in_memory { 1 } else { 4 })
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;
        sqlx::migrate!("./migrations").run(&pool).await?;
        Ok(Self { pool })
    }
}

//! PostgreSQL document store.
//!
//! Documents live in one JSONB table keyed by route and filter. The store
//! owns a current-thread tokio runtime and blocks on it, so it must not be
//! used from inside another async runtime.

use std::time::Duration;

use dstate_types::PersistenceError;
use serde_json::Value;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::Row;
use tokio::runtime::{Builder, Runtime};
use tracing::info;

use super::{Document, DocumentRoute, DocumentStore};

/// PostgreSQL-backed [`DocumentStore`].
pub struct PostgresDocumentStore {
    pool: PgPool,
    runtime: Runtime,
}

impl PostgresDocumentStore {
    /// Connect to PostgreSQL and initialize the schema.
    pub fn connect(database_url: &str) -> Result<Self, PersistenceError> {
        Self::connect_with_options(database_url, 10, 5)
    }

    /// Connect with explicit pool parameters.
    pub fn connect_with_options(
        database_url: &str,
        max_connections: u32,
        connect_timeout_secs: u64,
    ) -> Result<Self, PersistenceError> {
        let runtime = Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| PersistenceError::Backend(format!("failed to start runtime: {e}")))?;

        let pool = runtime
            .block_on(
                PgPoolOptions::new()
                    .max_connections(max_connections)
                    .acquire_timeout(Duration::from_secs(connect_timeout_secs))
                    .connect(database_url),
            )
            .map_err(|e| PersistenceError::Backend(format!("failed to connect postgres: {e}")))?;

        let store = Self { pool, runtime };
        store.init_schema()?;
        info!(max_connections, "Postgres document store ready");
        Ok(store)
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    fn init_schema(&self) -> Result<(), PersistenceError> {
        self.runtime
            .block_on(
                sqlx::query(
                    r#"
                    CREATE TABLE IF NOT EXISTS dstate_documents (
                        database TEXT NOT NULL,
                        collection TEXT NOT NULL,
                        filter JSONB NOT NULL,
                        document JSONB NOT NULL,
                        updated_at TIMESTAMPTZ NOT NULL DEFAULT now(),
                        PRIMARY KEY (database, collection, filter)
                    )
                    "#,
                )
                .execute(&self.pool),
            )
            .map_err(|e| PersistenceError::Backend(format!("schema init failed: {e}")))?;
        Ok(())
    }
}

fn backend(e: sqlx::Error) -> PersistenceError {
    PersistenceError::Backend(e.to_string())
}

impl DocumentStore for PostgresDocumentStore {
    /// Rows are matched by containment, ordered by their filter, the same
    /// way [`upsert_one`](Self::upsert_one) picks the row it merges into.
    fn find_one(
        &self,
        route: &DocumentRoute,
        filter: &Document,
    ) -> Result<Option<Document>, PersistenceError> {
        let row = self
            .runtime
            .block_on(
                sqlx::query(
                    r#"
                    SELECT document FROM dstate_documents
                     WHERE database = $1 AND collection = $2 AND document @> $3
                     ORDER BY filter
                     LIMIT 1
                    "#,
                )
                .bind(route.database.as_str())
                .bind(route.collection.as_str())
                .bind(Value::Object(filter.clone()))
                .fetch_optional(&self.pool),
            )
            .map_err(backend)?;

        let Some(row) = row else {
            return Ok(None);
        };
        let document: Value = row.try_get("document").map_err(backend)?;
        Ok(Some(serde_json::from_value(document)?))
    }

    fn upsert_one(
        &self,
        route: &DocumentRoute,
        filter: &Document,
        fields: &Document,
    ) -> Result<(), PersistenceError> {
        let mut inserted = filter.clone();
        for (field, value) in fields {
            inserted.insert(field.clone(), value.clone());
        }

        self.runtime.block_on(async {
            let mut tx = self.pool.begin().await.map_err(backend)?;

            let updated = sqlx::query(
                r#"
                WITH target AS (
                    SELECT filter FROM dstate_documents
                     WHERE database = $1 AND collection = $2 AND document @> $3
                     ORDER BY filter
                     LIMIT 1
                       FOR UPDATE
                )
                UPDATE dstate_documents AS d
                   SET document = d.document || $4, updated_at = now()
                  FROM target
                 WHERE d.database = $1 AND d.collection = $2 AND d.filter = target.filter
                "#,
            )
            .bind(route.database.as_str())
            .bind(route.collection.as_str())
            .bind(Value::Object(filter.clone()))
            .bind(Value::Object(fields.clone()))
            .execute(&mut *tx)
            .await
            .map_err(backend)?
            .rows_affected();

            if updated == 0 {
                sqlx::query(
                    r#"
                    INSERT INTO dstate_documents (database, collection, filter, document)
                    VALUES ($1, $2, $3, $4)
                    ON CONFLICT (database, collection, filter) DO UPDATE SET
                        document = dstate_documents.document || $5,
                        updated_at = now()
                    "#,
                )
                .bind(route.database.as_str())
                .bind(route.collection.as_str())
                .bind(Value::Object(filter.clone()))
                .bind(Value::Object(inserted))
                .bind(Value::Object(fields.clone()))
                .execute(&mut *tx)
                .await
                .map_err(backend)?;
            }

            tx.commit().await.map_err(backend)
        })
    }
}

//! Postgres-backed tenant database provisioner.
//!
//! Each tenant gets its own database on the cluster reachable through the admin
//! URL. The storefront collections become tables; index definitions become
//! `CREATE INDEX` statements.
//!
//! ## Error Mapping
//!
//! | SQLx error | SQLSTATE | ClientError |
//! |---|---|---|
//! | Database (duplicate database) | `42P04` | `Conflict` |
//! | Database (insufficient resources) | `53xxx` | `QuotaExceeded` |
//! | Database (insufficient privilege) | `42501` | `Validation` |
//! | Database (other) | any | `Unavailable` |
//! | pool timeout / io / tls / closed | n/a | `Unavailable` |

use std::str::FromStr;

use async_trait::async_trait;
use sqlx::postgres::{PgConnectOptions, PgPool, PgPoolOptions};
use tracing::{info, instrument};

use shopforge_core::{DatabaseName, MerchantId};

use super::schema::{
    CollectionDef, IndexDef, STOREFRONT_COLLECTIONS, STOREFRONT_INDEXES, collection_names,
    tenant_database_name,
};
use super::{ClientError, ClientResult, DatabaseCreated, DatabaseProvisioner};

#[derive(Debug, Clone)]
pub struct PostgresDatabaseProvisioner {
    admin: PgPool,
    options: PgConnectOptions,
}

impl PostgresDatabaseProvisioner {
    /// Build a provisioner without connecting; the first call opens the pool.
    pub fn connect_lazy(admin_url: &str) -> Result<Self, sqlx::Error> {
        let options = PgConnectOptions::from_str(admin_url)?;
        let admin = PgPoolOptions::new()
            .max_connections(4)
            .connect_lazy_with(options.clone());
        Ok(Self { admin, options })
    }

    async fn tenant_pool(&self, database: &DatabaseName) -> ClientResult<PgPool> {
        PgPoolOptions::new()
            .max_connections(1)
            .connect_with(self.options.clone().database(database.as_str()))
            .await
            .map_err(|e| map_sqlx_error("connect", e))
    }
}

#[async_trait]
impl DatabaseProvisioner for PostgresDatabaseProvisioner {
    #[instrument(skip_all, fields(merchant_id = %merchant_id), err)]
    async fn create_database(&self, merchant_id: MerchantId) -> ClientResult<DatabaseCreated> {
        let name = tenant_database_name(merchant_id)?;
        sqlx::raw_sql(&format!("CREATE DATABASE \"{}\"", name.as_str()))
            .execute(&self.admin)
            .await
            .map_err(|e| map_sqlx_error("create_database", e))?;
        info!(database = %name, "tenant database created");
        Ok(DatabaseCreated {
            database_name: name,
            collections_created: 0,
        })
    }

    #[instrument(skip_all, fields(database = %database), err)]
    async fn initialize_schema(&self, database: &DatabaseName) -> ClientResult<Vec<String>> {
        let statements: Vec<String> = STOREFRONT_COLLECTIONS.iter().map(create_table_sql).collect();
        let pool = self.tenant_pool(database).await?;
        let result = apply_ddl(&pool, "initialize_schema", &statements).await;
        pool.close().await;
        result?;

        Ok(collection_names())
    }

    #[instrument(skip_all, fields(database = %database), err)]
    async fn create_indexes(&self, database: &DatabaseName) -> ClientResult<u32> {
        let statements: Vec<String> = STOREFRONT_INDEXES.iter().map(create_index_sql).collect();
        let pool = self.tenant_pool(database).await?;
        let result = apply_ddl(&pool, "create_indexes", &statements).await;
        pool.close().await;
        result?;

        Ok(statements.len() as u32)
    }
}

/// Run `statements` in one transaction on `pool`.
async fn apply_ddl(pool: &PgPool, operation: &str, statements: &[String]) -> ClientResult<()> {
    let mut tx = pool
        .begin()
        .await
        .map_err(|e| map_sqlx_error(operation, e))?;

    for sql in statements {
        sqlx::Executor::execute(&mut *tx, sqlx::raw_sql(sql))
            .await
            .map_err(|e| map_sqlx_error(operation, e))?;
    }

    tx.commit()
        .await
        .map_err(|e| map_sqlx_error(operation, e))
}

fn create_table_sql(collection: &CollectionDef) -> String {
    let mut columns = vec!["id UUID PRIMARY KEY".to_string()];
    columns.extend(
        collection
            .columns
            .iter()
            .map(|(name, ty)| format!("{name} {ty}")),
    );
    columns.push("data JSONB NOT NULL DEFAULT '{}'::jsonb".to_string());
    columns.push("created_at TIMESTAMPTZ NOT NULL DEFAULT now()".to_string());
    format!(
        "CREATE TABLE IF NOT EXISTS {} ({})",
        collection.name,
        columns.join(", ")
    )
}

fn create_index_sql(index: &IndexDef) -> String {
    format!(
        "CREATE {}INDEX IF NOT EXISTS {} ON {} ({})",
        if index.unique { "UNIQUE " } else { "" },
        index.name(),
        index.collection,
        index.columns.join(", ")
    )
}

fn map_sqlx_error(operation: &str, err: sqlx::Error) -> ClientError {
    match &err {
        sqlx::Error::Database(db) => {
            let code = db.code().map(|c| c.into_owned()).unwrap_or_default();
            let message = format!("{operation}: {}", db.message());
            match code.as_str() {
                "42P04" => ClientError::Conflict(message),
                "42501" => ClientError::Validation(message),
                c if c.starts_with("53") => ClientError::QuotaExceeded(message),
                _ => ClientError::Unavailable(message),
            }
        }
        _ => ClientError::Unavailable(format!("{operation}: {err}")),
    }
}

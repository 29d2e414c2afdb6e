//! wikiforge-postgres — tenant database provisioning.
//!
//! Implements [`wikiforge_core::DatabaseProvisioner`] over a process-wide
//! administrative connection pool. Only two statements matter here:
//! `CREATE DATABASE` and `DROP DATABASE IF EXISTS`; the workload itself
//! connects with the ordinary wiki credentials from configuration.
//!
//! PostgreSQL cannot bind identifiers as parameters, so database names
//! are validated against a strict identifier grammar before they are
//! quoted into the statement.

use async_trait::async_trait;
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use tracing::{debug, info};

use wikiforge_core::{AdapterError, AdapterResult, DatabaseProvisioner};

/// SQLSTATE for "database already exists".
const DUPLICATE_DATABASE: &str = "42P04";

/// Administrative database provisioner backed by sqlx.
pub struct PgProvisioner {
    pool: PgPool,
}

impl PgProvisioner {
    /// Connect the administrative pool. The URL must carry
    /// CREATE/DROP DATABASE privileges.
    pub async fn connect(admin_url: &str) -> AdapterResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(2)
            .connect(admin_url)
            .await
            .map_err(|e| AdapterError::Unavailable(format!("admin pool connect: {e}")))?;
        debug!("administrative database pool connected");
        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl DatabaseProvisioner for PgProvisioner {
    async fn create_database(&self, name: &str) -> AdapterResult<()> {
        validate_identifier(name)?;
        sqlx::query(&create_sql(name))
            .execute(&self.pool)
            .await
            .map_err(|e| map_admin_error(e, name))?;
        info!(database = %name, "database created");
        Ok(())
    }

    async fn drop_database(&self, name: &str) -> AdapterResult<()> {
        validate_identifier(name)?;
        // IF EXISTS keeps the drop idempotent; FORCE disconnects any
        // workload sessions still attached to the database.
        sqlx::query(&drop_sql(name))
            .execute(&self.pool)
            .await
            .map_err(|e| map_admin_error(e, name))?;
        info!(database = %name, "database dropped");
        Ok(())
    }

    async fn database_exists(&self, name: &str) -> AdapterResult<bool> {
        let row: Option<(i32,)> = sqlx::query_as("SELECT 1 FROM pg_database WHERE datname = $1")
            .bind(name)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| AdapterError::Unavailable(format!("query pg_database: {e}")))?;
        Ok(row.is_some())
    }
}

fn create_sql(name: &str) -> String {
    format!("CREATE DATABASE \"{name}\"")
}

fn drop_sql(name: &str) -> String {
    format!("DROP DATABASE IF EXISTS \"{name}\" WITH (FORCE)")
}

/// Reject anything that is not a plain lowercase PostgreSQL identifier.
/// The naming module only ever produces such names; this is the last
/// line of defense before interpolation.
fn validate_identifier(name: &str) -> AdapterResult<()> {
    let valid = !name.is_empty()
        && name.len() <= 63
        && name
            .chars()
            .next()
            .is_some_and(|c| c.is_ascii_lowercase() || c == '_')
        && name
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_');
    if valid {
        Ok(())
    } else {
        Err(AdapterError::CreateFailed(format!(
            "invalid database identifier: {name:?}"
        )))
    }
}

fn map_admin_error(e: sqlx::Error, name: &str) -> AdapterError {
    match &e {
        sqlx::Error::Database(db_err) => {
            if db_err.code().as_deref() == Some(DUPLICATE_DATABASE) {
                AdapterError::Conflict(format!("database {name} already exists"))
            } else {
                AdapterError::CreateFailed(format!("database {name}: {db_err}"))
            }
        }
        sqlx::Error::Io(_) | sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed => {
            AdapterError::Unavailable(format!("database engine: {e}"))
        }
        _ => AdapterError::CreateFailed(format!("database {name}: {e}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_derived_names() {
        assert!(validate_identifier("wikisaas_db_acme_1").is_ok());
        assert!(validate_identifier("wikisaas_db_tenant_42_prod").is_ok());
        assert!(validate_identifier("_private").is_ok());
    }

    #[test]
    fn rejects_injection_shaped_names() {
        for bad in [
            "",
            "Wiki",
            "db-name",
            "db name",
            "db\"; DROP DATABASE postgres; --",
            "1db",
        ] {
            assert!(validate_identifier(bad).is_err(), "{bad:?}");
        }
        assert!(validate_identifier(&"a".repeat(64)).is_err());
    }

    #[test]
    fn statements_quote_the_identifier() {
        assert_eq!(
            create_sql("wikisaas_db_acme_1"),
            "CREATE DATABASE \"wikisaas_db_acme_1\""
        );
        assert_eq!(
            drop_sql("wikisaas_db_acme_1"),
            "DROP DATABASE IF EXISTS \"wikisaas_db_acme_1\" WITH (FORCE)"
        );
    }
}

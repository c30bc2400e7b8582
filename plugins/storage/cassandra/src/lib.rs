pub mod cql;

use std::collections::HashMap;
use std::time::Duration;

use scylla::frame::response::result::CqlValue;
use scylla::prepared_statement::PreparedStatement;
use scylla::transport::errors::{DbError, NewSessionError, QueryError};
use scylla::{ExecutionProfile, Session, SessionBuilder};
use tokio::sync::RwLock;

use cdc_api::{BoxFuture, CdcError, EntityRow, EntitySchema, ErrorKind, RowSink, Value};

pub use cql::{create_table_cql, insert_cql};

// ═══════════════════════════════════════════════════════════════
//  CassandraConfig
// ═══════════════════════════════════════════════════════════════

fn default_keyspace() -> String {
    "binance_test".into()
}

fn default_request_timeout_ms() -> u64 {
    10_000
}

fn default_connect_timeout_ms() -> u64 {
    5_000
}

/// `[cassandra]` section.
#[derive(Clone, serde::Deserialize)]
pub struct CassandraConfig {
    /// Contact points, `host:port`.
    pub nodes: Vec<String>,

    #[serde(default = "default_keyspace")]
    pub keyspace: String,

    #[serde(default)]
    pub username: Option<String>,

    #[serde(default)]
    pub password: Option<String>,

    /// Issue `CREATE TABLE IF NOT EXISTS` for every pipeline table on startup.
    #[serde(default)]
    pub create_tables: bool,

    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,

    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
}

impl std::fmt::Debug for CassandraConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CassandraConfig")
            .field("nodes", &self.nodes)
            .field("keyspace", &self.keyspace)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .field("create_tables", &self.create_tables)
            .finish_non_exhaustive()
    }
}

impl CassandraConfig {
    pub fn validate(&self) -> Result<(), CdcError> {
        if self.nodes.is_empty() {
            return Err(CdcError::config("cassandra.nodes is empty"));
        }
        cql::validate_identifier("keyspace", &self.keyspace)?;
        if self.username.is_some() != self.password.is_some() {
            return Err(CdcError::config("cassandra.username and cassandra.password must be set together"));
        }
        Ok(())
    }
}

// ═══════════════════════════════════════════════════════════════
//  Error classification
// ═══════════════════════════════════════════════════════════════

/// Map a request error. `invalid` is the class of a request the server
/// refuses as invalid: a bad row on write, a table mismatch on prepare.
pub fn classify_query(e: QueryError, invalid: ErrorKind) -> CdcError {
    let kind = match &e {
        QueryError::DbError(db, _) => match db {
            DbError::AuthenticationError | DbError::Unauthorized => ErrorKind::Auth,
            DbError::Invalid | DbError::SyntaxError | DbError::ConfigError => invalid,
            DbError::FunctionFailure { .. } | DbError::TruncateError => ErrorKind::Row,
            _ => ErrorKind::Unavailable,
        },
        QueryError::BadQuery(_) => invalid,
        _ => ErrorKind::Unavailable,
    };
    CdcError { kind, message: e.to_string() }
}

pub fn classify_session(e: NewSessionError) -> CdcError {
    let kind = match &e {
        NewSessionError::DbError(DbError::AuthenticationError | DbError::Unauthorized, _) => ErrorKind::Auth,
        NewSessionError::EmptyKnownNodesList | NewSessionError::FailedToResolveAnyHostname(_) => ErrorKind::Config,
        _ => ErrorKind::Unavailable,
    };
    CdcError { kind, message: format!("cassandra session: {e}") }
}

pub fn to_cql(value: &Value) -> Option<CqlValue> {
    match value {
        Value::Long(v) => Some(CqlValue::BigInt(*v)),
        Value::Int(v) => Some(CqlValue::Int(*v)),
        Value::Double(v) => Some(CqlValue::Double(*v)),
        Value::Text(v) => Some(CqlValue::Text(v.clone())),
        Value::Null => None,
    }
}

/// Bind values of a row, in [`insert_cql`] column order.
pub fn bind_values(row: &EntityRow) -> Vec<Option<CqlValue>> {
    row.columns().iter().map(|(_, value)| to_cql(value)).collect()
}

// ═══════════════════════════════════════════════════════════════
//  CassandraSink
// ═══════════════════════════════════════════════════════════════

/// Cassandra destination. One session shared by all pipelines; one
/// prepared `INSERT` per table.
pub struct CassandraSink {
    session: Session,
    keyspace: String,
    create_tables: bool,
    statements: RwLock<HashMap<String, PreparedStatement>>,
}

impl CassandraSink {
    pub async fn connect(config: &CassandraConfig) -> Result<Self, CdcError> {
        config.validate()?;

        let profile = ExecutionProfile::builder()
            .request_timeout(Some(Duration::from_millis(config.request_timeout_ms)))
            .build();

        let mut builder = SessionBuilder::new()
            .known_nodes(&config.nodes)
            .connection_timeout(Duration::from_millis(config.connect_timeout_ms))
            .default_execution_profile_handle(profile.into_handle());
        if let (Some(user), Some(password)) = (&config.username, &config.password) {
            builder = builder.user(user, password);
        }

        let session = builder.build().await.map_err(classify_session)?;
        tracing::info!(nodes = ?config.nodes, keyspace = %config.keyspace, "cassandra session established");

        Ok(Self {
            session,
            keyspace: config.keyspace.clone(),
            create_tables: config.create_tables,
            statements: RwLock::new(HashMap::new()),
        })
    }
}

impl RowSink for CassandraSink {
    fn prepare<'a>(
        &'a self,
        table: &'a str,
        schema: &'static EntitySchema,
    ) -> BoxFuture<'a, Result<(), CdcError>> {
        Box::pin(async move {
            cql::validate_identifier("table", table)?;
            let ctx = format!("{}.{table}", self.keyspace);

            if self.create_tables {
                let ddl = create_table_cql(&self.keyspace, table, schema);
                self.session
                    .query_unpaged(ddl, ())
                    .await
                    .map_err(|e| classify_query(e, ErrorKind::Schema).with_context(&ctx))?;
                tracing::info!(table = %ctx, "ensured table exists");
            }

            // Preparing against a missing table or column fails here, before
            // any message is consumed.
            let prepared = self
                .session
                .prepare(insert_cql(&self.keyspace, table, schema))
                .await
                .map_err(|e| classify_query(e, ErrorKind::Schema).with_context(&ctx))?;
            self.statements.write().await.insert(table.to_string(), prepared);
            Ok(())
        })
    }

    fn write_row<'a>(
        &'a self,
        table: &'a str,
        row: &'a EntityRow,
    ) -> BoxFuture<'a, Result<(), CdcError>> {
        Box::pin(async move {
            let prepared = self
                .statements
                .read()
                .await
                .get(table)
                .cloned()
                .ok_or_else(|| CdcError::schema(format!("table '{table}' was not prepared")))?;
            self.session
                .execute_unpaged(&prepared, bind_values(row))
                .await
                .map_err(|e| classify_query(e, ErrorKind::Row))?;
            Ok(())
        })
    }

    fn close(&self) -> BoxFuture<'_, Result<(), CdcError>> {
        Box::pin(async move {
            self.statements.write().await.clear();
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cdc_api::{EntityKind, Operation};

    #[test]
    fn config_defaults() {
        let cfg: CassandraConfig = toml::from_str("nodes = [\"10.0.0.5:9042\"]").unwrap();
        assert_eq!(cfg.keyspace, "binance_test");
        assert!(!cfg.create_tables);
        assert_eq!(cfg.request_timeout_ms, 10_000);
        cfg.validate().unwrap();
    }

    #[test]
    fn config_validation() {
        let cfg: CassandraConfig = toml::from_str("nodes = []").unwrap();
        assert!(cfg.validate().is_err());
        let cfg: CassandraConfig = toml::from_str("nodes = [\"a\"]\nusername = \"u\"").unwrap();
        assert!(cfg.validate().is_err());
        let cfg: CassandraConfig =
            toml::from_str("nodes = [\"a\"]\nusername = \"u\"\npassword = \"s3cret\"").unwrap();
        assert!(!format!("{cfg:?}").contains("s3cret"));
    }

    #[test]
    fn row_binds_in_column_order() {
        let row = EntityRow {
            entity: EntityKind::LatestPrice,
            fields: vec![
                Value::Long(1),
                Value::Text("BTCUSDT".into()),
                Value::Text("50000.00".into()),
                Value::Long(1_700_000_000_000),
            ],
            source: Some("{}".into()),
            op: Operation::Create,
            ts_ms: 1_700_000_000_250,
            transaction: None,
        };
        assert_eq!(
            bind_values(&row),
            vec![
                Some(CqlValue::BigInt(1)),
                Some(CqlValue::Text("BTCUSDT".into())),
                Some(CqlValue::Text("50000.00".into())),
                Some(CqlValue::BigInt(1_700_000_000_000)),
                Some(CqlValue::Text("{}".into())),
                Some(CqlValue::Text("c".into())),
                Some(CqlValue::BigInt(1_700_000_000_250)),
                None,
            ]
        );
    }

    #[test]
    fn server_errors_are_classified() {
        let auth = classify_query(QueryError::DbError(DbError::Unauthorized, "no".into()), ErrorKind::Row);
        assert_eq!(auth.kind(), ErrorKind::Auth);

        let invalid = || QueryError::DbError(DbError::Invalid, "unconfigured table klines".into());
        assert_eq!(classify_query(invalid(), ErrorKind::Schema).kind(), ErrorKind::Schema);
        assert_eq!(classify_query(invalid(), ErrorKind::Row).kind(), ErrorKind::Row);

        let overloaded = classify_query(QueryError::DbError(DbError::Overloaded, "busy".into()), ErrorKind::Row);
        assert!(overloaded.is_retryable());
    }
}

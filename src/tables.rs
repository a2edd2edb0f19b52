//! Document store bootstrap
//!
//! The orchestrator keeps consumers and resources in a DynamoDB-compatible
//! store running inside the cluster. Its tables have to exist before the
//! orchestrator can serve requests.

use std::time::Duration;

use aws_config::BehaviorVersion;
use aws_sdk_dynamodb::config::{Credentials, Region};
use aws_sdk_dynamodb::error::DisplayErrorContext;
use aws_sdk_dynamodb::types::{
    AttributeDefinition, KeySchemaElement, KeyType, ProvisionedThroughput, ScalarAttributeType,
    TableStatus,
};
use aws_sdk_dynamodb::Client;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::config::EnvSource;
use crate::poll::{poll_until, Outcome, PollConfig, PollError};
use crate::retry::{retry_with_backoff, RetryConfig};
use crate::{Error, Result};

/// Tables the orchestrator expects
pub const TABLES: [&str; 2] = ["Consumers", "Resources"];

/// Hash key attribute shared by every table
pub const HASH_KEY: &str = "Id";

/// Provisioned read and write capacity
pub const THROUGHPUT: i64 = 5;

/// Interval between table creation attempts
pub const CREATE_RETRY_INTERVAL: Duration = Duration::from_secs(20);
/// Give up creating a table after this long
pub const CREATE_TIMEOUT: Duration = Duration::from_secs(120);
/// Give up waiting for a table to become active after this long
pub const ACTIVE_TIMEOUT: Duration = Duration::from_secs(300);

const STATIC_CREDENTIALS_PROVIDER: &str = "maestro-e2e-static";

/// Whether to fall back to static credentials for a local store
pub fn needs_static_credentials(env: &dyn EnvSource) -> bool {
    env.var("AWS_ACCESS_KEY_ID")
        .map_or(true, |v| v.trim().is_empty())
}

/// Client for the in-cluster document store
#[derive(Clone, Debug)]
pub struct DocumentStore {
    client: Client,
}

impl DocumentStore {
    /// Build a client for `endpoint` in `region`
    pub async fn connect(endpoint: &str, region: &str, env: &dyn EnvSource) -> Self {
        let mut loader = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(region.to_string()))
            .endpoint_url(endpoint);
        if needs_static_credentials(env) {
            debug!("AWS_ACCESS_KEY_ID unset, using static local credentials");
            loader = loader.credentials_provider(Credentials::new(
                "local",
                "local",
                None,
                None,
                STATIC_CREDENTIALS_PROVIDER,
            ));
        }
        let sdk_config = loader.load().await;
        Self {
            client: Client::new(&sdk_config),
        }
    }

    /// Create `table` unless it exists. Returns whether it was created.
    pub async fn create_table(&self, table: &str) -> Result<bool> {
        let attribute = AttributeDefinition::builder()
            .attribute_name(HASH_KEY)
            .attribute_type(ScalarAttributeType::S)
            .build()
            .map_err(|e| Error::document_store(table, e.to_string()))?;
        let key = KeySchemaElement::builder()
            .attribute_name(HASH_KEY)
            .key_type(KeyType::Hash)
            .build()
            .map_err(|e| Error::document_store(table, e.to_string()))?;
        let throughput = ProvisionedThroughput::builder()
            .read_capacity_units(THROUGHPUT)
            .write_capacity_units(THROUGHPUT)
            .build()
            .map_err(|e| Error::document_store(table, e.to_string()))?;

        let result = self
            .client
            .create_table()
            .table_name(table)
            .attribute_definitions(attribute)
            .key_schema(key)
            .provisioned_throughput(throughput)
            .send()
            .await;

        match result {
            Ok(_) => {
                info!(%table, "table created");
                Ok(true)
            }
            Err(e)
                if e.as_service_error()
                    .is_some_and(|se| se.is_resource_in_use_exception()) =>
            {
                debug!(%table, "table already exists");
                Ok(false)
            }
            Err(e) => Err(Error::document_store(
                table,
                DisplayErrorContext(&e).to_string(),
            )),
        }
    }

    /// Current status of `table`
    pub async fn table_status(&self, table: &str) -> Result<Option<TableStatus>> {
        let output = self
            .client
            .describe_table()
            .table_name(table)
            .send()
            .await
            .map_err(|e| Error::document_store(table, DisplayErrorContext(&e).to_string()))?;
        Ok(output.table().and_then(|t| t.table_status()).cloned())
    }

    /// Poll until `table` is `ACTIVE`
    pub async fn wait_active(&self, table: &str, poll: &PollConfig) -> Result<()> {
        poll_until(poll, &format!("table {} to be active", table), || async {
            let outcome = match self.table_status(table).await? {
                Some(TableStatus::Active) => Outcome::Satisfied(()),
                status => {
                    debug!(%table, ?status, "table not active yet");
                    Outcome::Pending
                }
            };
            Ok::<_, Error>(outcome)
        })
        .await?;
        Ok(())
    }

    /// Create every table the orchestrator needs and wait for each to be active.
    ///
    /// Cancelling `cancel` stops the create retries and the activity wait.
    pub async fn ensure_tables(&self, tables: &[&str], cancel: &CancellationToken) -> Result<()> {
        for table in tables {
            let description = format!("create table {}", table);
            if cancel.is_cancelled() {
                return Err(PollError::Cancelled {
                    description,
                    attempts: 0,
                }
                .into());
            }
            retry_with_backoff(
                &RetryConfig::fixed(CREATE_RETRY_INTERVAL, CREATE_TIMEOUT)
                    .cancel_on(cancel.clone()),
                &description,
                || self.create_table(table),
            )
            .await?;
            self.wait_active(
                table,
                &PollConfig::with_timeout(ACTIVE_TIMEOUT).cancel_on(cancel.clone()),
            )
            .await?;
            info!(%table, "table active");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MockEnvSource;
    use mockall::predicate::eq;

    async fn unreachable_store() -> DocumentStore {
        let mut env = MockEnvSource::new();
        env.expect_var().returning(|_| None);
        DocumentStore::connect("http://127.0.0.1:1", "us-east-1", &env).await
    }

    #[tokio::test]
    async fn test_cancelled_table_wait_returns_without_polling() {
        let store = unreachable_store().await;
        let token = CancellationToken::new();
        token.cancel();

        let err = store
            .wait_active(
                "Consumers",
                &PollConfig::with_timeout(ACTIVE_TIMEOUT).cancel_on(token),
            )
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            Error::Poll(PollError::Cancelled { attempts: 0, .. })
        ));
    }

    #[tokio::test]
    async fn test_cancelled_bootstrap_creates_nothing() {
        let store = unreachable_store().await;
        let token = CancellationToken::new();
        token.cancel();

        let err = store.ensure_tables(&TABLES, &token).await.unwrap_err();

        match err {
            Error::Poll(PollError::Cancelled { description, attempts }) => {
                assert_eq!(description, "create table Consumers");
                assert_eq!(attempts, 0);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_static_credentials_when_key_unset() {
        let mut env = MockEnvSource::new();
        env.expect_var().returning(|_| None);
        assert!(needs_static_credentials(&env));
    }

    #[test]
    fn test_static_credentials_when_key_blank() {
        let mut env = MockEnvSource::new();
        env.expect_var().returning(|_| Some(String::new()));
        assert!(needs_static_credentials(&env));
    }

    #[test]
    fn test_ambient_credentials_when_key_set() {
        let mut env = MockEnvSource::new();
        env.expect_var()
            .with(eq("AWS_ACCESS_KEY_ID"))
            .returning(|_| Some("AKIAEXAMPLE".to_string()));
        assert!(!needs_static_credentials(&env));
    }
}

//! Warehouse credential lookup.
//!
//! The store is created once by the binary and handed to every phase that
//! opens a warehouse connection, so each phase reads the secret itself.

use std::fmt;
use std::path::PathBuf;

use async_trait::async_trait;
use aws_sdk_secretsmanager::error::DisplayErrorContext;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use serde::Deserialize;

use crate::error::{JobError, JobResult};

pub const DEFAULT_SECRET_ID: &str = "data-de-redshift-credentials-prod-rw";
pub const DEFAULT_REGION: &str = "eu-west-1";

#[derive(Clone, Deserialize)]
pub struct WarehouseCredentials {
    pub host: String,
    pub username: String,
    pub password: String,
}

impl fmt::Debug for WarehouseCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WarehouseCredentials")
            .field("host", &self.host)
            .field("username", &self.username)
            .field("password", &"***")
            .finish()
    }
}

impl WarehouseCredentials {
    pub fn parse(secret_id: &str, payload: &str) -> JobResult<Self> {
        let credentials: Self = serde_json::from_str(payload).map_err(|err| JobError::Secret {
            id: secret_id.to_string(),
            reason: format!("malformed secret: {err}"),
        })?;
        if credentials.host.trim().is_empty() {
            return Err(JobError::Secret {
                id: secret_id.to_string(),
                reason: "host is empty".to_string(),
            });
        }
        Ok(credentials)
    }
}

#[async_trait]
pub trait SecretStore: Send + Sync {
    async fn credentials(&self, secret_id: &str) -> JobResult<WarehouseCredentials>;
}

/// AWS Secrets Manager, the production credential source.
#[derive(Debug, Clone)]
pub struct SecretsManagerStore {
    client: aws_sdk_secretsmanager::Client,
}

impl SecretsManagerStore {
    pub async fn for_region(region: &str) -> Self {
        let sdk_config = aws_config::defaults(aws_config::BehaviorVersion::latest())
            .region(aws_config::Region::new(region.to_string()))
            .load()
            .await;
        Self {
            client: aws_sdk_secretsmanager::Client::new(&sdk_config),
        }
    }
}

#[async_trait]
impl SecretStore for SecretsManagerStore {
    async fn credentials(&self, secret_id: &str) -> JobResult<WarehouseCredentials> {
        let output = self
            .client
            .get_secret_value()
            .secret_id(secret_id)
            .send()
            .await
            .map_err(|err| JobError::Secret {
                id: secret_id.to_string(),
                reason: DisplayErrorContext(&err).to_string(),
            })?;
        let payload = secret_payload(
            secret_id,
            output.secret_string(),
            output.secret_binary().map(|blob| blob.as_ref()),
        )?;
        WarehouseCredentials::parse(secret_id, &payload)
    }
}

/// Picks the secret text: `SecretString` when present, otherwise the
/// base64-encoded `SecretBinary`.
pub fn secret_payload(
    secret_id: &str,
    secret_string: Option<&str>,
    secret_binary: Option<&[u8]>,
) -> JobResult<String> {
    let secret_error = |reason: String| JobError::Secret {
        id: secret_id.to_string(),
        reason,
    };

    if let Some(text) = secret_string {
        return Ok(text.to_string());
    }
    let encoded = secret_binary.ok_or_else(|| secret_error("secret has no value".to_string()))?;
    let decoded = STANDARD
        .decode(encoded.trim_ascii())
        .map_err(|err| secret_error(format!("SecretBinary is not base64: {err}")))?;
    String::from_utf8(decoded)
        .map_err(|err| secret_error(format!("SecretBinary is not utf-8: {err}")))
}

/// Reads the secret JSON from an environment variable named after the id,
/// e.g. `data-de-redshift-credentials-prod-rw` becomes
/// `DATA_DE_REDSHIFT_CREDENTIALS_PROD_RW`.
#[derive(Debug, Default, Clone)]
pub struct EnvSecretStore;

impl EnvSecretStore {
    pub fn variable_for(secret_id: &str) -> String {
        secret_id
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() {
                    c.to_ascii_uppercase()
                } else {
                    '_'
                }
            })
            .collect()
    }
}

#[async_trait]
impl SecretStore for EnvSecretStore {
    async fn credentials(&self, secret_id: &str) -> JobResult<WarehouseCredentials> {
        let variable = Self::variable_for(secret_id);
        let payload = std::env::var(&variable).map_err(|_| JobError::Secret {
            id: secret_id.to_string(),
            reason: format!("{variable} is not set"),
        })?;
        WarehouseCredentials::parse(secret_id, &payload)
    }
}

/// Reads `<dir>/<secret id>.json`.
#[derive(Debug, Clone)]
pub struct FileSecretStore {
    dir: PathBuf,
}

impl FileSecretStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

#[async_trait]
impl SecretStore for FileSecretStore {
    async fn credentials(&self, secret_id: &str) -> JobResult<WarehouseCredentials> {
        let path = self.dir.join(format!("{secret_id}.json"));
        let payload = std::fs::read_to_string(&path).map_err(|err| JobError::Secret {
            id: secret_id.to_string(),
            reason: format!("cannot read {}: {err}", path.display()),
        })?;
        WarehouseCredentials::parse(secret_id, &payload)
    }
}

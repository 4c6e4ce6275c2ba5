use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use anyhow::Context;

use crate::error::{JobError, JobResult};
use crate::preprocess::TryOutBasis;
use crate::secrets::{
    EnvSecretStore, FileSecretStore, SecretStore, SecretsManagerStore, DEFAULT_REGION,
    DEFAULT_SECRET_ID,
};

pub const DEFAULT_DESTINATION: &str = "scoring.four_week_trial";
pub const DEFAULT_DATABASE: &str = "dev";
pub const DEFAULT_PORT: u16 = 5439;

/// A `[schema.]table` name made of ASCII letters, digits and underscores,
/// safe to splice into statements that cannot bind identifiers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableName(String);

impl TableName {
    pub fn parse(raw: &str) -> JobResult<Self> {
        let raw = raw.trim();
        let parts: Vec<&str> = raw.split('.').collect();
        let valid_part = |part: &&str| {
            !part.is_empty()
                && !part.starts_with(|c: char| c.is_ascii_digit())
                && part.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
        };
        if parts.len() > 2 || !parts.iter().all(valid_part) {
            return Err(JobError::InvalidTable(raw.to_string()));
        }
        Ok(Self(raw.to_string()))
    }
}

impl fmt::Display for TableName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Where warehouse credentials are read from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SecretSource {
    SecretsManager { region: String },
    Env,
    Dir(PathBuf),
}

impl FromStr for SecretSource {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "aws" | "secrets-manager" => Ok(SecretSource::SecretsManager {
                region: DEFAULT_REGION.to_string(),
            }),
            "env" => Ok(SecretSource::Env),
            other => Err(format!(
                "unknown secret source `{other}` (expected `aws`, `env` or `dir`)"
            )),
        }
    }
}

#[derive(Debug, Clone)]
pub struct JobConfig {
    pub secret_id: String,
    pub secret_source: SecretSource,
    pub database: String,
    pub port: u16,
    pub destination: TableName,
    pub try_out_basis: TryOutBasis,
}

impl Default for JobConfig {
    fn default() -> Self {
        Self {
            secret_id: DEFAULT_SECRET_ID.to_string(),
            secret_source: SecretSource::SecretsManager {
                region: DEFAULT_REGION.to_string(),
            },
            database: DEFAULT_DATABASE.to_string(),
            port: DEFAULT_PORT,
            destination: TableName(DEFAULT_DESTINATION.to_string()),
            try_out_basis: TryOutBasis::default(),
        }
    }
}

impl JobConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let defaults = Self::default();
        let var = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        let port = match var("TRIAL_WAREHOUSE_PORT") {
            Some(port) => port
                .trim()
                .parse()
                .with_context(|| format!("TRIAL_WAREHOUSE_PORT `{port}` is not a port"))?,
            None => defaults.port,
        };
        let destination = match var("TRIAL_DESTINATION_TABLE") {
            Some(table) => TableName::parse(&table)?,
            None => defaults.destination,
        };
        let try_out_basis = match var("TRIAL_TRY_OUT_BASIS") {
            Some(basis) => basis.parse::<TryOutBasis>().map_err(anyhow::Error::msg)?,
            None => defaults.try_out_basis,
        };

        let region = var("TRIAL_AWS_REGION").unwrap_or_else(|| DEFAULT_REGION.to_string());
        let secret_dir = var("TRIAL_SECRET_DIR").map(PathBuf::from);
        let source = var("TRIAL_SECRET_SOURCE").map(|source| source.trim().to_ascii_lowercase());
        let secret_source = match source.as_deref() {
            Some("dir") => SecretSource::Dir(
                secret_dir.context("TRIAL_SECRET_SOURCE=dir needs TRIAL_SECRET_DIR")?,
            ),
            Some(source) => match source.parse::<SecretSource>().map_err(anyhow::Error::msg)? {
                SecretSource::SecretsManager { .. } => SecretSource::SecretsManager { region },
                other => other,
            },
            None => match secret_dir {
                Some(dir) => SecretSource::Dir(dir),
                None => SecretSource::SecretsManager { region },
            },
        };

        Ok(Self {
            secret_id: var("TRIAL_SECRET_ID").unwrap_or(defaults.secret_id),
            secret_source,
            database: var("TRIAL_DATABASE").unwrap_or(defaults.database),
            port,
            destination,
            try_out_basis,
        })
    }

    pub async fn secret_store(&self) -> Box<dyn SecretStore> {
        match &self.secret_source {
            SecretSource::SecretsManager { region } => {
                Box::new(SecretsManagerStore::for_region(region).await)
            }
            SecretSource::Env => Box::new(EnvSecretStore),
            SecretSource::Dir(dir) => Box::new(FileSecretStore::new(dir)),
        }
    }
}

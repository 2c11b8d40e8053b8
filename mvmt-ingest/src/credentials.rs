//! Storage credentials
//!
//! Connection strings come either from configuration
//! ([`StaticCredentialProvider`]) or from the Azure CLI
//! ([`AzCliCredentialProvider`]), which shells out to
//! `az storage account show-connection-string`.

use crate::error::CredentialError;
use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;

/// Source of a storage account connection string
#[async_trait]
pub trait CredentialProvider: Send + Sync {
    async fn get_connection_string(
        &self,
        account: &str,
        resource_group: &str,
    ) -> Result<String, CredentialError>;
}

/// Runs the Azure CLI under the caller's login
#[derive(Debug, Clone)]
pub struct AzCliCredentialProvider {
    program: String,
}

impl AzCliCredentialProvider {
    pub fn new() -> Self {
        Self::with_program("az")
    }

    /// Use a different executable (a wrapper script, or a fake in tests)
    pub fn with_program(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

impl Default for AzCliCredentialProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CredentialProvider for AzCliCredentialProvider {
    async fn get_connection_string(
        &self,
        account: &str,
        resource_group: &str,
    ) -> Result<String, CredentialError> {
        debug!(account = %account, resource_group = %resource_group, "Fetching connection string via {}", self.program);

        let output = Command::new(&self.program)
            .args([
                "storage",
                "account",
                "show-connection-string",
                "--name",
                account,
                "--resource-group",
                resource_group,
                "--query",
                "connectionString",
                "--output",
                "json",
            ])
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|source| CredentialError::Spawn {
                program: self.program.clone(),
                source,
            })?;

        if !output.status.success() {
            return Err(CredentialError::CommandFailed {
                program: self.program.clone(),
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        parse_cli_output(&output.stdout, account)
    }
}

/// `az ... --output json` prints the queried value as a JSON string, or
/// `null` when the query matched nothing
pub(crate) fn parse_cli_output(stdout: &[u8], account: &str) -> Result<String, CredentialError> {
    let value: Option<String> = serde_json::from_slice(stdout)
        .map_err(|e| CredentialError::Malformed(e.to_string()))?;

    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .ok_or_else(|| CredentialError::Empty(account.to_string()))
}

/// Returns a connection string known up front
#[derive(Clone)]
pub struct StaticCredentialProvider {
    connection_string: String,
}

impl StaticCredentialProvider {
    pub fn new(connection_string: impl Into<String>) -> Self {
        Self {
            connection_string: connection_string.into(),
        }
    }
}

#[async_trait]
impl CredentialProvider for StaticCredentialProvider {
    async fn get_connection_string(
        &self,
        account: &str,
        _resource_group: &str,
    ) -> Result<String, CredentialError> {
        if self.connection_string.trim().is_empty() {
            return Err(CredentialError::Empty(account.to_string()));
        }
        Ok(self.connection_string.clone())
    }
}

/// Parsed `Key=Value;Key=Value` storage connection string
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConnectionString {
    pub protocol: String,
    pub account_name: Option<String>,
    pub account_key: Option<String>,
    pub blob_endpoint: Option<String>,
    pub shared_access_signature: Option<String>,
    pub endpoint_suffix: String,
}

impl ConnectionString {
    pub fn parse(raw: &str) -> Result<Self, CredentialError> {
        let mut cs = ConnectionString {
            protocol: "https".to_string(),
            endpoint_suffix: "core.windows.net".to_string(),
            ..Default::default()
        };

        for part in raw.split(';').map(str::trim).filter(|p| !p.is_empty()) {
            // Values (keys, signatures) may themselves contain '='
            let (key, value) = part.split_once('=').ok_or_else(|| {
                CredentialError::InvalidConnectionString("segment without '='".to_string())
            })?;
            let value = value.trim().to_string();

            match key.trim() {
                "DefaultEndpointsProtocol" => cs.protocol = value,
                "AccountName" => cs.account_name = Some(value),
                "AccountKey" => cs.account_key = Some(value),
                "BlobEndpoint" => cs.blob_endpoint = Some(value),
                "SharedAccessSignature" => cs.shared_access_signature = Some(value),
                "EndpointSuffix" => cs.endpoint_suffix = value,
                other => debug!(key = %other, "Ignoring connection string key"),
            }
        }

        if cs.account_name.is_none() && cs.blob_endpoint.is_none() {
            return Err(CredentialError::InvalidConnectionString(
                "needs AccountName or BlobEndpoint".to_string(),
            ));
        }
        if cs.account_key.is_none() && cs.shared_access_signature.is_none() {
            return Err(CredentialError::InvalidConnectionString(
                "needs AccountKey or SharedAccessSignature".to_string(),
            ));
        }
        Ok(cs)
    }

    /// Explicit `BlobEndpoint`, else `{protocol}://{account}.blob.{suffix}`
    pub fn blob_endpoint(&self) -> Result<String, CredentialError> {
        if let Some(endpoint) = &self.blob_endpoint {
            return Ok(endpoint.clone());
        }
        let account = self.account_name.as_deref().ok_or_else(|| {
            CredentialError::InvalidConnectionString("AccountName missing".to_string())
        })?;
        Ok(format!(
            "{}://{}.blob.{}",
            self.protocol, account, self.endpoint_suffix
        ))
    }
}

use crate::error::GatewayError;
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;

/// The closed set of deployment environments. Fixed at build time.
pub const TENANTS: [Tenant; 4] = [Tenant::Dev, Tenant::Qa3, Tenant::Prod1, Tenant::Prod3];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Tenant {
    Dev,
    Qa3,
    Prod1,
    Prod3,
}

impl Tenant {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Dev => "dev",
            Self::Qa3 => "qa3",
            Self::Prod1 => "prod1",
            Self::Prod3 => "prod3",
        }
    }

    pub fn parse(name: &str) -> Option<Self> {
        TENANTS.into_iter().find(|t| t.as_str() == name)
    }

    /// Upper-case suffix used by the `K_T` environment variable convention.
    fn env_suffix(self) -> &'static str {
        match self {
            Self::Dev => "DEV",
            Self::Qa3 => "QA3",
            Self::Prod1 => "PROD1",
            Self::Prod3 => "PROD3",
        }
    }
}

impl fmt::Display for Tenant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Credential snapshot for one tenant. Read once at startup, immutable for
/// the process lifetime.
#[derive(Debug, Clone, Default)]
pub struct TenantConfig {
    pub client_id: String,
    pub client_secret: String,
    pub scope: String,
    pub token_url: String,
    pub api_base_url: String,
    pub integration_instance: String,
}

impl TenantConfig {
    /// Name of the first required credential that is empty, if any.
    pub fn missing_field(&self) -> Option<&'static str> {
        if self.client_id.is_empty() {
            Some("client id")
        } else if self.client_secret.is_empty() {
            Some("client secret")
        } else if self.token_url.is_empty() {
            Some("token URL")
        } else {
            None
        }
    }

    pub fn is_configured(&self) -> bool {
        self.missing_field().is_none()
    }
}

/// All tenants' configuration, keyed by the fixed tenant set.
#[derive(Debug, Clone)]
pub struct TenantRegistry {
    configs: HashMap<Tenant, TenantConfig>,
}

impl TenantRegistry {
    pub fn from_env() -> Self {
        Self::from_pairs(std::env::vars())
    }

    /// Build from explicit key/value pairs. `from_env` delegates here; tests
    /// use it directly to avoid mutating process-global state.
    pub fn from_pairs(pairs: impl IntoIterator<Item = (String, String)>) -> Self {
        let vars: HashMap<String, String> = pairs.into_iter().collect();
        let read = |key: &str, tenant: Tenant| -> String {
            vars.get(&format!("{key}_{}", tenant.env_suffix()))
                .map(|v| v.trim().to_string())
                .unwrap_or_default()
        };

        let mut configs = HashMap::new();
        for tenant in TENANTS {
            configs.insert(
                tenant,
                TenantConfig {
                    client_id: read("OIC_CLIENT_ID", tenant),
                    client_secret: read("OIC_CLIENT_SECRET", tenant),
                    scope: read("OIC_SCOPE", tenant),
                    token_url: read("OIC_TOKEN_URL", tenant),
                    api_base_url: read("OIC_API_BASE_URL", tenant),
                    integration_instance: read("OIC_INTEGRATION_INSTANCE", tenant),
                },
            );
        }
        Self { configs }
    }

    /// Resolve a caller-supplied tenant name to its configuration.
    ///
    /// # Errors
    ///
    /// `UnknownTenant` when the name is outside the fixed set;
    /// `TenantNotConfigured` when a required credential is empty.
    pub fn config_for(&self, name: &str) -> Result<(Tenant, &TenantConfig), GatewayError> {
        let tenant =
            Tenant::parse(name).ok_or_else(|| GatewayError::UnknownTenant(name.to_string()))?;
        let config = self
            .configs
            .get(&tenant)
            .expect("fixed tenant set is fully populated");
        if let Some(missing) = config.missing_field() {
            return Err(GatewayError::TenantNotConfigured {
                tenant: name.to_string(),
                missing,
            });
        }
        Ok((tenant, config))
    }

    /// Tenants with complete credentials.
    pub fn configured(&self) -> Vec<Tenant> {
        TENANTS
            .into_iter()
            .filter(|t| self.configs[t].is_configured())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pairs(entries: &[(&str, &str)]) -> Vec<(String, String)> {
        entries
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect()
    }

    #[test]
    fn reads_suffixed_env_keys_per_tenant() {
        let reg = TenantRegistry::from_pairs(pairs(&[
            ("OIC_CLIENT_ID_DEV", "id-dev"),
            ("OIC_CLIENT_SECRET_DEV", "secret-dev"),
            ("OIC_TOKEN_URL_DEV", "https://idcs.example/oauth2/v1/token"),
            ("OIC_API_BASE_URL_DEV", "https://oic-dev.example"),
            ("OIC_SCOPE_DEV", "urn:opc:resource:consumer::all"),
            ("OIC_INTEGRATION_INSTANCE_DEV", "oic-dev"),
            ("OIC_CLIENT_ID_PROD1", "id-prod1"),
        ]));

        let (tenant, cfg) = reg.config_for("dev").expect("dev configured");
        assert_eq!(tenant, Tenant::Dev);
        assert_eq!(cfg.client_id, "id-dev");
        assert_eq!(cfg.integration_instance, "oic-dev");
        assert_eq!(reg.configured(), vec![Tenant::Dev]);
    }

    #[test]
    fn unknown_tenant_is_rejected_by_name() {
        let reg = TenantRegistry::from_pairs(Vec::new());
        let err = reg.config_for("staging").unwrap_err();
        assert_eq!(err.to_string(), "Unknown tenant: staging");
    }

    #[test]
    fn incomplete_tenant_reports_first_missing_credential() {
        let reg = TenantRegistry::from_pairs(pairs(&[
            ("OIC_CLIENT_ID_QA3", "id-qa3"),
            ("OIC_TOKEN_URL_QA3", "https://idcs.example/token"),
        ]));
        let err = reg.config_for("qa3").unwrap_err();
        assert_eq!(
            err.to_string(),
            "Tenant 'qa3' is not configured: client secret is empty"
        );
    }

    #[test]
    fn whitespace_only_values_count_as_missing() {
        let reg = TenantRegistry::from_pairs(pairs(&[("OIC_CLIENT_ID_DEV", "   ")]));
        let err = reg.config_for("dev").unwrap_err();
        assert!(err.to_string().contains("client id is empty"));
    }
}

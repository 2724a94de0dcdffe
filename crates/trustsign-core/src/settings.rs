//! Signing configuration shared by the CLI and any presentation layer.

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

const DEFAULT_MAX_CONCURRENT: usize = 2;
const DEFAULT_POLL_INTERVAL_SECS: u64 = 5;
const DEFAULT_POLL_TIMEOUT_SECS: u64 = 600;

/// Application settings.
///
/// The five identity fields (`tenant_id`, `client_id`, `client_secret`,
/// `endpoint`, `certificate_profile`) decide [`is_configured`](Self::is_configured);
/// everything else has a usable default.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Settings {
    pub tenant_id: Option<String>,
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    pub endpoint: Option<String>,
    pub certificate_profile: Option<String>,
    /// Token authority base URL; the public Microsoft identity platform when unset.
    pub authority_host: Option<String>,
    /// OAuth scope requested for the signing API; the public code-signing scope when unset.
    pub token_scope: Option<String>,
    pub max_concurrent_signing_requests: usize,
    pub show_hidden_files: bool,
    pub recursive_scan: bool,
    pub poll_interval_secs: u64,
    pub poll_timeout_secs: u64,
    pub last_selected_path: Option<PathBuf>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            tenant_id: None,
            client_id: None,
            client_secret: None,
            endpoint: None,
            certificate_profile: None,
            authority_host: None,
            token_scope: None,
            max_concurrent_signing_requests: DEFAULT_MAX_CONCURRENT,
            show_hidden_files: false,
            recursive_scan: false,
            poll_interval_secs: DEFAULT_POLL_INTERVAL_SECS,
            poll_timeout_secs: DEFAULT_POLL_TIMEOUT_SECS,
            last_selected_path: None,
        }
    }
}

/// Values that replace the corresponding [`Settings`] field when present.
#[derive(Debug, Clone, Default)]
pub struct SettingsOverrides {
    pub tenant_id: Option<String>,
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    pub endpoint: Option<String>,
    pub certificate_profile: Option<String>,
}

fn present(value: &Option<String>) -> bool {
    value.as_deref().is_some_and(|v| !v.trim().is_empty())
}

impl Settings {
    /// True iff all five identity fields are set and not whitespace.
    pub fn is_configured(&self) -> bool {
        present(&self.tenant_id)
            && present(&self.client_id)
            && present(&self.client_secret)
            && present(&self.endpoint)
            && present(&self.certificate_profile)
    }

    /// Names of the identity fields that are still missing, for error messages.
    pub fn missing_fields(&self) -> Vec<&'static str> {
        [
            ("tenantId", &self.tenant_id),
            ("clientId", &self.client_id),
            ("clientSecret", &self.client_secret),
            ("endpoint", &self.endpoint),
            ("certificateProfile", &self.certificate_profile),
        ]
        .into_iter()
        .filter(|(_, v)| !present(v))
        .map(|(name, _)| name)
        .collect()
    }

    pub fn with_overrides(mut self, overrides: SettingsOverrides) -> Self {
        let SettingsOverrides {
            tenant_id,
            client_id,
            client_secret,
            endpoint,
            certificate_profile,
        } = overrides;
        if tenant_id.is_some() {
            self.tenant_id = tenant_id;
        }
        if client_id.is_some() {
            self.client_id = client_id;
        }
        if client_secret.is_some() {
            self.client_secret = client_secret;
        }
        if endpoint.is_some() {
            self.endpoint = endpoint;
        }
        if certificate_profile.is_some() {
            self.certificate_profile = certificate_profile;
        }
        self
    }

    /// Concurrency limit, never below one.
    pub fn concurrency_limit(&self) -> usize {
        self.max_concurrent_signing_requests.max(1)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs.max(1))
    }

    pub fn poll_timeout(&self) -> Duration {
        Duration::from_secs(self.poll_timeout_secs)
    }
}

/// Persistence boundary for [`Settings`].
#[async_trait]
pub trait SettingsStore: Send + Sync {
    type Error: std::error::Error + Send + Sync + 'static;

    async fn load(&self) -> Result<Settings, Self::Error>;

    async fn save(&self, settings: &Settings) -> Result<(), Self::Error>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn configured() -> Settings {
        Settings {
            tenant_id: Some("tenant".into()),
            client_id: Some("client".into()),
            client_secret: Some("secret".into()),
            endpoint: Some("https://eus.codesigning.azure.net".into()),
            certificate_profile: Some("release".into()),
            ..Settings::default()
        }
    }

    #[test]
    fn fully_populated_is_configured() {
        assert!(configured().is_configured());
        assert!(configured().missing_fields().is_empty());
    }

    #[test]
    fn whitespace_field_is_not_configured() {
        let mut s = configured();
        s.client_secret = Some("   ".into());
        assert!(!s.is_configured());
        assert_eq!(s.missing_fields(), vec!["clientSecret"]);
    }

    #[test]
    fn optional_fields_do_not_affect_configured() {
        let mut s = configured();
        s.authority_host = None;
        s.last_selected_path = None;
        s.max_concurrent_signing_requests = 0;
        assert!(s.is_configured());
    }

    #[test]
    fn default_is_not_configured() {
        let s = Settings::default();
        assert!(!s.is_configured());
        assert_eq!(s.missing_fields().len(), 5);
        assert_eq!(s.poll_interval(), Duration::from_secs(5));
        assert_eq!(s.poll_timeout(), Duration::from_secs(600));
    }

    #[test]
    fn overrides_replace_only_present_values() {
        let s = configured().with_overrides(SettingsOverrides {
            tenant_id: Some("other-tenant".into()),
            ..SettingsOverrides::default()
        });
        assert_eq!(s.tenant_id.as_deref(), Some("other-tenant"));
        assert_eq!(s.client_id.as_deref(), Some("client"));
    }

    #[test]
    fn concurrency_limit_has_floor_of_one() {
        let s = Settings {
            max_concurrent_signing_requests: 0,
            ..Settings::default()
        };
        assert_eq!(s.concurrency_limit(), 1);
    }

    #[test]
    fn partial_json_fills_defaults() {
        let s: Settings = serde_json::from_str(r#"{"tenantId": "t", "pollTimeoutSecs": 30}"#)
            .expect("parse");
        assert_eq!(s.tenant_id.as_deref(), Some("t"));
        assert_eq!(s.poll_timeout_secs, 30);
        assert_eq!(s.poll_interval_secs, 5);
        assert_eq!(s.max_concurrent_signing_requests, 2);
    }
}

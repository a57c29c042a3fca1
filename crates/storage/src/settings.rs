//! Settings adapters holding the expected webhook access token.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use reconcile::{SettingsError, SettingsStore};
use serde::{Deserialize, Serialize};

/// Persisted webhook settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WebhookSettings {
    /// The exact value expected in the `Authorization` header.
    #[serde(default)]
    pub token: Option<String>,
}

impl WebhookSettings {
    /// Builds settings with `token` as the expected header value.
    ///
    /// # Errors
    ///
    /// [`SettingsError::Invalid`] if the token is empty.
    pub fn with_token(token: impl Into<String>) -> Result<Self, SettingsError> {
        let token = token.into();
        if token.is_empty() {
            return Err(SettingsError::Invalid {
                message: "the authorization token must not be empty".into(),
            });
        }
        Ok(Self { token: Some(token) })
    }

    /// The configured token, treating an empty value as unset.
    pub fn configured_token(&self) -> Option<&str> {
        self.token.as_deref().filter(|t| !t.is_empty())
    }
}

/// Settings fixed at construction time.
#[derive(Debug, Clone, Default)]
pub struct StaticSettings {
    settings: WebhookSettings,
}

impl StaticSettings {
    pub fn new(settings: WebhookSettings) -> Self {
        Self { settings }
    }

    pub fn with_token(token: impl Into<String>) -> Self {
        Self::new(WebhookSettings {
            token: Some(token.into()),
        })
    }
}

#[async_trait]
impl SettingsStore for StaticSettings {
    async fn expected_token(&self) -> Result<Option<String>, SettingsError> {
        Ok(self.settings.configured_token().map(str::to_owned))
    }
}

/// Settings stored as a JSON file, re-read on every access.
#[derive(Debug, Clone)]
pub struct FileSettings {
    path: PathBuf,
}

impl FileSettings {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reads the settings file; a missing file yields default settings.
    pub async fn load(&self) -> Result<WebhookSettings, SettingsError> {
        match tokio::fs::read(&self.path).await {
            Ok(bytes) => serde_json::from_slice(&bytes).map_err(|e| SettingsError::Invalid {
                message: format!("{} is not a settings file: {e}", self.path.display()),
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(WebhookSettings::default()),
            Err(e) => Err(SettingsError::Unavailable {
                message: format!("reading {}: {e}", self.path.display()),
            }),
        }
    }

    pub async fn save(&self, settings: &WebhookSettings) -> Result<(), SettingsError> {
        let unavailable = |action: &str, path: &Path, e: std::io::Error| SettingsError::Unavailable {
            message: format!("{action} {}: {e}", path.display()),
        };

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| unavailable("creating", parent, e))?;
        }
        let bytes = serde_json::to_vec_pretty(settings).map_err(|e| SettingsError::Invalid {
            message: format!("serialising settings: {e}"),
        })?;
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, bytes)
            .await
            .map_err(|e| unavailable("writing", &tmp, e))?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .map_err(|e| unavailable("replacing", &self.path, e))
    }
}

#[async_trait]
impl SettingsStore for FileSettings {
    async fn expected_token(&self) -> Result<Option<String>, SettingsError> {
        Ok(self.load().await?.configured_token().map(str::to_owned))
    }
}

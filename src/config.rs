use std::path::Path;

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::error::Error;

pub const CONFIG_FILE: &str = "scriptorium.json";

const DEFAULT_MODEL: &str = "gpt-5-codex";
const DEFAULT_ENDPOINT: &str = "http://127.0.0.1:8097";

/// Top-level scriptorium.json config. Every field falls back to a default
/// when missing, including the file itself.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Config {
    pub models: ModelsConfig,
    pub reasoning_effort: ReasoningEffortConfig,
    pub endpoints: EndpointsConfig,
    pub health: HealthConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            models: ModelsConfig::default(),
            reasoning_effort: ReasoningEffortConfig::default(),
            endpoints: EndpointsConfig::default(),
            health: HealthConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ModelsConfig {
    pub architect: String,
    pub coding: String,
    pub manager: String,
}

impl Default for ModelsConfig {
    fn default() -> Self {
        Self {
            architect: DEFAULT_MODEL.to_string(),
            coding: DEFAULT_MODEL.to_string(),
            manager: DEFAULT_MODEL.to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ReasoningEffortConfig {
    pub architect: Option<String>,
    pub coding: Option<String>,
    pub manager: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EndpointsConfig {
    pub local: String,
}

impl Default for EndpointsConfig {
    fn default() -> Self {
        Self {
            local: DEFAULT_ENDPOINT.to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct HealthConfig {
    /// Also run `make integration-test` in the health gate.
    pub integration_test: bool,
}

impl Config {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        serde_json::from_str(&content).with_context(|| format!("parsing {}", path.display()))
    }

    /// Load `scriptorium.json` from the repo root, falling back to defaults
    /// when the file is absent.
    pub fn load_or_default(repo_root: &Path) -> anyhow::Result<Self> {
        let path = repo_root.join(CONFIG_FILE);
        if path.exists() {
            Self::load(&path)
        } else {
            Ok(Self::default())
        }
    }
}

/// Parsed endpoint URL. Scheme and host are required; the port defaults to
/// 443 for https and 80 for http.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub scheme: String,
    pub host: String,
    pub port: u16,
}

impl Endpoint {
    pub fn parse(url: &str) -> anyhow::Result<Self> {
        let (scheme, rest) = url
            .split_once("://")
            .ok_or_else(|| Error::InvalidInput(format!("endpoint {url:?} has no scheme")))?;
        if scheme.is_empty() {
            return Err(Error::InvalidInput(format!("endpoint {url:?} has no scheme")).into());
        }

        let authority = rest.split(['/', '?', '#']).next().unwrap_or("");
        let (host, port_str) = match authority.rsplit_once(':') {
            Some((h, p)) => (h, Some(p)),
            None => (authority, None),
        };
        if host.is_empty() {
            return Err(Error::InvalidInput(format!("endpoint {url:?} has no host")).into());
        }

        let port = match port_str {
            Some(p) => {
                let parsed: u32 = p
                    .parse()
                    .map_err(|_| Error::InvalidInput(format!("endpoint port {p:?} is not a number")))?;
                if parsed < 1 || parsed > 65535 {
                    return Err(
                        Error::InvalidInput(format!("endpoint port {parsed} out of range")).into()
                    );
                }
                parsed as u16
            }
            None => match scheme {
                "https" => 443,
                "http" => 80,
                other => {
                    return Err(Error::InvalidInput(format!(
                        "endpoint scheme {other:?} has no default port"
                    ))
                    .into());
                }
            },
        };

        Ok(Self {
            scheme: scheme.to_string(),
            host: host.to_string(),
            port,
        })
    }

    pub fn base_url(&self) -> String {
        format!("{}://{}:{}", self.scheme, self.host, self.port)
    }
}

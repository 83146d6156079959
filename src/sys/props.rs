// src/sys/props.rs
//
// Runtime connection properties: a `key value` properties file referenced
// by WSK_CONFIG_FILE, overridden field by field from the environment.

use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::PathBuf;

use crate::error::DeployError;

pub const CONFIG_FILE_VAR: &str = "WSK_CONFIG_FILE";
pub const APIHOST_VAR: &str = "OW_APIHOST";
pub const AUTH_VAR: &str = "OW_AUTH";
pub const NAMESPACE_VAR: &str = "OW_NAMESPACE";
pub const APIGW_TOKEN_VAR: &str = "OW_APIGW_ACCESS_TOKEN";

/// Resolved identity for the target runtime platform.
/// `None` means neither source provided the field.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct ConnectionProperties {
    pub api_host: Option<String>,
    pub namespace: Option<String>,
    pub auth_key: Option<String>,
    pub gateway_access_token: Option<String>,
}

impl std::fmt::Debug for ConnectionProperties {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let redact = |v: &Option<String>| v.as_ref().map(|_| "[REDACTED]");
        f.debug_struct("ConnectionProperties")
            .field("api_host", &self.api_host)
            .field("namespace", &self.namespace)
            .field("auth_key", &redact(&self.auth_key))
            .field("gateway_access_token", &redact(&self.gateway_access_token))
            .finish()
    }
}

impl ConnectionProperties {
    /// Renders the properties in the file format `resolve()` reads back.
    pub fn to_properties_file(&self) -> String {
        let mut out = String::new();
        for (key, value) in [
            ("APIHOST", &self.api_host),
            ("AUTH", &self.auth_key),
            ("NAMESPACE", &self.namespace),
            ("APIGW_ACCESS_TOKEN", &self.gateway_access_token),
        ] {
            if let Some(v) = value {
                out.push_str(&format!("{}={}\n", key, v));
            }
        }
        out
    }
}

/// Reads connection properties from an explicit environment snapshot.
/// The process environment is never mutated.
#[derive(Debug, Clone, Default)]
pub struct PropertyResolver {
    vars: HashMap<String, String>,
}

impl PropertyResolver {
    pub fn new(vars: HashMap<String, String>) -> Self {
        Self { vars }
    }

    pub fn from_env() -> Self {
        Self::new(std::env::vars().collect())
    }

    pub fn vars(&self) -> &HashMap<String, String> {
        &self.vars
    }

    /// Set and non-empty. Does not check that the file exists.
    pub fn has_config(&self) -> bool {
        self.var(CONFIG_FILE_VAR).is_some()
    }

    pub fn config_file(&self) -> Option<PathBuf> {
        self.var(CONFIG_FILE_VAR).map(PathBuf::from)
    }

    pub fn resolve(&self) -> Result<ConnectionProperties, DeployError> {
        let file = match self.config_file() {
            Some(path) => read_properties_file(path)?,
            None => HashMap::new(),
        };

        let pick = |env_name: &str, file_key: &str| -> Option<String> {
            self.var(env_name)
                .map(str::to_owned)
                .or_else(|| file.get(file_key).cloned())
        };

        Ok(ConnectionProperties {
            api_host: pick(APIHOST_VAR, "apihost"),
            namespace: pick(NAMESPACE_VAR, "namespace"),
            auth_key: pick(AUTH_VAR, "auth"),
            gateway_access_token: pick(APIGW_TOKEN_VAR, "apigw_access_token"),
        })
    }

    fn var(&self, name: &str) -> Option<&str> {
        self.vars
            .get(name)
            .map(String::as_str)
            .filter(|v| !v.is_empty())
    }
}

/// A missing file yields an empty map; any other read failure is an error.
fn read_properties_file(path: PathBuf) -> Result<HashMap<String, String>, DeployError> {
    match std::fs::read_to_string(&path) {
        Ok(content) => Ok(parse_properties(&content)),
        Err(e) if e.kind() == ErrorKind::NotFound => {
            tracing::debug!("properties file {} not found, using environment only", path.display());
            Ok(HashMap::new())
        }
        Err(source) => Err(DeployError::FileAccess { path, source }),
    }
}

/// Parses `key value`, `key=value` or `key: value` lines. Keys are lower-cased.
/// Blank lines, `#` comments and lines without a value are skipped.
pub fn parse_properties(content: &str) -> HashMap<String, String> {
    let mut map = HashMap::new();
    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let split = line
            .find(|c: char| c.is_whitespace() || c == '=' || c == ':')
            .unwrap_or(line.len());
        let (key, rest) = line.split_at(split);
        let value = rest
            .trim_start()
            .trim_start_matches(['=', ':'])
            .trim();
        if key.is_empty() || value.is_empty() {
            continue;
        }
        map.insert(key.to_ascii_lowercase(), value.to_string());
    }
    map
}

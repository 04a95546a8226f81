use std::fs;
use std::path::{Path, PathBuf};

use campus_api::{GateError, SecretStore};

/// Resolves secret references as environment variable names.
///
/// When a variable is unset, the optional dotenv files are consulted in
/// order (`.env.local` then `.env` in a typical Next.js checkout).
#[derive(Debug, Default, Clone)]
pub struct EnvSecretStore {
    env_files: Vec<PathBuf>,
}

impl EnvSecretStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Also look in `.env.local` and `.env` under `dir`.
    pub fn with_dotenv_dir(dir: &Path) -> Self {
        Self {
            env_files: vec![dir.join(".env.local"), dir.join(".env")],
        }
    }

    pub fn with_env_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.env_files.push(path.into());
        self
    }
}

impl SecretStore for EnvSecretStore {
    fn get(&self, secret_ref: &str) -> Result<String, GateError> {
        if let Ok(value) = std::env::var(secret_ref) {
            if !value.is_empty() {
                return Ok(value);
            }
        }

        for path in &self.env_files {
            if let Ok(content) = fs::read_to_string(path) {
                if let Some(value) = parse_env_value(&content, secret_ref) {
                    return Ok(value);
                }
            }
        }

        Err(GateError::NotFound(format!(
            "missing secret env var {secret_ref}"
        )))
    }
}

fn parse_env_value(content: &str, key: &str) -> Option<String> {
    content.lines().find_map(|raw_line| {
        let line = raw_line.trim();
        if line.is_empty() || line.starts_with('#') {
            return None;
        }
        let line = line.strip_prefix("export ").unwrap_or(line);
        let (k, v) = line.split_once('=')?;
        if k.trim() != key {
            return None;
        }
        let v = v.trim();
        let unquoted = if v.len() >= 2
            && ((v.starts_with('"') && v.ends_with('"'))
                || (v.starts_with('\'') && v.ends_with('\'')))
        {
            v[1..v.len() - 1].trim()
        } else {
            v
        };
        (!unquoted.is_empty()).then(|| unquoted.to_string())
    })
}

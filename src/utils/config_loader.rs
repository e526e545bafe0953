use dotenvy::dotenv;
use regex::{Captures, Regex};
use serde::de::DeserializeOwned;
use std::sync::LazyLock;
use std::{env, fs};
use thiserror::Error;

static ENV_VAR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\$\{([a-zA-Z_][0-9a-zA-Z_]*)\}").expect("env var pattern is a valid regex"));

#[allow(clippy::enum_variant_names)]
#[derive(Debug, Error)]
pub enum LoadConfigError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
    #[error("TOML error: {0}")]
    TomlError(#[from] toml::de::Error),
}

pub async fn load_from_file<T: DeserializeOwned>(file_name: String) -> Result<T, LoadConfigError> {
    dotenv().ok();
    let contents = tokio::fs::read_to_string(file_name).await?;
    parse_toml(&contents)
}

pub fn load_from_file_sync<T: DeserializeOwned>(file_name: String) -> Result<T, LoadConfigError> {
    dotenv().ok();
    let contents = fs::read_to_string(file_name)?;
    parse_toml(&contents)
}

/// Like [`load_from_file`] but a missing file yields `None`.
pub async fn load_optional_from_file<T: DeserializeOwned>(file_name: String) -> Result<Option<T>, LoadConfigError> {
    if !tokio::fs::try_exists(&file_name).await? {
        return Ok(None);
    }
    load_from_file(file_name).await.map(Some)
}

fn parse_toml<T: DeserializeOwned>(contents: &str) -> Result<T, LoadConfigError> {
    let contents = expand_vars(contents);
    let config: T = toml::from_str(&contents)?;
    Ok(config)
}

fn expand_vars(raw_config: &str) -> String {
    ENV_VAR
        .replace_all(raw_config, |caps: &Captures| match env::var(&caps[1]) {
            Ok(val) => val,
            Err(_) => caps[0].to_string(),
        })
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Deserialize)]
    struct Section {
        endpoint: String,
    }

    #[test]
    fn test_expand_vars_keeps_unknown() {
        let raw = "a = \"${CHAIN_WATCH_SURELY_UNSET_VAR}\"";
        assert_eq!(expand_vars(raw), raw);
    }

    #[test]
    fn test_expand_vars_substitutes() {
        // SAFETY: test-local variable name, not read concurrently elsewhere
        unsafe { env::set_var("CHAIN_WATCH_TEST_ENDPOINT", "wss://example.test") };
        let section: Section = parse_toml("endpoint = \"${CHAIN_WATCH_TEST_ENDPOINT}\"").unwrap();
        assert_eq!(section.endpoint, "wss://example.test");
    }

    #[tokio::test]
    async fn test_optional_missing_file() {
        let loaded: Option<Section> = load_optional_from_file("/definitely/not/here.toml".to_string()).await.unwrap();
        assert!(loaded.is_none());
    }

    #[tokio::test]
    async fn test_optional_present_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("section.toml");
        tokio::fs::write(&path, "endpoint = \"wss://kusama.test\"").await.unwrap();

        let loaded: Option<Section> = load_optional_from_file(path.to_string_lossy().to_string()).await.unwrap();
        assert_eq!(loaded.map(|section| section.endpoint).as_deref(), Some("wss://kusama.test"));
    }
}

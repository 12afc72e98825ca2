//! Run configuration
//!
//! One `Config` value is built at startup from CLI flags plus an optional
//! config file, and threaded explicitly through everything that needs it.
//! Endpoint precedence: CLI flag, then config file, then built-in default
//! for the selected environment.

use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};
use serde::Deserialize;

const DEFAULT_META_URL: &str = "https://meta.metasub.org";
const DEFAULT_SUBMIT_URL: &str = "https://submit.metasub.org";
const DEFAULT_TEST_META_URL: &str = "https://meta-test.metasub.org";
const DEFAULT_TEST_SUBMIT_URL: &str = "https://submit-test.metasub.org";

/// Configuration for a single run
#[derive(Debug, Clone)]
pub struct Config {
    /// Base URL of the metadata service (schema + records)
    pub meta_url: String,
    /// Base URL of the submission service (tokens + audit trail)
    pub submit_url: String,
    /// Bearer token identifying the submitting user
    pub token: String,
    /// True when writing to the production store
    pub production: bool,
}

impl Config {
    pub fn resolve(
        token: String,
        production: bool,
        meta_url: Option<String>,
        submit_url: Option<String>,
    ) -> Result<Self> {
        let file = ConfigFile::load()?;
        let section = file.as_ref().and_then(|f| f.section(production));

        let meta_url = meta_url
            .or_else(|| section.and_then(|s| s.meta_url.clone()))
            .unwrap_or_else(|| default_meta_url(production).to_string());
        let submit_url = submit_url
            .or_else(|| section.and_then(|s| s.submit_url.clone()))
            .unwrap_or_else(|| default_submit_url(production).to_string());

        Ok(Self {
            meta_url,
            submit_url,
            token,
            production,
        })
    }

    /// Non-production runs synthesize placeholder accessions for new records
    pub fn dry_run(&self) -> bool {
        !self.production
    }
}

fn default_meta_url(production: bool) -> &'static str {
    if production {
        DEFAULT_META_URL
    } else {
        DEFAULT_TEST_META_URL
    }
}

fn default_submit_url(production: bool) -> &'static str {
    if production {
        DEFAULT_SUBMIT_URL
    } else {
        DEFAULT_TEST_SUBMIT_URL
    }
}

/// Optional `~/.config/metasub/config.toml`
#[derive(Debug, Default, Deserialize)]
struct ConfigFile {
    production: Option<EndpointSection>,
    test: Option<EndpointSection>,
}

#[derive(Debug, Deserialize)]
struct EndpointSection {
    meta_url: Option<String>,
    submit_url: Option<String>,
}

impl ConfigFile {
    fn path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("metasub").join("config.toml"))
    }

    fn load() -> Result<Option<Self>> {
        let Some(path) = Self::path() else {
            return Ok(None);
        };
        if !path.exists() {
            return Ok(None);
        }
        let content = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let parsed = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
        Ok(Some(parsed))
    }

    fn section(&self, production: bool) -> Option<&EndpointSection> {
        if production {
            self.production.as_ref()
        } else {
            self.test.as_ref()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_flags_override_defaults() {
        let config = Config::resolve(
            "tok".to_string(),
            true,
            Some("https://meta.example.org".to_string()),
            None,
        )
        .unwrap();
        assert_eq!(config.meta_url, "https://meta.example.org");
        assert!(!config.dry_run());
    }

    #[test]
    fn test_test_environment_is_dry_run() {
        let config = Config::resolve("tok".to_string(), false, None, None).unwrap();
        assert!(config.dry_run());
        assert!(config.meta_url.contains("test"));
        assert!(config.submit_url.contains("test"));
    }

    #[test]
    fn test_config_file_section_selection() {
        let file = ConfigFile {
            production: Some(EndpointSection {
                meta_url: Some("https://prod".to_string()),
                submit_url: None,
            }),
            test: Some(EndpointSection {
                meta_url: Some("https://test".to_string()),
                submit_url: None,
            }),
        };
        assert_eq!(
            file.section(true).and_then(|s| s.meta_url.as_deref()),
            Some("https://prod")
        );
        assert_eq!(
            file.section(false).and_then(|s| s.meta_url.as_deref()),
            Some("https://test")
        );
    }
}

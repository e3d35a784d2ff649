//! Provider metadata on disk.
//!
//! Two layouts are supported:
//!
//! - a provider directory with one `<provider>.json` file per provider,
//!   read lazily through [`ProviderDirectory`] by the local resolver;
//! - provider database files, each holding a JSON array of providers,
//!   loaded up front by [`load_database`] for the database resolver.

use anyhow::Context;
use evlens_core::resolver::{ProviderDatabase, ProviderMetadata};
use evlens_core::source::MetadataSource;
use std::path::{Path, PathBuf};

/// Looks providers up in a directory of `<provider>.json` files.
#[derive(Debug, Clone)]
pub struct ProviderDirectory {
    dir: PathBuf,
}

impl ProviderDirectory {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn candidates(&self, provider: &str) -> [PathBuf; 2] {
        [
            self.dir.join(format!("{provider}.json")),
            self.dir.join(format!("{}.json", provider.to_ascii_lowercase())),
        ]
    }
}

impl MetadataSource for ProviderDirectory {
    fn lookup(&self, provider_name: &str) -> Option<ProviderMetadata> {
        // Provider names end up in a path; refuse anything that could leave
        // the directory.
        if provider_name.is_empty()
            || provider_name.contains(['/', '\\'])
            || provider_name.contains("..")
        {
            return None;
        }

        let path = self.candidates(provider_name).into_iter().find(|p| p.is_file())?;
        match read_provider(&path) {
            Ok(mut provider) => {
                if provider.name.is_empty() {
                    provider.name = provider_name.to_string();
                }
                Some(provider)
            }
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "unreadable provider file");
                None
            }
        }
    }
}

fn read_provider(path: &Path) -> anyhow::Result<ProviderMetadata> {
    let text = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&text)?)
}

/// Load every provider from `paths` into one database. On duplicate
/// provider names the earlier file wins.
pub fn load_database(paths: &[PathBuf]) -> anyhow::Result<ProviderDatabase> {
    let mut providers = Vec::new();
    for path in paths {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading provider database {}", path.display()))?;
        let mut batch: Vec<ProviderMetadata> = serde_json::from_str(&text)
            .with_context(|| format!("parsing provider database {}", path.display()))?;
        tracing::debug!(path = %path.display(), providers = batch.len(), "provider database loaded");
        providers.append(&mut batch);
    }
    Ok(ProviderDatabase::from_providers(providers))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    const SECURITY: &str = r#"{
        "name": "Security",
        "events": [{ "id": 4624, "template": "Logon by %1" }],
        "keywords": { "16": "Logon" },
        "tasks": { "12544": "Logon" }
    }"#;

    #[test]
    fn directory_lookup_reads_provider_file() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("Security.json"), SECURITY).unwrap();
        let catalog = ProviderDirectory::new(dir.path());

        let provider = catalog.lookup("Security").unwrap();
        assert_eq!(provider.events.len(), 1);
        assert_eq!(provider.tasks.get(&12544).map(String::as_str), Some("Logon"));
        assert!(catalog.lookup("Missing").is_none());
    }

    #[rstest]
    #[case("")]
    #[case("../Security")]
    #[case("sub/Security")]
    #[case("sub\\Security")]
    fn unsafe_names_are_refused(#[case] name: &str) {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("Security.json"), SECURITY).unwrap();
        assert!(ProviderDirectory::new(dir.path()).lookup(name).is_none());
    }

    #[test]
    fn broken_provider_file_is_a_miss() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("Bad.json"), "{").unwrap();
        assert!(ProviderDirectory::new(dir.path()).lookup("Bad").is_none());
    }

    #[test]
    fn database_merges_files_first_wins() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a.json");
        let b = dir.path().join("b.json");
        std::fs::write(&a, format!("[{SECURITY}]")).unwrap();
        std::fs::write(&b, r#"[{ "name": "security" }, { "name": "Kernel" }]"#).unwrap();

        let db = load_database(&[a, b]).unwrap();
        assert_eq!(db.len(), 2);
        assert_eq!(db.get("SECURITY").unwrap().events.len(), 1);
    }

    #[test]
    fn missing_database_file_is_an_error() {
        let err = load_database(&[PathBuf::from("/nonexistent/evlens.json")]).unwrap_err();
        assert!(err.to_string().contains("reading provider database"));
    }
}

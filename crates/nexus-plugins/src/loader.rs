//! Plugin discovery and instantiation.
//!
//! Plugins live in directories carrying a `plugin.toml` manifest. Native
//! plugins are dynamic libraries exporting the well-known factory symbol;
//! built-in plugins register a factory in-process.

use crate::plugin::{Plugin, PLUGIN_ENTRY_SYMBOL};
use nexus_core::error::{Error, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use walkdir::WalkDir;

/// Manifest file name looked for in plugin directories
pub const MANIFEST_FILENAME: &str = "plugin.toml";
/// Directory scan depth
const MAX_SCAN_DEPTH: usize = 2;

/// Parsed `plugin.toml`
#[derive(Debug, Clone, Deserialize)]
pub struct PluginManifest {
    pub plugin: ManifestInfo,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ManifestInfo {
    pub id: String,
    pub name: String,
    pub version: String,
    /// Library file (relative to the plugin directory) for native plugins;
    /// absent for built-ins resolved from the factory registry
    #[serde(default)]
    pub entry: Option<String>,
    #[serde(default)]
    pub isolation: Option<String>,
    #[serde(default)]
    pub description: String,
}

impl PluginManifest {
    pub fn parse(content: &str) -> Result<Self> {
        let manifest: Self = toml::from_str(content)
            .map_err(|e| Error::validation(format!("invalid plugin manifest: {e}")))?;
        semver::Version::parse(&manifest.plugin.version).map_err(|e| {
            Error::validation(format!(
                "invalid plugin version '{}': {e}",
                manifest.plugin.version
            ))
        })?;
        Ok(manifest)
    }
}

/// A plugin directory found during a scan
#[derive(Debug, Clone)]
pub struct DiscoveredPlugin {
    pub manifest: PluginManifest,
    pub path: PathBuf,
}

/// Scan a directory tree for plugin manifests
pub fn discover(dir: &Path) -> Result<Vec<DiscoveredPlugin>> {
    let mut discovered = Vec::new();
    if !dir.exists() {
        return Ok(discovered);
    }

    for entry in WalkDir::new(dir)
        .max_depth(MAX_SCAN_DEPTH)
        .follow_links(true)
        .into_iter()
        .filter_map(|e| e.ok())
    {
        if entry.file_type().is_file() && entry.file_name() == MANIFEST_FILENAME {
            let content = std::fs::read_to_string(entry.path()).map_err(|e| {
                Error::validation(format!("cannot read {}: {e}", entry.path().display()))
            })?;
            match PluginManifest::parse(&content) {
                Ok(manifest) => {
                    let path = entry
                        .path()
                        .parent()
                        .unwrap_or(dir)
                        .to_path_buf();
                    discovered.push(DiscoveredPlugin { manifest, path });
                }
                Err(e) => {
                    tracing::warn!(path = %entry.path().display(), error = %e,
                        "Skipping plugin with invalid manifest");
                }
            }
        }
    }

    tracing::info!(count = discovered.len(), dir = %dir.display(), "Discovered plugins");
    Ok(discovered)
}

/// A plugin instance together with whatever keeps its code alive.
///
/// Field order matters: the plugin must drop before the library that
/// contains its code.
pub struct PluginInstance {
    pub plugin: Arc<dyn Plugin>,
    _library: Option<libloading::Library>,
}

impl PluginInstance {
    pub fn from_builtin(plugin: Box<dyn Plugin>) -> Self {
        Self {
            plugin: Arc::from(plugin),
            _library: None,
        }
    }

    /// Load a native plugin library and call its factory symbol
    pub fn from_native(library_path: &Path) -> Result<Self> {
        if !library_path.exists() {
            return Err(Error::validation(format!(
                "plugin library not found: {}",
                library_path.display()
            )));
        }

        // SAFETY: loading a plugin library runs its initializers; plugins
        // are trusted to the extent the deployment trusts their source.
        // The factory symbol contract is part of the plugin ABI.
        let (plugin, library) = unsafe {
            let library = libloading::Library::new(library_path).map_err(|e| {
                Error::validation(format!(
                    "cannot load {}: {e}",
                    library_path.display()
                ))
            })?;
            let constructor: libloading::Symbol<fn() -> Box<dyn Plugin>> =
                library.get(PLUGIN_ENTRY_SYMBOL).map_err(|e| {
                    Error::validation(format!(
                        "{} does not export the plugin entry symbol: {e}",
                        library_path.display()
                    ))
                })?;
            let plugin: Arc<dyn Plugin> = Arc::from(constructor());
            drop(constructor);
            (plugin, library)
        };

        Ok(Self {
            plugin,
            _library: Some(library),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_manifest_parse() {
        let manifest = PluginManifest::parse(
            r#"
[plugin]
id = "demo"
name = "Demo Plugin"
version = "1.2.0"
entry = "libdemo.so"
isolation = "thread"
description = "A demo"
"#,
        )
        .unwrap();
        assert_eq!(manifest.plugin.id, "demo");
        assert_eq!(manifest.plugin.entry.as_deref(), Some("libdemo.so"));
    }

    #[test]
    fn test_manifest_rejects_bad_version() {
        let result = PluginManifest::parse(
            r#"
[plugin]
id = "demo"
name = "Demo"
version = "not-semver"
"#,
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_discover_scans_directories() {
        let dir = tempfile::tempdir().unwrap();
        let plugin_dir = dir.path().join("demo-plugin");
        std::fs::create_dir_all(&plugin_dir).unwrap();
        let mut file = std::fs::File::create(plugin_dir.join(MANIFEST_FILENAME)).unwrap();
        writeln!(
            file,
            "[plugin]\nid = \"demo\"\nname = \"Demo\"\nversion = \"0.1.0\"\n"
        )
        .unwrap();

        // A directory with a broken manifest is skipped, not fatal
        let broken_dir = dir.path().join("broken-plugin");
        std::fs::create_dir_all(&broken_dir).unwrap();
        std::fs::write(broken_dir.join(MANIFEST_FILENAME), "not toml [").unwrap();

        let found = discover(dir.path()).unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].manifest.plugin.id, "demo");
        assert_eq!(found[0].path, plugin_dir);
    }

    #[test]
    fn test_discover_missing_directory_is_empty() {
        let found = discover(Path::new("/nonexistent/plugins")).unwrap();
        assert!(found.is_empty());
    }

    #[test]
    fn test_native_load_missing_library() {
        assert!(PluginInstance::from_native(Path::new("/nonexistent/libx.so")).is_err());
    }
}

//! Layered configuration service.
//!
//! Pipeline: schema defaults, then the config file (YAML or JSON by
//! extension), then environment variables, then full validation. Reads are
//! copy-on-write snapshots; mutation validates against the schema and
//! swaps the tree only on success.

use crate::schema::ConfigSchema;
use async_trait::async_trait;
use nexus_core::error::{Error, Result};
use nexus_core::manager::{Manager, ManagerState, ManagerStatus};
use parking_lot::{Mutex, RwLock};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

/// Default environment variable prefix
pub const DEFAULT_ENV_PREFIX: &str = "NEXUS_";

/// Callback invoked with the changed key and its new value
pub type ConfigListener = Arc<dyn Fn(&str, &Value) + Send + Sync>;

/// Handle returned from `register_listener`, used to unregister
pub type ListenerId = u64;

struct ListenerEntry {
    id: ListenerId,
    prefix: String,
    callback: ConfigListener,
}

static NULL: Value = Value::Null;

/// Layered configuration manager
pub struct ConfigService {
    state: ManagerState,
    path: Option<PathBuf>,
    env_prefix: String,
    tree: RwLock<Arc<Value>>,
    /// Serializes validate-and-swap mutations
    mutation: Mutex<()>,
    listeners: Mutex<Vec<ListenerEntry>>,
    next_listener_id: AtomicU64,
    loaded_from_file: AtomicBool,
    env_vars_applied: AtomicUsize,
}

impl ConfigService {
    pub fn new(path: Option<PathBuf>) -> Self {
        Self::with_env_prefix(path, DEFAULT_ENV_PREFIX)
    }

    pub fn with_env_prefix(path: Option<PathBuf>, env_prefix: impl Into<String>) -> Self {
        Self {
            state: ManagerState::new("config_manager"),
            path,
            env_prefix: env_prefix.into(),
            tree: RwLock::new(Arc::new(Value::Null)),
            mutation: Mutex::new(()),
            listeners: Mutex::new(Vec::new()),
            next_listener_id: AtomicU64::new(1),
            loaded_from_file: AtomicBool::new(false),
            env_vars_applied: AtomicUsize::new(0),
        }
    }

    /// A snapshot of the whole configuration tree
    pub fn snapshot(&self) -> Arc<Value> {
        self.tree.read().clone()
    }

    /// Get a configuration value by dotted path
    pub fn get(&self, key: &str) -> Option<Value> {
        let tree = self.tree.read().clone();
        let mut node: &Value = &tree;
        for part in key.split('.') {
            node = node.get(part)?;
        }
        Some(node.clone())
    }

    /// Get a configuration value, falling back to a default
    pub fn get_or(&self, key: &str, default: Value) -> Value {
        self.get(key).unwrap_or(default)
    }

    /// Deserialize a section (or any subtree) into a typed value.
    ///
    /// A missing subtree yields the type's defaults.
    pub fn section<T: DeserializeOwned + Default>(&self, key: &str) -> Result<T> {
        match self.get(key) {
            Some(value) => serde_json::from_value(value).map_err(|e| {
                Error::configuration_key(format!("invalid section: {e}"), key.to_string())
            }),
            None => Ok(T::default()),
        }
    }

    /// Set a configuration value by dotted path.
    ///
    /// The new tree is validated before it becomes visible; on failure the
    /// previous tree stays in place and the error is returned.
    pub fn set(&self, key: &str, value: Value) -> Result<()> {
        if !self.state.initialized() {
            return Err(Error::configuration_key(
                "cannot modify configuration before initialization",
                key.to_string(),
            ));
        }

        let _guard = self.mutation.lock();
        let mut new_tree = (**self.tree.read()).clone();
        let parts: Vec<&str> = key.split('.').collect();
        set_nested(&mut new_tree, &parts, value.clone());
        validate_tree(&new_tree)?;
        *self.tree.write() = Arc::new(new_tree);
        drop(_guard);

        self.notify_listeners(key, &value);
        if self.loaded_from_file.load(Ordering::SeqCst) {
            if let Err(e) = self.save() {
                tracing::warn!(error = %e, "Failed to persist configuration change");
            }
        }
        Ok(())
    }

    /// Register a change listener for a key prefix.
    ///
    /// The callback fires for a change at exactly `prefix` or at any key
    /// below it (`prefix.<rest>`); the empty prefix matches every key.
    /// Registering the same callback for the same prefix twice keeps a
    /// single registration.
    pub fn register_listener(&self, prefix: &str, callback: ConfigListener) -> ListenerId {
        let mut listeners = self.listeners.lock();
        if let Some(existing) = listeners
            .iter()
            .find(|l| l.prefix == prefix && Arc::ptr_eq(&l.callback, &callback))
        {
            return existing.id;
        }
        let id = self.next_listener_id.fetch_add(1, Ordering::SeqCst);
        listeners.push(ListenerEntry {
            id,
            prefix: prefix.to_string(),
            callback,
        });
        id
    }

    /// Remove a previously registered listener
    pub fn unregister_listener(&self, id: ListenerId) -> bool {
        let mut listeners = self.listeners.lock();
        let before = listeners.len();
        listeners.retain(|l| l.id != id);
        listeners.len() != before
    }

    fn notify_listeners(&self, key: &str, value: &Value) {
        // Snapshot so a callback may (un)register listeners
        let entries: Vec<(String, ConfigListener)> = {
            let listeners = self.listeners.lock();
            listeners
                .iter()
                .filter(|l| {
                    l.prefix.is_empty()
                        || key == l.prefix
                        || key.starts_with(&format!("{}.", l.prefix))
                })
                .map(|l| (l.prefix.clone(), l.callback.clone()))
                .collect()
        };
        for (prefix, callback) in entries {
            let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                callback(key, value)
            }));
            if result.is_err() {
                tracing::error!(listener_prefix = %prefix, changed_key = %key,
                    "Configuration listener panicked");
            }
        }
    }

    /// Persist the active tree back to the originating file
    pub fn save(&self) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let tree = self.tree.read().clone();
        let rendered = match extension(path).as_deref() {
            Some("yaml") | Some("yml") => serde_yaml::to_string(&*tree)
                .map_err(|e| Error::configuration(format!("cannot render YAML: {e}")))?,
            Some("json") => serde_json::to_string_pretty(&*tree)
                .map_err(|e| Error::configuration(format!("cannot render JSON: {e}")))?,
            _ => return Ok(()),
        };
        std::fs::write(path, rendered).map_err(|e| {
            Error::configuration(format!("cannot write {}: {e}", path.display()))
        })
    }

    fn load_file(&self, path: &Path) -> Result<Option<Value>> {
        if !path.exists() {
            return Ok(None);
        }
        let format = match extension(path).as_deref() {
            Some("yaml") | Some("yml") => config::FileFormat::Yaml,
            Some("json") => config::FileFormat::Json,
            other => {
                return Err(Error::configuration_key(
                    format!("unsupported config file format: {:?}", other.unwrap_or("")),
                    "config_path",
                ))
            }
        };
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::configuration(format!("cannot read {}: {e}", path.display()))
        })?;
        if content.trim().is_empty() {
            return Ok(None);
        }
        let loaded = config::Config::builder()
            .add_source(config::File::from_str(&content, format))
            .build()
            .map_err(|e| {
                Error::configuration(format!("error parsing {}: {e}", path.display()))
            })?;
        let value: Value = loaded.try_deserialize().map_err(|e| {
            Error::configuration(format!("error parsing {}: {e}", path.display()))
        })?;
        Ok(Some(value))
    }

    fn apply_env_vars(&self, tree: &mut Value) {
        let prefix_upper = self.env_prefix.to_uppercase();
        let mut applied = 0;
        let mut vars: Vec<(String, String)> = std::env::vars()
            .filter(|(name, _)| name.to_uppercase().starts_with(&prefix_upper))
            .collect();
        vars.sort();
        for (name, raw) in vars {
            let rest = &name[self.env_prefix.len()..];
            let tokens: Vec<String> = rest.to_lowercase().split('_').map(String::from).collect();
            if tokens.is_empty() || tokens.iter().any(|t| t.is_empty()) {
                continue;
            }
            let path = resolve_env_path(tree, &tokens);
            let parts: Vec<&str> = path.iter().map(String::as_str).collect();
            set_nested(tree, &parts, parse_env_value(&raw));
            applied += 1;
        }
        self.env_vars_applied.store(applied, Ordering::SeqCst);
    }
}

fn extension(path: &Path) -> Option<String> {
    path.extension().map(|e| e.to_string_lossy().to_lowercase())
}

/// Parse an environment variable value into a typed JSON value
pub fn parse_env_value(value: &str) -> Value {
    let lower = value.to_lowercase();
    if matches!(lower.as_str(), "true" | "yes" | "1" | "on") {
        return Value::Bool(true);
    }
    if matches!(lower.as_str(), "false" | "no" | "0" | "off") {
        return Value::Bool(false);
    }
    if let Ok(int) = value.parse::<i64>() {
        return Value::from(int);
    }
    if let Ok(float) = value.parse::<f64>() {
        if let Some(number) = serde_json::Number::from_f64(float) {
            return Value::Number(number);
        }
    }
    Value::String(value.to_string())
}

/// Resolve underscore-delimited env tokens into a dotted path.
///
/// The split-on-underscore rule conflates section and key underscores
/// (`thread_pool` vs `worker_threads`), so tokens are matched greedily
/// against the existing tree: at each map level the longest token run that
/// names an existing key is consumed. Tokens with no match fall back to
/// one-token-per-segment.
fn resolve_env_path(tree: &Value, tokens: &[String]) -> Vec<String> {
    let mut path = Vec::new();
    let mut node: &Value = tree;
    let mut i = 0;
    while i < tokens.len() {
        let mut matched: Option<(String, usize)> = None;
        if let Value::Object(map) = node {
            for j in ((i + 1)..=tokens.len()).rev() {
                let candidate = tokens[i..j].join("_");
                if map.contains_key(&candidate) {
                    matched = Some((candidate, j));
                    break;
                }
            }
        }
        match matched {
            Some((key, j)) => {
                node = node.get(&key).unwrap_or(&NULL);
                path.push(key);
                i = j;
            }
            None => {
                path.push(tokens[i].clone());
                node = &NULL;
                i += 1;
            }
        }
    }
    path
}

/// Set a value at a path, creating intermediate objects as needed
fn set_nested(tree: &mut Value, path: &[&str], value: Value) {
    let Some((first, rest)) = path.split_first() else {
        return;
    };
    if !tree.is_object() {
        *tree = Value::Object(serde_json::Map::new());
    }
    let map = tree.as_object_mut().unwrap();
    if rest.is_empty() {
        map.insert((*first).to_string(), value);
        return;
    }
    let child = map
        .entry((*first).to_string())
        .or_insert_with(|| Value::Object(serde_json::Map::new()));
    set_nested(child, rest, value);
}

/// Deep merge: maps recurse, scalars and lists replace.
///
/// Null, empty-string, and empty-map overlay values do not clobber the
/// values already in the target.
fn merge_into(target: &mut Value, overlay: &Value) {
    let Value::Object(overlay_map) = overlay else {
        return;
    };
    if !target.is_object() {
        *target = Value::Object(serde_json::Map::new());
    }
    let target_map = target.as_object_mut().unwrap();
    for (key, value) in overlay_map {
        match value {
            Value::Null => {}
            Value::String(s) if s.is_empty() => {}
            Value::Object(map) => {
                if map.is_empty() {
                    continue;
                }
                let slot = target_map
                    .entry(key.clone())
                    .or_insert_with(|| Value::Object(serde_json::Map::new()));
                if slot.is_object() {
                    merge_into(slot, value);
                } else {
                    *slot = value.clone();
                }
            }
            other => {
                target_map.insert(key.clone(), other.clone());
            }
        }
    }
}

fn validate_tree(tree: &Value) -> Result<()> {
    let schema: ConfigSchema = serde_json::from_value(tree.clone())
        .map_err(|e| Error::configuration(format!("invalid configuration: {e}")))?;
    schema.validate()
}

#[async_trait]
impl Manager for ConfigService {
    fn name(&self) -> &str {
        self.state.name()
    }

    async fn initialize(&self) -> Result<()> {
        let mut tree = serde_json::to_value(ConfigSchema::default())
            .map_err(|e| Error::configuration(format!("cannot build defaults: {e}")))?;

        if let Some(path) = &self.path {
            if let Some(file_tree) = self.load_file(path)? {
                merge_into(&mut tree, &file_tree);
                self.loaded_from_file.store(true, Ordering::SeqCst);
            }
        }

        self.apply_env_vars(&mut tree);
        validate_tree(&tree)?;

        *self.tree.write() = Arc::new(tree);
        self.state.set_ready();
        tracing::info!(
            file = ?self.path,
            env_vars = self.env_vars_applied.load(Ordering::SeqCst),
            "Configuration loaded"
        );
        Ok(())
    }

    async fn shutdown(&self) -> Result<()> {
        if self.state.initialized() && self.loaded_from_file.load(Ordering::SeqCst) {
            if let Err(e) = self.save() {
                tracing::warn!(error = %e, "Failed to save configuration on shutdown");
            }
        }
        self.state.set_down();
        Ok(())
    }

    fn status(&self) -> ManagerStatus {
        self.state.status().with_details(serde_json::json!({
            "config_file": self.path.as_ref().map(|p| p.display().to_string()),
            "loaded_from_file": self.loaded_from_file.load(Ordering::SeqCst),
            "env_vars_applied": self.env_vars_applied.load(Ordering::SeqCst),
            "registered_listeners": self.listeners.lock().len(),
        }))
    }
}

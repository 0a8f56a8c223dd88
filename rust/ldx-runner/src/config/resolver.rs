//! Plugin configuration resolution.
//!
//! A run's configuration is built from three layers:
//!
//! 1. the global layer (`global.toml`), applied first to every section,
//! 2. the instance file, whose fields override the global ones section by
//!    section,
//! 3. named templates (`<name>.template.toml`) pulled in wherever a string
//!    value reads `"template::<name>"`.
//!
//! Templates are expanded in each layer before merging. Relative values of
//! path-like keys are anchored to the directory of the file that declared
//! them.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::error::ConfigError;
use super::source::read_table;
use crate::plugin::manifest::MANIFEST_SUFFIX;
use crate::scheduler::ScheduleSpec;

/// Prefix marking a template reference.
pub const TEMPLATE_PREFIX: &str = "template::";

/// Reserved section holding a job's trigger.
pub const SCHEDULE_SECTION: &str = "schedule";

const GLOBAL_FILE: &str = "global.toml";
const TEMPLATE_SUFFIX: &str = ".template.toml";

/// Final configuration of one run: section key to section contents.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResolvedConfig(Map<String, Value>);

impl ResolvedConfig {
    /// Wrap an already-resolved section map.
    #[must_use]
    pub fn new(sections: Map<String, Value>) -> Self {
        Self(sections)
    }

    /// Build from a JSON value, which must be an object.
    pub fn from_value(value: Value) -> Result<Self, ConfigError> {
        match value {
            Value::Object(sections) => Ok(Self(sections)),
            other => Err(ConfigError::InvalidSection {
                key: "<root>".to_string(),
                reason: format!("configuration must be a table, got {other}"),
            }),
        }
    }

    /// Look up one section.
    #[must_use]
    pub fn section(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// Sections in declaration order.
    pub fn sections(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.0.iter().map(|(key, value)| (key.as_str(), value))
    }

    /// Number of sections.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether there are no sections.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Remove the `schedule` section and parse it.
    ///
    /// Returns `Ok(None)` when the configuration has no schedule.
    pub fn take_schedule(&mut self) -> Result<Option<ScheduleSpec>, ConfigError> {
        self.0
            .shift_remove(SCHEDULE_SECTION)
            .map(|section| ScheduleSpec::from_section(&section))
            .transpose()
    }

    /// Underlying section map.
    #[must_use]
    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    /// Consume into the section map.
    #[must_use]
    pub fn into_inner(self) -> Map<String, Value> {
        self.0
    }
}

impl From<Map<String, Value>> for ResolvedConfig {
    fn from(sections: Map<String, Value>) -> Self {
        Self(sections)
    }
}

/// Merges global settings, instance settings and templates.
#[derive(Debug, Clone, Default)]
pub struct ConfigResolver {
    global: Map<String, Value>,
    templates: HashMap<String, Value>,
    config_dir: Option<PathBuf>,
}

impl ConfigResolver {
    /// Create a resolver with no global layer and no templates.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the global layer.
    #[must_use]
    pub fn with_global(mut self, global: Map<String, Value>) -> Self {
        self.global = global;
        self
    }

    /// Add a named template.
    #[must_use]
    pub fn with_template(mut self, name: impl Into<String>, template: Value) -> Self {
        self.templates.insert(name.into(), template);
        self
    }

    /// Load the global layer and templates from a config directory.
    ///
    /// A missing directory or missing `global.toml` yields empty layers.
    pub fn from_dir(dir: &Path) -> Result<Self, ConfigError> {
        let mut resolver = Self {
            config_dir: Some(dir.to_path_buf()),
            ..Self::default()
        };

        let global_path = dir.join(GLOBAL_FILE);
        if global_path.is_file() {
            let mut global = read_table(&global_path)?;
            anchor_paths(&mut global, dir);
            resolver.global = global;
        }

        for path in list_dir(dir)? {
            let Some(name) = file_name(&path).and_then(|n| n.strip_suffix(TEMPLATE_SUFFIX)) else {
                continue;
            };
            let template = read_table(&path)?;
            tracing::debug!(template = %name, "Loaded config template");
            resolver
                .templates
                .insert(name.to_string(), Value::Object(template));
        }

        Ok(resolver)
    }

    /// Directory relative instance names resolve against.
    #[must_use]
    pub fn config_dir(&self) -> Option<&Path> {
        self.config_dir.as_deref()
    }

    /// Loaded template names, sorted.
    #[must_use]
    pub fn template_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.templates.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Instance config files in the config directory, sorted.
    ///
    /// Skips `global.toml`, templates and plugin manifests.
    pub fn instance_files(&self) -> Result<Vec<PathBuf>, ConfigError> {
        let Some(dir) = self.config_dir.as_deref() else {
            return Ok(Vec::new());
        };
        Ok(list_dir(dir)?
            .into_iter()
            .filter(|path| {
                file_name(path).is_some_and(|name| {
                    name.ends_with(".toml")
                        && name != GLOBAL_FILE
                        && !name.ends_with(TEMPLATE_SUFFIX)
                        && !name.ends_with(MANIFEST_SUFFIX)
                })
            })
            .collect())
    }

    /// Resolve an instance configuration.
    ///
    /// Relative path values are anchored to `base_dir` when given.
    pub fn resolve(
        &self,
        instance: Map<String, Value>,
        base_dir: Option<&Path>,
    ) -> Result<ResolvedConfig, ConfigError> {
        let global = self.expand_map(self.global.clone())?;
        let mut instance = self.expand_map(instance)?;
        if let Some(base) = base_dir {
            anchor_paths(&mut instance, base);
        }
        Ok(ResolvedConfig(merge(global, instance)))
    }

    /// Load and resolve an instance file.
    ///
    /// Relative `path` is looked up in the config directory.
    pub fn resolve_file(&self, path: &Path) -> Result<ResolvedConfig, ConfigError> {
        let path = match &self.config_dir {
            Some(dir) if path.is_relative() => dir.join(path),
            _ => path.to_path_buf(),
        };
        let instance = read_table(&path)?;
        self.resolve(instance, path.parent())
    }

    fn expand_map(&self, sections: Map<String, Value>) -> Result<Map<String, Value>, ConfigError> {
        let mut stack = Vec::new();
        sections
            .into_iter()
            .map(|(key, value)| Ok((key, self.expand(value, &mut stack)?)))
            .collect()
    }

    fn expand(&self, value: Value, stack: &mut Vec<String>) -> Result<Value, ConfigError> {
        match value {
            Value::String(s) => match s.strip_prefix(TEMPLATE_PREFIX) {
                Some(name) => self.expand_template(name.trim(), stack),
                None => Ok(Value::String(s)),
            },
            Value::Object(fields) => fields
                .into_iter()
                .map(|(key, value)| Ok((key, self.expand(value, stack)?)))
                .collect::<Result<Map<_, _>, _>>()
                .map(Value::Object),
            Value::Array(items) => items
                .into_iter()
                .map(|item| self.expand(item, stack))
                .collect::<Result<Vec<_>, _>>()
                .map(Value::Array),
            other => Ok(other),
        }
    }

    fn expand_template(&self, name: &str, stack: &mut Vec<String>) -> Result<Value, ConfigError> {
        let template = self
            .templates
            .get(name)
            .ok_or_else(|| ConfigError::MissingTemplate {
                name: name.to_string(),
            })?;
        if stack.iter().any(|seen| seen == name) {
            return Err(ConfigError::TemplateCycle {
                name: name.to_string(),
            });
        }

        stack.push(name.to_string());
        let expanded = self.expand(template.clone(), stack);
        stack.pop();
        expanded
    }
}

/// Field-level merge: instance fields override global ones within a section.
fn merge(global: Map<String, Value>, instance: Map<String, Value>) -> Map<String, Value> {
    let mut merged = global;
    for (key, value) in instance {
        match value {
            Value::Object(fields) => match merged.get_mut(&key) {
                Some(Value::Object(base)) => base.extend(fields),
                _ => {
                    merged.insert(key, Value::Object(fields));
                }
            },
            other => {
                merged.insert(key, other);
            }
        }
    }
    merged
}

/// Whether a key holds a filesystem path.
fn is_path_key(key: &str) -> bool {
    matches!(key, "path" | "dir" | "file")
        || key.ends_with("_path")
        || key.ends_with("_dir")
        || key.ends_with("_file")
}

fn anchor_paths(fields: &mut Map<String, Value>, base: &Path) {
    for (key, value) in fields.iter_mut() {
        match value {
            Value::String(s) if is_path_key(key) && !s.is_empty() && Path::new(s).is_relative() => {
                *s = base.join(&*s).to_string_lossy().into_owned();
            }
            Value::Object(nested) => anchor_paths(nested, base),
            Value::Array(items) => {
                for item in items {
                    if let Value::Object(nested) = item {
                        anchor_paths(nested, base);
                    }
                }
            }
            _ => {}
        }
    }
}

fn file_name(path: &Path) -> Option<&str> {
    path.file_name().and_then(|name| name.to_str())
}

fn list_dir(dir: &Path) -> Result<Vec<PathBuf>, ConfigError> {
    if !dir.is_dir() {
        return Ok(Vec::new());
    }
    let entries = std::fs::read_dir(dir).map_err(|e| ConfigError::UnresolvablePath {
        path: dir.to_path_buf(),
        reason: e.to_string(),
    })?;
    let mut paths: Vec<PathBuf> = entries
        .filter_map(Result::ok)
        .map(|entry| entry.path())
        .filter(|path| path.is_file())
        .collect();
    paths.sort();
    Ok(paths)
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn object(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => panic!("expected object"),
        }
    }

    #[test]
    fn test_template_replaces_section() {
        let resolver = ConfigResolver::new().with_template("x", json!({ "a": 1, "b": 2 }));
        let resolved = resolver
            .resolve(object(json!({ "p1": "template::x" })), None)
            .unwrap();
        assert_eq!(resolved.section("p1"), Some(&json!({ "a": 1, "b": 2 })));
    }

    #[test]
    fn test_template_nested_value() {
        let resolver = ConfigResolver::new().with_template("game", json!({ "pkg": "com.example" }));
        let resolved = resolver
            .resolve(
                object(json!({ "ld": { "name": "emu", "app": "template::game" } })),
                None,
            )
            .unwrap();
        assert_eq!(resolved.section("ld").unwrap()["app"]["pkg"], "com.example");
    }

    #[test]
    fn test_missing_template() {
        let resolver = ConfigResolver::new();
        let err = resolver
            .resolve(object(json!({ "p1": "template::nope" })), None)
            .unwrap_err();
        assert!(matches!(err, ConfigError::MissingTemplate { name } if name == "nope"));
    }

    #[test]
    fn test_template_cycle() {
        let resolver = ConfigResolver::new()
            .with_template("a", json!({ "next": "template::b" }))
            .with_template("b", json!({ "next": "template::a" }));
        let err = resolver
            .resolve(object(json!({ "p1": "template::a" })), None)
            .unwrap_err();
        assert!(matches!(err, ConfigError::TemplateCycle { .. }));
    }

    #[test]
    fn test_instance_overrides_global_fields() {
        let resolver = ConfigResolver::new().with_global(object(json!({
            "ld": { "close": true, "name": "global" },
            "lifetime": { "lifetime": 60 }
        })));
        let resolved = resolver
            .resolve(object(json!({ "ld": { "name": "local" }, "os": { "cmd": "true" } })), None)
            .unwrap();

        assert_eq!(
            resolved.section("ld"),
            Some(&json!({ "close": true, "name": "local" }))
        );
        let keys: Vec<&str> = resolved.sections().map(|(key, _)| key).collect();
        assert_eq!(keys, vec!["ld", "lifetime", "os"]);
    }

    #[test]
    fn test_relative_paths_anchor_to_base_dir() {
        let resolver = ConfigResolver::new();
        let resolved = resolver
            .resolve(
                object(json!({
                    "os": { "cmd": "run.sh", "work_dir": "data", "log_file": "/var/log/x.log" }
                })),
                Some(Path::new("/jobs")),
            )
            .unwrap();
        let os = resolved.section("os").unwrap();
        assert_eq!(os["cmd"], "run.sh");
        assert_eq!(Path::new(os["work_dir"].as_str().unwrap()), Path::new("/jobs/data"));
        assert_eq!(os["log_file"], "/var/log/x.log");
    }

    #[test]
    fn test_from_dir_and_resolve_file() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("global.toml"), "[os]\nshell = \"sh\"\n").unwrap();
        std::fs::write(
            dir.path().join("tool.template.toml"),
            "cmd = \"echo hi\"\n",
        )
        .unwrap();
        std::fs::write(
            dir.path().join("job.toml"),
            "os = \"template::tool\"\n\n[lifetime]\nlifetime = 5\n",
        )
        .unwrap();

        let resolver = ConfigResolver::from_dir(dir.path()).unwrap();
        assert_eq!(resolver.template_names(), vec!["tool"]);
        assert_eq!(resolver.instance_files().unwrap(), vec![dir.path().join("job.toml")]);

        let resolved = resolver.resolve_file(Path::new("job.toml")).unwrap();
        assert_eq!(
            resolved.section("os"),
            Some(&json!({ "shell": "sh", "cmd": "echo hi" }))
        );
        assert_eq!(resolved.section("lifetime").unwrap()["lifetime"], 5);
    }

    #[test]
    fn test_resolve_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let resolver = ConfigResolver::from_dir(dir.path()).unwrap();
        assert!(matches!(
            resolver.resolve_file(Path::new("absent.toml")),
            Err(ConfigError::UnresolvablePath { .. })
        ));
    }

    #[test]
    fn test_take_schedule() {
        let mut config = ResolvedConfig::from_value(json!({
            "os": { "cmd": "true" },
            "schedule": { "trigger": "interval", "seconds": 30 }
        }))
        .unwrap();
        let schedule = config.take_schedule().unwrap().unwrap();
        assert_eq!(schedule.signature(), "interval:30");
        assert!(config.section(SCHEDULE_SECTION).is_none());
        assert_eq!(config.len(), 1);
    }
}

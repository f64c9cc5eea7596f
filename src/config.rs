//! Configuration management for cmcp.
//!
//! This module defines the registry of launch specs persisted in the JSON config file
//! (`~/.cmcp/config.json` unless overridden) and provides functionality to load and save it.
//! Fields the tool does not understand are carried through untouched, both inside each
//! server entry and at the top level of the file. Saving keeps the key order of the file
//! it was loaded from.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::ConfigError;

/// Environment variable that overrides the config file location.
pub const CONFIG_PATH_ENV: &str = "CMCP_CONFIG_PATH";

const SERVERS_KEY: &str = "mcpServers";

/// How to eventually invoke one managed server.
///
/// The name is the registry key and is not stored here. Anything in `extra` is written
/// back verbatim; the known fields always take precedence over a stale duplicate in it.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(from = "Map<String, Value>", into = "Map<String, Value>")]
pub struct LaunchSpec {
    /// Executable handed to the external tool.
    pub command: String,
    /// Arguments passed verbatim after the command.
    pub args: Vec<String>,
    /// Environment variables for the server process.
    pub env: IndexMap<String, String>,
    /// Working directory.
    pub cwd: Option<String>,
    /// Fields outside the known schema.
    pub extra: Map<String, Value>,
    /// Key order of the entry as it was read.
    layout: Vec<String>,
}

impl PartialEq for LaunchSpec {
    fn eq(&self, other: &Self) -> bool {
        self.command == other.command
            && self.args == other.args
            && self.env == other.env
            && self.cwd == other.cwd
            && self.extra == other.extra
    }
}

impl LaunchSpec {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            ..Self::default()
        }
    }

    /// Builds the JSON object for this spec: extra fields first, then the known ones on
    /// top, arranged in the order the entry was read. Empty `args`, `env` and `cwd` are
    /// omitted.
    pub fn to_json_map(&self) -> Map<String, Value> {
        let mut map = self.extra.clone();
        map.insert("command".to_string(), Value::String(self.command.clone()));
        if !self.args.is_empty() {
            map.insert("args".to_string(), Value::from(self.args.clone()));
        }
        if !self.env.is_empty() {
            let env = self
                .env
                .iter()
                .map(|(key, value)| (key.clone(), Value::String(value.clone())))
                .collect();
            map.insert("env".to_string(), Value::Object(env));
        }
        if let Some(cwd) = self.cwd.as_deref().filter(|cwd| !cwd.is_empty()) {
            map.insert("cwd".to_string(), Value::String(cwd.to_string()));
        }
        arrange(map, &self.layout)
    }
}

impl From<Map<String, Value>> for LaunchSpec {
    // A known key whose value has the wrong shape stays in `extra` so nothing is lost.
    fn from(mut raw: Map<String, Value>) -> Self {
        let layout = raw.keys().cloned().collect();
        let command = take(&mut raw, "command", |v| v.as_str().map(str::to_string));
        let args = take(&mut raw, "args", |v| {
            v.as_array()?
                .iter()
                .map(|arg| arg.as_str().map(str::to_string))
                .collect::<Option<Vec<_>>>()
        });
        let env = take(&mut raw, "env", |v| {
            v.as_object()?
                .iter()
                .map(|(key, value)| Some((key.clone(), value.as_str()?.to_string())))
                .collect::<Option<IndexMap<_, _>>>()
        });
        let cwd = take(&mut raw, "cwd", |v| v.as_str().map(str::to_string));
        Self {
            command: command.unwrap_or_default(),
            args: args.unwrap_or_default(),
            env: env.unwrap_or_default(),
            cwd,
            extra: raw,
            layout,
        }
    }
}

impl From<LaunchSpec> for Map<String, Value> {
    fn from(spec: LaunchSpec) -> Self {
        spec.to_json_map()
    }
}

fn take<T>(
    raw: &mut Map<String, Value>,
    key: &str,
    convert: impl FnOnce(&Value) -> Option<T>,
) -> Option<T> {
    let value = raw.get(key).and_then(convert)?;
    raw.shift_remove(key);
    Some(value)
}

// Keys named in `layout` come first and in that order; anything new follows.
fn arrange(mut map: Map<String, Value>, layout: &[String]) -> Map<String, Value> {
    if layout.is_empty() {
        return map;
    }
    let mut arranged = Map::new();
    for key in layout {
        if let Some(value) = map.shift_remove(key.as_str()) {
            arranged.insert(key.clone(), value);
        }
    }
    arranged.extend(map);
    arranged
}

/// The full set of named launch specs, in file order.
#[derive(Debug, Clone, Default)]
pub struct Registry {
    pub servers: IndexMap<String, LaunchSpec>,
    /// Top-level keys other than `mcpServers`.
    pub extra: Map<String, Value>,
    layout: Vec<String>,
}

impl PartialEq for Registry {
    fn eq(&self, other: &Self) -> bool {
        self.servers == other.servers && self.extra == other.extra
    }
}

impl Registry {
    /// Parses the contents of a config file.
    pub fn from_json(path: &Path, raw: &str) -> Result<Self, ConfigError> {
        let parse_err = |source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        };
        let mut extra: Map<String, Value> = serde_json::from_str(raw).map_err(parse_err)?;
        let layout = extra.keys().cloned().collect();
        let servers = match extra.shift_remove(SERVERS_KEY) {
            None | Some(Value::Null) => Map::new(),
            Some(Value::Object(servers)) => servers,
            Some(_) => {
                return Err(ConfigError::InvalidShape {
                    path: path.to_path_buf(),
                })
            }
        };

        let mut registry = Registry {
            servers: IndexMap::new(),
            extra,
            layout,
        };
        for (name, value) in servers {
            if name.is_empty() {
                return Err(ConfigError::EmptyName);
            }
            let spec: LaunchSpec = serde_json::from_value(value).map_err(parse_err)?;
            registry.servers.insert(name, spec);
        }
        Ok(registry)
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        let mut root = self.extra.clone();
        let servers = self
            .servers
            .iter()
            .map(|(name, spec)| (name.clone(), Value::Object(spec.to_json_map())))
            .collect();
        root.insert(SERVERS_KEY.to_string(), Value::Object(servers));
        serde_json::to_string_pretty(&Value::Object(arrange(root, &self.layout)))
    }

    pub fn find(&self, name: &str) -> Option<&LaunchSpec> {
        self.servers.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.servers.contains_key(name)
    }

    /// Server names in registry order.
    pub fn names(&self) -> Vec<String> {
        self.servers.keys().cloned().collect()
    }

    pub fn is_empty(&self) -> bool {
        self.servers.is_empty()
    }

    pub fn len(&self) -> usize {
        self.servers.len()
    }

    pub fn add(&mut self, name: &str, spec: LaunchSpec) -> Result<(), ConfigError> {
        if name.is_empty() {
            return Err(ConfigError::EmptyName);
        }
        if self.servers.contains_key(name) {
            return Err(ConfigError::Duplicate(name.to_string()));
        }
        self.servers.insert(name.to_string(), spec);
        Ok(())
    }

    pub fn remove(&mut self, name: &str) -> Result<LaunchSpec, ConfigError> {
        self.servers
            .shift_remove(name)
            .ok_or_else(|| ConfigError::NotFound(name.to_string()))
    }
}

/// Location used when neither `--config` nor `CMCP_CONFIG_PATH` is given.
pub fn default_config_path() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(".cmcp").join("config.json"))
}

/// Loads the registry. A missing file yields an empty registry and nothing is written.
pub fn load(path: &Path) -> Result<Registry, ConfigError> {
    let raw = match fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Registry::default()),
        Err(source) => {
            return Err(ConfigError::Read {
                path: path.to_path_buf(),
                source,
            })
        }
    };
    Registry::from_json(path, &raw)
}

/// Writes the registry with 2-space indentation, creating the parent directory if needed.
///
/// The file is written next to its final location and renamed into place.
pub fn save(registry: &Registry, path: &Path) -> Result<(), ConfigError> {
    let write_err = |source| ConfigError::Write {
        path: path.to_path_buf(),
        source,
    };
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(write_err)?;
    }
    let mut serialized = registry
        .to_json()
        .map_err(|err| write_err(io::Error::new(io::ErrorKind::InvalidData, err)))?;
    serialized.push('\n');

    let mut staging = path.as_os_str().to_owned();
    staging.push(".tmp");
    let staging = PathBuf::from(staging);
    fs::write(&staging, serialized).map_err(write_err)?;
    fs::rename(&staging, path).map_err(write_err)?;
    Ok(())
}

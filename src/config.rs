use crate::error::{Error, Result};
use serde::Serialize;
use serde_json::{Map, Value};
use std::{
    collections::BTreeMap,
    fmt, fs, io,
    path::{Path, PathBuf},
};

pub const DEFAULT_CONFIG: &str = "config.yaml";

/// Parameter names the command task reads from `agent_parameters`.
pub const COMMAND_PARAM: &str = "command";
pub const ARGS_PARAM: &str = "args";

/// On-disk document format, picked from the file extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Format {
    #[default]
    Yaml,
    Toml,
    Json,
}

impl Format {
    pub fn from_path(path: &Path) -> Self {
        let ext = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(str::to_ascii_lowercase);
        match ext.as_deref() {
            Some("toml") => Self::Toml,
            Some("json") => Self::Json,
            _ => Self::Yaml,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Yaml => "YAML",
            Self::Toml => "TOML",
            Self::Json => "JSON",
        }
    }
}

/// How the loader treats top-level keys it does not know about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Strictness {
    #[default]
    Warn,
    Strict,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ParamValue {
    Bool(bool),
    Integer(i64),
    Float(f64),
    String(String),
    List(Vec<ParamValue>),
    Table(BTreeMap<String, ParamValue>),
}

impl ParamValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    /// Reads a command-line value as bool, then integer, then float, falling
    /// back to a plain string.
    pub fn parse_scalar(raw: &str) -> Self {
        if let Ok(b) = raw.parse::<bool>() {
            return Self::Bool(b);
        }
        if let Ok(i) = raw.parse::<i64>() {
            return Self::Integer(i);
        }
        match raw.parse::<f64>() {
            Ok(f) if f.is_finite() => Self::Float(f),
            _ => Self::String(raw.to_string()),
        }
    }
}

impl fmt::Display for ParamValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(b) => write!(f, "{b}"),
            Self::Integer(i) => write!(f, "{i}"),
            Self::Float(x) => write!(f, "{x}"),
            Self::String(s) => f.write_str(s),
            Self::List(_) | Self::Table(_) => {
                let json = serde_json::to_string(self).map_err(|_| fmt::Error)?;
                f.write_str(&json)
            }
        }
    }
}

/// A validated configuration document. Immutable once built.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Configuration {
    purpose: String,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    agent_parameters: BTreeMap<String, ParamValue>,
    #[serde(skip)]
    source_path: PathBuf,
}

impl Configuration {
    pub fn new(
        purpose: impl Into<String>,
        agent_parameters: BTreeMap<String, ParamValue>,
        source_path: impl Into<PathBuf>,
    ) -> Result<Self> {
        let cfg = Self {
            purpose: purpose.into(),
            agent_parameters,
            source_path: source_path.into(),
        };
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        ConfigLoader::new().load(path)
    }

    pub fn purpose(&self) -> &str {
        &self.purpose
    }

    pub fn agent_parameters(&self) -> &BTreeMap<String, ParamValue> {
        &self.agent_parameters
    }

    pub fn parameter(&self, key: &str) -> Option<&ParamValue> {
        self.agent_parameters.get(key)
    }

    pub fn source_path(&self) -> &Path {
        &self.source_path
    }

    pub fn to_document(&self, format: Format) -> Result<String> {
        let serialize_err = |message: String| Error::Serialize {
            format: format.name(),
            message,
        };
        match format {
            Format::Yaml => serde_yaml::to_string(self).map_err(|e| serialize_err(e.to_string())),
            Format::Toml => {
                toml::to_string_pretty(self).map_err(|e| serialize_err(e.to_string()))
            }
            Format::Json => serde_json::to_string_pretty(self)
                .map(|mut json| {
                    json.push('\n');
                    json
                })
                .map_err(|e| serialize_err(e.to_string())),
        }
    }

    /// Writes the document in the format implied by `path`, creating parent
    /// directories as needed.
    pub fn write(&self, path: &Path) -> Result<()> {
        let document = self.to_document(Format::from_path(path))?;
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(|e| Error::io(parent, e))?;
            }
        }
        fs::write(path, document).map_err(|e| Error::io(path, e))?;
        tracing::debug!(path = %path.display(), "configuration written");
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        let path = self.source_path.as_path();
        if self.purpose.trim().is_empty() {
            return Err(Error::validation(path, "`purpose` cannot be empty"));
        }
        if self.agent_parameters.keys().any(|k| k.trim().is_empty()) {
            return Err(Error::validation(
                path,
                "`agent_parameters` contains an empty key",
            ));
        }
        match self.parameter(COMMAND_PARAM) {
            None => {}
            Some(ParamValue::String(cmd)) if !cmd.trim().is_empty() => {}
            Some(_) => {
                return Err(Error::validation(
                    path,
                    "`agent_parameters.command` must be a non-empty string",
                ));
            }
        }
        match self.parameter(ARGS_PARAM) {
            None => {}
            Some(ParamValue::List(items)) if items.iter().all(|i| i.as_str().is_some()) => {}
            Some(_) => {
                return Err(Error::validation(
                    path,
                    "`agent_parameters.args` must be a list of strings",
                ));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default)]
pub struct ConfigLoader {
    strictness: Strictness,
}

impl ConfigLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn strictness(mut self, strictness: Strictness) -> Self {
        self.strictness = strictness;
        self
    }

    /// Reads and validates the document at `path`.
    ///
    /// Fails with [`Error::NotFound`] when the path does not exist,
    /// [`Error::Parse`] when the document is malformed and
    /// [`Error::Validation`] when required fields are missing or mistyped.
    pub fn load(&self, path: impl AsRef<Path>) -> Result<Configuration> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(Error::NotFound {
                path: path.to_path_buf(),
            });
        }
        if !path.is_file() {
            return Err(Error::validation(path, "config path is not a file"));
        }
        let raw = fs::read_to_string(path).map_err(|e| match e.kind() {
            io::ErrorKind::NotFound => Error::NotFound {
                path: path.to_path_buf(),
            },
            _ => Error::io(path, e),
        })?;
        let cfg = self.parse_str(&raw, Format::from_path(path), path)?;
        tracing::debug!(
            path = %path.display(),
            params = cfg.agent_parameters.len(),
            "configuration loaded"
        );
        Ok(cfg)
    }

    pub fn parse_str(&self, raw: &str, format: Format, source_path: &Path) -> Result<Configuration> {
        let document = parse_document(raw, format, source_path)?;
        self.build_configuration(document, source_path)
    }

    fn build_configuration(&self, document: Value, path: &Path) -> Result<Configuration> {
        let mut root = match document {
            Value::Object(map) => map,
            Value::Null => {
                return Err(Error::validation(
                    path,
                    "document is empty; expected a mapping with a `purpose` key",
                ));
            }
            other => {
                return Err(Error::validation(
                    path,
                    format!("document root must be a mapping, found {}", kind(&other)),
                ));
            }
        };

        let purpose = match root.remove("purpose") {
            None | Some(Value::Null) => {
                return Err(Error::validation(path, "missing required field `purpose`"));
            }
            Some(Value::String(purpose)) => purpose,
            Some(other) => {
                return Err(Error::validation(
                    path,
                    format!("`purpose` must be a string, found {}", kind(&other)),
                ));
            }
        };

        let agent_parameters = match root.remove("agent_parameters") {
            None | Some(Value::Null) => BTreeMap::new(),
            Some(Value::Object(map)) => convert_table(path, "agent_parameters", map)?,
            Some(other) => {
                return Err(Error::validation(
                    path,
                    format!(
                        "`agent_parameters` must be a mapping, found {}",
                        kind(&other)
                    ),
                ));
            }
        };

        if !root.is_empty() {
            let unknown = root.keys().map(String::as_str).collect::<Vec<_>>().join(", ");
            match self.strictness {
                Strictness::Strict => {
                    return Err(Error::validation(
                        path,
                        format!("unknown top-level keys: {unknown}"),
                    ));
                }
                Strictness::Warn => {
                    tracing::warn!(path = %path.display(), keys = %unknown, "ignoring unknown top-level keys");
                }
            }
        }

        Configuration::new(purpose, agent_parameters, path)
    }
}

/// Parses into a JSON value tree. YAML and TOML are first read into their
/// own value types, which keep NaN and infinities that JSON turns into null.
fn parse_document(raw: &str, format: Format, path: &Path) -> Result<Value> {
    if raw.trim().is_empty() {
        return Ok(Value::Null);
    }
    let parse_err = |message: String| Error::Parse {
        path: path.to_path_buf(),
        format: format.name(),
        message,
    };
    let non_finite = |at: String| {
        Error::validation(path, format!("`{at}` must be a finite number"))
    };
    match format {
        Format::Yaml => {
            let native: serde_yaml::Value =
                serde_yaml::from_str(raw).map_err(|e| parse_err(e.to_string()))?;
            if let Some(at) = non_finite_in_yaml(&native, "") {
                return Err(non_finite(at));
            }
            serde_json::to_value(native).map_err(|e| parse_err(e.to_string()))
        }
        Format::Toml => {
            let native =
                toml::Value::Table(toml::from_str(raw).map_err(|e| parse_err(e.to_string()))?);
            if let Some(at) = non_finite_in_toml(&native, "") {
                return Err(non_finite(at));
            }
            serde_json::to_value(native).map_err(|e| parse_err(e.to_string()))
        }
        Format::Json => serde_json::from_str(raw).map_err(|e| parse_err(e.to_string())),
    }
}

fn non_finite_in_yaml(value: &serde_yaml::Value, at: &str) -> Option<String> {
    use serde_yaml::Value as Yaml;
    match value {
        Yaml::Number(n) if n.is_nan() || n.is_infinite() => Some(at.to_string()),
        Yaml::Sequence(items) => items
            .iter()
            .enumerate()
            .find_map(|(idx, item)| non_finite_in_yaml(item, &format!("{at}[{idx}]"))),
        Yaml::Mapping(map) => map.iter().find_map(|(key, item)| {
            let key = key
                .as_str()
                .map(str::to_string)
                .unwrap_or_else(|| format!("{key:?}"));
            non_finite_in_yaml(item, &join_key(at, &key))
        }),
        Yaml::Tagged(tagged) => non_finite_in_yaml(&tagged.value, at),
        _ => None,
    }
}

fn non_finite_in_toml(value: &toml::Value, at: &str) -> Option<String> {
    match value {
        toml::Value::Float(f) if !f.is_finite() => Some(at.to_string()),
        toml::Value::Array(items) => items
            .iter()
            .enumerate()
            .find_map(|(idx, item)| non_finite_in_toml(item, &format!("{at}[{idx}]"))),
        toml::Value::Table(table) => table
            .iter()
            .find_map(|(key, item)| non_finite_in_toml(item, &join_key(at, key))),
        _ => None,
    }
}

fn join_key(at: &str, key: &str) -> String {
    if at.is_empty() {
        key.to_string()
    } else {
        format!("{at}.{key}")
    }
}

fn convert_table(
    path: &Path,
    key_path: &str,
    map: Map<String, Value>,
) -> Result<BTreeMap<String, ParamValue>> {
    map.into_iter()
        .map(|(key, value)| {
            if key.trim().is_empty() {
                return Err(Error::validation(
                    path,
                    format!("`{key_path}` contains an empty key"),
                ));
            }
            let value = convert_value(path, &format!("{key_path}.{key}"), value)?;
            Ok((key, value))
        })
        .collect()
}

fn convert_value(path: &Path, key_path: &str, value: Value) -> Result<ParamValue> {
    match value {
        Value::Null => Err(Error::validation(
            path,
            format!("`{key_path}` must not be null"),
        )),
        Value::Bool(b) => Ok(ParamValue::Bool(b)),
        Value::Number(n) => match (n.as_i64(), n.as_f64()) {
            (Some(i), _) => Ok(ParamValue::Integer(i)),
            (None, Some(f)) if n.is_f64() => Ok(ParamValue::Float(f)),
            _ => Err(Error::validation(
                path,
                format!("`{key_path}` does not fit in a 64-bit signed integer"),
            )),
        },
        Value::String(s) => Ok(ParamValue::String(s)),
        Value::Array(items) => items
            .into_iter()
            .enumerate()
            .map(|(idx, item)| convert_value(path, &format!("{key_path}[{idx}]"), item))
            .collect::<Result<Vec<_>>>()
            .map(ParamValue::List),
        Value::Object(map) => convert_table(path, key_path, map).map(ParamValue::Table),
    }
}

fn kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "a list",
        Value::Object(_) => "a mapping",
    }
}

use crate::crd::Kappnav;
use crate::error::{Error, Result};
use anyhow::Context;
use globset::{Glob, GlobSet, GlobSetBuilder};
use k8s_openapi::api::core::v1::ConfigMap;
use regex::Regex;
use serde_json::Value;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use tracing::{debug, info};

static ACTION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)\{\{(-?)\s*(.*?)\s*(-?)\}\}").expect("valid action regex"));

/// Value of the `kappnav.io/map-type` label on a config map.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MapType {
    Action,
    Sections,
    Status,
    Builtin,
}

impl MapType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MapType::Action => "action",
            MapType::Sections => "sections",
            MapType::Status => "status",
            MapType::Builtin => "builtin",
        }
    }

    /// Derived from the last path component, e.g. `maps/action`.
    pub fn from_dir(dir: &Path) -> Option<Self> {
        let name = dir.to_string_lossy();
        let name = name.trim_end_matches('/');
        if name.ends_with("action") {
            Some(MapType::Action)
        } else if name.ends_with("sections") {
            Some(MapType::Sections)
        } else if name.ends_with("status") {
            Some(MapType::Status)
        } else if name.ends_with("builtin") {
            Some(MapType::Builtin)
        } else {
            None
        }
    }
}

/// A config map template, rendered against the instance on every pass.
#[derive(Debug, Clone)]
pub struct MapTemplate {
    pub name: String,
    pub map_type: Option<MapType>,
    pub text: String,
}

#[derive(Debug, Clone, Default)]
pub struct TemplateSet {
    templates: Vec<MapTemplate>,
}

impl TemplateSet {
    pub fn new(templates: Vec<MapTemplate>) -> Self {
        TemplateSet { templates }
    }

    /// Reads every `*.yaml`/`*.yml` file directly inside each directory, in
    /// file name order.
    pub fn load<P: AsRef<Path>>(dirs: &[P]) -> anyhow::Result<Self> {
        let matcher = yaml_matcher()?;
        let mut templates = Vec::new();

        for dir in dirs {
            let dir = dir.as_ref();
            info!("Loading config map templates from {}", dir.display());
            let mut paths: Vec<PathBuf> = fs::read_dir(dir)
                .with_context(|| format!("Failed to read directory {}", dir.display()))?
                .map(|entry| entry.map(|e| e.path()))
                .collect::<Result<_, _>>()
                .with_context(|| format!("Failed to list directory {}", dir.display()))?;
            paths.sort();

            for path in paths {
                let is_template = path.is_file()
                    && path
                        .file_name()
                        .is_some_and(|file_name| matcher.is_match(file_name));
                if !is_template {
                    continue;
                }
                debug!("Read file: {}", path.display());
                let text = fs::read_to_string(&path)
                    .with_context(|| format!("Failed to read file {}", path.display()))?;
                templates.push(MapTemplate {
                    name: path.display().to_string(),
                    map_type: MapType::from_dir(dir),
                    text,
                });
            }
        }
        Ok(TemplateSet { templates })
    }

    pub fn iter(&self) -> impl Iterator<Item = &MapTemplate> {
        self.templates.iter()
    }

    pub fn len(&self) -> usize {
        self.templates.len()
    }
}

fn yaml_matcher() -> anyhow::Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    builder.add(Glob::new("*.yaml")?);
    builder.add(Glob::new("*.yml")?);
    Ok(builder.build()?)
}

impl MapTemplate {
    /// Renders the template with the instance as data and parses the result.
    pub fn render(&self, instance: &Kappnav) -> Result<ConfigMap> {
        let data = serde_json::to_value(instance)?;
        let text = render_text(&self.text, &data).map_err(|message| Error::Template {
            name: self.name.clone(),
            message,
        })?;
        serde_yaml_ng::from_str(&text).map_err(|e| Error::Template {
            name: self.name.clone(),
            message: e.to_string(),
        })
    }
}

/// Substitutes `{{ .Field.Path }}` actions. `{{-` and `-}}` trim the
/// whitespace on that side of the action.
fn render_text(text: &str, data: &Value) -> std::result::Result<String, String> {
    let mut output = String::with_capacity(text.len());
    let mut trim_next = false;
    let mut last = 0;

    for captures in ACTION.captures_iter(text) {
        let Some(whole) = captures.get(0) else {
            continue;
        };
        let mut literal = &text[last..whole.start()];
        if trim_next {
            literal = literal.trim_start();
        }
        if !captures[1].is_empty() {
            literal = literal.trim_end();
        }
        check_literal(literal)?;
        output.push_str(literal);
        output.push_str(&evaluate(&captures[2], data)?);
        trim_next = !captures[3].is_empty();
        last = whole.end();
    }

    let mut tail = &text[last..];
    if trim_next {
        tail = tail.trim_start();
    }
    check_literal(tail)?;
    output.push_str(tail);
    Ok(output)
}

fn check_literal(literal: &str) -> std::result::Result<(), String> {
    match literal.find("{{") {
        Some(position) => Err(format!("unclosed action at \"{}\"", &literal[position..])),
        None => Ok(()),
    }
}

fn evaluate(action: &str, data: &Value) -> std::result::Result<String, String> {
    let path = action
        .strip_prefix('.')
        .ok_or_else(|| format!("unsupported action \"{}\"", action))?;
    if path.is_empty() {
        return Ok(data.to_string());
    }

    let mut current = data;
    for (index, field) in path.split('.').enumerate() {
        current = lookup(current, field)
            .or_else(|| match index {
                // Object metadata fields are addressable from the root.
                0 => data.get("metadata").and_then(|meta| lookup(meta, field)),
                _ => None,
            })
            .ok_or_else(|| format!("can't evaluate field {} in \"{}\"", field, action))?;
    }

    Ok(match current {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    })
}

/// Go style field names match the camelCase keys of the serialized instance.
fn lookup<'a>(value: &'a Value, field: &str) -> Option<&'a Value> {
    let object = value.as_object()?;
    object.get(field).or_else(|| {
        object
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(field))
            .map(|(_, v)| v)
    })
}

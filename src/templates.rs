//! View rendering.
//!
//! Views are files named `<view>.html` under the configured views
//! directory, rendered with minijinja. An optional layout receives the
//! rendered view as `content` alongside the same locals.

use std::collections::BTreeMap;
use std::path::{Component, Path, PathBuf};

use minijinja::Environment;
use serde_json::Value;

use crate::error::{Error, Result};

const VIEW_EXTENSION: &str = "html";

/// Renders a named view with locals and an optional layout.
pub trait Renderer: Send + Sync {
    fn render(&self, view: &str, locals: &Value, layout: Option<&str>) -> Result<String>;
}

/// Renderer reading templates from a directory on every call.
#[derive(Debug, Clone)]
pub struct ViewsRenderer {
    dir: PathBuf,
}

impl ViewsRenderer {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn source(&self, name: &str) -> Result<String> {
        let relative = Path::new(name);
        if !relative
            .components()
            .all(|component| matches!(component, Component::Normal(_)))
        {
            return Err(Error::NotFound);
        }
        let path = self.dir.join(relative).with_extension(VIEW_EXTENSION);
        Ok(std::fs::read_to_string(path)?)
    }
}

fn template_error(err: minijinja::Error) -> Error {
    Error::Internal(format!("template error: {err}"))
}

/// Render `source` under a `.html` name so HTML auto-escaping applies.
fn render_named<S: serde::Serialize>(name: &str, source: &str, ctx: S) -> Result<String> {
    let name = format!("{name}.{VIEW_EXTENSION}");
    let env = Environment::new();
    let rendered = env
        .template_from_named_str(&name, source)
        .and_then(|template| template.render(ctx))
        .map_err(template_error);
    rendered
}

impl Renderer for ViewsRenderer {
    fn render(&self, view: &str, locals: &Value, layout: Option<&str>) -> Result<String> {
        let body = render_named(view, &self.source(view)?, locals)?;

        let Some(layout) = layout else {
            return Ok(body);
        };

        let mut context: BTreeMap<String, minijinja::Value> = BTreeMap::new();
        if let Value::Object(map) = locals {
            for (key, value) in map {
                context.insert(key.clone(), minijinja::Value::from_serialize(value));
            }
        }
        context.insert("content".to_string(), minijinja::Value::from_safe_string(body));

        render_named(layout, &self.source(layout)?, context)
    }
}

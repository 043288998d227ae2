//! Built-in HTML template syntax.
//!
//! A lightweight template system using string interpolation rather than a
//! heavy template engine. Supported syntax:
//!
//! - `{{ name }}` and `{{ name? }}` (optional) variable interpolation
//! - `{% include "includes/nav.html" %}` inline another file from the views root
//! - `{% layout "layouts/base.html" %}` wrap the page, exposed as `{{ content }}`
//! - `{% set title = "About" %}` define a page variable

use std::{
    collections::HashMap,
    fs,
    path::{Component, Path},
};

use thiserror::Error;

/// Maximum include nesting before a cycle is assumed.
const MAX_INCLUDE_DEPTH: usize = 16;

/// Template rendering errors.
#[derive(Debug, Error)]
pub enum TemplateError {
    /// Missing required variable.
    #[error("missing required variable: {0}")]
    MissingVariable(String),

    /// Included or layout file not found.
    #[error("template not found: {0}")]
    NotFound(String),

    /// Invalid template syntax.
    #[error("invalid template syntax: {0}")]
    InvalidSyntax(String),

    /// Includes nested too deeply.
    #[error("include depth exceeded while expanding {0}")]
    IncludeDepth(String),
}

/// Result type for template operations.
pub type Result<T> = std::result::Result<T, TemplateError>;

/// Template context with variables for interpolation.
#[derive(Debug, Clone, Default)]
pub struct TemplateContext {
    variables: HashMap<String, String>,
}

impl TemplateContext {
    /// Create a new empty context.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a variable into the context.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.variables.insert(key.into(), value.into());
    }

    /// Create context with initial variables.
    #[must_use]
    pub fn with_var(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.insert(key, value);
        self
    }

    /// Get a variable value.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.variables.get(key).map(String::as_str)
    }
}

/// A template that supports variable interpolation.
#[derive(Debug, Clone)]
pub struct Template {
    name: String,
    content: String,
}

impl Template {
    /// Create a new template with the given name and content.
    #[must_use]
    pub fn new(name: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            content: content.into(),
        }
    }

    /// Get the template name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Replace all `{{ variable }}` placeholders with values from context.
    ///
    /// Substituted values are not scanned again.
    pub fn render(&self, context: &TemplateContext) -> Result<String> {
        let mut result = self.content.clone();
        let mut pos = 0;

        while let Some(start) = result[pos..].find("{{") {
            let start = pos + start;
            let end = result[start..].find("}}").ok_or_else(|| {
                TemplateError::InvalidSyntax(format!("unclosed {{{{ delimiter in {}", self.name))
            })?;
            let end = start + end + 2;

            let var_name = result[start + 2..end - 2].trim();

            let (var_name, optional) = match var_name.strip_suffix('?') {
                Some(stripped) => (stripped.trim(), true),
                None => (var_name, false),
            };

            let value = match context.get(var_name) {
                Some(v) => v.to_string(),
                None if optional => String::new(),
                None => return Err(TemplateError::MissingVariable(var_name.to_string())),
            };

            result.replace_range(start..end, &value);
            pos = start + value.len();
        }

        Ok(result)
    }
}

/// A page after directive expansion, before interpolation.
#[derive(Debug, Clone)]
pub struct ExpandedPage {
    /// Body with includes inlined and directives removed.
    pub body: String,
    /// Layout requested by the page, relative to the views root.
    pub layout: Option<String>,
}

/// Expand `{% %}` directives in `source`, reading includes from `root`.
///
/// `set` directives are written into `context`.
pub fn expand(
    name: &str,
    source: &str,
    root: &Path,
    context: &mut TemplateContext,
) -> Result<ExpandedPage> {
    let mut layout = None;
    let body = expand_at_depth(name, source, root, context, &mut layout, 0)?;
    Ok(ExpandedPage { body, layout })
}

/// Render a page and its layout chain into a single HTML string.
pub fn render_page(
    name: &str,
    source: &str,
    root: &Path,
    mut context: TemplateContext,
) -> Result<String> {
    let page = expand(name, source, root, &mut context)?;
    let mut html = Template::new(name, page.body).render(&context)?;

    let mut next_layout = page.layout;
    let mut depth = 0;
    while let Some(layout_name) = next_layout.take() {
        depth += 1;
        if depth > MAX_INCLUDE_DEPTH {
            return Err(TemplateError::IncludeDepth(layout_name));
        }
        let layout_source = read_relative(root, &layout_name)?;
        let layout = expand(&layout_name, &layout_source, root, &mut context)?;
        context.insert("content", html);
        html = Template::new(&layout_name, layout.body).render(&context)?;
        next_layout = layout.layout;
    }

    Ok(html)
}

fn expand_at_depth(
    name: &str,
    source: &str,
    root: &Path,
    context: &mut TemplateContext,
    layout: &mut Option<String>,
    depth: usize,
) -> Result<String> {
    if depth > MAX_INCLUDE_DEPTH {
        return Err(TemplateError::IncludeDepth(name.to_string()));
    }

    let mut output = String::with_capacity(source.len());
    let mut rest = source;

    while let Some(start) = rest.find("{%") {
        output.push_str(&rest[..start]);
        let end = rest[start..].find("%}").ok_or_else(|| {
            TemplateError::InvalidSyntax(format!("unclosed {{% delimiter in {name}"))
        })?;
        let directive = rest[start + 2..start + end].trim();
        rest = &rest[start + end + 2..];

        let (keyword, argument) = directive
            .split_once(char::is_whitespace)
            .map_or((directive, ""), |(k, a)| (k, a.trim()));

        match keyword {
            "include" => {
                let target = unquote(argument, name)?;
                let included = read_relative(root, target)?;
                output.push_str(&expand_at_depth(
                    target,
                    &included,
                    root,
                    context,
                    layout,
                    depth + 1,
                )?);
            }
            "layout" => {
                let target = unquote(argument, name)?;
                if layout.is_none() {
                    *layout = Some(target.to_string());
                }
            }
            "set" => {
                let (key, value) = argument.split_once('=').ok_or_else(|| {
                    TemplateError::InvalidSyntax(format!("expected `set key = \"value\"` in {name}"))
                })?;
                context.insert(key.trim(), unquote(value.trim(), name)?);
            }
            other => {
                return Err(TemplateError::InvalidSyntax(format!(
                    "unknown directive `{other}` in {name}"
                )));
            }
        }
    }

    output.push_str(rest);
    Ok(output)
}

fn unquote<'a>(argument: &'a str, name: &str) -> Result<&'a str> {
    let quoted = (argument.starts_with('"') && argument.ends_with('"'))
        || (argument.starts_with('\'') && argument.ends_with('\''));
    if argument.len() < 2 || !quoted {
        return Err(TemplateError::InvalidSyntax(format!(
            "expected a quoted argument, got `{argument}` in {name}"
        )));
    }
    Ok(&argument[1..argument.len() - 1])
}

fn read_relative(root: &Path, target: &str) -> Result<String> {
    let relative = Path::new(target);
    let escapes = relative
        .components()
        .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
    if escapes {
        return Err(TemplateError::NotFound(target.to_string()));
    }
    fs::read_to_string(root.join(relative)).map_err(|_| TemplateError::NotFound(target.to_string()))
}

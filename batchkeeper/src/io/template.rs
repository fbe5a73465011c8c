//! Argument templating for host and processor command lines.
//!
//! Config entries such as `"{{ source_dir }}/{{ item }}"` are rendered with
//! minijinja. Undefined variables are errors so a typo in the config fails the
//! launch instead of passing an empty argument to the host.

use std::collections::BTreeMap;

use anyhow::{Context, Result};
use minijinja::{Environment, UndefinedBehavior};

/// Variables available to a command template.
pub type TemplateVars = BTreeMap<&'static str, String>;

/// Template engine wrapper around minijinja.
pub struct ArgRenderer {
    env: Environment<'static>,
}

impl Default for ArgRenderer {
    fn default() -> Self {
        Self::new()
    }
}

impl ArgRenderer {
    pub fn new() -> Self {
        let mut env = Environment::new();
        env.set_undefined_behavior(UndefinedBehavior::Strict);
        Self { env }
    }

    pub fn render(&self, template: &str, vars: &TemplateVars) -> Result<String> {
        self.env
            .render_str(template, vars)
            .with_context(|| format!("render template '{template}'"))
    }

    pub fn render_all(&self, templates: &[String], vars: &TemplateVars) -> Result<Vec<String>> {
        templates
            .iter()
            .map(|template| self.render(template, vars))
            .collect()
    }
}

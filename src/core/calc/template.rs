use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::core::error::{CalcError, Result};

/// Values substituted into a metric query.
#[derive(Debug, Clone, Default)]
pub struct TemplateVars {
    pub project_slug: String,
    /// Already quoted as `'YYYY-MM-DD'`.
    pub date_from: String,
    pub date_to: String,
    pub limit: Option<String>,
    pub offset: Option<String>,
    pub params: BTreeMap<String, String>,
}

/// A metric's SQL body, read from `<dir>/<metric>.sql`.
#[derive(Debug, Clone)]
pub struct QueryTemplate {
    pub path: PathBuf,
    body: String,
}

impl QueryTemplate {
    pub fn load(dir: &Path, metric: &str) -> Result<Self> {
        let path = dir.join(format!("{}.sql", metric));
        let body = std::fs::read_to_string(&path).map_err(|e| {
            CalcError::config(format!("cannot read query template {}: {}", path.display(), e))
        })?;
        Ok(Self { path, body })
    }

    pub fn from_body(body: impl Into<String>) -> Self {
        Self {
            path: PathBuf::new(),
            body: body.into(),
        }
    }

    /// Placeholders without a value (an absent `{{limit}}`, an unknown param) stay verbatim.
    pub fn render(&self, vars: &TemplateVars) -> String {
        let mut sql = self.body.replace("{{project_slug}}", &vars.project_slug);
        if let Some(limit) = vars.limit.as_deref().filter(|v| !v.is_empty()) {
            sql = sql.replace("{{limit}}", limit);
        }
        if let Some(offset) = vars.offset.as_deref().filter(|v| !v.is_empty()) {
            sql = sql.replace("{{offset}}", offset);
        }
        for (name, value) in &vars.params {
            sql = sql.replace(&format!("{{{{{}}}}}", name), value);
        }
        sql.replace("{{date_from}}", &vars.date_from)
            .replace("{{date_to}}", &vars.date_to)
    }
}

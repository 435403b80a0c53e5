//! The job catalog: which metrics to compute, for which projects and time ranges.

use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;
use tracing::info;

use crate::core::error::{CalcError, Result};
use crate::core::timerange::{ALL_CURRENT_RANGES, ALL_RANGES, TimeRange};

pub const ALL_SLUGS_QUERY: &str = "select distinct project_slug from mv_subprojects \
     where project_slug is not null and trim(project_slug) != ''";

/// Top projects by activity count over the last three months.
pub fn top_slugs_query(n: usize) -> String {
    format!(
        "select i.project_slug from (select p.project_slug, count(a.id) as acts \
         from activities a, mv_subprojects p \
         where a.segment_id = p.id and a.timestamp >= datetime('now', '-3 months') \
         and p.project_slug is not null and trim(p.project_slug) != '' \
         group by p.project_slug order by acts desc limit {}) i",
        n
    )
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Catalog {
    #[serde(default)]
    pub metrics: BTreeMap<String, JobSpec>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct JobSpec {
    pub metrics: Vec<String>,
    pub table: String,
    #[serde(default)]
    pub project_slugs: String,
    #[serde(default)]
    pub time_ranges: String,
    #[serde(default)]
    pub extra_params: BTreeMap<String, String>,
    #[serde(default)]
    pub extra_env: BTreeMap<String, String>,
    /// Minimum time between two successful syncs of the same task group.
    #[serde(default, with = "humantime_serde")]
    pub max_frequency: Option<Duration>,
}

impl Catalog {
    pub fn from_yaml(content: &str) -> Result<Self> {
        serde_yaml::from_str(content)
            .map_err(|e| CalcError::config(format!("cannot parse catalog: {}", e)))
    }

    pub async fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = tokio::fs::read_to_string(path).await.map_err(|e| {
            CalcError::config(format!("cannot read catalog {}: {}", path.display(), e))
        })?;
        let catalog = Self::from_yaml(&content)?;
        info!(
            "Loaded catalog {} with {} jobs",
            path.display(),
            catalog.metrics.len()
        );
        Ok(catalog)
    }
}

/// Where a job's project slugs come from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SlugSource {
    List(Vec<String>),
    /// Every slug returned by a query; `all` and `top:N` resolve to fixed queries.
    Query(String),
}

impl SlugSource {
    pub fn parse(raw: &str) -> Result<Self> {
        let raw = raw.trim();
        if raw == "all" {
            return Ok(SlugSource::Query(ALL_SLUGS_QUERY.to_string()));
        }
        if let Some(n) = raw.strip_prefix("top:") {
            let top = n.trim().parse::<usize>().ok().filter(|n| *n > 0).ok_or_else(|| {
                CalcError::config(format!(
                    "'{}': top:N requires a positive integer, got '{}'",
                    raw, n
                ))
            })?;
            return Ok(SlugSource::Query(top_slugs_query(top)));
        }
        if let Some(query) = raw.strip_prefix("sql:") {
            let query = query.trim();
            if query.is_empty() {
                return Err(CalcError::config("'sql:' requires a query"));
            }
            return Ok(SlugSource::Query(query.to_string()));
        }
        let slugs = split_list(raw);
        if slugs.is_empty() {
            return Err(CalcError::config("no project slugs given"));
        }
        Ok(SlugSource::List(slugs))
    }
}

/// Resolves a range source (`all`, `all-current` or a literal list) into validated codes.
pub fn parse_ranges(raw: &str) -> Result<Vec<TimeRange>> {
    let raw = raw.trim();
    let codes = match raw {
        "all" => ALL_RANGES.iter().map(|c| c.to_string()).collect(),
        "all-current" => ALL_CURRENT_RANGES.iter().map(|c| c.to_string()).collect(),
        _ => split_list(raw),
    };
    if codes.is_empty() {
        return Err(CalcError::config("no time ranges given"));
    }
    codes.iter().map(|c| c.parse()).collect()
}

/// Comma list with whitespace trimmed, empties dropped and duplicates removed.
pub fn split_list(raw: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .filter(|s| seen.insert(s.to_string()))
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_catalog_yaml() {
        let yaml = r#"
metrics:
  contributors:
    metrics: [contr-lead, contr-active]
    table: metric_contr
    project_slugs: "a,b"
    time_ranges: all-current
    extra_params:
      is_bot: "!= true"
    extra_env:
      CALC_WEEK_DAILY: "1"
    max_frequency: 48h
  orgs:
    metrics: [org-lead]
    table: metric_orgs
    project_slugs: top:5
    time_ranges: 7d
"#;
        let catalog = Catalog::from_yaml(yaml).unwrap();
        assert_eq!(catalog.metrics.len(), 2);
        let job = &catalog.metrics["contributors"];
        assert_eq!(job.metrics, vec!["contr-lead", "contr-active"]);
        assert_eq!(job.max_frequency, Some(Duration::from_secs(48 * 3600)));
        assert_eq!(job.extra_params["is_bot"], "!= true");
        assert!(catalog.metrics["orgs"].max_frequency.is_none());
    }

    #[test]
    fn malformed_frequency_is_a_config_error() {
        let yaml = "metrics:\n  j:\n    metrics: [m]\n    table: t\n    max_frequency: soon\n";
        assert!(matches!(Catalog::from_yaml(yaml), Err(CalcError::Config(_))));
    }

    #[test]
    fn slug_sentinels() {
        assert_eq!(
            SlugSource::parse(" a, b ,,a").unwrap(),
            SlugSource::List(vec!["a".into(), "b".into()])
        );
        assert_eq!(
            SlugSource::parse("all").unwrap(),
            SlugSource::Query(ALL_SLUGS_QUERY.to_string())
        );
        assert_eq!(
            SlugSource::parse("top:3").unwrap(),
            SlugSource::Query(top_slugs_query(3))
        );
        assert_eq!(
            SlugSource::parse("sql: select slug from p ").unwrap(),
            SlugSource::Query("select slug from p".into())
        );
    }

    #[test]
    fn malformed_slug_sentinels_fail() {
        for raw in ["top:abc", "top:0", "top:-2", "sql:", "", " , "] {
            assert!(
                matches!(SlugSource::parse(raw), Err(CalcError::Config(_))),
                "{:?} should fail",
                raw
            );
        }
        let err = SlugSource::parse("top:abc").unwrap_err();
        assert!(err.to_string().contains("positive integer"));
    }

    #[test]
    fn range_sentinels() {
        assert_eq!(parse_ranges("all").unwrap().len(), 13);
        assert_eq!(parse_ranges("all-current").unwrap().len(), 7);
        let codes: Vec<_> = parse_ranges("7d, 30d,7d")
            .unwrap()
            .iter()
            .map(|r| r.as_code())
            .collect();
        assert_eq!(codes, vec!["7d", "30d"]);
        assert!(parse_ranges("7d,fortnight").is_err());
        assert!(parse_ranges("").is_err());
    }
}

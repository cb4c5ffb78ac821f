use serde::{Deserialize, Serialize};
use serde_json::Value as Json;

/// Server-side cap on `limit`, applied regardless of what the caller asks
/// for (§4.A: "`limit` capped server-side").
pub const MAX_LIMIT: u32 = 1000;
pub const DEFAULT_LIMIT: u32 = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterOp {
    Eq,
    Ne,
    Gt,
    Gte,
    Lt,
    Lte,
    Like,
    In,
    Contains,
    IsNull,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FilterClause {
    pub field: String,
    pub op: FilterOp,
    /// Absent for `is_null`, which takes no value.
    #[serde(default)]
    pub value: Json,
}

/// A conjunction (AND) of filter clauses, matching §3's "filter (conjunction
/// of operators: eq/ne/gt/gte/lt/lte/like/in/contains/is_null)".
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Filter(pub Vec<FilterClause>);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortDirection {
    Asc,
    Desc,
}

#[derive(Debug, Clone)]
pub struct SortClause {
    pub field: String,
    pub direction: SortDirection,
}

impl SortClause {
    /// Parses the `+field`/`-field` convention from §4.A.
    pub fn parse(spec: &str) -> anyhow::Result<Self> {
        let (direction, field) = match spec.as_bytes().first() {
            Some(b'+') => (SortDirection::Asc, &spec[1..]),
            Some(b'-') => (SortDirection::Desc, &spec[1..]),
            _ => (SortDirection::Asc, spec),
        };
        if field.is_empty() {
            anyhow::bail!("empty sort field in '{spec}'");
        }
        Ok(SortClause {
            field: field.to_string(),
            direction,
        })
    }
}

#[derive(Debug, Clone, Default)]
pub struct QueryOptions {
    pub filter: Filter,
    pub sort: Vec<SortClause>,
    pub limit: Option<u32>,
    pub offset: Option<u32>,
}

impl QueryOptions {
    pub fn effective_limit(&self) -> u32 {
        self.limit.unwrap_or(DEFAULT_LIMIT).min(MAX_LIMIT)
    }
}

pub struct Page {
    pub docs: Vec<Json>,
    /// Populated only when the caller also asked for a count (§4.A: "Count
    /// is a separate query (no windowed total inline)").
    pub total: Option<u64>,
}

fn field_value<'a>(doc: &'a Json, field: &str) -> Option<&'a Json> {
    doc.get(field)
}

/// Evaluates a single clause against a document image. Shared verbatim by
/// the Storage Gateway's in-process query engine (§4.A) and the Realtime
/// Hub's per-subscription filter (§4.G), so "filter evaluation must match
/// A's query operators exactly" holds by construction rather than by two
/// independent implementations staying in sync.
pub fn clause_matches(doc: &Json, clause: &FilterClause) -> bool {
    let actual = field_value(doc, &clause.field);
    match clause.op {
        FilterOp::IsNull => matches!(actual, None | Some(Json::Null)),
        FilterOp::Eq => actual.map(|v| v == &clause.value).unwrap_or(false),
        FilterOp::Ne => actual.map(|v| v != &clause.value).unwrap_or(true),
        FilterOp::Gt => compare(actual, &clause.value).map(|o| o.is_gt()).unwrap_or(false),
        FilterOp::Gte => compare(actual, &clause.value).map(|o| o.is_ge()).unwrap_or(false),
        FilterOp::Lt => compare(actual, &clause.value).map(|o| o.is_lt()).unwrap_or(false),
        FilterOp::Lte => compare(actual, &clause.value).map(|o| o.is_le()).unwrap_or(false),
        FilterOp::Like => like_matches(actual, &clause.value),
        FilterOp::In => {
            let Some(actual) = actual else { return false };
            clause.value.as_array().map(|arr| arr.contains(actual)).unwrap_or(false)
        },
        FilterOp::Contains => contains_matches(actual, &clause.value),
    }
}

pub fn matches_filter(doc: &Json, filter: &Filter) -> bool {
    filter.0.iter().all(|clause| clause_matches(doc, clause))
}

fn compare(actual: Option<&Json>, expected: &Json) -> Option<std::cmp::Ordering> {
    let actual = actual?;
    match (actual, expected) {
        (Json::Number(a), Json::Number(b)) => a.as_f64()?.partial_cmp(&b.as_f64()?),
        (Json::String(a), Json::String(b)) => Some(a.cmp(b)),
        _ => None,
    }
}

/// `like` takes a SQL-style pattern with `%`/`_` wildcards, applied directly
/// against a string field.
fn like_matches(actual: Option<&Json>, pattern: &Json) -> bool {
    let (Some(Json::String(actual)), Json::String(pattern)) = (actual, pattern) else {
        return false;
    };
    sql_like(actual, pattern)
}

/// `contains` is LIKE with the needle's own wildcard characters escaped, so
/// `contains("100% off")` does not treat `%` as a wildcard (§4.A).
fn contains_matches(actual: Option<&Json>, needle: &Json) -> bool {
    let (Some(Json::String(actual)), Json::String(needle)) = (actual, needle) else {
        return false;
    };
    let escaped = needle.replace('\\', "\\\\").replace('%', "\\%").replace('_', "\\_");
    sql_like(actual, &format!("%{escaped}%"))
}

/// A small SQL `LIKE` matcher (`%`/`_` wildcards, `\` escape), used so both
/// the `like` and `contains` operators share one semantics whether they run
/// over SQLite or over an in-memory document image.
fn sql_like(text: &str, pattern: &str) -> bool {
    let text: Vec<char> = text.chars().collect();
    let pattern: Vec<char> = pattern.chars().collect();
    matches_like(&text, 0, &pattern, 0)
}

fn matches_like(text: &[char], ti: usize, pattern: &[char], pi: usize) -> bool {
    if pi == pattern.len() {
        return ti == text.len();
    }
    match pattern[pi] {
        '\\' if pi + 1 < pattern.len() => {
            ti < text.len() && text[ti] == pattern[pi + 1] && matches_like(text, ti + 1, pattern, pi + 2)
        },
        '%' => {
            (ti..=text.len()).any(|skip| matches_like(text, skip, pattern, pi + 1))
        },
        '_' => ti < text.len() && matches_like(text, ti + 1, pattern, pi + 1),
        c => ti < text.len() && text[ti] == c && matches_like(text, ti + 1, pattern, pi + 1),
    }
}

pub fn sort_docs(docs: &mut [Json], sort: &[SortClause]) {
    docs.sort_by(|a, b| {
        for clause in sort {
            let av = field_value(a, &clause.field);
            let bv = field_value(b, &clause.field);
            let ord = compare_any(av, bv);
            let ord = match clause.direction {
                SortDirection::Asc => ord,
                SortDirection::Desc => ord.reverse(),
            };
            if ord != std::cmp::Ordering::Equal {
                return ord;
            }
        }
        std::cmp::Ordering::Equal
    });
}

fn compare_any(a: Option<&Json>, b: Option<&Json>) -> std::cmp::Ordering {
    use std::cmp::Ordering::*;
    match (a, b) {
        (None, None) => Equal,
        (None, Some(_)) => Less,
        (Some(_), None) => Greater,
        (Some(a), Some(b)) => compare(Some(a), b).unwrap_or(Equal),
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn eq_and_ne_operators() {
        let doc = json!({"channel": "general"});
        assert!(clause_matches(
            &doc,
            &FilterClause { field: "channel".into(), op: FilterOp::Eq, value: json!("general") }
        ));
        assert!(!clause_matches(
            &doc,
            &FilterClause { field: "channel".into(), op: FilterOp::Eq, value: json!("other") }
        ));
        assert!(clause_matches(
            &doc,
            &FilterClause { field: "channel".into(), op: FilterOp::Ne, value: json!("other") }
        ));
    }

    #[test]
    fn numeric_ordering_operators() {
        let doc = json!({"age": 30});
        assert!(clause_matches(&doc, &FilterClause { field: "age".into(), op: FilterOp::Gt, value: json!(20) }));
        assert!(!clause_matches(&doc, &FilterClause { field: "age".into(), op: FilterOp::Lt, value: json!(20) }));
        assert!(clause_matches(&doc, &FilterClause { field: "age".into(), op: FilterOp::Gte, value: json!(30) }));
    }

    #[test]
    fn contains_escapes_literal_wildcards() {
        let doc = json!({"title": "100% off today"});
        assert!(clause_matches(
            &doc,
            &FilterClause { field: "title".into(), op: FilterOp::Contains, value: json!("100% off") }
        ));
        assert!(!clause_matches(
            &doc,
            &FilterClause { field: "title".into(), op: FilterOp::Contains, value: json!("100x off") }
        ));
    }

    #[test]
    fn is_null_matches_missing_or_null() {
        let doc = json!({"a": null});
        assert!(clause_matches(&doc, &FilterClause { field: "a".into(), op: FilterOp::IsNull, value: Json::Null }));
        assert!(clause_matches(&doc, &FilterClause { field: "b".into(), op: FilterOp::IsNull, value: Json::Null }));
    }

    #[test]
    fn in_operator_checks_membership() {
        let doc = json!({"status": "open"});
        assert!(clause_matches(
            &doc,
            &FilterClause { field: "status".into(), op: FilterOp::In, value: json!(["open", "pending"]) }
        ));
        assert!(!clause_matches(
            &doc,
            &FilterClause { field: "status".into(), op: FilterOp::In, value: json!(["closed"]) }
        ));
    }

    #[test]
    fn sort_parses_prefix_and_defaults_to_ascending() {
        let asc = SortClause::parse("name").unwrap();
        assert_eq!(asc.direction, SortDirection::Asc);
        let desc = SortClause::parse("-created_at").unwrap();
        assert_eq!(desc.direction, SortDirection::Desc);
        assert_eq!(desc.field, "created_at");
    }

    #[test]
    fn sort_docs_orders_by_multiple_fields() {
        let mut docs = vec![json!({"a": 1, "b": 2}), json!({"a": 1, "b": 1}), json!({"a": 0, "b": 5})];
        sort_docs(
            &mut docs,
            &[
                SortClause { field: "a".into(), direction: SortDirection::Asc },
                SortClause { field: "b".into(), direction: SortDirection::Asc },
            ],
        );
        assert_eq!(docs[0]["a"], json!(0));
        assert_eq!(docs[1]["b"], json!(1));
        assert_eq!(docs[2]["b"], json!(2));
    }

    #[test]
    fn effective_limit_is_capped() {
        let opts = QueryOptions { limit: Some(5_000), ..Default::default() };
        assert_eq!(opts.effective_limit(), MAX_LIMIT);
        let opts = QueryOptions::default();
        assert_eq!(opts.effective_limit(), DEFAULT_LIMIT);
    }
}

//! Filter, ordering and limit model for record selection.
//!
//! A [`Query`] is rendered to REST query pairs for the HTTP binding
//! (`col=eq.value`, `col=in.(a,b)`, `order=col.desc`, `limit=n`) and evaluated
//! directly against JSON rows by the in-memory binding.

use serde_json::Value;
use std::cmp::Ordering;

/// Largest row count a single select may request.
pub const MAX_LIMIT: usize = 1000;

/// A predicate on one column.
#[derive(Clone, Debug, PartialEq)]
pub enum Filter {
    Eq(String, Value),
    Neq(String, Value),
    Gt(String, Value),
    Gte(String, Value),
    Lt(String, Value),
    Lte(String, Value),
    /// SQL LIKE pattern (`%` any run, `_` one character).
    Like(String, String),
    /// Case-insensitive LIKE.
    ILike(String, String),
    IsNull(String),
    NotNull(String),
    In(String, Vec<Value>),
}

impl Filter {
    pub fn eq(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Filter::Eq(column.into(), value.into())
    }

    pub fn neq(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Filter::Neq(column.into(), value.into())
    }

    pub fn gt(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Filter::Gt(column.into(), value.into())
    }

    pub fn gte(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Filter::Gte(column.into(), value.into())
    }

    pub fn lt(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Filter::Lt(column.into(), value.into())
    }

    pub fn lte(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Filter::Lte(column.into(), value.into())
    }

    pub fn like(column: impl Into<String>, pattern: impl Into<String>) -> Self {
        Filter::Like(column.into(), pattern.into())
    }

    pub fn ilike(column: impl Into<String>, pattern: impl Into<String>) -> Self {
        Filter::ILike(column.into(), pattern.into())
    }

    pub fn is_null(column: impl Into<String>) -> Self {
        Filter::IsNull(column.into())
    }

    pub fn not_null(column: impl Into<String>) -> Self {
        Filter::NotNull(column.into())
    }

    pub fn is_in<V: Into<Value>>(column: impl Into<String>, values: impl IntoIterator<Item = V>) -> Self {
        Filter::In(column.into(), values.into_iter().map(Into::into).collect())
    }

    /// The column this predicate applies to.
    pub fn column(&self) -> &str {
        match self {
            Filter::Eq(c, _)
            | Filter::Neq(c, _)
            | Filter::Gt(c, _)
            | Filter::Gte(c, _)
            | Filter::Lt(c, _)
            | Filter::Lte(c, _)
            | Filter::Like(c, _)
            | Filter::ILike(c, _)
            | Filter::IsNull(c)
            | Filter::NotNull(c)
            | Filter::In(c, _) => c,
        }
    }

    /// Render as a `(column, operator.value)` query pair.
    pub fn to_pair(&self) -> (String, String) {
        let rendered = match self {
            Filter::Eq(_, v) => format!("eq.{}", render_value(v)),
            Filter::Neq(_, v) => format!("neq.{}", render_value(v)),
            Filter::Gt(_, v) => format!("gt.{}", render_value(v)),
            Filter::Gte(_, v) => format!("gte.{}", render_value(v)),
            Filter::Lt(_, v) => format!("lt.{}", render_value(v)),
            Filter::Lte(_, v) => format!("lte.{}", render_value(v)),
            Filter::Like(_, p) => format!("like.{}", p),
            Filter::ILike(_, p) => format!("ilike.{}", p),
            Filter::IsNull(_) => "is.null".to_string(),
            Filter::NotNull(_) => "not.is.null".to_string(),
            Filter::In(_, values) => {
                let items: Vec<String> = values.iter().map(render_list_item).collect();
                format!("in.({})", items.join(","))
            }
        };
        (self.column().to_string(), rendered)
    }

    /// Whether `row` satisfies this predicate.
    ///
    /// A missing column behaves like SQL NULL: it only matches `IsNull`.
    pub fn matches(&self, row: &Value) -> bool {
        let field = row.get(self.column()).filter(|v| !v.is_null());
        match (self, field) {
            (Filter::IsNull(_), field) => field.is_none(),
            (Filter::NotNull(_), field) => field.is_some(),
            (_, None) => false,
            (Filter::Eq(_, v), Some(f)) => compare(f, v) == Some(Ordering::Equal),
            (Filter::Neq(_, v), Some(f)) => compare(f, v).is_some_and(|o| o != Ordering::Equal),
            (Filter::Gt(_, v), Some(f)) => compare(f, v) == Some(Ordering::Greater),
            (Filter::Gte(_, v), Some(f)) => {
                matches!(compare(f, v), Some(Ordering::Greater | Ordering::Equal))
            }
            (Filter::Lt(_, v), Some(f)) => compare(f, v) == Some(Ordering::Less),
            (Filter::Lte(_, v), Some(f)) => {
                matches!(compare(f, v), Some(Ordering::Less | Ordering::Equal))
            }
            (Filter::Like(_, p), Some(f)) => like_matches(p, f, false),
            (Filter::ILike(_, p), Some(f)) => like_matches(p, f, true),
            (Filter::In(_, values), Some(f)) => values
                .iter()
                .any(|v| compare(f, v) == Some(Ordering::Equal)),
        }
    }
}

fn render_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn render_list_item(value: &Value) -> String {
    let raw = render_value(value);
    if raw.contains([',', '(', ')', '"', ' ']) {
        format!("\"{}\"", raw.replace('\\', "\\\\").replace('"', "\\\""))
    } else {
        raw
    }
}

/// Compare two JSON scalars the way the database would.
///
/// Numbers compare numerically, strings lexically (which orders ISO-8601
/// timestamps correctly), booleans by value. Mixed types do not compare.
pub(crate) fn compare(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64()?.partial_cmp(&y.as_f64()?),
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
        // Ids are often sent as strings but stored as numbers, or vice versa.
        (Value::Number(x), Value::String(y)) => x.to_string().partial_cmp(y),
        (Value::String(x), Value::Number(y)) => x.partial_cmp(&y.to_string()),
        _ => None,
    }
}

fn like_matches(pattern: &str, field: &Value, case_insensitive: bool) -> bool {
    let Value::String(text) = field else {
        return false;
    };
    let mut regex = String::from(if case_insensitive { "(?is)^" } else { "(?s)^" });
    let mut literal = String::new();
    for ch in pattern.chars() {
        match ch {
            '%' | '_' => {
                regex.push_str(&regex_lite::escape(&literal));
                literal.clear();
                regex.push_str(if ch == '%' { ".*" } else { "." });
            }
            other => literal.push(other),
        }
    }
    regex.push_str(&regex_lite::escape(&literal));
    regex.push('$');

    match regex_lite::Regex::new(&regex) {
        Ok(re) => re.is_match(text),
        Err(e) => {
            tracing::warn!(pattern, error = %e, "Unusable LIKE pattern");
            false
        }
    }
}

/// Single-column ordering.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Order {
    pub column: String,
    pub ascending: bool,
}

impl Order {
    pub fn asc(column: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            ascending: true,
        }
    }

    pub fn desc(column: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            ascending: false,
        }
    }

    fn render(&self) -> String {
        format!(
            "{}.{}",
            self.column,
            if self.ascending { "asc" } else { "desc" }
        )
    }

    /// Compare two rows by this ordering. NULLs sort last in both directions.
    pub(crate) fn compare_rows(&self, a: &Value, b: &Value) -> Ordering {
        let left = a.get(&self.column).filter(|v| !v.is_null());
        let right = b.get(&self.column).filter(|v| !v.is_null());
        match (left, right) {
            (None, None) => Ordering::Equal,
            (None, Some(_)) => Ordering::Greater,
            (Some(_), None) => Ordering::Less,
            (Some(l), Some(r)) => {
                let ord = compare(l, r).unwrap_or(Ordering::Equal);
                if self.ascending {
                    ord
                } else {
                    ord.reverse()
                }
            }
        }
    }
}

/// A selection: conjunction of filters, optional ordering, optional limit.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Query {
    pub filters: Vec<Filter>,
    pub order: Option<Order>,
    pub limit: Option<usize>,
}

impl Query {
    pub fn new() -> Self {
        Self::default()
    }

    /// Match the record with the given id.
    pub fn by_id(id: impl Into<Value>) -> Self {
        Self::new().filter(Filter::Eq("id".to_string(), id.into())).limit(1)
    }

    /// Add a predicate; all predicates must hold.
    pub fn filter(mut self, filter: Filter) -> Self {
        self.filters.push(filter);
        self
    }

    pub fn order(mut self, order: Order) -> Self {
        self.order = Some(order);
        self
    }

    /// Cap the row count, clamped to `[1, MAX_LIMIT]`.
    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit.clamp(1, MAX_LIMIT));
        self
    }

    /// Whether `row` satisfies every filter.
    pub fn matches(&self, row: &Value) -> bool {
        self.filters.iter().all(|f| f.matches(row))
    }

    /// Render as REST query pairs.
    pub fn to_pairs(&self) -> Vec<(String, String)> {
        let mut pairs: Vec<(String, String)> = self.filters.iter().map(Filter::to_pair).collect();
        if let Some(order) = &self.order {
            pairs.push(("order".to_string(), order.render()));
        }
        if let Some(limit) = self.limit {
            pairs.push(("limit".to_string(), limit.to_string()));
        }
        pairs
    }

    /// Filter, order and truncate `rows` in memory.
    pub fn apply(&self, rows: impl IntoIterator<Item = Value>) -> Vec<Value> {
        let mut selected: Vec<Value> = rows.into_iter().filter(|r| self.matches(r)).collect();
        if let Some(order) = &self.order {
            selected.sort_by(|a, b| order.compare_rows(a, b));
        }
        if let Some(limit) = self.limit {
            selected.truncate(limit);
        }
        selected
    }
}

//! Filter language shared by every query.
//!
//! A filter list is a JSON array of `[field, op, value]` triples that are AND-ed together, plus
//! `["OR", [branch, ...]]` where each branch is either a triple, a nested `OR` or a list of
//! triples that are AND-ed. Fields may be dotted (`properties.used.parsed`), a literal dot is
//! written as `\.`.
//!
//! | op | meaning |
//! |---|---|
//! | `=`, `!=`, `>`, `>=`, `<`, `<=` | comparison |
//! | `in`, `nin` | value is (not) in the list |
//! | `rin`, `rnin` | list/string field does (not) contain the value |
//! | `~` | regex match of the stringified field, anchored at the start |
//! | `^`, `$`, `!^`, `!$` | string prefix / suffix |
//!
//! Every operator can be prefixed with `C` to compare case-insensitively.
//!
//! Operators and shapes are checked when the filter list is parsed, so a bad filter never gets
//! as far as enumeration.
use std::{cmp::Ordering, collections::BTreeSet};

use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::{query::QueryOptions, Error, Result, ValidationError, ValidationResult};

/// How deep `OR` can nest.
pub const MAX_OR_DEPTH: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    Eq,
    Ne,
    Gt,
    Ge,
    Lt,
    Le,
    In,
    Nin,
    Rin,
    Rnin,
    Match,
    StartsWith,
    EndsWith,
    NotStartsWith,
    NotEndsWith,
}

impl Operator {
    /// Operator and casefold flag.
    pub fn parse(token: &str) -> Option<(Operator, bool)> {
        let (casefold, token) = match token.strip_prefix('C') {
            Some(rest) => (true, rest),
            None => (false, token),
        };
        let op = match token {
            "=" => Operator::Eq,
            "!=" => Operator::Ne,
            ">" => Operator::Gt,
            ">=" => Operator::Ge,
            "<" => Operator::Lt,
            "<=" => Operator::Le,
            "in" => Operator::In,
            "nin" => Operator::Nin,
            "rin" => Operator::Rin,
            "rnin" => Operator::Rnin,
            "~" => Operator::Match,
            "^" => Operator::StartsWith,
            "$" => Operator::EndsWith,
            "!^" => Operator::NotStartsWith,
            "!$" => Operator::NotEndsWith,
            _ => return None,
        };
        Some((op, casefold))
    }
}

/// Dotted path into a row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldPath {
    segments: Vec<String>,
}

impl FieldPath {
    pub fn parse(raw: &str) -> FieldPath {
        let mut segments = Vec::new();
        let mut current = String::new();
        let mut chars = raw.chars().peekable();
        while let Some(c) = chars.next() {
            match c {
                '\\' if chars.peek() == Some(&'.') => {
                    chars.next();
                    current.push('.');
                },
                '.' => segments.push(std::mem::take(&mut current)),
                _ => current.push(c),
            }
        }
        segments.push(current);
        FieldPath { segments }
    }

    pub fn segments(&self) -> &[String] { &self.segments }

    /// First segment.
    pub fn head(&self) -> &str { self.segments.first().map_or("", String::as_str) }

    pub fn is_nested(&self) -> bool { self.segments.len() > 1 }

    pub fn lookup<'a>(&self, row: &'a Value) -> Option<&'a Value> {
        self.segments.iter().try_fold(row, |value, segment| value.as_object()?.get(segment))
    }

    /// Write `value` at this path, creating intermediate objects.
    fn insert(&self, target: &mut Map<String, Value>, value: Value) {
        let (last, parents) = match self.segments.split_last() {
            Some(split) => split,
            None => return,
        };
        let mut current = target;
        for segment in parents {
            let entry = current.entry(segment.clone()).or_insert_with(|| Value::Object(Map::new()));
            if !entry.is_object() {
                *entry = Value::Object(Map::new());
            }
            current = match entry.as_object_mut() {
                Some(map) => map,
                None => return,
            };
        }
        current.insert(last.clone(), value);
    }
}

#[derive(Debug, Clone)]
pub struct Leaf {
    field:    FieldPath,
    op:       Operator,
    casefold: bool,
    value:    Value,
    regex:    Option<Regex>,
}

#[derive(Debug, Clone)]
pub enum Filter {
    Leaf(Leaf),
    /// Any branch matches. Each branch is AND-ed.
    Or(Vec<Vec<Filter>>),
}

/// Parsed, validated filter list. Top-level entries are AND-ed.
#[derive(Debug, Clone, Default)]
pub struct Filters {
    inner: Vec<Filter>,
}

fn bad_filter<S: Into<String>>(reason: S) -> ValidationError { ValidationError::BadFilter(reason.into()) }

impl Leaf {
    pub fn new(field: &str, op: &str, value: Value) -> ValidationResult<Leaf> {
        let (op, casefold) =
            Operator::parse(op).ok_or_else(|| bad_filter(format!("unknown operator {:?}", op)))?;
        let regex = match op {
            Operator::Match => {
                let pattern = value
                    .as_str()
                    .ok_or_else(|| bad_filter("regex operand must be a string"))?;
                let regex = RegexBuilder::new(&format!("^(?:{})", pattern))
                    .case_insensitive(casefold)
                    .build()
                    .map_err(|e| bad_filter(e.to_string()))?;
                Some(regex)
            },
            Operator::In | Operator::Nin if !(value.is_array() || value.is_string()) => {
                return Err(bad_filter("in/nin operand must be a list"));
            },
            _ => None,
        };
        Ok(Leaf { field: FieldPath::parse(field), op, casefold, value, regex })
    }

    pub fn field(&self) -> &FieldPath { &self.field }

    pub fn op(&self) -> Operator { self.op }

    pub fn value(&self) -> &Value { &self.value }

    fn fold(&self, s: &str) -> String {
        if self.casefold {
            s.to_lowercase()
        } else {
            s.to_string()
        }
    }

    fn equal(&self, a: &Value, b: &Value) -> bool {
        match (a, b) {
            (Value::String(a), Value::String(b)) => self.fold(a) == self.fold(b),
            (Value::Number(a), Value::Number(b)) => a.as_f64() == b.as_f64(),
            _ => a == b,
        }
    }

    fn contains(&self, haystack: &Value, needle: &Value) -> bool {
        match haystack {
            Value::Array(items) => items.iter().any(|item| self.equal(item, needle)),
            Value::String(s) => needle.as_str().map_or(false, |n| self.fold(s).contains(&self.fold(n))),
            _ => false,
        }
    }

    fn strings<'a>(&self, actual: &'a Value) -> Option<(String, String)> {
        Some((self.fold(actual.as_str()?), self.fold(self.value.as_str()?)))
    }

    pub fn matches(&self, row: &Value) -> bool {
        let actual = self.field.lookup(row).unwrap_or(&Value::Null);
        match self.op {
            Operator::Eq => self.equal(actual, &self.value),
            Operator::Ne => !self.equal(actual, &self.value),
            Operator::Gt => compare_loose(actual, &self.value) == Some(Ordering::Greater),
            Operator::Ge => matches!(
                compare_loose(actual, &self.value),
                Some(Ordering::Greater) | Some(Ordering::Equal)
            ),
            Operator::Lt => compare_loose(actual, &self.value) == Some(Ordering::Less),
            Operator::Le => matches!(
                compare_loose(actual, &self.value),
                Some(Ordering::Less) | Some(Ordering::Equal)
            ),
            Operator::In => self.contains(&self.value, actual),
            Operator::Nin => !self.contains(&self.value, actual),
            Operator::Rin => self.contains(actual, &self.value),
            Operator::Rnin => !self.contains(actual, &self.value),
            Operator::Match => match (&self.regex, actual) {
                (_, Value::Null) => false,
                (Some(regex), actual) => regex.is_match(&stringify(actual)),
                (None, _) => false,
            },
            Operator::StartsWith => self.strings(actual).map_or(false, |(a, v)| a.starts_with(&v)),
            Operator::EndsWith => self.strings(actual).map_or(false, |(a, v)| a.ends_with(&v)),
            Operator::NotStartsWith => {
                self.strings(actual).map_or(false, |(a, v)| !a.starts_with(&v))
            },
            Operator::NotEndsWith => self.strings(actual).map_or(false, |(a, v)| !a.ends_with(&v)),
        }
    }
}

impl Filter {
    pub fn leaf(field: &str, op: &str, value: Value) -> ValidationResult<Filter> {
        Leaf::new(field, op, value).map(Filter::Leaf)
    }

    fn parse(raw: &Value, depth: usize) -> ValidationResult<Filter> {
        let items = raw.as_array().ok_or_else(|| bad_filter(format!("{} is not a list", raw)))?;
        match items.as_slice() {
            [Value::String(or), Value::Array(branches)] if or == "OR" => {
                if depth >= MAX_OR_DEPTH {
                    return Err(bad_filter("query-filters max recursion depth exceeded"));
                }
                let branches = branches
                    .iter()
                    .map(|branch| match branch.as_array().and_then(|b| b.first()) {
                        Some(Value::Array(_)) => branch
                            .as_array()
                            .into_iter()
                            .flatten()
                            .map(|f| Filter::parse(f, depth + 1))
                            .collect::<ValidationResult<Vec<Filter>>>(),
                        _ => Filter::parse(branch, depth + 1).map(|f| vec![f]),
                    })
                    .collect::<ValidationResult<Vec<Vec<Filter>>>>()?;
                Ok(Filter::Or(branches))
            },
            [Value::String(field), Value::String(op), value] => Filter::leaf(field, op, value.clone()),
            _ => Err(bad_filter(format!("invalid filter {}", raw))),
        }
    }

    pub fn matches(&self, row: &Value) -> bool {
        match self {
            Filter::Leaf(leaf) => leaf.matches(row),
            Filter::Or(branches) => branches.iter().any(|all| all.iter().all(|f| f.matches(row))),
        }
    }

    fn collect_fields<'a>(&'a self, out: &mut Vec<&'a FieldPath>) {
        match self {
            Filter::Leaf(leaf) => out.push(&leaf.field),
            Filter::Or(branches) => branches.iter().flatten().for_each(|f| f.collect_fields(out)),
        }
    }
}

impl Filters {
    pub fn new(inner: Vec<Filter>) -> Filters { Filters { inner } }

    /// Parse a JSON filter list. `null` is the empty list.
    pub fn from_json(raw: &Value) -> ValidationResult<Filters> {
        match raw {
            Value::Null => Ok(Filters::default()),
            Value::Array(items) => {
                items.iter().map(|f| Filter::parse(f, 0)).collect::<ValidationResult<_>>().map(Filters::new)
            },
            other => Err(bad_filter(format!("{} is not a list", other))),
        }
    }

    pub fn is_empty(&self) -> bool { self.inner.is_empty() }

    pub fn len(&self) -> usize { self.inner.len() }

    pub fn iter(&self) -> impl Iterator<Item = &Filter> { self.inner.iter() }

    pub fn matches(&self, row: &Value) -> bool { self.inner.iter().all(|f| f.matches(row)) }

    pub fn push(&mut self, filter: Filter) { self.inner.push(filter); }

    /// Every field referenced anywhere in the list.
    pub fn fields(&self) -> Vec<&FieldPath> {
        let mut out = Vec::new();
        self.inner.iter().for_each(|f| f.collect_fields(&mut out));
        out
    }

    /// Top-level filter on `field` exists.
    pub fn has_top_level(&self, field: &str) -> bool {
        self.inner.iter().any(|f| match f {
            Filter::Leaf(leaf) => !leaf.field.is_nested() && leaf.field.head() == field,
            Filter::Or(_) => false,
        })
    }

    /// When every filter is `name`/`id` with `=` or `in`, the names they admit.
    pub fn exact_names(&self) -> Option<Vec<String>> {
        if self.inner.is_empty() {
            return None;
        }
        let mut sets: Vec<BTreeSet<String>> = Vec::with_capacity(self.inner.len());
        for filter in &self.inner {
            let leaf = match filter {
                Filter::Leaf(leaf) if !leaf.casefold && !leaf.field.is_nested() => leaf,
                _ => return None,
            };
            if leaf.field.head() != "name" && leaf.field.head() != "id" {
                return None;
            }
            let names: BTreeSet<String> = match (leaf.op, &leaf.value) {
                (Operator::Eq, Value::String(name)) => std::iter::once(name.clone()).collect(),
                (Operator::In, Value::Array(items)) => items
                    .iter()
                    .map(|item| item.as_str().map(String::from))
                    .collect::<Option<_>>()?,
                _ => return None,
            };
            sets.push(names);
        }
        let mut sets = sets.into_iter();
        let first = sets.next()?;
        let names = sets.fold(first, |acc, set| acc.intersection(&set).cloned().collect());
        Some(names.into_iter().collect())
    }
}

/// Python-ish `str()` of a JSON value.
fn stringify(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Numbers with numbers, strings with strings, numeric strings with numbers.
fn compare_loose(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(a), Value::Number(b)) => a.as_f64()?.partial_cmp(&b.as_f64()?),
        (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
        (Value::String(a), Value::Number(b)) => a.parse::<f64>().ok()?.partial_cmp(&b.as_f64()?),
        (Value::Number(a), Value::String(b)) => a.as_f64()?.partial_cmp(&b.parse::<f64>().ok()?),
        _ => None,
    }
}

fn type_rank(value: &Value) -> u8 {
    match value {
        Value::Null => 0,
        Value::Bool(_) => 1,
        Value::Number(_) => 2,
        Value::String(_) => 3,
        Value::Array(_) => 4,
        Value::Object(_) => 5,
    }
}

/// Total order used by `order_by`.
fn compare_total(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (Value::Bool(a), Value::Bool(b)) => a.cmp(b),
        (Value::Number(a), Value::Number(b)) => {
            let (a, b) = (a.as_f64().unwrap_or(0.0), b.as_f64().unwrap_or(0.0));
            a.partial_cmp(&b).unwrap_or(Ordering::Equal)
        },
        (Value::String(a), Value::String(b)) => a.cmp(b),
        (Value::Array(a), Value::Array(b)) => a
            .iter()
            .zip(b.iter())
            .map(|(a, b)| compare_total(a, b))
            .find(|o| *o != Ordering::Equal)
            .unwrap_or_else(|| a.len().cmp(&b.len())),
        _ => type_rank(a).cmp(&type_rank(b)),
    }
}

/// `[field, alias]` or plain `field`.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(untagged)]
pub enum Selector {
    Field(String),
    Alias(String, String),
}

impl From<&str> for Selector {
    fn from(field: &str) -> Selector { Selector::Field(field.to_string()) }
}

impl Selector {
    pub fn is_nested(&self) -> bool {
        match self {
            Selector::Field(field) => FieldPath::parse(field).is_nested(),
            Selector::Alias(..) => true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Nulls {
    First,
    Last,
    Natural,
}

#[derive(Debug, Clone)]
struct OrderKey {
    field:   FieldPath,
    reverse: bool,
    nulls:   Nulls,
}

impl OrderKey {
    fn parse(raw: &str) -> OrderKey {
        let (nulls, rest) = if let Some(rest) = raw.strip_prefix("nulls_first:") {
            (Nulls::First, rest)
        } else if let Some(rest) = raw.strip_prefix("nulls_last:") {
            (Nulls::Last, rest)
        } else {
            (Nulls::Natural, raw)
        };
        let (reverse, field) = match rest.strip_prefix('-') {
            Some(field) => (true, field),
            None => (false, rest),
        };
        OrderKey { field: FieldPath::parse(field), reverse, nulls }
    }

    fn compare(&self, a: &Value, b: &Value) -> Ordering {
        let a = self.field.lookup(a).filter(|v| !v.is_null());
        let b = self.field.lookup(b).filter(|v| !v.is_null());
        let nulls_first = match self.nulls {
            Nulls::First => true,
            Nulls::Last => false,
            Nulls::Natural => !self.reverse,
        };
        match (a, b) {
            (None, None) => Ordering::Equal,
            (None, Some(_)) if nulls_first => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (Some(_), None) if nulls_first => Ordering::Greater,
            (Some(_), None) => Ordering::Less,
            (Some(a), Some(b)) => {
                let ord = compare_total(a, b);
                if self.reverse {
                    ord.reverse()
                } else {
                    ord
                }
            },
        }
    }
}

/// Stable sort by `order_by` expressions.
pub fn do_order(rows: &mut [Value], order_by: &[String]) {
    if order_by.is_empty() {
        return;
    }
    let keys: Vec<OrderKey> = order_by.iter().map(|raw| OrderKey::parse(raw)).collect();
    rows.sort_by(|a, b| {
        keys.iter()
            .map(|key| key.compare(a, b))
            .find(|o| *o != Ordering::Equal)
            .unwrap_or(Ordering::Equal)
    });
}

/// Project a row. Missing fields come out as `null`.
pub fn do_select(row: &Value, select: &[Selector]) -> Value {
    if select.is_empty() {
        return row.clone();
    }
    let mut out = Map::new();
    for selector in select {
        match selector {
            Selector::Field(field) => {
                let path = FieldPath::parse(field);
                let value = path.lookup(row).cloned().unwrap_or(Value::Null);
                path.insert(&mut out, value);
            },
            Selector::Alias(field, alias) => {
                let value = FieldPath::parse(field).lookup(row).cloned().unwrap_or(Value::Null);
                out.insert(alias.clone(), value);
            },
        }
    }
    Value::Object(out)
}

/// What a query returns, depending on `count` and `get`.
#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(untagged)]
pub enum QueryResult {
    Count(usize),
    Row(Value),
    Rows(Vec<Value>),
}

impl QueryResult {
    /// Rows of the result. A single row becomes a list of one, a count becomes empty.
    pub fn into_rows(self) -> Vec<Value> {
        match self {
            QueryResult::Rows(rows) => rows,
            QueryResult::Row(row) => vec![row],
            QueryResult::Count(_) => Vec::new(),
        }
    }

    pub fn count(&self) -> Option<usize> {
        match self {
            QueryResult::Count(count) => Some(*count),
            _ => None,
        }
    }
}

/// `get` over already filtered rows.
pub(crate) fn exactly_one(mut rows: Vec<Value>) -> Result<Value> {
    match rows.len() {
        0 => Err(Error::MatchNotFound),
        1 => Ok(rows.remove(0)),
        n => Err(Error::TooManyMatches(n)),
    }
}

/// Filter, order, then apply `count`, `get`, `offset`, `limit` and `select`.
pub fn filter_list(rows: Vec<Value>, filters: &Filters, options: &QueryOptions) -> Result<QueryResult> {
    let mut rows: Vec<Value> = rows.into_iter().filter(|row| filters.matches(row)).collect();
    do_order(&mut rows, options.order_by());
    if *options.count() {
        return Ok(QueryResult::Count(rows.len()));
    }
    if *options.get() {
        let row = exactly_one(rows)?;
        return Ok(QueryResult::Row(do_select(&row, options.select())));
    }
    let rows = paginate(rows, *options.offset(), *options.limit());
    Ok(QueryResult::Rows(rows.iter().map(|row| do_select(row, options.select())).collect()))
}

/// `limit == 0` is unlimited.
pub(crate) fn paginate<T>(rows: Vec<T>, offset: usize, limit: usize) -> Vec<T> {
    let rows = rows.into_iter().skip(offset);
    if limit == 0 {
        rows.collect()
    } else {
        rows.take(limit).collect()
    }
}

#[cfg(test)]
mod test {
    use serde_json::json;

    use super::*;
    use crate::zfs::{query::QueryOptionsBuilder, ErrorKind};

    fn data() -> Vec<Value> {
        vec![
            json!({"foo": "foo1", "number": 1, "list": [1]}),
            json!({"foo": "foo2", "number": 2, "list": [2]}),
            json!({"foo": "_foo_", "number": 3, "list": [3]}),
        ]
    }

    fn count(filters: Value) -> usize {
        let filters = Filters::from_json(&filters).unwrap();
        data().iter().filter(|row| filters.matches(row)).count()
    }

    #[test]
    fn operators() {
        assert_eq!(1, count(json!([["foo", "=", "foo1"]])));
        assert_eq!(2, count(json!([["foo", "^", "foo"]])));
        assert_eq!(1, count(json!([["foo", "$", "_"]])));
        assert_eq!(2, count(json!([["foo", "~", "foo"]])));
        assert_eq!(3, count(json!([["foo", "~", ".*foo.*"]])));
        assert_eq!(2, count(json!([["number", ">", 1]])));
        assert_eq!(3, count(json!([["number", ">=", 1]])));
        assert_eq!(2, count(json!([["number", "<", 3]])));
        assert_eq!(3, count(json!([["number", "<=", 3]])));
        assert_eq!(2, count(json!([["number", "in", [1, 3]]])));
        assert_eq!(1, count(json!([["number", "nin", [1, 3]]])));
        assert_eq!(1, count(json!([["list", "rin", 1]])));
        assert_eq!(2, count(json!([["list", "rnin", 1]])));
        assert_eq!(1, count(json!([["foo", "C=", "FOO1"]])));
        assert_eq!(1, count(json!([["foo", "!^", "foo"]])));
    }

    #[test]
    fn or_branches() {
        assert_eq!(1, count(json!([["OR", [["number", "=", 1], ["number", "=", 200]]]])));
        assert_eq!(2, count(json!([["OR", [[["number", "=", 1], ["foo", "=", "foo1"]], ["number", "=", 2]]]])));
        assert_eq!(1, count(json!([["OR", [[["number", "=", 1], ["foo", "=", "foo2"]], ["number", "=", 2]]]])));
        assert_eq!(
            2,
            count(json!([["OR", [["OR", [["OR", [["number", "=", 1], ["number", "=", "x"]]], ["foo", "=", "x"]]], ["number", "=", 2]]]]))
        );
    }

    #[test]
    fn rejected_filters() {
        let too_deep = json!([["OR", [["OR", [["OR", [["OR", [["number", "=", 1]]]]]]]]]]);
        assert!(Filters::from_json(&too_deep).is_err());
        assert!(Filters::from_json(&json!([["foo", "like", "x"]])).is_err());
        assert!(Filters::from_json(&json!([["foo", "="]])).is_err());
        assert!(Filters::from_json(&json!([["foo", "~", "("]])).is_err());
        assert!(Filters::from_json(&json!({"foo": 1})).is_err());
        assert!(Filters::from_json(&Value::Null).unwrap().is_empty());
    }

    #[test]
    fn nested_fields() {
        let row = json!({"properties": {"used": {"parsed": 10}}, "foo.bar": 45});
        let filters = Filters::from_json(&json!([["properties.used.parsed", ">", 5]])).unwrap();
        assert!(filters.matches(&row));
        let selected = do_select(&row, &[Selector::from("properties.used.parsed"), Selector::from("foo\\.bar")]);
        assert_eq!(json!({"properties": {"used": {"parsed": 10}}, "foo.bar": 45}), selected);
        let aliased = do_select(&row, &[Selector::Alias("properties.used.parsed".into(), "used".into())]);
        assert_eq!(json!({"used": 10}), aliased);
        assert_eq!(json!({"missing": null}), do_select(&row, &[Selector::from("missing")]));
    }

    #[test]
    fn exact_names() {
        let filters = Filters::from_json(&json!([["name", "in", ["tank/a", "tank/b"]], ["id", "=", "tank/a"]])).unwrap();
        assert_eq!(Some(vec![String::from("tank/a")]), filters.exact_names());
        let filters = Filters::from_json(&json!([["name", "=", "tank/a"], ["pool", "=", "tank"]])).unwrap();
        assert_eq!(None, filters.exact_names());
        let filters = Filters::from_json(&json!([["name", "^", "tank"]])).unwrap();
        assert_eq!(None, filters.exact_names());
    }

    #[test]
    fn ordering_and_nulls() {
        let mut rows = vec![json!({"foo": "b"}), json!({"foo": null}), json!({"foo": "a"}), json!({})];
        do_order(&mut rows, &[String::from("nulls_last:foo")]);
        assert_eq!(json!("a"), rows[0]["foo"]);
        assert!(rows[3].get("foo").map_or(true, Value::is_null));
        do_order(&mut rows, &[String::from("nulls_first:-foo")]);
        assert!(rows[0].get("foo").map_or(true, Value::is_null));
        assert_eq!(json!("b"), rows[2]["foo"]);
    }

    #[test]
    fn list_options() {
        let options = QueryOptionsBuilder::default().order_by(vec![String::from("-number")]).build().unwrap();
        let rows = filter_list(data(), &Filters::default(), &options).unwrap().into_rows();
        assert_eq!(json!(3), rows[0]["number"]);

        let options = QueryOptionsBuilder::default().offset(1usize).limit(1usize).build().unwrap();
        let rows = filter_list(data(), &Filters::default(), &options).unwrap().into_rows();
        assert_eq!(vec![json!({"foo": "foo2", "number": 2, "list": [2]})], rows);

        let options = QueryOptionsBuilder::default().count(true).build().unwrap();
        assert_eq!(Some(3), filter_list(data(), &Filters::default(), &options).unwrap().count());

        let options = QueryOptionsBuilder::default().get(true).build().unwrap();
        let err = filter_list(data(), &Filters::default(), &options).unwrap_err();
        assert_eq!(ErrorKind::TooManyMatches, err.kind());
        let none = Filters::from_json(&json!([["number", "=", 7]])).unwrap();
        assert_eq!(ErrorKind::MatchNotFound, filter_list(data(), &none, &options).unwrap_err().kind());
        let one = Filters::from_json(&json!([["number", "=", 2]])).unwrap();
        assert_eq!(QueryResult::Row(data().remove(1)), filter_list(data(), &one, &options).unwrap());
    }
}

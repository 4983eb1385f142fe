//! Query options model.
//!
//! Store-agnostic description of a read: match condition, projection,
//! relations to include, sort order and pagination window.

use std::cmp::Ordering;
use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use common::{AppError, AppResult};
use domain::DEFAULT_PAGE_NUMBER;

/// Store-facing shape of an entity: field name to JSON value.
pub type Record = Map<String, Value>;

// =============================================================================
// Filter
// =============================================================================

/// Partial-entity match condition.
///
/// Each entry is an equality test on one field. A `null` value matches
/// records where the field is null or missing; fields not listed are
/// unconstrained.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Filter(Record);

impl Filter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an equality condition on `field`
    pub fn eq(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0.insert(field.into(), value.into());
        self
    }

    /// Build a filter from any value serializing to a JSON object
    pub fn from_partial<P: Serialize>(partial: &P) -> serde_json::Result<Self> {
        match serde_json::to_value(partial)? {
            Value::Object(map) => Ok(Self(map)),
            _ => Ok(Self::default()),
        }
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.0.get(field)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Conditions from `other` replace ours on the same field
    pub fn merge(mut self, other: Filter) -> Self {
        self.0.extend(other.0);
        self
    }

    /// Evaluate the condition against a record
    pub fn matches(&self, record: &Record) -> bool {
        self.0.iter().all(|(field, expected)| {
            let actual = record.get(field).unwrap_or(&Value::Null);
            compare_values(actual, expected) == Ordering::Equal
        })
    }
}

impl From<Record> for Filter {
    fn from(record: Record) -> Self {
        Self(record)
    }
}

/// Total order over JSON scalars used for sorting and equality.
///
/// null < bool < number < string < array < object; arrays and objects
/// compare equal only when structurally equal.
pub fn compare_values(a: &Value, b: &Value) -> Ordering {
    fn rank(value: &Value) -> u8 {
        match value {
            Value::Null => 0,
            Value::Bool(_) => 1,
            Value::Number(_) => 2,
            Value::String(_) => 3,
            Value::Array(_) => 4,
            Value::Object(_) => 5,
        }
    }

    match (a, b) {
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        (Value::Number(x), Value::Number(y)) => match (x.as_i64(), y.as_i64()) {
            (Some(x), Some(y)) => x.cmp(&y),
            _ => x
                .as_f64()
                .partial_cmp(&y.as_f64())
                .unwrap_or(Ordering::Equal),
        },
        (Value::String(x), Value::String(y)) => x.cmp(y),
        (x, y) if rank(x) != rank(y) => rank(x).cmp(&rank(y)),
        (x, y) if x == y => Ordering::Equal,
        // Same-rank containers with different content: keep a stable answer
        (x, y) => x.to_string().cmp(&y.to_string()),
    }
}

// =============================================================================
// Sorting, projection, relations
// =============================================================================

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    #[default]
    Asc,
    Desc,
}

/// One sort key. Earlier keys take precedence over later ones.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderBy {
    pub field: String,
    pub order: SortOrder,
}

impl OrderBy {
    pub fn asc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            order: SortOrder::Asc,
        }
    }

    pub fn desc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            order: SortOrder::Desc,
        }
    }
}

/// Field projection: field name to inclusion flag.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Selection(BTreeMap<String, bool>);

impl Selection {
    /// Select exactly the given fields
    pub fn fields<I, S>(fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(fields.into_iter().map(|f| (f.into(), true)).collect())
    }

    pub fn set(mut self, field: impl Into<String>, included: bool) -> Self {
        self.0.insert(field.into(), included);
        self
    }

    pub fn includes(&self, field: &str) -> bool {
        self.0.get(field).copied().unwrap_or(false)
    }

    /// Names of the included fields
    pub fn selected(&self) -> impl Iterator<Item = &str> {
        self.0
            .iter()
            .filter(|(_, included)| **included)
            .map(|(field, _)| field.as_str())
    }

    /// Keep only the included fields of a record
    pub fn project(&self, mut record: Record) -> Record {
        record.retain(|field, _| self.includes(field));
        record
    }
}

/// How a relation is fetched: a flag, or nested find arguments.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum IncludeSpec {
    Flag(bool),
    Nested(Box<FindArgs>),
}

impl IncludeSpec {
    pub fn is_enabled(&self) -> bool {
        !matches!(self, IncludeSpec::Flag(false))
    }

    /// Arguments for the related query (empty for a plain flag)
    pub fn args(&self) -> FindArgs {
        match self {
            IncludeSpec::Flag(_) => FindArgs::default(),
            IncludeSpec::Nested(args) => (**args).clone(),
        }
    }
}

/// Relation name to fetch spec.
pub type Include = BTreeMap<String, IncludeSpec>;

// =============================================================================
// Delegate arguments
// =============================================================================

/// Normalized arguments for `find_first`/`find_many`.
///
/// Only keys the caller supplied are present; `Some(0)` is a real value.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FindArgs {
    #[serde(rename = "where", default, skip_serializing_if = "Option::is_none")]
    pub filter: Option<Filter>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub include: Option<Include>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub select: Option<Selection>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub order_by: Option<Vec<OrderBy>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skip: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub take: Option<u64>,
}

impl FindArgs {
    pub fn filtered(filter: Filter) -> Self {
        Self {
            filter: Some(filter),
            ..Default::default()
        }
    }
}

/// Result of a bulk write.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchCount {
    pub count: u64,
}

impl BatchCount {
    pub fn new(count: u64) -> Self {
        Self { count }
    }
}

// =============================================================================
// Query options
// =============================================================================

/// Caller-facing read query. Every field is optional; an empty value
/// means "everything, first page".
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryOptions {
    #[serde(rename = "where", default, skip_serializing_if = "Option::is_none")]
    pub filter: Option<Filter>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub include: Option<Include>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub select: Option<Selection>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub order_by: Option<Vec<OrderBy>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skip: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub take: Option<u64>,
}

impl QueryOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn filter(mut self, filter: Filter) -> Self {
        self.filter = Some(filter);
        self
    }

    /// Add an equality condition, creating the filter if needed
    pub fn where_eq(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.filter = Some(self.filter.unwrap_or_default().eq(field, value));
        self
    }

    pub fn include(self, relation: impl Into<String>) -> Self {
        self.include_spec(relation, IncludeSpec::Flag(true))
    }

    pub fn include_with(self, relation: impl Into<String>, args: FindArgs) -> Self {
        self.include_spec(relation, IncludeSpec::Nested(Box::new(args)))
    }

    fn include_spec(mut self, relation: impl Into<String>, spec: IncludeSpec) -> Self {
        self.include
            .get_or_insert_with(Include::new)
            .insert(relation.into(), spec);
        self
    }

    pub fn select(mut self, selection: Selection) -> Self {
        self.select = Some(selection);
        self
    }

    pub fn order_by(mut self, entry: OrderBy) -> Self {
        self.order_by.get_or_insert_with(Vec::new).push(entry);
        self
    }

    pub fn page(mut self, page: u64) -> Self {
        self.page = Some(page);
        self
    }

    pub fn limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn skip(mut self, skip: u64) -> Self {
        self.skip = Some(skip);
        self
    }

    pub fn take(mut self, take: u64) -> Self {
        self.take = Some(take);
        self
    }

    /// Normalize into delegate arguments.
    ///
    /// `page`/`limit` become `skip = (page - 1) * limit` and `take = limit`;
    /// explicit `skip`/`take` win over the derived values. A `page`
    /// without a `limit` derives nothing. Fails with `Validation` when the
    /// derived `skip` does not fit in a `u64`.
    pub fn to_find_args(&self) -> AppResult<FindArgs> {
        let derived_skip = match (self.skip, self.page, self.limit) {
            (Some(_), _, _) => None,
            (None, Some(page), Some(limit)) => Some(
                page.max(DEFAULT_PAGE_NUMBER)
                    .saturating_sub(1)
                    .checked_mul(limit)
                    .ok_or_else(|| AppError::validation("page out of range"))?,
            ),
            (None, None, Some(_)) => Some(0),
            _ => None,
        };

        Ok(FindArgs {
            filter: self.filter.clone(),
            include: self.include.clone(),
            select: self.select.clone(),
            order_by: self.order_by.clone(),
            skip: self.skip.or(derived_skip),
            take: self.take.or(self.limit),
        })
    }
}

// =============================================================================
// Paginated result
// =============================================================================

/// One page of results plus counts over the whole match set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaginatedResult<T> {
    pub data: Vec<T>,
    pub total: u64,
    pub page: u64,
    pub limit: u64,
    pub total_pages: u64,
    pub has_next: bool,
    pub has_previous: bool,
}

impl<T> PaginatedResult<T> {
    /// Assemble a page; `limit` must be non-zero
    pub fn new(data: Vec<T>, total: u64, page: u64, limit: u64) -> Self {
        let total_pages = if limit > 0 { total.div_ceil(limit) } else { 0 };

        Self {
            data,
            total,
            page,
            limit,
            total_pages,
            has_next: page < total_pages,
            has_previous: page > 1,
        }
    }

    pub fn map<R>(self, f: impl FnMut(T) -> R) -> PaginatedResult<R> {
        PaginatedResult {
            data: self.data.into_iter().map(f).collect(),
            total: self.total,
            page: self.page,
            limit: self.limit,
            total_pages: self.total_pages,
            has_next: self.has_next,
            has_previous: self.has_previous,
        }
    }
}

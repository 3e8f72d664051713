//! Parses textual filter expressions into [`AttributeFilter`]s.
//!
//! An expression has the shape `<key> [<operator>] <value-or-values>`:
//!
//! ```text
//! service.name = checkout
//! 'http.route with space' starts_with /api
//! http.status_code is_one_of 500 502 '503 retry'
//! error.type is_set
//! ```
//!
//! When the token after the key is not a known operator the operator is `is`
//! and the whole remainder becomes the value. Parsed filters are sent to the
//! backend as-is, and can also be evaluated locally via [`CompiledFilter`].

use crate::error::FilterParseError;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Comparison applied by an [`AttributeFilter`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterOperator {
    Is,
    IsNot,
    IsSet,
    IsNotSet,
    IsAny,
    IsOneOf,
    IsNotOneOf,
    Gt,
    Gte,
    Lt,
    Lte,
    Matches,
    DoesNotMatch,
    Contains,
    DoesNotContain,
    StartsWith,
    DoesNotStartWith,
    EndsWith,
    DoesNotEndWith,
}

// Canonical names first, then symbolic aliases.
const OPERATOR_TABLE: &[(&str, FilterOperator)] = &[
    ("is", FilterOperator::Is),
    ("is_not", FilterOperator::IsNot),
    ("is_set", FilterOperator::IsSet),
    ("is_not_set", FilterOperator::IsNotSet),
    ("is_any", FilterOperator::IsAny),
    ("is_one_of", FilterOperator::IsOneOf),
    ("is_not_one_of", FilterOperator::IsNotOneOf),
    ("gt", FilterOperator::Gt),
    ("gte", FilterOperator::Gte),
    ("lt", FilterOperator::Lt),
    ("lte", FilterOperator::Lte),
    ("matches", FilterOperator::Matches),
    ("does_not_match", FilterOperator::DoesNotMatch),
    ("contains", FilterOperator::Contains),
    ("does_not_contain", FilterOperator::DoesNotContain),
    ("starts_with", FilterOperator::StartsWith),
    ("does_not_start_with", FilterOperator::DoesNotStartWith),
    ("ends_with", FilterOperator::EndsWith),
    ("does_not_end_with", FilterOperator::DoesNotEndWith),
    ("=", FilterOperator::Is),
    ("!=", FilterOperator::IsNot),
    (">", FilterOperator::Gt),
    (">=", FilterOperator::Gte),
    ("<", FilterOperator::Lt),
    ("<=", FilterOperator::Lte),
    ("~", FilterOperator::Matches),
    ("!~", FilterOperator::DoesNotMatch),
];

impl FilterOperator {
    /// Looks up a canonical operator name or symbolic alias.
    pub fn from_token(token: &str) -> Option<Self> {
        OPERATOR_TABLE
            .iter()
            .find(|(name, _)| *name == token)
            .map(|(_, op)| *op)
    }

    /// The canonical lowercase identifier used on the wire.
    pub fn as_str(&self) -> &'static str {
        OPERATOR_TABLE
            .iter()
            .find(|(_, op)| op == self)
            .map(|(name, _)| *name)
            .unwrap_or("is")
    }

    pub fn takes_value(&self) -> bool {
        !matches!(
            self,
            FilterOperator::IsSet | FilterOperator::IsNotSet | FilterOperator::IsAny
        )
    }

    pub fn is_multi_value(&self) -> bool {
        matches!(self, FilterOperator::IsOneOf | FilterOperator::IsNotOneOf)
    }
}

impl fmt::Display for FilterOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A structured attribute filter, serialized as `{key, operator, value|values}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttributeFilter {
    pub key: String,
    pub operator: FilterOperator,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub value: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub values: Option<Vec<String>>,
}

impl AttributeFilter {
    fn no_value(key: String, operator: FilterOperator) -> Self {
        Self {
            key,
            operator,
            value: None,
            values: None,
        }
    }

    /// Prepares the filter for local evaluation, compiling any regex.
    pub fn compile(&self) -> Result<CompiledFilter, FilterParseError> {
        let regex = match self.operator {
            FilterOperator::Matches | FilterOperator::DoesNotMatch => {
                let pattern = self.value.as_deref().unwrap_or_default();
                let re = Regex::new(pattern).map_err(|e| {
                    FilterParseError::new(
                        &format!("{} {} {}", self.key, self.operator, pattern),
                        format!("invalid regular expression: {}", e),
                    )
                })?;
                Some(re)
            }
            _ => None,
        };
        Ok(CompiledFilter {
            filter: self.clone(),
            regex,
        })
    }
}

/// Parses a single filter expression.
pub fn parse_filter(expression: &str) -> Result<AttributeFilter, FilterParseError> {
    let input = expression.trim();
    let err = |reason: &str| FilterParseError::new(expression, reason);

    let (key, remainder) = if let Some(quoted) = input.strip_prefix('\'') {
        read_quoted(quoted).ok_or_else(|| err("unterminated quote in key"))?
    } else {
        let end = input.find(char::is_whitespace).unwrap_or(input.len());
        (input[..end].to_string(), &input[end..])
    };
    if key.is_empty() {
        return Err(err("empty key"));
    }

    let remainder = remainder.trim();
    if remainder.is_empty() {
        return Err(err("expected an operator and/or value after the key"));
    }

    let first_token = remainder
        .split_whitespace()
        .next()
        .unwrap_or(remainder);
    let (operator, value_region) = match FilterOperator::from_token(first_token) {
        Some(op) => (op, remainder[first_token.len()..].trim()),
        None => (FilterOperator::Is, remainder),
    };

    if !operator.takes_value() {
        if !value_region.is_empty() {
            return Err(err(&format!("operator '{}' does not take a value", operator)));
        }
        return Ok(AttributeFilter::no_value(key, operator));
    }
    if value_region.is_empty() {
        return Err(err(&format!("operator '{}' requires a value", operator)));
    }

    if value_region == "\"\"" || value_region == "''" {
        match operator {
            FilterOperator::Is => {
                return Ok(AttributeFilter::no_value(key, FilterOperator::IsNotSet))
            }
            FilterOperator::IsNot => {
                return Ok(AttributeFilter::no_value(key, FilterOperator::IsSet))
            }
            _ => {}
        }
    }

    if operator.is_multi_value() {
        let values = split_values(value_region).ok_or_else(|| err("unterminated quote in value"))?;
        if values.is_empty() {
            return Err(err(&format!("operator '{}' requires a value", operator)));
        }
        return Ok(AttributeFilter {
            key,
            operator,
            value: None,
            values: Some(values),
        });
    }

    Ok(AttributeFilter {
        key,
        operator,
        value: Some(value_region.to_string()),
        values: None,
    })
}

/// Parses every expression; an empty list means no filter at all.
pub fn parse_filters<S: AsRef<str>>(
    expressions: &[S],
) -> Result<Option<Vec<AttributeFilter>>, FilterParseError> {
    if expressions.is_empty() {
        return Ok(None);
    }
    let filters = expressions
        .iter()
        .map(|e| parse_filter(e.as_ref()))
        .collect::<Result<Vec<_>, _>>()?;
    tracing::debug!(count = filters.len(), "Parsed filter expressions");
    Ok(Some(filters))
}

// Reads a single-quoted segment. `input` starts right after the opening quote.
// Returns the unescaped content and the text after the closing quote.
fn read_quoted(input: &str) -> Option<(String, &str)> {
    let mut content = String::new();
    let mut chars = input.char_indices().peekable();
    while let Some((idx, c)) = chars.next() {
        match c {
            '\\' if matches!(chars.peek(), Some((_, '\''))) => {
                chars.next();
                content.push('\'');
            }
            '\'' => return Some((content, &input[idx + 1..])),
            _ => content.push(c),
        }
    }
    None
}

// Whitespace-separated values, single-quoted tokens may contain whitespace.
fn split_values(region: &str) -> Option<Vec<String>> {
    let mut values = Vec::new();
    let mut rest = region.trim_start();
    while !rest.is_empty() {
        if let Some(quoted) = rest.strip_prefix('\'') {
            let (value, after) = read_quoted(quoted)?;
            values.push(value);
            rest = after.trim_start();
        } else {
            let end = rest.find(char::is_whitespace).unwrap_or(rest.len());
            values.push(rest[..end].to_string());
            rest = rest[end..].trim_start();
        }
    }
    Some(values)
}

/// A filter ready for local evaluation against a record.
#[derive(Debug, Clone)]
pub struct CompiledFilter {
    filter: AttributeFilter,
    regex: Option<Regex>,
}

impl CompiledFilter {
    pub fn filter(&self) -> &AttributeFilter {
        &self.filter
    }

    /// Evaluates the filter. `lookup` returns `None` for absent fields.
    pub fn matches<F>(&self, lookup: F) -> bool
    where
        F: Fn(&str) -> Option<String>,
    {
        let actual = lookup(&self.filter.key).filter(|v| !v.is_empty());
        let expected = self.filter.value.as_deref().unwrap_or_default();
        let values = self.filter.values.as_deref().unwrap_or_default();

        match self.filter.operator {
            FilterOperator::IsAny => true,
            FilterOperator::IsSet => actual.is_some(),
            FilterOperator::IsNotSet => actual.is_none(),
            FilterOperator::Is => actual.as_deref() == Some(expected),
            FilterOperator::IsNot => actual.as_deref() != Some(expected),
            FilterOperator::IsOneOf => actual.is_some_and(|a| values.iter().any(|v| *v == a)),
            FilterOperator::IsNotOneOf => !actual.is_some_and(|a| values.iter().any(|v| *v == a)),
            FilterOperator::Gt => compare(actual.as_deref(), expected).is_some_and(|o| o.is_gt()),
            FilterOperator::Gte => compare(actual.as_deref(), expected).is_some_and(|o| o.is_ge()),
            FilterOperator::Lt => compare(actual.as_deref(), expected).is_some_and(|o| o.is_lt()),
            FilterOperator::Lte => compare(actual.as_deref(), expected).is_some_and(|o| o.is_le()),
            FilterOperator::Matches => self.regex_match(actual.as_deref()),
            FilterOperator::DoesNotMatch => !self.regex_match(actual.as_deref()),
            FilterOperator::Contains => actual.is_some_and(|a| a.contains(expected)),
            FilterOperator::DoesNotContain => !actual.is_some_and(|a| a.contains(expected)),
            FilterOperator::StartsWith => actual.is_some_and(|a| a.starts_with(expected)),
            FilterOperator::DoesNotStartWith => !actual.is_some_and(|a| a.starts_with(expected)),
            FilterOperator::EndsWith => actual.is_some_and(|a| a.ends_with(expected)),
            FilterOperator::DoesNotEndWith => !actual.is_some_and(|a| a.ends_with(expected)),
        }
    }

    fn regex_match(&self, actual: Option<&str>) -> bool {
        match (&self.regex, actual) {
            (Some(re), Some(a)) => re.is_match(a),
            _ => false,
        }
    }
}

// Numeric when both sides parse as numbers, lexical otherwise.
fn compare(actual: Option<&str>, expected: &str) -> Option<std::cmp::Ordering> {
    let actual = actual?;
    match (actual.parse::<f64>(), expected.parse::<f64>()) {
        (Ok(a), Ok(b)) => a.partial_cmp(&b),
        _ => Some(actual.cmp(expected)),
    }
}

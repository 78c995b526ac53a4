//! Criterion-matrix grammar and the predicate tree it compiles into.
//!
//! Row 0 of a criterion matrix names columns; every following row is one
//! OR-alternative whose cells AND together. A cell's text may start with a
//! comparison sign (`>`, `<`, `>=`, `<=`, `!=`/`<>`, `=`), carry wildcard
//! markers (`*x*` contains, `*x` ends-with, `x*` starts-with), and hold
//! several `;`-separated alternatives that OR together. The result is a
//! fixed OR-of-AND-of-ORs shape; arbitrary nesting is out of scope.

use std::cmp::Ordering;

use crate::error::{Error, Result};
use crate::schema::Catalog;
use crate::value::{coerce, format_value, Value};

/// Comparison operator of a single predicate term.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    /// Equality.
    Eq,
    /// Inequality.
    Ne,
    /// Strictly less than.
    Lt,
    /// Less than or equal.
    Le,
    /// Strictly greater than.
    Gt,
    /// Greater than or equal.
    Ge,
    /// Case-insensitive substring match.
    Contains,
    /// Case-insensitive prefix match.
    StartsWith,
    /// Case-insensitive suffix match.
    EndsWith,
}

/// Boolean predicate tree over named `(table, column)` pairs.
#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    /// A single comparison term.
    Compare {
        /// Table the column belongs to.
        table: String,
        /// Column under comparison.
        column: String,
        /// Operator.
        op: CompareOp,
        /// Right-hand literal, already coerced to the column's type.
        value: Value,
    },
    /// `column IS NULL`.
    IsNull {
        /// Table the column belongs to.
        table: String,
        /// Column under test.
        column: String,
    },
    /// `column IS NOT NULL`.
    IsNotNull {
        /// Table the column belongs to.
        table: String,
        /// Column under test.
        column: String,
    },
    /// Conjunction.
    And(Vec<Predicate>),
    /// Disjunction.
    Or(Vec<Predicate>),
}

impl Predicate {
    /// Evaluates the tree against a row, with `lookup` resolving a
    /// `(table, column)` pair to its value. `None` (table absent, e.g. an
    /// unmatched outer-join side) behaves like NULL: comparisons fail and
    /// `IS NULL` holds, matching SQL three-valued comparison results.
    pub fn matches<F>(&self, lookup: &F) -> bool
    where
        F: Fn(&str, &str) -> Option<Value>,
    {
        match self {
            Predicate::Compare {
                table,
                column,
                op,
                value,
            } => match lookup(table, column) {
                Some(actual) if !actual.is_null() => evaluate_compare(&actual, *op, value),
                _ => false,
            },
            Predicate::IsNull { table, column } => {
                lookup(table, column).map_or(true, |v| v.is_null())
            }
            Predicate::IsNotNull { table, column } => {
                lookup(table, column).is_some_and(|v| !v.is_null())
            }
            Predicate::And(terms) => terms.iter().all(|t| t.matches(lookup)),
            Predicate::Or(terms) => terms.iter().any(|t| t.matches(lookup)),
        }
    }
}

fn evaluate_compare(actual: &Value, op: CompareOp, expected: &Value) -> bool {
    match op {
        CompareOp::Eq => actual.loosely_equals(expected),
        CompareOp::Ne => !actual.loosely_equals(expected),
        CompareOp::Lt => matches_ordering(actual, expected, |o| o == Ordering::Less),
        CompareOp::Le => matches_ordering(actual, expected, |o| o != Ordering::Greater),
        CompareOp::Gt => matches_ordering(actual, expected, |o| o == Ordering::Greater),
        CompareOp::Ge => matches_ordering(actual, expected, |o| o != Ordering::Less),
        CompareOp::Contains => fold_text(actual).contains(&fold_text(expected)),
        CompareOp::StartsWith => fold_text(actual).starts_with(&fold_text(expected)),
        CompareOp::EndsWith => fold_text(actual).ends_with(&fold_text(expected)),
    }
}

fn matches_ordering(actual: &Value, expected: &Value, accept: fn(Ordering) -> bool) -> bool {
    actual.compare(expected).is_some_and(accept)
}

fn fold_text(value: &Value) -> String {
    value.to_string().to_lowercase()
}

/// Comparison sign parsed from the front of a criterion cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Sign {
    None,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Contains,
    StartsWith,
    EndsWith,
}

impl Sign {
    fn is_explicit(self) -> bool {
        self != Sign::None
    }
}

/// Strips the comparison sign and wildcard markers from a cell, longest
/// sign first so `>=` is not read as `>` followed by `=`. Wildcards are
/// applied after sign stripping and take precedence over the sign.
fn parse_cell(text: &str) -> (Sign, String) {
    const SIGNS: [(&str, Sign); 7] = [
        (">=", Sign::Ge),
        ("<=", Sign::Le),
        ("!=", Sign::Ne),
        ("<>", Sign::Ne),
        (">", Sign::Gt),
        ("<", Sign::Lt),
        ("=", Sign::Eq),
    ];
    let mut sign = Sign::None;
    let mut rest = text;
    for (token, parsed) in SIGNS {
        if let Some(stripped) = rest.strip_prefix(token) {
            sign = parsed;
            rest = stripped;
            break;
        }
    }
    let mut rest = rest.trim().to_owned();
    if rest.starts_with('*') && rest.ends_with('*') {
        sign = Sign::Contains;
        rest = if rest.len() == 1 {
            String::new()
        } else {
            rest[1..rest.len() - 1].to_owned()
        };
    } else if let Some(stripped) = rest.strip_prefix('*') {
        sign = Sign::EndsWith;
        rest = stripped.to_owned();
    } else if let Some(stripped) = rest.strip_suffix('*') {
        sign = Sign::StartsWith;
        rest = stripped.to_owned();
    }
    (sign, rest)
}

/// Compiles a criterion matrix into a predicate tree.
///
/// `bindings` associates each criterion column with its table and must
/// cover every header column. A matrix without data rows compiles to no
/// filter. An alternative whose formatted text is empty and that carries no
/// sign is skipped, distinguishing "no filter on this column" from an
/// explicit `=` match against the empty string; the latter additionally
/// ORs in an `IS NULL` term (`IS NOT NULL` for `!=`, so `!=` against the
/// empty cell selects every non-null value, empty string included).
pub fn compile(
    catalog: &Catalog,
    criteria: &[Vec<Value>],
    bindings: &[String],
) -> Result<Option<Predicate>> {
    if criteria.len() < 2 {
        return Ok(None);
    }
    let header = &criteria[0];
    if bindings.len() < header.len() {
        return Err(Error::Validation(format!(
            "criteria table bindings cover {} of {} criterion columns",
            bindings.len(),
            header.len()
        )));
    }
    let mut columns = Vec::with_capacity(header.len());
    for (index, cell) in header.iter().enumerate() {
        let Value::Text(name) = cell else {
            return Err(Error::Validation(format!(
                "criteria header cell {index} must be a column name"
            )));
        };
        let table = &bindings[index];
        // Fail fast before anything touches storage.
        catalog.column(table, name)?;
        columns.push((table.clone(), name.clone(), catalog.logical_type(table, name)?));
    }

    let mut row_terms = Vec::new();
    for (row_index, row) in criteria.iter().enumerate().skip(1) {
        if row.len() != header.len() {
            return Err(Error::Validation(format!(
                "criteria row {row_index} has {} cells, header has {}",
                row.len(),
                header.len()
            )));
        }
        let mut and_terms = Vec::new();
        for (cell, (table, column, ty)) in row.iter().zip(&columns) {
            let (sign, alternatives) = split_alternatives(cell);
            let mut or_terms = Vec::new();
            for alternative in alternatives {
                let formatted = format_value(&alternative, *ty);
                if formatted.is_empty() && !sign.is_explicit() {
                    continue;
                }
                let value = coerce(alternative, *ty);
                push_terms(&mut or_terms, table, column, sign, value);
            }
            match or_terms.len() {
                0 => {}
                1 => and_terms.extend(or_terms),
                _ => and_terms.push(Predicate::Or(or_terms)),
            }
        }
        match and_terms.len() {
            0 => {}
            1 => row_terms.extend(and_terms),
            _ => row_terms.push(Predicate::And(and_terms)),
        }
    }

    Ok(match row_terms.len() {
        0 => None,
        1 => row_terms.pop(),
        _ => Some(Predicate::Or(row_terms)),
    })
}

/// Splits a cell into its sign and `;`-separated OR alternatives. Only text
/// cells carry grammar; any other value is a single signless alternative.
fn split_alternatives(cell: &Value) -> (Sign, Vec<Value>) {
    match cell {
        Value::Text(text) => {
            let (sign, rest) = parse_cell(text);
            let alternatives = rest
                .split(';')
                .map(|part| Value::Text(part.to_owned()))
                .collect();
            (sign, alternatives)
        }
        other => (Sign::None, vec![other.clone()]),
    }
}

fn push_terms(terms: &mut Vec<Predicate>, table: &str, column: &str, sign: Sign, value: Value) {
    let compare = |op, value| Predicate::Compare {
        table: table.to_owned(),
        column: column.to_owned(),
        op,
        value,
    };
    match sign {
        Sign::Gt => terms.push(compare(CompareOp::Gt, value)),
        Sign::Lt => terms.push(compare(CompareOp::Lt, value)),
        Sign::Ge => terms.push(compare(CompareOp::Ge, value)),
        Sign::Le => terms.push(compare(CompareOp::Le, value)),
        Sign::Contains => terms.push(compare(CompareOp::Contains, value)),
        Sign::StartsWith => terms.push(compare(CompareOp::StartsWith, value)),
        Sign::EndsWith => terms.push(compare(CompareOp::EndsWith, value)),
        Sign::Ne => {
            let is_empty_text = value == Value::Text(String::new());
            terms.push(compare(CompareOp::Ne, value));
            // `!=` against the empty cell means "any non-null value",
            // empty string included.
            if is_empty_text {
                terms.push(Predicate::IsNotNull {
                    table: table.to_owned(),
                    column: column.to_owned(),
                });
            }
        }
        Sign::Eq | Sign::None => {
            let is_empty_text = value == Value::Text(String::new());
            terms.push(compare(CompareOp::Eq, value));
            if is_empty_text {
                terms.push(Predicate::IsNull {
                    table: table.to_owned(),
                    column: column.to_owned(),
                });
            }
        }
    }
}

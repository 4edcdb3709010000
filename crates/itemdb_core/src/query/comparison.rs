//! Comparison trees over columns.

use crate::catalog::quote;
use crate::schema::TypeKey;
use itemdb_storage::Value;
use std::collections::BTreeSet;
use std::fmt;
use std::ops::{BitAnd, BitOr, Not};

/// One column of one record type's table.
///
/// Usually obtained from [`Record::column`](crate::Record::column).
#[derive(Debug, Clone)]
pub struct Column {
    table: TypeKey,
    attribute: Option<String>,
}

impl Column {
    /// An attribute column.
    pub fn attribute(table: TypeKey, name: impl Into<String>) -> Self {
        Self {
            table,
            attribute: Some(name.into()),
        }
    }

    /// The store id column.
    pub fn store_id(table: TypeKey) -> Self {
        Self {
            table,
            attribute: None,
        }
    }

    /// Table the column belongs to.
    #[must_use]
    pub fn table(&self) -> &TypeKey {
        &self.table
    }

    /// Attribute name, or `None` for the store id column.
    #[must_use]
    pub fn attribute_name(&self) -> Option<&str> {
        self.attribute.as_deref()
    }

    /// Returns true for the store id column.
    #[must_use]
    pub fn is_store_id(&self) -> bool {
        self.attribute.is_none()
    }

    pub(crate) fn to_sql(&self, db: &str) -> String {
        let column = match &self.attribute {
            Some(name) => quote(name),
            None => "oid".to_string(),
        };
        format!("{db}.{}.{column}", self.table.table_name())
    }

    fn compare(&self, op: CompareOp, value: impl Into<Value>) -> Comparison {
        Comparison::Value {
            column: self.clone(),
            op,
            value: value.into(),
        }
    }

    /// `column = value`; equality with null matches null.
    #[must_use]
    pub fn eq(&self, value: impl Into<Value>) -> Comparison {
        match value.into() {
            Value::Null => self.is_null(),
            value => self.compare(CompareOp::Eq, value),
        }
    }

    /// `column != value`; inequality with null matches non-null.
    #[must_use]
    pub fn ne(&self, value: impl Into<Value>) -> Comparison {
        match value.into() {
            Value::Null => self.not_null(),
            value => self.compare(CompareOp::Ne, value),
        }
    }

    /// `column < value`.
    #[must_use]
    pub fn lt(&self, value: impl Into<Value>) -> Comparison {
        self.compare(CompareOp::Lt, value)
    }

    /// `column <= value`.
    #[must_use]
    pub fn le(&self, value: impl Into<Value>) -> Comparison {
        self.compare(CompareOp::Le, value)
    }

    /// `column > value`.
    #[must_use]
    pub fn gt(&self, value: impl Into<Value>) -> Comparison {
        self.compare(CompareOp::Gt, value)
    }

    /// `column >= value`.
    #[must_use]
    pub fn ge(&self, value: impl Into<Value>) -> Comparison {
        self.compare(CompareOp::Ge, value)
    }

    /// `column IS NULL`.
    #[must_use]
    pub fn is_null(&self) -> Comparison {
        Comparison::Null {
            column: self.clone(),
            negated: false,
        }
    }

    /// `column IS NOT NULL`.
    #[must_use]
    pub fn not_null(&self) -> Comparison {
        Comparison::Null {
            column: self.clone(),
            negated: true,
        }
    }

    /// `column IN (values...)`; an empty list matches nothing.
    #[must_use]
    pub fn one_of<V: Into<Value>>(&self, values: impl IntoIterator<Item = V>) -> Comparison {
        Comparison::In {
            column: self.clone(),
            values: values.into_iter().map(Into::into).collect(),
        }
    }

    /// `column LIKE pattern`, with `%` and `_` wildcards.
    #[must_use]
    pub fn like(&self, pattern: impl Into<String>) -> Comparison {
        Comparison::Like {
            column: self.clone(),
            pattern: pattern.into(),
            escaped: false,
        }
    }

    /// Text starting with `prefix`; wildcards in `prefix` match literally.
    ///
    /// Like `LIKE`, ASCII letters compare case-insensitively.
    #[must_use]
    pub fn starts_with(&self, prefix: &str) -> Comparison {
        let mut pattern = String::with_capacity(prefix.len() + 1);
        for c in prefix.chars() {
            if matches!(c, '%' | '_' | '\\') {
                pattern.push('\\');
            }
            pattern.push(c);
        }
        pattern.push('%');
        Comparison::Like {
            column: self.clone(),
            pattern,
            escaped: true,
        }
    }

    /// `column = other`, typically joining two tables.
    #[must_use]
    pub fn eq_column(&self, other: &Column) -> Comparison {
        Comparison::Columns {
            left: self.clone(),
            op: CompareOp::Eq,
            right: other.clone(),
        }
    }

    /// Ascending sort on this column.
    #[must_use]
    pub fn ascending(&self) -> SortKey {
        SortKey {
            column: self.clone(),
            direction: Direction::Ascending,
        }
    }

    /// Descending sort on this column.
    #[must_use]
    pub fn descending(&self) -> SortKey {
        SortKey {
            column: self.clone(),
            direction: Direction::Descending,
        }
    }
}

/// Binary comparison operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    /// `=`
    Eq,
    /// `!=`
    Ne,
    /// `<`
    Lt,
    /// `<=`
    Le,
    /// `>`
    Gt,
    /// `>=`
    Ge,
}

impl CompareOp {
    fn sql(self) -> &'static str {
        match self {
            Self::Eq => "=",
            Self::Ne => "!=",
            Self::Lt => "<",
            Self::Le => "<=",
            Self::Gt => ">",
            Self::Ge => ">=",
        }
    }
}

/// Immutable predicate tree.
///
/// Builds the WHERE clause of a query and determines which tables it
/// touches.
#[derive(Debug, Clone)]
pub enum Comparison {
    /// Column against a bound value.
    Value {
        /// Left-hand column.
        column: Column,
        /// Operator.
        op: CompareOp,
        /// Right-hand value.
        value: Value,
    },
    /// Column against column.
    Columns {
        /// Left-hand column.
        left: Column,
        /// Operator.
        op: CompareOp,
        /// Right-hand column.
        right: Column,
    },
    /// Null test.
    Null {
        /// Tested column.
        column: Column,
        /// `IS NOT NULL` when set.
        negated: bool,
    },
    /// Membership test.
    In {
        /// Tested column.
        column: Column,
        /// Candidate values.
        values: Vec<Value>,
    },
    /// Pattern match.
    Like {
        /// Tested column.
        column: Column,
        /// Pattern.
        pattern: String,
        /// Whether `\` escapes wildcards in the pattern.
        escaped: bool,
    },
    /// Conjunction; empty is true.
    And(Vec<Comparison>),
    /// Disjunction; empty is false.
    Or(Vec<Comparison>),
    /// Negation.
    Not(Box<Comparison>),
}

impl Comparison {
    /// Conjunction of two comparisons.
    #[must_use]
    pub fn and(self, other: Comparison) -> Comparison {
        match (self, other) {
            (Self::And(mut left), Self::And(right)) => {
                left.extend(right);
                Self::And(left)
            }
            (Self::And(mut left), right) => {
                left.push(right);
                Self::And(left)
            }
            (left, right) => Self::And(vec![left, right]),
        }
    }

    /// Disjunction of two comparisons.
    #[must_use]
    pub fn or(self, other: Comparison) -> Comparison {
        match (self, other) {
            (Self::Or(mut left), Self::Or(right)) => {
                left.extend(right);
                Self::Or(left)
            }
            (Self::Or(mut left), right) => {
                left.push(right);
                Self::Or(left)
            }
            (left, right) => Self::Or(vec![left, right]),
        }
    }

    /// Negation.
    #[must_use]
    pub fn negate(self) -> Comparison {
        Self::Not(Box::new(self))
    }

    /// Conjunction of any number of comparisons.
    pub fn all(comparisons: impl IntoIterator<Item = Comparison>) -> Comparison {
        Self::And(comparisons.into_iter().collect())
    }

    /// Disjunction of any number of comparisons.
    pub fn any(comparisons: impl IntoIterator<Item = Comparison>) -> Comparison {
        Self::Or(comparisons.into_iter().collect())
    }

    /// Every table the comparison mentions.
    #[must_use]
    pub fn tables(&self) -> BTreeSet<TypeKey> {
        let mut tables = BTreeSet::new();
        self.collect_tables(&mut tables);
        tables
    }

    fn collect_tables(&self, out: &mut BTreeSet<TypeKey>) {
        match self {
            Self::Value { column, .. }
            | Self::Null { column, .. }
            | Self::In { column, .. }
            | Self::Like { column, .. } => {
                out.insert(column.table().clone());
            }
            Self::Columns { left, right, .. } => {
                out.insert(left.table().clone());
                out.insert(right.table().clone());
            }
            Self::And(parts) | Self::Or(parts) => {
                for part in parts {
                    part.collect_tables(out);
                }
            }
            Self::Not(inner) => inner.collect_tables(out),
        }
    }

    /// Appends SQL to `sql` and bound values to `args`.
    pub(crate) fn to_sql(&self, db: &str, sql: &mut String, args: &mut Vec<Value>) {
        match self {
            Self::Value { column, op, value } => {
                sql.push_str(&format!("({} {} ?)", column.to_sql(db), op.sql()));
                args.push(value.clone());
            }
            Self::Columns { left, op, right } => {
                sql.push_str(&format!(
                    "({} {} {})",
                    left.to_sql(db),
                    op.sql(),
                    right.to_sql(db)
                ));
            }
            Self::Null { column, negated } => {
                let test = if *negated { "IS NOT NULL" } else { "IS NULL" };
                sql.push_str(&format!("({} {test})", column.to_sql(db)));
            }
            Self::In { column, values } => {
                if values.is_empty() {
                    sql.push_str("(0)");
                    return;
                }
                let marks = vec!["?"; values.len()].join(", ");
                sql.push_str(&format!("({} IN ({marks}))", column.to_sql(db)));
                args.extend(values.iter().cloned());
            }
            Self::Like {
                column,
                pattern,
                escaped,
            } => {
                let escape = if *escaped { " ESCAPE '\\'" } else { "" };
                sql.push_str(&format!("({} LIKE ?{escape})", column.to_sql(db)));
                args.push(Value::Text(pattern.clone()));
            }
            Self::And(parts) | Self::Or(parts) => {
                if parts.is_empty() {
                    sql.push_str(if matches!(self, Self::And(_)) { "(1)" } else { "(0)" });
                    return;
                }
                let joiner = if matches!(self, Self::And(_)) { " AND " } else { " OR " };
                sql.push('(');
                for (idx, part) in parts.iter().enumerate() {
                    if idx > 0 {
                        sql.push_str(joiner);
                    }
                    part.to_sql(db, sql, args);
                }
                sql.push(')');
            }
            Self::Not(inner) => {
                sql.push_str("(NOT ");
                inner.to_sql(db, sql, args);
                sql.push(')');
            }
        }
    }
}

impl fmt::Display for Comparison {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut sql = String::new();
        let mut args = Vec::new();
        self.to_sql("main", &mut sql, &mut args);
        if args.is_empty() {
            write!(f, "{sql}")
        } else {
            write!(f, "{sql} {args:?}")
        }
    }
}

impl BitAnd for Comparison {
    type Output = Comparison;

    fn bitand(self, rhs: Comparison) -> Comparison {
        self.and(rhs)
    }
}

impl BitOr for Comparison {
    type Output = Comparison;

    fn bitor(self, rhs: Comparison) -> Comparison {
        self.or(rhs)
    }
}

impl Not for Comparison {
    type Output = Comparison;

    fn not(self) -> Comparison {
        self.negate()
    }
}

/// Sort direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Smallest first; nulls first.
    Ascending,
    /// Largest first; nulls last.
    Descending,
}

/// One ORDER BY term.
#[derive(Debug, Clone)]
pub struct SortKey {
    pub(crate) column: Column,
    pub(crate) direction: Direction,
}

impl SortKey {
    /// Sorted column.
    #[must_use]
    pub fn column(&self) -> &Column {
        &self.column
    }

    /// Direction.
    #[must_use]
    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub(crate) fn to_sql(&self, db: &str) -> String {
        let direction = match self.direction {
            Direction::Ascending => "ASC",
            Direction::Descending => "DESC",
        };
        format!("{} {direction}", self.column.to_sql(db))
    }
}

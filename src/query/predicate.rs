//! Substring predicates as presented by the host planner.

use crate::index::types::ColumnId;

/// A containment predicate tree over the indexed columns.
///
/// Leaves are `column CONTAINS pattern`; interior nodes combine leaves
/// with AND/OR. The empty pattern is legal and matches every row with a
/// non-NULL value in the column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Predicate {
    Contains { column: ColumnId, pattern: String },
    And(Vec<Predicate>),
    Or(Vec<Predicate>),
}

impl Predicate {
    pub fn contains(column: ColumnId, pattern: impl Into<String>) -> Self {
        Predicate::Contains {
            column,
            pattern: pattern.into(),
        }
    }

    pub fn and(predicates: Vec<Predicate>) -> Self {
        Predicate::And(predicates)
    }

    pub fn or(predicates: Vec<Predicate>) -> Self {
        Predicate::Or(predicates)
    }
}

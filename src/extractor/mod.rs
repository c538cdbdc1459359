//! Dependency Extractor (L1, §4.1). Given cell source, derive the set of
//! module-level variable reads and writes. Never fails: a cell that doesn't
//! parse yields `(∅, ∅)` and the syntax error surfaces later, at execution.

mod python;
mod sql;

use crate::cell::CellKind;
use std::collections::BTreeSet;

/// Module-level reads and writes for one cell, in stable (sorted) order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Dependencies {
    pub reads: BTreeSet<String>,
    pub writes: BTreeSet<String>,
}

pub fn extract(kind: CellKind, source: &str) -> Dependencies {
    match kind {
        CellKind::Python => python::extract_python(source),
        CellKind::Sql => sql::extract_sql(source),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dispatches_by_kind() {
        let py = extract(CellKind::Python, "x = 1");
        assert!(py.writes.contains("x"));

        let sql = extract(CellKind::Sql, "select * from t where id = {id}");
        assert!(sql.reads.contains("id"));
        assert!(sql.writes.is_empty());
    }
}

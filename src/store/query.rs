//! Equality filters and single-field ordering for `Store::query` (spec §4.1).

use serde::Serialize;
use serde_json::Value;

/// An equality filter against one top-level field of a document's JSON
/// representation.
#[derive(Debug, Clone)]
pub struct EqFilter {
    pub field: &'static str,
    pub value: Value,
}

impl EqFilter {
    pub fn new(field: &'static str, value: impl Into<Value>) -> Self {
        Self {
            field,
            value: value.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderDirection {
    Asc,
    Desc,
}

#[derive(Debug, Clone, Copy)]
pub struct OrderBy {
    pub field: &'static str,
    pub direction: OrderDirection,
}

impl OrderBy {
    pub fn asc(field: &'static str) -> Self {
        Self {
            field,
            direction: OrderDirection::Asc,
        }
    }

    pub fn desc(field: &'static str) -> Self {
        Self {
            field,
            direction: OrderDirection::Desc,
        }
    }
}

pub(crate) fn matches<T: Serialize>(doc: &T, filters: &[EqFilter]) -> bool {
    if filters.is_empty() {
        return true;
    }
    let value = match serde_json::to_value(doc) {
        Ok(v) => v,
        Err(_) => return false,
    };
    filters
        .iter()
        .all(|f| value.get(f.field) == Some(&f.value))
}

/// A key usable for total ordering across heterogeneous JSON scalar types:
/// numbers compare numerically, everything else falls back to its
/// string form.
pub(crate) fn sort_key(value: &Value, field: &str) -> (Option<f64>, String) {
    match value.get(field) {
        Some(Value::Number(n)) => (n.as_f64(), String::new()),
        Some(Value::String(s)) => (None, s.clone()),
        Some(other) => (None, other.to_string()),
        None => (None, String::new()),
    }
}

pub(crate) fn apply_order<T: Serialize>(items: &mut [T], order: &OrderBy) {
    items.sort_by(|a, b| {
        let av = serde_json::to_value(a).unwrap_or(Value::Null);
        let bv = serde_json::to_value(b).unwrap_or(Value::Null);
        let ak = sort_key(&av, order.field);
        let bk = sort_key(&bv, order.field);
        let cmp = match (ak.0, bk.0) {
            (Some(a), Some(b)) => a.partial_cmp(&b).unwrap_or(std::cmp::Ordering::Equal),
            _ => ak.1.cmp(&bk.1),
        };
        match order.direction {
            OrderDirection::Asc => cmp,
            OrderDirection::Desc => cmp.reverse(),
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[derive(Serialize)]
    struct Row {
        tokens: u64,
        id: &'static str,
    }

    #[test]
    fn eq_filter_matches_top_level_field() {
        let row = Row { tokens: 10, id: "a" };
        let filters = vec![EqFilter::new("tokens", 10u64)];
        assert!(matches(&row, &filters));
        let filters = vec![EqFilter::new("tokens", 11u64)];
        assert!(!matches(&row, &filters));
    }

    #[test]
    fn order_by_tokens_desc_then_id_asc_tiebreak() {
        let mut rows = vec![
            Row { tokens: 100, id: "B" },
            Row { tokens: 101, id: "C" },
            Row { tokens: 100, id: "A" },
        ];
        apply_order(&mut rows, &OrderBy::desc("tokens"));
        assert_eq!(rows[0].id, "C");
        // the two 100-token rows retain stable relative order (A..) since
        // sort_by is stable and ties don't swap.
        let tok_100: Vec<_> = rows.iter().skip(1).map(|r| r.id).collect();
        assert_eq!(tok_100, vec!["B", "A"]);
        let _ = json!({});
    }
}

//! Search, sort and column listing over an in-memory roster.

use serde::Deserialize;
use std::str::FromStr;

use crate::error::QueryError;
use crate::roster::{RosterRow, RosterSet};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    #[default]
    Asc,
    Desc,
}

impl FromStr for Direction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "asc" => Ok(Direction::Asc),
            "desc" => Ok(Direction::Desc),
            other => Err(format!("Unknown sort direction: {}", other)),
        }
    }
}

/// Rows where the query appears, case-insensitively, in any cell.
/// An empty (or blank) query returns every row in original order.
pub fn search<'a>(roster: &'a RosterSet, query: &str) -> Vec<&'a RosterRow> {
    let needle = query.trim().to_lowercase();
    if needle.is_empty() {
        return roster.rows().iter().collect();
    }

    roster
        .rows()
        .iter()
        .filter(|row| {
            row.values()
                .any(|value| value.to_string().to_lowercase().contains(&needle))
        })
        .collect()
}

/// Stable sort on the raw value of `column`
pub fn sort_by<'a>(
    roster: &'a RosterSet,
    column: &str,
    direction: Direction,
) -> Result<Vec<&'a RosterRow>, QueryError> {
    if !roster.has_column(column) {
        return Err(QueryError::KeyMissing(column.to_string()));
    }

    let mut rows: Vec<(&RosterRow, _)> = roster
        .rows()
        .iter()
        .filter_map(|row| row.get(column).map(|value| (row, value)))
        .collect();

    // slice::sort_by is stable; reversing the comparator keeps ties in input order
    match direction {
        Direction::Asc => rows.sort_by(|a, b| a.1.total_cmp(b.1)),
        Direction::Desc => rows.sort_by(|a, b| b.1.total_cmp(a.1)),
    }

    Ok(rows.into_iter().map(|(row, _)| row).collect())
}

/// Column names of the first row, empty for an empty roster
pub fn columns(roster: &RosterSet) -> Vec<String> {
    roster
        .rows()
        .first()
        .map(|row| row.columns().to_vec())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::roster::CellValue;

    fn text(s: &str) -> CellValue {
        CellValue::Text(s.to_string())
    }

    fn roster() -> RosterSet {
        let mut set = RosterSet::new(vec!["Name".into(), "Route No".into(), "Area".into()]);
        set.push(vec![text("Asha"), CellValue::Int(2), text("Dwarka")]);
        set.push(vec![text("Ravi"), CellValue::Int(1), text("Saket")]);
        set.push(vec![text("Meena"), CellValue::Int(2), text("dwarka sector 9")]);
        set.push(vec![text("Kabir"), CellValue::Int(1), text("Noida")]);
        set
    }

    fn names(rows: &[&RosterRow]) -> Vec<String> {
        rows.iter().map(|r| r.text("Name").unwrap()).collect()
    }

    #[test]
    fn test_empty_query_returns_everything_in_order() {
        let set = roster();
        assert_eq!(names(&search(&set, "")), ["Asha", "Ravi", "Meena", "Kabir"]);
        assert_eq!(search(&set, "   ").len(), 4);
    }

    #[test]
    fn test_search_is_case_insensitive_across_cells() {
        let set = roster();
        let hits = search(&set, "DWARKA");
        assert_eq!(names(&hits), ["Asha", "Meena"]);
        for row in hits {
            assert!(
                row.values()
                    .any(|v| v.to_string().to_lowercase().contains("dwarka"))
            );
        }
    }

    #[test]
    fn test_search_matches_numbers_as_text() {
        let set = roster();
        assert_eq!(search(&set, "1").len(), 2);
        assert!(search(&set, "zzz").is_empty());
    }

    #[test]
    fn test_sort_is_stable_ascending() {
        let set = roster();
        let sorted = sort_by(&set, "Route No", Direction::Asc).unwrap();
        assert_eq!(names(&sorted), ["Ravi", "Kabir", "Asha", "Meena"]);
    }

    #[test]
    fn test_sort_is_stable_descending() {
        let set = roster();
        let sorted = sort_by(&set, "Route No", Direction::Desc).unwrap();
        assert_eq!(names(&sorted), ["Asha", "Meena", "Ravi", "Kabir"]);
    }

    #[test]
    fn test_sort_missing_column() {
        let set = roster();
        assert_eq!(
            sort_by(&set, "Shift", Direction::Asc).unwrap_err(),
            QueryError::KeyMissing("Shift".into())
        );
    }

    #[test]
    fn test_columns() {
        assert_eq!(columns(&roster()), ["Name", "Route No", "Area"]);
        let empty = RosterSet::new(vec!["Name".into()]);
        assert!(columns(&empty).is_empty());
    }

    #[test]
    fn test_direction_parse() {
        assert_eq!("DESC".parse::<Direction>().unwrap(), Direction::Desc);
        assert!("sideways".parse::<Direction>().is_err());
    }
}

//! Partitioning of roster rows by route and vendor.

use log::{debug, warn};
use serde::Serialize;
use std::collections::{HashMap, HashSet};

use crate::roster::{
    RosterRow, RosterSet, ROUTE_COLUMN, VENDOR_EMAIL_COLUMN, VENDOR_NAME_COLUMN,
};

/// Bucket for rows that carry no value for the grouping column
pub const UNKNOWN_KEY: &str = "Unknown";

/// How rows with the same key are collected
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum GroupingPolicy {
    /// One group per distinct key, wherever its rows appear
    #[default]
    Partition,
    /// A new group every time the key changes from one row to the next.
    /// Only equivalent to `Partition` when the input is sorted by the key.
    Transitions,
}

/// Rows sharing one key
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Group<'a> {
    pub key: String,
    pub rows: Vec<&'a RosterRow>,
}

fn key_of(row: &RosterRow, column: &str) -> String {
    row.text(column).unwrap_or_else(|| UNKNOWN_KEY.to_string())
}

/// Group `rows` by the text of `column`. Groups appear in first-seen key order
/// and keep the input order of their rows.
pub fn group_rows<'a, I>(rows: I, column: &str, policy: GroupingPolicy) -> Vec<Group<'a>>
where
    I: IntoIterator<Item = &'a RosterRow>,
{
    let mut groups: Vec<Group<'a>> = Vec::new();

    match policy {
        GroupingPolicy::Partition => {
            let mut index: HashMap<String, usize> = HashMap::new();
            for row in rows {
                let key = key_of(row, column);
                match index.get(&key) {
                    Some(&i) => groups[i].rows.push(row),
                    None => {
                        index.insert(key.clone(), groups.len());
                        groups.push(Group {
                            key,
                            rows: vec![row],
                        });
                    }
                }
            }
        }
        GroupingPolicy::Transitions => {
            for row in rows {
                let key = key_of(row, column);
                if let Some(current) = groups.last_mut().filter(|g| g.key == key) {
                    current.rows.push(row);
                    continue;
                }
                if let Some(done) = groups.last() {
                    debug!("Flushing group {} with {} rows", done.key, done.rows.len());
                }
                groups.push(Group {
                    key,
                    rows: vec![row],
                });
            }
        }
    }

    groups
}

pub fn group_by_route(roster: &RosterSet, policy: GroupingPolicy) -> Vec<Group<'_>> {
    group_rows(roster, ROUTE_COLUMN, policy)
}

pub fn group_by_vendor(roster: &RosterSet, policy: GroupingPolicy) -> Vec<Group<'_>> {
    group_rows(roster, VENDOR_NAME_COLUMN, policy)
}

/// True when every key of `column` occupies a single run of consecutive rows,
/// i.e. both grouping policies give the same result.
pub fn is_contiguous<'a, I>(rows: I, column: &str) -> bool
where
    I: IntoIterator<Item = &'a RosterRow>,
{
    let mut finished: HashSet<String> = HashSet::new();
    let mut current: Option<String> = None;
    for row in rows {
        let key = key_of(row, column);
        if current.as_ref() == Some(&key) {
            continue;
        }
        if finished.contains(&key) {
            return false;
        }
        if let Some(done) = current.replace(key) {
            finished.insert(done);
        }
    }
    true
}

/// Everything needed to mail one vendor
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VendorPayload<'a> {
    pub vendor: String,
    /// Distinct addresses in first-seen order
    pub recipients: Vec<String>,
    pub rows: Vec<&'a RosterRow>,
    /// The vendor's rows split by route
    pub routes: Vec<Group<'a>>,
}

impl VendorPayload<'_> {
    /// Whether this vendor's rows are ordered by route
    pub fn routes_contiguous(&self) -> bool {
        is_contiguous(self.rows.iter().copied(), ROUTE_COLUMN)
    }
}

/// Build one payload per vendor from the rows whose vendor email is usable
pub fn vendor_payloads(roster: &RosterSet, policy: GroupingPolicy) -> Vec<VendorPayload<'_>> {
    let mailable: Vec<&RosterRow> = roster
        .rows()
        .iter()
        .filter(|row| {
            row.text(VENDOR_EMAIL_COLUMN)
                .is_some_and(|email| email.contains('@'))
        })
        .collect();
    let skipped = roster.len() - mailable.len();
    if skipped > 0 {
        warn!("Skipping {} vendor rows without a valid email", skipped);
    }

    let payloads: Vec<VendorPayload<'_>> = group_rows(mailable, VENDOR_NAME_COLUMN, GroupingPolicy::Partition)
        .into_iter()
        .map(|group| {
            let mut recipients: Vec<String> = Vec::new();
            for row in &group.rows {
                if let Some(email) = row.text(VENDOR_EMAIL_COLUMN) {
                    if !recipients.contains(&email) {
                        recipients.push(email);
                    }
                }
            }
            let routes = group_rows(group.rows.iter().copied(), ROUTE_COLUMN, policy);
            VendorPayload {
                vendor: group.key,
                recipients,
                rows: group.rows,
                routes,
            }
        })
        .collect();

    for payload in payloads.iter().filter(|p| !p.routes_contiguous()) {
        warn!(
            "Rows of vendor {} are not sorted by {}",
            payload.vendor, ROUTE_COLUMN
        );
    }
    payloads
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::roster::CellValue;

    fn text(s: &str) -> CellValue {
        CellValue::Text(s.to_string())
    }

    fn keys(groups: &[Group<'_>]) -> Vec<(String, Vec<String>)> {
        groups
            .iter()
            .map(|g| {
                (
                    g.key.clone(),
                    g.rows.iter().map(|r| r.text("Name").unwrap()).collect(),
                )
            })
            .collect()
    }

    fn routes_abc() -> RosterSet {
        let mut set = RosterSet::new(vec!["Route No".into(), "Name".into()]);
        set.push(vec![CellValue::Int(1), text("A")]);
        set.push(vec![CellValue::Int(2), text("B")]);
        set.push(vec![CellValue::Int(1), text("C")]);
        set
    }

    #[test]
    fn test_partition_merges_keys() {
        let set = routes_abc();
        let groups = group_by_route(&set, GroupingPolicy::Partition);
        assert_eq!(
            keys(&groups),
            vec![
                ("1".to_string(), vec!["A".to_string(), "C".to_string()]),
                ("2".to_string(), vec!["B".to_string()]),
            ]
        );
    }

    #[test]
    fn test_transitions_flush_on_key_change() {
        let set = routes_abc();
        let groups = group_by_route(&set, GroupingPolicy::Transitions);
        assert_eq!(
            keys(&groups),
            vec![
                ("1".to_string(), vec!["A".to_string()]),
                ("2".to_string(), vec!["B".to_string()]),
                ("1".to_string(), vec!["C".to_string()]),
            ]
        );
        assert!(!is_contiguous(&set, ROUTE_COLUMN));
    }

    #[test]
    fn test_missing_key_goes_to_unknown() {
        let mut set = RosterSet::new(vec!["Name".into()]);
        set.push(vec![text("A")]);
        set.push(vec![text("B")]);
        let groups = group_by_vendor(&set, GroupingPolicy::Partition);
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].key, UNKNOWN_KEY);
        assert_eq!(groups[0].rows.len(), 2);
    }

    #[test]
    fn test_sorted_input_is_contiguous() {
        let mut set = RosterSet::new(vec!["Route No".into(), "Name".into()]);
        set.push(vec![CellValue::Int(1), text("A")]);
        set.push(vec![CellValue::Int(1), text("C")]);
        set.push(vec![CellValue::Int(2), text("B")]);
        assert!(is_contiguous(&set, ROUTE_COLUMN));
        assert_eq!(
            group_by_route(&set, GroupingPolicy::Transitions),
            group_by_route(&set, GroupingPolicy::Partition)
        );
    }

    fn vendor_roster() -> RosterSet {
        let mut set = RosterSet::new(vec![
            "S No".into(),
            "Route No".into(),
            "Name".into(),
            "Vendor Names".into(),
            "Vendor Emails".into(),
        ]);
        let rows = [
            (1, 10, "A", "Blue Cabs", "ops@bluecabs.example"),
            (2, 10, "B", "Blue Cabs", "desk@bluecabs.example"),
            (3, 11, "C", "Swift Travels", "N/A"),
            (4, 12, "D", "Swift Travels", "swift@travels.example"),
            (5, 13, "E", "Blue Cabs", "ops@bluecabs.example"),
        ];
        for (sno, route, name, vendor, email) in rows {
            set.push(vec![
                CellValue::Int(sno),
                CellValue::Int(route),
                text(name),
                text(vendor),
                text(email),
            ]);
        }
        set
    }

    #[test]
    fn test_vendor_payloads() {
        let set = vendor_roster();
        let payloads = vendor_payloads(&set, GroupingPolicy::Partition);
        assert_eq!(payloads.len(), 2);

        let blue = &payloads[0];
        assert_eq!(blue.vendor, "Blue Cabs");
        assert_eq!(
            blue.recipients,
            ["ops@bluecabs.example", "desk@bluecabs.example"]
        );
        assert_eq!(blue.rows.len(), 3);
        assert_eq!(
            blue.routes.iter().map(|g| g.key.as_str()).collect::<Vec<_>>(),
            ["10", "13"]
        );

        let swift = &payloads[1];
        assert_eq!(swift.recipients, ["swift@travels.example"]);
        assert_eq!(swift.rows.len(), 1);
        assert_eq!(swift.routes[0].key, "12");
    }

    #[test]
    fn test_contiguity_is_judged_per_vendor() {
        let mut set = RosterSet::new(vec![
            "Route No".into(),
            "Name".into(),
            "Vendor Names".into(),
            "Vendor Emails".into(),
        ]);
        let rows = [
            (1, "A", "Blue Cabs", "ops@blue.example"),
            (2, "B", "Swift Travels", "desk@swift.example"),
            (1, "C", "Blue Cabs", "ops@blue.example"),
            (3, "D", "Swift Travels", "desk@swift.example"),
            (2, "E", "Swift Travels", "desk@swift.example"),
        ];
        for (route, name, vendor, email) in rows {
            set.push(vec![CellValue::Int(route), text(name), text(vendor), text(email)]);
        }
        assert!(!is_contiguous(&set, ROUTE_COLUMN));

        let partition = vendor_payloads(&set, GroupingPolicy::Partition);
        let transitions = vendor_payloads(&set, GroupingPolicy::Transitions);

        // Blue Cabs only ever sees route 1, so both policies agree
        assert!(partition[0].routes_contiguous());
        assert_eq!(transitions[0].routes, partition[0].routes);

        // Swift Travels goes 2, 3, 2
        assert!(!partition[1].routes_contiguous());
        assert_eq!(partition[1].routes.len(), 2);
        assert_eq!(transitions[1].routes.len(), 3);
    }
}

//! Assignment rates grouped by survey, priority, observing template or programme.

use std::collections::{BTreeMap, BTreeSet};

use super::TargetRecord;

/// What to group target records by.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupBy {
    Survey,
    Priority,
    Progtemp,
    Targprog,
}

/// One group's assignment tally.
#[derive(Debug, Clone, PartialEq)]
pub struct GroupRow {
    pub key: String,
    pub total: usize,
    pub assigned: usize,
}

impl GroupRow {
    /// Fraction of the group's targets that got a fibre.
    #[allow(clippy::cast_precision_loss)]
    pub fn fraction(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            self.assigned as f64 / self.total as f64
        }
    }
}

/// Groups `targets` and counts assignments per group.
///
/// A target with several programmes in `targprog` (`|A|B|`) counts once under
/// each of them; `POI` and empty entries are not programmes. Priority groups
/// run from the highest priority down; the rest are ordered by name.
pub fn assignment_table(targets: &[TargetRecord], by: GroupBy) -> Vec<GroupRow> {
    let mut groups: BTreeMap<String, (usize, usize)> = BTreeMap::new();
    for record in targets {
        let keys = match by {
            GroupBy::Survey => BTreeSet::from([record.targsrvy.clone()]),
            GroupBy::Priority => BTreeSet::from([record.targprio.to_string()]),
            GroupBy::Progtemp => BTreeSet::from([record.progtemp.clone()]),
            GroupBy::Targprog => programmes(&record.targprog),
        };
        for key in keys {
            let (total, assigned) = groups.entry(key).or_default();
            *total += 1;
            if record.assigned {
                *assigned += 1;
            }
        }
    }

    let mut rows: Vec<GroupRow> = groups
        .into_iter()
        .map(|(key, (total, assigned))| GroupRow {
            key,
            total,
            assigned,
        })
        .collect();

    if by == GroupBy::Priority {
        let priority = |row: &GroupRow| row.key.parse::<f64>().unwrap_or(f64::NEG_INFINITY);
        rows.sort_by(|a, b| priority(b).total_cmp(&priority(a)));
    }
    rows
}

/// The programmes named in a `|`-separated `targprog` value.
pub fn programmes(targprog: &str) -> BTreeSet<String> {
    targprog
        .trim()
        .split('|')
        .filter(|p| !matches!(*p, "" | "POI"))
        .map(String::from)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn with_programmes(targprog: &str, assigned: bool) -> TargetRecord {
        TargetRecord {
            targprog: targprog.into(),
            ..record("GA", 10.0, assigned)
        }
    }

    fn record(survey: &str, prio: f64, assigned: bool) -> TargetRecord {
        TargetRecord {
            field_name: "F1".into(),
            progtemp: "11331".into(),
            obstemp: "DACEB".into(),
            targsrvy: survey.into(),
            targid: "1".into(),
            targra: None,
            targdec: None,
            targuse: "T".into(),
            targclass: String::new(),
            targprog: String::new(),
            targx: None,
            targy: None,
            fibreid: None,
            configid: None,
            targprio: prio,
            assigned,
        }
    }

    #[test]
    fn survey_groups_count_assignments() {
        let targets = [
            record("WL", 10.0, true),
            record("WL", 6.0, false),
            record("GA", 6.0, true),
        ];
        let rows = assignment_table(&targets, GroupBy::Survey);

        assert_eq!(
            rows,
            [
                GroupRow {
                    key: "GA".into(),
                    total: 1,
                    assigned: 1
                },
                GroupRow {
                    key: "WL".into(),
                    total: 2,
                    assigned: 1
                },
            ]
        );
        assert!((rows[1].fraction() - 0.5).abs() < 1e-12);
    }

    #[test]
    fn priority_groups_sort_numerically_descending() {
        let targets = [
            record("WL", 2.0, false),
            record("WL", 10.0, true),
            record("WL", 6.0, true),
            record("WL", -1.0, false),
        ];
        let keys: Vec<_> = assignment_table(&targets, GroupBy::Priority)
            .into_iter()
            .map(|r| r.key)
            .collect();
        assert_eq!(keys, ["10", "6", "2", "-1"]);
    }

    #[test]
    fn targets_count_under_every_programme() {
        let targets = [
            with_programmes("|GA-LR|WD|", false),
            with_programmes("|GA-LR|", true),
            with_programmes("|POI|", true),
            with_programmes("", false),
        ];

        let rows = assignment_table(&targets, GroupBy::Targprog);

        assert_eq!(
            rows,
            [
                GroupRow {
                    key: "GA-LR".into(),
                    total: 2,
                    assigned: 1
                },
                GroupRow {
                    key: "WD".into(),
                    total: 1,
                    assigned: 0
                },
            ]
        );
    }

    #[test]
    fn programme_list_skips_placeholders_and_repeats() {
        let found: Vec<_> = programmes(" |A|POI||B|A| ").into_iter().collect();
        assert_eq!(found, ["A", "B"]);
    }

    #[test]
    fn empty_group_fraction_is_zero() {
        let row = GroupRow {
            key: "x".into(),
            total: 0,
            assigned: 0,
        };
        assert_eq!(row.fraction(), 0.0);
    }
}

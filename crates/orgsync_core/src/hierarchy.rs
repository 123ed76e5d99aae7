use std::collections::{BTreeSet, HashMap, HashSet};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::HierarchyMode;
use crate::model::OrganizationRecord;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct HierarchyNode {
    pub code: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<HierarchyNode>,
}

/// One parent and its direct children, as kept by the flat layout.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct FlatEntry {
    pub name: String,
    pub children: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum Hierarchy {
    Tree { roots: Vec<HierarchyNode> },
    Flat { parents: Vec<FlatEntry> },
}

/// Where one organization's category hangs: under its parent's category,
/// or under the top-level category when `parent` is `None`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Placement {
    pub name: String,
    pub parent: Option<String>,
}

impl Hierarchy {
    pub fn build(records: &[OrganizationRecord], mode: HierarchyMode) -> Self {
        match mode {
            HierarchyMode::Tree => Self::Tree {
                roots: build_tree(records),
            },
            HierarchyMode::Flat => Self::Flat {
                parents: build_flat(records),
            },
        }
    }

    pub fn mode(&self) -> HierarchyMode {
        match self {
            Self::Tree { .. } => HierarchyMode::Tree,
            Self::Flat { .. } => HierarchyMode::Flat,
        }
    }

    /// Page-creation order: every parent is placed before its children.
    pub fn placements(&self) -> Vec<Placement> {
        let mut out = Vec::new();
        match self {
            Self::Tree { roots } => {
                for root in roots {
                    push_placements(root, None, &mut out);
                }
            }
            Self::Flat { parents } => {
                for entry in parents {
                    out.push(Placement {
                        name: entry.name.clone(),
                        parent: None,
                    });
                    for child in &entry.children {
                        out.push(Placement {
                            name: child.clone(),
                            parent: Some(entry.name.clone()),
                        });
                    }
                }
            }
        }
        out
    }

    /// Every (parent, child) name pair in the hierarchy.
    pub fn edges(&self) -> BTreeSet<(String, String)> {
        self.placements()
            .into_iter()
            .filter_map(|placement| placement.parent.map(|parent| (parent, placement.name)))
            .collect()
    }

    /// Every organization name the hierarchy places.
    pub fn names(&self) -> BTreeSet<String> {
        self.placements()
            .into_iter()
            .map(|placement| placement.name)
            .collect()
    }
}

fn push_placements(node: &HierarchyNode, parent: Option<&str>, out: &mut Vec<Placement>) {
    out.push(Placement {
        name: node.name.clone(),
        parent: parent.map(ToString::to_string),
    });
    for child in &node.children {
        push_placements(child, Some(&node.name), out);
    }
}

/// Build the full-depth forest. Records whose parent chain never reaches a
/// root (unknown parent code, or a cycle) are left out, along with their
/// descendants. Each code is placed at most once and sibling names are unique.
pub fn build_tree(records: &[OrganizationRecord]) -> Vec<HierarchyNode> {
    let mut by_code: HashMap<&str, &OrganizationRecord> = HashMap::new();
    for record in records {
        by_code.entry(record.code.as_str()).or_insert(record);
    }

    let mut children_of: HashMap<&str, Vec<&OrganizationRecord>> = HashMap::new();
    let mut root_records = Vec::new();
    for record in records {
        match record.parent_code() {
            None => root_records.push(record),
            Some(parent) if by_code.contains_key(parent) => {
                children_of.entry(parent).or_default().push(record);
            }
            Some(parent) => {
                debug!(code = %record.code, parent, "dropping organization with unknown parent");
            }
        }
    }

    let mut placed = HashSet::new();
    let mut root_names = HashSet::new();
    let mut roots = Vec::new();
    for record in root_records {
        if placed.contains(record.code.as_str()) || !root_names.insert(record.title()) {
            continue;
        }
        placed.insert(record.code.as_str());
        roots.push(link_node(record, &children_of, &mut placed));
    }
    roots
}

fn link_node<'a>(
    record: &'a OrganizationRecord,
    children_of: &HashMap<&str, Vec<&'a OrganizationRecord>>,
    placed: &mut HashSet<&'a str>,
) -> HierarchyNode {
    let mut node = HierarchyNode {
        code: record.code.clone(),
        name: record.title(),
        children: Vec::new(),
    };
    let mut sibling_names = HashSet::new();
    if let Some(children) = children_of.get(record.code.as_str()) {
        for child in children {
            if placed.contains(child.code.as_str()) || !sibling_names.insert(child.title()) {
                continue;
            }
            placed.insert(child.code.as_str());
            node.children.push(link_node(child, children_of, placed));
        }
    }
    node
}

/// Build the legacy parent-to-children table in a single pass.
///
/// Parents are keyed by code in first-seen order; a child whose parent has
/// no entry yet creates one, and a parent code matching no record drops the
/// child. Children keep first-seen order and are not deduplicated. Codes
/// sharing a name collapse into the first entry's slot with the last
/// entry's children.
pub fn build_flat(records: &[OrganizationRecord]) -> Vec<FlatEntry> {
    let mut by_code: Vec<(String, FlatEntry)> = Vec::new();
    let mut position: HashMap<String, usize> = HashMap::new();

    for record in records {
        match record.parent_code() {
            None => {
                if !position.contains_key(&record.code) {
                    position.insert(record.code.clone(), by_code.len());
                    by_code.push((
                        record.code.clone(),
                        FlatEntry {
                            name: record.title(),
                            children: Vec::new(),
                        },
                    ));
                }
            }
            Some(parent_code) => {
                if let Some(&index) = position.get(parent_code) {
                    by_code[index].1.children.push(record.title());
                } else if let Some(parent) =
                    records.iter().find(|candidate| candidate.code == parent_code)
                {
                    position.insert(parent_code.to_string(), by_code.len());
                    by_code.push((
                        parent_code.to_string(),
                        FlatEntry {
                            name: parent.title(),
                            children: vec![record.title()],
                        },
                    ));
                } else {
                    debug!(code = %record.code, parent = parent_code, "dropping organization with unknown parent");
                }
            }
        }
    }

    let mut entries: Vec<FlatEntry> = Vec::new();
    let mut by_name: HashMap<String, usize> = HashMap::new();
    for (_, entry) in by_code {
        match by_name.get(&entry.name) {
            Some(&index) => entries[index].children = entry.children,
            None => {
                by_name.insert(entry.name.clone(), entries.len());
                entries.push(entry);
            }
        }
    }
    entries
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use super::{FlatEntry, Hierarchy, Placement, build_flat, build_tree};
    use crate::config::HierarchyMode;
    use crate::model::OrganizationRecord;

    fn record(code: &str, label: &str, parent: Option<&str>) -> OrganizationRecord {
        let record = OrganizationRecord::new(code, label);
        match parent {
            Some(parent) => record.with_parent(parent),
            None => record,
        }
    }

    fn sample() -> Vec<OrganizationRecord> {
        vec![
            record("10", "Υπουργείο Α", None),
            record("11", "Διεύθυνση Α1", Some("10")),
            record("12", "Τμήμα Α1α", Some("11")),
            record("20", "Υπουργείο Β", None),
            record("21", "Διεύθυνση Β1", Some("20")),
            record("22", "Διεύθυνση Β2", Some("20")),
        ]
    }

    fn pairs(list: &[(&str, &str)]) -> BTreeSet<(String, String)> {
        list.iter()
            .map(|(parent, child)| (parent.to_string(), child.to_string()))
            .collect()
    }

    #[test]
    fn tree_links_every_generation() {
        let roots = build_tree(&sample());
        assert_eq!(roots.len(), 2);
        assert_eq!(roots[0].name, "Υπουργείο Α");
        assert_eq!(roots[0].children[0].name, "Διεύθυνση Α1");
        assert_eq!(roots[0].children[0].children[0].name, "Τμήμα Α1α");
        assert_eq!(
            roots[1]
                .children
                .iter()
                .map(|child| child.name.as_str())
                .collect::<Vec<_>>(),
            vec!["Διεύθυνση Β1", "Διεύθυνση Β2"]
        );
    }

    #[test]
    fn tree_edges_do_not_depend_on_record_order() {
        let forward = Hierarchy::build(&sample(), HierarchyMode::Tree);
        let mut reversed_records = sample();
        reversed_records.reverse();
        let reversed = Hierarchy::build(&reversed_records, HierarchyMode::Tree);
        assert_eq!(forward.edges(), reversed.edges());
        assert_eq!(
            forward.edges(),
            pairs(&[
                ("Υπουργείο Α", "Διεύθυνση Α1"),
                ("Διεύθυνση Α1", "Τμήμα Α1α"),
                ("Υπουργείο Β", "Διεύθυνση Β1"),
                ("Υπουργείο Β", "Διεύθυνση Β2"),
            ])
        );
    }

    #[test]
    fn flat_edges_do_not_depend_on_record_order() {
        let forward = Hierarchy::build(&sample(), HierarchyMode::Flat);
        let mut reversed_records = sample();
        reversed_records.reverse();
        let reversed = Hierarchy::build(&reversed_records, HierarchyMode::Flat);
        assert_eq!(forward.edges(), reversed.edges());
    }

    #[test]
    fn unknown_parent_excludes_the_child_everywhere() {
        let mut records = sample();
        records.push(record("99", "Ορφανός Φορέας", Some("404")));

        for mode in [HierarchyMode::Tree, HierarchyMode::Flat] {
            let hierarchy = Hierarchy::build(&records, mode);
            assert!(!hierarchy.names().contains("Ορφανός Φορέας"), "{mode:?}");
            assert_eq!(hierarchy.names().len(), 6, "{mode:?}");
        }

        records.push(record("98", "Παιδί Ορφανού", Some("99")));
        let tree = Hierarchy::build(&records, HierarchyMode::Tree);
        assert!(!tree.names().contains("Ορφανός Φορέας"));
        assert!(!tree.names().contains("Παιδί Ορφανού"));
    }

    #[test]
    fn cycles_are_unreachable_and_dropped() {
        let records = vec![
            record("1", "Ρίζα", None),
            record("2", "Κύκλος Α", Some("3")),
            record("3", "Κύκλος Β", Some("2")),
        ];
        let tree = Hierarchy::build(&records, HierarchyMode::Tree);
        assert_eq!(tree.names(), BTreeSet::from(["Ρίζα".to_string()]));
    }

    #[test]
    fn tree_children_are_unique_per_parent() {
        let records = vec![
            record("1", "Ρίζα", None),
            record("2", "Παιδί", Some("1")),
            record("2", "Παιδί", Some("1")),
            record("1", "Ρίζα", None),
        ];
        let roots = build_tree(&records);
        assert_eq!(roots.len(), 1);
        assert_eq!(roots[0].children.len(), 1);
    }

    #[test]
    fn flat_keeps_first_seen_order_and_duplicates() {
        let records = vec![
            record("2", "Παιδί Β", Some("1")),
            record("1", "Ρίζα", None),
            record("3", "Παιδί Α", Some("1")),
            record("3", "Παιδί Α", Some("1")),
        ];
        assert_eq!(
            build_flat(&records),
            vec![FlatEntry {
                name: "Ρίζα".to_string(),
                children: vec![
                    "Παιδί Β".to_string(),
                    "Παιδί Α".to_string(),
                    "Παιδί Α".to_string()
                ],
            }]
        );
    }

    #[test]
    fn flat_registers_intermediate_parents_as_entries() {
        let entries = build_flat(&sample());
        let names = entries
            .iter()
            .map(|entry| entry.name.as_str())
            .collect::<Vec<_>>();
        assert_eq!(names, vec!["Υπουργείο Α", "Διεύθυνση Α1", "Υπουργείο Β"]);
    }

    #[test]
    fn tree_placements_put_parents_first() {
        let hierarchy = Hierarchy::build(&sample(), HierarchyMode::Tree);
        let placements = hierarchy.placements();
        assert_eq!(
            placements[0],
            Placement {
                name: "Υπουργείο Α".to_string(),
                parent: None
            }
        );
        assert_eq!(
            placements[2],
            Placement {
                name: "Τμήμα Α1α".to_string(),
                parent: Some("Διεύθυνση Α1".to_string())
            }
        );
        assert_eq!(placements.len(), 6);
    }

    #[test]
    fn hierarchy_serializes_with_mode_tag() {
        let hierarchy = Hierarchy::build(&sample(), HierarchyMode::Flat);
        let json = serde_json::to_value(&hierarchy).expect("encode");
        assert_eq!(json["mode"], "flat");
        let decoded: Hierarchy = serde_json::from_value(json).expect("decode");
        assert_eq!(decoded.mode(), HierarchyMode::Flat);
    }
}

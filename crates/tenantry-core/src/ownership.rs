//! Ownership validation.
//!
//! Proves that no two units claim the same member of a resource class, and
//! that what each unit declares in its manifest is actually defined in its
//! fragments. All checks run to completion and every problem is returned.
//!
//! The checks, in reporting order:
//!
//! 1. Manifest loading ([`load_manifests`])
//! 2. Declared members, per class, across units
//! 3. Rules fragments: cross-unit `match` paths and declared-but-undefined
//!    paths
//! 4. Index fragments: entries without a collection group, cross-unit
//!    groups and declared-but-absent groups
//! 5. Storage fragments, as rules fragments

use std::collections::{BTreeMap, BTreeSet};

use crate::error::Violation;
use crate::fragment::{IndexFragment, match_paths, read_fragment};
use crate::layout::{InfraLayout, ResourceClass};
use crate::manifest::{Unit, discover_units, load_manifests};

/// Owner of each claimed `(class, member)` pair.
///
/// Claims are insert-or-detect: a claim by a different unit is a collision
/// and the later claimant becomes the recorded owner; a repeated claim by the
/// same unit is accepted silently.
#[derive(Debug, Clone, Default)]
pub struct OwnershipMap {
    owners: BTreeMap<(ResourceClass, String), String>,
}

impl OwnershipMap {
    /// Creates an empty map.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records `unit` as owner of `member`.
    ///
    /// Returns the previous owner when it is a different unit.
    pub fn claim(&mut self, class: ResourceClass, member: &str, unit: &str) -> Option<String> {
        let previous = self
            .owners
            .insert((class, member.to_string()), unit.to_string());
        previous.filter(|owner| owner != unit)
    }

    /// Current owner of `member`.
    #[must_use]
    pub fn owner(&self, class: ResourceClass, member: &str) -> Option<&str> {
        self.owners
            .get(&(class, member.to_string()))
            .map(String::as_str)
    }

    /// Number of claimed members across all classes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.owners.len()
    }

    /// Whether nothing has been claimed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.owners.is_empty()
    }
}

/// Checks that no member is declared by two units.
#[must_use]
pub fn validate_declarations(units: &[Unit]) -> Vec<Violation> {
    let mut violations = Vec::new();
    let mut owners = OwnershipMap::new();

    for class in ResourceClass::ALL {
        for unit in units {
            for member in unit.manifest.members(class) {
                if let Some(first) = owners.claim(class, member, &unit.name) {
                    violations.push(Violation::OwnershipCollision {
                        class,
                        member: member.clone(),
                        first,
                        second: unit.name.clone(),
                    });
                }
            }
        }
    }

    violations
}

/// Checks the rules or storage fragments of every unit.
///
/// `class` must be [`ResourceClass::RulesPaths`] or
/// [`ResourceClass::StoragePaths`].
#[must_use]
pub fn validate_path_fragments(
    layout: &InfraLayout,
    units: &[Unit],
    class: ResourceClass,
) -> Vec<Violation> {
    debug_assert_ne!(class, ResourceClass::IndexGroups);
    let mut violations = Vec::new();
    let mut owners = OwnershipMap::new();

    for unit in units {
        let path = layout.fragment_path(&unit.name, class);
        let fragment = match read_fragment(&path, class) {
            Ok(text) => text,
            Err(violation) => {
                violations.push(violation);
                continue;
            },
        };

        let defined = match_paths(&fragment);
        for member in &defined {
            if let Some(first) = owners.claim(class, member, &unit.name) {
                violations.push(Violation::FragmentCollision {
                    class,
                    member: member.clone(),
                    first,
                    second: unit.name.clone(),
                });
            }
        }

        for declared in unit.manifest.members(class) {
            if !defined.contains(declared) {
                violations.push(Violation::DeclarationDrift {
                    path: path.clone(),
                    class,
                    member: declared.clone(),
                });
            }
        }
    }

    violations
}

/// Checks the index fragment of every unit.
#[must_use]
pub fn validate_index_fragments(layout: &InfraLayout, units: &[Unit]) -> Vec<Violation> {
    let class = ResourceClass::IndexGroups;
    let mut violations = Vec::new();
    let mut owners = OwnershipMap::new();

    for unit in units {
        let path = layout.fragment_path(&unit.name, class);
        let fragment = match IndexFragment::load(&path) {
            Ok(fragment) => fragment,
            Err(violation) => {
                violations.push(violation);
                continue;
            },
        };

        let (present, problems) = fragment.collection_groups(&path);
        violations.extend(problems);

        for group in &present {
            if let Some(first) = owners.claim(class, group, &unit.name) {
                violations.push(Violation::FragmentCollision {
                    class,
                    member: group.clone(),
                    first,
                    second: unit.name.clone(),
                });
            }
        }

        let missing: BTreeSet<&String> = unit
            .manifest
            .members(class)
            .iter()
            .filter(|group| !present.contains(*group))
            .collect();
        if !missing.is_empty() {
            violations.push(Violation::MissingIndexGroups {
                path,
                groups: missing.into_iter().cloned().collect(),
            });
        }
    }

    violations
}

/// Validates every unit under `layout`.
///
/// Returns all problems found; an empty list means the units are fully
/// consistent. Nothing on disk is modified.
#[must_use]
pub fn validate(layout: &InfraLayout) -> Vec<Violation> {
    let names = match discover_units(layout) {
        Ok(names) => names,
        Err(violation) => return vec![violation],
    };

    let (units, mut violations) = load_manifests(layout, &names);
    violations.extend(validate_declarations(&units));
    violations.extend(validate_path_fragments(
        layout,
        &units,
        ResourceClass::RulesPaths,
    ));
    violations.extend(validate_index_fragments(layout, &units));
    violations.extend(validate_path_fragments(
        layout,
        &units,
        ResourceClass::StoragePaths,
    ));

    tracing::info!(
        units = units.len(),
        violations = violations.len(),
        "validation finished"
    );
    violations
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::Manifest;

    fn unit(name: &str, class: ResourceClass, members: &[&str]) -> Unit {
        Unit {
            name: name.to_string(),
            manifest: Manifest::new(name).with_members(class, members.iter().copied()),
        }
    }

    #[test]
    fn claim_detects_other_owner_only() {
        let mut map = OwnershipMap::new();
        assert_eq!(map.claim(ResourceClass::RulesPaths, "/a", "x"), None);
        assert_eq!(map.claim(ResourceClass::RulesPaths, "/a", "x"), None);
        assert_eq!(
            map.claim(ResourceClass::RulesPaths, "/a", "y"),
            Some("x".to_string())
        );
        assert_eq!(map.owner(ResourceClass::RulesPaths, "/a"), Some("y"));
        assert_eq!(map.len(), 1);
    }

    #[test]
    fn classes_are_independent() {
        let mut map = OwnershipMap::new();
        assert_eq!(map.claim(ResourceClass::RulesPaths, "users", "x"), None);
        assert_eq!(map.claim(ResourceClass::IndexGroups, "users", "y"), None);
        assert_eq!(map.len(), 2);
    }

    #[test]
    fn declaration_collision_names_both_units() {
        let units = vec![
            unit("x", ResourceClass::RulesPaths, &["/users/{id}"]),
            unit("y", ResourceClass::RulesPaths, &["/users/{id}"]),
        ];
        assert_eq!(
            validate_declarations(&units),
            vec![Violation::OwnershipCollision {
                class: ResourceClass::RulesPaths,
                member: "/users/{id}".to_string(),
                first: "x".to_string(),
                second: "y".to_string(),
            }]
        );
    }

    #[test]
    fn relisted_member_in_one_unit_is_not_a_collision() {
        let units = vec![unit("x", ResourceClass::StoragePaths, &["/a", "/a"])];
        assert!(validate_declarations(&units).is_empty());
    }

    #[test]
    fn three_claimants_report_each_handover() {
        let units = vec![
            unit("a", ResourceClass::IndexGroups, &["g"]),
            unit("b", ResourceClass::IndexGroups, &["g"]),
            unit("c", ResourceClass::IndexGroups, &["g"]),
        ];
        let pairs: Vec<(String, String)> = validate_declarations(&units)
            .into_iter()
            .map(|v| match v {
                Violation::OwnershipCollision { first, second, .. } => (first, second),
                other => panic!("unexpected {other:?}"),
            })
            .collect();
        assert_eq!(
            pairs,
            vec![
                ("a".to_string(), "b".to_string()),
                ("b".to_string(), "c".to_string())
            ]
        );
    }
}

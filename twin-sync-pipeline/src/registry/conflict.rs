//! Field-level schema conflict detection.
//!
//! A proposed schema is deep-merged onto each registered one, then the
//! original and merged schemas are walked in lock-step. A field present
//! in both sides with a differing resolved type is a conflict; a field
//! present on only one side is additive and therefore safe.
use twin_sync_shared::types::{FieldConflict, FieldSchema, FieldType};

/// Overlays `proposed` onto `base`, recursing into nested objects.
pub fn deep_merge(base: &FieldSchema, proposed: &FieldSchema) -> FieldSchema {
    let mut merged = base.clone();
    for (name, proposed_type) in proposed {
        match (merged.get(name), proposed_type) {
            (Some(FieldType::Object(base_fields)), FieldType::Object(proposed_fields)) => {
                let nested = deep_merge(base_fields, proposed_fields);
                merged.insert(name.clone(), FieldType::Object(nested));
            }
            _ => {
                merged.insert(name.clone(), proposed_type.clone());
            }
        }
    }
    merged
}

/// Collects every type mismatch between `original` and `merged`.
///
/// Never halts early, so the caller can present all problems at once.
pub fn schema_conflicts(original: &FieldSchema, merged: &FieldSchema) -> Vec<FieldConflict> {
    let mut conflicts = Vec::new();
    walk(original, merged, "", &mut conflicts);
    conflicts
}

fn walk(original: &FieldSchema, merged: &FieldSchema, prefix: &str, out: &mut Vec<FieldConflict>) {
    for (name, original_type) in original {
        let Some(merged_type) = merged.get(name) else {
            continue;
        };
        let path = if prefix.is_empty() {
            name.clone()
        } else {
            format!("{prefix}.{name}")
        };
        match (original_type, merged_type) {
            (FieldType::Object(original_fields), FieldType::Object(merged_fields)) => {
                walk(original_fields, merged_fields, &path, out);
            }
            _ if original_type == merged_type => {}
            _ => out.push(FieldConflict {
                path,
                current_type: original_type.type_name(),
                new_type: merged_type.type_name(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use twin_sync_shared::types::ScalarType;

    fn schema(entries: &[(&str, FieldType)]) -> FieldSchema {
        entries
            .iter()
            .map(|(name, ft)| (name.to_string(), ft.clone()))
            .collect()
    }

    fn scalar(t: ScalarType) -> FieldType {
        FieldType::Scalar(t)
    }

    fn conflicts_between(current: &FieldSchema, proposed: &FieldSchema) -> Vec<FieldConflict> {
        schema_conflicts(current, &deep_merge(current, proposed))
    }

    #[test]
    fn test_additive_change_is_safe() {
        let current = schema(&[("temperature", scalar(ScalarType::Number))]);
        let proposed = schema(&[
            ("temperature", scalar(ScalarType::Number)),
            ("floor", scalar(ScalarType::Integer)),
        ]);
        assert!(conflicts_between(&current, &proposed).is_empty());
    }

    #[test]
    fn test_changed_field_type_is_reported() {
        let current = schema(&[("floor", scalar(ScalarType::Integer))]);
        let proposed = schema(&[("floor", scalar(ScalarType::Keyword))]);
        let conflicts = conflicts_between(&current, &proposed);
        assert_eq!(conflicts.len(), 1);
        assert_eq!(conflicts[0].path, "floor");
        assert_eq!(conflicts[0].current_type, "integer");
        assert_eq!(conflicts[0].new_type, "keyword");
    }

    #[test]
    fn test_nested_conflicts_use_dotted_paths() {
        let current = schema(&[(
            "building",
            FieldType::Object(schema(&[
                ("floor", scalar(ScalarType::Integer)),
                ("wing", scalar(ScalarType::Keyword)),
            ])),
        )]);
        let proposed = schema(&[(
            "building",
            FieldType::Object(schema(&[("floor", scalar(ScalarType::GeoPoint))])),
        )]);
        let conflicts = conflicts_between(&current, &proposed);
        assert_eq!(conflicts.len(), 1);
        assert_eq!(conflicts[0].path, "building.floor");
    }

    #[test]
    fn test_object_replaced_by_scalar_conflicts_at_object_path() {
        let current = schema(&[(
            "building",
            FieldType::Object(schema(&[("floor", scalar(ScalarType::Integer))])),
        )]);
        let proposed = schema(&[("building", scalar(ScalarType::Keyword))]);
        let conflicts = conflicts_between(&current, &proposed);
        assert_eq!(conflicts.len(), 1);
        assert_eq!(conflicts[0].path, "building");
        assert_eq!(conflicts[0].current_type, "object");
        assert_eq!(conflicts[0].new_type, "keyword");
    }

    #[test]
    fn test_detection_is_direction_independent() {
        let a = schema(&[
            ("floor", scalar(ScalarType::Integer)),
            ("shared", scalar(ScalarType::Number)),
            ("only_a", scalar(ScalarType::Boolean)),
        ]);
        let b = schema(&[
            ("floor", scalar(ScalarType::Keyword)),
            ("shared", scalar(ScalarType::Number)),
            ("only_b", scalar(ScalarType::Keyword)),
        ]);

        let mut paths_ab: Vec<String> = conflicts_between(&a, &b)
            .into_iter()
            .map(|c| c.path)
            .collect();
        let mut paths_ba: Vec<String> = conflicts_between(&b, &a)
            .into_iter()
            .map(|c| c.path)
            .collect();
        paths_ab.sort();
        paths_ba.sort();
        assert_eq!(paths_ab, paths_ba);
        assert_eq!(paths_ab, vec!["floor".to_string()]);
    }
}

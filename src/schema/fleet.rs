//! Built-in schemas of the fleet-management entity types.

use super::{Cardinality, EntitySchema, FilterField, SubAttribute, ValueConverter, ValueType};
use crate::predicate::Value;
use std::sync::Arc;

pub(crate) const TARGET_UPDATE_STATUS: [&str; 5] =
    ["ERROR", "IN_SYNC", "PENDING", "REGISTERED", "UNKNOWN"];

pub(crate) const ROLLOUT_STATUS: [&str; 12] = [
    "CREATING",
    "READY",
    "PAUSED",
    "STARTING",
    "STOPPED",
    "RUNNING",
    "FINISHED",
    "DELETING",
    "DELETED",
    "WAITING_FOR_APPROVAL",
    "APPROVAL_DENIED",
    "STOPPING",
];

pub(crate) const ACTION_STATUS: [&str; 12] = [
    "FINISHED",
    "ERROR",
    "WARNING",
    "RUNNING",
    "CANCELED",
    "CANCELING",
    "RETRIEVED",
    "DOWNLOAD",
    "SCHEDULED",
    "CANCEL_REJECTED",
    "DOWNLOADED",
    "WAIT_FOR_CONFIRMATION",
];

/// Maps the action `status` filter (`pending` / `finished`) onto the
/// boolean `active` column.
#[derive(Debug, Default)]
pub struct ActionStatusConverter;

impl ValueConverter for ActionStatusConverter {
    fn convert(&self, raw: &str) -> Option<Value> {
        match raw.to_ascii_lowercase().as_str() {
            "pending" => Some(Value::Bool(true)),
            "finished" => Some(Value::Bool(false)),
            _ => None,
        }
    }

    fn possible_values(&self) -> Vec<String> {
        vec!["pending".to_string(), "finished".to_string()]
    }
}

fn distribution_set_ref(name: &str, backend: &str) -> FilterField {
    FilterField::relation(
        name,
        backend,
        Cardinality::One,
        vec![
            SubAttribute::number("id"),
            SubAttribute::text("name"),
            SubAttribute::text("version"),
        ],
    )
}

fn type_ref(backend: &str) -> FilterField {
    FilterField::relation(
        "type",
        backend,
        Cardinality::One,
        vec![
            SubAttribute::aliased("key", "type_key", ValueType::Text),
            SubAttribute::text("name"),
        ],
    )
}

fn target() -> EntitySchema {
    EntitySchema::new(
        "target",
        "id",
        vec![
            FilterField::text("id", "controller_id"),
            FilterField::text("name", "name"),
            FilterField::text("description", "description"),
            FilterField::number("createdat", "created_at"),
            FilterField::number("lastmodifiedat", "last_modified_at"),
            FilterField::text("controllerid", "controller_id"),
            FilterField::enumerated("updatestatus", "update_status", TARGET_UPDATE_STATUS),
            FilterField::text("ipaddress", "address"),
            FilterField::map("attribute", "controller_attributes", "attribute_key", "attribute_value"),
            distribution_set_ref("assignedds", "assigned_distribution_set"),
            distribution_set_ref("installedds", "installed_distribution_set"),
            FilterField::relation("tag", "tags", Cardinality::Many, vec![SubAttribute::text("name")]),
            FilterField::number("lastcontrollerrequestat", "last_target_query"),
            FilterField::map("metadata", "metadata", "meta_key", "meta_value"),
            FilterField::relation(
                "targettype",
                "target_type",
                Cardinality::One,
                vec![
                    SubAttribute::aliased("key", "type_key", ValueType::Text),
                    SubAttribute::text("name"),
                ],
            ),
        ],
    )
}

fn distribution_set() -> EntitySchema {
    EntitySchema::new(
        "distribution_set",
        "id",
        vec![
            FilterField::number("id", "id"),
            FilterField::text("name", "name"),
            FilterField::text("version", "version"),
            FilterField::text("description", "description"),
            FilterField::number("createdat", "created_at"),
            FilterField::number("lastmodifiedat", "last_modified_at"),
            type_ref("ds_type"),
            FilterField::boolean("complete", "complete"),
            FilterField::boolean("valid", "valid"),
            FilterField::relation("tag", "tags", Cardinality::Many, vec![SubAttribute::text("name")]),
            FilterField::map("metadata", "metadata", "meta_key", "meta_value"),
            FilterField::relation(
                "module",
                "modules",
                Cardinality::Many,
                vec![SubAttribute::text("name"), SubAttribute::text("version")],
            ),
        ],
    )
}

fn software_module() -> EntitySchema {
    EntitySchema::new(
        "software_module",
        "id",
        vec![
            FilterField::number("id", "id"),
            FilterField::text("name", "name"),
            FilterField::text("version", "version"),
            FilterField::text("description", "description"),
            FilterField::text("vendor", "vendor"),
            type_ref("sm_type"),
            FilterField::map("metadata", "metadata", "meta_key", "meta_value"),
        ],
    )
}

fn rollout() -> EntitySchema {
    EntitySchema::new(
        "rollout",
        "id",
        vec![
            FilterField::number("id", "id"),
            FilterField::text("name", "name"),
            FilterField::text("description", "description"),
            FilterField::enumerated("status", "status", ROLLOUT_STATUS),
            distribution_set_ref("distributionset", "distribution_set"),
        ],
    )
}

fn action() -> EntitySchema {
    EntitySchema::new(
        "action",
        "id",
        vec![
            FilterField::number("id", "id"),
            FilterField::boolean("status", "active").with_converter(Arc::new(ActionStatusConverter)),
            FilterField::enumerated("detailstatus", "status", ACTION_STATUS),
            FilterField::number("lastmodifiedat", "last_modified_at"),
            FilterField::relation(
                "target",
                "target",
                Cardinality::One,
                vec![
                    SubAttribute::aliased("controllerid", "controller_id", ValueType::Text),
                    SubAttribute::text("name"),
                ],
            ),
            distribution_set_ref("distributionset", "distribution_set"),
            FilterField::relation(
                "rollout",
                "rollout",
                Cardinality::One,
                vec![SubAttribute::number("id"), SubAttribute::text("name")],
            ),
        ],
    )
}

fn target_filter_query() -> EntitySchema {
    EntitySchema::new(
        "target_filter_query",
        "id",
        vec![
            FilterField::number("id", "id"),
            FilterField::text("name", "name"),
            FilterField::text("query", "query"),
            distribution_set_ref("autoassigndistributionset", "auto_assign_distribution_set"),
        ],
    )
}

pub(super) fn schemas() -> Vec<EntitySchema> {
    vec![
        target(),
        distribution_set(),
        software_module(),
        rollout(),
        action(),
        target_filter_query(),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_action_status_converter() {
        let converter = ActionStatusConverter;
        assert_eq!(converter.convert("Pending"), Some(Value::Bool(true)));
        assert_eq!(converter.convert("finished"), Some(Value::Bool(false)));
        assert_eq!(converter.convert("running"), None);
        assert_eq!(converter.possible_values(), vec!["pending", "finished"]);
    }

    #[test]
    fn test_every_schema_has_an_identifier() {
        for schema in schemas() {
            assert!(schema.fields.iter().all(|f| f.identifier == schema.identifier));
        }
    }
}

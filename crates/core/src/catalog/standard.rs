//! Built-in remediation actions for the cloud platform.

use crate::catalog::OperationCatalog;
use crate::domain::operation::{OperationCategory, OperationDefinition, RiskLevel, RollbackSpec};

pub fn standard_definitions() -> Vec<OperationDefinition> {
    use OperationCategory::{Compute, Identity, Logging, Network, Storage};
    use RiskLevel::{Critical, High, Low, Medium};

    vec![
        OperationDefinition::new("block_ip", Network, Medium)
            .required(&["ip_address", "network"])
            .optional(&["rule_name", "priority", "project_id", "description"])
            .permissions(&["compute.firewalls.create", "compute.networks.updatePolicy"])
            .resource_types(&["network", "firewall_rule"])
            .reversible()
            .timeout_seconds(120),
        OperationDefinition::new("unblock_ip", Network, Medium)
            .required(&["rule_name"])
            .optional(&["network", "project_id"])
            .permissions(&["compute.firewalls.delete"])
            .resource_types(&["network", "firewall_rule"])
            .timeout_seconds(120),
        OperationDefinition::new("disable_user_account", Identity, High)
            .required(&["user_email"])
            .optional(&["reason", "project_id"])
            .permissions(&["admin.directory.users.update"])
            .resource_types(&["user_account"])
            .reversible()
            .timeout_seconds(60),
        OperationDefinition::new("enable_user_account", Identity, Medium)
            .required(&["user_email"])
            .optional(&["reason", "project_id"])
            .permissions(&["admin.directory.users.update"])
            .resource_types(&["user_account"])
            .timeout_seconds(60),
        OperationDefinition::new("stop_instance", Compute, High)
            .required(&["instance_name", "zone"])
            .optional(&["project_id", "discard_local_ssd"])
            .permissions(&["compute.instances.stop", "compute.instances.get"])
            .resource_types(&["compute_instance"])
            .reversible()
            .timeout_seconds(300),
        OperationDefinition::new("start_instance", Compute, Medium)
            .required(&["instance_name", "zone"])
            .optional(&["project_id"])
            .permissions(&["compute.instances.start", "compute.instances.get"])
            .resource_types(&["compute_instance"])
            .timeout_seconds(300),
        OperationDefinition::new("isolate_instance", Compute, High)
            .required(&["instance_name", "zone"])
            .optional(&["project_id", "network_tags"])
            .permissions(&["compute.instances.setTags", "compute.firewalls.create"])
            .prerequisites(&["snapshot_disk"])
            .resource_types(&["compute_instance"])
            .timeout_seconds(300),
        OperationDefinition::new("snapshot_disk", Compute, Low)
            .required(&["disk_name", "zone"])
            .optional(&["snapshot_name", "project_id"])
            .permissions(&["compute.disks.createSnapshot", "compute.snapshots.create"])
            .resource_types(&["disk"])
            .timeout_seconds(600),
        OperationDefinition::new("revoke_iam_binding", Identity, Critical)
            .required(&["member", "role"])
            .optional(&["project_id", "condition"])
            .permissions(&[
                "resourcemanager.projects.getIamPolicy",
                "resourcemanager.projects.setIamPolicy",
            ])
            .resource_types(&["project", "service_account", "bucket"])
            .reversible()
            .timeout_seconds(120),
        OperationDefinition::new("restore_iam_binding", Identity, High)
            .required(&["member", "role"])
            .optional(&["project_id", "condition"])
            .permissions(&[
                "resourcemanager.projects.getIamPolicy",
                "resourcemanager.projects.setIamPolicy",
            ])
            .resource_types(&["project", "service_account", "bucket"])
            .timeout_seconds(120),
        OperationDefinition::new("remove_bucket_public_access", Storage, High)
            .required(&["bucket_name"])
            .optional(&["project_id"])
            .permissions(&["storage.buckets.getIamPolicy", "storage.buckets.setIamPolicy"])
            .resource_types(&["bucket"])
            .reversible()
            .timeout_seconds(120),
        OperationDefinition::new("restore_bucket_public_access", Storage, High)
            .required(&["bucket_name", "members"])
            .optional(&["project_id"])
            .permissions(&["storage.buckets.getIamPolicy", "storage.buckets.setIamPolicy"])
            .resource_types(&["bucket"])
            .timeout_seconds(120),
        OperationDefinition::new("rotate_service_account_key", Identity, High)
            .required(&["service_account_email"])
            .optional(&["key_id", "project_id"])
            .permissions(&["iam.serviceAccountKeys.create", "iam.serviceAccountKeys.delete"])
            .resource_types(&["service_account"])
            .approval_required()
            .timeout_seconds(120)
            .max_retries(1),
        OperationDefinition::new("enable_audit_logging", Logging, Low)
            .optional(&["project_id", "log_types"])
            .permissions(&[
                "resourcemanager.projects.getIamPolicy",
                "resourcemanager.projects.setIamPolicy",
            ])
            .resource_types(&["project"])
            .timeout_seconds(120),
        OperationDefinition::new("enable_vpc_flow_logs", Network, Low)
            .required(&["subnetwork", "region"])
            .optional(&["project_id", "sampling_rate"])
            .permissions(&["compute.subnetworks.update"])
            .resource_types(&["subnetwork"])
            .timeout_seconds(120),
    ]
}

/// Inverse recipe for a built-in reversible action.
pub fn standard_rollback_spec(action_type: &str) -> Option<RollbackSpec> {
    let spec = match action_type {
        "block_ip" => RollbackSpec::new("unblock_ip")
            .map_state("rule_name", "rule_name")
            .map_state("network", "network"),
        "disable_user_account" => {
            RollbackSpec::new("enable_user_account").map_state("user_email", "user_email")
        }
        "stop_instance" => RollbackSpec::new("start_instance")
            .map_state("instance_name", "instance_name")
            .map_state("zone", "zone"),
        "revoke_iam_binding" => RollbackSpec::new("restore_iam_binding")
            .map_state("member", "member")
            .map_state("role", "role")
            .map_state("condition", "condition"),
        "remove_bucket_public_access" => RollbackSpec::new("restore_bucket_public_access")
            .map_state("bucket_name", "bucket_name")
            .map_state("members", "public_members"),
        _ => return None,
    };
    Some(spec)
}

/// Catalog holding every built-in definition and no implementations.
pub fn standard_catalog() -> OperationCatalog {
    let mut catalog = OperationCatalog::new();
    for definition in standard_definitions() {
        catalog.register_definition(definition);
    }
    catalog
}

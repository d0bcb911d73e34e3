//! Request and response bodies of the scheduler extension protocol.

use std::collections::BTreeMap;

use devclaim_scheduler::FilterOutcome;
use devclaim_state::{Binding, Host, Workload};
use serde::{Deserialize, Serialize};

/// Body of `POST /api/v1/scheduler/filter`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FilterArgs {
    pub workload: Workload,
    /// Absent means "no host list", answered with an empty result.
    #[serde(default)]
    pub candidate_hosts: Option<Vec<Host>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FilterResponse {
    pub feasible_hosts: Vec<Host>,
    pub rejected_hosts: BTreeMap<String, String>,
    /// Empty on success.
    pub error: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl FilterResponse {
    pub fn from_error(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            ..Default::default()
        }
    }
}

impl From<FilterOutcome> for FilterResponse {
    fn from(outcome: FilterOutcome) -> Self {
        Self {
            feasible_hosts: outcome.feasible_hosts,
            rejected_hosts: outcome.rejected_hosts,
            error: outcome.error.unwrap_or_default(),
            message: outcome.message,
        }
    }
}

/// Body of `POST /api/v1/scheduler/bind`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BindArgs {
    pub workload_name: String,
    pub workload_namespace: String,
    #[serde(rename = "workloadUID", default)]
    pub workload_uid: String,
    pub target_host: String,
}

impl From<BindArgs> for Binding {
    fn from(args: BindArgs) -> Self {
        Binding {
            workload_name: args.workload_name,
            workload_namespace: args.workload_namespace,
            workload_uid: args.workload_uid,
            target_host: args.target_host,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct BindResponse {
    /// Empty on success.
    pub error: String,
}

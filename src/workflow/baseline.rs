//! Baseline health snapshot of the overlay control plane.
//!
//! The collect stage probes a fixed roster of Kube-OVN workloads and OVN
//! endpoints in one bounded batch and condenses the results into a single
//! `baseline` evidence item. The verify stage reuses the same probe to
//! compare cluster health before and after executed fixes.

use std::time::Duration;

use serde::Serialize;
use serde_json::{json, Value};
use tracing::info;

use super::{SessionHandle, WorkflowEngine};
use crate::error::{EngineResult, ErrorCode};
use crate::session::{CallStatus, EvidenceItem, Session, ToolCallRecord};

/// Evidence tag carrying the condensed snapshot.
pub(crate) const BASELINE_TAG: &str = "baseline";

/// Control-plane roster probed by every snapshot, as (kind, name) pairs in
/// the configured Kube-OVN namespace.
pub(crate) const BASELINE_COMPONENTS: &[(&str, &str)] = &[
    ("deployment", "kube-ovn-controller"),
    ("deployment", "kube-ovn-monitor"),
    ("deployment", "ovn-central"),
    ("daemonset", "kube-ovn-cni"),
    ("daemonset", "kube-ovn-pinger"),
    ("daemonset", "ovs-ovn"),
    ("endpoints", "ovn-nb"),
    ("endpoints", "ovn-sb"),
    ("endpoints", "ovn-northd"),
];

/// Health judgment for one probed component.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub(crate) enum HealthStatus {
    Healthy,
    Unhealthy,
    Missing,
    PermissionDenied,
    TimedOut,
    Unknown,
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HealthStatus::Healthy => write!(f, "healthy"),
            HealthStatus::Unhealthy => write!(f, "unhealthy"),
            HealthStatus::Missing => write!(f, "missing"),
            HealthStatus::PermissionDenied => write!(f, "permission_denied"),
            HealthStatus::TimedOut => write!(f, "timed_out"),
            HealthStatus::Unknown => write!(f, "unknown"),
        }
    }
}

/// One component's judged state.
#[derive(Debug, Clone, Serialize)]
pub(crate) struct ComponentHealth {
    /// `kind/name` of the probed component.
    pub component: String,
    pub status: HealthStatus,
    /// Short human-readable justification.
    pub detail: String,
}

/// COLLECT: snapshot the control plane and record it as evidence.
pub(crate) async fn run_collect(
    engine: &WorkflowEngine,
    handle: &mut SessionHandle,
) -> EngineResult<()> {
    let (records, health) = collect_baseline(engine, handle.session.round).await;

    handle.session.tool_calls.extend(records);
    let unhealthy = record_snapshot(&mut handle.session, &health);

    info!(
        session_id = %handle.session.id,
        components = health.len(),
        unhealthy = unhealthy.len(),
        "Baseline collected"
    );
    Ok(())
}

/// Fold judgments into a `baseline` evidence item, superseding any earlier
/// snapshot. Returns the unhealthy component list.
pub(crate) fn record_snapshot(session: &mut Session, health: &[ComponentHealth]) -> Vec<String> {
    let unhealthy: Vec<String> = health
        .iter()
        .filter(|h| h.status != HealthStatus::Healthy)
        .map(|h| h.component.clone())
        .collect();

    session.record_evidence(EvidenceItem::new(
        BASELINE_TAG,
        "baseline",
        json!({
            "components": health,
            "unhealthy": unhealthy,
            "summary": summarize(health),
        }),
    ));
    unhealthy
}

/// Probe the full roster in one batch under the baseline timeout.
///
/// Returns the finished audit records and the per-component judgments, both
/// in roster order.
pub(crate) async fn collect_baseline(
    engine: &WorkflowEngine,
    round: u32,
) -> (Vec<ToolCallRecord>, Vec<ComponentHealth>) {
    let pending: Vec<ToolCallRecord> = BASELINE_COMPONENTS
        .iter()
        .map(|(kind, name)| {
            ToolCallRecord::new("check_component", json!({"kind": kind, "name": name}), round)
        })
        .collect();

    let timeout = Duration::from_millis(engine.config().engine.baseline_timeout_ms);
    let finished = engine
        .scheduler()
        .run_batch_with_timeout(pending, timeout)
        .await;

    // The scheduler preserves submission order, so records zip with the
    // roster.
    let health = finished
        .iter()
        .zip(BASELINE_COMPONENTS)
        .map(|(record, (kind, name))| health_of(record, kind, name))
        .collect();

    (finished, health)
}

/// Latest baseline summary text, if a snapshot exists.
pub(crate) fn baseline_summary(session: &Session) -> Option<String> {
    baseline_payload(session)?
        .get("summary")?
        .as_str()
        .map(str::to_string)
}

/// Components listed unhealthy in the latest snapshot.
pub(crate) fn unhealthy_components(session: &Session) -> Vec<String> {
    baseline_payload(session)
        .and_then(|payload| payload.get("unhealthy"))
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(|v| v.as_str().map(String::from))
                .collect()
        })
        .unwrap_or_default()
}

fn baseline_payload(session: &Session) -> Option<&Value> {
    session
        .effective_evidence()
        .into_iter()
        .find(|item| item.tag == BASELINE_TAG)
        .map(|item| &item.payload)
}

/// Judge one finished probe record.
fn health_of(record: &ToolCallRecord, kind: &str, name: &str) -> ComponentHealth {
    let component = format!("{}/{}", kind, name);
    match record.status {
        CallStatus::Succeeded => {
            let data = record.result.clone().unwrap_or(Value::Null);
            judge(kind, &data, component)
        }
        CallStatus::TimedOut => ComponentHealth {
            component,
            status: HealthStatus::TimedOut,
            detail: "health probe timed out".to_string(),
        },
        _ => {
            let message = record.error.as_deref().unwrap_or("health probe failed");
            let status = match ErrorCode::from_tool_failure(message) {
                ErrorCode::Timeout => HealthStatus::TimedOut,
                ErrorCode::PermissionDenied => HealthStatus::PermissionDenied,
                ErrorCode::ResourceNotFound => HealthStatus::Missing,
                _ => HealthStatus::Unknown,
            };
            ComponentHealth {
                component,
                status,
                detail: message.chars().take(200).collect(),
            }
        }
    }
}

/// Judge a component from its fetched manifest.
fn judge(kind: &str, data: &Value, component: String) -> ComponentHealth {
    let (status, detail) = match kind {
        "deployment" => {
            let desired = data
                .pointer("/spec/replicas")
                .and_then(Value::as_u64)
                .unwrap_or(1);
            let ready = data
                .pointer("/status/readyReplicas")
                .and_then(Value::as_u64)
                .unwrap_or(0);
            if desired == 0 {
                (HealthStatus::Unhealthy, "scaled to zero replicas".to_string())
            } else if ready >= desired {
                (HealthStatus::Healthy, format!("{}/{} replicas ready", ready, desired))
            } else {
                (HealthStatus::Unhealthy, format!("{}/{} replicas ready", ready, desired))
            }
        }
        "daemonset" => {
            let desired = data
                .pointer("/status/desiredNumberScheduled")
                .and_then(Value::as_u64)
                .unwrap_or(0);
            let ready = data
                .pointer("/status/numberReady")
                .and_then(Value::as_u64)
                .unwrap_or(0);
            if desired == 0 {
                (HealthStatus::Unhealthy, "scheduled on no nodes".to_string())
            } else if ready >= desired {
                (HealthStatus::Healthy, format!("{}/{} pods ready", ready, desired))
            } else {
                (HealthStatus::Unhealthy, format!("{}/{} pods ready", ready, desired))
            }
        }
        "endpoints" => {
            let addresses = data
                .pointer("/subsets")
                .and_then(Value::as_array)
                .map(|subsets| {
                    subsets
                        .iter()
                        .filter_map(|s| s.get("addresses").and_then(Value::as_array))
                        .map(|a| a.len())
                        .sum::<usize>()
                })
                .unwrap_or(0);
            if addresses > 0 {
                (HealthStatus::Healthy, format!("{} ready address(es)", addresses))
            } else {
                (HealthStatus::Unhealthy, "no ready addresses".to_string())
            }
        }
        _ => (HealthStatus::Unknown, format!("unrecognized kind {}", kind)),
    };
    ComponentHealth {
        component,
        status,
        detail,
    }
}

fn summarize(health: &[ComponentHealth]) -> String {
    let unhealthy: Vec<&ComponentHealth> = health
        .iter()
        .filter(|h| h.status != HealthStatus::Healthy)
        .collect();
    if unhealthy.is_empty() {
        return format!("all {} control-plane components healthy", health.len());
    }
    let parts: Vec<String> = unhealthy
        .iter()
        .map(|h| format!("{} is {} ({})", h.component, h.status, h.detail))
        .collect();
    format!(
        "{}/{} control-plane components unhealthy: {}",
        unhealthy.len(),
        health.len(),
        parts.join("; ")
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(kind: &str, name: &str) -> ToolCallRecord {
        ToolCallRecord::new("check_component", json!({"kind": kind, "name": name}), 0)
    }

    #[test]
    fn test_roster_shape() {
        assert_eq!(BASELINE_COMPONENTS.len(), 9);
        for (kind, _) in BASELINE_COMPONENTS {
            assert!(matches!(*kind, "deployment" | "daemonset" | "endpoints"));
        }
    }

    #[test]
    fn test_deployment_health() {
        let healthy = record("deployment", "kube-ovn-controller").succeeded(
            json!({"spec": {"replicas": 2}, "status": {"readyReplicas": 2}}),
            10,
        );
        let judged = health_of(&healthy, "deployment", "kube-ovn-controller");
        assert_eq!(judged.status, HealthStatus::Healthy);
        assert_eq!(judged.component, "deployment/kube-ovn-controller");

        let degraded = record("deployment", "kube-ovn-controller").succeeded(
            json!({"spec": {"replicas": 2}, "status": {"readyReplicas": 1}}),
            10,
        );
        let judged = health_of(&degraded, "deployment", "kube-ovn-controller");
        assert_eq!(judged.status, HealthStatus::Unhealthy);
        assert!(judged.detail.contains("1/2"));

        let scaled_down = record("deployment", "ovn-central")
            .succeeded(json!({"spec": {"replicas": 0}, "status": {}}), 10);
        let judged = health_of(&scaled_down, "deployment", "ovn-central");
        assert_eq!(judged.status, HealthStatus::Unhealthy);
    }

    #[test]
    fn test_daemonset_health() {
        let healthy = record("daemonset", "kube-ovn-cni").succeeded(
            json!({"status": {"desiredNumberScheduled": 3, "numberReady": 3}}),
            10,
        );
        assert_eq!(
            health_of(&healthy, "daemonset", "kube-ovn-cni").status,
            HealthStatus::Healthy
        );

        let degraded = record("daemonset", "kube-ovn-cni").succeeded(
            json!({"status": {"desiredNumberScheduled": 3, "numberReady": 2}}),
            10,
        );
        assert_eq!(
            health_of(&degraded, "daemonset", "kube-ovn-cni").status,
            HealthStatus::Unhealthy
        );

        let unscheduled =
            record("daemonset", "ovs-ovn").succeeded(json!({"status": {}}), 10);
        let judged = health_of(&unscheduled, "daemonset", "ovs-ovn");
        assert_eq!(judged.status, HealthStatus::Unhealthy);
        assert!(judged.detail.contains("no nodes"));
    }

    #[test]
    fn test_endpoints_health() {
        let healthy = record("endpoints", "ovn-nb").succeeded(
            json!({"subsets": [{"addresses": [{"ip": "10.0.0.1"}, {"ip": "10.0.0.2"}]}]}),
            10,
        );
        let judged = health_of(&healthy, "endpoints", "ovn-nb");
        assert_eq!(judged.status, HealthStatus::Healthy);
        assert!(judged.detail.contains("2 ready"));

        let empty = record("endpoints", "ovn-sb").succeeded(json!({"subsets": []}), 10);
        assert_eq!(
            health_of(&empty, "endpoints", "ovn-sb").status,
            HealthStatus::Unhealthy
        );

        let null_subsets = record("endpoints", "ovn-northd").succeeded(json!({}), 10);
        assert_eq!(
            health_of(&null_subsets, "endpoints", "ovn-northd").status,
            HealthStatus::Unhealthy
        );
    }

    #[test]
    fn test_failed_probe_mapping() {
        let missing = record("deployment", "kube-ovn-monitor")
            .failed("Error from server (NotFound): deployments.apps \"kube-ovn-monitor\" not found", 5);
        assert_eq!(
            health_of(&missing, "deployment", "kube-ovn-monitor").status,
            HealthStatus::Missing
        );

        let forbidden = record("daemonset", "kube-ovn-cni")
            .failed("Error from server (Forbidden): daemonsets.apps is forbidden", 5);
        assert_eq!(
            health_of(&forbidden, "daemonset", "kube-ovn-cni").status,
            HealthStatus::PermissionDenied
        );

        let late = record("endpoints", "ovn-nb").timed_out(10000);
        assert_eq!(
            health_of(&late, "endpoints", "ovn-nb").status,
            HealthStatus::TimedOut
        );

        let opaque = record("deployment", "ovn-central").failed("exited with status 1", 5);
        assert_eq!(
            health_of(&opaque, "deployment", "ovn-central").status,
            HealthStatus::Unknown
        );
    }

    #[test]
    fn test_summarize() {
        let all_green = vec![
            ComponentHealth {
                component: "deployment/kube-ovn-controller".to_string(),
                status: HealthStatus::Healthy,
                detail: "1/1 replicas ready".to_string(),
            },
            ComponentHealth {
                component: "daemonset/kube-ovn-cni".to_string(),
                status: HealthStatus::Healthy,
                detail: "3/3 pods ready".to_string(),
            },
        ];
        assert_eq!(summarize(&all_green), "all 2 control-plane components healthy");

        let mixed = vec![
            ComponentHealth {
                component: "deployment/kube-ovn-controller".to_string(),
                status: HealthStatus::Healthy,
                detail: "1/1 replicas ready".to_string(),
            },
            ComponentHealth {
                component: "daemonset/ovs-ovn".to_string(),
                status: HealthStatus::Unhealthy,
                detail: "2/3 pods ready".to_string(),
            },
        ];
        let summary = summarize(&mixed);
        assert!(summary.contains("1/2"));
        assert!(summary.contains("daemonset/ovs-ovn"));
        assert!(summary.contains("2/3 pods ready"));
    }

    #[test]
    fn test_snapshot_readers() {
        let mut session = Session::new("t", "s");
        assert!(baseline_summary(&session).is_none());
        assert!(unhealthy_components(&session).is_empty());

        session.record_evidence(EvidenceItem::new(
            BASELINE_TAG,
            "baseline",
            json!({
                "components": [],
                "unhealthy": ["daemonset/ovs-ovn"],
                "summary": "1/9 control-plane components unhealthy",
            }),
        ));
        assert_eq!(
            baseline_summary(&session).as_deref(),
            Some("1/9 control-plane components unhealthy")
        );
        assert_eq!(unhealthy_components(&session), vec!["daemonset/ovs-ovn"]);

        // A fresh snapshot supersedes the first.
        session.record_evidence(EvidenceItem::new(
            BASELINE_TAG,
            "baseline",
            json!({"components": [], "unhealthy": [], "summary": "all healthy"}),
        ));
        assert_eq!(baseline_summary(&session).as_deref(), Some("all healthy"));
        assert!(unhealthy_components(&session).is_empty());
    }
}

//! Built-in analyzers, one per diagnostic category plus a general fallback.
//!
//! These scan the text of collected evidence for the OVN pipeline markers
//! that distinguish one fault from another: which logical-switch stage
//! dropped a simulated packet, whether the Geneve tunnel interface exists,
//! whether a service has live backends. Verdicts carry a confidence that
//! reflects how specific the matched marker is.

use std::collections::BTreeSet;
use std::sync::Arc;

use serde_json::Value;

use crate::analyzers::{Analyzer, AnalyzerMetadata, AnalyzerRegistry};
use crate::error::AnalyzerResult;
use crate::session::{Category, RootCauseResult, Session};

/// Name of the always-applicable fallback analyzer.
pub const GENERAL_ANALYZER: &str = "general_health";

/// Build the builtin analyzer set.
pub fn builtin_analyzers() -> Vec<Arc<dyn Analyzer>> {
    vec![
        Arc::new(GeneralHealthAnalyzer::new()),
        Arc::new(PodToPodTraceAnalyzer::new()),
        Arc::new(CrossNodeTunnelAnalyzer::new()),
        Arc::new(ServiceBackendAnalyzer::new()),
        Arc::new(ExternalEgressAnalyzer::new()),
    ]
}

/// Register every builtin analyzer into the registry.
pub fn register_builtin_analyzers(registry: &mut AnalyzerRegistry) -> AnalyzerResult<()> {
    for analyzer in builtin_analyzers() {
        registry.register(analyzer)?;
    }
    Ok(())
}

// === Evidence helpers ===

/// Latest payload for a tag, flattened to searchable text.
fn evidence_text(session: &Session, tag: &str) -> Option<String> {
    session
        .effective_evidence()
        .into_iter()
        .find(|e| e.tag == tag)
        .map(|e| payload_text(&e.payload))
}

fn payload_text(payload: &Value) -> String {
    match payload {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// OVN pipeline stages worth naming when the simulated packet drops there.
const TRACE_DROP_STAGES: &[(&str, &str)] = &[
    ("ls_in_acl", "an ingress ACL (network policy) drops the traffic"),
    ("ls_out_acl", "an egress ACL (network policy) drops the traffic"),
    (
        "ls_in_port_sec_l2",
        "port security rejects the source MAC on the logical port",
    ),
    (
        "ls_in_port_sec_ip",
        "port security rejects the source IP on the logical port",
    ),
];

/// Identify the drop stage in an ovn-trace transcript, if any.
fn trace_drop(trace: &str) -> Option<(&'static str, &'static str)> {
    let lower = trace.to_lowercase();
    if !lower.contains("drop") {
        return None;
    }
    TRACE_DROP_STAGES
        .iter()
        .find(|(stage, _)| lower.contains(stage))
        .copied()
}

fn contains_any(text: &str, needles: &[&str]) -> bool {
    let lower = text.to_lowercase();
    needles.iter().any(|n| lower.contains(n))
}

fn bonus_for(tags: &BTreeSet<String>, helpful: &[&str]) -> u32 {
    helpful.iter().filter(|t| tags.contains(**t)).count() as u32
}

// === General fallback ===

/// Fallback analyzer: reads the baseline snapshot and component logs.
///
/// Also serves as the deterministic low-confidence verdict when the
/// reasoning loop exhausts its round budget without concluding.
pub struct GeneralHealthAnalyzer {
    meta: AnalyzerMetadata,
}

impl GeneralHealthAnalyzer {
    /// Create the analyzer.
    pub fn new() -> Self {
        Self {
            meta: AnalyzerMetadata::new(
                GENERAL_ANALYZER,
                Category::General,
                &[],
                1,
                "Control-plane health review over baseline and component logs",
            ),
        }
    }
}

impl Default for GeneralHealthAnalyzer {
    fn default() -> Self {
        Self::new()
    }
}

impl Analyzer for GeneralHealthAnalyzer {
    fn metadata(&self) -> &AnalyzerMetadata {
        &self.meta
    }

    fn analyze(&self, session: &Session) -> RootCauseResult {
        if let Some(baseline) = session
            .effective_evidence()
            .into_iter()
            .find(|e| e.tag == "baseline")
        {
            let unhealthy: Vec<String> = baseline.payload["unhealthy"]
                .as_array()
                .map(|items| {
                    items
                        .iter()
                        .filter_map(Value::as_str)
                        .map(str::to_string)
                        .collect()
                })
                .unwrap_or_default();
            if !unhealthy.is_empty() {
                return RootCauseResult::new(
                    format!(
                        "Kube-OVN control-plane components unhealthy: {}",
                        unhealthy.join(", ")
                    ),
                    0.8,
                    GENERAL_ANALYZER,
                )
                .with_evidence(vec!["baseline".to_string()]);
            }
        }

        if let Some(pinger) = evidence_text(session, "pinger_logs") {
            if contains_any(&pinger, &["ping failed", "packet loss", "lost packet"]) {
                return RootCauseResult::new(
                    "kube-ovn-pinger reports connectivity probe failures between nodes",
                    0.6,
                    GENERAL_ANALYZER,
                )
                .with_evidence(vec!["pinger_logs".to_string()]);
            }
        }

        if let Some(controller) = evidence_text(session, "controller_logs") {
            if contains_any(&controller, &["error", "failed"]) {
                return RootCauseResult::new(
                    "kube-ovn-controller logs contain errors; control-plane reconciliation \
                     may be failing",
                    0.4,
                    GENERAL_ANALYZER,
                )
                .with_evidence(vec!["controller_logs".to_string()]);
            }
        }

        let tags: Vec<String> = session.evidence_tags().into_iter().collect();
        RootCauseResult::new(
            "no definitive fault isolated from the available evidence",
            0.1,
            GENERAL_ANALYZER,
        )
        .with_evidence(tags)
    }
}

// === Pod-to-pod, same node ===

/// Interprets an ovn-trace transcript for same-node pod-to-pod traffic.
pub struct PodToPodTraceAnalyzer {
    meta: AnalyzerMetadata,
}

impl PodToPodTraceAnalyzer {
    /// Create the analyzer.
    pub fn new() -> Self {
        Self {
            meta: AnalyzerMetadata::new(
                "pod_to_pod_trace",
                Category::PodToPod,
                &["ovn_trace"],
                10,
                "Pipeline-drop interpretation for pod-to-pod traffic",
            ),
        }
    }
}

impl Default for PodToPodTraceAnalyzer {
    fn default() -> Self {
        Self::new()
    }
}

impl Analyzer for PodToPodTraceAnalyzer {
    fn metadata(&self) -> &AnalyzerMetadata {
        &self.meta
    }

    fn applicability(&self, tags: &BTreeSet<String>) -> u32 {
        self.meta.base_score + bonus_for(tags, &["pod_describe", "pod_events", "pod_ip"])
    }

    fn analyze(&self, session: &Session) -> RootCauseResult {
        let name = &self.meta.name;

        if let Some(trace) = evidence_text(session, "ovn_trace") {
            if let Some((stage, verdict)) = trace_drop(&trace) {
                return RootCauseResult::new(
                    format!("{} ({} stage)", verdict, stage),
                    0.85,
                    name,
                )
                .with_evidence(vec!["ovn_trace".to_string()]);
            }
            if trace.to_lowercase().contains("ls_in_l2_lkup")
                && contains_any(&trace, &["no match", "unknown"])
            {
                return RootCauseResult::new(
                    "destination MAC is unknown in the logical switch; the target port \
                     binding is stale or missing",
                    0.7,
                    name,
                )
                .with_evidence(vec!["ovn_trace".to_string()]);
            }
        }

        if let Some(events) = evidence_text(session, "pod_events") {
            if contains_any(&events, &["failedcreatepodsandbox", "networkplugin"]) {
                return RootCauseResult::new(
                    "CNI failed to set up the pod network sandbox",
                    0.8,
                    name,
                )
                .with_evidence(vec!["pod_events".to_string()]);
            }
        }

        if let Some(describe) = evidence_text(session, "pod_describe") {
            if contains_any(&describe, &["crashloopbackoff", "containercreating", "pending"]) {
                return RootCauseResult::new(
                    "a pod in the path is not running; the network path cannot be \
                     established",
                    0.65,
                    name,
                )
                .with_evidence(vec!["pod_describe".to_string()]);
            }
        }

        RootCauseResult::new(
            "the datapath simulation completes without a drop; the fault is likely \
             outside the OVN pipeline (pod readiness or application level)",
            0.3,
            name,
        )
        .with_evidence(vec!["ovn_trace".to_string()])
    }
}

// === Pod-to-pod, cross node ===

/// Checks tunnel and underlay health for traffic between nodes.
pub struct CrossNodeTunnelAnalyzer {
    meta: AnalyzerMetadata,
}

impl CrossNodeTunnelAnalyzer {
    /// Create the analyzer.
    pub fn new() -> Self {
        Self {
            meta: AnalyzerMetadata::new(
                "cross_node_tunnel",
                Category::PodToPodCrossNode,
                &["ovs_config"],
                10,
                "Geneve tunnel and underlay health for cross-node traffic",
            ),
        }
    }
}

impl Default for CrossNodeTunnelAnalyzer {
    fn default() -> Self {
        Self::new()
    }
}

impl Analyzer for CrossNodeTunnelAnalyzer {
    fn metadata(&self) -> &AnalyzerMetadata {
        &self.meta
    }

    fn applicability(&self, tags: &BTreeSet<String>) -> u32 {
        self.meta.base_score + bonus_for(tags, &["ovn_trace", "node_info", "pinger_logs"])
    }

    fn analyze(&self, session: &Session) -> RootCauseResult {
        let name = &self.meta.name;

        if let Some(ovs) = evidence_text(session, "ovs_config") {
            let lower = ovs.to_lowercase();
            if !lower.contains("genev_sys_6081") && !lower.contains("geneve") {
                return RootCauseResult::new(
                    "the Geneve tunnel interface (genev_sys_6081) is missing on the node; \
                     cross-node encapsulation is not established",
                    0.85,
                    name,
                )
                .with_evidence(vec!["ovs_config".to_string()]);
            }
            if lower.contains("error") {
                return RootCauseResult::new(
                    "the OVS bridge configuration reports errors on the node",
                    0.7,
                    name,
                )
                .with_evidence(vec!["ovs_config".to_string()]);
            }
        }

        if let Some(nodes) = evidence_text(session, "node_info") {
            if nodes.contains("NotReady") {
                return RootCauseResult::new(
                    "a node on the path is NotReady; its datapath cannot forward traffic",
                    0.75,
                    name,
                )
                .with_evidence(vec!["node_info".to_string()]);
            }
        }

        if let Some(pinger) = evidence_text(session, "pinger_logs") {
            if contains_any(&pinger, &["ping failed", "packet loss", "lost packet"]) {
                return RootCauseResult::new(
                    "inter-node probes fail; the underlay network is likely blocking \
                     Geneve traffic (UDP 6081) between nodes",
                    0.7,
                    name,
                )
                .with_evidence(vec!["pinger_logs".to_string()]);
            }
        }

        if let Some(trace) = evidence_text(session, "ovn_trace") {
            if let Some((stage, verdict)) = trace_drop(&trace) {
                return RootCauseResult::new(
                    format!("{} ({} stage)", verdict, stage),
                    0.8,
                    name,
                )
                .with_evidence(vec!["ovn_trace".to_string()]);
            }
        }

        RootCauseResult::new(
            "tunnel configuration looks intact; no cross-node fault isolated",
            0.2,
            name,
        )
        .with_evidence(vec!["ovs_config".to_string()])
    }
}

// === Pod-to-service ===

/// Checks service endpoints and OVN load-balancer sync.
pub struct ServiceBackendAnalyzer {
    meta: AnalyzerMetadata,
}

impl ServiceBackendAnalyzer {
    /// Create the analyzer.
    pub fn new() -> Self {
        Self {
            meta: AnalyzerMetadata::new(
                "service_backend",
                Category::PodToService,
                &["service_endpoints"],
                10,
                "Endpoint and load-balancer review for service traffic",
            ),
        }
    }
}

impl Default for ServiceBackendAnalyzer {
    fn default() -> Self {
        Self::new()
    }
}

impl Analyzer for ServiceBackendAnalyzer {
    fn metadata(&self) -> &AnalyzerMetadata {
        &self.meta
    }

    fn applicability(&self, tags: &BTreeSet<String>) -> u32 {
        self.meta.base_score
            + bonus_for(
                tags,
                &["lb_list", "ovn_trace", "service_describe", "controller_logs"],
            )
    }

    fn analyze(&self, session: &Session) -> RootCauseResult {
        let name = &self.meta.name;

        if let Some(endpoints) = evidence_text(session, "service_endpoints") {
            if endpoints.contains("<none>") {
                return RootCauseResult::new(
                    "the service has no ready endpoints; its selector matches no ready pods",
                    0.9,
                    name,
                )
                .with_evidence(vec!["service_endpoints".to_string()]);
            }
        }

        if let Some(controller) = evidence_text(session, "controller_logs") {
            let lower = controller.to_lowercase();
            if (lower.contains("error") || lower.contains("failed"))
                && contains_any(&controller, &["endpoint", "load balancer", "lb", "vip"])
            {
                return RootCauseResult::new(
                    "kube-ovn-controller is failing to sync service endpoints into OVN \
                     load balancers",
                    0.7,
                    name,
                )
                .with_evidence(vec!["controller_logs".to_string()]);
            }
        }

        if let Some(trace) = evidence_text(session, "ovn_trace") {
            if let Some((stage, verdict)) = trace_drop(&trace) {
                return RootCauseResult::new(
                    format!(
                        "traffic drops before reaching the service backends: {} ({} stage)",
                        verdict, stage
                    ),
                    0.75,
                    name,
                )
                .with_evidence(vec!["ovn_trace".to_string()]);
            }
        }

        RootCauseResult::new(
            "service endpoints exist and no pipeline drop was observed; the fault may \
             be in the backend application or kube-proxy bypass path",
            0.2,
            name,
        )
        .with_evidence(vec!["service_endpoints".to_string()])
    }
}

// === Pod-to-external ===

/// Checks SNAT configuration and default routing for egress traffic.
pub struct ExternalEgressAnalyzer {
    meta: AnalyzerMetadata,
}

impl ExternalEgressAnalyzer {
    /// Create the analyzer.
    ///
    /// Requires no tags: a capture alone can place the fault beyond the
    /// cluster.
    pub fn new() -> Self {
        Self {
            meta: AnalyzerMetadata::new(
                "external_egress",
                Category::PodToExternal,
                &[],
                10,
                "SNAT and default-route review for external egress",
            ),
        }
    }
}

impl Default for ExternalEgressAnalyzer {
    fn default() -> Self {
        Self::new()
    }
}

impl Analyzer for ExternalEgressAnalyzer {
    fn metadata(&self) -> &AnalyzerMetadata {
        &self.meta
    }

    fn applicability(&self, tags: &BTreeSet<String>) -> u32 {
        self.meta.base_score
            + bonus_for(
                tags,
                &[
                    "ovn_trace",
                    "subnet_status",
                    "router_routes",
                    "pinger_logs",
                    "packet_capture",
                ],
            )
    }

    fn analyze(&self, session: &Session) -> RootCauseResult {
        let name = &self.meta.name;

        if let Some(subnet) = evidence_text(session, "subnet_status") {
            let lower = subnet.to_lowercase();
            if lower.contains("natoutgoing") && lower.contains("false") {
                return RootCauseResult::new(
                    "the pod's subnet has natOutgoing disabled; egress traffic leaves \
                     without SNAT and replies cannot return",
                    0.8,
                    name,
                )
                .with_evidence(vec!["subnet_status".to_string()]);
            }
        }

        if let Some(routes) = evidence_text(session, "router_routes") {
            if !routes.contains("0.0.0.0/0") && !routes.contains("::/0") {
                return RootCauseResult::new(
                    "the cluster logical router has no default route; external \
                     destinations are unreachable from pods",
                    0.75,
                    name,
                )
                .with_evidence(vec!["router_routes".to_string()]);
            }
        }

        if let Some(pinger) = evidence_text(session, "pinger_logs") {
            if contains_any(&pinger, &["nslookup failed", "resolve", "dns error"]) {
                return RootCauseResult::new(
                    "DNS resolution is failing from the nodes; external names cannot \
                     be resolved even though routing may be intact",
                    0.7,
                    name,
                )
                .with_evidence(vec!["pinger_logs".to_string()]);
            }
            if contains_any(&pinger, &["ping external address failed", "external ping failed"]) {
                return RootCauseResult::new(
                    "nodes themselves cannot reach external addresses; the fault is in \
                     node egress, not the overlay",
                    0.7,
                    name,
                )
                .with_evidence(vec!["pinger_logs".to_string()]);
            }
        }

        if let Some(trace) = evidence_text(session, "ovn_trace") {
            if let Some((stage, verdict)) = trace_drop(&trace) {
                return RootCauseResult::new(
                    format!("{} ({} stage)", verdict, stage),
                    0.8,
                    name,
                )
                .with_evidence(vec!["ovn_trace".to_string()]);
            }
            let lower = trace.to_lowercase();
            if !lower.contains("ct_snat") && lower.contains("lr_in") {
                return RootCauseResult::new(
                    "the router pipeline forwards the packet without applying SNAT; \
                     check the subnet's natOutgoing setting",
                    0.6,
                    name,
                )
                .with_evidence(vec!["ovn_trace".to_string()]);
            }
        }

        // Checked after the config rules; an in-cluster fault explains
        // missing replies too.
        if let Some(capture) = evidence_text(session, "packet_capture") {
            let request_seen =
                contains_any(&capture, &["echo request", "request seen", "request sent"]);
            let reply_missing = contains_any(
                &capture,
                &["no reply", "no response", "0 received", "reply not seen"],
            );
            if request_seen && reply_missing {
                return RootCauseResult::new(
                    "egress requests leave the cluster but no replies return; the \
                     fault is in the external network or upstream path, not the \
                     overlay",
                    0.75,
                    name,
                )
                .with_evidence(vec!["packet_capture".to_string()]);
            }
        }

        let tags: Vec<String> = session.evidence_tags().into_iter().collect();
        RootCauseResult::new(
            "egress configuration looks intact; no external-path fault isolated",
            0.2,
            name,
        )
        .with_evidence(tags)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::{Classification, EvidenceItem};
    use serde_json::json;

    fn session_with(category: Category, evidence: &[(&str, Value)]) -> Session {
        let mut session = Session::new("sess-analyze", "connectivity problem");
        session.classification = Some(Classification::new(category, 0.9, "test"));
        for (tag, payload) in evidence {
            session.record_evidence(EvidenceItem::new(*tag, "test_tool", payload.clone()));
        }
        session
    }

    #[test]
    fn test_builtins_register_cleanly() {
        let mut registry = AnalyzerRegistry::new();
        register_builtin_analyzers(&mut registry).unwrap();
        assert_eq!(registry.len(), 5);
        assert!(registry.get(GENERAL_ANALYZER).is_some());
    }

    #[test]
    fn test_general_reports_unhealthy_baseline() {
        let session = session_with(
            Category::General,
            &[(
                "baseline",
                json!({"unhealthy": ["deployment/kube-ovn-controller"]}),
            )],
        );
        let result = GeneralHealthAnalyzer::new().analyze(&session);
        assert!(result.cause.contains("kube-ovn-controller"));
        assert!(result.confidence >= 0.7);
    }

    #[test]
    fn test_general_inconclusive_is_low_confidence() {
        let session = session_with(Category::General, &[]);
        let result = GeneralHealthAnalyzer::new().analyze(&session);
        assert!(result.confidence <= 0.2);
        assert!(result.cause.contains("no definitive fault"));
    }

    #[test]
    fn test_pod_to_pod_detects_acl_drop() {
        let trace = "ingress(dp=\"ovn-default\")\n  3. ls_in_acl (northd.c:6021): \
                     reg0[7] == 1, priority 2001, uuid 4df2\n    /* drop; */";
        let session = session_with(Category::PodToPod, &[("ovn_trace", json!(trace))]);
        let result = PodToPodTraceAnalyzer::new().analyze(&session);
        assert!(result.cause.contains("network policy"));
        assert!(result.confidence > 0.8);
        assert_eq!(result.supporting_evidence, vec!["ovn_trace"]);
    }

    #[test]
    fn test_pod_to_pod_detects_port_security_drop() {
        let trace = "ingress\n 1. ls_in_port_sec_ip: priority 90, drop";
        let session = session_with(Category::PodToPod, &[("ovn_trace", json!(trace))]);
        let result = PodToPodTraceAnalyzer::new().analyze(&session);
        assert!(result.cause.contains("port security"));
    }

    #[test]
    fn test_pod_to_pod_detects_unknown_mac() {
        let trace = "22. ls_in_l2_lkup: no match (implicit drop)";
        let session = session_with(Category::PodToPod, &[("ovn_trace", json!(trace))]);
        let result = PodToPodTraceAnalyzer::new().analyze(&session);
        assert!(result.cause.contains("destination MAC"));
    }

    #[test]
    fn test_pod_to_pod_clean_trace_is_inconclusive() {
        let trace = "ingress\n  22. ls_in_l2_lkup: matched\noutput to \"web-2.demo\"";
        let session = session_with(Category::PodToPod, &[("ovn_trace", json!(trace))]);
        let result = PodToPodTraceAnalyzer::new().analyze(&session);
        assert!(result.confidence <= 0.3);
    }

    #[test]
    fn test_pod_to_pod_sandbox_event() {
        let session = session_with(
            Category::PodToPod,
            &[
                ("ovn_trace", json!("output to port")),
                (
                    "pod_events",
                    json!("Warning FailedCreatePodSandBox: rpc error"),
                ),
            ],
        );
        let result = PodToPodTraceAnalyzer::new().analyze(&session);
        assert!(result.cause.contains("CNI"));
    }

    #[test]
    fn test_cross_node_detects_missing_tunnel() {
        let ovs = "Bridge br-int\n  Port br-int\n  Port \"web-1.demo\"";
        let session = session_with(Category::PodToPodCrossNode, &[("ovs_config", json!(ovs))]);
        let result = CrossNodeTunnelAnalyzer::new().analyze(&session);
        assert!(result.cause.contains("genev_sys_6081"));
        assert!(result.confidence > 0.8);
    }

    #[test]
    fn test_cross_node_tunnel_present_checks_pinger() {
        let ovs = "Bridge br-int\n  Port ovn0\n  Interface genev_sys_6081 type geneve";
        let pinger = "ping failed from node-1 to node-2: 100% packet loss";
        let session = session_with(
            Category::PodToPodCrossNode,
            &[("ovs_config", json!(ovs)), ("pinger_logs", json!(pinger))],
        );
        let result = CrossNodeTunnelAnalyzer::new().analyze(&session);
        assert!(result.cause.contains("UDP 6081"));
    }

    #[test]
    fn test_service_detects_empty_endpoints() {
        let endpoints = "NAME    ENDPOINTS   AGE\nweb     <none>      4d";
        let session = session_with(
            Category::PodToService,
            &[("service_endpoints", json!(endpoints))],
        );
        let result = ServiceBackendAnalyzer::new().analyze(&session);
        assert!(result.cause.contains("no ready endpoints"));
        assert!(result.confidence >= 0.9);
    }

    #[test]
    fn test_service_detects_lb_sync_errors() {
        let endpoints = "NAME  ENDPOINTS\nweb   10.16.0.5:80,10.16.0.6:80";
        let controller = "E0822 10:00:01 error syncing load balancer for endpoint web";
        let session = session_with(
            Category::PodToService,
            &[
                ("service_endpoints", json!(endpoints)),
                ("controller_logs", json!(controller)),
            ],
        );
        let result = ServiceBackendAnalyzer::new().analyze(&session);
        assert!(result.cause.contains("load balancers"));
    }

    #[test]
    fn test_external_detects_nat_disabled() {
        let subnet = "NAME         PROVIDER  CIDR         NATOUTGOING\novn-default  ovn       10.16.0.0/16 false";
        let session = session_with(
            Category::PodToExternal,
            &[
                ("ovn_trace", json!("output to router")),
                ("subnet_status", json!(subnet)),
            ],
        );
        let result = ExternalEgressAnalyzer::new().analyze(&session);
        assert!(result.cause.contains("natOutgoing"));
    }

    #[test]
    fn test_external_detects_missing_default_route() {
        let routes = "IPv4 Routes\n10.16.0.0/16 100.64.0.1 dst-ip";
        let session = session_with(
            Category::PodToExternal,
            &[
                ("ovn_trace", json!("output to router")),
                ("router_routes", json!(routes)),
            ],
        );
        let result = ExternalEgressAnalyzer::new().analyze(&session);
        assert!(result.cause.contains("default route"));
    }

    #[test]
    fn test_external_unanswered_capture_names_external_network() {
        let capture = "ICMP echo request seen leaving eth0 toward 8.8.8.8; \
                       no reply within 5s";
        let session = session_with(
            Category::PodToExternal,
            &[("packet_capture", json!(capture))],
        );
        let result = ExternalEgressAnalyzer::new().analyze(&session);
        assert!(result.cause.contains("external network"));
        assert!(result.confidence >= 0.7);
        assert_eq!(result.supporting_evidence, vec!["packet_capture"]);
    }

    #[test]
    fn test_external_answered_capture_is_inconclusive() {
        let capture = "ICMP echo request toward 8.8.8.8, echo reply received, 0% loss";
        let session = session_with(
            Category::PodToExternal,
            &[("packet_capture", json!(capture))],
        );
        let result = ExternalEgressAnalyzer::new().analyze(&session);
        assert!(result.confidence <= 0.2);
        assert_eq!(result.supporting_evidence, vec!["packet_capture"]);
    }

    #[test]
    fn test_external_nat_disabled_outranks_capture() {
        let subnet = "NAME         NATOUTGOING\novn-default  false";
        let session = session_with(
            Category::PodToExternal,
            &[
                ("subnet_status", json!(subnet)),
                ("packet_capture", json!("echo request seen, no reply")),
            ],
        );
        let result = ExternalEgressAnalyzer::new().analyze(&session);
        assert!(result.cause.contains("natOutgoing"));
    }

    #[test]
    fn test_external_selected_on_capture_only_evidence() {
        let mut registry = AnalyzerRegistry::new();
        register_builtin_analyzers(&mut registry).unwrap();
        let session = session_with(
            Category::PodToExternal,
            &[("packet_capture", json!("echo request seen, no reply"))],
        );
        let selection = registry.select(&session);
        assert_eq!(
            selection.analyzer.unwrap().metadata().name,
            "external_egress"
        );
    }

    #[test]
    fn test_applicability_grows_with_optional_evidence() {
        let analyzer = PodToPodTraceAnalyzer::new();
        let bare: BTreeSet<String> = ["ovn_trace".to_string()].into_iter().collect();
        let rich: BTreeSet<String> = [
            "ovn_trace".to_string(),
            "pod_describe".to_string(),
            "pod_events".to_string(),
        ]
        .into_iter()
        .collect();
        assert!(analyzer.applicability(&rich) > analyzer.applicability(&bare));
    }

    #[test]
    fn test_analysis_is_deterministic() {
        let trace = "3. ls_in_acl: priority 2001 drop";
        let session = session_with(Category::PodToPod, &[("ovn_trace", json!(trace))]);
        let analyzer = PodToPodTraceAnalyzer::new();
        let first = analyzer.analyze(&session);
        for _ in 0..3 {
            assert_eq!(analyzer.analyze(&session), first);
        }
    }
}

//! Remediation derivation from a root-cause verdict.
//!
//! Suggestions are rule-derived from the cause text, not oracle-generated,
//! so the same diagnosis always proposes the same steps. Mutating steps are
//! restricted to workload rollout restarts; anything riskier (policy edits,
//! subnet changes, database surgery) is proposed as a manual step for the
//! reviewer.

use tracing::debug;

use super::baseline::BASELINE_COMPONENTS;
use crate::config::KubeConfig;
use crate::session::{FixSuggestion, Session};

/// FIX_SUGGEST: derive remediation steps for the session's root cause.
///
/// Always returns at least one suggestion; an inconclusive diagnosis gets
/// triage steps instead of silence.
pub(crate) fn derive_fixes(session: &Session, kube: &KubeConfig) -> Vec<FixSuggestion> {
    let cause = session
        .root_cause
        .as_ref()
        .map(|r| r.cause.clone())
        .unwrap_or_default();
    let lower = cause.to_lowercase();
    let ns = kube.namespace.as_str();

    let fixes = if lower.contains("control-plane components unhealthy") {
        control_plane_fixes(&cause, ns)
    } else if lower.contains("acl") || lower.contains("network policy") {
        vec![
            FixSuggestion::check(
                "List NetworkPolicies that could match the affected traffic",
                kubectl(&["get", "networkpolicy", "--all-namespaces"]),
            ),
            FixSuggestion::manual(
                "Review the matching NetworkPolicy and relax or delete it if the drop \
                 is unintended; the ovn-trace output names the ACL priority and uuid",
            ),
        ]
    } else if lower.contains("port security") {
        vec![
            FixSuggestion::check(
                "List logical switch ports with their registered addresses",
                kubectl(&["ko", "nbctl", "list", "logical_switch_port"]),
            ),
            FixSuggestion::manual(
                "Compare the pod's actual MAC/IP with its logical port addresses; \
                 recreate the pod to resync the port if they differ",
            ),
        ]
    } else if lower.contains("destination mac") || lower.contains("port binding") {
        vec![
            FixSuggestion::check(
                "Show the logical switch topology and port bindings",
                kubectl(&["ko", "nbctl", "show"]),
            ),
            FixSuggestion::action(
                "Restart kube-ovn-controller to resync stale port bindings",
                restart("deployment", "kube-ovn-controller", ns),
            ),
        ]
    } else if lower.contains("sandbox") {
        vec![
            FixSuggestion::check(
                "Inspect recent CNI daemon logs on the affected node",
                kubectl(&["logs", "-n", ns, "daemonset/kube-ovn-cni", "--tail=100"]),
            ),
            FixSuggestion::action(
                "Restart the kube-ovn-cni daemonset to recover the CNI server",
                restart("daemonset", "kube-ovn-cni", ns),
            ),
            FixSuggestion::manual(
                "Delete the affected pod afterwards so the CNI rebuilds its sandbox",
            ),
        ]
    } else if lower.contains("not running") {
        vec![FixSuggestion::manual(
            "A pod in the path is not running; resolve its scheduling, image, or \
             crash problem first, the network cannot attach until the sandbox exists",
        )]
    } else if lower.contains("genev_sys_6081") {
        vec![
            FixSuggestion::manual(
                "Confirm UDP 6081 is permitted between the node addresses on the \
                 underlay network and in any security groups",
            ),
            FixSuggestion::action(
                "Restart the ovs-ovn daemonset to re-create the tunnel interfaces",
                restart("daemonset", "ovs-ovn", ns),
            ),
        ]
    } else if lower.contains("ovs bridge") {
        vec![
            FixSuggestion::check(
                "Check ovs-ovn pod health across nodes",
                kubectl(&["get", "pods", "-n", ns, "-l", "app=ovs", "-o", "wide"]),
            ),
            FixSuggestion::action(
                "Restart the ovs-ovn daemonset on the affected node",
                restart("daemonset", "ovs-ovn", ns),
            ),
        ]
    } else if lower.contains("notready") {
        vec![
            FixSuggestion::check(
                "List node conditions",
                kubectl(&["get", "node", "-o", "wide"]),
            ),
            FixSuggestion::manual(
                "Recover the NotReady node (kubelet, runtime, disk); its overlay \
                 interfaces rejoin automatically once the node is back",
            ),
        ]
    } else if lower.contains("underlay") || lower.contains("udp 6081") {
        vec![FixSuggestion::manual(
            "Verify the underlay path between the nodes: MTU, firewall rules, and \
             UDP 6081 reachability; the overlay is only as healthy as node-to-node \
             traffic",
        )]
    } else if lower.contains("no ready endpoints") {
        vec![
            FixSuggestion::check(
                "List endpoints to confirm which services have no backends",
                kubectl(&["get", "endpoints", "--all-namespaces"]),
            ),
            FixSuggestion::manual(
                "Compare the Service selector with the labels of its intended backend \
                 pods; fix the label mismatch or the failing readiness probes",
            ),
        ]
    } else if lower.contains("load balancer") && lower.contains("sync") {
        vec![
            FixSuggestion::check(
                "List OVN load balancers to confirm the missing VIP",
                kubectl(&["ko", "nbctl", "lb-list"]),
            ),
            FixSuggestion::action(
                "Restart kube-ovn-controller to resync services into OVN load balancers",
                restart("deployment", "kube-ovn-controller", ns),
            ),
        ]
    } else if lower.contains("natoutgoing") || lower.contains("snat") {
        vec![
            FixSuggestion::check(
                "Show subnet NAT configuration",
                kubectl(&["get", "subnet", "-o", "wide"]),
            ),
            FixSuggestion::manual(
                "Enable natOutgoing on the pod's subnet if SNAT egress is intended: \
                 kubectl patch subnet <name> --type merge -p \
                 '{\"spec\":{\"natOutgoing\":true}}'",
            ),
        ]
    } else if lower.contains("default route") {
        vec![
            FixSuggestion::check(
                "List the cluster router's static routes",
                kubectl(&["ko", "nbctl", "lr-route-list", "ovn-cluster"]),
            ),
            FixSuggestion::action(
                "Restart kube-ovn-controller to resync router static routes",
                restart("deployment", "kube-ovn-controller", ns),
            ),
        ]
    } else if lower.contains("dns") {
        vec![
            FixSuggestion::check(
                "Check CoreDNS pod health",
                kubectl(&[
                    "get", "pods", "-n", "kube-system", "-l", "k8s-app=kube-dns", "-o", "wide",
                ]),
            ),
            FixSuggestion::manual(
                "Check CoreDNS logs and its upstream resolvers; this is name \
                 resolution, not the overlay datapath",
            ),
        ]
    } else if lower.contains("external network") || lower.contains("upstream path") {
        vec![
            FixSuggestion::check(
                "Review pinger external probe results across nodes",
                kubectl(&["logs", "-n", ns, "daemonset/kube-ovn-pinger", "--tail=100"]),
            ),
            FixSuggestion::manual(
                "Requests leave the cluster but replies never return; work outward \
                 from the node default gateway to the upstream firewall and the \
                 provider network",
            ),
        ]
    } else if lower.contains("node egress") {
        vec![FixSuggestion::manual(
            "Check each node's own default route and upstream firewall; pods share \
             their node's egress path after SNAT",
        )]
    } else if lower.contains("probe failures") {
        vec![
            FixSuggestion::check(
                "Review pinger probe results",
                kubectl(&["logs", "-n", ns, "daemonset/kube-ovn-pinger", "--tail=100"]),
            ),
            FixSuggestion::manual(
                "Probe failures name the unreachable targets; chase the node pair or \
                 external hop they identify",
            ),
        ]
    } else if lower.contains("reconciliation") {
        vec![
            FixSuggestion::check(
                "Review controller errors in context",
                kubectl(&[
                    "logs", "-n", ns, "deployment/kube-ovn-controller", "--tail=200",
                ]),
            ),
            FixSuggestion::manual(
                "The repeated \"failed to\" lines name the object that cannot be \
                 synced; fix that object rather than restarting blindly",
            ),
        ]
    } else {
        Vec::new()
    };

    if fixes.is_empty() {
        debug!(cause = %cause, "No specific remediation rule matched; using triage steps");
        return vec![
            FixSuggestion::check(
                "Survey Kube-OVN component health",
                kubectl(&["get", "pods", "-n", ns, "-o", "wide"]),
            ),
            FixSuggestion::manual(
                "Diagnosis is inconclusive; rerun with a sharper symptom naming the \
                 exact source, destination, and protocol",
            ),
        ];
    }
    fixes
}

/// Fixes for an unhealthy control plane: restart what is restartable, handle
/// the OVN databases with care.
fn control_plane_fixes(cause: &str, ns: &str) -> Vec<FixSuggestion> {
    let mut fixes = vec![FixSuggestion::check(
        "Survey Kube-OVN component health",
        kubectl(&["get", "pods", "-n", ns, "-o", "wide"]),
    )];

    let mut db_note_added = false;
    for (kind, name) in BASELINE_COMPONENTS {
        if !cause.contains(&format!("{}/{}", kind, name)) {
            continue;
        }
        match *kind {
            "deployment" | "daemonset" if *name != "ovn-central" => {
                fixes.push(FixSuggestion::action(
                    format!("Restart the unhealthy {} {}", kind, name),
                    restart(kind, name, ns),
                ));
            }
            _ if !db_note_added => {
                // ovn-central and the NB/SB/northd endpoints back the OVN
                // databases; a blind restart can lose quorum.
                fixes.push(FixSuggestion::manual(
                    "Inspect ovn-central logs and database cluster state before any \
                     restart; a broken NB/SB database needs recovery, not a blind \
                     restart",
                ));
                db_note_added = true;
            }
            _ => {}
        }
    }

    fixes
}

fn kubectl(args: &[&str]) -> Vec<String> {
    std::iter::once("kubectl")
        .chain(args.iter().copied())
        .map(String::from)
        .collect()
}

fn restart(kind: &str, name: &str, ns: &str) -> Vec<String> {
    kubectl(&["rollout", "restart", &format!("{}/{}", kind, name), "-n", ns])
}

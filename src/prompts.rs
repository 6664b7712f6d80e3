//! Centralized prompt and playbook definitions
//!
//! This module contains the system prompts sent to the decision oracle and
//! the per-category diagnostic playbooks injected into reasoning context.
//! Centralizing them makes them easier to maintain, test, and version.

use crate::session::Category;

/// System prompt for symptom classification.
pub const CLASSIFY_PROMPT: &str = r#"You are a Kube-OVN network diagnostics expert. Classify the reported symptom into exactly one diagnostic category.

Your response MUST be valid JSON in this exact format:
{
  "category": "pod_to_service",
  "confidence": 0.8,
  "rationale": "short explanation of the assignment"
}

Categories:
- general: greetings, control-plane component failures, or anything that does not match a specific traffic scenario
- pod_to_pod: two pods on the same node cannot communicate
- pod_to_pod_cross_node: pods on different nodes cannot communicate
- pod_to_service: a pod cannot reach a Kubernetes Service (ClusterIP/NodePort/LoadBalancer)
- pod_to_external: a pod cannot reach an address outside the cluster

Guidelines:
- Pick the most specific category the symptom supports
- When node placement is unstated, prefer pod_to_pod_cross_node only if the symptom mentions nodes
- confidence should be between 0.0 and 1.0

Always respond with valid JSON only, no other text."#;

/// System prompt for the per-round tool-selection decision.
///
/// The user message carries the playbook, the tool catalog, and the evidence
/// digest; this prompt fixes the reply contract.
pub const DECIDE_PROMPT: &str = r#"You are a Kube-OVN network diagnostics expert driving an evidence-gathering loop. Each round you either request diagnostic tool calls or conclude with a root-cause summary.

Your response MUST be valid JSON in this exact format:
{
  "conclude": false,
  "summary": null,
  "confidence": null,
  "tool_calls": [
    {"tool": "collect_ovn_trace", "args": {"namespace": "default", "pod": "web-0", "destination": "10.16.0.7", "protocol": "icmp"}}
  ]
}

When you have enough evidence, conclude instead:
{
  "conclude": true,
  "summary": "what is broken and why, citing the evidence",
  "confidence": 0.9,
  "tool_calls": []
}

Guidelines:
- Only request tools listed in the tool catalog, with the arguments it documents
- Request at most 3 tool calls per round; prefer the cheapest tool that advances the diagnosis
- Never repeat a call that already succeeded; its output is in the evidence digest
- Follow the playbook's order unless the evidence clearly points elsewhere
- Conclude as soon as the evidence supports a specific cause; do not pad rounds
- confidence should be between 0.0 and 1.0

Always respond with valid JSON only, no other text."#;

/// Playbook for the general category.
pub const GENERAL_PLAYBOOK: &str = r#"## General triage

Use when no specific traffic scenario matched. Work from the control plane outward.

Steps:
1. Review the baseline snapshot in the evidence digest; unhealthy components come first.
2. collect_controller_logs: kube-ovn-controller errors explain most sync failures.
3. collect_pinger_logs: the pinger continuously probes pod, node, and external targets and names what is unreachable.
4. collect_subnet_status: look for exhausted subnets (availableIPs 0) or a false Ready condition.
5. collect_node_info: NotReady nodes break everything scheduled on them.
6. If a specific scenario emerges from the evidence, follow that scenario's steps instead.

Interpretation:
- Controller logs with repeated "failed to" lines name the object that cannot be synced.
- Pinger lines "ping failed" with node targets point at host networking, with external targets at egress.
- A component missing from the baseline means its workload was deleted or never installed."#;

/// Playbook for same-node pod-to-pod connectivity.
pub const POD_TO_POD_PLAYBOOK: &str = r#"## Pod to pod, same node

Use when two pods on the same node cannot communicate.

Steps:
1. collect_pod_describe and collect_pod_ip for both pods: confirm Running, note IPs, MACs, and that both really share a node.
2. collect_ovn_trace from the source pod to the target IP with protocol icmp.
3. If the trace drops, collect_pod_events on both pods for recent warnings.
4. collect_ovs_show on the node if the trace output never reaches the target port.

Interpretation of the trace:
- "ls_in_port_sec_l2" drop: source MAC failed port security, the pod interface configuration is wrong.
- "ls_in_port_sec_ip" drop: source IP failed port security, the pod is using an address it does not own.
- "ls_in_acl" drop: a NetworkPolicy or ACL blocks the traffic; identify the policy and decide if it is intended.
- "ls_in_l2_lkup" without a match: the target MAC is not in the logical switch, the target pod is likely broken.
- output to the target port with no drops: the logical path is fine, suspect the workloads themselves."#;

/// Playbook for cross-node pod-to-pod connectivity.
pub const POD_TO_POD_CROSS_NODE_PLAYBOOK: &str = r#"## Pod to pod, cross node

Use when pods on different nodes cannot communicate. Overlay traffic rides Geneve tunnels on UDP 6081.

Steps:
1. collect_pod_ip for both pods: confirm they are on different nodes and note the node names.
2. collect_ovn_trace from the source pod to the target IP with protocol icmp.
3. collect_ovs_show on the source node and on the target node: the tunnel interface genev_sys_6081 must exist and carry no error.
4. collect_node_info for both nodes: a NotReady node explains a dead tunnel.
5. If tunnels look healthy but traffic still fails, collect_pinger_logs to see whether node-to-node probes fail too.

Interpretation:
- A missing or errored genev_sys_6081 on either side means the tunnel is down: ovs-ovn on that node is broken or a firewall blocks UDP 6081 between the nodes.
- A trace that routes ("lr_in_ip_routing") and exits toward the remote chassis while real traffic fails points at the physical network between the nodes.
- Pinger failures for node targets confirm host-level connectivity loss rather than an OVN problem."#;

/// Playbook for pod-to-service connectivity.
pub const POD_TO_SERVICE_PLAYBOOK: &str = r#"## Pod to service

Use when a pod cannot reach a Service VIP.

Steps:
1. collect_service_describe and collect_service_endpoints: record the ClusterIP, port, and backend list.
2. If the endpoints list is empty, stop here: the selector matches no ready pods.
3. collect_ovn_lb_list: the ClusterIP must appear with the same backends as the endpoints.
4. collect_ovn_trace from the source pod to the ClusterIP with protocol tcp and the service port.
5. If the trace reaches a backend, collect_pod_describe and collect_pod_logs on that backend.

Interpretation:
- Empty endpoints: service selector does not match pod labels, or the backends fail readiness.
- ClusterIP absent from the load balancer list: kube-ovn-controller has not synced the service; check collect_controller_logs.
- Load balancer entry with no backends: same sync problem, scoped to endpoints.
- "ls_in_acl" drop in the trace: a NetworkPolicy blocks service traffic.
- Trace delivers to a backend that does not answer: the backend workload is at fault, not the network."#;

/// Playbook for pod-to-external connectivity.
pub const POD_TO_EXTERNAL_PLAYBOOK: &str = r#"## Pod to external

Use when a pod cannot reach addresses outside the cluster. Egress depends on SNAT and the node's default route.

Steps:
1. collect_ovn_trace from the source pod to a stable external IP such as 8.8.8.8 with protocol icmp.
2. collect_subnet_status for the pod's subnet: natOutgoing must be true for SNAT egress.
3. collect_router_routes: the cluster router needs a route covering external destinations.
4. collect_pinger_logs: the pinger probes external targets from every node and shows whether egress fails cluster-wide or on one node.
5. If the configuration looks intact, collect_tcpdump on the source pod with host set to the external IP: verify requests actually leave and whether replies return.
6. If only name resolution fails, check CoreDNS with collect_pod_logs in kube-system rather than the overlay.

Interpretation:
- Trace without a "ct_snat" action: SNAT is not applied, usually natOutgoing disabled on the subnet.
- Trace leaves via the join subnet toward the node but replies never arrive: the node's own default route or upstream firewall drops the traffic.
- Capture shows requests leaving with no replies coming back: the overlay delivered the traffic; the fault is in the external network or upstream path.
- Pinger external failures on every node: upstream network problem, not Kube-OVN.
- Pinger external failures on one node: that node's gateway path is broken."#;

/// Get the playbook for a diagnostic category.
pub fn playbook_for(category: Category) -> &'static str {
    match category {
        Category::General => GENERAL_PLAYBOOK,
        Category::PodToPod => POD_TO_POD_PLAYBOOK,
        Category::PodToPodCrossNode => POD_TO_POD_CROSS_NODE_PLAYBOOK,
        Category::PodToService => POD_TO_SERVICE_PLAYBOOK,
        Category::PodToExternal => POD_TO_EXTERNAL_PLAYBOOK,
    }
}

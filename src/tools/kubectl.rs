//! Read-only cluster collectors built on `kubectl` and the `kubectl ko`
//! plugin.
//!
//! Every collector resolves its JSON arguments into a single argv and runs
//! the configured binary directly, so no argument ever passes through a
//! shell. Argument values are restricted to Kubernetes object-name
//! characters before they reach the command line.

use std::time::Instant;

use async_trait::async_trait;
use serde_json::Value;
use tokio::process::Command;
use tracing::debug;

use crate::config::KubeConfig;
use crate::error::{ToolError, ToolResult};
use crate::tools::{ToolOutcome, ToolRegistry, ToolRunner, ToolSpec};

type ArgvBuilder = Box<dyn Fn(&Value) -> Result<Vec<String>, String> + Send + Sync>;

/// A collector that runs an external command with a fixed argv shape.
pub struct ExecTool {
    spec: ToolSpec,
    bin: String,
    build: ArgvBuilder,
}

impl ExecTool {
    /// Create a tool from a spec, a binary, and an argv builder.
    pub fn new(
        spec: ToolSpec,
        bin: impl Into<String>,
        build: impl Fn(&Value) -> Result<Vec<String>, String> + Send + Sync + 'static,
    ) -> Self {
        Self {
            spec,
            bin: bin.into(),
            build: Box::new(build),
        }
    }

    /// Resolve the argv for the given arguments without running anything.
    pub fn build_argv(&self, args: &Value) -> ToolResult<Vec<String>> {
        (self.build)(args).map_err(|message| ToolError::InvalidArgs {
            tool: self.spec.name.clone(),
            message,
        })
    }
}

#[async_trait]
impl ToolRunner for ExecTool {
    fn spec(&self) -> &ToolSpec {
        &self.spec
    }

    async fn run(&self, args: &Value) -> ToolResult<ToolOutcome> {
        let argv = self.build_argv(args)?;
        let started = Instant::now();

        debug!(tool = %self.spec.name, argv = ?argv, "Running collector");

        let output = Command::new(&self.bin)
            .args(&argv)
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| ToolError::Spawn {
                tool: self.spec.name.clone(),
                message: e.to_string(),
            })?;

        let latency_ms = started.elapsed().as_millis();

        if output.status.success() {
            let stdout = String::from_utf8_lossy(&output.stdout);
            debug!(
                tool = %self.spec.name,
                latency_ms,
                bytes = stdout.len(),
                "Collector succeeded"
            );
            Ok(ToolOutcome::ok(parse_stdout(&stdout)))
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let detail = if stderr.trim().is_empty() {
                match output.status.code() {
                    Some(code) => format!("exited with status {}", code),
                    None => "terminated by signal".to_string(),
                }
            } else {
                stderr.trim().to_string()
            };
            debug!(tool = %self.spec.name, latency_ms, error = %detail, "Collector failed");
            Ok(ToolOutcome::err(detail))
        }
    }
}

/// Parse collector stdout: JSON when it is JSON, raw text otherwise.
fn parse_stdout(stdout: &str) -> Value {
    let trimmed = stdout.trim();
    if trimmed.starts_with('{') || trimmed.starts_with('[') {
        if let Ok(value) = serde_json::from_str(trimmed) {
            return value;
        }
    }
    Value::String(stdout.to_string())
}

// === Argument validation ===

/// Kubernetes object names plus the dot and underscore used by CR names.
fn valid_name(value: &str) -> bool {
    !value.is_empty()
        && value.len() <= 253
        && value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
}

/// Trace destinations may also be IPv6 addresses.
fn valid_addr(value: &str) -> bool {
    !value.is_empty()
        && value.len() <= 253
        && value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-' | ':'))
}

fn name_arg(args: &Value, key: &str) -> Result<String, String> {
    let value = args
        .get(key)
        .and_then(Value::as_str)
        .ok_or_else(|| format!("{} is required", key))?;
    if !valid_name(value) {
        return Err(format!("{} contains unsupported characters: {:?}", key, value));
    }
    Ok(value.to_string())
}

fn opt_name_arg(args: &Value, key: &str) -> Result<Option<String>, String> {
    match args.get(key).and_then(Value::as_str) {
        None => Ok(None),
        Some(value) if valid_name(value) => Ok(Some(value.to_string())),
        Some(value) => Err(format!(
            "{} contains unsupported characters: {:?}",
            key, value
        )),
    }
}

fn addr_arg(args: &Value, key: &str) -> Result<String, String> {
    let value = args
        .get(key)
        .and_then(Value::as_str)
        .ok_or_else(|| format!("{} is required", key))?;
    if !valid_addr(value) {
        return Err(format!("{} contains unsupported characters: {:?}", key, value));
    }
    Ok(value.to_string())
}

fn opt_addr_arg(args: &Value, key: &str) -> Result<Option<String>, String> {
    match args.get(key).and_then(Value::as_str) {
        None => Ok(None),
        Some(value) if valid_addr(value) => Ok(Some(value.to_string())),
        Some(value) => Err(format!(
            "{} contains unsupported characters: {:?}",
            key, value
        )),
    }
}

/// Log tail size, defaulted and clamped to a sane range.
fn tail_arg(args: &Value) -> String {
    let tail = args
        .get("tail")
        .and_then(Value::as_u64)
        .unwrap_or(100)
        .clamp(1, 1000);
    format!("--tail={}", tail)
}

fn protocol_arg(args: &Value) -> Result<String, String> {
    let protocol = args
        .get("protocol")
        .and_then(Value::as_str)
        .unwrap_or("icmp");
    match protocol {
        "icmp" | "tcp" | "udp" => Ok(protocol.to_string()),
        other => Err(format!("unsupported protocol: {:?}", other)),
    }
}

fn port_arg(args: &Value) -> Result<String, String> {
    let port = args
        .get("port")
        .and_then(Value::as_u64)
        .ok_or_else(|| "port is required for tcp/udp traces".to_string())?;
    if !(1..=65535).contains(&port) {
        return Err(format!("port out of range: {}", port));
    }
    Ok(port.to_string())
}

// === Builtin collectors ===

/// Build the builtin collector set against the given cluster configuration.
///
/// The OVN control-plane namespace from `KubeConfig` is baked into the
/// component-level collectors; pod- and service-level collectors take an
/// explicit namespace argument.
pub fn builtin_tools(kube: &KubeConfig) -> Vec<ExecTool> {
    let bin = kube.kubectl_bin.clone();
    let ovn_ns = kube.namespace.clone();
    let mut tools = Vec::new();

    // Control-plane baseline.
    let ns = ovn_ns.clone();
    tools.push(ExecTool::new(
        ToolSpec::new(
            "check_component",
            "Fetch one Kube-OVN control-plane component as JSON.",
            r#"{"kind": "deployment|daemonset|endpoints", "name": "<name>"}"#,
            "baseline",
        ),
        &bin,
        move |args| {
            let kind = name_arg(args, "kind")?;
            if !matches!(kind.as_str(), "deployment" | "daemonset" | "endpoints") {
                return Err(format!("unsupported component kind: {:?}", kind));
            }
            let name = name_arg(args, "name")?;
            Ok(vec![
                "get".into(),
                kind,
                name,
                "-n".into(),
                ns.clone(),
                "-o".into(),
                "json".into(),
            ])
        },
    ));

    // Pod-level collectors.
    tools.push(ExecTool::new(
        ToolSpec::new(
            "collect_pod_logs",
            "Tail recent logs from a pod.",
            r#"{"pod": "<name>", "namespace": "<name>", "tail": 100}"#,
            "pod_logs",
        ),
        &bin,
        |args| {
            let pod = name_arg(args, "pod")?;
            let ns = name_arg(args, "namespace")?;
            Ok(vec!["logs".into(), pod, "-n".into(), ns, tail_arg(args)])
        },
    ));

    tools.push(ExecTool::new(
        ToolSpec::new(
            "collect_pod_describe",
            "Describe a pod, including conditions and recent events.",
            r#"{"pod": "<name>", "namespace": "<name>"}"#,
            "pod_describe",
        ),
        &bin,
        |args| {
            let pod = name_arg(args, "pod")?;
            let ns = name_arg(args, "namespace")?;
            Ok(vec!["describe".into(), "pod".into(), pod, "-n".into(), ns])
        },
    ));

    tools.push(ExecTool::new(
        ToolSpec::new(
            "collect_pod_events",
            "List events for a pod, oldest first.",
            r#"{"pod": "<name>", "namespace": "<name>"}"#,
            "pod_events",
        ),
        &bin,
        |args| {
            let pod = name_arg(args, "pod")?;
            let ns = name_arg(args, "namespace")?;
            Ok(vec![
                "get".into(),
                "events".into(),
                "-n".into(),
                ns,
                format!("--field-selector=involvedObject.name={}", pod),
                "--sort-by=.lastTimestamp".into(),
            ])
        },
    ));

    tools.push(ExecTool::new(
        ToolSpec::new(
            "collect_pod_ip",
            "Fetch the Kube-OVN IP record for a pod (address, MAC, node, subnet).",
            r#"{"pod": "<name>", "namespace": "<name>"}"#,
            "pod_ip",
        ),
        &bin,
        |args| {
            let pod = name_arg(args, "pod")?;
            let ns = name_arg(args, "namespace")?;
            // IP CRs are named "<pod>.<namespace>".
            Ok(vec![
                "get".into(),
                "ip".into(),
                format!("{}.{}", pod, ns),
                "-o".into(),
                "json".into(),
            ])
        },
    ));

    // Network topology collectors.
    tools.push(ExecTool::new(
        ToolSpec::new(
            "collect_subnet_status",
            "Show subnet status (CIDR, gateway, available IPs); all subnets when no name is given.",
            r#"{"subnet": "<name, optional>"}"#,
            "subnet_status",
        ),
        &bin,
        |args| {
            let mut argv = vec!["get".to_string(), "subnet".to_string()];
            if let Some(subnet) = opt_name_arg(args, "subnet")? {
                argv.push(subnet);
            }
            argv.push("-o".into());
            argv.push("wide".into());
            Ok(argv)
        },
    ));

    tools.push(ExecTool::new(
        ToolSpec::new(
            "collect_node_info",
            "Show node status and addresses; all nodes when no name is given.",
            r#"{"node": "<name, optional>"}"#,
            "node_info",
        ),
        &bin,
        |args| {
            let mut argv = vec!["get".to_string(), "node".to_string()];
            if let Some(node) = opt_name_arg(args, "node")? {
                argv.push(node);
            }
            argv.push("-o".into());
            argv.push("wide".into());
            Ok(argv)
        },
    ));

    // Component log collectors, pinned to the control-plane namespace.
    let ns = ovn_ns.clone();
    tools.push(ExecTool::new(
        ToolSpec::new(
            "collect_controller_logs",
            "Tail kube-ovn-controller logs (subnet/IP allocation, service sync).",
            r#"{"tail": 100}"#,
            "controller_logs",
        ),
        &bin,
        move |args| {
            Ok(vec![
                "logs".into(),
                "-n".into(),
                ns.clone(),
                "deployment/kube-ovn-controller".into(),
                tail_arg(args),
            ])
        },
    ));

    let ns = ovn_ns.clone();
    tools.push(ExecTool::new(
        ToolSpec::new(
            "collect_cni_logs",
            "Tail kube-ovn-cni logs (pod network setup on nodes).",
            r#"{"tail": 100}"#,
            "cni_logs",
        ),
        &bin,
        move |args| {
            Ok(vec![
                "logs".into(),
                "-n".into(),
                ns.clone(),
                "daemonset/kube-ovn-cni".into(),
                tail_arg(args),
            ])
        },
    ));

    let ns = ovn_ns.clone();
    tools.push(ExecTool::new(
        ToolSpec::new(
            "collect_pinger_logs",
            "Tail kube-ovn-pinger logs (continuous node/pod/DNS connectivity probes).",
            r#"{"tail": 100}"#,
            "pinger_logs",
        ),
        &bin,
        move |args| {
            Ok(vec![
                "logs".into(),
                "-n".into(),
                ns.clone(),
                "daemonset/kube-ovn-pinger".into(),
                tail_arg(args),
            ])
        },
    ));

    // OVN / OVS state via the `kubectl ko` plugin.
    tools.push(ExecTool::new(
        ToolSpec::new(
            "collect_ovn_nb_show",
            "Dump the OVN northbound topology (logical switches, routers, ports).",
            "{}",
            "ovn_nb",
        ),
        &bin,
        |_args| Ok(vec!["ko".into(), "nbctl".into(), "show".into()]),
    ));

    tools.push(ExecTool::new(
        ToolSpec::new(
            "collect_ovn_sb_show",
            "Dump the OVN southbound state (chassis and port bindings).",
            "{}",
            "ovn_sb",
        ),
        &bin,
        |_args| Ok(vec!["ko".into(), "sbctl".into(), "show".into()]),
    ));

    tools.push(ExecTool::new(
        ToolSpec::new(
            "collect_ovn_lb_list",
            "List OVN load balancers and their backend mappings for services.",
            "{}",
            "lb_list",
        ),
        &bin,
        |_args| Ok(vec!["ko".into(), "nbctl".into(), "lb-list".into()]),
    ));

    tools.push(ExecTool::new(
        ToolSpec::new(
            "collect_router_routes",
            "List static routes on the cluster logical router.",
            "{}",
            "router_routes",
        ),
        &bin,
        |_args| {
            Ok(vec![
                "ko".into(),
                "nbctl".into(),
                "lr-route-list".into(),
                "ovn-cluster".into(),
            ])
        },
    ));

    tools.push(ExecTool::new(
        ToolSpec::new(
            "collect_ovs_show",
            "Show the OVS bridge and tunnel configuration on one node.",
            r#"{"node": "<name>"}"#,
            "ovs_config",
        ),
        &bin,
        |args| {
            let node = name_arg(args, "node")?;
            Ok(vec!["ko".into(), "vsctl".into(), node, "show".into()])
        },
    ));

    // Service collectors.
    tools.push(ExecTool::new(
        ToolSpec::new(
            "collect_service_endpoints",
            "List the endpoints behind a service.",
            r#"{"service": "<name>", "namespace": "<name>"}"#,
            "service_endpoints",
        ),
        &bin,
        |args| {
            let service = name_arg(args, "service")?;
            let ns = name_arg(args, "namespace")?;
            Ok(vec![
                "get".into(),
                "endpoints".into(),
                service,
                "-n".into(),
                ns,
                "-o".into(),
                "wide".into(),
            ])
        },
    ));

    tools.push(ExecTool::new(
        ToolSpec::new(
            "collect_service_describe",
            "Describe a service (selector, ports, session affinity).",
            r#"{"service": "<name>", "namespace": "<name>"}"#,
            "service_describe",
        ),
        &bin,
        |args| {
            let service = name_arg(args, "service")?;
            let ns = name_arg(args, "namespace")?;
            Ok(vec![
                "describe".into(),
                "svc".into(),
                service,
                "-n".into(),
                ns,
            ])
        },
    ));

    // Datapath simulation.
    tools.push(ExecTool::new(
        ToolSpec::new(
            "collect_ovn_trace",
            "Simulate a packet from a pod through the OVN pipeline and report where it drops.",
            r#"{"pod": "<name>", "namespace": "<name>", "destination": "<ip or hostname>", "protocol": "icmp|tcp|udp", "port": 80}"#,
            "ovn_trace",
        ),
        &bin,
        |args| {
            let pod = name_arg(args, "pod")?;
            let ns = name_arg(args, "namespace")?;
            let destination = addr_arg(args, "destination")?;
            let protocol = protocol_arg(args)?;
            let mut argv = vec![
                "ko".to_string(),
                "trace".to_string(),
                format!("{}/{}", ns, pod),
                destination,
                protocol.clone(),
            ];
            if protocol != "icmp" {
                argv.push(port_arg(args)?);
            }
            Ok(argv)
        },
    ));

    // Live traffic capture. A trace shows what the pipeline would do; the
    // capture shows whether requests actually leave and replies come back.
    tools.push(ExecTool::new(
        ToolSpec::new(
            "collect_tcpdump",
            "Capture a short packet sample on a pod's interface to verify requests leave and replies return.",
            r#"{"pod": "<name>", "namespace": "<name>", "protocol": "icmp|tcp|udp", "host": "<ip, optional>", "count": 10}"#,
            "packet_capture",
        ),
        &bin,
        |args| {
            let pod = name_arg(args, "pod")?;
            let ns = name_arg(args, "namespace")?;
            let protocol = protocol_arg(args)?;
            let count = args
                .get("count")
                .and_then(Value::as_u64)
                .unwrap_or(10)
                .clamp(1, 100);
            let mut argv = vec![
                "ko".to_string(),
                "tcpdump".to_string(),
                format!("{}/{}", ns, pod),
                "-nn".to_string(),
                "-c".to_string(),
                count.to_string(),
                protocol,
            ];
            if let Some(host) = opt_addr_arg(args, "host")? {
                argv.push("and".to_string());
                argv.push("host".to_string());
                argv.push(host);
            }
            Ok(argv)
        },
    ));

    tools
}

/// Register every builtin collector into the registry.
pub fn register_builtin_tools(
    registry: &mut ToolRegistry,
    kube: &KubeConfig,
) -> ToolResult<()> {
    for tool in builtin_tools(kube) {
        registry.register(std::sync::Arc::new(tool))?;
    }
    Ok(())
}

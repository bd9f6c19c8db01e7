use crate::config::DisplayConfig;
use crate::cpu::{
    CpuNode, NodeId, NodeKind, TopologyTree, display_cpu_cstates, display_cpu_pstates, hz_to_human,
};
use crate::detect::HardwareInfo;
use colored::Colorize;

const LABEL_W: usize = 14;

pub fn print_cpu_summary(hw: &HardwareInfo) {
    let rows: Vec<(&str, String)> = vec![
        (
            "CPU",
            hw.cpu
                .model_name
                .as_deref()
                .unwrap_or("Unknown")
                .to_string(),
        ),
        ("Online CPUs", hw.online_cpus.to_string()),
        (
            "Freq Driver",
            format!(
                "{} ({})",
                hw.cpu.scaling_driver.as_deref().unwrap_or("none"),
                hw.cpu.governor.as_deref().unwrap_or("no governor")
            ),
        ),
        (
            "Idle Driver",
            format!(
                "{} ({})",
                hw.cpu.idle_driver.as_deref().unwrap_or("none"),
                hw.cpu.idle_governor.as_deref().unwrap_or("no governor")
            ),
        ),
    ];

    let inner_w = rows
        .iter()
        .map(|(l, v)| l.len().max(LABEL_W) + 2 + v.len())
        .max()
        .unwrap_or(40);

    let title = "Processor";
    let fill = inner_w.saturating_sub(1 + title.len());
    println!("╭─ {} {}╮", title.bold(), "─".repeat(fill));

    for (label, value) in &rows {
        let padded = format!("{:<w$}", label, w = LABEL_W);
        let pad = inner_w.saturating_sub(LABEL_W + 2 + value.len());
        println!("│ {}  {}{} │", padded.dimmed(), value, " ".repeat(pad));
    }

    println!("╰{}╯", "─".repeat(inner_w + 2));
}

/// Print the residency tables of one finished interval.
pub fn print_tables(tree: &TopologyTree, display: &DisplayConfig, iteration: u32) {
    let style = display.table_style();
    let interval_ms = interval_ms(tree);
    let title = format!("Interval {} ({:.0} ms)", iteration, interval_ms);
    println!("── {} {}", title.bold(), "─".repeat(60usize.saturating_sub(title.len())));

    if display.cstates {
        println!("{}", "Idle states".cyan().bold());
        print!("{}", display_cpu_cstates(tree, &style));
        println!();
    }
    if display.pstates {
        println!("{}", "Frequencies".cyan().bold());
        print!("{}", display_cpu_pstates(tree, &style));
        println!();
    }
}

fn interval_ms(tree: &TopologyTree) -> f64 {
    tree.iter().next().map(|n| n.time_factor / 1000.0).unwrap_or(0.0)
}

/// Print the package/core/thread layout as an indented tree.
pub fn print_topology(tree: &TopologyTree) {
    for &root in tree.roots() {
        for id in tree.descendants(root) {
            let Some(node) = tree.node(id) else {
                continue;
            };
            let (indent, label) = match node.kind() {
                NodeKind::Package => ("", node.to_string().bold()),
                NodeKind::Core => ("  ", node.to_string().normal()),
                NodeKind::Thread => ("    ", node.to_string().dimmed()),
            };
            let max = match node.max_frequency {
                0 => String::new(),
                hz => format!("  max {}", hz_to_human(hz)),
            };
            println!("{}{}{}", indent, label, max.dimmed());
        }
    }
}

fn node_json(tree: &TopologyTree, id: NodeId) -> serde_json::Result<serde_json::Value> {
    let Some(node) = tree.node(id) else {
        return Ok(serde_json::Value::Null);
    };
    let mut value = serde_json::to_value(node)?;
    let children = node
        .children()
        .iter()
        .map(|&child| node_json(tree, child))
        .collect::<serde_json::Result<Vec<_>>>()?;
    if let Some(object) = value.as_object_mut() {
        object.insert("active_percent".into(), active_json(node));
        object.insert("children".into(), serde_json::Value::Array(children));
    }
    Ok(value)
}

fn active_json(node: &CpuNode) -> serde_json::Value {
    if node.cstates.is_empty() {
        serde_json::Value::Null
    } else {
        serde_json::json!(node.active_percent())
    }
}

/// Machine-readable report of one finished interval.
pub fn report_json(
    hw: &HardwareInfo,
    tree: &TopologyTree,
    iteration: u32,
) -> serde_json::Result<serde_json::Value> {
    let packages = tree
        .roots()
        .iter()
        .map(|&root| node_json(tree, root))
        .collect::<serde_json::Result<Vec<_>>>()?;

    Ok(serde_json::json!({
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "iteration": iteration,
        "interval_ms": interval_ms(tree),
        "cpu": hw.cpu,
        "packages": packages,
    }))
}

/// Machine-readable package/core/thread layout.
pub fn topology_json(tree: &TopologyTree) -> serde_json::Value {
    fn walk(tree: &TopologyTree, id: NodeId) -> serde_json::Value {
        let Some(node) = tree.node(id) else {
            return serde_json::Value::Null;
        };
        serde_json::json!({
            "kind": node.kind(),
            "number": node.number(),
            "first_cpu": node.first_cpu(),
            "children": node.children().iter().map(|&c| walk(tree, c)).collect::<Vec<_>>(),
        })
    }
    serde_json::Value::Array(tree.roots().iter().map(|&r| walk(tree, r)).collect())
}

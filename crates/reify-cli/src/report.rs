use std::fmt::Write as _;

use reify::analysis::collect_fusion_sites;
use reify::ir::{FusionBackendConfig, Operation, Program};
use reify::Result;

/// One annotated fusion, as shown by `reify annotate`.
#[derive(Debug, Clone, PartialEq)]
pub struct FusionRow {
    pub computation: String,
    pub node: u32,
    pub kind: &'static str,
    pub body: String,
    pub end_to_end_cycles: Option<f64>,
    pub exec_time_us: Option<f64>,
}

/// Rows for every reachable fusion in walk order.
pub fn fusion_rows(program: &Program) -> Result<Vec<FusionRow>> {
    let mut rows = Vec::new();
    for site in collect_fusion_sites(program)? {
        let node = site.node_ref();
        let kind = match program.instruction(node).map(|inst| &inst.op) {
            Some(Operation::Fusion(spec)) => spec.kind.as_str(),
            _ => "?",
        };
        let config: FusionBackendConfig = program.backend_config(node)?;
        let cost = config.reification_cost;
        rows.push(FusionRow {
            computation: computation_name(program, site.computation.0),
            node: site.node.0,
            kind,
            body: computation_name(program, site.body.0),
            end_to_end_cycles: cost.map(|c| c.end_to_end_cycles),
            exec_time_us: cost.map(|c| c.exec_time_us),
        });
    }
    Ok(rows)
}

fn computation_name(program: &Program, id: u32) -> String {
    program
        .computations()
        .get(id as usize)
        .map(|c| c.name.clone())
        .unwrap_or_else(|| format!("<{id}>"))
}

pub fn format_rows(rows: &[FusionRow]) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "{:<20} {:>6} {:<8} {:<20} {:>16} {:>12}",
        "computation", "node", "kind", "body", "cycles", "exec_us"
    );
    for row in rows {
        let cycles = row
            .end_to_end_cycles
            .map(|v| format!("{v:.1}"))
            .unwrap_or_else(|| "-".to_string());
        let exec = row
            .exec_time_us
            .map(|v| format!("{v:.3}"))
            .unwrap_or_else(|| "-".to_string());
        let _ = writeln!(
            out,
            "{:<20} {:>6} {:<8} {:<20} {:>16} {:>12}",
            row.computation,
            format!("%{}", row.node),
            row.kind,
            row.body,
            cycles,
            exec
        );
    }
    let total: f64 = rows.iter().filter_map(|row| row.end_to_end_cycles).sum();
    let _ = writeln!(out, "{} fusion(s), {total:.1} cycles total", rows.len());
    out
}

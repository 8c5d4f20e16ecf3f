//! Renders a translated function as C-like pseudocode.
//!
//! This is a compact writer sufficient for the CLI and the test suite; it
//! prints declarations for every named temporary and phi, then each block's
//! surviving statements with gotos between blocks.

use std::fmt::{self, Write};

use crate::flow::NodeId;
use crate::simplify::simplify_condition;
use crate::translate::FunctionInfo;

pub fn write_function(out: &mut impl Write, info: &FunctionInfo) -> fmt::Result {
    let return_value = info
        .flow
        .nodes
        .iter()
        .filter_map(|node| info.blocks[node.id.0].as_ref())
        .find_map(|block| block.return_value.as_ref());
    let return_type = match return_value {
        Some(expr) => expr.ty().to_decl(),
        None => "void ".to_owned(),
    };

    write!(out, "{return_type}{}(", info.name)?;
    for (i, &offset) in info.stack.argument_offsets.iter().enumerate() {
        if i != 0 {
            write!(out, ", ")?;
        }
        let ty = info.stack.argument_type(offset);
        write!(out, "{}arg{:X}", ty.to_decl(), offset / 4)?;
    }
    writeln!(out, ")")?;
    writeln!(out, "{{")?;

    for &offset in &info.stack.local_var_offsets {
        let ty = info.stack.stack_var_type(offset);
        writeln!(out, "    {}sp{offset:X};", ty.to_decl())?;
    }
    for temp in &info.stack.temp_vars {
        if temp.num_usages() > 1 {
            writeln!(out, "    {}{};", temp.ty.to_decl(), temp.var_name())?;
        }
    }
    for phi in &info.stack.phi_vars {
        writeln!(out, "    {}{};", phi.ty.to_decl(), phi.var_name())?;
    }

    for node in &info.flow.nodes {
        if node.id.0 != 0 {
            writeln!(out, "block_{}:", node.id.0)?;
        }
        let Some(block) = &info.blocks[node.id.0] else {
            writeln!(out, "    // (unreachable)")?;
            continue;
        };
        for stmt in &block.to_write {
            if stmt.should_write() {
                writeln!(out, "    {stmt}")?;
            }
        }
        if let Some(condition) = &block.branch_condition {
            let target = taken_target(info, node.id);
            let simplified =
                simplify_condition(&crate::ir::Expr::Binary(condition.clone()));
            writeln!(out, "    if {simplified} goto block_{};", target.0)?;
        } else if let Some(&target) = node.successors.first()
            && node.successors.len() == 1
            && target.0 != node.id.0 + 1
        {
            writeln!(out, "    goto block_{};", target.0)?;
        }
        if let Some(ret) = &block.return_value {
            writeln!(out, "    return {ret};")?;
        } else if crate::flow::NodeKind::Return == node.kind {
            writeln!(out, "    return;")?;
        }
    }
    writeln!(out, "}}")
}

/// The taken edge of a conditional branch: the last successor (the first is
/// the fall-through).
fn taken_target(info: &FunctionInfo, node: NodeId) -> NodeId {
    let successors = &info.flow.node(node).successors;
    successors.last().copied().unwrap_or(node)
}

pub fn render_function(info: &FunctionInfo) -> String {
    let mut out = String::new();
    // Writing into a String cannot fail.
    let _ = write_function(&mut out, info);
    out
}

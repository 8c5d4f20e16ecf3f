//! Builds a control-flow graph with dominator information from a parsed
//! function.
//!
//! MIPS branch delay slots are normalized away here: the instruction in each
//! delay slot is hoisted above its branch (or dropped if it is a `nop`), so
//! the translation core only ever sees delay-slot-free blocks.

use thiserror::Error;

use crate::parse::{Arg, AsmFunction, Instruction, Item};

/// Index of a node in its [`FlowGraph`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeId(pub usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    Basic,
    /// Ends in `jr $ra`; carries the function's return value.
    Return,
}

#[derive(Debug)]
pub struct Node {
    pub id: NodeId,
    pub kind: NodeKind,
    pub label: Option<String>,
    pub instructions: Vec<Instruction>,
    pub successors: Vec<NodeId>,
    pub parents: Vec<NodeId>,
    pub immediate_dominator: Option<NodeId>,
    /// Children in the dominator tree, in node order.
    pub immediately_dominates: Vec<NodeId>,
}

#[derive(Debug)]
pub struct FlowGraph {
    pub nodes: Vec<Node>,
}

#[derive(Debug, Error, PartialEq)]
pub enum FlowError {
    #[error("function has no instructions")]
    EmptyFunction,
    #[error("branch to unknown label {0}")]
    UnknownLabel(String),
}

/// Mnemonics that occupy a branch delay slot.
fn has_delay_slot(mnemonic: &str) -> bool {
    is_block_terminator(mnemonic) || mnemonic == "jal"
}

/// Mnemonics that end a basic block.
fn is_block_terminator(mnemonic: &str) -> bool {
    matches!(
        mnemonic,
        "b" | "j"
            | "beq"
            | "bne"
            | "beqz"
            | "bnez"
            | "blez"
            | "bgtz"
            | "bltz"
            | "bgez"
            | "bc1t"
            | "bc1f"
            | "jr"
    )
}

fn is_unconditional(mnemonic: &str) -> bool {
    matches!(mnemonic, "b" | "j")
}

impl FlowGraph {
    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id.0]
    }

    pub fn entry(&self) -> &Node {
        &self.nodes[0]
    }

    pub fn build(function: &AsmFunction) -> Result<FlowGraph, FlowError> {
        let items = normalize_delay_slots(&function.body);

        // Split into raw blocks at labels and after terminators.
        let mut blocks: Vec<(Option<String>, Vec<Instruction>)> = Vec::new();
        let mut current: Option<(Option<String>, Vec<Instruction>)> = None;
        for item in items {
            match item {
                Item::Label(name) => {
                    if let Some(block) = current.take() {
                        blocks.push(block);
                    }
                    current = Some((Some(name), Vec::new()));
                }
                Item::Instr(instr) => {
                    let ends_block = is_block_terminator(&instr.mnemonic);
                    let block = current.get_or_insert_with(|| (None, Vec::new()));
                    block.1.push(instr);
                    if ends_block {
                        blocks.push(current.take().ok_or(FlowError::EmptyFunction)?);
                    }
                }
            }
        }
        if let Some(block) = current.take() {
            blocks.push(block);
        }
        if blocks.is_empty() {
            return Err(FlowError::EmptyFunction);
        }

        let mut nodes: Vec<Node> = blocks
            .into_iter()
            .enumerate()
            .map(|(index, (label, instructions))| {
                let kind = match instructions.last() {
                    Some(instr) if instr.mnemonic == "jr" => NodeKind::Return,
                    _ => NodeKind::Basic,
                };
                Node {
                    id: NodeId(index),
                    kind,
                    label,
                    instructions,
                    successors: Vec::new(),
                    parents: Vec::new(),
                    immediate_dominator: None,
                    immediately_dominates: Vec::new(),
                }
            })
            .collect();

        wire_edges(&mut nodes)?;
        compute_dominators(&mut nodes);
        Ok(FlowGraph { nodes })
    }
}

/// Hoist delay-slot instructions above their branches, dropping `nop`s.
fn normalize_delay_slots(body: &[Item]) -> Vec<Item> {
    let mut out = Vec::with_capacity(body.len());
    let mut pending_branch: Option<Instruction> = None;
    for item in body {
        match (pending_branch.take(), item) {
            (Some(branch), Item::Instr(slot)) => {
                if slot.mnemonic != "nop" {
                    out.push(Item::Instr(slot.clone()));
                }
                out.push(Item::Instr(branch));
            }
            (Some(branch), Item::Label(_)) => {
                // A branch with no delay slot before the next label; keep it.
                out.push(Item::Instr(branch));
                out.push(item.clone());
            }
            (None, Item::Instr(instr)) if instr.mnemonic == "nop" => {}
            (None, Item::Instr(instr)) if has_delay_slot(&instr.mnemonic) => {
                pending_branch = Some(instr.clone());
            }
            (None, item) => out.push(item.clone()),
        }
    }
    if let Some(branch) = pending_branch {
        out.push(Item::Instr(branch));
    }
    out
}

fn branch_target(instr: &Instruction) -> Option<&str> {
    match instr.args.last() {
        Some(Arg::Symbol(name)) => Some(name.trim_start_matches('.')),
        _ => None,
    }
}

fn wire_edges(nodes: &mut Vec<Node>) -> Result<(), FlowError> {
    let label_index: std::collections::BTreeMap<String, NodeId> = nodes
        .iter()
        .filter_map(|node| node.label.clone().map(|label| (label, node.id)))
        .collect();

    let mut edges: Vec<(usize, Vec<NodeId>)> = Vec::new();
    for node in nodes.iter() {
        let mut successors = Vec::new();
        match node.instructions.last() {
            Some(instr) if instr.mnemonic == "jr" => {}
            Some(instr) if is_block_terminator(&instr.mnemonic) => {
                let target = branch_target(instr)
                    .ok_or_else(|| FlowError::UnknownLabel(instr.to_string()))?;
                let target = *label_index
                    .get(target)
                    .ok_or_else(|| FlowError::UnknownLabel(target.to_owned()))?;
                if is_unconditional(&instr.mnemonic) {
                    successors.push(target);
                } else {
                    // Fall through first, then the taken edge.
                    if node.id.0 + 1 < nodes.len() {
                        successors.push(NodeId(node.id.0 + 1));
                    }
                    successors.push(target);
                }
            }
            _ => {
                if node.id.0 + 1 < nodes.len() {
                    successors.push(NodeId(node.id.0 + 1));
                }
            }
        }
        edges.push((node.id.0, successors));
    }

    for (index, successors) in edges {
        for &succ in &successors {
            nodes[succ.0].parents.push(NodeId(index));
        }
        nodes[index].successors = successors;
    }
    Ok(())
}

/// The standard iterative dominator fixpoint over reverse postorder.
fn compute_dominators(nodes: &mut [Node]) {
    let len = nodes.len();
    let mut visited = vec![false; len];
    let mut postorder = Vec::with_capacity(len);
    let mut stack = vec![(0usize, 0usize)];
    visited[0] = true;
    while let Some((n, i)) = stack.pop() {
        if i < nodes[n].successors.len() {
            stack.push((n, i + 1));
            let succ = nodes[n].successors[i].0;
            if !visited[succ] {
                visited[succ] = true;
                stack.push((succ, 0));
            }
        } else {
            postorder.push(n);
        }
    }

    let mut order = vec![usize::MAX; len];
    for (i, &n) in postorder.iter().enumerate() {
        order[n] = i;
    }

    let mut idom: Vec<Option<usize>> = vec![None; len];
    idom[0] = Some(0);
    let mut changed = true;
    while changed {
        changed = false;
        for &b in postorder.iter().rev() {
            if b == 0 {
                continue;
            }
            let mut new_idom: Option<usize> = None;
            for parent in nodes[b].parents.iter().map(|p| p.0) {
                if idom[parent].is_none() {
                    continue;
                }
                new_idom = Some(match new_idom {
                    None => parent,
                    Some(other) => intersect(parent, other, &idom, &order),
                });
            }
            if new_idom.is_some() && idom[b] != new_idom {
                idom[b] = new_idom;
                changed = true;
            }
        }
    }

    for n in 0..len {
        nodes[n].immediate_dominator = match idom[n] {
            Some(d) if n != 0 => Some(NodeId(d)),
            _ => None,
        };
    }
    for n in 0..len {
        if let Some(dom) = nodes[n].immediate_dominator {
            nodes[dom.0].immediately_dominates.push(NodeId(n));
        }
    }
    for node in nodes.iter_mut() {
        node.immediately_dominates.sort();
    }
}

fn intersect(mut a: usize, mut b: usize, idom: &[Option<usize>], order: &[usize]) -> usize {
    while a != b {
        while order[a] < order[b] {
            a = idom[a].expect("processed node has a dominator");
        }
        while order[b] < order[a] {
            b = idom[b].expect("processed node has a dominator");
        }
    }
    a
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parse;

    fn graph(src: &str) -> FlowGraph {
        let file = parse::parse(src, "test.s").unwrap();
        FlowGraph::build(&file.functions[0]).unwrap()
    }

    #[test]
    fn straight_line_is_one_block() {
        let g = graph(
            "glabel f\n  addiu $v0, $zero, 5\n  jr $ra\n  nop\n",
        );
        assert_eq!(g.nodes.len(), 1);
        assert_eq!(g.nodes[0].kind, NodeKind::Return);
        // The delay-slot nop was dropped.
        assert_eq!(g.nodes[0].instructions.len(), 2);
    }

    #[test]
    fn delay_slot_is_hoisted() {
        let g = graph(
            "glabel f\n  beqz $a0, .L1\n  addiu $v0, $zero, 1\n.L1:\n  jr $ra\n  nop\n",
        );
        let entry = &g.nodes[0];
        assert_eq!(entry.instructions[0].mnemonic, "addiu");
        assert_eq!(entry.instructions[1].mnemonic, "beqz");
    }

    #[test]
    fn diamond_dominators() {
        let g = graph(
            "glabel f\n  beqz $a0, .Lelse\n  nop\n  addiu $t0, $zero, 1\n  b .Ljoin\n  nop\n.Lelse:\n  addiu $t0, $zero, 2\n.Ljoin:\n  jr $ra\n  nop\n",
        );
        assert_eq!(g.nodes.len(), 4);
        let join = g
            .nodes
            .iter()
            .find(|n| n.label.as_deref() == Some("Ljoin"))
            .unwrap();
        assert_eq!(join.parents.len(), 2);
        assert_eq!(join.immediate_dominator, Some(NodeId(0)));
        assert_eq!(g.nodes[0].immediately_dominates.len(), 3);
        assert_eq!(join.kind, NodeKind::Return);
    }

    #[test]
    fn conditional_successors_fall_through_first() {
        let g = graph(
            "glabel f\n  bnez $a0, .L2\n  nop\n.L1:\n  addiu $v0, $zero, 1\n.L2:\n  jr $ra\n  nop\n",
        );
        assert_eq!(g.nodes[0].successors, vec![NodeId(1), NodeId(2)]);
    }

    #[test]
    fn unknown_branch_target_fails() {
        let file = parse::parse("glabel f\n  b .Lmissing\n  nop\n", "t.s").unwrap();
        assert_eq!(
            FlowGraph::build(&file.functions[0]).unwrap_err(),
            FlowError::UnknownLabel("Lmissing".into())
        );
    }
}

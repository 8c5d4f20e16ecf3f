//! A serializable summary of a translated function.

use serde::Serialize;

use crate::output::render_function;
use crate::translate::FunctionInfo;

#[derive(Debug, Serialize)]
pub struct VarSummary {
    pub name: String,
    pub ty: String,
}

#[derive(Debug, Serialize)]
pub struct BlockSummary {
    pub id: usize,
    pub label: Option<String>,
    pub translated: bool,
    pub statements: Vec<String>,
    pub branch_condition: Option<String>,
    pub return_value: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct FunctionSummary {
    pub name: String,
    pub allocated_stack_size: i64,
    pub is_leaf: bool,
    pub return_addr_location: i64,
    pub arguments: Vec<VarSummary>,
    pub locals: Vec<VarSummary>,
    pub blocks: Vec<BlockSummary>,
    pub pseudocode: String,
}

impl FunctionSummary {
    pub fn new(info: &FunctionInfo) -> FunctionSummary {
        // Render first: printing assigns the lazy temporary names that the
        // statement strings below reuse.
        let pseudocode = render_function(info);
        let arguments = info
            .stack
            .argument_offsets
            .iter()
            .map(|&offset| VarSummary {
                name: format!("arg{:X}", offset / 4),
                ty: info.stack.argument_type(offset).to_string(),
            })
            .collect();
        let locals = info
            .stack
            .local_var_offsets
            .iter()
            .map(|&offset| VarSummary {
                name: format!("sp{offset:X}"),
                ty: info.stack.stack_var_type(offset).to_string(),
            })
            .collect();
        let blocks = info
            .flow
            .nodes
            .iter()
            .map(|node| {
                let block = info.blocks[node.id.0].as_ref();
                BlockSummary {
                    id: node.id.0,
                    label: node.label.clone(),
                    translated: block.is_some(),
                    statements: block
                        .map(|b| {
                            b.to_write
                                .iter()
                                .filter(|stmt| stmt.should_write())
                                .map(|stmt| stmt.to_string())
                                .collect()
                        })
                        .unwrap_or_default(),
                    branch_condition: block
                        .and_then(|b| b.branch_condition.as_ref())
                        .map(|cond| crate::ir::Expr::Binary(cond.clone()).to_string()),
                    return_value: block
                        .and_then(|b| b.return_value.as_ref())
                        .map(|ret| ret.to_string()),
                }
            })
            .collect();
        FunctionSummary {
            name: info.name.clone(),
            allocated_stack_size: info.stack.allocated_stack_size,
            is_leaf: info.stack.is_leaf,
            return_addr_location: info.stack.return_addr_location,
            arguments,
            locals,
            blocks,
            pseudocode,
        }
    }
}

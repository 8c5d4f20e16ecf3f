//! Reverse engineers a function's stack frame from its prologue.

use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt::Display;
use std::rc::Rc;

use crate::flow::Node;
use crate::ir::{Expr, GlobalSymbol, LocalVar, PassedInArg, PhiExpr, SubroutineArg, TempCounters};
use crate::parse::Arg;
use crate::reg::Reg;
use crate::translate::TranslateError;
use crate::types::Type;

/// Key of the type-interning map: every reference to the same stack slot,
/// global symbol, struct field or argument slot shares one unifiable type
/// term. Struct keys include the identity of the base expression.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum TypeKey {
    Stack(i64),
    Arg(i64),
    Symbol(String),
    Struct(usize, i64),
}

#[derive(Debug)]
pub struct StackInfo {
    pub function_name: String,
    pub allocated_stack_size: i64,
    pub is_leaf: bool,
    pub local_vars_region_bottom: i64,
    pub return_addr_location: i64,
    pub callee_save_locations: BTreeMap<Reg, i64>,
    /// Offsets of discovered locals, kept sorted by stack position.
    pub local_var_offsets: BTreeSet<i64>,
    /// Offsets of discovered incoming arguments, relative to the caller's
    /// outgoing argument area.
    pub argument_offsets: BTreeSet<i64>,
    /// Every temporary created during translation, for declarations.
    pub temp_vars: Vec<Rc<crate::ir::EvalOnceExpr>>,
    /// Every named phi, for declarations.
    pub phi_vars: Vec<Rc<PhiExpr>>,
    pub temp_counters: TempCounters,
    unique_types: HashMap<TypeKey, Type>,
}

impl StackInfo {
    /// Pick out the prologue instructions that reveal the frame layout.
    /// Consumes only the entry block.
    pub fn analyze(function_name: &str, entry: &Node) -> Result<StackInfo, TranslateError> {
        let mut info = StackInfo {
            function_name: function_name.to_owned(),
            allocated_stack_size: 0,
            is_leaf: true,
            local_vars_region_bottom: 0,
            return_addr_location: 0,
            callee_save_locations: BTreeMap::new(),
            local_var_offsets: BTreeSet::new(),
            argument_offsets: BTreeSet::new(),
            temp_vars: Vec::new(),
            phi_vars: Vec::new(),
            temp_counters: Rc::new(RefCell::new(HashMap::new())),
            unique_types: HashMap::new(),
        };

        for instr in &entry.instructions {
            let Some(Arg::Reg(destination)) = instr.args.first() else {
                continue;
            };
            if instr.mnemonic == "addiu" && *destination == Reg::Sp {
                // Moving the stack pointer.
                let Some(Arg::Literal(value)) = instr.args.get(2) else {
                    return Err(TranslateError::BadPrologue("addiu $sp with non-literal"));
                };
                info.allocated_stack_size = value.abs();
            } else if instr.mnemonic == "sw" && *destination == Reg::Ra {
                // Saving the return address on the stack.
                let Some(Arg::AddressMode { offset, base: Reg::Sp }) = instr.args.get(1) else {
                    continue;
                };
                info.is_leaf = false;
                info.return_addr_location = match offset.as_deref() {
                    // This should only happen in the rare case that the
                    // function only calls subroutines with no arguments.
                    None => 0,
                    Some(Arg::Literal(value)) => *value,
                    Some(_) => return Err(TranslateError::BadPrologue("sw $ra at non-literal offset")),
                };
            } else if instr.mnemonic == "sw" && destination.is_callee_save() {
                // Initial saving of a callee-save register onto the stack.
                let Some(Arg::AddressMode { offset, base: Reg::Sp }) = instr.args.get(1) else {
                    continue;
                };
                let location = match offset.as_deref() {
                    None => 0,
                    Some(Arg::Literal(value)) => *value,
                    Some(_) => {
                        return Err(TranslateError::BadPrologue(
                            "callee-save store at non-literal offset",
                        ));
                    }
                };
                info.callee_save_locations.insert(*destination, location);
            }
        }

        // Find the region that contains local variables.
        info.local_vars_region_bottom = if info.is_leaf {
            match info.callee_save_locations.values().max() {
                // In a leaf with callee-save registers, the locals lie
                // directly above those registers.
                Some(max) => max + 4,
                // In a leaf without, they lie at the bottom of the stack.
                None => 0,
            }
        } else {
            // In a non-leaf, the locals lie above the return address slot.
            info.return_addr_location + 4
        };

        Ok(info)
    }

    fn in_subroutine_arg_region(&self, location: i64) -> bool {
        debug_assert!(!self.is_leaf);
        let subroutine_arg_top = match self.callee_save_locations.values().min() {
            Some(&min) => {
                // The callee-save area sits below the saved return address.
                debug_assert!(self.return_addr_location > min);
                min
            }
            None => self.return_addr_location,
        };
        location < subroutine_arg_top
    }

    fn in_local_var_region(&self, location: i64) -> bool {
        self.local_vars_region_bottom <= location && location < self.allocated_stack_size
    }

    fn location_above_stack(&self, location: i64) -> bool {
        location >= self.allocated_stack_size
    }

    pub fn add_local_var(&mut self, offset: i64) {
        self.local_var_offsets.insert(offset);
    }

    pub fn add_argument(&mut self, offset: i64) {
        self.argument_offsets.insert(offset);
    }

    /// A fresh `copied` view of the incoming argument at `location`, sharing
    /// the interned type of that argument slot.
    pub fn get_argument(&mut self, location: i64) -> Expr {
        Expr::Arg(Rc::new(PassedInArg {
            offset: location,
            copied: true,
            ty: self.unique_type_for(TypeKey::Arg(location)),
        }))
    }

    fn unique_type_for(&mut self, key: TypeKey) -> Type {
        self.unique_types.entry(key).or_insert_with(Type::any).clone()
    }

    pub fn global_symbol(&mut self, name: &str) -> Expr {
        let ty = self.unique_type_for(TypeKey::Symbol(name.to_owned()));
        Expr::Global(Rc::new(GlobalSymbol {
            name: name.to_owned(),
            ty,
        }))
    }

    /// The interned type of a struct access, keyed by the identity of the
    /// base expression and the offset, so successive accesses through the
    /// same base share one refinable term.
    pub fn struct_type_for(&mut self, base_identity: usize, offset: i64) -> Type {
        self.unique_type_for(TypeKey::Struct(base_identity, offset))
    }

    pub fn stack_var_type(&self, offset: i64) -> Type {
        match self.unique_types.get(&TypeKey::Stack(offset)) {
            Some(ty) => ty.clone(),
            None => Type::any(),
        }
    }

    pub fn argument_type(&self, offset: i64) -> Type {
        match self.unique_types.get(&TypeKey::Arg(offset)) {
            Some(ty) => ty.clone(),
            None => Type::any(),
        }
    }

    /// Classify a frame offset into a local, an incoming argument, or an
    /// outgoing subroutine argument.
    pub fn get_stack_var(&mut self, location: i64, store: bool) -> Expr {
        if self.in_local_var_region(location) {
            Expr::Local(Rc::new(LocalVar {
                offset: location,
                ty: self.unique_type_for(TypeKey::Stack(location)),
            }))
        } else if self.location_above_stack(location) {
            let ret = self.get_argument(location - self.allocated_stack_size);
            if !store && let Expr::Arg(arg) = &ret {
                self.add_argument(arg.offset);
            }
            ret
        } else if !self.is_leaf && self.in_subroutine_arg_region(location) {
            Expr::SubArg(Rc::new(SubroutineArg {
                offset: location,
                ty: Type::any(),
            }))
        } else {
            // Some annoying bookkeeping instruction. To avoid further
            // special-casing, just return whatever - it won't matter.
            Expr::Local(Rc::new(LocalVar {
                offset: location,
                ty: self.unique_type_for(TypeKey::Stack(location)),
            }))
        }
    }
}

impl Display for StackInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Stack info for function {}:", self.function_name)?;
        writeln!(f, "Allocated stack size: {}", self.allocated_stack_size)?;
        writeln!(f, "Leaf? {}", self.is_leaf)?;
        writeln!(
            f,
            "Bottom of local vars region: {}",
            self.local_vars_region_bottom
        )?;
        writeln!(f, "Location of return addr: {}", self.return_addr_location)?;
        write!(
            f,
            "Locations of callee save registers: {:?}",
            self.callee_save_locations
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flow::FlowGraph;
    use crate::parse;

    fn analyze(src: &str) -> StackInfo {
        let file = parse::parse(src, "test.s").unwrap();
        let flow = FlowGraph::build(&file.functions[0]).unwrap();
        StackInfo::analyze("f", flow.entry()).unwrap()
    }

    #[test]
    fn leaf_without_saves() {
        let info = analyze("glabel f\n  addiu $v0, $zero, 5\n  jr $ra\n  nop\n");
        assert!(info.is_leaf);
        assert_eq!(info.allocated_stack_size, 0);
        assert_eq!(info.local_vars_region_bottom, 0);
    }

    #[test]
    fn non_leaf_frame() {
        let info = analyze(
            "glabel f\n  addiu $sp, $sp, -0x20\n  sw $ra, 0x14($sp)\n  sw $s0, 0x10($sp)\n  jr $ra\n  nop\n",
        );
        assert!(!info.is_leaf);
        assert_eq!(info.allocated_stack_size, 0x20);
        assert_eq!(info.return_addr_location, 0x14);
        assert_eq!(info.callee_save_locations.get(&Reg::S0), Some(&0x10));
        // Locals sit above the return address slot.
        assert_eq!(info.local_vars_region_bottom, 0x18);
    }

    #[test]
    fn leaf_with_saves_stacks_locals_above() {
        let info = analyze(
            "glabel f\n  addiu $sp, $sp, -0x18\n  sw $s0, 0x8($sp)\n  sw $s1, 0xc($sp)\n  jr $ra\n  nop\n",
        );
        assert!(info.is_leaf);
        assert_eq!(info.local_vars_region_bottom, 0x10);
    }

    #[test]
    fn stack_var_classification() {
        let mut info = analyze(
            "glabel f\n  addiu $sp, $sp, -0x20\n  sw $ra, 0x14($sp)\n  jr $ra\n  nop\n",
        );
        assert!(matches!(info.get_stack_var(0x18, false), Expr::Local(_)));
        // Above the frame: an incoming argument at normalized offset 4.
        match info.get_stack_var(0x24, false) {
            Expr::Arg(arg) => {
                assert_eq!(arg.offset, 4);
                assert!(arg.copied);
            }
            other => panic!("expected argument, got {other:?}"),
        }
        assert!(info.argument_offsets.contains(&4));
        // Below the return-address slot: outgoing subroutine arguments.
        assert!(matches!(info.get_stack_var(0x4, true), Expr::SubArg(_)));
    }

    #[test]
    fn stack_slot_types_are_shared() {
        let mut info = analyze(
            "glabel f\n  addiu $sp, $sp, -0x10\n  jr $ra\n  nop\n",
        );
        let a = info.get_stack_var(0x8, false);
        let b = info.get_stack_var(0x8, true);
        assert!(a.ty().unify(&Type::u32()));
        assert_eq!(b.ty().to_string(), "u32");
    }
}

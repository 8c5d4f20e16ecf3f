//! Type information for expressions, which may improve over time.
//!
//! The least specific type is *any* (initially the case for e.g. arguments);
//! this might get refined into *intish* if the value is used in an integer
//! add, or into *u32* if it participates in a logical right shift. Types only
//! ever narrow: a concrete type like `u32` can never change into anything
//! else, and ints can't become floats. Joined types share one representative
//! through a union-find structure, so refinement through any handle is
//! visible through all of them.

use std::cell::RefCell;
use std::fmt::Display;
use std::rc::Rc;

const K_INT: u8 = 1;
const K_PTR: u8 = 2;
const K_FLOAT: u8 = 4;
const K_INTPTR: u8 = K_INT | K_PTR;
const K_ANY: u8 = K_INT | K_PTR | K_FLOAT;

const SIGNED: u8 = 1;
const UNSIGNED: u8 = 2;
const ANY_SIGN: u8 = SIGNED | UNSIGNED;

struct TypeCell {
    kind: u8,
    size: Option<u32>,
    sign: u8,
    parent: Option<Type>,
}

/// A cheaply clonable handle on a refinable type term. Clones share the
/// underlying cell; equality of the expressions that carry these handles
/// never looks at the cell contents.
#[derive(Clone)]
pub struct Type(Rc<RefCell<TypeCell>>);

impl Type {
    fn new(kind: u8, size: Option<u32>, sign: u8) -> Type {
        Type(Rc::new(RefCell::new(TypeCell {
            kind,
            size,
            sign,
            parent: None,
        })))
    }

    pub fn any() -> Type {
        Type::new(K_ANY, None, ANY_SIGN)
    }

    pub fn intish() -> Type {
        Type::new(K_INT, None, ANY_SIGN)
    }

    pub fn intptr() -> Type {
        Type::new(K_INTPTR, None, ANY_SIGN)
    }

    pub fn ptr() -> Type {
        Type::new(K_PTR, Some(32), ANY_SIGN)
    }

    pub fn f32() -> Type {
        Type::new(K_FLOAT, Some(32), ANY_SIGN)
    }

    pub fn f64() -> Type {
        Type::new(K_FLOAT, Some(64), ANY_SIGN)
    }

    pub fn s32() -> Type {
        Type::new(K_INT, Some(32), SIGNED)
    }

    pub fn u32() -> Type {
        Type::new(K_INT, Some(32), UNSIGNED)
    }

    pub fn u64() -> Type {
        Type::new(K_INT, Some(64), UNSIGNED)
    }

    pub fn of_size(size: u32) -> Type {
        Type::new(K_ANY, Some(size), ANY_SIGN)
    }

    pub fn bool() -> Type {
        Type::intish()
    }

    /// Find the representative of this term's union-find class, compressing
    /// the path along the way. Compression only rewrites parent links, never
    /// cell contents, so it is invisible to everything but `unify`.
    pub fn representative(&self) -> Type {
        let parent = self.0.borrow().parent.clone();
        match parent {
            None => self.clone(),
            Some(p) => {
                let rep = p.representative();
                self.0.borrow_mut().parent = Some(rep.clone());
                rep
            }
        }
    }

    /// Try to set this type equal to another. Returns true on success; once
    /// set equal the two terms stay equal forever. The join narrows both
    /// masks and rejects an empty result, clears FLOAT for sizes 8/16 and
    /// PTR for sizes 8/16/64, and forces size 32 when only PTR remains.
    pub fn unify(&self, other: &Type) -> bool {
        let x = self.representative();
        let y = other.representative();
        if Rc::ptr_eq(&x.0, &y.0) {
            return true;
        }
        let (x_kind, x_size, x_sign) = {
            let cell = x.0.borrow();
            (cell.kind, cell.size, cell.sign)
        };
        let (y_kind, y_size, y_sign) = {
            let cell = y.0.borrow();
            (cell.kind, cell.size, cell.sign)
        };
        if let (Some(a), Some(b)) = (x_size, y_size)
            && a != b
        {
            return false;
        }
        let mut size = x_size.or(y_size);
        let mut kind = x_kind & y_kind;
        let sign = x_sign & y_sign;
        if matches!(size, Some(8) | Some(16)) {
            kind &= !K_FLOAT;
        }
        if matches!(size, Some(8) | Some(16) | Some(64)) {
            kind &= !K_PTR;
        }
        if kind == 0 || sign == 0 {
            return false;
        }
        if kind == K_PTR {
            size = Some(32);
        }
        {
            let mut cell = x.0.borrow_mut();
            cell.kind = kind;
            cell.size = size;
            cell.sign = sign;
        }
        y.0.borrow_mut().parent = Some(x);
        true
    }

    pub fn is_float(&self) -> bool {
        self.representative().0.borrow().kind == K_FLOAT
    }

    pub fn is_pointer(&self) -> bool {
        self.representative().0.borrow().kind == K_PTR
    }

    pub fn is_unsigned(&self) -> bool {
        self.representative().0.borrow().sign == UNSIGNED
    }

    /// The size in bits, defaulting to 32 where no size has been inferred.
    pub fn size(&self) -> u32 {
        self.representative().0.borrow().size.unwrap_or(32)
    }

    /// The form used in variable declarations: `?` types and integer types
    /// get a trailing space, pointer types do not.
    pub fn to_decl(&self) -> String {
        let ret = self.to_string();
        if ret.ends_with('*') { ret } else { ret + " " }
    }
}

impl Display for Type {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let rep = self.representative();
        let cell = rep.0.borrow();
        let size = cell.size.unwrap_or(32);
        match cell.kind {
            K_PTR => write!(f, "void *"),
            K_FLOAT => write!(f, "f{size}"),
            K_INT => {
                let sign = if cell.sign & SIGNED != 0 { 's' } else { 'u' };
                write!(f, "{sign}{size}")
            }
            _ => match cell.size {
                Some(size) => write!(f, "?{size}"),
                None => write!(f, "?"),
            },
        }
    }
}

impl std::fmt::Debug for Type {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let rep = self.representative();
        let cell = rep.0.borrow();
        let mut tag = String::new();
        if cell.sign & SIGNED != 0 {
            tag.push('+');
        }
        if cell.sign & UNSIGNED != 0 {
            tag.push('-');
        }
        if cell.kind & K_INT != 0 {
            tag.push('I');
        }
        if cell.kind & K_PTR != 0 {
            tag.push('P');
        }
        if cell.kind & K_FLOAT != 0 {
            tag.push('F');
        }
        match cell.size {
            Some(size) => write!(f, "Type({tag}{size})"),
            None => write!(f, "Type({tag}?)"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unify_narrows_and_sticks() {
        let a = Type::any();
        let b = Type::intish();
        assert!(a.unify(&b));
        assert_eq!(a.to_string(), "?");
        assert!(a.unify(&Type::u32()));
        assert_eq!(a.to_string(), "u32");
        assert_eq!(b.to_string(), "u32");
        // A concrete integer can no longer become a float.
        assert!(!b.unify(&Type::f32()));
        assert_eq!(a.to_string(), "u32");
    }

    #[test]
    fn unify_rejects_size_conflicts() {
        let a = Type::of_size(8);
        assert!(!a.unify(&Type::of_size(16)));
        assert!(!a.unify(&Type::f32()));
        // Sizes 8/16 cannot be floats or pointers.
        assert_eq!(a.to_string(), "?8");
        assert!(a.unify(&Type::intish()));
        assert_eq!(a.to_string(), "s8");
    }

    #[test]
    fn pointer_kind_forces_size() {
        let a = Type::intptr();
        let b = Type::ptr();
        assert!(a.unify(&b));
        assert_eq!(a.to_string(), "void *");
        assert_eq!(a.size(), 32);
    }

    #[test]
    fn representative_is_idempotent() {
        let a = Type::any();
        let b = Type::any();
        let c = Type::any();
        assert!(a.unify(&b));
        assert!(b.unify(&c));
        let rep = c.representative();
        assert!(Rc::ptr_eq(&rep.0, &rep.representative().0));
        assert!(Rc::ptr_eq(&a.representative().0, &c.representative().0));
    }

    #[test]
    fn kind_masks_only_shrink() {
        let a = Type::any();
        assert!(a.unify(&Type::intptr()));
        assert!(a.unify(&Type::u64()));
        // PTR was cleared by the 64-bit size; the sign stuck.
        assert_eq!(a.to_string(), "u64");
        assert!(!a.unify(&Type::ptr()));
    }
}

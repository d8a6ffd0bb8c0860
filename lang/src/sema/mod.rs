pub mod infer;

use crate::{
    errors::{Error, ErrorsRef, Severity},
    runtime::{pattern::RewriteCalls, Context},
    syntax::tree::{Kind, Tree, TreeId, TreeRef, TreePosition, NOWHERE},
};
use std::{cell::Cell, cell::RefCell, collections::HashMap, rc::Rc};

/// The type names known to every session. Types are trees; these singletons
/// give unification stable identities to compare against.
pub struct Primitives {
    pub integer_type: TreeRef,
    pub real_type: TreeRef,
    pub text_type: TreeRef,
    pub boolean_type: TreeRef,
    pub name_type: TreeRef,
    pub block_type: TreeRef,
    pub infix_type: TreeRef,
    pub prefix_type: TreeRef,
    pub postfix_type: TreeRef,
    pub tree_type: TreeRef,
    pub declaration_type: TreeRef,
    pub true_name: TreeRef,
    pub false_name: TreeRef,
}

impl Primitives {
    pub fn new() -> Rc<Primitives> {
        let name = |n: &str| Tree::name(n, NOWHERE);
        Rc::new(Primitives {
            integer_type: name("integer"),
            real_type: name("real"),
            text_type: name("text"),
            boolean_type: name("boolean"),
            name_type: name("name"),
            block_type: name("block"),
            infix_type: name("infix"),
            prefix_type: name("prefix"),
            postfix_type: name("postfix"),
            tree_type: name("tree"),
            declaration_type: name("declaration"),
            true_name: name("true"),
            false_name: name("false"),
        })
    }

    /// Resolve a user-written type name to its singleton.
    pub fn lookup_type_name(&self, ty: &TreeRef) -> TreeRef {
        match ty.as_name() {
            Some("integer") => self.integer_type.clone(),
            Some("real") => self.real_type.clone(),
            Some("text") => self.text_type.clone(),
            Some("boolean") => self.boolean_type.clone(),
            Some("name") => self.name_type.clone(),
            Some("block") => self.block_type.clone(),
            Some("infix") => self.infix_type.clone(),
            Some("prefix") => self.prefix_type.clone(),
            Some("postfix") => self.postfix_type.clone(),
            Some("tree") => self.tree_type.clone(),
            _ => ty.clone(),
        }
    }

    /// The tree kind checked at run time for a given type name, when the
    /// static type could not decide.
    pub fn type_kind(&self, ty: &TreeRef) -> Option<Kind> {
        if Rc::ptr_eq(ty, &self.integer_type) {
            Some(Kind::Integer)
        } else if Rc::ptr_eq(ty, &self.real_type) {
            Some(Kind::Real)
        } else if Rc::ptr_eq(ty, &self.text_type) {
            Some(Kind::Text)
        } else if Rc::ptr_eq(ty, &self.name_type) || Rc::ptr_eq(ty, &self.boolean_type) {
            Some(Kind::Name)
        } else if Rc::ptr_eq(ty, &self.block_type) {
            Some(Kind::Block)
        } else if Rc::ptr_eq(ty, &self.infix_type) {
            Some(Kind::Infix)
        } else if Rc::ptr_eq(ty, &self.prefix_type) {
            Some(Kind::Prefix)
        } else if Rc::ptr_eq(ty, &self.postfix_type) {
            Some(Kind::Postfix)
        } else {
            None
        }
    }

    /// The type of a constant is the constant itself; other leaves get
    /// their kind type.
    pub fn canonical_type(&self, value: &TreeRef) -> TreeRef {
        match value.kind() {
            Kind::Integer | Kind::Real | Kind::Text => value.clone(),
            Kind::Name => {
                if value.is_name("true") || value.is_name("false") {
                    self.boolean_type.clone()
                } else {
                    self.name_type.clone()
                }
            }
            Kind::Block => self.block_type.clone(),
            Kind::Infix => self.infix_type.clone(),
            Kind::Prefix => self.prefix_type.clone(),
            Kind::Postfix => self.postfix_type.clone(),
        }
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
pub enum UnifyMode {
    Standard,
    Declaration,
}

/// Hindley-Milner-style inference over trees. `types` maps an expression to
/// its type, `unifications` is the union-find over types; generated generic
/// type names start with '#'.
#[derive(Clone)]
pub struct Types {
    pub context: Context,
    pub prims: Rc<Primitives>,
    types: HashMap<TreeId, TreeRef>,
    unifications: HashMap<TreeId, TreeRef>,
    rcalls: HashMap<TreeId, Rc<RefCell<RewriteCalls>>>,
    pub prototyping: bool,
    pub matching: bool,
    counter: Rc<Cell<u64>>,
}

impl Types {
    pub fn new(scope: &TreeRef, prims: Rc<Primitives>, errors: ErrorsRef) -> Types {
        Types {
            context: Context::with_scope(scope.clone(), errors),
            prims,
            types: HashMap::new(),
            unifications: HashMap::new(),
            rcalls: HashMap::new(),
            prototyping: false,
            matching: false,
            counter: Rc::new(Cell::new(0)),
        }
    }

    /// A child inference sharing everything seen so far, with its own scope
    /// for parameter bindings. Used per rewrite candidate.
    pub fn nested(parent: &Types, scope: &TreeRef) -> Types {
        let mut child = parent.clone();
        child.context = Context::with_scope(scope.clone(), parent.context.errors.clone());
        child.context.create_scope();
        child.prototyping = false;
        child.matching = false;
        child
    }

    pub fn new_type_name(&mut self, pos: TreePosition) -> TreeRef {
        let id = self.counter.get() + 1;
        self.counter.set(id);
        Tree::name(&format!("#{}", id), pos)
    }

    pub fn is_generic(ty: &TreeRef) -> bool {
        matches!(ty.as_name(), Some(n) if n.starts_with('#'))
    }

    pub fn is_type_name(ty: &TreeRef) -> bool {
        matches!(ty.as_name(), Some(n) if !n.starts_with('#'))
    }

    fn report(&self, error: Error) {
        self.context.errors.borrow_mut().log(error);
    }

    /// The canonical representative for a type, with path compression.
    pub fn base(&mut self, ty: &TreeRef) -> TreeRef {
        let start = ty.clone();
        let mut ty = ty.clone();
        while let Some(next) = self.unifications.get(&TreeId::of(&ty)) {
            ty = next.clone();
        }
        let mut chain = start;
        while !Rc::ptr_eq(&chain, &ty) {
            match self.unifications.insert(TreeId::of(&chain), ty.clone()) {
                Some(next) => chain = next,
                None => break,
            }
        }
        ty
    }

    pub fn lookup_type_name(&mut self, ty: &TreeRef) -> TreeRef {
        self.prims.lookup_type_name(ty)
    }

    /// The inferred type of an expression, computed lazily.
    pub fn type_of(&mut self, expr: &TreeRef) -> Option<TreeRef> {
        if self.types.get(&TreeId::of(expr)).is_none() {
            if expr.kind() == Kind::Name {
                if expr.is_name("true") || expr.is_name("false") {
                    let boolean = self.prims.boolean_type.clone();
                    self.assign_type(expr, Some(&boolean));
                } else {
                    self.assign_type(expr, None);
                }
            } else if !self.infer(expr) {
                self.report(
                    Error::new("Unable to assign type to $1", expr.pos, Severity::Type)
                        .arg(crate::codegen::source::render(expr)),
                );
                if self.types.get(&TreeId::of(expr)).is_none() {
                    self.assign_type(expr, None);
                }
                return None;
            }
        }
        let ty = self.types.get(&TreeId::of(expr)).cloned()?;
        Some(self.base(&ty))
    }

    /// Record a type for an expression; if it already has one, unify them.
    pub fn assign_type(&mut self, expr: &TreeRef, ty: Option<&TreeRef>) -> bool {
        if let Some(existing) = self.types.get(&TreeId::of(expr)).cloned() {
            return match ty {
                None => true,
                Some(ty) if Rc::ptr_eq(&existing, ty) => true,
                Some(ty) => self.unify(&existing, ty, UnifyMode::Standard),
            };
        }
        let ty = match ty {
            Some(ty) => ty.clone(),
            None => self.new_type_name(expr.pos),
        };
        self.types.insert(TreeId::of(expr), ty);
        true
    }

    /// Indicate that two expressions must have the same type.
    pub fn unify_expression_types(&mut self, expr1: &TreeRef, expr2: &TreeRef) -> bool {
        let t1 = match self.type_of(expr1) {
            Some(t) => t,
            None => return false,
        };
        let t2 = match self.type_of(expr2) {
            Some(t) => t,
            None => return false,
        };
        if Rc::ptr_eq(&t1, &t2) {
            return true;
        }
        self.unify(&t1, &t2, UnifyMode::Standard)
    }

    /// Standard algorithm-W unification over type trees.
    pub fn unify(&mut self, t1: &TreeRef, t2: &TreeRef, mode: UnifyMode) -> bool {
        let t1 = self.base(t1);
        let t2 = self.base(t2);
        if Rc::ptr_eq(&t1, &t2) {
            return true;
        }

        // Strip blocks in type specifications
        if let Some((child, _, _)) = t1.as_block() {
            return self.unify(&child, &t2, mode) && self.join(&t1, &t2, false);
        }
        if let Some((child, _, _)) = t2.as_block() {
            return self.unify(&t1, &child, mode) && self.join(&t1, &t2, false);
        }

        // Resolve type names to their reference trees
        let t1 = self.lookup_type_name(&t1);
        let t2 = self.lookup_type_name(&t2);
        if Rc::ptr_eq(&t1, &t2) {
            return true;
        }

        // If either is a generic, unify with the other
        if Types::is_generic(&t1) || Types::is_generic(&t2) {
            return self.join(&t1, &t2, false);
        }

        // The universal tree type matches any kind; the match is then
        // checked at run time
        let tree_type = self.prims.tree_type.clone();
        if Rc::ptr_eq(&t1, &tree_type) || Rc::ptr_eq(&t2, &tree_type) {
            return true;
        }

        // The same type name written in two places unifies
        if let (Some(a), Some(b)) = (t1.as_name(), t2.as_name()) {
            if a == b {
                return self.join(&t1, &t2, false);
            }
        }

        // In declaration mode, success when the declared type covers
        if mode == UnifyMode::Declaration && self.type_covers(&t2, &t1) {
            return true;
        }

        // Two literal types match when their values do
        if t1.is_constant() && t2.is_constant() {
            if Tree::equal(&t1, &t2) {
                return self.join(&t1, &t2, false);
            }
            return self.type_error(&t1, &t2);
        }

        if Types::is_type_name(&t1) {
            if self.join_constant(&t1, &t2) {
                return true;
            }
            return self.type_error(&t1, &t2);
        }
        if Types::is_type_name(&t2) {
            if self.join_constant(&t2, &t1) {
                return true;
            }
            return self.type_error(&t1, &t2);
        }

        self.type_error(&t1, &t2)
    }

    fn type_covers(&mut self, wider: &TreeRef, narrower: &TreeRef) -> bool {
        if Rc::ptr_eq(wider, narrower) {
            return true;
        }
        if Rc::ptr_eq(wider, &self.prims.tree_type.clone()) {
            return true;
        }
        match (wider.as_name(), narrower.as_name()) {
            (Some(a), Some(b)) => a == b,
            _ => false,
        }
    }

    fn occurs(haystack: &TreeRef, needle: &TreeRef) -> bool {
        if Rc::ptr_eq(haystack, needle) {
            return true;
        }
        match haystack.kind() {
            Kind::Block => Types::occurs(&haystack.as_block().unwrap().0, needle),
            Kind::Prefix | Kind::Postfix | Kind::Infix => {
                Types::occurs(&haystack.left().unwrap(), needle)
                    || Types::occurs(&haystack.right().unwrap(), needle)
            }
            _ => false,
        }
    }

    /// Use 'base' as the canonical representative for 'other'.
    pub fn join(&mut self, base: &TreeRef, other: &TreeRef, known_good: bool) -> bool {
        let mut base = base.clone();
        let mut other = other.clone();
        if !known_good {
            // Prefer real type names over generated ones as representative
            if Types::is_type_name(&other) && !Types::is_type_name(&base) {
                std::mem::swap(&mut base, &mut other);
            } else if Types::is_generic(&base) {
                std::mem::swap(&mut base, &mut other);
            }
        }
        let base = self.base(&base);
        let other = self.base(&other);
        if !Rc::ptr_eq(&base, &other) {
            // Occurs check: a variable cannot be joined inside itself
            if Types::occurs(&base, &other) {
                return self.type_error(&base, &other);
            }
            self.unifications.insert(TreeId::of(&other), base);
        }
        true
    }

    /// Join a type name with a constant or another name.
    fn join_constant(&mut self, type_name: &TreeRef, cst: &TreeRef) -> bool {
        let prims = self.prims.clone();
        match cst.kind() {
            Kind::Integer => {
                if Rc::ptr_eq(type_name, &prims.integer_type) {
                    return self.join(type_name, cst, true);
                }
                self.unify(&prims.integer_type, type_name, UnifyMode::Standard)
                    && self.join(cst, &prims.integer_type, false)
            }
            Kind::Real => {
                if Rc::ptr_eq(type_name, &prims.real_type) {
                    return self.join(type_name, cst, true);
                }
                self.unify(&prims.real_type, type_name, UnifyMode::Standard)
                    && self.join(cst, &prims.real_type, false)
            }
            Kind::Text => {
                if Rc::ptr_eq(type_name, &prims.text_type) {
                    return self.join(type_name, cst, true);
                }
                self.unify(&prims.text_type, type_name, UnifyMode::Standard)
                    && self.join(cst, &prims.text_type, false)
            }
            _ => {
                let canon = prims.canonical_type(cst);
                Rc::ptr_eq(type_name, &canon)
            }
        }
    }

    fn type_error(&mut self, t1: &TreeRef, t2: &TreeRef) -> bool {
        self.report(
            Error::new("Unable to unify $1 with $2", t1.pos, Severity::Type)
                .arg(crate::codegen::source::render(t1))
                .arg(crate::codegen::source::render(t2)),
        );
        false
    }

    pub fn has_rewrite_calls(&self, what: &TreeRef) -> Option<Rc<RefCell<RewriteCalls>>> {
        self.rcalls.get(&TreeId::of(what)).cloned()
    }

    pub fn record_calls(&mut self, what: &TreeRef, calls: Rc<RefCell<RewriteCalls>>) {
        self.rcalls.insert(TreeId::of(what), calls);
    }

    /// Enumerate and check the rewrite candidates for an expression. The
    /// in-progress entry in the map is the recursion guard for recursive
    /// rules.
    pub fn rewrite_calls_for(&mut self, what: &TreeRef) -> Rc<RefCell<RewriteCalls>> {
        if let Some(rc) = self.rcalls.get(&TreeId::of(what)) {
            return rc.clone();
        }
        let rc = Rc::new(RefCell::new(RewriteCalls::new()));
        self.rcalls.insert(TreeId::of(what), rc.clone());
        let context = self.context.clone();
        context.lookup(what, true, &mut |scope, decl| {
            crate::runtime::pattern::check_candidate(self, scope, what, decl, &rc)
        });
        rc
    }

    /// Infer by evaluation: find candidates and take the union of their
    /// return types.
    pub fn evaluate(&mut self, what: &TreeRef) -> bool {
        // We don't evaluate expressions while prototyping a pattern
        if self.prototyping {
            return true;
        }
        let matching = std::mem::replace(&mut self.matching, false);

        // Look directly inside blocks
        let mut what = what.clone();
        while let Some(child) = what.block_child() {
            what = child;
        }

        // Already trying to evaluate this particular form
        if self.has_rewrite_calls(&what).is_some() {
            return true;
        }

        let rc = self.rewrite_calls_for(&what);
        let candidates: Vec<_> = rc.borrow().candidates.clone();
        if candidates.is_empty() {
            if what.is_constant() {
                let wtype = match self.type_of(&what) {
                    Some(t) => t,
                    None => return false,
                };
                return self.unify(&wtype, &what, UnifyMode::Standard);
            }
            if matching && !what.is_leaf() {
                return true;
            }
            self.report(
                Error::new("No form matches $1", what.pos, Severity::Lookup)
                    .arg(crate::codegen::source::render(&what)),
            );
            return false;
        }

        // The resulting type is the union of all candidates
        let mut ty = match &candidates[0].ty {
            Some(t) => self.base(t),
            None => self.new_type_name(what.pos),
        };
        let wtype = match self.type_of(&what) {
            Some(t) => t,
            None => return false,
        };
        for candidate in candidates.iter().skip(1) {
            let ctype = match &candidate.ty {
                Some(t) => self.base(t),
                None => continue,
            };
            if Types::is_generic(&ctype) && Types::is_generic(&wtype) {
                // Joining generics instead of building a union
                if !self.join(&ctype, &ty, false) {
                    return false;
                }
                if !self.join(&wtype, &ty, false) {
                    return false;
                }
                continue;
            }
            if !Rc::ptr_eq(&ty, &ctype) && !Tree::equal(&ty, &ctype) {
                // Distinct concrete candidate types collapse to tree
                ty = self.prims.tree_type.clone();
            }
        }

        self.unify(&ty, &wtype, UnifyMode::Declaration)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::Errors;

    fn fresh() -> Types {
        let errors = Errors::new();
        let ctx = Context::new(errors.clone());
        Types::new(&ctx.symbols, Primitives::new(), errors)
    }

    #[test]
    fn generics_join_with_concrete_types() {
        let mut types = fresh();
        let g = types.new_type_name(NOWHERE);
        let integer = types.prims.integer_type.clone();
        assert!(types.unify(&g, &integer, UnifyMode::Standard));
        assert!(Rc::ptr_eq(&types.base(&g), &integer));
    }

    #[test]
    fn two_generics_share_a_root() {
        let mut types = fresh();
        let a = types.new_type_name(NOWHERE);
        let b = types.new_type_name(NOWHERE);
        assert!(types.unify(&a, &b, UnifyMode::Standard));
        assert!(Rc::ptr_eq(&types.base(&a), &types.base(&b)));
        // Joining one of them with a concrete type resolves both
        let real = types.prims.real_type.clone();
        assert!(types.unify(&a, &real, UnifyMode::Standard));
        assert!(Rc::ptr_eq(&types.base(&b), &real));
    }

    #[test]
    fn distinct_concrete_types_fail() {
        let mut types = fresh();
        let integer = types.prims.integer_type.clone();
        let real = types.prims.real_type.clone();
        assert!(!types.unify(&integer, &real, UnifyMode::Standard));
        assert!(types.context.errors.borrow().had_errors());
    }

    #[test]
    fn literal_types_join_their_type_name() {
        let mut types = fresh();
        let zero = Tree::integer(0, NOWHERE);
        let integer = types.prims.integer_type.clone();
        assert!(types.unify(&zero, &integer, UnifyMode::Standard));
    }

    #[test]
    fn constants_type_as_themselves() {
        let mut types = fresh();
        let zero = Tree::integer(0, NOWHERE);
        let ty = types.type_of(&zero).unwrap();
        assert!(Tree::equal(&ty, &zero));
    }

    #[test]
    fn tree_covers_everything_in_declarations() {
        let mut types = fresh();
        let tree = types.prims.tree_type.clone();
        let integer = types.prims.integer_type.clone();
        assert!(types.unify(&integer, &tree, UnifyMode::Declaration));
    }
}

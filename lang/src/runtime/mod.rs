use crate::{
    errors::{Error, ErrorsRef, Severity},
    syntax::tree::{Kind, Tree, TreeRef, NOWHERE},
};
use std::fmt::{self, Formatter};

pub mod builtins;
pub mod eval;
pub mod pattern;

/// Infix names structuring a symbol table. A scope is `Prefix(parent,
/// locals)`; each locals entry is `Decl \n (Left ; Right)` where the
/// children tree is walked by hash bits.
pub const REWRITE_NAME: &str = "\n";
pub const REWRITE_CHILDREN_NAME: &str = ";";

#[derive(Debug)]
pub enum RuntimeError {
    DivisionByZero,
    MissingSymbol(String),
    TypeMismatch(&'static str),
    InvalidArguments(&'static str),
}

impl fmt::Display for RuntimeError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            RuntimeError::DivisionByZero => write!(f, "Divide by zero"),
            RuntimeError::MissingSymbol(name) => {
                write!(f, "Native symbol '{}' not found", name)
            }
            RuntimeError::TypeMismatch(what) => write!(f, "Type mismatch for {}", what),
            RuntimeError::InvalidArguments(opcode) => {
                write!(f, "Invalid arguments for builtin {}", opcode)
            }
        }
    }
}

/// Follow the parent link of a scope.
pub fn scope_parent(scope: &TreeRef) -> Option<TreeRef> {
    let (left, _) = scope.as_prefix()?;
    match left.as_prefix() {
        Some(_) => Some(left),
        None => None,
    }
}

/// The locals tree of a scope.
pub fn scope_locals(scope: &TreeRef) -> Option<TreeRef> {
    scope.right()
}

/// The declaration held by a rewrite entry.
pub fn rewrite_declaration(entry: &TreeRef) -> Option<TreeRef> {
    entry.left()
}

/// The hash children of a rewrite entry.
pub fn rewrite_next(entry: &TreeRef) -> Option<TreeRef> {
    entry.right()
}

/// What a declaration defines: strip `as`/`:` types, `when` guards and the
/// outermost block from the pattern.
pub fn rewrite_defined(form: &TreeRef) -> TreeRef {
    let mut form = form.clone();
    if let Some((left, _)) = form.infix_named("as") {
        form = left;
    } else if let Some((left, _)) = form.infix_named(":") {
        form = left;
    }
    if let Some((left, _)) = form.infix_named("when") {
        form = left;
    }
    if let Some(child) = form.block_child() {
        form = child;
    }
    form
}

/// The declared return type of a pattern, if it has the `F as T` shape.
pub fn rewrite_type(form: &TreeRef) -> Option<TreeRef> {
    form.infix_named("as").map(|(_, ty)| ty)
}

/// A declaration whose body is its own pattern, as `data` creates. Such a
/// form is inert: it matches structurally and evaluates to itself.
pub fn is_self_definition(decl: &TreeRef) -> bool {
    match decl.as_infix() {
        Some((_, left, right)) => std::rc::Rc::ptr_eq(&left, &right),
        None => false,
    }
}

/// Check whether a tree mentions a name, as `N * 2` mentions `N`.
pub fn references_name(tree: &TreeRef, name: &str) -> bool {
    match tree.kind() {
        Kind::Name => tree.is_name(name),
        Kind::Block => references_name(&tree.as_block().unwrap().0, name),
        Kind::Prefix | Kind::Postfix | Kind::Infix => {
            references_name(&tree.left().unwrap(), name)
                || references_name(&tree.right().unwrap(), name)
        }
        _ => false,
    }
}

/// A declaration like `N is N * 2` whose pattern is a name used by the
/// body generalizes literal rewrites: it applies to constants of any kind.
/// A plain definition such as `x is 3` does not.
pub fn is_generalized_literal(decl: &TreeRef) -> bool {
    if is_self_definition(decl) {
        return false;
    }
    match decl.infix_named("is") {
        Some((from, to)) => {
            // A closure body is a captured value, not a rule
            if to.has_closure_info() {
                return false;
            }
            let defined = rewrite_defined(&from);
            match defined.as_name() {
                Some(name) => references_name(&to, name),
                None => false,
            }
        }
        None => false,
    }
}

/// Check that pattern variables are names, reporting otherwise.
fn validate_names(form: &TreeRef, errors: &ErrorsRef) {
    match form.kind() {
        Kind::Integer | Kind::Real | Kind::Text => (),
        Kind::Name => {
            let bad = form
                .as_name()
                .map(|n| !n.is_empty() && !n.chars().next().unwrap().is_alphabetic())
                .unwrap_or(false);
            if bad {
                errors.borrow_mut().log(
                    Error::new("The pattern variable $1 is not a name", form.pos, Severity::Parse)
                        .arg(form.as_name().unwrap_or("")),
                );
            }
        }
        Kind::Infix => {
            let (_, left, right) = form.as_infix().unwrap();
            validate_names(&left, errors);
            validate_names(&right, errors);
        }
        Kind::Prefix => {
            let (left, right) = form.as_prefix().unwrap();
            if left.kind() != Kind::Name {
                validate_names(&left, errors);
            }
            validate_names(&right, errors);
        }
        Kind::Postfix => {
            let (left, right) = form.as_postfix().unwrap();
            if right.kind() != Kind::Name {
                validate_names(&right, errors);
            }
            validate_names(&left, errors);
        }
        Kind::Block => {
            let (child, _, _) = form.as_block().unwrap();
            validate_names(&child, errors);
        }
    }
}

/// Where a symbol-table walk may write a new entry.
enum Slot {
    ScopeLocals(TreeRef),
    ChildLeft(TreeRef),
    ChildRight(TreeRef),
}

impl Slot {
    fn get(&self) -> TreeRef {
        match self {
            Slot::ScopeLocals(scope) => scope.right().unwrap(),
            Slot::ChildLeft(children) => children.left().unwrap(),
            Slot::ChildRight(children) => children.right().unwrap(),
        }
    }

    fn set(&self, tree: TreeRef) {
        match self {
            Slot::ScopeLocals(scope) => scope.set_right(tree),
            Slot::ChildLeft(children) => children.set_left(tree),
            Slot::ChildRight(children) => children.set_right(tree),
        }
    }
}

/// Evaluation context: a handle on the current scope tree with the helpers
/// to declare and look up rewrites.
#[derive(Clone)]
pub struct Context {
    pub symbols: TreeRef,
    pub errors: ErrorsRef,
}

impl Context {
    pub fn new(errors: ErrorsRef) -> Context {
        let scope = Tree::prefix(Tree::name("", NOWHERE), Tree::name("", NOWHERE), NOWHERE);
        Context {
            symbols: scope,
            errors,
        }
    }

    pub fn with_scope(scope: TreeRef, errors: ErrorsRef) -> Context {
        Context {
            symbols: scope,
            errors,
        }
    }

    pub fn create_scope(&mut self) {
        self.symbols = Tree::prefix(
            self.symbols.clone(),
            Tree::name("", NOWHERE),
            NOWHERE,
        );
    }

    pub fn pop_scope(&mut self) {
        if let Some(parent) = scope_parent(&self.symbols) {
            self.symbols = parent;
        }
    }

    pub fn parent(&self) -> Option<Context> {
        scope_parent(&self.symbols).map(|scope| Context::with_scope(scope, self.errors.clone()))
    }

    fn root_scope(&self) -> TreeRef {
        let mut scope = self.symbols.clone();
        while let Some(parent) = scope_parent(&scope) {
            scope = parent;
        }
        scope
    }

    /// True if some rewrite in the session may apply to the given kind.
    pub fn has_rewrites_for(&self, kind: Kind) -> bool {
        self.root_scope().rewrite_kinds() & (1 << kind as u32) != 0
    }

    pub fn is_empty(&self) -> bool {
        scope_locals(&self.symbols)
            .map(|locals| locals.is_nil())
            .unwrap_or(true)
    }

    /// Walk the statements of a tree, entering every `is` declaration and
    /// `data` form. Returns true when instructions remain to evaluate.
    pub fn process_declarations(&self, tree: &TreeRef) -> bool {
        let mut what = Some(tree.clone());
        let mut result = false;

        while let Some(tree) = what.take() {
            let mut is_instruction = true;
            if let Some((name, left, right)) = tree.as_infix() {
                if name == "is" {
                    self.enter(&tree, false);
                    is_instruction = false;
                } else if name == "\n" || name == ";" {
                    // Chain of declarations, avoiding recursion where we can
                    if let Some((lname, _, _)) = left.as_infix() {
                        is_instruction = false;
                        if lname == "is" {
                            self.enter(&left, false);
                        } else {
                            is_instruction = self.process_declarations(&left);
                        }
                    } else if left.as_prefix().is_some() {
                        is_instruction = self.process_declarations(&left);
                    }
                    what = Some(right);
                }
            } else if let Some((left, right)) = tree.as_prefix() {
                if left.is_name("data") {
                    // A data form evaluates to itself
                    self.define(&right, &right, false);
                    is_instruction = false;
                }
            }
            result |= is_instruction;
        }
        result
    }

    pub fn define(&self, form: &TreeRef, value: &TreeRef, overwrite: bool) -> Option<TreeRef> {
        let decl = Tree::infix("is", form.clone(), value.clone(), form.pos);
        self.enter(&decl, overwrite)
    }

    pub fn define_name(&self, name: &str, value: &TreeRef, overwrite: bool) -> Option<TreeRef> {
        self.define(&Tree::name(name, value.pos), value, overwrite)
    }

    /// Enter a declaration in the locals of the current scope, walking the
    /// hash children tree until a free slot.
    pub fn enter(&self, rewrite: &TreeRef, overwrite: bool) -> Option<TreeRef> {
        let (from, _to) = rewrite.infix_named("is")?;

        let defined = rewrite_defined(&from);
        let name = defined.as_name().map(str::to_owned);
        let mut h = hash(&defined);

        // A name rule whose body uses the name generalizes literal
        // rewrites, so constants of any kind may now need a lookup
        let root = self.root_scope();
        root.add_rewrite_kind(defined.kind());
        if is_generalized_literal(rewrite) {
            root.add_rewrite_kind(Kind::Integer);
            root.add_rewrite_kind(Kind::Real);
            root.add_rewrite_kind(Kind::Text);
        }
        validate_names(&from, &self.errors);

        let mut slot = Slot::ScopeLocals(self.symbols.clone());
        loop {
            let current = slot.get();
            if current.is_nil() {
                let children = Tree::infix(
                    REWRITE_CHILDREN_NAME,
                    Tree::name("", NOWHERE),
                    Tree::name("", NOWHERE),
                    rewrite.pos,
                );
                let entry =
                    Tree::infix(REWRITE_NAME, rewrite.clone(), children, rewrite.pos);
                slot.set(entry.clone());
                return Some(entry);
            }

            // This is a rewrite entry, follow it
            let decl = rewrite_declaration(&current)?;
            if let Some(name) = &name {
                let (decl_from, _) = decl.infix_named("is")?;
                let decl_defined = rewrite_defined(&decl_from);
                if decl_defined.is_name(name) {
                    if overwrite {
                        decl.set_right(rewrite.right().unwrap());
                        return Some(current);
                    }
                    self.errors.borrow_mut().log(
                        Error::new("Name $1 is redefined", rewrite.pos, Severity::Parse).arg(name),
                    );
                }
            }

            let children = rewrite_next(&current)?;
            slot = if h & 1 != 0 {
                Slot::ChildRight(children)
            } else {
                Slot::ChildLeft(children)
            };
            h = rehash(h);
        }
    }

    /// Generic lookup: invoke the callback for every declaration whose hash
    /// bucket matches the expression, innermost scope first, and stop at the
    /// first non-None answer. Declarations defining a plain name also apply
    /// to constants, so the locals tree is scanned in declaration order with
    /// the hash as a per-entry filter.
    pub fn lookup(
        &self,
        what: &TreeRef,
        recurse: bool,
        callback: &mut dyn FnMut(&TreeRef, &TreeRef) -> Option<TreeRef>,
    ) -> Option<TreeRef> {
        let h0 = hash(what);
        let mut scope = Some(self.symbols.clone());

        while let Some(current_scope) = scope {
            let locals = scope_locals(&current_scope)?;
            if let Some(found) = self.lookup_locals(&locals, what, h0, &current_scope, callback) {
                return Some(found);
            }
            if !recurse {
                break;
            }
            scope = scope_parent(&current_scope);
        }
        None
    }

    fn lookup_locals(
        &self,
        entry: &TreeRef,
        what: &TreeRef,
        h0: u64,
        scope: &TreeRef,
        callback: &mut dyn FnMut(&TreeRef, &TreeRef) -> Option<TreeRef>,
    ) -> Option<TreeRef> {
        if entry.is_nil() {
            return None;
        }
        let decl = rewrite_declaration(entry)?;
        let children = rewrite_next(entry)?;

        if let Some((decl_from, _)) = decl.infix_named("is") {
            let defined = rewrite_defined(&decl_from);
            let catch_all = what.is_constant() && is_generalized_literal(&decl);
            if hash(&defined) == h0 || catch_all {
                if let Some(found) = callback(scope, &decl) {
                    return Some(found);
                }
            }
        }

        if let Some(left) = children.left() {
            if let Some(found) = self.lookup_locals(&left, what, h0, scope, callback) {
                return Some(found);
            }
        }
        if let Some(right) = children.right() {
            if let Some(found) = self.lookup_locals(&right, what, h0, scope, callback) {
                return Some(found);
            }
        }
        None
    }

    /// Find the declaration matching a form.
    pub fn reference(&self, form: &TreeRef) -> Option<TreeRef> {
        self.lookup(form, true, &mut |_, decl| {
            let (decl_from, _) = decl.infix_named("is")?;
            if form.is_leaf() && !Tree::equal(form, &rewrite_defined(&decl_from)) {
                return None;
            }
            Some(decl.clone())
        })
    }

    /// The value bound to a leaf form, if any.
    pub fn bound(&self, form: &TreeRef, recurse: bool) -> Option<TreeRef> {
        self.lookup(form, recurse, &mut |_, decl| {
            let (decl_from, decl_to) = decl.infix_named("is")?;
            if form.is_leaf() && !Tree::equal(form, &rewrite_defined(&decl_from)) {
                return None;
            }
            Some(decl_to)
        })
    }

    /// The value bound to a leaf form along with its declaration and scope.
    pub fn bound_with(
        &self,
        form: &TreeRef,
        recurse: bool,
    ) -> Option<(TreeRef, TreeRef, TreeRef)> {
        let mut decl_info = None;
        let value = self.lookup(form, recurse, &mut |scope, decl| {
            let (decl_from, decl_to) = decl.infix_named("is")?;
            if form.is_leaf() && !Tree::equal(form, &rewrite_defined(&decl_from)) {
                return None;
            }
            decl_info = Some((scope.clone(), decl.clone()));
            Some(decl_to)
        })?;
        let (scope, decl) = decl_info?;
        Some((value, decl, scope))
    }

    pub fn named(&self, name: &str, recurse: bool) -> Option<TreeRef> {
        self.bound(&Tree::name(name, NOWHERE), recurse)
    }

    /// Assign into an existing declaration, or create one. The assigned
    /// value is returned; a typed declaration keeps its old value when the
    /// new one does not match the declared type.
    pub fn assign(&self, target: &TreeRef, value: &TreeRef) -> TreeRef {
        match self.reference(target) {
            None => {
                // The reference does not exist yet: create it
                let mut form = target.clone();
                if let Some((child, _, _)) = form.as_block() {
                    form = child;
                }
                // 'X:integer := 3' declares 'X as integer'
                if let Some((left, right)) = form.infix_named(":") {
                    form = Tree::infix("as", left, right, form.pos);
                }
                self.define(&form, value, false);
                value.clone()
            }
            Some(decl) => {
                let (decl_from, decl_to) = match decl.infix_named("is") {
                    Some(found) => found,
                    None => return value.clone(),
                };
                if let Some((_, declared)) = decl_from.infix_named("as") {
                    if !value_matches_type_name(value, &declared) {
                        self.errors.borrow_mut().log(
                            Error::new(
                                "New value $1 does not match existing type $2",
                                value.pos,
                                Severity::Type,
                            )
                            .arg(crate::codegen::source::render(value))
                            .arg(crate::codegen::source::render(&declared)),
                        );
                        return decl_to;
                    }
                }
                decl.set_right(value.clone());
                value.clone()
            }
        }
    }

    /// Dump the scope chain for debugging.
    pub fn dump(&self) -> String {
        let mut out = String::new();
        let mut scope = Some(self.symbols.clone());
        let mut depth = 0;
        while let Some(current) = scope {
            out.push_str(&format!("// Scope {}\n", depth));
            if let Some(locals) = scope_locals(&current) {
                dump_rewrites(&locals, &mut out);
            }
            depth += 1;
            scope = scope_parent(&current);
        }
        out
    }
}

fn dump_rewrites(entry: &TreeRef, out: &mut String) {
    if entry.is_nil() {
        return;
    }
    if let Some(decl) = rewrite_declaration(entry) {
        if let Some((from, to)) = decl.infix_named("is") {
            out.push_str(&format!(
                "{} is {}\n",
                crate::codegen::source::render(&from),
                crate::codegen::source::render(&to)
            ));
        }
    }
    if let Some(children) = rewrite_next(entry) {
        if let Some(left) = children.left() {
            dump_rewrites(&left, out);
        }
        if let Some(right) = children.right() {
            dump_rewrites(&right, out);
        }
    }
}

/// Check a value kind against a declared type name; unknown type names
/// accept anything, like the universal tree type.
pub fn value_matches_type_name(value: &TreeRef, ty: &TreeRef) -> bool {
    match ty.as_name() {
        Some("integer") => value.kind() == Kind::Integer,
        Some("real") => value.kind() == Kind::Real,
        Some("text") => value.kind() == Kind::Text,
        Some("boolean") => value.is_name("true") || value.is_name("false"),
        Some("name") => value.kind() == Kind::Name,
        Some("block") => value.kind() == Kind::Block,
        Some("infix") => value.kind() == Kind::Infix,
        Some("prefix") => value.kind() == Kind::Prefix,
        Some("postfix") => value.kind() == Kind::Postfix,
        _ => true,
    }
}

fn hash_text(text: &str) -> u64 {
    let mut h: u64 = 0;
    for byte in text.bytes().take(8) {
        h = h.wrapping_mul(0x301) ^ byte as u64;
    }
    h
}

/// Structural hash keyed on the defined name of a form, shared between
/// `enter` and `lookup` so both walk the same path.
pub fn hash(tree: &TreeRef) -> u64 {
    let kind = tree.kind();
    let mut h: u64 = 0xC0DEDu64.wrapping_add(0x29912837u64.wrapping_mul(kind as u64));

    match kind {
        Kind::Integer => h = h.wrapping_add(tree.as_integer().unwrap() as u64),
        Kind::Real => h = h.wrapping_add(tree.as_real().unwrap().to_bits()),
        Kind::Text => h = h.wrapping_add(hash_text(tree.as_text().unwrap())),
        Kind::Name => h = h.wrapping_add(hash_text(tree.as_name().unwrap())),
        Kind::Block => {
            if let Some((_, opening, _)) = tree.as_block() {
                h = h.wrapping_add(hash_text(opening));
            }
        }
        Kind::Infix => {
            if let Some((name, _, _)) = tree.as_infix() {
                h = h.wrapping_add(hash_text(name));
            }
        }
        Kind::Prefix => {
            if let Some(name) = tree.left().and_then(|l| l.as_name().map(str::to_owned)) {
                h = h.wrapping_add(hash_text(&name));
            }
        }
        Kind::Postfix => {
            if let Some(name) = tree.right().and_then(|r| r.as_name().map(str::to_owned)) {
                h = h.wrapping_add(hash_text(&name));
            }
        }
    }
    h
}

/// Rotate the hash so each level of the children tree uses a fresh bit.
pub fn rehash(h: u64) -> u64 {
    h.rotate_right(1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::Errors;

    fn name(n: &str) -> TreeRef {
        Tree::name(n, NOWHERE)
    }

    #[test]
    fn enter_then_bound_finds_the_value() {
        let ctx = Context::new(Errors::new());
        ctx.define(&name("x"), &Tree::integer(42, NOWHERE), false);
        let bound = ctx.bound(&name("x"), true).unwrap();
        assert_eq!(bound.as_integer(), Some(42));
        assert!(ctx.bound(&name("y"), true).is_none());
    }

    #[test]
    fn inner_scopes_shadow_outer_ones() {
        let mut ctx = Context::new(Errors::new());
        ctx.define(&name("x"), &Tree::integer(1, NOWHERE), false);
        ctx.create_scope();
        ctx.define(&name("x"), &Tree::integer(2, NOWHERE), false);
        assert_eq!(ctx.named("x", true).unwrap().as_integer(), Some(2));
        ctx.pop_scope();
        assert_eq!(ctx.named("x", true).unwrap().as_integer(), Some(1));
    }

    #[test]
    fn lookup_does_not_recurse_when_asked() {
        let mut ctx = Context::new(Errors::new());
        ctx.define(&name("x"), &Tree::integer(1, NOWHERE), false);
        ctx.create_scope();
        assert!(ctx.bound(&name("x"), false).is_none());
        assert!(ctx.bound(&name("x"), true).is_some());
    }

    #[test]
    fn compound_patterns_share_hash_buckets() {
        let ctx = Context::new(Errors::new());
        let pattern = Tree::infix("+", name("a"), name("b"), NOWHERE);
        ctx.define(&pattern, &Tree::integer(0, NOWHERE), false);
        let query = Tree::infix("+", Tree::integer(1, NOWHERE), Tree::integer(2, NOWHERE), NOWHERE);
        let mut seen = 0;
        ctx.lookup(&query, true, &mut |_, _| {
            seen += 1;
            None
        });
        assert_eq!(seen, 1);
    }

    #[test]
    fn assignment_updates_in_place() {
        let ctx = Context::new(Errors::new());
        ctx.assign(&name("x"), &Tree::integer(3, NOWHERE));
        assert_eq!(ctx.named("x", true).unwrap().as_integer(), Some(3));
        ctx.assign(&name("x"), &Tree::integer(6, NOWHERE));
        assert_eq!(ctx.named("x", true).unwrap().as_integer(), Some(6));
    }

    #[test]
    fn many_declarations_stay_reachable() {
        let ctx = Context::new(Errors::new());
        for i in 0..64 {
            ctx.define(&name(&format!("sym{}", i)), &Tree::integer(i, NOWHERE), false);
        }
        for i in 0..64 {
            let found = ctx.named(&format!("sym{}", i), true);
            assert_eq!(found.unwrap().as_integer(), Some(i));
        }
    }

    #[test]
    fn rewrite_defined_strips_annotations() {
        let form = Tree::infix(
            "when",
            Tree::infix(":", name("x"), name("integer"), NOWHERE),
            name("guard"),
            NOWHERE,
        );
        let defined = rewrite_defined(&form);
        // 'x : integer when guard' defines x
        assert!(Tree::equal(
            &defined,
            &Tree::infix(":", name("x"), name("integer"), NOWHERE)
        ) || defined.is_name("x"));
    }
}

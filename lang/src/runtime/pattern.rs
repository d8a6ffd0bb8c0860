use crate::{
    errors::Errors,
    runtime::{rewrite_defined, rewrite_type},
    sema::{Types, UnifyMode},
    syntax::tree::{Kind, Tree, TreeRef},
};
use std::{cell::RefCell, cmp::min, rc::Rc};

/// Static confidence in a match: `Failed` never fires, `Possible` fires if
/// the runtime conditions hold, `Perfect` fires unconditionally and stops
/// candidate enumeration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum BindingStrength {
    Failed,
    Possible,
    Perfect,
}

/// A pattern parameter captured from the call site.
#[derive(Clone)]
pub struct RewriteBinding {
    pub name: TreeRef,
    pub value: TreeRef,
}

/// A runtime condition a candidate must satisfy to fire.
#[derive(Clone)]
pub enum RewriteCondition {
    /// The call-site value must equal the test: a literal from the
    /// pattern, or a name already bound by an earlier parameter.
    Equal { value: TreeRef, test: TreeRef },
    /// A `when` guard that must evaluate to true with the bindings bound.
    Guard { test: TreeRef },
}

/// A runtime check that a value's tree kind is the given one.
#[derive(Clone)]
pub struct RewriteKind {
    pub value: TreeRef,
    pub test: Kind,
}

/// One rule that may rewrite a given expression, with everything needed to
/// decide at run time and to apply it.
pub struct RewriteCandidate {
    pub rewrite: TreeRef,
    pub scope: TreeRef,
    pub bindings: Vec<RewriteBinding>,
    pub kinds: Vec<RewriteKind>,
    pub conditions: Vec<RewriteCondition>,
    pub btypes: Types,
    pub ty: Option<TreeRef>,
}

/// The candidates matching one call site, in declaration order.
#[derive(Default)]
pub struct RewriteCalls {
    pub candidates: Vec<Rc<RewriteCandidate>>,
}

impl RewriteCalls {
    pub fn new() -> RewriteCalls {
        RewriteCalls::default()
    }
}

impl RewriteCandidate {
    fn new(rewrite: &TreeRef, scope: &TreeRef, vtypes: &Types) -> RewriteCandidate {
        RewriteCandidate {
            rewrite: rewrite.clone(),
            scope: scope.clone(),
            bindings: Vec::new(),
            kinds: Vec::new(),
            conditions: Vec::new(),
            btypes: Types::nested(vtypes, scope),
            ty: None,
        }
    }

    fn condition(&mut self, value: &TreeRef, test: &TreeRef) {
        self.conditions.push(RewriteCondition::Equal {
            value: value.clone(),
            test: test.clone(),
        });
    }

    fn guard(&mut self, test: &TreeRef) {
        self.conditions.push(RewriteCondition::Guard { test: test.clone() });
    }

    fn kind_condition(&mut self, value: &TreeRef, test: Kind) {
        self.kinds.push(RewriteKind {
            value: value.clone(),
            test,
        });
    }

    pub fn unconditional(&self) -> bool {
        self.kinds.is_empty() && self.conditions.is_empty()
    }

    /// The type of a call-site value, computed in the caller's inference
    /// and made visible to this candidate's.
    fn value_type(&mut self, vtypes: &mut Types, value: &TreeRef) -> Option<TreeRef> {
        let vtype = vtypes.type_of(value)?;
        let mut current = Some(value.clone());
        while let Some(value) = current {
            if let Some(calls) = vtypes.has_rewrite_calls(&value) {
                self.btypes.record_calls(&value, calls);
            }
            current = value.as_block().map(|(child, _, _)| child);
        }
        Some(vtype)
    }

    /// Unify a value type against a pattern type. When the static type
    /// cannot decide (a generic or the universal tree type), record a
    /// runtime kind check instead of failing.
    fn unify_types(
        &mut self,
        value_type: &TreeRef,
        form_type: &TreeRef,
        value: &TreeRef,
        declaration: bool,
    ) -> bool {
        let prims = self.btypes.prims.clone();
        let vt = self.btypes.base(value_type);
        let vt = prims.lookup_type_name(&vt);
        let ft = self.btypes.base(form_type);
        let ft = prims.lookup_type_name(&ft);

        if Rc::ptr_eq(&vt, &prims.tree_type) || Types::is_generic(&vt) {
            if let Some(kind) = prims.type_kind(&ft) {
                self.kind_condition(value, kind);
            }
        }

        let mode = if declaration {
            UnifyMode::Declaration
        } else {
            UnifyMode::Standard
        };
        self.btypes.unify(&vt, &ft, mode)
    }

    /// Attempt to bind 'value' to the pattern 'form', the recursive
    /// structural matcher.
    pub fn bind(
        &mut self,
        vtypes: &mut Types,
        form: &TreeRef,
        value: &TreeRef,
    ) -> BindingStrength {
        use BindingStrength::*;

        match form.kind() {
            Kind::Integer | Kind::Real | Kind::Text => {
                if value.kind() == form.kind() {
                    return if Tree::equal(form, value) { Perfect } else { Failed };
                }
                let vtype = match self.value_type(vtypes, value) {
                    Some(t) => t,
                    None => return Failed,
                };
                let literal_type = match form.kind() {
                    Kind::Integer => self.btypes.prims.integer_type.clone(),
                    Kind::Real => self.btypes.prims.real_type.clone(),
                    _ => self.btypes.prims.text_type.clone(),
                };
                if self.unify_types(&vtype, &literal_type, value, false) {
                    self.condition(value, form);
                    return Possible;
                }
                Failed
            }

            Kind::Name => {
                // The defined name of the rule matches the same name
                // unconditionally; against a constant it generalizes a
                // literal rewrite and binds like a parameter.
                if let Some((decl_form, _)) = self.rewrite.infix_named("is") {
                    let fname = rewrite_defined(&decl_form);
                    if Rc::ptr_eq(&fname, form) {
                        if let Some(vname) = value.as_name() {
                            return if form.is_name(vname) { Perfect } else { Failed };
                        }
                        if value.is_constant() {
                            let vtype = match self.value_type(vtypes, value) {
                                Some(t) => t,
                                None => return Failed,
                            };
                            let name_type = match self.btypes.type_of(form) {
                                Some(t) => t,
                                None => return Failed,
                            };
                            if !self.unify_types(&vtype, &name_type, value, false) {
                                return Failed;
                            }
                            self.btypes.context.define(form, value, false);
                            self.bindings.push(RewriteBinding {
                                name: form.clone(),
                                value: value.clone(),
                            });
                            return Possible;
                        }
                        return Perfect;
                    }
                }

                let vtype = match self.value_type(vtypes, value) {
                    Some(t) => t,
                    None => return Failed,
                };

                // A name already bound requires equal values at run time
                let mut need_arg = true;
                if let Some(bound) = self.btypes.context.bound(form, true) {
                    if !Rc::ptr_eq(&bound, form) {
                        let bound_type = match self.value_type(vtypes, &bound) {
                            Some(t) => t,
                            None => return Failed,
                        };
                        if !self.unify_types(&vtype, &bound_type, value, false) {
                            return Failed;
                        }
                        self.condition(value, form);
                        need_arg = false;
                    }
                }

                let name_type = match self.btypes.type_of(form) {
                    Some(t) => t,
                    None => return Failed,
                };
                if !self.unify_types(&vtype, &name_type, value, false) {
                    return Failed;
                }

                if need_arg {
                    self.btypes.context.define(form, value, false);
                    self.bindings.push(RewriteBinding {
                        name: form.clone(),
                        value: value.clone(),
                    });
                }
                Possible
            }

            Kind::Infix => {
                let (fname, fleft, fright) = match form.as_infix() {
                    Some(parts) => (parts.0.to_owned(), parts.1, parts.2),
                    None => return Failed,
                };

                // Type declarations in the pattern
                if fname == ":" || fname == "as" {
                    self.btypes.assign_type(&fleft, Some(&fright));
                    if self.bind(vtypes, &fleft, value) == Failed {
                        return Failed;
                    }
                    let vtype = match self.value_type(vtypes, value) {
                        Some(t) => t,
                        None => return Failed,
                    };
                    if !self.unify_types(&vtype, &fright, value, true) {
                        return Failed;
                    }
                    return if self.unconditional() { Perfect } else { Possible };
                }

                // Guard clauses
                if fname == "when" {
                    if self.bind(vtypes, &fleft, value) == Failed {
                        return Failed;
                    }
                    let guard_type = match self.btypes.type_of(&fright) {
                        Some(t) => t,
                        None => return Failed,
                    };
                    let boolean = self.btypes.prims.boolean_type.clone();
                    if !self.btypes.unify(&guard_type, &boolean, UnifyMode::Standard) {
                        return Failed;
                    }
                    self.guard(&fright);
                    return Possible;
                }

                // Matching infix name: bind both sides
                if let Some((vname, vleft, vright)) = value.as_infix() {
                    if vname == fname {
                        let left = self.bind(vtypes, &fleft, &vleft);
                        if left == Failed {
                            return Failed;
                        }
                        let right = self.bind(vtypes, &fright, &vright);
                        return min(left, right);
                    }
                }

                // The value may evaluate to an infix: runtime decomposition
                let vtype = match self.value_type(vtypes, value) {
                    Some(t) => t,
                    None => return Failed,
                };
                let infix_type = self.btypes.prims.infix_type.clone();
                if !self.unify_types(&vtype, &infix_type, value, false) {
                    return Failed;
                }
                let pos = form.pos;
                let left_ref = Tree::prefix(Tree::name("left", pos), value.clone(), pos);
                let left = self.bind(vtypes, &fleft, &left_ref);
                if left == Failed {
                    return Failed;
                }
                let right_ref = Tree::prefix(Tree::name("right", pos), value.clone(), pos);
                let right = self.bind(vtypes, &fright, &right_ref);
                if right == Failed {
                    return Failed;
                }
                let name_ref = Tree::prefix(Tree::name("name", pos), value.clone(), pos);
                let wanted_name = Tree::text(&fname, "\"", "\"", pos);
                self.condition(&name_ref, &wanted_name);
                min(left, right)
            }

            Kind::Prefix => {
                let (fleft, fright) = form.as_prefix().unwrap();
                if let Some((vleft, vright)) = value.as_prefix() {
                    return self.bind_binary(vtypes, &fleft, &vleft, &fright, &vright);
                }
                Failed
            }

            Kind::Postfix => {
                let (fleft, fright) = form.as_postfix().unwrap();
                if let Some((vleft, vright)) = value.as_postfix() {
                    return self.bind_binary(vtypes, &fright, &vright, &fleft, &vleft);
                }
                Failed
            }

            Kind::Block => {
                // Blocks are transparent for matching
                let (child, _, _) = form.as_block().unwrap();
                self.bind(vtypes, &child, value)
            }
        }
    }

    /// Bind a prefix or postfix: the operator names must be identical, then
    /// the operands bind.
    fn bind_binary(
        &mut self,
        vtypes: &mut Types,
        form_op: &TreeRef,
        value_op: &TreeRef,
        form_arg: &TreeRef,
        value_arg: &TreeRef,
    ) -> BindingStrength {
        let form_name = match form_op.as_name() {
            Some(n) => n,
            None => return BindingStrength::Failed,
        };
        let value_name = match value_op.as_name() {
            Some(n) => n,
            None => return BindingStrength::Failed,
        };
        if form_name != value_name {
            return BindingStrength::Failed;
        }
        self.bind(vtypes, form_arg, value_arg)
    }
}

/// Is a body one of the backend forms: `builtin NAME`, `C`, `C "sym"`, or a
/// self-definition from `data`?
fn opaque_body(rewrite: &TreeRef, init: &TreeRef) -> bool {
    if init.is_name("C") {
        return true;
    }
    if let Some((left, _)) = init.as_prefix() {
        if left.is_name("builtin") || left.is_name("C") {
            return true;
        }
    }
    if let Some((form, _)) = rewrite.infix_named("is") {
        if Rc::ptr_eq(&form, init) {
            return true;
        }
    }
    false
}

/// Check one declaration against a call site: bind the pattern, typecheck
/// the body, and record the candidate. Returns the expression to stop the
/// lookup when the binding is perfect.
pub fn check_candidate(
    types: &mut Types,
    scope: &TreeRef,
    what: &TreeRef,
    decl: &TreeRef,
    rc: &Rc<RefCell<RewriteCalls>>,
) -> Option<TreeRef> {
    let (form, init) = decl.infix_named("is")?;

    // Failed bindings swallow their diagnostics
    let errors = types.context.errors.clone();
    let saved = errors.replace(Errors::default());

    let mut candidate = RewriteCandidate::new(decl, scope, types);
    let defined = rewrite_defined(&form);
    let decl_type = rewrite_type(&form).map(|t| types.prims.lookup_type_name(&t));

    // Strip the return type and outer block, but keep 'when' so the guard
    // binds as a runtime condition
    let mut bind_form = form.clone();
    if let Some((left, _)) = bind_form.infix_named("as") {
        bind_form = left;
    }
    if let Some(child) = bind_form.block_child() {
        bind_form = child;
    }

    let mut binding = candidate.bind(types, &bind_form, what);
    let mut ty = None;

    if binding != BindingStrength::Failed {
        let builtin = opaque_body(decl, &init);

        if let Some(decl_type) = &decl_type {
            if !candidate.btypes.assign_type(&init, Some(decl_type))
                || !candidate.btypes.assign_type(what, Some(decl_type))
            {
                binding = BindingStrength::Failed;
            }
        }

        if binding != BindingStrength::Failed {
            if !builtin {
                // Type the body with its declarations in scope
                candidate.btypes.context.create_scope();
                candidate.btypes.context.process_declarations(&init);
                match candidate.btypes.type_of(&init) {
                    Some(t) => ty = Some(t),
                    None => binding = BindingStrength::Failed,
                }
            } else if decl_type.is_none() {
                ty = Some(candidate.btypes.new_type_name(init.pos));
            } else {
                ty = decl_type.clone();
            }
        }
    }

    // Match the type of the form and declared entity
    if binding != BindingStrength::Failed {
        if let Some(ty) = &ty {
            let ok = candidate.btypes.assign_type(&form, Some(ty))
                && (Rc::ptr_eq(&form, &defined)
                    || candidate.btypes.assign_type(&defined, Some(ty)))
                && candidate.btypes.assign_type(what, Some(ty));
            if !ok {
                binding = BindingStrength::Failed;
            }
        }
    }

    // Errors in the process mean the unification was bad
    let scratch = errors.replace(saved);
    if scratch.had_errors() {
        binding = BindingStrength::Failed;
    }

    if binding != BindingStrength::Failed {
        candidate.ty = ty;
        rc.borrow_mut().candidates.push(Rc::new(candidate));
    }

    // Keep going unless we had a perfect binding
    if binding == BindingStrength::Perfect {
        return Some(what.clone());
    }
    None
}

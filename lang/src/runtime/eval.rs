use crate::{
    codegen::{CodeGenerator, Evaluator},
    errors::{Error, ErrorsRef, Severity},
    ffi,
    runtime::{
        builtins::Opcodes,
        pattern::{RewriteCandidate, RewriteCondition},
        value_matches_type_name, Context, RuntimeError,
    },
    sema::{Primitives, Types},
    syntax::tree::{Info, Kind, Tree, TreeId, TreeRef},
};
use std::{cell::RefCell, collections::HashMap, rc::Rc};

/// Check if a tree is a closure; returns the closed-over value and scope.
pub fn is_closure(tree: &TreeRef) -> Option<(TreeRef, TreeRef)> {
    if !tree.has_closure_info() {
        return None;
    }
    let (scope, value) = tree.as_prefix()?;
    scope.as_prefix()?;
    Some((value, scope))
}

/// Capture the current scope with a value so it can be evaluated later in
/// the environment where it was written. Names resolve first; making a
/// closure of a closure returns it unchanged.
pub fn make_closure(context: &Context, value: &TreeRef) -> TreeRef {
    let mut context = context.clone();
    let mut value = value.clone();

    loop {
        let kind = value.kind();
        if kind < Kind::Name && !context.has_rewrites_for(kind) {
            return value;
        }

        if kind == Kind::Name {
            if let Some(bound) = context.bound(&value, true) {
                if let Some((inner, scope)) = is_closure(&bound) {
                    if !Rc::ptr_eq(&inner, &value) {
                        let errors = context.errors.clone();
                        context = Context::with_scope(scope, errors);
                        value = inner;
                        continue;
                    }
                }
                if !Rc::ptr_eq(&bound, &value) {
                    value = bound;
                    continue;
                }
            }
        }

        if kind != Kind::Prefix || !value.has_closure_info() {
            let wrapped = Tree::prefix(context.symbols.clone(), value.clone(), value.pos);
            wrapped.mark_closure();
            return wrapped;
        }
        return value;
    }
}

fn is_declaration(tree: &TreeRef) -> bool {
    if tree.infix_named("is").is_some() {
        return true;
    }
    matches!(tree.as_prefix(), Some((left, _)) if left.is_name("data"))
}

enum CallResult {
    /// The candidate rewrote the tree; continue evaluating the body in the
    /// binding scope.
    Reduced(Context, TreeRef),
    /// The candidate produced a final value.
    Value(TreeRef),
    /// No candidate fired.
    NoMatch,
}

/// The fully interpreted evaluation engine: no native code is required,
/// though a backend may be plugged in and takes precedence when it can
/// compile a form.
pub struct Interpreter {
    pub prims: Rc<Primitives>,
    pub opcodes: Opcodes,
    pub errors: ErrorsRef,
    pub backend: Option<RefCell<Box<dyn CodeGenerator>>>,
    pub debug: bool,
}

impl Interpreter {
    pub fn new(prims: Rc<Primitives>, errors: ErrorsRef) -> Interpreter {
        Interpreter {
            prims,
            opcodes: Opcodes::standard(),
            errors,
            backend: None,
            debug: false,
        }
    }

    pub fn with_backend(mut self, backend: Box<dyn CodeGenerator>) -> Interpreter {
        self.backend = Some(RefCell::new(backend));
        self
    }

    fn report(&self, error: Error) {
        self.errors.borrow_mut().log(error);
    }

    fn trace(&self, phase: &str, tree: &TreeRef) {
        if self.debug {
            eprintln!("[eval] {}: {}", phase, crate::codegen::source::render(tree));
        }
    }

    fn eval_in(&self, context: Context, tree: TreeRef) -> TreeRef {
        let mut context = context;
        let mut tree = tree;
        let mut last_failed: Option<TreeRef> = None;

        loop {
            self.trace("considering", &tree);

            // A backend that accepts the form evaluates it
            if let Some(result) = self.backend_eval(&context, &tree) {
                return result;
            }

            // Constants evaluate to themselves unless some rule redefines
            // their kind
            if tree.is_constant() && !context.has_rewrites_for(tree.kind()) {
                return tree;
            }

            // Unwrap closures: switch to the saved scope
            if let Some((value, scope)) = is_closure(&tree) {
                context = Context::with_scope(scope, context.errors.clone());
                tree = value;
                continue;
            }

            // Blocks open a scope of their own
            if let Some(child) = tree.block_child() {
                context.create_scope();
                context.process_declarations(&child);
                tree = child;
                continue;
            }

            let parts = tree
                .as_infix()
                .map(|(name, left, right)| (name.to_owned(), left, right));
            if let Some((name, left, right)) = parts {
                match name.as_str() {
                    // Sequences evaluate left to right, skipping what the
                    // declaration pass already entered
                    ";" | "\n" => {
                        let result = if is_declaration(&left) {
                            left
                        } else {
                            self.eval_in(context.clone(), left)
                        };
                        if is_declaration(&right) {
                            return result;
                        }
                        tree = right;
                        continue;
                    }
                    // A declaration standing alone is inert
                    "is" => return tree,
                    ":=" => {
                        let value = self.eval_in(context.clone(), right);
                        return context.assign(&left, &value);
                    }
                    _ => (),
                }
            }

            let is_data = matches!(tree.as_prefix(), Some((left, _)) if left.is_name("data"));
            if is_data {
                return tree;
            }

            // Find candidate rewrites and fire the first one that holds
            match self.eval_call(&context, &tree) {
                Ok(CallResult::Reduced(new_context, body)) => {
                    context = new_context;
                    tree = body;
                    last_failed = None;
                    continue;
                }
                Ok(CallResult::Value(value)) => return value,
                Ok(CallResult::NoMatch) => {
                    // Evaluate children and try again once
                    let already = last_failed
                        .as_ref()
                        .map(|t| Tree::equal(t, &tree))
                        .unwrap_or(false);
                    if !already && !tree.is_leaf() {
                        let reduced = self.eval_children(&context, &tree);
                        if !Tree::equal(&reduced, &tree) {
                            last_failed = Some(reduced.clone());
                            tree = reduced;
                            continue;
                        }
                    }
                    self.report(
                        Error::new("No form matches $1", tree.pos, Severity::Lookup)
                            .arg(crate::codegen::source::render(&tree)),
                    );
                    return tree;
                }
                Err(error) => {
                    self.report(
                        Error::new("$1 in $2", tree.pos, Severity::Runtime)
                            .arg(error.to_string())
                            .arg(crate::codegen::source::render(&tree)),
                    );
                    return tree;
                }
            }
        }
    }

    fn backend_eval(&self, context: &Context, tree: &TreeRef) -> Option<TreeRef> {
        let backend = self.backend.as_ref()?;
        let mut backend = backend.borrow_mut();
        let handle = match tree.compiled_info() {
            Some(handle) => handle,
            None => {
                let handle = backend.compile(&context.symbols, tree).ok()?;
                tree.set_info(Info::Compiled(handle));
                handle
            }
        };
        backend.invoke(handle, &[]).ok()
    }

    fn eval_call(&self, context: &Context, tree: &TreeRef) -> Result<CallResult, RuntimeError> {
        let mut types = Types::new(&context.symbols, self.prims.clone(), self.errors.clone());
        let calls = types.rewrite_calls_for(tree);
        let candidates = calls.borrow().candidates.clone();
        if candidates.is_empty() {
            return Ok(CallResult::NoMatch);
        }

        let mut memo: HashMap<TreeId, TreeRef> = HashMap::new();
        for candidate in &candidates {
            if let Some(result) = self.try_candidate(context, tree, candidate, &mut memo)? {
                return Ok(result);
            }
        }
        Ok(CallResult::NoMatch)
    }

    fn eval_memo(
        &self,
        context: &Context,
        value: &TreeRef,
        memo: &mut HashMap<TreeId, TreeRef>,
    ) -> TreeRef {
        if let Some(known) = memo.get(&TreeId::of(value)) {
            return known.clone();
        }
        let evaluated = self.eval_in(context.clone(), value.clone());
        memo.insert(TreeId::of(value), evaluated.clone());
        evaluated
    }

    /// Check a candidate's runtime conditions; when they all hold, bind the
    /// parameters in a fresh child of the declaration scope and dispatch on
    /// the body.
    fn try_candidate(
        &self,
        context: &Context,
        tree: &TreeRef,
        candidate: &RewriteCandidate,
        memo: &mut HashMap<TreeId, TreeRef>,
    ) -> Result<Option<CallResult>, RuntimeError> {
        // Kind conditions, on evaluated call-site values
        for kind in &candidate.kinds {
            let value = self.eval_memo(context, &kind.value, memo);
            if value.kind() != kind.test {
                return Ok(None);
            }
        }

        // Equality conditions against pattern constants
        let mut deferred = Vec::new();
        for condition in &candidate.conditions {
            if let RewriteCondition::Equal { value, test } = condition {
                if test.is_constant() {
                    let value = self.eval_memo(context, value, memo);
                    if !Tree::equal(&value, test) {
                        return Ok(None);
                    }
                } else {
                    deferred.push(condition);
                }
            } else {
                deferred.push(condition);
            }
        }

        // Bind parameters lazily: closures over the evaluation scope,
        // except where a condition already forced the value
        let mut bindings = Context::with_scope(candidate.scope.clone(), context.errors.clone());
        bindings.create_scope();
        for binding in &candidate.bindings {
            let value = match memo.get(&TreeId::of(&binding.value)) {
                Some(evaluated) => evaluated.clone(),
                None => make_closure(context, &binding.value),
            };
            bindings.define(&binding.name, &value, false);
        }

        // Conditions needing the bindings: bound-name equalities and guards
        for condition in deferred {
            match condition {
                RewriteCondition::Equal { value, test } => {
                    let value = self.eval_memo(context, value, memo);
                    let test = self.eval_in(bindings.clone(), test.clone());
                    if !Tree::equal(&value, &test) {
                        return Ok(None);
                    }
                }
                RewriteCondition::Guard { test } => {
                    let verdict = self.eval_in(bindings.clone(), test.clone());
                    if !verdict.is_name("true") {
                        return Ok(None);
                    }
                }
            }
        }

        // All conditions hold: dispatch on the body
        let (form, body) = match candidate.rewrite.infix_named("is") {
            Some(parts) => parts,
            None => return Ok(None),
        };

        // Self-definitions from 'data' leave the input as is
        if Rc::ptr_eq(&form, &body) {
            return Ok(Some(CallResult::Value(tree.clone())));
        }

        // Builtins and C calls evaluate their arguments eagerly
        if let Some(native) = self.native_call(candidate, &form, &body)? {
            let mut args = Vec::with_capacity(candidate.bindings.len());
            for binding in &candidate.bindings {
                args.push(self.eval_memo(context, &binding.value, memo));
            }
            let result = native(&args)?;
            return Ok(Some(CallResult::Value(result)));
        }

        Ok(Some(CallResult::Reduced(bindings, body)))
    }

    /// Resolve a `builtin NAME` body in the opcode table, or a `C` body in
    /// the native-symbol table.
    fn native_call(
        &self,
        _candidate: &RewriteCandidate,
        form: &TreeRef,
        body: &TreeRef,
    ) -> Result<Option<ffi::NativeFn>, RuntimeError> {
        if body.is_name("C") {
            let defined = crate::runtime::rewrite_defined(form);
            let symbol = match defined.as_name() {
                Some(name) => name.to_owned(),
                None => match defined.left().and_then(|l| l.as_name().map(str::to_owned)) {
                    Some(name) => name,
                    None => return Err(RuntimeError::MissingSymbol("?".to_owned())),
                },
            };
            return match ffi::resolve(&symbol) {
                Some(f) => Ok(Some(f)),
                None => Err(RuntimeError::MissingSymbol(symbol)),
            };
        }

        if let Some((left, right)) = body.as_prefix() {
            if left.is_name("builtin") {
                let name = right
                    .as_name()
                    .ok_or(RuntimeError::InvalidArguments("builtin"))?;
                return match self.opcodes.resolve(name) {
                    Some(f) => Ok(Some(f)),
                    None => Err(RuntimeError::MissingSymbol(name.to_owned())),
                };
            }
            if left.is_name("C") {
                let symbol = right
                    .as_text()
                    .map(str::to_owned)
                    .or_else(|| right.as_name().map(str::to_owned))
                    .ok_or(RuntimeError::InvalidArguments("C"))?;
                return match ffi::resolve(&symbol) {
                    Some(f) => Ok(Some(f)),
                    None => Err(RuntimeError::MissingSymbol(symbol)),
                };
            }
        }
        Ok(None)
    }

    /// Reduce the children of an unmatched form, so that a rule may match
    /// the reduced tree.
    fn eval_children(&self, context: &Context, tree: &TreeRef) -> TreeRef {
        match tree.kind() {
            Kind::Prefix => {
                let (left, right) = tree.as_prefix().unwrap();
                // The head of a prefix names the operation: keep it
                let right = self.eval_in(context.clone(), right);
                Tree::prefix(left, right, tree.pos)
            }
            Kind::Postfix => {
                let (left, right) = tree.as_postfix().unwrap();
                let left = self.eval_in(context.clone(), left);
                Tree::postfix(left, right, tree.pos)
            }
            Kind::Infix => {
                let (name, left, right) = tree.as_infix().unwrap();
                let left = self.eval_in(context.clone(), left);
                let right = self.eval_in(context.clone(), right);
                Tree::infix(name, left, right, tree.pos)
            }
            _ => tree.clone(),
        }
    }
}

impl Evaluator for Interpreter {
    fn evaluate(&self, scope: &TreeRef, tree: &TreeRef) -> TreeRef {
        let context = Context::with_scope(scope.clone(), self.errors.clone());
        self.eval_in(context, tree.clone())
    }

    fn type_check(&self, scope: &TreeRef, ty: &TreeRef, value: &TreeRef) -> Option<TreeRef> {
        let context = Context::with_scope(scope.clone(), self.errors.clone());
        let evaluated = self.eval_in(context, value.clone());
        if value_matches_type_name(&evaluated, ty) {
            Some(evaluated)
        } else {
            None
        }
    }

    fn type_analysis(&self, scope: &TreeRef, tree: &TreeRef) -> bool {
        let mut types = Types::new(scope, self.prims.clone(), self.errors.clone());
        types.type_analysis(tree)
    }
}

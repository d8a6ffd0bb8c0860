use crate::{
    errors::{Error, Severity},
    sema::{Types, UnifyMode},
    syntax::tree::{Kind, TreeRef},
};

/// Walk a tree, annotating every node with an inferred type.
pub trait Infer {
    fn infer(&self, types: &mut Types) -> bool;
}

impl Infer for TreeRef {
    fn infer(&self, types: &mut Types) -> bool {
        types.infer(self)
    }
}

impl Types {
    /// Perform all the steps of type inference on a program.
    pub fn type_analysis(&mut self, program: &TreeRef) -> bool {
        self.context.process_declarations(program);
        self.infer(program)
    }

    pub(crate) fn infer(&mut self, what: &TreeRef) -> bool {
        match what.kind() {
            Kind::Integer | Kind::Real | Kind::Text => self.do_constant(what),
            Kind::Name => self.do_name(what),
            Kind::Prefix => self.do_prefix(what),
            Kind::Postfix => self.do_postfix(what),
            Kind::Infix => self.do_infix(what),
            Kind::Block => self.do_block(what),
        }
    }

    /// Constants have themselves as type, and evaluate normally so that a
    /// redefined literal still resolves.
    fn do_constant(&mut self, what: &TreeRef) -> bool {
        let canon = self.prims.canonical_type(what);
        if !self.assign_type(what, Some(&canon)) {
            return false;
        }
        self.evaluate(what)
    }

    fn do_name(&mut self, what: &TreeRef) -> bool {
        let boolean = self.prims.boolean_type.clone();
        let assigned = if what.is_name("true") || what.is_name("false") {
            self.assign_type(what, Some(&boolean))
        } else {
            self.assign_type(what, None)
        };
        if !assigned {
            return false;
        }
        self.evaluate(what)
    }

    fn do_prefix(&mut self, what: &TreeRef) -> bool {
        // A closure already carries its scope; its value is opaque here
        if what.has_closure_info() {
            return self.assign_type(what, None);
        }

        if !self.assign_type(what, None) {
            return false;
        }

        if let Some((left, right)) = what.as_prefix() {
            if left.is_name("data") {
                let declaration = self.prims.declaration_type.clone();
                let canon = self.prims.canonical_type(&right);
                return self.assign_type(what, Some(&declaration))
                    && self.assign_type(&right, Some(&canon));
            }
        }

        self.evaluate(what)
    }

    fn do_postfix(&mut self, what: &TreeRef) -> bool {
        if !self.assign_type(what, None) {
            return false;
        }
        self.evaluate(what)
    }

    fn do_infix(&mut self, what: &TreeRef) -> bool {
        let (name, left, right) = match what.as_infix() {
            Some(parts) => (parts.0.to_owned(), parts.1, parts.2),
            None => return false,
        };
        match name.as_str() {
            // The type of a sequence is the type of the last statement
            "\n" | ";" => {
                if !self.assign_type(what, None) {
                    return false;
                }
                self.statements(what, &left, &right)
            }
            // 'X : T': set the type of X to T and unify with the whole
            ":" | "as" => {
                self.assign_type(&left, Some(&right))
                    && self.infer(&left)
                    && self.assign_type(what, None)
                    && self.unify_expression_types(what, &left)
            }
            "is" => self.do_rewrite(what, &left, &right),
            _ => {
                if !self.assign_type(what, None) {
                    return false;
                }
                self.evaluate(what)
            }
        }
    }

    fn do_block(&mut self, what: &TreeRef) -> bool {
        if !self.assign_type(what, None) {
            return false;
        }
        let (child, _, _) = what.as_block().unwrap();
        if self.infer(&child) {
            return self.unify_expression_types(what, &child);
        }
        self.evaluate(what)
    }

    /// Assign a type to a rewrite declaration: the pattern is typed in
    /// prototyping mode in a child scope, then unified with the body.
    fn do_rewrite(&mut self, what: &TreeRef, form: &TreeRef, body: &TreeRef) -> bool {
        let saved_context = self.context.clone();
        self.context.create_scope();
        let saved_prototyping = std::mem::replace(&mut self.prototyping, true);

        let form_ok = self.infer(form);
        self.prototyping = saved_prototyping;
        if !form_ok {
            self.context = saved_context;
            self.report_malformed(form);
            return false;
        }

        let form_type = self.type_of(form);
        let value_type = self.type_of(body);
        self.context = saved_context;

        let (form_type, value_type) = match (form_type, value_type) {
            (Some(f), Some(v)) => (f, v),
            _ => return false,
        };
        let declaration = self.prims.declaration_type.clone();
        if !self.assign_type(what, Some(&declaration)) {
            return false;
        }
        if !self.unify(&value_type, &form_type, UnifyMode::Declaration) {
            return false;
        }

        // Explicit return type declarations unify with the body type
        if let Some((_, declared)) = form.infix_named("as") {
            if !self.unify(&value_type, &declared, UnifyMode::Declaration) {
                return false;
            }
        }
        true
    }

    fn statements(&mut self, what: &TreeRef, left: &TreeRef, right: &TreeRef) -> bool {
        if !self.infer(left) {
            return false;
        }
        if !self.infer(right) {
            return false;
        }

        // Skip declarations when deciding the statement type
        let declaration = self.prims.declaration_type.clone();
        let t2 = match self.type_of(right) {
            Some(t) => t,
            None => return false,
        };
        if !std::rc::Rc::ptr_eq(&t2, &declaration) {
            return self.unify_expression_types(what, right);
        }
        self.unify_expression_types(what, left)
    }

    fn report_malformed(&mut self, form: &TreeRef) {
        let rendered = crate::codegen::source::render(form);
        self.context.errors.borrow_mut().log(
            Error::new("Malformed rewrite pattern $1", form.pos, Severity::Type).arg(rendered),
        );
    }
}

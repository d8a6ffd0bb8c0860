use crate::{
    codegen::Evaluator,
    errors::{Errors, ErrorsRef},
    runtime::{builtins::Builtins, eval::Interpreter, Context},
    sema::Primitives,
    syntax::{
        parse::Parser,
        scan::{Positions, PositionsRef, Scanner},
        tree::TreeRef,
        Syntax, SyntaxRef,
    },
};
use std::{path::PathBuf, rc::Rc};

pub mod codegen;
pub mod errors;
pub mod ffi;
pub mod runtime;
pub mod sema;
pub mod serial;
pub mod syntax;

#[cfg(test)]
mod tests;

/// Everything one run of the language needs: the syntax table, the position
/// and error records, the root context primed with the builtin bootstrap,
/// and the evaluation engine.
pub struct Session {
    pub syntax: SyntaxRef,
    pub positions: PositionsRef,
    pub errors: ErrorsRef,
    pub context: Context,
    pub prims: Rc<Primitives>,
    pub interpreter: Interpreter,
    pub paths: Vec<PathBuf>,
    pub signed_constants: bool,
}

impl Session {
    pub fn new() -> Session {
        Session::with_syntax(Syntax::standard(), Vec::new())
    }

    /// A session using a syntax file instead of the built-in table.
    pub fn with_style(style: &str, paths: Vec<PathBuf>) -> Session {
        let errors = Errors::new();
        let syntax = Syntax::empty();
        Syntax::read_file(&syntax, style, &paths, &errors);
        let session = Session::with_syntax(syntax, paths);
        // Errors from loading the style file belong to the session
        let loading = errors.borrow().errors().to_vec();
        for error in loading {
            session.errors.borrow_mut().log(error);
        }
        session
    }

    pub fn with_syntax(syntax: SyntaxRef, paths: Vec<PathBuf>) -> Session {
        let errors = Errors::new();
        let positions = Positions::new();
        let prims = Primitives::new();
        let context = Context::new(errors.clone());
        Builtins::init(&context, &syntax, &positions, &errors);
        let interpreter = Interpreter::new(prims.clone(), errors.clone());
        Session {
            syntax,
            positions,
            errors,
            context,
            prims,
            interpreter,
            paths,
            signed_constants: true,
        }
    }

    pub fn set_debug(&mut self, debug: bool) {
        self.interpreter.debug = debug;
    }

    /// Parse source text into a tree, consulting the session syntax and any
    /// inline `syntax` directives.
    pub fn parse_source(&self, file: &str, source: &str) -> Option<TreeRef> {
        let scanner = Scanner::new(
            file,
            source,
            self.syntax.clone(),
            &self.positions,
            self.errors.clone(),
        );
        let mut parser = Parser::new(
            scanner,
            self.syntax.clone(),
            self.paths.clone(),
            self.errors.clone(),
            self.signed_constants,
        );
        parser.parse_all()
    }

    /// Evaluate a parsed program in a fresh child of the root scope:
    /// declarations first, then the instructions.
    pub fn evaluate(&self, program: &TreeRef) -> TreeRef {
        let mut context = self.context.clone();
        context.create_scope();
        let has_instructions = context.process_declarations(program);
        if !has_instructions {
            return program.clone();
        }
        self.interpreter.evaluate(&context.symbols, program)
    }

    /// Parse and evaluate in one step.
    pub fn run(&self, file: &str, source: &str) -> Option<TreeRef> {
        let tree = self.parse_source(file, source)?;
        Some(self.evaluate(&tree))
    }

    pub fn had_errors(&self) -> bool {
        self.errors.borrow().had_errors()
    }

    /// Print accumulated diagnostics to stderr.
    pub fn display_errors(&self) {
        self.errors.borrow().display_on(&self.positions.borrow());
    }
}

impl Default for Session {
    fn default() -> Session {
        Session::new()
    }
}

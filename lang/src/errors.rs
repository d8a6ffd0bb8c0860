use crate::syntax::{
    scan::Positions,
    tree::{TreePosition, NOWHERE},
};
use std::{cell::RefCell, fmt, rc::Rc};

/// Shared handle to the error sink of a session. Every phase reports here
/// and continues best-effort; the driver checks `had_errors` afterwards.
pub type ErrorsRef = Rc<RefCell<Errors>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Lex,
    Parse,
    Lookup,
    Type,
    Runtime,
}

/// A single diagnostic: a message template with `$1`, `$2`, ... placeholders
/// substituted by the rendered arguments.
#[derive(Debug, Clone)]
pub struct Error {
    pub message: String,
    pub arguments: Vec<String>,
    pub position: TreePosition,
    pub severity: Severity,
}

impl Error {
    pub fn new(message: &str, position: TreePosition, severity: Severity) -> Error {
        Error {
            message: message.to_owned(),
            arguments: Vec::new(),
            position,
            severity,
        }
    }

    pub fn arg(mut self, value: impl fmt::Display) -> Error {
        self.arguments.push(value.to_string());
        self
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut out = self.message.clone();
        for (i, arg) in self.arguments.iter().enumerate() {
            out = out.replace(&format!("${}", i + 1), arg);
        }
        write!(f, "{}", out)
    }
}

#[derive(Debug, Default)]
pub struct Errors {
    errors: Vec<Error>,
}

impl Errors {
    pub fn new() -> ErrorsRef {
        Rc::new(RefCell::new(Errors::default()))
    }

    pub fn log(&mut self, error: Error) {
        self.errors.push(error);
    }

    pub fn had_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    pub fn count(&self) -> usize {
        self.errors.len()
    }

    pub fn clear(&mut self) {
        self.errors.clear();
    }

    pub fn errors(&self) -> &[Error] {
        &self.errors
    }

    /// Print all accumulated diagnostics, resolving positions to
    /// file:line:column when the position table knows them.
    pub fn display_on(&self, positions: &Positions) {
        for error in &self.errors {
            if error.position == NOWHERE {
                eprintln!("{}", error);
            } else {
                let (file, line, column) = positions.locate(error.position);
                eprintln!("{}:{}:{}: {}", file, line, column, error);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn placeholders_substitute_in_order() {
        let error = Error::new("Mismatched parentheses: got $1, expected $2", NOWHERE, Severity::Parse)
            .arg("]")
            .arg(")");
        assert_eq!(
            error.to_string(),
            "Mismatched parentheses: got ], expected )"
        );
    }

    #[test]
    fn sink_accumulates() {
        let errors = Errors::new();
        assert!(!errors.borrow().had_errors());
        errors
            .borrow_mut()
            .log(Error::new("bad character $1", 0, Severity::Lex).arg("\\"));
        assert!(errors.borrow().had_errors());
        assert_eq!(errors.borrow().count(), 1);
    }
}

use crate::{runtime::RuntimeError, syntax::tree::TreeRef};
use lazy_static::lazy_static;
use spin::Mutex;
use std::collections::HashMap;

/// Signature of a native function callable from a rewrite body, either a
/// registered opcode or a `C "symbol"` resolved here.
pub type NativeFn = fn(&[TreeRef]) -> Result<TreeRef, RuntimeError>;

lazy_static! {
    /// The process-wide dynamic library table: hosts register the symbols
    /// that `C` bodies may name.
    static ref LIBRARY: Mutex<HashMap<String, NativeFn>> = Mutex::new(HashMap::new());
}

pub fn register(symbol: &str, function: NativeFn) {
    LIBRARY.lock().insert(symbol.to_owned(), function);
}

pub fn resolve(symbol: &str) -> Option<NativeFn> {
    LIBRARY.lock().get(symbol).copied()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::syntax::tree::{Tree, NOWHERE};

    fn answer(_args: &[TreeRef]) -> Result<TreeRef, RuntimeError> {
        Ok(Tree::integer(42, NOWHERE))
    }

    #[test]
    fn registered_symbols_resolve() {
        register("the_answer", answer);
        let found = resolve("the_answer").unwrap();
        assert_eq!(found(&[]).unwrap().as_integer(), Some(42));
        assert!(resolve("no_such_symbol").is_none());
    }
}

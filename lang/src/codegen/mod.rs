pub mod source;

use crate::{
    runtime::RuntimeError,
    syntax::tree::{Tree, TreePosition, TreeRef},
};

/// Opaque handle to compiled code, recorded in a tree's info chain.
pub type CodeHandle = usize;

/// A raw machine value, as exchanged with a native backend.
#[derive(Debug, Clone, PartialEq)]
pub enum NativeValue {
    Integer(i64),
    Real(f64),
    Text(String),
    Boolean(bool),
}

/// The ways to evaluate a tree: the interpreter implements this, and so
/// would an optimizing engine.
pub trait Evaluator {
    fn evaluate(&self, scope: &TreeRef, tree: &TreeRef) -> TreeRef;
    fn type_check(&self, scope: &TreeRef, ty: &TreeRef, value: &TreeRef) -> Option<TreeRef>;
    fn type_analysis(&self, scope: &TreeRef, tree: &TreeRef) -> bool;
}

/// Contract with a native code generator. The evaluator may hand a subtree
/// to it, then invoke the returned handle with bound arguments.
pub trait CodeGenerator {
    fn compile(&mut self, scope: &TreeRef, source: &TreeRef) -> Result<CodeHandle, RuntimeError>;
    fn invoke(&mut self, handle: CodeHandle, args: &[TreeRef]) -> Result<TreeRef, RuntimeError>;

    /// Box a raw native value into its tree form.
    fn box_value(&self, native: &NativeValue, pos: TreePosition) -> TreeRef {
        match native {
            NativeValue::Integer(v) => Tree::integer(*v, pos),
            NativeValue::Real(v) => Tree::real(*v, pos),
            NativeValue::Text(v) => Tree::quoted(v, pos),
            NativeValue::Boolean(v) => Tree::name(if *v { "true" } else { "false" }, pos),
        }
    }

    /// Unbox a tree into a raw native value when it has one.
    fn unbox(&self, tree: &TreeRef) -> Option<NativeValue> {
        if let Some(v) = tree.as_integer() {
            return Some(NativeValue::Integer(v));
        }
        if let Some(v) = tree.as_real() {
            return Some(NativeValue::Real(v));
        }
        if let Some(v) = tree.as_text() {
            return Some(NativeValue::Text(v.to_owned()));
        }
        match tree.as_name() {
            Some("true") => Some(NativeValue::Boolean(true)),
            Some("false") => Some(NativeValue::Boolean(false)),
            _ => None,
        }
    }
}

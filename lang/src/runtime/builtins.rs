use crate::{
    errors::ErrorsRef,
    ffi::NativeFn,
    runtime::{Context, RuntimeError},
    syntax::{
        parse::Parser,
        scan::{PositionsRef, Scanner},
        tree::{Tree, TreeRef},
        SyntaxRef,
    },
};
use std::collections::HashMap;

/// The bootstrap rewrites every context starts from, written in the
/// language itself. Bodies name opcodes resolved in the table below.
const BASICS: &str = include_str!("basics.elfe");

/// Named native operations that `builtin NAME` bodies dispatch to.
pub struct Opcodes {
    map: HashMap<&'static str, NativeFn>,
}

impl Opcodes {
    pub fn resolve(&self, name: &str) -> Option<NativeFn> {
        self.map.get(name).copied()
    }

    pub fn standard() -> Opcodes {
        let mut map: HashMap<&'static str, NativeFn> = HashMap::new();
        map.insert("integer_add", integer_add);
        map.insert("integer_sub", integer_sub);
        map.insert("integer_mul", integer_mul);
        map.insert("integer_div", integer_div);
        map.insert("integer_rem", integer_rem);
        map.insert("integer_mod", integer_mod);
        map.insert("integer_pow", integer_pow);
        map.insert("integer_neg", integer_neg);
        map.insert("integer_lt", integer_lt);
        map.insert("integer_le", integer_le);
        map.insert("integer_gt", integer_gt);
        map.insert("integer_ge", integer_ge);
        map.insert("integer_eq", integer_eq);
        map.insert("integer_ne", integer_ne);
        map.insert("real_add", real_add);
        map.insert("real_sub", real_sub);
        map.insert("real_mul", real_mul);
        map.insert("real_div", real_div);
        map.insert("real_pow", real_pow);
        map.insert("real_neg", real_neg);
        map.insert("real_lt", real_lt);
        map.insert("real_le", real_le);
        map.insert("real_gt", real_gt);
        map.insert("real_ge", real_ge);
        map.insert("real_eq", real_eq);
        map.insert("real_ne", real_ne);
        map.insert("text_concat", text_concat);
        map.insert("text_lt", text_lt);
        map.insert("text_eq", text_eq);
        map.insert("text_ne", text_ne);
        map.insert("boolean_and", boolean_and);
        map.insert("boolean_or", boolean_or);
        map.insert("boolean_xor", boolean_xor);
        map.insert("boolean_not", boolean_not);
        map.insert("infix_left", infix_left);
        map.insert("infix_right", infix_right);
        map.insert("infix_name", infix_name);
        Opcodes { map }
    }
}

/// Enter the bootstrap declarations into a context by parsing the embedded
/// source with the session syntax.
pub struct Builtins;

impl Builtins {
    pub fn init(
        context: &Context,
        syntax: &SyntaxRef,
        positions: &PositionsRef,
        errors: &ErrorsRef,
    ) {
        let scanner = Scanner::new(
            "<builtins>",
            BASICS,
            syntax.clone(),
            positions,
            errors.clone(),
        );
        let mut parser = Parser::new(scanner, syntax.clone(), Vec::new(), errors.clone(), true);
        if let Some(tree) = parser.parse_all() {
            context.process_declarations(&tree);
        }
    }
}

fn integers(args: &[TreeRef], opcode: &'static str) -> Result<(i64, i64), RuntimeError> {
    match (
        args.get(0).and_then(|a| a.as_integer()),
        args.get(1).and_then(|a| a.as_integer()),
    ) {
        (Some(x), Some(y)) => Ok((x, y)),
        _ => Err(RuntimeError::InvalidArguments(opcode)),
    }
}

fn reals(args: &[TreeRef], opcode: &'static str) -> Result<(f64, f64), RuntimeError> {
    match (
        args.get(0).and_then(|a| a.as_real()),
        args.get(1).and_then(|a| a.as_real()),
    ) {
        (Some(x), Some(y)) => Ok((x, y)),
        _ => Err(RuntimeError::InvalidArguments(opcode)),
    }
}

fn texts(args: &[TreeRef], opcode: &'static str) -> Result<(String, String), RuntimeError> {
    match (
        args.get(0).and_then(|a| a.as_text()),
        args.get(1).and_then(|a| a.as_text()),
    ) {
        (Some(x), Some(y)) => Ok((x.to_owned(), y.to_owned())),
        _ => Err(RuntimeError::InvalidArguments(opcode)),
    }
}

fn booleans(args: &[TreeRef], opcode: &'static str) -> Result<(bool, bool), RuntimeError> {
    match (
        args.get(0).and_then(as_boolean),
        args.get(1).and_then(as_boolean),
    ) {
        (Some(x), Some(y)) => Ok((x, y)),
        _ => Err(RuntimeError::InvalidArguments(opcode)),
    }
}

fn as_boolean(tree: &TreeRef) -> Option<bool> {
    match tree.as_name() {
        Some("true") => Some(true),
        Some("false") => Some(false),
        _ => None,
    }
}

fn boolean(value: bool, from: &[TreeRef]) -> TreeRef {
    let pos = from.first().map(|a| a.pos).unwrap_or(crate::syntax::tree::NOWHERE);
    Tree::name(if value { "true" } else { "false" }, pos)
}

fn integer(value: i64, from: &[TreeRef]) -> TreeRef {
    let pos = from.first().map(|a| a.pos).unwrap_or(crate::syntax::tree::NOWHERE);
    Tree::integer(value, pos)
}

fn real(value: f64, from: &[TreeRef]) -> TreeRef {
    let pos = from.first().map(|a| a.pos).unwrap_or(crate::syntax::tree::NOWHERE);
    Tree::real(value, pos)
}

fn integer_add(args: &[TreeRef]) -> Result<TreeRef, RuntimeError> {
    let (x, y) = integers(args, "integer_add")?;
    Ok(integer(x.wrapping_add(y), args))
}

fn integer_sub(args: &[TreeRef]) -> Result<TreeRef, RuntimeError> {
    let (x, y) = integers(args, "integer_sub")?;
    Ok(integer(x.wrapping_sub(y), args))
}

fn integer_mul(args: &[TreeRef]) -> Result<TreeRef, RuntimeError> {
    let (x, y) = integers(args, "integer_mul")?;
    Ok(integer(x.wrapping_mul(y), args))
}

fn integer_div(args: &[TreeRef]) -> Result<TreeRef, RuntimeError> {
    let (x, y) = integers(args, "integer_div")?;
    match x.checked_div(y) {
        Some(q) => Ok(integer(q, args)),
        None => Err(RuntimeError::DivisionByZero),
    }
}

fn integer_rem(args: &[TreeRef]) -> Result<TreeRef, RuntimeError> {
    let (x, y) = integers(args, "integer_rem")?;
    match x.checked_rem(y) {
        Some(r) => Ok(integer(r, args)),
        None => Err(RuntimeError::DivisionByZero),
    }
}

fn integer_mod(args: &[TreeRef]) -> Result<TreeRef, RuntimeError> {
    let (x, y) = integers(args, "integer_mod")?;
    if y == 0 {
        return Err(RuntimeError::DivisionByZero);
    }
    Ok(integer(x.rem_euclid(y), args))
}

fn integer_pow(args: &[TreeRef]) -> Result<TreeRef, RuntimeError> {
    let (x, y) = integers(args, "integer_pow")?;
    if y < 0 || y > u32::max_value() as i64 {
        return Err(RuntimeError::InvalidArguments("integer_pow"));
    }
    match x.checked_pow(y as u32) {
        Some(p) => Ok(integer(p, args)),
        None => Err(RuntimeError::InvalidArguments("integer_pow")),
    }
}

fn integer_neg(args: &[TreeRef]) -> Result<TreeRef, RuntimeError> {
    match args.get(0).and_then(|a| a.as_integer()) {
        Some(x) => Ok(integer(x.wrapping_neg(), args)),
        None => Err(RuntimeError::InvalidArguments("integer_neg")),
    }
}

fn integer_lt(args: &[TreeRef]) -> Result<TreeRef, RuntimeError> {
    let (x, y) = integers(args, "integer_lt")?;
    Ok(boolean(x < y, args))
}

fn integer_le(args: &[TreeRef]) -> Result<TreeRef, RuntimeError> {
    let (x, y) = integers(args, "integer_le")?;
    Ok(boolean(x <= y, args))
}

fn integer_gt(args: &[TreeRef]) -> Result<TreeRef, RuntimeError> {
    let (x, y) = integers(args, "integer_gt")?;
    Ok(boolean(x > y, args))
}

fn integer_ge(args: &[TreeRef]) -> Result<TreeRef, RuntimeError> {
    let (x, y) = integers(args, "integer_ge")?;
    Ok(boolean(x >= y, args))
}

fn integer_eq(args: &[TreeRef]) -> Result<TreeRef, RuntimeError> {
    let (x, y) = integers(args, "integer_eq")?;
    Ok(boolean(x == y, args))
}

fn integer_ne(args: &[TreeRef]) -> Result<TreeRef, RuntimeError> {
    let (x, y) = integers(args, "integer_ne")?;
    Ok(boolean(x != y, args))
}

fn real_add(args: &[TreeRef]) -> Result<TreeRef, RuntimeError> {
    let (x, y) = reals(args, "real_add")?;
    Ok(real(x + y, args))
}

fn real_sub(args: &[TreeRef]) -> Result<TreeRef, RuntimeError> {
    let (x, y) = reals(args, "real_sub")?;
    Ok(real(x - y, args))
}

fn real_mul(args: &[TreeRef]) -> Result<TreeRef, RuntimeError> {
    let (x, y) = reals(args, "real_mul")?;
    Ok(real(x * y, args))
}

fn real_div(args: &[TreeRef]) -> Result<TreeRef, RuntimeError> {
    let (x, y) = reals(args, "real_div")?;
    Ok(real(x / y, args))
}

fn real_pow(args: &[TreeRef]) -> Result<TreeRef, RuntimeError> {
    let (x, y) = reals(args, "real_pow")?;
    Ok(real(x.powf(y), args))
}

fn real_neg(args: &[TreeRef]) -> Result<TreeRef, RuntimeError> {
    match args.get(0).and_then(|a| a.as_real()) {
        Some(x) => Ok(real(-x, args)),
        None => Err(RuntimeError::InvalidArguments("real_neg")),
    }
}

fn real_lt(args: &[TreeRef]) -> Result<TreeRef, RuntimeError> {
    let (x, y) = reals(args, "real_lt")?;
    Ok(boolean(x < y, args))
}

fn real_le(args: &[TreeRef]) -> Result<TreeRef, RuntimeError> {
    let (x, y) = reals(args, "real_le")?;
    Ok(boolean(x <= y, args))
}

fn real_gt(args: &[TreeRef]) -> Result<TreeRef, RuntimeError> {
    let (x, y) = reals(args, "real_gt")?;
    Ok(boolean(x > y, args))
}

fn real_ge(args: &[TreeRef]) -> Result<TreeRef, RuntimeError> {
    let (x, y) = reals(args, "real_ge")?;
    Ok(boolean(x >= y, args))
}

fn real_eq(args: &[TreeRef]) -> Result<TreeRef, RuntimeError> {
    let (x, y) = reals(args, "real_eq")?;
    Ok(boolean(x == y, args))
}

fn real_ne(args: &[TreeRef]) -> Result<TreeRef, RuntimeError> {
    let (x, y) = reals(args, "real_ne")?;
    Ok(boolean(x != y, args))
}

fn text_concat(args: &[TreeRef]) -> Result<TreeRef, RuntimeError> {
    let (x, y) = texts(args, "text_concat")?;
    let pos = args[0].pos;
    Ok(Tree::quoted(&format!("{}{}", x, y), pos))
}

fn text_lt(args: &[TreeRef]) -> Result<TreeRef, RuntimeError> {
    let (x, y) = texts(args, "text_lt")?;
    Ok(boolean(x < y, args))
}

fn text_eq(args: &[TreeRef]) -> Result<TreeRef, RuntimeError> {
    let (x, y) = texts(args, "text_eq")?;
    Ok(boolean(x == y, args))
}

fn text_ne(args: &[TreeRef]) -> Result<TreeRef, RuntimeError> {
    let (x, y) = texts(args, "text_ne")?;
    Ok(boolean(x != y, args))
}

fn boolean_and(args: &[TreeRef]) -> Result<TreeRef, RuntimeError> {
    let (x, y) = booleans(args, "boolean_and")?;
    Ok(boolean(x && y, args))
}

fn boolean_or(args: &[TreeRef]) -> Result<TreeRef, RuntimeError> {
    let (x, y) = booleans(args, "boolean_or")?;
    Ok(boolean(x || y, args))
}

fn boolean_xor(args: &[TreeRef]) -> Result<TreeRef, RuntimeError> {
    let (x, y) = booleans(args, "boolean_xor")?;
    Ok(boolean(x != y, args))
}

fn boolean_not(args: &[TreeRef]) -> Result<TreeRef, RuntimeError> {
    match args.get(0).and_then(as_boolean) {
        Some(x) => Ok(boolean(!x, args)),
        None => Err(RuntimeError::InvalidArguments("boolean_not")),
    }
}

fn infix_left(args: &[TreeRef]) -> Result<TreeRef, RuntimeError> {
    args.get(0)
        .and_then(|a| a.as_infix().map(|(_, left, _)| left))
        .ok_or(RuntimeError::InvalidArguments("infix_left"))
}

fn infix_right(args: &[TreeRef]) -> Result<TreeRef, RuntimeError> {
    args.get(0)
        .and_then(|a| a.as_infix().map(|(_, _, right)| right))
        .ok_or(RuntimeError::InvalidArguments("infix_right"))
}

fn infix_name(args: &[TreeRef]) -> Result<TreeRef, RuntimeError> {
    match args.get(0).and_then(|a| match a.as_infix() {
        Some((name, _, _)) => Some(Tree::quoted(name, a.pos)),
        None => None,
    }) {
        Some(name) => Ok(name),
        None => Err(RuntimeError::InvalidArguments("infix_name")),
    }
}

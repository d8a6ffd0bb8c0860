use crate::{
    codegen::{source, CodeGenerator, CodeHandle, NativeValue},
    ffi,
    runtime::RuntimeError,
    syntax::tree::{Tree, TreeRef, NOWHERE},
    Session,
};
use std::cell::RefCell;

fn run(text: &str) -> (Session, TreeRef) {
    let session = Session::new();
    let result = session.run("<test>", text).expect("program did not parse");
    (session, result)
}

fn eval_ok(text: &str) -> TreeRef {
    let (session, result) = run(text);
    if session.had_errors() {
        session.display_errors();
        panic!("unexpected errors evaluating {:?}", text);
    }
    result
}

#[test]
fn arithmetic_follows_precedence() {
    assert_eq!(eval_ok("2 + 3 * 4").as_integer(), Some(14));
    assert_eq!(eval_ok("2 * 3 + 4").as_integer(), Some(10));
    assert_eq!(eval_ok("(2 + 3) * 4").as_integer(), Some(20));
    assert_eq!(eval_ok("10 - 2 - 3").as_integer(), Some(5));
    assert_eq!(eval_ok("2 ^ 3 ^ 2").as_integer(), Some(512));
}

#[test]
fn real_arithmetic_evaluates() {
    assert_eq!(eval_ok("1.5 + 2.25").as_real(), Some(3.75));
    assert_eq!(eval_ok("3.0 * 0.5").as_real(), Some(1.5));
}

#[test]
fn text_concatenation_and_comparison() {
    assert_eq!(eval_ok("\"foo\" & \"bar\"").as_text(), Some("foobar"));
    assert!(eval_ok("\"abc\" = \"abc\"").is_name("true"));
    assert!(eval_ok("\"abc\" < \"abd\"").is_name("true"));
}

#[test]
fn factorial_recursion_with_guard() {
    let program = "factorial 0 is 1\n\
                   factorial N when N > 0 is N * factorial(N-1)\n\
                   factorial 5";
    assert_eq!(eval_ok(program).as_integer(), Some(120));
}

#[test]
fn assignment_builds_and_updates() {
    assert_eq!(eval_ok("X := 3\nY := X + 1\nY").as_integer(), Some(4));
    assert_eq!(
        eval_ok("X := 3\nY := X + 1\nY := X * 2\nY").as_integer(),
        Some(6)
    );
}

#[test]
fn typed_assignment_keeps_old_value_on_mismatch() {
    let session = Session::new();
    let result = session
        .run("<test>", "X:integer := 3\nX := \"hello\"\nX")
        .unwrap();
    assert!(session.had_errors());
    assert_eq!(result.as_integer(), Some(3));
}

#[test]
fn conditional_with_signed_literal() {
    let program = "abs X:real is if X < 0.0 then -X else X\nabs -2.5";
    assert_eq!(eval_ok(program).as_real(), Some(2.5));
    let program = "abs X:real is if X < 0.0 then -X else X\nabs 3.25";
    assert_eq!(eval_ok(program).as_real(), Some(3.25));
}

#[test]
fn typed_patterns_dispatch_on_kind() {
    let rules = "f X:integer is 1\nf X:real is 2\n";
    assert_eq!(eval_ok(&format!("{}f 3", rules)).as_integer(), Some(1));
    assert_eq!(eval_ok(&format!("{}f 3.0", rules)).as_integer(), Some(2));

    let (session, result) = run(&format!("{}f \"x\"", rules));
    assert!(session.had_errors());
    assert_eq!(source::render(&result), "f \"x\"");
}

#[test]
fn declaration_order_picks_the_first_match() {
    let rules = "0 is 1\nN is N * 2\n";
    assert_eq!(eval_ok(&format!("{}0", rules)).as_integer(), Some(1));
    assert_eq!(eval_ok(&format!("{}3", rules)).as_integer(), Some(6));
}

#[test]
fn guarded_rules_check_in_declaration_order() {
    let rules = "classify N when N > 10 is 1\nclassify N when N > 0 is 2\n";
    assert_eq!(eval_ok(&format!("{}classify 20", rules)).as_integer(), Some(1));
    assert_eq!(eval_ok(&format!("{}classify 5", rules)).as_integer(), Some(2));

    let (session, result) = run(&format!("{}classify 0", rules));
    assert!(session.had_errors());
    assert_eq!(source::render(&result), "classify 0");
}

#[test]
fn closures_capture_their_scope() {
    let program = "do Body is Body\n\
                   make X:integer is do { X + 1 }\n\
                   make 10";
    assert_eq!(eval_ok(program).as_integer(), Some(11));
}

#[test]
fn lazy_arguments_evaluate_where_bound() {
    // The block is deferred and still sees the parameters of 'twice'
    let program = "twice Body is Body + Body\n\
                   twice (3 * 2)";
    assert_eq!(eval_ok(program).as_integer(), Some(12));
}

#[test]
fn data_forms_are_inert() {
    let program = "data point X, Y\npoint 1, 2";
    assert_eq!(source::render(&eval_ok(program)), "point 1, 2");
}

#[test]
fn tree_decomposition_builtins() {
    let program = "data point X, Y\nleft (point 1, 2)";
    assert_eq!(source::render(&eval_ok(program)), "point 1");
    let program = "data point X, Y\nright (point 1, 2)";
    assert_eq!(source::render(&eval_ok(program)), "2");
    let program = "data point X, Y\nname (point 1, 2)";
    assert_eq!(eval_ok(program).as_text(), Some(","));
}

#[test]
fn blocks_scope_their_declarations() {
    let program = "{ X := 2; X + 1 }";
    assert_eq!(eval_ok(program).as_integer(), Some(3));
}

#[test]
fn sequences_evaluate_left_to_right() {
    let program = "X := 1\nX := X + 1\nX := X + 1\nX";
    assert_eq!(eval_ok(program).as_integer(), Some(3));
}

#[test]
fn division_by_zero_reports_and_keeps_the_tree() {
    let (session, result) = run("1 / 0");
    assert!(session.had_errors());
    assert_eq!(source::render(&result), "1 / 0");
}

fn last_statement(tree: &TreeRef) -> TreeRef {
    let mut last = tree.clone();
    loop {
        let next = match last.as_infix() {
            Some((name, _, right)) if name == "\n" || name == ";" => right,
            _ => break,
        };
        last = next;
    }
    last
}

#[test]
fn inline_syntax_extends_the_grammar() {
    let program = "syntax\n    INFIX\n        310     +++\na +++ b";
    let session = Session::new();
    let tree = session.parse_source("<test>", program).unwrap();
    // The last statement parses with the new operator as an infix
    let last = last_statement(&tree);
    let (name, left, right) = last.as_infix().unwrap();
    assert_eq!(name, "+++");
    assert!(left.is_name("a"));
    assert!(right.is_name("b"));
}

#[test]
fn syntax_directive_loads_a_file() {
    let dir = std::env::temp_dir().join("elfe-syntax-test");
    std::fs::create_dir_all(&dir).unwrap();
    let file = dir.join("ext.syntax");
    std::fs::write(&file, "INFIX\n        310     +++\n").unwrap();

    let program = format!("syntax \"{}\"\na +++ b", file.display());
    let session = Session::new();
    let tree = session.parse_source("<test>", &program).unwrap();
    let last = last_statement(&tree);
    assert_eq!(last.as_infix().unwrap().0, "+++");
}

fn half_temperature(args: &[TreeRef]) -> Result<TreeRef, RuntimeError> {
    match args.first().and_then(|a| a.as_real()) {
        Some(t) => Ok(Tree::real(t / 2.0, NOWHERE)),
        None => Err(RuntimeError::InvalidArguments("half_temperature")),
    }
}

#[test]
fn c_bodies_resolve_in_the_library_table() {
    ffi::register("half_temperature", half_temperature);
    let program = "temperature T:real is C \"half_temperature\"\ntemperature 20.0";
    assert_eq!(eval_ok(program).as_real(), Some(10.0));
}

#[test]
fn missing_c_symbol_is_a_runtime_error() {
    let (session, result) = run("f X:integer is C \"surely_not_registered\"\nf 1");
    assert!(session.had_errors());
    assert_eq!(source::render(&result), "f 1");
}

#[test]
fn parse_render_round_trip() {
    let corpus = [
        "42",
        "2.5",
        "\"some text\"",
        "identifier",
        "a + b * c",
        "f(x, y)",
        "x := 3",
        "factorial N when N > 0 is N * factorial(N-1)",
        "{ a; b; c }",
        "[x, y]",
        "if c then a else b",
        "-x",
        "x!",
    ];
    let session = Session::new();
    for text in &corpus {
        let first = session.parse_source("<one>", text).unwrap();
        let rendered = source::render(&first);
        let second = session.parse_source("<two>", &rendered).unwrap();
        assert!(
            Tree::equal(&first, &second),
            "round trip failed for {:?}: {:?} reparsed as {:?}",
            text,
            rendered,
            source::render(&second)
        );
    }
}

/// A toy backend that only compiles integer literals, doubling them on
/// invocation. Enough to check the delegation contract.
struct DoublingBackend {
    compiled: Vec<TreeRef>,
}

impl CodeGenerator for DoublingBackend {
    fn compile(&mut self, _scope: &TreeRef, source: &TreeRef) -> Result<CodeHandle, RuntimeError> {
        match source.as_integer() {
            Some(_) => {
                self.compiled.push(source.clone());
                Ok(self.compiled.len() - 1)
            }
            None => Err(RuntimeError::TypeMismatch("not a compilable form")),
        }
    }

    fn invoke(&mut self, handle: CodeHandle, _args: &[TreeRef]) -> Result<TreeRef, RuntimeError> {
        let tree = &self.compiled[handle];
        Ok(Tree::integer(tree.as_integer().unwrap() * 2, tree.pos))
    }
}

#[test]
fn backend_delegation_takes_precedence() {
    let mut session = Session::new();
    session.interpreter.backend = Some(RefCell::new(Box::new(DoublingBackend {
        compiled: Vec::new(),
    })));
    assert_eq!(session.run("<test>", "21").unwrap().as_integer(), Some(42));
    // Forms the backend rejects still evaluate in the interpreter
    assert_eq!(
        session.run("<test>", "\"left\" & \"right\"").unwrap().as_text(),
        Some("leftright")
    );
}

#[test]
fn native_values_box_and_unbox() {
    let backend = DoublingBackend {
        compiled: Vec::new(),
    };
    let boxed = backend.box_value(&NativeValue::Real(1.5), NOWHERE);
    assert_eq!(boxed.as_real(), Some(1.5));
    assert_eq!(
        backend.unbox(&Tree::name("true", NOWHERE)),
        Some(NativeValue::Boolean(true))
    );
    assert_eq!(backend.unbox(&Tree::name("other", NOWHERE)), None);
}

#[test]
fn booleans_and_conditionals() {
    assert!(eval_ok("1 < 2 and 2 < 3").is_name("true"));
    assert!(eval_ok("1 < 2 and 2 > 3").is_name("false"));
    assert!(eval_ok("not (1 < 2)").is_name("false"));
    assert_eq!(eval_ok("if 1 < 2 then 10 else 20").as_integer(), Some(10));
    assert_eq!(eval_ok("if 1 > 2 then 10 else 20").as_integer(), Some(20));
}

#[test]
fn unknown_forms_report_lookup_errors() {
    let (session, result) = run("frobnicate 42");
    assert!(session.had_errors());
    assert_eq!(source::render(&result), "frobnicate 42");
}

pub mod parse;
pub mod scan;
pub mod tree;

use crate::{
    errors::{Error, Errors, ErrorsRef, Severity},
    syntax::{
        scan::{Positions, Scanner, Token},
        tree::{INDENT, UNINDENT},
    },
};
use std::{
    cell::RefCell,
    collections::{HashMap, HashSet},
    fs,
    path::PathBuf,
    rc::Rc,
};

pub type SyntaxRef = Rc<RefCell<Syntax>>;

/// The default syntax table, compiled into the library. A `-style` option or
/// a `syntax` directive replaces or extends it at run time.
const STANDARD_SYNTAX: &str = include_str!("elfe.syntax");

/// A syntax reachable through an opening delimiter, parsed with its own
/// table until the matching closing delimiter.
#[derive(Debug)]
pub struct ChildSyntax {
    pub filename: String,
    pub table: SyntaxRef,
    pub delimiters: HashMap<String, String>,
}

/// Operator priorities and delimiter tables driving both the scanner and the
/// parser. There is no hard-coded grammar: everything here comes from a
/// syntax file.
#[derive(Debug, Default)]
pub struct Syntax {
    infix: HashMap<String, i32>,
    prefix: HashMap<String, i32>,
    postfix: HashMap<String, i32>,
    pub default_priority: i32,
    pub statement_priority: i32,
    pub function_priority: i32,
    comment_delimiters: HashMap<String, String>,
    text_delimiters: HashMap<String, String>,
    block_delimiters: HashMap<String, String>,
    known_tokens: HashSet<String>,
    known_prefixes: HashSet<String>,
    subsyntax_file: HashMap<String, String>,
    subsyntax: HashMap<String, Rc<RefCell<ChildSyntax>>>,
}

impl Syntax {
    pub fn empty() -> SyntaxRef {
        Rc::new(RefCell::new(Syntax {
            statement_priority: 100,
            function_priority: 200,
            ..Syntax::default()
        }))
    }

    /// The built-in default table.
    pub fn standard() -> SyntaxRef {
        let table = Syntax::empty();
        let errors = Errors::new();
        Syntax::read_source(&table, "<builtin>", STANDARD_SYNTAX, &[], &errors);
        table
    }

    pub fn infix_priority(&self, name: &str) -> i32 {
        match self.infix.get(name) {
            Some(p) if *p != 0 => *p,
            _ => self.default_priority,
        }
    }

    pub fn prefix_priority(&self, name: &str) -> i32 {
        match self.prefix.get(name) {
            Some(p) if *p != 0 => *p,
            _ => self.default_priority,
        }
    }

    pub fn postfix_priority(&self, name: &str) -> i32 {
        match self.postfix.get(name) {
            Some(p) if *p != 0 => *p,
            _ => self.default_priority,
        }
    }

    pub fn known_token(&self, name: &str) -> bool {
        self.known_tokens.contains(name)
    }

    pub fn known_prefix(&self, name: &str) -> bool {
        self.known_prefixes.contains(name)
    }

    pub fn is_comment(&self, opening: &str) -> Option<String> {
        self.comment_delimiters.get(opening).cloned()
    }

    pub fn is_text_delimiter(&self, opening: &str) -> Option<String> {
        self.text_delimiters.get(opening).cloned()
    }

    /// For an opening delimiter, the closing one; a closing delimiter maps
    /// to the empty string.
    pub fn is_block(&self, opening: &str) -> Option<String> {
        self.block_delimiters.get(opening).cloned()
    }

    /// Check if a token opens a child syntax; returns its table and the
    /// closing delimiter.
    pub fn has_special_syntax(&self, opening: &str) -> Option<(SyntaxRef, String)> {
        let filename = self.subsyntax_file.get(opening)?;
        let child = self.subsyntax.get(filename)?;
        let child = child.borrow();
        let closing = child.delimiters.get(opening)?;
        Some((child.table.clone(), closing.clone()))
    }

    fn declare_token(&mut self, text: &str) {
        for i in 1..text.chars().count() {
            let sub: String = text.chars().take(i).collect();
            self.known_prefixes.insert(sub);
        }
        self.known_tokens.insert(text.to_owned());
    }

    /// Read a syntax description from a file resolved in the search paths.
    pub fn read_file(
        table: &SyntaxRef,
        name: &str,
        paths: &[PathBuf],
        errors: &ErrorsRef,
    ) -> bool {
        match resolve_syntax_file(name, paths) {
            Some(path) => match fs::read_to_string(&path) {
                Ok(source) => {
                    Syntax::read_source(table, &path.to_string_lossy(), &source, paths, errors);
                    true
                }
                Err(_) => {
                    errors.borrow_mut().log(
                        Error::new("Cannot read syntax file $1", tree::NOWHERE, Severity::Parse)
                            .arg(name),
                    );
                    false
                }
            },
            None => {
                errors.borrow_mut().log(
                    Error::new("Cannot find syntax file $1", tree::NOWHERE, Severity::Parse)
                        .arg(name),
                );
                false
            }
        }
    }

    /// Read a syntax description from in-memory text, scanned with a fresh
    /// base table so that the tokens being declared do not influence their
    /// own scanning.
    pub fn read_source(
        table: &SyntaxRef,
        file: &str,
        source: &str,
        paths: &[PathBuf],
        errors: &ErrorsRef,
    ) {
        let base = Syntax::empty();
        let positions = Positions::new();
        let mut scanner = Scanner::new(file, source, base, &positions, errors.clone());
        Syntax::read_tokens(table, &mut scanner, 1, paths, errors);
    }

    /// The syntax-table state machine. Also invoked on the input stream
    /// itself when the parser meets the `syntax` directive.
    pub fn read_tokens(
        table: &SyntaxRef,
        scanner: &mut Scanner,
        starting_indents: u32,
        paths: &[PathBuf],
        errors: &ErrorsRef,
    ) {
        #[derive(PartialEq, PartialOrd)]
        enum State {
            Unknown,
            Prefix,
            Infix,
            Postfix,
            Comment,
            CommentDef,
            Text,
            TextDef,
            Block,
            BlockDef,
            SyntaxName,
            Syntax,
            SyntaxDef,
        }

        let mut state = State::Unknown;
        let mut entry = String::new();
        let mut priority = 0;
        let mut indents = starting_indents;
        let mut child: Option<Rc<RefCell<ChildSyntax>>> = None;

        loop {
            let tok = scanner.next_token(true);

            if tok == Token::Symbol || state >= State::Comment {
                let text = scanner.text_value().to_owned();
                table.borrow_mut().declare_token(&text);
            }

            match tok {
                Token::Eof | Token::Error => break,
                Token::Integer => priority = scanner.integer_value() as i32,
                Token::Indent | Token::ParOpen => indents += 1,
                Token::Unindent | Token::ParClose => {
                    if indents > 0 {
                        indents -= 1;
                    }
                    if indents == 0 {
                        break;
                    }
                }
                Token::Name | Token::Symbol | Token::String | Token::Quote => {
                    let mut text = scanner.text_value().to_owned();
                    match text.as_str() {
                        "NEWLINE" => text = "\n".to_owned(),
                        "INDENT" => text = INDENT.to_owned(),
                        "UNINDENT" => text = UNINDENT.to_owned(),
                        _ => (),
                    }

                    match text.as_str() {
                        "INFIX" => state = State::Infix,
                        "PREFIX" => state = State::Prefix,
                        "POSTFIX" => state = State::Postfix,
                        "BLOCK" => state = State::Block,
                        "COMMENT" => state = State::Comment,
                        "TEXT" => state = State::Text,
                        "SYNTAX" => state = State::SyntaxName,
                        "STATEMENT" => table.borrow_mut().statement_priority = priority,
                        "FUNCTION" => table.borrow_mut().function_priority = priority,
                        "DEFAULT" => table.borrow_mut().default_priority = priority,
                        _ => match state {
                            State::Unknown => {
                                // A quoted name at top level pulls in a
                                // whole syntax file
                                if (tok == Token::String || tok == Token::Quote)
                                    && indents == starting_indents
                                {
                                    Syntax::read_file(table, &text, paths, errors);
                                    if starting_indents == 0 {
                                        break;
                                    }
                                }
                            }
                            State::Prefix => {
                                table.borrow_mut().prefix.insert(text, priority);
                            }
                            State::Postfix => {
                                table.borrow_mut().postfix.insert(text, priority);
                            }
                            State::Infix => {
                                table.borrow_mut().infix.insert(text, priority);
                            }
                            State::Comment => {
                                entry = text;
                                state = State::CommentDef;
                            }
                            State::CommentDef => {
                                table
                                    .borrow_mut()
                                    .comment_delimiters
                                    .insert(entry.clone(), text);
                                state = State::Comment;
                            }
                            State::Text => {
                                entry = text;
                                state = State::TextDef;
                            }
                            State::TextDef => {
                                table
                                    .borrow_mut()
                                    .text_delimiters
                                    .insert(entry.clone(), text);
                                state = State::Text;
                            }
                            State::Block => {
                                entry = text.clone();
                                state = State::BlockDef;
                                let mut syn = table.borrow_mut();
                                syn.infix.insert(text, priority);
                            }
                            State::BlockDef => {
                                let mut syn = table.borrow_mut();
                                syn.block_delimiters.insert(entry.clone(), text.clone());
                                syn.block_delimiters.insert(text.clone(), String::new());
                                syn.infix.insert(text, priority);
                                state = State::Block;
                            }
                            State::SyntaxName => {
                                let filename = text;
                                let existing =
                                    table.borrow().subsyntax.get(&filename).cloned();
                                let loaded = match existing {
                                    Some(c) => c,
                                    None => {
                                        let c = Rc::new(RefCell::new(ChildSyntax {
                                            filename: filename.clone(),
                                            table: Syntax::empty(),
                                            delimiters: HashMap::new(),
                                        }));
                                        Syntax::read_file(
                                            &c.borrow().table,
                                            &filename,
                                            paths,
                                            errors,
                                        );
                                        table
                                            .borrow_mut()
                                            .subsyntax
                                            .insert(filename.clone(), c.clone());
                                        c
                                    }
                                };
                                child = Some(loaded);
                                state = State::Syntax;
                            }
                            State::Syntax => {
                                entry = text;
                                state = State::SyntaxDef;
                            }
                            State::SyntaxDef => {
                                if let Some(child) = &child {
                                    child
                                        .borrow_mut()
                                        .delimiters
                                        .insert(entry.clone(), text);
                                    table
                                        .borrow_mut()
                                        .subsyntax_file
                                        .insert(entry.clone(), child.borrow().filename.clone());
                                }
                                state = State::Syntax;
                            }
                        },
                    }
                }
                _ => (),
            }
        }
    }
}

/// Look for a syntax file in the given search paths, trying the bare name
/// and the name with a `.syntax` extension.
pub fn resolve_syntax_file(name: &str, paths: &[PathBuf]) -> Option<PathBuf> {
    let mut candidates = vec![PathBuf::from(name)];
    if !name.ends_with(".syntax") {
        candidates.push(PathBuf::from(format!("{}.syntax", name)));
    }
    for candidate in &candidates {
        if candidate.is_file() {
            return Some(candidate.clone());
        }
        for path in paths {
            let full = path.join(candidate);
            if full.is_file() {
                return Some(full);
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn standard_table_has_expected_priorities() {
        let syntax = Syntax::standard();
        let syn = syntax.borrow();
        assert!(syn.infix_priority("+") > syn.infix_priority("="));
        assert!(syn.infix_priority("*") > syn.infix_priority("+"));
        assert!(syn.infix_priority("is") < syn.statement_priority);
        assert_eq!(syn.infix_priority("^") & 1, 1);
        assert_eq!(syn.is_block("("), Some(")".to_owned()));
        assert_eq!(syn.is_block(")"), Some(String::new()));
        assert_eq!(syn.is_block(INDENT), Some(UNINDENT.to_owned()));
        assert_eq!(syn.is_comment("//"), Some("\n".to_owned()));
        assert_eq!(syn.is_text_delimiter("<<"), Some(">>".to_owned()));
        assert!(syn.known_token("<="));
        assert!(syn.known_prefix("<"));
    }

    #[test]
    fn inline_extension_declares_operators() {
        let table = Syntax::standard();
        let errors = Errors::new();
        Syntax::read_source(&table, "<ext>", "INFIX\n\t310\t+++\n", &[], &errors);
        assert_eq!(table.borrow().infix_priority("+++"), 310);
        assert!(table.borrow().known_token("+++"));
    }
}

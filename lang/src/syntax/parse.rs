use crate::{
    errors::{Error, ErrorsRef, Severity},
    syntax::{
        scan::{Scanner, Token},
        tree::{Tree, TreeRef, INDENT, UNINDENT},
        Syntax, SyntaxRef,
    },
};
use std::path::PathBuf;

/// An operator waiting for its right operand. An empty opcode stands for
/// prefix application.
struct Pending {
    opcode: String,
    argument: TreeRef,
    priority: i32,
    position: usize,
}

/// Operator-precedence parser entirely driven by the syntax table. Odd
/// priorities are right-associative: the stack flush compares against the
/// pending priority with the low bit masked off.
pub struct Parser {
    scanner: Scanner,
    syntax: SyntaxRef,
    paths: Vec<PathBuf>,
    errors: ErrorsRef,
    pending: Token,
    open_quote: String,
    close_quote: String,
    comments: Vec<String>,
    commented: Option<TreeRef>,
    beginning_line: bool,
    had_space_before: bool,
    had_space_after: bool,
    signed_constants: bool,
}

impl Parser {
    pub fn new(
        scanner: Scanner,
        syntax: SyntaxRef,
        paths: Vec<PathBuf>,
        errors: ErrorsRef,
        signed_constants: bool,
    ) -> Parser {
        Parser {
            scanner,
            syntax,
            paths,
            errors,
            pending: Token::None,
            open_quote: String::new(),
            close_quote: String::new(),
            comments: Vec::new(),
            commented: None,
            beginning_line: true,
            had_space_before: false,
            had_space_after: false,
            signed_constants,
        }
    }

    /// Parse a whole input, up to end of file.
    pub fn parse_all(&mut self) -> Option<TreeRef> {
        self.parse("")
    }

    fn report(&mut self, error: Error) {
        self.errors.borrow_mut().log(error);
    }

    fn add_comments(&mut self, to: &TreeRef, before: bool) {
        let comments = std::mem::take(&mut self.comments);
        to.add_comments(comments, before);
    }

    /// Next token, skipping comments, reading long text, folding newlines
    /// and handling the `syntax` directive inline.
    fn next_token(&mut self) -> Token {
        loop {
            let mut pend = self.pending;
            if pend != Token::None && pend != Token::Newline {
                self.pending = Token::None;
                self.beginning_line = false;
                return pend;
            }

            let result = self.scanner.next_token(false);
            self.had_space_before = self.scanner.had_space_before();
            self.had_space_after = self.scanner.had_space_after();

            match result {
                Token::Name | Token::Symbol => {
                    let opening = self.scanner.name_value().to_owned();
                    if opening == "syntax" || opening == "SYNTAX" {
                        Syntax::read_tokens(
                            &self.syntax.clone(),
                            &mut self.scanner,
                            0,
                            &self.paths.clone(),
                            &self.errors.clone(),
                        );
                        continue;
                    }
                    let comment_closing = self.syntax.borrow().is_comment(&opening);
                    if let Some(closing) = comment_closing {
                        // Skip comments, keep looking to get the right
                        // indentation
                        let comment = format!("{}{}", opening, self.scanner.comment(&closing, true));
                        let comment = comment.trim_end_matches('\n').to_owned();
                        self.comments.push(comment);
                        if closing == "\n" && pend == Token::None {
                            // Comments after a token attach to that token
                            if !self.beginning_line && !self.comments.is_empty() {
                                if let Some(commented) = self.commented.take() {
                                    self.add_comments(&commented, false);
                                }
                            }
                            self.pending = Token::Newline;
                            self.beginning_line = true;
                        }
                        continue;
                    }
                    let text_closing = self.syntax.borrow().is_text_delimiter(&opening);
                    if let Some(closing) = text_closing {
                        let mut long_text = self.scanner.comment(&closing, false);
                        if long_text.ends_with(&closing) {
                            long_text.truncate(long_text.len() - closing.len());
                        }
                        self.scanner.set_text_value(&long_text);
                        self.open_quote = opening;
                        self.close_quote = closing.clone();
                        if pend == Token::Newline {
                            self.pending = Token::LongString;
                            return Token::Newline;
                        }
                        if closing == "\n" && pend == Token::None {
                            self.pending = Token::Newline;
                            self.beginning_line = true;
                        } else {
                            self.beginning_line = false;
                        }
                        return Token::LongString;
                    }

                    // An infix with substatement priority takes over a
                    // pending newline, e.g. 'else' after an indented block
                    if pend == Token::Newline {
                        let takes_over = {
                            let syntax = self.syntax.borrow();
                            syntax.prefix_priority(&opening) == syntax.default_priority
                                && syntax.infix_priority(&opening) < syntax.statement_priority
                        };
                        if takes_over {
                            self.pending = Token::None;
                            pend = Token::None;
                        }
                    }
                    self.beginning_line = false;
                }
                Token::Newline => {
                    // Combine newline with any previous pending one
                    self.pending = Token::Newline;
                    self.beginning_line = true;
                    continue;
                }
                Token::Unindent => {
                    // Add a newline unless what comes next takes it over
                    self.pending = Token::Newline;
                    self.beginning_line = true;
                    return result;
                }
                Token::Indent => {
                    // A newline followed by indent is just the indent
                    self.pending = Token::None;
                    self.beginning_line = true;
                    return result;
                }
                _ => {
                    self.beginning_line = false;
                }
            }

            // If another token arrived with a newline still pending,
            // deliver the newline first
            if pend != Token::None {
                self.pending = result;
                self.beginning_line = true;
                return pend;
            }
            return result;
        }
    }

    /// Unary minus on a literal folds into a signed constant.
    fn create_prefix(&self, left: TreeRef, right: TreeRef, pos: usize) -> TreeRef {
        if self.signed_constants && left.is_name("-") {
            if let Some(iv) = right.as_integer() {
                return Tree::integer(-iv, right.pos);
            }
            if let Some(rv) = right.as_real() {
                return Tree::real(-rv, right.pos);
            }
        }
        Tree::prefix(left, right, pos)
    }

    fn pop(&self, stack: &mut Vec<Pending>, tail: TreeRef) -> TreeRef {
        let prev = stack.pop().unwrap();
        if prev.opcode.is_empty() {
            self.create_prefix(prev.argument, tail, prev.position)
        } else {
            Tree::infix(&prev.opcode, prev.argument, tail, prev.position)
        }
    }

    /// Parse until the given closing delimiter (empty at top level,
    /// `UNINDENT` inside indentation blocks).
    pub fn parse(&mut self, closing: &str) -> Option<TreeRef> {
        let default_priority;
        let function_priority;
        let statement_priority;
        let paren_priority;
        {
            let syntax = self.syntax.borrow();
            default_priority = syntax.default_priority;
            function_priority = syntax.function_priority;
            statement_priority = syntax.statement_priority;
            paren_priority = syntax.infix_priority(closing);
        }

        let mut result: Option<TreeRef> = None;
        let mut left: Option<TreeRef> = None;
        let mut result_priority = default_priority;
        let mut is_expression = false;
        let mut new_statement = true;
        let mut infix = String::new();
        let mut stack: Vec<Pending> = Vec::new();
        let mut done = false;

        // Inside a () block, we are in expression mode right away
        if !closing.is_empty() && paren_priority > statement_priority {
            new_statement = false;
            is_expression = true;
        }

        while !done {
            let was_beginning_line = self.beginning_line;
            let mut right: Option<TreeRef> = None;
            let mut prefix_priority = default_priority;
            let mut infix_priority = default_priority;
            let tok = self.next_token();

            // Comments seen after a token attach to that token
            if !was_beginning_line && !self.comments.is_empty() {
                if let Some(commented) = self.commented.take() {
                    self.add_comments(&commented, false);
                    self.commented = Some(commented);
                }
            }

            let pos = self.scanner.position();
            match tok {
                Token::Eof | Token::Error => {
                    done = true;
                    if !closing.is_empty() && closing != UNINDENT {
                        self.report(
                            Error::new("Unexpected end of text, expected $1", pos, Severity::Parse)
                                .arg(closing),
                        );
                    }
                }
                Token::Integer => {
                    right = Some(Tree::integer(self.scanner.integer_value(), pos));
                    prefix_priority = function_priority;
                }
                Token::Real => {
                    right = Some(Tree::real(self.scanner.real_value(), pos));
                    prefix_priority = function_priority;
                }
                Token::LongString => {
                    right = Some(Tree::text(
                        self.scanner.text_value(),
                        &self.open_quote.clone(),
                        &self.close_quote.clone(),
                        pos,
                    ));
                    if result.is_none() && new_statement {
                        is_expression = false;
                    }
                    prefix_priority = function_priority;
                }
                Token::String | Token::Quote => {
                    let quote = if tok == Token::String { "\"" } else { "'" };
                    right = Some(Tree::text(self.scanner.text_value(), quote, quote, pos));
                    if result.is_none() && new_statement {
                        is_expression = false;
                    }
                    prefix_priority = function_priority;
                }
                Token::Name | Token::Symbol => {
                    let name = self.scanner.name_value().to_owned();
                    let special = self.syntax.borrow().has_special_syntax(&name);
                    if name == closing {
                        done = true;
                    } else if let Some((child_syntax, child_closing)) = special {
                        // Read the input with the child syntax
                        let old_table = self.scanner.set_syntax(child_syntax.clone());
                        let old_syntax =
                            std::mem::replace(&mut self.syntax, child_syntax);
                        let child = self.parse(&child_closing);
                        self.scanner.set_syntax(old_table);
                        self.syntax = old_syntax;
                        let child = child.unwrap_or_else(|| Tree::name("", pos));
                        right = Some(Tree::prefix(Tree::name(&name, pos), child, pos));
                        prefix_priority = function_priority;
                    } else if result.is_none() {
                        // First thing in this statement, or the right of an
                        // infix: 'A and not B' parses as 'A and (not B)'
                        let syntax = self.syntax.borrow();
                        prefix_priority = syntax.prefix_priority(&name);
                        right = Some(Tree::name(&name, pos));
                        if prefix_priority == default_priority {
                            prefix_priority = function_priority;
                        }
                        if new_statement && tok == Token::Name && left.is_none() {
                            is_expression = false;
                        }
                    } else {
                        // Discriminate infix, postfix and prefix
                        let syntax = self.syntax.borrow();
                        infix_priority = syntax.infix_priority(&name);
                        let prefix_vs_infix = syntax.prefix_priority(&name);
                        if infix_priority != default_priority
                            && (prefix_vs_infix == default_priority
                                || !self.had_space_before
                                || self.had_space_after)
                        {
                            // We got an infix
                            left = result.take();
                            infix = name;
                        } else {
                            let postfix_priority = syntax.postfix_priority(&name);
                            drop(syntax);
                            if postfix_priority != default_priority {
                                // Postfix: flush higher priority items,
                                // e.g. X:integer!
                                while let Some(prev) = stack.last() {
                                    if !done
                                        && prev.priority != default_priority
                                        && postfix_priority > (prev.priority & !1)
                                    {
                                        break;
                                    }
                                    let flushed = self.pop(&mut stack, result.take().unwrap());
                                    result = Some(flushed);
                                }
                                right = Some(Tree::postfix(
                                    result.take().unwrap(),
                                    Tree::name(&name, pos),
                                    pos,
                                ));
                                prefix_priority = postfix_priority;
                            } else {
                                // No priority: this is a prefix by default
                                right = Some(Tree::name(&name, pos));
                                prefix_priority = prefix_vs_infix;
                                if prefix_priority == default_priority {
                                    prefix_priority = function_priority;
                                    if new_statement && tok == Token::Name {
                                        is_expression = false;
                                    }
                                }
                            }
                        }
                    }
                }
                Token::Newline => {
                    // Consider new-line as an infix operator
                    infix = "\n".to_owned();
                    infix_priority = self.syntax.borrow().infix_priority("\n");
                    left = result.take();
                }
                Token::ParClose => {
                    if self.scanner.name_value() != closing {
                        self.report(
                            Error::new(
                                "Mismatched parentheses: got $1, expected $2",
                                pos,
                                Severity::Parse,
                            )
                            .arg(self.scanner.name_value())
                            .arg(closing),
                        );
                    }
                    done = true;
                }
                Token::Unindent => {
                    if closing != UNINDENT {
                        self.report(
                            Error::new("Mismatched indentation, expected $1", pos, Severity::Parse)
                                .arg(closing),
                        );
                    }
                    done = true;
                }
                Token::Indent | Token::ParOpen => {
                    if tok == Token::Indent {
                        self.scanner.set_token_text(INDENT);
                    }
                    let blk_opening = self.scanner.token_text().to_owned();
                    let known_block = self.syntax.borrow().is_block(&blk_opening);
                    let blk_closing = match known_block {
                        Some(c) if !c.is_empty() => c,
                        _ => {
                            self.report(
                                Error::new("Unknown parenthese type: $1", pos, Severity::Parse)
                                    .arg(&blk_opening),
                            );
                            String::new()
                        }
                    };
                    let old_indent = if tok == Token::ParOpen {
                        Some(self.scanner.open_paren())
                    } else {
                        None
                    };
                    prefix_priority = self.syntax.borrow().infix_priority(&blk_opening);

                    // Parse the contents of the block
                    let pending_comments = std::mem::take(&mut self.comments);
                    let child = self.parse(&blk_closing);
                    if let Some(old) = old_indent {
                        self.scanner.close_paren(old);
                    }
                    let child = child.unwrap_or_else(|| Tree::name("", pos));
                    right = Some(Tree::block(child, &blk_opening, &blk_closing, pos));
                    let mut comments = pending_comments;
                    comments.extend(std::mem::take(&mut self.comments));
                    self.comments = comments;
                }
                Token::None => unreachable!("pending token leaked into the parser"),
            }

            // Attach leading comments to the tree we just built
            if let Some(r) = &right {
                self.commented = Some(r.clone());
                if !self.comments.is_empty() {
                    let commented = r.clone();
                    self.add_comments(&commented, true);
                }
            } else if left.is_some()
                && (self.pending == Token::None || self.pending == Token::Newline)
            {
                // 'then' will be an infix, defer comments to the next right
                self.commented = None;
            }

            // Check what is the current result
            if result.is_none() && left.is_none() {
                // First thing we parse in this statement
                result = right.take();
                result_priority = prefix_priority;
                if result.is_some() && result_priority >= statement_priority {
                    new_statement = false;
                }
            } else if let Some(left_tree) = left.take() {
                // Check if we had a statement separator
                if infix_priority < statement_priority {
                    new_statement = true;
                    is_expression = false;
                }

                if prefix_priority != default_priority {
                    // 'A and not B': push 'A and', start over with 'not'
                    let st_pos = if new_statement { left_tree.pos } else { pos };
                    stack.push(Pending {
                        opcode: infix.clone(),
                        argument: left_tree,
                        priority: infix_priority,
                        position: st_pos,
                    });
                    result = right.take();
                    result_priority = prefix_priority;
                } else {
                    // Flush the stack according to priorities:
                    // A + B * C, we got '*': keep A+... on stack
                    let mut flushed = left_tree;
                    while let Some(prev) = stack.last() {
                        if !done
                            && prev.priority != default_priority
                            && infix_priority > (prev.priority & !1)
                        {
                            break;
                        }
                        flushed = self.pop(&mut stack, flushed);
                    }
                    if done {
                        // End of text: the result is what we just got
                        result = Some(flushed);
                    } else {
                        // Something like A+B+C, just got the second +
                        let st_pos = if new_statement { flushed.pos } else { pos };
                        stack.push(Pending {
                            opcode: infix.clone(),
                            argument: flushed,
                            priority: infix_priority,
                            position: st_pos,
                        });
                        result = None;
                    }
                }
            } else if let Some(right_tree) = right.take() {
                // A prefix operand for the current result
                if prefix_priority < statement_priority {
                    new_statement = true;
                    is_expression = false;
                }

                // 'A.B x,y' parses as '(A.B) (x,y)'
                if prefix_priority <= result_priority {
                    while let Some(prev) = stack.last() {
                        if !done
                            && prev.priority != default_priority
                            && result_priority > (prev.priority & !1)
                        {
                            break;
                        }
                        let flushed = self.pop(&mut stack, result.take().unwrap());
                        result = Some(flushed);
                    }
                }

                // Check if new statement
                if !is_expression
                    && result_priority > statement_priority
                    && stack
                        .last()
                        .map_or(true, |prev| prev.priority < statement_priority)
                {
                    result_priority = statement_priority;
                }

                // Push a recognized prefix op
                stack.push(Pending {
                    opcode: String::new(),
                    argument: result.take().unwrap(),
                    priority: result_priority,
                    position: pos,
                });
                result = Some(right_tree);
                result_priority = prefix_priority;
            }
        }

        if !stack.is_empty() {
            if result.is_none() {
                let last = stack.pop().unwrap();
                result = if last.opcode == "\n" || last.opcode.is_empty() {
                    Some(last.argument)
                } else {
                    // A trailing infix becomes a postfix operator
                    Some(Tree::postfix(
                        last.argument,
                        Tree::name(&last.opcode, last.position),
                        last.position,
                    ))
                };
            }
            while !stack.is_empty() {
                let flushed = self.pop(&mut stack, result.take().unwrap());
                result = Some(flushed);
            }
        }

        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{errors::Errors, syntax::scan::Positions};

    pub fn parse_text(source: &str) -> Option<TreeRef> {
        let syntax = Syntax::standard();
        let positions = Positions::new();
        let errors = Errors::new();
        let scanner = Scanner::new("<test>", source, syntax.clone(), &positions, errors.clone());
        let mut parser = Parser::new(scanner, syntax, Vec::new(), errors, true);
        parser.parse_all()
    }

    #[test]
    fn left_associative_addition() {
        let tree = parse_text("a + b + c").unwrap();
        let (name, left, right) = tree.as_infix().unwrap();
        assert_eq!(name, "+");
        assert!(right.is_name("c"));
        let (name, left, right) = left.as_infix().unwrap();
        assert_eq!(name, "+");
        assert!(left.is_name("a"));
        assert!(right.is_name("b"));
    }

    #[test]
    fn odd_priority_is_right_associative() {
        let tree = parse_text("a ^ b ^ c").unwrap();
        let (name, left, right) = tree.as_infix().unwrap();
        assert_eq!(name, "^");
        assert!(left.is_name("a"));
        let (name, left, right) = right.as_infix().unwrap();
        assert_eq!(name, "^");
        assert!(left.is_name("b"));
        assert!(right.is_name("c"));
    }

    #[test]
    fn multiplication_binds_tighter() {
        let tree = parse_text("2 + 3 * 4").unwrap();
        let (name, left, right) = tree.as_infix().unwrap();
        assert_eq!(name, "+");
        assert_eq!(left.as_integer(), Some(2));
        let (name, left, right) = right.as_infix().unwrap();
        assert_eq!(name, "*");
        assert_eq!(left.as_integer(), Some(3));
        assert_eq!(right.as_integer(), Some(4));
    }

    #[test]
    fn braces_and_indent_blocks_are_equivalent() {
        let braces = parse_text("{ A; B; C }").unwrap();
        let indented = parse_text("X\n    A\n    B\n    C").unwrap();
        let (_, body) = indented.as_prefix().unwrap();
        let (braced_child, _, _) = braces.as_block().unwrap();
        let (indent_child, opening, closing) = body.as_block().unwrap();
        assert_eq!(opening, INDENT);
        assert_eq!(closing, UNINDENT);
        // A;B;C vs A\nB\nC: same structure up to separator names
        fn statements(tree: &TreeRef, out: &mut Vec<String>) {
            match tree.as_infix() {
                Some((name, left, right)) if name == ";" || name == "\n" => {
                    statements(&left, out);
                    statements(&right, out);
                }
                _ => out.push(tree.as_name().unwrap_or("?").to_owned()),
            }
        }
        let mut from_braces = Vec::new();
        let mut from_indent = Vec::new();
        statements(&braced_child, &mut from_braces);
        statements(&indent_child, &mut from_indent);
        assert_eq!(from_braces, vec!["A", "B", "C"]);
        assert_eq!(from_indent, from_braces);
    }

    #[test]
    fn empty_parentheses_hold_the_empty_name() {
        let tree = parse_text("f()").unwrap();
        let (_, arg) = tree.as_prefix().unwrap();
        let (child, opening, closing) = arg.as_block().unwrap();
        assert_eq!((opening, closing), ("(", ")"));
        assert!(child.is_nil());
    }

    #[test]
    fn unary_minus_folds_into_literals() {
        let tree = parse_text("abs -2.5").unwrap();
        let (name, arg) = tree.as_prefix().unwrap();
        assert!(name.is_name("abs"));
        assert_eq!(arg.as_real(), Some(-2.5));
    }

    #[test]
    fn spacing_disambiguates_minus() {
        // 'a - b' is an infix subtraction
        let tree = parse_text("a - b").unwrap();
        assert!(tree.as_infix().map(|(n, _, _)| n == "-").unwrap_or(false));
        // 'write -a, b' applies write to the difference, as documented
        let tree = parse_text("write -a").unwrap();
        let (name, _) = tree.as_prefix().unwrap();
        assert!(name.is_name("write"));
    }

    #[test]
    fn comments_attach_to_neighbouring_tree() {
        let tree = parse_text("// leading\nvalue").unwrap();
        let (before, _) = tree.comments_info().unwrap();
        assert_eq!(before, vec!["// leading"]);
    }

    #[test]
    fn long_text_keeps_delimiters() {
        let tree = parse_text("<<hello\nworld>>").unwrap();
        assert_eq!(tree.as_text(), Some("hello\nworld"));
    }

    #[test]
    fn mismatched_paren_reports_but_recovers() {
        let syntax = Syntax::standard();
        let positions = Positions::new();
        let errors = Errors::new();
        let scanner = Scanner::new("<test>", "(a]", syntax.clone(), &positions, errors.clone());
        let mut parser = Parser::new(scanner, syntax, Vec::new(), errors.clone(), true);
        let tree = parser.parse_all();
        assert!(tree.is_some());
        assert!(errors.borrow().had_errors());
    }
}

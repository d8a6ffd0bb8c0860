use crate::{
    errors::{Error, ErrorsRef, Severity},
    syntax::SyntaxRef,
};
use std::{cell::RefCell, rc::Rc};

pub type PositionsRef = Rc<RefCell<Positions>>;

/// Maps global source positions back to file, line and column. Each scanned
/// source registers a range; positions are offsets into the concatenation of
/// all registered sources.
#[derive(Debug, Default)]
pub struct Positions {
    ranges: Vec<SourceRange>,
    current: usize,
}

#[derive(Debug)]
struct SourceRange {
    start: usize,
    file: String,
    source: String,
}

impl Positions {
    pub fn new() -> PositionsRef {
        Rc::new(RefCell::new(Positions::default()))
    }

    /// Register a source under the given file name, returning the global
    /// position of its first character.
    pub fn open_source(&mut self, file: &str, source: &str) -> usize {
        let start = self.current;
        self.current += source.chars().count();
        self.ranges.push(SourceRange {
            start,
            file: file.to_owned(),
            source: source.to_owned(),
        });
        start
    }

    /// Resolve a global position to (file, line, column), all 1-based.
    pub fn locate(&self, pos: usize) -> (String, usize, usize) {
        for range in self.ranges.iter().rev() {
            if pos >= range.start {
                let mut line = 1;
                let mut column = 1;
                for c in range.source.chars().take(pos - range.start) {
                    if c == '\n' {
                        line += 1;
                        column = 1;
                    } else {
                        column += 1;
                    }
                }
                return (range.file.clone(), line, column);
            }
        }
        ("<unknown>".to_owned(), 0, 0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Token {
    None,
    Eof,
    Integer,
    Real,
    String,
    Quote,
    LongString,
    Name,
    Symbol,
    Newline,
    ParOpen,
    ParClose,
    Indent,
    Unindent,
    Error,
}

/// Character-level scanner. Tokens are names, symbols, numbers, text and the
/// virtual indentation delimiters; what constitutes a multi-character symbol
/// is driven by the syntax table's known tokens.
pub struct Scanner {
    syntax: SyntaxRef,
    errors: ErrorsRef,
    input: Vec<char>,
    offset: usize,
    base: usize,
    token_text: String,
    text_value: String,
    int_value: i64,
    real_value: f64,
    number_base: u32,
    indents: Vec<usize>,
    indent: usize,
    indent_char: char,
    column: usize,
    checking_indent: bool,
    pending_unindents: usize,
    paren_depth: usize,
    had_space_before: bool,
    had_space_after: bool,
    position: usize,
}

impl Scanner {
    pub fn new(
        file: &str,
        source: &str,
        syntax: SyntaxRef,
        positions: &PositionsRef,
        errors: ErrorsRef,
    ) -> Scanner {
        let base = positions.borrow_mut().open_source(file, source);
        Scanner {
            syntax,
            errors,
            input: source.chars().collect(),
            offset: 0,
            base,
            token_text: String::new(),
            text_value: String::new(),
            int_value: 0,
            real_value: 0.0,
            number_base: 10,
            indents: Vec::new(),
            indent: 0,
            indent_char: '\0',
            column: 0,
            checking_indent: false,
            pending_unindents: 0,
            paren_depth: 0,
            had_space_before: false,
            had_space_after: false,
            position: base,
        }
    }

    /// Swap the syntax table, returning the previous one. Used when handing
    /// the stream to a child syntax.
    pub fn set_syntax(&mut self, syntax: SyntaxRef) -> SyntaxRef {
        std::mem::replace(&mut self.syntax, syntax)
    }

    pub fn token_text(&self) -> &str {
        &self.token_text
    }

    pub fn set_token_text(&mut self, t: &str) {
        self.token_text = t.to_owned();
    }

    pub fn name_value(&self) -> &str {
        &self.text_value
    }

    pub fn text_value(&self) -> &str {
        &self.text_value
    }

    pub fn set_text_value(&mut self, t: &str) {
        self.text_value = t.to_owned();
    }

    pub fn integer_value(&self) -> i64 {
        self.int_value
    }

    pub fn real_value(&self) -> f64 {
        self.real_value
    }

    pub fn number_base(&self) -> u32 {
        self.number_base
    }

    pub fn position(&self) -> usize {
        self.position
    }

    pub fn indent(&self) -> usize {
        self.indent
    }

    pub fn had_space_before(&self) -> bool {
        self.had_space_before
    }

    pub fn had_space_after(&self) -> bool {
        self.had_space_after
    }

    fn peek(&self) -> Option<char> {
        self.input.get(self.offset).copied()
    }

    fn peek_at(&self, ahead: usize) -> Option<char> {
        self.input.get(self.offset + ahead).copied()
    }

    fn advance(&mut self) -> Option<char> {
        let c = self.peek();
        if c.is_some() {
            self.offset += 1;
        }
        c
    }

    fn report(&mut self, error: Error) {
        self.errors.borrow_mut().log(error);
    }

    /// Suspend indentation tracking while inside an explicit bracket pair.
    /// Returns the indent to restore on the matching close.
    pub fn open_paren(&mut self) -> usize {
        self.paren_depth += 1;
        self.indent
    }

    pub fn close_paren(&mut self, old_indent: usize) {
        if self.paren_depth > 0 {
            self.paren_depth -= 1;
        }
        self.indent = old_indent;
    }

    /// Read the next token. In `hungry` mode symbols are maximal runs of
    /// punctuation regardless of the known-token table, which is how syntax
    /// files declare operators that are not yet known.
    pub fn next_token(&mut self, hungry: bool) -> Token {
        // Deliver unindents one at a time
        if self.pending_unindents > 0 {
            self.pending_unindents -= 1;
            self.token_text.clear();
            self.text_value.clear();
            return Token::Unindent;
        }

        let mut had_space = false;
        loop {
            match self.peek() {
                Some(' ') | Some('\t') => {
                    let c = self.advance().unwrap();
                    had_space = true;
                    if self.checking_indent {
                        if self.indent_char == '\0' {
                            self.indent_char = c;
                        } else if self.indent_char != c {
                            self.report(Error::new(
                                "Mixed tabs and spaces in indentation",
                                self.base + self.offset,
                                Severity::Lex,
                            ));
                            self.indent_char = c;
                        }
                        self.column += 1;
                    }
                }
                Some('\r') => {
                    self.advance();
                }
                Some('\n') => {
                    self.position = self.base + self.offset;
                    self.advance();
                    self.checking_indent = true;
                    self.column = 0;
                    self.token_text = "\n".to_owned();
                    self.text_value.clear();
                    self.had_space_before = had_space;
                    self.had_space_after = true;
                    return Token::Newline;
                }
                _ => break,
            }
        }

        // A significant character (or EOF) ends indentation checking
        if self.checking_indent && self.paren_depth == 0 {
            self.checking_indent = false;
            let column = self.column;
            if self.peek().is_some() {
                if column > self.indent {
                    self.indents.push(self.indent);
                    self.indent = column;
                    self.token_text.clear();
                    return Token::Indent;
                }
                while column < self.indent {
                    match self.indents.pop() {
                        Some(enclosing) => {
                            self.indent = enclosing;
                            self.pending_unindents += 1;
                        }
                        None => {
                            self.indent = column;
                            break;
                        }
                    }
                }
                if self.pending_unindents > 0 {
                    self.pending_unindents -= 1;
                    self.token_text.clear();
                    return Token::Unindent;
                }
            }
        } else if self.checking_indent {
            self.checking_indent = false;
        }

        self.position = self.base + self.offset;
        self.had_space_before = had_space;

        let c = match self.peek() {
            Some(c) => c,
            None => {
                // Close any indentation still open at end of file
                if let Some(enclosing) = self.indents.pop() {
                    self.indent = enclosing;
                    self.token_text.clear();
                    return Token::Unindent;
                }
                return Token::Eof;
            }
        };

        let token = if c.is_ascii_digit() {
            self.scan_number()
        } else if c.is_alphabetic() || c == '_' {
            self.scan_name()
        } else if c == '"' || c == '\'' {
            self.scan_text(c)
        } else if c.is_whitespace() {
            // Unicode blanks we did not skip above
            self.advance();
            return self.next_token(hungry);
        } else {
            self.scan_symbol(hungry)
        };

        self.had_space_after = matches!(self.peek(), Some(' ') | Some('\t') | Some('\n') | None);
        token
    }

    fn digit_value(c: char, base: u32) -> Option<u32> {
        c.to_digit(base)
    }

    fn scan_digits(&mut self, base: u32, text: &mut String, digits: &mut Vec<u32>) -> bool {
        let mut any = false;
        let mut last_underscore = false;
        while let Some(c) = self.peek() {
            if c == '_' {
                if last_underscore || !any {
                    self.report(
                        Error::new("Invalid use of '_' in number", self.position, Severity::Lex)
                    );
                }
                last_underscore = true;
                text.push(c);
                self.advance();
            } else if let Some(d) = Scanner::digit_value(c, base) {
                digits.push(d);
                text.push(c);
                any = true;
                last_underscore = false;
                self.advance();
            } else {
                break;
            }
        }
        if last_underscore {
            self.report(Error::new(
                "Number cannot end with '_'",
                self.position,
                Severity::Lex,
            ));
        }
        any
    }

    fn scan_number(&mut self) -> Token {
        let mut text = String::new();
        let mut base = 10u32;
        let mut digits = Vec::new();
        self.scan_digits(10, &mut text, &mut digits);

        // Base prefix, e.g. 16#FF
        let mut based = false;
        if self.peek() == Some('#') && self.peek_at(1).map_or(false, |c| c.is_ascii_alphanumeric())
        {
            let wanted: i64 = digits
                .iter()
                .fold(0i64, |acc, d| acc.saturating_mul(10).saturating_add(*d as i64));
            if wanted < 2 || wanted > 36 {
                self.report(Error::new(
                    "The base $1 is not valid, not in 2..36",
                    self.position,
                    Severity::Lex,
                ).arg(wanted));
                base = 10;
            } else {
                base = wanted as u32;
            }
            based = true;
            text.push('#');
            self.advance();
            digits.clear();
            if !self.scan_digits(base, &mut text, &mut digits) {
                self.report(Error::new(
                    "Invalid digit for base $1",
                    self.position,
                    Severity::Lex,
                ).arg(base));
            }
        }

        let mut mantissa = 0f64;
        let mut int_value: i64 = 0;
        let mut overflow = false;
        for d in &digits {
            mantissa = mantissa * base as f64 + *d as f64;
            int_value = match int_value
                .checked_mul(base as i64)
                .and_then(|v| v.checked_add(*d as i64))
            {
                Some(v) => v,
                None => {
                    overflow = true;
                    0
                }
            };
        }

        // Fractional part, folded as one division to stay close to the
        // nearest representable value
        let mut real = false;
        if self.peek() == Some('.')
            && self
                .peek_at(1)
                .map_or(false, |c| Scanner::digit_value(c, base).is_some())
        {
            real = true;
            text.push('.');
            self.advance();
            let mut fraction = Vec::new();
            self.scan_digits(base, &mut text, &mut fraction);
            let mut numerator = 0f64;
            let mut denominator = 1f64;
            for d in &fraction {
                numerator = numerator * base as f64 + *d as f64;
                denominator *= base as f64;
            }
            mantissa += numerator / denominator;
        }

        // Exponent, a power of the base: 1.5E3, 16#F#E2
        let mut exponent: i64 = 0;
        let mut has_exponent = false;
        let at_exponent = |c: Option<char>| matches!(c, Some('e') | Some('E'));
        if based && self.peek() == Some('#') && at_exponent(self.peek_at(1)) {
            text.push('#');
            self.advance();
            has_exponent = true;
        } else if !based || base <= 14 {
            if at_exponent(self.peek())
                && self
                    .peek_at(1)
                    .map_or(false, |c| c.is_ascii_digit() || c == '+' || c == '-')
            {
                has_exponent = true;
            }
        }
        if has_exponent {
            text.push(self.advance().unwrap()); // the E itself
            let mut negative = false;
            if let Some(sign) = self.peek() {
                if sign == '+' || sign == '-' {
                    negative = sign == '-';
                    text.push(sign);
                    self.advance();
                }
            }
            let mut exp_digits = Vec::new();
            if !self.scan_digits(10, &mut text, &mut exp_digits) {
                self.report(Error::new(
                    "Missing exponent in number",
                    self.position,
                    Severity::Lex,
                ));
            }
            exponent = exp_digits
                .iter()
                .fold(0i64, |acc, d| acc.saturating_mul(10).saturating_add(*d as i64));
            if negative {
                exponent = -exponent;
                real = true;
            }
        }

        self.token_text = text;
        self.number_base = base;
        if real {
            self.real_value = mantissa * (base as f64).powi(exponent as i32);
            return Token::Real;
        }
        if has_exponent {
            for _ in 0..exponent {
                int_value = match int_value.checked_mul(base as i64) {
                    Some(v) => v,
                    None => {
                        overflow = true;
                        break;
                    }
                };
            }
        }
        if overflow {
            self.report(Error::new(
                "Integer literal $1 does not fit in 64 bits",
                self.position,
                Severity::Lex,
            ).arg(&self.token_text));
        }
        self.int_value = int_value;
        Token::Integer
    }

    fn scan_name(&mut self) -> Token {
        let mut text = String::new();
        let mut last_underscore = false;
        while let Some(c) = self.peek() {
            if c.is_alphanumeric() || c == '_' {
                if c == '_' && last_underscore {
                    self.report(Error::new(
                        "Two consecutive underscores in name",
                        self.position,
                        Severity::Lex,
                    ));
                }
                last_underscore = c == '_';
                text.push(c);
                self.advance();
            } else {
                break;
            }
        }
        self.token_text = text.clone();
        self.text_value = text;
        Token::Name
    }

    fn scan_text(&mut self, quote: char) -> Token {
        let mut value = String::new();
        let mut text = String::new();
        text.push(quote);
        self.advance();
        loop {
            match self.peek() {
                Some(c) if c == quote => {
                    text.push(c);
                    self.advance();
                    // A doubled quote embeds the quote character
                    if self.peek() == Some(quote) {
                        value.push(quote);
                        text.push(quote);
                        self.advance();
                    } else {
                        break;
                    }
                }
                Some('\n') | None => {
                    self.report(Error::new(
                        "End of line in the middle of a text",
                        self.position,
                        Severity::Lex,
                    ));
                    self.token_text = text;
                    self.text_value = value;
                    return Token::Error;
                }
                Some(c) => {
                    value.push(c);
                    text.push(c);
                    self.advance();
                }
            }
        }
        self.token_text = text;
        self.text_value = value;
        if quote == '"' {
            Token::String
        } else {
            Token::Quote
        }
    }

    fn scan_symbol(&mut self, hungry: bool) -> Token {
        let c = self.advance().unwrap();

        // The six bracket characters always stand alone
        if "([{".contains(c) {
            self.token_text = c.to_string();
            self.text_value = self.token_text.clone();
            return Token::ParOpen;
        }
        if ")]}".contains(c) {
            self.token_text = c.to_string();
            self.text_value = self.token_text.clone();
            return Token::ParClose;
        }

        let mut text = c.to_string();
        while let Some(n) = self.peek() {
            if !n.is_ascii_punctuation() || n == '"' || n == '\'' || "()[]{}".contains(n) {
                break;
            }
            let mut longer = text.clone();
            longer.push(n);
            if !hungry {
                let syntax = self.syntax.borrow();
                if !syntax.known_token(&longer) && !syntax.known_prefix(&longer) {
                    break;
                }
            }
            text.push(n);
            self.advance();
        }
        self.token_text = text.clone();
        self.text_value = text;
        Token::Symbol
    }

    /// Read raw text until the given end marker, returning everything read
    /// including the marker. Used for comments and long text; for comments
    /// the leading indentation of continuation lines is stripped.
    pub fn comment(&mut self, end: &str, strip_indent: bool) -> String {
        let end_chars: Vec<char> = end.chars().collect();
        let mut out = String::new();
        loop {
            if self.input[self.offset..].starts_with(&end_chars[..]) {
                self.offset += end_chars.len();
                out.push_str(end);
                if end == "\n" {
                    self.checking_indent = true;
                    self.column = 0;
                }
                return out;
            }
            match self.advance() {
                Some('\n') => {
                    out.push('\n');
                    if strip_indent {
                        let mut skipped = 0;
                        while skipped < self.indent {
                            match self.peek() {
                                Some(' ') | Some('\t') => {
                                    self.advance();
                                    skipped += 1;
                                }
                                _ => break,
                            }
                        }
                    }
                }
                Some(c) => out.push(c),
                None => {
                    if end != "\n" {
                        self.report(Error::new(
                            "Unterminated comment or text, expected $1",
                            self.position,
                            Severity::Lex,
                        ).arg(end));
                    }
                    return out;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{errors::Errors, syntax::Syntax};

    fn scan_all(source: &str) -> Vec<(Token, String)> {
        let syntax = Syntax::standard();
        let positions = Positions::new();
        let errors = Errors::new();
        let mut scanner = Scanner::new("<test>", source, syntax, &positions, errors);
        let mut tokens = Vec::new();
        loop {
            let tok = scanner.next_token(false);
            if tok == Token::Eof {
                break;
            }
            tokens.push((tok, scanner.token_text().to_owned()));
        }
        tokens
    }

    #[test]
    fn numbers_in_all_shapes() {
        let syntax = Syntax::standard();
        let positions = Positions::new();
        let errors = Errors::new();
        let mut s = Scanner::new(
            "<test>",
            "42 16#FF 1_980_000 1.25 1.25E2 16#FF#E2 1E-3",
            syntax,
            &positions,
            errors,
        );
        assert_eq!(s.next_token(false), Token::Integer);
        assert_eq!(s.integer_value(), 42);
        assert_eq!(s.next_token(false), Token::Integer);
        assert_eq!(s.integer_value(), 255);
        assert_eq!(s.next_token(false), Token::Integer);
        assert_eq!(s.integer_value(), 1_980_000);
        assert_eq!(s.next_token(false), Token::Real);
        assert_eq!(s.real_value(), 1.25);
        assert_eq!(s.next_token(false), Token::Real);
        assert_eq!(s.real_value(), 125.0);
        assert_eq!(s.next_token(false), Token::Integer);
        assert_eq!(s.integer_value(), 0xFF00);
        assert_eq!(s.next_token(false), Token::Real);
        assert_eq!(s.real_value(), 1e-3);
    }

    #[test]
    fn symbols_use_known_tokens() {
        let tokens = scan_all("a<=b");
        assert_eq!(
            tokens,
            vec![
                (Token::Name, "a".to_owned()),
                (Token::Symbol, "<=".to_owned()),
                (Token::Name, "b".to_owned()),
            ]
        );
    }

    #[test]
    fn doubled_quotes_embed() {
        let syntax = Syntax::standard();
        let positions = Positions::new();
        let errors = Errors::new();
        let mut s = Scanner::new("<test>", "\"He said \"\"hi\"\"\"", syntax, &positions, errors);
        assert_eq!(s.next_token(false), Token::String);
        assert_eq!(s.text_value(), "He said \"hi\"");
    }

    #[test]
    fn indentation_opens_and_closes() {
        let tokens: Vec<Token> = scan_all("a\n  b\nc")
            .into_iter()
            .map(|(tok, _)| tok)
            .collect();
        assert_eq!(
            tokens,
            vec![
                Token::Name,
                Token::Newline,
                Token::Indent,
                Token::Name,
                Token::Newline,
                Token::Unindent,
                Token::Name,
            ]
        );
    }

    #[test]
    fn parens_suspend_indentation() {
        let syntax = Syntax::standard();
        let positions = Positions::new();
        let errors = Errors::new();
        let mut s = Scanner::new("<test>", "(a\n      b)", syntax, &positions, errors);
        assert_eq!(s.next_token(false), Token::ParOpen);
        let old = s.open_paren();
        assert_eq!(s.next_token(false), Token::Name);
        assert_eq!(s.next_token(false), Token::Newline);
        assert_eq!(s.next_token(false), Token::Name);
        assert_eq!(s.next_token(false), Token::ParClose);
        s.close_paren(old);
        assert_eq!(s.next_token(false), Token::Eof);
    }
}

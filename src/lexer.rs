//! Lexer for BetLang source text.
//!
//! Whitespace-insensitive except that a line break before a token is recorded
//! so `do` blocks can treat newlines as statement boundaries. Line comments
//! are `;;` and `//` (a single `;` is the statement separator), block comments
//! `#| ... |#` nest. Hyphens and a trailing `?` are identifier characters, so
//! `risk-of-ruin` is one name and infix subtraction needs surrounding spaces.

use crate::diagnostics::{Diagnostic, DiagnosticKind};
use crate::span::SourceSpan;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Keyword {
    Bet,
    Let,
    In,
    If,
    Then,
    Else,
    Match,
    With,
    Do,
    Return,
    Sample,
    Parallel,
    Define,
    Lambda,
    End,
    And,
    Or,
    Not,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    Identifier,
    Symbol,
    Int(i64),
    Rational(i64, i64),
    Float(f64),
    String,
    Bool(bool),
    Unknown,
    Keyword(Keyword),
    LParen,
    RParen,
    LBracket,
    RBracket,
    Comma,
    Semicolon,
    Quote,
    Assign,
    LArrow,
    RArrow,
    Bar,
    At,
    Plus,
    Minus,
    Star,
    Slash,
    Equal,
    Less,
    LessEqual,
    Greater,
    GreaterEqual,
    Eof,
}

#[derive(Debug, Clone)]
pub struct Token {
    pub kind: TokenKind,
    pub lexeme: String,
    pub span: SourceSpan,
    /// True when at least one newline separated this token from the previous.
    pub line_break: bool,
}

pub struct Lexer<'a> {
    source: &'a str,
    chars: std::str::CharIndices<'a>,
    current: usize,
    peeked: Option<(usize, char)>,
    saw_newline: bool,
}

impl<'a> Lexer<'a> {
    pub fn new(source: &'a str) -> Self {
        Self {
            source,
            chars: source.char_indices(),
            current: 0,
            peeked: None,
            saw_newline: false,
        }
    }

    fn bump(&mut self) -> Option<(usize, char)> {
        let next = if let Some(pair) = self.peeked.take() {
            Some(pair)
        } else {
            self.chars.next()
        };
        if let Some((idx, ch)) = next {
            self.current = idx + ch.len_utf8();
            Some((idx, ch))
        } else {
            None
        }
    }

    fn peek(&mut self) -> Option<(usize, char)> {
        if self.peeked.is_none() {
            self.peeked = self.chars.next();
        }
        self.peeked
    }

    fn peek_second(&mut self) -> Option<char> {
        self.peek();
        self.chars.clone().next().map(|(_, ch)| ch)
    }

    fn match_next(&mut self, expected: char) -> bool {
        if let Some((idx, ch)) = self.peek() {
            if ch == expected {
                self.peeked = None;
                self.current = idx + ch.len_utf8();
                return true;
            }
        }
        false
    }

    fn skip_trivia(&mut self) -> Result<(), Diagnostic> {
        loop {
            let mut progressed = false;

            while let Some((_, ch)) = self.peek() {
                if ch.is_whitespace() {
                    if ch == '\n' {
                        self.saw_newline = true;
                    }
                    self.bump();
                    progressed = true;
                } else {
                    break;
                }
            }

            if let Some((_, '/')) = self.peek() {
                if self.peek_second() == Some('/') {
                    self.bump();
                    self.bump();
                    while let Some((_, ch)) = self.peek() {
                        if ch == '\n' {
                            break;
                        }
                        self.bump();
                    }
                    progressed = true;
                }
            }

            if let Some((_, ';')) = self.peek() {
                if self.peek_second() == Some(';') {
                    self.bump();
                    self.bump();
                    while let Some((_, ch)) = self.peek() {
                        if ch == '\n' {
                            break;
                        }
                        self.bump();
                    }
                    progressed = true;
                }
            }

            if let Some((start, '#')) = self.peek() {
                if self.peek_second() == Some('|') {
                    self.bump();
                    self.bump();
                    let mut depth = 1;
                    loop {
                        match self.bump() {
                            Some((_, '#')) if matches!(self.peek(), Some((_, '|'))) => {
                                self.bump();
                                depth += 1;
                            }
                            Some((_, '|')) if matches!(self.peek(), Some((_, '#'))) => {
                                self.bump();
                                depth -= 1;
                                if depth == 0 {
                                    break;
                                }
                            }
                            Some(_) => {}
                            None => {
                                return Err(Diagnostic::new(
                                    DiagnosticKind::LexInvalidChar,
                                    "unterminated block comment",
                                )
                                .with_span(SourceSpan::new(start, self.current)));
                            }
                        }
                    }
                    progressed = true;
                }
            }

            if !progressed {
                return Ok(());
            }
        }
    }

    fn is_ident_start(ch: char) -> bool {
        ch.is_alphabetic() || ch == '_'
    }

    fn is_ident_continue(ch: char) -> bool {
        ch.is_alphanumeric() || ch == '_' || ch == '-' || ch == '?' || ch == '!'
    }

    fn identifier_or_keyword(&mut self, start: usize) -> Token {
        while let Some((_, ch)) = self.peek() {
            if Self::is_ident_continue(ch) {
                self.bump();
            } else {
                break;
            }
        }
        let lexeme = self.source[start..self.current].to_string();
        let kind = match lexeme.as_str() {
            "true" => TokenKind::Bool(true),
            "false" => TokenKind::Bool(false),
            "unknown" => TokenKind::Unknown,
            other => keyword_for(other).unwrap_or(TokenKind::Identifier),
        };
        self.token(start, kind, lexeme)
    }

    fn symbol_literal(&mut self, start: usize) -> Result<Token, Diagnostic> {
        // The quote itself was consumed by the caller.
        match self.peek() {
            Some((_, ch)) if Self::is_ident_start(ch) => {
                let name_start = self.current;
                self.bump();
                while let Some((_, ch)) = self.peek() {
                    if Self::is_ident_continue(ch) {
                        self.bump();
                    } else {
                        break;
                    }
                }
                let lexeme = self.source[name_start..self.current].to_string();
                Ok(self.token(start, TokenKind::Symbol, lexeme))
            }
            Some((_, '(')) => Ok(self.token(start, TokenKind::Quote, "'".into())),
            _ => Err(Diagnostic::new(
                DiagnosticKind::LexInvalidChar,
                "expected a symbol name or `(` after `'`",
            )
            .with_span(SourceSpan::new(start, self.current))),
        }
    }

    fn number_literal(&mut self, start: usize) -> Result<Token, Diagnostic> {
        while let Some((_, ch)) = self.peek() {
            if ch.is_ascii_digit() {
                self.bump();
            } else {
                break;
            }
        }

        // `p/q` with no intervening space is a rational literal.
        if let Some((_, '/')) = self.peek() {
            if self.peek_second().map_or(false, |c| c.is_ascii_digit()) {
                let numer: i64 = self.source[start..self.current]
                    .parse()
                    .map_err(|_| self.bad_number(start))?;
                self.bump();
                let denom_start = self.current;
                while let Some((_, ch)) = self.peek() {
                    if ch.is_ascii_digit() {
                        self.bump();
                    } else {
                        break;
                    }
                }
                let denom: i64 = self.source[denom_start..self.current]
                    .parse()
                    .map_err(|_| self.bad_number(start))?;
                if denom == 0 {
                    return Err(Diagnostic::new(
                        DiagnosticKind::LexInvalidChar,
                        "rational literal with zero denominator",
                    )
                    .with_span(SourceSpan::new(start, self.current)));
                }
                let lexeme = self.source[start..self.current].to_string();
                return Ok(self.token(start, TokenKind::Rational(numer, denom), lexeme));
            }
        }

        let mut is_float = false;
        if let Some((_, '.')) = self.peek() {
            if self.peek_second().map_or(false, |c| c.is_ascii_digit()) {
                is_float = true;
                self.bump();
                while let Some((_, ch)) = self.peek() {
                    if ch.is_ascii_digit() {
                        self.bump();
                    } else {
                        break;
                    }
                }
            }
        }
        if let Some((_, 'e' | 'E')) = self.peek() {
            let follows = self.peek_second();
            if follows.map_or(false, |c| c.is_ascii_digit() || c == '+' || c == '-') {
                is_float = true;
                self.bump();
                if let Some((_, '+' | '-')) = self.peek() {
                    self.bump();
                }
                while let Some((_, ch)) = self.peek() {
                    if ch.is_ascii_digit() {
                        self.bump();
                    } else {
                        break;
                    }
                }
            }
        }

        let lexeme = self.source[start..self.current].to_string();
        let kind = if is_float {
            TokenKind::Float(lexeme.parse().map_err(|_| self.bad_number(start))?)
        } else {
            TokenKind::Int(lexeme.parse().map_err(|_| self.bad_number(start))?)
        };
        Ok(self.token(start, kind, lexeme))
    }

    fn bad_number(&self, start: usize) -> Diagnostic {
        Diagnostic::new(DiagnosticKind::LexInvalidChar, "malformed numeric literal")
            .with_span(SourceSpan::new(start, self.current))
    }

    fn string_literal(&mut self, start: usize) -> Result<Token, Diagnostic> {
        let mut value = String::new();
        while let Some((idx, ch)) = self.bump() {
            match ch {
                '"' => return Ok(self.token(start, TokenKind::String, value)),
                '\\' => match self.bump() {
                    Some((_, 'n')) => value.push('\n'),
                    Some((_, 'r')) => value.push('\r'),
                    Some((_, 't')) => value.push('\t'),
                    Some((_, '"')) => value.push('"'),
                    Some((_, '\\')) => value.push('\\'),
                    Some((esc_idx, other)) => {
                        return Err(Diagnostic::new(
                            DiagnosticKind::LexBadEscape,
                            format!("unknown escape `\\{other}` in string literal"),
                        )
                        .with_span(SourceSpan::new(idx, esc_idx + other.len_utf8())));
                    }
                    None => break,
                },
                _ => value.push(ch),
            }
        }
        Err(
            Diagnostic::new(DiagnosticKind::LexUnterminatedString, "unterminated string literal")
                .with_span(SourceSpan::new(start, self.current)),
        )
    }

    fn token(&mut self, start: usize, kind: TokenKind, lexeme: String) -> Token {
        let line_break = self.saw_newline;
        self.saw_newline = false;
        Token {
            kind,
            lexeme,
            span: SourceSpan::new(start, self.current),
            line_break,
        }
    }

    fn simple(&mut self, start: usize, kind: TokenKind) -> Token {
        let lexeme = self.source[start..self.current].to_string();
        self.token(start, kind, lexeme)
    }

    pub fn tokenize(mut self) -> Result<Vec<Token>, Diagnostic> {
        let mut tokens = Vec::new();
        loop {
            self.skip_trivia()?;
            let (start, ch) = match self.bump() {
                Some(pair) => pair,
                None => {
                    let at = self.current;
                    tokens.push(self.token(at, TokenKind::Eof, String::new()));
                    break;
                }
            };

            let token = match ch {
                c if Lexer::is_ident_start(c) => self.identifier_or_keyword(start),
                '0'..='9' => self.number_literal(start)?,
                '"' => self.string_literal(start)?,
                '\'' => self.symbol_literal(start)?,
                '(' => self.simple(start, TokenKind::LParen),
                ')' => self.simple(start, TokenKind::RParen),
                '[' => self.simple(start, TokenKind::LBracket),
                ']' => self.simple(start, TokenKind::RBracket),
                ',' => self.simple(start, TokenKind::Comma),
                ';' => self.simple(start, TokenKind::Semicolon),
                '@' => self.simple(start, TokenKind::At),
                '|' => self.simple(start, TokenKind::Bar),
                '+' => self.simple(start, TokenKind::Plus),
                '*' => self.simple(start, TokenKind::Star),
                '/' => self.simple(start, TokenKind::Slash),
                '-' => {
                    if self.match_next('>') {
                        self.simple(start, TokenKind::RArrow)
                    } else {
                        self.simple(start, TokenKind::Minus)
                    }
                }
                '<' => {
                    if self.match_next('-') {
                        self.simple(start, TokenKind::LArrow)
                    } else if self.match_next('=') {
                        self.simple(start, TokenKind::LessEqual)
                    } else {
                        self.simple(start, TokenKind::Less)
                    }
                }
                '>' => {
                    if self.match_next('=') {
                        self.simple(start, TokenKind::GreaterEqual)
                    } else {
                        self.simple(start, TokenKind::Greater)
                    }
                }
                '=' => self.simple(start, TokenKind::Equal),
                other => {
                    return Err(Diagnostic::new(
                        DiagnosticKind::LexInvalidChar,
                        format!("unexpected character `{other}`"),
                    )
                    .with_span(SourceSpan::new(start, self.current)));
                }
            };
            tokens.push(token);
        }
        Ok(tokens)
    }
}

fn keyword_for(ident: &str) -> Option<TokenKind> {
    use self::Keyword as Kw;
    let keyword = match ident {
        "bet" => Kw::Bet,
        "let" => Kw::Let,
        "in" => Kw::In,
        "if" => Kw::If,
        "then" => Kw::Then,
        "else" => Kw::Else,
        "match" => Kw::Match,
        "with" => Kw::With,
        "do" => Kw::Do,
        "return" => Kw::Return,
        "sample" => Kw::Sample,
        "parallel" => Kw::Parallel,
        "define" => Kw::Define,
        "lambda" => Kw::Lambda,
        "end" => Kw::End,
        "and" => Kw::And,
        "or" => Kw::Or,
        "not" => Kw::Not,
        _ => return None,
    };
    Some(TokenKind::Keyword(keyword))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(source: &str) -> Vec<TokenKind> {
        Lexer::new(source)
            .tokenize()
            .unwrap()
            .into_iter()
            .map(|t| t.kind)
            .collect()
    }

    #[test]
    fn lexes_bet_form() {
        let kinds = kinds("(bet a b c)");
        assert_eq!(
            kinds,
            vec![
                TokenKind::LParen,
                TokenKind::Keyword(Keyword::Bet),
                TokenKind::Identifier,
                TokenKind::Identifier,
                TokenKind::Identifier,
                TokenKind::RParen,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn lexes_rational_and_float() {
        assert_eq!(
            kinds("3/4 2.5 1e3"),
            vec![
                TokenKind::Rational(3, 4),
                TokenKind::Float(2.5),
                TokenKind::Float(1e3),
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn spaced_slash_is_division() {
        assert_eq!(
            kinds("3 / 4"),
            vec![
                TokenKind::Int(3),
                TokenKind::Slash,
                TokenKind::Int(4),
                TokenKind::Eof
            ]
        );
    }

    #[test]
    fn hyphens_bind_into_identifiers() {
        let tokens = Lexer::new("risk-of-ruin stake-safe?").tokenize().unwrap();
        assert_eq!(tokens[0].lexeme, "risk-of-ruin");
        assert_eq!(tokens[1].lexeme, "stake-safe?");
    }

    #[test]
    fn lexes_symbols_and_quote() {
        let tokens = Lexer::new("'heads '((a 1))").tokenize().unwrap();
        assert_eq!(tokens[0].kind, TokenKind::Symbol);
        assert_eq!(tokens[0].lexeme, "heads");
        assert_eq!(tokens[1].kind, TokenKind::Quote);
    }

    #[test]
    fn records_line_breaks() {
        let tokens = Lexer::new("a\nb c").tokenize().unwrap();
        assert!(!tokens[0].line_break);
        assert!(tokens[1].line_break);
        assert!(!tokens[2].line_break);
    }

    #[test]
    fn skips_comments() {
        let kinds = kinds(";; comment\n// another\n#| block #| nested |# |# 42");
        assert_eq!(kinds, vec![TokenKind::Int(42), TokenKind::Eof]);
    }

    #[test]
    fn reports_unterminated_string() {
        let err = Lexer::new("\"abc").tokenize().unwrap_err();
        assert_eq!(err.kind, DiagnosticKind::LexUnterminatedString);
    }

    #[test]
    fn reports_bad_escape() {
        let err = Lexer::new("\"a\\zb\"").tokenize().unwrap_err();
        assert_eq!(err.kind, DiagnosticKind::LexBadEscape);
    }

    #[test]
    fn lexes_do_notation_tokens() {
        let kinds = kinds("do x <- e; return x end");
        assert!(kinds.contains(&TokenKind::LArrow));
        assert!(kinds.contains(&TokenKind::Keyword(Keyword::Return)));
        assert!(kinds.contains(&TokenKind::Keyword(Keyword::End)));
    }
}

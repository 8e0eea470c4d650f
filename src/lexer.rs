//! Lexer for MOA expressions using logos
//!
//! Supports tokens like:
//! - Names: A, B, n, matrix_1
//! - Integers: 0, 42
//! - Operators: + - * / psi take drop cat tran iota dim tau shp rav
//! - Reductions: +red -red *red /red
//! - Punctuation: < > ( ) ^ . :=
//! - Comments: `#` to end of line

use std::ops::Range;

use logos::Logos;

use crate::error::{CompileError, CompileResult};

/// Token types for the MOA expression language
#[derive(Logos, Debug, Clone, PartialEq)]
#[logos(skip r"[ \t\n\r]+")]
#[logos(skip r"#[^\n]*")]
pub enum Token {
    // Literals
    #[regex(r"[0-9]+", |lex| lex.slice().parse::<i64>().ok())]
    Integer(i64),

    #[regex(r"[a-zA-Z][a-zA-Z0-9_]*", |lex| lex.slice().to_string())]
    Ident(String),

    // Structural operators
    #[token("psi")]
    Psi,

    #[token("take")]
    Take,

    #[token("drop")]
    Drop,

    #[token("cat")]
    Cat,

    #[token("tran")]
    Tran,

    #[token("iota")]
    Iota,

    #[token("dim")]
    Dim,

    #[token("tau")]
    Tau,

    #[token("shp")]
    Shp,

    #[token("rav")]
    Rav,

    // Reductions
    #[token("+red")]
    PlusRed,

    #[token("-red")]
    MinusRed,

    #[token("*red")]
    TimesRed,

    #[token("/red")]
    DivideRed,

    // Arithmetic
    #[token("+")]
    Plus,

    #[token("-")]
    Minus,

    #[token("*")]
    Star,

    #[token("/")]
    Slash,

    #[token(".")]
    Dot,

    #[token(":=")]
    Assign,

    // Punctuation
    #[token("^")]
    Caret,

    #[token("<")]
    LAngle,

    #[token(">")]
    RAngle,

    #[token("(")]
    LParen,

    #[token(")")]
    RParen,
}

impl std::fmt::Display for Token {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Token::Integer(n) => write!(f, "{}", n),
            Token::Ident(s) => write!(f, "{}", s),
            Token::Psi => write!(f, "psi"),
            Token::Take => write!(f, "take"),
            Token::Drop => write!(f, "drop"),
            Token::Cat => write!(f, "cat"),
            Token::Tran => write!(f, "tran"),
            Token::Iota => write!(f, "iota"),
            Token::Dim => write!(f, "dim"),
            Token::Tau => write!(f, "tau"),
            Token::Shp => write!(f, "shp"),
            Token::Rav => write!(f, "rav"),
            Token::PlusRed => write!(f, "+red"),
            Token::MinusRed => write!(f, "-red"),
            Token::TimesRed => write!(f, "*red"),
            Token::DivideRed => write!(f, "/red"),
            Token::Plus => write!(f, "+"),
            Token::Minus => write!(f, "-"),
            Token::Star => write!(f, "*"),
            Token::Slash => write!(f, "/"),
            Token::Dot => write!(f, "."),
            Token::Assign => write!(f, ":="),
            Token::Caret => write!(f, "^"),
            Token::LAngle => write!(f, "<"),
            Token::RAngle => write!(f, ">"),
            Token::LParen => write!(f, "("),
            Token::RParen => write!(f, ")"),
        }
    }
}

/// Token with its byte range in the source
pub type Spanned = (Token, Range<usize>);

/// Lexer wrapper that yields spanned tokens
pub struct Lexer<'source> {
    inner: logos::Lexer<'source, Token>,
}

impl<'source> Lexer<'source> {
    pub fn new(source: &'source str) -> Self {
        Self {
            inner: Token::lexer(source),
        }
    }

    /// Get current position in source
    pub fn span(&self) -> Range<usize> {
        self.inner.span()
    }
}

impl<'source> Iterator for Lexer<'source> {
    type Item = CompileResult<Spanned>;

    fn next(&mut self) -> Option<Self::Item> {
        let token = self.inner.next()?;
        let span = self.span();
        Some(token.map(|tok| (tok, span.clone())).map_err(|()| {
            CompileError::LexerError {
                position: span.start,
                message: format!("no valid token can be formed from {:?}", self.inner.slice()),
            }
        }))
    }
}

/// Tokenize a whole source string, failing on the first invalid character
pub fn tokenize(source: &str) -> CompileResult<Vec<Spanned>> {
    Lexer::new(source).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn tokens(source: &str) -> Vec<Token> {
        tokenize(source).unwrap().into_iter().map(|(tok, _)| tok).collect()
    }

    #[test]
    fn test_single_tokens() {
        let cases = [
            ("1234", Token::Integer(1234)),
            ("A", Token::Ident("A".to_string())),
            ("asdf_asAVA", Token::Ident("asdf_asAVA".to_string())),
            ("+", Token::Plus),
            ("-", Token::Minus),
            ("*", Token::Star),
            ("/", Token::Slash),
            ("psi", Token::Psi),
            ("take", Token::Take),
            ("drop", Token::Drop),
            ("cat", Token::Cat),
            ("+red", Token::PlusRed),
            ("-red", Token::MinusRed),
            ("*red", Token::TimesRed),
            ("/red", Token::DivideRed),
            ("iota", Token::Iota),
            ("dim", Token::Dim),
            ("tau", Token::Tau),
            ("shp", Token::Shp),
            ("rav", Token::Rav),
            ("tran", Token::Tran),
            ("(", Token::LParen),
            (")", Token::RParen),
            ("<", Token::LAngle),
            (">", Token::RAngle),
            ("^", Token::Caret),
            (":=", Token::Assign),
        ];
        for (source, expected) in cases {
            assert_eq!(tokens(source), vec![expected], "source {:?}", source);
        }
    }

    #[test]
    fn test_keyword_prefix_is_identifier() {
        assert_eq!(tokens("psiA"), vec![Token::Ident("psiA".to_string())]);
    }

    #[test]
    fn test_lenore_example() {
        assert_eq!(
            tokens("<0> psi (tran(A ^ <2 3>))"),
            vec![
                Token::LAngle,
                Token::Integer(0),
                Token::RAngle,
                Token::Psi,
                Token::LParen,
                Token::Tran,
                Token::LParen,
                Token::Ident("A".to_string()),
                Token::Caret,
                Token::LAngle,
                Token::Integer(2),
                Token::Integer(3),
                Token::RAngle,
                Token::RParen,
                Token::RParen,
            ]
        );
    }

    #[test]
    fn test_products() {
        assert_eq!(
            tokens("A +.* B .- C"),
            vec![
                Token::Ident("A".to_string()),
                Token::Plus,
                Token::Dot,
                Token::Star,
                Token::Ident("B".to_string()),
                Token::Dot,
                Token::Minus,
                Token::Ident("C".to_string()),
            ]
        );
    }

    #[test]
    fn test_comments_and_spans() {
        let spanned = tokenize("A # the input\n+ B").unwrap();
        assert_eq!(spanned.len(), 3);
        assert_eq!(spanned[1], (Token::Plus, 14..15));
    }

    #[test]
    fn test_invalid_character() {
        match tokenize("A $ B") {
            Err(CompileError::LexerError { position, .. }) => assert_eq!(position, 2),
            other => panic!("Expected LexerError, got {:?}", other),
        }
    }
}

//! Parser for MOA expressions
//!
//! Parses expressions like:
//! - `<0> psi (tran (A ^ <3 4> + B ^ <3 4>))`
//! - `+red A ^ <n 5>`
//! - `A ^ <3 4> +.* B ^ <4 5>`
//!
//! Unary operators apply to everything on their right. Binary operators are
//! left associative; from loosest to tightest they group as `:=`, the
//! structural operators (`psi take drop cat tran` and products), `+ -`, then
//! `* /`. Names are entered into the symbol table as they are met.

use crate::ast::{ArithOp, Context, Element, Node, NodeRef, NodeSymbol};
use crate::error::{CompileError, CompileResult};
use crate::lexer::{tokenize, Spanned, Token};
use crate::symbol::{SymbolKind, SymbolTable};

/// Parse a complete MOA expression into a fresh context
pub fn parse(source: &str) -> CompileResult<Context> {
    Parser::new(source)?.parse()
}

/// Recursive-descent parser threading a growing context
pub struct Parser {
    tokens: Vec<Spanned>,
    position: usize,
    context: Context,
}

fn arith_op(token: &Token) -> Option<ArithOp> {
    match token {
        Token::Plus => Some(ArithOp::Plus),
        Token::Minus => Some(ArithOp::Minus),
        Token::Star => Some(ArithOp::Times),
        Token::Slash => Some(ArithOp::Divide),
        _ => None,
    }
}

impl Parser {
    pub fn new(source: &str) -> CompileResult<Self> {
        let placeholder = Node::array("", None).into_ref();
        Ok(Self {
            tokens: tokenize(source)?,
            position: 0,
            context: Context::new(placeholder, SymbolTable::new()),
        })
    }

    fn peek_at(&self, offset: usize) -> Option<&Token> {
        self.tokens.get(self.position + offset).map(|(tok, _)| tok)
    }

    fn current(&self) -> Option<&Token> {
        self.peek_at(0)
    }

    /// Advance to the next token
    fn advance(&mut self) -> Option<Token> {
        let tok = self.current().cloned();
        if tok.is_some() {
            self.position += 1;
        }
        tok
    }

    /// Check if current token matches expected
    fn check(&self, expected: &Token) -> bool {
        match self.current() {
            Some(tok) => std::mem::discriminant(tok) == std::mem::discriminant(expected),
            None => false,
        }
    }

    /// Consume token if it matches, otherwise error
    fn expect(&mut self, expected: Token) -> CompileResult<Token> {
        if self.check(&expected) {
            self.advance()
                .ok_or_else(|| CompileError::parse_error("unexpected end of input"))
        } else {
            Err(self.unexpected(&format!("expected '{}'", expected)))
        }
    }

    fn unexpected(&self, what: &str) -> CompileError {
        match self.tokens.get(self.position) {
            Some((tok, span)) => CompileError::parse_error(format!(
                "{}, got '{}' at position {}",
                what, tok, span.start
            )),
            None => CompileError::parse_error(format!("{}, got end of input", what)),
        }
    }

    /// Parse the whole input as one expression
    pub fn parse(mut self) -> CompileResult<Context> {
        let ast = self.parse_expr()?;
        if self.current().is_some() {
            return Err(self.unexpected("expected end of input"));
        }
        Ok(self.context.with_ast(ast))
    }

    /// Parse an expression (handles operator precedence)
    fn parse_expr(&mut self) -> CompileResult<NodeRef> {
        self.parse_assignment()
    }

    /// Parse assignments: a := b
    fn parse_assignment(&mut self) -> CompileResult<NodeRef> {
        let mut left = self.parse_structural()?;

        while self.check(&Token::Assign) {
            self.advance();
            let right = self.parse_structural()?;
            left = Node::binary(NodeSymbol::Assign, None, left, right).into_ref();
        }

        Ok(left)
    }

    /// Binary structural operator at the cursor and how many tokens it spans
    fn structural_operator(&self) -> Option<(NodeSymbol, usize)> {
        match self.current()? {
            Token::Psi => Some((NodeSymbol::Psi, 1)),
            Token::Take => Some((NodeSymbol::Take, 1)),
            Token::Drop => Some((NodeSymbol::Drop, 1)),
            Token::Cat => Some((NodeSymbol::Cat, 1)),
            Token::Tran => Some((NodeSymbol::TransposeV, 1)),
            Token::Dot => {
                let op = arith_op(self.peek_at(1)?)?;
                Some((NodeSymbol::Outer(op), 2))
            }
            tok => {
                let left = arith_op(tok)?;
                if self.peek_at(1)? != &Token::Dot {
                    return None;
                }
                let right = arith_op(self.peek_at(2)?)?;
                Some((NodeSymbol::Inner(left, right), 3))
            }
        }
    }

    /// Parse structural binaries: psi, take, drop, cat, tran, products
    fn parse_structural(&mut self) -> CompileResult<NodeRef> {
        let mut left = self.parse_additive()?;

        while let Some((symbol, width)) = self.structural_operator() {
            self.position += width;
            let right = self.parse_additive()?;
            left = Node::binary(symbol, None, left, right).into_ref();
        }

        Ok(left)
    }

    /// Arithmetic operator at the cursor unless it starts an inner product
    fn arithmetic_operator(&self, allowed: &[ArithOp]) -> Option<ArithOp> {
        let op = arith_op(self.current()?)?;
        if !allowed.contains(&op) || self.peek_at(1) == Some(&Token::Dot) {
            return None;
        }
        Some(op)
    }

    /// Parse additive expressions: a + b, a - b
    fn parse_additive(&mut self) -> CompileResult<NodeRef> {
        let mut left = self.parse_multiplicative()?;

        while let Some(op) = self.arithmetic_operator(&[ArithOp::Plus, ArithOp::Minus]) {
            self.advance();
            let right = self.parse_multiplicative()?;
            left = Node::binary(NodeSymbol::Arith(op), None, left, right).into_ref();
        }

        Ok(left)
    }

    /// Parse multiplicative expressions: a * b, a / b
    fn parse_multiplicative(&mut self) -> CompileResult<NodeRef> {
        let mut left = self.parse_unary()?;

        while let Some(op) = self.arithmetic_operator(&[ArithOp::Times, ArithOp::Divide]) {
            self.advance();
            let right = self.parse_unary()?;
            left = Node::binary(NodeSymbol::Arith(op), None, left, right).into_ref();
        }

        Ok(left)
    }

    /// Parse prefix operators, which take the rest of the expression
    fn parse_unary(&mut self) -> CompileResult<NodeRef> {
        let symbol = match self.current() {
            Some(Token::Tran) => NodeSymbol::Transpose,
            Some(Token::Shp) => NodeSymbol::Shape,
            Some(Token::Dim) => NodeSymbol::Dim,
            Some(Token::Iota) => NodeSymbol::Iota,
            Some(Token::Tau) => NodeSymbol::Tau,
            Some(Token::Rav) => NodeSymbol::Rav,
            Some(Token::PlusRed) => NodeSymbol::Reduce(ArithOp::Plus),
            Some(Token::MinusRed) => NodeSymbol::Reduce(ArithOp::Minus),
            Some(Token::TimesRed) => NodeSymbol::Reduce(ArithOp::Times),
            Some(Token::DivideRed) => NodeSymbol::Reduce(ArithOp::Divide),
            _ => return self.parse_primary(),
        };
        self.advance();
        let operand = self.parse_expr()?;
        Ok(Node::unary(symbol, None, operand).into_ref())
    }

    /// Parse primary expressions: names, vectors, parenthesized expressions
    fn parse_primary(&mut self) -> CompileResult<NodeRef> {
        match self.current() {
            Some(Token::LParen) => {
                self.advance();
                let expr = self.parse_expr()?;
                self.expect(Token::RParen)?;
                Ok(expr)
            }
            Some(Token::LAngle) => {
                let values = self.parse_vector()?;
                let name = self.context.generate_unique_array_name();
                let length = values.len() as i64;
                self.declare(&name, Some(vec![Element::Int(length)]), Some(values))?;
                Ok(Node::array(name, None).into_ref())
            }
            Some(Token::Ident(name)) => {
                let name = name.clone();
                self.advance();
                if self.check(&Token::Caret) {
                    self.advance();
                    let shape = self.parse_vector()?;
                    self.declare(&name, Some(shape), None)?;
                } else if !self.context.table().contains(&name) {
                    self.declare(&name, None, None)?;
                }
                Ok(Node::array(name, None).into_ref())
            }
            _ => Err(self.unexpected("expected expression")),
        }
    }

    /// Parse `< e1 e2 .. >` where each element is an integer or a name
    fn parse_vector(&mut self) -> CompileResult<Vec<Element>> {
        self.expect(Token::LAngle)?;
        let mut elements = Vec::new();

        loop {
            match self.current() {
                Some(Token::Integer(n)) => {
                    elements.push(Element::Int(*n));
                    self.advance();
                }
                Some(Token::Ident(name)) => {
                    let name = name.clone();
                    self.advance();
                    self.declare(&name, Some(Vec::new()), None)?;
                    elements.push(Element::symbolic(name));
                }
                _ => break,
            }
        }

        self.expect(Token::RAngle)?;
        Ok(elements)
    }

    fn declare(&mut self, name: &str, shape: Option<Vec<Element>>, value: Option<Vec<Element>>) -> CompileResult<()> {
        self.context = self
            .context
            .clone()
            .add_symbol(name, SymbolKind::Array, shape, None, value)?;
        Ok(())
    }
}

//! Recursive-descent parser producing the expression tree.
//!
//! Precedence, loosest first: inline `if`/`else`, `or`, `and`, `not`,
//! comparisons and `in`, `~`, `+`/`-`, unary minus, then filters (`|`) and
//! tests (`is`) applied to a postfix chain of attribute, index and method
//! lookups.

use serde_json::Value;

use super::lexer::{tokenize, Spanned, Token};
use crate::error::ExpressionError;

/// Deepest expression tree the parser accepts. Evaluation recurses over
/// the tree, so this also bounds evaluation depth.
pub const MAX_DEPTH: usize = 64;

/// Binary operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    In,
    NotIn,
    Add,
    Sub,
    Concat,
}

/// A call argument, positional or `name=value`.
#[derive(Debug, Clone, PartialEq)]
pub struct Arg {
    pub name: Option<String>,
    pub value: Node,
}

/// Expression tree.
#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    Literal(Value),
    List(Vec<Node>),
    Var(String),
    Attr(Box<Node>, String),
    Index(Box<Node>, Box<Node>),
    Method {
        target: Box<Node>,
        name: String,
        args: Vec<Arg>,
    },
    Filter {
        input: Box<Node>,
        name: String,
        args: Vec<Arg>,
    },
    Test {
        input: Box<Node>,
        name: String,
        args: Vec<Arg>,
        negated: bool,
    },
    Not(Box<Node>),
    Neg(Box<Node>),
    And(Box<Node>, Box<Node>),
    Or(Box<Node>, Box<Node>),
    Binary(BinOp, Box<Node>, Box<Node>),
    Conditional {
        then: Box<Node>,
        cond: Box<Node>,
        otherwise: Option<Box<Node>>,
    },
}

/// Parse `source` into a [`Node`].
///
/// # Errors
///
/// Returns [`ExpressionError::Syntax`] when the source is not a single
/// well-formed expression.
pub fn parse(source: &str) -> Result<Node, ExpressionError> {
    let mut parser = Parser {
        tokens: tokenize(source)?,
        pos: 0,
        depth: 0,
    };
    let node = parser.expression()?;
    if parser.peek() != &Token::Eof {
        return Err(parser.error("unexpected trailing input"));
    }
    Ok(node)
}

struct Parser {
    tokens: Vec<Spanned>,
    pos: usize,
    depth: usize,
}

impl Parser {
    fn peek(&self) -> &Token {
        &self.tokens[self.pos].token
    }

    fn peek_at(&self, ahead: usize) -> &Token {
        let idx = (self.pos + ahead).min(self.tokens.len() - 1);
        &self.tokens[idx].token
    }

    fn advance(&mut self) -> Token {
        let token = self.tokens[self.pos].token.clone();
        if self.pos < self.tokens.len() - 1 {
            self.pos += 1;
        }
        token
    }

    fn error(&self, message: impl Into<String>) -> ExpressionError {
        ExpressionError::Syntax {
            offset: self.tokens[self.pos].offset,
            message: message.into(),
        }
    }

    fn is_keyword(&self, keyword: &str) -> bool {
        matches!(self.peek(), Token::Ident(name) if name == keyword)
    }

    fn eat_keyword(&mut self, keyword: &str) -> bool {
        if self.is_keyword(keyword) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, expected: &Token, what: &str) -> Result<(), ExpressionError> {
        if self.peek() == expected {
            self.advance();
            Ok(())
        } else {
            Err(self.error(format!("expected {what}")))
        }
    }

    fn ident(&mut self, what: &str) -> Result<String, ExpressionError> {
        if let Token::Ident(name) = self.peek() {
            let name = name.clone();
            self.advance();
            Ok(name)
        } else {
            Err(self.error(format!("expected {what}")))
        }
    }

    /// Go one level deeper in the tree.
    fn descend(&mut self) -> Result<(), ExpressionError> {
        self.depth += 1;
        if self.depth > MAX_DEPTH {
            return Err(self.error("expression nested too deeply"));
        }
        Ok(())
    }

    /// Run `f` one level deeper.
    fn nested<T>(
        &mut self,
        f: impl FnOnce(&mut Self) -> Result<T, ExpressionError>,
    ) -> Result<T, ExpressionError> {
        let base = self.depth;
        self.descend()?;
        let result = f(self);
        self.depth = base;
        result
    }

    fn expression(&mut self) -> Result<Node, ExpressionError> {
        self.nested(Self::conditional)
    }

    fn conditional(&mut self) -> Result<Node, ExpressionError> {
        let then = self.or()?;
        if !self.eat_keyword("if") {
            return Ok(then);
        }
        let cond = self.or()?;
        let otherwise = if self.eat_keyword("else") {
            Some(Box::new(self.expression()?))
        } else {
            None
        };
        Ok(Node::Conditional {
            then: Box::new(then),
            cond: Box::new(cond),
            otherwise,
        })
    }

    // Each loop iteration of a left-associative chain adds a tree level.

    fn or(&mut self) -> Result<Node, ExpressionError> {
        let base = self.depth;
        let mut lhs = self.and()?;
        while self.eat_keyword("or") {
            self.descend()?;
            let rhs = self.and()?;
            lhs = Node::Or(Box::new(lhs), Box::new(rhs));
        }
        self.depth = base;
        Ok(lhs)
    }

    fn and(&mut self) -> Result<Node, ExpressionError> {
        let base = self.depth;
        let mut lhs = self.not()?;
        while self.eat_keyword("and") {
            self.descend()?;
            let rhs = self.not()?;
            lhs = Node::And(Box::new(lhs), Box::new(rhs));
        }
        self.depth = base;
        Ok(lhs)
    }

    fn not(&mut self) -> Result<Node, ExpressionError> {
        if self.eat_keyword("not") {
            let inner = self.nested(Self::not)?;
            return Ok(Node::Not(Box::new(inner)));
        }
        self.comparison()
    }

    fn comparison(&mut self) -> Result<Node, ExpressionError> {
        let base = self.depth;
        let mut lhs = self.concat()?;
        loop {
            let op = match self.peek() {
                Token::Eq => BinOp::Eq,
                Token::Ne => BinOp::Ne,
                Token::Lt => BinOp::Lt,
                Token::Le => BinOp::Le,
                Token::Gt => BinOp::Gt,
                Token::Ge => BinOp::Ge,
                Token::Ident(k) if k == "in" => BinOp::In,
                Token::Ident(k)
                    if k == "not" && matches!(self.peek_at(1), Token::Ident(n) if n == "in") =>
                {
                    BinOp::NotIn
                }
                _ => {
                    self.depth = base;
                    return Ok(lhs);
                }
            };
            if op == BinOp::NotIn {
                self.advance();
            }
            self.advance();
            self.descend()?;
            let rhs = self.concat()?;
            lhs = Node::Binary(op, Box::new(lhs), Box::new(rhs));
        }
    }

    fn concat(&mut self) -> Result<Node, ExpressionError> {
        let base = self.depth;
        let mut lhs = self.additive()?;
        while self.peek() == &Token::Tilde {
            self.advance();
            self.descend()?;
            let rhs = self.additive()?;
            lhs = Node::Binary(BinOp::Concat, Box::new(lhs), Box::new(rhs));
        }
        self.depth = base;
        Ok(lhs)
    }

    fn additive(&mut self) -> Result<Node, ExpressionError> {
        let base = self.depth;
        let mut lhs = self.unary()?;
        loop {
            let op = match self.peek() {
                Token::Plus => BinOp::Add,
                Token::Minus => BinOp::Sub,
                _ => {
                    self.depth = base;
                    return Ok(lhs);
                }
            };
            self.advance();
            self.descend()?;
            let rhs = self.unary()?;
            lhs = Node::Binary(op, Box::new(lhs), Box::new(rhs));
        }
    }

    fn unary(&mut self) -> Result<Node, ExpressionError> {
        if self.peek() == &Token::Minus {
            self.advance();
            let inner = self.nested(Self::unary)?;
            return Ok(Node::Neg(Box::new(inner)));
        }
        self.filtered()
    }

    fn filtered(&mut self) -> Result<Node, ExpressionError> {
        let base = self.depth;
        let mut node = self.postfix()?;
        loop {
            if self.peek() == &Token::Pipe {
                self.advance();
                self.descend()?;
                let name = self.ident("filter name")?;
                let args = self.optional_args()?;
                node = Node::Filter {
                    input: Box::new(node),
                    name,
                    args,
                };
            } else if self.eat_keyword("is") {
                self.descend()?;
                let negated = self.eat_keyword("not");
                let name = self.ident("test name")?;
                let args = self.optional_args()?;
                node = Node::Test {
                    input: Box::new(node),
                    name,
                    args,
                    negated,
                };
            } else {
                self.depth = base;
                return Ok(node);
            }
        }
    }

    fn postfix(&mut self) -> Result<Node, ExpressionError> {
        let base = self.depth;
        let mut node = self.primary()?;
        loop {
            match self.peek() {
                Token::Dot => {
                    self.advance();
                    self.descend()?;
                    let name = match self.advance() {
                        Token::Ident(name) => name,
                        Token::Int(i) => i.to_string(),
                        _ => return Err(self.error("expected attribute name after '.'")),
                    };
                    if self.peek() == &Token::LParen {
                        let args = self.args()?;
                        node = Node::Method {
                            target: Box::new(node),
                            name,
                            args,
                        };
                    } else {
                        node = Node::Attr(Box::new(node), name);
                    }
                }
                Token::LBracket => {
                    self.advance();
                    self.descend()?;
                    let index = self.expression()?;
                    self.expect(&Token::RBracket, "']'")?;
                    node = Node::Index(Box::new(node), Box::new(index));
                }
                _ => {
                    self.depth = base;
                    return Ok(node);
                }
            }
        }
    }

    fn primary(&mut self) -> Result<Node, ExpressionError> {
        match self.peek().clone() {
            Token::Str(s) => {
                self.advance();
                Ok(Node::Literal(Value::String(s)))
            }
            Token::Int(i) => {
                self.advance();
                Ok(Node::Literal(Value::from(i)))
            }
            Token::Float(f) => {
                self.advance();
                Ok(Node::Literal(Value::from(f)))
            }
            Token::LParen => {
                self.advance();
                let inner = self.expression()?;
                self.expect(&Token::RParen, "')'")?;
                Ok(inner)
            }
            Token::LBracket => {
                self.advance();
                let mut items = Vec::new();
                if self.peek() != &Token::RBracket {
                    loop {
                        items.push(self.expression()?);
                        if self.peek() != &Token::Comma {
                            break;
                        }
                        self.advance();
                        if self.peek() == &Token::RBracket {
                            break;
                        }
                    }
                }
                self.expect(&Token::RBracket, "']'")?;
                Ok(Node::List(items))
            }
            Token::Ident(name) => {
                let literal = match name.as_str() {
                    "true" | "True" => Some(Value::Bool(true)),
                    "false" | "False" => Some(Value::Bool(false)),
                    "none" | "None" | "null" => Some(Value::Null),
                    "and" | "or" | "not" | "is" | "in" | "if" | "else" => {
                        return Err(self.error(format!("unexpected keyword '{name}'")));
                    }
                    _ => None,
                };
                self.advance();
                if let Some(value) = literal {
                    return Ok(Node::Literal(value));
                }
                if self.peek() == &Token::LParen {
                    return Err(self.error(format!("'{name}' is not callable")));
                }
                Ok(Node::Var(name))
            }
            Token::Eof => Err(self.error("unexpected end of expression")),
            other => Err(self.error(format!("unexpected token {other:?}"))),
        }
    }

    fn optional_args(&mut self) -> Result<Vec<Arg>, ExpressionError> {
        if self.peek() == &Token::LParen {
            self.args()
        } else {
            Ok(Vec::new())
        }
    }

    fn args(&mut self) -> Result<Vec<Arg>, ExpressionError> {
        self.expect(&Token::LParen, "'('")?;
        let mut args = Vec::new();
        while self.peek() != &Token::RParen {
            let name = match (self.peek(), self.peek_at(1)) {
                (Token::Ident(name), Token::Assign) => Some(name.clone()),
                _ => None,
            };
            if name.is_some() {
                self.advance();
                self.advance();
            }
            let value = self.expression()?;
            args.push(Arg { name, value });
            if self.peek() == &Token::Comma {
                self.advance();
            } else {
                break;
            }
        }
        self.expect(&Token::RParen, "')'")?;
        Ok(args)
    }
}

//! Free-form `when { expression { … } }` predicates
//!
//! A small boolean language evaluated against the run context:
//!
//! ```text
//! expr    := or
//! or      := and ( "||" and )*
//! and     := unary ( "&&" unary )*
//! unary   := "!" unary | compare
//! compare := atom ( ("==" | "!=") atom )?
//! atom    := "(" expr ")" | 'string' | "string" | true | false
//!          | env.NAME | params.NAME | NAME
//! ```
//!
//! Bare names resolve from the environment first, then from parameters.
//! Missing values are the empty string, which is falsy.

use super::condition::ConditionContext;
use std::borrow::Cow;
use std::fmt;
use thiserror::Error;

/// Errors produced while parsing an expression
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ExpressionError {
    /// Character that cannot start a token
    #[error("unexpected character '{ch}' at offset {offset}")]
    UnexpectedChar {
        /// The offending character.
        ch: char,
        /// Byte offset in the source.
        offset: usize,
    },

    /// String literal without closing quote
    #[error("unterminated string starting at offset {0}")]
    UnterminatedString(usize),

    /// Token in a position the grammar does not allow
    #[error("unexpected token '{0}'")]
    UnexpectedToken(String),

    /// Input ended in the middle of an expression
    #[error("unexpected end of expression")]
    UnexpectedEnd,

    /// Nothing to evaluate
    #[error("expression is empty")]
    Empty,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    Ident(String),
    Str(String),
    And,
    Or,
    Not,
    Eq,
    Ne,
    LParen,
    RParen,
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ident(name) => write!(f, "{name}"),
            Self::Str(s) => write!(f, "'{s}'"),
            Self::And => write!(f, "&&"),
            Self::Or => write!(f, "||"),
            Self::Not => write!(f, "!"),
            Self::Eq => write!(f, "=="),
            Self::Ne => write!(f, "!="),
            Self::LParen => write!(f, "("),
            Self::RParen => write!(f, ")"),
        }
    }
}

fn tokenize(source: &str) -> Result<Vec<Token>, ExpressionError> {
    let mut tokens = Vec::new();
    let mut chars = source.char_indices().peekable();

    while let Some((offset, ch)) = chars.next() {
        match ch {
            c if c.is_whitespace() => {}
            '(' => tokens.push(Token::LParen),
            ')' => tokens.push(Token::RParen),
            '&' if chars.next_if(|(_, c)| *c == '&').is_some() => tokens.push(Token::And),
            '|' if chars.next_if(|(_, c)| *c == '|').is_some() => tokens.push(Token::Or),
            '=' if chars.next_if(|(_, c)| *c == '=').is_some() => tokens.push(Token::Eq),
            '!' => {
                if chars.next_if(|(_, c)| *c == '=').is_some() {
                    tokens.push(Token::Ne);
                } else {
                    tokens.push(Token::Not);
                }
            }
            '\'' | '"' => {
                let mut value = String::new();
                let mut closed = false;
                for (_, c) in chars.by_ref() {
                    if c == ch {
                        closed = true;
                        break;
                    }
                    value.push(c);
                }
                if !closed {
                    return Err(ExpressionError::UnterminatedString(offset));
                }
                tokens.push(Token::Str(value));
            }
            c if c.is_alphanumeric() || c == '_' => {
                let mut ident = String::from(c);
                while let Some((_, c)) =
                    chars.next_if(|(_, c)| c.is_alphanumeric() || matches!(c, '_' | '.' | '-'))
                {
                    ident.push(c);
                }
                tokens.push(Token::Ident(ident));
            }
            other => {
                return Err(ExpressionError::UnexpectedChar { ch: other, offset });
            }
        }
    }

    Ok(tokens)
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Node {
    Literal(String),
    Env(String),
    Param(String),
    Name(String),
    Not(Box<Node>),
    And(Box<Node>, Box<Node>),
    Or(Box<Node>, Box<Node>),
    Eq(Box<Node>, Box<Node>),
    Ne(Box<Node>, Box<Node>),
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        token
    }

    fn or(&mut self) -> Result<Node, ExpressionError> {
        let mut left = self.and()?;
        while self.peek() == Some(&Token::Or) {
            self.pos += 1;
            left = Node::Or(Box::new(left), Box::new(self.and()?));
        }
        Ok(left)
    }

    fn and(&mut self) -> Result<Node, ExpressionError> {
        let mut left = self.unary()?;
        while self.peek() == Some(&Token::And) {
            self.pos += 1;
            left = Node::And(Box::new(left), Box::new(self.unary()?));
        }
        Ok(left)
    }

    fn unary(&mut self) -> Result<Node, ExpressionError> {
        if self.peek() == Some(&Token::Not) {
            self.pos += 1;
            return Ok(Node::Not(Box::new(self.unary()?)));
        }
        self.compare()
    }

    fn compare(&mut self) -> Result<Node, ExpressionError> {
        let left = self.atom()?;
        match self.peek() {
            Some(Token::Eq) => {
                self.pos += 1;
                Ok(Node::Eq(Box::new(left), Box::new(self.atom()?)))
            }
            Some(Token::Ne) => {
                self.pos += 1;
                Ok(Node::Ne(Box::new(left), Box::new(self.atom()?)))
            }
            _ => Ok(left),
        }
    }

    fn atom(&mut self) -> Result<Node, ExpressionError> {
        match self.next() {
            Some(Token::LParen) => {
                let inner = self.or()?;
                match self.next() {
                    Some(Token::RParen) => Ok(inner),
                    Some(other) => Err(ExpressionError::UnexpectedToken(other.to_string())),
                    None => Err(ExpressionError::UnexpectedEnd),
                }
            }
            Some(Token::Str(value)) => Ok(Node::Literal(value)),
            Some(Token::Ident(ident)) => {
                let node = if ident == "true" || ident == "false" {
                    Node::Literal(ident.clone())
                } else if let Some(name) = ident.strip_prefix("env.") {
                    Node::Env(name.to_string())
                } else if let Some(name) = ident.strip_prefix("params.") {
                    Node::Param(name.to_string())
                } else {
                    Node::Name(ident.clone())
                };
                Ok(node)
            }
            Some(other) => Err(ExpressionError::UnexpectedToken(other.to_string())),
            None => Err(ExpressionError::UnexpectedEnd),
        }
    }
}

/// A parsed predicate expression
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Expression {
    root: Node,
}

impl Expression {
    /// Parses an expression
    ///
    /// # Errors
    ///
    /// Returns an [`ExpressionError`] describing the first syntax problem.
    pub fn parse(source: &str) -> Result<Self, ExpressionError> {
        let tokens = tokenize(source)?;
        if tokens.is_empty() {
            return Err(ExpressionError::Empty);
        }

        let mut parser = Parser { tokens, pos: 0 };
        let root = parser.or()?;
        if let Some(extra) = parser.next() {
            return Err(ExpressionError::UnexpectedToken(extra.to_string()));
        }
        Ok(Self { root })
    }

    /// Evaluates the expression; `&&` and `||` short-circuit
    #[must_use]
    pub fn evaluate(&self, ctx: &dyn ConditionContext) -> bool {
        truth(&self.root, ctx)
    }
}

fn truth(node: &Node, ctx: &dyn ConditionContext) -> bool {
    match node {
        Node::Not(inner) => !truth(inner, ctx),
        Node::And(left, right) => truth(left, ctx) && truth(right, ctx),
        Node::Or(left, right) => truth(left, ctx) || truth(right, ctx),
        Node::Eq(left, right) => value(left, ctx) == value(right, ctx),
        Node::Ne(left, right) => value(left, ctx) != value(right, ctx),
        other => is_truthy(&value(other, ctx)),
    }
}

fn value<'a>(node: &'a Node, ctx: &'a dyn ConditionContext) -> Cow<'a, str> {
    match node {
        Node::Literal(s) => Cow::Borrowed(s),
        Node::Env(name) => Cow::Borrowed(ctx.env(name).unwrap_or_default()),
        Node::Param(name) => ctx.param(name).map(|p| p.as_text()).unwrap_or_default(),
        Node::Name(name) => match ctx.env(name) {
            Some(v) => Cow::Borrowed(v),
            None => ctx.param(name).map(|p| p.as_text()).unwrap_or_default(),
        },
        boolean => Cow::Borrowed(if truth(boolean, ctx) { "true" } else { "false" }),
    }
}

/// Jenkins-ish truthiness for string values
pub(crate) fn is_truthy(value: &str) -> bool {
    !value.is_empty()
        && value != "0"
        && !value.eq_ignore_ascii_case("false")
        && !value.eq_ignore_ascii_case("null")
        && !value.eq_ignore_ascii_case("no")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::parameters::ParamValue;
    use std::collections::HashMap;
    use std::path::Path;

    struct Ctx {
        env: HashMap<String, String>,
        params: HashMap<String, ParamValue>,
    }

    impl ConditionContext for Ctx {
        fn param(&self, name: &str) -> Option<&ParamValue> {
            self.params.get(name)
        }

        fn env(&self, name: &str) -> Option<&str> {
            self.env.get(name).map(String::as_str)
        }

        fn path_exists(&self, _path: &Path) -> bool {
            false
        }
    }

    fn ctx() -> Ctx {
        Ctx {
            env: HashMap::from([
                ("BRANCH_NAME".to_string(), "main".to_string()),
                ("EMPTY".to_string(), String::new()),
            ]),
            params: HashMap::from([
                ("DEPLOY".to_string(), ParamValue::Bool(true)),
                ("PUSH".to_string(), ParamValue::Bool(false)),
                ("TARGET".to_string(), ParamValue::from("staging")),
            ]),
        }
    }

    fn eval(src: &str) -> bool {
        Expression::parse(src).unwrap().evaluate(&ctx())
    }

    #[test]
    fn test_literals() {
        assert!(eval("true"));
        assert!(!eval("false"));
        assert!(eval("'yes'"));
        assert!(!eval("''"));
    }

    #[test]
    fn test_env_and_params() {
        assert!(eval("env.BRANCH_NAME == 'main'"));
        assert!(eval("params.DEPLOY"));
        assert!(!eval("params.PUSH"));
        assert!(eval("params.TARGET != \"production\""));
        assert!(!eval("env.MISSING"));
        assert!(!eval("EMPTY"));
    }

    #[test]
    fn test_bare_names_prefer_environment() {
        assert!(eval("BRANCH_NAME == 'main'"));
        assert!(eval("TARGET == 'staging'"));
    }

    #[test]
    fn test_boolean_operators_and_precedence() {
        assert!(eval("params.DEPLOY && env.BRANCH_NAME == 'main'"));
        assert!(eval("params.PUSH || params.DEPLOY"));
        assert!(eval("!params.PUSH"));
        assert!(!eval("params.PUSH && params.DEPLOY || false"));
        assert!(eval("!(params.PUSH || false) && true"));
    }

    #[test]
    fn test_compare_boolean_param_to_string() {
        assert!(eval("params.DEPLOY == 'true'"));
    }

    #[test]
    fn test_parse_errors() {
        assert_eq!(Expression::parse("   "), Err(ExpressionError::Empty));
        assert_eq!(
            Expression::parse("'open"),
            Err(ExpressionError::UnterminatedString(0))
        );
        assert_eq!(
            Expression::parse("(true"),
            Err(ExpressionError::UnexpectedEnd)
        );
        assert!(matches!(
            Expression::parse("true false"),
            Err(ExpressionError::UnexpectedToken(_))
        ));
        assert!(matches!(
            Expression::parse("a = b"),
            Err(ExpressionError::UnexpectedChar { ch: '=', .. })
        ));
        assert!(matches!(
            Expression::parse("&& true"),
            Err(ExpressionError::UnexpectedToken(_))
        ));
    }

    #[test]
    fn test_truthiness() {
        assert!(is_truthy("1"));
        assert!(is_truthy("main"));
        assert!(!is_truthy("0"));
        assert!(!is_truthy("FALSE"));
        assert!(!is_truthy("null"));
        assert!(!is_truthy(""));
    }
}

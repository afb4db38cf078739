use std::mem;

use tracing::debug;

use crate::{
    ast::{ComparisonOptions, Expr, Operator, Predicate, SymbolicValue, Token},
    builder::{ArithmeticOp, Builder, Production, Quantifier},
    error::{Error, Result},
    lexer::Lexer,
    value::Value,
};

/// Recursive-descent driver for the grammar.
///
/// The parser only recognizes structure; every node is built by the
/// [`Builder`] from the productions reported here.
pub struct Parser<'a> {
    lexer: Lexer,
    current_token: Token,
    builder: Builder<'a>,
}

/// Snapshot for backtracking out of a speculative parse.
struct Checkpoint {
    lexer: Lexer,
    current_token: Token,
    depth: usize,
}

impl<'a> Parser<'a> {
    pub fn new(format: &str, arguments: &'a [Value]) -> Result<Self> {
        debug!(
            length = format.len(),
            arguments = arguments.len(),
            "parsing format string"
        );
        let builder = Builder::new(format, arguments)?;
        let mut lexer = Lexer::new(format);
        let current_token = lexer.next_token()?;
        Ok(Parser {
            lexer,
            current_token,
            builder,
        })
    }

    /// Parses the whole input as a predicate.
    pub fn parse_predicate(mut self) -> Result<Predicate> {
        self.parse_or()?;
        self.expect(Token::Eof)?;
        self.builder.finish_predicate()
    }

    /// Parses the whole input as an expression.
    pub fn parse_expression(mut self) -> Result<Expr> {
        self.parse_expr()?;
        self.expect(Token::Eof)?;
        self.builder.finish_expr()
    }

    fn position(&self) -> usize {
        self.lexer.token_start()
    }

    fn advance(&mut self) -> Result<()> {
        self.current_token = self.lexer.next_token()?;
        Ok(())
    }

    fn expect(&mut self, expected: Token) -> Result<()> {
        if !self.check(&expected) {
            return Err(self.unexpected(&format!("{:?}", expected)));
        }
        self.advance()
    }

    fn check(&self, token: &Token) -> bool {
        mem::discriminant(&self.current_token) == mem::discriminant(token)
    }

    fn unexpected(&self, wanted: &str) -> Error {
        Error::syntax(
            self.position(),
            format!("expected {}, got {:?}", wanted, self.current_token),
        )
    }

    fn emit(&mut self, position: usize, production: Production) -> Result<()> {
        self.builder.apply(position, production)
    }

    fn checkpoint(&self) -> Checkpoint {
        Checkpoint {
            lexer: self.lexer.clone(),
            current_token: self.current_token.clone(),
            depth: self.builder.depth(),
        }
    }

    fn restore(&mut self, checkpoint: Checkpoint) {
        self.lexer = checkpoint.lexer;
        self.current_token = checkpoint.current_token;
        self.builder.truncate(checkpoint.depth);
    }

    // ========================================
    // Predicates
    // ========================================

    fn parse_or(&mut self) -> Result<()> {
        let position = self.position();
        self.parse_and()?;
        let mut count = 1;
        while self.check(&Token::Or) {
            self.advance()?;
            self.parse_and()?;
            count += 1;
        }
        if count > 1 {
            self.emit(position, Production::Or(count))?;
        }
        Ok(())
    }

    fn parse_and(&mut self) -> Result<()> {
        let position = self.position();
        self.parse_not()?;
        let mut count = 1;
        while self.check(&Token::And) {
            self.advance()?;
            self.parse_not()?;
            count += 1;
        }
        if count > 1 {
            self.emit(position, Production::And(count))?;
        }
        Ok(())
    }

    fn parse_not(&mut self) -> Result<()> {
        if self.check(&Token::Not) {
            let position = self.position();
            self.advance()?;
            self.parse_not()?;
            return self.emit(position, Production::Not);
        }
        self.parse_primary_predicate()
    }

    fn parse_primary_predicate(&mut self) -> Result<()> {
        let position = self.position();
        match self.current_token {
            Token::PredicateConstant(value) => {
                self.advance()?;
                self.emit(position, Production::PredicateConstant(value))
            }
            Token::LParen => {
                if self.try_parenthesized_predicate()? {
                    Ok(())
                } else {
                    self.parse_comparison()
                }
            }
            Token::Any | Token::All | Token::None => {
                let quantifier = match self.current_token {
                    Token::All => Quantifier::All,
                    Token::None => Quantifier::None,
                    _ => Quantifier::Any,
                };
                self.advance()?;
                self.parse_comparison()?;
                self.emit(position, Production::Quantified(quantifier))
            }
            _ => self.parse_comparison(),
        }
    }

    /// `( predicate )`, unless the parentheses turn out to group an
    /// expression such as `(a + b) * 2 > 3`.
    fn try_parenthesized_predicate(&mut self) -> Result<bool> {
        let checkpoint = self.checkpoint();
        self.advance()?;

        let attempt = self.parse_or().and_then(|_| self.expect(Token::RParen));
        if attempt.is_ok() && !self.continues_expression() {
            return Ok(true);
        }

        self.restore(checkpoint);
        Ok(false)
    }

    fn continues_expression(&self) -> bool {
        self.comparison_operator().is_some()
            || matches!(
                self.current_token,
                Token::Plus
                    | Token::Minus
                    | Token::Star
                    | Token::Slash
                    | Token::StarStar
                    | Token::Dot
                    | Token::LBracket
                    | Token::ColonEqual
            )
    }

    fn comparison_operator(&self) -> Option<Operator> {
        Some(match self.current_token {
            Token::EqEq => Operator::EqualTo,
            Token::NotEq => Operator::NotEqualTo,
            Token::Lt => Operator::LessThan,
            Token::LtEq => Operator::LessThanOrEqualTo,
            Token::Gt => Operator::GreaterThan,
            Token::GtEq => Operator::GreaterThanOrEqualTo,
            Token::Matches => Operator::Matches,
            Token::Like => Operator::Like,
            Token::BeginsWith => Operator::BeginsWith,
            Token::EndsWith => Operator::EndsWith,
            Token::In => Operator::In,
            Token::Contains => Operator::Contains,
            Token::Between => Operator::Between,
            _ => return None,
        })
    }

    fn parse_comparison(&mut self) -> Result<()> {
        let position = self.position();
        self.parse_expr()?;

        let operator = match self.comparison_operator() {
            Some(operator) => operator,
            None => return self.emit(position, Production::ExpressionPredicate),
        };
        let operator_position = self.position();
        self.advance()?;

        let options = self.parse_options()?;
        self.parse_expr()?;
        self.emit(operator_position, Production::Comparison { operator, options })
    }

    /// The optional `[cdn]` suffix after an operator.
    fn parse_options(&mut self) -> Result<ComparisonOptions> {
        if !self.check(&Token::LBracket) {
            return Ok(ComparisonOptions::NONE);
        }
        self.advance()?;

        let options = match &self.current_token {
            Token::Identifier(flags) => ComparisonOptions::from_flags(flags),
            _ => None,
        }
        .ok_or_else(|| self.unexpected("comparison options such as [c] or [cd]"))?;

        self.advance()?;
        self.expect(Token::RBracket)?;
        Ok(options)
    }

    // ========================================
    // Expressions
    // ========================================

    fn parse_expr(&mut self) -> Result<()> {
        self.parse_additive()?;
        if self.check(&Token::ColonEqual) {
            let position = self.position();
            self.advance()?;
            self.parse_expr()?;
            self.emit(position, Production::Assignment)?;
        }
        Ok(())
    }

    fn parse_additive(&mut self) -> Result<()> {
        self.parse_multiplicative()?;

        loop {
            let op = match &self.current_token {
                Token::Plus => ArithmeticOp::Add,
                Token::Minus => ArithmeticOp::Subtract,
                _ => break,
            };
            let position = self.position();
            self.advance()?;
            self.parse_multiplicative()?;
            self.emit(position, Production::Arithmetic(op))?;
        }
        Ok(())
    }

    fn parse_multiplicative(&mut self) -> Result<()> {
        self.parse_power()?;

        loop {
            let op = match &self.current_token {
                Token::Star => ArithmeticOp::Multiply,
                Token::Slash => ArithmeticOp::Divide,
                _ => break,
            };
            let position = self.position();
            self.advance()?;
            self.parse_power()?;
            self.emit(position, Production::Arithmetic(op))?;
        }
        Ok(())
    }

    /// `**` is right-associative.
    fn parse_power(&mut self) -> Result<()> {
        self.parse_unary()?;
        if self.check(&Token::StarStar) {
            let position = self.position();
            self.advance()?;
            self.parse_power()?;
            self.emit(position, Production::Arithmetic(ArithmeticOp::Power))?;
        }
        Ok(())
    }

    fn parse_unary(&mut self) -> Result<()> {
        if self.check(&Token::Minus) {
            let position = self.position();
            self.advance()?;
            self.parse_unary()?;
            return self.emit(position, Production::Negate);
        }
        self.parse_postfix()
    }

    /// Key path segments and indexes: `a.b`, `a.@count`, `a[0]`, `a[LAST]`.
    fn parse_postfix(&mut self) -> Result<()> {
        self.parse_primary()?;

        loop {
            let position = self.position();
            if self.check(&Token::Dot) {
                self.advance()?;
                self.parse_key_segment()?;
                self.emit(position, Production::Dot)?;
            } else if self.check(&Token::LBracket) {
                self.advance()?;
                self.parse_index()?;
                self.expect(Token::RBracket)?;
                self.emit(position, Production::Index)?;
            } else {
                break;
            }
        }
        Ok(())
    }

    fn parse_key_segment(&mut self) -> Result<()> {
        let position = self.position();
        match mem::replace(&mut self.current_token, Token::Eof) {
            Token::Identifier(name) => {
                self.advance()?;
                self.emit(position, Production::KeyPath(name))
            }
            Token::AtIdentifier(name) => {
                self.advance()?;
                self.emit(position, Production::KeyPath(format!("@{}", name)))
            }
            Token::SelfKw => {
                self.advance()?;
                self.emit(position, Production::KeyPath("SELF".to_string()))
            }
            token => {
                // Let the builder reject whatever follows the dot.
                self.current_token = token;
                self.parse_primary()
            }
        }
    }

    fn parse_index(&mut self) -> Result<()> {
        let position = self.position();
        if let Token::Identifier(word) = &self.current_token
            && let Some(symbol) = SymbolicValue::from_keyword(word)
        {
            self.advance()?;
            return self.emit(position, Production::Symbolic(symbol));
        }
        self.parse_expr()
    }

    /// Comma separated expressions up to `close`; returns how many.
    fn parse_arguments(&mut self, close: Token) -> Result<usize> {
        let mut count = 0;
        while !self.check(&close) {
            self.parse_expr()?;
            count += 1;

            if !self.check(&close) {
                self.expect(Token::Comma)?;
            }
        }
        self.expect(close)?;
        Ok(count)
    }

    fn parse_primary(&mut self) -> Result<()> {
        let position = self.position();
        match mem::replace(&mut self.current_token, Token::Eof) {
            // Literals
            Token::Integer(n) => {
                self.advance()?;
                let value = if let Ok(small) = i32::try_from(n) {
                    Value::Int(small)
                } else if let Ok(long) = i64::try_from(n) {
                    Value::Long(long)
                } else {
                    Value::ULong(n)
                };
                self.emit(position, Production::Literal(value))
            }
            Token::Double(n) => {
                self.advance()?;
                self.emit(position, Production::Literal(Value::Double(n)))
            }
            Token::String(s) => {
                self.advance()?;
                self.emit(position, Production::Literal(Value::String(s)))
            }
            Token::Boolean(b) => {
                self.advance()?;
                self.emit(position, Production::Literal(Value::Boolean(b)))
            }
            Token::Nil => {
                self.advance()?;
                self.emit(position, Production::Literal(Value::Null))
            }
            Token::Format(conversion) => {
                self.advance()?;
                self.emit(position, Production::Placeholder { conversion })
            }

            // References
            Token::SelfKw => {
                self.advance()?;
                self.emit(position, Production::EvaluatedObject)
            }
            Token::Variable(name) => {
                self.advance()?;
                self.emit(position, Production::Variable(name))
            }
            Token::AtIdentifier(name) => {
                self.advance()?;
                self.emit(position, Production::KeyPath(format!("@{}", name)))
            }
            Token::Identifier(name) => {
                self.advance()?;
                if self.check(&Token::LParen) {
                    self.advance()?;
                    let arity = self.parse_arguments(Token::RParen)?;
                    self.emit(position, Production::Call { name, arity })
                } else {
                    self.emit(position, Production::KeyPath(name))
                }
            }

            Token::LParen => {
                self.advance()?;
                self.parse_expr()?;
                self.expect(Token::RParen)
            }
            Token::LBrace => {
                self.advance()?;
                let count = self.parse_arguments(Token::RBrace)?;
                self.emit(position, Production::Aggregate(count))
            }

            Token::Subquery => {
                self.advance()?;
                self.expect(Token::LParen)?;
                self.parse_expr()?;
                self.expect(Token::Comma)?;
                let variable = match mem::replace(&mut self.current_token, Token::Eof) {
                    Token::Variable(name) => name,
                    token => {
                        self.current_token = token;
                        return Err(self.unexpected("a $variable in SUBQUERY"));
                    }
                };
                self.advance()?;
                self.expect(Token::Comma)?;
                self.parse_or()?;
                self.expect(Token::RParen)?;
                self.emit(position, Production::Subquery { variable })
            }
            Token::Function => {
                self.advance()?;
                self.expect(Token::LParen)?;
                let arity = self.parse_arguments(Token::RParen)?;
                self.emit(position, Production::FunctionForm { arity })
            }

            token => {
                self.current_token = token;
                Err(self.unexpected("an expression"))
            }
        }
    }
}

/// Parses `format` as a predicate, substituting positional `arguments`.
pub fn parse_predicate(format: &str, arguments: &[Value]) -> Result<Predicate> {
    Parser::new(format, arguments)?.parse_predicate()
}

/// Parses `format` as an expression, substituting positional `arguments`.
pub fn parse_expression(format: &str, arguments: &[Value]) -> Result<Expr> {
    Parser::new(format, arguments)?.parse_expression()
}

impl Predicate {
    /// Parses a predicate format string.
    ///
    /// ```
    /// use sieve_lang::{Predicate, Value};
    ///
    /// let p = Predicate::parse("age > %d AND name BEGINSWITH[c] 'a'", &[Value::Int(18)]).unwrap();
    /// assert_eq!(p.to_string(), "((age > 18) AND (name BEGINSWITH[c] 'a'))");
    /// ```
    pub fn parse(format: &str, arguments: &[Value]) -> Result<Predicate> {
        parse_predicate(format, arguments)
    }
}

impl Expr {
    /// Parses an expression format string.
    pub fn parse(format: &str, arguments: &[Value]) -> Result<Expr> {
        parse_expression(format, arguments)
    }
}

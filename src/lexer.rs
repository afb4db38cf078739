use crate::ast::Token;
use crate::error::{Error, Result};

#[derive(Debug, Clone)]
pub struct Lexer {
    input: Vec<char>,
    position: usize,
    token_start: usize,
}

impl Lexer {
    pub fn new(input: &str) -> Self {
        Lexer {
            input: input.chars().collect(),
            position: 0,
            token_start: 0,
        }
    }

    /// Character offset where the most recently returned token starts.
    pub fn token_start(&self) -> usize {
        self.token_start
    }

    fn current_char(&self) -> Option<char> {
        self.input.get(self.position).copied()
    }

    fn peek_char(&self, offset: usize) -> Option<char> {
        self.input.get(self.position + offset).copied()
    }

    fn advance(&mut self) {
        self.position += 1;
    }

    fn skip_whitespace(&mut self) {
        while let Some(ch) = self.current_char() {
            if ch.is_whitespace() {
                self.advance();
            } else {
                break;
            }
        }
    }

    fn read_identifier(&mut self) -> String {
        let mut result = String::new();
        while let Some(ch) = self.current_char() {
            if ch.is_alphanumeric() || ch == '_' {
                result.push(ch);
                self.advance();
            } else {
                break;
            }
        }
        result
    }

    fn read_string(&mut self, quote: char) -> Result<String> {
        let start = self.position;
        let mut result = String::new();
        self.advance(); // opening quote

        while let Some(ch) = self.current_char() {
            match ch {
                c if c == quote => {
                    self.advance();
                    return Ok(result);
                }
                '\\' => {
                    self.advance();
                    match self.current_char() {
                        Some('n') => result.push('\n'),
                        Some('t') => result.push('\t'),
                        Some('r') => result.push('\r'),
                        Some('\'') => result.push('\''),
                        Some('"') => result.push('"'),
                        Some('\\') => result.push('\\'),
                        Some(ch) => {
                            return Err(Error::syntax(
                                self.position,
                                format!("invalid escape sequence \\{}", ch),
                            ));
                        }
                        None => break,
                    }
                    self.advance();
                }
                '%' if self.peek_char(1) == Some('%') => {
                    result.push('%');
                    self.advance();
                    self.advance();
                }
                _ => {
                    result.push(ch);
                    self.advance();
                }
            }
        }

        Err(Error::syntax(start, "unterminated string literal"))
    }

    fn read_number(&mut self) -> Result<Token> {
        let start = self.position;
        let mut number = String::new();
        let mut is_float = false;

        while let Some(ch) = self.current_char() {
            if ch.is_ascii_digit() {
                number.push(ch);
                self.advance();
            } else if ch == '.'
                && !is_float
                && self.peek_char(1).is_some_and(|c| c.is_ascii_digit())
            {
                is_float = true;
                number.push(ch);
                self.advance();
            } else if (ch == 'e' || ch == 'E') && self.exponent_follows() {
                is_float = true;
                number.push(ch);
                self.advance();
                if let Some(sign @ ('+' | '-')) = self.current_char() {
                    number.push(sign);
                    self.advance();
                }
                while let Some(d) = self.current_char().filter(char::is_ascii_digit) {
                    number.push(d);
                    self.advance();
                }
                break;
            } else {
                break;
            }
        }

        if is_float {
            number
                .parse::<f64>()
                .map(Token::Double)
                .map_err(|_| Error::syntax(start, format!("invalid number '{}'", number)))
        } else {
            number
                .parse::<u64>()
                .map(Token::Integer)
                .map_err(|_| Error::syntax(start, format!("integer literal {} out of range", number)))
        }
    }

    fn exponent_follows(&self) -> bool {
        match self.peek_char(1) {
            Some(c) if c.is_ascii_digit() => true,
            Some('+' | '-') => self.peek_char(2).is_some_and(|c| c.is_ascii_digit()),
            _ => false,
        }
    }

    fn read_format(&mut self) -> Result<Token> {
        let start = self.position;
        self.advance(); // '%'
        // length modifiers carry no meaning here: %ld, %lld, %hd
        while matches!(self.current_char(), Some('l' | 'h' | 'q'))
            && self.peek_char(1).is_some_and(|c| c.is_ascii_alphabetic())
        {
            self.advance();
        }
        match self.current_char() {
            Some(ch) if ch == '@' || ch.is_ascii_alphabetic() => {
                self.advance();
                Ok(Token::Format(ch))
            }
            Some('%') => Err(Error::syntax(
                start,
                "'%%' is only meaningful inside a string literal",
            )),
            _ => Err(Error::syntax(start, "expected a format specifier after '%'")),
        }
    }

    /// Consumes `second` if it is the next character, yielding `double`;
    /// otherwise yields `single`.
    fn one_or_two(&mut self, second: char, double: Token, single: Token) -> Token {
        self.advance();
        if self.current_char() == Some(second) {
            self.advance();
            double
        } else {
            single
        }
    }

    pub fn next_token(&mut self) -> Result<Token> {
        self.skip_whitespace();
        self.token_start = self.position;

        let token = match self.current_char() {
            None => Token::Eof,
            Some('$') => {
                if self
                    .peek_char(1)
                    .is_some_and(|c| c.is_alphabetic() || c == '_')
                {
                    self.advance();
                    Token::Variable(self.read_identifier())
                } else {
                    return Err(Error::syntax(self.position, "expected a variable name after '$'"));
                }
            }
            Some('#') => {
                self.advance();
                let ident = self.read_identifier();
                if ident.is_empty() {
                    return Err(Error::syntax(self.token_start, "expected an identifier after '#'"));
                }
                Token::Identifier(ident)
            }
            Some('@') => {
                self.advance();
                let ident = self.read_identifier();
                if ident.is_empty() {
                    return Err(Error::syntax(self.token_start, "expected an identifier after '@'"));
                }
                Token::AtIdentifier(ident)
            }
            Some('%') => self.read_format()?,
            Some('.') => {
                self.advance();
                Token::Dot
            }
            Some(',') => {
                self.advance();
                Token::Comma
            }
            Some('+') => {
                self.advance();
                Token::Plus
            }
            Some('-') => {
                self.advance();
                Token::Minus
            }
            Some('*') => self.one_or_two('*', Token::StarStar, Token::Star),
            Some('/') => {
                self.advance();
                Token::Slash
            }
            Some('=') => {
                self.advance();
                match self.current_char() {
                    Some('=') => {
                        self.advance();
                        Token::EqEq
                    }
                    Some('<') => {
                        self.advance();
                        Token::LtEq
                    }
                    Some('>') => {
                        self.advance();
                        Token::GtEq
                    }
                    _ => Token::EqEq,
                }
            }
            Some(':') => {
                if self.peek_char(1) == Some('=') {
                    self.advance();
                    self.advance();
                    Token::ColonEqual
                } else {
                    return Err(Error::syntax(
                        self.position,
                        "unexpected ':' (did you mean ':='?)",
                    ));
                }
            }
            Some('>') => self.one_or_two('=', Token::GtEq, Token::Gt),
            Some('<') => {
                self.advance();
                match self.current_char() {
                    Some('=') => {
                        self.advance();
                        Token::LtEq
                    }
                    Some('>') => {
                        self.advance();
                        Token::NotEq
                    }
                    _ => Token::Lt,
                }
            }
            Some('!') => self.one_or_two('=', Token::NotEq, Token::Not),
            Some('&') if self.peek_char(1) == Some('&') => {
                self.advance();
                self.advance();
                Token::And
            }
            Some('|') if self.peek_char(1) == Some('|') => {
                self.advance();
                self.advance();
                Token::Or
            }
            Some('{') => {
                self.advance();
                Token::LBrace
            }
            Some('}') => {
                self.advance();
                Token::RBrace
            }
            Some('(') => {
                self.advance();
                Token::LParen
            }
            Some(')') => {
                self.advance();
                Token::RParen
            }
            Some('[') => {
                self.advance();
                Token::LBracket
            }
            Some(']') => {
                self.advance();
                Token::RBracket
            }
            Some('"') => Token::String(self.read_string('"')?),
            Some('\'') => Token::String(self.read_string('\'')?),
            Some(ch) if ch.is_alphabetic() || ch == '_' => {
                let ident = self.read_identifier();
                Token::from_keyword(&ident).unwrap_or(Token::Identifier(ident))
            }
            Some(ch) if ch.is_ascii_digit() => self.read_number()?,
            Some(ch) => {
                return Err(Error::syntax(
                    self.position,
                    format!("unexpected character '{}'", ch),
                ));
            }
        };

        Ok(token)
    }
}

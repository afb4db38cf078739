/// Lexical tokens.
///
/// Keywords are matched case-insensitively; prefix an identifier with `#`
/// to use a keyword as a property name (`#size`, `#in`).
#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    // Literals
    /// Integer literal. Unsigned, since a leading `-` lexes separately.
    ///
    /// # Examples
    /// ```text
    /// 42
    /// 1000000
    /// ```
    Integer(u64),

    /// Floating point literal: has a fraction or an exponent
    ///
    /// # Examples
    /// ```text
    /// 3.14
    /// 1e6
    /// ```
    Double(f64),

    /// String literal in single or double quotes
    String(String),

    /// `TRUE`, `FALSE`, `YES`, `NO`
    Boolean(bool),

    /// `nil` or `NULL`
    Nil,

    /// `TRUEPREDICATE` / `FALSEPREDICATE`
    PredicateConstant(bool),

    // References
    /// Property name
    Identifier(String),

    /// `@`-prefixed key path segment such as `@count`
    AtIdentifier(String),

    /// `$name`
    Variable(String),

    /// `SELF`
    SelfKw,

    /// Positional placeholder such as `%@`, `%d` or `%K`
    ///
    /// Carries the conversion letter (`'@'`, `'d'`, `'K'`, ...).
    Format(char),

    // Keywords
    And,
    Or,
    Not,
    Any,
    All,
    None,
    In,
    Contains,
    BeginsWith,
    EndsWith,
    Like,
    Matches,
    Between,
    Subquery,
    Function,

    // Operators
    /// `==` or `=`
    EqEq,
    /// `!=` or `<>`
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
    Plus,
    Minus,
    Star,
    Slash,
    /// `**`
    StarStar,
    /// `:=`
    ColonEqual,

    // Delimiters
    LParen,
    RParen,
    LBracket,
    RBracket,
    LBrace,
    RBrace,
    Comma,
    Dot,

    Eof,
}

impl Token {
    pub fn from_keyword(word: &str) -> Option<Token> {
        Some(match word.to_ascii_uppercase().as_str() {
            "AND" => Token::And,
            "OR" => Token::Or,
            "NOT" => Token::Not,
            "ANY" | "SOME" => Token::Any,
            "ALL" => Token::All,
            "NONE" => Token::None,
            "IN" => Token::In,
            "CONTAINS" => Token::Contains,
            "BEGINSWITH" => Token::BeginsWith,
            "ENDSWITH" => Token::EndsWith,
            "LIKE" => Token::Like,
            "MATCHES" => Token::Matches,
            "BETWEEN" => Token::Between,
            "SUBQUERY" => Token::Subquery,
            "FUNCTION" => Token::Function,
            "SELF" => Token::SelfKw,
            "TRUE" | "YES" => Token::Boolean(true),
            "FALSE" | "NO" => Token::Boolean(false),
            "NIL" | "NULL" => Token::Nil,
            "TRUEPREDICATE" => Token::PredicateConstant(true),
            "FALSEPREDICATE" => Token::PredicateConstant(false),
            _ => return Option::None,
        })
    }
}

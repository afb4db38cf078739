use std::fmt;

/// Comparison operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operator {
    /// `<`
    LessThan,
    /// `<=` or `=<`
    LessThanOrEqualTo,
    /// `>`
    GreaterThan,
    /// `>=` or `=>`
    GreaterThanOrEqualTo,
    /// `==` or `=`
    EqualTo,
    /// `!=` or `<>`
    NotEqualTo,
    /// Regular expression match against the whole string
    Matches,
    /// Glob match (`*` and `?`)
    Like,
    BeginsWith,
    EndsWith,
    /// Left operand is an element of the right-hand collection
    In,
    /// Left collection or string contains the right operand
    Contains,
    /// Inclusive range check against a two element aggregate
    Between,
}

impl Operator {
    /// Canonical source spelling.
    pub fn symbol(&self) -> &'static str {
        match self {
            Operator::LessThan => "<",
            Operator::LessThanOrEqualTo => "<=",
            Operator::GreaterThan => ">",
            Operator::GreaterThanOrEqualTo => ">=",
            Operator::EqualTo => "==",
            Operator::NotEqualTo => "!=",
            Operator::Matches => "MATCHES",
            Operator::Like => "LIKE",
            Operator::BeginsWith => "BEGINSWITH",
            Operator::EndsWith => "ENDSWITH",
            Operator::In => "IN",
            Operator::Contains => "CONTAINS",
            Operator::Between => "BETWEEN",
        }
    }

    pub fn is_relational(&self) -> bool {
        matches!(
            self,
            Operator::LessThan
                | Operator::LessThanOrEqualTo
                | Operator::GreaterThan
                | Operator::GreaterThanOrEqualTo
                | Operator::EqualTo
                | Operator::NotEqualTo
        )
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

/// How a comparison applies to its left operand.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Modifier {
    #[default]
    Direct,
    /// Every element of the left-hand collection satisfies the comparison
    All,
    /// Some element of the left-hand collection satisfies the comparison
    Any,
}

/// The bracketed `[cdn]` suffix of a comparison operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct ComparisonOptions {
    pub case_insensitive: bool,
    pub diacritic_insensitive: bool,
    pub normalized: bool,
}

impl ComparisonOptions {
    pub const NONE: ComparisonOptions = ComparisonOptions {
        case_insensitive: false,
        diacritic_insensitive: false,
        normalized: false,
    };

    pub const CASE_INSENSITIVE: ComparisonOptions = ComparisonOptions {
        case_insensitive: true,
        diacritic_insensitive: false,
        normalized: false,
    };

    /// Parses the flag letters between the brackets, e.g. `"cd"`.
    pub fn from_flags(flags: &str) -> Option<Self> {
        let mut options = ComparisonOptions::NONE;
        for ch in flags.chars() {
            match ch.to_ascii_lowercase() {
                'c' => options.case_insensitive = true,
                'd' => options.diacritic_insensitive = true,
                'n' => options.normalized = true,
                _ => return None,
            }
        }
        Some(options)
    }

    pub fn is_empty(&self) -> bool {
        *self == ComparisonOptions::NONE
    }

    /// Flag letters in canonical `c`, `d`, `n` order.
    pub fn flags(&self) -> String {
        let mut flags = String::new();
        if self.case_insensitive {
            flags.push('c');
        }
        if self.diacritic_insensitive {
            flags.push('d');
        }
        if self.normalized {
            flags.push('n');
        }
        flags
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CompoundKind {
    And,
    Or,
    Not,
}

/// Placeholder index resolved against the collection being indexed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SymbolicValue {
    First,
    Last,
    Size,
}

impl SymbolicValue {
    pub fn from_keyword(word: &str) -> Option<Self> {
        match word.to_ascii_uppercase().as_str() {
            "FIRST" => Some(SymbolicValue::First),
            "LAST" => Some(SymbolicValue::Last),
            "SIZE" => Some(SymbolicValue::Size),
            _ => None,
        }
    }
}

impl fmt::Display for SymbolicValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SymbolicValue::First => write!(f, "FIRST"),
            SymbolicValue::Last => write!(f, "LAST"),
            SymbolicValue::Size => write!(f, "SIZE"),
        }
    }
}

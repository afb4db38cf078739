//! Canonical source rendering.
//!
//! Every tree produced by the builder renders to text that parses back to an
//! equivalent tree. String literals are single quoted, compound predicates
//! are fully parenthesized and comparison options are written `[cdn]`.

use std::fmt;

use chrono::SecondsFormat;

use crate::ast::{Comparison, CompoundKind, Expr, Modifier, Predicate, Token};
use crate::value::Value;

pub fn format_expr(expr: &Expr) -> String {
    match expr {
        Expr::Constant(value) => format_value(value),
        Expr::EvaluatedObject => "SELF".to_string(),
        Expr::Variable(name) => format!("${}", name),
        Expr::KeyPath {
            operand: None,
            path,
        } => format_path(path),
        Expr::KeyPath {
            operand: Some(operand),
            path,
        } => format!("{}.{}", format_operand(operand), format_path(path)),
        Expr::Function { name, args } => format_function(name, args),
        Expr::Subquery {
            collection,
            variable,
            predicate,
        } => format!(
            "SUBQUERY({}, ${}, {})",
            format_operand(collection),
            variable,
            format_predicate(predicate)
        ),
        Expr::Aggregate(items) => format_list(items),
        Expr::Symbolic(symbol) => symbol.to_string(),
        Expr::Assignment { variable, value } => {
            format!("${} := {}", variable, format_operand(value))
        }
    }
}

/// An expression nested inside another. Assignments are parenthesized so
/// they do not swallow the rest of the enclosing expression.
fn format_operand(expr: &Expr) -> String {
    match expr {
        Expr::Assignment { .. } => format!("({})", format_expr(expr)),
        _ => format_expr(expr),
    }
}

/// Segments that would lex as keywords get the `#` escape.
fn format_path(path: &str) -> String {
    let segments: Vec<String> = path
        .split('.')
        .map(|segment| match Token::from_keyword(segment) {
            Some(Token::SelfKw) | None => segment.to_string(),
            Some(_) => format!("#{}", segment),
        })
        .collect();
    segments.join(".")
}

pub fn format_predicate(predicate: &Predicate) -> String {
    match predicate {
        Predicate::Constant(true) => "TRUEPREDICATE".to_string(),
        Predicate::Constant(false) => "FALSEPREDICATE".to_string(),
        Predicate::Comparison(comparison) => format_comparison(comparison),
        Predicate::Compound {
            kind: CompoundKind::Not,
            subpredicates,
        } => match subpredicates.first() {
            Some(inner @ (Predicate::Comparison(_) | Predicate::Compound { .. }))
                if !is_not(inner) =>
            {
                format!("NOT {}", format_predicate(inner))
            }
            Some(inner) => format!("NOT ({})", format_predicate(inner)),
            None => "NOT (FALSEPREDICATE)".to_string(),
        },
        Predicate::Compound { subpredicates, .. } if subpredicates.is_empty() => {
            "FALSEPREDICATE".to_string()
        }
        Predicate::Compound { subpredicates, .. } if subpredicates.len() == 1 => {
            format_predicate(&subpredicates[0])
        }
        Predicate::Compound {
            kind,
            subpredicates,
        } => {
            let separator = if *kind == CompoundKind::And {
                " AND "
            } else {
                " OR "
            };
            let parts: Vec<String> = subpredicates.iter().map(format_predicate).collect();
            format!("({})", parts.join(separator))
        }
    }
}

fn is_not(predicate: &Predicate) -> bool {
    matches!(
        predicate,
        Predicate::Compound {
            kind: CompoundKind::Not,
            ..
        }
    )
}

fn format_comparison(comparison: &Comparison) -> String {
    let quantifier = match comparison.modifier {
        Modifier::Direct => "",
        Modifier::Any => "ANY ",
        Modifier::All => "ALL ",
    };
    let options = if comparison.options.is_empty() {
        String::new()
    } else {
        format!("[{}]", comparison.options.flags())
    };
    format!(
        "({}{} {}{} {})",
        quantifier,
        format_operand(&comparison.left),
        comparison.operator,
        options,
        format_operand(&comparison.right)
    )
}

fn format_list(items: &[Expr]) -> String {
    if items.is_empty() {
        return "{}".to_string();
    }
    let parts: Vec<String> = items.iter().map(format_operand).collect();
    format!("{{ {} }}", parts.join(", "))
}

fn infix_symbol(selector: &str) -> Option<&'static str> {
    match selector {
        "add:to:" => Some("+"),
        "from:subtract:" => Some("-"),
        "multiply:by:" => Some("*"),
        "divide:by:" => Some("/"),
        "raise:toPower:" => Some("**"),
        _ => None,
    }
}

fn format_function(name: &str, args: &[Expr]) -> String {
    if let [lhs, rhs] = args {
        if let Some(symbol) = infix_symbol(name) {
            return format!("({} {} {})", format_operand(lhs), symbol, format_operand(rhs));
        }
        if name.eq_ignore_ascii_case("objectFrom:withIndex:") {
            return format!("{}[{}]", format_operand(lhs), format_operand(rhs));
        }
    }

    let colons = name.matches(':').count();
    let rendered: Vec<String> = args.iter().map(format_operand).collect();
    match rendered.as_slice() {
        [] => format!("{}()", name),
        [receiver, argument] if colons == 1 => {
            format!("FUNCTION({}, {}, {})", receiver, quote(name), argument)
        }
        _ => format!("FUNCTION({}, {})", quote(name), rendered.join(", ")),
    }
}

fn quote(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('\'');
    for ch in s.chars() {
        match ch {
            '\'' => out.push_str("\\'"),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\t' => out.push_str("\\t"),
            '\r' => out.push_str("\\r"),
            '%' => out.push_str("%%"),
            c => out.push(c),
        }
    }
    out.push('\'');
    out
}

fn format_double(n: f64) -> String {
    let text = n.to_string();
    if n.is_finite() && !text.contains(['.', 'e', 'E']) {
        format!("{}.0", text)
    } else {
        text
    }
}

/// Renders a constant as a literal.
pub fn format_value(value: &Value) -> String {
    match value {
        Value::Null => "nil".to_string(),
        Value::Boolean(true) => "YES".to_string(),
        Value::Boolean(false) => "NO".to_string(),
        Value::Float(n) => format_double(f64::from(*n)),
        Value::Double(n) => format_double(*n),
        Value::String(s) => quote(s),
        Value::Guid(g) => quote(&g.to_string()),
        Value::Date(d) => format!(
            "CAST({}, 'NSDate')",
            quote(&d.to_rfc3339_opts(SecondsFormat::AutoSi, true))
        ),
        Value::Array(items) => {
            let exprs: Vec<Expr> = items.iter().cloned().map(Expr::Constant).collect();
            format_list(&exprs)
        }
        Value::Object(_) => quote(&value.to_string()),
        number => number.to_string(),
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&format_expr(self))
    }
}

impl fmt::Display for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&format_predicate(self))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{ComparisonOptions, Operator};

    #[test]
    fn test_constants() {
        assert_eq!(format_value(&Value::from("Hello World")), "'Hello World'");
        assert_eq!(format_value(&Value::from("it's")), "'it\\'s'");
        assert_eq!(format_value(&Value::Null), "nil");
        assert_eq!(format_value(&Value::Double(8.0)), "8.0");
        assert_eq!(format_value(&Value::Boolean(true)), "YES");
    }

    #[test]
    fn test_function_forms() {
        assert_eq!(format_expr(&Expr::function("now", vec![])), "now()");
        assert_eq!(
            format_expr(&Expr::function(
                "dateByAddingDays:",
                vec![Expr::function("now", vec![]), Expr::constant(-2)]
            )),
            "FUNCTION(now(), 'dateByAddingDays:', -2)"
        );
        assert_eq!(
            format_expr(&Expr::function(
                "modulus:by:",
                vec![Expr::constant(10), Expr::constant(7)]
            )),
            "FUNCTION('modulus:by:', 10, 7)"
        );
        assert_eq!(
            format_expr(&Expr::function(
                "add:to:",
                vec![Expr::constant(1), Expr::constant(2)]
            )),
            "(1 + 2)"
        );
    }

    #[test]
    fn test_comparison_options_order() {
        let options = ComparisonOptions {
            case_insensitive: true,
            diacritic_insensitive: true,
            normalized: false,
        };
        let p = Predicate::compare_with(
            Expr::key_path("name"),
            Operator::EqualTo,
            Expr::constant("x"),
            Modifier::Direct,
            options,
        );
        assert_eq!(format_predicate(&p), "(name ==[cd] 'x')");
    }

    #[test]
    fn test_compounds() {
        let a = Predicate::compare(Expr::key_path("a"), Operator::EqualTo, Expr::constant(1));
        let b = Predicate::Constant(true);
        assert_eq!(
            format_predicate(&Predicate::and(vec![a.clone(), b])),
            "((a == 1) AND TRUEPREDICATE)"
        );
        assert_eq!(format_predicate(&Predicate::not(a)), "NOT (a == 1)");
        assert_eq!(format_predicate(&Predicate::or(vec![])), "FALSEPREDICATE");
        assert_eq!(
            format_predicate(&Predicate::and(vec![Predicate::Constant(true)])),
            "TRUEPREDICATE"
        );
    }

    #[test]
    fn test_keyword_segments_are_escaped() {
        assert_eq!(format_expr(&Expr::key_path("contains")), "#contains");
        assert_eq!(format_expr(&Expr::key_path("order.in.total")), "order.#in.total");
        assert_eq!(format_expr(&Expr::key_path("items.@count")), "items.@count");
    }

    #[test]
    fn test_nested_assignments_are_parenthesized() {
        let assign = Expr::assignment("a", Expr::constant(1));
        assert_eq!(format_expr(&assign), "$a := 1");
        assert_eq!(
            format_expr(&Expr::function("add:to:", vec![assign, Expr::constant(2)])),
            "(($a := 1) + 2)"
        );
    }

    #[test]
    fn test_aggregates() {
        assert_eq!(format_expr(&Expr::aggregate(vec![])), "{}");
        assert_eq!(
            format_expr(&Expr::aggregate(vec![Expr::constant(0), Expr::constant(2)])),
            "{ 0, 2 }"
        );
    }
}

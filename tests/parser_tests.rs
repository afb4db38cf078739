// tests/parser_tests.rs

use sieve_lang::{
    CompoundKind, Error, Expr, Modifier, Operator, Predicate, SymbolicValue, Value,
};

fn round_trip(source: &str) -> String {
    Predicate::parse(source, &[])
        .unwrap_or_else(|e| panic!("failed to parse {:?}: {}", source, e))
        .to_string()
}

fn expr_round_trip(source: &str) -> String {
    Expr::parse(source, &[])
        .unwrap_or_else(|e| panic!("failed to parse {:?}: {}", source, e))
        .to_string()
}

// ============================================================================
// Precedence and grouping
// ============================================================================

#[test]
fn test_and_binds_tighter_than_or() {
    assert_eq!(
        round_trip("a == 1 AND b == 2 OR c == 3"),
        "(((a == 1) AND (b == 2)) OR (c == 3))"
    );
}

#[test]
fn test_chained_and_stays_flat() {
    let predicate = Predicate::parse("a == 1 && b == 2 && c == 3", &[]).unwrap();
    match predicate {
        Predicate::Compound {
            kind: CompoundKind::And,
            subpredicates,
        } => assert_eq!(subpredicates.len(), 3),
        other => panic!("expected AND, got {:?}", other),
    }
}

#[test]
fn test_parentheses_group_expressions() {
    assert_eq!(round_trip("(a + b) * 2 > 3"), "(((a + b) * 2) > 3)");
    assert_eq!(round_trip("(a > 1) OR (b < 2)"), "((a > 1) OR (b < 2))");
}

#[test]
fn test_arithmetic_precedence() {
    assert_eq!(expr_round_trip("1 + 2 + 3 * 9"), "((1 + 2) + (3 * 9))");
    assert_eq!(expr_round_trip("2 ** 3 ** 2"), "(2 ** (3 ** 2))");
    assert_eq!(expr_round_trip("10 - -3"), "(10 - -3)");
}

#[test]
fn test_not_prefix() {
    assert_eq!(round_trip("NOT name == 'x'"), "NOT (name == 'x')");
    assert_eq!(round_trip("!(a == 1 OR b == 2)"), "NOT ((a == 1) OR (b == 2))");
}

// ============================================================================
// Comparisons
// ============================================================================

#[test]
fn test_comparison_options() {
    let predicate = Predicate::parse("name BEGINSWITH[cd] 'jo'", &[]).unwrap();
    match predicate {
        Predicate::Comparison(comparison) => {
            assert_eq!(comparison.operator, Operator::BeginsWith);
            assert!(comparison.options.case_insensitive);
            assert!(comparison.options.diacritic_insensitive);
        }
        other => panic!("expected comparison, got {:?}", other),
    }
}

#[test]
fn test_unknown_option_is_a_syntax_error() {
    let result = Predicate::parse("name ==[q] 'x'", &[]);
    assert!(matches!(result, Err(Error::Syntax { .. })));
}

#[test]
fn test_quantifiers() {
    assert_eq!(round_trip("ANY tags == 'x'"), "(ANY tags == 'x')");
    assert_eq!(round_trip("ALL scores > 5"), "(ALL scores > 5)");
    assert_eq!(round_trip("NONE tags == 'x'"), "NOT (ANY tags == 'x')");
}

#[test]
fn test_none_is_not_any() {
    let predicate = Predicate::parse("NONE tags == 'x'", &[]).unwrap();
    match predicate {
        Predicate::Compound {
            kind: CompoundKind::Not,
            subpredicates,
        } => match &subpredicates[0] {
            Predicate::Comparison(comparison) => assert_eq!(comparison.modifier, Modifier::Any),
            other => panic!("expected comparison, got {:?}", other),
        },
        other => panic!("expected NOT, got {:?}", other),
    }
}

#[test]
fn test_between_and_in() {
    assert_eq!(round_trip("age BETWEEN {18, 65}"), "(age BETWEEN { 18, 65 })");
    assert_eq!(round_trip("'b' IN {'a', 'b'}"), "('b' IN { 'a', 'b' })");
}

#[test]
fn test_predicate_constants() {
    assert_eq!(round_trip("TRUEPREDICATE"), "TRUEPREDICATE");
    assert_eq!(round_trip("FALSEPREDICATE OR TRUEPREDICATE"), "(FALSEPREDICATE OR TRUEPREDICATE)");
}

// ============================================================================
// Key paths, functions and subqueries
// ============================================================================

#[test]
fn test_key_path_segments_fold() {
    let expr = Expr::parse("address.city.name", &[]).unwrap();
    assert_eq!(expr, Expr::key_path("address.city.name"));
}

#[test]
fn test_collection_operators_and_indexes() {
    assert_eq!(expr_round_trip("items.@count"), "items.@count");
    assert_eq!(expr_round_trip("items[0]"), "items[0]");
    assert_eq!(expr_round_trip("items[LAST]"), "items[LAST]");

    let expr = Expr::parse("items[SIZE]", &[]).unwrap();
    match expr {
        Expr::Function { name, args } => {
            assert_eq!(name, "objectFrom:withIndex:");
            assert_eq!(args[1], Expr::Symbolic(SymbolicValue::Size));
        }
        other => panic!("expected index function, got {:?}", other),
    }
}

#[test]
fn test_function_forms() {
    assert_eq!(
        expr_round_trip("FUNCTION(now(), 'dateByAddingDays:', -2)"),
        "FUNCTION(now(), 'dateByAddingDays:', -2)"
    );
    assert_eq!(
        expr_round_trip("FUNCTION('modulus:by:', 10, 7)"),
        "FUNCTION('modulus:by:', 10, 7)"
    );
    assert_eq!(expr_round_trip("sum(scores)"), "FUNCTION('sum:', scores)");
}

#[test]
fn test_subquery() {
    assert_eq!(
        expr_round_trip("SUBQUERY(items, $x, $x.price > 10).@count"),
        "SUBQUERY(items, $x, ($x.price > 10)).@count"
    );
}

#[test]
fn test_subquery_requires_variable() {
    let result = Expr::parse("SUBQUERY(items, x, x.price > 10)", &[]);
    assert!(matches!(result, Err(Error::Syntax { .. })));
}

#[test]
fn test_assignment() {
    let expr = Expr::parse("$a := 1 + 2", &[]).unwrap();
    assert!(matches!(expr, Expr::Assignment { ref variable, .. } if variable == "a"));
    assert_eq!(expr.to_string(), "$a := (1 + 2)");

    let result = Expr::parse("a := 1", &[]);
    assert!(matches!(result, Err(Error::Syntax { .. })));
}

#[test]
fn test_nested_assignment_keeps_its_scope() {
    assert_eq!(expr_round_trip("($a := 1) + 2"), "(($a := 1) + 2)");
    assert_eq!(expr_round_trip("(($a := 1) + 2)"), "(($a := 1) + 2)");
}

#[test]
fn test_integer_literal_widths() {
    let value = |source: &str| match Expr::parse(source, &[]).unwrap() {
        Expr::Constant(value) => value,
        other => panic!("expected a constant, got {:?}", other),
    };
    assert_eq!(value("2147483647"), Value::Int(i32::MAX));
    assert_eq!(value("-2147483648"), Value::Int(i32::MIN));
    assert_eq!(value("2147483648"), Value::Long(2_147_483_648));
    assert_eq!(value("-9223372036854775808"), Value::Long(i64::MIN));
    assert_eq!(value("18446744073709551615"), Value::ULong(u64::MAX));

    let result = Expr::parse("18446744073709551616", &[]);
    assert!(matches!(result, Err(Error::Syntax { .. })));
}

#[test]
fn test_escaped_keyword_key_paths() {
    assert_eq!(round_trip("#contains == 1"), "(#contains == 1)");
    assert_eq!(round_trip("order.#in == 1"), "(order.#in == 1)");
}

// ============================================================================
// Placeholders
// ============================================================================

#[test]
fn test_placeholder_substitution() {
    let args = [Value::from("name"), Value::from("Bob")];
    let predicate = Predicate::parse("%K == %@", &args).unwrap();
    assert_eq!(predicate.to_string(), "(name == 'Bob')");
}

#[test]
fn test_placeholder_type_mismatch() {
    let result = Predicate::parse("age > %d", &[Value::from("old")]);
    assert!(matches!(result, Err(Error::Syntax { .. })));
}

#[test]
fn test_argument_count_mismatch() {
    let result = Predicate::parse("a == %@ AND b == %@", &[Value::Int(1)]);
    assert!(matches!(result, Err(Error::Syntax { .. })));
}

#[test]
fn test_percent_inside_string_is_not_a_placeholder() {
    let predicate = Predicate::parse("label == '100%%' AND n == %d", &[Value::Int(3)]).unwrap();
    assert_eq!(predicate.to_string(), "((label == '100%%') AND (n == 3))");
}

// ============================================================================
// Errors
// ============================================================================

#[test]
fn test_syntax_errors_carry_positions() {
    match Predicate::parse("a == ", &[]) {
        Err(Error::Syntax { position, .. }) => assert_eq!(position, 5),
        other => panic!("expected syntax error, got {:?}", other),
    }
}

#[test]
fn test_trailing_tokens_rejected() {
    assert!(matches!(
        Predicate::parse("a == 1 b", &[]),
        Err(Error::Syntax { .. })
    ));
}

#[test]
fn test_bare_expression_is_not_a_predicate() {
    assert!(matches!(
        Predicate::parse("a + 1", &[]),
        Err(Error::Syntax { .. })
    ));
    assert_eq!(round_trip("YES"), "TRUEPREDICATE");
}

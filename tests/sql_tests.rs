// tests/sql_tests.rs

use sieve_lang::{
    CompileOptions, Dialect, Error, Expr, Predicate, RecordType, TypeKind, Value, compile_expr,
    compile_predicate,
};

fn person() -> TypeKind {
    let item = RecordType::new("Item")
        .field("name", TypeKind::String)
        .field("price", TypeKind::Long)
        .into_kind();
    RecordType::new("Person")
        .field("name", TypeKind::String)
        .field("age", TypeKind::Long)
        .field("created", TypeKind::Date)
        .field("tags", TypeKind::sequence_of(TypeKind::String))
        .field("items", TypeKind::sequence_of(item))
        .into_kind()
}

fn backend() -> CompileOptions {
    CompileOptions::new().dialect(Dialect::Backend)
}

fn to_sql(source: &str) -> String {
    to_sql_with(source, &[], &backend())
}

fn to_sql_with(source: &str, args: &[Value], options: &CompileOptions) -> String {
    let predicate = Predicate::parse(source, args).unwrap();
    compile_predicate(&predicate, &person(), options)
        .and_then(|compiled| compiled.to_sql())
        .unwrap_or_else(|e| panic!("failed to render {:?}: {}", source, e))
}

fn compile_error(source: &str) -> Error {
    let predicate = Predicate::parse(source, &[]).unwrap();
    match compile_predicate(&predicate, &person(), &backend()).and_then(|c| c.to_sql()) {
        Ok(sql) => panic!("expected {:?} to fail, rendered {}", source, sql),
        Err(e) => e,
    }
}

// ============================================================================
// Comparisons
// ============================================================================

#[test]
fn test_simple_conditions() {
    assert_eq!(to_sql("age >= 21"), "(t0.age >= 21)");
    assert_eq!(to_sql("name != 'Bob'"), "(t0.name <> 'Bob')");
    assert_eq!(
        to_sql("age > 18 AND name BEGINSWITH 'J'"),
        r"((t0.age > 18) AND (t0.name LIKE 'J%' ESCAPE '\'))"
    );
    assert_eq!(
        to_sql("age < 10 OR age > 60 OR name == 'x'"),
        "((t0.age < 10) OR ((t0.age > 60) OR (t0.name = 'x')))"
    );
    assert_eq!(to_sql("NOT age == 3"), "NOT (t0.age = 3)");
}

#[test]
fn test_null_comparisons() {
    assert_eq!(to_sql("name == nil"), "(t0.name IS NULL)");
    assert_eq!(to_sql("nil != name"), "(t0.name IS NOT NULL)");
}

#[test]
fn test_predicate_constants() {
    assert_eq!(to_sql("TRUEPREDICATE"), "TRUE");
    assert_eq!(to_sql("FALSEPREDICATE"), "FALSE");
}

#[test]
fn test_arithmetic() {
    assert_eq!(to_sql("age * 2 + 1 > 30"), "(((t0.age * 2) + 1) > 30)");
    assert_eq!(to_sql("age ** 2 > 100"), "(POWER(CAST(t0.age AS DOUBLE PRECISION), 2.0) > 100.0)");
}

#[test]
fn test_between() {
    assert_eq!(
        to_sql("age BETWEEN {18, 65}"),
        "((t0.age >= 18) AND (t0.age <= 65))"
    );
}

#[test]
fn test_membership() {
    assert_eq!(to_sql("name IN {'a', 'b'}"), "(t0.name IN ('a', 'b'))");
    assert_eq!(
        to_sql("'vip' IN tags"),
        "('vip' IN (SELECT t1 FROM t0.tags AS t1))"
    );
}

// ============================================================================
// String operators
// ============================================================================

#[test]
fn test_like_patterns() {
    assert_eq!(
        to_sql("name LIKE 'J*n?'"),
        r"(t0.name LIKE 'J%n_' ESCAPE '\')"
    );
    assert_eq!(
        to_sql("name CONTAINS '50%%'"),
        r"(t0.name LIKE '%50\%%' ESCAPE '\')"
    );
    assert_eq!(
        to_sql("name ENDSWITH \"o's\""),
        r"(t0.name LIKE '%o''s' ESCAPE '\')"
    );
}

#[test]
fn test_matches() {
    assert_eq!(
        to_sql("name MATCHES '[A-Z].*'"),
        "REGEXP_LIKE(t0.name, '[A-Z].*')"
    );
}

#[test]
fn test_case_insensitive_folding() {
    assert_eq!(to_sql("name ==[c] 'BOB'"), "(LOWER(t0.name) = 'bob')");

    let collated = backend().case_insensitive_collation(true);
    assert_eq!(
        to_sql_with("name ==[c] 'BOB'", &[], &collated),
        "(t0.name = 'BOB')"
    );
}

// ============================================================================
// Collections
// ============================================================================

#[test]
fn test_subquery_count() {
    assert_eq!(
        to_sql("SUBQUERY(items, $x, $x.price > 10).@count > 2"),
        "((SELECT COUNT(*) FROM t0.items AS t1 WHERE (t1.price > 10)) > 2)"
    );
}

#[test]
fn test_quantifiers() {
    assert_eq!(
        to_sql("ANY tags == 'x'"),
        "EXISTS (SELECT 1 FROM t0.tags AS t1 WHERE (t1 = 'x'))"
    );
    assert_eq!(
        to_sql("ALL items.price > 5"),
        "NOT EXISTS (SELECT 1 FROM t0.items AS t1 WHERE NOT (t1.price > 5))"
    );
    assert_eq!(
        to_sql("NONE tags == 'x'"),
        "NOT EXISTS (SELECT 1 FROM t0.tags AS t1 WHERE (t1 = 'x'))"
    );
}

#[test]
fn test_aliases_are_not_reused() {
    assert_eq!(
        to_sql("ANY items.name == 'x' AND ANY tags == 'y'"),
        "(EXISTS (SELECT 1 FROM t0.items AS t1 WHERE (t1.name = 'x')) \
         AND EXISTS (SELECT 1 FROM t0.tags AS t2 WHERE (t2 = 'y')))"
    );
}

#[test]
fn test_aggregates() {
    assert_eq!(
        to_sql("items.@sum.price > 100"),
        "((SELECT SUM(t1.price) FROM t0.items AS t1) > 100)"
    );
    assert_eq!(to_sql("tags.@count == 0"), "((SELECT COUNT(*) FROM t0.tags AS t1) = 0)");
}

// ============================================================================
// Dates and functions
// ============================================================================

#[test]
fn test_date_offsets() {
    assert_eq!(
        to_sql("created > FUNCTION(now(), 'dateByAddingDays:', -2)"),
        "(t0.created > DATEADD(day, CAST(-2 AS INT), CURRENT_TIMESTAMP))"
    );
    assert_eq!(
        to_sql("created < FUNCTION(now(), 'dateByAddingMonths:', 1.7)"),
        "(t0.created < DATEADD(month, CAST(1 AS INT), CURRENT_TIMESTAMP))"
    );
}

#[test]
fn test_casts_are_rejected() {
    let error = compile_error("CAST(age, 'NSString') == '3'");
    assert!(matches!(
        error,
        Error::UnsupportedInDialect {
            dialect: Dialect::Backend,
            ..
        }
    ));
}

#[test]
fn test_external_variables_are_inlined() {
    let options = backend().variable("min", Value::Long(21));
    assert_eq!(to_sql_with("age >= $min", &[], &options), "(t0.age >= 21)");
}

#[test]
fn test_placeholders() {
    assert_eq!(
        to_sql_with("%K == %@", &[Value::from("name"), Value::from("it's")], &backend()),
        "(t0.name = 'it''s')"
    );
}

#[test]
fn test_expression_rendering() {
    let expr = Expr::parse("age + 1", &[]).unwrap();
    let compiled = compile_expr(&expr, &person(), None, &backend()).unwrap();
    assert_eq!(compiled.to_sql().unwrap(), "(t0.age + 1)");
}

// tests/compiler_tests.rs

use chrono::{TimeZone, Utc};
use sieve_lang::{
    CompileOptions, Dialect, Error, Expr, GuidRewriter, Operator, PascalCaseRewriter, Predicate,
    RecordType, TypeKind, Value, compile_predicate, format_predicate,
};

fn canonical(source: &str) -> String {
    format_predicate(&Predicate::parse(source, &[]).unwrap())
}

fn reparse(predicate: &Predicate) -> Predicate {
    Predicate::parse(&predicate.to_string(), &[])
        .unwrap_or_else(|e| panic!("{} does not parse back: {}", predicate, e))
}

// ============================================================================
// Formatting round trips
// ============================================================================

#[test]
fn test_formatting_is_a_fixed_point() {
    let sources = [
        "a == 1 AND (b == 2 OR NOT c == 3)",
        "name BEGINSWITH[cd] 'J' AND age BETWEEN {18, 65}",
        "ANY children.age > 5 OR NONE tags == 'x'",
        "SUBQUERY(items, $x, $x.price > 10 AND $x.name CONTAINS 'a').@count == 2",
        "FUNCTION(now(), 'dateByAddingDays:', -2) < created",
        "items[LAST].price ** 2 >= 100.5",
        "label == 'it\\'s 100%%' OR SELF.@count == 0",
        "$total := price * quantity > 10",
    ];

    for source in sources {
        let once = canonical(source);
        let twice = canonical(&once);
        assert_eq!(once, twice, "formatting {:?} is not stable", source);
    }
}

#[test]
fn test_constants_render_back() {
    let predicate = Predicate::parse(
        "flag == %@ AND ratio == %@ AND missing == %@",
        &[Value::Boolean(true), Value::Double(2.0), Value::Null],
    )
    .unwrap();
    assert_eq!(
        predicate.to_string(),
        "((flag == YES) AND (ratio == 2.0) AND (missing == nil))"
    );
}

#[test]
fn test_constructed_trees_parse_back() {
    let n = || Expr::key_path("n");
    let trees = vec![
        Predicate::compare(Expr::key_path("contains"), Operator::EqualTo, Expr::constant(1)),
        Predicate::compare(Expr::key_path("order.in.yes"), Operator::EqualTo, Expr::constant(2)),
        Predicate::compare(n(), Operator::GreaterThan, Expr::Constant(Value::Long(i64::MIN))),
        Predicate::compare(n(), Operator::LessThan, Expr::Constant(Value::ULong(u64::MAX))),
        Predicate::compare(n(), Operator::NotEqualTo, Expr::Constant(Value::Int(i32::MIN))),
        Predicate::compare(n(), Operator::EqualTo, Expr::Constant(Value::Long(5_000_000_000))),
        Predicate::compare(
            Expr::function(
                "add:to:",
                vec![Expr::assignment("a", Expr::constant(1)), Expr::constant(2)],
            ),
            Operator::EqualTo,
            Expr::variable("a"),
        ),
    ];

    for tree in trees {
        let parsed = reparse(&tree);
        assert_eq!(parsed, tree, "{} changed shape", tree);
        assert_eq!(parsed.to_string(), tree.to_string());
    }
}

#[test]
fn test_keyword_property_evaluates_after_round_trip() {
    let tree = Predicate::compare(Expr::key_path("contains"), Operator::EqualTo, Expr::constant(1));
    let row = {
        let mut map = std::collections::HashMap::new();
        map.insert("contains".to_string(), Value::Long(1));
        Value::Object(map)
    };
    assert!(reparse(&tree).evaluate(&row).unwrap());
}

#[test]
fn test_single_member_compound_round_trip() {
    let inner = Predicate::compare(
        Expr::key_path("score"),
        Operator::GreaterThanOrEqualTo,
        Expr::constant(10),
    );
    let single = Predicate::and(vec![inner.clone()]);
    assert_eq!(single.to_string(), "(score >= 10)");
    assert_eq!(reparse(&single), inner);

    let row = {
        let mut map = std::collections::HashMap::new();
        map.insert("score".to_string(), Value::Long(12));
        Value::Object(map)
    };
    assert!(single.evaluate(&row).unwrap());
    assert!(reparse(&single).evaluate(&row).unwrap());
}

#[test]
fn test_date_constant_round_trip_in_backend() {
    let moment = Utc.with_ymd_and_hms(2024, 3, 10, 12, 0, 0).unwrap();
    let root = RecordType::new("Event")
        .field("created", TypeKind::Date)
        .into_kind();
    let tree = Predicate::compare(
        Expr::key_path("created"),
        Operator::GreaterThan,
        Expr::Constant(Value::Date(moment)),
    );
    let options = CompileOptions::new().dialect(Dialect::Backend);
    let sql = |predicate: &Predicate| {
        compile_predicate(predicate, &root, &options)
            .and_then(|c| c.to_sql())
            .unwrap()
    };

    assert_eq!(sql(&tree), "(t0.created > TIMESTAMP '2024-03-10T12:00:00Z')");
    assert_eq!(sql(&reparse(&tree)), sql(&tree));
}

// ============================================================================
// Rewriting passes
// ============================================================================

#[test]
fn test_pascal_case_rewriter_feeds_typed_records() {
    let root = RecordType::new("Person")
        .field("Name", TypeKind::String)
        .field("Age", TypeKind::Long)
        .into_kind();

    let predicate = Predicate::parse("name == 'Ann' AND age > 3", &[]).unwrap();
    assert!(matches!(
        compile_predicate(&predicate, &root, &CompileOptions::new()),
        Err(Error::Type(_))
    ));

    let renamed = predicate.rewritten(&mut PascalCaseRewriter);
    assert_eq!(renamed.to_string(), "((Name == 'Ann') AND (Age > 3))");
    let options = CompileOptions::new().dialect(Dialect::Backend);
    let sql = compile_predicate(&renamed, &root, &options)
        .and_then(|c| c.to_sql())
        .unwrap();
    assert_eq!(sql, "((t0.Name = 'Ann') AND (t0.Age > 3))");
}

#[test]
fn test_guid_rewriter_in_subqueries() {
    let mut predicate = Predicate::parse(
        "SUBQUERY(owners, $o, $o.id == '6f9619ff-8b86-d011-b42d-00c04fc964ff').@count > 0 \
         AND code == 'abc'",
        &[],
    )
    .unwrap();
    let mut rewriter = GuidRewriter::default();
    predicate.visit(&mut rewriter);
    assert_eq!(rewriter.rewritten, 1);
}

// ============================================================================
// Dialect differences
// ============================================================================

#[test]
fn test_same_predicate_both_dialects() {
    let predicate = Predicate::parse("score >= 10 AND name ==[c] 'ann'", &[]).unwrap();
    let row = {
        let mut map = std::collections::HashMap::new();
        map.insert("score".to_string(), Value::Long(12));
        map.insert("name".to_string(), Value::from("Ann"));
        Value::Object(map)
    };

    let objects = compile_predicate(&predicate, &TypeKind::of_value(&row), &CompileOptions::new())
        .unwrap();
    assert_eq!(objects.dialect(), Dialect::Objects);
    assert!(objects.evaluate(&row).unwrap());

    let backend = compile_predicate(
        &predicate,
        &TypeKind::Any,
        &CompileOptions::new().dialect(Dialect::Backend),
    )
    .unwrap();
    assert_eq!(backend.dialect(), Dialect::Backend);
    assert_eq!(
        backend.to_sql().unwrap(),
        "((t0.score >= 10) AND (LOWER(t0.name) = 'ann'))"
    );
}

#[test]
fn test_objects_dialect_does_not_render_sql() {
    let predicate = Predicate::parse("score >= 10", &[]).unwrap();
    let compiled = compile_predicate(&predicate, &TypeKind::Any, &CompileOptions::new()).unwrap();
    assert!(matches!(
        compiled.to_sql(),
        Err(Error::UnsupportedInDialect {
            dialect: Dialect::Objects,
            ..
        })
    ));
}

#[test]
fn test_casts_in_objects_dialect() {
    let value = |source: &str| Expr::parse(source, &[]).unwrap().value().unwrap();
    assert_eq!(value("CAST('42', 'NSNumber')"), Value::Double(42.0));
    assert_eq!(value("CAST(7, 'NSString')"), Value::from("7"));
    assert!(matches!(value("CAST(0, 'NSDate')"), Value::Date(_)));

    let bad = Expr::parse("CAST(1, 'NSArray')", &[]).unwrap().value();
    assert!(matches!(bad, Err(Error::Type(_))));
}

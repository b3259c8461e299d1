use serde_json::{json, Value};
use stepcore::ConditionError;
use stepruntime::condition::{
    evaluate_condition, evaluate_conditions, evaluate_resolved, parse_condition_groups, Condition,
    ConditionOperator,
};

fn check(operator: ConditionOperator, first: Value, second: Value) -> bool {
    evaluate_condition(&Condition::new(operator, first, second))
}

#[test]
fn test_text_operators_ignore_case_by_default() {
    use ConditionOperator::*;
    assert!(check(TextContains, json!("Hello World"), json!("world")));
    assert!(check(TextExactlyMatches, json!("ABC"), json!("abc")));
    assert!(check(TextStartsWith, json!("Prefix-1"), json!("prefix")));
    assert!(check(TextEndsWith, json!("file.JSON"), json!(".json")));
    assert!(check(TextNotContains, json!("abc"), json!("z")));
    assert!(!check(TextNotExactlyMatches, json!("abc"), json!("ABC")));
}

#[test]
fn test_case_sensitive_text_match() {
    let condition = Condition::new(ConditionOperator::TextExactlyMatches, json!("ABC"), json!("abc")).case_sensitive();
    assert!(!evaluate_condition(&condition));

    let condition = Condition::new(ConditionOperator::TextContains, json!("aBc"), json!("B")).case_sensitive();
    assert!(evaluate_condition(&condition));
}

#[test]
fn test_text_operands_are_stringified() {
    use ConditionOperator::*;
    assert!(check(TextExactlyMatches, json!(42), json!("42")));
    assert!(check(TextContains, json!({ "a": 1 }), json!("\"a\"")));
    assert!(check(TextExactlyMatches, Value::Null, json!("")));
}

#[test]
fn test_number_comparisons() {
    use ConditionOperator::*;
    assert!(check(NumberGreaterThan, json!(10), json!("9.5")));
    assert!(check(NumberLessThan, json!("-1"), json!(0)));
    assert!(check(NumberEqualTo, json!("3.0"), json!(3)));
    assert!(!check(NumberEqualTo, json!(3), json!(4)));
}

#[test]
fn test_boolean_operators() {
    use ConditionOperator::*;
    assert!(check(BooleanIsTrue, json!(true), Value::Null));
    assert!(!check(BooleanIsTrue, json!(false), Value::Null));
    assert!(check(BooleanIsFalse, json!(false), Value::Null));
    assert!(check(BooleanIsFalse, Value::Null, Value::Null));
    assert!(!check(BooleanIsFalse, json!(1), Value::Null));
}

#[test]
fn test_existence() {
    use ConditionOperator::*;
    assert!(check(Exists, json!(0), Value::Null));
    assert!(check(Exists, json!(false), Value::Null));
    assert!(!check(Exists, json!(""), Value::Null));
    assert!(check(DoesNotExist, Value::Null, Value::Null));
}

#[test]
fn test_date_comparisons() {
    use ConditionOperator::*;
    assert!(check(DateIsAfter, json!("2024-03-02"), json!("2024-03-01T23:59:59Z")));
    assert!(check(DateIsBefore, json!("2024-01-01T00:00:00+02:00"), json!("2024-01-01T00:00:00Z")));
    assert!(check(DateIsAfter, json!(1_700_000_000_000i64), json!("2023-01-01")));
    assert!(!check(DateIsAfter, json!("not a date"), json!("2023-01-01")));
}

#[test]
fn test_list_operators() {
    use ConditionOperator::*;
    assert!(check(ListIsEmpty, json!([]), Value::Null));
    assert!(check(ListIsNotEmpty, json!("[1, 2]"), Value::Null));
    assert!(!check(ListIsEmpty, json!("plain text"), Value::Null));
    assert!(check(ListCountGreaterThan, json!([1, 2, 3]), json!("2")));
    assert!(check(ListCountEqualTo, json!([1, 2, 3]), json!(3)));
    assert!(check(ListCountLessThan, json!([]), json!(1)));
}

#[test]
fn test_list_contains_decodes_target() {
    use ConditionOperator::*;
    assert!(check(ListContains, json!([1, 2, 3]), json!("2")));
    assert!(check(ListContains, json!(["a", "b"]), json!("b")));
    assert!(check(ListContains, json!([{ "id": 7 }]), json!("{\"id\": 7}")));
    assert!(check(ListNotContains, json!(["a"]), json!("z")));
}

#[test]
fn test_groups_are_or_of_and() {
    let groups = vec![
        vec![
            Condition::new(ConditionOperator::BooleanIsTrue, json!(true), Value::Null),
            Condition::new(ConditionOperator::BooleanIsTrue, json!(false), Value::Null),
        ],
        vec![Condition::new(ConditionOperator::Exists, json!("x"), Value::Null)],
    ];
    assert!(evaluate_conditions(&groups));
    assert!(!evaluate_conditions(&groups[..1]));
    assert!(!evaluate_conditions(&[]));
}

#[test]
fn test_parse_resolved_groups() {
    let resolved = json!([
        [{ "operator": "TEXT_CONTAINS", "firstValue": "abc", "secondValue": "B", "caseSensitive": true }],
        [{ "operator": "NUMBER_IS_GREATER_THAN", "firstValue": 2, "secondValue": 1 }]
    ]);
    let groups = parse_condition_groups(&resolved).unwrap();
    assert_eq!(groups.len(), 2);
    assert!(groups[0][0].case_sensitive);
    assert_eq!(groups[1][0].operator, ConditionOperator::NumberGreaterThan);
    assert!(evaluate_resolved(&resolved).unwrap());
    assert!(!evaluate_resolved(&Value::Null).unwrap());
}

#[test]
fn test_invalid_operator_fails_even_after_a_match() {
    let resolved = json!([
        [{ "operator": "EXISTS", "firstValue": "x" }],
        [{ "operator": "TEXT_SOUNDS_LIKE", "firstValue": "x", "secondValue": "y" }]
    ]);
    assert_eq!(
        evaluate_resolved(&resolved),
        Err(ConditionError::InvalidOperator("TEXT_SOUNDS_LIKE".to_string()))
    );

    let missing = json!([[{ "firstValue": "x" }]]);
    assert!(matches!(
        evaluate_resolved(&missing),
        Err(ConditionError::InvalidOperator(op)) if op.is_empty()
    ));
}

#[test]
fn test_malformed_groups() {
    assert!(matches!(
        parse_condition_groups(&json!({ "operator": "EXISTS" })),
        Err(ConditionError::Malformed(_))
    ));
}

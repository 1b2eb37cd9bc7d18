//! Unit tests for capability values

use core_types::Value;
use std::cmp::Ordering;

#[test]
fn test_type_of() {
    assert_eq!(Value::Undefined.type_of(), "undefined");
    assert_eq!(Value::Boolean(true).type_of(), "boolean");
    assert_eq!(Value::Number(1.0).type_of(), "number");
    assert_eq!(Value::String("x".into()).type_of(), "string");
    assert_eq!(Value::keys(["a"]).type_of(), "object");
}

#[test]
fn test_from_conversions() {
    assert_eq!(Value::from(true), Value::Boolean(true));
    assert_eq!(Value::from(4u32), Value::Number(4.0));
    assert_eq!(Value::from("wasm"), Value::String("wasm".to_string()));
}

#[test]
fn test_string_ordering() {
    let a = Value::from("apple");
    let b = Value::from("banana");
    assert_eq!(a.compare(&b), Some(Ordering::Less));
    assert_eq!(b.compare(&a), Some(Ordering::Greater));
}

#[test]
fn test_nan_is_unordered() {
    let nan = Value::Number(f64::NAN);
    assert_eq!(nan.compare(&Value::Number(1.0)), None);
}

#[test]
fn test_display_of_special_numbers() {
    assert_eq!(Value::Number(f64::NAN).to_string(), "NaN");
    assert_eq!(Value::Number(f64::INFINITY).to_string(), "Infinity");
    assert_eq!(Value::Number(-0.5).to_string(), "-0.5");
}

#[test]
fn test_deserialize_from_yaml_like_json() {
    let v: Value = serde_json::from_str("true").unwrap();
    assert_eq!(v, Value::Boolean(true));
    let v: Value = serde_json::from_str("\"debug\"").unwrap();
    assert_eq!(v.as_str(), Some("debug"));
}

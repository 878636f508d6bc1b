//! JSON encoding of expressions and phrases.
//!
//! Expressions use a compact shape-dispatched encoding rather than a tagged
//! one; the decoder recognises the shape by its fields:
//!
//! | JSON shape | Variant |
//! |---|---|
//! | string / integer / bool | primitive |
//! | `["name"]` | variable reference |
//! | `{"identifier": …, "operands": […]}` | constructor application |
//! | `{"operator": …, "operands": […]}` | operator |
//! | `{"iterator": …, "binds": […], "expression": …}` | iterator |
//! | `{"parameter": …, "operand": …}` | projection |
//!
//! Floats are rejected: the only numeric primitive is the 64-bit integer.
//! Decoding and re-encoding an expression is lossless, which the round-trip
//! tests at the bottom of this module pin down.

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{json, Map, Value};

use crate::ast::{Expression, IteratorKind, Operator, Primitive};
use crate::error::ProtocolError;

impl Expression {
    /// Encodes this expression into its wire shape.
    pub fn to_value(&self) -> Value {
        match self {
            Expression::Primitive(Primitive::Int(n)) => json!(n),
            Expression::Primitive(Primitive::String(s)) => json!(s),
            Expression::Primitive(Primitive::Bool(b)) => json!(b),
            Expression::VarRef(name) => json!([name]),
            Expression::Constructor {
                identifier,
                operands,
            } => json!({
                "identifier": identifier,
                "operands": operands.iter().map(Expression::to_value).collect::<Vec<_>>(),
            }),
            Expression::Operator { operator, operands } => json!({
                "operator": operator.as_str(),
                "operands": operands.iter().map(Expression::to_value).collect::<Vec<_>>(),
            }),
            Expression::Iterator {
                iterator,
                binds,
                expression,
            } => json!({
                "iterator": iterator.as_str(),
                "binds": binds,
                "expression": expression.to_value(),
            }),
            Expression::Projection { parameter, operand } => json!({
                "parameter": parameter,
                "operand": operand.to_value(),
            }),
        }
    }

    /// Decodes an expression from its wire shape.
    pub fn from_value(value: &Value) -> Result<Expression, ProtocolError> {
        match value {
            Value::String(s) => Ok(Expression::string(s.clone())),
            Value::Bool(b) => Ok(Expression::bool(*b)),
            Value::Number(n) => n
                .as_i64()
                .map(Expression::int)
                .ok_or_else(|| ProtocolError::MalformedExpression(format!("floats are not supported: {}", n))),
            Value::Array(items) => match items.as_slice() {
                [Value::String(name)] => Ok(Expression::var(name.clone())),
                _ => Err(ProtocolError::MalformedExpression(
                    "a reference must be a single-element array of one name".to_string(),
                )),
            },
            Value::Object(map) => decode_object(map),
            _ => Err(ProtocolError::MalformedExpression(format!(
                "unrecognised expression shape: {}",
                value
            ))),
        }
    }
}

fn decode_object(map: &Map<String, Value>) -> Result<Expression, ProtocolError> {
    if let Some(identifier) = map.get("identifier") {
        let identifier = as_string(identifier, "identifier")?;
        let operands = decode_operands(map)?;
        return Ok(Expression::constructor(identifier, operands));
    }

    if let Some(operator) = map.get("operator") {
        let name = as_string(operator, "operator")?;
        let operator = Operator::from_name(&name)
            .ok_or_else(|| ProtocolError::MalformedExpression(format!("unknown operator: {}", name)))?;
        let operands = decode_operands(map)?;
        return Ok(Expression::operator(operator, operands));
    }

    if let Some(iterator) = map.get("iterator") {
        let name = as_string(iterator, "iterator")?;
        let iterator = IteratorKind::from_name(&name)
            .ok_or_else(|| ProtocolError::MalformedExpression(format!("unknown iterator: {}", name)))?;
        let binds = map
            .get("binds")
            .ok_or(ProtocolError::MissingField("binds"))?
            .as_array()
            .ok_or_else(|| ProtocolError::MalformedExpression("binds must be an array".to_string()))?
            .iter()
            .map(|bind| as_string(bind, "binds"))
            .collect::<Result<Vec<_>, _>>()?;
        let body = map
            .get("expression")
            .ok_or(ProtocolError::MissingField("expression"))?;
        return Ok(Expression::Iterator {
            iterator,
            binds,
            expression: Box::new(Expression::from_value(body)?),
        });
    }

    if let Some(parameter) = map.get("parameter") {
        let parameter = as_string(parameter, "parameter")?;
        let operand = map
            .get("operand")
            .ok_or(ProtocolError::MissingField("operand"))?;
        return Ok(Expression::Projection {
            parameter,
            operand: Box::new(Expression::from_value(operand)?),
        });
    }

    Err(ProtocolError::MalformedExpression(format!(
        "unrecognised expression shape: {}",
        Value::Object(map.clone())
    )))
}

fn decode_operands(map: &Map<String, Value>) -> Result<Vec<Expression>, ProtocolError> {
    map.get("operands")
        .ok_or(ProtocolError::MissingField("operands"))?
        .as_array()
        .ok_or_else(|| ProtocolError::MalformedExpression("operands must be an array".to_string()))?
        .iter()
        .map(Expression::from_value)
        .collect()
}

fn as_string(value: &Value, field: &'static str) -> Result<String, ProtocolError> {
    value
        .as_str()
        .map(str::to_string)
        .ok_or_else(|| ProtocolError::MalformedExpression(format!("field {} must be a string", field)))
}

impl Serialize for Expression {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_value().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Expression {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Expression, D::Error> {
        let value = Value::deserialize(deserializer)?;
        Expression::from_value(&value).map_err(D::Error::custom)
    }
}

/// Decodes a field that holds either one expression or a list of them into
/// a list. Used for `violated-when`, whose older producers emit a single
/// clause.
pub fn one_or_many<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<Vec<Expression>, D::Error> {
    let value = Value::deserialize(deserializer)?;
    match value {
        Value::Array(items) => items
            .iter()
            .map(Expression::from_value)
            .collect::<Result<Vec<_>, _>>()
            .map_err(D::Error::custom),
        other => Ok(vec![Expression::from_value(&other).map_err(D::Error::custom)?]),
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use serde_json::json;

    use crate::ast::{DutyPhrase, Expression, Phrase, PhraseBody};

    fn round_trip(value: serde_json::Value) -> Expression {
        let first = Expression::from_value(&value).unwrap();
        let reencoded = first.to_value();
        let second = Expression::from_value(&reencoded).unwrap();
        assert_eq!(first, second);
        first
    }

    #[test]
    fn decodes_primitives() {
        assert_eq!(round_trip(json!(3)), Expression::int(3));
        assert_eq!(round_trip(json!("Alice")), Expression::string("Alice"));
        assert_eq!(round_trip(json!(true)), Expression::bool(true));
    }

    #[test]
    fn rejects_fractional_numbers() {
        assert!(Expression::from_value(&json!(1.5)).is_err());
    }

    #[test]
    fn decodes_variable_references() {
        assert_eq!(round_trip(json!(["citizen"])), Expression::var("citizen"));
        assert!(Expression::from_value(&json!(["a", "b"])).is_err());
        assert!(Expression::from_value(&json!([3])).is_err());
    }

    #[test]
    fn decodes_constructors_and_operators() {
        let expr = round_trip(json!({
            "operator": "AND",
            "operands": [
                {"identifier": "parent", "operands": [["x"], ["y"]]},
                {"operator": "NOT", "operands": [["x"]]},
            ],
        }));
        assert_eq!(expr.to_string(), "parent(x,y) && !x");
    }

    #[test]
    fn decodes_iterators_and_projections() {
        let expr = round_trip(json!({
            "iterator": "EXISTS",
            "binds": ["x"],
            "expression": {"parameter": "child", "operand": {"identifier": "parent", "operands": [["x"], ["y"]]}},
        }));
        assert_eq!(expr.to_string(), "Exists x : parent(x,y).child");
    }

    #[test]
    fn rejects_unknown_operator_and_shape() {
        assert!(Expression::from_value(&json!({"operator": "XOR", "operands": []})).is_err());
        assert!(Expression::from_value(&json!({"unrelated": 1})).is_err());
        assert!(Expression::from_value(&json!(null)).is_err());
    }

    #[test]
    fn phrases_round_trip_through_json() {
        let value = json!({
            "kind": "create",
            "operand": {"identifier": "citizen", "operands": ["Alice"]},
        });
        let phrase: Phrase = serde_json::from_value(value.clone()).unwrap();
        let reencoded = serde_json::to_value(&phrase).unwrap();
        assert_eq!(reencoded, value);
        let again: Phrase = serde_json::from_value(reencoded).unwrap();
        assert_eq!(again, phrase);
    }

    #[test]
    fn violated_when_accepts_single_clause_or_list() {
        let single: Phrase = serde_json::from_value(json!({
            "kind": "duty",
            "name": "pay",
            "holder": "buyer",
            "claimant": "seller",
            "violated-when": {"operator": "NOT", "operands": [["paid"]]},
        }))
        .unwrap();
        let listed: Phrase = serde_json::from_value(json!({
            "kind": "duty",
            "name": "pay",
            "holder": "buyer",
            "claimant": "seller",
            "violated-when": [{"operator": "NOT", "operands": [["paid"]]}],
        }))
        .unwrap();
        let expect = |phrase: &Phrase| match &phrase.body {
            PhraseBody::Duty(DutyPhrase { violated_when, .. }) => violated_when.clone(),
            _ => panic!("not a duty"),
        };
        assert_eq!(expect(&single), expect(&listed));
        assert_eq!(expect(&single).len(), 1);
    }
}

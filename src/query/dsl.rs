//! JSON DSL parser producing validated plans.
//!
//! The DSL is one JSON object with an optional `predicate` tree and a
//! required `vector` clause:
//!
//! ```json
//! {
//!   "predicate": {
//!     "and": [
//!       {"term": {"field": "tag", "values": [1, 2]}},
//!       {"range": {"field": "score", "ge": 0.5, "lt": 1.0}}
//!     ]
//!   },
//!   "vector": {"field": "vec", "metric": "L2", "topk": 10,
//!              "round_decimal": -1, "params": {"nprobe": 8}}
//! }
//! ```
//!
//! Predicate nodes: `and` / `or` (arrays of two or more nodes, folded
//! left), `not`, `range` (one of `eq`/`ne`, a single bound, or a
//! lower+upper pair), `term`, and `compare`.

use std::sync::Arc;

use serde_json::Value;

use crate::error::{LodestoneError, Result};
use crate::metric::MetricType;
use crate::query::plan::{CompareOp, Expr, Plan, ScalarValue, VectorQueryInfo};
use crate::schema::Schema;

impl Plan {
    /// Parse a DSL string against a schema.
    pub fn from_dsl(schema: Arc<Schema>, dsl: &str) -> Result<Plan> {
        let root: Value = serde_json::from_str(dsl)?;
        let object = root
            .as_object()
            .ok_or_else(|| LodestoneError::query("plan DSL must be a JSON object"))?;

        let predicate = match object.get("predicate") {
            None | Some(Value::Null) => None,
            Some(node) => Some(parse_expr(&schema, node)?),
        };

        let vector = object
            .get("vector")
            .ok_or_else(|| LodestoneError::query("plan DSL is missing the 'vector' clause"))?;
        let vector = parse_vector(&schema, vector)?;

        Plan::new(schema, predicate, vector)
    }
}

fn parse_vector(schema: &Schema, node: &Value) -> Result<VectorQueryInfo> {
    let object = node
        .as_object()
        .ok_or_else(|| LodestoneError::query("'vector' clause must be an object"))?;

    let field_name = object
        .get("field")
        .and_then(Value::as_str)
        .ok_or_else(|| LodestoneError::query("'vector' clause needs a 'field' name"))?;
    let field = schema.offset_of_name(field_name)?;

    let metric = object
        .get("metric")
        .and_then(Value::as_str)
        .ok_or_else(|| LodestoneError::query("'vector' clause needs a 'metric' name"))?;
    let metric = MetricType::parse_str(metric)?;

    let topk = object
        .get("topk")
        .and_then(Value::as_u64)
        .ok_or_else(|| LodestoneError::query("'vector' clause needs a non-negative 'topk'"))?;

    let round_decimal = match object.get("round_decimal") {
        None => -1,
        Some(value) => value.as_i64().ok_or_else(|| {
            LodestoneError::query("'round_decimal' must be an integer")
        })? as i32,
    };

    let search_params = object.get("params").cloned().unwrap_or(Value::Null);

    Ok(VectorQueryInfo {
        field,
        metric,
        topk: topk as usize,
        round_decimal,
        search_params,
    })
}

fn parse_expr(schema: &Schema, node: &Value) -> Result<Expr> {
    let object = node
        .as_object()
        .ok_or_else(|| LodestoneError::query(format!("predicate node must be an object: {node}")))?;
    if object.len() != 1 {
        return Err(LodestoneError::query(format!(
            "predicate node must have exactly one key: {node}"
        )));
    }
    let (key, body) = object
        .iter()
        .next()
        .ok_or_else(|| LodestoneError::query("empty predicate node"))?;

    match key.as_str() {
        "and" | "or" => {
            let children = body.as_array().filter(|nodes| nodes.len() >= 2).ok_or_else(|| {
                LodestoneError::query(format!("'{key}' needs an array of two or more nodes"))
            })?;
            let mut parsed = children
                .iter()
                .map(|child| parse_expr(schema, child))
                .collect::<Result<Vec<_>>>()?;
            let mut expr = parsed.remove(0);
            for right in parsed {
                expr = if key == "and" {
                    Expr::And(Box::new(expr), Box::new(right))
                } else {
                    Expr::Or(Box::new(expr), Box::new(right))
                };
            }
            Ok(expr)
        }
        "not" => Ok(Expr::Not(Box::new(parse_expr(schema, body)?))),
        "range" => parse_range(schema, body),
        "term" => parse_term(schema, body),
        "compare" => parse_compare(schema, body),
        other => Err(LodestoneError::query(format!(
            "unknown predicate node '{other}'"
        ))),
    }
}

fn field_and_type(
    schema: &Schema,
    object: &serde_json::Map<String, Value>,
    clause: &str,
) -> Result<(crate::schema::FieldOffset, crate::schema::DataType)> {
    let name = object
        .get("field")
        .and_then(Value::as_str)
        .ok_or_else(|| LodestoneError::query(format!("'{clause}' needs a 'field' name")))?;
    let offset = schema.offset_of_name(name)?;
    Ok((offset, schema.field(offset).data_type))
}

fn parse_range(schema: &Schema, body: &Value) -> Result<Expr> {
    let object = body
        .as_object()
        .ok_or_else(|| LodestoneError::query("'range' body must be an object"))?;
    let (field, data_type) = field_and_type(schema, object, "range")?;

    let mut lower: Option<(CompareOp, ScalarValue)> = None;
    let mut upper: Option<(CompareOp, ScalarValue)> = None;
    let mut exact: Option<(CompareOp, ScalarValue)> = None;

    for (key, raw) in object {
        if key == "field" {
            continue;
        }
        let op = CompareOp::parse_str(key)?;
        let value = ScalarValue::coerce(raw, data_type)?;
        match op {
            CompareOp::Gt | CompareOp::Ge => {
                if lower.replace((op, value)).is_some() {
                    return Err(LodestoneError::query("'range' has two lower bounds"));
                }
            }
            CompareOp::Lt | CompareOp::Le => {
                if upper.replace((op, value)).is_some() {
                    return Err(LodestoneError::query("'range' has two upper bounds"));
                }
            }
            CompareOp::Eq | CompareOp::Ne => {
                if exact.replace((op, value)).is_some() {
                    return Err(LodestoneError::query("'range' has two exact bounds"));
                }
            }
        }
    }

    match (exact, lower, upper) {
        (Some((op, value)), None, None) => Ok(Expr::UnaryRange { field, op, value }),
        (None, Some((op, value)), None) => Ok(Expr::UnaryRange { field, op, value }),
        (None, None, Some((op, value))) => Ok(Expr::UnaryRange { field, op, value }),
        (None, Some((lo_op, lo)), Some((hi_op, hi))) => Ok(Expr::BinaryRange {
            field,
            lo_op,
            lo,
            hi_op,
            hi,
        }),
        (None, None, None) => Err(LodestoneError::query("'range' has no bounds")),
        _ => Err(LodestoneError::query(
            "'range' cannot mix eq/ne with other bounds",
        )),
    }
}

fn parse_term(schema: &Schema, body: &Value) -> Result<Expr> {
    let object = body
        .as_object()
        .ok_or_else(|| LodestoneError::query("'term' body must be an object"))?;
    let (field, data_type) = field_and_type(schema, object, "term")?;

    let raw_values = object
        .get("values")
        .and_then(Value::as_array)
        .ok_or_else(|| LodestoneError::query("'term' needs a 'values' array"))?;
    let values = raw_values
        .iter()
        .map(|raw| ScalarValue::coerce(raw, data_type))
        .collect::<Result<Vec<_>>>()?;

    Ok(Expr::Term { field, values })
}

fn parse_compare(schema: &Schema, body: &Value) -> Result<Expr> {
    let object = body
        .as_object()
        .ok_or_else(|| LodestoneError::query("'compare' body must be an object"))?;

    let left = object
        .get("left")
        .and_then(Value::as_str)
        .ok_or_else(|| LodestoneError::query("'compare' needs a 'left' field name"))?;
    let right = object
        .get("right")
        .and_then(Value::as_str)
        .ok_or_else(|| LodestoneError::query("'compare' needs a 'right' field name"))?;
    let op = object
        .get("op")
        .and_then(Value::as_str)
        .ok_or_else(|| LodestoneError::query("'compare' needs an 'op'"))?;

    Ok(Expr::Compare {
        left: schema.offset_of_name(left)?,
        op: CompareOp::parse_str(op)?,
        right: schema.offset_of_name(right)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{DataType, SchemaBuilder};

    fn sample_schema() -> Arc<Schema> {
        Arc::new(
            SchemaBuilder::new()
                .add_field("pk", DataType::Int64)
                .add_field("tag", DataType::Int64)
                .add_field("score", DataType::Float)
                .add_field("vec", DataType::FloatVector { dim: 4 })
                .primary_key("pk")
                .build()
                .unwrap(),
        )
    }

    #[test]
    fn test_parse_full_plan() {
        let schema = sample_schema();
        let plan = Plan::from_dsl(
            Arc::clone(&schema),
            r#"{
                "predicate": {
                    "and": [
                        {"term": {"field": "tag", "values": [1, 2]}},
                        {"range": {"field": "score", "ge": 0.5, "lt": 1.0}}
                    ]
                },
                "vector": {"field": "vec", "metric": "L2", "topk": 10, "params": {"nprobe": 8}}
            }"#,
        )
        .unwrap();

        assert_eq!(plan.topk(), 10);
        assert_eq!(plan.metric(), MetricType::L2);
        assert_eq!(plan.involved_fields().len(), 3);
        assert!(matches!(plan.predicate(), Some(Expr::And(_, _))));
    }

    #[test]
    fn test_parse_without_predicate() {
        let schema = sample_schema();
        let plan = Plan::from_dsl(
            Arc::clone(&schema),
            r#"{"vector": {"field": "vec", "metric": "IP", "topk": 3}}"#,
        )
        .unwrap();
        assert!(plan.predicate().is_none());
        assert_eq!(plan.metric(), MetricType::Ip);
    }

    #[test]
    fn test_parse_not_and_compare() {
        let schema = sample_schema();
        let plan = Plan::from_dsl(
            Arc::clone(&schema),
            r#"{
                "predicate": {"not": {"compare": {"left": "tag", "op": "lt", "right": "pk"}}},
                "vector": {"field": "vec", "metric": "L2", "topk": 1}
            }"#,
        )
        .unwrap();
        assert!(matches!(plan.predicate(), Some(Expr::Not(_))));
    }

    #[test]
    fn test_malformed_plans_rejected() {
        let schema = sample_schema();
        // Missing vector clause.
        assert!(Plan::from_dsl(Arc::clone(&schema), r#"{"predicate": null}"#).is_err());
        // Unknown field.
        assert!(Plan::from_dsl(
            Arc::clone(&schema),
            r#"{"vector": {"field": "nope", "metric": "L2", "topk": 1}}"#
        )
        .is_err());
        // Two lower bounds.
        assert!(Plan::from_dsl(
            Arc::clone(&schema),
            r#"{
                "predicate": {"range": {"field": "tag", "gt": 1, "ge": 2}},
                "vector": {"field": "vec", "metric": "L2", "topk": 1}
            }"#
        )
        .is_err());
        // Float constant on an integer field.
        assert!(Plan::from_dsl(
            Arc::clone(&schema),
            r#"{
                "predicate": {"term": {"field": "tag", "values": [1.5]}},
                "vector": {"field": "vec", "metric": "L2", "topk": 1}
            }"#
        )
        .is_err());
        // Not JSON at all.
        assert!(Plan::from_dsl(Arc::clone(&schema), "not json").is_err());
    }
}

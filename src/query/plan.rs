//! The query plan IR: a schema-bound predicate tree plus one vector
//! sub-query.
//!
//! Plans are validated at construction; the executor never sees a field
//! offset, value type, or metric that does not fit the schema.

use std::sync::Arc;

use crate::error::{LodestoneError, Result};
use crate::metric::MetricType;
use crate::query::placeholder::PlaceholderGroup;
use crate::schema::{DataType, FieldOffset, Schema};

/// Comparison operators for range and field-to-field predicates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Lt,
    Le,
    Gt,
    Ge,
    Eq,
    Ne,
}

impl CompareOp {
    pub fn eval<T: PartialOrd>(&self, left: &T, right: &T) -> bool {
        match self {
            CompareOp::Lt => left < right,
            CompareOp::Le => left <= right,
            CompareOp::Gt => left > right,
            CompareOp::Ge => left >= right,
            CompareOp::Eq => left == right,
            CompareOp::Ne => left != right,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            CompareOp::Lt => "lt",
            CompareOp::Le => "le",
            CompareOp::Gt => "gt",
            CompareOp::Ge => "ge",
            CompareOp::Eq => "eq",
            CompareOp::Ne => "ne",
        }
    }

    pub fn parse_str(s: &str) -> Result<Self> {
        match s {
            "lt" => Ok(CompareOp::Lt),
            "le" => Ok(CompareOp::Le),
            "gt" => Ok(CompareOp::Gt),
            "ge" => Ok(CompareOp::Ge),
            "eq" => Ok(CompareOp::Eq),
            "ne" => Ok(CompareOp::Ne),
            _ => Err(LodestoneError::query(format!("unknown compare op '{s}'"))),
        }
    }
}

/// A typed predicate constant. Plan construction coerces every constant to
/// the class of its field: bool fields take `Bool`, integer fields `Int`,
/// float fields `Float`.
#[derive(Debug, Clone, PartialEq)]
pub enum ScalarValue {
    Bool(bool),
    Int(i64),
    Float(f64),
}

impl ScalarValue {
    /// Coerce a JSON constant to the field's value class.
    pub fn coerce(value: &serde_json::Value, data_type: DataType) -> Result<Self> {
        match data_type {
            DataType::Bool => value.as_bool().map(ScalarValue::Bool).ok_or_else(|| {
                LodestoneError::query(format!("expected a bool constant, got {value}"))
            }),
            DataType::Int8 | DataType::Int16 | DataType::Int32 | DataType::Int64 => value
                .as_i64()
                .map(ScalarValue::Int)
                .ok_or_else(|| {
                    LodestoneError::query(format!("expected an integer constant, got {value}"))
                }),
            DataType::Float | DataType::Double => value
                .as_f64()
                .filter(|f| f.is_finite())
                .map(ScalarValue::Float)
                .ok_or_else(|| {
                    LodestoneError::query(format!("expected a finite number constant, got {value}"))
                }),
            other => Err(LodestoneError::query(format!(
                "predicates do not apply to {} fields",
                other.name()
            ))),
        }
    }

    fn class_matches(&self, data_type: DataType) -> bool {
        matches!(
            (self, data_type),
            (ScalarValue::Bool(_), DataType::Bool)
                | (
                    ScalarValue::Int(_),
                    DataType::Int8 | DataType::Int16 | DataType::Int32 | DataType::Int64
                )
                | (ScalarValue::Float(_), DataType::Float | DataType::Double)
        )
    }

    /// Ordering within one value class; mixed classes never meet after
    /// coercion.
    pub fn cmp_same_class(&self, other: &ScalarValue) -> std::cmp::Ordering {
        match (self, other) {
            (ScalarValue::Bool(a), ScalarValue::Bool(b)) => a.cmp(b),
            (ScalarValue::Int(a), ScalarValue::Int(b)) => a.cmp(b),
            (ScalarValue::Float(a), ScalarValue::Float(b)) => a.total_cmp(b),
            _ => std::cmp::Ordering::Equal,
        }
    }
}

/// A node of the predicate tree.
#[derive(Debug, Clone)]
pub enum Expr {
    /// Matches every row.
    AlwaysTrue,
    Not(Box<Expr>),
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
    /// `field <op> value`.
    UnaryRange {
        field: FieldOffset,
        op: CompareOp,
        value: ScalarValue,
    },
    /// `lo <lo_op-implied> field <hi_op-implied> hi`: `lo_op` is `Gt`/`Ge`
    /// (field relative to `lo`), `hi_op` is `Lt`/`Le`.
    BinaryRange {
        field: FieldOffset,
        lo_op: CompareOp,
        lo: ScalarValue,
        hi_op: CompareOp,
        hi: ScalarValue,
    },
    /// `field IN values`; values are sorted and deduplicated.
    Term {
        field: FieldOffset,
        values: Vec<ScalarValue>,
    },
    /// `left <op> right` between two numeric fields.
    Compare {
        left: FieldOffset,
        op: CompareOp,
        right: FieldOffset,
    },
}

impl Expr {
    fn validate(&self, schema: &Schema) -> Result<()> {
        match self {
            Expr::AlwaysTrue => Ok(()),
            Expr::Not(child) => child.validate(schema),
            Expr::And(left, right) | Expr::Or(left, right) => {
                left.validate(schema)?;
                right.validate(schema)
            }
            Expr::UnaryRange { field, op, value } => {
                let meta = checked_scalar_field(schema, *field)?;
                if !value.class_matches(meta.data_type) {
                    return Err(LodestoneError::query(format!(
                        "constant {value:?} does not fit {} field '{}'",
                        meta.data_type.name(),
                        meta.name
                    )));
                }
                if meta.data_type == DataType::Bool && !matches!(op, CompareOp::Eq | CompareOp::Ne)
                {
                    return Err(LodestoneError::query(format!(
                        "bool field '{}' only supports eq/ne",
                        meta.name
                    )));
                }
                Ok(())
            }
            Expr::BinaryRange {
                field,
                lo_op,
                lo,
                hi_op,
                hi,
            } => {
                let meta = checked_scalar_field(schema, *field)?;
                if meta.data_type == DataType::Bool {
                    return Err(LodestoneError::query(format!(
                        "bool field '{}' does not support ranges",
                        meta.name
                    )));
                }
                if !lo.class_matches(meta.data_type) || !hi.class_matches(meta.data_type) {
                    return Err(LodestoneError::query(format!(
                        "range bounds do not fit {} field '{}'",
                        meta.data_type.name(),
                        meta.name
                    )));
                }
                if !matches!(lo_op, CompareOp::Gt | CompareOp::Ge)
                    || !matches!(hi_op, CompareOp::Lt | CompareOp::Le)
                {
                    return Err(LodestoneError::query(
                        "binary range needs a gt/ge lower op and a lt/le upper op",
                    ));
                }
                Ok(())
            }
            Expr::Term { field, values } => {
                let meta = checked_scalar_field(schema, *field)?;
                if values.is_empty() {
                    return Err(LodestoneError::query(format!(
                        "term on field '{}' needs at least one value",
                        meta.name
                    )));
                }
                for value in values {
                    if !value.class_matches(meta.data_type) {
                        return Err(LodestoneError::query(format!(
                            "term value {value:?} does not fit {} field '{}'",
                            meta.data_type.name(),
                            meta.name
                        )));
                    }
                }
                Ok(())
            }
            Expr::Compare { left, op: _, right } => {
                for field in [left, right] {
                    let meta = checked_scalar_field(schema, *field)?;
                    if meta.data_type == DataType::Bool {
                        return Err(LodestoneError::query(format!(
                            "field-to-field comparison does not apply to bool field '{}'",
                            meta.name
                        )));
                    }
                }
                Ok(())
            }
        }
    }

    fn collect_fields(&self, out: &mut Vec<FieldOffset>) {
        match self {
            Expr::AlwaysTrue => {}
            Expr::Not(child) => child.collect_fields(out),
            Expr::And(left, right) | Expr::Or(left, right) => {
                left.collect_fields(out);
                right.collect_fields(out);
            }
            Expr::UnaryRange { field, .. }
            | Expr::BinaryRange { field, .. }
            | Expr::Term { field, .. } => out.push(*field),
            Expr::Compare { left, right, .. } => {
                out.push(*left);
                out.push(*right);
            }
        }
    }
}

fn checked_scalar_field(
    schema: &Schema,
    field: FieldOffset,
) -> Result<&crate::schema::FieldMeta> {
    if field.0 >= schema.len() {
        return Err(LodestoneError::query(format!(
            "field offset {} is out of range",
            field.0
        )));
    }
    let meta = schema.field(field);
    if meta.is_vector() {
        return Err(LodestoneError::query(format!(
            "scalar predicate on vector field '{}'",
            meta.name
        )));
    }
    Ok(meta)
}

/// The vector sub-query of a plan.
#[derive(Debug, Clone)]
pub struct VectorQueryInfo {
    pub field: FieldOffset,
    pub metric: MetricType,
    pub topk: usize,
    /// Decimal places distances are truncated to; negative disables.
    pub round_decimal: i32,
    /// Index-specific search parameters (e.g. `{"nprobe": 8}`).
    pub search_params: serde_json::Value,
}

/// A compiled, schema-bound query plan.
#[derive(Debug, Clone)]
pub struct Plan {
    schema: Arc<Schema>,
    predicate: Option<Expr>,
    vector: VectorQueryInfo,
    /// Union of predicate fields and the vector field, deduplicated.
    involved_fields: Vec<FieldOffset>,
}

impl Plan {
    pub fn new(
        schema: Arc<Schema>,
        predicate: Option<Expr>,
        vector: VectorQueryInfo,
    ) -> Result<Self> {
        if vector.field.0 >= schema.len() {
            return Err(LodestoneError::query(format!(
                "vector field offset {} is out of range",
                vector.field.0
            )));
        }
        let meta = schema.field(vector.field);
        match meta.data_type {
            DataType::FloatVector { .. } => {
                if vector.metric.is_binary() {
                    return Err(LodestoneError::query(format!(
                        "metric {} does not apply to float vector field '{}'",
                        vector.metric.name(),
                        meta.name
                    )));
                }
            }
            DataType::BinaryVector { .. } => {
                if !vector.metric.is_binary() {
                    return Err(LodestoneError::query(format!(
                        "metric {} does not apply to binary vector field '{}'",
                        vector.metric.name(),
                        meta.name
                    )));
                }
            }
            other => {
                return Err(LodestoneError::query(format!(
                    "vector sub-query on non-vector field '{}' ({})",
                    meta.name,
                    other.name()
                )))
            }
        }

        let mut predicate = predicate;
        if let Some(expr) = &mut predicate {
            expr.validate(&schema)?;
            sort_terms(expr);
        }

        let mut involved_fields = vec![vector.field];
        if let Some(expr) = &predicate {
            expr.collect_fields(&mut involved_fields);
        }
        involved_fields.sort_unstable();
        involved_fields.dedup();

        Ok(Self {
            schema,
            predicate,
            vector,
            involved_fields,
        })
    }

    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    pub fn predicate(&self) -> Option<&Expr> {
        self.predicate.as_ref()
    }

    pub fn vector(&self) -> &VectorQueryInfo {
        &self.vector
    }

    pub fn topk(&self) -> usize {
        self.vector.topk
    }

    pub fn metric(&self) -> MetricType {
        self.vector.metric
    }

    /// Fields a segment must be able to serve for this plan.
    pub fn involved_fields(&self) -> &[FieldOffset] {
        &self.involved_fields
    }

    /// Parse a packed query-vector blob against this plan's vector field.
    pub fn parse_placeholder_group(&self, blob: &[u8]) -> Result<PlaceholderGroup> {
        PlaceholderGroup::parse(self.schema.field(self.vector.field).data_type, blob)
    }
}

/// Sort and deduplicate every term list so evaluation can binary-search.
fn sort_terms(expr: &mut Expr) {
    match expr {
        Expr::Term { values, .. } => {
            values.sort_by(|a, b| a.cmp_same_class(b));
            values.dedup();
        }
        Expr::Not(child) => sort_terms(child),
        Expr::And(left, right) | Expr::Or(left, right) => {
            sort_terms(left);
            sort_terms(right);
        }
        _ => {}
    }
}

use serde_json::Value;

use super::error::FilterError;
use super::types::{FilterOp, FilterWhereOptions, Relation};
use crate::database::value::{ColumnType, SqlValue};
use crate::temporal::SENTINEL;

pub struct FilterWhere<'r> {
    relation: &'r dyn Relation,
    param_values: Vec<SqlValue>,
    param_index: usize,
}

impl<'r> FilterWhere<'r> {
    pub fn new(relation: &'r dyn Relation, starting_param_index: usize) -> Self {
        Self {
            relation,
            param_values: vec![],
            param_index: starting_param_index,
        }
    }

    pub fn generate(
        relation: &'r dyn Relation,
        where_data: &Value,
        starting_param_index: usize,
        options: &FilterWhereOptions,
    ) -> Result<(String, Vec<SqlValue>), FilterError> {
        let mut filter_where = Self::new(relation, starting_param_index);
        let mut conditions = Self::base_conditions(relation, options);
        if !where_data.is_null() {
            conditions.extend(filter_where.parse_where_data(where_data)?);
        }
        Ok((join_conditions(conditions, " AND ", "1=1"), filter_where.param_values))
    }

    pub fn generate_empty(relation: &'r dyn Relation, options: &FilterWhereOptions) -> (String, Vec<SqlValue>) {
        (join_conditions(Self::base_conditions(relation, options), " AND ", "1=1"), vec![])
    }

    pub fn validate(where_data: &Value) -> Result<(), FilterError> {
        match where_data {
            Value::Null | Value::Object(_) => Ok(()),
            _ => Err(FilterError::InvalidWhereClause("WHERE must be an object".to_string())),
        }
    }

    fn base_conditions(relation: &dyn Relation, options: &FilterWhereOptions) -> Vec<String> {
        if relation.is_versioned() && !options.include_history {
            vec![format!("\"end_ts\" = '{}'", SENTINEL)]
        } else {
            vec![]
        }
    }

    fn parse_where_data(&mut self, where_data: &Value) -> Result<Vec<String>, FilterError> {
        let obj = where_data
            .as_object()
            .ok_or_else(|| FilterError::InvalidWhereClause("WHERE must be an object".to_string()))?;

        let mut conditions = Vec::new();
        for (key, value) in obj {
            if key.starts_with('$') {
                conditions.push(self.parse_logical_operator(key, value)?);
            } else {
                conditions.extend(self.parse_field_condition(key, value)?);
            }
        }
        Ok(conditions)
    }

    fn parse_logical_operator(&mut self, op: &str, value: &Value) -> Result<String, FilterError> {
        match op {
            "$and" | "$or" => {
                let arr = value
                    .as_array()
                    .ok_or_else(|| FilterError::InvalidOperatorData(format!("{} requires array", op)))?;
                let mut parts = Vec::new();
                for v in arr {
                    let inner = self.parse_where_data(v)?;
                    parts.push(format!("({})", join_conditions(inner, " AND ", "1=1")));
                }
                Ok(if op == "$and" {
                    format!("({})", join_conditions(parts, " AND ", "1=1"))
                } else {
                    format!("({})", join_conditions(parts, " OR ", "1=0"))
                })
            }
            "$not" => {
                let inner = self.parse_where_data(value)?;
                Ok(format!("NOT ({})", join_conditions(inner, " AND ", "1=1")))
            }
            _ => Err(FilterError::UnsupportedOperator(op.to_string())),
        }
    }

    fn parse_field_condition(&mut self, field: &str, value: &Value) -> Result<Vec<String>, FilterError> {
        let ty = self
            .relation
            .column_type(field)
            .ok_or_else(|| FilterError::InvalidColumn(field.to_string()))?;

        match value {
            Value::Object(obj) if obj.keys().all(|k| k.starts_with('$')) && !obj.is_empty() => {
                let mut out = Vec::new();
                for (op_key, op_val) in obj {
                    let operator = Self::map_operator(op_key)?;
                    out.push(self.build_sql_condition(field, ty, operator, op_val)?);
                }
                Ok(out)
            }
            // Implicit equality: { field: value }
            _ => Ok(vec![self.build_sql_condition(field, ty, FilterOp::Eq, value)?]),
        }
    }

    fn map_operator(op_key: &str) -> Result<FilterOp, FilterError> {
        serde_json::from_value(Value::String(op_key.to_string()))
            .map_err(|_| FilterError::UnsupportedOperator(op_key.to_string()))
    }

    fn build_sql_condition(
        &mut self,
        column: &str,
        ty: ColumnType,
        operator: FilterOp,
        data: &Value,
    ) -> Result<String, FilterError> {
        let quoted_column = format!("\"{}\"", column);
        match operator {
            FilterOp::Eq => {
                if data.is_null() {
                    Ok(format!("{} IS NULL", quoted_column))
                } else {
                    Ok(format!("{} = {}", quoted_column, self.typed_param(column, ty, data)?))
                }
            }
            FilterOp::Neq => {
                if data.is_null() {
                    Ok(format!("{} IS NOT NULL", quoted_column))
                } else {
                    Ok(format!("{} <> {}", quoted_column, self.typed_param(column, ty, data)?))
                }
            }
            FilterOp::Gt => Ok(format!("{} > {}", quoted_column, self.typed_param(column, ty, data)?)),
            FilterOp::Gte => Ok(format!("{} >= {}", quoted_column, self.typed_param(column, ty, data)?)),
            FilterOp::Lt => Ok(format!("{} < {}", quoted_column, self.typed_param(column, ty, data)?)),
            FilterOp::Lte => Ok(format!("{} <= {}", quoted_column, self.typed_param(column, ty, data)?)),
            FilterOp::Like | FilterOp::ILike => {
                if ty != ColumnType::Text {
                    return Err(FilterError::InvalidOperatorData(format!(
                        "pattern match requires a text column, '{}' is {}",
                        column,
                        ty.name()
                    )));
                }
                let pattern = data
                    .as_str()
                    .ok_or_else(|| FilterError::InvalidOperatorData("pattern must be a string".to_string()))?;
                let keyword = if operator == FilterOp::Like { "LIKE" } else { "ILIKE" };
                Ok(format!("{} {} {}", quoted_column, keyword, self.param(SqlValue::text(pattern))))
            }
            FilterOp::In | FilterOp::NIn => {
                let values = match data {
                    Value::Array(values) => values.as_slice(),
                    _ => std::slice::from_ref(data),
                };
                if values.is_empty() {
                    return Ok(if operator == FilterOp::In { "1=0" } else { "1=1" }.to_string());
                }
                let mut params = Vec::with_capacity(values.len());
                for v in values {
                    params.push(self.typed_param(column, ty, v)?);
                }
                let keyword = if operator == FilterOp::In { "IN" } else { "NOT IN" };
                Ok(format!("{} {} ({})", quoted_column, keyword, params.join(", ")))
            }
            FilterOp::Between => match data {
                Value::Array(values) if values.len() == 2 => {
                    let low = self.typed_param(column, ty, &values[0])?;
                    let high = self.typed_param(column, ty, &values[1])?;
                    Ok(format!("{} BETWEEN {} AND {}", quoted_column, low, high))
                }
                _ => Err(FilterError::InvalidOperatorData("$between requires exactly 2 values".to_string())),
            },
            FilterOp::Null => match data {
                Value::Bool(true) => Ok(format!("{} IS NULL", quoted_column)),
                Value::Bool(false) => Ok(format!("{} IS NOT NULL", quoted_column)),
                _ => Err(FilterError::InvalidOperatorData("$null requires a boolean".to_string())),
            },
        }
    }

    fn typed_param(&mut self, column: &str, ty: ColumnType, data: &Value) -> Result<String, FilterError> {
        let value = SqlValue::coerce(column, ty, data)?;
        Ok(self.param(value))
    }

    fn param(&mut self, value: SqlValue) -> String {
        self.param_values.push(value);
        self.param_index += 1;
        format!("${}", self.param_index)
    }
}

fn join_conditions(conditions: Vec<String>, joiner: &str, empty: &str) -> String {
    if conditions.is_empty() {
        empty.to_string()
    } else {
        conditions.join(joiner)
    }
}

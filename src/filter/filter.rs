use serde_json::Value;

use super::error::FilterError;
use super::filter_order::FilterOrder;
use super::filter_where::FilterWhere;
use super::types::{FilterData, FilterOrderInfo, FilterWhereOptions, Relation, SqlResult};

pub struct Filter<'r> {
    relation: &'r dyn Relation,
    select_columns: Vec<String>,
    where_data: Option<Value>,
    order_data: Vec<FilterOrderInfo>,
    limit: Option<i64>,
    offset: Option<i64>,
    options: FilterWhereOptions,
}

impl<'r> Filter<'r> {
    pub fn new(relation: &'r dyn Relation) -> Result<Self, FilterError> {
        quote_relation(relation.name())?;
        Ok(Self {
            relation,
            select_columns: vec![],
            where_data: None,
            order_data: vec![],
            limit: None,
            offset: None,
            options: FilterWhereOptions::default(),
        })
    }

    pub fn assign(&mut self, data: FilterData) -> Result<&mut Self, FilterError> {
        if let Some(select) = data.select { self.select(select)?; }
        if let Some(where_clause) = data.where_clause { self.where_clause(where_clause)?; }
        if let Some(order) = data.order { self.order(order)?; }
        if let Some(limit) = data.limit { self.limit(limit, data.offset)?; }
        Ok(self)
    }

    pub fn select(&mut self, columns: Vec<String>) -> Result<&mut Self, FilterError> {
        for column in &columns {
            if column != "*" && self.relation.column_type(column).is_none() {
                return Err(FilterError::InvalidColumn(column.clone()));
            }
        }
        self.select_columns = columns;
        Ok(self)
    }

    pub fn where_clause(&mut self, conditions: Value) -> Result<&mut Self, FilterError> {
        FilterWhere::validate(&conditions)?;
        self.where_data = Some(conditions);
        Ok(self)
    }

    pub fn order(&mut self, order_spec: Value) -> Result<&mut Self, FilterError> {
        self.order_data = FilterOrder::validate_and_parse(self.relation, &order_spec)?;
        Ok(self)
    }

    pub fn include_history(&mut self, include: bool) -> &mut Self {
        self.options.include_history = include;
        self
    }

    pub fn limit(&mut self, limit: i64, offset: Option<i64>) -> Result<&mut Self, FilterError> {
        if limit < 0 { return Err(FilterError::InvalidLimit("Limit must be non-negative".to_string())); }
        if let Some(off) = offset { if off < 0 { return Err(FilterError::InvalidOffset("Offset must be non-negative".to_string())); } }

        let max_limit = crate::config::CONFIG.query.max_limit;
        let applied_limit = if limit > max_limit {
            if crate::config::CONFIG.query.debug_logging {
                tracing::warn!("Limit {} exceeds max {}, capping to max", limit, max_limit);
            }
            max_limit
        } else {
            limit
        };

        self.limit = Some(applied_limit);
        self.offset = offset;
        Ok(self)
    }

    pub fn to_sql(&self) -> Result<SqlResult, FilterError> {
        let relation = quote_relation(self.relation.name())?;
        let where_result = self.to_where_sql()?;
        let order_clause = FilterOrder::generate(&self.order_data);
        let limit_clause = self.build_limit_clause();

        let query = [
            format!("SELECT {}", self.build_select_clause()),
            format!("FROM {}", relation),
            format!("WHERE {}", where_result.query),
            order_clause,
            limit_clause,
        ]
        .into_iter()
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join(" ");

        Ok(SqlResult { query, params: where_result.params })
    }

    pub fn to_where_sql(&self) -> Result<SqlResult, FilterError> {
        let (query, params) = match self.where_data {
            Some(ref where_data) => FilterWhere::generate(self.relation, where_data, 0, &self.options)?,
            None => FilterWhere::generate_empty(self.relation, &self.options),
        };
        Ok(SqlResult { query, params })
    }

    fn build_select_clause(&self) -> String {
        if self.select_columns.is_empty() || self.select_columns.iter().any(|c| c == "*") {
            "*".to_string()
        } else {
            self.select_columns.iter().map(|c| format!("\"{}\"", c)).collect::<Vec<_>>().join(", ")
        }
    }

    fn build_limit_clause(&self) -> String {
        match (self.limit, self.offset) {
            (Some(l), Some(o)) => format!("LIMIT {} OFFSET {}", l, o),
            (Some(l), None) => format!("LIMIT {}", l),
            (None, Some(o)) => format!("OFFSET {}", o),
            (None, None) => String::new(),
        }
    }
}

/// Quote a possibly schema-qualified identifier: `mtl.case_tracker` -> `"mtl"."case_tracker"`.
pub fn quote_relation(name: &str) -> Result<String, FilterError> {
    let parts: Vec<&str> = name.split('.').collect();
    if parts.len() > 2 {
        return Err(FilterError::InvalidRelation(name.to_string()));
    }
    for part in &parts {
        let mut chars = part.chars();
        let valid_start = matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_');
        if !valid_start || !chars.all(|c| c.is_ascii_alphanumeric() || c == '_') {
            return Err(FilterError::InvalidRelation(name.to_string()));
        }
    }
    Ok(parts.iter().map(|p| format!("\"{}\"", p)).collect::<Vec<_>>().join("."))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::value::{ColumnType, SqlValue};
    use serde_json::json;

    struct Tracker;

    impl Relation for Tracker {
        fn name(&self) -> &'static str {
            "mtl.case_tracker"
        }
        fn column_type(&self, column: &str) -> Option<ColumnType> {
            match column {
                "case_id" | "state" | "sub_state" => Some(ColumnType::Text),
                "start_ts" | "end_ts" => Some(ColumnType::Timestamp),
                _ => None,
            }
        }
        fn is_versioned(&self) -> bool {
            true
        }
    }

    #[test]
    fn current_rows_only_by_default() {
        let mut filter = Filter::new(&Tracker).unwrap();
        filter.where_clause(json!({"case_id": "C-1"})).unwrap();
        let sql = filter.to_sql().unwrap();
        assert_eq!(
            sql.query,
            "SELECT * FROM \"mtl\".\"case_tracker\" WHERE \"end_ts\" = '9999-12-31 00:00:00' AND \"case_id\" = $1"
        );
        assert_eq!(sql.params, vec![SqlValue::text("C-1")]);
    }

    #[test]
    fn history_drops_current_predicate() {
        let mut filter = Filter::new(&Tracker).unwrap();
        filter.include_history(true);
        filter.where_clause(json!({"case_id": "C-1"})).unwrap();
        filter.order(json!("start_ts asc")).unwrap();
        let sql = filter.to_sql().unwrap();
        assert_eq!(
            sql.query,
            "SELECT * FROM \"mtl\".\"case_tracker\" WHERE \"case_id\" = $1 ORDER BY \"start_ts\" ASC"
        );
    }

    #[test]
    fn nested_logical_operators_number_params_in_order() {
        let mut filter = Filter::new(&Tracker).unwrap();
        filter
            .where_clause(json!({
                "state": "Review",
                "$or": [{"sub_state": "Case QC Completed"}, {"sub_state": {"$ilike": "%progress%"}}]
            }))
            .unwrap();
        let sql = filter.to_where_sql().unwrap();
        // keys are visited in map order, so "$or" precedes "state"
        assert!(sql.query.contains("((\"sub_state\" = $1) OR (\"sub_state\" ILIKE $2))"));
        assert!(sql.query.contains("\"state\" = $3"));
        assert_eq!(sql.params.len(), 3);
    }

    #[test]
    fn rejects_unknown_columns_everywhere() {
        let mut filter = Filter::new(&Tracker).unwrap();
        assert!(matches!(
            filter.where_clause(json!({"case_id; DROP TABLE x": 1})).and_then(|f| f.to_sql().map(|_| ())),
            Err(FilterError::InvalidColumn(_))
        ));
        assert!(matches!(filter.order(json!("password desc")), Err(FilterError::InvalidColumn(_))));
        assert!(matches!(filter.select(vec!["secret".into()]), Err(FilterError::InvalidColumn(_))));
    }

    #[test]
    fn coerces_values_to_column_type() {
        let mut filter = Filter::new(&Tracker).unwrap();
        filter.include_history(true);
        filter.where_clause(json!({"start_ts": {"$gte": "2024-01-01T00:00:00"}})).unwrap();
        let sql = filter.to_sql().unwrap();
        assert!(matches!(sql.params[0], SqlValue::Timestamp(_)));

        filter.where_clause(json!({"start_ts": {"$gte": "yesterday"}})).unwrap();
        assert!(matches!(filter.to_sql(), Err(FilterError::InvalidValue(_))));
    }

    #[test]
    fn empty_in_matches_nothing() {
        let mut filter = Filter::new(&Tracker).unwrap();
        filter.include_history(true);
        filter.where_clause(json!({"case_id": {"$in": []}})).unwrap();
        assert_eq!(filter.to_where_sql().unwrap().query, "1=0");
    }

    #[test]
    fn quotes_schema_qualified_names() {
        assert_eq!(quote_relation("mtl.case_state_vw").unwrap(), "\"mtl\".\"case_state_vw\"");
        assert!(quote_relation("mtl.\"x\"").is_err());
        assert!(quote_relation("a.b.c").is_err());
    }
}

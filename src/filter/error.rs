use thiserror::Error;

use crate::database::value::ValueError;

#[derive(Error, Debug)]
pub enum FilterError {
    #[error("Invalid relation name: {0}")]
    InvalidRelation(String),

    #[error("Invalid column name: {0}")]
    InvalidColumn(String),

    #[error("Invalid WHERE clause: {0}")]
    InvalidWhereClause(String),

    #[error("Unsupported operator: {0}")]
    UnsupportedOperator(String),

    #[error("Invalid operator data: {0}")]
    InvalidOperatorData(String),

    #[error("Invalid limit: {0}")]
    InvalidLimit(String),

    #[error("Invalid offset: {0}")]
    InvalidOffset(String),

    #[error(transparent)]
    InvalidValue(#[from] ValueError),
}

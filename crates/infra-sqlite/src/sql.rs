// Filter -> SQL translation for document tables

use keystone_core::domain::filter::{is_valid_field_name, Comparison, Condition, Visibility};
use keystone_core::domain::{Filter, META_FIELDS};
use keystone_core::error::{AppError, Result};
use serde_json::Value;
use sqlx::{QueryBuilder, Sqlite};

/// Table names are interpolated, so they must be plain identifiers
pub(crate) fn ensure_table_name(table: &str) -> Result<()> {
    if is_valid_field_name(table) && !table.contains('.') {
        Ok(())
    } else {
        Err(AppError::invalid_field(
            "table",
            format!("'{table}' is not a valid table name"),
        ))
    }
}

/// Meta fields are real columns, everything else lives in the JSON body
fn column_expr(field: &str) -> String {
    if META_FIELDS.contains(&field) {
        field.to_string()
    } else {
        format!("json_extract(data, '$.{field}')")
    }
}

fn push_value(builder: &mut QueryBuilder<'_, Sqlite>, value: &Value) -> Result<()> {
    match value {
        Value::Bool(b) => {
            // json_extract yields 0/1 for booleans
            builder.push_bind(i64::from(*b));
        }
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                builder.push_bind(i);
            } else if let Some(f) = n.as_f64() {
                builder.push_bind(f);
            } else {
                return Err(AppError::invalid_field("filter", format!("unsupported number {n}")));
            }
        }
        Value::String(s) => {
            builder.push_bind(s.clone());
        }
        other => {
            return Err(AppError::invalid_field(
                "filter",
                format!("cannot compare against {other}"),
            ))
        }
    }
    Ok(())
}

fn push_condition(builder: &mut QueryBuilder<'_, Sqlite>, condition: &Condition) -> Result<()> {
    builder.push(column_expr(&condition.field));
    builder.push(" ");
    builder.push(condition.op.as_sql());
    if !condition.op.is_unary() {
        builder.push(" ");
        push_value(builder, &condition.value)?;
    }
    Ok(())
}

/// Append `WHERE ...` for the filter's conditions and visibility mode
pub(crate) fn push_where(builder: &mut QueryBuilder<'_, Sqlite>, filter: &Filter) -> Result<()> {
    filter.validate()?;

    let mut first = true;
    let mut next_clause = |builder: &mut QueryBuilder<'_, Sqlite>| {
        builder.push(if first { " WHERE " } else { " AND " });
        first = false;
    };

    if filter.visibility == Visibility::ExcludeDeleted {
        next_clause(builder);
        builder.push("deleted_at IS NULL");
    }
    for condition in &filter.conditions {
        next_clause(builder);
        push_condition(builder, condition)?;
    }
    Ok(())
}

/// Append ordering (insertion order breaks ties) and paging
pub(crate) fn push_order_and_page(builder: &mut QueryBuilder<'_, Sqlite>, filter: &Filter) {
    builder.push(" ORDER BY ");
    for order in &filter.order {
        builder.push(column_expr(&order.field));
        builder.push(" ");
        builder.push(order.direction.as_sql());
        builder.push(", ");
    }
    builder.push("seq ASC");

    match (filter.limit, filter.offset) {
        (Some(limit), offset) => {
            builder.push(" LIMIT ");
            builder.push_bind(i64::from(limit));
            if let Some(offset) = offset {
                builder.push(" OFFSET ");
                builder.push_bind(i64::from(offset));
            }
        }
        (None, Some(offset)) => {
            // SQLite needs a LIMIT before OFFSET; -1 means unbounded
            builder.push(" LIMIT -1 OFFSET ");
            builder.push_bind(i64::from(offset));
        }
        (None, None) => {}
    }
}

// Query filter language shared by every repository

use crate::error::ValidationErrors;
use serde_json::Value;

/// Columns managed by the repository rather than stored in the document
pub const META_FIELDS: [&str; 4] = ["id", "created_at", "updated_at", "deleted_at"];

const MAX_FIELD_NAME_LEN: usize = 64;

/// Whether soft-deleted rows take part in a query
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Visibility {
    #[default]
    ExcludeDeleted,
    IncludeDeleted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Comparison {
    Eq,
    Ne,
    Lt,
    Lte,
    Gt,
    Gte,
    IsNull,
    IsNotNull,
}

impl Comparison {
    pub fn as_sql(&self) -> &'static str {
        match self {
            Comparison::Eq => "=",
            Comparison::Ne => "!=",
            Comparison::Lt => "<",
            Comparison::Lte => "<=",
            Comparison::Gt => ">",
            Comparison::Gte => ">=",
            Comparison::IsNull => "IS NULL",
            Comparison::IsNotNull => "IS NOT NULL",
        }
    }

    /// Null checks carry no operand
    pub fn is_unary(&self) -> bool {
        matches!(self, Comparison::IsNull | Comparison::IsNotNull)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Condition {
    pub field: String,
    pub op: Comparison,
    pub value: Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Asc,
    Desc,
}

impl Direction {
    pub fn as_sql(&self) -> &'static str {
        match self {
            Direction::Asc => "ASC",
            Direction::Desc => "DESC",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct OrderBy {
    pub field: String,
    pub direction: Direction,
}

/// Conditions are AND-ed. Without an explicit order, rows come back in
/// insertion order.
///
/// ```text
/// let filter = Filter::new()
///     .eq("status", "active")
///     .gt("age", 18)
///     .order_by("created_at", Direction::Desc)
///     .limit(10);
/// ```
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Filter {
    pub conditions: Vec<Condition>,
    pub order: Vec<OrderBy>,
    pub limit: Option<u32>,
    pub offset: Option<u32>,
    pub visibility: Visibility,
}

impl Filter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn by_id(id: impl Into<String>) -> Self {
        Self::new().eq("id", id.into())
    }

    fn condition(mut self, field: &str, op: Comparison, value: Value) -> Self {
        self.conditions.push(Condition {
            field: field.to_string(),
            op,
            value,
        });
        self
    }

    /// `eq(field, null)` is rewritten to `IS NULL`
    pub fn eq(self, field: &str, value: impl Into<Value>) -> Self {
        match value.into() {
            Value::Null => self.is_null(field),
            value => self.condition(field, Comparison::Eq, value),
        }
    }

    /// `ne(field, null)` is rewritten to `IS NOT NULL`
    pub fn ne(self, field: &str, value: impl Into<Value>) -> Self {
        match value.into() {
            Value::Null => self.is_not_null(field),
            value => self.condition(field, Comparison::Ne, value),
        }
    }

    pub fn lt(self, field: &str, value: impl Into<Value>) -> Self {
        self.condition(field, Comparison::Lt, value.into())
    }

    pub fn lte(self, field: &str, value: impl Into<Value>) -> Self {
        self.condition(field, Comparison::Lte, value.into())
    }

    pub fn gt(self, field: &str, value: impl Into<Value>) -> Self {
        self.condition(field, Comparison::Gt, value.into())
    }

    pub fn gte(self, field: &str, value: impl Into<Value>) -> Self {
        self.condition(field, Comparison::Gte, value.into())
    }

    pub fn is_null(self, field: &str) -> Self {
        self.condition(field, Comparison::IsNull, Value::Null)
    }

    pub fn is_not_null(self, field: &str) -> Self {
        self.condition(field, Comparison::IsNotNull, Value::Null)
    }

    pub fn order_by(mut self, field: &str, direction: Direction) -> Self {
        self.order.push(OrderBy {
            field: field.to_string(),
            direction,
        });
        self
    }

    pub fn limit(mut self, limit: u32) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn offset(mut self, offset: u32) -> Self {
        self.offset = Some(offset);
        self
    }

    pub fn include_deleted(mut self) -> Self {
        self.visibility = Visibility::IncludeDeleted;
        self
    }

    /// Reject any field name that is not a plain (optionally dotted) identifier
    pub fn validate(&self) -> Result<(), ValidationErrors> {
        let mut errors = ValidationErrors::new("invalid filter");
        let fields = self
            .conditions
            .iter()
            .map(|c| c.field.as_str())
            .chain(self.order.iter().map(|o| o.field.as_str()));

        for field in fields {
            if !is_valid_field_name(field) {
                errors.push(field, "is not a valid field name");
            }
        }
        for condition in &self.conditions {
            if !condition.op.is_unary() && !is_comparable(&condition.value) {
                errors.push(
                    condition.field.as_str(),
                    "can only be compared with a string, number or boolean",
                );
            }
        }
        errors.into_result()
    }
}

fn is_comparable(value: &Value) -> bool {
    matches!(value, Value::String(_) | Value::Number(_) | Value::Bool(_))
}

/// `name` or `address.city`; each segment `[A-Za-z_][A-Za-z0-9_]*`
pub fn is_valid_field_name(name: &str) -> bool {
    if name.is_empty() || name.len() > MAX_FIELD_NAME_LEN {
        return false;
    }
    name.split('.').all(|segment| {
        let mut chars = segment.chars();
        match chars.next() {
            Some(first) if first.is_ascii_alphabetic() || first == '_' => {
                chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
            }
            _ => false,
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_field_name_rules() {
        assert!(is_valid_field_name("email"));
        assert!(is_valid_field_name("_private"));
        assert!(is_valid_field_name("address.city"));
        assert!(!is_valid_field_name(""));
        assert!(!is_valid_field_name("1abc"));
        assert!(!is_valid_field_name("name'); DROP TABLE users;--"));
        assert!(!is_valid_field_name("a..b"));
        assert!(!is_valid_field_name(&"x".repeat(65)));
    }

    #[test]
    fn test_eq_null_becomes_is_null() {
        let filter = Filter::new().eq("deleted_by", Value::Null);
        assert_eq!(filter.conditions[0].op, Comparison::IsNull);

        let filter = Filter::new().ne("deleted_by", Value::Null);
        assert_eq!(filter.conditions[0].op, Comparison::IsNotNull);
    }

    #[test]
    fn test_validate_reports_bad_fields() {
        let filter = Filter::new()
            .eq("ok", 1)
            .eq("bad field", 1)
            .order_by("also-bad", Direction::Asc);

        let errors = filter.validate().unwrap_err();
        assert!(errors.field_errors.contains_key("bad field"));
        assert!(errors.field_errors.contains_key("also-bad"));
        assert!(!errors.field_errors.contains_key("ok"));
    }

    #[test]
    fn test_validate_rejects_structured_operands() {
        let filter = Filter::new().eq("tags", serde_json::json!(["a", "b"]));
        assert!(filter.validate().is_err());
    }

    #[test]
    fn test_builder_defaults() {
        let filter = Filter::by_id("abc").limit(5).offset(10);
        assert_eq!(filter.visibility, Visibility::ExcludeDeleted);
        assert_eq!(filter.limit, Some(5));
        assert_eq!(filter.offset, Some(10));
        assert_eq!(filter.include_deleted().visibility, Visibility::IncludeDeleted);
    }
}

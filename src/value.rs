use std::cmp::Ordering;
use std::fmt;

use crate::error::{ReportError, Result};

#[derive(Debug, Clone, PartialEq, Default)]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

/// Declared type of a field or expression.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TypeCode {
    #[default]
    Object,
    Boolean,
    Int64,
    Double,
    String,
}

impl TypeCode {
    /// Accepts both short names and `System.*` names.
    pub fn parse(raw: &str) -> Option<TypeCode> {
        let name = raw.trim();
        let name = name.strip_prefix("System.").unwrap_or(name);
        match name.to_ascii_lowercase().as_str() {
            "object" | "variant" => Some(TypeCode::Object),
            "boolean" | "bool" => Some(TypeCode::Boolean),
            "int16" | "int32" | "int64" | "integer" | "byte" => Some(TypeCode::Int64),
            "single" | "double" | "float" | "decimal" => Some(TypeCode::Double),
            "string" | "datetime" | "char" => Some(TypeCode::String),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            TypeCode::Object => "Object",
            TypeCode::Boolean => "Boolean",
            TypeCode::Int64 => "Int64",
            TypeCode::Double => "Double",
            TypeCode::String => "String",
        }
    }
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(v) => Some(*v as f64),
            Value::Float(v) => Some(*v),
            Value::Bool(v) => Some(if *v { 1.0 } else { 0.0 }),
            Value::Text(v) => v.trim().parse::<f64>().ok(),
            Value::Null => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(v) => Some(*v),
            Value::Float(v) if v.is_finite() => Some(v.trunc() as i64),
            Value::Bool(v) => Some(i64::from(*v)),
            Value::Text(v) => {
                let trimmed = v.trim();
                trimmed
                    .parse::<i64>()
                    .ok()
                    .or_else(|| trimmed.parse::<f64>().ok().map(|f| f.trunc() as i64))
            }
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(v) => Some(*v),
            Value::Int(v) => Some(*v != 0),
            Value::Float(v) => Some(*v != 0.0),
            Value::Text(v) => match v.trim().to_ascii_lowercase().as_str() {
                "true" | "1" => Some(true),
                "false" | "0" => Some(false),
                _ => None,
            },
            Value::Null => None,
        }
    }

    /// Converts to the declared type; `Null` stays `Null`.
    pub fn convert(&self, type_code: TypeCode) -> Result<Value> {
        if self.is_null() {
            return Ok(Value::Null);
        }
        let converted = match type_code {
            TypeCode::Object => Some(self.clone()),
            TypeCode::Boolean => self.as_bool().map(Value::Bool),
            TypeCode::Int64 => self.as_i64().map(Value::Int),
            TypeCode::Double => self.as_f64().map(Value::Float),
            TypeCode::String => Some(Value::Text(self.to_string())),
        };
        converted.ok_or_else(|| ReportError::TypeMismatch {
            expected: type_code.name().to_string(),
            found: self.to_string(),
        })
    }

    fn natural_cmp(&self, other: &Value) -> Ordering {
        match (self, other) {
            (Value::Text(a), Value::Text(b)) => a.cmp(b),
            (Value::Bool(a), Value::Bool(b)) => a.cmp(b),
            (Value::Int(a), Value::Int(b)) => a.cmp(b),
            _ => match (self.as_f64(), other.as_f64()) {
                (Some(a), Some(b)) => a.total_cmp(&b),
                _ => self.to_string().cmp(&other.to_string()),
            },
        }
    }
}

/// Compares two values after converting both to `type_code`.
///
/// `Null` sorts before every other value. Operands that cannot be converted are
/// reported as `TypeMismatch`.
pub fn compare_typed(type_code: TypeCode, a: &Value, b: &Value) -> Result<Ordering> {
    match (a.is_null(), b.is_null()) {
        (true, true) => return Ok(Ordering::Equal),
        (true, false) => return Ok(Ordering::Less),
        (false, true) => return Ok(Ordering::Greater),
        _ => {}
    }
    let left = a.convert(type_code)?;
    let right = b.convert(type_code)?;
    let ordering = match (&left, &right) {
        (Value::Float(x), Value::Float(y)) => x.total_cmp(y),
        _ => left.natural_cmp(&right),
    };
    Ok(ordering)
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => Ok(()),
            Value::Bool(v) => write!(f, "{}", if *v { "True" } else { "False" }),
            Value::Int(v) => write!(f, "{v}"),
            Value::Float(v) => write!(f, "{v}"),
            Value::Text(v) => f.write_str(v),
        }
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::Text(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::Text(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Int(value)
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Value::Int(value as i64)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Float(value)
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Bool(value)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or(Value::Null)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nulls_sort_first() {
        let ord = compare_typed(TypeCode::Int64, &Value::Null, &Value::Int(-5)).unwrap();
        assert_eq!(ord, Ordering::Less);
        let ord = compare_typed(TypeCode::String, &Value::Null, &Value::Null).unwrap();
        assert_eq!(ord, Ordering::Equal);
    }

    #[test]
    fn numeric_text_compares_as_declared_type() {
        let ord = compare_typed(TypeCode::Int64, &"10".into(), &"9".into()).unwrap();
        assert_eq!(ord, Ordering::Greater);
        let ord = compare_typed(TypeCode::String, &"10".into(), &"9".into()).unwrap();
        assert_eq!(ord, Ordering::Less);
    }

    #[test]
    fn inconvertible_operand_is_type_mismatch() {
        let err = match compare_typed(TypeCode::Double, &"abc".into(), &Value::Float(1.0)) {
            Ok(_) => panic!("expected mismatch"),
            Err(err) => err,
        };
        assert!(matches!(err, ReportError::TypeMismatch { .. }));
    }

    #[test]
    fn type_names_parse() {
        assert_eq!(TypeCode::parse("System.Int32"), Some(TypeCode::Int64));
        assert_eq!(TypeCode::parse("String"), Some(TypeCode::String));
        assert_eq!(TypeCode::parse("Guid"), None);
    }

    #[test]
    fn display_formats_values() {
        assert_eq!(Value::Float(2.5).to_string(), "2.5");
        assert_eq!(Value::Int(7).to_string(), "7");
        assert_eq!(Value::Null.to_string(), "");
        assert_eq!(Value::Bool(true).to_string(), "True");
    }
}

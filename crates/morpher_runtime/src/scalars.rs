//! Scalar serialization and input coercion.

use rustc_hash::FxHashMap;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;

/// Serialization rules for a scalar type.
///
/// `serialize` turns a resolved value into its response form; `parse_value`
/// validates an input (variable or argument literal already converted to
/// JSON) and returns the value resolvers receive.
pub trait ScalarType: Send + Sync {
    /// Converts a resolved value to its wire form.
    fn serialize(&self, value: &Value) -> Result<Value, String>;

    /// Converts an input value to its internal form.
    fn parse_value(&self, value: &Value) -> Result<Value, String>;
}

/// Registry of scalar implementations keyed by type name.
///
/// Scalars declared in the schema without a registered implementation pass
/// values through unchanged.
#[derive(Clone)]
pub struct ScalarRegistry {
    scalars: FxHashMap<String, Arc<dyn ScalarType>>,
}

impl Default for ScalarRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ScalarRegistry {
    /// Creates a registry with the built-in scalars.
    pub fn new() -> Self {
        let mut registry = Self {
            scalars: FxHashMap::default(),
        };
        registry.register("Int", IntScalar);
        registry.register("Float", FloatScalar);
        registry.register("String", StringScalar);
        registry.register("Boolean", BooleanScalar);
        registry.register("ID", IdScalar);
        registry
    }

    /// Registers (or replaces) a scalar implementation.
    pub fn register<S: ScalarType + 'static>(&mut self, name: impl Into<String>, scalar: S) {
        self.scalars.insert(name.into(), Arc::new(scalar));
    }

    /// Registers a shared scalar implementation.
    pub fn register_shared(&mut self, name: impl Into<String>, scalar: Arc<dyn ScalarType>) {
        self.scalars.insert(name.into(), scalar);
    }

    /// Returns true if an implementation is registered for `name`.
    pub fn contains(&self, name: &str) -> bool {
        self.scalars.contains_key(name)
    }

    /// Serializes a value of the named scalar.
    pub fn serialize(&self, name: &str, value: &Value) -> Result<Value, String> {
        match self.scalars.get(name) {
            Some(scalar) => scalar.serialize(value),
            None => Ok(value.clone()),
        }
    }

    /// Parses an input value of the named scalar.
    pub fn parse_value(&self, name: &str, value: &Value) -> Result<Value, String> {
        match self.scalars.get(name) {
            Some(scalar) => scalar.parse_value(value),
            None => Ok(value.clone()),
        }
    }
}

impl fmt::Debug for ScalarRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<_> = self.scalars.keys().collect();
        names.sort();
        f.debug_struct("ScalarRegistry").field("scalars", &names).finish()
    }
}

/// 32-bit signed integer.
pub struct IntScalar;

impl IntScalar {
    fn coerce(value: &Value) -> Option<i64> {
        let n = match value {
            Value::Number(n) => n
                .as_i64()
                .or_else(|| n.as_f64().filter(|f| f.fract() == 0.0).map(|f| f as i64))?,
            Value::Bool(b) => i64::from(*b),
            _ => return None,
        };
        i32::try_from(n).is_ok().then_some(n)
    }
}

impl ScalarType for IntScalar {
    fn serialize(&self, value: &Value) -> Result<Value, String> {
        Self::coerce(value)
            .map(Value::from)
            .ok_or_else(|| format!("Int cannot represent value: {value}"))
    }

    fn parse_value(&self, value: &Value) -> Result<Value, String> {
        match value {
            Value::Number(n) if n.as_i64().is_some_and(|i| i32::try_from(i).is_ok()) => {
                Ok(value.clone())
            }
            _ => Err(format!("Int cannot represent non 32-bit signed integer value: {value}")),
        }
    }
}

/// Double precision float.
pub struct FloatScalar;

impl ScalarType for FloatScalar {
    fn serialize(&self, value: &Value) -> Result<Value, String> {
        match value {
            Value::Number(_) => Ok(value.clone()),
            Value::Bool(b) => Ok(Value::from(if *b { 1.0 } else { 0.0 })),
            _ => Err(format!("Float cannot represent non numeric value: {value}")),
        }
    }

    fn parse_value(&self, value: &Value) -> Result<Value, String> {
        match value {
            Value::Number(_) => Ok(value.clone()),
            _ => Err(format!("Float cannot represent non numeric value: {value}")),
        }
    }
}

/// UTF-8 string.
pub struct StringScalar;

impl ScalarType for StringScalar {
    fn serialize(&self, value: &Value) -> Result<Value, String> {
        match value {
            Value::String(_) => Ok(value.clone()),
            Value::Number(n) => Ok(Value::String(n.to_string())),
            Value::Bool(b) => Ok(Value::String(b.to_string())),
            _ => Err(format!("String cannot represent value: {value}")),
        }
    }

    fn parse_value(&self, value: &Value) -> Result<Value, String> {
        match value {
            Value::String(_) => Ok(value.clone()),
            _ => Err(format!("String cannot represent a non string value: {value}")),
        }
    }
}

/// Boolean.
pub struct BooleanScalar;

impl ScalarType for BooleanScalar {
    fn serialize(&self, value: &Value) -> Result<Value, String> {
        match value {
            Value::Bool(_) => Ok(value.clone()),
            Value::Number(n) => Ok(Value::Bool(n.as_f64().is_some_and(|f| f != 0.0))),
            _ => Err(format!("Boolean cannot represent a non boolean value: {value}")),
        }
    }

    fn parse_value(&self, value: &Value) -> Result<Value, String> {
        match value {
            Value::Bool(_) => Ok(value.clone()),
            _ => Err(format!("Boolean cannot represent a non boolean value: {value}")),
        }
    }
}

/// Opaque identifier, serialized as a string.
pub struct IdScalar;

impl ScalarType for IdScalar {
    fn serialize(&self, value: &Value) -> Result<Value, String> {
        match value {
            Value::String(_) => Ok(value.clone()),
            Value::Number(n) if n.is_i64() || n.is_u64() => Ok(Value::String(n.to_string())),
            _ => Err(format!("ID cannot represent value: {value}")),
        }
    }

    fn parse_value(&self, value: &Value) -> Result<Value, String> {
        self.serialize(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_int_range() {
        let registry = ScalarRegistry::new();
        assert_eq!(registry.serialize("Int", &json!(42)).unwrap(), json!(42));
        assert_eq!(registry.serialize("Int", &json!(3.0)).unwrap(), json!(3));
        assert!(registry.serialize("Int", &json!(1_i64 << 40)).is_err());
        assert!(registry.parse_value("Int", &json!("42")).is_err());
    }

    #[test]
    fn test_string_and_id_coercion() {
        let registry = ScalarRegistry::new();
        assert_eq!(registry.serialize("String", &json!(7)).unwrap(), json!("7"));
        assert_eq!(registry.serialize("ID", &json!(7)).unwrap(), json!("7"));
        assert!(registry.parse_value("String", &json!(true)).is_err());
        assert!(registry.serialize("String", &json!({"a": 1})).is_err());
    }

    #[test]
    fn test_unregistered_scalar_passes_through() {
        let registry = ScalarRegistry::new();
        let value = json!({"nested": [1, 2]});
        assert_eq!(registry.serialize("Custom", &value).unwrap(), value);
        assert!(!registry.contains("Custom"));
    }
}

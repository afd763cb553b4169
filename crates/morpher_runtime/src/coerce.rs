//! Input coercion for variables and arguments.

use crate::resolver::ResolverArgs;
use crate::scalars::ScalarRegistry;
use crate::schema::{InputValueDef, Schema, TypeKind};
use indexmap::IndexMap;
use morpher_syntax::{Argument, Type, Value as Literal, VariableDefinition};
use serde_json::{Map, Number, Value};

/// Coerces input values against the schema's input types.
pub(crate) struct InputCoercer<'a> {
    schema: &'a Schema,
    scalars: &'a ScalarRegistry,
}

impl<'a> InputCoercer<'a> {
    pub(crate) fn new(schema: &'a Schema, scalars: &'a ScalarRegistry) -> Self {
        Self { schema, scalars }
    }

    /// Coerces a JSON value to the given input type.
    pub(crate) fn coerce(&self, ty: &Type, value: &Value) -> Result<Value, String> {
        match ty {
            Type::NonNull(inner, _) => {
                if value.is_null() {
                    return Err(format!("Expected non-nullable type \"{ty}\" not to be null."));
                }
                self.coerce(inner, value)
            }
            _ if value.is_null() => Ok(Value::Null),
            Type::List(inner, _) => match value {
                Value::Array(items) => items
                    .iter()
                    .map(|item| self.coerce(inner, item))
                    .collect::<Result<Vec<_>, _>>()
                    .map(Value::Array),
                single => Ok(Value::Array(vec![self.coerce(inner, single)?])),
            },
            Type::Named(name) => self.coerce_named(name.as_str(), value),
        }
    }

    fn coerce_named(&self, name: &str, value: &Value) -> Result<Value, String> {
        let Some(def) = self.schema.get_type(name) else {
            return Err(format!("Unknown type \"{name}\"."));
        };
        match &def.kind {
            TypeKind::Scalar => self.scalars.parse_value(name, value),
            TypeKind::Enum { values } => match value {
                Value::String(s) if values.contains(s) => Ok(value.clone()),
                _ => Err(format!("Value {value} does not exist in \"{name}\" enum.")),
            },
            TypeKind::InputObject { fields } => {
                let Value::Object(map) = value else {
                    return Err(format!("Expected type \"{name}\" to be an object."));
                };
                if let Some(unknown) = map.keys().find(|k| !fields.contains_key(*k)) {
                    return Err(format!("Field \"{unknown}\" is not defined by type \"{name}\"."));
                }
                let mut out = Map::new();
                for (field_name, field) in fields {
                    if let Some(v) = map.get(field_name) {
                        out.insert(field_name.clone(), self.coerce(&field.ty, v)?);
                    } else if let Some(default) = &field.default_value {
                        let v = literal_to_json(default, &Map::new());
                        out.insert(field_name.clone(), self.coerce(&field.ty, &v)?);
                    } else if field.ty.is_non_null() {
                        return Err(format!(
                            "Field \"{name}.{field_name}\" of required type \"{}\" was not provided.",
                            field.ty
                        ));
                    }
                }
                Ok(Value::Object(out))
            }
            _ => Err(format!("Type \"{name}\" is not an input type.")),
        }
    }

    /// Coerces the raw request variables against the operation's definitions.
    pub(crate) fn coerce_variables(
        &self,
        definitions: &[VariableDefinition],
        raw: Option<&Map<String, Value>>,
    ) -> Result<Map<String, Value>, Vec<String>> {
        let mut coerced = Map::new();
        let mut errors = Vec::new();

        for def in definitions {
            let name = def.name.as_str();
            match raw.and_then(|r| r.get(name)) {
                Some(value) => match self.coerce(&def.ty, value) {
                    Ok(v) => {
                        coerced.insert(name.to_string(), v);
                    }
                    Err(msg) => errors.push(format!("Variable \"${name}\" got invalid value {value}; {msg}")),
                },
                None => {
                    if let Some(default) = &def.default_value {
                        let value = literal_to_json(default, &Map::new());
                        match self.coerce(&def.ty, &value) {
                            Ok(v) => {
                                coerced.insert(name.to_string(), v);
                            }
                            Err(msg) => errors.push(format!("Variable \"${name}\" has invalid default value; {msg}")),
                        }
                    } else if def.ty.is_non_null() {
                        errors.push(format!(
                            "Variable \"${name}\" of required type \"{}\" was not provided.",
                            def.ty
                        ));
                    }
                }
            }
        }

        if errors.is_empty() {
            Ok(coerced)
        } else {
            Err(errors)
        }
    }

    /// Coerces field arguments into [`ResolverArgs`].
    pub(crate) fn coerce_arguments(
        &self,
        definitions: &IndexMap<String, InputValueDef>,
        arguments: &[Argument],
        variables: &Map<String, Value>,
    ) -> Result<ResolverArgs, String> {
        let mut args = ResolverArgs::new();

        for (name, def) in definitions {
            let provided = arguments.iter().find(|a| a.name.as_str() == name);
            let value = match provided.map(|a| &a.value) {
                Some(Literal::Variable(var)) => match variables.get(var.as_str()) {
                    Some(v) if v.is_null() && def.ty.is_non_null() => {
                        return Err(format!(
                            "Argument \"{name}\" of non-null type \"{}\" must not be null.",
                            def.ty
                        ));
                    }
                    Some(v) => {
                        args.set(name.clone(), v.clone());
                        continue;
                    }
                    None => None,
                },
                Some(literal) => Some(literal_to_json(literal, variables)),
                None => None,
            };

            let value = match (value, &def.default_value) {
                (Some(v), _) => v,
                (None, Some(default)) => literal_to_json(default, &Map::new()),
                (None, None) if def.ty.is_non_null() => {
                    return Err(format!(
                        "Argument \"{name}\" of required type \"{}\" was not provided.",
                        def.ty
                    ));
                }
                (None, None) => continue,
            };

            let coerced = self
                .coerce(&def.ty, &value)
                .map_err(|msg| format!("Argument \"{name}\" has invalid value {value}. {msg}"))?;
            args.set(name.clone(), coerced);
        }

        Ok(args)
    }
}

/// Converts a literal to JSON, substituting variables.
///
/// Enum literals become strings; unknown variables become `null`.
pub(crate) fn literal_to_json(literal: &Literal, variables: &Map<String, Value>) -> Value {
    match literal {
        Literal::Variable(name) => variables.get(name.as_str()).cloned().unwrap_or(Value::Null),
        Literal::Int(n, _) => Value::from(*n),
        Literal::Float(f, _) => Number::from_f64(*f).map_or(Value::Null, Value::Number),
        Literal::String(s, _) => Value::String(s.clone()),
        Literal::Boolean(b, _) => Value::Bool(*b),
        Literal::Null(_) => Value::Null,
        Literal::Enum(name) => Value::String(name.value.clone()),
        Literal::List(items, _) => Value::Array(
            items
                .iter()
                .map(|item| literal_to_json(item, variables))
                .collect(),
        ),
        Literal::Object(fields, _) => Value::Object(
            fields
                .iter()
                .map(|(k, v)| (k.value.clone(), literal_to_json(v, variables)))
                .collect(),
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use morpher_syntax::parse_document;
    use serde_json::json;

    fn schema() -> Schema {
        Schema::parse(
            r"
            enum Role { ADMIN USER }
            input Filter { role: Role = USER, limit: Int! }
            type Query { users(filter: Filter, ids: [ID!], first: Int = 10, name: String!): [String] }
            ",
        )
        .unwrap()
    }

    fn field_arguments(query: &str) -> Vec<Argument> {
        let doc = parse_document(query).unwrap();
        let op = doc.operations().next().unwrap();
        let morpher_syntax::Selection::Field(field) = &op.selection_set.selections[0] else {
            panic!("expected field");
        };
        field.arguments.clone()
    }

    #[test]
    fn test_arguments_with_defaults_and_list_promotion() {
        let schema = schema();
        let scalars = ScalarRegistry::new();
        let coercer = InputCoercer::new(&schema, &scalars);
        let defs = &schema.field("Query", "users").unwrap().arguments;

        let args = coercer
            .coerce_arguments(
                defs,
                &field_arguments(r#"{ users(name: "a", ids: 7, filter: { limit: 2 }) }"#),
                &Map::new(),
            )
            .unwrap();

        assert_eq!(args.get("first"), Some(&json!(10)));
        assert_eq!(args.get("ids"), Some(&json!(["7"])));
        assert_eq!(args.get("filter"), Some(&json!({"role": "USER", "limit": 2})));
    }

    #[test]
    fn test_missing_required_argument() {
        let schema = schema();
        let scalars = ScalarRegistry::new();
        let coercer = InputCoercer::new(&schema, &scalars);
        let defs = &schema.field("Query", "users").unwrap().arguments;

        let err = coercer
            .coerce_arguments(defs, &field_arguments("{ users(first: 1) }"), &Map::new())
            .unwrap_err();
        assert_eq!(
            err,
            "Argument \"name\" of required type \"String!\" was not provided."
        );
    }

    #[test]
    fn test_invalid_enum_value() {
        let schema = schema();
        let scalars = ScalarRegistry::new();
        let coercer = InputCoercer::new(&schema, &scalars);
        let filter = Type::Named(morpher_syntax::Name::new("Filter", Default::default()));

        assert!(coercer
            .coerce(&filter, &json!({"role": "ROOT", "limit": 1}))
            .is_err());
        assert!(coercer.coerce(&filter, &json!({"limit": 1, "extra": 1})).is_err());
    }

    #[test]
    fn test_variables() {
        let schema = schema();
        let scalars = ScalarRegistry::new();
        let coercer = InputCoercer::new(&schema, &scalars);
        let doc = parse_document("query ($n: String!, $first: Int = 3, $opt: Int) { users(name: $n) }").unwrap();
        let op = doc.operations().next().unwrap();

        let mut raw = Map::new();
        raw.insert("n".into(), json!("x"));
        let vars = coercer.coerce_variables(&op.variables, Some(&raw)).unwrap();
        assert_eq!(vars.get("first"), Some(&json!(3)));
        assert!(!vars.contains_key("opt"));

        let errors = coercer.coerce_variables(&op.variables, None).unwrap_err();
        assert_eq!(
            errors,
            vec!["Variable \"$n\" of required type \"String!\" was not provided.".to_string()]
        );
    }
}

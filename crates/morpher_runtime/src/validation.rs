//! Static validation of an operation against the schema.
//!
//! Runs before execution; any error here rejects the whole request without
//! calling a resolver.

use crate::executor::FieldError;
use crate::schema::{Schema, TypeKind};
use morpher_core::Span;
use morpher_syntax::{
    Document, FragmentDefinition, OperationDefinition, Selection, SelectionSet, Value,
};
use std::collections::{HashMap, HashSet};

/// Validates `operation` and returns every error found.
pub fn validate(
    schema: &Schema,
    document: &Document,
    operation: &OperationDefinition,
    max_depth: Option<usize>,
    source: &str,
) -> Vec<FieldError> {
    let mut validator = Validator {
        schema,
        fragments: HashMap::new(),
        variables: operation.variables.iter().map(|v| v.name.as_str()).collect(),
        source,
        errors: Vec::new(),
    };

    for fragment in document.fragments() {
        if validator
            .fragments
            .insert(fragment.name.as_str(), fragment)
            .is_some()
        {
            validator.error(
                format!("There can be only one fragment named \"{}\".", fragment.name),
                fragment.name.span,
            );
        }
        validator.check_type_condition(fragment.type_condition.as_str(), fragment.type_condition.span);
    }

    let mut seen = HashSet::new();
    for var in &operation.variables {
        if !seen.insert(var.name.as_str()) {
            validator.error(
                format!("There can be only one variable named \"${}\".", var.name),
                var.name.span,
            );
        }
        if !schema.get_type(var.ty.name()).is_some_and(|t| t.is_input()) {
            validator.error(
                format!(
                    "Variable \"${}\" cannot be non-input type \"{}\".",
                    var.name, var.ty
                ),
                var.ty.span(),
            );
        }
    }

    validator.check_directives(&operation.directives);

    let Some(root) = schema.root_type(operation.operation) else {
        validator.error(
            format!(
                "Schema is not configured to execute {} operation.",
                operation.operation.as_str()
            ),
            operation.span,
        );
        return validator.errors;
    };

    let depth = validator.walk(root, &operation.selection_set, 1, &mut Vec::new());
    if let Some(max) = max_depth {
        if depth > max {
            validator.error(
                format!("Query depth {depth} exceeds the maximum allowed depth of {max}."),
                operation.span,
            );
        }
    }

    validator.errors
}

struct Validator<'a> {
    schema: &'a Schema,
    fragments: HashMap<&'a str, &'a FragmentDefinition>,
    variables: HashSet<&'a str>,
    source: &'a str,
    errors: Vec<FieldError>,
}

impl<'a> Validator<'a> {
    fn error(&mut self, message: String, span: Span) {
        self.errors
            .push(FieldError::new(message).with_location(span.line_column(self.source)));
    }

    fn check_type_condition(&mut self, name: &str, span: Span) -> bool {
        match self.schema.get_type(name) {
            Some(def) if def.is_composite() => true,
            Some(_) => {
                self.error(
                    format!("Fragment cannot condition on non composite type \"{name}\"."),
                    span,
                );
                false
            }
            None => {
                self.error(format!("Unknown type \"{name}\"."), span);
                false
            }
        }
    }

    fn check_directives(&mut self, directives: &[morpher_syntax::Directive]) {
        for directive in directives {
            if !self.schema.has_directive(directive.name.as_str()) {
                self.error(
                    format!("Unknown directive \"@{}\".", directive.name),
                    directive.span,
                );
            }
            for arg in &directive.arguments {
                self.check_variables(&arg.value);
            }
        }
    }

    fn check_variables(&mut self, value: &Value) {
        match value {
            Value::Variable(name) if !self.variables.contains(name.as_str()) => {
                self.error(format!("Variable \"${name}\" is not defined."), name.span);
            }
            Value::List(items, _) => items.iter().for_each(|v| self.check_variables(v)),
            Value::Object(fields, _) => fields.iter().for_each(|(_, v)| self.check_variables(v)),
            _ => {}
        }
    }

    /// Walks a selection set on `type_name`; returns the deepest field level reached.
    fn walk(
        &mut self,
        type_name: &str,
        set: &'a SelectionSet,
        depth: usize,
        spreading: &mut Vec<&'a str>,
    ) -> usize {
        let mut deepest = depth;

        for selection in &set.selections {
            self.check_directives(selection.directives());

            match selection {
                Selection::Field(field) => {
                    let name = field.name.as_str();
                    if name == "__typename" {
                        if let Some(sub) = &field.selection_set {
                            self.error(
                                "Field \"__typename\" must not have a selection since type \"String!\" has no subfields."
                                    .to_string(),
                                sub.span,
                            );
                        }
                        continue;
                    }

                    let Some(def) = self.schema.field(type_name, name) else {
                        self.error(
                            format!("Cannot query field \"{name}\" on type \"{type_name}\"."),
                            field.name.span,
                        );
                        continue;
                    };

                    for arg in &field.arguments {
                        if !def.arguments.contains_key(arg.name.as_str()) {
                            self.error(
                                format!(
                                    "Unknown argument \"{}\" on field \"{type_name}.{name}\".",
                                    arg.name
                                ),
                                arg.span,
                            );
                        }
                        self.check_variables(&arg.value);
                    }
                    for (arg_name, arg_def) in &def.arguments {
                        let provided = field.arguments.iter().any(|a| a.name.as_str() == arg_name);
                        if !provided && arg_def.ty.is_non_null() && arg_def.default_value.is_none() {
                            self.error(
                                format!(
                                    "Field \"{name}\" argument \"{arg_name}\" of type \"{}\" is required, but it was not provided.",
                                    arg_def.ty
                                ),
                                field.span,
                            );
                        }
                    }

                    let target = self.schema.get_type(def.ty.name());
                    match (&field.selection_set, target) {
                        (Some(sub), Some(t)) if t.is_composite() => {
                            let reached = self.walk(&t.name, sub, depth + 1, spreading);
                            deepest = deepest.max(reached);
                        }
                        (Some(sub), Some(t)) => self.error(
                            format!(
                                "Field \"{name}\" must not have a selection since type \"{}\" has no subfields.",
                                t.name
                            ),
                            sub.span,
                        ),
                        (None, Some(t)) if t.is_composite() => self.error(
                            format!(
                                "Field \"{name}\" of type \"{}\" must have a selection of subfields. Did you mean \"{name} {{ ... }}\"?",
                                def.ty
                            ),
                            field.span,
                        ),
                        _ => {}
                    }
                }
                Selection::FragmentSpread(spread) => {
                    let name = spread.name.as_str();
                    let Some(fragment) = self.fragments.get(name).copied() else {
                        self.error(format!("Unknown fragment \"{name}\"."), spread.name.span);
                        continue;
                    };
                    if spreading.contains(&name) {
                        self.error(
                            format!("Cannot spread fragment \"{name}\" within itself."),
                            spread.span,
                        );
                        continue;
                    }
                    let condition = fragment.type_condition.as_str();
                    if !self.can_overlap(type_name, condition) {
                        self.error(
                            format!(
                                "Fragment \"{name}\" cannot be spread here as objects of type \"{type_name}\" can never be of type \"{condition}\"."
                            ),
                            spread.span,
                        );
                        continue;
                    }
                    if self.schema.get_type(condition).is_some_and(|t| t.is_composite()) {
                        spreading.push(fragment.name.as_str());
                        let reached = self.walk(condition, &fragment.selection_set, depth, spreading);
                        spreading.pop();
                        deepest = deepest.max(reached);
                    }
                }
                Selection::InlineFragment(inline) => {
                    let condition = match &inline.type_condition {
                        Some(tc) => {
                            if !self.check_type_condition(tc.as_str(), tc.span) {
                                continue;
                            }
                            if !self.can_overlap(type_name, tc.as_str()) {
                                self.error(
                                    format!(
                                        "Fragment cannot be spread here as objects of type \"{type_name}\" can never be of type \"{tc}\"."
                                    ),
                                    inline.span,
                                );
                                continue;
                            }
                            tc.as_str()
                        }
                        None => type_name,
                    };
                    let condition = condition.to_string();
                    let reached = self.walk(&condition, &inline.selection_set, depth, spreading);
                    deepest = deepest.max(reached);
                }
            }
        }

        deepest
    }

    /// Two composite types can overlap unless both are distinct object types
    /// with no abstract relationship.
    fn can_overlap(&self, a: &str, b: &str) -> bool {
        if a == b {
            return true;
        }
        let is_object =
            |name: &str| matches!(self.schema.get_type(name).map(|t| &t.kind), Some(TypeKind::Object { .. }));
        if is_object(a) && is_object(b) {
            return false;
        }
        if is_object(a) {
            return self.schema.is_possible_type(b, a);
        }
        if is_object(b) {
            return self.schema.is_possible_type(a, b);
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use morpher_syntax::parse_document;

    const SDL: &str = r"
        type Query { me: User, hello(name: String!): String }
        type User { _id: ID!, friends: [User], profile: Profile }
        type Profile { bio: String }
    ";

    fn errors(query: &str, max_depth: Option<usize>) -> Vec<String> {
        let schema = Schema::parse(SDL).unwrap();
        let doc = parse_document(query).unwrap();
        let op = doc.operations().next().unwrap();
        validate(&schema, &doc, op, max_depth, query)
            .into_iter()
            .map(|e| e.message)
            .collect()
    }

    #[test]
    fn test_valid_query() {
        assert!(errors(
            r#"query Q($n: String!) { hello(name: $n) me { ...F friends { _id } } } fragment F on User { _id __typename }"#,
            None
        )
        .is_empty());
    }

    #[test]
    fn test_unknown_field() {
        assert_eq!(
            errors("{ nope }", None),
            vec!["Cannot query field \"nope\" on type \"Query\".".to_string()]
        );
    }

    #[test]
    fn test_selection_rules() {
        let errs = errors("{ me hello(name: \"a\") { x } }", None);
        assert_eq!(errs.len(), 2);
        assert!(errs[0].contains("must have a selection of subfields"));
        assert!(errs[1].contains("must not have a selection"));
    }

    #[test]
    fn test_required_argument_and_undefined_variable() {
        let errs = errors("{ hello }", None);
        assert!(errs[0].contains("argument \"name\" of type \"String!\" is required"));

        let errs = errors("{ hello(name: $missing) }", None);
        assert_eq!(errs, vec!["Variable \"$missing\" is not defined.".to_string()]);
    }

    #[test]
    fn test_fragment_cycle_and_unknown_fragment() {
        let errs = errors(
            "{ me { ...A ...Nope } } fragment A on User { friends { ...A } }",
            None,
        );
        assert!(errs.iter().any(|e| e == "Unknown fragment \"Nope\"."));
        assert!(errs.iter().any(|e| e == "Cannot spread fragment \"A\" within itself."));
    }

    #[test]
    fn test_unknown_directive() {
        let errs = errors("{ me @cached { _id } }", None);
        assert_eq!(errs, vec!["Unknown directive \"@cached\".".to_string()]);
    }

    #[test]
    fn test_max_depth() {
        let query = "{ me { friends { friends { profile { bio } } } } }";
        assert!(errors(query, Some(5)).is_empty());
        assert_eq!(
            errors(query, Some(4)),
            vec!["Query depth 5 exceeds the maximum allowed depth of 4.".to_string()]
        );
    }

    #[test]
    fn test_impossible_fragment_spread() {
        let errs = errors("{ me { ... on Profile { bio } } }", None);
        assert_eq!(errs.len(), 1);
        assert!(errs[0].contains("can never be of type \"Profile\""));

        let errs = errors("{ me { ...P } } fragment P on Profile { bio }", None);
        assert_eq!(errs.len(), 1);
        assert!(errs[0].contains("can never be of type \"Profile\""));
    }
}

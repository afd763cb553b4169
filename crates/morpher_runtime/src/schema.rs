//! Executable schema built from type-system documents.
//!
//! A [`Schema`] is assembled by a [`SchemaBuilder`] from any number of SDL
//! documents. Type definitions are collected first, then every `extend`
//! form is applied in document order, so a module may extend a type that a
//! later module defines.

use indexmap::IndexMap;
use morpher_core::SourceError;
use morpher_syntax::{
    parse_document, Definition, Document, OperationType, Type, TypeDefinition, Value,
};
use thiserror::Error;

/// Names of the scalars every schema provides.
pub const BUILTIN_SCALARS: [&str; 5] = ["Int", "Float", "String", "Boolean", "ID"];

/// Directives every executor understands.
pub const BUILTIN_DIRECTIVES: [&str; 4] = ["skip", "include", "deprecated", "specifiedBy"];

/// Errors raised while building a schema.
#[derive(Debug, Clone, Error)]
pub enum SchemaError {
    #[error(transparent)]
    Syntax(#[from] SourceError),

    #[error("There can be only one type named \"{0}\".")]
    DuplicateType(String),

    #[error("Field \"{type_name}.{field}\" can only be defined once.")]
    DuplicateField { type_name: String, field: String },

    #[error("Cannot extend type \"{0}\" because it is not defined.")]
    ExtendUndefined(String),

    #[error("Cannot extend {expected} \"{name}\" with a {found} extension.")]
    ExtensionKindMismatch {
        name: String,
        expected: &'static str,
        found: &'static str,
    },

    #[error("Unknown type \"{name}\" referenced by \"{referenced_by}\".")]
    UnknownType { name: String, referenced_by: String },

    #[error("Query root type must be provided.")]
    MissingQueryType,

    #[error("Root type \"{0}\" must be an object type.")]
    InvalidRootType(String),

    #[error("Resolver \"{type_name}.{field}\" is defined but the field is not declared in the schema.")]
    UndeclaredResolver { type_name: String, field: String },
}

impl SchemaError {
    /// True for errors that no further document can repair, as opposed to
    /// references still waiting for a declaration.
    pub fn is_conflict(&self) -> bool {
        matches!(
            self,
            Self::Syntax(_)
                | Self::DuplicateType(_)
                | Self::DuplicateField { .. }
                | Self::ExtensionKindMismatch { .. }
                | Self::InvalidRootType(_)
        )
    }
}

/// A named type in the schema.
#[derive(Debug, Clone)]
pub struct TypeDef {
    pub name: String,
    pub description: Option<String>,
    pub kind: TypeKind,
}

/// The shape of a named type.
#[derive(Debug, Clone)]
pub enum TypeKind {
    Scalar,
    Object {
        fields: IndexMap<String, FieldDef>,
        interfaces: Vec<String>,
    },
    Interface {
        fields: IndexMap<String, FieldDef>,
    },
    Union {
        members: Vec<String>,
    },
    Enum {
        values: Vec<String>,
    },
    InputObject {
        fields: IndexMap<String, InputValueDef>,
    },
}

impl TypeKind {
    const fn keyword(&self) -> &'static str {
        match self {
            Self::Scalar => "scalar",
            Self::Object { .. } => "type",
            Self::Interface { .. } => "interface",
            Self::Union { .. } => "union",
            Self::Enum { .. } => "enum",
            Self::InputObject { .. } => "input",
        }
    }
}

impl TypeDef {
    /// Returns the output fields of an object or interface type.
    pub fn fields(&self) -> Option<&IndexMap<String, FieldDef>> {
        match &self.kind {
            TypeKind::Object { fields, .. } | TypeKind::Interface { fields } => Some(fields),
            _ => None,
        }
    }

    /// Returns a field by name.
    pub fn field(&self, name: &str) -> Option<&FieldDef> {
        self.fields().and_then(|fields| fields.get(name))
    }

    /// Returns true for scalars and enums.
    pub const fn is_leaf(&self) -> bool {
        matches!(self.kind, TypeKind::Scalar | TypeKind::Enum { .. })
    }

    /// Returns true for objects, interfaces and unions.
    pub const fn is_composite(&self) -> bool {
        matches!(
            self.kind,
            TypeKind::Object { .. } | TypeKind::Interface { .. } | TypeKind::Union { .. }
        )
    }

    /// Returns true for types that may be used as input.
    pub const fn is_input(&self) -> bool {
        matches!(
            self.kind,
            TypeKind::Scalar | TypeKind::Enum { .. } | TypeKind::InputObject { .. }
        )
    }

    /// Returns true for interfaces and unions.
    pub const fn is_abstract(&self) -> bool {
        matches!(self.kind, TypeKind::Interface { .. } | TypeKind::Union { .. })
    }
}

/// An output field.
#[derive(Debug, Clone)]
pub struct FieldDef {
    pub name: String,
    pub description: Option<String>,
    pub arguments: IndexMap<String, InputValueDef>,
    pub ty: Type,
}

/// An argument or input object field.
#[derive(Debug, Clone)]
pub struct InputValueDef {
    pub name: String,
    pub ty: Type,
    pub default_value: Option<Value>,
}

/// An executable schema.
#[derive(Debug, Clone)]
pub struct Schema {
    types: IndexMap<String, TypeDef>,
    directives: Vec<String>,
    query_type: String,
    mutation_type: Option<String>,
    subscription_type: Option<String>,
}

impl Schema {
    /// Creates a new schema builder.
    pub fn builder() -> SchemaBuilder {
        SchemaBuilder::new()
    }

    /// Builds a schema from a single SDL string.
    pub fn parse(sdl: &str) -> Result<Self, SchemaError> {
        SchemaBuilder::new().add_sdl(sdl)?.build()
    }

    /// Gets a type by name.
    pub fn get_type(&self, name: &str) -> Option<&TypeDef> {
        self.types.get(name)
    }

    /// Returns all types in definition order.
    pub fn types(&self) -> impl Iterator<Item = &TypeDef> {
        self.types.values()
    }

    /// Gets a field of an object or interface type.
    pub fn field(&self, type_name: &str, field: &str) -> Option<&FieldDef> {
        self.types.get(type_name).and_then(|t| t.field(field))
    }

    /// Returns true if the schema declares a directive with this name.
    pub fn has_directive(&self, name: &str) -> bool {
        BUILTIN_DIRECTIVES.contains(&name) || self.directives.iter().any(|d| d == name)
    }

    /// The query root type name.
    pub fn query_type(&self) -> &str {
        &self.query_type
    }

    /// The mutation root type name, if any.
    pub fn mutation_type(&self) -> Option<&str> {
        self.mutation_type.as_deref()
    }

    /// Returns the root type for an operation.
    pub fn root_type(&self, operation: OperationType) -> Option<&str> {
        match operation {
            OperationType::Query => Some(&self.query_type),
            OperationType::Mutation => self.mutation_type.as_deref(),
            OperationType::Subscription => self.subscription_type.as_deref(),
        }
    }

    /// Returns true if `object` is `abstract_type`, a member of it, or implements it.
    pub fn is_possible_type(&self, abstract_type: &str, object: &str) -> bool {
        if abstract_type == object {
            return true;
        }
        match self.types.get(abstract_type).map(|t| &t.kind) {
            Some(TypeKind::Union { members }) => members.iter().any(|m| m == object),
            Some(TypeKind::Interface { .. }) => matches!(
                self.types.get(object).map(|t| &t.kind),
                Some(TypeKind::Object { interfaces, .. }) if interfaces.iter().any(|i| i == abstract_type)
            ),
            _ => false,
        }
    }
}

/// Accumulates type-system documents and builds a [`Schema`].
#[derive(Debug, Default, Clone)]
pub struct SchemaBuilder {
    documents: Vec<Document>,
}

impl SchemaBuilder {
    /// Creates a new empty builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses and adds an SDL string.
    pub fn add_sdl(mut self, sdl: &str) -> Result<Self, SchemaError> {
        self.documents.push(parse_document(sdl)?);
        Ok(self)
    }

    /// Adds an already parsed document.
    #[must_use]
    pub fn add_document(mut self, document: Document) -> Self {
        self.documents.push(document);
        self
    }

    /// Builds the schema.
    pub fn build(self) -> Result<Schema, SchemaError> {
        let mut types: IndexMap<String, TypeDef> = BUILTIN_SCALARS
            .iter()
            .map(|name| {
                (
                    (*name).to_string(),
                    TypeDef {
                        name: (*name).to_string(),
                        description: None,
                        kind: TypeKind::Scalar,
                    },
                )
            })
            .collect();
        let mut directives = Vec::new();
        let mut roots: IndexMap<OperationType, String> = IndexMap::new();

        let definitions = self.documents.iter().flat_map(|d| d.definitions.iter());

        for definition in definitions.clone() {
            match definition {
                Definition::Type(def) => {
                    let converted = convert_type(def)?;
                    if types.contains_key(&converted.name) {
                        return Err(SchemaError::DuplicateType(converted.name));
                    }
                    types.insert(converted.name.clone(), converted);
                }
                Definition::Schema(schema) | Definition::SchemaExtension(schema) => {
                    for op in &schema.operations {
                        roots.insert(op.operation, op.type_name.value.clone());
                    }
                }
                Definition::Directive(def) => directives.push(def.name.value.clone()),
                Definition::TypeExtension(_)
                | Definition::Operation(_)
                | Definition::Fragment(_) => {}
            }
        }

        for definition in definitions {
            if let Definition::TypeExtension(ext) = definition {
                apply_extension(&mut types, ext)?;
            }
        }

        let root_name = |op: OperationType| -> Option<String> {
            roots
                .get(&op)
                .cloned()
                .or_else(|| types.contains_key(op.default_root()).then(|| op.default_root().to_string()))
        };
        let query_type = root_name(OperationType::Query).ok_or(SchemaError::MissingQueryType)?;
        let mutation_type = root_name(OperationType::Mutation);
        let subscription_type = root_name(OperationType::Subscription);

        for root in std::iter::once(&query_type)
            .chain(mutation_type.as_ref())
            .chain(subscription_type.as_ref())
        {
            match types.get(root).map(|t| &t.kind) {
                Some(TypeKind::Object { .. }) => {}
                Some(_) => return Err(SchemaError::InvalidRootType(root.clone())),
                None => {
                    return Err(SchemaError::UnknownType {
                        name: root.clone(),
                        referenced_by: "schema".to_string(),
                    })
                }
            }
        }

        check_references(&types)?;

        Ok(Schema {
            types,
            directives,
            query_type,
            mutation_type,
            subscription_type,
        })
    }
}

fn convert_type(def: &TypeDefinition) -> Result<TypeDef, SchemaError> {
    let (description, kind) = match def {
        TypeDefinition::Scalar(s) => (&s.description, TypeKind::Scalar),
        TypeDefinition::Object(o) => (
            &o.description,
            TypeKind::Object {
                fields: convert_fields(&o.name.value, &o.fields, IndexMap::new())?,
                interfaces: o.implements.iter().map(|n| n.value.clone()).collect(),
            },
        ),
        TypeDefinition::Interface(i) => (
            &i.description,
            TypeKind::Interface {
                fields: convert_fields(&i.name.value, &i.fields, IndexMap::new())?,
            },
        ),
        TypeDefinition::Union(u) => (
            &u.description,
            TypeKind::Union {
                members: u.members.iter().map(|n| n.value.clone()).collect(),
            },
        ),
        TypeDefinition::Enum(e) => (
            &e.description,
            TypeKind::Enum {
                values: e.values.iter().map(|v| v.name.value.clone()).collect(),
            },
        ),
        TypeDefinition::InputObject(i) => (
            &i.description,
            TypeKind::InputObject {
                fields: convert_input_values(&i.name.value, &i.fields, IndexMap::new())?,
            },
        ),
    };

    Ok(TypeDef {
        name: def.name().value.clone(),
        description: description.as_ref().map(|d| d.value.clone()),
        kind,
    })
}

fn convert_fields(
    type_name: &str,
    fields: &[morpher_syntax::FieldDefinition],
    mut into: IndexMap<String, FieldDef>,
) -> Result<IndexMap<String, FieldDef>, SchemaError> {
    for field in fields {
        if into.contains_key(&field.name.value) {
            return Err(SchemaError::DuplicateField {
                type_name: type_name.to_string(),
                field: field.name.value.clone(),
            });
        }
        let qualified = format!("{type_name}.{}", field.name.value);
        into.insert(
            field.name.value.clone(),
            FieldDef {
                name: field.name.value.clone(),
                description: field.description.as_ref().map(|d| d.value.clone()),
                arguments: convert_input_values(&qualified, &field.arguments, IndexMap::new())?,
                ty: field.ty.clone(),
            },
        );
    }
    Ok(into)
}

fn convert_input_values(
    owner: &str,
    values: &[morpher_syntax::InputValueDefinition],
    mut into: IndexMap<String, InputValueDef>,
) -> Result<IndexMap<String, InputValueDef>, SchemaError> {
    for value in values {
        if into.contains_key(&value.name.value) {
            return Err(SchemaError::DuplicateField {
                type_name: owner.to_string(),
                field: value.name.value.clone(),
            });
        }
        into.insert(
            value.name.value.clone(),
            InputValueDef {
                name: value.name.value.clone(),
                ty: value.ty.clone(),
                default_value: value.default_value.clone(),
            },
        );
    }
    Ok(into)
}

fn apply_extension(
    types: &mut IndexMap<String, TypeDef>,
    ext: &TypeDefinition,
) -> Result<(), SchemaError> {
    let name = ext.name().value.as_str();
    let Some(target) = types.get_mut(name) else {
        return Err(SchemaError::ExtendUndefined(name.to_string()));
    };

    let mismatch = |target: &TypeKind| SchemaError::ExtensionKindMismatch {
        name: name.to_string(),
        expected: target.keyword(),
        found: ext.kind_str(),
    };

    match (&mut target.kind, ext) {
        (TypeKind::Scalar, TypeDefinition::Scalar(_)) => {}
        (TypeKind::Object { fields, interfaces }, TypeDefinition::Object(o)) => {
            *fields = convert_fields(name, &o.fields, std::mem::take(fields))?;
            for iface in &o.implements {
                if !interfaces.contains(&iface.value) {
                    interfaces.push(iface.value.clone());
                }
            }
        }
        (TypeKind::Interface { fields }, TypeDefinition::Interface(i)) => {
            *fields = convert_fields(name, &i.fields, std::mem::take(fields))?;
        }
        (TypeKind::Union { members }, TypeDefinition::Union(u)) => {
            members.extend(u.members.iter().map(|n| n.value.clone()));
        }
        (TypeKind::Enum { values }, TypeDefinition::Enum(e)) => {
            values.extend(e.values.iter().map(|v| v.name.value.clone()));
        }
        (TypeKind::InputObject { fields }, TypeDefinition::InputObject(i)) => {
            *fields = convert_input_values(name, &i.fields, std::mem::take(fields))?;
        }
        (kind, _) => return Err(mismatch(kind)),
    }
    Ok(())
}

fn check_references(types: &IndexMap<String, TypeDef>) -> Result<(), SchemaError> {
    let require = |name: &str, referenced_by: String| {
        if types.contains_key(name) {
            Ok(())
        } else {
            Err(SchemaError::UnknownType {
                name: name.to_string(),
                referenced_by,
            })
        }
    };

    for def in types.values() {
        match &def.kind {
            TypeKind::Object { fields, interfaces } => {
                for iface in interfaces {
                    require(iface, def.name.clone())?;
                }
                for field in fields.values() {
                    require(field.ty.name(), format!("{}.{}", def.name, field.name))?;
                    for arg in field.arguments.values() {
                        require(arg.ty.name(), format!("{}.{}({})", def.name, field.name, arg.name))?;
                    }
                }
            }
            TypeKind::Interface { fields } => {
                for field in fields.values() {
                    require(field.ty.name(), format!("{}.{}", def.name, field.name))?;
                }
            }
            TypeKind::Union { members } => {
                for member in members {
                    require(member, def.name.clone())?;
                }
            }
            TypeKind::InputObject { fields } => {
                for field in fields.values() {
                    require(field.ty.name(), format!("{}.{}", def.name, field.name))?;
                }
            }
            TypeKind::Scalar | TypeKind::Enum { .. } => {}
        }
    }
    Ok(())
}

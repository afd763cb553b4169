//! Base types every application schema builds on.

use crate::loader::Module;
use crate::scalars::{DateScalar, JsonScalar};
use serde_json::json;

/// SDL of the base module. Applications `extend type Query` and
/// `extend type Mutation` to add their root fields.
pub const BASE_TYPE_DEFS: &str = r#"
"Arbitrary JSON value."
scalar JSON

"Milliseconds since the Unix epoch."
scalar Date

type Query {
  framework: String
}

type Mutation {
  framework: String
}
"#;

/// The name `framework` resolves to.
pub const FRAMEWORK_NAME: &str = "morpher";

/// The module seeded into every loader: scalars and root types.
pub fn base_module() -> Module {
    Module::new()
        .type_defs(BASE_TYPE_DEFS)
        .scalar("JSON", JsonScalar)
        .scalar("Date", DateScalar)
        .resolver_fn("Query", "framework", |_, _, _, _| Ok(json!(FRAMEWORK_NAME)))
        .resolver_fn("Mutation", "framework", |_, _, _, _| Ok(json!(FRAMEWORK_NAME)))
}

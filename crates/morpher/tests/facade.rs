//! The crate root republishes its collaborators' items, not copies.

use morpher::error::{ErrorCode, SdkResult};
use morpher::loader::Module;
use morpher::server::{InitOptions, MorpherServer};
use morpher::version::InstalledPackages;
use std::any::TypeId;

#[test]
fn test_reexports_share_identity() {
    assert!(std::ptr::eq(morpher::config(), morpher::config::config()));
    assert!(std::ptr::eq(morpher::db(), morpher::db::db()));
    assert_eq!(
        TypeId::of::<morpher::Config>(),
        TypeId::of::<morpher::config::Config>()
    );

    let load: fn(Module) -> SdkResult<()> = morpher::load;
    assert_eq!(load as usize, morpher::loader::load as fn(Module) -> SdkResult<()> as usize);

    let initialize: fn(InitOptions) -> SdkResult<MorpherServer> = morpher::initialize;
    assert_eq!(
        initialize as usize,
        morpher::server::initialize as fn(InitOptions) -> SdkResult<MorpherServer> as usize
    );

    let expose: fn(&str, morpher::ExposureConfig) -> SdkResult<()> = morpher::expose;
    assert_eq!(
        expose as usize,
        morpher::expose::expose as fn(&str, morpher::ExposureConfig) -> SdkResult<()> as usize
    );
}

#[tokio::test]
async fn test_get_user_for_context_is_the_users_accessor() {
    assert!(morpher::get_user_for_context(None).await.is_anonymous());
    assert_eq!(
        morpher::get_user_for_context(Some("unknown")).await,
        morpher::users::get_user_for_context(Some("unknown")).await
    );
}

#[test]
fn test_base_types_are_registered() {
    let exec = morpher::loader::schema().unwrap();
    for name in ["JSON", "Date", "Query", "Mutation"] {
        assert!(exec.schema.get_type(name).is_some(), "missing {name}");
    }
}

#[test]
fn test_initialize_reports_every_unsatisfied_package() {
    let installed = InstalledPackages::from_pairs([
        ("apollo-server-express", "1.4.0"),
        ("graphql", "14.0.2"),
        ("graphql-load", "0.2.0"),
        ("graphql-tools", "4.0.0"),
    ]);
    let err = morpher::initialize(InitOptions::new(installed)).unwrap_err();

    assert_eq!(err.code, ErrorCode::VersionMismatch);
    assert!(err.message.contains("apollo-server-express@1.4.0 (requires 2.x.x)"));
    assert!(err.message.contains("graphql-load@0.2.0 (requires 0.1.x)"));
    assert!(err.message.contains("graphql-type-json not installed (requires 0.x.x)"));
    assert!(!err.message.contains("graphql@"));
    assert_eq!(
        err.extensions.unwrap()["packages"],
        serde_json::json!(["apollo-server-express", "graphql-load", "graphql-type-json"])
    );
}

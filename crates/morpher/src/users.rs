//! Resolving the current user from a login token.

use crate::config;
use crate::db::{db, Db};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use sha2::{Digest, Sha256};
use tracing::debug;

/// Collection holding user documents.
pub const USERS_COLLECTION: &str = "users";

/// The user attached to a request.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserContext {
    pub user_id: Option<String>,
    /// The user document projected onto the configured default fields.
    pub user: Option<Value>,
}

impl UserContext {
    /// Returns true when no user is logged in.
    pub fn is_anonymous(&self) -> bool {
        self.user_id.is_none()
    }
}

/// Hashes a login token the way the accounts system stores it.
pub fn hash_login_token(token: &str) -> String {
    STANDARD.encode(Sha256::digest(token.as_bytes()))
}

/// Looks up the user owning `login_token` in the process-wide database.
pub async fn get_user_for_context(login_token: Option<&str>) -> UserContext {
    let fields = config::current().user_default_fields;
    get_user_for_context_in(db(), &fields, login_token).await
}

/// Looks up the user owning `login_token` in `db`, keeping only `_id` and
/// `fields` of the user document.
///
/// A missing or unknown token yields an anonymous context.
pub async fn get_user_for_context_in(
    db: &Db,
    fields: &[String],
    login_token: Option<&str>,
) -> UserContext {
    let Some(token) = login_token.filter(|t| !t.is_empty()) else {
        return UserContext::default();
    };

    let filter = json!({ "services.resume.loginTokens.hashedToken": hash_login_token(token) });
    let Some(user) = db.collection(USERS_COLLECTION).find_one(&filter).await else {
        debug!("login token did not match any user");
        return UserContext::default();
    };

    let projected: Map<String, Value> = std::iter::once("_id")
        .chain(fields.iter().map(String::as_str))
        .filter_map(|field| user.get(field).map(|v| (field.to_string(), v.clone())))
        .collect();

    UserContext {
        user_id: user.get("_id").and_then(Value::as_str).map(String::from),
        user: Some(Value::Object(projected)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fields() -> Vec<String> {
        crate::config::Config::default().user_default_fields
    }

    async fn db_with_user(token: &str) -> Db {
        let db = Db::new();
        db.collection(USERS_COLLECTION)
            .insert(json!({
                "_id": "u1",
                "username": "ada",
                "emails": [{"address": "ada@example.com", "verified": true}],
                "services": {
                    "password": {"bcrypt": "secret"},
                    "resume": {"loginTokens": [
                        {"when": 0, "hashedToken": "other"},
                        {"when": 1, "hashedToken": hash_login_token(token)}
                    ]}
                }
            }))
            .await
            .unwrap();
        db
    }

    #[test]
    fn test_hash_login_token() {
        // SHA-256 of "abc", base64 encoded.
        assert_eq!(
            hash_login_token("abc"),
            "ungWv48Bz+pBQUDeXa4iI7ADYaOWF3qctBD/YfIAFa0="
        );
    }

    #[tokio::test]
    async fn test_known_token() {
        let db = db_with_user("token-1").await;
        let ctx = get_user_for_context_in(&db, &fields(), Some("token-1")).await;

        assert_eq!(ctx.user_id.as_deref(), Some("u1"));
        let user = ctx.user.unwrap();
        assert_eq!(user["username"], "ada");
        assert!(user.get("services").is_none());
    }

    #[tokio::test]
    async fn test_unknown_or_missing_token() {
        let db = db_with_user("token-1").await;
        assert!(get_user_for_context_in(&db, &fields(), Some("nope")).await.is_anonymous());
        assert!(get_user_for_context_in(&db, &fields(), Some("")).await.is_anonymous());
        assert_eq!(
            get_user_for_context_in(&db, &fields(), None).await,
            UserContext::default()
        );
    }
}

//! Building the context each request executes with.
//!
//! Every context holds the [`Db`] handle and the [`UserContext`] resolved
//! from the login-token header, both as typed values and (for the user) as
//! `userId` / `user` named values. A host-supplied [`ContextCreator`] adds
//! its own named values on top; on key collisions the host wins.

use crate::config::Config;
use crate::db::Db;
use crate::error::SdkResult;
use crate::users::{get_user_for_context_in, UserContext};
use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use morpher_runtime::{Context, TypedContext};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

/// What a context creator sees of the incoming request.
#[derive(Debug, Clone, Default)]
pub struct ContextRequest {
    /// Request headers, lowercase names.
    pub headers: HashMap<String, String>,
    pub user: UserContext,
}

/// Produces extra named context values for a request.
pub type ContextCreator =
    Arc<dyn Fn(ContextRequest) -> BoxFuture<'static, SdkResult<Map<String, Value>>> + Send + Sync>;

/// Wraps an async function as a [`ContextCreator`].
pub fn context_creator<F, Fut>(f: F) -> ContextCreator
where
    F: Fn(ContextRequest) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = SdkResult<Map<String, Value>>> + Send + 'static,
{
    Arc::new(move |request| f(request).boxed())
}

/// Builds the context for one request.
pub async fn build_context(
    db: &Db,
    config: &Config,
    headers: HashMap<String, String>,
    creator: Option<&ContextCreator>,
) -> SdkResult<Context> {
    let headers: HashMap<String, String> = headers
        .into_iter()
        .map(|(k, v)| (k.to_ascii_lowercase(), v))
        .collect();
    let token = headers
        .get(&config.login_token_header.to_ascii_lowercase())
        .map(String::as_str);
    let user = get_user_for_context_in(db, &config.user_default_fields, token).await;

    let mut ctx = TypedContext::new();
    ctx.insert(db.clone());
    ctx.insert(user.clone());
    ctx.set_value(
        "userId",
        user.user_id.clone().map_or(Value::Null, Value::String),
    );
    ctx.set_value("user", user.user.clone().unwrap_or(Value::Null));
    for (key, value) in &headers {
        ctx.set_header(key, value.clone());
    }

    if let Some(creator) = creator {
        let extra = creator(ContextRequest { headers, user }).await?;
        ctx.extend_values(extra);
    }

    Ok(ctx.into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::users::{hash_login_token, USERS_COLLECTION};
    use serde_json::json;

    #[tokio::test]
    async fn test_context_contents() {
        let db = Db::new();
        db.collection(USERS_COLLECTION)
            .insert(json!({
                "_id": "u1",
                "username": "ada",
                "services": {"resume": {"loginTokens": [{"hashedToken": hash_login_token("t")}]}}
            }))
            .await
            .unwrap();

        let creator = context_creator(|request: ContextRequest| async move {
            let mut values = Map::new();
            values.insert("secret".into(), json!("s"));
            values.insert("userId".into(), json!("overridden"));
            values.insert("seenUser".into(), json!(request.user.user_id));
            Ok::<_, crate::error::SdkError>(values)
        });

        let headers = HashMap::from([("Meteor-Login-Token".to_string(), "t".to_string())]);
        let ctx = build_context(&db, &Config::default(), headers, Some(&creator))
            .await
            .unwrap();

        assert_eq!(ctx.get::<UserContext>().unwrap().user_id.as_deref(), Some("u1"));
        assert!(ctx.get::<Db>().is_some());
        assert_eq!(ctx.value("user").unwrap()["username"], "ada");
        assert_eq!(ctx.value("secret"), Some(&json!("s")));
        assert_eq!(ctx.value("userId"), Some(&json!("overridden")));
        assert_eq!(ctx.value("seenUser"), Some(&json!("u1")));
        assert_eq!(ctx.header("meteor-login-token"), Some("t"));
    }

    #[tokio::test]
    async fn test_anonymous_context() {
        let ctx = build_context(&Db::new(), &Config::default(), HashMap::new(), None)
            .await
            .unwrap();
        assert!(ctx.get::<UserContext>().unwrap().is_anonymous());
        assert_eq!(ctx.value("userId"), Some(&Value::Null));
    }
}

//! The task board: schema, exposure and sample data.

use chrono::{Duration, Utc};
use morpher::users::{hash_login_token, USERS_COLLECTION};
use morpher::{
    db, expose, load, ContextRequest, Db, ExposureConfig, FindOptions, Module, ResolverError,
    SdkError, SdkResult,
};
use serde_json::{json, Map, Value};

/// Login token of the sample user, printed at startup.
pub const DEMO_TOKEN: &str = "alice-demo-token";

const TYPE_DEFS: &str = r#"
type Task {
  _id: ID!
  title: String!
  done: Boolean
  owner: String
  createdAt: Date
}

extend type Query {
  "The logged-in user, or null."
  me: JSON
  "Tasks owned by the logged-in user, oldest first."
  myTasks: [Task!]
  "When the server received this request."
  requestedAt: Date
}
"#;

/// Registers the task board with the framework.
pub fn register() -> SdkResult<()> {
    load(
        Module::new()
            .type_defs(TYPE_DEFS)
            .resolver_fn("Query", "me", |_, _, ctx, _| {
                Ok(ctx.value("user").cloned().unwrap_or(Value::Null))
            })
            .resolver_fn("Query", "requestedAt", |_, _, ctx, _| {
                Ok(ctx.value("requestedAt").cloned().unwrap_or(Value::Null))
            })
            .resolver_async("Query", "myTasks", |_, _, ctx, _| async move {
                let Some(owner) = ctx.value("userId").and_then(Value::as_str) else {
                    return Ok(Value::Null);
                };
                let tasks = ctx
                    .get::<Db>()
                    .map_or_else(|| db().collection("tasks"), |db| db.collection("tasks"))
                    .find(
                        &json!({ "owner": owner }),
                        &FindOptions::default().sort("createdAt", 1),
                    )
                    .await;
                Ok::<_, ResolverError>(Value::Array(tasks))
            }),
    )?;

    expose(
        "tasks",
        ExposureConfig::new()
            .type_name("Task")
            .mutations()
            .firewall(|ctx| match ctx.value("userId") {
                Some(Value::String(_)) => Ok(()),
                _ => Err(SdkError::auth("You must be logged in to access tasks")),
            }),
    )
}

/// Values every request context gets on top of the framework's own.
pub async fn request_context(_request: ContextRequest) -> SdkResult<Map<String, Value>> {
    let mut values = Map::new();
    values.insert(
        "requestedAt".to_string(),
        json!(Utc::now().timestamp_millis()),
    );
    Ok(values)
}

/// Inserts a sample user and a few tasks.
pub async fn seed(db: &Db) -> SdkResult<()> {
    db.collection(USERS_COLLECTION)
        .insert(json!({
            "_id": "alice",
            "username": "alice",
            "emails": [{"address": "alice@example.com", "verified": true}],
            "roles": ["admin"],
            "services": {
                "resume": {"loginTokens": [{"hashedToken": hash_login_token(DEMO_TOKEN)}]}
            }
        }))
        .await?;

    let tasks = db.collection("tasks");
    let now = Utc::now();
    for (days_ago, title, done) in [
        (3, "Write the release notes", true),
        (2, "Review the schema loader", false),
        (1, "Expose the tasks collection", false),
    ] {
        tasks
            .insert(json!({
                "title": title,
                "done": done,
                "owner": "alice",
                "createdAt": (now - Duration::days(days_ago)).timestamp_millis(),
            }))
            .await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use morpher::{initialize, Client, InitOptions, InstalledPackages, LocalLink};

    #[tokio::test]
    async fn test_my_tasks_follow_the_login_token() {
        register().unwrap();
        seed(db()).await.unwrap();
        let installed = InstalledPackages::from_lockfile(include_str!("../packages.lock")).unwrap();
        let server = initialize(InitOptions::new(installed).context(request_context)).unwrap();

        let alice = Client::new(LocalLink::new(server.clone()).login_token(DEMO_TOKEN));
        let data: Value = alice.query_data("{ myTasks { title } }").await.unwrap();
        assert_eq!(
            data,
            json!({"myTasks": [
                {"title": "Write the release notes"},
                {"title": "Review the schema loader"},
                {"title": "Expose the tasks collection"},
            ]})
        );

        let anonymous: Value = Client::new(LocalLink::new(server))
            .query_data("{ myTasks { title } }")
            .await
            .unwrap();
        assert_eq!(anonymous, json!({"myTasks": null}));
    }
}

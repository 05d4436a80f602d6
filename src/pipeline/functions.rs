//! Side-effect dispatch: a registry from function-call name to a handler
//! with a uniform signature, so new intents can be added without touching
//! the coordinator.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::error::{BlackboxError, FunctionError};
use crate::store::ContextStore;

/// A handler for one recognized function-call name.
#[async_trait]
pub trait FunctionHandler: Send + Sync {
    /// Execute the call for `user_id` with `arguments`, returning a result
    /// value reported back (and logged), never surfaced to the caller.
    async fn call(
        &self,
        user_id: &str,
        arguments: &Map<String, Value>,
    ) -> Result<Value, FunctionError>;
}

/// Name → handler registry, built once at [`crate::app::AppContext`]
/// construction.
pub type FunctionRegistry = HashMap<String, Arc<dyn FunctionHandler>>;

/// Build the registry recognized out of the box: `set_reminder`,
/// `access_vault`, `play_media`.
#[must_use]
pub fn default_registry(store: Arc<ContextStore>) -> FunctionRegistry {
    let mut registry: FunctionRegistry = HashMap::new();
    registry.insert(
        "set_reminder".to_owned(),
        Arc::new(SetReminder {
            store: Arc::clone(&store),
        }),
    );
    registry.insert(
        "access_vault".to_owned(),
        Arc::new(AccessVault {
            store: Arc::clone(&store),
        }),
    );
    registry.insert("play_media".to_owned(), Arc::new(PlayMedia { store }));
    registry
}

fn required_str<'a>(
    name: &str,
    arguments: &'a Map<String, Value>,
    field: &str,
) -> Result<&'a str, FunctionError> {
    arguments
        .get(field)
        .and_then(Value::as_str)
        .ok_or_else(|| FunctionError::InvalidArguments {
            name: name.to_owned(),
            message: format!("missing or non-string field `{field}`"),
        })
}

struct SetReminder {
    store: Arc<ContextStore>,
}

#[async_trait]
impl FunctionHandler for SetReminder {
    async fn call(
        &self,
        user_id: &str,
        arguments: &Map<String, Value>,
    ) -> Result<Value, FunctionError> {
        let title = required_str("set_reminder", arguments, "title")?;
        let due_date_raw = required_str("set_reminder", arguments, "due_date")?;
        let due_date = chrono::DateTime::parse_from_rfc3339(due_date_raw)
            .map(|dt| dt.with_timezone(&chrono::Utc))
            .map_err(|e| FunctionError::InvalidArguments {
                name: "set_reminder".to_owned(),
                message: format!("invalid `due_date`: {e}"),
            })?;
        let description = arguments.get("description").and_then(Value::as_str);
        let recurring = arguments.get("recurring").and_then(Value::as_str);

        let store = Arc::clone(&self.store);
        let user_id = user_id.to_owned();
        let title = title.to_owned();
        let description = description.map(str::to_owned);
        let recurring = recurring.map(str::to_owned);
        let id = tokio::task::spawn_blocking(move || {
            store.create_reminder(
                &user_id,
                &title,
                due_date,
                description.as_deref(),
                recurring.as_deref(),
            )
        })
        .await
        .map_err(|e| FunctionError::HandlerFailed {
            name: "set_reminder".to_owned(),
            source: BlackboxError::Protocol(e.to_string()),
        })?
        .map_err(|e| FunctionError::HandlerFailed {
            name: "set_reminder".to_owned(),
            source: BlackboxError::Store(e),
        })?;

        Ok(serde_json::json!({ "id": id }))
    }
}

struct AccessVault {
    store: Arc<ContextStore>,
}

#[async_trait]
impl FunctionHandler for AccessVault {
    async fn call(
        &self,
        user_id: &str,
        arguments: &Map<String, Value>,
    ) -> Result<Value, FunctionError> {
        let category = arguments.get("category").and_then(Value::as_str);

        let store = Arc::clone(&self.store);
        let user_id = user_id.to_owned();
        let category = category.map(str::to_owned);
        let items = tokio::task::spawn_blocking(move || {
            store.list_vault_items(&user_id, category.as_deref())
        })
        .await
        .map_err(|e| FunctionError::HandlerFailed {
            name: "access_vault".to_owned(),
            source: BlackboxError::Protocol(e.to_string()),
        })?
        .map_err(|e| FunctionError::HandlerFailed {
            name: "access_vault".to_owned(),
            source: BlackboxError::Store(e),
        })?;

        Ok(serde_json::json!({ "count": items.len() }))
    }
}

struct PlayMedia {
    store: Arc<ContextStore>,
}

#[async_trait]
impl FunctionHandler for PlayMedia {
    async fn call(
        &self,
        user_id: &str,
        arguments: &Map<String, Value>,
    ) -> Result<Value, FunctionError> {
        let media_type = arguments.get("media_type").and_then(Value::as_str);
        let title = arguments.get("title").and_then(Value::as_str);

        let store = Arc::clone(&self.store);
        let user_id = user_id.to_owned();
        let media_type = media_type.map(str::to_owned);
        let items = tokio::task::spawn_blocking(move || {
            store.list_media_items(&user_id, media_type.as_deref())
        })
        .await
        .map_err(|e| FunctionError::HandlerFailed {
            name: "play_media".to_owned(),
            source: BlackboxError::Protocol(e.to_string()),
        })?
        .map_err(|e| FunctionError::HandlerFailed {
            name: "play_media".to_owned(),
            source: BlackboxError::Store(e),
        })?;

        let matched = title.and_then(|t| items.into_iter().find(|item| item.title == t));
        match matched {
            Some(item) => Ok(serde_json::json!({ "file_path": item.file_path })),
            None => Ok(serde_json::json!({ "file_path": Value::Null })),
        }
    }
}

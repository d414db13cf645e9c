//! Named background tasks.
//!
//! Applications register async functions by name at build time. Handlers
//! then either fire one and forget it, or run it and await its result.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use futures_util::future::BoxFuture;
use serde_json::Value;
use tokio::task::JoinHandle;

use crate::error::{Error, Result};
use crate::routing::RouteError;

type TaskFn = Arc<dyn Fn(Value) -> BoxFuture<'static, Result<Value>> + Send + Sync>;

/// Registry of named tasks.
#[derive(Clone, Default)]
pub struct TaskRegistry {
    tasks: HashMap<String, TaskFn>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `task` under `name`. Names are unique.
    pub fn register<F, Fut>(&mut self, name: &str, task: F) -> Result<(), RouteError>
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value>> + Send + 'static,
    {
        if self.tasks.contains_key(name) {
            return Err(RouteError::DuplicateTask(name.to_string()));
        }
        let task: TaskFn = Arc::new(move |arg| Box::pin(task(arg)));
        self.tasks.insert(name.to_string(), task);
        Ok(())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tasks.contains_key(name)
    }

    /// Start `name` in the background.
    pub fn spawn(&self, name: &str, arg: Value) -> Result<JoinHandle<Result<Value>>> {
        let task = self
            .tasks
            .get(name)
            .cloned()
            .ok_or_else(|| Error::Internal(format!("no task named `{name}`")))?;
        let name = name.to_string();
        Ok(tokio::spawn(async move {
            let result = task(arg).await;
            if let Err(err) = &result {
                tracing::warn!(task = %name, error = %err, "task failed");
            }
            result
        }))
    }

    /// Run `name` and wait for its result.
    pub async fn run(&self, name: &str, arg: Value) -> Result<Value> {
        self.spawn(name, arg)?
            .await
            .map_err(|err| Error::Internal(format!("task `{name}` did not complete: {err}")))?
    }
}

impl fmt::Debug for TaskRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<_> = self.tasks.keys().collect();
        names.sort();
        f.debug_struct("TaskRegistry").field("tasks", &names).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn registry() -> TaskRegistry {
        let mut tasks = TaskRegistry::new();
        tasks
            .register("double", |arg: Value| async move {
                let n = arg.as_i64().ok_or_else(|| Error::BadRequest("not a number".into()))?;
                Ok::<_, Error>(json!(n * 2))
            })
            .unwrap();
        tasks
    }

    #[tokio::test]
    async fn run_awaits_the_result() {
        let tasks = registry();
        assert_eq!(tasks.run("double", json!(21)).await.unwrap(), json!(42));
        assert!(tasks.run("double", json!("x")).await.is_err());
    }

    #[tokio::test]
    async fn spawn_and_unknown_names() {
        let tasks = registry();
        let handle = tasks.spawn("double", json!(2)).unwrap();
        assert_eq!(handle.await.unwrap().unwrap(), json!(4));
        assert!(tasks.spawn("missing", Value::Null).is_err());
    }

    #[test]
    fn names_are_unique() {
        let mut tasks = registry();
        let err = tasks
            .register("double", |_arg: Value| async { Ok::<_, Error>(Value::Null) })
            .unwrap_err();
        assert!(matches!(err, RouteError::DuplicateTask(_)));
    }
}

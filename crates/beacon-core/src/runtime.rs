use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::domain::TaskType;
use crate::error::BeaconError;
use crate::ports::TaskProcessor;

/// Registry of processors (task_type -> processor).
///
/// Design:
/// - Built during initialization (mutable).
/// - Used during runtime (immutable, behind `Router`).
/// This avoids locks and keeps it simple.
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: BTreeMap<TaskType, Arc<dyn TaskProcessor>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self {
            handlers: BTreeMap::new(),
        }
    }

    /// Register a processor for a task type. A second registration for the
    /// same type is an error.
    pub fn register(
        &mut self,
        task_type: impl Into<TaskType>,
        handler: impl TaskProcessor + 'static,
    ) -> Result<(), BeaconError> {
        self.register_shared(task_type.into(), Arc::new(handler))
    }

    pub fn register_shared(
        &mut self,
        task_type: TaskType,
        handler: Arc<dyn TaskProcessor>,
    ) -> Result<(), BeaconError> {
        if self.handlers.contains_key(&task_type) {
            return Err(BeaconError::DuplicateHandler(task_type));
        }
        self.handlers.insert(task_type, handler);
        Ok(())
    }

    pub fn get(&self, task_type: &TaskType) -> Option<&Arc<dyn TaskProcessor>> {
        self.handlers.get(task_type)
    }

    /// Sorted.
    pub fn registered_types(&self) -> Vec<TaskType> {
        self.handlers.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

/// Router dispatches a task to the processor registered for its type.
pub struct Router {
    registry: Arc<HandlerRegistry>,
}

impl Router {
    pub fn new(registry: HandlerRegistry) -> Self {
        Self {
            registry: Arc::new(registry),
        }
    }

    pub fn registry(&self) -> &HandlerRegistry {
        &self.registry
    }
}

#[async_trait]
impl TaskProcessor for Router {
    async fn process(&self, task_type: &TaskType, payload: &Value) -> Result<Value, BeaconError> {
        let handler = self
            .registry
            .get(task_type)
            .ok_or_else(|| BeaconError::HandlerNotFound(task_type.clone()))?;

        handler.process(task_type, payload).await
    }
}

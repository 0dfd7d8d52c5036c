//! Registry mapping workflow names to handlers.
//!
//! The executor resolves the workflow function by name when it applies a
//! `WorkflowExecutionStarted` event. Handlers follow a narrow calling
//! convention — a context plus a payload array in, a payload or error out —
//! so no runtime reflection is needed.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::{Payload, WorkflowContext};

/// Trait implemented by workflow handlers the executor can invoke.
#[async_trait]
pub trait WorkflowHandler: Send + Sync {
    async fn invoke(&self, ctx: WorkflowContext, inputs: Vec<Payload>) -> Result<Payload, String>;
}

/// Function wrapper that implements `WorkflowHandler`.
pub struct FnWorkflow<F, Fut>(pub F)
where
    F: Fn(WorkflowContext, Vec<Payload>) -> Fut + Send + Sync + 'static,
    Fut: std::future::Future<Output = Result<Payload, String>> + Send + 'static;

#[async_trait]
impl<F, Fut> WorkflowHandler for FnWorkflow<F, Fut>
where
    F: Fn(WorkflowContext, Vec<Payload>) -> Fut + Send + Sync + 'static,
    Fut: std::future::Future<Output = Result<Payload, String>> + Send + 'static,
{
    async fn invoke(&self, ctx: WorkflowContext, inputs: Vec<Payload>) -> Result<Payload, String> {
        (self.0)(ctx, inputs).await
    }
}

/// Immutable registry of workflow handlers by name.
#[derive(Clone, Default)]
pub struct WorkflowRegistry {
    inner: Arc<HashMap<String, Arc<dyn WorkflowHandler>>>,
}

impl WorkflowRegistry {
    pub fn builder() -> WorkflowRegistryBuilder {
        WorkflowRegistryBuilder {
            map: HashMap::new(),
            errors: Vec::new(),
        }
    }

    /// Resolve a registered workflow function by name.
    pub fn get(&self, name: &str) -> Option<Arc<dyn WorkflowHandler>> {
        let handler = self.inner.get(name).cloned();
        if handler.is_none() {
            tracing::debug!(
                target: "workloom::registry",
                requested_name = %name,
                registered_count = self.inner.len(),
                registered_names = ?self.names(),
                "registry lookup miss"
            );
        }
        handler
    }

    pub fn has(&self, name: &str) -> bool {
        self.inner.contains_key(name)
    }

    pub fn names(&self) -> Vec<String> {
        self.inner.keys().cloned().collect()
    }

    pub fn count(&self) -> usize {
        self.inner.len()
    }
}

pub struct WorkflowRegistryBuilder {
    map: HashMap<String, Arc<dyn WorkflowHandler>>,
    errors: Vec<String>,
}

impl WorkflowRegistryBuilder {
    pub fn register<F, Fut>(mut self, name: impl Into<String>, f: F) -> Self
    where
        F: Fn(WorkflowContext, Vec<Payload>) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = Result<Payload, String>> + Send + 'static,
    {
        let name = name.into();
        if self.map.contains_key(&name) {
            self.errors.push(format!("duplicate workflow registration: {name}"));
            return self;
        }
        self.map.insert(name, Arc::new(FnWorkflow(f)));
        self
    }

    /// Register a workflow taking one typed input (decoded from the first
    /// payload) and returning a typed result.
    pub fn register_typed<In, Out, F, Fut>(self, name: impl Into<String>, f: F) -> Self
    where
        In: serde::de::DeserializeOwned + Send + 'static,
        Out: serde::Serialize + Send + 'static,
        F: Fn(WorkflowContext, In) -> Fut + Send + Sync + Clone + 'static,
        Fut: std::future::Future<Output = Result<Out, String>> + Send + 'static,
    {
        let wrapper = move |ctx: WorkflowContext, inputs: Vec<Payload>| {
            let f_inner = f.clone();
            async move {
                let raw = inputs.into_iter().next().unwrap_or_default();
                let input: In = crate::typed_codec::decode(&raw)?;
                let out: Out = f_inner(ctx, input).await?;
                crate::typed_codec::encode(&out)
            }
        };
        self.register(name, wrapper)
    }

    /// Merge another registry into this builder; duplicates are errors.
    pub fn merge(mut self, other: WorkflowRegistry) -> Self {
        for (name, handler) in other.inner.iter() {
            if self.map.contains_key(name) {
                self.errors.push(format!("duplicate workflow in merge: {name}"));
            } else {
                self.map.insert(name.clone(), handler.clone());
            }
        }
        self
    }

    pub fn build(self) -> WorkflowRegistry {
        WorkflowRegistry {
            inner: Arc::new(self.map),
        }
    }

    /// Build the registry, surfacing any registration errors.
    pub fn build_result(self) -> Result<WorkflowRegistry, String> {
        if self.errors.is_empty() {
            Ok(self.build())
        } else {
            Err(self.errors.join("; "))
        }
    }
}

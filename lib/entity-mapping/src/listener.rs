use std::any::Any;
use std::fmt;
use std::sync::Arc;

use crate::access::Projection;
use crate::descriptor::TypeDescriptor;
use crate::MappingError;

/// Error returned by a lifecycle listener.
pub type ListenerError = Box<dyn std::error::Error + Send + Sync>;

/// Lifecycle points at which listeners run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CallbackType {
    PreInsert,
    PostInsert,
    PreUpdate,
    PostUpdate,
    PreUpsert,
    PostUpsert,
    PreDelete,
    PostDelete,
    PostLoad,
}

pub(crate) trait ListenerHandler: Send + Sync {
    fn invoke(&self, target: &dyn Any) -> Result<(), ListenerError>;
}

pub(crate) struct TypedListener<T> {
    handler: Box<dyn Fn(&T) -> Result<(), ListenerError> + Send + Sync>,
}

impl<T: Any> TypedListener<T> {
    pub(crate) fn new<H>(handler: H) -> Self
    where
        H: Fn(&T) -> Result<(), ListenerError> + Send + Sync + 'static,
    {
        Self {
            handler: Box::new(handler),
        }
    }
}

impl<T: Any> ListenerHandler for TypedListener<T> {
    fn invoke(&self, target: &dyn Any) -> Result<(), ListenerError> {
        let target = target
            .downcast_ref::<T>()
            .ok_or_else(|| MappingError::TargetMismatch {
                expected: std::any::type_name::<T>(),
            })?;
        (self.handler)(target)
    }
}

/// Runs an ancestor's listener against the ancestor part of a derived value.
pub(crate) struct ProjectedListener {
    pub(crate) projection: Arc<dyn Projection>,
    pub(crate) inner: Arc<dyn ListenerHandler>,
}

impl ListenerHandler for ProjectedListener {
    fn invoke(&self, target: &dyn Any) -> Result<(), ListenerError> {
        let base = self.projection.project(target)?;
        self.inner.invoke(base)
    }
}

/// A listener attached to a type descriptor.
#[derive(Clone)]
pub struct ListenerBinding {
    pub(crate) callback: CallbackType,
    pub(crate) declared_on: &'static str,
    pub(crate) handler: Arc<dyn ListenerHandler>,
}

impl ListenerBinding {
    pub fn callback(&self) -> CallbackType {
        self.callback
    }

    pub fn declared_on(&self) -> &'static str {
        self.declared_on
    }
}

impl fmt::Debug for ListenerBinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ListenerBinding")
            .field("callback", &self.callback)
            .field("declared_on", &self.declared_on)
            .finish()
    }
}

/// Invoke every listener bound to `callback`, stopping at the first failure.
pub(crate) fn dispatch(
    descriptor: &TypeDescriptor,
    callback: CallbackType,
    target: &dyn Any,
) -> Result<(), MappingError> {
    for binding in descriptor
        .listeners
        .iter()
        .filter(|binding| binding.callback == callback)
    {
        tracing::trace!(
            type_name = descriptor.type_name,
            declared_on = binding.declared_on,
            ?callback,
            "dispatching listener"
        );
        binding
            .handler
            .invoke(target)
            .map_err(|source| MappingError::Listener {
                type_name: descriptor.type_name,
                callback,
                source,
            })?;
    }
    Ok(())
}

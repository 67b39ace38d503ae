use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt::{Debug, Formatter, Result as FmtResult};
use std::sync::Arc;

type Values = HashMap<TypeId, Arc<dyn Any + Send + Sync>>;

/// A request-scoped bag of typed values.
///
/// A fresh context is created for every outbound call and every inbound
/// delivery. Interceptors attach values with [`Context::with`]; attaching never
/// removes or mutates what earlier interceptors stored, it produces a new
/// context that shares the old values. The gateway itself never reads it.
#[derive(Clone, Default)]
pub struct Context {
    values: Arc<Values>,
}

impl Context {
    /// Creates an empty context.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a context that additionally carries `value`.
    ///
    /// A value of the same type already present is shadowed in the returned
    /// context only.
    #[must_use]
    pub fn with<T>(&self, value: T) -> Self
    where
        T: Any + Send + Sync,
    {
        let mut values = Values::clone(&self.values);
        values.insert(TypeId::of::<T>(), Arc::new(value));

        Self {
            values: Arc::new(values),
        }
    }

    /// Gets the value of type `T`, if one was attached.
    #[must_use]
    pub fn get<T>(&self) -> Option<&T>
    where
        T: Any + Send + Sync,
    {
        self.values
            .get(&TypeId::of::<T>())
            .and_then(|value| value.downcast_ref::<T>())
    }

    /// Whether a value of type `T` was attached.
    #[must_use]
    pub fn contains<T>(&self) -> bool
    where
        T: Any + Send + Sync,
    {
        self.values.contains_key(&TypeId::of::<T>())
    }

    /// Number of attached values.
    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Whether nothing was attached.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl Debug for Context {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.debug_struct("Context")
            .field("values", &self.values.len())
            .finish()
    }
}

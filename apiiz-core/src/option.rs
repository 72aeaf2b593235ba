use std::fmt;
use std::sync::Arc;

/// A setting that is either fixed or derived from the call payload.
pub enum OptionFactory<P, T> {
    Literal(T),
    Factory(Arc<dyn Fn(&P) -> T + Send + Sync>),
}

impl<P, T: Clone> OptionFactory<P, T> {
    pub fn literal(value: T) -> Self {
        OptionFactory::Literal(value)
    }

    pub fn factory<F>(f: F) -> Self
    where
        F: Fn(&P) -> T + Send + Sync + 'static,
    {
        OptionFactory::Factory(Arc::new(f))
    }

    /// Resolve the setting for one call.
    pub fn evaluate(&self, payload: &P) -> T {
        match self {
            OptionFactory::Literal(value) => value.clone(),
            OptionFactory::Factory(f) => f(payload),
        }
    }
}

impl<P, T: Clone> Clone for OptionFactory<P, T> {
    fn clone(&self) -> Self {
        match self {
            OptionFactory::Literal(value) => OptionFactory::Literal(value.clone()),
            OptionFactory::Factory(f) => OptionFactory::Factory(f.clone()),
        }
    }
}

impl<P, T: fmt::Debug> fmt::Debug for OptionFactory<P, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OptionFactory::Literal(value) => f.debug_tuple("Literal").field(value).finish(),
            OptionFactory::Factory(_) => f.write_str("Factory(..)"),
        }
    }
}

impl<P> From<&str> for OptionFactory<P, String> {
    fn from(value: &str) -> Self {
        OptionFactory::Literal(value.to_string())
    }
}

impl<P> From<String> for OptionFactory<P, String> {
    fn from(value: String) -> Self {
        OptionFactory::Literal(value)
    }
}

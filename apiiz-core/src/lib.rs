//! Resolver composition for declarative API definitions.
//!
//! A definition is a set of named [`Resolver`]s. Each resolver is a factory
//! that, given a shared [`Context`], produces a [`Dispatcher`]: the async
//! callable consumers invoke. Cross-cutting behavior (batching, relations,
//! fan-out, debouncing, cancellation) is layered on with enhancers chained
//! through [`Resolver::with`], and [`define`] instantiates the whole set.

pub mod cancel;
pub mod codec;
pub mod concurrency;
pub mod config;
pub mod context;
pub mod define;
pub mod error;
pub mod events;
pub mod group;
pub mod http;
pub mod ids;
pub mod loader;
pub mod logging;
pub mod memory;
pub mod option;
pub mod relation;
pub mod resolver;
pub mod shared;
pub mod singleton;
pub mod transform;

pub use cancel::{cancellable, cancellable_with, CancelToken};
pub use concurrency::{debounce, forever, throttle};
pub use config::{Configs, GlobalEnhancer, HttpConfigs, LoaderConfigs};
pub use context::{Context, Mappings};
pub use define::{define, Api, Schema};
pub use error::{ApiError, ApiResult, ErrorHook};
pub use events::{on, Events};
pub use group::{all, race, Group, GroupMode};
pub use http::{Dictionary, HttpDriver, HttpMethod, HttpRequest, HttpResponse};
pub use ids::ResolverId;
pub use loader::{loader, LoaderOptions, LoaderRef, MissPolicy, Remap};
pub use logging::{init_logging, init_test_logging, LogFormat};
pub use memory::{memory, sibling, wrap};
pub use option::OptionFactory;
pub use relation::{include, Relations};
pub use resolver::{enhance, DispatchFuture, Dispatcher, Resolver};
pub use shared::SharedRegistry;
pub use singleton::singleton;
pub use transform::{pluck, transform};

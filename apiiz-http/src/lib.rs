//! HTTP boundary for apiiz definitions: a `reqwest` driver and REST leaf
//! resolvers.

pub mod driver;
pub mod rest;
pub mod template;

pub use driver::{DriverConfig, ReqwestDriver};
pub use rest::{rest, RestConfigs, RestOptions, REST_BLOCK};

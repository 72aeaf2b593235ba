use futures::future;
use futures::FutureExt;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use crate::context::Context;
use crate::error::{ApiError, ApiResult};
use crate::resolver::{Dispatcher, Resolver};

pub fn decode_payload<P: DeserializeOwned>(payload: Value) -> ApiResult<P> {
    serde_json::from_value(payload).map_err(|e| ApiError::Decode(e.to_string()))
}

pub fn encode_result<R: Serialize>(result: &R) -> ApiResult<Value> {
    serde_json::to_value(result).map_err(|e| ApiError::Decode(e.to_string()))
}

/// Expose a typed resolver through the JSON boundary used by definitions.
///
/// A payload that does not deserialize into `P` is rejected with
/// [`ApiError::Decode`] without calling the inner dispatcher.
///
/// ```
/// use apiiz_core::{codec, wrap, Resolver};
/// use serde_json::Value;
///
/// let add: Resolver<(i64, i64), i64> = wrap(|(a, b), _| Ok(a + b));
/// let exposed: Resolver<Value, Value> = codec::json(add);
/// # let _ = exposed;
/// ```
pub fn json<P, R>(resolver: Resolver<P, R>) -> Resolver<Value, Value>
where
    P: DeserializeOwned + Send + 'static,
    R: Serialize + Send + 'static,
{
    Resolver::new(move |ctx: &Context| {
        let inner = resolver.resolve(ctx);
        Dispatcher::new(move |payload: Value| {
            let payload = match decode_payload::<P>(payload) {
                Ok(payload) => payload,
                Err(e) => return future::ready(Err(e)).boxed(),
            };
            let call = inner.call(payload);
            async move { encode_result(&call.await?) }.boxed()
        })
    })
}

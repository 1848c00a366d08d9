//! Handler registry keyed by request type tag.
//!
//! Each route owns the record shape of its request: the router decodes the
//! body into that shape, calls the handler outside any transport lock, and
//! encodes the result into a `ResponseEnvelope`.

use crate::error::DispatchError;
use bytes::Bytes;
use flightrpc_protocol::{codec, RequestId, ResponseEnvelope, StatusCoded, Wire};
use futures::future::{self, BoxFuture, FutureExt};
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::net::SocketAddr;

/// Per-request information passed to handlers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestContext {
    /// Address the request came from.
    pub peer: SocketAddr,
    pub request_id: RequestId,
    pub type_tag: u8,
}

type ErasedHandler =
    Box<dyn Fn(RequestContext, Bytes) -> BoxFuture<'static, Result<Bytes, DispatchError>> + Send + Sync>;

/// Maps request type tags to handlers.
#[derive(Default)]
pub struct Router {
    routes: HashMap<u8, ErasedHandler>,
}

impl Router {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a handler for a request type tag, replacing any previous one.
    ///
    /// The handler returns `Ok(Some(resp))` for a reply with data, `Ok(None)`
    /// for a success with no data, and `Err(e)` for a reply carrying
    /// `e.status_code()` and no data.
    pub fn route<Req, Resp, E, F, Fut>(mut self, type_tag: u8, handler: F) -> Self
    where
        Req: Wire + Send + 'static,
        Resp: Wire + Send + 'static,
        E: StatusCoded + fmt::Display + Send + 'static,
        F: Fn(RequestContext, Req) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Option<Resp>, E>> + Send + 'static,
    {
        let erased = move |ctx: RequestContext, body: Bytes| {
            let request: Req = match codec::decode(&body) {
                Ok(request) => request,
                Err(e) => return future::ready(Err(DispatchError::Decode(e))).boxed(),
            };

            let response = handler(ctx, request);
            async move {
                let result = response.await;
                if let Err(ref e) = result {
                    tracing::debug!(
                        "[{}] Handler for tag {} failed ({}): {}",
                        ctx.request_id,
                        ctx.type_tag,
                        e.status_code(),
                        e
                    );
                }
                Ok(encode_envelope(&ctx, &ResponseEnvelope::from_result(result)))
            }
            .boxed()
        };

        self.routes.insert(type_tag, Box::new(erased));
        self
    }

    /// Decodes the body and runs the handler registered for the context's tag.
    pub async fn dispatch(&self, ctx: RequestContext, body: Bytes) -> Result<Bytes, DispatchError> {
        let handler = self
            .routes
            .get(&ctx.type_tag)
            .ok_or(DispatchError::UnknownRoute(ctx.type_tag))?;
        handler(ctx, body).await
    }

    pub fn contains(&self, type_tag: u8) -> bool {
        self.routes.contains_key(&type_tag)
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

impl fmt::Debug for Router {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut tags: Vec<_> = self.routes.keys().collect();
        tags.sort();
        f.debug_struct("Router").field("tags", &tags).finish()
    }
}

/// Encodes an envelope, degrading to a success envelope with no data.
pub fn encode_envelope<T: Wire>(ctx: &RequestContext, envelope: &ResponseEnvelope<T>) -> Bytes {
    match codec::encode(envelope) {
        Ok(bytes) => bytes,
        Err(e) => {
            tracing::warn!(
                "[{}] Failed to encode reply for tag {}, sending empty success: {}",
                ctx.request_id,
                ctx.type_tag,
                e
            );
            empty_success()
        }
    }
}

/// Wire form of a success envelope without data.
pub fn empty_success() -> Bytes {
    Bytes::from_static(&[flightrpc_protocol::StatusCode::Success as u8])
}

#[cfg(test)]
mod tests {
    use super::*;
    use flightrpc_protocol::{wire_record, CodecError, Empty, StatusCode};

    #[derive(Debug, Clone, PartialEq)]
    struct Lookup {
        id: i32,
    }
    wire_record!(Lookup { id });

    #[derive(Debug, Clone, PartialEq)]
    struct Found {
        name: String,
    }
    wire_record!(Found { name });

    #[derive(Debug, Clone, PartialEq)]
    struct Bad {
        name: String,
    }
    wire_record!(Bad { name });

    #[derive(Debug)]
    enum LookupError {
        Missing,
    }

    impl fmt::Display for LookupError {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "missing")
        }
    }

    impl StatusCoded for LookupError {
        fn status_code(&self) -> StatusCode {
            match self {
                LookupError::Missing => StatusCode::NoSuchFlightIdentifier,
            }
        }
    }

    fn ctx(type_tag: u8) -> RequestContext {
        RequestContext {
            peer: "127.0.0.1:5000".parse().unwrap(),
            request_id: RequestId::try_from("router001").unwrap(),
            type_tag,
        }
    }

    fn router() -> Router {
        Router::new()
            .route(1, |_ctx, _req: Empty| async {
                Ok::<Option<Empty>, LookupError>(None)
            })
            .route(3, |_ctx, req: Lookup| async move {
                if req.id == 1 {
                    Ok(Some(Found {
                        name: "SQ32".to_string(),
                    }))
                } else {
                    Err(LookupError::Missing)
                }
            })
            .route(9, |_ctx, _req: Empty| async {
                Ok::<_, LookupError>(Some(Bad {
                    name: "nul\0inside".to_string(),
                }))
            })
    }

    #[tokio::test]
    async fn test_dispatch_success() {
        let router = router();
        let body = codec::encode(&Lookup { id: 1 }).unwrap();
        let reply = router.dispatch(ctx(3), body).await.unwrap();

        let envelope: ResponseEnvelope<Found> = codec::decode(&reply).unwrap();
        assert_eq!(envelope.status, StatusCode::Success);
        assert_eq!(envelope.data.unwrap().name, "SQ32");
    }

    #[tokio::test]
    async fn test_dispatch_error_status() {
        let router = router();
        let body = codec::encode(&Lookup { id: 77 }).unwrap();
        let reply = router.dispatch(ctx(3), body).await.unwrap();

        let envelope: ResponseEnvelope<Found> = codec::decode(&reply).unwrap();
        assert_eq!(envelope.status, StatusCode::NoSuchFlightIdentifier);
        assert!(envelope.data.is_none());
        assert_eq!(reply.len(), 1);
    }

    #[tokio::test]
    async fn test_dispatch_empty_success() {
        let router = router();
        let reply = router.dispatch(ctx(1), Bytes::new()).await.unwrap();
        assert_eq!(reply, empty_success());
    }

    #[tokio::test]
    async fn test_unknown_route() {
        let router = router();
        let result = router.dispatch(ctx(42), Bytes::new()).await;
        assert!(matches!(result, Err(DispatchError::UnknownRoute(42))));
    }

    #[tokio::test]
    async fn test_decode_failure() {
        let router = router();
        let result = router.dispatch(ctx(3), Bytes::from_static(&[1, 2])).await;
        assert!(matches!(
            result,
            Err(DispatchError::Decode(CodecError::Truncated { .. }))
        ));
    }

    #[tokio::test]
    async fn test_encode_failure_degrades_to_empty_success() {
        let router = router();
        let reply = router.dispatch(ctx(9), Bytes::new()).await.unwrap();
        let envelope: ResponseEnvelope<Bad> = codec::decode(&reply).unwrap();
        assert_eq!(envelope.status, StatusCode::Success);
        assert!(envelope.data.is_none());
    }

    #[test]
    fn test_registry() {
        let router = router();
        assert_eq!(router.len(), 3);
        assert!(router.contains(3));
        assert!(!router.contains(4));
        assert!(format!("{:?}", router).contains("[1, 3, 9]"));
        assert!(Router::new().is_empty());
    }
}

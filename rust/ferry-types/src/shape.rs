use std::fmt;
use std::marker::PhantomData;

use serde::{Deserialize, Serialize};

/// The four interaction shapes a logical stream can take.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Shape {
    Unary,
    ServerStreaming,
    ClientStreaming,
    Bidirectional,
}

impl Shape {
    /// Whether the caller may send more than one request.
    pub fn caller_streams(self) -> bool {
        matches!(self, Shape::ClientStreaming | Shape::Bidirectional)
    }

    /// Whether the responder may send more than one response.
    pub fn responder_streams(self) -> bool {
        matches!(self, Shape::ServerStreaming | Shape::Bidirectional)
    }
}

impl fmt::Display for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Shape::Unary => "unary",
            Shape::ServerStreaming => "server-streaming",
            Shape::ClientStreaming => "client-streaming",
            Shape::Bidirectional => "bidirectional",
        };
        f.write_str(s)
    }
}

mod sealed {
    pub trait Sealed {}
}

/// Type-level marker for a [`Shape`], used as the first parameter of [`Method`].
pub trait ShapeKind: sealed::Sealed + Send + Sync + 'static {
    const SHAPE: Shape;
}

/// Typestate marker: one request, one response.
pub struct Unary;

/// Typestate marker: one request, a stream of responses.
pub struct ServerStreaming;

/// Typestate marker: a stream of requests, one response.
pub struct ClientStreaming;

/// Typestate marker: independent request and response streams.
pub struct Bidirectional;

macro_rules! impl_shape_kind {
    ($($marker:ident),*) => {
        $(
            impl sealed::Sealed for $marker {}
            impl ShapeKind for $marker {
                const SHAPE: Shape = Shape::$marker;
            }
        )*
    };
}

impl_shape_kind!(Unary, ServerStreaming, ClientStreaming, Bidirectional);

/// A named remote operation with a fixed shape, request type and response type.
///
/// Declared once, usually as a `const`, and shared by the caller side and the
/// responder's registration:
///
/// ```
/// use ferry_types::{Method, Unary};
///
/// pub const ECHO: Method<Unary, String, String> = Method::new("demo.Echo/Echo");
/// assert_eq!(ECHO.name(), "demo.Echo/Echo");
/// ```
pub struct Method<S, Req, Resp> {
    name: &'static str,
    _marker: PhantomData<fn() -> (S, Req, Resp)>,
}

impl<S: ShapeKind, Req, Resp> Method<S, Req, Resp> {
    pub const fn new(name: &'static str) -> Self {
        Self {
            name,
            _marker: PhantomData,
        }
    }

    pub const fn name(&self) -> &'static str {
        self.name
    }

    pub const fn shape(&self) -> Shape {
        S::SHAPE
    }
}

impl<S, Req, Resp> Clone for Method<S, Req, Resp> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<S, Req, Resp> Copy for Method<S, Req, Resp> {}

impl<S: ShapeKind, Req, Resp> fmt::Debug for Method<S, Req, Resp> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Method")
            .field("name", &self.name)
            .field("shape", &S::SHAPE)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const AVERAGE: Method<ClientStreaming, i32, f64> = Method::new("calc/Average");

    #[test]
    fn method_reports_its_marker_shape() {
        assert_eq!(AVERAGE.shape(), Shape::ClientStreaming);
        assert!(AVERAGE.shape().caller_streams());
        assert!(!AVERAGE.shape().responder_streams());
    }

    #[test]
    fn bidirectional_streams_both_ways() {
        assert!(Shape::Bidirectional.caller_streams());
        assert!(Shape::Bidirectional.responder_streams());
        assert!(!Shape::Unary.caller_streams());
        assert!(!Shape::Unary.responder_streams());
    }
}

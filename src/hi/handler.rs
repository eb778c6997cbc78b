use crate::error::Error;
use crate::hi::request::Request;
use crate::hi::response::Response;

use futures::future::{BoxFuture, Future, FutureExt};

use std::fmt;
use std::net::SocketAddr;

/// Error type handlers use to signal that they couldn't produce a response.
pub type HandlerError = Box<dyn std::error::Error + Send + Sync + 'static>;

pub type ResponseFuture = BoxFuture<'static, Result<Response, HandlerError>>;

/// What a handler hands back for a request: either the response itself, or a future that will
/// produce it later without holding up the rest of the connection.
pub enum Reply {
    Immediate(Response),
    Deferred(ResponseFuture),
}

impl Reply {
    pub fn deferred<F>(future: F) -> Reply
        where F: Future<Output = Result<Response, HandlerError>> + Send + 'static
    {
        Reply::Deferred(future.boxed())
    }
}

impl From<Response> for Reply {
    fn from(response: Response) -> Reply {
        Reply::Immediate(response)
    }
}

impl fmt::Debug for Reply {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Reply::Immediate(response) => f.debug_tuple("Immediate").field(response).finish(),
            Reply::Deferred(_) => f.write_str("Deferred(..)"),
        }
    }
}

/// Identifies one accepted connection in handler callbacks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionInfo {
    pub id: u64,
    pub peer_addr: Option<SocketAddr>,
}

pub trait FastcgiRequestHandler: Send + Sync + 'static {
    fn on_open(&self, _connection: &ConnectionInfo) {}

    fn on_request(&self, request: Request, connection: &ConnectionInfo)
        -> Result<Reply, HandlerError>;

    fn on_close(&self, _connection: &ConnectionInfo) {}

    /// Called for every error, fatal or not. `connection` is `None` for listener errors.
    fn on_error(&self, error: &Error, connection: Option<&ConnectionInfo>) {
        match connection {
            Some(connection) => error!("connection {}: {}", connection.id, error),
            None => error!("{}", error),
        }
    }
}

/// Adapts a closure into a handler; every other callback keeps its default.
pub struct FnHandler<F>(F);

pub fn handler_fn<F>(f: F) -> FnHandler<F>
    where F: Fn(Request) -> Result<Reply, HandlerError> + Send + Sync + 'static
{
    FnHandler(f)
}

impl<F> FastcgiRequestHandler for FnHandler<F>
    where F: Fn(Request) -> Result<Reply, HandlerError> + Send + Sync + 'static
{
    fn on_request(&self, request: Request, _connection: &ConnectionInfo)
        -> Result<Reply, HandlerError>
    {
        (self.0)(request)
    }
}

//! A FastCGI responder server on tokio.
//!
//! The web server connects, multiplexes requests over the connection by request id, and gets back
//! whatever the application's `FastcgiRequestHandler` produced, framed as STDOUT and END-REQUEST
//! records. See `Server` for the listener and `Connection` for the per-connection engine.

extern crate byteorder;
extern crate bytes;
#[macro_use] extern crate enum_primitive;
extern crate futures;
extern crate http;
#[macro_use] extern crate log;
extern crate thiserror;
extern crate tokio;
extern crate tokio_util;

pub mod config;
pub mod error;
pub mod hi;
pub mod lowlevel;
pub mod params;
pub mod s11n;

pub use config::Config;
pub use error::Error;
pub use hi::connection::{serve_connection, Connection};
pub use hi::handler::{handler_fn, ConnectionInfo, FastcgiRequestHandler, FnHandler, HandlerError, Reply};
pub use hi::request::Request;
pub use hi::response::Response;
pub use hi::server::{Listener, Server};
pub use lowlevel::{FastcgiFrame, FastcgiFrameCodec};
pub use s11n::{FASTCGI_VERSION, ProtocolStatus, RecordType, Role};

extern crate tokio_fcgi_responder;
use tokio_fcgi_responder::*;

extern crate env_logger;
extern crate tokio;

use std::sync::atomic::{AtomicUsize, Ordering};

struct HelloHandler {
    request_count: AtomicUsize,
}

impl HelloHandler {
    pub fn new() -> HelloHandler {
        HelloHandler {
            request_count: AtomicUsize::new(1),
        }
    }
}

impl FastcgiRequestHandler for HelloHandler {
    fn on_open(&self, connection: &ConnectionInfo) {
        println!("New connection: {:?}", connection);
    }

    fn on_request(&self, request: Request, _connection: &ConnectionInfo)
        -> Result<Reply, HandlerError>
    {
        let count = self.request_count.fetch_add(1, Ordering::SeqCst);
        let body = format!("Hello from {:?}: {}\n", request.uri().unwrap_or("?"), count);
        Ok(Response::new(body)
            .with_header("Content-Type", "text/plain")
            .into())
    }

    fn on_close(&self, connection: &ConnectionInfo) {
        println!("Connection {} closed", connection.id);
    }
}

#[tokio::main]
async fn main() {
    env_logger::init();

    let server = Server::new(HelloHandler::new());
    if let Err(e) = server.listen("127.0.0.1", 9000).await {
        eprintln!("failed to run the server: {}", e);
    }
}

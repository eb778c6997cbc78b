use crate::config::Config;
use crate::error::Error;
use crate::hi::connection::serve_connection;
use crate::hi::handler::{ConnectionInfo, FastcgiRequestHandler};

use tokio::net::TcpListener;
use tokio::sync::Semaphore;

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

const ACCEPT_BACKOFF: Duration = Duration::from_millis(50);

/// Accepts FastCGI connections from a web server and runs each one on its own task.
pub struct Server<H: FastcgiRequestHandler> {
    handler: Arc<H>,
    config: Arc<Config>,
}

impl<H: FastcgiRequestHandler> Server<H> {
    pub fn new(handler: H) -> Server<H> {
        Server::with_config(handler, Config::default())
    }

    pub fn with_config(handler: H, config: Config) -> Server<H> {
        Server {
            handler: Arc::new(handler),
            config: Arc::new(config),
        }
    }

    /// Binds the listening socket. A failure is reported to the handler as well as returned.
    pub async fn bind(self, host: &str, port: u16) -> Result<Listener<H>, Error> {
        match TcpListener::bind((host, port)).await {
            Ok(listener) => {
                info!("listening on {}:{}", host, port);
                Ok(Listener {
                    listener,
                    connections: Arc::new(Semaphore::new(self.config.max_connections.max(1))),
                    next_id: AtomicU64::new(1),
                    server: self,
                })
            }
            Err(source) => {
                let e = Error::Bind { addr: format!("{}:{}", host, port), source };
                self.handler.on_error(&e, None);
                Err(e)
            }
        }
    }

    /// Binds and serves forever.
    pub async fn listen(self, host: &str, port: u16) -> Result<(), Error> {
        self.bind(host, port).await?.run().await;
        Ok(())
    }
}

pub struct Listener<H: FastcgiRequestHandler> {
    server: Server<H>,
    listener: TcpListener,
    connections: Arc<Semaphore>,
    next_id: AtomicU64,
}

impl<H: FastcgiRequestHandler> Listener<H> {
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accepts connections until the task is dropped. A failed accept is reported and the loop
    /// carries on.
    pub async fn run(self) {
        loop {
            let permit = match self.connections.clone().acquire_owned().await {
                Ok(permit) => permit,
                // only happens if the semaphore is closed, which nothing does
                Err(_) => return,
            };

            let (socket, peer_addr) = match self.listener.accept().await {
                Ok(accepted) => accepted,
                Err(e) => {
                    self.server.handler.on_error(&Error::Accept(e), None);
                    // e.g. out of file descriptors; don't spin on it
                    tokio::time::sleep(ACCEPT_BACKOFF).await;
                    continue;
                }
            };

            let info = ConnectionInfo {
                id: self.next_id.fetch_add(1, Ordering::Relaxed),
                peer_addr: Some(peer_addr),
            };
            info!("new connection {} from {}", info.id, peer_addr);

            if let Err(e) = socket.set_nodelay(true) {
                debug!("connection {}: set_nodelay: {}", info.id, e);
            }

            let handler = self.server.handler.clone();
            let config = self.server.config.clone();
            tokio::spawn(async move {
                serve_connection(socket, handler, info, &config).await;
                drop(permit);
            });
        }
    }
}

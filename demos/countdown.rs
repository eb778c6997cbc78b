extern crate tokio_fcgi_responder;
use tokio_fcgi_responder::*;

extern crate env_logger;
extern crate tokio;

use std::time::Duration;

/// Answers each request after counting down, one second per step. The countdown runs as a
/// deferred reply, so other requests on the same connection keep being served meanwhile.
struct CountdownHandler(u32);

impl FastcgiRequestHandler for CountdownHandler {
    fn on_request(&self, request: Request, _connection: &ConnectionInfo)
        -> Result<Reply, HandlerError>
    {
        let start = request.query.get("from")
            .and_then(|n| n.parse().ok())
            .unwrap_or(self.0);

        Ok(Reply::deferred(async move {
            println!("beginning countdown from {}", start);
            let mut body = format!("Counted down from {}!\n", start);
            for i in (1..=start).rev() {
                println!("{}", i);
                body.push_str(&format!("{}\n", i));
                tokio::time::sleep(Duration::from_secs(1)).await;
            }
            println!("Done!");
            body.push_str("Done!\n");
            Ok(Response::new(body).with_header("Content-Type", "text/plain"))
        }))
    }
}

#[tokio::main]
async fn main() {
    env_logger::init();

    let mut config = Config::default();
    config.set_value(s11n::FCGI_MAX_REQS, 100);

    let server = Server::with_config(CountdownHandler(10), config);
    if let Err(e) = server.listen("127.0.0.1", 9000).await {
        eprintln!("failed to run the server: {}", e);
    }
}

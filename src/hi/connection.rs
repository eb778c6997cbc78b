//! One FastCGI connection: frame dispatch, request multiplexing, and the outgoing byte queue.
//!
//! `Connection` is a plain state machine. It never touches a socket; bytes are pushed in with
//! `receive` and pulled out with `pending_write`/`written`, and replies a handler defers are
//! handed out via `take_deferred` for the caller to drive. `serve_connection` is the async driver
//! that wires it to a tokio stream.

use crate::config::Config;
use crate::error::Error;
use crate::hi::handler::*;
use crate::hi::request::Request;
use crate::hi::response::{self, Response};
use crate::hi::table::RequestTable;
use crate::lowlevel::{FastcgiFrame, FastcgiFrameCodec};
use crate::params;
use crate::s11n::*;

use bytes::{Buf, BytesMut};
use futures::future::{BoxFuture, FutureExt};
use futures::stream::{FuturesUnordered, StreamExt};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio_util::codec::{Decoder, Encoder};

use std::collections::HashMap;
use std::io;
use std::sync::Arc;

/// A deferred reply on its way back, tagged with the request id and generation it answers.
pub type DeferredReply = BoxFuture<'static, (u16, u64, Result<Response, HandlerError>)>;

pub struct Connection<H: FastcgiRequestHandler> {
    info: ConnectionInfo,
    handler: Arc<H>,
    codec: FastcgiFrameCodec,
    values: HashMap<String, String>,
    read_buf: BytesMut,
    write_buf: BytesMut,
    requests: RequestTable,
    deferred: Vec<DeferredReply>,
    flushing: bool,
    close_after_flush: bool,
    closed: bool,
}

impl<H: FastcgiRequestHandler> Connection<H> {
    pub fn new(handler: Arc<H>, info: ConnectionInfo, config: &Config) -> Connection<H> {
        Connection {
            info,
            handler,
            codec: FastcgiFrameCodec,
            values: config.values().clone(),
            read_buf: BytesMut::with_capacity(config.read_buffer_size),
            write_buf: BytesMut::new(),
            requests: RequestTable::new(),
            deferred: vec![],
            flushing: false,
            close_after_flush: false,
            closed: false,
        }
    }

    pub fn info(&self) -> &ConnectionInfo {
        &self.info
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Number of requests begun and not yet answered or aborted.
    pub fn active_requests(&self) -> usize {
        self.requests.len()
    }

    /// Whether there are queued bytes for the socket (i.e. write interest is registered).
    pub fn wants_write(&self) -> bool {
        self.flushing && !self.closed
    }

    pub fn pending_write(&self) -> &[u8] {
        &self.write_buf
    }

    /// Deferred replies produced since the last call. The caller polls them and feeds each
    /// result back through `complete_deferred`.
    pub fn take_deferred(&mut self) -> Vec<DeferredReply> {
        std::mem::take(&mut self.deferred)
    }

    /// Buffers freshly read bytes and processes every complete frame in the buffer.
    pub fn receive(&mut self, data: &[u8]) {
        if self.closed {
            return;
        }
        self.read_buf.extend_from_slice(data);

        while !self.closed {
            let mut frame = match self.codec.decode(&mut self.read_buf) {
                Ok(Some(frame)) => frame,
                Ok(None) => break,
                Err(e) => {
                    self.close_with_error(e.into());
                    break;
                }
            };

            if frame.version != FASTCGI_VERSION {
                self.report(Error::ProtocolVersionMismatch(frame.version));
                continue;
            }

            if let Err(e) = self.dispatch(&mut frame) {
                self.close_with_error(e);
                break;
            }

            if !self.closed && !frame.content.is_empty() {
                self.close_with_error(Error::ContentNotConsumed {
                    record_type: frame.record_type,
                    remaining: frame.content.len(),
                });
            }
        }
    }

    /// The peer closed its end; nothing more will be read.
    pub fn peer_closed(&mut self) {
        debug!("connection {}: peer closed", self.info.id);
        self.close();
    }

    pub fn read_failed(&mut self, e: io::Error) {
        self.close_with_error(Error::Io(e));
    }

    pub fn write_failed(&mut self, e: io::Error) {
        self.close_with_error(Error::Io(e));
    }

    /// Accounts for `n` bytes of `pending_write` having reached the socket.
    pub fn written(&mut self, n: usize) {
        if self.closed {
            return;
        }
        if n == 0 {
            self.close_with_error(Error::BrokenPipe);
            return;
        }

        self.write_buf.advance(n);
        trace!("connection {}: wrote {} bytes, {} left", self.info.id, n, self.write_buf.len());

        if self.write_buf.is_empty() {
            self.flushing = false;
            if self.close_after_flush {
                debug!("connection {}: not keep-alive, closing", self.info.id);
                self.close();
            }
        }
    }

    /// Feeds back the outcome of a deferred reply. If the request has been aborted meanwhile this
    /// does nothing at all, even when a newer request has since reused the id.
    pub fn complete_deferred(&mut self, request_id: u16, generation: u64,
                             result: Result<Response, HandlerError>)
    {
        if self.closed || !self.requests.awaits_reply(request_id, generation) {
            warn!("connection {}: ignoring late reply for request #{}", self.info.id, request_id);
            return;
        }

        match result {
            Ok(response) => self.complete_request(request_id, APP_STATUS_OK, response),
            Err(e) => {
                self.report(Error::AsyncHandlerRejected(e));
                self.complete_request(request_id, APP_STATUS_ERROR,
                                      Response::internal_server_error());
            }
        }
    }

    /// Closes the connection and tells the handler, once.
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.flushing = false;
        self.handler.on_close(&self.info);
    }

    fn report(&self, e: Error) {
        self.handler.on_error(&e, Some(&self.info));
    }

    fn close_with_error(&mut self, e: Error) {
        self.report(e);
        self.close();
    }

    fn dispatch(&mut self, frame: &mut FastcgiFrame) -> Result<(), Error> {
        let request_id = frame.request_id;
        let record_type = match frame.record_type() {
            Some(record_type) => record_type,
            None => {
                return Err(Error::UnexpectedFrameType {
                    record_type: frame.record_type,
                    request_id,
                });
            }
        };

        match record_type {
            RecordType::BeginRequest => {
                if request_id == NULL_REQUEST_ID {
                    return Err(Error::UnexpectedFrameType {
                        record_type: frame.record_type,
                        request_id,
                    });
                }
                let body = BeginRequestBody::read(&frame.content).ok_or_else(|| {
                    Error::MalformedFrame(format!(
                        "BEGIN-REQUEST body is {} bytes", frame.content.len()))
                })?;
                frame.content.clear();
                self.requests.begin(request_id, &body)
            },
            RecordType::Params => {
                let chunk = frame.content.split();
                self.requests.append_params(request_id, &chunk)
            },
            RecordType::Stdin => {
                let chunk = frame.content.split();
                if let Some(request) = self.requests.append_stdin(request_id, &chunk)? {
                    self.invoke_handler(request);
                }
                Ok(())
            },
            RecordType::AbortRequest => {
                match self.requests.abort(request_id) {
                    Some(_) => Ok(()),
                    None => Err(Error::UnknownRequest { record_type, request_id }),
                }
            },
            RecordType::Data => {
                if !self.requests.contains(request_id) {
                    return Err(Error::UnknownRequest { record_type, request_id });
                }
                // This is only used by the "Filter" role.
                warn!("FCGI_DATA not supported; discarding {} bytes", frame.content.len());
                frame.content.clear();
                Ok(())
            },
            RecordType::GetValues => {
                if request_id != NULL_REQUEST_ID {
                    return Err(Error::UnexpectedFrameType {
                        record_type: frame.record_type,
                        request_id,
                    });
                }
                let query = frame.content.split();
                self.get_values(&query)
            },
            RecordType::UnknownType => {
                debug!("discarding UNKNOWN-TYPE record");
                frame.content.clear();
                Ok(())
            },
            RecordType::EndRequest | RecordType::Stdout | RecordType::Stderr
                    | RecordType::GetValuesResult => {
                error!("illegal record type {:?} from FastCGI client", record_type);
                Err(Error::UnexpectedFrameType { record_type: frame.record_type, request_id })
            },
        }
    }

    fn get_values(&mut self, query: &[u8]) -> Result<(), Error> {
        let requested = params::decode(query)?;
        let values = &self.values;
        let result: Vec<(&[u8], &[u8])> = requested.iter()
            .filter_map(|(name, _)| {
                values.get_key_value(&*String::from_utf8_lossy(name))
                    .map(|(k, v)| (k.as_bytes(), v.as_bytes()))
            })
            .collect();
        debug!("GET-VALUES: answering {} of {} variables", result.len(), requested.len());
        let content = params::encode(result)?;
        self.write_frame(FastcgiFrame::new(RecordType::GetValuesResult, NULL_REQUEST_ID, content));
        Ok(())
    }

    fn invoke_handler(&mut self, request: Request) {
        let request_id = request.request_id;
        let generation = match self.requests.get(request_id) {
            Some(state) => state.generation,
            None => return,
        };

        macro_rules! param {
            ($name:expr) => {
                request.param($name).unwrap_or(concat!("<no ", $name, " set!>"))
            }
        }
        info!("remote {:?} -> request #{} for {:?}",
              param!("REMOTE_ADDR"), request_id, param!("REQUEST_URI"));

        match self.handler.on_request(request, &self.info) {
            Ok(Reply::Immediate(response)) => {
                self.complete_request(request_id, APP_STATUS_OK, response);
            },
            Ok(Reply::Deferred(future)) => {
                debug!("request #{}: reply deferred", request_id);
                self.deferred.push(
                    future.map(move |result| (request_id, generation, result)).boxed());
            },
            Err(e) => {
                self.report(Error::BadResponse(e));
                self.complete_request(request_id, APP_STATUS_ERROR,
                                      Response::internal_server_error());
            },
        }
    }

    fn complete_request(&mut self, request_id: u16, app_status: u32, response: Response) {
        let frames = match response::serialize(request_id, app_status, &response) {
            Ok(frames) => frames,
            Err(e) => {
                self.close_with_error(e);
                return;
            }
        };

        let state = match self.requests.finish(request_id) {
            Some(state) => state,
            None => return,
        };

        for frame in frames {
            self.write_frame(frame);
        }

        if !state.keep_alive {
            self.close_after_flush = true;
        }
    }

    fn write_frame(&mut self, frame: FastcgiFrame) {
        if self.closed {
            return;
        }
        if let Err(e) = self.codec.encode(frame, &mut self.write_buf) {
            self.close_with_error(e.into());
            return;
        }
        self.flushing = true;
    }
}

/// Runs one connection over `io` until it closes: reads feed the engine, queued output is
/// written as the socket accepts it, and deferred replies are awaited alongside both.
pub async fn serve_connection<IO, H>(io: IO, handler: Arc<H>, info: ConnectionInfo,
                                     config: &Config)
    where IO: AsyncRead + AsyncWrite,
          H: FastcgiRequestHandler,
{
    let (mut reader, mut writer) = tokio::io::split(io);
    let mut read_buf = vec![0u8; config.read_buffer_size.max(1)];
    let mut pending: FuturesUnordered<DeferredReply> = FuturesUnordered::new();

    handler.on_open(&info);
    let mut conn = Connection::new(handler, info, config);

    while !conn.is_closed() {
        tokio::select! {
            res = reader.read(&mut read_buf) => match res {
                Ok(0) => conn.peer_closed(),
                Ok(n) => conn.receive(&read_buf[..n]),
                Err(e) => conn.read_failed(e),
            },
            res = writer.write(conn.pending_write()), if conn.wants_write() => match res {
                Ok(n) => conn.written(n),
                Err(e) => conn.write_failed(e),
            },
            Some((request_id, generation, result)) = pending.next(), if !pending.is_empty() => {
                conn.complete_deferred(request_id, generation, result);
            },
        }
        pending.extend(conn.take_deferred());
    }

    if let Err(e) = writer.shutdown().await {
        debug!("connection {}: shutdown: {}", conn.info().id, e);
    }
}

//! Per-connection bookkeeping for in-flight requests, keyed by request id.

use crate::error::Error;
use crate::hi::request::Request;
use crate::params;
use crate::s11n::*;

use bytes::BytesMut;
use enum_primitive::FromPrimitive;

use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// BEGIN-REQUEST seen, no PARAMS yet.
    Begun,
    CollectingParams,
    /// Empty PARAMS seen; the environment is decoded.
    CollectingStdin,
    /// Empty STDIN seen and the handler has the request. Waiting for the reply.
    Dispatched,
}

#[derive(Debug)]
pub struct RequestState {
    pub request_id: u16,
    /// Tells apart successive requests that reuse one id on a connection.
    pub generation: u64,
    pub role: Role,
    pub keep_alive: bool,
    pub phase: Phase,
    params_buf: BytesMut,
    stdin_buf: BytesMut,
    params: Option<params::NameValuePairs>,
}

impl RequestState {
    fn new(request_id: u16, generation: u64, role: Role, keep_alive: bool) -> RequestState {
        RequestState {
            request_id,
            generation,
            role,
            keep_alive,
            phase: Phase::Begun,
            params_buf: BytesMut::new(),
            stdin_buf: BytesMut::new(),
            params: None,
        }
    }
}

fn out_of_order(record_type: RecordType, request_id: u16) -> Error {
    Error::UnexpectedFrameType { record_type: record_type as u8, request_id }
}

#[derive(Debug, Default)]
pub struct RequestTable {
    requests: HashMap<u16, RequestState>,
    next_generation: u64,
}

impl RequestTable {
    pub fn new() -> RequestTable {
        RequestTable::default()
    }

    pub fn len(&self) -> usize {
        self.requests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.requests.is_empty()
    }

    pub fn contains(&self, request_id: u16) -> bool {
        self.requests.contains_key(&request_id)
    }

    pub fn get(&self, request_id: u16) -> Option<&RequestState> {
        self.requests.get(&request_id)
    }

    /// Whether `request_id` is still the dispatched request of that generation, i.e. a reply
    /// computed for it may be written.
    pub fn awaits_reply(&self, request_id: u16, generation: u64) -> bool {
        match self.requests.get(&request_id) {
            Some(state) => state.generation == generation && state.phase == Phase::Dispatched,
            None => false,
        }
    }

    fn get_mut(&mut self, record_type: RecordType, request_id: u16)
        -> Result<&mut RequestState, Error>
    {
        self.requests.get_mut(&request_id)
            .ok_or(Error::UnknownRequest { record_type, request_id })
    }

    pub fn begin(&mut self, request_id: u16, body: &BeginRequestBody) -> Result<(), Error> {
        if self.requests.contains_key(&request_id) {
            return Err(Error::DuplicateRequest(request_id));
        }

        let role = match Role::from_u16(body.role) {
            Some(Role::Responder) => Role::Responder,
            _ => return Err(Error::UnsupportedRole(body.role)),
        };

        let keep_alive = body.keep_connection();
        let generation = self.next_generation;
        self.next_generation += 1;
        debug!("request #{} begun, keep_alive={}", request_id, keep_alive);
        self.requests.insert(request_id,
                             RequestState::new(request_id, generation, role, keep_alive));
        Ok(())
    }

    /// Feeds one PARAMS record. An empty chunk ends the stream and decodes the environment.
    pub fn append_params(&mut self, request_id: u16, chunk: &[u8]) -> Result<(), Error> {
        let state = self.get_mut(RecordType::Params, request_id)?;
        match state.phase {
            Phase::Begun | Phase::CollectingParams => (),
            _ => return Err(out_of_order(RecordType::Params, request_id)),
        }

        if chunk.is_empty() {
            debug!("request #{}: done reading params ({} bytes)",
                   request_id, state.params_buf.len());
            let buf = state.params_buf.split();
            state.params = Some(params::decode(&buf)?);
            state.phase = Phase::CollectingStdin;
        } else {
            state.params_buf.extend_from_slice(chunk);
            state.phase = Phase::CollectingParams;
        }
        Ok(())
    }

    /// Feeds one STDIN record. An empty chunk ends the stream; the assembled request is returned
    /// and the state stays in the table, marked dispatched, until the reply is written.
    pub fn append_stdin(&mut self, request_id: u16, chunk: &[u8])
        -> Result<Option<Request>, Error>
    {
        let state = self.get_mut(RecordType::Stdin, request_id)?;
        if state.phase != Phase::CollectingStdin {
            return Err(out_of_order(RecordType::Stdin, request_id));
        }

        if !chunk.is_empty() {
            state.stdin_buf.extend_from_slice(chunk);
            return Ok(None);
        }

        debug!("request #{}: stdin is done ({} bytes)", request_id, state.stdin_buf.len());
        state.phase = Phase::Dispatched;
        let params = state.params.take().unwrap_or_default();
        let body = state.stdin_buf.split().freeze();
        Ok(Some(Request::from_parts(request_id, state.role, state.keep_alive, params, body)))
    }

    /// Drops the request, whatever phase it is in.
    pub fn abort(&mut self, request_id: u16) -> Option<RequestState> {
        let state = self.requests.remove(&request_id);
        if state.is_some() {
            debug!("request #{} aborted", request_id);
        }
        state
    }

    /// Removes a request whose reply has been serialized.
    pub fn finish(&mut self, request_id: u16) -> Option<RequestState> {
        self.requests.remove(&request_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn body(role: u16, flags: u8) -> BeginRequestBody {
        BeginRequestBody { role, flags }
    }

    fn begun(id: u16, flags: u8) -> RequestTable {
        let mut table = RequestTable::new();
        table.begin(id, &body(Role::Responder as u16, flags)).unwrap();
        table
    }

    #[test]
    fn full_assembly() {
        let mut table = begun(1, FLAG_KEEP_CONNECTION);
        let env = params::encode(vec![("REQUEST_METHOD", "POST"), ("QUERY_STRING", "q=1")])
            .unwrap();
        let (first, second) = env.split_at(5);

        table.append_params(1, first).unwrap();
        assert_eq!(table.get(1).unwrap().phase, Phase::CollectingParams);
        table.append_params(1, second).unwrap();
        table.append_params(1, &[]).unwrap();
        assert_eq!(table.get(1).unwrap().phase, Phase::CollectingStdin);

        assert!(table.append_stdin(1, b"hello ").unwrap().is_none());
        assert!(table.append_stdin(1, b"world").unwrap().is_none());
        let request = table.append_stdin(1, &[]).unwrap().unwrap();

        assert_eq!(request.request_id, 1);
        assert!(request.keep_alive);
        assert_eq!(request.method(), Some("POST"));
        assert_eq!(request.query["q"], "1");
        assert_eq!(&request.body[..], b"hello world");
        assert_eq!(table.get(1).unwrap().phase, Phase::Dispatched);

        let state = table.finish(1).unwrap();
        assert!(state.keep_alive);
        assert!(table.is_empty());
    }

    #[test]
    fn duplicate_begin_leaves_state_alone() {
        let mut table = begun(3, FLAG_KEEP_CONNECTION);
        table.append_params(3, b"\x01\x01ab").unwrap();

        match table.begin(3, &body(Role::Responder as u16, 0)) {
            Err(Error::DuplicateRequest(3)) => (),
            other => panic!("unexpected {:?}", other),
        }
        let state = table.get(3).unwrap();
        assert!(state.keep_alive);
        assert_eq!(state.phase, Phase::CollectingParams);
        assert_eq!(&state.params_buf[..], b"\x01\x01ab");
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn only_responders() {
        let mut table = RequestTable::new();
        for &role in &[Role::Authorizer as u16, Role::Filter as u16, 0, 77] {
            match table.begin(1, &body(role, 0)) {
                Err(Error::UnsupportedRole(r)) => assert_eq!(r, role),
                other => panic!("unexpected {:?}", other),
            }
        }
        assert!(table.is_empty());
    }

    #[test]
    fn keep_alive_is_per_request() {
        let mut table = begun(1, FLAG_KEEP_CONNECTION);
        table.begin(2, &body(Role::Responder as u16, 0)).unwrap();
        assert!(table.get(1).unwrap().keep_alive);
        assert!(!table.get(2).unwrap().keep_alive);
    }

    #[test]
    fn unknown_ids() {
        let mut table = begun(1, 0);
        match table.append_params(2, b"") {
            Err(Error::UnknownRequest { record_type: RecordType::Params, request_id: 2 }) => (),
            other => panic!("unexpected {:?}", other),
        }
        match table.append_stdin(2, b"x") {
            Err(Error::UnknownRequest { record_type: RecordType::Stdin, request_id: 2 }) => (),
            other => panic!("unexpected {:?}", other),
        }
        assert!(table.abort(2).is_none());
    }

    #[test]
    fn streams_out_of_order() {
        let mut table = begun(1, 0);
        match table.append_stdin(1, b"early") {
            Err(Error::UnexpectedFrameType { .. }) => (),
            other => panic!("unexpected {:?}", other),
        }

        table.append_params(1, &[]).unwrap();
        assert!(table.append_params(1, b"\x01\x01ab").is_err());

        table.append_stdin(1, &[]).unwrap().unwrap();
        assert!(table.append_stdin(1, &[]).is_err());
    }

    #[test]
    fn malformed_params() {
        let mut table = begun(1, 0);
        table.append_params(1, &[5, 5, b'a']).unwrap();
        match table.append_params(1, &[]) {
            Err(Error::MalformedFrame(_)) => (),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn abort_from_any_phase() {
        let mut table = begun(1, 0);
        assert_eq!(table.abort(1).unwrap().phase, Phase::Begun);

        table.begin(1, &body(Role::Responder as u16, 0)).unwrap();
        table.append_params(1, &[]).unwrap();
        table.append_stdin(1, &[]).unwrap();
        assert_eq!(table.abort(1).unwrap().phase, Phase::Dispatched);
        assert!(table.finish(1).is_none());
    }

    #[test]
    fn reused_id_gets_a_new_generation() {
        let mut table = begun(7, 0);
        table.append_params(7, &[]).unwrap();
        table.append_stdin(7, &[]).unwrap().unwrap();
        let first = table.get(7).unwrap().generation;
        assert!(table.awaits_reply(7, first));

        table.abort(7).unwrap();
        assert!(!table.awaits_reply(7, first));

        table.begin(7, &body(Role::Responder as u16, 0)).unwrap();
        let second = table.get(7).unwrap().generation;
        assert_ne!(first, second);
        assert!(!table.awaits_reply(7, first));
        // not dispatched yet
        assert!(!table.awaits_reply(7, second));

        table.append_params(7, &[]).unwrap();
        table.append_stdin(7, &[]).unwrap().unwrap();
        assert!(table.awaits_reply(7, second));
        assert!(!table.awaits_reply(7, first));
    }
}

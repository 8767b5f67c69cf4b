//! In-process memcached fixture speaking the binary protocol.
//!
//! Implements just enough server behavior for the integration suites:
//! storage with CAS assignment, quiet-variant suppression, arithmetic,
//! VERSION/NOOP/STAT, and a `kill` switch that drops the listener and
//! every open connection so client-side failure paths can be exercised.

use std::collections::HashMap;
use std::io::{Read, Write};
use std::net::{Shutdown, SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use bytes::BytesMut;
use memkit::protocol::{Opcode, Request, Response, ResponseStatus, EXPIRATION_NO_CREATE};

struct Item {
    value: Vec<u8>,
    flags: u32,
    cas: u64,
}

struct ServerState {
    items: Mutex<HashMap<Vec<u8>, Item>>,
    cas_counter: AtomicU64,
    stopped: AtomicBool,
    conns: Mutex<Vec<TcpStream>>,
}

impl ServerState {
    fn next_cas(&self) -> u64 {
        self.cas_counter.fetch_add(1, Ordering::SeqCst)
    }
}

pub struct FakeServer {
    addr: SocketAddr,
    state: Arc<ServerState>,
}

impl FakeServer {
    pub fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let state = Arc::new(ServerState {
            items: Mutex::new(HashMap::new()),
            cas_counter: AtomicU64::new(1),
            stopped: AtomicBool::new(false),
            conns: Mutex::new(Vec::new()),
        });
        {
            let state = Arc::clone(&state);
            std::thread::spawn(move || {
                for incoming in listener.incoming() {
                    let stream = match incoming {
                        Ok(stream) => stream,
                        Err(_) => break,
                    };
                    if state.stopped.load(Ordering::SeqCst) {
                        break;
                    }
                    state.conns.lock().unwrap().push(stream.try_clone().unwrap());
                    let state = Arc::clone(&state);
                    std::thread::spawn(move || serve_connection(stream, state));
                }
            });
        }
        Self { addr, state }
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Stops accepting and severs every open connection.
    pub fn kill(&self) {
        self.state.stopped.store(true, Ordering::SeqCst);
        // Unblock the accept loop.
        let _ = TcpStream::connect(self.addr);
        for conn in self.state.conns.lock().unwrap().drain(..) {
            let _ = conn.shutdown(Shutdown::Both);
        }
    }

    pub fn item_count(&self) -> usize {
        self.state.items.lock().unwrap().len()
    }

    pub fn contains(&self, key: &[u8]) -> bool {
        self.state.items.lock().unwrap().contains_key(key)
    }
}

impl Drop for FakeServer {
    fn drop(&mut self) {
        self.kill();
    }
}

fn serve_connection(mut stream: TcpStream, state: Arc<ServerState>) {
    let mut buf = BytesMut::new();
    let mut chunk = [0u8; 4096];
    loop {
        if state.stopped.load(Ordering::SeqCst) {
            return;
        }
        while let Ok(Some(request)) = Request::decode(&mut buf) {
            let quit = request.opcode == Opcode::Quit || request.opcode == Opcode::QuitQ;
            let responses = process(&state, request);
            let mut out = BytesMut::new();
            for response in &responses {
                response.encode(&mut out);
            }
            if !out.is_empty() && stream.write_all(&out).is_err() {
                return;
            }
            if quit {
                let _ = stream.shutdown(Shutdown::Both);
                return;
            }
        }
        match stream.read(&mut chunk) {
            Ok(0) | Err(_) => return,
            Ok(n) => buf.extend_from_slice(&chunk[..n]),
        }
    }
}

fn reply(request: &Request, status: ResponseStatus) -> Response {
    Response::new(request.opcode, status, request.opaque)
}

/// Failure responses are always sent; success responses are suppressed for
/// quiet opcodes (except GETQ/GETKQ hits, which are how quiet multi-get
/// conveys data).
fn process(state: &ServerState, request: Request) -> Vec<Response> {
    let quiet = request.opcode.is_quiet();
    let mut responses = Vec::new();
    match request.opcode {
        Opcode::Get | Opcode::GetQ | Opcode::GetK | Opcode::GetKQ | Opcode::Gat | Opcode::GatQ => {
            let items = state.items.lock().unwrap();
            match items.get(&request.key) {
                Some(item) => {
                    let mut response = reply(&request, ResponseStatus::NoError);
                    response.cas = item.cas;
                    response.extras = item.flags.to_be_bytes().to_vec();
                    response.value = item.value.clone();
                    if matches!(request.opcode, Opcode::GetK | Opcode::GetKQ) {
                        response.key = request.key.clone();
                    }
                    responses.push(response);
                },
                None => {
                    if !quiet {
                        responses.push(reply(&request, ResponseStatus::KeyNotFound));
                    }
                },
            }
        },
        Opcode::Set | Opcode::SetQ | Opcode::Add | Opcode::AddQ | Opcode::Replace
        | Opcode::ReplaceQ => {
            let (flags, _expiration) = request.storage_extras().unwrap_or((0, 0));
            let mut items = state.items.lock().unwrap();
            let existing = items.get(&request.key);
            let status = match request.opcode {
                Opcode::Add | Opcode::AddQ if existing.is_some() => ResponseStatus::KeyExists,
                Opcode::Replace | Opcode::ReplaceQ if existing.is_none() => {
                    ResponseStatus::KeyNotFound
                },
                _ if request.cas != 0 && existing.is_none() => ResponseStatus::KeyNotFound,
                _ if request.cas != 0 && existing.map(|item| item.cas) != Some(request.cas) => {
                    ResponseStatus::KeyExists
                },
                _ => ResponseStatus::NoError,
            };
            if status == ResponseStatus::NoError {
                let cas = state.next_cas();
                items.insert(
                    request.key.clone(),
                    Item {
                        value: request.value.clone(),
                        flags,
                        cas,
                    },
                );
                if !quiet {
                    let mut response = reply(&request, status);
                    response.cas = cas;
                    responses.push(response);
                }
            } else {
                responses.push(reply(&request, status));
            }
        },
        Opcode::Append | Opcode::AppendQ | Opcode::Prepend | Opcode::PrependQ => {
            let mut items = state.items.lock().unwrap();
            match items.get_mut(&request.key) {
                Some(item) => {
                    if matches!(request.opcode, Opcode::Append | Opcode::AppendQ) {
                        item.value.extend_from_slice(&request.value);
                    } else {
                        let mut joined = request.value.clone();
                        joined.extend_from_slice(&item.value);
                        item.value = joined;
                    }
                    item.cas = state.next_cas();
                    if !quiet {
                        let mut response = reply(&request, ResponseStatus::NoError);
                        response.cas = item.cas;
                        responses.push(response);
                    }
                },
                None => responses.push(reply(&request, ResponseStatus::ItemNotStored)),
            }
        },
        Opcode::Delete | Opcode::DeleteQ => {
            let removed = state.items.lock().unwrap().remove(&request.key).is_some();
            if removed {
                if !quiet {
                    responses.push(reply(&request, ResponseStatus::NoError));
                }
            } else {
                responses.push(reply(&request, ResponseStatus::KeyNotFound));
            }
        },
        Opcode::Increment | Opcode::IncrementQ | Opcode::Decrement | Opcode::DecrementQ => {
            let (delta, initial, expiration) = request.arithmetic_extras().unwrap_or((1, 0, 0));
            let increment = matches!(request.opcode, Opcode::Increment | Opcode::IncrementQ);
            let mut items = state.items.lock().unwrap();
            let result = match items.get_mut(&request.key) {
                Some(item) => {
                    let current: u64 = String::from_utf8_lossy(&item.value).parse().unwrap_or(0);
                    let next = if increment {
                        current.wrapping_add(delta)
                    } else {
                        current.saturating_sub(delta)
                    };
                    item.value = next.to_string().into_bytes();
                    item.cas = state.next_cas();
                    Some((next, item.cas))
                },
                None if expiration == EXPIRATION_NO_CREATE => None,
                None => {
                    let cas = state.next_cas();
                    items.insert(
                        request.key.clone(),
                        Item {
                            value: initial.to_string().into_bytes(),
                            flags: 0,
                            cas,
                        },
                    );
                    Some((initial, cas))
                },
            };
            match result {
                Some((counter, cas)) => {
                    if !quiet {
                        let mut response = reply(&request, ResponseStatus::NoError);
                        response.cas = cas;
                        response.value = counter.to_be_bytes().to_vec();
                        responses.push(response);
                    }
                },
                None => responses.push(reply(&request, ResponseStatus::KeyNotFound)),
            }
        },
        Opcode::Touch => {
            let status = if state.items.lock().unwrap().contains_key(&request.key) {
                ResponseStatus::NoError
            } else {
                ResponseStatus::KeyNotFound
            };
            responses.push(reply(&request, status));
        },
        Opcode::Version => {
            let mut response = reply(&request, ResponseStatus::NoError);
            response.value = b"1.6.fake".to_vec();
            responses.push(response);
        },
        Opcode::Noop => responses.push(reply(&request, ResponseStatus::NoError)),
        Opcode::Flush | Opcode::FlushQ => {
            state.items.lock().unwrap().clear();
            if !quiet {
                responses.push(reply(&request, ResponseStatus::NoError));
            }
        },
        Opcode::Stat => {
            let entries: Vec<(String, String)> = if request.key.is_empty() {
                vec![
                    ("pid".to_string(), "1".to_string()),
                    ("version".to_string(), "1.6.fake".to_string()),
                ]
            } else {
                vec![(
                    format!("{}:count", String::from_utf8_lossy(&request.key)),
                    state.items.lock().unwrap().len().to_string(),
                )]
            };
            for (key, value) in entries {
                let mut response = reply(&request, ResponseStatus::NoError);
                response.key = key.into_bytes();
                response.value = value.into_bytes();
                responses.push(response);
            }
            // Terminator: empty key and value.
            responses.push(reply(&request, ResponseStatus::NoError));
        },
        Opcode::Verbosity => responses.push(reply(&request, ResponseStatus::NoError)),
        Opcode::Quit => responses.push(reply(&request, ResponseStatus::NoError)),
        Opcode::QuitQ => {},
        _ => responses.push(reply(&request, ResponseStatus::UnknownCommand)),
    }
    responses
}

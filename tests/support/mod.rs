#![allow(dead_code)]

//! Shared helpers for the request-plane integration suites: a cluster
//! fixture wired to in-memory collaborators and a bare-bones HTTP/1.1
//! client good enough for one-request-per-connection exchanges.

use drover::master::{AgentTransport, Master, MasterConfig, MasterHandle};
use drover::net::{HttpServer, HttpServerConfig, HttpServerHandle, MasterContext};
use drover::testing::{
    InMemoryFiles, InMemoryRegistrar, NullAgentTransport, PermissiveAuthorizer, RecordingAllocator,
};
use drover::wire::{AgentId, AgentInfo, FrameworkId, MasterInfo, Offer, OfferId};
use drover::{Authorizer, MachineId, Resource, Resources};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

pub struct TestCluster {
    pub master: MasterHandle,
    pub server: HttpServerHandle,
    pub registrar: Arc<InMemoryRegistrar>,
    pub allocator: Arc<RecordingAllocator>,
    pub files: Arc<InMemoryFiles>,
}

impl TestCluster {
    pub fn addr(&self) -> std::net::SocketAddr {
        self.server.local_addr()
    }
}

pub fn master_info(id: &str) -> MasterInfo {
    MasterInfo {
        id: id.to_string(),
        hostname: "127.0.0.1".to_string(),
        port: 5050,
    }
}

/// Starts an elected, recovered master with permissive collaborators.
pub async fn start_leader() -> TestCluster {
    start_cluster(Arc::new(PermissiveAuthorizer), Arc::new(NullAgentTransport), true).await
}

pub async fn start_cluster(
    authorizer: Arc<dyn Authorizer>,
    transport: Arc<dyn AgentTransport>,
    leading: bool,
) -> TestCluster {
    let _ = env_logger::builder().is_test(true).try_init();

    let registrar = Arc::new(InMemoryRegistrar::default());
    let allocator = Arc::new(RecordingAllocator::default());
    let files = Arc::new(InMemoryFiles::default());

    let info = master_info("master-test");
    let master = Master::new(MasterConfig::new(info.clone()), allocator.clone(), transport.clone());
    let handle = MasterHandle::spawn(master);
    if leading {
        handle
            .call(move |m| {
                m.set_leader(Some(info));
                m.complete_recovery();
            })
            .await
            .expect("actor alive");
    }

    let context = MasterContext {
        master: handle.clone(),
        authorizer,
        registrar: registrar.clone(),
        allocator: allocator.clone(),
        transport,
        files: files.clone(),
        authenticator: Arc::new(drover::net::NullAuthenticator),
    };
    let server = HttpServer::spawn(
        HttpServerConfig::new("127.0.0.1:0".parse().expect("loopback addr")),
        context,
    )
    .await
    .expect("server spawn");

    TestCluster {
        master: handle,
        server,
        registrar,
        allocator,
        files,
    }
}

pub async fn admit_agent(cluster: &TestCluster, agent_id: &str, machine: Option<&str>) {
    admit_agent_with_resources(
        cluster,
        agent_id,
        machine,
        vec![Resource::scalar("cpus", 8.0), Resource::scalar("mem", 16384.0)],
    )
    .await;
}

pub async fn admit_agent_with_resources(
    cluster: &TestCluster,
    agent_id: &str,
    machine: Option<&str>,
    resources: Vec<Resource>,
) {
    let checkpointed: Resources = resources
        .iter()
        .filter(|r| !r.reservations.is_empty() || r.disk.is_some())
        .cloned()
        .collect();
    let info = AgentInfo {
        id: AgentId::from(agent_id),
        hostname: format!("{agent_id}.example.com"),
        machine: machine.map(MachineId::hostname),
        resources: resources.into(),
        capabilities: vec![],
    };
    cluster
        .master
        .call(move |m| m.admit_agent(info, vec![], checkpointed))
        .await
        .expect("actor alive");
}

pub async fn add_offer(
    cluster: &TestCluster,
    offer_id: &str,
    framework_id: &str,
    agent_id: &str,
    resources: Vec<Resource>,
) {
    let offer = Offer {
        id: OfferId::from(offer_id),
        framework_id: FrameworkId::from(framework_id),
        agent_id: AgentId::from(agent_id),
        hostname: format!("{agent_id}.example.com"),
        resources: resources.into(),
        unavailability: None,
    };
    cluster
        .master
        .call(move |m| m.add_offer(offer))
        .await
        .expect("actor alive");
}

pub struct HttpResult {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl HttpResult {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    pub fn json(&self) -> serde_json::Value {
        serde_json::from_slice(&self.body).expect("JSON body")
    }
}

/// One complete request/response exchange; the server closes the
/// connection after the body.
pub async fn http_request(
    addr: std::net::SocketAddr,
    method: &str,
    path: &str,
    headers: &[(&str, &str)],
    body: &[u8],
) -> HttpResult {
    let mut stream = TcpStream::connect(addr).await.expect("connect");
    write_request(&mut stream, method, path, headers, body).await;

    let mut raw = Vec::new();
    stream.read_to_end(&mut raw).await.expect("read response");
    let (result, _remaining) = parse_response(&raw);
    result
}

pub async fn post_json(
    addr: std::net::SocketAddr,
    path: &str,
    value: &serde_json::Value,
) -> HttpResult {
    let body = serde_json::to_vec(value).expect("encode body");
    http_request(
        addr,
        "POST",
        path,
        &[
            ("Content-Type", "application/json"),
            ("Accept", "application/json"),
        ],
        &body,
    )
    .await
}

/// A held-open streaming exchange: the response head plus a reader for
/// the framed records that follow.
pub struct StreamingClient {
    stream: TcpStream,
    buffer: Vec<u8>,
}

impl StreamingClient {
    /// Next record on the stream, decoded as JSON. Panics if no
    /// complete record arrives within a few seconds.
    pub async fn next_record(&mut self) -> serde_json::Value {
        let deadline = Duration::from_secs(5);
        tokio::time::timeout(deadline, async {
            loop {
                if let Some(record) = split_record(&mut self.buffer) {
                    return serde_json::from_slice(&record).expect("JSON record");
                }
                let mut chunk = [0u8; 4096];
                let read = self.stream.read(&mut chunk).await.expect("stream read");
                assert!(read > 0, "stream closed mid-record");
                self.buffer.extend_from_slice(&chunk[..read]);
            }
        })
        .await
        .expect("timed out waiting for a record")
    }

    /// Asserts the server closed this stream (after draining whatever
    /// was already buffered).
    pub async fn expect_closed(mut self) {
        let deadline = Duration::from_secs(5);
        tokio::time::timeout(deadline, async {
            loop {
                let mut chunk = [0u8; 4096];
                if self.stream.read(&mut chunk).await.expect("stream read") == 0 {
                    return;
                }
            }
        })
        .await
        .expect("timed out waiting for stream close");
    }
}

/// Sends a request and parses only the response head, leaving the
/// connection open for the streamed body.
pub async fn open_stream(
    addr: std::net::SocketAddr,
    method: &str,
    path: &str,
    headers: &[(&str, &str)],
    body: &[u8],
) -> (HttpResult, StreamingClient) {
    let mut stream = TcpStream::connect(addr).await.expect("connect");
    write_request(&mut stream, method, path, headers, body).await;

    let mut raw = Vec::new();
    loop {
        if raw.windows(4).any(|window| window == b"\r\n\r\n") {
            break;
        }
        let mut chunk = [0u8; 4096];
        let read = stream.read(&mut chunk).await.expect("read head");
        assert!(read > 0, "connection closed before response head");
        raw.extend_from_slice(&chunk[..read]);
    }
    let (result, remaining) = parse_response(&raw);
    (
        result,
        StreamingClient {
            stream,
            buffer: remaining,
        },
    )
}

async fn write_request(
    stream: &mut TcpStream,
    method: &str,
    path: &str,
    headers: &[(&str, &str)],
    body: &[u8],
) {
    let mut request = format!("{method} {path} HTTP/1.1\r\nHost: localhost\r\n");
    request.push_str(&format!("Content-Length: {}\r\n", body.len()));
    for (name, value) in headers {
        request.push_str(&format!("{name}: {value}\r\n"));
    }
    request.push_str("\r\n");
    stream
        .write_all(request.as_bytes())
        .await
        .expect("write request head");
    stream.write_all(body).await.expect("write request body");
}

fn parse_response(raw: &[u8]) -> (HttpResult, Vec<u8>) {
    let mut headers = [httparse::EMPTY_HEADER; 64];
    let mut response = httparse::Response::new(&mut headers);
    let parsed = response.parse(raw).expect("parse response");
    let header_len = match parsed {
        httparse::Status::Complete(len) => len,
        httparse::Status::Partial => panic!("incomplete response head"),
    };
    let status = response.code.expect("status code");
    let header_pairs: Vec<(String, String)> = response
        .headers
        .iter()
        .map(|header| {
            (
                header.name.to_string(),
                String::from_utf8_lossy(header.value).into_owned(),
            )
        })
        .collect();
    let body = raw[header_len..].to_vec();
    (
        HttpResult {
            status,
            headers: header_pairs,
            body,
        },
        raw[header_len..].to_vec(),
    )
}

/// Splits one `length\npayload` frame off the front of `buffer`.
fn split_record(buffer: &mut Vec<u8>) -> Option<Vec<u8>> {
    let newline = buffer.iter().position(|&b| b == b'\n')?;
    let length: usize = std::str::from_utf8(&buffer[..newline])
        .expect("ascii length prefix")
        .parse()
        .expect("numeric length prefix");
    if buffer.len() < newline + 1 + length {
        return None;
    }
    let record = buffer[newline + 1..newline + 1 + length].to_vec();
    buffer.drain(..newline + 1 + length);
    Some(record)
}

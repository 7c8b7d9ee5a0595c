//! Shared helpers for the integration tests

#![allow(dead_code)] // Each test binary uses a different subset

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tunnel_dns::{
    DNSPacket, DnsServer, ReplyAssembler, ZoneResolver,
    config::ZoneConfig,
    dns::{enums::DNSResourceType, question::DNSQuestion},
    error::ServerError,
    store::MemoryStore,
};

pub const ZONE: &str = "example.com.";
pub const HOSTNAME: &str = "ns1.example.com.";
pub const EMAIL: &str = "hostmaster@example.com";

pub fn test_zone() -> ZoneConfig {
    ZoneConfig::new(ZONE, HOSTNAME, EMAIL)
}

/// Store seeded with the records the end-to-end scenario uses
pub fn seeded_store() -> Arc<MemoryStore> {
    let store = Arc::new(MemoryStore::new());
    store.insert_a("www.example.com.", "203.0.113.5");
    store.insert_cname("docs.example.com.", "target.example.");
    store
}

pub fn resolver_with(store: Arc<MemoryStore>) -> ZoneResolver {
    ZoneResolver::new(Arc::new(test_zone()), store)
}

pub fn assembler_with(store: Arc<MemoryStore>) -> ReplyAssembler {
    ReplyAssembler::new(resolver_with(store))
}

/// Create a basic test DNS query packet
pub fn create_test_query(name: &str, qtype: DNSResourceType) -> DNSPacket {
    create_test_query_with_id(1234, name, qtype)
}

pub fn create_test_query_with_id(id: u16, name: &str, qtype: DNSResourceType) -> DNSPacket {
    DNSPacket::query(id, name, qtype)
}

/// A query carrying several questions
pub fn create_multi_query(id: u16, questions: &[(&str, DNSResourceType)]) -> DNSPacket {
    let mut packet = DNSPacket::query(id, questions[0].0, questions[0].1);
    for (name, qtype) in &questions[1..] {
        packet.questions.push(DNSQuestion::new(*name, *qtype));
    }
    packet.header.qdcount = packet.questions.len() as u16;
    packet
}

pub struct TestServer {
    pub addr: SocketAddr,
    pub shutdown_tx: tokio::sync::broadcast::Sender<()>,
    pub handle: JoinHandle<Result<(), ServerError>>,
}

/// Starts a server on an ephemeral localhost port
pub async fn start_test_server(store: Arc<MemoryStore>) -> TestServer {
    let assembler = Arc::new(assembler_with(store));
    let server = DnsServer::bind("127.0.0.1:0".parse().unwrap(), assembler)
        .await
        .expect("bind test server")
        .with_tcp_idle_timeout(Duration::from_secs(2));

    let addr = server.local_addr();
    let shutdown_tx = server.shutdown_handle();
    let handle = tokio::spawn(server.run());

    TestServer {
        addr,
        shutdown_tx,
        handle,
    }
}

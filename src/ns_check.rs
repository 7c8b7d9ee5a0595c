//! Startup diagnostic: does the public DNS delegate the zone to us?
//!
//! The result is only logged. It never delays or prevents the listeners
//! from starting.

use crate::config::ZoneConfig;
use crate::dns::{
    DNSPacket,
    enums::{DNSResourceType, ResponseCode},
    resource::DNSResourceData,
};
use crate::error::NsLookupError;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::time::timeout;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NsCheckOutcome {
    /// One of the zone's NS records names this server
    Delegated,
    /// NS records exist but none of them is this server
    Mismatch { found: Vec<String> },
    NoRecords,
    LookupFailed(String),
}

/// Looks up the zone's NS records through `resolver` and logs whether they
/// point at `zone.hostname`.
pub async fn check_delegation(
    zone: &ZoneConfig,
    resolver: SocketAddr,
    wait: Duration,
) -> NsCheckOutcome {
    let outcome = match lookup_ns(&zone.domain, resolver, wait).await {
        Ok(records) => evaluate(&zone.hostname, records),
        Err(e) => NsCheckOutcome::LookupFailed(e.to_string()),
    };

    match &outcome {
        NsCheckOutcome::Delegated => {
            info!(domain = %zone.domain, hostname = %zone.hostname, "NS records point at this server");
        }
        NsCheckOutcome::Mismatch { found } => {
            warn!(domain = %zone.domain, records = ?found, "Invalid NS records for the domain");
        }
        NsCheckOutcome::NoRecords => {
            warn!(domain = %zone.domain, "No NS records found for domain");
        }
        NsCheckOutcome::LookupFailed(error) => {
            warn!(domain = %zone.domain, error = %error, "Unable to look up the NS of domain");
        }
    }

    outcome
}

/// Compares NS targets to `hostname`, ignoring case and the trailing dot.
pub fn evaluate(hostname: &str, records: Vec<String>) -> NsCheckOutcome {
    if records.is_empty() {
        return NsCheckOutcome::NoRecords;
    }

    let wanted = normalize(hostname);
    if records.iter().any(|record| normalize(record) == wanted) {
        NsCheckOutcome::Delegated
    } else {
        NsCheckOutcome::Mismatch { found: records }
    }
}

/// Sends one NS query over UDP and returns the NS targets in the answer.
/// NXDOMAIN counts as no records.
pub async fn lookup_ns(
    domain: &str,
    resolver: SocketAddr,
    wait: Duration,
) -> Result<Vec<String>, NsLookupError> {
    let id: u16 = rand::random();
    let query = DNSPacket::query(id, domain, DNSResourceType::NS).serialize()?;

    let local: SocketAddr = if resolver.is_ipv4() {
        SocketAddr::from(([0, 0, 0, 0], 0))
    } else {
        SocketAddr::from(([0u16; 8], 0))
    };
    let socket = UdpSocket::bind(local).await?;
    socket.connect(resolver).await?;
    socket.send(&query).await?;

    let mut response_buf = vec![0u8; 4096];
    let response_len = timeout(wait, socket.recv(&mut response_buf))
        .await
        .map_err(|_| NsLookupError::Timeout)??;

    let response = DNSPacket::parse(&response_buf[..response_len])?;
    if response.header.id != id {
        return Err(NsLookupError::IdMismatch {
            expected: id,
            got: response.header.id,
        });
    }
    debug!(
        "NS lookup for {} via {}: rcode={} answers={}",
        domain,
        resolver,
        response.header.rcode,
        response.answers.len()
    );

    match response.header.rcode {
        rcode if rcode == ResponseCode::NoError.to_u8() => {}
        rcode if rcode == ResponseCode::NameError.to_u8() => return Ok(Vec::new()),
        rcode => return Err(NsLookupError::Rcode(rcode)),
    }

    Ok(response
        .answers
        .into_iter()
        .filter_map(|record| match record.rdata {
            DNSResourceData::NS(target) => Some(target),
            _ => None,
        })
        .collect())
}

fn normalize(name: &str) -> String {
    name.trim_end_matches('.').to_ascii_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_evaluate() {
        assert_eq!(evaluate("ns1.example.com.", vec![]), NsCheckOutcome::NoRecords);
        assert_eq!(
            evaluate(
                "ns1.example.com.",
                vec!["ns0.example.com.".to_string(), "NS1.Example.com".to_string()]
            ),
            NsCheckOutcome::Delegated
        );
        assert_eq!(
            evaluate("ns1.example.com.", vec!["ns.other.net.".to_string()]),
            NsCheckOutcome::Mismatch {
                found: vec!["ns.other.net.".to_string()]
            }
        );
    }

    #[tokio::test]
    async fn test_lookup_times_out_without_answer() {
        // Bound but never answers
        let silent = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let addr = silent.local_addr().unwrap();

        let result = lookup_ns("example.com.", addr, Duration::from_millis(100)).await;
        assert!(matches!(result, Err(NsLookupError::Timeout)));
    }

    #[tokio::test]
    async fn test_failed_lookup_is_reported() {
        let silent = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let zone = ZoneConfig::new("example.com.", "ns1.example.com.", "a@example.com");

        let outcome = check_delegation(
            &zone,
            silent.local_addr().unwrap(),
            Duration::from_millis(50),
        )
        .await;
        assert!(matches!(outcome, NsCheckOutcome::LookupFailed(_)));
    }
}

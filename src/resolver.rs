//! Answer resolution for the single zone this server owns.
//!
//! NS and SOA come from the zone configuration and are only answered at the
//! zone apex. A and CNAME come from the record store for any name. Every
//! other type, and every miss or store failure, resolves to nothing.

use crate::config::ZoneConfig;
use crate::dns::{
    common::{encode_name, to_fqdn},
    enums::DNSResourceType,
    resource::{DNSResource, SoaData},
};
use crate::store::{Lookup, RecordStore};
use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;
use tracing::{debug, trace, warn};

pub const NS_TTL: u32 = 300;
pub const SOA_TTL: u32 = 60;
/// TTL for A and CNAME answers
pub const RECORD_TTL: u32 = 300;

pub const SOA_REFRESH: u32 = 86400;
pub const SOA_RETRY: u32 = 7200;
pub const SOA_EXPIRE: u32 = 86400;
pub const SOA_MINIMUM: u32 = 60;

#[derive(Clone)]
pub struct ZoneResolver {
    zone: Arc<ZoneConfig>,
    store: Arc<dyn RecordStore>,
}

impl ZoneResolver {
    pub fn new(zone: Arc<ZoneConfig>, store: Arc<dyn RecordStore>) -> Self {
        Self { zone, store }
    }

    pub fn zone(&self) -> &ZoneConfig {
        &self.zone
    }

    /// Records answering `qtype` for `name`, possibly none.
    pub async fn resolve(&self, name: &str, qtype: DNSResourceType) -> Vec<DNSResource> {
        trace!("Resolving {} {}", qtype, name);

        let record = match qtype {
            DNSResourceType::NS if name == self.zone.domain => Some(DNSResource::ns(
                name,
                NS_TTL,
                self.zone.hostname.clone(),
            )),
            DNSResourceType::SOA if name == self.zone.domain => Some(self.soa()),
            DNSResourceType::CNAME => self.resolve_cname(name).await,
            DNSResourceType::A => self.resolve_a(name).await,
            _ => None,
        };

        record.into_iter().collect()
    }

    /// The zone's SOA record. The serial is the current Unix time, so it
    /// only moves forward but says nothing about record changes.
    pub fn soa(&self) -> DNSResource {
        DNSResource::soa(
            self.zone.domain.clone(),
            SOA_TTL,
            SoaData {
                mname: self.zone.hostname.clone(),
                rname: self.zone.mailbox(),
                serial: soa_serial(),
                refresh: SOA_REFRESH,
                retry: SOA_RETRY,
                expire: SOA_EXPIRE,
                minimum: SOA_MINIMUM,
            },
        )
    }

    async fn resolve_a(&self, name: &str) -> Option<DNSResource> {
        let value = found(self.store.lookup_a(name).await, "A", name)?;

        match parse_stored_ipv4(&value) {
            Some(addr) => Some(DNSResource::a(name, RECORD_TTL, addr)),
            None => {
                warn!(name = %name, value = %value, "Stored A value is not an IPv4 address, ignoring");
                None
            }
        }
    }

    async fn resolve_cname(&self, name: &str) -> Option<DNSResource> {
        let value = found(self.store.lookup_cname(name).await, "CNAME", name)?;
        let target = to_fqdn(value.trim());

        if target == "." || encode_name(&target).is_err() {
            warn!(name = %name, value = %value, "Stored CNAME target is not a valid name, ignoring");
            return None;
        }
        Some(DNSResource::cname(name, RECORD_TTL, target))
    }
}

/// Collapses a lookup to its value. Failures are logged here and otherwise
/// treated exactly like a missing key.
fn found(lookup: Lookup, kind: &str, name: &str) -> Option<String> {
    match lookup {
        Lookup::Found(value) => Some(value),
        Lookup::Absent => {
            debug!("No {} record for {}", kind, name);
            None
        }
        Lookup::Failed(e) => {
            warn!(
                name = %name,
                transient = e.is_transient(),
                error = %e,
                "{} lookup failed, answering without a record", kind
            );
            None
        }
    }
}

fn parse_stored_ipv4(value: &str) -> Option<Ipv4Addr> {
    match value.trim().parse::<IpAddr>().ok()? {
        IpAddr::V4(addr) => Some(addr),
        IpAddr::V6(addr) => addr.to_ipv4_mapped(),
    }
}

fn soa_serial() -> u32 {
    chrono::Utc::now().timestamp() as u32
}

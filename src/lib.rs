pub mod config;
pub mod dns;
pub mod error;
pub mod ns_check;
pub mod reply;
pub mod resolver;
pub mod server;
pub mod store;

pub use dns::DNSPacket;
pub use reply::ReplyAssembler;
pub use resolver::ZoneResolver;
pub use server::DnsServer;

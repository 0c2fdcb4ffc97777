//! DNS record snapshots taken from a domain's authoritative nameservers.

mod records;
mod resolver;

pub use records::RecordType;
pub use resolver::DnsResolver;

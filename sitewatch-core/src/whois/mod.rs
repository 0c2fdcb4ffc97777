//! Domain registration lookups over the WHOIS protocol (TCP port 43).

mod client;
mod parser;
mod servers;

pub use client::WhoisClient;
pub use parser::WhoisResponse;
pub use servers::get_tld;

use once_cell::sync::Lazy;
use std::collections::HashMap;
use std::sync::RwLock;

use tracing::warn;

/// Server that knows the WHOIS server of every TLD.
pub const IANA_WHOIS_SERVER: &str = "whois.iana.org";

/// Well-known registry WHOIS servers, saving an IANA round trip.
static WHOIS_SERVERS: Lazy<HashMap<&'static str, &'static str>> = Lazy::new(|| {
    let mut m = HashMap::new();

    // Generic TLDs
    m.insert("com", "whois.verisign-grs.com");
    m.insert("net", "whois.verisign-grs.com");
    m.insert("org", "whois.pir.org");
    m.insert("info", "whois.afilias.net");
    m.insert("biz", "whois.biz");
    m.insert("name", "whois.nic.name");
    m.insert("mobi", "whois.afilias.net");
    m.insert("edu", "whois.educause.edu");
    m.insert("gov", "whois.dotgov.gov");

    // New gTLDs
    m.insert("app", "whois.nic.google");
    m.insert("dev", "whois.nic.google");
    m.insert("page", "whois.nic.google");
    m.insert("io", "whois.nic.io");
    m.insert("co", "whois.nic.co");
    m.insert("me", "whois.nic.me");
    m.insert("tv", "whois.nic.tv");
    m.insert("cc", "ccwhois.verisign-grs.com");
    m.insert("xyz", "whois.nic.xyz");
    m.insert("online", "whois.nic.online");
    m.insert("site", "whois.nic.site");
    m.insert("tech", "whois.nic.tech");
    m.insert("store", "whois.nic.store");
    m.insert("shop", "whois.nic.shop");
    m.insert("ai", "whois.nic.ai");
    m.insert("cloud", "whois.nic.cloud");

    // Country codes
    m.insert("uk", "whois.nic.uk");
    m.insert("de", "whois.denic.de");
    m.insert("fr", "whois.nic.fr");
    m.insert("nl", "whois.domain-registry.nl");
    m.insert("eu", "whois.eu");
    m.insert("ru", "whois.tcinet.ru");
    m.insert("su", "whois.tcinet.ru");
    m.insert("ua", "whois.ua");
    m.insert("pl", "whois.dns.pl");
    m.insert("it", "whois.nic.it");
    m.insert("es", "whois.nic.es");
    m.insert("ca", "whois.cira.ca");
    m.insert("us", "whois.nic.us");
    m.insert("au", "whois.auda.org.au");
    m.insert("jp", "whois.jprs.jp");
    m.insert("in", "whois.registry.in");
    m.insert("br", "whois.registro.br");

    m
});

/// Servers learned from IANA at runtime.
static DISCOVERED: Lazy<RwLock<HashMap<String, String>>> = Lazy::new(|| RwLock::new(HashMap::new()));

pub fn get_whois_server(tld: &str) -> Option<String> {
    let tld = tld.to_lowercase();
    if let Some(server) = WHOIS_SERVERS.get(tld.as_str()) {
        return Some((*server).to_string());
    }

    let discovered = match DISCOVERED.read() {
        Ok(guard) => guard,
        Err(poisoned) => {
            warn!("WHOIS server table lock poisoned, recovering");
            poisoned.into_inner()
        }
    };
    discovered.get(&tld).cloned()
}

pub fn remember_whois_server(tld: &str, server: &str) {
    let mut discovered = match DISCOVERED.write() {
        Ok(guard) => guard,
        Err(poisoned) => {
            warn!("WHOIS server table lock poisoned, recovering");
            poisoned.into_inner()
        }
    };
    discovered.insert(tld.to_lowercase(), server.to_lowercase());
}

pub fn get_tld(domain: &str) -> Option<&str> {
    domain.rsplit('.').next().filter(|tld| !tld.is_empty())
}

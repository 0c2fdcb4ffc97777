use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use hickory_resolver::proto::rr::RecordType as HickoryRecordType;

use crate::error::{Result, WatchError};

/// Record types the snapshot can capture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
#[allow(clippy::upper_case_acronyms)]
pub enum RecordType {
    A,
    AAAA,
    CNAME,
    MX,
    NS,
    TXT,
    SOA,
    CAA,
}

impl RecordType {
    /// Key used for this type in the snapshot's `other_records` map.
    pub fn map_key(&self) -> String {
        self.to_string().to_lowercase()
    }
}

impl fmt::Display for RecordType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecordType::A => write!(f, "A"),
            RecordType::AAAA => write!(f, "AAAA"),
            RecordType::CNAME => write!(f, "CNAME"),
            RecordType::MX => write!(f, "MX"),
            RecordType::NS => write!(f, "NS"),
            RecordType::TXT => write!(f, "TXT"),
            RecordType::SOA => write!(f, "SOA"),
            RecordType::CAA => write!(f, "CAA"),
        }
    }
}

impl FromStr for RecordType {
    type Err = WatchError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_uppercase().as_str() {
            "A" => Ok(RecordType::A),
            "AAAA" => Ok(RecordType::AAAA),
            "CNAME" => Ok(RecordType::CNAME),
            "MX" => Ok(RecordType::MX),
            "NS" => Ok(RecordType::NS),
            "TXT" => Ok(RecordType::TXT),
            "SOA" => Ok(RecordType::SOA),
            "CAA" => Ok(RecordType::CAA),
            _ => Err(WatchError::Dns(format!("unsupported record type: {}", s))),
        }
    }
}

impl From<RecordType> for HickoryRecordType {
    fn from(value: RecordType) -> Self {
        match value {
            RecordType::A => HickoryRecordType::A,
            RecordType::AAAA => HickoryRecordType::AAAA,
            RecordType::CNAME => HickoryRecordType::CNAME,
            RecordType::MX => HickoryRecordType::MX,
            RecordType::NS => HickoryRecordType::NS,
            RecordType::TXT => HickoryRecordType::TXT,
            RecordType::SOA => HickoryRecordType::SOA,
            RecordType::CAA => HickoryRecordType::CAA,
        }
    }
}

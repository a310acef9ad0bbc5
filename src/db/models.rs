use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::time::Duration;

/// Transport protocol of a recorded connection, stored as its IANA number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Protocol {
    Icmp,
    Tcp,
    Udp,
    Other(u8),
}

impl Protocol {
    pub fn code(self) -> i64 {
        match self {
            Protocol::Icmp => 1,
            Protocol::Tcp => 6,
            Protocol::Udp => 17,
            Protocol::Other(code) => i64::from(code),
        }
    }
}

/// One summarized connection submitted by a recorder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrafficRecord {
    pub protocol: Protocol,
    pub src_address: IpAddr,
    pub src_hostname: Option<String>,
    pub src_port: Option<u16>,
    pub dst_address: IpAddr,
    pub dst_hostname: Option<String>,
    pub dst_port: Option<u16>,
    pub rx_bytes: u64,
    pub tx_bytes: u64,
    pub start_timestamp: DateTime<Utc>,
    pub duration: Duration,
}

/// Traffic for a site grouped by destination country and region.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeoipSummaryRecord {
    pub country_name: String,
    pub region_name: Option<String>,
    pub total_rx_bytes: u64,
    pub total_tx_bytes: u64,
}

/// Traffic grouped by local machine and destination country/region.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MachineGeoIpRecord {
    pub local_ip: IpAddr,
    pub country_name: String,
    pub region_name: Option<String>,
    pub total_rx_bytes: u64,
    pub total_tx_bytes: u64,
}

/// Traffic per (local machine, remote host) pair with everything GeoIP knows
/// about the remote end.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FullConnectionGeoIpRecord {
    pub local_ip: IpAddr,
    pub global_ip: IpAddr,
    pub country_name: String,
    pub region_name: Option<String>,
    pub city_name: Option<String>,
    pub isp: Option<String>,
    pub domain: Option<String>,
    pub total_rx_bytes: u64,
    pub total_tx_bytes: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InternetHostRecord {
    pub local_ip: IpAddr,
    pub global_ip: IpAddr,
    pub global_hostname: Option<String>,
    pub isp: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Organization {
    pub id: i64,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Site {
    pub id: i64,
    pub organization_id: i64,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Recorder {
    pub id: i64,
    pub site_id: i64,
    pub human_name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContactMethod {
    Email,
    File,
    Webhook,
}

/// How a contact wants report exports delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    Inline,
    Csv,
    Zip,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Contact {
    pub id: i64,
    pub method: ContactMethod,
    /// Address for the method: mailbox, file path, or URL.
    pub value: String,
    pub output_format: OutputFormat,
}

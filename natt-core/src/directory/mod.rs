use std::fmt;
use std::net::Ipv4Addr;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::endpoint::{port_record_value, Endpoint};
use crate::error::DirectoryError;

mod cloudflare;
mod memory;

pub use cloudflare::CloudflareDirectory;
pub use memory::MemoryDirectory;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RecordType {
    #[serde(rename = "A")]
    A,
    #[serde(rename = "TXT")]
    Txt,
}

impl RecordType {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordType::A => "A",
            RecordType::Txt => "TXT",
        }
    }
}

impl fmt::Display for RecordType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A record as the directory holds it. `content` is always the bare value,
/// providers that quote TXT data strip the quotes before handing it out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DnsRecord {
    pub id: String,
    pub record_type: RecordType,
    pub name: String,
    pub content: String,
}

/// Write side of the rendezvous directory, scoped to one provider account.
#[async_trait]
pub trait Directory: Send + Sync {
    /// Id of the zone named exactly `name`, `None` if the account has no such zone.
    async fn zone_id(&self, name: &str) -> Result<Option<String>, DirectoryError>;
    async fn list_records(
        &self,
        zone_id: &str,
        record_type: RecordType,
        name: &str,
    ) -> Result<Vec<DnsRecord>, DirectoryError>;
    async fn create_record(
        &self,
        zone_id: &str,
        record_type: RecordType,
        name: &str,
        content: &str,
    ) -> Result<DnsRecord, DirectoryError>;
    async fn update_record(
        &self,
        zone_id: &str,
        record: &DnsRecord,
        content: &str,
    ) -> Result<DnsRecord, DirectoryError>;
}

/// Publishes `endpoint` as the rendezvous record of `fqdn`.
///
/// Both records are attempted even if the first one fails; the first error
/// is returned.
pub async fn publish<D: Directory + ?Sized>(
    directory: &D,
    fqdn: &str,
    endpoint: Endpoint,
) -> Result<(), DirectoryError> {
    let zone_id = find_zone(directory, fqdn).await?;
    let a = upsert_record(
        directory,
        &zone_id,
        RecordType::A,
        fqdn,
        &endpoint.ip.to_string(),
    )
    .await;
    let txt = upsert_record(
        directory,
        &zone_id,
        RecordType::Txt,
        fqdn,
        &endpoint.port_record(),
    )
    .await;
    if let Err(e) = &a {
        log::warn!("A record of {fqdn}: {e}");
    }
    if let Err(e) = &txt {
        log::warn!("TXT record of {fqdn}: {e}");
    }
    a?;
    txt?;
    log::info!("published {fqdn} -> {endpoint}");
    Ok(())
}

/// Publishes only the address record, for hosts without a tunnel port.
pub async fn publish_address<D: Directory + ?Sized>(
    directory: &D,
    fqdn: &str,
    ip: Ipv4Addr,
) -> Result<(), DirectoryError> {
    let zone_id = find_zone(directory, fqdn).await?;
    upsert_record(directory, &zone_id, RecordType::A, fqdn, &ip.to_string()).await?;
    log::info!("published {fqdn} -> {ip}");
    Ok(())
}

/// Finds the zone managing `fqdn` by stripping leftmost labels until the
/// directory recognizes a suffix. The top-level label alone is never probed.
pub async fn find_zone<D: Directory + ?Sized>(
    directory: &D,
    fqdn: &str,
) -> Result<String, DirectoryError> {
    let name = fqdn.trim_end_matches('.');
    let labels: Vec<&str> = name.split('.').collect();
    for i in 0..labels.len().saturating_sub(1) {
        let candidate = labels[i..].join(".");
        if let Some(zone_id) = directory.zone_id(&candidate).await? {
            log::debug!("zone of {fqdn} is {candidate} ({zone_id})");
            return Ok(zone_id);
        }
    }
    Err(DirectoryError::ZoneNotFound(fqdn.to_string()))
}

/// Creates the record when absent, updates it in place when exactly one
/// exists, and refuses to choose when there are several.
///
/// TXT records other than port records share the name but are never counted
/// or touched.
pub async fn upsert_record<D: Directory + ?Sized>(
    directory: &D,
    zone_id: &str,
    record_type: RecordType,
    name: &str,
    content: &str,
) -> Result<DnsRecord, DirectoryError> {
    let mut records = directory.list_records(zone_id, record_type, name).await?;
    if record_type == RecordType::Txt {
        records.retain(|r| port_record_value(&r.content).is_some());
    }
    match records.len() {
        0 => directory.create_record(zone_id, record_type, name, content).await,
        1 => {
            let record = records.remove(0);
            if record.content == content {
                return Ok(record);
            }
            directory.update_record(zone_id, &record, content).await
        }
        count => Err(DirectoryError::AmbiguousRecord {
            name: name.to_string(),
            record_type,
            count,
        }),
    }
}

use std::collections::HashMap;
use std::io;
use std::net::Ipv4Addr;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::directory::{DnsRecord, Directory, RecordType};
use crate::dns::RecordLookup;
use crate::error::DirectoryError;

/// A directory held in process memory.
///
/// It serves both sides of the rendezvous: records published through
/// [`Directory`] are answered by [`RecordLookup`].
#[derive(Debug, Default)]
pub struct MemoryDirectory {
    zones: HashMap<String, String>,
    records: Mutex<Vec<DnsRecord>>,
    next_id: AtomicU64,
}

impl MemoryDirectory {
    pub fn new<I, S>(zones: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let zones = zones
            .into_iter()
            .enumerate()
            .map(|(i, name)| (name.into(), format!("zone-{i}")))
            .collect();
        Self {
            zones,
            records: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(1),
        }
    }
    pub fn zone(&self, name: &str) -> Option<String> {
        self.zones.get(name).cloned()
    }
    pub fn records(&self, record_type: RecordType, name: &str) -> Vec<DnsRecord> {
        self.records
            .lock()
            .iter()
            .filter(|r| r.record_type == record_type && r.name == name)
            .cloned()
            .collect()
    }
    /// Adds a record unconditionally, duplicates included.
    pub fn insert(&self, record_type: RecordType, name: &str, content: &str) -> DnsRecord {
        let record = DnsRecord {
            id: format!("rec-{}", self.next_id.fetch_add(1, Ordering::Relaxed)),
            record_type,
            name: name.to_string(),
            content: content.to_string(),
        };
        self.records.lock().push(record.clone());
        record
    }
    fn check_zone(&self, zone_id: &str) -> Result<(), DirectoryError> {
        if self.zones.values().any(|id| id == zone_id) {
            Ok(())
        } else {
            Err(DirectoryError::Api(format!("unknown zone {zone_id}")))
        }
    }
}

#[async_trait]
impl Directory for MemoryDirectory {
    async fn zone_id(&self, name: &str) -> Result<Option<String>, DirectoryError> {
        Ok(self.zone(name))
    }

    async fn list_records(
        &self,
        zone_id: &str,
        record_type: RecordType,
        name: &str,
    ) -> Result<Vec<DnsRecord>, DirectoryError> {
        self.check_zone(zone_id)?;
        Ok(self.records(record_type, name))
    }

    async fn create_record(
        &self,
        zone_id: &str,
        record_type: RecordType,
        name: &str,
        content: &str,
    ) -> Result<DnsRecord, DirectoryError> {
        self.check_zone(zone_id)?;
        Ok(self.insert(record_type, name, content))
    }

    async fn update_record(
        &self,
        zone_id: &str,
        record: &DnsRecord,
        content: &str,
    ) -> Result<DnsRecord, DirectoryError> {
        self.check_zone(zone_id)?;
        let mut records = self.records.lock();
        let Some(existing) = records.iter_mut().find(|r| r.id == record.id) else {
            return Err(DirectoryError::Api(format!("record {} not found", record.id)));
        };
        existing.content = content.to_string();
        Ok(existing.clone())
    }
}

#[async_trait]
impl RecordLookup for MemoryDirectory {
    async fn lookup_a(&self, domain: &str) -> io::Result<Vec<Ipv4Addr>> {
        Ok(self
            .records(RecordType::A, domain)
            .iter()
            .filter_map(|r| r.content.parse().ok())
            .collect())
    }

    async fn lookup_txt(&self, domain: &str) -> io::Result<Vec<String>> {
        Ok(self
            .records(RecordType::Txt, domain)
            .into_iter()
            .map(|r| r.content)
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directory::publish;
    use crate::dns::resolve;
    use crate::endpoint::Endpoint;

    #[tokio::test]
    async fn resolves_what_was_published() {
        let directory = MemoryDirectory::new(["example.com"]);
        let endpoint = Endpoint::new(Ipv4Addr::new(203, 0, 113, 5), 41000);
        publish(&directory, "tunnel.example.com", endpoint)
            .await
            .unwrap();
        let addr = resolve(&directory, "tunnel.example.com").await.unwrap();
        assert_eq!(addr.to_string(), "203.0.113.5:41000");
    }

    #[tokio::test]
    async fn update_of_a_vanished_record_fails() {
        let directory = MemoryDirectory::new(["example.com"]);
        let zone = directory.zone("example.com").unwrap();
        let ghost = DnsRecord {
            id: "missing".into(),
            record_type: RecordType::A,
            name: "tunnel.example.com".into(),
            content: "192.0.2.1".into(),
        };
        let rs = directory.update_record(&zone, &ghost, "192.0.2.2").await;
        assert!(matches!(rs, Err(DirectoryError::Api(_))), "{rs:?}");
    }
}

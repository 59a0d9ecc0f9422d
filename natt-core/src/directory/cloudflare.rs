use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::directory::{DnsRecord, Directory, RecordType};
use crate::error::DirectoryError;

pub const CLOUDFLARE_API: &str = "https://api.cloudflare.com/client/v4";

/// Cloudflare v4 REST client authenticated by an API token.
#[derive(Debug, Clone)]
pub struct CloudflareDirectory {
    http: reqwest::Client,
    base_url: String,
}

#[derive(Deserialize)]
struct Envelope<T> {
    success: bool,
    #[serde(default)]
    errors: Vec<ApiMessage>,
    result: Option<T>,
}

#[derive(Deserialize)]
struct ApiMessage {
    code: i64,
    message: String,
}

#[derive(Deserialize)]
struct Zone {
    id: String,
}

#[derive(Deserialize)]
struct Record {
    id: String,
    #[serde(rename = "type")]
    record_type: RecordType,
    name: String,
    content: String,
}

#[derive(Serialize)]
struct NewRecord<'a> {
    #[serde(rename = "type")]
    record_type: RecordType,
    name: &'a str,
    content: String,
    ttl: u32,
}

#[derive(Serialize)]
struct RecordPatch {
    content: String,
}

impl CloudflareDirectory {
    pub fn new(token: &str) -> Result<Self, DirectoryError> {
        if token.is_empty() {
            return Err(DirectoryError::Api("api token is empty".into()));
        }
        let mut headers = HeaderMap::new();
        let token = HeaderValue::from_str(&format!("Bearer {token}"))
            .map_err(|_| DirectoryError::Api("invalid api token".into()))?;
        headers.insert(AUTHORIZATION, token);
        let http = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self {
            http,
            base_url: CLOUDFLARE_API.to_string(),
        })
    }
    pub fn set_base_url(mut self, base_url: &str) -> Self {
        self.base_url = base_url.trim_end_matches('/').to_string();
        self
    }

    async fn call<T: DeserializeOwned>(
        &self,
        request: reqwest::RequestBuilder,
    ) -> Result<T, DirectoryError> {
        let response = request.send().await?;
        let status = response.status();
        let body = response.text().await?;
        let envelope: Envelope<T> = serde_json::from_str(&body)
            .map_err(|e| DirectoryError::Api(format!("{status}: unreadable response: {e}")))?;
        if !status.is_success() || !envelope.success {
            let errors: Vec<String> = envelope
                .errors
                .iter()
                .map(|e| format!("[{}] {}", e.code, e.message))
                .collect();
            return Err(DirectoryError::Api(format!("{status}: {}", errors.join(", "))));
        }
        envelope
            .result
            .ok_or_else(|| DirectoryError::Api(format!("{status}: response has no result")))
    }
}

fn to_wire(record_type: RecordType, content: &str) -> String {
    match record_type {
        RecordType::Txt => format!("\"{content}\""),
        RecordType::A => content.to_string(),
    }
}

fn from_wire(record: Record) -> DnsRecord {
    let content = match record.record_type {
        RecordType::Txt => record
            .content
            .strip_prefix('"')
            .and_then(|s| s.strip_suffix('"'))
            .map(str::to_string)
            .unwrap_or(record.content),
        RecordType::A => record.content,
    };
    DnsRecord {
        id: record.id,
        record_type: record.record_type,
        name: record.name,
        content,
    }
}

#[async_trait]
impl Directory for CloudflareDirectory {
    async fn zone_id(&self, name: &str) -> Result<Option<String>, DirectoryError> {
        let url = format!("{}/zones", self.base_url);
        let zones: Vec<Zone> = self
            .call(self.http.get(url).query(&[("name", name)]))
            .await?;
        Ok(zones.into_iter().next().map(|z| z.id))
    }

    async fn list_records(
        &self,
        zone_id: &str,
        record_type: RecordType,
        name: &str,
    ) -> Result<Vec<DnsRecord>, DirectoryError> {
        let url = format!("{}/zones/{zone_id}/dns_records", self.base_url);
        let records: Vec<Record> = self
            .call(
                self.http
                    .get(url)
                    .query(&[("type", record_type.as_str()), ("name", name)]),
            )
            .await?;
        Ok(records.into_iter().map(from_wire).collect())
    }

    async fn create_record(
        &self,
        zone_id: &str,
        record_type: RecordType,
        name: &str,
        content: &str,
    ) -> Result<DnsRecord, DirectoryError> {
        let url = format!("{}/zones/{zone_id}/dns_records", self.base_url);
        let body = NewRecord {
            record_type,
            name,
            content: to_wire(record_type, content),
            // automatic
            ttl: 1,
        };
        let record: Record = self.call(self.http.post(url).json(&body)).await?;
        log::debug!("created {record_type} record {} for {name}", record.id);
        Ok(from_wire(record))
    }

    async fn update_record(
        &self,
        zone_id: &str,
        record: &DnsRecord,
        content: &str,
    ) -> Result<DnsRecord, DirectoryError> {
        let url = format!("{}/zones/{zone_id}/dns_records/{}", self.base_url, record.id);
        let body = RecordPatch {
            content: to_wire(record.record_type, content),
        };
        let updated: Record = self.call(self.http.patch(url).json(&body)).await?;
        log::debug!(
            "updated {} record {} for {}",
            record.record_type,
            record.id,
            record.name
        );
        Ok(from_wire(updated))
    }
}

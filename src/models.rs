//! Records returned by the cloud session and the backend shapes they are
//! parsed from.
//!
//! Parsing is all-or-nothing: one malformed inventory item or device entry
//! fails the whole document.

use crate::error::{CloudError, Result};
use crate::utils::{filename_from_url, lenient_i64};
use chrono::{NaiveDate, NaiveTime};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Document stored in the cloud, either uploaded or purchased.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InventoryItem {
    pub id: String,
    pub title: String,
    pub subtitle: String,

    /// Author names, empty entries dropped.
    pub authors: Vec<String>,

    pub mime: String,

    /// `edata` for user uploads, `ebook` for purchases.
    pub doc_type: String,

    /// Publication date in epoch milliseconds, if the backend knows it.
    pub issued: Option<i64>,

    /// Purchase (or upload) time in epoch milliseconds.
    pub purchased: i64,

    /// Partner the document belongs to.
    pub partner_id: u32,
}

impl InventoryItem {
    /// Human description of the storage area the item lives in.
    pub fn storage_area(&self) -> &str {
        match self.doc_type.as_str() {
            "edata" => "user storage area",
            "ebook" => "tolino storage area",
            other => other,
        }
    }
}

/// Reader registered to the account.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Device {
    pub id: String,
    pub name: String,

    /// Device type, mapped to a readable name when known.
    pub device_type: String,

    pub partner_id: u32,

    /// Registration time in epoch milliseconds.
    pub registered: i64,

    /// Last use in epoch milliseconds.
    pub last_used: i64,
}

/// Resolved download location of a document.
#[derive(Debug, Clone, PartialEq)]
pub struct DownloadInfo {
    pub url: String,
    pub filename: String,
    pub format: String,
}

/// Metadata fields to overwrite on a document; `None` leaves a field as is.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MetadataUpdate {
    pub title: Option<String>,
    pub subtitle: Option<String>,
    pub author: Option<String>,
    pub publisher: Option<String>,
    pub isbn: Option<String>,
    pub edition: Option<String>,
    /// Issue date as `dd.mm.yyyy`.
    pub issued: Option<String>,
    pub language: Option<String>,
}

impl MetadataUpdate {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Writes the provided fields into a backend metadata document.
    pub(crate) fn apply(&self, document: &mut Value) -> std::result::Result<(), String> {
        let metadata = document
            .get_mut("metadata")
            .and_then(Value::as_object_mut)
            .ok_or_else(|| "response has no metadata object".to_string())?;

        let text_fields = [
            ("title", &self.title),
            ("subtitle", &self.subtitle),
            ("author", &self.author),
            ("publisher", &self.publisher),
            ("isbn", &self.isbn),
            ("edition", &self.edition),
            ("language", &self.language),
        ];
        for (key, value) in text_fields {
            if let Some(value) = value {
                metadata.insert(key.to_string(), Value::String(value.clone()));
            }
        }

        if let Some(issued) = &self.issued {
            metadata.insert("issued".to_string(), Value::from(issued_millis(issued)?));
        }

        Ok(())
    }
}

/// Converts `dd.mm.yyyy` to epoch milliseconds at UTC midnight.
fn issued_millis(date: &str) -> std::result::Result<i64, String> {
    let date = NaiveDate::parse_from_str(date.trim(), "%d.%m.%Y")
        .map_err(|e| format!("invalid issued date '{}': {}", date, e))?;
    Ok(date.and_time(NaiveTime::MIN).and_utc().timestamp_millis())
}

#[derive(Debug, Deserialize)]
struct InventoryResponse {
    #[serde(rename = "PublicationInventory")]
    inventory: PublicationInventory,
}

#[derive(Debug, Deserialize)]
struct PublicationInventory {
    /// Own documents uploaded to the cloud.
    #[serde(default)]
    edata: Vec<RawItem>,
    /// Purchased books.
    #[serde(default)]
    ebook: Vec<RawItem>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawItem {
    #[serde(default)]
    reseller_id: Value,
    epub_meta_data: RawMetaData,
}

#[derive(Debug, Deserialize)]
struct RawMetaData {
    identifier: String,
    title: String,
    #[serde(default)]
    subtitle: Option<String>,
    #[serde(default)]
    author: Vec<RawAuthor>,
    deliverable: Vec<RawDeliverable>,
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    issued: Value,
}

#[derive(Debug, Deserialize)]
struct RawAuthor {
    #[serde(default)]
    name: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawDeliverable {
    content_format: String,
    #[serde(default)]
    purchased: Value,
}

impl RawItem {
    fn into_item(self) -> std::result::Result<InventoryItem, String> {
        let meta = self.epub_meta_data;
        let id = meta.identifier;

        let partner_id = lenient_i64(&self.reseller_id)
            .and_then(|v| u32::try_from(v).ok())
            .ok_or_else(|| format!("item {}: missing resellerId", id))?;
        let deliverable = meta
            .deliverable
            .into_iter()
            .next()
            .ok_or_else(|| format!("item {}: no deliverable", id))?;
        let purchased = lenient_i64(&deliverable.purchased)
            .ok_or_else(|| format!("item {}: missing purchased timestamp", id))?;
        let issued = match &meta.issued {
            Value::Null => None,
            value => Some(
                lenient_i64(value)
                    .ok_or_else(|| format!("item {}: bad issued value {}", id, value))?,
            ),
        };

        Ok(InventoryItem {
            title: meta.title,
            subtitle: meta.subtitle.unwrap_or_default(),
            authors: meta
                .author
                .into_iter()
                .filter_map(|a| a.name)
                .filter(|name| !name.trim().is_empty())
                .collect(),
            mime: deliverable.content_format,
            doc_type: meta.kind.to_lowercase(),
            issued,
            purchased,
            partner_id,
            id,
        })
    }
}

/// Parses the inventory document, uploads first, then purchases.
pub(crate) fn parse_inventory(body: &[u8]) -> Result<Vec<InventoryItem>> {
    let response: InventoryResponse = serde_json::from_slice(body)
        .map_err(|e| CloudError::InventoryParseFailed(e.to_string()))?;

    let PublicationInventory { edata, ebook } = response.inventory;
    edata
        .into_iter()
        .chain(ebook)
        .map(|raw| raw.into_item().map_err(CloudError::InventoryParseFailed))
        .collect()
}

#[derive(Debug, Deserialize)]
struct DeviceListResponse {
    #[serde(rename = "deviceListResponse")]
    list: DeviceList,
}

#[derive(Debug, Deserialize)]
struct DeviceList {
    devices: Vec<RawDevice>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawDevice {
    device_id: String,
    device_name: String,
    device_type: String,
    #[serde(default)]
    reseller_id: Value,
    #[serde(default)]
    device_registered: Value,
    #[serde(default)]
    device_last_usage: Value,
}

/// Readable name for a backend device type; unknown codes pass through.
pub fn device_type_name(code: &str) -> &str {
    match code {
        "unknown_imx50_rdp_1" => "tolino shine",
        "tolino_vison" => "tolino vision",
        "HTML5_1" => "web browser",
        other => other,
    }
}

impl RawDevice {
    fn into_device(self) -> std::result::Result<Device, String> {
        let number = |value: &Value, field: &str| {
            lenient_i64(value).ok_or_else(|| format!("device {}: bad {}", self.device_id, field))
        };

        let partner_id = number(&self.reseller_id, "resellerId")
            .and_then(|v| u32::try_from(v).map_err(|e| e.to_string()))?;
        let registered = number(&self.device_registered, "deviceRegistered")?;
        let last_used = number(&self.device_last_usage, "deviceLastUsage")?;

        Ok(Device {
            device_type: device_type_name(&self.device_type).to_string(),
            name: self.device_name,
            id: self.device_id,
            partner_id,
            registered,
            last_used,
        })
    }
}

/// Parses the device list document.
pub(crate) fn parse_devices(body: &[u8]) -> Result<Vec<Device>> {
    let response: DeviceListResponse = serde_json::from_slice(body)
        .map_err(|e| CloudError::DeviceListFailed(e.to_string()))?;

    response
        .list
        .devices
        .into_iter()
        .map(|raw| raw.into_device().map_err(CloudError::DeviceListFailed))
        .collect()
}

#[derive(Debug, Deserialize)]
struct DownloadInfoResponse {
    #[serde(rename = "DownloadInfo")]
    info: RawDownloadInfo,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawDownloadInfo {
    content_url: String,
    format: String,
}

/// Parses the download-info document.
pub(crate) fn parse_download_info(body: &[u8]) -> Result<DownloadInfo> {
    let response: DownloadInfoResponse = serde_json::from_slice(body)
        .map_err(|e| CloudError::DownloadInfoFailed(e.to_string()))?;
    let RawDownloadInfo {
        content_url,
        format,
    } = response.info;

    let filename = filename_from_url(&content_url).ok_or_else(|| {
        CloudError::DownloadInfoFailed(format!("no filename in content URL {}", content_url))
    })?;

    Ok(DownloadInfo {
        url: content_url,
        filename,
        format,
    })
}

#[derive(Debug, Deserialize)]
struct UploadResponse {
    metadata: UploadMetadata,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UploadMetadata {
    deliverable_id: String,
}

/// Extracts the new document id from an upload response.
pub(crate) fn parse_upload(body: &[u8]) -> Result<String> {
    serde_json::from_slice::<UploadResponse>(body)
        .map(|r| r.metadata.deliverable_id)
        .map_err(|e| CloudError::UploadFailed(e.to_string()))
}

//! Authenticated operations against the shared backend.
//!
//! A session is bound to one partner and walks a fixed life cycle:
//! `Unauthenticated -> Authenticated <-> Registered -> LoggedOut`.
//! Requests are issued strictly one after another; nothing is retried.

use crate::auth::{self, Credentials};
use crate::config::HttpConfig;
use crate::error::{CloudError, Result};
use crate::http::HttpClients;
use crate::models::{
    Device, DownloadInfo, InventoryItem, MetadataUpdate, parse_devices, parse_download_info,
    parse_inventory, parse_upload,
};
use crate::partners::{BackendGeneration, LogoutEndpoint, Partner};
use crate::utils::{backend_message, document_mime, image_mime};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use futures::StreamExt;
use reqwest::StatusCode;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::multipart::{Form, Part};
use serde_json::{Value, json};
use std::fmt;
use std::path::{Path, PathBuf};
use tokio::io::{AsyncWriteExt, BufWriter};
use tracing::{debug, info, warn};

/// Write buffer size used while streaming a download to disk.
pub const DOWNLOAD_CHUNK_SIZE: usize = 1024;

/// Hardware name announced by the current backend generation.
const HARDWARE_NAME: &str = "tolino sync reader";

/// Device/client type of the web reader.
const HTML5_CLIENT: &str = "HTML5_1";

/// Life-cycle state of a [`CloudSession`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Unauthenticated,
    Authenticated,
    Registered,
    LoggedOut,
}

impl SessionState {
    fn as_str(self) -> &'static str {
        match self {
            SessionState::Unauthenticated => "unauthenticated",
            SessionState::Authenticated => "authenticated",
            SessionState::Registered => "registered",
            SessionState::LoggedOut => "logged out",
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Session with the shared backend on behalf of one partner account.
pub struct CloudSession<'a> {
    partner: &'a Partner,
    hardware_id: &'a str,
    http: HttpClients,
    state: SessionState,
    credentials: Option<Credentials>,
}

impl<'a> CloudSession<'a> {
    /// Creates an unauthenticated session for `partner`.
    pub fn new(partner: &'a Partner, hardware_id: &'a str, http: &HttpConfig) -> Result<Self> {
        Ok(Self {
            partner,
            hardware_id,
            http: HttpClients::new(http)?,
            state: SessionState::Unauthenticated,
            credentials: None,
        })
    }

    pub fn partner(&self) -> &Partner {
        self.partner
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Credentials from the last successful login.
    pub fn credentials(&self) -> Option<&Credentials> {
        self.credentials.as_ref()
    }

    /// Logs in with the partner's storefront.
    pub async fn login(&mut self, username: &str, password: &str) -> Result<&Credentials> {
        if self.state != SessionState::Unauthenticated {
            return Err(self.invalid_state("log in"));
        }

        let credentials = auth::login(&self.http, self.partner, username, password).await?;
        info!(partner = %self.partner.name, "logged in");
        self.state = SessionState::Authenticated;
        Ok(self.credentials.insert(credentials))
    }

    /// Announces this client's hardware id as a reader device.
    pub async fn register(&mut self) -> Result<()> {
        self.require("register")?;
        let backend = &self.partner.backend;

        let payload = match backend.generation {
            BackendGeneration::Legacy => json!({
                "initAppRequest": {
                    "hardware_id": self.hardware_id,
                    "hardware_type": HTML5_CLIENT,
                    "client_type": HTML5_CLIENT,
                    "hardware_name": "other"
                }
            }),
            BackendGeneration::Current => json!({ "hardware_name": HARDWARE_NAME }),
        };

        debug!(url = %backend.register_url, "registering device");
        let response = self
            .http
            .client()
            .post(&backend.register_url)
            .headers(self.auth_headers(true)?)
            .json(&payload)
            .send()
            .await?;

        let status = response.status();
        if status != StatusCode::OK {
            return Err(CloudError::RegistrationFailed(format!(
                "{}: HTTP {}",
                self.hardware_id, status
            )));
        }

        self.state = SessionState::Registered;
        Ok(())
    }

    /// Removes a device from the account; `None` means this client.
    pub async fn unregister(&mut self, device_id: Option<&str>) -> Result<()> {
        self.require("unregister")?;
        let device_id = device_id.unwrap_or(self.hardware_id).to_string();
        let backend = &self.partner.backend;

        let account = self.account_entry()?;
        let payload = json!({
            "deleteDevicesRequest": {
                "accounts": [account],
                "devices": [{
                    "device_id": device_id,
                    "reseller_id": self.partner.id
                }]
            }
        });

        debug!(url = %backend.unregister_url, device = %device_id, "unregistering device");
        let response = self
            .http
            .client()
            .post(&backend.unregister_url)
            .headers(self.auth_headers(false)?)
            .json(&payload)
            .send()
            .await?;

        if response.status() != StatusCode::OK {
            return Err(CloudError::UnregisterFailed {
                device_id,
                message: backend_message(response).await,
            });
        }

        if device_id == self.hardware_id && self.state == SessionState::Registered {
            self.state = SessionState::Authenticated;
        }
        Ok(())
    }

    /// Lists the devices registered to the account.
    pub async fn devices(&self) -> Result<Vec<Device>> {
        self.require("list devices")?;
        let backend = &self.partner.backend;

        let account = self.account_entry()?;
        let payload = json!({
            "deviceListRequest": {
                "accounts": [account]
            }
        });

        debug!(url = %backend.devices_url, "listing devices");
        let response = self
            .http
            .client()
            .post(&backend.devices_url)
            .headers(self.auth_headers(false)?)
            .json(&payload)
            .send()
            .await?;

        let status = response.status();
        if status != StatusCode::OK {
            return Err(CloudError::DeviceListFailed(format!("HTTP {}", status)));
        }

        let body = response.bytes().await?;
        parse_devices(&body)
    }

    /// Fetches uploaded documents and purchased books.
    pub async fn inventory(&self) -> Result<Vec<InventoryItem>> {
        self.require("fetch inventory")?;
        let url = &self.partner.backend.inventory_url;

        debug!(url = %url, "fetching inventory");
        let response = self
            .http
            .client()
            .get(url)
            .query(&[("strip", "true")])
            .headers(self.auth_headers(true)?)
            .send()
            .await?;

        let status = response.status();
        if status != StatusCode::OK {
            return Err(CloudError::InventoryParseFailed(format!("HTTP {}", status)));
        }

        let body = response.bytes().await?;
        let items = parse_inventory(&body)?;
        debug!(count = items.len(), "inventory parsed");
        Ok(items)
    }

    /// Uploads a document and returns its new id.
    ///
    /// The display name defaults to the file name, the extension to the
    /// file's own; the extension selects the MIME type.
    pub async fn upload(
        &self,
        path: &Path,
        display_name: Option<&str>,
        extension: Option<&str>,
    ) -> Result<String> {
        self.require("upload")?;

        let name = match display_name {
            Some(name) => name.to_string(),
            None => file_name(path)
                .ok_or_else(|| CloudError::UploadFailed(format!("no file name in {}", path.display())))?,
        };
        let extension = extension
            .map(str::to_string)
            .or_else(|| path.extension().map(|e| e.to_string_lossy().into_owned()))
            .unwrap_or_default();
        let mime = document_mime(&extension);

        let content = tokio::fs::read(path).await?;
        let part = Part::bytes(content).file_name(name).mime_str(mime)?;
        let form = Form::new().part("file", part);

        let url = &self.partner.backend.upload_url;
        debug!(url = %url, mime, "uploading document");
        let response = self
            .http
            .client()
            .post(url)
            .headers(self.auth_headers(true)?)
            .multipart(form)
            .send()
            .await?;

        let status = response.status();
        if status != StatusCode::OK {
            return Err(CloudError::UploadFailed(format!("HTTP {}", status)));
        }

        let body = response.bytes().await?;
        parse_upload(&body)
    }

    /// Deletes a document from the cloud.
    pub async fn delete(&self, document_id: &str) -> Result<()> {
        self.require("delete")?;
        let url = &self.partner.backend.delete_url;

        debug!(url = %url, document = document_id, "deleting document");
        let response = self
            .http
            .client()
            .get(url)
            .query(&[("deliverableId", document_id)])
            .headers(self.auth_headers(true)?)
            .send()
            .await?;

        if response.status() != StatusCode::OK {
            return Err(CloudError::DeleteFailed {
                document_id: document_id.to_string(),
                message: backend_message(response).await,
            });
        }
        Ok(())
    }

    /// Resolves where a document can be downloaded from.
    pub async fn download_info(&self, document_id: &str) -> Result<DownloadInfo> {
        self.require("resolve download")?;
        let url = download_info_url(&self.partner.backend.download_info_url, document_id);

        debug!(url = %url, "resolving download");
        let response = self
            .http
            .client()
            .get(&url)
            .headers(self.auth_headers(true)?)
            .send()
            .await?;

        let status = response.status();
        if status != StatusCode::OK {
            return Err(CloudError::DownloadInfoFailed(format!("HTTP {}", status)));
        }

        let body = response.bytes().await?;
        parse_download_info(&body)
    }

    /// Downloads a document into `target_dir` (or the current directory)
    /// and returns the written path.
    pub async fn download(&self, target_dir: Option<&Path>, document_id: &str) -> Result<PathBuf> {
        self.require("download")?;
        let info = self.download_info(document_id).await?;

        debug!(url = %info.url, format = %info.format, "downloading document");
        let response = self
            .http
            .client()
            .get(&info.url)
            .headers(self.auth_headers(true)?)
            .send()
            .await?;

        if response.status() != StatusCode::OK {
            return Err(CloudError::DownloadFailed(backend_message(response).await));
        }

        let path = match target_dir {
            Some(dir) => dir.join(&info.filename),
            None => PathBuf::from(&info.filename),
        };

        let file = tokio::fs::File::create(&path)
            .await
            .map_err(|e| CloudError::DownloadFailed(format!("{}: {}", path.display(), e)))?;

        if let Err(err) = write_body(response, file, &path).await {
            if let Err(e) = tokio::fs::remove_file(&path).await {
                warn!(path = %path.display(), "removing partial download failed: {}", e);
            }
            return Err(err);
        }

        info!(path = %path.display(), "download complete");
        Ok(path)
    }

    /// Overwrites metadata fields of a document.
    pub async fn metadata(&self, document_id: &str, update: &MetadataUpdate) -> Result<()> {
        self.require("edit metadata")?;
        let failed = |message: String| CloudError::MetadataFailed {
            document_id: document_id.to_string(),
            message,
        };

        if update.is_empty() {
            return Err(failed("no fields to change".to_string()));
        }

        let url = &self.partner.backend.meta_url;
        let query = [("deliverableId", document_id)];

        debug!(url = %url, document = document_id, "fetching metadata");
        let response = self
            .http
            .client()
            .get(url)
            .query(&query)
            .headers(self.auth_headers(true)?)
            .send()
            .await?;
        if response.status() != StatusCode::OK {
            return Err(failed(backend_message(response).await));
        }

        let body = response.bytes().await?;
        let mut document: Value = serde_json::from_slice(&body).map_err(|e| failed(e.to_string()))?;
        update.apply(&mut document).map_err(failed)?;

        debug!(url = %url, document = document_id, "storing metadata");
        let response = self
            .http
            .client()
            .put(url)
            .query(&query)
            .headers(self.auth_headers(true)?)
            .json(&document)
            .send()
            .await?;
        if response.status() != StatusCode::OK {
            return Err(failed(backend_message(response).await));
        }
        Ok(())
    }

    /// Replaces the cover image of a document with a PNG or JPEG file.
    pub async fn cover(&self, document_id: &str, image: &Path) -> Result<()> {
        self.require("upload cover")?;
        let failed = |message: String| CloudError::CoverFailed {
            document_id: document_id.to_string(),
            message,
        };

        let extension = image
            .extension()
            .map(|e| e.to_string_lossy().into_owned())
            .unwrap_or_default();
        let mime = image_mime(&extension)
            .ok_or_else(|| failed(format!("unsupported image type '{}'", extension)))?;
        let name = file_name(image).unwrap_or_else(|| format!("cover.{}", extension));

        let content = tokio::fs::read(image).await?;
        let part = Part::bytes(content).file_name(name).mime_str(mime)?;
        let form = Form::new()
            .part("file", part)
            .text("deliverableId", document_id.to_string());

        let url = &self.partner.backend.cover_url;
        debug!(url = %url, document = document_id, "uploading cover");
        let response = self
            .http
            .client()
            .post(url)
            .headers(self.auth_headers(true)?)
            .multipart(form)
            .send()
            .await?;

        if response.status() != StatusCode::OK {
            return Err(failed(backend_message(response).await));
        }
        Ok(())
    }

    /// Ends the session, revoking the refresh token where supported.
    ///
    /// The session is terminal afterwards.
    pub async fn logout(&mut self) -> Result<()> {
        let credentials = self.require("log out")?;
        let endpoint = self.partner.logout_endpoint().ok_or_else(|| {
            CloudError::LogoutFailed(format!("{} has no logout endpoint", self.partner.name))
        })?;

        let request = match endpoint {
            LogoutEndpoint::Revoke(url) => {
                let refresh_token = credentials.refresh_token.as_deref().ok_or_else(|| {
                    CloudError::LogoutFailed("no refresh token to revoke".to_string())
                })?;
                debug!(url, "revoking refresh token");
                self.http.client().post(url).form(&[
                    ("client_id", self.partner.client_id.as_str()),
                    ("token_type", "refresh_token"),
                    ("token", refresh_token),
                ])
            }
            LogoutEndpoint::Session(url) => {
                debug!(url, "logging out");
                self.http.client().post(url)
            }
        };

        let status = request.send().await?.status();
        if status != StatusCode::OK {
            return Err(CloudError::LogoutFailed(format!("HTTP {}", status)));
        }

        info!(partner = %self.partner.name, "logged out");
        self.state = SessionState::LoggedOut;
        Ok(())
    }

    /// Tears the session down: unregisters this client if it is registered,
    /// then logs out. Logout is attempted even when unregistering fails; the
    /// first error is returned.
    pub async fn close(&mut self) -> Result<()> {
        let unregistered = if self.state == SessionState::Registered {
            self.unregister(None).await
        } else {
            Ok(())
        };
        if let Err(err) = &unregistered {
            warn!("unregistering this client failed: {}", err);
        }

        let logged_out = self.logout().await;
        unregistered.and(logged_out)
    }

    fn invalid_state(&self, operation: &'static str) -> CloudError {
        CloudError::InvalidState {
            operation,
            state: self.state.as_str(),
        }
    }

    /// Credentials of an authenticated, not yet closed session.
    fn require(&self, operation: &'static str) -> Result<&Credentials> {
        match (self.state, &self.credentials) {
            (SessionState::Authenticated | SessionState::Registered, Some(credentials)) => {
                Ok(credentials)
            }
            _ => Err(self.invalid_state(operation)),
        }
    }

    /// Account entry of the device-management requests.
    fn account_entry(&self) -> Result<Value> {
        let credentials = self.require("address account")?;
        Ok(json!({
            "auth_token": credentials.access_token,
            "reseller_id": self.partner.id
        }))
    }

    /// Token, partner id and optionally hardware id headers.
    fn auth_headers(&self, with_hardware_id: bool) -> Result<HeaderMap> {
        let credentials = self.require("authorize request")?;

        let mut headers = HeaderMap::new();
        let token = HeaderValue::from_str(&credentials.access_token).map_err(|_| {
            CloudError::TokenExtractionFailed {
                partner: self.partner.name.clone(),
                reason: "token is not a valid header value".to_string(),
            }
        })?;
        headers.insert("t_auth_token", token);
        if with_hardware_id {
            let hardware_id = HeaderValue::from_str(self.hardware_id).map_err(|_| {
                CloudError::RegistrationFailed(format!(
                    "hardware id {:?} is not a valid header value",
                    self.hardware_id
                ))
            })?;
            headers.insert("hardware_id", hardware_id);
        }
        headers.insert(
            HeaderName::from_static(self.partner.backend.generation.partner_header()),
            HeaderValue::from(self.partner.id),
        );
        Ok(headers)
    }
}

/// Streams the response body into `file` through a fixed-size buffer.
async fn write_body(response: reqwest::Response, file: tokio::fs::File, path: &Path) -> Result<()> {
    let write_failed =
        |e: std::io::Error| CloudError::DownloadFailed(format!("{}: {}", path.display(), e));

    let mut writer = BufWriter::with_capacity(DOWNLOAD_CHUNK_SIZE, file);
    let mut stream = response.bytes_stream();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|e| CloudError::DownloadFailed(format!("transfer interrupted: {}", e)))?;
        writer.write_all(&chunk).await.map_err(write_failed)?;
    }
    writer.flush().await.map_err(write_failed)
}

fn file_name(path: &Path) -> Option<String> {
    path.file_name().map(|n| n.to_string_lossy().into_owned())
}

/// Fills both slots of the download-info template with the base64 id.
fn download_info_url(template: &str, document_id: &str) -> String {
    let encoded = STANDARD.encode(document_id.as_bytes());
    template.replacen("{}", &encoded, 2)
}

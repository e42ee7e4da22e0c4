//! Partner registry: the storefronts reselling access to the shared backend.
//!
//! Every partner describes how to log in on its own site and which backend
//! endpoints its accounts use. The login flow is chosen when the descriptor
//! is built, so the auth code never has to guess from missing fields.

use crate::error::{CloudError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Base URL of the shared backend.
const BOSH_REST: &str = "https://bosh.pageplace.de/bosh/rest";

/// Scope requested by the webshop-style partners.
const WEBSHOP_SCOPE: &str = "SCOPE_BOSH SCOPE_BUCHDE";

/// Immutable description of one partner storefront.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Partner {
    /// Numeric reseller id, also sent to the backend.
    pub id: u32,

    /// Display name used in messages.
    pub name: String,

    /// OAuth client id.
    pub client_id: String,

    /// Requested OAuth scope.
    pub scope: String,

    /// Account creation page, informational only.
    #[serde(default)]
    pub signup_url: Option<String>,

    /// Account profile page, informational only.
    #[serde(default)]
    pub profile_url: Option<String>,

    /// Credential form posted to the storefront.
    pub login: LoginForm,

    /// How the storefront turns a logged-in session into a bearer token.
    pub flow: AuthFlow,

    /// Backend endpoints used after login.
    #[serde(default)]
    pub backend: BoshEndpoints,
}

/// Field mapping of the storefront's login form.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoginForm {
    pub url: String,
    pub username_field: String,
    pub password_field: String,

    /// Static fields posted along with the credentials.
    #[serde(default)]
    pub extra: BTreeMap<String, String>,

    /// Cookie whose presence marks a successful login.
    pub cookie: String,
}

/// Login flow variant of a partner.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "variant", rename_all = "snake_case")]
pub enum AuthFlow {
    /// Cookie login, then the token is scraped from an announcement page.
    TokenScrape {
        /// Page embedding the base64 access token.
        tat_url: String,
        logout_url: String,
    },

    /// Cookie login followed by an OAuth2 authorization-code exchange.
    AuthorizationCode {
        /// Page that must be fetched before the credential POST is honored.
        #[serde(default)]
        login_form_url: Option<String>,

        /// Partner-specific skin/tenant query parameters.
        #[serde(default)]
        params: BTreeMap<String, String>,

        auth_url: String,
        token_url: String,
        redirect_uri: String,

        #[serde(default)]
        revoke_url: Option<String>,

        #[serde(default)]
        logout_url: Option<String>,
    },
}

impl AuthFlow {
    /// Short name for logs and listings.
    pub fn label(&self) -> &'static str {
        match self {
            AuthFlow::TokenScrape { .. } => "token scrape",
            AuthFlow::AuthorizationCode { .. } => "authorization code",
        }
    }
}

/// Where a session is closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogoutEndpoint<'a> {
    /// OAuth2 token revocation with the refresh token.
    Revoke(&'a str),
    /// Plain storefront session logout.
    Session(&'a str),
}

/// Backend generation, which decides header names and register payloads.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendGeneration {
    /// `m_id` header, `initAppRequest` registration.
    #[default]
    Legacy,
    /// `reseller_id` header, bare `hardware_name` registration.
    Current,
}

impl BackendGeneration {
    /// Name of the header carrying the partner id.
    pub fn partner_header(self) -> &'static str {
        match self {
            BackendGeneration::Legacy => "m_id",
            BackendGeneration::Current => "reseller_id",
        }
    }
}

/// Endpoints of the shared backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BoshEndpoints {
    pub generation: BackendGeneration,
    pub register_url: String,
    pub devices_url: String,
    pub unregister_url: String,
    pub upload_url: String,
    pub delete_url: String,
    pub inventory_url: String,

    /// Template with two `{}` slots, each filled with the base64 document id.
    pub download_info_url: String,

    pub meta_url: String,
    pub cover_url: String,
}

impl Default for BoshEndpoints {
    fn default() -> Self {
        Self {
            generation: BackendGeneration::Legacy,
            register_url: format!("{}/registerhw", BOSH_REST),
            devices_url: format!("{}/handshake/devices/list", BOSH_REST),
            unregister_url: format!("{}/handshake/devices/delete", BOSH_REST),
            upload_url: format!("{}/upload", BOSH_REST),
            delete_url: format!("{}/deletecontent", BOSH_REST),
            inventory_url: format!("{}/inventory/delta", BOSH_REST),
            download_info_url: format!(
                "{}//cloud/downloadinfo/{{}}/{{}}/type/external-download",
                BOSH_REST
            ),
            meta_url: format!("{}/meta", BOSH_REST),
            cover_url: format!("{}/cover", BOSH_REST),
        }
    }
}

impl BoshEndpoints {
    /// Rebases every endpoint onto another host, keeping the path layout.
    pub fn rooted_at(base: &str) -> Self {
        let base = base.trim_end_matches('/');
        Self {
            generation: BackendGeneration::Legacy,
            register_url: format!("{}/registerhw", base),
            devices_url: format!("{}/handshake/devices/list", base),
            unregister_url: format!("{}/handshake/devices/delete", base),
            upload_url: format!("{}/upload", base),
            delete_url: format!("{}/deletecontent", base),
            inventory_url: format!("{}/inventory/delta", base),
            download_info_url: format!("{}/cloud/downloadinfo/{{}}/{{}}/type/external-download", base),
            meta_url: format!("{}/meta", base),
            cover_url: format!("{}/cover", base),
        }
    }
}

impl Partner {
    /// Endpoint used to end the session, revocation preferred.
    pub fn logout_endpoint(&self) -> Option<LogoutEndpoint<'_>> {
        match &self.flow {
            AuthFlow::TokenScrape { logout_url, .. } => Some(LogoutEndpoint::Session(logout_url)),
            AuthFlow::AuthorizationCode {
                revoke_url,
                logout_url,
                ..
            } => revoke_url
                .as_deref()
                .map(LogoutEndpoint::Revoke)
                .or_else(|| logout_url.as_deref().map(LogoutEndpoint::Session)),
        }
    }

    /// Checks that every URL the partner's flow relies on is present.
    pub fn validate(&self) -> Result<()> {
        let invalid = |reason: &str| CloudError::InvalidPartner {
            id: self.id,
            reason: reason.to_string(),
        };

        if self.id == 0 {
            return Err(invalid("id 0 is reserved"));
        }
        if self.name.trim().is_empty() {
            return Err(invalid("name is empty"));
        }

        let mut required: Vec<(&str, &str)> = vec![
            ("login.url", self.login.url.as_str()),
            ("login.username_field", self.login.username_field.as_str()),
            ("login.password_field", self.login.password_field.as_str()),
            ("login.cookie", self.login.cookie.as_str()),
            ("backend.register_url", self.backend.register_url.as_str()),
            ("backend.devices_url", self.backend.devices_url.as_str()),
            ("backend.unregister_url", self.backend.unregister_url.as_str()),
            ("backend.upload_url", self.backend.upload_url.as_str()),
            ("backend.delete_url", self.backend.delete_url.as_str()),
            ("backend.inventory_url", self.backend.inventory_url.as_str()),
            ("backend.download_info_url", self.backend.download_info_url.as_str()),
            ("backend.meta_url", self.backend.meta_url.as_str()),
            ("backend.cover_url", self.backend.cover_url.as_str()),
        ];

        match &self.flow {
            AuthFlow::TokenScrape {
                tat_url,
                logout_url,
            } => {
                required.push(("flow.tat_url", tat_url.as_str()));
                required.push(("flow.logout_url", logout_url.as_str()));
            }
            AuthFlow::AuthorizationCode {
                login_form_url,
                auth_url,
                token_url,
                redirect_uri,
                ..
            } => {
                required.push(("client_id", self.client_id.as_str()));
                required.push(("scope", self.scope.as_str()));
                required.push(("flow.auth_url", auth_url.as_str()));
                required.push(("flow.token_url", token_url.as_str()));
                required.push(("flow.redirect_uri", redirect_uri.as_str()));
                if let Some(url) = login_form_url {
                    required.push(("flow.login_form_url", url.as_str()));
                }
            }
        }

        if let Some((field, _)) = required.iter().find(|(_, value)| value.trim().is_empty()) {
            return Err(invalid(&format!("{} is empty", field)));
        }

        match self.logout_endpoint() {
            Some(LogoutEndpoint::Revoke(url)) | Some(LogoutEndpoint::Session(url))
                if !url.trim().is_empty() =>
            {
                Ok(())
            }
            _ => Err(invalid("no logout or revoke URL")),
        }
    }
}

/// Webshop-style storefront (Thalia.de, Buch.de) on `ssl.<domain>`.
fn webshop_partner(id: u32, name: &str, domain: &str) -> Partner {
    let shop = format!("https://ssl.{}/shop/home", domain);
    Partner {
        id,
        name: name.to_string(),
        client_id: "webshop01".to_string(),
        scope: WEBSHOP_SCOPE.to_string(),
        signup_url: Some(format!("{}/kunde/neu/", shop)),
        profile_url: Some(format!("{}/kunde/", shop)),
        login: LoginForm {
            url: format!("{}/login/dologin/", shop),
            username_field: "username".to_string(),
            password_field: "password".to_string(),
            extra: BTreeMap::new(),
            cookie: "KUNDE".to_string(),
        },
        flow: AuthFlow::TokenScrape {
            tat_url: format!("{}/ebook/anzeigen/", shop),
            logout_url: format!("{}/login/logout/", shop),
        },
        backend: BoshEndpoints::default(),
    }
}

fn hugendubel() -> Partner {
    Partner {
        id: 13,
        name: "Hugendubel.de".to_string(),
        client_id: "4c20de744aa8b83b79b692524c7ec6ae".to_string(),
        scope: "ebook_library".to_string(),
        signup_url: Some("https://www.hugendubel.de/go/my_my/my_newRegistration/".to_string()),
        profile_url: Some("https://www.hugendubel.de/go/my_my/my_data/".to_string()),
        login: LoginForm {
            url: "https://www.hugendubel.de/go/my_dry/my_login/lfa/login/receiver_object/my_login/"
                .to_string(),
            username_field: "form[login]".to_string(),
            password_field: "form[password]".to_string(),
            extra: BTreeMap::from([("form_send".to_string(), "1".to_string())]),
            cookie: "shop[login]".to_string(),
        },
        flow: AuthFlow::AuthorizationCode {
            login_form_url: None,
            params: BTreeMap::new(),
            auth_url: "https://www.hugendubel.de/oauth2/authorize".to_string(),
            token_url: "https://api.hugendubel.de/rest/oauth2/token".to_string(),
            redirect_uri: "https://webreader.hugendubel.de/library/library.html#!/library"
                .to_string(),
            revoke_url: Some("https://api.hugendubel.de/rest/oauth2/revoke".to_string()),
            logout_url: None,
        },
        backend: BoshEndpoints::default(),
    }
}

/// Lookup table of partners, ordered by id.
#[derive(Debug, Clone)]
pub struct PartnerRegistry {
    partners: BTreeMap<u32, Partner>,
}

impl Default for PartnerRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}

impl PartnerRegistry {
    /// Creates the registry of partners known out of the box.
    pub fn builtin() -> Self {
        let partners = [
            webshop_partner(3, "Thalia.de", "thalia.de"),
            webshop_partner(6, "Buch.de", "buch.de"),
            hugendubel(),
        ];

        Self {
            partners: partners.into_iter().map(|p| (p.id, p)).collect(),
        }
    }

    /// Built-in partners plus custom ones; a custom partner replaces a
    /// built-in with the same id.
    pub fn with_custom(custom: impl IntoIterator<Item = Partner>) -> Result<Self> {
        let mut registry = Self::builtin();
        for partner in custom {
            partner.validate()?;
            registry.partners.insert(partner.id, partner);
        }
        Ok(registry)
    }

    /// Looks up a partner by id.
    pub fn get(&self, id: u32) -> Result<&Partner> {
        self.partners.get(&id).ok_or(CloudError::UnknownPartner(id))
    }

    /// Display name of a partner, if known.
    pub fn name_of(&self, id: u32) -> Option<&str> {
        self.partners.get(&id).map(|p| p.name.as_str())
    }

    /// Iterates partners sorted by id.
    pub fn iter(&self) -> impl Iterator<Item = &Partner> {
        self.partners.values()
    }

    pub fn len(&self) -> usize {
        self.partners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.partners.is_empty()
    }
}

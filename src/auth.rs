//! Partner login flows.
//!
//! Both flows start with the storefront's own login form and finish with a
//! bearer token for the shared backend:
//! - token scrape: the token is embedded, base64-encoded, in a storefront page;
//! - authorization code: a regular OAuth2 code exchange, redirects handled by hand.

use crate::error::{CloudError, Result};
use crate::http::HttpClients;
use crate::partners::{AuthFlow, Partner};
use crate::utils::lenient_i64;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use regex::Regex;
use reqwest::StatusCode;
use reqwest::header::{HeaderValue, LOCATION};
use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::LazyLock;
use tracing::debug;
use url::Url;

/// Token marker in the announcement page, e.g. `library.html?tat=VE9LRU4=#library`.
static TAT_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"[?&]tat=([^#&"'\s]+)#"#).unwrap());

/// Bearer credentials obtained from a partner login.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    pub partner_id: u32,
    pub access_token: String,
    /// Only issued by the authorization-code flow.
    pub refresh_token: Option<String>,
    /// Token lifetime in seconds, when announced.
    pub expires_in: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: Option<String>,
    refresh_token: Option<String>,
    #[serde(default)]
    expires_in: Value,
}

/// Logs in to the partner storefront and obtains backend credentials.
pub(crate) async fn login(
    http: &HttpClients,
    partner: &Partner,
    username: &str,
    password: &str,
) -> Result<Credentials> {
    debug!(partner = %partner.name, flow = partner.flow.label(), "logging in");

    match &partner.flow {
        AuthFlow::TokenScrape { tat_url, .. } => {
            post_credentials(http, partner, username, password).await?;
            scrape_token(http, partner, tat_url).await
        }
        AuthFlow::AuthorizationCode {
            login_form_url,
            params,
            auth_url,
            token_url,
            redirect_uri,
            ..
        } => {
            let oauth = oauth_params(partner, redirect_uri, params);
            if let Some(url) = login_form_url {
                prime_login_form(http, partner, url, &oauth).await?;
            }
            post_credentials(http, partner, username, password).await?;
            let code = request_code(http, partner, auth_url, &oauth).await?;
            exchange_code(http, partner, token_url, redirect_uri, &code).await
        }
    }
}

/// Query parameters of the authorize request.
fn oauth_params(
    partner: &Partner,
    redirect_uri: &str,
    extra: &BTreeMap<String, String>,
) -> Vec<(String, String)> {
    let mut params = vec![
        ("client_id".to_string(), partner.client_id.clone()),
        ("response_type".to_string(), "code".to_string()),
        ("scope".to_string(), partner.scope.clone()),
        ("redirect_uri".to_string(), redirect_uri.to_string()),
    ];
    params.extend(extra.iter().map(|(k, v)| (k.clone(), v.clone())));
    params
}

fn auth_failed(partner: &Partner) -> CloudError {
    CloudError::AuthenticationFailed {
        partner: partner.name.clone(),
    }
}

/// Opens the login page so the storefront sets up its session.
async fn prime_login_form(
    http: &HttpClients,
    partner: &Partner,
    url: &str,
    oauth: &[(String, String)],
) -> Result<()> {
    debug!(url, "fetching login form");
    let response = http.client().get(url).query(oauth).send().await?;
    if response.status() != StatusCode::OK {
        debug!(status = response.status().as_u16(), "login form request rejected");
        return Err(auth_failed(partner));
    }
    Ok(())
}

/// Posts the credentials; success is signalled by the partner's login cookie.
async fn post_credentials(
    http: &HttpClients,
    partner: &Partner,
    username: &str,
    password: &str,
) -> Result<()> {
    let login = &partner.login;
    let mut form: Vec<(&str, &str)> = login
        .extra
        .iter()
        .map(|(k, v)| (k.as_str(), v.as_str()))
        .collect();
    form.push((login.username_field.as_str(), username));
    form.push((login.password_field.as_str(), password));

    debug!(url = %login.url, "posting credentials");
    let response = http.client().post(&login.url).form(&form).send().await?;
    let status = response.status();
    if status != StatusCode::OK {
        debug!(status = status.as_u16(), "credential post rejected");
        return Err(auth_failed(partner));
    }

    if !http.has_cookie(&login.cookie) {
        debug!(cookie = %login.cookie, "login cookie missing");
        return Err(auth_failed(partner));
    }

    Ok(())
}

/// Reads the access token from the token-announcement page.
async fn scrape_token(http: &HttpClients, partner: &Partner, tat_url: &str) -> Result<Credentials> {
    let failed = |reason: String| CloudError::TokenExtractionFailed {
        partner: partner.name.clone(),
        reason,
    };

    debug!(url = tat_url, "fetching token announcement");
    let response = http.client().get(tat_url).send().await?;
    let status = response.status();
    if status != StatusCode::OK {
        return Err(failed(format!("HTTP {}", status)));
    }

    let page = response.text().await?;
    let access_token = extract_tat(&page).map_err(failed)?;

    Ok(Credentials {
        partner_id: partner.id,
        access_token,
        refresh_token: None,
        expires_in: None,
    })
}

/// Finds and decodes the base64 token embedded in `page`.
fn extract_tat(page: &str) -> std::result::Result<String, String> {
    let encoded = TAT_PATTERN
        .captures(page)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str())
        .ok_or_else(|| "token marker not found".to_string())?;

    let bytes = STANDARD
        .decode(encoded)
        .map_err(|e| format!("token is not base64: {}", e))?;
    let token = String::from_utf8(bytes).map_err(|_| "token is not UTF-8".to_string())?;
    header_safe(token)
}

/// Tokens travel in request headers; anything a header cannot carry is rejected.
fn header_safe(token: String) -> std::result::Result<String, String> {
    if token.is_empty() || HeaderValue::from_str(&token).is_err() {
        return Err("token is not a valid header value".to_string());
    }
    Ok(token)
}

/// Requests an authorization code and reads it from the redirect.
async fn request_code(
    http: &HttpClients,
    partner: &Partner,
    auth_url: &str,
    oauth: &[(String, String)],
) -> Result<String> {
    debug!(url = auth_url, "requesting authorization code");
    let response = http.direct().get(auth_url).query(oauth).send().await?;
    debug!(status = response.status().as_u16(), "authorize answered");

    response
        .headers()
        .get(LOCATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|location| code_from_location(auth_url, location))
        .ok_or_else(|| CloudError::AuthorizationCodeMissing {
            partner: partner.name.clone(),
        })
}

/// Extracts the `code` query parameter; relative locations resolve against `base`.
fn code_from_location(base: &str, location: &str) -> Option<String> {
    let target = Url::parse(base).ok()?.join(location).ok()?;
    target
        .query_pairs()
        .find(|(key, _)| key == "code")
        .map(|(_, value)| value.into_owned())
        .filter(|code| !code.is_empty())
}

/// Trades the authorization code for access and refresh tokens.
async fn exchange_code(
    http: &HttpClients,
    partner: &Partner,
    token_url: &str,
    redirect_uri: &str,
    code: &str,
) -> Result<Credentials> {
    let failed = |reason: String| CloudError::TokenExchangeFailed {
        partner: partner.name.clone(),
        reason,
    };

    let form = [
        ("client_id", partner.client_id.as_str()),
        ("grant_type", "authorization_code"),
        ("code", code),
        ("scope", partner.scope.as_str()),
        ("redirect_uri", redirect_uri),
    ];

    debug!(url = token_url, "exchanging authorization code");
    let response = http.direct().post(token_url).form(&form).send().await?;
    let status = response.status();
    if status != StatusCode::OK {
        return Err(failed(format!("HTTP {}", status)));
    }

    let body = response.bytes().await?;
    let token: TokenResponse =
        serde_json::from_slice(&body).map_err(|e| failed(e.to_string()))?;

    let access_token = token
        .access_token
        .ok_or_else(|| failed("missing access_token".to_string()))
        .and_then(|t| header_safe(t).map_err(failed))?;
    let refresh_token = token
        .refresh_token
        .ok_or_else(|| failed("missing refresh_token".to_string()))?;
    let expires_in = lenient_i64(&token.expires_in)
        .and_then(|secs| u64::try_from(secs).ok())
        .ok_or_else(|| failed("missing expires_in".to_string()))?;

    Ok(Credentials {
        partner_id: partner.id,
        access_token,
        refresh_token: Some(refresh_token),
        expires_in: Some(expires_in),
    })
}

//! HTTP transport shared by the auth flows and the cloud session.
//!
//! Two clients share one cookie jar: the default one follows redirects,
//! the other leaves them to the caller so a `Location` header can be read.

use crate::config::HttpConfig;
use crate::error::Result;
use reqwest::cookie::{CookieStore, Jar};
use reqwest::header::HeaderValue;
use reqwest::redirect::Policy;
use reqwest::{Client, Url};
use std::collections::BTreeSet;
use std::sync::{Arc, RwLock};
use std::time::Duration;

/// Cookie jar that also remembers which cookie names the session holds,
/// whatever host or path they were scoped to.
#[derive(Debug, Default)]
pub struct SessionJar {
    jar: Jar,
    names: RwLock<BTreeSet<String>>,
}

impl SessionJar {
    pub fn contains(&self, name: &str) -> bool {
        self.names
            .read()
            .map(|names| names.contains(name))
            .unwrap_or(false)
    }
}

impl CookieStore for SessionJar {
    fn set_cookies(&self, cookie_headers: &mut dyn Iterator<Item = &HeaderValue>, url: &Url) {
        let headers: Vec<&HeaderValue> = cookie_headers.collect();

        if let Ok(mut names) = self.names.write() {
            for header in headers.iter().filter_map(|h| h.to_str().ok()) {
                match parse_set_cookie(header) {
                    Some((name, true)) => names.insert(name.to_string()),
                    Some((name, false)) => names.remove(name),
                    None => false,
                };
            }
        }

        self.jar.set_cookies(&mut headers.into_iter(), url);
    }

    fn cookies(&self, url: &Url) -> Option<HeaderValue> {
        self.jar.cookies(url)
    }
}

/// Name of a `Set-Cookie` value and whether it stores (rather than deletes)
/// the cookie.
fn parse_set_cookie(header: &str) -> Option<(&str, bool)> {
    let mut parts = header.split(';');
    let (name, _) = parts.next()?.split_once('=')?;
    let name = name.trim();
    if name.is_empty() {
        return None;
    }

    let deleted = parts.any(|attr| {
        attr.trim()
            .split_once('=')
            .filter(|(key, _)| key.trim().eq_ignore_ascii_case("max-age"))
            .and_then(|(_, value)| value.trim().parse::<i64>().ok())
            .is_some_and(|age| age <= 0)
    });
    Some((name, !deleted))
}

/// Cookie-carrying HTTP clients for one session.
#[derive(Debug, Clone)]
pub struct HttpClients {
    jar: Arc<SessionJar>,
    client: Client,
    direct: Client,
}

impl HttpClients {
    /// Builds both clients from the configured user agent and timeout.
    pub fn new(config: &HttpConfig) -> Result<Self> {
        let jar = Arc::new(SessionJar::default());
        let client = build_client(config, jar.clone(), Policy::default())?;
        let direct = build_client(config, jar.clone(), Policy::none())?;

        Ok(Self {
            jar,
            client,
            direct,
        })
    }

    /// Client that follows redirects.
    pub fn client(&self) -> &Client {
        &self.client
    }

    /// Client that returns redirect responses untouched.
    pub fn direct(&self) -> &Client {
        &self.direct
    }

    /// Whether any response so far has left a cookie named `name` in the session.
    pub fn has_cookie(&self, name: &str) -> bool {
        self.jar.contains(name)
    }
}

fn build_client(config: &HttpConfig, jar: Arc<SessionJar>, policy: Policy) -> Result<Client> {
    let client = Client::builder()
        .user_agent(config.user_agent.as_str())
        .cookie_provider(jar)
        .redirect(policy)
        .timeout(Duration::from_secs(config.timeout_sec))
        .build()?;
    Ok(client)
}

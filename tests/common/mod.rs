//! In-process mock of the partner storefronts and the shared backend.

#![allow(dead_code)]

use axum::body::Bytes;
use axum::extract::{Form, Path, Query, State};
use axum::http::{HeaderMap, StatusCode, Uri, header};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde_json::{Value, json};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tolino::config::HttpConfig;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tolino::{AuthFlow, BackendGeneration, BoshEndpoints, CloudSession, LoginForm, Partner};

pub const USER: &str = "reader@example.com";
pub const PASSWORD: &str = "secret";
pub const SCRAPED_TOKEN: &str = "TOKEN-A";
pub const UPLOADED_ID: &str = "DOC-1";
pub const REDIRECT_URI: &str = "https://reader.example/library/index.html";

/// Document whose content URL answers 404 with a backend error body.
pub const MISSING_FILE_ID: &str = "DOC-MISSING";
/// Document whose content URL answers 500 with a plain-text body.
pub const BROKEN_FILE_ID: &str = "DOC-BROKEN";
/// Document whose content transfer is cut off mid-body.
pub const TRUNCATED_ID: &str = "DOC-PARTIAL";

/// Request captured by a mock handler.
#[derive(Debug, Clone)]
pub struct Seen {
    pub uri: String,
    pub headers: HeaderMap,
    pub body: String,
}

impl Seen {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    pub fn json(&self) -> Value {
        serde_json::from_str(&self.body).unwrap()
    }
}

#[derive(Debug)]
pub struct MockState {
    pub base: String,
    /// Server announcing a longer body than it sends.
    pub truncating_base: String,
    pub broken_inventory: AtomicBool,
    failing: Mutex<HashSet<String>>,
    seen: Mutex<Vec<Seen>>,
}

impl MockState {
    /// Makes the route at `path` answer 500 from now on.
    pub fn fail(&self, path: &str) {
        self.failing.lock().unwrap().insert(path.to_string());
    }

    fn fails(&self, uri: &Uri) -> bool {
        self.failing.lock().unwrap().contains(uri.path())
    }

    fn record(&self, uri: &Uri, headers: &HeaderMap, body: &[u8]) {
        self.seen.lock().unwrap().push(Seen {
            uri: uri.to_string(),
            headers: headers.clone(),
            body: String::from_utf8_lossy(body).into_owned(),
        });
    }

    /// Requests whose path starts with `prefix`.
    pub fn seen(&self, prefix: &str) -> Vec<Seen> {
        self.seen
            .lock()
            .unwrap()
            .iter()
            .filter(|s| s.uri.starts_with(prefix))
            .cloned()
            .collect()
    }
}

/// Starts the mock on a free local port.
pub async fn spawn() -> Arc<MockState> {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let base = format!("http://{}", listener.local_addr().unwrap());
    let state = Arc::new(MockState {
        base,
        truncating_base: spawn_truncating().await,
        broken_inventory: AtomicBool::new(false),
        failing: Mutex::new(HashSet::new()),
        seen: Mutex::new(Vec::new()),
    });

    let app = router(state.clone());
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    state
}

/// Raw server that promises 100000 bytes, sends 3000 and hangs up.
async fn spawn_truncating() -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let base = format!("http://{}", listener.local_addr().unwrap());

    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            let mut request = Vec::new();
            let mut buf = [0u8; 1024];
            while !request.windows(4).any(|w| w == b"\r\n\r\n") {
                match socket.read(&mut buf).await {
                    Ok(0) | Err(_) => break,
                    Ok(n) => request.extend_from_slice(&buf[..n]),
                }
            }
            let head = "HTTP/1.1 200 OK\r\nContent-Type: application/epub+zip\r\nContent-Length: 100000\r\n\r\n";
            let _ = socket.write_all(head.as_bytes()).await;
            let _ = socket.write_all(&book_bytes()[..3000]).await;
            let _ = socket.shutdown().await;
        }
    });
    base
}

pub fn http_config() -> HttpConfig {
    HttpConfig {
        timeout_sec: 10,
        ..HttpConfig::default()
    }
}

/// Webshop-style partner logging in through the token-announcement page.
pub fn token_scrape_partner(base: &str) -> Partner {
    Partner {
        id: 3,
        name: "Mock Thalia".to_string(),
        client_id: "webshop01".to_string(),
        scope: "SCOPE_BOSH SCOPE_BUCHDE".to_string(),
        signup_url: None,
        profile_url: None,
        login: LoginForm {
            url: format!("{}/shop/login", base),
            username_field: "username".to_string(),
            password_field: "password".to_string(),
            extra: BTreeMap::new(),
            cookie: "KUNDE".to_string(),
        },
        flow: AuthFlow::TokenScrape {
            tat_url: format!("{}/shop/tat", base),
            logout_url: format!("{}/shop/logout", base),
        },
        backend: BoshEndpoints::rooted_at(&format!("{}/bosh", base)),
    }
}

/// OAuth partner; `primed` adds the login-form step and the current backend.
pub fn auth_code_partner(base: &str, primed: bool) -> Partner {
    let mut backend = BoshEndpoints::rooted_at(&format!("{}/bosh", base));
    let mut params = BTreeMap::new();
    let login_path = if primed {
        backend.generation = BackendGeneration::Current;
        params.insert("x_buchde.skin_id".to_string(), "17".to_string());
        "oauth/login-primed"
    } else {
        "oauth/login"
    };

    Partner {
        id: 13,
        name: "Mock Hugendubel".to_string(),
        client_id: "webreader".to_string(),
        scope: "ebook_library".to_string(),
        signup_url: None,
        profile_url: None,
        login: LoginForm {
            url: format!("{}/{}", base, login_path),
            username_field: "form[login]".to_string(),
            password_field: "form[password]".to_string(),
            extra: BTreeMap::from([("form_send".to_string(), "1".to_string())]),
            cookie: "shop_login".to_string(),
        },
        flow: AuthFlow::AuthorizationCode {
            login_form_url: primed.then(|| format!("{}/oauth/form", base)),
            params,
            auth_url: format!("{}/oauth/authorize", base),
            token_url: format!("{}/oauth/token", base),
            redirect_uri: REDIRECT_URI.to_string(),
            revoke_url: Some(format!("{}/oauth/revoke", base)),
            logout_url: None,
        },
        backend,
    }
}

/// Session already logged in with the default credentials.
pub async fn logged_in(partner: &Partner) -> CloudSession<'_> {
    let mut session = CloudSession::new(partner, tolino::hardware_id(), &http_config()).unwrap();
    session.login(USER, PASSWORD).await.unwrap();
    session
}

/// Deterministic content served for downloads.
pub fn book_bytes() -> Vec<u8> {
    (0..5000u32).map(|i| (i % 251) as u8).collect()
}

fn router(state: Arc<MockState>) -> Router {
    Router::new()
        .route("/shop/login", post(shop_login))
        .route("/shop/login-scoped", post(shop_login_scoped))
        .route("/account/tat", get(shop_tat))
        .route("/shop/tat", get(shop_tat))
        .route("/shop/no-tat", get(|| async { "<html>no token here</html>" }))
        .route("/shop/logout", post(shop_logout))
        .route("/oauth/form", get(oauth_form))
        .route("/oauth/login", post(oauth_login))
        .route("/oauth/login-primed", post(oauth_login_primed))
        .route("/oauth/authorize", get(oauth_authorize))
        .route("/oauth/token", post(oauth_token))
        .route("/oauth/token-broken", post(|| async { StatusCode::INTERNAL_SERVER_ERROR }))
        .route("/oauth/revoke", post(oauth_revoke))
        .route("/bosh/registerhw", post(register))
        .route("/bosh/handshake/devices/list", post(devices_list))
        .route("/bosh/handshake/devices/delete", post(devices_delete))
        .route("/bosh/inventory/delta", get(inventory))
        .route("/bosh/upload", post(upload))
        .route("/bosh/deletecontent", get(delete_content))
        .route(
            "/bosh/cloud/downloadinfo/{first}/{second}/type/external-download",
            get(download_info),
        )
        .route("/files/{name}", get(file))
        .route("/bosh/meta", get(meta_get).put(meta_put))
        .route("/bosh/cover", post(cover))
        .with_state(state)
}

fn has_cookie(headers: &HeaderMap, cookie: &str) -> bool {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .any(|v| v.split(';').any(|pair| pair.trim() == cookie))
}

fn valid_credentials(form: &HashMap<String, String>, user_field: &str, pass_field: &str) -> bool {
    form.get(user_field).map(String::as_str) == Some(USER)
        && form.get(pass_field).map(String::as_str) == Some(PASSWORD)
}

fn error_body(status: StatusCode, message: &str) -> Response {
    (status, Json(json!({"ResponseInfo": {"message": message}}))).into_response()
}

async fn shop_login(Form(form): Form<HashMap<String, String>>) -> Response {
    if valid_credentials(&form, "username", "password") {
        ([(header::SET_COOKIE, "KUNDE=4711; Path=/")], "welcome").into_response()
    } else {
        "login failed".into_response()
    }
}

async fn shop_login_scoped(Form(form): Form<HashMap<String, String>>) -> Response {
    if valid_credentials(&form, "username", "password") {
        ([(header::SET_COOKIE, "KUNDE=4711; Path=/account")], "welcome").into_response()
    } else {
        "login failed".into_response()
    }
}

async fn shop_tat(headers: HeaderMap) -> Response {
    if !has_cookie(&headers, "KUNDE=4711") {
        return StatusCode::FORBIDDEN.into_response();
    }
    let encoded = STANDARD.encode(SCRAPED_TOKEN);
    format!(
        "<script>window.location.href='https://reader.example/library.html?lang=de&tat={}#library';</script>",
        encoded
    )
    .into_response()
}

async fn shop_logout(State(state): State<Arc<MockState>>, uri: Uri, headers: HeaderMap) -> StatusCode {
    state.record(&uri, &headers, b"");
    if state.fails(&uri) {
        return StatusCode::INTERNAL_SERVER_ERROR;
    }
    if has_cookie(&headers, "KUNDE=4711") {
        StatusCode::OK
    } else {
        StatusCode::UNAUTHORIZED
    }
}

async fn oauth_form(State(state): State<Arc<MockState>>, uri: Uri, headers: HeaderMap) -> Response {
    state.record(&uri, &headers, b"");
    ([(header::SET_COOKIE, "FORM_SESSION=1; Path=/")], "<form></form>").into_response()
}

fn oauth_login_response(form: &HashMap<String, String>) -> Response {
    if form.get("form_send").map(String::as_str) == Some("1")
        && valid_credentials(form, "form[login]", "form[password]")
    {
        ([(header::SET_COOKIE, "shop_login=1; Path=/")], "welcome").into_response()
    } else {
        "login failed".into_response()
    }
}

async fn oauth_login(Form(form): Form<HashMap<String, String>>) -> Response {
    oauth_login_response(&form)
}

async fn oauth_login_primed(headers: HeaderMap, Form(form): Form<HashMap<String, String>>) -> Response {
    if !has_cookie(&headers, "FORM_SESSION=1") {
        return "session expired".into_response();
    }
    oauth_login_response(&form)
}

async fn oauth_authorize(headers: HeaderMap, Query(query): Query<HashMap<String, String>>) -> Response {
    let accepted = has_cookie(&headers, "shop_login=1")
        && query.get("client_id").map(String::as_str) == Some("webreader")
        && query.get("response_type").map(String::as_str) == Some("code")
        && query.get("redirect_uri").map(String::as_str) == Some(REDIRECT_URI);

    let location = if accepted {
        format!("{}?code=ABC123", REDIRECT_URI)
    } else {
        "https://reader.example/login?error=access_denied".to_string()
    };
    (StatusCode::FOUND, [(header::LOCATION, location)]).into_response()
}

async fn oauth_token(Form(form): Form<HashMap<String, String>>) -> Response {
    let valid = form.get("grant_type").map(String::as_str) == Some("authorization_code")
        && form.get("code").map(String::as_str) == Some("ABC123")
        && form.get("client_id").map(String::as_str) == Some("webreader");
    if valid {
        Json(json!({"access_token": "T", "refresh_token": "R", "expires_in": "3600"})).into_response()
    } else {
        (StatusCode::BAD_REQUEST, Json(json!({"error": "invalid_grant"}))).into_response()
    }
}

async fn oauth_revoke(
    State(state): State<Arc<MockState>>,
    uri: Uri,
    headers: HeaderMap,
    Form(form): Form<HashMap<String, String>>,
) -> StatusCode {
    state.record(&uri, &headers, b"");
    if form.get("token").map(String::as_str) == Some("R")
        && form.get("token_type").map(String::as_str) == Some("refresh_token")
    {
        StatusCode::OK
    } else {
        StatusCode::BAD_REQUEST
    }
}

async fn register(
    State(state): State<Arc<MockState>>,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    state.record(&uri, &headers, &body);
    if state.fails(&uri) {
        return StatusCode::INTERNAL_SERVER_ERROR.into_response();
    }
    if headers.contains_key("t_auth_token") && headers.contains_key("hardware_id") {
        Json(json!({})).into_response()
    } else {
        StatusCode::UNAUTHORIZED.into_response()
    }
}

async fn devices_list(State(state): State<Arc<MockState>>, uri: Uri, headers: HeaderMap, body: Bytes) -> Response {
    state.record(&uri, &headers, &body);
    if state.fails(&uri) {
        return StatusCode::INTERNAL_SERVER_ERROR.into_response();
    }
    Json(json!({
        "deviceListResponse": {
            "devices": [
                {
                    "deviceId": tolino::hardware_id(),
                    "deviceName": "other",
                    "deviceType": "HTML5_1",
                    "resellerId": "3",
                    "deviceRegistered": "1400000000000",
                    "deviceLastUsage": 1400000500000i64
                },
                {
                    "deviceId": "READER-1",
                    "deviceName": "Living room",
                    "deviceType": "unknown_imx50_rdp_1",
                    "resellerId": 13,
                    "deviceRegistered": 1300000000000i64,
                    "deviceLastUsage": 1400000000000i64
                }
            ]
        }
    }))
    .into_response()
}

async fn devices_delete(State(state): State<Arc<MockState>>, uri: Uri, headers: HeaderMap, body: Bytes) -> Response {
    state.record(&uri, &headers, &body);
    if state.fails(&uri) {
        return error_body(StatusCode::INTERNAL_SERVER_ERROR, "backend unavailable");
    }
    let request: Value = serde_json::from_slice(&body).unwrap_or(Value::Null);
    let device = request["deleteDevicesRequest"]["devices"][0]["device_id"]
        .as_str()
        .unwrap_or_default();
    match device {
        "UNKNOWN-DEVICE" => error_body(StatusCode::NOT_FOUND, "device not found"),
        "" => StatusCode::BAD_REQUEST.into_response(),
        _ => Json(json!({})).into_response(),
    }
}

fn inventory_item(kind: &str, id: &str, purchased: Option<i64>) -> Value {
    let mut deliverable = json!({"contentFormat": "application/epub+zip"});
    if let Some(purchased) = purchased {
        deliverable["purchased"] = json!(purchased);
    }
    json!({
        "resellerId": 3,
        "epubMetaData": {
            "identifier": id,
            "title": format!("Book {}", id),
            "subtitle": "",
            "author": [{"name": "Jane Doe"}, {"name": ""}],
            "deliverable": [deliverable],
            "type": kind,
            "issued": null
        }
    })
}

async fn inventory(
    State(state): State<Arc<MockState>>,
    uri: Uri,
    headers: HeaderMap,
    Query(query): Query<HashMap<String, String>>,
) -> Response {
    state.record(&uri, &headers, b"");
    if query.get("strip").map(String::as_str) != Some("true") {
        return StatusCode::BAD_REQUEST.into_response();
    }
    let purchased = if state.broken_inventory.load(Ordering::SeqCst) {
        None
    } else {
        Some(1400000000000)
    };
    Json(json!({
        "PublicationInventory": {
            "edata": [inventory_item("edata", "E-1", Some(1300000000000))],
            "ebook": [inventory_item("ebook", "B-1", purchased)]
        }
    }))
    .into_response()
}

fn is_multipart_with(headers: &HeaderMap, body: &[u8], fields: &[&str]) -> bool {
    let multipart = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.starts_with("multipart/form-data"));
    let text = String::from_utf8_lossy(body);
    multipart
        && fields
            .iter()
            .all(|field| text.contains(&format!("name=\"{}\"", field)))
}

async fn upload(State(state): State<Arc<MockState>>, uri: Uri, headers: HeaderMap, body: Bytes) -> Response {
    state.record(&uri, &headers, &body);
    if is_multipart_with(&headers, &body, &["file"]) {
        Json(json!({"metadata": {"deliverableId": UPLOADED_ID}})).into_response()
    } else {
        StatusCode::BAD_REQUEST.into_response()
    }
}

async fn delete_content(Query(query): Query<HashMap<String, String>>) -> Response {
    match query.get("deliverableId").map(String::as_str) {
        Some(UPLOADED_ID) => Json(json!({})).into_response(),
        Some("LOCKED") => error_body(StatusCode::FORBIDDEN, "document is locked"),
        _ => (StatusCode::INTERNAL_SERVER_ERROR, "internal error").into_response(),
    }
}

async fn download_info(
    State(state): State<Arc<MockState>>,
    Path((first, second)): Path<(String, String)>,
) -> Response {
    let decoded = STANDARD
        .decode(&first)
        .ok()
        .and_then(|bytes| String::from_utf8(bytes).ok());
    if first != second {
        return error_body(StatusCode::BAD_REQUEST, "id mismatch");
    }
    let content_url = match decoded.as_deref() {
        Some(UPLOADED_ID) => format!("{}/files/My_Book.epub", state.base),
        Some(MISSING_FILE_ID) => format!("{}/files/Missing.epub", state.base),
        Some(BROKEN_FILE_ID) => format!("{}/files/Broken.epub", state.base),
        Some(TRUNCATED_ID) => format!("{}/Part.epub", state.truncating_base),
        _ => return error_body(StatusCode::NOT_FOUND, "unknown document"),
    };
    Json(json!({"DownloadInfo": {"contentUrl": content_url, "format": "EPUB"}})).into_response()
}

async fn file(headers: HeaderMap, Path(name): Path<String>) -> Response {
    if !headers.contains_key("t_auth_token") {
        return error_body(StatusCode::UNAUTHORIZED, "not authorized");
    }
    match name.as_str() {
        "My_Book.epub" => book_bytes().into_response(),
        "Broken.epub" => (StatusCode::INTERNAL_SERVER_ERROR, "internal error").into_response(),
        _ => error_body(StatusCode::NOT_FOUND, "file not found"),
    }
}

async fn meta_get(
    State(state): State<Arc<MockState>>,
    uri: Uri,
    headers: HeaderMap,
    Query(query): Query<HashMap<String, String>>,
) -> Response {
    state.record(&uri, &headers, b"");
    match query.get("deliverableId").map(String::as_str) {
        Some(UPLOADED_ID) => Json(json!({
            "deliverableId": UPLOADED_ID,
            "metadata": {"title": "Old title", "language": "de"}
        }))
        .into_response(),
        _ => error_body(StatusCode::NOT_FOUND, "unknown document"),
    }
}

async fn meta_put(State(state): State<Arc<MockState>>, uri: Uri, headers: HeaderMap, body: Bytes) -> StatusCode {
    state.record(&uri, &headers, &body);
    StatusCode::OK
}

async fn cover(State(state): State<Arc<MockState>>, uri: Uri, headers: HeaderMap, body: Bytes) -> Response {
    state.record(&uri, &headers, &body);
    if is_multipart_with(&headers, &body, &["file", "deliverableId"]) {
        Json(json!({})).into_response()
    } else {
        StatusCode::BAD_REQUEST.into_response()
    }
}

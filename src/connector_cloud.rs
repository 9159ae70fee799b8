//! Kindle Cloud notebook connector.
//!
//! Retrieves highlights from the cloud reader's notebook service in two steps:
//!
//! 1. `GET <base>/notebook` with the user's cookies, to obtain a CSRF token
//!    (from a `csrf-token` cookie or an `x-amzn-csrf-token` header).
//! 2. `POST <base>/notebook/api/annotations` with
//!    `{"maxResults": n, "pageToken": "..."}`, repeated until the response
//!    carries no continuation token.
//!
//! Pages are fetched lazily by [`CloudHighlights`]; the first failure ends the
//! iteration. There is no retry. Response items are read through a tolerant
//! field policy because the payload shape varies between regions and API
//! revisions: each field has several candidate keys, checked on the item and
//! then one level down inside any object-valued field.
//!
//! # Configuration
//!
//! ```json
//! "cloud": {
//!   "enabled": true,
//!   "email": "reader@example.com",
//!   "region": "uk",
//!   "cookie_path": "~/.config/kvault/cookies.txt",
//!   "page_size": 100,
//!   "timeout_secs": 30
//! }
//! ```
//!
//! The cookie file is either a JSON object of `name → value` (optionally
//! wrapped as `{"cookies": {...}}`) or a raw `Cookie` header string
//! (`session-id=abc; ubid-main=def`).

use anyhow::Result;
use serde_json::{Map, Value};
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::config::CloudConfig;
use crate::models::{Highlight, SourceTag};
use crate::traits::{Connector, SourceStatus};

const TEXT_KEYS: &[&str] = &[
    "highlight",
    "highlightText",
    "text",
    "annotationText",
    "highlight_text",
];
const TITLE_KEYS: &[&str] = &["title", "bookTitle", "book_title"];
const LOCATION_KEYS: &[&str] = &[
    "location",
    "highlightLocation",
    "annotationLocation",
    "locationText",
];
const NOTE_KEYS: &[&str] = &["note", "noteText", "annotationNote"];

const CSRF_COOKIE: &str = "csrf-token";
const CSRF_HEADER: &str = "x-amzn-csrf-token";

/// Failure while talking to the cloud notebook service.
///
/// Callers can downcast an `anyhow::Error` to this type to report a failed
/// cloud source without aborting the whole run.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("Kindle Cloud request{} failed with status code {}", for_account(.email), .status)]
    Status { status: u16, email: Option<String> },

    #[error("Unable to locate CSRF token required for Kindle Cloud requests")]
    MissingCsrfToken,

    #[error("Received invalid JSON from Kindle Cloud API: {0}")]
    InvalidJson(String),

    #[error("Unexpected response format from Kindle Cloud API")]
    UnexpectedShape,

    #[error("Kindle Cloud transport error: {0}")]
    Transport(String),

    #[error("Failed to read cookie file {}: {}", .path.display(), .source)]
    CookieFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

fn for_account(email: &Option<String>) -> String {
    match email {
        Some(email) => format!(" for {}", email),
        None => String::new(),
    }
}

// ============ Transport ============

/// A response as seen by the fetcher.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: String,
}

impl HttpResponse {
    /// First header value with the given name (case-insensitive).
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// `name=value` pairs from every `Set-Cookie` header.
    pub fn set_cookies(&self) -> Vec<(String, String)> {
        self.headers
            .iter()
            .filter(|(k, _)| k.eq_ignore_ascii_case("set-cookie"))
            .filter_map(|(_, v)| {
                let pair = v.split(';').next()?;
                let (name, value) = pair.split_once('=')?;
                Some((name.trim().to_string(), value.trim().to_string()))
            })
            .collect()
    }
}

/// Blocking HTTP seam. The production implementation is [`ReqwestTransport`];
/// tests substitute a scripted one.
pub trait HttpTransport: Send {
    fn get(&self, url: &str, headers: &[(String, String)]) -> Result<HttpResponse, FetchError>;

    fn post_json(
        &self,
        url: &str,
        body: &Value,
        headers: &[(String, String)],
    ) -> Result<HttpResponse, FetchError>;
}

pub struct ReqwestTransport {
    client: reqwest::blocking::Client,
}

impl ReqwestTransport {
    /// Build a client. `timeout` of `None` keeps the client default.
    pub fn new(timeout: Option<Duration>) -> Result<Self, FetchError> {
        let mut builder = reqwest::blocking::Client::builder();
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }
        let client = builder
            .build()
            .map_err(|e| FetchError::Transport(e.to_string()))?;
        Ok(Self { client })
    }

    fn send(&self, request: reqwest::blocking::RequestBuilder) -> Result<HttpResponse, FetchError> {
        let response = request
            .send()
            .map_err(|e| FetchError::Transport(e.to_string()))?;
        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .map(|(k, v)| {
                (
                    k.as_str().to_string(),
                    v.to_str().unwrap_or_default().to_string(),
                )
            })
            .collect();
        let body = response
            .text()
            .map_err(|e| FetchError::Transport(e.to_string()))?;
        Ok(HttpResponse {
            status,
            headers,
            body,
        })
    }
}

impl HttpTransport for ReqwestTransport {
    fn get(&self, url: &str, headers: &[(String, String)]) -> Result<HttpResponse, FetchError> {
        let mut request = self.client.get(url);
        for (k, v) in headers {
            request = request.header(k.as_str(), v.as_str());
        }
        self.send(request)
    }

    fn post_json(
        &self,
        url: &str,
        body: &Value,
        headers: &[(String, String)],
    ) -> Result<HttpResponse, FetchError> {
        let mut request = self.client.post(url).json(body);
        for (k, v) in headers {
            request = request.header(k.as_str(), v.as_str());
        }
        self.send(request)
    }
}

// ============ Fetcher ============

/// Domain suffix for a region code; unknown codes are used verbatim.
pub fn region_suffix(region: &str) -> String {
    let region = region.to_lowercase();
    let suffix = match region.as_str() {
        "us" => "com",
        "uk" => "co.uk",
        "jp" => "co.jp",
        "au" => "com.au",
        // de, fr, ca, in
        other => other,
    };
    suffix.to_string()
}

/// Client for the notebook service, generic over the HTTP transport.
pub struct CloudFetcher<T: HttpTransport> {
    transport: T,
    email: Option<String>,
    cookie_path: Option<PathBuf>,
    base_url: String,
}

/// Cookies and CSRF token obtained during bootstrap; lives for one iteration.
struct Session {
    cookies: Vec<(String, String)>,
    csrf_token: String,
}

impl<T: HttpTransport> CloudFetcher<T> {
    pub fn new(transport: T, region: &str) -> Self {
        Self {
            transport,
            email: None,
            cookie_path: None,
            base_url: format!("https://read.amazon.{}", region_suffix(region)),
        }
    }

    /// Account email, used only to label errors and log lines.
    pub fn with_email(mut self, email: Option<String>) -> Self {
        self.email = email;
        self
    }

    pub fn with_cookie_path(mut self, cookie_path: Option<PathBuf>) -> Self {
        self.cookie_path = cookie_path;
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn notebook_url(&self) -> String {
        format!("{}/notebook", self.base_url)
    }

    pub fn api_url(&self) -> String {
        format!("{}/notebook/api/annotations", self.base_url)
    }

    /// Lazily iterate every highlight in the account.
    ///
    /// Each call starts a fresh session; nothing is requested until the
    /// iterator is first polled.
    pub fn iter_highlights(&self, page_size: usize) -> CloudHighlights<'_, T> {
        CloudHighlights {
            fetcher: self,
            session: None,
            page_size,
            next_token: None,
            buffer: VecDeque::new(),
            finished: false,
        }
    }

    fn default_headers(&self, cookies: &[(String, String)]) -> Vec<(String, String)> {
        let mut headers = vec![
            (
                "User-Agent".to_string(),
                concat!("kindle-vault/", env!("CARGO_PKG_VERSION")).to_string(),
            ),
            (
                "Accept".to_string(),
                "application/json, text/javascript, */*; q=0.01".to_string(),
            ),
            ("Referer".to_string(), self.notebook_url()),
            ("Origin".to_string(), self.base_url.clone()),
        ];
        if !cookies.is_empty() {
            let cookie_header = cookies
                .iter()
                .map(|(k, v)| format!("{}={}", k, v))
                .collect::<Vec<_>>()
                .join("; ");
            headers.push(("Cookie".to_string(), cookie_header));
        }
        headers
    }

    fn ensure_success(&self, response: &HttpResponse) -> Result<(), FetchError> {
        if response.status >= 400 {
            return Err(FetchError::Status {
                status: response.status,
                email: self.email.clone(),
            });
        }
        Ok(())
    }

    fn prepare_session(&self) -> Result<Session, FetchError> {
        let mut cookies = match &self.cookie_path {
            Some(path) => load_cookies(path)?,
            None => Vec::new(),
        };

        let response = self
            .transport
            .get(&self.notebook_url(), &self.default_headers(&cookies))?;
        self.ensure_success(&response)?;

        let set_cookies = response.set_cookies();
        let csrf_token = set_cookies
            .iter()
            .find(|(k, _)| k == CSRF_COOKIE)
            .map(|(_, v)| v.clone())
            .or_else(|| response.header(CSRF_HEADER).map(str::to_string))
            .or_else(|| {
                cookies
                    .iter()
                    .find(|(k, _)| k == CSRF_COOKIE)
                    .map(|(_, v)| v.clone())
            })
            .filter(|token| !token.is_empty())
            .ok_or(FetchError::MissingCsrfToken)?;

        for (name, value) in set_cookies {
            set_cookie(&mut cookies, name, value);
        }

        Ok(Session {
            cookies,
            csrf_token,
        })
    }

    fn fetch_page(
        &self,
        session: &Session,
        page_size: usize,
        page_token: Option<&str>,
    ) -> Result<Map<String, Value>, FetchError> {
        let mut payload = serde_json::json!({ "maxResults": page_size });
        if let Some(token) = page_token {
            payload["pageToken"] = Value::String(token.to_string());
        }

        let mut headers = self.default_headers(&session.cookies);
        headers.push((CSRF_HEADER.to_string(), session.csrf_token.clone()));

        let response = self
            .transport
            .post_json(&self.api_url(), &payload, &headers)?;
        self.ensure_success(&response)?;

        let value: Value = serde_json::from_str(&response.body)
            .map_err(|e| FetchError::InvalidJson(e.to_string()))?;
        match value {
            Value::Object(map) => Ok(map),
            _ => Err(FetchError::UnexpectedShape),
        }
    }
}

/// Iterator over cloud highlights. Yields `Err` at most once, then stops.
pub struct CloudHighlights<'a, T: HttpTransport> {
    fetcher: &'a CloudFetcher<T>,
    session: Option<Session>,
    page_size: usize,
    next_token: Option<String>,
    buffer: VecDeque<Highlight>,
    finished: bool,
}

impl<T: HttpTransport> Iterator for CloudHighlights<'_, T> {
    type Item = Result<Highlight, FetchError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(highlight) = self.buffer.pop_front() {
                return Some(Ok(highlight));
            }
            if self.finished {
                return None;
            }

            if self.session.is_none() {
                match self.fetcher.prepare_session() {
                    Ok(session) => self.session = Some(session),
                    Err(e) => {
                        self.finished = true;
                        return Some(Err(e));
                    }
                }
            }
            let session = self.session.as_ref()?;

            let page = match self.fetcher.fetch_page(
                session,
                self.page_size,
                self.next_token.as_deref(),
            ) {
                Ok(page) => page,
                Err(e) => {
                    self.finished = true;
                    return Some(Err(e));
                }
            };

            let items = ["items", "annotations"]
                .iter()
                .filter_map(|key| page.get(*key))
                .find(|v| is_truthy(v));
            if let Some(Value::Array(items)) = items {
                self.buffer.extend(
                    items
                        .iter()
                        .filter_map(Value::as_object)
                        .filter_map(parse_annotation),
                );
            }
            tracing::debug!(
                items = self.buffer.len(),
                "fetched Kindle Cloud annotations page"
            );

            self.next_token = ["nextPageToken", "nextToken"]
                .iter()
                .filter_map(|key| page.get(*key))
                .find_map(scalar_string);
            if self.next_token.is_none() {
                self.finished = true;
            }
        }
    }
}

fn set_cookie(cookies: &mut Vec<(String, String)>, name: String, value: String) {
    match cookies.iter_mut().find(|(k, _)| *k == name) {
        Some(existing) => existing.1 = value,
        None => cookies.push((name, value)),
    }
}

/// Read a cookie file: a JSON object (optionally under `"cookies"`) or a raw
/// `Cookie` header string.
pub fn load_cookies(path: &Path) -> Result<Vec<(String, String)>, FetchError> {
    let raw = std::fs::read_to_string(path).map_err(|source| FetchError::CookieFile {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(parse_cookies(&raw))
}

fn parse_cookies(raw: &str) -> Vec<(String, String)> {
    let mut cookies = Vec::new();

    if let Ok(Value::Object(parsed)) = serde_json::from_str::<Value>(raw) {
        let jar = match parsed.get("cookies") {
            Some(Value::Object(inner)) => Some(inner),
            Some(_) => None,
            None => Some(&parsed),
        };
        if let Some(jar) = jar {
            for (name, value) in jar {
                let value = match value {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                set_cookie(&mut cookies, name.clone(), value);
            }
            return cookies;
        }
    }

    for chunk in raw.split(';') {
        if let Some((name, value)) = chunk.split_once('=') {
            let name = name.trim();
            if !name.is_empty() {
                set_cookie(&mut cookies, name.to_string(), value.trim().to_string());
            }
        }
    }
    cookies
}

// ============ Field extraction ============

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}

/// Non-empty text for a scalar value; objects and arrays yield `None`.
fn scalar_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => {
            let s = s.trim();
            (!s.is_empty()).then(|| s.to_string())
        }
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// First truthy value for any of `keys`, on the item or one level down.
fn extract_first<'a>(item: &'a Map<String, Value>, keys: &[&str]) -> Option<&'a Value> {
    keys.iter().find_map(|key| {
        item.get(*key)
            .filter(|v| is_truthy(v))
            .or_else(|| seek_nested(item, key).filter(|v| is_truthy(v)))
    })
}

fn seek_nested<'a>(item: &'a Map<String, Value>, key: &str) -> Option<&'a Value> {
    item.values()
        .filter_map(Value::as_object)
        .find_map(|nested| nested.get(key))
}

fn extract_text(item: &Map<String, Value>) -> Option<String> {
    for key in TEXT_KEYS {
        match item.get(*key) {
            Some(Value::Object(inner)) => {
                if let Some(Value::String(text)) = inner.get("text") {
                    let text = text.trim();
                    return (!text.is_empty()).then(|| text.to_string());
                }
            }
            Some(Value::String(text)) if !text.trim().is_empty() => {
                return Some(text.trim().to_string());
            }
            _ => {}
        }
    }
    None
}

fn extract_author(item: &Map<String, Value>) -> Option<String> {
    let authors = ["authors", "author"]
        .iter()
        .filter_map(|key| item.get(*key))
        .find(|v| is_truthy(v));
    match authors {
        Some(Value::Array(list)) => {
            if let Some(first) = list.first() {
                return match first {
                    Value::String(s) => Some(s.clone()),
                    other => Some(other.to_string()),
                };
            }
        }
        Some(Value::String(s)) if !s.trim().is_empty() => return Some(s.trim().to_string()),
        _ => {}
    }

    ["bookMetadata", "book"]
        .iter()
        .filter_map(|key| item.get(*key))
        .find(|v| is_truthy(v))
        .and_then(Value::as_object)
        .and_then(extract_author)
}

/// Map one API item to a highlight; items without usable text are dropped.
fn parse_annotation(item: &Map<String, Value>) -> Option<Highlight> {
    let text = extract_text(item)?;

    let title = extract_first(item, TITLE_KEYS)
        .and_then(scalar_string)
        .unwrap_or_else(|| "Untitled".to_string());
    let author = extract_author(item);
    let location = extract_first(item, LOCATION_KEYS).and_then(|v| match v {
        Value::Object(inner) => ["value", "location"]
            .iter()
            .filter_map(|key| inner.get(*key))
            .find(|v| is_truthy(v))
            .and_then(scalar_string),
        other => scalar_string(other),
    });
    let note = extract_first(item, NOTE_KEYS).and_then(|v| match v {
        Value::Object(inner) => ["text", "note"]
            .iter()
            .filter_map(|key| inner.get(*key))
            .find(|v| is_truthy(v))
            .and_then(scalar_string),
        other => scalar_string(other),
    });

    Some(Highlight::new(
        title,
        author,
        location,
        text,
        note,
        SourceTag::Cloud,
    ))
}

// ============ Connector ============

/// Cloud notebook as a [`Connector`]. Scanning drains the lazy iterator and
/// fails with the first [`FetchError`].
pub struct CloudConnector<T: HttpTransport = ReqwestTransport> {
    fetcher: CloudFetcher<T>,
    page_size: usize,
    cookie_path: Option<PathBuf>,
}

impl CloudConnector<ReqwestTransport> {
    pub fn from_config(config: &CloudConfig) -> Result<Self> {
        let transport = ReqwestTransport::new(config.timeout_secs.map(Duration::from_secs))?;
        Ok(Self::with_transport(transport, config))
    }
}

impl<T: HttpTransport> CloudConnector<T> {
    pub fn with_transport(transport: T, config: &CloudConfig) -> Self {
        let fetcher = CloudFetcher::new(transport, &config.region)
            .with_email(config.email.clone())
            .with_cookie_path(config.cookie_path.clone());
        Self {
            fetcher,
            page_size: config.page_size,
            cookie_path: config.cookie_path.clone(),
        }
    }

    pub fn fetcher(&self) -> &CloudFetcher<T> {
        &self.fetcher
    }
}

impl<T: HttpTransport> Connector for CloudConnector<T> {
    fn name(&self) -> &str {
        "cloud"
    }

    fn description(&self) -> &str {
        "Kindle Cloud notebook"
    }

    fn status(&self) -> SourceStatus {
        match &self.cookie_path {
            Some(path) if !path.exists() => SourceStatus::Missing(path.clone()),
            _ => SourceStatus::Ready,
        }
    }

    fn scan(&self) -> Result<Vec<Highlight>> {
        let highlights = self
            .fetcher
            .iter_highlights(self.page_size)
            .collect::<Result<Vec<_>, FetchError>>()?;
        Ok(highlights)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_region_suffix() {
        assert_eq!(region_suffix("us"), "com");
        assert_eq!(region_suffix("UK"), "co.uk");
        assert_eq!(region_suffix("de"), "de");
        assert_eq!(region_suffix("com.br"), "com.br");
    }

    #[test]
    fn test_parse_cookie_header_string() {
        let cookies = parse_cookies("session-id=abc123; other=value; ;junk");
        assert_eq!(
            cookies,
            vec![
                ("session-id".to_string(), "abc123".to_string()),
                ("other".to_string(), "value".to_string()),
            ]
        );
    }

    #[test]
    fn test_parse_cookie_json() {
        let cookies = parse_cookies(r#"{"cookies": {"a": "1", "b": 2}}"#);
        assert!(cookies.contains(&("a".to_string(), "1".to_string())));
        assert!(cookies.contains(&("b".to_string(), "2".to_string())));
        assert!(parse_cookies("{}").is_empty());
    }

    #[test]
    fn test_set_cookie_parsing() {
        let response = HttpResponse {
            status: 200,
            headers: vec![
                ("Set-Cookie".to_string(), "csrf-token=tok; Path=/; Secure".to_string()),
                ("set-cookie".to_string(), "session=s1".to_string()),
                ("X-Amzn-Csrf-Token".to_string(), "hdr".to_string()),
            ],
            body: String::new(),
        };
        assert_eq!(
            response.set_cookies(),
            vec![
                ("csrf-token".to_string(), "tok".to_string()),
                ("session".to_string(), "s1".to_string()),
            ]
        );
        assert_eq!(response.header(CSRF_HEADER), Some("hdr"));
    }

    fn item(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_nested_highlight_fields() {
        let h = parse_annotation(&item(json!({
            "title": "Book One",
            "authors": ["Author One"],
            "highlight": {"text": "First highlight", "location": {"value": "123"}},
            "note": {"text": "My note"}
        })))
        .unwrap();
        assert_eq!(h.book_title(), "Book One");
        assert_eq!(h.author(), Some("Author One"));
        assert_eq!(h.text(), "First highlight");
        assert_eq!(h.location(), Some("123"));
        assert_eq!(h.note(), Some("My note"));
        assert_eq!(h.source(), SourceTag::Cloud);
    }

    #[test]
    fn test_book_metadata_fields() {
        let h = parse_annotation(&item(json!({
            "bookMetadata": {"title": "Book Two", "authors": ["Author Two"]},
            "highlightText": "Second highlight",
            "annotationLocation": 456
        })))
        .unwrap();
        assert_eq!(h.book_title(), "Book Two");
        assert_eq!(h.author(), Some("Author Two"));
        assert_eq!(h.location(), Some("456"));
        assert_eq!(h.note(), None);
    }

    #[test]
    fn test_item_without_text_is_dropped() {
        assert!(parse_annotation(&item(json!({"title": "T", "highlight": {"text": "  "}}))).is_none());
        assert!(parse_annotation(&item(json!({"title": "T", "note": "only note"}))).is_none());
    }

    #[test]
    fn test_missing_title_defaults() {
        let h = parse_annotation(&item(json!({"text": "words"}))).unwrap();
        assert_eq!(h.book_title(), "Untitled");
        assert_eq!(h.author(), None);
    }

    /// Replays canned responses and records every request.
    #[derive(Default)]
    struct ScriptedTransport {
        gets: std::sync::Mutex<VecDeque<HttpResponse>>,
        posts: std::sync::Mutex<VecDeque<HttpResponse>>,
        requests: std::sync::Mutex<Vec<(String, Option<Value>, Vec<(String, String)>)>>,
    }

    impl ScriptedTransport {
        fn new(gets: Vec<HttpResponse>, posts: Vec<HttpResponse>) -> Self {
            Self {
                gets: std::sync::Mutex::new(gets.into()),
                posts: std::sync::Mutex::new(posts.into()),
                requests: Default::default(),
            }
        }
    }

    impl HttpTransport for ScriptedTransport {
        fn get(&self, url: &str, headers: &[(String, String)]) -> Result<HttpResponse, FetchError> {
            self.requests
                .lock()
                .unwrap()
                .push((url.to_string(), None, headers.to_vec()));
            self.gets
                .lock()
                .unwrap()
                .pop_front()
                .ok_or_else(|| FetchError::Transport("no scripted GET".to_string()))
        }

        fn post_json(
            &self,
            url: &str,
            body: &Value,
            headers: &[(String, String)],
        ) -> Result<HttpResponse, FetchError> {
            self.requests
                .lock()
                .unwrap()
                .push((url.to_string(), Some(body.clone()), headers.to_vec()));
            self.posts
                .lock()
                .unwrap()
                .pop_front()
                .ok_or_else(|| FetchError::Transport("no scripted POST".to_string()))
        }
    }

    fn response(status: u16, headers: &[(&str, &str)], body: Value) -> HttpResponse {
        HttpResponse {
            status,
            headers: headers
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            body: body.to_string(),
        }
    }

    fn header<'a>(headers: &'a [(String, String)], name: &str) -> Option<&'a str> {
        headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    #[test]
    fn test_paginated_fetch() {
        let tmp = tempfile::TempDir::new().unwrap();
        let cookie_path = tmp.path().join("cookies.txt");
        std::fs::write(&cookie_path, "session-id=abc123").unwrap();

        let transport = ScriptedTransport::new(
            vec![response(
                200,
                &[("Set-Cookie", "csrf-token=token-123; Path=/")],
                json!({}),
            )],
            vec![
                response(
                    200,
                    &[],
                    json!({
                        "items": [
                            {
                                "title": "Book One",
                                "authors": ["Author One"],
                                "highlight": {"text": "First highlight", "location": {"value": "123"}},
                                "note": {"text": "My note"}
                            },
                            {
                                "bookMetadata": {"title": "Book Two", "authors": ["Author Two"]},
                                "highlightText": "Second highlight",
                                "annotationLocation": "456"
                            }
                        ],
                        "nextPageToken": "NEXT"
                    }),
                ),
                response(
                    200,
                    &[],
                    json!({
                        "items": [
                            {"bookTitle": "Book Three", "author": "Author Three", "text": "Third highlight"},
                            {"title": "Ignored", "highlight": {"text": ""}}
                        ]
                    }),
                ),
            ],
        );

        let fetcher = CloudFetcher::new(transport, "us").with_cookie_path(Some(cookie_path));
        let highlights: Vec<Highlight> = fetcher
            .iter_highlights(2)
            .collect::<Result<_, _>>()
            .unwrap();

        let titles: Vec<&str> = highlights.iter().map(|h| h.book_title()).collect();
        assert_eq!(titles, vec!["Book One", "Book Two", "Book Three"]);
        let authors: Vec<Option<&str>> = highlights.iter().map(|h| h.author()).collect();
        assert_eq!(
            authors,
            vec![Some("Author One"), Some("Author Two"), Some("Author Three")]
        );
        let locations: Vec<Option<&str>> = highlights.iter().map(|h| h.location()).collect();
        assert_eq!(locations, vec![Some("123"), Some("456"), None]);
        let notes: Vec<Option<&str>> = highlights.iter().map(|h| h.note()).collect();
        assert_eq!(notes, vec![Some("My note"), None, None]);

        let requests = fetcher.transport.requests.lock().unwrap();
        assert_eq!(requests.len(), 3);
        assert_eq!(requests[0].0, "https://read.amazon.com/notebook");
        assert_eq!(header(&requests[0].2, "Cookie"), Some("session-id=abc123"));

        assert_eq!(requests[1].0, "https://read.amazon.com/notebook/api/annotations");
        assert_eq!(requests[1].1, Some(json!({"maxResults": 2})));
        assert_eq!(header(&requests[1].2, CSRF_HEADER), Some("token-123"));
        assert_eq!(
            header(&requests[1].2, "Cookie"),
            Some("session-id=abc123; csrf-token=token-123")
        );

        assert_eq!(
            requests[2].1,
            Some(json!({"maxResults": 2, "pageToken": "NEXT"}))
        );
    }

    #[test]
    fn test_iteration_is_lazy() {
        let fetcher = CloudFetcher::new(ScriptedTransport::default(), "uk");
        let _iter = fetcher.iter_highlights(10);
        assert!(fetcher.transport.requests.lock().unwrap().is_empty());
        assert_eq!(fetcher.notebook_url(), "https://read.amazon.co.uk/notebook");
    }

    #[test]
    fn test_csrf_token_from_header() {
        let transport = ScriptedTransport::new(
            vec![response(200, &[("x-amzn-csrf-token", "hdr-token")], json!({}))],
            vec![response(200, &[], json!({"annotations": []}))],
        );
        let fetcher = CloudFetcher::new(transport, "us");
        let highlights: Vec<_> = fetcher.iter_highlights(5).collect();
        assert!(highlights.is_empty());
        let requests = fetcher.transport.requests.lock().unwrap();
        assert_eq!(header(&requests[1].2, CSRF_HEADER), Some("hdr-token"));
    }

    #[test]
    fn test_missing_csrf_token_fails() {
        let transport = ScriptedTransport::new(vec![response(200, &[], json!({}))], vec![]);
        let fetcher = CloudFetcher::new(transport, "us");
        let results: Vec<_> = fetcher.iter_highlights(5).collect();
        assert_eq!(results.len(), 1);
        assert!(matches!(results[0], Err(FetchError::MissingCsrfToken)));
    }

    #[test]
    fn test_http_error_stops_iteration() {
        let transport = ScriptedTransport::new(
            vec![response(200, &[("Set-Cookie", "csrf-token=t")], json!({}))],
            vec![response(401, &[], json!({"message": "denied"}))],
        );
        let fetcher = CloudFetcher::new(transport, "us").with_email(Some("me@example.com".into()));
        let results: Vec<_> = fetcher.iter_highlights(5).collect();
        assert_eq!(results.len(), 1);
        match &results[0] {
            Err(FetchError::Status { status, email }) => {
                assert_eq!(*status, 401);
                assert_eq!(email.as_deref(), Some("me@example.com"));
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn test_non_object_body_is_rejected() {
        let transport = ScriptedTransport::new(
            vec![response(200, &[("Set-Cookie", "csrf-token=t")], json!({}))],
            vec![response(200, &[], json!([1, 2, 3]))],
        );
        let fetcher = CloudFetcher::new(transport, "us");
        let results: Vec<_> = fetcher.iter_highlights(5).collect();
        assert!(matches!(results[0], Err(FetchError::UnexpectedShape)));
    }

    #[test]
    fn test_missing_cookie_file_is_reported() {
        let fetcher = CloudFetcher::new(ScriptedTransport::default(), "us")
            .with_cookie_path(Some(PathBuf::from("/nonexistent/cookies.txt")));
        let results: Vec<_> = fetcher.iter_highlights(5).collect();
        assert!(matches!(results[0], Err(FetchError::CookieFile { .. })));
    }

    #[test]
    fn test_status_error_message_includes_email() {
        let err = FetchError::Status {
            status: 503,
            email: Some("reader@example.com".to_string()),
        };
        assert_eq!(
            err.to_string(),
            "Kindle Cloud request for reader@example.com failed with status code 503"
        );
        let err = FetchError::Status {
            status: 401,
            email: None,
        };
        assert_eq!(err.to_string(), "Kindle Cloud request failed with status code 401");
    }
}

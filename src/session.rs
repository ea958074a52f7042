//! Cookie-backed sessions.
//!
//! The whole session lives in one signed cookie: a small JSON bag of values
//! plus an absolute deadline fixed when the session is first issued. There is
//! no server-side session table. Each request decodes its own copy, handlers
//! mutate it through a [`Session`] handle, and [`EnableSessions`] re-encodes
//! it into `Set-Cookie` on the way out if anything changed.
//!
//! Decoding fails closed. A cookie with a bad signature, undecodable payload
//! or past deadline reads as an empty session and is cleared on the response.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::{DateTime, Duration, Utc};
use cookie::{Cookie, CookieJar, Key, SameSite};
use http::HeaderMap;
use http::header::{self, HeaderValue};
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::error::Error;
use crate::middleware::{Middleware, Next};
use crate::request::Request;
use crate::response::Response;

/// Name of the session cookie.
pub const COOKIE_NAME: &str = "session";

/// Minimum length of the secret the signing key is derived from.
pub const MIN_SECRET_LEN: usize = 32;

/// Largest `Set-Cookie` value written. Browsers drop bigger cookies silently.
pub const MAX_COOKIE_LEN: usize = 4096;

// ── Session ──────────────────────────────────────────────────────────────────

#[derive(Default)]
struct State {
    values: BTreeMap<String, Value>,
    deadline: Option<DateTime<Utc>>,
    modified: bool,
    destroyed: bool,
    // A cookie was presented but rejected: clear it unless replaced.
    stale: bool,
}

/// Handle to the current request's session.
///
/// Cheap to clone; every clone sees the same values. The handle is confined
/// to one request, so the lock is never contended.
#[derive(Clone, Default)]
pub struct Session {
    state: Arc<Mutex<State>>,
}

impl Session {
    fn from_state(state: State) -> Self {
        Self { state: Arc::new(Mutex::new(state)) }
    }

    /// Deserializes the value under `key`, or `None` if absent or of the wrong shape.
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let state = self.state.lock();
        let value = state.values.get(key)?;
        serde_json::from_value(value.clone()).ok()
    }

    /// The string under `key`, or `""` if absent or not a string.
    pub fn get_string(&self, key: &str) -> String {
        self.get::<String>(key).unwrap_or_default()
    }

    pub fn get_i64(&self, key: &str) -> Option<i64> {
        self.state.lock().values.get(key).and_then(Value::as_i64)
    }

    pub fn put(&self, key: &str, value: impl Into<Value>) {
        let mut state = self.state.lock();
        state.values.insert(key.to_owned(), value.into());
        state.modified = true;
    }

    /// Removes and returns the string under `key`.
    ///
    /// One-time read: a second call returns `""`. Absent keys and non-string
    /// values also return `""`; only a present key marks the session modified.
    pub fn pop_string(&self, key: &str) -> String {
        let mut state = self.state.lock();
        match state.values.remove(key) {
            Some(value) => {
                state.modified = true;
                match value {
                    Value::String(s) => s,
                    _ => String::new(),
                }
            }
            None => String::new(),
        }
    }

    pub fn remove(&self, key: &str) {
        let mut state = self.state.lock();
        if state.values.remove(key).is_some() {
            state.modified = true;
        }
    }

    pub fn exists(&self, key: &str) -> bool {
        self.state.lock().values.contains_key(key)
    }

    /// Drops every value and expires the cookie on the response.
    pub fn destroy(&self) {
        let mut state = self.state.lock();
        state.values.clear();
        state.deadline = None;
        state.destroyed = true;
        state.modified = true;
    }

    /// The absolute expiry of this session, once it has been issued.
    pub fn deadline(&self) -> Option<DateTime<Utc>> {
        self.state.lock().deadline
    }
}

// ── Wire format ──────────────────────────────────────────────────────────────

#[derive(Serialize, Deserialize)]
struct Payload {
    deadline: i64,
    values: BTreeMap<String, Value>,
}

// ── SessionManager ───────────────────────────────────────────────────────────

/// Session configuration and cookie codec. Built once at startup and shared.
pub struct SessionManager {
    key: Key,
    lifetime: Duration,
    secure: bool,
}

impl SessionManager {
    /// Derives the signing key from `secret`, which must be at least
    /// [`MIN_SECRET_LEN`] bytes. Sessions default to a 12 hour lifetime and
    /// `Secure` cookies.
    pub fn new(secret: &[u8]) -> Result<Self, Error> {
        if secret.len() < MIN_SECRET_LEN {
            return Err(Error::Config(format!(
                "session secret must be at least {MIN_SECRET_LEN} bytes, got {}",
                secret.len()
            )));
        }
        Ok(Self {
            key: Key::derive_from(secret),
            lifetime: Duration::hours(12),
            secure: true,
        })
    }

    pub fn lifetime(mut self, lifetime: Duration) -> Self {
        self.lifetime = lifetime;
        self
    }

    /// Whether cookies carry the `Secure` attribute.
    pub fn secure(mut self, secure: bool) -> Self {
        self.secure = secure;
        self
    }

    /// Middleware that loads the session before the wrapped handler runs and
    /// writes it back afterwards.
    pub fn enable(self: &Arc<Self>) -> EnableSessions {
        EnableSessions { manager: Arc::clone(self) }
    }

    /// Decodes the session cookie from request headers. Never fails: anything
    /// unreadable yields an empty session.
    pub fn load(&self, headers: &HeaderMap) -> Session {
        let mut jar = CookieJar::new();
        let mut presented = false;
        for value in headers.get_all(header::COOKIE) {
            let Ok(value) = value.to_str() else { continue };
            for cookie in Cookie::split_parse(value).flatten() {
                presented |= cookie.name() == COOKIE_NAME;
                jar.add_original(cookie.into_owned());
            }
        }
        if !presented {
            return Session::default();
        }

        match self.decode(&jar) {
            Some(payload) => Session::from_state(State {
                values: payload.values,
                deadline: DateTime::from_timestamp(payload.deadline, 0),
                ..State::default()
            }),
            None => Session::from_state(State { stale: true, ..State::default() }),
        }
    }

    fn decode(&self, jar: &CookieJar) -> Option<Payload> {
        let Some(cookie) = jar.signed(&self.key).get(COOKIE_NAME) else {
            warn!("session cookie failed verification");
            return None;
        };
        let raw = URL_SAFE_NO_PAD.decode(cookie.value()).ok()?;
        let payload: Payload = serde_json::from_slice(&raw).ok()?;
        if payload.deadline <= Utc::now().timestamp() {
            debug!("session cookie expired");
            return None;
        }
        Some(payload)
    }

    /// Writes `Set-Cookie` for `session` onto `res` if it changed, or a
    /// clearing cookie if it was destroyed or arrived unreadable. A session
    /// that encodes past [`MAX_COOKIE_LEN`] is logged and not written.
    pub fn save(&self, session: &Session, res: &mut Response) {
        let mut state = session.state.lock();

        let cookie = if state.destroyed || (state.stale && !state.modified) {
            self.removal()
        } else if state.modified {
            let deadline = *state.deadline.get_or_insert_with(|| self.issue_deadline());
            match self.encode(&state.values, deadline) {
                Some(cookie) => cookie,
                None => return,
            }
        } else {
            return;
        };

        match HeaderValue::from_str(&cookie) {
            Ok(value) => {
                res.append_header(header::SET_COOKIE, value);
                res.append_header(header::VARY, HeaderValue::from_static("Cookie"));
            }
            Err(e) => warn!(error = %e, "session cookie is not a valid header value"),
        }
    }

    // Whole seconds, so the deadline read back from the cookie compares equal.
    fn issue_deadline(&self) -> DateTime<Utc> {
        let deadline = Utc::now() + self.lifetime;
        DateTime::from_timestamp(deadline.timestamp(), 0).unwrap_or(deadline)
    }

    fn encode(&self, values: &BTreeMap<String, Value>, deadline: DateTime<Utc>) -> Option<String> {
        let payload = Payload { deadline: deadline.timestamp(), values: values.clone() };
        let json = match serde_json::to_vec(&payload) {
            Ok(json) => json,
            Err(e) => {
                warn!(error = %e, "failed to serialize session");
                return None;
            }
        };

        let mut cookie = self.base_cookie(URL_SAFE_NO_PAD.encode(json));
        if let Ok(expires) = cookie::time::OffsetDateTime::from_unix_timestamp(deadline.timestamp()) {
            cookie.set_expires(expires);
        }
        let remaining = (deadline - Utc::now()).num_seconds().max(0);
        cookie.set_max_age(cookie::time::Duration::seconds(remaining));

        let mut jar = CookieJar::new();
        jar.signed_mut(&self.key).add(cookie);
        let encoded = jar.get(COOKIE_NAME)?.to_string();
        if encoded.len() > MAX_COOKIE_LEN {
            // The client keeps whatever cookie it already holds.
            warn!(len = encoded.len(), max = MAX_COOKIE_LEN, "session too large for a cookie, not saved");
            return None;
        }
        Some(encoded)
    }

    fn removal(&self) -> String {
        let mut cookie = self.base_cookie(String::new());
        cookie.make_removal();
        cookie.to_string()
    }

    fn base_cookie(&self, value: String) -> Cookie<'static> {
        Cookie::build((COOKIE_NAME, value))
            .path("/")
            .http_only(true)
            .secure(self.secure)
            .same_site(SameSite::Lax)
            .build()
    }
}

// ── Middleware ───────────────────────────────────────────────────────────────

/// See [`SessionManager::enable`].
pub struct EnableSessions {
    manager: Arc<SessionManager>,
}

#[async_trait]
impl Middleware for EnableSessions {
    async fn handle(&self, mut req: Request, next: Next) -> Response {
        let session = self.manager.load(req.headers());
        req.context.session = Some(session.clone());
        let mut res = next.run(req).await;
        self.manager.save(&session, &mut res);
        res
    }
}

//! CSRF `state` tokens for redirect verification.
//!
//! The redirect server listens on an unprotected localhost port, so any local
//! process or web page can hit it. Send a fresh [`OAuthState`] with the
//! authorization request and only accept redirects that echo it back.
//!
//! ```
//! use oauth_loopback::state::OAuthState;
//!
//! let state = OAuthState::generate();
//! let redirect = format!("http://127.0.0.1:4242/callback?code=abc&state={}", state);
//!
//! assert!(state.verify(&redirect));
//! assert!(!state.verify("http://127.0.0.1:4242/callback?code=abc&state=forged"));
//! ```

use std::fmt;

use uuid::Uuid;

/// A random, URL-safe `state` value
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct OAuthState(String);

impl OAuthState {
    /// A fresh random token (UUID v4, 32 hex digits)
    pub fn generate() -> Self {
        Self(Uuid::new_v4().simple().to_string())
    }

    /// The token as sent in the authorization request
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether `url` carries this token as its `state` query parameter
    pub fn verify(&self, url: &str) -> bool {
        query_param(url, "state").is_some_and(|value| value == self.0)
    }
}

impl fmt::Display for OAuthState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for OAuthState {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// First value of query parameter `name` in `url`, undecoded.
///
/// Anything after `#` is ignored.
///
/// ```
/// use oauth_loopback::state::query_param;
///
/// let url = "http://127.0.0.1:4242/cb?code=abc&scope=read+write";
/// assert_eq!(query_param(url, "code"), Some("abc"));
/// assert_eq!(query_param(url, "scope"), Some("read+write"));
/// assert_eq!(query_param(url, "state"), None);
/// ```
pub fn query_param<'a>(url: &'a str, name: &str) -> Option<&'a str> {
    let without_fragment = url.split('#').next().unwrap_or(url);
    let (_, query) = without_fragment.split_once('?')?;

    query.split('&').find_map(|pair| {
        let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
        (key == name).then_some(value)
    })
}

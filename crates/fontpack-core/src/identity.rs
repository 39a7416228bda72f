//! Outbound identity selection.
//!
//! The upstream font API decides which font formats to return from the
//! `User-Agent` it sees. A [`FontType`] names the format the caller wants and
//! [`Identity::for_font_type`] picks a user agent that makes the API serve it.

use std::fmt;
use std::str::FromStr;

use http::header::{HeaderMap, HeaderValue, USER_AGENT};

/// User agent that yields TrueType stylesheets.
pub const TTF_USER_AGENT: &str = "Go Client";

/// User agent that yields WOFF stylesheets.
pub const WOFF_USER_AGENT: &str =
    "Mozilla/5.0 (Windows NT 5.1; rv:31.0) Gecko/20100101 Firefox/31.0";

/// User agent that yields WOFF2 stylesheets.
pub const WOFF2_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 6.3; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/37.0.2062.120 Safari/537.36";

/// User agent that yields EOT stylesheets.
pub const EOT_USER_AGENT: &str = "Mozilla/5.0 (compatible; MSIE 8.0; Windows NT 6.1; Trident/4.0; GTB7.4; InfoPath.2; SV1; .NET CLR 3.3.69573; WOW64; en-US)";

/// Font format requested by the caller.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum FontType {
    /// TrueType.
    Ttf,
    /// Web Open Font Format.
    #[default]
    Woff,
    /// Web Open Font Format 2.
    Woff2,
    /// Embedded OpenType.
    Eot,
    /// Forward the caller's own user agent.
    Detect,
}

impl FontType {
    /// Selector string as it appears in request paths.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Ttf => "ttf",
            Self::Woff => "woff",
            Self::Woff2 => "woff2",
            Self::Eot => "eot",
            Self::Detect => "detect",
        }
    }

    /// Fixed user agent for this type, `None` for [`FontType::Detect`].
    pub fn user_agent(self) -> Option<&'static str> {
        match self {
            Self::Ttf => Some(TTF_USER_AGENT),
            Self::Woff => Some(WOFF_USER_AGENT),
            Self::Woff2 => Some(WOFF2_USER_AGENT),
            Self::Eot => Some(EOT_USER_AGENT),
            Self::Detect => None,
        }
    }
}

impl fmt::Display for FontType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Returned when a selector names no known font type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownFontType(pub String);

impl fmt::Display for UnknownFontType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown font type: {}", self.0)
    }
}

impl std::error::Error for UnknownFontType {}

impl FromStr for FontType {
    type Err = UnknownFontType;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ttf" => Ok(Self::Ttf),
            "woff" => Ok(Self::Woff),
            "woff2" => Ok(Self::Woff2),
            "eot" => Ok(Self::Eot),
            "detect" => Ok(Self::Detect),
            other => Err(UnknownFontType(other.to_string())),
        }
    }
}

/// Header set presented to the upstream API and asset hosts.
///
/// Immutable once built and shared read-only by every fetch of a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    user_agent: String,
}

impl Identity {
    /// Create an identity with an explicit user agent.
    pub fn new(user_agent: impl Into<String>) -> Self {
        Self {
            user_agent: user_agent.into(),
        }
    }

    /// Resolve the identity for a font type.
    ///
    /// `inbound_user_agent` is only consulted for [`FontType::Detect`].
    /// Returns `None` when no usable user agent exists.
    pub fn for_font_type(font_type: FontType, inbound_user_agent: Option<&str>) -> Option<Self> {
        let user_agent = match font_type.user_agent() {
            Some(ua) => ua,
            None => inbound_user_agent?,
        };
        if user_agent.trim().is_empty() {
            return None;
        }
        Some(Self::new(user_agent))
    }

    /// The user agent string.
    pub fn user_agent(&self) -> &str {
        &self.user_agent
    }

    /// Outbound headers for this identity.
    ///
    /// A user agent that is not a valid header value is left out.
    pub fn headers(&self) -> HeaderMap {
        let mut headers = HeaderMap::new();
        if let Ok(value) = HeaderValue::from_str(&self.user_agent) {
            headers.insert(USER_AGENT, value);
        }
        headers
    }
}

//! Media sources.

use url::Url;

const CAST_SCHEME: &str = "cast";
const DIAL_SCHEME: &str = "dial";

/// What is being routed: a `cast:` app URN or a `dial:` app URN.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct MediaSource {
    id: String,
    is_dial: bool,
}

impl MediaSource {
    /// Builds a source from a caller supplied URN.
    ///
    /// Returns `None` for an empty or malformed URN and for any scheme other
    /// than `cast:` and `dial:`. HTTP(S) URLs (tab or desktop mirroring) are
    /// not supported.
    pub fn from_urn(urn: &str) -> Option<Self> {
        if urn.is_empty() {
            return None;
        }
        let url = Url::parse(urn).ok()?;
        let is_dial = match url.scheme() {
            CAST_SCHEME => false,
            DIAL_SCHEME => true,
            _ => return None,
        };
        Some(Self {
            id: urn.to_string(),
            is_dial,
        })
    }

    /// Rebuilds a source from an id reported by the provider.
    pub(crate) fn from_id(id: &str) -> Self {
        let is_dial = Url::parse(id)
            .map(|url| url.scheme() == DIAL_SCHEME)
            .unwrap_or(false);
        Self {
            id: id.to_string(),
            is_dial,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn is_cast_source(&self) -> bool {
        !self.is_dial
    }

    pub fn is_dial_source(&self) -> bool {
        self.is_dial
    }
}

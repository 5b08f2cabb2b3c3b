//! Search parameters shared by `search`, `list_children` and `read`.

use ldapi_core::Error;
use std::str::FromStr;

/// Represents the search scope for LDAP queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchScope {
    /// Base object only.
    Base,
    /// One level below the base.
    OneLevel,
    /// Entire subtree.
    Subtree,
}

/// Controls whether aliases met during a search are followed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum DerefPolicy {
    /// Never dereference aliases.
    #[default]
    Never,
    /// Dereference while searching below the base, but not the base itself.
    Searching,
    /// Dereference only when locating the base object.
    Finding,
    /// Always dereference aliases.
    Always,
}

impl DerefPolicy {
    /// Numeric protocol value of the policy.
    #[must_use]
    pub const fn code(self) -> i64 {
        match self {
            Self::Never => 0,
            Self::Searching => 1,
            Self::Finding => 2,
            Self::Always => 3,
        }
    }

    /// Maps a protocol value back to a policy.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidMode`] for values outside `0..=3`.
    pub fn from_code(code: i64) -> ldapi_core::Result<Self> {
        match code {
            0 => Ok(Self::Never),
            1 => Ok(Self::Searching),
            2 => Ok(Self::Finding),
            3 => Ok(Self::Always),
            _ => Err(Error::InvalidMode(format!(
                "dereference policy {code} is not one of 0..=3"
            ))),
        }
    }
}

impl FromStr for DerefPolicy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "never" => Ok(Self::Never),
            "searching" => Ok(Self::Searching),
            "finding" => Ok(Self::Finding),
            "always" => Ok(Self::Always),
            _ => Err(Error::InvalidMode(format!(
                "unknown dereference policy `{s}`"
            ))),
        }
    }
}

/// Base DN, filter and limits for a search-family operation.
///
/// The scope is not part of the request; it is fixed by the operation issuing it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchRequest {
    /// Search base.
    pub base_dn: String,
    /// RFC 4515 filter expression.
    pub filter: String,
    /// Attributes to return; `None` returns all user attributes.
    pub attributes: Option<Vec<String>>,
    /// Return attribute names without values.
    pub attrs_only: bool,
    /// Maximum entries to return; 0 defers to the connection default.
    pub size_limit: u32,
    /// Maximum seconds to spend; 0 defers to the connection default.
    pub time_limit: u32,
    /// Alias dereferencing policy.
    pub deref: DerefPolicy,
}

impl SearchRequest {
    /// Creates a request for all attributes with no limits.
    #[must_use]
    pub fn new(base_dn: impl Into<String>, filter: impl Into<String>) -> Self {
        Self {
            base_dn: base_dn.into(),
            filter: filter.into(),
            attributes: None,
            attrs_only: false,
            size_limit: 0,
            time_limit: 0,
            deref: DerefPolicy::default(),
        }
    }

    /// Restricts the attributes returned.
    #[must_use]
    pub fn attributes<I, S>(mut self, attributes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.attributes = Some(attributes.into_iter().map(Into::into).collect());
        self
    }

    /// Requests attribute names only.
    #[must_use]
    pub const fn attrs_only(mut self, attrs_only: bool) -> Self {
        self.attrs_only = attrs_only;
        self
    }

    /// Sets the size limit.
    #[must_use]
    pub const fn size_limit(mut self, limit: u32) -> Self {
        self.size_limit = limit;
        self
    }

    /// Sets the time limit in seconds.
    #[must_use]
    pub const fn time_limit(mut self, seconds: u32) -> Self {
        self.time_limit = seconds;
        self
    }

    /// Sets the dereference policy.
    #[must_use]
    pub const fn deref(mut self, deref: DerefPolicy) -> Self {
        self.deref = deref;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_defaults_and_builders() {
        let request = SearchRequest::new("dc=example,dc=com", "(objectClass=*)");
        assert!(request.attributes.is_none());
        assert_eq!(request.deref, DerefPolicy::Never);

        let request = request
            .attributes(["cn", "mail"])
            .attrs_only(true)
            .size_limit(50)
            .time_limit(5)
            .deref(DerefPolicy::Always);
        assert_eq!(
            request.attributes.as_deref(),
            Some(&["cn".to_string(), "mail".to_string()][..])
        );
        assert!(request.attrs_only);
        assert_eq!(request.size_limit, 50);
        assert_eq!(request.time_limit, 5);
        assert_eq!(request.deref, DerefPolicy::Always);
    }

    #[test]
    fn deref_codes() {
        for policy in [
            DerefPolicy::Never,
            DerefPolicy::Searching,
            DerefPolicy::Finding,
            DerefPolicy::Always,
        ] {
            assert_eq!(DerefPolicy::from_code(policy.code()).unwrap(), policy);
        }
        assert!(matches!(
            DerefPolicy::from_code(7),
            Err(Error::InvalidMode(_))
        ));
        assert_eq!("ALWAYS".parse::<DerefPolicy>().unwrap(), DerefPolicy::Always);
    }
}

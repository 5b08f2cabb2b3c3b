//! Typed connection options understood by directory engines.

use crate::Error;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A connection-level option that can be read or written on a live connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DirectoryOption {
    /// LDAP protocol version spoken on the connection.
    #[serde(rename = "protocol_version")]
    ProtocolVersion,
    /// Default alias dereferencing policy (0 never .. 3 always).
    #[serde(rename = "deref")]
    Deref,
    /// Default size limit applied when a search passes 0.
    #[serde(rename = "sizelimit")]
    SizeLimit,
    /// Default time limit in seconds applied when a search passes 0.
    #[serde(rename = "timelimit")]
    TimeLimit,
    /// Timeout in seconds for establishing network connections.
    #[serde(rename = "network_timeout")]
    NetworkTimeout,
    /// Whether search referrals are chased automatically.
    #[serde(rename = "referrals")]
    Referrals,
}

impl DirectoryOption {
    /// Conventional name of the option.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::ProtocolVersion => "protocol_version",
            Self::Deref => "deref",
            Self::SizeLimit => "sizelimit",
            Self::TimeLimit => "timelimit",
            Self::NetworkTimeout => "network_timeout",
            Self::Referrals => "referrals",
        }
    }
}

impl fmt::Display for DirectoryOption {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for DirectoryOption {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "protocol_version" => Ok(Self::ProtocolVersion),
            "deref" => Ok(Self::Deref),
            "sizelimit" => Ok(Self::SizeLimit),
            "timelimit" => Ok(Self::TimeLimit),
            "network_timeout" => Ok(Self::NetworkTimeout),
            "referrals" => Ok(Self::Referrals),
            _ => Err(Error::NonExistentProperty(format!(
                "option `{s}` is not defined for a directory connection"
            ))),
        }
    }
}

/// Value carried by a [`DirectoryOption`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OptionValue {
    /// Boolean option value.
    Boolean(bool),
    /// Integer option value.
    Integer(i64),
}

impl OptionValue {
    /// Returns the integer payload, if this is an integer value.
    #[must_use]
    pub const fn as_integer(self) -> Option<i64> {
        match self {
            Self::Integer(value) => Some(value),
            Self::Boolean(_) => None,
        }
    }

    /// Returns the boolean payload, if this is a boolean value.
    #[must_use]
    pub const fn as_bool(self) -> Option<bool> {
        match self {
            Self::Boolean(value) => Some(value),
            Self::Integer(_) => None,
        }
    }
}

impl From<bool> for OptionValue {
    fn from(value: bool) -> Self {
        Self::Boolean(value)
    }
}

impl From<i64> for OptionValue {
    fn from(value: i64) -> Self {
        Self::Integer(value)
    }
}

/// An option/value pair applied to a connection right after it is established.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OptionSetting {
    /// Option to set.
    pub option: DirectoryOption,
    /// Value to assign.
    pub value: OptionValue,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_option_names() {
        assert_eq!(
            "protocol_version".parse::<DirectoryOption>().unwrap(),
            DirectoryOption::ProtocolVersion
        );
        assert_eq!(
            "SIZELIMIT".parse::<DirectoryOption>().unwrap(),
            DirectoryOption::SizeLimit
        );
        let err = "colour".parse::<DirectoryOption>().unwrap_err();
        assert!(matches!(err, Error::NonExistentProperty(_)));
    }

    #[test]
    fn name_round_trips_through_from_str() {
        for option in [
            DirectoryOption::ProtocolVersion,
            DirectoryOption::Deref,
            DirectoryOption::SizeLimit,
            DirectoryOption::TimeLimit,
            DirectoryOption::NetworkTimeout,
            DirectoryOption::Referrals,
        ] {
            assert_eq!(option.name().parse::<DirectoryOption>().unwrap(), option);
        }
    }

    #[test]
    fn deserialize_settings() {
        let settings: Vec<OptionSetting> = serde_json::from_str(
            r#"[{"option":"referrals","value":false},{"option":"timelimit","value":15}]"#,
        )
        .unwrap();
        assert_eq!(settings[0].option, DirectoryOption::Referrals);
        assert_eq!(settings[0].value.as_bool(), Some(false));
        assert_eq!(settings[1].value.as_integer(), Some(15));
    }
}

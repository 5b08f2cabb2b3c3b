//! Escaping for values embedded in search filters and distinguished names.
//!
//! Every in-scope character is replaced by a backslash followed by the two-digit
//! lowercase hex of each of its UTF-8 bytes, so `*` becomes `\2a` and `é` becomes
//! `\c3\a9`.

use std::fmt::Write;
use std::ops::BitOr;

const FILTER_RESERVED: &[char] = &['\\', '*', '(', ')', '\0'];
const DN_RESERVED: &[char] = &['\\', ',', '=', '+', '<', '>', ';', '"', '#'];

/// Selects which characters [`escape`] rewrites.
///
/// Flags combine with `|`. With no flag set, every character outside printable
/// ASCII (control characters and all non-ASCII) is escaped.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct EscapeFlags(u8);

impl EscapeFlags {
    /// Escape non-printable characters only.
    pub const NONE: Self = Self(0);
    /// Escape characters reserved in search filters: `\ * ( )` and NUL.
    pub const FILTER: Self = Self(0x01);
    /// Escape characters reserved in distinguished names: `\ , = + < > ; " #`.
    pub const DN: Self = Self(0x02);

    /// Returns true if all flags in `other` are set.
    #[must_use]
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    /// Returns true if no flag is set.
    #[must_use]
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Raw flag bits.
    #[must_use]
    pub const fn bits(self) -> u8 {
        self.0
    }
}

impl BitOr for EscapeFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self::Output {
        Self(self.0 | rhs.0)
    }
}

/// Escapes `subject` for the contexts selected by `flags`.
///
/// Characters that appear in `ignore` are left untouched even when they are in
/// scope. An empty subject always yields an empty string.
#[must_use]
pub fn escape(subject: &str, ignore: &str, flags: EscapeFlags) -> String {
    if subject.is_empty() {
        return String::new();
    }

    let mut escaped = String::with_capacity(subject.len());
    for ch in subject.chars() {
        if in_scope(ch, flags) && !ignore.contains(ch) {
            let mut buf = [0_u8; 4];
            for byte in ch.encode_utf8(&mut buf).bytes() {
                // Writing into a String cannot fail.
                let _ = write!(escaped, "\\{byte:02x}");
            }
        } else {
            escaped.push(ch);
        }
    }

    escaped
}

/// Escapes a value for use inside a search filter.
#[must_use]
pub fn escape_filter_value(value: &str) -> String {
    escape(value, "", EscapeFlags::FILTER)
}

/// Escapes a value for use as an attribute value inside a distinguished name.
#[must_use]
pub fn escape_dn_value(value: &str) -> String {
    escape(value, "", EscapeFlags::DN)
}

fn in_scope(ch: char, flags: EscapeFlags) -> bool {
    if flags.is_empty() {
        return !matches!(ch, ' '..='~');
    }

    (flags.contains(EscapeFlags::FILTER) && FILTER_RESERVED.contains(&ch))
        || (flags.contains(EscapeFlags::DN) && DN_RESERVED.contains(&ch))
}

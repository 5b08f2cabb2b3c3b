//! Read-only view over one entry of a search result.

use crate::engine::{ConnectionHandle, DirectoryEngine, EntryHandle};
use crate::ldap::codes::DECODING_ERROR;
use crate::result_set::resolve_node;
use ldapi_core::{Diagnostic, Error, Result};
use std::str::FromStr;

/// How [`Entry::get_values`] returns attribute values.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ValueMode {
    /// Raw bytes; safe for any attribute.
    #[default]
    Binary,
    /// UTF-8 strings; fails on values that are not valid UTF-8.
    Text,
}

impl FromStr for ValueMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "binary" => Ok(Self::Binary),
            "text" => Ok(Self::Text),
            _ => Err(Error::InvalidMode(format!(
                "value mode `{s}` must be `binary` or `text`"
            ))),
        }
    }
}

/// Attribute values as returned by [`Entry::get_values`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttributeValues {
    /// Raw values.
    Binary(Vec<Vec<u8>>),
    /// Values decoded as UTF-8.
    Text(Vec<String>),
}

impl AttributeValues {
    /// Number of values.
    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            Self::Binary(values) => values.len(),
            Self::Text(values) => values.len(),
        }
    }

    /// Returns true if there are no values.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// One entry of a [`ResultSet`](crate::ResultSet).
///
/// Entries form a forward-only chain: [`Entry::next_entry`] yields the next
/// sibling or `None`, never an earlier one.
pub struct Entry<'r, E: DirectoryEngine> {
    engine: &'r E,
    link: ConnectionHandle,
    entry: EntryHandle,
}

impl<'r, E: DirectoryEngine> Entry<'r, E> {
    pub(crate) fn new(engine: &'r E, link: ConnectionHandle, entry: EntryHandle) -> Self {
        Self {
            engine,
            link,
            entry,
        }
    }

    /// Engine handle of the entry.
    #[must_use]
    pub const fn handle(&self) -> EntryHandle {
        self.entry
    }

    /// Next entry of the result, or `None` at the end of the chain.
    ///
    /// # Errors
    ///
    /// Returns [`Error::EntryRetrievalFailure`] if the engine reports an error.
    pub fn next_entry(&self) -> Result<Option<Entry<'r, E>>> {
        let next = self.engine.next_entry(self.link, self.entry);
        Ok(resolve_node(self.engine, self.link, next, Error::EntryRetrievalFailure)?
            .map(|handle| Entry::new(self.engine, self.link, handle)))
    }

    /// Values of `attribute` in the requested mode.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ValueRetrievalFailure`] if the engine cannot produce the
    /// values (including when the attribute is absent) or, in text mode, when a
    /// value is not valid UTF-8.
    pub fn get_values(&self, attribute: &str, mode: ValueMode) -> Result<AttributeValues> {
        let values = self.get_binary_values(attribute)?;

        match mode {
            ValueMode::Binary => Ok(AttributeValues::Binary(values)),
            ValueMode::Text => values
                .into_iter()
                .map(|value| {
                    String::from_utf8(value).map_err(|_| {
                        Error::ValueRetrievalFailure(Diagnostic::new(
                            DECODING_ERROR,
                            format!("value of `{attribute}` is not valid UTF-8"),
                        ))
                    })
                })
                .collect::<Result<Vec<_>>>()
                .map(AttributeValues::Text),
        }
    }

    /// Raw values of `attribute`.
    ///
    /// # Errors
    ///
    /// See [`Entry::get_values`].
    pub fn get_binary_values(&self, attribute: &str) -> Result<Vec<Vec<u8>>> {
        self.engine
            .get_values(self.link, self.entry, attribute)
            .map_err(Error::ValueRetrievalFailure)
    }

    /// Attribute names present on the entry, in server order.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ValueRetrievalFailure`] if the engine cannot list them.
    pub fn get_attributes(&self) -> Result<Vec<String>> {
        self.engine
            .get_attributes(self.link, self.entry)
            .map_err(Error::ValueRetrievalFailure)
    }

    /// Distinguished name of the entry.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ValueRetrievalFailure`] if the engine cannot produce it.
    pub fn get_dn(&self) -> Result<String> {
        self.engine
            .get_dn(self.link, self.entry)
            .map_err(Error::ValueRetrievalFailure)
    }
}

impl<E: DirectoryEngine> std::fmt::Debug for Entry<'_, E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Entry")
            .field("link", &self.link)
            .field("entry", &self.entry)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::MockDirectoryEngine;

    const LINK: ConnectionHandle = ConnectionHandle::new(1);
    const ENTRY: EntryHandle = EntryHandle::new(7);

    #[test]
    fn value_mode_parsing() {
        assert_eq!("binary".parse::<ValueMode>().unwrap(), ValueMode::Binary);
        assert_eq!("Text".parse::<ValueMode>().unwrap(), ValueMode::Text);
        assert!(matches!(
            "base64".parse::<ValueMode>(),
            Err(Error::InvalidMode(_))
        ));
        assert_eq!(ValueMode::default(), ValueMode::Binary);
    }

    #[test]
    fn binary_and_text_values() {
        let mut engine = MockDirectoryEngine::new();
        engine
            .expect_get_values()
            .returning(|_, _, _| Ok(vec![b"top".to_vec(), b"person".to_vec()]));

        let entry = Entry::new(&engine, LINK, ENTRY);
        assert_eq!(
            entry.get_values("objectClass", ValueMode::Binary).unwrap(),
            AttributeValues::Binary(vec![b"top".to_vec(), b"person".to_vec()])
        );
        assert_eq!(
            entry.get_values("objectClass", ValueMode::Text).unwrap(),
            AttributeValues::Text(vec!["top".to_string(), "person".to_string()])
        );
    }

    #[test]
    fn text_mode_rejects_invalid_utf8() {
        let mut engine = MockDirectoryEngine::new();
        engine
            .expect_get_values()
            .returning(|_, _, _| Ok(vec![vec![0xff, 0xfe, 0x00]]));

        let entry = Entry::new(&engine, LINK, ENTRY);
        let values = entry.get_binary_values("jpegPhoto").unwrap();
        assert_eq!(values, vec![vec![0xff, 0xfe, 0x00]]);
        let err = entry.get_values("jpegPhoto", ValueMode::Text).unwrap_err();
        assert!(matches!(err, Error::ValueRetrievalFailure(_)));
        assert_eq!(err.code(), Some(DECODING_ERROR));
    }

    #[test]
    fn missing_attribute_is_value_retrieval_failure() {
        let mut engine = MockDirectoryEngine::new();
        engine
            .expect_get_values()
            .returning(|_, _, _| Err(Diagnostic::new(16, "No such attribute")));

        let entry = Entry::new(&engine, LINK, ENTRY);
        let err = entry.get_values("mail", ValueMode::Binary).unwrap_err();
        assert!(matches!(err, Error::ValueRetrievalFailure(_)));
        assert_eq!(err.code(), Some(16));
    }

    #[test]
    fn attributes_and_dn() {
        let mut engine = MockDirectoryEngine::new();
        engine
            .expect_get_attributes()
            .returning(|_, _| Ok(vec!["objectClass".to_string(), "cn".to_string()]));
        engine
            .expect_get_dn()
            .returning(|_, _| Err(Diagnostic::new(-4, "Decoding error")));

        let entry = Entry::new(&engine, LINK, ENTRY);
        assert_eq!(entry.get_attributes().unwrap(), vec!["objectClass", "cn"]);
        assert!(matches!(entry.get_dn(), Err(Error::ValueRetrievalFailure(_))));
    }

    #[test]
    fn next_entry_end_of_chain_and_error() {
        let mut engine = MockDirectoryEngine::new();
        engine.expect_next_entry().returning(|_, _| None);
        let mut sequence = mockall::Sequence::new();
        engine
            .expect_last_error()
            .times(1)
            .in_sequence(&mut sequence)
            .returning(|_| Diagnostic::success());
        engine
            .expect_last_error()
            .times(1)
            .in_sequence(&mut sequence)
            .returning(|_| Diagnostic::new(-1, "Can't contact LDAP server"));

        let entry = Entry::new(&engine, LINK, ENTRY);
        assert!(entry.next_entry().unwrap().is_none());
        assert!(matches!(
            entry.next_entry(),
            Err(Error::EntryRetrievalFailure(_))
        ));
    }
}

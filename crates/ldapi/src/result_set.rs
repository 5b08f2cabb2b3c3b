//! Completed search results and their traversal.

use crate::engine::{ConnectionHandle, DirectoryEngine, EntryHandle, ReferenceHandle, ResultHandle};
use crate::entry::Entry;
use crate::reference::Reference;
use ldapi_core::{Diagnostic, Error, Result};
use tracing::warn;

/// Final status of an operation, as reported by the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedResult {
    /// LDAP result code.
    pub code: i32,
    /// Matched DN, empty when the server sent none.
    pub matched_dn: String,
    /// Diagnostic message, empty when the server sent none.
    pub message: String,
    /// Referral URLs attached to the result.
    pub referrals: Vec<String>,
}

/// Paged-results response of a paged search.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PageCookie {
    /// Continuation cookie; empty when the server has no further pages.
    pub cookie: Vec<u8>,
    /// The server's estimate of the total result size, when it sent one.
    pub estimated_total: Option<u64>,
}

impl PageCookie {
    /// Returns true when the cookie signals that no pages remain.
    #[must_use]
    pub fn is_last_page(&self) -> bool {
        self.cookie.is_empty()
    }
}

/// One fully materialized entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryRecord {
    /// Distinguished name.
    pub dn: String,
    /// Attributes in server order, each with its values in server order.
    pub attributes: Vec<(String, Vec<Vec<u8>>)>,
}

impl EntryRecord {
    /// Values of an attribute, matched case-insensitively.
    #[must_use]
    pub fn values(&self, attribute: &str) -> Option<&[Vec<u8>]> {
        self.attributes
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(attribute))
            .map(|(_, values)| values.as_slice())
    }

    /// First value of an attribute decoded as UTF-8, if present and valid.
    #[must_use]
    pub fn first_text(&self, attribute: &str) -> Option<&str> {
        self.values(attribute)
            .and_then(|values| values.first())
            .and_then(|value| std::str::from_utf8(value).ok())
    }

    /// Number of attributes on the entry.
    #[must_use]
    pub fn attribute_count(&self) -> usize {
        self.attributes.len()
    }
}

/// Every entry of a result, materialized at once.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EntrySet {
    /// Entries in server order.
    pub entries: Vec<EntryRecord>,
}

impl EntrySet {
    /// Number of entries.
    #[must_use]
    pub fn count(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if the result held no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterates over the entries.
    pub fn iter(&self) -> std::slice::Iter<'_, EntryRecord> {
        self.entries.iter()
    }
}

impl IntoIterator for EntrySet {
    type Item = EntryRecord;
    type IntoIter = std::vec::IntoIter<EntryRecord>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_iter()
    }
}

/// The outcome of a search, list or read.
///
/// The result handle is owned here and released exactly once when the set is
/// dropped. The connection is only borrowed: the set cannot outlive the
/// [`Directory`](crate::Directory) that produced it.
pub struct ResultSet<'d, E: DirectoryEngine> {
    engine: &'d E,
    link: ConnectionHandle,
    result: ResultHandle,
}

impl<'d, E: DirectoryEngine> ResultSet<'d, E> {
    pub(crate) fn new(engine: &'d E, link: ConnectionHandle, result: ResultHandle) -> Self {
        Self {
            engine,
            link,
            result,
        }
    }

    /// Engine handle of the result.
    #[must_use]
    pub const fn handle(&self) -> ResultHandle {
        self.result
    }

    /// Number of entries in the result.
    ///
    /// # Errors
    ///
    /// Returns [`Error::EntryCountRetrievalFailure`] if the engine cannot count them.
    pub fn entry_count(&self) -> Result<usize> {
        self.engine
            .count_entries(self.link, self.result)
            .map_err(Error::EntryCountRetrievalFailure)
    }

    /// First entry of the result, or `None` when it holds no entries.
    ///
    /// # Errors
    ///
    /// Returns [`Error::EntryRetrievalFailure`] if the engine reports an error.
    pub fn first_entry(&self) -> Result<Option<Entry<'_, E>>> {
        let entry = self.engine.first_entry(self.link, self.result);
        Ok(resolve_node(self.engine, self.link, entry, Error::EntryRetrievalFailure)?
            .map(|handle| Entry::new(self.engine, self.link, handle)))
    }

    /// First continuation reference, or `None` when there are none.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ReferenceRetrievalFailure`] if the engine reports an error.
    pub fn first_reference(&self) -> Result<Option<Reference<'_, E>>> {
        let reference = self.engine.first_reference(self.link, self.result);
        Ok(
            resolve_node(self.engine, self.link, reference, Error::ReferenceRetrievalFailure)?
                .map(|handle| Reference::new(self.engine, self.link, handle)),
        )
    }

    /// Iterates over the entry chain. Iteration stops after the first error.
    #[must_use]
    pub fn entries(&self) -> Entries<'_, E> {
        Entries {
            engine: self.engine,
            link: self.link,
            result: self.result,
            cursor: Cursor::Start,
        }
    }

    /// Iterates over the reference chain. Iteration stops after the first error.
    #[must_use]
    pub fn references(&self) -> References<'_, E> {
        References {
            engine: self.engine,
            link: self.link,
            result: self.result,
            cursor: Cursor::Start,
        }
    }

    /// Parses the operation's final result code, matched DN, message and referrals.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InformationRetrievalFailure`] if the engine cannot parse it.
    pub fn parse(&self) -> Result<ParsedResult> {
        self.engine
            .parse_result(self.link, self.result)
            .map_err(Error::InformationRetrievalFailure)
    }

    /// Materializes every entry with all of its attributes.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ValueRetrievalFailure`] if the engine cannot produce them.
    pub fn get_entries(&self) -> Result<EntrySet> {
        self.engine
            .get_entries(self.link, self.result)
            .map(|entries| EntrySet { entries })
            .map_err(Error::ValueRetrievalFailure)
    }

    /// Reads the paging cookie and size estimate from a paged search.
    ///
    /// An empty cookie means no further pages; it is not checked here.
    ///
    /// # Errors
    ///
    /// Returns [`Error::PaginationFailure`] if the result carries no usable
    /// paged-results response.
    pub fn control_paged_result(&self) -> Result<PageCookie> {
        self.engine
            .paged_result_response(self.link, self.result)
            .map_err(Error::PaginationFailure)
    }
}

impl<E: DirectoryEngine> Drop for ResultSet<'_, E> {
    fn drop(&mut self) {
        if let Err(diagnostic) = self.engine.free_result(self.result) {
            warn!(result = self.result.raw(), %diagnostic, "failed to release search result");
        }
    }
}

impl<E: DirectoryEngine> std::fmt::Debug for ResultSet<'_, E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResultSet")
            .field("link", &self.link)
            .field("result", &self.result)
            .finish()
    }
}

/// Tells "end of chain" apart from "engine failure" after a traversal call.
///
/// A missing node is only an error when the connection's last diagnostic is not
/// a success.
pub(crate) fn resolve_node<E, H>(
    engine: &E,
    link: ConnectionHandle,
    node: Option<H>,
    failure: fn(Diagnostic) -> Error,
) -> Result<Option<H>>
where
    E: DirectoryEngine + ?Sized,
{
    match node {
        Some(handle) => Ok(Some(handle)),
        None => {
            let diagnostic = engine.last_error(link);
            if diagnostic.is_success() {
                Ok(None)
            } else {
                Err(failure(diagnostic))
            }
        }
    }
}

enum Cursor<H> {
    Start,
    At(H),
    Done,
}

/// Iterator over the entries of a [`ResultSet`].
pub struct Entries<'r, E: DirectoryEngine> {
    engine: &'r E,
    link: ConnectionHandle,
    result: ResultHandle,
    cursor: Cursor<EntryHandle>,
}

impl<'r, E: DirectoryEngine> Iterator for Entries<'r, E> {
    type Item = Result<Entry<'r, E>>;

    fn next(&mut self) -> Option<Self::Item> {
        let fetched = match self.cursor {
            Cursor::Start => self.engine.first_entry(self.link, self.result),
            Cursor::At(handle) => self.engine.next_entry(self.link, handle),
            Cursor::Done => return None,
        };

        match resolve_node(self.engine, self.link, fetched, Error::EntryRetrievalFailure) {
            Ok(Some(handle)) => {
                self.cursor = Cursor::At(handle);
                Some(Ok(Entry::new(self.engine, self.link, handle)))
            }
            Ok(None) => {
                self.cursor = Cursor::Done;
                None
            }
            Err(err) => {
                self.cursor = Cursor::Done;
                Some(Err(err))
            }
        }
    }
}

/// Iterator over the continuation references of a [`ResultSet`].
pub struct References<'r, E: DirectoryEngine> {
    engine: &'r E,
    link: ConnectionHandle,
    result: ResultHandle,
    cursor: Cursor<ReferenceHandle>,
}

impl<'r, E: DirectoryEngine> Iterator for References<'r, E> {
    type Item = Result<Reference<'r, E>>;

    fn next(&mut self) -> Option<Self::Item> {
        let fetched = match self.cursor {
            Cursor::Start => self.engine.first_reference(self.link, self.result),
            Cursor::At(handle) => self.engine.next_reference(self.link, handle),
            Cursor::Done => return None,
        };

        match resolve_node(self.engine, self.link, fetched, Error::ReferenceRetrievalFailure) {
            Ok(Some(handle)) => {
                self.cursor = Cursor::At(handle);
                Some(Ok(Reference::new(self.engine, self.link, handle)))
            }
            Ok(None) => {
                self.cursor = Cursor::Done;
                None
            }
            Err(err) => {
                self.cursor = Cursor::Done;
                Some(Err(err))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::MockDirectoryEngine;
    use mockall::predicate::eq;

    const LINK: ConnectionHandle = ConnectionHandle::new(1);
    const RESULT: ResultHandle = ResultHandle::new(10);

    fn engine_with_free() -> MockDirectoryEngine {
        let mut engine = MockDirectoryEngine::new();
        engine
            .expect_free_result()
            .with(eq(RESULT))
            .times(1)
            .returning(|_| Ok(()));
        engine
    }

    #[test]
    fn drop_releases_result_once() {
        let engine = engine_with_free();
        let results = ResultSet::new(&engine, LINK, RESULT);
        drop(results);
    }

    #[test]
    fn release_failure_is_swallowed() {
        let mut engine = MockDirectoryEngine::new();
        engine
            .expect_free_result()
            .times(1)
            .returning(|_| Err(Diagnostic::new(-1, "Can't contact LDAP server")));
        let results = ResultSet::new(&engine, LINK, RESULT);
        drop(results);
    }

    #[test]
    fn first_entry_on_empty_result_is_none() {
        let mut engine = engine_with_free();
        engine.expect_first_entry().returning(|_, _| None);
        engine.expect_last_error().returning(|_| Diagnostic::success());

        let results = ResultSet::new(&engine, LINK, RESULT);
        assert!(results.first_entry().unwrap().is_none());
        assert_eq!(results.entries().count(), 0);
    }

    #[test]
    fn first_entry_with_error_code_fails() {
        let mut engine = engine_with_free();
        engine.expect_first_entry().returning(|_, _| None);
        engine
            .expect_last_error()
            .returning(|_| Diagnostic::new(-4, "Decoding error"));

        let results = ResultSet::new(&engine, LINK, RESULT);
        let err = results.first_entry().unwrap_err();
        assert!(matches!(err, Error::EntryRetrievalFailure(_)));
        assert_eq!(err.code(), Some(-4));
    }

    #[test]
    fn first_reference_disambiguates_none_and_error() {
        let mut engine = engine_with_free();
        engine.expect_first_reference().returning(|_, _| None);
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
            .returning(|_| Diagnostic::new(-9, "Bad parameter to an ldap routine"));

        let results = ResultSet::new(&engine, LINK, RESULT);
        assert!(results.first_reference().unwrap().is_none());
        assert!(matches!(
            results.first_reference(),
            Err(Error::ReferenceRetrievalFailure(_))
        ));
    }

    #[test]
    fn entries_iterator_walks_the_chain() {
        let mut engine = engine_with_free();
        engine
            .expect_first_entry()
            .returning(|_, _| Some(EntryHandle::new(100)));
        engine.expect_next_entry().returning(|_, entry| {
            if entry.raw() < 102 {
                Some(EntryHandle::new(entry.raw() + 1))
            } else {
                None
            }
        });
        engine.expect_last_error().returning(|_| Diagnostic::success());
        engine.expect_get_dn().returning(|_, entry| Ok(format!("uid=u{},dc=example", entry.raw())));

        let results = ResultSet::new(&engine, LINK, RESULT);
        let dns = results
            .entries()
            .map(|entry| entry.and_then(|entry| entry.get_dn()))
            .collect::<Result<Vec<_>>>()
            .unwrap();
        assert_eq!(
            dns,
            vec!["uid=u100,dc=example", "uid=u101,dc=example", "uid=u102,dc=example"]
        );
    }

    #[test]
    fn entries_iterator_stops_after_error() {
        let mut engine = engine_with_free();
        engine
            .expect_first_entry()
            .returning(|_, _| Some(EntryHandle::new(100)));
        engine.expect_next_entry().returning(|_, _| None);
        engine
            .expect_last_error()
            .returning(|_| Diagnostic::new(-1, "Can't contact LDAP server"));

        let results = ResultSet::new(&engine, LINK, RESULT);
        let mut entries = results.entries();
        assert!(entries.next().unwrap().is_ok());
        assert!(matches!(
            entries.next(),
            Some(Err(Error::EntryRetrievalFailure(_)))
        ));
        assert!(entries.next().is_none());
    }

    #[test]
    fn entry_count_and_materialization() {
        let mut engine = engine_with_free();
        engine.expect_count_entries().returning(|_, _| Ok(0));
        engine.expect_get_entries().returning(|_, _| Ok(Vec::new()));

        let results = ResultSet::new(&engine, LINK, RESULT);
        assert_eq!(results.entry_count().unwrap(), 0);
        assert!(results.get_entries().unwrap().is_empty());
    }

    #[test]
    fn entry_count_failure() {
        let mut engine = engine_with_free();
        engine
            .expect_count_entries()
            .returning(|_, _| Err(Diagnostic::new(-9, "Bad parameter to an ldap routine")));

        let results = ResultSet::new(&engine, LINK, RESULT);
        assert!(matches!(
            results.entry_count(),
            Err(Error::EntryCountRetrievalFailure(_))
        ));
    }

    #[test]
    fn get_entries_builds_records() {
        let mut engine = engine_with_free();
        engine.expect_get_entries().returning(|_, _| {
            Ok(vec![EntryRecord {
                dn: "uid=jdoe,dc=example,dc=com".to_string(),
                attributes: vec![
                    ("cn".to_string(), vec![b"John Doe".to_vec()]),
                    (
                        "mail".to_string(),
                        vec![b"jdoe@example.com".to_vec(), b"john@example.com".to_vec()],
                    ),
                ],
            }])
        });

        let results = ResultSet::new(&engine, LINK, RESULT);
        let set = results.get_entries().unwrap();
        assert_eq!(set.count(), 1);
        let record = &set.entries[0];
        assert_eq!(record.attribute_count(), 2);
        assert_eq!(record.first_text("CN"), Some("John Doe"));
        assert_eq!(record.values("mail").map(<[Vec<u8>]>::len), Some(2));
        assert!(record.values("sn").is_none());
    }

    #[test]
    fn parse_and_paging() {
        let mut engine = engine_with_free();
        engine.expect_parse_result().returning(|_, _| {
            Ok(ParsedResult {
                code: 10,
                matched_dn: String::new(),
                message: String::new(),
                referrals: vec!["ldap://other.example.com/dc=example,dc=com".to_string()],
            })
        });
        engine.expect_paged_result_response().returning(|_, _| {
            Ok(PageCookie {
                cookie: Vec::new(),
                estimated_total: Some(42),
            })
        });

        let results = ResultSet::new(&engine, LINK, RESULT);
        let parsed = results.parse().unwrap();
        assert_eq!(parsed.code, 10);
        assert_eq!(parsed.referrals.len(), 1);

        let page = results.control_paged_result().unwrap();
        assert!(page.is_last_page());
        assert_eq!(page.estimated_total, Some(42));
    }

    #[test]
    fn parse_and_paging_failures() {
        let mut engine = engine_with_free();
        engine
            .expect_parse_result()
            .returning(|_, _| Err(Diagnostic::new(-4, "Decoding error")));
        engine
            .expect_paged_result_response()
            .returning(|_, _| Err(Diagnostic::new(-13, "Control not found")));

        let results = ResultSet::new(&engine, LINK, RESULT);
        assert!(matches!(
            results.parse(),
            Err(Error::InformationRetrievalFailure(_))
        ));
        assert!(matches!(
            results.control_paged_result(),
            Err(Error::PaginationFailure(_))
        ));
    }
}

//! Continuation references (search referrals) of a result.

use crate::engine::{ConnectionHandle, DirectoryEngine, ReferenceHandle};
use crate::result_set::resolve_node;
use ldapi_core::{Error, Result};

/// One continuation reference of a [`ResultSet`](crate::ResultSet).
pub struct Reference<'r, E: DirectoryEngine> {
    engine: &'r E,
    link: ConnectionHandle,
    reference: ReferenceHandle,
}

impl<'r, E: DirectoryEngine> Reference<'r, E> {
    pub(crate) fn new(engine: &'r E, link: ConnectionHandle, reference: ReferenceHandle) -> Self {
        Self {
            engine,
            link,
            reference,
        }
    }

    /// Engine handle of the reference.
    #[must_use]
    pub const fn handle(&self) -> ReferenceHandle {
        self.reference
    }

    /// Next reference of the result, or `None` at the end of the chain.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ReferenceRetrievalFailure`] if the engine reports an error.
    pub fn next_reference(&self) -> Result<Option<Reference<'r, E>>> {
        let next = self.engine.next_reference(self.link, self.reference);
        Ok(resolve_node(self.engine, self.link, next, Error::ReferenceRetrievalFailure)?
            .map(|handle| Reference::new(self.engine, self.link, handle)))
    }

    /// Referral URLs carried by this reference.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ValueRetrievalFailure`] if the engine cannot parse it.
    pub fn parse(&self) -> Result<Vec<String>> {
        self.engine
            .parse_reference(self.link, self.reference)
            .map_err(Error::ValueRetrievalFailure)
    }
}

impl<E: DirectoryEngine> std::fmt::Debug for Reference<'_, E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reference")
            .field("link", &self.link)
            .field("reference", &self.reference)
            .finish()
    }
}

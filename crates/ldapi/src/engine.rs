//! Contract between the connection state machine and the protocol engine.
//!
//! The engine performs the network I/O and PDU encoding; the rest of the crate
//! only calls it through [`DirectoryEngine`] and interprets what comes back. All
//! engine resources are referred to by opaque, copyable handle tokens.

use crate::result_set::{EntryRecord, PageCookie, ParsedResult};
use crate::search::{SearchRequest, SearchScope};
use ldapi_core::option::{DirectoryOption, OptionValue};
use ldapi_core::Diagnostic;
use secrecy::SecretString;
use std::collections::BTreeMap;

/// Result of an engine call; failures carry the engine diagnostic.
pub type EngineResult<T> = std::result::Result<T, Diagnostic>;

/// Attribute name to values mapping used by add and the single-shot modify calls.
pub type AttributeMap = BTreeMap<String, Vec<Vec<u8>>>;

/// Callback consulted when the engine follows a referral.
///
/// It receives the referral URL and returns the credentials to bind with, or
/// `None` for an anonymous bind.
pub type RebindProc = Box<dyn FnMut(&str) -> Option<BindCredentials> + Send>;

macro_rules! handle {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(u64);

        impl $name {
            /// Wraps an engine-issued token.
            #[must_use]
            pub const fn new(raw: u64) -> Self {
                Self(raw)
            }

            /// Returns the engine-issued token.
            #[must_use]
            pub const fn raw(self) -> u64 {
                self.0
            }
        }
    };
}

handle!(
    /// Token for an open engine connection.
    ConnectionHandle
);
handle!(
    /// Token for a completed search result held by the engine.
    ResultHandle
);
handle!(
    /// Token for one entry inside a result.
    EntryHandle
);
handle!(
    /// Token for one continuation reference inside a result.
    ReferenceHandle
);

/// Credentials handed back by a [`RebindProc`].
#[derive(Debug, Clone)]
pub struct BindCredentials {
    /// DN to bind as.
    pub dn: String,
    /// Password for `dn`.
    pub password: SecretString,
}

impl BindCredentials {
    /// Creates credentials from a DN and password.
    #[must_use]
    pub fn new(dn: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            dn: dn.into(),
            password: SecretString::from(password.into()),
        }
    }
}

/// Parameters of a SASL bind. Every field is optional.
#[derive(Debug, Default)]
pub struct SaslCredentials {
    /// DN to bind as.
    pub dn: Option<String>,
    /// Password, for mechanisms that use one.
    pub password: Option<SecretString>,
    /// SASL mechanism name, e.g. `EXTERNAL`.
    pub mechanism: Option<String>,
    /// SASL realm.
    pub realm: Option<String>,
    /// Authentication identity.
    pub authc_id: Option<String>,
    /// Authorization identity.
    pub authz_id: Option<String>,
    /// SASL security properties.
    pub props: Option<String>,
}

impl SaslCredentials {
    /// Creates credentials for the given mechanism.
    #[must_use]
    pub fn mechanism(mechanism: impl Into<String>) -> Self {
        Self {
            mechanism: Some(mechanism.into()),
            ..Self::default()
        }
    }

    /// Sets the bind DN.
    #[must_use]
    pub fn with_dn(mut self, dn: impl Into<String>) -> Self {
        self.dn = Some(dn.into());
        self
    }

    /// Sets the password.
    #[must_use]
    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(SecretString::from(password.into()));
        self
    }

    /// Sets the realm.
    #[must_use]
    pub fn with_realm(mut self, realm: impl Into<String>) -> Self {
        self.realm = Some(realm.into());
        self
    }

    /// Sets the authentication identity.
    #[must_use]
    pub fn with_authc_id(mut self, authc_id: impl Into<String>) -> Self {
        self.authc_id = Some(authc_id.into());
        self
    }

    /// Sets the authorization identity.
    #[must_use]
    pub fn with_authz_id(mut self, authz_id: impl Into<String>) -> Self {
        self.authz_id = Some(authz_id.into());
        self
    }

    /// Sets the security properties.
    #[must_use]
    pub fn with_props(mut self, props: impl Into<String>) -> Self {
        self.props = Some(props.into());
        self
    }
}

/// Kind of single-shot attribute modification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttributeChange {
    /// Add values to the attributes.
    Add,
    /// Delete values (an empty list deletes the attribute).
    Delete,
    /// Replace all values of the attributes.
    Replace,
}

/// Operation code of one batch modification element.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BatchOp {
    /// Add the values.
    Add,
    /// Remove the listed values.
    Remove,
    /// Remove the attribute entirely.
    RemoveAll,
    /// Replace all values.
    Replace,
}

/// One validated element of a batch modification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchOperation {
    /// Attribute to change.
    pub attribute: String,
    /// What to do with it.
    pub op: BatchOp,
    /// Values; always empty for [`BatchOp::RemoveAll`].
    pub values: Vec<Vec<u8>>,
}

/// Outcome of a compare operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOutcome {
    /// The entry holds the value.
    True,
    /// The entry does not hold the value.
    False,
    /// The engine could not decide; details are in `last_error`.
    Undetermined,
}

/// Arguments of a rename (modify DN) operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenameRequest {
    /// Entry to rename.
    pub dn: String,
    /// New relative DN.
    pub new_rdn: String,
    /// New parent; `None` keeps the current parent.
    pub new_parent: Option<String>,
    /// Whether to remove the old RDN values from the entry.
    pub delete_old_rdn: bool,
}

/// Paged-results control staged for the next search on a connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageControl {
    /// Requested page size.
    pub page_size: u32,
    /// Whether the server must reject the search if it cannot page.
    pub critical: bool,
    /// Cookie from the previous page; empty for the first page.
    pub cookie: Vec<u8>,
}

/// Capabilities a directory-protocol engine provides.
///
/// Traversal accessors (`first_entry`, `next_entry`, `first_reference`,
/// `next_reference`) return `None` both at the end of a chain and on failure;
/// callers tell the two apart through [`DirectoryEngine::last_error`], which
/// reports the outcome of the most recent call on the connection.
#[cfg_attr(test, mockall::automock)]
pub trait DirectoryEngine {
    /// Opens a connection to `host` (a host name or an LDAP URL) on `port`.
    fn connect(&self, host: &str, port: u16) -> EngineResult<ConnectionHandle>;
    /// Diagnostic of the last call made on `link`.
    fn last_error(&self, link: ConnectionHandle) -> Diagnostic;
    /// Simple bind; empty DN and password bind anonymously.
    fn bind(&self, link: ConnectionHandle, dn: &str, password: &str) -> EngineResult<()>;
    /// SASL bind.
    fn sasl_bind(&self, link: ConnectionHandle, credentials: &SaslCredentials)
        -> EngineResult<()>;
    /// Negotiates TLS on a connection that has not bound yet.
    fn start_tls(&self, link: ConnectionHandle) -> EngineResult<()>;
    /// Closes the connection and releases the handle.
    fn unbind(&self, link: ConnectionHandle) -> EngineResult<()>;
    /// Runs a search with the given scope.
    fn search(
        &self,
        link: ConnectionHandle,
        scope: SearchScope,
        request: &SearchRequest,
    ) -> EngineResult<ResultHandle>;
    /// Adds an entry.
    fn add(&self, link: ConnectionHandle, dn: &str, entry: &AttributeMap) -> EngineResult<()>;
    /// Deletes an entry.
    fn delete(&self, link: ConnectionHandle, dn: &str) -> EngineResult<()>;
    /// Applies one kind of change to every attribute in `entry`.
    fn modify(
        &self,
        link: ConnectionHandle,
        dn: &str,
        change: AttributeChange,
        entry: &AttributeMap,
    ) -> EngineResult<()>;
    /// Whether [`DirectoryEngine::modify_batch`] is available.
    fn supports_modify_batch(&self) -> bool;
    /// Applies all operations as one request.
    fn modify_batch(
        &self,
        link: ConnectionHandle,
        dn: &str,
        operations: &[BatchOperation],
    ) -> EngineResult<()>;
    /// Compares an attribute value.
    fn compare(
        &self,
        link: ConnectionHandle,
        dn: &str,
        attribute: &str,
        value: &[u8],
    ) -> EngineResult<CompareOutcome>;
    /// Renames or moves an entry.
    fn rename(&self, link: ConnectionHandle, request: &RenameRequest) -> EngineResult<()>;
    /// Reads a connection option.
    fn get_option(&self, link: ConnectionHandle, option: DirectoryOption)
        -> EngineResult<OptionValue>;
    /// Writes a connection option.
    fn set_option(
        &self,
        link: ConnectionHandle,
        option: DirectoryOption,
        value: OptionValue,
    ) -> EngineResult<()>;
    /// Installs the callback used to bind when following referrals.
    fn set_rebind_proc(&self, link: ConnectionHandle, callback: RebindProc) -> EngineResult<()>;
    /// Stages a paged-results control for the next search.
    fn control_paged_result(&self, link: ConnectionHandle, control: &PageControl)
        -> EngineResult<()>;
    /// Number of entries in a result.
    fn count_entries(&self, link: ConnectionHandle, result: ResultHandle) -> EngineResult<usize>;
    /// First entry of a result.
    fn first_entry(&self, link: ConnectionHandle, result: ResultHandle) -> Option<EntryHandle>;
    /// Entry following `entry`.
    fn next_entry(&self, link: ConnectionHandle, entry: EntryHandle) -> Option<EntryHandle>;
    /// First continuation reference of a result.
    fn first_reference(&self, link: ConnectionHandle, result: ResultHandle)
        -> Option<ReferenceHandle>;
    /// Reference following `reference`.
    fn next_reference(
        &self,
        link: ConnectionHandle,
        reference: ReferenceHandle,
    ) -> Option<ReferenceHandle>;
    /// Raw values of `attribute` on an entry.
    fn get_values(
        &self,
        link: ConnectionHandle,
        entry: EntryHandle,
        attribute: &str,
    ) -> EngineResult<Vec<Vec<u8>>>;
    /// Attribute names present on an entry, in server order.
    fn get_attributes(&self, link: ConnectionHandle, entry: EntryHandle)
        -> EngineResult<Vec<String>>;
    /// Distinguished name of an entry.
    fn get_dn(&self, link: ConnectionHandle, entry: EntryHandle) -> EngineResult<String>;
    /// Referral URLs of a continuation reference.
    fn parse_reference(
        &self,
        link: ConnectionHandle,
        reference: ReferenceHandle,
    ) -> EngineResult<Vec<String>>;
    /// Every entry of a result with all of its attributes.
    fn get_entries(&self, link: ConnectionHandle, result: ResultHandle)
        -> EngineResult<Vec<EntryRecord>>;
    /// Final result code, matched DN, message and referrals.
    fn parse_result(&self, link: ConnectionHandle, result: ResultHandle)
        -> EngineResult<ParsedResult>;
    /// Paged-results response control of a result.
    fn paged_result_response(
        &self,
        link: ConnectionHandle,
        result: ResultHandle,
    ) -> EngineResult<PageCookie>;
    /// Releases a result.
    fn free_result(&self, result: ResultHandle) -> EngineResult<()>;
}

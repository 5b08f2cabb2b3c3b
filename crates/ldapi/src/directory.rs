//! Connection state machine.

use crate::engine::{
    AttributeChange, AttributeMap, BindCredentials, CompareOutcome, ConnectionHandle,
    DirectoryEngine, PageControl, RenameRequest, SaslCredentials,
};
use crate::ldap::LdapEngine;
use crate::modification::Modification;
use crate::result_set::ResultSet;
use crate::search::{SearchRequest, SearchScope};
use ldapi_core::config::{DirectoryConfig, TransportConfig};
use ldapi_core::option::{DirectoryOption, OptionValue};
use ldapi_core::{Error, Result};
use secrecy::ExposeSecret;
use tracing::{debug, warn};

/// A directory connection.
///
/// A `Directory` starts unconnected, holds at most one engine connection over
/// its lifetime, and becomes bound once a bind succeeds. Every protocol
/// operation checks that state first and fails with [`Error::Unavailable`] when
/// it is not met. The connection is released on [`Directory::unbind`] or when
/// the value is dropped.
///
/// # Example
///
/// ```no_run
/// use ldapi::{Directory, SearchRequest};
///
/// # fn main() -> ldapi::Result<()> {
/// let mut directory: Directory = Directory::default();
/// directory.connect("ldap.example.com", 389)?;
/// directory.bind(Some("cn=admin,dc=example,dc=com"), Some("secret"))?;
///
/// let results = directory.search(&SearchRequest::new("dc=example,dc=com", "(uid=jdoe)"))?;
/// for entry in results.entries() {
///     println!("{}", entry?.get_dn()?);
/// }
/// # Ok(())
/// # }
/// ```
pub struct Directory<E: DirectoryEngine = LdapEngine> {
    engine: E,
    link: Option<ConnectionHandle>,
    bound: bool,
}

impl Directory<LdapEngine> {
    /// Creates an unconnected directory backed by the `ldap3` engine.
    #[must_use]
    pub fn new(transport: TransportConfig) -> Self {
        Self::with_engine(LdapEngine::new(transport))
    }

    /// Connects, applies the configured options and binds when a bind DN is set.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConfigError`] for an invalid configuration, otherwise the
    /// error of the first step that fails.
    pub fn open(config: &DirectoryConfig) -> Result<Self> {
        config.validated()?;
        Self::open_with_engine(LdapEngine::new(config.transport().clone()), config)
    }
}

impl Default for Directory<LdapEngine> {
    fn default() -> Self {
        Self::new(TransportConfig::default())
    }
}

impl<E: DirectoryEngine> Directory<E> {
    /// Creates an unconnected directory on top of `engine`.
    #[must_use]
    pub fn with_engine(engine: E) -> Self {
        Self {
            engine,
            link: None,
            bound: false,
        }
    }

    /// [`Directory::open`] with a caller-supplied engine.
    ///
    /// # Errors
    ///
    /// See [`Directory::open`].
    pub fn open_with_engine(engine: E, config: &DirectoryConfig) -> Result<Self> {
        let mut directory = Self::with_engine(engine);
        directory.connect(config.host(), config.port())?;

        for setting in config.options() {
            directory.set_option(setting.option, setting.value)?;
        }

        if let Some(dn) = config.bind_dn() {
            let password = config.bind_password().map(|secret| secret.expose_secret());
            directory.bind(Some(dn), password)?;
        }

        Ok(directory)
    }

    /// The underlying engine.
    #[must_use]
    pub const fn engine(&self) -> &E {
        &self.engine
    }

    /// Returns true once a connection handle is held.
    #[must_use]
    pub const fn is_connected(&self) -> bool {
        self.link.is_some()
    }

    /// Returns true after a successful bind.
    #[must_use]
    pub const fn is_bound(&self) -> bool {
        self.bound
    }

    /// Opens the connection.
    ///
    /// # Errors
    ///
    /// Returns [`Error::AlreadyAvailable`] if a connection is already held and
    /// [`Error::ConnectFailure`] if the engine cannot connect.
    pub fn connect(&mut self, host: &str, port: u16) -> Result<()> {
        if self.link.is_some() {
            return Err(Error::AlreadyAvailable(
                "directory connection is already established".to_string(),
            ));
        }

        let link = self
            .engine
            .connect(host, port)
            .map_err(Error::ConnectFailure)?;
        debug!(host, port, "connected to directory");
        self.link = Some(link);
        Ok(())
    }

    /// Simple bind. Omitted DN and password bind anonymously.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Unavailable`] without a connection and
    /// [`Error::BindFailure`] if the server rejects the credentials.
    pub fn bind(&mut self, dn: Option<&str>, password: Option<&str>) -> Result<()> {
        let link = self.connected_link("bind")?;
        let dn = dn.unwrap_or_default();

        self.engine
            .bind(link, dn, password.unwrap_or_default())
            .map_err(Error::BindFailure)?;
        debug!(dn, "bound to directory");
        self.bound = true;
        Ok(())
    }

    /// SASL bind.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Unavailable`] without a connection and
    /// [`Error::BindFailure`] if the bind fails.
    pub fn sasl_bind(&mut self, credentials: &SaslCredentials) -> Result<()> {
        let link = self.connected_link("SASL bind")?;

        self.engine
            .sasl_bind(link, credentials)
            .map_err(Error::BindFailure)?;
        debug!(
            mechanism = credentials.mechanism.as_deref().unwrap_or_default(),
            "bound to directory with SASL"
        );
        self.bound = true;
        Ok(())
    }

    /// Upgrades the connection to TLS. Only allowed before binding.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Unavailable`] without a connection,
    /// [`Error::AlreadyAvailable`] once bound and [`Error::EncryptionFailure`]
    /// if negotiation fails.
    pub fn start_tls(&mut self) -> Result<()> {
        let link = self.connected_link("StartTLS")?;
        if self.bound {
            return Err(Error::AlreadyAvailable(
                "cannot start TLS on a bound connection".to_string(),
            ));
        }

        self.engine
            .start_tls(link)
            .map_err(Error::EncryptionFailure)?;
        debug!("negotiated TLS on directory connection");
        Ok(())
    }

    /// Closes a bound connection. Transport-level release failures are logged
    /// and otherwise ignored.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Unavailable`] if the connection is not bound.
    pub fn unbind(&mut self) -> Result<()> {
        self.bound_link("unbind")?;
        self.release();
        Ok(())
    }

    /// Adds an entry.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Unavailable`] when not bound and [`Error::WriteFailure`]
    /// if the server rejects the entry.
    pub fn add(&self, dn: &str, entry: &AttributeMap) -> Result<()> {
        let link = self.bound_link("add")?;
        self.engine
            .add(link, dn, entry)
            .map_err(Error::WriteFailure)
    }

    /// Deletes an entry.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Unavailable`] when not bound and [`Error::WriteFailure`]
    /// if the server rejects the deletion.
    pub fn delete(&self, dn: &str) -> Result<()> {
        let link = self.bound_link("delete")?;
        self.engine.delete(link, dn).map_err(Error::WriteFailure)
    }

    /// Replaces the values of every attribute in `entry`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Unavailable`] when not bound and [`Error::WriteFailure`]
    /// if the server rejects the change.
    pub fn modify(&self, dn: &str, entry: &AttributeMap) -> Result<()> {
        self.change("modify", dn, AttributeChange::Replace, entry)
    }

    /// Adds the values in `entry` to the existing attributes.
    ///
    /// # Errors
    ///
    /// See [`Directory::modify`].
    pub fn mod_add(&self, dn: &str, entry: &AttributeMap) -> Result<()> {
        self.change("mod_add", dn, AttributeChange::Add, entry)
    }

    /// Deletes the values in `entry`; an empty value list deletes the attribute.
    ///
    /// # Errors
    ///
    /// See [`Directory::modify`].
    pub fn mod_del(&self, dn: &str, entry: &AttributeMap) -> Result<()> {
        self.change("mod_del", dn, AttributeChange::Delete, entry)
    }

    /// Replaces the values of the attributes in `entry`.
    ///
    /// # Errors
    ///
    /// See [`Directory::modify`].
    pub fn mod_replace(&self, dn: &str, entry: &AttributeMap) -> Result<()> {
        self.change("mod_replace", dn, AttributeChange::Replace, entry)
    }

    fn change(
        &self,
        operation: &str,
        dn: &str,
        change: AttributeChange,
        entry: &AttributeMap,
    ) -> Result<()> {
        let link = self.bound_link(operation)?;
        self.engine
            .modify(link, dn, change, entry)
            .map_err(Error::WriteFailure)
    }

    /// Applies every modification as one atomic request.
    ///
    /// The whole list is validated before anything is sent, so an invalid
    /// element means no change reaches the server.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Unavailable`] when not bound,
    /// [`Error::FeatureUnavailable`] if the engine cannot batch,
    /// [`Error::IncompleteModification`] or [`Error::InvalidValueSet`] for an
    /// invalid element and [`Error::WriteFailure`] if the server rejects it.
    pub fn modify_batch(&self, dn: &str, modifications: &[Modification]) -> Result<()> {
        let link = self.bound_link("modify_batch")?;
        if !self.engine.supports_modify_batch() {
            return Err(Error::FeatureUnavailable(
                "the directory engine does not support batch modification".to_string(),
            ));
        }

        let operations = modifications
            .iter()
            .enumerate()
            .map(|(index, modification)| modification.to_batch_operation(index))
            .collect::<Result<Vec<_>>>()?;

        self.engine
            .modify_batch(link, dn, &operations)
            .map_err(Error::WriteFailure)
    }

    /// Compares `value` with the values of `attribute` on `dn`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Unavailable`] when not bound and [`Error::ReadFailure`]
    /// if the comparison fails or cannot be decided.
    pub fn compare(&self, dn: &str, attribute: &str, value: impl AsRef<[u8]>) -> Result<bool> {
        let link = self.bound_link("compare")?;

        match self
            .engine
            .compare(link, dn, attribute, value.as_ref())
            .map_err(Error::ReadFailure)?
        {
            CompareOutcome::True => Ok(true),
            CompareOutcome::False => Ok(false),
            CompareOutcome::Undetermined => Err(Error::ReadFailure(self.engine.last_error(link))),
        }
    }

    /// Renames `dn` to `new_rdn`, optionally moving it under `new_parent`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Unavailable`] when not bound and [`Error::WriteFailure`]
    /// if the server rejects the rename.
    pub fn rename(
        &self,
        dn: &str,
        new_rdn: &str,
        new_parent: Option<&str>,
        delete_old_rdn: bool,
    ) -> Result<()> {
        let link = self.bound_link("rename")?;
        let request = RenameRequest {
            dn: dn.to_string(),
            new_rdn: new_rdn.to_string(),
            new_parent: new_parent.map(str::to_string),
            delete_old_rdn,
        };

        self.engine
            .rename(link, &request)
            .map_err(Error::WriteFailure)
    }

    /// Stages a paged-results control for the next search on this connection.
    ///
    /// Pass an empty cookie for the first page and the cookie returned by
    /// [`ResultSet::control_paged_result`] for the following ones.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Unavailable`] when not bound and
    /// [`Error::PaginationFailure`] if the engine rejects the control.
    pub fn control_paged_result(&self, page_size: u32, critical: bool, cookie: &[u8]) -> Result<()> {
        let link = self.bound_link("control_paged_result")?;
        let control = PageControl {
            page_size,
            critical,
            cookie: cookie.to_vec(),
        };

        self.engine
            .control_paged_result(link, &control)
            .map_err(Error::PaginationFailure)
    }

    /// Searches the whole subtree below the base DN.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Unavailable`] when not bound and [`Error::ReadFailure`]
    /// if the search fails.
    pub fn search(&self, request: &SearchRequest) -> Result<ResultSet<'_, E>> {
        self.run_search("search", SearchScope::Subtree, request)
    }

    /// Searches the immediate children of the base DN.
    ///
    /// # Errors
    ///
    /// See [`Directory::search`].
    pub fn list_children(&self, request: &SearchRequest) -> Result<ResultSet<'_, E>> {
        self.run_search("list_children", SearchScope::OneLevel, request)
    }

    /// Reads the base entry itself.
    ///
    /// # Errors
    ///
    /// See [`Directory::search`].
    pub fn read(&self, request: &SearchRequest) -> Result<ResultSet<'_, E>> {
        self.run_search("read", SearchScope::Base, request)
    }

    fn run_search(
        &self,
        operation: &str,
        scope: SearchScope,
        request: &SearchRequest,
    ) -> Result<ResultSet<'_, E>> {
        let link = self.bound_link(operation)?;
        let result = self
            .engine
            .search(link, scope, request)
            .map_err(Error::ReadFailure)?;
        Ok(ResultSet::new(&self.engine, link, result))
    }

    /// Reads a connection option.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Unavailable`] without a connection and
    /// [`Error::OptionFailure`] if the engine rejects the option.
    pub fn get_option(&self, option: DirectoryOption) -> Result<OptionValue> {
        let link = self.connected_link("get_option")?;
        self.engine
            .get_option(link, option)
            .map_err(Error::OptionFailure)
    }

    /// Writes a connection option.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Unavailable`] without a connection and
    /// [`Error::OptionFailure`] if the engine rejects the value.
    pub fn set_option(&self, option: DirectoryOption, value: impl Into<OptionValue>) -> Result<()> {
        let link = self.connected_link("set_option")?;
        self.engine
            .set_option(link, option, value.into())
            .map_err(Error::OptionFailure)
    }

    /// Installs the callback that supplies credentials when referrals are chased.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Unavailable`] without a connection and
    /// [`Error::OptionFailure`] if the engine rejects the callback.
    pub fn set_rebind_proc<F>(&self, callback: F) -> Result<()>
    where
        F: FnMut(&str) -> Option<BindCredentials> + Send + 'static,
    {
        let link = self.connected_link("set_rebind_proc")?;
        self.engine
            .set_rebind_proc(link, Box::new(callback))
            .map_err(Error::OptionFailure)
    }

    fn connected_link(&self, operation: &str) -> Result<ConnectionHandle> {
        self.link.ok_or_else(|| {
            Error::Unavailable(format!("{operation} requires an established connection"))
        })
    }

    fn bound_link(&self, operation: &str) -> Result<ConnectionHandle> {
        match self.link {
            Some(link) if self.bound => Ok(link),
            _ => Err(Error::Unavailable(format!(
                "{operation} requires a bound connection"
            ))),
        }
    }

    fn release(&mut self) {
        let was_bound = std::mem::take(&mut self.bound);
        if let Some(link) = self.link.take() {
            match self.engine.unbind(link) {
                Ok(()) => debug!(was_bound, "released directory connection"),
                Err(err) => warn!(
                    code = err.code,
                    "failed to release directory connection: {}", err.message
                ),
            }
        }
    }
}

impl<E: DirectoryEngine> Drop for Directory<E> {
    fn drop(&mut self) {
        self.release();
    }
}

impl<E: DirectoryEngine> std::fmt::Debug for Directory<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Directory")
            .field("link", &self.link)
            .field("bound", &self.bound)
            .finish_non_exhaustive()
    }
}

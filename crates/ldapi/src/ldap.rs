//! [`DirectoryEngine`] implementation on the synchronous `ldap3` client.

use crate::engine::{
    AttributeChange, AttributeMap, BatchOp, BatchOperation, CompareOutcome, ConnectionHandle,
    DirectoryEngine, EngineResult, EntryHandle, PageControl, RebindProc, ReferenceHandle,
    RenameRequest, ResultHandle, SaslCredentials,
};
use crate::result_set::{EntryRecord, PageCookie, ParsedResult};
use crate::search::{DerefPolicy, SearchRequest, SearchScope};
use ldap3::asn1::{StructureTag, TagClass};
use ldap3::controls::{Control, ControlType, PagedResults, RawControl};
use ldap3::result::CompareResult;
use ldap3::{
    get_url_params, DerefAliases, LdapConn, LdapConnSettings, LdapError, Mod, ResultEntry, Scope,
    SearchOptions, SearchResult,
};
use ldapi_core::config::{endpoint_url, TransportConfig};
use ldapi_core::option::{DirectoryOption, OptionValue};
use ldapi_core::Diagnostic;
use native_tls::{Certificate, TlsConnector};
use secrecy::ExposeSecret;
use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::fs;
use std::time::Duration;
use tracing::trace;
use url::Url;

/// Result codes used by the engine, following libldap's numbering.
pub mod codes {
    /// Operation completed.
    pub const SUCCESS: i32 = 0;
    /// More entries matched than the size limit allowed.
    pub const SIZE_LIMIT_EXCEEDED: i32 = 4;
    /// Compare evaluated to false.
    pub const COMPARE_FALSE: i32 = 5;
    /// Compare evaluated to true.
    pub const COMPARE_TRUE: i32 = 6;
    /// The requested authentication method is not supported.
    pub const AUTH_METHOD_NOT_SUPPORTED: i32 = 7;
    /// The server returned a referral.
    pub const REFERRAL: i32 = 10;
    /// An administrative limit was exceeded.
    pub const ADMIN_LIMIT_EXCEEDED: i32 = 11;
    /// The entry does not hold the attribute.
    pub const NO_SUCH_ATTRIBUTE: i32 = 16;
    /// Catch-all server error.
    pub const OTHER: i32 = 80;
    /// The server could not be reached.
    pub const SERVER_DOWN: i32 = -1;
    /// Client-side failure.
    pub const LOCAL_ERROR: i32 = -2;
    /// A response could not be decoded.
    pub const DECODING_ERROR: i32 = -4;
    /// The operation timed out.
    pub const TIMEOUT: i32 = -5;
    /// An argument was invalid.
    pub const PARAM_ERROR: i32 = -9;
    /// The connection could not be established.
    pub const CONNECT_ERROR: i32 = -11;
    /// The request is not supported.
    pub const NOT_SUPPORTED: i32 = -12;
    /// The expected response control was absent.
    pub const CONTROL_NOT_FOUND: i32 = -13;
}

use codes::{
    ADMIN_LIMIT_EXCEEDED, AUTH_METHOD_NOT_SUPPORTED, COMPARE_FALSE, COMPARE_TRUE, CONNECT_ERROR,
    CONTROL_NOT_FOUND, DECODING_ERROR, LOCAL_ERROR, NOT_SUPPORTED, NO_SUCH_ATTRIBUTE, OTHER,
    PARAM_ERROR, REFERRAL, SERVER_DOWN, SIZE_LIMIT_EXCEEDED, SUCCESS, TIMEOUT,
};

const SEARCH_RESULT_ENTRY: u64 = 4;
const SEARCH_RESULT_REFERENCE: u64 = 19;
const NODE_INDEX_BITS: u32 = 32;
const NODE_INDEX_MASK: u64 = (1 << NODE_INDEX_BITS) - 1;

/// Protocol engine backed by `ldap3`.
///
/// Connections and completed results live in an arena inside the engine and
/// are addressed by the handle tokens of [`crate::engine`]. Operations block
/// the calling thread.
pub struct LdapEngine {
    transport: TransportConfig,
    arena: RefCell<Arena>,
}

#[derive(Default)]
struct Arena {
    next_id: u64,
    connections: HashMap<u64, Connection>,
    results: HashMap<u64, SearchOutcome>,
}

impl Arena {
    fn allocate(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }
}

struct Connection {
    url: String,
    conn: LdapConn,
    tls: bool,
    last_error: Diagnostic,
    options: ConnectionOptions,
    page: Option<PageControl>,
    rebind: Option<RebindProc>,
}

/// Per-connection option values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct ConnectionOptions {
    deref: DerefPolicy,
    size_limit: u32,
    time_limit: u32,
    network_timeout_secs: Option<u64>,
    referrals: bool,
}

impl Default for ConnectionOptions {
    fn default() -> Self {
        Self {
            deref: DerefPolicy::Never,
            size_limit: 0,
            time_limit: 0,
            network_timeout_secs: None,
            referrals: false,
        }
    }
}

impl ConnectionOptions {
    fn get(&self, option: DirectoryOption, transport: &TransportConfig) -> OptionValue {
        match option {
            DirectoryOption::ProtocolVersion => OptionValue::Integer(3),
            DirectoryOption::Deref => OptionValue::Integer(self.deref.code()),
            DirectoryOption::SizeLimit => OptionValue::Integer(i64::from(self.size_limit)),
            DirectoryOption::TimeLimit => OptionValue::Integer(i64::from(self.time_limit)),
            DirectoryOption::NetworkTimeout => OptionValue::Integer(
                i64::try_from(self.connect_timeout(transport).as_secs()).unwrap_or(i64::MAX),
            ),
            DirectoryOption::Referrals => OptionValue::Boolean(self.referrals),
        }
    }

    fn set(&mut self, option: DirectoryOption, value: OptionValue) -> EngineResult<()> {
        match option {
            DirectoryOption::ProtocolVersion => match value.as_integer() {
                Some(3) => Ok(()),
                _ => Err(bad_option(option, value, "only protocol version 3 is supported")),
            },
            DirectoryOption::Deref => {
                let code = value
                    .as_integer()
                    .ok_or_else(|| bad_option(option, value, "expected an integer"))?;
                self.deref = DerefPolicy::from_code(code)
                    .map_err(|err| bad_option(option, value, &err.to_string()))?;
                Ok(())
            }
            DirectoryOption::SizeLimit => {
                self.size_limit = limit_value(option, value)?;
                Ok(())
            }
            DirectoryOption::TimeLimit => {
                self.time_limit = limit_value(option, value)?;
                Ok(())
            }
            DirectoryOption::NetworkTimeout => {
                let seconds = value
                    .as_integer()
                    .and_then(|seconds| u64::try_from(seconds).ok())
                    .filter(|seconds| *seconds > 0)
                    .ok_or_else(|| bad_option(option, value, "expected a positive number of seconds"))?;
                self.network_timeout_secs = Some(seconds);
                Ok(())
            }
            DirectoryOption::Referrals => {
                self.referrals = match value {
                    OptionValue::Boolean(enabled) => enabled,
                    OptionValue::Integer(0) => false,
                    OptionValue::Integer(1) => true,
                    OptionValue::Integer(_) => {
                        return Err(bad_option(option, value, "expected a boolean"));
                    }
                };
                Ok(())
            }
        }
    }

    fn connect_timeout(&self, transport: &TransportConfig) -> Duration {
        self.network_timeout_secs
            .map_or_else(|| transport.connection_timeout(), Duration::from_secs)
    }

    fn search_options(&self, request: &SearchRequest) -> SearchOptions {
        let size_limit = effective_limit(request.size_limit, self.size_limit);
        let time_limit = effective_limit(request.time_limit, self.time_limit);

        SearchOptions::new()
            .deref(deref_aliases(request.deref))
            .typesonly(request.attrs_only)
            .sizelimit(size_limit)
            .timelimit(time_limit)
    }
}

struct SearchOutcome {
    link: u64,
    entries: Vec<EntryRecord>,
    references: Vec<Vec<String>>,
    parsed: ParsedResult,
    page: Option<PageCookie>,
}

impl LdapEngine {
    /// Creates an engine with the given transport settings.
    #[must_use]
    pub fn new(transport: TransportConfig) -> Self {
        Self {
            transport,
            arena: RefCell::new(Arena::default()),
        }
    }

    /// Transport settings in use.
    #[must_use]
    pub const fn transport(&self) -> &TransportConfig {
        &self.transport
    }

    fn on_connection<T>(
        &self,
        link: ConnectionHandle,
        op: impl FnOnce(&mut Connection) -> EngineResult<T>,
    ) -> EngineResult<T> {
        let mut arena = self.arena.borrow_mut();
        let connection = arena
            .connections
            .get_mut(&link.raw())
            .ok_or_else(|| unknown_connection(link))?;

        connection.last_error = Diagnostic::success();
        let outcome = op(&mut *connection);
        if let Err(diagnostic) = &outcome {
            connection.last_error = diagnostic.clone();
        }
        outcome
    }

    fn on_result<T>(
        &self,
        link: ConnectionHandle,
        result: u64,
        op: impl FnOnce(&SearchOutcome) -> EngineResult<T>,
    ) -> EngineResult<T> {
        let mut arena = self.arena.borrow_mut();
        let outcome = arena
            .results
            .get(&result)
            .ok_or_else(|| Diagnostic::new(PARAM_ERROR, format!("unknown result handle {result}")))
            .and_then(op);

        if let Some(connection) = arena.connections.get_mut(&link.raw()) {
            connection.last_error = match &outcome {
                Ok(_) => Diagnostic::success(),
                Err(diagnostic) => diagnostic.clone(),
            };
        }
        outcome
    }

    fn node_at(
        &self,
        link: ConnectionHandle,
        result: u64,
        index: usize,
        references: bool,
    ) -> Option<u64> {
        self.on_result(link, result, |outcome| {
            let len = if references {
                outcome.references.len()
            } else {
                outcome.entries.len()
            };
            Ok((index < len).then(|| node_token(result, index)).flatten())
        })
        .ok()
        .flatten()
    }

    fn run_search(
        &self,
        connection: &mut Connection,
        scope: SearchScope,
        request: &SearchRequest,
    ) -> EngineResult<(Vec<EntryRecord>, Vec<Vec<String>>, ParsedResult, Option<PageCookie>)> {
        let controls = take_staged_page(&mut connection.page)?;
        let SearchResult(raw_entries, result) = issue_search(
            &mut connection.conn,
            scope,
            &request.base_dn,
            request,
            connection.options.search_options(request),
            controls,
            self.transport.operation_timeout(),
        )?;
        connection.options.deref = request.deref;
        accept_search(&result)?;

        let (mut entries, mut references) = split_results(raw_entries)?;
        let parsed = ParsedResult {
            code: result_code(&result),
            matched_dn: result.matched.clone(),
            message: result.text.clone(),
            referrals: result.refs.clone(),
        };
        let page = paged_response(&result.ctrls);

        if connection.options.referrals {
            let mut targets = references.concat();
            if parsed.code == REFERRAL {
                targets.extend(parsed.referrals.iter().cloned());
            }

            for target in &targets {
                let referred = self.follow_referral(
                    target,
                    scope,
                    request,
                    connection.options,
                    connection.rebind.as_mut(),
                )?;
                entries.extend(referred);
            }
            if !targets.is_empty() {
                references.clear();
            }
        }

        Ok((entries, references, parsed, page))
    }

    /// Repeats a search against the server named by a referral URL.
    fn follow_referral(
        &self,
        referral: &str,
        scope: SearchScope,
        request: &SearchRequest,
        options: ConnectionOptions,
        rebind: Option<&mut RebindProc>,
    ) -> EngineResult<Vec<EntryRecord>> {
        let target = ReferralTarget::parse(referral)?;
        trace!(referral, server = %target.server, "following referral");

        let settings = connection_settings(&self.transport, options.connect_timeout(&self.transport), false)?;
        let mut conn = LdapConn::with_settings(settings, &target.server).map_err(map_ldap_error)?;

        let credentials = rebind.and_then(|callback| callback(referral));
        let (dn, password) = credentials
            .as_ref()
            .map_or(("", ""), |credentials| {
                (credentials.dn.as_str(), credentials.password.expose_secret())
            });
        let bound = conn
            .with_timeout(self.transport.operation_timeout())
            .simple_bind(dn, password)
            .map_err(map_ldap_error)
            .and_then(check);
        if let Err(diagnostic) = bound {
            close_quietly(conn);
            return Err(diagnostic);
        }

        let base = target.base_dn.as_deref().unwrap_or(&request.base_dn);
        let searched = issue_search(
            &mut conn,
            scope,
            base,
            request,
            options.search_options(request),
            Vec::new(),
            self.transport.operation_timeout(),
        );
        close_quietly(conn);

        let SearchResult(raw_entries, result) = searched?;
        accept_search(&result)?;
        // Only one hop is followed; further references are dropped.
        let (entries, _) = split_results(raw_entries)?;
        Ok(entries)
    }

    fn write(
        &self,
        link: ConnectionHandle,
        operation: &str,
        op: impl FnOnce(&mut LdapConn) -> ldap3::result::Result<ldap3::LdapResult>,
    ) -> EngineResult<()> {
        trace!(link = link.raw(), operation, "engine call");
        let timeout = self.transport.operation_timeout();
        self.on_connection(link, |connection| {
            connection.conn.with_timeout(timeout);
            op(&mut connection.conn)
                .map_err(map_ldap_error)
                .and_then(check)
                .map(|_| ())
        })
    }
}

impl std::fmt::Debug for LdapEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let arena = self.arena.borrow();
        f.debug_struct("LdapEngine")
            .field("transport", &self.transport)
            .field("connections", &arena.connections.len())
            .field("results", &arena.results.len())
            .finish()
    }
}

impl DirectoryEngine for LdapEngine {
    fn connect(&self, host: &str, port: u16) -> EngineResult<ConnectionHandle> {
        let url = endpoint_url(host, port)
            .map_err(|err| Diagnostic::new(PARAM_ERROR, err.to_string()))?;
        trace!(url = %url, "opening directory connection");

        let settings = connection_settings(&self.transport, self.transport.connection_timeout(), false)?;
        let conn = LdapConn::with_settings(settings, url.as_str()).map_err(|err| {
            let diagnostic = map_ldap_error(err);
            if diagnostic.code == LOCAL_ERROR {
                Diagnostic::new(CONNECT_ERROR, diagnostic.message)
            } else {
                diagnostic
            }
        })?;

        let mut arena = self.arena.borrow_mut();
        let id = arena.allocate();
        arena.connections.insert(
            id,
            Connection {
                tls: url.scheme() == "ldaps",
                url: url.into(),
                conn,
                last_error: Diagnostic::success(),
                options: ConnectionOptions::default(),
                page: None,
                rebind: None,
            },
        );
        Ok(ConnectionHandle::new(id))
    }

    fn last_error(&self, link: ConnectionHandle) -> Diagnostic {
        self.arena
            .borrow()
            .connections
            .get(&link.raw())
            .map_or_else(|| unknown_connection(link), |connection| connection.last_error.clone())
    }

    fn bind(&self, link: ConnectionHandle, dn: &str, password: &str) -> EngineResult<()> {
        self.write(link, "simple bind", |conn| conn.simple_bind(dn, password))
    }

    fn sasl_bind(&self, link: ConnectionHandle, credentials: &SaslCredentials) -> EngineResult<()> {
        if let Err(diagnostic) = external_bind_request(credentials) {
            return self.on_connection(link, |_| Err(diagnostic));
        }

        self.write(link, "SASL EXTERNAL bind", LdapConn::sasl_external_bind)
    }

    fn start_tls(&self, link: ConnectionHandle) -> EngineResult<()> {
        trace!(link = link.raw(), "starting TLS");
        self.on_connection(link, |connection| {
            if connection.tls {
                return Err(Diagnostic::new(
                    LOCAL_ERROR,
                    "TLS is already active on this connection",
                ));
            }

            let timeout = connection.options.connect_timeout(&self.transport);
            let settings = connection_settings(&self.transport, timeout, true)?;
            let upgraded =
                LdapConn::with_settings(settings, &connection.url).map_err(map_ldap_error)?;
            close_quietly(std::mem::replace(&mut connection.conn, upgraded));
            connection.tls = true;
            Ok(())
        })
    }

    fn unbind(&self, link: ConnectionHandle) -> EngineResult<()> {
        trace!(link = link.raw(), "closing directory connection");
        let connection = self
            .arena
            .borrow_mut()
            .connections
            .remove(&link.raw())
            .ok_or_else(|| unknown_connection(link))?;

        let mut conn = connection.conn;
        conn.unbind().map_err(map_ldap_error)
    }

    fn search(
        &self,
        link: ConnectionHandle,
        scope: SearchScope,
        request: &SearchRequest,
    ) -> EngineResult<ResultHandle> {
        trace!(
            link = link.raw(),
            base = %request.base_dn,
            filter = %request.filter,
            ?scope,
            "search"
        );
        let (entries, references, parsed, page) =
            self.on_connection(link, |connection| self.run_search(connection, scope, request))?;

        let mut arena = self.arena.borrow_mut();
        let id = arena.allocate();
        arena.results.insert(
            id,
            SearchOutcome {
                link: link.raw(),
                entries,
                references,
                parsed,
                page,
            },
        );
        Ok(ResultHandle::new(id))
    }

    fn add(&self, link: ConnectionHandle, dn: &str, entry: &AttributeMap) -> EngineResult<()> {
        let attributes = entry
            .iter()
            .map(|(name, values)| (name.as_bytes().to_vec(), value_set(values)))
            .collect::<Vec<_>>();
        self.write(link, "add", |conn| conn.add(dn, attributes))
    }

    fn delete(&self, link: ConnectionHandle, dn: &str) -> EngineResult<()> {
        self.write(link, "delete", |conn| conn.delete(dn))
    }

    fn modify(
        &self,
        link: ConnectionHandle,
        dn: &str,
        change: AttributeChange,
        entry: &AttributeMap,
    ) -> EngineResult<()> {
        let mods = entry
            .iter()
            .map(|(name, values)| {
                let name = name.as_bytes().to_vec();
                let values = value_set(values);
                match change {
                    AttributeChange::Add => Mod::Add(name, values),
                    AttributeChange::Delete => Mod::Delete(name, values),
                    AttributeChange::Replace => Mod::Replace(name, values),
                }
            })
            .collect::<Vec<_>>();
        self.write(link, "modify", |conn| conn.modify(dn, mods))
    }

    fn supports_modify_batch(&self) -> bool {
        true
    }

    fn modify_batch(
        &self,
        link: ConnectionHandle,
        dn: &str,
        operations: &[BatchOperation],
    ) -> EngineResult<()> {
        let mods = operations.iter().map(batch_mod).collect::<Vec<_>>();
        self.write(link, "batch modify", |conn| conn.modify(dn, mods))
    }

    fn compare(
        &self,
        link: ConnectionHandle,
        dn: &str,
        attribute: &str,
        value: &[u8],
    ) -> EngineResult<CompareOutcome> {
        trace!(link = link.raw(), dn, attribute, "compare");
        let timeout = self.transport.operation_timeout();
        self.on_connection(link, |connection| {
            let CompareResult(result) = connection
                .conn
                .with_timeout(timeout)
                .compare(dn, attribute, value)
                .map_err(map_ldap_error)?;

            Ok(match result_code(&result) {
                COMPARE_TRUE => CompareOutcome::True,
                COMPARE_FALSE => CompareOutcome::False,
                _ => {
                    connection.last_error = result_diagnostic(&result);
                    CompareOutcome::Undetermined
                }
            })
        })
    }

    fn rename(&self, link: ConnectionHandle, request: &RenameRequest) -> EngineResult<()> {
        self.write(link, "modify DN", |conn| {
            conn.modifydn(
                &request.dn,
                &request.new_rdn,
                request.delete_old_rdn,
                request.new_parent.as_deref(),
            )
        })
    }

    fn get_option(&self, link: ConnectionHandle, option: DirectoryOption) -> EngineResult<OptionValue> {
        self.on_connection(link, |connection| {
            Ok(connection.options.get(option, &self.transport))
        })
    }

    fn set_option(
        &self,
        link: ConnectionHandle,
        option: DirectoryOption,
        value: OptionValue,
    ) -> EngineResult<()> {
        trace!(link = link.raw(), %option, ?value, "set option");
        self.on_connection(link, |connection| connection.options.set(option, value))
    }

    fn set_rebind_proc(&self, link: ConnectionHandle, callback: RebindProc) -> EngineResult<()> {
        self.on_connection(link, |connection| {
            connection.rebind = Some(callback);
            Ok(())
        })
    }

    fn control_paged_result(&self, link: ConnectionHandle, control: &PageControl) -> EngineResult<()> {
        page_request_control(control)?;
        self.on_connection(link, |connection| {
            connection.page = Some(control.clone());
            Ok(())
        })
    }

    fn count_entries(&self, link: ConnectionHandle, result: ResultHandle) -> EngineResult<usize> {
        self.on_result(link, result.raw(), |outcome| Ok(outcome.entries.len()))
    }

    fn first_entry(&self, link: ConnectionHandle, result: ResultHandle) -> Option<EntryHandle> {
        self.node_at(link, result.raw(), 0, false)
            .map(EntryHandle::new)
    }

    fn next_entry(&self, link: ConnectionHandle, entry: EntryHandle) -> Option<EntryHandle> {
        let (result, index) = split_token(entry.raw());
        self.node_at(link, result, index + 1, false)
            .map(EntryHandle::new)
    }

    fn first_reference(&self, link: ConnectionHandle, result: ResultHandle) -> Option<ReferenceHandle> {
        self.node_at(link, result.raw(), 0, true)
            .map(ReferenceHandle::new)
    }

    fn next_reference(
        &self,
        link: ConnectionHandle,
        reference: ReferenceHandle,
    ) -> Option<ReferenceHandle> {
        let (result, index) = split_token(reference.raw());
        self.node_at(link, result, index + 1, true)
            .map(ReferenceHandle::new)
    }

    fn get_values(
        &self,
        link: ConnectionHandle,
        entry: EntryHandle,
        attribute: &str,
    ) -> EngineResult<Vec<Vec<u8>>> {
        let (result, index) = split_token(entry.raw());
        self.on_result(link, result, |outcome| {
            entry_at(outcome, index)?
                .values(attribute)
                .map(<[Vec<u8>]>::to_vec)
                .ok_or_else(|| {
                    Diagnostic::new(
                        NO_SUCH_ATTRIBUTE,
                        format!("No such attribute: `{attribute}`"),
                    )
                })
        })
    }

    fn get_attributes(&self, link: ConnectionHandle, entry: EntryHandle) -> EngineResult<Vec<String>> {
        let (result, index) = split_token(entry.raw());
        self.on_result(link, result, |outcome| {
            Ok(entry_at(outcome, index)?
                .attributes
                .iter()
                .map(|(name, _)| name.clone())
                .collect())
        })
    }

    fn get_dn(&self, link: ConnectionHandle, entry: EntryHandle) -> EngineResult<String> {
        let (result, index) = split_token(entry.raw());
        self.on_result(link, result, |outcome| Ok(entry_at(outcome, index)?.dn.clone()))
    }

    fn parse_reference(
        &self,
        link: ConnectionHandle,
        reference: ReferenceHandle,
    ) -> EngineResult<Vec<String>> {
        let (result, index) = split_token(reference.raw());
        self.on_result(link, result, |outcome| {
            outcome
                .references
                .get(index)
                .cloned()
                .ok_or_else(|| Diagnostic::new(PARAM_ERROR, format!("unknown reference {index}")))
        })
    }

    fn get_entries(&self, link: ConnectionHandle, result: ResultHandle) -> EngineResult<Vec<EntryRecord>> {
        self.on_result(link, result.raw(), |outcome| Ok(outcome.entries.clone()))
    }

    fn parse_result(&self, link: ConnectionHandle, result: ResultHandle) -> EngineResult<ParsedResult> {
        self.on_result(link, result.raw(), |outcome| Ok(outcome.parsed.clone()))
    }

    fn paged_result_response(
        &self,
        link: ConnectionHandle,
        result: ResultHandle,
    ) -> EngineResult<PageCookie> {
        self.on_result(link, result.raw(), |outcome| {
            outcome.page.clone().ok_or_else(|| {
                Diagnostic::new(
                    CONTROL_NOT_FOUND,
                    "the result carries no paged results control",
                )
            })
        })
    }

    fn free_result(&self, result: ResultHandle) -> EngineResult<()> {
        self.arena
            .borrow_mut()
            .results
            .remove(&result.raw())
            .map(|outcome| trace!(link = outcome.link, result = result.raw(), "freed result"))
            .ok_or_else(|| {
                Diagnostic::new(PARAM_ERROR, format!("unknown result handle {}", result.raw()))
            })
    }
}

impl From<SearchScope> for Scope {
    fn from(scope: SearchScope) -> Self {
        match scope {
            SearchScope::Base => Scope::Base,
            SearchScope::OneLevel => Scope::OneLevel,
            SearchScope::Subtree => Scope::Subtree,
        }
    }
}

fn deref_aliases(policy: DerefPolicy) -> DerefAliases {
    match policy {
        DerefPolicy::Never => DerefAliases::Never,
        DerefPolicy::Searching => DerefAliases::Searching,
        DerefPolicy::Finding => DerefAliases::Finding,
        DerefPolicy::Always => DerefAliases::Always,
    }
}

fn issue_search(
    conn: &mut LdapConn,
    scope: SearchScope,
    base: &str,
    request: &SearchRequest,
    options: SearchOptions,
    controls: Vec<RawControl>,
    timeout: Duration,
) -> EngineResult<SearchResult> {
    conn.with_search_options(options).with_timeout(timeout);
    if !controls.is_empty() {
        conn.with_controls(controls);
    }

    let attributes = request.attributes.clone().unwrap_or_default();
    conn.search(base, scope.into(), &request.filter, attributes)
        .map_err(map_ldap_error)
}

/// Checks that `credentials` describe a bind ldap3 can send as SASL EXTERNAL.
///
/// The identity comes from the TLS client certificate, so the DN is ignored.
/// A password, realm, authentication or authorization identity or security
/// properties cannot be carried and are refused.
fn external_bind_request(credentials: &SaslCredentials) -> EngineResult<()> {
    let mechanism = credentials.mechanism.as_deref().unwrap_or_default();
    if !mechanism.eq_ignore_ascii_case("EXTERNAL") {
        return Err(Diagnostic::new(
            AUTH_METHOD_NOT_SUPPORTED,
            format!("SASL mechanism `{mechanism}` is not supported"),
        ));
    }

    let unsupported = [
        ("password", credentials.password.is_some()),
        ("realm", credentials.realm.is_some()),
        ("authentication identity", credentials.authc_id.is_some()),
        ("authorization identity", credentials.authz_id.is_some()),
        ("security properties", credentials.props.is_some()),
    ];
    match unsupported.iter().find(|(_, present)| *present) {
        Some((field, _)) => Err(Diagnostic::new(
            PARAM_ERROR,
            format!("SASL EXTERNAL bind cannot carry a {field}"),
        )),
        None => Ok(()),
    }
}

/// Sizes and time limits of zero defer to the connection value.
fn effective_limit(requested: u32, default: u32) -> i32 {
    let limit = if requested > 0 { requested } else { default };
    i32::try_from(limit).unwrap_or(i32::MAX)
}

fn accept_search(result: &ldap3::LdapResult) -> EngineResult<()> {
    match result_code(result) {
        SUCCESS | SIZE_LIMIT_EXCEEDED | REFERRAL | ADMIN_LIMIT_EXCEEDED => Ok(()),
        _ => Err(result_diagnostic(result)),
    }
}

fn split_results(raw: Vec<ResultEntry>) -> EngineResult<(Vec<EntryRecord>, Vec<Vec<String>>)> {
    let mut entries = Vec::new();
    let mut references = Vec::new();

    for entry in raw {
        let tag = entry.0;
        let application = matches!(tag.class, TagClass::Application);
        match (application, tag.id) {
            (true, SEARCH_RESULT_ENTRY) => entries.push(decode_entry(tag)?),
            (true, SEARCH_RESULT_REFERENCE) => references.push(decode_reference(tag)?),
            // Intermediate responses carry nothing for the caller.
            _ => {}
        }
    }

    Ok((entries, references))
}

fn decode_entry(tag: StructureTag) -> EngineResult<EntryRecord> {
    let mut parts = tag
        .expect_constructed()
        .ok_or_else(|| decoding_error("search entry is not a sequence"))?
        .into_iter();

    let dn = parts
        .next()
        .and_then(StructureTag::expect_primitive)
        .ok_or_else(|| decoding_error("search entry has no DN"))?;
    let dn = String::from_utf8(dn).map_err(|_| decoding_error("entry DN is not valid UTF-8"))?;

    let attributes = parts
        .next()
        .and_then(StructureTag::expect_constructed)
        .ok_or_else(|| decoding_error("search entry has no attribute list"))?
        .into_iter()
        .map(decode_attribute)
        .collect::<EngineResult<Vec<_>>>()?;

    Ok(EntryRecord { dn, attributes })
}

fn decode_attribute(tag: StructureTag) -> EngineResult<(String, Vec<Vec<u8>>)> {
    let mut parts = tag
        .expect_constructed()
        .ok_or_else(|| decoding_error("attribute is not a sequence"))?
        .into_iter();

    let name = parts
        .next()
        .and_then(StructureTag::expect_primitive)
        .ok_or_else(|| decoding_error("attribute has no type"))?;
    let name =
        String::from_utf8(name).map_err(|_| decoding_error("attribute type is not valid UTF-8"))?;

    let values = parts
        .next()
        .and_then(StructureTag::expect_constructed)
        .ok_or_else(|| decoding_error("attribute has no value set"))?
        .into_iter()
        .map(|value| {
            value
                .expect_primitive()
                .ok_or_else(|| decoding_error("attribute value is not an octet string"))
        })
        .collect::<EngineResult<Vec<_>>>()?;

    Ok((name, values))
}

fn decode_reference(tag: StructureTag) -> EngineResult<Vec<String>> {
    tag.expect_constructed()
        .ok_or_else(|| decoding_error("search reference is not a sequence"))?
        .into_iter()
        .map(|uri| {
            uri.expect_primitive()
                .and_then(|bytes| String::from_utf8(bytes).ok())
                .ok_or_else(|| decoding_error("referral URI is not a UTF-8 string"))
        })
        .collect()
}

/// Empties the staged paging slot, returning the controls for the search about
/// to be issued. A staged control applies to one search only.
fn take_staged_page(slot: &mut Option<PageControl>) -> EngineResult<Vec<RawControl>> {
    slot.take()
        .map(|control| page_request_control(&control))
        .transpose()
        .map(|control| control.into_iter().collect())
}

fn page_request_control(control: &PageControl) -> EngineResult<RawControl> {
    let size = i32::try_from(control.page_size).map_err(|_| {
        Diagnostic::new(
            PARAM_ERROR,
            format!("page size {} is out of range", control.page_size),
        )
    })?;

    let mut raw: RawControl = PagedResults {
        size,
        cookie: control.cookie.clone(),
    }
    .into();
    raw.crit = control.critical;
    Ok(raw)
}

fn paged_response(controls: &[Control]) -> Option<PageCookie> {
    controls.iter().find_map(|Control(kind, raw)| {
        if !matches!(kind, Some(ControlType::PagedResults)) || raw.val.is_none() {
            return None;
        }

        let response = raw.parse::<PagedResults>();
        Some(PageCookie {
            cookie: response.cookie,
            estimated_total: u64::try_from(response.size).ok().filter(|size| *size > 0),
        })
    })
}

fn batch_mod(operation: &BatchOperation) -> Mod<Vec<u8>> {
    let name = operation.attribute.as_bytes().to_vec();
    let values = value_set(&operation.values);
    match operation.op {
        BatchOp::Add => Mod::Add(name, values),
        BatchOp::Remove => Mod::Delete(name, values),
        BatchOp::RemoveAll => Mod::Delete(name, HashSet::new()),
        BatchOp::Replace => Mod::Replace(name, values),
    }
}

fn value_set(values: &[Vec<u8>]) -> HashSet<Vec<u8>> {
    values.iter().cloned().collect()
}

fn entry_at(outcome: &SearchOutcome, index: usize) -> EngineResult<&EntryRecord> {
    outcome
        .entries
        .get(index)
        .ok_or_else(|| Diagnostic::new(PARAM_ERROR, format!("unknown entry {index}")))
}

fn node_token(result: u64, index: usize) -> Option<u64> {
    let index = u64::try_from(index).ok().filter(|index| *index <= NODE_INDEX_MASK)?;
    Some((result << NODE_INDEX_BITS) | index)
}

fn split_token(token: u64) -> (u64, usize) {
    let index = usize::try_from(token & NODE_INDEX_MASK).unwrap_or(usize::MAX - 1);
    (token >> NODE_INDEX_BITS, index)
}

/// Server and base DN named by an LDAP referral URL.
#[derive(Debug, Clone, PartialEq, Eq)]
struct ReferralTarget {
    server: String,
    base_dn: Option<String>,
}

impl ReferralTarget {
    fn parse(referral: &str) -> EngineResult<Self> {
        let invalid = |reason: &str| {
            Diagnostic::new(PARAM_ERROR, format!("invalid referral `{referral}`: {reason}"))
        };

        let url = Url::parse(referral).map_err(|err| invalid(&err.to_string()))?;
        if !matches!(url.scheme(), "ldap" | "ldaps") {
            return Err(invalid("unsupported scheme"));
        }
        let host = url.host_str().ok_or_else(|| invalid("missing host"))?;
        let server = match url.port() {
            Some(port) => format!("{}://{host}:{port}", url.scheme()),
            None => format!("{}://{host}", url.scheme()),
        };

        let params = get_url_params(&url).map_err(|err| invalid(&err.to_string()))?;
        let base_dn = (!params.base.is_empty()).then(|| params.base.into_owned());

        Ok(Self { server, base_dn })
    }
}

fn connection_settings(
    transport: &TransportConfig,
    timeout: Duration,
    starttls: bool,
) -> EngineResult<LdapConnSettings> {
    let mut settings = LdapConnSettings::new()
        .set_conn_timeout(timeout)
        .set_starttls(starttls);

    if !transport.tls_verify {
        let connector = TlsConnector::builder()
            .danger_accept_invalid_certs(true)
            .build()
            .map_err(|err| {
                Diagnostic::new(LOCAL_ERROR, format!("failed to construct TLS connector: {err}"))
            })?;
        settings = settings.set_connector(connector).set_no_tls_verify(true);
    } else if let Some(cert_path) = &transport.tls_ca_cert {
        let pem = fs::read(cert_path).map_err(|err| {
            Diagnostic::new(
                LOCAL_ERROR,
                format!("failed to read CA certificate {}: {err}", cert_path.display()),
            )
        })?;
        let certificate = Certificate::from_pem(&pem).map_err(|err| {
            Diagnostic::new(LOCAL_ERROR, format!("invalid CA certificate: {err}"))
        })?;
        let connector = TlsConnector::builder()
            .add_root_certificate(certificate)
            .build()
            .map_err(|err| {
                Diagnostic::new(LOCAL_ERROR, format!("failed to load CA certificate: {err}"))
            })?;
        settings = settings.set_connector(connector);
    }

    Ok(settings)
}

fn close_quietly(mut conn: LdapConn) {
    if let Err(err) = conn.unbind() {
        trace!("ignoring error while closing connection: {err}");
    }
}

fn check(result: ldap3::LdapResult) -> EngineResult<ldap3::LdapResult> {
    if result.rc == 0 {
        Ok(result)
    } else {
        Err(result_diagnostic(&result))
    }
}

fn result_code(result: &ldap3::LdapResult) -> i32 {
    i32::try_from(result.rc).unwrap_or(OTHER)
}

fn result_diagnostic(result: &ldap3::LdapResult) -> Diagnostic {
    let code = result_code(result);
    if result.text.is_empty() {
        Diagnostic::new(code, describe(code))
    } else {
        Diagnostic::new(code, format!("{}: {}", describe(code), result.text))
    }
}

fn map_ldap_error(err: LdapError) -> Diagnostic {
    let message = err.to_string();
    match err {
        LdapError::LdapResult { result } => result_diagnostic(&result),
        LdapError::Io { .. } => Diagnostic::new(SERVER_DOWN, message),
        LdapError::Timeout { .. } => Diagnostic::new(TIMEOUT, message),
        _ => Diagnostic::new(LOCAL_ERROR, message),
    }
}

fn unknown_connection(link: ConnectionHandle) -> Diagnostic {
    Diagnostic::new(PARAM_ERROR, format!("unknown connection handle {}", link.raw()))
}

fn decoding_error(message: &str) -> Diagnostic {
    Diagnostic::new(DECODING_ERROR, message)
}

fn bad_option(option: DirectoryOption, value: OptionValue, reason: &str) -> Diagnostic {
    Diagnostic::new(
        PARAM_ERROR,
        format!("invalid value {value:?} for option `{option}`: {reason}"),
    )
}

fn limit_value(option: DirectoryOption, value: OptionValue) -> EngineResult<u32> {
    value
        .as_integer()
        .and_then(|limit| u32::try_from(limit).ok())
        .ok_or_else(|| bad_option(option, value, "expected a non-negative integer"))
}

/// Human-readable text for a result code.
#[must_use]
pub fn describe(code: i32) -> &'static str {
    match code {
        SUCCESS => "Success",
        1 => "Operations error",
        2 => "Protocol error",
        3 => "Time limit exceeded",
        SIZE_LIMIT_EXCEEDED => "Size limit exceeded",
        COMPARE_FALSE => "Compare False",
        COMPARE_TRUE => "Compare True",
        AUTH_METHOD_NOT_SUPPORTED => "Authentication method not supported",
        8 => "Strong(er) authentication required",
        REFERRAL => "Referral",
        ADMIN_LIMIT_EXCEEDED => "Administrative limit exceeded",
        12 => "Critical extension is unavailable",
        NO_SUCH_ATTRIBUTE => "No such attribute",
        17 => "Undefined attribute type",
        18 => "Inappropriate matching",
        19 => "Constraint violation",
        20 => "Type or value exists",
        21 => "Invalid syntax",
        32 => "No such object",
        34 => "Invalid DN syntax",
        48 => "Inappropriate authentication",
        49 => "Invalid credentials",
        50 => "Insufficient access",
        51 => "Server is busy",
        52 => "Server is unavailable",
        53 => "Server is unwilling to perform",
        64 => "Naming violation",
        65 => "Object class violation",
        66 => "Operation not allowed on non-leaf",
        67 => "Operation not allowed on RDN",
        68 => "Already exists",
        SERVER_DOWN => "Can't contact LDAP server",
        LOCAL_ERROR => "Local error",
        DECODING_ERROR => "Decoding error",
        TIMEOUT => "Timed out",
        PARAM_ERROR => "Bad parameter to an ldap routine",
        CONNECT_ERROR => "Connect error",
        NOT_SUPPORTED => "Not Supported",
        CONTROL_NOT_FOUND => "Control not found",
        _ => "Other (e.g., implementation specific) error",
    }
}

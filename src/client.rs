//! The LDAP client state machine
//!
//! [`LdapClient`] owns one connection, the message-id counter and the
//! outcome of the last operation. Every operation is synchronous and keeps
//! exactly one request in flight: send, then read responses until the
//! matching terminal message arrives.
//!
//! Operations return `Ok(true)` on LDAP success, `Ok(false)` on a
//! server-reported or connection failure (details in [`result_code`] and
//! [`result_string`]), and `Err` only for caller mistakes such as a
//! malformed filter or an operation attempted without a connection.
//!
//! [`result_code`]: LdapClient::result_code
//! [`result_string`]: LdapClient::result_string

use std::time::Duration;

use asn1_rs::FromBer;
use log::{debug, trace, warn};
use rand::Rng;

use crate::ad::WellKnownObject;
use crate::ber;
use crate::digest;
use crate::error::{LdapError, Result};
use crate::filter::Filter;
use crate::ldap::{
    Control, DerefAliases, LdapMessage, ModifyOperation, ProtocolOp, ProtocolOpTag, ResultCode,
    SearchScope,
};
use crate::search::{Attribute, SearchEntry, SearchResult};
use crate::transport::{TlsOptions, Transport};

/// Paged-results control (RFC 2696).
pub const OID_PAGED_RESULTS: &str = "1.2.840.113556.1.4.319";
/// Active Directory tree-delete control.
pub const OID_TREE_DELETE: &str = "1.2.840.113556.1.4.805";
/// StartTLS extended operation. Issuing it is expressible with
/// [`LdapClient::extended`]; upgrading the stream afterwards is up to the
/// caller.
pub const OID_START_TLS: &str = "1.3.6.1.4.1.1466.20037";

const SASL_DIGEST_MD5: &str = "DIGEST-MD5";

/// Connection and search configuration.
///
/// Mutable between operations, read-only while one runs.
#[derive(Clone)]
pub struct LdapClientSettings {
    pub target_host: String,
    /// 389 for plain LDAP; LDAPS listens on 636 (3269 for the AD global
    /// catalog).
    pub target_port: u16,
    /// Bounds connect, read and write.
    pub timeout: Duration,
    /// Protocol version, 2 or 3.
    pub version: u8,
    pub use_tls: bool,
    pub tls: TlsOptions,
    /// Bind DN or, against Active Directory, a `user@domain` principal.
    pub user_name: String,
    /// With [`LdapClient::bind`] the password crosses the wire in clear
    /// text; use TLS or the DIGEST-MD5 bind on untrusted networks.
    pub password: String,
    pub search_scope: SearchScope,
    pub search_aliases: DerefAliases,
    /// 0 = no limit.
    pub search_size_limit: u32,
    /// Seconds, 0 = no limit.
    pub search_time_limit: u32,
    /// Entries per page; 0 disables the paged-results control.
    pub search_page_size: u32,
}

impl std::fmt::Debug for LdapClientSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LdapClientSettings")
            .field("target_host", &self.target_host)
            .field("target_port", &self.target_port)
            .field("timeout", &self.timeout)
            .field("version", &self.version)
            .field("use_tls", &self.use_tls)
            .field("user_name", &self.user_name)
            .field("password", &"<redacted>")
            .field("search_scope", &self.search_scope)
            .field("search_aliases", &self.search_aliases)
            .field("search_page_size", &self.search_page_size)
            .finish()
    }
}

impl Default for LdapClientSettings {
    fn default() -> Self {
        LdapClientSettings {
            target_host: "localhost".to_string(),
            target_port: 389,
            timeout: Duration::from_millis(5000),
            version: 3,
            use_tls: false,
            tls: TlsOptions::default(),
            user_name: String::new(),
            password: String::new(),
            search_scope: SearchScope::WholeSubtree,
            search_aliases: DerefAliases::DerefAlways,
            search_size_limit: 0,
            search_time_limit: 0,
            search_page_size: 0,
        }
    }
}

/// A synchronous LDAP v2/v3 client. One connection, one request in flight.
///
/// Not thread-safe by design; callers that need parallelism use one client
/// per thread.
#[derive(Debug, Default)]
pub struct LdapClient {
    pub settings: LdapClientSettings,
    transport: Option<Transport>,
    seq: u32,
    bound: bool,
    root_dn: Option<String>,
    search_result: SearchResult,
    search_cookie: Vec<u8>,
    result_code: ResultCode,
    result_string: String,
    response_code: Option<ProtocolOpTag>,
    response_dn: String,
    referrals: Vec<String>,
    full_result: Vec<u8>,
    ext_name: String,
    ext_value: Vec<u8>,
}

impl LdapClient {
    pub fn new(settings: LdapClientSettings) -> Self {
        LdapClient {
            settings,
            ..LdapClient::default()
        }
    }

    // ------------------- last-operation state -------------------

    /// Result code of the last operation. [`ResultCode::TRANSPORT_FAILURE`]
    /// when the connection itself failed.
    pub fn result_code(&self) -> ResultCode {
        self.result_code
    }

    /// Diagnostic message of the last operation; when the server sent none,
    /// the fixed name of the result code.
    pub fn result_string(&self) -> &str {
        &self.result_string
    }

    /// Application tag of the last decoded response.
    pub fn response_code(&self) -> Option<ProtocolOpTag> {
        self.response_code
    }

    /// `matchedDN` of the last response.
    pub fn response_dn(&self) -> &str {
        &self.response_dn
    }

    /// Referral URLs collected from the last operation.
    pub fn referrals(&self) -> &[String] {
        &self.referrals
    }

    /// Raw bytes of the last received frame, for debugging.
    pub fn full_result(&self) -> &[u8] {
        &self.full_result
    }

    /// Name reported by the last successful [`extended`](Self::extended)
    /// operation.
    pub fn ext_name(&self) -> &str {
        &self.ext_name
    }

    /// Value reported by the last successful [`extended`](Self::extended)
    /// operation.
    pub fn ext_value(&self) -> &[u8] {
        &self.ext_value
    }

    /// Entries of the last [`search`](Self::search) call.
    pub fn search_result(&self) -> &SearchResult {
        &self.search_result
    }

    /// Paged-results continuation cookie left by the last search; empty
    /// when the result set is exhausted.
    pub fn search_cookie(&self) -> &[u8] {
        &self.search_cookie
    }

    /// Reset the paged-results cookie, restarting pagination.
    pub fn clear_search_cookie(&mut self) {
        self.search_cookie.clear();
    }

    /// Whether the last bind succeeded and the connection is still up.
    ///
    /// The `and_bound` argument is accepted for interface compatibility and
    /// ignored: the check has always required a successful bind.
    pub fn connected(&self, _and_bound: bool) -> bool {
        self.transport.is_some() && self.bound
    }

    // ------------------- connection lifecycle -------------------

    /// Open the TCP (or TLS) connection. Does not bind.
    pub fn login(&mut self) -> Result<bool> {
        if let Some(old) = self.transport.take() {
            old.close();
        }
        self.seq = 0;
        self.bound = false;
        let host = self.settings.target_host.clone();
        let port = self.settings.target_port;
        let timeout = self.settings.timeout;
        let tls = self.settings.use_tls.then(|| self.settings.tls.clone());
        match Transport::open(&host, port, timeout, tls.as_ref()) {
            Ok(transport) => {
                debug!("logged in to {}", transport.peer());
                self.transport = Some(transport);
                self.result_code = ResultCode::Success;
                self.result_string.clear();
                Ok(true)
            }
            Err(e) => Ok(self.fail_transport(&e)),
        }
    }

    /// Send an UnbindRequest, close the socket and forget the cached root
    /// DN. Always succeeds.
    pub fn logout(&mut self) -> Result<bool> {
        if self.transport.is_some() {
            let mut op = Vec::new();
            ber::write_tlv(&mut op, ber::APP_UNBIND_REQUEST, &[]);
            if let Err(e) = self.send_request(&op, None) {
                trace!("unbind notice not sent: {e}");
            }
            if let Some(transport) = self.transport.take() {
                transport.close();
            }
        }
        self.seq = 0;
        self.bound = false;
        self.root_dn = None;
        self.result_code = ResultCode::Success;
        self.result_string.clear();
        debug!("logged out");
        Ok(true)
    }

    // ------------------- binds -------------------

    /// Simple bind with the configured user name and password; empty
    /// credentials perform an anonymous bind.
    ///
    /// The password travels in plain text: pair this with TLS, or use
    /// [`bind_sasl_digest_md5`](Self::bind_sasl_digest_md5).
    pub fn bind(&mut self) -> Result<bool> {
        self.require_connection()?;
        self.bound = false;
        let version = self.settings.version;
        let user = self.settings.user_name.clone();
        let password = self.settings.password.clone();
        let mut op = Vec::new();
        ber::write_constructed(&mut op, ber::APP_BIND_REQUEST, |req| {
            ber::write_integer(req, i64::from(version));
            ber::write_str(req, &user);
            ber::write_tlv(req, ber::context(0), password.as_bytes());
        });
        let Some(message) = self.transact(&op, None)? else {
            return Ok(false);
        };
        if !matches!(message.protocol_op, ProtocolOp::BindResponse(_)) {
            return Ok(self.unexpected_response(&message, "bind"));
        }
        self.bound = self.result_code.is_success();
        debug!("bind as {user:?}: {:?}", self.result_code);
        Ok(self.bound)
    }

    /// SASL DIGEST-MD5 bind (RFC 2831): request a challenge, answer it,
    /// repeat while the server keeps the bind in progress.
    pub fn bind_sasl_digest_md5(&mut self) -> Result<bool> {
        self.require_connection()?;
        self.bound = false;
        let version = self.settings.version;
        let user = self.settings.user_name.clone();
        let password = self.settings.password.clone();
        let host = self.settings.target_host.clone();
        // a conforming server needs one round trip; leave room for a retry
        for _ in 0..3 {
            let mut op = Vec::new();
            ber::write_constructed(&mut op, ber::APP_BIND_REQUEST, |req| {
                ber::write_integer(req, i64::from(version));
                ber::write_str(req, "");
                ber::write_constructed(req, ber::context_constructed(3), |sasl| {
                    ber::write_str(sasl, SASL_DIGEST_MD5);
                });
            });
            let Some(message) = self.transact(&op, None)? else {
                return Ok(false);
            };
            let challenge = match &message.protocol_op {
                ProtocolOp::BindResponse(resp)
                    if self.result_code == ResultCode::SaslBindInProgress =>
                {
                    resp.server_sasl_creds.clone().unwrap_or_default()
                }
                ProtocolOp::BindResponse(_) => {
                    self.bound = self.result_code.is_success();
                    return Ok(self.bound);
                }
                _ => return Ok(self.unexpected_response(&message, "bind")),
            };

            let cnonce = format!("{:016x}", rand::thread_rng().gen::<u64>());
            let credentials =
                digest::sasl_credentials(&user, &password, &host, &challenge, &cnonce);
            let mut op = Vec::new();
            ber::write_constructed(&mut op, ber::APP_BIND_REQUEST, |req| {
                ber::write_integer(req, i64::from(version));
                ber::write_str(req, "");
                ber::write_constructed(req, ber::context_constructed(3), |sasl| {
                    ber::write_str(sasl, SASL_DIGEST_MD5);
                    ber::write_str(sasl, &credentials);
                });
            });
            let Some(message) = self.transact(&op, None)? else {
                return Ok(false);
            };
            match &message.protocol_op {
                ProtocolOp::BindResponse(_) => {
                    if self.result_code == ResultCode::SaslBindInProgress {
                        continue;
                    }
                    self.bound = self.result_code.is_success();
                    debug!("DIGEST-MD5 bind as {user:?}: {:?}", self.result_code);
                    return Ok(self.bound);
                }
                _ => return Ok(self.unexpected_response(&message, "bind")),
            }
        }
        warn!("DIGEST-MD5 negotiation did not converge");
        Ok(false)
    }

    // ------------------- search family -------------------

    /// Run one search. The result list is cleared on entry and populated
    /// with the entries of this call only; paged callers therefore have to
    /// persist entries between calls (or use [`search_all`](Self::search_all)).
    ///
    /// An empty `filter` means `(objectClass=*)`. When
    /// `settings.search_page_size` is non-zero the paged-results control is
    /// attached and the continuation cookie is stored for the next call.
    pub fn search(
        &mut self,
        base_dn: &str,
        types_only: bool,
        filter: &str,
        attributes: &[&str],
    ) -> Result<bool> {
        self.require_connection()?;
        self.search_result.clear();
        let filter_text = if filter.trim().is_empty() {
            "(objectClass=*)"
        } else {
            filter
        };
        let filter_bytes = Filter::compile(filter_text)?;

        let scope = self.settings.search_scope;
        let aliases = self.settings.search_aliases;
        let size_limit = self.settings.search_size_limit;
        let time_limit = self.settings.search_time_limit;
        let page_size = self.settings.search_page_size;

        let mut op = Vec::new();
        ber::write_constructed(&mut op, ber::APP_SEARCH_REQUEST, |req| {
            ber::write_str(req, base_dn);
            ber::write_enumerated(req, scope.0);
            ber::write_enumerated(req, aliases.0);
            ber::write_integer(req, i64::from(size_limit));
            ber::write_integer(req, i64::from(time_limit));
            ber::write_boolean(req, types_only);
            req.extend_from_slice(&filter_bytes);
            ber::write_sequence(req, |attrs| {
                for attribute in attributes {
                    ber::write_str(attrs, attribute);
                }
            });
        });
        let controls = (page_size > 0).then(|| {
            let mut out = Vec::new();
            ber::write_constructed(&mut out, ber::CTX_CONTROLS, |controls| {
                ber::write_sequence(controls, |control| {
                    ber::write_str(control, OID_PAGED_RESULTS);
                    ber::write_boolean(control, false);
                    let mut value = Vec::new();
                    ber::write_sequence(&mut value, |v| {
                        ber::write_integer(v, i64::from(page_size));
                        ber::write_octet_string(v, &self.search_cookie);
                    });
                    ber::write_octet_string(control, &value);
                });
            });
            out
        });

        if let Err(e) = self.send_request(&op, controls.as_deref()) {
            self.operation_failure(e)?;
            return Ok(false);
        }
        loop {
            let message = match self.receive_message() {
                Ok(message) => message,
                Err(e) => {
                    self.operation_failure(e)?;
                    return Ok(false);
                }
            };
            match message.protocol_op {
                ProtocolOp::SearchResultEntry(entry) => {
                    self.search_result.entries.push(entry);
                }
                ProtocolOp::SearchResultReference(urls) => {
                    self.referrals.extend(urls);
                }
                ProtocolOp::SearchResultDone(_) => {
                    self.search_cookie =
                        extract_paged_cookie(message.controls.as_deref()).unwrap_or_default();
                    break;
                }
                _ => return Ok(self.unexpected_response(&message, "search")),
            }
        }
        debug!(
            "search under {base_dn:?} matched {} entries ({:?})",
            self.search_result.len(),
            self.result_code
        );
        Ok(self.result_code.is_success())
    }

    /// Search and aggregate every page into one result set, looping on the
    /// continuation cookie until the server reports exhaustion.
    pub fn search_all(
        &mut self,
        base_dn: &str,
        types_only: bool,
        filter: &str,
        attributes: &[&str],
    ) -> Result<bool> {
        self.search_cookie.clear();
        let mut aggregate = SearchResult::default();
        loop {
            if !self.search(base_dn, types_only, filter, attributes)? {
                return Ok(false);
            }
            aggregate.append(&mut self.search_result);
            if self.search_cookie.is_empty() {
                break;
            }
        }
        self.search_result = aggregate;
        Ok(true)
    }

    /// Search and return the first entry, if any.
    pub fn search_first(
        &mut self,
        base_dn: &str,
        filter: &str,
        attributes: &[&str],
    ) -> Result<Option<SearchEntry>> {
        if !self.search(base_dn, false, filter, attributes)? {
            return Ok(None);
        }
        Ok(self.search_result.first().cloned())
    }

    /// Read a single object: a base-scoped search on `object_dn` itself.
    /// The configured scope is restored afterwards.
    pub fn search_object(
        &mut self,
        object_dn: &str,
        filter: &str,
        attributes: &[&str],
    ) -> Result<Option<SearchEntry>> {
        let saved_scope = self.settings.search_scope;
        self.settings.search_scope = SearchScope::BaseObject;
        let result = self.search_first(object_dn, filter, attributes);
        self.settings.search_scope = saved_scope;
        result
    }

    // ------------------- updates -------------------

    /// Add an entry with the given attributes.
    pub fn add(&mut self, dn: &str, attributes: &[Attribute]) -> Result<bool> {
        self.require_connection()?;
        let mut op = Vec::new();
        ber::write_constructed(&mut op, ber::APP_ADD_REQUEST, |req| {
            ber::write_str(req, dn);
            ber::write_sequence(req, |list| {
                for attribute in attributes {
                    write_attribute(list, attribute);
                }
            });
        });
        self.simple_operation(&op, None, ProtocolOpTag::AddResponse)
    }

    /// Apply a list of changes to an entry, in order.
    pub fn modify(
        &mut self,
        dn: &str,
        changes: &[(ModifyOperation, Attribute)],
    ) -> Result<bool> {
        self.require_connection()?;
        let mut op = Vec::new();
        ber::write_constructed(&mut op, ber::APP_MODIFY_REQUEST, |req| {
            ber::write_str(req, dn);
            ber::write_sequence(req, |list| {
                for (operation, attribute) in changes {
                    ber::write_sequence(list, |change| {
                        ber::write_enumerated(change, operation.0);
                        write_attribute(change, attribute);
                    });
                }
            });
        });
        self.simple_operation(&op, None, ProtocolOpTag::ModifyResponse)
    }

    /// Rename and/or move an entry.
    pub fn modify_dn(
        &mut self,
        dn: &str,
        new_rdn: &str,
        delete_old_rdn: bool,
        new_superior: Option<&str>,
    ) -> Result<bool> {
        self.require_connection()?;
        let mut op = Vec::new();
        ber::write_constructed(&mut op, ber::APP_MODDN_REQUEST, |req| {
            ber::write_str(req, dn);
            ber::write_str(req, new_rdn);
            ber::write_boolean(req, delete_old_rdn);
            if let Some(superior) = new_superior {
                ber::write_tlv(req, ber::context(0), superior.as_bytes());
            }
        });
        self.simple_operation(&op, None, ProtocolOpTag::ModDnResponse)
    }

    /// Delete a leaf entry.
    pub fn delete(&mut self, dn: &str) -> Result<bool> {
        self.delete_inner(dn, false)
    }

    /// Delete an entry and everything below it, using the Active Directory
    /// tree-delete control.
    pub fn delete_tree(&mut self, dn: &str) -> Result<bool> {
        self.delete_inner(dn, true)
    }

    fn delete_inner(&mut self, dn: &str, tree: bool) -> Result<bool> {
        self.require_connection()?;
        let mut op = Vec::new();
        // the DN is the direct content of the DelRequest, no SEQUENCE
        ber::write_tlv(&mut op, ber::APP_DEL_REQUEST, dn.as_bytes());
        let controls = tree.then(|| {
            let mut out = Vec::new();
            ber::write_constructed(&mut out, ber::CTX_CONTROLS, |controls| {
                ber::write_sequence(controls, |control| {
                    ber::write_str(control, OID_TREE_DELETE);
                    ber::write_boolean(control, true);
                });
            });
            out
        });
        self.simple_operation(&op, controls.as_deref(), ProtocolOpTag::DelResponse)
    }

    /// Compare `attribute=value` (split at the first `=`) against an entry.
    ///
    /// Returns `Ok(true)` only for result code 0. A matching comparison is
    /// reported by the server as `compareTrue` (6) and a mismatch as
    /// `compareFalse` (5), so the interesting outcome is in
    /// [`result_code`](Self::result_code), not in the boolean. Kept this way
    /// for compatibility with the original interface.
    pub fn compare(&mut self, dn: &str, attribute_value: &str) -> Result<bool> {
        self.require_connection()?;
        let (attribute, value) = attribute_value.split_once('=').ok_or_else(|| {
            LdapError::InvalidFilter(format!("expected attribute=value, got {attribute_value:?}"))
        })?;
        let mut op = Vec::new();
        ber::write_constructed(&mut op, ber::APP_COMPARE_REQUEST, |req| {
            ber::write_str(req, dn);
            ber::write_sequence(req, |ava| {
                ber::write_str(ava, attribute);
                ber::write_octet_string(ava, value.as_bytes());
            });
        });
        self.simple_operation(&op, None, ProtocolOpTag::CompareResponse)
    }

    /// Invoke an extended operation. On success the response name and
    /// value, when present, are available through
    /// [`ext_name`](Self::ext_name) and [`ext_value`](Self::ext_value).
    pub fn extended(&mut self, oid: &str, value: &[u8]) -> Result<bool> {
        self.require_connection()?;
        self.ext_name.clear();
        self.ext_value.clear();
        let mut op = Vec::new();
        ber::write_constructed(&mut op, ber::APP_EXTENDED_REQUEST, |req| {
            ber::write_tlv(req, ber::context(0), oid.as_bytes());
            if !value.is_empty() {
                ber::write_tlv(req, ber::context(1), value);
            }
        });
        let Some(message) = self.transact(&op, None)? else {
            return Ok(false);
        };
        match message.protocol_op {
            ProtocolOp::ExtendedResponse(resp) => {
                if self.result_code.is_success() {
                    self.ext_name = resp.response_name.unwrap_or_default();
                    self.ext_value = resp.response_value.unwrap_or_default();
                }
                Ok(self.result_code.is_success())
            }
            _ => Ok(self.unexpected_response(&message, "extended")),
        }
    }

    // ------------------- directory helpers -------------------

    /// Create a computer account under `parent_dn`.
    ///
    /// If the account already exists it is first deleted when
    /// `delete_if_present` is set; otherwise the call returns `Ok(true)`
    /// while leaving an explanatory [`result_string`](Self::result_string),
    /// so callers interested in the distinction must check the message.
    /// A non-empty `password` is written to `unicodePwd` (UTF-16LE, quoted),
    /// which Active Directory only accepts over an encrypted connection.
    pub fn add_computer(
        &mut self,
        parent_dn: &str,
        computer_name: &str,
        password: &str,
        delete_if_present: bool,
    ) -> Result<bool> {
        self.require_connection()?;
        let sam_account = format!("{}$", computer_name.to_uppercase());
        let computer_dn = format!("CN={computer_name},{parent_dn}");
        let existing = self.search_first(
            parent_dn,
            &format!("(sAMAccountName={sam_account})"),
            &["distinguishedName"],
        )?;
        if let Some(entry) = existing {
            if !delete_if_present {
                warn!("computer account {computer_dn} already exists");
                self.result_string = format!("Computer account {computer_dn} already exists");
                return Ok(true);
            }
            let dn = if entry.object_name.is_empty() {
                computer_dn.clone()
            } else {
                entry.object_name.clone()
            };
            if !self.delete(&dn)? {
                return Ok(false);
            }
        }
        let mut attributes = vec![
            Attribute::text("objectClass", "computer"),
            Attribute::text("cn", computer_name),
            Attribute::text("sAMAccountName", &sam_account),
            Attribute::text("userAccountControl", "4096"),
        ];
        if !password.is_empty() {
            let quoted = format!("\"{password}\"");
            let utf16le: Vec<u8> = quoted
                .encode_utf16()
                .flat_map(|unit| unit.to_le_bytes())
                .collect();
            attributes.push(Attribute::with_values("unicodePwd", &[&utf16le]));
        }
        self.add(&computer_dn, &attributes)
    }

    /// Read `rootDomainNamingContext` from the server's root DSE. The
    /// answer is cached until [`logout`](Self::logout).
    pub fn discover_root_dn(&mut self) -> Result<Option<String>> {
        if let Some(root) = &self.root_dn {
            return Ok(Some(root.clone()));
        }
        let entry = self.search_object("", "*", &["rootDomainNamingContext"])?;
        let root = entry.and_then(|e| e.readable("rootDomainNamingContext"));
        if let Some(root) = &root {
            debug!("root naming context: {root}");
            self.root_dn = Some(root.clone());
        }
        Ok(root)
    }

    /// Resolve a well-known container to its DN by matching the GUID in the
    /// root entry's `wellKnownObjects` bindings (`B:32:<guid>:<dn>`).
    pub fn well_known_object_dn(&mut self, object: WellKnownObject) -> Result<Option<String>> {
        let Some(root) = self.discover_root_dn()? else {
            return Ok(None);
        };
        let Some(entry) = self.search_object(&root, "*", &["wellKnownObjects"])? else {
            return Ok(None);
        };
        let Some(attribute) = entry.find("wellKnownObjects") else {
            return Ok(None);
        };
        for value in attribute.values() {
            let text = String::from_utf8_lossy(value);
            let mut parts = text.splitn(4, ':');
            let (Some("B"), Some("32"), Some(guid), Some(dn)) =
                (parts.next(), parts.next(), parts.next(), parts.next())
            else {
                continue;
            };
            if guid.eq_ignore_ascii_case(object.guid()) {
                return Ok(Some(dn.to_string()));
            }
        }
        Ok(None)
    }

    // ------------------- wire plumbing -------------------

    fn require_connection(&self) -> Result<()> {
        if self.transport.is_none() {
            return Err(LdapError::NotConnected);
        }
        Ok(())
    }

    /// Frame and send one request: `SEQUENCE { INTEGER seq, op, controls? }`
    /// with a freshly incremented message id.
    fn send_request(&mut self, op: &[u8], controls: Option<&[u8]>) -> Result<()> {
        if self.transport.is_none() {
            return Err(LdapError::NotConnected);
        }
        self.seq += 1;
        let seq = self.seq;
        let mut frame = Vec::with_capacity(op.len() + 16);
        ber::write_sequence(&mut frame, |msg| {
            ber::write_integer(msg, i64::from(seq));
            msg.extend_from_slice(op);
            if let Some(controls) = controls {
                msg.extend_from_slice(controls);
            }
        });
        let transport = self.transport.as_mut().ok_or(LdapError::NotConnected)?;
        transport.write_all(&frame)?;
        self.referrals.clear();
        trace!("sent request #{seq} ({} bytes)", frame.len());
        Ok(())
    }

    /// Read one framed response off the wire: a SEQUENCE tag, a short or
    /// long (up to 4 byte) length, then the declared content.
    fn receive_frame(&mut self) -> Result<Vec<u8>> {
        let transport = self.transport.as_mut().ok_or(LdapError::NotConnected)?;
        let mut head = [0u8; 2];
        transport.read_exact(&mut head)?;
        if head[0] != ber::TAG_SEQUENCE {
            return Err(LdapError::Protocol(format!(
                "response does not start with SEQUENCE but 0x{:02x}",
                head[0]
            )));
        }
        let mut frame = vec![head[0], head[1]];
        let declared = if head[1] & 0x80 == 0 {
            usize::from(head[1])
        } else {
            let n = usize::from(head[1] & 0x7F);
            if n == 0 || n > 4 {
                return Err(LdapError::Protocol(format!(
                    "unsupported length form 0x{:02x}",
                    head[1]
                )));
            }
            let mut length_bytes = [0u8; 4];
            transport.read_exact(&mut length_bytes[..n])?;
            frame.extend_from_slice(&length_bytes[..n]);
            length_bytes[..n]
                .iter()
                .fold(0usize, |acc, &b| (acc << 8) | usize::from(b))
        };
        let body_start = frame.len();
        frame.resize(body_start + declared, 0);
        transport.read_exact(&mut frame[body_start..])?;
        trace!("received frame of {} bytes", frame.len());
        self.full_result = frame.clone();
        Ok(frame)
    }

    /// Receive and decode one message, verify its id against the request,
    /// and fold the common result fields into the client state.
    fn receive_message(&mut self) -> Result<LdapMessage> {
        let frame = self.receive_frame()?;
        let (_, message) = LdapMessage::from_ber(&frame).map_err(LdapError::from)?;
        if message.message_id.0 != self.seq {
            return Err(LdapError::Protocol(format!(
                "response id {} does not match request #{}",
                message.message_id.0, self.seq
            )));
        }
        self.response_code = Some(message.protocol_op.tag());
        if let Some(result) = message.protocol_op.result() {
            self.result_code = result.result_code;
            self.response_dn = result.matched_dn.clone();
            self.result_string = if result.diagnostic_message.is_empty() {
                result.result_code.reason().to_string()
            } else {
                result.diagnostic_message.clone()
            };
            self.referrals.extend_from_slice(&result.referral);
        }
        Ok(message)
    }

    /// One request, one response.
    fn transact(&mut self, op: &[u8], controls: Option<&[u8]>) -> Result<Option<LdapMessage>> {
        if let Err(e) = self.send_request(op, controls) {
            self.operation_failure(e)?;
            return Ok(None);
        }
        match self.receive_message() {
            Ok(message) => Ok(Some(message)),
            Err(e) => {
                self.operation_failure(e)?;
                Ok(None)
            }
        }
    }

    fn simple_operation(
        &mut self,
        op: &[u8],
        controls: Option<&[u8]>,
        expected: ProtocolOpTag,
    ) -> Result<bool> {
        let Some(message) = self.transact(op, controls)? else {
            return Ok(false);
        };
        if message.protocol_op.tag() != expected {
            return Ok(self.unexpected_response(&message, "operation"));
        }
        Ok(self.result_code.is_success())
    }

    /// Sort a mid-operation error into the failure classes: caller errors
    /// propagate, transport errors tear the connection down, everything
    /// else is recorded as a protocol fault (the connection is left to the
    /// caller, as the stream position is no longer trustworthy).
    fn operation_failure(&mut self, e: LdapError) -> Result<()> {
        match e {
            LdapError::NotConnected => Err(e),
            LdapError::Io(_) | LdapError::Tls(_) => {
                self.fail_transport(&e);
                Ok(())
            }
            other => {
                warn!("protocol failure: {other}");
                self.result_code = ResultCode::ProtocolError;
                self.result_string = other.to_string();
                Ok(())
            }
        }
    }

    fn fail_transport(&mut self, e: &LdapError) -> bool {
        warn!("connection failure: {e}");
        if let Some(transport) = self.transport.take() {
            transport.close();
        }
        self.seq = 0;
        self.bound = false;
        self.result_code = ResultCode::TRANSPORT_FAILURE;
        self.result_string = e.to_string();
        false
    }

    fn unexpected_response(&mut self, message: &LdapMessage, operation: &str) -> bool {
        warn!(
            "unexpected {} response to {operation}",
            message.protocol_op.tag()
        );
        self.result_code = ResultCode::ProtocolError;
        self.result_string = format!(
            "unexpected {} response to {operation}",
            message.protocol_op.tag()
        );
        false
    }
}

fn write_attribute(out: &mut Vec<u8>, attribute: &Attribute) {
    ber::write_sequence(out, |attr| {
        ber::write_str(attr, attribute.name());
        ber::write_set(attr, |vals| {
            for value in attribute.values() {
                ber::write_octet_string(vals, value);
            }
        });
    });
}

/// Pull the continuation cookie out of a paged-results response control:
/// `SEQUENCE { INTEGER estimate, OCTET STRING cookie }`.
fn extract_paged_cookie(controls: Option<&[Control]>) -> Option<Vec<u8>> {
    let control = controls?
        .iter()
        .find(|c| c.control_type == OID_PAGED_RESULTS)?;
    let value = control.control_value.as_deref()?;
    let (tag, content, _) = ber::split_tlv(value).ok()?;
    if tag != ber::TAG_SEQUENCE {
        return None;
    }
    let (tag, _estimate, rest) = ber::split_tlv(content).ok()?;
    if tag != ber::TAG_INTEGER {
        return None;
    }
    let (tag, cookie, _) = ber::split_tlv(rest).ok()?;
    (tag == ber::TAG_OCTET_STRING).then(|| cookie.to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_operations_require_connection() {
        let mut client = LdapClient::default();
        assert!(matches!(client.bind(), Err(LdapError::NotConnected)));
        assert!(matches!(
            client.search("", false, "", &[]),
            Err(LdapError::NotConnected)
        ));
        assert!(matches!(
            client.delete("cn=x,dc=example,dc=com"),
            Err(LdapError::NotConnected)
        ));
    }

    #[test]
    fn test_logout_without_connection_resets_state() {
        let mut client = LdapClient::default();
        assert!(client.logout().expect("logout failed"));
        assert!(!client.connected(true));
        assert_eq!(client.result_code(), ResultCode::Success);
    }

    #[test]
    fn test_compare_checks_connection_before_arguments() {
        let mut client = LdapClient::default();
        assert!(matches!(
            client.compare("cn=x", "no-equals-sign"),
            Err(LdapError::NotConnected)
        ));
    }

    #[test]
    fn test_extract_paged_cookie() {
        let mut value = Vec::new();
        ber::write_sequence(&mut value, |v| {
            ber::write_integer(v, 100);
            ber::write_octet_string(v, b"cookie-bytes");
        });
        let controls = vec![Control {
            control_type: OID_PAGED_RESULTS.to_string(),
            criticality: false,
            control_value: Some(value),
        }];
        let cookie = extract_paged_cookie(Some(&controls)).expect("cookie expected");
        assert_eq!(cookie, b"cookie-bytes");
        assert!(extract_paged_cookie(None).is_none());
        assert!(extract_paged_cookie(Some(&[])).is_none());
    }

    #[test]
    fn test_default_settings() {
        let settings = LdapClientSettings::default();
        assert_eq!(settings.target_host, "localhost");
        assert_eq!(settings.target_port, 389);
        assert_eq!(settings.version, 3);
        assert_eq!(settings.timeout, Duration::from_millis(5000));
        assert_eq!(settings.search_scope, SearchScope::WholeSubtree);
        assert_eq!(settings.search_aliases, DerefAliases::DerefAlways);
        assert_eq!(settings.search_page_size, 0);
    }
}

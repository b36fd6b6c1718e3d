//! # LDAP Client
//!
//! A synchronous Lightweight Directory Access Protocol ([RFC4511]) v2/v3
//! client: bind (simple and SASL DIGEST-MD5), search with paging, compare,
//! add, modify, rename, delete and extended operations over TCP or TLS,
//! plus the Active Directory conveniences administrative tooling needs
//! (root naming context discovery, well-known containers, computer account
//! creation, SID/GUID rendering).
//!
//! The BER wire encoding is produced by the in-crate [`ber`] writers and
//! decoded with the [asn1-rs](https://github.com/rusticata/asn1-rs)
//! combinators. The client is blocking and keeps one request in flight per
//! connection; it aims to be panic-free and never reads past a declared
//! message length.
//!
//! ```no_run
//! use ldap_client::{LdapClient, LdapClientSettings};
//!
//! # fn main() -> Result<(), ldap_client::LdapError> {
//! let mut client = LdapClient::new(LdapClientSettings {
//!     target_host: "dc01.corp.local".to_string(),
//!     user_name: "admin@corp.local".to_string(),
//!     password: "secret".to_string(),
//!     ..Default::default()
//! });
//! if client.login()? && client.bind()? {
//!     client.search(
//!         "DC=corp,DC=local",
//!         false,
//!         "(objectClass=person)",
//!         &["cn", "mail"],
//!     )?;
//!     for entry in client.search_result() {
//!         println!("{}", entry.object_name);
//!     }
//!     client.logout()?;
//! }
//! # Ok(())
//! # }
//! ```
//!
//! [RFC4511]: https://tools.ietf.org/html/rfc4511

#![deny(unstable_features, unused_import_braces, unused_qualifications)]
#![warn(missing_debug_implementations, unreachable_pub)]
#![forbid(unsafe_code)]
#![cfg_attr(docsrs, feature(doc_cfg))]

pub mod ad;
pub mod ber;
pub mod client;
pub mod error;
pub mod filter;
pub mod ldap;
mod parser;
pub mod search;
pub mod transport;

mod digest;

pub use ad::{dn_to_cn, WellKnownObject};
pub use client::{
    LdapClient, LdapClientSettings, OID_PAGED_RESULTS, OID_START_TLS, OID_TREE_DELETE,
};
pub use error::{LdapError, Result};
pub use filter::Filter;
pub use ldap::{DerefAliases, ModifyOperation, ProtocolOpTag, ResultCode, SearchScope};
pub use search::{Attribute, SearchEntry, SearchResult};
pub use transport::TlsOptions;

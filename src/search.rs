//! Search result model
//!
//! A [`Search`](crate::LdapClient::search) call fills a [`SearchResult`]
//! with entries in the order the server returned them; attribute and value
//! order is likewise preserved (LDAP guarantees neither, so neither do we).
//! The same [`Attribute`] type doubles as the attribute description used
//! when building Add and Modify requests.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use uuid::Uuid;

use crate::ad;

/// A named attribute and its raw values.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Attribute {
    name: String,
    is_binary: bool,
    values: Vec<Vec<u8>>,
}

impl Attribute {
    /// Create an empty attribute. The binary flag is derived from the
    /// attribute description: any name containing `;binary` (RFC 4522
    /// transfer option, case-insensitive) is treated as binary.
    pub fn new(name: &str) -> Self {
        Attribute {
            name: name.to_string(),
            is_binary: name.to_ascii_lowercase().contains(";binary"),
            values: Vec::new(),
        }
    }

    /// Attribute with one textual value.
    pub fn text(name: &str, value: &str) -> Self {
        let mut attr = Attribute::new(name);
        attr.push(value.as_bytes());
        attr
    }

    /// Attribute with the given raw values, in order.
    pub fn with_values(name: &str, values: &[&[u8]]) -> Self {
        let mut attr = Attribute::new(name);
        for v in values {
            attr.push(v);
        }
        attr
    }

    pub fn push(&mut self, value: &[u8]) {
        self.values.push(value.to_vec());
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_binary(&self) -> bool {
        self.is_binary
    }

    /// Raw values, insertion-ordered.
    pub fn values(&self) -> &[Vec<u8>] {
        &self.values
    }

    pub fn first(&self) -> Option<&[u8]> {
        self.values.first().map(Vec::as_slice)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Printable projection of one value.
    ///
    /// Binary attributes render as base64. Text values lose at most one
    /// trailing NUL; if control bytes remain the value is backslash-hex
    /// escaped, otherwise it is passed through as UTF-8.
    pub fn readable(&self, index: usize) -> Option<String> {
        let value = self.values.get(index)?;
        if self.is_binary {
            return Some(BASE64.encode(value));
        }
        Some(readable_text(value))
    }

    /// Printable projection of every value, in order.
    pub fn readable_values(&self) -> Vec<String> {
        (0..self.values.len()).filter_map(|i| self.readable(i)).collect()
    }
}

fn readable_text(value: &[u8]) -> String {
    let value = value.strip_suffix(&[0u8]).unwrap_or(value);
    let control = |b: u8| matches!(b, 0..=8 | 10..=31);
    if !value.iter().copied().any(control) {
        return String::from_utf8_lossy(value).into_owned();
    }
    let mut escaped = Vec::with_capacity(value.len() * 2);
    for &b in value {
        if control(b) || b == b'\\' {
            escaped.extend_from_slice(format!("\\{b:02X}").as_bytes());
        } else {
            escaped.push(b);
        }
    }
    String::from_utf8_lossy(&escaped).into_owned()
}

/// One directory entry of a search response.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct SearchEntry {
    /// Distinguished name of the entry.
    pub object_name: String,
    /// Attributes in the order received.
    pub attributes: Vec<Attribute>,
}

impl SearchEntry {
    pub fn new(object_name: &str) -> Self {
        SearchEntry {
            object_name: object_name.to_string(),
            attributes: Vec::new(),
        }
    }

    /// First attribute with the given name, compared case-insensitively.
    pub fn find(&self, name: &str) -> Option<&Attribute> {
        self.attributes
            .iter()
            .find(|a| a.name.eq_ignore_ascii_case(name))
    }

    /// First raw value of the named attribute.
    pub fn value(&self, name: &str) -> Option<&[u8]> {
        self.find(name)?.first()
    }

    /// First value of the named attribute, as its printable projection.
    pub fn readable(&self, name: &str) -> Option<String> {
        self.find(name)?.readable(0)
    }

    /// `objectSid`, rendered in the `S-1-5-21-…` textual convention.
    pub fn sid(&self) -> Option<String> {
        ad::sid_to_string(self.value("objectSid")?)
    }

    /// `objectGUID`, decoded from its 16 little-endian bytes.
    pub fn guid(&self) -> Option<Uuid> {
        ad::guid_from_bytes(self.value("objectGUID")?)
    }
}

/// All entries of one search response, in wire order.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct SearchResult {
    pub entries: Vec<SearchEntry>,
}

impl SearchResult {
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn first(&self) -> Option<&SearchEntry> {
        self.entries.first()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, SearchEntry> {
        self.entries.iter()
    }

    /// Move another result's entries to the end of this one. Used when
    /// aggregating pages of a paged search.
    pub fn append(&mut self, other: &mut SearchResult) {
        self.entries.append(&mut other.entries);
    }
}

impl<'a> IntoIterator for &'a SearchResult {
    type Item = &'a SearchEntry;
    type IntoIter = std::slice::Iter<'a, SearchEntry>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_binary_flag_from_name() {
        assert!(!Attribute::new("userCertificate").is_binary());
        assert!(Attribute::new("userCertificate;binary").is_binary());
        assert!(Attribute::new("userCertificate;BINARY").is_binary());
    }

    #[test]
    fn test_readable_text() {
        let attr = Attribute::text("cn", "Alice");
        assert_eq!(attr.readable(0).expect("value"), "Alice");
    }

    #[test]
    fn test_readable_strips_single_trailing_nul() {
        let attr = Attribute::with_values("description", &[b"abc\0"]);
        assert_eq!(attr.readable(0).expect("value"), "abc");
        // two NULs leave a control byte behind, which forces escaping
        let attr = Attribute::with_values("description", &[b"abc\0\0"]);
        assert_eq!(attr.readable(0).expect("value"), "abc\\00");
    }

    #[test]
    fn test_readable_escapes_control_bytes() {
        let attr = Attribute::with_values("description", &[b"a\x01b"]);
        assert_eq!(attr.readable(0).expect("value"), "a\\01b");
        // tab is not in the escaped range
        let attr = Attribute::with_values("description", &[b"a\tb"]);
        assert_eq!(attr.readable(0).expect("value"), "a\tb");
    }

    #[test]
    fn test_readable_base64_when_binary() {
        let attr = Attribute::with_values("userCertificate;binary", &[&[0u8, 1, 2, 250]]);
        assert_eq!(attr.readable(0).expect("value"), "AAEC+g==");
    }

    #[test]
    fn test_entry_lookup_case_insensitive() {
        let mut entry = SearchEntry::new("CN=Alice,DC=example,DC=com");
        entry.attributes.push(Attribute::text("sAMAccountName", "alice"));
        assert_eq!(entry.value("samaccountname").expect("value"), b"alice");
        assert!(entry.find("mail").is_none());
    }

    #[test]
    fn test_entry_lookup_first_match_wins() {
        let mut entry = SearchEntry::new("CN=X");
        entry.attributes.push(Attribute::text("cn", "first"));
        entry.attributes.push(Attribute::text("CN", "second"));
        assert_eq!(entry.value("cn").expect("value"), b"first");
    }

    #[test]
    fn test_value_order_preserved() {
        let attr = Attribute::with_values("member", &[b"c", b"a", b"b"]);
        let vals: Vec<&[u8]> = attr.values().iter().map(Vec::as_slice).collect();
        assert_eq!(vals, vec![&b"c"[..], b"a", b"b"]);
    }
}

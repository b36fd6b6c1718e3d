//! SASL DIGEST-MD5 (RFC 2831)
//!
//! The mechanism is long deprecated (RFC 6331) but still widely deployed
//! on directory servers, Active Directory included. Only the
//! authentication-only profile is implemented: `qop=auth`, no subsequent
//! integrity or confidentiality layer.

use std::collections::HashMap;
use std::fmt::Write;

use md5::{Digest, Md5};

/// Parse a server challenge: a comma-separated `key=value` list. Accepts
/// any key order, optional whitespace around keys and values, and optional
/// quoting; commas and backslash escapes inside quoted values belong to
/// the value.
pub(crate) fn parse_challenge(challenge: &[u8]) -> HashMap<String, String> {
    let mut fields = HashMap::new();
    let text = String::from_utf8_lossy(challenge);
    let mut chars = text.chars().peekable();
    loop {
        // key
        let mut key = String::new();
        for c in chars.by_ref() {
            if c == '=' {
                break;
            }
            key.push(c);
        }
        let key = key.trim().to_ascii_lowercase();
        if key.is_empty() {
            break;
        }
        // value, quoted or bare
        while chars.peek().map_or(false, |c| c.is_ascii_whitespace()) {
            chars.next();
        }
        let mut value = String::new();
        if chars.peek() == Some(&'"') {
            chars.next();
            while let Some(c) = chars.next() {
                match c {
                    '\\' => {
                        if let Some(escaped) = chars.next() {
                            value.push(escaped);
                        }
                    }
                    '"' => break,
                    _ => value.push(c),
                }
            }
            // skip up to the next separator
            for c in chars.by_ref() {
                if c == ',' {
                    break;
                }
            }
        } else {
            for c in chars.by_ref() {
                if c == ',' {
                    break;
                }
                value.push(c);
            }
            value = value.trim().to_string();
        }
        fields.insert(key, value);
        if chars.peek().is_none() {
            break;
        }
    }
    fields
}

fn md5_raw(data: &[u8]) -> [u8; 16] {
    let mut hash = Md5::new();
    hash.update(data);
    hash.finalize().into()
}

fn to_hex(bytes: &[u8]) -> String {
    let mut hex = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        write!(hex, "{b:02x}").ok();
    }
    hex
}

pub(crate) const NONCE_COUNT: &str = "00000001";
pub(crate) const QOP: &str = "auth";

/// The `response` directive (RFC 2831 §2.1.2.1).
///
/// `H(A1)` starts from the *raw* 16-byte digest of `user:realm:password`;
/// everything after that point works on lowercase hex strings.
#[allow(clippy::too_many_arguments)]
pub(crate) fn compute_response(
    user: &str,
    realm: &str,
    password: &str,
    nonce: &str,
    cnonce: &str,
    authzid: Option<&str>,
    uri: &str,
) -> String {
    let ha0 = md5_raw(format!("{user}:{realm}:{password}").as_bytes());
    let mut a1 = ha0.to_vec();
    a1.extend_from_slice(format!(":{nonce}:{cnonce}").as_bytes());
    if let Some(authzid) = authzid {
        a1.extend_from_slice(format!(":{authzid}").as_bytes());
    }
    let ha1 = to_hex(&md5_raw(&a1));
    let ha2 = to_hex(&md5_raw(format!("AUTHENTICATE:{uri}").as_bytes()));
    to_hex(&md5_raw(
        format!("{ha1}:{nonce}:{NONCE_COUNT}:{cnonce}:{QOP}:{ha2}").as_bytes(),
    ))
}

/// Build the full client response to a DIGEST-MD5 challenge.
pub(crate) fn sasl_credentials(
    user: &str,
    password: &str,
    host: &str,
    challenge: &[u8],
    cnonce: &str,
) -> String {
    let fields = parse_challenge(challenge);
    let empty = String::new();
    let nonce = fields.get("nonce").unwrap_or(&empty);
    let realm = fields.get("realm").unwrap_or(&empty);
    let authzid = fields.get("authzid").filter(|a| !a.is_empty());
    let uri = format!("ldap/{}", host.to_ascii_lowercase());
    let response = compute_response(
        user,
        realm,
        password,
        nonce,
        cnonce,
        authzid.map(String::as_str),
        &uri,
    );
    let mut credentials = format!(
        "username=\"{user}\",realm=\"{realm}\",nonce=\"{nonce}\",cnonce=\"{cnonce}\",\
         nc={NONCE_COUNT},qop={QOP},digest-uri=\"{uri}\",response={response},charset=utf-8"
    );
    if let Some(authzid) = authzid {
        write!(credentials, ",authzid=\"{authzid}\"").ok();
    }
    credentials
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_challenge_any_order_and_whitespace() {
        let fields = parse_challenge(
            b"qop=\"auth\" , realm = \"elwood.innosoft.com\",\
              nonce=\"OA6MG9tEQGm2hh\", charset=utf-8, algorithm=md5-sess",
        );
        assert_eq!(fields["realm"], "elwood.innosoft.com");
        assert_eq!(fields["nonce"], "OA6MG9tEQGm2hh");
        assert_eq!(fields["qop"], "auth");
        assert_eq!(fields["algorithm"], "md5-sess");
    }

    #[test]
    fn test_challenge_quoted_comma_and_escape() {
        let fields = parse_challenge(b"realm=\"a,b\",nonce=\"x\\\"y\"");
        assert_eq!(fields["realm"], "a,b");
        assert_eq!(fields["nonce"], "x\"y");
    }

    #[test]
    fn test_response_rfc2831_example() {
        // the worked example of RFC 2831 §4
        let response = compute_response(
            "chris",
            "elwood.innosoft.com",
            "secret",
            "OA6MG9tEQGm2hh",
            "OA6MHXh6VqTrRk",
            None,
            "imap/elwood.innosoft.com",
        );
        assert_eq!(response, "d388dad90d4bbd760a152321f2143af7");
    }

    #[test]
    fn test_credentials_contain_required_directives() {
        let creds = sasl_credentials(
            "user",
            "pass",
            "DC01.Example.COM",
            b"nonce=\"abc\",realm=\"example.com\",qop=\"auth\"",
            "0123456789abcdef",
        );
        assert!(creds.contains("username=\"user\""));
        assert!(creds.contains("digest-uri=\"ldap/dc01.example.com\""));
        assert!(creds.contains("nc=00000001"));
        assert!(creds.contains("qop=auth"));
        assert!(creds.contains("response="));
        assert!(!creds.contains("authzid"));
    }
}

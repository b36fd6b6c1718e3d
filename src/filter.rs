//! LDAP search filters
//!
//! [`Filter`] models the RFC 4511 filter CHOICE. [`Filter::parse`] reads
//! the RFC 4515 textual form (`(&(objectClass=user)(cn=jo*))`) and
//! [`Filter::to_ber`] emits the context-tagged BER that fills the filter
//! slot of a SearchRequest.

use crate::ber;
use crate::error::{LdapError, Result};

// Filter ::= CHOICE {
//     and             [0] SET SIZE (1..MAX) OF filter Filter,
//     or              [1] SET SIZE (1..MAX) OF filter Filter,
//     not             [2] Filter,
//     equalityMatch   [3] AttributeValueAssertion,
//     substrings      [4] SubstringFilter,
//     greaterOrEqual  [5] AttributeValueAssertion,
//     lessOrEqual     [6] AttributeValueAssertion,
//     present         [7] AttributeDescription,
//     approxMatch     [8] AttributeValueAssertion,
//     extensibleMatch [9] MatchingRuleAssertion,
//     ...  }
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Filter {
    And(Vec<Filter>),
    Or(Vec<Filter>),
    Not(Box<Filter>),
    EqualityMatch(AttributeValueAssertion),
    Substrings(SubstringFilter),
    GreaterOrEqual(AttributeValueAssertion),
    LessOrEqual(AttributeValueAssertion),
    Present(String),
    ApproxMatch(AttributeValueAssertion),
    ExtensibleMatch(MatchingRuleAssertion),
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct AttributeValueAssertion {
    pub attribute_desc: String,
    pub assertion_value: Vec<u8>,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SubstringFilter {
    pub filter_type: String,
    pub substrings: Vec<Substring>,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Substring {
    Initial(Vec<u8>),
    Any(Vec<u8>),
    Final(Vec<u8>),
}

// MatchingRuleAssertion ::= SEQUENCE {
//     matchingRule    [1] MatchingRuleId OPTIONAL,
//     type            [2] AttributeDescription OPTIONAL,
//     matchValue      [3] AssertionValue,
//     dnAttributes    [4] BOOLEAN DEFAULT FALSE }
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct MatchingRuleAssertion {
    pub matching_rule: Option<String>,
    pub rule_type: Option<String>,
    pub assertion_value: Vec<u8>,
    pub dn_attributes: bool,
}

fn invalid(input: &str, why: &str) -> LdapError {
    LdapError::InvalidFilter(format!("{why} in {input:?}"))
}

impl Filter {
    /// Parse an RFC 4515 textual filter.
    ///
    /// The empty string and `*` both mean "any entry" and parse to a
    /// presence test on `objectClass`.
    pub fn parse(input: &str) -> Result<Filter> {
        let s = input.trim();
        if s.is_empty() || s == "*" {
            return Ok(Filter::Present("objectClass".to_string()));
        }
        let inner = if s.starts_with('(') {
            let (inner, rest) = take_group(s)?;
            if !rest.trim().is_empty() {
                return Err(invalid(s, "trailing data after filter"));
            }
            inner
        } else {
            s
        };
        Self::parse_inner(inner)
    }

    /// Parse and serialize in one step. An empty filter text yields a BER
    /// NULL so the SearchRequest stays well-formed.
    pub fn compile(input: &str) -> Result<Vec<u8>> {
        let s = input.trim();
        if s.is_empty() {
            let mut out = Vec::new();
            ber::write_null(&mut out);
            return Ok(out);
        }
        Ok(Self::parse(s)?.to_ber())
    }

    fn parse_inner(s: &str) -> Result<Filter> {
        match s.as_bytes().first() {
            None => Err(invalid(s, "empty filter component")),
            Some(b'&') => Ok(Filter::And(Self::parse_set(&s[1..])?)),
            Some(b'|') => Ok(Filter::Or(Self::parse_set(&s[1..])?)),
            Some(b'!') => {
                let rest = s[1..].trim();
                let child = if rest.starts_with('(') {
                    let (inner, tail) = take_group(rest)?;
                    if !tail.trim().is_empty() {
                        return Err(invalid(s, "more than one component under NOT"));
                    }
                    Self::parse_inner(inner)?
                } else {
                    Self::parse_inner(rest)?
                };
                Ok(Filter::Not(Box::new(child)))
            }
            Some(_) => Self::parse_item(s),
        }
    }

    fn parse_set(list: &str) -> Result<Vec<Filter>> {
        let mut children = Vec::new();
        let mut rest = list.trim_start();
        while !rest.is_empty() {
            let (inner, tail) = take_group(rest)?;
            children.push(Self::parse_inner(inner)?);
            rest = tail.trim_start();
        }
        if children.is_empty() {
            return Err(invalid(list, "empty filter list"));
        }
        Ok(children)
    }

    // attrDesc op value, dispatched on the byte before the first '='
    fn parse_item(s: &str) -> Result<Filter> {
        let eq = s.find('=').ok_or_else(|| invalid(s, "missing '='"))?;
        let (left, value) = (&s[..eq], &s[eq + 1..]);
        if left.is_empty() {
            return Err(invalid(s, "missing attribute description"));
        }
        let head = &left[..left.len() - 1];
        match left.as_bytes()[left.len() - 1] {
            b'~' => Ok(Filter::ApproxMatch(ava(s, head, value)?)),
            b'>' => Ok(Filter::GreaterOrEqual(ava(s, head, value)?)),
            b'<' => Ok(Filter::LessOrEqual(ava(s, head, value)?)),
            b':' => Self::parse_extensible(s, head, value),
            _ => Self::parse_equality(s, left, value),
        }
    }

    fn parse_equality(s: &str, attr: &str, value: &str) -> Result<Filter> {
        if value == "*" {
            return Ok(Filter::Present(attr.to_string()));
        }
        if !value.contains('*') {
            return Ok(Filter::EqualityMatch(ava(s, attr, value)?));
        }
        // fragments between the stars map to initial/any/final by position
        let parts: Vec<&str> = value.split('*').collect();
        let last = parts.len() - 1;
        let mut substrings = Vec::new();
        for (i, part) in parts.iter().enumerate() {
            if part.is_empty() {
                continue;
            }
            let fragment = unescape_value(part)?;
            substrings.push(if i == 0 {
                Substring::Initial(fragment)
            } else if i == last {
                Substring::Final(fragment)
            } else {
                Substring::Any(fragment)
            });
        }
        if substrings.is_empty() {
            return Ok(Filter::Present(attr.to_string()));
        }
        Ok(Filter::Substrings(SubstringFilter {
            filter_type: attr.to_string(),
            substrings,
        }))
    }

    fn parse_extensible(s: &str, desc: &str, value: &str) -> Result<Filter> {
        let mut desc = desc.to_string();
        let mut dn_attributes = false;
        if let Some(pos) = desc.to_ascii_lowercase().find(":dn") {
            dn_attributes = true;
            desc.replace_range(pos..pos + 3, "");
        }
        let (attr, rule) = match desc.split_once(':') {
            Some((attr, rule)) => (attr.to_string(), rule.to_string()),
            None => (desc, String::new()),
        };
        Ok(Filter::ExtensibleMatch(MatchingRuleAssertion {
            matching_rule: (!rule.is_empty()).then_some(rule),
            rule_type: (!attr.is_empty()).then(|| attr.clone()),
            assertion_value: unescape_value(value).map_err(|_| invalid(s, "bad escape"))?,
            dn_attributes,
        }))
    }

    /// Serialize into the SearchRequest filter slot.
    pub fn to_ber(&self) -> Vec<u8> {
        let mut out = Vec::new();
        self.write(&mut out);
        out
    }

    fn write(&self, out: &mut Vec<u8>) {
        match self {
            Filter::And(children) => write_filter_list(out, 0, children),
            Filter::Or(children) => write_filter_list(out, 1, children),
            Filter::Not(child) => {
                ber::write_constructed(out, ber::context_constructed(2), |inner| {
                    child.write(inner)
                });
            }
            Filter::EqualityMatch(a) => write_assertion(out, 3, a),
            Filter::Substrings(f) => {
                ber::write_constructed(out, ber::context_constructed(4), |inner| {
                    ber::write_str(inner, &f.filter_type);
                    ber::write_sequence(inner, |seq| {
                        for sub in &f.substrings {
                            let (n, fragment) = match sub {
                                Substring::Initial(v) => (0, v),
                                Substring::Any(v) => (1, v),
                                Substring::Final(v) => (2, v),
                            };
                            ber::write_tlv(seq, ber::context(n), fragment);
                        }
                    });
                });
            }
            Filter::GreaterOrEqual(a) => write_assertion(out, 5, a),
            Filter::LessOrEqual(a) => write_assertion(out, 6, a),
            Filter::Present(attr) => ber::write_tlv(out, ber::context(7), attr.as_bytes()),
            Filter::ApproxMatch(a) => write_assertion(out, 8, a),
            Filter::ExtensibleMatch(m) => {
                ber::write_constructed(out, ber::context_constructed(9), |inner| {
                    if let Some(rule) = &m.matching_rule {
                        ber::write_tlv(inner, ber::context(1), rule.as_bytes());
                    }
                    if let Some(attr) = &m.rule_type {
                        ber::write_tlv(inner, ber::context(2), attr.as_bytes());
                    }
                    ber::write_tlv(inner, ber::context(3), &m.assertion_value);
                    ber::write_tlv(
                        inner,
                        ber::context(4),
                        &[if m.dn_attributes { 0xFF } else { 0x00 }],
                    );
                });
            }
        }
    }
}

fn write_filter_list(out: &mut Vec<u8>, tag: u8, children: &[Filter]) {
    ber::write_constructed(out, ber::context_constructed(tag), |inner| {
        for child in children {
            child.write(inner);
        }
    });
}

fn write_assertion(out: &mut Vec<u8>, tag: u8, a: &AttributeValueAssertion) {
    ber::write_constructed(out, ber::context_constructed(tag), |inner| {
        ber::write_str(inner, &a.attribute_desc);
        ber::write_octet_string(inner, &a.assertion_value);
    });
}

fn ava(input: &str, attr: &str, value: &str) -> Result<AttributeValueAssertion> {
    if attr.is_empty() {
        return Err(invalid(input, "missing attribute description"));
    }
    Ok(AttributeValueAssertion {
        attribute_desc: attr.to_string(),
        assertion_value: unescape_value(value).map_err(|_| invalid(input, "bad escape"))?,
    })
}

/// Resolve backslash escapes in an assertion value: `\NN` hex pairs become
/// one byte, a backslash-folded line break disappears, any other escaped
/// byte is taken verbatim.
fn unescape_value(value: &str) -> Result<Vec<u8>> {
    let bytes = value.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] != b'\\' {
            out.push(bytes[i]);
            i += 1;
            continue;
        }
        let hi = bytes.get(i + 1).and_then(|&b| (b as char).to_digit(16));
        let lo = bytes.get(i + 2).and_then(|&b| (b as char).to_digit(16));
        if let (Some(hi), Some(lo)) = (hi, lo) {
            out.push((hi << 4 | lo) as u8);
            i += 3;
            continue;
        }
        match bytes.get(i + 1) {
            Some(&b'\r') => {
                i += 2;
                if bytes.get(i) == Some(&b'\n') {
                    i += 1;
                }
            }
            Some(&b'\n') => i += 2,
            Some(&other) => {
                out.push(other);
                i += 2;
            }
            None => {
                out.push(b'\\');
                i += 1;
            }
        }
    }
    Ok(out)
}

// one balanced (...) group: the inner text and what follows it
fn take_group(s: &str) -> Result<(&str, &str)> {
    let bytes = s.as_bytes();
    if bytes.first() != Some(&b'(') {
        return Err(invalid(s, "expected '('"));
    }
    let mut depth = 0usize;
    for (i, &b) in bytes.iter().enumerate() {
        match b {
            b'(' => depth += 1,
            b')' => {
                depth -= 1;
                if depth == 0 {
                    return Ok((&s[1..i], &s[i + 1..]));
                }
            }
            _ => {}
        }
    }
    Err(invalid(s, "unbalanced parentheses"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use hex_literal::hex;

    #[test]
    fn test_parse_presence() {
        let f = Filter::parse("(objectclass=*)").expect("parsing failed");
        assert_eq!(f, Filter::Present("objectclass".to_string()));
        assert_eq!(f.to_ber(), hex!("87 0b 6f 62 6a 65 63 74 63 6c 61 73 73"));
    }

    #[test]
    fn test_parse_default_filters() {
        assert_eq!(
            Filter::parse("").expect("parsing failed"),
            Filter::Present("objectClass".to_string())
        );
        assert_eq!(
            Filter::parse("*").expect("parsing failed"),
            Filter::Present("objectClass".to_string())
        );
    }

    #[test]
    fn test_compile_empty_is_null() {
        assert_eq!(Filter::compile("").expect("compilation failed"), hex!("05 00"));
    }

    #[test]
    fn test_parse_equality() {
        let f = Filter::parse("(cn=Babs Jensen)").expect("parsing failed");
        assert_eq!(
            f,
            Filter::EqualityMatch(AttributeValueAssertion {
                attribute_desc: "cn".to_string(),
                assertion_value: b"Babs Jensen".to_vec(),
            })
        );
    }

    #[test]
    fn test_parse_without_outer_parentheses() {
        let f = Filter::parse("cn=alice").expect("parsing failed");
        assert_eq!(
            f,
            Filter::EqualityMatch(AttributeValueAssertion {
                attribute_desc: "cn".to_string(),
                assertion_value: b"alice".to_vec(),
            })
        );
    }

    #[test]
    fn test_parse_substrings() {
        let f = Filter::parse("(cn=ab*cd*ef)").expect("parsing failed");
        assert_eq!(
            f,
            Filter::Substrings(SubstringFilter {
                filter_type: "cn".to_string(),
                substrings: vec![
                    Substring::Initial(b"ab".to_vec()),
                    Substring::Any(b"cd".to_vec()),
                    Substring::Final(b"ef".to_vec()),
                ],
            })
        );
        // [CTC 4] { OCTSTR "cn", SEQ { [0] "ab", [1] "cd", [2] "ef" } }
        assert_eq!(
            f.to_ber(),
            hex!("a4 12 04 02 63 6e 30 0c 80 02 61 62 81 02 63 64 82 02 65 66")
        );
    }

    #[test]
    fn test_parse_substrings_leading_trailing_stars() {
        let f = Filter::parse("(cn=*jo*)").expect("parsing failed");
        assert_eq!(
            f,
            Filter::Substrings(SubstringFilter {
                filter_type: "cn".to_string(),
                substrings: vec![Substring::Any(b"jo".to_vec())],
            })
        );
    }

    #[test]
    fn test_parse_not() {
        let f = Filter::parse("(!(cn=x))").expect("parsing failed");
        let encoded = f.to_ber();
        assert_eq!(encoded[0], 0xA2);
        assert_eq!(
            f,
            Filter::Not(Box::new(Filter::EqualityMatch(AttributeValueAssertion {
                attribute_desc: "cn".to_string(),
                assertion_value: b"x".to_vec(),
            })))
        );
    }

    #[test]
    fn test_parse_and_preserves_order() {
        let f = Filter::parse("(&(a=1)(b=2))").expect("parsing failed");
        match &f {
            Filter::And(children) => {
                assert_eq!(children.len(), 2);
                assert_eq!(
                    children[0],
                    Filter::EqualityMatch(AttributeValueAssertion {
                        attribute_desc: "a".to_string(),
                        assertion_value: b"1".to_vec(),
                    })
                );
            }
            other => panic!("unexpected filter {other:?}"),
        }
        // [CTC 0] { [CTC 3] {a,1}, [CTC 3] {b,2} }
        assert_eq!(
            f.to_ber(),
            hex!("a0 10 a3 06 04 01 61 04 01 31 a3 06 04 01 62 04 01 32")
        );
    }

    #[test]
    fn test_parse_or_nested() {
        let f = Filter::parse("(|(cn=jo*)(!(uid=x)))").expect("parsing failed");
        match f {
            Filter::Or(children) => {
                assert!(matches!(children[0], Filter::Substrings(_)));
                assert!(matches!(children[1], Filter::Not(_)));
            }
            other => panic!("unexpected filter {other:?}"),
        }
    }

    #[test]
    fn test_parse_ordering_operators() {
        assert!(matches!(
            Filter::parse("(createTimestamp>=20230101000000Z)").expect("parsing failed"),
            Filter::GreaterOrEqual(_)
        ));
        assert!(matches!(
            Filter::parse("(uidNumber<=4000)").expect("parsing failed"),
            Filter::LessOrEqual(_)
        ));
        assert!(matches!(
            Filter::parse("(cn~=jensen)").expect("parsing failed"),
            Filter::ApproxMatch(_)
        ));
    }

    #[test]
    fn test_parse_extensible_match() {
        let f = Filter::parse("(uid:dn:caseIgnoreMatch:=jo)").expect("parsing failed");
        assert_eq!(
            f,
            Filter::ExtensibleMatch(MatchingRuleAssertion {
                matching_rule: Some("caseIgnoreMatch".to_string()),
                rule_type: Some("uid".to_string()),
                assertion_value: b"jo".to_vec(),
                dn_attributes: true,
            })
        );
        // [1] rule, [2] attr, [3] value, [4] true
        assert_eq!(
            f.to_ber(),
            hex!("a9 1d 81 0f 63 61 73 65 49 67 6e 6f 72 65 4d 61 74 63 68 82 03 75 69 64 83 02 6a 6f 84 01 ff")
        );
    }

    #[test]
    fn test_parse_extensible_without_rule() {
        let f = Filter::parse("(cn:=fred)").expect("parsing failed");
        assert_eq!(
            f,
            Filter::ExtensibleMatch(MatchingRuleAssertion {
                matching_rule: None,
                rule_type: Some("cn".to_string()),
                assertion_value: b"fred".to_vec(),
                dn_attributes: false,
            })
        );
    }

    #[test]
    fn test_hex_triplets() {
        let f = Filter::parse(r"(cn=a\2Ab)").expect("parsing failed");
        assert_eq!(
            f,
            Filter::EqualityMatch(AttributeValueAssertion {
                attribute_desc: "cn".to_string(),
                assertion_value: b"a*b".to_vec(),
            })
        );
    }

    #[test]
    fn test_folded_line_break_is_skipped() {
        let v = unescape_value("ab\\\r\ncd").expect("unescape failed");
        assert_eq!(v, b"abcd");
    }

    #[test]
    fn test_parse_rejects_garbage() {
        Filter::parse("(&(a=1)").expect_err("expected error");
        Filter::parse("(novalue)").expect_err("expected error");
        Filter::parse("(=x)").expect_err("expected error");
        Filter::parse("(!)").expect_err("expected error");
    }
}

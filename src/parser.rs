// DEFINITIONS
// IMPLICIT TAGS
// EXTENSIBILITY IMPLIED

use asn1_rs::nom;
use asn1_rs::{
    Class, Enumerated, FromBer, OptTaggedParser, ParseResult, Sequence, Set, Tag, TaggedParser,
};
use nom::combinator::{complete, map};
use nom::multi::{many0, many1};
use nom::Err;

use crate::error::LdapError;
use crate::ldap::*;
use crate::search::{Attribute, SearchEntry};

/// Holds the result of the response parsing functions
pub(crate) type BerResult<'a, T> = ParseResult<'a, T, LdapError>;

// MessageID ::= INTEGER (0 ..  maxInt)
impl<'a> FromBer<'a, LdapError> for MessageID {
    fn from_ber(bytes: &'a [u8]) -> ParseResult<'a, Self, LdapError> {
        map(u32::from_ber, MessageID)(bytes).map_err(Err::convert)
    }
}

#[inline]
fn parse_ldap_octet_string_as_slice(i: &[u8]) -> BerResult<'_, &[u8]> {
    <&[u8]>::from_ber(i).map_err(Err::convert)
}

// LDAPString ::= OCTET STRING -- UTF-8 encoded
fn parse_ldap_string(i: &[u8]) -> BerResult<'_, String> {
    let (i, b) = parse_ldap_octet_string_as_slice(i)?;
    let s = std::str::from_utf8(b).or(Err(Err::Error(LdapError::InvalidString)))?;
    Ok((i, s.to_string()))
}

#[inline]
fn parse_ldap_enum_as_u32(i: &[u8]) -> BerResult<'_, u32> {
    let (i, obj) = Enumerated::from_ber(i).map_err(Err::convert)?;
    Ok((i, obj.0))
}

// LDAPResult ::= SEQUENCE {
//      resultCode         ENUMERATED,
//      matchedDN          LDAPDN,
//      diagnosticMessage  LDAPString,
//      referral           [3] Referral OPTIONAL }
fn parse_ldap_result_content(i: &[u8]) -> BerResult<'_, LdapResult> {
    let (i, result_code) = map(parse_ldap_enum_as_u32, ResultCode)(i)?;
    let (i, matched_dn) = parse_ldap_string(i)?;
    let (i, diagnostic_message) = parse_ldap_string(i)?;
    let (i, referral) = OptTaggedParser::new(Class::ContextSpecific, Tag(3))
        .parse_ber(i, |_, inner| many1(complete(parse_ldap_string))(inner))?;
    let result = LdapResult {
        result_code,
        matched_dn,
        diagnostic_message,
        referral: referral.unwrap_or_default(),
    };
    Ok((i, result))
}

// BindResponse ::= [APPLICATION 1] SEQUENCE {
//      COMPONENTS OF LDAPResult,
//      serverSaslCreds    [7] OCTET STRING OPTIONAL }
impl<'a> FromBer<'a, LdapError> for BindResponse {
    fn from_ber(bytes: &'a [u8]) -> ParseResult<'a, Self, LdapError> {
        TaggedParser::from_ber_and_then(Class::Application, 1, bytes, |i| {
            let (i, result) = parse_ldap_result_content(i)?;
            let (i, server_sasl_creds) = OptTaggedParser::new(Class::ContextSpecific, Tag(7))
                .parse_ber(i, |_, data| Ok((&b""[..], data.to_vec())))?;
            let resp = BindResponse {
                result,
                server_sasl_creds,
            };
            Ok((i, resp))
        })
    }
}

// PartialAttribute ::= SEQUENCE {
//      type       AttributeDescription,
//      vals       SET OF value AttributeValue }
//
// Values land in the result model directly; wire order is preserved.
fn parse_partial_attribute(bytes: &[u8]) -> BerResult<'_, Attribute> {
    Sequence::from_ber_and_then(bytes, |i| {
        let (i, attr_type) = parse_ldap_string(i)?;
        let (i, values) = Set::from_ber_and_then(i, |inner| {
            many0(complete(parse_ldap_octet_string_as_slice))(inner)
        })?;
        let mut attribute = Attribute::new(&attr_type);
        for value in values {
            attribute.push(value);
        }
        Ok((i, attribute))
    })
}

// SearchResultEntry ::= [APPLICATION 4] SEQUENCE {
//     objectName      LDAPDN,
//     attributes      PartialAttributeList }
impl<'a> FromBer<'a, LdapError> for SearchEntry {
    fn from_ber(bytes: &'a [u8]) -> ParseResult<'a, Self, LdapError> {
        TaggedParser::from_ber_and_then(Class::Application, 4, bytes, |i| {
            let (i, object_name) = parse_ldap_string(i)?;
            let (i, attributes) =
                Sequence::from_ber_and_then(i, many0(complete(parse_partial_attribute)))?;
            let entry = SearchEntry {
                object_name,
                attributes,
            };
            Ok((i, entry))
        })
    }
}

// SearchResultDone ::= [APPLICATION 5] LDAPResult
fn parse_ldap_search_result_done(bytes: &[u8]) -> BerResult<'_, LdapResult> {
    TaggedParser::from_ber_and_then(Class::Application, 5, bytes, parse_ldap_result_content)
}

// ModifyResponse ::= [APPLICATION 7] LDAPResult
fn parse_ldap_modify_response(bytes: &[u8]) -> BerResult<'_, LdapResult> {
    TaggedParser::from_ber_and_then(Class::Application, 7, bytes, parse_ldap_result_content)
}

// AddResponse ::= [APPLICATION 9] LDAPResult
fn parse_ldap_add_response(bytes: &[u8]) -> BerResult<'_, LdapResult> {
    TaggedParser::from_ber_and_then(Class::Application, 9, bytes, parse_ldap_result_content)
}

// DelResponse ::= [APPLICATION 11] LDAPResult
fn parse_ldap_del_response(bytes: &[u8]) -> BerResult<'_, LdapResult> {
    TaggedParser::from_ber_and_then(Class::Application, 11, bytes, parse_ldap_result_content)
}

// ModifyDNResponse ::= [APPLICATION 13] LDAPResult
fn parse_ldap_moddn_response(bytes: &[u8]) -> BerResult<'_, LdapResult> {
    TaggedParser::from_ber_and_then(Class::Application, 13, bytes, parse_ldap_result_content)
}

// CompareResponse ::= [APPLICATION 15] LDAPResult
fn parse_ldap_compare_response(bytes: &[u8]) -> BerResult<'_, LdapResult> {
    TaggedParser::from_ber_and_then(Class::Application, 15, bytes, parse_ldap_result_content)
}

// SearchResultReference ::= [APPLICATION 19] SEQUENCE
//                                   SIZE (1..MAX) OF uri URI
fn parse_ldap_search_result_ref(bytes: &[u8]) -> BerResult<'_, Vec<String>> {
    TaggedParser::from_ber_and_then(
        Class::Application,
        19,
        bytes,
        many1(complete(parse_ldap_string)),
    )
}

// ExtendedResponse ::= [APPLICATION 24] SEQUENCE {
//     COMPONENTS OF LDAPResult,
//     responseName     [10] LDAPOID OPTIONAL,
//     responseValue    [11] OCTET STRING OPTIONAL }
impl<'a> FromBer<'a, LdapError> for ExtendedResponse {
    fn from_ber(bytes: &'a [u8]) -> ParseResult<'a, Self, LdapError> {
        TaggedParser::from_ber_and_then(Class::Application, 24, bytes, |i| {
            let (i, result) = parse_ldap_result_content(i)?;
            let (i, response_name) = OptTaggedParser::new(Class::ContextSpecific, Tag(10))
                .parse_ber(i, |_, data| {
                    let s = std::str::from_utf8(data)
                        .or(Err(Err::Error(LdapError::InvalidString)))?;
                    Ok((&b""[..], s.to_string()))
                })?;
            let (i, response_value) = OptTaggedParser::new(Class::ContextSpecific, Tag(11))
                .parse_ber(i, |_, data| Ok((&b""[..], data.to_vec())))?;
            let resp = ExtendedResponse {
                result,
                response_name,
                response_value,
            };
            Ok((i, resp))
        })
    }
}

// Control ::= SEQUENCE {
//     controlType             LDAPOID,
//     criticality             BOOLEAN DEFAULT FALSE,
//     controlValue            OCTET STRING OPTIONAL }
impl<'a> FromBer<'a, LdapError> for Control {
    fn from_ber(bytes: &'a [u8]) -> ParseResult<'a, Self, LdapError> {
        Sequence::from_ber_and_then(bytes, |i| {
            let (i, control_type) = parse_ldap_string(i)?;
            let (i, maybe_critical) = <Option<bool>>::from_ber(i).map_err(Err::convert)?;
            let criticality = maybe_critical.unwrap_or(false);
            let (i, control_value) = nom::combinator::opt(complete(map(
                parse_ldap_octet_string_as_slice,
                <[u8]>::to_vec,
            )))(i)?;
            let control = Control {
                control_type,
                criticality,
                control_value,
            };
            Ok((i, control))
        })
    }
}

// LDAPMessage ::= SEQUENCE {
//      messageID       MessageID,
//      protocolOp      CHOICE { ... },
//      controls       [0] Controls OPTIONAL }
//
// Only the server-to-client half of the CHOICE is accepted; any other
// protocol op is a decoding error.
impl<'a> FromBer<'a, LdapError> for LdapMessage {
    fn from_ber(bytes: &'a [u8]) -> ParseResult<'a, Self, LdapError> {
        Sequence::from_ber_and_then(bytes, |i| {
            let (i, message_id) = MessageID::from_ber(i)?;
            // read header of next element and look tag value
            let (_, header) = asn1_rs::Header::from_ber(i).map_err(Err::convert)?;
            let (i, protocol_op) = match header.tag().0 {
                1 => map(BindResponse::from_ber, ProtocolOp::BindResponse)(i),
                4 => map(SearchEntry::from_ber, ProtocolOp::SearchResultEntry)(i),
                5 => map(parse_ldap_search_result_done, ProtocolOp::SearchResultDone)(i),
                7 => map(parse_ldap_modify_response, ProtocolOp::ModifyResponse)(i),
                9 => map(parse_ldap_add_response, ProtocolOp::AddResponse)(i),
                11 => map(parse_ldap_del_response, ProtocolOp::DelResponse)(i),
                13 => map(parse_ldap_moddn_response, ProtocolOp::ModDnResponse)(i),
                15 => map(parse_ldap_compare_response, ProtocolOp::CompareResponse)(i),
                19 => map(
                    parse_ldap_search_result_ref,
                    ProtocolOp::SearchResultReference,
                )(i),
                24 => map(ExtendedResponse::from_ber, ProtocolOp::ExtendedResponse)(i),
                _ => Err(Err::Error(LdapError::InvalidMessageType)),
            }?;
            let (i, controls) = OptTaggedParser::new(Class::ContextSpecific, Tag(0))
                .parse_ber(i, |_, i| many0(complete(Control::from_ber))(i))?;
            let msg = LdapMessage {
                message_id,
                protocol_op,
                controls,
            };
            Ok((i, msg))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ber;
    use hex_literal::hex;

    #[test]
    fn test_parse_bind_response_minimal() {
        // 4-byte long-form length on the response envelope
        const DATA: &[u8] = &hex!("61 84 00 00 00 07 0a 01 00 04 00 04 00");
        let (rem, resp) = BindResponse::from_ber(DATA).expect("parsing failed");
        assert!(rem.is_empty());
        assert_eq!(resp.result.result_code, ResultCode::Success);
        assert!(resp.server_sasl_creds.is_none());
    }

    #[test]
    fn test_parse_bind_response_sasl_challenge() {
        let mut data = Vec::new();
        ber::write_constructed(&mut data, ber::APP_BIND_RESPONSE, |inner| {
            ber::write_enumerated(inner, 14); // saslBindInProgress
            ber::write_str(inner, "");
            ber::write_str(inner, "");
            ber::write_tlv(inner, ber::context(7), b"nonce=\"abc\",realm=\"x\"");
        });
        let (rem, resp) = BindResponse::from_ber(&data).expect("parsing failed");
        assert!(rem.is_empty());
        assert_eq!(resp.result.result_code, ResultCode::SaslBindInProgress);
        assert_eq!(
            resp.server_sasl_creds.expect("challenge expected"),
            b"nonce=\"abc\",realm=\"x\"".to_vec()
        );
    }

    #[test]
    fn test_parse_result_with_referral() {
        let mut data = Vec::new();
        ber::write_constructed(&mut data, ber::APP_SEARCH_DONE, |inner| {
            ber::write_enumerated(inner, 10); // referral
            ber::write_str(inner, "");
            ber::write_str(inner, "");
            ber::write_constructed(inner, ber::context_constructed(3), |refs| {
                ber::write_str(refs, "ldap://other.example.com/DC=example,DC=com");
            });
        });
        let (rem, result) = parse_ldap_search_result_done(&data).expect("parsing failed");
        assert!(rem.is_empty());
        assert_eq!(result.result_code, ResultCode::Referral);
        assert_eq!(
            result.referral,
            vec!["ldap://other.example.com/DC=example,DC=com".to_string()]
        );
    }

    #[test]
    fn test_parse_search_result_entry() {
        let mut data = Vec::new();
        ber::write_constructed(&mut data, ber::APP_SEARCH_ENTRY, |inner| {
            ber::write_str(inner, "cn=alice,dc=example,dc=com");
            ber::write_sequence(inner, |attrs| {
                ber::write_sequence(attrs, |attr| {
                    ber::write_str(attr, "objectClass");
                    ber::write_set(attr, |vals| {
                        ber::write_str(vals, "person");
                        ber::write_str(vals, "top");
                    });
                });
                ber::write_sequence(attrs, |attr| {
                    ber::write_str(attr, "sn");
                    ber::write_set(attr, |vals| ber::write_str(vals, "Smith"));
                });
            });
        });
        let (rem, entry) = SearchEntry::from_ber(&data).expect("parsing failed");
        assert!(rem.is_empty());
        assert_eq!(entry.object_name, "cn=alice,dc=example,dc=com");
        assert_eq!(entry.attributes.len(), 2);
        assert_eq!(entry.attributes[0].name(), "objectClass");
        assert_eq!(
            entry.attributes[0].values(),
            &[b"person".to_vec(), b"top".to_vec()]
        );
        assert_eq!(entry.value("sn").expect("value"), b"Smith");
    }

    #[test]
    fn test_parse_extended_response() {
        const DATA: &[u8] = &hex!("78 07 0a 01 00 04 00 04 00");
        let (rem, resp) = ExtendedResponse::from_ber(DATA).expect("parsing failed");
        assert!(rem.is_empty());
        assert_eq!(resp.result.result_code, ResultCode::Success);
        assert!(resp.response_name.is_none());
    }

    #[test]
    fn test_parse_message_with_paged_control() {
        let mut data = Vec::new();
        ber::write_sequence(&mut data, |msg| {
            ber::write_integer(msg, 3);
            ber::write_constructed(msg, ber::APP_SEARCH_DONE, |inner| {
                ber::write_enumerated(inner, 0);
                ber::write_str(inner, "");
                ber::write_str(inner, "");
            });
            ber::write_constructed(msg, ber::CTX_CONTROLS, |controls| {
                ber::write_sequence(controls, |control| {
                    ber::write_str(control, "1.2.840.113556.1.4.319");
                    let mut value = Vec::new();
                    ber::write_sequence(&mut value, |v| {
                        ber::write_integer(v, 0);
                        ber::write_octet_string(v, b"opaque-cookie");
                    });
                    ber::write_octet_string(control, &value);
                });
            });
        });
        let (rem, msg) = LdapMessage::from_ber(&data).expect("parsing failed");
        assert!(rem.is_empty());
        assert_eq!(msg.message_id, MessageID(3));
        assert_eq!(msg.protocol_op.tag(), ProtocolOpTag::SearchResultDone);
        let controls = msg.controls.expect("controls expected");
        assert_eq!(controls.len(), 1);
        assert_eq!(controls[0].control_type, "1.2.840.113556.1.4.319");
        assert!(!controls[0].criticality);
        assert!(controls[0].control_value.is_some());
    }

    #[test]
    fn test_parse_message_rejects_request_op() {
        let mut data = Vec::new();
        ber::write_sequence(&mut data, |msg| {
            ber::write_integer(msg, 1);
            // a BindRequest is not a valid server-to-client op
            ber::write_constructed(msg, ber::APP_BIND_REQUEST, |inner| {
                ber::write_integer(inner, 3);
                ber::write_str(inner, "");
                ber::write_tlv(inner, ber::context(0), b"");
            });
        });
        LdapMessage::from_ber(&data).expect_err("expected error");
    }

    #[test]
    fn test_parse_message_truncated() {
        let mut data = Vec::new();
        ber::write_sequence(&mut data, |msg| {
            ber::write_integer(msg, 2);
            ber::write_constructed(msg, ber::APP_SEARCH_DONE, |inner| {
                ber::write_enumerated(inner, 0);
                ber::write_str(inner, "");
                ber::write_str(inner, "");
            });
        });
        LdapMessage::from_ber(&data[..data.len() - 2]).expect_err("expected error");
        LdapMessage::from_ber(&[0x30]).expect_err("expected error");
    }
}

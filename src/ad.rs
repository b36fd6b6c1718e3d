//! Active Directory helpers
//!
//! Small pieces of Microsoft directory arcana: the canonical-name rendering
//! of a distinguished name, the textual form of a binary security
//! identifier, `objectGUID` decoding, and the GUIDs of the well-known
//! object containers every domain NC carries in its `wellKnownObjects`
//! attribute.

use uuid::Uuid;

use crate::error::{LdapError, Result};

/// Well-known object containers of a domain naming context.
///
/// The discriminant GUIDs are the fixed values Microsoft assigns to the
/// `B:32:<guid>:<dn>` bindings of the `wellKnownObjects` attribute.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum WellKnownObject {
    Computers,
    DeletedObjects,
    DomainControllers,
    ForeignSecurityPrincipals,
    Infrastructure,
    LostAndFound,
    MicrosoftProgramData,
    NtdsQuotas,
    ProgramData,
    Systems,
    Users,
    ManagedServiceAccounts,
}

impl WellKnownObject {
    /// The container GUID as 32 uppercase hex digits, the form used inside
    /// `wellKnownObjects` values.
    pub fn guid(self) -> &'static str {
        match self {
            WellKnownObject::Computers => "AA312825768811D1ADED00C04FD8D5CD",
            WellKnownObject::DeletedObjects => "18E2EA80684F11D2B9AA00C04F79F805",
            WellKnownObject::DomainControllers => "A361B2FFFFD211D1AA4B00C04FD7D83A",
            WellKnownObject::ForeignSecurityPrincipals => "22B70C67D56E4EFB91E9300FCA3DC1AA",
            WellKnownObject::Infrastructure => "2FBAC1870ADE11D297C400C04FD8D5CD",
            WellKnownObject::LostAndFound => "AB8153B7768811D1ADED00C04FD8D5CD",
            WellKnownObject::MicrosoftProgramData => "F4BE92A4C777485E878E9421D53087DB",
            WellKnownObject::NtdsQuotas => "6227F0AF1FC2410D8E3BB10615BB5B0F",
            WellKnownObject::ProgramData => "09460C08AE1E4A4EA0F64AEE7DAA1E5A",
            WellKnownObject::Systems => "AB1D30F3768811D1ADED00C04FD8D5CD",
            WellKnownObject::Users => "A9D1CA15768811D1ADED00C04FD8D5CD",
            WellKnownObject::ManagedServiceAccounts => "1EB93889E40C45DF9F0C64D23BBB6237",
        }
    }
}

/// Convert a distinguished name to its canonical (DNS-style) form.
///
/// `CN=User1,OU=Users,OU=London,DC=xyz,DC=local` becomes
/// `xyz.local/london/users/user1`: `DC` components joined with dots, the
/// remaining components appended `/`-separated in reverse order, all
/// lower-cased.
pub fn dn_to_cn(dn: &str) -> Result<String> {
    let malformed = || LdapError::InvalidDN(dn.to_string());
    if dn.is_empty() {
        return Err(malformed());
    }
    let mut dc = Vec::new();
    let mut path = Vec::new();
    for rdn in dn.split(',') {
        let (kind, value) = rdn.split_once('=').ok_or_else(malformed)?;
        let kind = kind.trim();
        let value = value.trim();
        if kind.is_empty() || value.is_empty() {
            return Err(malformed());
        }
        if kind.eq_ignore_ascii_case("DC") {
            dc.push(value.to_ascii_lowercase());
        } else {
            path.push(value.to_ascii_lowercase());
        }
    }
    if dc.is_empty() {
        return Err(malformed());
    }
    let mut canonical = dc.join(".");
    for component in path.iter().rev() {
        canonical.push('/');
        canonical.push_str(component);
    }
    Ok(canonical)
}

/// Render a binary security identifier as `S-R-A-S1-S2-…` text.
///
/// Layout: revision octet, subauthority count, 48-bit big-endian authority,
/// then `count` little-endian 32-bit subauthorities.
pub fn sid_to_string(sid: &[u8]) -> Option<String> {
    use std::fmt::Write;

    if sid.len() < 8 || sid[0] != 1 {
        return None;
    }
    let count = usize::from(sid[1]);
    if sid.len() != 8 + 4 * count {
        return None;
    }
    let mut authority: u64 = 0;
    for &b in &sid[2..8] {
        authority = (authority << 8) | u64::from(b);
    }
    let mut text = format!("S-{}-{}", sid[0], authority);
    for i in 0..count {
        let chunk: [u8; 4] = sid[8 + 4 * i..8 + 4 * i + 4].try_into().ok()?;
        write!(text, "-{}", u32::from_le_bytes(chunk)).ok();
    }
    Some(text)
}

/// Decode the 16-byte `objectGUID` value (little-endian field order).
pub fn guid_from_bytes(bytes: &[u8]) -> Option<Uuid> {
    let raw: [u8; 16] = bytes.try_into().ok()?;
    Some(Uuid::from_bytes_le(raw))
}

#[cfg(test)]
mod tests {
    use super::*;
    use hex_literal::hex;

    #[test]
    fn test_dn_to_cn() {
        assert_eq!(
            dn_to_cn("CN=User1,OU=Users,OU=London,DC=xyz,DC=local").expect("conversion failed"),
            "xyz.local/london/users/user1"
        );
        assert_eq!(
            dn_to_cn("DC=corp,DC=example,DC=com").expect("conversion failed"),
            "corp.example.com"
        );
    }

    #[test]
    fn test_dn_to_cn_malformed() {
        dn_to_cn("").expect_err("expected error");
        dn_to_cn("CN=NoDomain").expect_err("expected error");
        dn_to_cn("CN=A,garbage,DC=x").expect_err("expected error");
        dn_to_cn("=v,DC=x").expect_err("expected error");
    }

    #[test]
    fn test_sid_to_string() {
        // S-1-5-21-3623811015-3361044348-30300820-1013
        let sid = hex!(
            "01 05 000000000005"
            "15 00 00 00"
            "c7 f7 fe d7"
            "7c 77 55 c8"
            "94 4c ce 01"
            "f5 03 00 00"
        );
        assert_eq!(
            sid_to_string(&sid).expect("rendering failed"),
            "S-1-5-21-3623811015-3361044348-30300820-1013"
        );
    }

    #[test]
    fn test_sid_rejects_bad_layout() {
        assert!(sid_to_string(&[]).is_none());
        assert!(sid_to_string(&hex!("02 01 000000000005 01000000")).is_none());
        // count says two subauthorities, only one present
        assert!(sid_to_string(&hex!("01 02 000000000005 01000000")).is_none());
    }

    #[test]
    fn test_guid_little_endian_fields() {
        let raw = hex!("2528 31aa 8876 d111 aded 00c04fd8d5cd");
        let guid = guid_from_bytes(&raw).expect("decoding failed");
        assert_eq!(
            guid.to_string().to_uppercase().replace('-', ""),
            WellKnownObject::Computers.guid()
        );
        assert!(guid_from_bytes(&raw[..15]).is_none());
    }
}

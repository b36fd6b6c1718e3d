//! Definitions for LDAP types

use rusticata_macros::newtype_enum;

use crate::search::SearchEntry;

/// Application-class tag of a protocol operation (RFC 4511 §4.1.1).
///
/// Only the response half of the CHOICE is listed: this is a client, and
/// the tag of the last decoded response is part of its observable state.
#[derive(Debug, Default, PartialEq, Eq, PartialOrd, Ord, Clone, Copy)]
pub struct ProtocolOpTag(pub u32);

newtype_enum! {
impl display ProtocolOpTag {
    BindResponse = 1,
    SearchResultEntry = 4,
    SearchResultDone = 5,
    ModifyResponse = 7,
    AddResponse = 9,
    DelResponse = 11,
    ModDnResponse = 13,
    CompareResponse = 15,
    SearchResultReference = 19,
    ExtendedResponse = 24,
}
}

#[derive(Default, PartialEq, Eq, PartialOrd, Ord, Clone, Copy)]
pub struct ResultCode(pub u32);

newtype_enum! {
impl debug ResultCode {
    Success = 0,
    OperationsError = 1,
    ProtocolError = 2,
    TimeLimitExceeded = 3,
    SizeLimitExceeded = 4,
    CompareFalse = 5,
    CompareTrue = 6,
    AuthMethodNotSupported = 7,
    StrongerAuthRequired = 8,
    // -- 9 reserved --
    Referral = 10,
    AdminLimitExceeded = 11,
    UnavailableCriticalExtension = 12,
    ConfidentialityRequired = 13,
    SaslBindInProgress = 14,
    NoSuchAttribute = 16,
    UndefinedAttributeType = 17,
    InappropriateMatching = 18,
    ConstraintViolation = 19,
    AttributeOrValueExists = 20,
    InvalidAttributeSyntax = 21,
    // -- 22-31 unused --
    NoSuchObject = 32,
    AliasProblem = 33,
    InvalidDNSyntax = 34,
    IsLeaf = 35,
    AliasDereferencingProblem = 36,
    // -- 37-47 unused --
    InappropriateAuthentication = 48,
    InvalidCredentials = 49,
    InsufficientAccessRights = 50,
    Busy = 51,
    Unavailable = 52,
    UnwillingToPerform = 53,
    LoopDetect = 54,
    // -- 55-59 unused --
    SortControlMissing = 60,
    OffsetRangeError = 61,
    NamingViolation = 64,
    ObjectClassViolation = 65,
    NotAllowedOnNonLeaf = 66,
    NotAllowedOnRDN = 67,
    EntryAlreadyExists = 68,
    ObjectClassModsProhibited = 69,
    ResultsTooLarge = 70,
    AffectsMultipleDSAs = 71,
    // -- 72-75 unused --
    VirtualListViewError = 76,
    Other = 80,
    ServerDown = 81,
    LocalError = 82,
    EncodingError = 83,
    DecodingError = 84,
    Timeout = 85,
    AuthUnknown = 86,
    FilterError = 87,
    UserCanceled = 88,
    ParamError = 89,
    NoMemory = 90,
    ConnectError = 91,
    NotSupported = 92,
    ControlNotFound = 93,
    NoResultsReturned = 94,
    MoreResultsToReturn = 95,
    ClientLoop = 96,
    ReferralLimitExceeded = 97,
    InvalidResponse = 100,
    AmbiguousResponse = 101,
    TlsNotSupported = 112,
    IntermediateResponseCode = 113,
    UnknownType = 114,
    Canceled = 118,
    NoSuchOperation = 119,
    TooLate = 120,
    CannotCancel = 121,
    AssertionFailed = 122,
    AuthorizationDenied = 123,
    ESyncRefreshRequired = 4096,
    NoOperation = 16654,
}
}

impl ResultCode {
    /// Sentinel stored as the last result code when the transport failed
    /// before any server reply could be read.
    pub const TRANSPORT_FAILURE: ResultCode = ResultCode(u32::MAX);

    /// Fixed textual name of the code, substituted when the server sends an
    /// empty diagnostic message.
    pub fn reason(self) -> &'static str {
        match self.0 {
            0 => "success",
            1 => "operationsError",
            2 => "protocolError",
            3 => "timeLimitExceeded",
            4 => "sizeLimitExceeded",
            5 => "compareFalse",
            6 => "compareTrue",
            7 => "authMethodNotSupported",
            8 => "strongerAuthRequired",
            10 => "referral",
            11 => "adminLimitExceeded",
            12 => "unavailableCriticalExtension",
            13 => "confidentialityRequired",
            14 => "saslBindInProgress",
            16 => "noSuchAttribute",
            17 => "undefinedAttributeType",
            18 => "inappropriateMatching",
            19 => "constraintViolation",
            20 => "attributeOrValueExists",
            21 => "invalidAttributeSyntax",
            32 => "noSuchObject",
            33 => "aliasProblem",
            34 => "invalidDNSyntax",
            35 => "isLeaf",
            36 => "aliasDereferencingProblem",
            48 => "inappropriateAuthentication",
            49 => "invalidCredentials",
            50 => "insufficientAccessRights",
            51 => "busy",
            52 => "unavailable",
            53 => "unwillingToPerform",
            54 => "loopDetect",
            60 => "sortControlMissing",
            61 => "offsetRangeError",
            64 => "namingViolation",
            65 => "objectClassViolation",
            66 => "notAllowedOnNonLeaf",
            67 => "notAllowedOnRDN",
            68 => "entryAlreadyExists",
            69 => "objectClassModsProhibited",
            70 => "resultsTooLarge",
            71 => "affectsMultipleDSAs",
            76 => "virtualListViewError",
            80 => "other",
            81 => "serverDown",
            82 => "localError",
            83 => "encodingError",
            84 => "decodingError",
            85 => "timeout",
            86 => "authUnknown",
            87 => "filterError",
            88 => "userCanceled",
            89 => "paramError",
            90 => "noMemory",
            91 => "connectError",
            92 => "notSupported",
            93 => "controlNotFound",
            94 => "noResultsReturned",
            95 => "moreResultsToReturn",
            96 => "clientLoop",
            97 => "referralLimitExceeded",
            100 => "invalidResponse",
            101 => "ambiguousResponse",
            112 => "tlsNotSupported",
            113 => "intermediateResponse",
            114 => "unknownType",
            118 => "canceled",
            119 => "noSuchOperation",
            120 => "tooLate",
            121 => "cannotCancel",
            122 => "assertionFailed",
            123 => "authorizationDenied",
            4096 => "e-syncRefreshRequired",
            16654 => "noOperation",
            u32::MAX => "transportFailure",
            _ => "unknown",
        }
    }

    /// True for `success` (0).
    pub fn is_success(self) -> bool {
        self == ResultCode::Success
    }
}

#[derive(Debug, PartialEq, Eq, PartialOrd, Ord, Clone, Copy)]
pub struct MessageID(pub u32);

#[derive(PartialEq, Eq, Clone, Copy)]
pub struct SearchScope(pub u32);

newtype_enum! {
impl debug SearchScope {
    BaseObject = 0,
    SingleLevel = 1,
    WholeSubtree = 2,
}
}

#[derive(PartialEq, Eq, Clone, Copy)]
pub struct DerefAliases(pub u32);

newtype_enum! {
impl debug DerefAliases {
    NeverDerefAliases = 0,
    DerefInSearching = 1,
    DerefFindingBaseObj = 2,
    DerefAlways = 3,
}
}

/// The `operation` of a ModifyRequest change.
#[derive(PartialEq, Eq, Clone, Copy)]
pub struct ModifyOperation(pub u32);

newtype_enum! {
impl debug ModifyOperation {
    Add = 0,
    Delete = 1,
    Replace = 2,
}
}

/// The common trailer of every response: result code, matched DN,
/// diagnostic message and (with result code `referral`) referral URLs.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct LdapResult {
    pub result_code: ResultCode,
    pub matched_dn: String,
    pub diagnostic_message: String,
    pub referral: Vec<String>,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct BindResponse {
    pub result: LdapResult,
    pub server_sasl_creds: Option<Vec<u8>>,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ExtendedResponse {
    pub result: LdapResult,
    pub response_name: Option<String>,
    pub response_value: Option<Vec<u8>>,
}

/// The responses a client can receive (the server-to-client half of the
/// RFC 4511 protocolOp CHOICE).
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ProtocolOp {
    BindResponse(BindResponse),
    SearchResultEntry(SearchEntry),
    SearchResultDone(LdapResult),
    SearchResultReference(Vec<String>),
    ModifyResponse(LdapResult),
    AddResponse(LdapResult),
    DelResponse(LdapResult),
    ModDnResponse(LdapResult),
    CompareResponse(LdapResult),
    ExtendedResponse(ExtendedResponse),
}

impl ProtocolOp {
    /// Get tag number associated with the operation
    pub fn tag(&self) -> ProtocolOpTag {
        let op = match self {
            ProtocolOp::BindResponse(_) => 1,
            ProtocolOp::SearchResultEntry(_) => 4,
            ProtocolOp::SearchResultDone(_) => 5,
            ProtocolOp::ModifyResponse(_) => 7,
            ProtocolOp::AddResponse(_) => 9,
            ProtocolOp::DelResponse(_) => 11,
            ProtocolOp::ModDnResponse(_) => 13,
            ProtocolOp::CompareResponse(_) => 15,
            ProtocolOp::SearchResultReference(_) => 19,
            ProtocolOp::ExtendedResponse(_) => 24,
        };
        ProtocolOpTag(op)
    }

    /// Get the LDAP result, if present
    pub fn result(&self) -> Option<&LdapResult> {
        match self {
            ProtocolOp::BindResponse(r) => Some(&r.result),
            ProtocolOp::ExtendedResponse(r) => Some(&r.result),
            ProtocolOp::SearchResultDone(r)
            | ProtocolOp::ModifyResponse(r)
            | ProtocolOp::AddResponse(r)
            | ProtocolOp::DelResponse(r)
            | ProtocolOp::ModDnResponse(r)
            | ProtocolOp::CompareResponse(r) => Some(r),
            _ => None,
        }
    }
}

/// A message control (RFC 4511 §4.1.11), e.g. the paged-results control
/// carrying the continuation cookie.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Control {
    pub control_type: String,
    pub criticality: bool,
    pub control_value: Option<Vec<u8>>,
}

/// A decoded LDAP message according to RFC 4511
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct LdapMessage {
    /// Message Identifier (32-bits unsigned integer)
    ///
    /// Matches the identifier of the request it answers; the client rejects
    /// a reply whose identifier differs from the one most recently sent.
    pub message_id: MessageID,
    /// The LDAP operation from this LDAP message
    pub protocol_op: ProtocolOp,
    /// Message controls (optional)
    pub controls: Option<Vec<Control>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_result_code_names() {
        assert_eq!(ResultCode::Success.reason(), "success");
        assert_eq!(ResultCode(32).reason(), "noSuchObject");
        assert_eq!(ResultCode(4096).reason(), "e-syncRefreshRequired");
        assert_eq!(ResultCode(16654).reason(), "noOperation");
        assert_eq!(ResultCode::TRANSPORT_FAILURE.reason(), "transportFailure");
        assert_eq!(ResultCode(9999).reason(), "unknown");
    }

    #[test]
    fn test_protocol_op_result_access() {
        let op = ProtocolOp::AddResponse(LdapResult {
            result_code: ResultCode::EntryAlreadyExists,
            matched_dn: String::new(),
            diagnostic_message: String::new(),
            referral: Vec::new(),
        });
        assert_eq!(op.tag(), ProtocolOpTag::AddResponse);
        let r = op.result().expect("result expected");
        assert_eq!(r.result_code, ResultCode::EntryAlreadyExists);
    }
}

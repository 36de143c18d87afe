//! Message envelope, operation codes and position records

use crate::property::PropertyBag;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Operation codes carried in [`Message::op`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum Op {
    /// Unrecognized or unset operation
    Unknown = 0,
    /// Create an item
    CreateItemReq = 101,
    /// Reply to [`Op::CreateItemReq`]
    CreateItemResp = 102,
    /// Delete an item
    DeleteItemReq = 103,
    /// Reply to [`Op::DeleteItemReq`]
    DeleteItemResp = 104,
    /// Add abilities to an item
    AddAbilityReq = 105,
    /// Reply to [`Op::AddAbilityReq`]
    AddAbilityResp = 106,
    /// Remove abilities from an item
    RemoveAbilityReq = 107,
    /// Reply to [`Op::RemoveAbilityReq`]
    RemoveAbilityResp = 108,
    /// Request item properties
    RequestPropertiesReq = 109,
    /// Reply to [`Op::RequestPropertiesReq`]
    RequestPropertiesResp = 110,
    /// Update item properties
    UpdatePropertiesReq = 111,
    /// Reply to [`Op::UpdatePropertiesReq`]
    UpdatePropertiesResp = 112,
    /// Open a session
    OpenSessionReq = 201,
    /// Reply to [`Op::OpenSessionReq`]
    OpenSessionResp = 202,
    /// Close a session
    CloseSessionReq = 203,
    /// Reply to [`Op::CloseSessionReq`]
    CloseSessionResp = 204,
    /// Ask the peer to connect somewhere else
    MakeConnectionReq = 205,
    /// Reply to [`Op::MakeConnectionReq`]
    MakeConnectionResp = 206,
    /// Liveness probe
    AliveCheckReq = 301,
    /// Reply to [`Op::AliveCheckReq`]
    AliveCheckResp = 302,
}

impl Op {
    /// Every defined operation
    pub const ALL: [Op; 21] = [
        Op::Unknown,
        Op::CreateItemReq,
        Op::CreateItemResp,
        Op::DeleteItemReq,
        Op::DeleteItemResp,
        Op::AddAbilityReq,
        Op::AddAbilityResp,
        Op::RemoveAbilityReq,
        Op::RemoveAbilityResp,
        Op::RequestPropertiesReq,
        Op::RequestPropertiesResp,
        Op::UpdatePropertiesReq,
        Op::UpdatePropertiesResp,
        Op::OpenSessionReq,
        Op::OpenSessionResp,
        Op::CloseSessionReq,
        Op::CloseSessionResp,
        Op::MakeConnectionReq,
        Op::MakeConnectionResp,
        Op::AliveCheckReq,
        Op::AliveCheckResp,
    ];

    /// Numeric wire code
    pub fn code(self) -> u32 {
        self as u32
    }

    /// Look up an operation by wire code
    pub fn from_code(code: u32) -> Option<Self> {
        Self::ALL.iter().copied().find(|op| op.code() == code)
    }

    /// Symbolic name, as used in logs
    pub fn name(self) -> &'static str {
        match self {
            Op::Unknown => "Unknown",
            Op::CreateItemReq => "CreateItemReq",
            Op::CreateItemResp => "CreateItemResp",
            Op::DeleteItemReq => "DeleteItemReq",
            Op::DeleteItemResp => "DeleteItemResp",
            Op::AddAbilityReq => "AddAbilityReq",
            Op::AddAbilityResp => "AddAbilityResp",
            Op::RemoveAbilityReq => "RemoveAbilityReq",
            Op::RemoveAbilityResp => "RemoveAbilityResp",
            Op::RequestPropertiesReq => "RequestPropertiesReq",
            Op::RequestPropertiesResp => "RequestPropertiesResp",
            Op::UpdatePropertiesReq => "UpdatePropertiesReq",
            Op::UpdatePropertiesResp => "UpdatePropertiesResp",
            Op::OpenSessionReq => "OpenSessionReq",
            Op::OpenSessionResp => "OpenSessionResp",
            Op::CloseSessionReq => "CloseSessionReq",
            Op::CloseSessionResp => "CloseSessionResp",
            Op::MakeConnectionReq => "MakeConnectionReq",
            Op::MakeConnectionResp => "MakeConnectionResp",
            Op::AliveCheckReq => "AliveCheckReq",
            Op::AliveCheckResp => "AliveCheckResp",
        }
    }

    /// Look up an operation by symbolic name
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|op| op.name() == name)
    }

    /// The response operation paired with this request.
    ///
    /// Returns [`Op::Unknown`] for anything that is not a request.
    pub fn response(self) -> Op {
        match self {
            Op::CreateItemReq => Op::CreateItemResp,
            Op::DeleteItemReq => Op::DeleteItemResp,
            Op::AddAbilityReq => Op::AddAbilityResp,
            Op::RemoveAbilityReq => Op::RemoveAbilityResp,
            Op::RequestPropertiesReq => Op::RequestPropertiesResp,
            Op::UpdatePropertiesReq => Op::UpdatePropertiesResp,
            Op::OpenSessionReq => Op::OpenSessionResp,
            Op::CloseSessionReq => Op::CloseSessionResp,
            Op::MakeConnectionReq => Op::MakeConnectionResp,
            Op::AliveCheckReq => Op::AliveCheckResp,
            _ => Op::Unknown,
        }
    }

    /// Response code for a raw request code; unmapped codes give 0
    pub fn response_code(request_code: u32) -> u32 {
        Self::from_code(request_code)
            .map(Op::response)
            .unwrap_or(Op::Unknown)
            .code()
    }
}

impl fmt::Display for Op {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl From<Op> for u32 {
    fn from(op: Op) -> Self {
        op.code()
    }
}

/// Coordinate system of a position
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(from = "u32", into = "u32")]
pub enum CoordSystem {
    /// Earth geodetic coordinates
    #[default]
    Wgs86,
    /// Relative to the camera
    Camera,
    /// Absolute camera coordinates
    CameraAbs,
    /// Virtual world coordinates
    Virtual,
    /// Lunar coordinates
    Moon,
    /// Martian coordinates
    Mars,
    /// First relative frame
    Rel1,
    /// Second relative frame
    Rel2,
    /// Third relative frame
    Rel3,
    /// A code with no named variant.
    ///
    /// Codes that have one normalize to it when decoded, so `Other(3)`
    /// reads back as the named variant for code 3.
    Other(u32),
}

impl From<u32> for CoordSystem {
    fn from(code: u32) -> Self {
        match code {
            0 => Self::Wgs86,
            1 => Self::Camera,
            2 => Self::CameraAbs,
            3 => Self::Virtual,
            4 => Self::Moon,
            5 => Self::Mars,
            6 => Self::Rel1,
            7 => Self::Rel2,
            8 => Self::Rel3,
            other => Self::Other(other),
        }
    }
}

impl From<CoordSystem> for u32 {
    fn from(cs: CoordSystem) -> Self {
        match cs {
            CoordSystem::Wgs86 => 0,
            CoordSystem::Camera => 1,
            CoordSystem::CameraAbs => 2,
            CoordSystem::Virtual => 3,
            CoordSystem::Moon => 4,
            CoordSystem::Mars => 5,
            CoordSystem::Rel1 => 6,
            CoordSystem::Rel2 => 7,
            CoordSystem::Rel3 => 8,
            CoordSystem::Other(code) => code,
        }
    }
}

/// Rotation reference frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(from = "u32", into = "u32")]
pub enum RotationSystem {
    /// World frame
    #[default]
    World,
    /// Local frame
    Local,
    /// Forward-relative frame
    Forward,
    /// Camera frame
    Camera,
    /// A code with no named variant.
    ///
    /// Codes that have one normalize to it when decoded, so `Other(3)`
    /// reads back as the named variant for code 3.
    Other(u32),
}

impl From<u32> for RotationSystem {
    fn from(code: u32) -> Self {
        match code {
            0 => Self::World,
            1 => Self::Local,
            2 => Self::Forward,
            3 => Self::Camera,
            other => Self::Other(other),
        }
    }
}

impl From<RotationSystem> for u32 {
    fn from(rs: RotationSystem) -> Self {
        match rs {
            RotationSystem::World => 0,
            RotationSystem::Local => 1,
            RotationSystem::Forward => 2,
            RotationSystem::Camera => 3,
            RotationSystem::Other(code) => code,
        }
    }
}

fn is_default<T: Default + PartialEq>(value: &T) -> bool {
    *value == T::default()
}

/// Position and motion record attached to a message
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct PositionBlock {
    /// Position vector
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pos: Option<Vec<f64>>,
    /// Rotation quaternion
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rot: Option<Vec<f64>>,
    /// Coordinate system of `pos`
    #[serde(skip_serializing_if = "is_default")]
    pub cs: CoordSystem,
    /// Rotation system of `rot`
    #[serde(skip_serializing_if = "is_default")]
    pub rs: RotationSystem,
    /// Velocity vector
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vel: Option<Vec<f64>>,
    /// Path reference
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<Vec<f64>>,
    /// Item the record applies to
    #[serde(skip_serializing_if = "Option::is_none")]
    pub i_id: Option<String>,
    /// Authorization for the update
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auth: Option<String>,
    /// Item authorization
    #[serde(skip_serializing_if = "Option::is_none")]
    pub i_auth: Option<String>,
}

/// An opaque authorization credential.
///
/// The token is never printed in full by `Debug`.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AuthToken(String);

impl AuthToken {
    /// Wrap a credential string
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    /// The credential string
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether `candidate` carries this token
    pub fn matches(&self, candidate: Option<&str>) -> bool {
        candidate == Some(self.0.as_str())
    }
}

impl fmt::Debug for AuthToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("AuthToken(****)")
    }
}

impl From<&str> for AuthToken {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for AuthToken {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// How a message relates to RPC correlation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    /// Carries a response code and completes a pending request
    Response,
    /// Carries a send code and expects a reply
    Request,
    /// Neither; no reply expected
    Notification,
}

const fn default_version() -> u32 {
    1
}

fn is_default_version(v: &u32) -> bool {
    *v == default_version()
}

fn is_zero(v: &u32) -> bool {
    *v == 0
}

fn is_zero_u64(v: &u64) -> bool {
    *v == 0
}

/// The single message envelope exchanged between peers.
///
/// Absent optional fields are omitted from the wire form.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Message {
    /// Operation code; see [`Op`]
    pub op: u32,
    /// Correlation code set by a sender expecting a reply
    #[serde(skip_serializing_if = "Option::is_none")]
    pub s_code: Option<String>,
    /// Correlation code echoed back in a reply
    #[serde(skip_serializing_if = "Option::is_none")]
    pub r_code: Option<String>,
    /// Session identifier
    #[serde(skip_serializing_if = "is_zero")]
    pub s_id: u32,
    /// Protocol version
    #[serde(skip_serializing_if = "is_default_version")]
    pub p_ver: u32,
    /// Milliseconds since the Unix epoch when queued
    #[serde(skip_serializing_if = "is_zero_u64")]
    pub queue_time: u64,
    /// Milliseconds since the Unix epoch when written to the transport
    #[serde(skip_serializing_if = "is_zero_u64")]
    pub send_time: u64,
    /// Transport class hint
    #[serde(skip_serializing_if = "is_zero")]
    pub transport_class: u32,
    /// Key for routing responses
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_key: Option<String>,
    /// Item identifier
    #[serde(skip_serializing_if = "Option::is_none")]
    pub i_id: Option<String>,
    /// Item properties
    #[serde(skip_serializing_if = "PropertyBag::is_empty")]
    pub i_props: PropertyBag,
    /// Authorization for the message
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auth: Option<String>,
    /// Item authorization
    #[serde(skip_serializing_if = "Option::is_none")]
    pub i_auth: Option<String>,
    /// Position records
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub pos: Vec<PositionBlock>,
    /// Error reason carried by a failed response
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exception: Option<String>,
    /// Extra error context
    #[serde(skip_serializing_if = "HashMap::is_empty")]
    pub exception_hints: HashMap<String, String>,
}

impl Default for Message {
    fn default() -> Self {
        Self {
            op: 0,
            s_code: None,
            r_code: None,
            s_id: 0,
            p_ver: default_version(),
            queue_time: 0,
            send_time: 0,
            transport_class: 0,
            response_key: None,
            i_id: None,
            i_props: PropertyBag::new(),
            auth: None,
            i_auth: None,
            pos: Vec::new(),
            exception: None,
            exception_hints: HashMap::new(),
        }
    }
}

impl Message {
    /// Create an empty message for an operation
    pub fn new(op: Op) -> Self {
        Self {
            op: op.code(),
            ..Self::default()
        }
    }

    /// The decoded operation, if known
    pub fn op(&self) -> Option<Op> {
        Op::from_code(self.op)
    }

    /// Symbolic operation name for logging
    pub fn op_name(&self) -> &'static str {
        self.op().map(Op::name).unwrap_or("Unknown")
    }

    /// Classify for correlation. A response code wins over a send code.
    pub fn kind(&self) -> MessageKind {
        if self.r_code.as_deref().is_some_and(|c| !c.is_empty()) {
            MessageKind::Response
        } else if self.s_code.as_deref().is_some_and(|c| !c.is_empty()) {
            MessageKind::Request
        } else {
            MessageKind::Notification
        }
    }

    /// Whether this message answers a pending request
    pub fn is_response(&self) -> bool {
        self.kind() == MessageKind::Response
    }

    /// Whether an exception is set
    pub fn has_exception(&self) -> bool {
        self.exception.as_deref().is_some_and(|e| !e.is_empty())
    }

    /// Set the item identifier
    pub fn with_item(mut self, item_id: impl Into<String>) -> Self {
        self.i_id = Some(item_id.into());
        self
    }

    /// Merge properties into the message, overwriting on collision
    pub fn with_props(mut self, props: &PropertyBag) -> Self {
        self.i_props.merge(props);
        self
    }

    /// Set the authorization
    pub fn with_auth(mut self, auth: Option<&AuthToken>) -> Self {
        self.auth = auth.map(|a| a.as_str().to_owned());
        self
    }

    /// Mark this message as failed
    pub fn with_exception(mut self, reason: impl Into<String>) -> Self {
        self.exception = Some(reason.into());
        self
    }

    /// Add an exception hint
    pub fn with_exception_hint(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.exception_hints.insert(key.into(), value.into());
        self
    }

    /// Build the reply to this request.
    ///
    /// The reply carries the paired response op (or 0 when there is none)
    /// and echoes this message's send code as its response code.
    pub fn make_response(&self) -> Message {
        Message {
            op: Op::response_code(self.op),
            r_code: self.s_code.clone(),
            ..Message::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_op_codes_and_names() {
        for op in Op::ALL {
            assert_eq!(Op::from_code(op.code()), Some(op));
            assert_eq!(Op::from_name(op.name()), Some(op));
        }
        assert_eq!(Op::from_code(9999), None);
        assert_eq!(Op::from_name("NoSuchOp"), None);
        assert_eq!(Op::AliveCheckReq.code(), 301);
    }

    #[test]
    fn test_system_codes_normalize() {
        assert_eq!(u32::from(CoordSystem::Other(3)), 3);
        assert_eq!(CoordSystem::from(3), CoordSystem::Virtual);
        assert_eq!(CoordSystem::from(42), CoordSystem::Other(42));
        assert_eq!(u32::from(CoordSystem::Other(42)), 42);
        assert_eq!(RotationSystem::from(u32::from(RotationSystem::Other(1))), RotationSystem::Local);
        assert_eq!(RotationSystem::from(9), RotationSystem::Other(9));

        let block = PositionBlock {
            cs: CoordSystem::Other(5),
            ..PositionBlock::default()
        };
        let back: PositionBlock = serde_json::from_value(serde_json::to_value(&block).unwrap()).unwrap();
        assert_eq!(back.cs, CoordSystem::Mars);
    }

    #[test]
    fn test_response_pairing() {
        assert_eq!(Op::CreateItemReq.response(), Op::CreateItemResp);
        assert_eq!(Op::MakeConnectionReq.response(), Op::MakeConnectionResp);
        assert_eq!(Op::AliveCheckReq.response(), Op::AliveCheckResp);
        assert_eq!(Op::CreateItemResp.response(), Op::Unknown);
        assert_eq!(Op::response_code(103), 104);
        assert_eq!(Op::response_code(9999), 0);
    }

    #[test]
    fn test_make_response() {
        let mut req = Message::new(Op::CreateItemReq);
        req.s_code = Some("abc".to_string());
        req.i_id = Some("item".to_string());

        let resp = req.make_response();
        assert_eq!(resp.op(), Some(Op::CreateItemResp));
        assert_eq!(resp.r_code.as_deref(), Some("abc"));
        assert_eq!(resp.s_code, None);
        assert_eq!(resp.i_id, None);
        assert_eq!(resp.kind(), MessageKind::Response);
    }

    #[test]
    fn test_make_response_unmapped_op() {
        let req = Message {
            op: 4242,
            s_code: Some("x".to_string()),
            ..Message::default()
        };
        let resp = req.make_response();
        assert_eq!(resp.op, 0);
        assert_eq!(resp.r_code.as_deref(), Some("x"));
    }

    #[test]
    fn test_kind() {
        let mut msg = Message::new(Op::AliveCheckReq);
        assert_eq!(msg.kind(), MessageKind::Notification);
        msg.s_code = Some("s".to_string());
        assert_eq!(msg.kind(), MessageKind::Request);
        msg.r_code = Some("r".to_string());
        assert_eq!(msg.kind(), MessageKind::Response);
        msg.r_code = Some(String::new());
        assert_eq!(msg.kind(), MessageKind::Request);
    }

    #[test]
    fn test_sparse_wire_form() {
        let msg = Message::new(Op::DeleteItemReq).with_item("i1");
        let json = serde_json::to_value(&msg).unwrap();
        let obj = json.as_object().unwrap();
        assert_eq!(obj.len(), 2);
        assert_eq!(obj["op"], 103);
        assert_eq!(obj["iId"], "i1");
    }

    #[test]
    fn test_defaults_on_decode() {
        let msg: Message = serde_json::from_str("{\"op\":301}").unwrap();
        assert_eq!(msg.p_ver, 1);
        assert_eq!(msg.op(), Some(Op::AliveCheckReq));
        assert!(msg.i_props.is_empty());
    }

    #[test]
    fn test_position_block_systems() {
        let block = PositionBlock {
            pos: Some(vec![1.0, 2.0, 3.0]),
            cs: CoordSystem::Mars,
            rs: RotationSystem::Other(17),
            ..PositionBlock::default()
        };
        let json = serde_json::to_value(&block).unwrap();
        assert_eq!(json["cs"], 5);
        assert_eq!(json["rs"], 17);
        let back: PositionBlock = serde_json::from_value(json).unwrap();
        assert_eq!(back, block);
    }

    #[test]
    fn test_auth_token_redacted() {
        let token = AuthToken::new("secret");
        assert!(!format!("{:?}", token).contains("secret"));
        assert!(token.matches(Some("secret")));
        assert!(!token.matches(Some("other")));
        assert!(!token.matches(None));
    }
}

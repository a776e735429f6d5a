//! Opaque node references.
//!
//! A global id is standard base64 over `"<Kind>:<rowid>"`, for example
//! `UHJvamVjdDo0Mg==` for `Project:42`.

use std::fmt;
use std::str::FromStr;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use common::model::ProjectKey;
use strum::{AsRefStr, Display, EnumString};

/// Entity kinds that can be addressed by a global id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, AsRefStr)]
pub enum NodeKind {
    Project,
    ProjectSession,
    Trace,
    Span,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GlobalIdError {
    #[error("global id is not valid base64")]
    NotBase64,

    #[error("global id does not decode to UTF-8 text")]
    NotUtf8,

    #[error("global id '{0}' has no type separator")]
    MissingSeparator(String),

    #[error("unknown node type '{0}'")]
    UnknownKind(String),

    #[error("node id '{0}' is not an integer")]
    InvalidRowId(String),

    #[error("the node id must correspond to a node of type {expected}, found {found}")]
    KindMismatch { expected: NodeKind, found: NodeKind },
}

/// A decoded global id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GlobalId {
    kind: NodeKind,
    rowid: i64,
}

impl GlobalId {
    pub fn new(kind: NodeKind, rowid: i64) -> Self {
        Self { kind, rowid }
    }

    pub fn project(key: ProjectKey) -> Self {
        Self::new(NodeKind::Project, key.0)
    }

    pub fn kind(&self) -> NodeKind {
        self.kind
    }

    pub fn rowid(&self) -> i64 {
        self.rowid
    }

    /// Encode into the opaque form handed to callers.
    pub fn encode(&self) -> String {
        STANDARD.encode(format!("{}:{}", self.kind, self.rowid))
    }

    /// Decode an opaque reference without checking its kind.
    pub fn decode(opaque: &str) -> Result<Self, GlobalIdError> {
        let bytes = STANDARD
            .decode(opaque)
            .map_err(|_| GlobalIdError::NotBase64)?;
        let text = String::from_utf8(bytes).map_err(|_| GlobalIdError::NotUtf8)?;

        let (kind, rowid) = text
            .split_once(':')
            .ok_or_else(|| GlobalIdError::MissingSeparator(text.clone()))?;

        let kind =
            NodeKind::from_str(kind).map_err(|_| GlobalIdError::UnknownKind(kind.to_string()))?;
        let rowid = rowid
            .parse::<i64>()
            .map_err(|_| GlobalIdError::InvalidRowId(rowid.to_string()))?;

        Ok(Self { kind, rowid })
    }

    /// Require the id to address `expected`.
    pub fn expect_kind(self, expected: NodeKind) -> Result<i64, GlobalIdError> {
        if self.kind == expected {
            Ok(self.rowid)
        } else {
            Err(GlobalIdError::KindMismatch {
                expected,
                found: self.kind,
            })
        }
    }
}

impl fmt::Display for GlobalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.encode())
    }
}

impl FromStr for GlobalId {
    type Err = GlobalIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::decode(s)
    }
}

/// Resolve an opaque reference that must address `expected`.
pub fn resolve(opaque: &str, expected: NodeKind) -> Result<i64, GlobalIdError> {
    GlobalId::decode(opaque)?.expect_kind(expected)
}

/// Resolve an opaque reference to a project key.
pub fn resolve_project(opaque: &str) -> Result<ProjectKey, GlobalIdError> {
    resolve(opaque, NodeKind::Project).map(ProjectKey)
}

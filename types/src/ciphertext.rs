//! Ciphertext type tags.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::TypeError;

/// Width/class of an encrypted value.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
#[repr(u8)]
pub enum CiphertextType {
    Bool = 0,
    Uint4 = 1,
    Uint8 = 2,
    Uint16 = 3,
    Uint32 = 4,
    Uint64 = 5,
    Uint128 = 6,
    Uint160 = 7,
    Uint256 = 8,
    Ebytes64 = 9,
    Ebytes128 = 10,
    Ebytes256 = 11,
    /// Sentinel for raw user-supplied bytes.
    UserBytes = 255,
}

impl CiphertextType {
    pub fn code(self) -> u8 {
        self as u8
    }

    pub fn from_code(code: u8) -> Option<Self> {
        use CiphertextType::*;
        Some(match code {
            0 => Bool,
            1 => Uint4,
            2 => Uint8,
            3 => Uint16,
            4 => Uint32,
            5 => Uint64,
            6 => Uint128,
            7 => Uint160,
            8 => Uint256,
            9 => Ebytes64,
            10 => Ebytes128,
            11 => Ebytes256,
            255 => UserBytes,
            _ => return None,
        })
    }

    /// Whether a computation may produce this type (everything but the
    /// user-bytes sentinel).
    pub fn is_computable(self) -> bool {
        self != CiphertextType::UserBytes
    }
}

impl TryFrom<u8> for CiphertextType {
    type Error = TypeError;

    fn try_from(code: u8) -> Result<Self, Self::Error> {
        Self::from_code(code).ok_or(TypeError::UnknownCiphertextType(code))
    }
}

impl From<CiphertextType> for u8 {
    fn from(t: CiphertextType) -> Self {
        t.code()
    }
}

impl fmt::Display for CiphertextType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CiphertextType::Bool => "fheBool",
            CiphertextType::Uint4 => "fheUint4",
            CiphertextType::Uint8 => "fheUint8",
            CiphertextType::Uint16 => "fheUint16",
            CiphertextType::Uint32 => "fheUint32",
            CiphertextType::Uint64 => "fheUint64",
            CiphertextType::Uint128 => "fheUint128",
            CiphertextType::Uint160 => "fheUint160",
            CiphertextType::Uint256 => "fheUint256",
            CiphertextType::Ebytes64 => "fheEbytes64",
            CiphertextType::Ebytes128 => "fheEbytes128",
            CiphertextType::Ebytes256 => "fheEbytes256",
            CiphertextType::UserBytes => "fheUserBytes",
        };
        f.write_str(name)
    }
}

//! FHE operation codes and their operand shapes.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::TypeError;

/// An FHE operation intercepted from contract execution.
///
/// The discriminants are the wire/storage operation codes. Code 22 is
/// reserved and unused.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
#[repr(u8)]
pub enum FheOperation {
    Add = 0,
    Sub = 1,
    Mul = 2,
    Div = 3,
    Rem = 4,
    BitAnd = 5,
    BitOr = 6,
    BitXor = 7,
    Shl = 8,
    Shr = 9,
    Rotl = 10,
    Rotr = 11,
    Eq = 12,
    Ne = 13,
    Ge = 14,
    Gt = 15,
    Le = 16,
    Lt = 17,
    Min = 18,
    Max = 19,
    Neg = 20,
    Not = 21,
    Cast = 23,
    TrivialEncrypt = 24,
    IfThenElse = 25,
    Rand = 26,
    RandBounded = 27,
}

/// How an operation's inputs are laid out.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum OperationShape {
    /// `[ciphertext, ciphertext | scalar]`
    Binary,
    /// `[ciphertext]`
    Unary,
    /// `[ciphertext, scalar(type)]`
    Cast,
    /// `[scalar(value), scalar(type)]`
    TrivialEncrypt,
    /// `[ciphertext(condition), ciphertext, ciphertext]`
    IfThenElse,
    /// `[scalar(seed), scalar(type)]`
    Rand,
    /// `[scalar(seed), scalar(upper bound), scalar(type)]`
    RandBounded,
}

impl OperationShape {
    pub fn operand_count(self) -> usize {
        match self {
            OperationShape::Unary => 1,
            OperationShape::Binary
            | OperationShape::Cast
            | OperationShape::TrivialEncrypt
            | OperationShape::Rand => 2,
            OperationShape::IfThenElse | OperationShape::RandBounded => 3,
        }
    }
}

impl FheOperation {
    /// Every declared operation, in code order.
    pub const ALL: [FheOperation; 27] = [
        FheOperation::Add,
        FheOperation::Sub,
        FheOperation::Mul,
        FheOperation::Div,
        FheOperation::Rem,
        FheOperation::BitAnd,
        FheOperation::BitOr,
        FheOperation::BitXor,
        FheOperation::Shl,
        FheOperation::Shr,
        FheOperation::Rotl,
        FheOperation::Rotr,
        FheOperation::Eq,
        FheOperation::Ne,
        FheOperation::Ge,
        FheOperation::Gt,
        FheOperation::Le,
        FheOperation::Lt,
        FheOperation::Min,
        FheOperation::Max,
        FheOperation::Neg,
        FheOperation::Not,
        FheOperation::Cast,
        FheOperation::TrivialEncrypt,
        FheOperation::IfThenElse,
        FheOperation::Rand,
        FheOperation::RandBounded,
    ];

    pub fn code(self) -> u8 {
        self as u8
    }

    pub fn from_code(code: u8) -> Option<Self> {
        Self::ALL.iter().copied().find(|op| op.code() == code)
    }

    pub fn shape(self) -> OperationShape {
        use FheOperation::*;
        match self {
            Add | Sub | Mul | Div | Rem | BitAnd | BitOr | BitXor | Shl | Shr | Rotl | Rotr
            | Eq | Ne | Ge | Gt | Le | Lt | Min | Max => OperationShape::Binary,
            Neg | Not => OperationShape::Unary,
            Cast => OperationShape::Cast,
            TrivialEncrypt => OperationShape::TrivialEncrypt,
            IfThenElse => OperationShape::IfThenElse,
            Rand => OperationShape::Rand,
            RandBounded => OperationShape::RandBounded,
        }
    }

    /// Solidity-style name of the library method that issues this operation.
    pub fn method_name(self) -> &'static str {
        use FheOperation::*;
        match self {
            Add => "fheAdd",
            Sub => "fheSub",
            Mul => "fheMul",
            Div => "fheDiv",
            Rem => "fheRem",
            BitAnd => "fheBitAnd",
            BitOr => "fheBitOr",
            BitXor => "fheBitXor",
            Shl => "fheShl",
            Shr => "fheShr",
            Rotl => "fheRotl",
            Rotr => "fheRotr",
            Eq => "fheEq",
            Ne => "fheNe",
            Ge => "fheGe",
            Gt => "fheGt",
            Le => "fheLe",
            Lt => "fheLt",
            Min => "fheMin",
            Max => "fheMax",
            Neg => "fheNeg",
            Not => "fheNot",
            Cast => "cast",
            TrivialEncrypt => "trivialEncrypt",
            IfThenElse => "fheIfThenElse",
            Rand => "fheRand",
            RandBounded => "fheRandBounded",
        }
    }

    /// ABI signature whose keccak-256 prefix is this operation's call selector.
    pub fn abi_signature(self) -> String {
        let args = match self.shape() {
            OperationShape::Binary => "uint256,uint256,bytes1",
            OperationShape::Unary => "uint256",
            OperationShape::Cast | OperationShape::TrivialEncrypt => "uint256,bytes1",
            OperationShape::IfThenElse => "uint256,uint256,uint256",
            OperationShape::Rand => "bytes1",
            OperationShape::RandBounded => "uint256,bytes1",
        };
        format!("{}({})", self.method_name(), args)
    }
}

impl TryFrom<u8> for FheOperation {
    type Error = TypeError;

    fn try_from(code: u8) -> Result<Self, Self::Error> {
        Self::from_code(code).ok_or(TypeError::UnknownOperation(code))
    }
}

impl From<FheOperation> for u8 {
    fn from(op: FheOperation) -> Self {
        op.code()
    }
}

impl fmt::Display for FheOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.method_name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_code_round_trips() {
        for op in FheOperation::ALL {
            assert_eq!(FheOperation::try_from(op.code()), Ok(op));
        }
    }

    #[test]
    fn reserved_code_is_unknown() {
        assert_eq!(FheOperation::try_from(22), Err(TypeError::UnknownOperation(22)));
        assert_eq!(FheOperation::try_from(28), Err(TypeError::UnknownOperation(28)));
    }

    #[test]
    fn signatures_are_distinct() {
        let mut sigs: Vec<String> = FheOperation::ALL.iter().map(|op| op.abi_signature()).collect();
        sigs.sort();
        sigs.dedup();
        assert_eq!(sigs.len(), FheOperation::ALL.len());
    }

    #[test]
    fn shapes() {
        assert_eq!(FheOperation::Add.shape(), OperationShape::Binary);
        assert_eq!(FheOperation::Not.shape(), OperationShape::Unary);
        assert_eq!(FheOperation::IfThenElse.shape().operand_count(), 3);
        assert_eq!(FheOperation::Rand.shape().operand_count(), 2);
        assert_eq!(
            FheOperation::Add.abi_signature(),
            "fheAdd(uint256,uint256,bytes1)"
        );
    }

    #[test]
    fn serializes_as_code() {
        let json = serde_json::to_string(&FheOperation::IfThenElse).unwrap();
        assert_eq!(json, "25");
        let back: FheOperation = serde_json::from_str("3").unwrap();
        assert_eq!(back, FheOperation::Div);
    }
}

//! Call-data decoding: 4-byte selector → operation → [`Computation`].
//!
//! Selectors are the first four bytes of `keccak256(signature)` for each
//! operation's ABI signature (see [`FheOperation::abi_signature`]). The
//! registry is built once and covers every declared operation.
//!
//! Argument layout after the selector, in 32-byte ABI words:
//!
//! | shape          | words                                   |
//! |----------------|-----------------------------------------|
//! | binary         | lhs handle, rhs handle/scalar, flags    |
//! | unary          | operand handle                          |
//! | cast           | operand handle, target type             |
//! | trivialEncrypt | plaintext value, target type            |
//! | ifThenElse     | condition, if-true, if-false handles    |
//! | rand           | target type                             |
//! | randBounded    | upper bound, target type                |
//!
//! `bytes1` arguments occupy the first byte of their word. Bit 0 of the
//! binary flags byte marks the right-hand side as a plaintext scalar.

use sha3::{Digest, Keccak256};
use std::collections::HashMap;
use std::sync::OnceLock;

use veil_types::{
    CiphertextType, Computation, ExtraData, FheOperation, Handle, Operand, OperationShape,
};

use crate::CoprocError;

const WORD: usize = 32;

/// First four bytes of `keccak256(signature)`, big-endian.
pub fn selector(signature: &str) -> u32 {
    let digest = Keccak256::digest(signature.as_bytes());
    u32::from_be_bytes([digest[0], digest[1], digest[2], digest[3]])
}

fn registry() -> &'static HashMap<u32, FheOperation> {
    static REGISTRY: OnceLock<HashMap<u32, FheOperation>> = OnceLock::new();
    REGISTRY.get_or_init(|| {
        FheOperation::ALL
            .iter()
            .map(|op| (selector(&op.abi_signature()), *op))
            .collect()
    })
}

/// Operation registered for `selector`, if any.
pub fn lookup(selector: u32) -> Option<FheOperation> {
    registry().get(&selector).copied()
}

/// Decode one intercepted call.
///
/// `output` is the caller's output buffer; its first 32 bytes name the
/// result handle.
pub fn decode_call(
    input: &[u8],
    extra: &ExtraData,
    output: &[u8],
) -> Result<Computation, CoprocError> {
    if input.len() < 4 {
        return Err(CoprocError::InputTooShort(input.len()));
    }
    let selector = u32::from_be_bytes([input[0], input[1], input[2], input[3]]);
    let operation = lookup(selector).ok_or(CoprocError::UnknownSelector(selector))?;

    if output.len() < WORD {
        return Err(CoprocError::OutputTooShort(output.len()));
    }
    let mut handle = [0u8; WORD];
    handle.copy_from_slice(&output[..WORD]);

    let operands = decode_operands(operation, &input[4..], extra)?;
    Ok(Computation::new(operation, Handle::new(handle), operands))
}

fn decode_operands(
    operation: FheOperation,
    args: &[u8],
    extra: &ExtraData,
) -> Result<Vec<Operand>, CoprocError> {
    let args = Args { operation, data: args };
    let seed = || Operand::scalar(extra.fhe_rand_seed.to_vec());

    let operands = match operation.shape() {
        OperationShape::Binary => {
            let lhs = args.ciphertext(0)?;
            let scalar = args.byte(2)? & 1 == 1;
            let rhs = if scalar {
                Operand::scalar(args.word(1)?.to_vec())
            } else {
                args.ciphertext(1)?
            };
            vec![lhs, rhs]
        }
        OperationShape::Unary => vec![args.ciphertext(0)?],
        OperationShape::Cast => vec![args.ciphertext(0)?, args.type_tag(1)?],
        OperationShape::TrivialEncrypt => {
            vec![Operand::scalar(args.word(0)?.to_vec()), args.type_tag(1)?]
        }
        OperationShape::IfThenElse => vec![
            args.ciphertext(0)?,
            args.ciphertext(1)?,
            args.ciphertext(2)?,
        ],
        OperationShape::Rand => vec![seed(), args.type_tag(0)?],
        OperationShape::RandBounded => vec![
            seed(),
            Operand::scalar(args.word(0)?.to_vec()),
            args.type_tag(1)?,
        ],
    };
    Ok(operands)
}

struct Args<'a> {
    operation: FheOperation,
    data: &'a [u8],
}

impl<'a> Args<'a> {
    fn word(&self, index: usize) -> Result<&'a [u8], CoprocError> {
        let start = index * WORD;
        self.data.get(start..start + WORD).ok_or_else(|| {
            CoprocError::MalformedCallData(format!(
                "{} expects word {index}, got {} bytes",
                self.operation,
                self.data.len()
            ))
        })
    }

    /// The leading byte of word `index`; the rest of the word may be absent.
    fn byte(&self, index: usize) -> Result<u8, CoprocError> {
        self.data.get(index * WORD).copied().ok_or_else(|| {
            CoprocError::MalformedCallData(format!(
                "{} expects bytes1 at word {index}, got {} bytes",
                self.operation,
                self.data.len()
            ))
        })
    }

    fn ciphertext(&self, index: usize) -> Result<Operand, CoprocError> {
        let mut bytes = [0u8; WORD];
        bytes.copy_from_slice(self.word(index)?);
        let handle = Handle::new(bytes);
        check_type(bytes[Handle::TYPE_BYTE])?;
        Ok(Operand::ciphertext(handle))
    }

    fn type_tag(&self, index: usize) -> Result<Operand, CoprocError> {
        let tag = self.byte(index)?;
        check_type(tag)?;
        Ok(Operand::scalar(vec![tag]))
    }
}

fn check_type(tag: u8) -> Result<CiphertextType, CoprocError> {
    CiphertextType::from_code(tag)
        .filter(|t| t.is_computable())
        .ok_or(CoprocError::InvalidCiphertextType(tag))
}

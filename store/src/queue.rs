//! Per-block late-commit queue.
//!
//! Computations whose results are due at a later block are persisted in the
//! coprocessor's storage contract so any node replaying the chain sees the
//! same pending work. Each block `B` owns:
//!
//! - a count slot addressed directly by `B` (big-endian word)
//! - four consecutive words per entry starting at `keccak("main" ‖ B) + 4i`:
//!   metadata, output handle, first operand, second operand
//! - eight overflow words per entry at `keccak("bigscalar" ‖ B) + 8i`,
//!   holding either a third operand or a scalar wider than one word
//!
//! Metadata word layout (byte offsets):
//!
//! | byte   | meaning                                       |
//! |--------|-----------------------------------------------|
//! | 0      | operation code                                |
//! | 1      | 1 if any operand is a scalar                  |
//! | 2      | 1 if a scalar lives in the overflow region     |
//! | 3      | operand count (0 on entries without it)       |
//! | 4      | bitmap of scalar operand positions            |
//! | 5..11  | byte length of each scalar, big-endian u16    |
//!
//! Entries written without an operand count decode by operation shape:
//! binary operations read two operands with a full-word scalar second operand
//! when byte 1 is set, unary operations read one ciphertext.

use veil_types::{
    Address, BlockNumber, Computation, FheOperation, Handle, Operand, OperationShape, Word,
};

use crate::slot::{namespace_base, offset};
use crate::{ChainStorage, StoreError};

const ENTRY_NAMESPACE: &[u8] = b"main";
const OVERFLOW_NAMESPACE: &[u8] = b"bigscalar";

pub const WORDS_PER_ENTRY: u64 = 4;
pub const OVERFLOW_WORDS: u64 = 8;
pub const MAX_OPERANDS: usize = 3;
/// Widest scalar the overflow region holds.
pub const MAX_SCALAR_LEN: usize = (OVERFLOW_WORDS as usize) * 32;

/// Slot holding the number of queued entries for `block`.
pub fn count_slot(block: BlockNumber) -> Word {
    Word::from_u64(block)
}

/// Slot addresses of queue entry `index` in `block`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct EntryLayout {
    pub metadata: Word,
    pub output_handle: Word,
    pub first_operand: Word,
    pub second_operand: Word,
    overflow_base: Word,
}

impl EntryLayout {
    pub fn new(block: BlockNumber, index: u64) -> Self {
        let base = offset(&namespace_base(ENTRY_NAMESPACE, block), index * WORDS_PER_ENTRY);
        Self {
            metadata: base,
            output_handle: offset(&base, 1),
            first_operand: offset(&base, 2),
            second_operand: offset(&base, 3),
            overflow_base: offset(
                &namespace_base(OVERFLOW_NAMESPACE, block),
                index * OVERFLOW_WORDS,
            ),
        }
    }

    /// Overflow word `i` (0..8) of this entry.
    pub fn overflow(&self, i: u64) -> Word {
        debug_assert!(i < OVERFLOW_WORDS);
        offset(&self.overflow_base, i)
    }

    /// Word holding operand `position` when it fits in one word.
    fn operand(&self, position: usize) -> Word {
        match position {
            0 => self.first_operand,
            1 => self.second_operand,
            _ => self.overflow(0),
        }
    }
}

/// Decoded metadata word of a queue entry.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct EntryMetadata {
    pub operation_code: u8,
    pub has_scalar: bool,
    pub has_big_scalar: bool,
    pub operand_count: u8,
    pub scalar_mask: u8,
    pub scalar_lens: [u16; MAX_OPERANDS],
}

impl EntryMetadata {
    /// Metadata for `computation`, rejecting anything the entry layout
    /// cannot represent.
    pub fn for_computation(computation: &Computation) -> Result<Self, StoreError> {
        let count = computation.operands.len();
        if count > MAX_OPERANDS {
            return Err(StoreError::TooManyOperands(count));
        }

        let mut meta = EntryMetadata {
            operation_code: computation.operation.code(),
            operand_count: count as u8,
            ..Default::default()
        };

        let mut big_scalars = 0;
        for (position, operand) in computation.operands.iter().enumerate() {
            if let Operand::Scalar(bytes) = operand {
                if bytes.len() > MAX_SCALAR_LEN {
                    return Err(StoreError::ScalarTooWide(bytes.len()));
                }
                meta.has_scalar = true;
                meta.scalar_mask |= 1 << position;
                meta.scalar_lens[position] = bytes.len() as u16;
                if bytes.len() > 32 {
                    big_scalars += 1;
                }
            }
        }

        // The overflow region is shared by a third operand and a wide scalar.
        if big_scalars > 1 || (big_scalars == 1 && count == MAX_OPERANDS) {
            return Err(StoreError::OverflowConflict);
        }
        meta.has_big_scalar = big_scalars == 1;
        Ok(meta)
    }

    pub fn to_word(&self) -> Word {
        let mut bytes = [0u8; 32];
        bytes[0] = self.operation_code;
        bytes[1] = self.has_scalar as u8;
        bytes[2] = self.has_big_scalar as u8;
        bytes[3] = self.operand_count;
        bytes[4] = self.scalar_mask;
        for (i, len) in self.scalar_lens.iter().enumerate() {
            bytes[5 + 2 * i..7 + 2 * i].copy_from_slice(&len.to_be_bytes());
        }
        Word::new(bytes)
    }

    pub fn from_word(word: &Word) -> Self {
        let bytes = word.as_bytes();
        let mut scalar_lens = [0u16; MAX_OPERANDS];
        for (i, len) in scalar_lens.iter_mut().enumerate() {
            *len = u16::from_be_bytes([bytes[5 + 2 * i], bytes[6 + 2 * i]]);
        }
        Self {
            operation_code: bytes[0],
            has_scalar: bytes[1] != 0,
            has_big_scalar: bytes[2] != 0,
            operand_count: bytes[3],
            scalar_mask: bytes[4],
            scalar_lens,
        }
    }

    pub fn uses_overflow(&self) -> bool {
        self.has_big_scalar || self.operand_count as usize > 2
    }

    fn is_scalar(&self, position: usize) -> bool {
        self.scalar_mask & (1 << position) != 0
    }
}

/// Number of entries queued for `block`.
pub fn entry_count<S: ChainStorage + ?Sized>(
    storage: &S,
    contract: &Address,
    block: BlockNumber,
) -> u64 {
    storage.get_state(contract, &count_slot(block)).low_u64()
}

/// Write `computation` as entry `index` of `block`. Does not touch the count.
pub fn write_entry<S: ChainStorage + ?Sized>(
    storage: &mut S,
    contract: &Address,
    block: BlockNumber,
    index: u64,
    computation: &Computation,
) -> Result<(), StoreError> {
    let meta = EntryMetadata::for_computation(computation)?;
    write_with_metadata(storage, contract, block, index, computation, &meta);
    Ok(())
}

fn write_with_metadata<S: ChainStorage + ?Sized>(
    storage: &mut S,
    contract: &Address,
    block: BlockNumber,
    index: u64,
    computation: &Computation,
    meta: &EntryMetadata,
) {
    let layout = EntryLayout::new(block, index);
    storage.set_state(contract, &layout.metadata, meta.to_word());
    storage.set_state(
        contract,
        &layout.output_handle,
        computation.output_handle.as_word(),
    );

    for (position, operand) in computation.operands.iter().enumerate() {
        match operand {
            Operand::Ciphertext { handle, .. } => {
                storage.set_state(contract, &layout.operand(position), handle.as_word());
            }
            Operand::Scalar(bytes) if bytes.len() <= 32 => {
                storage.set_state(
                    contract,
                    &layout.operand(position),
                    Word::right_aligned(bytes),
                );
            }
            Operand::Scalar(bytes) => {
                storage.set_state(contract, &layout.operand(position), Word::ZERO);
                for (i, chunk) in bytes.chunks(32).enumerate() {
                    storage.set_state(
                        contract,
                        &layout.overflow(i as u64),
                        Word::right_aligned(chunk),
                    );
                }
            }
        }
    }
}

/// Decode entry `index` of `block`. The returned computation carries
/// `target_block = block` and unhydrated handle operands.
pub fn read_entry<S: ChainStorage + ?Sized>(
    storage: &S,
    contract: &Address,
    block: BlockNumber,
    index: u64,
) -> Result<Computation, StoreError> {
    let layout = EntryLayout::new(block, index);
    let meta = EntryMetadata::from_word(&storage.get_state(contract, &layout.metadata));
    let operation = FheOperation::from_code(meta.operation_code)
        .ok_or(StoreError::UnknownOperation(meta.operation_code))?;
    let output_handle = Handle::from(storage.get_state(contract, &layout.output_handle));

    let operands = if meta.operand_count == 0 {
        read_shaped_operands(storage, contract, block, index, operation, &meta, &layout)?
    } else {
        read_counted_operands(storage, contract, block, index, &meta, &layout)?
    };

    let mut computation = Computation::new(operation, output_handle, operands);
    computation.target_block = block;
    Ok(computation)
}

fn read_counted_operands<S: ChainStorage + ?Sized>(
    storage: &S,
    contract: &Address,
    block: BlockNumber,
    index: u64,
    meta: &EntryMetadata,
    layout: &EntryLayout,
) -> Result<Vec<Operand>, StoreError> {
    let count = meta.operand_count as usize;
    if count > MAX_OPERANDS {
        return Err(StoreError::UndecodableEntry {
            block,
            index,
            reason: format!("operand count {count}"),
        });
    }

    let mut operands = Vec::with_capacity(count);
    for position in 0..count {
        if !meta.is_scalar(position) {
            let word = storage.get_state(contract, &layout.operand(position));
            operands.push(Operand::ciphertext(Handle::from(word)));
            continue;
        }

        let len = meta.scalar_lens[position] as usize;
        if len <= 32 {
            let word = storage.get_state(contract, &layout.operand(position));
            operands.push(Operand::scalar(&word.as_bytes()[32 - len..]));
        } else if len <= MAX_SCALAR_LEN {
            let mut bytes = Vec::with_capacity(len);
            for (i, chunk_start) in (0..len).step_by(32).enumerate() {
                let word = storage.get_state(contract, &layout.overflow(i as u64));
                let take = (len - chunk_start).min(32);
                bytes.extend_from_slice(&word.as_bytes()[32 - take..]);
            }
            operands.push(Operand::Scalar(bytes));
        } else {
            return Err(StoreError::UndecodableEntry {
                block,
                index,
                reason: format!("scalar length {len}"),
            });
        }
    }
    Ok(operands)
}

fn read_shaped_operands<S: ChainStorage + ?Sized>(
    storage: &S,
    contract: &Address,
    block: BlockNumber,
    index: u64,
    operation: FheOperation,
    meta: &EntryMetadata,
    layout: &EntryLayout,
) -> Result<Vec<Operand>, StoreError> {
    let first = storage.get_state(contract, &layout.first_operand);
    match operation.shape() {
        OperationShape::Unary => Ok(vec![Operand::ciphertext(Handle::from(first))]),
        OperationShape::Binary if !meta.has_big_scalar => {
            let second = storage.get_state(contract, &layout.second_operand);
            let second = if meta.has_scalar {
                Operand::scalar(second.as_bytes().to_vec())
            } else {
                Operand::ciphertext(Handle::from(second))
            };
            Ok(vec![Operand::ciphertext(Handle::from(first)), second])
        }
        _ => Err(StoreError::UndecodableEntry {
            block,
            index,
            reason: format!("no operand count recorded for {operation}"),
        }),
    }
}

/// Append `computations` after the entries already queued for `block` and
/// bump the count. Every computation is validated before anything is
/// written. Returns the index of the first appended entry.
pub fn append_entries<'a, S, I>(
    storage: &mut S,
    contract: &Address,
    block: BlockNumber,
    computations: I,
) -> Result<u64, StoreError>
where
    S: ChainStorage + ?Sized,
    I: IntoIterator<Item = &'a Computation>,
{
    let encoded = computations
        .into_iter()
        .map(|c| EntryMetadata::for_computation(c).map(|meta| (c, meta)))
        .collect::<Result<Vec<_>, _>>()?;

    let start = entry_count(storage, contract, block);
    for (i, (computation, meta)) in encoded.iter().enumerate() {
        write_with_metadata(storage, contract, block, start + i as u64, computation, meta);
    }
    storage.set_state(
        contract,
        &count_slot(block),
        Word::from_u64(start + encoded.len() as u64),
    );
    Ok(start)
}

/// Decode every entry queued for `block`, in queue order.
pub fn read_block<S: ChainStorage + ?Sized>(
    storage: &S,
    contract: &Address,
    block: BlockNumber,
) -> Result<Vec<Computation>, StoreError> {
    (0..entry_count(storage, contract, block))
        .map(|index| read_entry(storage, contract, block, index))
        .collect()
}

/// Zero every entry of `block` and its count. Returns how many entries
/// were cleared.
pub fn clear_block<S: ChainStorage + ?Sized>(
    storage: &mut S,
    contract: &Address,
    block: BlockNumber,
) -> u64 {
    let count = entry_count(storage, contract, block);
    for index in 0..count {
        let layout = EntryLayout::new(block, index);
        let meta = EntryMetadata::from_word(&storage.get_state(contract, &layout.metadata));
        for slot in [
            layout.metadata,
            layout.output_handle,
            layout.first_operand,
            layout.second_operand,
        ] {
            storage.set_state(contract, &slot, Word::ZERO);
        }
        if meta.uses_overflow() {
            for i in 0..OVERFLOW_WORDS {
                storage.set_state(contract, &layout.overflow(i), Word::ZERO);
            }
        }
    }
    if count > 0 {
        storage.set_state(contract, &count_slot(block), Word::ZERO);
    }
    count
}

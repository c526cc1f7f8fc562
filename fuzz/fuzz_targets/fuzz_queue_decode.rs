#![no_main]

use libfuzzer_sys::fuzz_target;

use veil_nullables::NullChainStorage;
use veil_store::queue::{count_slot, EntryLayout, OVERFLOW_WORDS};
use veil_store::{read_block, ChainStorage};
use veil_types::{Address, Word};

const BLOCK: u64 = 7;

// Fill the queue slots of one block with arbitrary words and decode it.
// Corrupt entries must surface as errors, never panics.
fuzz_target!(|data: &[u8]| {
    let Some((&count, rest)) = data.split_first() else {
        return;
    };
    let contract = Address::from_low_u64(0x70);
    let mut storage = NullChainStorage::new();
    let count = u64::from(count % 4);
    storage.set_state(&contract, &count_slot(BLOCK), Word::from_u64(count));

    let mut words = rest.chunks_exact(32).map(|chunk| {
        let mut bytes = [0u8; 32];
        bytes.copy_from_slice(chunk);
        Word::new(bytes)
    });
    for index in 0..count {
        let layout = EntryLayout::new(BLOCK, index);
        let mut slots = vec![
            layout.metadata,
            layout.output_handle,
            layout.first_operand,
            layout.second_operand,
        ];
        slots.extend((0..OVERFLOW_WORDS).map(|i| layout.overflow(i)));
        for slot in slots {
            match words.next() {
                Some(word) => storage.set_state(&contract, &slot, word),
                None => break,
            }
        }
    }

    if let Ok(computations) = read_block(&storage, &contract, BLOCK) {
        assert_eq!(computations.len() as u64, count);
    }
});

#![no_main]

use libfuzzer_sys::fuzz_target;

use veil_node::dispatch::decode_call;
use veil_types::ExtraData;

// Decode arbitrary call data against an arbitrary output buffer.
// Decoding must reject malformed input with an error, never panic.
fuzz_target!(|data: &[u8]| {
    if data.is_empty() {
        return;
    }
    let split = usize::from(data[0]) % data.len();
    let (input, output) = data[1..].split_at(split.min(data.len() - 1));

    let mut extra = ExtraData::default();
    extra.fhe_rand_seed[0] = data[0];

    if let Ok(computation) = decode_call(input, &extra, output) {
        assert_eq!(
            computation.operands.len(),
            computation.operation.shape().operand_count()
        );
        assert_eq!(computation.output_handle.as_bytes()[..], output[..32]);
    }
});

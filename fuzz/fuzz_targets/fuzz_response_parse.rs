#![no_main]

use libfuzzer_sys::fuzz_target;

use veil_executor::SyncComputeResponse;

// Parse arbitrary bytes as a compute service response.
fuzz_target!(|data: &[u8]| {
    if let Ok(response) = serde_json::from_slice::<SyncComputeResponse>(data) {
        let _ = response.into_results();
    }
});

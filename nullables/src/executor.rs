//! Nullable compute service: records batches and answers deterministically.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use veil_executor::{
    ComputeBackend, CompressedCiphertext, ExecutorError, ResultCiphertexts, SyncComputeError,
    SyncComputeRequest, SyncComputeResponse,
};
use veil_types::Handle;

/// A scripted answer for one future call.
#[derive(Debug)]
enum Reply {
    Transport,
    Remote(SyncComputeError),
    Custom(SyncComputeResponse),
}

/// A compute service double.
///
/// By default every result handle in a batch is answered with
/// [`NullExecutor::ciphertext_for`]. Failures and custom responses can be
/// scripted per call; an optional delay simulates a slow service.
#[derive(Default)]
pub struct NullExecutor {
    requests: Mutex<Vec<SyncComputeRequest>>,
    script: Mutex<VecDeque<Reply>>,
    delay: Mutex<Option<Duration>>,
}

impl NullExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// The deterministic "ciphertext" this executor returns for `handle`.
    pub fn ciphertext_for(handle: &Handle) -> Vec<u8> {
        let mut bytes = b"ct:".to_vec();
        bytes.extend_from_slice(handle.as_bytes());
        bytes
    }

    /// Fail the next call with a transport error.
    pub fn fail_next_transport(&self) {
        self.push(Reply::Transport);
    }

    /// Answer the next call with a service error code.
    pub fn fail_next_remote(&self, code: SyncComputeError) {
        self.push(Reply::Remote(code));
    }

    /// Answer the next call with `response` verbatim.
    pub fn reply_next(&self, response: SyncComputeResponse) {
        self.push(Reply::Custom(response));
    }

    /// Sleep this long before answering every call.
    pub fn set_delay(&self, delay: Option<Duration>) {
        *self.delay.lock().unwrap() = delay;
    }

    /// Every request received so far, in order (including failed ones).
    pub fn requests(&self) -> Vec<SyncComputeRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    fn push(&self, reply: Reply) {
        self.script.lock().unwrap().push_back(reply);
    }

    fn echo(request: &SyncComputeRequest) -> SyncComputeResponse {
        let ciphertexts = request
            .computations
            .iter()
            .flat_map(|c| c.result_handles.iter())
            .map(|handle| CompressedCiphertext {
                handle: *handle,
                serialization: Self::ciphertext_for(handle),
            })
            .collect();
        SyncComputeResponse::ResultCiphertexts(ResultCiphertexts { ciphertexts })
    }
}

#[async_trait]
impl ComputeBackend for NullExecutor {
    async fn sync_compute(
        &self,
        request: SyncComputeRequest,
    ) -> Result<SyncComputeResponse, ExecutorError> {
        let delay = *self.delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        self.requests.lock().unwrap().push(request.clone());
        let reply = self.script.lock().unwrap().pop_front();
        match reply {
            None => Ok(Self::echo(&request)),
            Some(Reply::Transport) => Err(ExecutorError::Transport(
                "null executor: scripted transport failure".to_string(),
            )),
            Some(Reply::Remote(code)) => Ok(SyncComputeResponse::Error(code)),
            Some(Reply::Custom(response)) => Ok(response),
        }
    }
}

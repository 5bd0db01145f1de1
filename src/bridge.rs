//! Run async work from synchronous code.
//!
//! [`block_on`] drives a future to completion on a dedicated thread with its
//! own `current_thread` runtime, so it is safe to call even from a thread
//! that is already inside a tokio runtime (where `Runtime::block_on` would
//! panic). The caller blocks until the result is ready.

use std::future::Future;

#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    #[error("failed to build bridge runtime: {0}")]
    Runtime(#[from] std::io::Error),
    #[error("bridged task panicked")]
    Panicked,
}

pub fn block_on<F>(future: F) -> Result<F::Output, BridgeError>
where
    F: Future + Send,
    F::Output: Send,
{
    std::thread::scope(|scope| {
        scope
            .spawn(move || -> Result<F::Output, BridgeError> {
                let runtime = tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()?;
                Ok(runtime.block_on(future))
            })
            .join()
            .map_err(|_| BridgeError::Panicked)?
    })
}

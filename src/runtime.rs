use crate::Result;

#[cfg(feature = "rt-tokio")]
use crate::Error;

use std::future::Future;
use std::time::Duration;

/// Resolves after `duration` on the selected runtime's timer.
pub(crate) async fn sleep(duration: Duration) {
    #[cfg(feature = "rt-async-io")]
    async_io::Timer::after(duration).await;

    #[cfg(feature = "rt-tokio")]
    tokio::time::sleep(duration).await;
}

/// Drive `future` to completion on the calling thread.
pub(crate) fn block_on<T>(future: impl Future<Output = T>) -> Result<T> {
    #[cfg(feature = "rt-async-io")]
    {
        Ok(async_io::block_on(future))
    }

    #[cfg(feature = "rt-tokio")]
    {
        tokio_block_on(future)
    }
}

#[cfg(feature = "rt-tokio")]
fn tokio_block_on<T>(future: impl Future<Output = T>) -> Result<T> {
    use tokio::runtime::{Handle, RuntimeFlavor};

    match Handle::try_current() {
        // block_in_place needs a worker thread to hand the rest of the runtime to.
        Ok(handle) if handle.runtime_flavor() == RuntimeFlavor::CurrentThread => {
            Err(Error::invalid_input(
                "scope placement needs a multi-thread tokio runtime or no runtime at all",
            ))
        }
        Ok(handle) => Ok(tokio::task::block_in_place(|| handle.block_on(future))),
        Err(_) => Ok(shared_runtime()?.block_on(future)),
    }
}

/// Runtime for callers outside tokio. zbus keeps its socket reader on it between calls.
#[cfg(feature = "rt-tokio")]
fn shared_runtime() -> Result<&'static tokio::runtime::Runtime> {
    static RT: std::sync::OnceLock<std::io::Result<tokio::runtime::Runtime>> =
        std::sync::OnceLock::new();

    RT.get_or_init(|| {
        tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .enable_all()
            .build()
    })
    .as_ref()
    .map_err(|e| Error::Bus {
        context: format!("failed to start tokio runtime: {e}"),
    })
}

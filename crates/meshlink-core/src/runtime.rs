//! Bridge from the synchronous engine to the async platform clients.

use std::future::Future;
use std::sync::OnceLock;

use anyhow::{anyhow, Result};
use tokio::runtime::{Builder, Runtime};

static RUNTIME: OnceLock<std::result::Result<Runtime, String>> = OnceLock::new();

fn runtime() -> Result<&'static Runtime> {
    RUNTIME
        .get_or_init(|| {
            Builder::new_multi_thread()
                .worker_threads(1)
                .thread_name("meshlink-io")
                .enable_all()
                .build()
                .map_err(|e| e.to_string())
        })
        .as_ref()
        .map_err(|e| anyhow!("platform runtime unavailable: {e}"))
}

/// Runs one platform request to completion.
///
/// Every D-Bus and netlink request goes through the same runtime; requests
/// never overlap since the engine issues them one at a time.
pub fn block_on<T, E>(request: impl Future<Output = std::result::Result<T, E>>) -> Result<T>
where
    E: Into<anyhow::Error>,
{
    runtime()?.block_on(request).map_err(Into::into)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_block_on_returns_request_output() {
        let value = block_on(async { Ok::<_, anyhow::Error>(7) }).unwrap();
        assert_eq!(value, 7);
    }

    #[test]
    fn test_block_on_converts_platform_errors() {
        let err = block_on(async {
            Err::<(), _>(meshlink_platform::PlatformError::InterfaceNotFound {
                name: "wlan9".to_string(),
            })
        })
        .unwrap_err();
        assert!(err.to_string().contains("wlan9"));
    }
}

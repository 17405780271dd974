use std::future::Future;

use anyhow::{Context, Result};
use log::info;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// A background loop with its own cancellation token and a join point.
pub struct Supervised {
    name: &'static str,
    cancel_token: CancellationToken,
    handle: Option<JoinHandle<()>>,
}

impl Supervised {
    pub fn spawn<F, Fut>(name: &'static str, task: F) -> Self
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let cancel_token = CancellationToken::new();
        let handle = tokio::spawn(task(cancel_token.clone()));
        info!("{name} started");
        Self {
            name,
            cancel_token,
            handle: Some(handle),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Cancel and wait for the loop to finish its own cleanup.
    pub async fn stop(mut self) -> Result<()> {
        self.cancel_token.cancel();
        if let Some(handle) = self.handle.take() {
            handle
                .await
                .with_context(|| format!("{} task failed to join", self.name))?;
        }
        info!("{} stopped", self.name);
        Ok(())
    }
}

impl Drop for Supervised {
    fn drop(&mut self) {
        self.cancel_token.cancel();
    }
}

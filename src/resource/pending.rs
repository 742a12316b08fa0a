use super::status::FetchError;
use std::future::{Future, IntoFuture};
use std::pin::Pin;
use tokio::sync::watch;

/// How one fetch generation ended.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Settled {
    Success,
    Failed(FetchError),
    /// Superseded by a newer generation; its result was dropped.
    Cancelled,
}

/// Completion handle of a fetch generation.
///
/// Awaiting it never starts work. It resolves to `Err` only when the
/// generation's fetcher failed; a generation that was superseded resolves to
/// `Ok(())`. Clones observe the same generation.
#[derive(Clone, Debug)]
pub struct Pending {
    rx: Option<watch::Receiver<Option<Settled>>>,
}

impl Pending {
    pub(crate) fn channel() -> (watch::Sender<Option<Settled>>, Self) {
        let (tx, rx) = watch::channel(None);
        (tx, Self { rx: Some(rx) })
    }

    /// A handle that is already settled.
    pub fn settled() -> Self {
        Self { rx: None }
    }

    pub fn is_settled(&self) -> bool {
        self.rx.as_ref().is_none_or(|rx| rx.borrow().is_some())
    }

    pub async fn wait(self) -> Result<(), FetchError> {
        let Some(mut rx) = self.rx else {
            return Ok(());
        };
        let settled = match rx.wait_for(Option::is_some).await {
            Ok(settled) => settled.clone(),
            Err(_) => return Err(FetchError::new("fetch task ended before settling")),
        };
        match settled {
            Some(Settled::Failed(err)) => Err(err),
            _ => Ok(()),
        }
    }
}

impl IntoFuture for Pending {
    type Output = Result<(), FetchError>;
    type IntoFuture = Pin<Box<dyn Future<Output = Self::Output> + Send>>;

    fn into_future(self) -> Self::IntoFuture {
        Box::pin(self.wait())
    }
}

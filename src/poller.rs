//! Background refresh poller.
//!
//! Refreshes the whole session every `refresh_interval_secs`, or right away
//! when woken through [`Session::wake_refresh`]. Without an interval, or
//! with an interval of 0, it only runs when woken.

use std::sync::Arc;
use std::time::Duration;

use crate::cascade::RefreshSummary;
use crate::session::Session;

pub async fn run_refresh_poller<F>(session: Arc<Session>, mut on_refresh: F)
where
    F: FnMut(&Session, &RefreshSummary),
{
    loop {
        match session.config().refresh_interval_secs.filter(|&secs| secs > 0) {
            Some(secs) => {
                tokio::select! {
                    _ = tokio::time::sleep(Duration::from_secs(secs)) => {},
                    _ = session.refresh_wake.notified() => {
                        log::info!("Refresh poller: woken by manual refresh signal");
                    },
                }
            }
            None => {
                session.refresh_wake.notified().await;
                log::info!("Refresh poller: woken by manual refresh signal");
            }
        }

        let summary = session.refresh().await;
        if summary.failures > 0 {
            log::warn!("Refresh poller: {} fetches failed", summary.failures);
        }
        on_refresh(&session, &summary);
    }
}

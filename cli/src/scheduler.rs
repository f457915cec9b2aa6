use std::sync::Arc;

use chrono::Utc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info};

use mealbot_core::cache::MealCache;
use mealbot_core::schedule::{MidnightSchedule, delay_until};
use mealbot_core::source::MealSource;

/// Refresh `cache` from `source` at every local midnight until `shutdown`
/// flips. A failed refresh is logged and the old menu stays in place.
pub fn spawn_midnight_refresh<S>(
    cache: Arc<MealCache>,
    source: Arc<S>,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()>
where
    S: MealSource + 'static,
{
    let schedule = MidnightSchedule::new(cache.timezone());

    tokio::spawn(async move {
        loop {
            let now = Utc::now();
            let next = schedule.next_fire_after(now);
            info!(next_refresh = %next.with_timezone(schedule.timezone()), "Scheduled meal cache refresh");

            tokio::select! {
                _ = shutdown.changed() => break,
                () = tokio::time::sleep(delay_until(next, now)) => {}
            }

            if let Err(e) = cache.refresh(source.as_ref()).await {
                error!(error = %format!("{e:#}"), "Scheduled meal cache refresh failed");
            }
        }
        info!("Midnight refresh stopped");
    })
}

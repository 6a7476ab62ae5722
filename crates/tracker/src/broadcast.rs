use parking_lot::Mutex;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{broadcast, watch};
use tokio::time::interval;
use tracing::info;

use crate::stats::{wall_clock_ms, StatsRegister, StatsView};

/// How long a computed stats view stays fresh. Bursts of readers within
/// this window share one snapshot.
const VIEW_CACHE_TTL: Duration = Duration::from_millis(500);
const PUSH_INTERVAL: Duration = Duration::from_secs(1);
const CHANNEL_CAPACITY: usize = 16;

/// Push channel for live stats. Subscribers receive a cached view on a
/// fixed cadence; slow subscribers lag rather than block.
pub struct StatsBroadcast {
    stats: Arc<StatsRegister>,
    sender: broadcast::Sender<StatsView>,
    cache: Mutex<Option<(Instant, StatsView)>>,
}

impl StatsBroadcast {
    pub fn new(stats: Arc<StatsRegister>) -> Arc<Self> {
        let (sender, _) = broadcast::channel(CHANNEL_CAPACITY);
        Arc::new(Self {
            stats,
            sender,
            cache: Mutex::new(None),
        })
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StatsView> {
        self.sender.subscribe()
    }

    /// The current stats view, cached for up to 500 ms.
    pub fn get_stats(&self) -> StatsView {
        let mut cache = self.cache.lock();
        if let Some((at, view)) = cache.as_ref() {
            if at.elapsed() < VIEW_CACHE_TTL {
                return view.clone();
            }
        }
        let view = self.stats.view(wall_clock_ms());
        *cache = Some((Instant::now(), view.clone()));
        view
    }

    pub async fn run(self: Arc<Self>, mut stop: watch::Receiver<bool>) {
        let mut ticker = interval(PUSH_INTERVAL);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    // Send errors just mean nobody is listening right now.
                    let _ = self.sender.send(self.get_stats());
                }
                _ = stop.changed() => {
                    info!("Stats broadcast stopped");
                    return;
                }
            }
        }
    }
}

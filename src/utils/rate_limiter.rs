/// Request pacing for the market-data provider
use tokio::sync::Mutex;
use tokio::time::{sleep, Duration, Instant};

/// Spaces requests evenly so that all callers together stay under a
/// requests-per-second budget. Shared by every token's client.
pub struct RequestPacer {
    spacing: Option<Duration>,
    next_slot: Mutex<Instant>,
}

impl RequestPacer {
    /// `0` disables pacing
    pub fn new(requests_per_second: u32) -> Self {
        let spacing = if requests_per_second == 0 {
            None
        } else {
            Some(Duration::from_secs_f64(1.0 / requests_per_second as f64))
        };

        RequestPacer {
            spacing,
            next_slot: Mutex::new(Instant::now()),
        }
    }

    pub fn unlimited() -> Self {
        Self::new(0)
    }

    /// Wait for the next free request slot
    pub async fn acquire(&self) {
        let Some(spacing) = self.spacing else {
            return;
        };

        let wait = {
            let mut next = self.next_slot.lock().await;
            let now = Instant::now();
            let slot = (*next).max(now);
            *next = slot + spacing;
            slot - now
        };

        if !wait.is_zero() {
            sleep(wait).await;
        }
    }
}

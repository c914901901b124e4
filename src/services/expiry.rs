use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::db::Db;
use crate::services::bookings;

/// Deferred cancellation of bookings that were never confirmed.
pub trait ExpiryScheduler: Send + Sync {
    /// Registers (or moves) the expiry of a booking. Deadlines in the past fire at once.
    fn schedule_expiry(&self, booking_id: &str, at: DateTime<Utc>);
    fn cancel_expiry(&self, booking_id: &str);
}

#[derive(Debug)]
enum Command {
    Schedule { booking_id: String, deadline: Instant },
    Cancel { booking_id: String },
}

/// In-process timer queue. Deadlines live in a min-heap owned by one tokio task; a
/// cancelled or moved deadline stays in the heap and is skipped when it comes up.
#[derive(Clone)]
pub struct TimerQueue {
    tx: mpsc::UnboundedSender<Command>,
}

impl TimerQueue {
    pub fn spawn(db: Db) -> (Self, JoinHandle<()>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = tokio::spawn(run_timer_loop(db, rx));
        (Self { tx }, handle)
    }

    fn send(&self, command: Command) {
        if let Err(e) = self.tx.send(command) {
            warn!(command = ?e.0, "expiry timer loop is gone");
        }
    }
}

impl ExpiryScheduler for TimerQueue {
    fn schedule_expiry(&self, booking_id: &str, at: DateTime<Utc>) {
        let delay = (at - Utc::now()).to_std().unwrap_or(Duration::ZERO);
        debug!(booking_id, delay_secs = delay.as_secs(), "scheduling expiry");
        self.send(Command::Schedule {
            booking_id: booking_id.to_string(),
            deadline: Instant::now() + delay,
        });
    }

    fn cancel_expiry(&self, booking_id: &str) {
        self.send(Command::Cancel {
            booking_id: booking_id.to_string(),
        });
    }
}

async fn run_timer_loop(db: Db, mut rx: mpsc::UnboundedReceiver<Command>) {
    let mut heap: BinaryHeap<Reverse<(Instant, String)>> = BinaryHeap::new();
    let mut deadlines: HashMap<String, Instant> = HashMap::new();

    loop {
        let next = heap.peek().map(|Reverse((at, _))| *at);

        tokio::select! {
            command = rx.recv() => match command {
                Some(Command::Schedule { booking_id, deadline }) => {
                    deadlines.insert(booking_id.clone(), deadline);
                    heap.push(Reverse((deadline, booking_id)));
                }
                Some(Command::Cancel { booking_id }) => {
                    deadlines.remove(&booking_id);
                }
                None => {
                    debug!("expiry scheduler shutting down");
                    break;
                }
            },
            _ = sleep_until(next) => {
                let now = Instant::now();
                while let Some(Reverse((at, _))) = heap.peek() {
                    if *at > now {
                        break;
                    }
                    let Some(Reverse((at, booking_id))) = heap.pop() else {
                        break;
                    };
                    // Only the latest deadline registered for a booking counts.
                    if deadlines.get(&booking_id) == Some(&at) {
                        deadlines.remove(&booking_id);
                        fire(&db, &booking_id);
                    }
                }
            }
        }
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}

fn fire(db: &Db, booking_id: &str) {
    match bookings::expire_booking(db, booking_id, Utc::now()) {
        Ok(true) => info!(booking_id, "expired unconfirmed booking"),
        Ok(false) => debug!(booking_id, "expiry skipped, booking no longer pending"),
        Err(e) => warn!(booking_id, error = %e, "failed to expire booking"),
    }
}

use murmur_api::{MessageId, UserId};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, sleep, Instant, MissedTickBehavior};

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TimerEvent {
    TypingExpired {
        peer: UserId,
        epoch: u64,
        generation: u64,
    },
    PresenceTick {
        peer: UserId,
        epoch: u64,
    },
    EchoGrace {
        peer: UserId,
        epoch: u64,
        provisional: MessageId,
    },
    Heartbeat,
}

/// Handle to a pending timer. Dropping it cancels the timer.
#[derive(Debug)]
pub struct ScheduledTask {
    handle: JoinHandle<()>,
}

impl Drop for ScheduledTask {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// Posts timer events back into the owning session loop.
#[derive(Clone)]
pub struct Scheduler {
    tx: mpsc::UnboundedSender<TimerEvent>,
}

impl Scheduler {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<TimerEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    pub fn after(&self, delay: Duration, event: TimerEvent) -> ScheduledTask {
        let tx = self.tx.clone();
        let handle = tokio::spawn(async move {
            sleep(delay).await;
            let _ = tx.send(event);
        });
        ScheduledTask { handle }
    }

    /// First tick fires one `period` from now.
    pub fn every(&self, period: Duration, event: TimerEvent) -> ScheduledTask {
        let tx = self.tx.clone();
        let handle = tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                if tx.send(event.clone()).is_err() {
                    break;
                }
            }
        });
        ScheduledTask { handle }
    }
}

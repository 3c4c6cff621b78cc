use crate::actor::ActorRef;
use std::{
    fmt::Debug,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};
use tokio::{
    task::JoinHandle,
    time::{MissedTickBehavior, interval},
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

/// Set while a tick sits in the mailbox; the actor releases it on handling.
#[derive(Debug, Clone, Default)]
pub struct TickLatch(Arc<AtomicBool>);

impl TickLatch {
    fn arm(&self) -> bool {
        !self.0.swap(true, Ordering::AcqRel)
    }

    pub fn release(&self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Delivers a periodic tick to an actor, at most one outstanding at a time.
///
/// A tick that would land while the previous one is still queued or being
/// handled is skipped, so a slow round never builds a backlog.
pub struct TickScheduler<M>
where
    M: Send + Debug + 'static,
{
    actor_ref: ActorRef<M>,
    every: Duration,
    latch: TickLatch,
    make_tick: fn() -> M,
}

impl<M> TickScheduler<M>
where
    M: Send + Debug + 'static,
{
    pub fn new(actor_ref: ActorRef<M>, every: Duration, latch: TickLatch, make_tick: fn() -> M) -> Self {
        Self {
            actor_ref,
            every,
            latch,
            make_tick,
        }
    }

    pub fn spawn(self, stop: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticks = interval(self.every);
            ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    biased;
                    _ = stop.cancelled() => break,
                    _ = ticks.tick() => {}
                }

                if !self.latch.arm() {
                    trace!(actor = self.actor_ref.name(), "Previous tick still pending");
                    continue;
                }

                match self.actor_ref.try_send((self.make_tick)()) {
                    Ok(true) => {}
                    Ok(false) => self.latch.release(),
                    Err(_) => break,
                }
            }

            debug!(actor = self.actor_ref.name(), "Tick scheduler stopped");
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    #[derive(Debug, PartialEq)]
    struct Tick;

    #[tokio::test(start_paused = true)]
    async fn unhandled_tick_suppresses_the_next() {
        let (tx, mut rx) = mpsc::channel(8);
        let latch = TickLatch::default();
        let stop = CancellationToken::new();
        let handle = TickScheduler::new(
            ActorRef::new("poller", tx),
            Duration::from_secs(5),
            latch.clone(),
            || Tick,
        )
        .spawn(stop.clone());

        tokio::time::sleep(Duration::from_secs(16)).await;
        assert_eq!(rx.try_recv(), Ok(Tick));
        assert!(rx.try_recv().is_err());

        latch.release();
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(rx.try_recv(), Ok(Tick));

        stop.cancel();
        handle.await.unwrap();
    }
}

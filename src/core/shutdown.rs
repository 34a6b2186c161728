use std::sync::Arc;
use tokio::sync::watch;

/// Sending half of the agent-wide shutdown flag
#[derive(Debug, Clone)]
pub struct ShutdownTrigger {
    tx: Arc<watch::Sender<bool>>,
}

/// Receiving half; cheap to clone into every task
#[derive(Debug, Clone)]
pub struct ShutdownSignal {
    rx: watch::Receiver<bool>,
}

pub fn channel() -> (ShutdownTrigger, ShutdownSignal) {
    let (tx, rx) = watch::channel(false);
    (ShutdownTrigger { tx: Arc::new(tx) }, ShutdownSignal { rx })
}

impl ShutdownTrigger {
    pub fn trigger(&self) {
        if !self.tx.send_replace(true) {
            log::info!("Shutdown requested");
        }
    }

    pub fn is_triggered(&self) -> bool {
        *self.tx.borrow()
    }

    pub fn subscribe(&self) -> ShutdownSignal {
        ShutdownSignal {
            rx: self.tx.subscribe(),
        }
    }
}

impl ShutdownSignal {
    pub fn is_triggered(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolve once shutdown is requested; never resolves if the trigger is gone
    pub async fn wait(&mut self) {
        while !*self.rx.borrow_and_update() {
            if self.rx.changed().await.is_err() {
                std::future::pending::<()>().await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_wait_resolves_after_trigger() {
        let (trigger, mut signal) = channel();
        assert!(!signal.is_triggered());

        let waiter = tokio::spawn(async move {
            signal.wait().await;
            signal.is_triggered()
        });
        trigger.trigger();

        let triggered = tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
        assert!(triggered);
    }

    #[tokio::test]
    async fn test_late_subscriber_sees_trigger() {
        let (trigger, _signal) = channel();
        trigger.trigger();
        let mut late = trigger.subscribe();
        assert!(late.is_triggered());
        tokio::time::timeout(Duration::from_millis(100), late.wait())
            .await
            .unwrap();
    }
}

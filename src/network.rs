use tokio::sync::watch;

/// Owner side of the connectivity flag. Whoever observes the platform's
/// online/offline events drives it.
#[derive(Debug)]
pub struct NetworkMonitor {
    sender: watch::Sender<bool>,
}

impl NetworkMonitor {
    pub fn new(online: bool) -> Self {
        let (sender, _) = watch::channel(online);
        Self { sender }
    }

    pub fn set_online(&self, online: bool) {
        self.sender.send_replace(online);
    }

    pub fn status(&self) -> NetworkStatus {
        NetworkStatus {
            receiver: self.sender.subscribe(),
        }
    }
}

impl Default for NetworkMonitor {
    fn default() -> Self {
        Self::new(true)
    }
}

/// Read side handed to the engine.
#[derive(Debug, Clone)]
pub struct NetworkStatus {
    receiver: watch::Receiver<bool>,
}

impl NetworkStatus {
    /// Status that never changes. Handy when connectivity is not tracked.
    pub fn fixed(online: bool) -> Self {
        let (_, receiver) = watch::channel(online);
        Self { receiver }
    }

    pub fn is_online(&self) -> bool {
        *self.receiver.borrow()
    }

    /// Resolves when the connectivity flag changes. Returns the new value,
    /// or `None` once the monitor is gone.
    pub async fn changed(&mut self) -> Option<bool> {
        self.receiver.changed().await.ok()?;
        Some(*self.receiver.borrow_and_update())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_status_follows_monitor() {
        let monitor = NetworkMonitor::new(true);
        let mut status = monitor.status();
        assert!(status.is_online());

        monitor.set_online(false);
        assert_eq!(status.changed().await, Some(false));
        assert!(!status.is_online());
    }

    #[test]
    fn test_fixed_status_keeps_last_value() {
        assert!(!NetworkStatus::fixed(false).is_online());
        assert!(NetworkStatus::fixed(true).is_online());
    }
}

//! Batch delivery of composed notifications.

use log::{error, info, warn};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::{sleep, timeout};

use crate::config::DispatchConfig;
use crate::error::SendError;
use crate::mailer::MailTransport;
use crate::notification::Notification;

/// Outcome of one batch. Every input is counted exactly once:
/// `sent_count + failed_recipients.len() + skipped_count == total_count`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DispatchReport {
    pub total_count: usize,
    pub sent_count: usize,
    pub failed_recipients: Vec<String>,
    pub skipped_count: usize,
}

impl DispatchReport {
    pub fn failed_count(&self) -> usize {
        self.failed_recipients.len()
    }
}

pub struct Dispatcher<T> {
    transport: Arc<T>,
    config: DispatchConfig,
}

impl<T: MailTransport> Dispatcher<T> {
    pub fn new(transport: Arc<T>, config: DispatchConfig) -> Self {
        Self { transport, config }
    }

    /// Send every deliverable notification with bounded concurrency.
    ///
    /// Notifications without a usable address are skipped. A failed or
    /// timed-out send is recorded and the rest of the batch carries on. When
    /// the batch deadline passes, sends still in flight are aborted and
    /// counted as failed. Dropping the returned future aborts them as well.
    pub async fn dispatch(&self, notifications: Vec<Notification>) -> DispatchReport {
        let total_count = notifications.len();
        let (deliverable, undeliverable): (Vec<_>, Vec<_>) = notifications
            .into_iter()
            .partition(Notification::is_deliverable);
        for skipped in &undeliverable {
            warn!("Skipping notification with invalid recipient {:?}", skipped.recipient);
        }

        let mut report = DispatchReport {
            total_count,
            skipped_count: undeliverable.len(),
            ..DispatchReport::default()
        };
        if deliverable.is_empty() {
            return report;
        }

        let workers = self.config.worker_count(deliverable.len());
        info!(
            "Dispatching {} of {} notifications with {} workers",
            deliverable.len(),
            total_count,
            workers
        );

        // Recipient of every send still in flight, by index
        let mut outstanding: Vec<Option<String>> = deliverable
            .iter()
            .map(|n| Some(n.recipient.clone()))
            .collect();

        let semaphore = Arc::new(Semaphore::new(workers));
        let mut tasks = JoinSet::new();
        for (idx, notification) in deliverable.into_iter().enumerate() {
            let transport = Arc::clone(&self.transport);
            let semaphore = Arc::clone(&semaphore);
            let send_timeout = self.config.send_timeout;
            tasks.spawn(async move {
                let result = match semaphore.acquire_owned().await {
                    Ok(_permit) => match timeout(send_timeout, transport.send(&notification)).await {
                        Ok(result) => result,
                        Err(_) => Err(SendError::Timeout),
                    },
                    Err(_) => Err(SendError::Aborted),
                };
                (idx, result)
            });
        }

        let deadline = sleep(self.config.batch_timeout);
        tokio::pin!(deadline);
        loop {
            tokio::select! {
                joined = tasks.join_next() => match joined {
                    None => break,
                    Some(Ok((idx, Ok(())))) => {
                        if let Some(recipient) = outstanding[idx].take() {
                            info!("Sent notification to {}", recipient);
                            report.sent_count += 1;
                        }
                    }
                    Some(Ok((idx, Err(err)))) => {
                        if let Some(recipient) = outstanding[idx].take() {
                            error!("Failed to send notification to {}: {}", recipient, err);
                            report.failed_recipients.push(recipient);
                        }
                    }
                    Some(Err(err)) => error!("Send task did not complete: {}", err),
                },
                _ = &mut deadline => {
                    warn!(
                        "Batch timed out after {:?} with {} sends in flight",
                        self.config.batch_timeout,
                        tasks.len()
                    );
                    tasks.abort_all();
                    break;
                }
            }
        }

        // Aborted or panicked sends
        report
            .failed_recipients
            .extend(outstanding.into_iter().flatten());

        info!(
            "Dispatch finished: {} sent, {} failed, {} skipped",
            report.sent_count,
            report.failed_count(),
            report.skipped_count
        );
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[derive(Default)]
    struct FakeTransport {
        delivered: Mutex<Vec<String>>,
        reject: Option<String>,
        delay: Duration,
        active: AtomicUsize,
        peak: AtomicUsize,
    }

    impl MailTransport for FakeTransport {
        async fn send(&self, notification: &Notification) -> Result<(), SendError> {
            let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            self.active.fetch_sub(1, Ordering::SeqCst);

            if self.reject.as_deref() == Some(notification.recipient.as_str()) {
                return Err(SendError::Transport("550 mailbox unavailable".to_string()));
            }
            self.delivered
                .lock()
                .unwrap()
                .push(notification.recipient.clone());
            Ok(())
        }
    }

    fn to(recipient: &str) -> Notification {
        Notification {
            recipient: recipient.to_string(),
            subject: "Roster Updated".to_string(),
            html_body: "<p>hi</p>".to_string(),
            attachments: Vec::new(),
        }
    }

    fn assert_counted_once(report: &DispatchReport) {
        assert_eq!(
            report.sent_count + report.failed_count() + report.skipped_count,
            report.total_count
        );
    }

    #[tokio::test]
    async fn test_invalid_recipients_are_skipped() {
        let transport = Arc::new(FakeTransport::default());
        let dispatcher = Dispatcher::new(Arc::clone(&transport), DispatchConfig::default());

        let report = dispatcher
            .dispatch(vec![to("a@x.example"), to("nobody"), to("c@x.example")])
            .await;

        assert_eq!(report.sent_count, 2);
        assert_eq!(report.skipped_count, 1);
        assert!(report.failed_recipients.is_empty());
        assert_counted_once(&report);

        let mut delivered = transport.delivered.lock().unwrap().clone();
        delivered.sort();
        assert_eq!(delivered, ["a@x.example", "c@x.example"]);
    }

    #[tokio::test]
    async fn test_dropping_dispatch_aborts_sends() {
        let transport = Arc::new(FakeTransport {
            delay: Duration::from_millis(200),
            ..FakeTransport::default()
        });
        let dispatcher = Dispatcher::new(Arc::clone(&transport), DispatchConfig::default());

        let batch = vec![to("a@x.example"), to("b@x.example"), to("c@x.example")];
        let cut_short =
            tokio::time::timeout(Duration::from_millis(30), dispatcher.dispatch(batch)).await;
        assert!(cut_short.is_err());
        assert!(transport.peak.load(Ordering::SeqCst) > 0);

        tokio::time::sleep(Duration::from_millis(400)).await;
        assert!(transport.delivered.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_transport_error_does_not_stop_batch() {
        let transport = Arc::new(FakeTransport {
            reject: Some("b@x.example".to_string()),
            ..FakeTransport::default()
        });
        let dispatcher = Dispatcher::new(transport, DispatchConfig::default());

        let report = dispatcher
            .dispatch(vec![to("a@x.example"), to("b@x.example"), to("c@x.example")])
            .await;

        assert_eq!(report.sent_count, 2);
        assert_eq!(report.failed_recipients, ["b@x.example"]);
        assert_counted_once(&report);
    }

    #[tokio::test]
    async fn test_concurrency_is_bounded() {
        let transport = Arc::new(FakeTransport {
            delay: Duration::from_millis(20),
            ..FakeTransport::default()
        });
        let config = DispatchConfig {
            max_workers: 2,
            ..DispatchConfig::default()
        };
        let dispatcher = Dispatcher::new(Arc::clone(&transport), config);

        let batch = (0..8).map(|i| to(&format!("e{}@x.example", i))).collect();
        let report = dispatcher.dispatch(batch).await;

        assert_eq!(report.sent_count, 8);
        assert!(transport.peak.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn test_slow_send_times_out() {
        let transport = Arc::new(FakeTransport {
            delay: Duration::from_secs(5),
            ..FakeTransport::default()
        });
        let config = DispatchConfig {
            send_timeout: Duration::from_millis(20),
            ..DispatchConfig::default()
        };
        let dispatcher = Dispatcher::new(transport, config);

        let report = dispatcher.dispatch(vec![to("a@x.example")]).await;
        assert_eq!(report.sent_count, 0);
        assert_eq!(report.failed_recipients, ["a@x.example"]);
        assert_counted_once(&report);
    }

    #[tokio::test]
    async fn test_batch_deadline_fails_outstanding() {
        let transport = Arc::new(FakeTransport {
            delay: Duration::from_secs(5),
            ..FakeTransport::default()
        });
        let config = DispatchConfig {
            max_workers: 1,
            batch_timeout: Duration::from_millis(30),
            ..DispatchConfig::default()
        };
        let dispatcher = Dispatcher::new(transport, config);

        let report = dispatcher
            .dispatch(vec![to("a@x.example"), to("b@x.example"), to("bad")])
            .await;
        assert_eq!(report.sent_count, 0);
        assert_eq!(report.failed_count(), 2);
        assert_eq!(report.skipped_count, 1);
        assert_counted_once(&report);
    }

    #[tokio::test]
    async fn test_empty_batch() {
        let dispatcher = Dispatcher::new(Arc::new(FakeTransport::default()), DispatchConfig::default());
        let report = dispatcher.dispatch(Vec::new()).await;
        assert_eq!(report, DispatchReport::default());
    }
}

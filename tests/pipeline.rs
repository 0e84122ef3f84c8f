#![cfg(feature = "web")]

use rosterdesk::composer::{Composer, MessageTemplate};
use rosterdesk::config::DispatchConfig;
use rosterdesk::dispatch::Dispatcher;
use rosterdesk::grouping::{self, GroupingPolicy};
use rosterdesk::mailer::MailTransport;
use rosterdesk::query;
use rosterdesk::roster::VENDOR_REQUIRED_COLUMNS;
use rosterdesk::{AppConfig, Ingestor, Notification, RosterSet, SendError, UploadedFile};
use std::sync::{Arc, Mutex};

struct FlakyTransport {
    refuse: &'static str,
    delivered: Mutex<Vec<String>>,
}

impl MailTransport for FlakyTransport {
    async fn send(&self, notification: &Notification) -> Result<(), SendError> {
        if notification.recipient.contains(self.refuse) {
            return Err(SendError::Transport("421 service not available".to_string()));
        }
        self.delivered
            .lock()
            .unwrap()
            .push(notification.recipient.clone());
        Ok(())
    }
}

fn ingest(name: &str, content: &str, config: &AppConfig) -> RosterSet {
    Ingestor::new(config.limits.clone())
        .ingest(Some(&UploadedFile::new(name, content.as_bytes().to_vec())))
        .unwrap()
}

#[test]
fn test_wide_upload_is_truncated() {
    let config = AppConfig::default();
    let header: Vec<String> = (1..=35).map(|i| format!("Col{}", i)).collect();
    let row: Vec<String> = (1..=35).map(|i| i.to_string()).collect();
    let csv = format!("{}\n{}\n", header.join(","), row.join(","));

    let roster = ingest("wide.csv", &csv, &config);
    assert_eq!(query::columns(&roster).len(), config.limits.max_columns);
}

#[test]
fn test_search_results_contain_query() {
    let config = AppConfig::default();
    let roster = ingest(
        "r.csv",
        "Name,Area\nAsha,Sector 21\nRavi,DLF Phase 2\nMeera,sector 45\n",
        &config,
    );

    assert_eq!(query::search(&roster, "").len(), roster.len());
    let hits = query::search(&roster, "SECTOR");
    assert_eq!(hits.len(), 2);
    for row in hits {
        assert!(
            row.values()
                .any(|v| v.to_string().to_lowercase().contains("sector"))
        );
    }
}

#[tokio::test]
async fn test_vendor_pipeline_end_to_end() {
    let config = AppConfig::default();
    let csv = "S No,Route No,Name,Vendor Names,Vendor Emails\n\
               1,7,A,Blue Cabs,ops@blue.example\n\
               2,7,B,Blue Cabs,ops@blue.example\n\
               3,8,C,Down Cabs,ops@down.example\n\
               4,9,D,Blue Cabs,desk@blue.example\n";
    let roster = Ingestor::new(config.limits.clone())
        .with_required_columns(VENDOR_REQUIRED_COLUMNS)
        .ingest(Some(&UploadedFile::new("v.csv", csv.as_bytes().to_vec())))
        .unwrap();

    let routes = grouping::group_by_route(&roster, GroupingPolicy::Partition);
    assert_eq!(routes.len(), 3);

    let composer = Composer::new(&config).unwrap();
    let template = MessageTemplate {
        top: "<p>Dear partner</p>".to_string(),
        bottom: "<p>Admin Team</p>".to_string(),
        selected: vec!["Route No".to_string(), "Name".to_string()],
    };
    let notifications = composer
        .vendor_notifications(&roster, GroupingPolicy::Partition, &template)
        .unwrap();
    assert_eq!(notifications.len(), 2);
    assert_eq!(
        notifications[0].recipient,
        "ops@blue.example, desk@blue.example"
    );

    let transport = Arc::new(FlakyTransport {
        refuse: "down.example",
        delivered: Mutex::new(Vec::new()),
    });
    let report = Dispatcher::new(Arc::clone(&transport), DispatchConfig::default())
        .dispatch(notifications)
        .await;

    assert_eq!(report.sent_count, 1);
    assert_eq!(report.failed_recipients, ["ops@down.example"]);
    assert_eq!(report.skipped_count, 0);
    assert_eq!(
        report.sent_count + report.failed_count() + report.skipped_count,
        report.total_count
    );
    assert_eq!(
        *transport.delivered.lock().unwrap(),
        ["ops@blue.example, desk@blue.example"]
    );
}

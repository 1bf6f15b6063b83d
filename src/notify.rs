use async_trait::async_trait;
use chrono::NaiveDate;

/// Outbound patient messaging. The SMS/bot transports live outside this
/// service; this seam only hands them what to say. The raw re-confirmation
/// token passes through here exactly once and is never persisted.
#[async_trait]
pub trait PatientNotifier: Send + Sync {
    async fn visit_transferred(
        &self,
        phone: Option<&str>,
        display_name: &str,
        new_day: NaiveDate,
        confirmation_token: &str,
    );
}

/// Default transport: log and move on. Delivery failures must never affect
/// the batch that triggered the notification.
pub struct TracingNotifier;

#[async_trait]
impl PatientNotifier for TracingNotifier {
    async fn visit_transferred(
        &self,
        phone: Option<&str>,
        display_name: &str,
        new_day: NaiveDate,
        _confirmation_token: &str,
    ) {
        tracing::info!(
            phone = phone.unwrap_or("-"),
            display_name,
            %new_day,
            "visit transferred, patient notification queued"
        );
    }
}

use async_trait::async_trait;
use std::sync::Arc;

/// Outbound SMS gateway seam. Called only after the surrounding database
/// transaction has committed, so a slow gateway never holds a lock.
#[async_trait]
pub trait SmsSender: Send + Sync {
    /// Returns `Ok(true)` when the gateway accepted the message.
    async fn send(&self, to_phone_number: &str, text: &str) -> anyhow::Result<bool>;
}

pub type SharedSms = Arc<dyn SmsSender>;

/// Dry-run gateway: logs the message and reports success. Used when no real
/// gateway credentials are configured.
pub struct LogSms;

#[async_trait]
impl SmsSender for LogSms {
    async fn send(&self, to_phone_number: &str, text: &str) -> anyhow::Result<bool> {
        tracing::info!(to = %to_phone_number, %text, "sms dry-run");
        Ok(true)
    }
}

#[cfg(test)]
pub mod test_support {
    use super::*;
    use std::sync::Mutex;

    /// Records every send; `fail` makes the gateway report non-delivery.
    #[derive(Default)]
    pub struct RecordingSms {
        pub sent: Mutex<Vec<(String, String)>>,
        pub fail: bool,
    }

    #[async_trait]
    impl SmsSender for RecordingSms {
        async fn send(&self, to_phone_number: &str, text: &str) -> anyhow::Result<bool> {
            self.sent
                .lock()
                .unwrap()
                .push((to_phone_number.to_owned(), text.to_owned()));
            Ok(!self.fail)
        }
    }
}

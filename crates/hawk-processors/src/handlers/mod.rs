//! Business handlers.

mod default_processor;
mod golang;
mod grouper;

pub use default_processor::DefaultProcessor;
pub use golang::GolangTransformer;
pub use grouper::Grouper;

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::Mutex;

    use async_trait::async_trait;
    use hawk_broker::Publisher;
    use hawk_core::BrokerError;

    /// Publisher that records what it is asked to send.
    #[derive(Default)]
    pub struct RecordingPublisher {
        pub sent: Mutex<Vec<(String, String)>>,
    }

    impl RecordingPublisher {
        pub fn sent(&self) -> Vec<(String, String)> {
            self.sent.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Publisher for RecordingPublisher {
        async fn send_to(&self, queue: &str, payload: &[u8]) -> Result<(), BrokerError> {
            self.sent.lock().unwrap().push((
                queue.to_string(),
                String::from_utf8_lossy(payload).into_owned(),
            ));
            Ok(())
        }
    }
}

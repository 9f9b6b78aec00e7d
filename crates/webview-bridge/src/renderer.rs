//! Seams to the embedded renderer.

use parking_lot::Mutex;
use tokio::sync::oneshot;

/// One embedded-content session as seen by the bridge.
pub trait RendererHost: Send + Sync {
    /// Stable numeric identity, used when instance references churn.
    fn renderer_id(&self) -> u64;

    /// Evaluates `script` in the current document.
    fn execute_script(&self, script: &str, url: &str) -> anyhow::Result<()>;

    fn current_url(&self) -> String;

    /// True once the renderer has a document that can accept script.
    fn has_document(&self) -> bool;
}

/// Acknowledgment handle for one renderer query. Only the first call has any effect.
pub trait QueryCallback: Send + Sync {
    fn success(&self, response: String);
    fn failure(&self, code: i32, message: String);
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum QueryReply {
    Success(String),
    Failure { code: i32, message: String },
}

/// A [`QueryCallback`] that forwards the single reply to a oneshot receiver.
#[derive(Debug)]
pub struct ChannelCallback {
    tx: Mutex<Option<oneshot::Sender<QueryReply>>>,
}

impl ChannelCallback {
    pub fn new() -> (Self, oneshot::Receiver<QueryReply>) {
        let (tx, rx) = oneshot::channel();
        (
            Self {
                tx: Mutex::new(Some(tx)),
            },
            rx,
        )
    }

    fn reply(&self, reply: QueryReply) {
        if let Some(tx) = self.tx.lock().take() {
            let _ = tx.send(reply);
        }
    }
}

impl QueryCallback for ChannelCallback {
    fn success(&self, response: String) {
        self.reply(QueryReply::Success(response));
    }

    fn failure(&self, code: i32, message: String) {
        self.reply(QueryReply::Failure { code, message });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_callback_keeps_first_reply() {
        let (callback, mut rx) = ChannelCallback::new();
        callback.success("{}".into());
        callback.failure(400, "late".into());
        assert_eq!(rx.try_recv().unwrap(), QueryReply::Success("{}".into()));
    }
}

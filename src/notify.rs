//! User-facing sync status messages (toasts).
//!
//! The engine fires these and moves on. A notifier must never block and must
//! never fail loudly; if nobody is listening the message is dropped.

use tokio::sync::mpsc;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Toast {
    pub message: String,
    pub is_error: bool,
}

pub trait Notifier: Send + Sync {
    fn notify(&self, message: &str, is_error: bool);
}

/// Writes toasts to the log. Used when no UI is attached.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingNotifier;

impl Notifier for TracingNotifier {
    fn notify(&self, message: &str, is_error: bool) {
        if is_error {
            tracing::warn!(target: "asset_sync::toast", "{}", message);
        } else {
            tracing::info!(target: "asset_sync::toast", "{}", message);
        }
    }
}

/// Forwards toasts to a UI over an unbounded channel.
#[derive(Clone)]
pub struct ChannelNotifier {
    tx: mpsc::UnboundedSender<Toast>,
}

impl ChannelNotifier {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Toast>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl Notifier for ChannelNotifier {
    fn notify(&self, message: &str, is_error: bool) {
        let _ = self.tx.send(Toast {
            message: message.to_string(),
            is_error,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_delivers_in_order() {
        let (notifier, mut rx) = ChannelNotifier::new();
        notifier.notify("Using saved copy of templates", false);
        notifier.notify("Could not save links", true);

        assert_eq!(rx.try_recv().unwrap().message, "Using saved copy of templates");
        let second = rx.try_recv().unwrap();
        assert!(second.is_error);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_dropped_receiver_is_swallowed() {
        let (notifier, rx) = ChannelNotifier::new();
        drop(rx);
        notifier.notify("nobody is listening", false);
    }
}

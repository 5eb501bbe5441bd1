//! Rendering contract between the controller and whatever draws the call UI.

use callcore::types::{EndReason, SessionView};
use serde::Serialize;
use tokio::sync::broadcast;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NoticeKind {
    Info,
    Success,
    Warning,
    Error,
}

/// A short user-facing message ("toast").
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Notice {
    pub kind: NoticeKind,
    pub message: String,
}

impl Notice {
    pub fn new(kind: NoticeKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn info(message: impl Into<String>) -> Self {
        Self::new(NoticeKind::Info, message)
    }

    pub fn success(message: impl Into<String>) -> Self {
        Self::new(NoticeKind::Success, message)
    }

    /// The single notification shown when a call ends.
    pub fn for_end(reason: EndReason) -> Self {
        let kind = match reason {
            EndReason::Hangup | EndReason::RemoteHangup | EndReason::Unknown => NoticeKind::Info,
            EndReason::Busy
            | EndReason::Rejected
            | EndReason::NoAnswer
            | EndReason::Unavailable => NoticeKind::Warning,
            EndReason::MediaDenied
            | EndReason::ChannelUnavailable
            | EndReason::PeerConnectionFailed
            | EndReason::ServerError => NoticeKind::Error,
        };
        Self::new(kind, reason.describe())
    }
}

/// Receives read-only snapshots from the controller.
///
/// Both methods are called from inside the controller task and must return
/// promptly; implementations that do real work should hand it off.
pub trait CallPresenter: Send + Sync {
    fn render(&self, view: &SessionView);
    fn notify(&self, notice: &Notice);
}

#[derive(Debug, Clone, PartialEq)]
pub enum PresenterEvent {
    Render(SessionView),
    Notice(Notice),
}

/// Presenter that republishes everything on a broadcast channel.
#[derive(Debug, Clone)]
pub struct BroadcastPresenter {
    tx: broadcast::Sender<PresenterEvent>,
}

impl BroadcastPresenter {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PresenterEvent> {
        self.tx.subscribe()
    }
}

impl Default for BroadcastPresenter {
    fn default() -> Self {
        Self::new(256)
    }
}

impl CallPresenter for BroadcastPresenter {
    fn render(&self, view: &SessionView) {
        let _ = self.tx.send(PresenterEvent::Render(view.clone()));
    }

    fn notify(&self, notice: &Notice) {
        let _ = self.tx.send(PresenterEvent::Notice(notice.clone()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use callcore::types::CallState;

    #[test]
    fn test_end_notices() {
        let busy = Notice::for_end(EndReason::Busy);
        assert_eq!(busy.kind, NoticeKind::Warning);
        assert_eq!(busy.message, "User is busy.");
        assert_eq!(
            Notice::for_end(EndReason::MediaDenied).kind,
            NoticeKind::Error
        );
        assert_eq!(Notice::for_end(EndReason::Hangup).kind, NoticeKind::Info);
    }

    #[tokio::test]
    async fn test_broadcast_presenter_fans_out() {
        let presenter = BroadcastPresenter::new(8);
        let mut a = presenter.subscribe();
        let mut b = presenter.subscribe();

        let view = SessionView {
            state: CallState::Ringing,
            ..SessionView::idle()
        };
        presenter.render(&view);
        presenter.notify(&Notice::info("hello"));

        for rx in [&mut a, &mut b] {
            assert_eq!(rx.recv().await.unwrap(), PresenterEvent::Render(view.clone()));
            assert_eq!(
                rx.recv().await.unwrap(),
                PresenterEvent::Notice(Notice::info("hello"))
            );
        }
    }

    #[test]
    fn test_render_without_subscribers_is_harmless() {
        let presenter = BroadcastPresenter::default();
        presenter.render(&SessionView::idle());
    }
}

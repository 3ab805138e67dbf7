//! Messages from the load pipeline to whoever drives it (an editor, the CLI).

use std::path::PathBuf;

use tokio::sync::{mpsc, oneshot};

use projsys_types::DiagnosticSeverity;

/// Default capacity of the client event channel.
pub const CLIENT_CHANNEL_CAPACITY: usize = 256;

#[derive(Debug)]
pub enum ClientEvent {
    /// Every project requested so far has been processed.
    ProjectInitializationComplete,
    /// These projects need a package restore. The pipeline waits for `ack`
    /// before starting another batch.
    RestoreRequested {
        projects: Vec<PathBuf>,
        ack: oneshot::Sender<()>,
    },
    Log {
        severity: DiagnosticSeverity,
        message: String,
    },
    ShowToast {
        severity: DiagnosticSeverity,
        message: String,
    },
}

/// Sending half of the client channel.
///
/// A closed channel is not an error: with nobody listening, events are dropped.
#[derive(Clone)]
pub struct ClientNotifier {
    tx: mpsc::Sender<ClientEvent>,
}

impl ClientNotifier {
    #[must_use]
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<ClientEvent>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self { tx }, rx)
    }

    pub async fn initialization_complete(&self) {
        self.send(ClientEvent::ProjectInitializationComplete).await;
    }

    /// Ask the client to restore `projects` and wait until it says it is done.
    pub async fn request_restore(&self, projects: Vec<PathBuf>) {
        let count = projects.len();
        let (ack, acked) = oneshot::channel();
        if !self
            .send(ClientEvent::RestoreRequested { projects, ack })
            .await
        {
            return;
        }
        match acked.await {
            Ok(()) => tracing::debug!(projects = count, "client finished restore"),
            Err(_) => tracing::debug!("client dropped the restore request"),
        }
    }

    pub async fn log(&self, severity: DiagnosticSeverity, message: impl Into<String>) {
        self.send(ClientEvent::Log {
            severity,
            message: message.into(),
        })
        .await;
    }

    pub async fn show_toast(&self, severity: DiagnosticSeverity, message: impl Into<String>) {
        self.send(ClientEvent::ShowToast {
            severity,
            message: message.into(),
        })
        .await;
    }

    async fn send(&self, event: ClientEvent) -> bool {
        if self.tx.send(event).await.is_err() {
            tracing::debug!("no client listening; event dropped");
            return false;
        }
        true
    }
}

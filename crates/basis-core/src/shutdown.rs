use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use crate::{
    domain::ChannelId,
    logging::PROGRAM,
    ports::{ChatPort, ConnectionPort, PresencePort},
    presence::Status,
};

pub const SHUTDOWN_ACK: &str = "Engine powering down...";

/// Terminates the process with the given code. Replaced in tests.
pub type ExitHook = Arc<dyn Fn(i32) + Send + Sync>;

pub fn process_exit() -> ExitHook {
    Arc::new(|code| std::process::exit(code))
}

/// Orderly termination, shared by Ctrl-C and the `shutdown` command.
///
/// Only the first call does anything; later or concurrent calls return
/// `false` immediately.
pub struct ShutdownSequencer {
    started: AtomicBool,
    chat: Arc<dyn ChatPort>,
    presence: Arc<dyn PresencePort>,
    connection: Arc<dyn ConnectionPort>,
    exit: ExitHook,
}

impl ShutdownSequencer {
    pub fn new(
        chat: Arc<dyn ChatPort>,
        presence: Arc<dyn PresencePort>,
        connection: Arc<dyn ConnectionPort>,
    ) -> Self {
        Self {
            started: AtomicBool::new(false),
            chat,
            presence,
            connection,
            exit: process_exit(),
        }
    }

    pub fn with_exit_hook(mut self, exit: ExitHook) -> Self {
        self.exit = exit;
        self
    }

    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }

    /// Run the sequence; `reply_to` is the command channel when the owner
    /// asked for it.
    pub async fn run(&self, reply_to: Option<ChannelId>) -> bool {
        if self.started.swap(true, Ordering::SeqCst) {
            tracing::debug!(target: PROGRAM, "Shutdown already in progress.");
            return false;
        }

        tracing::info!(target: PROGRAM, "{SHUTDOWN_ACK}");
        if let Some(channel) = reply_to {
            if let Err(e) = self.chat.send_text(channel, SHUTDOWN_ACK).await {
                tracing::warn!(target: PROGRAM, error = %e, "Failed to acknowledge shutdown");
            }
        }

        if let Err(e) = self.presence.apply_status(Status::Invisible).await {
            tracing::warn!(target: PROGRAM, error = %e, "Failed to go invisible");
        }
        self.connection.purge_caches().await;
        self.connection.detach_log_hook();
        self.connection.close().await;

        (self.exit)(0);
        true
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::ports::testing::{FakeChat, FakeConnection};

    struct Harness {
        chat: Arc<FakeChat>,
        conn: Arc<FakeConnection>,
        exits: Arc<Mutex<Vec<i32>>>,
        sequencer: Arc<ShutdownSequencer>,
    }

    fn harness() -> Harness {
        let chat = Arc::new(FakeChat::default());
        let conn = Arc::new(FakeConnection::default());
        *conn.status.lock().unwrap() = Status::Online;
        let exits = Arc::new(Mutex::new(Vec::new()));
        let recorded = exits.clone();
        let sequencer = ShutdownSequencer::new(chat.clone(), conn.clone(), conn.clone())
            .with_exit_hook(Arc::new(move |code| recorded.lock().unwrap().push(code)));
        Harness {
            chat,
            conn,
            exits,
            sequencer: Arc::new(sequencer),
        }
    }

    #[tokio::test]
    async fn command_shutdown_acks_then_tears_down_in_order() {
        let h = harness();

        assert!(h.sequencer.run(Some(ChannelId(9))).await);

        assert_eq!(h.chat.texts(), vec![SHUTDOWN_ACK.to_string()]);
        assert_eq!(
            h.conn.calls(),
            vec!["status:invisible", "purge", "detach", "close"]
        );
        assert_eq!(*h.exits.lock().unwrap(), vec![0]);
    }

    #[tokio::test]
    async fn signal_shutdown_sends_no_reply() {
        let h = harness();

        h.sequencer.run(None).await;

        assert!(h.chat.sent().is_empty());
        assert_eq!(*h.exits.lock().unwrap(), vec![0]);
    }

    #[tokio::test]
    async fn second_invocation_is_a_no_op() {
        let h = harness();

        let (a, b) = tokio::join!(h.sequencer.run(Some(ChannelId(9))), h.sequencer.run(None));

        assert!(a ^ b);
        assert!(h.sequencer.is_started());
        assert_eq!(h.conn.calls().iter().filter(|c| *c == "close").count(), 1);
        assert_eq!(*h.exits.lock().unwrap(), vec![0]);
    }
}

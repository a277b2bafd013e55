//! Inbound event queue and the lifecycle around it.

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use tokio::sync::mpsc;

use crate::{
    commands::CommandDispatcher,
    domain::{InboundMessage, OwnerIdentity},
    errors::Error,
    logging::PROGRAM,
    ports::{ConnectionPort, PresencePort},
    presence::PresenceStore,
    reporting::ErrorReporter,
    shutdown::{process_exit, ExitHook},
};

pub const EVENT_QUEUE_CAPACITY: usize = 256;

/// Transport notifications, translated by the adapter.
#[derive(Clone, Debug)]
pub enum InboundEvent {
    Ready,
    Message(InboundMessage),
    GuildAvailable { guild: String },
    GuildLeft { guild: String },
    MemberJoined { user: String, guild: String },
    MemberLeft { user: String, guild: String },
}

/// Reacts to inbound events once the connection is ready.
pub struct ControlPlane {
    owner: OwnerIdentity,
    store: Arc<PresenceStore>,
    presence: Arc<dyn PresencePort>,
    connection: Arc<dyn ConnectionPort>,
    dispatcher: CommandDispatcher,
    reporter: Arc<dyn ErrorReporter>,
    ready: AtomicBool,
    exit: ExitHook,
}

impl ControlPlane {
    pub fn new(
        owner: OwnerIdentity,
        store: Arc<PresenceStore>,
        presence: Arc<dyn PresencePort>,
        connection: Arc<dyn ConnectionPort>,
        dispatcher: CommandDispatcher,
        reporter: Arc<dyn ErrorReporter>,
    ) -> Self {
        Self {
            owner,
            store,
            presence,
            connection,
            dispatcher,
            reporter,
            ready: AtomicBool::new(false),
            exit: process_exit(),
        }
    }

    pub fn with_exit_hook(mut self, exit: ExitHook) -> Self {
        self.exit = exit;
        self
    }

    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    /// Resolve the owner, then push the stored presence to the connection.
    ///
    /// An owner that cannot be resolved is fatal: the process exits with 1.
    pub async fn on_ready(&self) {
        if self.is_ready() {
            return;
        }

        let owner_id = self.owner.0 .0;
        let Some(owner_name) = self.connection.resolve_user(self.owner.0).await else {
            let message = format!("Invalid ownerID: {owner_id}");
            tracing::error!(target: PROGRAM, critical = true, "{message}");
            self.reporter.capture("startup", &message);
            (self.exit)(1);
            return;
        };

        let store = self.store.clone();
        let state = match tokio::task::spawn_blocking(move || store.load()).await {
            Ok(state) => state,
            Err(e) => {
                let e = Error::External(format!("presence task failed: {e}"));
                tracing::error!(target: PROGRAM, error = %e, "Failed to load presence");
                self.reporter.capture("startup", &e);
                return;
            }
        };

        if let Err(e) = self.presence.apply_status(state.status).await {
            tracing::warn!(target: PROGRAM, error = %e, "Failed to apply stored status");
        }
        if let Err(e) = self.presence.apply_activity(&state).await {
            tracing::warn!(target: PROGRAM, error = %e, "Failed to apply stored activity");
        }

        self.ready.store(true, Ordering::SeqCst);
        tracing::debug!(target: PROGRAM, "Bot is ready. Owner: {owner_name}");
    }

    /// Handle any event but `Ready`. Dropped until the plane is ready.
    pub async fn handle(&self, event: InboundEvent) {
        if !self.is_ready() {
            return;
        }
        match event {
            InboundEvent::Ready => self.on_ready().await,
            InboundEvent::Message(msg) => self.dispatcher.handle(&msg).await,
            InboundEvent::GuildAvailable { guild } => {
                tracing::debug!(target: PROGRAM, "I joined guild {guild}.");
            }
            InboundEvent::GuildLeft { guild } => {
                tracing::debug!(target: PROGRAM, "I left guild {guild}.");
            }
            InboundEvent::MemberJoined { user, guild } => {
                tracing::debug!(target: PROGRAM, "{user} joined {guild}.");
            }
            InboundEvent::MemberLeft { user, guild } => {
                tracing::debug!(target: PROGRAM, "{user} left {guild}.");
            }
        }
    }
}

/// Drains the event queue. `Ready` runs inline so it completes before any
/// later event is looked at; every other event gets its own task.
pub struct EventLoop {
    rx: mpsc::Receiver<InboundEvent>,
    plane: Arc<ControlPlane>,
}

impl EventLoop {
    pub fn new(rx: mpsc::Receiver<InboundEvent>, plane: Arc<ControlPlane>) -> Self {
        Self { rx, plane }
    }

    pub async fn run(mut self) {
        while let Some(event) = self.rx.recv().await {
            match event {
                InboundEvent::Ready => self.plane.on_ready().await,
                event => {
                    let plane = self.plane.clone();
                    tokio::spawn(async move { plane.handle(event).await });
                }
            }
        }
        tracing::debug!(target: PROGRAM, "Event queue closed.");
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::{
        config::Config,
        domain::{ChannelId, ChannelKind, UserId},
        export::LogExporter,
        ports::testing::{FakeChat, FakeConnection},
        presence::{ActivityType, PresenceState, Status},
        reporting::testing::RecordingReporter,
        shutdown::ShutdownSequencer,
        utils::testing::tmp_dir,
    };

    const OWNER: u64 = 55;

    struct Harness {
        chat: Arc<FakeChat>,
        conn: Arc<FakeConnection>,
        store: Arc<PresenceStore>,
        reporter: Arc<RecordingReporter>,
        exits: Arc<Mutex<Vec<i32>>>,
        plane: Arc<ControlPlane>,
    }

    fn harness(prefix: &str, conn: FakeConnection) -> Harness {
        let cfg = Config::new("token", OWNER, tmp_dir(prefix));
        cfg.ensure_dirs().unwrap();
        let reporter = Arc::new(RecordingReporter::default());
        let chat = Arc::new(FakeChat::default());
        let conn = Arc::new(conn);
        let store = Arc::new(PresenceStore::new(cfg.presence_file.clone(), reporter.clone()));
        let exporter = Arc::new(LogExporter::new(&cfg, chat.clone(), reporter.clone()));
        let exits = Arc::new(Mutex::new(Vec::new()));
        let exit_hook: ExitHook = {
            let exits = exits.clone();
            Arc::new(move |code| exits.lock().unwrap().push(code))
        };
        let shutdown = Arc::new(
            ShutdownSequencer::new(chat.clone(), conn.clone(), conn.clone())
                .with_exit_hook(exit_hook.clone()),
        );
        let dispatcher = CommandDispatcher::new(
            cfg.owner,
            store.clone(),
            exporter,
            chat.clone(),
            conn.clone(),
            shutdown,
            reporter.clone(),
        );
        let plane = ControlPlane::new(
            cfg.owner,
            store.clone(),
            conn.clone(),
            conn.clone(),
            dispatcher,
            reporter.clone(),
        )
        .with_exit_hook(exit_hook);
        Harness {
            chat,
            conn,
            store,
            reporter,
            exits,
            plane: Arc::new(plane),
        }
    }

    fn owner_dm(content: &str) -> InboundEvent {
        InboundEvent::Message(InboundMessage {
            author: UserId(OWNER),
            author_name: "owner".to_string(),
            author_is_bot: false,
            channel: ChannelId(1),
            kind: ChannelKind::Private,
            content: content.to_string(),
        })
    }

    #[tokio::test]
    async fn events_before_ready_are_ignored() {
        let h = harness("basis-events-early", FakeConnection::default());

        h.plane.handle(owner_dm("help")).await;

        assert!(h.chat.sent().is_empty());
        assert!(!h.plane.is_ready());
    }

    #[tokio::test]
    async fn ready_applies_stored_presence() {
        let h = harness("basis-events-ready", FakeConnection::default());
        let stored = PresenceState::default()
            .with_activity(ActivityType::Watching, "logs", "")
            .with_status(Status::Dnd);
        h.store.save(stored.clone()).unwrap();

        h.plane.on_ready().await;

        assert!(h.plane.is_ready());
        assert_eq!(h.conn.calls(), vec!["status:dnd", "activity:Watching"]);
        assert_eq!(h.conn.activities(), vec![stored]);
        assert!(h.exits.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn unknown_owner_exits_with_one() {
        let conn = FakeConnection {
            known_user: None,
            ..FakeConnection::default()
        };
        let h = harness("basis-events-badowner", conn);

        h.plane.on_ready().await;

        assert_eq!(*h.exits.lock().unwrap(), vec![1]);
        assert_eq!(h.reporter.count(), 1);
        assert!(!h.plane.is_ready());
        assert!(h.conn.calls().is_empty());
    }

    #[tokio::test]
    async fn event_loop_runs_ready_before_later_events() {
        let h = harness("basis-events-loop", FakeConnection::default());
        let (tx, rx) = mpsc::channel(EVENT_QUEUE_CAPACITY);
        let worker = tokio::spawn(EventLoop::new(rx, h.plane.clone()).run());

        tx.send(InboundEvent::Ready).await.unwrap();
        tx.send(InboundEvent::GuildAvailable {
            guild: "Home".to_string(),
        })
        .await
        .unwrap();
        tx.send(owner_dm("help")).await.unwrap();
        drop(tx);
        worker.await.unwrap();

        for _ in 0..100 {
            if !h.chat.sent().is_empty() {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        assert_eq!(h.chat.texts().len(), 1);
        assert!(h.plane.is_ready());
    }
}

//! One-operation-at-a-time execution for a [`Controller`].
//!
//! The controller lives on its own task and drains an unbounded command
//! channel in order; each command carries a `oneshot` for its reply. Two saves
//! issued back to back therefore run strictly one after the other, and the
//! second sees the id assigned by the first.

use log::{debug, trace};
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::character::CharacterRecord;
use crate::index::IndexRecord;
use crate::sync::SyncError;

use super::controller::{Controller, Edit};

type Reply<T> = oneshot::Sender<Result<T, SyncError>>;

enum Command {
    Startup(oneshot::Sender<String>),
    Select(Option<String>, oneshot::Sender<()>),
    New(oneshot::Sender<String>),
    Refresh(Reply<IndexRecord>),
    Load(Reply<String>),
    Save(Reply<String>),
    Delete(Reply<String>),
    Edit(Edit, Reply<bool>),
    Import(Value, Reply<String>),
    Snapshot(oneshot::Sender<SessionSnapshot>),
    Shutdown(oneshot::Sender<()>),
}

impl Command {
    fn label(&self) -> &'static str {
        match self {
            Command::Startup(_) => "startup",
            Command::Select(..) => "select",
            Command::New(_) => "new",
            Command::Refresh(_) => "refresh",
            Command::Load(_) => "load",
            Command::Save(_) => "save",
            Command::Delete(_) => "delete",
            Command::Edit(..) => "edit",
            Command::Import(..) => "import",
            Command::Snapshot(_) => "snapshot",
            Command::Shutdown(_) => "shutdown",
        }
    }
}

/// Copy of the controller's state at one point in the command sequence.
#[derive(Debug, Clone)]
pub struct SessionSnapshot {
    pub record: CharacterRecord,
    pub selected: Option<String>,
    pub choices: IndexRecord,
}

#[derive(Clone, Debug)]
pub struct ControllerHandle {
    tx: mpsc::UnboundedSender<Command>,
}

fn stopped() -> SyncError {
    SyncError::Unavailable("session controller has stopped".to_string())
}

impl ControllerHandle {
    async fn call<T>(&self, make: impl FnOnce(oneshot::Sender<T>) -> Command) -> Result<T, SyncError> {
        let (tx, rx) = oneshot::channel();
        self.tx.send(make(tx)).map_err(|_| stopped())?;
        rx.await.map_err(|_| stopped())
    }

    pub async fn startup(&self) -> Result<String, SyncError> {
        self.call(Command::Startup).await
    }

    pub async fn select(&self, id: Option<String>) -> Result<(), SyncError> {
        self.call(|tx| Command::Select(id, tx)).await
    }

    pub async fn new_character(&self) -> Result<String, SyncError> {
        self.call(Command::New).await
    }

    pub async fn refresh_choices(&self) -> Result<IndexRecord, SyncError> {
        self.call(Command::Refresh).await?
    }

    pub async fn load(&self) -> Result<String, SyncError> {
        self.call(Command::Load).await?
    }

    pub async fn save(&self) -> Result<String, SyncError> {
        self.call(Command::Save).await?
    }

    pub async fn delete(&self) -> Result<String, SyncError> {
        self.call(Command::Delete).await?
    }

    pub async fn edit(&self, edit: Edit) -> Result<bool, SyncError> {
        self.call(|tx| Command::Edit(edit, tx)).await?
    }

    pub async fn import(&self, raw: Value) -> Result<String, SyncError> {
        self.call(|tx| Command::Import(raw, tx)).await?
    }

    pub async fn snapshot(&self) -> Result<SessionSnapshot, SyncError> {
        self.call(Command::Snapshot).await
    }

    /// Stop the controller after everything queued before this call has run.
    pub async fn shutdown(&self) -> Result<(), SyncError> {
        self.call(Command::Shutdown).await
    }
}

/// Move `controller` onto its own task. The task ends on `shutdown` or when
/// every handle is dropped.
pub fn start_controller(mut controller: Controller) -> (ControllerHandle, JoinHandle<()>) {
    let (tx, mut rx) = mpsc::unbounded_channel::<Command>();
    let join = tokio::spawn(async move {
        while let Some(cmd) = rx.recv().await {
            trace!("session command: {}", cmd.label());
            match cmd {
                Command::Startup(reply) => {
                    let _ = reply.send(controller.startup().await);
                }
                Command::Select(id, reply) => {
                    controller.select(id);
                    let _ = reply.send(());
                }
                Command::New(reply) => {
                    let _ = reply.send(controller.new_character());
                }
                Command::Refresh(reply) => {
                    let result = controller.refresh_choices().await.cloned();
                    let _ = reply.send(result);
                }
                Command::Load(reply) => {
                    let _ = reply.send(controller.load_selected().await);
                }
                Command::Save(reply) => {
                    let _ = reply.send(controller.save().await);
                }
                Command::Delete(reply) => {
                    let _ = reply.send(controller.delete_selected().await);
                }
                Command::Edit(edit, reply) => {
                    let _ = reply.send(controller.apply(edit));
                }
                Command::Import(raw, reply) => {
                    let _ = reply.send(controller.replace_record(raw));
                }
                Command::Snapshot(reply) => {
                    let _ = reply.send(SessionSnapshot {
                        record: controller.record().clone(),
                        selected: controller.selected().map(str::to_string),
                        choices: controller.choices().clone(),
                    });
                }
                Command::Shutdown(reply) => {
                    let _ = reply.send(());
                    break;
                }
            }
        }
        debug!("session controller stopped");
    });
    (ControllerHandle { tx }, join)
}

//! Isolated execution context: one OS thread per run, reachable only through
//! JSON messages. Tearing a context down raises its kill flag, which the
//! interpreter observes between instructions.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{mpsc as std_mpsc, Arc};

use tokio::sync::{mpsc, oneshot};

use super::protocol::{self, ContextMessage, HostMessage};
use super::vm::{Fault, Limits, Value, Vm};
use crate::kernel::compiler::panic_message;
use crate::kernel::script::Script;

pub(crate) struct ContextHandle {
    inbox: std_mpsc::Sender<String>,
    outbox: mpsc::UnboundedReceiver<String>,
    kill: Arc<AtomicBool>,
    exited: Option<oneshot::Receiver<()>>,
}

/// Dropped when the context thread ends, however it ends.
struct ExitGuard {
    live: Arc<AtomicUsize>,
    _exited: oneshot::Sender<()>,
}

impl Drop for ExitGuard {
    fn drop(&mut self) {
        self.live.fetch_sub(1, Ordering::SeqCst);
    }
}

pub(crate) fn spawn(limits: Limits, live: Arc<AtomicUsize>) -> std::io::Result<ContextHandle> {
    let (inbox_tx, inbox_rx) = std_mpsc::channel::<String>();
    let (outbox_tx, outbox_rx) = mpsc::unbounded_channel::<String>();
    let (exited_tx, exited_rx) = oneshot::channel();
    let kill = Arc::new(AtomicBool::new(false));

    live.fetch_add(1, Ordering::SeqCst);
    let guard = ExitGuard {
        live: live.clone(),
        _exited: exited_tx,
    };
    std::thread::Builder::new()
        .name("lyx-context".to_string())
        .spawn({
            let kill = kill.clone();
            move || {
                let _guard = guard;
                context_main(inbox_rx, outbox_tx, &kill, limits);
            }
        })?;

    Ok(ContextHandle {
        inbox: inbox_tx,
        outbox: outbox_rx,
        kill,
        exited: Some(exited_rx),
    })
}

fn context_main(
    inbox: std_mpsc::Receiver<String>,
    outbox: mpsc::UnboundedSender<String>,
    kill: &AtomicBool,
    limits: Limits,
) {
    let send = |message: ContextMessage| {
        let _ = outbox.send(protocol::encode(&message));
    };

    let Ok(text) = inbox.recv() else {
        return;
    };
    let payload = match protocol::decode::<HostMessage>(&text) {
        Ok(HostMessage::Exec { payload }) => payload,
        Err(e) => {
            send(ContextMessage::Error {
                message: format!("bad host message: {e}"),
            });
            return;
        }
    };
    let script: Script = match payload.parse() {
        Ok(script) => script,
        Err(e) => {
            send(ContextMessage::Error {
                message: e.to_string(),
            });
            return;
        }
    };

    let result = catch_unwind(AssertUnwindSafe(|| {
        let mut vm = Vm::new(&script, limits, kill);
        vm.run(&mut |level, message| send(ContextMessage::Log { level, message }))
    }));
    match result {
        Ok(Ok(value)) => send(ContextMessage::Done {
            value: (value != Value::Undefined).then(|| value.to_string()),
        }),
        // the host has already stopped listening
        Ok(Err(Fault::Killed)) => {}
        Ok(Err(Fault::Error(message))) => send(ContextMessage::Error { message }),
        Err(panic) => send(ContextMessage::Error {
            message: format!("internal error: {}", panic_message(panic.as_ref())),
        }),
    }
}

impl ContextHandle {
    pub(crate) fn post(&self, message: &HostMessage) -> bool {
        self.inbox.send(protocol::encode(message)).is_ok()
    }

    /// Next message from the context; `None` once the context is gone.
    pub(crate) async fn recv(&mut self) -> Option<ContextMessage> {
        let text = self.outbox.recv().await?;
        Some(
            protocol::decode(&text).unwrap_or_else(|e| ContextMessage::Error {
                message: format!("bad context message: {e}"),
            }),
        )
    }

    /// Kills the context. The returned receiver resolves once its thread
    /// has exited.
    pub(crate) fn teardown(mut self) -> Option<oneshot::Receiver<()>> {
        self.kill.store(true, Ordering::SeqCst);
        self.exited.take()
    }
}

impl Drop for ContextHandle {
    fn drop(&mut self) {
        self.kill.store(true, Ordering::SeqCst);
    }
}

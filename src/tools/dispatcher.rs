//! Tool-call dispatcher.
//!
//! ```text
//! ToolCall{call_id, name, args} ──dispatch()──► pending[call_id] + spawned task
//!                                                   │
//!        replies ◄── ToolReply{call_id, result} ◄───┘  (any completion order)
//!           │
//!     session: complete(call_id) → send result → pending shrinks
//! ```
//!
//! Every call runs in its own task so a slow handler only delays its own
//! result.  Each task owns a copy of its `call_id` and tags its reply with
//! it, so out-of-order completion can never swap results.  Handler errors
//! and panics become `"Error: …"` result strings.

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;

use futures_util::FutureExt;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::channel::ToolCall;
use crate::tools::capabilities::CapabilityTable;

/// A finished call, ready to be sent back over the channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolReply {
    pub call_id: String,
    pub name: String,
    pub result: String,
    pub toast: Option<String>,
    pub ends_session: bool,
}

impl ToolReply {
    fn plain(call_id: String, name: String, result: String) -> Self {
        Self {
            call_id,
            name,
            result,
            toast: None,
            ends_session: false,
        }
    }
}

/// A call whose result has not been sent yet.
#[derive(Debug)]
pub struct PendingToolCall {
    pub call_id: String,
    pub name: String,
    pub arguments: Value,
    task: JoinHandle<()>,
}

pub struct ToolDispatcher {
    table: CapabilityTable,
    pending: HashMap<String, PendingToolCall>,
    replies: mpsc::UnboundedSender<ToolReply>,
}

impl ToolDispatcher {
    /// Returns the dispatcher and the receiver its tasks report on.
    pub fn new(table: CapabilityTable) -> (Self, mpsc::UnboundedReceiver<ToolReply>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                table,
                pending: HashMap::new(),
                replies: tx,
            },
            rx,
        )
    }

    /// Start executing `call`.
    ///
    /// Returns `false` without running anything if a call with the same id is
    /// still outstanding.  Must be called from within a tokio runtime.
    pub fn dispatch(&mut self, call: ToolCall) -> bool {
        if self.pending.contains_key(&call.call_id) {
            log::warn!(
                "tools: duplicate call id '{}' for '{}' ignored",
                call.call_id,
                call.name
            );
            return false;
        }

        log::debug!("tools: dispatch {} ({})", call.name, call.call_id);

        let capability = self.table.get(&call.name);
        let tx = self.replies.clone();
        let call_id = call.call_id.clone();
        let name = call.name.clone();
        let arguments = call.arguments.clone();

        let task = tokio::spawn(async move {
            let reply = match capability {
                None => {
                    log::warn!("tools: unknown capability '{name}'");
                    ToolReply::plain(call_id, name.clone(), format!("Unknown capability: {name}"))
                }
                Some(capability) => {
                    match AssertUnwindSafe(capability.invoke(arguments)).catch_unwind().await {
                        Ok(Ok(out)) => ToolReply {
                            call_id,
                            name,
                            result: out.text,
                            toast: out.toast,
                            ends_session: out.ends_session,
                        },
                        Ok(Err(e)) => {
                            log::warn!("tools: '{name}' failed: {e}");
                            ToolReply::plain(call_id, name, format!("Error: {e}"))
                        }
                        Err(panic) => {
                            let msg = panic_message(panic.as_ref());
                            log::error!("tools: '{name}' panicked: {msg}");
                            ToolReply::plain(call_id, name, format!("Error: {msg}"))
                        }
                    }
                }
            };
            // The receiver is gone once the session has torn down.
            let _ = tx.send(reply);
        });

        self.pending.insert(
            call.call_id.clone(),
            PendingToolCall {
                call_id: call.call_id,
                name: call.name,
                arguments: call.arguments,
                task,
            },
        );
        true
    }

    /// Remove a call from the pending set as its result is being sent.
    ///
    /// `None` means the reply is stale (already completed or detached) and
    /// must not be sent.
    pub fn complete(&mut self, call_id: &str) -> Option<PendingToolCall> {
        self.pending.remove(call_id)
    }

    pub fn outstanding(&self) -> usize {
        self.pending.len()
    }

    /// Forget every outstanding call. The tasks run to completion but their
    /// replies will no longer be accepted.
    pub fn detach_all(&mut self) -> usize {
        let n = self.pending.len();
        if n > 0 {
            let running = self
                .pending
                .values()
                .filter(|call| !call.task.is_finished())
                .count();
            log::debug!("tools: detaching {n} pending call(s), {running} still running");
        }
        self.pending.clear();
        n
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "capability panicked".to_string()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::capabilities::{
        Capability, CapabilityError, CapabilityOutput, ToolDeclaration,
    };
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::Arc;
    use tokio::sync::oneshot;

    /// Replies with its argument once released by the test.
    struct Gated {
        name: &'static str,
        gate: tokio::sync::Mutex<Option<oneshot::Receiver<()>>>,
    }

    #[async_trait]
    impl Capability for Gated {
        fn declaration(&self) -> ToolDeclaration {
            ToolDeclaration {
                name: self.name.into(),
                description: String::new(),
                parameters: json!({}),
            }
        }

        async fn invoke(&self, arguments: Value) -> Result<CapabilityOutput, CapabilityError> {
            let gate = self.gate.lock().await.take();
            if let Some(gate) = gate {
                let _ = gate.await;
            }
            Ok(CapabilityOutput::reply(format!("{}:{}", self.name, arguments["v"])))
        }
    }

    struct Failing;

    #[async_trait]
    impl Capability for Failing {
        fn declaration(&self) -> ToolDeclaration {
            ToolDeclaration {
                name: "fail".into(),
                description: String::new(),
                parameters: json!({}),
            }
        }

        async fn invoke(&self, _: Value) -> Result<CapabilityOutput, CapabilityError> {
            Err(CapabilityError::Failed("backend down".into()))
        }
    }

    struct Panicking;

    #[async_trait]
    impl Capability for Panicking {
        fn declaration(&self) -> ToolDeclaration {
            ToolDeclaration {
                name: "boom".into(),
                description: String::new(),
                parameters: json!({}),
            }
        }

        async fn invoke(&self, _: Value) -> Result<CapabilityOutput, CapabilityError> {
            panic!("handler exploded");
        }
    }

    fn call(id: &str, name: &str, v: i64) -> ToolCall {
        ToolCall {
            call_id: id.into(),
            name: name.into(),
            arguments: json!({ "v": v }),
        }
    }

    fn gated(name: &'static str) -> (Arc<Gated>, oneshot::Sender<()>) {
        let (tx, rx) = oneshot::channel();
        (
            Arc::new(Gated {
                name,
                gate: tokio::sync::Mutex::new(Some(rx)),
            }),
            tx,
        )
    }

    #[tokio::test]
    async fn unknown_capability_yields_error_string() {
        let (mut d, mut rx) = ToolDispatcher::new(CapabilityTable::new());
        assert!(d.dispatch(call("x1", "doTheThing", 0)));

        let reply = rx.recv().await.unwrap();
        assert_eq!(reply.call_id, "x1");
        assert_eq!(reply.result, "Unknown capability: doTheThing");
        assert!(d.complete("x1").is_some());
        assert_eq!(d.outstanding(), 0);
    }

    #[tokio::test]
    async fn out_of_order_completion_keeps_correlation() {
        let (a, release_a) = gated("a");
        let (b, release_b) = gated("b");
        let mut table = CapabilityTable::new();
        table.register(a);
        table.register(b);
        let (mut d, mut rx) = ToolDispatcher::new(table);

        d.dispatch(call("A", "a", 1));
        d.dispatch(call("B", "b", 2));
        assert_eq!(d.outstanding(), 2);

        release_b.send(()).unwrap();
        let first = rx.recv().await.unwrap();
        assert_eq!(first.call_id, "B");
        assert_eq!(first.result, "b:2");
        d.complete(&first.call_id).unwrap();

        release_a.send(()).unwrap();
        let second = rx.recv().await.unwrap();
        assert_eq!(second.call_id, "A");
        assert_eq!(second.result, "a:1");
        d.complete(&second.call_id).unwrap();
        assert_eq!(d.outstanding(), 0);
    }

    #[tokio::test]
    async fn duplicate_outstanding_id_is_rejected() {
        let (g, release) = gated("g");
        let mut table = CapabilityTable::new();
        table.register(g);
        let (mut d, mut rx) = ToolDispatcher::new(table);

        assert!(d.dispatch(call("same", "g", 1)));
        assert!(!d.dispatch(call("same", "g", 2)));
        assert_eq!(d.outstanding(), 1);

        release.send(()).unwrap();
        assert_eq!(rx.recv().await.unwrap().result, "g:1");
        d.complete("same");
        // Only one reply was ever produced.
        tokio::task::yield_now().await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn id_can_be_reused_after_completion() {
        let (mut d, mut rx) = ToolDispatcher::new(CapabilityTable::new());
        d.dispatch(call("r", "nope", 0));
        rx.recv().await.unwrap();
        d.complete("r");
        assert!(d.dispatch(call("r", "nope", 0)));
    }

    #[tokio::test]
    async fn handler_error_becomes_result_string() {
        let mut table = CapabilityTable::new();
        table.register(Arc::new(Failing));
        let (mut d, mut rx) = ToolDispatcher::new(table);

        d.dispatch(call("f", "fail", 0));
        assert_eq!(rx.recv().await.unwrap().result, "Error: backend down");
    }

    #[tokio::test]
    async fn handler_panic_becomes_result_string() {
        let mut table = CapabilityTable::new();
        table.register(Arc::new(Panicking));
        let (mut d, mut rx) = ToolDispatcher::new(table);

        d.dispatch(call("p", "boom", 0));
        let reply = rx.recv().await.unwrap();
        assert_eq!(reply.call_id, "p");
        assert_eq!(reply.result, "Error: handler exploded");
    }

    #[tokio::test]
    async fn detached_calls_are_no_longer_pending() {
        let (g, release) = gated("g");
        let mut table = CapabilityTable::new();
        table.register(g);
        let (mut d, mut rx) = ToolDispatcher::new(table);

        d.dispatch(call("late", "g", 0));
        assert_eq!(d.detach_all(), 1);
        assert_eq!(d.outstanding(), 0);

        release.send(()).unwrap();
        let reply = rx.recv().await.unwrap();
        assert!(d.complete(&reply.call_id).is_none());
    }
}

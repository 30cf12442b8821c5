//! Single-writer mutation automaton
//!
//! Every registry mutation is funnelled through one writer thread that owns
//! the [`SchemaRegistry`] and applies commands strictly in arrival order.
//! Callers talk to it through a cloneable [`AutomatonHandle`]; readers keep
//! using the `Arc<SchemaObject>` handles they were given and never queue.
//!
//! Objects are only created through `resolve_and_ref`, so every object the
//! writer holds is referenced; unreferenced objects in the registry handed to
//! [`SchemaAutomaton::spawn`] are released before the first command.
//!
//! A fatal error (see [`SchemaError::is_fatal`]) is returned to the request
//! that caused it and then stops the writer: the registry can no longer be
//! trusted, so every later request fails with [`SchemaError::AutomatonStopped`].

use std::path::PathBuf;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam::channel::{bounded, unbounded, Receiver, Sender};
use tracing::{debug, error, info};

use crate::account::AccountId;
use crate::accounting::{self, MemoryCostModel, ReconcileReport};
use crate::config::AutomatonConfig;
use crate::error::{Result, SchemaError};
use crate::object::SchemaObject;
use crate::registry::{RegistryStats, SchemaRegistry, UnrefOutcome};
use crate::schema::TableSchema;
use crate::snapshot;

enum Mutation {
    Find {
        content: Arc<TableSchema>,
        reply: Sender<Option<Arc<SchemaObject>>>,
    },
    ResolveAndRef {
        content: Arc<TableSchema>,
        account: AccountId,
        reply: Sender<Result<(Arc<SchemaObject>, bool)>>,
    },
    RefBy {
        object: Arc<SchemaObject>,
        account: AccountId,
        reply: Sender<Result<bool>>,
    },
    UnrefBy {
        object: Arc<SchemaObject>,
        account: AccountId,
        reply: Sender<Result<UnrefOutcome>>,
    },
    SetCharged {
        object: Arc<SchemaObject>,
        account: AccountId,
        usage: i64,
        reply: Sender<Result<()>>,
    },
    Reconcile {
        reply: Sender<Result<ReconcileReport>>,
    },
    Save {
        path: PathBuf,
        pretty: bool,
        reply: Sender<Result<()>>,
    },
    Load {
        path: PathBuf,
        reply: Sender<Result<()>>,
    },
    Stats {
        reply: Sender<RegistryStats>,
    },
    Shutdown,
}

enum Control {
    Continue,
    Shutdown,
    Fatal(String),
}

fn fatal_reason<T>(result: &Result<T>) -> Option<String> {
    result
        .as_ref()
        .err()
        .filter(|e| e.is_fatal())
        .map(ToString::to_string)
}

fn reply_with<T>(reply: Sender<Result<T>>, result: Result<T>) -> Control {
    let fatal = fatal_reason(&result);
    // The requester may have given up; the mutation has been applied anyway.
    let _ = reply.send(result);
    fatal.map_or(Control::Continue, Control::Fatal)
}

fn step(registry: &mut SchemaRegistry, cost_model: &dyn MemoryCostModel, mutation: Mutation) -> Control {
    match mutation {
        Mutation::Find { content, reply } => {
            let _ = reply.send(registry.find(&content).cloned());
            Control::Continue
        }
        Mutation::ResolveAndRef { content, account, reply } => {
            reply_with(reply, registry.resolve_and_ref(content, &account))
        }
        Mutation::RefBy { object, account, reply } => {
            reply_with(reply, registry.ref_by(&object, &account))
        }
        Mutation::UnrefBy { object, account, reply } => {
            reply_with(reply, registry.unref_by(&object, &account))
        }
        Mutation::SetCharged {
            object,
            account,
            usage,
            reply,
        } => reply_with(
            reply,
            registry.set_charged_master_memory_usage(&object, &account, usage),
        ),
        Mutation::Reconcile { reply } => {
            reply_with(reply, accounting::reconcile(registry, cost_model))
        }
        Mutation::Save { path, pretty, reply } => {
            reply_with(reply, snapshot::save_to_path(registry, &path, pretty))
        }
        Mutation::Load { path, reply } => {
            reply_with(reply, snapshot::load_from_path(registry, &path))
        }
        Mutation::Stats { reply } => {
            let _ = reply.send(registry.stats());
            Control::Continue
        }
        Mutation::Shutdown => Control::Shutdown,
    }
}

fn run(
    mut registry: SchemaRegistry,
    receiver: Receiver<Mutation>,
    cost_model: Arc<dyn MemoryCostModel>,
) -> SchemaRegistry {
    if let Err(e) = registry.release_unreferenced() {
        error!(error = %e, "Schema automaton failed to start");
        return registry;
    }
    for mutation in receiver.iter() {
        match step(&mut registry, cost_model.as_ref(), mutation) {
            Control::Continue => {}
            Control::Shutdown => {
                info!(objects = registry.len(), "Schema automaton shutting down");
                break;
            }
            Control::Fatal(reason) => {
                error!(%reason, "Schema automaton stopped on fatal error");
                break;
            }
        }
    }
    registry
}

/// Cloneable client of a running automaton
#[derive(Clone)]
pub struct AutomatonHandle {
    sender: Sender<Mutation>,
}

impl AutomatonHandle {
    fn request<T>(&self, build: impl FnOnce(Sender<T>) -> Mutation) -> Result<T> {
        let (reply, response) = bounded(1);
        self.sender
            .send(build(reply))
            .map_err(|_| SchemaError::AutomatonStopped)?;
        response.recv().map_err(|_| SchemaError::AutomatonStopped)
    }

    /// Look up the canonical object for `content` without creating it
    pub fn find(&self, content: impl Into<Arc<TableSchema>>) -> Result<Option<Arc<SchemaObject>>> {
        let content = content.into();
        self.request(|reply| Mutation::Find { content, reply })
    }

    /// Resolve `content` and reference it as one mutation
    ///
    /// This is the only way to create objects through the automaton, so no
    /// object is ever left without a reference.
    pub fn resolve_and_ref(
        &self,
        content: impl Into<Arc<TableSchema>>,
        account: &AccountId,
    ) -> Result<(Arc<SchemaObject>, bool)> {
        let content = content.into();
        self.request(|reply| Mutation::ResolveAndRef {
            content,
            account: account.clone(),
            reply,
        })?
    }

    pub fn ref_by(&self, object: &Arc<SchemaObject>, account: &AccountId) -> Result<bool> {
        self.request(|reply| Mutation::RefBy {
            object: Arc::clone(object),
            account: account.clone(),
            reply,
        })?
    }

    pub fn unref_by(&self, object: &Arc<SchemaObject>, account: &AccountId) -> Result<UnrefOutcome> {
        self.request(|reply| Mutation::UnrefBy {
            object: Arc::clone(object),
            account: account.clone(),
            reply,
        })?
    }

    pub fn set_charged_master_memory_usage(
        &self,
        object: &Arc<SchemaObject>,
        account: &AccountId,
        usage: i64,
    ) -> Result<()> {
        self.request(|reply| Mutation::SetCharged {
            object: Arc::clone(object),
            account: account.clone(),
            usage,
            reply,
        })?
    }

    /// Reconcile charged usage with the automaton's cost model
    pub fn reconcile(&self) -> Result<ReconcileReport> {
        self.request(|reply| Mutation::Reconcile { reply })?
    }

    pub fn save_snapshot(&self, path: impl Into<PathBuf>, pretty: bool) -> Result<()> {
        let path = path.into();
        self.request(|reply| Mutation::Save { path, pretty, reply })?
    }

    pub fn load_snapshot(&self, path: impl Into<PathBuf>) -> Result<()> {
        let path = path.into();
        self.request(|reply| Mutation::Load { path, reply })?
    }

    pub fn stats(&self) -> Result<RegistryStats> {
        self.request(|reply| Mutation::Stats { reply })
    }
}

/// The writer thread owning a registry
pub struct SchemaAutomaton {
    handle: AutomatonHandle,
    thread: Option<JoinHandle<SchemaRegistry>>,
}

impl SchemaAutomaton {
    /// Start the writer thread, moving `registry` onto it
    pub fn spawn(
        registry: SchemaRegistry,
        config: &AutomatonConfig,
        cost_model: Arc<dyn MemoryCostModel>,
    ) -> Result<Self> {
        let (sender, receiver) = if config.queue_capacity == 0 {
            unbounded()
        } else {
            bounded(config.queue_capacity)
        };

        let thread = thread::Builder::new()
            .name(config.thread_name.clone())
            .spawn(move || run(registry, receiver, cost_model))?;
        debug!(thread = %config.thread_name, "Schema automaton started");

        Ok(Self {
            handle: AutomatonHandle { sender },
            thread: Some(thread),
        })
    }

    pub fn handle(&self) -> AutomatonHandle {
        self.handle.clone()
    }

    /// Stop the writer after queued mutations and take the registry back
    pub fn shutdown(mut self) -> Result<SchemaRegistry> {
        let _ = self.handle.sender.send(Mutation::Shutdown);
        let thread = self.thread.take().ok_or(SchemaError::AutomatonStopped)?;
        thread
            .join()
            .map_err(|_| SchemaError::InvariantViolation("schema automaton thread panicked".to_string()))
    }
}

impl Drop for SchemaAutomaton {
    fn drop(&mut self) {
        if let Some(thread) = self.thread.take() {
            let _ = self.handle.sender.send(Mutation::Shutdown);
            let _ = thread.join();
        }
    }
}

//! Common fixtures for dirtopo-repl integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use dirtopo_directory::{
    DirectoryClient, Dn, Entry, Filter, MemoryDirectory, Modification, Result, Scope,
};
use dirtopo_repl::{DirectoryNode, NodeInfo};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

const TRIGGER: &str = "nsds5BeginReplicaRefresh";

/// An in-memory directory that plays the server's part in long-running
/// operations.
///
/// Each base read of an agreement whose init trigger is set consumes one
/// scripted status: the trigger is cleared and the status becomes the last
/// init status. With an empty script the trigger stays set. Task entries
/// get an exit code after a configured number of reads, or never.
pub struct ScriptedDirectory {
    pub inner: MemoryDirectory,
    init_statuses: Mutex<VecDeque<String>>,
    task_exit: Option<(u32, i32)>,
    pub init_polls: AtomicU32,
    pub begins: AtomicU32,
    pub task_reads: AtomicU32,
}

impl ScriptedDirectory {
    pub fn new(instance: &str) -> Self {
        Self {
            inner: MemoryDirectory::with_server_config(instance),
            init_statuses: Mutex::new(VecDeque::new()),
            task_exit: None,
            init_polls: AtomicU32::new(0),
            begins: AtomicU32::new(0),
            task_reads: AtomicU32::new(0),
        }
    }

    /// Statuses reported by successive init polls.
    pub fn with_init_statuses<I, S>(self, statuses: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        *self.init_statuses.lock().unwrap() = statuses.into_iter().map(Into::into).collect();
        self
    }

    /// Tasks report `code` on their `reads`-th poll.
    pub fn with_task_exit(mut self, reads: u32, code: i32) -> Self {
        self.task_exit = Some((reads, code));
        self
    }

    async fn advance(&self, dn: &Dn) {
        let Some(mut entry) = self.inner.entry(dn).await else {
            return;
        };
        if entry.contains(TRIGGER) {
            self.init_polls.fetch_add(1, Ordering::SeqCst);
            let next = self.init_statuses.lock().unwrap().pop_front();
            if let Some(status) = next {
                entry.remove(TRIGGER);
                entry.set("nsds5ReplicaLastInitStatus", [status]);
                self.inner.insert(entry).await;
            }
        } else if dn.is_descendant_of(&dirtopo_repl::layout::tasks())
            && !entry.contains("nsTaskExitCode")
        {
            let reads = self.task_reads.fetch_add(1, Ordering::SeqCst) + 1;
            if let Some((after, code)) = self.task_exit {
                if reads >= after {
                    entry.set("nsTaskStatus", ["task finished"]);
                    entry.set("nsTaskExitCode", [code.to_string()]);
                    self.inner.insert(entry).await;
                }
            }
        }
    }
}

#[async_trait]
impl DirectoryClient for ScriptedDirectory {
    async fn bind(&self, dn: &Dn, password: &str) -> Result<()> {
        self.inner.bind(dn, password).await
    }

    async fn search(
        &self,
        base: &Dn,
        scope: Scope,
        filter: &Filter,
        attrs: &[&str],
    ) -> Result<Vec<Entry>> {
        if scope == Scope::Base {
            self.advance(base).await;
        }
        self.inner.search(base, scope, filter, attrs).await
    }

    async fn add(&self, entry: &Entry) -> Result<()> {
        self.inner.add(entry).await
    }

    async fn modify(&self, dn: &Dn, mods: &[Modification]) -> Result<()> {
        if mods.iter().any(|m| m.attr == TRIGGER) {
            self.begins.fetch_add(1, Ordering::SeqCst);
        }
        self.inner.modify(dn, mods).await
    }
}

pub fn suffix() -> Dn {
    Dn::parse("dc=example,dc=com").unwrap()
}

/// A node backed by a plain in-memory directory with server config seeded.
pub fn memory_node(host: &str, port: u16) -> (Arc<MemoryDirectory>, DirectoryNode) {
    let dir = Arc::new(MemoryDirectory::with_server_config(host));
    let node = DirectoryNode::new(NodeInfo::new(host, port), dir.clone());
    (dir, node)
}

/// A node backed by a scripted directory.
pub fn scripted_node(host: &str, dir: ScriptedDirectory) -> (Arc<ScriptedDirectory>, DirectoryNode) {
    let dir = Arc::new(dir);
    let node = DirectoryNode::new(NodeInfo::new(host, 389), dir.clone());
    (dir, node)
}

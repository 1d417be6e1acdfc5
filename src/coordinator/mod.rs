//! Host-side node dispatcher.
//!
//! The coordinator talks to its gateway node over the textual protocol of
//! [`crate::server`] and keeps a table of known worker nodes. Work is
//! queued as [`Task`]s with a retry budget: a task that times out loses one
//! TTL point, charges the node's QoS score and goes back to the tail of
//! the queue until the budget is spent. Idle time is filled with
//! round-robin pings so the table stays fresh. Tasks for sleeping nodes
//! are discarded unsent, except for wake-ups.
//!
//! The dispatcher does no I/O of its own: [`Dispatcher::poll`] renders the
//! next request into a text buffer for the caller to transmit, and the
//! caller feeds complete responses (or lets the deadline pass) back in.

pub mod matrix;

use core::fmt::Write as _;

use heapless::{Deque, String, Vec};

use crate::base64;
use crate::clock::Deadline;

/// Retry budget of a freshly posted task.
pub const TASK_TTL: u8 = 4;

/// Response deadline per request, in milliseconds.
pub const TASK_TIMEOUT: u32 = 1000;

/// Response deadline for wake-ups, which block for a whole listen period.
pub const WAKE_TIMEOUT: u32 = 5000;

/// Frame bytes per TPM2 push task.
pub const FRAME_CHUNK: usize = 2048;

/// Request rendering buffer; sized for a base64 frame chunk.
pub type Request = String<3072>;

/// What a task asks of its node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskKind {
    Ping,
    Start(u16),
    Pause,
    Skip,
    Stop,
    Sleep,
    Wake,
    /// Uniform dim on all three channels.
    Dim(u8),
    /// One TPM2 chunk; empty resets the remote decoder.
    Frame(Vec<u8, FRAME_CHUNK>),
}

/// One queued request with its retry budget.
#[derive(Debug, Clone)]
pub struct Task {
    pub node: u8,
    pub kind: TaskKind,
    ttl: u8,
}

impl Task {
    pub fn new(node: u8, kind: TaskKind) -> Self {
        let ttl = if kind == TaskKind::Ping { 1 } else { TASK_TTL };
        Self { node, kind, ttl }
    }

    pub fn ttl(&self) -> u8 {
        self.ttl
    }

    fn render(&self, out: &mut Request) {
        out.clear();
        match &self.kind {
            TaskKind::Ping => {
                let _ = write!(out, "PING {}\n\n", self.node);
            }
            TaskKind::Start(scene) => {
                let _ = write!(out, "START {} {}\n\n", self.node, scene);
            }
            TaskKind::Pause => {
                let _ = write!(out, "PAUSE {}\n\n", self.node);
            }
            TaskKind::Skip => {
                let _ = write!(out, "SKIP {}\n\n", self.node);
            }
            TaskKind::Stop => {
                let _ = write!(out, "STOP {}\n\n", self.node);
            }
            TaskKind::Sleep => {
                let _ = write!(out, "SLEEP {}\n\n", self.node);
            }
            TaskKind::Wake => {
                let _ = write!(out, "WAKE {}\n\n", self.node);
            }
            TaskKind::Dim(dim) => {
                let _ = write!(out, "DIM {} {} {} {}\n\n", self.node, dim, dim, dim);
            }
            TaskKind::Frame(frame) => {
                let _ = write!(out, "TPM2 {}\n", self.node);
                base64::encode(frame, out);
                let _ = out.push_str("\n\n");
            }
        }
    }
}

/// Health record of one worker node.
#[derive(Debug, Clone)]
pub struct NodeEntry {
    pub id: u8,
    qos: u8,
    asleep: bool,
    attention: bool,
    pub online: bool,
    pub vbat: Option<u16>,
    pub rssi: Option<i16>,
    pub temperature: Option<i16>,
}

impl NodeEntry {
    fn new(id: u8) -> Self {
        Self {
            id,
            qos: 50,
            asleep: false,
            attention: false,
            online: false,
            vbat: None,
            rssi: None,
            temperature: None,
        }
    }

    /// Link quality estimate, 0..=100.
    pub fn qos(&self) -> u8 {
        self.qos
    }

    pub fn asleep(&self) -> bool {
        self.asleep
    }

    /// Whether a request failed since the flag was last taken.
    pub fn take_attention(&mut self) -> bool {
        core::mem::take(&mut self.attention)
    }

    fn good_qos(&mut self) {
        self.qos = (self.qos + 1).min(100);
    }

    fn bad_qos(&mut self) {
        self.qos = self.qos.saturating_sub(10);
    }
}

/// The task queue and node table.
pub struct Dispatcher<const NODES: usize, const TASKS: usize> {
    nodes: Vec<NodeEntry, NODES>,
    tasks: Deque<Task, TASKS>,
    current: Option<Task>,
    deadline: Deadline,
    idle_index: usize,
}

impl<const NODES: usize, const TASKS: usize> Dispatcher<NODES, TASKS> {
    pub fn new() -> Self {
        Self {
            nodes: Vec::new(),
            tasks: Deque::new(),
            current: None,
            deadline: Deadline::after(0, 0),
            idle_index: 0,
        }
    }

    /// Register a node, keeping the table sorted by id. Duplicates are
    /// rejected.
    pub fn add_node(&mut self, id: u8) -> bool {
        let mut at = self.nodes.len();
        for (i, node) in self.nodes.iter().enumerate() {
            if node.id == id {
                return false;
            }

            if node.id > id {
                at = i;
                break;
            }
        }

        self.nodes.insert(at, NodeEntry::new(id)).is_ok()
    }

    /// Drop a node and every task queued for it.
    pub fn remove_node(&mut self, id: u8) {
        self.nodes.retain(|node| node.id != id);
        let mut keep: Deque<Task, TASKS> = Deque::new();
        while let Some(task) = self.tasks.pop_front() {
            if task.node != id {
                let _ = keep.push_back(task);
            }
        }
        self.tasks = keep;

        if self.current.as_ref().is_some_and(|task| task.node == id) {
            self.current = None;
        }
    }

    pub fn node(&self, id: u8) -> Option<&NodeEntry> {
        self.nodes.iter().find(|node| node.id == id)
    }

    pub fn nodes(&self) -> &[NodeEntry] {
        &self.nodes
    }

    fn node_mut(&mut self, id: u8) -> Option<&mut NodeEntry> {
        self.nodes.iter_mut().find(|node| node.id == id)
    }

    /// Queue a task at the tail.
    pub fn post(&mut self, task: Task) -> Result<(), Task> {
        self.tasks.push_back(task)
    }

    /// Queue a whole frame push: a reset task followed by the frame in
    /// chunks. Returns false when the queue overflows.
    pub fn post_frame(&mut self, node: u8, frame: &[u8]) -> bool {
        if self.post(Task::new(node, TaskKind::Frame(Vec::new()))).is_err() {
            return false;
        }

        for chunk in frame.chunks(FRAME_CHUNK) {
            let mut data = Vec::new();
            let _ = data.extend_from_slice(chunk);
            if self.post(Task::new(node, TaskKind::Frame(data))).is_err() {
                return false;
            }
        }

        true
    }

    /// Number of queued tasks, the in-flight one not included.
    pub fn backlog(&self) -> usize {
        self.tasks.len()
    }

    /// The in-flight task, if any.
    pub fn in_flight(&self) -> Option<&Task> {
        self.current.as_ref()
    }

    /// Advance the queue. When a request is due its text is rendered into
    /// `request` and true is returned; the caller transmits it and later
    /// calls [`Self::on_response`], or just keeps polling to let the
    /// deadline expire.
    pub fn poll(&mut self, now: u32, request: &mut Request) -> bool {
        if let Some(task) = self.current.take() {
            if !self.deadline.expired(now) {
                // Awaiting the response
                self.current = Some(task);
                return false;
            }

            self.timeout(task);
        }

        if self.nodes.is_empty() {
            return false;
        }

        if self.tasks.is_empty() {
            // Fill idle time with round-robin pings
            if self.idle_index >= self.nodes.len() {
                self.idle_index = 0;
            }

            let id = self.nodes[self.idle_index].id;
            self.idle_index += 1;
            let _ = self.post(Task::new(id, TaskKind::Ping));
        }

        let Some(task) = self.tasks.pop_front() else {
            return false;
        };

        // Sleeping nodes only ever get wake-ups
        let asleep = self.node(task.node).is_some_and(NodeEntry::asleep);
        if asleep && task.kind != TaskKind::Wake {
            return false;
        }

        task.render(request);
        let timeout = if task.kind == TaskKind::Wake {
            WAKE_TIMEOUT
        } else {
            TASK_TIMEOUT
        };
        self.deadline = Deadline::after(now, timeout);
        self.current = Some(task);
        true
    }

    /// Charge a timed-out task and requeue it while its budget lasts.
    fn timeout(&mut self, mut task: Task) {
        if let Some(node) = self.node_mut(task.node) {
            node.bad_qos();
        }

        if task.ttl > 0 {
            task.ttl -= 1;
        }

        if task.ttl > 0 {
            let _ = self.tasks.push_back(task);
        } else {
            log::warn!("node {}: task dropped, retries exhausted", task.node);
        }
    }

    /// Digest the response to the in-flight request.
    pub fn on_response(&mut self, text: &str) {
        let Some(task) = self.current.take() else {
            return;
        };

        let ok = text.starts_with("100");
        let Some(node) = self.node_mut(task.node) else {
            return;
        };

        match task.kind {
            TaskKind::Ping => {
                if ok {
                    node.online = true;
                    node.good_qos();
                    node.vbat = field(text, "Vbat").map(|v| v as u16);
                    node.rssi = field(text, "Rssi").map(|v| v as i16);
                    node.temperature = field(text, "Temperature").map(|v| v as i16);
                } else {
                    node.online = false;
                    node.bad_qos();
                }
            }

            TaskKind::Sleep | TaskKind::Wake => {
                if ok {
                    node.good_qos();
                    node.asleep = task.kind == TaskKind::Sleep;
                } else {
                    node.attention = true;
                    node.bad_qos();
                }
            }

            _ => {
                if ok {
                    node.good_qos();
                } else {
                    node.attention = true;
                    node.bad_qos();
                }
            }
        }
    }
}

impl<const NODES: usize, const TASKS: usize> Default for Dispatcher<NODES, TASKS> {
    fn default() -> Self {
        Self::new()
    }
}

/// Extract the integer value of a `Key: value` response line.
fn field(text: &str, key: &str) -> Option<i32> {
    for line in text.split('\n') {
        if let Some(rest) = line.strip_prefix(key) {
            let rest = rest.trim_start();
            if let Some(value) = rest.strip_prefix(':') {
                return value.trim().parse().ok();
            }
        }
    }

    None
}

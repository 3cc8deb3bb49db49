//! Routing of unit output to downstream units.
//!
//! An [`Output`] is the compact description a unit hands to `send`: nothing, a
//! single message for port 0, or one [`PortOutput`] per port. The
//! [`Dispatcher`] expands it against the sender's wiring table, resolves each
//! target through a [`FlowDirectory`] and applies the [`ClonePolicy`] so that
//! only one recipient ever holds the sender's own message object.

use crate::core::directory::FlowDirectory;
use crate::core::message::Message;
use crate::core::unit::Unit;
use std::collections::HashSet;
use std::sync::Arc;

/// The reserved keys used when none are configured: the request/response pair
/// of an HTTP exchange.
pub const DEFAULT_RESERVED_KEYS: [&str; 2] = ["req", "res"];

/// How many deliveries of a single `send` call may receive an original
/// message object rather than a copy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CloneMode {
    /// Only the first delivery of the whole call gets the original; every
    /// later delivery, of any message, gets a copy.
    #[default]
    FirstDelivery,
    /// Each distinct message object is delivered by reference once; later
    /// deliveries of that same object get copies.
    PerMessage,
}

/// Decides when a delivery is handed a copy, and what a copy shares.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClonePolicy {
    mode: CloneMode,
    reserved_keys: Vec<String>,
}

impl Default for ClonePolicy {
    fn default() -> Self {
        Self {
            mode: CloneMode::default(),
            reserved_keys: DEFAULT_RESERVED_KEYS.iter().map(|k| k.to_string()).collect(),
        }
    }
}

impl ClonePolicy {
    /// The default policy: first delivery by reference, `req`/`res` shared.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets how many deliveries may receive the original object.
    pub fn with_mode(mut self, mode: CloneMode) -> Self {
        self.mode = mode;
        self
    }

    /// Adds a top-level key whose value is shared, never duplicated, by copies.
    pub fn with_reserved_key(mut self, key: impl Into<String>) -> Self {
        let key = key.into();
        if !self.reserved_keys.contains(&key) {
            self.reserved_keys.push(key);
        }
        self
    }

    /// Empties the reserved keys, so copies share nothing that can be duplicated.
    pub fn without_reserved_keys(mut self) -> Self {
        self.reserved_keys.clear();
        self
    }

    /// The configured [`CloneMode`].
    pub fn mode(&self) -> CloneMode {
        self.mode
    }

    /// Keys whose values copies share with the original.
    pub fn reserved_keys(&self) -> &[String] {
        &self.reserved_keys
    }

    /// True when `key` is one of the reserved keys.
    pub fn is_reserved(&self, key: &str) -> bool {
        self.reserved_keys.iter().any(|k| k == key)
    }

    /// Copies `message` under this policy: reserved fields are shared, the
    /// rest duplicated.
    pub fn duplicate(&self, message: &Message) -> Message {
        message.deep_clone(|key| self.is_reserved(key))
    }
}

/// What a unit emits on one output port.
#[derive(Debug, Clone, Default)]
pub enum PortOutput {
    /// Nothing on this port.
    #[default]
    Empty,
    One(Message),
    /// Several messages, sent one after the other.
    Many(Vec<Message>),
}

impl PortOutput {
    fn into_messages(self) -> Vec<Message> {
        match self {
            PortOutput::Empty => Vec::new(),
            PortOutput::One(message) => vec![message],
            PortOutput::Many(messages) => messages,
        }
    }
}

impl From<Message> for PortOutput {
    fn from(message: Message) -> Self {
        PortOutput::One(message)
    }
}

impl From<Option<Message>> for PortOutput {
    fn from(message: Option<Message>) -> Self {
        message.map_or(PortOutput::Empty, PortOutput::One)
    }
}

impl From<Vec<Message>> for PortOutput {
    fn from(messages: Vec<Message>) -> Self {
        PortOutput::Many(messages)
    }
}

/// Everything a unit emits in one `send` call.
#[derive(Debug, Clone, Default)]
pub enum Output {
    #[default]
    Nothing,
    /// A single message on port 0.
    Single(Message),
    /// Entry `i` goes to port `i`.
    Ports(Vec<PortOutput>),
}

impl Output {
    /// Builds a per-port output from anything convertible to [`PortOutput`].
    pub fn ports<P: Into<PortOutput>>(ports: impl IntoIterator<Item = P>) -> Self {
        Output::Ports(ports.into_iter().map(Into::into).collect())
    }

    /// Flattens into `(port, message)` pairs in port order, then in the order
    /// messages were listed on each port.
    fn into_port_messages(self) -> Vec<(usize, Message)> {
        match self {
            Output::Nothing => Vec::new(),
            Output::Single(message) => vec![(0, message)],
            Output::Ports(ports) => ports
                .into_iter()
                .enumerate()
                .flat_map(|(port, output)| {
                    output
                        .into_messages()
                        .into_iter()
                        .map(move |message| (port, message))
                })
                .collect(),
        }
    }
}

impl From<Message> for Output {
    fn from(message: Message) -> Self {
        Output::Single(message)
    }
}

impl From<Option<Message>> for Output {
    fn from(message: Option<Message>) -> Self {
        message.map_or(Output::Nothing, Output::Single)
    }
}

impl From<Vec<PortOutput>> for Output {
    fn from(ports: Vec<PortOutput>) -> Self {
        Output::Ports(ports)
    }
}

/// Routes unit output to the units named in the sender's wiring table.
#[derive(Clone)]
pub struct Dispatcher {
    directory: Arc<dyn FlowDirectory>,
    policy: ClonePolicy,
}

impl Dispatcher {
    /// A dispatcher over `directory` using the default [`ClonePolicy`].
    pub fn new(directory: Arc<dyn FlowDirectory>) -> Self {
        Self {
            directory,
            policy: ClonePolicy::default(),
        }
    }

    /// Replaces the clone policy.
    pub fn with_policy(mut self, policy: ClonePolicy) -> Self {
        self.policy = policy;
        self
    }

    /// The clone policy in use.
    pub fn policy(&self) -> &ClonePolicy {
        &self.policy
    }

    /// Where target ids are resolved.
    pub fn directory(&self) -> &Arc<dyn FlowDirectory> {
        &self.directory
    }

    /// Delivers `output` from `source` and returns how many deliveries were made.
    ///
    /// Ports beyond the sender's wiring and ids the directory does not know
    /// are skipped silently. Copies are taken before anything is delivered, so
    /// a recipient that mutates its message cannot leak into a later copy.
    pub fn send(&self, source: &Unit, output: impl Into<Output>) -> usize {
        let deliveries = self.resolve(source, output.into());
        let count = deliveries.len();

        for (target, message) in deliveries {
            target.receive(message);
        }

        if count > 0 {
            log::debug!("Unit {} dispatched {} message(s)", source.id(), count);
        }
        count
    }

    fn resolve(&self, source: &Unit, output: Output) -> Vec<(Arc<Unit>, Message)> {
        let mut deliveries = Vec::new();
        let mut delivered: HashSet<*const ()> = HashSet::new();
        let mut any_delivered = false;

        for (port, message) in output.into_port_messages() {
            let Some(targets) = source.wires().get(port) else {
                log::trace!(
                    "Unit {} has no port {}; dropping message",
                    source.id(),
                    port
                );
                continue;
            };

            for target_id in targets {
                let Some(target) = self.directory.get(target_id) else {
                    log::trace!(
                        "Unit {} is wired to unknown unit {}; skipping",
                        source.id(),
                        target_id
                    );
                    continue;
                };

                let by_reference = match self.policy.mode {
                    CloneMode::FirstDelivery => !any_delivered,
                    CloneMode::PerMessage => delivered.insert(message.identity()),
                };
                any_delivered = true;

                let message = if by_reference {
                    message.clone()
                } else {
                    self.policy.duplicate(&message)
                };
                deliveries.push((target, message));
            }
        }

        deliveries
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

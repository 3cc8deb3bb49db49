use crate::core::config::UnitConfig;
use crate::core::diagnostics::{LogLevel, LogRecord};
use crate::core::dispatch::{Dispatcher, Output};
use crate::core::lifecycle::{self, CloseReason, Closing, Done, ShutdownHandler};
use crate::core::message::Message;
use crate::core::status::{Status, StatusBus, status_topic};
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};

type InputListener = Arc<dyn Fn(Message) + Send + Sync>;
type LogListener = Arc<dyn Fn(&LogRecord) + Send + Sync>;

/// An addressable node of the flow graph.
///
/// A unit knows who it is and where its output ports lead; its behaviour is
/// whatever the surrounding code registers through [`on_input`](Unit::on_input),
/// [`on_close`](Unit::on_close) and [`on_log`](Unit::on_log).
pub struct Unit {
    id: String,
    unit_type: String,
    name: Option<String>,
    wires: Vec<Vec<String>>,
    input_listeners: RwLock<Vec<InputListener>>,
    close_handlers: RwLock<Vec<ShutdownHandler>>,
    log_listeners: RwLock<Vec<LogListener>>,
}

impl Unit {
    /// Creates a new unit from its definition. Nothing is validated here;
    /// id uniqueness belongs to whoever keeps the directory.
    pub fn new(config: UnitConfig) -> Self {
        Unit {
            id: config.id,
            unit_type: config.unit_type,
            name: config.name,
            wires: config.wires,
            input_listeners: RwLock::new(Vec::new()),
            close_handlers: RwLock::new(Vec::new()),
            log_listeners: RwLock::new(Vec::new()),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn unit_type(&self) -> &str {
        &self.unit_type
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// The wiring table: one entry per output port, each listing target ids.
    pub fn wires(&self) -> &[Vec<String>] {
        &self.wires
    }

    pub fn port_count(&self) -> usize {
        self.wires.len()
    }

    // ------------------------------------------------------------------------
    // Event registration
    // ------------------------------------------------------------------------

    /// Registers a listener for delivered messages.
    pub fn on_input<F>(&self, listener: F)
    where
        F: Fn(Message) + Send + Sync + 'static,
    {
        self.input_listeners
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Arc::new(listener));
    }

    /// Registers a synchronous shutdown handler.
    pub fn on_close<F>(&self, handler: F)
    where
        F: Fn(CloseReason) + Send + Sync + 'static,
    {
        self.add_shutdown_handler(ShutdownHandler::sync(handler));
    }

    /// Registers an asynchronous shutdown handler. It must eventually call
    /// [`Done::done`] or the unit's close never settles.
    pub fn on_close_async<F>(&self, handler: F)
    where
        F: Fn(CloseReason, Done) + Send + Sync + 'static,
    {
        self.add_shutdown_handler(ShutdownHandler::with_done(handler));
    }

    pub fn add_shutdown_handler(&self, handler: ShutdownHandler) {
        self.close_handlers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(handler);
    }

    /// Registers a sink for this unit's diagnostics.
    pub fn on_log<F>(&self, listener: F)
    where
        F: Fn(&LogRecord) + Send + Sync + 'static,
    {
        self.log_listeners
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Arc::new(listener));
    }

    // ------------------------------------------------------------------------
    // Messaging
    // ------------------------------------------------------------------------

    /// Hands `message`, untouched, to every input listener.
    pub fn receive(&self, message: Message) {
        // Snapshot so a listener can register more listeners or re-enter us.
        let listeners = self
            .input_listeners
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        for listener in listeners {
            listener(message.clone());
        }
    }

    /// Emits `output` along this unit's wires. Returns the number of deliveries.
    pub fn send(&self, dispatcher: &Dispatcher, output: impl Into<Output>) -> usize {
        dispatcher.send(self, output)
    }

    // ------------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------------

    /// Runs the shutdown handlers in registration order.
    ///
    /// Returns `None` when every handler is synchronous (they have all run by
    /// the time this returns), otherwise a [`Closing`] that resolves once each
    /// asynchronous handler has called its [`Done`].
    pub fn close(&self, reason: CloseReason) -> Option<Closing> {
        log::debug!("Closing unit {} ({:?})", self.id, reason);
        let handlers = self
            .close_handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        lifecycle::run_shutdown(&self.id, &handlers, reason)
    }

    // ------------------------------------------------------------------------
    // Diagnostics & status
    // ------------------------------------------------------------------------

    pub fn log(&self, msg: impl Into<String>) {
        self.emit(LogLevel::Log, msg.into());
    }

    pub fn warn(&self, msg: impl Into<String>) {
        self.emit(LogLevel::Warn, msg.into());
    }

    pub fn error(&self, msg: impl Into<String>) {
        self.emit(LogLevel::Error, msg.into());
    }

    fn emit(&self, level: LogLevel, msg: String) {
        let record = LogRecord {
            level,
            id: self.id.clone(),
            unit_type: self.unit_type.clone(),
            name: self.name.clone(),
            msg,
        };
        let listeners = self
            .log_listeners
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        for listener in listeners {
            listener(&record);
        }
    }

    /// Publishes `descriptor` as this unit's retained status.
    pub fn status(&self, bus: &dyn StatusBus, descriptor: Status) {
        bus.publish(&status_topic(&self.id), descriptor, true);
    }
}

impl From<UnitConfig> for Unit {
    fn from(config: UnitConfig) -> Self {
        Unit::new(config)
    }
}

impl fmt::Debug for Unit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Unit")
            .field("id", &self.id)
            .field("type", &self.unit_type)
            .field("name", &self.name)
            .field("wires", &self.wires)
            .finish_non_exhaustive()
    }
}

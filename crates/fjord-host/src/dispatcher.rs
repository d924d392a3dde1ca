//! Handler registry and synchronous event dispatch.
//!
//! Handlers run on whichever thread calls `Host::service`, in registration
//! order. Global receive handlers run before channel-specific ones.
//! Registering a handler from inside a handler deadlocks: the host holds the
//! dispatcher for reading while dispatching.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use fjord_transport::ChannelId;

use crate::event::{ConnectEvent, DisconnectEvent, Event, ReceiveEvent};

type ConnectHandler = Box<dyn Fn(&ConnectEvent) + Send + Sync>;
type DisconnectHandler = Box<dyn Fn(&DisconnectEvent) + Send + Sync>;
type ReceiveHandler = Box<dyn Fn(&ReceiveEvent) + Send + Sync>;

/// Object-style handler. Implement only the callbacks you care about.
pub trait EventHandler: Send + Sync {
    fn on_connect(&self, _event: &ConnectEvent) {}
    fn on_disconnect(&self, _event: &DisconnectEvent) {}
    fn on_receive(&self, _event: &ReceiveEvent) {}
}

#[derive(Default)]
pub struct EventDispatcher {
    connect: Vec<ConnectHandler>,
    disconnect: Vec<DisconnectHandler>,
    receive: Vec<ReceiveHandler>,
    channel_receive: HashMap<ChannelId, Vec<ReceiveHandler>>,
}

impl EventDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_connect<F>(&mut self, handler: F)
    where
        F: Fn(&ConnectEvent) + Send + Sync + 'static,
    {
        self.connect.push(Box::new(handler));
    }

    pub fn on_disconnect<F>(&mut self, handler: F)
    where
        F: Fn(&DisconnectEvent) + Send + Sync + 'static,
    {
        self.disconnect.push(Box::new(handler));
    }

    pub fn on_receive<F>(&mut self, handler: F)
    where
        F: Fn(&ReceiveEvent) + Send + Sync + 'static,
    {
        self.receive.push(Box::new(handler));
    }

    /// Handler for packets on one channel only
    pub fn on_channel_receive<F>(&mut self, channel: ChannelId, handler: F)
    where
        F: Fn(&ReceiveEvent) + Send + Sync + 'static,
    {
        self.channel_receive
            .entry(channel)
            .or_default()
            .push(Box::new(handler));
    }

    /// Register all three callbacks of `handler`.
    pub fn add_handler(&mut self, handler: Arc<dyn EventHandler>) {
        let h = Arc::clone(&handler);
        self.on_connect(move |e| h.on_connect(e));
        let h = Arc::clone(&handler);
        self.on_disconnect(move |e| h.on_disconnect(e));
        self.on_receive(move |e| handler.on_receive(e));
    }

    pub fn clear_handlers(&mut self) {
        self.connect.clear();
        self.disconnect.clear();
        self.receive.clear();
        self.channel_receive.clear();
    }

    pub fn dispatch(&self, event: &Event) {
        match event {
            Event::Connect(e) => self.dispatch_connect(e),
            Event::Disconnect(e) => self.dispatch_disconnect(e),
            Event::Receive(e) => self.dispatch_receive(e),
        }
    }

    pub fn dispatch_connect(&self, event: &ConnectEvent) {
        for handler in &self.connect {
            handler(event);
        }
    }

    pub fn dispatch_disconnect(&self, event: &DisconnectEvent) {
        for handler in &self.disconnect {
            handler(event);
        }
    }

    pub fn dispatch_receive(&self, event: &ReceiveEvent) {
        for handler in &self.receive {
            handler(event);
        }
        if let Some(handlers) = self.channel_receive.get(&event.channel) {
            for handler in handlers {
                handler(event);
            }
        }
    }

    /// Total registered callbacks, channel handlers included
    pub fn handler_count(&self) -> usize {
        self.connect.len()
            + self.disconnect.len()
            + self.receive.len()
            + self.channel_receive.values().map(Vec::len).sum::<usize>()
    }
}

impl fmt::Debug for EventDispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventDispatcher")
            .field("connect", &self.connect.len())
            .field("disconnect", &self.disconnect.len())
            .field("receive", &self.receive.len())
            .field("channels", &self.channel_receive.len())
            .finish()
    }
}

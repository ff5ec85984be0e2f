use std::sync::Arc;

use crate::events::{ConnectResult, Event, Message, ResubscribeError, SubscribeResult};
use crate::topic;
use crate::ConnectionError;

type Handler<T> = Box<dyn FnMut(T) + Send>;
/// Handler for messages of one subscription
pub type MessageHandler = Box<dyn FnMut(Message) + Send>;

/// Event handlers, at most one per event.
///
/// Handlers run on the client's callback thread, one at a time and in the
/// order the events occurred. State shared with the rest of the program has
/// to be captured by the closures.
#[derive(Default)]
pub struct Callbacks {
    on_connection_success: Option<Handler<ConnectResult>>,
    on_connection_failure: Option<Handler<Arc<ConnectionError>>>,
    on_connection_interrupted: Option<Handler<Arc<ConnectionError>>>,
    on_connection_resumed: Option<Handler<ConnectResult>>,
    on_connection_closed: Option<Box<dyn FnMut() + Send>>,
    on_resubscribe_complete: Option<Handler<Result<Vec<SubscribeResult>, ResubscribeError>>>,
    on_message: Option<Handler<Message>>,
}

impl Callbacks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_connection_success(mut self, f: impl FnMut(ConnectResult) + Send + 'static) -> Self {
        self.on_connection_success = Some(Box::new(f));
        self
    }

    pub fn on_connection_failure(
        mut self,
        f: impl FnMut(Arc<ConnectionError>) + Send + 'static,
    ) -> Self {
        self.on_connection_failure = Some(Box::new(f));
        self
    }

    pub fn on_connection_interrupted(
        mut self,
        f: impl FnMut(Arc<ConnectionError>) + Send + 'static,
    ) -> Self {
        self.on_connection_interrupted = Some(Box::new(f));
        self
    }

    pub fn on_connection_resumed(mut self, f: impl FnMut(ConnectResult) + Send + 'static) -> Self {
        self.on_connection_resumed = Some(Box::new(f));
        self
    }

    pub fn on_connection_closed(mut self, f: impl FnMut() + Send + 'static) -> Self {
        self.on_connection_closed = Some(Box::new(f));
        self
    }

    pub fn on_resubscribe_complete(
        mut self,
        f: impl FnMut(Result<Vec<SubscribeResult>, ResubscribeError>) + Send + 'static,
    ) -> Self {
        self.on_resubscribe_complete = Some(Box::new(f));
        self
    }

    /// Receives messages that no subscription handler matches
    pub fn on_message(mut self, f: impl FnMut(Message) + Send + 'static) -> Self {
        self.on_message = Some(Box::new(f));
        self
    }
}

/// Work item for the callback thread
pub(crate) enum Dispatch {
    Event(Event),
    /// Route messages matching `filter` to `handler`, replacing any previous one
    Register {
        filter: String,
        handler: MessageHandler,
    },
    Unregister(String),
    /// Forget every subscription handler
    Clear,
}

impl std::fmt::Debug for Dispatch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Dispatch::Event(event) => f.debug_tuple("Event").field(event).finish(),
            Dispatch::Register { filter, .. } => f.debug_struct("Register").field("filter", filter).finish(),
            Dispatch::Unregister(filter) => f.debug_tuple("Unregister").field(filter).finish(),
            Dispatch::Clear => f.write_str("Clear"),
        }
    }
}

/// Owns the callbacks and runs them on the callback thread
pub(crate) struct Dispatcher {
    callbacks: Callbacks,
    /// Subscription handlers in subscription order
    handlers: Vec<(String, MessageHandler)>,
}

impl Dispatcher {
    pub fn new(callbacks: Callbacks) -> Self {
        Self {
            callbacks,
            handlers: Vec::new(),
        }
    }

    /// Runs until the event loop drops its end of the channel
    pub fn run(mut self, rx: flume::Receiver<Dispatch>) {
        for dispatch in rx.iter() {
            self.dispatch(dispatch);
        }
        log::debug!("Callback thread done");
    }

    pub fn dispatch(&mut self, dispatch: Dispatch) {
        match dispatch {
            Dispatch::Event(event) => self.handle_event(event),
            Dispatch::Register { filter, handler } => {
                match self.handlers.iter_mut().find(|(f, _)| *f == filter) {
                    Some((_, h)) => *h = handler,
                    None => self.handlers.push((filter, handler)),
                }
            }
            Dispatch::Unregister(filter) => self.handlers.retain(|(f, _)| *f != filter),
            Dispatch::Clear => self.handlers.clear(),
        }
    }

    fn handle_event(&mut self, event: Event) {
        let callbacks = &mut self.callbacks;
        match event {
            Event::ConnectionSuccess(result) => call(&mut callbacks.on_connection_success, result),
            Event::ConnectionFailure(e) => call(&mut callbacks.on_connection_failure, e),
            Event::ConnectionInterrupted(e) => call(&mut callbacks.on_connection_interrupted, e),
            Event::ConnectionResumed(result) => call(&mut callbacks.on_connection_resumed, result),
            Event::ConnectionClosed => {
                if let Some(f) = &mut callbacks.on_connection_closed {
                    f();
                }
            }
            Event::ResubscribeComplete(result) => {
                call(&mut callbacks.on_resubscribe_complete, result)
            }
            Event::MessageReceived(message) => self.route(message),
        }
    }

    /// Hands the message to every matching subscription handler, or to the
    /// connection level handler when none matches
    fn route(&mut self, message: Message) {
        let mut matched = self
            .handlers
            .iter_mut()
            .filter(|(filter, _)| topic::matches(filter, &message.topic))
            .map(|(_, handler)| handler)
            .peekable();

        if matched.peek().is_none() {
            call(&mut self.callbacks.on_message, message);
            return;
        }

        for handler in matched {
            handler(message.clone());
        }
    }
}

fn call<T>(handler: &mut Option<Handler<T>>, arg: T) {
    if let Some(f) = handler {
        f(arg);
    }
}

use ingestcore::types::{RecipientId, ThreadId};
use std::sync::Arc;
use tokio::sync::broadcast;

const CHANNEL_CAPACITY: usize = 100;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversationUpdated {
    pub thread: ThreadId,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypingUpdate {
    pub thread: ThreadId,
    pub author: RecipientId,
    pub device: u32,
    pub started: bool,
}

/// A session with the recipient was reset or its identity was re-verified.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecurityEvent {
    pub recipient: RecipientId,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    ConversationUpdated(ConversationUpdated),
    Typing(TypingUpdate),
    Security(SecurityEvent),
}

macro_rules! define_event_bus {
    ($(($field:ident, $variant:ident, $type:ty)),* $(,)?) => {
        /// One broadcast channel per notification kind. Sends never block and
        /// are dropped when nobody is subscribed.
        #[derive(Debug)]
        pub struct EventBus {
            $(
                pub $field: broadcast::Sender<Arc<$type>>,
            )*
        }

        impl EventBus {
            pub fn new() -> Self {
                Self {
                    $(
                        $field: broadcast::channel(CHANNEL_CAPACITY).0,
                    )*
                }
            }

            pub fn dispatch(&self, event: Event) {
                match event {
                    $(
                        Event::$variant(inner) => {
                            // Err only means nobody is subscribed.
                            self.$field.send(Arc::new(inner)).ok();
                        }
                    )*
                }
            }
        }
    };
}

define_event_bus! {
    (conversation_updated, ConversationUpdated, ConversationUpdated),
    (typing, Typing, TypingUpdate),
    (security, Security, SecurityEvent),
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

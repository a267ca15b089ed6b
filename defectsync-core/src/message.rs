//! Operator messages destined for the replication log.
//!
//! A connector holds at most one pending message (e.g. the segment filter
//! it just compiled); the host drains it between operations. Draining never
//! touches the backend.

/// Severity the host needs to decide whether to log the message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum MessageLevel {
    Error,
    Warn,
    Info,
    Debug,
}

/// One message for the replication log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperatorMessage {
    pub text: String,
    pub level: MessageLevel,
}

impl OperatorMessage {
    pub fn info(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            level: MessageLevel::Info,
        }
    }

    pub fn warn(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            level: MessageLevel::Warn,
        }
    }
}

/// Single-message mailbox; a newer message replaces an undrained one.
#[derive(Debug, Clone, Default)]
pub struct MessageSlot(Option<OperatorMessage>);

impl MessageSlot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, message: OperatorMessage) {
        self.0 = Some(message);
    }

    pub fn take(&mut self) -> Option<OperatorMessage> {
        self.0.take()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn take_drains_the_slot() {
        let mut slot = MessageSlot::new();
        slot.set(OperatorMessage::info("segment filter is: (a='b')"));
        assert!(slot.take().is_some());
        assert!(slot.take().is_none());
    }

    #[test]
    fn newer_message_replaces_older() {
        let mut slot = MessageSlot::new();
        slot.set(OperatorMessage::info("first"));
        slot.set(OperatorMessage::warn("second"));
        let message = slot.take().unwrap();
        assert_eq!(message.text, "second");
        assert_eq!(message.level, MessageLevel::Warn);
    }
}

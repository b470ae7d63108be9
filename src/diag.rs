//! Warnings for conditions that are locally repaired rather than raised: an
//! abandoned dictionary edit, an xref fallback scan, a stripped multipart
//! wrapper. Production code forwards them to `log`; tests install a
//! recording sink to assert on them.

use std::{cell::RefCell, rc::Rc};

pub trait DiagnosticSink {
    fn warn(&self, message: &str);
}

/// Default sink
pub struct LogSink;

impl DiagnosticSink for LogSink {
    fn warn(&self, message: &str) {
        log::warn!("{}", message);
    }
}

/// Collects warnings in memory
#[derive(Default, Clone)]
pub struct RecordingSink {
    messages: Rc<RefCell<Vec<String>>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn messages(&self) -> Vec<String> {
        self.messages.borrow().clone()
    }
}

impl DiagnosticSink for RecordingSink {
    fn warn(&self, message: &str) {
        self.messages.borrow_mut().push(message.to_owned());
    }
}

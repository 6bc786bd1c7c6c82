//! The conversational agent description bound to a session.

/// Immutable persona and behavior description for one agent. Supplied
/// once at construction and used as the system turn of every completion.
#[derive(Clone, Debug)]
pub struct Agent {
    instructions: String,
}

impl Agent {
    pub fn new(instructions: impl Into<String>) -> Self {
        Self {
            instructions: instructions.into(),
        }
    }

    pub fn instructions(&self) -> &str {
        &self.instructions
    }
}

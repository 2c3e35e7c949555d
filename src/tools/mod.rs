//! Tools the assistant can invoke mid-conversation

mod executor;
mod memory;

pub use executor::{Capability, ToolCallExecutor, ToolInvocation};
pub use memory::{HttpMemoryStore, InMemoryStore, MemoryRecord, MemoryStore};

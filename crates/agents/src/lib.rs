//! Persona registry
//!
//! Owner-scoped CRUD for agents and their document links, plus the built-in
//! personas seeded once at schema setup. The retrieval core consumes only
//! the link table; everything else here serves the persona picker.

pub mod registry;
pub mod templates;

pub use registry::AgentRegistry;
pub use templates::{builtin_templates, PersonaTemplate};

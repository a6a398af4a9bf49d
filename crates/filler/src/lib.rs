//! docfill Filler Library
//!
//! Fills `<placeholder>` tokens in template documents:
//! 1. Extracts placeholders depth-first, classifying each as table or section
//! 2. Retrieves fused chunks for the token across every source collection
//! 3. Generates replacement text sized to the placeholder's context
//! 4. Substitutes the text back, expanding into extra paragraphs as needed
//!
//! `TaskOrchestrator` runs this per file as a tracked background task.

pub mod generator;
pub mod orchestrator;
pub mod placeholder;
pub mod substitution;
pub mod templates;

pub use generator::{ContentGenerator, Guidance};
pub use orchestrator::{FillRequest, OrchestratorDeps, OrchestratorSettings, TaskOrchestrator};
pub use placeholder::{extract_placeholders, Placeholder, PlaceholderContext};
pub use substitution::substitute;
pub use templates::{FsTemplateRepository, InMemoryTemplateRepository, TemplateRepository};

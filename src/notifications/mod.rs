pub mod models;
pub mod senders;
pub mod templates;

pub use models::{Attachment, AttachmentContent, RenderedMessage};
pub use templates::{AlertKind, MessageContext, TemplateEngine, TemplateError, UnknownHost};

pub mod auth;
pub mod signature;
pub mod validation;

// Re-export commonly used items
pub use auth::{authorize, AuthContext, ClientAuth, CredentialSource, Credentials, Role};
pub use signature::{compute_signature, verify_signature};
pub use validation::{pretty_attachment_name, sanitize_filename};

//! Typed views over the raw node tree.

pub mod directory;
pub mod endpoints;
pub mod locks;
pub mod managers;
pub mod registration;

pub use directory::EndpointDirectory;
pub use endpoints::EndpointRecords;
pub use locks::IpLocks;
pub use managers::ManagerRecords;
pub use registration::{RegistrationInbox, SessionDrops};

pub mod analytics;
pub mod consent;
pub mod message;
pub mod session;
pub mod session_event;
pub mod shared_file;

pub use analytics::{AnalyticsRepository, AnalyticsRepositoryTrait};
pub use consent::{ConsentRepository, ConsentRepositoryTrait};
pub use message::{MessageRepository, MessageRepositoryTrait};
pub use session::{SessionListFilters, SessionRepository, SessionRepositoryTrait};
pub use session_event::{SessionEventRepository, SessionEventRepositoryTrait};
pub use shared_file::{FileRepository, FileRepositoryTrait};

#[cfg(test)]
pub use analytics::MockAnalyticsRepositoryTrait;
#[cfg(test)]
pub use consent::MockConsentRepositoryTrait;
#[cfg(test)]
pub use message::MockMessageRepositoryTrait;
#[cfg(test)]
pub use session::MockSessionRepositoryTrait;
#[cfg(test)]
pub use session_event::MockSessionEventRepositoryTrait;
#[cfg(test)]
pub use shared_file::MockFileRepositoryTrait;

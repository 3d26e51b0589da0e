pub mod analytics;
pub mod chat;
pub mod consent;
pub mod session;

pub use analytics::AnalyticsService;
pub use chat::ChatService;
pub use consent::ConsentService;
pub use session::SessionService;

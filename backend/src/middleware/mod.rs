pub mod auth;
pub mod request_id;

pub use auth::{auth, Claims, Principal};
pub use request_id::{request_id, RequestId};

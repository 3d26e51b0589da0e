mod id;

pub use id::{ConsentId, DoctorId, FileId, MessageId, PatientId, TenantId};

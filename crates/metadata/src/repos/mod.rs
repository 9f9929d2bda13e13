//! Repository traits for metadata operations.

pub mod access_log;
pub mod exams;
pub mod media;
pub mod shares;
pub mod users;

pub use access_log::AccessLogRepo;
pub use exams::ExamRepo;
pub use media::MediaRepo;
pub use shares::{ShareListFilter, ShareRepo, ShareStats};
pub use users::UserRepo;

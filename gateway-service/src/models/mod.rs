pub mod audit;
pub mod session;
pub mod submission;
pub mod verdict;

pub use audit::{
    AccessLogEntry, AccessLogRecord, AuditWrite, ContentHashRecord, FileType, LegacyLogRecord,
    UNKNOWN_RESULT,
};
pub use session::{
    SessionError, SessionState, SessionStatus, VerificationOutcome, VerificationSession,
};
pub use submission::{Submission, UploadedFile};
pub use verdict::{Classification, Verdict};

//! Upload tracking and the caller-facing service surface.

mod service;
mod session;
mod tracker;

pub use service::{UploadOutcome, UploadRequest, UploadService};
pub use session::{MultipartUploadSession, NewSession, SessionRepository, UploadStatus};
pub use tracker::{MultipartUploadTracker, MAX_PARTS};

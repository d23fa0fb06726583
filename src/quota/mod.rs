//! Quota accounting for Stowage.
//!
//! The ledger holds durable per-subject counters; the reservation
//! protocol is the only mutation path used by uploads.

mod ledger;
mod reservation;

pub use ledger::{QuotaRepository, QuotaSubject, StorageQuota, SubjectType};
pub use reservation::ReservationProtocol;

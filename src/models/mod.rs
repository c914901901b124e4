pub mod booking;
pub mod closed_period;
pub mod local;
pub mod smtp_provider;
pub mod timetable;
pub mod worker;

pub use booking::{Booking, BookingStatus};
pub use closed_period::ClosedPeriod;
pub use local::{Local, LocalSettings};
pub use smtp_provider::{QuotaClaim, SmtpProvider, SmtpSecurity};
pub use timetable::{Timetable, TimetableSlot};
pub use worker::{Service, WorkGroup, Worker};

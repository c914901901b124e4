pub mod allocator;
pub mod availability;
pub mod bookings;
pub mod calendar;
pub mod expiry;
pub mod notifications;
pub mod reaper;
pub mod tokens;

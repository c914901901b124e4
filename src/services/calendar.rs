use crate::models::{Booking, BookingStatus, Local, Service};

const ICS_FORMAT: &str = "%Y%m%dT%H%M%SZ";

/// Renders a booking as a single-event iCalendar document. Times are written in UTC so
/// calendar clients convert them to the reader's zone.
pub fn generate_ics(booking: &Booking, local: &Local, services: &[Service]) -> String {
    let dtstart = booking.datetime_init.format(ICS_FORMAT);
    let dtend = booking.datetime_end.format(ICS_FORMAT);
    let dtstamp = booking.updated_at.format(ICS_FORMAT);
    let uid = format!("{}@localbook", booking.id);
    // Bumped on every write so clients replace the earlier copy of the event.
    let sequence = (booking.updated_at - booking.created_at).num_seconds().max(0);

    let (method, status) = match booking.status {
        BookingStatus::Cancelled => ("CANCEL", "CANCELLED"),
        BookingStatus::Pending => ("REQUEST", "TENTATIVE"),
        BookingStatus::Confirmed | BookingStatus::Done => ("REQUEST", "CONFIRMED"),
    };

    let summary = escape(&format!("Appointment at {}", local.name));
    let description = if services.is_empty() {
        "No services listed".to_string()
    } else {
        escape(
            &services
                .iter()
                .map(|s| s.name.as_str())
                .collect::<Vec<_>>()
                .join(", "),
        )
    };
    let location = escape(&local.address);

    format!(
        "BEGIN:VCALENDAR\r\n\
         VERSION:2.0\r\n\
         PRODID:-//Localbook//Bookings//EN\r\n\
         METHOD:{method}\r\n\
         BEGIN:VEVENT\r\n\
         UID:{uid}\r\n\
         SEQUENCE:{sequence}\r\n\
         DTSTAMP:{dtstamp}\r\n\
         DTSTART:{dtstart}\r\n\
         DTEND:{dtend}\r\n\
         STATUS:{status}\r\n\
         SUMMARY:{summary}\r\n\
         DESCRIPTION:{description}\r\n\
         LOCATION:{location}\r\n\
         END:VEVENT\r\n\
         END:VCALENDAR\r\n"
    )
}

fn escape(text: &str) -> String {
    text.replace('\\', "\\\\")
        .replace(';', "\\;")
        .replace(',', "\\,")
        .replace('\n', "\\n")
}

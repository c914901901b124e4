use chrono::{NaiveTime, Weekday};
use serde::{Deserialize, Serialize};

/// A recurring weekly opening interval.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimetableSlot {
    pub local_id: String,
    pub weekday: Weekday,
    pub opening_time: NaiveTime,
    pub closing_time: NaiveTime,
}

impl TimetableSlot {
    pub fn new(local_id: &str, weekday: Weekday, opening: NaiveTime, closing: NaiveTime) -> Self {
        Self {
            local_id: local_id.to_string(),
            weekday,
            opening_time: opening,
            closing_time: closing,
        }
    }

    pub fn contains(&self, start: NaiveTime, end: NaiveTime) -> bool {
        self.opening_time <= start && self.closing_time >= end
    }

    pub fn overlaps(&self, other: &TimetableSlot) -> bool {
        self.weekday == other.weekday
            && self.opening_time < other.closing_time
            && other.opening_time < self.closing_time
    }
}

/// The slots of one local, usually narrowed to a single weekday.
#[derive(Debug, Clone, Default)]
pub struct Timetable {
    pub slots: Vec<TimetableSlot>,
}

impl Timetable {
    pub fn new(slots: Vec<TimetableSlot>) -> Self {
        Self { slots }
    }

    /// True when a single slot of `weekday` covers `[start, end]`.
    pub fn covers(&self, weekday: Weekday, start: NaiveTime, end: NaiveTime) -> bool {
        self.slots
            .iter()
            .any(|slot| slot.weekday == weekday && slot.contains(start, end))
    }

    pub fn to_human_readable(&self) -> String {
        let mut sorted = self.slots.clone();
        sorted.sort_by_key(|s| (s.weekday.num_days_from_monday(), s.opening_time));

        sorted
            .iter()
            .map(|s| {
                format!(
                    "{}: {}-{}",
                    weekday_name(s.weekday),
                    s.opening_time.format("%H:%M"),
                    s.closing_time.format("%H:%M")
                )
            })
            .collect::<Vec<_>>()
            .join(", ")
    }
}

pub fn weekday_name(day: Weekday) -> &'static str {
    match day {
        Weekday::Mon => "Mon",
        Weekday::Tue => "Tue",
        Weekday::Wed => "Wed",
        Weekday::Thu => "Thu",
        Weekday::Fri => "Fri",
        Weekday::Sat => "Sat",
        Weekday::Sun => "Sun",
    }
}

/// Storage index, Monday = 0.
pub fn weekday_index(day: Weekday) -> i64 {
    i64::from(day.num_days_from_monday())
}

pub fn weekday_from_index(idx: i64) -> Option<Weekday> {
    match idx {
        0 => Some(Weekday::Mon),
        1 => Some(Weekday::Tue),
        2 => Some(Weekday::Wed),
        3 => Some(Weekday::Thu),
        4 => Some(Weekday::Fri),
        5 => Some(Weekday::Sat),
        6 => Some(Weekday::Sun),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn t(s: &str) -> NaiveTime {
        NaiveTime::parse_from_str(s, "%H:%M").unwrap()
    }

    fn monday_split() -> Timetable {
        Timetable::new(vec![
            TimetableSlot::new("l1", Weekday::Mon, t("10:00"), t("15:00")),
            TimetableSlot::new("l1", Weekday::Mon, t("16:00"), t("20:00")),
        ])
    }

    #[test]
    fn test_covers_requires_single_slot() {
        let timetable = monday_split();
        assert!(timetable.covers(Weekday::Mon, t("10:00"), t("15:00")));
        assert!(timetable.covers(Weekday::Mon, t("16:00"), t("17:30")));
        assert!(!timetable.covers(Weekday::Mon, t("14:40"), t("16:10")));
        assert!(!timetable.covers(Weekday::Mon, t("09:30"), t("10:30")));
    }

    #[test]
    fn test_covers_wrong_day() {
        assert!(!monday_split().covers(Weekday::Tue, t("11:00"), t("12:00")));
    }

    #[test]
    fn test_slot_overlap() {
        let a = TimetableSlot::new("l1", Weekday::Mon, t("10:00"), t("15:00"));
        let b = TimetableSlot::new("l1", Weekday::Mon, t("15:00"), t("18:00"));
        let c = TimetableSlot::new("l1", Weekday::Mon, t("14:00"), t("18:00"));
        assert!(!a.overlaps(&b));
        assert!(a.overlaps(&c));
    }

    #[test]
    fn test_weekday_index_roundtrip() {
        for idx in 0..7 {
            let day = weekday_from_index(idx).unwrap();
            assert_eq!(weekday_index(day), idx);
        }
        assert!(weekday_from_index(7).is_none());
    }

    #[test]
    fn test_to_human_readable() {
        let timetable = Timetable::new(vec![
            TimetableSlot::new("l1", Weekday::Fri, t("10:00"), t("16:00")),
            TimetableSlot::new("l1", Weekday::Mon, t("16:00"), t("20:00")),
            TimetableSlot::new("l1", Weekday::Mon, t("09:00"), t("13:00")),
        ]);
        assert_eq!(
            timetable.to_human_readable(),
            "Mon: 09:00-13:00, Mon: 16:00-20:00, Fri: 10:00-16:00"
        );
    }

    #[test]
    fn test_to_human_readable_empty() {
        assert_eq!(Timetable::default().to_human_readable(), "");
    }
}

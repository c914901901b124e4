//! Reference records owned by the tenant CRUD layer. The booking core only reads them,
//! apart from closed-period garbage collection; the writers exist for seeding.

use anyhow::Context;
use chrono::{DateTime, Utc, Weekday};
use rusqlite::{params, Connection, OptionalExtension};

use super::{fmt_datetime, fmt_time, parse_datetime, parse_time};
use crate::models::timetable::{weekday_from_index, weekday_index};
use crate::models::{ClosedPeriod, Local, LocalSettings, Service, TimetableSlot, WorkGroup, Worker};

// ── Locals ──

pub fn insert_local(conn: &Connection, local: &Local) -> anyhow::Result<()> {
    conn.execute(
        "INSERT INTO locals (id, name, email, phone, address, timezone, api_token)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            local.id,
            local.name,
            local.email,
            local.phone,
            local.address,
            local.timezone,
            local.api_token,
        ],
    )?;
    Ok(())
}

pub fn get_local(conn: &Connection, id: &str) -> anyhow::Result<Option<Local>> {
    let local = conn
        .query_row(
            "SELECT id, name, email, phone, address, timezone, api_token FROM locals WHERE id = ?1",
            params![id],
            |row| {
                Ok(Local {
                    id: row.get(0)?,
                    name: row.get(1)?,
                    email: row.get(2)?,
                    phone: row.get(3)?,
                    address: row.get(4)?,
                    timezone: row.get(5)?,
                    api_token: row.get(6)?,
                })
            },
        )
        .optional()?;
    Ok(local)
}

pub fn save_local_settings(conn: &Connection, settings: &LocalSettings) -> anyhow::Result<()> {
    conn.execute(
        "INSERT INTO local_settings (local_id, booking_timeout, website, instagram, whatsapp, confirm_link, cancel_link)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
         ON CONFLICT(local_id) DO UPDATE SET
           booking_timeout = excluded.booking_timeout,
           website = excluded.website,
           instagram = excluded.instagram,
           whatsapp = excluded.whatsapp,
           confirm_link = excluded.confirm_link,
           cancel_link = excluded.cancel_link",
        params![
            settings.local_id,
            settings.booking_timeout,
            settings.website,
            settings.instagram,
            settings.whatsapp,
            settings.confirm_link,
            settings.cancel_link,
        ],
    )?;
    Ok(())
}

/// Settings for a local; a local without a row gets empty settings.
pub fn get_local_settings(conn: &Connection, local_id: &str) -> anyhow::Result<LocalSettings> {
    let settings = conn
        .query_row(
            "SELECT local_id, booking_timeout, website, instagram, whatsapp, confirm_link, cancel_link
             FROM local_settings WHERE local_id = ?1",
            params![local_id],
            |row| {
                Ok(LocalSettings {
                    local_id: row.get(0)?,
                    booking_timeout: row.get(1)?,
                    website: row.get(2)?,
                    instagram: row.get(3)?,
                    whatsapp: row.get(4)?,
                    confirm_link: row.get(5)?,
                    cancel_link: row.get(6)?,
                })
            },
        )
        .optional()?;
    Ok(settings.unwrap_or_else(|| LocalSettings::empty(local_id)))
}

// ── Timetable ──

pub fn insert_timetable_slot(conn: &Connection, slot: &TimetableSlot) -> anyhow::Result<()> {
    let existing = get_timetable_for_weekday(conn, &slot.local_id, slot.weekday)?;
    if existing.iter().any(|s| s.overlaps(slot)) {
        anyhow::bail!(
            "timetable slot {}-{} overlaps an existing slot",
            slot.opening_time,
            slot.closing_time
        );
    }

    conn.execute(
        "INSERT INTO timetable_slots (local_id, weekday, opening_time, closing_time)
         VALUES (?1, ?2, ?3, ?4)",
        params![
            slot.local_id,
            weekday_index(slot.weekday),
            fmt_time(&slot.opening_time),
            fmt_time(&slot.closing_time),
        ],
    )?;
    Ok(())
}

pub fn get_timetable_for_weekday(
    conn: &Connection,
    local_id: &str,
    weekday: Weekday,
) -> anyhow::Result<Vec<TimetableSlot>> {
    let mut stmt = conn.prepare(
        "SELECT local_id, weekday, opening_time, closing_time FROM timetable_slots
         WHERE local_id = ?1 AND weekday = ?2 ORDER BY opening_time ASC",
    )?;

    let rows = stmt.query_map(params![local_id, weekday_index(weekday)], |row| {
        Ok(parse_slot_row(row))
    })?;

    let mut slots = vec![];
    for row in rows {
        slots.push(row??);
    }
    Ok(slots)
}

fn parse_slot_row(row: &rusqlite::Row) -> anyhow::Result<TimetableSlot> {
    let local_id: String = row.get(0)?;
    let weekday: i64 = row.get(1)?;
    let opening: String = row.get(2)?;
    let closing: String = row.get(3)?;

    Ok(TimetableSlot {
        local_id,
        weekday: weekday_from_index(weekday).context("invalid stored weekday")?,
        opening_time: parse_time(&opening)?,
        closing_time: parse_time(&closing)?,
    })
}

// ── Closed Periods ──

pub fn insert_closed_period(conn: &Connection, period: &ClosedPeriod) -> anyhow::Result<()> {
    anyhow::ensure!(
        period.datetime_init < period.datetime_end,
        "closed period must end after it starts"
    );
    let clashes: i64 = conn.query_row(
        "SELECT COUNT(*) FROM closed_periods
         WHERE local_id = ?1 AND datetime_init < ?3 AND datetime_end > ?2",
        params![
            period.local_id,
            fmt_datetime(&period.datetime_init),
            fmt_datetime(&period.datetime_end),
        ],
        |row| row.get(0),
    )?;
    anyhow::ensure!(clashes == 0, "closed period overlaps an existing one");

    conn.execute(
        "INSERT INTO closed_periods (id, local_id, datetime_init, datetime_end, description)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            period.id,
            period.local_id,
            fmt_datetime(&period.datetime_init),
            fmt_datetime(&period.datetime_end),
            period.description,
        ],
    )?;
    Ok(())
}

/// Deletes the local's closed periods that ended at or before `now`.
pub fn purge_past_closed_periods(
    conn: &Connection,
    local_id: &str,
    now: &DateTime<Utc>,
) -> anyhow::Result<usize> {
    let count = conn.execute(
        "DELETE FROM closed_periods WHERE local_id = ?1 AND datetime_end <= ?2",
        params![local_id, fmt_datetime(now)],
    )?;
    Ok(count)
}

pub fn get_closed_periods_between(
    conn: &Connection,
    local_id: &str,
    start: &DateTime<Utc>,
    end: &DateTime<Utc>,
) -> anyhow::Result<Vec<ClosedPeriod>> {
    let mut stmt = conn.prepare(
        "SELECT id, local_id, datetime_init, datetime_end, description FROM closed_periods
         WHERE local_id = ?1 AND datetime_init < ?3 AND datetime_end > ?2
         ORDER BY datetime_init ASC",
    )?;

    let rows = stmt.query_map(
        params![local_id, fmt_datetime(start), fmt_datetime(end)],
        |row| Ok(parse_closed_period_row(row)),
    )?;

    let mut periods = vec![];
    for row in rows {
        periods.push(row??);
    }
    Ok(periods)
}

pub fn count_closed_periods(conn: &Connection, local_id: &str) -> anyhow::Result<i64> {
    let count = conn.query_row(
        "SELECT COUNT(*) FROM closed_periods WHERE local_id = ?1",
        params![local_id],
        |row| row.get(0),
    )?;
    Ok(count)
}

fn parse_closed_period_row(row: &rusqlite::Row) -> anyhow::Result<ClosedPeriod> {
    let init: String = row.get(2)?;
    let end: String = row.get(3)?;
    Ok(ClosedPeriod {
        id: row.get(0)?,
        local_id: row.get(1)?,
        datetime_init: parse_datetime(&init)?,
        datetime_end: parse_datetime(&end)?,
        description: row.get(4)?,
    })
}

// ── Work Groups, Workers, Services ──

pub fn insert_work_group(conn: &Connection, group: &WorkGroup) -> anyhow::Result<()> {
    conn.execute(
        "INSERT INTO work_groups (id, local_id, name) VALUES (?1, ?2, ?3)",
        params![group.id, group.local_id, group.name],
    )?;
    Ok(())
}

pub fn insert_worker(conn: &Connection, worker: &Worker) -> anyhow::Result<()> {
    conn.execute(
        "INSERT INTO workers (id, local_id, name, email) VALUES (?1, ?2, ?3, ?4)",
        params![worker.id, worker.local_id, worker.name, worker.email],
    )?;
    Ok(())
}

pub fn add_worker_to_group(
    conn: &Connection,
    worker_id: &str,
    work_group_id: &str,
) -> anyhow::Result<()> {
    conn.execute(
        "INSERT OR IGNORE INTO worker_work_groups (worker_id, work_group_id) VALUES (?1, ?2)",
        params![worker_id, work_group_id],
    )?;
    Ok(())
}

pub fn get_worker(conn: &Connection, id: &str) -> anyhow::Result<Option<Worker>> {
    let worker = conn
        .query_row(
            "SELECT id, local_id, name, email FROM workers WHERE id = ?1",
            params![id],
            |row| {
                Ok(Worker {
                    id: row.get(0)?,
                    local_id: row.get(1)?,
                    name: row.get(2)?,
                    email: row.get(3)?,
                })
            },
        )
        .optional()?;
    Ok(worker)
}

/// Worker ids of a work group, in registration order.
pub fn get_group_worker_ids(conn: &Connection, work_group_id: &str) -> anyhow::Result<Vec<String>> {
    let mut stmt = conn.prepare(
        "SELECT wg.worker_id FROM worker_work_groups wg
         JOIN workers w ON w.id = wg.worker_id
         WHERE wg.work_group_id = ?1 ORDER BY w.rowid ASC",
    )?;
    let rows = stmt.query_map(params![work_group_id], |row| row.get(0))?;

    let mut ids = vec![];
    for row in rows {
        ids.push(row?);
    }
    Ok(ids)
}

pub fn get_worker_group_ids(conn: &Connection, worker_id: &str) -> anyhow::Result<Vec<String>> {
    let mut stmt = conn.prepare(
        "SELECT work_group_id FROM worker_work_groups WHERE worker_id = ?1 ORDER BY work_group_id",
    )?;
    let rows = stmt.query_map(params![worker_id], |row| row.get(0))?;

    let mut ids = vec![];
    for row in rows {
        ids.push(row?);
    }
    Ok(ids)
}

pub fn insert_service(conn: &Connection, service: &Service) -> anyhow::Result<()> {
    conn.execute(
        "INSERT INTO services (id, work_group_id, name, duration_minutes, price_cents)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            service.id,
            service.work_group_id,
            service.name,
            service.duration_minutes,
            service.price_cents,
        ],
    )?;
    Ok(())
}

pub fn get_service(conn: &Connection, id: &str) -> anyhow::Result<Option<Service>> {
    let service = conn
        .query_row(
            "SELECT id, work_group_id, name, duration_minutes, price_cents FROM services WHERE id = ?1",
            params![id],
            |row| {
                Ok(Service {
                    id: row.get(0)?,
                    work_group_id: row.get(1)?,
                    name: row.get(2)?,
                    duration_minutes: row.get(3)?,
                    price_cents: row.get(4)?,
                })
            },
        )
        .optional()?;
    Ok(service)
}

/// The local a work group belongs to, used to keep services from leaking across tenants.
pub fn get_work_group_local(conn: &Connection, work_group_id: &str) -> anyhow::Result<Option<String>> {
    let local_id = conn
        .query_row(
            "SELECT local_id FROM work_groups WHERE id = ?1",
            params![work_group_id],
            |row| row.get(0),
        )
        .optional()?;
    Ok(local_id)
}

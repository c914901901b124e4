use anyhow::Context;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};

use super::{fmt_datetime, parse_datetime};
use crate::models::{Booking, BookingStatus, SmtpProvider, SmtpSecurity};

const BOOKING_COLUMNS: &str = "id, local_id, worker_id, datetime_init, datetime_end, status, \
     client_name, client_email, client_phone, comment, email_sent, request_key, created_at, updated_at";

// ── Bookings ──

pub fn insert_booking(conn: &Connection, booking: &Booking) -> anyhow::Result<()> {
    conn.execute(
        "INSERT INTO bookings (id, local_id, worker_id, datetime_init, datetime_end, status,
                               client_name, client_email, client_phone, comment, email_sent,
                               request_key, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
        params![
            booking.id,
            booking.local_id,
            booking.worker_id,
            fmt_datetime(&booking.datetime_init),
            fmt_datetime(&booking.datetime_end),
            booking.status.as_str(),
            booking.client_name,
            booking.client_email,
            booking.client_phone,
            booking.comment,
            booking.email_sent,
            booking.request_key,
            fmt_datetime(&booking.created_at),
            fmt_datetime(&booking.updated_at),
        ],
    )?;
    replace_booking_services(conn, &booking.id, &booking.service_ids)?;
    Ok(())
}

fn replace_booking_services(
    conn: &Connection,
    booking_id: &str,
    service_ids: &[String],
) -> anyhow::Result<()> {
    conn.execute(
        "DELETE FROM booking_services WHERE booking_id = ?1",
        params![booking_id],
    )?;
    let mut stmt = conn.prepare(
        "INSERT INTO booking_services (booking_id, service_id, position) VALUES (?1, ?2, ?3)",
    )?;
    for (position, service_id) in service_ids.iter().enumerate() {
        stmt.execute(params![booking_id, service_id, position as i64])?;
    }
    Ok(())
}

pub fn get_booking(conn: &Connection, id: &str) -> anyhow::Result<Option<Booking>> {
    let sql = format!("SELECT {BOOKING_COLUMNS} FROM bookings WHERE id = ?1");
    let booking = conn
        .query_row(&sql, params![id], |row| Ok(parse_booking_row(row)))
        .optional()?;

    match booking {
        Some(booking) => Ok(Some(with_services(conn, booking?)?)),
        None => Ok(None),
    }
}

pub fn find_booking_by_request_key(
    conn: &Connection,
    local_id: &str,
    request_key: &str,
) -> anyhow::Result<Option<Booking>> {
    let sql = format!("SELECT {BOOKING_COLUMNS} FROM bookings WHERE local_id = ?1 AND request_key = ?2");
    let booking = conn
        .query_row(&sql, params![local_id, request_key], |row| {
            Ok(parse_booking_row(row))
        })
        .optional()?;

    match booking {
        Some(booking) => Ok(Some(with_services(conn, booking?)?)),
        None => Ok(None),
    }
}

/// Ids of the worker's pending/confirmed bookings intersecting `[start, end)`.
pub fn find_overlapping_active(
    conn: &Connection,
    worker_id: &str,
    start: &DateTime<Utc>,
    end: &DateTime<Utc>,
    exclude_booking: Option<&str>,
) -> anyhow::Result<Vec<String>> {
    let mut stmt = conn.prepare(
        "SELECT id FROM bookings
         WHERE worker_id = ?1
           AND status IN ('pending', 'confirmed')
           AND datetime_init < ?3 AND datetime_end > ?2
           AND (?4 IS NULL OR id != ?4)
         ORDER BY datetime_init ASC",
    )?;
    let rows = stmt.query_map(
        params![worker_id, fmt_datetime(start), fmt_datetime(end), exclude_booking],
        |row| row.get(0),
    )?;

    let mut ids = vec![];
    for row in rows {
        ids.push(row?);
    }
    Ok(ids)
}

/// Compare-and-set on the status column. Returns false when the booking is missing or
/// no longer in `from`.
pub fn transition_booking_status(
    conn: &Connection,
    id: &str,
    from: BookingStatus,
    to: BookingStatus,
    now: &DateTime<Utc>,
) -> anyhow::Result<bool> {
    let count = conn.execute(
        "UPDATE bookings SET status = ?1, updated_at = ?2 WHERE id = ?3 AND status = ?4",
        params![to.as_str(), fmt_datetime(now), id, from.as_str()],
    )?;
    Ok(count > 0)
}

pub fn update_booking_slot(
    conn: &Connection,
    booking: &Booking,
    now: &DateTime<Utc>,
) -> anyhow::Result<()> {
    conn.execute(
        "UPDATE bookings SET worker_id = ?1, datetime_init = ?2, datetime_end = ?3, updated_at = ?4
         WHERE id = ?5",
        params![
            booking.worker_id,
            fmt_datetime(&booking.datetime_init),
            fmt_datetime(&booking.datetime_end),
            fmt_datetime(now),
            booking.id,
        ],
    )?;
    replace_booking_services(conn, &booking.id, &booking.service_ids)?;
    Ok(())
}

pub fn set_booking_comment(conn: &Connection, id: &str, comment: &str) -> anyhow::Result<()> {
    conn.execute(
        "UPDATE bookings SET comment = ?1 WHERE id = ?2",
        params![comment, id],
    )?;
    Ok(())
}

pub fn set_email_sent(conn: &Connection, id: &str, sent: bool) -> anyhow::Result<()> {
    conn.execute(
        "UPDATE bookings SET email_sent = ?1 WHERE id = ?2",
        params![sent, id],
    )?;
    Ok(())
}

pub fn delete_booking(conn: &Connection, id: &str) -> anyhow::Result<bool> {
    let count = conn.execute("DELETE FROM bookings WHERE id = ?1", params![id])?;
    Ok(count > 0)
}

#[derive(Debug, Clone)]
pub struct BookingFilter {
    pub window_start: DateTime<Utc>,
    pub window_end: DateTime<Utc>,
    pub status: Option<BookingStatus>,
    pub worker_id: Option<String>,
    pub work_group_id: Option<String>,
}

/// Bookings of a local intersecting the filter window, earliest first.
pub fn list_bookings(
    conn: &Connection,
    local_id: &str,
    filter: &BookingFilter,
) -> anyhow::Result<Vec<Booking>> {
    let mut sql = format!(
        "SELECT {BOOKING_COLUMNS} FROM bookings
         WHERE local_id = ?1 AND datetime_init < ?3 AND datetime_end > ?2"
    );
    let mut params_vec: Vec<Box<dyn rusqlite::types::ToSql>> = vec![
        Box::new(local_id.to_string()),
        Box::new(fmt_datetime(&filter.window_start)),
        Box::new(fmt_datetime(&filter.window_end)),
    ];

    if let Some(status) = filter.status {
        params_vec.push(Box::new(status.as_str().to_string()));
        sql.push_str(&format!(" AND status = ?{}", params_vec.len()));
    }
    if let Some(worker_id) = &filter.worker_id {
        params_vec.push(Box::new(worker_id.clone()));
        sql.push_str(&format!(" AND worker_id = ?{}", params_vec.len()));
    }
    if let Some(work_group_id) = &filter.work_group_id {
        params_vec.push(Box::new(work_group_id.clone()));
        sql.push_str(&format!(
            " AND id IN (SELECT bs.booking_id FROM booking_services bs
                         JOIN services s ON s.id = bs.service_id
                         WHERE s.work_group_id = ?{})",
            params_vec.len()
        ));
    }
    sql.push_str(" ORDER BY datetime_init ASC");

    let mut stmt = conn.prepare(&sql)?;
    let params_refs: Vec<&dyn rusqlite::types::ToSql> =
        params_vec.iter().map(|p| p.as_ref()).collect();
    let rows = stmt.query_map(params_refs.as_slice(), |row| Ok(parse_booking_row(row)))?;

    collect_bookings(conn, rows)
}

pub fn get_bookings_with_status(
    conn: &Connection,
    status: BookingStatus,
) -> anyhow::Result<Vec<Booking>> {
    let sql = format!(
        "SELECT {BOOKING_COLUMNS} FROM bookings WHERE status = ?1 ORDER BY created_at ASC"
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params![status.as_str()], |row| Ok(parse_booking_row(row)))?;

    collect_bookings(conn, rows)
}

/// Ids of confirmed bookings whose end has passed.
pub fn get_finished_confirmed_ids(
    conn: &Connection,
    now: &DateTime<Utc>,
) -> anyhow::Result<Vec<String>> {
    let mut stmt = conn.prepare(
        "SELECT id FROM bookings WHERE status = 'confirmed' AND datetime_end <= ?1",
    )?;
    let rows = stmt.query_map(params![fmt_datetime(now)], |row| row.get(0))?;

    let mut ids = vec![];
    for row in rows {
        ids.push(row?);
    }
    Ok(ids)
}

fn collect_bookings(
    conn: &Connection,
    rows: impl Iterator<Item = rusqlite::Result<anyhow::Result<Booking>>>,
) -> anyhow::Result<Vec<Booking>> {
    let mut bookings = vec![];
    for row in rows {
        bookings.push(row??);
    }
    bookings
        .into_iter()
        .map(|b| with_services(conn, b))
        .collect()
}

fn with_services(conn: &Connection, mut booking: Booking) -> anyhow::Result<Booking> {
    let mut stmt = conn.prepare(
        "SELECT service_id FROM booking_services WHERE booking_id = ?1 ORDER BY position ASC",
    )?;
    let rows = stmt.query_map(params![booking.id], |row| row.get(0))?;
    for row in rows {
        booking.service_ids.push(row?);
    }
    Ok(booking)
}

fn parse_booking_row(row: &rusqlite::Row) -> anyhow::Result<Booking> {
    let datetime_init: String = row.get(3)?;
    let datetime_end: String = row.get(4)?;
    let status: String = row.get(5)?;
    let created_at: String = row.get(12)?;
    let updated_at: String = row.get(13)?;

    Ok(Booking {
        id: row.get(0)?,
        local_id: row.get(1)?,
        worker_id: row.get(2)?,
        service_ids: vec![],
        datetime_init: parse_datetime(&datetime_init)?,
        datetime_end: parse_datetime(&datetime_end)?,
        status: BookingStatus::parse(&status)
            .with_context(|| format!("invalid stored booking status: {status}"))?,
        client_name: row.get(6)?,
        client_email: row.get(7)?,
        client_phone: row.get(8)?,
        comment: row.get(9)?,
        email_sent: row.get(10)?,
        request_key: row.get(11)?,
        created_at: parse_datetime(&created_at)?,
        updated_at: parse_datetime(&updated_at)?,
    })
}

// ── SMTP Providers ──

const PROVIDER_COLUMNS: &str = "id, local_id, host, port, security, username, password, from_address, \
     priority, send_per_day, send_per_month, max_send_per_day, max_send_per_month, \
     reset_send_per_day, reset_send_per_month";

pub fn insert_smtp_provider(conn: &Connection, provider: &SmtpProvider) -> anyhow::Result<()> {
    conn.execute(
        "INSERT INTO smtp_providers (id, local_id, host, port, security, username, password,
                                     from_address, priority, send_per_day, send_per_month,
                                     max_send_per_day, max_send_per_month,
                                     reset_send_per_day, reset_send_per_month)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)",
        params![
            provider.id,
            provider.local_id,
            provider.host,
            provider.port,
            provider.security.as_str(),
            provider.username,
            provider.password,
            provider.from_address,
            provider.priority,
            provider.send_per_day,
            provider.send_per_month,
            provider.max_send_per_day,
            provider.max_send_per_month,
            fmt_datetime(&provider.reset_send_per_day),
            fmt_datetime(&provider.reset_send_per_month),
        ],
    )?;
    Ok(())
}

/// A local's providers, lowest priority value first.
pub fn get_smtp_providers(conn: &Connection, local_id: &str) -> anyhow::Result<Vec<SmtpProvider>> {
    let sql = format!(
        "SELECT {PROVIDER_COLUMNS} FROM smtp_providers WHERE local_id = ?1 ORDER BY priority ASC"
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params![local_id], |row| Ok(parse_provider_row(row)))?;

    let mut providers = vec![];
    for row in rows {
        providers.push(row??);
    }
    Ok(providers)
}

pub fn get_smtp_provider(conn: &Connection, id: &str) -> anyhow::Result<Option<SmtpProvider>> {
    let sql = format!("SELECT {PROVIDER_COLUMNS} FROM smtp_providers WHERE id = ?1");
    let provider = conn
        .query_row(&sql, params![id], |row| Ok(parse_provider_row(row)))
        .optional()?;
    provider.transpose()
}

pub fn save_provider_counters(conn: &Connection, provider: &SmtpProvider) -> anyhow::Result<()> {
    conn.execute(
        "UPDATE smtp_providers SET send_per_day = ?1, send_per_month = ?2,
                reset_send_per_day = ?3, reset_send_per_month = ?4
         WHERE id = ?5",
        params![
            provider.send_per_day,
            provider.send_per_month,
            fmt_datetime(&provider.reset_send_per_day),
            fmt_datetime(&provider.reset_send_per_month),
            provider.id,
        ],
    )?;
    Ok(())
}

fn parse_provider_row(row: &rusqlite::Row) -> anyhow::Result<SmtpProvider> {
    let security: String = row.get(4)?;
    let reset_day: String = row.get(13)?;
    let reset_month: String = row.get(14)?;

    Ok(SmtpProvider {
        id: row.get(0)?,
        local_id: row.get(1)?,
        host: row.get(2)?,
        port: row.get(3)?,
        security: SmtpSecurity::parse(&security)
            .with_context(|| format!("invalid stored smtp security: {security}"))?,
        username: row.get(5)?,
        password: row.get(6)?,
        from_address: row.get(7)?,
        priority: row.get(8)?,
        send_per_day: row.get(9)?,
        send_per_month: row.get(10)?,
        max_send_per_day: row.get(11)?,
        max_send_per_month: row.get(12)?,
        reset_send_per_day: parse_datetime(&reset_day)?,
        reset_send_per_month: parse_datetime(&reset_month)?,
    })
}

use chrono::{DateTime, Utc};
use rand::seq::SliceRandom;
use rand::Rng;
use rusqlite::Connection;

use crate::db::{catalog, queries};
use crate::errors::AppError;
use crate::models::worker::total_duration;
use crate::models::{Local, Service};
use crate::services::availability;

#[derive(Debug, Clone)]
pub struct AllocationRequest<'a> {
    pub local: &'a Local,
    pub service_ids: &'a [String],
    pub start: DateTime<Utc>,
    /// A worker the client insisted on. Allocation fails rather than picking someone else.
    pub requested_worker: Option<&'a str>,
    /// Tried first when no worker was requested, e.g. the current worker of a booking
    /// being moved.
    pub preferred_worker: Option<&'a str>,
    /// The booking being rescheduled, ignored by the overlap check.
    pub exclude_booking: Option<&'a str>,
}

#[derive(Debug, Clone)]
pub struct Allocation {
    pub worker_id: String,
    pub work_group_id: String,
    pub services: Vec<Service>,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl Allocation {
    pub fn service_ids(&self) -> Vec<String> {
        self.services.iter().map(|s| s.id.clone()).collect()
    }
}

/// Picks a worker for the requested services starting at `req.start`.
///
/// Validation runs before anything touches availability: the window must lie in the
/// future, every service must come from one work group, and a requested worker must
/// belong to that group. Then the local must be open for the whole window, and finally
/// a worker without overlapping pending/confirmed bookings is chosen. Candidates are
/// shuffled so load spreads across the group.
///
/// Must run inside the same write transaction that persists the result.
pub fn allocate<R: Rng + ?Sized>(
    conn: &Connection,
    req: &AllocationRequest<'_>,
    now: DateTime<Utc>,
    rng: &mut R,
) -> Result<Allocation, AppError> {
    let services = load_services(conn, req.local, req.service_ids)?;
    let start = req.start;
    let end = start + total_duration(&services);

    if start <= now {
        return Err(AppError::PastDate { start });
    }

    let work_group_id = single_work_group(&services)?;

    if let Some(worker_id) = req.requested_worker {
        let worker = catalog::get_worker(conn, worker_id)?
            .filter(|w| w.local_id == req.local.id)
            .ok_or_else(|| AppError::not_found("worker", worker_id))?;
        if !catalog::get_worker_group_ids(conn, &worker.id)?.contains(&work_group_id) {
            return Err(AppError::WrongGroup {
                worker_id: worker.id,
                work_group_id,
            });
        }
    }

    availability::ensure_open(conn, req.local, start, end, now)?;

    let worker_id = match req.requested_worker {
        Some(worker_id) => {
            if !is_worker_free(conn, worker_id, &start, &end, req.exclude_booking)? {
                return Err(AppError::WorkerUnavailable {
                    worker_id: worker_id.to_string(),
                    start,
                    end,
                });
            }
            worker_id.to_string()
        }
        None => {
            let mut candidates = catalog::get_group_worker_ids(conn, &work_group_id)?;
            candidates.shuffle(rng);
            if let Some(preferred) = req.preferred_worker {
                if let Some(pos) = candidates.iter().position(|id| id == preferred) {
                    candidates[..=pos].rotate_right(1);
                }
            }

            let mut chosen = None;
            for candidate in candidates {
                if is_worker_free(conn, &candidate, &start, &end, req.exclude_booking)? {
                    chosen = Some(candidate);
                    break;
                }
            }
            chosen.ok_or_else(|| AppError::NoWorkerAvailable {
                work_group_id: work_group_id.clone(),
                start,
                end,
            })?
        }
    };

    tracing::debug!(
        local_id = %req.local.id,
        worker_id = %worker_id,
        %start,
        %end,
        "allocated worker"
    );

    Ok(Allocation {
        worker_id,
        work_group_id,
        services,
        start,
        end,
    })
}

fn is_worker_free(
    conn: &Connection,
    worker_id: &str,
    start: &DateTime<Utc>,
    end: &DateTime<Utc>,
    exclude_booking: Option<&str>,
) -> Result<bool, AppError> {
    let clashes = queries::find_overlapping_active(conn, worker_id, start, end, exclude_booking)?;
    Ok(clashes.is_empty())
}

/// Loads the requested services in order, dropping repeats. Services of another local
/// are reported as missing.
fn load_services(
    conn: &Connection,
    local: &Local,
    service_ids: &[String],
) -> Result<Vec<Service>, AppError> {
    let mut services: Vec<Service> = Vec::with_capacity(service_ids.len());
    for id in service_ids {
        if services.iter().any(|s| &s.id == id) {
            continue;
        }
        let service = catalog::get_service(conn, id)?
            .ok_or_else(|| AppError::not_found("service", id.as_str()))?;
        let owner = catalog::get_work_group_local(conn, &service.work_group_id)?;
        if owner.as_deref() != Some(local.id.as_str()) {
            return Err(AppError::not_found("service", id.as_str()));
        }
        services.push(service);
    }

    if services.is_empty() {
        return Err(AppError::NoServices);
    }
    Ok(services)
}

fn single_work_group(services: &[Service]) -> Result<String, AppError> {
    let first = &services[0].work_group_id;
    if services.iter().all(|s| &s.work_group_id == first) {
        Ok(first.clone())
    } else {
        Err(AppError::CrossGroup {
            service_ids: services.iter().map(|s| s.id.clone()).collect(),
        })
    }
}

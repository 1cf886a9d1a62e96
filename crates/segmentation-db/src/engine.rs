use chrono::{Duration, Utc};
use rand::Rng;
use rand::seq::IndexedRandom;
use segmentation_common::{Error, Result, SegmentId, UserId};
use segmentation_config::{AppConfig, HistoryConfig};
use tracing::{debug, info};

use crate::models::{
    CreatedSegment, HistoryOperation, NewSegment, SegmentAddition, UserSegments, YearMonth,
};
use crate::queries;
use crate::report::ReportWriter;
use crate::store::SegmentStore;

/// Minimum distance, in hours, between segment creation and its expiration date.
const MIN_EXPIRATION_LEAD_HOURS: i64 = 1;

/// Segment membership operations. Each call is one transaction against the
/// store: it either commits entirely or leaves the store untouched.
#[derive(Clone)]
pub struct SegmentEngine {
    store: SegmentStore,
    reports: ReportWriter,
    history: HistoryConfig,
}

impl SegmentEngine {
    pub fn new(store: SegmentStore, config: &AppConfig) -> Self {
        Self {
            store,
            reports: ReportWriter::new(&config.reports),
            history: config.history.clone(),
        }
    }

    pub fn store(&self) -> &SegmentStore {
        &self.store
    }

    pub fn reports(&self) -> &ReportWriter {
        &self.reports
    }

    pub async fn create_user(&self, name: String) -> Result<UserId> {
        let store = self.store.clone();
        let user_id = run_blocking(move || store.write(|tx| queries::insert_user(tx, &name))).await?;
        info!(user_id = %user_id, "user created");
        Ok(user_id)
    }

    pub async fn delete_user(&self, user_id: UserId) -> Result<UserId> {
        let store = self.store.clone();
        let removed = run_blocking(move || {
            store.write(|tx| {
                ensure_user(tx, user_id)?;
                let removed = queries::delete_user_assignments(tx, user_id)?;
                queries::delete_user(tx, user_id)?;
                Ok(removed)
            })
        })
        .await?;

        info!(user_id = %user_id, assignments_removed = removed, "user deleted");
        Ok(user_id)
    }

    /// Create a segment and enroll `random_percentage` of the current users,
    /// picked uniformly without replacement.
    pub async fn create_segment(&self, segment: NewSegment) -> Result<CreatedSegment> {
        validate_new_segment(&segment)?;
        let expiration_date = segment.expiration_date;

        let store = self.store.clone();
        let NewSegment {
            slug,
            random_percentage,
            ..
        } = segment;
        let log_slug = slug.clone();

        let created = run_blocking(move || {
            store.write(|tx| {
                if queries::find_segment_id(tx, &slug)?.is_some() {
                    return Err(Error::AlreadyExists(format!(
                        "segment with slug '{slug}' already exists"
                    )));
                }
                let id = queries::insert_segment(tx, &slug)?;

                let user_ids = queries::all_user_ids(tx)?;
                let selected = sample_users(&user_ids, random_percentage, &mut rand::rng());

                let now = Utc::now();
                for user_id in &selected {
                    queries::insert_assignment(tx, *user_id, &slug, expiration_date)?;
                    queries::append_history(tx, *user_id, &slug, HistoryOperation::Add, now)?;
                }

                debug!(
                    slug = %slug,
                    total_users = user_ids.len(),
                    selected = selected.len(),
                    "segment populated"
                );

                Ok(CreatedSegment {
                    id,
                    assigned_users: selected.len(),
                })
            })
        })
        .await?;

        info!(
            slug = %log_slug,
            segment_id = %created.id,
            assigned_users = created.assigned_users,
            "segment created"
        );
        Ok(created)
    }

    /// Delete a segment and every assignment referencing it. History is kept.
    pub async fn delete_segment(&self, slug: String) -> Result<SegmentId> {
        let store = self.store.clone();
        let log_slug = slug.clone();

        let (segment_id, removed) = run_blocking(move || {
            store.write(|tx| {
                if queries::find_segment_id(tx, &slug)?.is_none() {
                    return Err(segment_not_found(&slug));
                }
                let removed = queries::delete_segment_assignments(tx, &slug)?;
                let segment_id =
                    queries::delete_segment(tx, &slug)?.ok_or_else(|| segment_not_found(&slug))?;
                Ok((segment_id, removed))
            })
        })
        .await?;

        info!(
            slug = %log_slug,
            segment_id = %segment_id,
            assignments_removed = removed,
            "segment deleted"
        );
        Ok(segment_id)
    }

    /// Apply additions and removals to a user's segment set.
    ///
    /// Every referenced slug is checked before anything is written, so an
    /// unknown slug fails the whole call. Adding an existing membership and
    /// removing a missing one are no-ops. Effective changes are logged only
    /// when the matching history switch is on.
    pub async fn update_user_segments(
        &self,
        user_id: UserId,
        add: Vec<SegmentAddition>,
        remove: Vec<String>,
    ) -> Result<UserId> {
        let store = self.store.clone();
        let history = self.history.clone();

        let (added, removed) = run_blocking(move || {
            store.write(|tx| {
                ensure_user(tx, user_id)?;

                let referenced = add
                    .iter()
                    .map(|a| a.slug.as_str())
                    .chain(remove.iter().map(String::as_str));
                for slug in referenced {
                    if queries::find_segment_id(tx, slug)?.is_none() {
                        return Err(segment_not_found(slug));
                    }
                }

                let now = Utc::now();
                let mut added = 0usize;
                for addition in &add {
                    if queries::insert_assignment(
                        tx,
                        user_id,
                        &addition.slug,
                        addition.expiration_date,
                    )? {
                        if history.record_additions {
                            queries::append_history(
                                tx,
                                user_id,
                                &addition.slug,
                                HistoryOperation::Add,
                                now,
                            )?;
                        }
                        added += 1;
                    }
                }

                let mut removed = 0usize;
                for slug in &remove {
                    if queries::delete_assignment(tx, user_id, slug)? {
                        if history.record_removals {
                            queries::append_history(
                                tx,
                                user_id,
                                slug,
                                HistoryOperation::Remove,
                                now,
                            )?;
                        }
                        removed += 1;
                    }
                }

                Ok((added, removed))
            })
        })
        .await?;

        info!(user_id = %user_id, added, removed, "user segments updated");
        Ok(user_id)
    }

    pub async fn get_user_segments(&self, user_id: UserId) -> Result<UserSegments> {
        let store = self.store.clone();
        run_blocking(move || {
            store.read(|tx| {
                ensure_user(tx, user_id)?;
                let segments = queries::user_segment_slugs(tx, user_id)?;
                Ok(UserSegments { user_id, segments })
            })
        })
        .await
    }

    /// Write the user's history for `year_month` to a CSV file and return the
    /// file name. A month without history still yields a header-only file.
    pub async fn get_user_report(&self, user_id: UserId, year_month: &str) -> Result<String> {
        let year_month: YearMonth = year_month.parse()?;
        let store = self.store.clone();
        let reports = self.reports.clone();

        let (file_name, rows) = run_blocking(move || {
            let entries = store.read(|tx| {
                ensure_user(tx, user_id)?;
                let (start, end) = year_month.bounds();
                queries::history_between(tx, user_id, start, end)
            })?;
            let file_name = reports.write(user_id, year_month, &entries)?;
            Ok((file_name, entries.len()))
        })
        .await?;

        info!(user_id = %user_id, %year_month, rows, file = %file_name, "report generated");
        Ok(file_name)
    }
}

fn validate_new_segment(segment: &NewSegment) -> Result<()> {
    if segment.slug.trim().is_empty() {
        return Err(Error::InvalidArgument("slug must not be empty".into()));
    }

    if !(0.0..=100.0).contains(&segment.random_percentage) {
        return Err(Error::InvalidArgument(
            "random percentage should be between 0 and 100".into(),
        ));
    }

    let Some(expiration_date) = segment.expiration_date else {
        return Err(Error::InvalidArgument(
            "expiration date should not be zero".into(),
        ));
    };
    if expiration_date < Utc::now() + Duration::hours(MIN_EXPIRATION_LEAD_HOURS) {
        return Err(Error::InvalidArgument(
            "expiration date should be at least 1 hour in the future".into(),
        ));
    }

    Ok(())
}

/// Number of users a segment enrolls: `floor(total * percentage / 100)`.
pub fn users_to_add(total: usize, percentage: f64) -> usize {
    let n = (total as f64 * (percentage / 100.0)).floor();
    (n.max(0.0) as usize).min(total)
}

/// Uniform sample without replacement over a snapshot of user ids.
pub fn sample_users<R: Rng + ?Sized>(ids: &[UserId], percentage: f64, rng: &mut R) -> Vec<UserId> {
    let n = users_to_add(ids.len(), percentage);
    ids.choose_multiple(rng, n).copied().collect()
}

fn ensure_user(conn: &rusqlite::Connection, user_id: UserId) -> Result<()> {
    if queries::user_exists(conn, user_id)? {
        Ok(())
    } else {
        Err(Error::NotFound(format!(
            "user with ID {user_id} does not exist"
        )))
    }
}

fn segment_not_found(slug: &str) -> Error {
    Error::NotFound(format!("segment with slug '{slug}' does not exist"))
}

/// Run blocking store work off the async worker threads.
async fn run_blocking<T, F>(f: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| Error::Database(format!("store task failed: {e}")))?
}

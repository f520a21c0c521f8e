//! # Session Window Resolver
//!
//! Finds the courier's session for `now`, rotating, reopening or creating
//! sessions as `farine_core::window::plan_resolution` decides. Runs on the
//! caller's transaction.
//!
//! ```text
//! actor ──► zone (actor tz │ default tz │ UTC)
//!        ──► active noon-to-noon window
//!        ──► find_open + latest_in_window
//!        ──► plan ──► close stale automatic session?
//!                 ──► keep │ reopen │ create_if_none_open
//! ```

use chrono::{DateTime, Utc};
use sqlx::SqliteConnection;
use tracing::{debug, info, warn};

use farine_core::window::{
    active_window, plan_resolution, session_name, CourierZone, ResolutionStep,
};
use farine_core::{Actor, DeliverySession, SessionOrigin};
use farine_db::SessionRepository;

use crate::config::{SessionPolicy, SessionSettings};
use crate::error::{ServiceError, ServiceResult};

/// The actor's zone, else the configured default, else UTC.
pub fn courier_zone(actor: &Actor, settings: &SessionSettings) -> CourierZone {
    let name = actor
        .timezone
        .as_deref()
        .or(settings.default_timezone.as_deref());
    let zone = CourierZone::resolve(name);

    if zone.fell_back {
        match name {
            Some(name) => warn!(
                courier = %actor.user_id,
                timezone = name,
                "Unknown timezone, using UTC"
            ),
            None => debug!(courier = %actor.user_id, "No timezone configured, using UTC"),
        }
    }
    zone
}

/// Session of the active window, created when none fits.
pub async fn resolve_or_create(
    conn: &mut SqliteConnection,
    actor: &Actor,
    settings: &SessionSettings,
    now: DateTime<Utc>,
) -> ServiceResult<DeliverySession> {
    let zone = courier_zone(actor, settings);
    let window = active_window(now, zone.tz);
    let courier = actor.user_id.as_str();

    let mut sessions = SessionRepository::new(conn);
    let open = sessions.find_open(courier).await?;
    let latest = sessions
        .latest_in_window(courier, window.start, window.end)
        .await?;

    let plan = plan_resolution(open.as_ref(), latest.as_ref(), &window);

    if let Some(stale) = &plan.rotate {
        sessions.close(stale, now).await?;
        info!(courier, session_id = %stale, "Automatic session rotated out of its window");
    }

    match plan.step {
        ResolutionStep::Keep(id) => match [open, latest].into_iter().flatten().find(|s| s.id == id) {
            Some(session) => Ok(session),
            None => Ok(sessions.get_required(&id).await?),
        },
        ResolutionStep::Reopen(id) => {
            sessions.reopen(&id, SessionOrigin::Automatic, now).await?;
            Ok(sessions.get_required(&id).await?)
        }
        ResolutionStep::Create => {
            let name = session_name(&settings.name_prefix, &window);
            match sessions
                .create_if_none_open(courier, &name, SessionOrigin::Automatic, now)
                .await?
            {
                Some(created) => Ok(created),
                None => sessions
                    .find_open(courier)
                    .await?
                    .ok_or_else(|| ServiceError::NoOpenSession {
                        courier: courier.to_string(),
                    }),
            }
        }
    }
}

/// Session a write should land in.
///
/// Under [`SessionPolicy::RequireOpen`] the courier's open session is used
/// as it is. A `session_override` must name the resolved session.
pub async fn resolve_for_write(
    conn: &mut SqliteConnection,
    actor: &Actor,
    settings: &SessionSettings,
    session_override: Option<&str>,
    now: DateTime<Utc>,
) -> ServiceResult<DeliverySession> {
    let session = match settings.policy {
        SessionPolicy::AutoOpen => resolve_or_create(conn, actor, settings, now).await?,
        SessionPolicy::RequireOpen => SessionRepository::new(conn)
            .find_open(&actor.user_id)
            .await?
            .ok_or_else(|| ServiceError::NoOpenSession {
                courier: actor.user_id.clone(),
            })?,
    };

    if let Some(requested) = session_override {
        if requested != session.id {
            return Err(ServiceError::SessionMismatch {
                requested: requested.to_string(),
                current: session.id,
            });
        }
    }

    Ok(session)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{at, courier, database};
    use farine_core::SessionState;

    async fn resolve(
        db: &farine_db::Database,
        actor: &Actor,
        now: DateTime<Utc>,
    ) -> DeliverySession {
        let mut tx = db.begin().await.unwrap();
        let session = resolve_or_create(&mut tx, actor, &SessionSettings::default(), now)
            .await
            .unwrap();
        tx.commit().await.unwrap();
        session
    }

    #[tokio::test]
    async fn test_noon_splits_sessions() {
        let db = database().await;
        let actor = courier();

        let before = resolve(&db, &actor, at(2, 11, 59)).await;
        let after = resolve(&db, &actor, at(2, 12, 1)).await;

        assert_ne!(before.id, after.id);
        assert_eq!(before.name, "Delivery-2026-03-01");
        assert_eq!(after.name, "Delivery-2026-03-02");

        let mut conn = db.acquire().await.unwrap();
        let rotated = SessionRepository::new(&mut conn)
            .get_required(&before.id)
            .await
            .unwrap();
        assert_eq!(rotated.state, SessionState::Closed);
    }

    #[tokio::test]
    async fn test_same_window_same_session() {
        let db = database().await;
        let actor = courier();

        let first = resolve(&db, &actor, at(2, 13, 0)).await;
        let second = resolve(&db, &actor, at(2, 15, 0)).await;
        assert_eq!(first.id, second.id);
        assert_eq!(first.origin, SessionOrigin::Automatic);
    }

    #[tokio::test]
    async fn test_closed_session_in_window_is_reopened() {
        let db = database().await;
        let actor = courier();

        let first = resolve(&db, &actor, at(2, 13, 0)).await;
        {
            let mut conn = db.acquire().await.unwrap();
            assert!(SessionRepository::new(&mut conn)
                .close(&first.id, at(2, 14, 0))
                .await
                .unwrap());
        }

        let again = resolve(&db, &actor, at(2, 15, 0)).await;
        assert_eq!(again.id, first.id);
        assert_eq!(again.state, SessionState::Open);
        assert_eq!(again.closed_at, None);
    }

    #[tokio::test]
    async fn test_explicit_session_survives_window_change() {
        let db = database().await;
        let actor = courier();

        let session = resolve(&db, &actor, at(2, 13, 0)).await;
        {
            let mut conn = db.acquire().await.unwrap();
            SessionRepository::new(&mut conn)
                .set_origin(&session.id, SessionOrigin::Explicit, at(2, 13, 0))
                .await
                .unwrap();
        }

        let next_day = resolve(&db, &actor, at(3, 14, 0)).await;
        assert_eq!(next_day.id, session.id);
    }

    #[tokio::test]
    async fn test_window_uses_courier_zone() {
        let db = database().await;
        // Kinshasa noon is 11:00 UTC
        let actor = courier().with_timezone("Africa/Kinshasa");

        let before = resolve(&db, &actor, at(2, 10, 59)).await;
        let after = resolve(&db, &actor, at(2, 11, 1)).await;
        assert_ne!(before.id, after.id);

        // unknown zone behaves as UTC
        let lost = Actor::new("courier-2", "Bisimwa").with_timezone("Mars/Olympus");
        let early = resolve(&db, &lost, at(2, 11, 30)).await;
        let late = resolve(&db, &lost, at(2, 11, 50)).await;
        assert_eq!(early.id, late.id);
        assert_eq!(early.name, "Delivery-2026-03-01");
    }

    #[tokio::test]
    async fn test_require_open_policy() {
        let db = database().await;
        let actor = courier();
        let settings = SessionSettings {
            policy: SessionPolicy::RequireOpen,
            ..Default::default()
        };

        let mut tx = db.begin().await.unwrap();
        let err = resolve_for_write(&mut tx, &actor, &settings, None, at(2, 13, 0))
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::NoOpenSession { .. }));

        let opened = resolve_or_create(&mut tx, &actor, &settings, at(2, 13, 0))
            .await
            .unwrap();
        let found = resolve_for_write(&mut tx, &actor, &settings, None, at(3, 15, 0))
            .await
            .unwrap();
        assert_eq!(found.id, opened.id);
    }

    #[tokio::test]
    async fn test_session_override_must_match() {
        let db = database().await;
        let actor = courier();
        let settings = SessionSettings::default();

        let mut tx = db.begin().await.unwrap();
        let current = resolve_for_write(&mut tx, &actor, &settings, None, at(2, 13, 0))
            .await
            .unwrap();
        let same = resolve_for_write(&mut tx, &actor, &settings, Some(&current.id), at(2, 14, 0))
            .await
            .unwrap();
        assert_eq!(same.id, current.id);

        let err = resolve_for_write(&mut tx, &actor, &settings, Some("stale"), at(2, 14, 0))
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::SessionMismatch { .. }));
    }
}

//! # Courier Sessions
//!
//! Status, open, close and reopen. Only the owner or an administrator may
//! close or reopen a session.

use chrono::{DateTime, Utc};
use sqlx::SqliteConnection;
use tracing::{debug, info};

use farine_core::{Actor, DeliverySession, SessionOrigin};
use farine_db::SessionRepository;

use crate::config::SessionSettings;
use crate::error::{ServiceError, ServiceResult};
use crate::resolver::resolve_or_create;

/// The courier's open session, if any.
pub async fn session_status(
    conn: &mut SqliteConnection,
    actor: &Actor,
) -> ServiceResult<Option<DeliverySession>> {
    Ok(SessionRepository::new(conn).find_open(&actor.user_id).await?)
}

/// Resolves the courier's session and marks it explicit, so window
/// rotation leaves it alone until it is closed.
pub async fn open_session(
    conn: &mut SqliteConnection,
    settings: &SessionSettings,
    actor: &Actor,
    now: DateTime<Utc>,
) -> ServiceResult<DeliverySession> {
    let mut session = resolve_or_create(conn, actor, settings, now).await?;

    if session.origin != SessionOrigin::Explicit {
        SessionRepository::new(conn)
            .set_origin(&session.id, SessionOrigin::Explicit, now)
            .await?;
        session.origin = SessionOrigin::Explicit;
        session.updated_at = now;
    }

    info!(courier = %actor.user_id, session_id = %session.id, "Session opened");
    Ok(session)
}

/// Closes `session_id`, or the courier's open session when absent.
/// Closing a closed session is a no-op.
pub async fn close_session(
    conn: &mut SqliteConnection,
    actor: &Actor,
    session_id: Option<&str>,
    now: DateTime<Utc>,
) -> ServiceResult<DeliverySession> {
    let mut sessions = SessionRepository::new(conn);

    let session = match session_id {
        Some(id) => sessions.get_required(id).await?,
        None => sessions
            .find_open(&actor.user_id)
            .await?
            .ok_or_else(|| ServiceError::NoOpenSession {
                courier: actor.user_id.clone(),
            })?,
    };

    if !actor.can_manage(&session.courier_user_id) {
        return Err(ServiceError::forbidden(&actor.user_id, "close", &session.id));
    }

    if !session.is_open() {
        debug!(session_id = %session.id, "Session already closed");
        return Ok(session);
    }

    sessions.recompute_totals(&session.id, now).await?;
    sessions.close(&session.id, now).await?;
    Ok(sessions.get_required(&session.id).await?)
}

/// Reopens a closed session as explicit, closing whatever else the owner
/// has open.
pub async fn reopen_session(
    conn: &mut SqliteConnection,
    actor: &Actor,
    session_id: &str,
    now: DateTime<Utc>,
) -> ServiceResult<DeliverySession> {
    let mut sessions = SessionRepository::new(conn);
    let session = sessions.get_required(session_id).await?;

    if !actor.can_manage(&session.courier_user_id) {
        return Err(ServiceError::forbidden(&actor.user_id, "reopen", session_id));
    }
    if session.is_open() {
        return Ok(session);
    }

    if let Some(other) = sessions.find_open(&session.courier_user_id).await? {
        sessions.close(&other.id, now).await?;
        info!(session_id = %other.id, "Session closed to make room for a reopened one");
    }

    sessions
        .reopen(session_id, SessionOrigin::Explicit, now)
        .await?;
    Ok(sessions.get_required(session_id).await?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{at, courier, database};
    use farine_core::SessionState;

    #[tokio::test]
    async fn test_open_marks_explicit_and_survives_rotation() {
        let db = database().await;
        let mut conn = db.acquire().await.unwrap();
        let settings = SessionSettings::default();

        let opened = open_session(&mut conn, &settings, &courier(), at(2, 11, 0))
            .await
            .unwrap();
        assert_eq!(opened.origin, SessionOrigin::Explicit);

        let status = session_status(&mut conn, &courier()).await.unwrap().unwrap();
        assert_eq!(status.id, opened.id);

        // past noon the explicit session is still the one used
        let later = resolve_or_create(&mut conn, &courier(), &settings, at(2, 13, 0))
            .await
            .unwrap();
        assert_eq!(later.id, opened.id);
    }

    #[tokio::test]
    async fn test_close_rules() {
        let db = database().await;
        let mut conn = db.acquire().await.unwrap();

        let err = close_session(&mut conn, &courier(), None, at(2, 13, 0))
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::NoOpenSession { .. }));

        let opened = open_session(&mut conn, &SessionSettings::default(), &courier(), at(2, 13, 0))
            .await
            .unwrap();

        let stranger = Actor::new("courier-2", "Bisimwa");
        let err = close_session(&mut conn, &stranger, Some(&opened.id), at(2, 14, 0))
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::Forbidden { .. }));

        let closed = close_session(&mut conn, &courier(), None, at(2, 14, 0))
            .await
            .unwrap();
        assert_eq!(closed.state, SessionState::Closed);
        assert_eq!(closed.closed_at, Some(at(2, 14, 0)));

        let admin = Actor::new("admin", "Admin").admin();
        let again = close_session(&mut conn, &admin, Some(&opened.id), at(2, 15, 0))
            .await
            .unwrap();
        assert_eq!(again.closed_at, Some(at(2, 14, 0)));
    }

    #[tokio::test]
    async fn test_reopen_keeps_one_open_session() {
        let db = database().await;
        let mut conn = db.acquire().await.unwrap();
        let settings = SessionSettings::default();

        let monday = open_session(&mut conn, &settings, &courier(), at(2, 13, 0))
            .await
            .unwrap();
        close_session(&mut conn, &courier(), None, at(2, 18, 0))
            .await
            .unwrap();
        let tuesday = open_session(&mut conn, &settings, &courier(), at(3, 13, 0))
            .await
            .unwrap();
        assert_ne!(monday.id, tuesday.id);

        let reopened = reopen_session(&mut conn, &courier(), &monday.id, at(3, 14, 0))
            .await
            .unwrap();
        assert_eq!(reopened.state, SessionState::Open);
        assert_eq!(reopened.closed_at, None);

        let mut sessions = SessionRepository::new(&mut conn);
        let tuesday = sessions.get_required(&tuesday.id).await.unwrap();
        assert_eq!(tuesday.state, SessionState::Closed);
        assert_eq!(sessions.find_open("courier-1").await.unwrap().unwrap().id, monday.id);
    }
}

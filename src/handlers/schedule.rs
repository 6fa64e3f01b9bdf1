use axum::{extract::State, Extension, Json};

use crate::auth::middleware::AuthUser;
use crate::dto::TodayScheduleResponse;
use crate::error::AppResult;
use crate::reminders;
use crate::AppState;

/// Today's schedule after a fresh reconcile pass.
pub async fn get_today(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
) -> AppResult<Json<TodayScheduleResponse>> {
    let snapshot = state.schedules.run_pass(auth_user.id, auth_user.role).await;
    reminders::announce_all_done(state.notifier.as_ref(), auth_user.id, &snapshot);
    let policy = state.schedules.config().policy_for(auth_user.role);

    Ok(Json(TodayScheduleResponse::from_snapshot(snapshot, policy)))
}

/// Run one reminder pass now, as the periodic timer would.
pub async fn run_check(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
) -> AppResult<Json<TodayScheduleResponse>> {
    let snapshot = state.schedules.run_pass(auth_user.id, auth_user.role).await;
    reminders::publish_progress(state.ws_tx.as_ref(), auth_user.id, &snapshot);
    reminders::announce_all_done(state.notifier.as_ref(), auth_user.id, &snapshot);
    reminders::remind(state.notifier.as_ref(), auth_user.id, &snapshot);
    let policy = state.schedules.config().policy_for(auth_user.role);

    Ok(Json(TodayScheduleResponse::from_snapshot(snapshot, policy)))
}

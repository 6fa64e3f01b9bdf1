use axum::{
    extract::{Query, State},
    http::StatusCode,
    Extension, Json,
};
use validator::Validate;

use crate::auth::middleware::AuthUser;
use crate::dto::{CreateMoodEntryRequest, CreateMoodEntryResponse, ExportResponse, MoodEntryQuery};
use crate::error::{AppError, AppResult};
use crate::models::mood_entry::{
    MoodEntry, MoodKind, NewMoodEntry, UNSCHEDULED_LABEL, WELCOME_KEY, WELCOME_LABEL,
};
use crate::notify::Notification;
use crate::reminders;
use crate::schedule::SlotKey;
use crate::AppState;

pub async fn create_mood_entry(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    Json(body): Json<CreateMoodEntryRequest>,
) -> AppResult<(StatusCode, Json<CreateMoodEntryResponse>)> {
    body.validate()?;

    let mood = MoodKind::from_emoji(body.emoji.trim())
        .ok_or_else(|| AppError::Validation("Unknown mood emoji".into()))?;

    let schedule_key = body
        .schedule_key
        .as_deref()
        .map(str::trim)
        .filter(|k| !k.is_empty())
        .map(str::to_string);
    let scheduled_label = body
        .scheduled_label
        .as_deref()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| default_label(schedule_key.as_deref()).to_string());

    let schedules = &state.schedules;
    let now = schedules.local_now();
    let was_completed = match schedule_key.as_deref() {
        Some(key) => schedules.is_slot_completed(auth_user.id, now.date(), key).await,
        None => false,
    };

    let entry = schedules
        .remote()
        .insert(NewMoodEntry {
            user_id: auth_user.id,
            user_role: auth_user.role,
            entry_date: now.date(),
            entry_time: now.time(),
            mood,
            scheduled_label,
            schedule_key,
            notes: body.notes.filter(|n| !n.trim().is_empty()),
        })
        .await?;

    tracing::info!(
        user_id = %auth_user.id,
        entry_id = %entry.id,
        mood = %entry.mood_label,
        schedule_key = ?entry.schedule_key,
        "Mood entry logged"
    );
    state.notifier.notify(Notification::mood_logged(&entry));

    let raw_key = entry.schedule_key.as_deref().unwrap_or_default();
    let (schedule, completion) = schedules
        .complete_slot(auth_user.id, entry.entry_date, raw_key)
        .await;
    let progress = schedule.progress();
    // A concurrent reconcile may have merged this entry first; it announces
    // the day's completion itself in that case.
    let slot_completed =
        !was_completed && SlotKey::parse(raw_key).is_some_and(|key| schedule.is_completed(key));

    if completion.all_done {
        state
            .notifier
            .notify(Notification::all_check_ins_done(auth_user.id, progress.total));
    }

    let mut next_due = None;
    if slot_completed && !schedule.is_all_done() {
        // Surface the next pending reminder right away.
        let snapshot = schedules.run_pass(auth_user.id, auth_user.role).await;
        reminders::publish_progress(state.ws_tx.as_ref(), auth_user.id, &snapshot);
        reminders::announce_all_done(state.notifier.as_ref(), auth_user.id, &snapshot);
        reminders::remind(state.notifier.as_ref(), auth_user.id, &snapshot);
        next_due = snapshot.due.map(|due| due.slot);
    }

    Ok((
        StatusCode::CREATED,
        Json(CreateMoodEntryResponse::new(entry, progress, slot_completed, next_due)),
    ))
}

fn default_label(schedule_key: Option<&str>) -> &'static str {
    match schedule_key {
        Some(WELCOME_KEY) => WELCOME_LABEL,
        Some(key) => SlotKey::parse(key).map_or(UNSCHEDULED_LABEL, SlotKey::label),
        None => UNSCHEDULED_LABEL,
    }
}

pub async fn list_mood_entries(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    Query(query): Query<MoodEntryQuery>,
) -> AppResult<Json<Vec<MoodEntry>>> {
    let (start, end) = query.resolve(state.schedules.today());
    if start > end {
        return Err(AppError::Validation(
            "start_date must not be after end_date".into(),
        ));
    }

    let entries = state
        .schedules
        .remote()
        .list_entries(auth_user.id, Some((start, end)))
        .await?;

    Ok(Json(entries))
}

pub async fn export_mood_entries(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
) -> AppResult<Json<ExportResponse>> {
    let entries = state
        .schedules
        .remote()
        .list_entries(auth_user.id, None)
        .await?;

    tracing::info!(user_id = %auth_user.id, total = entries.len(), "Mood data exported");

    Ok(Json(ExportResponse::new(
        auth_user.id,
        state.schedules.utc_now(),
        entries,
    )))
}

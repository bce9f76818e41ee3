//! Wall-clock jobs, all in the home's timezone. A failed firing is logged
//! and dropped; the next firing runs regardless.

use std::sync::Arc;

use tokio_cron_scheduler::{Job, JobScheduler, JobSchedulerError};
use tracing::{debug, error, info};

use crate::{error::AppError, reports, state::AppState};

pub async fn init_cron(state: Arc<AppState>) -> Result<JobScheduler, JobSchedulerError> {
    let scheduler = JobScheduler::new().await?;
    let tz = state.config.tz;

    // Thursday 10:00 survey
    let survey_state = state.clone();
    scheduler
        .add(Job::new_async_tz("0 0 10 * * Thu", tz, move |_id, _scheduler| {
            let state = survey_state.clone();

            Box::pin(async move {
                if !state.whatsapp.enabled() || state.config.survey_group.is_empty() {
                    debug!("Survey group not configured, skipping");
                    return;
                }

                match state
                    .whatsapp
                    .send_survey(&state.config.survey_group, "Poker tonight?", &["Yes", "No"])
                    .await
                {
                    Ok(_) => info!("Weekly survey sent"),
                    Err(e) => error!("Failed to send weekly survey: {e}"),
                }
            })
        })?)
        .await?;

    // 08:00 health scan
    let scan_state = state.clone();
    scheduler
        .add(Job::new_async_tz("0 0 8 * * *", tz, move |_id, _scheduler| {
            let state = scan_state.clone();

            Box::pin(async move {
                if let Err(e) = morning_scan(&state).await {
                    error!("Morning health scan failed: {e}");
                }
            })
        })?)
        .await?;

    scheduler.start().await?;

    Ok(scheduler)
}

async fn morning_scan(state: &AppState) -> Result<(), AppError> {
    let results = reports::absent_elimination(&state.store).await?;

    if results.is_empty() {
        info!("No residents with four consecutive absent notes today");
        return Ok(());
    }

    info!("{} resident(s) flagged by the absent-elimination scan", results.len());

    state
        .whatsapp
        .notify(&state.config.alerts_group, reports::absent_alert_text(&results));

    Ok(())
}

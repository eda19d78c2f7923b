use crate::batch::{JobError, ParseJob};
use crate::config::{AppConfig, MarketSession};
use chrono::{DateTime, Datelike, Timelike, Utc, Weekday};
use chrono_tz::Tz;
use tracing::{debug, error, info, instrument, warn};

/// True while the configured market is trading at `now`.
pub fn is_market_session(session: &MarketSession, now: DateTime<Utc>) -> bool {
    let tz: Tz = match session.timezone.parse() {
        Ok(tz) => tz,
        Err(e) => {
            warn!("Failed to parse timezone '{}': {}", session.timezone, e);
            return false;
        }
    };

    let now_local = now.with_timezone(&tz);

    if session.weekdays_only && matches!(now_local.weekday(), Weekday::Sat | Weekday::Sun) {
        return false;
    }

    let current_hour = now_local.hour();
    current_hour >= session.open_hour && current_hour < session.close_hour
}

/// Re-runs the parse batch on a fixed interval. Returns immediately when no
/// interval is configured.
#[instrument(skip(job, config))]
pub async fn run(job: ParseJob, config: AppConfig) {
    let Some(interval) = config.parse_interval else {
        info!("No parse interval configured, periodic worker disabled");
        return;
    };
    info!(?interval, skip_market_session = config.skip_market_session, "Starting parse worker");

    let mut iteration_count = 0_u64;
    loop {
        tokio::time::sleep(interval).await;
        iteration_count += 1;

        if config.skip_market_session && is_market_session(&config.market_session, Utc::now()) {
            debug!(iteration = iteration_count, "Market in session, postponing parse batch");
            continue;
        }

        match job.try_run().await {
            Ok(report) => info!(
                iteration = iteration_count,
                judged = report.judged,
                failed = report.failures.len(),
                "Periodic parse batch finished"
            ),
            Err(JobError::Busy) => debug!(iteration = iteration_count, "Skipped periodic run, batch already in flight"),
            Err(e) => error!(iteration = iteration_count, error = %e, "Periodic parse batch failed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn shanghai() -> MarketSession {
        MarketSession::default()
    }

    #[test]
    fn test_session_uses_local_market_time() {
        // 02:30 UTC is 10:30 in Shanghai, a Monday
        let monday = Utc.with_ymd_and_hms(2017, 7, 3, 2, 30, 0).unwrap();
        assert!(is_market_session(&shanghai(), monday));

        // 08:00 UTC is 16:00 in Shanghai, after the close
        let evening = Utc.with_ymd_and_hms(2017, 7, 3, 8, 0, 0).unwrap();
        assert!(!is_market_session(&shanghai(), evening));
    }

    #[test]
    fn test_weekend_is_closed_unless_configured() {
        let saturday = Utc.with_ymd_and_hms(2017, 7, 8, 2, 30, 0).unwrap();
        assert!(!is_market_session(&shanghai(), saturday));

        let every_day = MarketSession {
            weekdays_only: false,
            ..shanghai()
        };
        assert!(is_market_session(&every_day, saturday));
    }

    #[test]
    fn test_unknown_timezone_is_never_in_session() {
        let session = MarketSession {
            timezone: "Mars/Olympus".to_string(),
            ..shanghai()
        };
        let monday = Utc.with_ymd_and_hms(2017, 7, 3, 2, 30, 0).unwrap();
        assert!(!is_market_session(&session, monday));
    }
}

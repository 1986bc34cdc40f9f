pub mod crypto;
pub mod weather;

use chrono::{ Duration, Utc };
use serde::Serialize;
use std::time::Duration as StdDuration;

use crate::cli::Args;
use crate::models::chat::iso_millis;

#[derive(Debug, Clone, Serialize)]
pub struct CalendarEvent {
    pub id: u32,
    pub time: String,
    pub title: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct Notification {
    pub id: u32,
    pub message: String,
    pub timestamp: String,
}

/// Calendar and notification feed shown on the dashboard home view.
#[derive(Debug, Clone, Serialize)]
pub struct DashboardFeed {
    pub calendar_events: Vec<CalendarEvent>,
    pub notifications: Vec<Notification>,
}

impl DashboardFeed {
    /// Sample feed, stamped relative to process start.
    pub fn sample() -> Self {
        let now = Utc::now();
        let event = |id, time: &str, title: &str| CalendarEvent {
            id,
            time: time.to_string(),
            title: title.to_string(),
        };
        let notification = |id, message: &str, age: Duration| Notification {
            id,
            message: message.to_string(),
            timestamp: iso_millis::format(&(now - age)),
        };

        Self {
            calendar_events: vec![
                event(1, "09:00 AM", "Company All-Hands"),
                event(2, "11:30 AM", "Marketing Sync-Up"),
                event(3, "03:00 PM", "Product Roadmap Review")
            ],
            notifications: vec![
                notification(
                    1,
                    "New security update available. Please update your devices.",
                    Duration::minutes(30)
                ),
                notification(
                    2,
                    "Q3 Financial Results published on the portal.",
                    Duration::hours(2)
                ),
                notification(
                    3,
                    "Reminder: Annual Performance Reviews due next week.",
                    Duration::hours(24)
                )
            ],
        }
    }
}

/// Everything the dashboard widgets' proxy endpoints need.
pub struct Dashboard {
    pub feed: DashboardFeed,
    pub http: reqwest::Client,
    pub weather_api_key: Option<String>,
    pub coingecko_base_url: String,
}

impl Dashboard {
    pub fn from_args(args: &Args) -> Result<Self, reqwest::Error> {
        let http = reqwest::Client
            ::builder()
            .timeout(StdDuration::from_secs(args.provider_timeout_secs))
            .build()?;
        Ok(Self {
            feed: DashboardFeed::sample(),
            http,
            weather_api_key: args.openweathermap_api_key.clone().filter(|k| !k.trim().is_empty()),
            coingecko_base_url: args.coingecko_base_url.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sample_feed_has_three_of_each() {
        let feed = DashboardFeed::sample();
        assert_eq!(feed.calendar_events.len(), 3);
        assert_eq!(feed.notifications.len(), 3);
        assert!(feed.notifications[0].timestamp > feed.notifications[2].timestamp);
    }
}

use std::path::PathBuf;
use std::time::{Duration, SystemTime};

pub const DEFAULT_TIMEFRAME_DAYS: u32 = 7;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Timeframe {
    Today,
    LastDays(u32),
}

impl Default for Timeframe {
    fn default() -> Self {
        Self::LastDays(DEFAULT_TIMEFRAME_DAYS)
    }
}

impl Timeframe {
    pub fn label(self) -> String {
        match self {
            Self::Today => "the last 24 hours".to_string(),
            Self::LastDays(1) => "the last day".to_string(),
            Self::LastDays(days) => format!("the last {days} days"),
        }
    }

    /// Oldest modification time still inside the window.
    pub fn cutoff(self, now: SystemTime) -> SystemTime {
        let days = match self {
            Self::Today => 1,
            Self::LastDays(days) => u64::from(days.max(1)),
        };
        now.checked_sub(Duration::from_secs(days * 24 * 60 * 60))
            .unwrap_or(SystemTime::UNIX_EPOCH)
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ProjectSummary {
    pub name: String,
    pub path: PathBuf,
    pub last_activity: Option<SystemTime>,
    pub session_count: usize,
    pub session_paths: Vec<PathBuf>,
    pub total_bytes: u64,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct PromptPair {
    pub prompt: String,
    pub system_prompt: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cutoff_subtracts_whole_days() {
        let now = SystemTime::UNIX_EPOCH + Duration::from_secs(10 * 86_400);
        assert_eq!(
            Timeframe::LastDays(7).cutoff(now),
            SystemTime::UNIX_EPOCH + Duration::from_secs(3 * 86_400)
        );
        assert_eq!(
            Timeframe::Today.cutoff(now),
            SystemTime::UNIX_EPOCH + Duration::from_secs(9 * 86_400)
        );
        assert_eq!(Timeframe::LastDays(30).cutoff(now), SystemTime::UNIX_EPOCH);
    }

    #[test]
    fn labels_read_naturally() {
        assert_eq!(Timeframe::LastDays(1).label(), "the last day");
        assert_eq!(Timeframe::default().label(), "the last 7 days");
    }
}

use chrono::{DateTime, FixedOffset, NaiveTime, Timelike};
use serde::{Deserialize, Serialize};

/// Daily comfort window: comfort setpoint inside, eco setpoint outside.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComfortSchedule {
    #[serde(rename = "comfortTemp", default = "default_comfort_temp")]
    pub comfort_temp: f64,
    #[serde(rename = "ecoTemp", default = "default_eco_temp")]
    pub eco_temp: f64,
    #[serde(with = "hhmm", default = "default_start")]
    pub start: NaiveTime,
    #[serde(with = "hhmm", default = "default_end")]
    pub end: NaiveTime,
}

fn default_comfort_temp() -> f64 {
    21.0
}

fn default_eco_temp() -> f64 {
    18.0
}

fn default_start() -> NaiveTime {
    NaiveTime::from_hms_opt(7, 0, 0).unwrap_or(NaiveTime::MIN)
}

fn default_end() -> NaiveTime {
    NaiveTime::from_hms_opt(22, 0, 0).unwrap_or(NaiveTime::MIN)
}

impl Default for ComfortSchedule {
    fn default() -> Self {
        Self {
            comfort_temp: default_comfort_temp(),
            eco_temp: default_eco_temp(),
            start: default_start(),
            end: default_end(),
        }
    }
}

impl ComfortSchedule {
    pub fn validate(&self) -> bool {
        self.comfort_temp.is_finite() && self.eco_temp.is_finite()
    }

    /// Windows where `end < start` run across midnight.
    pub fn in_comfort(&self, time: NaiveTime) -> bool {
        let minutes = time.hour() * 60 + time.minute();
        let start = self.start.hour() * 60 + self.start.minute();
        let end = self.end.hour() * 60 + self.end.minute();

        if start == end {
            return false;
        }
        if start < end {
            (start..end).contains(&minutes)
        } else {
            minutes >= start || minutes < end
        }
    }

    pub fn target_at(&self, now: DateTime<FixedOffset>) -> f64 {
        if self.in_comfort(now.time()) {
            self.comfort_temp
        } else {
            self.eco_temp
        }
    }
}

mod hhmm {
    use chrono::NaiveTime;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(time: &NaiveTime, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&time.format("%H:%M").to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<NaiveTime, D::Error> {
        let raw = String::deserialize(deserializer)?;
        NaiveTime::parse_from_str(&raw, "%H:%M:%S")
            .or_else(|_| NaiveTime::parse_from_str(&raw, "%H:%M"))
            .map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn fixed_time(hour: u32, minute: u32) -> DateTime<FixedOffset> {
        FixedOffset::east_opt(3600)
            .unwrap()
            .with_ymd_and_hms(2026, 1, 5, hour, minute, 0)
            .unwrap()
    }

    #[test]
    fn daytime_window_switches_between_setpoints() {
        let schedule = ComfortSchedule::default();

        assert_eq!(schedule.target_at(fixed_time(6, 59)), 18.0);
        assert_eq!(schedule.target_at(fixed_time(7, 0)), 21.0);
        assert_eq!(schedule.target_at(fixed_time(21, 59)), 21.0);
        assert_eq!(schedule.target_at(fixed_time(22, 0)), 18.0);
    }

    #[test]
    fn window_wraps_midnight() {
        let schedule = ComfortSchedule {
            start: NaiveTime::from_hms_opt(22, 0, 0).unwrap(),
            end: NaiveTime::from_hms_opt(6, 0, 0).unwrap(),
            ..ComfortSchedule::default()
        };

        assert!(schedule.in_comfort(NaiveTime::from_hms_opt(23, 30, 0).unwrap()));
        assert!(schedule.in_comfort(NaiveTime::from_hms_opt(5, 59, 0).unwrap()));
        assert!(!schedule.in_comfort(NaiveTime::from_hms_opt(12, 0, 0).unwrap()));
    }

    #[test]
    fn accepts_both_time_formats() {
        let schedule: ComfortSchedule = serde_json::from_str(
            r#"{"comfortTemp": 20.5, "ecoTemp": 17.0, "start": "06:30:00", "end": "21:15"}"#,
        )
        .unwrap();

        assert_eq!(schedule.start, NaiveTime::from_hms_opt(6, 30, 0).unwrap());
        assert_eq!(schedule.end, NaiveTime::from_hms_opt(21, 15, 0).unwrap());
        assert_eq!(schedule.comfort_temp, 20.5);
    }
}

//! Time and date queries

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use tokio_util::sync::CancellationToken;

use super::{Intent, Skill, SkillError, SkillParams};
use crate::config::SkillConfig;
use crate::{Error, Result};

/// Cities the assistant knows a zone for
const CITY_ZONES: &[(&str, Tz)] = &[
    ("new york", chrono_tz::America::New_York),
    ("london", chrono_tz::Europe::London),
    ("paris", chrono_tz::Europe::Paris),
    ("tokyo", chrono_tz::Asia::Tokyo),
    ("sydney", chrono_tz::Australia::Sydney),
    ("los angeles", chrono_tz::America::Los_Angeles),
    ("chicago", chrono_tz::America::Chicago),
    ("beijing", chrono_tz::Asia::Shanghai),
    ("moscow", chrono_tz::Europe::Moscow),
    ("berlin", chrono_tz::Europe::Berlin),
];

const TIME_FORMAT: &str = "%-I:%M %p";
const DATE_FORMAT: &str = "%A, %B %-d, %Y";

/// Current time, date, weekday and city times
#[derive(Debug, Clone, Default)]
pub struct TimeDateSkill {
    /// Configured zone; UTC when unset
    timezone: Option<Tz>,
}

impl TimeDateSkill {
    pub const NAME: &'static str = "time_date";

    #[must_use]
    pub const fn new(timezone: Option<Tz>) -> Self {
        Self { timezone }
    }

    /// Build from `[skills.time_date]`
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` if `timezone` is not an IANA zone name
    pub fn from_config(config: &SkillConfig) -> Result<Self> {
        let timezone = config
            .param_str("timezone")
            .map(|name| {
                name.parse::<Tz>()
                    .map_err(|_| Error::Config(format!("skills.time_date.timezone: unknown timezone {name}")))
            })
            .transpose()?;
        Ok(Self { timezone })
    }

    fn zone(&self) -> Tz {
        self.timezone.unwrap_or(Tz::UTC)
    }

    /// Answer `handler` as of `now`
    fn respond(
        &self,
        handler: &str,
        params: &SkillParams,
        now: DateTime<Utc>,
    ) -> std::result::Result<String, SkillError> {
        let local = now.with_timezone(&self.zone());
        match handler {
            "time" => Ok(format!("The current time is {}.", local.format(TIME_FORMAT))),
            "date" => Ok(format!("Today is {}.", local.format(DATE_FORMAT))),
            "day" => Ok(format!("Today is {}.", local.format("%A"))),
            "timezone" => Ok(self.timezone.map_or_else(
                || "Your timezone is not set, so I'm using UTC.".to_string(),
                |tz| format!("Your current timezone is set to {}.", tz.name()),
            )),
            "time_in_location" => {
                let Some(location) = params.get("location").map(|l| l.trim()) else {
                    return Ok("I'm not sure which location you're asking about.".to_string());
                };
                let Some((_, tz)) = CITY_ZONES.iter().find(|(city, _)| *city == location) else {
                    return Ok(format!("I don't know the timezone for {location}."));
                };
                let there = now.with_timezone(tz);
                Ok(format!(
                    "The current time in {} is {} on {}.",
                    title_case(location),
                    there.format(TIME_FORMAT),
                    there.format(DATE_FORMAT),
                ))
            }
            other => Err(SkillError::new(format!("unknown handler {other}"))),
        }
    }
}

#[async_trait]
impl Skill for TimeDateSkill {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn description(&self) -> &str {
        "Tells the current time, date and day, here or in a major city"
    }

    fn intents(&self) -> Vec<Intent> {
        let mut intents: Vec<Intent> = [
            ("what time is it", "time"),
            ("what's the time", "time"),
            ("current time", "time"),
            ("tell me the time", "time"),
            ("what's today's date", "date"),
            ("what is today's date", "date"),
            ("what's the date", "date"),
            ("current date", "date"),
            ("what day is it", "day"),
            ("what day is today", "day"),
            ("what's my timezone", "timezone"),
            ("current timezone", "timezone"),
        ]
        .into_iter()
        .map(|(phrase, handler)| Intent::phrase(phrase, handler))
        .collect();

        // Static pattern; compiles
        if let Ok(intent) = Intent::regex(
            r"\btime (?:is it )?in (?P<location>[a-z][a-z ]*)$",
            "time_in_location",
        ) {
            intents.push(intent);
        }
        intents
    }

    async fn execute(
        &self,
        handler: &str,
        params: &SkillParams,
        _cancel: CancellationToken,
    ) -> std::result::Result<String, SkillError> {
        self.respond(handler, params, Utc::now())
    }
}

fn title_case(text: &str) -> String {
    text.split(' ')
        .map(|word| {
            let mut chars = word.chars();
            chars.next().map_or_else(String::new, |first| {
                first.to_uppercase().chain(chars).collect()
            })
        })
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use chrono::TimeZone;

    use super::*;
    use crate::skills::SkillRegistry;

    fn at_three_pm() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 15, 15, 0, 0).unwrap()
    }

    #[test]
    fn time_date_and_day_in_utc() {
        let skill = TimeDateSkill::default();
        let params = SkillParams::new();

        assert_eq!(
            skill.respond("time", &params, at_three_pm()).unwrap(),
            "The current time is 3:00 PM."
        );
        assert_eq!(
            skill.respond("date", &params, at_three_pm()).unwrap(),
            "Today is Friday, March 15, 2024."
        );
        assert_eq!(
            skill.respond("day", &params, at_three_pm()).unwrap(),
            "Today is Friday."
        );
    }

    #[test]
    fn configured_timezone_shifts_answers() {
        let skill = TimeDateSkill::new(Some(chrono_tz::Asia::Tokyo));
        assert_eq!(
            skill.respond("time", &SkillParams::new(), at_three_pm()).unwrap(),
            "The current time is 12:00 AM."
        );
        assert_eq!(
            skill.respond("timezone", &SkillParams::new(), at_three_pm()).unwrap(),
            "Your current timezone is set to Asia/Tokyo."
        );
    }

    #[test]
    fn time_in_known_and_unknown_city() {
        let skill = TimeDateSkill::default();
        let mut params = SkillParams::new();
        params.insert("location".to_string(), "london".to_string());
        assert_eq!(
            skill.respond("time_in_location", &params, at_three_pm()).unwrap(),
            "The current time in London is 3:00 PM on Friday, March 15, 2024."
        );

        params.insert("location".to_string(), "atlantis".to_string());
        assert_eq!(
            skill.respond("time_in_location", &params, at_three_pm()).unwrap(),
            "I don't know the timezone for atlantis."
        );
    }

    #[test]
    fn unknown_handler_is_a_skill_error() {
        let skill = TimeDateSkill::default();
        assert!(skill.respond("alarm", &SkillParams::new(), at_three_pm()).is_err());
    }

    #[test]
    fn from_config_validates_timezone() {
        let mut params = BTreeMap::new();
        params.insert("timezone".to_string(), toml::Value::String("Europe/Paris".to_string()));
        let config = SkillConfig {
            enabled: true,
            params,
        };
        assert_eq!(
            TimeDateSkill::from_config(&config).unwrap().zone(),
            chrono_tz::Europe::Paris
        );

        let mut bad = config;
        bad.params
            .insert("timezone".to_string(), toml::Value::String("Mars/Olympus".to_string()));
        assert!(TimeDateSkill::from_config(&bad).is_err());
    }

    #[test]
    fn intents_route_city_queries() {
        let mut registry = SkillRegistry::default();
        registry.register(TimeDateSkill::default()).unwrap();

        let found = registry.resolve("What time is it in New York?").unwrap();
        assert_eq!(found.handler, "time_in_location");
        assert_eq!(found.params["location"], "new york");

        assert_eq!(registry.resolve("what day is it").unwrap().handler, "day");
        assert_eq!(registry.resolve("what's the time").unwrap().handler, "time");
    }
}

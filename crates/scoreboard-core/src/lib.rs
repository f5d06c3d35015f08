use std::collections::btree_map::Entry;
use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use time::{OffsetDateTime, UtcOffset};

pub const UNKNOWN_DISPLAY_NAME: &str = "Unknown";

pub const DEFAULT_LEADERBOARD_LIMIT: i64 = 10;
pub const DEFAULT_PERSONAL_BEST_LIMIT: i64 = 5;
pub const DEFAULT_RECENT_ACTIVITY_LIMIT: i64 = 10;

type BoxedSource = Box<dyn std::error::Error + Send + Sync + 'static>;

#[derive(Debug, thiserror::Error)]
pub enum ScoreError {
    #[error("validation error: {0}")]
    Validation(String),
    #[error("storage error: {context}: {source}")]
    Storage {
        context: String,
        #[source]
        source: BoxedSource,
    },
}

impl ScoreError {
    pub fn storage(context: impl Into<String>, source: impl Into<BoxedSource>) -> Self {
        Self::Storage {
            context: context.into(),
            source: source.into(),
        }
    }

    #[must_use]
    pub fn is_validation(&self) -> bool {
        matches!(self, Self::Validation(_))
    }

    #[must_use]
    pub fn is_storage(&self) -> bool {
        matches!(self, Self::Storage { .. })
    }
}

/// External numeric user id of a player. Zero is treated as absent.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[serde(transparent)]
pub struct PlayerId(pub i64);

impl Display for PlayerId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One completed game as stored in the ledger.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ScoreEvent {
    pub id: i64,
    pub player_id: PlayerId,
    pub display_name: String,
    pub score: u64,
    #[serde(with = "time::serde::rfc3339")]
    pub recorded_at: OffsetDateTime,
}

/// A score submission from a producer, before the ledger assigns identity.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ScoreEventInput {
    pub player_id: Option<PlayerId>,
    pub display_name: String,
    pub score: i64,
}

/// A submission that passed validation; only ledgers construct events from it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidScoreEvent {
    pub player_id: PlayerId,
    pub display_name: String,
    pub score: u64,
}

impl ScoreEventInput {
    pub fn new(player_id: Option<PlayerId>, display_name: impl Into<String>, score: i64) -> Self {
        Self {
            player_id,
            display_name: display_name.into(),
            score,
        }
    }

    /// Validates a submission before append and normalizes its display name.
    ///
    /// # Errors
    /// Returns [`ScoreError::Validation`] when the player id is missing or
    /// zero, or when the score is negative.
    pub fn validate(&self) -> Result<ValidScoreEvent, ScoreError> {
        let player_id = match self.player_id {
            Some(PlayerId(0)) | None => {
                return Err(ScoreError::Validation(
                    "player_id MUST be provided".to_string(),
                ))
            }
            Some(value) => value,
        };

        let score = u64::try_from(self.score).map_err(|_| {
            ScoreError::Validation(format!("score MUST be >= 0, got {}", self.score))
        })?;

        Ok(ValidScoreEvent {
            player_id,
            display_name: normalize_display_name(&self.display_name),
            score,
        })
    }
}

#[must_use]
pub fn normalize_display_name(raw: &str) -> String {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        UNKNOWN_DISPLAY_NAME.to_string()
    } else {
        trimmed.to_string()
    }
}

/// Maximum number of rows a ranking view returns. Always at least one.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct Limit(usize);

impl Limit {
    /// # Errors
    /// Returns [`ScoreError::Validation`] unless `raw` is a positive integer.
    pub fn new(raw: i64) -> Result<Self, ScoreError> {
        if raw <= 0 {
            return Err(ScoreError::Validation(format!(
                "limit MUST be a positive integer, got {raw}"
            )));
        }

        usize::try_from(raw)
            .map(Self)
            .map_err(|_| ScoreError::Validation(format!("limit {raw} is out of range")))
    }

    #[must_use]
    pub fn get(self) -> usize {
        self.0
    }
}

/// Durable append-only storage of score events.
///
/// Implementations serialize writes so that ids are assigned without gaps or
/// duplicates, and make every successful `append` visible to later reads.
pub trait ScoreLedger {
    /// # Errors
    /// Returns [`ScoreError::Validation`] for malformed input and
    /// [`ScoreError::Storage`] when persistence fails. Nothing is written on
    /// error.
    fn append(&self, input: &ScoreEventInput) -> Result<ScoreEvent, ScoreError>;

    /// Every stored event, ordered by id ascending.
    ///
    /// # Errors
    /// Returns [`ScoreError::Storage`] when the read fails.
    fn all(&self) -> Result<Vec<ScoreEvent>, ScoreError>;
}

impl<L: ScoreLedger + ?Sized> ScoreLedger for Arc<L> {
    fn append(&self, input: &ScoreEventInput) -> Result<ScoreEvent, ScoreError> {
        (**self).append(input)
    }

    fn all(&self) -> Result<Vec<ScoreEvent>, ScoreError> {
        (**self).all()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LeaderboardEntry {
    pub player_id: PlayerId,
    pub display_name: String,
    pub score: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PersonalBestEntry {
    pub score: u64,
    #[serde(with = "time::serde::rfc3339")]
    pub recorded_at: OffsetDateTime,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ActivityEntry {
    pub player_id: PlayerId,
    pub display_name: String,
    pub score: u64,
    #[serde(with = "time::serde::rfc3339")]
    pub recorded_at: OffsetDateTime,
}

/// Global leaderboard: each player's best score, highest first.
///
/// Equal bests are ordered by the id of the event that first reached them,
/// and that event also supplies the display name.
#[must_use]
pub fn leaderboard(events: &[ScoreEvent], limit: Limit) -> Vec<LeaderboardEntry> {
    let mut best: BTreeMap<PlayerId, &ScoreEvent> = BTreeMap::new();
    for event in events {
        match best.entry(event.player_id) {
            Entry::Vacant(slot) => {
                slot.insert(event);
            }
            Entry::Occupied(mut slot) => {
                let current = *slot.get();
                if event.score > current.score
                    || (event.score == current.score && event.id < current.id)
                {
                    slot.insert(event);
                }
            }
        }
    }

    let mut winners: Vec<&ScoreEvent> = best.into_values().collect();
    winners.sort_by(|lhs, rhs| rhs.score.cmp(&lhs.score).then(lhs.id.cmp(&rhs.id)));

    winners
        .into_iter()
        .take(limit.get())
        .map(|event| LeaderboardEntry {
            player_id: event.player_id,
            display_name: event.display_name.clone(),
            score: event.score,
        })
        .collect()
}

/// A single player's highest scores; earlier achievements rank above later
/// equal ones.
#[must_use]
pub fn personal_best(
    events: &[ScoreEvent],
    player_id: PlayerId,
    limit: Limit,
) -> Vec<PersonalBestEntry> {
    let mut own: Vec<&ScoreEvent> = events
        .iter()
        .filter(|event| event.player_id == player_id)
        .collect();
    own.sort_by(|lhs, rhs| {
        rhs.score
            .cmp(&lhs.score)
            .then(lhs.recorded_at.cmp(&rhs.recorded_at))
            .then(lhs.id.cmp(&rhs.id))
    });

    own.into_iter()
        .take(limit.get())
        .map(|event| PersonalBestEntry {
            score: event.score,
            recorded_at: event.recorded_at,
        })
        .collect()
}

/// Newest games first.
#[must_use]
pub fn recent_activity(events: &[ScoreEvent], limit: Limit) -> Vec<ActivityEntry> {
    let mut ordered: Vec<&ScoreEvent> = events.iter().collect();
    ordered.sort_by(|lhs, rhs| {
        rhs.recorded_at
            .cmp(&lhs.recorded_at)
            .then(rhs.id.cmp(&lhs.id))
    });

    ordered
        .into_iter()
        .take(limit.get())
        .map(|event| ActivityEntry {
            player_id: event.player_id,
            display_name: event.display_name.clone(),
            score: event.score,
            recorded_at: event.recorded_at,
        })
        .collect()
}

/// The four operations offered to web and bot front ends, bound to one
/// ledger handle owned by the caller's process.
#[derive(Debug)]
pub struct Scoreboard<L> {
    ledger: L,
}

impl<L: ScoreLedger> Scoreboard<L> {
    pub fn new(ledger: L) -> Self {
        Self { ledger }
    }

    pub fn ledger(&self) -> &L {
        &self.ledger
    }

    /// Appends one completed game.
    ///
    /// # Errors
    /// Returns [`ScoreError::Validation`] for a missing player id or negative
    /// score, and [`ScoreError::Storage`] when the ledger write fails.
    pub fn record_score(
        &self,
        player_id: Option<PlayerId>,
        display_name: &str,
        score: i64,
    ) -> Result<ScoreEvent, ScoreError> {
        self.ledger
            .append(&ScoreEventInput::new(player_id, display_name, score))
    }

    /// # Errors
    /// Returns [`ScoreError::Validation`] for a non-positive limit and
    /// [`ScoreError::Storage`] when the ledger read fails.
    pub fn top_scores(&self, limit: i64) -> Result<Vec<LeaderboardEntry>, ScoreError> {
        let limit = Limit::new(limit)?;
        let events = self.ledger.all()?;
        Ok(leaderboard(&events, limit))
    }

    /// Returns an empty list for a player without events.
    ///
    /// # Errors
    /// Returns [`ScoreError::Validation`] for a non-positive limit and
    /// [`ScoreError::Storage`] when the ledger read fails.
    pub fn personal_best(
        &self,
        player_id: PlayerId,
        limit: i64,
    ) -> Result<Vec<PersonalBestEntry>, ScoreError> {
        let limit = Limit::new(limit)?;
        let events = self.ledger.all()?;
        Ok(personal_best(&events, player_id, limit))
    }

    /// # Errors
    /// Returns [`ScoreError::Validation`] for a non-positive limit and
    /// [`ScoreError::Storage`] when the ledger read fails.
    pub fn recent_activity(&self, limit: i64) -> Result<Vec<ActivityEntry>, ScoreError> {
        let limit = Limit::new(limit)?;
        let events = self.ledger.all()?;
        Ok(recent_activity(&events, limit))
    }
}

/// Insert timestamp for a new event: the current time, held back from going
/// below the previous event's timestamp so id order and time order agree.
#[must_use]
pub fn monotonic_recorded_at(
    previous: Option<OffsetDateTime>,
    now: OffsetDateTime,
) -> OffsetDateTime {
    match previous {
        Some(previous) if previous > now => previous,
        _ => now,
    }
}

/// Parses an RFC3339 timestamp and requires UTC.
///
/// # Errors
/// Returns [`ScoreError::Validation`] when parsing fails or an input
/// timestamp is not UTC.
pub fn parse_rfc3339_utc(value: &str) -> Result<OffsetDateTime, ScoreError> {
    let parsed = OffsetDateTime::parse(value, &time::format_description::well_known::Rfc3339)
        .map_err(|err| ScoreError::Validation(format!("invalid RFC3339 timestamp: {err}")))?;

    if parsed.offset() != UtcOffset::UTC {
        return Err(ScoreError::Validation(
            "timestamp MUST use UTC offset Z".to_string(),
        ));
    }

    Ok(parsed)
}

/// Formats a timestamp as RFC3339 after normalizing to UTC.
///
/// # Errors
/// Returns [`ScoreError::Validation`] when formatting fails.
pub fn format_rfc3339(value: OffsetDateTime) -> Result<String, ScoreError> {
    value
        .to_offset(UtcOffset::UTC)
        .format(&time::format_description::well_known::Rfc3339)
        .map_err(|err| ScoreError::Validation(format!("failed to format RFC3339 timestamp: {err}")))
}

#[must_use]
pub fn now_utc() -> OffsetDateTime {
    OffsetDateTime::now_utc().to_offset(UtcOffset::UTC)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use time::Duration;

    fn must<T, E: std::fmt::Display>(result: Result<T, E>) -> T {
        match result {
            Ok(value) => value,
            Err(err) => panic!("expected Ok(..), got error: {err}"),
        }
    }

    fn must_utc(value: &str) -> OffsetDateTime {
        must(parse_rfc3339_utc(value))
    }

    fn limit(raw: i64) -> Limit {
        must(Limit::new(raw))
    }

    fn fixture_event(id: i64, player: i64, name: &str, score: u64) -> ScoreEvent {
        ScoreEvent {
            id,
            player_id: PlayerId(player),
            display_name: name.to_string(),
            score,
            recorded_at: must_utc("2026-02-07T12:00:00Z") + Duration::minutes(id),
        }
    }

    /// In-process ledger used to exercise the facade without a database.
    #[derive(Default)]
    struct VecLedger {
        events: Mutex<Vec<ScoreEvent>>,
    }

    impl ScoreLedger for VecLedger {
        fn append(&self, input: &ScoreEventInput) -> Result<ScoreEvent, ScoreError> {
            let valid = input.validate()?;
            let mut events = self
                .events
                .lock()
                .map_err(|_| ScoreError::storage("vec ledger", "lock poisoned"))?;
            let id = i64::try_from(events.len()).map_err(|err| ScoreError::storage("id", err))? + 1;
            let event = ScoreEvent {
                id,
                player_id: valid.player_id,
                display_name: valid.display_name,
                score: valid.score,
                recorded_at: must_utc("2026-02-07T12:00:00Z") + Duration::seconds(id),
            };
            events.push(event.clone());
            Ok(event)
        }

        fn all(&self) -> Result<Vec<ScoreEvent>, ScoreError> {
            self.events
                .lock()
                .map(|events| events.clone())
                .map_err(|_| ScoreError::storage("vec ledger", "lock poisoned"))
        }
    }

    struct FailingLedger;

    impl ScoreLedger for FailingLedger {
        fn append(&self, _input: &ScoreEventInput) -> Result<ScoreEvent, ScoreError> {
            Err(ScoreError::storage("append", "disk unavailable"))
        }

        fn all(&self) -> Result<Vec<ScoreEvent>, ScoreError> {
            Err(ScoreError::storage("all", "disk unavailable"))
        }
    }

    #[test]
    fn validate_rejects_missing_player_and_negative_score() {
        let missing = ScoreEventInput::new(None, "Alice", 10).validate();
        assert!(matches!(missing, Err(ScoreError::Validation(_))));

        let zero = ScoreEventInput::new(Some(PlayerId(0)), "Alice", 10).validate();
        assert!(matches!(zero, Err(ScoreError::Validation(_))));

        let negative = ScoreEventInput::new(Some(PlayerId(1)), "Alice", -1).validate();
        match negative {
            Err(err) => {
                assert!(err.is_validation());
                assert!(err.to_string().contains("score MUST be >= 0"));
            }
            Ok(value) => panic!("negative score accepted: {value:?}"),
        }
    }

    #[test]
    fn validate_normalizes_display_name() {
        let valid = must(ScoreEventInput::new(Some(PlayerId(7)), "  @alice ", 0).validate());
        assert_eq!(valid.display_name, "@alice");
        assert_eq!(valid.score, 0);

        let blank = must(ScoreEventInput::new(Some(PlayerId(7)), "   ", 3).validate());
        assert_eq!(blank.display_name, UNKNOWN_DISPLAY_NAME);
    }

    #[test]
    fn limit_must_be_positive() {
        assert!(Limit::new(0).is_err());
        assert!(Limit::new(-3).is_err());
        assert_eq!(limit(4).get(), 4);
    }

    #[test]
    fn leaderboard_takes_best_per_player() {
        let events = vec![
            fixture_event(1, 1, "Alice", 50),
            fixture_event(2, 1, "Alice", 80),
            fixture_event(3, 2, "Bob", 60),
        ];

        let top = leaderboard(&events, limit(10));
        let pairs: Vec<(&str, u64)> = top
            .iter()
            .map(|entry| (entry.display_name.as_str(), entry.score))
            .collect();
        assert_eq!(pairs, vec![("Alice", 80), ("Bob", 60)]);
    }

    #[test]
    fn leaderboard_ties_break_on_earliest_achieving_event() {
        let events = vec![
            fixture_event(1, 2, "Bob", 70),
            fixture_event(2, 1, "alice_old", 90),
            fixture_event(3, 3, "Carol", 90),
            fixture_event(4, 1, "Alice", 90),
            fixture_event(5, 2, "Bobby", 70),
        ];

        let top = leaderboard(&events, limit(10));
        assert_eq!(top.len(), 3);
        assert_eq!(top[0].player_id, PlayerId(1));
        assert_eq!(top[0].display_name, "alice_old");
        assert_eq!(top[1].player_id, PlayerId(3));
        assert_eq!(top[2].display_name, "Bob");
    }

    #[test]
    fn leaderboard_respects_limit() {
        let events: Vec<ScoreEvent> = (1..=20)
            .map(|id| fixture_event(id, id, "p", u64::try_from(id).unwrap_or_default()))
            .collect();
        let top = leaderboard(&events, limit(3));
        let scores: Vec<u64> = top.iter().map(|entry| entry.score).collect();
        assert_eq!(scores, vec![20, 19, 18]);
    }

    #[test]
    fn personal_best_orders_by_score_then_time() {
        let events = vec![
            fixture_event(1, 1, "Alice", 50),
            fixture_event(2, 1, "Alice", 80),
            fixture_event(3, 2, "Bob", 60),
            fixture_event(4, 1, "Alice", 50),
        ];

        let mine = personal_best(&events, PlayerId(1), limit(5));
        assert_eq!(mine.len(), 3);
        assert_eq!(mine[0].score, 80);
        assert_eq!(mine[0].recorded_at, events[1].recorded_at);
        assert_eq!(mine[1].recorded_at, events[0].recorded_at);
        assert_eq!(mine[2].recorded_at, events[3].recorded_at);
    }

    #[test]
    fn personal_best_is_empty_for_unknown_player() {
        let events = vec![fixture_event(1, 1, "Alice", 50)];
        assert!(personal_best(&events, PlayerId(99), limit(5)).is_empty());
    }

    #[test]
    fn recent_activity_is_newest_first_with_id_tiebreak() {
        let mut events = vec![
            fixture_event(1, 1, "Alice", 50),
            fixture_event(2, 2, "Bob", 60),
            fixture_event(3, 3, "Carol", 70),
        ];
        events[2].recorded_at = events[1].recorded_at;

        let recent = recent_activity(&events, limit(2));
        let names: Vec<&str> = recent
            .iter()
            .map(|entry| entry.display_name.as_str())
            .collect();
        assert_eq!(names, vec!["Carol", "Bob"]);
    }

    #[test]
    fn monotonic_recorded_at_never_moves_backwards() {
        let earlier = must_utc("2026-02-07T12:00:00Z");
        let later = must_utc("2026-02-07T12:00:05Z");
        assert_eq!(monotonic_recorded_at(None, earlier), earlier);
        assert_eq!(monotonic_recorded_at(Some(earlier), later), later);
        assert_eq!(monotonic_recorded_at(Some(later), earlier), later);
    }

    #[test]
    fn scoreboard_reports_scenario_views_and_is_repeatable() {
        let scoreboard = Scoreboard::new(VecLedger::default());
        let first = must(scoreboard.record_score(Some(PlayerId(1)), "Alice", 50));
        let second = must(scoreboard.record_score(Some(PlayerId(1)), "Alice", 80));
        must(scoreboard.record_score(Some(PlayerId(2)), "Bob", 60));

        let top = must(scoreboard.top_scores(10));
        assert_eq!(top.len(), 2);
        assert_eq!((top[0].display_name.as_str(), top[0].score), ("Alice", 80));
        assert_eq!((top[1].display_name.as_str(), top[1].score), ("Bob", 60));

        let mine = must(scoreboard.personal_best(PlayerId(1), 5));
        assert_eq!(
            mine,
            vec![
                PersonalBestEntry {
                    score: 80,
                    recorded_at: second.recorded_at,
                },
                PersonalBestEntry {
                    score: 50,
                    recorded_at: first.recorded_at,
                },
            ]
        );

        assert_eq!(must(scoreboard.top_scores(10)), top);
        assert_eq!(must(scoreboard.personal_best(PlayerId(1), 5)), mine);
        assert_eq!(
            must(scoreboard.recent_activity(10)),
            must(scoreboard.recent_activity(10))
        );
    }

    #[test]
    fn scoreboard_rejects_non_positive_limits() {
        let scoreboard = Scoreboard::new(VecLedger::default());
        assert!(matches!(
            scoreboard.top_scores(0),
            Err(ScoreError::Validation(_))
        ));
        assert!(matches!(
            scoreboard.personal_best(PlayerId(1), -3),
            Err(ScoreError::Validation(_))
        ));
        assert!(matches!(
            scoreboard.recent_activity(0),
            Err(ScoreError::Validation(_))
        ));
    }

    #[test]
    fn scoreboard_surfaces_storage_errors_unchanged() {
        let scoreboard = Scoreboard::new(FailingLedger);
        let append = scoreboard.record_score(Some(PlayerId(1)), "Alice", 1);
        assert!(append.as_ref().is_err_and(ScoreError::is_storage));
        let read = scoreboard.recent_activity(5);
        match read {
            Err(err) => {
                assert!(err.is_storage());
                assert!(err.to_string().contains("disk unavailable"));
            }
            Ok(value) => panic!("expected storage error, got {value:?}"),
        }
        assert!(scoreboard.top_scores(0).is_err_and(|err| err.is_validation()));
    }

    #[test]
    fn event_json_uses_rfc3339_timestamps() {
        let event = fixture_event(1, 42, "Alice", 80);
        let value = must(serde_json::to_value(&event));
        assert_eq!(
            value,
            serde_json::json!({
                "id": 1,
                "player_id": 42,
                "display_name": "Alice",
                "score": 80,
                "recorded_at": "2026-02-07T12:01:00Z"
            })
        );
    }
}

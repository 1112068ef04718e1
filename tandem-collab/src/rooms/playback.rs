use log::{debug, info};
use tandem_core::{unix_millis, UserId};

use crate::{protocol::*, Mode, OnlineMember, RoomPlaybackState, SongCard};

use super::{chat::require_control, RoomError, RoomManager, RoomResult};

/// What an accepted report did to the playback
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum ReportOutcome {
    /// Position and play state were refreshed, the version stayed the same
    Heartbeat(RoomPlaybackState),
    /// A new song was accepted under the next version
    SongChanged(RoomPlaybackState),
}

impl ReportOutcome {
    pub fn state(&self) -> &RoomPlaybackState {
        match self {
            Self::Heartbeat(state) | Self::SongChanged(state) => state,
        }
    }
}

/// Who sent a report, and when
#[derive(Debug, Clone, Copy)]
pub(crate) struct Reporter<'a> {
    pub user_id: UserId,
    pub username: &'a str,
    pub now: i64,
}

/// Decides what a report does to the current state. Never mutates anything.
///
/// Reports without an expected version are heartbeats: they always refresh the position
/// of the stored song and never touch the song or the version.
/// Reports with one change the song, and only if the version matches.
pub(crate) fn apply_report(
    current: Option<&RoomPlaybackState>,
    report: &MasterReport,
    reporter: Reporter,
) -> RoomResult<ReportOutcome> {
    if !report.position.is_finite() || report.position < 0.0 {
        return Err(RoomError::BadRequest(
            "Position must be a finite, non-negative number".to_string(),
        ));
    }

    let current_version = current.map(|s| s.state_version).unwrap_or(0);
    let current_song_id = current.and_then(|s| s.song_id());
    let reported_song_id = report.reported_song_id();

    let Some(expected_version) = report.expected_version else {
        if reported_song_id.is_some() && reported_song_id != current_song_id {
            debug!(
                "Heartbeat from {} names song {:?} while {:?} is stored",
                reporter.user_id, reported_song_id, current_song_id
            );
        }

        let state = RoomPlaybackState {
            position: report.position,
            is_playing: report.is_playing,
            updated_at: reporter.now,
            updated_by: reporter.user_id,
            updated_by_name: reporter.username.to_string(),
            ..current.cloned().unwrap_or_default()
        };

        return Ok(ReportOutcome::Heartbeat(state));
    };

    let Some(song_id) = reported_song_id else {
        return Err(RoomError::BadRequest(
            "A song change must name a song".to_string(),
        ));
    };

    if expected_version != current_version {
        return Err(RoomError::conflict(current.cloned()));
    }

    let song = match (&report.song, current) {
        (Some(song), _) => song.clone(),
        (None, Some(state)) if current_song_id == Some(song_id) => {
            state.current_song.clone().unwrap_or_else(|| bare_song(song_id))
        }
        (None, _) => bare_song(song_id),
    };

    Ok(ReportOutcome::SongChanged(RoomPlaybackState {
        current_index: report.current_index,
        current_song: Some(song),
        position: report.position,
        is_playing: report.is_playing,
        updated_at: reporter.now,
        updated_by: reporter.user_id,
        updated_by_name: reporter.username.to_string(),
        state_version: current_version + 1,
    }))
}

fn bare_song(id: i64) -> SongCard {
    SongCard {
        id,
        name: String::new(),
        artist: String::new(),
        cover: String::new(),
        duration: 0,
        hls_url: String::new(),
    }
}

impl RoomManager {
    /// Applies a controller's playback report and relays it to the listeners
    pub(super) async fn report(
        &self,
        room_id: &str,
        actor: &OnlineMember,
        report: MasterReport,
    ) -> RoomResult<()> {
        require_control(actor)?;

        let cache = &self.context.cache;

        let outcome = {
            let lock = self.context.locks.playback(room_id);
            let _guard = lock.lock().await;

            let current = cache.playback(room_id).await?;
            let expected = current.as_ref().map(|s| s.state_version).unwrap_or(0);

            let outcome = apply_report(
                current.as_ref(),
                &report,
                Reporter {
                    user_id: actor.user_id,
                    username: &actor.username,
                    now: unix_millis(),
                },
            )?;

            let written = cache
                .compare_and_set_playback(room_id, expected, outcome.state().clone())
                .await?;

            // Another writer got there first, which only happens with a shared cache
            if !written {
                let current = cache.playback(room_id).await?;
                return Err(RoomError::conflict(current));
            }

            outcome
        };

        let listeners: Vec<UserId> = cache
            .online_members(room_id)
            .await?
            .into_iter()
            .filter(|m| m.mode == Mode::Listen)
            .map(|m| m.user_id)
            .collect();

        match outcome {
            ReportOutcome::Heartbeat(state) => {
                let recipients: Vec<_> = listeners
                    .into_iter()
                    .filter(|id| *id != actor.user_id)
                    .collect();

                self.send_to_many(
                    room_id,
                    &recipients,
                    Some(actor.user_id),
                    ServerEvent::MasterSync(self.snapshot(Some(&state))),
                );
            }
            ReportOutcome::SongChanged(state) => {
                let reporter_listens = listeners.contains(&actor.user_id);

                info!(
                    "User {} changed the song of room {} to {:?} (version {})",
                    actor.user_id,
                    room_id,
                    state.song_id(),
                    state.state_version
                );

                let change = SongChange {
                    sync: self.snapshot(Some(&state)),
                    changed_by: actor.user_id,
                    changed_by_name: actor.username.clone(),
                    timestamp: state.updated_at,
                };

                self.send_to_many(
                    room_id,
                    &listeners,
                    Some(actor.user_id),
                    ServerEvent::SongChange(change),
                );

                // A chatting reporter still learns the version it now has to expect
                if !reporter_listens {
                    self.send_to(
                        room_id,
                        actor.user_id,
                        None,
                        ServerEvent::MasterSync(self.snapshot(Some(&state))),
                    );
                }
            }
        }

        Ok(())
    }

    /// Sends the current snapshot to the requester and nudges the master to report
    pub(super) async fn master_request(
        &self,
        room_id: &str,
        actor: &OnlineMember,
    ) -> RoomResult<()> {
        let cache = &self.context.cache;
        let state = cache.playback(room_id).await?;

        self.send_to(
            room_id,
            actor.user_id,
            None,
            ServerEvent::MasterSync(self.snapshot(state.as_ref())),
        );

        let controllers: Vec<_> = cache
            .online_members(room_id)
            .await?
            .into_iter()
            .filter(|m| m.can_control && m.user_id != actor.user_id)
            .map(|m| m.user_id)
            .collect();

        let master = state
            .as_ref()
            .map(|s| s.updated_by)
            .filter(|id| controllers.contains(id));

        let recipients = match master {
            Some(master) => vec![master],
            None => controllers,
        };

        let forwarded = self.send_to_many(
            room_id,
            &recipients,
            Some(actor.user_id),
            ServerEvent::MasterRequest(MasterRequestEvent {
                requested_by: actor.user_id,
            }),
        );

        debug!(
            "Master request from {} in room {} forwarded to {} controller(s)",
            actor.user_id, room_id, forwarded
        );

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    fn reporter() -> Reporter<'static> {
        Reporter {
            user_id: 1,
            username: "alice",
            now: 1000,
        }
    }

    fn song(id: i64) -> SongCard {
        SongCard {
            name: format!("Song {}", id),
            ..bare_song(id)
        }
    }

    fn change(song_id: i64, expected_version: u64) -> MasterReport {
        MasterReport {
            position: 0.0,
            is_playing: true,
            song_id: None,
            song: Some(song(song_id)),
            current_index: Some(0),
            expected_version: Some(expected_version),
        }
    }

    fn heartbeat(song_id: Option<i64>, position: f64) -> MasterReport {
        MasterReport {
            position,
            is_playing: true,
            song_id,
            song: None,
            current_index: None,
            expected_version: None,
        }
    }

    #[test]
    fn test_first_song_change_starts_at_version_one() {
        let outcome = apply_report(None, &change(7, 0), reporter()).unwrap();

        let ReportOutcome::SongChanged(state) = outcome else {
            panic!("expected a song change");
        };

        assert_eq!(state.state_version, 1);
        assert_eq!(state.song_id(), Some(7));
        assert_eq!(state.updated_by_name, "alice");
    }

    #[test]
    fn test_heartbeat_keeps_the_version() {
        let current = apply_report(None, &change(7, 0), reporter()).unwrap();
        let outcome =
            apply_report(Some(current.state()), &heartbeat(Some(7), 42.0), reporter()).unwrap();

        assert!(matches!(outcome, ReportOutcome::Heartbeat(_)));
        assert_eq!(outcome.state().state_version, 1);
        assert_eq!(outcome.state().position, 42.0);
        assert_eq!(outcome.state().song_id(), Some(7));
    }

    #[test]
    fn test_heartbeat_without_state_creates_one() {
        let outcome = apply_report(None, &heartbeat(None, 3.0), reporter()).unwrap();

        assert_eq!(outcome.state().state_version, 0);
        assert_eq!(outcome.state().updated_by, 1);
    }

    #[test]
    fn test_stale_version_conflicts_with_current_state() {
        let current = apply_report(None, &change(7, 0), reporter()).unwrap();
        let result = apply_report(Some(current.state()), &change(8, 0), reporter());

        match result {
            Err(RoomError::Conflict { current: Some(state) }) => {
                assert_eq!(state.state_version, 1);
                assert_eq!(state.song_id(), Some(7));
            }
            other => panic!("expected a conflict, got {:?}", other),
        }
    }

    #[test]
    fn test_heartbeat_naming_another_song_is_still_applied() {
        let current = apply_report(None, &change(7, 0), reporter()).unwrap();
        let outcome =
            apply_report(Some(current.state()), &heartbeat(Some(8), 12.0), reporter()).unwrap();

        assert!(matches!(outcome, ReportOutcome::Heartbeat(_)));
        assert_eq!(outcome.state().position, 12.0);
        assert_eq!(outcome.state().song_id(), Some(7), "heartbeats never change the song");
        assert_eq!(outcome.state().state_version, 1);
    }

    #[test]
    fn test_first_heartbeat_with_a_song_id_creates_the_state() {
        let outcome = apply_report(None, &heartbeat(Some(42), 5.0), reporter()).unwrap();

        assert!(matches!(outcome, ReportOutcome::Heartbeat(_)));
        assert_eq!(outcome.state().position, 5.0);
        assert_eq!(outcome.state().state_version, 0);
        assert_eq!(outcome.state().song_id(), None);
    }

    #[test]
    fn test_invalid_reports_are_bad_requests() {
        let mut versioned_without_song = change(7, 0);
        versioned_without_song.song = None;

        for report in [
            heartbeat(None, -1.0),
            heartbeat(None, f64::NAN),
            heartbeat(None, f64::INFINITY),
            versioned_without_song,
        ] {
            let result = apply_report(None, &report, reporter());
            assert!(
                matches!(result, Err(RoomError::BadRequest(_))),
                "{:?} should be rejected",
                report
            );
        }
    }

    #[test]
    fn test_song_id_only_change_keeps_known_card() {
        let current = apply_report(None, &change(7, 0), reporter()).unwrap();

        let mut report = change(7, 1);
        report.song = None;
        report.song_id = Some(7);
        report.position = 30.0;

        let outcome = apply_report(Some(current.state()), &report, reporter()).unwrap();

        assert_eq!(outcome.state().state_version, 2);
        assert_eq!(
            outcome.state().current_song.as_ref().map(|s| s.name.as_str()),
            Some("Song 7")
        );
    }

    #[derive(Debug, Clone)]
    enum Step {
        Heartbeat(f64, Option<i64>),
        Change { song_id: i64, version_offset: i64 },
    }

    fn step() -> impl Strategy<Value = Step> {
        prop_oneof![
            (0.0..600.0f64, prop::option::of(1..5i64))
                .prop_map(|(position, song_id)| Step::Heartbeat(position, song_id)),
            (1..5i64, -2..3i64).prop_map(|(song_id, version_offset)| Step::Change {
                song_id,
                version_offset
            }),
        ]
    }

    proptest! {
        #[test]
        fn test_version_only_moves_forward_by_one(steps in prop::collection::vec(step(), 1..40)) {
            let mut state: Option<RoomPlaybackState> = None;

            for step in steps {
                let version = state.as_ref().map(|s| s.state_version).unwrap_or(0);

                let report = match step {
                    Step::Heartbeat(position, song_id) => heartbeat(song_id, position),
                    Step::Change { song_id, version_offset } => {
                        let expected = (version as i64 + version_offset).max(0) as u64;
                        change(song_id, expected)
                    }
                };

                match apply_report(state.as_ref(), &report, reporter()) {
                    Ok(ReportOutcome::Heartbeat(next)) => {
                        prop_assert_eq!(next.state_version, version);
                        state = Some(next);
                    }
                    Ok(ReportOutcome::SongChanged(next)) => {
                        prop_assert_eq!(report.expected_version, Some(version));
                        prop_assert_eq!(next.state_version, version + 1);
                        state = Some(next);
                    }
                    Err(RoomError::Conflict { .. }) => {
                        prop_assert!(
                            report.expected_version.is_some(),
                            "heartbeats are never rejected"
                        );
                        prop_assert_ne!(report.expected_version, Some(version));
                    }
                    Err(err) => prop_assert!(false, "unexpected error {}", err),
                }
            }
        }
    }
}

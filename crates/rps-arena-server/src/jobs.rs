//! Tournament jobs.
//!
//! Starting a tournament builds the bracket synchronously, so an empty
//! roster is reported to the caller, then runs it on a spawned task. Every
//! event the run publishes goes to the broadcast channel and into a cached
//! board that always reflects the latest known state, which late WebSocket
//! subscribers and `GET /api/tournament` read from.

use chrono::{DateTime, Utc};
use rps_arena::bracket::BracketError;
use rps_arena::config::TournamentConfig;
use rps_arena::events::{EventSink, MatchRecord, TournamentEvent};
use rps_arena::orchestrator::Tournament;
use rps_arena::registry::BotRegistry;
use rps_arena::resolver::{CancelFlag, MatchResolver};
use rps_arena::sandbox::Executor;
use serde::Serialize;
use std::sync::{Arc, Mutex, MutexGuard};
use thiserror::Error;
use tokio::sync::broadcast;

#[derive(Error, Debug)]
pub enum TriggerError {
    #[error(transparent)]
    Bracket(#[from] BracketError),
    #[error("Tournament {0} is still running")]
    AlreadyRunning(String),
}

/// Acknowledgement returned when a tournament is accepted.
#[derive(Debug, Clone, Serialize)]
pub struct TournamentStarted {
    pub tournament_id: String,
    pub started_at: DateTime<Utc>,
    /// The bracket as built, before any match is played.
    pub matches: Vec<MatchRecord>,
}

/// The tournament currently being played.
#[derive(Debug, Clone, Serialize)]
pub struct RunningTournament {
    pub tournament_id: String,
    pub started_at: DateTime<Utc>,
    #[serde(skip)]
    cancel: CancelFlag,
}

#[derive(Debug)]
struct Board {
    tournament_id: String,
    matches: Vec<MatchRecord>,
}

impl Board {
    fn apply(slot: &mut Option<Board>, event: &TournamentEvent) {
        match event {
            TournamentEvent::Snapshot { matches, .. } => {
                *slot = Some(Board {
                    tournament_id: event.tournament_id().to_string(),
                    matches: matches.clone(),
                });
            }
            TournamentEvent::Update { record, .. } => {
                // Late updates from a replaced tournament are ignored.
                let Some(board) = slot
                    .as_mut()
                    .filter(|board| board.tournament_id == event.tournament_id())
                else {
                    return;
                };
                if let Some(existing) = board.matches.iter_mut().find(|m| m.id == record.id) {
                    *existing = record.clone();
                }
            }
        }
    }
}

struct Inner {
    events: broadcast::Sender<TournamentEvent>,
    board: Mutex<Option<Board>>,
    running: Mutex<Option<RunningTournament>>,
}

/// Publishes to subscribers and keeps the cached board current.
struct JobSink(Arc<Inner>);

impl EventSink for JobSink {
    fn publish(&self, event: TournamentEvent) {
        Board::apply(&mut lock(&self.0.board), &event);
        self.0.events.publish(event);
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

/// Handle to the server's single tournament slot.
#[derive(Clone)]
pub struct TournamentJobs {
    inner: Arc<Inner>,
}

impl TournamentJobs {
    /// Creates the job slot; `capacity` events are buffered per subscriber.
    pub fn new(capacity: usize) -> Self {
        let (events, _) = broadcast::channel(capacity.max(1));
        Self {
            inner: Arc::new(Inner {
                events,
                board: Mutex::new(None),
                running: Mutex::new(None),
            }),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TournamentEvent> {
        self.inner.events.subscribe()
    }

    /// The latest known state of the current or last tournament.
    pub fn latest_snapshot(&self) -> Option<TournamentEvent> {
        lock(&self.inner.board)
            .as_ref()
            .map(|board| TournamentEvent::Snapshot {
                tournament_id: board.tournament_id.clone(),
                matches: board.matches.clone(),
            })
    }

    pub fn running(&self) -> Option<RunningTournament> {
        lock(&self.inner.running).clone()
    }

    /// Starts a tournament between the registry's active bots.
    ///
    /// Returns as soon as the bracket is built; results arrive only as
    /// events.
    ///
    /// # Errors
    ///
    /// Returns [`TriggerError::AlreadyRunning`] while another tournament is
    /// in progress, or [`TriggerError::Bracket`] when there are no active
    /// bots.
    pub fn trigger<E: Executor + 'static>(
        &self,
        registry: Arc<dyn BotRegistry>,
        executor: Arc<E>,
        config: &TournamentConfig,
    ) -> Result<TournamentStarted, TriggerError> {
        let mut running = lock(&self.inner.running);
        if let Some(current) = running.as_ref() {
            return Err(TriggerError::AlreadyRunning(current.tournament_id.clone()));
        }

        let mut entrants = registry.active_bots();
        rps_arena::bracket::seed_entrants(&mut entrants, &mut rand::thread_rng());
        let tournament_id = uuid::Uuid::new_v4().to_string();
        let mut tournament = Tournament::from_entrants(tournament_id.clone(), entrants)?;

        let started = TournamentStarted {
            tournament_id: tournament_id.clone(),
            started_at: Utc::now(),
            matches: tournament.matches().iter().map(MatchRecord::from).collect(),
        };
        let cancel = CancelFlag::new();
        *running = Some(RunningTournament {
            tournament_id: tournament_id.clone(),
            started_at: started.started_at,
            cancel: cancel.clone(),
        });
        drop(running);

        Board::apply(
            &mut lock(&self.inner.board),
            &TournamentEvent::Snapshot {
                tournament_id: tournament_id.clone(),
                matches: started.matches.clone(),
            },
        );

        let inner = self.inner.clone();
        let resolver = MatchResolver::new(executor, registry, config);
        tokio::spawn(async move {
            let sink = JobSink(inner.clone());
            let summary = tournament.run(&resolver, &sink, &cancel).await;
            tracing::info!(
                tournament = %tournament_id,
                winner = ?summary.winner,
                matches_played = summary.matches_played,
                coin_flips = summary.coin_flips,
                cancelled = summary.cancelled,
                "Tournament job finished"
            );

            let mut running = lock(&inner.running);
            if running
                .as_ref()
                .is_some_and(|r| r.tournament_id == tournament_id)
            {
                *running = None;
            }
        });

        Ok(started)
    }

    /// Asks the running tournament to stop. Returns its id, or `None` if
    /// nothing is running.
    pub fn cancel(&self) -> Option<String> {
        let running = lock(&self.inner.running);
        running.as_ref().map(|r| {
            tracing::info!("Cancelling tournament {}", r.tournament_id);
            r.cancel.cancel();
            r.tournament_id.clone()
        })
    }
}

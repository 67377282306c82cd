//! Room state and authoritative tick loop

use std::sync::atomic::{AtomicU64, AtomicU8, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::time::{interval, MissedTickBehavior};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::store::ResultReporter;
use crate::util::time::{unix_millis, TICK_DURATION};
use crate::ws::protocol::{GameSnapshot, ServerMsg};

use super::court::GameMode;
use super::sim::{MatchOutcome, SimState};

/// How long clients get to render the result screen before teardown
pub const END_GRACE: Duration = Duration::from_secs(3);

/// Room lifecycle phase
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoomState {
    /// Slots still open, awaiting opponent(s)
    Waiting = 0,
    /// Capacity reached, tick loop active
    Running = 1,
    /// Terminal; no transition leaves this state
    Ended = 2,
}

impl RoomState {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => RoomState::Waiting,
            1 => RoomState::Running,
            _ => RoomState::Ended,
        }
    }
}

/// Inbound control for a room task
#[derive(Debug)]
pub enum RoomCommand {
    /// A connection was seated by the registry and is now wired up.
    /// The room answers with its current snapshot, which seeds the
    /// connection's `init` message.
    Join {
        slot: usize,
        connection_id: Uuid,
        user_id: Uuid,
        display_name: String,
        reply: oneshot::Sender<GameSnapshot>,
    },
    /// Paddle target for the next tick
    Move { slot: usize, y: f32 },
    /// The connection's channel closed
    Leave { slot: usize },
    /// Idle-sweep kill, honored only while Waiting
    Expire,
}

/// State shared between the room task, its handle, and the registry
pub(crate) struct RoomShared {
    pub(crate) state: AtomicU8,
    /// Seats reserved by the registry (assignment happens under its lock)
    pub(crate) seats: AtomicUsize,
    pub(crate) last_activity: AtomicU64,
}

impl RoomShared {
    fn new() -> Self {
        Self {
            state: AtomicU8::new(RoomState::Waiting as u8),
            // The creating player occupies slot 1
            seats: AtomicUsize::new(1),
            last_activity: AtomicU64::new(unix_millis()),
        }
    }

    pub(crate) fn state(&self) -> RoomState {
        RoomState::from_u8(self.state.load(Ordering::SeqCst))
    }

    fn set_state(&self, state: RoomState) {
        self.state.store(state as u8, Ordering::SeqCst);
    }

    fn touch(&self) {
        self.last_activity.store(unix_millis(), Ordering::SeqCst);
    }
}

/// Cloneable handle to a room task
#[derive(Clone)]
pub struct RoomHandle {
    pub id: Uuid,
    pub mode: GameMode,
    pub capacity: usize,
    pub commands: mpsc::Sender<RoomCommand>,
    pub events: broadcast::Sender<ServerMsg>,
    pub(crate) shared: Arc<RoomShared>,
}

impl RoomHandle {
    pub fn state(&self) -> RoomState {
        self.shared.state()
    }

    pub fn seats_reserved(&self) -> usize {
        self.shared.seats.load(Ordering::SeqCst)
    }

    pub fn touch(&self) {
        self.shared.touch();
    }

    pub fn idle_millis(&self, now: u64) -> u64 {
        now.saturating_sub(self.shared.last_activity.load(Ordering::SeqCst))
    }

    /// Stop the room task through the shared state. Used when its command
    /// queue is unreachable; the loop's top-of-tick liveness check exits.
    pub(crate) fn mark_ended(&self) {
        self.shared.set_state(RoomState::Ended);
    }

    /// Reserve the next free seat. Callers must serialize through the
    /// registry lock; the atomic update is the backstop for the capacity
    /// invariant.
    pub(crate) fn try_reserve_seat(&self) -> Option<usize> {
        if self.state() != RoomState::Waiting {
            return None;
        }
        let capacity = self.capacity;
        self.shared
            .seats
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| {
                (n < capacity).then_some(n + 1)
            })
            .ok()
            .map(|prev| prev + 1)
    }
}

/// A player seated in a room
#[derive(Debug, Clone)]
struct Seat {
    connection_id: Uuid,
    user_id: Uuid,
    display_name: String,
}

/// One match instance. Owns its simulation state; driven by a dedicated task.
pub struct GameRoom<R: ResultReporter> {
    id: Uuid,
    mode: GameMode,
    capacity: usize,
    sim: SimState,
    rng: ChaCha8Rng,
    seats: Vec<Option<Seat>>,
    commands: mpsc::Receiver<RoomCommand>,
    events: broadcast::Sender<ServerMsg>,
    shared: Arc<RoomShared>,
    stats: R,
}

impl<R: ResultReporter> GameRoom<R> {
    pub fn new(mode: GameMode, stats: R) -> (Self, RoomHandle) {
        let id = Uuid::new_v4();
        let capacity = mode.capacity();
        let (command_tx, command_rx) = mpsc::channel(256);
        let (events_tx, _) = broadcast::channel(64);
        let shared = Arc::new(RoomShared::new());

        let handle = RoomHandle {
            id,
            mode,
            capacity,
            commands: command_tx,
            events: events_tx.clone(),
            shared: shared.clone(),
        };

        let room = Self {
            id,
            mode,
            capacity,
            sim: SimState::new(mode),
            rng: ChaCha8Rng::seed_from_u64(rand::random()),
            seats: vec![None; capacity],
            commands: command_rx,
            events: events_tx,
            shared,
            stats,
        };

        (room, handle)
    }

    /// Run the room's tick loop until the match ends
    pub async fn run(mut self) {
        info!(room_id = %self.id, mode = ?self.mode, "Room task started");

        let mut ticker = interval(TICK_DURATION);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;

            // Liveness check at the top of every tick
            if self.shared.state() == RoomState::Ended {
                return;
            }

            if !self.drain_commands() {
                return;
            }

            if self.shared.state() != RoomState::Running {
                continue;
            }

            if let Some(event) = self.sim.advance(&mut self.rng) {
                let _ = self.events.send(ServerMsg::Score {
                    scores: self.sim.tallies.clone(),
                });

                if let Some(outcome) = event.outcome {
                    self.finish(outcome).await;
                    return;
                }
            }

            // Fire-and-forget: a closed or lagging subscriber never stalls a tick
            let _ = self.events.send(ServerMsg::Update {
                game_state: self.sim.snapshot(),
            });
        }
    }

    /// Process queued commands. Returns false when the room ended.
    fn drain_commands(&mut self) -> bool {
        while let Ok(cmd) = self.commands.try_recv() {
            match cmd {
                RoomCommand::Join {
                    slot,
                    connection_id,
                    user_id,
                    display_name,
                    reply,
                } => self.handle_join(slot, connection_id, user_id, display_name, reply),
                RoomCommand::Move { slot, y } => {
                    if self.shared.state() == RoomState::Running && slot >= 1 {
                        self.sim.apply_move(slot - 1, y);
                        self.shared.touch();
                    }
                }
                RoomCommand::Leave { slot } => {
                    self.force_end(slot);
                    return false;
                }
                RoomCommand::Expire => {
                    if self.shared.state() == RoomState::Waiting {
                        self.shared.set_state(RoomState::Ended);
                        info!(room_id = %self.id, "Room expired while waiting for players");
                        return false;
                    }
                }
            }
        }
        true
    }

    fn handle_join(
        &mut self,
        slot: usize,
        connection_id: Uuid,
        user_id: Uuid,
        display_name: String,
        reply: oneshot::Sender<GameSnapshot>,
    ) {
        let Some(seat) = self.seats.get_mut(slot.wrapping_sub(1)) else {
            warn!(room_id = %self.id, slot, "Join for unknown slot");
            return;
        };

        *seat = Some(Seat {
            connection_id,
            user_id,
            display_name,
        });
        self.shared.touch();

        // The room's own state seeds the connection's init, so anything
        // that mutated the sim before the start is reflected there
        let _ = reply.send(self.sim.snapshot());

        let seated = self.seats.iter().filter(|s| s.is_some()).count();
        info!(
            room_id = %self.id,
            connection_id = %connection_id,
            user_id = %user_id,
            slot,
            seated,
            "Player joined room"
        );

        if seated == self.capacity && self.shared.state() == RoomState::Waiting {
            self.shared.set_state(RoomState::Running);
            self.sim.running = true;
            let _ = self.events.send(ServerMsg::GameStart {
                message: "The match has started!".to_string(),
            });
            info!(room_id = %self.id, "Match started");
        }
    }

    /// Disconnect-triggered termination: notify survivors and stop at once.
    /// No grace delay, no stats.
    fn force_end(&mut self, slot: usize) {
        if self.shared.state() == RoomState::Ended {
            return;
        }
        self.shared.set_state(RoomState::Ended);
        self.sim.running = false;

        let _ = self.events.send(ServerMsg::GameEnd {
            message: "A player disconnected. The match has ended.".to_string(),
            force_disconnect: true,
        });

        info!(room_id = %self.id, slot, "Room force-ended after disconnect");
    }

    /// Normal termination: broadcast the result, persist it, then hold the
    /// room through the grace delay so clients can show the final score.
    async fn finish(&mut self, outcome: MatchOutcome) {
        self.shared.set_state(RoomState::Ended);

        let message = match outcome.winner {
            Some(winner) => format!("Player {} wins!", winner + 1),
            None => format!("Player {} has lost!", outcome.loser + 1),
        };

        let _ = self.events.send(ServerMsg::End {
            message,
            final_score: outcome.tallies.clone(),
            game_over: true,
        });

        info!(
            room_id = %self.id,
            final_score = ?outcome.tallies,
            winner = ?outcome.winner,
            "Match finished"
        );

        self.report_result(&outcome).await;

        tokio::time::sleep(END_GRACE).await;
    }

    /// Persist per-player aggregates and trigger a ranking recompute.
    /// Best-effort: storage failures are logged and never reach gameplay.
    /// Only duel results carry a winner; crazy matches record nothing, as
    /// disconnect-triggered ends record nothing.
    async fn report_result(&self, outcome: &MatchOutcome) {
        let Some(winner) = outcome.winner else {
            return;
        };

        for (i, seat) in self.seats.iter().enumerate() {
            let Some(player) = seat else {
                warn!(room_id = %self.id, slot = i + 1, "Missing player, skipping stats");
                continue;
            };

            let goals_for = outcome.tallies[i];
            let goals_against = outcome.tallies[1 - i];
            if let Err(e) = self
                .stats
                .record_result(player.user_id, goals_for, goals_against, i == winner)
                .await
            {
                error!(
                    room_id = %self.id,
                    user_id = %player.user_id,
                    player = %player.display_name,
                    error = %e,
                    "Failed to persist match result"
                );
            }
        }

        if let Err(e) = self.stats.recompute_rankings().await {
            error!(room_id = %self.id, error = %e, "Failed to recompute rankings");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::sim::Ball;
    use crate::store::supabase::SupabaseError;
    use parking_lot::Mutex;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;
    use tokio::time::{timeout, Instant};

    /// In-memory reporter: rooms report into it, tests read it back
    #[derive(Default)]
    struct RecordingReporter {
        results: Mutex<Vec<(Uuid, u32, u32, bool)>>,
        rankings: AtomicUsize,
    }

    impl ResultReporter for Arc<RecordingReporter> {
        async fn record_result(
            &self,
            user_id: Uuid,
            goals_for: u32,
            goals_against: u32,
            won: bool,
        ) -> Result<(), SupabaseError> {
            self.results.lock().push((user_id, goals_for, goals_against, won));
            Ok(())
        }

        async fn recompute_rankings(&self) -> Result<(), SupabaseError> {
            self.rankings.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn reporter() -> Arc<RecordingReporter> {
        Arc::new(RecordingReporter::default())
    }

    async fn next_msg(rx: &mut broadcast::Receiver<ServerMsg>) -> ServerMsg {
        timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("timed out waiting for room event")
            .expect("event channel closed")
    }

    async fn next_end(rx: &mut broadcast::Receiver<ServerMsg>) -> ServerMsg {
        loop {
            match next_msg(rx).await {
                msg @ (ServerMsg::End { .. } | ServerMsg::GameEnd { .. }) => return msg,
                ServerMsg::Update { .. } | ServerMsg::Score { .. } | ServerMsg::GameStart { .. } => {
                    continue
                }
                other => panic!("unexpected room event {other:?}"),
            }
        }
    }

    async fn join(handle: &RoomHandle, slot: usize) -> GameSnapshot {
        join_as(handle, slot, Uuid::new_v4()).await
    }

    /// Seat a player and wait for the room's snapshot acknowledgment
    async fn join_as(handle: &RoomHandle, slot: usize, user_id: Uuid) -> GameSnapshot {
        let (reply, ack) = oneshot::channel();
        handle
            .commands
            .send(RoomCommand::Join {
                slot,
                connection_id: Uuid::new_v4(),
                user_id,
                display_name: format!("player-{slot}"),
                reply,
            })
            .await
            .expect("room task gone");
        ack.await.expect("no join acknowledgment")
    }

    #[tokio::test(start_paused = true)]
    async fn full_room_starts_the_match() {
        let (room, handle) = GameRoom::new(GameMode::Duel, reporter());
        let mut rx = handle.events.subscribe();
        tokio::spawn(room.run());

        join(&handle, 1).await;
        assert_eq!(handle.state(), RoomState::Waiting);

        join(&handle, 2).await;
        match next_msg(&mut rx).await {
            ServerMsg::GameStart { .. } => {}
            other => panic!("expected gameStart, got {other:?}"),
        }
        assert_eq!(handle.state(), RoomState::Running);
    }

    #[tokio::test(start_paused = true)]
    async fn join_acknowledgment_carries_the_room_state() {
        let (mut room, handle) = GameRoom::new(GameMode::Duel, reporter());
        room.sim.tallies = vec![2, 1];
        tokio::spawn(room.run());

        // A mid-flight room hands out its own tallies, not a fresh court
        let snapshot = join(&handle, 1).await;
        assert_eq!(snapshot.scores, vec![2, 1]);
    }

    #[tokio::test(start_paused = true)]
    async fn score_limit_emits_end_and_holds_the_grace_delay() {
        let (mut room, handle) = GameRoom::new(GameMode::Duel, reporter());
        // Rig the sim one goal short of the limit, ball about to cross
        room.sim.tallies = vec![3, 2];
        room.sim.paddles[1] = 400.0;
        room.sim.ball = Ball {
            x: 795.0,
            y: 100.0,
            vx: 10.0,
            vy: 0.0,
        };

        let mut rx = handle.events.subscribe();
        let task = tokio::spawn(room.run());

        join(&handle, 1).await;
        join(&handle, 2).await;

        match next_msg(&mut rx).await {
            ServerMsg::GameStart { .. } => {}
            other => panic!("expected gameStart, got {other:?}"),
        }

        match next_msg(&mut rx).await {
            ServerMsg::Score { scores } => assert_eq!(scores, vec![4, 2]),
            other => panic!("expected score, got {other:?}"),
        }

        let end_seen = Instant::now();
        match next_msg(&mut rx).await {
            ServerMsg::End {
                final_score,
                game_over,
                message,
            } => {
                assert_eq!(final_score, vec![4, 2]);
                assert!(game_over);
                assert_eq!(message, "Player 1 wins!");
            }
            other => panic!("expected end, got {other:?}"),
        }

        timeout(Duration::from_secs(10), task)
            .await
            .expect("room task should finish after the grace delay")
            .unwrap();
        assert!(end_seen.elapsed() >= END_GRACE);
        assert_eq!(handle.state(), RoomState::Ended);
    }

    #[tokio::test(start_paused = true)]
    async fn disconnect_force_ends_without_delay() {
        let reporter = reporter();
        let (room, handle) = GameRoom::new(GameMode::Duel, reporter.clone());
        let mut rx = handle.events.subscribe();
        let task = tokio::spawn(room.run());

        join(&handle, 1).await;
        join(&handle, 2).await;
        match next_msg(&mut rx).await {
            ServerMsg::GameStart { .. } => {}
            other => panic!("expected gameStart, got {other:?}"),
        }

        let leave_seen = Instant::now();
        handle
            .commands
            .send(RoomCommand::Leave { slot: 2 })
            .await
            .unwrap();

        loop {
            match next_msg(&mut rx).await {
                ServerMsg::GameEnd {
                    force_disconnect, ..
                } => {
                    assert!(force_disconnect);
                    break;
                }
                // Updates already in flight are fine
                ServerMsg::Update { .. } => continue,
                other => panic!("expected gameEnd, got {other:?}"),
            }
        }

        timeout(Duration::from_secs(2), task)
            .await
            .expect("forced end must not wait out the grace delay")
            .unwrap();
        assert!(leave_seen.elapsed() < END_GRACE);
        assert_eq!(handle.state(), RoomState::Ended);

        // Abandoned matches leave no trace in the stats
        assert!(reporter.results.lock().is_empty());
        assert_eq!(reporter.rankings.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn duel_end_reports_both_players_and_reranks_once() {
        let reporter = reporter();
        let (mut room, handle) = GameRoom::new(GameMode::Duel, reporter.clone());
        room.sim.tallies = vec![3, 2];
        room.sim.paddles[1] = 400.0;
        room.sim.ball = Ball {
            x: 795.0,
            y: 100.0,
            vx: 10.0,
            vy: 0.0,
        };

        let mut rx = handle.events.subscribe();
        let task = tokio::spawn(room.run());

        let winner = Uuid::new_v4();
        let loser = Uuid::new_v4();
        join_as(&handle, 1, winner).await;
        join_as(&handle, 2, loser).await;

        match next_end(&mut rx).await {
            ServerMsg::End { final_score, .. } => assert_eq!(final_score, vec![4, 2]),
            other => panic!("expected end, got {other:?}"),
        }
        timeout(Duration::from_secs(10), task)
            .await
            .expect("room task should finish")
            .unwrap();

        let results = reporter.results.lock().clone();
        assert_eq!(
            results,
            vec![(winner, 4, 2, true), (loser, 2, 4, false)],
            "both sides must be recorded with their own goal tallies"
        );
        assert_eq!(reporter.rankings.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn crazy_end_records_nothing() {
        let reporter = reporter();
        let (mut room, handle) = GameRoom::new(GameMode::Crazy, reporter.clone());
        room.sim.tallies = vec![1, 4, 4, 4];
        room.sim.paddles[0] = 600.0;
        room.sim.ball = Ball {
            x: 5.0,
            y: 400.0,
            vx: -10.0,
            vy: 0.0,
        };

        let mut rx = handle.events.subscribe();
        let task = tokio::spawn(room.run());
        for slot in 1..=4 {
            join(&handle, slot).await;
        }

        match next_end(&mut rx).await {
            ServerMsg::End { message, .. } => assert_eq!(message, "Player 1 has lost!"),
            other => panic!("expected end, got {other:?}"),
        }
        timeout(Duration::from_secs(10), task)
            .await
            .expect("room task should finish")
            .unwrap();

        assert!(reporter.results.lock().is_empty());
        assert_eq!(reporter.rankings.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn wild_move_values_never_crash_the_room() {
        let (room, handle) = GameRoom::new(GameMode::Duel, reporter());
        let mut rx = handle.events.subscribe();
        tokio::spawn(room.run());

        join(&handle, 1).await;
        join(&handle, 2).await;
        match next_msg(&mut rx).await {
            ServerMsg::GameStart { .. } => {}
            other => panic!("expected gameStart, got {other:?}"),
        }

        for y in [f32::NAN, f32::NEG_INFINITY, -9999.0, 1.0e12] {
            handle
                .commands
                .send(RoomCommand::Move { slot: 1, y })
                .await
                .unwrap();
        }
        handle
            .commands
            .send(RoomCommand::Move { slot: 99, y: 10.0 })
            .await
            .unwrap();

        // The room keeps ticking and every broadcast paddle stays in bounds
        for _ in 0..10 {
            if let ServerMsg::Update { game_state } = next_msg(&mut rx).await {
                let paddle = &game_state.players[0];
                assert!((0.0..=420.0).contains(&paddle.y), "paddle at {}", paddle.y);
            }
        }
    }
}

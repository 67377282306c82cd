//! Pure simulation kernel: one Pong tick over a room's state.
//!
//! No I/O and no wall clock in here. The post-goal serve delay is counted in
//! ticks, and the only randomness (crazy-mode serves) comes through the caller's
//! RNG, so a fixed seed and scripted inputs replay bit-for-bit.

use rand::Rng;

use crate::util::time::SERVE_DELAY_TICKS;
use crate::ws::protocol::{BallSnapshot, GameSnapshot, PaddleSnapshot};

use super::court::{GameMode, Orientation, WinRule};

#[derive(Debug, Clone, PartialEq)]
pub struct Ball {
    pub x: f32,
    pub y: f32,
    pub vx: f32,
    pub vy: f32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum ServeKind {
    /// Duel: serve horizontally toward the player who just conceded
    Toward(usize),
    /// Crazy: uniformly random direction
    Random,
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct PendingServe {
    ticks_left: u32,
    kind: ServeKind,
}

/// Terminal result of a match, derived when a threshold is crossed
#[derive(Debug, Clone, PartialEq)]
pub struct MatchOutcome {
    /// Winning slot index; `None` in crazy mode, which only names a loser
    pub winner: Option<usize>,
    pub loser: usize,
    pub tallies: Vec<u32>,
}

/// A qualifying edge crossing
#[derive(Debug, Clone, PartialEq)]
pub struct GoalEvent {
    pub conceded_by: usize,
    /// Present when this goal ended the match
    pub outcome: Option<MatchOutcome>,
}

/// One room's authoritative simulation state
#[derive(Debug, Clone, PartialEq)]
pub struct SimState {
    pub mode: GameMode,
    /// Gates the tick loop independently of room broadcast/teardown timing
    pub running: bool,
    /// Movable coordinate per slot (y for vertical paddles, x for horizontal)
    pub paddles: Vec<f32>,
    pub ball: Ball,
    /// Goals per slot in duel mode; lives remaining per slot in crazy mode
    pub tallies: Vec<u32>,
    serve: Option<PendingServe>,
}

impl SimState {
    pub fn new(mode: GameMode) -> Self {
        let layout = mode.layout();
        let (bx, by) = layout.ball_start();
        let (vx, vy) = layout.ball_start_vel;
        let tallies = match layout.win {
            WinRule::ScoreLimit(_) => vec![0; layout.paddles.len()],
            WinRule::Lives(lives) => vec![lives; layout.paddles.len()],
        };

        Self {
            mode,
            running: false,
            paddles: layout.paddles.iter().map(|p| p.start_pos).collect(),
            ball: Ball {
                x: bx,
                y: by,
                vx,
                vy,
            },
            tallies,
            serve: None,
        }
    }

    /// Set a paddle's target coordinate, clamped to the court. Non-finite
    /// targets are dropped.
    pub fn apply_move(&mut self, slot: usize, target: f32) {
        if !target.is_finite() {
            return;
        }
        let layout = self.mode.layout();
        let Some(spec) = layout.paddles.get(slot) else {
            return;
        };
        self.paddles[slot] = target.clamp(0.0, layout.paddle_span(spec));
    }

    /// Advance the simulation by one tick
    pub fn advance(&mut self, rng: &mut impl Rng) -> Option<GoalEvent> {
        if !self.running {
            return None;
        }

        // Ball parked at center after a goal, waiting for the serve
        if let Some(serve) = &mut self.serve {
            serve.ticks_left -= 1;
            if serve.ticks_left == 0 {
                let kind = serve.kind;
                self.serve = None;
                self.launch_serve(kind, rng);
            }
            return None;
        }

        let layout = self.mode.layout();

        self.ball.x += self.ball.vx;
        self.ball.y += self.ball.vy;

        // Elastic top/bottom walls (duel court only)
        if layout.walls {
            if self.ball.y <= 0.0 {
                self.ball.vy = self.ball.vy.abs();
            } else if self.ball.y >= layout.height {
                self.ball.vy = -self.ball.vy.abs();
            }
        }

        self.resolve_paddle_collision();

        let conceded = self.crossed_edge(layout.walls, layout.width, layout.height);
        conceded.map(|slot| self.score_goal(slot))
    }

    /// Wire-shaped view of the current state
    pub fn snapshot(&self) -> GameSnapshot {
        let layout = self.mode.layout();
        let players = layout
            .paddles
            .iter()
            .zip(self.paddles.iter())
            .enumerate()
            .map(|(i, (spec, &pos))| {
                let (x, y) = match spec.orientation {
                    Orientation::Vertical => (spec.lane, pos),
                    Orientation::Horizontal => (pos, spec.lane),
                };
                PaddleSnapshot { slot: i + 1, x, y }
            })
            .collect();

        GameSnapshot {
            running: self.running,
            players,
            ball: BallSnapshot {
                x: self.ball.x,
                y: self.ball.y,
                speed_x: self.ball.vx,
                speed_y: self.ball.vy,
            },
            scores: self.tallies.clone(),
        }
    }

    fn resolve_paddle_collision(&mut self) {
        let layout = self.mode.layout();

        for (i, spec) in layout.paddles.iter().enumerate() {
            let pos = self.paddles[i];
            let (block_c, lateral_c, block_v) = match spec.orientation {
                Orientation::Vertical => (self.ball.x, self.ball.y, self.ball.vx),
                Orientation::Horizontal => (self.ball.y, self.ball.x, self.ball.vy),
            };

            // Only a ball moving toward the guarded edge can hit; this is what
            // keeps the velocity sign from flipping twice inside the band.
            let approaching = if spec.guards_min {
                block_v < 0.0
            } else {
                block_v > 0.0
            };
            if !approaching {
                continue;
            }

            // Band is wider than the max per-tick displacement, so the ball
            // cannot step over the paddle between two ticks.
            let band = spec.thickness + layout.ball_radius;
            if (block_c - spec.face()).abs() > band {
                continue;
            }
            if lateral_c < pos || lateral_c > pos + spec.length {
                continue;
            }

            let bounced = if spec.guards_min {
                block_v.abs()
            } else {
                -block_v.abs()
            };
            // Contact offset from the paddle center steers the return angle
            let offset = (pos + spec.length / 2.0) - lateral_c;
            let deflection = -(offset / (spec.length / 2.0)) * layout.max_deflection;

            match spec.orientation {
                Orientation::Vertical => {
                    self.ball.vx = bounced;
                    self.ball.vy = deflection;
                }
                Orientation::Horizontal => {
                    self.ball.vy = bounced;
                    self.ball.vx = deflection;
                }
            }
            return;
        }
    }

    fn crossed_edge(&self, walls: bool, width: f32, height: f32) -> Option<usize> {
        if self.ball.x <= 0.0 {
            Some(0)
        } else if self.ball.x >= width {
            Some(1)
        } else if !walls && self.ball.y <= 0.0 {
            Some(2)
        } else if !walls && self.ball.y >= height {
            Some(3)
        } else {
            None
        }
    }

    fn score_goal(&mut self, conceded_by: usize) -> GoalEvent {
        let layout = self.mode.layout();

        let outcome = match layout.win {
            WinRule::ScoreLimit(limit) => {
                let scorer = 1 - conceded_by;
                self.tallies[scorer] += 1;
                (self.tallies[scorer] >= limit).then(|| MatchOutcome {
                    winner: Some(scorer),
                    loser: conceded_by,
                    tallies: self.tallies.clone(),
                })
            }
            WinRule::Lives(_) => {
                self.tallies[conceded_by] -= 1;
                (self.tallies[conceded_by] == 0).then(|| MatchOutcome {
                    winner: None,
                    loser: conceded_by,
                    tallies: self.tallies.clone(),
                })
            }
        };

        let (cx, cy) = layout.ball_start();
        self.ball = Ball {
            x: cx,
            y: cy,
            vx: 0.0,
            vy: 0.0,
        };

        if outcome.is_some() {
            self.running = false;
            self.serve = None;
        } else {
            let kind = match layout.win {
                WinRule::ScoreLimit(_) => ServeKind::Toward(conceded_by),
                WinRule::Lives(_) => ServeKind::Random,
            };
            self.serve = Some(PendingServe {
                ticks_left: SERVE_DELAY_TICKS,
                kind,
            });
        }

        GoalEvent {
            conceded_by,
            outcome,
        }
    }

    fn launch_serve(&mut self, kind: ServeKind, rng: &mut impl Rng) {
        let layout = self.mode.layout();
        match kind {
            ServeKind::Toward(slot) => {
                let spec = &layout.paddles[slot];
                let speed = if spec.guards_min {
                    -layout.serve_speed
                } else {
                    layout.serve_speed
                };
                match spec.orientation {
                    Orientation::Vertical => {
                        self.ball.vx = speed;
                        self.ball.vy = 0.0;
                    }
                    Orientation::Horizontal => {
                        self.ball.vy = speed;
                        self.ball.vx = 0.0;
                    }
                }
            }
            ServeKind::Random => {
                let angle = rng.gen_range(0.0..std::f32::consts::TAU);
                self.ball.vx = angle.cos() * layout.serve_speed;
                self.ball.vy = angle.sin() * layout.serve_speed;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    fn rng() -> ChaCha8Rng {
        ChaCha8Rng::seed_from_u64(7)
    }

    fn running_duel() -> SimState {
        let mut sim = SimState::new(GameMode::Duel);
        sim.running = true;
        sim
    }

    #[test]
    fn paddle_position_is_clamped_to_the_court() {
        let mut sim = running_duel();

        sim.apply_move(0, 1.0e9);
        assert_eq!(sim.paddles[0], 420.0); // 500 - 80

        sim.apply_move(0, -250.0);
        assert_eq!(sim.paddles[0], 0.0);

        sim.apply_move(0, f32::NAN);
        assert_eq!(sim.paddles[0], 0.0);

        sim.apply_move(0, f32::INFINITY);
        assert_eq!(sim.paddles[0], 0.0);

        // Out-of-range slots are ignored without panicking
        sim.apply_move(9, 100.0);
    }

    #[test]
    fn ball_bounces_off_the_walls() {
        let mut sim = running_duel();
        sim.ball = Ball {
            x: 400.0,
            y: 3.0,
            vx: 2.0,
            vy: -5.0,
        };

        sim.advance(&mut rng());
        assert!(sim.ball.vy > 0.0, "wall bounce must send the ball back down");
    }

    #[test]
    fn collision_reverses_the_ball_away_from_the_paddle() {
        let mut sim = running_duel();
        sim.paddles[0] = 200.0;
        sim.ball = Ball {
            x: 52.0,
            y: 240.0,
            vx: -10.0,
            vy: 0.0,
        };

        sim.advance(&mut rng());
        assert!(sim.ball.vx > 0.0, "post-collision velocity must point away");
        // Dead-center contact returns flat
        assert_eq!(sim.ball.vy, 0.0);
    }

    #[test]
    fn off_center_contact_steers_the_return() {
        let mut sim = running_duel();
        sim.paddles[0] = 200.0;
        // Contact near the paddle top (center is at 240)
        sim.ball = Ball {
            x: 52.0,
            y: 205.0,
            vx: -10.0,
            vy: 0.0,
        };

        sim.advance(&mut rng());
        assert!(sim.ball.vx > 0.0);
        // offset 35 of half-length 40, scaled by 6
        assert!((sim.ball.vy + 5.25).abs() < 1.0e-3);
    }

    #[test]
    fn ball_never_tunnels_through_a_guarded_paddle() {
        for tenth in 0..20 {
            let mut sim = running_duel();
            sim.paddles[0] = 200.0;
            sim.ball = Ball {
                x: 120.0 + tenth as f32 / 2.0,
                y: 240.0,
                vx: -10.0,
                vy: 0.0,
            };

            let mut reversed = false;
            for _ in 0..30 {
                sim.advance(&mut rng());
                if sim.ball.vx > 0.0 {
                    reversed = true;
                    break;
                }
            }
            assert!(reversed, "ball starting at x={} tunneled", sim.ball.x);
        }
    }

    #[test]
    fn goal_increments_exactly_one_score() {
        let mut sim = running_duel();
        // Keep the left paddle far from the ball's path
        sim.paddles[0] = 0.0;
        sim.ball = Ball {
            x: 5.0,
            y: 400.0,
            vx: -10.0,
            vy: 0.0,
        };

        let event = sim.advance(&mut rng()).expect("goal expected");
        assert_eq!(event.conceded_by, 0);
        assert!(event.outcome.is_none());
        assert_eq!(sim.tallies, vec![0, 1]);

        // Ball reset to center, parked
        assert_eq!((sim.ball.x, sim.ball.y), (400.0, 250.0));
        assert_eq!((sim.ball.vx, sim.ball.vy), (0.0, 0.0));
    }

    #[test]
    fn serve_waits_two_seconds_then_targets_the_conceder() {
        let mut sim = running_duel();
        sim.paddles[0] = 0.0;
        sim.ball = Ball {
            x: 5.0,
            y: 400.0,
            vx: -10.0,
            vy: 0.0,
        };
        sim.advance(&mut rng()).expect("goal expected");

        let mut r = rng();
        for _ in 0..SERVE_DELAY_TICKS - 1 {
            assert!(sim.advance(&mut r).is_none());
            assert_eq!((sim.ball.vx, sim.ball.vy), (0.0, 0.0));
        }
        sim.advance(&mut r);
        // Slot 0 conceded, so the serve heads left
        assert_eq!((sim.ball.vx, sim.ball.vy), (-10.0, 0.0));
    }

    #[test]
    fn score_limit_ends_the_match() {
        let mut sim = running_duel();
        sim.tallies = vec![3, 2];
        sim.paddles[1] = 400.0; // out of the ball's path
        sim.ball = Ball {
            x: 795.0,
            y: 100.0,
            vx: 10.0,
            vy: 0.0,
        };

        let event = sim.advance(&mut rng()).expect("goal expected");
        let outcome = event.outcome.expect("match should be over");
        assert_eq!(outcome.winner, Some(0));
        assert_eq!(outcome.loser, 1);
        assert_eq!(outcome.tallies, vec![4, 2]);
        assert!(!sim.running);
    }

    #[test]
    fn crazy_goal_costs_one_life_and_zero_ends_it() {
        let mut sim = SimState::new(GameMode::Crazy);
        sim.running = true;
        sim.tallies = vec![1, 4, 4, 4];
        sim.paddles[0] = 600.0; // left paddle away from the crossing point
        sim.ball = Ball {
            x: 5.0,
            y: 400.0,
            vx: -10.0,
            vy: 0.0,
        };

        let event = sim.advance(&mut rng()).expect("goal expected");
        assert_eq!(event.conceded_by, 0);
        let outcome = event.outcome.expect("left side out of lives");
        assert_eq!(outcome.winner, None);
        assert_eq!(outcome.loser, 0);
        assert_eq!(sim.tallies, vec![0, 4, 4, 4]);
        assert!(!sim.running);
    }

    #[test]
    fn crazy_horizontal_paddle_blocks_on_the_vertical_axis() {
        let mut sim = SimState::new(GameMode::Crazy);
        sim.running = true;
        // Top paddle spans x in [300, 430]
        sim.paddles[2] = 300.0;
        sim.ball = Ball {
            x: 365.0,
            y: 30.0,
            vx: 0.0,
            vy: -10.0,
        };

        sim.advance(&mut rng());
        assert!(sim.ball.vy > 0.0, "top paddle must send the ball back down");
        assert_eq!(sim.tallies, vec![4, 4, 4, 4]);
    }

    #[test]
    fn kernel_is_deterministic_for_a_fixed_seed() {
        let script: Vec<(usize, f32)> = (0..400)
            .map(|i| (i % 4, ((i * 37) % 670) as f32))
            .collect();

        let run = || {
            let mut sim = SimState::new(GameMode::Crazy);
            sim.running = true;
            let mut r = ChaCha8Rng::seed_from_u64(42);
            for (tick, (slot, target)) in script.iter().enumerate() {
                if tick % 3 == 0 {
                    sim.apply_move(*slot, *target);
                }
                sim.advance(&mut r);
            }
            sim.snapshot()
        };

        assert_eq!(run(), run());
    }
}

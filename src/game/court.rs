//! Court geometry descriptors. Duel and crazy mode are two layouts over the
//! same simulation kernel, not separate code paths.

use serde::{Deserialize, Serialize};

/// Match variants supported by the server
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GameMode {
    /// Classic 2-paddle Pong, first to 4 goals
    Duel,
    /// 4-paddle all-sides variant, 4 lives per side
    Crazy,
}

impl Default for GameMode {
    fn default() -> Self {
        Self::Duel
    }
}

impl GameMode {
    pub fn capacity(self) -> usize {
        self.layout().paddles.len()
    }

    pub fn layout(self) -> &'static CourtLayout {
        match self {
            GameMode::Duel => &DUEL_LAYOUT,
            GameMode::Crazy => &CRAZY_LAYOUT,
        }
    }
}

/// Which axis a paddle slides along
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Orientation {
    /// Slides along y, blocks the ball on the x axis
    Vertical,
    /// Slides along x, blocks the ball on the y axis
    Horizontal,
}

/// One paddle's fixed geometry
#[derive(Debug, Clone, Copy)]
pub struct PaddleSpec {
    pub orientation: Orientation,
    /// Near edge of the paddle body along its blocking axis
    pub lane: f32,
    pub thickness: f32,
    pub length: f32,
    /// Initial movable coordinate
    pub start_pos: f32,
    /// True if this paddle defends the low edge of its blocking axis
    pub guards_min: bool,
}

impl PaddleSpec {
    /// Coordinate of the court-facing surface
    pub fn face(&self) -> f32 {
        if self.guards_min {
            self.lane + self.thickness
        } else {
            self.lane
        }
    }
}

/// Terminal condition for a layout
#[derive(Debug, Clone, Copy)]
pub enum WinRule {
    /// First slot to reach this many goals wins
    ScoreLimit(u32),
    /// Each slot starts with this many lives; the first at zero loses
    Lives(u32),
}

/// Static geometry and rules for one game mode
#[derive(Debug)]
pub struct CourtLayout {
    pub width: f32,
    pub height: f32,
    pub ball_radius: f32,
    pub ball_start_vel: (f32, f32),
    /// Post-goal serve speed magnitude
    pub serve_speed: f32,
    /// Maximum lateral speed imparted at the paddle's edge
    pub max_deflection: f32,
    /// Top/bottom walls reflect the ball (duel); without walls every edge scores
    pub walls: bool,
    pub paddles: &'static [PaddleSpec],
    pub win: WinRule,
}

impl CourtLayout {
    pub fn ball_start(&self) -> (f32, f32) {
        (self.width / 2.0, self.height / 2.0)
    }

    /// Movable range of a paddle: `[0, span - length]`
    pub fn paddle_span(&self, spec: &PaddleSpec) -> f32 {
        let axis = match spec.orientation {
            Orientation::Vertical => self.height,
            Orientation::Horizontal => self.width,
        };
        axis - spec.length
    }
}

pub static DUEL_LAYOUT: CourtLayout = CourtLayout {
    width: 800.0,
    height: 500.0,
    ball_radius: 0.0,
    ball_start_vel: (5.0, 5.0),
    serve_speed: 10.0,
    max_deflection: 6.0,
    walls: true,
    paddles: &[
        PaddleSpec {
            orientation: Orientation::Vertical,
            lane: 30.0,
            thickness: 10.0,
            length: 80.0,
            start_pos: 200.0,
            guards_min: true,
        },
        PaddleSpec {
            orientation: Orientation::Vertical,
            lane: 740.0,
            thickness: 10.0,
            length: 80.0,
            start_pos: 200.0,
            guards_min: false,
        },
    ],
    win: WinRule::ScoreLimit(4),
};

pub static CRAZY_LAYOUT: CourtLayout = CourtLayout {
    width: 800.0,
    height: 800.0,
    ball_radius: 8.0,
    ball_start_vel: (4.0, 4.0),
    serve_speed: 10.0,
    max_deflection: 6.0,
    walls: false,
    // Slot order is join order: left, right, top, bottom
    paddles: &[
        PaddleSpec {
            orientation: Orientation::Vertical,
            lane: 0.0,
            thickness: 12.0,
            length: 130.0,
            start_pos: 335.0,
            guards_min: true,
        },
        PaddleSpec {
            orientation: Orientation::Vertical,
            lane: 788.0,
            thickness: 12.0,
            length: 130.0,
            start_pos: 335.0,
            guards_min: false,
        },
        PaddleSpec {
            orientation: Orientation::Horizontal,
            lane: 0.0,
            thickness: 12.0,
            length: 130.0,
            start_pos: 335.0,
            guards_min: true,
        },
        PaddleSpec {
            orientation: Orientation::Horizontal,
            lane: 788.0,
            thickness: 12.0,
            length: 130.0,
            start_pos: 335.0,
            guards_min: false,
        },
    ],
    win: WinRule::Lives(4),
};

//! The timestamped snapshot of the tracked table and its wire representation.
//!
//! On the wire a sample is a flat JSON object (`ball_x`, `rod_red_0_shift`,
//! ...) where every field but `timestamp` may be missing or `null`. In memory
//! it is a fixed schema: one optional ball position and four rods per team.

use serde::{Deserialize, Serialize};

/// Number of rods each team controls.
pub const RODS_PER_TEAM: usize = 4;

/// One point-in-time snapshot of the tracked scene.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "WireSample", into = "WireSample")]
pub struct Sample {
    /// Network-assigned time in seconds.
    pub timestamp: f64,
    pub payload: TablePayload,
}

/// Positional data carried by a [`Sample`].
///
/// `None` means "not observed in this sample": a renderer keeps whatever it
/// drew last for that element.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TablePayload {
    pub ball: Option<BallPosition>,
    pub red: [RodState; RODS_PER_TEAM],
    pub blue: [RodState; RODS_PER_TEAM],
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BallPosition {
    pub x: f64,
    pub y: f64,
}

/// Translation along the rod axis and rotation around it.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct RodState {
    pub shift: Option<f64>,
    pub angle: Option<f64>,
}

impl Sample {
    pub fn new(timestamp: f64, payload: TablePayload) -> Self {
        Self { timestamp, payload }
    }

    /// A sample with nothing observed, useful for feeds that only carry timing.
    pub fn empty(timestamp: f64) -> Self {
        Self::new(timestamp, TablePayload::default())
    }
}

// --- Wire format ---

#[derive(Debug, Default, Serialize, Deserialize)]
struct WireSample {
    timestamp: f64,
    #[serde(default)]
    ball_x: Option<f64>,
    #[serde(default)]
    ball_y: Option<f64>,
    #[serde(default)]
    rod_red_0_shift: Option<f64>,
    #[serde(default)]
    rod_red_0_angle: Option<f64>,
    #[serde(default)]
    rod_red_1_shift: Option<f64>,
    #[serde(default)]
    rod_red_1_angle: Option<f64>,
    #[serde(default)]
    rod_red_2_shift: Option<f64>,
    #[serde(default)]
    rod_red_2_angle: Option<f64>,
    #[serde(default)]
    rod_red_3_shift: Option<f64>,
    #[serde(default)]
    rod_red_3_angle: Option<f64>,
    #[serde(default)]
    rod_blue_0_shift: Option<f64>,
    #[serde(default)]
    rod_blue_0_angle: Option<f64>,
    #[serde(default)]
    rod_blue_1_shift: Option<f64>,
    #[serde(default)]
    rod_blue_1_angle: Option<f64>,
    #[serde(default)]
    rod_blue_2_shift: Option<f64>,
    #[serde(default)]
    rod_blue_2_angle: Option<f64>,
    #[serde(default)]
    rod_blue_3_shift: Option<f64>,
    #[serde(default)]
    rod_blue_3_angle: Option<f64>,
}

fn rod(shift: Option<f64>, angle: Option<f64>) -> RodState {
    RodState { shift, angle }
}

impl From<WireSample> for Sample {
    fn from(w: WireSample) -> Self {
        let ball = match (w.ball_x, w.ball_y) {
            (Some(x), Some(y)) => Some(BallPosition { x, y }),
            _ => None,
        };
        Sample {
            timestamp: w.timestamp,
            payload: TablePayload {
                ball,
                red: [
                    rod(w.rod_red_0_shift, w.rod_red_0_angle),
                    rod(w.rod_red_1_shift, w.rod_red_1_angle),
                    rod(w.rod_red_2_shift, w.rod_red_2_angle),
                    rod(w.rod_red_3_shift, w.rod_red_3_angle),
                ],
                blue: [
                    rod(w.rod_blue_0_shift, w.rod_blue_0_angle),
                    rod(w.rod_blue_1_shift, w.rod_blue_1_angle),
                    rod(w.rod_blue_2_shift, w.rod_blue_2_angle),
                    rod(w.rod_blue_3_shift, w.rod_blue_3_angle),
                ],
            },
        }
    }
}

impl From<Sample> for WireSample {
    fn from(s: Sample) -> Self {
        let [r0, r1, r2, r3] = s.payload.red;
        let [b0, b1, b2, b3] = s.payload.blue;
        WireSample {
            timestamp: s.timestamp,
            ball_x: s.payload.ball.map(|b| b.x),
            ball_y: s.payload.ball.map(|b| b.y),
            rod_red_0_shift: r0.shift,
            rod_red_0_angle: r0.angle,
            rod_red_1_shift: r1.shift,
            rod_red_1_angle: r1.angle,
            rod_red_2_shift: r2.shift,
            rod_red_2_angle: r2.angle,
            rod_red_3_shift: r3.shift,
            rod_red_3_angle: r3.angle,
            rod_blue_0_shift: b0.shift,
            rod_blue_0_angle: b0.angle,
            rod_blue_1_shift: b1.shift,
            rod_blue_1_angle: b1.angle,
            rod_blue_2_shift: b2.shift,
            rod_blue_2_angle: b2.angle,
            rod_blue_3_shift: b3.shift,
            rod_blue_3_angle: b3.angle,
        }
    }
}

//! The display side of a session.
//!
//! A [`Renderer`] is told once per render tick either which sample to show or
//! that there is nothing new. Any `FnMut(Option<&Sample>)` closure is one.

use crate::sample::{BallPosition, RodState, Sample, TablePayload};
use tracing::{debug, trace};

/// Receives the output of every render tick.
pub trait Renderer: Send {
    /// `None` means "no update this tick"; keep showing the previous pose.
    fn present(&mut self, frame: Option<&Sample>);
}

impl<F> Renderer for F
where
    F: FnMut(Option<&Sample>) + Send,
{
    fn present(&mut self, frame: Option<&Sample>) {
        self(frame)
    }
}

/// A renderer that keeps the current table pose and logs it.
///
/// Unknown fields in a sample leave the corresponding part of the pose as it
/// was, exactly as a drawing backend would.
#[derive(Debug, Default)]
pub struct TracingRenderer {
    pose: TablePayload,
    timestamp: Option<f64>,
    frames: u64,
    idle_ticks: u64,
}

impl TracingRenderer {
    pub fn new() -> Self {
        Self::default()
    }

    /// The pose as it would currently be drawn.
    pub fn pose(&self) -> &TablePayload {
        &self.pose
    }

    /// Timestamp of the last presented sample.
    pub fn timestamp(&self) -> Option<f64> {
        self.timestamp
    }

    pub fn frames(&self) -> u64 {
        self.frames
    }

    pub fn idle_ticks(&self) -> u64 {
        self.idle_ticks
    }

    fn merge(&mut self, payload: &TablePayload) {
        if let Some(ball) = payload.ball {
            self.pose.ball = Some(ball);
        }
        let teams = [
            (&mut self.pose.red, &payload.red),
            (&mut self.pose.blue, &payload.blue),
        ];
        for (pose, update) in teams {
            for (rod, seen) in pose.iter_mut().zip(update) {
                merge_rod(rod, seen);
            }
        }
    }
}

fn merge_rod(pose: &mut RodState, update: &RodState) {
    if update.shift.is_some() {
        pose.shift = update.shift;
    }
    if update.angle.is_some() {
        pose.angle = update.angle;
    }
}

impl Renderer for TracingRenderer {
    fn present(&mut self, frame: Option<&Sample>) {
        let Some(sample) = frame else {
            self.idle_ticks += 1;
            trace!("No update this tick.");
            return;
        };
        self.merge(&sample.payload);
        self.timestamp = Some(sample.timestamp);
        self.frames += 1;

        let ball = self.pose.ball.map(|BallPosition { x, y }| (x, y));
        debug!(timestamp = sample.timestamp, ?ball, frames = self.frames, "Frame presented.");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn closures_are_renderers() {
        let mut seen = Vec::new();
        {
            let mut renderer = |frame: Option<&Sample>| seen.push(frame.map(|s| s.timestamp));
            renderer.present(Some(&Sample::empty(1.0)));
            renderer.present(None);
        }
        assert_eq!(seen, vec![Some(1.0), None]);
    }

    #[test]
    fn unknown_fields_keep_the_previous_pose() {
        let mut renderer = TracingRenderer::new();
        let mut payload = TablePayload::default();
        payload.ball = Some(BallPosition { x: 0.1, y: 0.2 });
        payload.red[2] = RodState {
            shift: Some(0.05),
            angle: Some(1.0),
        };
        renderer.present(Some(&Sample::new(1.0, payload)));

        let mut partial = TablePayload::default();
        partial.red[2].angle = Some(-0.5);
        renderer.present(Some(&Sample::new(1.1, partial)));
        renderer.present(None);

        let pose = renderer.pose();
        assert_eq!(pose.ball, Some(BallPosition { x: 0.1, y: 0.2 }));
        assert_eq!(pose.red[2].shift, Some(0.05));
        assert_eq!(pose.red[2].angle, Some(-0.5));
        assert_eq!(renderer.timestamp(), Some(1.1));
        assert_eq!(renderer.frames(), 2);
        assert_eq!(renderer.idle_ticks(), 1);
    }
}

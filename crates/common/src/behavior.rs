//! Obstacle-avoidance behavior.
//!
//! Drive straight until something shows up head-on, back off for a few
//! steps, then turn in place until the way ahead is clear again.

use crate::config::BehaviorConfig;
use crate::IR_SENSOR_COUNT;

/// Sensors looking straight ahead.
const HEAD_ON: std::ops::Range<usize> = 2..4;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SpeedCommand {
    pub left: f64,
    pub right: f64,
}

impl SpeedCommand {
    pub const STOP: SpeedCommand = SpeedCommand { left: 0.0, right: 0.0 };

    pub fn new(left: f64, right: f64) -> Self {
        Self { left, right }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    Obstacle,
    Backtracked,
    NoObstacle,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    GoStraight,
    AvoidCollision { timer: u32 },
    FindNewDirection { timer: u32 },
}

#[derive(Debug, Clone)]
pub struct Supervisor {
    config: BehaviorConfig,
    state: State,
}

impl Supervisor {
    pub fn new(config: BehaviorConfig) -> Self {
        Self { config, state: State::GoStraight }
    }

    pub fn state(&self) -> State {
        self.state
    }

    /// One behavior step from the current IR distances. Returns the speeds
    /// to command and the event that fired, if any.
    pub fn execute(&mut self, distances: &[f64; IR_SENSOR_COUNT]) -> (SpeedCommand, Option<Event>) {
        let ahead = distances[HEAD_ON]
            .iter()
            .copied()
            .fold(f64::INFINITY, f64::min);
        let c = &self.config;

        let (command, event) = match &mut self.state {
            State::GoStraight => {
                if ahead < c.go_straight_threshold {
                    (SpeedCommand::STOP, Some(Event::Obstacle))
                } else {
                    (SpeedCommand::new(c.go_straight_speed, c.go_straight_speed), None)
                }
            }
            State::AvoidCollision { timer } => {
                *timer += 1;
                if *timer < c.avoid_duration {
                    (SpeedCommand::new(-c.avoid_speed, -c.avoid_speed), None)
                } else {
                    (SpeedCommand::STOP, Some(Event::Backtracked))
                }
            }
            State::FindNewDirection { timer } => {
                *timer += 1;
                if *timer < c.find_pause {
                    let event = (ahead > c.find_threshold).then_some(Event::NoObstacle);
                    (SpeedCommand::STOP, event)
                } else if *timer > c.find_pause + c.find_move {
                    *timer = 0;
                    (SpeedCommand::STOP, None)
                } else {
                    (SpeedCommand::new(c.find_speed, -c.find_speed), None)
                }
            }
        };

        if let Some(event) = event {
            self.state = match event {
                Event::Obstacle => State::AvoidCollision { timer: 0 },
                Event::Backtracked => State::FindNewDirection { timer: 0 },
                Event::NoObstacle => State::GoStraight,
            };
        }
        (command, event)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CLEAR: [f64; 5] = [100.0; 5];
    const BLOCKED: [f64; 5] = [100.0, 100.0, 5.0, 30.0, 100.0];

    #[test]
    fn goes_straight_while_clear() {
        let mut supervisor = Supervisor::new(BehaviorConfig::default());
        for _ in 0..5 {
            assert_eq!(supervisor.execute(&CLEAR), (SpeedCommand::new(50.0, 50.0), None));
        }
        assert_eq!(supervisor.state(), State::GoStraight);
    }

    #[test]
    fn side_sensors_do_not_count_as_obstacles() {
        let mut supervisor = Supervisor::new(BehaviorConfig::default());
        let (_, event) = supervisor.execute(&[1.0, 1.0, 50.0, 50.0, 1.0]);
        assert_eq!(event, None);
    }

    #[test]
    fn full_avoidance_cycle() {
        let config = BehaviorConfig::default();
        let mut supervisor = Supervisor::new(config);

        assert_eq!(
            supervisor.execute(&BLOCKED),
            (SpeedCommand::STOP, Some(Event::Obstacle))
        );

        // backs up for avoid_duration - 1 steps, then stops
        for _ in 1..config.avoid_duration {
            assert_eq!(supervisor.execute(&BLOCKED), (SpeedCommand::new(-50.0, -50.0), None));
        }
        assert_eq!(
            supervisor.execute(&BLOCKED),
            (SpeedCommand::STOP, Some(Event::Backtracked))
        );
        assert_eq!(supervisor.state(), State::FindNewDirection { timer: 0 });

        // pause window with the way still blocked
        for _ in 1..config.find_pause {
            assert_eq!(supervisor.execute(&BLOCKED), (SpeedCommand::STOP, None));
        }
        // then spin in place
        for _ in 0..=config.find_move {
            assert_eq!(supervisor.execute(&BLOCKED), (SpeedCommand::new(50.0, -50.0), None));
        }
        // cycle restarts stopped
        assert_eq!(supervisor.execute(&BLOCKED), (SpeedCommand::STOP, None));
        assert_eq!(supervisor.state(), State::FindNewDirection { timer: 0 });

        // clear during the next pause: back to driving
        assert_eq!(
            supervisor.execute(&CLEAR),
            (SpeedCommand::STOP, Some(Event::NoObstacle))
        );
        assert_eq!(supervisor.state(), State::GoStraight);
        assert_eq!(supervisor.execute(&CLEAR), (SpeedCommand::new(50.0, 50.0), None));
    }
}

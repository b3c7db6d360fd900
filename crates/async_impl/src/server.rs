use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use log::{debug, info, warn};
use thiserror::Error;
use tokio::net::UdpSocket;
use tokio::time::{interval, MissedTickBehavior};

use common::config::ConfigError;
use common::protocol::{format_tuple, parse_datagram, Command, Query, HELLO};
use common::{Encoder, Motor, RangeSensor, Robot, SharedDiagnostics};

const BUFFER_SIZE: usize = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Continue,
    End,
}

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("socket error: {0}")]
    Io(#[from] io::Error),
    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// UDP front end for a [`Robot`].
///
/// The server task owns the robot outright. Control ticks and incoming
/// frames are handled by the same `select!` loop, so commands are applied
/// strictly between ticks and nothing needs a lock.
pub struct RobotServer<E, M, R> {
    robot: Robot<E, M, R>,
    socket: UdpSocket,
    period: Duration,
    diagnostics: Arc<SharedDiagnostics>,
}

impl<E: Encoder, M: Motor, R: RangeSensor> RobotServer<E, M, R> {
    pub async fn bind(
        addr: &str,
        robot: Robot<E, M, R>,
        period: Duration,
        diagnostics: Arc<SharedDiagnostics>,
    ) -> Result<Self, ServerError> {
        let socket = UdpSocket::bind(addr).await?;
        info!("robot listening on {}", socket.local_addr()?);
        Ok(Self { robot, socket, period, diagnostics })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, ServerError> {
        Ok(self.socket.local_addr()?)
    }

    /// Serve until an `END` frame arrives, then hand the robot back. The
    /// robot is stopped on every exit, including socket errors.
    pub async fn serve(mut self) -> Result<Robot<E, M, R>, ServerError> {
        let outcome = self.run().await;
        self.robot.shutdown();
        outcome.map(|()| self.robot)
    }

    async fn run(&mut self) -> Result<(), ServerError> {
        let mut ticker = interval(self.period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut buf = [0u8; BUFFER_SIZE];

        loop {
            tokio::select! {
                _ = ticker.tick() => self.robot.on_timer(),
                received = self.socket.recv_from(&mut buf) => {
                    let (len, peer) = received?;
                    if self.handle_datagram(&buf[..len], peer).await == Flow::End {
                        return Ok(());
                    }
                }
            }
        }
    }

    /// Apply every frame in one datagram, replying to `peer`.
    async fn handle_datagram(&mut self, datagram: &[u8], peer: SocketAddr) -> Flow {
        for frame in parse_datagram(datagram) {
            match frame {
                Ok(Command::End) => {
                    info!("END received from {}, stopping", peer);
                    return Flow::End;
                }
                Ok(command) => {
                    debug!("{} -> {:?}", peer, command);
                    if let Some(reply) = self.handle(command) {
                        send_reply(&self.socket, &self.diagnostics, &reply, peer).await;
                    }
                }
                Err(err) => {
                    self.diagnostics.record_malformed_frame();
                    warn!("ignoring frame from {}: {}", peer, err);
                }
            }
        }
        Flow::Continue
    }

    fn handle(&mut self, command: Command) -> Option<String> {
        let robot = &mut self.robot;
        match command {
            Command::Check => Some(HELLO.to_string()),
            Command::Query(query) => Some(match query {
                Query::Pwm => {
                    let (left, right) = robot.reference();
                    format_tuple(&[left, right])
                }
                Query::Ticks => {
                    let (left, right) = robot.ticks();
                    format_tuple(&[left as f64, right as f64])
                }
                Query::Speed => {
                    let (left, right) = robot.speed();
                    format_tuple(&[left, right])
                }
                Query::IrValues => format_tuple(&robot.ir_values()),
                Query::IrDistances => format_tuple(&robot.ir_distances()),
            }),
            Command::SetSpeed { left, right } => {
                robot.set_speed(left, right);
                None
            }
            Command::Update { left, right } => {
                robot.set_speed(left, right);
                let (ticks_left, ticks_right) = robot.ticks();
                let (speed_left, speed_right) = robot.speed();
                Some(format_tuple(&[
                    ticks_left as f64,
                    ticks_right as f64,
                    speed_left,
                    speed_right,
                ]))
            }
            Command::Reset => {
                robot.reset_ticks();
                None
            }
            // handled by the serve loop
            Command::End => None,
        }
    }
}

/// A failed reply is logged and counted and never ends the session.
async fn send_reply(socket: &UdpSocket, diagnostics: &SharedDiagnostics, reply: &str, peer: SocketAddr) {
    if let Err(err) = socket.send_to(reply.as_bytes(), peer).await {
        diagnostics.record_failed_reply();
        warn!("reply to {} failed: {}", peer, err);
    }
}

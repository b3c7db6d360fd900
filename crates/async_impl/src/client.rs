use std::io;
use std::net::SocketAddr;
use std::str;
use std::time::Duration;

use log::debug;
use thiserror::Error;
use tokio::net::UdpSocket;
use tokio::time::timeout;

use common::protocol::{parse_tuple, Command, FrameError, Query, HELLO};
use common::IR_SENSOR_COUNT;

const BUFFER_SIZE: usize = 1024;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("socket error: {0}")]
    Io(#[from] io::Error),
    #[error("no reply after {attempts} attempts")]
    Timeout { attempts: u32 },
    #[error("unexpected reply {0:?}")]
    BadReply(String),
    #[error(transparent)]
    Frame(#[from] FrameError),
}

/// Base-station side proxy for a robot served by [`crate::RobotServer`].
pub struct RobotClient {
    socket: UdpSocket,
    robot_addr: SocketAddr,
    reply_timeout: Duration,
    retries: u32,
}

impl RobotClient {
    /// Bind `local_addr`, then check that something at `robot_addr`
    /// answers like a robot.
    pub async fn connect(
        local_addr: &str,
        robot_addr: SocketAddr,
        reply_timeout: Duration,
        retries: u32,
    ) -> Result<Self, ClientError> {
        let socket = UdpSocket::bind(local_addr).await?;
        let client = Self {
            socket,
            robot_addr,
            reply_timeout,
            retries: retries.max(1),
        };
        client.check().await?;
        Ok(client)
    }

    pub fn robot_addr(&self) -> SocketAddr {
        self.robot_addr
    }

    pub async fn check(&self) -> Result<(), ClientError> {
        let reply = self.request(Command::Check).await?;
        if reply.starts_with(HELLO.trim_end()) {
            Ok(())
        } else {
            Err(ClientError::BadReply(reply))
        }
    }

    pub async fn set_speed(&self, left: f64, right: f64) -> Result<(), ClientError> {
        self.send(Command::SetSpeed { left, right }).await
    }

    /// Set speeds and read back `(ticks, speed)` in one exchange.
    pub async fn update(&self, left: f64, right: f64) -> Result<((f64, f64), (f64, f64)), ClientError> {
        let [tl, tr, sl, sr] = self.query_n(Command::Update { left, right }).await?;
        Ok(((tl, tr), (sl, sr)))
    }

    pub async fn reference(&self) -> Result<(f64, f64), ClientError> {
        let [left, right] = self.query_n(Command::Query(Query::Pwm)).await?;
        Ok((left, right))
    }

    pub async fn ticks(&self) -> Result<(i64, i64), ClientError> {
        let [left, right] = self.query_n(Command::Query(Query::Ticks)).await?;
        Ok((left as i64, right as i64))
    }

    pub async fn speed(&self) -> Result<(f64, f64), ClientError> {
        let [left, right] = self.query_n(Command::Query(Query::Speed)).await?;
        Ok((left, right))
    }

    pub async fn ir_values(&self) -> Result<[f64; IR_SENSOR_COUNT], ClientError> {
        self.query_n(Command::Query(Query::IrValues)).await
    }

    pub async fn ir_distances(&self) -> Result<[f64; IR_SENSOR_COUNT], ClientError> {
        self.query_n(Command::Query(Query::IrDistances)).await
    }

    pub async fn reset_ticks(&self) -> Result<(), ClientError> {
        self.send(Command::Reset).await
    }

    /// Ask the server to stop serving.
    pub async fn end(&self) -> Result<(), ClientError> {
        self.send(Command::End).await
    }

    async fn send(&self, command: Command) -> Result<(), ClientError> {
        self.socket
            .send_to(command.to_frame().as_bytes(), self.robot_addr)
            .await?;
        Ok(())
    }

    async fn query_n<const N: usize>(&self, command: Command) -> Result<[f64; N], ClientError> {
        let reply = self.request(command).await?;
        let values = parse_tuple(&reply)?;
        values
            .try_into()
            .map_err(|_| ClientError::BadReply(reply.trim_end().to_string()))
    }

    async fn request(&self, command: Command) -> Result<String, ClientError> {
        let frame = command.to_frame();
        let mut buf = [0u8; BUFFER_SIZE];
        self.drain_stale_replies(&mut buf);

        for attempt in 1..=self.retries {
            self.socket.send_to(frame.as_bytes(), self.robot_addr).await?;
            match timeout(self.reply_timeout, self.recv_from_robot(&mut buf)).await {
                Ok(received) => {
                    let len = received?;
                    let reply = str::from_utf8(&buf[..len]).map_err(|_| FrameError::NotUtf8)?;
                    return Ok(reply.to_string());
                }
                Err(_) => debug!("{} timed out, attempt {}", frame.trim_end(), attempt),
            }
        }
        Err(ClientError::Timeout { attempts: self.retries })
    }

    async fn recv_from_robot(&self, buf: &mut [u8]) -> io::Result<usize> {
        loop {
            let (len, sender) = self.socket.recv_from(buf).await?;
            if sender == self.robot_addr {
                return Ok(len);
            }
            debug!("dropping {} bytes from {}", len, sender);
        }
    }

    /// Discard replies left over from attempts that already timed out.
    fn drain_stale_replies(&self, buf: &mut [u8]) {
        while self.socket.try_recv_from(buf).is_ok() {}
    }
}

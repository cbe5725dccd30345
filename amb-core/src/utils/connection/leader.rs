//! Leader-side position streaming.
//!
//! Samples every leader servo and sends one newline-terminated JSON mapping
//! per tick, the same framing the follower side parses. The cadence is
//! fixed; the follower anchors on the first line and mirrors deltas from
//! there.

extern crate alloc;

use alloc::collections::BTreeMap;

use embassy_time::{Duration, Ticker};
use embedded_io_async::Write;

use crate::utils::config::{JointId, JointMap, Position};
use crate::utils::controllers::bus::{RegisterTransport, ServoBus};

/// Errors that end the streaming loop.
#[derive(Debug)]
pub enum StreamError<E> {
    /// The socket rejected a write; the connection is gone.
    Write(E),
    /// Positions could not be serialized.
    Encode(serde_json::Error),
}

/// Sample and send leader positions forever, one line per tick.
///
/// Servos that fail to answer are skipped for that tick with a warning; a
/// single silent joint must not stall the rest of the arm. Returns only when
/// the stream rejects a write.
pub async fn stream_positions<T, W>(
    bus: &mut ServoBus<T>,
    map: &JointMap,
    socket: &mut W,
    period: Duration,
) -> Result<(), StreamError<W::Error>>
where
    T: RegisterTransport,
    W: Write,
{
    let mut ticker = Ticker::every(period);
    loop {
        let positions = sample_leaders(bus, map);
        if positions.is_empty() {
            tracing::warn!("no leader servo answered this tick");
        } else {
            let mut line =
                serde_json::to_string(&positions).map_err(StreamError::Encode)?;
            line.push('\n');
            socket
                .write_all(line.as_bytes())
                .await
                .map_err(StreamError::Write)?;
            socket.flush().await.map_err(StreamError::Write)?;
        }
        ticker.next().await;
    }
}

/// Read the present position of every leader in the map.
pub fn sample_leaders<T: RegisterTransport>(
    bus: &mut ServoBus<T>,
    map: &JointMap,
) -> BTreeMap<JointId, Position> {
    let mut positions = BTreeMap::new();
    for pair in map.pairs() {
        match bus.read_position(pair.leader) {
            Some(position) => {
                positions.insert(pair.leader, position);
            }
            None => tracing::warn!("failed to read position for leader {}", pair.leader),
        }
    }
    positions
}

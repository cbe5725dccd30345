use std::collections::{BTreeMap, HashMap, HashSet};

use amb_core::utils::config::{BusRegisters, JointConfig, JointId, JointMap, JointPair, Position};
use amb_core::utils::connection::framer::{parse_message, LineFramer, ParseError};
use amb_core::utils::connection::leader::sample_leaders;
use amb_core::utils::controllers::bus::{RegisterTransport, ServoBus};
use amb_core::utils::controllers::grip::{GripCommand, GripModule};
use amb_core::utils::controllers::mirror::{Baseline, Command, JointOutcome, MirrorSession, SessionEvent};
use amb_core::utils::controllers::MirrorController;
use embedded_hal_mock::eh1::pwm::{Mock as PwmMock, Transaction as PwmTrans};

// Provides the critical-section implementation backing the channel mutexes.
use critical_section as _;

/// Scripted register transport: serves canned present positions, records
/// every write, and can be told to reject goal writes for specific ids.
#[derive(Default)]
struct MockBus {
    positions: HashMap<JointId, Position>,
    writes: Vec<(JointId, u8, u16)>,
    fail_writes: HashSet<JointId>,
}

#[derive(Debug, PartialEq)]
struct WriteRejected;

impl MockBus {
    fn with_positions(entries: &[(JointId, Position)]) -> Self {
        MockBus {
            positions: entries.iter().copied().collect(),
            ..MockBus::default()
        }
    }

    /// Goal-register writes only, in issue order.
    fn goal_writes(&self) -> Vec<(JointId, u16)> {
        let goal = BusRegisters::default().goal_position;
        self.writes
            .iter()
            .filter(|(_, reg, _)| *reg == goal)
            .map(|(id, _, value)| (*id, *value))
            .collect()
    }
}

impl RegisterTransport for MockBus {
    type Error = WriteRejected;

    fn read_register(
        &mut self,
        id: JointId,
        reg: u8,
    ) -> Option<u16> {
        if reg == BusRegisters::default().present_position {
            self.positions.get(&id).copied()
        } else {
            None
        }
    }

    fn write_register(
        &mut self,
        id: JointId,
        reg: u8,
        value: u16,
    ) -> Result<(), WriteRejected> {
        if reg == BusRegisters::default().goal_position && self.fail_writes.contains(&id) {
            return Err(WriteRejected);
        }
        self.writes.push((id, reg, value));
        Ok(())
    }
}

/// Create a one-entry pair map with the given follower config.
fn single_pair(
    leader: JointId,
    follower: JointId,
    config: JointConfig,
) -> JointMap {
    JointMap::new(vec![JointPair {
        leader,
        follower,
        config,
    }])
}

/// Build a position-update payload from literal entries.
fn update(entries: &[(JointId, Position)]) -> BTreeMap<JointId, Position> {
    entries.iter().copied().collect()
}

#[test]
fn anchor_message_moves_nothing() {
    let map = single_pair(10, 30, JointConfig::default());
    let mut bus = ServoBus::new(
        MockBus::with_positions(&[(30, 1500)]),
        BusRegisters::default(),
    );
    let mut session = MirrorSession::new(map);

    let outcomes = session.apply_update(&mut bus, &update(&[(10, 2000)]));
    assert_eq!(outcomes, vec![(10, JointOutcome::Anchored)]);
    assert!(session.is_anchored());
    assert_eq!(
        session.baseline(10),
        Some(Baseline {
            leader: 2000,
            follower: 1500,
        })
    );
    assert!(bus.transport_mut().goal_writes().is_empty());
}

#[test]
fn identical_update_holds_position() {
    let map = single_pair(10, 30, JointConfig::default());
    let mut bus = ServoBus::new(
        MockBus::with_positions(&[(30, 1500)]),
        BusRegisters::default(),
    );
    let mut session = MirrorSession::new(map);

    session.apply_update(&mut bus, &update(&[(10, 2000)]));
    let outcomes = session.apply_update(&mut bus, &update(&[(10, 2000)]));
    assert_eq!(
        outcomes,
        vec![(
            10,
            JointOutcome::Moved {
                follower: 30,
                target: 1500,
            }
        )]
    );
}

/// Anchor at 2000, then +50 on the leader moves the follower +50.
#[test]
fn end_to_end_mirrors_delta() {
    let map = single_pair(10, 30, JointConfig::default());
    let mut bus = ServoBus::new(
        MockBus::with_positions(&[(30, 1500)]),
        BusRegisters::default(),
    );
    let mut session = MirrorSession::new(map);

    session.apply_update(&mut bus, &update(&[(10, 2000)]));
    let outcomes = session.apply_update(&mut bus, &update(&[(10, 2050)]));
    assert_eq!(
        outcomes,
        vec![(
            10,
            JointOutcome::Moved {
                follower: 30,
                target: 1550,
            }
        )]
    );
    assert_eq!(bus.transport_mut().goal_writes(), vec![(30, 1550)]);
}

#[test]
fn wraparound_crosses_seam_the_short_way() {
    let map = single_pair(11, 31, JointConfig::default());
    let mut bus = ServoBus::new(
        MockBus::with_positions(&[(31, 2000)]),
        BusRegisters::default(),
    );
    let mut session = MirrorSession::new(map);

    session.apply_update(&mut bus, &update(&[(11, 4000)]));
    // 4000 -> 100 is +196 across the boundary, not -3900
    let outcomes = session.apply_update(&mut bus, &update(&[(11, 100)]));
    assert_eq!(
        outcomes,
        vec![(
            11,
            JointOutcome::Moved {
                follower: 31,
                target: 2196,
            }
        )]
    );
}

#[test]
fn target_clamps_at_range_edge() {
    let config = JointConfig {
        multiplier: 4.0,
        ..JointConfig::default()
    };
    let map = single_pair(12, 32, config);
    let mut bus = ServoBus::new(
        MockBus::with_positions(&[(32, 4090)]),
        BusRegisters::default(),
    );
    let mut session = MirrorSession::new(map);

    session.apply_update(&mut bus, &update(&[(12, 2000)]));
    let outcomes = session.apply_update(&mut bus, &update(&[(12, 2010)]));
    assert_eq!(
        outcomes,
        vec![(
            12,
            JointOutcome::Moved {
                follower: 32,
                target: 4095,
            }
        )]
    );
}

#[test]
fn reversed_follower_moves_opposite() {
    let config = JointConfig {
        reversed: true,
        ..JointConfig::default()
    };
    let map = single_pair(13, 33, config);
    let mut bus = ServoBus::new(
        MockBus::with_positions(&[(33, 2000)]),
        BusRegisters::default(),
    );
    let mut session = MirrorSession::new(map);

    session.apply_update(&mut bus, &update(&[(13, 1000)]));
    let outcomes = session.apply_update(&mut bus, &update(&[(13, 1050)]));
    assert_eq!(
        outcomes,
        vec![(
            13,
            JointOutcome::Moved {
                follower: 33,
                target: 1950,
            }
        )]
    );
}

/// One stuck actuator must not stall the rest of the arm.
#[test]
fn write_failure_is_isolated_to_its_joint() {
    let map = JointMap::new(vec![JointPair::new(14, 34), JointPair::new(15, 35)]);
    let mut mock = MockBus::with_positions(&[(34, 1000), (35, 1000)]);
    mock.fail_writes.insert(34);
    let mut bus = ServoBus::new(mock, BusRegisters::default());
    let mut session = MirrorSession::new(map);

    session.apply_update(&mut bus, &update(&[(14, 500), (15, 500)]));
    let outcomes = session.apply_update(&mut bus, &update(&[(14, 510), (15, 510)]));
    assert_eq!(
        outcomes,
        vec![
            (14, JointOutcome::WriteFailed { follower: 34 }),
            (
                15,
                JointOutcome::Moved {
                    follower: 35,
                    target: 1010,
                }
            ),
        ]
    );
    assert_eq!(bus.transport_mut().goal_writes(), vec![(35, 1010)]);
}

#[test]
fn unmapped_leader_is_reported_not_fatal() {
    let map = single_pair(16, 36, JointConfig::default());
    let mut bus = ServoBus::new(
        MockBus::with_positions(&[(36, 500)]),
        BusRegisters::default(),
    );
    let mut session = MirrorSession::new(map);

    let outcomes = session.apply_update(&mut bus, &update(&[(16, 1000), (99, 1234)]));
    assert_eq!(
        outcomes,
        vec![(16, JointOutcome::Anchored), (99, JointOutcome::Unmapped)]
    );
}

/// Reset homes the followers, and the next update only re-anchors.
#[test]
fn reset_homes_followers_and_reanchors() {
    let map = single_pair(17, 37, JointConfig::default());
    let mut bus = ServoBus::new(
        MockBus::with_positions(&[(37, 1000)]),
        BusRegisters::default(),
    );
    let mut session = MirrorSession::new(map);

    session.apply_update(&mut bus, &update(&[(17, 1000)]));
    session.apply_update(&mut bus, &update(&[(17, 1100)]));
    session.reset(&mut bus);
    assert!(!session.is_anchored());

    // the arm was homed; the mock now reports the starting position
    bus.transport_mut().positions.insert(37, 2048);
    let outcomes = session.apply_update(&mut bus, &update(&[(17, 1300)]));
    assert_eq!(outcomes, vec![(17, JointOutcome::Anchored)]);
    let outcomes = session.apply_update(&mut bus, &update(&[(17, 1310)]));
    assert_eq!(
        outcomes,
        vec![(
            17,
            JointOutcome::Moved {
                follower: 37,
                target: 2058,
            }
        )]
    );
    assert_eq!(
        bus.transport_mut().goal_writes(),
        vec![(37, 1100), (37, 2048), (37, 2058)]
    );
}

/// Dropping the link releases baselines without touching the servos.
#[test]
fn disconnect_drops_baselines_without_writes() {
    let map = single_pair(18, 38, JointConfig::default());
    let mut controller =
        MirrorController::new(MockBus::default(), BusRegisters::default(), map);

    controller.handle(SessionEvent::Command(Command::PositionUpdate(update(&[(
        18, 100,
    )]))));
    assert!(controller.session().is_anchored());

    controller.handle(SessionEvent::Disconnected);
    assert!(!controller.session().is_anchored());

    // first update after reconnect anchors again instead of moving
    controller.handle(SessionEvent::Command(Command::PositionUpdate(update(&[(
        18, 500,
    )]))));
    assert!(controller.session().is_anchored());
    assert!(controller.bus_mut().transport_mut().goal_writes().is_empty());
}

/// Pair setup releases torque on both ends, selects position mode, then
/// re-engages the follower only.
#[test]
fn initialize_pairs_write_sequence() {
    let map = single_pair(19, 39, JointConfig::default());
    let mut controller =
        MirrorController::new(MockBus::default(), BusRegisters::default(), map);

    assert_eq!(
        controller.bus_mut().transport_mut().writes,
        vec![
            (39, 40, 0),
            (19, 40, 0),
            (39, 33, 0),
            (19, 33, 0),
            (39, 40, 1),
        ]
    );
}

/// A reconnect can anchor a silent follower at the last goal it was sent.
#[test]
fn last_known_position_survives_session_teardown() {
    let map = single_pair(20, 90, JointConfig::default());
    let mut bus = ServoBus::new(
        MockBus::with_positions(&[(90, 700)]),
        BusRegisters::default(),
    );
    let mut session = MirrorSession::new(map.clone());
    session.apply_update(&mut bus, &update(&[(20, 1000)]));
    session.apply_update(&mut bus, &update(&[(20, 1010)]));
    assert_eq!(bus.transport_mut().goal_writes(), vec![(90, 710)]);

    // new session over a bus that no longer answers position reads
    let mut bus = ServoBus::new(MockBus::default(), BusRegisters::default());
    let mut session = MirrorSession::new(map);
    session.apply_update(&mut bus, &update(&[(20, 2000)]));
    assert_eq!(
        session.baseline(20),
        Some(Baseline {
            leader: 2000,
            follower: 710,
        })
    );
    let outcomes = session.apply_update(&mut bus, &update(&[(20, 2005)]));
    assert_eq!(
        outcomes,
        vec![(
            20,
            JointOutcome::Moved {
                follower: 90,
                target: 715,
            }
        )]
    );
}

#[test]
fn framer_reassembles_split_messages() {
    let mut framer = LineFramer::new();

    let mut parsed = framer.feed(b"{1: 100}\n{2: 2");
    assert_eq!(parsed.len(), 1);
    assert_eq!(
        parsed.remove(0).unwrap(),
        Command::PositionUpdate(update(&[(1, 100)]))
    );
    assert_eq!(framer.pending(), b"{2: 2");

    let mut parsed = framer.feed(b"00}\n");
    assert_eq!(parsed.len(), 1);
    assert_eq!(
        parsed.remove(0).unwrap(),
        Command::PositionUpdate(update(&[(2, 200)]))
    );
    assert!(framer.pending().is_empty());
}

/// The sender's historical bare-key form and proper JSON both decode.
#[test]
fn parse_accepts_bare_and_quoted_keys() {
    let bare = parse_message(b"{10: 2000, 11: 1024}").unwrap();
    let quoted = parse_message(b"{\"10\": 2000, \"11\": 1024}").unwrap();
    assert_eq!(bare, quoted);
    assert_eq!(
        bare,
        Command::PositionUpdate(update(&[(10, 2000), (11, 1024)]))
    );
}

#[test]
fn framer_recovers_after_malformed_line() {
    let mut framer = LineFramer::new();
    let parsed = framer.feed(b"garbage\n{\"3\": 7}\n");
    assert_eq!(parsed.len(), 2);
    assert!(matches!(parsed[0], Err(ParseError::Malformed(_))));
    assert_eq!(
        *parsed[1].as_ref().unwrap(),
        Command::PositionUpdate(update(&[(3, 7)]))
    );
}

#[test]
fn framer_recognizes_reset_sentinel() {
    let mut framer = LineFramer::new();
    let parsed = framer.feed(b"RESET\r\n");
    assert_eq!(parsed.len(), 1);
    assert_eq!(*parsed[0].as_ref().unwrap(), Command::Reset);
}

#[test]
fn framer_skips_blank_lines() {
    let mut framer = LineFramer::new();
    let parsed = framer.feed(b"\n\r\n{\"4\": 44}\n");
    assert_eq!(parsed.len(), 1);
    assert_eq!(
        *parsed[0].as_ref().unwrap(),
        Command::PositionUpdate(update(&[(4, 44)]))
    );
}

#[test]
fn parse_rejects_out_of_range_position() {
    assert!(matches!(
        parse_message(b"{\"5\": 4096}"),
        Err(ParseError::PositionOutOfRange {
            joint: 5,
            value: 4096,
        })
    ));
}

#[test]
fn parse_rejects_non_integer_keys() {
    assert!(matches!(
        parse_message(b"{\"shoulder\": 10}"),
        Err(ParseError::Malformed(_))
    ));
}

/// Correction parameters come from data, never from tables in the engine.
#[test]
fn joint_map_loads_from_json() {
    let raw = r#"[
        {"leader": 4, "follower": 24, "config": {"reversed": true, "multiplier": 3.0}},
        {"leader": 5, "follower": 25}
    ]"#;
    let map: JointMap = serde_json::from_str(raw).unwrap();
    assert_eq!(map.len(), 2);

    let pair = map.follower_of(4).unwrap();
    assert!(pair.config.reversed);
    assert_eq!(pair.config.multiplier, 3.0);
    assert_eq!(pair.config.starting_position, 2048);

    let pair = map.leader_of(25).unwrap();
    assert_eq!(pair.leader, 5);
    assert!(!pair.config.reversed);
}

#[test]
fn sample_leaders_skips_silent_servos() {
    let map = JointMap::new(vec![JointPair::new(41, 61), JointPair::new(42, 62)]);
    let mut bus = ServoBus::new(
        MockBus::with_positions(&[(41, 1111)]),
        BusRegisters::default(),
    );
    let positions = sample_leaders(&mut bus, &map);
    assert_eq!(positions, update(&[(41, 1111)]));
}

/// A sampled line round-trips through the follower-side parser.
#[test]
fn leader_line_parses_back_on_the_follower_side() {
    let map = JointMap::new(vec![JointPair::new(43, 63), JointPair::new(44, 64)]);
    let mut bus = ServoBus::new(
        MockBus::with_positions(&[(43, 2000), (44, 3050)]),
        BusRegisters::default(),
    );
    let positions = sample_leaders(&mut bus, &map);
    let line = serde_json::to_string(&positions).unwrap();
    assert_eq!(line, r#"{"43":2000,"44":3050}"#);

    let mut framer = LineFramer::new();
    let parsed = framer.feed(format!("{line}\n").as_bytes());
    assert_eq!(parsed.len(), 1);
    assert_eq!(
        *parsed[0].as_ref().unwrap(),
        Command::PositionUpdate(positions)
    );
}

#[test]
fn grip_commands_map_to_pulse_widths() {
    let expectations = [
        PwmTrans::max_duty_cycle(20_000),
        PwmTrans::set_duty_cycle(1500),
        PwmTrans::max_duty_cycle(20_000),
        PwmTrans::set_duty_cycle(2500),
        PwmTrans::max_duty_cycle(20_000),
        PwmTrans::set_duty_cycle(500),
    ];
    let mut pwm = PwmMock::new(&expectations);
    let mut grip = GripModule::new(pwm.clone());

    grip.ex_command(GripCommand::Set { v: 0.0 }).unwrap();
    grip.ex_command(GripCommand::Open).unwrap();
    grip.ex_command(GripCommand::Close).unwrap();
    pwm.done();
}

#[test]
fn grip_value_is_clamped() {
    let expectations = [
        PwmTrans::max_duty_cycle(20_000),
        PwmTrans::set_duty_cycle(2500),
    ];
    let mut pwm = PwmMock::new(&expectations);
    let mut grip = GripModule::new(pwm.clone());

    grip.ex_command(GripCommand::Set { v: 5.0 }).unwrap();
    assert_eq!(grip.value(), 1.0);
    pwm.done();
}

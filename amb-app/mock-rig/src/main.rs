use amb_core::utils::config::{BusRegisters, JointConfig, JointId, JointMap, JointPair};
use amb_core::utils::connection::leader::stream_positions;
use amb_core::utils::controllers::bus::{RegisterTransport, ServoBus};
use amb_core::utils::controllers::grip::{GripCommand, GripModule};
use amb_core::utils::controllers::{MirrorController, GRIP_CHANNEL};
use amb_core::utils::serve;
use clap::Parser;
use critical_section as _;
use embassy_executor::{Executor, Spawner};
use embassy_net::tcp::TcpSocket;
use embassy_net::{Config, Ipv4Address, Ipv4Cidr, Runner, Stack, StackResources};
use embassy_net_tuntap::TunTapDevice;
use embassy_time::{Duration, Timer};
use heapless::Vec;
use rand_core::{OsRng, TryRngCore};
use static_cell::StaticCell;
use std::convert::Infallible;
use tracing::{error, info};

#[derive(Parser)]
#[clap(version = "1.0")]
struct Opts {
    /// TAP device name
    #[clap(long, default_value = "tap0")]
    tap: String,
    /// use a static IP instead of DHCP
    #[clap(long)]
    static_ip: bool,
    /// TCP port for the teleoperation link
    #[clap(long, default_value_t = 12345)]
    port: u16,
    /// stream leader positions to this ip:port instead of serving
    #[clap(long)]
    connect: Option<String>,
    /// joint-map JSON file; a built-in four-pair map is used when omitted
    #[clap(long)]
    joints: Option<String>,
}

/// In-memory servo bus: remembers every write and answers present-position
/// reads with the last goal written, so the rig behaves like ideal servos.
struct MockBus {
    registers: std::collections::HashMap<(JointId, u8), u16>,
    layout: BusRegisters,
}

impl MockBus {
    fn new() -> Self {
        MockBus {
            registers: std::collections::HashMap::new(),
            layout: BusRegisters::default(),
        }
    }
}

impl RegisterTransport for MockBus {
    type Error = Infallible;

    fn read_register(
        &mut self,
        id: JointId,
        reg: u8,
    ) -> Option<u16> {
        let reg = if reg == self.layout.present_position {
            self.layout.goal_position
        } else {
            reg
        };
        Some(self.registers.get(&(id, reg)).copied().unwrap_or(2048))
    }

    fn write_register(
        &mut self,
        id: JointId,
        reg: u8,
        value: u16,
    ) -> Result<(), Infallible> {
        info!("servo {} reg {} <- {}", id, reg, value);
        self.registers.insert((id, reg), value);
        Ok(())
    }
}

/// Leader-side stand-in: every position read advances a slow sweep so the
/// follower end has something to mirror, wrapping across the encoder seam.
struct SweepBus {
    tick: u32,
}

impl RegisterTransport for SweepBus {
    type Error = Infallible;

    fn read_register(
        &mut self,
        id: JointId,
        _reg: u8,
    ) -> Option<u16> {
        self.tick = self.tick.wrapping_add(3);
        Some(((2048 + self.tick as i32 + id as i32 * 64) % 4096) as u16)
    }

    fn write_register(
        &mut self,
        _id: JointId,
        _reg: u8,
        _value: u16,
    ) -> Result<(), Infallible> {
        Ok(())
    }
}

/// PWM channel that logs duty updates instead of driving hardware.
struct LogPwm;

impl embedded_hal::pwm::ErrorType for LogPwm {
    type Error = Infallible;
}

impl embedded_hal::pwm::SetDutyCycle for LogPwm {
    fn max_duty_cycle(&self) -> u16 {
        20_000
    }

    fn set_duty_cycle(
        &mut self,
        duty: u16,
    ) -> Result<(), Infallible> {
        info!("grip duty: {}/20000", duty);
        Ok(())
    }
}

/// Built-in four-pair map for the demo rig. Real deployments load a JSON
/// file via `--joints`.
fn default_map() -> JointMap {
    JointMap::new(vec![
        JointPair::new(1, 21),
        JointPair::new(2, 22),
        JointPair::new(3, 23),
        JointPair {
            leader: 4,
            follower: 24,
            config: JointConfig {
                multiplier: 3.0,
                ..JointConfig::default()
            },
        },
    ])
}

#[embassy_executor::task]
async fn net_task(mut runner: Runner<'static, TunTapDevice>) -> ! {
    runner.run().await
}

#[embassy_executor::task]
async fn mirror_task(mut controller: MirrorController<MockBus>) -> ! {
    controller.session_loop().await
}

#[embassy_executor::task]
async fn grip_task(mut grip: GripModule<LogPwm>) -> ! {
    loop {
        let cmd: GripCommand = GRIP_CHANNEL.receiver().receive().await;
        if let Err(e) = grip.ex_command(cmd) {
            error!("grip command failed: {:?}", e);
        }
    }
}

/// Connect to a follower and stream a synthetic leader sweep at 10 Hz.
async fn run_leader(
    stack: Stack<'static>,
    endpoint: &str,
    map: JointMap,
) -> ! {
    let addr: std::net::SocketAddrV4 = endpoint.parse().unwrap();
    let remote = (Ipv4Address::from(*addr.ip()), addr.port());

    let mut bus = ServoBus::new(SweepBus { tick: 0 }, BusRegisters::default());
    let (mut rx_buffer, mut tx_buffer) = ([0; 1024], [0; 1024]);
    loop {
        let mut socket = TcpSocket::new(stack, &mut rx_buffer, &mut tx_buffer);
        info!("connecting to follower at {}", endpoint);
        if let Err(e) = socket.connect(remote).await {
            error!("connect failed: {:?}", e);
            Timer::after(Duration::from_secs(1)).await;
            continue;
        }
        info!("streaming leader positions at 10 Hz");
        if let Err(e) =
            stream_positions(&mut bus, &map, &mut socket, Duration::from_millis(100)).await
        {
            error!("stream ended: {:?}", e);
        }
        socket.close();
        Timer::after(Duration::from_secs(1)).await;
    }
}

#[embassy_executor::task]
async fn main_task(spawner: Spawner) {
    let opts: Opts = Opts::parse();

    let map = match &opts.joints {
        Some(path) => {
            let raw = std::fs::read_to_string(path).unwrap();
            serde_json::from_str(&raw).unwrap()
        }
        None => default_map(),
    };
    info!("joint map with {} pair(s)", map.len());

    // Parse CLI and initialize network
    let device = TunTapDevice::new(&opts.tap).unwrap();
    let config = if opts.static_ip {
        Config::ipv4_static(embassy_net::StaticConfigV4 {
            address: Ipv4Cidr::new(Ipv4Address::new(192, 168, 69, 2), 24),
            dns_servers: Vec::new(),
            gateway: Some(Ipv4Address::new(192, 168, 69, 1)),
        })
    } else {
        Config::dhcpv4(Default::default())
    };
    let mut seed_buf = [0; 8];
    OsRng.try_fill_bytes(&mut seed_buf).unwrap();
    let seed = u64::from_le_bytes(seed_buf);

    static RESOURCES: StaticCell<StackResources<3>> = StaticCell::new();
    let (stack, runner) =
        embassy_net::new(device, config, RESOURCES.init(StackResources::new()), seed);
    spawner.spawn(net_task(runner)).unwrap();

    info!("waiting for network link...");
    stack.wait_config_up().await;

    if let Some(endpoint) = &opts.connect {
        run_leader(stack, endpoint, map).await
    } else {
        let controller = MirrorController::new(MockBus::new(), BusRegisters::default(), map);
        spawner.spawn(mirror_task(controller)).unwrap();
        spawner.spawn(grip_task(GripModule::new(LogPwm))).unwrap();
        GRIP_CHANNEL.send(GripCommand::Open).await;

        info!("starting follower link on port {}", opts.port);
        serve(opts.port, stack, None).await
    }
}

static EXECUTOR: StaticCell<Executor> = StaticCell::new();

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();
    let executor = EXECUTOR.init(Executor::new());
    executor.run(|spawner| {
        spawner.spawn(main_task(spawner)).unwrap();
    });
}

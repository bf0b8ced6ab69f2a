//! Sample sources: a serial heart-rate sensor and a random-walk simulator.
//!
//! The sensor writes newline-terminated text such as `BPM: 82`. Lines that
//! do not carry a reading are ignored. If the device cannot be opened, fails
//! while reading, or closes its stream, the simulator takes over for the
//! rest of the process lifetime.

use crate::common::{Bpm, SourceKind};
use crate::config::{SimulatorConfig, SourceConfig};
use crate::engine::PulseHub;
use crate::error::SourceError;
use crate::events::PulseEvent;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use regex::Regex;
use std::sync::OnceLock;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::sync::broadcast;
use tracing::{debug, error, info, trace, warn};

/// Longest sensor line kept, newline included.
pub const MAX_LINE_BYTES: u64 = 256;

static BPM_PATTERN: OnceLock<Regex> = OnceLock::new();

fn bpm_pattern() -> &'static Regex {
    BPM_PATTERN.get_or_init(|| Regex::new(r"BPM:\s*(\d+)").expect("BPM line pattern is valid"))
}

/// Extracts readings from sensor lines.
#[derive(Debug, Clone, Copy)]
pub struct LineParser {
    fallback: Bpm,
}

impl LineParser {
    pub fn new(fallback: Bpm) -> Self {
        Self { fallback }
    }

    /// Parses one line.
    ///
    /// Returns `None` for lines without a `BPM:` field. A field whose number
    /// overflows or reads as zero yields the fallback value.
    pub fn parse(&self, line: &str) -> Option<Bpm> {
        let captures = bpm_pattern().captures(line)?;
        let value = captures
            .get(1)
            .and_then(|m| m.as_str().parse::<u32>().ok())
            .filter(|v| *v > 0)
            .unwrap_or(self.fallback.0);
        Some(Bpm(value))
    }
}

/// A bounded random walk over plausible resting heart rates.
pub struct Simulator {
    current: Bpm,
    min: Bpm,
    max: Bpm,
    max_step: u32,
    rng: StdRng,
}

impl Simulator {
    /// Creates a simulator starting at `start`, clamped into the configured band.
    pub fn new(config: &SimulatorConfig, start: Bpm) -> Self {
        Self::with_rng(config, start, StdRng::from_entropy())
    }

    /// Creates a simulator with a fixed seed, for reproducible walks.
    pub fn seeded(config: &SimulatorConfig, start: Bpm, seed: u64) -> Self {
        Self::with_rng(config, start, StdRng::seed_from_u64(seed))
    }

    fn with_rng(config: &SimulatorConfig, start: Bpm, rng: StdRng) -> Self {
        let (min, max) = if config.min_bpm <= config.max_bpm {
            (config.min_bpm, config.max_bpm)
        } else {
            (config.max_bpm, config.min_bpm)
        };
        Self {
            current: start.clamp(min, max),
            min,
            max,
            max_step: config.max_step,
            rng,
        }
    }

    pub fn current(&self) -> Bpm {
        self.current
    }

    /// Applies `delta` and clamps the result into the band.
    pub fn step_by(&mut self, delta: i64) -> Bpm {
        let next = (i64::from(self.current.0) + delta)
            .clamp(i64::from(self.min.0), i64::from(self.max.0));
        // Clamped into [min, max], so the cast is lossless.
        self.current = Bpm(next as u32);
        self.current
    }

    /// Applies a uniformly random delta in `[-max_step, max_step]`.
    pub fn step(&mut self) -> Bpm {
        let reach = i64::from(self.max_step);
        let delta = self.rng.gen_range(-reach..=reach);
        self.step_by(delta)
    }
}

/// Reads sensor lines from `reader` and feeds readings into `hub`.
///
/// Returns `Ok(())` when `shutdown` fires. End of stream and read errors
/// are returned so the caller can fall back to the simulator. Invalid
/// UTF-8 is decoded lossily rather than treated as a failure, and a line
/// longer than `MAX_LINE_BYTES` is dropped whole.
pub async fn run_serial<R>(
    hub: &PulseHub,
    mut reader: R,
    parser: LineParser,
    shutdown: &mut broadcast::Receiver<()>,
) -> Result<(), SourceError>
where
    R: AsyncBufRead + Unpin,
{
    let mut buf = Vec::with_capacity(64);
    // Set while skipping the remainder of a line that hit the length cap.
    let mut overlong = false;
    loop {
        buf.clear();
        let mut limited = (&mut reader).take(MAX_LINE_BYTES);
        let read = tokio::select! {
            biased;
            _ = shutdown.recv() => return Ok(()),
            read = limited.read_until(b'\n', &mut buf) => read?,
        };
        if read == 0 {
            return Err(SourceError::Disconnected);
        }
        let terminated = buf.last() == Some(&b'\n');
        if !terminated && buf.len() as u64 >= MAX_LINE_BYTES {
            if !overlong {
                warn!("Discarding sensor line longer than {} bytes", MAX_LINE_BYTES);
            }
            overlong = true;
            continue;
        }
        if std::mem::take(&mut overlong) {
            continue;
        }
        let text = String::from_utf8_lossy(&buf);
        let line = text.trim_end_matches(&['\r', '\n'][..]);
        match parser.parse(line) {
            Some(bpm) => {
                hub.ingest(bpm).await;
            }
            None => trace!("Ignoring sensor line {:?}", line),
        }
    }
}

/// Steps `simulator` every configured interval and feeds each value into `hub`.
pub async fn run_simulator(
    hub: &PulseHub,
    mut simulator: Simulator,
    config: &SimulatorConfig,
    shutdown: &mut broadcast::Receiver<()>,
) {
    let mut ticker = tokio::time::interval(config.interval());
    // The first tick completes immediately; the first sample is due one interval in.
    ticker.tick().await;
    loop {
        tokio::select! {
            biased;
            _ = shutdown.recv() => break,
            _ = ticker.tick() => {
                let bpm = simulator.step();
                debug!("Heart Rate (Simulated): {} BPM", bpm);
                hub.ingest(bpm).await;
            }
        }
    }
}

async fn open_serial(path: &str) -> Result<BufReader<tokio::fs::File>, SourceError> {
    let file = tokio::fs::File::open(path)
        .await
        .map_err(|source| SourceError::Open {
            path: path.to_string(),
            source,
        })?;
    Ok(BufReader::new(file))
}

/// Drives the hub from the serial sensor, falling back to the simulator.
pub struct SourceRunner {
    hub: PulseHub,
    config: SourceConfig,
}

impl SourceRunner {
    pub fn new(hub: PulseHub, config: SourceConfig) -> Self {
        Self { hub, config }
    }

    /// Runs until `shutdown` fires, then marks the hub as having no source.
    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        self.drive(&mut shutdown).await;
        self.hub.set_source_kind(None).await;
        self.hub.emit(PulseEvent::SourceStopped);
        info!("Sample source stopped.");
    }

    async fn drive(&self, shutdown: &mut broadcast::Receiver<()>) {
        let parser = LineParser::new(self.config.fallback_bpm);

        if let Some(path) = self.config.serial_device() {
            let failure = match open_serial(path).await {
                Ok(reader) => {
                    info!("Connected to heart-rate sensor on {}", path);
                    self.started(SourceKind::Serial).await;
                    match run_serial(&self.hub, reader, parser, shutdown).await {
                        Ok(()) => return,
                        Err(e) => e,
                    }
                }
                Err(e) => e,
            };
            error!("Heart-rate sensor unavailable: {}", failure);
            warn!("Continuing with simulated heart rate data.");
            self.hub.emit(PulseEvent::SourceFellBack {
                reason: failure.to_string(),
            });
        }

        let start = self
            .hub
            .latest()
            .await
            .unwrap_or(self.config.fallback_bpm);
        let simulator = Simulator::new(&self.config.simulator, start);
        self.started(SourceKind::Simulated).await;
        run_simulator(&self.hub, simulator, &self.config.simulator, shutdown).await;
    }

    async fn started(&self, kind: SourceKind) {
        self.hub.set_source_kind(Some(kind)).await;
        self.hub.emit(PulseEvent::SourceStarted { kind });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::components::alert::{AlertDispatcher, HighBpmAlert};
    use crate::components::registry::BpmSink;
    use crate::config::PulseConfig;
    use crate::error::{DispatchError, SinkError};
    use async_trait::async_trait;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    struct NullDispatcher;

    #[async_trait]
    impl AlertDispatcher for NullDispatcher {
        async fn dispatch(&self, _alert: &HighBpmAlert) -> Result<(), DispatchError> {
            Ok(())
        }
    }

    fn hub_with(config: PulseConfig) -> PulseHub {
        PulseHub::new(config, Arc::new(NullDispatcher))
    }

    fn collect(log: Arc<Mutex<Vec<Bpm>>>) -> Arc<dyn BpmSink> {
        Arc::new(move |bpm: Bpm| -> Result<(), SinkError> {
            log.lock().unwrap().push(bpm);
            Ok(())
        })
    }

    #[test]
    fn parser_extracts_readings() {
        let parser = LineParser::new(Bpm(75));
        assert_eq!(parser.parse("BPM: 82"), Some(Bpm(82)));
        assert_eq!(parser.parse("BPM:91"), Some(Bpm(91)));
        assert_eq!(parser.parse("IBI: 700 BPM:   64 ok"), Some(Bpm(64)));
        assert_eq!(parser.parse("Signal: 512"), None);
        assert_eq!(parser.parse(""), None);
    }

    #[test]
    fn parser_falls_back_on_unusable_numbers() {
        let parser = LineParser::new(Bpm(75));
        assert_eq!(parser.parse("BPM: 0"), Some(Bpm(75)));
        assert_eq!(parser.parse("BPM: 99999999999999"), Some(Bpm(75)));
    }

    #[test]
    fn simulator_never_exceeds_upper_bound() {
        let config = SimulatorConfig::default();
        let mut sim = Simulator::seeded(&config, Bpm(110), 7);
        for _ in 0..50 {
            assert_eq!(sim.step_by(i64::from(config.max_step)), Bpm(110));
        }
        for _ in 0..500 {
            assert!(sim.step() <= Bpm(110));
        }
    }

    #[test]
    fn simulator_never_drops_below_lower_bound() {
        let config = SimulatorConfig::default();
        let mut sim = Simulator::seeded(&config, Bpm(60), 11);
        for _ in 0..50 {
            assert_eq!(sim.step_by(-i64::from(config.max_step)), Bpm(60));
        }
        for _ in 0..500 {
            assert!(sim.step() >= Bpm(60));
        }
    }

    #[test]
    fn simulator_steps_are_small() {
        let config = SimulatorConfig::default();
        let mut sim = Simulator::seeded(&config, Bpm(85), 3);
        let mut previous = sim.current();
        for _ in 0..500 {
            let next = sim.step();
            assert!(next.0.abs_diff(previous.0) <= config.max_step);
            previous = next;
        }
    }

    #[test]
    fn simulator_clamps_its_starting_value() {
        let config = SimulatorConfig::default();
        assert_eq!(Simulator::seeded(&config, Bpm(140), 1).current(), Bpm(110));
        assert_eq!(Simulator::seeded(&config, Bpm(20), 1).current(), Bpm(60));
    }

    #[tokio::test]
    async fn serial_lines_feed_the_hub_until_disconnect() {
        let hub = hub_with(PulseConfig::default());
        let log = Arc::new(Mutex::new(Vec::new()));
        hub.subscribe(collect(log.clone())).await;
        let (_tx, mut shutdown) = broadcast::channel(1);

        let input: &[u8] = b"BPM: 75\r\nSignal: 530\r\nBPM: 82\r\nBPM:82\n\xff\xfe garbage\r\nBPM: 0\r\n";
        let result = run_serial(&hub, input, LineParser::new(Bpm(75)), &mut shutdown).await;

        assert!(matches!(result, Err(SourceError::Disconnected)));
        assert_eq!(*log.lock().unwrap(), vec![Bpm(82), Bpm(75)]);
        assert_eq!(hub.latest().await, Some(Bpm(75)));
    }

    #[tokio::test]
    async fn missing_device_falls_back_to_simulator() {
        let mut config = PulseConfig::default();
        config.source.serial_path = Some("/nonexistent/momcare-pulse-sensor".to_string());
        config.source.simulator.interval_ms = 5;
        let hub = hub_with(config.clone());
        let mut events = hub.subscribe_events();

        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let runner = SourceRunner::new(hub.clone(), config.source.clone());
        let task = tokio::spawn(runner.run(shutdown_rx));

        let mut fell_back = false;
        let started = tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                match events.recv().await {
                    Ok(PulseEvent::SourceFellBack { .. }) => fell_back = true,
                    Ok(PulseEvent::SourceStarted { kind }) => break kind,
                    Ok(_) => continue,
                    Err(e) => panic!("event bus closed: {e}"),
                }
            }
        })
        .await
        .unwrap();

        assert!(fell_back);
        assert_eq!(started, SourceKind::Simulated);
        assert_eq!(hub.status().await.source, Some(SourceKind::Simulated));

        shutdown_tx.send(()).unwrap();
        tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .unwrap()
            .unwrap();
        let latest = hub.latest().await.unwrap();
        assert!((Bpm(60)..=Bpm(110)).contains(&latest));
        assert_eq!(hub.status().await.source, None);
    }

    #[tokio::test]
    async fn overlong_lines_are_dropped_whole() {
        let hub = hub_with(PulseConfig::default());
        let log = Arc::new(Mutex::new(Vec::new()));
        hub.subscribe(collect(log.clone())).await;
        let (_tx, mut shutdown) = broadcast::channel(1);

        let mut input = vec![b'x'; MAX_LINE_BYTES as usize + 40];
        input.extend_from_slice(b" BPM: 99\r\nBPM: 82\r\n");
        let result = run_serial(&hub, &input[..], LineParser::new(Bpm(75)), &mut shutdown).await;

        assert!(matches!(result, Err(SourceError::Disconnected)));
        assert_eq!(*log.lock().unwrap(), vec![Bpm(82)]);
    }

    #[tokio::test]
    async fn line_just_under_the_cap_is_parsed() {
        let hub = hub_with(PulseConfig::default());
        let (_tx, mut shutdown) = broadcast::channel(1);

        let mut input = b"BPM: 91 ".to_vec();
        input.resize(MAX_LINE_BYTES as usize - 1, b' ');
        input.push(b'\n');
        let result = run_serial(&hub, &input[..], LineParser::new(Bpm(75)), &mut shutdown).await;

        assert!(matches!(result, Err(SourceError::Disconnected)));
        assert_eq!(hub.latest().await, Some(Bpm(91)));
    }
}

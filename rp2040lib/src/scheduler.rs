use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{sync_channel, Receiver, RecvTimeoutError, SyncSender};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use crate::protocol::{decode_log, Command, DeviceState, MotorLevels, Opcode};
use crate::transport::Transport;
use crate::{
    Error, FrameQueue, LinkConfig, LinkHealth, Publishers, Resynchronizer, Result,
    TelemetrySubscriber, VerifiedFrame,
};

/// How many cycles go into each timing report.
const TIMING_CYCLES: u32 = 100;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Scheduler counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct LinkStats {
    /// Scheduler iterations completed.
    pub cycles: u64,
    pub commands_sent: u64,
    /// `GET_STATE` polls sent because no command was waiting.
    pub polls: u64,
    pub frames_dispatched: u64,
    /// Commands that got no frame back within the response timeout.
    pub missed_responses: u64,
    /// Frames that showed up after their request had timed out.
    pub late_frames: u64,
    pub nacks: u64,
    pub decode_errors: u64,
}

#[derive(Debug)]
struct Shared {
    config: LinkConfig,
    resync: Resynchronizer,
    queue: FrameQueue,
    signal: SyncSender<()>,
    command: Mutex<Option<Command>>,
    command_ready: Condvar,
    state: Mutex<Option<DeviceState>>,
    publishers: Mutex<Publishers>,
    stats: Mutex<LinkStats>,
    shutdown: AtomicBool,
    fatal: Mutex<Option<Error>>,
}

impl Shared {
    fn wake(&self) {
        // a full channel already has a wakeup pending
        let _ = self.signal.try_send(());
    }

    fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::Acquire)
    }

    fn shutdown(&self) {
        self.shutdown.store(true, Ordering::Release);
        self.command_ready.notify_all();
        self.wake();
    }

    fn fail(&self, err: Error) {
        let mut fatal = lock(&self.fatal);
        if fatal.is_none() {
            *fatal = Some(err);
        }
        drop(fatal);
        self.shutdown();
    }
}

/// The controller link: a scheduler that keeps one command in flight, fed
/// by an [Inbound] that turns received bytes into verified frames.
///
/// Create one, hand out [LinkHandle]s and an [Inbound], then [Link::run]
/// or [Link::spawn] it with a [Transport].
#[derive(Debug)]
pub struct Link {
    shared: Arc<Shared>,
    signal: Receiver<()>,
}

/// Cheap, cloneable control surface for a [Link].
#[derive(Debug, Clone)]
pub struct LinkHandle {
    shared: Arc<Shared>,
}

/// Entry point for received bytes.
#[derive(Debug, Clone)]
pub struct Inbound {
    shared: Arc<Shared>,
}

impl Link {
    pub fn new(config: LinkConfig) -> Result<Self> {
        config.validate()?;
        let (signal_tx, signal_rx) = sync_channel(1);
        let shared = Shared {
            resync: Resynchronizer::new(&config),
            queue: FrameQueue::new(config.queue_capacity),
            signal: signal_tx,
            command: Mutex::new(None),
            command_ready: Condvar::new(),
            state: Mutex::new(None),
            publishers: Mutex::new(Publishers::new()),
            stats: Mutex::new(LinkStats::default()),
            shutdown: AtomicBool::new(false),
            fatal: Mutex::new(None),
            config,
        };

        Ok(Self {
            shared: Arc::new(shared),
            signal: signal_rx,
        })
    }

    pub fn handle(&self) -> LinkHandle {
        LinkHandle {
            shared: self.shared.clone(),
        }
    }

    pub fn inbound(&self) -> Inbound {
        Inbound {
            shared: self.shared.clone(),
        }
    }

    pub fn config(&self) -> &LinkConfig {
        &self.shared.config
    }

    /// Run the scheduler on this thread until shutdown or a fatal error.
    pub fn run<T>(self, mut transport: T) -> Result<()>
    where
        T: Transport,
    {
        let config = &self.shared.config;
        log::debug!("link scheduler running: {:?}", config);

        let mut window_start = Instant::now();
        let mut window_cycles = 0;

        while !self.shared.is_shutdown() {
            let command = self.next_command();
            if self.shared.is_shutdown() {
                break;
            }
            self.discard_stale();

            log::trace!("sending {:?}", command);
            if let Err(e) = transport.write(&command.encode(), config.write_timeout()) {
                let err = Error::from(e);
                log::error!("link stopped: {}", err);
                self.shared.shutdown();
                return Err(err);
            }
            lock(&self.shared.stats).commands_sent += 1;

            self.await_response(command.opcode(), config.response_timeout())?;

            lock(&self.shared.stats).cycles += 1;
            window_cycles += 1;
            if window_cycles == TIMING_CYCLES {
                let average = window_start.elapsed() / TIMING_CYCLES;
                log::debug!("average time per command: {:?}", average);
                window_start = Instant::now();
                window_cycles = 0;
            }
        }

        if let Some(err) = lock(&self.shared.fatal).take() {
            log::error!("link stopped: {}", err);
            return Err(err);
        }
        log::debug!("link scheduler stopped");
        Ok(())
    }

    /// Run the scheduler on a new thread.
    pub fn spawn<T>(self, transport: T) -> std::io::Result<std::thread::JoinHandle<Result<()>>>
    where
        T: Transport + Send + 'static,
    {
        std::thread::Builder::new()
            .name("rp2040-scheduler".to_owned())
            .spawn(move || self.run(transport))
    }

    /// Wait briefly for a command, otherwise poll.
    fn next_command(&self) -> Command {
        let shared = &self.shared;
        let slot = lock(&shared.command);
        let (mut slot, _) = shared
            .command_ready
            .wait_timeout_while(slot, shared.config.command_wait(), |c| {
                c.is_none() && !shared.is_shutdown()
            })
            .unwrap_or_else(PoisonError::into_inner);

        match slot.take() {
            Some(command) => command,
            None => {
                lock(&shared.stats).polls += 1;
                Command::GetState
            }
        }
    }

    /// Throw away wakeups and frames left over from earlier cycles.
    fn discard_stale(&self) {
        while self.signal.try_recv().is_ok() {}
        let stale = self.shared.queue.drain();
        if !stale.is_empty() {
            for frame in stale.iter() {
                log::debug!("discarding late {} frame", frame.opcode);
            }
            lock(&self.shared.stats).late_frames += stale.len() as u64;
        }
    }

    /// Block until something answers `expected`, or the timeout runs out.
    ///
    /// A wakeup can find the queue empty when its frame was already thrown
    /// away as stale, so waiting continues until a frame is dispatched.
    fn await_response(&self, expected: Opcode, timeout: Duration) -> Result<()> {
        let deadline = Instant::now() + timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match self.signal.recv_timeout(remaining) {
                Ok(()) => {
                    if self.dispatch_all(expected) > 0 || self.shared.is_shutdown() {
                        return Ok(());
                    }
                    log::trace!("woken with no frames queued");
                }
                Err(RecvTimeoutError::Timeout) => {
                    log::debug!("no response to {}", expected);
                    lock(&self.shared.stats).missed_responses += 1;
                    return Ok(());
                }
                Err(RecvTimeoutError::Disconnected) => return Err(Error::Closed),
            }
        }
    }

    fn dispatch_all(&self, expected: Opcode) -> usize {
        let frames = self.shared.queue.drain();
        let count = frames.len();
        for frame in frames {
            if frame.opcode != expected {
                log::debug!("{} answered with {}", expected, frame.opcode);
            }
            self.dispatch(frame);
        }
        count
    }

    fn dispatch(&self, frame: VerifiedFrame) {
        let shared = &self.shared;
        match frame.opcode {
            Opcode::GetLog => {
                let lines = decode_log(&frame.payload);
                let mut publishers = lock(&shared.publishers);
                for line in lines.iter() {
                    log::info!(target: "rp2040", "{}", line);
                    publishers.publish_log(line);
                }
            }
            Opcode::SetMotorLevels | Opcode::ResetState | Opcode::GetState => {
                match DeviceState::decode(&frame.payload) {
                    Ok(state) => {
                        let now = Instant::now();
                        *lock(&shared.state) = Some(state);
                        lock(&shared.publishers).publish_state(now, &state);
                    }
                    Err(e) => {
                        log::warn!("{}", e);
                        lock(&shared.stats).decode_errors += 1;
                    }
                }
            }
            Opcode::Ack => log::debug!("controller acknowledged"),
            Opcode::Nack => {
                log::warn!("controller rejected a command");
                lock(&shared.stats).nacks += 1;
            }
        }
        lock(&shared.stats).frames_dispatched += 1;
    }
}

impl LinkHandle {
    /// Queue a command for the next cycle. A command still waiting is
    /// replaced.
    pub fn send(&self, command: Command) {
        let mut slot = lock(&self.shared.command);
        if let Some(old) = slot.replace(command) {
            log::debug!("{:?} replaced by {:?} before sending", old, command);
        }
        self.shared.command_ready.notify_one();
    }

    pub fn set_motor_levels(&self, left: f32, right: f32, brake_left: bool, brake_right: bool) {
        self.send(Command::SetMotorLevels(MotorLevels {
            left,
            right,
            brake_left,
            brake_right,
        }));
    }

    pub fn get_log(&self) {
        self.send(Command::GetLog);
    }

    pub fn reset_state(&self) {
        self.send(Command::ResetState);
    }

    /// The most recent telemetry, if any arrived yet.
    pub fn state(&self) -> Option<DeviceState> {
        *lock(&self.shared.state)
    }

    pub fn stats(&self) -> LinkStats {
        *lock(&self.shared.stats)
    }

    pub fn health(&self) -> LinkHealth {
        self.shared.resync.health()
    }

    pub fn subscribe(&self, subscriber: Box<dyn TelemetrySubscriber>) {
        lock(&self.shared.publishers).subscribe(subscriber);
    }

    pub fn start_publishing(&self) {
        lock(&self.shared.publishers).start();
    }

    pub fn stop_publishing(&self) {
        lock(&self.shared.publishers).stop();
    }

    /// Ask the scheduler to stop after the current cycle.
    pub fn shutdown(&self) {
        self.shared.shutdown();
    }

    pub fn is_shutdown(&self) -> bool {
        self.shared.is_shutdown()
    }

    pub fn response_timeout(&self) -> Duration {
        self.shared.config.response_timeout()
    }
}

impl Inbound {
    /// Feed received bytes through the resynchronizer and queue whatever
    /// frames come out.
    ///
    /// Returns true if these bytes pushed the stream into a persistent
    /// desync; subscribers are told as well. What to do about it is up to
    /// the caller. Only a full queue is an error, and it stops the link.
    pub fn on_bytes_received(&self, data: &[u8]) -> Result<bool> {
        let shared = &self.shared;
        let feed = shared.resync.feed(data);
        if feed.escalated {
            let health = shared.resync.health();
            lock(&shared.publishers).publish_desync(&health);
        }
        if feed.frames.is_empty() {
            return Ok(feed.escalated);
        }

        for frame in feed.frames {
            if let Err(e) = shared.queue.push(frame) {
                log::error!("{}", e);
                let capacity = shared.queue.capacity();
                shared.fail(Error::QueueOverflow { capacity });
                return Err(e);
            }
        }
        shared.wake();
        Ok(feed.escalated)
    }

    /// Stop the link with `err`, unless it already failed.
    pub fn fail(&self, err: Error) {
        self.shared.fail(err);
    }

    pub fn is_shutdown(&self) -> bool {
        self.shared.is_shutdown()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::protocol::{MessageSerialize, Pair};
    use crate::transport::TransportError;
    use crate::WheelSample;

    /// Answers every command the way the controller does, by calling
    /// straight back into the inbound side.
    struct Loopback {
        inbound: Inbound,
        state: DeviceState,
        log: &'static [u8],
        written: Arc<Mutex<Vec<[u8; 5]>>>,
        stop_after: Option<(LinkHandle, usize)>,
    }

    impl Loopback {
        fn new(link: &Link, state: DeviceState) -> Self {
            Self {
                inbound: link.inbound(),
                state,
                log: b"booted\nmotors ok\n",
                written: Arc::new(Mutex::new(Vec::new())),
                stop_after: None,
            }
        }
    }

    impl Transport for Loopback {
        fn write(&mut self, data: &[u8], _timeout: Duration) -> Result<(), TransportError> {
            let mut frame = [0u8; 5];
            frame.copy_from_slice(data);
            let mut written = self.written.lock().unwrap();
            written.push(frame);

            let opcode = Opcode::from_byte(data[1]).unwrap();
            let reply = match opcode {
                Opcode::GetLog => self.log.frame_vec(opcode),
                _ => self.state.frame_vec(opcode),
            };
            // deliver in two pieces, like a serial port would
            let (a, b) = reply.split_at(3);
            self.inbound.on_bytes_received(a).unwrap();
            self.inbound.on_bytes_received(b).unwrap();

            if let Some((handle, n)) = &self.stop_after {
                if written.len() >= *n {
                    handle.shutdown();
                }
            }
            Ok(())
        }
    }

    struct Silent;

    impl Transport for Silent {
        fn write(&mut self, _data: &[u8], _timeout: Duration) -> Result<(), TransportError> {
            Ok(())
        }
    }

    struct Stuck;

    impl Transport for Stuck {
        fn write(&mut self, _data: &[u8], timeout: Duration) -> Result<(), TransportError> {
            Err(TransportError::Timeout(timeout))
        }
    }

    /// Leaves a wakeup pending on every write with nothing queued behind
    /// it. The first write also gets a real reply a little later.
    struct EarlyWake {
        inbound: Inbound,
        reply: Option<Vec<u8>>,
    }

    impl Transport for EarlyWake {
        fn write(&mut self, _data: &[u8], _timeout: Duration) -> Result<(), TransportError> {
            self.inbound.shared.wake();
            if let Some(reply) = self.reply.take() {
                let inbound = self.inbound.clone();
                std::thread::spawn(move || {
                    std::thread::sleep(Duration::from_millis(5));
                    inbound.on_bytes_received(&reply).unwrap();
                });
            }
            Ok(())
        }
    }

    struct Desyncs(Arc<Mutex<Vec<u64>>>);

    impl TelemetrySubscriber for Desyncs {
        fn on_persistent_desync(&mut self, health: &LinkHealth) {
            self.0.lock().unwrap().push(health.escalations);
        }
    }

    fn fast_config() -> LinkConfig {
        let _ = env_logger::builder().is_test(true).try_init();
        LinkConfig {
            command_wait_ms: 1,
            response_timeout_ms: 50,
            ..LinkConfig::default()
        }
    }

    fn wait_for<F>(mut f: F)
    where
        F: FnMut() -> bool,
    {
        let deadline = Instant::now() + Duration::from_secs(5);
        while !f() {
            assert!(Instant::now() < deadline, "timed out waiting");
            std::thread::sleep(Duration::from_millis(1));
        }
    }

    fn sample_state() -> DeviceState {
        let mut state = DeviceState::default();
        state.motors.encoder_counts = Pair::new(123456, -98765);
        state.battery.voltage_mv = 3812;
        state
    }

    #[test]
    fn poll_updates_encoder_counts() {
        let link = Link::new(fast_config()).unwrap();
        let handle = link.handle();
        let transport = Loopback::new(&link, sample_state());
        let written = transport.written.clone();
        let join = link.spawn(transport).unwrap();

        wait_for(|| handle.state().is_some());
        handle.shutdown();
        join.join().unwrap().unwrap();

        let state = handle.state().unwrap();
        assert_eq!(state.motors.encoder_counts, Pair::new(123456, -98765));
        assert_eq!(state.battery.voltage_mv, 3812);
        assert_eq!(written.lock().unwrap()[0], [0xfe, 0x03, 0x00, 0x00, 0xff]);
        assert!(handle.stats().polls >= 1);
        assert_eq!(handle.stats().missed_responses, 0);
    }

    #[test]
    fn latest_command_wins() {
        let link = Link::new(fast_config()).unwrap();
        let handle = link.handle();
        handle.set_motor_levels(1.0, 1.0, false, false);
        handle.get_log();

        let mut transport = Loopback::new(&link, sample_state());
        transport.stop_after = Some((handle.clone(), 1));
        let written = transport.written.clone();
        link.run(transport).unwrap();

        assert_eq!(*written.lock().unwrap(), vec![[0xfe, 0x00, 0x00, 0x00, 0xff]]);
        assert_eq!(handle.stats().frames_dispatched, 1);
    }

    #[test]
    fn explicit_commands_are_encoded() {
        let link = Link::new(fast_config()).unwrap();
        let handle = link.handle();
        handle.set_motor_levels(0.0, 0.0, false, false);

        let mut transport = Loopback::new(&link, sample_state());
        transport.stop_after = Some((handle.clone(), 1));
        let written = transport.written.clone();
        link.run(transport).unwrap();

        assert_eq!(written.lock().unwrap()[0], [0xfe, 0x01, 0x00, 0x00, 0xff]);
        assert!(handle.state().is_some());
    }

    #[test]
    fn publishes_when_started() {
        let link = Link::new(fast_config()).unwrap();
        let handle = link.handle();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen2 = seen.clone();
        handle.subscribe(Box::new(move |w: &WheelSample| {
            seen2.lock().unwrap().push(w.counts)
        }));
        handle.start_publishing();

        let transport = Loopback::new(&link, sample_state());
        let join = link.spawn(transport).unwrap();
        wait_for(|| !seen.lock().unwrap().is_empty());
        handle.shutdown();
        join.join().unwrap().unwrap();

        assert_eq!(seen.lock().unwrap()[0], Pair::new(123456, -98765));
    }

    #[test]
    fn missed_responses_are_counted() {
        let config = LinkConfig {
            response_timeout_ms: 2,
            ..fast_config()
        };
        let link = Link::new(config).unwrap();
        let handle = link.handle();
        let join = link.spawn(Silent).unwrap();

        wait_for(|| handle.stats().missed_responses >= 3);
        handle.shutdown();
        join.join().unwrap().unwrap();
        assert!(handle.state().is_none());
    }

    #[test]
    fn late_frames_are_discarded() {
        let config = LinkConfig {
            response_timeout_ms: 2,
            ..fast_config()
        };
        let link = Link::new(config).unwrap();
        let handle = link.handle();
        let inbound = link.inbound();
        let join = link.spawn(Silent).unwrap();

        wait_for(|| handle.stats().missed_responses >= 1);
        let ack = [0xfe, 0xfd, 0x00, 0x00, 0xff];
        inbound.on_bytes_received(&ack).unwrap();
        wait_for(|| {
            let stats = handle.stats();
            stats.late_frames + stats.frames_dispatched >= 1
        });
        handle.shutdown();
        join.join().unwrap().unwrap();
    }

    #[test]
    fn write_timeout_is_fatal() {
        let link = Link::new(fast_config()).unwrap();
        let handle = link.handle();
        let res = link.run(Stuck);
        assert!(matches!(res, Err(Error::WriteTimeout(_))));
        assert!(handle.is_shutdown());
    }

    #[test]
    fn queue_overflow_is_fatal() {
        let config = LinkConfig {
            queue_capacity: 2,
            ..fast_config()
        };
        let link = Link::new(config).unwrap();
        let inbound = link.inbound();

        let ack = [0xfe, 0xfd, 0x00, 0x00, 0xff];
        let mut data = Vec::new();
        for _ in 0..3 {
            data.extend_from_slice(&ack);
        }
        let res = inbound.on_bytes_received(&data);
        assert!(matches!(res, Err(Error::QueueOverflow { capacity: 2 })));

        let res = link.run(Silent);
        assert!(matches!(res, Err(Error::QueueOverflow { capacity: 2 })));
    }

    #[test]
    fn nack_and_bad_telemetry_are_counted() {
        let link = Link::new(fast_config()).unwrap();
        let handle = link.handle();
        let inbound = link.inbound();
        inbound.on_bytes_received(&[0xfe, 0xfc, 0x00, 0x00, 0xff]).unwrap();
        inbound.on_bytes_received(&[0xfe, 0x03, 0x01, 0x00, 0x00, 0xff]).unwrap();

        // dispatch what's queued as if it answered a poll
        link.dispatch_all(Opcode::GetState);
        let stats = handle.stats();
        assert_eq!(stats.nacks, 1);
        assert_eq!(stats.decode_errors, 1);
        assert_eq!(stats.frames_dispatched, 2);
        assert!(handle.state().is_none());
    }

    #[test]
    fn invalid_config_rejected() {
        let config = LinkConfig {
            queue_capacity: 0,
            ..LinkConfig::default()
        };
        assert!(matches!(Link::new(config), Err(Error::Config(_))));
    }

    #[test]
    fn empty_wakeup_keeps_waiting() {
        let link = Link::new(fast_config()).unwrap();
        let handle = link.handle();
        let transport = EarlyWake {
            inbound: link.inbound(),
            reply: Some(sample_state().frame_vec(Opcode::GetState)),
        };
        let join = link.spawn(transport).unwrap();

        wait_for(|| handle.state().is_some());
        handle.shutdown();
        join.join().unwrap().unwrap();

        let stats = handle.stats();
        assert_eq!(stats.frames_dispatched, 1);
        assert_eq!(stats.late_frames, 0);
    }

    #[test]
    fn empty_wakeup_without_reply_is_missed() {
        let config = LinkConfig {
            response_timeout_ms: 5,
            ..fast_config()
        };
        let link = Link::new(config).unwrap();
        let handle = link.handle();
        let transport = EarlyWake {
            inbound: link.inbound(),
            reply: None,
        };
        let join = link.spawn(transport).unwrap();

        wait_for(|| handle.stats().missed_responses >= 2);
        handle.shutdown();
        join.join().unwrap().unwrap();

        let stats = handle.stats();
        assert_eq!(stats.frames_dispatched, 0);
        // every command but one cut short by shutdown went unanswered
        assert!(stats.missed_responses + 1 >= stats.commands_sent);
    }

    #[test]
    fn persistent_desync_reaches_caller() {
        let link = Link::new(fast_config()).unwrap();
        let handle = link.handle();
        let inbound = link.inbound();
        let seen = Arc::new(Mutex::new(Vec::new()));
        handle.subscribe(Box::new(Desyncs(seen.clone())));

        // a header with a broken terminator, over and over
        let bad = [0xfe, 0x03, 0x00, 0x00, 0x00];
        let escalated: Vec<bool> = (0..5)
            .map(|_| inbound.on_bytes_received(&bad).unwrap())
            .collect();

        assert_eq!(escalated, [false, false, false, false, true]);
        assert_eq!(*seen.lock().unwrap(), vec![1]);
        assert_eq!(handle.health().escalations, 1);
        assert!(!handle.is_shutdown());
    }
}

//! TCP broadcast server.
//!
//! Two concurrent roles share the session table: a dedicated accept thread
//! that registers new clients, and the main simulation loop that ticks the
//! world, broadcasts snapshots, and ingests client commands. The table is
//! guarded by one mutex with short critical sections; control flags are
//! atomics so either side can read them without coordination.

pub mod session;

use std::f32::consts::PI;
use std::net::{SocketAddr, TcpListener};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use indexmap::IndexMap;
use log::{debug, info, warn};

use crate::protocol::codec::{encode_ack, encode_colony, encode_error, encode_frame};
use crate::protocol::{
    decode_command, encode_world_state, ColonyRecord, Command, MessageKind, ProtocolError,
    WorldStateFrame, MAX_COLONIES_PER_FRAME,
};
use crate::server::session::Session;
use crate::sim::Simulation;

/// Speed multiplier clamps.
const MIN_SPEED: f32 = 0.1;
const MAX_SPEED: f32 = 10.0;

/// How long the accept thread sleeps between polls of the listener.
const ACCEPT_POLL: Duration = Duration::from_millis(50);

/// Control flags shared between the main loop, the accept thread, and the
/// signal handler. Readers tolerate a one-tick lag.
pub struct ServerControl {
    running: AtomicBool,
    paused: AtomicBool,
    /// f32 bits of the speed multiplier.
    speed_bits: AtomicU32,
}

impl ServerControl {
    fn new() -> Self {
        ServerControl {
            running: AtomicBool::new(true),
            paused: AtomicBool::new(false),
            speed_bits: AtomicU32::new(1.0f32.to_bits()),
        }
    }

    /// True until shutdown is requested.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Relaxed)
    }

    /// Request a graceful shutdown; the main loop exits at its next top.
    pub fn stop(&self) {
        self.running.store(false, Ordering::Relaxed);
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::Relaxed)
    }

    pub fn set_paused(&self, paused: bool) {
        self.paused.store(paused, Ordering::Relaxed);
    }

    /// Current speed multiplier.
    pub fn speed(&self) -> f32 {
        f32::from_bits(self.speed_bits.load(Ordering::Relaxed))
    }

    fn set_speed(&self, speed: f32) {
        let clamped = speed.clamp(MIN_SPEED, MAX_SPEED);
        self.speed_bits.store(clamped.to_bits(), Ordering::Relaxed);
    }

    /// Double the speed, clamped to the maximum.
    pub fn speed_up(&self) {
        self.set_speed(self.speed() * 2.0);
    }

    /// Halve the speed, clamped to the minimum.
    pub fn slow_down(&self) {
        self.set_speed(self.speed() / 2.0);
    }
}

type SessionTable = Arc<Mutex<IndexMap<u64, Session>>>;

/// The simulation server: owns the listener, the session table, and the
/// world behind it.
pub struct BroadcastServer {
    listener: TcpListener,
    local_addr: SocketAddr,
    sim: Simulation,
    sessions: SessionTable,
    control: Arc<ServerControl>,
    sequence: u32,
}

impl BroadcastServer {
    /// Bind the listener and build the world. Failures here are fatal.
    pub fn bind(addr: SocketAddr, sim: Simulation) -> Result<Self> {
        let listener =
            TcpListener::bind(addr).with_context(|| format!("failed to bind {addr}"))?;
        let local_addr = listener
            .local_addr()
            .context("failed to read listener address")?;
        info!("listening on {local_addr}");

        Ok(BroadcastServer {
            listener,
            local_addr,
            sim,
            sessions: Arc::new(Mutex::new(IndexMap::new())),
            control: Arc::new(ServerControl::new()),
            sequence: 0,
        })
    }

    /// Address the listener actually bound (useful with port 0).
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Shared control handle, for signal handlers and tests.
    pub fn control(&self) -> Arc<ServerControl> {
        Arc::clone(&self.control)
    }

    /// Run until `control.stop()`: accept thread plus tick/broadcast loop.
    pub fn run(&mut self) -> Result<()> {
        let accept_handle = self.spawn_accept_thread()?;

        while self.control.is_running() {
            let start = Instant::now();

            if !self.control.is_paused() {
                self.sim.tick();
                self.broadcast();
            }
            self.poll_commands();

            if self.sim.world().tick % 100 == 0 && !self.control.is_paused() {
                let world = self.sim.world();
                debug!(
                    "tick {}: {} active colonies, {:.0}% occupied",
                    world.tick,
                    world.active_colony_count(),
                    (1.0 - world.empty_ratio()) * 100.0
                );
            }

            // Pace the loop: wall time per tick is tick_rate scaled by the
            // speed multiplier, never less than a millisecond.
            let target_ms =
                (self.sim.config().tick_rate_ms as f64 / self.control.speed() as f64).max(1.0);
            let target = Duration::from_secs_f64(target_ms / 1000.0);
            let elapsed = start.elapsed();
            if target > elapsed {
                thread::sleep(target - elapsed);
            }
        }

        info!("shutting down");
        if accept_handle.join().is_err() {
            warn!("accept thread panicked");
        }
        self.sessions.lock().unwrap().clear();
        self.sim.shutdown();
        Ok(())
    }

    /// Dedicated accept role. The listener polls so the thread can observe
    /// the shutdown flag instead of blocking forever.
    fn spawn_accept_thread(&self) -> Result<JoinHandle<()>> {
        let listener = self
            .listener
            .try_clone()
            .context("failed to clone listener")?;
        listener
            .set_nonblocking(true)
            .context("failed to configure listener")?;
        let sessions = Arc::clone(&self.sessions);
        let control = Arc::clone(&self.control);

        thread::Builder::new()
            .name("petri-accept".to_string())
            .spawn(move || {
                let next_id = AtomicU64::new(1);
                while control.is_running() {
                    match listener.accept() {
                        Ok((stream, addr)) => {
                            let id = next_id.fetch_add(1, Ordering::Relaxed);
                            match Session::new(id, stream, addr) {
                                Ok(session) => {
                                    info!("client {id} connected from {addr}");
                                    sessions.lock().unwrap().insert(id, session);
                                }
                                Err(err) => warn!("failed to set up client from {addr}: {err}"),
                            }
                        }
                        Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => {
                            thread::sleep(ACCEPT_POLL);
                        }
                        Err(err) => {
                            warn!("accept failed: {err}");
                            thread::sleep(ACCEPT_POLL);
                        }
                    }
                }
            })
            .context("failed to spawn accept thread")
    }

    fn next_sequence(&mut self) -> u32 {
        let sequence = self.sequence;
        self.sequence = self.sequence.wrapping_add(1);
        sequence
    }

    /// Value-copy snapshot of the active colonies, capped for the wire.
    fn build_snapshot(&self) -> WorldStateFrame {
        let world = self.sim.world();
        let centroids = world.centroids();

        let colonies: Vec<ColonyRecord> = world
            .colonies()
            .iter()
            .enumerate()
            .filter(|(_, colony)| colony.active)
            .take(MAX_COLONIES_PER_FRAME)
            .map(|(slot, colony)| {
                let (x, y) = centroids.get(slot).copied().flatten().unwrap_or((0.0, 0.0));
                ColonyRecord {
                    id: colony.id,
                    name: colony.name.clone(),
                    x,
                    y,
                    radius: (colony.cell_count as f32 / PI).sqrt(),
                    population: colony.cell_count,
                    max_population: colony.max_cell_count,
                    growth_rate: colony.growth_rate(),
                    color: colony.color,
                    alive: true,
                    shape_seed: colony.shape_seed,
                    wobble_phase: colony.wobble_phase,
                    shape_evolution: colony.shape_evolution,
                }
            })
            .collect();

        WorldStateFrame {
            width: world.width(),
            height: world.height(),
            tick: world.tick as u32,
            paused: self.control.is_paused(),
            speed_multiplier: self.control.speed(),
            colonies,
        }
    }

    /// Serialize the snapshot once and write the same buffer to everyone.
    fn broadcast(&mut self) {
        let payload = match encode_world_state(&self.build_snapshot()) {
            Ok(payload) => payload,
            Err(err) => {
                warn!("failed to encode snapshot: {err}");
                return;
            }
        };
        let sequence = self.next_sequence();
        let frame = match encode_frame(MessageKind::WorldState, &payload, sequence) {
            Ok(frame) => frame,
            Err(err) => {
                warn!("failed to frame snapshot: {err}");
                return;
            }
        };

        let mut sessions = self.sessions.lock().unwrap();
        sessions.retain(|_, session| {
            let ok = session.send_bytes(&frame);
            if !ok {
                info!("client {} dropped (send failure)", session.id);
            }
            ok
        });
    }

    /// Drain at most one inbound frame per session, then act on them.
    fn poll_commands(&mut self) {
        let mut commands: Vec<(u64, Command)> = Vec::new();
        let mut wants_snapshot: Vec<u64> = Vec::new();

        {
            let mut sessions = self.sessions.lock().unwrap();
            sessions.retain(|_, session| {
                match session.poll_frame() {
                    Ok(Some((header, payload))) => match header.kind {
                        MessageKind::Command => match decode_command(&payload) {
                            Ok(command) => commands.push((session.id, command)),
                            // Unknown command codes are ignored; anything
                            // else malformed costs the session.
                            Err(ProtocolError::UnknownCommand(code)) => {
                                debug!("client {} sent unknown command {code}", session.id);
                            }
                            Err(err) => {
                                warn!("client {} protocol error: {err}", session.id);
                                return false;
                            }
                        },
                        MessageKind::Connect => wants_snapshot.push(session.id),
                        MessageKind::Disconnect => {
                            info!("client {} disconnected", session.id);
                            return false;
                        }
                        _ => {}
                    },
                    Ok(None) => {}
                    Err(err) => {
                        warn!("client {} protocol error: {err}", session.id);
                        return false;
                    }
                }
                if !session.alive {
                    info!("client {} disconnected", session.id);
                }
                session.alive
            });
        }

        if !wants_snapshot.is_empty() {
            match encode_world_state(&self.build_snapshot()) {
                Ok(payload) => {
                    for id in wants_snapshot {
                        let sequence = self.next_sequence();
                        let mut sessions = self.sessions.lock().unwrap();
                        if let Some(session) = sessions.get_mut(&id) {
                            session.send_frame(MessageKind::WorldState, &payload, sequence);
                        }
                    }
                }
                Err(err) => warn!("failed to encode snapshot: {err}"),
            }
        }

        for (session_id, command) in commands {
            self.handle_command(session_id, command);
        }
    }

    /// Apply one client command between ticks.
    fn handle_command(&mut self, session_id: u64, command: Command) {
        debug!("client {session_id} command: {command:?}");
        let code = command.code();
        match command {
            Command::Pause => {
                self.control.set_paused(true);
                self.ack(session_id, code);
            }
            Command::Resume => {
                self.control.set_paused(false);
                self.ack(session_id, code);
            }
            Command::SpeedUp => {
                self.control.speed_up();
                self.ack(session_id, code);
            }
            Command::SlowDown => {
                self.control.slow_down();
                self.ack(session_id, code);
            }
            Command::Reset => {
                self.sim.reset();
                self.ack(session_id, code);
            }
            Command::SelectColony { colony_id } => {
                let record = self.colony_record(colony_id);
                let sequence = self.next_sequence();
                let mut sessions = self.sessions.lock().unwrap();
                if let Some(session) = sessions.get_mut(&session_id) {
                    match record {
                        Some(record) => {
                            session.selected_colony = Some(colony_id);
                            let mut payload = Vec::new();
                            if encode_colony(&mut payload, &record).is_ok() {
                                session.send_frame(MessageKind::ColonyInfo, &payload, sequence);
                            }
                        }
                        None => {
                            if let Ok(payload) = encode_error(1, "no such colony") {
                                session.send_frame(MessageKind::Error, &payload, sequence);
                            }
                        }
                    }
                }
            }
            Command::SpawnColony { x, y, name } => {
                let name = if name.is_empty() { None } else { Some(name) };
                match self.sim.spawn_colony_at(x, y, name) {
                    Some(id) => {
                        info!("client {session_id} spawned colony #{id} at ({x},{y})");
                        self.ack(session_id, code);
                    }
                    None => {
                        let sequence = self.next_sequence();
                        if let Ok(payload) = encode_error(2, "cell occupied or out of bounds") {
                            let mut sessions = self.sessions.lock().unwrap();
                            if let Some(session) = sessions.get_mut(&session_id) {
                                session.send_frame(MessageKind::Error, &payload, sequence);
                            }
                        }
                    }
                }
            }
        }
    }

    /// Snapshot one colony as a wire record, if it is alive.
    fn colony_record(&self, colony_id: u32) -> Option<ColonyRecord> {
        let world = self.sim.world();
        let colony = world.colony(colony_id).filter(|c| c.active)?;
        let (x, y) = world.centroid(colony_id).unwrap_or((0.0, 0.0));
        Some(ColonyRecord {
            id: colony.id,
            name: colony.name.clone(),
            x,
            y,
            radius: (colony.cell_count as f32 / PI).sqrt(),
            population: colony.cell_count,
            max_population: colony.max_cell_count,
            growth_rate: colony.growth_rate(),
            color: colony.color,
            alive: true,
            shape_seed: colony.shape_seed,
            wobble_phase: colony.wobble_phase,
            shape_evolution: colony.shape_evolution,
        })
    }

    fn ack(&mut self, session_id: u64, command_code: u8) {
        let sequence = self.next_sequence();
        let Ok(payload) = encode_ack(command_code) else {
            return;
        };
        let mut sessions = self.sessions.lock().unwrap();
        if let Some(session) = sessions.get_mut(&session_id) {
            session.send_frame(MessageKind::Ack, &payload, sequence);
        }
    }
}
